//! Newline-delimited JSON codec for the agent's stdio streams.
//!
//! Wraps [`tokio_util::codec::LinesCodec`]: every frame is one complete
//! UTF-8 JSON object terminated by `\n`. No length limit is imposed —
//! the agent is a locally spawned, trusted process, and prompt payloads
//! routinely exceed any comfortable cap.
//!
//! Use [`FrameCodec`] as the codec parameter for
//! [`tokio_util::codec::FramedRead`] over the child's stdout. Writing is
//! a single serialize-append-newline step performed by the router.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, LinesCodec, LinesCodecError};
use tracing::warn;

use super::protocol::IncomingFrame;
use crate::{AcpError, Result};

/// Newline-framed JSON codec for the agent stream.
#[derive(Debug)]
pub struct FrameCodec(LinesCodec);

impl FrameCodec {
    /// Create a codec with unbounded line length.
    #[must_use]
    pub fn new() -> Self {
        Self(LinesCodec::new())
    }
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FrameCodec {
    type Item = String;
    type Error = AcpError;

    /// Decode the next newline-terminated line, buffering partial input.
    ///
    /// Returns `Ok(None)` while no complete line is available.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.0.decode(src).map_err(map_codec_error)
    }

    /// Decode the final unterminated line at stream EOF.
    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        self.0.decode_eof(src).map_err(map_codec_error)
    }
}

/// Parse one decoded line into an [`IncomingFrame`].
///
/// Returns `None` for blank lines and for lines that are not valid JSON
/// objects; malformed input is logged and discarded, never fatal.
#[must_use]
pub fn parse_frame(line: &str) -> Option<IncomingFrame> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return None;
    }
    match serde_json::from_str::<IncomingFrame>(trimmed) {
        Ok(frame) => Some(frame),
        Err(err) => {
            warn!(error = %err, raw_line = trimmed, "frame codec: malformed frame, discarding");
            None
        }
    }
}

/// Map a [`LinesCodecError`] to an [`AcpError`].
fn map_codec_error(e: LinesCodecError) -> AcpError {
    match e {
        // Unreachable with an unbounded codec; kept for exhaustiveness.
        LinesCodecError::MaxLineLengthExceeded => AcpError::Io("line too long".into()),
        LinesCodecError::Io(io_err) => AcpError::Io(io_err.to_string()),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
