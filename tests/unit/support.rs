//! Shared plumbing for wire-level tests: an in-memory duplex transport
//! standing in for the agent's stdio, with line-oriented helpers for
//! the agent side of the conversation.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, ReadHalf, WriteHalf};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use ghostwriter_acp::acp::router::{spawn_reader, IncomingRequest, Router};

/// The agent's half of an in-memory connection.
pub struct FakeAgent {
    reader: BufReader<ReadHalf<DuplexStream>>,
    writer: WriteHalf<DuplexStream>,
}

impl FakeAgent {
    /// Read the next frame the client wrote, parsed as JSON.
    pub async fn recv(&mut self) -> serde_json::Value {
        let mut line = String::new();
        let n = self
            .reader
            .read_line(&mut line)
            .await
            .expect("agent side read");
        assert!(n > 0, "client closed the stream before a frame arrived");
        serde_json::from_str(line.trim()).expect("client frames must be valid JSON")
    }

    /// Write one frame to the client, newline-terminated.
    pub async fn send(&mut self, frame: &serde_json::Value) {
        let mut bytes = serde_json::to_vec(frame).expect("serialize frame");
        bytes.push(b'\n');
        self.writer.write_all(&bytes).await.expect("agent side write");
        self.writer.flush().await.expect("agent side flush");
    }

    /// Write raw bytes to the client without framing.
    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.writer.write_all(bytes).await.expect("agent side write");
        self.writer.flush().await.expect("agent side flush");
    }
}

/// Build a router wired to an in-memory agent.
pub fn connect() -> (
    Arc<Router>,
    mpsc::UnboundedReceiver<IncomingRequest>,
    FakeAgent,
    CancellationToken,
) {
    let (ours, theirs) = tokio::io::duplex(256 * 1024);
    let (our_read, our_write) = tokio::io::split(ours);
    let (agent_read, agent_write) = tokio::io::split(theirs);

    let (router, incoming_rx) = Router::new(our_write);
    let cancel = CancellationToken::new();
    let _reader = spawn_reader(Arc::clone(&router), our_read, cancel.clone());

    let agent = FakeAgent {
        reader: BufReader::new(agent_read),
        writer: agent_write,
    };
    (router, incoming_rx, agent, cancel)
}

/// A successful JSON-RPC response frame.
pub fn ok_response(id: u64, result: serde_json::Value) -> serde_json::Value {
    serde_json::json!({"jsonrpc": "2.0", "id": id, "result": result})
}
