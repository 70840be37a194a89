//! Agent Communication Protocol (ACP) stream handling.
//!
//! This module manages bidirectional NDJSON JSON-RPC communication with
//! the spawned Kiro CLI agent process via its stdio.
//!
//! # Submodules
//!
//! - [`codec`]: [`tokio_util::codec::LinesCodec`]-based NDJSON framing
//!   and frame classification.
//! - [`protocol`]: serde wire types for the methods this client speaks.
//! - [`spawner`]: process spawning with search-path resolution, stderr
//!   capture, and exit monitoring.
//! - [`router`]: pending-request table, notification fan-out, and the
//!   reader task.
//! - [`session`]: initialize + resume-or-create handshake and the
//!   catalog cache.
//! - [`permissions`]: auto-decision of `session/request_permission`.
//! - [`turn`]: `session/prompt` as a typed event stream.

pub mod codec;
pub mod permissions;
pub mod protocol;
pub mod router;
pub mod session;
pub mod spawner;
pub mod turn;
