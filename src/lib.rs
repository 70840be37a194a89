#![forbid(unsafe_code)]

//! `ghostwriter-acp` — client runtime for the Agent Communication
//! Protocol (ACP).
//!
//! Spawns a local `kiro-cli acp` process and multiplexes it across many
//! concurrent in-process callers: JSON-RPC 2.0 over newline-delimited
//! UTF-8 JSON on the child's stdio, typed per-turn event streams,
//! automatic tool-permission decisions, and session identity that
//! survives restarts.
//!
//! The entry point is [`AcpClient`]; everything else backs it.

pub mod acp;
pub mod client;
pub mod config;
pub mod errors;
pub mod persistence;

pub use acp::protocol::{CommandEntry, ModeEntry, ModelEntry, ModelsInfo, ModesInfo, ToolLocation};
pub use acp::turn::{
    ChatMessage, ChatRequest, DocumentResource, FileAttachment, ImageAttachment, Role, TurnEvent,
};
pub use client::{AcpClient, ConnectionStatus, ContextUsage};
pub use config::ClientConfig;
pub use errors::{AcpError, Result};
