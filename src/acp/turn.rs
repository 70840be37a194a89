//! Turn engine: one `session/prompt` round-trip as a typed event stream.
//!
//! A turn installs an ephemeral notification subscriber, issues the
//! prompt request, and translates everything the agent sends until the
//! prompt's response arrives. The caller drains a bounded channel of
//! [`TurnEvent`]s; the sequence is finite and ends with exactly one
//! `Done` or `Error`, after which the subscriber is removed.
//!
//! Ordering: a single task multiplexes the subscription and the prompt
//! future, so the consumer observes events in receipt order. When the
//! response wins the race against notifications that are already queued,
//! the queue is drained before the terminal event is emitted.

use std::pin::pin;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::protocol::{
    context_usage_percentage, ContentBlock, PromptResult, ResourceContent, SessionPromptParams,
    SessionUpdate, ToolLocation,
};
use super::router::{AgentNotification, Router};
use super::session::SessionManager;

/// Events in a turn's stream have modest fan-out; a small buffer keeps
/// the translator ahead of a slow consumer without unbounded growth.
const TURN_CHANNEL_CAPACITY: usize = 64;

/// Who authored a prior chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// The human (or calling service).
    User,
    /// The agent.
    Assistant,
}

/// One prior message in the conversation being replayed to the agent.
#[derive(Debug, Clone)]
pub struct ChatMessage {
    /// Message author.
    pub role: Role,
    /// Message text.
    pub content: String,
}

/// A base64-encoded image attachment.
#[derive(Debug, Clone)]
pub struct ImageAttachment {
    /// Base64 image bytes.
    pub data: String,
    /// MIME type; defaults to `image/png`.
    pub mime_type: Option<String>,
}

/// The document the conversation is about, sent as an embedded resource.
#[derive(Debug, Clone)]
pub struct DocumentResource {
    /// Resource URI.
    pub uri: String,
    /// Document text.
    pub text: String,
    /// MIME type; defaults to `text/markdown`.
    pub mime_type: Option<String>,
}

/// An auxiliary file attachment.
#[derive(Debug, Clone)]
pub struct FileAttachment {
    /// Attachment name, used to build its `file://attachment/` URI.
    pub name: String,
    /// Attachment text.
    pub text: String,
    /// MIME type; defaults to `text/plain`.
    pub mime_type: Option<String>,
}

/// Everything a caller hands to `chat_stream`.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    /// Prior conversation, oldest first.
    pub messages: Vec<ChatMessage>,
    /// Optional system prompt, rendered as the leading paragraph.
    pub system_prompt: Option<String>,
    /// Image attachments.
    pub images: Vec<ImageAttachment>,
    /// Optional document resource.
    pub document_resource: Option<DocumentResource>,
    /// Auxiliary file attachments.
    pub file_attachments: Vec<FileAttachment>,
}

/// One event in a turn's stream.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnEvent {
    /// A chunk of agent response text.
    Token {
        /// Chunk text.
        text: String,
    },
    /// The agent started a tool call.
    ToolCall {
        /// Tool-call identifier.
        id: String,
        /// Human-readable title.
        title: String,
        /// Tool kind (e.g., `edit`).
        kind: String,
        /// Always `running` at announcement.
        status: String,
    },
    /// Progress on an in-flight tool call.
    ToolCallUpdate {
        /// Tool-call identifier.
        id: String,
        /// Updated title, when resent.
        title: Option<String>,
        /// Status; `running` when the agent omits one.
        status: String,
        /// Locations the tool touched.
        #[serde(skip_serializing_if = "Option::is_none")]
        locations: Option<Vec<ToolLocation>>,
    },
    /// A tool call finished.
    ToolResult {
        /// Tool-call identifier.
        id: String,
        /// Title, when resent.
        title: Option<String>,
        /// Always `done`.
        status: String,
    },
    /// Fresh context-usage reading.
    ContextUsage {
        /// Percent of the context window in use.
        percentage: f64,
    },
    /// Compaction status change.
    Compaction {
        /// Raw status string (e.g., `in_progress`).
        status: String,
    },
    /// The turn completed normally. Terminal.
    Done,
    /// The turn failed. Terminal.
    Error {
        /// Failure message.
        message: String,
    },
}

// ── Prompt assembly ──────────────────────────────────────────────────────────

/// Assemble the content-block array for a `session/prompt` request.
///
/// Deterministic: the same request produces an identical array. Layout
/// is one text block (system paragraph first, then one `User:` /
/// `Assistant:` paragraph per message, blank-line separated), then the
/// document resource, then images, then file attachments.
#[must_use]
pub fn assemble_prompt(request: &ChatRequest) -> Vec<ContentBlock> {
    let mut paragraphs: Vec<String> = Vec::new();
    if let Some(ref system) = request.system_prompt {
        paragraphs.push(format!("[System] {system}"));
    }
    for message in &request.messages {
        let prefix = match message.role {
            Role::User => "User",
            Role::Assistant => "Assistant",
        };
        paragraphs.push(format!("{prefix}: {}", message.content));
    }

    let mut blocks = vec![ContentBlock::Text {
        text: paragraphs.join("\n\n"),
    }];

    if let Some(ref document) = request.document_resource {
        blocks.push(ContentBlock::Resource {
            resource: ResourceContent {
                uri: document.uri.clone(),
                text: document.text.clone(),
                mime_type: document
                    .mime_type
                    .clone()
                    .unwrap_or_else(|| "text/markdown".to_owned()),
            },
        });
    }

    for image in &request.images {
        blocks.push(ContentBlock::Image {
            data: image.data.clone(),
            mime_type: image
                .mime_type
                .clone()
                .unwrap_or_else(|| "image/png".to_owned()),
        });
    }

    for attachment in &request.file_attachments {
        blocks.push(ContentBlock::Resource {
            resource: ResourceContent {
                uri: format!("file://attachment/{}", attachment.name),
                text: attachment.text.clone(),
                mime_type: attachment
                    .mime_type
                    .clone()
                    .unwrap_or_else(|| "text/plain".to_owned()),
            },
        });
    }

    blocks
}

// ── Notification translation ─────────────────────────────────────────────────

/// Translate one notification into at most one turn event.
///
/// Cache maintenance (context usage, compaction flag, mode and command
/// catalogs) is the persistent state tracker's job; this path only
/// decides what the turn's consumer sees. Unknown update kinds are
/// logged and produce nothing.
#[must_use]
pub fn translate_notification(notification: &AgentNotification) -> Option<TurnEvent> {
    match notification.method.as_str() {
        "session/update" => {
            let update = notification.params.get("update")?;
            match SessionUpdate::from_value(update) {
                SessionUpdate::AgentMessageChunk { text } if !text.is_empty() => {
                    Some(TurnEvent::Token { text })
                }
                SessionUpdate::AgentMessageChunk { .. }
                | SessionUpdate::AgentThoughtChunk { .. }
                | SessionUpdate::TurnEnd { .. }
                | SessionUpdate::CurrentModeUpdate { .. }
                | SessionUpdate::AvailableCommandsUpdate(_) => None,
                SessionUpdate::ToolCall(info) => Some(TurnEvent::ToolCall {
                    id: info.tool_call_id,
                    title: info.title,
                    kind: info.kind,
                    status: "running".to_owned(),
                }),
                SessionUpdate::ToolCallUpdate(info) => Some(TurnEvent::ToolCallUpdate {
                    id: info.tool_call_id,
                    title: info.title,
                    status: info.status.unwrap_or_else(|| "running".to_owned()),
                    locations: info.locations,
                }),
                SessionUpdate::ToolResult {
                    tool_call_id,
                    title,
                } => Some(TurnEvent::ToolResult {
                    id: tool_call_id,
                    title,
                    status: "done".to_owned(),
                }),
                SessionUpdate::Unknown(value) => {
                    debug!(
                        kind = value
                            .get("sessionUpdate")
                            .and_then(serde_json::Value::as_str)
                            .unwrap_or("<missing>"),
                        "turn: skipping unknown session-update kind"
                    );
                    None
                }
            }
        }
        "kiro.dev/metadata" => notification
            .params
            .get("contextUsagePercentage")
            .and_then(serde_json::Value::as_f64)
            .map(|percentage| TurnEvent::ContextUsage { percentage }),
        "_kiro.dev/compaction/status" => {
            let status = notification
                .params
                .get("status")
                .and_then(serde_json::Value::as_str)
                .unwrap_or("")
                .to_owned();
            Some(TurnEvent::Compaction { status })
        }
        other => {
            debug!(method = other, "turn: skipping unknown notification method");
            None
        }
    }
}

// ── Turn execution ───────────────────────────────────────────────────────────

/// Start a turn and return the receiver its events arrive on.
pub(crate) fn start_turn(
    router: Arc<Router>,
    manager: Arc<SessionManager>,
    session_id: String,
    prompt: Vec<ContentBlock>,
) -> mpsc::Receiver<TurnEvent> {
    let (events_tx, events_rx) = mpsc::channel(TURN_CHANNEL_CAPACITY);
    tokio::spawn(run_turn(router, manager, session_id, prompt, events_tx));
    events_rx
}

/// Drive one turn to its terminal event.
async fn run_turn(
    router: Arc<Router>,
    manager: Arc<SessionManager>,
    session_id: String,
    prompt: Vec<ContentBlock>,
    events_tx: mpsc::Sender<TurnEvent>,
) {
    let (subscriber_id, mut notifications) = router.subscribe().await;

    let params = SessionPromptParams {
        session_id,
        prompt,
    };
    let params = match serde_json::to_value(&params) {
        Ok(value) => value,
        Err(err) => {
            let _ = events_tx
                .send(TurnEvent::Error {
                    message: format!("failed to serialize prompt: {err}"),
                })
                .await;
            router.unsubscribe(subscriber_id).await;
            return;
        }
    };

    let mut prompt_fut = pin!(router.request("session/prompt", params));
    let mut subscription_open = true;

    let outcome = loop {
        tokio::select! {
            biased;

            notification = notifications.recv(), if subscription_open => {
                match notification {
                    Some(notification) => {
                        if let Some(event) = translate_notification(&notification) {
                            if events_tx.send(event).await.is_err() {
                                debug!("turn: consumer gone, abandoning stream");
                                router.unsubscribe(subscriber_id).await;
                                return;
                            }
                        }
                    }
                    None => {
                        // Subscribers were dropped by connection cleanup;
                        // the prompt future fails with the same cause.
                        subscription_open = false;
                    }
                }
            }

            outcome = &mut prompt_fut => break outcome,
        }
    };

    // The response ends the turn, but notifications that arrived before
    // it may still sit in the subscription queue. Flush them first so
    // token order survives the race.
    while let Ok(notification) = notifications.try_recv() {
        if let Some(event) = translate_notification(&notification) {
            if events_tx.send(event).await.is_err() {
                router.unsubscribe(subscriber_id).await;
                return;
            }
        }
    }

    match outcome {
        Ok(reply) => {
            let parsed: PromptResult = serde_json::from_value(reply).unwrap_or(PromptResult {
                stop_reason: None,
                context_usage: None,
            });
            if let Some(reason) = parsed.stop_reason.as_deref() {
                debug!(stop_reason = reason, "turn: prompt completed");
            }
            if let Some(percentage) = parsed
                .context_usage
                .as_ref()
                .and_then(context_usage_percentage)
            {
                manager.record_context_usage(percentage).await;
                let _ = events_tx
                    .send(TurnEvent::ContextUsage { percentage })
                    .await;
            }
            let _ = events_tx.send(TurnEvent::Done).await;
        }
        Err(err) => {
            warn!(error = %err, "turn: prompt failed");
            let _ = events_tx
                .send(TurnEvent::Error {
                    message: err.to_string(),
                })
                .await;
        }
    }

    router.unsubscribe(subscriber_id).await;
}

/// Issue a best-effort `session/cancel` for the active session.
///
/// Failures are logged and swallowed; the caller's event stream is not
/// touched — the agent concludes the turn on its own shortly after.
pub(crate) async fn cancel_turn(router: &Router, session_id: &str) {
    match router
        .request(
            "session/cancel",
            serde_json::json!({ "sessionId": session_id }),
        )
        .await
    {
        Ok(_) => debug!(session_id, "turn: cancel acknowledged"),
        Err(err) => warn!(session_id, error = %err, "turn: cancel failed"),
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
