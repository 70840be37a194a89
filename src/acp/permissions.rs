//! Permission dispatch for incoming agent requests.
//!
//! The agent pauses tool execution on `session/request_permission` and
//! waits for exactly one response. This client never escalates to a
//! user: the decision follows the edit-mode flag at the moment the
//! request arrives. The dispatch task also answers unknown incoming
//! methods with an empty object so the agent cannot stall on a frame we
//! do not understand.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::protocol::{
    PermissionOption, PermissionOutcome, RequestPermissionParams, RequestPermissionResponse,
};
use super::router::{IncomingRequest, Router};

/// Method the agent uses to ask for a tool-permission decision.
pub const REQUEST_PERMISSION_METHOD: &str = "session/request_permission";

/// Pick the option identifier for a permission request.
///
/// Edits allowed: the option whose kind equals `allow_once`, else the
/// first option whose kind begins with `allow`, else the literal
/// `allow_once`. Edits disallowed: symmetric on the `reject` side.
#[must_use]
pub fn select_option(options: &[PermissionOption], edits_allowed: bool) -> String {
    let prefix = if edits_allowed { "allow" } else { "reject" };
    let exact = format!("{prefix}_once");

    options
        .iter()
        .find(|o| o.kind.as_deref() == Some(exact.as_str()))
        .or_else(|| {
            options
                .iter()
                .find(|o| o.kind.as_deref().is_some_and(|k| k.starts_with(prefix)))
        })
        .map_or(exact, |o| o.option_id.clone())
}

/// Spawn the task that answers incoming requests from the agent.
///
/// Runs until the channel closes or `cancel` fires. Responses are
/// best-effort: when the process has died mid-selection the write fails
/// and the response is simply dropped.
#[must_use]
pub fn spawn_permission_dispatch(
    mut incoming_rx: mpsc::UnboundedReceiver<IncomingRequest>,
    router: Arc<Router>,
    edit_mode: Arc<AtomicBool>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;

                () = cancel.cancelled() => {
                    debug!("permission dispatch: cancellation received, stopping");
                    break;
                }

                request = incoming_rx.recv() => {
                    let Some(request) = request else {
                        debug!("permission dispatch: incoming channel closed, stopping");
                        break;
                    };
                    handle_incoming(&router, &edit_mode, request).await;
                }
            }
        }
    })
}

/// Decide and answer one incoming request.
async fn handle_incoming(router: &Router, edit_mode: &AtomicBool, request: IncomingRequest) {
    let result = if request.method == REQUEST_PERMISSION_METHOD {
        let params: RequestPermissionParams =
            serde_json::from_value(request.params).unwrap_or(RequestPermissionParams {
                tool_call: Value::Null,
                options: Vec::new(),
            });

        let edits_allowed = edit_mode.load(Ordering::Relaxed);
        let option_id = select_option(&params.options, edits_allowed);
        debug!(
            id = request.id,
            edits_allowed,
            option_id = option_id.as_str(),
            "permission dispatch: auto-selecting"
        );

        let response = RequestPermissionResponse {
            outcome: PermissionOutcome {
                outcome: "selected".to_owned(),
                option_id: Some(option_id),
            },
        };
        serde_json::to_value(response).unwrap_or(Value::Null)
    } else {
        // Unknown incoming method: acknowledge so the agent does not stall.
        debug!(
            id = request.id,
            method = request.method.as_str(),
            "permission dispatch: unknown incoming method, replying with empty object"
        );
        serde_json::json!({})
    };

    if let Err(err) = router.respond(request.id, result).await {
        warn!(id = request.id, error = %err, "permission dispatch: response dropped");
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
