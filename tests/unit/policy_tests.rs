//! Permission dispatch over the wire: exact response shapes for
//! auto-approve, auto-reject, and unknown incoming methods.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use ghostwriter_acp::acp::permissions::spawn_permission_dispatch;

use super::support::connect;

fn permission_request(id: u64) -> serde_json::Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": "session/request_permission",
        "params": {
            "toolCall": {"title": "Write /tmp/draft.md"},
            "options": [
                {"kind": "allow_once", "optionId": "A"},
                {"kind": "reject_once", "optionId": "R"},
            ],
        },
    })
}

/// Scenario: with edits allowed, the reply selects the `allow_once`
/// option, exactly.
#[tokio::test]
async fn edits_allowed_selects_allow_option() {
    let (router, incoming_rx, mut agent, cancel) = connect();
    let edit_mode = Arc::new(AtomicBool::new(true));
    let _dispatch =
        spawn_permission_dispatch(incoming_rx, Arc::clone(&router), edit_mode, cancel.clone());

    agent.send(&permission_request(999)).await;

    let reply = agent.recv().await;
    assert_eq!(
        reply,
        serde_json::json!({
            "jsonrpc": "2.0",
            "id": 999,
            "result": {"outcome": {"outcome": "selected", "optionId": "A"}},
        })
    );
}

/// Scenario: with edits disallowed, the same input selects the
/// `reject_once` option.
#[tokio::test]
async fn edits_disallowed_selects_reject_option() {
    let (router, incoming_rx, mut agent, cancel) = connect();
    let edit_mode = Arc::new(AtomicBool::new(false));
    let _dispatch =
        spawn_permission_dispatch(incoming_rx, Arc::clone(&router), edit_mode, cancel.clone());

    agent.send(&permission_request(999)).await;

    let reply = agent.recv().await;
    assert_eq!(reply["id"], 999);
    assert_eq!(reply["result"]["outcome"]["optionId"], "R");
}

/// Toggling the flag between requests changes the next decision; the
/// policy reads the flag at arrival time.
#[tokio::test]
async fn flag_toggle_applies_to_next_request() {
    let (router, incoming_rx, mut agent, cancel) = connect();
    let edit_mode = Arc::new(AtomicBool::new(true));
    let _dispatch = spawn_permission_dispatch(
        incoming_rx,
        Arc::clone(&router),
        Arc::clone(&edit_mode),
        cancel.clone(),
    );

    agent.send(&permission_request(1)).await;
    let first = agent.recv().await;
    assert_eq!(first["result"]["outcome"]["optionId"], "A");

    edit_mode.store(false, Ordering::Relaxed);
    agent.send(&permission_request(2)).await;
    let second = agent.recv().await;
    assert_eq!(second["result"]["outcome"]["optionId"], "R");
}

/// An unknown incoming method receives an empty-object result so the
/// agent does not stall.
#[tokio::test]
async fn unknown_incoming_method_gets_empty_object() {
    let (router, incoming_rx, mut agent, cancel) = connect();
    let edit_mode = Arc::new(AtomicBool::new(true));
    let _dispatch =
        spawn_permission_dispatch(incoming_rx, Arc::clone(&router), edit_mode, cancel.clone());

    agent
        .send(&serde_json::json!({
            "jsonrpc": "2.0",
            "id": 41,
            "method": "kiro.dev/unsupported/thing",
            "params": {"x": 1},
        }))
        .await;

    let reply = agent.recv().await;
    assert_eq!(
        reply,
        serde_json::json!({"jsonrpc": "2.0", "id": 41, "result": {}})
    );
}

/// Malformed permission params still produce a decision (the literal
/// fallback) rather than an error or silence.
#[tokio::test]
async fn malformed_params_fall_back_to_literal() {
    let (router, incoming_rx, mut agent, cancel) = connect();
    let edit_mode = Arc::new(AtomicBool::new(true));
    let _dispatch =
        spawn_permission_dispatch(incoming_rx, Arc::clone(&router), edit_mode, cancel.clone());

    agent
        .send(&serde_json::json!({
            "jsonrpc": "2.0",
            "id": 7,
            "method": "session/request_permission",
            "params": "not an object",
        }))
        .await;

    let reply = agent.recv().await;
    assert_eq!(reply["result"]["outcome"]["optionId"], "allow_once");
}
