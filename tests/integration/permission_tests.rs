//! Auto-approval and auto-rejection of tool-permission requests,
//! verified against the exact frames the agent receives.

use ghostwriter_acp::AcpClient;

use super::stub_agent::{prompt, LoadBehavior, StubAgent};

/// With edits allowed, the agent receives exactly the allow selection.
#[tokio::test]
async fn edits_allowed_sends_allow_selection() {
    let stub = StubAgent::new(LoadBehavior::Fail);
    let mut config = stub.config();
    config.edit_mode = true;
    let client = AcpClient::new(config);

    let _reply = client
        .chat(prompt("please PERMISSION check"))
        .await
        .expect("turn with permission round-trip");

    let decisions: Vec<_> = stub
        .captured_frames()
        .into_iter()
        .filter(|frame| frame["id"] == 999 && frame.get("result").is_some())
        .collect();
    assert_eq!(decisions.len(), 1, "exactly one decision: {decisions:?}");
    assert_eq!(
        decisions[0],
        serde_json::json!({
            "jsonrpc": "2.0",
            "id": 999,
            "result": {"outcome": {"outcome": "selected", "optionId": "A"}},
        })
    );

    client.dispose().await;
}

/// With edits disallowed, the same exchange selects the reject option.
#[tokio::test]
async fn edits_disallowed_sends_reject_selection() {
    let stub = StubAgent::new(LoadBehavior::Fail);
    let client = AcpClient::new(stub.config());
    assert!(!client.edit_mode(), "edit mode defaults to off");

    let _reply = client
        .chat(prompt("please PERMISSION check"))
        .await
        .expect("turn with permission round-trip");

    let decisions: Vec<_> = stub
        .captured_frames()
        .into_iter()
        .filter(|frame| frame["id"] == 999 && frame.get("result").is_some())
        .collect();
    assert_eq!(decisions.len(), 1);
    assert_eq!(decisions[0]["result"]["outcome"]["optionId"], "R");

    client.dispose().await;
}

/// The flag is read at request arrival: toggling between turns flips
/// the decision without restarting anything.
#[tokio::test]
async fn runtime_toggle_changes_next_decision() {
    let stub = StubAgent::new(LoadBehavior::Fail);
    let mut config = stub.config();
    config.edit_mode = true;
    let client = AcpClient::new(config);

    let _reply = client.chat(prompt("first PERMISSION")).await.expect("first turn");
    client.set_edit_mode(false);
    let _reply = client.chat(prompt("second PERMISSION")).await.expect("second turn");

    let decisions: Vec<_> = stub
        .captured_frames()
        .into_iter()
        .filter(|frame| frame["id"] == 999 && frame.get("result").is_some())
        .map(|frame| frame["result"]["outcome"]["optionId"].clone())
        .collect();
    assert_eq!(
        decisions,
        vec![serde_json::json!("A"), serde_json::json!("R")],
        "decisions must follow the flag at arrival time"
    );

    client.dispose().await;
}
