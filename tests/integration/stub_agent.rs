//! A scripted agent process for wire-level client tests.
//!
//! The stub is a POSIX shell script that reads newline-delimited
//! JSON-RPC frames on stdin, appends every received line to a capture
//! file, and answers from a fixed playbook. Prompt text acts as the
//! test's remote control: markers like `TOOLS` or `HANG` select the
//! scripted behavior for that turn.

use std::os::unix::fs::PermissionsExt;
use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use ghostwriter_acp::{ChatMessage, ChatRequest, ClientConfig, Role};

/// How the stub answers `session/load`.
#[derive(Debug, Clone, Copy)]
pub enum LoadBehavior {
    /// Reply with an error, forcing the client to fall back to
    /// `session/new`.
    Fail,
    /// Reply with a resumed session whose model catalog is
    /// distinguishable from the freshly created one.
    Succeed,
}

/// A stub agent on disk plus the client configuration pointing at it.
pub struct StubAgent {
    dir: tempfile::TempDir,
    script: PathBuf,
}

const SCRIPT_TEMPLATE: &str = r#"#!/bin/sh
# Scripted ACP agent for integration tests.
CAPTURE="__CAPTURE__"
: > "$CAPTURE"
while IFS= read -r line; do
  printf '%s\n' "$line" >> "$CAPTURE"
  id=${line##*\"id\":}
  id=${id%%[!0-9]*}
  case $line in
    *'"method":"initialize"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":"1.0"}}\n' "$id" ;;
    *'"method":"session/load"'*)
      __LOAD_BEHAVIOR__ ;;
    *'"method":"session/new"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"sessionId":"stub-session","models":{"availableModels":[{"modelId":"kiro-fast","name":"Kiro Fast"}],"currentModelId":"kiro-fast"},"modes":{"availableModes":[{"id":"write","name":"Write"}],"currentModeId":"write"}}}\n' "$id" ;;
    *'"method":"session/prompt"'*HANG*)
      : ;;
    *'"method":"session/prompt"'*PERMISSION*)
      printf '{"jsonrpc":"2.0","id":999,"method":"session/request_permission","params":{"toolCall":{"title":"Write /tmp/draft.md"},"options":[{"kind":"allow_once","optionId":"A"},{"kind":"reject_once","optionId":"R"}]}}\n'
      IFS= read -r decision
      printf '%s\n' "$decision" >> "$CAPTURE"
      printf '{"jsonrpc":"2.0","id":%s,"result":{"stopReason":"end_turn"}}\n' "$id" ;;
    *'"method":"session/prompt"'*TOOLS*)
      printf '{"jsonrpc":"2.0","method":"session/update","params":{"sessionId":"stub-session","update":{"sessionUpdate":"tool_call","toolCallId":"t1","title":"Editing README.md","kind":"edit"}}}\n'
      printf '{"jsonrpc":"2.0","method":"session/update","params":{"sessionId":"stub-session","update":{"sessionUpdate":"tool_call_update","toolCallId":"t1","status":"completed","locations":[{"path":"/README.md","line":1}]}}}\n'
      printf '{"jsonrpc":"2.0","method":"session/update","params":{"sessionId":"stub-session","update":{"sessionUpdate":"tool_result","toolCallId":"t1","title":"Editing README.md"}}}\n'
      printf '{"jsonrpc":"2.0","method":"session/update","params":{"sessionId":"stub-session","update":{"sessionUpdate":"agent_message_chunk","content":{"type":"text","text":"Done."}}}}\n'
      printf '{"jsonrpc":"2.0","id":%s,"result":{"stopReason":"end_turn"}}\n' "$id" ;;
    *'"method":"session/prompt"'*METRICS*)
      printf '{"jsonrpc":"2.0","method":"kiro.dev/metadata","params":{"contextUsagePercentage":42.5}}\n'
      printf '{"jsonrpc":"2.0","method":"kiro.dev/metadata","params":{"modelId":"kiro-fast"}}\n'
      printf '{"jsonrpc":"2.0","method":"session/update","params":{"sessionId":"stub-session","update":{"sessionUpdate":"mystery_kind","x":1}}}\n'
      printf '{"jsonrpc":"2.0","method":"session/update","params":{"sessionId":"stub-session","update":{"sessionUpdate":"agent_message_chunk","content":{"type":"text","text":"ok"}}}}\n'
      printf '{"jsonrpc":"2.0","id":%s,"result":{"stopReason":"end_turn","contextUsage":{"percentage":55.0}}}\n' "$id" ;;
    *'"method":"session/prompt"'*COMPACT*)
      printf '{"jsonrpc":"2.0","method":"_kiro.dev/compaction/status","params":{"status":"in_progress"}}\n'
      printf '{"jsonrpc":"2.0","method":"session/update","params":{"sessionId":"stub-session","update":{"sessionUpdate":"agent_message_chunk","content":{"type":"text","text":"compacted"}}}}\n'
      printf '{"jsonrpc":"2.0","method":"_kiro.dev/compaction/status","params":{"status":"completed"}}\n'
      printf '{"jsonrpc":"2.0","id":%s,"result":{"stopReason":"end_turn"}}\n' "$id" ;;
    *'"method":"session/prompt"'*)
      printf '{"jsonrpc":"2.0","method":"session/update","params":{"sessionId":"stub-session","update":{"sessionUpdate":"agent_message_chunk","content":{"type":"text","text":"Hello from stub"}}}}\n'
      printf '{"jsonrpc":"2.0","id":%s,"result":{"stopReason":"end_turn"}}\n' "$id" ;;
    *'"method":"session/cancel"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{}}\n' "$id" ;;
    *'"method":"session/set_model"'*|*'"method":"session/set_mode"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{}}\n' "$id" ;;
    *'"method":"_kiro.dev/commands/available"'*)
      printf '{"jsonrpc":"2.0","id":%s,"error":{"code":-32601,"message":"Method not found"}}\n' "$id" ;;
    *'"method":"shutdown"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{}}\n' "$id"
      exit 0 ;;
    *)
      [ -n "$id" ] && printf '{"jsonrpc":"2.0","id":%s,"result":{}}\n' "$id" ;;
  esac
done
"#;

const LOAD_FAIL: &str = r#"printf '{"jsonrpc":"2.0","id":%s,"error":{"code":-32000,"message":"unknown session"}}\n' "$id""#;

const LOAD_SUCCEED: &str = r#"printf '{"jsonrpc":"2.0","id":%s,"result":{"sessionId":"resumed-session","models":{"availableModels":[{"modelId":"kiro-resume","name":"Kiro Resume"}],"currentModelId":"kiro-resume"}}}\n' "$id""#;

/// Route client logs to the test output when `RUST_LOG` is set.
fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

impl StubAgent {
    /// Write the stub script into a fresh temp dir.
    pub fn new(load: LoadBehavior) -> Self {
        init_logging();
        let dir = tempfile::tempdir().expect("tempdir for stub agent");
        let script = dir.path().join("stub-agent.sh");
        let capture = dir.path().join("capture.ndjson");

        let body = SCRIPT_TEMPLATE
            .replace("__CAPTURE__", &capture.to_string_lossy())
            .replace(
                "__LOAD_BEHAVIOR__",
                match load {
                    LoadBehavior::Fail => LOAD_FAIL,
                    LoadBehavior::Succeed => LOAD_SUCCEED,
                },
            );
        std::fs::write(&script, body).expect("write stub script");
        let mut perms = std::fs::metadata(&script).expect("stat stub").permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&script, perms).expect("chmod stub");

        Self { dir, script }
    }

    /// Client configuration pointing at this stub.
    pub fn config(&self) -> ClientConfig {
        let mut config = ClientConfig::new(self.dir.path());
        config.command = self.script.to_string_lossy().into_owned();
        config.args = Vec::new();
        config.state_dir = Some(self.dir.path().join("state"));
        config
    }

    /// Path of the persisted session record the client will use.
    pub fn session_file(&self) -> PathBuf {
        self.dir.path().join("state").join("acp-session.json")
    }

    /// Every frame the stub has received (and the permission decisions
    /// it read), parsed as JSON.
    pub fn captured_frames(&self) -> Vec<serde_json::Value> {
        let path = self.dir.path().join("capture.ndjson");
        let Ok(raw) = std::fs::read_to_string(path) else {
            return Vec::new();
        };
        raw.lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| serde_json::from_str(line).expect("captured lines must be JSON"))
            .collect()
    }

    /// Captured frames carrying the given method.
    pub fn frames_with_method(&self, method: &str) -> Vec<serde_json::Value> {
        self.captured_frames()
            .into_iter()
            .filter(|frame| frame["method"] == method)
            .collect()
    }

    /// Seed a persisted session record with the given age.
    pub fn seed_session_record(&self, session_id: &str, age: Duration) {
        let state_dir = self.dir.path().join("state");
        std::fs::create_dir_all(&state_dir).expect("create state dir");
        let now_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock after epoch")
            .as_millis() as i64;
        let timestamp = now_ms - age.as_millis() as i64;
        std::fs::write(
            self.session_file(),
            serde_json::json!({"sessionId": session_id, "timestamp": timestamp}).to_string(),
        )
        .expect("write session record");
    }
}

/// A one-message chat request whose text selects the stub behavior.
pub fn prompt(text: &str) -> ChatRequest {
    ChatRequest {
        messages: vec![ChatMessage {
            role: Role::User,
            content: text.to_owned(),
        }],
        ..ChatRequest::default()
    }
}

/// Poll `condition` until it holds or two seconds elapse.
pub async fn wait_for<F: FnMut() -> bool>(mut condition: F, what: &str) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("timed out waiting for: {what}");
}
