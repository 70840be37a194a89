//! Session establishment and catalog cache.
//!
//! Startup is a two-step handshake, memoized per connection:
//! `initialize`, then resume (`session/load` with the persisted
//! identifier) or create (`session/new`). Establishment is serialized
//! by a setup mutex so racing callers collapse onto a single request —
//! a warm-up, a model query, and a first prompt arriving together must
//! not create three sessions.

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::protocol::{
    ClientInfo, CommandEntry, CommandsResult, InitializeParams, ModelsInfo, ModesInfo,
    SessionLoadParams, SessionNewParams, SessionOpenResult, PROTOCOL_VERSION,
};
use super::router::Router;
use crate::persistence::SessionStore;
use crate::{AcpError, Result};

/// Name reported to the agent during `initialize`.
const CLIENT_NAME: &str = "ghostwriter";

/// In-memory session state, present only after a successful handshake.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    /// Opaque session identifier.
    pub session_id: String,
    /// Model catalog from the session-open reply.
    pub models: Option<ModelsInfo>,
    /// Mode catalog from the session-open reply.
    pub modes: Option<ModesInfo>,
    /// Most recent context-usage percentage.
    pub context_usage: Option<f64>,
    /// Whether the agent reported an in-progress compaction.
    pub compacting: bool,
    /// Slash-command catalog; `None` until first fetched or pushed.
    pub commands: Option<Vec<CommandEntry>>,
}

/// Handshake memo plus session state, guarded together.
#[derive(Debug, Default)]
struct SessionCell {
    /// Whether `initialize` has completed on the current connection.
    initialized: bool,
    session: Option<SessionState>,
}

/// Drives session setup and owns the cached catalogs.
#[derive(Debug)]
pub struct SessionManager {
    store: SessionStore,
    cwd: PathBuf,
    cell: Mutex<SessionCell>,
    setup_lock: Mutex<()>,
}

impl SessionManager {
    /// Create a manager persisting session identity through `store`.
    #[must_use]
    pub fn new(store: SessionStore, cwd: PathBuf) -> Self {
        Self {
            store,
            cwd,
            cell: Mutex::new(SessionCell::default()),
            setup_lock: Mutex::new(()),
        }
    }

    /// Current session identifier, if a session is established.
    pub async fn session_id(&self) -> Option<String> {
        self.cell
            .lock()
            .await
            .session
            .as_ref()
            .map(|s| s.session_id.clone())
    }

    /// Ensure `initialize` has run on this connection.
    ///
    /// # Errors
    ///
    /// Propagates the router error when the request fails.
    pub async fn ensure_initialized(&self, router: &Arc<Router>) -> Result<()> {
        if self.cell.lock().await.initialized {
            return Ok(());
        }
        let _guard = self.setup_lock.lock().await;
        self.initialize_locked(router).await
    }

    /// Establish a session, resuming when possible, and return its id.
    ///
    /// Resume is attempted iff a non-expired persisted identifier
    /// exists; on any resume error the record is cleared and a fresh
    /// session is created. The whole sequence runs under the setup
    /// mutex; a second caller arriving mid-establishment awaits the
    /// first caller's result instead of issuing its own requests.
    ///
    /// # Errors
    ///
    /// Propagates initialize/create failures from the router.
    pub async fn ensure_session(&self, router: &Arc<Router>) -> Result<String> {
        if let Some(id) = self.session_id().await {
            return Ok(id);
        }

        let _guard = self.setup_lock.lock().await;
        if let Some(session) = self.cell.lock().await.session.as_ref() {
            return Ok(session.session_id.clone());
        }

        self.initialize_locked(router).await?;

        // Resume first; any failure clears the record and falls through.
        if let Some(session_id) = self.store.load() {
            let params = SessionLoadParams {
                session_id: session_id.clone(),
                cwd: self.cwd.to_string_lossy().into_owned(),
                mcp_servers: Vec::new(),
            };
            let resumed = router
                .request("session/load", to_params(&params)?)
                .await
                .and_then(|reply| session_state_from_reply(reply, &session_id));
            match resumed {
                Ok(state) => {
                    let id = state.session_id.clone();
                    info!(session_id = id.as_str(), "session: resumed");
                    self.cell.lock().await.session = Some(state);
                    return Ok(id);
                }
                Err(err) => {
                    warn!(
                        session_id = session_id.as_str(),
                        error = %err,
                        "session: resume failed, creating a fresh session"
                    );
                    self.store.clear();
                }
            }
        }

        let params = SessionNewParams {
            cwd: self.cwd.to_string_lossy().into_owned(),
            mcp_servers: Vec::new(),
        };
        let reply = router.request("session/new", to_params(&params)?).await?;
        let state = session_state_from_reply(reply, "")?;
        let id = state.session_id.clone();
        if let Err(err) = self.store.save(&id) {
            warn!(error = %err, "session: failed to persist session record");
        }
        info!(session_id = id.as_str(), "session: created");
        self.cell.lock().await.session = Some(state);
        Ok(id)
    }

    /// `initialize` without re-entering the setup lock (already held).
    async fn initialize_locked(&self, router: &Arc<Router>) -> Result<()> {
        if self.cell.lock().await.initialized {
            return Ok(());
        }
        let params = InitializeParams {
            protocol_version: PROTOCOL_VERSION.to_owned(),
            client_info: ClientInfo {
                name: CLIENT_NAME.to_owned(),
                version: env!("CARGO_PKG_VERSION").to_owned(),
            },
        };
        router
            .request("initialize", to_params(&params)?)
            .await?;
        self.cell.lock().await.initialized = true;
        debug!("session: initialize complete");
        Ok(())
    }

    /// Clear in-memory session state and the persisted record.
    ///
    /// The child process stays alive; the next operation that needs a
    /// session establishes a new one.
    pub async fn reset(&self) {
        self.cell.lock().await.session = None;
        self.store.clear();
        debug!("session: reset");
    }

    /// Full cleanup after the connection died: handshake memo, session
    /// state, and the persisted record all go — a replacement process
    /// cannot reliably resume.
    pub async fn clear_for_new_connection(&self) {
        let mut cell = self.cell.lock().await;
        cell.initialized = false;
        cell.session = None;
        drop(cell);
        self.store.clear();
    }

    // ── Catalogs ─────────────────────────────────────────────────────────────

    /// Cached model catalog.
    pub async fn models(&self) -> Option<ModelsInfo> {
        self.cell
            .lock()
            .await
            .session
            .as_ref()
            .and_then(|s| s.models.clone())
    }

    /// Cached mode catalog.
    pub async fn modes(&self) -> Option<ModesInfo> {
        self.cell
            .lock()
            .await
            .session
            .as_ref()
            .and_then(|s| s.modes.clone())
    }

    /// Select a model and update the cached current identifier.
    ///
    /// # Errors
    ///
    /// Propagates the router error; the cache is untouched on failure.
    pub async fn set_model(&self, router: &Arc<Router>, model_id: &str) -> Result<()> {
        let session_id = self.ensure_session(router).await?;
        router
            .request(
                "session/set_model",
                serde_json::json!({ "sessionId": session_id, "modelId": model_id }),
            )
            .await?;
        if let Some(session) = self.cell.lock().await.session.as_mut() {
            if let Some(models) = session.models.as_mut() {
                models.current_model_id = model_id.to_owned();
            }
        }
        Ok(())
    }

    /// Select a mode and update the cached current identifier.
    ///
    /// # Errors
    ///
    /// Propagates the router error; the cache is untouched on failure.
    pub async fn set_mode(&self, router: &Arc<Router>, mode_id: &str) -> Result<()> {
        let session_id = self.ensure_session(router).await?;
        router
            .request(
                "session/set_mode",
                serde_json::json!({ "sessionId": session_id, "modeId": mode_id }),
            )
            .await?;
        if let Some(session) = self.cell.lock().await.session.as_mut() {
            if let Some(modes) = session.modes.as_mut() {
                modes.current_mode_id = mode_id.to_owned();
            }
        }
        Ok(())
    }

    /// Slash-command catalog, fetched lazily on first demand.
    ///
    /// Agents that do not implement the command surface reply "method
    /// not found"; that is cached as an empty catalog, not an error.
    ///
    /// # Errors
    ///
    /// Propagates transport-level failures (timeout, process exit).
    pub async fn commands(&self, router: &Arc<Router>) -> Result<Vec<CommandEntry>> {
        let session_id = self.ensure_session(router).await?;
        if let Some(commands) = self
            .cell
            .lock()
            .await
            .session
            .as_ref()
            .and_then(|s| s.commands.clone())
        {
            return Ok(commands);
        }

        let commands = match router
            .request(
                "_kiro.dev/commands/available",
                serde_json::json!({ "sessionId": session_id }),
            )
            .await
        {
            Ok(reply) => serde_json::from_value::<CommandsResult>(reply)
                .map(|r| r.commands)
                .unwrap_or_default(),
            Err(AcpError::Agent(message)) if is_method_not_found(&message) => {
                debug!("session: agent has no command catalog, caching empty");
                Vec::new()
            }
            Err(err) => return Err(err),
        };

        if let Some(session) = self.cell.lock().await.session.as_mut() {
            session.commands = Some(commands.clone());
        }
        Ok(commands)
    }

    /// Run a slash command on the current session.
    ///
    /// # Errors
    ///
    /// Propagates the router error.
    pub async fn execute_command(&self, router: &Arc<Router>, command: &str) -> Result<()> {
        let session_id = self.ensure_session(router).await?;
        router
            .request(
                "_kiro.dev/commands/execute",
                serde_json::json!({ "sessionId": session_id, "command": command }),
            )
            .await?;
        Ok(())
    }

    // ── Live metadata ────────────────────────────────────────────────────────

    /// Most recent context-usage percentage.
    pub async fn context_usage(&self) -> Option<f64> {
        self.cell
            .lock()
            .await
            .session
            .as_ref()
            .and_then(|s| s.context_usage)
    }

    /// Record a context-usage percentage (last writer wins).
    pub async fn record_context_usage(&self, percentage: f64) {
        if let Some(session) = self.cell.lock().await.session.as_mut() {
            session.context_usage = Some(percentage);
        }
    }

    /// Whether the agent reported an in-progress compaction.
    pub async fn is_compacting(&self) -> bool {
        self.cell
            .lock()
            .await
            .session
            .as_ref()
            .is_some_and(|s| s.compacting)
    }

    /// Record the compaction flag.
    pub async fn record_compacting(&self, compacting: bool) {
        if let Some(session) = self.cell.lock().await.session.as_mut() {
            session.compacting = compacting;
        }
    }

    /// The agent switched mode on its own; keep the catalog honest.
    pub async fn record_current_mode(&self, mode_id: &str) {
        if let Some(session) = self.cell.lock().await.session.as_mut() {
            if let Some(modes) = session.modes.as_mut() {
                modes.current_mode_id = mode_id.to_owned();
            }
        }
    }

    /// The agent pushed a fresh slash-command catalog.
    pub async fn record_commands(&self, commands: Vec<CommandEntry>) {
        if let Some(session) = self.cell.lock().await.session.as_mut() {
            session.commands = Some(commands);
        }
    }
}

/// Serialize typed request params into a JSON value.
fn to_params<T: serde::Serialize>(params: &T) -> Result<Value> {
    serde_json::to_value(params)
        .map_err(|err| AcpError::Io(format!("failed to serialize request params: {err}")))
}

/// Build session state out of a `session/new` / `session/load` reply.
///
/// `fallback_id` covers agents whose load reply omits the session id.
fn session_state_from_reply(reply: Value, fallback_id: &str) -> Result<SessionState> {
    let mut parsed: SessionOpenResult = serde_json::from_value(reply)
        .map_err(|err| AcpError::Agent(format!("malformed session reply: {err}")))?;
    if parsed.session_id.is_empty() {
        if fallback_id.is_empty() {
            return Err(AcpError::Agent("session reply carried no sessionId".into()));
        }
        parsed.session_id = fallback_id.to_owned();
    }
    Ok(SessionState {
        session_id: parsed.session_id,
        models: parsed.models,
        modes: parsed.modes,
        context_usage: None,
        compacting: false,
        commands: None,
    })
}

/// Whether an agent error message means "method not found".
fn is_method_not_found(message: &str) -> bool {
    message.to_lowercase().contains("method not found") || message.contains("-32601")
}

// ── Persistent state tracker ─────────────────────────────────────────────────

/// Spawn the persistent subscriber that keeps session state current.
///
/// Installed once per connection, right after the subscriber's channel
/// is registered: it records context usage (metadata notifications and
/// `turn_end` updates), the compaction flag, agent-initiated mode
/// switches, and pushed command catalogs. Turn streams read none of
/// this — they only emit events; the cache lives here.
#[must_use]
pub fn spawn_state_tracker(
    mut notifications: tokio::sync::mpsc::UnboundedReceiver<super::router::AgentNotification>,
    manager: Arc<SessionManager>,
    cancel: tokio_util::sync::CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;

                () = cancel.cancelled() => break,

                notification = notifications.recv() => {
                    let Some(notification) = notification else { break };
                    track_notification(&manager, &notification).await;
                }
            }
        }
    })
}

/// Apply one notification to the cached session state.
async fn track_notification(
    manager: &SessionManager,
    notification: &super::router::AgentNotification,
) {
    use super::protocol::{context_usage_percentage, SessionUpdate};

    match notification.method.as_str() {
        "session/update" => {
            let Some(update) = notification.params.get("update") else {
                return;
            };
            match SessionUpdate::from_value(update) {
                SessionUpdate::TurnEnd {
                    context_usage: Some(usage),
                } => {
                    if let Some(percentage) = context_usage_percentage(&usage) {
                        manager.record_context_usage(percentage).await;
                    }
                }
                SessionUpdate::CurrentModeUpdate { mode_id } => {
                    manager.record_current_mode(&mode_id).await;
                }
                SessionUpdate::AvailableCommandsUpdate(commands) => {
                    manager.record_commands(commands).await;
                }
                _ => {}
            }
        }
        "kiro.dev/metadata" => {
            if let Some(percentage) = notification
                .params
                .get("contextUsagePercentage")
                .and_then(Value::as_f64)
            {
                manager.record_context_usage(percentage).await;
            }
        }
        "_kiro.dev/compaction/status" => {
            let in_progress = notification
                .params
                .get("status")
                .and_then(Value::as_str)
                .is_some_and(|status| status == "in_progress");
            manager.record_compacting(in_progress).await;
        }
        _ => {}
    }
}
