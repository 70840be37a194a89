//! Public client facade.
//!
//! [`AcpClient`] is the one type the surrounding service talks to. It
//! owns at most one agent connection at a time, spawning on demand and
//! re-spawning after a crash or disposal. Many callers may share one
//! client; coordination happens through the router's futures and the
//! session manager's setup mutex, never through caller-visible locks.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::acp::permissions::spawn_permission_dispatch;
use crate::acp::protocol::{CommandEntry, ModelsInfo, ModesInfo};
use crate::acp::router::{spawn_reader, Router};
use crate::acp::session::{spawn_state_tracker, SessionManager};
use crate::acp::spawner::{monitor_exit, spawn_agent};
use crate::acp::turn::{assemble_prompt, cancel_turn, start_turn, ChatRequest, TurnEvent};
use crate::config::ClientConfig;
use crate::persistence::SessionStore;
use crate::{AcpError, Result};

/// Ceiling on the graceful `shutdown` exchange during disposal.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// Most recent context-usage reading.
#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
pub struct ContextUsage {
    /// Percent of the context window in use.
    pub percentage: f64,
}

/// Outcome of [`AcpClient::test_connection`].
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStatus {
    /// Whether spawn + `initialize` succeeded.
    pub ok: bool,
    /// Currently selected model, when a session already exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Failure description when `ok` is false.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// One live agent connection.
struct Connection {
    router: Arc<Router>,
    cancel: CancellationToken,
}

/// Long-lived ACP client over a spawned `kiro-cli acp` process.
pub struct AcpClient {
    config: ClientConfig,
    edit_mode: Arc<AtomicBool>,
    manager: Arc<SessionManager>,
    conn: Arc<Mutex<Option<Connection>>>,
    disposing: AtomicBool,
}

impl AcpClient {
    /// Create a client; no process is spawned until first use.
    #[must_use]
    pub fn new(config: ClientConfig) -> Self {
        let store = SessionStore::new(config.session_file());
        let manager = Arc::new(SessionManager::new(store, config.cwd.clone()));
        let edit_mode = Arc::new(AtomicBool::new(config.edit_mode));
        Self {
            config,
            edit_mode,
            manager,
            conn: Arc::new(Mutex::new(None)),
            disposing: AtomicBool::new(false),
        }
    }

    // ── Edit mode ────────────────────────────────────────────────────────────

    /// Whether file-editing tool calls are auto-approved.
    #[must_use]
    pub fn edit_mode(&self) -> bool {
        self.edit_mode.load(Ordering::Relaxed)
    }

    /// Toggle auto-approval of file-editing tool calls.
    ///
    /// Takes effect for the next permission request; no locking is
    /// needed because the policy reads a single scalar.
    pub fn set_edit_mode(&self, enabled: bool) {
        self.edit_mode.store(enabled, Ordering::Relaxed);
    }

    /// Whether a live agent connection is currently attached.
    pub async fn is_connected(&self) -> bool {
        self.conn.lock().await.is_some()
    }

    // ── Turns ────────────────────────────────────────────────────────────────

    /// Run one turn and stream its events.
    ///
    /// The returned receiver yields events in agent order and always
    /// terminates with exactly one `Done` or `Error`.
    ///
    /// # Errors
    ///
    /// Fails when the agent cannot be spawned or the session cannot be
    /// established. Failures after that point arrive as an `Error`
    /// event in the stream instead.
    pub async fn chat_stream(&self, request: ChatRequest) -> Result<mpsc::Receiver<TurnEvent>> {
        let router = self.ensure_connection().await?;
        let session_id = self.manager.ensure_session(&router).await?;
        let prompt = assemble_prompt(&request);
        Ok(start_turn(
            router,
            Arc::clone(&self.manager),
            session_id,
            prompt,
        ))
    }

    /// Run one turn and collect its tokens into a string.
    ///
    /// # Errors
    ///
    /// Propagates `chat_stream` failures; an `Error` event in the
    /// stream is re-raised as [`AcpError::Agent`].
    pub async fn chat(&self, request: ChatRequest) -> Result<String> {
        let mut events = self.chat_stream(request).await?;
        let mut text = String::new();
        while let Some(event) = events.recv().await {
            match event {
                TurnEvent::Token { text: chunk } => text.push_str(&chunk),
                TurnEvent::Error { message } => return Err(AcpError::Agent(message)),
                TurnEvent::Done => break,
                _ => {}
            }
        }
        Ok(text)
    }

    /// Ask the agent to stop generating. Best-effort.
    ///
    /// Sends nothing when no session is established; failures are
    /// logged and swallowed. The caller's event stream is untouched —
    /// the agent concludes the turn on its own.
    pub async fn cancel(&self) {
        let Some(session_id) = self.manager.session_id().await else {
            debug!("cancel: no active session, nothing to send");
            return;
        };
        let router = {
            let slot = self.conn.lock().await;
            slot.as_ref().map(|conn| Arc::clone(&conn.router))
        };
        let Some(router) = router else {
            debug!("cancel: no live connection, nothing to send");
            return;
        };
        cancel_turn(&router, &session_id).await;
    }

    // ── Session surface ──────────────────────────────────────────────────────

    /// Drop the current session (in memory and on disk) while keeping
    /// the agent process alive. The next turn establishes a fresh one.
    pub async fn reset_session(&self) {
        self.manager.reset().await;
    }

    /// Model catalog, establishing a session if needed.
    ///
    /// # Errors
    ///
    /// Fails when spawn or session establishment fails.
    pub async fn get_models(&self) -> Result<Option<ModelsInfo>> {
        let router = self.ensure_connection().await?;
        self.manager.ensure_session(&router).await?;
        Ok(self.manager.models().await)
    }

    /// Select a model by identifier.
    ///
    /// # Errors
    ///
    /// Propagates agent and transport failures.
    pub async fn set_model(&self, model_id: &str) -> Result<()> {
        let router = self.ensure_connection().await?;
        self.manager.set_model(&router, model_id).await
    }

    /// Mode catalog, establishing a session if needed.
    ///
    /// # Errors
    ///
    /// Fails when spawn or session establishment fails.
    pub async fn get_modes(&self) -> Result<Option<ModesInfo>> {
        let router = self.ensure_connection().await?;
        self.manager.ensure_session(&router).await?;
        Ok(self.manager.modes().await)
    }

    /// Select a mode by identifier.
    ///
    /// # Errors
    ///
    /// Propagates agent and transport failures.
    pub async fn set_mode(&self, mode_id: &str) -> Result<()> {
        let router = self.ensure_connection().await?;
        self.manager.set_mode(&router, mode_id).await
    }

    /// Slash-command catalog; agents without one read as empty.
    ///
    /// # Errors
    ///
    /// Propagates transport failures (not "method not found").
    pub async fn get_commands(&self) -> Result<Vec<CommandEntry>> {
        let router = self.ensure_connection().await?;
        self.manager.commands(&router).await
    }

    /// Run a slash command on the current session.
    ///
    /// # Errors
    ///
    /// Propagates agent and transport failures.
    pub async fn execute_command(&self, command: &str) -> Result<()> {
        let router = self.ensure_connection().await?;
        self.manager.execute_command(&router, command).await
    }

    /// Most recent context-usage reading, from any carrier.
    pub async fn get_context_usage(&self) -> Option<ContextUsage> {
        self.manager
            .context_usage()
            .await
            .map(|percentage| ContextUsage { percentage })
    }

    /// Whether the agent reported an in-progress compaction.
    pub async fn is_compacting(&self) -> bool {
        self.manager.is_compacting().await
    }

    /// Spawn + `initialize` only; never establishes a session.
    pub async fn test_connection(&self) -> ConnectionStatus {
        let attempt: Result<()> = async {
            let router = self.ensure_connection().await?;
            self.manager.ensure_initialized(&router).await
        }
        .await;

        match attempt {
            Ok(()) => ConnectionStatus {
                ok: true,
                model: self
                    .manager
                    .models()
                    .await
                    .map(|models| models.current_model_id),
                error: None,
            },
            Err(err) => ConnectionStatus {
                ok: false,
                model: None,
                error: Some(err.to_string()),
            },
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────────────────

    /// Tear down the agent connection.
    ///
    /// Sends `shutdown` with a 2-second ceiling, terminates the process
    /// regardless of the outcome, fails every pending request, and
    /// clears session state. Idempotent; a later call re-spawns.
    pub async fn dispose(&self) {
        self.disposing.store(true, Ordering::SeqCst);

        let taken = self.conn.lock().await.take();
        if let Some(conn) = taken {
            info!("dispose: shutting down agent connection");
            match tokio::time::timeout(
                SHUTDOWN_TIMEOUT,
                conn.router.request("shutdown", serde_json::json!({})),
            )
            .await
            {
                Ok(Ok(_)) => debug!("dispose: agent acknowledged shutdown"),
                Ok(Err(err)) => debug!(error = %err, "dispose: shutdown request failed"),
                Err(_elapsed) => debug!("dispose: shutdown timed out, terminating"),
            }

            // Cancelling drops the child in the exit monitor; kill_on_drop
            // terminates the process.
            conn.cancel.cancel();
            conn.router
                .shut_down(&AcpError::ProcessExited(
                    "client disposed: agent terminated".into(),
                ))
                .await;
        }

        self.manager.clear_for_new_connection().await;
        self.disposing.store(false, Ordering::SeqCst);
    }

    /// Return the live router, spawning a fresh agent when none exists.
    async fn ensure_connection(&self) -> Result<Arc<Router>> {
        if self.disposing.load(Ordering::SeqCst) {
            return Err(AcpError::Disposed("client is disposing".into()));
        }

        let mut slot = self.conn.lock().await;
        if let Some(conn) = slot.as_ref() {
            return Ok(Arc::clone(&conn.router));
        }

        let agent = spawn_agent(&self.config).await?;
        let cancel = CancellationToken::new();
        let (router, incoming_rx) = Router::new(agent.stdin);

        let _reader = spawn_reader(Arc::clone(&router), agent.stdout, cancel.child_token());
        let _dispatch = spawn_permission_dispatch(
            incoming_rx,
            Arc::clone(&router),
            Arc::clone(&self.edit_mode),
            cancel.child_token(),
        );

        let (_tracker_id, tracker_rx) = router.subscribe().await;
        let _tracker =
            spawn_state_tracker(tracker_rx, Arc::clone(&self.manager), cancel.child_token());

        let (exit_tx, exit_rx) = oneshot::channel();
        let _monitor = monitor_exit(agent.child, exit_tx, cancel.child_token());
        spawn_exit_watcher(
            exit_rx,
            Arc::clone(&self.conn),
            Arc::clone(&self.manager),
            Arc::clone(&router),
        );

        *slot = Some(Connection {
            router: Arc::clone(&router),
            cancel,
        });
        Ok(router)
    }
}

/// Watch for process exit and run the full connection cleanup.
///
/// Cleanup only fires for the connection that actually died: if a
/// replacement is already in the slot (or disposal emptied it), the
/// exit notice is stale and ignored.
fn spawn_exit_watcher(
    exit_rx: oneshot::Receiver<String>,
    conn_slot: Arc<Mutex<Option<Connection>>>,
    manager: Arc<SessionManager>,
    router: Arc<Router>,
) {
    tokio::spawn(async move {
        let Ok(reason) = exit_rx.await else {
            // Monitor cancelled — disposal owns cleanup.
            return;
        };

        let taken = {
            let mut slot = conn_slot.lock().await;
            match slot.as_ref() {
                Some(conn) if Arc::ptr_eq(&conn.router, &router) => slot.take(),
                _ => None,
            }
        };

        let Some(conn) = taken else {
            debug!(reason = reason.as_str(), "exit watcher: stale exit notice, ignoring");
            return;
        };

        warn!(reason = reason.as_str(), "exit watcher: agent connection lost, cleaning up");
        conn.cancel.cancel();
        conn.router
            .shut_down(&AcpError::ProcessExited(reason))
            .await;
        manager.clear_for_new_connection().await;
    });
}
