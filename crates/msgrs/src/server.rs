use crate::config::ServerConfig;
use crate::connection::handle_connection;
use crate::error::MsgrsError;
use crate::registry::Registry;
use crate::storage::Storage;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// Shared state for the chat server.
pub struct ServerState {
    /// Account-name → session routing table.
    pub registry: Registry,
    /// User/contact/stats store.
    pub storage: Arc<dyn Storage>,
    /// Runtime server configuration.
    pub config: ServerConfig,
    /// Atomic counter for live connections (admission guard).
    pub active_connections: AtomicUsize,
    /// Observer channel for the `205` refresh-lists notice.
    lists_changed: broadcast::Sender<()>,
}

impl ServerState {
    /// Assemble the server state around a storage adapter.
    #[must_use]
    pub fn new(config: ServerConfig, storage: Arc<dyn Storage>) -> Self {
        let (lists_changed, _) = broadcast::channel(16);
        Self {
            registry: Registry::new(),
            storage,
            config,
            active_connections: AtomicUsize::new(0),
            lists_changed,
        }
    }

    /// Push a `205` refresh-lists notice to every admitted session.
    ///
    /// This is the hook for administrative surfaces that change the user
    /// base out of band; connected clients re-pull their lists on receipt.
    pub fn broadcast_lists_changed(&self) {
        // Send fails only when no session is subscribed; nothing to do.
        let _ = self.lists_changed.send(());
    }

    pub(crate) fn subscribe_lists_changed(&self) -> broadcast::Receiver<()> {
        self.lists_changed.subscribe()
    }

    /// Snapshot of the account names currently online.
    #[must_use]
    pub fn online_users(&self) -> Vec<String> {
        self.registry.all().into_iter().map(|(name, _)| name).collect()
    }
}

struct ConnGuard {
    state: Arc<ServerState>,
}

impl Drop for ConnGuard {
    fn drop(&mut self) {
        self.state.active_connections.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Run the accept loop until the listener fails.
///
/// # Errors
///
/// Returns an error if the accept loop encounters an I/O failure.
pub async fn run(listener: TcpListener, state: Arc<ServerState>) -> Result<(), MsgrsError> {
    let (shutdown_tx, _) = tokio::sync::watch::channel(());
    run_with_shutdown(listener, state, shutdown_tx).await
}

/// Run the accept loop with an externally-controlled shutdown signal.
///
/// When the `shutdown_tx` sender is dropped, the loop stops accepting new
/// connections and waits briefly for in-flight sessions to finish; sockets
/// still open after the drain window are simply closed.
///
/// # Errors
///
/// Returns an error if the accept loop encounters an I/O failure.
pub async fn run_with_shutdown(
    listener: TcpListener,
    state: Arc<ServerState>,
    shutdown_tx: tokio::sync::watch::Sender<()>,
) -> Result<(), MsgrsError> {
    let local_addr = listener.local_addr().map_err(MsgrsError::Io)?;
    info!("server listening on {}", local_addr);
    let mut shutdown_rx = shutdown_tx.subscribe();
    let task_tracker = Arc::new(tokio::sync::Notify::new());
    let mut active_tasks: usize = 0;

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        if state.active_connections.load(Ordering::Relaxed) >= state.config.max_conns {
                            warn!("max connections reached, rejecting {}", addr);
                            drop(stream);
                            continue;
                        }
                        state.active_connections.fetch_add(1, Ordering::Relaxed);
                        let state = Arc::clone(&state);
                        let tracker = task_tracker.clone();
                        active_tasks += 1;
                        tokio::spawn(async move {
                            let _guard = ConnGuard { state: Arc::clone(&state) };
                            if let Err(e) = handle_connection(stream, addr, state).await {
                                tracing::debug!("connection from {} closed: {}", addr, e);
                            }
                            tracker.notify_one();
                        });
                    }
                    Err(e) => {
                        error!("failed to accept connection: {}", e);
                    }
                }
            }
            _ = shutdown_rx.changed() => {
                info!("shutdown signal received, draining {} connections", active_tasks);
                break;
            }
        }
    }

    // Wait for in-flight sessions to finish (with timeout)
    let drain_timeout = std::time::Duration::from_secs(30);
    let deadline = tokio::time::Instant::now() + drain_timeout;
    while active_tasks > 0 {
        if tokio::time::timeout_at(deadline, task_tracker.notified())
            .await
            .is_err()
        {
            warn!(
                "drain timeout reached with {} connections still active",
                active_tasks
            );
            break;
        }
        active_tasks = active_tasks.saturating_sub(1);
    }

    info!("server shut down gracefully");
    Ok(())
}
