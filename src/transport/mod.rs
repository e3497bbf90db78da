//! Ownership and lifecycle of the single connection shared by all subscribers.
//!
//! One [`ConnectionManager`] owns the physical socket. Consumers hold
//! reference-counted [`ConnectionHandle`]s; the socket is torn down when the
//! last holder releases its claim. Connection failures are never thrown to
//! callers, they are observable only through the boolean status stream.

pub mod connector;

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use tokio::sync::{Mutex, broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval, sleep};
use tracing::{debug, info, warn};

use crate::{config::SyncConfig, dto::ws::ClientFrame, error::TransportError};

use self::connector::{Connector, WireCommand, WireSession};

/// Connection lifecycle as observed by the rest of the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection and none being built.
    Disconnected,
    /// A handshake is in progress.
    Connecting,
    /// The session handshake has completed.
    Connected,
    /// The last connection attempt failed; a retry is pending.
    Failed,
}

struct RunTask {
    handle: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

/// Owns the physical connection and its heartbeat/reconnect loop.
pub struct ConnectionManager {
    config: SyncConfig,
    connector: Arc<dyn Connector>,
    state: watch::Sender<ConnectionState>,
    status: watch::Sender<bool>,
    frames: broadcast::Sender<String>,
    session: Mutex<Option<mpsc::UnboundedSender<WireCommand>>>,
    task: Mutex<Option<RunTask>>,
    holders: AtomicUsize,
}

impl ConnectionManager {
    /// Build a manager around the given connector. Nothing connects until
    /// [`ConnectionManager::connect`] is called.
    pub fn new(config: SyncConfig, connector: Arc<dyn Connector>) -> Arc<Self> {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (status_tx, _) = watch::channel(false);
        let (frames_tx, _) = broadcast::channel(config.frame_capacity);
        Arc::new(Self {
            config,
            connector,
            state: state_tx,
            status: status_tx,
            frames: frames_tx,
            session: Mutex::new(None),
            task: Mutex::new(None),
            holders: AtomicUsize::new(0),
        })
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Configuration this manager was built with.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Boolean connection-status stream, true only while a session handshake
    /// has completed. This is the single source of truth other components
    /// await before issuing work.
    pub fn status(&self) -> watch::Receiver<bool> {
        self.status.subscribe()
    }

    /// Hub of raw inbound text frames.
    pub fn frames(&self) -> broadcast::Receiver<String> {
        self.frames.subscribe()
    }

    /// Acquire a reference-counted claim on the shared connection.
    pub fn acquire(self: &Arc<Self>) -> ConnectionHandle {
        self.holders.fetch_add(1, Ordering::SeqCst);
        ConnectionHandle {
            manager: Arc::clone(self),
            released: false,
        }
    }

    /// Start the connection loop. No-op while already Connected or
    /// Connecting; a previous loop in a non-active state is torn down first
    /// so the new one builds fresh infrastructure.
    pub async fn connect(self: &Arc<Self>) {
        let mut slot = self.task.lock().await;
        if matches!(
            self.state(),
            ConnectionState::Connected | ConnectionState::Connecting
        ) {
            debug!("connect requested while already active");
            return;
        }
        if let Some(stale) = slot.take() {
            let _ = stale.shutdown.send(true);
            stale.handle.abort();
        }

        self.set_state(ConnectionState::Connecting);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(Arc::clone(self).run(shutdown_rx));
        *slot = Some(RunTask {
            handle,
            shutdown: shutdown_tx,
        });
    }

    /// Tear the connection down unconditionally and release the underlying
    /// infrastructure, so a later [`ConnectionManager::connect`] starts fresh.
    pub async fn disconnect(&self) {
        let mut slot = self.task.lock().await;
        if let Some(task) = slot.take() {
            let _ = task.shutdown.send(true);
            task.handle.abort();
        }
        *self.session.lock().await = None;
        self.set_state(ConnectionState::Disconnected);
        info!("disconnected");
    }

    /// Serialize and send a frame over the live session.
    pub async fn send(&self, frame: &ClientFrame) -> Result<(), TransportError> {
        let guard = self.session.lock().await;
        let Some(outbound) = guard.as_ref() else {
            return Err(TransportError::NotConnected);
        };
        let payload =
            serde_json::to_string(frame).map_err(|err| TransportError::Encode(err.to_string()))?;
        outbound
            .send(WireCommand::Frame(payload))
            .map_err(|_| TransportError::Closed)
    }

    async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        loop {
            self.set_state(ConnectionState::Connecting);
            match self.connector.connect(&self.config.ws_url).await {
                Ok(session) => {
                    *self.session.lock().await = Some(session.outbound.clone());
                    self.set_state(ConnectionState::Connected);
                    info!(url = %self.config.ws_url, "connection established");
                    self.pump(session, &mut shutdown).await;
                    *self.session.lock().await = None;
                    self.set_state(ConnectionState::Disconnected);
                }
                Err(err) => {
                    warn!(error = %err, "connection attempt failed");
                    self.set_state(ConnectionState::Failed);
                }
            }

            if *shutdown.borrow() {
                return;
            }
            tokio::select! {
                _ = sleep(self.config.reconnect_delay) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }

    /// Drive one established session until it ends or shutdown is requested.
    async fn pump(&self, mut session: WireSession, shutdown: &mut watch::Receiver<bool>) {
        let mut heartbeat = interval(self.config.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        let _ = session.outbound.send(WireCommand::Close);
                        return;
                    }
                }
                _ = heartbeat.tick() => {
                    if session.outbound.send(WireCommand::Ping).is_err() {
                        warn!("writer side of the connection is gone");
                        return;
                    }
                }
                frame = session.inbound.recv() => match frame {
                    Some(text) => {
                        let _ = self.frames.send(text);
                    }
                    None => {
                        info!("connection closed by peer");
                        return;
                    }
                },
            }
        }
    }

    fn set_state(&self, next: ConnectionState) {
        self.state.send_if_modified(|current| {
            if *current == next {
                false
            } else {
                *current = next;
                true
            }
        });
        let connected = next == ConnectionState::Connected;
        self.status.send_if_modified(|current| {
            if *current == connected {
                false
            } else {
                *current = connected;
                true
            }
        });
    }

    /// Returns true when the caller was the last holder.
    fn release_holder(&self) -> bool {
        self.holders.fetch_sub(1, Ordering::SeqCst) == 1
    }
}

/// Reference-counted claim on the shared connection.
///
/// The physical connection is torn down when the last holder releases its
/// claim; a holder's teardown never disconnects siblings still using it.
pub struct ConnectionHandle {
    manager: Arc<ConnectionManager>,
    released: bool,
}

impl ConnectionHandle {
    /// The manager this handle shares.
    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    /// Release the claim, disconnecting if this was the last holder.
    pub async fn release(mut self) {
        self.released = true;
        if self.manager.release_holder() {
            self.manager.disconnect().await;
        }
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if self.manager.release_holder() {
            let manager = Arc::clone(&self.manager);
            if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                runtime.spawn(async move { manager.disconnect().await });
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::testing::FakeConnector;
    use super::*;

    fn test_config() -> SyncConfig {
        SyncConfig::default()
    }

    async fn connected_manager() -> (Arc<ConnectionManager>, Arc<FakeConnector>) {
        let connector = Arc::new(FakeConnector::default());
        let manager = ConnectionManager::new(test_config(), Arc::clone(&connector) as Arc<_>);
        manager.connect().await;
        let mut status = manager.status();
        status.wait_for(|connected| *connected).await.unwrap();
        (manager, connector)
    }

    #[tokio::test(start_paused = true)]
    async fn connect_is_idempotent_while_active() {
        let (manager, connector) = connected_manager().await;
        manager.connect().await;
        manager.connect().await;
        tokio::task::yield_now().await;
        assert_eq!(connector.dials(), 1);
        assert_eq!(manager.state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn status_flips_false_when_peer_closes() {
        let (manager, connector) = connected_manager().await;
        let remote = connector.take_remote();
        drop(remote.to_client);

        let mut status = manager.status();
        status.wait_for(|connected| !connected).await.unwrap();
        assert!(!*manager.status().borrow());
    }

    #[tokio::test(start_paused = true)]
    async fn reconnects_after_fixed_delay() {
        let (manager, connector) = connected_manager().await;
        let remote = connector.take_remote();
        drop(remote.to_client);

        let mut status = manager.status();
        status.wait_for(|connected| !connected).await.unwrap();
        // Paused time auto-advances through the 5s reconnect delay.
        status.wait_for(|connected| *connected).await.unwrap();
        assert_eq!(connector.dials(), 2);
        assert_eq!(manager.state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_pings_flow_to_the_wire() {
        let (_manager, connector) = connected_manager().await;
        let mut remote = connector.take_remote();
        let command = remote.from_client.recv().await.unwrap();
        assert_eq!(command, WireCommand::Ping);
    }

    #[tokio::test(start_paused = true)]
    async fn inbound_frames_reach_the_hub() {
        let (manager, connector) = connected_manager().await;
        let mut frames = manager.frames();
        let remote = connector.take_remote();
        remote.to_client.send("{\"hello\":true}".into()).unwrap();
        assert_eq!(frames.recv().await.unwrap(), "{\"hello\":true}");
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_tears_down_and_allows_fresh_connect() {
        let (manager, connector) = connected_manager().await;
        manager.disconnect().await;
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(!*manager.status().borrow());

        manager.connect().await;
        let mut status = manager.status();
        status.wait_for(|connected| *connected).await.unwrap();
        assert_eq!(connector.dials(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn send_without_session_reports_not_connected() {
        let connector = Arc::new(FakeConnector::default());
        let manager = ConnectionManager::new(test_config(), connector as Arc<_>);
        let result = manager
            .send(&ClientFrame::Subscribe {
                topic: "game/g1/state".into(),
            })
            .await;
        assert!(matches!(result, Err(TransportError::NotConnected)));
    }

    #[tokio::test(start_paused = true)]
    async fn last_handle_release_disconnects() {
        let (manager, _connector) = connected_manager().await;
        let first = manager.acquire();
        let second = manager.acquire();

        first.release().await;
        assert_eq!(manager.state(), ConnectionState::Connected);

        second.release().await;
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_handle_releases_its_claim() {
        let (manager, _connector) = connected_manager().await;
        let first = manager.acquire();
        let second = manager.acquire();

        drop(first);
        tokio::task::yield_now().await;
        assert_eq!(manager.state(), ConnectionState::Connected);

        drop(second);
        // The drop path spawns the disconnect; give it a turn to run.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }
}
