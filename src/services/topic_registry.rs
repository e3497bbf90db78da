//! Topic subscription registry multiplexing the shared connection.
//!
//! The registry guarantees at most one wire subscription per topic no matter
//! how many local listeners attach, and forgets every wire subscription when
//! the connection drops. Streams end on disconnect; listeners that still care
//! re-subscribe, which announces the topic again on the fresh connection.

use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::Stream;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::{debug, warn};

use crate::dto::ws::{ClientFrame, ServerFrame, TopicMessage};
use crate::transport::{ConnectionHandle, ConnectionManager};

/// Routes inbound frames to per-topic listener channels.
pub struct TopicRegistry {
    manager: Arc<ConnectionManager>,
    topics: DashMap<String, broadcast::Sender<TopicMessage>>,
    capacity: usize,
}

impl TopicRegistry {
    /// Build a registry on top of the shared connection and start its
    /// routing tasks.
    pub fn new(manager: Arc<ConnectionManager>) -> Arc<Self> {
        let capacity = manager.config().topic_capacity;
        let registry = Arc::new(Self {
            manager,
            topics: DashMap::new(),
            capacity,
        });
        tokio::spawn(Self::route_frames(Arc::downgrade(&registry)));
        tokio::spawn(Self::watch_disconnects(Arc::downgrade(&registry)));
        registry
    }

    /// Attach a listener to a topic.
    ///
    /// The first listener for a topic announces it on the wire once the
    /// connection is up; later listeners share the existing subscription.
    /// Every stream holds its own claim on the shared connection, so a
    /// sibling consumer tearing down cannot disconnect a topic that still
    /// has listeners.
    pub fn subscribe(self: &Arc<Self>, topic: &str) -> TopicStream {
        let claim = self.manager.acquire();
        let receiver = match self.topics.entry(topic.to_owned()) {
            Entry::Occupied(entry) => entry.get().subscribe(),
            Entry::Vacant(entry) => {
                let (sender, receiver) = broadcast::channel(self.capacity);
                entry.insert(sender);
                tokio::spawn(Arc::clone(self).announce(topic.to_owned()));
                receiver
            }
        };
        TopicStream {
            topic: topic.to_owned(),
            registry: Arc::clone(self),
            inner: BroadcastStream::new(receiver),
            claim,
        }
    }

    /// Number of topics currently subscribed on the wire.
    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }

    /// Announce one topic on the wire once the connection reports Connected.
    /// The announcement is one-shot; a topic cleared by a disconnect before
    /// the connection comes up is not announced.
    ///
    /// The task holds its own connection claim for its whole lifetime, so a
    /// pending announcement can never resurrect a connection whose last
    /// holder already released it: if everything else let go meanwhile, the
    /// claim released here tears the connection down again.
    async fn announce(self: Arc<Self>, topic: String) {
        let claim = self.manager.acquire();
        self.manager.connect().await;
        let mut status = self.manager.status();
        if status.wait_for(|connected| *connected).await.is_ok()
            && self.topics.contains_key(&topic)
        {
            if let Err(err) = self
                .manager
                .send(&ClientFrame::Subscribe {
                    topic: topic.clone(),
                })
                .await
            {
                warn!(topic = %topic, error = %err, "failed to announce topic subscription, nudging reconnect");
                self.manager.connect().await;
            } else {
                debug!(topic = %topic, "topic subscribed");
            }
        }
        claim.release().await;
    }

    async fn route_frames(registry: Weak<Self>) {
        let mut frames = match registry.upgrade() {
            Some(registry) => registry.manager.frames(),
            None => return,
        };
        loop {
            match frames.recv().await {
                Ok(raw) => {
                    let Some(registry) = registry.upgrade() else {
                        return;
                    };
                    registry.dispatch(&raw);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(skipped, "frame hub lagged, inbound frames dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    }

    /// Decode one raw frame and hand it to the topic's listeners. Frames
    /// that do not decode are dropped without disturbing the stream.
    fn dispatch(&self, raw: &str) {
        match ServerFrame::from_json_str(raw).and_then(TopicMessage::decode) {
            Ok((topic, message)) => {
                if let Some(sender) = self.topics.get(&topic) {
                    let _ = sender.send(message);
                } else {
                    debug!(topic = %topic, "push for a topic without listeners");
                }
            }
            Err(err) => {
                warn!(error = %err, "dropping undecodable frame");
            }
        }
    }

    async fn watch_disconnects(registry: Weak<Self>) {
        let mut status = match registry.upgrade() {
            Some(registry) => registry.manager.status(),
            None => return,
        };
        let mut connected = *status.borrow();
        while status.changed().await.is_ok() {
            let now = *status.borrow();
            if connected && !now {
                let Some(registry) = registry.upgrade() else {
                    return;
                };
                registry.clear();
            }
            connected = now;
        }
    }

    /// Forget every wire subscription. Listener streams end as their
    /// channels close.
    fn clear(&self) {
        let count = self.topics.len();
        self.topics.clear();
        if count > 0 {
            debug!(topics = count, "connection lost, topic subscriptions dropped");
        }
    }

    /// Called when a listener detaches. The last listener for a topic tears
    /// the wire subscription down.
    fn release(self: &Arc<Self>, topic: &str) {
        let removed = self
            .topics
            .remove_if(topic, |_, sender| sender.receiver_count() <= 1)
            .is_some();
        if !removed {
            return;
        }
        let manager = Arc::clone(&self.manager);
        let topic = topic.to_owned();
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                if let Err(err) = manager
                    .send(&ClientFrame::Unsubscribe {
                        topic: topic.clone(),
                    })
                    .await
                {
                    debug!(topic = %topic, error = %err, "unsubscribe not delivered");
                } else {
                    debug!(topic = %topic, "topic unsubscribed");
                }
            });
        }
    }
}

/// Listener end of one topic subscription.
///
/// Yields decoded messages; ends when the connection drops or the registry
/// goes away. Detaching the last stream for a topic unsubscribes it on the
/// wire. Each stream counts as one holder of the shared connection; the
/// claim is released when the stream drops.
pub struct TopicStream {
    topic: String,
    registry: Arc<TopicRegistry>,
    inner: BroadcastStream<TopicMessage>,
    claim: ConnectionHandle,
}

impl TopicStream {
    /// Topic key this stream listens on.
    pub fn topic(&self) -> &str {
        &self.topic
    }
}

impl Stream for TopicStream {
    type Item = TopicMessage;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(message))) => return Poll::Ready(Some(message)),
                Poll::Ready(Some(Err(BroadcastStreamRecvError::Lagged(skipped)))) => {
                    warn!(topic = %self.topic, skipped, "topic stream lagged, messages dropped");
                }
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

impl Drop for TopicStream {
    fn drop(&mut self) {
        self.registry.release(&self.topic);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::StreamExt;

    use crate::config::SyncConfig;
    use crate::dto::ws::game_state_topic;
    use crate::transport::ConnectionState;
    use crate::transport::connector::WireCommand;
    use crate::transport::testing::{FakeConnector, FakeRemote};

    use super::*;

    async fn connected() -> (Arc<TopicRegistry>, Arc<ConnectionManager>, Arc<FakeConnector>) {
        let connector = Arc::new(FakeConnector::default());
        let manager = ConnectionManager::new(SyncConfig::default(), Arc::clone(&connector) as Arc<_>);
        manager.connect().await;
        let mut status = manager.status();
        status.wait_for(|up| *up).await.unwrap();
        let registry = TopicRegistry::new(Arc::clone(&manager));
        (registry, manager, connector)
    }

    /// Drain every command the fake server has received so far, keeping only
    /// decoded client frames.
    fn drain_frames(remote: &mut FakeRemote) -> Vec<ClientFrame> {
        let mut frames = Vec::new();
        while let Ok(command) = remote.from_client.try_recv() {
            if let WireCommand::Frame(text) = command {
                frames.push(serde_json::from_str(&text).unwrap());
            }
        }
        frames
    }

    #[tokio::test(start_paused = true)]
    async fn one_wire_subscription_per_topic() {
        let (registry, _manager, connector) = connected().await;
        let mut remote = connector.take_remote();
        let topic = game_state_topic("g1");

        let _first = registry.subscribe(&topic);
        let _second = registry.subscribe(&topic);
        tokio::time::sleep(Duration::from_millis(5)).await;

        let subscribes = drain_frames(&mut remote)
            .into_iter()
            .filter(|frame| matches!(frame, ClientFrame::Subscribe { .. }))
            .count();
        assert_eq!(subscribes, 1);
        assert_eq!(registry.topic_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn subscribing_while_disconnected_announces_once_connected() {
        let connector = Arc::new(FakeConnector::default());
        let manager = ConnectionManager::new(SyncConfig::default(), Arc::clone(&connector) as Arc<_>);
        let registry = TopicRegistry::new(Arc::clone(&manager));

        let _stream = registry.subscribe(&game_state_topic("g1"));
        let mut status = manager.status();
        status.wait_for(|up| *up).await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert_eq!(connector.dials(), 1);
        let mut remote = connector.take_remote();
        let frames = drain_frames(&mut remote);
        assert!(frames.contains(&ClientFrame::Subscribe {
            topic: "game/g1/state".into()
        }));
    }

    #[tokio::test(start_paused = true)]
    async fn pushes_are_routed_to_their_topic() {
        let (registry, _manager, connector) = connected().await;
        let remote = connector.take_remote();
        let mut stream = registry.subscribe(&game_state_topic("g1"));
        tokio::time::sleep(Duration::from_millis(5)).await;

        remote
            .to_client
            .send(r#"{"topic":"game/g1/state","payload":{"gameId":"g1","remainingSeconds":9}}"#.into())
            .unwrap();

        match stream.next().await.unwrap() {
            TopicMessage::GameState(snapshot) => {
                assert_eq!(snapshot.game_id, "g1");
                assert_eq!(snapshot.remaining_seconds, Some(9));
            }
            other => panic!("expected game state, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn undecodable_frames_are_dropped_without_ending_the_stream() {
        let (registry, _manager, connector) = connected().await;
        let remote = connector.take_remote();
        let mut stream = registry.subscribe(&game_state_topic("g1"));
        tokio::time::sleep(Duration::from_millis(5)).await;

        remote.to_client.send("not json at all".into()).unwrap();
        remote
            .to_client
            .send(r#"{"topic":"game/g1/state","payload":{"gameId":"g1"}}"#.into())
            .unwrap();

        let message = stream.next().await.unwrap();
        assert!(matches!(message, TopicMessage::GameState(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_ends_streams_and_forgets_topics() {
        let (registry, _manager, connector) = connected().await;
        let remote = connector.take_remote();
        let mut stream = registry.subscribe(&game_state_topic("g1"));
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(registry.topic_count(), 1);

        drop(remote.to_client);

        assert!(stream.next().await.is_none());
        assert_eq!(registry.topic_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn streams_hold_their_own_connection_claim() {
        let (registry, manager, connector) = connected().await;
        let _remote = connector.take_remote();
        let stream = registry.subscribe(&game_state_topic("g1"));
        tokio::time::sleep(Duration::from_millis(5)).await;

        // A sibling holder coming and going must not tear down a connection
        // the stream still depends on.
        let other = manager.acquire();
        other.release().await;
        assert_eq!(manager.state(), ConnectionState::Connected);

        drop(stream);
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_announce_keeps_the_topic_and_the_connection() {
        let (registry, manager, connector) = connected().await;
        let remote = connector.take_remote();
        // Writer side of the session is gone, so the announce send fails.
        drop(remote.from_client);

        let _stream = registry.subscribe(&game_state_topic("g1"));
        tokio::time::sleep(Duration::from_millis(5)).await;

        assert_eq!(registry.topic_count(), 1);
        assert_eq!(manager.state(), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn last_listener_detaching_unsubscribes_on_the_wire() {
        let (registry, _manager, connector) = connected().await;
        let mut remote = connector.take_remote();
        let topic = game_state_topic("g1");
        let first = registry.subscribe(&topic);
        let second = registry.subscribe(&topic);
        tokio::time::sleep(Duration::from_millis(5)).await;
        drain_frames(&mut remote);

        drop(first);
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(drain_frames(&mut remote).is_empty());
        assert_eq!(registry.topic_count(), 1);

        drop(second);
        tokio::time::sleep(Duration::from_millis(5)).await;
        let frames = drain_frames(&mut remote);
        assert_eq!(
            frames,
            vec![ClientFrame::Unsubscribe {
                topic: "game/g1/state".into()
            }]
        );
        assert_eq!(registry.topic_count(), 0);
    }
}
