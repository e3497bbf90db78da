//! Game synchronization façade.
//!
//! One [`QuizSyncClient`] tracks one active game at a time: it claims the
//! shared connection, subscribes to the game's topics, feeds pushes through
//! the reconciler and publishes every reconciled view on a broadcast channel.
//! Player and quizmaster actions enter here and are guarded against the
//! reconciled state before anything leaves the process.

use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use futures::StreamExt;
use futures::stream::{self, BoxStream};
use tokio::sync::{RwLock, broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::dto::game::{GameStateSnapshot, LeaderboardEntry};
use crate::dto::ws::{TopicMessage, game_state_topic, quiz_updates_topic};
use crate::error::SyncError;
use crate::services::command_channel::{CommandChannel, HttpCommandChannel, SubmitAnswerRequest};
use crate::services::topic_registry::{TopicRegistry, TopicStream};
use crate::state::identity::{IdentityStore, PlayerIdentity};
use crate::state::reconciler::{AnswerRejection, GamePhase, Reconciler};
use crate::transport::connector::WsConnector;
use crate::transport::{ConnectionHandle, ConnectionManager};

/// One reconciled view of the active game, published after every merge.
#[derive(Debug, Clone)]
pub struct ReconciledState {
    /// Game this view belongs to.
    pub game_id: String,
    /// Coarse phase derived from the status.
    pub phase: GamePhase,
    /// The merged snapshot.
    pub snapshot: GameStateSnapshot,
    /// Players ranked by score, ties in server order.
    pub leaderboard: Vec<LeaderboardEntry>,
}

/// Result of a player's answer attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The answer was delivered and acknowledged.
    Accepted,
    /// Delivery failed; the submit mark was rolled back so the player can
    /// retry.
    RolledBack,
    /// The attempt never left the process.
    Ignored(IgnoreReason),
}

/// Why an answer attempt was ignored locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    /// An answer for this question was already submitted.
    AlreadySubmitted,
    /// The server is not accepting answers right now.
    NotAcceptingAnswers,
    /// There is no current question.
    NoCurrentQuestion,
    /// No identity is recorded for the active game.
    NoIdentity,
    /// No game is being tracked.
    NoActiveGame,
}

impl From<AnswerRejection> for IgnoreReason {
    fn from(rejection: AnswerRejection) -> Self {
        match rejection {
            AnswerRejection::AlreadySubmitted => Self::AlreadySubmitted,
            AnswerRejection::NoCurrentQuestion => Self::NoCurrentQuestion,
            AnswerRejection::NotAcceptingAnswers => Self::NotAcceptingAnswers,
        }
    }
}

struct ActiveGame {
    game_id: String,
    reconciler: Reconciler,
    handle: ConnectionHandle,
    feed: JoinHandle<()>,
    timer: Option<JoinHandle<()>>,
}

/// Entry point of the sync core.
pub struct QuizSyncClient {
    manager: Arc<ConnectionManager>,
    registry: Arc<TopicRegistry>,
    commands: Arc<dyn CommandChannel>,
    identities: IdentityStore,
    active: RwLock<Option<ActiveGame>>,
    updates: broadcast::Sender<ReconciledState>,
}

impl QuizSyncClient {
    /// Build a client with the production transport and command channel.
    pub fn new(config: SyncConfig) -> Arc<Self> {
        let commands = Arc::new(HttpCommandChannel::new(&config));
        let manager = ConnectionManager::new(config, Arc::new(WsConnector));
        Self::with_parts(manager, commands)
    }

    /// Build a client on top of pre-built transport and command parts.
    pub fn with_parts(
        manager: Arc<ConnectionManager>,
        commands: Arc<dyn CommandChannel>,
    ) -> Arc<Self> {
        let registry = TopicRegistry::new(Arc::clone(&manager));
        let (updates, _) = broadcast::channel(manager.config().frame_capacity);
        Arc::new(Self {
            manager,
            registry,
            commands,
            identities: IdentityStore::new(),
            active: RwLock::new(None),
            updates,
        })
    }

    /// Reconciled views, one per applied merge or countdown tick.
    pub fn updates(&self) -> broadcast::Receiver<ReconciledState> {
        self.updates.subscribe()
    }

    /// Boolean connection-status stream of the underlying transport.
    pub fn connection_status(&self) -> watch::Receiver<bool> {
        self.manager.status()
    }

    /// Identity storage, keyed by game id.
    pub fn identities(&self) -> &IdentityStore {
        &self.identities
    }

    /// Record the local participant's identity for a game.
    pub fn set_identity(&self, game_id: &str, identity: PlayerIdentity) {
        self.identities.put(game_id, identity);
    }

    /// Start tracking a game: claim the connection, subscribe to its state
    /// topic (and the quiz's lobby topic when given), and seed the
    /// reconciler from an authoritative fetch. Any previously tracked game
    /// is torn down first.
    pub async fn initialize_game(self: &Arc<Self>, game_id: &str, quiz_id: Option<&str>) {
        self.teardown().await;

        let handle = self.manager.acquire();
        let game_stream = self.registry.subscribe(&game_state_topic(game_id));
        let quiz_stream = quiz_id.map(|id| self.registry.subscribe(&quiz_updates_topic(id)));
        let feed = tokio::spawn(Self::feed(
            Arc::downgrade(self),
            game_id.to_owned(),
            game_stream,
            quiz_stream,
        ));

        let mut reconciler = Reconciler::new();
        reconciler.mark_loading();
        *self.active.write().await = Some(ActiveGame {
            game_id: game_id.to_owned(),
            reconciler,
            handle,
            feed,
            timer: None,
        });

        // Pushes that raced ahead of the seed win field-by-field on the
        // merges that follow.
        if let Some(snapshot) = self.commands.fetch_game_state(game_id).await {
            self.apply_push(game_id, snapshot).await;
        }
        info!(game_id, "tracking game");
    }

    /// Stop tracking the active game and release the connection claim.
    pub async fn leave_game(&self) {
        self.teardown().await;
    }

    /// Raw lobby-update stream for a quiz, without reconciliation.
    pub fn subscribe_quiz_updates(&self, quiz_id: &str) -> TopicStream {
        self.registry.subscribe(&quiz_updates_topic(quiz_id))
    }

    /// Raw state-push stream for a game, without reconciliation.
    pub fn subscribe_game_state(&self, game_id: &str) -> TopicStream {
        self.registry.subscribe(&game_state_topic(game_id))
    }

    /// The reconciled snapshot of the active game, if any state has arrived.
    pub async fn current_snapshot(&self) -> Option<GameStateSnapshot> {
        self.active
            .read()
            .await
            .as_ref()
            .and_then(|active| active.reconciler.snapshot().cloned())
    }

    /// Submit the local player's answer for the current question.
    ///
    /// The attempt is guarded against the reconciled state and the recorded
    /// identity; only attempts that pass every guard reach the wire. A
    /// delivery failure rolls the submit mark back so the player may retry.
    pub async fn on_answer_selected(self: &Arc<Self>, answer_text: &str) -> SubmitOutcome {
        let request = {
            let mut slot = self.active.write().await;
            let Some(active) = slot.as_mut() else {
                return SubmitOutcome::Ignored(IgnoreReason::NoActiveGame);
            };
            let Some(identity) = self.identities.get(&active.game_id) else {
                debug!(game_id = %active.game_id, "answer ignored, no identity recorded");
                return SubmitOutcome::Ignored(IgnoreReason::NoIdentity);
            };
            match active.reconciler.begin_answer(answer_text, Instant::now()) {
                Ok(pending) => SubmitAnswerRequest {
                    game_id: active.game_id.clone(),
                    player_id: identity.player_id,
                    question_id: pending.question_id,
                    answer_text: pending.answer_text,
                },
                Err(rejection) => {
                    debug!(game_id = %active.game_id, %rejection, "answer ignored");
                    return SubmitOutcome::Ignored(rejection.into());
                }
            }
        };

        match self.commands.submit_answer(request.clone()).await {
            Some(snapshot) => {
                self.apply_push(&request.game_id, snapshot).await;
                SubmitOutcome::Accepted
            }
            None => {
                let mut slot = self.active.write().await;
                if let Some(active) = slot.as_mut()
                    && active.game_id == request.game_id
                {
                    active.reconciler.rollback_answer();
                }
                warn!(game_id = %request.game_id, "answer delivery failed, submit mark rolled back");
                SubmitOutcome::RolledBack
            }
        }
    }

    /// Advance the active game to its next question. Quizmaster only.
    pub async fn advance_question(self: &Arc<Self>) -> Result<(), SyncError> {
        let (game_id, admin_id) = {
            let slot = self.active.read().await;
            let active = slot
                .as_ref()
                .ok_or_else(|| SyncError::InvalidInput("no active game".into()))?;
            let identity = self
                .identities
                .get(&active.game_id)
                .ok_or_else(|| SyncError::MissingIdentity(active.game_id.clone()))?;
            if !identity.is_admin {
                return Err(SyncError::Unauthorized(
                    "only the quizmaster can advance questions".into(),
                ));
            }
            (active.game_id.clone(), identity.player_id)
        };

        if let Some(snapshot) = self.commands.advance_question(&game_id, &admin_id).await {
            self.apply_push(&game_id, snapshot).await;
        }
        Ok(())
    }

    /// Start a quiz, returning the created game's state when the server
    /// confirms.
    pub async fn start_quiz(&self, quiz_id: &str) -> Option<GameStateSnapshot> {
        self.commands.start_quiz(quiz_id).await
    }

    async fn feed(
        client: Weak<Self>,
        game_id: String,
        game_stream: TopicStream,
        quiz_stream: Option<TopicStream>,
    ) {
        let mut merged: BoxStream<'static, TopicMessage> = match quiz_stream {
            Some(quiz) => Box::pin(stream::select(game_stream, quiz)),
            None => Box::pin(game_stream),
        };
        while let Some(message) = merged.next().await {
            let Some(client) = client.upgrade() else {
                return;
            };
            match message {
                TopicMessage::GameState(snapshot) => client.apply_push(&game_id, snapshot).await,
                TopicMessage::QuizUpdate(update) => {
                    if let Some(snapshot) = update.game_state {
                        client.apply_push(&game_id, snapshot).await;
                    } else {
                        debug!(
                            quiz_id = %update.quiz_id,
                            players = update.player_count,
                            "lobby update without game state"
                        );
                    }
                }
            }
        }
        // Streams end when the connection drops; tracking resumes only when
        // the caller initializes the game again.
        debug!(game_id, "push feed ended");
    }

    async fn apply_push(self: &Arc<Self>, game_id: &str, snapshot: GameStateSnapshot) {
        let mut slot = self.active.write().await;
        let Some(active) = slot.as_mut() else {
            return;
        };
        if active.game_id != game_id {
            debug!(game_id, "push for a game that is no longer tracked");
            return;
        }

        let outcome = active.reconciler.apply(snapshot, Instant::now());
        if outcome.question_changed {
            // At most one countdown per game; the new question owns it.
            if let Some(timer) = active.timer.take() {
                timer.abort();
            }
            if active
                .reconciler
                .snapshot()
                .and_then(|snapshot| snapshot.remaining_seconds)
                .is_some()
            {
                active.timer = Some(tokio::spawn(Self::run_countdown(
                    Arc::downgrade(self),
                    game_id.to_owned(),
                )));
            }
        }
        if outcome.ended
            && let Some(timer) = active.timer.take()
        {
            timer.abort();
        }
        self.publish(active);
    }

    async fn run_countdown(client: Weak<Self>, game_id: String) {
        let mut ticks = interval(Duration::from_secs(1));
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticks.tick().await;
        loop {
            ticks.tick().await;
            let Some(client) = client.upgrade() else {
                return;
            };
            let mut slot = client.active.write().await;
            let Some(active) = slot.as_mut() else {
                return;
            };
            if active.game_id != game_id {
                return;
            }
            match active.reconciler.tick_countdown() {
                Some(_) => client.publish(active),
                None => {
                    active.timer = None;
                    return;
                }
            }
        }
    }

    fn publish(&self, active: &ActiveGame) {
        let Some(snapshot) = active.reconciler.snapshot() else {
            return;
        };
        let _ = self.updates.send(ReconciledState {
            game_id: active.game_id.clone(),
            phase: active.reconciler.phase(),
            snapshot: snapshot.clone(),
            leaderboard: active.reconciler.leaderboard(),
        });
    }

    async fn teardown(&self) {
        let taken = self.active.write().await.take();
        if let Some(active) = taken {
            active.feed.abort();
            if let Some(timer) = active.timer {
                timer.abort();
            }
            active.handle.release().await;
            info!(game_id = %active.game_id, "stopped tracking game");
        }
    }
}
