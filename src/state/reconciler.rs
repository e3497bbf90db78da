//! Merges partial server pushes into one coherent game view.
//!
//! Pushes may be partial and may interleave with lobby updates for the same
//! game, so the reconciler merges field-by-field and never lets an absent
//! field erase a known value. The one exception is the current-question unit,
//! which is replaced wholesale on a question transition so stale text or
//! countdown values cannot leak into the next question.

use std::time::Instant;

use thiserror::Error;

use crate::dto::game::{GameStateSnapshot, GameStatus, LeaderboardEntry};

/// Coarse game phase derived from the reconciled status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum GamePhase {
    /// No game is being tracked yet.
    #[default]
    NoGame,
    /// Tracking started but no state has arrived.
    Loading,
    /// The game is running or in its lobby.
    Live,
    /// The server reported the game as over.
    Ended,
}

/// Player-local answer bookkeeping for the current question.
///
/// Reset exactly once per question transition, never in between.
#[derive(Debug, Clone, Default)]
pub struct LocalAnswerState {
    /// Question this state belongs to.
    pub question_id: Option<String>,
    /// Answer the player picked, kept across a failed submit so they can
    /// retry without retyping.
    pub answer_value: Option<String>,
    /// Whether a submit was issued for this question.
    pub submitted: bool,
    /// Seconds between question start and the submit.
    pub elapsed_secs: Option<u64>,
    /// When the current question started, as observed locally.
    pub started_at: Option<Instant>,
}

/// What one applied push did to the reconciled view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeOutcome {
    /// The push moved the game to a different question.
    pub question_changed: bool,
    /// The reconciled status is now game-over.
    pub ended: bool,
}

/// Why an answer attempt was refused locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AnswerRejection {
    /// An answer for this question was already submitted.
    #[error("an answer was already submitted for this question")]
    AlreadySubmitted,
    /// There is no current question to answer.
    #[error("no current question")]
    NoCurrentQuestion,
    /// The server is not accepting answers for this question.
    #[error("answers are not being accepted")]
    NotAcceptingAnswers,
}

/// An accepted answer, ready to be forwarded to the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingAnswer {
    /// Question being answered.
    pub question_id: String,
    /// Answer text as picked by the player.
    pub answer_text: String,
    /// Whole seconds between question start and this submit.
    pub elapsed_secs: u64,
}

/// Single-game state machine fed by server pushes.
///
/// Purely synchronous; callers inject `now` so behavior is deterministic
/// under test.
#[derive(Debug, Default)]
pub struct Reconciler {
    snapshot: Option<GameStateSnapshot>,
    answer: LocalAnswerState,
    phase: GamePhase,
}

impl Reconciler {
    /// Fresh reconciler with no state yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// The reconciled snapshot, if any push has been applied.
    pub fn snapshot(&self) -> Option<&GameStateSnapshot> {
        self.snapshot.as_ref()
    }

    /// Local answer bookkeeping for the current question.
    pub fn answer(&self) -> &LocalAnswerState {
        &self.answer
    }

    /// Current phase.
    pub fn phase(&self) -> GamePhase {
        self.phase
    }

    /// Note that tracking has started while the first state is fetched.
    pub fn mark_loading(&mut self) {
        if self.phase == GamePhase::NoGame {
            self.phase = GamePhase::Loading;
        }
    }

    /// Merge one push into the reconciled view.
    ///
    /// Absent optional fields keep their stored values. A push whose
    /// `current_question_id` differs from the stored one replaces the
    /// question unit (id, text, countdown) wholesale and resets the local
    /// answer state, anchored at `now`. The transition from "no question" to
    /// the first question counts; a push without a question id never does.
    pub fn apply(&mut self, push: GameStateSnapshot, now: Instant) -> MergeOutcome {
        let stored_question = self
            .snapshot
            .as_ref()
            .and_then(|snapshot| snapshot.current_question_id.clone());
        let question_changed =
            push.current_question_id.is_some() && push.current_question_id != stored_question;

        match self.snapshot.as_mut() {
            Some(stored) => merge_push(stored, push, question_changed),
            None => self.snapshot = Some(push),
        }

        if question_changed {
            self.answer = LocalAnswerState {
                question_id: self
                    .snapshot
                    .as_ref()
                    .and_then(|snapshot| snapshot.current_question_id.clone()),
                started_at: Some(now),
                ..LocalAnswerState::default()
            };
        }

        let status = self.snapshot.as_ref().and_then(|snapshot| snapshot.status);
        self.phase = if status == Some(GameStatus::GameOver) {
            GamePhase::Ended
        } else {
            GamePhase::Live
        };

        MergeOutcome {
            question_changed,
            ended: self.phase == GamePhase::Ended,
        }
    }

    /// Validate and record an answer attempt.
    ///
    /// Accepted only when nothing was submitted for the current question,
    /// a question exists, and the server accepts answers. Acceptance marks
    /// the question as submitted optimistically; a failed delivery is undone
    /// with [`Reconciler::rollback_answer`].
    pub fn begin_answer(
        &mut self,
        answer_text: &str,
        now: Instant,
    ) -> Result<PendingAnswer, AnswerRejection> {
        if self.answer.submitted {
            return Err(AnswerRejection::AlreadySubmitted);
        }
        let question_id = self
            .snapshot
            .as_ref()
            .and_then(|snapshot| snapshot.current_question_id.clone())
            .ok_or(AnswerRejection::NoCurrentQuestion)?;
        let accepting = self
            .snapshot
            .as_ref()
            .and_then(|snapshot| snapshot.accepting_answers)
            .unwrap_or(false);
        if !accepting {
            return Err(AnswerRejection::NotAcceptingAnswers);
        }

        // The anchor can sit in the future if a push arrived with a later
        // clock reading; elapsed time is clamped to zero, never negative.
        let elapsed_secs = self
            .answer
            .started_at
            .map(|started| now.saturating_duration_since(started).as_secs())
            .unwrap_or(0);

        self.answer.answer_value = Some(answer_text.to_owned());
        self.answer.submitted = true;
        self.answer.elapsed_secs = Some(elapsed_secs);

        Ok(PendingAnswer {
            question_id,
            answer_text: answer_text.to_owned(),
            elapsed_secs,
        })
    }

    /// Undo the optimistic submit mark after a failed delivery.
    ///
    /// Only the submitted flag is cleared; the picked answer and elapsed
    /// time stay so the player can retry without losing their input.
    pub fn rollback_answer(&mut self) {
        self.answer.submitted = false;
    }

    /// Rank players by score, descending. The sort is stable: players with
    /// equal scores keep their server-given order, so tied ranks do not
    /// flicker between otherwise identical snapshots.
    pub fn leaderboard(&self) -> Vec<LeaderboardEntry> {
        let mut entries: Vec<LeaderboardEntry> = self
            .snapshot
            .as_ref()
            .and_then(|snapshot| snapshot.players.as_ref())
            .map(|players| players.iter().map(LeaderboardEntry::from).collect())
            .unwrap_or_default();
        entries.sort_by(|a, b| b.score.cmp(&a.score));
        entries
    }

    /// Advance the local countdown by one second.
    ///
    /// Returns the new remaining value, or `None` when there is nothing left
    /// to count down (the caller stops its timer). Hitting zero closes the
    /// question locally.
    pub fn tick_countdown(&mut self) -> Option<u32> {
        let snapshot = self.snapshot.as_mut()?;
        let remaining = snapshot.remaining_seconds?;
        if remaining == 0 {
            return None;
        }
        let next = remaining - 1;
        snapshot.remaining_seconds = Some(next);
        if next == 0 {
            snapshot.accepting_answers = Some(false);
        }
        Some(next)
    }
}

fn merge_push(stored: &mut GameStateSnapshot, push: GameStateSnapshot, question_changed: bool) {
    stored.game_id = push.game_id;
    merge_field(&mut stored.quiz_definition_id, push.quiz_definition_id);
    merge_field(&mut stored.status, push.status);
    merge_field(&mut stored.current_round_id, push.current_round_id);
    merge_field(&mut stored.current_round_name, push.current_round_name);
    merge_field(&mut stored.total_rounds, push.total_rounds);

    if question_changed {
        // The question unit moves together so nothing from the previous
        // question survives into the new one.
        stored.current_question_id = push.current_question_id;
        stored.current_question_text = push.current_question_text;
        stored.remaining_seconds = push.remaining_seconds;
    } else {
        merge_field(&mut stored.current_question_id, push.current_question_id);
        merge_field(&mut stored.current_question_text, push.current_question_text);
        merge_field(&mut stored.remaining_seconds, push.remaining_seconds);
    }

    merge_field(&mut stored.accepting_answers, push.accepting_answers);
    merge_field(&mut stored.players, push.players);
    merge_field(&mut stored.players_answered, push.players_answered);
    merge_field(&mut stored.player_answers, push.player_answers);
    merge_field(&mut stored.fastest_answer_time, push.fastest_answer_time);
    merge_field(&mut stored.correct_answer, push.correct_answer);
}

fn merge_field<T>(slot: &mut Option<T>, incoming: Option<T>) {
    if incoming.is_some() {
        *slot = incoming;
    }
}
