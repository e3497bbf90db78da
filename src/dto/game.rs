//! Game-state payloads pushed on `game/{id}/state` and returned by the REST API.

use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

/// Lifecycle states the server reports for a running game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GameStatus {
    /// Waiting for players to join.
    Lobby,
    /// A question is active and the timer is running.
    QuestionActive,
    /// The current question no longer accepts answers.
    QuestionClosed,
    /// The current round has been completed.
    RoundCompleted,
    /// The game has ended.
    GameOver,
}

/// One player's public entry in a game snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GamePlayer {
    /// Server-assigned player identifier.
    pub player_id: String,
    /// Name shown to other participants.
    pub display_name: String,
    /// Accumulated score.
    pub score: i32,
}

/// Timing of one player's submission for the current question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerAnswerInfo {
    /// Server-assigned player identifier.
    pub player_id: String,
    /// Name shown to other participants.
    pub player_name: String,
    /// Milliseconds between question start and this submission.
    pub answer_time_ms: i64,
}

/// Authoritative server-pushed game state.
///
/// Every push may be partial: an absent optional field means "unchanged", not
/// "cleared". The reconciler merges pushes accordingly and never invents
/// values it was not given.
#[skip_serializing_none]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameStateSnapshot {
    /// Identifier of the game this snapshot belongs to.
    pub game_id: String,
    /// Identifier of the quiz definition the game was created from.
    pub quiz_definition_id: Option<String>,
    /// Current lifecycle state of the game.
    pub status: Option<GameStatus>,
    /// Identifier of the round in progress.
    pub current_round_id: Option<String>,
    /// Display name of the round in progress.
    pub current_round_name: Option<String>,
    /// Total number of rounds in the quiz.
    pub total_rounds: Option<u32>,
    /// Identifier of the question in progress.
    pub current_question_id: Option<String>,
    /// Text of the question in progress.
    pub current_question_text: Option<String>,
    /// Seconds left on the question countdown.
    pub remaining_seconds: Option<u32>,
    /// Whether the server currently accepts answers for this question.
    pub accepting_answers: Option<bool>,
    /// Player roster with scores, in server order.
    pub players: Option<Vec<GamePlayer>>,
    /// How many players have answered the current question.
    pub players_answered: Option<u32>,
    /// Per-player submission timings for the current question.
    pub player_answers: Option<Vec<PlayerAnswerInfo>>,
    /// Fastest submission time for the current question, in seconds.
    pub fastest_answer_time: Option<f64>,
    /// Correct answer, revealed once the question is closed.
    pub correct_answer: Option<String>,
}

/// Derived leaderboard row. Never pushed by the server; always recomputed
/// from the snapshot's player roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    /// Server-assigned player identifier.
    pub player_id: String,
    /// Name shown to other participants.
    pub player_name: String,
    /// Accumulated score.
    pub score: i32,
}

impl From<&GamePlayer> for LeaderboardEntry {
    fn from(player: &GamePlayer) -> Self {
        Self {
            player_id: player.player_id.clone(),
            player_name: player.display_name.clone(),
            score: player.score,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_decodes_camel_case_wire_payload() {
        let raw = r#"{
            "gameId": "g1",
            "status": "QUESTION_ACTIVE",
            "currentQuestionId": "q1",
            "currentQuestionText": "Capital of France?",
            "remainingSeconds": 30,
            "acceptingAnswers": true,
            "players": [
                {"playerId": "p1", "displayName": "Alice", "score": 100},
                {"playerId": "p2", "displayName": "Bob", "score": 85}
            ]
        }"#;

        let snapshot: GameStateSnapshot = serde_json::from_str(raw).unwrap();
        assert_eq!(snapshot.game_id, "g1");
        assert_eq!(snapshot.status, Some(GameStatus::QuestionActive));
        assert_eq!(snapshot.current_question_id.as_deref(), Some("q1"));
        assert_eq!(snapshot.remaining_seconds, Some(30));
        assert_eq!(snapshot.players.as_ref().map(Vec::len), Some(2));
        // Absent optional fields decode to None, not defaults.
        assert_eq!(snapshot.total_rounds, None);
        assert_eq!(snapshot.correct_answer, None);
    }

    #[test]
    fn absent_fields_are_omitted_when_reserialized() {
        let snapshot = GameStateSnapshot {
            game_id: "g1".into(),
            remaining_seconds: Some(10),
            ..GameStateSnapshot::default()
        };
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json["remainingSeconds"], 10);
        assert!(json.get("currentQuestionId").is_none());
    }
}
