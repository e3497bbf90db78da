//! Lobby payloads pushed on `quiz/{id}/updates`.

use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

use crate::dto::game::GameStateSnapshot;

/// Roster entry inside a quiz update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuizPlayer {
    /// Server-assigned player identifier.
    pub id: String,
    /// Name shown in the lobby.
    pub name: String,
}

/// Ephemeral lobby update. Dispatched to listeners and not retained.
#[skip_serializing_none]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizUpdateMessage {
    /// Identifier of the quiz this update belongs to.
    pub quiz_id: String,
    /// Number of players currently joined.
    pub player_count: u32,
    /// Maximum number of players allowed.
    pub max_players: u32,
    /// Whether the quiz has been started by the quizmaster.
    pub started: Option<bool>,
    /// Current lobby roster.
    pub players: Option<Vec<QuizPlayer>>,
    /// Embedded game state, present once a game is running.
    pub game_state: Option<GameStateSnapshot>,
    /// Identifier of the running game, if any.
    pub current_game_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_decodes_with_optional_roster() {
        let raw = r#"{
            "quizId": "quiz-1",
            "playerCount": 2,
            "maxPlayers": 10,
            "started": false,
            "players": [{"id": "p1", "name": "Alice"}, {"id": "p2", "name": "Bob"}]
        }"#;

        let update: QuizUpdateMessage = serde_json::from_str(raw).unwrap();
        assert_eq!(update.quiz_id, "quiz-1");
        assert_eq!(update.player_count, 2);
        assert_eq!(update.started, Some(false));
        assert_eq!(update.players.as_ref().map(Vec::len), Some(2));
        assert!(update.game_state.is_none());
        assert!(update.current_game_id.is_none());
    }
}
