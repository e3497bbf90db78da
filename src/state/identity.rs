//! Per-game player identity, as handed out by the join flow.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

/// Who the local participant is within one game.
///
/// Serializable so an embedder can persist identities across restarts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerIdentity {
    /// Server-assigned player identifier.
    pub player_id: String,
    /// Name the player joined with.
    pub player_name: String,
    /// Whether this participant is the quizmaster.
    pub is_admin: bool,
}

/// Identity storage keyed by game id.
///
/// A participant can sit in several games at once (for example a quizmaster
/// running one game while playing another), so identities never bleed across
/// games.
#[derive(Debug, Default)]
pub struct IdentityStore {
    identities: DashMap<String, PlayerIdentity>,
}

impl IdentityStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the identity to use for a game, replacing any previous one.
    pub fn put(&self, game_id: &str, identity: PlayerIdentity) {
        self.identities.insert(game_id.to_owned(), identity);
    }

    /// Identity for a game, if one was recorded.
    pub fn get(&self, game_id: &str) -> Option<PlayerIdentity> {
        self.identities
            .get(game_id)
            .map(|entry| entry.value().clone())
    }

    /// Forget the identity for a game.
    pub fn remove(&self, game_id: &str) {
        self.identities.remove(game_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(name: &str) -> PlayerIdentity {
        PlayerIdentity {
            player_id: format!("{name}-id"),
            player_name: name.into(),
            is_admin: false,
        }
    }

    #[test]
    fn identities_are_scoped_per_game() {
        let store = IdentityStore::new();
        store.put("g1", identity("Alice"));
        store.put("g2", identity("Bob"));

        assert_eq!(store.get("g1").unwrap().player_name, "Alice");
        assert_eq!(store.get("g2").unwrap().player_name, "Bob");
        assert!(store.get("g3").is_none());

        store.remove("g1");
        assert!(store.get("g1").is_none());
        assert!(store.get("g2").is_some());
    }
}
