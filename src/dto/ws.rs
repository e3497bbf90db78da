//! Frame envelopes for the persistent connection and topic naming.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dto::{game::GameStateSnapshot, quiz::QuizUpdateMessage};

const QUIZ_TOPIC_PREFIX: &str = "quiz/";
const QUIZ_TOPIC_SUFFIX: &str = "/updates";
const GAME_TOPIC_PREFIX: &str = "game/";
const GAME_TOPIC_SUFFIX: &str = "/state";

/// Topic key carrying lobby updates for one quiz.
pub fn quiz_updates_topic(quiz_id: &str) -> String {
    format!("{QUIZ_TOPIC_PREFIX}{quiz_id}{QUIZ_TOPIC_SUFFIX}")
}

/// Topic key carrying state pushes for one game.
pub fn game_state_topic(game_id: &str) -> String {
    format!("{GAME_TOPIC_PREFIX}{game_id}{GAME_TOPIC_SUFFIX}")
}

/// Frames the client writes to the socket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Request push delivery for a topic.
    Subscribe {
        /// Topic key to subscribe to.
        topic: String,
    },
    /// Stop push delivery for a topic.
    Unsubscribe {
        /// Topic key to unsubscribe from.
        topic: String,
    },
}

/// Envelope of every server push: the topic it belongs to plus its raw payload.
#[derive(Debug, Deserialize)]
pub struct ServerFrame {
    /// Topic key the payload was published on.
    pub topic: String,
    /// Undecoded message body.
    pub payload: serde_json::Value,
}

impl ServerFrame {
    /// Parse a raw text frame into an envelope.
    pub fn from_json_str(raw: &str) -> Result<Self, FrameDecodeError> {
        serde_json::from_str(raw).map_err(FrameDecodeError::Envelope)
    }
}

/// Decoded message delivered on a topic stream.
#[derive(Debug, Clone, PartialEq)]
pub enum TopicMessage {
    /// Lobby update from a `quiz/{id}/updates` topic.
    QuizUpdate(QuizUpdateMessage),
    /// State push from a `game/{id}/state` topic.
    GameState(GameStateSnapshot),
}

impl TopicMessage {
    /// Decode an envelope into the message shape its topic dictates.
    ///
    /// Returns the topic key alongside the message so the caller can route it.
    pub fn decode(frame: ServerFrame) -> Result<(String, Self), FrameDecodeError> {
        let ServerFrame { topic, payload } = frame;
        let message = if topic.starts_with(QUIZ_TOPIC_PREFIX) && topic.ends_with(QUIZ_TOPIC_SUFFIX)
        {
            serde_json::from_value::<QuizUpdateMessage>(payload)
                .map(TopicMessage::QuizUpdate)
                .map_err(|source| FrameDecodeError::Payload {
                    topic: topic.clone(),
                    source,
                })?
        } else if topic.starts_with(GAME_TOPIC_PREFIX) && topic.ends_with(GAME_TOPIC_SUFFIX) {
            serde_json::from_value::<GameStateSnapshot>(payload)
                .map(TopicMessage::GameState)
                .map_err(|source| FrameDecodeError::Payload {
                    topic: topic.clone(),
                    source,
                })?
        } else {
            return Err(FrameDecodeError::UnknownTopic(topic));
        };

        Ok((topic, message))
    }
}

/// Why a raw frame could not be turned into a [`TopicMessage`].
#[derive(Debug, Error)]
pub enum FrameDecodeError {
    /// The frame is not a valid envelope.
    #[error("malformed frame envelope: {0}")]
    Envelope(#[source] serde_json::Error),
    /// The envelope names a topic this client does not understand.
    #[error("unknown topic `{0}`")]
    UnknownTopic(String),
    /// The payload does not match the shape its topic dictates.
    #[error("malformed payload for topic `{topic}`: {source}")]
    Payload {
        /// Topic key of the offending frame.
        topic: String,
        /// Underlying decode failure.
        #[source]
        source: serde_json::Error,
    },
}
