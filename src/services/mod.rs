//! Services tying the transport to the reconciled game state: topic routing,
//! outbound commands, and the synchronization façade.

/// Request/response commands for player and quizmaster actions.
pub mod command_channel;
/// Game synchronization façade.
pub mod sync_service;
/// Topic subscription registry multiplexing the shared connection.
pub mod topic_registry;
