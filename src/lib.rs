//! Real-time game-state synchronization core for live multiplayer quizzes.
//!
//! The crate keeps one durable connection to the quiz server, multiplexes
//! per-entity topic subscriptions over it, reconciles partial state pushes
//! into a single coherent view per game, and correlates player and
//! quizmaster commands with that view.

/// Runtime configuration.
pub mod config;
/// Wire payloads exchanged with the quiz server.
pub mod dto;
/// Error types of the sync core.
pub mod error;
/// Topic routing, outbound commands, and the synchronization façade.
pub mod services;
/// Reconciler and participant identities.
pub mod state;
/// Connection ownership and the socket seam.
pub mod transport;
