//! Wire-facing data transfer objects exchanged with the quiz server.

pub mod game;
pub mod quiz;
pub mod ws;
