//! Board services: per-board state and the background work around it.

pub mod board;
pub mod fanout;
pub mod history;
pub mod persistence;
pub mod presence;
pub mod registry;
pub mod store;
