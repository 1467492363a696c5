//! Snakepit game server library.

pub mod config;
pub mod game;
pub mod player;
pub mod rng;
pub mod server;

// Re-export commonly used types
pub use config::Config;
pub use game::Game;
pub use player::{Player, PlayerId, PlayerMap};
pub use server::run;
