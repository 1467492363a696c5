//! Player entity.

use protocol::{Direction, Position, INITIAL_SNAKE_LENGTH};
use std::collections::{HashMap, VecDeque};
use std::time::Instant;

/// Identifier of a player in the server's player table.
///
/// Rooms and connections refer to players by id only; the table owns the
/// entries, and an id is scrubbed from every room and connection before
/// its entry is dropped.
pub type PlayerId = u32;

/// The server's player table.
pub type PlayerMap = HashMap<PlayerId, Player>;

/// A named participant, possibly mid-match.
#[derive(Debug)]
pub struct Player {
    /// Unique nickname, chosen with `NICK`.
    pub nickname: String,
    /// Direction requested for the next tick.
    pub dir: Direction,
    /// Direction actually executed last tick; `None` before the first move.
    pub last_move_dir: Option<Direction>,
    /// Still part of the running match.
    pub alive: bool,
    /// Whether this player acknowledged the last tick.
    pub updated: bool,
    /// Apples eaten so far.
    pub apples: u32,
    /// Target body length; the body grows toward it one tick at a time.
    pub length: usize,
    /// Occupied tiles, head first.
    pub body: VecDeque<Position>,
    /// Timestamp of the last message received for this player.
    pub last_active: Instant,
}

impl Player {
    /// Create a new player with the given nickname.
    pub fn new(nickname: String) -> Self {
        Self {
            nickname,
            dir: Direction::Up,
            last_move_dir: None,
            alive: false,
            updated: false,
            apples: 0,
            length: INITIAL_SNAKE_LENGTH,
            body: VecDeque::new(),
            last_active: Instant::now(),
        }
    }

    /// Refresh the activity timestamp.
    pub fn touch(&mut self) {
        self.last_active = Instant::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_player_defaults() {
        let player = Player::new("alice".to_string());
        assert_eq!(player.nickname, "alice");
        assert_eq!(player.last_move_dir, None);
        assert!(!player.alive);
        assert!(!player.updated);
        assert_eq!(player.apples, 0);
        assert_eq!(player.length, INITIAL_SNAKE_LENGTH);
        assert!(player.body.is_empty());
    }
}
