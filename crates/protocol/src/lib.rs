//! Shared wire protocol for the snakepit server.
//!
//! This crate contains:
//! - The frame grammar: ASCII frames terminated by `|`, tokens separated
//!   by single spaces
//! - Client command parsing and server message builders
//! - Shared types (Direction, Position) and game constants

mod commands;
mod error;
pub mod messages;

pub use commands::{keyword_is_known, ClientCommand};
pub use error::ProtocolError;

/// Board side length; tiles are indexed `0..GRID_SIZE` on both axes.
pub const GRID_SIZE: i32 = 10;
/// Body length every snake is reset to when a match starts.
pub const INITIAL_SNAKE_LENGTH: usize = 3;
/// Fixed number of rooms on the server.
pub const NUMBER_OF_ROOMS: usize = 4;
/// Seat limit per room.
pub const MAX_PLAYERS_IN_ROOM: usize = 4;
/// Byte terminating every frame on the wire.
pub const FRAME_DELIMITER: u8 = b'|';

/// A tile on the board. Origin is the top-left corner; `y` grows downward.
pub type Position = glam::IVec2;

/// Cardinal movement directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    /// All directions, in wire-table order.
    pub const ALL: [Direction; 4] = [
        Direction::Up,
        Direction::Down,
        Direction::Left,
        Direction::Right,
    ];

    /// Per-tick coordinate delta; `Up` decreases `y`.
    pub fn delta(self) -> Position {
        match self {
            Direction::Up => Position::new(0, -1),
            Direction::Down => Position::new(0, 1),
            Direction::Left => Position::new(-1, 0),
            Direction::Right => Position::new(1, 0),
        }
    }

    pub fn opposite(self) -> Direction {
        match self {
            Direction::Up => Direction::Down,
            Direction::Down => Direction::Up,
            Direction::Left => Direction::Right,
            Direction::Right => Direction::Left,
        }
    }

    /// True iff the deltas of `self` and `other` cancel out.
    pub fn is_opposite(self, other: Direction) -> bool {
        self.delta() + other.delta() == Position::ZERO
    }

    /// Single-letter wire form.
    pub fn letter(self) -> char {
        match self {
            Direction::Up => 'U',
            Direction::Down => 'D',
            Direction::Left => 'L',
            Direction::Right => 'R',
        }
    }

    pub fn from_letter(letter: char) -> Option<Direction> {
        match letter {
            'U' => Some(Direction::Up),
            'D' => Some(Direction::Down),
            'L' => Some(Direction::Left),
            'R' => Some(Direction::Right),
            _ => None,
        }
    }

    /// The direction stepping from `from` to the adjacent tile `to`, if any.
    pub fn between(from: Position, to: Position) -> Option<Direction> {
        Direction::ALL.iter().copied().find(|d| d.delta() == to - from)
    }
}
