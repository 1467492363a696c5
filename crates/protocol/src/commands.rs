//! Client -> Server command parsing.

use crate::{Direction, ProtocolError, NUMBER_OF_ROOMS};

/// Keywords a client frame may start with. All of them are exactly four
/// bytes, which is what makes the early prefix check possible.
const KEYWORDS: [&str; 9] = [
    "NICK", "LIST", "JOIN", "LEAV", "STRT", "MOVE", "TACK", "PONG", "QUIT",
];

/// Whether a buffered 4-byte prefix can still become a valid frame.
///
/// Servers call this before a full frame has arrived; an unknown prefix is
/// fatal for the connection without waiting for the delimiter.
pub fn keyword_is_known(prefix: &str) -> bool {
    KEYWORDS.contains(&prefix)
}

/// A parsed client command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    /// Bind the connection to a player (`NICK <nick>`).
    Nick(String),
    /// Request per-room player counts (`LIST`).
    ListRooms,
    /// Move into a room (`JOIN <roomId>`).
    Join(usize),
    /// Leave the current room (`LEAV`).
    Leave,
    /// Start the match in the caller's room (`STRT`).
    Start,
    /// Change the intent direction (`MOVE <U|D|L|R>`).
    Move(Direction),
    /// Acknowledge the last tick (`TACK`).
    Tack,
    /// Heartbeat response (`PONG`).
    Pong,
    /// Leave the server for good (`QUIT`).
    Quit,
}

impl ClientCommand {
    /// Parse one frame body, the delimiter already stripped.
    ///
    /// Tokens are split on single spaces, so stray or doubled spaces count
    /// against a command's arity rather than being forgiven.
    pub fn parse(frame: &str) -> Result<Self, ProtocolError> {
        let tokens: Vec<&str> = frame.split(' ').collect();
        match tokens[0] {
            "NICK" => {
                expect_arity("NICK", &tokens, 2)?;
                if tokens[1].is_empty() {
                    return Err(ProtocolError::EmptyNickname);
                }
                Ok(ClientCommand::Nick(tokens[1].to_string()))
            }
            "LIST" => {
                expect_arity("LIST", &tokens, 1)?;
                Ok(ClientCommand::ListRooms)
            }
            "JOIN" => {
                expect_arity("JOIN", &tokens, 2)?;
                Ok(ClientCommand::Join(parse_room_id(tokens[1])?))
            }
            "LEAV" => {
                expect_arity("LEAV", &tokens, 1)?;
                Ok(ClientCommand::Leave)
            }
            "STRT" => {
                expect_arity("STRT", &tokens, 1)?;
                Ok(ClientCommand::Start)
            }
            "MOVE" => {
                expect_arity("MOVE", &tokens, 2)?;
                Ok(ClientCommand::Move(parse_direction(tokens[1])?))
            }
            "TACK" => {
                expect_arity("TACK", &tokens, 1)?;
                Ok(ClientCommand::Tack)
            }
            "PONG" => {
                expect_arity("PONG", &tokens, 1)?;
                Ok(ClientCommand::Pong)
            }
            "QUIT" => {
                expect_arity("QUIT", &tokens, 1)?;
                Ok(ClientCommand::Quit)
            }
            other => Err(ProtocolError::UnknownCommand(other.to_string())),
        }
    }
}

fn expect_arity(
    command: &'static str,
    tokens: &[&str],
    expected: usize,
) -> Result<(), ProtocolError> {
    if tokens.len() == expected {
        Ok(())
    } else {
        Err(ProtocolError::WrongArgumentCount(command))
    }
}

/// Room ids are unsigned decimals with no sign, below the room count.
fn parse_room_id(token: &str) -> Result<usize, ProtocolError> {
    if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ProtocolError::InvalidRoomId(token.to_string()));
    }
    match token.parse::<usize>() {
        Ok(id) if id < NUMBER_OF_ROOMS => Ok(id),
        _ => Err(ProtocolError::InvalidRoomId(token.to_string())),
    }
}

fn parse_direction(token: &str) -> Result<Direction, ProtocolError> {
    let mut chars = token.chars();
    match (chars.next(), chars.next()) {
        (Some(letter), None) => Direction::from_letter(letter)
            .ok_or_else(|| ProtocolError::InvalidDirection(token.to_string())),
        _ => Err(ProtocolError::InvalidDirection(token.to_string())),
    }
}
