//! Server -> Client message building.
//!
//! Every constant and builder yields a complete frame, delimiter included.

/// Heartbeat probe.
pub const PING: &str = "PING|";
/// Move intent acknowledged (sent even when the intent was left unchanged).
pub const MOVD: &str = "MOVD|";
/// Room left.
pub const LEFT: &str = "LEFT|";
/// Join rejected, room at capacity.
pub const FULL: &str = "FULL|";
/// Match started.
pub const START_OK: &str = "STRT OK|";
/// Match could not start.
pub const START_FAIL: &str = "STRT FAIL|";
/// Match ended with no survivor.
pub const DRAW: &str = "DRAW|";

/// Build a `ROOM` frame listing the player count of every room.
pub fn room_listing(counts: &[usize]) -> String {
    let mut msg = String::from("ROOM");
    for count in counts {
        msg.push_str(&format!(" {}", count));
    }
    msg.push('|');
    msg
}

/// Build a `LOBY` membership snapshot for one room.
pub fn lobby<'a>(nicks: impl IntoIterator<Item = &'a str>) -> String {
    let mut msg = String::from("LOBY");
    for nick in nicks {
        msg.push_str(&format!(" {}", nick));
    }
    msg.push('|');
    msg
}

/// Build a `TICK` frame carrying a full state encoding.
pub fn tick(state: &str) -> String {
    format!("TICK {}|", state)
}

/// Build a `WAIT` frame naming the players yet to acknowledge the tick.
pub fn wait<'a>(nicks: impl IntoIterator<Item = &'a str>) -> String {
    let mut msg = String::from("WAIT");
    for nick in nicks {
        msg.push_str(&format!(" {}", nick));
    }
    msg.push('|');
    msg
}

/// Build the `WINS` terminal frame.
pub fn wins(nick: &str) -> String {
    format!("WINS {}|", nick)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_listing() {
        assert_eq!(room_listing(&[0, 1, 0, 0]), "ROOM 0 1 0 0|");
        assert_eq!(room_listing(&[]), "ROOM|");
    }

    #[test]
    fn test_lobby() {
        assert_eq!(lobby(["alice", "bob"]), "LOBY alice bob|");
        assert_eq!(lobby([]), "LOBY|");
    }

    #[test]
    fn test_tick_and_wait() {
        assert_eq!(tick("1 2 alice 3 4 HDL"), "TICK 1 2 alice 3 4 HDL|");
        assert_eq!(wait(["bob"]), "WAIT bob|");
    }

    #[test]
    fn test_wins() {
        assert_eq!(wins("alice"), "WINS alice|");
    }
}
