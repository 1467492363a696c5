//! Per-room game state and tick simulation.

use crate::player::{PlayerId, PlayerMap};
use crate::rng::GameRng;
use fixedbitset::FixedBitSet;
use protocol::{Direction, Position, GRID_SIZE, INITIAL_SNAKE_LENGTH};

const GRID_CELLS: usize = (GRID_SIZE * GRID_SIZE) as usize;

/// One game room: its members, the occupancy board and the apple.
///
/// The room holds player ids only; callers pass the server's player table
/// into every operation that needs the snakes themselves.
#[derive(Debug)]
pub struct Game {
    /// Members in join order.
    pub players: Vec<PlayerId>,
    /// Occupancy bitboard, row-major. A set bit means some snake segment
    /// holds the tile; dead snakes keep their bits until the next `hatch`.
    grid: FixedBitSet,
    /// A match is in progress.
    pub active: bool,
    /// The last tick stalled on unacknowledged players.
    pub waiting: bool,
    /// Apple position; meaningful while `active`.
    pub apple: Position,
    rng: GameRng,
}

impl Default for Game {
    fn default() -> Self {
        Self::new()
    }
}

impl Game {
    pub fn new() -> Self {
        Self::with_rng(GameRng::from_random())
    }

    /// Build a room over a caller-provided random source.
    pub fn with_rng(rng: GameRng) -> Self {
        Self {
            players: Vec::new(),
            grid: FixedBitSet::with_capacity(GRID_CELLS),
            active: false,
            waiting: false,
            apple: Position::ZERO,
            rng,
        }
    }

    fn tile_index(pos: Position) -> usize {
        (pos.y * GRID_SIZE + pos.x) as usize
    }

    fn in_bounds(pos: Position) -> bool {
        pos.x >= 0 && pos.x < GRID_SIZE && pos.y >= 0 && pos.y < GRID_SIZE
    }

    /// True iff no member's body occupies `pos`.
    ///
    /// Consults the bodies rather than the bitboard so it can run while
    /// the board is being rebuilt during `hatch`.
    pub fn is_empty(&self, players: &PlayerMap, pos: Position) -> bool {
        Self::tile_is_free(&self.players, players, pos)
    }

    fn tile_is_free(members: &[PlayerId], players: &PlayerMap, pos: Position) -> bool {
        members
            .iter()
            .filter_map(|id| players.get(id))
            .all(|player| player.body.iter().all(|part| *part != pos))
    }

    /// Rejection-sample an unoccupied tile.
    fn random_empty_tile(&mut self, players: &PlayerMap) -> Position {
        loop {
            let pos = Position::new(self.rng.below(GRID_SIZE), self.rng.below(GRID_SIZE));
            if Self::tile_is_free(&self.players, players, pos) {
                return pos;
            }
        }
    }

    fn alive_count(&self, players: &PlayerMap) -> usize {
        self.players
            .iter()
            .filter_map(|id| players.get(id))
            .filter(|player| player.alive)
            .count()
    }

    /// Start a match: reset every member to a one-tile snake on its own
    /// random tile with a random initial direction, then spawn the apple.
    ///
    /// Returns false when the room is already running or has fewer than
    /// two members.
    pub fn hatch(&mut self, players: &mut PlayerMap) -> bool {
        if self.players.len() < 2 || self.active {
            return false;
        }

        self.grid.clear();

        let members = self.players.clone();
        for id in members {
            if let Some(player) = players.get_mut(&id) {
                player.body.clear();
                player.length = INITIAL_SNAKE_LENGTH;
            } else {
                continue;
            }
            let pos = self.random_empty_tile(players);
            let dir = self.rng.direction();
            self.grid.insert(Self::tile_index(pos));
            if let Some(player) = players.get_mut(&id) {
                player.dir = dir;
                player.body.push_front(pos);
                player.alive = true;
            }
        }

        self.apple = self.random_empty_tile(players);
        self.active = true;
        true
    }

    /// Advance the match one tick. Returns true while the match continues.
    ///
    /// Dead snakes stay on the board: their cells are never cleared, so a
    /// corpse remains a solid obstacle until the next `hatch`.
    pub fn slither(&mut self, players: &mut PlayerMap) -> bool {
        if self.alive_count(players) < 2 {
            return false;
        }

        // Advance the heads; stepping off the board kills without
        // extending the body.
        let mut new_heads: Vec<Position> = Vec::new();
        for id in &self.players {
            let Some(player) = players.get_mut(id) else {
                continue;
            };
            if !player.alive {
                continue;
            }
            player.updated = false;
            let Some(&head) = player.body.front() else {
                continue;
            };
            let pos = head + player.dir.delta();
            if !Self::in_bounds(pos) {
                player.alive = false;
            } else {
                new_heads.push(pos);
                player.body.push_front(pos);
                player.last_move_dir = Some(player.dir);
            }
        }

        // Collisions against everything that was solid before this tick.
        // The new heads are not on the board yet; meeting another new head
        // is handled below.
        for id in &self.players {
            let Some(player) = players.get_mut(id) else {
                continue;
            };
            if !player.alive {
                continue;
            }
            let Some(&head) = player.body.front() else {
                continue;
            };
            if self.grid.contains(Self::tile_index(head)) {
                player.alive = false;
            }
        }

        // Head-to-head: every pair meeting on one tile dies together.
        let members = self.players.clone();
        for outer in &members {
            let outer_head = match players.get(outer) {
                Some(player) if player.alive => player.body.front().copied(),
                _ => None,
            };
            let Some(outer_head) = outer_head else {
                continue;
            };
            for inner in &members {
                if inner == outer {
                    continue;
                }
                let collided = players
                    .get(inner)
                    .map_or(false, |p| p.alive && p.body.front() == Some(&outer_head));
                if collided {
                    if let Some(player) = players.get_mut(outer) {
                        player.alive = false;
                    }
                    if let Some(player) = players.get_mut(inner) {
                        player.alive = false;
                    }
                }
            }
        }

        for head in &new_heads {
            self.grid.insert(Self::tile_index(*head));
        }

        // The apple grows its eater; everyone else shrinks back to their
        // target length.
        let mut apple_eaten = false;
        for id in &self.players {
            let Some(player) = players.get_mut(id) else {
                continue;
            };
            if player.alive && player.body.front() == Some(&self.apple) {
                player.apples += 1;
                player.length += 1;
                apple_eaten = true;
            } else if player.body.len() > player.length {
                if let Some(tail) = player.body.pop_back() {
                    self.grid.set(Self::tile_index(tail), false);
                }
            }
        }

        if apple_eaten {
            self.apple = self.random_empty_tile(players);
        }

        self.alive_count(players) >= 2
    }

    /// Encode the apple position and every member's intent direction.
    ///
    /// Format: `"<ax> <ay>"` then `" <nick> <U|D|L|R>"` per member.
    pub fn current_move(&self, players: &PlayerMap) -> String {
        let mut out = format!("{} {}", self.apple.x, self.apple.y);
        for player in self.players.iter().filter_map(|id| players.get(id)) {
            out.push_str(&format!(" {} {}", player.nickname, player.dir.letter()));
        }
        out
    }

    /// Encode the apple plus every snake with a body: head tile, `H`/`E`
    /// liveness marker and the body trail as direction letters leading
    /// away from the head.
    pub fn full_state(&self, players: &PlayerMap) -> String {
        let mut out = format!("{} {}", self.apple.x, self.apple.y);
        for player in self.players.iter().filter_map(|id| players.get(id)) {
            let Some(&head) = player.body.front() else {
                continue;
            };
            out.push_str(&format!(" {} {} {} ", player.nickname, head.x, head.y));
            out.push(if player.alive { 'H' } else { 'E' });
            let mut prev = head;
            for &part in &player.body {
                if part == prev {
                    continue;
                }
                if let Some(dir) = Direction::between(prev, part) {
                    out.push(dir.letter());
                }
                prev = part;
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::player::Player;

    fn player_map(nicks: &[&str]) -> (PlayerMap, Vec<PlayerId>) {
        let mut players = PlayerMap::new();
        let mut ids = Vec::new();
        for (i, nick) in nicks.iter().enumerate() {
            players.insert(i as PlayerId, Player::new((*nick).to_string()));
            ids.push(i as PlayerId);
        }
        (players, ids)
    }

    fn snake(player: &mut Player, dir: Direction, body: &[(i32, i32)]) {
        player.alive = true;
        player.dir = dir;
        player.last_move_dir = Some(dir);
        player.updated = true;
        player.body = body.iter().map(|&(x, y)| Position::new(x, y)).collect();
        player.length = body.len();
    }

    /// An active room whose grid mirrors the hand-laid bodies.
    fn staged_game(players: &PlayerMap, ids: &[PlayerId], apple: Position) -> Game {
        let mut game = Game::with_rng(GameRng::new(7));
        game.players = ids.to_vec();
        game.active = true;
        game.apple = apple;
        for player in ids.iter().filter_map(|id| players.get(id)) {
            for &part in &player.body {
                game.grid.insert(Game::tile_index(part));
            }
        }
        game
    }

    #[test]
    fn test_hatch_needs_two_players() {
        let (mut players, ids) = player_map(&["alice"]);
        let mut game = Game::with_rng(GameRng::new(1));
        game.players = ids;
        assert!(!game.hatch(&mut players));
        assert!(!game.active);
    }

    #[test]
    fn test_hatch_rejects_running_room() {
        let (mut players, ids) = player_map(&["alice", "bob"]);
        let mut game = Game::with_rng(GameRng::new(1));
        game.players = ids;
        game.active = true;
        assert!(!game.hatch(&mut players));
    }

    #[test]
    fn test_hatch_places_disjoint_snakes() {
        let (mut players, ids) = player_map(&["alice", "bob", "carol", "dave"]);
        let mut game = Game::with_rng(GameRng::new(99));
        game.players = ids.clone();
        assert!(game.hatch(&mut players));
        assert!(game.active);

        let mut heads = Vec::new();
        for player in ids.iter().filter_map(|id| players.get(id)) {
            assert!(player.alive);
            assert_eq!(player.body.len(), 1);
            assert_eq!(player.length, INITIAL_SNAKE_LENGTH);
            let head = player.body[0];
            assert!(Game::in_bounds(head));
            heads.push(head);
        }
        heads.sort_by_key(|p| (p.x, p.y));
        heads.dedup();
        assert_eq!(heads.len(), 4);
        assert!(game.is_empty(&players, game.apple));
    }

    #[test]
    fn test_wall_collision_kills_without_growing() {
        let (mut players, ids) = player_map(&["alice", "bob", "carol"]);
        snake(players.get_mut(&0).unwrap(), Direction::Left, &[(0, 5), (1, 5)]);
        snake(players.get_mut(&1).unwrap(), Direction::Down, &[(8, 1), (8, 0)]);
        snake(players.get_mut(&2).unwrap(), Direction::Down, &[(4, 4), (4, 3)]);
        let mut game = staged_game(&players, &ids, Position::new(9, 9));

        assert!(game.slither(&mut players));
        let alice = &players[&0];
        assert!(!alice.alive);
        assert_eq!(alice.body.len(), 2);
        assert_eq!(alice.body[0], Position::new(0, 5));
    }

    #[test]
    fn test_head_to_head_draw() {
        let (mut players, ids) = player_map(&["alice", "bob"]);
        snake(players.get_mut(&0).unwrap(), Direction::Right, &[(2, 2)]);
        snake(players.get_mut(&1).unwrap(), Direction::Left, &[(4, 2)]);
        let mut game = staged_game(&players, &ids, Position::new(9, 9));

        assert!(!game.slither(&mut players));
        assert!(!players[&0].alive);
        assert!(!players[&1].alive);
    }

    #[test]
    fn test_three_way_head_collision_kills_all() {
        let (mut players, ids) = player_map(&["alice", "bob", "carol"]);
        snake(players.get_mut(&0).unwrap(), Direction::Right, &[(2, 2)]);
        snake(players.get_mut(&1).unwrap(), Direction::Left, &[(4, 2)]);
        snake(players.get_mut(&2).unwrap(), Direction::Down, &[(3, 1)]);
        let mut game = staged_game(&players, &ids, Position::new(9, 9));

        assert!(!game.slither(&mut players));
        for id in ids {
            assert!(!players[&id].alive);
        }
    }

    #[test]
    fn test_running_into_a_body_kills() {
        // Alice steps into the middle of Bob's body.
        let (mut players, ids) = player_map(&["alice", "bob"]);
        snake(players.get_mut(&0).unwrap(), Direction::Right, &[(2, 4)]);
        snake(
            players.get_mut(&1).unwrap(),
            Direction::Down,
            &[(3, 5), (3, 4), (3, 3)],
        );
        let mut game = staged_game(&players, &ids, Position::new(9, 9));

        assert!(!game.slither(&mut players));
        assert!(!players[&0].alive);
        assert!(players[&1].alive);
    }

    #[test]
    fn test_vacated_tail_tile_is_still_solid() {
        // Bob's tail at (3,3) pops this very tick, but the old body counts
        // as solid during the collision check, so Alice dies on it.
        let (mut players, ids) = player_map(&["alice", "bob"]);
        snake(players.get_mut(&0).unwrap(), Direction::Right, &[(2, 3)]);
        snake(
            players.get_mut(&1).unwrap(),
            Direction::Down,
            &[(3, 5), (3, 4), (3, 3)],
        );
        players.get_mut(&1).unwrap().length = 3;
        let mut game = staged_game(&players, &ids, Position::new(9, 9));

        assert!(!game.slither(&mut players));
        assert!(!players[&0].alive);
        let bob = &players[&1];
        assert!(bob.alive);
        assert_eq!(bob.body.len(), 3);
        assert_eq!(*bob.body.back().unwrap(), Position::new(3, 4));
    }

    #[test]
    fn test_dead_body_stays_solid() {
        let (mut players, ids) = player_map(&["alice", "bob", "carol"]);
        snake(players.get_mut(&0).unwrap(), Direction::Right, &[(2, 3)]);
        snake(
            players.get_mut(&1).unwrap(),
            Direction::Down,
            &[(3, 4), (3, 3)],
        );
        players.get_mut(&1).unwrap().alive = false;
        snake(players.get_mut(&2).unwrap(), Direction::Up, &[(7, 7), (7, 8)]);
        let mut game = staged_game(&players, &ids, Position::new(9, 9));

        // Alice walks into Bob's corpse and dies; only Carol survives.
        assert!(!game.slither(&mut players));
        assert!(!players[&0].alive);
        assert!(players[&2].alive);
    }

    #[test]
    fn test_apple_pickup_grows_and_respawns() {
        let (mut players, ids) = player_map(&["alice", "bob"]);
        snake(players.get_mut(&0).unwrap(), Direction::Right, &[(2, 2)]);
        players.get_mut(&0).unwrap().length = INITIAL_SNAKE_LENGTH;
        snake(players.get_mut(&1).unwrap(), Direction::Down, &[(7, 7)]);
        players.get_mut(&1).unwrap().length = INITIAL_SNAKE_LENGTH;
        let apple = Position::new(3, 2);
        let mut game = staged_game(&players, &ids, apple);

        assert!(game.slither(&mut players));
        let alice = &players[&0];
        assert_eq!(alice.apples, 1);
        assert_eq!(alice.length, INITIAL_SNAKE_LENGTH + 1);
        assert_eq!(alice.body[0], Position::new(3, 2));
        assert_eq!(alice.body[1], Position::new(2, 2));

        // the apple moved to a tile no body occupies
        assert_ne!(game.apple, apple);
        assert!(game.is_empty(&players, game.apple));

        let state = game.full_state(&players);
        assert!(state.starts_with(&format!("{} {}", game.apple.x, game.apple.y)));
        assert!(state.contains("alice 3 2 HL"));
    }

    #[test]
    fn test_tail_popped_when_over_length() {
        let (mut players, ids) = player_map(&["alice", "bob"]);
        snake(
            players.get_mut(&0).unwrap(),
            Direction::Right,
            &[(3, 3), (2, 3), (1, 3)],
        );
        snake(players.get_mut(&1).unwrap(), Direction::Down, &[(7, 1)]);
        let mut game = staged_game(&players, &ids, Position::new(9, 9));

        assert!(game.slither(&mut players));
        let alice = &players[&0];
        assert_eq!(alice.body.len(), 3);
        assert_eq!(alice.body[0], Position::new(4, 3));
        assert_eq!(*alice.body.back().unwrap(), Position::new(2, 3));
        // the vacated tile is walkable again
        assert!(game.is_empty(&players, Position::new(1, 3)));
    }

    #[test]
    fn test_slither_clears_ack_flags() {
        let (mut players, ids) = player_map(&["alice", "bob"]);
        snake(players.get_mut(&0).unwrap(), Direction::Right, &[(2, 2)]);
        snake(players.get_mut(&1).unwrap(), Direction::Down, &[(7, 1)]);
        let mut game = staged_game(&players, &ids, Position::new(9, 9));

        assert!(game.slither(&mut players));
        assert!(!players[&0].updated);
        assert!(!players[&1].updated);
    }

    #[test]
    fn test_slither_stops_below_two_alive() {
        let (mut players, ids) = player_map(&["alice", "bob"]);
        snake(players.get_mut(&0).unwrap(), Direction::Right, &[(2, 2)]);
        snake(players.get_mut(&1).unwrap(), Direction::Down, &[(7, 1)]);
        players.get_mut(&1).unwrap().alive = false;
        let mut game = staged_game(&players, &ids, Position::new(9, 9));

        let before = players[&0].body.clone();
        assert!(!game.slither(&mut players));
        // nothing moved
        assert_eq!(players[&0].body, before);
    }

    #[test]
    fn test_current_move_encoding() {
        let (mut players, ids) = player_map(&["alice", "bob"]);
        snake(players.get_mut(&0).unwrap(), Direction::Up, &[(2, 2)]);
        snake(players.get_mut(&1).unwrap(), Direction::Right, &[(5, 5)]);
        let game = staged_game(&players, &ids, Position::new(1, 2));

        assert_eq!(game.current_move(&players), "1 2 alice U bob R");
    }

    #[test]
    fn test_full_state_trail_reconstructs_body() {
        let (mut players, ids) = player_map(&["alice", "bob"]);
        // head (3,4), bending right then up
        snake(
            players.get_mut(&0).unwrap(),
            Direction::Down,
            &[(3, 4), (3, 3), (4, 3), (4, 2)],
        );
        snake(players.get_mut(&1).unwrap(), Direction::Down, &[(8, 8)]);
        let game = staged_game(&players, &ids, Position::new(0, 0));

        let state = game.full_state(&players);
        assert_eq!(state, "0 0 alice 3 4 HURU bob 8 8 H");

        // decode the trail by walking the deltas from the head
        let alice = &players[&0];
        let mut decoded = vec![alice.body[0]];
        for letter in "URU".chars() {
            let dir = Direction::from_letter(letter).unwrap();
            decoded.push(*decoded.last().unwrap() + dir.delta());
        }
        let body: Vec<Position> = alice.body.iter().copied().collect();
        assert_eq!(decoded, body);
    }

    #[test]
    fn test_full_state_skips_bodyless_players() {
        let (mut players, ids) = player_map(&["alice", "bob"]);
        snake(players.get_mut(&0).unwrap(), Direction::Up, &[(2, 2)]);
        let game = staged_game(&players, &ids, Position::new(4, 4));

        assert_eq!(game.full_state(&players), "4 4 alice 2 2 H");
    }

    #[test]
    fn test_full_state_marks_dead_snakes() {
        let (mut players, ids) = player_map(&["alice"]);
        snake(players.get_mut(&0).unwrap(), Direction::Up, &[(2, 2), (2, 3)]);
        players.get_mut(&0).unwrap().alive = false;
        let game = staged_game(&players, &ids, Position::new(4, 4));

        assert_eq!(game.full_state(&players), "4 4 alice 2 2 ED");
    }

    #[test]
    fn test_is_empty_consults_bodies() {
        let (mut players, ids) = player_map(&["alice"]);
        snake(players.get_mut(&0).unwrap(), Direction::Up, &[(2, 2), (2, 3)]);
        let game = staged_game(&players, &ids, Position::new(4, 4));

        assert!(!game.is_empty(&players, Position::new(2, 3)));
        assert!(game.is_empty(&players, Position::new(5, 5)));
    }

    #[test]
    fn test_grid_matches_bodies_after_ticks() {
        let (mut players, ids) = player_map(&["alice", "bob"]);
        snake(
            players.get_mut(&0).unwrap(),
            Direction::Right,
            &[(1, 1), (0, 1)],
        );
        snake(
            players.get_mut(&1).unwrap(),
            Direction::Down,
            &[(5, 5), (5, 4)],
        );
        let mut game = staged_game(&players, &ids, Position::new(9, 0));

        for _ in 0..3 {
            if !game.slither(&mut players) {
                break;
            }
            for y in 0..GRID_SIZE {
                for x in 0..GRID_SIZE {
                    let pos = Position::new(x, y);
                    let occupied = !game.is_empty(&players, pos);
                    assert_eq!(game.grid.contains(Game::tile_index(pos)), occupied);
                }
            }
        }
    }

    #[test]
    fn test_missing_member_treated_as_absent() {
        let (mut players, mut ids) = player_map(&["alice", "bob"]);
        snake(players.get_mut(&0).unwrap(), Direction::Right, &[(2, 2)]);
        snake(players.get_mut(&1).unwrap(), Direction::Down, &[(7, 1)]);
        ids.push(42); // never inserted into the map
        let mut game = staged_game(&players, &ids, Position::new(9, 9));

        assert!(game.slither(&mut players));
        assert_eq!(players[&0].body[0], Position::new(3, 2));
    }
}
