//! Game server implementation.
//!
//! One task owns the whole server state and multiplexes every event
//! source with `select!`: the listener, per-connection reader tasks
//! (which forward raw bytes over a channel), the heartbeat timer and the
//! game-tick timer. Handlers run to completion before the next event is
//! pulled, so nothing here needs a lock.

use crate::config::Config;
use crate::game::Game;
use crate::player::{Player, PlayerId, PlayerMap};
use bytes::Bytes;
use protocol::{messages, ClientCommand, Direction, MAX_PLAYERS_IN_ROOM, NUMBER_OF_ROOMS};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::io::AsyncReadExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::mpsc;
use tokio::time::{interval_at, MissedTickBehavior};
use tracing::{debug, info, warn};

pub mod connection;

use connection::{ConnId, Connection};

/// Close connections that stay silent longer than this.
pub const CONNECTION_TIMEOUT: Duration = Duration::from_secs(10);
/// Destroy players whose last message is older than this.
pub const PLAYER_REMOVAL_TIMEOUT: Duration = Duration::from_secs(60);
/// Wall-time spacing of `PING|` probes.
pub const PING_INTERVAL: Duration = Duration::from_secs(2);
/// Cadence of the heartbeat scan.
pub const GLOBAL_TIMER_CHECK: Duration = Duration::from_secs(1);
/// Cadence of the game tick.
pub const GAME_SPEED: Duration = Duration::from_secs(1);
/// Listen backlog for the server socket.
const LISTEN_BACKLOG: u32 = 10;

/// Events forwarded from per-connection reader tasks to the event loop.
#[derive(Debug)]
enum SocketEvent {
    /// Bytes arrived on a client socket.
    Data { conn: ConnId, bytes: Bytes },
    /// The client socket reached EOF or failed.
    Closed { conn: ConnId },
}

/// Run the game server until the process is killed.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let listener = bind_listener(&config)?;
    info!("Listening on {}", listener.local_addr()?);
    serve(listener).await
}

/// Bind the server socket with `SO_REUSEADDR` and `SO_REUSEPORT` set.
pub fn bind_listener(config: &Config) -> anyhow::Result<TcpListener> {
    let addr: SocketAddr = format!("{}:{}", config.server.bind, config.server.port).parse()?;
    let socket = TcpSocket::new_v4()?;
    socket.set_reuseaddr(true)?;
    #[cfg(unix)]
    socket.set_reuseport(true)?;
    socket.bind(addr)?;
    Ok(socket.listen(LISTEN_BACKLOG)?)
}

/// The event loop proper; separated from [`run`] so tests can bind an
/// ephemeral port first.
pub async fn serve(listener: TcpListener) -> anyhow::Result<()> {
    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let mut server = Server::new(event_tx);

    let start = tokio::time::Instant::now();
    let mut heartbeat = interval_at(start + GLOBAL_TIMER_CHECK, GLOBAL_TIMER_CHECK);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut game_tick = interval_at(start + GAME_SPEED, GAME_SPEED);
    game_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            result = listener.accept() => match result {
                Ok((stream, addr)) => server.handle_new_connection(stream, addr),
                Err(e) => warn!("Failed to accept connection: {}", e),
            },
            Some(event) = event_rx.recv() => match event {
                SocketEvent::Data { conn, bytes } => server.handle_socket_read(conn, &bytes),
                SocketEvent::Closed { conn } => server.close_connection(conn),
            },
            _ = heartbeat.tick() => server.handle_timer(),
            _ = game_tick.tick() => server.handle_game_tick(),
        }
    }
}

/// Forward everything a client sends into the event channel.
async fn read_loop(conn: ConnId, mut stream: OwnedReadHalf, events: mpsc::UnboundedSender<SocketEvent>) {
    let mut buf = [0u8; 1024];
    loop {
        match stream.read(&mut buf).await {
            Ok(0) | Err(_) => {
                let _ = events.send(SocketEvent::Closed { conn });
                return;
            }
            Ok(n) => {
                let bytes = Bytes::copy_from_slice(&buf[..n]);
                if events.send(SocketEvent::Data { conn, bytes }).is_err() {
                    return;
                }
            }
        }
    }
}

/// The whole server state: rooms, players and connections.
///
/// Rooms and connections refer to players by id; `destroy_player` scrubs
/// an id out of every room and connection before dropping the entry.
pub struct Server {
    rooms: [Game; NUMBER_OF_ROOMS],
    players: PlayerMap,
    next_player_id: PlayerId,
    connections: HashMap<ConnId, Connection>,
    next_conn_id: ConnId,
    last_ping: Instant,
    event_tx: mpsc::UnboundedSender<SocketEvent>,
}

impl Server {
    fn new(event_tx: mpsc::UnboundedSender<SocketEvent>) -> Self {
        Self {
            rooms: std::array::from_fn(|_| Game::new()),
            players: PlayerMap::new(),
            next_player_id: 1,
            connections: HashMap::new(),
            next_conn_id: 1,
            last_ping: Instant::now(),
            event_tx,
        }
    }

    fn handle_new_connection(&mut self, stream: TcpStream, addr: SocketAddr) {
        let id = self.next_conn_id;
        self.next_conn_id += 1;

        let (read_half, write_half) = stream.into_split();
        let reader = tokio::spawn(read_loop(id, read_half, self.event_tx.clone()));
        let conn = Connection::new(id, addr, write_half, reader);
        info!("Client connected: {}", conn.display_name(&self.players));
        self.connections.insert(id, conn);
    }

    fn close_connection(&mut self, conn_id: ConnId) {
        if let Some(conn) = self.connections.remove(&conn_id) {
            info!("Closing connection with {}", conn.display_name(&self.players));
        }
    }

    /// Buffer newly read bytes, then process every complete frame.
    fn handle_socket_read(&mut self, conn_id: ConnId, bytes: &[u8]) {
        let prefix_ok = match self.connections.get_mut(&conn_id) {
            Some(conn) => {
                conn.buff.extend_from_slice(bytes);
                if conn.buff.len() < 4 {
                    return;
                }
                std::str::from_utf8(&conn.buff[..4]).map_or(false, protocol::keyword_is_known)
            }
            None => return,
        };
        if !prefix_ok {
            warn!("Unrecognized command prefix on connection {}", conn_id);
            self.close_connection(conn_id);
            return;
        }

        loop {
            let frame = match self.connections.get_mut(&conn_id) {
                Some(conn) => conn.next_frame(),
                None => return,
            };
            let Some(frame) = frame else {
                return;
            };
            match self.process_frame(conn_id, &frame) {
                Ok(()) => {
                    // mark the connection and its player as active
                    match self.connections.get_mut(&conn_id) {
                        Some(conn) => {
                            conn.touch();
                            if let Some(player) =
                                conn.player.and_then(|id| self.players.get_mut(&id))
                            {
                                player.touch();
                            }
                        }
                        // the frame closed its own connection (QUIT)
                        None => return,
                    }
                }
                Err(e) => {
                    warn!("Protocol violation on connection {}: {}", conn_id, e);
                    self.close_connection(conn_id);
                    return;
                }
            }
        }
    }

    /// Parse and dispatch one frame. An error closes the connection.
    fn process_frame(&mut self, conn_id: ConnId, frame: &str) -> anyhow::Result<()> {
        if let Some(conn) = self.connections.get(&conn_id) {
            debug!("[{}] {}", conn.display_name(&self.players), frame);
        }

        let command = ClientCommand::parse(frame)?;
        let player = self.connections.get(&conn_id).and_then(|c| c.player);
        match command {
            ClientCommand::Nick(nick) => self.handle_nick(conn_id, nick),
            ClientCommand::Pong => Ok(()),
            command => {
                let Some(player_id) = player else {
                    anyhow::bail!("{:?} before NICK", command);
                };
                self.handle_player_command(conn_id, player_id, command)
            }
        }
    }

    fn handle_player_command(
        &mut self,
        conn_id: ConnId,
        player_id: PlayerId,
        command: ClientCommand,
    ) -> anyhow::Result<()> {
        match command {
            ClientCommand::ListRooms => {
                let listing = messages::room_listing(&self.room_counts());
                self.send_to(conn_id, &listing);
                Ok(())
            }
            ClientCommand::Join(room_idx) => self.handle_join(conn_id, player_id, room_idx),
            ClientCommand::Leave => {
                self.remove_from_rooms(player_id);
                self.send_to(conn_id, messages::LEFT);
                Ok(())
            }
            ClientCommand::Start => self.handle_start(conn_id, player_id),
            ClientCommand::Move(dir) => self.handle_move(conn_id, player_id, dir),
            ClientCommand::Tack => {
                if let Some(player) = self.players.get_mut(&player_id) {
                    player.updated = true;
                }
                Ok(())
            }
            ClientCommand::Quit => {
                self.destroy_player(player_id);
                self.close_connection(conn_id);
                Ok(())
            }
            // dispatched before the player guard
            ClientCommand::Nick(_) | ClientCommand::Pong => Ok(()),
        }
    }

    /// Bind the connection to a new or existing player.
    ///
    /// An existing nickname displaces whatever connection still holds it,
    /// then replays the player's current view: the room lobby (plus a
    /// `TICK` when a match is running) or the room listing.
    fn handle_nick(&mut self, conn_id: ConnId, nick: String) -> anyhow::Result<()> {
        let already_bound = self
            .connections
            .get(&conn_id)
            .map_or(false, |c| c.player.is_some());
        if already_bound {
            anyhow::bail!("NICK on a connection that already has a player");
        }

        let existing = self
            .players
            .iter()
            .find(|(_, player)| player.nickname == nick)
            .map(|(id, _)| *id);

        match existing {
            None => {
                let player_id = self.next_player_id;
                self.next_player_id += 1;
                self.players.insert(player_id, Player::new(nick.clone()));
                if let Some(conn) = self.connections.get_mut(&conn_id) {
                    conn.player = Some(player_id);
                }
                info!("Player '{}' joined the server", nick);
                let listing = messages::room_listing(&self.room_counts());
                self.send_to(conn_id, &listing);
            }
            Some(player_id) => {
                let old_conn = self
                    .connections
                    .values()
                    .find(|c| c.player == Some(player_id))
                    .map(|c| c.id);
                if let Some(old_id) = old_conn {
                    info!("'{}' reconnected, displacing the old connection", nick);
                    self.close_connection(old_id);
                }
                if let Some(conn) = self.connections.get_mut(&conn_id) {
                    conn.player = Some(player_id);
                }

                match self.room_of(player_id) {
                    Some(room_idx) => {
                        let lobby = self.lobby_message(room_idx);
                        self.send_to(conn_id, &lobby);
                        if self.rooms[room_idx].active {
                            let tick =
                                messages::tick(&self.rooms[room_idx].full_state(&self.players));
                            self.send_to(conn_id, &tick);
                        }
                    }
                    None => {
                        let listing = messages::room_listing(&self.room_counts());
                        self.send_to(conn_id, &listing);
                    }
                }
            }
        }
        Ok(())
    }

    fn handle_join(
        &mut self,
        conn_id: ConnId,
        player_id: PlayerId,
        room_idx: usize,
    ) -> anyhow::Result<()> {
        // re-joining the current room just re-announces the lobby
        if self.rooms[room_idx].players.contains(&player_id) {
            let lobby = self.lobby_message(room_idx);
            self.broadcast_room(room_idx, &lobby);
            return Ok(());
        }
        if self.rooms[room_idx].players.len() >= MAX_PLAYERS_IN_ROOM {
            self.send_to(conn_id, messages::FULL);
            return Ok(());
        }

        self.remove_from_rooms(player_id);
        self.rooms[room_idx].players.push(player_id);
        let lobby = self.lobby_message(room_idx);
        self.broadcast_room(room_idx, &lobby);
        Ok(())
    }

    fn handle_start(&mut self, conn_id: ConnId, player_id: PlayerId) -> anyhow::Result<()> {
        let Some(room_idx) = self.room_of(player_id) else {
            anyhow::bail!("STRT from a player that is in no room");
        };

        let started = self.rooms[room_idx].hatch(&mut self.players);
        if !started {
            self.send_to(conn_id, messages::START_FAIL);
            return Ok(());
        }

        info!("room {}: match started", room_idx);
        self.send_to(conn_id, messages::START_OK);
        let tick = messages::tick(&self.rooms[room_idx].full_state(&self.players));
        self.broadcast_room(room_idx, &tick);
        Ok(())
    }

    /// Set the intent direction unless it would reverse the last executed
    /// move. The reply is sent either way.
    fn handle_move(
        &mut self,
        conn_id: ConnId,
        player_id: PlayerId,
        dir: Direction,
    ) -> anyhow::Result<()> {
        if let Some(player) = self.players.get_mut(&player_id) {
            if player.last_move_dir != Some(dir.opposite()) {
                player.dir = dir;
            }
        }
        self.send_to(conn_id, messages::MOVD);
        Ok(())
    }

    /// Heartbeat pass: connection idle scan, player expiry, pings.
    fn handle_timer(&mut self) {
        let now = Instant::now();

        let stale: Vec<ConnId> = self
            .connections
            .values()
            .filter(|conn| now.duration_since(conn.last_active) > CONNECTION_TIMEOUT)
            .map(|conn| conn.id)
            .collect();
        for conn_id in stale {
            self.close_connection(conn_id);
        }

        let expired: Vec<PlayerId> = self
            .players
            .iter()
            .filter(|(_, player)| now.duration_since(player.last_active) > PLAYER_REMOVAL_TIMEOUT)
            .map(|(id, _)| *id)
            .collect();
        for player_id in expired {
            self.destroy_player(player_id);
        }

        if now.duration_since(self.last_ping) > PING_INTERVAL {
            for conn in self.connections.values() {
                conn.send(messages::PING);
            }
            self.last_ping = now;
        }
    }

    /// Game pass: advance every active room that has all acks in.
    fn handle_game_tick(&mut self) {
        for room_idx in 0..self.rooms.len() {
            if !self.rooms[room_idx].active {
                continue;
            }

            let waiting_on: Vec<String> = self.rooms[room_idx]
                .players
                .iter()
                .filter_map(|id| self.players.get(id))
                .filter(|player| !player.updated)
                .map(|player| player.nickname.clone())
                .collect();
            if !waiting_on.is_empty() {
                self.rooms[room_idx].waiting = true;
                let msg = messages::wait(waiting_on.iter().map(String::as_str));
                // only players who have acknowledged get the WAIT
                for player_id in &self.rooms[room_idx].players {
                    let acked = self.players.get(player_id).map_or(false, |p| p.updated);
                    if acked {
                        if let Some(conn) = self.connection_of(*player_id) {
                            conn.send(&msg);
                        }
                    }
                }
                continue;
            }
            self.rooms[room_idx].waiting = false;

            debug!("room {}: {}", room_idx, self.rooms[room_idx].full_state(&self.players));
            debug!("room {}: {}", room_idx, self.rooms[room_idx].current_move(&self.players));

            let game_continues = self.rooms[room_idx].slither(&mut self.players);
            let tick = messages::tick(&self.rooms[room_idx].full_state(&self.players));
            self.broadcast_room(room_idx, &tick);

            if !game_continues {
                let survivor = self.rooms[room_idx]
                    .players
                    .iter()
                    .filter_map(|id| self.players.get(id))
                    .find(|player| player.alive);
                match survivor {
                    Some(winner) => {
                        info!("room {}: '{}' wins", room_idx, winner.nickname);
                        let msg = messages::wins(&winner.nickname);
                        self.broadcast_room(room_idx, &msg);
                    }
                    None => {
                        info!("room {}: draw", room_idx);
                        self.broadcast_room(room_idx, messages::DRAW);
                    }
                }
                self.rooms[room_idx].active = false;
            }
        }
    }

    /// Take the player out of whichever room holds it, announcing the new
    /// membership to the remaining players. The grid is left untouched,
    /// so a mid-match leaver's snake stays on the board as an obstacle.
    fn remove_from_rooms(&mut self, player_id: PlayerId) {
        for room_idx in 0..self.rooms.len() {
            let members = &mut self.rooms[room_idx].players;
            let before = members.len();
            members.retain(|id| *id != player_id);
            if members.len() != before {
                let lobby = self.lobby_message(room_idx);
                self.broadcast_room(room_idx, &lobby);
            }
        }
    }

    /// Remove a player everywhere: rooms, connection bindings, the table.
    fn destroy_player(&mut self, player_id: PlayerId) {
        self.remove_from_rooms(player_id);
        for conn in self.connections.values_mut() {
            if conn.player == Some(player_id) {
                conn.player = None;
            }
        }
        if let Some(player) = self.players.remove(&player_id) {
            info!("Player '{}' removed", player.nickname);
        }
    }

    fn room_of(&self, player_id: PlayerId) -> Option<usize> {
        self.rooms
            .iter()
            .position(|room| room.players.contains(&player_id))
    }

    fn connection_of(&self, player_id: PlayerId) -> Option<&Connection> {
        self.connections
            .values()
            .find(|conn| conn.player == Some(player_id))
    }

    fn room_counts(&self) -> Vec<usize> {
        self.rooms.iter().map(|room| room.players.len()).collect()
    }

    fn lobby_message(&self, room_idx: usize) -> String {
        messages::lobby(
            self.rooms[room_idx]
                .players
                .iter()
                .filter_map(|id| self.players.get(id))
                .map(|player| player.nickname.as_str()),
        )
    }

    fn send_to(&self, conn_id: ConnId, msg: &str) {
        if let Some(conn) = self.connections.get(&conn_id) {
            conn.send(msg);
        }
    }

    /// Write a frame to every room member with a live connection, in
    /// join order. Members without a connection are skipped silently.
    fn broadcast_room(&self, room_idx: usize, msg: &str) {
        for player_id in &self.rooms[room_idx].players {
            if let Some(conn) = self.connection_of(*player_id) {
                conn.send(msg);
            }
        }
    }
}
