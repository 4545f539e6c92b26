//! Per-connection session state and the session table (§4.5). Guards
//! `m_clients` (the session map) and the player record map behind one mutex
//! each; never held across a call into the streaming mutex (§5 lock
//! ordering).

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use pickaxe_protocol::packets::PlayerSnapshotEntry;
use pickaxe_protocol::transport::ConnId;
use pickaxe_types::{ChunkCoord, ClientId, AUTO_NAME_NAMESPACE, VIEW_DISTANCE_CLAMP_MIN};

use crate::player::PlayerRecord;

/// `sentAt` for a pending chunk send. `None` stands for "epoch" — a
/// hash-mismatched ACK resets an entry to this so the next update retries it
/// immediately instead of waiting out the retry cooldown (§4.4 ACK
/// reconciliation).
pub type PendingAt = Option<Instant>;

pub struct Session {
    pub conn: ConnId,
    pub username: Option<String>,
    pub player_id: Option<ClientId>,
    pub streamed: HashSet<ChunkCoord>,
    pub pending: HashMap<ChunkCoord, PendingAt>,
    pub pending_hash: HashMap<ChunkCoord, u32>,
    pub interest_center: Option<ChunkCoord>,
    pub view_distance: u16,
    pub has_chunk_interest: bool,
    pub last_heartbeat: Instant,
}

impl Session {
    fn new(conn: ConnId) -> Self {
        Self {
            conn,
            username: None,
            player_id: None,
            streamed: HashSet::new(),
            pending: HashMap::new(),
            pending_hash: HashMap::new(),
            interest_center: None,
            view_distance: VIEW_DISTANCE_CLAMP_MIN,
            has_chunk_interest: false,
            last_heartbeat: Instant::now(),
        }
    }
}

pub struct ConnectOutcome {
    pub username: String,
    pub player_id: ClientId,
}

pub struct EvictedSession {
    pub username: Option<String>,
    pub player_id: Option<ClientId>,
}

pub struct SessionTable {
    sessions: Mutex<HashMap<ConnId, Session>>,
    players: Mutex<HashMap<ClientId, PlayerRecord>>,
    next_player_id: AtomicU64,
    next_auto_name: AtomicU32,
}

impl SessionTable {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            players: Mutex::new(HashMap::new()),
            next_player_id: AtomicU64::new(1),
            next_auto_name: AtomicU32::new(0),
        }
    }

    /// Adds a session with an empty username for a newly accepted connection.
    pub fn accept(&self, conn: ConnId) {
        self.sessions.lock().unwrap().entry(conn).or_insert_with(|| Session::new(conn));
    }

    /// Allocates an unused `player####` auto-name and a player record at
    /// `(0, 60, 0)`, attaching both to the session. The requested username in
    /// `ConnectRequest` is decoded but deliberately never used — see the
    /// open-question note on this in DESIGN.md. Returns `None` if the
    /// session vanished in the meantime (connection closed mid-handshake) or
    /// the auto-name namespace is exhausted.
    pub fn on_connect_request(&self, conn: ConnId) -> Option<ConnectOutcome> {
        let used: HashSet<String> = {
            let sessions = self.sessions.lock().unwrap();
            sessions.values().filter_map(|s| s.username.clone()).collect()
        };
        let mut username = None;
        for _ in 0..AUTO_NAME_NAMESPACE {
            let n = self.next_auto_name.fetch_add(1, Ordering::Relaxed) % AUTO_NAME_NAMESPACE;
            let candidate = format!("player{n:04}");
            if !used.contains(&candidate) {
                username = Some(candidate);
                break;
            }
        }
        let username = username?;

        let player_id = self.next_player_id.fetch_add(1, Ordering::Relaxed);
        {
            let mut sessions = self.sessions.lock().unwrap();
            let session = sessions.get_mut(&conn)?;
            session.username = Some(username.clone());
            session.player_id = Some(player_id);
            session.last_heartbeat = Instant::now();
        }
        self.players.lock().unwrap().insert(player_id, PlayerRecord::spawn(player_id, conn));
        Some(ConnectOutcome { username, player_id })
    }

    pub fn refresh_heartbeat(&self, conn: ConnId) {
        let player_id = {
            let mut sessions = self.sessions.lock().unwrap();
            let Some(session) = sessions.get_mut(&conn) else { return };
            session.last_heartbeat = Instant::now();
            session.player_id
        };
        if let Some(player_id) = player_id {
            if let Some(player) = self.players.lock().unwrap().get_mut(&player_id) {
                player.last_heartbeat = Instant::now();
            }
        }
    }

    pub fn is_registered(&self, conn: ConnId) -> bool {
        self.sessions
            .lock()
            .unwrap()
            .get(&conn)
            .is_some_and(|s| s.username.is_some())
    }

    pub fn username_of(&self, conn: ConnId) -> Option<String> {
        self.sessions.lock().unwrap().get(&conn).and_then(|s| s.username.clone())
    }

    pub fn player_id_of(&self, conn: ConnId) -> Option<ClientId> {
        self.sessions.lock().unwrap().get(&conn).and_then(|s| s.player_id)
    }

    /// Controlled read access to a session, used by the streaming pipeline's
    /// pending checks.
    pub fn with_session<R>(&self, conn: ConnId, f: impl FnOnce(&Session) -> R) -> Option<R> {
        self.sessions.lock().unwrap().get(&conn).map(f)
    }

    /// Controlled mutable access to a session, used by `update_for_client`.
    pub fn with_session_mut<R>(&self, conn: ConnId, f: impl FnOnce(&mut Session) -> R) -> Option<R> {
        self.sessions.lock().unwrap().get_mut(&conn).map(f)
    }

    pub fn apply_position_update(&self, conn: ConnId, position: pickaxe_types::Vec3d, velocity: pickaxe_types::Vec3f) {
        let player_id = self.sessions.lock().unwrap().get(&conn).and_then(|s| s.player_id);
        if let Some(player_id) = player_id {
            if let Some(player) = self.players.lock().unwrap().get_mut(&player_id) {
                player.apply_position_update(position, velocity);
            }
        }
    }

    pub fn integrate_players(&self, dt: f64) {
        for player in self.players.lock().unwrap().values_mut() {
            player.integrate(dt);
        }
    }

    /// Every session whose transport-side connection differs from `except`,
    /// paired with its connection id — used for `ClientConnect`/
    /// `ClientDisconnect`/chat broadcast.
    pub fn all_connections_except(&self, except: ConnId) -> Vec<ConnId> {
        self.sessions.lock().unwrap().keys().filter(|c| **c != except).copied().collect()
    }

    pub fn all_connections(&self) -> Vec<ConnId> {
        self.sessions.lock().unwrap().keys().copied().collect()
    }

    /// Removes the session and its player record. Returns `None` if `conn`
    /// was already gone (double-eviction, tolerated per §7 "shutdown race").
    pub fn evict(&self, conn: ConnId) -> Option<EvictedSession> {
        let session = self.sessions.lock().unwrap().remove(&conn)?;
        if let Some(player_id) = session.player_id {
            self.players.lock().unwrap().remove(&player_id);
        }
        Some(EvictedSession { username: session.username, player_id: session.player_id })
    }

    /// Connections whose last heartbeat predates `now - timeout`.
    pub fn stale_heartbeats(&self, timeout: Duration) -> Vec<ConnId> {
        let now = Instant::now();
        self.sessions
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, s)| now.duration_since(s.last_heartbeat) > timeout)
            .map(|(c, _)| *c)
            .collect()
    }

    fn all_players_snapshot(&self) -> Vec<PlayerSnapshotEntry> {
        self.players
            .lock()
            .unwrap()
            .values()
            .map(|p| PlayerSnapshotEntry {
                id: p.id,
                px: p.position.x as f32,
                py: p.position.y as f32,
                pz: p.position.z as f32,
                vx: p.velocity.x,
                vy: p.velocity.y,
                vz: p.velocity.z,
                yaw: p.yaw,
                pitch: p.pitch,
                on_ground: p.on_ground,
            })
            .collect()
    }

    /// Every session with a player id, paired with that player id — the
    /// recipients of the 100 ms snapshot broadcast.
    pub fn sessions_with_player(&self) -> Vec<(ConnId, ClientId)> {
        self.sessions
            .lock()
            .unwrap()
            .values()
            .filter_map(|s| s.player_id.map(|pid| (s.conn, pid)))
            .collect()
    }

    /// `None` stands for "recipient unknown" (§4.5: empty if the recipient's
    /// own player record is gone) — the idiomatic sum-type rendering of the
    /// source's empty-snapshot sentinel (§9 redesign note).
    pub fn build_snapshot_for(&self, player_id: ClientId) -> Option<Vec<PlayerSnapshotEntry>> {
        if !self.players.lock().unwrap().contains_key(&player_id) {
            return None;
        }
        Some(self.all_players_snapshot())
    }
}

impl Default for SessionTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> ConnId {
        format!("127.0.0.1:{port}").parse().unwrap()
    }

    #[test]
    fn connect_request_allocates_auto_name_ignoring_requested_username() {
        let table = SessionTable::new();
        let conn = addr(1);
        table.accept(conn);
        let outcome = table.on_connect_request(conn).unwrap();
        assert_eq!(outcome.username, "player0000");
        assert_eq!(table.username_of(conn), Some("player0000".into()));
    }

    #[test]
    fn auto_names_skip_ones_already_in_use() {
        let table = SessionTable::new();
        let a = addr(1);
        let b = addr(2);
        table.accept(a);
        table.accept(b);
        let first = table.on_connect_request(a).unwrap();
        let second = table.on_connect_request(b).unwrap();
        assert_ne!(first.username, second.username);
    }

    #[test]
    fn connect_request_on_vanished_session_returns_none() {
        let table = SessionTable::new();
        let conn = addr(1);
        assert!(table.on_connect_request(conn).is_none());
    }

    #[test]
    fn eviction_removes_session_and_player_record() {
        let table = SessionTable::new();
        let conn = addr(1);
        table.accept(conn);
        let outcome = table.on_connect_request(conn).unwrap();
        assert!(table.evict(conn).is_some());
        assert!(table.build_snapshot_for(outcome.player_id).is_none());
        assert!(table.evict(conn).is_none());
    }

    #[test]
    fn snapshot_is_none_for_unknown_recipient() {
        let table = SessionTable::new();
        assert!(table.build_snapshot_for(42).is_none());
    }

    #[test]
    fn stale_heartbeats_finds_connections_past_timeout() {
        let table = SessionTable::new();
        let conn = addr(1);
        table.accept(conn);
        table.with_session_mut(conn, |s| {
            s.last_heartbeat = Instant::now() - Duration::from_secs(60);
        });
        let stale = table.stale_heartbeats(Duration::from_secs(30));
        assert_eq!(stale, vec![conn]);
    }
}
