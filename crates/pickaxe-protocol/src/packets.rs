//! The packet catalogue. One variant per wire message; field order here
//! matches the little-endian, fixed-layout order on the wire (see `codec`).

/// One player record inside a `PlayerSnapshot`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlayerSnapshotEntry {
    pub id: u64,
    pub px: f32,
    pub py: f32,
    pub pz: f32,
    pub vx: f32,
    pub vy: f32,
    pub vz: f32,
    pub yaw: f32,
    pub pitch: f32,
    pub on_ground: bool,
}

/// One edit inside a `ChunkDelta`, local to the chunk it targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EditOpWire {
    pub lx: u8,
    pub ly: u8,
    pub lz: u8,
    pub block_id: u8,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    /// Chat message, `username:text` already folded in by the sender for
    /// broadcast, or just `text` for a client-originated message.
    Message { text: String },
    ConnectRequest { username: String },
    ConnectResponse { ok: bool },
    ClientConnect { username: String },
    ClientDisconnect { username: String },
    PlayerSnapshot { players: Vec<PlayerSnapshotEntry> },
    PlayerPosition {
        seq: u32,
        x: f32,
        y: f32,
        z: f32,
        vx: f32,
        vy: f32,
        vz: f32,
    },
    ShootRequest {
        shot_id: u32,
        tick: u32,
        weapon: u16,
        pos: [f32; 3],
        dir: [f32; 3],
        seed: u32,
        flags: u8,
    },
    ShootResult {
        shot_id: u32,
        tick: u32,
        accepted: bool,
        did_hit: bool,
        hit_entity: i32,
        hit: [f32; 3],
        normal: [f32; 3],
        damage: f32,
        ammo: u16,
        server_seed: u32,
    },
    ChunkRequest {
        cx: i32,
        cy: i32,
        cz: i32,
        view_dist: u16,
    },
    ChunkData {
        cx: i32,
        cy: i32,
        cz: i32,
        version: u64,
        flags: u8,
        payload: Vec<u8>,
    },
    ChunkDelta {
        cx: i32,
        cy: i32,
        cz: i32,
        resulting_version: u64,
        edits: Vec<EditOpWire>,
    },
    ChunkUnload { cx: i32, cy: i32, cz: i32 },
    ChunkAck {
        acked_type: u8,
        sequence: u32,
        cx: i32,
        cy: i32,
        cz: i32,
        version: u64,
    },
}

/// Tag byte for `ackedType` in `ChunkAck` — which packet kind is being acked.
pub mod acked_type {
    pub const CHUNK_DATA: u8 = tag::CHUNK_DATA;
    pub const CHUNK_DELTA: u8 = tag::CHUNK_DELTA;
    pub const CHUNK_UNLOAD: u8 = tag::CHUNK_UNLOAD;
    use super::tag;
}

/// Packet tag bytes. Part of the wire ABI — never renumber a shipped tag.
pub mod tag {
    pub const MESSAGE: u8 = 1;
    pub const CONNECT_REQUEST: u8 = 2;
    pub const CONNECT_RESPONSE: u8 = 3;
    pub const CLIENT_CONNECT: u8 = 4;
    pub const CLIENT_DISCONNECT: u8 = 5;
    pub const PLAYER_SNAPSHOT: u8 = 6;
    pub const PLAYER_POSITION: u8 = 7;
    pub const SHOOT_REQUEST: u8 = 8;
    pub const SHOOT_RESULT: u8 = 9;
    pub const CHUNK_REQUEST: u8 = 10;
    pub const CHUNK_DATA: u8 = 11;
    pub const CHUNK_DELTA: u8 = 12;
    pub const CHUNK_UNLOAD: u8 = 13;
    pub const CHUNK_ACK: u8 = 14;
}

impl Packet {
    pub fn tag(&self) -> u8 {
        match self {
            Packet::Message { .. } => tag::MESSAGE,
            Packet::ConnectRequest { .. } => tag::CONNECT_REQUEST,
            Packet::ConnectResponse { .. } => tag::CONNECT_RESPONSE,
            Packet::ClientConnect { .. } => tag::CLIENT_CONNECT,
            Packet::ClientDisconnect { .. } => tag::CLIENT_DISCONNECT,
            Packet::PlayerSnapshot { .. } => tag::PLAYER_SNAPSHOT,
            Packet::PlayerPosition { .. } => tag::PLAYER_POSITION,
            Packet::ShootRequest { .. } => tag::SHOOT_REQUEST,
            Packet::ShootResult { .. } => tag::SHOOT_RESULT,
            Packet::ChunkRequest { .. } => tag::CHUNK_REQUEST,
            Packet::ChunkData { .. } => tag::CHUNK_DATA,
            Packet::ChunkDelta { .. } => tag::CHUNK_DELTA,
            Packet::ChunkUnload { .. } => tag::CHUNK_UNLOAD,
            Packet::ChunkAck { .. } => tag::CHUNK_ACK,
        }
    }
}
