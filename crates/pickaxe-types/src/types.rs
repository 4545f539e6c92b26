use serde::{Deserialize, Serialize};

/// Side length of a chunk along every axis.
pub const CHUNK_SIZE: i32 = 16;
/// Number of blocks in a single chunk.
pub const CHUNK_VOLUME: usize = (CHUNK_SIZE * CHUNK_SIZE * CHUNK_SIZE) as usize;

/// World bounds, expressed in chunk coordinates for X/Z and block (world) coordinates for Y.
pub const WORLD_MIN_CX: i32 = -20;
pub const WORLD_MAX_CX: i32 = 20;
pub const WORLD_MIN_CZ: i32 = -20;
pub const WORLD_MAX_CZ: i32 = 20;
pub const WORLD_MIN_Y: i32 = -16;
pub const WORLD_MAX_Y: i32 = 32;

/// Default world seed, matches the original headless server.
pub const DEFAULT_WORLD_SEED: u64 = 1337;

/// Default transport listen port.
pub const DEFAULT_PORT: u16 = 27015;

pub const CHUNK_RETRY_INTERVAL_MS: u64 = 500;
pub const HEARTBEAT_TIMEOUT_SECS: u64 = 30;
pub const SNAPSHOT_INTERVAL_MS: u64 = 100;
pub const AUTO_NAME_NAMESPACE: u32 = 10_000;

pub const MAX_PENDING_CHUNK_DATA: usize = 128;
pub const MAX_SENDS_PER_UPDATE: usize = 24;
pub const MAX_PREP_QUEUE: usize = 4096;
pub const MAX_SEND_QUEUE_PER_CLIENT: usize = 512;
pub const VIEW_DISTANCE_CLAMP_MIN: u16 = 2;
pub const MAX_EDIT_LOG: usize = 8192;
pub const DELTA_NO_OP_SLACK: u64 = 64;

/// Largest view distance the server will honor, derived from the world's horizontal span:
/// `ceil(sqrt(spanX^2 + spanZ^2))`.
pub fn view_distance_clamp_max() -> u16 {
    let span_x = (WORLD_MAX_CX - WORLD_MIN_CX) as f64;
    let span_z = (WORLD_MAX_CZ - WORLD_MIN_CZ) as f64;
    (span_x * span_x + span_z * span_z).sqrt().ceil() as u16
}

pub fn clamp_view_distance(requested: u16) -> u16 {
    requested.clamp(VIEW_DISTANCE_CLAMP_MIN, view_distance_clamp_max())
}

/// Lowest/highest chunk-Y layer the world contains.
pub fn world_min_cy() -> i32 {
    WORLD_MIN_Y.div_euclid(CHUNK_SIZE)
}

pub fn world_max_cy() -> i32 {
    WORLD_MAX_Y.div_euclid(CHUNK_SIZE)
}

/// Identifies a connected client across the session table, chunk subscriber
/// sets, and streaming pipeline keys.
pub type ClientId = u64;

/// An 8-bit block identifier. `0` is air; everything else is a material kind shared
/// bit-exact between server and client.
pub type BlockId = u8;

pub const BLOCK_AIR: BlockId = 0;
pub const BLOCK_STONE: BlockId = 1;
pub const BLOCK_DIRT: BlockId = 2;
pub const BLOCK_GRASS: BlockId = 3;
pub const BLOCK_BEDROCK: BlockId = 4;
pub const BLOCK_SAND: BlockId = 5;
pub const BLOCK_LOG: BlockId = 6;
pub const BLOCK_LEAVES: BlockId = 7;

/// Chunk coordinate: an ordered triple of signed chunk indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkCoord {
    pub cx: i32,
    pub cy: i32,
    pub cz: i32,
}

impl ChunkCoord {
    pub fn new(cx: i32, cy: i32, cz: i32) -> Self {
        Self { cx, cy, cz }
    }

    /// Whether this coordinate lies within the world's bounding box.
    pub fn in_bounds(self) -> bool {
        self.cx >= WORLD_MIN_CX
            && self.cx <= WORLD_MAX_CX
            && self.cz >= WORLD_MIN_CZ
            && self.cz <= WORLD_MAX_CZ
            && self.cy >= world_min_cy()
            && self.cy <= world_max_cy()
    }

    /// World-space origin (the minimum corner) of this chunk.
    pub fn world_origin(self) -> (i32, i32, i32) {
        (self.cx * CHUNK_SIZE, self.cy * CHUNK_SIZE, self.cz * CHUNK_SIZE)
    }

    pub fn offset(self, dx: i32, dy: i32, dz: i32) -> Self {
        Self::new(self.cx + dx, self.cy + dy, self.cz + dz)
    }

    /// The 26 neighbors sharing a face, edge, or corner (one-ring neighborhood).
    pub fn one_ring_neighbors(self) -> Vec<ChunkCoord> {
        let mut out = Vec::with_capacity(26);
        for dx in -1..=1 {
            for dy in -1..=1 {
                for dz in -1..=1 {
                    if dx == 0 && dy == 0 && dz == 0 {
                        continue;
                    }
                    out.push(self.offset(dx, dy, dz));
                }
            }
        }
        out
    }
}

/// Convert a world-space coordinate into a chunk coordinate + local offset.
pub fn world_to_chunk(world: i32) -> (i32, i32) {
    let c = world.div_euclid(CHUNK_SIZE);
    let local = world.rem_euclid(CHUNK_SIZE);
    (c, local)
}

/// Resolve the chunk coordinate and the local (0..16) coordinates for a world block position.
pub fn world_to_chunk_local(world_x: i32, world_y: i32, world_z: i32) -> (ChunkCoord, (i32, i32, i32)) {
    let (cx, lx) = world_to_chunk(world_x);
    let (cy, ly) = world_to_chunk(world_y);
    let (cz, lz) = world_to_chunk(world_z);
    (ChunkCoord::new(cx, cy, cz), (lx, ly, lz))
}

/// Index of a local block coordinate within the dense block array, `idx = x + 16*(y + 16*z)`.
pub fn local_index(x: i32, y: i32, z: i32) -> Option<usize> {
    if !(0..CHUNK_SIZE).contains(&x) || !(0..CHUNK_SIZE).contains(&y) || !(0..CHUNK_SIZE).contains(&z) {
        return None;
    }
    Some((x + CHUNK_SIZE * (y + CHUNK_SIZE * z)) as usize)
}

/// A single recorded block mutation, as stored in a chunk's edit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditOp {
    pub x: u8,
    pub y: u8,
    pub z: u8,
    pub block_id: BlockId,
    pub resulting_version: u64,
}

/// Double-precision 3D vector, used for authoritative player position.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vec3d {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3d {
    pub const ZERO: Vec3d = Vec3d { x: 0.0, y: 0.0, z: 0.0 };

    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn chunk_coord_at(self, cy_for_interest: i32) -> ChunkCoord {
        let (cx, _) = world_to_chunk(self.x.floor() as i32);
        let (cz, _) = world_to_chunk(self.z.floor() as i32);
        ChunkCoord::new(cx, cy_for_interest, cz)
    }
}

/// Single-precision 3D vector, used for velocity and wire-format positions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vec3f {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3f {
    pub const ZERO: Vec3f = Vec3f { x: 0.0, y: 0.0, z: 0.0 };

    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn view_distance_clamp_bounds() {
        assert_eq!(clamp_view_distance(0), VIEW_DISTANCE_CLAMP_MIN);
        assert_eq!(clamp_view_distance(1), VIEW_DISTANCE_CLAMP_MIN);
        assert_eq!(clamp_view_distance(10_000), view_distance_clamp_max());
        assert!(clamp_view_distance(10) >= clamp_view_distance(2));
    }

    #[test]
    fn chunk_bounds() {
        assert!(ChunkCoord::new(0, 0, 0).in_bounds());
        assert!(!ChunkCoord::new(WORLD_MAX_CX + 1, 0, 0).in_bounds());
        assert!(!ChunkCoord::new(0, world_max_cy() + 1, 0).in_bounds());
    }

    #[test]
    fn one_ring_has_26_neighbors() {
        let neighbors = ChunkCoord::new(0, 0, 0).one_ring_neighbors();
        assert_eq!(neighbors.len(), 26);
        assert!(!neighbors.contains(&ChunkCoord::new(0, 0, 0)));
    }

    #[test]
    fn local_index_matches_layout() {
        assert_eq!(local_index(0, 0, 0), Some(0));
        assert_eq!(local_index(1, 0, 0), Some(1));
        assert_eq!(local_index(0, 1, 0), Some(16));
        assert_eq!(local_index(0, 0, 1), Some(256));
        assert_eq!(local_index(16, 0, 0), None);
    }
}
