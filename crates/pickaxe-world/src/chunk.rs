//! A single 16x16x16 voxel chunk: dense block array, monotonic version
//! counter, bounded edit log, and the subscriber set used by the streaming
//! pipeline. One `RwLock` protects everything except `version` and
//! `last_access`, which are published atomically so readers can observe
//! them without contending the lock.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::{SystemTime, UNIX_EPOCH};

use pickaxe_protocol::chunk_payload::{build_chunk_inner, parse_chunk_inner};
use pickaxe_types::{local_index, ChunkCoord, ClientId, EditOp, BlockId, CHUNK_VOLUME, MAX_EDIT_LOG};

struct Inner {
    coord: ChunkCoord,
    blocks: Box<[BlockId; CHUNK_VOLUME]>,
    non_air_count: u32,
    edit_log: VecDeque<EditOp>,
    subscribers: HashSet<ClientId>,
    dirty: bool,
}

pub struct Chunk {
    inner: RwLock<Inner>,
    version: AtomicU64,
    last_access_nanos: AtomicI64,
}

pub(crate) fn now_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}

impl Chunk {
    pub fn new(coord: ChunkCoord) -> Self {
        Self {
            inner: RwLock::new(Inner {
                coord,
                blocks: Box::new([0u8; CHUNK_VOLUME]),
                non_air_count: 0,
                edit_log: VecDeque::new(),
                subscribers: HashSet::new(),
                dirty: false,
            }),
            version: AtomicU64::new(0),
            last_access_nanos: AtomicI64::new(now_nanos()),
        }
    }

    pub fn from_blocks(coord: ChunkCoord, blocks: Box<[BlockId; CHUNK_VOLUME]>) -> Self {
        let non_air_count = blocks.iter().filter(|&&b| b != 0).count() as u32;
        Self {
            inner: RwLock::new(Inner {
                coord,
                blocks,
                non_air_count,
                edit_log: VecDeque::new(),
                subscribers: HashSet::new(),
                dirty: false,
            }),
            version: AtomicU64::new(0),
            last_access_nanos: AtomicI64::new(now_nanos()),
        }
    }

    fn touch(&self) {
        self.last_access_nanos.store(now_nanos(), Ordering::Relaxed);
    }

    pub fn coord(&self) -> ChunkCoord {
        self.inner.read().unwrap().coord
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    pub fn last_access_nanos(&self) -> i64 {
        self.last_access_nanos.load(Ordering::Relaxed)
    }

    pub fn is_dirty(&self) -> bool {
        self.inner.read().unwrap().dirty
    }

    pub fn clear_dirty(&self) {
        self.inner.write().unwrap().dirty = false;
    }

    pub fn mark_dirty(&self) {
        self.inner.write().unwrap().dirty = true;
    }

    pub fn non_air_count(&self) -> u32 {
        self.inner.read().unwrap().non_air_count
    }

    pub fn is_completely_air(&self) -> bool {
        self.non_air_count() == 0
    }

    /// Read under shared lock; out-of-bounds coordinates return air.
    pub fn get(&self, x: i32, y: i32, z: i32) -> BlockId {
        self.touch();
        let Some(idx) = local_index(x, y, z) else {
            return 0;
        };
        self.inner.read().unwrap().blocks[idx]
    }

    /// Apply an edit under exclusive lock. Out-of-bounds coordinates leave
    /// state unchanged and return the current version. A no-op write (same
    /// id) still bumps the version — see the open question in the design
    /// notes, preserved deliberately.
    pub fn apply_edit(&self, x: i32, y: i32, z: i32, block_id: BlockId) -> u64 {
        self.touch();
        let Some(idx) = local_index(x, y, z) else {
            return self.version.load(Ordering::Acquire);
        };

        let mut inner = self.inner.write().unwrap();
        let new_version = self.version.fetch_add(1, Ordering::AcqRel) + 1;

        let old = inner.blocks[idx];
        if old != 0 && block_id == 0 {
            inner.non_air_count -= 1;
        } else if old == 0 && block_id != 0 {
            inner.non_air_count += 1;
        }
        inner.blocks[idx] = block_id;
        inner.edit_log.push_back(EditOp {
            x: x as u8,
            y: y as u8,
            z: z as u8,
            block_id,
            resulting_version: new_version,
        });
        if inner.edit_log.len() > MAX_EDIT_LOG {
            inner.edit_log.pop_front();
        }
        inner.dirty = true;
        new_version
    }

    /// Returns `Some(edits)` whose `resulting_version > known_version`, capped
    /// at `max_ops`; `Some(empty)` if the caller is already current; `None`
    /// if `known_version` predates the oldest retained edit (resync needed).
    pub fn diff_since(&self, known_version: u64, max_ops: usize) -> Option<Vec<EditOp>> {
        self.touch();
        let inner = self.inner.read().unwrap();
        let current = self.version.load(Ordering::Acquire);
        if known_version >= current {
            return Some(Vec::new());
        }
        match inner.edit_log.front() {
            Some(oldest) if oldest.resulting_version <= known_version => {}
            _ => return None,
        }
        Some(
            inner
                .edit_log
                .iter()
                .filter(|e| e.resulting_version > known_version)
                .take(max_ops)
                .copied()
                .collect(),
        )
    }

    /// Produce the inner chunk payload format of §4.1. LZ4 wrapping, if any,
    /// is the send path's job, not this one's.
    pub fn serialize_compressed(&self) -> Vec<u8> {
        let inner = self.inner.read().unwrap();
        let version = self.version.load(Ordering::Acquire);
        build_chunk_inner(inner.coord, version, 0, inner.blocks.as_slice())
    }

    /// Replace block array, position, and version from a previously
    /// serialized inner payload. Clears the edit log — it reflects runtime
    /// edits, not loaded state. Returns `false` (and leaves state untouched)
    /// on any structural mismatch.
    pub fn deserialize_compressed(&self, bytes: &[u8]) -> bool {
        let Ok(parsed) = parse_chunk_inner(bytes) else {
            return false;
        };
        if parsed.raw_data.len() != CHUNK_VOLUME {
            return false;
        }
        let mut inner = self.inner.write().unwrap();
        inner.coord = parsed.coord;
        let mut blocks = Box::new([0u8; CHUNK_VOLUME]);
        blocks.copy_from_slice(&parsed.raw_data);
        inner.non_air_count = blocks.iter().filter(|&&b| b != 0).count() as u32;
        inner.blocks = blocks;
        inner.edit_log.clear();
        inner.dirty = false;
        self.version.store(parsed.version, Ordering::Release);
        true
    }

    pub fn save_to_disk(&self, path: &std::path::Path) -> std::io::Result<()> {
        std::fs::write(path, self.serialize_compressed())
    }

    pub fn load_from_disk(&self, path: &std::path::Path) -> std::io::Result<bool> {
        let bytes = std::fs::read(path)?;
        Ok(self.deserialize_compressed(&bytes))
    }

    pub fn add_subscriber(&self, client: ClientId) {
        self.inner.write().unwrap().subscribers.insert(client);
    }

    pub fn remove_subscriber(&self, client: ClientId) {
        self.inner.write().unwrap().subscribers.remove(&client);
    }

    pub fn get_subscribers(&self) -> HashSet<ClientId> {
        self.inner.read().unwrap().subscribers.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_monotonic_and_noop_bumps() {
        let chunk = Chunk::new(ChunkCoord::new(0, 0, 0));
        assert_eq!(chunk.apply_edit(1, 1, 1, 3), 1);
        assert_eq!(chunk.apply_edit(1, 1, 1, 3), 2); // no-op write still bumps
        assert_eq!(chunk.apply_edit(2, 2, 2, 5), 3);
        assert_eq!(chunk.version(), 3);
    }

    #[test]
    fn out_of_bounds_edit_is_noop() {
        let chunk = Chunk::new(ChunkCoord::new(0, 0, 0));
        chunk.apply_edit(0, 0, 0, 1);
        let v = chunk.version();
        assert_eq!(chunk.apply_edit(16, 0, 0, 9), v);
        assert_eq!(chunk.version(), v);
    }

    #[test]
    fn non_air_count_tracks_edits() {
        let chunk = Chunk::new(ChunkCoord::new(0, 0, 0));
        assert!(chunk.is_completely_air());
        chunk.apply_edit(0, 0, 0, 1);
        chunk.apply_edit(1, 0, 0, 1);
        assert_eq!(chunk.non_air_count(), 2);
        chunk.apply_edit(0, 0, 0, 0);
        assert_eq!(chunk.non_air_count(), 1);
        assert!(!chunk.is_completely_air());
    }

    #[test]
    fn edit_log_is_bounded_and_ordered() {
        let chunk = Chunk::new(ChunkCoord::new(0, 0, 0));
        for i in 0..(MAX_EDIT_LOG + 10) {
            let x = (i % 16) as i32;
            let y = ((i / 16) % 16) as i32;
            let z = ((i / 256) % 16) as i32;
            chunk.apply_edit(x, y, z, 1);
        }
        let all = chunk.diff_since(0, usize::MAX);
        assert!(all.is_none(), "oldest retained edit should exceed known_version 0");
        let current = chunk.version();
        let recent = chunk.diff_since(current - 5, 100).unwrap();
        assert_eq!(recent.len(), 5);
        for w in recent.windows(2) {
            assert!(w[0].resulting_version < w[1].resulting_version);
        }
    }

    #[test]
    fn diff_since_current_is_empty() {
        let chunk = Chunk::new(ChunkCoord::new(0, 0, 0));
        chunk.apply_edit(0, 0, 0, 1);
        let current = chunk.version();
        assert_eq!(chunk.diff_since(current, 10), Some(Vec::new()));
    }

    #[test]
    fn compressed_roundtrip_preserves_blocks_position_version() {
        let chunk = Chunk::new(ChunkCoord::new(-3, 1, 4));
        chunk.apply_edit(0, 0, 0, 1);
        chunk.apply_edit(15, 15, 15, 7);
        let bytes = chunk.serialize_compressed();

        let loaded = Chunk::new(ChunkCoord::new(0, 0, 0));
        assert!(loaded.deserialize_compressed(&bytes));
        assert_eq!(loaded.coord(), chunk.coord());
        assert_eq!(loaded.version(), chunk.version());
        for z in 0..16 {
            for y in 0..16 {
                for x in 0..16 {
                    assert_eq!(loaded.get(x, y, z), chunk.get(x, y, z));
                }
            }
        }
        // Loading clears runtime edit history.
        assert_eq!(loaded.diff_since(0, 10), Some(Vec::new()));
    }

    #[test]
    fn subscribers_round_trip() {
        let chunk = Chunk::new(ChunkCoord::new(0, 0, 0));
        chunk.add_subscriber(1);
        chunk.add_subscriber(2);
        assert_eq!(chunk.get_subscribers().len(), 2);
        chunk.remove_subscriber(1);
        assert_eq!(chunk.get_subscribers(), HashSet::from([2]));
    }
}
