//! The client apply path (§4.7): the receiver's half of the chunk streaming
//! protocol, specified alongside the server because the two round-trip the
//! same wire format. `ClientWorld` tracks one applied version per chunk and
//! turns each inbound chunk packet into the `ChunkAck` the server expects.

use std::collections::HashMap;

use pickaxe_protocol::chunk_payload::{parse_chunk_inner, unwrap_chunk_payload};
use pickaxe_protocol::codec::{fnv1a32, CodecError};
use pickaxe_protocol::packets::{acked_type, EditOpWire, Packet};
use pickaxe_types::{local_index, ChunkCoord, CHUNK_VOLUME, DELTA_NO_OP_SLACK};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ApplyError {
    #[error("chunk payload malformed: {0}")]
    Malformed(#[from] CodecError),
    #[error("chunk data header {got:?} does not match the outer coordinate {expected:?}")]
    HeaderMismatch { expected: ChunkCoord, got: ChunkCoord },
    #[error("chunk data inner flags have reserved bits set")]
    ReservedBitsSet,
    #[error("chunk data raw payload is {got} bytes, expected {expected}")]
    WrongPayloadSize { expected: usize, got: usize },
    #[error("chunk data outer version {outer} disagrees with inner version {inner}")]
    VersionDisagreement { outer: u64, inner: u64 },
    #[error("stale chunk update for {coord:?}: incoming {incoming} <= known {known}")]
    StaleVersion { coord: ChunkCoord, incoming: u64, known: u64 },
    #[error("delta for {0:?} has no base chunk applied")]
    MissingBaseChunk(ChunkCoord),
    #[error("delta for {coord:?} jumps from {known} to {resulting_version}, beyond the slack-adjusted max {max_allowed}")]
    VersionGap { coord: ChunkCoord, known: u64, resulting_version: u64, max_allowed: u64 },
}

struct ClientChunk {
    blocks: Vec<u8>,
    version: u64,
}

/// Only warn every Nth `MissingBaseChunk` so a server that races deltas
/// ahead of the matching `ChunkData` doesn't flood the log.
const MISSING_BASE_WARN_EVERY: u64 = 50;

/// One client's view of the world: every chunk it has successfully applied,
/// keyed by coordinate, each remembering the last version it saw.
#[derive(Default)]
pub struct ClientWorld {
    chunks: HashMap<ChunkCoord, ClientChunk>,
    missing_base_count: u64,
}

impl ClientWorld {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn known_version(&self, coord: ChunkCoord) -> u64 {
        self.chunks.get(&coord).map_or(0, |c| c.version)
    }

    pub fn block_at(&self, coord: ChunkCoord, lx: i32, ly: i32, lz: i32) -> Option<u8> {
        let chunk = self.chunks.get(&coord)?;
        local_index(lx, ly, lz).map(|idx| chunk.blocks[idx])
    }

    /// Decodes and applies a `ChunkData` payload, returning the `ChunkAck`
    /// to send back on success.
    pub fn apply_chunk_data(
        &mut self,
        cx: i32,
        cy: i32,
        cz: i32,
        version: u64,
        flags: u8,
        payload: &[u8],
    ) -> Result<Packet, ApplyError> {
        let coord = ChunkCoord::new(cx, cy, cz);
        let known = self.known_version(coord);
        if version <= known {
            return Err(ApplyError::StaleVersion { coord, incoming: version, known });
        }

        let inner_bytes = unwrap_chunk_payload(flags, payload)?;
        let inner = parse_chunk_inner(&inner_bytes)?;
        if inner.coord != coord {
            return Err(ApplyError::HeaderMismatch { expected: coord, got: inner.coord });
        }
        if inner.inner_flags != 0 {
            return Err(ApplyError::ReservedBitsSet);
        }
        if inner.raw_data.len() != CHUNK_VOLUME {
            return Err(ApplyError::WrongPayloadSize { expected: CHUNK_VOLUME, got: inner.raw_data.len() });
        }
        if inner.version != version {
            return Err(ApplyError::VersionDisagreement { outer: version, inner: inner.version });
        }

        self.chunks.insert(coord, ClientChunk { blocks: inner.raw_data, version });
        let sequence = fnv1a32(payload);
        Ok(Packet::ChunkAck { acked_type: acked_type::CHUNK_DATA, sequence, cx, cy, cz, version })
    }

    /// Applies an incremental `ChunkDelta`, returning the `ChunkAck` on
    /// success. `sequence` is always `0` — deltas carry no payload hash.
    pub fn apply_chunk_delta(
        &mut self,
        cx: i32,
        cy: i32,
        cz: i32,
        resulting_version: u64,
        edits: &[EditOpWire],
    ) -> Result<Packet, ApplyError> {
        let coord = ChunkCoord::new(cx, cy, cz);
        let Some(chunk) = self.chunks.get_mut(&coord) else {
            self.missing_base_count += 1;
            if self.missing_base_count % MISSING_BASE_WARN_EVERY == 1 {
                tracing::warn!(?coord, count = self.missing_base_count, "delta with no base chunk applied");
            }
            return Err(ApplyError::MissingBaseChunk(coord));
        };
        let known = chunk.version;
        if resulting_version <= known {
            return Err(ApplyError::StaleVersion { coord, incoming: resulting_version, known });
        }
        let max_allowed = known + edits.len() as u64 + DELTA_NO_OP_SLACK;
        if resulting_version > max_allowed {
            return Err(ApplyError::VersionGap { coord, known, resulting_version, max_allowed });
        }

        for edit in edits {
            if let Some(idx) = local_index(i32::from(edit.lx), i32::from(edit.ly), i32::from(edit.lz)) {
                chunk.blocks[idx] = edit.block_id;
            }
        }
        chunk.version = resulting_version;
        Ok(Packet::ChunkAck {
            acked_type: acked_type::CHUNK_DELTA,
            sequence: 0,
            cx,
            cy,
            cz,
            version: resulting_version,
        })
    }

    /// Drops local state for a chunk, returning the `ChunkAck` to send.
    pub fn apply_chunk_unload(&mut self, cx: i32, cy: i32, cz: i32) -> Packet {
        let coord = ChunkCoord::new(cx, cy, cz);
        self.chunks.remove(&coord);
        Packet::ChunkAck { acked_type: acked_type::CHUNK_UNLOAD, sequence: 0, cx, cy, cz, version: 0 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pickaxe_protocol::chunk_payload::{build_chunk_inner, wrap_chunk_payload};

    fn sample_payload(coord: ChunkCoord, version: u64) -> (u8, Vec<u8>) {
        let raw = vec![0u8; CHUNK_VOLUME];
        let inner = build_chunk_inner(coord, version, 0, &raw);
        wrap_chunk_payload(&inner)
    }

    #[test]
    fn applies_fresh_chunk_data_and_acks_with_payload_hash() {
        let mut world = ClientWorld::new();
        let coord = ChunkCoord::new(1, 2, 3);
        let (flags, payload) = sample_payload(coord, 1);
        let ack = world.apply_chunk_data(1, 2, 3, 1, flags, &payload).unwrap();
        match ack {
            Packet::ChunkAck { acked_type, sequence, version, .. } => {
                assert_eq!(acked_type, acked_type::CHUNK_DATA);
                assert_eq!(sequence, fnv1a32(&payload));
                assert_eq!(version, 1);
            }
            other => panic!("expected ChunkAck, got {other:?}"),
        }
        assert_eq!(world.known_version(coord), 1);
    }

    #[test]
    fn stale_chunk_data_is_rejected_without_mutating_state() {
        let mut world = ClientWorld::new();
        let coord = ChunkCoord::new(0, 0, 0);
        let (flags, payload) = sample_payload(coord, 5);
        world.apply_chunk_data(0, 0, 0, 5, flags, &payload).unwrap();
        let (flags2, payload2) = sample_payload(coord, 3);
        let err = world.apply_chunk_data(0, 0, 0, 3, flags2, &payload2).unwrap_err();
        assert_eq!(err, ApplyError::StaleVersion { coord, incoming: 3, known: 5 });
        assert_eq!(world.known_version(coord), 5);
    }

    #[test]
    fn delta_without_a_base_chunk_is_rejected() {
        let mut world = ClientWorld::new();
        let coord = ChunkCoord::new(4, 4, 4);
        let err = world.apply_chunk_delta(4, 4, 4, 1, &[]).unwrap_err();
        assert_eq!(err, ApplyError::MissingBaseChunk(coord));
    }

    #[test]
    fn delta_applies_edits_and_advances_version() {
        let mut world = ClientWorld::new();
        let coord = ChunkCoord::new(0, 0, 0);
        let (flags, payload) = sample_payload(coord, 1);
        world.apply_chunk_data(0, 0, 0, 1, flags, &payload).unwrap();

        let edits = vec![EditOpWire { lx: 1, ly: 2, lz: 3, block_id: 7 }];
        let ack = world.apply_chunk_delta(0, 0, 0, 2, &edits).unwrap();
        assert!(matches!(ack, Packet::ChunkAck { acked_type, version: 2, .. } if acked_type == acked_type::CHUNK_DELTA));
        assert_eq!(world.block_at(coord, 1, 2, 3), Some(7));
        assert_eq!(world.known_version(coord), 2);
    }

    #[test]
    fn delta_exceeding_the_slack_window_is_a_version_gap() {
        let mut world = ClientWorld::new();
        let coord = ChunkCoord::new(0, 0, 0);
        let (flags, payload) = sample_payload(coord, 1);
        world.apply_chunk_data(0, 0, 0, 1, flags, &payload).unwrap();

        let err = world.apply_chunk_delta(0, 0, 0, 1 + DELTA_NO_OP_SLACK + 10, &[]).unwrap_err();
        assert!(matches!(err, ApplyError::VersionGap { .. }));
    }

    #[test]
    fn unload_drops_local_state() {
        let mut world = ClientWorld::new();
        let coord = ChunkCoord::new(2, 2, 2);
        let (flags, payload) = sample_payload(coord, 1);
        world.apply_chunk_data(2, 2, 2, 1, flags, &payload).unwrap();
        world.apply_chunk_unload(2, 2, 2);
        assert_eq!(world.known_version(coord), 0);
        assert_eq!(world.block_at(coord, 0, 0, 0), None);
    }
}
