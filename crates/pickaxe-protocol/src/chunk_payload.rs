//! The `ChunkData.bytes` payload format (spec §4.1): an inner record of
//! `cx,cy,cz,version,innerFlags,rawDataLen,rawDataBytes`, optionally LZ4-wrapped
//! by the outer `ChunkData.flags` bit 0.

use bytes::{Buf, BufMut, BytesMut};
use pickaxe_types::ChunkCoord;

use crate::codec::{CodecError, CodecResult};

/// The decoded inner chunk payload.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkInner {
    pub coord: ChunkCoord,
    pub version: u64,
    pub inner_flags: u8,
    pub raw_data: Vec<u8>,
}

/// Outer `ChunkData.flags` bit meanings. All other bits are reserved and must
/// be zero.
pub const FLAG_COMPRESSED: u8 = 0b0000_0001;

/// Minimum raw size before compression is even attempted.
const COMPRESSION_MIN_SIZE: usize = 1024;

/// Build the inner payload (never LZ4-wrapped — that's a decision the caller
/// makes via [`wrap_chunk_payload`]).
pub fn build_chunk_inner(coord: ChunkCoord, version: u64, inner_flags: u8, raw_data: &[u8]) -> Vec<u8> {
    let mut buf = BytesMut::with_capacity(4 + 4 + 4 + 8 + 1 + 4 + raw_data.len());
    buf.put_i32_le(coord.cx);
    buf.put_i32_le(coord.cy);
    buf.put_i32_le(coord.cz);
    buf.put_i64_le(version as i64);
    buf.put_u8(inner_flags);
    buf.put_i32_le(raw_data.len() as i32);
    buf.put_slice(raw_data);
    buf.to_vec()
}

pub fn parse_chunk_inner(bytes: &[u8]) -> CodecResult<ChunkInner> {
    let mut buf = BytesMut::from(bytes);
    if buf.remaining() < 4 + 4 + 4 + 8 + 1 + 4 {
        return Err(CodecError::Truncated);
    }
    let cx = buf.get_i32_le();
    let cy = buf.get_i32_le();
    let cz = buf.get_i32_le();
    let version = buf.get_i64_le() as u64;
    let inner_flags = buf.get_u8();
    let len = buf.get_i32_le();
    if len < 0 || buf.remaining() < len as usize {
        return Err(CodecError::Truncated);
    }
    let raw_data = buf.split_to(len as usize).to_vec();
    Ok(ChunkInner {
        coord: ChunkCoord::new(cx, cy, cz),
        version,
        inner_flags,
        raw_data,
    })
}

/// Savings threshold: compression is worth it only if it beats the raw size
/// by at least `max(64 bytes, 8% of raw)`.
fn required_savings(raw_len: usize) -> usize {
    (raw_len / 100 * 8).max(64)
}

/// Conditionally LZ4-wrap an inner chunk payload per the §4.1 heuristic.
/// Returns `(outer_flags, wire_bytes)` ready to place into `ChunkData`.
pub fn wrap_chunk_payload(inner: &[u8]) -> (u8, Vec<u8>) {
    if inner.len() < COMPRESSION_MIN_SIZE {
        return (0, inner.to_vec());
    }
    let compressed = lz4_flex::block::compress(inner);
    let savings_needed = required_savings(inner.len());
    if compressed.len() + savings_needed <= inner.len() {
        let mut out = BytesMut::with_capacity(4 + compressed.len());
        out.put_u32_le(inner.len() as u32);
        out.put_slice(&compressed);
        (FLAG_COMPRESSED, out.to_vec())
    } else {
        (0, inner.to_vec())
    }
}

/// Reverse [`wrap_chunk_payload`]: recover the inner payload bytes from the
/// wire bytes given the outer `flags` byte.
pub fn unwrap_chunk_payload(flags: u8, bytes: &[u8]) -> CodecResult<Vec<u8>> {
    if flags & FLAG_COMPRESSED == 0 {
        return Ok(bytes.to_vec());
    }
    if bytes.len() < 4 {
        return Err(CodecError::Truncated);
    }
    let mut buf = BytesMut::from(bytes);
    let uncompressed_size = buf.get_u32_le() as usize;
    lz4_flex::block::decompress(&buf, uncompressed_size).map_err(|_| CodecError::Truncated)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inner_roundtrip() {
        let coord = ChunkCoord::new(-3, 1, 4);
        let raw = vec![7u8; 4096];
        let built = build_chunk_inner(coord, 42, 0, &raw);
        let parsed = parse_chunk_inner(&built).unwrap();
        assert_eq!(parsed.coord, coord);
        assert_eq!(parsed.version, 42);
        assert_eq!(parsed.inner_flags, 0);
        assert_eq!(parsed.raw_data, raw);
    }

    #[test]
    fn small_payload_never_compressed() {
        let small = vec![1u8; 100];
        let (flags, wire) = wrap_chunk_payload(&small);
        assert_eq!(flags, 0);
        assert_eq!(wire, small);
    }

    #[test]
    fn highly_compressible_payload_gets_compressed() {
        let raw = vec![0u8; 4096]; // all-air chunk: maximally compressible
        let (flags, wire) = wrap_chunk_payload(&raw);
        assert_eq!(flags, FLAG_COMPRESSED);
        assert!(wire.len() < raw.len());
        let back = unwrap_chunk_payload(flags, &wire).unwrap();
        assert_eq!(back, raw);
    }

    #[test]
    fn incompressible_payload_stays_uncompressed() {
        // Pseudo-random bytes shouldn't compress well enough to clear the
        // savings bar, so the wrapper should leave them alone.
        let mut raw = vec![0u8; 4096];
        let mut x: u32 = 0x12345678;
        for b in raw.iter_mut() {
            x ^= x << 13;
            x ^= x >> 17;
            x ^= x << 5;
            *b = (x & 0xFF) as u8;
        }
        let (flags, wire) = wrap_chunk_payload(&raw);
        if flags == FLAG_COMPRESSED {
            // If it happened to compress, it must still have cleared the bar.
            let back = unwrap_chunk_payload(flags, &wire).unwrap();
            assert_eq!(back, raw);
        } else {
            assert_eq!(wire, raw);
        }
    }
}
