use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;

use crate::packets::{tag, EditOpWire, Packet, PlayerSnapshotEntry};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("malformed packet: unknown tag {0}")]
    UnknownTag(u8),
    #[error("malformed packet: truncated buffer")]
    Truncated,
    #[error("malformed packet: invalid utf8 in string field")]
    InvalidUtf8,
    #[error("malformed packet: reserved bits set")]
    ReservedBitsSet,
}

pub type CodecResult<T> = Result<T, CodecError>;

fn need(buf: &BytesMut, n: usize) -> CodecResult<()> {
    if buf.remaining() < n {
        Err(CodecError::Truncated)
    } else {
        Ok(())
    }
}

fn read_rest_string(buf: &mut BytesMut) -> CodecResult<String> {
    let bytes = buf.split_to(buf.remaining());
    String::from_utf8(bytes.to_vec()).map_err(|_| CodecError::InvalidUtf8)
}

/// Encode a packet (including its leading tag byte) into a fresh buffer.
pub fn encode_packet(packet: &Packet) -> BytesMut {
    let mut buf = BytesMut::new();
    buf.put_u8(packet.tag());
    match packet {
        Packet::Message { text } => buf.put_slice(text.as_bytes()),
        Packet::ConnectRequest { username } => buf.put_slice(username.as_bytes()),
        Packet::ConnectResponse { ok } => buf.put_u8(*ok as u8),
        Packet::ClientConnect { username } => buf.put_slice(username.as_bytes()),
        Packet::ClientDisconnect { username } => buf.put_slice(username.as_bytes()),
        Packet::PlayerSnapshot { players } => {
            buf.put_u32_le(players.len() as u32);
            for p in players {
                buf.put_u64_le(p.id);
                buf.put_f32_le(p.px);
                buf.put_f32_le(p.py);
                buf.put_f32_le(p.pz);
                buf.put_f32_le(p.vx);
                buf.put_f32_le(p.vy);
                buf.put_f32_le(p.vz);
                buf.put_f32_le(p.yaw);
                buf.put_f32_le(p.pitch);
                buf.put_u8(p.on_ground as u8);
            }
        }
        Packet::PlayerPosition { seq, x, y, z, vx, vy, vz } => {
            buf.put_u32_le(*seq);
            buf.put_f32_le(*x);
            buf.put_f32_le(*y);
            buf.put_f32_le(*z);
            buf.put_f32_le(*vx);
            buf.put_f32_le(*vy);
            buf.put_f32_le(*vz);
        }
        Packet::ShootRequest { shot_id, tick, weapon, pos, dir, seed, flags } => {
            buf.put_u32_le(*shot_id);
            buf.put_u32_le(*tick);
            buf.put_u16_le(*weapon);
            for v in pos {
                buf.put_f32_le(*v);
            }
            for v in dir {
                buf.put_f32_le(*v);
            }
            buf.put_u32_le(*seed);
            buf.put_u8(*flags);
        }
        Packet::ShootResult {
            shot_id,
            tick,
            accepted,
            did_hit,
            hit_entity,
            hit,
            normal,
            damage,
            ammo,
            server_seed,
        } => {
            buf.put_u32_le(*shot_id);
            buf.put_u32_le(*tick);
            buf.put_u8(*accepted as u8);
            buf.put_u8(*did_hit as u8);
            buf.put_i32_le(*hit_entity);
            for v in hit {
                buf.put_f32_le(*v);
            }
            for v in normal {
                buf.put_f32_le(*v);
            }
            buf.put_f32_le(*damage);
            buf.put_u16_le(*ammo);
            buf.put_u32_le(*server_seed);
        }
        Packet::ChunkRequest { cx, cy, cz, view_dist } => {
            buf.put_i32_le(*cx);
            buf.put_i32_le(*cy);
            buf.put_i32_le(*cz);
            buf.put_u16_le(*view_dist);
        }
        Packet::ChunkData { cx, cy, cz, version, flags, payload } => {
            buf.put_i32_le(*cx);
            buf.put_i32_le(*cy);
            buf.put_i32_le(*cz);
            buf.put_u64_le(*version);
            buf.put_u8(*flags);
            buf.put_u32_le(payload.len() as u32);
            buf.put_slice(payload);
        }
        Packet::ChunkDelta { cx, cy, cz, resulting_version, edits } => {
            buf.put_i32_le(*cx);
            buf.put_i32_le(*cy);
            buf.put_i32_le(*cz);
            buf.put_u64_le(*resulting_version);
            buf.put_u32_le(edits.len() as u32);
            for e in edits {
                buf.put_u8(e.lx);
                buf.put_u8(e.ly);
                buf.put_u8(e.lz);
                buf.put_u8(e.block_id);
            }
        }
        Packet::ChunkUnload { cx, cy, cz } => {
            buf.put_i32_le(*cx);
            buf.put_i32_le(*cy);
            buf.put_i32_le(*cz);
        }
        Packet::ChunkAck { acked_type, sequence, cx, cy, cz, version } => {
            buf.put_u8(*acked_type);
            buf.put_u32_le(*sequence);
            buf.put_i32_le(*cx);
            buf.put_i32_le(*cy);
            buf.put_i32_le(*cz);
            buf.put_u64_le(*version);
        }
    }
    buf
}

/// Decode a packet (the tag byte is the first byte of `buf`) from a datagram
/// whose boundaries are already known (the transport frames messages, so a
/// trailing string field simply consumes whatever bytes remain).
pub fn decode_packet(buf: &mut BytesMut) -> CodecResult<Packet> {
    need(buf, 1)?;
    let t = buf.get_u8();
    match t {
        tag::MESSAGE => Ok(Packet::Message { text: read_rest_string(buf)? }),
        tag::CONNECT_REQUEST => Ok(Packet::ConnectRequest { username: read_rest_string(buf)? }),
        tag::CONNECT_RESPONSE => {
            need(buf, 1)?;
            Ok(Packet::ConnectResponse { ok: buf.get_u8() != 0 })
        }
        tag::CLIENT_CONNECT => Ok(Packet::ClientConnect { username: read_rest_string(buf)? }),
        tag::CLIENT_DISCONNECT => Ok(Packet::ClientDisconnect { username: read_rest_string(buf)? }),
        tag::PLAYER_SNAPSHOT => {
            need(buf, 4)?;
            let count = buf.get_u32_le() as usize;
            need(buf, count * 41)?;
            let mut players = Vec::with_capacity(count);
            for _ in 0..count {
                let id = buf.get_u64_le();
                let px = buf.get_f32_le();
                let py = buf.get_f32_le();
                let pz = buf.get_f32_le();
                let vx = buf.get_f32_le();
                let vy = buf.get_f32_le();
                let vz = buf.get_f32_le();
                let yaw = buf.get_f32_le();
                let pitch = buf.get_f32_le();
                let on_ground = buf.get_u8() != 0;
                players.push(PlayerSnapshotEntry {
                    id, px, py, pz, vx, vy, vz, yaw, pitch, on_ground,
                });
            }
            Ok(Packet::PlayerSnapshot { players })
        }
        tag::PLAYER_POSITION => {
            need(buf, 4 + 6 * 4)?;
            Ok(Packet::PlayerPosition {
                seq: buf.get_u32_le(),
                x: buf.get_f32_le(),
                y: buf.get_f32_le(),
                z: buf.get_f32_le(),
                vx: buf.get_f32_le(),
                vy: buf.get_f32_le(),
                vz: buf.get_f32_le(),
            })
        }
        tag::SHOOT_REQUEST => {
            need(buf, 4 + 4 + 2 + 3 * 4 + 3 * 4 + 4 + 1)?;
            let shot_id = buf.get_u32_le();
            let tick = buf.get_u32_le();
            let weapon = buf.get_u16_le();
            let pos = [buf.get_f32_le(), buf.get_f32_le(), buf.get_f32_le()];
            let dir = [buf.get_f32_le(), buf.get_f32_le(), buf.get_f32_le()];
            let seed = buf.get_u32_le();
            let flags = buf.get_u8();
            Ok(Packet::ShootRequest { shot_id, tick, weapon, pos, dir, seed, flags })
        }
        tag::SHOOT_RESULT => {
            need(buf, 4 + 4 + 1 + 1 + 4 + 3 * 4 + 3 * 4 + 4 + 2 + 4)?;
            let shot_id = buf.get_u32_le();
            let tick = buf.get_u32_le();
            let accepted = buf.get_u8() != 0;
            let did_hit = buf.get_u8() != 0;
            let hit_entity = buf.get_i32_le();
            let hit = [buf.get_f32_le(), buf.get_f32_le(), buf.get_f32_le()];
            let normal = [buf.get_f32_le(), buf.get_f32_le(), buf.get_f32_le()];
            let damage = buf.get_f32_le();
            let ammo = buf.get_u16_le();
            let server_seed = buf.get_u32_le();
            Ok(Packet::ShootResult {
                shot_id, tick, accepted, did_hit, hit_entity, hit, normal, damage, ammo, server_seed,
            })
        }
        tag::CHUNK_REQUEST => {
            need(buf, 4 + 4 + 4 + 2)?;
            Ok(Packet::ChunkRequest {
                cx: buf.get_i32_le(),
                cy: buf.get_i32_le(),
                cz: buf.get_i32_le(),
                view_dist: buf.get_u16_le(),
            })
        }
        tag::CHUNK_DATA => {
            need(buf, 4 + 4 + 4 + 8 + 1 + 4)?;
            let cx = buf.get_i32_le();
            let cy = buf.get_i32_le();
            let cz = buf.get_i32_le();
            let version = buf.get_u64_le();
            let flags = buf.get_u8();
            let len = buf.get_u32_le() as usize;
            need(buf, len)?;
            let payload = buf.split_to(len).to_vec();
            Ok(Packet::ChunkData { cx, cy, cz, version, flags, payload })
        }
        tag::CHUNK_DELTA => {
            need(buf, 4 + 4 + 4 + 8 + 4)?;
            let cx = buf.get_i32_le();
            let cy = buf.get_i32_le();
            let cz = buf.get_i32_le();
            let resulting_version = buf.get_u64_le();
            let count = buf.get_u32_le() as usize;
            need(buf, count * 4)?;
            let mut edits = Vec::with_capacity(count);
            for _ in 0..count {
                edits.push(EditOpWire {
                    lx: buf.get_u8(),
                    ly: buf.get_u8(),
                    lz: buf.get_u8(),
                    block_id: buf.get_u8(),
                });
            }
            Ok(Packet::ChunkDelta { cx, cy, cz, resulting_version, edits })
        }
        tag::CHUNK_UNLOAD => {
            need(buf, 4 + 4 + 4)?;
            Ok(Packet::ChunkUnload {
                cx: buf.get_i32_le(),
                cy: buf.get_i32_le(),
                cz: buf.get_i32_le(),
            })
        }
        tag::CHUNK_ACK => {
            need(buf, 1 + 4 + 4 + 4 + 4 + 8)?;
            Ok(Packet::ChunkAck {
                acked_type: buf.get_u8(),
                sequence: buf.get_u32_le(),
                cx: buf.get_i32_le(),
                cy: buf.get_i32_le(),
                cz: buf.get_i32_le(),
                version: buf.get_u64_le(),
            })
        }
        other => Err(CodecError::UnknownTag(other)),
    }
}

/// FNV-1a-32 over the exact bytes that went out on the wire.
pub fn fnv1a32(data: &[u8]) -> u32 {
    const OFFSET_BASIS: u32 = 0x811c9dc5;
    const PRIME: u32 = 0x0100_0193;
    let mut hash = OFFSET_BASIS;
    for &b in data {
        hash ^= b as u32;
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(p: Packet) {
        let mut encoded = encode_packet(&p);
        let decoded = decode_packet(&mut encoded).expect("decode");
        assert_eq!(decoded, p);
    }

    #[test]
    fn roundtrip_all_kinds() {
        roundtrip(Packet::Message { text: "hello world".into() });
        roundtrip(Packet::ConnectRequest { username: "alice".into() });
        roundtrip(Packet::ConnectResponse { ok: true });
        roundtrip(Packet::ConnectResponse { ok: false });
        roundtrip(Packet::ClientConnect { username: "player0000".into() });
        roundtrip(Packet::ClientDisconnect { username: "player0000".into() });
        roundtrip(Packet::PlayerSnapshot {
            players: vec![PlayerSnapshotEntry {
                id: 7,
                px: 1.0,
                py: 2.0,
                pz: 3.0,
                vx: 0.0,
                vy: -1.0,
                vz: 0.0,
                yaw: 90.0,
                pitch: 0.0,
                on_ground: true,
            }],
        });
        roundtrip(Packet::PlayerPosition {
            seq: 42,
            x: 1.0,
            y: 2.0,
            z: 3.0,
            vx: 0.1,
            vy: 0.2,
            vz: 0.3,
        });
        roundtrip(Packet::ShootRequest {
            shot_id: 1,
            tick: 2,
            weapon: 3,
            pos: [1.0, 2.0, 3.0],
            dir: [0.0, 0.0, 1.0],
            seed: 99,
            flags: 0,
        });
        roundtrip(Packet::ShootResult {
            shot_id: 1,
            tick: 2,
            accepted: true,
            did_hit: true,
            hit_entity: 123,
            hit: [1.0, 2.0, 3.0],
            normal: [0.0, 1.0, 0.0],
            damage: 25.0,
            ammo: 9,
            server_seed: 5,
        });
        roundtrip(Packet::ChunkRequest { cx: -1, cy: 0, cz: 2, view_dist: 8 });
        roundtrip(Packet::ChunkData {
            cx: -1,
            cy: 0,
            cz: 2,
            version: 5,
            flags: 0,
            payload: vec![1, 2, 3, 4],
        });
        roundtrip(Packet::ChunkDelta {
            cx: -1,
            cy: 0,
            cz: 2,
            resulting_version: 6,
            edits: vec![EditOpWire { lx: 1, ly: 2, lz: 3, block_id: 4 }],
        });
        roundtrip(Packet::ChunkUnload { cx: -1, cy: 0, cz: 2 });
        roundtrip(Packet::ChunkAck {
            acked_type: tag::CHUNK_DATA,
            sequence: 0xDEADBEEF,
            cx: -1,
            cy: 0,
            cz: 2,
            version: 5,
        });
    }

    #[test]
    fn unknown_tag_fails() {
        let mut buf = BytesMut::from(&[0xFFu8][..]);
        assert_eq!(decode_packet(&mut buf), Err(CodecError::UnknownTag(0xFF)));
    }

    #[test]
    fn truncated_fails() {
        let mut buf = BytesMut::from(&[tag::CHUNK_REQUEST, 1, 2][..]);
        assert_eq!(decode_packet(&mut buf), Err(CodecError::Truncated));
    }

    #[test]
    fn fnv1a32_known_vector() {
        // FNV-1a-32 of the empty string is the offset basis.
        assert_eq!(fnv1a32(b""), 0x811c9dc5);
        // FNV-1a-32("a") = 0xe40c292c (standard test vector).
        assert_eq!(fnv1a32(b"a"), 0xe40c292c);
    }
}
