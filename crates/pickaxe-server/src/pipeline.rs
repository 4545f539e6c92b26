//! The streaming pipeline's algorithm (§4.4): turning a `ChunkRequest` into
//! prep/send queue work, running the background prep worker, flushing send
//! queues, and reconciling `ChunkAck`s. [`crate::streaming::StreamingPipeline`]
//! holds the raw queues this module drives.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use pickaxe_protocol::codec::{encode_packet, fnv1a32};
use pickaxe_protocol::chunk_payload::wrap_chunk_payload;
use pickaxe_protocol::packets::{acked_type, Packet};
use pickaxe_protocol::transport::{ConnId, Reliability, Transport};
use pickaxe_types::{
    clamp_view_distance, world_max_cy, world_min_cy, ChunkCoord, CHUNK_RETRY_INTERVAL_MS,
    MAX_PENDING_CHUNK_DATA, MAX_SENDS_PER_UPDATE,
};
use pickaxe_world::ChunkStore;

use crate::session::SessionTable;
use crate::state::ServerState;
use crate::streaming::StreamingPipeline;

/// Every in-bounds coordinate within `view_distance` horizontally of
/// `center`, across every chunk-Y layer the world contains (§4.4 step 2).
fn desired_coords(center: ChunkCoord, view_distance: u16) -> Vec<ChunkCoord> {
    let vd = i64::from(view_distance);
    let mut out = Vec::new();
    for cx in (i64::from(center.cx) - vd)..=(i64::from(center.cx) + vd) {
        for cz in (i64::from(center.cz) - vd)..=(i64::from(center.cz) + vd) {
            let dx = cx - i64::from(center.cx);
            let dz = cz - i64::from(center.cz);
            if dx * dx + dz * dz > vd * vd {
                continue;
            }
            for cy in world_min_cy()..=world_max_cy() {
                let coord = ChunkCoord::new(cx as i32, cy, cz as i32);
                if coord.in_bounds() {
                    out.push(coord);
                }
            }
        }
    }
    out
}

/// The chunk-Y layer closest to the requested center that priority ordering
/// treats as "ground level", biased one layer down at the top of the world
/// where generation tends to be sparse air.
fn vertical_anchor(center_cy: i32) -> i32 {
    let min = world_min_cy();
    let max = world_max_cy();
    let anchor = center_cy.clamp(min, max);
    if anchor == max && max > min {
        anchor - 1
    } else {
        anchor
    }
}

/// Handles one `ChunkRequest`: updates interest, computes what needs
/// loading and unloading, queues prep work, and sends `ChunkUnload` for
/// anything that fell out of view (§4.4 steps 1-7).
pub async fn handle_chunk_request(
    sessions: &SessionTable,
    streaming: &StreamingPipeline,
    transport: &dyn Transport,
    conn: ConnId,
    cx: i32,
    cy: i32,
    cz: i32,
    view_dist: u16,
) {
    if !sessions.is_registered(conn) {
        return;
    }
    let view_distance = clamp_view_distance(view_dist);
    let center = ChunkCoord::new(cx, cy, cz);
    let desired = desired_coords(center, view_distance);
    let desired_set: HashSet<ChunkCoord> = desired.iter().copied().collect();
    let now = Instant::now();
    let retry_cooldown = Duration::from_millis(CHUNK_RETRY_INTERVAL_MS);

    let (mut to_load, to_unload, streamed_was_empty) = sessions
        .with_session_mut(conn, |session| {
            session.interest_center = Some(center);
            session.view_distance = view_distance;
            session.has_chunk_interest = true;

            session.pending.retain(|coord, _| desired_set.contains(coord));
            let pending_keys: HashSet<ChunkCoord> = session.pending.keys().copied().collect();
            session.pending_hash.retain(|coord, _| pending_keys.contains(coord));

            let streamed_was_empty = session.streamed.is_empty();

            let mut to_load = Vec::new();
            for coord in &desired {
                if session.streamed.contains(coord) {
                    continue;
                }
                if let Some(Some(sent_at)) = session.pending.get(coord) {
                    if now.duration_since(*sent_at) < retry_cooldown {
                        continue;
                    }
                }
                to_load.push(*coord);
            }

            let mut to_unload = Vec::new();
            let streamed_snapshot: Vec<ChunkCoord> = session.streamed.iter().copied().collect();
            for coord in streamed_snapshot {
                if !desired_set.contains(&coord) {
                    to_unload.push(coord);
                    session.streamed.remove(&coord);
                }
            }

            (to_load, to_unload, streamed_was_empty)
        })
        .unwrap_or_default();

    let anchor = vertical_anchor(center.cy);
    to_load.sort_by_key(|c| {
        let dx = i64::from(c.cx - center.cx);
        let dz = i64::from(c.cz - center.cz);
        let dist_sq = dx * dx + dz * dz;
        let initial_sync_phase = u8::from(streamed_was_empty && c.cy > anchor);
        let cy_diff = (c.cy - anchor).abs();
        (dist_sq, initial_sync_phase, cy_diff, c.cx, c.cy, c.cz)
    });

    let mut queued = 0usize;
    for coord in to_load {
        if queued >= MAX_SENDS_PER_UPDATE {
            break;
        }
        let is_retry = sessions.with_session(conn, |s| s.pending.contains_key(&coord)).unwrap_or(false);
        if !is_retry {
            let pending_len = sessions.with_session(conn, |s| s.pending.len()).unwrap_or(0);
            if pending_len >= MAX_PENDING_CHUNK_DATA {
                break;
            }
        }
        if !streaming.queue_prep(conn, coord) {
            break;
        }
        sessions.with_session_mut(conn, |s| {
            s.pending.insert(coord, Some(now));
        });
        queued += 1;
    }

    for coord in to_unload {
        let packet = Packet::ChunkUnload { cx: coord.cx, cy: coord.cy, cz: coord.cz };
        let bytes = encode_packet(&packet);
        if transport.send(conn, &bytes, Reliability::Reliable).await.is_err() {
            return;
        }
    }
}

/// Runs forever, pulling prep tasks off the queue and materializing them
/// via the chunk store. Generation and disk I/O are pushed onto a blocking
/// thread so a slow prep never stalls the network loop's tick clock. Also
/// materializes the coord's one-ring neighborhood so cross-chunk block
/// visibility at the streaming boundary is correct.
pub async fn run_prep_worker(state: Arc<ServerState>) {
    loop {
        let (conn, coord) = state.streaming.next_prep_task().await;
        let state_for_blocking = Arc::clone(&state);
        let result = tokio::task::spawn_blocking(move || {
            let primary = state_for_blocking.store.load_or_generate(coord)?;
            for neighbor in coord.one_ring_neighbors() {
                let _ = state_for_blocking.store.load_or_generate(neighbor);
            }
            Ok(primary)
        })
        .await;
        match result {
            Ok(Ok(_chunk)) => {
                state.streaming.mark_prep_done(conn, coord);
            }
            Ok(Err(err)) => {
                tracing::warn!(?coord, %err, "chunk prep failed");
            }
            Err(join_err) => {
                tracing::error!(%join_err, "chunk prep task panicked");
            }
        }
    }
}

/// Sends up to `MAX_SENDS_PER_UPDATE` prepared chunks per connection per
/// tick (§4.4 step 8).
pub async fn flush_send_queues(
    sessions: &SessionTable,
    streaming: &StreamingPipeline,
    store: &ChunkStore,
    transport: &dyn Transport,
) {
    for conn in sessions.all_connections() {
        for _ in 0..MAX_SENDS_PER_UPDATE {
            let Some(coord) = streaming.pop_send(conn) else { break };
            send_chunk_data(sessions, store, transport, conn, coord).await;
        }
    }
}

async fn send_chunk_data(
    sessions: &SessionTable,
    store: &ChunkStore,
    transport: &dyn Transport,
    conn: ConnId,
    coord: ChunkCoord,
) {
    let Some(still_pending) = sessions.with_session(conn, |s| s.pending.contains_key(&coord)) else {
        return;
    };
    if !still_pending {
        return;
    }
    let Some(chunk) = store.try_get(coord) else { return };
    let version = chunk.version();
    let inner = chunk.serialize_compressed();
    let (flags, payload) = wrap_chunk_payload(&inner);
    let hash = fnv1a32(&payload);
    let packet = Packet::ChunkData { cx: coord.cx, cy: coord.cy, cz: coord.cz, version, flags, payload };
    let bytes = encode_packet(&packet);
    if transport.send(conn, &bytes, Reliability::Reliable).await.is_err() {
        return;
    }
    sessions.with_session_mut(conn, |s| {
        s.pending.insert(coord, Some(Instant::now()));
        s.pending_hash.insert(coord, hash);
    });
}

/// Reconciles a `ChunkAck` against the recorded pending/streamed state
/// (§4.4 "ACK reconciliation"). `ChunkDelta`/`ChunkUnload` acks carry no
/// meaningful hash (`sequence = 0`) and always reconcile on receipt.
pub fn handle_chunk_ack(
    sessions: &SessionTable,
    conn: ConnId,
    acked_kind: u8,
    sequence: u32,
    coord: ChunkCoord,
) {
    sessions.with_session_mut(conn, |session| {
        if !session.pending.contains_key(&coord) {
            if !session.streamed.contains(&coord) {
                tracing::debug!(?coord, acked_kind, "ignoring ack for a chunk that is neither pending nor streamed");
            }
            return;
        }
        let expected = session.pending_hash.get(&coord).copied();
        let hash_ok = acked_kind != acked_type::CHUNK_DATA || expected.is_none() || expected == Some(sequence);
        if hash_ok {
            session.pending.remove(&coord);
            session.pending_hash.remove(&coord);
            session.streamed.insert(coord);
        } else {
            session.pending.insert(coord, None);
        }
    });
}
