//! The single-threaded network loop (§4.6): dt/physics integration, draining
//! transport callbacks and messages, packet dispatch, eviction, and the
//! periodic player-snapshot broadcast.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use pickaxe_protocol::codec::{decode_packet, encode_packet};
use pickaxe_protocol::packets::Packet;
use pickaxe_protocol::transport::{ConnId, ConnectionStatus, Reliability, Transport};
use pickaxe_types::{ChunkCoord, Vec3d, Vec3f, HEARTBEAT_TIMEOUT_SECS, SNAPSHOT_INTERVAL_MS};
use tokio::sync::watch;

use crate::pipeline::{flush_send_queues, handle_chunk_ack, handle_chunk_request};
use crate::state::ServerState;

const TICK_SLEEP: Duration = Duration::from_millis(10);

/// Runs until `shutdown` reports `true`.
pub async fn run(transport: Arc<dyn Transport>, state: Arc<ServerState>, mut shutdown: watch::Receiver<bool>) {
    let mut last_frame = Instant::now();
    let mut last_snapshot = Instant::now();
    let heartbeat_timeout = Duration::from_secs(HEARTBEAT_TIMEOUT_SECS);
    let snapshot_interval = Duration::from_millis(SNAPSHOT_INTERVAL_MS);

    loop {
        if *shutdown.borrow() {
            break;
        }
        let now = Instant::now();
        let dt = now.duration_since(last_frame).as_secs_f64();
        last_frame = now;
        state.sessions.integrate_players(dt);

        while let Some((conn, status)) = transport.try_recv_status().await {
            handle_status(transport.as_ref(), &state, conn, status).await;
        }

        while let Some((conn, bytes)) = transport.try_recv().await {
            handle_message(transport.as_ref(), &state, conn, bytes).await;
        }

        flush_send_queues(&state.sessions, &state.streaming, &state.store, transport.as_ref()).await;

        for conn in state.sessions.stale_heartbeats(heartbeat_timeout) {
            tracing::info!(%conn, "evicting connection: heartbeat timeout");
            evict_connection(transport.as_ref(), &state, conn).await;
        }

        if now.duration_since(last_snapshot) >= snapshot_interval {
            broadcast_snapshots(transport.as_ref(), &state).await;
            last_snapshot = now;
        }

        tokio::time::sleep(TICK_SLEEP).await;
    }
}

async fn handle_status(transport: &dyn Transport, state: &ServerState, conn: ConnId, status: ConnectionStatus) {
    match status {
        ConnectionStatus::Connecting | ConnectionStatus::Connected => {
            state.sessions.accept(conn);
        }
        ConnectionStatus::ClosedByPeer | ConnectionStatus::ProblemDetectedLocally => {
            tracing::debug!(%conn, ?status, "evicting connection: transport reported terminal state");
            evict_connection(transport, state, conn).await;
        }
    }
}

async fn evict_connection(transport: &dyn Transport, state: &ServerState, conn: ConnId) {
    let Some(evicted) = state.sessions.evict(conn) else { return };
    state.streaming.clear_pipeline(conn);
    transport.close(conn);
    if let Some(username) = evicted.username {
        broadcast_except(transport, state, conn, &Packet::ClientDisconnect { username }).await;
    }
}

async fn handle_message(transport: &dyn Transport, state: &ServerState, conn: ConnId, bytes: Vec<u8>) {
    let mut buf = BytesMut::from(bytes.as_slice());
    let packet = match decode_packet(&mut buf) {
        Ok(packet) => packet,
        Err(err) => {
            tracing::debug!(%conn, %err, "dropping malformed packet");
            return;
        }
    };

    if !matches!(packet, Packet::ConnectRequest { .. }) && !state.sessions.is_registered(conn) {
        return;
    }

    match packet {
        Packet::ConnectRequest { username: _ } => handle_connect_request(transport, state, conn).await,
        Packet::Message { text } => handle_chat(transport, state, conn, text).await,
        Packet::PlayerPosition { x, y, z, vx, vy, vz, .. } => {
            state.sessions.refresh_heartbeat(conn);
            let position = Vec3d::new(f64::from(x), f64::from(y), f64::from(z));
            let velocity = Vec3f::new(vx, vy, vz);
            state.sessions.apply_position_update(conn, position, velocity);
        }
        Packet::ChunkRequest { cx, cy, cz, view_dist } => {
            handle_chunk_request(&state.sessions, &state.streaming, transport, conn, cx, cy, cz, view_dist).await;
        }
        Packet::ChunkAck { acked_type, sequence, cx, cy, cz, .. } => {
            handle_chunk_ack(&state.sessions, conn, acked_type, sequence, ChunkCoord::new(cx, cy, cz));
        }
        Packet::ShootRequest { shot_id, tick, pos, dir, .. } => {
            state.sessions.refresh_heartbeat(conn);
            handle_shoot_request(transport, conn, shot_id, tick, pos, dir).await;
        }
        other => {
            tracing::debug!(%conn, ?other, "ignoring packet not expected from a client");
        }
    }
}

async fn handle_connect_request(transport: &dyn Transport, state: &ServerState, conn: ConnId) {
    match state.sessions.on_connect_request(conn) {
        Some(outcome) => {
            let response = encode_packet(&Packet::ConnectResponse { ok: true });
            let _ = transport.send(conn, &response, Reliability::Reliable).await;
            broadcast_except(
                transport,
                state,
                conn,
                &Packet::ClientConnect { username: outcome.username },
            )
            .await;
        }
        None => {
            let response = encode_packet(&Packet::ConnectResponse { ok: false });
            let _ = transport.send(conn, &response, Reliability::Reliable).await;
        }
    }
}

async fn handle_chat(transport: &dyn Transport, state: &ServerState, conn: ConnId, text: String) {
    let Some(username) = state.sessions.username_of(conn) else { return };
    if let Ok(mut history) = state.chat_history.lock() {
        if let Err(err) = history.append(&username, &text) {
            tracing::warn!(%err, "failed to append chat history");
        }
    }
    let chat = Packet::Message { text: format!("{username}:{text}") };
    let bytes = encode_packet(&chat);
    for recipient in state.sessions.all_connections() {
        let _ = transport.send(recipient, &bytes, Reliability::Reliable).await;
    }
}

/// Rubber-stamps every shot: extrapolates one unit along `dir` from `pos` and
/// always reports a hit. Real hit-scanning and anti-cheat validation are out
/// of scope (§9).
async fn handle_shoot_request(transport: &dyn Transport, conn: ConnId, shot_id: u32, tick: u32, pos: [f32; 3], dir: [f32; 3]) {
    let hit = [pos[0] + dir[0], pos[1] + dir[1], pos[2] + dir[2]];
    let result = Packet::ShootResult {
        shot_id,
        tick,
        accepted: true,
        did_hit: true,
        hit_entity: 123,
        hit,
        normal: [0.0, 1.0, 0.0],
        damage: 25.0,
        ammo: 9,
        server_seed: rand::random(),
    };
    let bytes = encode_packet(&result);
    let _ = transport.send(conn, &bytes, Reliability::Reliable).await;
}

async fn broadcast_except(transport: &dyn Transport, state: &ServerState, except: ConnId, packet: &Packet) {
    let bytes = encode_packet(packet);
    for conn in state.sessions.all_connections_except(except) {
        let _ = transport.send(conn, &bytes, Reliability::Reliable).await;
    }
}

async fn broadcast_snapshots(transport: &dyn Transport, state: &ServerState) {
    for (conn, player_id) in state.sessions.sessions_with_player() {
        match state.sessions.build_snapshot_for(player_id) {
            Some(players) => {
                let packet = Packet::PlayerSnapshot { players };
                let bytes = encode_packet(&packet);
                let _ = transport.send(conn, &bytes, Reliability::UnreliableNoDelay).await;
            }
            None => {
                evict_connection(transport, state, conn).await;
            }
        }
    }
}
