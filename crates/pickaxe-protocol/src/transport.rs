//! A reliable-ordered + unreliable-nodelay framed datagram transport over
//! UDP (§6, §9). The original server sits on top of GameNetworkingSockets;
//! there is no equivalent crate in this workspace's dependency stack, so
//! this module is the from-scratch idiomatic-Rust rendering of that seam:
//! a `Transport` trait (so the rest of the system only ever depends on the
//! seam, never the concrete socket) plus one real implementation on
//! `tokio::net::UdpSocket`.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, Mutex};
use tokio::time::interval;
use tracing::{debug, trace, warn};

/// A connection is identified by its socket address — UDP has no connection
/// setup of its own, so the address is the natural connection handle.
pub type ConnId = SocketAddr;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("unknown connection")]
    UnknownConnection,
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Mirrors the four states a GameNetworkingSockets-style connection
/// reports; the network loop and session manager key eviction off these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    ClosedByPeer,
    ProblemDetectedLocally,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reliability {
    Reliable,
    UnreliableNoDelay,
}

const WIRE_RELIABLE: u8 = 0;
const WIRE_UNRELIABLE: u8 = 1;
const WIRE_ACK: u8 = 2;

const RETRANSMIT_INTERVAL: Duration = Duration::from_millis(200);
const RETRANSMIT_TICK: Duration = Duration::from_millis(50);

struct InFlight {
    payload: Vec<u8>,
    sent_at: Instant,
}

struct ConnState {
    next_send_seq: u32,
    next_expected_recv: u32,
    in_flight: HashMap<u32, InFlight>,
    reordered: HashMap<u32, Vec<u8>>,
}

impl ConnState {
    fn new() -> Self {
        Self {
            next_send_seq: 0,
            next_expected_recv: 0,
            in_flight: HashMap::new(),
            reordered: HashMap::new(),
        }
    }
}

/// The transport every other component depends on. Async because sends and
/// receives cross the network loop's await points.
#[async_trait::async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, conn: ConnId, data: &[u8], reliability: Reliability) -> Result<(), TransportError>;
    /// Waits for the next (connection, message) pair.
    async fn recv(&self) -> Option<(ConnId, Vec<u8>)>;
    /// Waits for the next connection status transition.
    async fn recv_status(&self) -> Option<(ConnId, ConnectionStatus)>;
    /// Returns the next available message without waiting, or `None` if the
    /// queue is empty right now. The network loop's per-tick drain uses this
    /// rather than `recv` so a quiet tick never blocks the tick clock.
    async fn try_recv(&self) -> Option<(ConnId, Vec<u8>)>;
    /// Non-blocking counterpart to `recv_status`.
    async fn try_recv_status(&self) -> Option<(ConnId, ConnectionStatus)>;
    fn close(&self, conn: ConnId);
    fn local_addr(&self) -> SocketAddr;
}

pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
    states: Arc<Mutex<HashMap<ConnId, ConnState>>>,
    known: Arc<Mutex<std::collections::HashSet<ConnId>>>,
    inbound_rx: Mutex<mpsc::UnboundedReceiver<(ConnId, Vec<u8>)>>,
    status_rx: Mutex<mpsc::UnboundedReceiver<(ConnId, ConnectionStatus)>>,
    status_tx: mpsc::UnboundedSender<(ConnId, ConnectionStatus)>,
    next_seq_counter: AtomicU32,
}

impl UdpTransport {
    pub async fn bind(addr: SocketAddr) -> Result<Self, TransportError> {
        let socket = Arc::new(UdpSocket::bind(addr).await?);
        let local_addr = socket.local_addr()?;
        let states: Arc<Mutex<HashMap<ConnId, ConnState>>> = Arc::new(Mutex::new(HashMap::new()));
        let known = Arc::new(Mutex::new(std::collections::HashSet::new()));
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = mpsc::unbounded_channel();

        spawn_recv_loop(socket.clone(), states.clone(), known.clone(), inbound_tx, status_tx.clone());
        spawn_retransmit_loop(socket.clone(), states.clone());

        Ok(Self {
            socket,
            local_addr,
            states,
            known,
            inbound_rx: Mutex::new(inbound_rx),
            status_rx: Mutex::new(status_rx),
            status_tx,
            next_seq_counter: AtomicU32::new(0),
        })
    }
}

fn spawn_recv_loop(
    socket: Arc<UdpSocket>,
    states: Arc<Mutex<HashMap<ConnId, ConnState>>>,
    known: Arc<Mutex<std::collections::HashSet<ConnId>>>,
    inbound_tx: mpsc::UnboundedSender<(ConnId, Vec<u8>)>,
    status_tx: mpsc::UnboundedSender<(ConnId, ConnectionStatus)>,
) {
    tokio::spawn(async move {
        let mut buf = vec![0u8; 65536];
        loop {
            let (n, peer) = match socket.recv_from(&mut buf).await {
                Ok(v) => v,
                Err(e) => {
                    warn!("udp transport recv error: {e}");
                    continue;
                }
            };
            if n == 0 {
                continue;
            }
            let mut first_seen = false;
            {
                let mut known_guard = known.lock().await;
                if known_guard.insert(peer) {
                    first_seen = true;
                }
            }
            if first_seen {
                let _ = status_tx.send((peer, ConnectionStatus::Connecting));
                let _ = status_tx.send((peer, ConnectionStatus::Connected));
            }

            let mut frame = BytesMut::from(&buf[..n]);
            if frame.remaining() < 5 {
                continue;
            }
            let kind = frame.get_u8();
            let seq = frame.get_u32_le();
            let payload = frame.to_vec();

            match kind {
                WIRE_UNRELIABLE => {
                    let _ = inbound_tx.send((peer, payload));
                }
                WIRE_RELIABLE => {
                    // ack every reliable datagram, dedup/reorder against the state.
                    let mut ack = BytesMut::with_capacity(5);
                    ack.put_u8(WIRE_ACK);
                    ack.put_u32_le(seq);
                    let _ = socket.send_to(&ack, peer).await;

                    let mut guard = states.lock().await;
                    let state = guard.entry(peer).or_insert_with(ConnState::new);
                    if seq < state.next_expected_recv {
                        continue; // duplicate retransmit, already delivered
                    }
                    state.reordered.insert(seq, payload);
                    while let Some(p) = state.reordered.remove(&state.next_expected_recv) {
                        let _ = inbound_tx.send((peer, p));
                        state.next_expected_recv += 1;
                    }
                }
                WIRE_ACK => {
                    let mut guard = states.lock().await;
                    if let Some(state) = guard.get_mut(&peer) {
                        state.in_flight.remove(&seq);
                    }
                }
                other => {
                    trace!("udp transport: unknown frame kind {other} from {peer}");
                }
            }
        }
    });
}

fn spawn_retransmit_loop(socket: Arc<UdpSocket>, states: Arc<Mutex<HashMap<ConnId, ConnState>>>) {
    tokio::spawn(async move {
        let mut ticker = interval(RETRANSMIT_TICK);
        loop {
            ticker.tick().await;
            let now = Instant::now();
            let mut guard = states.lock().await;
            for (peer, state) in guard.iter_mut() {
                for (seq, inflight) in state.in_flight.iter_mut() {
                    if now.duration_since(inflight.sent_at) >= RETRANSMIT_INTERVAL {
                        let mut frame = BytesMut::with_capacity(5 + inflight.payload.len());
                        frame.put_u8(WIRE_RELIABLE);
                        frame.put_u32_le(*seq);
                        frame.put_slice(&inflight.payload);
                        let _ = socket.try_send_to(&frame, *peer);
                        inflight.sent_at = now;
                    }
                }
            }
        }
    });
}

#[async_trait::async_trait]
impl Transport for UdpTransport {
    async fn send(&self, conn: ConnId, data: &[u8], reliability: Reliability) -> Result<(), TransportError> {
        match reliability {
            Reliability::UnreliableNoDelay => {
                let mut frame = BytesMut::with_capacity(5 + data.len());
                frame.put_u8(WIRE_UNRELIABLE);
                frame.put_u32_le(0);
                frame.put_slice(data);
                self.socket.send_to(&frame, conn).await?;
                Ok(())
            }
            Reliability::Reliable => {
                let seq = {
                    let mut guard = self.states.lock().await;
                    let state = guard.entry(conn).or_insert_with(ConnState::new);
                    let seq = state.next_send_seq;
                    state.next_send_seq += 1;
                    state.in_flight.insert(
                        seq,
                        InFlight { payload: data.to_vec(), sent_at: Instant::now() },
                    );
                    seq
                };
                let mut frame = BytesMut::with_capacity(5 + data.len());
                frame.put_u8(WIRE_RELIABLE);
                frame.put_u32_le(seq);
                frame.put_slice(data);
                self.socket.send_to(&frame, conn).await?;
                let _ = self.next_seq_counter.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
        }
    }

    async fn recv(&self) -> Option<(ConnId, Vec<u8>)> {
        self.inbound_rx.lock().await.recv().await
    }

    async fn recv_status(&self) -> Option<(ConnId, ConnectionStatus)> {
        self.status_rx.lock().await.recv().await
    }

    async fn try_recv(&self) -> Option<(ConnId, Vec<u8>)> {
        self.inbound_rx.lock().await.try_recv().ok()
    }

    async fn try_recv_status(&self) -> Option<(ConnId, ConnectionStatus)> {
        self.status_rx.lock().await.try_recv().ok()
    }

    fn close(&self, conn: ConnId) {
        let status_tx = self.status_tx.clone();
        let states = self.states.clone();
        let known = self.known.clone();
        tokio::spawn(async move {
            states.lock().await.remove(&conn);
            known.lock().await.remove(&conn);
            let _ = status_tx.send((conn, ConnectionStatus::ClosedByPeer));
        });
        debug!("closed connection to {conn}");
    }

    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}
