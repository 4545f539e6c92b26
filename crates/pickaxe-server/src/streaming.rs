//! The per-client streaming pipeline (§4.4) — the hardest subsystem. Holds
//! the prep queue/prep-queued set and the per-connection send queues/
//! send-queued set behind one mutex, per §3's ownership note ("guarded by a
//! single mutex separate from the session mutex to avoid ordering
//! inversion").

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use pickaxe_protocol::transport::ConnId;
use pickaxe_types::{ChunkCoord, MAX_PREP_QUEUE, MAX_SEND_QUEUE_PER_CLIENT};
use tokio::sync::Notify;

type Key = (ConnId, ChunkCoord);

struct StreamingState {
    prep_queue: VecDeque<Key>,
    prep_queued: HashSet<Key>,
    send_queues: HashMap<ConnId, VecDeque<ChunkCoord>>,
    send_queued: HashSet<Key>,
}

pub struct StreamingPipeline {
    state: Mutex<StreamingState>,
    notify: Notify,
}

impl StreamingPipeline {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(StreamingState {
                prep_queue: VecDeque::new(),
                prep_queued: HashSet::new(),
                send_queues: HashMap::new(),
                send_queued: HashSet::new(),
            }),
            notify: Notify::new(),
        }
    }

    /// Enqueues a prep task unless the key is already in flight (prep-queued
    /// or send-queued — the invariant that a key lives in at most one of
    /// those sets suppresses the duplicate silently, not as a failure).
    /// Returns `false` only when the prep queue itself is at capacity.
    pub fn queue_prep(&self, conn: ConnId, coord: ChunkCoord) -> bool {
        let key = (conn, coord);
        let mut state = self.state.lock().unwrap();
        if state.prep_queued.contains(&key) || state.send_queued.contains(&key) {
            return true;
        }
        if state.prep_queue.len() >= MAX_PREP_QUEUE {
            return false;
        }
        state.prep_queue.push_back(key);
        state.prep_queued.insert(key);
        drop(state);
        self.notify.notify_one();
        true
    }

    /// Blocks until a prep task is available.
    pub async fn next_prep_task(&self) -> (ConnId, ChunkCoord) {
        loop {
            {
                let mut state = self.state.lock().unwrap();
                if let Some(task) = state.prep_queue.pop_front() {
                    return task;
                }
            }
            self.notify.notified().await;
        }
    }

    pub fn is_prep_queued(&self, conn: ConnId, coord: ChunkCoord) -> bool {
        self.state.lock().unwrap().prep_queued.contains(&(conn, coord))
    }

    /// Moves a completed prep from `prepQueued` into `sendQueued` and this
    /// connection's send queue. Drops the task (returns `false`) if the
    /// connection's send queue is already full — the caller's next
    /// `ChunkRequest` will re-enqueue it as a retry.
    pub fn mark_prep_done(&self, conn: ConnId, coord: ChunkCoord) -> bool {
        let key = (conn, coord);
        let mut state = self.state.lock().unwrap();
        state.prep_queued.remove(&key);
        let queue = state.send_queues.entry(conn).or_default();
        if queue.len() >= MAX_SEND_QUEUE_PER_CLIENT {
            return false;
        }
        queue.push_back(coord);
        state.send_queued.insert(key);
        true
    }

    /// Pops the next coordinate off a connection's send queue.
    pub fn pop_send(&self, conn: ConnId) -> Option<ChunkCoord> {
        let mut state = self.state.lock().unwrap();
        let queue = state.send_queues.get_mut(&conn)?;
        let coord = queue.pop_front()?;
        state.send_queued.remove(&(conn, coord));
        Some(coord)
    }

    /// Removes every trace of `conn` from all four structures in one
    /// critical section (§4.4 cancellation).
    pub fn clear_pipeline(&self, conn: ConnId) {
        let mut state = self.state.lock().unwrap();
        state.prep_queue.retain(|(c, _)| *c != conn);
        state.prep_queued.retain(|(c, _)| *c != conn);
        state.send_queues.remove(&conn);
        state.send_queued.retain(|(c, _)| *c != conn);
    }
}

impl Default for StreamingPipeline {
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

    #[tokio::test]
    async fn prep_to_send_to_pop_round_trip() {
        let pipeline = StreamingPipeline::new();
        let conn = addr(1);
        let coord = ChunkCoord::new(0, 0, 0);
        assert!(pipeline.queue_prep(conn, coord));
        assert!(pipeline.is_prep_queued(conn, coord));
        let task = pipeline.next_prep_task().await;
        assert_eq!(task, (conn, coord));
        assert!(pipeline.mark_prep_done(conn, coord));
        assert!(!pipeline.is_prep_queued(conn, coord));
        assert_eq!(pipeline.pop_send(conn), Some(coord));
        assert_eq!(pipeline.pop_send(conn), None);
    }

    #[test]
    fn requeueing_an_in_flight_key_is_a_silent_no_op() {
        let pipeline = StreamingPipeline::new();
        let conn = addr(2);
        let coord = ChunkCoord::new(1, 0, 0);
        assert!(pipeline.queue_prep(conn, coord));
        assert!(pipeline.queue_prep(conn, coord));
        let state = pipeline.state.lock().unwrap();
        assert_eq!(state.prep_queue.len(), 1);
    }

    #[test]
    fn clear_pipeline_removes_every_trace_of_a_connection() {
        let pipeline = StreamingPipeline::new();
        let conn = addr(3);
        let other = addr(4);
        pipeline.queue_prep(conn, ChunkCoord::new(0, 0, 0));
        pipeline.queue_prep(other, ChunkCoord::new(1, 0, 0));
        pipeline.mark_prep_done(conn, ChunkCoord::new(0, 0, 0));
        pipeline.clear_pipeline(conn);
        assert_eq!(pipeline.pop_send(conn), None);
        assert!(!pipeline.is_prep_queued(conn, ChunkCoord::new(0, 0, 0)));
        // The other connection's work is untouched.
        assert!(pipeline.is_prep_queued(other, ChunkCoord::new(1, 0, 0)));
    }

    #[test]
    fn full_send_queue_drops_the_completed_prep() {
        let pipeline = StreamingPipeline::new();
        let conn = addr(5);
        for i in 0..MAX_SEND_QUEUE_PER_CLIENT {
            assert!(pipeline.mark_prep_done(conn, ChunkCoord::new(i as i32, 0, 0)));
        }
        assert!(!pipeline.mark_prep_done(conn, ChunkCoord::new(9999, 0, 0)));
    }
}
