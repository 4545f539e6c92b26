//! Shared server state, wired together in `main` and handed by reference to
//! the network loop and the prep worker.

use std::sync::Mutex;

use pickaxe_world::ChunkStore;

use crate::chat_history::ChatHistory;
use crate::config::ServerConfig;
use crate::session::SessionTable;
use crate::streaming::StreamingPipeline;

pub struct ServerState {
    pub store: ChunkStore,
    pub sessions: SessionTable,
    pub streaming: StreamingPipeline,
    pub chat_history: Mutex<ChatHistory>,
    pub config: ServerConfig,
}

impl ServerState {
    pub fn new(config: ServerConfig, store: ChunkStore, chat_history: ChatHistory) -> Self {
        Self {
            store,
            sessions: SessionTable::new(),
            streaming: StreamingPipeline::new(),
            chat_history: Mutex::new(chat_history),
            config,
        }
    }
}
