pub mod chunk;
pub mod generator;
pub mod store;

pub use chunk::Chunk;
pub use store::{ChunkStore, StoreError};
