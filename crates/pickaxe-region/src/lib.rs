pub mod chunk_file;

pub use chunk_file::{chunk_path, ensure_world_dir, list_saved_chunks};
