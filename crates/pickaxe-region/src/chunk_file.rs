//! On-disk chunk persistence (§6): one file per chunk, byte-exact with
//! `Chunk::serialize_compressed()`. No region packing, no sector table —
//! the dense per-chunk format is already small enough that one chunk per
//! file is the simplest thing that works.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use pickaxe_types::ChunkCoord;

/// Path for a chunk's save file under `world_dir`.
pub fn chunk_path(world_dir: &Path, coord: ChunkCoord) -> PathBuf {
    world_dir.join(format!("chunk_{}_{}_{}.bin", coord.cx, coord.cy, coord.cz))
}

/// Creates `world_dir` (and parents) if it doesn't already exist.
pub fn ensure_world_dir(world_dir: &Path) -> io::Result<()> {
    fs::create_dir_all(world_dir)
}

/// Lists the chunk coordinates that currently have a save file under
/// `world_dir`, skipping any filename that doesn't match the expected
/// pattern rather than failing the whole scan.
pub fn list_saved_chunks(world_dir: &Path) -> io::Result<Vec<ChunkCoord>> {
    let mut coords = Vec::new();
    let entries = match fs::read_dir(world_dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(coords),
        Err(e) => return Err(e),
    };
    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if let Some(coord) = parse_chunk_filename(name) {
            coords.push(coord);
        }
    }
    Ok(coords)
}

fn parse_chunk_filename(name: &str) -> Option<ChunkCoord> {
    let stem = name.strip_prefix("chunk_")?.strip_suffix(".bin")?;
    let mut parts = stem.split('_');
    let cx = parts.next()?.parse().ok()?;
    let cy = parts.next()?.parse().ok()?;
    let cz = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some(ChunkCoord::new(cx, cy, cz))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_path_matches_naming_convention() {
        let dir = Path::new("/tmp/world");
        let path = chunk_path(dir, ChunkCoord::new(-3, 1, 4));
        assert_eq!(path, PathBuf::from("/tmp/world/chunk_-3_1_4.bin"));
    }

    #[test]
    fn round_trips_through_list_saved_chunks() {
        let dir = tempfile::tempdir().unwrap();
        ensure_world_dir(dir.path()).unwrap();
        let coord = ChunkCoord::new(2, 0, -5);
        fs::write(chunk_path(dir.path(), coord), b"fake-payload").unwrap();
        let listed = list_saved_chunks(dir.path()).unwrap();
        assert_eq!(listed, vec![coord]);
    }

    #[test]
    fn ignores_unrelated_filenames() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("not-a-chunk.txt"), b"x").unwrap();
        let listed = list_saved_chunks(dir.path()).unwrap();
        assert!(listed.is_empty());
    }

    #[test]
    fn missing_world_dir_returns_empty_not_error() {
        let listed = list_saved_chunks(Path::new("/tmp/pickaxe-region-does-not-exist")).unwrap();
        assert!(listed.is_empty());
    }
}
