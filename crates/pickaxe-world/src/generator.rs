//! Deterministic procedural generation: fractal-noise terrain plus
//! seeded tree decoration (§4.3). Every function here is a pure query over
//! world coordinates and a seed — no shared mutable state, so the noise
//! generator can be cloned freely across worker threads.

use noise::{NoiseFn, Perlin};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use pickaxe_types::{BlockId, ChunkCoord, BLOCK_AIR, BLOCK_BEDROCK, BLOCK_DIRT, BLOCK_GRASS, BLOCK_LEAVES, BLOCK_LOG, BLOCK_STONE, CHUNK_SIZE, WORLD_MAX_Y, WORLD_MIN_Y};

const TERRAIN_OCTAVES: u32 = 6;
const TERRAIN_BASE_FREQ: f64 = 0.009;
const TERRAIN_BASE_AMP: f64 = 1.9;
const TERRAIN_PERSISTENCE: f64 = 0.5;

const TREE_MIX_PRIME_X: u32 = 73_856_093;
const TREE_MIX_PRIME_Y: u32 = 19_349_663;
const TREE_MIX_PRIME_Z: u32 = 83_492_791;

const CROWN_RADIUS: i32 = 4;
const TAPER_RADIUS: i32 = 2;

/// Which decoration sweep is placing trees — the two differ only in density
/// and trunk height, per §4.3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecorationPass {
    /// The bootstrap sweep that decorates every chunk materialized by
    /// `generate_initial_two_pass`.
    TwoPass,
    /// The on-demand per-chunk decoration used outside bootstrap.
    SinglePass,
}

impl DecorationPass {
    fn chance(self) -> f64 {
        match self {
            DecorationPass::TwoPass => 0.02,
            DecorationPass::SinglePass => 0.003,
        }
    }

    fn trunk_height_range(self) -> std::ops::RangeInclusive<i32> {
        match self {
            DecorationPass::TwoPass => 10..=14,
            DecorationPass::SinglePass => 6..=10,
        }
    }
}

/// A single tree placement decided by the decoration pass: world-space
/// origin of its 2x2 trunk footprint and the trunk's height in blocks.
#[derive(Debug, Clone, Copy)]
pub struct TreePlacement {
    pub world_x: i32,
    pub world_y_base: i32,
    pub world_z: i32,
    pub trunk_height: i32,
}

pub struct WorldGenerator {
    seed: u64,
    noise: Perlin,
}

impl WorldGenerator {
    pub fn new(seed: u64) -> Self {
        let noise_seed = (seed & 0x7FFF_FFFF) as u32;
        Self { seed, noise: Perlin::new(noise_seed) }
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Six-octave fractal noise, normalized by total amplitude, mapped to a
    /// world-Y terrain height.
    pub fn terrain_height(&self, world_x: i32, world_z: i32) -> i32 {
        let mut freq = TERRAIN_BASE_FREQ;
        let mut amp = TERRAIN_BASE_AMP;
        let mut total = 0.0;
        let mut total_amp = 0.0;
        for _ in 0..TERRAIN_OCTAVES {
            total += self.noise.get([world_x as f64 * freq, world_z as f64 * freq]) * amp;
            total_amp += amp;
            freq *= 2.0;
            amp *= TERRAIN_PERSISTENCE;
        }
        let n = (total / total_amp).clamp(-1.0, 1.0);
        let span = (WORLD_MAX_Y - WORLD_MIN_Y) as f64;
        let h = WORLD_MIN_Y as f64 + ((n + 1.0) / 2.0) * span;
        h.round() as i32
    }

    /// Block assignment at a single world position given the column's
    /// terrain height.
    pub fn block_at(&self, world_y: i32, height: i32) -> BlockId {
        if world_y == WORLD_MIN_Y {
            BLOCK_BEDROCK
        } else if world_y < height - 2 {
            BLOCK_STONE
        } else if world_y < height - 1 {
            BLOCK_DIRT
        } else if world_y < height {
            BLOCK_GRASS
        } else {
            BLOCK_AIR
        }
    }

    /// Deterministic per-chunk RNG seed, mixed from the chunk coordinate and
    /// the world seed via the three mixing primes.
    fn chunk_seed(&self, coord: ChunkCoord) -> u64 {
        let mixed = (coord.cx as u32).wrapping_mul(TREE_MIX_PRIME_X)
            ^ (coord.cy as u32).wrapping_mul(TREE_MIX_PRIME_Y)
            ^ (coord.cz as u32).wrapping_mul(TREE_MIX_PRIME_Z);
        (mixed as u64) ^ self.seed
    }

    /// Decide tree placements for one chunk: for every column whose grass
    /// top falls within this chunk's vertical slice, roll the decoration
    /// chance in a fixed, sequential column order so results are
    /// reproducible given the same seed and pass.
    pub fn trees_for_chunk(&self, coord: ChunkCoord, pass: DecorationPass) -> Vec<TreePlacement> {
        let mut rng = StdRng::seed_from_u64(self.chunk_seed(coord));
        let chance = pass.chance();
        let height_range = pass.trunk_height_range();
        let chunk_y_min = coord.cy * CHUNK_SIZE;
        let chunk_y_max = chunk_y_min + CHUNK_SIZE - 1;

        let mut placements = Vec::new();
        for lz in 0..CHUNK_SIZE {
            for lx in 0..CHUNK_SIZE {
                let world_x = coord.cx * CHUNK_SIZE + lx;
                let world_z = coord.cz * CHUNK_SIZE + lz;
                let height = self.terrain_height(world_x, world_z);
                let grass_top = height - 1;
                if grass_top < chunk_y_min || grass_top > chunk_y_max {
                    // Draw anyway to keep the RNG stream in lockstep across
                    // chunks at different cy for the same (cx, cz) column.
                    let _: f64 = rng.gen();
                    continue;
                }
                let draw: f64 = rng.gen();
                if draw < chance {
                    let trunk_height = rng.gen_range(height_range.clone());
                    placements.push(TreePlacement {
                        world_x,
                        world_y_base: grass_top,
                        world_z,
                        trunk_height,
                    });
                }
            }
        }
        placements
    }
}

fn smoothstep(edge0: f64, edge1: f64, x: f64) -> f64 {
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

/// One block write a tree placement wants to make, expressed in world
/// coordinates with a flag for whether it must only land on air.
pub struct TreeBlockWrite {
    pub world_x: i32,
    pub world_y: i32,
    pub world_z: i32,
    pub block_id: BlockId,
    pub air_only: bool,
}

/// Expand a tree placement into its individual block writes: a 2x2 trunk
/// column, a two-layer crown of radius 4, and a taper layer of radius 2.
/// Crown/taper holes follow a smoothstep ramp from the center outward,
/// halved on the bottom crown layer.
pub fn tree_writes(tree: TreePlacement, coord: ChunkCoord, seed: u64) -> Vec<TreeBlockWrite> {
    let mut rng = StdRng::seed_from_u64(
        seed ^ (tree.world_x as u64).wrapping_mul(0x9E37_79B9)
            ^ (tree.world_z as u64).wrapping_mul(0x85EB_CA6B)
            ^ (coord.cy as u64),
    );
    let mut writes = Vec::new();

    let trunk_top = tree.world_y_base + tree.trunk_height;
    for dz in 0..2 {
        for dx in 0..2 {
            for y in (tree.world_y_base + 1)..=trunk_top {
                writes.push(TreeBlockWrite {
                    world_x: tree.world_x + dx,
                    world_y: y,
                    world_z: tree.world_z + dz,
                    block_id: BLOCK_LOG,
                    air_only: false,
                });
            }
        }
    }

    let center_x = tree.world_x as f64 + 0.5;
    let center_z = tree.world_z as f64 + 0.5;
    let crown_layers = [trunk_top, trunk_top - 1];
    for (layer_idx, &y) in crown_layers.iter().enumerate() {
        let is_bottom_layer = layer_idx == crown_layers.len() - 1;
        for dz in -CROWN_RADIUS..=CROWN_RADIUS + 1 {
            for dx in -CROWN_RADIUS..=CROWN_RADIUS + 1 {
                let wx = tree.world_x + dx;
                let wz = tree.world_z + dz;
                let dist = ((wx as f64 + 0.5 - center_x).powi(2) + (wz as f64 + 0.5 - center_z).powi(2)).sqrt();
                if dist > CROWN_RADIUS as f64 {
                    continue;
                }
                let mut skip = smoothstep(0.7, 1.0, dist / CROWN_RADIUS as f64) * 0.65;
                if is_bottom_layer {
                    skip *= 0.5;
                }
                if rng.gen::<f64>() < skip {
                    continue;
                }
                writes.push(TreeBlockWrite { world_x: wx, world_y: y, world_z: wz, block_id: BLOCK_LEAVES, air_only: true });
            }
        }
    }

    let taper_y = trunk_top + 1;
    for dz in -TAPER_RADIUS..=TAPER_RADIUS {
        for dx in -TAPER_RADIUS..=TAPER_RADIUS {
            let wx = tree.world_x + dx;
            let wz = tree.world_z + dz;
            let dist = ((wx as f64 + 0.5 - center_x).powi(2) + (wz as f64 + 0.5 - center_z).powi(2)).sqrt();
            if dist > TAPER_RADIUS as f64 {
                continue;
            }
            let skip = smoothstep(0.7, 1.0, dist / TAPER_RADIUS as f64) * 0.65;
            if rng.gen::<f64>() < skip {
                continue;
            }
            writes.push(TreeBlockWrite { world_x: wx, world_y: taper_y, world_z: wz, block_id: BLOCK_LEAVES, air_only: true });
        }
    }

    writes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terrain_height_is_deterministic() {
        let gen = WorldGenerator::new(1337);
        assert_eq!(gen.terrain_height(10, -4), gen.terrain_height(10, -4));
    }

    #[test]
    fn terrain_height_stays_in_world_bounds() {
        let gen = WorldGenerator::new(1337);
        for x in (-50..50).step_by(7) {
            for z in (-50..50).step_by(7) {
                let h = gen.terrain_height(x, z);
                assert!(h >= WORLD_MIN_Y && h <= WORLD_MAX_Y);
            }
        }
    }

    #[test]
    fn tree_placement_is_deterministic() {
        let gen = WorldGenerator::new(1337);
        let coord = ChunkCoord::new(0, 0, 0);
        let a = gen.trees_for_chunk(coord, DecorationPass::TwoPass);
        let b = gen.trees_for_chunk(coord, DecorationPass::TwoPass);
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.world_x, y.world_x);
            assert_eq!(x.world_z, y.world_z);
            assert_eq!(x.trunk_height, y.trunk_height);
        }
    }
}
