//! Spatial hashing and neighbour iteration over a [`SpatialIndex`].
//!
//! Cells are cubes with edge = smoothing radius. A cell hashes to a bucket id
//! and the bucket id modulo the particle count is the spatial key, so distinct
//! cells may share a key. Candidates found through a key are kept only when
//! they actually lie in the visited cell and within the radius.
//!
//! [`SpatialIndex`]: crate::spatial_index::SpatialIndex

use glam::{IVec3, Vec3};

const HASH_K1: u32 = 15823;
const HASH_K2: u32 = 9737333;
const HASH_K3: u32 = 440817757;

/// Relative cell coordinates of the 3x3x3 neighbourhood.
pub const CELL_OFFSETS: [IVec3; 27] = {
    let mut offsets = [IVec3::ZERO; 27];
    let mut i = 0;
    while i < 27 {
        offsets[i] = IVec3::new(
            (i % 3) as i32 - 1,
            ((i / 3) % 3) as i32 - 1,
            (i / 9) as i32 - 1,
        );
        i += 1;
    }
    offsets
};

/// Cell containing `position` for cells of edge `radius`.
#[inline]
pub fn position_to_cell(position: Vec3, radius: f32) -> IVec3 {
    (position / radius).floor().as_ivec3()
}

/// Bucket id of a cell (wrapping `u32` arithmetic on two's-complement coordinates).
#[inline]
pub fn hash_cell(cell: IVec3) -> u32 {
    (cell.x as u32)
        .wrapping_mul(HASH_K1)
        .wrapping_add((cell.y as u32).wrapping_mul(HASH_K2))
        .wrapping_add((cell.z as u32).wrapping_mul(HASH_K3))
}

/// Spatial key for a bucket id in a table of `table_size` entries.
#[inline]
pub fn key_from_hash(hash: u32, table_size: u32) -> u32 {
    hash % table_size
}

/// Read-only view of sorted particle positions and the spatial index built
/// from them.
///
/// Positions must already be in sorted order, so a sorted index is also the
/// particle index.
#[derive(Clone, Copy)]
pub struct NeighbourSearch<'a> {
    positions: &'a [Vec3],
    sorted_keys: &'a [u32],
    offsets: &'a [u32],
    radius: f32,
}

impl<'a> NeighbourSearch<'a> {
    /// Bind sorted positions to their keys and offset table.
    pub fn new(positions: &'a [Vec3], sorted_keys: &'a [u32], offsets: &'a [u32], radius: f32) -> Self {
        debug_assert_eq!(positions.len(), sorted_keys.len());
        debug_assert_eq!(sorted_keys.len(), offsets.len());
        Self { positions, sorted_keys, offsets, radius }
    }

    /// Smoothing radius (cell edge).
    pub fn radius(&self) -> f32 {
        self.radius
    }

    /// Invoke `f(j, offset, dist_sq)` for every particle `j` with
    /// `|positions[j] - origin|^2 <= radius^2`, where `offset = positions[j] - origin`.
    ///
    /// Includes a particle located at `origin` itself. Every particle is
    /// reported at most once, even when neighbouring cells share a key.
    pub fn for_each_neighbour<F>(&self, origin: Vec3, mut f: F)
    where
        F: FnMut(usize, Vec3, f32),
    {
        let n = self.sorted_keys.len();
        if n == 0 {
            return;
        }
        let radius_sq = self.radius * self.radius;
        let origin_cell = position_to_cell(origin, self.radius);

        for offset in CELL_OFFSETS {
            let cell = origin_cell + offset;
            let key = key_from_hash(hash_cell(cell), n as u32);
            let mut current = self.offsets[key as usize] as usize;

            while current < n {
                if self.sorted_keys[current] != key {
                    break;
                }
                let candidate = self.positions[current];
                if position_to_cell(candidate, self.radius) == cell {
                    let to_neighbour = candidate - origin;
                    let dist_sq = to_neighbour.length_squared();
                    if dist_sq <= radius_sq {
                        f(current, to_neighbour, dist_sq);
                    }
                }
                current += 1;
            }
        }
    }
}
