//! Reusable acceleration structure over N particles: spatial keys, the sorted
//! index permutation and the per-key offset table.

use rayon::prelude::*;

use crate::count_sort::CountSort;
use crate::error::KernelError;
use crate::offset_table::build_offset_table;

/// Keys, sorted indices and offsets for N particles.
///
/// All three buffers are released and reallocated together; every
/// reallocation bumps [`SpatialIndex::generation`], so holders of stale
/// lengths can tell their view is out of date.
#[derive(Debug, Default)]
pub struct SpatialIndex {
    keys: Vec<u32>,
    sorted_indices: Vec<u32>,
    offsets: Vec<u32>,
    sort: CountSort,
    generation: u64,
}

impl SpatialIndex {
    /// Allocate an index for `n` particles.
    pub fn new(n: usize) -> Self {
        let mut index = Self::default();
        index.allocate(n);
        index
    }

    /// Release and reallocate every buffer for `n` particles.
    pub fn allocate(&mut self, n: usize) {
        self.keys = vec![0; n];
        self.sorted_indices = (0..n as u32).collect();
        self.offsets = vec![n as u32; n];
        self.sort = CountSort::new();
        self.generation += 1;
    }

    /// Same as [`SpatialIndex::allocate`]; buffers never grow in place.
    pub fn resize(&mut self, n: usize) {
        self.allocate(n);
    }

    /// Number of particles indexed.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// `true` for an index over zero particles.
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Allocation generation, starting at 1.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Spatial keys; sorted ascending after [`SpatialIndex::run`].
    pub fn keys(&self) -> &[u32] {
        &self.keys
    }

    /// Mutable keys, filled by the caller before [`SpatialIndex::run`].
    pub fn keys_mut(&mut self) -> &mut [u32] {
        &mut self.keys
    }

    /// Original slot of the particle now at each sorted position.
    pub fn sorted_indices(&self) -> &[u32] {
        &self.sorted_indices
    }

    /// First sorted index per key, or `len()` for absent keys.
    pub fn offsets(&self) -> &[u32] {
        &self.offsets
    }

    /// Sort the identity permutation by key and rebuild the offset table.
    ///
    /// Keys must already be populated and lie in `[0, len-1]`. Within a key
    /// run, sorted indices come out ascending so repeated runs over the same
    /// keys are reproducible.
    pub fn run(&mut self) -> Result<(), KernelError> {
        let n = self.keys.len();
        KernelError::check_len("sorted indices", n, self.sorted_indices.len())?;
        if n == 0 {
            return Ok(());
        }

        self.sorted_indices
            .par_iter_mut()
            .enumerate()
            .for_each(|(i, index)| *index = i as u32);

        self.sort
            .run(&mut self.sorted_indices, &mut self.keys, (n - 1) as u32);
        build_offset_table(&self.keys, &mut self.offsets)?;
        order_runs(&self.keys, &self.offsets, &mut self.sorted_indices);
        Ok(())
    }

    /// Sorted positions holding `key`, found by scanning forward from its offset.
    pub fn cell_range(&self, key: u32) -> std::ops::Range<usize> {
        let Some(&start) = self.offsets.get(key as usize) else {
            return 0..0;
        };
        let start = start as usize;
        let len = self.keys[start.min(self.keys.len())..]
            .iter()
            .take_while(|&&k| k == key)
            .count();
        start..start + len
    }
}

/// Order each run of equal keys by original index.
fn order_runs(sorted_keys: &[u32], offsets: &[u32], sorted_indices: &mut [u32]) {
    let n = sorted_keys.len();
    let mut runs: Vec<&mut [u32]> = Vec::new();
    let mut rest = sorted_indices;
    let mut start = 0;
    while start < n {
        let key = sorted_keys[start];
        debug_assert_eq!(offsets[key as usize] as usize, start);
        let end = start + sorted_keys[start..].iter().take_while(|&&k| k == key).count();
        let (run, tail) = std::mem::take(&mut rest).split_at_mut(end - start);
        if run.len() > 1 {
            runs.push(run);
        }
        rest = tail;
        start = end;
    }
    runs.into_par_iter().for_each(|run| run.sort_unstable());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_sorts_and_builds_offsets() {
        let mut index = SpatialIndex::new(4);
        index.keys_mut().copy_from_slice(&[2, 0, 2, 1]);
        index.run().unwrap();
        assert_eq!(index.keys(), &[0, 1, 2, 2]);
        assert_eq!(index.sorted_indices(), &[1, 3, 0, 2]);
        assert_eq!(index.offsets(), &[0, 1, 2, 4]);
    }

    #[test]
    fn absent_keys_use_sentinel() {
        let mut index = SpatialIndex::new(5);
        index.keys_mut().copy_from_slice(&[3, 3, 3, 0, 0]);
        index.run().unwrap();
        assert_eq!(index.offsets(), &[0, 5, 5, 2, 5]);
        assert_eq!(index.cell_range(3), 2..5);
        assert_eq!(index.cell_range(1), 5..5);
    }

    #[test]
    fn empty_index_runs() {
        let mut index = SpatialIndex::new(0);
        assert!(index.is_empty());
        index.run().unwrap();
        assert!(index.offsets().is_empty());
    }

    #[test]
    fn resize_bumps_generation() {
        let mut index = SpatialIndex::new(3);
        let before = index.generation();
        index.resize(7);
        assert_eq!(index.len(), 7);
        assert_eq!(index.sorted_indices().len(), 7);
        assert_eq!(index.offsets(), &[7; 7]);
        assert_eq!(index.generation(), before + 1);
    }
}
