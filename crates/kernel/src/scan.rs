//! Block-wise exclusive prefix sum over `u32` counters.
//!
//! Mirrors the thread-group scan used on the GPU: the input is cut into
//! blocks of [`ITEMS_PER_GROUP`] elements, each block is scanned locally with
//! a work-efficient up-sweep/down-sweep (two elements per thread), and the
//! block totals are scanned in turn until a single block remains. Level
//! buffers live on an explicit stack rather than the call stack, so the depth
//! is bounded by `log_512(N)`.

use std::collections::HashMap;

use rayon::prelude::*;

use crate::dispatch::{thread_groups, THREADS_PER_GROUP};
use crate::error::KernelError;

/// Elements handled by one thread group (two per thread).
pub const ITEMS_PER_GROUP: usize = 2 * THREADS_PER_GROUP as usize;

/// Exclusive prefix sum with cached group-sum buffers.
///
/// Group-sum buffers are keyed by block count and reused across calls, so a
/// scan over an unchanged length never allocates.
#[derive(Debug, Default)]
pub struct Scan {
    group_sums: HashMap<usize, Vec<u32>>,
}

impl Scan {
    /// Create a scan with an empty buffer cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace `data` with its exclusive prefix sum.
    ///
    /// Sums wrap on overflow, matching 32-bit GPU arithmetic.
    pub fn run(&mut self, data: &mut [u32]) {
        if data.is_empty() {
            return;
        }

        // Up pass: scan every level, collecting block totals into the next.
        let mut stack: Vec<Vec<u32>> = Vec::new();
        let mut sums = self.take_group_sums(thread_groups(data.len(), ITEMS_PER_GROUP));
        scan_blocks(data, &mut sums);
        while sums.len() > 1 {
            let mut next = self.take_group_sums(thread_groups(sums.len(), ITEMS_PER_GROUP));
            scan_blocks(&mut sums, &mut next);
            stack.push(sums);
            sums = next;
        }
        self.recycle(sums);

        // Down pass: each scanned level holds the starting offset of every
        // block of the level beneath it.
        let mut carry: Option<Vec<u32>> = None;
        while let Some(mut level) = stack.pop() {
            if let Some(block_offsets) = carry.take() {
                add_block_offsets(&mut level, &block_offsets);
                self.recycle(block_offsets);
            }
            carry = Some(level);
        }
        if let Some(block_offsets) = carry {
            add_block_offsets(data, &block_offsets);
            self.recycle(block_offsets);
        }
    }

    /// Write the exclusive prefix sum of `input` into `output`.
    pub fn run_into(&mut self, input: &[u32], output: &mut [u32]) -> Result<(), KernelError> {
        KernelError::check_len("scan output", input.len(), output.len())?;
        output.copy_from_slice(input);
        self.run(output);
        Ok(())
    }

    /// Block counts that currently have a cached group-sum buffer.
    pub fn cached_block_counts(&self) -> Vec<usize> {
        let mut counts: Vec<usize> = self.group_sums.keys().copied().collect();
        counts.sort_unstable();
        counts
    }

    fn take_group_sums(&mut self, groups: usize) -> Vec<u32> {
        self.group_sums
            .remove(&groups)
            .unwrap_or_else(|| vec![0; groups])
    }

    fn recycle(&mut self, buffer: Vec<u32>) {
        self.group_sums.insert(buffer.len(), buffer);
    }
}

/// Scan every block of `data` in place and store each block's total.
fn scan_blocks(data: &mut [u32], totals: &mut [u32]) {
    debug_assert_eq!(thread_groups(data.len(), ITEMS_PER_GROUP), totals.len());
    data.par_chunks_mut(ITEMS_PER_GROUP)
        .zip(totals.par_iter_mut())
        .for_each(|(block, total)| *total = scan_block(block));
}

/// Work-efficient exclusive scan of one block, returning the block total.
///
/// Each loop iteration over `thread` is one barrier-separated round of the
/// thread group; a short final block is padded with zeros.
fn scan_block(block: &mut [u32]) -> u32 {
    let mut temp = [0u32; ITEMS_PER_GROUP];
    temp[..block.len()].copy_from_slice(block);

    // Up-sweep (reduce).
    let mut offset = 1;
    let mut active = ITEMS_PER_GROUP / 2;
    while active > 0 {
        for thread in 0..active {
            let a = offset * (2 * thread + 1) - 1;
            let b = offset * (2 * thread + 2) - 1;
            temp[b] = temp[b].wrapping_add(temp[a]);
        }
        offset *= 2;
        active /= 2;
    }

    let total = temp[ITEMS_PER_GROUP - 1];
    temp[ITEMS_PER_GROUP - 1] = 0;

    // Down-sweep (broadcast).
    let mut active = 1;
    while active < ITEMS_PER_GROUP {
        offset /= 2;
        for thread in 0..active {
            let a = offset * (2 * thread + 1) - 1;
            let b = offset * (2 * thread + 2) - 1;
            let left = temp[a];
            temp[a] = temp[b];
            temp[b] = temp[b].wrapping_add(left);
        }
        active *= 2;
    }

    block.copy_from_slice(&temp[..block.len()]);
    total
}

fn add_block_offsets(data: &mut [u32], block_offsets: &[u32]) {
    data.par_chunks_mut(ITEMS_PER_GROUP)
        .zip(block_offsets.par_iter())
        .for_each(|(block, &offset)| {
            for value in block {
                *value = value.wrapping_add(offset);
            }
        });
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn reference_scan(input: &[u32]) -> Vec<u32> {
        let mut running = 0u32;
        input
            .iter()
            .map(|&v| {
                let out = running;
                running = running.wrapping_add(v);
                out
            })
            .collect()
    }

    #[test]
    fn single_block() {
        let mut data = vec![1, 2, 3, 4];
        Scan::new().run(&mut data);
        assert_eq!(data, vec![0, 1, 3, 6]);
    }

    #[test]
    fn empty_is_noop() {
        let mut data: Vec<u32> = Vec::new();
        Scan::new().run(&mut data);
        assert!(data.is_empty());
    }

    #[test]
    fn single_element_is_zero() {
        let mut data = vec![42];
        Scan::new().run(&mut data);
        assert_eq!(data, vec![0]);
    }

    #[test]
    fn exact_block_boundary() {
        let input = vec![1u32; ITEMS_PER_GROUP];
        let mut data = input.clone();
        Scan::new().run(&mut data);
        assert_eq!(data, reference_scan(&input));
    }

    #[test]
    fn two_levels() {
        // 3 blocks at level 0, one block of group sums.
        let input: Vec<u32> = (0..(2 * ITEMS_PER_GROUP + 7) as u32).map(|i| i % 5).collect();
        let mut data = input.clone();
        Scan::new().run(&mut data);
        assert_eq!(data, reference_scan(&input));
    }

    #[test]
    fn three_levels() {
        // More than 512 blocks forces a second level of group sums.
        let n = ITEMS_PER_GROUP * ITEMS_PER_GROUP + 3;
        let input: Vec<u32> = (0..n as u32).map(|i| (i * 7 + 3) % 11).collect();
        let mut data = input.clone();
        let mut scan = Scan::new();
        scan.run(&mut data);
        assert_eq!(data, reference_scan(&input));
        assert_eq!(scan.cached_block_counts(), vec![1, 2, ITEMS_PER_GROUP + 1]);
    }

    #[test]
    fn group_sums_are_reused() {
        let mut scan = Scan::new();
        let mut data = vec![1u32; 3 * ITEMS_PER_GROUP];
        scan.run(&mut data);
        let cached = scan.cached_block_counts();
        let mut again = vec![2u32; 3 * ITEMS_PER_GROUP];
        scan.run(&mut again);
        assert_eq!(scan.cached_block_counts(), cached);
        assert_eq!(again[ITEMS_PER_GROUP], 2 * ITEMS_PER_GROUP as u32);
    }

    #[test]
    fn paired_buffer_size_mismatch() {
        let mut out = vec![0u32; 3];
        let err = Scan::new().run_into(&[1, 2], &mut out).unwrap_err();
        assert!(matches!(err, KernelError::SizeMismatch { expected: 2, actual: 3, .. }));
    }

    proptest! {
        #[test]
        fn matches_sequential_scan(input in prop::collection::vec(0u32..1000, 0..3000)) {
            let mut output = vec![0u32; input.len()];
            Scan::new().run_into(&input, &mut output).unwrap();
            prop_assert_eq!(output, reference_scan(&input));
        }
    }
}
