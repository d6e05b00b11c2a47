//! Bounded-range counting sort of `items` keyed by a parallel `keys` array.
//!
//! Five dispatches: clear the histogram, tally keys, exclusive-scan the
//! histogram into run offsets, scatter through atomically claimed slots, and
//! copy the sorted buffers back into the caller's slices. Slot claims race, so
//! the relative order of equal keys is unspecified.

use std::sync::atomic::Ordering;

use rayon::prelude::*;

use crate::dispatch::{as_atomic, ScatterSlice};
use crate::scan::Scan;

/// Counting sort with reusable histogram and sorted-output buffers.
#[derive(Debug, Default)]
pub struct CountSort {
    scan: Scan,
    histogram: Vec<u32>,
    sorted_items: Vec<u32>,
    sorted_keys: Vec<u32>,
}

impl CountSort {
    /// Create a sorter with no buffers allocated yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sort `items` and `keys` in place by ascending key.
    ///
    /// Every key must be `<= max_key`; a key outside the range panics in the
    /// tally dispatch. `items` and `keys` are expected to have equal length.
    pub fn run(&mut self, items: &mut [u32], keys: &mut [u32], max_key: u32) {
        let n = keys.len();
        debug_assert_eq!(items.len(), n, "items and keys must be paired");
        if n == 0 {
            return;
        }

        // 1. Clear histogram.
        let bins = max_key as usize + 1;
        if self.histogram.len() != bins {
            self.histogram = vec![0; bins];
        } else {
            self.histogram.par_iter_mut().for_each(|count| *count = 0);
        }

        // 2. Tally.
        {
            let histogram = as_atomic(&mut self.histogram);
            keys.par_iter().for_each(|&key| {
                histogram[key as usize].fetch_add(1, Ordering::Relaxed);
            });
        }

        // 3. Histogram -> starting offset of each key's run.
        self.scan.run(&mut self.histogram);

        // 4. Scatter.
        if self.sorted_items.len() != n {
            self.sorted_items = vec![0; n];
            self.sorted_keys = vec![0; n];
        }
        {
            let histogram = as_atomic(&mut self.histogram);
            let out_items = ScatterSlice::new(&mut self.sorted_items);
            let out_keys = ScatterSlice::new(&mut self.sorted_keys);
            let items = &*items;
            let keys = &*keys;
            (0..n).into_par_iter().for_each(|i| {
                let key = keys[i];
                let slot = histogram[key as usize].fetch_add(1, Ordering::Relaxed) as usize;
                // SAFETY: fetch_add hands out every slot in [0, n) exactly once.
                unsafe {
                    out_items.write(slot, items[i]);
                    out_keys.write(slot, key);
                }
            });
        }

        // 5. Copy back into the caller's buffers.
        items.par_iter_mut()
            .zip(self.sorted_items.par_iter())
            .for_each(|(dst, &src)| *dst = src);
        keys.par_iter_mut()
            .zip(self.sorted_keys.par_iter())
            .for_each(|(dst, &src)| *dst = src);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn sorts_small_example() {
        let mut items = vec![10, 11, 12, 13];
        let mut keys = vec![2, 0, 2, 1];
        CountSort::new().run(&mut items, &mut keys, 2);
        assert_eq!(keys, vec![0, 1, 2, 2]);
        assert_eq!(&items[..2], &[11, 13]);
        let mut tail = items[2..].to_vec();
        tail.sort_unstable();
        assert_eq!(tail, vec![10, 12]);
    }

    #[test]
    fn empty_input_is_noop() {
        let mut items: Vec<u32> = Vec::new();
        let mut keys: Vec<u32> = Vec::new();
        CountSort::new().run(&mut items, &mut keys, 0);
        assert!(items.is_empty());
    }

    #[test]
    fn reuse_with_different_ranges() {
        let mut sorter = CountSort::new();
        let mut items = vec![0, 1, 2];
        let mut keys = vec![5, 3, 4];
        sorter.run(&mut items, &mut keys, 5);
        assert_eq!(items, vec![1, 2, 0]);

        let mut items = vec![7, 8];
        let mut keys = vec![1, 0];
        sorter.run(&mut items, &mut keys, 1);
        assert_eq!(items, vec![8, 7]);
        assert_eq!(keys, vec![0, 1]);
    }

    #[test]
    #[should_panic]
    fn key_above_range_panics() {
        let mut items = vec![0, 1];
        let mut keys = vec![0, 3];
        CountSort::new().run(&mut items, &mut keys, 1);
    }

    proptest! {
        #[test]
        fn sorted_keys_and_permuted_items(keys in prop::collection::vec(0u32..64, 0..2000)) {
            let n = keys.len();
            let mut items: Vec<u32> = (0..n as u32).collect();
            let original = keys.clone();
            let mut sorted_keys = keys;
            CountSort::new().run(&mut items, &mut sorted_keys, 63);

            prop_assert!(sorted_keys.windows(2).all(|w| w[0] <= w[1]));
            // Every item still carries its own key.
            for (slot, &item) in items.iter().enumerate() {
                prop_assert_eq!(original[item as usize], sorted_keys[slot]);
            }
            let mut seen = items.clone();
            seen.sort_unstable();
            prop_assert_eq!(seen, (0..n as u32).collect::<Vec<_>>());
        }
    }
}
