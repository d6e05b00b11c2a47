//! Per-key "first sorted index" lookup built from a sorted key array.

use std::sync::atomic::Ordering;

use rayon::prelude::*;

use crate::dispatch::as_atomic;
use crate::error::KernelError;

/// Fill `offsets[k]` with the first index of `sorted_keys` holding `k`, or the
/// sentinel `sorted_keys.len()` when `k` is absent.
///
/// Key domain is `[0, N-1]` with `N = sorted_keys.len()`. The two slices must
/// have equal length; on mismatch nothing is written.
pub fn build_offset_table(sorted_keys: &[u32], offsets: &mut [u32]) -> Result<(), KernelError> {
    KernelError::check_len("spatial offsets", sorted_keys.len(), offsets.len())?;
    let sentinel = sorted_keys.len() as u32;

    offsets.par_iter_mut().for_each(|offset| *offset = sentinel);

    let offsets = as_atomic(offsets);
    sorted_keys.par_iter().enumerate().for_each(|(idx, &key)| {
        if idx == 0 || key != sorted_keys[idx - 1] {
            // One boundary per key in sorted input, so stores never collide.
            offsets[key as usize].store(idx as u32, Ordering::Relaxed);
        }
    });
    Ok(())
}

/// Sentinel value used for absent keys in a table of length `n`.
pub fn sentinel(n: usize) -> u32 {
    n as u32
}
