//! Dispatch bookkeeping shared by the CPU and GPU backends.
//!
//! Every compute pass the scheduler issues is named by a [`KernelId`] and
//! counted in [`DispatchStats`]. The CPU backend additionally uses
//! [`ScatterSlice`] to emulate the "claim a slot with an atomic, then write
//! it" pattern of GPU scatter kernels.

use std::marker::PhantomData;
use std::sync::atomic::AtomicU32;

/// Threads per thread group for every 1D dispatch.
pub const THREADS_PER_GROUP: u32 = 256;

/// Named dispatches of the simulation pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KernelId {
    /// Gravity + predicted positions.
    ExternalForces,
    /// Cell hash -> spatial key, identity sorted indices.
    SpatialHash,
    /// Count sort + offset table (several internal dispatches).
    SpatialIndex,
    /// Gather attributes into sorted scratch buffers.
    Reorder,
    /// Copy sorted scratch buffers back into the canonical buffers.
    ReorderCopyBack,
    /// Density and near-density.
    Density,
    /// Pressure force (+ foam spawning).
    PressureForce,
    /// Viscosity; elided when the strength is zero.
    Viscosity,
    /// Integration and boundary collisions.
    UpdatePositions,
    /// Foam advection, classification and survivor compaction.
    FoamUpdate,
    /// Foam compacted buffer -> live buffer, counter rollover.
    FoamCopyBack,
}

impl KernelId {
    /// Every kernel, in declaration order.
    pub const ALL: [KernelId; 11] = [
        KernelId::ExternalForces,
        KernelId::SpatialHash,
        KernelId::SpatialIndex,
        KernelId::Reorder,
        KernelId::ReorderCopyBack,
        KernelId::Density,
        KernelId::PressureForce,
        KernelId::Viscosity,
        KernelId::UpdatePositions,
        KernelId::FoamUpdate,
        KernelId::FoamCopyBack,
    ];

    /// Program order of one substep (viscosity included).
    pub const SUBSTEP_ORDER: [KernelId; 9] = [
        KernelId::ExternalForces,
        KernelId::SpatialHash,
        KernelId::SpatialIndex,
        KernelId::Reorder,
        KernelId::ReorderCopyBack,
        KernelId::Density,
        KernelId::PressureForce,
        KernelId::Viscosity,
        KernelId::UpdatePositions,
    ];

    /// Human-readable kernel name (matches the WGSL entry point).
    pub fn name(self) -> &'static str {
        match self {
            KernelId::ExternalForces => "external_forces",
            KernelId::SpatialHash => "update_spatial_hash",
            KernelId::SpatialIndex => "spatial_index",
            KernelId::Reorder => "reorder",
            KernelId::ReorderCopyBack => "reorder_copy_back",
            KernelId::Density => "calculate_densities",
            KernelId::PressureForce => "calculate_pressure_force",
            KernelId::Viscosity => "calculate_viscosity",
            KernelId::UpdatePositions => "update_positions",
            KernelId::FoamUpdate => "update_foam",
            KernelId::FoamCopyBack => "foam_prepare_next_frame",
        }
    }

    fn slot(self) -> usize {
        self as usize
    }

    fn is_substep_kernel(self) -> bool {
        !matches!(self, KernelId::FoamUpdate | KernelId::FoamCopyBack)
    }
}

/// Dispatch counters, per kernel, plus the sequence of the latest substep.
#[derive(Debug, Clone, Default)]
pub struct DispatchStats {
    counts: [u64; KernelId::ALL.len()],
    last_substep: Vec<KernelId>,
}

impl DispatchStats {
    /// Create empty counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Start recording a new substep sequence.
    pub fn begin_substep(&mut self) {
        self.last_substep.clear();
    }

    /// Record one issued dispatch.
    pub fn record(&mut self, kernel: KernelId) {
        self.counts[kernel.slot()] += 1;
        if kernel.is_substep_kernel() {
            self.last_substep.push(kernel);
        }
    }

    /// Number of times `kernel` has been dispatched.
    pub fn count(&self, kernel: KernelId) -> u64 {
        self.counts[kernel.slot()]
    }

    /// Total dispatches across all kernels.
    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// Kernels issued during the most recent substep, in issue order.
    pub fn last_substep(&self) -> &[KernelId] {
        &self.last_substep
    }

    /// Zero all counters.
    pub fn clear(&mut self) {
        self.counts = [0; KernelId::ALL.len()];
        self.last_substep.clear();
    }
}

/// Number of thread groups needed to cover `n` threads: ceil(n / group_size).
pub fn thread_groups(n: usize, group_size: usize) -> usize {
    n.div_ceil(group_size)
}

/// View a counter buffer as atomics for the duration of a dispatch.
pub(crate) fn as_atomic(slice: &mut [u32]) -> &[AtomicU32] {
    const _: () = assert!(std::mem::align_of::<AtomicU32>() == std::mem::align_of::<u32>());
    // SAFETY: AtomicU32 has the size of u32 and, checked above, its alignment.
    // The exclusive borrow rules out non-atomic access while the view lives.
    unsafe { &*(slice as *mut [u32] as *const [AtomicU32]) }
}

/// Shared write access to a slice for scatter dispatches.
///
/// Mirrors a GPU storage buffer written through slots claimed by atomic
/// counters: many threads write concurrently, but never to the same index.
pub(crate) struct ScatterSlice<'a, T> {
    ptr: *mut T,
    len: usize,
    _marker: PhantomData<&'a mut [T]>,
}

// SAFETY: writers only touch disjoint indices (see `write`), and the
// exclusive borrow held by the ScatterSlice rules out any other access.
unsafe impl<T: Copy + Send> Send for ScatterSlice<'_, T> {}
unsafe impl<T: Copy + Send> Sync for ScatterSlice<'_, T> {}

impl<'a, T: Copy> ScatterSlice<'a, T> {
    pub(crate) fn new(slice: &'a mut [T]) -> Self {
        Self {
            ptr: slice.as_mut_ptr(),
            len: slice.len(),
            _marker: PhantomData,
        }
    }

    /// Write `value` at `index`. Panics when `index` is out of bounds.
    ///
    /// # Safety
    /// No other thread may write the same `index` during the lifetime of
    /// this `ScatterSlice`.
    pub(crate) unsafe fn write(&self, index: usize, value: T) {
        assert!(
            index < self.len,
            "scatter index {index} out of bounds (len {})",
            self.len
        );
        self.ptr.add(index).write(value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn group_count_rounds_up() {
        assert_eq!(thread_groups(0, 256), 0);
        assert_eq!(thread_groups(1, 256), 1);
        assert_eq!(thread_groups(256, 256), 1);
        assert_eq!(thread_groups(257, 256), 2);
    }

    #[test]
    fn stats_track_counts_and_sequence() {
        let mut stats = DispatchStats::new();
        stats.begin_substep();
        stats.record(KernelId::ExternalForces);
        stats.record(KernelId::SpatialHash);
        stats.record(KernelId::FoamUpdate);
        assert_eq!(stats.count(KernelId::ExternalForces), 1);
        assert_eq!(stats.count(KernelId::FoamUpdate), 1);
        assert_eq!(stats.total(), 3);
        assert_eq!(
            stats.last_substep(),
            &[KernelId::ExternalForces, KernelId::SpatialHash]
        );

        stats.begin_substep();
        assert!(stats.last_substep().is_empty());
        assert_eq!(stats.total(), 3);
    }

    #[test]
    #[should_panic(expected = "out of bounds")]
    fn scatter_rejects_out_of_range() {
        let mut data = vec![0u32; 4];
        let out = ScatterSlice::new(&mut data);
        unsafe { out.write(4, 1) };
    }
}
