//! Particle-based (SPH) fluid kernel
//!
//! This crate provides the compute core of a real-time SPH fluid simulation
//! built around a parallel spatial index: a block-wise prefix sum, a
//! bounded-range counting sort and a per-key offset table.
//!
//! # Modules
//! - [`scan`] -- Block-wise exclusive prefix sum with cached group sums.
//! - [`count_sort`] -- Counting sort built on the scan.
//! - [`offset_table`] -- First-index lookup over sorted keys.
//! - [`spatial_index`] -- Keys, sorted indices and offsets over N particles.
//! - [`neighbor`] -- Cell hashing and 27-cell neighbour iteration.
//! - [`sph`] -- Smoothing kernels and pressure terms.
//! - [`foam`] -- Secondary (foam, spray, bubble) particles.
//! - [`scheduler`] -- Running/paused state machine driving a [`FluidKernel`].
//! - [`dispatch`] -- Dispatch naming and instrumentation.

#![warn(missing_docs)]

pub mod count_sort;
pub mod dispatch;
pub mod error;
pub mod foam;
mod fluid;
pub mod neighbor;
pub mod offset_table;
pub mod particle;
pub mod scan;
pub mod scheduler;
pub mod settings;
pub mod spatial_index;
pub mod sph;

#[cfg(feature = "gpu")]
#[allow(missing_docs)]
pub mod gpu;

pub use count_sort::CountSort;
pub use dispatch::{DispatchStats, KernelId};
pub use error::KernelError;
pub use foam::{FoamBuffers, FoamCounters, FoamParticle};
pub use fluid::PREDICTION_FACTOR;
pub use offset_table::build_offset_table;
pub use particle::{FluidSnapshot, ParticleBuffers, SpawnData};
pub use scan::Scan;
pub use scheduler::{RunState, Scheduler};
pub use settings::{Bounds, FluidSettings, FoamSettings};
pub use spatial_index::SpatialIndex;
pub use sph::SmoothingConstants;

#[cfg(feature = "gpu")]
pub use gpu::GpuKernel;

use neighbor::NeighbourSearch;

// ---------------------------------------------------------------------------
// FluidKernel trait
// ---------------------------------------------------------------------------

/// Timing of one substep.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FrameParams {
    /// Substep duration.
    pub dt: f32,
    /// Duration of the enclosing frame; foam advances by this once per frame.
    pub frame_dt: f32,
    /// Simulation time, already advanced by `dt`.
    pub sim_time: f32,
}

/// Trait that all compute back-ends (CPU, GPU) implement.
///
/// A `FluidKernel` owns every particle, spatial-index and foam buffer and
/// issues the substep pipeline in fixed program order:
///
/// 1. External forces
/// 2. Spatial hash
/// 3. Spatial index (sort + offsets)
/// 4. Reorder, then reorder copy-back
/// 5. Density
/// 6. Pressure force (+ foam spawning)
/// 7. Viscosity (skipped at zero strength)
/// 8. Position update
pub trait FluidKernel {
    /// Number of fluid particles.
    fn particle_count(&self) -> usize;

    /// Active settings.
    fn settings(&self) -> &FluidSettings;

    /// Replace the settings. Rejects non-finite values; a new foam capacity
    /// reallocates the foam buffers.
    fn set_settings(&mut self, settings: FluidSettings) -> Result<(), KernelError>;

    /// Run one substep.
    fn step(&mut self, frame: &FrameParams) -> Result<(), KernelError>;

    /// Once-per-frame foam advection, compaction and counter rollover.
    fn update_foam(&mut self, frame: &FrameParams) -> Result<(), KernelError>;

    /// Re-seed from spawn data, reallocating everything if N changed. Foam is
    /// cleared.
    fn reset(&mut self, spawn: &SpawnData) -> Result<(), KernelError>;

    /// Synchronous copy of all output buffers. Stalls a GPU pipeline; meant
    /// for diagnostics only.
    fn read_back(&self) -> Result<FluidSnapshot, KernelError>;

    /// Dispatch counters.
    fn dispatch_stats(&self) -> &DispatchStats;
}

impl<K: FluidKernel + ?Sized> FluidKernel for Box<K> {
    fn particle_count(&self) -> usize {
        (**self).particle_count()
    }

    fn settings(&self) -> &FluidSettings {
        (**self).settings()
    }

    fn set_settings(&mut self, settings: FluidSettings) -> Result<(), KernelError> {
        (**self).set_settings(settings)
    }

    fn step(&mut self, frame: &FrameParams) -> Result<(), KernelError> {
        (**self).step(frame)
    }

    fn update_foam(&mut self, frame: &FrameParams) -> Result<(), KernelError> {
        (**self).update_foam(frame)
    }

    fn reset(&mut self, spawn: &SpawnData) -> Result<(), KernelError> {
        (**self).reset(spawn)
    }

    fn read_back(&self) -> Result<FluidSnapshot, KernelError> {
        (**self).read_back()
    }

    fn dispatch_stats(&self) -> &DispatchStats {
        (**self).dispatch_stats()
    }
}

// ---------------------------------------------------------------------------
// CpuKernel -- rayon implementation of FluidKernel
// ---------------------------------------------------------------------------

/// CPU implementation of the fluid kernel.
///
/// Each dispatch is a rayon parallel iterator that completes before the next
/// one starts, which gives the same producer/consumer ordering as a GPU queue.
pub struct CpuKernel {
    settings: FluidSettings,
    kernels: SmoothingConstants,
    buffers: ParticleBuffers,
    index: SpatialIndex,
    foam: FoamBuffers,
    stats: DispatchStats,
}

impl CpuKernel {
    /// Create a kernel seeded from `spawn`.
    pub fn new(spawn: &SpawnData, settings: FluidSettings) -> Result<Self, KernelError> {
        settings.check_finite()?;
        let n = spawn.len();
        let mut buffers = ParticleBuffers::new(n);
        buffers.seed(spawn)?;
        tracing::info!(
            particles = n,
            foam_capacity = settings.foam.max_particles,
            "CPU fluid kernel initialized"
        );
        Ok(Self {
            kernels: SmoothingConstants::new(settings.smoothing_radius),
            foam: FoamBuffers::new(settings.foam.max_particles as usize),
            index: SpatialIndex::new(n),
            buffers,
            settings,
            stats: DispatchStats::new(),
        })
    }

    /// Particle buffers (sorted by cell after any substep).
    pub fn buffers(&self) -> &ParticleBuffers {
        &self.buffers
    }

    /// Spatial index built by the last substep.
    pub fn spatial_index(&self) -> &SpatialIndex {
        &self.index
    }

    /// Foam buffers.
    pub fn foam(&self) -> &FoamBuffers {
        &self.foam
    }
}

impl FluidKernel for CpuKernel {
    fn particle_count(&self) -> usize {
        self.buffers.len()
    }

    fn settings(&self) -> &FluidSettings {
        &self.settings
    }

    fn set_settings(&mut self, settings: FluidSettings) -> Result<(), KernelError> {
        settings.check_finite()?;
        if settings.smoothing_radius != self.settings.smoothing_radius {
            self.kernels = SmoothingConstants::new(settings.smoothing_radius);
        }
        if settings.foam.max_particles != self.settings.foam.max_particles {
            self.foam = FoamBuffers::new(settings.foam.max_particles as usize);
        }
        self.settings = settings;
        Ok(())
    }

    fn step(&mut self, frame: &FrameParams) -> Result<(), KernelError> {
        let settings = self.settings;
        let dt = frame.dt;
        self.stats.begin_substep();

        fluid::external_forces(&mut self.buffers, settings.gravity, dt);
        self.stats.record(KernelId::ExternalForces);

        fluid::update_spatial_hash(&self.buffers, &mut self.index, settings.smoothing_radius);
        self.stats.record(KernelId::SpatialHash);

        self.index.run()?;
        self.stats.record(KernelId::SpatialIndex);

        fluid::reorder(&mut self.buffers, self.index.sorted_indices());
        self.stats.record(KernelId::Reorder);
        fluid::reorder_copy_back(&mut self.buffers);
        self.stats.record(KernelId::ReorderCopyBack);

        fluid::calculate_densities(&mut self.buffers, &self.index, &self.kernels);
        self.stats.record(KernelId::Density);

        let foam = settings.foam.active.then_some(&mut self.foam);
        fluid::calculate_pressure_force(
            &mut self.buffers,
            &self.index,
            &self.kernels,
            &settings,
            dt,
            frame.sim_time,
            foam,
        );
        self.stats.record(KernelId::PressureForce);

        if settings.runs_viscosity_pass() {
            fluid::calculate_viscosity(
                &mut self.buffers,
                &self.index,
                &self.kernels,
                settings.viscosity_strength,
                dt,
            );
            self.stats.record(KernelId::Viscosity);
        }

        fluid::update_positions(&mut self.buffers, &settings.bounds, settings.collision_damping, dt);
        self.stats.record(KernelId::UpdatePositions);
        Ok(())
    }

    fn update_foam(&mut self, frame: &FrameParams) -> Result<(), KernelError> {
        let search = NeighbourSearch::new(
            self.buffers.predicted_positions(),
            self.index.keys(),
            self.index.offsets(),
            self.kernels.radius,
        );
        self.foam.update(
            &search,
            self.buffers.velocities(),
            &self.settings,
            &self.kernels,
            frame.frame_dt,
        );
        self.stats.record(KernelId::FoamUpdate);

        self.foam.prepare_next_frame();
        self.stats.record(KernelId::FoamCopyBack);
        tracing::debug!(
            live = self.foam.live_count(),
            "foam updated"
        );
        Ok(())
    }

    fn reset(&mut self, spawn: &SpawnData) -> Result<(), KernelError> {
        let n = spawn.len();
        if n != self.buffers.len() {
            self.buffers.allocate(n);
            self.index.resize(n);
            tracing::info!(
                particles = n,
                generation = self.buffers.generation(),
                "particle buffers reallocated"
            );
        }
        self.buffers.seed(spawn)?;
        self.foam.clear();
        Ok(())
    }

    fn read_back(&self) -> Result<FluidSnapshot, KernelError> {
        Ok(FluidSnapshot {
            positions: self.buffers.positions().to_vec(),
            predicted_positions: self.buffers.predicted_positions().to_vec(),
            velocities: self.buffers.velocities().to_vec(),
            densities: self.buffers.densities().to_vec(),
            foam: self.foam.live().to_vec(),
            foam_counters: self.foam.counters(),
            generation: self.buffers.generation(),
        })
    }

    fn dispatch_stats(&self) -> &DispatchStats {
        &self.stats
    }
}
