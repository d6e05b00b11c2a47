//! Particle attribute buffers.
//!
//! Attributes are parallel arrays of length N. The reorder pass permutes them
//! into sorted-by-cell order every substep, so "particle i" names a slot, not
//! a persistent particle.

use glam::{Vec2, Vec3};

use crate::error::KernelError;
use crate::foam::{FoamCounters, FoamParticle};

/// Initial conditions supplied by a spawner.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpawnData {
    /// Initial positions.
    pub positions: Vec<Vec3>,
    /// Initial velocities, one per position.
    pub velocities: Vec<Vec3>,
}

impl SpawnData {
    /// Pair positions with velocities; lengths must match.
    pub fn new(positions: Vec<Vec3>, velocities: Vec<Vec3>) -> Result<Self, KernelError> {
        KernelError::check_len("spawn velocities", positions.len(), velocities.len())?;
        Ok(Self { positions, velocities })
    }

    /// Number of particles.
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// `true` when nothing was spawned.
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

/// Canonical attribute buffers plus the scratch targets of the reorder pass.
#[derive(Debug, Clone, Default)]
pub struct ParticleBuffers {
    pub(crate) positions: Vec<Vec3>,
    pub(crate) predicted_positions: Vec<Vec3>,
    pub(crate) velocities: Vec<Vec3>,
    /// `(density, near_density)` per particle.
    pub(crate) densities: Vec<Vec2>,

    pub(crate) sort_target_positions: Vec<Vec3>,
    pub(crate) sort_target_predicted_positions: Vec<Vec3>,
    pub(crate) sort_target_velocities: Vec<Vec3>,

    generation: u64,
}

impl ParticleBuffers {
    /// Allocate zeroed buffers for `n` particles.
    pub fn new(n: usize) -> Self {
        let mut buffers = Self::default();
        buffers.allocate(n);
        buffers
    }

    /// Release and reallocate every buffer for `n` particles.
    pub fn allocate(&mut self, n: usize) {
        self.positions = vec![Vec3::ZERO; n];
        self.predicted_positions = vec![Vec3::ZERO; n];
        self.velocities = vec![Vec3::ZERO; n];
        self.densities = vec![Vec2::ZERO; n];
        self.sort_target_positions = vec![Vec3::ZERO; n];
        self.sort_target_predicted_positions = vec![Vec3::ZERO; n];
        self.sort_target_velocities = vec![Vec3::ZERO; n];
        self.generation += 1;
    }

    /// Copy spawn data into the canonical buffers. Predicted positions start
    /// at the spawn positions and densities at zero.
    pub fn seed(&mut self, spawn: &SpawnData) -> Result<(), KernelError> {
        KernelError::check_len("spawn positions", self.len(), spawn.positions.len())?;
        KernelError::check_len("spawn velocities", self.len(), spawn.velocities.len())?;
        self.positions.copy_from_slice(&spawn.positions);
        self.predicted_positions.copy_from_slice(&spawn.positions);
        self.velocities.copy_from_slice(&spawn.velocities);
        self.densities.fill(Vec2::ZERO);
        Ok(())
    }

    /// Number of particles.
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// `true` for zero particles.
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Allocation generation, starting at 1.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Positions.
    pub fn positions(&self) -> &[Vec3] {
        &self.positions
    }

    /// Positions extrapolated by the external-forces pass.
    pub fn predicted_positions(&self) -> &[Vec3] {
        &self.predicted_positions
    }

    /// Velocities.
    pub fn velocities(&self) -> &[Vec3] {
        &self.velocities
    }

    /// `(density, near_density)` pairs.
    pub fn densities(&self) -> &[Vec2] {
        &self.densities
    }
}

/// Synchronous copy of every output buffer, for diagnostics and tests.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FluidSnapshot {
    /// Positions.
    pub positions: Vec<Vec3>,
    /// Predicted positions.
    pub predicted_positions: Vec<Vec3>,
    /// Velocities.
    pub velocities: Vec<Vec3>,
    /// `(density, near_density)` pairs.
    pub densities: Vec<Vec2>,
    /// Live foam particles (`min(active, capacity)` entries).
    pub foam: Vec<FoamParticle>,
    /// Raw foam counters.
    pub foam_counters: FoamCounters,
    /// Generation of the particle buffers the snapshot was read from.
    pub generation: u64,
}

impl FluidSnapshot {
    /// Number of fluid particles.
    pub fn len(&self) -> usize {
        self.positions.len()
    }

    /// `true` for zero fluid particles.
    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spawn_lengths_must_match() {
        let err = SpawnData::new(vec![Vec3::ZERO; 3], vec![Vec3::ZERO; 2]).unwrap_err();
        assert!(matches!(err, KernelError::SizeMismatch { expected: 3, actual: 2, .. }));
    }

    #[test]
    fn seed_copies_spawn_data() {
        let spawn = SpawnData::new(
            vec![Vec3::new(1.0, 2.0, 3.0), Vec3::ONE],
            vec![Vec3::X, Vec3::Y],
        )
        .unwrap();
        let mut buffers = ParticleBuffers::new(2);
        buffers.densities[0] = Vec2::splat(5.0);
        buffers.seed(&spawn).unwrap();
        assert_eq!(buffers.positions(), spawn.positions.as_slice());
        assert_eq!(buffers.predicted_positions(), spawn.positions.as_slice());
        assert_eq!(buffers.velocities(), spawn.velocities.as_slice());
        assert_eq!(buffers.densities()[0], Vec2::ZERO);
    }

    #[test]
    fn seed_rejects_wrong_count() {
        let mut buffers = ParticleBuffers::new(3);
        let spawn = SpawnData::new(vec![Vec3::ZERO], vec![Vec3::ZERO]).unwrap();
        assert!(buffers.seed(&spawn).is_err());
    }

    #[test]
    fn reallocation_bumps_generation() {
        let mut buffers = ParticleBuffers::new(4);
        assert_eq!(buffers.generation(), 1);
        buffers.allocate(8);
        assert_eq!(buffers.len(), 8);
        assert_eq!(buffers.sort_target_velocities.len(), 8);
        assert_eq!(buffers.generation(), 2);
    }
}
