//! Initial particle placement
//!
//! Fills cube regions with a jittered regular lattice. All randomness comes
//! from one seeded ChaCha stream, so the same settings always produce the
//! same spawn data.

use fluid_kernel::SpawnData;
use glam::{Vec2, Vec3};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

/// An axis-aligned cube to fill with particles
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpawnRegion {
    /// Cube centre
    pub centre: Vec3,
    /// Edge length
    pub size: f32,
}

impl SpawnRegion {
    /// Cube volume
    pub fn volume(&self) -> f32 {
        self.size * self.size * self.size
    }

    /// Particles along each axis for `density` particles per unit volume:
    /// `floor(cbrt(floor(volume * density)))`.
    pub fn particles_per_axis(&self, density: u32) -> usize {
        let target = (self.volume() * density as f32).floor().max(0.0);
        (target as f64).cbrt().floor() as usize
    }
}

/// Re-rolls every region's centre and size before spawning
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegionRandomization {
    /// Lower corner for random centres
    pub bounds_min: Vec3,
    /// Upper corner for random centres
    pub bounds_max: Vec3,
    /// Size range `[min, max]`
    pub size_min_max: Vec2,
}

/// Spawner configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpawnerSettings {
    /// Target particles per unit volume
    #[serde(default = "default_spawn_density")]
    pub particle_spawn_density: u32,
    /// Velocity given to every particle
    #[serde(default)]
    pub initial_velocity: Vec3,
    /// Radius of the random offset applied to each lattice point
    #[serde(default)]
    pub jitter_strength: f32,
    /// Regions to fill
    pub regions: Vec<SpawnRegion>,
    /// Optional region randomisation
    #[serde(default)]
    pub randomize: Option<RegionRandomization>,
    /// RNG seed
    #[serde(default)]
    pub seed: u64,
}

fn default_spawn_density() -> u32 {
    600
}

/// Produces [`SpawnData`] from [`SpawnerSettings`]
pub struct Spawner {
    settings: SpawnerSettings,
    rng: ChaCha8Rng,
}

impl Spawner {
    /// Create a spawner. Fails when no regions are configured.
    pub fn new(settings: SpawnerSettings) -> Result<Self, String> {
        if settings.regions.is_empty() {
            return Err("Spawner needs at least one spawn region".to_string());
        }
        let rng = ChaCha8Rng::seed_from_u64(settings.seed);
        Ok(Self { settings, rng })
    }

    /// Current regions (after any randomisation)
    pub fn regions(&self) -> &[SpawnRegion] {
        &self.settings.regions
    }

    /// Number of particles the current regions produce
    pub fn particle_count(&self) -> usize {
        self.settings
            .regions
            .iter()
            .map(|r| r.particles_per_axis(self.settings.particle_spawn_density).pow(3))
            .sum()
    }

    /// Generate positions and velocities for every region, in region order.
    pub fn spawn(&mut self) -> Result<SpawnData, String> {
        if let Some(randomize) = self.settings.randomize {
            self.randomize_regions(&randomize);
        }

        let mut positions = Vec::with_capacity(self.particle_count());
        for region in self.settings.regions.clone() {
            let per_axis = region.particles_per_axis(self.settings.particle_spawn_density);
            self.fill_cube(&region, per_axis, &mut positions);
        }
        let velocities = vec![self.settings.initial_velocity; positions.len()];

        tracing::info!(
            particles = positions.len(),
            regions = self.settings.regions.len(),
            "spawn data generated"
        );
        SpawnData::new(positions, velocities).map_err(|e| e.to_string())
    }

    fn randomize_regions(&mut self, randomize: &RegionRandomization) {
        for region in &mut self.settings.regions {
            region.centre = Vec3::new(
                sample(&mut self.rng, randomize.bounds_min.x, randomize.bounds_max.x),
                sample(&mut self.rng, randomize.bounds_min.y, randomize.bounds_max.y),
                sample(&mut self.rng, randomize.bounds_min.z, randomize.bounds_max.z),
            );
            region.size = sample(&mut self.rng, randomize.size_min_max.x, randomize.size_min_max.y);
        }
    }

    fn fill_cube(&mut self, region: &SpawnRegion, per_axis: usize, out: &mut Vec<Vec3>) {
        let jitter = self.settings.jitter_strength;
        for x in 0..per_axis {
            for y in 0..per_axis {
                for z in 0..per_axis {
                    let t = Vec3::new(
                        lattice_t(x, per_axis),
                        lattice_t(y, per_axis),
                        lattice_t(z, per_axis),
                    );
                    let point = (t - Vec3::splat(0.5)) * region.size + region.centre;
                    out.push(point + random_in_unit_sphere(&mut self.rng) * jitter);
                }
            }
        }
    }
}

/// Lattice coordinate in `[0, 1]`; a single point sits at the centre.
fn lattice_t(i: usize, per_axis: usize) -> f32 {
    if per_axis <= 1 {
        0.5
    } else {
        i as f32 / (per_axis - 1) as f32
    }
}

/// Uniform in `[lo, hi)`, or `lo` for an empty range.
fn sample(rng: &mut ChaCha8Rng, lo: f32, hi: f32) -> f32 {
    if hi > lo {
        rng.gen_range(lo..hi)
    } else {
        lo
    }
}

fn random_in_unit_sphere(rng: &mut ChaCha8Rng) -> Vec3 {
    loop {
        let v = Vec3::new(
            rng.gen_range(-1.0..1.0),
            rng.gen_range(-1.0..1.0),
            rng.gen_range(-1.0..1.0),
        );
        if v.length_squared() <= 1.0 {
            return v;
        }
    }
}
