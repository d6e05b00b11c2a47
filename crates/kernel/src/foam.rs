//! Secondary particles: foam, spray and bubbles.
//!
//! Foam particles form an unordered, capacity-bounded set that is never
//! reordered with the fluid. Spawning happens inside the pressure pass, where
//! each fluid particle claims slots by atomically incrementing the `active`
//! counter; claims past capacity are dropped. Once per frame the live set is
//! advected and survivors are compacted through the `survivor` counter, using
//! the same claim-then-scatter pattern as the counting sort.

use std::f32::consts::TAU;
use std::sync::atomic::{AtomicU32, Ordering};

use glam::Vec3;
use rayon::prelude::*;

use crate::dispatch::{as_atomic, ScatterSlice};
use crate::neighbor::NeighbourSearch;
use crate::settings::{FluidSettings, FoamSettings};
use crate::sph::{remap01, SmoothingConstants};

/// Lifetime range, in seconds, of a freshly spawned particle.
const SPAWN_LIFETIME: (f32, f32) = (5.0, 15.0);
/// How strongly bubbles are dragged towards the local fluid velocity.
const BUBBLE_FLUID_DRAG: f32 = 3.0;
/// Rate at which spray and foam ease back to unit scale.
const SCALE_RECOVERY_SPEED: f32 = 3.0;

/// One secondary particle, laid out for direct GPU upload (32 bytes).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct FoamParticle {
    /// Position.
    pub position: Vec3,
    /// Remaining lifetime in seconds.
    pub lifetime: f32,
    /// Velocity.
    pub velocity: Vec3,
    /// Render scale.
    pub scale: f32,
}

/// Raw values of the two foam counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FoamCounters {
    /// Slots claimed this frame (may exceed capacity).
    pub active: u32,
    /// Survivors compacted by the last update.
    pub survivor: u32,
}

/// Classification by fluid neighbour count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FoamKind {
    /// Few neighbours: ballistic.
    Spray,
    /// Moderate neighbours: advected with the fluid.
    Foam,
    /// Many neighbours: buoyant.
    Bubble,
}

impl FoamKind {
    /// Classify a particle with `neighbours` fluid particles in range.
    pub fn classify(neighbours: u32, settings: &FoamSettings) -> Self {
        if neighbours <= settings.spray_max_neighbours {
            FoamKind::Spray
        } else if neighbours >= settings.bubble_min_neighbours {
            FoamKind::Bubble
        } else {
            FoamKind::Foam
        }
    }
}

/// Foam storage: live buffer, compaction target and the counter pair.
#[derive(Debug, Clone, Default)]
pub struct FoamBuffers {
    pub(crate) particles: Vec<FoamParticle>,
    pub(crate) compacted: Vec<FoamParticle>,
    /// `[active, survivor]`.
    pub(crate) counters: [u32; 2],
}

impl FoamBuffers {
    /// Allocate zeroed buffers for `capacity` particles.
    pub fn new(capacity: usize) -> Self {
        Self {
            particles: vec![FoamParticle::default(); capacity],
            compacted: vec![FoamParticle::default(); capacity],
            counters: [0; 2],
        }
    }

    /// Maximum number of live particles.
    pub fn capacity(&self) -> usize {
        self.particles.len()
    }

    /// Current counter values.
    pub fn counters(&self) -> FoamCounters {
        FoamCounters {
            active: self.counters[0],
            survivor: self.counters[1],
        }
    }

    /// Number of live particles: `min(active, capacity)`.
    pub fn live_count(&self) -> usize {
        (self.counters[0] as usize).min(self.capacity())
    }

    /// The live particles.
    pub fn live(&self) -> &[FoamParticle] {
        &self.particles[..self.live_count()]
    }

    /// Zero every particle and both counters.
    pub fn clear(&mut self) {
        self.particles.fill(FoamParticle::default());
        self.compacted.fill(FoamParticle::default());
        self.counters = [0; 2];
    }

    /// Slot-claiming writer used by the pressure pass.
    pub(crate) fn spawner(&mut self) -> FoamSpawner<'_> {
        let capacity = self.particles.len() as u32;
        let [active, _] = &mut self.counters;
        FoamSpawner {
            active: as_atomic(std::slice::from_mut(active)),
            out: ScatterSlice::new(&mut self.particles),
            capacity,
        }
    }

    /// Advect, classify and age the live particles by `dt`, compacting
    /// survivors into the compaction buffer.
    pub(crate) fn update(
        &mut self,
        search: &NeighbourSearch<'_>,
        fluid_velocities: &[Vec3],
        settings: &FluidSettings,
        kernels: &SmoothingConstants,
        dt: f32,
    ) {
        let live = self.live_count();
        let [_, survivor] = &mut self.counters;
        let survivor = &as_atomic(std::slice::from_mut(survivor))[0];
        let out = ScatterSlice::new(&mut self.compacted);

        self.particles[..live].par_iter().for_each(|particle| {
            let mut p = *particle;
            advance(&mut p, search, fluid_velocities, settings, kernels, dt);
            if p.lifetime > 0.0 {
                let slot = survivor.fetch_add(1, Ordering::Relaxed) as usize;
                // SAFETY: at most `live` survivors, each claims a distinct slot.
                unsafe { out.write(slot, p) };
            }
        });
    }

    /// Move survivors into the live buffer and roll the counters over:
    /// `active = min(survivor, capacity)`, `survivor = 0`.
    pub(crate) fn prepare_next_frame(&mut self) {
        let survivors = (self.counters[1] as usize).min(self.capacity());
        self.particles[..survivors].copy_from_slice(&self.compacted[..survivors]);
        self.counters = [survivors as u32, 0];
    }
}

fn advance(
    p: &mut FoamParticle,
    search: &NeighbourSearch<'_>,
    fluid_velocities: &[Vec3],
    settings: &FluidSettings,
    kernels: &SmoothingConstants,
    dt: f32,
) {
    let foam = &settings.foam;
    let mut neighbours = 0u32;
    let mut velocity_sum = Vec3::ZERO;
    let mut weight_sum = 0.0f32;
    search.for_each_neighbour(p.position, |j, _, dist_sq| {
        let weight = kernels.viscosity_kernel(dist_sq.sqrt());
        velocity_sum += fluid_velocities[j] * weight;
        weight_sum += weight;
        neighbours += 1;
    });
    let fluid_velocity = if weight_sum > 0.0 {
        velocity_sum / weight_sum
    } else {
        Vec3::ZERO
    };

    let gravity = Vec3::new(0.0, settings.gravity, 0.0);
    let kind = FoamKind::classify(neighbours, foam);
    match kind {
        FoamKind::Spray => {
            p.velocity += gravity * dt;
            p.scale = ease(p.scale, 1.0, dt * SCALE_RECOVERY_SPEED);
        }
        FoamKind::Bubble => {
            let buoyancy = gravity * (1.0 - foam.bubble_buoyancy);
            let drag = (fluid_velocity - p.velocity) * BUBBLE_FLUID_DRAG;
            p.velocity += (buoyancy + drag) * dt;
            p.scale = ease(p.scale, foam.bubble_scale, dt * foam.bubble_scale_change_speed);
        }
        FoamKind::Foam => {
            p.velocity = fluid_velocity;
            p.scale = ease(p.scale, 1.0, dt * SCALE_RECOVERY_SPEED);
        }
    }

    p.position += p.velocity * dt;
    let decay = if kind == FoamKind::Foam { 1.0 } else { 1.0 / 3.0 };
    p.lifetime -= dt * decay;
    settings
        .bounds
        .resolve_collision(&mut p.position, &mut p.velocity, settings.collision_damping);
}

fn ease(from: f32, to: f32, t: f32) -> f32 {
    from + (to - from) * t.clamp(0.0, 1.0)
}

/// Writer handed to the pressure pass for spawning.
pub(crate) struct FoamSpawner<'a> {
    active: &'a [AtomicU32],
    out: ScatterSlice<'a, FoamParticle>,
    capacity: u32,
}

impl FoamSpawner<'_> {
    /// Claim a slot and store `particle`, or drop it when the buffer is full.
    pub(crate) fn push(&self, particle: FoamParticle) -> bool {
        let slot = self.active[0].fetch_add(1, Ordering::Relaxed);
        if slot >= self.capacity {
            return false;
        }
        // SAFETY: fetch_add returns each slot index at most once per frame.
        unsafe { self.out.write(slot as usize, particle) };
        true
    }
}

/// Expected number of particles a fluid particle spawns this substep.
///
/// `weighted_velocity_difference` measures how much neighbours move towards
/// each other (trapped air); `speed_sq` is the particle's kinetic energy term.
pub fn spawn_factor(
    foam: &FoamSettings,
    sim_time: f32,
    weighted_velocity_difference: f32,
    speed_sq: f32,
    dt: f32,
) -> f32 {
    let trapped_air = foam.trapped_air_rate(sim_time)
        * remap01(
            weighted_velocity_difference,
            foam.trapped_air_velocity.x,
            foam.trapped_air_velocity.y,
        );
    let kinetic = remap01(speed_sq, foam.kinetic_energy.x, foam.kinetic_energy.y);
    trapped_air * kinetic * dt
}

/// `floor(factor)` plus one more with probability `fract(factor)`.
pub fn spawn_count(factor: f32, random: f32) -> u32 {
    let whole = factor.floor();
    whole as u32 + u32::from(random < factor - whole)
}

/// Build a spawned particle around a fluid particle.
///
/// The offset lies in the plane perpendicular to the fluid velocity, within
/// half a smoothing radius.
pub(crate) fn spawn_particle(position: Vec3, velocity: Vec3, radius: f32, rng: &mut u32) -> FoamParticle {
    let axis = velocity.try_normalize().unwrap_or(Vec3::Y);
    let (a, b) = axis.any_orthonormal_pair();
    let angle = random_unorm(rng) * TAU;
    let distance = random_unorm(rng) * radius * 0.5;
    let offset = (a * angle.cos() + b * angle.sin()) * distance;
    let t = random_unorm(rng);
    FoamParticle {
        position: position + offset,
        lifetime: SPAWN_LIFETIME.0 + (SPAWN_LIFETIME.1 - SPAWN_LIFETIME.0) * t,
        velocity,
        scale: 1.0,
    }
}

/// PCG integer hash; advances `state` and returns the next value.
pub fn next_random(state: &mut u32) -> u32 {
    *state = state.wrapping_mul(747_796_405).wrapping_add(2_891_336_453);
    let word = ((*state >> ((*state >> 28) + 4)) ^ *state).wrapping_mul(277_803_737);
    (word >> 22) ^ word
}

/// Uniform value in `[0, 1]`.
pub fn random_unorm(state: &mut u32) -> f32 {
    next_random(state) as f32 / u32::MAX as f32
}

/// Per-particle RNG seed from its index and the simulation time.
pub fn rng_seed(index: u32, sim_time: f32) -> u32 {
    index.wrapping_mul(19_349_669) ^ sim_time.to_bits().wrapping_mul(83_492_837)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spatial_index::SpatialIndex;

    #[test]
    fn particle_is_32_bytes() {
        assert_eq!(std::mem::size_of::<FoamParticle>(), 32);
    }

    #[test]
    fn classification_thresholds() {
        let foam = FoamSettings::default();
        assert_eq!(FoamKind::classify(0, &foam), FoamKind::Spray);
        assert_eq!(FoamKind::classify(5, &foam), FoamKind::Spray);
        assert_eq!(FoamKind::classify(6, &foam), FoamKind::Foam);
        assert_eq!(FoamKind::classify(15, &foam), FoamKind::Bubble);
    }

    #[test]
    fn spawn_count_rounds_stochastically() {
        assert_eq!(spawn_count(2.25, 0.1), 3);
        assert_eq!(spawn_count(2.25, 0.5), 2);
        assert_eq!(spawn_count(0.0, 0.0), 0);
    }

    #[test]
    fn spawn_factor_needs_both_terms() {
        let foam = FoamSettings { spawn_rate_fade_in_time: 0.0, ..Default::default() };
        assert_eq!(spawn_factor(&foam, 1.0, 0.0, 100.0, 0.01), 0.0);
        assert_eq!(spawn_factor(&foam, 1.0, 30.0, 0.0, 0.01), 0.0);
        let full = spawn_factor(&foam, 1.0, 30.0, 100.0, 0.01);
        assert!((full - 0.7).abs() < 1.0e-5, "full={full}");
    }

    #[test]
    fn random_values_are_unit_range_and_vary() {
        let mut state = rng_seed(7, 0.25);
        let values: Vec<f32> = (0..64).map(|_| random_unorm(&mut state)).collect();
        assert!(values.iter().all(|v| (0.0..=1.0).contains(v)));
        assert!(values.windows(2).any(|w| w[0] != w[1]));
    }

    #[test]
    fn spawner_drops_claims_past_capacity() {
        let mut foam = FoamBuffers::new(2);
        {
            let spawner = foam.spawner();
            let p = FoamParticle { lifetime: 1.0, ..Default::default() };
            assert!(spawner.push(p));
            assert!(spawner.push(p));
            assert!(!spawner.push(p));
        }
        assert_eq!(foam.counters().active, 3);
        assert_eq!(foam.live_count(), 2);
    }

    #[test]
    fn update_compacts_survivors() {
        let settings = FluidSettings::default();
        let kernels = SmoothingConstants::new(settings.smoothing_radius);
        let index = SpatialIndex::new(0);
        let search = NeighbourSearch::new(&[], index.keys(), index.offsets(), settings.smoothing_radius);

        let mut foam = FoamBuffers::new(4);
        foam.particles[0] = FoamParticle { lifetime: 0.001, scale: 1.0, ..Default::default() };
        foam.particles[1] = FoamParticle { lifetime: 5.0, scale: 1.0, ..Default::default() };
        foam.particles[2] = FoamParticle { lifetime: 5.0, scale: 1.0, ..Default::default() };
        foam.counters = [3, 0];

        foam.update(&search, &[], &settings, &kernels, 0.1);
        assert_eq!(foam.counters().survivor, 2);
        foam.prepare_next_frame();
        assert_eq!(foam.counters(), FoamCounters { active: 2, survivor: 0 });
        // Spray falls under gravity.
        assert!(foam.live().iter().all(|p| p.velocity.y < 0.0));
        assert!(foam.live().iter().all(|p| p.lifetime < 5.0));
    }
}
