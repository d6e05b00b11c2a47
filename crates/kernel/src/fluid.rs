//! CPU renditions of the per-substep compute dispatches.
//!
//! Each function is one dispatch over N particles. Functions that read
//! neighbour state while producing new velocities write into a scratch buffer
//! and swap it in, so every particle sees the same input snapshot.

use glam::{Vec2, Vec3};
use rayon::prelude::*;

use crate::foam::{self, FoamBuffers};
use crate::neighbor::{hash_cell, key_from_hash, position_to_cell, NeighbourSearch};
use crate::particle::ParticleBuffers;
use crate::settings::{Bounds, FluidSettings};
use crate::spatial_index::SpatialIndex;
use crate::sph::{near_pressure_from_density, pressure_from_density, SmoothingConstants};

/// Look-ahead used for predicted positions.
pub const PREDICTION_FACTOR: f32 = 1.0 / 120.0;

/// Gravity, then extrapolate predicted positions.
pub(crate) fn external_forces(buffers: &mut ParticleBuffers, gravity: f32, dt: f32) {
    let acceleration = Vec3::new(0.0, gravity * dt, 0.0);
    buffers
        .velocities
        .par_iter_mut()
        .zip(buffers.predicted_positions.par_iter_mut())
        .zip(buffers.positions.par_iter())
        .for_each(|((velocity, predicted), &position)| {
            *velocity += acceleration;
            *predicted = position + *velocity * PREDICTION_FACTOR;
        });
}

/// Spatial key of every particle from its predicted position.
pub(crate) fn update_spatial_hash(buffers: &ParticleBuffers, index: &mut SpatialIndex, radius: f32) {
    let n = index.len() as u32;
    index
        .keys_mut()
        .par_iter_mut()
        .zip(buffers.predicted_positions.par_iter())
        .for_each(|(key, &predicted)| {
            *key = key_from_hash(hash_cell(position_to_cell(predicted, radius)), n);
        });
}

/// Gather attributes into the sort targets in sorted order.
pub(crate) fn reorder(buffers: &mut ParticleBuffers, sorted_indices: &[u32]) {
    let ParticleBuffers {
        positions,
        predicted_positions,
        velocities,
        sort_target_positions,
        sort_target_predicted_positions,
        sort_target_velocities,
        ..
    } = buffers;

    sort_target_positions
        .par_iter_mut()
        .zip(sort_target_predicted_positions.par_iter_mut())
        .zip(sort_target_velocities.par_iter_mut())
        .zip(sorted_indices.par_iter())
        .for_each(|(((position, predicted), velocity), &source)| {
            let source = source as usize;
            *position = positions[source];
            *predicted = predicted_positions[source];
            *velocity = velocities[source];
        });
}

/// Copy the sort targets back into the canonical buffers.
pub(crate) fn reorder_copy_back(buffers: &mut ParticleBuffers) {
    buffers.positions.copy_from_slice(&buffers.sort_target_positions);
    buffers
        .predicted_positions
        .copy_from_slice(&buffers.sort_target_predicted_positions);
    buffers.velocities.copy_from_slice(&buffers.sort_target_velocities);
}

/// `(density, near_density)` of every particle, self included.
pub(crate) fn calculate_densities(
    buffers: &mut ParticleBuffers,
    index: &SpatialIndex,
    kernels: &SmoothingConstants,
) {
    let search = NeighbourSearch::new(
        &buffers.predicted_positions,
        index.keys(),
        index.offsets(),
        kernels.radius,
    );
    let predicted = &buffers.predicted_positions;

    buffers
        .densities
        .par_iter_mut()
        .enumerate()
        .for_each(|(i, density)| {
            let mut sum = Vec2::ZERO;
            search.for_each_neighbour(predicted[i], |_, _, dist_sq| {
                let dst = dist_sq.sqrt();
                sum.x += kernels.density_kernel(dst);
                sum.y += kernels.near_density_kernel(dst);
            });
            *density = sum;
        });
}

/// Pressure acceleration into the velocities, spawning foam when `foam` is given.
pub(crate) fn calculate_pressure_force(
    buffers: &mut ParticleBuffers,
    index: &SpatialIndex,
    kernels: &SmoothingConstants,
    settings: &FluidSettings,
    dt: f32,
    sim_time: f32,
    foam: Option<&mut FoamBuffers>,
) {
    let radius = kernels.radius;
    let search = NeighbourSearch::new(&buffers.predicted_positions, index.keys(), index.offsets(), radius);
    let predicted = &buffers.predicted_positions;
    let velocities = &buffers.velocities;
    let densities = &buffers.densities;
    let spawner = foam.map(|foam| foam.spawner());

    buffers
        .sort_target_velocities
        .par_iter_mut()
        .enumerate()
        .for_each(|(i, out)| {
            let position = predicted[i];
            let velocity = velocities[i];
            let density = densities[i];
            let pressure = pressure_from_density(density.x, settings.target_density, settings.pressure_multiplier);
            let near_pressure = near_pressure_from_density(density.y, settings.near_pressure_multiplier);

            let mut force = Vec3::ZERO;
            let mut weighted_velocity_difference = 0.0f32;

            search.for_each_neighbour(position, |j, offset, dist_sq| {
                if j == i {
                    return;
                }
                let dst = dist_sq.sqrt();
                let dir = if dst > 0.0 { offset / dst } else { Vec3::Y };

                let neighbour_density = densities[j];
                let neighbour_pressure = pressure_from_density(
                    neighbour_density.x,
                    settings.target_density,
                    settings.pressure_multiplier,
                );
                let neighbour_near_pressure =
                    near_pressure_from_density(neighbour_density.y, settings.near_pressure_multiplier);
                let shared_pressure = (pressure + neighbour_pressure) * 0.5;
                let shared_near_pressure = (near_pressure + neighbour_near_pressure) * 0.5;

                force += dir * kernels.density_derivative(dst) * shared_pressure / neighbour_density.x;
                force += dir * kernels.near_density_derivative(dst) * shared_near_pressure
                    / neighbour_density.y;

                if spawner.is_some() {
                    let relative = velocity - velocities[j];
                    let speed = relative.length();
                    if speed > 0.0 {
                        let relative_dir = relative / speed;
                        weighted_velocity_difference +=
                            speed * (1.0 - relative_dir.dot(-dir)) * (1.0 - dst / radius);
                    }
                }
            });

            *out = velocity + force / density.x * dt;

            if let Some(spawner) = &spawner {
                let factor = foam::spawn_factor(
                    &settings.foam,
                    sim_time,
                    weighted_velocity_difference,
                    velocity.length_squared(),
                    dt,
                );
                let mut rng = foam::rng_seed(i as u32, sim_time);
                let count = foam::spawn_count(factor, foam::random_unorm(&mut rng));
                for _ in 0..count {
                    if !spawner.push(foam::spawn_particle(position, velocity, radius, &mut rng)) {
                        break;
                    }
                }
            }
        });

    std::mem::swap(&mut buffers.velocities, &mut buffers.sort_target_velocities);
}

/// Viscous smoothing of velocities towards the neighbourhood mean.
pub(crate) fn calculate_viscosity(
    buffers: &mut ParticleBuffers,
    index: &SpatialIndex,
    kernels: &SmoothingConstants,
    strength: f32,
    dt: f32,
) {
    let search = NeighbourSearch::new(
        &buffers.predicted_positions,
        index.keys(),
        index.offsets(),
        kernels.radius,
    );
    let predicted = &buffers.predicted_positions;
    let velocities = &buffers.velocities;

    buffers
        .sort_target_velocities
        .par_iter_mut()
        .enumerate()
        .for_each(|(i, out)| {
            let velocity = velocities[i];
            let mut viscosity_force = Vec3::ZERO;
            search.for_each_neighbour(predicted[i], |j, _, dist_sq| {
                if j != i {
                    viscosity_force += (velocities[j] - velocity) * kernels.viscosity_kernel(dist_sq.sqrt());
                }
            });
            *out = velocity + viscosity_force * strength * dt;
        });

    std::mem::swap(&mut buffers.velocities, &mut buffers.sort_target_velocities);
}

/// Integrate positions and resolve box collisions.
pub(crate) fn update_positions(buffers: &mut ParticleBuffers, bounds: &Bounds, damping: f32, dt: f32) {
    buffers
        .positions
        .par_iter_mut()
        .zip(buffers.velocities.par_iter_mut())
        .for_each(|(position, velocity)| {
            *position += *velocity * dt;
            bounds.resolve_collision(position, velocity, damping);
        });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::particle::SpawnData;

    fn pair(separation: f32) -> (ParticleBuffers, SpatialIndex) {
        let spawn = SpawnData::new(
            vec![Vec3::new(0.0, 0.0, 0.0), Vec3::new(separation, 0.0, 0.0)],
            vec![Vec3::ZERO; 2],
        )
        .unwrap();
        let mut buffers = ParticleBuffers::new(2);
        buffers.seed(&spawn).unwrap();
        (buffers, SpatialIndex::new(2))
    }

    fn index_and_reorder(buffers: &mut ParticleBuffers, index: &mut SpatialIndex, radius: f32) {
        update_spatial_hash(buffers, index, radius);
        index.run().unwrap();
        reorder(buffers, index.sorted_indices());
        reorder_copy_back(buffers);
    }

    #[test]
    fn external_forces_predicts_ahead() {
        let (mut buffers, _) = pair(0.1);
        external_forces(&mut buffers, -10.0, 0.1);
        assert_eq!(buffers.velocities[0], Vec3::new(0.0, -1.0, 0.0));
        assert!((buffers.predicted_positions[0].y - (-1.0 / 120.0)).abs() < 1.0e-7);
        assert_eq!(buffers.positions[0], Vec3::ZERO);
    }

    #[test]
    fn reorder_preserves_particle_set() {
        let (mut buffers, mut index) = pair(0.5);
        buffers.velocities[1] = Vec3::X;
        index_and_reorder(&mut buffers, &mut index, 0.2);
        let moving = buffers.velocities.iter().position(|v| *v == Vec3::X).unwrap();
        assert_eq!(buffers.positions[moving], Vec3::new(0.5, 0.0, 0.0));
    }

    #[test]
    fn density_counts_self_and_close_neighbour() {
        let radius = 0.2;
        let kernels = SmoothingConstants::new(radius);
        let (mut buffers, mut index) = pair(0.1);
        index_and_reorder(&mut buffers, &mut index, radius);
        calculate_densities(&mut buffers, &index, &kernels);
        let expected = kernels.density_kernel(0.0) + kernels.density_kernel(0.1);
        for d in &buffers.densities {
            assert!((d.x - expected).abs() / expected < 1.0e-5, "{d:?}");
        }
    }

    #[test]
    fn compressed_pair_pushes_apart() {
        let radius = 0.2;
        let kernels = SmoothingConstants::new(radius);
        let settings = FluidSettings { target_density: 0.0, ..Default::default() };
        let (mut buffers, mut index) = pair(0.05);
        index_and_reorder(&mut buffers, &mut index, radius);
        calculate_densities(&mut buffers, &index, &kernels);
        calculate_pressure_force(&mut buffers, &index, &kernels, &settings, 0.01, 0.0, None);

        let left = if buffers.positions[0].x < buffers.positions[1].x { 0 } else { 1 };
        assert!(buffers.velocities[left].x < 0.0);
        assert!(buffers.velocities[1 - left].x > 0.0);
        assert!((buffers.velocities[0].x + buffers.velocities[1].x).abs() < 1.0e-4);
    }

    #[test]
    fn zero_strength_viscosity_is_exact_noop() {
        let radius = 0.2;
        let kernels = SmoothingConstants::new(radius);
        let (mut buffers, mut index) = pair(0.05);
        buffers.velocities[0] = Vec3::new(1.0, 2.0, 3.0);
        index_and_reorder(&mut buffers, &mut index, radius);
        let before = buffers.velocities.clone();
        calculate_viscosity(&mut buffers, &index, &kernels, 0.0, 0.01);
        assert_eq!(buffers.velocities, before);
    }

    #[test]
    fn viscosity_pulls_velocities_together() {
        let radius = 0.2;
        let kernels = SmoothingConstants::new(radius);
        let (mut buffers, mut index) = pair(0.05);
        buffers.velocities[0] = Vec3::X;
        index_and_reorder(&mut buffers, &mut index, radius);
        calculate_viscosity(&mut buffers, &index, &kernels, 0.001, 0.01);
        let fast = buffers.velocities.iter().map(|v| v.x).fold(f32::MIN, f32::max);
        let slow = buffers.velocities.iter().map(|v| v.x).fold(f32::MAX, f32::min);
        assert!(fast < 1.0 && slow > 0.0);
    }

    #[test]
    fn positions_collide_with_floor() {
        let (mut buffers, _) = pair(0.1);
        let bounds = Bounds { centre: Vec3::ZERO, size: Vec3::splat(1.0) };
        buffers.velocities[0] = Vec3::new(0.0, -10.0, 0.0);
        update_positions(&mut buffers, &bounds, 0.5, 0.1);
        assert_eq!(buffers.positions[0].y, -0.5);
        assert_eq!(buffers.velocities[0].y, 5.0);
    }
}
