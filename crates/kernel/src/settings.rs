//! Statically typed simulation settings.
//!
//! Every value the compute kernels read lives in [`FluidSettings`]; backends
//! pack it into their own uniform layout with a fixed field list.

use glam::{Vec2, Vec3};
use serde::{Deserialize, Serialize};

use crate::error::KernelError;

/// Axis-aligned simulation box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    /// Box centre.
    pub centre: Vec3,
    /// Full edge lengths.
    pub size: Vec3,
}

impl Bounds {
    /// Half extents of the box.
    pub fn half_size(&self) -> Vec3 {
        self.size * 0.5
    }

    /// Clamp `position` into the box, reflecting and damping the velocity
    /// component along every axis where the particle reached a face.
    pub fn resolve_collision(&self, position: &mut Vec3, velocity: &mut Vec3, damping: f32) {
        let half = self.half_size();
        let mut local = *position - self.centre;
        let edge_dst = half - local.abs();

        for axis in 0..3 {
            if edge_dst[axis] <= 0.0 {
                local[axis] = half[axis] * local[axis].signum();
                velocity[axis] *= -damping;
            }
        }
        *position = local + self.centre;
    }
}

impl Default for Bounds {
    fn default() -> Self {
        Self {
            centre: Vec3::ZERO,
            size: Vec3::new(16.0, 8.0, 6.0),
        }
    }
}

/// Secondary-particle (foam, spray, bubble) settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FoamSettings {
    /// Enables spawning and the once-per-frame foam update.
    pub active: bool,
    /// Capacity of the foam buffers.
    pub max_particles: u32,
    /// Base spawn rate from trapped air.
    pub trapped_air_spawn_rate: f32,
    /// Seconds for the spawn rate to ramp up; `<= 0` disables the ramp.
    pub spawn_rate_fade_in_time: f32,
    /// Simulation time at which the ramp starts.
    pub spawn_rate_fade_start_time: f32,
    /// Weighted velocity difference mapped to [0, 1].
    pub trapped_air_velocity: Vec2,
    /// Squared speed mapped to [0, 1].
    pub kinetic_energy: Vec2,
    /// Fraction of gravity cancelled for bubbles (> 1 rises).
    pub bubble_buoyancy: f32,
    /// At most this many fluid neighbours classifies as spray.
    pub spray_max_neighbours: u32,
    /// At least this many fluid neighbours classifies as bubble.
    pub bubble_min_neighbours: u32,
    /// Target scale of bubbles.
    pub bubble_scale: f32,
    /// Rate at which scale eases towards its target.
    pub bubble_scale_change_speed: f32,
}

impl Default for FoamSettings {
    fn default() -> Self {
        Self {
            active: false,
            max_particles: 1000,
            trapped_air_spawn_rate: 70.0,
            spawn_rate_fade_in_time: 0.5,
            spawn_rate_fade_start_time: 0.0,
            trapped_air_velocity: Vec2::new(5.0, 25.0),
            kinetic_energy: Vec2::new(15.0, 80.0),
            bubble_buoyancy: 1.5,
            spray_max_neighbours: 5,
            bubble_min_neighbours: 15,
            bubble_scale: 0.5,
            bubble_scale_change_speed: 7.0,
        }
    }
}

impl FoamSettings {
    /// Spawn-rate ramp for simulation time `sim_time`, in [0, 1].
    pub fn fade_in(&self, sim_time: f32) -> f32 {
        if self.spawn_rate_fade_in_time <= 0.0 {
            1.0
        } else {
            ((sim_time - self.spawn_rate_fade_start_time) / self.spawn_rate_fade_in_time).clamp(0.0, 1.0)
        }
    }

    /// Effective trapped-air spawn rate at `sim_time` (rate * fade^2).
    pub fn trapped_air_rate(&self, sim_time: f32) -> f32 {
        let fade = self.fade_in(sim_time);
        self.trapped_air_spawn_rate * fade * fade
    }
}

/// Fluid and time-stepping settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FluidSettings {
    /// Vertical acceleration (negative pulls down).
    pub gravity: f32,
    /// Smoothing radius; also the spatial-hash cell size.
    pub smoothing_radius: f32,
    /// Rest density.
    pub target_density: f32,
    /// Stiffness of the density pressure term.
    pub pressure_multiplier: f32,
    /// Stiffness of the near-density pressure term.
    pub near_pressure_multiplier: f32,
    /// Viscosity strength; zero skips the viscosity pass.
    pub viscosity_strength: f32,
    /// Velocity retained (and reflected) on boundary collision, in [0, 1].
    pub collision_damping: f32,
    /// Substeps per frame.
    pub substeps: u32,
    /// Frame dt cap is `1 / max_timestep_fps`; `<= 0` disables the cap.
    pub max_timestep_fps: f32,
    /// Normal time scale.
    pub time_scale: f32,
    /// Time scale in slow mode.
    pub slow_time_scale: f32,
    /// Simulation box.
    pub bounds: Bounds,
    /// Secondary particles.
    pub foam: FoamSettings,
    /// Issue the viscosity pass even when its strength is zero (diagnostic).
    pub force_viscosity_pass: bool,
}

impl Default for FluidSettings {
    fn default() -> Self {
        Self {
            gravity: -10.0,
            smoothing_radius: 0.2,
            target_density: 630.0,
            pressure_multiplier: 288.0,
            near_pressure_multiplier: 2.15,
            viscosity_strength: 0.0,
            collision_damping: 0.95,
            substeps: 3,
            max_timestep_fps: 60.0,
            time_scale: 1.0,
            slow_time_scale: 0.1,
            bounds: Bounds::default(),
            foam: FoamSettings::default(),
            force_viscosity_pass: false,
        }
    }
}

impl FluidSettings {
    /// Reject NaN or infinite values. No other validation is performed.
    pub fn check_finite(&self) -> Result<(), KernelError> {
        let scalars = [
            ("gravity", self.gravity),
            ("smoothing_radius", self.smoothing_radius),
            ("target_density", self.target_density),
            ("pressure_multiplier", self.pressure_multiplier),
            ("near_pressure_multiplier", self.near_pressure_multiplier),
            ("viscosity_strength", self.viscosity_strength),
            ("collision_damping", self.collision_damping),
            ("max_timestep_fps", self.max_timestep_fps),
            ("time_scale", self.time_scale),
            ("slow_time_scale", self.slow_time_scale),
            ("foam.trapped_air_spawn_rate", self.foam.trapped_air_spawn_rate),
            ("foam.spawn_rate_fade_in_time", self.foam.spawn_rate_fade_in_time),
            ("foam.spawn_rate_fade_start_time", self.foam.spawn_rate_fade_start_time),
            ("foam.bubble_buoyancy", self.foam.bubble_buoyancy),
            ("foam.bubble_scale", self.foam.bubble_scale),
            ("foam.bubble_scale_change_speed", self.foam.bubble_scale_change_speed),
        ];
        if let Some(&(field, _)) = scalars.iter().find(|(_, v)| !v.is_finite()) {
            return Err(KernelError::NonFinite { field });
        }

        let vectors = [
            ("bounds.centre", self.bounds.centre.is_finite()),
            ("bounds.size", self.bounds.size.is_finite()),
            ("foam.trapped_air_velocity", self.foam.trapped_air_velocity.is_finite()),
            ("foam.kinetic_energy", self.foam.kinetic_energy.is_finite()),
        ];
        if let Some(&(field, _)) = vectors.iter().find(|(_, ok)| !ok) {
            return Err(KernelError::NonFinite { field });
        }
        Ok(())
    }

    /// Largest frame dt the scheduler will use, or `None` for no cap.
    pub fn max_frame_dt(&self) -> Option<f32> {
        (self.max_timestep_fps > 0.0).then(|| 1.0 / self.max_timestep_fps)
    }

    /// `true` when the viscosity pass has to be issued.
    pub fn runs_viscosity_pass(&self) -> bool {
        self.viscosity_strength != 0.0 || self.force_viscosity_pass
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_follow_reference_scene() {
        let s = FluidSettings::default();
        assert_eq!(s.gravity, -10.0);
        assert_eq!(s.smoothing_radius, 0.2);
        assert_eq!(s.target_density, 630.0);
        assert_eq!(s.substeps, 3);
        assert_eq!(s.max_frame_dt(), Some(1.0 / 60.0));
        assert!(!s.runs_viscosity_pass());
        s.check_finite().unwrap();
    }

    #[test]
    fn non_finite_field_is_named() {
        let mut s = FluidSettings::default();
        s.pressure_multiplier = f32::NAN;
        assert_eq!(
            s.check_finite(),
            Err(KernelError::NonFinite { field: "pressure_multiplier" })
        );

        let mut s = FluidSettings::default();
        s.bounds.size.y = f32::INFINITY;
        assert_eq!(s.check_finite(), Err(KernelError::NonFinite { field: "bounds.size" }));
    }

    #[test]
    fn zero_fps_means_uncapped() {
        let s = FluidSettings { max_timestep_fps: 0.0, ..Default::default() };
        assert_eq!(s.max_frame_dt(), None);
    }

    #[test]
    fn fade_in_ramp() {
        let foam = FoamSettings {
            spawn_rate_fade_in_time: 2.0,
            spawn_rate_fade_start_time: 1.0,
            ..Default::default()
        };
        assert_eq!(foam.fade_in(0.5), 0.0);
        assert_eq!(foam.fade_in(2.0), 0.5);
        assert_eq!(foam.fade_in(10.0), 1.0);
        assert_eq!(foam.trapped_air_rate(2.0), 70.0 * 0.25);

        let instant = FoamSettings { spawn_rate_fade_in_time: 0.0, ..Default::default() };
        assert_eq!(instant.fade_in(0.0), 1.0);
    }

    #[test]
    fn collision_reflects_and_damps() {
        let bounds = Bounds { centre: Vec3::ZERO, size: Vec3::splat(2.0) };
        let mut p = Vec3::new(1.5, 0.0, -0.2);
        let mut v = Vec3::new(2.0, 1.0, 0.0);
        bounds.resolve_collision(&mut p, &mut v, 0.5);
        assert_eq!(p, Vec3::new(1.0, 0.0, -0.2));
        assert_eq!(v, Vec3::new(-1.0, 1.0, 0.0));
    }

    #[test]
    fn partial_json_uses_defaults() {
        let s: FluidSettings = serde_json::from_str(r#"{ "viscosity_strength": 0.01 }"#).unwrap();
        assert_eq!(s.viscosity_strength, 0.01);
        assert_eq!(s.target_density, 630.0);
        assert!(s.runs_viscosity_pass());
    }
}
