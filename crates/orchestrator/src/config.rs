//! Configuration parsing and validation for fluid simulations

use crate::monitor::MonitorSettings;
use crate::spawn::SpawnerSettings;
use fluid_kernel::FluidSettings;
use serde::{Deserialize, Serialize};
use std::fs;

/// Main simulation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationConfig {
    /// Human-readable simulation name
    pub name: String,
    /// Compute back-end
    #[serde(default)]
    pub backend: BackendType,
    /// Fluid, time-stepping and foam settings
    #[serde(default)]
    pub fluid: FluidSettings,
    /// Initial particle placement
    pub spawner: SpawnerSettings,
    /// Runtime diagnostics
    #[serde(default)]
    pub monitor: MonitorSettings,
    /// Host seconds per frame fed to the scheduler by the headless runner
    #[serde(default = "default_frame_dt")]
    pub frame_dt: f32,
    /// Stop after this many frames
    pub max_frames: Option<u64>,
}

/// Compute back-end selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackendType {
    /// rayon CPU kernel
    Cpu,
    /// wgpu compute kernel; fails if no adapter is available
    Gpu,
    /// GPU when available, CPU otherwise
    #[default]
    Auto,
}

fn default_frame_dt() -> f32 {
    1.0 / 60.0
}

impl SimulationConfig {
    /// Load configuration from a JSON file
    pub fn load(path: &str) -> Result<Self, String> {
        let contents = fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {}", path, e))?;

        let config: SimulationConfig = serde_json::from_str(&contents)
            .map_err(|e| format!("Failed to parse config JSON: {}", e))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate orchestrator-level fields. Fluid settings are checked by the
    /// kernel when it is created.
    pub fn validate(&self) -> Result<(), String> {
        if self.spawner.regions.is_empty() {
            return Err("At least one spawn region is required".to_string());
        }
        if self.spawner.particle_spawn_density == 0 {
            return Err("Particle spawn density must be positive".to_string());
        }
        if self.spawner.regions.iter().any(|r| !(r.size > 0.0)) {
            return Err("Spawn region sizes must be positive".to_string());
        }
        if !(self.frame_dt > 0.0) || !self.frame_dt.is_finite() {
            return Err("frame_dt must be positive and finite".to_string());
        }
        if self.monitor.enabled && !(self.monitor.check_interval > 0.0) {
            return Err("Monitor check interval must be positive".to_string());
        }
        if let Some(max_frames) = self.max_frames {
            if max_frames == 0 {
                return Err("max_frames must be at least 1".to_string());
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spawn::SpawnRegion;
    use glam::Vec3;

    fn config() -> SimulationConfig {
        serde_json::from_str(
            r#"{
                "name": "test",
                "spawner": { "regions": [ { "centre": [0.0, 1.0, 0.0], "size": 1.0 } ] },
                "max_frames": 10
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn defaults_fill_missing_sections() {
        let config = config();
        assert_eq!(config.backend, BackendType::Auto);
        assert_eq!(config.fluid, FluidSettings::default());
        assert_eq!(config.spawner.particle_spawn_density, 600);
        assert!((config.frame_dt - 1.0 / 60.0).abs() < 1e-9);
        assert!(config.monitor.enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_fluid_section_keeps_other_defaults() {
        let config: SimulationConfig = serde_json::from_str(
            r#"{
                "name": "test",
                "backend": "Cpu",
                "fluid": { "viscosity_strength": 0.2, "foam": { "active": true } },
                "spawner": { "regions": [ { "centre": [0.0, 0.0, 0.0], "size": 1.0 } ] }
            }"#,
        )
        .unwrap();
        assert_eq!(config.backend, BackendType::Cpu);
        assert_eq!(config.fluid.viscosity_strength, 0.2);
        assert_eq!(config.fluid.gravity, -10.0);
        assert!(config.fluid.foam.active);
        assert_eq!(config.fluid.foam.max_particles, 1000);
    }

    #[test]
    fn validation_rejects_bad_fields() {
        let mut c = config();
        c.spawner.regions.clear();
        assert!(c.validate().is_err());

        let mut c = config();
        c.spawner.particle_spawn_density = 0;
        assert!(c.validate().is_err());

        let mut c = config();
        c.spawner.regions.push(SpawnRegion { centre: Vec3::ZERO, size: -1.0 });
        assert!(c.validate().is_err());

        let mut c = config();
        c.frame_dt = 0.0;
        assert!(c.validate().is_err());

        let mut c = config();
        c.monitor.check_interval = 0.0;
        assert!(c.validate().is_err());
        c.monitor.enabled = false;
        assert!(c.validate().is_ok());

        let mut c = config();
        c.max_frames = Some(0);
        assert!(c.validate().is_err());
    }

    #[test]
    fn load_reports_missing_file() {
        let err = SimulationConfig::load("/nonexistent/fluid.json").unwrap_err();
        assert!(err.contains("Failed to read config file"));
    }
}
