//! Orchestration Layer
//!
//! This crate sets up and drives fluid simulations built on `fluid-kernel`:
//! - JSON configuration
//! - Initial particle spawning
//! - Back-end selection with CPU fallback
//! - Runtime diagnostics (monitor)
//! - Simulation runner with lifecycle management

#![warn(missing_docs)]

pub mod config;
pub mod monitor;
pub mod runner;
pub mod spawn;

pub use config::{BackendType, SimulationConfig};
pub use monitor::{Monitor, MonitorReport, MonitorSettings};
pub use runner::{BoxedScheduler, RunnerState, SimulationRunner};
pub use spawn::{SpawnRegion, Spawner, SpawnerSettings};

use fluid_kernel::{CpuKernel, FluidKernel, FluidSettings, KernelError, Scheduler, SpawnData};

/// Create a complete simulation from a configuration file
///
/// This function performs the full simulation setup pipeline:
/// 1. Load and validate the configuration
/// 2. Generate spawn data from the configured regions
/// 3. Create the compute kernel for the configured back-end
/// 4. Wrap it in a scheduler and a SimulationRunner
///
/// # Example
/// ```no_run
/// use fluid_orchestrator::create_simulation;
///
/// let runner = create_simulation("configs/dam_break.json")?;
/// runner.start();
/// // ... query status, pause, resume, etc.
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub fn create_simulation(config_path: &str) -> Result<SimulationRunner, Box<dyn std::error::Error>> {
    tracing::info!("Creating simulation from config: {}", config_path);

    let config = SimulationConfig::load(config_path).map_err(|e| {
        tracing::error!("{e}");
        e
    })?;
    tracing::info!("Configuration loaded: {}", config.name);

    let scheduler = create_scheduler(&config)?;
    let runner = SimulationRunner::new(
        scheduler,
        Monitor::new(config.monitor.clone()),
        config.frame_dt,
        config.max_frames,
    );

    tracing::info!("Simulation ready to start");
    Ok(runner)
}

/// Spawn particles and build a scheduler for an already validated config.
pub fn create_scheduler(config: &SimulationConfig) -> Result<BoxedScheduler, Box<dyn std::error::Error>> {
    let spawn = Spawner::new(config.spawner.clone())
        .and_then(|mut spawner| spawner.spawn())
        .map_err(|e| {
            tracing::error!("Spawning failed: {e}");
            e
        })?;

    let kernel = create_kernel(config.backend, &spawn, config.fluid).map_err(|e| {
        tracing::error!("Kernel creation failed: {e}");
        e
    })?;
    Ok(Scheduler::new(kernel, spawn))
}

/// Create a compute kernel for the requested back-end.
///
/// `Auto` tries the GPU first and falls back to the CPU. `Gpu` fails if the
/// `gpu` feature is disabled or no suitable adapter exists.
pub fn create_kernel(
    backend: BackendType,
    spawn: &SpawnData,
    settings: FluidSettings,
) -> Result<Box<dyn FluidKernel + Send>, KernelError> {
    match backend {
        BackendType::Cpu => {
            tracing::info!("Creating CPU fluid kernel...");
            Ok(Box::new(CpuKernel::new(spawn, settings)?))
        }
        #[cfg(feature = "gpu")]
        BackendType::Gpu => {
            tracing::info!("Creating GPU fluid kernel...");
            Ok(Box::new(fluid_kernel::GpuKernel::new(spawn, settings)?))
        }
        #[cfg(not(feature = "gpu"))]
        BackendType::Gpu => Err(KernelError::GpuInit(
            "GPU backend requested but the 'gpu' feature is not enabled".to_string(),
        )),
        #[cfg(feature = "gpu")]
        BackendType::Auto => {
            tracing::info!("Auto-detecting backend...");
            match fluid_kernel::GpuKernel::new(spawn, settings) {
                Ok(gpu) => Ok(Box::new(gpu)),
                Err(KernelError::GpuInit(reason)) => {
                    tracing::warn!("GPU init failed ({reason}), falling back to CPU");
                    Ok(Box::new(CpuKernel::new(spawn, settings)?))
                }
                Err(e) => Err(e),
            }
        }
        #[cfg(not(feature = "gpu"))]
        BackendType::Auto => {
            tracing::info!("GPU feature not enabled, using CPU kernel");
            Ok(Box::new(CpuKernel::new(spawn, settings)?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    fn spawn() -> SpawnData {
        SpawnData::new(vec![Vec3::ZERO, Vec3::X * 0.1], vec![Vec3::ZERO; 2]).unwrap()
    }

    #[test]
    fn cpu_backend_is_always_available() {
        let kernel = create_kernel(BackendType::Cpu, &spawn(), FluidSettings::default()).unwrap();
        assert_eq!(kernel.particle_count(), 2);
    }

    #[test]
    fn auto_backend_always_yields_a_kernel() {
        let kernel = create_kernel(BackendType::Auto, &spawn(), FluidSettings::default()).unwrap();
        assert_eq!(kernel.particle_count(), 2);
    }

    #[test]
    fn non_finite_settings_fail_construction() {
        let settings = FluidSettings {
            smoothing_radius: f32::NAN,
            ..FluidSettings::default()
        };
        assert!(create_kernel(BackendType::Cpu, &spawn(), settings).is_err());
    }
}
