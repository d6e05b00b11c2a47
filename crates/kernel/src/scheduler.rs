//! Frame scheduler: the running/paused state machine that turns host frame
//! time into substeps on a [`FluidKernel`].

use crate::error::KernelError;
use crate::particle::SpawnData;
use crate::{FluidKernel, FrameParams};

/// Scheduler state. There are no others; a pending single step and slow mode
/// are flags layered on top.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Every `update` advances one frame.
    Running,
    /// `update` does nothing unless a single step is pending.
    Paused,
}

/// Drives a kernel frame by frame and owns the spawn data used by reset.
pub struct Scheduler<K: FluidKernel> {
    kernel: K,
    spawn: SpawnData,
    state: RunState,
    slow_mode: bool,
    step_pending: bool,
    sim_time: f32,
    frame_count: u64,
}

impl<K: FluidKernel> Scheduler<K> {
    /// Wrap a kernel already seeded from `spawn`. Starts running.
    pub fn new(kernel: K, spawn: SpawnData) -> Self {
        Self {
            kernel,
            spawn,
            state: RunState::Running,
            slow_mode: false,
            step_pending: false,
            sim_time: 0.0,
            frame_count: 0,
        }
    }

    /// Advance by one host frame of `elapsed` seconds.
    ///
    /// Returns the frame dt that was simulated, or `None` when paused.
    pub fn update(&mut self, elapsed: f32) -> Result<Option<f32>, KernelError> {
        if self.step_pending {
            let substeps = self.substeps();
            let dt = self.frame_dt(elapsed) / substeps as f32;
            self.run_frame(dt, 1)?;
            self.step_pending = false;
            self.state = RunState::Paused;
            return Ok(Some(dt));
        }

        match self.state {
            RunState::Paused => Ok(None),
            RunState::Running => {
                let frame_dt = self.frame_dt(elapsed);
                self.run_frame(frame_dt, self.substeps())?;
                Ok(Some(frame_dt))
            }
        }
    }

    /// Flip between running and paused.
    pub fn toggle_pause(&mut self) {
        self.state = match self.state {
            RunState::Running => RunState::Paused,
            RunState::Paused => RunState::Running,
        };
    }

    /// Stop advancing on `update`.
    pub fn pause(&mut self) {
        self.state = RunState::Paused;
    }

    /// Advance on every `update`.
    pub fn resume(&mut self) {
        self.state = RunState::Running;
    }

    /// Switch between the normal and the slow time scale.
    pub fn toggle_slow_mode(&mut self) {
        self.slow_mode = !self.slow_mode;
    }

    /// Make the next `update` advance exactly one substep, then pause.
    pub fn step_once(&mut self) {
        self.step_pending = true;
    }

    /// Re-seed from the retained spawn data, prime densities with a
    /// zero-duration frame and pause.
    pub fn reset(&mut self) -> Result<(), KernelError> {
        self.kernel.reset(&self.spawn)?;
        self.sim_time = 0.0;
        self.step_pending = false;
        self.run_frame(0.0, self.substeps())?;
        self.state = RunState::Paused;
        tracing::info!(particles = self.kernel.particle_count(), "simulation reset");
        Ok(())
    }

    /// Replace the spawn data used by later resets and reset immediately.
    pub fn respawn(&mut self, spawn: SpawnData) -> Result<(), KernelError> {
        self.spawn = spawn;
        self.reset()
    }

    /// Current state.
    pub fn state(&self) -> RunState {
        self.state
    }

    /// `true` while the slow time scale is active.
    pub fn slow_mode(&self) -> bool {
        self.slow_mode
    }

    /// Simulated seconds since the last reset.
    pub fn sim_time(&self) -> f32 {
        self.sim_time
    }

    /// Frames advanced since construction, priming frames included.
    pub fn frame_count(&self) -> u64 {
        self.frame_count
    }

    /// The driven kernel.
    pub fn kernel(&self) -> &K {
        &self.kernel
    }

    /// Mutable access to the driven kernel (e.g. to change settings).
    pub fn kernel_mut(&mut self) -> &mut K {
        &mut self.kernel
    }

    fn substeps(&self) -> u32 {
        self.kernel.settings().substeps.max(1)
    }

    fn frame_dt(&self, elapsed: f32) -> f32 {
        let settings = self.kernel.settings();
        let scale = if self.slow_mode {
            settings.slow_time_scale
        } else {
            settings.time_scale
        };
        let dt = elapsed * scale;
        match settings.max_frame_dt() {
            Some(cap) => dt.min(cap),
            None => dt,
        }
    }

    /// `substeps` substeps of `dt` each, then the foam pass over the whole
    /// advanced duration.
    fn run_frame(&mut self, dt: f32, substeps: u32) -> Result<(), KernelError> {
        let frame_dt = dt * substeps as f32;
        for _ in 0..substeps {
            self.sim_time += dt;
            self.kernel.step(&FrameParams {
                dt,
                frame_dt,
                sim_time: self.sim_time,
            })?;
        }
        if self.kernel.settings().foam.active {
            self.kernel.update_foam(&FrameParams {
                dt,
                frame_dt,
                sim_time: self.sim_time,
            })?;
        }
        self.frame_count += 1;
        tracing::debug!(
            frame = self.frame_count,
            dt,
            substeps,
            sim_time = self.sim_time,
            "frame advanced"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{CpuKernel, FluidSettings};
    use glam::Vec3;

    fn scheduler(settings: FluidSettings) -> Scheduler<CpuKernel> {
        let spawn = SpawnData::new(
            vec![Vec3::new(0.0, 1.0, 0.0), Vec3::new(0.1, 1.0, 0.0)],
            vec![Vec3::ZERO; 2],
        )
        .unwrap();
        let kernel = CpuKernel::new(&spawn, settings).unwrap();
        Scheduler::new(kernel, spawn)
    }

    #[test]
    fn paused_update_does_nothing() {
        let mut s = scheduler(FluidSettings::default());
        s.pause();
        assert_eq!(s.update(0.01).unwrap(), None);
        assert_eq!(s.frame_count(), 0);
        assert_eq!(s.kernel().dispatch_stats().total(), 0);
    }

    #[test]
    fn frame_dt_is_capped_and_scaled() {
        let mut s = scheduler(FluidSettings::default());
        assert_eq!(s.update(1.0).unwrap(), Some(1.0 / 60.0));
        s.toggle_slow_mode();
        let dt = s.update(0.01).unwrap().unwrap();
        assert!((dt - 0.001).abs() < 1e-7);
    }

    #[test]
    fn uncapped_when_fps_limit_disabled() {
        let settings = FluidSettings {
            max_timestep_fps: 0.0,
            ..FluidSettings::default()
        };
        let mut s = scheduler(settings);
        assert_eq!(s.update(0.5).unwrap(), Some(0.5));
    }

    #[test]
    fn step_once_runs_one_substep_then_pauses() {
        let mut s = scheduler(FluidSettings::default());
        s.pause();
        s.step_once();
        let dt = s.update(0.015).unwrap().unwrap();
        assert!((dt - 0.005).abs() < 1e-6);
        assert_eq!(s.state(), RunState::Paused);
        assert_eq!(
            s.kernel().dispatch_stats().count(crate::KernelId::UpdatePositions),
            1
        );
        assert_eq!(s.update(0.015).unwrap(), None);
    }

    #[test]
    fn reset_restores_spawn_and_pauses() {
        let mut s = scheduler(FluidSettings::default());
        for _ in 0..5 {
            s.update(1.0 / 60.0).unwrap();
        }
        assert!(s.sim_time() > 0.0);
        s.reset().unwrap();
        assert_eq!(s.state(), RunState::Paused);
        assert_eq!(s.sim_time(), 0.0);

        let snapshot = s.kernel().read_back().unwrap();
        let mut ys: Vec<f32> = snapshot.positions.iter().map(|p| p.y).collect();
        ys.sort_by(f32::total_cmp);
        assert_eq!(ys, vec![1.0, 1.0]);
        assert!(snapshot.velocities.iter().all(|v| *v == Vec3::ZERO));
        assert!(snapshot.densities.iter().all(|d| d.x > 0.0));
    }

    #[test]
    fn toggle_pause_flips_state() {
        let mut s = scheduler(FluidSettings::default());
        s.toggle_pause();
        assert_eq!(s.state(), RunState::Paused);
        s.toggle_pause();
        assert_eq!(s.state(), RunState::Running);
    }
}
