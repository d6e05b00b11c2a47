//! Simulation runner with lifecycle management
//!
//! This module provides the `SimulationRunner` which drives a [`Scheduler`]
//! in a background thread. Control calls queue commands that the thread
//! applies between frames; status is published through shared state.

use crate::monitor::{Monitor, MonitorReport};
use fluid_kernel::{FluidKernel, RunState, Scheduler};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::Duration;

/// Scheduler driven by the runner
pub type BoxedScheduler = Scheduler<Box<dyn FluidKernel + Send>>;

/// Runner state enum
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunnerState {
    /// Simulation created but not yet started
    Created,
    /// Frames are advancing
    Running,
    /// Scheduler paused; single steps and resets still apply
    Paused,
    /// Simulation finished (reached max_frames or stopped)
    Finished,
    /// Simulation encountered an error
    Error,
}

/// Control requests applied by the runner thread between frames
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command {
    Pause,
    Resume,
    StepOnce,
    ToggleSlowMode,
    Reset,
}

/// Shared state between the runner thread and control interface
struct SharedState {
    state: RunnerState,
    commands: VecDeque<Command>,
    sim_time: f32,
    frame_count: u64,
    last_report: Option<MonitorReport>,
    error_message: Option<String>,
}

fn lock(shared: &Mutex<SharedState>) -> MutexGuard<'_, SharedState> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle for controlling and querying a running simulation
pub struct SimulationRunner {
    shared: Arc<Mutex<SharedState>>,
    thread_handle: Option<thread::JoinHandle<()>>,
}

impl SimulationRunner {
    /// Create a new runner
    ///
    /// # Arguments
    /// * `scheduler` - Scheduler wrapping an already seeded kernel
    /// * `monitor` - Diagnostics run between frames
    /// * `frame_dt` - Host seconds fed to the scheduler per frame
    /// * `max_frames` - Optional number of advanced frames after which the runner finishes
    pub fn new(
        scheduler: BoxedScheduler,
        monitor: Monitor,
        frame_dt: f32,
        max_frames: Option<u64>,
    ) -> Self {
        let shared = Arc::new(Mutex::new(SharedState {
            state: RunnerState::Created,
            commands: VecDeque::new(),
            sim_time: 0.0,
            frame_count: 0,
            last_report: None,
            error_message: None,
        }));

        let shared_clone = Arc::clone(&shared);
        let thread_handle = thread::spawn(move || {
            run_simulation_loop(scheduler, monitor, shared_clone, frame_dt, max_frames);
        });

        Self {
            shared,
            thread_handle: Some(thread_handle),
        }
    }

    /// Get current runner state
    pub fn state(&self) -> RunnerState {
        lock(&self.shared).state.clone()
    }

    /// Simulated seconds since the last reset
    pub fn sim_time(&self) -> f32 {
        lock(&self.shared).sim_time
    }

    /// Frames advanced by the runner
    pub fn frame_count(&self) -> u64 {
        lock(&self.shared).frame_count
    }

    /// Most recent monitor report
    pub fn last_report(&self) -> Option<MonitorReport> {
        lock(&self.shared).last_report.clone()
    }

    /// Get error message if state is Error
    pub fn error_message(&self) -> Option<String> {
        lock(&self.shared).error_message.clone()
    }

    /// Start the simulation (transition from Created to Running)
    pub fn start(&self) {
        let mut shared = lock(&self.shared);
        if shared.state == RunnerState::Created {
            shared.state = RunnerState::Running;
        }
    }

    /// Pause the simulation
    pub fn pause(&self) {
        self.send(Command::Pause);
    }

    /// Resume the simulation
    pub fn resume(&self) {
        self.send(Command::Resume);
    }

    /// Advance exactly one substep, then stay paused
    pub fn step_once(&self) {
        self.send(Command::StepOnce);
    }

    /// Switch between normal and slow time scale
    pub fn toggle_slow_mode(&self) {
        self.send(Command::ToggleSlowMode);
    }

    /// Re-seed from the spawn data; the simulation ends up paused
    pub fn reset(&self) {
        self.send(Command::Reset);
    }

    /// Ask the thread to exit after the current frame
    pub fn stop(&self) {
        let mut shared = lock(&self.shared);
        if matches!(
            shared.state,
            RunnerState::Created | RunnerState::Running | RunnerState::Paused
        ) {
            shared.state = RunnerState::Finished;
        }
    }

    /// Wait for the simulation thread to complete
    pub fn join(mut self) -> Result<(), String> {
        if let Some(handle) = self.thread_handle.take() {
            handle.join().map_err(|_| "Thread panicked".to_string())?;
        }
        Ok(())
    }

    fn send(&self, command: Command) {
        lock(&self.shared).commands.push_back(command);
    }
}

impl Drop for SimulationRunner {
    fn drop(&mut self) {
        // Signal the thread to exit
        self.stop();
    }
}

/// Main simulation loop executed in background thread
fn run_simulation_loop(
    mut scheduler: BoxedScheduler,
    mut monitor: Monitor,
    shared: Arc<Mutex<SharedState>>,
    frame_dt: f32,
    max_frames: Option<u64>,
) {
    // Wait for start signal
    loop {
        match lock(&shared).state {
            RunnerState::Created => thread::sleep(Duration::from_millis(10)),
            RunnerState::Running => break,
            _ => return,
        }
    }

    let mut frames = 0u64;
    loop {
        let commands: Vec<Command> = {
            let mut guard = lock(&shared);
            if matches!(guard.state, RunnerState::Finished | RunnerState::Error) {
                break;
            }
            guard.commands.drain(..).collect()
        };

        for command in commands {
            if let Err(e) = apply(&mut scheduler, command) {
                fail(&shared, format!("{command:?} failed: {e}"));
                return;
            }
        }

        match scheduler.update(frame_dt) {
            Ok(Some(_)) => frames += 1,
            Ok(None) => {}
            Err(e) => {
                fail(&shared, format!("frame {frames} failed: {e}"));
                return;
            }
        }

        let report = match monitor.tick(frame_dt, scheduler.kernel()) {
            Ok(report) => report,
            Err(e) => {
                fail(&shared, format!("monitor check failed: {e}"));
                return;
            }
        };

        let paused = scheduler.state() == RunState::Paused;
        {
            let mut guard = lock(&shared);
            guard.sim_time = scheduler.sim_time();
            guard.frame_count = frames;
            if report.is_some() {
                guard.last_report = report;
            }
            if matches!(guard.state, RunnerState::Running | RunnerState::Paused) {
                guard.state = if paused {
                    RunnerState::Paused
                } else {
                    RunnerState::Running
                };
            }
            if max_frames.is_some_and(|max| frames >= max) {
                tracing::info!(frames, "Simulation finished: reached max_frames");
                guard.state = RunnerState::Finished;
                break;
            }
        }

        if paused {
            thread::sleep(Duration::from_millis(10));
        }
    }

    tracing::info!(
        frames,
        sim_time = scheduler.sim_time(),
        checks = monitor.checks(),
        "Simulation thread exiting"
    );
}

fn apply(scheduler: &mut BoxedScheduler, command: Command) -> Result<(), String> {
    match command {
        Command::Pause => scheduler.pause(),
        Command::Resume => scheduler.resume(),
        Command::StepOnce => scheduler.step_once(),
        Command::ToggleSlowMode => scheduler.toggle_slow_mode(),
        Command::Reset => scheduler.reset().map_err(|e| e.to_string())?,
    }
    Ok(())
}

fn fail(shared: &Mutex<SharedState>, message: String) {
    tracing::error!("{message}");
    let mut guard = lock(shared);
    guard.state = RunnerState::Error;
    guard.error_message = Some(message);
}
