//! Headless driver
//!
//! Runs a simulation from a JSON config until `max_frames` is reached,
//! logging progress and monitor reports.
//!
//! Usage: fluid-headless [CONFIG]  (default: configs/dam_break.json)

use fluid_orchestrator::{create_simulation, RunnerState};
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fluid_orchestrator=info,fluid_kernel=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "configs/dam_break.json".to_string());

    let runner = match create_simulation(&config_path) {
        Ok(runner) => runner,
        Err(e) => {
            tracing::error!("Failed to create simulation: {e}");
            return ExitCode::FAILURE;
        }
    };

    runner.start();
    let mut last_logged = 0;
    let state = loop {
        std::thread::sleep(Duration::from_millis(250));
        let state = runner.state();
        let frames = runner.frame_count();
        if frames >= last_logged + 60 {
            last_logged = frames;
            tracing::info!(frames, sim_time = runner.sim_time(), "progress");
        }
        if matches!(state, RunnerState::Finished | RunnerState::Error) {
            break state;
        }
    };

    if let Some(report) = runner.last_report() {
        tracing::info!(
            density_error = report.avg_density_error,
            active_foam = report.active_foam,
            issues = report.issues.len(),
            "last monitor report"
        );
    }
    let error = runner.error_message();
    if let Err(e) = runner.join() {
        tracing::error!("{e}");
        return ExitCode::FAILURE;
    }
    match (state, error) {
        (RunnerState::Error, message) => {
            tracing::error!("Simulation failed: {}", message.unwrap_or_default());
            ExitCode::FAILURE
        }
        _ => ExitCode::SUCCESS,
    }
}
