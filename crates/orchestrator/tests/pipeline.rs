//! Config file to spawned, monitored simulation.

use fluid_orchestrator::{
    create_scheduler, BackendType, Monitor, MonitorSettings, SimulationConfig,
};
use fluid_kernel::FluidKernel;
use std::path::PathBuf;

fn temp_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("fluid-orchestrator-{}-{name}", std::process::id()))
}

const CONFIG: &str = r#"{
    "name": "small box",
    "backend": "Cpu",
    "fluid": { "foam": { "active": true, "max_particles": 256 } },
    "spawner": {
        "particle_spawn_density": 600,
        "jitter_strength": 0.01,
        "regions": [ { "centre": [0.0, 0.5, 0.0], "size": 0.6 } ],
        "seed": 3
    },
    "max_frames": 5
}"#;

#[test]
fn config_file_builds_a_running_scheduler() {
    let path = temp_path("config.json");
    std::fs::write(&path, CONFIG).unwrap();
    let config = SimulationConfig::load(path.to_str().unwrap()).unwrap();
    std::fs::remove_file(&path).ok();
    assert_eq!(config.backend, BackendType::Cpu);

    let mut scheduler = create_scheduler(&config).unwrap();
    // 0.216 * 600 = 129.6 -> 129, cbrt = 5.05 -> 5 per axis
    assert_eq!(scheduler.kernel().particle_count(), 125);

    for _ in 0..5 {
        scheduler.update(config.frame_dt).unwrap();
    }
    assert_eq!(scheduler.frame_count(), 5);
    let snapshot = scheduler.kernel().read_back().unwrap();
    assert!(snapshot.positions.iter().all(|p| p.is_finite()));
    assert!(snapshot.foam.len() <= 256);
}

#[test]
fn monitor_appends_one_line_per_check() {
    let path = temp_path("config-monitor.json");
    std::fs::write(&path, CONFIG).unwrap();
    let config = SimulationConfig::load(path.to_str().unwrap()).unwrap();
    std::fs::remove_file(&path).ok();

    let log = temp_path("metrics/log.csv");
    std::fs::remove_file(&log).ok();
    let mut monitor = Monitor::new(MonitorSettings {
        check_interval: 2.0 / 60.0,
        log_file: Some(log.clone()),
        ..MonitorSettings::default()
    });

    let mut scheduler = create_scheduler(&config).unwrap();
    let mut reports = Vec::new();
    for _ in 0..6 {
        scheduler.update(1.0 / 60.0).unwrap();
        if let Some(report) = monitor.tick(1.0 / 60.0 + 1e-6, scheduler.kernel()).unwrap() {
            reports.push(report);
        }
    }
    assert_eq!(reports.len(), 3);
    assert!(reports.iter().all(|r| r.dispatch_order_ok));

    let contents = std::fs::read_to_string(&log).unwrap();
    std::fs::remove_file(&log).ok();
    let lines: Vec<&str> = contents.lines().collect();
    assert_eq!(lines.len(), 3);
    for line in lines {
        let fields: Vec<&str> = line.split(',').collect();
        assert_eq!(fields.len(), 4);
        assert!(chrono::DateTime::parse_from_rfc3339(fields[0]).is_ok());
        assert!(fields[1].starts_with("DensityError:"));
        assert!(fields[2].starts_with("ActiveFoam:"));
        assert!(fields[3].starts_with("SurvivorFoam:"));
    }
}

#[test]
fn config_without_regions_is_rejected() {
    let path = temp_path("config-empty.json");
    std::fs::write(&path, r#"{ "name": "empty", "spawner": { "regions": [] } }"#).unwrap();
    let err = SimulationConfig::load(path.to_str().unwrap()).unwrap_err();
    std::fs::remove_file(&path).ok();
    assert!(err.contains("spawn region"));
}
