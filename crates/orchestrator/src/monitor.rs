//! Runtime diagnostics for a running simulation
//!
//! The monitor periodically verifies the dispatch order of the last substep,
//! samples a few entries of every particle buffer looking for divergence and
//! appends one metrics line per check to a log file. It only reads from the
//! kernel.

use chrono::{DateTime, SecondsFormat, Utc};
use fluid_kernel::{FluidKernel, FluidSnapshot, KernelId};
use glam::Vec3;
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

/// Velocity magnitude above which a sampled particle is reported
pub const VELOCITY_SOFT_CAP: f32 = 250.0;

/// Monitor configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorSettings {
    /// Run checks at all
    pub enabled: bool,
    /// Host seconds between checks
    pub check_interval: f32,
    /// Entries sampled from each buffer
    pub sample_count: usize,
    /// Permitted density deviation as a fraction of the target density
    pub permitted_deviation: f32,
    /// Metrics log; no log is written when unset
    pub log_file: Option<PathBuf>,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            check_interval: 5.0,
            sample_count: 16,
            permitted_deviation: 0.05,
            log_file: None,
        }
    }
}

/// Outcome of one check
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorReport {
    /// Wall-clock time of the check
    pub time: DateTime<Utc>,
    /// Last substep ran in program order
    pub dispatch_order_ok: bool,
    /// Human-readable problems found
    pub issues: Vec<String>,
    /// Mean of `|rho - rho0| / rho` over the sampled densities
    pub avg_density_error: f32,
    /// Foam active counter
    pub active_foam: u32,
    /// Foam survivor counter
    pub survivor_foam: u32,
}

impl MonitorReport {
    /// Metrics log line, without the trailing newline.
    pub fn csv_line(&self) -> String {
        format!(
            "{},DensityError:{:.6},ActiveFoam:{},SurvivorFoam:{}",
            self.time.to_rfc3339_opts(SecondsFormat::Micros, true),
            self.avg_density_error,
            self.active_foam,
            self.survivor_foam
        )
    }
}

/// Periodic checker driven by host frame time
pub struct Monitor {
    settings: MonitorSettings,
    timer: f32,
    checks: u64,
}

impl Monitor {
    /// Create a monitor
    pub fn new(settings: MonitorSettings) -> Self {
        Self {
            settings,
            timer: 0.0,
            checks: 0,
        }
    }

    /// Number of checks performed
    pub fn checks(&self) -> u64 {
        self.checks
    }

    /// Advance the host clock by `elapsed` seconds and run a check when the
    /// interval has passed.
    pub fn tick<K: FluidKernel + ?Sized>(
        &mut self,
        elapsed: f32,
        kernel: &K,
    ) -> Result<Option<MonitorReport>, String> {
        if !self.settings.enabled {
            return Ok(None);
        }
        self.timer += elapsed;
        if self.timer < self.settings.check_interval {
            return Ok(None);
        }
        self.timer = 0.0;
        self.check(kernel).map(Some)
    }

    /// Run every check now and append the metrics line.
    pub fn check<K: FluidKernel + ?Sized>(&mut self, kernel: &K) -> Result<MonitorReport, String> {
        let mut issues = Vec::new();

        let last = kernel.dispatch_stats().last_substep();
        let dispatch_order_ok = last.is_empty() || dispatch_order_matches(last);
        if dispatch_order_ok {
            tracing::debug!("dispatch order OK");
        } else {
            tracing::error!(?last, "dispatch order mismatch");
            issues.push(format!("dispatch order mismatch: {last:?}"));
        }

        let snapshot = kernel.read_back().map_err(|e| e.to_string())?;
        let n = self.settings.sample_count;
        issues.extend(sample_vectors("positions", &snapshot.positions, n, None));
        issues.extend(sample_vectors("velocities", &snapshot.velocities, n, Some(VELOCITY_SOFT_CAP)));
        issues.extend(sample_vectors(
            "predicted positions",
            &snapshot.predicted_positions,
            n,
            None,
        ));

        let settings = kernel.settings();
        let (avg_density_error, density_issues) = density_error(
            &snapshot,
            settings.target_density,
            self.settings.permitted_deviation,
            n,
        );
        issues.extend(density_issues);

        let counters = snapshot.foam_counters;
        if counters.active > settings.foam.max_particles {
            let issue = format!(
                "active foam count {} exceeds capacity {}",
                counters.active, settings.foam.max_particles
            );
            tracing::warn!("{issue}");
            issues.push(issue);
        }
        tracing::debug!(
            active = counters.active,
            survivor = counters.survivor,
            "foam counters"
        );

        let report = MonitorReport {
            time: Utc::now(),
            dispatch_order_ok,
            issues,
            avg_density_error,
            active_foam: counters.active,
            survivor_foam: counters.survivor,
        };
        self.append_log(&report)?;
        self.checks += 1;
        Ok(report)
    }

    fn append_log(&self, report: &MonitorReport) -> Result<(), String> {
        let Some(path) = &self.settings.log_file else {
            return Ok(());
        };
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)
                .map_err(|e| format!("Failed to create log directory {}: {}", dir.display(), e))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| format!("Failed to open metrics log {}: {}", path.display(), e))?;
        writeln!(file, "{}", report.csv_line())
            .map_err(|e| format!("Failed to write metrics log {}: {}", path.display(), e))
    }
}

/// `true` if `last` is the substep program order, with or without the
/// viscosity pass.
pub fn dispatch_order_matches(last: &[KernelId]) -> bool {
    let full = KernelId::SUBSTEP_ORDER;
    if last == full.as_slice() {
        return true;
    }
    last.len() + 1 == full.len()
        && full
            .iter()
            .filter(|&&k| k != KernelId::Viscosity)
            .eq(last.iter())
}

/// Report the first non-finite (or, with `soft_cap`, too large) entry among
/// the first `sample_count` values.
fn sample_vectors(
    label: &str,
    values: &[Vec3],
    sample_count: usize,
    soft_cap: Option<f32>,
) -> Option<String> {
    for (i, v) in values.iter().take(sample_count).enumerate() {
        if !v.is_finite() {
            let issue = format!("non-finite value in {label} (index {i}): {v}");
            tracing::warn!("{issue}");
            return Some(issue);
        }
        if let Some(cap) = soft_cap {
            let magnitude = v.length();
            if magnitude > cap {
                let issue = format!("large magnitude {magnitude:.1} in {label} (index {i})");
                tracing::warn!("{issue}");
                return Some(issue);
            }
        }
    }
    None
}

fn density_error(
    snapshot: &FluidSnapshot,
    target: f32,
    permitted_deviation: f32,
    sample_count: usize,
) -> (f32, Vec<String>) {
    let sampled: Vec<f32> = snapshot
        .densities
        .iter()
        .take(sample_count)
        .map(|d| d.x)
        .collect();
    if sampled.is_empty() {
        return (0.0, Vec::new());
    }

    let permitted = target * permitted_deviation;
    let mut issues = Vec::new();
    let mut error_sum = 0.0;
    for (i, &density) in sampled.iter().enumerate() {
        let diff = (density - target).abs();
        error_sum += diff / density.max(1e-4);
        if diff > permitted {
            tracing::warn!(index = i, density, target, "density deviation above permitted");
            issues.push(format!("density {density:.2} at index {i} deviates from target {target:.2}"));
        }
    }
    (error_sum / sampled.len() as f32, issues)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use glam::Vec2;

    #[test]
    fn order_with_and_without_viscosity() {
        assert!(dispatch_order_matches(&KernelId::SUBSTEP_ORDER));
        let without: Vec<KernelId> = KernelId::SUBSTEP_ORDER
            .into_iter()
            .filter(|k| *k != KernelId::Viscosity)
            .collect();
        assert!(dispatch_order_matches(&without));

        let mut swapped = KernelId::SUBSTEP_ORDER.to_vec();
        swapped.swap(5, 6);
        assert!(!dispatch_order_matches(&swapped));
        assert!(!dispatch_order_matches(&KernelId::SUBSTEP_ORDER[..4]));
    }

    #[test]
    fn csv_line_format() {
        let report = MonitorReport {
            time: Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap(),
            dispatch_order_ok: true,
            issues: Vec::new(),
            avg_density_error: 0.125,
            active_foam: 12,
            survivor_foam: 3,
        };
        assert_eq!(
            report.csv_line(),
            "2026-01-02T03:04:05.000000Z,DensityError:0.125000,ActiveFoam:12,SurvivorFoam:3"
        );
    }

    #[test]
    fn sampling_flags_first_problem_only() {
        let values = [Vec3::ZERO, Vec3::new(300.0, 0.0, 0.0), Vec3::NAN];
        let issue = sample_vectors("velocities", &values, 16, Some(VELOCITY_SOFT_CAP)).unwrap();
        assert!(issue.contains("index 1"));
        assert!(sample_vectors("positions", &values, 2, None).is_none());
        assert!(sample_vectors("positions", &values, 3, None).unwrap().contains("index 2"));
    }

    #[test]
    fn density_error_is_normalised_by_actual_density() {
        let snapshot = FluidSnapshot {
            densities: vec![Vec2::new(500.0, 0.0), Vec2::new(1000.0, 0.0)],
            ..FluidSnapshot::default()
        };
        let (error, issues) = density_error(&snapshot, 1000.0, 0.05, 16);
        assert!((error - 0.5).abs() < 1e-6);
        assert_eq!(issues.len(), 1);
    }
}
