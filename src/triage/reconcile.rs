//! Ingestion reconciliation.
//!
//! The backend is counted before and after the shipper runs. The difference is what was
//! uploaded, and the shortfall against the line estimate is reported as failed. Because the
//! estimate counts lines rather than documents the shortfall can be negative; it is reported as
//! is.

use std::path::{Path, PathBuf};
use std::thread::sleep;
use std::time::{Duration, Instant};

use chrono::{DateTime, Local};
use indicatif::{ProgressBar, ProgressStyle};
use log::{error, info, warn};

use crate::triage::backend::{BackendResult, CountBackend};
use crate::triage::command::ShipmentPlan;
use crate::triage::shipper::ShipperRunner;

/// Upload figures for one triage directory.
#[derive(Debug, Clone)]
pub struct ReconciliationReport {
    pub triage_dir: PathBuf,
    pub index: String,
    pub started_at: DateTime<Local>,
    pub expected: u64,
    pub pre_run: u64,
    pub post_run: u64,
    pub uploaded: i64,
    pub failed: i64,
    pub elapsed: Duration,
    /// Whether the shipper started and exited successfully.
    pub shipper_succeeded: bool,
}

impl ReconciliationReport {
    /// Derives `uploaded = post - pre` and `failed = expected - uploaded`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        triage_dir: &Path,
        index: &str,
        started_at: DateTime<Local>,
        expected: u64,
        pre_run: u64,
        post_run: u64,
        elapsed: Duration,
        shipper_succeeded: bool,
    ) -> Self {
        let uploaded = post_run as i64 - pre_run as i64;
        let failed = expected as i64 - uploaded;
        Self {
            triage_dir: triage_dir.to_path_buf(),
            index: index.to_string(),
            started_at,
            expected,
            pre_run,
            post_run,
            uploaded,
            failed,
            elapsed,
            shipper_succeeded,
        }
    }

    pub fn log_summary(&self) {
        info!("Upload completed for {}!", self.triage_dir.display());
        info!("Run started at: {}", self.started_at.format("%Y-%m-%d %H:%M:%S"));
        info!("Total logs expected: {}", self.expected);
        info!("Total logs uploaded: {}", self.uploaded);
        info!("Total logs failed to upload: {}", self.failed);
        info!(
            "Total logs ingested in {} on the backend: {}",
            self.index, self.post_run
        );
        info!("Time elapsed: {}", format_elapsed(self.elapsed));
        if !self.shipper_succeeded {
            warn!("The shipper did not exit cleanly, figures may be incomplete");
        }
    }
}

/// Formats a duration as `1hr 2min 3.45s`, `2min 3.45s` or `3.45s`.
pub fn format_elapsed(elapsed: Duration) -> String {
    let t = elapsed.as_secs_f64();
    if t >= 59.0 * 60.0 {
        let hours = (t / 3600.0).floor();
        let minutes = ((t - hours * 3600.0) / 60.0).floor();
        let seconds = t - hours * 3600.0 - minutes * 60.0;
        format!("{}hr {}min {:.2}s", hours as u64, minutes as u64, seconds)
    } else if t >= 60.0 {
        let minutes = (t / 60.0).floor();
        let seconds = t - minutes * 60.0;
        format!("{}min {:.2}s", minutes as u64, seconds)
    } else {
        format!("{:.2}s", t)
    }
}

/// Drives one shipping run between two backend counts.
pub struct Reconciler<'a, B: CountBackend + ?Sized, S: ShipperRunner + ?Sized> {
    backend: &'a B,
    shipper: &'a S,
    settle: Duration,
}

impl<'a, B: CountBackend + ?Sized, S: ShipperRunner + ?Sized> Reconciler<'a, B, S> {
    pub fn new(backend: &'a B, shipper: &'a S, settle: Duration) -> Self {
        Self {
            backend,
            shipper,
            settle,
        }
    }

    fn wait_for_settle(&self) {
        if self.settle.is_zero() {
            return;
        }
        let spinner = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner} {msg}") {
            spinner.set_style(style);
        }
        spinner.set_message(format!(
            "Waiting {} for ingestion to settle...",
            format_elapsed(self.settle)
        ));
        spinner.enable_steady_tick(Duration::from_millis(120));
        sleep(self.settle);
        spinner.finish_and_clear();
    }

    /// Counts, runs the plan once, waits for the settle interval and counts again.
    ///
    /// A shipper failure is logged and the run still reconciles. Count failures are returned.
    pub fn reconcile(
        &self,
        triage_dir: &Path,
        index: &str,
        plan: &ShipmentPlan,
    ) -> BackendResult<ReconciliationReport> {
        let started_at = Local::now();
        let pre_run = self.backend.count(index)?;
        info!("Documents in {} before upload: {}", index, pre_run);

        info!("Uploading logs from \"{}\" to the shipper...", triage_dir.display());
        let start = Instant::now();
        let shipper_succeeded = match self.shipper.run(plan) {
            Ok(()) => true,
            Err(e) => {
                error!("{}", e);
                false
            }
        };

        self.wait_for_settle();
        let elapsed = start.elapsed();

        let post_run = self.backend.count(index)?;
        Ok(ReconciliationReport::new(
            triage_dir,
            index,
            started_at,
            plan.total_expected,
            pre_run,
            post_run,
            elapsed,
            shipper_succeeded,
        ))
    }
}
