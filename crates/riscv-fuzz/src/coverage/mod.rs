//! Global Coverage Set: merges per-iteration RTL coverage vectors into a
//! process-wide union, persisted to disk for multicore aggregation.

use std::path::PathBuf;

use anyhow::Context;
use serde::{Deserialize, Serialize};

const COVERAGE_DB_VERSION: &str = "1.0";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CoverageFile {
    version: String,
    bits: u64,
}

/// Tracks the boolean union of every RTL coverage vector seen since
/// startup. A vector is a bit-set over a fixed-width instrumentation
/// domain (`domain_bits` wide); `get_coverage_score` reports the fraction
/// of that domain ever set, not just the fraction of distinct addresses
/// observed.
#[derive(Debug)]
pub struct CoverageTracker {
    out_dir: PathBuf,
    multicore: bool,
    domain_bits: u32,
    bits: u64,
}

impl CoverageTracker {
    pub fn new(out_dir: impl Into<PathBuf>, multicore: bool, domain_bits: u32) -> Self {
        Self { out_dir: out_dir.into(), multicore, domain_bits, bits: 0 }
    }

    /// Boolean-unions one run's coverage vector into the global set.
    /// Never clears a bit, so the union is monotone across iterations.
    pub fn update_from_rtl(&mut self, rtl_coverage: u64) {
        self.bits |= rtl_coverage;
    }

    pub fn bits(&self) -> u64 {
        self.bits
    }

    /// Reads a worker's on-disk coverage file, unions it into the global
    /// set, and writes the global set back. A missing or corrupt file is
    /// skipped: coverage merges are best-effort, never fatal to the run.
    pub fn aggregate_multicore(&mut self, worker_id: u32) -> anyhow::Result<()> {
        if !self.multicore {
            return Ok(());
        }
        let worker_path = self.out_dir.join(format!("covmap-{worker_id}")).join("coverage.json");
        let Ok(contents) = std::fs::read_to_string(&worker_path) else { return Ok(()) };
        let Ok(worker_file) = serde_json::from_str::<CoverageFile>(&contents) else {
            tracing::warn!(worker_id, path = %worker_path.display(), "skipping corrupt per-worker coverage file");
            return Ok(());
        };
        self.update_from_rtl(worker_file.bits);

        let global_dir = self.out_dir.join("coverage");
        std::fs::create_dir_all(&global_dir).context("creating global coverage directory")?;
        let global_path = global_dir.join("global_coverage.json");
        let serialized = serde_json::to_string(&CoverageFile { version: COVERAGE_DB_VERSION.to_owned(), bits: self.bits })
            .context("serializing global coverage")?;
        std::fs::write(&global_path, serialized).context("writing global coverage file")?;
        Ok(())
    }

    /// Percentage of the tracked domain ever set.
    pub fn get_coverage_score(&self) -> f64 {
        if self.domain_bits == 0 {
            return 0.0;
        }
        (self.bits.count_ones() as f64 / self.domain_bits as f64) * 100.0
    }

    /// Persists this worker's coverage state for a later aggregation pass.
    pub fn save_coverage(&self, worker_id: u32) -> anyhow::Result<()> {
        if !self.multicore {
            return Ok(());
        }
        let cov_dir = self.out_dir.join(format!("covmap-{worker_id}"));
        std::fs::create_dir_all(&cov_dir).context("creating worker coverage directory")?;
        let serialized = serde_json::to_string(&CoverageFile { version: COVERAGE_DB_VERSION.to_owned(), bits: self.bits })
            .context("serializing worker coverage")?;
        std::fs::write(cov_dir.join("coverage.json"), serialized).context("writing worker coverage file")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn union_never_loses_a_previously_set_bit() {
        let mut tracker = CoverageTracker::new("/tmp/unused", false, 64);
        tracker.update_from_rtl(0b1010);
        tracker.update_from_rtl(0b0001);
        assert_eq!(tracker.bits(), 0b1011);
        tracker.update_from_rtl(0);
        assert_eq!(tracker.bits(), 0b1011, "a later run with no new bits must not clear earlier ones");
    }

    #[test]
    fn coverage_score_is_a_fraction_of_the_tracked_domain() {
        let mut tracker = CoverageTracker::new("/tmp/unused", false, 8);
        tracker.update_from_rtl(0b0000_0011);
        assert_eq!(tracker.get_coverage_score(), 25.0);
    }

    #[test]
    fn aggregate_multicore_merges_and_writes_back() {
        let dir = tempfile::tempdir().unwrap();
        let worker_dir = dir.path().join("covmap-3");
        std::fs::create_dir_all(&worker_dir).unwrap();
        std::fs::write(
            worker_dir.join("coverage.json"),
            r#"{"version":"1.0","bits":5}"#,
        )
        .unwrap();

        let mut tracker = CoverageTracker::new(dir.path(), true, 64);
        tracker.update_from_rtl(2);
        tracker.aggregate_multicore(3).unwrap();
        assert_eq!(tracker.bits(), 7);

        let global = std::fs::read_to_string(dir.path().join("coverage").join("global_coverage.json")).unwrap();
        assert!(global.contains("\"bits\":7"));
    }

    #[test]
    fn aggregate_multicore_skips_a_missing_worker_file() {
        let dir = tempfile::tempdir().unwrap();
        let mut tracker = CoverageTracker::new(dir.path(), true, 64);
        tracker.update_from_rtl(9);
        tracker.aggregate_multicore(0).unwrap();
        assert_eq!(tracker.bits(), 9);
    }

    #[test]
    fn save_coverage_is_a_no_op_without_multicore() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = CoverageTracker::new(dir.path(), false, 64);
        tracker.save_coverage(0).unwrap();
        assert!(!dir.path().join("covmap-0").exists());
    }
}
