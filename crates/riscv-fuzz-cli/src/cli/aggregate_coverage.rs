use std::path::PathBuf;

use anyhow::Context;
use riscv_fuzz::coverage::CoverageTracker;
use tracing::info;

use super::GlobalOptions;

/// Merges the per-worker coverage files a multicore `fuzz` run left under
/// `--out`, the way a standalone invocation would be used after the fact to
/// re-derive the combined score without re-running any workers.
#[derive(Debug, clap::Parser)]
pub(super) struct AggregateCoverageCommand {
    /// Directory a `fuzz --multicore` run was pointed at.
    #[clap(long)]
    out: PathBuf,

    /// Number of workers that ran, i.e. the `--multicore` value used.
    #[clap(long)]
    workers: u32,

    /// Width, in 64-bit words, of the fuzzed data pool entries; must match
    /// the `--max-data` the workers ran with.
    #[clap(long, default_value_t = 6 * 64)]
    max_data: usize,
}

impl AggregateCoverageCommand {
    pub(super) fn run(self, _global_options: GlobalOptions) -> anyhow::Result<()> {
        let mut tracker = CoverageTracker::new(&self.out, true, (self.max_data * 64) as u32);
        for worker_id in 0..self.workers {
            tracker
                .aggregate_multicore(worker_id)
                .with_context(|| format!("aggregating worker {worker_id}"))?;
        }
        info!(score = tracker.get_coverage_score(), workers = self.workers, "aggregated coverage");
        Ok(())
    }
}
