use std::path::PathBuf;

use anyhow::Context;
use riscv_fuzz::execution::comparator::compare;
use riscv_fuzz::execution::isa_runner::IsaRunner;
use riscv_fuzz::execution::rtl_runner::{FakeModel, RtlRunner};
use riscv_fuzz::inputs::SimulationInput;
use riscv_fuzz::preprocessor::{Preprocessor, PreprocessorOptions};
use tracing::info;

use super::GlobalOptions;

/// Re-runs a single recorded bug directory (as written by `BugRecorder`)
/// through the Preprocessor, ISA Runner, and RTL Runner to confirm the
/// divergence still reproduces.
#[derive(Debug, clap::Parser)]
pub(super) struct ReproduceCommand {
    /// Directory written by `BugRecorder::record`, containing `si.bin`.
    #[clap(long, short)]
    bug_dir: PathBuf,

    /// Directory containing the `rv64-<tag>.S` templates and `include/link.ld`.
    #[clap(long)]
    template_dir: PathBuf,

    /// Path to the reference ISA simulator executable.
    #[clap(long)]
    isa_simulator: PathBuf,

    /// Label for the RTL design under test.
    #[clap(long, default_value = "riscv-core")]
    toplevel: String,
}

impl ReproduceCommand {
    pub(super) fn run(self, _global_options: GlobalOptions) -> anyhow::Result<()> {
        let si_path = self.bug_dir.join("si.bin");
        let file = std::fs::File::open(&si_path).with_context(|| format!("opening {}", si_path.display()))?;
        let (si, data): (SimulationInput, Vec<u64>) =
            SimulationInput::load(std::io::BufReader::new(file)).context("decoding si.bin")?;

        let template_dir: &'static std::path::Path = Box::leak(self.template_dir.into_boxed_path());
        let preprocessor = Preprocessor::new(PreprocessorOptions {
            template_dir,
            num_data_sections: riscv_fuzz_isa::N_DATA_SECTIONS,
        });

        let work_dir = tempfile::tempdir().context("creating scratch working directory")?;
        let has_interrupt = si.ints.iter().any(|&cause| cause != 0);
        let mut rand = libafl_bolts::rands::StdRand::with_seed(si.data_seed);
        let (isa_input, rtl_input, symbols) = preprocessor
            .process(&mut rand, &si, &data, has_interrupt, work_dir.path(), None)
            .context("reprocessing the recorded input")?;

        let isa_runner = IsaRunner::new(self.isa_simulator);
        let (_, isa_trace) = isa_runner.run_test(&isa_input, work_dir.path()).context("running the ISA simulator")?;
        let isa_trace = isa_trace.context("ISA run did not produce a trace")?;

        let mut model = FakeModel::default();
        let rtl_result =
            RtlRunner::run_test(&mut model, &rtl_input, 0, &symbols, work_dir.path()).context("running the RTL model")?;

        let Some(rtl_trace) = rtl_result.trace_path else {
            info!("RTL model produced no commit trace; cannot compare without a real kernel");
            return Ok(());
        };

        let isa_csv = std::fs::read_to_string(&isa_trace).context("reading ISA trace")?;
        let rtl_log = std::fs::read_to_string(&rtl_trace).context("reading RTL trace")?;
        let result = compare(&isa_csv, &rtl_log, &self.toplevel);

        if result == -1 {
            info!(bug_dir = %self.bug_dir.display(), "divergence reproduced");
        } else {
            info!(bug_dir = %self.bug_dir.display(), "no divergence on this run");
        }
        Ok(())
    }
}
