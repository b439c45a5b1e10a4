use std::path::{Path, PathBuf};

use anyhow::Context;
use libafl::{
    Fuzzer, StdFuzzer,
    corpus::{Corpus, InMemoryCorpus, OnDiskCorpus},
    events::SimpleEventManager,
    feedback_or,
    feedbacks::{CrashFeedback, MaxMapFeedback},
    monitors::SimpleMonitor,
    schedulers::QueueScheduler,
    state::StdState,
};
use libafl_bolts::{current_nanos, rands::StdRand};
use tuple_list::tuple_list;
use riscv_fuzz::{
    bugs::BugRecorder,
    corpus::{TestCaseFileNameFeedback, corpus_kind::CORPUS},
    coverage::CoverageTracker,
    data_pool::DataPool,
    execution::{DiffExecutor, rtl_runner::FakeModel},
    inputs::SimulationInput,
    mutators::{InterruptToggleMutator, MainWordRegenerateMutator, ShortCurcuitMutator},
    preprocessor::{Preprocessor, PreprocessorOptions},
    stages::FuzzingStage,
    word::populate_word,
};
use riscv_fuzz_isa::{N_DATA_SECTIONS, Segment, Template};
use tracing::{info, warn};

use super::GlobalOptions;

const ALL_TEMPLATES: [Template; 4] = [Template::PM, Template::PS, Template::PU, Template::VU];

/// Runs the Fuzzing Driver loop (§4.10) against a template directory and a
/// reference ISA simulator, optionally fanning out across `--multicore`
/// sibling worker processes.
#[derive(Debug, clap::Parser)]
pub(super) struct FuzzCommand {
    /// Directory the per-iteration output and bug reports are written to.
    #[clap(long)]
    out: PathBuf,

    /// Label for the RTL design under test, threaded through into
    /// divergence reports by the Trace Comparator.
    #[clap(long, default_value = "riscv-core")]
    toplevel: String,

    /// Number of iterations to run.
    #[clap(long, default_value_t = 10_000)]
    num_iter: u64,

    /// Maximum number of corpus entries and data-pool seeds retained,
    /// oldest evicted first.
    #[clap(long, default_value_t = 256)]
    corpus_size: usize,

    /// Width, in 64-bit words, of each data-pool entry. Must be divisible
    /// by the number of data sections every template expects.
    #[clap(long, default_value_t = 6 * 64)]
    max_data: usize,

    /// Number of sibling worker processes to fan out across. Omitted or 0
    /// runs a single in-process worker.
    #[clap(long)]
    multicore: Option<usize>,

    /// Disables coverage-guided corpus promotion: every mutated input is
    /// discarded after the run instead of being added back on a coverage
    /// delta, turning this into blind random testing.
    #[clap(long)]
    no_guide: bool,

    /// Raises the log level to debug regardless of `--default-log-level`.
    #[clap(long)]
    debug: bool,

    /// Directory containing the `rv64-<tag>.S` templates and `include/link.ld`.
    #[clap(long)]
    template_dir: PathBuf,

    /// Path to the reference ISA simulator executable.
    #[clap(long)]
    isa_simulator: PathBuf,

    /// Internal: identifies this process as one spawned worker. Not meant
    /// to be passed by hand.
    #[clap(long, hide = true)]
    worker_id: Option<u32>,
}

impl FuzzCommand {
    pub(super) fn run(self, global_options: GlobalOptions) -> anyhow::Result<()> {
        if self.debug {
            tracing::info!("debug logging requested via --debug");
        }

        let Some(workers) = self.multicore.filter(|&n| n > 1) else {
            return self.run_one_worker(0, global_options.random_seed);
        };

        if self.worker_id.is_some() {
            return self.run_one_worker(self.worker_id.unwrap(), global_options.random_seed);
        }

        info!(workers, "spawning sibling fuzz worker processes");
        let exe = std::env::current_exe().context("resolving current executable for worker spawn")?;
        let mut children = Vec::with_capacity(workers);
        for worker_id in 0..workers {
            let mut args = std::env::args_os().skip(1).collect::<Vec<_>>();
            args.push("--worker-id".into());
            args.push(worker_id.to_string().into());
            let child = std::process::Command::new(&exe)
                .args(args)
                .spawn()
                .with_context(|| format!("spawning worker {worker_id}"))?;
            children.push(child);
        }
        for (worker_id, mut child) in children.into_iter().enumerate() {
            let status = child.wait().with_context(|| format!("waiting for worker {worker_id}"))?;
            if !status.success() {
                warn!(worker_id, ?status, "worker exited non-zero");
            }
        }

        let mut tracker = CoverageTracker::new(&self.out, true, (self.max_data * 64) as u32);
        for worker_id in 0..workers {
            tracker.aggregate_multicore(worker_id as u32)?;
        }
        info!(score = tracker.get_coverage_score(), "final aggregated coverage");
        Ok(())
    }

    fn run_one_worker(self, worker_id: u32, random_seed: Option<u64>) -> anyhow::Result<()> {
        let template_dir: &'static Path = Box::leak(self.template_dir.clone().into_boxed_path());
        let num_data_sections = N_DATA_SECTIONS;

        if self.max_data % num_data_sections != 0 {
            anyhow::bail!("--max-data must be divisible by {num_data_sections}");
        }

        let preprocessor = Preprocessor::new(PreprocessorOptions { template_dir, num_data_sections });
        let isa_runner = riscv_fuzz::execution::isa_runner::IsaRunner::new(self.isa_simulator.clone());
        let bug_recorder = BugRecorder::new(self.out.join("bugs"));
        let work_root = self.out.join(format!("work-{worker_id}"));
        std::fs::create_dir_all(&work_root).context("creating per-worker working directory")?;
        let coverage_tracker = CoverageTracker::new(&self.out, self.multicore.is_some(), (self.max_data * 64) as u32);

        let mut data_pool = DataPool::new(self.corpus_size, self.max_data);
        let random_seed = random_seed.unwrap_or_else(current_nanos);
        let mut rand = StdRand::with_seed(random_seed.wrapping_add(u64::from(worker_id)));
        for _ in 0..self.corpus_size.min(16) {
            data_pool.add_data(&mut rand);
        }

        let mut executor = DiffExecutor::new(
            data_pool,
            preprocessor,
            isa_runner,
            FakeModel::default(),
            bug_recorder,
            self.toplevel.clone(),
            work_root,
            coverage_tracker,
        );

        let mut feedback = feedback_or!(MaxMapFeedback::new(executor.coverage_observer()), TestCaseFileNameFeedback::<CORPUS>::new());
        let mut objective = CrashFeedback::new();

        let corpus = InMemoryCorpus::<SimulationInput>::new();
        let solutions_dir = self.out.join("bugs").join("solutions");
        let solutions = OnDiskCorpus::new(solutions_dir).context("creating solutions corpus")?;

        let mut state = StdState::new(rand, corpus, solutions, &mut feedback, &mut objective)
            .context("creating fuzzer state")?;

        for seed in initial_seeds(worker_id) {
            state.corpus_mut().add(libafl::corpus::Testcase::new(seed))?;
        }

        let mutators = ShortCurcuitMutator::new(tuple_list!(MainWordRegenerateMutator, InterruptToggleMutator));
        let stage = FuzzingStage::new(mutators, executor.coverage_observer()).with_guided(!self.no_guide);
        let mut stages = tuple_list!(stage);

        let mut fuzzer = StdFuzzer::new(QueueScheduler::new(), feedback, objective);
        let monitor = SimpleMonitor::with_user_monitor(|msg| info!("{msg}"));
        let mut event_manager = SimpleEventManager::new(monitor);

        info!(worker_id, num_iter = self.num_iter, "starting fuzzing loop");
        if self.no_guide {
            info!("--no-guide set: corpus never grows, every iteration mutates off the fixed initial seed pool");
        }

        for _ in 0..self.num_iter {
            fuzzer
                .fuzz_one(&mut stages, &mut executor, &mut state, &mut event_manager)
                .context("running one fuzzing iteration")?;
        }

        executor.coverage_tracker().save_coverage(worker_id).context("saving worker coverage")?;
        info!(score = executor.coverage_tracker().get_coverage_score(), "worker coverage score");
        Ok(())
    }
}

/// One minimal seed per template tag so the corpus is never empty on a
/// fresh run, the way the original always had at least one hand-written
/// `.S` per template to start mutating from.
fn initial_seeds(worker_id: u32) -> Vec<SimulationInput> {
    ALL_TEMPLATES
        .iter()
        .map(|&template| {
            let mut rand = StdRand::with_seed(u64::from(worker_id) * 7919 + template as u64);
            let family = &riscv_fuzz_isa::families(Segment::Main)[0];
            let word = populate_word(&mut rand, family, 0, N_DATA_SECTIONS);
            let ints = vec![0u8; word.len_insts()];
            SimulationInput {
                template,
                data_seed: 0,
                prefix: vec![],
                words: vec![word],
                suffix: vec![],
                ints,
                name_suffix: String::new(),
            }
        })
        .collect()
}
