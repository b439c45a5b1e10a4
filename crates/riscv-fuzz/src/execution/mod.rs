//! Diff Executor: drives one fuzzing iteration through
//! Preprocessor → ISA Runner → RTL Runner → Trace Comparator, the way the
//! original fork-server executor drove one iteration through the target
//! binary, and reports the libafl-visible outcome.

pub mod comparator;
pub mod isa_runner;
pub mod rtl_runner;
pub mod tile_adapter;

use std::marker::PhantomData;
use std::mem::transmute;
use std::path::{Path, PathBuf};

use libafl::{
    HasMetadata,
    executors::{Executor, ExitKind, HasObservers},
    observers::{Observer, ObserversTuple, StdMapObserver},
    state::HasExecutions,
};
use libafl_bolts::{
    Named,
    tuples::{MatchName, RefIndexable, type_eq},
};
use tracing::{info, warn};

use crate::bugs::BugRecorder;
use crate::coverage::CoverageTracker;
use crate::data_pool::DataPool;
use crate::inputs::SimulationInput;
use crate::preprocessor::{PreprocessError, Preprocessor};
use crate::status::IterationStatus;

use self::comparator::compare;
use self::isa_runner::{IsaRunOutcome, IsaRunner};
use self::rtl_runner::{RtlModel, RtlRunner};

/// Width of the coverage bitmap handed to libafl's `MaxMapFeedback`, one
/// byte per tracked `cov_sum` bit.
pub const COVERAGE_MAP_SIZE: usize = 64;

/// The single coverage observer this executor drives, boxed so the map it
/// points into outlives every borrow libafl takes of the observer.
#[derive(Debug)]
pub struct DiffObservers {
    coverage: StdMapObserver<'static, u8, false>,
    map: Box<[u8; COVERAGE_MAP_SIZE]>,
}

impl DiffObservers {
    pub fn new() -> Self {
        let mut map = Box::new([0u8; COVERAGE_MAP_SIZE]);
        // Safety: `map` is heap-allocated and owned by this struct for its
        // whole lifetime; the observer borrowing it never outlives `self`.
        let coverage = unsafe {
            let slice: &'static mut [u8] = std::slice::from_raw_parts_mut(map.as_mut_ptr(), COVERAGE_MAP_SIZE);
            StdMapObserver::new("rtl_coverage", slice)
        };
        Self { coverage, map }
    }

    fn record(&mut self, bits: u64) {
        for (i, byte) in self.map.iter_mut().enumerate() {
            *byte = u8::from((bits >> i) & 1 != 0);
        }
    }
}

impl Default for DiffObservers {
    fn default() -> Self {
        Self::new()
    }
}

impl MatchName for DiffObservers {
    fn match_name<T>(&self, name: &str) -> Option<&T> {
        if type_eq::<T, StdMapObserver<'static, u8, false>>() && self.coverage.name() == name {
            Some(unsafe { transmute::<&StdMapObserver<'static, u8, false>, &T>(&self.coverage) })
        } else {
            None
        }
    }

    fn match_name_mut<T>(&mut self, name: &str) -> Option<&mut T> {
        if type_eq::<T, StdMapObserver<'static, u8, false>>() && self.coverage.name() == name {
            Some(unsafe { transmute::<&mut StdMapObserver<'static, u8, false>, &mut T>(&mut self.coverage) })
        } else {
            None
        }
    }
}

impl<I, State> ObserversTuple<I, State> for DiffObservers
where
    StdMapObserver<'static, u8, false>: Observer<I, State>,
{
    fn pre_exec_all(&mut self, state: &mut State, input: &I) -> Result<(), libafl::Error> {
        self.coverage.pre_exec(state, input)
    }

    fn post_exec_all(&mut self, state: &mut State, input: &I, exit_kind: &ExitKind) -> Result<(), libafl::Error> {
        self.coverage.post_exec(state, input, exit_kind)
    }

    fn pre_exec_child_all(&mut self, state: &mut State, input: &I) -> Result<(), libafl::Error> {
        self.coverage.pre_exec_child(state, input)
    }

    fn post_exec_child_all(&mut self, state: &mut State, input: &I, exit_kind: &ExitKind) -> Result<(), libafl::Error> {
        self.coverage.post_exec_child(state, input, exit_kind)
    }
}

#[derive(Debug)]
pub enum IterationOutcome {
    InvalidInput,
    CompileBroken,
    IsaFailed,
    RtlFailed { coverage: u64 },
    Success { coverage: u64 },
    Divergence { coverage: u64, bug_dir: PathBuf },
}

impl IterationOutcome {
    /// `Divergence` is libafl's notion of a "crash": the objective feedback
    /// promotes it into the solutions corpus, separately from the bug copy
    /// this module already wrote under `out/bugs/`. A broken-pipeline
    /// iteration (invalid input, compile failure, ISA crash) is reported as
    /// `Oom` so it's neither "interesting" nor treated as the product this
    /// system is actually looking for.
    pub fn exit_kind(&self) -> ExitKind {
        match self {
            Self::Divergence { .. } => ExitKind::Crash,
            Self::InvalidInput | Self::CompileBroken | Self::IsaFailed => ExitKind::Oom,
            Self::RtlFailed { .. } | Self::Success { .. } => ExitKind::Ok,
        }
    }
}

/// Everything the Diff Executor needs to drive one iteration end to end:
/// the backing data for the SI's data sections, the compile/link pipeline,
/// the two runners, and where bugs persist.
pub struct DiffExecutor<M> {
    data_pool: DataPool,
    preprocessor: Preprocessor,
    isa_runner: IsaRunner,
    model: M,
    bug_recorder: BugRecorder,
    toplevel: String,
    work_root: PathBuf,
    iteration: u64,
    observers: DiffObservers,
    coverage_tracker: CoverageTracker,
    _phantom: PhantomData<()>,
}

impl<M: RtlModel> DiffExecutor<M> {
    pub fn new(
        data_pool: DataPool,
        preprocessor: Preprocessor,
        isa_runner: IsaRunner,
        model: M,
        bug_recorder: BugRecorder,
        toplevel: impl Into<String>,
        work_root: impl Into<PathBuf>,
        coverage_tracker: CoverageTracker,
    ) -> Self {
        Self {
            data_pool,
            preprocessor,
            isa_runner,
            model,
            bug_recorder,
            toplevel: toplevel.into(),
            work_root: work_root.into(),
            iteration: 0,
            observers: DiffObservers::new(),
            coverage_tracker,
            _phantom: PhantomData,
        }
    }

    pub fn coverage_tracker(&self) -> &CoverageTracker {
        &self.coverage_tracker
    }

    pub fn coverage_tracker_mut(&mut self) -> &mut CoverageTracker {
        &mut self.coverage_tracker
    }

    /// The coverage observer this executor drives, exposed so a CLI can
    /// build a `MaxMapFeedback`/`FuzzingStage` over it before handing the
    /// executor to `StdFuzzer::fuzz_loop`.
    pub fn coverage_observer(&self) -> &StdMapObserver<'static, u8, false> {
        &self.observers.coverage
    }

    /// Runs the Fuzzing Driver's steps 2-5 for one `SimulationInput`:
    /// preprocess, run the ISA simulator, run the RTL model, and (when the
    /// RTL model captured a trace) compare. Folds the RTL coverage vector
    /// into the running coverage tracker regardless of outcome, matching
    /// "update coverage only" on an RTL failure.
    pub fn run_iteration<R: libafl_bolts::rands::Rand>(
        &mut self,
        rand: &mut R,
        input: &SimulationInput,
        has_interrupt: bool,
    ) -> anyhow::Result<IterationOutcome> {
        self.iteration += 1;
        let iteration = self.iteration;
        let work_dir = self.work_root.join(iteration.to_string());
        std::fs::create_dir_all(&work_dir)?;

        let Some(data) = self.data_pool.get(input.data_seed).map(<[u64]>::to_vec) else {
            return Ok(IterationOutcome::InvalidInput);
        };

        let (isa_input, rtl_input, symbols) =
            match self.preprocessor.process(rand, input, &data, has_interrupt, &work_dir, None) {
                Ok(plans) => plans,
                Err(PreprocessError::InvalidInput(msg)) => {
                    warn!(iteration, %msg, "invalid simulation input, skipping");
                    return Ok(IterationOutcome::InvalidInput);
                }
                Err(PreprocessError::CompileBroken(msg)) => {
                    warn!(iteration, %msg, "compile broken, skipping");
                    return Ok(IterationOutcome::CompileBroken);
                }
            };

        let (isa_outcome, isa_trace) = self.isa_runner.run_test(&isa_input, &work_dir)?;
        let isa_status = match isa_outcome {
            IsaRunOutcome::Status(status) => status,
            IsaRunOutcome::Crash(code) => {
                warn!(iteration, code, "ISA simulator crashed");
                return Ok(IterationOutcome::IsaFailed);
            }
        };
        if isa_status != IterationStatus::Success {
            return Ok(IterationOutcome::IsaFailed);
        }
        let isa_trace = isa_trace.expect("ISA Success status always produces a trace");

        let rtl_result = RtlRunner::run_test(&mut self.model, &rtl_input, iteration, &symbols, &work_dir)?;
        self.coverage_tracker.update_from_rtl(rtl_result.coverage);
        self.observers.record(rtl_result.coverage);

        if rtl_result.status != IterationStatus::Success {
            return Ok(IterationOutcome::RtlFailed { coverage: rtl_result.coverage });
        }

        let Some(rtl_trace) = rtl_result.trace_path.as_deref() else {
            info!(iteration, "RTL model produced no commit trace, skipping comparison");
            return Ok(IterationOutcome::Success { coverage: rtl_result.coverage });
        };

        if self.compare_traces(&isa_trace, rtl_trace) {
            let dir = self.bug_recorder.record(iteration, input, &data, &isa_trace, rtl_trace, &symbols)?;
            warn!(iteration, dir = %dir.display(), "trace divergence recorded");
            return Ok(IterationOutcome::Divergence { coverage: rtl_result.coverage, bug_dir: dir });
        }

        Ok(IterationOutcome::Success { coverage: rtl_result.coverage })
    }

    fn compare_traces(&self, isa_trace: &Path, rtl_trace: &Path) -> bool {
        let isa_csv = std::fs::read_to_string(isa_trace).unwrap_or_default();
        let rtl_log = std::fs::read_to_string(rtl_trace).unwrap_or_default();
        compare(&isa_csv, &rtl_log, &self.toplevel) == -1
    }
}

impl<M> HasObservers for DiffExecutor<M> {
    type Observers = DiffObservers;

    fn observers(&self) -> RefIndexable<&Self::Observers, Self::Observers> {
        RefIndexable::from(&self.observers)
    }

    fn observers_mut(&mut self) -> RefIndexable<&mut Self::Observers, Self::Observers> {
        RefIndexable::from(&mut self.observers)
    }
}

impl<EM, Z, State, M> Executor<EM, SimulationInput, State, Z> for DiffExecutor<M>
where
    State: HasExecutions + HasMetadata + libafl::state::HasRand,
    M: RtlModel,
{
    fn run_target(
        &mut self,
        _fuzzer: &mut Z,
        state: &mut State,
        _mgr: &mut EM,
        input: &SimulationInput,
    ) -> Result<ExitKind, libafl::Error> {
        let mut rand = state.rand_mut().clone();
        let outcome = self
            .run_iteration(&mut rand, input, false)
            .map_err(|e| libafl::Error::unknown(e.to_string()))?;
        *state.executions_mut() += 1;
        Ok(outcome.exit_kind())
    }
}
