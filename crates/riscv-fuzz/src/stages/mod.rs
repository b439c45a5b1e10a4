//! Fuzzing Driver: drives the seven-step loop of §4.10 for one iteration,
//! grounded on the teacher's `stages::CoverageStage` shape (a thin `Stage`
//! over an already-instrumented executor) but replacing its "log coverage"
//! body with seed selection, mutation, execution, and corpus promotion.

use std::marker::PhantomData;

use libafl::{
    corpus::{Corpus, CorpusId, Testcase},
    events::{EventFirer, LogSeverity},
    executors::{Executor, HasObservers},
    inputs::UsesInput,
    mutators::{MutationResult, Mutator},
    observers::MapObserver,
    stages::Stage,
    state::{HasCorpus, HasExecutions, HasRand, State, UsesState},
};
use libafl_bolts::{
    rands::Rand,
    tuples::{Handle, Handled, MatchNameRef},
    Named,
};

use crate::inputs::SimulationInput;

/// Drives one Fuzzing Driver iteration: pick a corpus seed, mutate it with
/// `MT`, run it through the diff executor, and add the mutated input back to
/// the corpus iff it grew the running coverage union (step 6's "coverage
/// delta > 0" promotion rule, tracked here as a byte-union mirror of the
/// executor's own coverage observer since the Stage only sees it through
/// `HasObservers`, not the concrete executor type).
#[derive(Debug)]
pub struct FuzzingStage<MT, S, O, M> {
    mutators: MT,
    coverage_handle: Handle<O>,
    seen: Vec<u8>,
    /// When false (`--no-guide`), a coverage delta never promotes the
    /// mutated input back into the corpus: every iteration mutates off the
    /// same fixed seed pool instead of growing it.
    guided: bool,
    _state: PhantomData<S>,
    _map_observer: PhantomData<M>,
}

impl<MT, S, O, M> FuzzingStage<MT, S, O, M> {
    pub fn new(mutators: MT, coverage_observer: &O) -> Self
    where
        M: MapObserver,
        O: AsRef<M> + Named,
    {
        Self {
            mutators,
            coverage_handle: coverage_observer.handle(),
            seen: Vec::new(),
            guided: true,
            _state: PhantomData,
            _map_observer: PhantomData,
        }
    }

    pub fn with_guided(mut self, guided: bool) -> Self {
        self.guided = guided;
        self
    }
}

impl<MT, S, O, M, I> UsesState for FuzzingStage<MT, S, O, M>
where
    S: UsesInput<Input = I> + State,
{
    type State = S;
}

fn pick_seed<S>(state: &mut S) -> Result<CorpusId, libafl::Error>
where
    S: HasCorpus<SimulationInput> + HasRand,
{
    let ids: Vec<CorpusId> = state.corpus().ids().collect();
    if ids.is_empty() {
        return Err(libafl::Error::empty("corpus has no seeds to select from"));
    }
    let idx = state.rand_mut().below_or_zero(ids.len());
    Ok(ids[idx])
}

impl<E, EM, Z, S, MT, O, M> Stage<E, EM, Z> for FuzzingStage<MT, S, O, M>
where
    S: State + UsesInput<Input = SimulationInput> + HasCorpus<SimulationInput> + HasRand + HasExecutions,
    Self: UsesState<State = S>,
    E: UsesState<State = S> + HasObservers + Executor<EM, SimulationInput, S, Z>,
    <E as HasObservers>::Observers: MatchNameRef,
    EM: UsesState<State = S> + EventFirer,
    Z: UsesState<State = S>,
    MT: Mutator<SimulationInput, S>,
    M: MapObserver<Entry = u8>,
    O: AsRef<M> + Named,
{
    fn should_restart(&mut self, _state: &mut S) -> Result<bool, libafl::Error> {
        Ok(true)
    }

    fn clear_progress(&mut self, _state: &mut S) -> Result<(), libafl::Error> {
        Ok(())
    }

    fn perform(
        &mut self,
        fuzzer: &mut Z,
        executor: &mut E,
        state: &mut S,
        manager: &mut EM,
    ) -> Result<(), libafl::Error> {
        let seed_id = pick_seed(state)?;
        let mut input = {
            let mut testcase = state.corpus().get(seed_id)?.borrow_mut();
            testcase.load_input(state.corpus())?.clone()
        };

        if self.mutators.mutate(state, &mut input)? == MutationResult::Skipped {
            return Ok(());
        }

        let exit_kind = executor.run_target(fuzzer, state, manager, &input)?;
        *state.executions_mut() += 1;

        let observers = executor.observers();
        let coverage_observer = observers
            .get(&self.coverage_handle)
            .ok_or_else(|| libafl::Error::key_not_found("cannot find the RTL coverage observer"))?
            .as_ref();

        let delta = self.merge_coverage(coverage_observer);
        drop(observers);

        if self.guided && delta > 0 {
            state.corpus_mut().add(Testcase::new(input))?;
        }

        manager.log(
            state,
            LogSeverity::Debug,
            format!(
                "iteration {} produced {exit_kind:?}, {delta} new coverage byte(s)",
                *state.executions()
            ),
        )
    }
}

impl<MT, S, O, M> FuzzingStage<MT, S, O, M> {
    /// Unions a freshly observed coverage map into `self.seen` and returns
    /// how many previously-unset bytes were newly set, mirroring the Global
    /// Coverage Set's own "boolean union, report what's new" semantics at
    /// the per-iteration granularity this Stage needs for promotion.
    fn merge_coverage<Obs>(&mut self, observed: &Obs) -> usize
    where
        Obs: MapObserver<Entry = u8>,
    {
        if self.seen.len() < observed.len() {
            self.seen.resize(observed.len(), 0);
        }
        let mut delta = 0;
        for i in 0..observed.len() {
            let value = observed.get(i);
            if value != 0 && self.seen[i] == 0 {
                delta += 1;
            }
            self.seen[i] |= value;
        }
        delta
    }
}
