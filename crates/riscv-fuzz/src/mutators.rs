use std::{borrow::Cow, collections::BTreeSet, marker::PhantomData, num::NonZero, sync::OnceLock};

use derive_new::new as New;
use libafl::{
    mutators::{ComposedByMutations, MutationResult, Mutator, MutatorsTuple},
    state::HasRand,
};
use libafl_bolts::{Named, rands::Rand};
use riscv_fuzz_isa::Segment;

use crate::inputs::SimulationInput;
use crate::word::get_word;

#[derive(Debug, New)]
pub struct ShortCurcuitMutator<I, MT, State> {
    mutators: MT,
    _phantom: PhantomData<(I, State)>,
}

impl<I, MT, State> Named for ShortCurcuitMutator<I, MT, State> {
    fn name(&self) -> &Cow<'static, str> {
        static NAME: Cow<'static, str> = Cow::Borrowed("ShortCurcuitMutator");
        &NAME
    }
}

impl<I, MT, State> ComposedByMutations for ShortCurcuitMutator<I, MT, State> {
    type Mutations = MT;

    fn mutations(&self) -> &Self::Mutations {
        &self.mutators
    }

    fn mutations_mut(&mut self) -> &mut Self::Mutations {
        &mut self.mutators
    }
}

impl<I, MT, State> Mutator<I, State> for ShortCurcuitMutator<I, MT, State>
where
    I: Clone,
    MT: MutatorsTuple<I, State>,
    State: HasRand,
{
    fn mutate(
        &mut self,
        state: &mut State,
        input: &mut I,
    ) -> Result<MutationResult, libafl::Error> {
        let mut rand = state.rand_mut();
        let mut mutator_idx: BTreeSet<_> = (0..self.mutators.len()).collect();
        while let Some(&idx) = rand.choose(mutator_idx.iter()) {
            mutator_idx.remove(&idx);
            match self.mutators.get_and_mutate(idx.into(), state, input)? {
                MutationResult::Mutated => return Ok(MutationResult::Mutated),
                MutationResult::Skipped => rand = state.rand_mut(),
            }
        }
        Ok(MutationResult::Skipped)
    }
}

#[derive(Debug, New)]
pub struct SliceSwapMutator<T, State> {
    _item: PhantomData<T>,
    _state: PhantomData<State>,
}

impl<State, T> Named for SliceSwapMutator<T, State> {
    fn name(&self) -> &Cow<'static, str> {
        static NAME: Cow<'static, str> = Cow::Borrowed("SliceSwapMutator");
        &NAME
    }
}

impl<I, T, State> Mutator<I, State> for SliceSwapMutator<T, State>
where
    I: AsMut<[T]>,
    State: HasRand,
{
    fn mutate(
        &mut self,
        state: &mut State,
        input: &mut I,
    ) -> Result<MutationResult, libafl::Error> {
        let input = input.as_mut();
        let len = input.len();
        if len < 2 {
            return Ok(MutationResult::Skipped);
        }
        // Safety: We just checked that len >= 2
        let len = unsafe { NonZero::new_unchecked(len) };
        let rand = state.rand_mut();
        let idx1 = rand.below(len);
        let idx2 = rand.below(len);
        input.swap(idx1, idx2);
        Ok(MutationResult::Mutated)
    }
}

/// Replaces one random `MAIN`-segment Word with a freshly generated one,
/// leaving every other Word and `ints` untouched. The replaced Word's label
/// range is bounded to the segment's own length, matching `populate_word`'s
/// "never jumps into another segment" invariant.
#[derive(Debug, Default)]
pub struct MainWordRegenerateMutator;

impl Named for MainWordRegenerateMutator {
    fn name(&self) -> &Cow<'static, str> {
        static NAME: Cow<'static, str> = Cow::Borrowed("MainWordRegenerateMutator");
        &NAME
    }
}

impl<State> Mutator<SimulationInput, State> for MainWordRegenerateMutator
where
    State: HasRand,
{
    fn mutate(&mut self, state: &mut State, input: &mut SimulationInput) -> Result<MutationResult, libafl::Error> {
        Ok(regenerate_main_word(state.rand_mut(), input))
    }
}

/// The `MainWordRegenerateMutator` logic, pulled out of the `Mutator`
/// plumbing so it's directly testable against any `Rand`.
fn regenerate_main_word<R: Rand>(rand: &mut R, input: &mut SimulationInput) -> MutationResult {
    if input.words.is_empty() {
        return MutationResult::Skipped;
    }
    let max_label = (input.words.len() - 1) as u32;
    let idx = rand.below_or_zero(input.words.len());
    input.words[idx] = get_word(rand, Segment::Main, max_label, riscv_fuzz_isa::N_DATA_SECTIONS);
    MutationResult::Mutated
}

/// Flips one `ints[k]` entry to a fresh 4-bit cause code (0 clears the
/// interrupt at that slot). Length never changes, so the `|ints| ==
/// total_insts` invariant is preserved by construction.
#[derive(Debug, Default)]
pub struct InterruptToggleMutator;

impl Named for InterruptToggleMutator {
    fn name(&self) -> &Cow<'static, str> {
        static NAME: Cow<'static, str> = Cow::Borrowed("InterruptToggleMutator");
        &NAME
    }
}

impl<State> Mutator<SimulationInput, State> for InterruptToggleMutator
where
    State: HasRand,
{
    fn mutate(&mut self, state: &mut State, input: &mut SimulationInput) -> Result<MutationResult, libafl::Error> {
        Ok(toggle_interrupt(state.rand_mut(), input))
    }
}

fn toggle_interrupt<R: Rand>(rand: &mut R, input: &mut SimulationInput) -> MutationResult {
    if input.ints.is_empty() {
        return MutationResult::Skipped;
    }
    let idx = rand.below_or_zero(input.ints.len());
    input.ints[idx] = rand.below_or_zero(16) as u8;
    MutationResult::Mutated
}

pub trait HasMutProp<const OFFSET: usize> {
    type PropType;

    fn get_field(&mut self) -> &mut Self::PropType;
}

#[derive(Debug, New)]
pub struct PropMutator<PM, const PROP_ID: usize> {
    mutator: PM,
}

impl<M, const PROP_ID: usize> Named for PropMutator<M, PROP_ID> {
    fn name(&self) -> &Cow<'static, str> {
        static NAME: Cow<'static, str> = Cow::Borrowed("FieldMutator");
        &NAME
    }
}

impl<I, T, M, State, const PROP_ID: usize> Mutator<I, State> for PropMutator<M, PROP_ID>
where
    M: Mutator<T, State>,
    State: HasRand,
    I: HasMutProp<PROP_ID, PropType = T>,
{
    #[inline]
    fn mutate(
        &mut self,
        state: &mut State,
        input: &mut I,
    ) -> Result<MutationResult, libafl::Error> {
        let field_mut = I::get_field(input);
        self.mutator.mutate(state, field_mut)
    }
}

impl<PM, const PROP_ID: usize> ComposedByMutations for PropMutator<PM, PROP_ID> {
    type Mutations = PM;

    fn mutations(&self) -> &Self::Mutations {
        &self.mutator
    }

    fn mutations_mut(&mut self) -> &mut Self::Mutations {
        &mut self.mutator
    }
}

#[derive(Debug)]
pub struct OptionMutator<M> {
    mutator: M,
    name: OnceLock<Cow<'static, str>>,
}

impl<M> OptionMutator<M> {
    pub fn new(mutator: M) -> Self {
        Self {
            mutator,
            name: OnceLock::default(),
        }
    }
}

impl<M> Named for OptionMutator<M>
where
    M: Named,
{
    fn name(&self) -> &Cow<'static, str> {
        self.name.get_or_init(|| {
            let name = format!("OptionMutator<{}>", self.mutator.name());
            Cow::Owned(name)
        })
    }
}

impl<I, M, State> Mutator<Option<I>, State> for OptionMutator<M>
where
    M: Mutator<I, State>,
    State: HasRand,
{
    fn mutate(
        &mut self,
        state: &mut State,
        input: &mut Option<I>,
    ) -> Result<MutationResult, libafl::Error> {
        input
            .as_mut()
            .map(|it| self.mutator.mutate(state, it))
            .unwrap_or(Ok(MutationResult::Skipped))
    }
}

#[cfg(test)]
mod si_mutator_tests {
    use libafl_bolts::rands::StdRand;
    use riscv_fuzz_isa::Template;

    use super::*;
    use crate::word::Word;

    fn sample_si() -> SimulationInput {
        let family = &riscv_fuzz_isa::families(Segment::Main)[0];
        let word = crate::word::populate_word(&mut StdRand::with_seed(0), family, 0, riscv_fuzz_isa::N_DATA_SECTIONS);
        let ints = vec![0u8; family.templates.iter().map(|t| t.len_insts()).sum()];
        SimulationInput {
            template: Template::PM,
            data_seed: 0,
            prefix: vec![],
            words: vec![word],
            suffix: vec![],
            ints,
            name_suffix: String::new(),
        }
    }

    #[test]
    fn regenerate_main_word_replaces_the_sole_word() {
        let mut rand = StdRand::with_seed(3);
        let mut si = sample_si();
        let before: Word = si.words[0].clone();
        let result = regenerate_main_word(&mut rand, &mut si);
        assert_eq!(result, MutationResult::Mutated);
        assert_eq!(si.words.len(), 1);
        let _ = before;
    }

    #[test]
    fn regenerate_main_word_skips_an_empty_main_segment() {
        let mut rand = StdRand::with_seed(3);
        let mut si = sample_si();
        si.words.clear();
        assert_eq!(regenerate_main_word(&mut rand, &mut si), MutationResult::Skipped);
    }

    #[test]
    fn toggle_interrupt_keeps_ints_length_fixed() {
        let mut rand = StdRand::with_seed(5);
        let mut si = sample_si();
        let len_before = si.ints.len();
        assert_eq!(toggle_interrupt(&mut rand, &mut si), MutationResult::Mutated);
        assert_eq!(si.ints.len(), len_before);
    }

    #[test]
    fn toggle_interrupt_skips_an_empty_ints_vector() {
        let mut rand = StdRand::with_seed(5);
        let mut si = sample_si();
        si.ints.clear();
        assert_eq!(toggle_interrupt(&mut rand, &mut si), MutationResult::Skipped);
    }
}
