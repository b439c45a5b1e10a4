//! Word generation and population: turning an [`InstructionFamily`] into a
//! sequence of concrete, assembly-ready instruction lines.

use libafl_bolts::rands::Rand;
use riscv_fuzz_isa::{InstructionFamily, InstructionTemplate, OperandKind, Segment};
use serde::{Deserialize, Serialize};

/// One resolved operand: a concrete register number, immediate value, label
/// index (within the same segment — see [`populate_word`]'s `max_label`),
/// or data-section index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Operand {
    Register(u8),
    Immediate(i64),
    Label(u32),
    DataSection(u32),
}

/// A family picked for a slot plus its resolved operands, one entry per
/// [`InstructionTemplate`] in the family (so `la`-bearing families carry two
/// entries worth of placeholder accounting via [`InstructionTemplate::len_insts`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Word {
    pub family_id: u16,
    pub segment: Segment,
    pub operands: Vec<Vec<Operand>>,
}

impl Word {
    /// Number of real instructions this word expands to once assembled,
    /// `la` macros counting as 2.
    pub fn len_insts(&self, family: &InstructionFamily) -> usize {
        family.templates.iter().map(InstructionTemplate::len_insts).sum()
    }

    /// Render this word's instructions as assembly lines, substituting each
    /// resolved operand for its template placeholder in order. `label`
    /// names this word's own entry label; a [`Operand::Label`] operand
    /// resolves to the `label_prefix`-qualified name of the target word.
    pub fn render(&self, family: &InstructionFamily, label: &str, label_prefix: &str) -> Vec<String> {
        let mut lines = Vec::with_capacity(family.templates.len() + 1);
        lines.push(format!("{label}:"));
        for (template, operands) in family.templates.iter().zip(&self.operands) {
            let rendered: Vec<String> =
                operands.iter().map(|o| render_operand(*o, label_prefix)).collect();
            lines.push(format!("    {} {}", template.mnemonic, rendered.join(", ")));
        }
        lines
    }
}

fn render_operand(operand: Operand, label_prefix: &str) -> String {
    match operand {
        Operand::Register(r) => format!("x{r}"),
        Operand::Immediate(v) => v.to_string(),
        Operand::Label(index) => format!("{label_prefix}{index}"),
        Operand::DataSection(idx) => format!("_random_data{idx}"),
    }
}

/// Picks a random family for `segment` and resolves its operands.
///
/// `max_label` bounds [`OperandKind::Label`] resolution to `[0, max_label]`
/// so a jump generated in this segment can never target another segment;
/// `n_data_sections` bounds [`OperandKind::DataSection`] resolution.
pub fn get_word<R: Rand>(rand: &mut R, segment: Segment, max_label: u32, n_data_sections: usize) -> Word {
    let families = riscv_fuzz_isa::families(segment);
    let family = &families[rand.below_or_zero(families.len())];
    populate_word(rand, family, max_label, n_data_sections)
}

/// Resolves a specific family's operands with fresh random values. This is
/// the commit point: every placeholder in the returned [`Word`] is
/// concrete.
pub fn populate_word<R: Rand>(
    rand: &mut R,
    family: &InstructionFamily,
    max_label: u32,
    n_data_sections: usize,
) -> Word {
    let operands = family
        .templates
        .iter()
        .map(|template| {
            template
                .operands
                .iter()
                .map(|kind| resolve_operand(rand, *kind, max_label, n_data_sections))
                .collect()
        })
        .collect();
    Word { family_id: family.id, segment: family.segment, operands }
}

fn resolve_operand<R: Rand>(rand: &mut R, kind: OperandKind, max_label: u32, n_data_sections: usize) -> Operand {
    match kind {
        OperandKind::Register(class) => {
            let pool = class.pool();
            Operand::Register(pool[rand.below_or_zero(pool.len())])
        }
        OperandKind::Immediate { signed, bits } => {
            let max = 1i64 << (bits - u8::from(signed));
            let value = rand.below_or_zero(max as usize) as i64;
            Operand::Immediate(if signed { value - (max / 2) } else { value })
        }
        OperandKind::Label => Operand::Label(rand.below_or_zero(max_label as usize + 1) as u32),
        OperandKind::DataSection => Operand::DataSection(rand.below_or_zero(n_data_sections) as u32),
    }
}

#[cfg(test)]
mod tests {
    use libafl_bolts::rands::StdRand;

    use super::*;

    fn rand() -> StdRand {
        StdRand::with_seed(1)
    }

    #[test]
    fn populate_word_resolves_one_operand_vector_per_template() {
        let mut rand = rand();
        let families = riscv_fuzz_isa::families(Segment::Main);
        let family = &families[0];
        let word = populate_word(&mut rand, family, 4, 6);
        assert_eq!(word.operands.len(), family.templates.len());
        for (operands, template) in word.operands.iter().zip(family.templates) {
            assert_eq!(operands.len(), template.operands.len());
        }
    }

    #[test]
    fn register_operands_never_pick_reserved_registers() {
        let mut rand = rand();
        for family in riscv_fuzz_isa::families(Segment::Main) {
            for _ in 0..50 {
                let word = populate_word(&mut rand, family, 4, 6);
                for (operands, template) in word.operands.iter().zip(family.templates) {
                    for (operand, kind) in operands.iter().zip(template.operands) {
                        if let (Operand::Register(r), OperandKind::Register(class)) =
                            (operand, kind)
                        {
                            assert!(class.pool().contains(r));
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn label_operands_stay_within_max_label() {
        let mut rand = rand();
        let family = riscv_fuzz_isa::families(Segment::Main)
            .iter()
            .find(|f| f.templates.iter().any(|t| t.operands.contains(&OperandKind::Label)))
            .expect("main families include a branch/jump");
        for _ in 0..50 {
            let word = populate_word(&mut rand, family, 3, 6);
            for operands in &word.operands {
                for operand in operands {
                    if let Operand::Label(index) = operand {
                        assert!(*index <= 3);
                    }
                }
            }
        }
    }

    #[test]
    fn la_macro_word_counts_as_two_instructions() {
        let family = riscv_fuzz_isa::families(Segment::Prefix)
            .iter()
            .find(|f| f.templates.iter().any(|t| t.is_la_macro))
            .expect("prefix families include a `la` macro");
        let mut rand = rand();
        let word = populate_word(&mut rand, family, 4, 6);
        assert_eq!(word.len_insts(family), 3);
    }
}
