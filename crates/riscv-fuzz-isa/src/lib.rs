mod families;
mod segment;
mod template;

pub use families::{InstructionFamily, InstructionTemplate, OperandKind, RegisterClass};
pub use segment::Segment;
pub use template::Template;

/// Number of random-data sections every template slices the data pool into.
///
/// Fixed at 6 to match the bootrom/memory layout every `rv64-*.S` template
/// agrees on (`_random_data0` .. `_random_data5`).
pub const N_DATA_SECTIONS: usize = 6;

pub fn families(segment: Segment) -> &'static [InstructionFamily] {
    families::table(segment)
}
