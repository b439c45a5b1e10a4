use derive_more::{Display, FromStr};
use serde::{Deserialize, Serialize};

/// Where in a test program an [`InstructionFamily`](crate::InstructionFamily) may appear.
///
/// Prefix instructions establish CSR state and load section base addresses,
/// main instructions are the body under test, suffix instructions run the
/// exit protocol and store the signature. Labels never cross a segment
/// boundary: a jump generated while populating a `Main` word only ever
/// targets another `Main` word.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, FromStr)]
#[repr(u8)]
pub enum Segment {
    Prefix,
    Main,
    Suffix,
}

impl Segment {
    pub const fn marker(self) -> &'static str {
        match self {
            Self::Prefix => "_fuzz_prefix:",
            Self::Main => "_fuzz_main:",
            Self::Suffix => "_fuzz_suffix:",
        }
    }
}
