use derive_more::{Display, FromStr};
use serde::{Deserialize, Serialize};

/// Source-language skeleton determining privilege mode and runtime setup.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Display, FromStr)]
#[repr(u8)]
pub enum Template {
    #[display("p-m")]
    PM,
    #[display("p-s")]
    PS,
    #[display("p-u")]
    PU,
    #[display("v-u")]
    VU,
}

impl Template {
    pub const ALL: [Self; 4] = [Self::PM, Self::PS, Self::PU, Self::VU];

    /// The `<tag>` half of the `rv64-<tag>.S` template file name.
    pub const fn file_tag(self) -> &'static str {
        match self {
            Self::PM => "p-m",
            Self::PS => "p-s",
            Self::PU => "p-u",
            Self::VU => "v-u",
        }
    }

    /// Number of RTL clock cycles the runner allows before declaring a timeout.
    ///
    /// `v-u` exercises the virtual-memory helpers and the string library,
    /// which is why it gets the longer budget.
    pub const fn max_cycles(self) -> u64 {
        match self {
            Self::VU => 200_000,
            _ => 6_000,
        }
    }

    pub const fn is_virtual_memory(self) -> bool {
        matches!(self, Self::VU)
    }
}
