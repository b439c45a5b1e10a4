//! Status codes returned by the runners and the error taxonomy that wraps
//! them, per the statuses table and the error-taxonomy section.

use thiserror::Error;

/// Outcome of a single runner invocation.
///
/// Two inconsistent numberings exist in prior art for this set. This
/// implementation fixes the numbering that comes from the shared constants
/// module rather than the one hand-rolled inside the RTL driver — see
/// `DESIGN.md`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum IterationStatus {
    Success = 0,
    TimeOut = 1,
    AssertionFail = 2,
    IllegalMemoryAccess = 3,
}

impl IterationStatus {
    pub const fn code(self) -> u8 {
        self as u8
    }
}

/// Errors that can terminate a single fuzzing iteration.
///
/// `Divergence` is not an error in the usual sense: it is the product the
/// driver is hunting for, carried through the `Result` channel anyway
/// because it also ends the iteration early and needs `?` to propagate out
/// of every runner call the same way a real failure would.
#[derive(Debug, Error)]
pub enum IterationError {
    #[error("simulation input failed a structural invariant: {0}")]
    InvalidInput(String),

    #[error("compiling the generated program failed: {0}")]
    CompileBroken(String),

    #[error("ISA runner timed out after 30s")]
    IsaTimeOut,

    #[error("RTL runner exceeded max_cycles without eos")]
    RtlTimeOut,

    #[error("RTL model raised an assertion")]
    AssertionFail,

    #[error("illegal memory access outside bootrom/DRAM at {address:#x}")]
    IllegalMemoryAccess { address: u64 },

    #[error("unexpected worker failure: {0}")]
    WorkerCrash(String),
}

impl IterationError {
    pub const fn status(&self) -> Option<IterationStatus> {
        match self {
            Self::RtlTimeOut | Self::IsaTimeOut => Some(IterationStatus::TimeOut),
            Self::AssertionFail => Some(IterationStatus::AssertionFail),
            Self::IllegalMemoryAccess { .. } => Some(IterationStatus::IllegalMemoryAccess),
            Self::InvalidInput(_) | Self::CompileBroken(_) | Self::WorkerCrash(_) => None,
        }
    }
}
