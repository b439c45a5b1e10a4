use serde::{Deserialize, Serialize};

use crate::Segment;

/// Which register pool an operand may be drawn from.
///
/// `NotReserved` excludes `x0` (hard-wired zero), `x1`/`ra` and `x2`/`sp`
/// while the word is unsafe to clobber them (prefix/suffix control flow
/// and the exit protocol rely on both).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegisterClass {
    NotReserved,
    Any,
}

impl RegisterClass {
    /// `x0`..`x31`, filtered to the class's legal pool.
    pub fn pool(self) -> &'static [u8] {
        const NOT_RESERVED: [u8; 27] = [
            5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23, 24, 25, 26, 27,
            28, 29, 30, 31,
        ];
        const ANY: [u8; 32] = [
            0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, 22, 23,
            24, 25, 26, 27, 28, 29, 30, 31,
        ];
        match self {
            Self::NotReserved => &NOT_RESERVED,
            Self::Any => &ANY,
        }
    }
}

/// The kind of value a template placeholder resolves to.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperandKind {
    Register(RegisterClass),
    /// An immediate drawn from `[-2^(bits-1), 2^(bits-1))` if signed, else `[0, 2^bits)`.
    Immediate { signed: bool, bits: u8 },
    /// A branch/jump target, always resolved to a label within the same segment.
    Label,
    /// The base address of one of the `N_DATA_SECTIONS` random-data sections.
    DataSection,
}

/// One instruction line with placeholders, e.g. `addi {rd}, {rs1}, {imm}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstructionTemplate {
    pub mnemonic: &'static str,
    pub operands: &'static [OperandKind],
    /// `la` is a pseudo-instruction the assembler expands to two real
    /// instructions (`auipc` + `addi`); the interrupt vector needs a
    /// corresponding zero entry inserted after it (see the preprocessor).
    pub is_la_macro: bool,
}

impl InstructionTemplate {
    pub const fn len_insts(&self) -> usize {
        if self.is_la_macro { 2 } else { 1 }
    }
}

/// A group of 1-4 related instruction templates, populated together as one [`Word`](crate).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstructionFamily {
    pub id: u16,
    pub segment: Segment,
    pub templates: &'static [InstructionTemplate],
}

macro_rules! family {
    ($id:expr, $segment:expr, [$($mnemonic:literal ( $($operand:expr),* $(,)? )),+ $(,)?]) => {
        InstructionFamily {
            id: $id,
            segment: $segment,
            templates: &[
                $(
                    InstructionTemplate {
                        mnemonic: $mnemonic,
                        operands: &[$($operand),*],
                        is_la_macro: false,
                    },
                )+
            ],
        }
    };
}

use OperandKind::{DataSection, Immediate, Label, Register};
use RegisterClass::{Any, NotReserved};

const IMM12: OperandKind = Immediate { signed: true, bits: 12 };
const IMM20: OperandKind = Immediate { signed: true, bits: 20 };
const SHAMT: OperandKind = Immediate { signed: false, bits: 6 };

pub static PREFIX_FAMILIES: &[InstructionFamily] = &[
    family!(0, Segment::Prefix, ["csrw" (Register(Any), IMM12)]),
    family!(1, Segment::Prefix, ["csrrs" (Register(NotReserved), Register(Any))]),
    InstructionFamily {
        id: 2,
        segment: Segment::Prefix,
        templates: &[
            InstructionTemplate {
                mnemonic: "la",
                operands: &[Register(NotReserved), DataSection],
                is_la_macro: true,
            },
            InstructionTemplate {
                mnemonic: "addi",
                operands: &[Register(NotReserved), Register(NotReserved), IMM12],
                is_la_macro: false,
            },
        ],
    },
    family!(3, Segment::Prefix, ["li" (Register(NotReserved), IMM20)]),
];

pub static MAIN_FAMILIES: &[InstructionFamily] = &[
    family!(10, Segment::Main, ["add" (Register(NotReserved), Register(NotReserved), Register(NotReserved))]),
    family!(11, Segment::Main, ["sub" (Register(NotReserved), Register(NotReserved), Register(NotReserved))]),
    family!(12, Segment::Main, ["xor" (Register(NotReserved), Register(NotReserved), Register(NotReserved))]),
    family!(13, Segment::Main, ["sll" (Register(NotReserved), Register(NotReserved), Register(NotReserved))]),
    family!(14, Segment::Main, ["srai" (Register(NotReserved), Register(NotReserved), SHAMT)]),
    family!(15, Segment::Main, ["addi" (Register(NotReserved), Register(NotReserved), IMM12)]),
    InstructionFamily {
        id: 16,
        segment: Segment::Main,
        templates: &[
            InstructionTemplate {
                mnemonic: "la",
                operands: &[Register(NotReserved), DataSection],
                is_la_macro: true,
            },
            InstructionTemplate {
                mnemonic: "ld",
                operands: &[Register(NotReserved), IMM12, Register(NotReserved)],
                is_la_macro: false,
            },
        ],
    },
    family!(17, Segment::Main, ["sd" (Register(NotReserved), IMM12, Register(NotReserved))]),
    family!(18, Segment::Main, [
        "beq" (Register(NotReserved), Register(NotReserved), Label),
        "addi" (Register(NotReserved), Register(NotReserved), IMM12),
    ]),
    family!(19, Segment::Main, ["jal" (Register(NotReserved), Label)]),
    family!(20, Segment::Main, ["mul" (Register(NotReserved), Register(NotReserved), Register(NotReserved))]),
    family!(21, Segment::Main, ["div" (Register(NotReserved), Register(NotReserved), Register(NotReserved))]),
    family!(22, Segment::Main, ["fadd.s" (Register(NotReserved), Register(NotReserved), Register(NotReserved))]),
];

pub static SUFFIX_FAMILIES: &[InstructionFamily] = &[
    family!(30, Segment::Suffix, ["sd" (Register(NotReserved), IMM12, Register(NotReserved))]),
    family!(31, Segment::Suffix, ["fnmadd.s" (Register(NotReserved), Register(NotReserved), Register(NotReserved), Register(NotReserved))]),
    family!(32, Segment::Suffix, ["li" (Register(Any), IMM20)]),
    family!(33, Segment::Suffix, ["ecall" ()]),
];

pub fn table(segment: Segment) -> &'static [InstructionFamily] {
    match segment {
        Segment::Prefix => PREFIX_FAMILIES,
        Segment::Main => MAIN_FAMILIES,
        Segment::Suffix => SUFFIX_FAMILIES,
    }
}
