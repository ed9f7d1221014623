//! # DWARF Expressions
//!
//! Decoding and display of DWARF expression bytecode.
//!
//! An expression is a sequence of stack-machine operations. DWARF 2 and later
//! share one opcode table ([`decode`]); DWARF 1 used a much smaller set with
//! fixed-size operands. Both produce the same [`Operation`] record so the
//! formatter and the resolvers never care which one produced it.

pub mod decode;
pub mod format;

use gimli::RunTimeEndian;

pub use decode::decode_expression;
pub use format::{format_expression, format_operation, CfaResolver, FormatOptions};

/// One decoded operand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operand
{
    Unsigned(u64),
    Signed(i64),
    /// Raw bytes (`DW_OP_implicit_value`, `DW_OP_const_type` values).
    Block(Vec<u8>),
    /// A recursively decoded sub-expression (`DW_OP_entry_value`).
    Nested(Vec<Operation>),
}

impl Operand
{
    /// The operand as an unsigned integer, when it is one.
    #[must_use]
    pub fn as_u64(&self) -> Option<u64>
    {
        match self {
            Operand::Unsigned(value) => Some(*value),
            _ => None,
        }
    }

    /// The operand as a signed integer, when it is one.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64>
    {
        match self {
            Operand::Signed(value) => Some(*value),
            _ => None,
        }
    }
}

/// A single decoded operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation
{
    pub opcode: u8,
    /// Full mnemonic including its `DW_OP_` (or DWARF 1 `OP_`) prefix.
    pub mnemonic: &'static str,
    pub operands: Vec<Operand>,
    /// Offset of the opcode byte from the start of the expression.
    pub offset: usize,
}

impl Operation
{
    /// Mnemonic without the `DW_OP_`/`OP_` prefix.
    #[must_use]
    pub fn short_mnemonic(&self) -> &'static str
    {
        self.mnemonic
            .strip_prefix("DW_OP_")
            .or_else(|| self.mnemonic.strip_prefix("OP_"))
            .unwrap_or(self.mnemonic)
    }
}

/// Everything the decoder needs to know about the unit an expression lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpressionProfile
{
    pub address_size: u8,
    /// 4 for 32-bit DWARF, 8 for 64-bit DWARF.
    pub offset_size: u8,
    pub endian: RunTimeEndian,
    /// DWARF version of the owning unit; 1 selects the legacy opcode table.
    pub version: u16,
}

impl ExpressionProfile
{
    #[must_use]
    pub const fn new(address_size: u8, endian: RunTimeEndian, version: u16) -> Self
    {
        Self {
            address_size,
            offset_size: 4,
            endian,
            version,
        }
    }

    /// Little-endian 64-bit DWARF 4 profile, handy for ad-hoc decoding.
    #[must_use]
    pub const fn host_default() -> Self
    {
        Self::new(8, RunTimeEndian::Little, 4)
    }

    #[must_use]
    pub const fn is_legacy(&self) -> bool
    {
        self.version < 2
    }
}
