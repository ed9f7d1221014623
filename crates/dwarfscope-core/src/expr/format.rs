//! Display rendering of decoded expressions.
//!
//! Rendering is a pure function of the operations and a [`FormatOptions`]
//! value. Nothing here changes the decoded sequence; truncation and address
//! relocation only affect the produced string.

use std::fmt::Write as _;

use super::{Operand, Operation};
use crate::registers::register_display;
use crate::types::Architecture;

const DW_OP_ADDR: u8 = 0x03;
const DW_OP_REG0: u8 = 0x50;
const DW_OP_REG31: u8 = 0x6f;
const DW_OP_BREG0: u8 = 0x70;
const DW_OP_BREG31: u8 = 0x8f;
const DW_OP_REGX: u8 = 0x90;
const DW_OP_BREGX: u8 = 0x92;
const DW_OP_CALL_FRAME_CFA: u8 = 0x9c;

/// Per-call display preferences.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatOptions
{
    /// Show ABI register names instead of bare DWARF numbers.
    pub friendly_names: bool,
    /// Register table used for friendly names.
    pub architecture: Architecture,
    /// Keep the `DW_OP_` prefix on mnemonics.
    pub show_prefix: bool,
    /// Render unsigned operands in hexadecimal.
    pub hex: bool,
    /// Added to `DW_OP_addr` operands, for relocated images.
    pub address_delta: i64,
    /// Render at most this many operations.
    pub max_ops: Option<usize>,
}

impl Default for FormatOptions
{
    fn default() -> Self
    {
        Self::new(Architecture::X86_64)
    }
}

impl FormatOptions
{
    #[must_use]
    pub const fn new(architecture: Architecture) -> Self
    {
        Self {
            friendly_names: true,
            architecture,
            show_prefix: true,
            hex: false,
            address_delta: 0,
            max_ops: None,
        }
    }

    fn register(&self, number: u64) -> String
    {
        if self.friendly_names {
            register_display(self.architecture, number)
        } else {
            number.to_string()
        }
    }

    fn unsigned(&self, value: u64) -> String
    {
        if self.hex {
            format!("0x{value:x}")
        } else {
            value.to_string()
        }
    }
}

/// Something that can describe the canonical frame address at the point an
/// expression is evaluated (typically the CFA rule of an unwind row).
pub trait CfaResolver
{
    fn describe_cfa(&self, options: &FormatOptions) -> Option<String>;
}

/// Render one operation.
#[must_use]
pub fn format_operation(op: &Operation, options: &FormatOptions, cfa: Option<&dyn CfaResolver>) -> String
{
    let name = if options.show_prefix {
        op.mnemonic
    } else {
        op.short_mnemonic()
    };

    let mut out = match op.opcode {
        DW_OP_REG0..=DW_OP_REG31 if options.friendly_names && !is_legacy(op) => {
            let number = u64::from(op.opcode - DW_OP_REG0);
            format!("{name} ({})", options.register(number))
        }
        DW_OP_BREG0..=DW_OP_BREG31 if options.friendly_names => {
            let number = u64::from(op.opcode - DW_OP_BREG0);
            let offset = op.operands.first().and_then(Operand::as_i64).unwrap_or_default();
            format!("{name} ({}): {offset}", options.register(number))
        }
        DW_OP_REGX if !is_legacy(op) => match op.operands.first().and_then(Operand::as_u64) {
            Some(number) => format!("{name} {}", options.register(number)),
            None => name.to_string(),
        },
        DW_OP_BREGX => {
            let number = op.operands.first().and_then(Operand::as_u64).unwrap_or_default();
            let offset = op.operands.get(1).and_then(Operand::as_i64).unwrap_or_default();
            format!("{name} {}, {offset}", options.register(number))
        }
        // OP_REG, OP_BASEREG
        0x01 | 0x02 if is_legacy(op) => match op.operands.first().and_then(Operand::as_u64) {
            Some(number) => format!("{name} {}", options.register(number)),
            None => name.to_string(),
        },
        DW_OP_ADDR => match op.operands.first().and_then(Operand::as_u64) {
            Some(address) => format!("{name} 0x{:x}", address.wrapping_add_signed(options.address_delta)),
            None => name.to_string(),
        },
        _ => render_generic(name, &op.operands, options, cfa),
    };

    if op.opcode == DW_OP_CALL_FRAME_CFA && !is_legacy(op) {
        if let Some(description) = cfa.and_then(|resolver| resolver.describe_cfa(options)) {
            let _ = write!(out, " [{description}]");
        }
    }
    out
}

/// Render a whole expression, honouring [`FormatOptions::max_ops`].
#[must_use]
pub fn format_expression(ops: &[Operation], options: &FormatOptions, cfa: Option<&dyn CfaResolver>) -> String
{
    let shown = options.max_ops.map_or(ops.len(), |max| max.min(ops.len()));
    let mut parts: Vec<String> = ops[..shown]
        .iter()
        .map(|op| format_operation(op, options, cfa))
        .collect();
    let hidden = ops.len() - shown;
    if hidden > 0 {
        parts.push(format!("+{hidden} more"));
    }
    parts.join("; ")
}

fn is_legacy(op: &Operation) -> bool
{
    op.mnemonic.starts_with("OP_")
}

fn render_generic(name: &str, operands: &[Operand], options: &FormatOptions, cfa: Option<&dyn CfaResolver>) -> String
{
    if operands.is_empty() {
        return name.to_string();
    }
    let rendered: Vec<String> = operands
        .iter()
        .map(|operand| match operand {
            Operand::Unsigned(value) => options.unsigned(*value),
            Operand::Signed(value) => value.to_string(),
            Operand::Block(bytes) => {
                let hex: Vec<String> = bytes.iter().map(|b| format!("{b:02x}")).collect();
                format!("[{}]", hex.join(" "))
            }
            Operand::Nested(inner) => {
                let nested = FormatOptions {
                    max_ops: None,
                    ..*options
                };
                format!("({})", format_expression(inner, &nested, cfa))
            }
        })
        .collect();
    format!("{name} {}", rendered.join(", "))
}
