//! Unwind rows: evaluating an FDE with `gimli::UnwindTable`.
//!
//! `gimli` runs the CIE and FDE programs; each of its rows is converted into
//! a [`DecodedFrameRow`] with expressions decoded into [`Operation`]s.

use std::collections::BTreeMap;

use gimli::{AArch64, BaseAddresses, Register, RunTimeEndian, UnwindContext, UnwindContextStorage, UnwindExpression, UnwindSection};
use tracing::{debug, trace};

use super::parse::{parse_fde, CfiKind, CfiSection, Fde, Slice};
use crate::error::{map_gimli_error, Result};
use crate::expr::{decode_expression, format_expression, CfaResolver, ExpressionProfile, FormatOptions, Operation};
use crate::registers::register_display;

/// How the canonical frame address is computed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CfaRule
{
    RegisterOffset
    {
        register: u16,
        offset: i64,
    },
    Expression(Vec<Operation>),
}

impl Default for CfaRule
{
    fn default() -> Self
    {
        CfaRule::RegisterOffset { register: 0, offset: 0 }
    }
}

impl CfaResolver for CfaRule
{
    fn describe_cfa(&self, options: &FormatOptions) -> Option<String>
    {
        Some(match self {
            CfaRule::RegisterOffset { register, offset } => {
                let name = if options.friendly_names {
                    register_display(options.architecture, u64::from(*register))
                } else {
                    format!("r{register}")
                };
                if *offset == 0 {
                    name
                } else {
                    format!("{name}{offset:+}")
                }
            }
            CfaRule::Expression(ops) => format_expression(ops, options, None),
        })
    }
}

/// How a register's caller value is recovered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisterRule
{
    Undefined,
    SameValue,
    /// Saved at CFA + n.
    Offset(i64),
    /// The value is CFA + n.
    ValOffset(i64),
    /// Held in another register.
    Register(u16),
    /// Saved at the address the expression computes.
    Expression(Vec<Operation>),
    /// The value is what the expression computes.
    ValExpression(Vec<Operation>),
    Architectural,
}

/// The rules in effect for `[pc, end)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFrameRow
{
    pub pc: u64,
    pub end: u64,
    pub cfa: CfaRule,
    /// Registers without an entry keep the ABI default.
    pub registers: BTreeMap<u16, RegisterRule>,
    pub args_size: u64,
    /// ARM64 return-address signing state (`negate_ra_state` toggles it).
    /// Only tracked when the section was parsed for ARM64.
    pub return_address_signed: bool,
}

impl DecodedFrameRow
{
    #[must_use]
    pub fn register(&self, register: u16) -> Option<&RegisterRule>
    {
        self.registers.get(&register)
    }
}

/// All rows of one FDE, in address order.
#[derive(Debug, Clone)]
pub struct UnwindTable
{
    rows: Vec<DecodedFrameRow>,
}

impl UnwindTable
{
    /// Run the CIE's initial instructions, then the FDE's.
    pub fn build(section: &CfiSection, fde: &Fde) -> Result<Self>
    {
        let bases = section.bases();
        let rows = match section.kind() {
            CfiKind::DebugFrame => evaluate(&section.debug_frame(), &bases, fde, section.endian())?,
            CfiKind::EhFrame => evaluate(&section.eh_frame(), &bases, fde, section.endian())?,
        };
        trace!(fde = fde.offset, rows = rows.len(), "built unwind table");
        Ok(Self { rows })
    }

    #[must_use]
    pub fn rows(&self) -> &[DecodedFrameRow]
    {
        &self.rows
    }

    #[must_use]
    pub fn row_for_address(&self, pc: u64) -> Option<&DecodedFrameRow>
    {
        let after = self.rows.partition_point(|row| row.pc <= pc);
        self.rows[..after].last().filter(|row| pc < row.end)
    }
}

/// Context storage whose rule set and remember stack grow on demand.
struct GrowingStorage;

impl UnwindContextStorage<usize> for GrowingStorage
{
    type Rules = Vec<(Register, gimli::RegisterRule<usize>)>;
    type Stack = Vec<gimli::UnwindTableRow<usize, Self>>;
}

fn evaluate<'a, S>(section: &S, bases: &BaseAddresses, fde: &Fde, endian: RunTimeEndian) -> Result<Vec<DecodedFrameRow>>
where
    S: UnwindSection<Slice<'a>>,
{
    let entry = parse_fde(section, bases, fde.offset)?;
    let profile = ExpressionProfile {
        address_size: entry.cie().address_size(),
        offset_size: entry.cie().encoding().format.word_size(),
        endian,
        // CFI expressions always use the DWARF 2+ opcode table.
        version: 4,
    };
    let failed = |err: gimli::Error| map_gimli_error("evaluating call frame instructions", fde.offset, err);

    let mut context = UnwindContext::<usize, GrowingStorage>::new_in();
    let mut table = entry.rows(section, bases, &mut context).map_err(failed)?;
    let mut rows = Vec::new();
    while let Some(row) = table.next_row().map_err(failed)? {
        if row.end_address() > row.start_address() {
            rows.push(convert_row(row, section, &profile, fde.offset)?);
        }
    }
    Ok(rows)
}

fn decode_body<'a, S>(
    section: &S,
    expression: &UnwindExpression<usize>,
    profile: &ExpressionProfile,
    record: u64,
) -> Result<Vec<Operation>>
where
    S: UnwindSection<Slice<'a>>,
{
    let expression: gimli::Expression<Slice<'a>> = expression
        .get(section)
        .map_err(|err| map_gimli_error("reading CFI expression", record, err))?;
    decode_expression(expression.0.slice(), profile)
}

fn convert_row<'a, S>(
    row: &gimli::UnwindTableRow<usize, GrowingStorage>,
    section: &S,
    profile: &ExpressionProfile,
    record: u64,
) -> Result<DecodedFrameRow>
where
    S: UnwindSection<Slice<'a>>,
{
    let cfa = match row.cfa() {
        gimli::CfaRule::RegisterAndOffset { register, offset } => CfaRule::RegisterOffset {
            register: register.0,
            offset: *offset,
        },
        gimli::CfaRule::Expression(body) => CfaRule::Expression(decode_body(section, body, profile, record)?),
    };

    let mut registers = BTreeMap::new();
    let mut return_address_signed = false;
    for (register, rule) in row.registers() {
        let rule = match rule {
            gimli::RegisterRule::Undefined => RegisterRule::Undefined,
            gimli::RegisterRule::SameValue => RegisterRule::SameValue,
            gimli::RegisterRule::Offset(offset) => RegisterRule::Offset(*offset),
            gimli::RegisterRule::ValOffset(offset) => RegisterRule::ValOffset(*offset),
            gimli::RegisterRule::Register(source) => RegisterRule::Register(source.0),
            gimli::RegisterRule::Expression(body) => {
                RegisterRule::Expression(decode_body(section, body, profile, record)?)
            }
            gimli::RegisterRule::ValExpression(body) => {
                RegisterRule::ValExpression(decode_body(section, body, profile, record)?)
            }
            gimli::RegisterRule::Architectural => RegisterRule::Architectural,
            gimli::RegisterRule::Constant(state) if *register == AArch64::RA_SIGN_STATE => {
                return_address_signed = state & 1 == 1;
                continue;
            }
            other => {
                debug!(register = register.0, ?other, "skipping register rule");
                continue;
            }
        };
        registers.insert(register.0, rule);
    }

    Ok(DecodedFrameRow {
        pc: row.start_address(),
        end: row.end_address(),
        cfa,
        registers,
        args_size: row.saved_args_size(),
        return_address_signed,
    })
}
