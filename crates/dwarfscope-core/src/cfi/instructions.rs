//! Call frame instruction listings.
//!
//! `gimli` parses the instruction streams; [`CfiInstruction`] is the display
//! view of them. Operands are scaled by the CIE alignment factors, so every
//! instruction carries byte deltas and byte offsets.

use std::fmt;

use gimli::{BaseAddresses, CallFrameInstruction, CallFrameInstructionIter, CommonInformationEntry, UnwindExpression, UnwindSection};

use super::parse::{parse_fde, CfiKind, CfiSection, Fde, Slice};
use crate::error::{map_gimli_error, Result};

/// One decoded call frame instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CfiInstruction
{
    SetLoc
    {
        address: u64,
    },
    /// Advance by `delta` bytes (already multiplied by the code alignment).
    AdvanceLoc
    {
        delta: u64,
    },
    DefCfa
    {
        register: u16,
        offset: i64,
    },
    DefCfaRegister
    {
        register: u16,
    },
    DefCfaOffset
    {
        offset: i64,
    },
    DefCfaExpression
    {
        expression: Vec<u8>,
    },
    Undefined
    {
        register: u16,
    },
    SameValue
    {
        register: u16,
    },
    /// Saved at CFA + `offset`.
    Offset
    {
        register: u16,
        offset: i64,
    },
    /// Value is CFA + `offset`.
    ValOffset
    {
        register: u16,
        offset: i64,
    },
    Register
    {
        register: u16,
        source: u16,
    },
    Expression
    {
        register: u16,
        expression: Vec<u8>,
    },
    ValExpression
    {
        register: u16,
        expression: Vec<u8>,
    },
    Restore
    {
        register: u16,
    },
    RememberState,
    RestoreState,
    /// `DW_CFA_GNU_args_size`.
    ArgsSize
    {
        size: u64,
    },
    /// `DW_CFA_AARCH64_negate_ra_state`.
    NegateRaState,
    Nop,
}

impl fmt::Display for CfiInstruction
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            CfiInstruction::SetLoc { address } => write!(f, "DW_CFA_set_loc {address:#x}"),
            CfiInstruction::AdvanceLoc { delta } => write!(f, "DW_CFA_advance_loc {delta}"),
            CfiInstruction::DefCfa { register, offset } => write!(f, "DW_CFA_def_cfa r{register}, {offset}"),
            CfiInstruction::DefCfaRegister { register } => write!(f, "DW_CFA_def_cfa_register r{register}"),
            CfiInstruction::DefCfaOffset { offset } => write!(f, "DW_CFA_def_cfa_offset {offset}"),
            CfiInstruction::DefCfaExpression { expression } => {
                write!(f, "DW_CFA_def_cfa_expression ({} bytes)", expression.len())
            }
            CfiInstruction::Undefined { register } => write!(f, "DW_CFA_undefined r{register}"),
            CfiInstruction::SameValue { register } => write!(f, "DW_CFA_same_value r{register}"),
            CfiInstruction::Offset { register, offset } => write!(f, "DW_CFA_offset r{register}, cfa{offset:+}"),
            CfiInstruction::ValOffset { register, offset } => {
                write!(f, "DW_CFA_val_offset r{register}, cfa{offset:+}")
            }
            CfiInstruction::Register { register, source } => write!(f, "DW_CFA_register r{register}, r{source}"),
            CfiInstruction::Expression { register, expression } => {
                write!(f, "DW_CFA_expression r{register} ({} bytes)", expression.len())
            }
            CfiInstruction::ValExpression { register, expression } => {
                write!(f, "DW_CFA_val_expression r{register} ({} bytes)", expression.len())
            }
            CfiInstruction::Restore { register } => write!(f, "DW_CFA_restore r{register}"),
            CfiInstruction::RememberState => f.write_str("DW_CFA_remember_state"),
            CfiInstruction::RestoreState => f.write_str("DW_CFA_restore_state"),
            CfiInstruction::ArgsSize { size } => write!(f, "DW_CFA_GNU_args_size {size}"),
            CfiInstruction::NegateRaState => f.write_str("DW_CFA_AARCH64_negate_ra_state"),
            CfiInstruction::Nop => f.write_str("DW_CFA_nop"),
        }
    }
}

/// The instructions one FDE's rows are built from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameInstructions
{
    /// The CIE's initial instructions.
    pub initial: Vec<CfiInstruction>,
    /// The FDE's own instructions.
    pub body: Vec<CfiInstruction>,
}

impl CfiSection
{
    /// List the CIE and FDE instructions behind `fde`.
    pub fn instructions(&self, fde: &Fde) -> Result<FrameInstructions>
    {
        let bases = self.bases();
        match self.kind() {
            CfiKind::DebugFrame => list(&self.debug_frame(), &bases, fde.offset),
            CfiKind::EhFrame => list(&self.eh_frame(), &bases, fde.offset),
        }
    }
}

fn list<'a, S>(section: &S, bases: &BaseAddresses, offset: u64) -> Result<FrameInstructions>
where
    S: UnwindSection<Slice<'a>>,
{
    let entry = parse_fde(section, bases, offset)?;
    let cie = entry.cie();
    Ok(FrameInstructions {
        initial: collect(cie.instructions(section, bases), section, cie, cie.offset() as u64)?,
        body: collect(entry.instructions(section, bases), section, cie, offset)?,
    })
}

fn collect<'a, S>(
    mut instructions: CallFrameInstructionIter<'_, Slice<'a>>,
    section: &S,
    cie: &CommonInformationEntry<Slice<'a>>,
    record: u64,
) -> Result<Vec<CfiInstruction>>
where
    S: UnwindSection<Slice<'a>>,
{
    let mut listed = Vec::new();
    while let Some(instruction) = instructions
        .next()
        .map_err(|err| map_gimli_error("reading call frame instruction", record, err))?
    {
        listed.push(convert(instruction, section, cie, record)?);
    }
    Ok(listed)
}

fn expression_bytes<'a, S>(section: &S, expression: &UnwindExpression<usize>, record: u64) -> Result<Vec<u8>>
where
    S: UnwindSection<Slice<'a>>,
{
    let expression: gimli::Expression<Slice<'a>> = expression
        .get(section)
        .map_err(|err| map_gimli_error("reading CFI expression", record, err))?;
    Ok(expression.0.slice().to_vec())
}

fn convert<'a, S>(
    instruction: CallFrameInstruction<usize>,
    section: &S,
    cie: &CommonInformationEntry<Slice<'a>>,
    record: u64,
) -> Result<CfiInstruction>
where
    S: UnwindSection<Slice<'a>>,
{
    let data_alignment = cie.data_alignment_factor();
    let scaled = |factored: u64| (factored as i64).wrapping_mul(data_alignment);
    Ok(match instruction {
        CallFrameInstruction::SetLoc { address } => CfiInstruction::SetLoc { address },
        CallFrameInstruction::AdvanceLoc { delta } => CfiInstruction::AdvanceLoc {
            delta: u64::from(delta).wrapping_mul(cie.code_alignment_factor()),
        },
        CallFrameInstruction::DefCfa { register, offset } => CfiInstruction::DefCfa {
            register: register.0,
            offset: offset as i64,
        },
        CallFrameInstruction::DefCfaSf {
            register,
            factored_offset,
        } => CfiInstruction::DefCfa {
            register: register.0,
            offset: factored_offset.wrapping_mul(data_alignment),
        },
        CallFrameInstruction::DefCfaRegister { register } => CfiInstruction::DefCfaRegister { register: register.0 },
        CallFrameInstruction::DefCfaOffset { offset } => CfiInstruction::DefCfaOffset { offset: offset as i64 },
        CallFrameInstruction::DefCfaOffsetSf { factored_offset } => CfiInstruction::DefCfaOffset {
            offset: factored_offset.wrapping_mul(data_alignment),
        },
        CallFrameInstruction::DefCfaExpression { expression } => CfiInstruction::DefCfaExpression {
            expression: expression_bytes(section, &expression, record)?,
        },
        CallFrameInstruction::Undefined { register } => CfiInstruction::Undefined { register: register.0 },
        CallFrameInstruction::SameValue { register } => CfiInstruction::SameValue { register: register.0 },
        CallFrameInstruction::Offset {
            register,
            factored_offset,
        } => CfiInstruction::Offset {
            register: register.0,
            offset: scaled(factored_offset),
        },
        CallFrameInstruction::OffsetExtendedSf {
            register,
            factored_offset,
        } => CfiInstruction::Offset {
            register: register.0,
            offset: factored_offset.wrapping_mul(data_alignment),
        },
        CallFrameInstruction::ValOffset {
            register,
            factored_offset,
        } => CfiInstruction::ValOffset {
            register: register.0,
            offset: scaled(factored_offset),
        },
        CallFrameInstruction::ValOffsetSf {
            register,
            factored_offset,
        } => CfiInstruction::ValOffset {
            register: register.0,
            offset: factored_offset.wrapping_mul(data_alignment),
        },
        CallFrameInstruction::Register {
            dest_register,
            src_register,
        } => CfiInstruction::Register {
            register: dest_register.0,
            source: src_register.0,
        },
        CallFrameInstruction::Expression { register, expression } => CfiInstruction::Expression {
            register: register.0,
            expression: expression_bytes(section, &expression, record)?,
        },
        CallFrameInstruction::ValExpression { register, expression } => CfiInstruction::ValExpression {
            register: register.0,
            expression: expression_bytes(section, &expression, record)?,
        },
        CallFrameInstruction::Restore { register } => CfiInstruction::Restore { register: register.0 },
        CallFrameInstruction::RememberState => CfiInstruction::RememberState,
        CallFrameInstruction::RestoreState => CfiInstruction::RestoreState,
        CallFrameInstruction::ArgsSize { size } => CfiInstruction::ArgsSize { size },
        CallFrameInstruction::NegateRaState => CfiInstruction::NegateRaState,
        CallFrameInstruction::Nop => CfiInstruction::Nop,
    })
}
