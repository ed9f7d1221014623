//! Text rendering of decoder results for the terminal.

use std::fmt::Write as _;

use dwarfscope_core::cfi::{CfaRule, Cie, DecodedFrameRow, Fde, RegisterRule};
use dwarfscope_core::compact_unwind::CompactUnwindEntry;
use dwarfscope_core::expr::{format_expression, CfaResolver, FormatOptions, Operation};
use dwarfscope_core::registers::register_display;
use dwarfscope_core::scope::{LocalLocation, ScopeFrame};

/// Parse `91 70`, `9170`, `0x91,0x70` style byte strings.
pub fn parse_hex_bytes(text: &str) -> Result<Vec<u8>, String>
{
    let mut digits = String::new();
    for token in text.split(|c: char| c.is_whitespace() || c == ',') {
        let token = token.strip_prefix("0x").or_else(|| token.strip_prefix("0X")).unwrap_or(token);
        if token.len() % 2 == 1 {
            digits.push('0');
        }
        digits.push_str(token);
    }
    (0..digits.len())
        .step_by(2)
        .map(|start| {
            digits
                .get(start..start + 2)
                .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                .ok_or_else(|| format!("invalid hex byte near position {start} in {text:?}"))
        })
        .collect()
}

/// Parse `0x1000` or `4096`.
pub fn parse_address(text: &str) -> Result<u64, String>
{
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => text.parse(),
    };
    parsed.map_err(|err| format!("invalid address {text:?}: {err}"))
}

pub fn expression(ops: &[Operation], options: &FormatOptions) -> String
{
    if ops.is_empty() {
        return "<empty>".to_string();
    }
    format_expression(ops, options, None)
}

pub fn frames(frames: &[ScopeFrame], options: &FormatOptions) -> String
{
    let mut out = String::new();
    for (depth, frame) in frames.iter().enumerate() {
        let kind = if frame.is_inline { " [inlined]" } else { "" };
        let _ = write!(out, "#{depth} {}{kind}", frame.display_name());
        match (&frame.source_file, frame.source_line) {
            (Some(file), Some(line)) => {
                let _ = write!(out, " at {file}:{line}");
            }
            (Some(file), None) => {
                let _ = write!(out, " at {file}");
            }
            _ => {}
        }
        let _ = writeln!(out, " (entry {:#x})", frame.entry);

        let cfa = frame.cfa.as_ref().map(|rule| rule as &dyn CfaResolver);
        for local in &frame.locals {
            let role = if local.is_parameter { "param" } else { "local" };
            let location = match &local.location {
                LocalLocation::Available { active, .. } => format_expression(active, options, cfa),
                LocalLocation::OptimizedOut { .. } => "<optimized out>".to_string(),
                LocalLocation::NoLocation => "<no location>".to_string(),
                LocalLocation::Failed(err) => format!("<error: {err}>"),
            };
            let _ = writeln!(out, "    {role} {}: {location}", local.name);
        }
    }
    out
}

fn register(number: u16, options: &FormatOptions) -> String
{
    if options.friendly_names {
        register_display(options.architecture, u64::from(number))
    } else {
        format!("r{number}")
    }
}

fn register_rule(rule: &RegisterRule, options: &FormatOptions) -> String
{
    match rule {
        RegisterRule::Undefined => "undefined".to_string(),
        RegisterRule::SameValue => "same".to_string(),
        RegisterRule::Offset(offset) => format!("[cfa{offset:+}]"),
        RegisterRule::ValOffset(offset) => format!("cfa{offset:+}"),
        RegisterRule::Register(source) => register(*source, options),
        RegisterRule::Expression(ops) => format!("[{}]", format_expression(ops, options, None)),
        RegisterRule::ValExpression(ops) => format_expression(ops, options, None),
        RegisterRule::Architectural => "architectural".to_string(),
    }
}

pub fn unwind_row(cie: &Cie, fde: &Fde, row: &DecodedFrameRow, options: &FormatOptions) -> String
{
    let mut out = String::new();
    let _ = writeln!(
        out,
        "FDE {:#x} [{:#x}, {:#x}) CIE {:#x} augmentation {:?}",
        fde.offset,
        fde.initial_location,
        fde.end(),
        cie.offset,
        cie.augmentation
    );
    let cfa = match &row.cfa {
        CfaRule::Expression(ops) => format!("[{}]", format_expression(ops, options, None)),
        rule => rule.describe_cfa(options).unwrap_or_default(),
    };
    let _ = writeln!(out, "row [{:#x}, {:#x}) cfa={cfa}", row.pc, row.end);
    for (number, rule) in &row.registers {
        let _ = writeln!(out, "    {} = {}", register(*number, options), register_rule(rule, options));
    }
    if row.args_size != 0 {
        let _ = writeln!(out, "    args_size = {}", row.args_size);
    }
    if row.return_address_signed {
        let _ = writeln!(out, "    return address signed");
    }
    out
}

pub fn compact_entry(entry: &CompactUnwindEntry, options: &FormatOptions) -> String
{
    let mut out = format!(
        "[{:#x}, {:#x}) {:#010x} {}",
        entry.address, entry.end, entry.encoding.0, entry.command
    );
    if let Some(cfa_register) = entry.cfa_register {
        let _ = write!(out, " cfa={}{:+}", register(cfa_register, options), entry.cfa_offset);
    }
    for (number, offset) in &entry.saved_registers {
        let _ = write!(out, " {}=[cfa{offset:+}]", register(*number, options));
    }
    if let Some(personality) = entry.personality {
        let _ = write!(out, " personality={personality:#x}");
    }
    if let Some(lsda) = entry.lsda {
        let _ = write!(out, " lsda={lsda:#x}");
    }
    out
}
