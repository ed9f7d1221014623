//! Tests for expression decoding and formatting through the public API

use dwarfscope_core::expr::{decode_expression, format_expression, ExpressionProfile, FormatOptions, Operation};
use dwarfscope_core::{Architecture, DecodeError, RunTimeEndian};

fn modern() -> ExpressionProfile
{
    ExpressionProfile::new(8, RunTimeEndian::Little, 4)
}

/// First word of every rendered operation.
fn rendered_mnemonics(text: &str) -> Vec<String>
{
    text.split("; ")
        .filter(|part| !part.starts_with('+'))
        .map(|part| part.split_whitespace().next().unwrap_or_default().to_string())
        .collect()
}

fn mnemonics(ops: &[Operation]) -> Vec<String>
{
    ops.iter().map(|op| op.mnemonic.to_string()).collect()
}

const BLOBS: &[&[u8]] = &[
    &[0x91, 0x70],
    &[0x56],
    &[0x77, 0x10, 0x06, 0x23, 0x08],
    &[0x03, 0x00, 0x10, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x9f],
    &[0x9c, 0x11, 0x08, 0x22],
    &[0x50, 0x93, 0x08, 0x51, 0x93, 0x08],
    &[0x92, 0x11, 0x7f, 0x06],
];

#[test]
fn test_formatting_preserves_decoded_sequence()
{
    let options = [
        FormatOptions::new(Architecture::X86_64),
        FormatOptions {
            hex: true,
            address_delta: 0x7000,
            ..FormatOptions::new(Architecture::Arm64)
        },
        FormatOptions {
            friendly_names: false,
            ..FormatOptions::new(Architecture::X86)
        },
    ];
    for bytes in BLOBS {
        let ops = decode_expression(bytes, &modern()).unwrap();
        let before = ops.clone();
        for opts in &options {
            let text = format_expression(&ops, opts, None);
            assert_eq!(rendered_mnemonics(&text), mnemonics(&ops), "{text}");
        }
        assert_eq!(ops, before);
        assert_eq!(decode_expression(bytes, &modern()).unwrap(), before);
    }
}

#[test]
fn test_truncation_is_display_only()
{
    let ops = decode_expression(&[0x50, 0x93, 0x08, 0x51, 0x93, 0x08], &modern()).unwrap();
    let opts = FormatOptions {
        max_ops: Some(2),
        ..FormatOptions::default()
    };
    assert_eq!(format_expression(&ops, &opts, None), "DW_OP_reg0 (rax); DW_OP_piece 8; +2 more");
    assert_eq!(ops.len(), 4);
}

#[test]
fn test_nested_entry_value_renders_inner_registers()
{
    let ops = decode_expression(&[0xa3, 0x01, 0x55, 0x9f], &modern()).unwrap();
    let text = format_expression(&ops, &FormatOptions::default(), None);
    assert_eq!(text, "DW_OP_entry_value (DW_OP_reg5 (rdi)); DW_OP_stack_value");
}

#[test]
fn test_unknown_opcode_is_malformed()
{
    let err = decode_expression(&[0x10, 0x01, 0x07], &modern()).unwrap_err();
    assert!(matches!(err, DecodeError::UnknownOpcode { opcode: 0x07, offset: 2 }));
    assert_eq!(err.kind(), dwarfscope_core::ErrorKind::Malformed);
}

#[test]
fn test_legacy_profile_uses_legacy_table()
{
    let profile = ExpressionProfile::new(4, RunTimeEndian::Little, 1);
    let ops = decode_expression(&[0x01, 0x03, 0x00, 0x00, 0x00], &profile).unwrap();
    assert_eq!(mnemonics(&ops), ["OP_REG"]);
    let text = format_expression(&ops, &FormatOptions::new(Architecture::X86), None);
    assert_eq!(text, "OP_REG ebx");
}
