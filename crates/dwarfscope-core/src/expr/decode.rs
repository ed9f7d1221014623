//! Expression bytecode decoder.
//!
//! Modern units (DWARF 2..5) use the standard opcode table plus the GNU and
//! WebAssembly extensions. Legacy DWARF 1 units use the `OP_*` atom set, which
//! reuses some byte values with different meanings, so the two tables are kept
//! apart and selected by the profile's version.

use gimli::DwOp;
use tracing::debug;

use super::{ExpressionProfile, Operand, Operation};
use crate::error::{DecodeError, Result};
use crate::reader::ByteReader;

/// Decode a complete expression.
///
/// Decoding consumes the whole buffer. An opcode outside the table fails with
/// [`DecodeError::UnknownOpcode`] and a truncated operand with
/// [`DecodeError::UnexpectedEof`]; no partial result is returned.
pub fn decode_expression(bytes: &[u8], profile: &ExpressionProfile) -> Result<Vec<Operation>>
{
    if profile.is_legacy() {
        decode_legacy(bytes, profile)
    } else {
        decode_modern(bytes, profile)
    }
}

/// Mnemonic of a DWARF 2+ opcode, or `None` if the decoder does not know it.
#[must_use]
pub fn modern_mnemonic(opcode: u8) -> Option<&'static str>
{
    match opcode {
        0x03 | 0x06 | 0x08..=0xa9 => Some(DwOp(opcode).static_string().unwrap_or("DW_OP_unknown")),
        0xe0 => Some("DW_OP_GNU_push_tls_address"),
        0xed => Some("DW_OP_WASM_location"),
        0xf0 => Some("DW_OP_GNU_uninit"),
        0xf2 => Some("DW_OP_GNU_implicit_pointer"),
        0xf3 => Some("DW_OP_GNU_entry_value"),
        0xf4 => Some("DW_OP_GNU_const_type"),
        0xf5 => Some("DW_OP_GNU_regval_type"),
        0xf6 => Some("DW_OP_GNU_deref_type"),
        0xf7 => Some("DW_OP_GNU_convert"),
        0xf9 => Some("DW_OP_GNU_reinterpret"),
        0xfa => Some("DW_OP_GNU_parameter_ref"),
        0xfb => Some("DW_OP_GNU_addr_index"),
        0xfc => Some("DW_OP_GNU_const_index"),
        0xfd => Some("DW_OP_GNU_variable_value"),
        _ => None,
    }
}

/// Mnemonic of a DWARF 1 location atom.
#[must_use]
pub fn legacy_mnemonic(opcode: u8) -> Option<&'static str>
{
    match opcode {
        0x01 => Some("OP_REG"),
        0x02 => Some("OP_BASEREG"),
        0x03 => Some("OP_ADDR"),
        0x04 => Some("OP_CONST"),
        0x05 => Some("OP_DEREF2"),
        0x06 => Some("OP_DEREF4"),
        0x07 => Some("OP_ADD"),
        0xe0 => Some("OP_MULT"),
        _ => None,
    }
}

fn decode_modern(bytes: &[u8], profile: &ExpressionProfile) -> Result<Vec<Operation>>
{
    let mut reader = ByteReader::new(bytes, profile.endian);
    let mut ops = Vec::new();
    while !reader.is_empty() {
        let offset = reader.position();
        let opcode = reader.u8("opcode")?;
        let Some(mnemonic) = modern_mnemonic(opcode) else {
            debug!(opcode, offset, "unknown DWARF expression opcode");
            return Err(DecodeError::UnknownOpcode { opcode, offset });
        };
        let operands = modern_operands(opcode, &mut reader, profile)?;
        ops.push(Operation {
            opcode,
            mnemonic,
            operands,
            offset,
        });
    }
    Ok(ops)
}

fn modern_operands(opcode: u8, r: &mut ByteReader<'_>, profile: &ExpressionProfile) -> Result<Vec<Operand>>
{
    use Operand::{Block, Nested, Signed, Unsigned};

    const CTX: &str = "expression operand";
    // DWARF 2 sized debug_info references like addresses.
    let ref_size = if profile.version <= 2 {
        profile.address_size
    } else {
        profile.offset_size
    };

    let operands = match opcode {
        0x03 => vec![Unsigned(r.address(profile.address_size, CTX)?)],
        // const1u, pick, deref_size, xderef_size
        0x08 | 0x15 | 0x94 | 0x95 => vec![Unsigned(r.u8(CTX)?.into())],
        0x09 => vec![Signed(r.i8(CTX)?.into())],
        // const2u, call2
        0x0a | 0x98 => vec![Unsigned(r.u16(CTX)?.into())],
        0x0b => vec![Signed(r.i16(CTX)?.into())],
        // const4u, call4, GNU_parameter_ref
        0x0c | 0x99 | 0xfa => vec![Unsigned(r.u32(CTX)?.into())],
        0x0d => vec![Signed(r.i32(CTX)?.into())],
        0x0e => vec![Unsigned(r.u64(CTX)?)],
        0x0f => vec![Signed(r.i64(CTX)?)],
        // constu, plus_uconst, regx, piece, addrx, constx, convert, reinterpret
        0x10 | 0x23 | 0x90 | 0x93 | 0xa1 | 0xa2 | 0xa8 | 0xa9 | 0xf7 | 0xf9 | 0xfb | 0xfc => {
            vec![Unsigned(r.uleb(CTX)?)]
        }
        // consts, breg0..31, fbreg
        0x11 | 0x70..=0x8f | 0x91 => vec![Signed(r.sleb(CTX)?)],
        // bra, skip
        0x28 | 0x2f => vec![Signed(r.i16(CTX)?.into())],
        0x92 => vec![Unsigned(r.uleb(CTX)?), Signed(r.sleb(CTX)?)],
        // bit_piece, regval_type
        0x9d | 0xa5 | 0xf5 => vec![Unsigned(r.uleb(CTX)?), Unsigned(r.uleb(CTX)?)],
        // call_ref, GNU_variable_value
        0x9a | 0xfd => vec![Unsigned(r.sized_offset(ref_size, CTX)?)],
        0x9e => {
            let len = r.uleb(CTX)?;
            vec![Unsigned(len), Block(r.block(len, CTX)?.to_vec())]
        }
        0xa0 | 0xf2 => vec![Unsigned(r.sized_offset(ref_size, CTX)?), Signed(r.sleb(CTX)?)],
        0xa3 | 0xf3 => {
            let len = r.uleb(CTX)?;
            let blob = r.block(len, CTX)?;
            vec![Nested(decode_modern(blob, profile)?)]
        }
        0xa4 | 0xf4 => {
            let type_offset = r.uleb(CTX)?;
            let len = r.u8(CTX)?;
            vec![Unsigned(type_offset), Block(r.bytes(usize::from(len), CTX)?.to_vec())]
        }
        // deref_type, xderef_type
        0xa6 | 0xa7 | 0xf6 => vec![Unsigned(r.u8(CTX)?.into()), Unsigned(r.uleb(CTX)?)],
        0xed => {
            let kind = r.u8(CTX)?;
            // Kind 3 (global, fixed) carries a 4-byte index; the rest use ULEB128.
            let index = if kind == 3 {
                u64::from(r.u32(CTX)?)
            } else {
                r.uleb(CTX)?
            };
            vec![Unsigned(kind.into()), Unsigned(index)]
        }
        _ => Vec::new(),
    };
    Ok(operands)
}

fn decode_legacy(bytes: &[u8], profile: &ExpressionProfile) -> Result<Vec<Operation>>
{
    const CTX: &str = "location atom operand";

    let mut reader = ByteReader::new(bytes, profile.endian);
    let mut ops = Vec::new();
    while !reader.is_empty() {
        let offset = reader.position();
        let opcode = reader.u8("location atom")?;
        let Some(mnemonic) = legacy_mnemonic(opcode) else {
            debug!(opcode, offset, "unknown DWARF 1 location atom");
            return Err(DecodeError::UnknownOpcode { opcode, offset });
        };
        let operands = match opcode {
            0x01 | 0x02 | 0x04 => vec![Operand::Unsigned(reader.u32(CTX)?.into())],
            0x03 => vec![Operand::Unsigned(reader.address(profile.address_size, CTX)?)],
            _ => Vec::new(),
        };
        ops.push(Operation {
            opcode,
            mnemonic,
            operands,
            offset,
        });
    }
    Ok(ops)
}

#[cfg(test)]
mod tests
{
    use gimli::RunTimeEndian;

    use super::*;

    fn modern() -> ExpressionProfile
    {
        ExpressionProfile::new(8, RunTimeEndian::Little, 4)
    }

    #[test]
    fn test_fbreg_and_stack_value()
    {
        let ops = decode_expression(&[0x91, 0x70, 0x9f], &modern()).unwrap();
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0].mnemonic, "DW_OP_fbreg");
        assert_eq!(ops[0].operands, vec![Operand::Signed(-16)]);
        assert_eq!(ops[1].mnemonic, "DW_OP_stack_value");
        assert_eq!(ops[1].offset, 2);
    }

    #[test]
    fn test_addr_uses_address_size()
    {
        let bytes = [0x03, 0x78, 0x56, 0x34, 0x12];
        let profile = ExpressionProfile::new(4, RunTimeEndian::Little, 3);
        let ops = decode_expression(&bytes, &profile).unwrap();
        assert_eq!(ops[0].operands, vec![Operand::Unsigned(0x1234_5678)]);

        let err = decode_expression(&bytes, &modern()).unwrap_err();
        assert!(matches!(err, DecodeError::UnexpectedEof { .. }));
    }

    #[test]
    fn test_register_families()
    {
        let ops = decode_expression(&[0x56, 0x77, 0x08, 0x92, 0x11, 0x7c], &modern()).unwrap();
        assert_eq!(ops[0].mnemonic, "DW_OP_reg6");
        assert!(ops[0].operands.is_empty());
        assert_eq!(ops[1].mnemonic, "DW_OP_breg7");
        assert_eq!(ops[1].operands, vec![Operand::Signed(8)]);
        assert_eq!(ops[2].mnemonic, "DW_OP_bregx");
        assert_eq!(ops[2].operands, vec![Operand::Unsigned(17), Operand::Signed(-4)]);
    }

    #[test]
    fn test_entry_value_nests()
    {
        let ops = decode_expression(&[0xa3, 0x01, 0x55, 0x9f], &modern()).unwrap();
        assert_eq!(ops[0].mnemonic, "DW_OP_entry_value");
        let Operand::Nested(inner) = &ops[0].operands[0] else {
            panic!("expected nested operand");
        };
        assert_eq!(inner.len(), 1);
        assert_eq!(inner[0].mnemonic, "DW_OP_reg5");

        let gnu = decode_expression(&[0xf3, 0x02, 0x75, 0x00], &modern()).unwrap();
        assert_eq!(gnu[0].mnemonic, "DW_OP_GNU_entry_value");
        assert!(matches!(&gnu[0].operands[0], Operand::Nested(v) if v[0].mnemonic == "DW_OP_breg5"));
    }

    #[test]
    fn test_implicit_value_and_const_type()
    {
        let ops = decode_expression(&[0x9e, 0x02, 0xaa, 0xbb, 0xa4, 0x2a, 0x01, 0x07], &modern()).unwrap();
        assert_eq!(ops[0].operands, vec![Operand::Unsigned(2), Operand::Block(vec![0xaa, 0xbb])]);
        assert_eq!(ops[1].mnemonic, "DW_OP_const_type");
        assert_eq!(ops[1].operands, vec![Operand::Unsigned(0x2a), Operand::Block(vec![0x07])]);
    }

    #[test]
    fn test_wasm_location()
    {
        let ops = decode_expression(&[0xed, 0x00, 0x02, 0xed, 0x03, 0x05, 0x00, 0x00, 0x00], &modern()).unwrap();
        assert_eq!(ops[0].operands, vec![Operand::Unsigned(0), Operand::Unsigned(2)]);
        assert_eq!(ops[1].operands, vec![Operand::Unsigned(3), Operand::Unsigned(5)]);
    }

    #[test]
    fn test_unknown_opcode_reports_offset()
    {
        let err = decode_expression(&[0x9f, 0x07], &modern()).unwrap_err();
        assert!(matches!(err, DecodeError::UnknownOpcode { opcode: 0x07, offset: 1 }));

        let err = decode_expression(&[0xff], &modern()).unwrap_err();
        assert!(matches!(err, DecodeError::UnknownOpcode { opcode: 0xff, offset: 0 }));
    }

    #[test]
    fn test_legacy_atoms()
    {
        let profile = ExpressionProfile::new(4, RunTimeEndian::Little, 1);
        let bytes = [0x02, 0x05, 0x00, 0x00, 0x00, 0x04, 0x08, 0x00, 0x00, 0x00, 0x07, 0xe0];
        let ops = decode_expression(&bytes, &profile).unwrap();
        let names: Vec<_> = ops.iter().map(|op| op.mnemonic).collect();
        assert_eq!(names, ["OP_BASEREG", "OP_CONST", "OP_ADD", "OP_MULT"]);
        assert_eq!(ops[0].operands, vec![Operand::Unsigned(5)]);
        assert_eq!(ops[3].offset, 11);
    }

    #[test]
    fn test_legacy_rejects_modern_opcodes()
    {
        let profile = ExpressionProfile::new(4, RunTimeEndian::Little, 1);
        let err = decode_expression(&[0x91, 0x70], &profile).unwrap_err();
        assert!(matches!(err, DecodeError::UnknownOpcode { opcode: 0x91, offset: 0 }));
    }

    #[test]
    fn test_empty_expression()
    {
        assert!(decode_expression(&[], &modern()).unwrap().is_empty());
    }
}
