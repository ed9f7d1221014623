//! Tests for call frame information lookups over a `.debug_frame` section

use dwarfscope_core::cfi::{CallFrameInfo, CfaRule, CfiInstruction, CfiKind, CfiSection, RegisterRule};
use dwarfscope_core::{DecodeError, RunTimeEndian};

/// One CIE (version 1, code align 1, data align -8, return address r16)
/// and one FDE for `[0x2000, 0x2100)`:
/// `def_cfa r7+16; advance_loc 0x10; offset r6 at cfa-8`.
fn debug_frame() -> Vec<u8>
{
    let mut data = Vec::new();
    data.extend_from_slice(&12u32.to_le_bytes());
    data.extend_from_slice(&u32::MAX.to_le_bytes());
    data.extend_from_slice(&[1, 0, 0x01, 0x78, 0x10, 0x00, 0x00, 0x00]);

    data.extend_from_slice(&28u32.to_le_bytes());
    data.extend_from_slice(&0u32.to_le_bytes());
    data.extend_from_slice(&0x2000u64.to_le_bytes());
    data.extend_from_slice(&0x100u64.to_le_bytes());
    data.extend_from_slice(&[0x0c, 0x07, 0x10, 0x50, 0x86, 0x01, 0x00, 0x00]);
    data
}

fn call_frames() -> CallFrameInfo
{
    let section = CfiSection::parse(&debug_frame(), CfiKind::DebugFrame, 8, RunTimeEndian::Little, 0).unwrap();
    CallFrameInfo::from_sections(vec![section])
}

#[test]
fn test_rows_at_entry_and_after_prologue()
{
    let cfi = call_frames();

    let entry = cfi.row_for_address(0x2000).unwrap();
    assert_eq!(entry.cfa, CfaRule::RegisterOffset { register: 7, offset: 16 });
    assert_eq!(entry.register(6), None);

    let body = cfi.row_for_address(0x2020).unwrap();
    assert_eq!(body.cfa, CfaRule::RegisterOffset { register: 7, offset: 16 });
    assert_eq!(body.register(6), Some(&RegisterRule::Offset(-8)));
    assert_eq!((body.pc, body.end), (0x2010, 0x2100));
}

#[test]
fn test_address_outside_every_fde_is_not_found()
{
    let cfi = call_frames();
    for pc in [0x1fff, 0x2100, 0] {
        let err = cfi.row_for_address(pc).unwrap_err();
        assert!(matches!(err, DecodeError::NoFrameInfo { pc: reported } if reported == pc));
        assert!(err.is_not_found());
    }
}

#[test]
fn test_fde_instructions_decode()
{
    let cfi = call_frames();
    let (cie, fde) = cfi.entries_for_address(0x2050).unwrap();
    assert_eq!(cie.data_alignment_factor, -8);
    assert_eq!(cie.return_address_register, 16);
    assert_eq!(fde.end(), 0x2100);

    let listed = cfi.instructions_for_address(0x2050).unwrap();
    assert_eq!(listed.initial, vec![CfiInstruction::Nop; 3]);
    assert_eq!(listed.body[0], CfiInstruction::DefCfa { register: 7, offset: 16 });
    assert_eq!(listed.body[1], CfiInstruction::AdvanceLoc { delta: 0x10 });
    assert_eq!(listed.body[2], CfiInstruction::Offset { register: 6, offset: -8 });
    assert_eq!(listed.body[2].to_string(), "DW_CFA_offset r6, cfa-8");
}

#[test]
fn test_truncated_section_is_malformed()
{
    let mut data = debug_frame();
    data.truncate(data.len() - 4);
    let err = CfiSection::parse(&data, CfiKind::DebugFrame, 8, RunTimeEndian::Little, 0).unwrap_err();
    assert!(matches!(err, DecodeError::UnexpectedEof { .. }), "{err}");
}
