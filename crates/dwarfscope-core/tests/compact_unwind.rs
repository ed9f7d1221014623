//! Tests for `__unwind_info` lookups on x86_64 encodings

use std::collections::BTreeMap;

use dwarfscope_core::compact_unwind::{lehmer, rank, unrank, CompactCommand, CompactEncoding};
use dwarfscope_core::{Architecture, CompactUnwindInfo, DecodeError, ErrorKind, RunTimeEndian};

/// No globals or personalities; one regular page over `[0x1000, 0x1400)`:
/// - `0x1000` rbp frame, rbx and r12 saved two words below rbp
/// - `0x1100` frameless, 4 words of stack, nothing saved
/// - `0x1200` frameless with one saved register
fn section() -> Vec<u8>
{
    let mut data = Vec::new();
    let put = |data: &mut Vec<u8>, value: u32| data.extend_from_slice(&value.to_le_bytes());

    for value in [1, 28, 0, 28, 0, 28, 2] {
        put(&mut data, value);
    }
    for value in [0x1000, 52, 52, 0x1400, 0, 52] {
        put(&mut data, value);
    }
    assert_eq!(data.len(), 52);
    put(&mut data, 2);
    data.extend_from_slice(&8u16.to_le_bytes());
    data.extend_from_slice(&3u16.to_le_bytes());
    for (address, encoding) in [(0x1000, 0x8102_0011), (0x1100, 0x0204_0000), (0x1200, 0x0204_0400)] {
        put(&mut data, address);
        put(&mut data, encoding);
    }
    data
}

#[test]
fn test_frame_encoding_recovers_saved_registers()
{
    let data = section();
    let info = CompactUnwindInfo::parse(&data, Architecture::X86_64, RunTimeEndian::Little).unwrap();
    let entry = info.lookup(0x1050).unwrap().unwrap();

    assert_eq!((entry.address, entry.end), (0x1000, 0x1100));
    assert_eq!(entry.command, CompactCommand::Frame);
    assert!(entry.has_frame && entry.is_function_start);
    assert!(!entry.has_lsda && entry.lsda.is_none());
    assert_eq!((entry.cfa_register, entry.cfa_offset), (Some(6), 16));
    assert_eq!(
        entry.saved_registers,
        BTreeMap::from([(3, -32), (6, -16), (12, -24), (16, -8)])
    );
}

#[test]
fn test_frameless_without_registers()
{
    let data = section();
    let info = CompactUnwindInfo::parse(&data, Architecture::X86_64, RunTimeEndian::Little).unwrap();
    let entry = info.lookup(0x1100).unwrap().unwrap();

    assert_eq!(entry.command, CompactCommand::Frameless);
    assert!(!entry.has_frame);
    assert_eq!((entry.cfa_register, entry.cfa_offset), (Some(7), 32));
    assert_eq!(entry.saved_registers, BTreeMap::from([(16, -8)]));
}

#[test]
fn test_frameless_register_list_is_not_implemented()
{
    let data = section();
    let info = CompactUnwindInfo::parse(&data, Architecture::X86_64, RunTimeEndian::Little).unwrap();

    let record = info.record_for_address(0x1250).unwrap().unwrap();
    assert_eq!(record.encoding, CompactEncoding(0x0204_0400));
    assert_eq!(record.encoding.x86_register_count(), 1);

    let err = info.lookup(0x1250).unwrap_err();
    assert!(matches!(err, DecodeError::NotImplemented(_)), "{err}");
    assert_eq!(err.kind(), ErrorKind::Unsupported);
}

#[test]
fn test_addresses_outside_pages()
{
    let data = section();
    let info = CompactUnwindInfo::parse(&data, Architecture::X86_64, RunTimeEndian::Little).unwrap();
    assert!(info.lookup(0x0fff).unwrap().is_none());
    assert!(info.lookup(0x1400).unwrap().is_none());
    assert!(info.lookup(u64::MAX).unwrap().is_none());
    assert_eq!(info.entries().unwrap().len(), 3);
}

#[test]
fn test_unrank_yields_permutations()
{
    for n in 1..=6usize {
        for code in 0..lehmer::factorial(n) {
            let mut permutation = unrank(n, code);
            assert_eq!(rank(&permutation), code);
            permutation.sort_unstable();
            let expected: Vec<u8> = (0..n as u8).collect();
            assert_eq!(permutation, expected);
        }
    }
}
