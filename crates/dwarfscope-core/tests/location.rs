//! Tests for location and range resolution against a built unit

use dwarfscope_core::location::{LocationDescription, LocationListEntry, LocationResolver};
use dwarfscope_core::model::{AttrValue, Attribute, DebugInfo, Sections, UnitBuilder};
use dwarfscope_core::ranges::RangeResolver;
use dwarfscope_core::{Architecture, DecodeError, ErrorKind};
use gimli::constants::*;

fn pair(out: &mut Vec<u8>, begin: u64, end: u64)
{
    out.extend_from_slice(&begin.to_le_bytes());
    out.extend_from_slice(&end.to_le_bytes());
}

/// `[Base(0x1000), [0, 0x10) reg0, [0x10, 0x20) breg7 8]` in `.debug_loc`.
fn based_list() -> Vec<u8>
{
    let mut loc = Vec::new();
    pair(&mut loc, u64::MAX, 0x1000);
    pair(&mut loc, 0x0, 0x10);
    loc.extend_from_slice(&[1, 0, 0x50]);
    pair(&mut loc, 0x10, 0x20);
    loc.extend_from_slice(&[2, 0, 0x77, 0x08]);
    pair(&mut loc, 0, 0);
    loc
}

fn info_with(sections: Sections) -> (DebugInfo, u64)
{
    let mut b = UnitBuilder::new(4, 8);
    b.open(DW_TAG_compile_unit, [(DW_AT_name, AttrValue::from("loc.c"))]);
    let variable = b.leaf(
        DW_TAG_variable,
        [
            (DW_AT_name, AttrValue::from("x")),
            (DW_AT_location, AttrValue::SecOffset(0)),
        ],
    );
    let info = DebugInfo::new(Architecture::X86_64, sections, vec![b.finish()]);
    (info, variable)
}

#[test]
fn test_base_relative_list_lookup()
{
    let (info, variable) = info_with(Sections {
        debug_loc: based_list(),
        ..Sections::default()
    });
    let die = info.entry(variable).unwrap();
    let unit = die.unit();
    let attr = die.attribute(DW_AT_location).unwrap();

    let description = LocationResolver::for_unit(&info, unit).resolve(attr).unwrap();
    let LocationDescription::Ranged { entries, .. } = &description else {
        panic!("expected a location list");
    };
    assert_eq!(entries[0], LocationListEntry::BaseAddress(0x1000));

    let at = |address| {
        description
            .expression_at(address, unit.base_address())
            .unwrap()
            .map(|ops| ops[0].mnemonic)
    };
    assert_eq!(at(0x1005), Some("DW_OP_reg0"));
    assert_eq!(at(0x1015), Some("DW_OP_breg7"));
    assert_eq!(at(0x1025), None);
}

#[test]
fn test_relative_location_without_base_is_an_error()
{
    let mut loc = Vec::new();
    pair(&mut loc, 0x0, 0x10);
    loc.extend_from_slice(&[1, 0, 0x50]);
    pair(&mut loc, 0, 0);
    let (info, variable) = info_with(Sections {
        debug_loc: loc,
        ..Sections::default()
    });
    let die = info.entry(variable).unwrap();
    let description = LocationResolver::for_unit(&info, die.unit())
        .resolve(die.attribute(DW_AT_location).unwrap())
        .unwrap();

    let err = description.expression_at(0x8, None).unwrap_err();
    assert!(matches!(err, DecodeError::NoBaseAddress { offset: 0 }), "{err}");
    assert_eq!(err.kind(), ErrorKind::MissingPrerequisite);

    let ops = description.expression_at(0x1008, Some(0x1000)).unwrap().unwrap();
    assert_eq!(ops[0].mnemonic, "DW_OP_reg0");
}

#[test]
fn test_resolution_is_structurally_stable()
{
    let (info, variable) = info_with(Sections {
        debug_loc: based_list(),
        ..Sections::default()
    });
    let die = info.entry(variable).unwrap();
    let resolver = LocationResolver::for_unit(&info, die.unit());
    let attr = die.attribute(DW_AT_location).unwrap();
    let first = resolver.resolve(attr).unwrap();
    let second = resolver.resolve(attr).unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_missing_section_is_a_prerequisite_error()
{
    let (info, variable) = info_with(Sections::default());
    let die = info.entry(variable).unwrap();
    let err = LocationResolver::for_unit(&info, die.unit())
        .resolve(die.attribute(DW_AT_location).unwrap())
        .unwrap_err();
    assert!(matches!(err, DecodeError::MissingSection(_)));
    assert!(!err.is_not_found());
}

#[test]
fn test_truncated_list_reports_parse_failure()
{
    let mut loc = based_list();
    loc.truncate(40);
    let (info, variable) = info_with(Sections {
        debug_loc: loc,
        ..Sections::default()
    });
    let die = info.entry(variable).unwrap();
    let err = LocationResolver::for_unit(&info, die.unit())
        .resolve(die.attribute(DW_AT_location).unwrap())
        .unwrap_err();
    assert!(matches!(err, DecodeError::LocationParse { offset: 0, ref bytes, .. } if bytes.len() == 32));
    assert_eq!(err.kind(), dwarfscope_core::ErrorKind::Malformed);
}

#[test]
fn test_relative_ranges_need_a_base()
{
    let mut ranges = Vec::new();
    pair(&mut ranges, 0x10, 0x20);
    pair(&mut ranges, 0, 0);

    let mut b = UnitBuilder::new(4, 8);
    b.open(DW_TAG_compile_unit, Vec::<Attribute>::new());
    let unit = b.finish();
    let sections = Sections {
        debug_ranges: ranges,
        ..Sections::default()
    };
    let list = RangeResolver::new(&unit, &sections, None)
        .resolve(&Attribute::new(DW_AT_ranges, AttrValue::SecOffset(0)))
        .unwrap();
    assert_eq!(unit.base_address(), None);
    let err = list.absolute_ranges(unit.base_address()).unwrap_err();
    assert!(matches!(err, DecodeError::NoBaseAddress { offset: 0 }));
}
