//! # Location Resolver
//!
//! Turns a location-class attribute into either a single expression or a
//! location list.
//!
//! ## Layouts
//!
//! - **DWARF 2-4** (`.debug_loc`): pairs of addresses relative to the running
//!   base, a base-selection entry whose first address is all ones, a `(0, 0)`
//!   terminator, and a 2-byte expression length.
//! - **DWARF 5** (`.debug_loclists`): `DW_LLE_*` tagged entries; the indexed
//!   kinds go through the unit's `.debug_addr` table.
//!
//! Relative ranges resolve against the most recent base-address entry, or
//! the unit base when none has been seen.

use gimli::constants;
use tracing::trace;

use crate::error::{DecodeError, Result};
use crate::expr::{decode_expression, Operation};
use crate::model::{AddressTable, AttrValue, Attribute, CompileUnit, DebugInfo, Sections};
use crate::reader::ByteReader;

/// Number of raw bytes captured in a [`DecodeError::LocationParse`].
const DIAGNOSTIC_WINDOW: usize = 32;

/// One entry of a location list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocationListEntry
{
    /// Base for the relative ranges that follow.
    BaseAddress(u64),
    Range
    {
        begin: u64,
        end: u64,
        /// `begin`/`end` are addresses rather than base offsets.
        is_absolute: bool,
        expr: Vec<Operation>,
    },
    /// `DW_LLE_default_location`: applies where no range matches.
    Default(Vec<Operation>),
}

/// Result of resolving a location attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocationDescription
{
    Single(Vec<Operation>),
    Ranged
    {
        /// Offset of the list in `.debug_loc` or `.debug_loclists`.
        offset: u64,
        entries: Vec<LocationListEntry>,
    },
}

impl LocationDescription
{
    /// The expression in effect at `address`, `None` when nothing covers it.
    ///
    /// `unit_base` seeds the running base. Like
    /// [`RangeList::absolute_ranges`](crate::ranges::RangeList::absolute_ranges),
    /// a relative entry reached before any base is known fails with
    /// [`DecodeError::NoBaseAddress`]. The default entry only applies when no
    /// range covers the address.
    pub fn expression_at(&self, address: u64, unit_base: Option<u64>) -> Result<Option<&[Operation]>>
    {
        let (offset, entries) = match self {
            LocationDescription::Single(ops) => return Ok(Some(ops)),
            LocationDescription::Ranged { offset, entries } => (*offset, entries),
        };

        let mut base = unit_base;
        let mut fallback = None;
        for entry in entries {
            match entry {
                LocationListEntry::BaseAddress(new_base) => base = Some(*new_base),
                LocationListEntry::Range {
                    begin,
                    end,
                    is_absolute,
                    expr,
                } => {
                    let shift = if *is_absolute {
                        0
                    } else {
                        base.ok_or(DecodeError::NoBaseAddress { offset })?
                    };
                    let (begin, end) = (begin.wrapping_add(shift), end.wrapping_add(shift));
                    if (begin..end).contains(&address) {
                        return Ok(Some(expr));
                    }
                }
                LocationListEntry::Default(expr) => fallback = Some(expr.as_slice()),
            }
        }
        Ok(fallback)
    }

    /// `true` for a list with no entries at all.
    #[must_use]
    pub fn is_empty_list(&self) -> bool
    {
        matches!(self, LocationDescription::Ranged { entries, .. } if entries.is_empty())
    }
}

/// Whether `attribute` refers into a list section rather than holding the
/// data inline.
pub(crate) fn list_offset(attribute: &Attribute, version: u16) -> Option<u64>
{
    match attribute.value {
        AttrValue::SecOffset(offset) => Some(offset),
        // Before DWARF 4 list offsets were encoded with the data forms.
        AttrValue::Udata(offset)
            if version <= 3 && (attribute.form == constants::DW_FORM_data4 || attribute.form == constants::DW_FORM_data8) =>
        {
            Some(offset)
        }
        _ => None,
    }
}

/// Cursor positioned at `offset` inside `section`.
pub(crate) fn section_reader<'a>(
    section: &'a [u8],
    offset: u64,
    unit: &CompileUnit,
    name: &'static str,
) -> Result<ByteReader<'a>>
{
    if section.is_empty() {
        return Err(DecodeError::MissingSection(name));
    }
    let start = usize::try_from(offset)
        .ok()
        .filter(|&start| start < section.len())
        .ok_or_else(|| DecodeError::malformed(offset, format!("offset past the end of {name}")))?;
    Ok(ByteReader::at(&section[start..], unit.endian(), offset))
}

/// The all-ones value that marks a base-address selection entry.
pub(crate) fn max_address(address_size: u8) -> u64
{
    match address_size {
        1 => 0xff,
        2 => 0xffff,
        4 => 0xffff_ffff,
        _ => u64::MAX,
    }
}

pub(crate) fn indexed(table: Option<&AddressTable<'_>>, index: u64) -> Result<u64>
{
    table.ok_or(DecodeError::NoAddressTable)?.get(index)
}

/// Resolves location attributes of one unit.
pub struct LocationResolver<'a>
{
    unit: &'a CompileUnit,
    sections: &'a Sections,
    addresses: Option<AddressTable<'a>>,
}

impl<'a> LocationResolver<'a>
{
    #[must_use]
    pub fn new(unit: &'a CompileUnit, sections: &'a Sections, address_table: Option<AddressTable<'a>>) -> Self
    {
        Self {
            unit,
            sections,
            addresses: address_table,
        }
    }

    /// Resolver wired to `info`'s sections and `unit`'s address table.
    #[must_use]
    pub fn for_unit(info: &'a DebugInfo, unit: &'a CompileUnit) -> Self
    {
        Self::new(unit, info.sections(), Some(info.address_table(unit)))
    }

    /// Resolve a location attribute (`DW_AT_location`, `DW_AT_frame_base`, ...).
    pub fn resolve(&self, attribute: &Attribute) -> Result<LocationDescription>
    {
        let profile = self.unit.profile();
        if let AttrValue::Block(bytes) = &attribute.value {
            return decode_expression(bytes, profile).map(LocationDescription::Single);
        }

        let flavor = self.unit.flavor();
        if !flavor.has_location_lists() {
            return Err(DecodeError::Unsupported(format!(
                "{} with form {} in a DWARF 1 unit",
                attribute.name, attribute.form
            )));
        }
        let Some(offset) = list_offset(attribute, self.unit.version()) else {
            return Err(DecodeError::Unsupported(format!(
                "{} with form {}",
                attribute.name, attribute.form
            )));
        };

        let (section, name): (&[u8], &'static str) = if flavor.uses_list_sections() {
            (&self.sections.debug_loclists, ".debug_loclists")
        } else {
            (&self.sections.debug_loc, ".debug_loc")
        };
        let reader = section_reader(section, offset, self.unit, name)?;

        let parsed = if flavor.uses_list_sections() {
            self.parse_loclists(reader)
        } else {
            self.parse_loc(reader)
        };
        parsed
            .map(|entries| LocationDescription::Ranged { offset, entries })
            .map_err(|err| {
                let window = usize::try_from(offset)
                    .ok()
                    .and_then(|start| section.get(start..))
                    .map(|tail| tail[..tail.len().min(DIAGNOSTIC_WINDOW)].to_vec())
                    .unwrap_or_default();
                trace!(attribute = %attribute.name, offset, %err, "location list failed to parse");
                DecodeError::LocationParse {
                    attribute: attribute.name,
                    offset,
                    bytes: window,
                    reason: err.to_string(),
                }
            })
    }

    fn parse_loc(&self, mut r: ByteReader<'_>) -> Result<Vec<LocationListEntry>>
    {
        const CTX: &str = ".debug_loc entry";
        let size = self.unit.address_size();
        let profile = self.unit.profile();
        let mut entries = Vec::new();
        loop {
            let begin = r.address(size, CTX)?;
            let end = r.address(size, CTX)?;
            if begin == 0 && end == 0 {
                break;
            }
            if begin == max_address(size) {
                entries.push(LocationListEntry::BaseAddress(end));
                continue;
            }
            let len = r.u16(CTX)?;
            let expr = decode_expression(r.bytes(usize::from(len), CTX)?, profile)?;
            entries.push(LocationListEntry::Range {
                begin,
                end,
                is_absolute: false,
                expr,
            });
        }
        Ok(entries)
    }

    fn parse_loclists(&self, mut r: ByteReader<'_>) -> Result<Vec<LocationListEntry>>
    {
        const CTX: &str = ".debug_loclists entry";
        let size = self.unit.address_size();
        let profile = self.unit.profile();
        let table = self.addresses.as_ref();
        let mut entries = Vec::new();
        loop {
            let at = r.offset();
            let kind = r.u8(CTX)?;
            let (begin, end, is_absolute) = match constants::DwLle(kind) {
                constants::DW_LLE_end_of_list => break,
                constants::DW_LLE_base_addressx => {
                    entries.push(LocationListEntry::BaseAddress(indexed(table, r.uleb(CTX)?)?));
                    continue;
                }
                constants::DW_LLE_base_address => {
                    entries.push(LocationListEntry::BaseAddress(r.address(size, CTX)?));
                    continue;
                }
                constants::DW_LLE_default_location => {
                    let len = r.uleb(CTX)?;
                    entries.push(LocationListEntry::Default(decode_expression(r.block(len, CTX)?, profile)?));
                    continue;
                }
                constants::DW_LLE_startx_endx => {
                    let begin = indexed(table, r.uleb(CTX)?)?;
                    (begin, indexed(table, r.uleb(CTX)?)?, true)
                }
                constants::DW_LLE_startx_length => {
                    let begin = indexed(table, r.uleb(CTX)?)?;
                    (begin, begin.wrapping_add(r.uleb(CTX)?), true)
                }
                constants::DW_LLE_offset_pair => (r.uleb(CTX)?, r.uleb(CTX)?, false),
                constants::DW_LLE_start_end => (r.address(size, CTX)?, r.address(size, CTX)?, true),
                constants::DW_LLE_start_length => {
                    let begin = r.address(size, CTX)?;
                    (begin, begin.wrapping_add(r.uleb(CTX)?), true)
                }
                _ => return Err(DecodeError::malformed(at, format!("unknown DW_LLE kind 0x{kind:02x}"))),
            };
            let len = r.uleb(CTX)?;
            let expr = decode_expression(r.block(len, CTX)?, profile)?;
            entries.push(LocationListEntry::Range {
                begin,
                end,
                is_absolute,
                expr,
            });
        }
        Ok(entries)
    }
}

#[cfg(test)]
mod tests
{
    use gimli::constants::*;

    use super::*;
    use crate::model::UnitBuilder;

    fn unit(version: u16) -> CompileUnit
    {
        let mut b = UnitBuilder::new(version, 8);
        b.open(DW_TAG_compile_unit, [(DW_AT_low_pc, AttrValue::Address(0x400))]);
        b.finish()
    }

    fn loc_attr(offset: u64) -> Attribute
    {
        Attribute::new(DW_AT_location, AttrValue::SecOffset(offset))
    }

    fn pair(out: &mut Vec<u8>, begin: u64, end: u64)
    {
        out.extend_from_slice(&begin.to_le_bytes());
        out.extend_from_slice(&end.to_le_bytes());
    }

    #[test]
    fn test_exprloc_is_single()
    {
        let unit = unit(4);
        let sections = Sections::default();
        let resolver = LocationResolver::new(&unit, &sections, None);
        let attr = Attribute::new(DW_AT_location, AttrValue::Block(vec![0x91, 0x68]));
        let LocationDescription::Single(ops) = resolver.resolve(&attr).unwrap() else {
            panic!("expected a single expression");
        };
        assert_eq!(ops[0].mnemonic, "DW_OP_fbreg");
    }

    #[test]
    fn test_debug_loc_with_base_selection()
    {
        let mut loc = vec![0u8; 4];
        pair(&mut loc, u64::MAX, 0x2000);
        pair(&mut loc, 0x0, 0x8);
        loc.extend_from_slice(&[1, 0, 0x50]);
        pair(&mut loc, 0x8, 0x10);
        loc.extend_from_slice(&[1, 0, 0x53]);
        pair(&mut loc, 0, 0);

        let unit = unit(4);
        let sections = Sections {
            debug_loc: loc,
            ..Sections::default()
        };
        let resolver = LocationResolver::new(&unit, &sections, None);
        let description = resolver.resolve(&loc_attr(4)).unwrap();
        let LocationDescription::Ranged { entries, .. } = &description else {
            panic!("expected a location list");
        };
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0], LocationListEntry::BaseAddress(0x2000));

        let at = |address| {
            description
                .expression_at(address, unit.base_address())
                .unwrap()
                .map(|ops| ops[0].mnemonic)
        };
        assert_eq!(at(0x2004), Some("DW_OP_reg0"));
        assert_eq!(at(0x200c), Some("DW_OP_reg3"));
        assert_eq!(at(0x2010), None);
        assert_eq!(at(0x404), None);
    }

    #[test]
    fn test_data4_offset_on_dwarf3()
    {
        let mut loc = Vec::new();
        pair(&mut loc, 0x0, 0x4);
        loc.extend_from_slice(&[1, 0, 0x9c]);
        pair(&mut loc, 0, 0);
        let unit = unit(3);
        let sections = Sections {
            debug_loc: loc,
            ..Sections::default()
        };
        let attr = Attribute::with_form(DW_AT_frame_base, DW_FORM_data4, AttrValue::Udata(0));
        let description = LocationResolver::new(&unit, &sections, None).resolve(&attr).unwrap();
        assert!(description.expression_at(0x402, unit.base_address()).unwrap().is_some());

        let unit4 = self::unit(4);
        let err = LocationResolver::new(&unit4, &sections, None).resolve(&attr).unwrap_err();
        assert!(matches!(err, DecodeError::Unsupported(_)));
    }

    #[test]
    fn test_loclists_all_kinds()
    {
        let mut addr = vec![0u8; 8];
        addr.extend_from_slice(&0x5000u64.to_le_bytes());
        addr.extend_from_slice(&0x5100u64.to_le_bytes());

        let mut list = vec![
            0x01, 0x00, // base_addressx 0
            0x04, 0x00, 0x10, 0x01, 0x50, // offset_pair [0, 0x10) reg0
            0x02, 0x00, 0x01, 0x01, 0x51, // startx_endx [0x5000, 0x5100) reg1
            0x03, 0x01, 0x08, 0x01, 0x52, // startx_length [0x5100, 0x5108) reg2
            0x06,
        ];
        list.extend_from_slice(&0x6000u64.to_le_bytes());
        list.extend_from_slice(&[0x04, 0x00, 0x04, 0x01, 0x53]);
        list.push(0x07);
        pair(&mut list, 0x7000, 0x7010);
        list.extend_from_slice(&[0x01, 0x54]);
        list.push(0x08);
        list.extend_from_slice(&0x8000u64.to_le_bytes());
        list.extend_from_slice(&[0x20, 0x01, 0x55]);
        list.extend_from_slice(&[0x05, 0x01, 0x56, 0x00]);

        let mut b = UnitBuilder::with_header(crate::model::UnitHeader {
            offset: 0,
            version: 5,
            address_size: 8,
            offset_size: 4,
            endian: gimli::RunTimeEndian::Little,
            addr_base: 8,
        });
        b.open(DW_TAG_compile_unit, Vec::<Attribute>::new());
        let unit = b.finish();
        let sections = Sections {
            debug_loclists: list,
            debug_addr: addr,
            ..Sections::default()
        };
        let table = AddressTable::new(&sections.debug_addr, 8, 8, gimli::RunTimeEndian::Little);
        let description = LocationResolver::new(&unit, &sections, Some(table))
            .resolve(&loc_attr(0))
            .unwrap();

        let at = |address| description.expression_at(address, None).unwrap().map(|ops| ops[0].mnemonic);
        assert_eq!(at(0x5008), Some("DW_OP_reg0"));
        assert_eq!(at(0x5010), Some("DW_OP_reg1"));
        assert_eq!(at(0x5104), Some("DW_OP_reg2"));
        assert_eq!(at(0x6002), Some("DW_OP_reg3"));
        assert_eq!(at(0x700f), Some("DW_OP_reg4"));
        assert_eq!(at(0x801f), Some("DW_OP_reg5"));
        assert_eq!(at(0x9000), Some("DW_OP_reg6"));
    }

    #[test]
    fn test_indexed_entry_without_table()
    {
        let unit = unit(5);
        let sections = Sections {
            debug_loclists: vec![0x01, 0x00, 0x00],
            ..Sections::default()
        };
        let err = LocationResolver::new(&unit, &sections, None)
            .resolve(&loc_attr(0))
            .unwrap_err();
        let DecodeError::LocationParse { offset, bytes, reason, .. } = err else {
            panic!("expected a location parse error");
        };
        assert_eq!(offset, 0);
        assert_eq!(bytes, vec![0x01, 0x00, 0x00]);
        assert!(reason.contains("address table"));
    }

    #[test]
    fn test_missing_section_and_bad_bytes()
    {
        let unit = unit(4);
        let sections = Sections::default();
        let err = LocationResolver::new(&unit, &sections, None)
            .resolve(&loc_attr(0))
            .unwrap_err();
        assert!(matches!(err, DecodeError::MissingSection(".debug_loc")));

        let mut loc = Vec::new();
        pair(&mut loc, 0x0, 0x4);
        loc.extend_from_slice(&[1, 0, 0xff]);
        let sections = Sections {
            debug_loc: loc,
            ..Sections::default()
        };
        let err = LocationResolver::new(&unit, &sections, None)
            .resolve(&loc_attr(0))
            .unwrap_err();
        assert!(matches!(err, DecodeError::LocationParse { attribute, .. } if attribute == DW_AT_location));
    }

    #[test]
    fn test_legacy_unit_rejects_lists()
    {
        let unit = unit(1);
        let sections = Sections::default();
        let err = LocationResolver::new(&unit, &sections, None)
            .resolve(&loc_attr(0))
            .unwrap_err();
        assert!(matches!(err, DecodeError::Unsupported(_)));
    }

    #[test]
    fn test_resolution_is_repeatable()
    {
        let mut loc = Vec::new();
        pair(&mut loc, 0x0, 0x4);
        loc.extend_from_slice(&[1, 0, 0x50]);
        pair(&mut loc, 0, 0);
        let unit = unit(4);
        let sections = Sections {
            debug_loc: loc,
            ..Sections::default()
        };
        let resolver = LocationResolver::new(&unit, &sections, None);
        let first = resolver.resolve(&loc_attr(0)).unwrap();
        let second = resolver.resolve(&loc_attr(0)).unwrap();
        assert_eq!(first, second);
    }
}
