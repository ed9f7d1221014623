//! # Range Resolver
//!
//! Decodes `DW_AT_ranges` lists from `.debug_ranges` (DWARF 2-4) and
//! `.debug_rnglists` (DWARF 5), and combines them with `low_pc`/`high_pc`
//! into the code ranges of an entry.
//!
//! The base-tracking rule is the same as for location lists. A relative entry
//! with no base in sight is an error (`NoBaseAddress`), never a guess of zero.

use std::ops::Range;

use gimli::constants;

use crate::error::{DecodeError, Result};
use crate::location::{indexed, list_offset, max_address, section_reader};
use crate::model::{AddressTable, AttrValue, Attribute, CompileUnit, DebugInfo, DieRef, Sections};
use crate::reader::ByteReader;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeListEntry
{
    BaseAddress(u64),
    Range
    {
        begin: u64,
        end: u64,
        is_absolute: bool,
    },
}

/// A decoded range list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RangeList
{
    /// Section offset the list was read from.
    pub offset: u64,
    pub entries: Vec<RangeListEntry>,
}

impl RangeList
{
    /// Absolute, non-empty ranges of the list.
    ///
    /// Fails with [`DecodeError::NoBaseAddress`] when a relative entry comes
    /// before any base-address entry and `unit_base` is `None`.
    pub fn absolute_ranges(&self, unit_base: Option<u64>) -> Result<Vec<Range<u64>>>
    {
        let mut base = unit_base;
        let mut ranges = Vec::new();
        for entry in &self.entries {
            match *entry {
                RangeListEntry::BaseAddress(address) => base = Some(address),
                RangeListEntry::Range {
                    begin,
                    end,
                    is_absolute,
                } => {
                    let shift = if is_absolute {
                        0
                    } else {
                        base.ok_or(DecodeError::NoBaseAddress { offset: self.offset })?
                    };
                    let range = begin.wrapping_add(shift)..end.wrapping_add(shift);
                    if !range.is_empty() {
                        ranges.push(range);
                    }
                }
            }
        }
        Ok(ranges)
    }
}

/// Resolves range attributes of one unit.
pub struct RangeResolver<'a>
{
    unit: &'a CompileUnit,
    sections: &'a Sections,
    addresses: Option<AddressTable<'a>>,
}

impl<'a> RangeResolver<'a>
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

    #[must_use]
    pub fn for_unit(info: &'a DebugInfo, unit: &'a CompileUnit) -> Self
    {
        Self::new(unit, info.sections(), Some(info.address_table(unit)))
    }

    /// Decode the list a `DW_AT_ranges` attribute points at.
    pub fn resolve(&self, attribute: &Attribute) -> Result<RangeList>
    {
        let Some(offset) = list_offset(attribute, self.unit.version()) else {
            return Err(DecodeError::Unsupported(format!(
                "{} with form {}",
                attribute.name, attribute.form
            )));
        };
        let entries = if self.unit.flavor().uses_list_sections() {
            let reader = section_reader(&self.sections.debug_rnglists, offset, self.unit, ".debug_rnglists")?;
            self.parse_rnglists(reader)?
        } else {
            let reader = section_reader(&self.sections.debug_ranges, offset, self.unit, ".debug_ranges")?;
            self.parse_ranges(reader)?
        };
        Ok(RangeList { offset, entries })
    }

    fn parse_ranges(&self, mut r: ByteReader<'_>) -> Result<Vec<RangeListEntry>>
    {
        const CTX: &str = ".debug_ranges entry";
        let size = self.unit.address_size();
        let mut entries = Vec::new();
        loop {
            let begin = r.address(size, CTX)?;
            let end = r.address(size, CTX)?;
            if begin == 0 && end == 0 {
                break;
            }
            if begin == max_address(size) {
                entries.push(RangeListEntry::BaseAddress(end));
            } else {
                entries.push(RangeListEntry::Range {
                    begin,
                    end,
                    is_absolute: false,
                });
            }
        }
        Ok(entries)
    }

    fn parse_rnglists(&self, mut r: ByteReader<'_>) -> Result<Vec<RangeListEntry>>
    {
        const CTX: &str = ".debug_rnglists entry";
        let size = self.unit.address_size();
        let table = self.addresses.as_ref();
        let mut entries = Vec::new();
        loop {
            let at = r.offset();
            let kind = r.u8(CTX)?;
            let entry = match constants::DwRle(kind) {
                constants::DW_RLE_end_of_list => break,
                constants::DW_RLE_base_addressx => RangeListEntry::BaseAddress(indexed(table, r.uleb(CTX)?)?),
                constants::DW_RLE_base_address => RangeListEntry::BaseAddress(r.address(size, CTX)?),
                constants::DW_RLE_startx_endx => {
                    let begin = indexed(table, r.uleb(CTX)?)?;
                    let end = indexed(table, r.uleb(CTX)?)?;
                    absolute(begin, end)
                }
                constants::DW_RLE_startx_length => {
                    let begin = indexed(table, r.uleb(CTX)?)?;
                    absolute(begin, begin.wrapping_add(r.uleb(CTX)?))
                }
                constants::DW_RLE_offset_pair => RangeListEntry::Range {
                    begin: r.uleb(CTX)?,
                    end: r.uleb(CTX)?,
                    is_absolute: false,
                },
                constants::DW_RLE_start_end => {
                    let begin = r.address(size, CTX)?;
                    absolute(begin, r.address(size, CTX)?)
                }
                constants::DW_RLE_start_length => {
                    let begin = r.address(size, CTX)?;
                    absolute(begin, begin.wrapping_add(r.uleb(CTX)?))
                }
                _ => return Err(DecodeError::malformed(at, format!("unknown DW_RLE kind 0x{kind:02x}"))),
            };
            entries.push(entry);
        }
        Ok(entries)
    }

    /// Value of an address-class attribute, following `.debug_addr` indices.
    fn address_value(&self, value: &AttrValue) -> Result<Option<u64>>
    {
        match value {
            AttrValue::Address(address) => Ok(Some(*address)),
            AttrValue::AddressIndex(index) => indexed(self.addresses.as_ref(), *index).map(Some),
            _ => Ok(None),
        }
    }

    /// Every address range of code the entry covers.
    ///
    /// Combines `low_pc` with `high_pc` (an address, or an offset from
    /// `low_pc` when a constant) and adds the ranges of `DW_AT_ranges`. Range
    /// lists resolve against the entry's own `low_pc` when it has one and the
    /// unit base otherwise.
    pub fn code_ranges(&self, die: DieRef<'_>) -> Result<Vec<Range<u64>>>
    {
        let mut ranges = Vec::new();
        let low = match die.attr(constants::DW_AT_low_pc) {
            Some(value) => self.address_value(value)?,
            None => None,
        };

        if let Some(low) = low {
            let high = match die.attr(constants::DW_AT_high_pc) {
                Some(AttrValue::Udata(length)) => Some(low.wrapping_add(*length)),
                Some(AttrValue::Sdata(length)) => Some(low.wrapping_add_signed(*length)),
                Some(value) => self.address_value(value)?,
                None => None,
            };
            match high {
                Some(high) if high > low => ranges.push(low..high),
                Some(_) => {}
                None if !die.has_attr(constants::DW_AT_ranges) => ranges.push(low..low.wrapping_add(1)),
                None => {}
            }
        }

        if let Some(attribute) = die.attribute(constants::DW_AT_ranges) {
            let list = self.resolve(attribute)?;
            ranges.extend(list.absolute_ranges(low.or_else(|| self.unit.base_address()))?);
        }
        Ok(ranges)
    }

    /// Whether `address` lies in any of the entry's code ranges.
    pub fn contains(&self, die: DieRef<'_>, address: u64) -> Result<bool>
    {
        Ok(self
            .code_ranges(die)?
            .iter()
            .any(|range| range.contains(&address)))
    }
}

fn absolute(begin: u64, end: u64) -> RangeListEntry
{
    RangeListEntry::Range {
        begin,
        end,
        is_absolute: true,
    }
}
