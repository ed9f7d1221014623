//! # Debug-information object model
//!
//! Owned representation of compile units, entries, attributes and line
//! tables. The resolvers only read from it; units are built either by the
//! object loader ([`crate::image`]) or directly with [`UnitBuilder`].

pub mod builder;
pub mod die;
pub mod lines;
pub mod sections;
pub mod unit;

pub use builder::UnitBuilder;
pub use die::{AttrValue, Attribute, Die, DieRef};
pub use lines::{LineProgram, LineRow};
pub use sections::{AddressTable, Sections};
pub use unit::{CompileUnit, UnitCache, UnitHeader};

use crate::types::Architecture;

/// Physical layout family of a unit, chosen once from its version.
///
/// DWARF 1 differs from later versions in its expression atoms, in how
/// entries are linked (`DW_AT_sibling` chains instead of nesting) and in
/// having no location lists. Everything version dependent dispatches on this
/// value instead of comparing version numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DwarfFlavor
{
    Legacy,
    Modern
    {
        version: u16,
    },
}

impl DwarfFlavor
{
    #[must_use]
    pub const fn for_version(version: u16) -> Self
    {
        if version < 2 {
            DwarfFlavor::Legacy
        } else {
            DwarfFlavor::Modern { version }
        }
    }

    #[must_use]
    pub const fn version(self) -> u16
    {
        match self {
            DwarfFlavor::Legacy => 1,
            DwarfFlavor::Modern { version } => version,
        }
    }

    /// Whether a location attribute may refer to a location list.
    #[must_use]
    pub const fn has_location_lists(self) -> bool
    {
        matches!(self, DwarfFlavor::Modern { .. })
    }

    /// Whether lists live in `.debug_loclists`/`.debug_rnglists`.
    #[must_use]
    pub const fn uses_list_sections(self) -> bool
    {
        matches!(self, DwarfFlavor::Modern { version } if version >= 5)
    }
}

/// All units of one object plus the sections they reference.
#[derive(Debug)]
pub struct DebugInfo
{
    units: Vec<CompileUnit>,
    sections: Sections,
    architecture: Architecture,
}

impl DebugInfo
{
    #[must_use]
    pub fn new(architecture: Architecture, sections: Sections, mut units: Vec<CompileUnit>) -> Self
    {
        units.sort_by_key(CompileUnit::offset);
        Self {
            units,
            sections,
            architecture,
        }
    }

    #[must_use]
    pub fn units(&self) -> &[CompileUnit]
    {
        &self.units
    }

    #[must_use]
    pub fn sections(&self) -> &Sections
    {
        &self.sections
    }

    #[must_use]
    pub fn architecture(&self) -> Architecture
    {
        self.architecture
    }

    /// Entry at absolute `.debug_info` offset `offset`, in whichever unit
    /// holds it.
    #[must_use]
    pub fn entry(&self, offset: u64) -> Option<DieRef<'_>>
    {
        let after = self.units.partition_point(|unit| unit.offset() <= offset);
        self.units[..after].last()?.entry(offset)
    }

    /// `.debug_addr` view for `unit`.
    #[must_use]
    pub fn address_table<'a>(&'a self, unit: &CompileUnit) -> AddressTable<'a>
    {
        AddressTable::new(
            &self.sections.debug_addr,
            unit.addr_base(),
            unit.address_size(),
            unit.endian(),
        )
    }
}
