//! Debugging information entries and their attributes.

use std::fmt;

use gimli::constants;
use gimli::{DwAt, DwForm, DwTag};

use super::unit::CompileUnit;

/// Decoded value of an attribute.
///
/// References are absolute `.debug_info` offsets; `loclistx`/`rnglistx`
/// forms have already been translated to section offsets by whoever built
/// the unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttrValue
{
    Address(u64),
    /// Index into `.debug_addr` (`DW_FORM_addrx*`).
    AddressIndex(u64),
    Udata(u64),
    Sdata(i64),
    /// Expression or block bytes.
    Block(Vec<u8>),
    /// Offset into a non-info section (`DW_FORM_sec_offset`).
    SecOffset(u64),
    /// Offset of another entry in `.debug_info`.
    Ref(u64),
    Flag(bool),
    String(String),
}

impl AttrValue
{
    /// The form a producer would normally pick for this value.
    #[must_use]
    pub fn default_form(&self) -> DwForm
    {
        match self {
            AttrValue::Address(_) => constants::DW_FORM_addr,
            AttrValue::AddressIndex(_) => constants::DW_FORM_addrx,
            AttrValue::Udata(_) => constants::DW_FORM_udata,
            AttrValue::Sdata(_) => constants::DW_FORM_sdata,
            AttrValue::Block(_) => constants::DW_FORM_exprloc,
            AttrValue::SecOffset(_) => constants::DW_FORM_sec_offset,
            AttrValue::Ref(_) => constants::DW_FORM_ref_addr,
            AttrValue::Flag(_) => constants::DW_FORM_flag,
            AttrValue::String(_) => constants::DW_FORM_string,
        }
    }

    /// Unsigned interpretation of constant-like values.
    #[must_use]
    pub fn as_u64(&self) -> Option<u64>
    {
        match self {
            AttrValue::Udata(value) | AttrValue::Address(value) | AttrValue::SecOffset(value) => Some(*value),
            AttrValue::Sdata(value) => u64::try_from(*value).ok(),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str>
    {
        match self {
            AttrValue::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for AttrValue
{
    fn from(value: &str) -> Self
    {
        AttrValue::String(value.to_string())
    }
}

impl From<String> for AttrValue
{
    fn from(value: String) -> Self
    {
        AttrValue::String(value)
    }
}

impl From<Vec<u8>> for AttrValue
{
    fn from(value: Vec<u8>) -> Self
    {
        AttrValue::Block(value)
    }
}

impl From<bool> for AttrValue
{
    fn from(value: bool) -> Self
    {
        AttrValue::Flag(value)
    }
}

/// One attribute of an entry: name, on-disk form and decoded value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute
{
    pub name: DwAt,
    pub form: DwForm,
    pub value: AttrValue,
}

impl Attribute
{
    #[must_use]
    pub fn new(name: DwAt, value: AttrValue) -> Self
    {
        Self {
            name,
            form: value.default_form(),
            value,
        }
    }

    #[must_use]
    pub fn with_form(name: DwAt, form: DwForm, value: AttrValue) -> Self
    {
        Self { name, form, value }
    }
}

impl From<(DwAt, AttrValue)> for Attribute
{
    fn from((name, value): (DwAt, AttrValue)) -> Self
    {
        Attribute::new(name, value)
    }
}

/// A debugging information entry as stored in a unit.
///
/// Tree links are not stored here; the owning unit derives them once per
/// unit according to its [`DwarfFlavor`](super::DwarfFlavor).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Die
{
    /// Absolute `.debug_info` offset.
    pub offset: u64,
    /// `DW_TAG_null` marks a sibling-chain terminator.
    pub tag: DwTag,
    /// Whether the abbreviation declared children.
    pub has_children: bool,
    pub attributes: Vec<Attribute>,
}

impl Die
{
    #[must_use]
    pub fn is_null(&self) -> bool
    {
        self.tag == constants::DW_TAG_null
    }

    #[must_use]
    pub fn attribute(&self, name: DwAt) -> Option<&Attribute>
    {
        self.attributes.iter().find(|attr| attr.name == name)
    }
}

/// Borrowed handle to an entry inside its unit.
#[derive(Clone, Copy)]
pub struct DieRef<'a>
{
    unit: &'a CompileUnit,
    index: usize,
}

impl<'a> DieRef<'a>
{
    pub(crate) fn new(unit: &'a CompileUnit, index: usize) -> Self
    {
        Self { unit, index }
    }

    #[must_use]
    pub fn unit(&self) -> &'a CompileUnit
    {
        self.unit
    }

    /// Position of the entry in its unit's entry list.
    #[must_use]
    pub fn index(&self) -> usize
    {
        self.index
    }

    fn die(&self) -> &'a Die
    {
        &self.unit.entries()[self.index]
    }

    #[must_use]
    pub fn offset(&self) -> u64
    {
        self.die().offset
    }

    #[must_use]
    pub fn tag(&self) -> DwTag
    {
        self.die().tag
    }

    #[must_use]
    pub fn attribute(&self, name: DwAt) -> Option<&'a Attribute>
    {
        self.die().attribute(name)
    }

    #[must_use]
    pub fn attr(&self, name: DwAt) -> Option<&'a AttrValue>
    {
        self.attribute(name).map(|attr| &attr.value)
    }

    #[must_use]
    pub fn has_attr(&self, name: DwAt) -> bool
    {
        self.attribute(name).is_some()
    }

    /// `DW_AT_name`, if present and a string.
    #[must_use]
    pub fn name(&self) -> Option<&'a str>
    {
        self.attr(constants::DW_AT_name).and_then(AttrValue::as_str)
    }

    /// `DW_AT_linkage_name`, falling back to the pre-DWARF 4 MIPS spelling.
    #[must_use]
    pub fn linkage_name(&self) -> Option<&'a str>
    {
        self.attr(constants::DW_AT_linkage_name)
            .or_else(|| self.attr(constants::DW_AT_MIPS_linkage_name))
            .and_then(AttrValue::as_str)
    }

    /// Target of a reference-class attribute.
    #[must_use]
    pub fn reference(&self, name: DwAt) -> Option<u64>
    {
        match self.attr(name)? {
            AttrValue::Ref(offset) => Some(*offset),
            _ => None,
        }
    }

    #[must_use]
    pub fn udata(&self, name: DwAt) -> Option<u64>
    {
        self.attr(name).and_then(AttrValue::as_u64)
    }

    #[must_use]
    pub fn flag(&self, name: DwAt) -> bool
    {
        matches!(self.attr(name), Some(AttrValue::Flag(true)))
    }

    #[must_use]
    pub fn parent(&self) -> Option<DieRef<'a>>
    {
        self.unit.parent_index(self.index).map(|index| DieRef::new(self.unit, index))
    }

    pub fn children(&self) -> impl Iterator<Item = DieRef<'a>> + 'a
    {
        let unit = self.unit;
        unit.child_indices(self.index)
            .iter()
            .map(move |&index| DieRef::new(unit, index))
    }

    /// Whether the entry describes code: it has `low_pc` or `ranges`.
    #[must_use]
    pub fn has_code_location(&self) -> bool
    {
        self.has_attr(constants::DW_AT_low_pc) || self.has_attr(constants::DW_AT_ranges)
    }
}

impl PartialEq for DieRef<'_>
{
    fn eq(&self, other: &Self) -> bool
    {
        std::ptr::eq(self.unit, other.unit) && self.index == other.index
    }
}

impl Eq for DieRef<'_> {}

impl fmt::Debug for DieRef<'_>
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        f.debug_struct("DieRef")
            .field("offset", &format_args!("0x{:x}", self.offset()))
            .field("tag", &self.tag())
            .field("name", &self.name())
            .finish()
    }
}
