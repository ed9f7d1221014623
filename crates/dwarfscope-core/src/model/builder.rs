//! In-memory construction of compile units.
//!
//! The object loader feeds entries it decoded with [`UnitBuilder::push`];
//! tests describe trees with [`UnitBuilder::open`], [`UnitBuilder::leaf`] and
//! [`UnitBuilder::close`], which assign offsets and null terminators.

use gimli::{constants, DwTag, RunTimeEndian};

use super::die::{AttrValue, Attribute, Die};
use super::lines::LineProgram;
use super::unit::{CompileUnit, UnitHeader};

/// Size of a 32-bit DWARF 4 unit header; the first entry follows it.
const HEADER_SIZE: u64 = 11;

pub struct UnitBuilder
{
    header: UnitHeader,
    entries: Vec<Die>,
    /// Indices of entries whose children are still being added.
    open: Vec<usize>,
    /// Subtree end per entry, filled as entries are closed.
    ends: Vec<Option<usize>>,
    next_offset: u64,
    lines: Option<LineProgram>,
    link_siblings: bool,
}

impl UnitBuilder
{
    /// Unit at offset 0, little-endian, 32-bit DWARF.
    #[must_use]
    pub fn new(version: u16, address_size: u8) -> Self
    {
        Self::with_header(UnitHeader {
            offset: 0,
            version,
            address_size,
            offset_size: 4,
            endian: RunTimeEndian::Little,
            addr_base: 0,
        })
    }

    #[must_use]
    pub fn with_header(header: UnitHeader) -> Self
    {
        Self {
            next_offset: header.offset + HEADER_SIZE,
            header,
            entries: Vec::new(),
            open: Vec::new(),
            ends: Vec::new(),
            lines: None,
            link_siblings: false,
        }
    }

    /// Emit `DW_AT_sibling` on every entry when finishing, the way DWARF 1
    /// producers chain entries.
    #[must_use]
    pub fn with_sibling_links(mut self) -> Self
    {
        self.link_siblings = true;
        self
    }

    pub fn line_program(&mut self, program: LineProgram) -> &mut Self
    {
        self.lines = Some(program);
        self
    }

    fn add(&mut self, tag: DwTag, has_children: bool, attributes: Vec<Attribute>) -> u64
    {
        let offset = self.next_offset;
        self.next_offset += 1;
        self.entries.push(Die {
            offset,
            tag,
            has_children,
            attributes,
        });
        self.ends.push(None);
        offset
    }

    /// Add an entry that owns the entries added until the matching
    /// [`UnitBuilder::close`]. Returns its offset.
    pub fn open<A>(&mut self, tag: DwTag, attributes: impl IntoIterator<Item = A>) -> u64
    where
        A: Into<Attribute>,
    {
        let offset = self.add(tag, true, attributes.into_iter().map(Into::into).collect());
        self.open.push(self.entries.len() - 1);
        offset
    }

    /// Add an entry without children. Returns its offset.
    pub fn leaf<A>(&mut self, tag: DwTag, attributes: impl IntoIterator<Item = A>) -> u64
    where
        A: Into<Attribute>,
    {
        let offset = self.add(tag, false, attributes.into_iter().map(Into::into).collect());
        let index = self.entries.len() - 1;
        self.ends[index] = Some(index + 1);
        offset
    }

    /// Close the innermost open entry with a null entry.
    pub fn close(&mut self) -> &mut Self
    {
        if let Some(owner) = self.open.pop() {
            self.add(constants::DW_TAG_null, false, Vec::new());
            let end = self.entries.len();
            self.ends[owner] = Some(end);
            self.ends[end - 1] = Some(end);
        }
        self
    }

    /// Append an already decoded entry verbatim (offsets must ascend).
    pub fn push(&mut self, die: Die)
    {
        self.next_offset = self.next_offset.max(die.offset + 1);
        self.entries.push(die);
        self.ends.push(None);
    }

    /// Close every open entry and produce the unit.
    #[must_use]
    pub fn finish(mut self) -> CompileUnit
    {
        while !self.open.is_empty() {
            self.close();
        }
        if self.link_siblings {
            let offsets: Vec<u64> = self.entries.iter().map(|die| die.offset).collect();
            for (index, die) in self.entries.iter_mut().enumerate() {
                if die.is_null() {
                    continue;
                }
                if let Some(target) = self.ends[index].and_then(|end| offsets.get(end)) {
                    die.attributes
                        .push(Attribute::new(constants::DW_AT_sibling, AttrValue::Ref(*target)));
                }
            }
        }
        CompileUnit::new(self.header, self.entries, self.lines)
    }
}
