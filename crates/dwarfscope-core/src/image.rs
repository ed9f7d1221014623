//! # Object-file loading
//!
//! Reads an executable or object file with `object`, walks its DWARF with
//! `gimli` and produces the owned [`DebugInfo`] model the resolvers work on.
//! Unwind sections (`.eh_frame`, `.debug_frame`, `__unwind_info`) are kept
//! as raw bytes and decoded on request.
//!
//! Attribute values are normalised while loading: `addrx` forms become
//! addresses when the unit has an address table, `loclistx`/`rnglistx`
//! become section offsets, and unit-relative references become absolute
//! `.debug_info` offsets.

use std::borrow::Cow;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use gimli::{AttributeValue, Dwarf, EndianSlice, Reader, RunTimeEndian, SectionId};
use object::{Object, ObjectSection, ObjectSegment};
use tracing::{debug, info, trace, warn};

use crate::cfi::{CallFrameInfo, CfiKind, CfiSection};
use crate::compact_unwind::CompactUnwindInfo;
use crate::error::{map_gimli_error, DecodeError, Result};
use crate::model::{AttrValue, Attribute, DebugInfo, Die, LineProgram, LineRow, Sections, UnitBuilder, UnitHeader};
use crate::types::Architecture;

type SliceReader<'data> = EndianSlice<'data, RunTimeEndian>;

const DWARF_SECTIONS: &[(SectionId, &[&str])] = &[
    (SectionId::DebugAbbrev, &[".debug_abbrev", "__debug_abbrev"]),
    (SectionId::DebugAddr, &[".debug_addr", "__debug_addr"]),
    (SectionId::DebugInfo, &[".debug_info", "__debug_info"]),
    (SectionId::DebugLine, &[".debug_line", "__debug_line"]),
    (SectionId::DebugLineStr, &[".debug_line_str", "__debug_line_str"]),
    (SectionId::DebugRanges, &[".debug_ranges", "__debug_ranges"]),
    (SectionId::DebugRngLists, &[".debug_rnglists", "__debug_rnglists"]),
    (SectionId::DebugStr, &[".debug_str", "__debug_str"]),
    (SectionId::DebugStrOffsets, &[".debug_str_offsets", "__debug_str_offs", "__debug_str_offsets"]),
    (SectionId::DebugLoc, &[".debug_loc", "__debug_loc"]),
    (SectionId::DebugLocLists, &[".debug_loclists", "__debug_loclists"]),
];

const EH_FRAME: &[&str] = &[".eh_frame", "__eh_frame"];
const DEBUG_FRAME: &[&str] = &[".debug_frame", "__debug_frame"];
const UNWIND_INFO: &[&str] = &["__unwind_info"];
const TEXT_SEGMENT: &str = "__TEXT";

/// An unwind section together with the address it is loaded at.
#[derive(Debug, Clone)]
struct SectionBlob
{
    data: Vec<u8>,
    address: u64,
}

fn load_section<'data>(file: &object::File<'data>, names: &[&str]) -> Result<Option<(Cow<'data, [u8]>, u64)>>
{
    for name in names {
        if let Some(section) = file.section_by_name(name) {
            let data = section
                .uncompressed_data()
                .map_err(|err| DecodeError::Object(format!("failed to read {name}: {err}")))?;
            return Ok(Some((data, section.address())));
        }
    }
    Ok(None)
}

fn load_blob(file: &object::File<'_>, names: &[&str]) -> Result<Option<SectionBlob>>
{
    Ok(load_section(file, names)?.map(|(data, address)| SectionBlob {
        data: data.into_owned(),
        address,
    }))
}

/// The link-time address of the Mach-O `__TEXT` segment.
fn text_segment_address(file: &object::File<'_>) -> Option<u64>
{
    if file.format() != object::BinaryFormat::MachO {
        return None;
    }
    file.segments()
        .find(|segment| matches!(segment.name(), Ok(Some(TEXT_SEGMENT))))
        .map(|segment| segment.address())
}

/// Subtract `base` from link-time addresses at or above it; smaller
/// addresses are taken as already image-relative.
fn rebase(address: u64, base: Option<u64>) -> u64
{
    match base {
        Some(base) if base > 0 && address >= base => address - base,
        _ => address,
    }
}

fn architecture_of(file: &object::File<'_>) -> Architecture
{
    match file.architecture() {
        object::Architecture::I386 => Architecture::X86,
        object::Architecture::X86_64 => Architecture::X86_64,
        object::Architecture::Arm => Architecture::Arm,
        object::Architecture::Aarch64 => Architecture::Arm64,
        object::Architecture::Mips => Architecture::Mips,
        object::Architecture::Mips64 => Architecture::Mips64,
        object::Architecture::Riscv32 => Architecture::RiscV32,
        object::Architecture::Riscv64 => Architecture::RiscV64,
        object::Architecture::PowerPc => Architecture::PowerPc,
        object::Architecture::PowerPc64 => Architecture::PowerPc64,
        _ => Architecture::Unknown("unknown"),
    }
}

/// A loaded object file.
#[derive(Debug)]
pub struct ObjectImage
{
    architecture: Architecture,
    endian: RunTimeEndian,
    debug_info: DebugInfo,
    eh_frame: Option<SectionBlob>,
    debug_frame: Option<SectionBlob>,
    unwind_info: Option<SectionBlob>,
    text_address: Option<u64>,
}

impl ObjectImage
{
    pub fn open(path: impl AsRef<Path>) -> Result<Self>
    {
        let path = path.as_ref();
        let bytes = fs::read(path)?;
        info!(path = %path.display(), size = bytes.len(), "loading object file");
        Self::parse(&bytes)
    }

    pub fn parse(bytes: &[u8]) -> Result<Self>
    {
        let file = object::File::parse(bytes).map_err(|err| DecodeError::Object(format!("failed to parse object: {err}")))?;

        let endian = if file.is_little_endian() {
            RunTimeEndian::Little
        } else {
            RunTimeEndian::Big
        };
        let architecture = architecture_of(&file);

        let mut sections: HashMap<SectionId, Cow<'_, [u8]>> = HashMap::new();
        for (id, aliases) in DWARF_SECTIONS {
            if let Some((data, _)) = load_section(&file, aliases)? {
                sections.insert(*id, data);
            }
        }
        debug!(%architecture, sections = sections.len(), "found DWARF sections");

        let debug_info = load_debug_info(&sections, architecture, endian)?;

        Ok(Self {
            architecture,
            endian,
            debug_info,
            eh_frame: load_blob(&file, EH_FRAME)?,
            debug_frame: load_blob(&file, DEBUG_FRAME)?,
            unwind_info: load_blob(&file, UNWIND_INFO)?,
            text_address: text_segment_address(&file),
        })
    }

    #[must_use]
    pub fn architecture(&self) -> Architecture
    {
        self.architecture
    }

    #[must_use]
    pub fn endian(&self) -> RunTimeEndian
    {
        self.endian
    }

    #[must_use]
    pub fn debug_info(&self) -> &DebugInfo
    {
        &self.debug_info
    }

    /// Decode `.eh_frame` and `.debug_frame`, whichever are present.
    pub fn call_frame_info(&self) -> Result<CallFrameInfo>
    {
        let address_size = self.architecture.pointer_size();
        let mut cfi = CallFrameInfo::new();
        for (blob, kind) in [(&self.eh_frame, CfiKind::EhFrame), (&self.debug_frame, CfiKind::DebugFrame)] {
            if let Some(blob) = blob {
                cfi.push(
                    CfiSection::parse(&blob.data, kind, address_size, self.endian, blob.address)?
                        .with_architecture(self.architecture),
                );
            }
        }
        Ok(cfi)
    }

    /// Link-time address of the `__TEXT` segment, for Mach-O images.
    #[must_use]
    pub fn text_address(&self) -> Option<u64>
    {
        self.text_address
    }

    /// Convert a link-time address into the image-relative form
    /// `__unwind_info` records use. Addresses below the `__TEXT` segment,
    /// or in images without one, are returned unchanged.
    #[must_use]
    pub fn image_relative(&self, address: u64) -> u64
    {
        rebase(address, self.text_address)
    }

    /// The `__unwind_info` table, if the image has one.
    pub fn compact_unwind(&self) -> Result<Option<CompactUnwindInfo<'_>>>
    {
        self.unwind_info
            .as_ref()
            .map(|blob| CompactUnwindInfo::parse(&blob.data, self.architecture, self.endian))
            .transpose()
    }
}

fn load_debug_info(
    sections: &HashMap<SectionId, Cow<'_, [u8]>>,
    architecture: Architecture,
    endian: RunTimeEndian,
) -> Result<DebugInfo>
{
    let dwarf = Dwarf::load(|id| {
        let data = sections.get(&id).map_or(&[][..], |data| &**data);
        Ok::<_, gimli::Error>(EndianSlice::new(data, endian))
    })
    .map_err(|err| DecodeError::Object(format!("failed to load DWARF: {err}")))?;

    let raw = |id: SectionId| sections.get(&id).map(|data| data.to_vec()).unwrap_or_default();
    let model_sections = Sections {
        debug_loc: raw(SectionId::DebugLoc),
        debug_loclists: raw(SectionId::DebugLocLists),
        debug_ranges: raw(SectionId::DebugRanges),
        debug_rnglists: raw(SectionId::DebugRngLists),
        debug_addr: raw(SectionId::DebugAddr),
    };

    let mut units = Vec::new();
    let mut headers = dwarf.units();
    while let Some(header) = headers.next().map_err(|err| map_gimli_error("unit header", 0, err))? {
        let Some(offset) = header.offset().as_debug_info_offset() else {
            continue;
        };
        let unit = dwarf
            .unit(header)
            .map_err(|err| map_gimli_error("unit", offset.0 as u64, err))?;
        match load_unit(&dwarf, &unit, offset.0 as u64, endian) {
            Ok(builder) => units.push(builder.finish()),
            Err(err) => warn!(unit = offset.0, error = %err, "skipping unit"),
        }
    }
    info!(units = units.len(), "loaded debug info");
    Ok(DebugInfo::new(architecture, model_sections, units))
}

fn load_unit(
    dwarf: &Dwarf<SliceReader<'_>>,
    unit: &gimli::Unit<SliceReader<'_>>,
    offset: u64,
    endian: RunTimeEndian,
) -> Result<UnitBuilder>
{
    let header = UnitHeader {
        offset,
        version: unit.header.version(),
        address_size: unit.header.address_size(),
        offset_size: unit.header.format().word_size(),
        endian,
        addr_base: unit.addr_base.0 as u64,
    };
    let mut builder = UnitBuilder::with_header(header);

    let mut raw = unit.entries_raw(None).map_err(|err| map_gimli_error("entries", offset, err))?;
    while !raw.is_empty() {
        let die_offset = raw
            .next_offset()
            .to_debug_info_offset(&unit.header)
            .map_or(offset, |o| o.0 as u64);
        let Some(abbrev) = raw
            .read_abbreviation()
            .map_err(|err| map_gimli_error("abbreviation", die_offset, err))?
        else {
            builder.push(Die {
                offset: die_offset,
                tag: gimli::constants::DW_TAG_null,
                has_children: false,
                attributes: Vec::new(),
            });
            continue;
        };

        let mut attributes = Vec::with_capacity(abbrev.attributes().len());
        for declared in abbrev.attributes() {
            let attr = raw
                .read_attribute(*declared)
                .map_err(|err| map_gimli_error("attribute", die_offset, err))?;
            match convert_value(dwarf, unit, &attr) {
                Ok(Some(value)) => attributes.push(Attribute::with_form(attr.name(), declared.form(), value)),
                Ok(None) => trace!(offset = die_offset, attribute = %attr.name(), "dropping attribute"),
                Err(err) => debug!(offset = die_offset, attribute = %attr.name(), error = %err, "unreadable attribute"),
            }
        }
        builder.push(Die {
            offset: die_offset,
            tag: abbrev.tag(),
            has_children: abbrev.has_children(),
            attributes,
        });
    }

    match load_lines(dwarf, unit) {
        Ok(Some(program)) => {
            builder.line_program(program);
        }
        Ok(None) => {}
        Err(err) => warn!(unit = offset, error = %err, "unreadable line program"),
    }
    Ok(builder)
}

fn convert_value(
    dwarf: &Dwarf<SliceReader<'_>>,
    unit: &gimli::Unit<SliceReader<'_>>,
    attr: &gimli::Attribute<SliceReader<'_>>,
) -> std::result::Result<Option<AttrValue>, gimli::Error>
{
    let value = match attr.value() {
        AttributeValue::Addr(address) => AttrValue::Address(address),
        AttributeValue::DebugAddrIndex(index) => match dwarf.address(unit, index) {
            Ok(address) => AttrValue::Address(address),
            Err(_) => AttrValue::AddressIndex(index.0 as u64),
        },
        AttributeValue::Block(block) => AttrValue::Block(block.slice().to_vec()),
        AttributeValue::Exprloc(expression) => AttrValue::Block(expression.0.slice().to_vec()),
        AttributeValue::Flag(flag) => AttrValue::Flag(flag),
        AttributeValue::Sdata(value) => AttrValue::Sdata(value),
        AttributeValue::SecOffset(offset) => AttrValue::SecOffset(offset as u64),
        AttributeValue::LocationListsRef(offset) => AttrValue::SecOffset(offset.0 as u64),
        AttributeValue::DebugLocListsIndex(index) => AttrValue::SecOffset(dwarf.locations_offset(unit, index)?.0 as u64),
        AttributeValue::RangeListsRef(offset) => {
            AttrValue::SecOffset(dwarf.ranges_offset_from_raw(unit, offset).0 as u64)
        }
        AttributeValue::DebugRngListsIndex(index) => AttrValue::SecOffset(dwarf.ranges_offset(unit, index)?.0 as u64),
        AttributeValue::UnitRef(offset) => match offset.to_debug_info_offset(&unit.header) {
            Some(absolute) => AttrValue::Ref(absolute.0 as u64),
            None => return Ok(None),
        },
        AttributeValue::DebugInfoRef(offset) => AttrValue::Ref(offset.0 as u64),
        value @ (AttributeValue::String(_)
        | AttributeValue::DebugStrRef(_)
        | AttributeValue::DebugStrOffsetsIndex(_)
        | AttributeValue::DebugLineStrRef(_)) => {
            AttrValue::String(Reader::to_string_lossy(&dwarf.attr_string(unit, value)?)?.into_owned())
        }
        _ => match attr.raw_value().udata_value() {
            Some(value) => AttrValue::Udata(value),
            None => return Ok(None),
        },
    };
    Ok(Some(value))
}

fn load_lines(dwarf: &Dwarf<SliceReader<'_>>, unit: &gimli::Unit<SliceReader<'_>>) -> Result<Option<LineProgram>>
{
    let Some(program) = unit.line_program.clone() else {
        return Ok(None);
    };
    let wrap = |err| map_gimli_error("line program", 0, err);

    let header = program.header();
    let mut files = Vec::new();
    if header.version() < 5 {
        // File register values start at 1 before DWARF 5.
        files.push(String::new());
    }
    for file in header.file_names() {
        let name = dwarf.attr_string(unit, file.path_name()).map_err(wrap)?;
        let name = Reader::to_string_lossy(&name).map_err(wrap)?;
        let directory = match file.directory(header) {
            Some(dir) => Reader::to_string_lossy(&dwarf.attr_string(unit, dir).map_err(wrap)?)
                .map_err(wrap)?
                .into_owned(),
            None => String::new(),
        };
        files.push(if directory.is_empty() || name.starts_with('/') {
            name.into_owned()
        } else {
            format!("{directory}/{name}")
        });
    }

    let mut rows = Vec::new();
    let mut state = program.rows();
    while let Some((_, row)) = state.next_row().map_err(wrap)? {
        rows.push(LineRow {
            address: row.address(),
            file: row.file_index(),
            line: row.line().map_or(0, |line| line.get()),
            is_stmt: row.is_stmt(),
            end_sequence: row.end_sequence(),
        });
    }
    Ok(Some(LineProgram { files, rows }))
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_rejects_non_object_bytes()
    {
        let err = ObjectImage::parse(b"definitely not an object file").unwrap_err();
        assert!(matches!(err, DecodeError::Object(_)));
    }

    #[test]
    fn test_missing_file_is_io_error()
    {
        let err = ObjectImage::open("/nonexistent/dwarfscope/object").unwrap_err();
        assert!(matches!(err, DecodeError::Io(_)));
    }

    #[test]
    fn test_link_time_address_is_rebased()
    {
        assert_eq!(rebase(0x1_0000_3f00, Some(0x1_0000_0000)), 0x3f00);
        assert_eq!(rebase(0x1_0000_0000, Some(0x1_0000_0000)), 0);
        assert_eq!(rebase(0x3f00, Some(0x1_0000_0000)), 0x3f00);
        assert_eq!(rebase(0x1_0000_3f00, None), 0x1_0000_3f00);
        assert_eq!(rebase(0x3f00, Some(0)), 0x3f00);
    }
}
