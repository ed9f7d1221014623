//! # Compact Unwind Information
//!
//! Reader for the Mach-O `__unwind_info` section.
//!
//! The section is a two-level page table. The header points at a table of
//! global encodings, a personality table and the first-level index; each
//! first-level entry covers an address range and points at a second-level
//! page, which is either *regular* (explicit `(address, encoding)` pairs)
//! or *compressed* (24-bit address deltas plus an 8-bit index into the
//! global encodings followed by the page's local encodings).
//!
//! ```text
//! header -> [first-level entry]* -> regular page    -> [(address, encoding)]*
//!                                -> compressed page -> [(index << 24 | delta)]*
//! ```
//!
//! Addresses in the section are offsets from the image's load address.

pub mod encoding;
pub mod lehmer;

use std::collections::BTreeMap;

pub use encoding::{CompactCommand, CompactEncoding, DecodedFrame};
use gimli::RunTimeEndian;
pub use lehmer::{rank, unrank};
use tracing::{debug, trace};

use crate::error::{DecodeError, Result};
use crate::reader::ByteReader;
use crate::types::Architecture;

const SECTION_VERSION: u32 = 1;
const REGULAR_PAGE: u32 = 2;
const COMPRESSED_PAGE: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FirstLevelEntry
{
    first_address: u32,
    page_offset: u32,
    lsda_offset: u32,
}

/// One second-level entry before its encoding is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactUnwindRecord
{
    pub address: u64,
    /// First address of the next entry (or the end of the page).
    pub end: u64,
    pub encoding: CompactEncoding,
}

/// A fully decoded entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompactUnwindEntry
{
    pub address: u64,
    pub end: u64,
    pub encoding: CompactEncoding,
    pub command: CompactCommand,
    pub has_frame: bool,
    pub cfa_register: Option<u16>,
    pub cfa_offset: i64,
    /// Register -> offset from the CFA of its saved value.
    pub saved_registers: BTreeMap<u16, i64>,
    pub personality_index: u8,
    /// Personality table value (a pointer-slot offset) for a nonzero index.
    pub personality: Option<u32>,
    pub has_lsda: bool,
    pub lsda: Option<u32>,
    pub is_function_start: bool,
}

/// A parsed `__unwind_info` section.
#[derive(Debug, Clone)]
pub struct CompactUnwindInfo<'a>
{
    data: &'a [u8],
    endian: RunTimeEndian,
    arch: Architecture,
    global_encodings: Vec<u32>,
    personalities: Vec<u32>,
    /// Includes the trailing sentinel that bounds the last page.
    pages: Vec<FirstLevelEntry>,
}

impl<'a> CompactUnwindInfo<'a>
{
    /// Read the header and the tables it points at.
    pub fn parse(data: &'a [u8], arch: Architecture, endian: RunTimeEndian) -> Result<Self>
    {
        let mut reader = ByteReader::new(data, endian);
        let version = reader.u32("unwind info version")?;
        if version != SECTION_VERSION {
            return Err(DecodeError::Unsupported(format!("__unwind_info version {version}")));
        }
        let globals_offset = reader.u32("global encodings offset")?;
        let globals_count = reader.u32("global encodings count")?;
        let personalities_offset = reader.u32("personalities offset")?;
        let personalities_count = reader.u32("personalities count")?;
        let index_offset = reader.u32("first-level index offset")?;
        let index_count = reader.u32("first-level index count")?;

        let global_encodings = read_u32_table(data, endian, globals_offset, globals_count, "global encodings")?;
        let personalities = read_u32_table(data, endian, personalities_offset, personalities_count, "personalities")?;

        let mut reader = ByteReader::new(data, endian);
        reader.seek(index_offset as usize, "first-level index")?;
        let pages = (0..index_count)
            .map(|_| {
                Ok(FirstLevelEntry {
                    first_address: reader.u32("first-level address")?,
                    page_offset: reader.u32("second-level page offset")?,
                    lsda_offset: reader.u32("LSDA index offset")?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        debug!(
            arch = %arch,
            globals = global_encodings.len(),
            personalities = personalities.len(),
            pages = pages.len().saturating_sub(1),
            "parsed __unwind_info header"
        );
        Ok(Self {
            data,
            endian,
            arch,
            global_encodings,
            personalities,
            pages,
        })
    }

    #[must_use]
    pub fn architecture(&self) -> Architecture
    {
        self.arch
    }

    #[must_use]
    pub fn global_encodings(&self) -> &[u32]
    {
        &self.global_encodings
    }

    #[must_use]
    pub fn personalities(&self) -> &[u32]
    {
        &self.personalities
    }

    /// Every entry of every page, in address order.
    pub fn entries(&self) -> Result<Vec<CompactUnwindRecord>>
    {
        let mut records = Vec::new();
        for index in 0..self.pages.len() {
            if let Some(page) = self.page_records(index)? {
                records.extend(page);
            }
        }
        Ok(records)
    }

    /// The raw record covering `address`.
    pub fn record_for_address(&self, address: u64) -> Result<Option<CompactUnwindRecord>>
    {
        let Ok(target) = u32::try_from(address) else {
            return Ok(None);
        };
        let after = self.pages.partition_point(|page| page.first_address <= target);
        let Some(index) = after.checked_sub(1) else {
            return Ok(None);
        };
        let Some(records) = self.page_records(index)? else {
            return Ok(None);
        };
        let after = records.partition_point(|record| record.address <= address);
        let record = after.checked_sub(1).map(|i| records[i]).filter(|record| address < record.end);
        trace!(address, page = index, found = record.is_some(), "compact unwind lookup");
        Ok(record)
    }

    /// Decode the entry covering `address`. `Ok(None)` when no page covers
    /// it; decoding failures (including unsupported frameless register
    /// lists) are errors.
    pub fn lookup(&self, address: u64) -> Result<Option<CompactUnwindEntry>>
    {
        self.record_for_address(address)?
            .map(|record| self.decode(&record))
            .transpose()
    }

    /// Interpret one record's encoding for this section's architecture.
    pub fn decode(&self, record: &CompactUnwindRecord) -> Result<CompactUnwindEntry>
    {
        let encoding = record.encoding;
        let frame = encoding.decode(self.arch)?;
        let personality_index = encoding.personality_index();
        let personality = usize::from(personality_index)
            .checked_sub(1)
            .and_then(|i| self.personalities.get(i).copied());
        let lsda = if encoding.has_lsda() {
            self.lsda_for(record.address)?
        } else {
            None
        };
        Ok(CompactUnwindEntry {
            address: record.address,
            end: record.end,
            encoding,
            has_frame: frame.command == CompactCommand::Frame,
            command: frame.command,
            cfa_register: frame.cfa_register,
            cfa_offset: frame.cfa_offset,
            saved_registers: frame.saved_registers,
            personality_index,
            personality,
            has_lsda: encoding.has_lsda(),
            lsda,
            is_function_start: encoding.is_function_start(),
        })
    }

    /// Records of first-level page `index`; `None` for the sentinel.
    fn page_records(&self, index: usize) -> Result<Option<Vec<CompactUnwindRecord>>>
    {
        let (Some(page), Some(next)) = (self.pages.get(index), self.pages.get(index + 1)) else {
            return Ok(None);
        };
        if page.page_offset == 0 {
            return Ok(None);
        }
        let page_end = u64::from(next.first_address);
        let mut reader = ByteReader::new(self.data, self.endian);
        reader.seek(page.page_offset as usize, "second-level page")?;
        let kind = reader.u32("second-level page kind")?;

        let raw: Vec<(u64, u32)> = match kind {
            REGULAR_PAGE => {
                let entries_offset = reader.u16("regular page entries offset")?;
                let count = reader.u16("regular page entry count")?;
                reader.seek(page.page_offset as usize + usize::from(entries_offset), "regular page entries")?;
                (0..count)
                    .map(|_| Ok((u64::from(reader.u32("entry address")?), reader.u32("entry encoding")?)))
                    .collect::<Result<_>>()?
            }
            COMPRESSED_PAGE => {
                let entries_offset = reader.u16("compressed page entries offset")?;
                let count = reader.u16("compressed page entry count")?;
                let locals_offset = reader.u16("local encodings offset")?;
                let locals_count = reader.u16("local encodings count")?;
                let locals = read_u32_table(
                    self.data,
                    self.endian,
                    page.page_offset + u32::from(locals_offset),
                    u32::from(locals_count),
                    "local encodings",
                )?;
                reader.seek(page.page_offset as usize + usize::from(entries_offset), "compressed page entries")?;
                (0..count)
                    .map(|_| {
                        let offset = reader.offset();
                        let word = reader.u32("compressed entry")?;
                        let address = u64::from(page.first_address) + u64::from(word & 0x00ff_ffff);
                        let encoding = self.compressed_encoding(word >> 24, &locals, offset)?;
                        Ok((address, encoding))
                    })
                    .collect::<Result<_>>()?
            }
            other => {
                return Err(DecodeError::malformed(
                    u64::from(page.page_offset),
                    format!("unknown second-level page kind {other}"),
                ))
            }
        };

        let mut records = Vec::with_capacity(raw.len());
        for (position, &(address, encoding)) in raw.iter().enumerate() {
            let end = raw.get(position + 1).map_or(page_end, |&(next, _)| next);
            if end < address {
                return Err(DecodeError::malformed(
                    u64::from(page.page_offset),
                    format!("entry addresses are not ascending at {address:#x}"),
                ));
            }
            records.push(CompactUnwindRecord {
                address,
                end,
                encoding: CompactEncoding(encoding),
            });
        }
        Ok(Some(records))
    }

    /// Indices below the global count select a global encoding; the rest
    /// select the page's local encodings.
    fn compressed_encoding(&self, index: u32, locals: &[u32], offset: u64) -> Result<u32>
    {
        let index = index as usize;
        let global_count = self.global_encodings.len();
        let encoding = if index < global_count {
            self.global_encodings.get(index)
        } else {
            locals.get(index - global_count)
        };
        encoding.copied().ok_or_else(|| {
            DecodeError::malformed(
                offset,
                format!(
                    "encoding index {index} past {global_count} global and {} local encodings",
                    locals.len()
                ),
            )
        })
    }

    /// LSDA for the function starting at `address`, from the LSDA array
    /// bounded by the first and last first-level entries.
    fn lsda_for(&self, address: u64) -> Result<Option<u32>>
    {
        let (Some(first), Some(last)) = (self.pages.first(), self.pages.last()) else {
            return Ok(None);
        };
        let count = last.lsda_offset.saturating_sub(first.lsda_offset) / 8;
        let mut reader = ByteReader::new(self.data, self.endian);
        reader.seek(first.lsda_offset as usize, "LSDA array")?;
        for _ in 0..count {
            let function = reader.u32("LSDA function offset")?;
            let lsda = reader.u32("LSDA offset")?;
            if u64::from(function) == address {
                return Ok(Some(lsda));
            }
        }
        Ok(None)
    }
}

fn read_u32_table(data: &[u8], endian: RunTimeEndian, offset: u32, count: u32, context: &'static str) -> Result<Vec<u32>>
{
    let mut reader = ByteReader::new(data, endian);
    reader.seek(offset as usize, context)?;
    (0..count).map(|_| reader.u32(context)).collect()
}

#[cfg(test)]
mod tests
{
    use super::*;

    /// Header, one global encoding, one regular page and one compressed
    /// page with one local encoding.
    fn section() -> Vec<u8>
    {
        let mut data = Vec::new();
        let put = |data: &mut Vec<u8>, value: u32| data.extend_from_slice(&value.to_le_bytes());

        // header: globals at 28 (1), personalities at 32 (1), index at 36 (3)
        for value in [1, 28, 1, 32, 1, 36, 3] {
            put(&mut data, value);
        }
        put(&mut data, 0x0100_0000); // global encoding 0
        put(&mut data, 0x4000); // personality 1
        // index: 36..72, LSDA array at 72 (one entry)
        for value in [0x1000, 80, 72, 0x3000, 104, 80, 0x4000, 0, 80] {
            put(&mut data, value);
        }
        // LSDA array at 72
        put(&mut data, 0x1000);
        put(&mut data, 0x9000);
        // regular page at 80: kind, entries at +8 (2 entries)
        assert_eq!(data.len(), 80);
        put(&mut data, REGULAR_PAGE);
        data.extend_from_slice(&8u16.to_le_bytes());
        data.extend_from_slice(&2u16.to_le_bytes());
        put(&mut data, 0x1000);
        put(&mut data, 0xd100_0000);
        put(&mut data, 0x2000);
        put(&mut data, 0);
        // compressed page at 104: entries at +12 (2), locals at +20 (1)
        assert_eq!(data.len(), 104);
        put(&mut data, COMPRESSED_PAGE);
        for value in [12u16, 2, 20, 1] {
            data.extend_from_slice(&value.to_le_bytes());
        }
        put(&mut data, 0x0000_0000); // delta 0, global 0
        put(&mut data, 0x0100_0800); // delta 0x800, local 0
        put(&mut data, 0x0200_4000); // local 0: arm64 frameless, 64 bytes
        data
    }

    #[test]
    fn test_regular_page_lookup()
    {
        let data = section();
        let info = CompactUnwindInfo::parse(&data, Architecture::X86_64, RunTimeEndian::Little).unwrap();
        let entry = info.lookup(0x1800).unwrap().unwrap();
        assert_eq!((entry.address, entry.end), (0x1000, 0x2000));
        assert!(entry.is_function_start && entry.has_frame && entry.has_lsda);
        assert_eq!(entry.personality, Some(0x4000));
        assert_eq!(entry.lsda, Some(0x9000));
        assert_eq!(entry.cfa_register, Some(6));

        let entry = info.lookup(0x2004).unwrap().unwrap();
        assert_eq!(entry.command, CompactCommand::NoInfo);
        assert!(info.lookup(0x0fff).unwrap().is_none());
        assert!(info.lookup(0x4000).unwrap().is_none());
    }

    /// Index 0 is below the global count (1) and selects `global[0]`; index 1
    /// selects `local[1 - 1]`, the order libunwind's `CompactUnwinder` uses.
    #[test]
    fn test_compressed_indices_below_global_count_select_globals()
    {
        let data = section();
        let info = CompactUnwindInfo::parse(&data, Architecture::Arm64, RunTimeEndian::Little).unwrap();
        let global = info.record_for_address(0x3100).unwrap().unwrap();
        assert_eq!(global.encoding, CompactEncoding(0x0100_0000));
        assert_eq!((global.address, global.end), (0x3000, 0x3800));

        let local = info.lookup(0x3900).unwrap().unwrap();
        assert_eq!(local.encoding, CompactEncoding(0x0200_4000));
        assert_eq!((local.cfa_register, local.cfa_offset), (Some(31), 64));
        assert_eq!(local.end, 0x4000);

        let all = info.entries().unwrap();
        let addresses: Vec<u64> = all.iter().map(|record| record.address).collect();
        assert_eq!(addresses, [0x1000, 0x2000, 0x3000, 0x3800]);
    }

    #[test]
    fn test_bad_version()
    {
        let mut data = section();
        data[0] = 2;
        let err = CompactUnwindInfo::parse(&data, Architecture::X86_64, RunTimeEndian::Little).unwrap_err();
        assert!(matches!(err, DecodeError::Unsupported(_)));
    }
}
