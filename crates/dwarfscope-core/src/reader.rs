//! Bounds-checked cursor over section bytes.
//!
//! A thin layer over `gimli::EndianSlice` that remembers where it started so
//! every error carries the absolute offset it happened at.

use gimli::{EndianSlice, Reader, RunTimeEndian};

use crate::error::{map_gimli_error, DecodeError, Result};

#[derive(Debug, Clone, Copy)]
pub(crate) struct ByteReader<'a>
{
    start: EndianSlice<'a, RunTimeEndian>,
    rest: EndianSlice<'a, RunTimeEndian>,
    base: u64,
}

impl<'a> ByteReader<'a>
{
    pub(crate) fn new(bytes: &'a [u8], endian: RunTimeEndian) -> Self
    {
        Self::at(bytes, endian, 0)
    }

    /// Cursor whose reported offsets start at `base` (a section offset).
    pub(crate) fn at(bytes: &'a [u8], endian: RunTimeEndian, base: u64) -> Self
    {
        let slice = EndianSlice::new(bytes, endian);
        Self {
            start: slice,
            rest: slice,
            base,
        }
    }

    pub(crate) fn endian(&self) -> RunTimeEndian
    {
        self.start.endian()
    }

    /// Bytes consumed since construction.
    pub(crate) fn position(&self) -> usize
    {
        Reader::offset_from(&self.rest, &self.start)
    }

    /// Absolute offset of the next byte.
    pub(crate) fn offset(&self) -> u64
    {
        self.base + self.position() as u64
    }

    pub(crate) fn is_empty(&self) -> bool
    {
        self.rest.is_empty()
    }

    fn fail(&self, context: &'static str, err: gimli::Error) -> DecodeError
    {
        map_gimli_error(context, self.offset(), err)
    }

    pub(crate) fn u8(&mut self, context: &'static str) -> Result<u8>
    {
        let at = *self;
        self.rest.read_u8().map_err(|e| at.fail(context, e))
    }

    pub(crate) fn i8(&mut self, context: &'static str) -> Result<i8>
    {
        let at = *self;
        self.rest.read_i8().map_err(|e| at.fail(context, e))
    }

    pub(crate) fn u16(&mut self, context: &'static str) -> Result<u16>
    {
        let at = *self;
        self.rest.read_u16().map_err(|e| at.fail(context, e))
    }

    pub(crate) fn i16(&mut self, context: &'static str) -> Result<i16>
    {
        let at = *self;
        self.rest.read_i16().map_err(|e| at.fail(context, e))
    }

    pub(crate) fn u32(&mut self, context: &'static str) -> Result<u32>
    {
        let at = *self;
        self.rest.read_u32().map_err(|e| at.fail(context, e))
    }

    pub(crate) fn i32(&mut self, context: &'static str) -> Result<i32>
    {
        let at = *self;
        self.rest.read_i32().map_err(|e| at.fail(context, e))
    }

    pub(crate) fn u64(&mut self, context: &'static str) -> Result<u64>
    {
        let at = *self;
        self.rest.read_u64().map_err(|e| at.fail(context, e))
    }

    pub(crate) fn i64(&mut self, context: &'static str) -> Result<i64>
    {
        let at = *self;
        self.rest.read_i64().map_err(|e| at.fail(context, e))
    }

    pub(crate) fn uleb(&mut self, context: &'static str) -> Result<u64>
    {
        let at = *self;
        self.rest.read_uleb128().map_err(|e| at.fail(context, e))
    }

    pub(crate) fn sleb(&mut self, context: &'static str) -> Result<i64>
    {
        let at = *self;
        self.rest.read_sleb128().map_err(|e| at.fail(context, e))
    }

    /// Read an unsigned value of `size` bytes (1, 2, 4 or 8).
    pub(crate) fn address(&mut self, size: u8, context: &'static str) -> Result<u64>
    {
        let at = *self;
        self.rest.read_address(size).map_err(|e| at.fail(context, e))
    }

    /// Read a section offset of `size` bytes (4 or 8).
    pub(crate) fn sized_offset(&mut self, size: u8, context: &'static str) -> Result<u64>
    {
        match size {
            4 => self.u32(context).map(u64::from),
            8 => self.u64(context),
            other => Err(DecodeError::malformed(self.offset(), format!("{context}: invalid offset size {other}"))),
        }
    }

    /// Borrow the next `len` bytes.
    pub(crate) fn bytes(&mut self, len: usize, context: &'static str) -> Result<&'a [u8]>
    {
        let at = *self;
        self.rest
            .split(len)
            .map(|taken| taken.slice())
            .map_err(|e| at.fail(context, e))
    }

    /// Borrow `len` bytes where `len` came from the data itself.
    pub(crate) fn block(&mut self, len: u64, context: &'static str) -> Result<&'a [u8]>
    {
        let len = usize::try_from(len).map_err(|_| DecodeError::UnexpectedEof {
            offset: self.offset(),
            context,
        })?;
        self.bytes(len, context)
    }

    /// Move to absolute position `position` (relative to the start).
    pub(crate) fn seek(&mut self, position: usize, context: &'static str) -> Result<()>
    {
        let mut rest = self.start;
        rest.skip(position).map_err(|e| self.fail(context, e))?;
        self.rest = rest;
        Ok(())
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_leb128_and_offsets()
    {
        let bytes = [0xe5, 0x8e, 0x26, 0x7f, 0x01];
        let mut reader = ByteReader::at(&bytes, RunTimeEndian::Little, 0x100);
        assert_eq!(reader.uleb("value").unwrap(), 624_485);
        assert_eq!(reader.offset(), 0x103);
        assert_eq!(reader.sleb("value").unwrap(), -1);
        assert_eq!(reader.position(), 4);
        assert!(!reader.is_empty());
    }

    #[test]
    fn test_truncated_read_reports_offset()
    {
        let bytes = [0x01, 0x02, 0x03];
        let mut reader = ByteReader::at(&bytes, RunTimeEndian::Little, 0x40);
        reader.u8("tag").unwrap();
        let err = reader.u32("length").unwrap_err();
        assert!(matches!(
            err,
            DecodeError::UnexpectedEof {
                offset: 0x41,
                context: "length"
            }
        ));
    }

    #[test]
    fn test_big_endian_and_seek()
    {
        let bytes = [0x12, 0x34, 0x56, 0x78];
        let mut reader = ByteReader::new(&bytes, RunTimeEndian::Big);
        assert_eq!(reader.u16("half").unwrap(), 0x1234);
        reader.seek(1, "seek").unwrap();
        assert_eq!(reader.bytes(2, "pair").unwrap(), &[0x34, 0x56]);
        assert!(reader.seek(5, "seek").is_err());
    }
}
