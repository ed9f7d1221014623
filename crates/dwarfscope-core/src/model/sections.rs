//! Raw section bytes the resolvers read from.

use gimli::RunTimeEndian;

use crate::error::{DecodeError, Result};
use crate::reader::ByteReader;

/// Section contents shared by all units of one object.
///
/// Absent sections are empty; resolvers report
/// [`DecodeError::MissingSection`] when an attribute needs one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sections
{
    pub debug_loc: Vec<u8>,
    pub debug_loclists: Vec<u8>,
    pub debug_ranges: Vec<u8>,
    pub debug_rnglists: Vec<u8>,
    pub debug_addr: Vec<u8>,
}

/// Index-to-address lookup over a unit's contribution to `.debug_addr`.
#[derive(Debug, Clone, Copy)]
pub struct AddressTable<'a>
{
    data: &'a [u8],
    base: u64,
    address_size: u8,
    endian: RunTimeEndian,
}

impl<'a> AddressTable<'a>
{
    /// `base` is the unit's `DW_AT_addr_base` (first entry, past the header).
    #[must_use]
    pub fn new(data: &'a [u8], base: u64, address_size: u8, endian: RunTimeEndian) -> Self
    {
        Self {
            data,
            base,
            address_size,
            endian,
        }
    }

    /// Address stored at `index`.
    pub fn get(&self, index: u64) -> Result<u64>
    {
        let offset = index
            .checked_mul(u64::from(self.address_size))
            .and_then(|delta| delta.checked_add(self.base))
            .ok_or_else(|| DecodeError::malformed(self.base, format!("address index {index} overflows")))?;
        let position = usize::try_from(offset)
            .map_err(|_| DecodeError::malformed(offset, "address index out of range"))?;
        let mut reader = ByteReader::new(self.data, self.endian);
        reader.seek(position, ".debug_addr entry")?;
        reader.address(self.address_size, ".debug_addr entry")
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_indexed_lookup()
    {
        let mut data = vec![0u8; 8];
        data.extend_from_slice(&0x1000u64.to_le_bytes());
        data.extend_from_slice(&0x2000u64.to_le_bytes());
        let table = AddressTable::new(&data, 8, 8, RunTimeEndian::Little);
        assert_eq!(table.get(0).unwrap(), 0x1000);
        assert_eq!(table.get(1).unwrap(), 0x2000);
        assert!(matches!(table.get(2), Err(DecodeError::UnexpectedEof { .. })));
    }
}
