//! # Error Types
//!
//! Error handling for every decoder in the crate.
//!
//! We use `thiserror` to derive `Error` and the display messages. Every
//! variant belongs to one [`ErrorKind`], so callers can tell "nothing here"
//! apart from "present but broken" without matching individual variants.

use gimli::DwAt;
use thiserror::Error;

/// Broad classification of a [`DecodeError`].
///
/// The rendering layer is expected to show `Malformed` and `Unsupported`
/// differently from `NotFound`, which is a normal outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind
{
    /// Bytes at a known offset do not follow the encoding.
    Malformed,
    /// The encoding is recognised but decoding it is not implemented.
    Unsupported,
    /// Something the operation depends on is absent (a section, a base address).
    MissingPrerequisite,
    /// The query has no answer; not an error in the data.
    NotFound,
}

/// Main error type for decoding operations
///
/// ## Error Categories
///
/// 1. **Malformed**: UnknownOpcode, Malformed, UnexpectedEof, LocationParse, InvalidReference
/// 2. **Unsupported**: Unsupported, NotImplemented
/// 3. **Missing prerequisites**: MissingSection, NoBaseAddress, NoAddressTable
/// 4. **Not found**: NoFrameInfo, NoFunctionAtAddress, AmbiguousFunction
/// 5. **Loader errors**: Object, Io
#[derive(Error, Debug)]
pub enum DecodeError
{
    /// An expression contained an opcode outside the decoder's table.
    #[error("Unknown opcode 0x{opcode:02x} at offset {offset}")]
    UnknownOpcode
    {
        opcode: u8,
        offset: usize,
    },

    /// Structurally invalid data.
    #[error("Malformed encoding at offset 0x{offset:x}: {context}")]
    Malformed
    {
        offset: u64,
        context: String,
    },

    /// The buffer ended in the middle of a record or operand.
    #[error("Unexpected end of data at offset 0x{offset:x} while reading {context}")]
    UnexpectedEof
    {
        offset: u64,
        context: &'static str,
    },

    /// A location list entry could not be parsed.
    ///
    /// Carries the attribute, the section offset and a window of the raw bytes
    /// so the failure can be reported with enough context to reproduce it.
    #[error("Failed to parse location list for {attribute} at offset 0x{offset:x}: {reason}")]
    LocationParse
    {
        attribute: DwAt,
        offset: u64,
        bytes: Vec<u8>,
        reason: String,
    },

    /// A DIE reference points outside every known unit.
    #[error("Invalid DIE reference 0x{offset:x}")]
    InvalidReference
    {
        offset: u64,
    },

    /// The data uses a feature this crate recognises but does not handle.
    #[error("Unsupported: {0}")]
    Unsupported(String),

    /// Decoding is known to be incomplete for this encoding.
    #[error("Not implemented: {0}")]
    NotImplemented(String),

    /// A section the attribute depends on is absent.
    #[error("Missing section {0}")]
    MissingSection(&'static str),

    /// A relative range could not be resolved because no base address is known.
    #[error("No base address available for relative entry at offset 0x{offset:x}")]
    NoBaseAddress
    {
        offset: u64,
    },

    /// An indexed entry was found but no address table was supplied.
    #[error("No address table available to resolve an indexed address")]
    NoAddressTable,

    /// No FDE covers the program counter.
    #[error("No frame information for address 0x{pc:x}")]
    NoFrameInfo
    {
        pc: u64,
    },

    /// No function's code ranges contain the address.
    #[error("No function contains address 0x{address:x}")]
    NoFunctionAtAddress
    {
        address: u64,
    },

    /// More than one top-level function claims the address.
    #[error("{} functions contain address 0x{address:x}", .candidates.len())]
    AmbiguousFunction
    {
        address: u64,
        candidates: Vec<u64>,
    },

    /// The object file could not be parsed.
    #[error("Object file error: {0}")]
    Object(String),

    /// I/O error while reading an object file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DecodeError
{
    /// Which category this error belongs to.
    #[must_use]
    pub fn kind(&self) -> ErrorKind
    {
        match self {
            DecodeError::UnknownOpcode { .. }
            | DecodeError::Malformed { .. }
            | DecodeError::UnexpectedEof { .. }
            | DecodeError::LocationParse { .. }
            | DecodeError::InvalidReference { .. }
            | DecodeError::Object(_)
            | DecodeError::Io(_) => ErrorKind::Malformed,
            DecodeError::Unsupported(_) | DecodeError::NotImplemented(_) => ErrorKind::Unsupported,
            DecodeError::MissingSection(_) | DecodeError::NoBaseAddress { .. } | DecodeError::NoAddressTable => {
                ErrorKind::MissingPrerequisite
            }
            DecodeError::NoFrameInfo { .. }
            | DecodeError::NoFunctionAtAddress { .. }
            | DecodeError::AmbiguousFunction { .. } => ErrorKind::NotFound,
        }
    }

    /// `true` for legitimate empty results.
    #[must_use]
    pub fn is_not_found(&self) -> bool
    {
        self.kind() == ErrorKind::NotFound
    }

    pub(crate) fn malformed(offset: u64, context: impl Into<String>) -> Self
    {
        DecodeError::Malformed {
            offset,
            context: context.into(),
        }
    }
}

/// Convenience type alias for `Result<T, DecodeError>`
pub type Result<T> = std::result::Result<T, DecodeError>;

/// Wrap a `gimli` reader error with the context and offset it happened at.
pub(crate) fn map_gimli_error(context: &'static str, offset: u64, err: gimli::Error) -> DecodeError
{
    match err {
        gimli::Error::UnexpectedEof(_) => DecodeError::UnexpectedEof { offset, context },
        gimli::Error::UnknownVersion(version) => DecodeError::Unsupported(format!("{context}: version {version}")),
        gimli::Error::UnknownCallFrameInstruction(opcode) => DecodeError::UnknownOpcode {
            opcode: opcode.0,
            offset: offset as usize,
        },
        gimli::Error::UnknownAugmentation => DecodeError::Unsupported(format!("{context}: unknown augmentation")),
        other => DecodeError::malformed(offset, format!("{context}: {other}")),
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_error_kinds()
    {
        assert_eq!(DecodeError::NoFrameInfo { pc: 0x10 }.kind(), ErrorKind::NotFound);
        assert_eq!(
            DecodeError::UnknownOpcode { opcode: 0xff, offset: 3 }.kind(),
            ErrorKind::Malformed
        );
        assert_eq!(
            DecodeError::NotImplemented("frameless".into()).kind(),
            ErrorKind::Unsupported
        );
        assert_eq!(DecodeError::NoBaseAddress { offset: 0 }.kind(), ErrorKind::MissingPrerequisite);
        assert!(DecodeError::NoFunctionAtAddress { address: 1 }.is_not_found());
    }

    #[test]
    fn test_error_display()
    {
        let err = DecodeError::UnknownOpcode { opcode: 0xee, offset: 4 };
        assert_eq!(err.to_string(), "Unknown opcode 0xee at offset 4");

        let err = DecodeError::AmbiguousFunction {
            address: 0x1000,
            candidates: vec![1, 2],
        };
        assert!(err.to_string().starts_with("2 functions"));
    }

    #[test]
    fn test_gimli_eof_maps_to_unexpected_eof()
    {
        let err = map_gimli_error("operand", 7, gimli::Error::UnexpectedEof(gimli::ReaderOffsetId(0)));
        assert!(matches!(err, DecodeError::UnexpectedEof { offset: 7, .. }));
    }
}
