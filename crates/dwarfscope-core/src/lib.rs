//! # dwarfscope-core
//!
//! Decoders for the debugging information that compilers emit alongside
//! machine code.
//!
//! This crate provides:
//! - DWARF expression decoding and formatting (all versions, vendor opcodes)
//! - Location and range list resolution
//! - Call frame information (`.debug_frame`/`.eh_frame`) and unwind rows
//! - Mach-O compact unwind (`__unwind_info`) lookup
//! - Lexical scope, inline chain and local variable resolution
//! - Function signature reconstruction
//!
//! ## Data flow
//!
//! [`image::ObjectImage`] reads an object file and builds the owned
//! [`model::DebugInfo`]; every resolver works on that model, so they can be
//! exercised without an object file by building units with
//! [`model::UnitBuilder`].
//!
//! Every fallible operation returns [`Result`]; "nothing here" outcomes are
//! distinguishable through [`DecodeError::is_not_found`].

pub mod cfi;
pub mod compact_unwind;
pub mod error;
pub mod expr;
pub mod image;
pub mod location;
pub mod model;
pub mod ranges;
mod reader;
pub mod registers;
pub mod scope;
pub mod signature;
pub mod types;

// Re-export commonly used types
pub use cfi::{CallFrameInfo, DecodedFrameRow};
pub use compact_unwind::{CompactUnwindEntry, CompactUnwindInfo};
pub use error::{DecodeError, ErrorKind, Result};
pub use expr::{decode_expression, format_expression, ExpressionProfile, FormatOptions, Operation};
pub use gimli::RunTimeEndian;
pub use image::ObjectImage;
pub use location::{LocationDescription, LocationResolver};
pub use model::DebugInfo;
pub use ranges::RangeResolver;
pub use scope::{ScopeFrame, ScopeResolver};
pub use signature::{FunctionSignature, SignatureReconstructor};
pub use types::Architecture;
