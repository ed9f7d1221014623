//! # Call Frame Information
//!
//! Decoding of `.debug_frame` and `.eh_frame` into unwind rows, on top of
//! `gimli`'s CFI reader.
//!
//! ## Layers
//!
//! 1. [`parse`]: walk a section's CIEs and FDEs and summarize their headers,
//!    including the `.eh_frame` augmentations and pointer encodings.
//! 2. [`instructions`]: list the `DW_CFA_*` instruction streams for display.
//! 3. [`table`]: evaluate an FDE into [`DecodedFrameRow`]s.
//!
//! [`CallFrameInfo`] ties the layers together for address lookups.
//!
//! ## References
//!
//! - [DWARF 5, section 6.4](https://dwarfstd.org/doc/DWARF5.pdf)
//! - [LSB `.eh_frame`](https://refspecs.linuxfoundation.org/LSB_5.0.0/LSB-Core-generic/LSB-Core-generic/ehframechpt.html)

pub mod instructions;
pub mod parse;
pub mod table;

pub use instructions::{CfiInstruction, FrameInstructions};
pub use parse::{CfiKind, CfiSection, Cie, Fde, Pointer};
pub use table::{CfaRule, DecodedFrameRow, RegisterRule, UnwindTable};

use tracing::trace;

use crate::error::{DecodeError, Result};

/// Call frame information from every CFI section of an object.
///
/// Sections are searched in the order they were added.
#[derive(Debug, Clone, Default)]
pub struct CallFrameInfo
{
    sections: Vec<CfiSection>,
}

impl CallFrameInfo
{
    #[must_use]
    pub fn new() -> Self
    {
        Self::default()
    }

    #[must_use]
    pub fn from_sections(sections: Vec<CfiSection>) -> Self
    {
        Self { sections }
    }

    pub fn push(&mut self, section: CfiSection)
    {
        self.sections.push(section);
    }

    #[must_use]
    pub fn sections(&self) -> &[CfiSection]
    {
        &self.sections
    }

    #[must_use]
    pub fn is_empty(&self) -> bool
    {
        self.sections.iter().all(|section| section.fdes().is_empty())
    }

    /// The section holding the FDE that covers `pc`, and that FDE.
    pub fn fde_for_address(&self, pc: u64) -> Result<(&CfiSection, &Fde)>
    {
        for section in &self.sections {
            if let Some(fde) = section.fde_for_address(pc) {
                trace!(pc, section = section.kind().section_name(), fde = fde.offset, "found FDE");
                return Ok((section, fde));
            }
        }
        Err(DecodeError::NoFrameInfo { pc })
    }

    /// The FDE covering `pc` and the CIE it uses.
    pub fn entries_for_address(&self, pc: u64) -> Result<(&Cie, &Fde)>
    {
        let (section, fde) = self.fde_for_address(pc)?;
        let cie = section
            .cie_for(fde)
            .ok_or(DecodeError::InvalidReference { offset: fde.cie_offset })?;
        Ok((cie, fde))
    }

    /// The unwind row in effect at `pc`.
    pub fn row_for_address(&self, pc: u64) -> Result<DecodedFrameRow>
    {
        let (section, fde) = self.fde_for_address(pc)?;
        let table = UnwindTable::build(section, fde)?;
        table.row_for_address(pc).cloned().ok_or(DecodeError::NoFrameInfo { pc })
    }

    /// The instructions behind the row in effect at `pc`.
    pub fn instructions_for_address(&self, pc: u64) -> Result<FrameInstructions>
    {
        let (section, fde) = self.fde_for_address(pc)?;
        section.instructions(fde)
    }
}

/// A `.debug_frame` with a version 1 CIE (data alignment -8, return address
/// in r16) and one FDE over `[0x2000, 0x2100)`.
#[cfg(test)]
pub(crate) fn test_section(code_alignment: u8, initial: &[u8], instructions: &[u8]) -> CfiSection
{
    let mut data = Vec::new();
    let mut cie = vec![0xff, 0xff, 0xff, 0xff, 1, 0, code_alignment, 0x78, 16];
    cie.extend_from_slice(initial);
    data.extend_from_slice(&(cie.len() as u32).to_le_bytes());
    data.extend_from_slice(&cie);

    let mut fde = 0u32.to_le_bytes().to_vec();
    fde.extend_from_slice(&0x2000u64.to_le_bytes());
    fde.extend_from_slice(&0x100u64.to_le_bytes());
    fde.extend_from_slice(instructions);
    data.extend_from_slice(&(fde.len() as u32).to_le_bytes());
    data.extend_from_slice(&fde);
    CfiSection::parse(&data, CfiKind::DebugFrame, 8, gimli::RunTimeEndian::Little, 0).unwrap()
}
