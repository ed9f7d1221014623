//! Reading `.debug_frame` and `.eh_frame` entries through `gimli`.
//!
//! [`CfiSection`] keeps the section bytes together with a summary of every
//! CIE and FDE. Unwind rows and instruction listings re-parse an FDE at its
//! recorded offset when they are asked for.

use std::collections::HashMap;

use gimli::{BaseAddresses, CieOrFde, DebugFrame, EhFrame, EndianSlice, RunTimeEndian, UnwindOffset, UnwindSection, Vendor};
use tracing::{debug, warn};

use crate::error::{map_gimli_error, DecodeError, Result};
use crate::types::Architecture;

/// The reader every CFI section is parsed with.
pub(crate) type Slice<'a> = EndianSlice<'a, RunTimeEndian>;

/// Which of the two section layouts is being read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CfiKind
{
    DebugFrame,
    EhFrame,
}

impl CfiKind
{
    #[must_use]
    pub const fn section_name(self) -> &'static str
    {
        match self {
            CfiKind::DebugFrame => ".debug_frame",
            CfiKind::EhFrame => ".eh_frame",
        }
    }
}

/// A decoded `DW_EH_PE_*` pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pointer
{
    /// The value is the address itself.
    Direct(u64),
    /// The value is the address of a word holding the address.
    Indirect(u64),
}

impl Pointer
{
    #[must_use]
    pub const fn value(self) -> u64
    {
        match self {
            Pointer::Direct(value) | Pointer::Indirect(value) => value,
        }
    }
}

impl From<gimli::Pointer> for Pointer
{
    fn from(pointer: gimli::Pointer) -> Self
    {
        match pointer {
            gimli::Pointer::Direct(value) => Pointer::Direct(value),
            gimli::Pointer::Indirect(value) => Pointer::Indirect(value),
        }
    }
}

/// Common Information Entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cie
{
    /// Section offset of the record's length field.
    pub offset: u64,
    pub version: u8,
    /// Rebuilt from the parsed augmentation data, in `zPLRS` order.
    pub augmentation: String,
    pub address_size: u8,
    pub code_alignment_factor: u64,
    pub data_alignment_factor: i64,
    pub return_address_register: u16,
    /// `DW_EH_PE_*` encoding of FDE addresses, when the CIE states one.
    pub fde_encoding: Option<u8>,
    pub lsda_encoding: Option<u8>,
    pub personality: Option<Pointer>,
    pub is_signal_frame: bool,
}

impl Cie
{
    fn from_entry(cie: &gimli::CommonInformationEntry<Slice<'_>>) -> Self
    {
        Self {
            offset: cie.offset() as u64,
            version: cie.version(),
            augmentation: augmentation_string(cie),
            address_size: cie.address_size(),
            code_alignment_factor: cie.code_alignment_factor(),
            data_alignment_factor: cie.data_alignment_factor(),
            return_address_register: cie.return_address_register().0,
            fde_encoding: cie.fde_address_encoding().map(|encoding| encoding.0),
            lsda_encoding: cie.lsda_encoding().map(|encoding| encoding.0),
            personality: cie.personality().map(Pointer::from),
            is_signal_frame: cie.is_signal_trampoline(),
        }
    }
}

fn augmentation_string(cie: &gimli::CommonInformationEntry<Slice<'_>>) -> String
{
    if cie.augmentation().is_none() {
        return String::new();
    }
    let mut text = String::from("z");
    if cie.personality().is_some() {
        text.push('P');
    }
    if cie.has_lsda() {
        text.push('L');
    }
    if cie.fde_address_encoding().is_some() {
        text.push('R');
    }
    if cie.is_signal_trampoline() {
        text.push('S');
    }
    text
}

/// Frame Description Entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fde
{
    /// Section offset of the record's length field.
    pub offset: u64,
    /// Section offset of the CIE this FDE uses.
    pub cie_offset: u64,
    pub initial_location: u64,
    pub address_range: u64,
    pub lsda: Option<Pointer>,
}

impl Fde
{
    fn from_entry(fde: &gimli::FrameDescriptionEntry<Slice<'_>>, cie_offset: u64) -> Self
    {
        Self {
            offset: fde.offset() as u64,
            cie_offset,
            initial_location: fde.initial_address(),
            address_range: fde.len(),
            lsda: fde.lsda().map(Pointer::from),
        }
    }

    /// First address past the described code.
    #[must_use]
    pub fn end(&self) -> u64
    {
        self.initial_location.saturating_add(self.address_range)
    }

    #[must_use]
    pub fn contains(&self, pc: u64) -> bool
    {
        (self.initial_location..self.end()).contains(&pc)
    }
}

/// Every CIE and FDE of one section.
#[derive(Debug, Clone)]
pub struct CfiSection
{
    kind: CfiKind,
    data: Vec<u8>,
    endian: RunTimeEndian,
    address_size: u8,
    section_address: u64,
    vendor: Vendor,
    cies: Vec<Cie>,
    cie_index: HashMap<u64, usize>,
    /// Sorted by `initial_location`.
    fdes: Vec<Fde>,
}

impl CfiSection
{
    /// Parse a whole section.
    ///
    /// `address_size` is used for CIEs that do not state one (versions 1 and
    /// 3). `section_address` is the address the section is loaded at, needed
    /// for pc-relative pointers in `.eh_frame`.
    pub fn parse(
        bytes: &[u8],
        kind: CfiKind,
        address_size: u8,
        endian: RunTimeEndian,
        section_address: u64,
    ) -> Result<Self>
    {
        let mut section = Self {
            kind,
            data: bytes.to_vec(),
            endian,
            address_size,
            section_address,
            vendor: Vendor::Default,
            cies: Vec::new(),
            cie_index: HashMap::new(),
            fdes: Vec::new(),
        };
        let bases = section.bases();
        let (cies, mut fdes) = match kind {
            CfiKind::DebugFrame => read_entries(&section.debug_frame(), &bases, kind)?,
            CfiKind::EhFrame => read_entries(&section.eh_frame(), &bases, kind)?,
        };
        fdes.sort_by_key(|fde| fde.initial_location);
        debug!(
            section = kind.section_name(),
            cies = cies.len(),
            fdes = fdes.len(),
            "parsed call frame information"
        );

        section.cie_index = cies.iter().enumerate().map(|(index, cie)| (cie.offset, index)).collect();
        section.cies = cies;
        section.fdes = fdes;
        Ok(section)
    }

    /// Decode architecture-specific opcodes for `architecture`.
    ///
    /// On ARM64 `0x2d` is `DW_CFA_AARCH64_negate_ra_state`.
    #[must_use]
    pub fn with_architecture(mut self, architecture: Architecture) -> Self
    {
        self.vendor = match architecture {
            Architecture::Arm64 => Vendor::AArch64,
            _ => Vendor::Default,
        };
        self
    }

    #[must_use]
    pub fn kind(&self) -> CfiKind
    {
        self.kind
    }

    #[must_use]
    pub fn endian(&self) -> RunTimeEndian
    {
        self.endian
    }

    #[must_use]
    pub fn cies(&self) -> &[Cie]
    {
        &self.cies
    }

    #[must_use]
    pub fn fdes(&self) -> &[Fde]
    {
        &self.fdes
    }

    /// The CIE `fde` refers to.
    #[must_use]
    pub fn cie_for(&self, fde: &Fde) -> Option<&Cie>
    {
        self.cie_index.get(&fde.cie_offset).map(|&index| &self.cies[index])
    }

    /// The FDE whose range contains `pc`.
    #[must_use]
    pub fn fde_for_address(&self, pc: u64) -> Option<&Fde>
    {
        let after = self.fdes.partition_point(|fde| fde.initial_location <= pc);
        self.fdes[..after]
            .iter()
            .rev()
            .find(|fde| fde.address_range > 0)
            .filter(|fde| fde.contains(pc))
    }

    pub(crate) fn bases(&self) -> BaseAddresses
    {
        BaseAddresses::default().set_eh_frame(self.section_address)
    }

    pub(crate) fn debug_frame(&self) -> DebugFrame<Slice<'_>>
    {
        let mut section = DebugFrame::new(&self.data, self.endian);
        section.set_address_size(self.address_size);
        section.set_vendor(self.vendor);
        section
    }

    pub(crate) fn eh_frame(&self) -> EhFrame<Slice<'_>>
    {
        let mut section = EhFrame::new(&self.data, self.endian);
        section.set_address_size(self.address_size);
        section.set_vendor(self.vendor);
        section
    }
}

/// Summarize every entry, skipping FDEs whose CIE cannot be read.
fn read_entries<'a, S>(section: &S, bases: &BaseAddresses, kind: CfiKind) -> Result<(Vec<Cie>, Vec<Fde>)>
where
    S: UnwindSection<Slice<'a>>,
{
    let mut cies = Vec::new();
    let mut fdes = Vec::new();
    // Start of the last entry read, reported when the next one fails.
    let mut position = 0;
    let mut entries = section.entries(bases);
    while let Some(entry) = entries
        .next()
        .map_err(|err| map_gimli_error("reading call frame entry", position, err))?
    {
        match entry {
            CieOrFde::Cie(cie) => {
                position = cie.offset() as u64;
                cies.push(Cie::from_entry(&cie));
            }
            CieOrFde::Fde(partial) => {
                position = partial.offset() as u64;
                let cie_offset = UnwindOffset::into(partial.cie_offset()) as u64;
                match partial.parse(|section, bases, offset| section.cie_from_offset(bases, offset)) {
                    Ok(fde) => fdes.push(Fde::from_entry(&fde, cie_offset)),
                    Err(err) => warn!(
                        section = kind.section_name(),
                        fde = position,
                        cie = cie_offset,
                        %err,
                        "skipping FDE that does not parse"
                    ),
                }
            }
        }
    }
    Ok((cies, fdes))
}

/// Fully parse the FDE at section offset `offset`, CIE included.
pub(crate) fn parse_fde<'a, S>(
    section: &S,
    bases: &BaseAddresses,
    offset: u64,
) -> Result<gimli::FrameDescriptionEntry<Slice<'a>>>
where
    S: UnwindSection<Slice<'a>>,
{
    let start = usize::try_from(offset).map_err(|_| DecodeError::InvalidReference { offset })?;
    let partial = section
        .partial_fde_from_offset(bases, S::Offset::from(start))
        .map_err(|err| map_gimli_error("reading FDE", offset, err))?;
    partial
        .parse(|section, bases, cie| section.cie_from_offset(bases, cie))
        .map_err(|err| map_gimli_error("reading FDE", offset, err))
}
