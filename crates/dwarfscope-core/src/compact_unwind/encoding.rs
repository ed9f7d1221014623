//! The 32-bit compact unwind encoding word.
//!
//! The top byte is shared by all architectures (function start, LSDA,
//! personality index, mode); the low 24 bits are interpreted per mode.
//! Bit layouts follow `compact_unwind_encoding.h` from libunwind.

use std::collections::BTreeMap;
use std::fmt;

use crate::error::{DecodeError, Result};
use crate::types::Architecture;

const START: u32 = 0x8000_0000;
const HAS_LSDA: u32 = 0x4000_0000;
const PERSONALITY_SHIFT: u32 = 28;
const MODE_SHIFT: u32 = 24;

const X86_MODE_FRAME: u8 = 1;
const X86_MODE_STACK_IMMEDIATE: u8 = 2;
const X86_MODE_STACK_INDIRECT: u8 = 3;
const X86_MODE_DWARF: u8 = 4;

const ARM64_MODE_FRAMELESS: u8 = 2;
const ARM64_MODE_DWARF: u8 = 3;
const ARM64_MODE_FRAME: u8 = 4;

/// DWARF numbers of the registers compact slots 1..=6 name.
const X86_64_SAVED: [u16; 6] = [3, 12, 13, 14, 15, 6];
const X86_SAVED: [u16; 6] = [3, 1, 2, 7, 6, 5];

/// ARM64 pair flags: bit, first register of the pair.
const ARM64_PAIRS: [(u32, u16); 9] = [
    (0x001, 19),
    (0x002, 21),
    (0x004, 23),
    (0x008, 25),
    (0x010, 27),
    (0x100, 72),
    (0x200, 74),
    (0x400, 76),
    (0x800, 78),
];

/// How the frame is described.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactCommand
{
    /// No unwind information for this range.
    NoInfo,
    /// Standard frame-pointer prologue.
    Frame,
    /// Fixed stack size, no frame pointer.
    Frameless,
    /// Stack size is an immediate inside the function's prologue.
    FramelessIndirect,
    /// Use the DWARF FDE at this `.eh_frame` offset.
    Dwarf
    {
        fde_offset: u32,
    },
}

impl fmt::Display for CompactCommand
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        match self {
            CompactCommand::NoInfo => f.write_str("none"),
            CompactCommand::Frame => f.write_str("frame"),
            CompactCommand::Frameless => f.write_str("frameless"),
            CompactCommand::FramelessIndirect => f.write_str("frameless-indirect"),
            CompactCommand::Dwarf { fde_offset } => write!(f, "dwarf (fde {fde_offset:#x})"),
        }
    }
}

/// Frame layout recovered from an encoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedFrame
{
    pub command: CompactCommand,
    /// DWARF number of the register the CFA is computed from.
    pub cfa_register: Option<u16>,
    pub cfa_offset: i64,
    /// Register -> offset from the CFA where its caller value is saved.
    pub saved_registers: BTreeMap<u16, i64>,
}

impl DecodedFrame
{
    fn without_frame(command: CompactCommand) -> Self
    {
        Self {
            command,
            cfa_register: None,
            cfa_offset: 0,
            saved_registers: BTreeMap::new(),
        }
    }
}

/// A raw encoding word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CompactEncoding(pub u32);

impl CompactEncoding
{
    #[must_use]
    pub const fn is_function_start(self) -> bool
    {
        self.0 & START != 0
    }

    #[must_use]
    pub const fn has_lsda(self) -> bool
    {
        self.0 & HAS_LSDA != 0
    }

    /// One-based index into the personality table, 0 for none.
    #[must_use]
    pub const fn personality_index(self) -> u8
    {
        ((self.0 >> PERSONALITY_SHIFT) & 0x3) as u8
    }

    #[must_use]
    pub const fn mode(self) -> u8
    {
        ((self.0 >> MODE_SHIFT) & 0xf) as u8
    }

    /// x86: saved-register area offset from the frame pointer, in words.
    #[must_use]
    pub const fn x86_frame_offset(self) -> u32
    {
        (self.0 >> 16) & 0xff
    }

    /// x86: five 3-bit register slots, slot 0 in the low bits.
    #[must_use]
    pub const fn x86_frame_registers(self) -> u32
    {
        self.0 & 0x7fff
    }

    /// x86 frameless: stack size in words (immediate) or the offset of
    /// the `sub` instruction in the function (indirect).
    #[must_use]
    pub const fn x86_stack_size(self) -> u32
    {
        (self.0 >> 16) & 0xff
    }

    #[must_use]
    pub const fn x86_stack_adjust(self) -> u32
    {
        (self.0 >> 13) & 0x7
    }

    #[must_use]
    pub const fn x86_register_count(self) -> u32
    {
        (self.0 >> 10) & 0x7
    }

    /// Lehmer-coded order of the saved registers.
    #[must_use]
    pub const fn x86_register_permutation(self) -> u32
    {
        self.0 & 0x3ff
    }

    /// ARM64 frameless stack size in bytes.
    #[must_use]
    pub const fn arm64_stack_size(self) -> u32
    {
        ((self.0 >> 12) & 0xfff) * 16
    }

    #[must_use]
    pub const fn dwarf_fde_offset(self) -> u32
    {
        self.0 & 0x00ff_ffff
    }

    /// Which kind of description this is, without decoding registers.
    pub fn command(self, arch: Architecture) -> Result<CompactCommand>
    {
        if self.0 & 0x0fff_ffff == 0 {
            return Ok(CompactCommand::NoInfo);
        }
        let command = match (arch, self.mode()) {
            (Architecture::X86 | Architecture::X86_64, 0) | (Architecture::Arm64, 0) => CompactCommand::NoInfo,
            (Architecture::X86 | Architecture::X86_64, X86_MODE_FRAME) | (Architecture::Arm64, ARM64_MODE_FRAME) => {
                CompactCommand::Frame
            }
            (Architecture::X86 | Architecture::X86_64, X86_MODE_STACK_IMMEDIATE)
            | (Architecture::Arm64, ARM64_MODE_FRAMELESS) => CompactCommand::Frameless,
            (Architecture::X86 | Architecture::X86_64, X86_MODE_STACK_INDIRECT) => CompactCommand::FramelessIndirect,
            (Architecture::X86 | Architecture::X86_64, X86_MODE_DWARF) | (Architecture::Arm64, ARM64_MODE_DWARF) => {
                CompactCommand::Dwarf {
                    fde_offset: self.dwarf_fde_offset(),
                }
            }
            (Architecture::X86 | Architecture::X86_64 | Architecture::Arm64, mode) => {
                return Err(DecodeError::malformed(
                    0,
                    format!("compact unwind encoding {:#010x}: unknown {arch} mode {mode}", self.0),
                ))
            }
            (other, _) => {
                return Err(DecodeError::Unsupported(format!(
                    "compact unwind encodings for {other}"
                )))
            }
        };
        Ok(command)
    }

    /// Recover the CFA rule and saved register slots.
    pub fn decode(self, arch: Architecture) -> Result<DecodedFrame>
    {
        let command = self.command(arch)?;
        match (arch, command) {
            (_, CompactCommand::NoInfo | CompactCommand::Dwarf { .. }) => Ok(DecodedFrame::without_frame(command)),
            (Architecture::Arm64, CompactCommand::Frame) => Ok(self.arm64_frame()),
            (Architecture::Arm64, _) => Ok(DecodedFrame {
                command,
                cfa_register: Some(31),
                cfa_offset: i64::from(self.arm64_stack_size()),
                saved_registers: BTreeMap::new(),
            }),
            (_, CompactCommand::Frame) => self.x86_frame(arch),
            (_, CompactCommand::Frameless) if self.x86_register_count() == 0 => {
                let word = i64::from(arch.pointer_size());
                let mut saved_registers = BTreeMap::new();
                if let Some(ra) = arch.return_address_register() {
                    saved_registers.insert(ra, -word);
                }
                Ok(DecodedFrame {
                    command,
                    cfa_register: arch.stack_pointer(),
                    cfa_offset: i64::from(self.x86_stack_size()) * word,
                    saved_registers,
                })
            }
            (_, CompactCommand::Frameless | CompactCommand::FramelessIndirect) => {
                Err(DecodeError::NotImplemented(format!(
                    "register recovery for {command} compact unwind encoding {:#010x} ({} registers, permutation {})",
                    self.0,
                    self.x86_register_count(),
                    self.x86_register_permutation()
                )))
            }
        }
    }

    fn x86_frame(self, arch: Architecture) -> Result<DecodedFrame>
    {
        let word = i64::from(arch.pointer_size());
        let table = if arch == Architecture::X86 {
            &X86_SAVED
        } else {
            &X86_64_SAVED
        };
        let mut saved_registers = BTreeMap::new();
        if let Some(ra) = arch.return_address_register() {
            saved_registers.insert(ra, -word);
        }
        if let Some(fp) = arch.frame_pointer() {
            saved_registers.insert(fp, -2 * word);
        }

        // Slots start `offset` words below the frame pointer, which sits
        // two words below the CFA.
        let first = -2 * word - i64::from(self.x86_frame_offset()) * word;
        let mut slots = self.x86_frame_registers();
        for slot in 0..5i64 {
            match (slots & 0x7) as usize {
                0 => {}
                number @ 1..=6 => {
                    saved_registers.insert(table[number - 1], first + slot * word);
                }
                number => {
                    return Err(DecodeError::malformed(
                        0,
                        format!("compact unwind encoding {:#010x}: register slot value {number}", self.0),
                    ))
                }
            }
            slots >>= 3;
        }

        Ok(DecodedFrame {
            command: CompactCommand::Frame,
            cfa_register: arch.frame_pointer(),
            cfa_offset: 2 * word,
            saved_registers,
        })
    }

    fn arm64_frame(self) -> DecodedFrame
    {
        let mut saved_registers = BTreeMap::from([(29, -16), (30, -8)]);
        let mut offset = -24;
        for (flag, first) in ARM64_PAIRS {
            if self.0 & flag != 0 {
                saved_registers.insert(first, offset);
                saved_registers.insert(first + 1, offset - 8);
                offset -= 16;
            }
        }
        DecodedFrame {
            command: CompactCommand::Frame,
            cfa_register: Some(29),
            cfa_offset: 16,
            saved_registers,
        }
    }
}

impl fmt::Display for CompactEncoding
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{:#010x}", self.0)
    }
}
