//! Target architecture type.

use std::fmt;

/// CPU architecture the debug information describes.
///
/// Register numbering in DWARF is defined per architecture ABI, so the same
/// register number means different things on different targets. 32-bit and
/// 64-bit variants of a family share a register table but differ in pointer
/// size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Architecture
{
    /// 32-bit x86 (i386)
    X86,
    /// 64-bit x86 (Intel/AMD)
    X86_64,
    /// 32-bit ARM
    Arm,
    /// 64-bit ARM (AArch64 / Apple Silicon)
    Arm64,
    /// 32-bit MIPS
    Mips,
    /// 64-bit MIPS
    Mips64,
    /// 32-bit RISC-V
    RiscV32,
    /// 64-bit RISC-V
    RiscV64,
    /// 32-bit PowerPC
    PowerPc,
    /// 64-bit PowerPC
    PowerPc64,
    /// Any other architecture
    ///
    /// The `&'static str` contains the architecture name as reported by the
    /// object file layer. Register names are not available for it.
    Unknown(&'static str),
}

impl Architecture
{
    /// Size of a pointer (and of `DW_OP_addr` operands) in bytes.
    #[must_use]
    pub const fn pointer_size(self) -> u8
    {
        match self {
            Architecture::X86 | Architecture::Arm | Architecture::Mips | Architecture::RiscV32 | Architecture::PowerPc => 4,
            _ => 8,
        }
    }

    /// DWARF number of the stack pointer.
    #[must_use]
    pub const fn stack_pointer(self) -> Option<u16>
    {
        match self {
            Architecture::X86 => Some(4),
            Architecture::X86_64 => Some(7),
            Architecture::Arm => Some(13),
            Architecture::Arm64 => Some(31),
            Architecture::Mips | Architecture::Mips64 => Some(29),
            Architecture::RiscV32 | Architecture::RiscV64 => Some(2),
            Architecture::PowerPc | Architecture::PowerPc64 => Some(1),
            Architecture::Unknown(_) => None,
        }
    }

    /// DWARF number of the conventional frame pointer.
    #[must_use]
    pub const fn frame_pointer(self) -> Option<u16>
    {
        match self {
            Architecture::X86 => Some(5),
            Architecture::X86_64 => Some(6),
            Architecture::Arm => Some(11),
            Architecture::Arm64 => Some(29),
            Architecture::Mips | Architecture::Mips64 => Some(30),
            Architecture::RiscV32 | Architecture::RiscV64 => Some(8),
            Architecture::PowerPc | Architecture::PowerPc64 => Some(31),
            Architecture::Unknown(_) => None,
        }
    }

    /// DWARF column holding the return address.
    #[must_use]
    pub const fn return_address_register(self) -> Option<u16>
    {
        match self {
            Architecture::X86 => Some(8),
            Architecture::X86_64 => Some(16),
            Architecture::Arm => Some(14),
            Architecture::Arm64 => Some(30),
            Architecture::Mips | Architecture::Mips64 => Some(31),
            Architecture::RiscV32 | Architecture::RiscV64 => Some(1),
            Architecture::PowerPc | Architecture::PowerPc64 => Some(65),
            Architecture::Unknown(_) => None,
        }
    }

    /// Short lowercase name, also accepted by [`Architecture::from_name`].
    #[must_use]
    pub const fn name(self) -> &'static str
    {
        match self {
            Architecture::X86 => "x86",
            Architecture::X86_64 => "x86_64",
            Architecture::Arm => "arm",
            Architecture::Arm64 => "arm64",
            Architecture::Mips => "mips",
            Architecture::Mips64 => "mips64",
            Architecture::RiscV32 => "riscv32",
            Architecture::RiscV64 => "riscv64",
            Architecture::PowerPc => "powerpc",
            Architecture::PowerPc64 => "powerpc64",
            Architecture::Unknown(name) => name,
        }
    }

    /// Parse a user supplied architecture name.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self>
    {
        let arch = match name.to_ascii_lowercase().as_str() {
            "x86" | "i386" | "i686" => Architecture::X86,
            "x86_64" | "x86-64" | "amd64" | "x64" => Architecture::X86_64,
            "arm" | "armv7" => Architecture::Arm,
            "arm64" | "aarch64" => Architecture::Arm64,
            "mips" => Architecture::Mips,
            "mips64" => Architecture::Mips64,
            "riscv32" => Architecture::RiscV32,
            "riscv64" | "riscv" => Architecture::RiscV64,
            "powerpc" | "ppc" => Architecture::PowerPc,
            "powerpc64" | "ppc64" => Architecture::PowerPc64,
            _ => return None,
        };
        Some(arch)
    }
}

impl From<object::Architecture> for Architecture
{
    fn from(arch: object::Architecture) -> Self
    {
        match arch {
            object::Architecture::I386 => Architecture::X86,
            object::Architecture::X86_64 | object::Architecture::X86_64_X32 => Architecture::X86_64,
            object::Architecture::Arm => Architecture::Arm,
            object::Architecture::Aarch64 | object::Architecture::Aarch64_Ilp32 => Architecture::Arm64,
            object::Architecture::Mips => Architecture::Mips,
            object::Architecture::Mips64 => Architecture::Mips64,
            object::Architecture::Riscv32 => Architecture::RiscV32,
            object::Architecture::Riscv64 => Architecture::RiscV64,
            object::Architecture::PowerPc => Architecture::PowerPc,
            object::Architecture::PowerPc64 => Architecture::PowerPc64,
            _ => Architecture::Unknown("unknown"),
        }
    }
}

impl fmt::Display for Architecture
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result
    {
        write!(f, "{}", self.name())
    }
}
