//! # Register Catalog
//!
//! Static tables mapping DWARF register numbers to ABI register names.
//!
//! Each architecture's psABI assigns its own numbering. The tables below are
//! read-only statics; the architecture is always passed explicitly, there is
//! no process-wide "current architecture".
//!
//! | Architecture | Source of numbering |
//! |--------------|---------------------|
//! | x86 | System V i386 psABI |
//! | x86-64 | System V AMD64 psABI |
//! | ARM | DWARF for the ARM Architecture |
//! | AArch64 | DWARF for the ARM 64-bit Architecture |
//! | MIPS | GCC MIPS numbering |
//! | RISC-V | RISC-V ELF psABI |
//! | PowerPC | GCC rs6000 numbering |

use crate::types::Architecture;

const X86_GPR: [&str; 10] = ["eax", "ecx", "edx", "ebx", "esp", "ebp", "esi", "edi", "eip", "eflags"];

const X86_64_GPR: [&str; 17] = [
    "rax", "rdx", "rcx", "rbx", "rsi", "rdi", "rbp", "rsp", "r8", "r9", "r10", "r11", "r12", "r13", "r14", "r15", "rip",
];

const XMM: [&str; 16] = [
    "xmm0", "xmm1", "xmm2", "xmm3", "xmm4", "xmm5", "xmm6", "xmm7", "xmm8", "xmm9", "xmm10", "xmm11", "xmm12", "xmm13",
    "xmm14", "xmm15",
];

const ST: [&str; 8] = ["st0", "st1", "st2", "st3", "st4", "st5", "st6", "st7"];

const MM: [&str; 8] = ["mm0", "mm1", "mm2", "mm3", "mm4", "mm5", "mm6", "mm7"];

const SEGMENT: [&str; 6] = ["es", "cs", "ss", "ds", "fs", "gs"];

const ARM_GPR: [&str; 16] = [
    "r0", "r1", "r2", "r3", "r4", "r5", "r6", "r7", "r8", "r9", "r10", "r11", "r12", "sp", "lr", "pc",
];

const ARM_S: [&str; 32] = [
    "s0", "s1", "s2", "s3", "s4", "s5", "s6", "s7", "s8", "s9", "s10", "s11", "s12", "s13", "s14", "s15", "s16", "s17",
    "s18", "s19", "s20", "s21", "s22", "s23", "s24", "s25", "s26", "s27", "s28", "s29", "s30", "s31",
];

const ARM_D: [&str; 32] = [
    "d0", "d1", "d2", "d3", "d4", "d5", "d6", "d7", "d8", "d9", "d10", "d11", "d12", "d13", "d14", "d15", "d16", "d17",
    "d18", "d19", "d20", "d21", "d22", "d23", "d24", "d25", "d26", "d27", "d28", "d29", "d30", "d31",
];

const AARCH64_X: [&str; 32] = [
    "x0", "x1", "x2", "x3", "x4", "x5", "x6", "x7", "x8", "x9", "x10", "x11", "x12", "x13", "x14", "x15", "x16", "x17",
    "x18", "x19", "x20", "x21", "x22", "x23", "x24", "x25", "x26", "x27", "x28", "fp", "lr", "sp",
];

const AARCH64_V: [&str; 32] = [
    "v0", "v1", "v2", "v3", "v4", "v5", "v6", "v7", "v8", "v9", "v10", "v11", "v12", "v13", "v14", "v15", "v16", "v17",
    "v18", "v19", "v20", "v21", "v22", "v23", "v24", "v25", "v26", "v27", "v28", "v29", "v30", "v31",
];

const MIPS_GPR: [&str; 32] = [
    "zero", "at", "v0", "v1", "a0", "a1", "a2", "a3", "t0", "t1", "t2", "t3", "t4", "t5", "t6", "t7", "s0", "s1", "s2",
    "s3", "s4", "s5", "s6", "s7", "t8", "t9", "k0", "k1", "gp", "sp", "fp", "ra",
];

const FPR: [&str; 32] = [
    "f0", "f1", "f2", "f3", "f4", "f5", "f6", "f7", "f8", "f9", "f10", "f11", "f12", "f13", "f14", "f15", "f16", "f17",
    "f18", "f19", "f20", "f21", "f22", "f23", "f24", "f25", "f26", "f27", "f28", "f29", "f30", "f31",
];

const RISCV_GPR: [&str; 32] = [
    "zero", "ra", "sp", "gp", "tp", "t0", "t1", "t2", "s0", "s1", "a0", "a1", "a2", "a3", "a4", "a5", "a6", "a7", "s2",
    "s3", "s4", "s5", "s6", "s7", "s8", "s9", "s10", "s11", "t3", "t4", "t5", "t6",
];

const RISCV_FPR: [&str; 32] = [
    "ft0", "ft1", "ft2", "ft3", "ft4", "ft5", "ft6", "ft7", "fs0", "fs1", "fa0", "fa1", "fa2", "fa3", "fa4", "fa5", "fa6",
    "fa7", "fs2", "fs3", "fs4", "fs5", "fs6", "fs7", "fs8", "fs9", "fs10", "fs11", "ft8", "ft9", "ft10", "ft11",
];

const PPC_GPR: [&str; 32] = [
    "r0", "r1", "r2", "r3", "r4", "r5", "r6", "r7", "r8", "r9", "r10", "r11", "r12", "r13", "r14", "r15", "r16", "r17",
    "r18", "r19", "r20", "r21", "r22", "r23", "r24", "r25", "r26", "r27", "r28", "r29", "r30", "r31",
];

const PPC_CR: [&str; 8] = ["cr0", "cr1", "cr2", "cr3", "cr4", "cr5", "cr6", "cr7"];

const PPC_VR: [&str; 32] = [
    "vr0", "vr1", "vr2", "vr3", "vr4", "vr5", "vr6", "vr7", "vr8", "vr9", "vr10", "vr11", "vr12", "vr13", "vr14", "vr15",
    "vr16", "vr17", "vr18", "vr19", "vr20", "vr21", "vr22", "vr23", "vr24", "vr25", "vr26", "vr27", "vr28", "vr29",
    "vr30", "vr31",
];

/// Index `table` with `number - base` when `number` falls inside it.
fn slot(table: &[&'static str], base: u16, number: u16) -> Option<&'static str>
{
    number
        .checked_sub(base)
        .and_then(|index| table.get(usize::from(index)))
        .copied()
}

fn x86(number: u16) -> Option<&'static str>
{
    match number {
        0..=9 => slot(&X86_GPR, 0, number),
        11..=18 => slot(&ST, 11, number),
        21..=28 => slot(&XMM, 21, number),
        29..=36 => slot(&MM, 29, number),
        39 => Some("mxcsr"),
        40..=45 => slot(&SEGMENT, 40, number),
        _ => None,
    }
}

fn x86_64(number: u16) -> Option<&'static str>
{
    match number {
        0..=16 => slot(&X86_64_GPR, 0, number),
        17..=32 => slot(&XMM, 17, number),
        33..=40 => slot(&ST, 33, number),
        41..=48 => slot(&MM, 41, number),
        49 => Some("rflags"),
        50..=55 => slot(&SEGMENT, 50, number),
        58 => Some("fs.base"),
        59 => Some("gs.base"),
        64 => Some("mxcsr"),
        _ => None,
    }
}

fn arm(number: u16) -> Option<&'static str>
{
    match number {
        0..=15 => slot(&ARM_GPR, 0, number),
        64..=95 => slot(&ARM_S, 64, number),
        128 => Some("spsr"),
        256..=287 => slot(&ARM_D, 256, number),
        _ => None,
    }
}

fn aarch64(number: u16) -> Option<&'static str>
{
    match number {
        0..=31 => slot(&AARCH64_X, 0, number),
        32 => Some("pc"),
        33 => Some("elr_mode"),
        34 => Some("ra_sign_state"),
        64..=95 => slot(&AARCH64_V, 64, number),
        _ => None,
    }
}

fn mips(number: u16) -> Option<&'static str>
{
    match number {
        0..=31 => slot(&MIPS_GPR, 0, number),
        32..=63 => slot(&FPR, 32, number),
        64 => Some("hi"),
        65 => Some("lo"),
        _ => None,
    }
}

fn riscv(number: u16) -> Option<&'static str>
{
    match number {
        0..=31 => slot(&RISCV_GPR, 0, number),
        32..=63 => slot(&RISCV_FPR, 32, number),
        _ => None,
    }
}

fn powerpc(number: u16) -> Option<&'static str>
{
    match number {
        0..=31 => slot(&PPC_GPR, 0, number),
        32..=63 => slot(&FPR, 32, number),
        64 => Some("mq"),
        65 => Some("lr"),
        66 => Some("ctr"),
        68..=75 => slot(&PPC_CR, 68, number),
        76 => Some("xer"),
        77..=108 => slot(&PPC_VR, 77, number),
        109 => Some("vrsave"),
        110 => Some("vscr"),
        _ => None,
    }
}

/// Look up the ABI name of DWARF register `number` on `arch`.
///
/// Returns `None` for unassigned numbers and for [`Architecture::Unknown`].
#[must_use]
pub fn register_name(arch: Architecture, number: u16) -> Option<&'static str>
{
    match arch {
        Architecture::X86 => x86(number),
        Architecture::X86_64 => x86_64(number),
        Architecture::Arm => arm(number),
        Architecture::Arm64 => aarch64(number),
        Architecture::Mips | Architecture::Mips64 => mips(number),
        Architecture::RiscV32 | Architecture::RiscV64 => riscv(number),
        Architecture::PowerPc | Architecture::PowerPc64 => powerpc(number),
        Architecture::Unknown(_) => None,
    }
}

/// Name of register `number`, or `r<number>` when the table has no entry.
#[must_use]
pub fn register_display(arch: Architecture, number: u64) -> String
{
    u16::try_from(number)
        .ok()
        .and_then(|n| register_name(arch, n))
        .map_or_else(|| format!("r{number}"), str::to_string)
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn test_x86_64_numbering_is_not_encoding_order()
    {
        assert_eq!(register_name(Architecture::X86_64, 1), Some("rdx"));
        assert_eq!(register_name(Architecture::X86_64, 2), Some("rcx"));
        assert_eq!(register_name(Architecture::X86_64, 7), Some("rsp"));
        assert_eq!(register_name(Architecture::X86_64, 16), Some("rip"));
        assert_eq!(register_name(Architecture::X86_64, 17), Some("xmm0"));
        assert_eq!(register_name(Architecture::X86_64, 32), Some("xmm15"));
    }

    #[test]
    fn test_x86_table()
    {
        assert_eq!(register_name(Architecture::X86, 4), Some("esp"));
        assert_eq!(register_name(Architecture::X86, 8), Some("eip"));
        assert_eq!(register_name(Architecture::X86, 10), None);
        assert_eq!(register_name(Architecture::X86, 45), Some("gs"));
    }

    #[test]
    fn test_arm_tables()
    {
        assert_eq!(register_name(Architecture::Arm, 13), Some("sp"));
        assert_eq!(register_name(Architecture::Arm, 257), Some("d1"));
        assert_eq!(register_name(Architecture::Arm64, 29), Some("fp"));
        assert_eq!(register_name(Architecture::Arm64, 31), Some("sp"));
        assert_eq!(register_name(Architecture::Arm64, 95), Some("v31"));
    }

    #[test]
    fn test_other_families()
    {
        assert_eq!(register_name(Architecture::Mips64, 31), Some("ra"));
        assert_eq!(register_name(Architecture::RiscV64, 8), Some("s0"));
        assert_eq!(register_name(Architecture::RiscV32, 63), Some("ft11"));
        assert_eq!(register_name(Architecture::PowerPc, 65), Some("lr"));
        assert_eq!(register_name(Architecture::PowerPc64, 70), Some("cr2"));
    }

    #[test]
    fn test_display_fallback()
    {
        assert_eq!(register_display(Architecture::X86_64, 6), "rbp");
        assert_eq!(register_display(Architecture::X86_64, 300), "r300");
        assert_eq!(register_display(Architecture::Unknown("sparc"), 3), "r3");
        assert_eq!(register_display(Architecture::Arm64, u64::MAX), format!("r{}", u64::MAX));
    }

    #[test]
    fn test_special_registers_match_tables()
    {
        for arch in [
            Architecture::X86,
            Architecture::X86_64,
            Architecture::Arm,
            Architecture::Arm64,
            Architecture::Mips,
            Architecture::RiscV64,
            Architecture::PowerPc,
        ] {
            let sp = arch.stack_pointer().and_then(|n| register_name(arch, n));
            assert!(sp.is_some(), "{arch} stack pointer has no name");
            let ra = arch.return_address_register().and_then(|n| register_name(arch, n));
            assert!(ra.is_some(), "{arch} return address has no name");
        }
    }
}
