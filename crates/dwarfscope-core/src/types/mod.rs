//! Platform-agnostic types shared by the decoders.

pub mod arch;

pub use arch::Architecture;
