//! x86_64 Architecture backend.
//!
//! Target parameters for 64-bit x86 systems (ELF64).

use super::Architecture;

/// The x86_64 architecture backend.
pub struct X86_64;

impl Architecture for X86_64 {
    fn page_size(&self) -> u64 {
        0x1000
    }

    fn file_header_size(&self) -> u64 {
        64
    }

    fn program_header_entry_size(&self) -> u64 {
        56
    }
}
