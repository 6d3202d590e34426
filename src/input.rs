//! Input file loading.
//!
//! Reads relocatable object files (and `!<arch>` archives of them) into
//! the flat section model the layout engine consumes: per file, an
//! ordered list of sections exposing name, ELF flags and type, size and
//! alignment. Symbols defined by the inputs are registered with the
//! symbol table as they are encountered.

use anyhow::{Context, Result};
use object::elf::{
    SHF_ALLOC, SHF_EXECINSTR, SHF_TLS, SHF_WRITE, SHT_FINI_ARRAY, SHT_INIT_ARRAY, SHT_NOBITS,
    SHT_NOTE, SHT_PROGBITS,
};
use object::read::{Object, ObjectSection, ObjectSymbol};
use object::{SectionFlags, SectionKind};

use crate::symbol::SymbolTable;

/// A named, sized region of code or data from one input file.
pub struct InputSection {
    pub name: String,
    /// ELF `sh_flags`.
    pub flags: u64,
    /// ELF `sh_type`.
    pub sh_type: u32,
    pub size: u64,
    pub alignment: u64,
    /// Cleared when the section is routed to `/DISCARD/` (or was dead
    /// on arrival, e.g. dropped by garbage collection).
    pub live: bool,
    /// Index of the output section this section was attached to, set
    /// during section creation. A section is attached at most once.
    pub output: Option<usize>,
}

impl InputSection {
    pub fn new(name: impl Into<String>, flags: u64, sh_type: u32, size: u64, alignment: u64) -> Self {
        Self {
            name: name.into(),
            flags,
            sh_type,
            size,
            alignment,
            live: true,
            output: None,
        }
    }

    pub fn is_writable(&self) -> bool {
        self.flags & u64::from(SHF_WRITE) != 0
    }
}

/// One input object with its ordered sections.
pub struct InputFile {
    pub path: String,
    pub sections: Vec<InputSection>,
}

/// Load an object file or archive. Archives contribute one `InputFile`
/// per member.
pub fn load_input(path: &str, data: &[u8], symbols: &mut SymbolTable) -> Result<Vec<InputFile>> {
    if data.starts_with(b"!<arch>\n") {
        let archive = object::read::archive::ArchiveFile::parse(data)?;
        let mut files = Vec::new();
        for member in archive.members() {
            let member = member?;
            let name = String::from_utf8_lossy(member.name()).to_string();
            let member_data = member.data(data)?;
            let member_path = format!("{path}({name})");
            let obj = object::File::parse(member_data)
                .with_context(|| format!("failed to parse archive member {member_path}"))?;
            files.push(load_object(member_path, &obj, symbols));
        }
        Ok(files)
    } else {
        let obj = object::File::parse(data)
            .with_context(|| format!("failed to parse object file {path}"))?;
        Ok(vec![load_object(path.to_string(), &obj, symbols)])
    }
}

fn load_object(path: String, obj: &object::File, symbols: &mut SymbolTable) -> InputFile {
    let mut sections = Vec::new();
    for section in obj.sections() {
        let name = section.name().unwrap_or("").to_string();
        let kind = section.kind();
        if name.is_empty() || kind == SectionKind::Metadata {
            tracing::debug!("Skipping section {:?} (kind: {:?}) in {}", name, kind, path);
            continue;
        }
        let flags = match section.flags() {
            SectionFlags::Elf { sh_flags } => sh_flags,
            _ => 0,
        };
        sections.push(InputSection::new(
            name,
            flags,
            section_type(kind),
            section.size(),
            section.align(),
        ));
    }

    for sym in obj.symbols() {
        if sym.is_undefined() || sym.is_local() {
            continue;
        }
        if let Ok(name) = sym.name() {
            symbols.define(name, sym.address(), sym.is_weak());
        }
    }

    InputFile { path, sections }
}

/// Derive the ELF section type from the object crate's section kind.
fn section_type(kind: SectionKind) -> u32 {
    match kind {
        SectionKind::UninitializedData | SectionKind::UninitializedTls => SHT_NOBITS,
        SectionKind::Note => SHT_NOTE,
        SectionKind::Elf(sh_type) if sh_type == SHT_INIT_ARRAY => SHT_INIT_ARRAY,
        SectionKind::Elf(sh_type) if sh_type == SHT_FINI_ARRAY => SHT_FINI_ARRAY,
        _ => SHT_PROGBITS,
    }
}

/// Common `sh_flags` combinations, used by tests and synthetic inputs.
pub mod flags {
    use super::*;

    pub const TEXT: u64 = (SHF_ALLOC | SHF_EXECINSTR) as u64;
    pub const RODATA: u64 = SHF_ALLOC as u64;
    pub const DATA: u64 = (SHF_ALLOC | SHF_WRITE) as u64;
    pub const TLS_DATA: u64 = (SHF_ALLOC | SHF_WRITE | SHF_TLS) as u64;
}
