//! Core linker session.
//!
//! This module contains the `Linker` struct which orchestrates the
//! layout pipeline:
//! 1. Script Reading: Parses the linker script into the command AST.
//! 2. Input Loading: Reads object files (and archives) into the input
//!    section model and registers their symbols.
//! 3. Layout: Maps input sections to output sections, assigns virtual
//!    addresses and builds the program-header table.
//!
//! The session owns all shared mutable state for one link: the link
//! options, the script configuration, the symbol table and the
//! diagnostic sink. One `Linker` is created per link invocation.

use anyhow::{bail, Result};
use std::path::{Path, PathBuf};

use crate::arch::Architecture;
use crate::command::ScriptConfig;
use crate::config::LinkOptions;
use crate::diag::Diagnostics;
use crate::input::{load_input, InputFile};
use crate::layout::{Layout, LayoutEngine};
use crate::parser::{read_linker_script, FileResolver};
use crate::symbol::SymbolTable;

/// Queue of input references a script adds via `GROUP`/`INPUT`.
/// The driver drains it and loads the files like any other input.
#[derive(Debug, Default)]
pub struct InputQueue {
    pub files: Vec<PathBuf>,
    pub libraries: Vec<String>,
}

impl FileResolver for InputQueue {
    fn add_file(&mut self, path: &Path) {
        tracing::debug!("script added input file {}", path.display());
        self.files.push(path.to_path_buf());
    }

    fn add_library(&mut self, name: &str) {
        tracing::debug!("script added library -l{name}");
        self.libraries.push(name.to_string());
    }
}

pub struct Linker<A: Architecture> {
    arch: A,
    pub options: LinkOptions,
    pub script: ScriptConfig,
    pub symbols: SymbolTable,
    pub diag: Diagnostics,
    pub inputs: InputQueue,
    files: Vec<InputFile>,
}

impl<A: Architecture> Linker<A> {
    pub fn new(arch: A) -> Self {
        Self {
            arch,
            options: LinkOptions::default(),
            script: ScriptConfig::default(),
            symbols: SymbolTable::new(),
            diag: Diagnostics::new(),
            inputs: InputQueue::default(),
            files: Vec::new(),
        }
    }

    /// Parse a linker script. File references the script names are
    /// queued in `self.inputs`; errors land in `self.diag`.
    pub fn read_script(&mut self, path: &Path, text: &str) {
        read_linker_script(
            text,
            path,
            &mut self.options,
            &mut self.script,
            &mut self.diag,
            &mut self.inputs,
        );
    }

    /// Load an object file or archive and register its sections and
    /// symbols.
    pub fn add_file(&mut self, path: &str, data: &[u8]) -> Result<()> {
        let files = load_input(path, data, &mut self.symbols)?;
        self.files.extend(files);
        Ok(())
    }

    pub fn input_file_count(&self) -> usize {
        self.files.len()
    }

    /// Run the full layout pipeline over the loaded inputs.
    ///
    /// Refuses to start while script errors are pending, and refuses
    /// to return a layout if the pipeline itself reported any.
    pub fn layout(&mut self) -> Result<Layout> {
        if self.diag.has_errors() {
            bail!("cannot lay out image: {} script error(s)", self.diag.error_count());
        }
        if !self.script.do_layout {
            tracing::debug!("no SECTIONS directive; using default placement for all sections");
        }

        let mut engine =
            LayoutEngine::new(&self.arch, &self.script, &mut self.symbols, &mut self.diag);
        engine.add_scripted_symbols();

        let mut discarded = 0usize;
        let mut sections = engine.create_sections(&mut self.files, |file, name| {
            tracing::debug!("discarding section {name} from {file}");
            discarded += 1;
        });
        if discarded > 0 {
            tracing::debug!("discarded {discarded} input section(s)");
        }

        engine.sort_sections(&mut sections);
        engine.assign_addresses(&mut sections);
        let phdrs = engine.create_phdrs(&sections);
        let file_header_addr = engine.file_header_addr;
        let program_headers_addr = engine.program_headers_addr;

        if self.diag.has_errors() {
            bail!("layout failed with {} error(s)", self.diag.error_count());
        }
        Ok(Layout {
            sections,
            phdrs,
            file_header_addr,
            program_headers_addr,
        })
    }

    /// The entry address: the entry symbol's assigned value, if known.
    pub fn entry_address(&self) -> Option<u64> {
        self.symbols.find(&self.options.entry).map(|sym| sym.value)
    }
}
