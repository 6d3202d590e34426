//! Configuration module.
//!
//! This module defines the command-line interface (CLI) for the layout
//! driver using `clap`, plus `LinkOptions`: the link-wide settings that
//! are shared between the command line and script directives. Several
//! directives only take effect when the command line did not already
//! set the same value (`ENTRY`, `OUTPUT`), so both sources write into
//! the one structure.

use clap::Parser;
use std::path::{Path, PathBuf};

/// A linker-script layout engine for x86_64 ELF binaries.
///
/// Parses a linker script, maps the input files' sections into output
/// sections, assigns virtual addresses and builds the program-header
/// table, then prints the resulting link map.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// Input object files and archives
    #[arg(num_args = 0..)]
    pub inputs: Vec<PathBuf>,

    /// Linker script to evaluate
    #[arg(short = 'T', long = "script")]
    pub script: PathBuf,

    /// Output file name (takes precedence over OUTPUT(...))
    #[arg(short, long)]
    pub output: Option<String>,

    /// Entry symbol (takes precedence over ENTRY(...))
    #[arg(short, long)]
    pub entry: Option<String>,

    /// Library search directories, tried in order
    #[arg(short = 'L', long = "library-path")]
    pub search_dirs: Vec<PathBuf>,

    /// Sysroot prefix for script-relative file resolution
    #[arg(long, default_value = "")]
    pub sysroot: PathBuf,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info", help = "Set the logging level")]
    pub log_level: String,
}

/// Link-wide settings shared by the driver and the script directives.
#[derive(Debug, Default)]
pub struct LinkOptions {
    /// Entry symbol name; first writer wins.
    pub entry: String,
    /// Output file name; first writer wins.
    pub output_file: String,
    /// Sysroot prefix, empty when unset.
    pub sysroot: PathBuf,
    /// Library search paths, `SEARCH_DIR` appends here.
    pub search_paths: Vec<PathBuf>,
    /// Symbols forced undefined by `EXTERN(...)`.
    pub undefined: Vec<String>,
    /// Whether libraries are currently linked as-needed. `AS_NEEDED`
    /// toggles this for its nested list only.
    pub as_needed: bool,
}

impl LinkOptions {
    /// Look a bare file name up in the search-path list.
    pub fn find_from_search_paths(&self, name: &str) -> Option<PathBuf> {
        self.search_paths
            .iter()
            .map(|dir| dir.join(name))
            .find(|path| path.exists())
    }

    pub fn has_sysroot(&self) -> bool {
        !self.sysroot.as_os_str().is_empty()
    }

    /// Whether a script file lives under the configured sysroot, which
    /// changes how the script's absolute paths are resolved.
    pub fn is_under_sysroot(&self, path: &Path) -> bool {
        if !self.has_sysroot() {
            return false;
        }
        let Ok(sysroot) = self.sysroot.canonicalize() else {
            return false;
        };
        path.canonicalize()
            .map(|p| p.starts_with(&sysroot))
            .unwrap_or(false)
    }
}
