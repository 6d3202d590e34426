//! Entry point for the ulds layout driver.
//!
//! This file handles high-level application flow:
//! 1. Parse command-line arguments using `clap`.
//! 2. Initialize the linker session with the `X86_64` backend (the
//!    only supported architecture) and seed its options from the CLI.
//! 3. Read and parse the linker script, collecting any inputs the
//!    script itself adds via `GROUP`/`INPUT`.
//! 4. Load the input object files and run the layout pipeline.
//! 5. Print the resulting link map.
//!
//! Error handling is done via `anyhow`.

use anyhow::{Context, Result};
use clap::Parser;
use memmap2::Mmap;
use object::{Architecture as ObjArch, Object};
use std::fs::File;
use tracing_subscriber::EnvFilter;

use ulds::arch::x86_64::X86_64;
use ulds::config::Config;
use ulds::layout::{Layout, PhdrMember};
use ulds::linker::Linker;

fn main() -> Result<()> {
    let config = Config::parse();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let mut linker = Linker::new(X86_64);
    linker.options.entry = config.entry.unwrap_or_default();
    linker.options.output_file = config.output.unwrap_or_default();
    linker.options.sysroot = config.sysroot;
    linker.options.search_paths = config.search_dirs;

    let script_text = std::fs::read_to_string(&config.script)
        .with_context(|| format!("failed to read script {}", config.script.display()))?;
    linker.read_script(&config.script, &script_text);

    // Inputs named on the command line, then inputs the script added.
    let mut input_paths = config.inputs;
    input_paths.extend(std::mem::take(&mut linker.inputs.files));
    for lib in &linker.inputs.libraries {
        tracing::warn!("ignoring library reference -l{lib}: no library loading in layout mode");
    }

    // Map input files into memory.
    let mut open_files = Vec::new();
    for path in &input_paths {
        let file = File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
        let mmap = unsafe { Mmap::map(&file)? };

        // Architecture check; archives are checked member by member
        // during loading instead.
        if !mmap.starts_with(b"!<arch>\n") {
            let obj = object::File::parse(&*mmap).context("failed to parse object file")?;
            if obj.architecture() != ObjArch::X86_64 {
                anyhow::bail!(
                    "Unsupported architecture in {}: {:?}. Only X86_64 is supported.",
                    path.display(),
                    obj.architecture()
                );
            }
        }

        open_files.push((path.clone(), mmap));
    }

    for (path, mmap) in &open_files {
        linker.add_file(&path.display().to_string(), mmap)?;
    }
    tracing::debug!("loaded {} input file(s)", linker.input_file_count());

    let layout = linker.layout()?;
    print_map(&linker, &layout);
    Ok(())
}

/// Print the link map: output sections with assigned addresses, the
/// program-header table with its members, and the scripted symbols.
fn print_map<A: ulds::arch::Architecture>(linker: &Linker<A>, layout: &Layout) {
    println!("Output sections:");
    println!("{:<24} {:>18} {:>10} {:>7}", "NAME", "ADDR", "SIZE", "ALIGN");
    for sec in &layout.sections {
        println!(
            "{:<24} {:>#18x} {:>#10x} {:>7}",
            sec.name, sec.addr, sec.size, sec.alignment
        );
    }
    println!();
    println!(
        "File header at {:#x}, program headers at {:#x}",
        layout.file_header_addr, layout.program_headers_addr
    );
    println!();

    println!("Program headers:");
    for (i, phdr) in layout.phdrs.iter().enumerate() {
        let members: Vec<String> = phdr
            .members
            .iter()
            .map(|m| match m {
                PhdrMember::FileHeader => "FILEHDR".to_string(),
                PhdrMember::ProgramHeaders => "PHDRS".to_string(),
                PhdrMember::Section(idx) => layout.sections[*idx].name.clone(),
            })
            .collect();
        println!(
            "  [{i:2}] type {:#x} flags {:#x}: {}",
            phdr.p_type,
            phdr.flags,
            members.join(" ")
        );
    }

    let scripted: Vec<_> = linker.symbols.iter().filter(|sym| sym.is_absolute).collect();
    if !scripted.is_empty() {
        println!();
        println!("Script-defined symbols:");
        for sym in scripted {
            println!("  {:>#18x} {}", sym.value, sym.name);
        }
    }

    if !linker.options.undefined.is_empty() {
        println!();
        println!("Forced-undefined symbols: {}", linker.options.undefined.join(" "));
    }

    if !linker.options.entry.is_empty() {
        match linker.entry_address() {
            Some(addr) => println!("\nEntry point {} = {addr:#x}", linker.options.entry),
            None => println!("\nEntry point {} is undefined", linker.options.entry),
        }
    }
}
