//! Layout engine.
//!
//! Consumes the script AST plus the parsed input sections and produces
//! the output image layout in three passes, in a fixed order:
//!
//! 1. Section creation: route every input section to an output section
//!    (script rules first, then default placement for orphans).
//! 2. Address assignment: replay the command list against the location
//!    counter and write a virtual address into every live section.
//! 3. Program-header construction: partition the laid-out sections
//!    into load segments, honoring an explicit `PHDRS` table if one
//!    was declared.
//!
//! Address assignment must complete before program headers are built:
//! segment flags, TLS placement and the RELRO boundary all depend on
//! assigned attributes.

use std::collections::{HashMap, HashSet};

use object::elf::{
    PF_R, PF_W, PF_X, PT_DYNAMIC, PT_GNU_EH_FRAME, PT_GNU_RELRO, PT_INTERP, PT_LOAD, PT_NOTE,
    PT_TLS, SHF_ALLOC, SHF_EXECINSTR, SHF_GROUP, SHF_TLS, SHF_WRITE, SHT_FINI_ARRAY,
    SHT_INIT_ARRAY, SHT_NOBITS, SHT_NOTE, SHT_PREINIT_ARRAY,
};
use object::elf::STV_DEFAULT;

use crate::arch::Architecture;
use crate::command::{Command, Constraint, ScriptConfig};
use crate::diag::Diagnostics;
use crate::expr::eval_expr;
use crate::input::{InputFile, InputSection};
use crate::symbol::SymbolTable;
use crate::utils::{align_down, align_up};

/// Reference from an output section to one of its member input
/// sections, with the member's offset inside the output section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SectionRef {
    pub file_index: usize,
    pub section_index: usize,
    pub offset: u64,
}

/// A named region of the output image aggregating input sections with
/// matching attributes.
#[derive(Debug)]
pub struct OutputSection {
    pub name: String,
    pub sh_type: u32,
    pub flags: u64,
    pub alignment: u64,
    pub size: u64,
    /// Assigned virtual address, written by the address pass.
    pub addr: u64,
    pub sections: Vec<SectionRef>,
}

impl OutputSection {
    fn new(name: &str, sh_type: u32, flags: u64) -> Self {
        Self {
            name: name.to_string(),
            sh_type,
            flags,
            alignment: 1,
            size: 0,
            addr: 0,
            sections: Vec::new(),
        }
    }

    fn add_section(&mut self, file_index: usize, section_index: usize, sec: &InputSection) {
        self.alignment = self.alignment.max(sec.alignment);
        let offset = align_up(self.size, sec.alignment);
        self.sections.push(SectionRef { file_index, section_index, offset });
        self.size = offset + sec.size;
    }

    pub fn is_alloc(&self) -> bool {
        self.flags & u64::from(SHF_ALLOC) != 0
    }

    pub fn is_writable(&self) -> bool {
        self.flags & u64::from(SHF_WRITE) != 0
    }

    pub fn is_exec(&self) -> bool {
        self.flags & u64::from(SHF_EXECINSTR) != 0
    }

    pub fn is_tls(&self) -> bool {
        self.flags & u64::from(SHF_TLS) != 0
    }
}

/// One member of a program segment. The ELF file header and the
/// program-header table itself can be mapped into a segment alongside
/// output sections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhdrMember {
    FileHeader,
    ProgramHeaders,
    Section(usize),
}

/// A program header: an OS-loader-visible grouping of output sections
/// sharing load attributes. List order is the final table order.
#[derive(Debug)]
pub struct Phdr {
    pub p_type: u32,
    pub flags: u32,
    pub members: Vec<PhdrMember>,
}

impl Phdr {
    fn new(p_type: u32, flags: u32) -> Self {
        Self { p_type, flags, members: Vec::new() }
    }

    fn add(&mut self, member: PhdrMember) {
        self.members.push(member);
    }

    pub fn section_indices(&self) -> impl Iterator<Item = usize> + '_ {
        self.members.iter().filter_map(|m| match m {
            PhdrMember::Section(i) => Some(*i),
            _ => None,
        })
    }
}

/// The complete layout result for one link.
#[derive(Debug)]
pub struct Layout {
    pub sections: Vec<OutputSection>,
    pub phdrs: Vec<Phdr>,
    pub file_header_addr: u64,
    pub program_headers_addr: u64,
}

/// Flags that participate in output-section identity. Two same-named
/// input streams with different alloc/write/exec/TLS attributes land
/// in distinct output sections.
const KEY_FLAGS_MASK: u64 =
    (SHF_ALLOC | SHF_WRITE | SHF_EXECINSTR | SHF_TLS) as u64;

#[derive(Debug, PartialEq, Eq, Hash)]
struct SectionKey {
    name: String,
    sh_type: u32,
    flags: u64,
}

/// Find-or-create table for output sections; first creation order is
/// preserved in the result list.
#[derive(Debug, Default)]
struct OutputSectionFactory {
    map: HashMap<SectionKey, usize>,
}

impl OutputSectionFactory {
    fn create(
        &mut self,
        result: &mut Vec<OutputSection>,
        name: &str,
        sec: &InputSection,
    ) -> (usize, bool) {
        let key = SectionKey {
            name: name.to_string(),
            sh_type: sec.sh_type,
            flags: sec.flags & KEY_FLAGS_MASK,
        };
        if let Some(&index) = self.map.get(&key) {
            return (index, false);
        }
        let index = result.len();
        result.push(OutputSection::new(name, sec.sh_type, sec.flags & !u64::from(SHF_GROUP)));
        self.map.insert(key, index);
        (index, true)
    }
}

/// Prefixes collapsed when deriving an orphan's output section name.
/// Longer prefixes are listed before their own prefixes.
const OUTPUT_NAME_PREFIXES: &[&str] = &[
    ".text.",
    ".rodata.",
    ".data.rel.ro.",
    ".data.",
    ".bss.",
    ".init_array.",
    ".fini_array.",
    ".ctors.",
    ".dtors.",
    ".tbss.",
    ".tdata.",
    ".gcc_except_table.",
];

/// The default output section name for an input section no script rule
/// matched.
pub fn default_output_name(name: &str) -> &str {
    for prefix in OUTPUT_NAME_PREFIXES {
        if name.starts_with(prefix) {
            return &prefix[..prefix.len() - 1];
        }
    }
    name
}

fn to_phdr_flags(sec: &OutputSection) -> u32 {
    let mut flags = PF_R;
    if sec.is_writable() {
        flags |= PF_W;
    }
    if sec.is_exec() {
        flags |= PF_X;
    }
    flags
}

/// TLS NOBITS sections occupy no load segment of their own; everything
/// else allocatable does.
fn needs_pt_load(sec: &OutputSection) -> bool {
    sec.is_alloc() && !(sec.is_tls() && sec.sh_type == SHT_NOBITS)
}

/// Sections that become read-only once relocation processing is done.
fn is_relro_section(sec: &OutputSection) -> bool {
    matches!(sec.sh_type, SHT_INIT_ARRAY | SHT_FINI_ARRAY | SHT_PREINIT_ARRAY)
        || matches!(
            sec.name.as_str(),
            ".dynamic" | ".got" | ".data.rel.ro" | ".ctors" | ".dtors"
        )
}

fn find_section(sections: &[OutputSection], name: &str) -> Option<usize> {
    sections.iter().position(|sec| sec.name == name)
}

/// Replay list entry for the address pass: either a parsed command or
/// a synthesized entry for an orphan output section. The parse result
/// itself is never mutated.
enum ResolvedCommand<'a> {
    Parsed(&'a Command),
    Orphan(String),
}

pub struct LayoutEngine<'a, A: Architecture> {
    arch: &'a A,
    script: &'a ScriptConfig,
    symbols: &'a mut SymbolTable,
    diag: &'a mut Diagnostics,
    /// The location counter, scoped to one address pass.
    dot: u64,
    pub file_header_addr: u64,
    pub program_headers_addr: u64,
}

impl<'a, A: Architecture> LayoutEngine<'a, A> {
    pub fn new(
        arch: &'a A,
        script: &'a ScriptConfig,
        symbols: &'a mut SymbolTable,
        diag: &'a mut Diagnostics,
    ) -> Self {
        Self {
            arch,
            script,
            symbols,
            diag,
            dot: 0,
            file_header_addr: 0,
            program_headers_addr: 0,
        }
    }

    /// Register the absolute symbols the script introduces (assignment
    /// targets not defined by any input), so the address pass can
    /// resolve every assignment. Values are filled in by that pass.
    pub fn add_scripted_symbols(&mut self) {
        let script = self.script;
        for cmd in &script.commands {
            if let Command::Assignment(assign) = cmd {
                if assign.name != "." && self.symbols.find(&assign.name).is_none() {
                    self.symbols.add_absolute(&assign.name, STV_DEFAULT);
                }
            }
        }
    }

    /// Pass 1: map every live input section to an output section.
    ///
    /// Script rules run in declaration order and each input section is
    /// attached at most once (first match wins). Sections routed to
    /// `/DISCARD/` are dropped; remaining unmatched sections get
    /// default-named output sections. Output sections whose constraint
    /// was violated are filtered at the end, after the full pass.
    pub fn create_sections(
        &mut self,
        files: &mut [InputFile],
        mut report_discarded: impl FnMut(&str, &str),
    ) -> Vec<OutputSection> {
        let mut result: Vec<OutputSection> = Vec::new();
        let mut removed: HashSet<usize> = HashSet::new();
        let mut factory = OutputSectionFactory::default();

        for cmd in &self.script.commands {
            let Command::OutputSection(out_cmd) = cmd else {
                continue;
            };
            for rule in &out_cmd.sections {
                for file_index in 0..files.len() {
                    for section_index in 0..files[file_index].sections.len() {
                        let sec = &files[file_index].sections[section_index];
                        if !sec.live || sec.output.is_some() || !rule.matches(&sec.name) {
                            continue;
                        }
                        if out_cmd.name == "/DISCARD/" {
                            files[file_index].sections[section_index].live = false;
                            continue;
                        }
                        Self::add_input_section(
                            &mut result,
                            &mut removed,
                            &mut factory,
                            &mut files[file_index].sections[section_index],
                            file_index,
                            section_index,
                            &out_cmd.name,
                            out_cmd.constraint,
                        );
                    }
                }
            }
        }

        // Default placement for everything the script did not mention.
        for file_index in 0..files.len() {
            for section_index in 0..files[file_index].sections.len() {
                let (live, attached, name) = {
                    let sec = &files[file_index].sections[section_index];
                    (sec.live, sec.output.is_some(), sec.name.clone())
                };
                if !live {
                    report_discarded(&files[file_index].path, &name);
                    continue;
                }
                if attached {
                    continue;
                }
                let out_name = default_output_name(&name).to_string();
                Self::add_input_section(
                    &mut result,
                    &mut removed,
                    &mut factory,
                    &mut files[file_index].sections[section_index],
                    file_index,
                    section_index,
                    &out_name,
                    Constraint::None,
                );
            }
        }

        if removed.is_empty() {
            return result;
        }
        result
            .into_iter()
            .enumerate()
            .filter_map(|(index, sec)| {
                if removed.contains(&index) {
                    tracing::debug!("removing output section {} (constraint mismatch)", sec.name);
                    None
                } else {
                    Some(sec)
                }
            })
            .collect()
    }

    #[allow(clippy::too_many_arguments)]
    fn add_input_section(
        result: &mut Vec<OutputSection>,
        removed: &mut HashSet<usize>,
        factory: &mut OutputSectionFactory,
        sec: &mut InputSection,
        file_index: usize,
        section_index: usize,
        name: &str,
        constraint: Constraint,
    ) {
        let (index, _is_new) = factory.create(result, name, sec);
        // A violated constraint poisons the whole output section, not
        // just this member.
        if constraint == Constraint::ReadWrite && !sec.is_writable() {
            removed.insert(index);
            return;
        }
        if constraint == Constraint::ReadOnly && sec.is_writable() {
            removed.insert(index);
            return;
        }
        result[index].add_section(file_index, section_index, sec);
        sec.output = Some(index);
    }

    /// Order output sections by their script position. Sections the
    /// script never mentions sort after everything mentioned and keep
    /// their discovery order among themselves.
    pub fn sort_sections(&self, sections: &mut [OutputSection]) {
        sections.sort_by_key(|sec| self.script.section_order_key(&sec.name));
    }

    /// Pass 2: replay the command list and assign virtual addresses.
    ///
    /// Orphan output sections are appended to a separate replay list
    /// (one synthesized command per distinct name, in discovery order);
    /// the parsed AST is left untouched. Afterwards the file header and
    /// program-header table are placed just below the lowest assigned
    /// address, on a page boundary.
    pub fn assign_addresses(&mut self, sections: &mut [OutputSection]) {
        let script = self.script;
        let mut resolved: Vec<ResolvedCommand> =
            script.commands.iter().map(ResolvedCommand::Parsed).collect();
        for sec in sections.iter() {
            if script.section_order_key(&sec.name) != usize::MAX {
                continue;
            }
            let already = resolved
                .iter()
                .any(|rc| matches!(rc, ResolvedCommand::Orphan(n) if *n == sec.name));
            if !already {
                resolved.push(ResolvedCommand::Orphan(sec.name.clone()));
            }
        }

        self.dot = self.arch.file_header_size() + self.phdr_table_size();
        let mut min_addr = u64::MAX;
        let mut tls_offset = 0u64;

        for rc in &resolved {
            match rc {
                ResolvedCommand::Parsed(Command::Assignment(assign)) => {
                    let value = eval_expr(&assign.expr, self.dot, self.arch, self.diag);
                    if assign.name == "." {
                        self.dot = value;
                    } else {
                        self.symbols
                            .find_mut(&assign.name)
                            .expect("assignment target registered before address assignment")
                            .value = value;
                    }
                }
                ResolvedCommand::Parsed(Command::OutputSection(cmd)) => {
                    self.assign_section_addresses(&cmd.name, sections, &mut min_addr, &mut tls_offset);
                }
                ResolvedCommand::Orphan(name) => {
                    self.assign_section_addresses(name, sections, &mut min_addr, &mut tls_offset);
                }
            }
        }

        // The ELF header and program-header table must end up below
        // every allocatable section.
        if min_addr != u64::MAX {
            let headers_size = self.arch.file_header_size() + self.phdr_table_size();
            let base = align_down(min_addr.saturating_sub(headers_size), self.arch.page_size());
            self.file_header_addr = base;
            self.program_headers_addr = base + self.arch.file_header_size();
        }
    }

    /// Address every live section carrying `name`. Distinct sections
    /// may share a name when their attributes differ; each gets its own
    /// address.
    fn assign_section_addresses(
        &mut self,
        name: &str,
        sections: &mut [OutputSection],
        min_addr: &mut u64,
        tls_offset: &mut u64,
    ) {
        for sec in sections.iter_mut().filter(|sec| sec.name == name) {
            // TLS sections without file-backed bytes live at offsets in
            // the thread image, not in the address space proper; they
            // must not advance the location counter.
            if sec.is_tls() && sec.sh_type == SHT_NOBITS {
                let tva = align_up(self.dot + *tls_offset, sec.alignment);
                sec.addr = tva;
                *tls_offset = tva - self.dot + sec.size;
                continue;
            }
            if sec.is_alloc() {
                self.dot = align_up(self.dot, sec.alignment);
                sec.addr = self.dot;
                *min_addr = (*min_addr).min(self.dot);
                self.dot += sec.size;
            }
        }
    }

    /// Pass 3: build the program-header table.
    ///
    /// Declared `PHDRS` entries come first, in declaration order; load
    /// segments for sections without an explicit assignment are created
    /// on demand, starting a new one whenever the required flags
    /// change. With no `PHDRS` table at all, everything goes through
    /// the automatic load grouping.
    pub fn create_phdrs(&mut self, sections: &[OutputSection]) -> Vec<Phdr> {
        let mut tls_index: Option<usize> = None;
        let mut note_index: Option<usize> = None;
        let mut relro_index: Option<usize> = None;
        let mut phdrs: Vec<Phdr> = Vec::new();

        for cmd in &self.script.phdrs_commands {
            let mut phdr = Phdr::new(cmd.p_type, cmd.flags.unwrap_or(PF_R));
            if cmd.has_filehdr {
                phdr.add(PhdrMember::FileHeader);
            }
            if cmd.has_phdrs {
                phdr.add(PhdrMember::ProgramHeaders);
            }
            match cmd.p_type {
                PT_INTERP => {
                    if let Some(index) = find_section(sections, ".interp") {
                        phdr.add(PhdrMember::Section(index));
                    }
                }
                PT_DYNAMIC => {
                    if let Some(index) = find_section(sections, ".dynamic") {
                        phdr.flags = to_phdr_flags(&sections[index]);
                        phdr.add(PhdrMember::Section(index));
                    }
                }
                PT_GNU_EH_FRAME => {
                    if let Some(index) = find_section(sections, ".eh_frame_hdr") {
                        phdr.flags = to_phdr_flags(&sections[index]);
                        phdr.add(PhdrMember::Section(index));
                    }
                }
                // Only the first declaration of each is tracked.
                PT_TLS => tls_index = tls_index.or(Some(phdrs.len())),
                PT_NOTE => note_index = note_index.or(Some(phdrs.len())),
                PT_GNU_RELRO => relro_index = relro_index.or(Some(phdrs.len())),
                _ => {}
            }
            phdrs.push(phdr);
        }

        let mut load: Option<usize> = None;
        let mut flags = PF_R;
        for (index, sec) in sections.iter().enumerate() {
            if !sec.is_alloc() {
                continue;
            }

            if let Some(tls) = tls_index {
                if sec.is_tls() {
                    phdrs[tls].add(PhdrMember::Section(index));
                }
            }

            if !needs_pt_load(sec) {
                continue;
            }

            let phdr_ids = self.phdr_indices_for(&sec.name);
            if !phdr_ids.is_empty() {
                // Segments named by the script.
                for id in phdr_ids {
                    phdrs[id].add(PhdrMember::Section(index));
                    if self.script.phdrs_commands[id].flags.is_none() {
                        phdrs[id].flags |= to_phdr_flags(sec);
                    }
                }
            } else {
                // Automatic grouping: a new load segment when there is
                // none yet or the required flags change.
                let new_flags = to_phdr_flags(sec);
                if load.is_none() || flags != new_flags {
                    phdrs.push(Phdr::new(PT_LOAD, new_flags));
                    load = Some(phdrs.len() - 1);
                    flags = new_flags;
                }
                if let Some(current) = load {
                    phdrs[current].add(PhdrMember::Section(index));
                }
            }

            if let Some(relro) = relro_index {
                if is_relro_section(sec) {
                    phdrs[relro].add(PhdrMember::Section(index));
                }
            }
            if let Some(note) = note_index {
                if sec.sh_type == SHT_NOTE {
                    phdrs[note].add(PhdrMember::Section(index));
                }
            }
        }
        phdrs
    }

    /// Resolve a section's explicit `:name` list to `PHDRS` table
    /// indices. Duplicate names resolve to the last declaration; an
    /// unknown name is reported and skipped.
    fn phdr_indices_for(&mut self, name: &str) -> Vec<usize> {
        let script = self.script;
        let Some(cmd) = script.commands.iter().find_map(|c| match c {
            Command::OutputSection(c) if c.name == name => Some(c),
            _ => None,
        }) else {
            return Vec::new();
        };

        let mut indices = Vec::new();
        for phdr_name in &cmd.phdrs {
            let mut found = None;
            for (index, phdr_cmd) in script.phdrs_commands.iter().enumerate() {
                if phdr_cmd.name == *phdr_name {
                    found = Some(index);
                }
            }
            match found {
                Some(index) => indices.push(index),
                None => self
                    .diag
                    .error(format!("section header '{phdr_name}' is not listed in PHDRS")),
            }
        }
        indices
    }

    fn phdr_table_size(&self) -> u64 {
        self.arch.program_header_entry_size() * self.script.phdrs_commands.len() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::x86_64::X86_64;
    use crate::config::LinkOptions;
    use crate::input::flags;
    use crate::parser::{read_linker_script, FileResolver};
    use object::elf::SHT_PROGBITS;
    use std::path::Path;

    struct NullResolver;

    impl FileResolver for NullResolver {
        fn add_file(&mut self, _path: &Path) {}
        fn add_library(&mut self, _name: &str) {}
    }

    fn parse(text: &str) -> ScriptConfig {
        let mut options = LinkOptions::default();
        let mut script = ScriptConfig::default();
        let mut diag = Diagnostics::new();
        read_linker_script(
            text,
            Path::new("test.ld"),
            &mut options,
            &mut script,
            &mut diag,
            &mut NullResolver,
        );
        assert!(!diag.has_errors(), "script errors: {:?}", diag.messages());
        script
    }

    fn sec(name: &str, flags: u64, sh_type: u32, size: u64, alignment: u64) -> InputSection {
        InputSection::new(name, flags, sh_type, size, alignment)
    }

    fn progbits(name: &str, flags: u64, size: u64) -> InputSection {
        sec(name, flags, SHT_PROGBITS, size, 1)
    }

    struct LayoutRun {
        sections: Vec<OutputSection>,
        phdrs: Vec<Phdr>,
        symbols: SymbolTable,
        diag: Diagnostics,
        discarded: Vec<String>,
        file_header_addr: u64,
        program_headers_addr: u64,
    }

    fn run(script: &ScriptConfig, mut files: Vec<InputFile>) -> LayoutRun {
        let arch = X86_64;
        let mut symbols = SymbolTable::new();
        let mut diag = Diagnostics::new();
        let mut discarded = Vec::new();
        let mut engine = LayoutEngine::new(&arch, script, &mut symbols, &mut diag);
        engine.add_scripted_symbols();
        let mut sections =
            engine.create_sections(&mut files, |_file, name| discarded.push(name.to_string()));
        engine.sort_sections(&mut sections);
        engine.assign_addresses(&mut sections);
        let phdrs = engine.create_phdrs(&sections);
        let file_header_addr = engine.file_header_addr;
        let program_headers_addr = engine.program_headers_addr;
        LayoutRun {
            sections,
            phdrs,
            symbols,
            diag,
            discarded,
            file_header_addr,
            program_headers_addr,
        }
    }

    fn one_file(sections: Vec<InputSection>) -> Vec<InputFile> {
        vec![InputFile { path: "test.o".to_string(), sections }]
    }

    fn section<'a>(r: &'a LayoutRun, name: &str) -> &'a OutputSection {
        r.sections
            .iter()
            .find(|sec| sec.name == name)
            .unwrap_or_else(|| panic!("no output section {name}"))
    }

    #[test]
    fn placement_follows_script_order_first_match_wins() {
        let script = parse(
            "SECTIONS { .data : { *(.data) } .text : { *(.text .text.*) } }",
        );
        let files = one_file(vec![
            progbits(".text", flags::TEXT, 0x10),
            progbits(".text.hot", flags::TEXT, 0x20),
            progbits(".data", flags::DATA, 0x30),
        ]);
        let r = run(&script, files);
        assert!(!r.diag.has_errors());
        // Script order, not input order: .data is declared first.
        assert_eq!(
            r.sections.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(),
            [".data", ".text"]
        );
        let text = section(&r, ".text");
        assert_eq!(text.sections.len(), 2);
        assert_eq!(text.size, 0x30);
        // First match wins: a later rule never reclaims a section.
        let script2 = parse("SECTIONS { .a : { *(.text*) } .b : { *(.text.hot) } }");
        let r2 = run(&script2, one_file(vec![progbits(".text.hot", flags::TEXT, 8)]));
        assert_eq!(section(&r2, ".a").sections.len(), 1);
        assert!(r2.sections.iter().all(|s| s.name != ".b"));
    }

    #[test]
    fn layout_is_idempotent() {
        let text = "SECTIONS { . = 0x400000 ; .text : { *(.text) } .data : { *(.data) } }";
        let make_files = || {
            one_file(vec![
                progbits(".text", flags::TEXT, 0x123),
                progbits(".data", flags::DATA, 0x45),
                progbits(".orphan", flags::RODATA, 0x8),
            ])
        };
        let script = parse(text);
        let a = run(&script, make_files());
        let script = parse(text);
        let b = run(&script, make_files());
        let summarize = |r: &LayoutRun| {
            r.sections
                .iter()
                .map(|s| (s.name.clone(), s.addr, s.size, s.sections.clone()))
                .collect::<Vec<_>>()
        };
        assert_eq!(summarize(&a), summarize(&b));
    }

    #[test]
    fn discarded_sections_vanish_and_report_once() {
        let script = parse("SECTIONS { /DISCARD/ : { *(.comment .note.GNU-stack) } }");
        let files = one_file(vec![
            progbits(".text", flags::TEXT, 4),
            progbits(".comment", 0, 5),
        ]);
        let r = run(&script, files);
        assert_eq!(r.discarded, [".comment"]);
        assert!(r.sections.iter().all(|s| s.name != ".comment"));
        assert!(r
            .sections
            .iter()
            .all(|s| s.sections.iter().all(|m| m.section_index != 1)));
    }

    #[test]
    fn only_if_ro_violation_removes_entire_section() {
        // The first rule attaches a read-write section; the second rule
        // matches another read-write section under ONLY_IF_RO, which
        // poisons the whole output section.
        let script = parse(
            "SECTIONS { .foo : { *(.fa) } .foo : ONLY_IF_RO { *(.fb) } }",
        );
        let files = one_file(vec![
            progbits(".fa", flags::DATA, 8),
            progbits(".fb", flags::DATA, 8),
        ]);
        let r = run(&script, files);
        assert!(r.sections.iter().all(|s| s.name != ".foo"));
    }

    #[test]
    fn only_if_rw_violation_removes_entire_section() {
        let script = parse("SECTIONS { .bar : ONLY_IF_RW { *(.ro) } }");
        let r = run(&script, one_file(vec![progbits(".ro", flags::RODATA, 8)]));
        assert!(r.sections.iter().all(|s| s.name != ".bar"));
    }

    #[test]
    fn tls_nobits_do_not_advance_dot() {
        let script = parse(
            "SECTIONS { . = 0x1000 ; .tbss.a : { *(.tbss.a) } \
             .mid : { *(.mid) } .tbss.b : { *(.tbss.b) } }",
        );
        let files = one_file(vec![
            sec(".tbss.a", flags::TLS_DATA, SHT_NOBITS, 0x30, 1),
            progbits(".mid", flags::DATA, 0x50),
            sec(".tbss.b", flags::TLS_DATA, SHT_NOBITS, 0x20, 1),
        ]);
        let r = run(&script, files);
        let a = section(&r, ".tbss.a");
        let mid = section(&r, ".mid");
        let b = section(&r, ".tbss.b");
        // The TLS section did not move Dot: .mid still lands at 0x1000.
        assert_eq!(mid.addr, 0x1000);
        assert_eq!(a.addr, 0x1000);
        // Relative to the running TLS offset the sections are packed
        // back to back, independent of .mid in between.
        let dot_after_mid = 0x1000 + 0x50;
        assert_eq!(b.addr - dot_after_mid, 0x30);
    }

    #[test]
    fn orphans_are_placed_after_scripted_sections() {
        let script = parse("SECTIONS { . = 0x2000 ; .data : { *(.data) } }");
        let files = one_file(vec![
            progbits(".text", flags::TEXT, 0x10),
            progbits(".data", flags::DATA, 0x10),
        ]);
        let r = run(&script, files);
        assert_eq!(
            r.sections.iter().map(|s| s.name.as_str()).collect::<Vec<_>>(),
            [".data", ".text"]
        );
        assert_eq!(section(&r, ".data").addr, 0x2000);
        assert_eq!(section(&r, ".text").addr, 0x2010);
    }

    #[test]
    fn orphan_names_collapse_known_prefixes() {
        assert_eq!(default_output_name(".text.startup"), ".text");
        assert_eq!(default_output_name(".data.rel.ro.local"), ".data.rel.ro");
        assert_eq!(default_output_name(".data.cold"), ".data");
        assert_eq!(default_output_name(".mystuff"), ".mystuff");

        let script = parse("SECTIONS { }");
        let files = one_file(vec![
            progbits(".text.a", flags::TEXT, 4),
            progbits(".text.b", flags::TEXT, 4),
        ]);
        let r = run(&script, files);
        assert_eq!(section(&r, ".text").sections.len(), 2);
    }

    #[test]
    fn headers_are_placed_below_all_sections() {
        let script = parse("SECTIONS { . = 0x10000 ; .text : { *(.text) } }");
        let r = run(&script, one_file(vec![progbits(".text", flags::TEXT, 4)]));
        let text = section(&r, ".text");
        assert_eq!(text.addr, 0x10000);
        assert_eq!(r.file_header_addr % 0x1000, 0);
        assert!(r.file_header_addr < text.addr);
        assert_eq!(r.program_headers_addr, r.file_header_addr + 64);
        assert!(r.program_headers_addr < text.addr);
    }

    #[test]
    fn auto_load_segments_group_by_flags() {
        let script = parse("SECTIONS { }");
        let files = one_file(vec![
            progbits(".text", flags::TEXT, 0x10),
            progbits(".rodata", flags::RODATA, 0x10),
            progbits(".rodata2", flags::RODATA, 0x10),
            progbits(".data", flags::DATA, 0x10),
        ]);
        let r = run(&script, files);
        let loads: Vec<&Phdr> = r.phdrs.iter().filter(|p| p.p_type == PT_LOAD).collect();
        assert_eq!(loads.len(), 3);
        assert_eq!(loads[0].flags, PF_R | PF_X);
        assert_eq!(loads[0].section_indices().count(), 1);
        assert_eq!(loads[1].flags, PF_R);
        // Consecutive sections with identical flags share one segment.
        assert_eq!(loads[1].section_indices().count(), 2);
        assert_eq!(loads[2].flags, PF_R | PF_W);
    }

    #[test]
    fn explicit_phdrs_last_declared_name_wins() {
        let script = parse(
            "PHDRS { seg PT_LOAD FLAGS(0x4) ; other PT_LOAD FLAGS(0x4) ; seg PT_LOAD FLAGS(0x6) ; } \
             SECTIONS { .data : { *(.data) } :seg }",
        );
        let r = run(&script, one_file(vec![progbits(".data", flags::DATA, 8)]));
        assert!(!r.diag.has_errors());
        assert_eq!(r.phdrs[2].section_indices().count(), 1);
        assert_eq!(r.phdrs[0].section_indices().count(), 0);
    }

    #[test]
    fn explicit_phdr_with_unset_flags_adopts_section_flags() {
        let script = parse(
            "PHDRS { text PT_LOAD ; } SECTIONS { .text : { *(.text) } :text }",
        );
        let r = run(&script, one_file(vec![progbits(".text", flags::TEXT, 8)]));
        assert_eq!(r.phdrs[0].flags, PF_R | PF_X);
    }

    #[test]
    fn unknown_phdr_name_is_reported_not_fatal() {
        let script = parse("SECTIONS { .text : { *(.text) } :nosuch }");
        let r = run(&script, one_file(vec![progbits(".text", flags::TEXT, 8)]));
        assert!(r.diag.messages()[0].contains("not listed in PHDRS"));
        // The unresolved name leaves the id list empty, so the
        // section falls back to automatic load grouping.
        assert!(r.phdrs.iter().any(|p| p.p_type == PT_LOAD));
    }

    #[test]
    fn filehdr_phdrs_and_singleton_members() {
        let script = parse(
            "PHDRS { hdr PT_PHDR PHDRS ; text PT_LOAD FILEHDR ; note PT_NOTE ; \
             tls PT_TLS ; relro PT_GNU_RELRO ; } \
             SECTIONS { }",
        );
        let files = one_file(vec![
            progbits(".text", flags::TEXT, 0x10),
            sec(".note.abi", flags::RODATA, SHT_NOTE, 8, 1),
            sec(".tdata", flags::TLS_DATA, SHT_PROGBITS, 8, 1),
            progbits(".data.rel.ro", flags::DATA, 8),
        ]);
        let r = run(&script, files);
        assert_eq!(r.phdrs[0].members[0], PhdrMember::ProgramHeaders);
        assert_eq!(r.phdrs[1].members[0], PhdrMember::FileHeader);
        let note_members: Vec<usize> = r.phdrs[2].section_indices().collect();
        assert_eq!(note_members.len(), 1);
        assert_eq!(r.sections[note_members[0]].name, ".note.abi");
        let tls_members: Vec<usize> = r.phdrs[3].section_indices().collect();
        assert_eq!(tls_members.len(), 1);
        assert_eq!(r.sections[tls_members[0]].name, ".tdata");
        let relro_members: Vec<usize> = r.phdrs[4].section_indices().collect();
        assert_eq!(relro_members.len(), 1);
        assert_eq!(r.sections[relro_members[0]].name, ".data.rel.ro");
    }

    #[test]
    fn scripted_symbols_become_absolute_at_assigned_address() {
        let script = parse(
            "SECTIONS { . = 0x5000 ; __start = . ; .text : { *(.text) } __end = . ; }",
        );
        let r = run(&script, one_file(vec![progbits(".text", flags::TEXT, 0x40)]));
        let start = r.symbols.find("__start").unwrap();
        assert!(start.is_absolute);
        assert_eq!(start.value, 0x5000);
        assert_eq!(r.symbols.find("__end").unwrap().value, 0x5040);
    }

    #[test]
    fn location_counter_expressions_use_page_constants() {
        let script = parse(
            "SECTIONS { . = 0x1234 ; . = ALIGN ( CONSTANT ( MAXPAGESIZE ) ) ; \
             .text : { *(.text) } }",
        );
        let r = run(&script, one_file(vec![progbits(".text", flags::TEXT, 4)]));
        assert_eq!(section(&r, ".text").addr, 0x2000);
    }

    #[test]
    fn empty_script_lays_out_all_orphans() {
        let script = parse("");
        assert!(!script.do_layout);
        let files = one_file(vec![
            progbits(".text", flags::TEXT, 0x10),
            progbits(".data", flags::DATA, 0x10),
        ]);
        let r = run(&script, files);
        assert_eq!(r.sections.len(), 2);
        assert!(r.sections.iter().all(|s| s.addr != 0));
        assert_eq!(r.phdrs.iter().filter(|p| p.p_type == PT_LOAD).count(), 2);
    }

    #[test]
    fn same_name_different_attributes_get_distinct_sections() {
        let script = parse("SECTIONS { .mixed : { *(.m.ro) *(.m.rw) } }");
        let files = one_file(vec![
            progbits(".m.ro", flags::RODATA, 8),
            progbits(".m.rw", flags::DATA, 8),
        ]);
        let r = run(&script, files);
        let mixed: Vec<&OutputSection> =
            r.sections.iter().filter(|s| s.name == ".mixed").collect();
        assert_eq!(mixed.len(), 2);
        assert!(mixed[0].addr != mixed[1].addr);
    }

    #[test]
    fn alignment_is_honored_for_members_and_sections() {
        let script = parse("SECTIONS { . = 0x1001 ; .data : { *(.d1 .d2) } }");
        let files = one_file(vec![
            sec(".d1", flags::DATA, SHT_PROGBITS, 3, 4),
            sec(".d2", flags::DATA, SHT_PROGBITS, 5, 8),
        ]);
        let r = run(&script, files);
        let data = section(&r, ".data");
        assert_eq!(data.alignment, 8);
        assert_eq!(data.addr, 0x1008);
        assert_eq!(data.sections[0].offset, 0);
        assert_eq!(data.sections[1].offset, 8);
        assert_eq!(data.size, 13);
    }
}
