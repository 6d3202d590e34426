//! Linker script directive parser.
//!
//! A recursive-descent parser over the token stream. Top-level
//! directives either mutate the shared `LinkOptions` (`ENTRY`,
//! `OUTPUT`, `EXTERN`, `SEARCH_DIR`), hand file references to the
//! `FileResolver` collaborator (`GROUP`/`INPUT`), or build the script
//! AST (`PHDRS`, `SECTIONS`). Parsing is best-effort: an error abandons
//! the directive it occurred in, the scanner resynchronizes and keeps
//! going so one run reports as many problems as it can.

use std::path::{Path, PathBuf};

use crate::command::{
    Command, Constraint, InputSectionDescription, OutputSectionCommand, PhdrsCommand,
    ScriptConfig, SymbolAssignment,
};
use crate::config::LinkOptions;
use crate::diag::Diagnostics;
use crate::tokenizer::{tokenize, TokenStream};
use crate::utils::{parse_hex, parse_int};

use object::elf::{
    PT_DYNAMIC, PT_GNU_EH_FRAME, PT_GNU_RELRO, PT_GNU_STACK, PT_INTERP, PT_LOAD, PT_NOTE,
    PT_NULL, PT_PHDR, PT_SHLIB, PT_TLS,
};

/// Receiver for the file and library references a script names in
/// `GROUP`/`INPUT`. The driver queues them for loading.
pub trait FileResolver {
    fn add_file(&mut self, path: &Path);
    fn add_library(&mut self, name: &str);
}

/// Parse a script and populate `options` and `script`.
///
/// `script_path` is the location of the script itself; scripts under
/// the sysroot resolve their absolute file references against it.
pub fn read_linker_script(
    text: &str,
    script_path: &Path,
    options: &mut LinkOptions,
    script: &mut ScriptConfig,
    diag: &mut Diagnostics,
    resolver: &mut dyn FileResolver,
) {
    let under_sysroot = options.is_under_sysroot(script_path);
    ScriptParser {
        tokens: TokenStream::new(tokenize(text)),
        options,
        script,
        diag,
        resolver,
        under_sysroot,
    }
    .run();
}

struct ScriptParser<'a> {
    tokens: TokenStream,
    options: &'a mut LinkOptions,
    script: &'a mut ScriptConfig,
    diag: &'a mut Diagnostics,
    resolver: &'a mut dyn FileResolver,
    under_sysroot: bool,
}

impl ScriptParser<'_> {
    fn run(&mut self) {
        while !self.tokens.at_eof() {
            let tok = self.next();
            match tok.as_str() {
                "ENTRY" => self.read_entry(),
                "EXTERN" => self.read_extern(),
                "GROUP" | "INPUT" => self.read_group(),
                "INCLUDE" => self.read_include(),
                "OUTPUT" => self.read_output(),
                "OUTPUT_ARCH" => self.read_output_arch(),
                "OUTPUT_FORMAT" => self.read_output_format(),
                "PHDRS" => self.read_phdrs(),
                "SEARCH_DIR" => self.read_search_dir(),
                "SECTIONS" => self.read_sections(),
                ";" => {}
                _ => self.set_error(format!("unknown directive: {tok}")),
            }
            // An error abandons the directive it happened in; scanning
            // resumes with the next token.
            if self.failed() {
                self.tokens.recover();
            }
        }
    }

    fn peek(&self) -> &str {
        self.tokens.peek()
    }

    fn next(&mut self) -> String {
        self.tokens.next(self.diag)
    }

    fn skip(&mut self, tok: &str) -> bool {
        self.tokens.skip(tok)
    }

    fn expect(&mut self, tok: &str) {
        self.tokens.expect(tok, self.diag)
    }

    fn failed(&self) -> bool {
        self.tokens.failed()
    }

    fn set_error(&mut self, msg: impl Into<String>) {
        self.tokens.set_error(self.diag, msg)
    }

    /// Resolve a file reference from `GROUP`/`INPUT` and hand it to the
    /// resolver collaborator.
    fn add_file(&mut self, name: &str) {
        if self.under_sysroot && name.starts_with('/') {
            let path = self.options.sysroot.join(name.trim_start_matches('/'));
            if path.exists() {
                self.resolver.add_file(&path);
                return;
            }
        }

        let path = Path::new(name);
        if path.is_absolute() {
            self.resolver.add_file(path);
        } else if let Some(rest) = name.strip_prefix('=') {
            if self.options.has_sysroot() {
                let path = self.options.sysroot.join(rest.trim_start_matches('/'));
                self.resolver.add_file(&path);
            } else {
                self.resolver.add_file(Path::new(rest));
            }
        } else if let Some(lib) = name.strip_prefix("-l") {
            self.resolver.add_library(lib);
        } else if path.exists() {
            self.resolver.add_file(path);
        } else {
            match self.options.find_from_search_paths(name) {
                Some(found) => self.resolver.add_file(&found),
                None => self.set_error(format!("unable to find {name}")),
            }
        }
    }

    /// `AS_NEEDED ( files... )` inside `GROUP`: the as-needed flag is
    /// raised for the nested list only and restored afterwards.
    fn read_as_needed(&mut self) {
        self.expect("(");
        let orig = self.options.as_needed;
        self.options.as_needed = true;
        while !self.failed() {
            let tok = self.next();
            if tok == ")" {
                break;
            }
            self.add_file(&tok);
        }
        self.options.as_needed = orig;
    }

    fn read_entry(&mut self) {
        // -e <symbol> takes precedence over ENTRY(<symbol>).
        self.expect("(");
        let tok = self.next();
        if self.options.entry.is_empty() {
            self.options.entry = tok;
        }
        self.expect(")");
    }

    fn read_extern(&mut self) {
        self.expect("(");
        while !self.failed() {
            let tok = self.next();
            if tok == ")" {
                return;
            }
            self.options.undefined.push(tok);
        }
    }

    fn read_group(&mut self) {
        self.expect("(");
        while !self.failed() {
            let tok = self.next();
            if tok == ")" {
                return;
            }
            if tok == "AS_NEEDED" {
                self.read_as_needed();
                continue;
            }
            self.add_file(&tok);
        }
    }

    fn read_include(&mut self) {
        let tok = self.next();
        match std::fs::read_to_string(&tok) {
            Ok(text) => self.tokens.splice(tokenize(&text)),
            Err(_) => self.set_error(format!("cannot open {tok}")),
        }
    }

    fn read_output(&mut self) {
        // -o <file> takes precedence over OUTPUT(<file>).
        self.expect("(");
        let tok = self.next();
        if self.options.output_file.is_empty() {
            self.options.output_file = tok;
        }
        self.expect(")");
    }

    fn read_output_arch(&mut self) {
        // Error checking only for now.
        self.expect("(");
        self.next();
        self.expect(")");
    }

    fn read_output_format(&mut self) {
        // Error checking only for now.
        self.expect("(");
        self.next();
        let tok = self.next();
        if tok == ")" {
            return;
        }
        if tok != "," {
            self.set_error(format!("unexpected token: {tok}"));
            return;
        }
        self.next();
        self.expect(",");
        self.next();
        self.expect(")");
    }

    fn read_phdrs(&mut self) {
        self.expect("{");
        while !self.failed() && !self.skip("}") {
            let name = self.next();
            let p_type = self.read_phdr_type();
            let mut cmd = PhdrsCommand {
                name,
                p_type,
                has_filehdr: false,
                has_phdrs: false,
                flags: None,
            };
            while !self.failed() {
                let tok = self.next();
                match tok.as_str() {
                    ";" => break,
                    "FILEHDR" => cmd.has_filehdr = true,
                    "PHDRS" => cmd.has_phdrs = true,
                    "FLAGS" => {
                        self.expect("(");
                        let tok = self.next();
                        // A malformed value leaves the sentinel unset.
                        cmd.flags = parse_int(&tok).map(|v| v as u32).or(cmd.flags);
                        self.expect(")");
                    }
                    _ => self.set_error(format!("unexpected header attribute: {tok}")),
                }
            }
            self.script.phdrs_commands.push(cmd);
            if self.failed() {
                // A bad entry is skipped up to its terminator; the next
                // entry parses normally.
                self.tokens.recover();
                while !self.tokens.at_eof() && self.peek() != "}" && !self.skip(";") {
                    self.next();
                }
            }
        }
    }

    fn read_phdr_type(&mut self) -> u32 {
        let tok = self.next();
        match tok.as_str() {
            "PT_NULL" => PT_NULL,
            "PT_LOAD" => PT_LOAD,
            "PT_DYNAMIC" => PT_DYNAMIC,
            "PT_INTERP" => PT_INTERP,
            "PT_NOTE" => PT_NOTE,
            "PT_SHLIB" => PT_SHLIB,
            "PT_PHDR" => PT_PHDR,
            "PT_TLS" => PT_TLS,
            "PT_GNU_EH_FRAME" => PT_GNU_EH_FRAME,
            "PT_GNU_STACK" => PT_GNU_STACK,
            "PT_GNU_RELRO" => PT_GNU_RELRO,
            _ => {
                self.set_error(format!("invalid program header type: {tok}"));
                PT_NULL
            }
        }
    }

    fn read_search_dir(&mut self) {
        self.expect("(");
        let tok = self.next();
        self.options.search_paths.push(PathBuf::from(tok));
        self.expect(")");
    }

    fn read_sections(&mut self) {
        self.script.do_layout = true;
        self.expect("{");
        while !self.failed() && !self.skip("}") {
            if self.peek() == "." {
                self.read_location_counter_value();
                continue;
            }
            let tok = self.next();
            if self.peek() == "=" {
                self.read_symbol_assignment(tok);
            } else {
                self.read_output_section_description(tok);
            }
        }
    }

    fn read_location_counter_value(&mut self) {
        self.expect(".");
        self.expect("=");
        let expr = self.read_sections_command_expr();
        if expr.is_empty() {
            self.diag.error("error in location counter expression");
        } else {
            self.script
                .commands
                .push(Command::Assignment(SymbolAssignment { name: ".".into(), expr }));
        }
    }

    fn read_symbol_assignment(&mut self, name: String) {
        self.expect("=");
        let expr = self.read_sections_command_expr();
        if expr.is_empty() {
            self.diag.error("error in symbol assignment expression");
        } else {
            self.script
                .commands
                .push(Command::Assignment(SymbolAssignment { name, expr }));
        }
    }

    /// Collect the raw token run of an expression, up to `;`.
    fn read_sections_command_expr(&mut self) -> Vec<String> {
        let mut expr = Vec::new();
        while !self.failed() {
            let tok = self.next();
            if tok == ";" {
                break;
            }
            expr.push(tok);
        }
        expr
    }

    fn read_output_section_description(&mut self, name: String) {
        let mut cmd = OutputSectionCommand::new(name);
        self.expect(":");

        // Parse constraints.
        if self.skip("ONLY_IF_RO") {
            cmd.constraint = Constraint::ReadOnly;
        }
        if self.skip("ONLY_IF_RW") {
            cmd.constraint = Constraint::ReadWrite;
        }
        self.expect("{");

        while !self.failed() && !self.skip("}") {
            let tok = self.next();
            match tok.as_str() {
                "*" => {
                    let mut rule = InputSectionDescription::default();
                    self.expect("(");
                    while !self.failed() && !self.skip(")") {
                        rule.patterns.push(self.next());
                    }
                    cmd.sections.push(rule);
                }
                "KEEP" => {
                    self.expect("(");
                    self.expect("*");
                    self.expect("(");
                    let mut rule = InputSectionDescription::default();
                    while !self.failed() && !self.skip(")") {
                        let pattern = self.next();
                        self.script.kept_sections.push(pattern.clone());
                        rule.patterns.push(pattern);
                    }
                    self.expect(")");
                    cmd.sections.push(rule);
                }
                _ => self.set_error(format!("unknown command {tok}")),
            }
        }

        cmd.phdrs = self.read_output_section_phdrs();

        let tok = self.peek().to_string();
        if tok.starts_with('=') {
            match tok.strip_prefix("=0x").and_then(parse_hex) {
                Some(filler) => {
                    cmd.filler = filler;
                    self.next();
                }
                None => self.set_error("filler should be a hexadecimal value"),
            }
        }

        self.script.commands.push(Command::OutputSection(cmd));
    }

    /// `:phdr` suffixes after an output section body. The name may be
    /// fused with the colon or follow as its own token.
    fn read_output_section_phdrs(&mut self) -> Vec<String> {
        let mut phdrs = Vec::new();
        while !self.failed() && self.peek().starts_with(':') {
            let tok = self.next();
            let name = if tok.len() == 1 {
                self.next()
            } else {
                tok[1..].to_string()
            };
            if name.is_empty() {
                self.set_error("section header name is empty");
                break;
            }
            phdrs.push(name);
        }
        phdrs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[derive(Default)]
    struct RecordingResolver {
        files: Vec<PathBuf>,
        libraries: Vec<String>,
    }

    impl FileResolver for RecordingResolver {
        fn add_file(&mut self, path: &Path) {
            self.files.push(path.to_path_buf());
        }

        fn add_library(&mut self, name: &str) {
            self.libraries.push(name.to_string());
        }
    }

    struct Parsed {
        options: LinkOptions,
        script: ScriptConfig,
        diag: Diagnostics,
        resolver: RecordingResolver,
    }

    fn parse(text: &str) -> Parsed {
        parse_with_options(text, LinkOptions::default())
    }

    fn parse_with_options(text: &str, mut options: LinkOptions) -> Parsed {
        let mut script = ScriptConfig::default();
        let mut diag = Diagnostics::new();
        let mut resolver = RecordingResolver::default();
        read_linker_script(
            text,
            Path::new("test.ld"),
            &mut options,
            &mut script,
            &mut diag,
            &mut resolver,
        );
        Parsed { options, script, diag, resolver }
    }

    fn output_section<'a>(script: &'a ScriptConfig, name: &str) -> &'a OutputSectionCommand {
        script
            .commands
            .iter()
            .find_map(|cmd| match cmd {
                Command::OutputSection(c) if c.name == name => Some(c),
                _ => None,
            })
            .unwrap_or_else(|| panic!("no output section command {name}"))
    }

    #[test]
    fn entry_and_output_record_first_value() {
        let p = parse("ENTRY(_start) OUTPUT(a.out) ENTRY(_other) OUTPUT(b.out)");
        assert!(!p.diag.has_errors());
        assert_eq!(p.options.entry, "_start");
        assert_eq!(p.options.output_file, "a.out");
    }

    #[test]
    fn command_line_takes_precedence_over_entry() {
        let mut options = LinkOptions::default();
        options.entry = "main".to_string();
        let p = parse_with_options("ENTRY(_start)", options);
        assert_eq!(p.options.entry, "main");
    }

    #[test]
    fn extern_collects_undefined_symbols() {
        let p = parse("EXTERN(foo bar baz)");
        assert_eq!(p.options.undefined, ["foo", "bar", "baz"]);
    }

    #[test]
    fn search_dir_and_output_format() {
        let p = parse(
            "SEARCH_DIR(\"/usr/lib\") OUTPUT_FORMAT(elf64-x86-64) \
             OUTPUT_FORMAT(elf64-x86-64, elf64-x86-64, elf64-x86-64) OUTPUT_ARCH(i386:x86-64)",
        );
        assert!(!p.diag.has_errors());
        assert_eq!(p.options.search_paths, [PathBuf::from("/usr/lib")]);
    }

    #[test]
    fn group_resolves_files_and_libraries() {
        let p = parse("GROUP(/abs/crt0.o -lc AS_NEEDED(-lm))");
        assert!(!p.diag.has_errors());
        assert_eq!(p.resolver.files, [PathBuf::from("/abs/crt0.o")]);
        assert_eq!(p.resolver.libraries, ["c", "m"]);
        // The AS_NEEDED toggle is scoped; the prior value is restored.
        assert!(!p.options.as_needed);
    }

    #[test]
    fn group_reports_unresolvable_names() {
        let p = parse("GROUP(no-such-file.o)");
        assert!(p.diag.has_errors());
        assert!(p.diag.messages()[0].contains("unable to find"));
    }

    #[test]
    fn include_splices_tokens() {
        let path = std::env::temp_dir().join(format!("ulds-include-{}.ld", std::process::id()));
        std::fs::write(&path, "ENTRY(from_include)").unwrap();
        let p = parse(&format!("INCLUDE \"{}\" OUTPUT(a.out)", path.display()));
        std::fs::remove_file(&path).ok();
        assert!(!p.diag.has_errors());
        assert_eq!(p.options.entry, "from_include");
        assert_eq!(p.options.output_file, "a.out");
    }

    #[test]
    fn include_missing_file_is_reported_and_parsing_continues() {
        let p = parse("INCLUDE /no/such/file.ld ENTRY(_start)");
        assert!(p.diag.messages()[0].contains("cannot open"));
        assert_eq!(p.options.entry, "_start");
    }

    #[test]
    fn unknown_directive_reports_and_continues() {
        let p = parse("NOT_A_DIRECTIVE ENTRY(_start)");
        assert!(p.diag.messages()[0].contains("unknown directive"));
        assert_eq!(p.options.entry, "_start");
    }

    #[test]
    fn phdrs_entries_parse_types_attributes_and_flags() {
        let p = parse(
            "PHDRS { headers PT_PHDR PHDRS ; interp PT_INTERP ; \
             text PT_LOAD FILEHDR PHDRS FLAGS(0x5) ; data PT_LOAD ; }",
        );
        assert!(!p.diag.has_errors());
        let cmds = &p.script.phdrs_commands;
        assert_eq!(cmds.len(), 4);
        assert_eq!(cmds[0].p_type, PT_PHDR);
        assert!(cmds[0].has_phdrs);
        assert!(!cmds[0].has_filehdr);
        assert_eq!(cmds[1].p_type, PT_INTERP);
        assert_eq!(cmds[2].p_type, PT_LOAD);
        assert!(cmds[2].has_filehdr);
        assert_eq!(cmds[2].flags, Some(0x5));
        assert_eq!(cmds[3].flags, None);
    }

    #[test]
    fn phdrs_bad_entry_does_not_poison_the_next() {
        let p = parse("PHDRS { bogus PT_BOGUS ; data PT_LOAD ; }");
        assert!(p.diag.messages()[0].contains("invalid program header type"));
        let cmds = &p.script.phdrs_commands;
        assert_eq!(cmds.len(), 2);
        assert_eq!(cmds[0].p_type, PT_NULL);
        assert_eq!(cmds[1].p_type, PT_LOAD);
        assert_eq!(cmds[1].name, "data");
    }

    #[test]
    fn sections_builds_commands_in_order() {
        let p = parse(
            "SECTIONS { . = 0x400000 ; \
             .text : { *(.text .text.*) } \
             __etext = . ; \
             .data : { *(.data) } }",
        );
        assert!(!p.diag.has_errors());
        assert!(p.script.do_layout);
        assert_eq!(p.script.commands.len(), 4);
        match &p.script.commands[0] {
            Command::Assignment(a) => {
                assert_eq!(a.name, ".");
                assert_eq!(a.expr, ["0x400000"]);
            }
            _ => panic!("expected location assignment first"),
        }
        match &p.script.commands[2] {
            Command::Assignment(a) => assert_eq!(a.name, "__etext"),
            _ => panic!("expected symbol assignment"),
        }
        let text = output_section(&p.script, ".text");
        assert_eq!(text.sections.len(), 1);
        assert_eq!(text.sections[0].patterns, [".text", ".text.*"]);
    }

    #[test]
    fn keep_registers_patterns_globally() {
        let p = parse("SECTIONS { .init : { KEEP (* (.init .init.*)) *(.plain) } }");
        assert!(!p.diag.has_errors());
        assert_eq!(p.script.kept_sections, [".init", ".init.*"]);
        let init = output_section(&p.script, ".init");
        assert_eq!(init.sections.len(), 2);
        assert_eq!(init.sections[0].patterns, [".init", ".init.*"]);
        assert_eq!(init.sections[1].patterns, [".plain"]);
        assert!(p.script.should_keep(".init.fini"));
        assert!(!p.script.should_keep(".plain"));
    }

    #[test]
    fn constraints_are_recorded() {
        let p = parse(
            "SECTIONS { .ro : ONLY_IF_RO { *(.ro) } .rw : ONLY_IF_RW { *(.rw) } }",
        );
        assert_eq!(output_section(&p.script, ".ro").constraint, Constraint::ReadOnly);
        assert_eq!(output_section(&p.script, ".rw").constraint, Constraint::ReadWrite);
    }

    #[test]
    fn phdr_suffixes_fused_and_split() {
        let p = parse(
            "PHDRS { text PT_LOAD ; rodata PT_LOAD ; } \
             SECTIONS { .text : { *(.text) } :text :rodata \
             .rodata : { *(.rodata) } : rodata }",
        );
        assert!(!p.diag.has_errors());
        assert_eq!(output_section(&p.script, ".text").phdrs, ["text", "rodata"]);
        assert_eq!(output_section(&p.script, ".rodata").phdrs, ["rodata"]);
    }

    #[test]
    fn filler_must_be_hex() {
        let p = parse("SECTIONS { .text : { *(.text) } =0x90909090 }");
        assert!(!p.diag.has_errors());
        assert_eq!(output_section(&p.script, ".text").filler, [0x90, 0x90, 0x90, 0x90]);
        assert_eq!(p.script.filler(".text"), Some([0x90u8, 0x90, 0x90, 0x90].as_slice()));

        let p = parse("SECTIONS { .text : { *(.text) } =90 }");
        assert!(p.diag.has_errors());
        assert!(p.diag.messages()[0].contains("hexadecimal"));
    }

    #[test]
    fn semicolons_are_noops() {
        let p = parse("; ENTRY(_start) ;");
        assert!(!p.diag.has_errors());
        assert_eq!(p.options.entry, "_start");
    }
}
