//! Linker script AST.
//!
//! The directive parser reduces a script to an ordered `Command` list
//! plus the auxiliary tables collected along the way (program-header
//! declarations, kept-section patterns). Command order is semantically
//! significant: it is the placement order for input sections and the
//! ordering key for output sections in the final image.

use wildmatch::WildMatch;

/// One top-level command inside `SECTIONS { ... }`.
///
/// An assignment whose target is `"."` moves the location counter;
/// any other target updates (or introduces) a symbol.
#[derive(Debug)]
pub enum Command {
    Assignment(SymbolAssignment),
    OutputSection(OutputSectionCommand),
}

/// `. = expr ;` or `name = expr ;`. The expression is kept as its raw
/// token run and evaluated once per layout pass, in list order.
#[derive(Debug)]
pub struct SymbolAssignment {
    pub name: String,
    pub expr: Vec<String>,
}

/// `ONLY_IF_RO` / `ONLY_IF_RW` constraint on an output section rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Constraint {
    #[default]
    None,
    ReadOnly,
    ReadWrite,
}

/// A `*( pattern... )` rule: glob patterns matched against input
/// section names, in order.
#[derive(Debug, Default)]
pub struct InputSectionDescription {
    pub patterns: Vec<String>,
}

impl InputSectionDescription {
    pub fn matches(&self, name: &str) -> bool {
        self.patterns.iter().any(|p| WildMatch::new(p).matches(name))
    }
}

/// `name : [constraint] { rules... } [:phdr]* [=0xHEX]`.
#[derive(Debug)]
pub struct OutputSectionCommand {
    pub name: String,
    pub constraint: Constraint,
    /// Nested input-section rules, in declaration order.
    pub sections: Vec<InputSectionDescription>,
    /// Program-header names this section is explicitly assigned to.
    pub phdrs: Vec<String>,
    /// Gap filler bytes, empty if none was given.
    pub filler: Vec<u8>,
}

impl OutputSectionCommand {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            constraint: Constraint::None,
            sections: Vec::new(),
            phdrs: Vec::new(),
            filler: Vec::new(),
        }
    }
}

/// One entry of a `PHDRS { ... }` table.
///
/// `flags == None` means no `FLAGS(...)` was given; the segment then
/// inherits the flags of the first section assigned to it.
#[derive(Debug)]
pub struct PhdrsCommand {
    pub name: String,
    pub p_type: u32,
    pub has_filehdr: bool,
    pub has_phdrs: bool,
    pub flags: Option<u32>,
}

/// The complete parse result for one link.
///
/// Populated incrementally while parsing; read-only during layout.
#[derive(Debug, Default)]
pub struct ScriptConfig {
    pub commands: Vec<Command>,
    pub phdrs_commands: Vec<PhdrsCommand>,
    /// Patterns from `KEEP(...)`: sections matching any of these must
    /// survive garbage collection.
    pub kept_sections: Vec<String>,
    /// True once a `SECTIONS` directive was seen. Without it the caller
    /// may fall back to its own default layout.
    pub do_layout: bool,
}

impl ScriptConfig {
    pub fn has_phdrs_commands(&self) -> bool {
        !self.phdrs_commands.is_empty()
    }

    /// Whether a section name is protected by a `KEEP` pattern.
    pub fn should_keep(&self, name: &str) -> bool {
        self.kept_sections.iter().any(|p| WildMatch::new(p).matches(name))
    }

    /// Index of the first output-section command with the given name.
    /// Names never mentioned in the script order after everything
    /// mentioned, so they get `usize::MAX`.
    pub fn section_order_key(&self, name: &str) -> usize {
        self.commands
            .iter()
            .position(|cmd| matches!(cmd, Command::OutputSection(c) if c.name == name))
            .unwrap_or(usize::MAX)
    }

    /// The filler bytes declared for a named output section, if any.
    pub fn filler(&self, name: &str) -> Option<&[u8]> {
        self.commands.iter().find_map(|cmd| match cmd {
            Command::OutputSection(c) if c.name == name && !c.filler.is_empty() => {
                Some(c.filler.as_slice())
            }
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patterns_glob_match() {
        let rule = InputSectionDescription {
            patterns: vec![".text".into(), ".text.*".into(), ".rodata.?".into()],
        };
        assert!(rule.matches(".text"));
        assert!(rule.matches(".text.startup"));
        assert!(rule.matches(".rodata.1"));
        assert!(!rule.matches(".rodata.12"));
        assert!(!rule.matches(".data"));
    }

    #[test]
    fn section_order_key_follows_declaration_order() {
        let mut script = ScriptConfig::default();
        script.commands.push(Command::Assignment(SymbolAssignment {
            name: ".".into(),
            expr: vec!["0x1000".into()],
        }));
        script.commands.push(Command::OutputSection(OutputSectionCommand::new(".text")));
        script.commands.push(Command::OutputSection(OutputSectionCommand::new(".data")));
        assert_eq!(script.section_order_key(".text"), 1);
        assert_eq!(script.section_order_key(".data"), 2);
        assert_eq!(script.section_order_key(".bss"), usize::MAX);
    }
}
