//! Symbol table management.
//!
//! Tracks symbols contributed by input object files plus the absolute
//! symbols a script introduces, and carries the address updates made
//! during the address-assignment pass.

use object::elf::STV_DEFAULT;
use std::collections::HashMap;

/// A defined symbol.
#[derive(Debug, Clone)]
pub struct Symbol {
    pub name: String,
    /// Virtual address; updated by symbol assignments during layout.
    pub value: u64,
    /// ELF `st_other` visibility (`STV_*`).
    pub visibility: u8,
    pub is_weak: bool,
    /// True for symbols not tied to any section, including all
    /// script-introduced symbols.
    pub is_absolute: bool,
}

/// The global symbol table for one link.
#[derive(Debug, Default)]
pub struct SymbolTable {
    symbols: Vec<Symbol>,
    index: HashMap<String, usize>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn find(&self, name: &str) -> Option<&Symbol> {
        self.index.get(name).map(|&i| &self.symbols[i])
    }

    pub fn find_mut(&mut self, name: &str) -> Option<&mut Symbol> {
        let i = *self.index.get(name)?;
        Some(&mut self.symbols[i])
    }

    /// Insert a symbol from an input file. A strong definition
    /// overrides an existing weak one; otherwise the first definition
    /// wins.
    pub fn define(&mut self, name: &str, value: u64, is_weak: bool) {
        if let Some(existing) = self.find(name) {
            if is_weak || !existing.is_weak {
                return;
            }
        }
        self.insert(Symbol {
            name: name.to_string(),
            value,
            visibility: STV_DEFAULT,
            is_weak,
            is_absolute: false,
        });
    }

    /// Define an absolute symbol, e.g. one introduced by a script
    /// assignment. Value starts at 0 and is filled in by the
    /// address-assignment pass.
    pub fn add_absolute(&mut self, name: &str, visibility: u8) {
        self.insert(Symbol {
            name: name.to_string(),
            value: 0,
            visibility,
            is_weak: false,
            is_absolute: true,
        });
    }

    fn insert(&mut self, symbol: Symbol) {
        match self.index.get(&symbol.name) {
            Some(&i) => self.symbols[i] = symbol,
            None => {
                self.index.insert(symbol.name.clone(), self.symbols.len());
                self.symbols.push(symbol);
            }
        }
    }

    /// All symbols in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Symbol> {
        self.symbols.iter()
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }
}
