//! Symbol table: labels, `.equ` constants, and `.global` markers.

use std::collections::HashMap;

use crate::error::{AsmError, SourcePos};

/// How a symbol was defined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    /// Address of a location in the image.
    Label,
    /// `.equ` / `.set` constant.
    Constant,
    /// Marked `.global` (accepted for compatibility; single-module assembly
    /// gives it no further meaning).
    External,
}

/// A defined symbol.
#[derive(Debug, Clone)]
pub struct Symbol {
    pub name: String,
    pub value: u32,
    pub kind: SymbolKind,
}

/// Name → symbol map with duplicate-definition detection.
#[derive(Debug, Default)]
pub struct SymbolTable {
    map: HashMap<String, Symbol>,
}

impl SymbolTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Define a symbol. Redefinition at the same value is tolerated
    /// (`.set` reuse); a different value is an error.
    pub fn define(
        &mut self,
        name: &str,
        value: u32,
        kind: SymbolKind,
        pos: &SourcePos,
    ) -> Result<(), AsmError> {
        if let Some(existing) = self.map.get(name) {
            if existing.value != value {
                return Err(AsmError::DuplicateSymbol {
                    pos: pos.clone(),
                    name: name.to_string(),
                });
            }
        }
        self.map.insert(
            name.to_string(),
            Symbol {
                name: name.to_string(),
                value,
                kind,
            },
        );
        Ok(())
    }

    /// `.set` semantics: redefinition is allowed and takes the new value.
    pub fn set(&mut self, name: &str, value: u32, kind: SymbolKind) {
        self.map.insert(
            name.to_string(),
            Symbol {
                name: name.to_string(),
                value,
                kind,
            },
        );
    }

    /// Mark a defined symbol as externally visible.
    pub fn mark_global(&mut self, name: &str) {
        if let Some(sym) = self.map.get_mut(name) {
            sym.kind = SymbolKind::External;
        }
    }

    /// Value of a symbol, if defined.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<u32> {
        self.map.get(name).map(|s| s.value)
    }

    /// All symbols, for listings and the loader.
    pub fn iter(&self) -> impl Iterator<Item = &Symbol> {
        self.map.values()
    }
}
