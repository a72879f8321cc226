//! Symbol table of one compilation unit
//!
//! Definitions map a name to a segment and an offset inside it; references
//! record which function named a symbol. Everything is resolved once, at
//! finalize, after every function has been emitted.

use m65_codegen::{Address, Operand};
use m65_common::{CompilerError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// An output area
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Segment {
    /// Always-mapped code
    Common,
    /// Paged ROM bank
    Bank(u8),
    /// RAM data area
    Data,
    /// Fixed machine address outside every segment
    Absolute,
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Segment::Common => write!(f, "common"),
            Segment::Bank(n) => write!(f, "{}", n),
            Segment::Data => write!(f, "data"),
            Segment::Absolute => write!(f, "absolute"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Placement {
    pub segment: Segment,
    pub offset: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    Function { externally_visible: bool },
    /// Code label inside a function
    Label,
    Data,
    External,
}

impl SymbolKind {
    pub fn is_code(&self) -> bool {
        matches!(self, SymbolKind::Function { .. } | SymbolKind::Label)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Definition {
    pub placement: Placement,
    pub kind: SymbolKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub symbol: String,
    pub from: String,
}

/// Where an externally visible function ended up
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relocation {
    pub symbol: String,
    pub bank: Segment,
    pub offset: u16,
}

#[derive(Debug, Default)]
pub struct SymbolTable {
    definitions: BTreeMap<String, Definition>,
    references: Vec<Reference>,
}

impl SymbolTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn define(&mut self, name: &str, placement: Placement, kind: SymbolKind) -> Result<()> {
        if self.definitions.contains_key(name) {
            return Err(CompilerError::invalid_ir(name, "symbol defined more than once"));
        }
        self.definitions
            .insert(name.to_string(), Definition { placement, kind });
        Ok(())
    }

    pub fn reference(&mut self, symbol: &str, from: &str) {
        self.references.push(Reference {
            symbol: symbol.to_string(),
            from: from.to_string(),
        });
    }

    pub fn get(&self, name: &str) -> Option<&Definition> {
        self.definitions.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Definition)> {
        self.definitions.iter()
    }

    /// Fail on the lexicographically first symbol nobody defines
    pub fn check_resolved(&self) -> Result<()> {
        let missing = self
            .references
            .iter()
            .filter(|r| !self.definitions.contains_key(&r.symbol))
            .min_by(|a, b| a.symbol.cmp(&b.symbol).then(a.from.cmp(&b.from)));
        match missing {
            Some(r) => Err(CompilerError::UnresolvedSymbol {
                symbol: r.symbol.clone(),
                referenced_from: r.from.clone(),
            }),
            None => Ok(()),
        }
    }

    /// Relocation entries of externally visible functions, by name
    pub fn relocations(&self) -> Vec<Relocation> {
        self.definitions
            .iter()
            .filter(|(_, d)| matches!(d.kind, SymbolKind::Function { externally_visible: true }))
            .map(|(name, d)| Relocation {
                symbol: name.clone(),
                bank: d.placement.segment,
                offset: d.placement.offset,
            })
            .collect()
    }
}

/// Name an operand refers to, including local labels
pub fn referenced_name(operand: &Operand) -> Option<&str> {
    match operand {
        Operand::Relative(label) => Some(label),
        Operand::Absolute(Address::Label(label)) => Some(label),
        other => other.symbol_name(),
    }
}
