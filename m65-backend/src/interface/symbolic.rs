//! Human-readable assembly listing

use m65_codegen::AsmInst;
use m65_common::{BankId, InterruptKind, Result};
use std::fmt::Write;

use super::symbols::SymbolTable;
use super::unit::CodeUnit;
use super::{Artifact, CompiledOutput};

#[derive(Debug, Default)]
pub struct SymbolicEmitter {
    pub(super) unit: CodeUnit,
}

impl SymbolicEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub(super) fn finalize(self) -> Result<CompiledOutput> {
        self.unit.close()?;
        let table = self.unit.flat_symbols()?;
        table.check_resolved()?;
        let listing = render(&self.unit, &table);
        Ok(CompiledOutput {
            target: "symbolic".to_string(),
            artifact: Artifact::Listing(listing),
            relocations: table.relocations(),
            statistics: self.unit.statistics(),
        })
    }
}

fn render(unit: &CodeUnit, table: &SymbolTable) -> String {
    let mut out = String::new();
    // Writing to a String cannot fail
    for function in unit.functions() {
        let info = &function.info;
        let mut notes = Vec::new();
        if let BankId::Bank(n) = info.declared_bank {
            notes.push(format!("bank {}", n));
        }
        match info.interrupt {
            InterruptKind::None => {}
            kind => notes.push(kind.to_string()),
        }
        if !info.externally_visible {
            notes.push("internal".to_string());
        }
        let offset = table.get(&info.name).map(|d| d.placement.offset).unwrap_or_default();
        if notes.is_empty() {
            let _ = writeln!(out, "; {} @ ${:04X}", info.name, offset);
        } else {
            let _ = writeln!(out, "; {} @ ${:04X} ({})", info.name, offset, notes.join(", "));
        }
        for inst in &function.code {
            match inst {
                AsmInst::Comment(text) => {
                    let _ = writeln!(out, "    ; {}", text);
                }
                other => {
                    let _ = writeln!(out, "{}", other);
                }
            }
        }
        out.push('\n');
    }

    if !unit.data().is_empty() {
        out.push_str("; data\n");
        for object in unit.data() {
            let _ = writeln!(out, "{}:", object.name);
            match object.bank {
                BankId::Common if object.bytes.iter().all(|b| *b == 0) => {
                    let _ = writeln!(out, "    .res {}", object.size());
                }
                bank => {
                    if let BankId::Bank(n) = bank {
                        let _ = writeln!(out, "    ; bank {}", n);
                    }
                    for chunk in object.bytes.chunks(8) {
                        let bytes: Vec<String> = chunk.iter().map(|b| format!("${:02X}", b)).collect();
                        let _ = writeln!(out, "    .byte {}", bytes.join(", "));
                    }
                }
            }
        }
        out.push('\n');
    }

    for (name, address) in unit.externals() {
        let _ = writeln!(out, "{} = ${:04X}", name, address);
    }
    out
}
