//! Append-only record of everything emitted into one interface
//!
//! Every interface collects the same stream of hooks; they differ only in
//! how `finalize` turns the record into output.

use m65_codegen::{isa, AsmInst};
use m65_common::{BankId, CompilerError, InterruptKind, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::symbols::{referenced_name, Placement, Segment, SymbolKind, SymbolTable};
use crate::globals::DataObject;

/// What an interface needs to know about the function being emitted
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionInfo {
    pub name: String,
    /// Bank named by the signature, kept for annotation
    pub declared_bank: BankId,
    /// Bank the code is laid out in
    pub placement: BankId,
    pub externally_visible: bool,
    pub interrupt: InterruptKind,
}

impl FunctionInfo {
    /// A runtime routine in the common area
    pub fn routine(name: &str) -> Self {
        Self {
            name: name.to_string(),
            declared_bank: BankId::Common,
            placement: BankId::Common,
            externally_visible: false,
            interrupt: InterruptKind::None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EmittedFunction {
    pub info: FunctionInfo,
    pub code: Vec<AsmInst>,
    /// Instructions before this index came from the prologue
    pub body_start: usize,
    /// Instructions from this index on came from the epilogue
    pub epilogue_start: usize,
}

impl EmittedFunction {
    pub fn segment(&self) -> Segment {
        match self.info.placement {
            BankId::Common => Segment::Common,
            BankId::Bank(n) => Segment::Bank(n),
        }
    }
}

/// Counts reported by every interface
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Statistics {
    pub functions: usize,
    pub instructions: usize,
    pub code_bytes: usize,
    pub cycles: u64,
    pub data_bytes: usize,
}

#[derive(Debug, Default)]
pub struct CodeUnit {
    functions: Vec<EmittedFunction>,
    data: Vec<DataObject>,
    externals: BTreeMap<String, u16>,
    open: Option<EmittedFunction>,
}

impl CodeUnit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin_function(&mut self, info: &FunctionInfo, prologue: &[AsmInst]) -> Result<()> {
        if let Some(open) = &self.open {
            return Err(CompilerError::internal(format!(
                "'{}' started while '{}' is still open",
                info.name, open.info.name
            )));
        }
        let mut function = EmittedFunction {
            info: info.clone(),
            code: Vec::new(),
            body_start: 0,
            epilogue_start: 0,
        };
        for inst in prologue {
            check_allocated(&info.name, inst)?;
            function.code.push(inst.clone());
        }
        function.body_start = function.code.len();
        self.open = Some(function);
        Ok(())
    }

    pub fn push(&mut self, inst: &AsmInst) -> Result<()> {
        let open = self
            .open
            .as_mut()
            .ok_or_else(|| CompilerError::internal(format!("'{}' emitted outside a function", inst)))?;
        check_allocated(&open.info.name, inst)?;
        open.code.push(inst.clone());
        Ok(())
    }

    pub fn end_function(&mut self, epilogue: &[AsmInst]) -> Result<()> {
        let mut function = self
            .open
            .take()
            .ok_or_else(|| CompilerError::internal("epilogue emitted outside a function"))?;
        function.epilogue_start = function.code.len();
        for inst in epilogue {
            check_allocated(&function.info.name, inst)?;
            function.code.push(inst.clone());
        }
        self.functions.push(function);
        Ok(())
    }

    pub fn add_data(&mut self, object: &DataObject) {
        self.data.push(object.clone());
    }

    pub fn add_external(&mut self, name: &str, address: u16) {
        self.externals.insert(name.to_string(), address);
    }

    /// Close the record; an open function is an error
    pub fn close(&self) -> Result<()> {
        match &self.open {
            Some(open) => Err(CompilerError::internal(format!(
                "'{}' was never finished",
                open.info.name
            ))),
            None => Ok(()),
        }
    }

    pub fn functions(&self) -> &[EmittedFunction] {
        &self.functions
    }

    pub fn data(&self) -> &[DataObject] {
        &self.data
    }

    pub fn externals(&self) -> &BTreeMap<String, u16> {
        &self.externals
    }

    /// Symbol table of the flat layout used by the non-hardware interfaces
    ///
    /// All code sits in the common segment in emission order, sized by the
    /// native encoding; data follows in the data segment.
    pub fn flat_symbols(&self) -> Result<SymbolTable> {
        let mut table = SymbolTable::new();
        let mut offset: u32 = 0;
        for function in &self.functions {
            for inst in &function.code {
                define_label(&mut table, function, inst, Segment::Common, offset as u16)?;
                offset += isa::size(inst) as u32;
            }
        }
        let mut data_offset: u32 = 0;
        for object in &self.data {
            table.define(
                &object.name,
                Placement {
                    segment: Segment::Data,
                    offset: data_offset as u16,
                },
                SymbolKind::Data,
            )?;
            data_offset += object.size() as u32;
        }
        self.define_externals(&mut table)?;
        self.record_references(&mut table);
        Ok(table)
    }

    pub fn define_externals(&self, table: &mut SymbolTable) -> Result<()> {
        for (name, address) in &self.externals {
            table.define(
                name,
                Placement {
                    segment: Segment::Absolute,
                    offset: *address,
                },
                SymbolKind::External,
            )?;
        }
        Ok(())
    }

    pub fn record_references(&self, table: &mut SymbolTable) {
        for function in &self.functions {
            for inst in &function.code {
                if let Some(name) = inst.operand().and_then(referenced_name) {
                    table.reference(name, &function.info.name);
                }
            }
        }
    }

    pub fn statistics(&self) -> Statistics {
        let mut stats = Statistics {
            functions: self.functions.len(),
            data_bytes: self.data.iter().map(DataObject::size).sum(),
            ..Statistics::default()
        };
        for inst in self.functions.iter().flat_map(|f| &f.code) {
            if !inst.is_pseudo() {
                stats.instructions += 1;
                stats.code_bytes += isa::size(inst) as usize;
                stats.cycles += isa::cycle_estimate(inst) as u64;
            }
        }
        stats
    }
}

/// Define `inst` in the table if it is a label
pub fn define_label(
    table: &mut SymbolTable,
    function: &EmittedFunction,
    inst: &AsmInst,
    segment: Segment,
    offset: u16,
) -> Result<()> {
    if let AsmInst::Label(name) = inst {
        let kind = if *name == function.info.name {
            SymbolKind::Function {
                externally_visible: function.info.externally_visible,
            }
        } else {
            SymbolKind::Label
        };
        table.define(name, Placement { segment, offset }, kind)?;
    }
    Ok(())
}

fn check_allocated(function: &str, inst: &AsmInst) -> Result<()> {
    match inst.operand() {
        Some(operand) if operand.is_pre_allocation() => Err(CompilerError::internal(format!(
            "'{}': unallocated operand in '{}'",
            function, inst
        ))),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use m65_codegen::{Opcode, Operand, VReg};
    use pretty_assertions::assert_eq;

    fn info(name: &str) -> FunctionInfo {
        FunctionInfo {
            externally_visible: true,
            ..FunctionInfo::routine(name)
        }
    }

    #[test]
    fn test_flat_layout_offsets() {
        let mut unit = CodeUnit::new();
        unit.begin_function(&info("a"), &[AsmInst::label("a")]).unwrap();
        unit.push(&AsmInst::op(Opcode::Lda, Operand::imm(1))).unwrap();
        unit.end_function(&[AsmInst::implied(Opcode::Rts)]).unwrap();
        unit.begin_function(&info("b"), &[AsmInst::label("b")]).unwrap();
        unit.push(&AsmInst::jsr("a")).unwrap();
        unit.end_function(&[AsmInst::implied(Opcode::Rts)]).unwrap();
        unit.close().unwrap();

        let table = unit.flat_symbols().unwrap();
        assert_eq!(table.get("b").unwrap().placement.offset, 3);
        assert_eq!(table.check_resolved(), Ok(()));
        let stats = unit.statistics();
        assert_eq!(stats.instructions, 4);
        assert_eq!(stats.code_bytes, 7);
        assert_eq!(unit.functions()[0].body_start, 1);
        assert_eq!(unit.functions()[0].epilogue_start, 2);
    }

    #[test]
    fn test_unallocated_operand_is_refused() {
        let mut unit = CodeUnit::new();
        unit.begin_function(&info("a"), &[]).unwrap();
        let err = unit
            .push(&AsmInst::op(Opcode::Lda, Operand::Virtual(VReg(0))))
            .unwrap_err();
        assert!(matches!(err, CompilerError::Internal { .. }));
    }

    #[test]
    fn test_unfinished_function_fails_close() {
        let mut unit = CodeUnit::new();
        unit.begin_function(&info("a"), &[]).unwrap();
        assert!(unit.close().is_err());
        assert!(unit.begin_function(&info("b"), &[]).is_err());
    }
}
