//! Backend interfaces
//!
//! Every interface receives the same hooks in the same order: data objects
//! and externals, then for each function a prologue, its body one
//! instruction at a time and an epilogue, then a single `finalize`. The
//! variants differ only in what `finalize` produces.
//!
//! | name       | output                                   | banking |
//! |------------|------------------------------------------|---------|
//! | `symbolic` | assembly listing                         | no      |
//! | `bytecode` | position-independent `M65B` stream       | no      |
//! | `null`     | statistics only                          | no      |
//! | `mos6502`  | machine code per bank, relaxed branches  | yes     |

pub mod bytecode;
pub mod hardware;
pub mod null;
pub mod symbolic;
pub mod symbols;
pub mod unit;

use log::debug;
use m65_codegen::AsmInst;
use m65_common::{CompilerError, Result};
use serde::{Deserialize, Serialize};

use crate::globals::DataObject;
use crate::CodegenOptions;

pub use bytecode::BytecodeEmitter;
pub use hardware::{HardwareConfig, HardwareEmitter, Image, ImageSymbol, SegmentImage};
pub use null::NullEmitter;
pub use symbolic::SymbolicEmitter;
pub use symbols::{Relocation, Segment};
pub use unit::{FunctionInfo, Statistics};

/// Valid target names, in the order they are listed to users
pub const TARGETS: [&str; 4] = ["symbolic", "bytecode", "null", "mos6502"];

/// What `finalize` produced
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Artifact {
    Listing(String),
    Bytecode(Vec<u8>),
    Nothing,
    Image(Image),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledOutput {
    pub target: String,
    pub artifact: Artifact,
    /// Externally visible functions and where they were placed
    pub relocations: Vec<Relocation>,
    pub statistics: Statistics,
}

#[derive(Debug)]
pub enum Interface {
    Symbolic(SymbolicEmitter),
    Bytecode(BytecodeEmitter),
    Null(NullEmitter),
    Hardware(HardwareEmitter),
}

/// Resolve a target name to a fresh interface
pub fn select_interface(name: &str, options: &CodegenOptions) -> Result<Interface> {
    let interface = match name {
        "symbolic" => Interface::Symbolic(SymbolicEmitter::new()),
        "bytecode" => Interface::Bytecode(BytecodeEmitter::new()),
        "null" => Interface::Null(NullEmitter::new()),
        "mos6502" => Interface::Hardware(HardwareEmitter::new(HardwareConfig::from(options))),
        _ => {
            return Err(CompilerError::UnknownTarget {
                name: name.to_string(),
                valid: TARGETS.iter().map(|t| t.to_string()).collect(),
            })
        }
    };
    debug!("selected interface '{}'", name);
    Ok(interface)
}

impl Interface {
    pub fn name(&self) -> &'static str {
        match self {
            Interface::Symbolic(_) => "symbolic",
            Interface::Bytecode(_) => "bytecode",
            Interface::Null(_) => "null",
            Interface::Hardware(_) => "mos6502",
        }
    }

    /// Only real hardware pages banks; everywhere else banked functions
    /// are laid out in the common area and called directly
    pub fn supports_banking(&self) -> bool {
        matches!(self, Interface::Hardware(_))
    }

    fn unit(&mut self) -> &mut unit::CodeUnit {
        match self {
            Interface::Symbolic(e) => &mut e.unit,
            Interface::Bytecode(e) => &mut e.unit,
            Interface::Null(e) => &mut e.unit,
            Interface::Hardware(e) => &mut e.unit,
        }
    }

    pub fn emit_prologue(&mut self, info: &FunctionInfo, prologue: &[AsmInst]) -> Result<()> {
        self.unit().begin_function(info, prologue)
    }

    pub fn emit_instruction(&mut self, inst: &AsmInst) -> Result<()> {
        self.unit().push(inst)
    }

    pub fn emit_epilogue(&mut self, epilogue: &[AsmInst]) -> Result<()> {
        self.unit().end_function(epilogue)
    }

    pub fn emit_data(&mut self, object: &DataObject) {
        self.unit().add_data(object);
    }

    /// Declare an external symbol; one without a fixed address must be
    /// supplied by the linker
    pub fn emit_external(&mut self, name: &str, address: Option<u16>) {
        if let Some(address) = address {
            self.unit().add_external(name, address);
        }
    }

    pub fn finalize(self) -> Result<CompiledOutput> {
        match self {
            Interface::Symbolic(e) => e.finalize(),
            Interface::Bytecode(e) => e.finalize(),
            Interface::Null(e) => e.finalize(),
            Interface::Hardware(e) => e.finalize(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use m65_codegen::Opcode;
    use pretty_assertions::assert_eq;

    fn emit_main(interface: &mut Interface) {
        let info = FunctionInfo {
            externally_visible: true,
            ..FunctionInfo::routine("main")
        };
        interface.emit_prologue(&info, &[AsmInst::label("main")]).unwrap();
        interface.emit_instruction(&AsmInst::jsr("CIOV")).unwrap();
        interface.emit_epilogue(&[AsmInst::implied(Opcode::Rts)]).unwrap();
    }

    #[test]
    fn test_unknown_target_lists_valid_names() {
        let err = select_interface("z80", &CodegenOptions::default()).unwrap_err();
        assert_eq!(
            err,
            CompilerError::UnknownTarget {
                name: "z80".to_string(),
                valid: TARGETS.iter().map(|t| t.to_string()).collect(),
            }
        );
        assert!(err.to_string().contains("symbolic, bytecode, null, mos6502"));
    }

    #[test]
    fn test_every_target_resolves() {
        for name in TARGETS {
            let interface = select_interface(name, &CodegenOptions::default()).unwrap();
            assert_eq!(interface.name(), name);
            assert_eq!(interface.supports_banking(), name == "mos6502");
        }
    }

    #[test]
    fn test_all_interfaces_agree_on_relocations() {
        let mut seen = Vec::new();
        for name in TARGETS {
            let mut interface = select_interface(name, &CodegenOptions::default()).unwrap();
            interface.emit_external("CIOV", Some(0xE456));
            emit_main(&mut interface);
            let output = interface.finalize().unwrap();
            assert_eq!(output.target, name);
            assert_eq!(output.statistics.instructions, 2);
            seen.push(output.relocations);
        }
        assert!(seen.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn test_unresolved_external_fails_finalize() {
        let mut interface = select_interface("null", &CodegenOptions::default()).unwrap();
        interface.emit_external("CIOV", None);
        emit_main(&mut interface);
        assert_eq!(
            interface.finalize().unwrap_err(),
            CompilerError::UnresolvedSymbol {
                symbol: "CIOV".to_string(),
                referenced_from: "main".to_string(),
            }
        );
    }
}
