use log::{debug, trace};
use m65_codegen::{AsmInst, ClobberSet};
use m65_common::{CompilerError, Result};
use std::fmt;

use crate::abi::{AbiEngine, FunctionAbi};
use crate::interface::{FunctionInfo, Interface};

/// Where a function is in its emission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmissionState {
    Unstarted,
    PrologueEmitted,
    BodyEmitted,
    EpilogueEmitted,
    Finalized,
}

impl fmt::Display for EmissionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EmissionState::Unstarted => "Unstarted",
            EmissionState::PrologueEmitted => "PrologueEmitted",
            EmissionState::BodyEmitted => "BodyEmitted",
            EmissionState::EpilogueEmitted => "EpilogueEmitted",
            EmissionState::Finalized => "Finalized",
        };
        f.write_str(name)
    }
}

/// Emits one function into an interface
///
/// The prologue and epilogue are built from the same frame size and save
/// set, and their stack effects must cancel.
pub struct FunctionBuilder<'a> {
    engine: &'a AbiEngine,
    abi: &'a FunctionAbi,
    interface: &'a mut Interface,
    state: EmissionState,
    frame_bytes: u8,
    saves: ClobberSet,
    prologue_effect: i32,
}

impl<'a> FunctionBuilder<'a> {
    pub fn new(engine: &'a AbiEngine, abi: &'a FunctionAbi, interface: &'a mut Interface) -> Self {
        Self {
            engine,
            abi,
            interface,
            state: EmissionState::Unstarted,
            frame_bytes: 0,
            saves: ClobberSet::new(),
            prologue_effect: 0,
        }
    }

    pub fn state(&self) -> EmissionState {
        self.state
    }

    fn expect(&self, state: EmissionState, action: &str) -> Result<()> {
        if self.state == state {
            return Ok(());
        }
        Err(CompilerError::InvalidEmissionState {
            function: self.abi.name().to_string(),
            state: self.state.to_string(),
            action: action.to_string(),
        })
    }

    fn info(&self) -> FunctionInfo {
        FunctionInfo {
            name: self.abi.name().to_string(),
            declared_bank: self.abi.bank(),
            placement: self.abi.placement(),
            externally_visible: self.abi.is_externally_visible(),
            interrupt: self.abi.interrupt(),
        }
    }

    /// Emit the entry sequence for a frame of `frame_bytes` and the given
    /// interrupt save set
    pub fn begin(&mut self, frame_bytes: u8, saves: &ClobberSet) -> Result<()> {
        self.expect(EmissionState::Unstarted, "emit the prologue")?;
        let shape = self.engine.prologue(self.abi, frame_bytes, saves)?;
        trace!(
            "{}: prologue of {} instructions, stack effect {}",
            self.abi.name(),
            shape.code.len(),
            shape.stack_effect
        );
        self.interface.emit_prologue(&self.info(), &shape.code)?;
        self.frame_bytes = frame_bytes;
        self.saves = saves.clone();
        self.prologue_effect = shape.stack_effect;
        self.state = EmissionState::PrologueEmitted;
        Ok(())
    }

    pub fn body(&mut self, code: &[AsmInst]) -> Result<()> {
        self.expect(EmissionState::PrologueEmitted, "emit the body")?;
        for inst in code {
            self.interface.emit_instruction(inst)?;
        }
        self.state = EmissionState::BodyEmitted;
        Ok(())
    }

    pub fn end(&mut self) -> Result<()> {
        self.expect(EmissionState::BodyEmitted, "emit the epilogue")?;
        let shape = self.engine.epilogue(self.abi, self.frame_bytes, &self.saves)?;
        if self.prologue_effect + shape.stack_effect != 0 {
            return Err(CompilerError::internal(format!(
                "'{}': prologue pushes {} bytes but epilogue releases {}",
                self.abi.name(),
                self.prologue_effect,
                -shape.stack_effect
            )));
        }
        self.interface.emit_epilogue(&shape.code)?;
        self.state = EmissionState::EpilogueEmitted;
        Ok(())
    }

    pub fn finish(mut self) -> Result<()> {
        self.expect(EmissionState::EpilogueEmitted, "finish")?;
        self.state = EmissionState::Finalized;
        debug!("emitted {} (frame {} bytes)", self.abi.name(), self.frame_bytes);
        Ok(())
    }
}
