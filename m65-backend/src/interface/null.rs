//! Emits nothing; reports statistics only

use log::info;
use m65_common::Result;

use super::unit::CodeUnit;
use super::{Artifact, CompiledOutput};

#[derive(Debug, Default)]
pub struct NullEmitter {
    pub(super) unit: CodeUnit,
}

impl NullEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub(super) fn finalize(self) -> Result<CompiledOutput> {
        self.unit.close()?;
        let table = self.unit.flat_symbols()?;
        table.check_resolved()?;
        let statistics = self.unit.statistics();
        info!(
            "null target: {} functions, {} instructions, {} bytes, ~{} cycles",
            statistics.functions, statistics.instructions, statistics.code_bytes, statistics.cycles
        );
        Ok(CompiledOutput {
            target: "null".to_string(),
            artifact: Artifact::Nothing,
            relocations: table.relocations(),
            statistics,
        })
    }
}
