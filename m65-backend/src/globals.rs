//! Data objects handed to the emitters
//!
//! Module globals and the static save areas of non-recursive interrupt
//! handlers. A `Common` object lives in the RAM data area; an object in a
//! paged bank is ROM data reachable only while that bank is selected.

use log::{debug, trace};
use m65_common::{BankId, CompilerError, Result};
use m65_ir::GlobalVariable;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::naming;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataObject {
    pub name: String,
    pub bytes: Vec<u8>,
    pub bank: BankId,
}

impl DataObject {
    pub fn from_global(global: &GlobalVariable) -> Self {
        Self {
            name: global.name.clone(),
            bytes: global.bytes(),
            bank: global.bank,
        }
    }

    /// Zeroed RAM area where a non-recursive handler parks what it clobbers
    pub fn save_area(function: &str, size: u16) -> Self {
        Self {
            name: naming::isr_save_area(function),
            bytes: vec![0; size as usize],
            bank: BankId::Common,
        }
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }
}

/// Collects the data objects of one compilation, in definition order
#[derive(Debug, Default)]
pub struct GlobalManager {
    objects: Vec<DataObject>,
    names: BTreeSet<String>,
}

impl GlobalManager {
    pub fn new() -> Self {
        Self::default()
    }

    fn add(&mut self, object: DataObject) -> Result<()> {
        if !self.names.insert(object.name.clone()) {
            return Err(CompilerError::invalid_ir(
                &object.name,
                "data object defined more than once",
            ));
        }
        trace!("data {} ({} bytes, bank {})", object.name, object.size(), object.bank);
        self.objects.push(object);
        Ok(())
    }

    pub fn add_global(&mut self, global: &GlobalVariable) -> Result<()> {
        if let Some(init) = &global.init {
            if init.len() > global.size as usize {
                return Err(CompilerError::invalid_ir(
                    &global.name,
                    format!("{} initial bytes for a {}-byte object", init.len(), global.size),
                ));
            }
        }
        if naming::is_runtime_symbol(&global.name) {
            return Err(CompilerError::invalid_ir(
                &global.name,
                "names starting with '__' are reserved for the runtime",
            ));
        }
        self.add(DataObject::from_global(global))
    }

    pub fn add_save_area(&mut self, function: &str, size: u16) -> Result<()> {
        if size == 0 {
            return Ok(());
        }
        debug!("interrupt save area for {}: {} bytes", function, size);
        self.add(DataObject::save_area(function, size))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn objects(&self) -> &[DataObject] {
        &self.objects
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_global_is_zero_padded() {
        let mut manager = GlobalManager::new();
        manager
            .add_global(&GlobalVariable::new("table", 4).with_init(vec![1, 2]))
            .unwrap();
        assert_eq!(manager.objects()[0].bytes, vec![1, 2, 0, 0]);
        assert!(manager.contains("table"));
    }

    #[test]
    fn test_duplicate_and_oversized_globals_are_rejected() {
        let mut manager = GlobalManager::new();
        manager.add_global(&GlobalVariable::new("g", 1)).unwrap();
        assert!(matches!(
            manager.add_global(&GlobalVariable::new("g", 2)),
            Err(CompilerError::InvalidIr { .. })
        ));
        let err = manager
            .add_global(&GlobalVariable::new("h", 1).with_init(vec![1, 2]))
            .unwrap_err();
        assert!(err.to_string().contains("'h'"));
    }

    #[test]
    fn test_save_area_name_and_skip_when_empty() {
        let mut manager = GlobalManager::new();
        manager.add_save_area("vbi", 0).unwrap();
        assert!(manager.objects().is_empty());
        manager.add_save_area("vbi", 3).unwrap();
        assert_eq!(manager.objects()[0].name, "__isr_save_vbi");
        assert_eq!(manager.objects()[0].size(), 3);
    }

    #[test]
    fn test_banked_global_keeps_its_bank() {
        let object = DataObject::from_global(&GlobalVariable::new("font", 8).in_bank(BankId::Bank(2)));
        assert_eq!(object.bank, BankId::Bank(2));
    }
}
