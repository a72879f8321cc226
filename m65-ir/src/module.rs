//! Module and Global Variables

use m65_common::BankId;
use serde::{Deserialize, Serialize};

use crate::Function;

/// Global data object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalVariable {
    pub name: String,
    pub size: u16,
    /// Initial bytes; shorter than `size` means zero filled
    #[serde(default)]
    pub init: Option<Vec<u8>>,
    /// `Common` places the object in RAM; a paged bank makes it ROM data
    #[serde(default)]
    pub bank: BankId,
}

impl GlobalVariable {
    pub fn new(name: &str, size: u16) -> Self {
        Self {
            name: name.to_string(),
            size,
            init: None,
            bank: BankId::Common,
        }
    }

    pub fn with_init(mut self, bytes: Vec<u8>) -> Self {
        self.init = Some(bytes);
        self
    }

    pub fn in_bank(mut self, bank: BankId) -> Self {
        self.bank = bank;
        self
    }

    /// Initial contents padded to the object size
    pub fn bytes(&self) -> Vec<u8> {
        let mut bytes = self.init.clone().unwrap_or_default();
        bytes.resize(self.size as usize, 0);
        bytes
    }
}

/// IR Module - a complete compilation unit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Module {
    pub name: String,
    pub functions: Vec<Function>,
    #[serde(default)]
    pub globals: Vec<GlobalVariable>,
}

impl Module {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            functions: Vec::new(),
            globals: Vec::new(),
        }
    }

    pub fn add_function(&mut self, function: Function) {
        self.functions.push(function);
    }

    pub fn add_global(&mut self, global: GlobalVariable) {
        self.globals.push(global);
    }

    pub fn get_function(&self, name: &str) -> Option<&Function> {
        self.functions.iter().find(|f| f.name() == name)
    }

    pub fn get_global(&self, name: &str) -> Option<&GlobalVariable> {
        self.globals.iter().find(|g| g.name == name)
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
