//! Function Definitions

use m65_common::{BankId, InterruptKind, TempId};
use serde::{Deserialize, Serialize};

use crate::{IrNode, IrType};

/// Clobber set declared for code the compiler cannot see into
///
/// Used by external assembly routines and by `AsmCall` targets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct DeclaredClobbers {
    pub a: bool,
    pub x: bool,
    pub y: bool,
    /// Zero-page cells written by the routine
    pub zero_page: Vec<u8>,
}

impl DeclaredClobbers {
    /// A, X and Y, the conservative assumption for ROM routines
    pub fn registers() -> Self {
        Self {
            a: true,
            x: true,
            y: true,
            zero_page: Vec::new(),
        }
    }
}

/// Declared shape of a function
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionSignature {
    pub name: String,
    pub params: Vec<IrType>,
    pub return_type: IrType,
    #[serde(default)]
    pub variadic: bool,
    #[serde(default)]
    pub interrupt: InterruptKind,
    #[serde(default)]
    pub bank: BankId,
    #[serde(default = "default_visible")]
    pub externally_visible: bool,
    /// Only meaningful for external routines
    #[serde(default)]
    pub clobbers: Option<DeclaredClobbers>,
}

fn default_visible() -> bool {
    true
}

impl FunctionSignature {
    pub fn new(name: &str, params: Vec<IrType>, return_type: IrType) -> Self {
        Self {
            name: name.to_string(),
            params,
            return_type,
            variadic: false,
            interrupt: InterruptKind::None,
            bank: BankId::Common,
            externally_visible: true,
            clobbers: None,
        }
    }

    pub fn with_bank(mut self, bank: BankId) -> Self {
        self.bank = bank;
        self
    }

    pub fn with_interrupt(mut self, kind: InterruptKind) -> Self {
        self.interrupt = kind;
        self
    }

    pub fn variadic(mut self) -> Self {
        self.variadic = true;
        self
    }

    pub fn internal(mut self) -> Self {
        self.externally_visible = false;
        self
    }

    pub fn with_clobbers(mut self, clobbers: DeclaredClobbers) -> Self {
        self.clobbers = Some(clobbers);
        self
    }
}

/// Function in IR
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Function {
    pub signature: FunctionSignature,
    /// One temporary per declared parameter
    pub params: Vec<TempId>,
    pub body: Vec<IrNode>,
    /// Declared only; code lives elsewhere
    #[serde(default)]
    pub is_external: bool,
    /// Fixed entry point of an external routine
    #[serde(default)]
    pub address: Option<u16>,
}

impl Function {
    pub fn new(signature: FunctionSignature) -> Self {
        Self {
            signature,
            params: Vec::new(),
            body: Vec::new(),
            is_external: false,
            address: None,
        }
    }

    /// Declaration of a routine outside the module
    pub fn external(signature: FunctionSignature, address: Option<u16>) -> Self {
        Self {
            signature,
            params: Vec::new(),
            body: Vec::new(),
            is_external: true,
            address,
        }
    }

    pub fn name(&self) -> &str {
        &self.signature.name
    }

    pub fn add_parameter(&mut self, temp: TempId) {
        self.params.push(temp);
    }

    pub fn push(&mut self, node: IrNode) {
        self.body.push(node);
    }

    /// Names of every function called directly from the body
    pub fn callees(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .body
            .iter()
            .filter_map(|node| match node {
                IrNode::Call { callee, .. } => Some(callee.as_str()),
                _ => None,
            })
            .collect();
        names.sort_unstable();
        names.dedup();
        names
    }
}
