//! Error handling for the M65 code generator
//!
//! Every fatal condition in the core is a `CompilerError`. The messages always
//! name the offending function, symbol or target so the driver can report
//! them without extra context. Register pressure is deliberately absent: the
//! allocator recovers from it locally by spilling.

use thiserror::Error;

/// Result alias used across the workspace
pub type Result<T> = std::result::Result<T, CompilerError>;

/// Main compiler error type that encompasses all phases of code generation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CompilerError {
    #[error("Unknown target '{name}' (valid targets: {})", valid.join(", "))]
    UnknownTarget {
        name: String,
        valid: Vec<String>,
    },

    #[error("Unsupported operation in '{function}': no pattern for {node} on target '{target}'")]
    UnsupportedOperation {
        function: String,
        node: String,
        target: String,
    },

    #[error("Bank overflow: function '{function}' does not fit in bank {bank} ({size} bytes used, capacity {capacity})")]
    BankOverflow {
        function: String,
        bank: String,
        size: usize,
        capacity: usize,
    },

    #[error("Invalid ABI combination for '{function}': {reason}")]
    InvalidAbiCombination {
        function: String,
        reason: String,
    },

    #[error("Unresolved symbol '{symbol}' (referenced from '{referenced_from}')")]
    UnresolvedSymbol {
        symbol: String,
        referenced_from: String,
    },

    #[error("Direct call from '{caller}' to '{callee}' crosses a bank boundary; it must go through a trampoline")]
    DirectCrossBankCall {
        caller: String,
        callee: String,
    },

    #[error("'{function}' references {target} in another bank")]
    CrossBankReference {
        function: String,
        target: String,
    },

    #[error("Constant {value} out of range for {ty} in '{function}'")]
    ConstantOutOfRange {
        function: String,
        value: i64,
        ty: String,
    },

    #[error("Invalid emission order for '{function}': cannot {action} in state {state}")]
    InvalidEmissionState {
        function: String,
        state: String,
        action: String,
    },

    #[error("Invalid IR in '{function}': {message}")]
    InvalidIr {
        function: String,
        message: String,
    },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Internal compiler error: {message}")]
    Internal { message: String },
}

impl CompilerError {
    /// Create an unsupported-operation error
    pub fn unsupported(function: &str, node: impl Into<String>, target: &str) -> Self {
        CompilerError::UnsupportedOperation {
            function: function.to_string(),
            node: node.into(),
            target: target.to_string(),
        }
    }

    /// Create an invalid-ABI error
    pub fn invalid_abi(function: &str, reason: impl Into<String>) -> Self {
        CompilerError::InvalidAbiCombination {
            function: function.to_string(),
            reason: reason.into(),
        }
    }

    /// Create an invalid-IR error
    pub fn invalid_ir(function: &str, message: impl Into<String>) -> Self {
        CompilerError::InvalidIr {
            function: function.to_string(),
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        CompilerError::Internal {
            message: message.into(),
        }
    }
}

/// Convert from String (for simple internal error cases)
impl From<String> for CompilerError {
    fn from(message: String) -> Self {
        CompilerError::Internal { message }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_unknown_target_lists_valid_names() {
        let err = CompilerError::UnknownTarget {
            name: "z80".to_string(),
            valid: vec!["symbolic".to_string(), "null".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "Unknown target 'z80' (valid targets: symbolic, null)"
        );
    }

    #[test]
    fn test_unsupported_names_node_and_target() {
        let err = CompilerError::unsupported("main", "binary mul (u8)", "mos6502");
        let msg = err.to_string();
        assert!(msg.contains("main"));
        assert!(msg.contains("binary mul"));
        assert!(msg.contains("mos6502"));
    }

    #[test]
    fn test_bank_overflow_message() {
        let err = CompilerError::BankOverflow {
            function: "big".to_string(),
            bank: "2".to_string(),
            size: 9000,
            capacity: 8192,
        };
        assert!(err.to_string().contains("'big'"));
        assert!(err.to_string().contains("bank 2"));
    }
}
