//! Intermediate representation consumed by the M65 code generator
//!
//! The front end is an external collaborator: it either builds a `Module`
//! through `IrBuilder` or hands over the JSON form of one.
//!
//! ## Architecture
//!
//! - `types` - scalar and aggregate types
//! - `values` - leaves (`Value`) and memory references (`MemRef`)
//! - `instructions` - IR nodes and operators
//! - `function` - function signatures and bodies
//! - `module` - modules and global data
//! - `builder` - programmatic construction

pub use self::builder::IrBuilder;
pub use self::function::{DeclaredClobbers, Function, FunctionSignature};
pub use self::instructions::{IrBinaryOp, IrCompareOp, IrNode};
pub use self::module::{GlobalVariable, Module};
pub use self::types::IrType;
pub use self::values::{MemRef, TypedValue, Value};

mod builder;
mod function;
mod instructions;
mod module;
mod types;
mod values;

#[cfg(test)]
mod tests;
