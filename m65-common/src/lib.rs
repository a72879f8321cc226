//! M65 6502 Compiler - Common Types and Utilities
//! 
//! This crate contains shared identifiers, target configuration constants,
//! the platform's memory-mapped record layouts and the error taxonomy used
//! across every phase of the M65 code generator.

pub mod error;
pub mod platform;
pub mod types;

pub use error::{CompilerError, Result};
pub use types::*;
