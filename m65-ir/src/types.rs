//! IR Type System

use serde::{Deserialize, Serialize};
use std::fmt;

/// IR type of a value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IrType {
    Void,
    U8,
    I8,
    U16,
    I16,
    /// 16-bit data pointer
    Ptr,
    U32,
    I32,
    /// Aggregate, only ever moved through memory
    Struct { size: u16 },
}

impl IrType {
    /// Size of this type in bytes
    pub fn size_in_bytes(&self) -> u16 {
        match self {
            IrType::Void => 0,
            IrType::U8 | IrType::I8 => 1,
            IrType::U16 | IrType::I16 | IrType::Ptr => 2,
            IrType::U32 | IrType::I32 => 4,
            IrType::Struct { size } => *size,
        }
    }

    pub fn is_signed(&self) -> bool {
        matches!(self, IrType::I8 | IrType::I16 | IrType::I32)
    }

    /// Scalar types the 6502 code generator has patterns for
    pub fn is_supported_scalar(&self) -> bool {
        matches!(
            self,
            IrType::U8 | IrType::I8 | IrType::U16 | IrType::I16 | IrType::Ptr
        )
    }

    pub fn is_struct(&self) -> bool {
        matches!(self, IrType::Struct { .. })
    }

    pub fn is_void(&self) -> bool {
        matches!(self, IrType::Void)
    }
}

impl fmt::Display for IrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IrType::Void => write!(f, "void"),
            IrType::U8 => write!(f, "u8"),
            IrType::I8 => write!(f, "i8"),
            IrType::U16 => write!(f, "u16"),
            IrType::I16 => write!(f, "i16"),
            IrType::Ptr => write!(f, "ptr"),
            IrType::U32 => write!(f, "u32"),
            IrType::I32 => write!(f, "i32"),
            IrType::Struct { size } => write!(f, "struct[{}]", size),
        }
    }
}
