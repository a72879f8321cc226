//! Value Representations

use m65_common::platform::IocbField;
use m65_common::{BankId, TempId};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::IrType;

/// A memory location named by the IR
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemRef {
    /// Fixed address (hardware registers, OS vectors)
    Absolute(u16),
    /// Named global plus byte offset
    Global { name: String, offset: u16 },
    /// Byte of the current stack frame
    Local { offset: u8 },
    /// Through a 16-bit pointer temporary
    Indirect { base: TempId, offset: u8 },
    /// ROM data in a paged bank, relative to the bank window
    Banked { bank: BankId, offset: u16 },
    /// A field of an I/O control block
    Iocb { channel: u8, field: IocbField },
    /// Through the hidden structure-return pointer
    ReturnSlot { offset: u8 },
}

impl MemRef {
    pub fn global(name: &str) -> Self {
        MemRef::Global {
            name: name.to_string(),
            offset: 0,
        }
    }

    /// The same location displaced by `delta` bytes
    pub fn displaced(&self, delta: u16) -> MemRef {
        match self {
            MemRef::Absolute(addr) => MemRef::Absolute(addr.wrapping_add(delta)),
            MemRef::Global { name, offset } => MemRef::Global {
                name: name.clone(),
                offset: offset.wrapping_add(delta),
            },
            MemRef::Local { offset } => MemRef::Local {
                offset: offset.wrapping_add(delta as u8),
            },
            MemRef::Indirect { base, offset } => MemRef::Indirect {
                base: *base,
                offset: offset.wrapping_add(delta as u8),
            },
            MemRef::Banked { bank, offset } => MemRef::Banked {
                bank: *bank,
                offset: offset.wrapping_add(delta),
            },
            MemRef::Iocb { channel, field } => match field.address(*channel) {
                Some(addr) => MemRef::Absolute(addr.wrapping_add(delta)),
                None => self.clone(),
            },
            MemRef::ReturnSlot { offset } => MemRef::ReturnSlot {
                offset: offset.wrapping_add(delta as u8),
            },
        }
    }

    /// Pointer temporary this reference reads, if any
    pub fn base_temp(&self) -> Option<TempId> {
        match self {
            MemRef::Indirect { base, .. } => Some(*base),
            _ => None,
        }
    }
}

impl fmt::Display for MemRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemRef::Absolute(addr) => write!(f, "[${:04X}]", addr),
            MemRef::Global { name, offset: 0 } => write!(f, "[@{}]", name),
            MemRef::Global { name, offset } => write!(f, "[@{}+{}]", name, offset),
            MemRef::Local { offset } => write!(f, "[local+{}]", offset),
            MemRef::Indirect { base, offset } => write!(f, "[%{}+{}]", base, offset),
            MemRef::Banked { bank, offset } => write!(f, "[bank {}:${:04X}]", bank, offset),
            MemRef::Iocb { channel, field } => write!(f, "[iocb{}.{}]", channel, field),
            MemRef::ReturnSlot { offset } => write!(f, "[sret+{}]", offset),
        }
    }
}

/// Leaf of an IR node
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Value {
    Constant(i64),
    Temp(TempId),
    Memory(MemRef),
}

impl Value {
    pub fn as_constant(&self) -> Option<i64> {
        match self {
            Value::Constant(c) => Some(*c),
            _ => None,
        }
    }

    pub fn as_temp(&self) -> Option<TempId> {
        match self {
            Value::Temp(t) => Some(*t),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Constant(c) => write!(f, "{}", c),
            Value::Temp(t) => write!(f, "%{}", t),
            Value::Memory(m) => write!(f, "{}", m),
        }
    }
}

/// A call argument together with its type
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypedValue {
    pub value: Value,
    pub ty: IrType,
}

impl TypedValue {
    pub fn new(value: Value, ty: IrType) -> Self {
        Self { value, ty }
    }
}
