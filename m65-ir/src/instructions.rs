//! IR Nodes
//!
//! Nodes are immutable once built and owned by the function body they
//! belong to. Control flow is expressed with `Label`, `Jump` and `Branch`
//! inside a flat node list.

use m65_common::platform::BitField;
use m65_common::{LabelId, TempId};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::function::DeclaredClobbers;
use crate::{IrType, MemRef, TypedValue, Value};

/// Binary operations in IR
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IrBinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    And,
    Or,
    Xor,
    Shl,
    /// Arithmetic for signed types, logical otherwise
    Shr,
}

impl IrBinaryOp {
    pub fn is_commutative(&self) -> bool {
        matches!(
            self,
            IrBinaryOp::Add | IrBinaryOp::Mul | IrBinaryOp::And | IrBinaryOp::Or | IrBinaryOp::Xor
        )
    }
}

impl fmt::Display for IrBinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op_str = match self {
            IrBinaryOp::Add => "add",
            IrBinaryOp::Sub => "sub",
            IrBinaryOp::Mul => "mul",
            IrBinaryOp::Div => "div",
            IrBinaryOp::Mod => "mod",
            IrBinaryOp::And => "and",
            IrBinaryOp::Or => "or",
            IrBinaryOp::Xor => "xor",
            IrBinaryOp::Shl => "shl",
            IrBinaryOp::Shr => "shr",
        };
        write!(f, "{op_str}")
    }
}

/// Comparison used by conditional branches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IrCompareOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl IrCompareOp {
    /// The comparison with its operands exchanged (`a < b` is `b > a`)
    pub fn swapped(&self) -> IrCompareOp {
        match self {
            IrCompareOp::Eq => IrCompareOp::Eq,
            IrCompareOp::Ne => IrCompareOp::Ne,
            IrCompareOp::Lt => IrCompareOp::Gt,
            IrCompareOp::Le => IrCompareOp::Ge,
            IrCompareOp::Gt => IrCompareOp::Lt,
            IrCompareOp::Ge => IrCompareOp::Le,
        }
    }
}

impl fmt::Display for IrCompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op_str = match self {
            IrCompareOp::Eq => "eq",
            IrCompareOp::Ne => "ne",
            IrCompareOp::Lt => "lt",
            IrCompareOp::Le => "le",
            IrCompareOp::Gt => "gt",
            IrCompareOp::Ge => "ge",
        };
        write!(f, "{op_str}")
    }
}

/// IR node
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IrNode {
    /// result = value
    Copy {
        result: TempId,
        value: Value,
        ty: IrType,
    },

    /// result = lhs op rhs
    Binary {
        result: TempId,
        op: IrBinaryOp,
        lhs: Value,
        rhs: Value,
        ty: IrType,
    },

    /// *dest = value
    Store {
        value: Value,
        dest: MemRef,
        ty: IrType,
    },

    /// Call a function by name; `sret` names the caller's buffer for a
    /// struct-returning callee
    Call {
        result: Option<TempId>,
        callee: String,
        args: Vec<TypedValue>,
        ty: IrType,
        sret: Option<MemRef>,
    },

    /// Call a fixed ROM routine with register arguments (e.g. CIOV)
    AsmCall {
        address: u16,
        a: Option<Value>,
        x: Option<Value>,
        y: Option<Value>,
        clobbers: DeclaredClobbers,
        /// Receives A after the call
        result: Option<TempId>,
    },

    /// Two-way conditional branch
    Branch {
        op: IrCompareOp,
        lhs: Value,
        rhs: Value,
        ty: IrType,
        true_label: LabelId,
        false_label: LabelId,
    },

    Jump(LabelId),

    Label(LabelId),

    Return(Option<Value>),

    /// result = setjmp(buffer)
    SetJmp { result: TempId, buffer: MemRef },

    /// longjmp(buffer, value)
    LongJmp { buffer: MemRef, value: Value },

    /// cursor = first variadic argument
    VaStart { cursor: TempId },

    /// result = next variadic argument; advances cursor
    VaArg {
        result: TempId,
        cursor: TempId,
        ty: IrType,
    },

    /// result = number of variadic bytes passed
    VaCount { result: TempId },

    /// result = bit-field of the byte at src
    LoadField {
        result: TempId,
        src: MemRef,
        field: BitField,
    },

    /// Write value into a bit-field of the byte at dest
    StoreField {
        value: Value,
        dest: MemRef,
        field: BitField,
    },
}

impl IrNode {
    /// Temporary defined by this node, if any
    pub fn result(&self) -> Option<TempId> {
        match self {
            IrNode::Copy { result, .. }
            | IrNode::Binary { result, .. }
            | IrNode::SetJmp { result, .. }
            | IrNode::VaArg { result, .. }
            | IrNode::VaCount { result }
            | IrNode::LoadField { result, .. } => Some(*result),
            IrNode::VaStart { cursor } => Some(*cursor),
            IrNode::Call { result, .. } | IrNode::AsmCall { result, .. } => *result,
            _ => None,
        }
    }

    pub fn is_terminator(&self) -> bool {
        matches!(
            self,
            IrNode::Jump(_) | IrNode::Branch { .. } | IrNode::Return(_) | IrNode::LongJmp { .. }
        )
    }

    /// Short name used when reporting a node that has no pattern
    pub fn describe(&self) -> String {
        match self {
            IrNode::Copy { ty, .. } => format!("copy ({ty})"),
            IrNode::Binary { op, ty, .. } => format!("binary {op} ({ty})"),
            IrNode::Store { ty, .. } => format!("store ({ty})"),
            IrNode::Call { callee, .. } => format!("call @{callee}"),
            IrNode::AsmCall { address, .. } => format!("asm call ${address:04X}"),
            IrNode::Branch { op, ty, .. } => format!("branch {op} ({ty})"),
            IrNode::Jump(_) => "jump".to_string(),
            IrNode::Label(_) => "label".to_string(),
            IrNode::Return(_) => "return".to_string(),
            IrNode::SetJmp { .. } => "setjmp".to_string(),
            IrNode::LongJmp { .. } => "longjmp".to_string(),
            IrNode::VaStart { .. } => "va_start".to_string(),
            IrNode::VaArg { ty, .. } => format!("va_arg ({ty})"),
            IrNode::VaCount { .. } => "va_count".to_string(),
            IrNode::LoadField { .. } => "load bit-field".to_string(),
            IrNode::StoreField { .. } => "store bit-field".to_string(),
        }
    }
}

impl fmt::Display for IrNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IrNode::Copy { result, value, ty } => write!(f, "%{result} = {ty} {value}"),
            IrNode::Binary { result, op, lhs, rhs, ty } => {
                write!(f, "%{result} = {op} {ty} {lhs}, {rhs}")
            }
            IrNode::Store { value, dest, ty } => write!(f, "store {ty} {value}, {dest}"),
            IrNode::Call { result, callee, args, ty, sret } => {
                if let Some(r) = result {
                    write!(f, "%{r} = ")?;
                }
                write!(f, "call {ty} @{callee}(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{} {}", arg.ty, arg.value)?;
                }
                write!(f, ")")?;
                if let Some(s) = sret {
                    write!(f, " sret {s}")?;
                }
                Ok(())
            }
            IrNode::AsmCall { address, a, x, y, result, .. } => {
                if let Some(r) = result {
                    write!(f, "%{r} = ")?;
                }
                write!(f, "asmcall ${address:04X}")?;
                for (name, reg) in [("a", a), ("x", x), ("y", y)] {
                    if let Some(v) = reg {
                        write!(f, " {name}={v}")?;
                    }
                }
                Ok(())
            }
            IrNode::Branch { op, lhs, rhs, ty, true_label, false_label } => {
                write!(f, "br {op} {ty} {lhs}, {rhs}, L{true_label}, L{false_label}")
            }
            IrNode::Jump(label) => write!(f, "jmp L{label}"),
            IrNode::Label(label) => write!(f, "L{label}:"),
            IrNode::Return(Some(v)) => write!(f, "ret {v}"),
            IrNode::Return(None) => write!(f, "ret void"),
            IrNode::SetJmp { result, buffer } => write!(f, "%{result} = setjmp {buffer}"),
            IrNode::LongJmp { buffer, value } => write!(f, "longjmp {buffer}, {value}"),
            IrNode::VaStart { cursor } => write!(f, "%{cursor} = va_start"),
            IrNode::VaArg { result, cursor, ty } => write!(f, "%{result} = va_arg {ty} %{cursor}"),
            IrNode::VaCount { result } => write!(f, "%{result} = va_count"),
            IrNode::LoadField { result, src, field } => write!(
                f,
                "%{result} = ldfield {src} bits {}..{}",
                field.bit_offset,
                field.bit_offset + field.width
            ),
            IrNode::StoreField { value, dest, field } => write!(
                f,
                "stfield {value}, {dest} bits {}..{}",
                field.bit_offset,
                field.bit_offset + field.width
            ),
        }
    }
}
