//! Calling convention / ABI engine
//!
//! `AbiEngine::bind` turns a function signature into an immutable
//! `FunctionAbi`: where each parameter lives in the zero-page argument area,
//! how the result comes back, which bank the code is placed in and how the
//! hardware enters it. Every other pass reads the bound shape and never the
//! raw signature.
//!
//! The engine also answers the per call-site question (direct `JSR` or bank
//! trampoline) and builds function entry/exit sequences, including the
//! interrupt save/restore code.

mod clobber;
mod frame;
mod interrupt;

#[cfg(test)]
mod tests;

pub use clobber::{CallGraph, ClobberAnalysis};
pub use frame::EntryShape;
pub use interrupt::SavePlan;

use log::{debug, trace};
use m65_codegen::{AsmInst, ClobberSet, Opcode, Reg, ReturnKind, ZeroPageLayout};
use m65_common::{BankId, CompilerError, InterruptKind, Result};
use m65_ir::{DeclaredClobbers, Function, FunctionSignature, IrType, TypedValue};

/// A parameter's place in the argument area
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamSlot {
    /// Offset from the first argument slot
    pub slot: u8,
    pub size: u8,
    pub ty: IrType,
}

/// Bound calling shape of one function
///
/// Created only by `AbiEngine::bind*`; there are no setters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionAbi {
    name: String,
    interrupt: InterruptKind,
    bank: BankId,
    placement: BankId,
    variadic: bool,
    params: Vec<ParamSlot>,
    ret: ReturnKind,
    return_type: IrType,
    externally_visible: bool,
    declared_clobbers: Option<ClobberSet>,
    sret_slot: Option<u8>,
    va_count_slot: Option<u8>,
    va_ptr_slot: Option<u8>,
    is_external: bool,
    address: Option<u16>,
}

impl FunctionAbi {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn interrupt(&self) -> InterruptKind {
        self.interrupt
    }

    pub fn is_interrupt(&self) -> bool {
        self.interrupt.is_interrupt()
    }

    /// Bank named in the signature
    pub fn bank(&self) -> BankId {
        self.bank
    }

    /// Bank the code is actually placed in; always `Common` on targets
    /// without bank switching
    pub fn placement(&self) -> BankId {
        self.placement
    }

    pub fn is_variadic(&self) -> bool {
        self.variadic
    }

    pub fn params(&self) -> &[ParamSlot] {
        &self.params
    }

    pub fn return_kind(&self) -> ReturnKind {
        self.ret
    }

    pub fn return_type(&self) -> IrType {
        self.return_type
    }

    pub fn is_externally_visible(&self) -> bool {
        self.externally_visible
    }

    /// Clobbers declared for code the compiler cannot analyse
    pub fn declared_clobbers(&self) -> Option<&ClobberSet> {
        self.declared_clobbers.as_ref()
    }

    /// Slot of the hidden structure-return pointer
    pub fn sret_slot(&self) -> Option<u8> {
        self.sret_slot
    }

    /// Slot of the variadic byte count
    pub fn va_count_slot(&self) -> Option<u8> {
        self.va_count_slot
    }

    /// First of the two slots holding the variadic block pointer
    pub fn va_ptr_slot(&self) -> Option<u8> {
        self.va_ptr_slot
    }

    pub fn is_external(&self) -> bool {
        self.is_external
    }

    /// Fixed entry point of an external routine
    pub fn address(&self) -> Option<u16> {
        self.address
    }

    /// Bytes of the argument area this function uses
    pub fn arg_bytes(&self) -> u8 {
        let params: u8 = self.params.iter().map(|p| p.size).sum();
        let sret = if self.sret_slot.is_some() { 2 } else { 0 };
        let va = if self.variadic { 3 } else { 0 };
        params + sret + va
    }
}

/// How a call reaches its callee
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    /// Plain `JSR callee`
    Direct,
    /// `JSR __bank_tramp_N` with the callee address in A/X
    Trampoline { bank: u8 },
}

/// A classified call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallSite {
    pub caller_bank: BankId,
    pub kind: CallKind,
}

/// The calling-convention engine for one compilation
#[derive(Debug, Clone)]
pub struct AbiEngine {
    layout: ZeroPageLayout,
    banking: bool,
    target: String,
    bank_select: u16,
}

impl AbiEngine {
    pub fn new(layout: ZeroPageLayout, banking: bool, target: &str, bank_select: u16) -> Self {
        Self {
            layout,
            banking,
            target: target.to_string(),
            bank_select,
        }
    }

    pub fn layout(&self) -> &ZeroPageLayout {
        &self.layout
    }

    /// Whether the target switches banks (only the hardware target does)
    pub fn supports_banking(&self) -> bool {
        self.banking
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn bank_select(&self) -> u16 {
        self.bank_select
    }

    /// Bind a function from the module
    pub fn bind(&self, function: &Function) -> Result<FunctionAbi> {
        let mut abi = self.bind_signature(&function.signature)?;
        abi.is_external = function.is_external;
        abi.address = function.address;
        if !function.is_external && function.params.len() != function.signature.params.len() {
            return Err(CompilerError::invalid_ir(
                function.name(),
                format!(
                    "{} parameter temporaries for {} declared parameters",
                    function.params.len(),
                    function.signature.params.len()
                ),
            ));
        }
        Ok(abi)
    }

    /// Bind a signature
    pub fn bind_signature(&self, sig: &FunctionSignature) -> Result<FunctionAbi> {
        let name = sig.name.as_str();

        if sig.interrupt.is_interrupt() {
            if sig.variadic {
                let reason = match sig.interrupt {
                    InterruptKind::Recursive => "a recursive interrupt handler cannot be variadic",
                    _ => "an interrupt handler cannot be variadic",
                };
                return Err(CompilerError::invalid_abi(name, reason));
            }
            if !sig.params.is_empty() {
                return Err(CompilerError::invalid_abi(
                    name,
                    "an interrupt handler cannot take parameters",
                ));
            }
            if !sig.return_type.is_void() {
                return Err(CompilerError::invalid_abi(
                    name,
                    "an interrupt handler must return void",
                ));
            }
            if !sig.bank.is_common() {
                return Err(CompilerError::invalid_abi(
                    name,
                    format!("interrupt handler placed in bank {}; handlers must live in the common area", sig.bank),
                ));
            }
        }

        let ret = match sig.return_type {
            IrType::Void => ReturnKind::Void,
            IrType::U8 | IrType::I8 => ReturnKind::Byte,
            IrType::U16 | IrType::I16 | IrType::Ptr => ReturnKind::Word,
            IrType::Struct { size } => ReturnKind::Struct { size },
            other => {
                return Err(CompilerError::unsupported(
                    name,
                    format!("return of type {}", other),
                    &self.target,
                ))
            }
        };

        // Offsets stay wide until the whole area is known to fit
        let mut next = 0usize;
        let sret_slot = if matches!(ret, ReturnKind::Struct { .. }) {
            next += 2;
            Some(0)
        } else {
            None
        };

        let mut offsets = Vec::with_capacity(sig.params.len());
        for ty in &sig.params {
            if !ty.is_supported_scalar() {
                return Err(CompilerError::unsupported(
                    name,
                    format!("parameter of type {}", ty),
                    &self.target,
                ));
            }
            let size = ty.size_in_bytes() as usize;
            offsets.push((next, size, *ty));
            next += size;
        }

        let va_base = next;
        if sig.variadic {
            next += 3;
        }

        if next > self.layout.arg_slots as usize {
            return Err(CompilerError::invalid_abi(
                name,
                format!(
                    "arguments need {} bytes but the argument area holds {}",
                    next, self.layout.arg_slots
                ),
            ));
        }
        let narrow = |offset: usize| {
            u8::try_from(offset).map_err(|_| CompilerError::internal(format!("argument offset {} out of range", offset)))
        };

        let params = offsets
            .into_iter()
            .map(|(slot, size, ty)| {
                Ok(ParamSlot {
                    slot: narrow(slot)?,
                    size: narrow(size)?,
                    ty,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let (va_count_slot, va_ptr_slot) = if sig.variadic {
            (Some(narrow(va_base)?), Some(narrow(va_base + 1)?))
        } else {
            (None, None)
        };

        let placement = if self.banking { sig.bank } else { BankId::Common };
        let abi = FunctionAbi {
            name: sig.name.clone(),
            interrupt: sig.interrupt,
            bank: sig.bank,
            placement,
            variadic: sig.variadic,
            params,
            ret,
            return_type: sig.return_type,
            externally_visible: sig.externally_visible,
            declared_clobbers: sig.clobbers.as_ref().map(clobbers_of),
            sret_slot,
            va_count_slot,
            va_ptr_slot,
            is_external: false,
            address: None,
        };
        debug!(
            "bound {}: {} params, returns {}, {} in bank {}",
            abi.name,
            abi.params.len(),
            abi.ret,
            abi.interrupt,
            abi.placement
        );
        Ok(abi)
    }

    /// Bind a callee that the module never declares, from the call itself
    ///
    /// The symbol stays undefined; finalization reports it.
    pub fn bind_implied(&self, name: &str, args: &[TypedValue], ret: IrType) -> Result<FunctionAbi> {
        trace!("implying signature for undeclared callee {}", name);
        let sig = FunctionSignature::new(name, args.iter().map(|a| a.ty).collect(), ret).internal();
        let mut abi = self.bind_signature(&sig)?;
        abi.is_external = true;
        Ok(abi)
    }

    /// Classify a call from `caller` to `callee`
    pub fn call_site(&self, caller: &FunctionAbi, callee: &FunctionAbi) -> Result<CallSite> {
        if callee.is_interrupt() {
            return Err(CompilerError::invalid_abi(
                caller.name(),
                format!("cannot call interrupt handler '{}'", callee.name()),
            ));
        }
        let kind = match callee.placement() {
            BankId::Bank(n) if callee.placement() != caller.placement() => CallKind::Trampoline { bank: n },
            _ => CallKind::Direct,
        };
        trace!("call {} -> {}: {:?}", caller.name(), callee.name(), kind);
        Ok(CallSite {
            caller_bank: caller.placement(),
            kind,
        })
    }

    /// Registers and cells an interrupt handler must preserve
    ///
    /// The body's transitive clobber set, plus what the entry sequence
    /// itself uses: A and X to set up a frame, A to copy zero-page cells.
    pub fn interrupt_saves(&self, body: &ClobberSet, frame_bytes: u8) -> ClobberSet {
        let mut saves = body.clone();
        if frame_bytes > 0 {
            saves.insert_reg(Reg::A);
            saves.insert_reg(Reg::X);
        }
        if !saves.zero_page.is_empty() {
            saves.insert_reg(Reg::A);
        }
        saves
    }

    /// Entry sequence: the function label, interrupt saves, frame setup
    pub fn prologue(&self, abi: &FunctionAbi, frame_bytes: u8, saves: &ClobberSet) -> Result<EntryShape> {
        let mut shape = EntryShape::label(abi.name());
        match abi.interrupt() {
            InterruptKind::None => {}
            InterruptKind::NonRecursive => {
                shape.append(SavePlan::static_area(abi.name(), saves).prologue());
            }
            InterruptKind::Recursive => {
                shape.append(SavePlan::stacked(saves).prologue());
            }
        }
        shape.append(frame::allocate(frame_bytes));
        if abi.interrupt() == InterruptKind::Recursive {
            shape.push(AsmInst::implied(Opcode::Cli));
        }
        Ok(shape)
    }

    /// Exit sequence, ending in `RTS` or `RTI`
    pub fn epilogue(&self, abi: &FunctionAbi, frame_bytes: u8, saves: &ClobberSet) -> Result<EntryShape> {
        match abi.interrupt() {
            InterruptKind::None => Ok(frame::release_and_return(frame_bytes, abi.return_kind())),
            InterruptKind::NonRecursive => {
                let mut shape = frame::release(frame_bytes);
                shape.append(SavePlan::static_area(abi.name(), saves).epilogue());
                Ok(shape)
            }
            InterruptKind::Recursive => {
                let mut shape = EntryShape::default();
                shape.push(AsmInst::implied(Opcode::Sei));
                shape.append(frame::release(frame_bytes));
                shape.append(SavePlan::stacked(saves).epilogue());
                Ok(shape)
            }
        }
    }

    /// Size of the static save area a non-recursive handler needs
    pub fn save_area_size(&self, abi: &FunctionAbi, saves: &ClobberSet) -> u16 {
        match abi.interrupt() {
            InterruptKind::NonRecursive => SavePlan::static_area(abi.name(), saves).area_size(),
            _ => 0,
        }
    }
}

/// Clobber set of a declared-clobbers record
pub fn clobbers_of(declared: &DeclaredClobbers) -> ClobberSet {
    let mut set = ClobberSet::new();
    if declared.a {
        set.insert_reg(Reg::A);
    }
    if declared.x {
        set.insert_reg(Reg::X);
    }
    if declared.y {
        set.insert_reg(Reg::Y);
    }
    for cell in &declared.zero_page {
        set.insert_zero_page(*cell);
    }
    set
}
