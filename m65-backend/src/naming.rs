//! Centralized naming for labels and runtime symbols
//!
//! Every label the backend invents is prefixed with the owning function's
//! name, so label names are unique across a compilation unit and can share
//! the assembler namespace with function and data symbols.

use m65_common::LabelId;

/// Shared return path of every bank trampoline
pub const TRAMPOLINE_RETURN: &str = "__tramp_return";

/// Runtime routine capturing a `jmp_buf`
pub const SETJMP: &str = "__setjmp";

/// Runtime routine restoring a `jmp_buf`
pub const LONGJMP: &str = "__longjmp";

/// Entry point of the trampoline into `bank`
pub fn trampoline(bank: u8) -> String {
    format!("__bank_tramp_{}", bank)
}

/// Static register save area of a non-recursive interrupt handler
pub fn isr_save_area(function: &str) -> String {
    format!("__isr_save_{}", function)
}

/// True for names reserved by the runtime
pub fn is_runtime_symbol(name: &str) -> bool {
    name.starts_with("__")
}

/// Label generator for one function
#[derive(Debug)]
pub struct NameGenerator {
    function: String,
    next_label_id: u32,
}

impl NameGenerator {
    pub fn new(function: &str) -> Self {
        Self {
            function: function.to_string(),
            next_label_id: 0,
        }
    }

    /// Label of an IR label
    pub fn ir_label(&self, id: LabelId) -> String {
        format!("{}_L{}", self.function, id)
    }

    /// Label the epilogue starts at
    pub fn exit_label(&self) -> String {
        format!("{}_exit", self.function)
    }

    /// Fresh label for a selector-internal branch
    pub fn local_label(&mut self) -> String {
        let id = self.next_label_id;
        self.next_label_id += 1;
        format!("{}_s{}", self.function, id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_label_names_are_function_scoped() {
        let mut naming = NameGenerator::new("main");
        assert_eq!(naming.ir_label(3), "main_L3");
        assert_eq!(naming.exit_label(), "main_exit");
        assert_eq!(naming.local_label(), "main_s0");
        assert_eq!(naming.local_label(), "main_s1");
    }

    #[test]
    fn test_runtime_names() {
        assert_eq!(trampoline(2), "__bank_tramp_2");
        assert_eq!(isr_save_area("vbi"), "__isr_save_vbi");
        assert!(is_runtime_symbol(TRAMPOLINE_RETURN));
        assert!(!is_runtime_symbol("main"));
    }
}
