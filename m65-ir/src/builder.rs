//! IR Builder
//!
//! Provides utilities for constructing IR programmatically.

use m65_common::platform::BitField;
use m65_common::{LabelId, TempId};

use crate::function::DeclaredClobbers;
use crate::{
    Function, FunctionSignature, IrBinaryOp, IrCompareOp, IrNode, IrType, MemRef, TypedValue,
    Value,
};

/// Builder for constructing IR
pub struct IrBuilder {
    current_function: Option<Function>,
    next_temp_id: TempId,
    next_label_id: LabelId,
}

impl Default for IrBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl IrBuilder {
    pub fn new() -> Self {
        Self {
            current_function: None,
            next_temp_id: 0,
            next_label_id: 0,
        }
    }

    pub fn new_temp(&mut self) -> TempId {
        let temp = self.next_temp_id;
        self.next_temp_id += 1;
        temp
    }

    pub fn new_label(&mut self) -> LabelId {
        let label = self.next_label_id;
        self.next_label_id += 1;
        label
    }

    /// Start a function; one parameter temporary is created per declared
    /// parameter and returned in order
    pub fn create_function(&mut self, signature: FunctionSignature) -> Vec<TempId> {
        self.next_temp_id = 0;
        self.next_label_id = 0;
        let param_count = signature.params.len();
        let mut function = Function::new(signature);
        let params: Vec<TempId> = (0..param_count).map(|_| self.new_temp()).collect();
        for &param in &params {
            function.add_parameter(param);
        }
        self.current_function = Some(function);
        params
    }

    /// Finish the current function and hand it over
    pub fn finish_function(&mut self) -> Result<Function, String> {
        self.current_function
            .take()
            .ok_or_else(|| "No current function".to_string())
    }

    pub fn add_node(&mut self, node: IrNode) -> Result<(), String> {
        match self.current_function.as_mut() {
            Some(function) => {
                function.push(node);
                Ok(())
            }
            None => Err("No current function".to_string()),
        }
    }

    pub fn build_copy(&mut self, value: Value, ty: IrType) -> Result<TempId, String> {
        let result = self.new_temp();
        self.add_node(IrNode::Copy { result, value, ty })?;
        Ok(result)
    }

    pub fn build_binary(
        &mut self,
        op: IrBinaryOp,
        lhs: Value,
        rhs: Value,
        ty: IrType,
    ) -> Result<TempId, String> {
        let result = self.new_temp();
        self.add_node(IrNode::Binary { result, op, lhs, rhs, ty })?;
        Ok(result)
    }

    pub fn build_store(&mut self, value: Value, dest: MemRef, ty: IrType) -> Result<(), String> {
        self.add_node(IrNode::Store { value, dest, ty })
    }

    pub fn build_call(
        &mut self,
        callee: &str,
        args: Vec<TypedValue>,
        ty: IrType,
    ) -> Result<Option<TempId>, String> {
        let result = if ty.is_void() || ty.is_struct() {
            None
        } else {
            Some(self.new_temp())
        };
        self.add_node(IrNode::Call {
            result,
            callee: callee.to_string(),
            args,
            ty,
            sret: None,
        })?;
        Ok(result)
    }

    /// Call a struct-returning function, the result landing in `dest`
    pub fn build_call_sret(
        &mut self,
        callee: &str,
        args: Vec<TypedValue>,
        ty: IrType,
        dest: MemRef,
    ) -> Result<(), String> {
        self.add_node(IrNode::Call {
            result: None,
            callee: callee.to_string(),
            args,
            ty,
            sret: Some(dest),
        })
    }

    pub fn build_asm_call(
        &mut self,
        address: u16,
        regs: [Option<Value>; 3],
        clobbers: DeclaredClobbers,
        wants_result: bool,
    ) -> Result<Option<TempId>, String> {
        let result = wants_result.then(|| self.new_temp());
        let [a, x, y] = regs;
        self.add_node(IrNode::AsmCall { address, a, x, y, clobbers, result })?;
        Ok(result)
    }

    pub fn build_branch_cond(
        &mut self,
        op: IrCompareOp,
        lhs: Value,
        rhs: Value,
        ty: IrType,
        true_label: LabelId,
        false_label: LabelId,
    ) -> Result<(), String> {
        self.add_node(IrNode::Branch { op, lhs, rhs, ty, true_label, false_label })
    }

    pub fn build_jump(&mut self, label: LabelId) -> Result<(), String> {
        self.add_node(IrNode::Jump(label))
    }

    pub fn place_label(&mut self, label: LabelId) -> Result<(), String> {
        self.add_node(IrNode::Label(label))
    }

    pub fn build_return(&mut self, value: Option<Value>) -> Result<(), String> {
        self.add_node(IrNode::Return(value))
    }

    pub fn build_setjmp(&mut self, buffer: MemRef) -> Result<TempId, String> {
        let result = self.new_temp();
        self.add_node(IrNode::SetJmp { result, buffer })?;
        Ok(result)
    }

    pub fn build_longjmp(&mut self, buffer: MemRef, value: Value) -> Result<(), String> {
        self.add_node(IrNode::LongJmp { buffer, value })
    }

    pub fn build_va_start(&mut self) -> Result<TempId, String> {
        let cursor = self.new_temp();
        self.add_node(IrNode::VaStart { cursor })?;
        Ok(cursor)
    }

    pub fn build_va_arg(&mut self, cursor: TempId, ty: IrType) -> Result<TempId, String> {
        let result = self.new_temp();
        self.add_node(IrNode::VaArg { result, cursor, ty })?;
        Ok(result)
    }

    pub fn build_va_count(&mut self) -> Result<TempId, String> {
        let result = self.new_temp();
        self.add_node(IrNode::VaCount { result })?;
        Ok(result)
    }

    pub fn build_load_field(&mut self, src: MemRef, field: BitField) -> Result<TempId, String> {
        let result = self.new_temp();
        self.add_node(IrNode::LoadField { result, src, field })?;
        Ok(result)
    }

    pub fn build_store_field(
        &mut self,
        value: Value,
        dest: MemRef,
        field: BitField,
    ) -> Result<(), String> {
        self.add_node(IrNode::StoreField { value, dest, field })
    }
}
