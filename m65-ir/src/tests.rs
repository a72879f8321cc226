//! Unit tests for the IR crate

use super::*;
use m65_common::{BankId, InterruptKind};
use pretty_assertions::assert_eq;

#[test]
fn test_ir_values() {
    assert_eq!(Value::Temp(5).to_string(), "%5");
    assert_eq!(Value::Constant(42).to_string(), "42");
    assert_eq!(Value::Memory(MemRef::global("counter")).to_string(), "[@counter]");
    assert_eq!(Value::Memory(MemRef::Absolute(0xD500)).to_string(), "[$D500]");
}

#[test]
fn test_type_sizes() {
    assert_eq!(IrType::U8.size_in_bytes(), 1);
    assert_eq!(IrType::Ptr.size_in_bytes(), 2);
    assert_eq!(IrType::I32.size_in_bytes(), 4);
    assert_eq!(IrType::Struct { size: 6 }.size_in_bytes(), 6);
    assert!(IrType::I16.is_signed());
    assert!(!IrType::I32.is_supported_scalar());
}

#[test]
fn test_memref_displacement() {
    let g = MemRef::Global { name: "buf".to_string(), offset: 2 };
    assert_eq!(g.displaced(1), MemRef::Global { name: "buf".to_string(), offset: 3 });
    assert_eq!(MemRef::Local { offset: 4 }.displaced(1), MemRef::Local { offset: 5 });
}

#[test]
fn test_builder_creates_parameters() {
    let mut builder = IrBuilder::new();
    let params = builder.create_function(FunctionSignature::new(
        "add",
        vec![IrType::U8, IrType::U8],
        IrType::U8,
    ));
    assert_eq!(params, vec![0, 1]);

    let sum = builder
        .build_binary(IrBinaryOp::Add, Value::Temp(0), Value::Temp(1), IrType::U8)
        .unwrap();
    assert_eq!(sum, 2);
    builder.build_return(Some(Value::Temp(sum))).unwrap();

    let function = builder.finish_function().unwrap();
    assert_eq!(function.params, vec![0, 1]);
    assert_eq!(function.body.len(), 2);
    assert!(function.body[1].is_terminator());
}

#[test]
fn test_builder_without_function_fails() {
    let mut builder = IrBuilder::new();
    assert!(builder.build_return(None).is_err());
    assert!(builder.finish_function().is_err());
}

#[test]
fn test_callees_are_sorted_and_unique() {
    let mut builder = IrBuilder::new();
    builder.create_function(FunctionSignature::new("main", vec![], IrType::Void));
    builder.build_call("zeta", vec![], IrType::Void).unwrap();
    builder.build_call("alpha", vec![], IrType::Void).unwrap();
    builder.build_call("zeta", vec![], IrType::Void).unwrap();
    let function = builder.finish_function().unwrap();
    assert_eq!(function.callees(), vec!["alpha", "zeta"]);
}

#[test]
fn test_node_display() {
    let node = IrNode::Binary {
        result: 3,
        op: IrBinaryOp::Sub,
        lhs: Value::Temp(1),
        rhs: Value::Constant(1),
        ty: IrType::U8,
    };
    assert_eq!(node.to_string(), "%3 = sub u8 %1, 1");
    assert_eq!(node.describe(), "binary sub (u8)");
}

#[test]
fn test_module_json_round_trip_keeps_abi_attributes() {
    let mut module = Module::new("demo");
    let sig = FunctionSignature::new("vbi", vec![], IrType::Void)
        .with_interrupt(InterruptKind::Recursive);
    let mut handler = Function::new(sig);
    handler.push(IrNode::Return(None));
    module.add_function(handler);
    module.add_function(Function::new(
        FunctionSignature::new("far", vec![IrType::U8], IrType::U8).with_bank(BankId::Bank(2)),
    ));

    let json = module.to_json().unwrap();
    let back = Module::from_json(&json).unwrap();
    assert_eq!(back, module);
}

#[test]
fn test_signature_defaults_from_json() {
    let sig: FunctionSignature = serde_json::from_str(
        r#"{"name": "f", "params": ["U8"], "return_type": "Void"}"#,
    )
    .unwrap();
    assert_eq!(sig.bank, BankId::Common);
    assert_eq!(sig.interrupt, InterruptKind::None);
    assert!(sig.externally_visible);
    assert!(!sig.variadic);
}

#[test]
fn test_global_bytes_are_padded() {
    let g = GlobalVariable::new("table", 4).with_init(vec![1, 2]);
    assert_eq!(g.bytes(), vec![1, 2, 0, 0]);
}
