//! End-to-end programs compiled for the hardware target and run on the
//! simulator

mod common;

use common::{build, calls, image, machine, module};
use m65_common::BankId;
use m65_ir::{
    FunctionSignature, GlobalVariable, IrBinaryOp, IrCompareOp, IrType, MemRef, TypedValue, Value,
};
use pretty_assertions::assert_eq;

const ARG0: u16 = 0x80;

/// Stores its argument in a frame byte and returns it plus one; the frame
/// access goes through X
fn leaf_using_frame() -> m65_ir::Function {
    build(FunctionSignature::new("leaf", vec![IrType::U8], IrType::U8), |b, p| {
        let local = MemRef::Local { offset: 0 };
        b.build_store(Value::Temp(p[0]), local.clone(), IrType::U8).unwrap();
        let sum = b
            .build_binary(IrBinaryOp::Add, Value::Memory(local), Value::Constant(1), IrType::U8)
            .unwrap();
        b.build_return(Some(Value::Temp(sum))).unwrap();
    })
}

#[test]
fn test_value_survives_call_to_leaf_clobbering_x() {
    let leaf = leaf_using_frame();
    let main = build(FunctionSignature::new("main", vec![IrType::U8], IrType::U8), |b, p| {
        let t = b
            .build_call("leaf", vec![TypedValue::new(Value::Temp(p[0]), IrType::U8)], IrType::U8)
            .unwrap()
            .unwrap();
        let sum = b
            .build_binary(IrBinaryOp::Add, Value::Temp(t), Value::Temp(p[0]), IrType::U8)
            .unwrap();
        b.build_return(Some(Value::Temp(sum))).unwrap();
    });
    let image = image(&module(vec![leaf, main]));
    let mut m = machine(&image);

    m.poke(ARG0, 5);
    m.call_symbol("main").unwrap();
    assert_eq!(m.registers().a, 11);
    assert_eq!(m.registers().sp, 0xFF);
}

#[test]
fn test_call_across_banks_restores_callers_bank() {
    let b_fn = build(
        FunctionSignature::new("b", vec![], IrType::U8).with_bank(BankId::Bank(2)),
        |b, _| b.build_return(Some(Value::Constant(42))).unwrap(),
    );
    let a_fn = build(
        FunctionSignature::new("a", vec![], IrType::U8).with_bank(BankId::Bank(1)),
        |b, _| {
            let t = b.build_call("b", vec![], IrType::U8).unwrap().unwrap();
            b.build_store(Value::Temp(t), MemRef::global("out"), IrType::U8).unwrap();
            let next = b
                .build_binary(IrBinaryOp::Add, Value::Temp(t), Value::Constant(1), IrType::U8)
                .unwrap();
            b.build_return(Some(Value::Temp(next))).unwrap();
        },
    );
    let main = build(FunctionSignature::new("main", vec![], IrType::U8), |b, _| {
        let t = b.build_call("a", vec![], IrType::U8).unwrap().unwrap();
        b.build_return(Some(Value::Temp(t))).unwrap();
    });
    let mut program = module(vec![b_fn, a_fn, main]);
    program.add_global(GlobalVariable::new("out", 1));
    let image = image(&program);

    // a reaches b only through bank 2's trampoline
    let tramp = image.address("__bank_tramp_2").unwrap();
    assert!(calls(&image.banks[&1].bytes, tramp));
    assert!(!calls(&image.banks[&1].bytes, image.address("b").unwrap()));

    let mut m = machine(&image);
    m.call_symbol("main").unwrap();
    assert_eq!(m.registers().a, 43);
    assert_eq!(m.peek(image.address("out").unwrap()), 42);
    assert_eq!(m.bus.bank_switches(), &[1, 2, 1, 0]);
    assert_eq!(m.bus.selected_bank(), 0);
    assert_eq!(m.registers().sp, 0xFF);
}

#[test]
fn test_longjmp_unwinds_to_setjmp() {
    let thrower = build(FunctionSignature::new("thrower", vec![], IrType::Void), |b, _| {
        b.build_longjmp(MemRef::global("env"), Value::Constant(1)).unwrap();
        b.build_return(None).unwrap();
    });
    let main = build(FunctionSignature::new("main", vec![], IrType::U8), |b, _| {
        let r = b.build_setjmp(MemRef::global("env")).unwrap();
        let resumed = b.new_label();
        let first = b.new_label();
        b.build_branch_cond(IrCompareOp::Ne, Value::Temp(r), Value::Constant(0), IrType::I16, resumed, first)
            .unwrap();
        b.place_label(first).unwrap();
        b.build_call("thrower", vec![], IrType::Void).unwrap();
        b.build_return(Some(Value::Constant(0))).unwrap();
        b.place_label(resumed).unwrap();
        b.build_return(Some(Value::Constant(7))).unwrap();
    });
    let mut program = module(vec![thrower, main]);
    program.add_global(GlobalVariable::new("env", 7));
    let image = image(&program);

    let mut m = machine(&image);
    m.call_symbol("main").unwrap();
    assert_eq!(m.registers().a, 7);
    // main's call into thrower was still on the stack when it jumped
    assert!(m.min_sp() <= 0xFB);
    assert_eq!(m.registers().sp, 0xFF);
}

#[test]
fn test_value_live_only_after_setjmp_survives_longjmp() {
    // keeps two temporaries in zero page before jumping back
    let thrower = build(FunctionSignature::new("thrower", vec![], IrType::Void), |b, _| {
        let first = b
            .build_binary(IrBinaryOp::Add, Value::Memory(MemRef::global("g")), Value::Constant(1), IrType::U8)
            .unwrap();
        let second = b
            .build_binary(IrBinaryOp::Add, Value::Temp(first), Value::Constant(2), IrType::U8)
            .unwrap();
        let third = b
            .build_binary(IrBinaryOp::Add, Value::Temp(first), Value::Temp(second), IrType::U8)
            .unwrap();
        b.build_store(Value::Temp(third), MemRef::global("g"), IrType::U8).unwrap();
        b.build_longjmp(MemRef::global("env"), Value::Constant(1)).unwrap();
        b.build_return(None).unwrap();
    });
    let main = build(FunctionSignature::new("main", vec![IrType::U8], IrType::U8), |b, p| {
        let kept = b
            .build_binary(IrBinaryOp::Add, Value::Temp(p[0]), Value::Constant(1), IrType::U8)
            .unwrap();
        let r = b.build_setjmp(MemRef::global("env")).unwrap();
        let resumed = b.new_label();
        let first = b.new_label();
        b.build_branch_cond(IrCompareOp::Ne, Value::Temp(r), Value::Constant(0), IrType::I16, resumed, first)
            .unwrap();
        b.place_label(first).unwrap();
        b.build_call("thrower", vec![], IrType::Void).unwrap();
        b.build_return(Some(Value::Constant(0))).unwrap();
        b.place_label(resumed).unwrap();
        b.build_return(Some(Value::Temp(kept))).unwrap();
    });
    let mut program = module(vec![thrower, main]);
    program.add_global(GlobalVariable::new("env", 7));
    program.add_global(GlobalVariable::new("g", 1));
    let image = image(&program);

    let mut m = machine(&image);
    m.poke(ARG0, 5);
    m.call_symbol("main").unwrap();
    assert_eq!(m.registers().a, 6);
    assert_eq!(m.peek(image.address("g").unwrap()), 4);
    assert_eq!(m.registers().sp, 0xFF);
}

#[test]
fn test_variadic_arguments_read_through_cursor() {
    let sum = build(
        FunctionSignature::new("sum", vec![IrType::U8], IrType::U8).variadic(),
        |b, p| {
            let cursor = b.build_va_start().unwrap();
            let first = b.build_va_arg(cursor, IrType::U8).unwrap();
            let second = b.build_va_arg(cursor, IrType::U8).unwrap();
            let partial = b
                .build_binary(IrBinaryOp::Add, Value::Temp(p[0]), Value::Temp(first), IrType::U8)
                .unwrap();
            let total = b
                .build_binary(IrBinaryOp::Add, Value::Temp(partial), Value::Temp(second), IrType::U8)
                .unwrap();
            b.build_return(Some(Value::Temp(total))).unwrap();
        },
    );
    let main = build(FunctionSignature::new("main", vec![], IrType::U8), |b, _| {
        let args = vec![
            TypedValue::new(Value::Constant(10), IrType::U8),
            TypedValue::new(Value::Constant(20), IrType::U8),
            TypedValue::new(Value::Constant(30), IrType::U8),
        ];
        let t = b.build_call("sum", args, IrType::U8).unwrap().unwrap();
        b.build_return(Some(Value::Temp(t))).unwrap();
    });
    let image = image(&module(vec![sum, main]));

    let mut m = machine(&image);
    m.call_symbol("main").unwrap();
    assert_eq!(m.registers().a, 60);
    assert_eq!(m.registers().sp, 0xFF);
}

#[test]
fn test_variadic_call_through_trampoline() {
    let count = build(
        FunctionSignature::new("count", vec![IrType::U8], IrType::U8)
            .variadic()
            .with_bank(BankId::Bank(3)),
        |b, _| {
            let n = b.build_va_count().unwrap();
            b.build_return(Some(Value::Temp(n))).unwrap();
        },
    );
    let main = build(FunctionSignature::new("main", vec![], IrType::U8), |b, _| {
        let args = vec![
            TypedValue::new(Value::Constant(1), IrType::U8),
            TypedValue::new(Value::Constant(0x1234), IrType::U16),
            TypedValue::new(Value::Constant(5), IrType::U8),
        ];
        let t = b.build_call("count", args, IrType::U8).unwrap().unwrap();
        b.build_return(Some(Value::Temp(t))).unwrap();
    });
    let image = image(&module(vec![count, main]));

    let mut m = machine(&image);
    m.call_symbol("main").unwrap();
    // block size in bytes
    assert_eq!(m.registers().a, 3);
    assert_eq!(m.registers().sp, 0xFF);
    assert_eq!(m.bus.selected_bank(), 0);
}
