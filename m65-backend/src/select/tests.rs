use super::*;
use crate::abi::AbiEngine;
use m65_codegen::{format_listing, ZeroPageLayout};
use m65_common::platform::BitField;
use m65_common::{BankId, InterruptKind};
use m65_ir::{FunctionSignature, IrBinaryOp, IrBuilder, IrCompareOp, TypedValue};
use pretty_assertions::assert_eq;

fn engine() -> AbiEngine {
    AbiEngine::new(ZeroPageLayout::default(), true, "mos6502", 0xD500)
}

fn select(functions: &[Function], name: &str) -> Result<SelectedFunction> {
    let engine = engine();
    let mut abis = BTreeMap::new();
    for f in functions {
        abis.insert(f.name().to_string(), engine.bind(f)?);
    }
    let limits = TargetLimits::default();
    let selector = InstructionSelector::new(&engine, &abis, &limits);
    let function = functions.iter().find(|f| f.name() == name).unwrap();
    selector.select(function)
}

fn listing(functions: &[Function], name: &str) -> String {
    format_listing(&select(functions, name).unwrap().code)
}

#[test]
fn test_add_constant_reuses_loaded_parameter() {
    let mut b = IrBuilder::new();
    let p = b.create_function(FunctionSignature::new("f", vec![IrType::U8], IrType::U8));
    let sum = b
        .build_binary(IrBinaryOp::Add, Value::Temp(p[0]), Value::Constant(1), IrType::U8)
        .unwrap();
    b.build_return(Some(Value::Temp(sum))).unwrap();
    let f = b.finish_function().unwrap();

    assert_eq!(
        listing(&[f], "f"),
        "    LDA $80\n    STA v0\n    CLC\n    ADC #$01\n    STA v1\nf_exit:\n"
    );
}

#[test]
fn test_increment_of_global_word_is_fused() {
    let mut b = IrBuilder::new();
    b.create_function(FunctionSignature::new("tick", vec![], IrType::Void));
    let g = MemRef::global("g");
    let next = b
        .build_binary(IrBinaryOp::Add, Value::Memory(g.clone()), Value::Constant(1), IrType::U16)
        .unwrap();
    b.build_store(Value::Temp(next), g, IrType::U16).unwrap();
    b.build_return(None).unwrap();
    let f = b.finish_function().unwrap();

    assert_eq!(
        listing(&[f], "tick"),
        "    INC g\n    BNE tick_s0\n    INC g+1\ntick_s0:\ntick_exit:\n"
    );
}

#[test]
fn test_branch_falls_through_to_false_label() {
    let mut b = IrBuilder::new();
    let p = b.create_function(FunctionSignature::new("lt", vec![IrType::U8, IrType::U8], IrType::U8));
    let yes = b.new_label();
    let no = b.new_label();
    b.build_branch_cond(IrCompareOp::Lt, Value::Temp(p[0]), Value::Temp(p[1]), IrType::U8, yes, no)
        .unwrap();
    b.place_label(no).unwrap();
    b.build_return(Some(Value::Constant(0))).unwrap();
    b.place_label(yes).unwrap();
    b.build_return(Some(Value::Constant(1))).unwrap();
    let f = b.finish_function().unwrap();

    assert_eq!(
        listing(&[f], "lt"),
        "    LDA $80\n    STA v0\n    LDA $81\n    STA v1\n    LDA v0\n    CMP v1\n    BCC lt_L0\n\
         lt_L1:\n    LDA #$00\n    JMP lt_exit\nlt_L0:\n    LDA #$01\nlt_exit:\n"
    );
}

#[test]
fn test_signed_ordering_corrects_overflow() {
    let mut b = IrBuilder::new();
    let p = b.create_function(FunctionSignature::new("slt", vec![IrType::I8, IrType::I8], IrType::Void));
    let yes = b.new_label();
    let no = b.new_label();
    b.build_branch_cond(IrCompareOp::Lt, Value::Temp(p[0]), Value::Temp(p[1]), IrType::I8, yes, no)
        .unwrap();
    b.place_label(yes).unwrap();
    b.place_label(no).unwrap();
    b.build_return(None).unwrap();
    let f = b.finish_function().unwrap();

    // The true label follows, so the branch is inverted towards the false one
    let text = listing(&[f], "slt");
    assert!(
        text.contains("    LDA v0\n    SEC\n    SBC v1\n    BVC slt_s0\n    EOR #$80\nslt_s0:\n    BPL slt_L1\n"),
        "{}",
        text
    );
    assert!(!text.contains("JMP"));
}

#[test]
fn test_greater_than_constant_compares_with_successor() {
    let mut b = IrBuilder::new();
    let p = b.create_function(FunctionSignature::new("gt", vec![IrType::U8], IrType::Void));
    let yes = b.new_label();
    let no = b.new_label();
    b.build_branch_cond(IrCompareOp::Gt, Value::Temp(p[0]), Value::Constant(5), IrType::U8, yes, no)
        .unwrap();
    b.place_label(no).unwrap();
    b.place_label(yes).unwrap();
    b.build_return(None).unwrap();
    let f = b.finish_function().unwrap();

    let text = listing(&[f], "gt");
    assert!(text.contains("    CMP #$06\n    BCS gt_L0\n"), "{}", text);
}

#[test]
fn test_unsigned_below_zero_never_branches() {
    let mut b = IrBuilder::new();
    let p = b.create_function(FunctionSignature::new("never", vec![IrType::U8], IrType::Void));
    let yes = b.new_label();
    let no = b.new_label();
    b.build_branch_cond(IrCompareOp::Lt, Value::Temp(p[0]), Value::Constant(0), IrType::U8, yes, no)
        .unwrap();
    b.place_label(no).unwrap();
    b.place_label(yes).unwrap();
    b.build_return(None).unwrap();
    let f = b.finish_function().unwrap();

    let text = listing(&[f], "never");
    assert!(!text.lines().any(|l| l.trim_start().starts_with('B')));
}

#[test]
fn test_word_return_of_constant() {
    let mut b = IrBuilder::new();
    b.create_function(FunctionSignature::new("w", vec![], IrType::U16));
    b.build_return(Some(Value::Constant(0x1234))).unwrap();
    let f = b.finish_function().unwrap();

    assert_eq!(listing(&[f], "w"), "    LDA #$34\n    LDX #$12\nw_exit:\n");
}

#[test]
fn test_call_into_other_bank_uses_trampoline() {
    let far = Function::external(
        FunctionSignature::new("far", vec![], IrType::Void).with_bank(BankId::Bank(1)),
        None,
    );
    let mut b = IrBuilder::new();
    b.create_function(FunctionSignature::new("main", vec![], IrType::Void));
    b.build_call("far", vec![], IrType::Void).unwrap();
    b.build_return(None).unwrap();
    let main = b.finish_function().unwrap();

    let selected = select(&[far, main], "main").unwrap();
    assert_eq!(
        format_listing(&selected.code),
        "    LDA #<(far-1)\n    LDX #>(far-1)\n    JSR __bank_tramp_1\nmain_exit:\n"
    );
    assert!(selected.runtime.contains(&Routine::Trampoline(1)));
    assert!(selected.callees().contains("far"));
    assert_eq!(
        selected.calls.get(&2),
        Some(&CallTarget::Trampoline {
            bank: 1,
            callee: "far".to_string()
        })
    );
}

#[test]
fn test_same_bank_call_is_direct() {
    let near = Function::external(
        FunctionSignature::new("near", vec![], IrType::Void).with_bank(BankId::Bank(2)),
        None,
    );
    let mut b = IrBuilder::new();
    b.create_function(FunctionSignature::new("caller", vec![], IrType::Void).with_bank(BankId::Bank(2)));
    b.build_call("near", vec![], IrType::Void).unwrap();
    b.build_return(None).unwrap();
    let caller = b.finish_function().unwrap();

    let selected = select(&[near, caller], "caller").unwrap();
    assert_eq!(format_listing(&selected.code), "    JSR near\ncaller_exit:\n");
    assert!(selected.runtime.is_empty());
}

#[test]
fn test_variadic_call_passes_block_on_stack() {
    let sum = Function::external(
        FunctionSignature::new("sum", vec![IrType::U8], IrType::Void).variadic(),
        None,
    );
    let mut b = IrBuilder::new();
    b.create_function(FunctionSignature::new("main", vec![], IrType::Void));
    b.build_call(
        "sum",
        vec![
            TypedValue::new(Value::Constant(2), IrType::U8),
            TypedValue::new(Value::Constant(0x1234), IrType::U16),
            TypedValue::new(Value::Constant(7), IrType::U8),
        ],
        IrType::Void,
    )
    .unwrap();
    b.build_return(None).unwrap();
    let main = b.finish_function().unwrap();

    assert_eq!(
        listing(&[sum, main], "main"),
        "    LDA #$07\n    PHA\n    LDA #$12\n    PHA\n    LDA #$34\n    PHA\n\
         \x20   TSX\n    INX\n    STX $82\n    LDA #$01\n    STA $83\n    LDA #$03\n    STA $81\n\
         \x20   LDA #$02\n    STA $80\n    JSR sum\n    PLA\n    PLA\n    PLA\nmain_exit:\n"
    );
}

#[test]
fn test_word_result_leaves_x_before_storing() {
    let get = Function::external(FunctionSignature::new("get", vec![], IrType::U16), None);
    let mut b = IrBuilder::new();
    b.create_function(FunctionSignature::new("main", vec![], IrType::U16));
    let r = b.build_call("get", vec![], IrType::U16).unwrap().unwrap();
    b.build_return(Some(Value::Temp(r))).unwrap();
    let main = b.finish_function().unwrap();

    let text = listing(&[get, main], "main");
    assert!(text.starts_with("    JSR get\n    TAY\n    TXA\n    STA v1\n    TYA\n    STA v0\n"), "{}", text);
}

#[test]
fn test_setjmp_and_longjmp_pull_in_runtime() {
    let mut b = IrBuilder::new();
    b.create_function(FunctionSignature::new("jumpy", vec![], IrType::Void));
    let buf = MemRef::global("env");
    let r = b.build_setjmp(buf.clone()).unwrap();
    let done = b.new_label();
    let again = b.new_label();
    b.build_branch_cond(IrCompareOp::Ne, Value::Temp(r), Value::Constant(0), IrType::I16, done, again)
        .unwrap();
    b.place_label(again).unwrap();
    b.build_longjmp(buf, Value::Constant(1)).unwrap();
    b.place_label(done).unwrap();
    b.build_return(None).unwrap();
    let f = b.finish_function().unwrap();

    let selected = select(&[f], "jumpy").unwrap();
    let text = format_listing(&selected.code);
    assert!(text.starts_with("    LDA #<env\n    STA $80\n    LDA #>env\n    STA $81\n    JSR __setjmp\n"));
    assert!(text.contains("    LDA #$01\n    STA $82\n    JMP __longjmp\n"));
    assert!(selected.runtime.contains(&Routine::SetJmp));
    assert!(selected.runtime.contains(&Routine::LongJmp));
}

#[test]
fn test_bit_field_read_and_write() {
    let field = BitField {
        byte_offset: 0,
        bit_offset: 2,
        width: 3,
    };
    let mut b = IrBuilder::new();
    b.create_function(FunctionSignature::new("bits", vec![], IrType::Void));
    let reg = MemRef::Absolute(0xD000);
    let v = b.build_load_field(reg.clone(), field).unwrap();
    b.build_store_field(Value::Constant(5), reg, field).unwrap();
    b.build_store(Value::Temp(v), MemRef::global("out"), IrType::U8).unwrap();
    b.build_return(None).unwrap();
    let f = b.finish_function().unwrap();

    let text = listing(&[f], "bits");
    assert!(text.starts_with("    LDA $D000\n    LSR A\n    LSR A\n    AND #$07\n    STA v0\n"), "{}", text);
    assert!(text.contains("    LDA $D000\n    AND #$E3\n    ORA #$14\n    STA $D000\n"), "{}", text);
}

#[test]
fn test_multiply_by_variable_is_unsupported() {
    let mut b = IrBuilder::new();
    let p = b.create_function(FunctionSignature::new("mul", vec![IrType::U8, IrType::U8], IrType::U8));
    let m = b
        .build_binary(IrBinaryOp::Mul, Value::Temp(p[0]), Value::Temp(p[1]), IrType::U8)
        .unwrap();
    b.build_return(Some(Value::Temp(m))).unwrap();
    let f = b.finish_function().unwrap();

    match select(&[f], "mul") {
        Err(CompilerError::UnsupportedOperation { function, target, .. }) => {
            assert_eq!(function, "mul");
            assert_eq!(target, "mos6502");
        }
        other => panic!("expected unsupported operation, got {:?}", other),
    }
}

#[test]
fn test_constant_multiply_is_folded() {
    let mut b = IrBuilder::new();
    b.create_function(FunctionSignature::new("k", vec![], IrType::U8));
    let m = b
        .build_binary(IrBinaryOp::Mul, Value::Constant(6), Value::Constant(7), IrType::U8)
        .unwrap();
    b.build_return(Some(Value::Temp(m))).unwrap();
    let f = b.finish_function().unwrap();

    assert_eq!(listing(&[f], "k"), "    LDA #$2A\n    STA v0\nk_exit:\n");
}

#[test]
fn test_constant_division_by_zero_is_invalid() {
    let mut b = IrBuilder::new();
    b.create_function(FunctionSignature::new("z", vec![], IrType::U8));
    let m = b
        .build_binary(IrBinaryOp::Div, Value::Constant(6), Value::Constant(0), IrType::U8)
        .unwrap();
    b.build_return(Some(Value::Temp(m))).unwrap();
    let f = b.finish_function().unwrap();

    assert!(matches!(select(&[f], "z"), Err(CompilerError::InvalidIr { .. })));
}

#[test]
fn test_constant_out_of_range_is_rejected() {
    let mut b = IrBuilder::new();
    b.create_function(FunctionSignature::new("big", vec![], IrType::Void));
    b.build_store(Value::Constant(300), MemRef::global("x"), IrType::U8).unwrap();
    b.build_return(None).unwrap();
    let f = b.finish_function().unwrap();

    match select(&[f], "big") {
        Err(CompilerError::ConstantOutOfRange { value, ty, .. }) => {
            assert_eq!(value, 300);
            assert_eq!(ty, "u8");
        }
        other => panic!("expected constant out of range, got {:?}", other),
    }
}

#[test]
fn test_variable_shift_count_is_unsupported() {
    let mut b = IrBuilder::new();
    let p = b.create_function(FunctionSignature::new("sh", vec![IrType::U8, IrType::U8], IrType::U8));
    let r = b
        .build_binary(IrBinaryOp::Shl, Value::Temp(p[0]), Value::Temp(p[1]), IrType::U8)
        .unwrap();
    b.build_return(Some(Value::Temp(r))).unwrap();
    let f = b.finish_function().unwrap();

    assert!(matches!(select(&[f], "sh"), Err(CompilerError::UnsupportedOperation { .. })));
}

#[test]
fn test_calling_interrupt_handler_is_rejected() {
    let mut b = IrBuilder::new();
    b.create_function(
        FunctionSignature::new("isr", vec![], IrType::Void).with_interrupt(InterruptKind::NonRecursive),
    );
    b.build_return(None).unwrap();
    let isr = b.finish_function().unwrap();
    b.create_function(FunctionSignature::new("main", vec![], IrType::Void));
    b.build_call("isr", vec![], IrType::Void).unwrap();
    b.build_return(None).unwrap();
    let main = b.finish_function().unwrap();

    assert!(matches!(
        select(&[isr, main], "main"),
        Err(CompilerError::InvalidAbiCombination { .. })
    ));
}

#[test]
fn test_wrong_argument_count_is_invalid() {
    let callee = Function::external(FunctionSignature::new("two", vec![IrType::U8, IrType::U8], IrType::Void), None);
    let mut b = IrBuilder::new();
    b.create_function(FunctionSignature::new("main", vec![], IrType::Void));
    b.build_call("two", vec![TypedValue::new(Value::Constant(1), IrType::U8)], IrType::Void)
        .unwrap();
    b.build_return(None).unwrap();
    let main = b.finish_function().unwrap();

    assert!(matches!(select(&[callee, main], "main"), Err(CompilerError::InvalidIr { .. })));
}

#[test]
fn test_asm_call_loads_registers_and_records_clobbers() {
    let mut b = IrBuilder::new();
    b.create_function(FunctionSignature::new("io", vec![], IrType::U8));
    let r = b
        .build_asm_call(
            0xE456,
            [Some(Value::Constant(0x9B)), Some(Value::Constant(0x10)), None],
            m65_ir::DeclaredClobbers::registers(),
            true,
        )
        .unwrap()
        .unwrap();
    b.build_return(Some(Value::Temp(r))).unwrap();
    let f = b.finish_function().unwrap();

    let selected = select(&[f], "io").unwrap();
    assert_eq!(
        format_listing(&selected.code),
        "    LDA #$9B\n    LDX #$10\n    JSR $E456\n    STA v0\nio_exit:\n"
    );
    match selected.calls.get(&2) {
        Some(CallTarget::Fixed { address, clobbers }) => {
            assert_eq!(*address, 0xE456);
            assert!(clobbers.contains_reg(m65_codegen::Reg::X));
        }
        other => panic!("expected a fixed call, got {:?}", other),
    }
}
