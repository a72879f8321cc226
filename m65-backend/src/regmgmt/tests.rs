use super::*;
use crate::abi::AbiEngine;
use m65_codegen::{format_listing, Opcode, Operand};
use m65_ir::{FunctionSignature, IrType};
use pretty_assertions::assert_eq;

fn v(n: u32) -> Operand {
    Operand::Virtual(VReg(n))
}

fn op(opcode: Opcode, operand: Operand) -> AsmInst {
    AsmInst::op(opcode, operand)
}

fn selected(code: Vec<AsmInst>, calls: Vec<(usize, CallTarget)>, locals: u8) -> SelectedFunction {
    SelectedFunction {
        name: "f".to_string(),
        vregs: 4,
        code,
        calls: calls.into_iter().collect(),
        runtime: BTreeSet::new(),
        locals,
    }
}

fn abi(ret: IrType) -> FunctionAbi {
    AbiEngine::new(ZeroPageLayout::default(), true, "mos6502", 0xD500)
        .bind_signature(&FunctionSignature::new("f", vec![IrType::U8], ret))
        .unwrap()
}

fn allocate(
    layout: &ZeroPageLayout,
    f: &SelectedFunction,
    ret: IrType,
    clobbers: Vec<(usize, ClobberSet)>,
) -> Result<AllocatedFunction> {
    let clobbers: BTreeMap<usize, ClobberSet> = clobbers.into_iter().collect();
    RegisterAllocator::new(layout, false).allocate(f, &abi(ret), &clobbers)
}

fn registers_and(cells: &[u8]) -> ClobberSet {
    let mut set = ClobberSet::registers();
    set.zero_page.extend(cells.iter().copied());
    set
}

#[test]
fn test_short_lived_values_stay_in_a() {
    let f = selected(
        vec![
            op(Opcode::Lda, Operand::ZeroPage(0x80)),
            op(Opcode::Sta, v(0)),
            AsmInst::implied(Opcode::Clc),
            op(Opcode::Adc, Operand::imm(1)),
            op(Opcode::Sta, v(1)),
            AsmInst::label("f_exit"),
        ],
        vec![],
        0,
    );
    let out = allocate(&ZeroPageLayout::default(), &f, IrType::U8, vec![]).unwrap();
    assert_eq!(format_listing(&out.code), "    LDA $80\n    CLC\n    ADC #$01\nf_exit:\n");
    assert_eq!(out.stats.in_registers, 2);
    assert_eq!(out.frame_bytes, 0);
}

#[test]
fn test_value_across_call_avoids_callee_cells() {
    let f = selected(
        vec![
            op(Opcode::Lda, Operand::ZeroPage(0x80)),
            op(Opcode::Sta, v(0)),
            AsmInst::jsr("g"),
            op(Opcode::Lda, v(0)),
            AsmInst::label("f_exit"),
        ],
        vec![(2, CallTarget::Function("g".to_string()))],
        0,
    );
    let out = allocate(
        &ZeroPageLayout::default(),
        &f,
        IrType::U8,
        vec![(2, registers_and(&[0x93]))],
    )
    .unwrap();
    assert_eq!(
        format_listing(&out.code),
        "    LDA $80\n    STA $94\n    JSR g\n    LDA $94\nf_exit:\n"
    );
    assert_eq!(out.locations[&VReg(0)], Location::ZeroPage(0x94));
    assert_eq!(out.calls.keys().copied().collect::<Vec<_>>(), vec![2]);
}

#[test]
fn test_value_moves_to_x_when_a_is_busy() {
    let f = selected(
        vec![
            op(Opcode::Lda, Operand::ZeroPage(0x80)),
            op(Opcode::Sta, v(0)),
            op(Opcode::Lda, Operand::imm(0)),
            op(Opcode::Sta, Operand::ZeroPage(0x81)),
            op(Opcode::Lda, v(0)),
            AsmInst::label("f_exit"),
        ],
        vec![],
        0,
    );
    let out = allocate(&ZeroPageLayout::default(), &f, IrType::U8, vec![]).unwrap();
    assert_eq!(
        format_listing(&out.code),
        "    LDA $80\n    TAX\n    LDA #$00\n    STA $81\n    TXA\nf_exit:\n"
    );
}

#[test]
fn test_pressure_spills_to_the_frame() {
    let layout = ZeroPageLayout {
        pool_size: 1,
        ..ZeroPageLayout::default()
    };
    let f = selected(
        vec![
            op(Opcode::Lda, Operand::imm(1)),
            op(Opcode::Sta, v(0)),
            op(Opcode::Lda, Operand::imm(2)),
            op(Opcode::Sta, v(1)),
            AsmInst::jsr("g"),
            op(Opcode::Lda, v(0)),
            AsmInst::implied(Opcode::Clc),
            op(Opcode::Adc, v(1)),
            AsmInst::label("f_exit"),
        ],
        vec![(4, CallTarget::Function("g".to_string()))],
        0,
    );
    let out = allocate(&layout, &f, IrType::U8, vec![(4, ClobberSet::registers())]).unwrap();
    assert_eq!(
        format_listing(&out.code),
        "    LDA #$01\n    STA $93\n    LDA #$02\n    TSX\n    STA $0101,X\n    JSR g\n\
         \x20   LDA $93\n    CLC\n    TSX\n    ADC $0101,X\nf_exit:\n"
    );
    assert_eq!(out.stats.spilled, 1);
    assert_eq!(out.frame_bytes, 1);
    assert_eq!(out.calls.keys().copied().collect::<Vec<_>>(), vec![5]);
}

#[test]
fn test_spill_gives_up_x_and_reruns() {
    let layout = ZeroPageLayout {
        pool_size: 0,
        ..ZeroPageLayout::default()
    };
    let f = selected(
        vec![
            op(Opcode::Lda, Operand::ZeroPage(0x80)),
            op(Opcode::Sta, v(0)),
            op(Opcode::Lda, Operand::imm(0)),
            op(Opcode::Sta, v(1)),
            op(Opcode::Lda, v(0)),
            AsmInst::implied(Opcode::Clc),
            op(Opcode::Adc, v(1)),
            AsmInst::label("f_exit"),
        ],
        vec![],
        0,
    );
    let out = allocate(&layout, &f, IrType::U8, vec![]).unwrap();
    assert_eq!(out.stats.reruns, 1);
    assert_eq!(out.locations[&VReg(0)], Location::Reg(Reg::Y));
    assert_eq!(
        format_listing(&out.code),
        "    LDA $80\n    TAY\n    LDA #$00\n    TSX\n    STA $0101,X\n    TYA\n    CLC\n    ADC $0101,X\nf_exit:\n"
    );
}

#[test]
fn test_frame_access_accounts_for_pushes() {
    let f = selected(
        vec![
            op(Opcode::Lda, Operand::imm(7)),
            op(Opcode::Sta, Operand::Frame(1)),
            AsmInst::implied(Opcode::Pha),
            AsmInst::label("f_L0"),
            op(Opcode::Lda, Operand::Frame(1)),
            AsmInst::implied(Opcode::Pla),
            AsmInst::label("f_exit"),
        ],
        vec![],
        2,
    );
    let out = allocate(&ZeroPageLayout::default(), &f, IrType::Void, vec![]).unwrap();
    assert_eq!(
        format_listing(&out.code),
        "    LDA #$07\n    TSX\n    STA $0102,X\n    PHA\nf_L0:\n    TSX\n    LDA $0103,X\n    PLA\nf_exit:\n"
    );
    assert_eq!(out.frame_bytes, 2);
}

#[test]
fn test_frame_store_preserves_live_flags() {
    let f = selected(
        vec![
            op(Opcode::Lda, Operand::imm(1)),
            op(Opcode::Cmp, Operand::imm(1)),
            op(Opcode::Sta, Operand::Frame(0)),
            AsmInst::branch(Opcode::Beq, "f_L0"),
            AsmInst::label("f_L0"),
            AsmInst::label("f_exit"),
        ],
        vec![],
        1,
    );
    let out = allocate(&ZeroPageLayout::default(), &f, IrType::Void, vec![]).unwrap();
    assert_eq!(
        format_listing(&out.code),
        "    LDA #$01\n    CMP #$01\n    PHP\n    TSX\n    STA $0102,X\n    PLP\n    BEQ f_L0\nf_L0:\nf_exit:\n"
    );
}

#[test]
fn test_live_x_at_frame_access_is_internal_error() {
    let f = selected(
        vec![
            op(Opcode::Ldx, Operand::imm(1)),
            op(Opcode::Sta, Operand::Frame(0)),
            op(Opcode::Stx, Operand::ZeroPage(0x80)),
            AsmInst::label("f_exit"),
        ],
        vec![],
        1,
    );
    let err = allocate(&ZeroPageLayout::default(), &f, IrType::Void, vec![]).unwrap_err();
    assert!(matches!(err, CompilerError::Internal { .. }));
    assert!(err.to_string().contains("'f'"));
}

#[test]
fn test_word_return_keeps_x_live_at_exit() {
    // v0 cannot go to X: the epilogue reads X
    let f = selected(
        vec![
            op(Opcode::Lda, Operand::ZeroPage(0x80)),
            op(Opcode::Sta, v(0)),
            op(Opcode::Ldx, Operand::imm(0)),
            op(Opcode::Lda, Operand::imm(0)),
            op(Opcode::Sta, Operand::ZeroPage(0x81)),
            op(Opcode::Lda, v(0)),
            AsmInst::label("f_exit"),
        ],
        vec![],
        0,
    );
    let out = allocate(&ZeroPageLayout::default(), &f, IrType::U16, vec![]).unwrap();
    assert_eq!(out.locations[&VReg(0)], Location::Reg(Reg::Y));
}

#[test]
fn test_disjoint_values_share_a_cell() {
    let f = selected(
        vec![
            op(Opcode::Lda, Operand::imm(1)),
            op(Opcode::Sta, v(0)),
            op(Opcode::Inc, v(0)),
            op(Opcode::Lda, v(0)),
            op(Opcode::Sta, Operand::ZeroPage(0x80)),
            op(Opcode::Lda, Operand::imm(2)),
            op(Opcode::Sta, v(1)),
            op(Opcode::Inc, v(1)),
            op(Opcode::Lda, v(1)),
            AsmInst::label("f_exit"),
        ],
        vec![],
        0,
    );
    let out = allocate(&ZeroPageLayout::default(), &f, IrType::U8, vec![]).unwrap();
    assert_eq!(out.locations[&VReg(0)], Location::ZeroPage(0x93));
    assert_eq!(out.locations[&VReg(1)], Location::ZeroPage(0x93));
    assert_eq!(out.pool_cells().into_iter().collect::<Vec<_>>(), vec![0x93]);
}

#[test]
fn test_selected_code_has_no_virtual_operands_after_allocation() {
    let f = selected(
        vec![
            op(Opcode::Lda, Operand::ZeroPage(0x80)),
            op(Opcode::Sta, v(0)),
            op(Opcode::Asl, v(0)),
            op(Opcode::Lda, v(0)),
            AsmInst::label("f_exit"),
        ],
        vec![],
        0,
    );
    let out = allocate(&ZeroPageLayout::default(), &f, IrType::U8, vec![]).unwrap();
    assert!(out
        .code
        .iter()
        .all(|inst| !inst.operand().map_or(false, |o| o.is_pre_allocation())));
    assert!(out.local_clobbers().contains_zero_page(0x93));
}
