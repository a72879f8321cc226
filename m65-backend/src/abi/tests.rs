use super::*;
use m65_codegen::format_listing;
use m65_ir::{IrBuilder, Value};
use pretty_assertions::assert_eq;

fn engine() -> AbiEngine {
    AbiEngine::new(ZeroPageLayout::default(), true, "mos6502", 0xD500)
}

fn isr(kind: InterruptKind) -> FunctionSignature {
    FunctionSignature::new("handler", vec![], IrType::Void).with_interrupt(kind)
}

fn regs(list: &[Reg]) -> ClobberSet {
    let mut set = ClobberSet::new();
    for r in list {
        set.insert_reg(*r);
    }
    set
}

#[test]
fn test_parameters_fill_slots_in_order() {
    let sig = FunctionSignature::new("f", vec![IrType::U8, IrType::Ptr, IrType::I8], IrType::U16);
    let abi = engine().bind_signature(&sig).unwrap();
    let slots: Vec<(u8, u8)> = abi.params().iter().map(|p| (p.slot, p.size)).collect();
    assert_eq!(slots, vec![(0, 1), (1, 2), (3, 1)]);
    assert_eq!(abi.return_kind(), ReturnKind::Word);
    assert_eq!(abi.sret_slot(), None);
    assert_eq!(abi.arg_bytes(), 4);
}

#[test]
fn test_struct_return_takes_first_slots() {
    let sig = FunctionSignature::new("mk", vec![IrType::U8], IrType::Struct { size: 6 });
    let abi = engine().bind_signature(&sig).unwrap();
    assert_eq!(abi.sret_slot(), Some(0));
    assert_eq!(abi.params()[0].slot, 2);
    assert_eq!(abi.return_kind(), ReturnKind::Struct { size: 6 });
}

#[test]
fn test_variadic_slots_follow_fixed_parameters() {
    let sig = FunctionSignature::new("printf", vec![IrType::Ptr], IrType::Void).variadic();
    let abi = engine().bind_signature(&sig).unwrap();
    assert_eq!(abi.va_count_slot(), Some(2));
    assert_eq!(abi.va_ptr_slot(), Some(3));
    assert_eq!(abi.arg_bytes(), 5);
}

#[test]
fn test_too_many_argument_bytes() {
    let sig = FunctionSignature::new("wide", vec![IrType::U16; 9], IrType::Void);
    match engine().bind_signature(&sig) {
        Err(CompilerError::InvalidAbiCombination { function, reason }) => {
            assert_eq!(function, "wide");
            assert!(reason.contains("18 bytes"), "{}", reason);
        }
        other => panic!("expected invalid ABI, got {:?}", other),
    }
}

#[test]
fn test_oversized_variadic_signature_is_rejected() {
    let sig = FunctionSignature::new("wide", vec![IrType::U8; 255], IrType::Void).variadic();
    match engine().bind_signature(&sig) {
        Err(CompilerError::InvalidAbiCombination { function, reason }) => {
            assert_eq!(function, "wide");
            assert!(reason.contains("258 bytes"), "{}", reason);
        }
        other => panic!("expected invalid ABI, got {:?}", other),
    }
}

#[test]
fn test_unsupported_parameter_type() {
    let sig = FunctionSignature::new("long", vec![IrType::U32], IrType::Void);
    assert!(matches!(
        engine().bind_signature(&sig),
        Err(CompilerError::UnsupportedOperation { .. })
    ));
}

#[test]
fn test_invalid_interrupt_shapes() {
    let e = engine();
    let variadic = isr(InterruptKind::Recursive).variadic();
    let mut with_param = isr(InterruptKind::NonRecursive);
    with_param.params.push(IrType::U8);
    let mut returning = isr(InterruptKind::NonRecursive);
    returning.return_type = IrType::U8;
    let banked = isr(InterruptKind::NonRecursive).with_bank(BankId::Bank(1));

    for sig in [variadic, with_param, returning, banked] {
        assert!(
            matches!(e.bind_signature(&sig), Err(CompilerError::InvalidAbiCombination { .. })),
            "{:?} should be rejected",
            sig
        );
    }
}

#[test]
fn test_recursive_variadic_handler_message() {
    let err = engine()
        .bind_signature(&isr(InterruptKind::Recursive).variadic())
        .unwrap_err();
    assert!(err.to_string().contains("recursive interrupt handler cannot be variadic"));
}

#[test]
fn test_call_site_classification() {
    let e = engine();
    let common = e.bind_signature(&FunctionSignature::new("main", vec![], IrType::Void)).unwrap();
    let bank1 = e
        .bind_signature(&FunctionSignature::new("a", vec![], IrType::Void).with_bank(BankId::Bank(1)))
        .unwrap();
    let also_bank1 = e
        .bind_signature(&FunctionSignature::new("b", vec![], IrType::Void).with_bank(BankId::Bank(1)))
        .unwrap();
    let bank2 = e
        .bind_signature(&FunctionSignature::new("c", vec![], IrType::Void).with_bank(BankId::Bank(2)))
        .unwrap();

    assert_eq!(e.call_site(&common, &bank1).unwrap().kind, CallKind::Trampoline { bank: 1 });
    assert_eq!(e.call_site(&bank1, &also_bank1).unwrap().kind, CallKind::Direct);
    assert_eq!(e.call_site(&bank1, &common).unwrap().kind, CallKind::Direct);
    assert_eq!(e.call_site(&bank1, &bank2).unwrap().kind, CallKind::Trampoline { bank: 2 });
    assert_eq!(e.call_site(&bank2, &common).unwrap().caller_bank, BankId::Bank(2));
}

#[test]
fn test_no_banking_flattens_placement() {
    let e = AbiEngine::new(ZeroPageLayout::default(), false, "symbolic", 0xD500);
    let caller = e.bind_signature(&FunctionSignature::new("main", vec![], IrType::Void)).unwrap();
    let far = e
        .bind_signature(&FunctionSignature::new("far", vec![], IrType::Void).with_bank(BankId::Bank(3)))
        .unwrap();
    assert_eq!(far.bank(), BankId::Bank(3));
    assert_eq!(far.placement(), BankId::Common);
    assert_eq!(e.call_site(&caller, &far).unwrap().kind, CallKind::Direct);
}

#[test]
fn test_calling_a_handler_is_rejected() {
    let e = engine();
    let caller = e.bind_signature(&FunctionSignature::new("main", vec![], IrType::Void)).unwrap();
    let handler = e.bind_signature(&isr(InterruptKind::NonRecursive)).unwrap();
    assert!(matches!(
        e.call_site(&caller, &handler),
        Err(CompilerError::InvalidAbiCombination { .. })
    ));
}

#[test]
fn test_bind_checks_parameter_temporaries() {
    let mut b = IrBuilder::new();
    b.create_function(FunctionSignature::new("f", vec![IrType::U8], IrType::Void));
    b.build_return(None).unwrap();
    let mut f = b.finish_function().unwrap();
    f.params.clear();
    assert!(matches!(engine().bind(&f), Err(CompilerError::InvalidIr { .. })));
}

#[test]
fn test_implied_binding_is_external() {
    let args = vec![TypedValue::new(Value::Constant(1), IrType::U8)];
    let abi = engine().bind_implied("mystery", &args, IrType::U8).unwrap();
    assert!(abi.is_external());
    assert!(!abi.is_externally_visible());
    assert_eq!(abi.params().len(), 1);
}

#[test]
fn test_plain_function_frame_is_balanced() {
    let e = engine();
    let abi = e.bind_signature(&FunctionSignature::new("f", vec![], IrType::U16)).unwrap();
    let saves = ClobberSet::new();
    let entry = e.prologue(&abi, 4, &saves).unwrap();
    let exit = e.epilogue(&abi, 4, &saves).unwrap();
    assert_eq!(entry.stack_effect, 4);
    // Three bytes released by arithmetic, the last pulled into X
    assert_eq!(exit.stack_effect, -4);
    assert_eq!(
        format_listing(&exit.code),
        "    TAY\n    TXA\n    TSX\n    STA $0104,X\n    TSX\n    TXA\n    CLC\n    ADC #$03\n    TAX\n    TXS\n    PLA\n    TAX\n    TYA\n    RTS\n"
    );
}

#[test]
fn test_frameless_function_is_just_a_label_and_rts() {
    let e = engine();
    let abi = e.bind_signature(&FunctionSignature::new("leaf", vec![], IrType::U8)).unwrap();
    let saves = ClobberSet::new();
    assert_eq!(format_listing(&e.prologue(&abi, 0, &saves).unwrap().code), "leaf:\n");
    assert_eq!(format_listing(&e.epilogue(&abi, 0, &saves).unwrap().code), "    RTS\n");
}

#[test]
fn test_non_recursive_handler_saves_exactly_its_set() {
    let e = engine();
    let abi = e.bind_signature(&isr(InterruptKind::NonRecursive)).unwrap();
    let mut body = regs(&[Reg::Y]);
    body.insert_zero_page(0x93);
    let saves = e.interrupt_saves(&body, 0);
    assert_eq!(saves.regs.iter().copied().collect::<Vec<_>>(), vec![Reg::A, Reg::Y]);

    let entry = e.prologue(&abi, 0, &saves).unwrap();
    assert_eq!(
        format_listing(&entry.code),
        "handler:\n    STA __isr_save_handler\n    STY __isr_save_handler+1\n    LDA $93\n    STA __isr_save_handler+2\n"
    );
    let exit = e.epilogue(&abi, 0, &saves).unwrap();
    assert_eq!(
        format_listing(&exit.code),
        "    LDA __isr_save_handler+2\n    STA $93\n    LDY __isr_save_handler+1\n    LDA __isr_save_handler\n    RTI\n"
    );
    assert_eq!(e.save_area_size(&abi, &saves), 3);
}

#[test]
fn test_recursive_handler_stacks_full_register_set() {
    let e = engine();
    let abi = e.bind_signature(&isr(InterruptKind::Recursive)).unwrap();
    let saves = e.interrupt_saves(&regs(&[Reg::A]), 0);
    let plan = SavePlan::stacked(&saves);
    assert_eq!(plan.saved_registers(), vec![None, Some(Reg::A), Some(Reg::X), Some(Reg::Y)]);

    let entry = e.prologue(&abi, 0, &saves).unwrap();
    let exit = e.epilogue(&abi, 0, &saves).unwrap();
    assert_eq!(entry.stack_effect + exit.stack_effect, 0);
    assert_eq!(entry.code.last(), Some(&AsmInst::implied(Opcode::Cli)));
    assert_eq!(exit.code.first(), Some(&AsmInst::implied(Opcode::Sei)));
    assert_eq!(exit.code.last(), Some(&AsmInst::implied(Opcode::Rti)));
    assert_eq!(e.save_area_size(&abi, &saves), 0);
}

#[test]
fn test_handler_frame_forces_a_and_x_saves() {
    let e = engine();
    let saves = e.interrupt_saves(&ClobberSet::new(), 2);
    assert!(saves.contains_reg(Reg::A));
    assert!(saves.contains_reg(Reg::X));
    assert!(!saves.contains_reg(Reg::Y));
    assert!(e.interrupt_saves(&ClobberSet::new(), 0).is_empty());
}

#[test]
fn test_declared_clobbers_convert() {
    let declared = DeclaredClobbers {
        a: true,
        x: false,
        y: true,
        zero_page: vec![0xD4],
    };
    let set = clobbers_of(&declared);
    assert_eq!(set.to_string(), "{A, Y, $D4}");
}

#[test]
fn test_sccs_put_callees_first() {
    let mut graph = CallGraph::new();
    graph.add_edge("main", "even");
    graph.add_edge("even", "odd");
    graph.add_edge("odd", "even");
    graph.add_edge("odd", "leaf");
    graph.add_node("leaf");
    let sccs = graph.sccs();
    assert_eq!(
        sccs,
        vec![
            vec!["leaf".to_string()],
            vec!["even".to_string(), "odd".to_string()],
            vec!["main".to_string()],
        ]
    );
    assert!(graph.in_same_scc(&sccs, "even", "odd"));
    assert!(!graph.in_same_scc(&sccs, "main", "even"));
}

#[test]
fn test_clobber_closure_reaches_fixed_point() {
    let mut graph = CallGraph::new();
    graph.add_edge("main", "even");
    graph.add_edge("even", "odd");
    graph.add_edge("odd", "even");
    graph.add_edge("odd", "leaf");

    let mut analysis = ClobberAnalysis::new(ClobberSet::everything(&ZeroPageLayout::default()));
    analysis.set_fixed("leaf", regs(&[Reg::Y]));
    analysis.set_local("even", regs(&[Reg::A]));
    analysis.set_local("odd", regs(&[Reg::X]));
    analysis.set_local("main", ClobberSet::new());
    for component in graph.sccs() {
        analysis.close(&graph, &component);
    }

    let all = regs(&[Reg::A, Reg::X, Reg::Y]);
    assert_eq!(analysis.transitive("even"), Some(&all));
    assert_eq!(analysis.transitive("odd"), Some(&all));
    assert_eq!(analysis.transitive("main"), Some(&all));
    assert_eq!(&analysis.recompute(&graph), analysis.all());
}

#[test]
fn test_unknown_callee_is_worst_case() {
    let mut graph = CallGraph::new();
    graph.add_edge("main", "elsewhere");
    let layout = ZeroPageLayout::default();
    let mut analysis = ClobberAnalysis::new(ClobberSet::everything(&layout));
    analysis.set_local("main", ClobberSet::new());
    analysis.close(&graph, &["main".to_string()]);
    assert_eq!(analysis.transitive("main"), Some(&ClobberSet::everything(&layout)));
}
