//! Shared helpers for the backend integration tests

#![allow(dead_code)]

use m65_backend::{compile_module, Artifact, CodegenOptions, CompiledOutput, Image, Module};
use m65_ir::{Function, FunctionSignature, IrBuilder};
use m65_sim::Machine;

pub fn compile(module: &Module, target: &str) -> CompiledOutput {
    compile_module(module, target, CodegenOptions::default()).unwrap()
}

pub fn image(module: &Module) -> Image {
    match compile(module, "mos6502").artifact {
        Artifact::Image(image) => image,
        other => panic!("expected an image, got {:?}", other),
    }
}

pub fn listing(module: &Module) -> String {
    match compile(module, "symbolic").artifact {
        Artifact::Listing(text) => text,
        other => panic!("expected a listing, got {:?}", other),
    }
}

/// Build one function through the IR builder
pub fn build(sig: FunctionSignature, body: impl FnOnce(&mut IrBuilder, &[m65_common::TempId])) -> Function {
    let mut b = IrBuilder::new();
    let params = b.create_function(sig);
    body(&mut b, &params);
    b.finish_function().unwrap()
}

pub fn module(functions: Vec<Function>) -> Module {
    let mut module = Module::new("test");
    for f in functions {
        module.add_function(f);
    }
    module
}

/// Load every segment of an image into a fresh machine
pub fn machine(image: &Image) -> Machine {
    let options = CodegenOptions::default();
    let mut m = Machine::new(image.bank_window, options.bank_capacity, image.bank_select);
    m.bus.load(image.common.origin, &image.common.bytes).unwrap();
    m.bus.load(image.data.origin, &image.data.bytes).unwrap();
    for (bank, segment) in &image.banks {
        m.bus.load_bank(*bank, &segment.bytes).unwrap();
    }
    for (name, symbol) in &image.symbols {
        m.define_symbol(name, symbol.address);
    }
    m.set_step_limit(100_000);
    m
}

/// True if `bytes` holds `JSR target`
pub fn calls(bytes: &[u8], target: u16) -> bool {
    let [lo, hi] = target.to_le_bytes();
    bytes.windows(3).any(|w| w == [0x20, lo, hi])
}

/// A scratch loop in RAM for interrupts to land in: `NOP` x4, `RTS`
pub const SPIN: u16 = 0x0600;

pub fn load_spin(m: &mut Machine) {
    m.bus.load(SPIN, &[0xEA, 0xEA, 0xEA, 0xEA, 0x60]).unwrap();
}
