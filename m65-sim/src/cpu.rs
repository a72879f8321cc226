//! 6502 interpreter
//!
//! Decimal mode is not modelled; `ADC`/`SBC` are always binary. The decode
//! table is built from the code generator's own encoding table, so the
//! simulator accepts exactly what the hardware emitter can produce.

use log::{debug, trace};
use m65_codegen::{isa, AddrMode, Opcode};
use std::collections::BTreeMap;

use crate::bus::Bus;
use crate::error::{Result, SimError};

/// Return address pushed by `call`; reaching it ends the call
pub const RETURN_SENTINEL: u16 = 0xFFF0;

const DEFAULT_STEP_LIMIT: u64 = 1_000_000;

const N: u8 = 0x80;
const V: u8 = 0x40;
const U: u8 = 0x20;
const B: u8 = 0x10;
const D: u8 = 0x08;
const I: u8 = 0x04;
const Z: u8 = 0x02;
const C: u8 = 0x01;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registers {
    pub a: u8,
    pub x: u8,
    pub y: u8,
    pub sp: u8,
    pub p: u8,
    pub pc: u16,
}

impl Default for Registers {
    fn default() -> Self {
        Self {
            a: 0,
            x: 0,
            y: 0,
            sp: 0xFF,
            p: U,
            pc: 0,
        }
    }
}

impl Registers {
    pub fn flag(&self, mask: u8) -> bool {
        self.p & mask != 0
    }

    pub fn carry(&self) -> bool {
        self.flag(C)
    }

    pub fn zero(&self) -> bool {
        self.flag(Z)
    }

    pub fn negative(&self) -> bool {
        self.flag(N)
    }

    pub fn overflow(&self) -> bool {
        self.flag(V)
    }

    pub fn interrupts_masked(&self) -> bool {
        self.flag(I)
    }
}

/// A maskable interrupt request raised once `at_step` instructions have run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interrupt {
    pub at_step: u64,
    pub handler: u16,
}

#[derive(Debug, Clone, Copy)]
enum Target {
    None,
    Accumulator,
    Value(u8),
    Address(u16),
}

pub struct Machine {
    pub bus: Bus,
    regs: Registers,
    symbols: BTreeMap<String, u16>,
    decode: [Option<(Opcode, AddrMode)>; 256],
    steps: u64,
    step_limit: u64,
    min_sp: u8,
    pending: Vec<Interrupt>,
    interrupts_taken: usize,
}

fn decode_table() -> [Option<(Opcode, AddrMode)>; 256] {
    let mut table = [None; 256];
    for op in Opcode::ALL {
        for mode in AddrMode::ALL {
            if let Some(byte) = isa::encode(op, mode) {
                table[byte as usize] = Some((op, mode));
            }
        }
    }
    table
}

impl Machine {
    /// A machine with interrupts enabled and an empty stack
    pub fn new(bank_window: u16, window_size: u16, bank_select: u16) -> Self {
        Self {
            bus: Bus::new(bank_window, window_size, bank_select),
            regs: Registers::default(),
            symbols: BTreeMap::new(),
            decode: decode_table(),
            steps: 0,
            step_limit: DEFAULT_STEP_LIMIT,
            min_sp: 0xFF,
            pending: Vec::new(),
            interrupts_taken: 0,
        }
    }

    pub fn set_step_limit(&mut self, limit: u64) {
        self.step_limit = limit;
    }

    pub fn define_symbol(&mut self, name: &str, address: u16) {
        self.symbols.insert(name.to_string(), address);
    }

    pub fn symbol(&self, name: &str) -> Result<u16> {
        self.symbols
            .get(name)
            .copied()
            .ok_or_else(|| SimError::UnknownSymbol(name.to_string()))
    }

    pub fn registers(&self) -> Registers {
        self.regs
    }

    pub fn registers_mut(&mut self) -> &mut Registers {
        &mut self.regs
    }

    pub fn peek(&self, address: u16) -> u8 {
        self.bus.read(address)
    }

    pub fn poke(&mut self, address: u16, value: u8) {
        self.bus.write(address, value);
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Lowest stack pointer seen since the last `call` began
    pub fn min_sp(&self) -> u8 {
        self.min_sp
    }

    pub fn interrupts_taken(&self) -> usize {
        self.interrupts_taken
    }

    /// Schedule an interrupt; it waits while interrupts are masked
    pub fn raise_interrupt(&mut self, interrupt: Interrupt) {
        self.pending.push(interrupt);
        self.pending.sort_by_key(|i| i.at_step);
    }

    /// Run the subroutine at `address` until it returns
    pub fn call(&mut self, address: u16) -> Result<()> {
        let [lo, hi] = RETURN_SENTINEL.wrapping_sub(1).to_le_bytes();
        self.push(hi);
        self.push(lo);
        self.min_sp = self.regs.sp;
        self.regs.pc = address;
        debug!("call ${:04X} (sp ${:02X})", address, self.regs.sp);
        while self.regs.pc != RETURN_SENTINEL {
            if self.steps >= self.step_limit {
                return Err(SimError::StepLimit {
                    limit: self.step_limit,
                    pc: self.regs.pc,
                });
            }
            self.poll_interrupt();
            self.step()?;
        }
        debug!("returned after {} steps (sp ${:02X})", self.steps, self.regs.sp);
        Ok(())
    }

    pub fn call_symbol(&mut self, name: &str) -> Result<()> {
        let address = self.symbol(name)?;
        self.call(address)
    }

    fn poll_interrupt(&mut self) {
        let Some(next) = self.pending.first().copied() else {
            return;
        };
        if next.at_step > self.steps || self.regs.flag(I) {
            return;
        }
        self.pending.remove(0);
        trace!("interrupt at step {} -> ${:04X}", self.steps, next.handler);
        let [lo, hi] = self.regs.pc.to_le_bytes();
        self.push(hi);
        self.push(lo);
        self.push((self.regs.p & !B) | U);
        self.regs.p |= I;
        self.regs.pc = next.handler;
        self.interrupts_taken += 1;
    }

    fn push(&mut self, value: u8) {
        self.bus.write(0x0100 | self.regs.sp as u16, value);
        self.regs.sp = self.regs.sp.wrapping_sub(1);
        self.min_sp = self.min_sp.min(self.regs.sp);
    }

    fn pull(&mut self) -> u8 {
        self.regs.sp = self.regs.sp.wrapping_add(1);
        self.bus.read(0x0100 | self.regs.sp as u16)
    }

    fn set_flag(&mut self, mask: u8, on: bool) {
        if on {
            self.regs.p |= mask;
        } else {
            self.regs.p &= !mask;
        }
    }

    fn set_nz(&mut self, value: u8) {
        self.set_flag(Z, value == 0);
        self.set_flag(N, value & 0x80 != 0);
    }

    fn fetch(&mut self) -> u8 {
        let byte = self.bus.read(self.regs.pc);
        self.regs.pc = self.regs.pc.wrapping_add(1);
        byte
    }

    fn fetch_word(&mut self) -> u16 {
        let lo = self.fetch();
        let hi = self.fetch();
        u16::from_le_bytes([lo, hi])
    }

    fn operand(&mut self, mode: AddrMode) -> Target {
        match mode {
            AddrMode::Implied => Target::None,
            AddrMode::Accumulator => Target::Accumulator,
            AddrMode::Immediate => Target::Value(self.fetch()),
            AddrMode::ZeroPage => Target::Address(self.fetch() as u16),
            AddrMode::Absolute => Target::Address(self.fetch_word()),
            AddrMode::AbsoluteX => Target::Address(self.fetch_word().wrapping_add(self.regs.x as u16)),
            AddrMode::AbsoluteY => Target::Address(self.fetch_word().wrapping_add(self.regs.y as u16)),
            AddrMode::IndirectY => {
                let zp = self.fetch();
                let base = u16::from_le_bytes([self.bus.read(zp as u16), self.bus.read(zp.wrapping_add(1) as u16)]);
                Target::Address(base.wrapping_add(self.regs.y as u16))
            }
            AddrMode::Indirect => {
                // The page-wrap quirk of JMP ($xxFF)
                let pointer = self.fetch_word();
                let hi_at = (pointer & 0xFF00) | (pointer.wrapping_add(1) & 0x00FF);
                Target::Address(u16::from_le_bytes([self.bus.read(pointer), self.bus.read(hi_at)]))
            }
            AddrMode::Relative => {
                let offset = self.fetch() as i8;
                Target::Address(self.regs.pc.wrapping_add(offset as i16 as u16))
            }
        }
    }

    fn read(&self, target: Target) -> u8 {
        match target {
            Target::Value(v) => v,
            Target::Address(a) => self.bus.read(a),
            Target::Accumulator => self.regs.a,
            Target::None => 0,
        }
    }

    fn write(&mut self, target: Target, value: u8) {
        match target {
            Target::Address(a) => self.bus.write(a, value),
            Target::Accumulator => self.regs.a = value,
            Target::Value(_) | Target::None => {}
        }
    }

    fn address(target: Target) -> u16 {
        match target {
            Target::Address(a) => a,
            _ => 0,
        }
    }

    fn add(&mut self, value: u8) {
        let a = self.regs.a;
        let sum = a as u16 + value as u16 + self.regs.carry() as u16;
        let result = sum as u8;
        self.set_flag(C, sum > 0xFF);
        self.set_flag(V, (!(a ^ value) & (a ^ result) & 0x80) != 0);
        self.regs.a = result;
        self.set_nz(result);
    }

    fn compare(&mut self, register: u8, value: u8) {
        self.set_flag(C, register >= value);
        self.set_nz(register.wrapping_sub(value));
    }

    fn branch(&mut self, taken: bool, target: Target) {
        if taken {
            self.regs.pc = Self::address(target);
        }
    }

    /// Execute one instruction
    pub fn step(&mut self) -> Result<()> {
        let at = self.regs.pc;
        let opcode = self.fetch();
        let Some((op, mode)) = self.decode[opcode as usize] else {
            return Err(SimError::IllegalOpcode { opcode, address: at });
        };
        let target = self.operand(mode);
        self.steps += 1;
        trace!("${:04X} {} {:?}", at, op, target);

        match op {
            Opcode::Adc => {
                let m = self.read(target);
                self.add(m);
            }
            Opcode::Sbc => {
                let m = self.read(target);
                self.add(m ^ 0xFF);
            }
            Opcode::And => {
                self.regs.a &= self.read(target);
                self.set_nz(self.regs.a);
            }
            Opcode::Ora => {
                self.regs.a |= self.read(target);
                self.set_nz(self.regs.a);
            }
            Opcode::Eor => {
                self.regs.a ^= self.read(target);
                self.set_nz(self.regs.a);
            }
            Opcode::Cmp => self.compare(self.regs.a, self.read(target)),
            Opcode::Cpx => self.compare(self.regs.x, self.read(target)),
            Opcode::Cpy => self.compare(self.regs.y, self.read(target)),
            Opcode::Bit => {
                let m = self.read(target);
                self.set_flag(Z, self.regs.a & m == 0);
                self.set_flag(N, m & 0x80 != 0);
                self.set_flag(V, m & 0x40 != 0);
            }
            Opcode::Asl | Opcode::Lsr | Opcode::Rol | Opcode::Ror => {
                let m = self.read(target);
                let carry_in = self.regs.carry() as u8;
                let (result, carry_out) = match op {
                    Opcode::Asl => (m << 1, m & 0x80 != 0),
                    Opcode::Lsr => (m >> 1, m & 0x01 != 0),
                    Opcode::Rol => ((m << 1) | carry_in, m & 0x80 != 0),
                    _ => ((m >> 1) | (carry_in << 7), m & 0x01 != 0),
                };
                self.set_flag(C, carry_out);
                self.set_nz(result);
                self.write(target, result);
            }
            Opcode::Inc | Opcode::Dec => {
                let m = self.read(target);
                let result = if op == Opcode::Inc {
                    m.wrapping_add(1)
                } else {
                    m.wrapping_sub(1)
                };
                self.set_nz(result);
                self.write(target, result);
            }
            Opcode::Inx => {
                self.regs.x = self.regs.x.wrapping_add(1);
                self.set_nz(self.regs.x);
            }
            Opcode::Iny => {
                self.regs.y = self.regs.y.wrapping_add(1);
                self.set_nz(self.regs.y);
            }
            Opcode::Dex => {
                self.regs.x = self.regs.x.wrapping_sub(1);
                self.set_nz(self.regs.x);
            }
            Opcode::Dey => {
                self.regs.y = self.regs.y.wrapping_sub(1);
                self.set_nz(self.regs.y);
            }
            Opcode::Lda => {
                self.regs.a = self.read(target);
                self.set_nz(self.regs.a);
            }
            Opcode::Ldx => {
                self.regs.x = self.read(target);
                self.set_nz(self.regs.x);
            }
            Opcode::Ldy => {
                self.regs.y = self.read(target);
                self.set_nz(self.regs.y);
            }
            Opcode::Sta => self.write(target, self.regs.a),
            Opcode::Stx => self.write(target, self.regs.x),
            Opcode::Sty => self.write(target, self.regs.y),
            Opcode::Bcc => self.branch(!self.regs.flag(C), target),
            Opcode::Bcs => self.branch(self.regs.flag(C), target),
            Opcode::Beq => self.branch(self.regs.flag(Z), target),
            Opcode::Bne => self.branch(!self.regs.flag(Z), target),
            Opcode::Bmi => self.branch(self.regs.flag(N), target),
            Opcode::Bpl => self.branch(!self.regs.flag(N), target),
            Opcode::Bvc => self.branch(!self.regs.flag(V), target),
            Opcode::Bvs => self.branch(self.regs.flag(V), target),
            Opcode::Jmp => self.regs.pc = Self::address(target),
            Opcode::Jsr => {
                let [lo, hi] = self.regs.pc.wrapping_sub(1).to_le_bytes();
                self.push(hi);
                self.push(lo);
                self.regs.pc = Self::address(target);
            }
            Opcode::Rts => {
                let lo = self.pull();
                let hi = self.pull();
                self.regs.pc = u16::from_le_bytes([lo, hi]).wrapping_add(1);
            }
            Opcode::Rti => {
                self.regs.p = (self.pull() & !B) | U;
                let lo = self.pull();
                let hi = self.pull();
                self.regs.pc = u16::from_le_bytes([lo, hi]);
            }
            Opcode::Brk => {
                let [lo, hi] = self.regs.pc.wrapping_add(1).to_le_bytes();
                self.push(hi);
                self.push(lo);
                self.push(self.regs.p | B | U);
                self.regs.p |= I;
                self.regs.pc = self.bus.read_word(0xFFFE);
            }
            Opcode::Pha => self.push(self.regs.a),
            Opcode::Php => self.push(self.regs.p | B | U),
            Opcode::Pla => {
                self.regs.a = self.pull();
                self.set_nz(self.regs.a);
            }
            Opcode::Plp => self.regs.p = (self.pull() & !B) | U,
            Opcode::Clc => self.set_flag(C, false),
            Opcode::Sec => self.set_flag(C, true),
            Opcode::Cli => self.set_flag(I, false),
            Opcode::Sei => self.set_flag(I, true),
            Opcode::Cld => self.set_flag(D, false),
            Opcode::Sed => self.set_flag(D, true),
            Opcode::Clv => self.set_flag(V, false),
            Opcode::Tax => {
                self.regs.x = self.regs.a;
                self.set_nz(self.regs.x);
            }
            Opcode::Tay => {
                self.regs.y = self.regs.a;
                self.set_nz(self.regs.y);
            }
            Opcode::Txa => {
                self.regs.a = self.regs.x;
                self.set_nz(self.regs.a);
            }
            Opcode::Tya => {
                self.regs.a = self.regs.y;
                self.set_nz(self.regs.a);
            }
            Opcode::Tsx => {
                self.regs.x = self.regs.sp;
                self.set_nz(self.regs.x);
            }
            Opcode::Txs => self.regs.sp = self.regs.x,
            Opcode::Nop => {}
        }
        Ok(())
    }
}
