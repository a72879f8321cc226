//! M65 6502 Compiler - Simulator
//!
//! A cycle-agnostic 6502 interpreter with the cartridge memory map the
//! hardware target assumes: 64K of RAM, a window where the selected ROM
//! bank appears, and a bank-select register. It executes the documented
//! instructions the code generator emits and exists to test generated
//! images end to end.

pub mod bus;
pub mod cpu;
pub mod error;

pub use bus::Bus;
pub use cpu::{Interrupt, Machine, Registers, RETURN_SENTINEL};
pub use error::{Result, SimError};
