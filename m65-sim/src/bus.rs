//! Memory map
//!
//! Reads inside the bank window come from the selected ROM bank; with no
//! bank loaded under the current number they read `$FF`. Writes to the
//! window are dropped. A write to the bank-select register switches banks
//! and also lands in RAM, so it can be read back.

use log::trace;
use std::collections::BTreeMap;

use crate::error::{Result, SimError};

#[derive(Debug, Clone)]
pub struct Bus {
    ram: Vec<u8>,
    banks: BTreeMap<u8, Vec<u8>>,
    window: u16,
    window_size: u16,
    bank_select: u16,
    selected: u8,
    /// Every bank switch in order
    switches: Vec<u8>,
}

impl Bus {
    pub fn new(window: u16, window_size: u16, bank_select: u16) -> Self {
        Self {
            ram: vec![0; 0x1_0000],
            banks: BTreeMap::new(),
            window,
            window_size,
            bank_select,
            selected: 0,
            switches: Vec::new(),
        }
    }

    fn in_window(&self, address: u16) -> bool {
        address >= self.window && (address as u32) < self.window as u32 + self.window_size as u32
    }

    pub fn read(&self, address: u16) -> u8 {
        if self.in_window(address) {
            let offset = (address - self.window) as usize;
            return self
                .banks
                .get(&self.selected)
                .and_then(|bank| bank.get(offset))
                .copied()
                .unwrap_or(0xFF);
        }
        self.ram[address as usize]
    }

    pub fn write(&mut self, address: u16, value: u8) {
        if self.in_window(address) {
            trace!("write to ROM window ${:04X} ignored", address);
            return;
        }
        if address == self.bank_select {
            trace!("bank {} -> {}", self.selected, value);
            self.selected = value;
            self.switches.push(value);
        }
        self.ram[address as usize] = value;
    }

    pub fn read_word(&self, address: u16) -> u16 {
        u16::from_le_bytes([self.read(address), self.read(address.wrapping_add(1))])
    }

    /// Copy bytes into RAM, bypassing the window and the select register
    pub fn load(&mut self, origin: u16, bytes: &[u8]) -> Result<()> {
        let end = origin as usize + bytes.len();
        if end > self.ram.len() {
            return Err(SimError::SegmentTooLarge {
                origin,
                len: bytes.len(),
            });
        }
        self.ram[origin as usize..end].copy_from_slice(bytes);
        Ok(())
    }

    pub fn load_bank(&mut self, bank: u8, bytes: &[u8]) -> Result<()> {
        if bytes.len() > self.window_size as usize {
            return Err(SimError::SegmentTooLarge {
                origin: self.window,
                len: bytes.len(),
            });
        }
        self.banks.insert(bank, bytes.to_vec());
        Ok(())
    }

    pub fn selected_bank(&self) -> u8 {
        self.selected
    }

    pub fn select_bank(&mut self, bank: u8) {
        self.selected = bank;
    }

    pub fn bank_switches(&self) -> &[u8] {
        &self.switches
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_window_follows_selected_bank() {
        let mut bus = Bus::new(0x8000, 0x2000, 0xD500);
        bus.load_bank(1, &[0x11]).unwrap();
        bus.load_bank(2, &[0x22]).unwrap();
        assert_eq!(bus.read(0x8000), 0xFF);
        bus.write(0xD500, 2);
        assert_eq!(bus.read(0x8000), 0x22);
        bus.write(0xD500, 1);
        assert_eq!(bus.read(0x8000), 0x11);
        assert_eq!(bus.bank_switches(), &[2, 1]);
        assert_eq!(bus.read(0xD500), 1);
    }

    #[test]
    fn test_window_is_read_only() {
        let mut bus = Bus::new(0x8000, 0x2000, 0xD500);
        bus.load_bank(0, &[0x42]).unwrap();
        bus.write(0x8000, 0);
        assert_eq!(bus.read(0x8000), 0x42);
    }

    #[test]
    fn test_oversized_bank_is_rejected() {
        let mut bus = Bus::new(0x8000, 0x10, 0xD500);
        assert!(bus.load_bank(0, &[0; 0x11]).is_err());
    }
}
