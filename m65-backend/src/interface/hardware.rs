//! 6502 machine code per bank
//!
//! Lays out the common area, every paged bank and the RAM data area,
//! relaxes branches whose target is out of reach, checks capacities and
//! cross-bank transfers, then encodes real opcodes.
//!
//! A relaxed branch becomes the inverted branch over a `JMP`:
//!
//! ```text
//! BEQ far        BNE *+5
//!          =>    JMP far
//! ```

use log::debug;
use m65_codegen::{isa, Address, AddrMode, AsmInst, ByteSel, Imm, Opcode, Operand};
use m65_common::{CompilerError, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use super::symbols::{Definition, Placement, Segment, SymbolKind, SymbolTable};
use super::unit::{define_label, CodeUnit};
use super::{Artifact, CompiledOutput};
use crate::CodegenOptions;
use m65_common::BankId;

/// Memory map the hardware emitter lays code out in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HardwareConfig {
    pub bank_window: u16,
    pub bank_capacity: u16,
    pub bank_select: u16,
    pub code_origin: u16,
    pub code_capacity: u16,
    pub data_origin: u16,
    pub data_capacity: u16,
}

impl From<&CodegenOptions> for HardwareConfig {
    fn from(options: &CodegenOptions) -> Self {
        Self {
            bank_window: options.bank_window,
            bank_capacity: options.bank_capacity,
            bank_select: options.bank_select,
            code_origin: options.code_origin,
            code_capacity: options.code_capacity,
            data_origin: options.data_origin,
            data_capacity: options.data_capacity,
        }
    }
}

impl HardwareConfig {
    fn origin(&self, segment: Segment) -> u16 {
        match segment {
            Segment::Common => self.code_origin,
            Segment::Bank(_) => self.bank_window,
            Segment::Data => self.data_origin,
            Segment::Absolute => 0,
        }
    }

    fn capacity(&self, segment: Segment) -> Option<u32> {
        match segment {
            Segment::Common => Some(self.code_capacity as u32),
            Segment::Bank(_) => Some(self.bank_capacity as u32),
            Segment::Data => Some(self.data_capacity as u32),
            Segment::Absolute => None,
        }
    }

    fn address(&self, def: &Definition) -> u16 {
        self.origin(def.placement.segment)
            .wrapping_add(def.placement.offset)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SegmentImage {
    pub origin: u16,
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSymbol {
    pub segment: Segment,
    pub address: u16,
}

/// Laid-out machine code
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Image {
    pub common: SegmentImage,
    pub banks: BTreeMap<u8, SegmentImage>,
    /// Initial contents of the RAM data area
    pub data: SegmentImage,
    pub symbols: BTreeMap<String, ImageSymbol>,
    pub bank_window: u16,
    pub bank_select: u16,
}

impl Image {
    /// CPU address of a symbol
    pub fn address(&self, name: &str) -> Option<u16> {
        self.symbols.get(name).map(|s| s.address)
    }

    pub fn segment(&self, name: &str) -> Option<Segment> {
        self.symbols.get(name).map(|s| s.segment)
    }

    /// Atari binary-load file: `$FFFF`, then per segment its first and last
    /// address (little-endian) and the bytes
    ///
    /// Each bank is preceded by a one-byte segment that stores the bank
    /// number into the bank-select register, so the loader fills the right
    /// bank through the window. Empty segments are left out.
    pub fn to_binary_load(&self) -> Result<Vec<u8>> {
        let mut out = vec![0xFF, 0xFF];
        push_segment(&mut out, &self.common)?;
        push_segment(&mut out, &self.data)?;
        for (bank, image) in &self.banks {
            if image.bytes.is_empty() {
                continue;
            }
            push_segment(
                &mut out,
                &SegmentImage {
                    origin: self.bank_select,
                    bytes: vec![*bank],
                },
            )?;
            push_segment(&mut out, image)?;
        }
        Ok(out)
    }
}

fn push_segment(out: &mut Vec<u8>, segment: &SegmentImage) -> Result<()> {
    if segment.bytes.is_empty() {
        return Ok(());
    }
    let last = u32::from(segment.origin) + segment.bytes.len() as u32 - 1;
    let last = u16::try_from(last).map_err(|_| {
        CompilerError::internal(format!(
            "segment at ${:04X} of {} bytes runs past $FFFF",
            segment.origin,
            segment.bytes.len()
        ))
    })?;
    out.extend(segment.origin.to_le_bytes());
    out.extend(last.to_le_bytes());
    out.extend_from_slice(&segment.bytes);
    Ok(())
}

#[derive(Debug)]
pub struct HardwareEmitter {
    pub(super) unit: CodeUnit,
    config: HardwareConfig,
}

/// Positions of one layout pass
struct Layout {
    /// Segment offset of every instruction, per function
    offsets: Vec<Vec<u32>>,
    /// Segment offset just past each function
    ends: Vec<u32>,
    /// Data objects with their segment and end offset
    data_ends: Vec<(Segment, u32)>,
    sizes: BTreeMap<Segment, u32>,
    table: SymbolTable,
}

fn data_segment(bank: BankId) -> Segment {
    match bank {
        BankId::Common => Segment::Data,
        BankId::Bank(n) => Segment::Bank(n),
    }
}

fn inst_size(inst: &AsmInst, long: bool) -> u32 {
    if long {
        // inverted branch + JMP
        5
    } else {
        isa::size(inst) as u32
    }
}

fn is_transfer(op: Opcode) -> bool {
    matches!(op, Opcode::Jsr | Opcode::Jmp)
}

impl HardwareEmitter {
    pub fn new(config: HardwareConfig) -> Self {
        Self {
            unit: CodeUnit::new(),
            config,
        }
    }

    fn layout(&self, long: &BTreeSet<(usize, usize)>) -> Result<Layout> {
        let mut cursor: BTreeMap<Segment, u32> = BTreeMap::new();
        let mut table = SymbolTable::new();
        let mut offsets = Vec::new();
        let mut ends = Vec::new();
        for (f, function) in self.unit.functions().iter().enumerate() {
            let segment = function.segment();
            let pos = cursor.entry(segment).or_insert(0);
            let mut at = Vec::with_capacity(function.code.len());
            for (i, inst) in function.code.iter().enumerate() {
                at.push(*pos);
                define_label(&mut table, function, inst, segment, *pos as u16)?;
                *pos += inst_size(inst, long.contains(&(f, i)));
            }
            offsets.push(at);
            ends.push(*pos);
        }
        let mut data_ends = Vec::new();
        for object in self.unit.data() {
            let segment = data_segment(object.bank);
            let pos = cursor.entry(segment).or_insert(0);
            table.define(
                &object.name,
                Placement {
                    segment,
                    offset: *pos as u16,
                },
                SymbolKind::Data,
            )?;
            *pos += object.size() as u32;
            data_ends.push((segment, *pos));
        }
        self.unit.define_externals(&mut table)?;
        self.unit.record_references(&mut table);
        Ok(Layout {
            offsets,
            ends,
            data_ends,
            sizes: cursor,
            table,
        })
    }

    /// Lay out until every short branch reaches its target
    fn relax(&self) -> Result<(Layout, BTreeSet<(usize, usize)>)> {
        let mut long = BTreeSet::new();
        loop {
            let layout = self.layout(&long)?;
            let mut grew = false;
            for (f, function) in self.unit.functions().iter().enumerate() {
                for (i, inst) in function.code.iter().enumerate() {
                    let label = match inst {
                        AsmInst::Op(op, Operand::Relative(label)) if op.is_branch() => label,
                        _ => continue,
                    };
                    if long.contains(&(f, i)) {
                        continue;
                    }
                    let Some(target) = layout.table.get(label) else {
                        continue;
                    };
                    let from = layout.offsets[f][i] as i64 + 2;
                    let distance = target.placement.offset as i64 - from;
                    if target.placement.segment != function.segment() || !(-128..=127).contains(&distance) {
                        debug!("relaxing branch to {} in {} (distance {})", label, function.info.name, distance);
                        long.insert((f, i));
                        grew = true;
                    }
                }
            }
            if !grew {
                return Ok((layout, long));
            }
        }
    }

    fn check_capacity(&self, layout: &Layout) -> Result<()> {
        for (segment, size) in &layout.sizes {
            let Some(capacity) = self.config.capacity(*segment) else {
                continue;
            };
            if *size <= capacity {
                continue;
            }
            let function = self
                .unit
                .functions()
                .iter()
                .zip(&layout.ends)
                .find(|(f, end)| f.segment() == *segment && **end > capacity)
                .map(|(f, _)| f.info.name.clone())
                .or_else(|| {
                    self.unit
                        .data()
                        .iter()
                        .zip(&layout.data_ends)
                        .find(|(_, (s, end))| s == segment && *end > capacity)
                        .map(|(o, _)| o.name.clone())
                })
                .unwrap_or_default();
            return Err(CompilerError::BankOverflow {
                function,
                bank: segment.to_string(),
                size: *size as usize,
                capacity: capacity as usize,
            });
        }
        Ok(())
    }

    /// Reject transfers and data accesses that need another bank mapped
    fn check_banks(&self, table: &SymbolTable) -> Result<()> {
        for function in self.unit.functions() {
            let own = function.segment();
            let name = &function.info.name;
            for inst in &function.code {
                let AsmInst::Op(op, operand) = inst else {
                    continue;
                };
                if let Operand::Absolute(Address::BankRelative { bank, .. })
                | Operand::AbsoluteX(Address::BankRelative { bank, .. })
                | Operand::AbsoluteY(Address::BankRelative { bank, .. }) = operand
                {
                    if own != Segment::Bank(*bank) {
                        return Err(CompilerError::CrossBankReference {
                            function: name.clone(),
                            target: format!("bank {} data", bank),
                        });
                    }
                }
                // Taking an address is fine; trampolines do it
                if matches!(operand, Operand::Immediate(_)) {
                    continue;
                }
                let Some(symbol) = operand.symbol_name() else {
                    continue;
                };
                let Some(def) = table.get(symbol) else {
                    continue;
                };
                let other_bank = matches!(def.placement.segment, Segment::Bank(_)) && def.placement.segment != own;
                if !other_bank {
                    continue;
                }
                if is_transfer(*op) && def.kind.is_code() {
                    return Err(CompilerError::DirectCrossBankCall {
                        caller: name.clone(),
                        callee: symbol.to_string(),
                    });
                }
                return Err(CompilerError::CrossBankReference {
                    function: name.clone(),
                    target: symbol.to_string(),
                });
            }
        }
        Ok(())
    }

    fn resolve(&self, table: &SymbolTable, address: &Address) -> Result<u16> {
        let lookup = |name: &str| {
            table
                .get(name)
                .map(|def| self.config.address(def))
                .ok_or_else(|| CompilerError::internal(format!("'{}' vanished after resolution", name)))
        };
        Ok(match address {
            Address::Abs(addr) => *addr,
            Address::Symbol { name, addend } => lookup(name)?.wrapping_add(*addend as u16),
            Address::Label(label) => lookup(label)?,
            Address::BankRelative { offset, .. } => self.config.bank_window.wrapping_add(*offset),
        })
    }

    fn encode(&self, inst: &AsmInst, pc: u16, long: bool, table: &SymbolTable, out: &mut Vec<u8>) -> Result<()> {
        let AsmInst::Op(op, operand) = inst else {
            return Ok(());
        };
        let opcode = |op: Opcode, mode: AddrMode| {
            isa::encode(op, mode).ok_or_else(|| {
                CompilerError::internal(format!("{} has no {:?} encoding", op, mode))
            })
        };

        if let Operand::Relative(label) = operand {
            let target = self.resolve(table, &Address::Label(label.clone()))?;
            if long {
                let inverted = op
                    .inverted_branch()
                    .ok_or_else(|| CompilerError::internal(format!("{} is not a branch", op)))?;
                out.extend([opcode(inverted, AddrMode::Relative)?, 3]);
                out.push(opcode(Opcode::Jmp, AddrMode::Absolute)?);
                out.extend(target.to_le_bytes());
            } else {
                let distance = target as i32 - (pc as i32 + 2);
                out.extend([opcode(*op, AddrMode::Relative)?, distance as i8 as u8]);
            }
            return Ok(());
        }

        out.push(opcode(*op, AddrMode::of(operand))?);
        match operand {
            Operand::Implied | Operand::Accumulator => {}
            Operand::Immediate(Imm::Byte(b)) => out.push(*b),
            Operand::Immediate(Imm::Symbol { name, addend, part }) => {
                let value = self.resolve(
                    table,
                    &Address::Symbol {
                        name: name.clone(),
                        addend: *addend,
                    },
                )?;
                let [lo, hi] = value.to_le_bytes();
                out.push(match part {
                    ByteSel::Lo => lo,
                    ByteSel::Hi => hi,
                });
            }
            Operand::ZeroPage(zp) | Operand::IndirectY(zp) => out.push(*zp),
            Operand::Absolute(a) | Operand::AbsoluteX(a) | Operand::AbsoluteY(a) | Operand::Indirect(a) => {
                out.extend(self.resolve(table, a)?.to_le_bytes());
            }
            Operand::Relative(_) | Operand::Virtual(_) | Operand::Frame(_) => {
                return Err(CompilerError::internal(format!("cannot encode '{}'", inst)))
            }
        }
        Ok(())
    }

    pub(super) fn finalize(self) -> Result<CompiledOutput> {
        self.unit.close()?;
        let (layout, long) = self.relax()?;
        layout.table.check_resolved()?;
        self.check_banks(&layout.table)?;
        self.check_capacity(&layout)?;

        let mut segments: BTreeMap<Segment, Vec<u8>> = BTreeMap::new();
        let mut code_bytes = 0;
        for (f, function) in self.unit.functions().iter().enumerate() {
            let segment = function.segment();
            let origin = self.config.origin(segment);
            let bytes = segments.entry(segment).or_default();
            for (i, inst) in function.code.iter().enumerate() {
                let pc = origin.wrapping_add(layout.offsets[f][i] as u16);
                let before = bytes.len();
                self.encode(inst, pc, long.contains(&(f, i)), &layout.table, bytes)?;
                code_bytes += bytes.len() - before;
            }
        }
        for object in self.unit.data() {
            segments
                .entry(data_segment(object.bank))
                .or_default()
                .extend_from_slice(&object.bytes);
        }

        let mut image = Image {
            common: SegmentImage {
                origin: self.config.code_origin,
                bytes: Vec::new(),
            },
            banks: BTreeMap::new(),
            data: SegmentImage {
                origin: self.config.data_origin,
                bytes: Vec::new(),
            },
            symbols: BTreeMap::new(),
            bank_window: self.config.bank_window,
            bank_select: self.config.bank_select,
        };
        for (segment, bytes) in segments {
            debug!("segment {}: {} bytes", segment, bytes.len());
            match segment {
                Segment::Common => image.common.bytes = bytes,
                Segment::Data => image.data.bytes = bytes,
                Segment::Bank(n) => {
                    image.banks.insert(
                        n,
                        SegmentImage {
                            origin: self.config.bank_window,
                            bytes,
                        },
                    );
                }
                Segment::Absolute => {}
            }
        }
        for (name, def) in layout.table.iter() {
            image.symbols.insert(
                name.clone(),
                ImageSymbol {
                    segment: def.placement.segment,
                    address: self.config.address(def),
                },
            );
        }

        let mut statistics = self.unit.statistics();
        statistics.code_bytes = code_bytes;
        Ok(CompiledOutput {
            target: "mos6502".to_string(),
            artifact: Artifact::Image(image),
            relocations: layout.table.relocations(),
            statistics,
        })
    }
}
