//! Platform memory-mapped records
//!
//! The Central I/O control blocks live at a fixed address and have a fixed
//! byte layout that the operating system ROM reads. The layout is spelled out
//! here as explicit offsets rather than derived from any struct packing rule.
//!
//! ```text
//! offset  size  field
//!   0      1    HID  handler id
//!   1      1    DNO  device number
//!   2      1    CMD  command
//!   3      1    STA  status
//!   4      2    BA   buffer address (lo, hi)
//!   6      2    PT   put address (lo, hi)
//!   8      2    BL   buffer length (lo, hi)
//!  10      6    AX   auxiliary bytes
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Address of IOCB #0
pub const IOCB_BASE: u16 = 0x0340;

/// Distance between consecutive IOCB channels
pub const IOCB_STRIDE: u16 = 16;

/// Number of IOCB channels
pub const IOCB_CHANNELS: u8 = 8;

/// Central I/O entry vector
pub const CIOV: u16 = 0xE456;

/// CIO command codes written to the CMD field
pub mod command {
    pub const OPEN: u8 = 0x03;
    pub const GET_CHARACTERS: u8 = 0x07;
    pub const PUT_CHARACTERS: u8 = 0x0B;
    pub const CLOSE: u8 = 0x0C;
}

/// A field of an I/O control block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IocbField {
    HandlerId,
    DeviceNumber,
    Command,
    Status,
    BufferAddress,
    PutAddress,
    BufferLength,
    /// One of the six auxiliary bytes
    Aux(u8),
}

impl IocbField {
    /// Byte offset of the field inside the record
    pub fn offset(&self) -> u16 {
        match self {
            IocbField::HandlerId => 0,
            IocbField::DeviceNumber => 1,
            IocbField::Command => 2,
            IocbField::Status => 3,
            IocbField::BufferAddress => 4,
            IocbField::PutAddress => 6,
            IocbField::BufferLength => 8,
            IocbField::Aux(i) => 10 + *i as u16,
        }
    }

    /// Size of the field in bytes
    pub fn size(&self) -> u16 {
        match self {
            IocbField::BufferAddress | IocbField::PutAddress | IocbField::BufferLength => 2,
            _ => 1,
        }
    }

    /// Absolute address of this field in the given channel
    ///
    /// Returns None for a channel or aux index outside the platform range.
    pub fn address(&self, channel: u8) -> Option<u16> {
        if channel >= IOCB_CHANNELS {
            return None;
        }
        if let IocbField::Aux(i) = self {
            if *i >= 6 {
                return None;
            }
        }
        Some(IOCB_BASE + channel as u16 * IOCB_STRIDE + self.offset())
    }

    /// All fields in layout order
    pub fn all() -> Vec<IocbField> {
        let mut fields = vec![
            IocbField::HandlerId,
            IocbField::DeviceNumber,
            IocbField::Command,
            IocbField::Status,
            IocbField::BufferAddress,
            IocbField::PutAddress,
            IocbField::BufferLength,
        ];
        fields.extend((0..6).map(IocbField::Aux));
        fields
    }
}

impl fmt::Display for IocbField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IocbField::HandlerId => write!(f, "HID"),
            IocbField::DeviceNumber => write!(f, "DNO"),
            IocbField::Command => write!(f, "CMD"),
            IocbField::Status => write!(f, "STA"),
            IocbField::BufferAddress => write!(f, "BA"),
            IocbField::PutAddress => write!(f, "PT"),
            IocbField::BufferLength => write!(f, "BL"),
            IocbField::Aux(i) => write!(f, "AX{}", i + 1),
        }
    }
}

/// Total size of one IOCB record
pub fn iocb_record_size() -> u16 {
    IocbField::all().iter().map(|f| f.size()).sum()
}

/// A bit-field inside a single byte
///
/// Fields are allocated least significant bit first with no implicit
/// padding; a field that does not fit in the remaining bits of the current
/// byte starts at bit 0 of the next byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BitField {
    pub byte_offset: u16,
    pub bit_offset: u8,
    pub width: u8,
}

impl BitField {
    /// Mask of the field once shifted down to bit 0
    pub fn mask(&self) -> u8 {
        if self.width >= 8 {
            0xFF
        } else {
            ((1u16 << self.width) - 1) as u8
        }
    }

    /// Mask of the field in place
    pub fn mask_in_place(&self) -> u8 {
        self.mask() << self.bit_offset
    }

    /// Extract this field from a byte
    pub fn extract(&self, byte: u8) -> u8 {
        (byte >> self.bit_offset) & self.mask()
    }

    /// Insert a value into a byte, leaving the other bits untouched
    pub fn insert(&self, byte: u8, value: u8) -> u8 {
        (byte & !self.mask_in_place()) | ((value & self.mask()) << self.bit_offset)
    }
}

/// Lay out a sequence of bit-field widths
///
/// A zero width closes the current byte, like an unnamed zero-width field.
/// Widths above 8 are rejected since a field never spans bytes here.
pub fn layout_bitfields(widths: &[u8]) -> Result<Vec<BitField>, String> {
    let mut fields = Vec::new();
    let mut byte = 0u16;
    let mut bit = 0u8;

    for &width in widths {
        if width > 8 {
            return Err(format!("bit-field width {} exceeds one byte", width));
        }
        if width == 0 {
            if bit > 0 {
                byte += 1;
                bit = 0;
            }
            continue;
        }
        if bit + width > 8 {
            byte += 1;
            bit = 0;
        }
        fields.push(BitField { byte_offset: byte, bit_offset: bit, width });
        bit += width;
    }

    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_iocb_offsets() {
        assert_eq!(IocbField::HandlerId.offset(), 0);
        assert_eq!(IocbField::DeviceNumber.offset(), 1);
        assert_eq!(IocbField::Command.offset(), 2);
        assert_eq!(IocbField::Status.offset(), 3);
        assert_eq!(IocbField::BufferAddress.offset(), 4);
        assert_eq!(IocbField::PutAddress.offset(), 6);
        assert_eq!(IocbField::BufferLength.offset(), 8);
        assert_eq!(IocbField::Aux(0).offset(), 10);
        assert_eq!(IocbField::Aux(5).offset(), 15);
    }

    #[test]
    fn test_iocb_layout_has_no_padding() {
        let mut expected = 0;
        for field in IocbField::all() {
            assert_eq!(field.offset(), expected, "field {} misplaced", field);
            expected += field.size();
        }
        assert_eq!(iocb_record_size(), 16);
        assert_eq!(iocb_record_size(), IOCB_STRIDE);
    }

    #[test]
    fn test_iocb_addresses() {
        assert_eq!(IocbField::Command.address(0), Some(0x0342));
        assert_eq!(IocbField::BufferLength.address(1), Some(0x0358));
        assert_eq!(IocbField::Command.address(8), None);
        assert_eq!(IocbField::Aux(6).address(0), None);
    }

    #[test]
    fn test_command_codes() {
        assert_eq!(command::OPEN, 0x03);
        assert_eq!(command::CLOSE, 0x0C);
        assert_eq!(command::GET_CHARACTERS, 0x07);
    }

    #[test]
    fn test_bitfields_pack_lsb_first() {
        let fields = layout_bitfields(&[1, 3, 4]).unwrap();
        assert_eq!(fields[0], BitField { byte_offset: 0, bit_offset: 0, width: 1 });
        assert_eq!(fields[1], BitField { byte_offset: 0, bit_offset: 1, width: 3 });
        assert_eq!(fields[2], BitField { byte_offset: 0, bit_offset: 4, width: 4 });
    }

    #[test]
    fn test_bitfield_that_does_not_fit_starts_next_byte() {
        let fields = layout_bitfields(&[5, 4]).unwrap();
        assert_eq!(fields[1].byte_offset, 1);
        assert_eq!(fields[1].bit_offset, 0);
    }

    #[test]
    fn test_zero_width_closes_byte() {
        let fields = layout_bitfields(&[2, 0, 2]).unwrap();
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[1].byte_offset, 1);
        assert!(layout_bitfields(&[9]).is_err());
    }

    #[test]
    fn test_extract_and_insert() {
        let field = BitField { byte_offset: 0, bit_offset: 1, width: 3 };
        assert_eq!(field.mask(), 0b111);
        assert_eq!(field.mask_in_place(), 0b1110);
        assert_eq!(field.insert(0b1000_0001, 0b101), 0b1000_1011);
        assert_eq!(field.extract(0b1000_1011), 0b101);
    }
}
