use thiserror::Error;

pub type Result<T> = std::result::Result<T, SimError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SimError {
    #[error("Illegal opcode ${opcode:02X} at ${address:04X}")]
    IllegalOpcode { opcode: u8, address: u16 },

    #[error("Step limit of {limit} reached at ${pc:04X}")]
    StepLimit { limit: u64, pc: u16 },

    #[error("Unknown symbol '{0}'")]
    UnknownSymbol(String),

    #[error("Segment at ${origin:04X} ({len} bytes) does not fit in memory")]
    SegmentTooLarge { origin: u16, len: usize },
}
