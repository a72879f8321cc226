//! Common types used throughout the code generator
//!
//! Identifiers shared by the IR and the backend, the bank model, and the
//! numeric configuration (integer limits and the floating-point model) that
//! the instruction selector consumes for constant folding and range checks.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Label identifier for IR control flow
pub type LabelId = u32;

/// Temporary value identifier for IR
pub type TempId = u32;

/// Where a function's code (or a data table) lives in the ROM map
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum BankId {
    /// Always mapped, bank independent area (trampolines live here)
    Common,
    /// A paged ROM bank, reachable only while selected
    Bank(u8),
}

impl Default for BankId {
    fn default() -> Self {
        BankId::Common
    }
}

impl BankId {
    /// Check if this is the always-mapped area
    pub fn is_common(&self) -> bool {
        matches!(self, BankId::Common)
    }
}

impl fmt::Display for BankId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BankId::Common => write!(f, "common"),
            BankId::Bank(n) => write!(f, "{}", n),
        }
    }
}

/// How a function is entered by the hardware
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub enum InterruptKind {
    /// Ordinary subroutine, entered with JSR
    #[default]
    None,
    /// Interrupt handler whose source stays masked while it runs
    NonRecursive,
    /// Interrupt handler that unmasks interrupts and may be re-entered
    Recursive,
}

impl InterruptKind {
    pub fn is_interrupt(&self) -> bool {
        !matches!(self, InterruptKind::None)
    }
}

impl fmt::Display for InterruptKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InterruptKind::None => write!(f, "none"),
            InterruptKind::NonRecursive => write!(f, "interrupt"),
            InterruptKind::Recursive => write!(f, "recursive-interrupt"),
        }
    }
}

/// Integer limits of the target C environment (limits.h)
///
/// Note the symmetric ranges: the target header defines `INT_MIN` as
/// -32767, so -32768 is not a valid `int` constant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegerLimits {
    pub char_bit: u32,
    pub schar_min: i64,
    pub schar_max: i64,
    pub uchar_max: u64,
    pub shrt_min: i64,
    pub shrt_max: i64,
    pub ushrt_max: u64,
    pub int_min: i64,
    pub int_max: i64,
    pub uint_max: u64,
    pub long_min: i64,
    pub long_max: i64,
    pub ulong_max: u64,
    pub mb_len_max: u32,
}

impl Default for IntegerLimits {
    fn default() -> Self {
        Self {
            char_bit: 8,
            schar_min: -127,
            schar_max: 127,
            uchar_max: 255,
            shrt_min: -32767,
            shrt_max: 32767,
            ushrt_max: 65535,
            int_min: -32767,
            int_max: 32767,
            uint_max: 65535,
            long_min: -2147483647,
            long_max: 2147483647,
            ulong_max: 4294967295,
            mb_len_max: 1,
        }
    }
}

/// Floating point model parameters (float.h)
///
/// The code generator never emits floating point arithmetic; these values are
/// carried so constant evaluation upstream and downstream agree on the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FloatModel {
    pub rounds: i32,
    pub radix: u32,
    pub flt_mant_dig: u32,
    pub dbl_mant_dig: u32,
    pub flt_dig: u32,
    pub dbl_dig: u32,
    pub flt_min_exp: i32,
    pub dbl_min_exp: i32,
    pub flt_min_10_exp: i32,
    pub dbl_min_10_exp: i32,
    pub flt_max_exp: i32,
    pub dbl_max_exp: i32,
    pub flt_max_10_exp: i32,
    pub dbl_max_10_exp: i32,
    pub flt_max: f64,
    pub dbl_max: f64,
    pub flt_epsilon: f64,
    pub dbl_epsilon: f64,
    pub flt_min: f64,
    pub dbl_min: f64,
}

impl Default for FloatModel {
    fn default() -> Self {
        Self {
            rounds: 1,
            radix: 2,
            flt_mant_dig: 24,
            dbl_mant_dig: 53,
            flt_dig: 6,
            dbl_dig: 15,
            flt_min_exp: -125,
            dbl_min_exp: -1021,
            flt_min_10_exp: -37,
            dbl_min_10_exp: -307,
            flt_max_exp: 128,
            dbl_max_exp: 1024,
            flt_max_10_exp: 38,
            dbl_max_10_exp: 308,
            flt_max: 3.40282347e+38,
            dbl_max: 1.7976931348623157e+308,
            flt_epsilon: 1.19209290e-07,
            dbl_epsilon: 2.2204460492503131e-16,
            flt_min: 1.17549435e-38,
            dbl_min: 2.2250738585072016e-308,
        }
    }
}

/// Numeric configuration consumed by the instruction selector
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetLimits {
    pub integers: IntegerLimits,
    pub floats: FloatModel,
}

impl TargetLimits {
    /// Inclusive value range for an integer of the given width and signedness
    ///
    /// Unsigned ranges also accept the negative two's complement spelling of a
    /// value (-1 for 0xFF, -128 for 0x80) since IR producers commonly emit those.
    pub fn range(&self, bytes: u32, signed: bool) -> (i64, i64) {
        let l = &self.integers;
        let unsigned = |max: u64| {
            let max = max as i64;
            (-(max + 1) / 2, max)
        };
        match (bytes, signed) {
            (1, true) => (l.schar_min, l.schar_max),
            (1, false) => unsigned(l.uchar_max),
            (2, true) => (l.int_min, l.int_max),
            (2, false) => unsigned(l.uint_max),
            (4, true) => (l.long_min, l.long_max),
            (_, _) => unsigned(l.ulong_max),
        }
    }

    /// Check a constant against the range of its type
    pub fn fits(&self, value: i64, bytes: u32, signed: bool) -> bool {
        let (lo, hi) = self.range(bytes, signed);
        value >= lo && value <= hi
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_limits_match_target_header() {
        let limits = TargetLimits::default();
        assert_eq!(limits.range(1, true), (-127, 127));
        assert_eq!(limits.range(2, true), (-32767, 32767));
        assert_eq!(limits.integers.uint_max, 65535);
        assert_eq!(limits.floats.flt_mant_dig, 24);
    }

    #[test]
    fn test_int_min_is_symmetric() {
        let limits = TargetLimits::default();
        assert!(limits.fits(-32767, 2, true));
        assert!(!limits.fits(-32768, 2, true));
        assert!(limits.fits(255, 1, false));
        assert!(!limits.fits(256, 1, false));
    }

    #[test]
    fn test_unsigned_ranges_take_twos_complement_spellings() {
        let limits = TargetLimits::default();
        assert_eq!(limits.range(1, false), (-128, 255));
        assert_eq!(limits.range(2, false), (-32768, 65535));
        assert!(limits.fits(-128, 1, false));
        assert!(!limits.fits(-129, 1, false));
        assert!(limits.fits(-32768, 2, false));
        assert!(!limits.fits(-32769, 2, false));
    }

    #[test]
    fn test_limits_deserialize_with_defaults() {
        let limits: TargetLimits =
            serde_json::from_str(r#"{"integers": {"int_min": -32768}}"#).unwrap();
        assert_eq!(limits.integers.int_min, -32768);
        assert_eq!(limits.integers.int_max, 32767);
    }

    #[test]
    fn test_bank_display() {
        assert_eq!(BankId::Common.to_string(), "common");
        assert_eq!(BankId::Bank(3).to_string(), "3");
        assert!(BankId::default().is_common());
    }
}
