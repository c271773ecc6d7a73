use std::fmt;

use crate::Error;

/// A 128-bit trace identifier stored as two 64-bit halves.
///
/// The id is empty when both halves are zero. The lower half is the
/// in-process numeric form; the upper half travels through dedicated
/// header fields and is only present for 128-bit trace ids.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct TraceId {
    upper: u64,
    lower: u64,
}

impl TraceId {
    /// Construct a trace id from its upper and lower 64-bit halves.
    pub const fn from_parts(upper: u64, lower: u64) -> Self {
        TraceId { upper, lower }
    }

    /// Converts a string of up to 32 hex digits to a trace id.
    ///
    /// Longer inputs are truncated to the rightmost 32 digits. Leading
    /// zeros are stripped before parsing, so an all-zero input is an
    /// error, as is any non-hex input.
    pub fn from_hex(hex: &str) -> Result<Self, Error> {
        if !hex.is_ascii() {
            return Err(Error::Corrupted);
        }
        let mut hex = hex;
        if hex.len() > 32 {
            hex = &hex[hex.len() - 32..];
        }
        let hex = hex.trim_start_matches('0');
        let mut id = TraceId::default();
        if hex.len() <= 16 {
            id.lower = u64::from_str_radix(hex, 16).map_err(|_| Error::Corrupted)?;
        } else {
            let (upper, lower) = hex.split_at(hex.len() - 16);
            id.upper = u64::from_str_radix(upper, 16).map_err(|_| Error::Corrupted)?;
            id.lower = u64::from_str_radix(lower, 16).map_err(|_| Error::Corrupted)?;
        }
        Ok(id)
    }

    /// Returns `true` when both halves are zero.
    pub fn is_empty(&self) -> bool {
        self.upper == 0 && self.lower == 0
    }

    /// Returns `true` when the id does not fit in 64 bits.
    pub fn has_upper(&self) -> bool {
        self.upper != 0
    }

    /// The lower 64 bits.
    pub fn lower(&self) -> u64 {
        self.lower
    }

    /// The upper 64 bits.
    pub fn upper(&self) -> u64 {
        self.upper
    }

    /// Replaces the lower 64 bits.
    pub fn set_lower(&mut self, lower: u64) {
        self.lower = lower;
    }

    /// Replaces the upper 64 bits.
    pub fn set_upper(&mut self, upper: u64) {
        self.upper = upper;
    }

    /// Replaces the upper 64 bits from exactly 16 hex digits.
    pub fn set_upper_from_hex(&mut self, hex: &str) -> Result<(), Error> {
        if hex.len() != 16 {
            return Err(Error::Corrupted);
        }
        self.upper = u64::from_str_radix(hex, 16).map_err(|_| Error::Corrupted)?;
        Ok(())
    }

    /// The canonical fixed-width 32 digit lowercase hex encoding.
    pub fn hex_encoded(&self) -> String {
        format!("{:016x}{:016x}", self.upper, self.lower)
    }

    /// The upper half as 16 lowercase hex digits.
    pub fn upper_hex(&self) -> String {
        format!("{:016x}", self.upper)
    }
}

impl fmt::Debug for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("{:016x}{:016x}", self.upper, self.lower))
    }
}

impl fmt::Display for TraceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("{:016x}{:016x}", self.upper, self.lower))
    }
}

/// Checks that `id` is a non-empty lowercase hex string, the equivalent of
/// matching `^[a-f0-9]+$` without the regex.
pub(crate) fn is_valid_id(id: &str) -> bool {
    !id.is_empty() && id.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}
