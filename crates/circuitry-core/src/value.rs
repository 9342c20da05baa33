//! Multi-valued logic words.
//!
//! A [`Value`] is a fixed-width vector of per-bit states drawn from
//! {0, 1, X, E}. X is the "floating" state of a bit nobody drives; E marks
//! contention or an undefined computation. Values are `Copy` and never
//! mutated in place: every operation returns a new word.
//!
//! # Merge lattice
//!
//! [`Value::combine`] folds several drivers of one bundle into a single word.
//! Per bit, X is the bottom element, E the top, and 0/1 sit in between:
//!
//! | a \ b | 0 | 1 | X | E |
//! |-------|---|---|---|---|
//! | **0** | 0 | E | 0 | E |
//! | **1** | E | 1 | 1 | E |
//! | **X** | 0 | 1 | X | E |
//! | **E** | E | E | E | E |
//!
//! # Storage
//!
//! Three 64-bit masks hold the bits: `unknown` and `error` flag X and E bits,
//! `value` holds the 1 bits. Bits beyond `width` are always zero, and a bit is
//! never flagged in more than one mask.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Widest value supported.
pub const MAX_WIDTH: u8 = 64;

/// Errors raised when building a value from external input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValueError {
    #[error("bit width {0} exceeds the maximum of 64")]
    WidthTooLarge(usize),
    #[error("invalid bit character {0:?} (expected one of 0, 1, x, E)")]
    InvalidBit(char),
}

// ---------------------------------------------------------------------------
// Bit state
// ---------------------------------------------------------------------------

/// The state of a single bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BitState {
    Zero,
    One,
    /// Floating or not yet computed.
    Unknown,
    /// Contention or an undefined result.
    Error,
}

impl BitState {
    /// Lattice merge of two single bits.
    pub fn combine(self, other: BitState) -> BitState {
        match (self, other) {
            (BitState::Error, _) | (_, BitState::Error) => BitState::Error,
            (BitState::Unknown, b) | (b, BitState::Unknown) => b,
            (a, b) if a == b => a,
            _ => BitState::Error,
        }
    }

    pub fn is_known(self) -> bool {
        matches!(self, BitState::Zero | BitState::One)
    }

    pub fn as_char(self) -> char {
        match self {
            BitState::Zero => '0',
            BitState::One => '1',
            BitState::Unknown => 'x',
            BitState::Error => 'E',
        }
    }

    fn from_char(c: char) -> Result<Self, ValueError> {
        match c {
            '0' => Ok(BitState::Zero),
            '1' => Ok(BitState::One),
            'x' | 'X' | 'z' | 'Z' => Ok(BitState::Unknown),
            'e' | 'E' => Ok(BitState::Error),
            other => Err(ValueError::InvalidBit(other)),
        }
    }
}

impl From<bool> for BitState {
    fn from(b: bool) -> Self {
        if b { BitState::One } else { BitState::Zero }
    }
}

// ---------------------------------------------------------------------------
// Value
// ---------------------------------------------------------------------------

/// An immutable multi-valued logic word of 0..=64 bits.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Value {
    width: u8,
    value: u64,
    unknown: u64,
    error: u64,
}

fn mask_for(width: u8) -> u64 {
    if width >= 64 {
        u64::MAX
    } else {
        (1u64 << width) - 1
    }
}

impl Value {
    /// The zero-width value carried by bundles whose width is undetermined.
    pub const NIL: Value = Value {
        width: 0,
        value: 0,
        unknown: 0,
        error: 0,
    };

    pub const FALSE: Value = Value {
        width: 1,
        value: 0,
        unknown: 0,
        error: 0,
    };

    pub const TRUE: Value = Value {
        width: 1,
        value: 1,
        unknown: 0,
        error: 0,
    };

    /// Build a value from raw masks, normalizing overlapping flags.
    /// Error wins over unknown, unknown wins over a set value bit.
    fn from_masks(width: u8, value: u64, unknown: u64, error: u64) -> Value {
        let width = width.min(MAX_WIDTH);
        let mask = mask_for(width);
        let error = error & mask;
        let unknown = unknown & mask & !error;
        let value = value & mask & !error & !unknown;
        Value {
            width,
            value,
            unknown,
            error,
        }
    }

    /// A fully defined value holding the low `width` bits of `bits`.
    pub fn from_int(width: u8, bits: u64) -> Value {
        Value::from_masks(width, bits, 0, 0)
    }

    /// A value whose bits are all floating.
    pub fn unknown(width: u8) -> Value {
        Value::from_masks(width, 0, u64::MAX, 0)
    }

    /// A value whose bits are all in error.
    pub fn error(width: u8) -> Value {
        Value::from_masks(width, 0, 0, u64::MAX)
    }

    /// A one-bit value.
    pub fn from_bool(b: bool) -> Value {
        if b { Value::TRUE } else { Value::FALSE }
    }

    /// Build a value from bit states, least significant bit first.
    pub fn from_bits(bits: &[BitState]) -> Result<Value, ValueError> {
        if bits.len() > MAX_WIDTH as usize {
            return Err(ValueError::WidthTooLarge(bits.len()));
        }
        let mut value = 0u64;
        let mut unknown = 0u64;
        let mut error = 0u64;
        for (i, bit) in bits.iter().enumerate() {
            match bit {
                BitState::Zero => {}
                BitState::One => value |= 1 << i,
                BitState::Unknown => unknown |= 1 << i,
                BitState::Error => error |= 1 << i,
            }
        }
        Ok(Value::from_masks(bits.len() as u8, value, unknown, error))
    }

    pub fn width(&self) -> u8 {
        self.width
    }

    fn mask(&self) -> u64 {
        mask_for(self.width)
    }

    /// Mask of the bits that are 0 or 1.
    fn known(&self) -> u64 {
        self.mask() & !self.unknown & !self.error
    }

    /// Mask of the bits that are a known 0.
    fn zeros(&self) -> u64 {
        self.known() & !self.value
    }

    /// Mask of the bits in error.
    pub fn error_mask(&self) -> u64 {
        self.error
    }

    /// Mask of the floating bits.
    pub fn unknown_mask(&self) -> u64 {
        self.unknown
    }

    /// Mask of the bits that are a known 1.
    pub fn ones_mask(&self) -> u64 {
        self.value
    }

    /// The state of bit `index`. Bits beyond the width read as unknown.
    pub fn bit(&self, index: u8) -> BitState {
        if index >= self.width {
            return BitState::Unknown;
        }
        let m = 1u64 << index;
        if self.error & m != 0 {
            BitState::Error
        } else if self.unknown & m != 0 {
            BitState::Unknown
        } else if self.value & m != 0 {
            BitState::One
        } else {
            BitState::Zero
        }
    }

    /// Copy of this value with bit `index` replaced. Out-of-range indices
    /// return the value unchanged.
    pub fn with_bit(&self, index: u8, bit: BitState) -> Value {
        if index >= self.width {
            return *self;
        }
        let m = 1u64 << index;
        let mut v = Value {
            value: self.value & !m,
            unknown: self.unknown & !m,
            error: self.error & !m,
            ..*self
        };
        match bit {
            BitState::Zero => {}
            BitState::One => v.value |= m,
            BitState::Unknown => v.unknown |= m,
            BitState::Error => v.error |= m,
        }
        v
    }

    /// Bit states, least significant first.
    pub fn bits(&self) -> impl Iterator<Item = BitState> + '_ {
        (0..self.width).map(move |i| self.bit(i))
    }

    /// `true` if every bit is 0 or 1.
    pub fn is_fully_defined(&self) -> bool {
        self.unknown == 0 && self.error == 0
    }

    /// `true` if the value is non-empty and every bit is floating.
    pub fn is_unknown(&self) -> bool {
        self.width > 0 && self.unknown == self.mask()
    }

    /// `true` if any bit is in error.
    pub fn has_error(&self) -> bool {
        self.error != 0
    }

    /// Unsigned integer view. `None` if any bit is X or E.
    pub fn to_int(&self) -> Option<u64> {
        self.is_fully_defined().then_some(self.value)
    }

    /// Two's complement integer view. `None` if any bit is X or E.
    pub fn to_signed(&self) -> Option<i64> {
        let raw = self.to_int()?;
        if self.width == 0 || self.width >= 64 {
            return Some(raw as i64);
        }
        let shift = 64 - self.width as u32;
        Some(((raw << shift) as i64) >> shift)
    }

    /// Lattice merge used to fold the drivers of one bundle.
    ///
    /// Commutative and associative; the all-X word and [`Value::NIL`] are
    /// identities. Words of different non-zero width cannot share a bundle,
    /// so combining them yields all-E of the larger width.
    pub fn combine(self, other: Value) -> Value {
        if self.width == 0 {
            return other;
        }
        if other.width == 0 {
            return self;
        }
        if self.width != other.width {
            return Value::error(self.width.max(other.width));
        }
        let both_known = self.known() & other.known();
        let disagree = (self.value ^ other.value) & both_known;
        let error = self.error | other.error | disagree;
        let unknown = self.unknown & other.unknown;
        Value::from_masks(self.width, self.value | other.value, unknown, error)
    }

    /// Reinterpret this value at `width`. Matching widths pass through;
    /// anything else reads as all-X of the requested width.
    pub fn fit(self, width: u8) -> Value {
        if self.width == width {
            self
        } else {
            Value::unknown(width)
        }
    }

    // -----------------------------------------------------------------------
    // Bitwise helpers
    // -----------------------------------------------------------------------

    /// Bitwise AND. A known 0 on either side forces 0; otherwise E beats X.
    pub fn and(self, other: Value) -> Value {
        let (a, b) = aligned(self, other);
        let zeros = a.zeros() | b.zeros();
        let error = (a.error | b.error) & !zeros;
        let unknown = (a.unknown | b.unknown) & !zeros;
        Value::from_masks(a.width, a.value & b.value, unknown, error)
    }

    /// Bitwise OR. A known 1 on either side forces 1; otherwise E beats X.
    pub fn or(self, other: Value) -> Value {
        let (a, b) = aligned(self, other);
        let ones = a.value | b.value;
        let error = (a.error | b.error) & !ones;
        let unknown = (a.unknown | b.unknown) & !ones;
        Value::from_masks(a.width, ones, unknown, error)
    }

    /// Bitwise XOR. No controlling value: any E gives E, else any X gives X.
    pub fn xor(self, other: Value) -> Value {
        let (a, b) = aligned(self, other);
        Value::from_masks(
            a.width,
            a.value ^ b.value,
            a.unknown | b.unknown,
            a.error | b.error,
        )
    }

    /// Bitwise NOT. X and E bits are kept as they are.
    pub fn not(self) -> Value {
        Value::from_masks(self.width, !self.value & self.known(), self.unknown, self.error)
    }

    // -----------------------------------------------------------------------
    // Arithmetic helpers
    // -----------------------------------------------------------------------

    /// Ripple-carry addition. Returns `(sum, carry_out)`.
    ///
    /// Once a bit position sees an X or E input (including the carry), that
    /// sum bit and every higher one, plus the carry out, become X, or E when
    /// any tainting bit was E.
    pub fn add(self, other: Value, carry_in: Value) -> (Value, Value) {
        let (a, b) = aligned(self, other);
        let mask = a.mask();
        let carry = carry_in.fit(1);
        let exact = u128::from(a.value) + u128::from(b.value) + u128::from(carry.value & 1);
        let tainted_in = (a.unknown | a.error | b.unknown | b.error) & mask;
        if tainted_in == 0 && carry.is_fully_defined() {
            let carry_out = (exact >> a.width) & 1 == 1;
            return (Value::from_int(a.width, exact as u64), Value::from_bool(carry_out));
        }

        // Positions below the first X or E still carry exactly.
        let first_taint = if carry.is_fully_defined() { tainted_in.trailing_zeros() } else { 0 };
        let errors = (a.error | b.error) & mask;
        let first_error = if carry.has_error() { 0 } else { errors.trailing_zeros() };
        let clean = mask_for(first_taint as u8);
        let error = mask & !clean & !mask_for(first_error as u8);
        let unknown = mask & !clean & !error;
        let sum = Value::from_masks(a.width, exact as u64 & clean, unknown, error);
        let carry_out = if carry.has_error() || errors != 0 {
            Value::error(1)
        } else {
            Value::unknown(1)
        };
        (sum, carry_out)
    }

    /// Ripple-borrow subtraction `self - other - borrow_in`.
    /// Returns `(difference, borrow_out)` with the same taint rules as [`add`].
    ///
    /// [`add`]: Value::add
    pub fn sub(self, other: Value, borrow_in: Value) -> (Value, Value) {
        let (a, b) = aligned(self, other);
        let (diff, carry) = a.add(b.not(), borrow_in.fit(1).not());
        (diff, carry.not())
    }

    // -----------------------------------------------------------------------
    // Slicing
    // -----------------------------------------------------------------------

    /// `width` bits starting at bit `lo`. Bits past the end read as X.
    pub fn extract(&self, lo: u8, width: u8) -> Value {
        let width = width.min(MAX_WIDTH);
        let bits: Vec<BitState> = (0..width)
            .map(|i| lo.checked_add(i).map_or(BitState::Unknown, |j| self.bit(j)))
            .collect();
        Value::from_bits(&bits).unwrap_or(Value::unknown(width))
    }

    /// `self` in the low bits, `high` above it.
    pub fn concat(self, high: Value) -> Result<Value, ValueError> {
        let total = self.width as usize + high.width as usize;
        if total > MAX_WIDTH as usize {
            return Err(ValueError::WidthTooLarge(total));
        }
        let shift = self.width as u32;
        let lift = |m: u64| if shift >= 64 { 0 } else { m << shift };
        Ok(Value::from_masks(
            total as u8,
            self.value | lift(high.value),
            self.unknown | lift(high.unknown),
            self.error | lift(high.error),
        ))
    }
}

/// Bring two operands to the same width. Mismatched operands are treated as
/// an error of the wider width, matching how a bundle with conflicting
/// drivers reads.
fn aligned(a: Value, b: Value) -> (Value, Value) {
    if a.width == b.width {
        (a, b)
    } else {
        let w = a.width.max(b.width);
        (a.fit_or_error(w), b.fit_or_error(w))
    }
}

impl Value {
    fn fit_or_error(self, width: u8) -> Value {
        if self.width == width {
            self
        } else {
            Value::error(width)
        }
    }
}


impl Default for Value {
    fn default() -> Self {
        Value::NIL
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.width == 0 {
            return f.write_str("-");
        }
        for i in (0..self.width).rev() {
            write!(f, "{}", self.bit(i).as_char())?;
        }
        Ok(())
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Value({}'{})", self.width, self)
    }
}

/// Parses bit strings written most significant bit first, e.g. `"01xE"`.
/// Underscores are ignored.
impl FromStr for Value {
    type Err = ValueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bits = s
            .chars()
            .filter(|c| *c != '_')
            .rev()
            .map(BitState::from_char)
            .collect::<Result<Vec<_>, _>>()?;
        Value::from_bits(&bits)
    }
}
