//! Binary packing for cross-worker transfer
//!
//! Heterogeneous records (counts, element ids, small enumerations, floating
//! point coordinates and weights) are flattened into a sequence of fixed-width
//! 64-bit transfer units. Consecutive small fields are coalesced into one unit
//! while they jointly fit; a field that would straddle a unit boundary starts
//! a fresh unit instead of splitting. Unpacking must issue the exact same
//! sequence of calls as packing, so variable-length parts are always preceded
//! by their count.

use crate::common::Float;

/// One fixed-width transfer unit.
pub type TransferUnit = u64;

/// Reserved id marking an absent element reference. Packs without a lookup
/// and unpacks to `None`.
pub const INVALID_PACKED_ID: TransferUnit = TransferUnit::MAX;

/// Write half of the packing protocol. Accumulates transfer units.
#[derive(Default)]
pub struct PackBuffer {
    /// The packed transfer units.
    words: Vec<TransferUnit>,

    /// Bits consumed in the trailing, still-open unit; 0 if no unit is open.
    used_bits: u32,
}

impl PackBuffer {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Packs a small unsigned field of the given width.
    ///
    /// Coalesces into the open unit when the field fits in its remaining
    /// bits; otherwise starts a fresh unit.
    ///
    /// * `value` - The field value; must fit in `bits`.
    /// * `bits`  - Field width, 1..=64.
    pub fn pack_small(&mut self, value: u64, bits: u32) {
        debug_assert!(bits >= 1 && bits <= 64);
        debug_assert!(bits == 64 || value >> bits == 0, "value does not fit in field");

        if self.used_bits > 0 && bits <= 64 - self.used_bits {
            *self.words.last_mut().unwrap() |= value << self.used_bits;
            self.used_bits += bits;
        } else {
            self.words.push(value);
            self.used_bits = bits;
        }
        if self.used_bits == 64 {
            self.used_bits = 0;
        }
    }

    /// Packs a count prefix for a variable-length part.
    ///
    /// * `n` - The count.
    pub fn pack_count(&mut self, n: usize) {
        self.pack_small(n as u64, 32);
    }

    /// Packs a floating point value bit-exactly into a full unit.
    ///
    /// * `f` - The value.
    pub fn pack_float(&mut self, f: Float) {
        self.close();
        self.words.push(f.to_bits());
    }

    /// Packs an optional worker-independent numeric id into a full unit.
    /// Absent ids pack to the reserved sentinel.
    ///
    /// * `id` - The id, if any.
    pub fn pack_id(&mut self, id: Option<u64>) {
        debug_assert!(id != Some(INVALID_PACKED_ID), "id collides with the sentinel");
        self.close();
        self.words.push(id.unwrap_or(INVALID_PACKED_ID));
    }

    /// Number of transfer units produced so far.
    pub fn len(&self) -> usize {
        self.words.len()
    }

    /// Whether nothing has been packed.
    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Consumes the buffer, yielding the transfer units.
    pub fn into_words(self) -> Vec<TransferUnit> {
        self.words
    }

    /// Closes any partially filled unit so the next field starts fresh.
    fn close(&mut self) {
        self.used_bits = 0;
    }
}

/// Read half of the packing protocol. Must consume units in the exact order
/// and grouping used by the writer.
pub struct PackReader<'a> {
    /// The packed transfer units.
    words: &'a [TransferUnit],

    /// Index of the unit currently being read.
    pos: usize,

    /// Bits consumed in the unit at `pos`; 0 if it is untouched.
    used_bits: u32,
}

impl<'a> PackReader<'a> {
    /// Creates a reader over packed transfer units.
    ///
    /// * `words` - The units produced by a `PackBuffer`.
    pub fn new(words: &'a [TransferUnit]) -> Self {
        Self { words, pos: 0, used_bits: 0 }
    }

    /// Reads a small unsigned field of the given width.
    ///
    /// * `bits` - Field width, 1..=64; must match the width used to pack.
    pub fn read_small(&mut self, bits: u32) -> u64 {
        debug_assert!(bits >= 1 && bits <= 64);

        if self.used_bits == 0 || bits > 64 - self.used_bits {
            self.close();
        }
        let mask = if bits == 64 { u64::MAX } else { (1u64 << bits) - 1 };
        let value = (self.words[self.pos] >> self.used_bits) & mask;
        self.used_bits += bits;
        if self.used_bits >= 64 {
            self.pos += 1;
            self.used_bits = 0;
        }
        value
    }

    /// Reads a count prefix.
    pub fn read_count(&mut self) -> usize {
        self.read_small(32) as usize
    }

    /// Reads a floating point value from a full unit.
    pub fn read_float(&mut self) -> Float {
        self.close();
        let f = Float::from_bits(self.words[self.pos]);
        self.pos += 1;
        f
    }

    /// Reads an optional id from a full unit. The sentinel yields `None`.
    pub fn read_id(&mut self) -> Option<u64> {
        self.close();
        let raw = self.words[self.pos];
        self.pos += 1;
        (raw != INVALID_PACKED_ID).then_some(raw)
    }

    /// Number of transfer units fully or partially consumed so far.
    pub fn units_consumed(&self) -> usize {
        self.pos + usize::from(self.used_bits > 0)
    }

    /// Whether every unit has been consumed.
    pub fn is_exhausted(&self) -> bool {
        self.units_consumed() == self.words.len()
    }

    /// Skips the remainder of a partially read unit.
    fn close(&mut self) {
        if self.used_bits > 0 {
            self.pos += 1;
            self.used_bits = 0;
        }
    }
}

/// A record that can be flattened into transfer units and reconstructed
/// losslessly.
pub trait Packable: Sized {
    /// Appends this record to the buffer.
    ///
    /// * `buf` - Destination buffer.
    fn pack(&self, buf: &mut PackBuffer);

    /// Reconstructs a record, consuming exactly the units `pack` produced.
    ///
    /// * `reader` - Source reader.
    fn unpack(reader: &mut PackReader) -> Self;
}

/// Packs a slice of records behind a count prefix into a fresh unit sequence.
///
/// * `items` - The records.
pub fn pack_vec<T: Packable>(items: &[T]) -> Vec<TransferUnit> {
    let mut buf = PackBuffer::new();
    buf.pack_count(items.len());
    for item in items {
        item.pack(&mut buf);
    }
    buf.into_words()
}

/// Unpacks a count-prefixed sequence of records.
///
/// * `words` - The packed units.
pub fn unpack_vec<T: Packable>(words: &[TransferUnit]) -> Vec<T> {
    let mut reader = PackReader::new(words);
    let n = reader.read_count();
    let mut items = Vec::with_capacity(n);
    for _ in 0..n {
        items.push(T::unpack(&mut reader));
    }
    debug_assert!(reader.is_exhausted(), "trailing transfer units after unpack");
    items
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
