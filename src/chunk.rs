/*
 * Copyright (c) 2025-present Dawid Pawlik
 *
 * For educational use only by employees and students of MIMUW.
 * See LICENSE file for details.
 */

//! # Tier-1 chunk codecs
//!
//! A chunk is a fixed-capacity contiguous run of one column's values, encoded
//! with a type-specific strategy:
//!
//! - **Integer**: frame-of-reference offsets from the chunk minimum, bit-packed
//!   at the minimum width covering the range; width 64 stores raw values when
//!   packing would save nothing, width 0 marks a constant chunk
//! - **Float**: raw 8-byte little-endian storage, lossless
//! - **String**: per-chunk dictionary in first-encountered order plus a
//!   bit-packed code array sized to the dictionary cardinality
//! - **DateTime**: epoch-millisecond integers delegated to the integer codec
//!
//! Each chunk caches min/max/sum (numeric) or cardinality (string) at encode
//! time; chunks are immutable afterwards, so the cached statistics never
//! drift. Columns marked nullable carry a validity bitmap per chunk (bit i
//! set = row i holds a value); statistics cover valid values only.

use crate::ColumnType;
use crate::Value;
use crate::error::EngineError;
use crate::error::Result;
use std::collections::HashMap;

/// Default rows per chunk
pub const DEFAULT_CHUNK_CAPACITY: usize = 65_536;

/// Minimum configurable chunk capacity
pub const MIN_CHUNK_CAPACITY: usize = 256;

/// Maximum configurable chunk capacity
pub const MAX_CHUNK_CAPACITY: usize = 1_048_576;

// ====== Bit packing ======

/// Minimum bit width covering `range`; 0 when all offsets are zero
pub(crate) fn bits_needed(range: u64) -> u8 {
    if range == 0 {
        0
    } else {
        (64 - range.leading_zeros()) as u8
    }
}

/// Pack `values` at `width` bits each, LSB-first within bytes
///
/// Callers guarantee every value fits in `width` bits; width 0 produces no
/// output and width 64 is handled by the raw path in the integer codec.
pub(crate) fn pack_values(values: &[u64], width: u8) -> Vec<u8> {
    if width == 0 {
        return Vec::new();
    }

    let width = width as u32;
    let total_bits = values.len() * width as usize;
    let mut packed = Vec::with_capacity(total_bits.div_ceil(8));

    let mut buffer: u128 = 0;
    let mut bits: u32 = 0;

    for &value in values {
        buffer |= (value as u128) << bits;
        bits += width;

        while bits >= 8 {
            packed.push((buffer & 0xFF) as u8);
            buffer >>= 8;
            bits -= 8;
        }
    }

    if bits > 0 {
        packed.push((buffer & 0xFF) as u8);
    }

    packed
}

/// Smallest run of `width`-bit values whose packed size is a whole number
/// of bytes; value indices that are multiples of this start byte-aligned
pub(crate) fn alignment_period(width: usize) -> usize {
    8 >> width.trailing_zeros().min(3)
}

/// Unpack `count` values of `width` bits each from `packed`
pub(crate) fn unpack_values(packed: &[u8], width: u8, count: usize) -> Result<Vec<u64>> {
    if width == 0 {
        return Ok(vec![0; count]);
    }

    let width = width as u32;
    let needed_bytes = (count * width as usize).div_ceil(8);
    if packed.len() < needed_bytes {
        return Err(EngineError::decode(format!(
            "Packed data truncated: need {} bytes for {} values of width {}, got {}",
            needed_bytes,
            count,
            width,
            packed.len()
        )));
    }

    let mask: u128 = if width == 64 {
        u64::MAX as u128
    } else {
        (1u128 << width) - 1
    };

    let mut values = Vec::with_capacity(count);
    let mut buffer: u128 = 0;
    let mut bits: u32 = 0;
    let mut pos = 0;

    for _ in 0..count {
        while bits < width {
            buffer |= (packed[pos] as u128) << bits;
            pos += 1;
            bits += 8;
        }
        values.push((buffer & mask) as u64);
        buffer >>= width;
        bits -= width;
    }

    Ok(values)
}

/// Unpack the single value at `index` without touching the rest of the chunk
pub(crate) fn unpack_one(packed: &[u8], width: u8, index: usize) -> Result<u64> {
    if width == 0 {
        return Ok(0);
    }

    let width = width as u32;
    let bit_pos = index * width as usize;
    let first_byte = bit_pos / 8;
    let shift = (bit_pos % 8) as u32;
    let last_byte = (bit_pos + width as usize - 1) / 8;

    if last_byte >= packed.len() {
        return Err(EngineError::decode(format!(
            "Packed index {} out of bounds for width {}",
            index, width
        )));
    }

    let mut window: u128 = 0;
    for (i, &byte) in packed[first_byte..=last_byte].iter().enumerate() {
        window |= (byte as u128) << (8 * i as u32);
    }

    let mask: u128 = if width == 64 {
        u64::MAX as u128
    } else {
        (1u128 << width) - 1
    };

    Ok(((window >> shift) & mask) as u64)
}

// ====== Validity bitmaps ======

/// Build a validity bitmap from per-slot flags (bit i set = slot i valid)
pub(crate) fn build_validity(valid: &[bool]) -> Vec<u8> {
    let mut bitmap = vec![0u8; valid.len().div_ceil(8)];
    for (i, &flag) in valid.iter().enumerate() {
        if flag {
            bitmap[i >> 3] |= 1 << (i & 7);
        }
    }
    bitmap
}

pub(crate) fn validity_bit(bitmap: &[u8], index: usize) -> bool {
    (bitmap[index >> 3] & (1 << (index & 7))) != 0
}

// ====== Body reading ======

/// Cursor over a Tier-1 chunk body with bounds-checked reads
struct BodyReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> BodyReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        BodyReader { bytes, pos: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.pos + len > self.bytes.len() {
            return Err(EngineError::decode(format!(
                "Chunk body truncated at offset {}: need {} bytes, {} remain",
                self.pos,
                len,
                self.bytes.len() - self.pos
            )));
        }
        let slice = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn read_u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_i64(&mut self) -> Result<i64> {
        let b = self.take(8)?;
        Ok(i64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

    fn read_f64(&mut self) -> Result<f64> {
        let b = self.take(8)?;
        Ok(f64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ]))
    }

}

// ====== Integer chunk ======

/// Frame-of-reference bit-packed integers (also backs DateTime chunks)
#[derive(Debug, Clone)]
pub struct IntegerChunk {
    len: usize,
    min: i64,
    max: i64,
    sum: i64,
    valid_count: usize,
    bit_width: u8,
    packed: Vec<u8>,
    validity: Option<Vec<u8>>,
}

impl IntegerChunk {
    /// Encode a run of values with no nulls
    pub fn encode(values: &[i64]) -> Self {
        let mut min = i64::MAX;
        let mut max = i64::MIN;
        let mut sum = 0i64;

        for &v in values {
            min = min.min(v);
            max = max.max(v);
            sum = sum.wrapping_add(v);
        }

        if values.is_empty() {
            min = 0;
            max = 0;
        }

        let (bit_width, packed) = Self::pack(values, min, max);

        IntegerChunk {
            len: values.len(),
            min,
            max,
            sum,
            valid_count: values.len(),
            bit_width,
            packed,
            validity: None,
        }
    }

    /// Encode a run containing nulls; null slots pack as zero offsets
    pub fn encode_nullable(values: &[Option<i64>]) -> Self {
        let mut min = i64::MAX;
        let mut max = i64::MIN;
        let mut sum = 0i64;
        let mut valid_count = 0usize;

        for v in values.iter().flatten() {
            min = min.min(*v);
            max = max.max(*v);
            sum = sum.wrapping_add(*v);
            valid_count += 1;
        }

        if valid_count == 0 {
            min = 0;
            max = 0;
        }

        let filled: Vec<i64> = values.iter().map(|v| v.unwrap_or(min)).collect();
        let (bit_width, packed) = Self::pack(&filled, min, max);

        let validity = if valid_count == values.len() {
            None
        } else {
            let flags: Vec<bool> = values.iter().map(|v| v.is_some()).collect();
            Some(build_validity(&flags))
        };

        IntegerChunk {
            len: values.len(),
            min,
            max,
            sum,
            valid_count,
            bit_width,
            packed,
            validity,
        }
    }

    fn pack(values: &[i64], min: i64, max: i64) -> (u8, Vec<u8>) {
        let range = max.wrapping_sub(min) as u64;
        let width = bits_needed(range);

        if width >= 64 {
            // Packing saves nothing over raw storage
            let mut raw = Vec::with_capacity(values.len() * 8);
            for &v in values {
                raw.extend_from_slice(&v.to_le_bytes());
            }
            (64, raw)
        } else {
            let offsets: Vec<u64> = values
                .iter()
                .map(|&v| v.wrapping_sub(min) as u64)
                .collect();
            (width, pack_values(&offsets, width))
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn bit_width(&self) -> u8 {
        self.bit_width
    }

    pub fn valid_count(&self) -> usize {
        self.valid_count
    }

    pub fn min(&self) -> Option<i64> {
        (self.valid_count > 0).then_some(self.min)
    }

    pub fn max(&self) -> Option<i64> {
        (self.valid_count > 0).then_some(self.max)
    }

    pub fn sum(&self) -> i64 {
        self.sum
    }

    pub fn is_valid(&self, index: usize) -> bool {
        match &self.validity {
            Some(bitmap) => validity_bit(bitmap, index),
            None => true,
        }
    }

    /// Decode the raw integer at `index`, ignoring validity
    fn raw_value(&self, index: usize) -> Result<i64> {
        if self.bit_width == 64 {
            let start = index * 8;
            if start + 8 > self.packed.len() {
                return Err(EngineError::decode(format!(
                    "Raw integer index {} out of bounds",
                    index
                )));
            }
            let b = &self.packed[start..start + 8];
            Ok(i64::from_le_bytes([
                b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
            ]))
        } else {
            let offset = unpack_one(&self.packed, self.bit_width, index)?;
            Ok(self.min.wrapping_add(offset as i64))
        }
    }

    pub fn value(&self, index: usize) -> Result<Option<i64>> {
        if index >= self.len {
            return Err(EngineError::decode(format!(
                "Row index {} out of chunk bounds ({})",
                index, self.len
            )));
        }
        if !self.is_valid(index) {
            return Ok(None);
        }
        Ok(Some(self.raw_value(index)?))
    }

    /// Decode `end - start` values in one pass; `None` marks null slots
    pub fn decode_range(&self, start: usize, end: usize) -> Result<Vec<Option<i64>>> {
        if start > end || end > self.len {
            return Err(EngineError::decode(format!(
                "Range {}..{} out of chunk bounds ({})",
                start, end, self.len
            )));
        }

        let raw: Vec<i64> = if self.bit_width == 64 {
            self.packed[start * 8..end * 8]
                .chunks_exact(8)
                .map(|b| i64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
                .collect()
        } else {
            // Back up to a byte-aligned value boundary, then drop the
            // lead-in values after unpacking
            let width = self.bit_width as usize;
            let from = start - start % alignment_period(width);
            let first_byte = from * width / 8;
            let unpacked = unpack_values(&self.packed[first_byte..], self.bit_width, end - from)?;
            unpacked[start - from..]
                .iter()
                .map(|&off| self.min.wrapping_add(off as i64))
                .collect()
        };

        match &self.validity {
            Some(bitmap) => Ok(raw
                .into_iter()
                .enumerate()
                .map(|(i, v)| validity_bit(bitmap, start + i).then_some(v))
                .collect()),
            None => Ok(raw.into_iter().map(Some).collect()),
        }
    }

    pub fn to_body(&self) -> Vec<u8> {
        let mut body = Vec::with_capacity(30 + self.packed.len());
        body.extend_from_slice(&(self.len as u32).to_le_bytes());
        body.extend_from_slice(&self.min.to_le_bytes());
        body.extend_from_slice(&self.max.to_le_bytes());
        body.extend_from_slice(&self.sum.to_le_bytes());

        match &self.validity {
            Some(bitmap) => {
                body.push(1);
                body.extend_from_slice(bitmap);
            }
            None => body.push(0),
        }

        body.push(self.bit_width);
        body.extend_from_slice(&self.packed);
        body
    }

    pub fn from_body(bytes: &[u8]) -> Result<Self> {
        let mut reader = BodyReader::new(bytes);
        let len = reader.read_u32()? as usize;
        let min = reader.read_i64()?;
        let max = reader.read_i64()?;
        let sum = reader.read_i64()?;
        let null_flag = reader.read_u8()?;

        let validity = if null_flag == 1 {
            Some(reader.take(len.div_ceil(8))?.to_vec())
        } else {
            None
        };

        let bit_width = reader.read_u8()?;
        if bit_width > 64 {
            return Err(EngineError::decode(format!(
                "Invalid bit width {} in integer chunk",
                bit_width
            )));
        }

        let packed_len = if bit_width == 64 {
            len * 8
        } else {
            (len * bit_width as usize).div_ceil(8)
        };
        let packed = reader.take(packed_len)?.to_vec();

        let valid_count = match &validity {
            Some(bitmap) => (0..len).filter(|&i| validity_bit(bitmap, i)).count(),
            None => len,
        };

        Ok(IntegerChunk {
            len,
            min,
            max,
            sum,
            valid_count,
            bit_width,
            packed,
            validity,
        })
    }

    pub fn heap_size(&self) -> usize {
        self.packed.len() + self.validity.as_ref().map_or(0, |v| v.len())
    }
}

// ====== Float chunk ======

/// Raw 8-byte float storage with cached statistics
#[derive(Debug, Clone)]
pub struct FloatChunk {
    min: f64,
    max: f64,
    sum: f64,
    valid_count: usize,
    values: Vec<f64>,
    validity: Option<Vec<u8>>,
}

impl FloatChunk {
    pub fn encode(values: &[f64]) -> Self {
        let (min, max, sum) = Self::stats(values.iter().copied());

        FloatChunk {
            min,
            max,
            sum,
            valid_count: values.len(),
            values: values.to_vec(),
            validity: None,
        }
    }

    pub fn encode_nullable(values: &[Option<f64>]) -> Self {
        let (min, max, sum) = Self::stats(values.iter().flatten().copied());
        let valid_count = values.iter().filter(|v| v.is_some()).count();

        let validity = if valid_count == values.len() {
            None
        } else {
            let flags: Vec<bool> = values.iter().map(|v| v.is_some()).collect();
            Some(build_validity(&flags))
        };

        FloatChunk {
            min,
            max,
            sum,
            valid_count,
            values: values.iter().map(|v| v.unwrap_or(0.0)).collect(),
            validity,
        }
    }

    /// Statistics over finite values only; NaN and infinities stay stored but
    /// never poison min/max/sum
    fn stats(values: impl Iterator<Item = f64>) -> (f64, f64, f64) {
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        let mut sum = 0.0;
        let mut any = false;

        for v in values {
            if v.is_finite() {
                min = min.min(v);
                max = max.max(v);
                sum += v;
                any = true;
            }
        }

        if !any {
            (0.0, 0.0, 0.0)
        } else {
            (min, max, sum)
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn valid_count(&self) -> usize {
        self.valid_count
    }

    pub fn min(&self) -> Option<f64> {
        (self.valid_count > 0).then_some(self.min)
    }

    pub fn max(&self) -> Option<f64> {
        (self.valid_count > 0).then_some(self.max)
    }

    pub fn sum(&self) -> f64 {
        self.sum
    }

    pub fn is_valid(&self, index: usize) -> bool {
        match &self.validity {
            Some(bitmap) => validity_bit(bitmap, index),
            None => true,
        }
    }

    pub fn value(&self, index: usize) -> Result<Option<f64>> {
        if index >= self.values.len() {
            return Err(EngineError::decode(format!(
                "Row index {} out of chunk bounds ({})",
                index,
                self.values.len()
            )));
        }
        if !self.is_valid(index) {
            return Ok(None);
        }
        Ok(Some(self.values[index]))
    }

    pub fn decode_range(&self, start: usize, end: usize) -> Result<Vec<Option<f64>>> {
        if start > end || end > self.values.len() {
            return Err(EngineError::decode(format!(
                "Range {}..{} out of chunk bounds ({})",
                start,
                end,
                self.values.len()
            )));
        }

        match &self.validity {
            Some(bitmap) => Ok(self.values[start..end]
                .iter()
                .enumerate()
                .map(|(i, &v)| validity_bit(bitmap, start + i).then_some(v))
                .collect()),
            None => Ok(self.values[start..end].iter().map(|&v| Some(v)).collect()),
        }
    }

    pub fn to_body(&self) -> Vec<u8> {
        let mut body = Vec::with_capacity(29 + self.values.len() * 8);
        body.extend_from_slice(&(self.values.len() as u32).to_le_bytes());
        body.extend_from_slice(&self.min.to_le_bytes());
        body.extend_from_slice(&self.max.to_le_bytes());
        body.extend_from_slice(&self.sum.to_le_bytes());

        match &self.validity {
            Some(bitmap) => {
                body.push(1);
                body.extend_from_slice(bitmap);
            }
            None => body.push(0),
        }

        for &v in &self.values {
            body.extend_from_slice(&v.to_le_bytes());
        }
        body
    }

    pub fn from_body(bytes: &[u8]) -> Result<Self> {
        let mut reader = BodyReader::new(bytes);
        let len = reader.read_u32()? as usize;
        let min = reader.read_f64()?;
        let max = reader.read_f64()?;
        let sum = reader.read_f64()?;
        let null_flag = reader.read_u8()?;

        let validity = if null_flag == 1 {
            Some(reader.take(len.div_ceil(8))?.to_vec())
        } else {
            None
        };

        let raw = reader.take(len * 8)?;
        let values: Vec<f64> = raw
            .chunks_exact(8)
            .map(|b| f64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
            .collect();

        let valid_count = match &validity {
            Some(bitmap) => (0..len).filter(|&i| validity_bit(bitmap, i)).count(),
            None => len,
        };

        Ok(FloatChunk {
            min,
            max,
            sum,
            valid_count,
            values,
            validity,
        })
    }

    pub fn heap_size(&self) -> usize {
        self.values.len() * 8 + self.validity.as_ref().map_or(0, |v| v.len())
    }
}

// ====== String chunk ======

/// Dictionary-encoded strings: distinct values in first-encountered order,
/// codes bit-packed at the width covering the cardinality
#[derive(Debug, Clone)]
pub struct StringChunk {
    len: usize,
    dictionary: Vec<String>,
    code_width: u8,
    codes: Vec<u8>,
}

impl StringChunk {
    pub fn encode(values: &[String]) -> Self {
        let mut dictionary = Vec::new();
        let mut index: HashMap<&str, u64> = HashMap::new();
        let mut codes = Vec::with_capacity(values.len());

        for value in values {
            let code = match index.get(value.as_str()) {
                Some(&code) => code,
                None => {
                    let code = dictionary.len() as u64;
                    index.insert(value.as_str(), code);
                    dictionary.push(value.clone());
                    code
                }
            };
            codes.push(code);
        }

        let code_width = if dictionary.len() <= 1 {
            0
        } else {
            bits_needed(dictionary.len() as u64 - 1)
        };

        StringChunk {
            len: values.len(),
            code_width,
            codes: pack_values(&codes, code_width),
            dictionary,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of distinct values in this chunk
    pub fn cardinality(&self) -> usize {
        self.dictionary.len()
    }

    pub fn code_width(&self) -> u8 {
        self.code_width
    }

    pub fn dictionary(&self) -> &[String] {
        &self.dictionary
    }

    pub fn value(&self, index: usize) -> Result<&str> {
        if index >= self.len {
            return Err(EngineError::decode(format!(
                "Row index {} out of chunk bounds ({})",
                index, self.len
            )));
        }
        let code = unpack_one(&self.codes, self.code_width, index)? as usize;
        self.dictionary
            .get(code)
            .map(|s| s.as_str())
            .ok_or_else(|| EngineError::decode(format!("Dictionary code {} out of range", code)))
    }

    pub fn decode_range(&self, start: usize, end: usize) -> Result<Vec<String>> {
        if start > end || end > self.len {
            return Err(EngineError::decode(format!(
                "Range {}..{} out of chunk bounds ({})",
                start, end, self.len
            )));
        }

        let codes = if self.code_width == 0 {
            vec![0u64; end - start]
        } else {
            let width = self.code_width as usize;
            let from = start - start % alignment_period(width);
            let first_byte = from * width / 8;
            let unpacked = unpack_values(&self.codes[first_byte..], self.code_width, end - from)?;
            unpacked[start - from..].to_vec()
        };

        codes
            .into_iter()
            .map(|code| {
                self.dictionary
                    .get(code as usize)
                    .cloned()
                    .ok_or_else(|| {
                        EngineError::decode(format!("Dictionary code {} out of range", code))
                    })
            })
            .collect()
    }

    pub fn to_body(&self) -> Vec<u8> {
        let dict_bytes: usize = self.dictionary.iter().map(|s| s.len() + 4).sum();
        let mut body = Vec::with_capacity(9 + dict_bytes + self.codes.len());

        body.extend_from_slice(&(self.len as u32).to_le_bytes());
        body.extend_from_slice(&(self.dictionary.len() as u32).to_le_bytes());

        for entry in &self.dictionary {
            body.extend_from_slice(&(entry.len() as u32).to_le_bytes());
            body.extend_from_slice(entry.as_bytes());
        }

        body.push(self.code_width);
        body.extend_from_slice(&self.codes);
        body
    }

    pub fn from_body(bytes: &[u8]) -> Result<Self> {
        let mut reader = BodyReader::new(bytes);
        let len = reader.read_u32()? as usize;
        let dict_len = reader.read_u32()? as usize;

        let mut dictionary = Vec::with_capacity(dict_len);
        for _ in 0..dict_len {
            let entry_len = reader.read_u32()? as usize;
            let raw = reader.take(entry_len)?;
            let entry = String::from_utf8(raw.to_vec())
                .map_err(|_| EngineError::decode("Invalid UTF-8 in string dictionary"))?;
            dictionary.push(entry);
        }

        let code_width = reader.read_u8()?;
        if code_width > 32 {
            return Err(EngineError::decode(format!(
                "Invalid code width {} in string chunk",
                code_width
            )));
        }

        let packed_len = (len * code_width as usize).div_ceil(8);
        let codes = reader.take(packed_len)?.to_vec();

        Ok(StringChunk {
            len,
            dictionary,
            code_width,
            codes,
        })
    }

    pub fn heap_size(&self) -> usize {
        let dict: usize = self.dictionary.iter().map(|s| s.len() + 24).sum();
        dict + self.codes.len()
    }
}

// ====== Chunk dispatch ======

/// One encoded chunk of any logical type
///
/// DateTime chunks reuse the integer codec over epoch milliseconds; only the
/// value mapping differs.
#[derive(Debug, Clone)]
pub enum Chunk {
    Integer(IntegerChunk),
    Float(FloatChunk),
    String(StringChunk),
    DateTime(IntegerChunk),
}

impl Chunk {
    pub fn column_type(&self) -> ColumnType {
        match self {
            Chunk::Integer(_) => ColumnType::Integer,
            Chunk::Float(_) => ColumnType::Float,
            Chunk::String(_) => ColumnType::String,
            Chunk::DateTime(_) => ColumnType::DateTime,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Chunk::Integer(c) | Chunk::DateTime(c) => c.len(),
            Chunk::Float(c) => c.len(),
            Chunk::String(c) => c.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn value(&self, index: usize) -> Result<Value> {
        match self {
            Chunk::Integer(c) => Ok(c
                .value(index)?
                .map(Value::Integer)
                .unwrap_or(Value::Null)),
            Chunk::DateTime(c) => Ok(c
                .value(index)?
                .map(Value::DateTime)
                .unwrap_or(Value::Null)),
            Chunk::Float(c) => Ok(c.value(index)?.map(Value::Float).unwrap_or(Value::Null)),
            Chunk::String(c) => Ok(Value::String(c.value(index)?.to_string())),
        }
    }

    /// Append the whole chunk to `out` as typed values
    pub fn append_values(&self, out: &mut Vec<Value>) -> Result<()> {
        match self {
            Chunk::Integer(c) => {
                for v in c.decode_range(0, c.len())? {
                    out.push(v.map(Value::Integer).unwrap_or(Value::Null));
                }
            }
            Chunk::DateTime(c) => {
                for v in c.decode_range(0, c.len())? {
                    out.push(v.map(Value::DateTime).unwrap_or(Value::Null));
                }
            }
            Chunk::Float(c) => {
                for v in c.decode_range(0, c.len())? {
                    out.push(v.map(Value::Float).unwrap_or(Value::Null));
                }
            }
            Chunk::String(c) => {
                for v in c.decode_range(0, c.len())? {
                    out.push(Value::String(v));
                }
            }
        }
        Ok(())
    }

    /// Append the whole chunk to `out` as f64, mapping null to NaN
    ///
    /// Fails with a `Type` error for string chunks.
    pub fn append_f64(&self, out: &mut Vec<f64>) -> Result<()> {
        match self {
            Chunk::Integer(c) | Chunk::DateTime(c) => {
                for v in c.decode_range(0, c.len())? {
                    out.push(v.map(|x| x as f64).unwrap_or(f64::NAN));
                }
            }
            Chunk::Float(c) => {
                for v in c.decode_range(0, c.len())? {
                    out.push(v.unwrap_or(f64::NAN));
                }
            }
            Chunk::String(_) => {
                return Err(EngineError::Type {
                    field: String::new(),
                    op: "dense f64 extraction".to_string(),
                    expected: "a numeric column".to_string(),
                    actual: "string".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Valid (non-null) slots in this chunk
    pub fn valid_count(&self) -> usize {
        match self {
            Chunk::Integer(c) | Chunk::DateTime(c) => c.valid_count(),
            Chunk::Float(c) => c.valid_count(),
            Chunk::String(c) => c.len(),
        }
    }

    /// Chunk minimum as f64 (numeric chunks with at least one valid value)
    pub fn min_f64(&self) -> Option<f64> {
        match self {
            Chunk::Integer(c) | Chunk::DateTime(c) => c.min().map(|v| v as f64),
            Chunk::Float(c) => c.min(),
            Chunk::String(_) => None,
        }
    }

    pub fn max_f64(&self) -> Option<f64> {
        match self {
            Chunk::Integer(c) | Chunk::DateTime(c) => c.max().map(|v| v as f64),
            Chunk::Float(c) => c.max(),
            Chunk::String(_) => None,
        }
    }

    pub fn sum_f64(&self) -> f64 {
        match self {
            Chunk::Integer(c) | Chunk::DateTime(c) => c.sum() as f64,
            Chunk::Float(c) => c.sum(),
            Chunk::String(_) => 0.0,
        }
    }

    pub fn cardinality(&self) -> Option<usize> {
        match self {
            Chunk::String(c) => Some(c.cardinality()),
            _ => None,
        }
    }

    pub fn to_body(&self) -> Vec<u8> {
        match self {
            Chunk::Integer(c) | Chunk::DateTime(c) => c.to_body(),
            Chunk::Float(c) => c.to_body(),
            Chunk::String(c) => c.to_body(),
        }
    }

    pub fn from_body(bytes: &[u8], column_type: ColumnType) -> Result<Self> {
        match column_type {
            ColumnType::Integer => Ok(Chunk::Integer(IntegerChunk::from_body(bytes)?)),
            ColumnType::DateTime => Ok(Chunk::DateTime(IntegerChunk::from_body(bytes)?)),
            ColumnType::Float => Ok(Chunk::Float(FloatChunk::from_body(bytes)?)),
            ColumnType::String => Ok(Chunk::String(StringChunk::from_body(bytes)?)),
        }
    }

    pub fn heap_size(&self) -> usize {
        match self {
            Chunk::Integer(c) | Chunk::DateTime(c) => c.heap_size(),
            Chunk::Float(c) => c.heap_size(),
            Chunk::String(c) => c.heap_size(),
        }
    }
}

// ====== Chunk description ======

/// Summary of one encoded chunk, readable from its body prefix without
/// decoding any values
#[derive(Debug, Clone, serde::Serialize)]
pub struct ChunkDescription {
    pub element_count: usize,
    pub bit_width: Option<u8>,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub cardinality: Option<usize>,
}

/// Describe a Tier-1 body by reading its prefix only
pub fn describe_body(bytes: &[u8], column_type: ColumnType) -> Result<ChunkDescription> {
    let mut reader = BodyReader::new(bytes);

    match column_type {
        ColumnType::Integer | ColumnType::DateTime => {
            let len = reader.read_u32()? as usize;
            let min = reader.read_i64()?;
            let max = reader.read_i64()?;
            let _sum = reader.read_i64()?;
            let null_flag = reader.read_u8()?;
            if null_flag == 1 {
                reader.take(len.div_ceil(8))?;
            }
            let bit_width = reader.read_u8()?;

            Ok(ChunkDescription {
                element_count: len,
                bit_width: Some(bit_width),
                min: Some(min as f64),
                max: Some(max as f64),
                cardinality: None,
            })
        }
        ColumnType::Float => {
            let len = reader.read_u32()? as usize;
            let min = reader.read_f64()?;
            let max = reader.read_f64()?;

            Ok(ChunkDescription {
                element_count: len,
                bit_width: None,
                min: Some(min),
                max: Some(max),
                cardinality: None,
            })
        }
        ColumnType::String => {
            let len = reader.read_u32()? as usize;
            let dict_len = reader.read_u32()? as usize;

            Ok(ChunkDescription {
                element_count: len,
                bit_width: None,
                min: None,
                max: None,
                cardinality: Some(dict_len),
            })
        }
    }
}
