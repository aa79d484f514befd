//! Zero-copy reader over an encoded value region.
//!
//! A [`Value`] is an offset into an encoded byte region. The first byte at
//! the offset is the type tag; what follows depends on the tag. Navigation
//! (`next`, array/dict iteration, dict lookup) produces further `Value`s
//! into the same region, so decoded data is never copied. Shared-string
//! references are resolved against the region start, which is why a value
//! carries the whole region and its own offset rather than a subslice.

use std::io::Cursor;

use byteorder::{ByteOrder, LittleEndian};

use super::varint;
use crate::error::{Error, Result};
use crate::errvalue;

// Type tags. The wire order is fixed; the reader's class table below and the
// encoder must agree on it.
pub const TAG_NULL: u8 = 0x00;
pub const TAG_FALSE: u8 = 0x01;
pub const TAG_TRUE: u8 = 0x02;
pub const TAG_INT8: u8 = 0x03;
pub const TAG_INT16: u8 = 0x04;
pub const TAG_INT32: u8 = 0x05;
pub const TAG_INT64: u8 = 0x06;
pub const TAG_UINT64: u8 = 0x07;
pub const TAG_FLOAT32: u8 = 0x08;
pub const TAG_FLOAT64: u8 = 0x09;
pub const TAG_RAW_NUMBER: u8 = 0x0A;
pub const TAG_DATE: u8 = 0x0B;
pub const TAG_STRING: u8 = 0x0C;
pub const TAG_SHARED_STRING: u8 = 0x0D;
pub const TAG_SHARED_STRING_REF: u8 = 0x0E;
pub const TAG_EXTERN_STRING: u8 = 0x0F;
pub const TAG_EXTERN_STRING_REF: u8 = 0x10;
pub const TAG_DATA: u8 = 0x11;
pub const TAG_ARRAY: u8 = 0x12;
pub const TAG_DICT: u8 = 0x13;

/// Abstract class of an encoded value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    Null,
    Bool,
    Number,
    String,
    Data,
    Array,
    Dict,
}

// Tag -> class table. Dates are numbers (seconds); all five string tags
// collapse to String.
const VALUE_TYPES: [ValueType; 20] = [
    ValueType::Null,
    ValueType::Bool,
    ValueType::Bool,
    ValueType::Number,
    ValueType::Number,
    ValueType::Number,
    ValueType::Number,
    ValueType::Number,
    ValueType::Number,
    ValueType::Number,
    ValueType::Number,
    ValueType::Number,
    ValueType::String,
    ValueType::String,
    ValueType::String,
    ValueType::String,
    ValueType::String,
    ValueType::Data,
    ValueType::Array,
    ValueType::Dict,
];

// Offset of the first key after a dict's hash index, bounds-checked.
fn dict_slots_end(after: usize, count: u64, region_len: usize) -> Result<usize> {
    (count as usize)
        .checked_mul(2)
        .and_then(|slots| after.checked_add(slots))
        .filter(|&end| end <= region_len)
        .ok_or_else(|| Error::MalformedValue("dict hash index overruns region".to_string()))
}

/// Computes the 16-bit hash a dict's index stores for a key.
pub fn hash_code(key: &[u8]) -> u16 {
    // Infallible over an in-memory cursor.
    let hash = murmur3::murmur3_32(&mut Cursor::new(key), 0).unwrap();
    (hash & 0xFFFF) as u16
}

/// A borrowed view of one encoded value within a region.
#[derive(Debug, Clone, Copy)]
pub struct Value<'a> {
    region: &'a [u8],
    offset: usize,
}

impl<'a> Value<'a> {
    /// Interprets `region` as a single encoded value starting at byte 0.
    pub fn from_bytes(region: &'a [u8]) -> Result<Value<'a>> {
        Value::at(region, 0)
    }

    fn at(region: &'a [u8], offset: usize) -> Result<Value<'a>> {
        if offset >= region.len() {
            return errvalue!("value offset {offset} past end of region");
        }
        Ok(Value { region, offset })
    }

    /// Byte offset of this value within its region.
    pub fn offset(&self) -> usize {
        self.offset
    }

    fn tag(&self) -> u8 {
        self.region[self.offset]
    }

    /// The abstract type of this value. Unknown tags read as null.
    pub fn value_type(&self) -> ValueType {
        let tag = self.tag() as usize;
        if tag < VALUE_TYPES.len() {
            VALUE_TYPES[tag]
        } else {
            ValueType::Null
        }
    }

    /// Varint parameter following the tag. Returns the value and the offset
    /// of the first byte after it.
    fn param(&self) -> Result<(u64, usize)> {
        let start = self.offset + 1;
        match varint::get_uvarint(&self.region[start.min(self.region.len())..]) {
            Some((n, consumed)) => Ok((n, start + consumed)),
            None => errvalue!("truncated varint at offset {start}"),
        }
    }

    /// Fixed-width payload of `len` bytes following the tag.
    fn fixed(&self, len: usize) -> Result<&'a [u8]> {
        let start = self.offset + 1;
        self.region
            .get(start..start + len)
            .ok_or_else(|| Error::MalformedValue(format!("truncated payload at offset {start}")))
    }

    /// Offset of the first byte after this value.
    fn end_offset(&self) -> Result<usize> {
        match self.tag() {
            TAG_NULL | TAG_FALSE | TAG_TRUE => Ok(self.offset + 1),
            TAG_INT8 => Ok(self.offset + 2),
            TAG_INT16 => Ok(self.offset + 3),
            TAG_INT32 | TAG_FLOAT32 => Ok(self.offset + 5),
            TAG_INT64 | TAG_UINT64 | TAG_FLOAT64 => Ok(self.offset + 9),
            // Length-prefixed payloads. A shared string carries the same
            // payload as a plain string; patching only rewrites the tag.
            TAG_STRING | TAG_SHARED_STRING | TAG_RAW_NUMBER | TAG_DATA => {
                let (len, after) = self.param()?;
                match after.checked_add(len as usize) {
                    Some(end) if end <= self.region.len() => Ok(end),
                    _ => errvalue!("payload overruns region at offset {}", self.offset),
                }
            }
            // Parameter-only values.
            TAG_DATE | TAG_SHARED_STRING_REF | TAG_EXTERN_STRING | TAG_EXTERN_STRING_REF => {
                let (_, after) = self.param()?;
                Ok(after)
            }
            TAG_ARRAY => {
                let (count, after) = self.param()?;
                let mut pos = after;
                for _ in 0..count {
                    pos = Value::at(self.region, pos)?.end_offset()?;
                }
                Ok(pos)
            }
            TAG_DICT => {
                let (count, after) = self.param()?;
                let mut pos = dict_slots_end(after, count, self.region.len())?;
                for _ in 0..count.saturating_mul(2) {
                    pos = Value::at(self.region, pos)?.end_offset()?;
                }
                Ok(pos)
            }
            tag => errvalue!("unknown type tag {tag:#04x} at offset {}", self.offset),
        }
    }

    /// The value immediately following this one in the region. Fails if this
    /// value is the region's last.
    pub fn next(&self) -> Result<Value<'a>> {
        Value::at(self.region, self.end_offset()?)
    }

    /// False for null, false, and numeric zero; true for everything else.
    pub fn as_bool(&self) -> Result<bool> {
        match self.tag() {
            TAG_NULL | TAG_FALSE => Ok(false),
            TAG_TRUE => Ok(true),
            _ if self.value_type() == ValueType::Number => Ok(self.as_int()? != 0),
            _ => Ok(true),
        }
    }

    /// Integer rendering: integer types as-is, floats truncated, dates as
    /// seconds, raw numbers parsed.
    pub fn as_int(&self) -> Result<i64> {
        match self.tag() {
            TAG_NULL | TAG_FALSE => Ok(0),
            TAG_TRUE => Ok(1),
            TAG_INT8 => Ok(self.fixed(1)?[0] as i8 as i64),
            TAG_INT16 => Ok(i64::from(LittleEndian::read_i16(self.fixed(2)?))),
            TAG_INT32 => Ok(i64::from(LittleEndian::read_i32(self.fixed(4)?))),
            TAG_INT64 => Ok(LittleEndian::read_i64(self.fixed(8)?)),
            TAG_UINT64 => {
                let u = LittleEndian::read_u64(self.fixed(8)?);
                i64::try_from(u).map_err(|_| {
                    Error::TypeMismatch("unsigned value overflows 64-bit signed".to_string())
                })
            }
            TAG_FLOAT32 => Ok(LittleEndian::read_f32(self.fixed(4)?) as i64),
            TAG_FLOAT64 => Ok(LittleEndian::read_f64(self.fixed(8)?) as i64),
            TAG_DATE => {
                let (seconds, _) = self.param()?;
                Ok(seconds as i64)
            }
            TAG_RAW_NUMBER => {
                let digits = self.length_prefixed_str()?;
                if let Ok(i) = digits.parse::<i64>() {
                    return Ok(i);
                }
                digits
                    .parse::<f64>()
                    .map(|f| f as i64)
                    .map_err(|_| Error::MalformedValue(format!("bad raw number \"{digits}\"")))
            }
            _ => Err(Error::TypeMismatch("value is not a number".to_string())),
        }
    }

    /// Unsigned integer rendering; fails on negative values.
    pub fn as_uint(&self) -> Result<u64> {
        if self.tag() == TAG_UINT64 {
            return Ok(LittleEndian::read_u64(self.fixed(8)?));
        }
        u64::try_from(self.as_int()?)
            .map_err(|_| Error::TypeMismatch("negative value".to_string()))
    }

    /// Floating-point rendering: float types as-is, other numbers widened.
    pub fn as_double(&self) -> Result<f64> {
        match self.tag() {
            TAG_FLOAT32 => Ok(f64::from(LittleEndian::read_f32(self.fixed(4)?))),
            TAG_FLOAT64 => Ok(LittleEndian::read_f64(self.fixed(8)?)),
            TAG_UINT64 => Ok(LittleEndian::read_u64(self.fixed(8)?) as f64),
            TAG_RAW_NUMBER => {
                let digits = self.length_prefixed_str()?;
                digits
                    .parse::<f64>()
                    .map_err(|_| Error::MalformedValue(format!("bad raw number \"{digits}\"")))
            }
            _ => Ok(self.as_int()? as f64),
        }
    }

    fn length_prefixed_bytes(&self) -> Result<&'a [u8]> {
        let (len, after) = self.param()?;
        after
            .checked_add(len as usize)
            .and_then(|end| self.region.get(after..end))
            .ok_or_else(|| {
                Error::MalformedValue(format!("payload overruns region at offset {}", self.offset))
            })
    }

    fn length_prefixed_str(&self) -> Result<&'a str> {
        std::str::from_utf8(self.length_prefixed_bytes()?)
            .map_err(|_| Error::MalformedValue("invalid utf-8 in string".to_string()))
    }

    /// String payload. Shared-string references are chased back through the
    /// region; extern references fail without a table (see [`Value::extern_id`]).
    pub fn as_string(&self) -> Result<&'a str> {
        match self.tag() {
            TAG_STRING | TAG_SHARED_STRING => self.length_prefixed_str(),
            TAG_SHARED_STRING_REF => {
                let (back, _) = self.param()?;
                let target = self
                    .offset
                    .checked_sub(back as usize)
                    .filter(|_| back > 0)
                    .ok_or_else(|| {
                        Error::MalformedValue(format!(
                            "shared-string reference at offset {} reaches before region",
                            self.offset
                        ))
                    })?;
                let shared = Value::at(self.region, target)?;
                if shared.tag() != TAG_SHARED_STRING {
                    return errvalue!("shared-string reference targets tag {:#04x}", shared.tag());
                }
                shared.length_prefixed_str()
            }
            TAG_EXTERN_STRING | TAG_EXTERN_STRING_REF => Err(Error::StateViolation(
                "extern string requires an external table".to_string(),
            )),
            _ => Err(Error::TypeMismatch("value is not a string".to_string())),
        }
    }

    /// Raw data payload.
    pub fn as_data(&self) -> Result<&'a [u8]> {
        if self.tag() != TAG_DATA {
            return Err(Error::TypeMismatch("value is not data".to_string()));
        }
        self.length_prefixed_bytes()
    }

    /// External-table id of an extern string or extern-string reference.
    pub fn extern_id(&self) -> Result<u64> {
        match self.tag() {
            TAG_EXTERN_STRING | TAG_EXTERN_STRING_REF => Ok(self.param()?.0),
            _ => Err(Error::TypeMismatch("value is not an extern string".to_string())),
        }
    }

    /// Type-checked downcast to an array.
    pub fn as_array(&self) -> Result<ArrayRef<'a>> {
        if self.tag() != TAG_ARRAY {
            return Err(Error::TypeMismatch("value is not an array".to_string()));
        }
        Ok(ArrayRef { value: *self })
    }

    /// Type-checked downcast to a dict.
    pub fn as_dict(&self) -> Result<DictRef<'a>> {
        if self.tag() != TAG_DICT {
            return Err(Error::TypeMismatch("value is not a dict".to_string()));
        }
        Ok(DictRef { value: *self })
    }
}

/// Navigator over an encoded array.
#[derive(Debug, Clone, Copy)]
pub struct ArrayRef<'a> {
    value: Value<'a>,
}

impl<'a> ArrayRef<'a> {
    /// Number of elements.
    pub fn count(&self) -> Result<u64> {
        Ok(self.value.param()?.0)
    }

    /// Iterates over the elements in order.
    pub fn iter(&self) -> Result<ArrayIter<'a>> {
        let (count, after) = self.value.param()?;
        let first = if count > 0 {
            Some(Value::at(self.value.region, after)?)
        } else {
            None
        };
        Ok(ArrayIter {
            current: first,
            remaining: count,
        })
    }
}

pub struct ArrayIter<'a> {
    current: Option<Value<'a>>,
    remaining: u64,
}

impl<'a> Iterator for ArrayIter<'a> {
    type Item = Result<Value<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let value = self.current?;
        self.remaining -= 1;
        if self.remaining > 0 {
            match value.next() {
                Ok(next) => self.current = Some(next),
                Err(e) => {
                    self.remaining = 0;
                    return Some(Err(e));
                }
            }
        }
        Some(Ok(value))
    }
}

/// Navigator over an encoded dict.
#[derive(Debug, Clone, Copy)]
pub struct DictRef<'a> {
    value: Value<'a>,
}

impl<'a> DictRef<'a> {
    /// Number of key/value pairs.
    pub fn count(&self) -> Result<u64> {
        Ok(self.value.param()?.0)
    }

    /// Looks up a key, computing its hash.
    pub fn get(&self, key: &str) -> Result<Option<Value<'a>>> {
        self.get_hashed(key, hash_code(key.as_bytes()))
    }

    /// Looks up a key with a precomputed hash. Walks the 16-bit hash index
    /// and advances a lazy key pointer only as far as matching slots require.
    pub fn get_hashed(&self, key: &str, hash: u16) -> Result<Option<Value<'a>>> {
        let (count, after) = self.value.param()?;
        let region = self.value.region;
        let slots_end = dict_slots_end(after, count, region.len())?;

        let mut cursor: Option<Value<'a>> = None; // lazily set to key 0
        let mut key_index = 0u64;
        for i in 0..count {
            let slot_at = after + i as usize * 2;
            if LittleEndian::read_u16(&region[slot_at..slot_at + 2]) != hash {
                continue;
            }
            let mut candidate = match cursor {
                Some(v) => v,
                None => Value::at(region, slots_end)?,
            };
            while key_index < i {
                candidate = candidate.next()?.next()?;
                key_index += 1;
            }
            cursor = Some(candidate);
            if candidate.as_string()? == key {
                return Ok(Some(candidate.next()?));
            }
        }
        Ok(None)
    }

    /// Iterates over the pairs in encoding order.
    pub fn iter(&self) -> Result<DictIter<'a>> {
        let (count, after) = self.value.param()?;
        let slots_end = dict_slots_end(after, count, self.value.region.len())?;
        let first_key = if count > 0 {
            Some(Value::at(self.value.region, slots_end)?)
        } else {
            None
        };
        Ok(DictIter {
            key: first_key,
            remaining: count,
        })
    }
}

pub struct DictIter<'a> {
    key: Option<Value<'a>>,
    remaining: u64,
}

impl<'a> Iterator for DictIter<'a> {
    type Item = Result<(Value<'a>, Value<'a>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let key = self.key?;
        let value = match key.next() {
            Ok(v) => v,
            Err(e) => {
                self.remaining = 0;
                return Some(Err(e));
            }
        };
        self.remaining -= 1;
        if self.remaining > 0 {
            match value.next() {
                Ok(next) => self.key = Some(next),
                Err(e) => {
                    self.remaining = 0;
                    return Some(Err(e));
                }
            }
        }
        Some(Ok((key, value)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_scalars() {
        let v = Value::from_bytes(&[TAG_NULL]).unwrap();
        assert_eq!(v.value_type(), ValueType::Null);
        assert!(!v.as_bool().unwrap());

        let v = Value::from_bytes(&[TAG_TRUE]).unwrap();
        assert_eq!(v.value_type(), ValueType::Bool);
        assert!(v.as_bool().unwrap());
        assert_eq!(v.as_int().unwrap(), 1);

        let v = Value::from_bytes(&[TAG_INT16, 0x2E, 0xFB]).unwrap();
        assert_eq!(v.value_type(), ValueType::Number);
        assert_eq!(v.as_int().unwrap(), -1234);
        assert_eq!(v.as_double().unwrap(), -1234.0);
        assert!(v.as_bool().unwrap());
    }

    #[test]
    fn test_unknown_tag_reads_as_null() {
        let v = Value::from_bytes(&[0x7F]).unwrap();
        assert_eq!(v.value_type(), ValueType::Null);
        assert!(matches!(v.next(), Err(Error::MalformedValue(_))));
    }

    #[test]
    fn test_truncated_payload() {
        let v = Value::from_bytes(&[TAG_INT64, 0x01, 0x02]).unwrap();
        assert!(matches!(v.as_int(), Err(Error::MalformedValue(_))));

        // String claims 10 bytes but the region holds 2.
        let v = Value::from_bytes(&[TAG_STRING, 10, b'h', b'i']).unwrap();
        assert!(matches!(v.as_string(), Err(Error::MalformedValue(_))));
    }

    #[test]
    fn test_string_and_data() {
        let mut buf = vec![TAG_STRING, 5];
        buf.extend_from_slice(b"hello");
        let v = Value::from_bytes(&buf).unwrap();
        assert_eq!(v.value_type(), ValueType::String);
        assert_eq!(v.as_string().unwrap(), "hello");
        assert!(matches!(v.as_data(), Err(Error::TypeMismatch(_))));

        let mut buf = vec![TAG_DATA, 3];
        buf.extend_from_slice(&[0xDE, 0xAD, 0x00]);
        let v = Value::from_bytes(&buf).unwrap();
        assert_eq!(v.as_data().unwrap(), &[0xDE, 0xAD, 0x00]);
    }

    #[test]
    fn test_shared_string_backref() {
        // "note" as a shared string at offset 0, an int between, and a
        // reference back to it.
        let mut buf = vec![TAG_SHARED_STRING, 4];
        buf.extend_from_slice(b"note");
        buf.extend_from_slice(&[TAG_INT8, 7]);
        let ref_offset = buf.len() as u64;
        buf.extend_from_slice(&[TAG_SHARED_STRING_REF, ref_offset as u8]);

        let first = Value::from_bytes(&buf).unwrap();
        assert_eq!(first.as_string().unwrap(), "note");
        let int = first.next().unwrap();
        assert_eq!(int.as_int().unwrap(), 7);
        let reference = int.next().unwrap();
        assert_eq!(reference.as_string().unwrap(), "note");
    }

    #[test]
    fn test_shared_ref_to_wrong_tag_is_malformed() {
        let mut buf = vec![TAG_STRING, 4];
        buf.extend_from_slice(b"note");
        let back = buf.len() as u8;
        buf.extend_from_slice(&[TAG_SHARED_STRING_REF, back]);
        let v = Value::from_bytes(&buf).unwrap().next().unwrap();
        assert!(matches!(v.as_string(), Err(Error::MalformedValue(_))));

        // Zero backward offset would self-reference.
        let v = Value::from_bytes(&[TAG_SHARED_STRING_REF, 0]).unwrap();
        assert!(matches!(v.as_string(), Err(Error::MalformedValue(_))));
    }

    #[test]
    fn test_extern_string_without_table() {
        let v = Value::from_bytes(&[TAG_EXTERN_STRING_REF, 42]).unwrap();
        assert!(matches!(v.as_string(), Err(Error::StateViolation(_))));
        assert_eq!(v.extern_id().unwrap(), 42);
    }

    #[test]
    fn test_array_iteration() {
        let mut buf = vec![TAG_ARRAY, 3, TAG_INT8, 1, TAG_INT8, 2];
        buf.extend_from_slice(&[TAG_STRING, 2, b'h', b'i']);
        let array = Value::from_bytes(&buf).unwrap().as_array().unwrap();
        assert_eq!(array.count().unwrap(), 3);

        let items: Vec<Value> = array.iter().unwrap().collect::<Result<_>>().unwrap();
        assert_eq!(items.len(), 3);
        assert_eq!(items[0].as_int().unwrap(), 1);
        assert_eq!(items[1].as_int().unwrap(), 2);
        assert_eq!(items[2].as_string().unwrap(), "hi");
    }

    #[test]
    fn test_empty_array() {
        let array = Value::from_bytes(&[TAG_ARRAY, 0]).unwrap().as_array().unwrap();
        assert_eq!(array.count().unwrap(), 0);
        assert!(array.iter().unwrap().next().is_none());
    }

    #[test]
    fn test_date_is_a_number() {
        let mut buf = vec![TAG_DATE];
        crate::encoding::varint::put_uvarint(&mut buf, 1_400_000_000);
        let v = Value::from_bytes(&buf).unwrap();
        assert_eq!(v.value_type(), ValueType::Number);
        assert_eq!(v.as_int().unwrap(), 1_400_000_000);
    }

    #[test]
    fn test_raw_number_parses() {
        let mut buf = vec![TAG_RAW_NUMBER, 4];
        buf.extend_from_slice(b"-123");
        let v = Value::from_bytes(&buf).unwrap();
        assert_eq!(v.as_int().unwrap(), -123);
        assert_eq!(v.as_double().unwrap(), -123.0);

        let mut buf = vec![TAG_RAW_NUMBER, 3];
        buf.extend_from_slice(b"abc");
        let v = Value::from_bytes(&buf).unwrap();
        assert!(matches!(v.as_int(), Err(Error::MalformedValue(_))));
    }

    #[test]
    fn test_uint64_overflow() {
        let mut buf = vec![TAG_UINT64];
        buf.extend_from_slice(&u64::MAX.to_le_bytes());
        let v = Value::from_bytes(&buf).unwrap();
        assert_eq!(v.as_uint().unwrap(), u64::MAX);
        assert!(matches!(v.as_int(), Err(Error::TypeMismatch(_))));
    }
}
