//! Streaming encoder for the compact value format.
//!
//! The encoder writes into an in-memory buffer so that earlier output can be
//! patched in place: promoting a string's tag to a shared string once a
//! second occurrence appears, and filling a dict's 16-bit hash slots as its
//! keys are written.

use std::collections::HashMap;

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};

use super::value::{self, hash_code};
use super::varint::put_uvarint;
use crate::error::Result;
use crate::errstate;

// Strings in this length range are deduplicated within one encoded region.
const MIN_SHARED_STRING_LEN: usize = 4;
const MAX_SHARED_STRING_LEN: usize = 100;

/// Encoder for a single value region.
///
/// Values are written depth-first: `begin_array(n)` followed by `n` values,
/// `begin_dict(n)` followed by `n` `write_key` + value pairs and `end_dict`.
/// The caller must supply exactly the announced number of children.
pub struct Encoder<'a> {
    buf: Vec<u8>,
    shared_strings: HashMap<Vec<u8>, usize>,
    extern_strings: Option<&'a HashMap<String, u64>>,
    index_pos: usize, // next hash slot of the innermost open dict
    index_end: usize,
    saved_index: Vec<(usize, usize)>,
}

impl<'a> Encoder<'a> {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self {
            buf: Vec::new(),
            shared_strings: HashMap::new(),
            extern_strings: None,
            index_pos: 0,
            index_end: 0,
            saved_index: Vec::new(),
        }
    }

    /// Binds an external string table; strings present in it are written as
    /// references carrying the table id instead of inline payloads.
    pub fn with_extern_strings(table: &'a HashMap<String, u64>) -> Self {
        let mut encoder = Self::new();
        encoder.extern_strings = Some(table);
        encoder
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Consumes the encoder and returns the encoded region.
    pub fn finish(self) -> Vec<u8> {
        self.buf
    }

    fn add_uvarint(&mut self, n: u64) {
        put_uvarint(&mut self.buf, n);
    }

    pub fn write_null(&mut self) {
        self.buf.push(value::TAG_NULL);
    }

    pub fn write_bool(&mut self, b: bool) {
        self.buf
            .push(if b { value::TAG_TRUE } else { value::TAG_FALSE });
    }

    /// Writes `i` in the smallest signed width that holds it.
    pub fn write_int(&mut self, i: i64) {
        if i >= i64::from(i8::MIN) && i <= i64::from(i8::MAX) {
            self.buf.push(value::TAG_INT8);
            self.buf.write_i8(i as i8).unwrap();
        } else if i >= i64::from(i16::MIN) && i <= i64::from(i16::MAX) {
            self.buf.push(value::TAG_INT16);
            self.buf.write_i16::<LittleEndian>(i as i16).unwrap();
        } else if i >= i64::from(i32::MIN) && i <= i64::from(i32::MAX) {
            self.buf.push(value::TAG_INT32);
            self.buf.write_i32::<LittleEndian>(i as i32).unwrap();
        } else {
            self.buf.push(value::TAG_INT64);
            self.buf.write_i64::<LittleEndian>(i).unwrap();
        }
    }

    pub fn write_uint(&mut self, u: u64) {
        match i64::try_from(u) {
            Ok(i) => self.write_int(i),
            Err(_) => {
                self.buf.push(value::TAG_UINT64);
                self.buf.write_u64::<LittleEndian>(u).unwrap();
            }
        }
    }

    /// Writes `d`, collapsing to an integer encoding when exact.
    pub fn write_double(&mut self, d: f64) {
        if d.fract() == 0.0 && d >= i64::MIN as f64 && d < i64::MAX as f64 {
            return self.write_int(d as i64);
        }
        self.buf.push(value::TAG_FLOAT64);
        self.buf.write_f64::<LittleEndian>(d).unwrap();
    }

    pub fn write_float(&mut self, f: f32) {
        if f.fract() == 0.0 && f >= i32::MIN as f32 && f < i32::MAX as f32 {
            return self.write_int(i64::from(f as i32));
        }
        self.buf.push(value::TAG_FLOAT32);
        self.buf.write_f32::<LittleEndian>(f).unwrap();
    }

    pub fn write_date(&mut self, seconds: u64) {
        self.buf.push(value::TAG_DATE);
        self.add_uvarint(seconds);
    }

    pub fn write_data(&mut self, data: &[u8]) {
        self.buf.push(value::TAG_DATA);
        self.add_uvarint(data.len() as u64);
        self.buf.extend_from_slice(data);
    }

    /// Writes a number kept in its textual form.
    pub fn write_raw_number(&mut self, digits: &str) {
        self.buf.push(value::TAG_RAW_NUMBER);
        self.add_uvarint(digits.len() as u64);
        self.buf.extend_from_slice(digits.as_bytes());
    }

    /// Writes a string, deduplicating against the external table and against
    /// earlier occurrences in this region. A repeated shareable string
    /// rewrites its first occurrence's tag to a shared string and emits a
    /// backward reference.
    pub fn write_string(&mut self, s: &str) {
        if let Some(table) = self.extern_strings {
            if let Some(&id) = table.get(s) {
                self.buf.push(value::TAG_EXTERN_STRING_REF);
                self.add_uvarint(id);
                return;
            }
        }

        let len = s.len();
        if (MIN_SHARED_STRING_LEN..=MAX_SHARED_STRING_LEN).contains(&len) {
            let cur_offset = self.buf.len();
            if let Some(&shared_offset) = self.shared_strings.get(s.as_bytes()) {
                self.buf[shared_offset] = value::TAG_SHARED_STRING;
                self.buf.push(value::TAG_SHARED_STRING_REF);
                self.add_uvarint((cur_offset - shared_offset) as u64);
                return;
            }
            self.shared_strings.insert(s.as_bytes().to_vec(), cur_offset);
        }

        self.buf.push(value::TAG_STRING);
        self.add_uvarint(len as u64);
        self.buf.extend_from_slice(s.as_bytes());
    }

    /// Opens an array of `count` elements; the caller writes them next.
    pub fn begin_array(&mut self, count: u64) {
        self.buf.push(value::TAG_ARRAY);
        self.add_uvarint(count);
    }

    /// Opens a dict of `count` pairs and reserves its zeroed hash index.
    /// Each pair is a `write_key` followed by one value; close with
    /// [`Encoder::end_dict`].
    pub fn begin_dict(&mut self, count: u64) {
        self.buf.push(value::TAG_DICT);
        self.add_uvarint(count);
        self.saved_index.push((self.index_pos, self.index_end));
        self.index_pos = self.buf.len();
        self.index_end = self.index_pos + count as usize * 2;
        self.buf.resize(self.index_end, 0);
    }

    /// Writes a dict key: patches its hash into the next index slot, then
    /// writes the key string under the usual string rules.
    pub fn write_key(&mut self, key: &str) -> Result<()> {
        if self.saved_index.is_empty() {
            return errstate!("dict key written outside a dict");
        }
        if self.index_pos >= self.index_end {
            return errstate!("more keys than the dict was opened with");
        }
        let hash = hash_code(key.as_bytes());
        LittleEndian::write_u16(&mut self.buf[self.index_pos..self.index_pos + 2], hash);
        self.index_pos += 2;
        self.write_string(key);
        Ok(())
    }

    /// Closes the innermost dict, restoring the parent's index cursor.
    pub fn end_dict(&mut self) -> Result<()> {
        match self.saved_index.pop() {
            Some((pos, end)) => {
                self.index_pos = pos;
                self.index_end = end;
                Ok(())
            }
            None => errstate!("end_dict without a matching begin_dict"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::value::{Value, ValueType, TAG_SHARED_STRING, TAG_SHARED_STRING_REF};
    use crate::encoding::varint::get_uvarint;
    use crate::error::Error;

    fn decode(buf: &[u8]) -> Value {
        Value::from_bytes(buf).expect("empty encoding")
    }

    #[test]
    fn test_scalar_round_trips() {
        let mut enc = Encoder::new();
        enc.write_null();
        assert_eq!(decode(&enc.finish()).value_type(), ValueType::Null);

        for b in [false, true] {
            let mut enc = Encoder::new();
            enc.write_bool(b);
            assert_eq!(decode(&enc.finish()).as_bool().unwrap(), b);
        }

        for i in [0i64, -1, 127, -128, 128, 30000, -70000, 1 << 40, i64::MIN] {
            let mut enc = Encoder::new();
            enc.write_int(i);
            assert_eq!(decode(&enc.finish()).as_int().unwrap(), i, "int {i}");
        }
    }

    #[test]
    fn test_int_width_selection() {
        let cases: [(i64, usize); 4] = [(7, 2), (1000, 3), (100_000, 5), (1 << 40, 9)];
        for (i, expected_len) in cases {
            let mut enc = Encoder::new();
            enc.write_int(i);
            assert_eq!(enc.finish().len(), expected_len, "int {i}");
        }
    }

    #[test]
    fn test_uint_round_trips() {
        let mut enc = Encoder::new();
        enc.write_uint(42);
        // Small unsigned values collapse to the signed encoding.
        let buf = enc.finish();
        assert_eq!(buf.len(), 2);
        assert_eq!(decode(&buf).as_uint().unwrap(), 42);

        let mut enc = Encoder::new();
        enc.write_uint(u64::MAX);
        assert_eq!(decode(&enc.finish()).as_uint().unwrap(), u64::MAX);
    }

    #[test]
    fn test_double_collapses_to_int_when_exact() {
        let mut enc = Encoder::new();
        enc.write_double(32.0);
        let buf = enc.finish();
        assert_eq!(buf.len(), 2); // int8 encoding
        assert_eq!(decode(&buf).as_int().unwrap(), 32);

        let mut enc = Encoder::new();
        enc.write_double(3.25);
        let buf = enc.finish();
        assert_eq!(buf.len(), 9);
        assert_eq!(decode(&buf).as_double().unwrap(), 3.25);

        let mut enc = Encoder::new();
        enc.write_double(f64::NAN);
        assert!(decode(&enc.finish()).as_double().unwrap().is_nan());
    }

    #[test]
    fn test_float_round_trip() {
        let mut enc = Encoder::new();
        enc.write_float(2.5);
        let buf = enc.finish();
        assert_eq!(buf.len(), 5);
        assert_eq!(decode(&buf).as_double().unwrap(), 2.5);
    }

    #[test]
    fn test_date_round_trip() {
        let mut enc = Encoder::new();
        enc.write_date(1_234_567_890);
        assert_eq!(decode(&enc.finish()).as_int().unwrap(), 1_234_567_890);
    }

    #[test]
    fn test_data_round_trip() {
        let payload = [0u8, 1, 2, 0xFF];
        let mut enc = Encoder::new();
        enc.write_data(&payload);
        assert_eq!(decode(&enc.finish()).as_data().unwrap(), &payload);
    }

    #[test]
    fn test_string_round_trip() {
        for s in ["", "abc", "hello world", "ünïcödé"] {
            let mut enc = Encoder::new();
            enc.write_string(s);
            assert_eq!(decode(&enc.finish()).as_string().unwrap(), s, "string {s:?}");
        }
    }

    #[test]
    fn test_shared_string_patching() {
        // Two occurrences of a shareable string: the first is patched to a
        // shared string, the second becomes a backward reference whose
        // parameter is the offset delta.
        let mut enc = Encoder::new();
        enc.begin_array(2);
        enc.write_string("note");
        enc.write_string("note");
        let buf = enc.finish();

        let first_offset = 2; // array tag + count varint
        assert_eq!(buf[first_offset], TAG_SHARED_STRING);
        let ref_offset = first_offset + 2 + 4; // tag + len varint + payload
        assert_eq!(buf[ref_offset], TAG_SHARED_STRING_REF);
        let (delta, _) = get_uvarint(&buf[ref_offset + 1..]).unwrap();
        assert_eq!(delta as usize, ref_offset - first_offset);

        // Exactly one shared-string tag in the region.
        assert_eq!(
            buf.iter().filter(|&&b| b == TAG_SHARED_STRING).count(),
            1
        );

        let items: Vec<_> = decode(&buf)
            .as_array()
            .unwrap()
            .iter()
            .unwrap()
            .collect::<crate::error::Result<_>>()
            .unwrap();
        assert_eq!(items[0].as_string().unwrap(), "note");
        assert_eq!(items[1].as_string().unwrap(), "note");
    }

    #[test]
    fn test_short_and_long_strings_not_shared() {
        let mut enc = Encoder::new();
        enc.begin_array(4);
        enc.write_string("ab"); // below the sharing threshold
        enc.write_string("ab");
        let long = "x".repeat(101); // above it
        enc.write_string(&long);
        enc.write_string(&long);
        let buf = enc.finish();
        assert_eq!(buf.iter().filter(|&&b| b == TAG_SHARED_STRING).count(), 0);
    }

    #[test]
    fn test_extern_string_table() {
        let mut table = HashMap::new();
        table.insert("type".to_string(), 3u64);
        let mut enc = Encoder::with_extern_strings(&table);
        enc.write_string("type");
        let buf = enc.finish();
        let v = decode(&buf);
        assert_eq!(v.extern_id().unwrap(), 3);
        assert!(matches!(v.as_string(), Err(Error::StateViolation(_))));
    }

    #[test]
    fn test_dict_hash_slots() {
        let mut enc = Encoder::new();
        enc.begin_dict(2);
        enc.write_key("name").unwrap();
        enc.write_string("Alice");
        enc.write_key("age").unwrap();
        enc.write_int(30);
        enc.end_dict().unwrap();
        let buf = enc.finish();

        // Slot i holds the low 16 bits of the murmur hash of key i.
        let slots = &buf[2..6];
        assert_eq!(
            u16::from_le_bytes([slots[0], slots[1]]),
            hash_code(b"name")
        );
        assert_eq!(u16::from_le_bytes([slots[2], slots[3]]), hash_code(b"age"));
    }

    #[test]
    fn test_dict_lookup() {
        let mut enc = Encoder::new();
        enc.begin_dict(2);
        enc.write_key("name").unwrap();
        enc.write_string("Alice");
        enc.write_key("age").unwrap();
        enc.write_int(30);
        enc.end_dict().unwrap();
        let buf = enc.finish();

        let dict = decode(&buf).as_dict().unwrap();
        assert_eq!(dict.count().unwrap(), 2);
        let name = dict.get("name").unwrap().expect("name missing");
        assert_eq!(name.as_string().unwrap(), "Alice");
        let age = dict.get("age").unwrap().expect("age missing");
        assert_eq!(age.as_int().unwrap(), 30);
        assert!(dict.get("missing").unwrap().is_none());
    }

    #[test]
    fn test_dict_shared_values_survive_traversal() {
        // A dict whose values repeat a shareable string: traversal has to
        // step over the patched first occurrence's full payload.
        let mut enc = Encoder::new();
        enc.begin_dict(2);
        enc.write_key("type").unwrap();
        enc.write_string("note");
        enc.write_key("other").unwrap();
        enc.write_string("note");
        enc.end_dict().unwrap();
        let buf = enc.finish();

        let dict = decode(&buf).as_dict().unwrap();
        assert_eq!(dict.get("other").unwrap().unwrap().as_string().unwrap(), "note");
        assert_eq!(dict.get("type").unwrap().unwrap().as_string().unwrap(), "note");

        let pairs: Vec<_> = dict
            .iter()
            .unwrap()
            .collect::<crate::error::Result<_>>()
            .unwrap();
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs[1].0.as_string().unwrap(), "other");
        assert_eq!(pairs[1].1.as_string().unwrap(), "note");
    }

    #[test]
    fn test_nested_dict_restores_index_cursor() {
        let mut enc = Encoder::new();
        enc.begin_dict(2);
        enc.write_key("inner").unwrap();
        enc.begin_dict(1);
        enc.write_key("deep").unwrap();
        enc.write_int(1);
        enc.end_dict().unwrap();
        enc.write_key("after").unwrap();
        enc.write_int(2);
        enc.end_dict().unwrap();
        let buf = enc.finish();

        let dict = decode(&buf).as_dict().unwrap();
        let inner = dict.get("inner").unwrap().unwrap().as_dict().unwrap();
        assert_eq!(inner.get("deep").unwrap().unwrap().as_int().unwrap(), 1);
        assert_eq!(dict.get("after").unwrap().unwrap().as_int().unwrap(), 2);
    }

    #[test]
    fn test_write_key_outside_dict() {
        let mut enc = Encoder::new();
        assert!(matches!(
            enc.write_key("stray"),
            Err(Error::StateViolation(_))
        ));
        assert!(matches!(enc.end_dict(), Err(Error::StateViolation(_))));
    }

    #[test]
    fn test_too_many_keys() {
        let mut enc = Encoder::new();
        enc.begin_dict(1);
        enc.write_key("a").unwrap();
        enc.write_int(1);
        assert!(matches!(
            enc.write_key("b"),
            Err(Error::StateViolation(_))
        ));
    }

    #[test]
    fn test_raw_number_round_trip() {
        let mut enc = Encoder::new();
        enc.write_raw_number("3.14");
        let bytes = enc.finish();
        let v = decode(&bytes);
        assert_eq!(v.as_int().unwrap(), 3);
        assert_eq!(v.as_double().unwrap(), "3.14".parse::<f64>().unwrap());
    }

    #[test]
    fn test_mixed_document() {
        let mut enc = Encoder::new();
        enc.begin_dict(3);
        enc.write_key("id").unwrap();
        enc.write_uint(12);
        enc.write_key("tags").unwrap();
        enc.begin_array(2);
        enc.write_string("alpha");
        enc.write_string("beta");
        enc.write_key("score").unwrap();
        enc.write_double(0.5);
        enc.end_dict().unwrap();
        let buf = enc.finish();

        let dict = decode(&buf).as_dict().unwrap();
        assert_eq!(dict.get("id").unwrap().unwrap().as_int().unwrap(), 12);
        assert_eq!(dict.get("score").unwrap().unwrap().as_double().unwrap(), 0.5);
        let tags = dict.get("tags").unwrap().unwrap().as_array().unwrap();
        let tags: Vec<_> = tags
            .iter()
            .unwrap()
            .map(|v| v.unwrap().as_string().unwrap().to_string())
            .collect();
        assert_eq!(tags, ["alpha", "beta"]);
    }
}
