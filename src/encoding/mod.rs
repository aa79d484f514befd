//! Compact value encoding: a self-describing tagged binary format for
//! structured document bodies.
//!
//! Each value is one type-tag byte, optionally followed by a varint
//! parameter and a payload. Fixed-width numeric payloads are little-endian.
//! [`writer::Encoder`] produces a region; [`value::Value`] navigates one in
//! place without copying.

pub mod value;
pub mod varint;
pub mod writer;

pub use value::{hash_code, ArrayRef, DictRef, Value, ValueType};
pub use writer::Encoder;
