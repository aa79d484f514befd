use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::error::Result;
use crate::Error;
use crate::errvalue;

pub const HEADER_SIZE: usize = 64;

const MAGIC: &[u8; 8] = b"EMBR\x00LOG";
const VERSION: u32 = 1;

/// Fixed-size header at the front of a store file. Everything after it is
/// an append-only run of records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub magic: [u8; 8],
    pub version: u32,
}

impl Header {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Header {
            magic: *MAGIC,
            version: VERSION,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.magic != *MAGIC {
            return errvalue!("not a store file (bad magic)");
        }
        if self.version != VERSION {
            return errvalue!("unsupported store version {}", self.version);
        }
        Ok(())
    }

    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..8].copy_from_slice(&self.magic);
        (&mut buf[8..12]).write_u32::<BigEndian>(self.version).unwrap();
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(Error::MalformedValue("store header too short".to_string()));
        }
        let mut magic = [0u8; 8];
        magic.copy_from_slice(&buf[0..8]);
        let version = (&buf[8..12]).read_u32::<BigEndian>()?;

        let header = Self { magic, version };
        header.validate()?;
        Ok(header)
    }
}
