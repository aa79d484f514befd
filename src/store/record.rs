use std::io::{Cursor, Read};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use crc::{Crc, CRC_32_ISCSI};

use crate::error::Result;
use crate::errvalue;

pub const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

const KIND_PUT: u8 = 1;
const KIND_DEL: u8 = 2;

/// One entry in the append-only store file.
///
/// On disk: a big-endian `u32` payload length, the payload, and a CRC32 of
/// the payload. The payload is `kind, seq, store_len, key_len, meta_len,
/// body_len` followed by the store name, key, meta, and body bytes.
/// Deletions carry no body and read back with `deleted` set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub seq: u64,
    pub store: Vec<u8>,
    pub key: Vec<u8>,
    pub meta: Option<Vec<u8>>,
    pub body: Option<Vec<u8>>,
    pub deleted: bool,
}

impl Record {
    /// Encodes the record with its length prefix and checksum.
    pub fn encode(&self) -> Vec<u8> {
        let meta = self.meta.as_deref().unwrap_or(&[]);
        let body = self.body.as_deref().unwrap_or(&[]);

        let mut payload =
            Vec::with_capacity(22 + self.store.len() + self.key.len() + meta.len() + body.len());
        payload.push(if self.deleted { KIND_DEL } else { KIND_PUT });
        payload.write_u64::<BigEndian>(self.seq).unwrap();
        payload.push(self.store.len() as u8);
        payload.write_u32::<BigEndian>(self.key.len() as u32).unwrap();
        payload.write_u32::<BigEndian>(meta.len() as u32).unwrap();
        payload.write_u32::<BigEndian>(body.len() as u32).unwrap();
        payload.extend_from_slice(&self.store);
        payload.extend_from_slice(&self.key);
        payload.extend_from_slice(meta);
        payload.extend_from_slice(body);

        let checksum = CRC32.checksum(&payload);

        let mut framed = Vec::with_capacity(payload.len() + 8);
        framed.write_u32::<BigEndian>(payload.len() as u32).unwrap();
        framed.extend_from_slice(&payload);
        framed.write_u32::<BigEndian>(checksum).unwrap();
        framed
    }

    /// Reads one record. `Ok(None)` means a clean end of the log; a torn or
    /// corrupt record is an error, which replay treats as the end of the
    /// usable file.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Option<(Record, u64)>> {
        let payload_len = match reader.read_u32::<BigEndian>() {
            Ok(len) => len as usize,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut payload = vec![0u8; payload_len];
        reader
            .read_exact(&mut payload)
            .map_err(|e| crate::Error::MalformedValue(format!("torn record payload: {e}")))?;
        let stored_crc = reader
            .read_u32::<BigEndian>()
            .map_err(|e| crate::Error::MalformedValue(format!("torn record checksum: {e}")))?;

        if CRC32.checksum(&payload) != stored_crc {
            return errvalue!("record checksum mismatch");
        }

        let mut cursor = Cursor::new(&payload);
        let kind = cursor.read_u8()?;
        let seq = cursor.read_u64::<BigEndian>()?;
        let store_len = cursor.read_u8()? as usize;
        let key_len = cursor.read_u32::<BigEndian>()? as usize;
        let meta_len = cursor.read_u32::<BigEndian>()? as usize;
        let body_len = cursor.read_u32::<BigEndian>()? as usize;

        if 22 + store_len + key_len + meta_len + body_len != payload_len {
            return errvalue!("record length fields disagree with payload");
        }
        let deleted = match kind {
            KIND_PUT => false,
            KIND_DEL => true,
            _ => return errvalue!("unknown record kind {kind}"),
        };

        let mut store = vec![0u8; store_len];
        cursor.read_exact(&mut store)?;
        let mut key = vec![0u8; key_len];
        cursor.read_exact(&mut key)?;
        let mut meta = vec![0u8; meta_len];
        cursor.read_exact(&mut meta)?;
        let mut body = vec![0u8; body_len];
        cursor.read_exact(&mut body)?;

        let record = Record {
            seq,
            store,
            key,
            meta: if meta_len > 0 { Some(meta) } else { None },
            body: if body_len > 0 { Some(body) } else { None },
            deleted,
        };
        Ok(Some((record, payload_len as u64 + 8)))
    }
}
