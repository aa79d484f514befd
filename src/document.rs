use crate::format::Raw;

/// An owned document record: key, metadata, body, and the bookkeeping the
/// store attaches to it. Documents travel in both directions, populated by
/// reads and consumed by writes. Bodies are usually compact-encoded values,
/// but the store never inspects them.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Document {
    key: Vec<u8>,
    meta: Option<Vec<u8>>,
    body: Option<Vec<u8>>,
    sequence: u64,
    offset: u64,
    deleted: bool,
}

impl Document {
    /// An empty document with no key.
    pub fn new() -> Self {
        Self::default()
    }

    /// An empty document bound to `key`.
    pub fn with_key(key: impl Into<Vec<u8>>) -> Self {
        Self {
            key: key.into(),
            ..Self::default()
        }
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }

    pub fn meta(&self) -> Option<&[u8]> {
        self.meta.as_deref()
    }

    pub fn body(&self) -> Option<&[u8]> {
        self.body.as_deref()
    }

    /// Sequence assigned by the store on the last write, 0 if never stored.
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// File offset of the record; opaque, only meaningful to
    /// `Database::get_by_offset`.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn deleted(&self) -> bool {
        self.deleted
    }

    /// Whether a read found this document in the store.
    pub fn exists(&self) -> bool {
        self.sequence != 0
    }

    pub fn set_meta(&mut self, meta: impl Into<Vec<u8>>) {
        self.meta = Some(meta.into());
    }

    pub fn set_body(&mut self, body: impl Into<Vec<u8>>) {
        self.body = Some(body.into());
    }

    /// Drops meta and body and resets the store bookkeeping; the key stays.
    pub fn clear_meta_and_body(&mut self) {
        self.meta = None;
        self.body = None;
        self.sequence = 0;
        self.offset = 0;
        self.deleted = false;
    }

    pub(crate) fn set_stored(&mut self, sequence: u64, offset: u64, deleted: bool) {
        self.sequence = sequence;
        self.offset = offset;
        self.deleted = deleted;
    }
}

impl std::fmt::Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Document")
            .field("key", &Raw(&self.key))
            .field("meta", &self.meta.as_deref().map(Raw))
            .field("body_len", &self.body.as_ref().map(Vec::len))
            .field("sequence", &self.sequence)
            .field("offset", &self.offset)
            .field("deleted", &self.deleted)
            .finish()
    }
}
