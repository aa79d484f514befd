//! Document enumeration over key ranges, sequence ranges, and ID sets.
//!
//! An enumerator owns an independent cursor: the matching index positions
//! are captured at creation against the committed watermark of that moment,
//! and records are read lazily from a cloned file handle. A concurrent
//! commit or compaction therefore never changes what an open enumerator
//! yields.

use std::fs::File;
use std::sync::Arc;

use crate::db::{populate, ContentOptions};
use crate::document::Document;
use crate::error::Result;
use crate::store::{log, LogStore, DOC_STORE};

/// Options accepted by the enumerator factories on
/// [`Database`](crate::Database).
#[derive(Debug, Clone, Copy)]
pub struct EnumerationOptions {
    /// How much of each document to load.
    pub content: ContentOptions,
    /// Yield tombstones instead of skipping them.
    pub include_deleted: bool,
    /// Iterate from the end of the range backwards.
    pub descending: bool,
    /// Whether the range includes its start key/sequence.
    pub inclusive_start: bool,
    /// Whether the range includes its end key/sequence.
    pub inclusive_end: bool,
}

impl Default for EnumerationOptions {
    fn default() -> Self {
        Self {
            content: ContentOptions::All,
            include_deleted: false,
            descending: false,
            inclusive_start: true,
            inclusive_end: true,
        }
    }
}

enum Cursor {
    /// Range and sequence cases: record offsets, in yield order.
    Offsets(std::vec::IntoIter<u64>),
    /// Doc-ID-set case: sorted requested IDs, each looked up by seek.
    DocIds(std::vec::IntoIter<Vec<u8>>),
    Done,
}

pub struct DocEnumerator {
    store: Arc<LogStore>,
    file: Option<File>,
    bound: u64,
    content: ContentOptions,
    include_deleted: bool,
    cursor: Cursor,
    doc: Option<Document>,
}

impl DocEnumerator {
    pub(crate) fn empty(store: Arc<LogStore>) -> DocEnumerator {
        DocEnumerator {
            store,
            file: None,
            bound: 0,
            content: ContentOptions::All,
            include_deleted: false,
            cursor: Cursor::Done,
            doc: None,
        }
    }

    pub(crate) fn for_offsets(
        store: Arc<LogStore>,
        offsets: Vec<u64>,
        options: &EnumerationOptions,
    ) -> Result<DocEnumerator> {
        let file = store.read_handle()?;
        Ok(DocEnumerator {
            store,
            file: Some(file),
            bound: 0,
            content: options.content,
            include_deleted: options.include_deleted,
            cursor: Cursor::Offsets(offsets.into_iter()),
            doc: None,
        })
    }

    pub(crate) fn for_doc_ids(
        store: Arc<LogStore>,
        doc_ids: Vec<Vec<u8>>,
        bound: u64,
        options: &EnumerationOptions,
    ) -> Result<DocEnumerator> {
        let file = store.read_handle()?;
        Ok(DocEnumerator {
            store,
            file: Some(file),
            bound,
            content: options.content,
            include_deleted: options.include_deleted,
            cursor: Cursor::DocIds(doc_ids.into_iter()),
            doc: None,
        })
    }

    /// Moves to the next document, dropping the previous one. Returns
    /// `false` once exhausted; further calls keep returning `false`.
    pub fn advance(&mut self) -> Result<bool> {
        self.doc = None;
        loop {
            match &mut self.cursor {
                Cursor::Done => return Ok(false),
                Cursor::Offsets(offsets) => {
                    let Some(offset) = offsets.next() else {
                        self.close();
                        return Ok(false);
                    };
                    let Some(file) = self.file.as_mut() else {
                        self.close();
                        return Ok(false);
                    };
                    let Some(record) = log::read_record(file, offset)? else {
                        continue;
                    };
                    if record.deleted && !self.include_deleted {
                        continue;
                    }
                    let mut doc = Document::with_key(record.key.clone());
                    populate(&mut doc, record, offset, self.content);
                    self.doc = Some(doc);
                    return Ok(true);
                }
                Cursor::DocIds(ids) => {
                    let Some(id) = ids.next() else {
                        self.close();
                        return Ok(false);
                    };
                    // Seek to the requested ID; a miss synthesizes an empty
                    // placeholder so every requested ID is reported.
                    let hit = match self.store.lookup(DOC_STORE, &id, self.bound)? {
                        Some(entry) if !entry.deleted || self.include_deleted => Some(entry),
                        _ => None,
                    };
                    let doc = match (hit, self.file.as_mut()) {
                        (Some(entry), Some(file)) => {
                            match log::read_record(file, entry.offset)? {
                                Some(record) => {
                                    let mut doc = Document::with_key(record.key.clone());
                                    populate(&mut doc, record, entry.offset, self.content);
                                    doc
                                }
                                None => Document::with_key(id),
                            }
                        }
                        _ => Document::with_key(id),
                    };
                    self.doc = Some(doc);
                    return Ok(true);
                }
            }
        }
    }

    /// The document produced by the last successful [`advance`](Self::advance).
    pub fn doc(&self) -> Option<&Document> {
        self.doc.as_ref()
    }

    /// Takes ownership of the current document.
    pub fn take_doc(&mut self) -> Option<Document> {
        self.doc.take()
    }

    /// Releases the cursor and any held document. Subsequent `advance`
    /// calls return `false`.
    pub fn close(&mut self) {
        self.cursor = Cursor::Done;
        self.file = None;
        self.doc = None;
    }
}

impl Iterator for DocEnumerator {
    type Item = Result<Document>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.advance() {
            Ok(true) => self.take_doc().map(Ok),
            Ok(false) => None,
            Err(e) => {
                self.close();
                Some(Err(e))
            }
        }
    }
}
