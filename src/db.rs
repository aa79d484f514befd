//! The database handle: read operations over one store file.
//!
//! A `Database` is cheap to open and clone-like: every handle on the same
//! canonical path shares one [`LogStore`] and one transaction slot through
//! the [`SharedFile`] registry. Reads are bounded by the committed
//! watermark, so they never observe a transaction in progress; writes go
//! through [`Transaction`](crate::Transaction).

use std::path::Path;
use std::sync::Arc;

use crate::config::{Config, OpenFlags};
use crate::document::Document;
use crate::enumerator::{DocEnumerator, EnumerationOptions};
use crate::error::Result;
use crate::file::SharedFile;
use crate::store::{LogStore, Record, DOC_STORE};

/// How much of a document a read should load.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ContentOptions {
    /// Load metadata and body.
    #[default]
    All,
    /// Load metadata only; the body stays absent.
    MetaOnly,
}

pub struct Database {
    file: Arc<SharedFile>,
    store: Arc<LogStore>,
    flags: OpenFlags,
    config: Config,
}

impl Database {
    /// Opens the database file at `path`. Handles opened on the same path
    /// share write exclusion and see each other's committed writes.
    pub fn open(path: impl AsRef<Path>, flags: OpenFlags, config: Config) -> Result<Database> {
        let file = SharedFile::for_path(path.as_ref())?;
        let store = file.store(flags, &config)?;
        Ok(Database {
            file,
            store,
            flags,
            config,
        })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn is_read_only(&self) -> bool {
        self.flags.read_only
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The last committed sequence number.
    pub fn last_sequence(&self) -> u64 {
        self.store.committed_sequence()
    }

    /// Number of live, non-deleted documents.
    pub fn doc_count(&self) -> Result<u64> {
        self.store.doc_count(self.store.committed_sequence())
    }

    /// Fetches `key`. The returned document reports `exists() == false`
    /// when the key was never written; a tombstone comes back with
    /// `deleted()` set and no body.
    pub fn get(&self, key: &[u8], content: ContentOptions) -> Result<Document> {
        let mut doc = Document::with_key(key.to_vec());
        self.read(&mut doc, content)?;
        Ok(doc)
    }

    /// Reloads `doc` by its key, returning whether it was found.
    pub fn read(&self, doc: &mut Document, content: ContentOptions) -> Result<bool> {
        doc.clear_meta_and_body();
        let bound = self.store.committed_sequence();
        let Some(entry) = self.store.lookup(DOC_STORE, doc.key(), bound)? else {
            return Ok(false);
        };
        let Some(record) = self.store.read_record_at(entry.offset)? else {
            return Ok(false);
        };
        populate(doc, record, entry.offset, content);
        Ok(true)
    }

    /// Fetches the document written at `seq`, which may be an old version
    /// of a since-rewritten key.
    pub fn get_by_sequence(&self, seq: u64, content: ContentOptions) -> Result<Option<Document>> {
        let bound = self.store.committed_sequence();
        let Some(offset) = self.store.seq_lookup(seq, bound)? else {
            return Ok(None);
        };
        self.get_by_offset_inner(offset, content)
    }

    /// Fetches the record at an offset previously reported by a document or
    /// enumerator. Offsets are opaque; anything else yields garbage or an
    /// error.
    pub fn get_by_offset(&self, offset: u64) -> Result<Option<Document>> {
        self.get_by_offset_inner(offset, ContentOptions::All)
    }

    fn get_by_offset_inner(&self, offset: u64, content: ContentOptions) -> Result<Option<Document>> {
        let Some(record) = self.store.read_record_at(offset)? else {
            return Ok(None);
        };
        let mut doc = Document::with_key(record.key.clone());
        populate(&mut doc, record, offset, content);
        Ok(Some(doc))
    }

    /// Enumerates documents ordered by key within `[start_key, end_key]`;
    /// `None` bounds are open ends.
    pub fn enumerate(
        &self,
        start_key: Option<&[u8]>,
        end_key: Option<&[u8]>,
        options: &EnumerationOptions,
    ) -> Result<DocEnumerator> {
        let bound = self.store.committed_sequence();
        let mut entries = self.store.scan(
            DOC_STORE,
            start_key,
            end_key,
            bound,
            options.include_deleted,
            options.inclusive_start,
            options.inclusive_end,
        )?;
        if options.descending {
            entries.reverse();
        }
        let offsets = entries.into_iter().map(|e| e.offset).collect();
        DocEnumerator::for_offsets(Arc::clone(&self.store), offsets, options)
    }

    /// Enumerates documents ordered by sequence within `[start, end]`.
    pub fn enumerate_sequences(
        &self,
        start: u64,
        end: u64,
        options: &EnumerationOptions,
    ) -> Result<DocEnumerator> {
        let bound = self.store.committed_sequence();
        let mut pairs = self.store.scan_seqs(
            start,
            end,
            bound,
            options.inclusive_start,
            options.inclusive_end,
        )?;
        if options.descending {
            pairs.reverse();
        }
        let offsets = pairs.into_iter().map(|(_, offset)| offset).collect();
        DocEnumerator::for_offsets(Arc::clone(&self.store), offsets, options)
    }

    /// Enumerates the given document IDs in ascending order. IDs that don't
    /// exist still yield a placeholder document carrying the requested ID.
    pub fn enumerate_docs(
        &self,
        mut doc_ids: Vec<Vec<u8>>,
        options: &EnumerationOptions,
    ) -> Result<DocEnumerator> {
        if doc_ids.is_empty() {
            return Ok(DocEnumerator::empty(Arc::clone(&self.store)));
        }
        doc_ids.sort();
        let bound = self.store.committed_sequence();
        DocEnumerator::for_doc_ids(Arc::clone(&self.store), doc_ids, bound, options)
    }

    /// Reads a raw document from a named store (see
    /// [`INFO_STORE`](crate::store::INFO_STORE) and
    /// [`LOCAL_DOC_STORE`](crate::store::LOCAL_DOC_STORE)).
    pub fn get_raw(&self, store_name: &[u8], key: &[u8]) -> Result<Option<Document>> {
        let bound = self.store.committed_sequence();
        let Some(entry) = self.store.lookup(store_name, key, bound)? else {
            return Ok(None);
        };
        if entry.deleted {
            return Ok(None);
        }
        let Some(record) = self.store.read_record_at(entry.offset)? else {
            return Ok(None);
        };
        let mut doc = Document::with_key(key.to_vec());
        populate(&mut doc, record, entry.offset, ContentOptions::All);
        Ok(Some(doc))
    }

    /// Rewrites the file keeping only live documents. Waits for any active
    /// transaction to finish and excludes new ones while running.
    pub fn compact(&self) -> Result<()> {
        self.file.begin_transaction()?;
        let result = self.store.compact();
        self.file.end_transaction();
        result
    }

    // Opportunistic compaction after a commit; skipped when the slot is
    // contended.
    pub(crate) fn maybe_auto_compact(&self) {
        if !self.flags.auto_compact || !self.store.should_compact() {
            return;
        }
        match self.file.try_begin_transaction() {
            Ok(true) => {
                let result = self.store.compact();
                self.file.end_transaction();
                if let Err(e) = result {
                    tracing::warn!("auto-compaction failed on {}: {e}", self.path().display());
                }
            }
            Ok(false) => {}
            Err(e) => tracing::warn!("auto-compaction skipped on {}: {e}", self.path().display()),
        }
    }

    pub(crate) fn store_handle(&self) -> &Arc<LogStore> {
        &self.store
    }

    pub(crate) fn shared_file(&self) -> &SharedFile {
        &self.file
    }
}

// Moves a record's payload into `doc`.
pub(crate) fn populate(doc: &mut Document, record: Record, offset: u64, content: ContentOptions) {
    doc.set_stored(record.seq, offset, record.deleted);
    if let Some(meta) = record.meta {
        doc.set_meta(meta);
    }
    if content == ContentOptions::All {
        if let Some(body) = record.body {
            doc.set_body(body);
        }
    }
}
