//! Append-only backing store.
//!
//! One file per store: a fixed header followed by checksummed records, never
//! rewritten in place. An in-memory index (rebuilt by replay on open) maps
//! composite `(store, key, seq)` keys and sequence numbers to file offsets.
//! Every version of every key stays addressable until compaction rewrites
//! the file.
//!
//! # Visibility
//!
//! Readers never see uncommitted data. All read paths take an explicit
//! sequence bound, normally the committed watermark: `commit` flushes,
//! syncs, and then advances the watermark; `rollback_to` truncates the file
//! and rewinds it. Writers are serialized above this layer (one transaction
//! per file), so the watermark during a transaction is exactly the state
//! readers are allowed to observe.

use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::ops::Bound;
#[cfg(unix)]
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use crossbeam_skiplist::SkipMap;

use super::header::{Header, HEADER_SIZE};
use super::keyspace;
use super::record::Record;
use crate::config::{Config, OpenFlags};
use crate::error::Result;
use crate::errstate;
use crate::Error;

/// Index entry for one record version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    pub seq: u64,
    pub offset: u64,
    pub len: u32,
    pub deleted: bool,
}

#[derive(Debug, Clone)]
struct SeqEntry {
    offset: u64,
    // Composite (store, key) prefix of the record, for checking whether
    // this sequence is still the newest version of its key.
    prefix: Vec<u8>,
    doc_store: bool,
}

// File handles and the append cursor. `None` after the file was deleted out
// from under the store (transaction `delete_database`).
struct Inner {
    file: File,
    writer: BufWriter<File>,
    end_offset: u64,
    last_seq: u64,
}

pub struct LogStore {
    path: PathBuf,
    config: Config,
    writable: bool,
    // Locked sibling file; holding the handle holds the advisory lock.
    _lock: File,
    inner: RwLock<Option<Inner>>,
    by_key: SkipMap<Vec<u8>, IndexEntry>,
    by_seq: SkipMap<u64, SeqEntry>,
    committed_seq: AtomicU64,
    committed_end: AtomicU64,
    stale_bytes: AtomicU64,
}

fn closed() -> Error {
    Error::StateViolation("store file was deleted".to_string())
}

impl LogStore {
    /// Opens (or, with `flags.create`, creates) the store file at `path`,
    /// replaying it to rebuild the index.
    pub fn open(path: impl Into<PathBuf>, flags: OpenFlags, config: Config) -> Result<Self> {
        let path = path.into();
        let lock = acquire_lock(&path)?;

        let writable = !flags.read_only;
        let file = OpenOptions::new()
            .read(true)
            .write(writable)
            .create(flags.create && writable)
            .open(&path)?;

        let store = Self {
            path,
            config,
            writable,
            _lock: lock,
            inner: RwLock::new(None),
            by_key: SkipMap::new(),
            by_seq: SkipMap::new(),
            committed_seq: AtomicU64::new(0),
            committed_end: AtomicU64::new(0),
            stale_bytes: AtomicU64::new(0),
        };
        let inner = store.load(file)?;
        *store.inner.write()? = Some(inner);
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Highest sequence visible to readers.
    pub fn committed_sequence(&self) -> u64 {
        self.committed_seq.load(Ordering::SeqCst)
    }

    // Builds the append state from `file` and repopulates the index by
    // replaying every record. A torn or corrupt tail is cut off (the file
    // is truncated to the last whole record) rather than refusing to open.
    fn load(&self, mut file: File) -> Result<Inner> {
        if file.metadata()?.len() == 0 {
            file.write_all(&Header::new().encode())?;
            file.sync_all()?;
        } else {
            let mut buf = [0u8; HEADER_SIZE];
            file.seek(SeekFrom::Start(0))?;
            file.read_exact(&mut buf)?;
            Header::decode(&buf)?;
        }

        let mut reader = BufReader::new(file.try_clone()?);
        reader.seek(SeekFrom::Start(HEADER_SIZE as u64))?;
        let mut offset = HEADER_SIZE as u64;
        let mut last_seq = 0u64;
        let mut count = 0u64;
        loop {
            match Record::read_from(&mut reader) {
                Ok(Some((record, len))) => {
                    self.apply(&record, offset, len as u32);
                    last_seq = last_seq.max(record.seq);
                    offset += len;
                    count += 1;
                }
                Ok(None) => break,
                Err(e) => {
                    tracing::warn!(
                        "store {}: dropping unreadable tail at offset {offset}: {e}",
                        self.path.display()
                    );
                    if self.writable {
                        file.set_len(offset)?;
                        file.sync_all()?;
                    }
                    break;
                }
            }
        }
        tracing::info!(
            "opened store {} ({count} records, last sequence {last_seq})",
            self.path.display()
        );

        let mut writer_file = file.try_clone()?;
        writer_file.seek(SeekFrom::Start(offset))?;
        let writer = BufWriter::with_capacity(self.config.write_buffer_size, writer_file);

        self.committed_seq.store(last_seq, Ordering::SeqCst);
        self.committed_end.store(offset, Ordering::SeqCst);
        Ok(Inner {
            file,
            writer,
            end_offset: offset,
            last_seq,
        })
    }

    // Indexes one record, keeping the stale-byte estimate current: a new
    // version makes the previous one reclaimable, and a tombstone is
    // reclaimable the moment it is written.
    fn apply(&self, record: &Record, offset: u64, len: u32) {
        let prefix = keyspace::key_prefix(&record.store, &record.key);
        if let Some(prev) = self.latest_for_prefix(&prefix, u64::MAX) {
            self.stale_bytes.fetch_add(u64::from(prev.len), Ordering::SeqCst);
        }
        if record.deleted {
            self.stale_bytes.fetch_add(u64::from(len), Ordering::SeqCst);
        }
        let mut composite = prefix.clone();
        composite.extend_from_slice(&record.seq.to_be_bytes());
        self.by_key.insert(
            composite,
            IndexEntry {
                seq: record.seq,
                offset,
                len,
                deleted: record.deleted,
            },
        );
        self.by_seq.insert(
            record.seq,
            SeqEntry {
                offset,
                prefix,
                doc_store: record.store.is_empty(),
            },
        );
    }

    fn latest_version(&self, store: &[u8], key: &[u8], bound: u64) -> Option<IndexEntry> {
        self.latest_for_prefix(&keyspace::key_prefix(store, key), bound)
    }

    fn latest_for_prefix(&self, prefix: &[u8], bound: u64) -> Option<IndexEntry> {
        let mut upper = prefix.to_vec();
        upper.extend_from_slice(&bound.to_be_bytes());
        self.by_key
            .range(prefix.to_vec()..=upper)
            .next_back()
            .map(|e| *e.value())
    }

    fn clear_index(&self) {
        while self.by_key.pop_front().is_some() {}
        while self.by_seq.pop_front().is_some() {}
        self.stale_bytes.store(0, Ordering::SeqCst);
    }

    /// Newest version of `key` in `store` at or below `bound`.
    pub(crate) fn lookup(&self, store: &[u8], key: &[u8], bound: u64) -> Result<Option<IndexEntry>> {
        let guard = self.inner.read()?;
        if guard.is_none() {
            return Err(closed());
        }
        Ok(self.latest_version(store, key, bound))
    }

    /// Offset of the document-store record written at `seq`. A sequence
    /// that has been superseded by a newer visible version of the same key
    /// is no longer addressable.
    pub(crate) fn seq_lookup(&self, seq: u64, bound: u64) -> Result<Option<u64>> {
        let guard = self.inner.read()?;
        if guard.is_none() {
            return Err(closed());
        }
        if seq == 0 || seq > bound {
            return Ok(None);
        }
        let Some(entry) = self.by_seq.get(&seq).map(|e| e.value().clone()) else {
            return Ok(None);
        };
        if !entry.doc_store {
            return Ok(None);
        }
        match self.latest_for_prefix(&entry.prefix, bound) {
            Some(latest) if latest.seq == seq => Ok(Some(entry.offset)),
            _ => Ok(None),
        }
    }

    /// Visible index entries for the key range `[start_key, end_key]` of
    /// `store`, one per live key in ascending key order. `None` bounds are
    /// open. Tombstones are filtered unless `include_deleted`.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn scan(
        &self,
        store: &[u8],
        start_key: Option<&[u8]>,
        end_key: Option<&[u8]>,
        bound: u64,
        include_deleted: bool,
        inclusive_start: bool,
        inclusive_end: bool,
    ) -> Result<Vec<IndexEntry>> {
        let guard = self.inner.read()?;
        if guard.is_none() {
            return Err(closed());
        }

        let store_prefix = keyspace::store_prefix(store);
        let start_prefix = start_key.map(|k| keyspace::key_prefix(store, k));
        let end_prefix = end_key.map(|k| keyspace::key_prefix(store, k));
        let lower = start_prefix.clone().unwrap_or_else(|| store_prefix.clone());

        let keep = |prefix: &[u8], best: IndexEntry| -> Option<IndexEntry> {
            if best.deleted && !include_deleted {
                return None;
            }
            if !inclusive_start && start_prefix.as_deref() == Some(prefix) {
                return None;
            }
            if !inclusive_end && end_prefix.as_deref() == Some(prefix) {
                return None;
            }
            Some(best)
        };

        let mut out = Vec::new();
        let mut cur_prefix: Option<Vec<u8>> = None;
        let mut cur_best: Option<IndexEntry> = None;
        for entry in self
            .by_key
            .range((Bound::Included(lower), Bound::Unbounded))
        {
            let composite = entry.key();
            if !composite.starts_with(&store_prefix) {
                break;
            }
            let (prefix, _) = keyspace::split(composite);
            if let Some(ep) = &end_prefix {
                if prefix > ep.as_slice() {
                    break;
                }
            }
            if cur_prefix.as_deref() != Some(prefix) {
                if let (Some(p), Some(b)) = (cur_prefix.take(), cur_best.take()) {
                    out.extend(keep(&p, b));
                }
                cur_prefix = Some(prefix.to_vec());
                cur_best = None;
            }
            let candidate = *entry.value();
            if candidate.seq <= bound {
                cur_best = Some(candidate);
            }
        }
        if let (Some(p), Some(b)) = (cur_prefix.take(), cur_best.take()) {
            out.extend(keep(&p, b));
        }
        Ok(out)
    }

    /// Visible `(seq, offset)` pairs in `[start, end]`, document store
    /// only. Each live key appears once, at its newest visible sequence.
    pub(crate) fn scan_seqs(
        &self,
        start: u64,
        end: u64,
        bound: u64,
        inclusive_start: bool,
        inclusive_end: bool,
    ) -> Result<Vec<(u64, u64)>> {
        let guard = self.inner.read()?;
        if guard.is_none() {
            return Err(closed());
        }
        let lo = if inclusive_start {
            Bound::Included(start)
        } else {
            Bound::Excluded(start)
        };
        let hi = if bound < end {
            Bound::Included(bound)
        } else if inclusive_end {
            Bound::Included(end)
        } else {
            Bound::Excluded(end)
        };
        Ok(self
            .by_seq
            .range((lo, hi))
            .filter(|e| e.value().doc_store)
            .filter(|e| {
                matches!(
                    self.latest_for_prefix(&e.value().prefix, bound),
                    Some(latest) if latest.seq == *e.key()
                )
            })
            .map(|e| (*e.key(), e.value().offset))
            .collect())
    }

    /// A cloned file handle for reading records. Clones taken before a
    /// compaction keep reading the pre-compaction file.
    pub(crate) fn read_handle(&self) -> Result<File> {
        let guard = self.inner.read()?;
        match guard.as_ref() {
            Some(inner) => Ok(inner.file.try_clone()?),
            None => Err(closed()),
        }
    }

    /// Reads the record at `offset`. `Ok(None)` when the offset is at or
    /// past the end of the readable file.
    pub(crate) fn read_record_at(&self, offset: u64) -> Result<Option<Record>> {
        let mut file = self.read_handle()?;
        read_record(&mut file, offset)
    }

    /// Appends an upsert, assigning the next sequence. Returns `(seq, offset)`.
    pub(crate) fn put(
        &self,
        store: &[u8],
        key: &[u8],
        meta: Option<&[u8]>,
        body: Option<&[u8]>,
    ) -> Result<(u64, u64)> {
        self.append(store, key, meta, body, false)
    }

    /// Appends a tombstone. Returns `(seq, offset)`.
    pub(crate) fn del(&self, store: &[u8], key: &[u8], meta: Option<&[u8]>) -> Result<(u64, u64)> {
        self.append(store, key, meta, None, true)
    }

    fn append(
        &self,
        store: &[u8],
        key: &[u8],
        meta: Option<&[u8]>,
        body: Option<&[u8]>,
        deleted: bool,
    ) -> Result<(u64, u64)> {
        if key.is_empty() {
            return errstate!("document key must not be empty");
        }
        let mut guard = self.inner.write()?;
        let inner = guard.as_mut().ok_or_else(closed)?;

        let seq = inner.last_seq + 1;
        let record = Record {
            seq,
            store: store.to_vec(),
            key: key.to_vec(),
            meta: meta.map(<[u8]>::to_vec),
            body: body.map(<[u8]>::to_vec),
            deleted,
        };
        let encoded = record.encode();
        let offset = inner.end_offset;
        inner.writer.write_all(&encoded)?;
        inner.end_offset += encoded.len() as u64;
        inner.last_seq = seq;
        self.apply(&record, offset, encoded.len() as u32);
        Ok((seq, offset))
    }

    /// Makes everything appended so far durable and visible.
    pub(crate) fn commit(&self) -> Result<()> {
        let mut guard = self.inner.write()?;
        let inner = guard.as_mut().ok_or_else(closed)?;
        inner.writer.flush()?;
        if self.config.sync_on_commit {
            inner.file.sync_all()?;
        }
        self.committed_seq.store(inner.last_seq, Ordering::SeqCst);
        self.committed_end.store(inner.end_offset, Ordering::SeqCst);
        Ok(())
    }

    /// Reverts the file to its state at `seq`: later records are removed
    /// from the index and the file is truncated. Changes past `seq` are not
    /// recoverable.
    pub(crate) fn rollback_to(&self, seq: u64) -> Result<()> {
        let mut guard = self.inner.write()?;
        let inner = guard.as_mut().ok_or_else(closed)?;
        if seq >= inner.last_seq {
            return Ok(());
        }
        inner.writer.flush()?;

        let removed: Vec<(u64, u64)> = self
            .by_seq
            .range((Bound::Excluded(seq), Bound::Unbounded))
            .map(|e| (*e.key(), e.value().offset))
            .collect();

        let mut truncate_at = inner.end_offset;
        let mut reader = inner.file.try_clone()?;
        for &(s, offset) in &removed {
            truncate_at = truncate_at.min(offset);
            if let Some(record) = read_record(&mut reader, offset)? {
                self.by_key
                    .remove(&keyspace::index_key(&record.store, &record.key, record.seq));
            }
            self.by_seq.remove(&s);
        }

        inner.file.set_len(truncate_at)?;
        inner.file.sync_all()?;
        inner.writer.seek(SeekFrom::Start(truncate_at))?;
        inner.end_offset = truncate_at;
        inner.last_seq = seq;
        if self.committed_seq.load(Ordering::SeqCst) > seq {
            self.committed_seq.store(seq, Ordering::SeqCst);
            self.committed_end.store(truncate_at, Ordering::SeqCst);
        }
        tracing::debug!(
            "store {}: rolled back to sequence {seq}",
            self.path.display()
        );
        Ok(())
    }

    /// Number of live, non-deleted documents in the document store.
    pub(crate) fn doc_count(&self, bound: u64) -> Result<u64> {
        Ok(self.scan(b"", None, None, bound, false, true, true)?.len() as u64)
    }

    /// Whether enough of the file is stale to be worth compacting.
    pub(crate) fn should_compact(&self) -> bool {
        let end = self.committed_end.load(Ordering::SeqCst);
        if end < self.config.compact_min_file_size {
            return false;
        }
        self.stale_bytes.load(Ordering::SeqCst) as f64 >= end as f64 * self.config.compact_stale_ratio
    }

    /// Rewrites the file keeping only the newest committed version of each
    /// live key (all stores), then swaps it in place. Earlier versions and
    /// tombstones are gone afterwards, so rollback cannot reach past a
    /// compaction. Callers must hold the file's transaction slot.
    pub(crate) fn compact(&self) -> Result<()> {
        let mut guard = self.inner.write()?;
        let inner = guard.as_mut().ok_or_else(closed)?;
        inner.writer.flush()?;
        let bound = self.committed_seq.load(Ordering::SeqCst);

        // Latest visible, non-deleted version per (store, key).
        let mut live: Vec<IndexEntry> = Vec::new();
        let mut cur_prefix: Option<Vec<u8>> = None;
        let mut cur_best: Option<IndexEntry> = None;
        for entry in self.by_key.iter() {
            let (prefix, _) = keyspace::split(entry.key());
            if cur_prefix.as_deref() != Some(prefix) {
                if let Some(best) = cur_best.take() {
                    if !best.deleted {
                        live.push(best);
                    }
                }
                cur_prefix = Some(prefix.to_vec());
            }
            let candidate = *entry.value();
            if candidate.seq <= bound {
                cur_best = Some(candidate);
            }
        }
        if let Some(best) = cur_best.take() {
            if !best.deleted {
                live.push(best);
            }
        }

        let tmp_path = PathBuf::from(format!("{}.compact", self.path.display()));
        let mut tmp = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;
        tmp.write_all(&Header::new().encode())?;

        let mut reader = inner.file.try_clone()?;
        let mut offset = HEADER_SIZE as u64;
        let mut rewritten: Vec<(Record, u64, u32)> = Vec::with_capacity(live.len());
        for entry in &live {
            let record = read_record(&mut reader, entry.offset)?
                .ok_or_else(|| Error::IO("compaction read past end of file".to_string()))?;
            let encoded = record.encode();
            tmp.write_all(&encoded)?;
            rewritten.push((record, offset, encoded.len() as u32));
            offset += encoded.len() as u64;
        }
        tmp.sync_all()?;
        fs::rename(&tmp_path, &self.path)?;

        // Swap in the new file; handles cloned earlier keep reading the old
        // inode.
        self.clear_index();
        for (record, offset, len) in &rewritten {
            self.apply(record, *offset, *len);
        }
        let mut writer_file = tmp.try_clone()?;
        writer_file.seek(SeekFrom::Start(offset))?;
        *inner = Inner {
            file: tmp,
            writer: BufWriter::with_capacity(self.config.write_buffer_size, writer_file),
            end_offset: offset,
            last_seq: bound,
        };
        self.committed_end.store(offset, Ordering::SeqCst);
        tracing::info!(
            "compacted store {} down to {} records, {offset} bytes",
            self.path.display(),
            rewritten.len()
        );
        Ok(())
    }

    /// Closes the handles and unlinks the file. If the unlink fails the
    /// store is reopened so the handle stays usable, and the failure is
    /// surfaced.
    pub(crate) fn delete_file(&self) -> Result<()> {
        let mut guard = self.inner.write()?;
        if guard.is_none() {
            return Err(closed());
        }
        *guard = None;
        self.clear_index();
        self.committed_seq.store(0, Ordering::SeqCst);
        self.committed_end.store(0, Ordering::SeqCst);

        match fs::remove_file(&self.path) {
            Ok(()) => {
                tracing::info!("deleted store {}", self.path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                let file = OpenOptions::new().read(true).write(true).open(&self.path)?;
                *guard = Some(self.load(file)?);
                Err(Error::IO(format!(
                    "unlink {}: {e}",
                    self.path.display()
                )))
            }
        }
    }

    /// Creates a fresh, empty store file after `delete_file`.
    pub(crate) fn recreate(&self) -> Result<()> {
        let mut guard = self.inner.write()?;
        if guard.is_some() {
            return errstate!("store file is still open");
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.path)?;
        *guard = Some(self.load(file)?);
        Ok(())
    }
}

// Takes the advisory lock guarding `path` against a second opener, and
// records who holds the store for whoever finds the file later. The OS
// releases the lock when the returned handle drops, so a crashed holder
// never wedges the store.
fn acquire_lock(path: &Path) -> Result<File> {
    let mut lock_file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(format!("{}.lock", path.display()))?;

    #[cfg(unix)]
    {
        let rc = unsafe { libc::flock(lock_file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if rc != 0 {
            return Err(Error::IO(format!(
                "store {} is locked by another opener: {}",
                path.display(),
                std::io::Error::last_os_error()
            )));
        }
    }

    writeln!(
        lock_file,
        "pid {} holds {}",
        std::process::id(),
        path.display()
    )?;
    lock_file.flush()?;
    Ok(lock_file)
}

/// Reads the record at `offset` through `file`. `Ok(None)` at a clean end
/// of file.
pub(crate) fn read_record(file: &mut File, offset: u64) -> Result<Option<Record>> {
    file.seek(SeekFrom::Start(offset))?;
    Ok(Record::read_from(file)?.map(|(record, _)| record))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_store(dir: &TempDir) -> LogStore {
        LogStore::open(
            dir.path().join("test.db"),
            OpenFlags::default().create(),
            Config::default(),
        )
        .expect("Failed to open store")
    }

    #[test]
    fn test_put_assigns_monotonic_sequences() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        let (s1, _) = store.put(b"", b"a", None, Some(b"1")).unwrap();
        let (s2, _) = store.put(b"", b"b", None, Some(b"2")).unwrap();
        let (s3, _) = store.put(b"", b"a", None, Some(b"3")).unwrap();
        assert_eq!((s1, s2, s3), (1, 2, 3));
    }

    #[test]
    fn test_uncommitted_writes_are_invisible() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        store.put(b"", b"a", None, Some(b"1")).unwrap();
        let bound = store.committed_sequence();
        assert_eq!(bound, 0);
        assert_eq!(store.lookup(b"", b"a", bound).unwrap(), None);

        store.commit().unwrap();
        let bound = store.committed_sequence();
        assert_eq!(bound, 1);
        let entry = store.lookup(b"", b"a", bound).unwrap().unwrap();
        let record = store.read_record_at(entry.offset).unwrap().unwrap();
        assert_eq!(record.body.as_deref(), Some(&b"1"[..]));
    }

    #[test]
    fn test_latest_version_wins() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        store.put(b"", b"a", None, Some(b"old")).unwrap();
        store.put(b"", b"a", None, Some(b"new")).unwrap();
        store.commit().unwrap();

        let entry = store.lookup(b"", b"a", store.committed_sequence()).unwrap().unwrap();
        assert_eq!(entry.seq, 2);
        let record = store.read_record_at(entry.offset).unwrap().unwrap();
        assert_eq!(record.body.as_deref(), Some(&b"new"[..]));

        // The superseded sequence is no longer addressable; the newest is.
        assert_eq!(store.seq_lookup(1, store.committed_sequence()).unwrap(), None);
        let offset = store.seq_lookup(2, store.committed_sequence()).unwrap().unwrap();
        let new = store.read_record_at(offset).unwrap().unwrap();
        assert_eq!(new.body.as_deref(), Some(&b"new"[..]));
    }

    #[test]
    fn test_superseded_seq_stays_visible_below_bound() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        store.put(b"", b"a", None, Some(b"committed")).unwrap();
        store.commit().unwrap();
        let bound = store.committed_sequence();

        // A staged rewrite above the bound must not hide the committed
        // version from readers.
        store.put(b"", b"a", None, Some(b"staged")).unwrap();
        let offset = store.seq_lookup(1, bound).unwrap().unwrap();
        let record = store.read_record_at(offset).unwrap().unwrap();
        assert_eq!(record.body.as_deref(), Some(&b"committed"[..]));
        assert_eq!(store.scan_seqs(1, u64::MAX, bound, true, true).unwrap().len(), 1);
    }

    #[test]
    fn test_replay_rebuilds_index() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.db");
        {
            let store = LogStore::open(&path, OpenFlags::default().create(), Config::default())
                .unwrap();
            store.put(b"", b"a", Some(b"m"), Some(b"1")).unwrap();
            store.put(b"", b"b", None, Some(b"2")).unwrap();
            store.del(b"", b"a", None).unwrap();
            store.commit().unwrap();
        }

        let store = LogStore::open(&path, OpenFlags::default(), Config::default()).unwrap();
        assert_eq!(store.committed_sequence(), 3);
        let entry = store.lookup(b"", b"a", 3).unwrap().unwrap();
        assert!(entry.deleted);
        assert_eq!(store.doc_count(3).unwrap(), 1);
    }

    #[test]
    fn test_torn_tail_is_dropped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.db");
        {
            let store = LogStore::open(&path, OpenFlags::default().create(), Config::default())
                .unwrap();
            store.put(b"", b"a", None, Some(b"1")).unwrap();
            store.commit().unwrap();
        }
        // Simulate a torn append.
        {
            let mut file = OpenOptions::new().append(true).open(&path).unwrap();
            file.write_all(&[0x00, 0x00, 0x00, 0x30, 0x01]).unwrap();
        }

        let store = LogStore::open(&path, OpenFlags::default(), Config::default()).unwrap();
        assert_eq!(store.committed_sequence(), 1);
        assert!(store.lookup(b"", b"a", 1).unwrap().is_some());
        // The file was truncated back to the last whole record.
        let len = fs::metadata(&path).unwrap().len();
        assert_eq!(len, store.committed_end.load(Ordering::SeqCst));
    }

    #[test]
    fn test_rollback_truncates_and_rewinds() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        store.put(b"", b"a", None, Some(b"1")).unwrap();
        store.commit().unwrap();
        let committed_end = store.committed_end.load(Ordering::SeqCst);

        store.put(b"", b"b", None, Some(b"2")).unwrap();
        store.put(b"", b"a", None, Some(b"3")).unwrap();
        store.rollback_to(1).unwrap();

        assert_eq!(store.committed_sequence(), 1);
        assert_eq!(store.committed_end.load(Ordering::SeqCst), committed_end);
        assert_eq!(store.lookup(b"", b"b", u64::MAX).unwrap(), None);
        let entry = store.lookup(b"", b"a", u64::MAX).unwrap().unwrap();
        assert_eq!(entry.seq, 1);

        // Sequences restart from the rollback point.
        let (seq, _) = store.put(b"", b"c", None, Some(b"4")).unwrap();
        assert_eq!(seq, 2);
    }

    #[test]
    fn test_scan_groups_versions() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        store.put(b"", b"a", None, Some(b"1")).unwrap();
        store.put(b"", b"b", None, Some(b"2")).unwrap();
        store.put(b"", b"b", None, Some(b"2b")).unwrap();
        store.put(b"", b"c", None, Some(b"3")).unwrap();
        store.del(b"", b"c", None).unwrap();
        store.commit().unwrap();
        let bound = store.committed_sequence();

        let hits = store.scan(b"", None, None, bound, false, true, true).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].seq, 1);
        assert_eq!(hits[1].seq, 3); // newest version of "b"

        let with_deleted = store.scan(b"", None, None, bound, true, true, true).unwrap();
        assert_eq!(with_deleted.len(), 3);
        assert!(with_deleted[2].deleted);
    }

    #[test]
    fn test_scan_bounds_and_inclusivity() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        for key in [&b"a"[..], b"b", b"c", b"d"] {
            store.put(b"", key, None, Some(b"x")).unwrap();
        }
        store.commit().unwrap();
        let bound = store.committed_sequence();

        let hits = store
            .scan(b"", Some(b"b"), Some(b"c"), bound, false, true, true)
            .unwrap();
        assert_eq!(hits.len(), 2);

        let hits = store
            .scan(b"", Some(b"b"), Some(b"c"), bound, false, false, true)
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].seq, 3); // "c"

        let hits = store
            .scan(b"", Some(b"b"), Some(b"c"), bound, false, true, false)
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].seq, 2); // "b"
    }

    #[test]
    fn test_stores_are_isolated() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);

        store.put(b"", b"k", None, Some(b"doc")).unwrap();
        store.put(b"info", b"k", None, Some(b"info-doc")).unwrap();
        store.commit().unwrap();
        let bound = store.committed_sequence();

        let doc = store.lookup(b"", b"k", bound).unwrap().unwrap();
        let info = store.lookup(b"info", b"k", bound).unwrap().unwrap();
        assert_ne!(doc.offset, info.offset);
        assert_eq!(store.doc_count(bound).unwrap(), 1);

        // Sequence scans only surface the document store.
        let seqs = store.scan_seqs(1, u64::MAX, bound, true, true).unwrap();
        assert_eq!(seqs.len(), 1);
        assert_eq!(seqs[0].0, 1);
    }

    #[test]
    fn test_compact_drops_stale_versions() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.db");
        let store = LogStore::open(&path, OpenFlags::default().create(), Config::default())
            .unwrap();

        for i in 0..10 {
            store
                .put(b"", b"churn", None, Some(format!("v{i}").as_bytes()))
                .unwrap();
        }
        store.put(b"", b"keep", None, Some(b"stay")).unwrap();
        store.put(b"", b"gone", None, Some(b"x")).unwrap();
        store.del(b"", b"gone", None).unwrap();
        store.commit().unwrap();
        let before = fs::metadata(&path).unwrap().len();

        store.compact().unwrap();
        let after = fs::metadata(&path).unwrap().len();
        assert!(after < before, "compaction should shrink the file");

        let bound = store.committed_sequence();
        let entry = store.lookup(b"", b"churn", bound).unwrap().unwrap();
        let record = store.read_record_at(entry.offset).unwrap().unwrap();
        assert_eq!(record.body.as_deref(), Some(&b"v9"[..]));
        assert_eq!(store.lookup(b"", b"gone", bound).unwrap(), None);
        assert_eq!(store.doc_count(bound).unwrap(), 2);

        // Writes keep working on the swapped file.
        let (seq, _) = store.put(b"", b"new", None, Some(b"y")).unwrap();
        store.commit().unwrap();
        assert_eq!(seq, bound + 1);
    }

    #[test]
    fn test_delete_and_recreate() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.db");
        let store = LogStore::open(&path, OpenFlags::default().create(), Config::default())
            .unwrap();
        store.put(b"", b"a", None, Some(b"1")).unwrap();
        store.commit().unwrap();

        store.delete_file().unwrap();
        assert!(!path.exists());
        assert!(matches!(
            store.lookup(b"", b"a", u64::MAX),
            Err(Error::StateViolation(_))
        ));

        store.recreate().unwrap();
        assert!(path.exists());
        assert_eq!(store.committed_sequence(), 0);
        assert_eq!(store.lookup(b"", b"a", u64::MAX).unwrap(), None);
    }

    #[test]
    fn test_empty_key_rejected() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        assert!(matches!(
            store.put(b"", b"", None, Some(b"x")),
            Err(Error::StateViolation(_))
        ));
    }

    #[cfg(unix)]
    #[test]
    fn test_second_opener_is_locked_out() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.db");
        let store = LogStore::open(&path, OpenFlags::default().create(), Config::default())
            .unwrap();

        // The lock file names the holder.
        let held = fs::read_to_string(format!("{}.lock", path.display())).unwrap();
        assert!(held.contains(&std::process::id().to_string()));
        assert!(held.contains("test.db"));

        assert!(matches!(
            LogStore::open(&path, OpenFlags::default(), Config::default()),
            Err(Error::IO(_))
        ));

        // The lock goes with the handle; the path opens again afterwards.
        drop(store);
        LogStore::open(&path, OpenFlags::default(), Config::default()).unwrap();
    }

    #[test]
    fn test_open_missing_without_create() {
        let dir = TempDir::new().unwrap();
        let result = LogStore::open(
            dir.path().join("absent.db"),
            OpenFlags::default(),
            Config::default(),
        );
        assert!(matches!(result, Err(Error::IO(_))));
    }
}
