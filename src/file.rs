//! Process-wide, per-path coordination.
//!
//! Every database file gets exactly one [`SharedFile`], looked up by
//! canonical path in a lazily-initialized registry. The entry owns the
//! transaction slot (one writer per file, waiters block on a condvar) and
//! hands out the shared store handle, so every `Database` opened on the
//! same path reads through one index and one visibility watermark. Entries
//! live for the process lifetime.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, OnceLock, Weak};

use crate::config::{Config, OpenFlags};
use crate::error::Result;
use crate::store::LogStore;
use crate::Error;

static REGISTRY: OnceLock<Mutex<HashMap<PathBuf, Arc<SharedFile>>>> = OnceLock::new();

pub struct SharedFile {
    path: PathBuf,
    busy: Mutex<bool>,
    cond: Condvar,
    store: Mutex<Weak<LogStore>>,
}

impl SharedFile {
    /// The singleton coordinator for `path`, created on first use.
    pub fn for_path(path: &Path) -> Result<Arc<SharedFile>> {
        let canonical = canonicalize(path)?;
        let registry = REGISTRY.get_or_init(Default::default);
        let mut map = registry.lock()?;
        let entry = map
            .entry(canonical.clone())
            .or_insert_with(|| {
                Arc::new(SharedFile {
                    path: canonical,
                    busy: Mutex::new(false),
                    cond: Condvar::new(),
                    store: Mutex::new(Weak::new()),
                })
            });
        Ok(Arc::clone(entry))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The store handle shared by every database on this path, opened on
    /// first use and revived if all handles were dropped.
    pub(crate) fn store(&self, flags: OpenFlags, config: &Config) -> Result<Arc<LogStore>> {
        let mut weak = self.store.lock()?;
        if let Some(store) = weak.upgrade() {
            return Ok(store);
        }
        let store = Arc::new(LogStore::open(&self.path, flags, config.clone())?);
        *weak = Arc::downgrade(&store);
        Ok(store)
    }

    /// Blocks until the file has no active transaction, then claims the
    /// slot.
    pub(crate) fn begin_transaction(&self) -> Result<()> {
        let mut busy = self.busy.lock()?;
        while *busy {
            busy = self.cond.wait(busy)?;
        }
        *busy = true;
        Ok(())
    }

    /// Claims the slot only if it is free, without blocking.
    pub(crate) fn try_begin_transaction(&self) -> Result<bool> {
        let mut busy = self.busy.lock()?;
        if *busy {
            return Ok(false);
        }
        *busy = true;
        Ok(true)
    }

    /// Releases the slot and wakes one waiter. Infallible: it runs on every
    /// transaction drop path.
    pub(crate) fn end_transaction(&self) {
        let mut busy = match self.busy.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *busy = false;
        self.cond.notify_one();
    }
}

// Canonicalizes `path` even when the file doesn't exist yet (the parent
// directory must).
fn canonicalize(path: &Path) -> Result<PathBuf> {
    if let Ok(canonical) = path.canonicalize() {
        return Ok(canonical);
    }
    let name = path
        .file_name()
        .ok_or_else(|| Error::IO(format!("invalid database path {}", path.display())))?;
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    Ok(parent.canonicalize()?.join(name))
}
