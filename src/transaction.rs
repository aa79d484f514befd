//! Scoped, file-exclusive write transactions.
//!
//! Beginning a transaction claims the file's single writer slot, blocking
//! while another transaction holds it. Mutations stage records that stay
//! invisible to readers until commit. The transaction is tri-state: it
//! starts neutral, the first successful mutation makes it dirty, and any
//! failed operation makes it failed. At scope end a dirty transaction
//! commits and a failed one rolls the file back to where it started.
//! [`Transaction::finish`] is the error-surfacing way to end the scope;
//! plain `drop` does the same work and logs what it cannot return.

use crate::db::{ContentOptions, Database};
use crate::document::Document;
use crate::error::Result;
use crate::errstate;
use crate::store::DOC_STORE;
use crate::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Neutral,
    Dirty,
    Failed,
}

pub struct Transaction<'db> {
    db: &'db Database,
    state: State,
    start_sequence: u64,
    done: bool,
}

impl<'db> Transaction<'db> {
    /// Claims the write slot for the database's file, blocking until any
    /// active transaction ends.
    pub fn begin(db: &'db Database) -> Result<Transaction<'db>> {
        if db.is_read_only() {
            return errstate!("database {} is read-only", db.path().display());
        }
        db.shared_file().begin_transaction()?;
        let start_sequence = db.last_sequence();
        tracing::debug!(
            "transaction began on {} at sequence {start_sequence}",
            db.path().display()
        );
        Ok(Transaction {
            db,
            state: State::Neutral,
            start_sequence,
            done: false,
        })
    }

    /// The file's last committed sequence when this transaction began; a
    /// failed transaction leaves the file here.
    pub fn start_sequence(&self) -> u64 {
        self.start_sequence
    }

    // Every mutation funnels through here: success makes a neutral
    // transaction dirty, failure makes it failed and surfaces the error.
    fn check<T>(&mut self, result: Result<T>) -> Result<T> {
        match result {
            Ok(value) => {
                if self.state == State::Neutral {
                    self.state = State::Dirty;
                }
                Ok(value)
            }
            Err(e) => {
                self.state = State::Failed;
                Err(e)
            }
        }
    }

    /// Upserts `doc` by key, assigning it the next sequence and its file
    /// offset.
    pub fn write(&mut self, doc: &mut Document) -> Result<u64> {
        let result = self
            .db
            .store_handle()
            .put(DOC_STORE, doc.key(), doc.meta(), doc.body());
        let (seq, offset) = self.check(result)?;
        doc.set_stored(seq, offset, false);
        Ok(seq)
    }

    /// Stores `body` under `key`, returning the new sequence.
    pub fn set(&mut self, key: &[u8], body: &[u8]) -> Result<u64> {
        let result = self.db.store_handle().put(DOC_STORE, key, None, Some(body));
        Ok(self.check(result)?.0)
    }

    /// Stores `meta` and `body` under `key`, returning the new sequence.
    pub fn set_with_meta(&mut self, key: &[u8], meta: &[u8], body: &[u8]) -> Result<u64> {
        let result = self
            .db
            .store_handle()
            .put(DOC_STORE, key, Some(meta), Some(body));
        Ok(self.check(result)?.0)
    }

    /// Tombstones `key`, returning the deletion's sequence.
    pub fn del(&mut self, key: &[u8]) -> Result<u64> {
        let result = self.db.store_handle().del(DOC_STORE, key, None);
        Ok(self.check(result)?.0)
    }

    /// Tombstones `doc`'s key, carrying its metadata into the tombstone.
    pub fn del_doc(&mut self, doc: &mut Document) -> Result<u64> {
        let result = self.db.store_handle().del(DOC_STORE, doc.key(), doc.meta());
        let (seq, offset) = self.check(result)?;
        doc.set_stored(seq, offset, true);
        Ok(seq)
    }

    /// Tombstones the document currently addressable at `seq`.
    pub fn del_sequence(&mut self, seq: u64) -> Result<u64> {
        let result = self
            .db
            .get_by_sequence(seq, ContentOptions::MetaOnly)
            .and_then(|doc| doc.ok_or(Error::KeyNotFound))
            .and_then(|doc| self.db.store_handle().del(DOC_STORE, doc.key(), doc.meta()));
        Ok(self.check(result)?.0)
    }

    /// Writes a raw document into a named store, or deletes it when both
    /// meta and body are absent.
    pub fn put_raw(
        &mut self,
        store_name: &[u8],
        key: &[u8],
        meta: Option<&[u8]>,
        body: Option<&[u8]>,
    ) -> Result<u64> {
        let store = self.db.store_handle();
        let result = if meta.is_none() && body.is_none() {
            store.del(store_name, key, None)
        } else {
            store.put(store_name, key, meta, body)
        };
        Ok(self.check(result)?.0)
    }

    /// Durably commits everything staged so far without ending the
    /// transaction.
    pub fn commit(&mut self) -> Result<()> {
        let result = self.db.store_handle().commit();
        self.check(result)
    }

    /// Reverts the file to its state at `seq`. Rolling forward past the
    /// transaction start is refused; changes after `seq` are gone.
    pub fn rollback_to(&mut self, seq: u64) -> Result<()> {
        let result = if seq > self.start_sequence {
            errstate!("cannot roll back to {seq}, transaction began at {}", self.start_sequence)
        } else {
            self.db.store_handle().rollback_to(seq)
        };
        self.check(result)
    }

    /// Closes the store file and unlinks it. If the unlink fails, the file
    /// is reopened and the transaction becomes failed; the reopen must
    /// succeed for the handle to stay usable.
    pub fn delete_database(&mut self) -> Result<()> {
        match self.db.store_handle().delete_file() {
            Ok(()) => {
                // Nothing is left to commit or roll back.
                self.state = State::Neutral;
                Ok(())
            }
            Err(e) => {
                self.state = State::Failed;
                Err(e)
            }
        }
    }

    /// Deletes the database file and reopens the same path empty, keeping
    /// this transaction alive.
    pub fn erase(&mut self) -> Result<()> {
        self.delete_database()?;
        match self.db.store_handle().recreate() {
            Ok(()) => {
                self.start_sequence = 0;
                Ok(())
            }
            Err(e) => {
                self.state = State::Failed;
                Err(e)
            }
        }
    }

    /// Ends the transaction, surfacing the commit or rollback outcome that
    /// a plain drop could only log.
    pub fn finish(mut self) -> Result<()> {
        self.end()
    }

    fn end(&mut self) -> Result<()> {
        if self.done {
            return Ok(());
        }
        self.done = true;
        let store = self.db.store_handle();
        let mut result = Ok(());

        if self.state == State::Dirty {
            if let Err(e) = store.commit() {
                self.state = State::Failed;
                result = Err(e);
            }
        }
        if self.state == State::Failed {
            if let Err(e) = store.rollback_to(self.start_sequence) {
                tracing::error!(
                    "rollback to sequence {} failed on {}: {e}",
                    self.start_sequence,
                    self.db.path().display()
                );
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        tracing::debug!(
            "transaction ended on {} ({})",
            self.db.path().display(),
            if result.is_ok() { "committed" } else { "failed" }
        );

        self.db.shared_file().end_transaction();
        if result.is_ok() {
            self.db.maybe_auto_compact();
        }
        result
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.end() {
            tracing::error!(
                "transaction on {} failed at scope end: {e}",
                self.db.path().display()
            );
        }
    }
}
