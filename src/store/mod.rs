//! The append-only backing store and its on-disk formats.
//!
//! This is the collaborator layer underneath the database handle: it owns
//! persistence, sequence assignment, point and ordered reads, and the
//! commit/rollback machinery. Everything above it (`Database`,
//! `Transaction`, `DocEnumerator`) speaks to a [`LogStore`].

pub mod header;
pub mod keyspace;
pub mod log;
pub mod record;

pub use log::{IndexEntry, LogStore};
pub use record::Record;

/// Named keyspace for database metadata.
pub const INFO_STORE: &[u8] = b"info";

/// Named keyspace for local (non-replicated) documents.
pub const LOCAL_DOC_STORE: &[u8] = b"_local";

/// The default keyspace documents live in.
pub(crate) const DOC_STORE: &[u8] = b"";
