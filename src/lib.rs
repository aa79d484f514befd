pub mod config;
pub mod db;
pub mod document;
pub mod encoding;
pub mod enumerator;
pub mod error;
pub mod file;
pub mod format;
pub mod store;
pub mod transaction;

pub use config::{Config, OpenFlags};
pub use db::{ContentOptions, Database};
pub use document::Document;
pub use encoding::{Encoder, Value, ValueType};
pub use enumerator::{DocEnumerator, EnumerationOptions};
pub use error::{Error, Result};
pub use store::{INFO_STORE, LOCAL_DOC_STORE};
pub use transaction::Transaction;
