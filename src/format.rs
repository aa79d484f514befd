//! Formatting of document keys and other raw bytes for logs and Debug
//! output.

use std::fmt::{self, Write as _};

/// Displays a key or payload as a quoted string, escaping anything that
/// isn't printable ASCII. Writes straight into the formatter, so log lines
/// and Debug output don't allocate per key.
pub struct Raw<'a>(pub &'a [u8]);

impl fmt::Display for Raw<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_char('"')?;
        for escaped in self.0.iter().copied().flat_map(std::ascii::escape_default) {
            f.write_char(escaped as char)?;
        }
        f.write_char('"')
    }
}

impl fmt::Debug for Raw<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}
