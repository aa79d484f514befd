/// Boolean options for opening a database file.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OpenFlags {
    /// Create the file if it doesn't exist
    pub create: bool,

    /// Open the file read-only; transactions are refused
    pub read_only: bool,

    /// Compact opportunistically after commits once enough of the file is stale
    pub auto_compact: bool,
}

impl OpenFlags {
    /// Create the file if missing
    pub fn create(mut self) -> Self {
        self.create = true;
        self
    }

    /// Refuse writes on this handle
    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    /// Enable opportunistic compaction
    pub fn auto_compact(mut self) -> Self {
        self.auto_compact = true;
        self
    }
}

/// Configuration for the store underneath a database
#[derive(Debug, Clone)]
pub struct Config {
    /// Buffer size for the append writer (default: 64KB)
    pub write_buffer_size: usize,

    /// Call fsync on every commit (default: true)
    pub sync_on_commit: bool,

    /// Minimum file size before auto-compaction is considered (default: 1MB)
    pub compact_min_file_size: u64,

    /// Stale-byte fraction that triggers auto-compaction (default: 0.5)
    pub compact_stale_ratio: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            write_buffer_size: 64 * 1024, // 64KB
            sync_on_commit: true,
            compact_min_file_size: 1024 * 1024, // 1MB
            compact_stale_ratio: 0.5,
        }
    }
}

impl Config {
    /// Set the append writer buffer size
    pub fn write_buffer_size(mut self, size: usize) -> Self {
        self.write_buffer_size = size;
        self
    }

    /// Enable or disable fsync on commit
    pub fn sync_on_commit(mut self, enabled: bool) -> Self {
        self.sync_on_commit = enabled;
        self
    }

    /// Set the minimum file size for auto-compaction
    pub fn compact_min_file_size(mut self, size: u64) -> Self {
        self.compact_min_file_size = size;
        self
    }

    /// Set the stale fraction that triggers auto-compaction
    pub fn compact_stale_ratio(mut self, ratio: f64) -> Self {
        self.compact_stale_ratio = ratio;
        self
    }
}
