//! Tunables for the file I/O substrate.

use std::time::Duration;

/// How an [`AsyncFile`](crate::io::engine::AsyncFile) services reads and writes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum IoMode {
    /// Operations are queued and serviced by the per-file worker thread.
    #[default]
    Asynchronous,
    /// Operations run on the calling thread; errors surface immediately.
    Synchronous,
}

/// Configuration shared by the I/O engine and the record codec.
///
/// ```
/// use flatbridge::config::{IoConfig, IoMode};
///
/// let cfg = IoConfig {
///     chunk_size: 4096,
///     mode: IoMode::Synchronous,
///     ..Default::default()
/// };
/// assert_eq!(cfg.high_water, 20);
/// ```
#[derive(Clone, Debug)]
pub struct IoConfig {
    /// Bytes per read request, and the batch size for buffered writes.
    pub chunk_size: usize,
    pub mode: IoMode,
    /// A producer enqueuing while the queue holds more than this many
    /// operations blocks...
    pub high_water: usize,
    /// ...until the depth falls back to this many.
    pub low_water: usize,
    /// How often a blocked producer re-checks the queue depth.
    pub poll_interval: Duration,
}

impl Default for IoConfig {
    fn default() -> Self {
        Self {
            chunk_size: 64 * 1024,
            mode: IoMode::Asynchronous,
            high_water: 20,
            low_water: 10,
            poll_interval: Duration::from_millis(1),
        }
    }
}

impl IoConfig {
    /// Same configuration with a different chunk size (clamped to at least 1).
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    #[must_use]
    pub fn with_mode(mut self, mode: IoMode) -> Self {
        self.mode = mode;
        self
    }
}
