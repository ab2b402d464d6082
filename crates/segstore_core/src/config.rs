//! Store configuration.

/// Default size of the buffer used to move bytes between segments (64 KiB).
pub const DEFAULT_COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Configuration for opening a store.
#[derive(Debug, Clone)]
pub struct Config {
    /// Whether to create the store if it doesn't exist.
    pub create_if_missing: bool,

    /// Size of the fixed buffer used when folding or splitting segments.
    pub copy_buffer_size: usize,

    /// Whether to fsync segments and metadata on close.
    pub sync_on_close: bool,

    /// Whether archive entries are deflated instead of stored.
    pub compress_archive: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            copy_buffer_size: DEFAULT_COPY_BUFFER_SIZE,
            sync_on_close: true,
            compress_archive: false,
        }
    }
}

impl Config {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether to create the store if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets the copy buffer size. Zero is treated as one byte.
    #[must_use]
    pub const fn copy_buffer_size(mut self, size: usize) -> Self {
        self.copy_buffer_size = if size == 0 { 1 } else { size };
        self
    }

    /// Sets whether to sync on close.
    #[must_use]
    pub const fn sync_on_close(mut self, value: bool) -> Self {
        self.sync_on_close = value;
        self
    }

    /// Sets whether archive entries are compressed.
    #[must_use]
    pub const fn compress_archive(mut self, value: bool) -> Self {
        self.compress_archive = value;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = Config::default();
        assert!(config.create_if_missing);
        assert!(config.sync_on_close);
        assert!(!config.compress_archive);
        assert_eq!(config.copy_buffer_size, DEFAULT_COPY_BUFFER_SIZE);
    }

    #[test]
    fn builder_pattern() {
        let config = Config::new()
            .create_if_missing(false)
            .sync_on_close(false)
            .copy_buffer_size(3);

        assert!(!config.create_if_missing);
        assert!(!config.sync_on_close);
        assert_eq!(config.copy_buffer_size, 3);
    }

    #[test]
    fn zero_copy_buffer_is_clamped() {
        let config = Config::new().copy_buffer_size(0);
        assert_eq!(config.copy_buffer_size, 1);
    }
}
