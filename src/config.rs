//! Group-level configuration.

/// Compression mode negotiated for a group's connections.
///
/// Controls how permessage-deflate contexts are allocated. The per-message
/// negotiation result (whether the extension applies to a given connection
/// at all) is decided at upgrade time by the HTTP layer and passed to
/// [`Connection::open`](crate::Connection::open).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CompressionMode {
    /// permessage-deflate is never applied.
    #[default]
    Disabled,
    /// Compression uses the group hub's shared contexts, reset after each
    /// message (no context takeover). Cheapest in memory.
    Shared,
    /// Each connection keeps a private deflate context that persists
    /// across messages, improving ratios at a per-connection memory cost.
    SlidingWindow,
}

impl CompressionMode {
    /// Whether this mode applies compression at all.
    #[inline]
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        !matches!(self, CompressionMode::Disabled)
    }
}

/// Configuration shared by all connections of a [`Group`](crate::Group).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupConfig {
    /// Compression mode for the group's connections.
    pub compression: CompressionMode,

    /// Maximum size of a reassembled (and, where applicable, inflated)
    /// message in bytes. Exceeding it force-closes the connection.
    ///
    /// Default: 16 MB.
    pub max_payload: usize,

    /// Deflate compression level (0-9).
    ///
    /// Default: 6.
    pub compression_level: u32,
}

impl Default for GroupConfig {
    fn default() -> Self {
        Self {
            compression: CompressionMode::Disabled,
            max_payload: 16 * 1024 * 1024,
            compression_level: 6,
        }
    }
}

impl GroupConfig {
    /// Create a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the compression mode.
    #[must_use]
    pub const fn with_compression(mut self, mode: CompressionMode) -> Self {
        self.compression = mode;
        self
    }

    /// Set the maximum reassembled message size.
    #[must_use]
    pub const fn with_max_payload(mut self, max: usize) -> Self {
        self.max_payload = max;
        self
    }

    /// Set the deflate compression level (clamped to 0-9).
    #[must_use]
    pub fn with_compression_level(mut self, level: u32) -> Self {
        self.compression_level = level.min(9);
        self
    }
}
