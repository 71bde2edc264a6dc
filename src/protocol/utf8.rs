//! UTF-8 validation for text messages (RFC 6455 section 8.1).

use crate::error::{Error, Result};

/// Check a complete byte slice for UTF-8 well-formedness.
///
/// # Errors
///
/// Returns [`Error::InvalidUtf8`] if the data is not valid UTF-8.
#[inline]
pub fn validate_utf8(data: &[u8]) -> Result<()> {
    std::str::from_utf8(data)
        .map(|_| ())
        .map_err(|_| Error::InvalidUtf8)
}

/// Streaming UTF-8 validator for fragmented text messages.
///
/// A multi-byte sequence may straddle a fragment boundary; the validator
/// keeps the unfinished tail (at most three bytes) and prepends it to the
/// next fragment.
#[derive(Debug, Clone, Default)]
pub struct Utf8Validator {
    partial: [u8; 4],
    partial_len: usize,
}

impl Utf8Validator {
    /// Create a fresh validator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next fragment. `last` marks the final fragment of the
    /// message, after which no incomplete sequence may remain.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidUtf8`] on any malformed sequence, or on a
    /// truncated sequence at the end of the final fragment.
    pub fn feed(&mut self, data: &[u8], last: bool) -> Result<()> {
        let buffered;
        let check: &[u8] = if self.partial_len > 0 {
            let mut combined = Vec::with_capacity(self.partial_len + data.len());
            combined.extend_from_slice(&self.partial[..self.partial_len]);
            combined.extend_from_slice(data);
            buffered = combined;
            &buffered
        } else {
            data
        };
        self.partial_len = 0;

        match std::str::from_utf8(check) {
            Ok(_) => Ok(()),
            Err(e) => {
                // error_len() is None when the slice merely ends inside a
                // sequence, which is fine on a non-final fragment.
                if !last && e.error_len().is_none() {
                    let tail = &check[e.valid_up_to()..];
                    if tail.len() < 4 {
                        self.partial[..tail.len()].copy_from_slice(tail);
                        self.partial_len = tail.len();
                        return Ok(());
                    }
                }
                Err(Error::InvalidUtf8)
            }
        }
    }

    /// Discard any buffered partial sequence.
    pub fn reset(&mut self) {
        self.partial_len = 0;
    }

    /// Whether a partial multi-byte sequence is pending.
    #[must_use]
    pub fn has_partial(&self) -> bool {
        self.partial_len > 0
    }
}
