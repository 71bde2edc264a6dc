//! permessage-deflate support (RFC 7692).
//!
//! A [`Hub`] holds one deflate and one inflate context shared by every
//! connection on its loop; in shared mode both are reset after each
//! message (no context takeover). A connection whose group negotiated the
//! sliding-window mode carries its own [`SlidingDeflateWindow`] whose
//! dictionary persists across messages, trading per-connection memory for
//! better ratios.

use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};

use crate::error::{Error, Result};

/// The sync-flush tail every deflate block ends with. Stripped from
/// compressed output before framing and re-appended before inflating, per
/// RFC 7692 section 7.2.1.
pub(crate) const DEFLATE_TRAILER: [u8; 4] = [0x00, 0x00, 0xff, 0xff];

/// Hard stop for the compress/decompress loops.
const MAX_ITERATIONS: usize = 100_000;

/// Inflation larger than this multiple of the input is treated as a
/// decompression bomb regardless of the payload cap.
const MAX_INFLATE_RATIO: usize = 100;

const CHUNK: usize = 4096;

/// Per-connection deflate context that persists across messages.
pub struct SlidingDeflateWindow {
    context: Compress,
}

impl SlidingDeflateWindow {
    /// Allocate a sliding window at the given compression level.
    #[must_use]
    pub fn new(level: u32) -> Self {
        Self {
            // Raw deflate, no zlib header.
            context: Compress::new(Compression::new(level), false),
        }
    }
}

impl std::fmt::Debug for SlidingDeflateWindow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlidingDeflateWindow").finish_non_exhaustive()
    }
}

/// Loop-scoped shared compression contexts.
pub struct Hub {
    deflate: Compress,
    inflate: Decompress,
}

impl Hub {
    /// Create a hub with contexts at the given compression level.
    #[must_use]
    pub fn new(level: u32) -> Self {
        Self {
            deflate: Compress::new(Compression::new(level), false),
            inflate: Decompress::new(false),
        }
    }

    /// Compress one message payload into the permessage-deflate on-wire
    /// form (sync-flush trailer stripped).
    ///
    /// With `window` the connection's persistent context is used and kept;
    /// without it the hub's shared context is used and reset afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Deflate`] if the underlying stream reports an
    /// error or fails to make progress.
    pub fn deflate(
        &mut self,
        data: &[u8],
        window: Option<&mut SlidingDeflateWindow>,
    ) -> Result<Vec<u8>> {
        let shared = window.is_none();
        let context = match window {
            Some(w) => &mut w.context,
            None => &mut self.deflate,
        };

        let mut out = Vec::with_capacity(data.len() / 2 + 16);
        let mut consumed_total = 0usize;
        let mut iterations = 0usize;

        loop {
            iterations += 1;
            if iterations > MAX_ITERATIONS {
                return Err(Error::Deflate("compression made no progress".into()));
            }

            let old_len = out.len();
            out.resize(old_len + CHUNK, 0);

            let before_in = context.total_in();
            let before_out = context.total_out();
            context
                .compress(&data[consumed_total..], &mut out[old_len..], FlushCompress::Sync)
                .map_err(|e| Error::Deflate(e.to_string()))?;
            let consumed = (context.total_in() - before_in) as usize;
            let produced = (context.total_out() - before_out) as usize;

            out.truncate(old_len + produced);
            consumed_total += consumed;

            // Input drained and the sync flush fit into the chunk.
            if consumed_total >= data.len() && produced < CHUNK {
                break;
            }
            if consumed == 0 && produced == 0 {
                break;
            }
        }

        if out.ends_with(&DEFLATE_TRAILER) {
            out.truncate(out.len() - DEFLATE_TRAILER.len());
        }

        if shared {
            self.deflate.reset();
        }
        Ok(out)
    }

    /// Decompress one message payload, appending the sync-flush trailer
    /// the sender stripped. The shared context is reset afterwards.
    ///
    /// # Errors
    ///
    /// [`Error::MessageTooLarge`] when the output exceeds `max_payload`,
    /// [`Error::Inflate`] on corrupt input or a decompression bomb.
    pub fn inflate(&mut self, data: &[u8], max_payload: usize) -> Result<Vec<u8>> {
        let mut input = Vec::with_capacity(data.len() + DEFLATE_TRAILER.len());
        input.extend_from_slice(data);
        input.extend_from_slice(&DEFLATE_TRAILER);

        let ratio_cap = data.len().max(1).saturating_mul(MAX_INFLATE_RATIO);

        let result = self.inflate_inner(&input, max_payload, ratio_cap);
        self.inflate.reset(false);
        result
    }

    fn inflate_inner(
        &mut self,
        input: &[u8],
        max_payload: usize,
        ratio_cap: usize,
    ) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(input.len().min(CHUNK));
        let mut consumed_total = 0usize;
        let mut iterations = 0usize;

        loop {
            iterations += 1;
            if iterations > MAX_ITERATIONS {
                return Err(Error::Inflate("decompression made no progress".into()));
            }

            let old_len = out.len();
            out.resize(old_len + CHUNK, 0);

            let before_in = self.inflate.total_in();
            let before_out = self.inflate.total_out();
            let status = self
                .inflate
                .decompress(
                    &input[consumed_total..],
                    &mut out[old_len..],
                    FlushDecompress::Sync,
                )
                .map_err(|e| Error::Inflate(e.to_string()))?;
            let consumed = (self.inflate.total_in() - before_in) as usize;
            let produced = (self.inflate.total_out() - before_out) as usize;

            out.truncate(old_len + produced);
            consumed_total += consumed;

            if out.len() > max_payload {
                return Err(Error::MessageTooLarge {
                    size: out.len(),
                    max: max_payload,
                });
            }
            if out.len() > ratio_cap {
                return Err(Error::Inflate(format!(
                    "inflation ratio exceeded {MAX_INFLATE_RATIO}x"
                )));
            }

            if status == Status::StreamEnd {
                break;
            }
            // Input drained and output kept up with it.
            if consumed_total >= input.len() && produced < CHUNK {
                break;
            }
            if consumed == 0 && produced == 0 {
                break;
            }
        }

        Ok(out)
    }
}

impl std::fmt::Debug for Hub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hub").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_roundtrip() {
        let mut hub = Hub::new(6);
        let message = b"Hello, compressed WebSocket message!".to_vec();

        let compressed = hub.deflate(&message, None).unwrap();
        assert!(!compressed.ends_with(&DEFLATE_TRAILER));

        let inflated = hub.inflate(&compressed, 1 << 20).unwrap();
        assert_eq!(inflated, message);
    }

    #[test]
    fn test_shared_context_resets_between_messages() {
        let mut hub = Hub::new(6);
        let message = b"The quick brown fox jumps over the lazy dog. ".repeat(10);

        let first = hub.deflate(&message, None).unwrap();
        let second = hub.deflate(&message, None).unwrap();
        // No dictionary carry-over means identical output.
        assert_eq!(first, second);

        assert_eq!(hub.inflate(&first, 1 << 20).unwrap(), message);
        assert_eq!(hub.inflate(&second, 1 << 20).unwrap(), message);
    }

    #[test]
    fn test_sliding_window_improves_second_message() {
        let mut hub = Hub::new(6);
        let mut window = SlidingDeflateWindow::new(6);
        let message = b"The quick brown fox jumps over the lazy dog. ".repeat(10);

        let first = hub.deflate(&message, Some(&mut window)).unwrap();
        let second = hub.deflate(&message, Some(&mut window)).unwrap();
        assert!(
            second.len() <= first.len(),
            "sliding window should not regress: {} vs {}",
            second.len(),
            first.len()
        );
    }

    #[test]
    fn test_highly_compressible_payload() {
        let mut hub = Hub::new(6);
        let message = vec![b'A'; 1000];

        let compressed = hub.deflate(&message, None).unwrap();
        assert!(compressed.len() < message.len() / 10);
        assert_eq!(hub.inflate(&compressed, 1 << 20).unwrap(), message);
    }

    #[test]
    fn test_inflate_respects_max_payload() {
        let mut hub = Hub::new(6);
        let message = vec![0u8; 100_000];
        let compressed = hub.deflate(&message, None).unwrap();

        let result = hub.inflate(&compressed, 1024);
        assert!(matches!(result, Err(Error::MessageTooLarge { .. })));
    }

    #[test]
    fn test_inflate_garbage_fails() {
        let mut hub = Hub::new(6);
        let garbage = [0xde, 0xad, 0xbe, 0xef, 0x01, 0x02, 0x03];
        assert!(matches!(
            hub.inflate(&garbage, 1 << 20),
            Err(Error::Inflate(_))
        ));
    }

    #[test]
    fn test_inflate_usable_after_failure() {
        let mut hub = Hub::new(6);
        let _ = hub.inflate(&[0xde, 0xad, 0xbe, 0xef], 1 << 20);

        let message = b"recovers after a failed inflate".to_vec();
        let compressed = hub.deflate(&message, None).unwrap();
        assert_eq!(hub.inflate(&compressed, 1 << 20).unwrap(), message);
    }

    #[test]
    fn test_empty_payload() {
        let mut hub = Hub::new(6);
        let compressed = hub.deflate(b"", None).unwrap();
        let inflated = hub.inflate(&compressed, 1 << 20).unwrap();
        assert!(inflated.is_empty());
    }
}
