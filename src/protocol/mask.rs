//! Payload masking (RFC 6455 section 5.3).

/// XOR `data` with the 4-byte mask key, starting at `offset` within the
/// key's repetition cycle.
///
/// The offset makes unmasking resumable when a frame's payload arrives
/// split across reads: pass the count of payload bytes already processed.
#[inline]
pub fn apply_mask_offset(data: &mut [u8], mask: [u8; 4], offset: usize) {
    for (i, byte) in data.iter_mut().enumerate() {
        *byte ^= mask[(offset + i) % 4];
    }
}

/// XOR `data` with the 4-byte mask key.
#[inline]
pub fn apply_mask(data: &mut [u8], mask: [u8; 4]) {
    // Word-at-a-time main loop, scalar tail.
    let mask_word = u32::from_ne_bytes(mask);
    let mut chunks = data.chunks_exact_mut(4);
    for chunk in &mut chunks {
        let word = u32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        chunk.copy_from_slice(&(word ^ mask_word).to_ne_bytes());
    }
    for (i, byte) in chunks.into_remainder().iter_mut().enumerate() {
        *byte ^= mask[i % 4];
    }
}
