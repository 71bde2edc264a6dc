//! Property-based tests for the frame codec.
//!
//! The central invariant: however the byte stream is chunked, the decoder
//! produces the same sequence of frames.

use proptest::prelude::*;

use wshive::protocol::decoder::FrameDecoder;
use wshive::protocol::frame::{format_close_payload, format_message, parse_close_payload};
use wshive::protocol::mask::{apply_mask, apply_mask_offset};
use wshive::{OpCode, Role};

fn data_opcode() -> impl Strategy<Value = OpCode> {
    prop_oneof![Just(OpCode::Text), Just(OpCode::Binary)]
}

/// Hand-rolled frame builder: unlike the engine's formatter it can emit
/// FIN=0 fragments.
fn raw_frame(opcode: u8, fin: bool, payload: &[u8], mask: Option<[u8; 4]>) -> Vec<u8> {
    let mut out = Vec::new();
    out.push(if fin { 0x80 | opcode } else { opcode });
    let mask_bit = if mask.is_some() { 0x80u8 } else { 0 };
    if payload.len() <= 125 {
        out.push(mask_bit | payload.len() as u8);
    } else if payload.len() <= u16::MAX as usize {
        out.push(mask_bit | 0x7E);
        out.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    } else {
        out.push(mask_bit | 0x7F);
        out.extend_from_slice(&(payload.len() as u64).to_be_bytes());
    }
    match mask {
        Some(key) => {
            out.extend_from_slice(&key);
            out.extend(payload.iter().enumerate().map(|(i, b)| b ^ key[i % 4]));
        }
        None => out.extend_from_slice(payload),
    }
    out
}

/// Frames reassembled from decoder slices: (opcode, payload, fin).
fn decode_chunked(
    role: Role,
    stream: &[u8],
    chunk_sizes: &[usize],
) -> Result<Vec<(OpCode, Vec<u8>, bool)>, wshive::Error> {
    let mut decoder = FrameDecoder::new(role, false);
    let mut frames: Vec<(OpCode, Vec<u8>, bool)> = Vec::new();
    let mut current: Option<(OpCode, Vec<u8>, bool)> = None;

    let mut offset = 0;
    let mut sizes = chunk_sizes.iter().copied().filter(|&n| n > 0).cycle();
    while offset < stream.len() {
        let size = sizes.next().unwrap_or(stream.len()).min(stream.len() - offset);
        let mut chunk = stream[offset..offset + size].to_vec();
        offset += size;

        let mut input: &mut [u8] = &mut chunk;
        while let Some(slice) = decoder.next_slice(&mut input)? {
            let entry = current.get_or_insert((slice.opcode, Vec::new(), slice.fin));
            entry.1.extend_from_slice(slice.payload);
            if slice.remaining == 0 {
                frames.push(current.take().expect("entry just inserted"));
            }
        }
    }
    Ok(frames)
}

proptest! {
    // ========================================================================
    // Close payload: format then parse restores code and reason for every
    // code that actually makes it onto the wire.
    // ========================================================================
    #[test]
    fn close_payload_roundtrip(
        code in 1u16..=65535,
        reason in prop::collection::vec(any::<u8>(), 0..=123)
    ) {
        let mut buf = [0u8; 125];
        let len = format_close_payload(&mut buf, code, &reason);
        prop_assert_eq!(len, 2 + reason.len());

        let parsed = parse_close_payload(&buf[..len]);
        prop_assert_eq!(parsed.code, code);
        prop_assert_eq!(parsed.reason, &reason[..]);
    }

    // Code zero is the "no status" encoding: nothing on the wire, and the
    // parse side reports 1005.
    #[test]
    fn close_payload_code_zero(reason in prop::collection::vec(any::<u8>(), 0..=123)) {
        let mut buf = [0u8; 125];
        let len = format_close_payload(&mut buf, 0, &reason);
        prop_assert_eq!(len, 0);
        prop_assert_eq!(parse_close_payload(&buf[..len]).code, 1005);
    }

    // ========================================================================
    // Masking is an involution, and offset-resumed masking agrees with
    // one-shot masking.
    // ========================================================================
    #[test]
    fn mask_involution(
        data in prop::collection::vec(any::<u8>(), 0..2000),
        mask in any::<[u8; 4]>()
    ) {
        let mut masked = data.clone();
        apply_mask(&mut masked, mask);
        apply_mask(&mut masked, mask);
        prop_assert_eq!(masked, data);
    }

    #[test]
    fn mask_offset_agrees_with_oneshot(
        data in prop::collection::vec(any::<u8>(), 1..500),
        mask in any::<[u8; 4]>(),
        split in any::<prop::sample::Index>()
    ) {
        let mut oneshot = data.clone();
        apply_mask(&mut oneshot, mask);

        let cut = split.index(data.len());
        let mut pieces = data.clone();
        let (head, tail) = pieces.split_at_mut(cut);
        apply_mask_offset(head, mask, 0);
        apply_mask_offset(tail, mask, cut);

        prop_assert_eq!(pieces, oneshot);
    }

    // ========================================================================
    // Formatter output decodes back to the same frame.
    // ========================================================================
    #[test]
    fn format_decode_roundtrip_unmasked(
        opcode in data_opcode(),
        payload in prop::collection::vec(any::<u8>(), 0..70000)
    ) {
        let mut wire = Vec::new();
        format_message(&mut wire, &payload, opcode, false, None);

        let frames = decode_chunked(Role::Client, &wire, &[wire.len().max(1)]).unwrap();
        prop_assert_eq!(frames.len(), 1);
        let (decoded_opcode, decoded_payload, fin) = &frames[0];
        prop_assert_eq!(*decoded_opcode, opcode);
        prop_assert_eq!(decoded_payload, &payload);
        prop_assert!(*fin);
    }

    #[test]
    fn format_decode_roundtrip_masked(
        opcode in data_opcode(),
        payload in prop::collection::vec(any::<u8>(), 0..5000),
        mask in any::<[u8; 4]>()
    ) {
        let mut wire = Vec::new();
        format_message(&mut wire, &payload, opcode, false, Some(mask));

        let frames = decode_chunked(Role::Server, &wire, &[wire.len().max(1)]).unwrap();
        prop_assert_eq!(frames.len(), 1);
        prop_assert_eq!(&frames[0].1, &payload);
    }

    // ========================================================================
    // Chunking invariance: any chunking of the same bytes decodes to the
    // same frame sequence.
    // ========================================================================
    #[test]
    fn decode_is_chunking_invariant(
        messages in prop::collection::vec(
            (data_opcode(), prop::collection::vec(any::<u8>(), 0..300), 1usize..4),
            1..5
        ),
        pings in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..50), 0..3),
        mask in any::<[u8; 4]>(),
        chunk_sizes in prop::collection::vec(1usize..64, 1..8)
    ) {
        // Interleave fragmented data messages with complete ping frames.
        let mut stream = Vec::new();
        let mut ping_iter = pings.iter();
        for (opcode, payload, fragments) in &messages {
            let fragments = (*fragments).min(payload.len().max(1));
            let fragment_size = payload.len().max(1).div_ceil(fragments);
            let parts: Vec<&[u8]> = if payload.is_empty() {
                vec![&[]]
            } else {
                payload.chunks(fragment_size).collect()
            };
            let last = parts.len() - 1;
            for (i, part) in parts.iter().enumerate() {
                let op = if i == 0 { opcode.as_u8() } else { 0x0 };
                stream.extend(raw_frame(op, i == last, part, Some(mask)));
                // A control frame may sit between fragments.
                if i != last {
                    if let Some(ping) = ping_iter.next() {
                        stream.extend(raw_frame(0x9, true, ping, Some(mask)));
                    }
                }
            }
        }

        let reference = decode_chunked(Role::Server, &stream, &[stream.len()]).unwrap();
        let chunked = decode_chunked(Role::Server, &stream, &chunk_sizes).unwrap();
        prop_assert_eq!(&reference, &chunked);

        // The data payloads survive reassembly intact, in order.
        let mut reassembled: Vec<Vec<u8>> = Vec::new();
        let mut partial = Vec::new();
        for (opcode, payload, fin) in &reference {
            if !opcode.is_data() {
                continue;
            }
            partial.extend_from_slice(payload);
            if *fin {
                reassembled.push(std::mem::take(&mut partial));
            }
        }
        let expected: Vec<Vec<u8>> = messages.iter().map(|(_, p, _)| p.clone()).collect();
        prop_assert_eq!(reassembled, expected);
    }
}
