use commtest_core::protocol::{
    unwrap, wrap, FrameError, HEADER_SIZE, PROTOCOL_OVERHEAD, START_PAYLOAD,
};
use pretty_assertions::assert_eq;
use proptest::prelude::*;

#[test]
fn test_start_frame_bytes() {
    assert_eq!(
        wrap(&START_PAYLOAD),
        vec![0x00, 0x00, 0x01, 0x00, 0xd2, 0x02, 0xef, 0x8d]
    );
}

#[test]
fn test_largest_test_frame() {
    let payload: Vec<u8> = (1..=400u32).rev().map(|i| i as u8).collect();
    let bytes = wrap(&payload);

    assert_eq!(bytes.len(), 407);
    assert_eq!(&bytes[..3], &[0x00, 0x01, 0x90]);
    assert_eq!(unwrap(&bytes), Ok(payload.as_slice()));
}

#[test]
fn test_full_scale_length_field() {
    let payload: Vec<u8> = (0..u16::MAX as usize).map(|i| (i % 251) as u8).collect();
    let bytes = wrap(&payload);

    assert_eq!(payload.len(), 65535);
    assert_eq!(bytes.len(), 65542);
    assert_eq!(&bytes[..HEADER_SIZE], &[0x00, 0xFF, 0xFF]);
    assert_eq!(unwrap(&bytes), Ok(payload.as_slice()));
}

#[test]
fn test_trailing_garbage_is_rejected() {
    let mut bytes = wrap(&[1, 2]);
    bytes.push(0xAA);
    assert_eq!(
        unwrap(&bytes),
        Err(FrameError::LengthMismatch {
            declared: 2,
            actual: 3
        })
    );
}

#[test]
fn test_two_frames_in_one_burst_are_rejected() {
    let mut bytes = wrap(&[1]);
    bytes.extend_from_slice(&wrap(&[2, 1]));
    assert!(matches!(
        unwrap(&bytes),
        Err(FrameError::LengthMismatch { declared: 1, .. })
    ));
}

proptest! {
    #[test]
    fn prop_wrap_unwrap_roundtrip(payload in prop::collection::vec(any::<u8>(), 1..2048)) {
        let bytes = wrap(&payload);
        prop_assert_eq!(bytes.len(), payload.len() + PROTOCOL_OVERHEAD);
        prop_assert_eq!(unwrap(&bytes), Ok(payload.as_slice()));
    }

    #[test]
    fn prop_bit_flip_after_header_breaks_checksum(
        payload in prop::collection::vec(any::<u8>(), 1..512),
        position in any::<prop::sample::Index>(),
        bit in 0u8..8,
    ) {
        let mut bytes = wrap(&payload);
        let at = HEADER_SIZE + position.index(bytes.len() - HEADER_SIZE);
        bytes[at] ^= 1 << bit;

        let is_checksum_mismatch = matches!(unwrap(&bytes), Err(FrameError::ChecksumMismatch { .. }));
        prop_assert!(is_checksum_mismatch);
    }

    #[test]
    fn prop_short_buffers_are_rejected(bytes in prop::collection::vec(any::<u8>(), 0..=PROTOCOL_OVERHEAD)) {
        prop_assert_eq!(unwrap(&bytes), Err(FrameError::TooShort { len: bytes.len() }));
    }

    #[test]
    fn prop_nonzero_marker_is_rejected(
        payload in prop::collection::vec(any::<u8>(), 1..64),
        marker in 1u8..=255,
    ) {
        let mut bytes = wrap(&payload);
        bytes[0] = marker;
        prop_assert_eq!(unwrap(&bytes), Err(FrameError::BadMarker(marker)));
    }
}
