//! Frame encoding/decoding
//!
//! Frame format (identical on serial and TCP):
//! - 1 byte: marker, always 0x00
//! - 2 bytes: payload length (big-endian)
//! - N bytes: payload
//! - 4 bytes: CRC32 (of payload only, big-endian)

use byteorder::{BigEndian, ByteOrder};

use super::checksum::crc32;
use super::{FrameError, FRAME_MARKER, HEADER_SIZE, PROTOCOL_OVERHEAD};

/// Wrap `payload` into an on-wire frame.
///
/// The length field is 16 bits; payloads above 65535 bytes are a caller error
/// and get a truncated length, which `unwrap` on the other side rejects.
pub fn wrap(payload: &[u8]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(payload.len() + PROTOCOL_OVERHEAD);
    bytes.push(FRAME_MARKER);

    let mut len_bytes = [0u8; 2];
    BigEndian::write_u16(&mut len_bytes, payload.len() as u16);
    bytes.extend_from_slice(&len_bytes);

    bytes.extend_from_slice(payload);

    let mut crc_bytes = [0u8; 4];
    BigEndian::write_u32(&mut crc_bytes, crc32(payload));
    bytes.extend_from_slice(&crc_bytes);

    bytes
}

/// Validate an inbound frame and return its payload.
///
/// Checks run in wire order: overall size, marker, declared length, exact
/// size match, then the checksum. Nothing past the declared length is read.
pub fn unwrap(data: &[u8]) -> Result<&[u8], FrameError> {
    if data.len() <= PROTOCOL_OVERHEAD {
        return Err(FrameError::TooShort { len: data.len() });
    }

    if data[0] != FRAME_MARKER {
        return Err(FrameError::BadMarker(data[0]));
    }

    let length = BigEndian::read_u16(&data[1..HEADER_SIZE]) as usize;
    if length == 0 {
        return Err(FrameError::ZeroLength);
    }

    if PROTOCOL_OVERHEAD + length != data.len() {
        return Err(FrameError::LengthMismatch {
            declared: length,
            actual: data.len() - PROTOCOL_OVERHEAD,
        });
    }

    let payload = &data[HEADER_SIZE..HEADER_SIZE + length];
    let received_crc = BigEndian::read_u32(&data[HEADER_SIZE + length..]);
    let expected_crc = crc32(payload);

    if received_crc != expected_crc {
        return Err(FrameError::ChecksumMismatch {
            expected: expected_crc,
            actual: received_crc,
        });
    }

    Ok(payload)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_start_frame_layout() {
        assert_eq!(
            wrap(&[0x00]),
            vec![0x00, 0x00, 0x01, 0x00, 0xd2, 0x02, 0xef, 0x8d]
        );
    }

    #[test]
    fn test_wrap_unwrap_roundtrip() {
        let encoded = wrap(&[3, 2, 1]);
        assert_eq!(encoded.len(), 3 + PROTOCOL_OVERHEAD);
        assert_eq!(unwrap(&encoded), Ok(&[3u8, 2, 1][..]));
    }

    #[test]
    fn test_oversized_payload_truncates_length() {
        let encoded = wrap(&vec![0xA5; 65536]);
        assert_eq!(&encoded[..HEADER_SIZE], &[0x00, 0x00, 0x00]);
        assert_eq!(encoded.len(), 65536 + PROTOCOL_OVERHEAD);
        assert_eq!(unwrap(&encoded), Err(FrameError::ZeroLength));
    }

    #[test]
    fn test_too_short() {
        assert_eq!(unwrap(&[]), Err(FrameError::TooShort { len: 0 }));
        assert_eq!(
            unwrap(&[0, 0, 0, 0, 0, 0, 0]),
            Err(FrameError::TooShort { len: 7 })
        );
    }

    #[test]
    fn test_bad_marker() {
        let mut encoded = wrap(&[1, 2]);
        encoded[0] = 0x55;
        assert_eq!(unwrap(&encoded), Err(FrameError::BadMarker(0x55)));
    }

    #[test]
    fn test_zero_length() {
        let encoded = [0x00, 0x00, 0x00, 0xAA, 0x00, 0x00, 0x00, 0x00];
        assert_eq!(unwrap(&encoded), Err(FrameError::ZeroLength));
    }

    #[test]
    fn test_length_mismatch() {
        let mut encoded = wrap(&[1, 2, 3]);
        encoded.push(0);
        assert_eq!(
            unwrap(&encoded),
            Err(FrameError::LengthMismatch {
                declared: 3,
                actual: 4
            })
        );
    }

    #[test]
    fn test_crc_verification() {
        let mut encoded = wrap(&[1, 2, 3, 4, 5]);

        // Corrupt a payload byte
        encoded[4] ^= 0xFF;

        assert!(matches!(
            unwrap(&encoded),
            Err(FrameError::ChecksumMismatch { .. })
        ));
    }
}
