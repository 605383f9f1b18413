//! Datagram framing for udsync
//!
//! Wire format:
//!
//! ```text
//! +--------+--------------+----------+
//! | magic  | payload      | checksum |
//! | 2 bytes| variable     | 2 bytes  |
//! +--------+--------------+----------+
//! ```
//!
//! The magic prefix is `0xA0 0xA1`. The trailing checksum is a big-endian
//! 16-bit wraparound sum of every byte in (magic ++ payload). It is a cheap
//! integrity check, not a CRC: reordering bytes does not change the sum, so
//! compensating corruptions can slip through. That weakness is accepted.

use bytes::{BufMut, Bytes, BytesMut};

/// Frame start marker
pub const MAGIC: [u8; 2] = [0xA0, 0xA1];

/// Smallest valid frame is strictly larger than magic + checksum
const MIN_FRAME_LEN: usize = 5;

/// Wraparound 16-bit sum of all byte values in `data`.
#[must_use]
pub fn checksum(data: &[u8]) -> u16 {
    data.iter()
        .fold(0u16, |sum, &b| sum.wrapping_add(u16::from(b)))
}

/// Wrap `payload` in a frame: magic ++ payload ++ checksum(magic ++ payload).
#[must_use]
pub fn encode_frame(payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(MAGIC.len() + payload.len() + 2);
    buf.put_slice(&MAGIC);
    buf.put_slice(payload);
    let sum = checksum(&buf);
    buf.put_u16(sum);
    buf.freeze()
}

/// Extract the payload from a frame.
///
/// Returns `None` for anything that is not a well-formed frame: too short,
/// wrong magic, or a checksum mismatch. Invalid frames are a normal
/// occurrence on a lossy transport and are never an error.
#[must_use]
pub fn decode_frame(data: &[u8]) -> Option<Bytes> {
    if data.len() < MIN_FRAME_LEN {
        return None;
    }
    if data[..2] != MAGIC {
        return None;
    }

    let body = &data[..data.len() - 2];
    let trailer = &data[data.len() - 2..];
    let received = u16::from_be_bytes([trailer[0], trailer[1]]);
    if received != checksum(body) {
        return None;
    }

    Some(Bytes::copy_from_slice(&data[2..data.len() - 2]))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_roundtrip() {
        let payload = b"hello world";
        let frame = encode_frame(payload);
        let decoded = decode_frame(&frame).unwrap();
        assert_eq!(&decoded[..], payload);
    }

    #[test]
    fn test_frame_roundtrip_empty_payload() {
        // magic(2) + checksum(2) = 4 bytes, below the minimum length
        let frame = encode_frame(b"");
        assert_eq!(frame.len(), 4);
        assert!(decode_frame(&frame).is_none());
    }

    #[test]
    fn test_frame_roundtrip_single_byte() {
        let frame = encode_frame(&[0x42]);
        assert_eq!(decode_frame(&frame).unwrap(), Bytes::from_static(&[0x42]));
    }

    #[test]
    fn test_checksum_wraps() {
        let data = vec![0xFFu8; 300];
        // 300 * 255 = 76500, mod 65536 = 10964
        assert_eq!(checksum(&data), (300u32 * 255 % 65536) as u16);
    }

    #[test]
    fn test_checksum_is_order_independent() {
        // Known weakness of the byte-sum: permutations collide.
        assert_eq!(checksum(&[1, 2, 3]), checksum(&[3, 2, 1]));
    }

    #[test]
    fn test_checksum_depends_on_values() {
        assert_ne!(checksum(&[1, 2, 3]), checksum(&[1, 2, 4]));
    }

    #[test]
    fn test_decode_rejects_wrong_magic() {
        let mut frame = encode_frame(b"payload").to_vec();
        frame[0] = 0xB0;
        assert!(decode_frame(&frame).is_none());
    }

    #[test]
    fn test_decode_rejects_corrupted_checksum() {
        let mut frame = encode_frame(b"payload").to_vec();
        let last = frame.len() - 1;
        frame[last] = frame[last].wrapping_add(1);
        assert!(decode_frame(&frame).is_none());
    }

    #[test]
    fn test_decode_rejects_corrupted_payload() {
        let mut frame = encode_frame(b"payload").to_vec();
        frame[3] = frame[3].wrapping_add(1);
        assert!(decode_frame(&frame).is_none());
    }

    #[test]
    fn test_decode_rejects_short_input() {
        assert!(decode_frame(&[]).is_none());
        assert!(decode_frame(&MAGIC).is_none());
        assert!(decode_frame(&[0xA0, 0xA1, 0x01, 0x42]).is_none());
    }
}
