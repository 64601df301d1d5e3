//! # Variable-Length Integer Encoding
//!
//! Space-efficient u64 encoding used for counts, node identifiers, and
//! length fields inside serialized pages. This is NOT used for page tags
//! (which are a single fixed byte).
//!
//! ## Encoding Format
//!
//! A leading marker byte determines the width of the encoding:
//!
//! | Value Range              | Bytes | Format                           |
//! |--------------------------|-------|----------------------------------|
//! | 0 - 240                  | 1     | `[value]`                        |
//! | 241 - 2287               | 2     | `[241 + (v-240)>>8, (v-240)&FF]` |
//! | 2288 - 67823             | 3     | `[249, (v-2288)>>8, (v-2288)&FF]`|
//! | 67824 - 16777215         | 4     | `[250, v>>16, v>>8, v]`          |
//! | 16777216 - 4294967295    | 5     | `[251, v>>24, v>>16, v>>8, v]`   |
//! | 4294967296 - u64::MAX    | 9     | `[255, 8-byte big-endian]`       |
//!
//! Markers 252-254 are reserved; decoding one is an error.
//!
//! ## Signed Values
//!
//! Signed integers (index keys over i64) go through zigzag mapping first so
//! small negative values stay small on disk:
//! `0 → 0, -1 → 1, 1 → 2, -2 → 3, ...`
//!
//! ## Design Rationale
//!
//! Page bodies are dominated by small values: node counts, child links, and
//! document-node identifiers that grow from zero. Single-byte encoding for
//! 0-240 covers nearly all of them; the wider forms exist so the format
//! never caps a counter.

use eyre::{bail, ensure, Result};

/// Returns the encoded length of `value` without encoding it.
pub fn varint_len(value: u64) -> usize {
    if value <= 240 {
        1
    } else if value <= 2287 {
        2
    } else if value <= 67823 {
        3
    } else if value <= 0xFF_FFFF {
        4
    } else if value <= 0xFFFF_FFFF {
        5
    } else {
        9
    }
}

/// Appends the varint encoding of `value` to `buf`.
pub fn put_varint(buf: &mut Vec<u8>, value: u64) {
    if value <= 240 {
        buf.push(value as u8);
    } else if value <= 2287 {
        let v = value - 240;
        buf.push(((v >> 8) + 241) as u8);
        buf.push((v & 0xFF) as u8);
    } else if value <= 67823 {
        let v = value - 2288;
        buf.push(249);
        buf.push((v >> 8) as u8);
        buf.push((v & 0xFF) as u8);
    } else if value <= 0xFF_FFFF {
        buf.push(250);
        buf.push((value >> 16) as u8);
        buf.push((value >> 8) as u8);
        buf.push(value as u8);
    } else if value <= 0xFFFF_FFFF {
        buf.push(251);
        buf.push((value >> 24) as u8);
        buf.push((value >> 16) as u8);
        buf.push((value >> 8) as u8);
        buf.push(value as u8);
    } else {
        buf.push(255);
        buf.extend_from_slice(&value.to_be_bytes());
    }
}

/// Decodes a varint from the front of `buf`, returning `(value, bytes_read)`.
pub fn get_varint(buf: &[u8]) -> Result<(u64, usize)> {
    ensure!(!buf.is_empty(), "empty buffer for varint decode");

    let first = buf[0];

    if first <= 240 {
        Ok((first as u64, 1))
    } else if first <= 248 {
        ensure!(buf.len() >= 2, "truncated 2-byte varint");
        let value = 240 + ((first as u64 - 241) << 8) + buf[1] as u64;
        Ok((value, 2))
    } else if first == 249 {
        ensure!(buf.len() >= 3, "truncated 3-byte varint");
        let value = 2288 + ((buf[1] as u64) << 8) + buf[2] as u64;
        Ok((value, 3))
    } else if first == 250 {
        ensure!(buf.len() >= 4, "truncated 4-byte varint");
        let value = ((buf[1] as u64) << 16) + ((buf[2] as u64) << 8) + buf[3] as u64;
        Ok((value, 4))
    } else if first == 251 {
        ensure!(buf.len() >= 5, "truncated 5-byte varint");
        let value = ((buf[1] as u64) << 24)
            + ((buf[2] as u64) << 16)
            + ((buf[3] as u64) << 8)
            + buf[4] as u64;
        Ok((value, 5))
    } else if first == 255 {
        ensure!(buf.len() >= 9, "truncated 9-byte varint");
        let value = u64::from_be_bytes(buf[1..9].try_into().unwrap()); // INVARIANT: length validated above
        Ok((value, 9))
    } else {
        bail!("invalid varint marker: {}", first)
    }
}

/// Appends a zigzag-mapped signed value.
pub fn put_zigzag(buf: &mut Vec<u8>, value: i64) {
    put_varint(buf, ((value << 1) ^ (value >> 63)) as u64);
}

/// Decodes a zigzag-mapped signed value, returning `(value, bytes_read)`.
pub fn get_zigzag(buf: &[u8]) -> Result<(i64, usize)> {
    let (raw, read) = get_varint(buf)?;
    Ok((((raw >> 1) as i64) ^ -((raw & 1) as i64), read))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(value: u64) {
        let mut buf = Vec::new();
        put_varint(&mut buf, value);
        assert_eq!(buf.len(), varint_len(value));

        let (decoded, read) = get_varint(&buf).unwrap();
        assert_eq!(decoded, value);
        assert_eq!(read, buf.len());
    }

    #[test]
    fn round_trips_across_width_boundaries() {
        for value in [
            0,
            1,
            240,
            241,
            2287,
            2288,
            67823,
            67824,
            0xFF_FFFF,
            0x100_0000,
            0xFFFF_FFFF,
            0x1_0000_0000,
            u64::MAX,
        ] {
            round_trip(value);
        }
    }

    #[test]
    fn encoded_lengths_match_table() {
        assert_eq!(varint_len(240), 1);
        assert_eq!(varint_len(241), 2);
        assert_eq!(varint_len(2287), 2);
        assert_eq!(varint_len(2288), 3);
        assert_eq!(varint_len(67824), 4);
        assert_eq!(varint_len(0x100_0000), 5);
        assert_eq!(varint_len(0x1_0000_0000), 9);
    }

    #[test]
    fn decode_rejects_empty_buffer() {
        assert!(get_varint(&[]).is_err());
    }

    #[test]
    fn decode_rejects_truncated_encodings() {
        assert!(get_varint(&[249]).is_err());
        assert!(get_varint(&[251, 0, 0]).is_err());
        assert!(get_varint(&[255, 1, 2, 3]).is_err());
    }

    #[test]
    fn decode_rejects_reserved_markers() {
        for marker in 252..=254u8 {
            assert!(get_varint(&[marker, 0, 0, 0, 0, 0, 0, 0, 0]).is_err());
        }
    }

    #[test]
    fn zigzag_round_trips_signed_values() {
        for value in [0i64, -1, 1, -2, 2, -1000, 1000, i64::MIN, i64::MAX] {
            let mut buf = Vec::new();
            put_zigzag(&mut buf, value);
            let (decoded, read) = get_zigzag(&buf).unwrap();
            assert_eq!(decoded, value);
            assert_eq!(read, buf.len());
        }
    }

    #[test]
    fn zigzag_keeps_small_magnitudes_short() {
        let mut buf = Vec::new();
        put_zigzag(&mut buf, -3);
        assert_eq!(buf.len(), 1);
    }

    #[test]
    fn multiple_values_decode_sequentially() {
        let mut buf = Vec::new();
        put_varint(&mut buf, 7);
        put_varint(&mut buf, 5000);
        put_varint(&mut buf, u64::MAX);

        let (a, n) = get_varint(&buf).unwrap();
        let (b, m) = get_varint(&buf[n..]).unwrap();
        let (c, _) = get_varint(&buf[n + m..]).unwrap();

        assert_eq!((a, b, c), (7, 5000, u64::MAX));
    }
}
