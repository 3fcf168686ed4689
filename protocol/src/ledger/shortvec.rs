//! Compact-u16 length prefixes.
//!
//! Seven bits per byte, low bits first, high bit set on every byte except
//! the last. At most three bytes, and the encoding must be minimal: the
//! ledger rejects `0x80 0x00` for zero, so we do too.

use super::CodecError;

/// Largest length a shortvec can carry.
pub const MAX_SHORTVEC_LEN: usize = u16::MAX as usize;

/// Append the compact encoding of `len` to `out`.
pub fn encode_len(len: usize, out: &mut Vec<u8>) -> Result<(), CodecError> {
    if len > MAX_SHORTVEC_LEN {
        return Err(CodecError::LengthOverflow(len));
    }
    let mut rem = len;
    loop {
        let mut byte = (rem & 0x7f) as u8;
        rem >>= 7;
        if rem == 0 {
            out.push(byte);
            return Ok(());
        }
        byte |= 0x80;
        out.push(byte);
    }
}

/// Decode a compact length starting at `*offset`, advancing the offset.
pub fn decode_len(bytes: &[u8], offset: &mut usize) -> Result<usize, CodecError> {
    let mut value: usize = 0;
    for i in 0..3 {
        let byte = *bytes.get(*offset).ok_or(CodecError::UnexpectedEnd)?;
        *offset += 1;
        value |= ((byte & 0x7f) as usize) << (7 * i);
        if byte & 0x80 == 0 {
            // A zero continuation byte means a longer-than-needed encoding.
            if i > 0 && byte == 0 {
                return Err(CodecError::InvalidShortVec);
            }
            if value > MAX_SHORTVEC_LEN {
                return Err(CodecError::InvalidShortVec);
            }
            return Ok(value);
        }
    }
    Err(CodecError::InvalidShortVec)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enc(len: usize) -> Vec<u8> {
        let mut out = Vec::new();
        encode_len(len, &mut out).unwrap();
        out
    }

    #[test]
    fn known_encodings() {
        assert_eq!(enc(0), vec![0x00]);
        assert_eq!(enc(0x7f), vec![0x7f]);
        assert_eq!(enc(0x80), vec![0x80, 0x01]);
        assert_eq!(enc(0xff), vec![0xff, 0x01]);
        assert_eq!(enc(0x100), vec![0x80, 0x02]);
        assert_eq!(enc(0x3fff), vec![0xff, 0x7f]);
        assert_eq!(enc(0x4000), vec![0x80, 0x80, 0x01]);
        assert_eq!(enc(0xffff), vec![0xff, 0xff, 0x03]);
    }

    #[test]
    fn decode_matches_encode_at_boundaries() {
        for len in [0usize, 1, 127, 128, 16_383, 16_384, 65_535] {
            let bytes = enc(len);
            let mut offset = 0;
            assert_eq!(decode_len(&bytes, &mut offset).unwrap(), len);
            assert_eq!(offset, bytes.len());
        }
    }

    #[test]
    fn rejects_overflow_and_alias() {
        let mut out = Vec::new();
        assert!(encode_len(65_536, &mut out).is_err());

        let mut offset = 0;
        assert_eq!(
            decode_len(&[0x80, 0x00], &mut offset),
            Err(CodecError::InvalidShortVec)
        );
        let mut offset = 0;
        assert_eq!(
            decode_len(&[0xff, 0xff, 0x04], &mut offset),
            Err(CodecError::InvalidShortVec)
        );
        let mut offset = 0;
        assert_eq!(
            decode_len(&[0x80, 0x80, 0x80, 0x01], &mut offset),
            Err(CodecError::InvalidShortVec)
        );
        let mut offset = 0;
        assert_eq!(decode_len(&[0x80], &mut offset), Err(CodecError::UnexpectedEnd));
    }
}
