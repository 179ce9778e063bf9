//! RouterOS API sentence framing.
//!
//! A sentence is a sequence of length-prefixed words terminated by a
//! zero-length word. Lengths use a variable-width prefix of 1 to 5 bytes
//! whose leading bits select the width.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::Error;

/// Upper bound on a single word. Devices never send anything close.
const MAX_WORD_LEN: usize = 16 * 1024 * 1024;

/// One decoded sentence: its words in order, without the terminator.
pub type Sentence = Vec<String>;

/// [`Decoder`]/[`Encoder`] for RouterOS API sentences.
#[derive(Debug, Default, Clone, Copy)]
pub struct SentenceCodec;

// ── Length prefix ────────────────────────────────────────────────────

/// Append the variable-width length prefix for `len`.
fn put_length(dst: &mut BytesMut, len: usize) -> Result<(), Error> {
    let len = u32::try_from(len)
        .map_err(|_| Error::Protocol(format!("word of {len} bytes is too long to encode")))?;
    let b = len.to_be_bytes();

    if len < 0x80 {
        dst.put_slice(&b[3..]);
    } else if len < 0x4000 {
        dst.put_u8(b[2] | 0x80);
        dst.put_slice(&b[3..]);
    } else if len < 0x20_0000 {
        dst.put_u8(b[1] | 0xC0);
        dst.put_slice(&b[2..]);
    } else if len < 0x1000_0000 {
        dst.put_u8(b[0] | 0xE0);
        dst.put_slice(&b[1..]);
    } else {
        dst.put_u8(0xF0);
        dst.put_slice(&b);
    }
    Ok(())
}

/// Read a length prefix from the front of `src`.
///
/// Returns `(prefix_width, word_len)`, or `None` if `src` does not yet
/// hold the whole prefix.
fn peek_length(src: &[u8]) -> Result<Option<(usize, usize)>, Error> {
    let Some(&first) = src.first() else {
        return Ok(None);
    };

    let width = match first {
        b if b & 0x80 == 0x00 => 1,
        b if b & 0xC0 == 0x80 => 2,
        b if b & 0xE0 == 0xC0 => 3,
        b if b & 0xF0 == 0xE0 => 4,
        0xF0 => 5,
        other => {
            return Err(Error::Protocol(format!(
                "unexpected control byte 0x{other:02X} in length prefix"
            )));
        }
    };

    let Some(prefix) = src.get(..width) else {
        return Ok(None);
    };

    let mut raw = [0_u8; 4];
    match width {
        1 => raw[3] = first,
        2 => {
            raw[2] = first & 0x3F;
            raw[3..].copy_from_slice(&prefix[1..]);
        }
        3 => {
            raw[1] = first & 0x1F;
            raw[2..].copy_from_slice(&prefix[1..]);
        }
        4 => {
            raw[0] = first & 0x0F;
            raw[1..].copy_from_slice(&prefix[1..]);
        }
        _ => raw.copy_from_slice(&prefix[1..]),
    }

    let len = usize::try_from(u32::from_be_bytes(raw))
        .map_err(|_| Error::Protocol("word length exceeds address space".into()))?;
    if len > MAX_WORD_LEN {
        return Err(Error::Protocol(format!("word of {len} bytes exceeds limit")));
    }
    Ok(Some((width, len)))
}

// ── Codec ────────────────────────────────────────────────────────────

impl Decoder for SentenceCodec {
    type Item = Sentence;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // Walk the buffer without consuming until a full sentence is present.
        let mut offset = 0;
        let mut spans = Vec::new();

        loop {
            let Some(rest) = src.get(offset..) else {
                return Ok(None);
            };
            let Some((width, len)) = peek_length(rest)? else {
                return Ok(None);
            };
            offset += width;
            if len == 0 {
                break;
            }
            if src.len() < offset + len {
                src.reserve(offset + len - src.len());
                return Ok(None);
            }
            spans.push(offset..offset + len);
            offset += len;
        }

        let words = spans
            .into_iter()
            .map(|span| String::from_utf8_lossy(&src[span]).into_owned())
            .collect();
        src.advance(offset);
        Ok(Some(words))
    }
}

impl Encoder<Sentence> for SentenceCodec {
    type Error = Error;

    fn encode(&mut self, item: Sentence, dst: &mut BytesMut) -> Result<(), Self::Error> {
        for word in &item {
            put_length(dst, word.len())?;
            dst.put_slice(word.as_bytes());
        }
        dst.put_u8(0);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn encoded_prefix(len: usize) -> Vec<u8> {
        let mut buf = BytesMut::new();
        put_length(&mut buf, len).unwrap();
        buf.to_vec()
    }

    #[test]
    fn length_prefix_widths() {
        assert_eq!(encoded_prefix(0x05), vec![0x05]);
        assert_eq!(encoded_prefix(0x80), vec![0x80, 0x80]);
        assert_eq!(encoded_prefix(0x3FFF), vec![0xBF, 0xFF]);
        assert_eq!(encoded_prefix(0x4000), vec![0xC0, 0x40, 0x00]);
        assert_eq!(encoded_prefix(0x20_0000), vec![0xE0, 0x20, 0x00, 0x00]);
        assert_eq!(
            encoded_prefix(0x1000_0000),
            vec![0xF0, 0x10, 0x00, 0x00, 0x00]
        );
    }

    #[test]
    fn length_prefix_decodes_what_it_encodes() {
        for len in [0, 1, 0x7F, 0x80, 0x3FFF, 0x4000, 0x1F_FFFF, 0x20_0000] {
            let prefix = encoded_prefix(len);
            assert_eq!(
                peek_length(&prefix).unwrap(),
                Some((prefix.len(), len)),
                "length {len:#x}"
            );
        }
    }

    #[test]
    fn decode_waits_for_terminator() {
        let mut codec = SentenceCodec;
        let mut buf = BytesMut::new();
        codec
            .encode(vec!["!done".into(), "=ret=abc".into()], &mut buf)
            .unwrap();

        let full = buf.clone();
        let mut partial = BytesMut::from(&full[..full.len() - 1]);
        assert_eq!(codec.decode(&mut partial).unwrap(), None);
        assert_eq!(partial.len(), full.len() - 1, "partial input must not be consumed");

        partial.put_u8(0);
        assert_eq!(
            codec.decode(&mut partial).unwrap(),
            Some(vec!["!done".to_owned(), "=ret=abc".to_owned()])
        );
        assert!(partial.is_empty());
    }

    #[test]
    fn decode_leaves_following_sentence_in_buffer() {
        let mut codec = SentenceCodec;
        let mut buf = BytesMut::new();
        codec.encode(vec!["!re".into(), "=name=ether1".into()], &mut buf).unwrap();
        codec.encode(vec!["!done".into()], &mut buf).unwrap();

        assert_eq!(
            codec.decode(&mut buf).unwrap(),
            Some(vec!["!re".to_owned(), "=name=ether1".to_owned()])
        );
        assert_eq!(codec.decode(&mut buf).unwrap(), Some(vec!["!done".to_owned()]));
        assert_eq!(codec.decode(&mut buf).unwrap(), None);
    }

    #[test]
    fn control_byte_is_rejected() {
        let mut codec = SentenceCodec;
        let mut buf = BytesMut::from(&[0xF8_u8, 0x00][..]);
        assert!(matches!(codec.decode(&mut buf), Err(Error::Protocol(_))));
    }
}
