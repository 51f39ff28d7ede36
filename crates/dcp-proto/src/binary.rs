//! Binary dialect: length-prefixed, null-separated tokens.
//!
//! ```text
//! [len_hi][len_lo][0x00][source][0x00][target][0x00][command][0x00]
//!   ( [key][0x00][value][0x00] )*  [0x00]
//! ```
//!
//! `len` is the big-endian 16-bit byte count of the whole frame, including
//! the two length bytes themselves and the separator null that follows them.

use crate::error::FrameError;
use crate::frame::{Frame, KVal, MAXFRAME};

/// Outcome of attempting to decode one frame from a buffer.
pub struct Decoded {
    /// The decoded frame.
    pub frame: Frame,
    /// Number of leading bytes of the input buffer this frame consumed.
    pub consumed: usize,
}

/// Decode a single frame from the front of `buf`.
///
/// Returns `Ok(None)` when `buf` does not yet hold a complete frame (the
/// caller should keep buffering). A declared length greater than
/// [`MAXFRAME`] is reported as [`FrameError::Oversize`] immediately, without
/// waiting for the rest of the bytes to arrive.
pub fn decode(buf: &[u8]) -> Result<Option<Decoded>, FrameError> {
    if buf.len() < 3 {
        return Ok(None);
    }

    let len = u16::from_be_bytes([buf[0], buf[1]]) as usize;
    if len > MAXFRAME {
        return Err(FrameError::Oversize);
    }
    if buf.len() < len {
        return Ok(None);
    }

    let body = &buf[2..len];
    // The body always carries two trailing nulls: the last field's own
    // terminator, then the frame's closing terminator. Strip the closing
    // one first so the split below sees the same shape regardless of
    // whether any kval pairs follow the header fields.
    let Some((&0, rest_body)) = body.split_last() else {
        return Err(FrameError::Invalid("malformed frame terminator".to_string()));
    };
    let tokens: Vec<&[u8]> = rest_body.split(|&b| b == 0).collect();
    if tokens.len() < 2 || !tokens[0].is_empty() || !tokens[tokens.len() - 1].is_empty() {
        return Err(FrameError::Invalid("malformed frame terminator".to_string()));
    }

    let fields = &tokens[1..tokens.len() - 1];
    if fields.len() < 3 {
        return Err(FrameError::Invalid("missing source, target or command".to_string()));
    }

    let source = String::from_utf8_lossy(fields[0]).to_lowercase();
    let target = String::from_utf8_lossy(fields[1]).to_lowercase();
    let command = String::from_utf8_lossy(fields[2]).to_lowercase();

    let mut rest: Vec<String> =
        fields[3..].iter().map(|tok| String::from_utf8_lossy(tok).into_owned()).collect();
    if rest.len() % 2 == 1 {
        // Leniency mirrored from the original implementation: pad an odd
        // trailing key with a wildcard value rather than rejecting the frame.
        rest.push("*".to_string());
    }

    let mut kval = KVal::new();
    for pair in rest.chunks(2) {
        let key = pair[0].to_lowercase();
        let value = pair[1].clone();
        let values = kval.entry(key).or_default();
        if values.contains(&value) {
            return Err(FrameError::Invalid("duplicate value under key".to_string()));
        }
        values.push(value);
    }

    Ok(Some(Decoded { frame: Frame::new(source, target, command, kval), consumed: len }))
}

/// Encode `frame` into the binary dialect.
///
/// # Errors
///
/// Returns [`FrameError::Oversize`] if the encoded frame would exceed
/// [`MAXFRAME`] bytes.
pub fn encode(frame: &Frame) -> Result<Vec<u8>, FrameError> {
    let mut body = Vec::new();
    body.push(0u8);
    body.extend_from_slice(frame.source.as_bytes());
    body.push(0);
    body.extend_from_slice(frame.target.as_bytes());
    body.push(0);
    body.extend_from_slice(frame.command.as_bytes());
    body.push(0);
    for (key, values) in &frame.kval {
        for value in values {
            body.extend_from_slice(key.as_bytes());
            body.push(0);
            body.extend_from_slice(value.as_bytes());
            body.push(0);
        }
    }
    body.push(0);

    let total_len = 2 + body.len();
    if total_len > MAXFRAME {
        return Err(FrameError::Oversize);
    }

    let mut out = Vec::with_capacity(total_len);
    out.extend_from_slice(&(total_len as u16).to_be_bytes());
    out.extend(body);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_a_simple_frame() {
        let mut kval = KVal::new();
        kval.insert("handle".to_string(), vec!["alice".to_string()]);
        let frame = Frame::new("alice", "*", "signon", kval);

        let bytes = encode(&frame).expect("encodes");
        let decoded = decode(&bytes).expect("decodes").expect("complete");
        assert_eq!(decoded.frame, frame);
        assert_eq!(decoded.consumed, bytes.len());
    }

    #[test]
    fn incomplete_buffer_waits_for_more_bytes() {
        let mut kval = KVal::new();
        kval.insert("handle".to_string(), vec!["alice".to_string()]);
        let frame = Frame::new("alice", "*", "signon", kval);
        let bytes = encode(&frame).expect("encodes");
        assert!(decode(&bytes[..bytes.len() - 1]).expect("no hard error").is_none());
    }

    #[test]
    fn declared_oversize_length_is_rejected_immediately() {
        let mut buf = vec![0u8; 10];
        buf[0..2].copy_from_slice(&1500u16.to_be_bytes());
        assert_eq!(decode(&buf), Err(FrameError::Oversize));
    }

    #[test]
    fn odd_trailing_key_is_padded_with_wildcard() {
        // source, target, command, then a dangling key with no value.
        let mut body = vec![0u8];
        body.extend_from_slice(b"alice\0*\0ping\0lonely\0");
        body.push(0);
        let total_len = (2 + body.len()) as u16;
        let mut buf = total_len.to_be_bytes().to_vec();
        buf.extend(body);

        let decoded = decode(&buf).expect("decodes").expect("complete");
        assert_eq!(decoded.frame.kval.get("lonely"), Some(&vec!["*".to_string()]));
    }

    #[test]
    fn duplicate_value_under_a_key_is_invalid() {
        let mut body = vec![0u8];
        body.extend_from_slice(b"alice\0*\0ping\0k\0v\0k\0v\0");
        body.push(0);
        let total_len = (2 + body.len()) as u16;
        let mut buf = total_len.to_be_bytes().to_vec();
        buf.extend(body);

        assert!(matches!(decode(&buf), Err(FrameError::Invalid(_))));
    }
}
