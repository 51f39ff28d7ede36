//! JSON dialect: a two-element array terminated by a single null byte.
//!
//! ```text
//! [ { "source": s, "target": t, "command": c }, { key: [v, ...], ... } ]\0
//! ```

use serde::Deserialize;
use serde_json::Value;

use crate::binary::Decoded;
use crate::error::FrameError;
use crate::frame::{Frame, KVal, MAXFRAME};

/// Frames shorter than this (including the trailing null) cannot possibly
/// hold the required header fields and are rejected outright.
const MIN_JSON_FRAME: usize = 20;

#[derive(Deserialize)]
struct Header {
    source: String,
    target: String,
    command: String,
}

/// Decode a single frame from the front of `buf`.
///
/// Returns `Ok(None)` when no terminating null has arrived yet.
pub fn decode(buf: &[u8]) -> Result<Option<Decoded>, FrameError> {
    let Some(terminator) = buf.iter().position(|&b| b == 0) else {
        if buf.len() > MAXFRAME {
            return Err(FrameError::Oversize);
        }
        return Ok(None);
    };

    let consumed = terminator + 1;
    if consumed > MAXFRAME {
        return Err(FrameError::Oversize);
    }
    if consumed < MIN_JSON_FRAME {
        return Err(FrameError::Invalid("frame shorter than minimum JSON frame".to_string()));
    }

    let json_bytes = &buf[..terminator];
    let value: Value = serde_json::from_slice(json_bytes)
        .map_err(|e| FrameError::Invalid(format!("malformed JSON: {e}")))?;
    let Value::Array(elements) = value else {
        return Err(FrameError::Invalid("frame is not a JSON array".to_string()));
    };
    if elements.len() != 2 {
        return Err(FrameError::Invalid("frame array must have exactly two elements".to_string()));
    }

    let header: Header = serde_json::from_value(elements[0].clone())
        .map_err(|e| FrameError::Invalid(format!("malformed header: {e}")))?;

    let Value::Object(raw_kval) = &elements[1] else {
        return Err(FrameError::Invalid("kval element must be a JSON object".to_string()));
    };

    let mut kval = KVal::new();
    for (key, value) in raw_kval {
        let Value::Array(values) = value else {
            return Err(FrameError::Invalid(format!("kval[{key}] is not an array")));
        };
        let mut strings = Vec::with_capacity(values.len());
        for v in values {
            let Value::String(s) = v else {
                return Err(FrameError::Invalid(format!("kval[{key}] contains a non-string value")));
            };
            strings.push(s.clone());
        }
        kval.insert(key.to_lowercase(), strings);
    }

    let frame = Frame::new(
        header.source.to_lowercase(),
        header.target.to_lowercase(),
        header.command.to_lowercase(),
        kval,
    );

    Ok(Some(Decoded { frame, consumed }))
}

/// Encode `frame` into the JSON dialect, including the trailing null byte.
///
/// # Errors
///
/// Returns [`FrameError::Oversize`] if the encoded frame would exceed
/// [`MAXFRAME`] bytes.
pub fn encode(frame: &Frame) -> Result<Vec<u8>, FrameError> {
    let header = serde_json::json!({
        "source": frame.source,
        "target": frame.target,
        "command": frame.command,
    });
    let array = serde_json::json!([header, frame.kval]);
    let mut bytes =
        serde_json::to_vec(&array).map_err(|e| FrameError::Invalid(e.to_string()))?;
    bytes.push(0);
    if bytes.len() > MAXFRAME {
        return Err(FrameError::Oversize);
    }
    Ok(bytes)
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
    fn rejects_non_string_kval_values() {
        let raw = br#"[{"source":"a","target":"*","command":"ping"},{"k":[1]}]"#;
        let mut buf = raw.to_vec();
        buf.push(0);
        assert!(matches!(decode(&buf), Err(FrameError::Invalid(_))));
    }

    #[test]
    fn rejects_frames_shorter_than_minimum() {
        let raw = br#"[{},{}]"#;
        let mut buf = raw.to_vec();
        buf.push(0);
        assert!(matches!(decode(&buf), Err(FrameError::Invalid(_))));
    }

    #[test]
    fn incomplete_without_terminator() {
        let raw = br#"[{"source":"a","target":"*","command":"ping"},{}]"#;
        assert!(decode(raw).expect("no hard error").is_none());
    }
}
