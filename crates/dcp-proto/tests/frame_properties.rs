//! Property-based tests for frame encoding/decoding.
//!
//! Verifies the universal invariants: round-tripping a frame through either
//! dialect is lossless, a declared length over `MAXFRAME` is always rejected
//! without buffering the whole payload, and a key with two identical values
//! never parses under the binary dialect.

use dcp_proto::frame::{Frame, KVal, MAXFRAME, MAXTARGET};
use dcp_proto::{binary, json, FrameError};
use proptest::prelude::*;

fn arbitrary_token() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9]{0,10}"
}

fn arbitrary_kval() -> impl Strategy<Value = KVal> {
    prop::collection::btree_map(arbitrary_token(), prop::collection::vec(arbitrary_token(), 0..4), 0..4)
}

fn arbitrary_frame() -> impl Strategy<Value = Frame> {
    (arbitrary_token(), arbitrary_token(), arbitrary_token(), arbitrary_kval())
        .prop_map(|(source, target, command, kval)| Frame::new(source, target, command, kval))
}

proptest! {
    #[test]
    fn binary_round_trip_when_it_fits(frame in arbitrary_frame()) {
        if let Ok(bytes) = binary::encode(&frame) {
            prop_assert!(bytes.len() <= MAXFRAME);
            let decoded = binary::decode(&bytes).unwrap().expect("complete frame");
            prop_assert_eq!(decoded.frame, frame);
            prop_assert_eq!(decoded.consumed, bytes.len());
        }
    }

    #[test]
    fn json_round_trip_when_it_fits(frame in arbitrary_frame()) {
        if let Ok(bytes) = json::encode(&frame) {
            prop_assert!(bytes.len() <= MAXFRAME);
            let decoded = json::decode(&bytes).unwrap().expect("complete frame");
            prop_assert_eq!(decoded.frame, frame);
            prop_assert_eq!(decoded.consumed, bytes.len());
        }
    }

    #[test]
    fn oversize_declared_length_never_allocates_the_payload(extra in 0usize..64) {
        let declared = (MAXFRAME + 1 + extra) as u16;
        let mut buf = declared.to_be_bytes().to_vec();
        buf.push(0); // only a handful of bytes actually present
        prop_assert_eq!(binary::decode(&buf), Err(FrameError::Oversize));
    }

    #[test]
    fn duplicate_value_under_one_key_always_fails(value in arbitrary_token()) {
        let mut body = vec![0u8];
        body.extend_from_slice(b"alice\0*\0ping\0k\0");
        body.extend_from_slice(value.as_bytes());
        body.push(0);
        body.extend_from_slice(b"k\0");
        body.extend_from_slice(value.as_bytes());
        body.push(0);
        body.push(0);

        let total_len = (2 + body.len()) as u16;
        let mut buf = total_len.to_be_bytes().to_vec();
        buf.extend(body);

        prop_assert!(matches!(binary::decode(&buf), Err(FrameError::Invalid(_))));
    }
}

#[test]
fn source_and_target_never_exceed_the_advertised_limit_in_practice() {
    let source = "a".repeat(MAXTARGET);
    let target = "b".repeat(MAXTARGET);
    let frame = Frame::new(source, target, "ping", KVal::new());
    assert!(binary::encode(&frame).is_ok());
}
