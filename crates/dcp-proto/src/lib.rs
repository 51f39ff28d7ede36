//! Wire-frame codec for the DCP chat protocol.
//!
//! A frame is dialect-independent once decoded ([`Frame`]); the binary and
//! JSON dialects are alternative serializations of the same data, chosen per
//! listener at accept time. See [`binary`] and [`json`] for the dialect
//! implementations, and [`fit`]/[`paginate`] for the pagination helpers used
//! by emitters that must split large replies across several frames.

pub mod binary;
pub mod error;
pub mod fit;
pub mod frame;
pub mod json;

pub use error::FrameError;
pub use fit::{fit, paginate};
pub use frame::{Frame, KVal, MAXFRAME, MAXTARGET, NO_TARGET};

/// Outcome of a dialect decode attempt, re-exported for convenience.
pub use binary::Decoded;

/// Which of the two wire syntaxes a listener speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    /// Length-prefixed, null-separated binary tokens.
    Binary,
    /// Null-terminated JSON array.
    Json,
}

impl Dialect {
    /// Decode one frame from the front of `buf` using this dialect.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::Oversize`] or [`FrameError::Invalid`] on a
    /// malformed frame; callers should buffer and retry on `Ok(None)`.
    pub fn decode(self, buf: &[u8]) -> Result<Option<Decoded>, FrameError> {
        match self {
            Self::Binary => binary::decode(buf),
            Self::Json => json::decode(buf),
        }
    }

    /// Encode `frame` using this dialect.
    ///
    /// # Errors
    ///
    /// Returns [`FrameError::Oversize`] if the encoded frame would exceed
    /// [`MAXFRAME`] bytes.
    pub fn encode(self, frame: &Frame) -> Result<Vec<u8>, FrameError> {
        match self {
            Self::Binary => binary::encode(frame),
            Self::Json => json::encode(frame),
        }
    }
}
