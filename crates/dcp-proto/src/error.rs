//! Codec error types.

use std::fmt;

/// Failure modes for frame decoding and encoding.
///
/// The three kinds mirror the distinct handling a session gives them: an
/// incomplete frame means "keep buffering", while oversize and invalid frames
/// both surface as a non-fatal `error` reply with the session left open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Not enough bytes have arrived yet to extract a full frame.
    Incomplete,

    /// The frame's declared or actual length exceeds `MAXFRAME` (1400 bytes).
    Oversize,

    /// The frame violates dialect structure (bad terminator, missing
    /// required field, duplicate kval value, non-string JSON value, ...).
    Invalid(String),
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Incomplete => write!(f, "incomplete frame"),
            Self::Oversize => write!(f, "frame exceeds maximum size"),
            Self::Invalid(reason) => write!(f, "invalid frame: {reason}"),
        }
    }
}

impl std::error::Error for FrameError {}
