//! The dialect-independent [`Frame`] type and its key/value payload.

use std::collections::BTreeMap;

/// Maximum encoded length of a frame, in either dialect, in bytes.
pub const MAXFRAME: usize = 1400;

/// Maximum length of a `source` or `target` token.
pub const MAXTARGET: usize = 48;

/// Sentinel target meaning "no target".
pub const NO_TARGET: &str = "*";

/// The key→list-of-values multimap carried by every frame.
///
/// Keyed on a `BTreeMap` rather than a `HashMap` so that encoding is
/// deterministic: two equal frames always produce identical bytes, which
/// keeps the round-trip properties in `tests/frame_properties.rs` honest.
pub type KVal = BTreeMap<String, Vec<String>>;

/// One decoded protocol message, independent of which wire dialect produced
/// it.
///
/// `source` and `target` are always lower-cased by the codec; everything
/// past that (resolving a `target` to a `User` or `Group`, checking ACLs) is
/// the dispatcher's job, not the codec's.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Sender identifier, normalized lowercase, ≤ [`MAXTARGET`] bytes.
    pub source: String,
    /// Recipient identifier, normalized lowercase, ≤ [`MAXTARGET`] bytes, or
    /// [`NO_TARGET`].
    pub target: String,
    /// Command name, lowercase, hyphens preserved as they arrived on the
    /// wire.
    pub command: String,
    /// Key/value payload.
    pub kval: KVal,
}

impl Frame {
    /// Build a frame from its four fields.
    #[must_use]
    pub fn new(
        source: impl Into<String>,
        target: impl Into<String>,
        command: impl Into<String>,
        kval: KVal,
    ) -> Self {
        Self { source: source.into(), target: target.into(), command: command.into(), kval }
    }

    /// Command name with wire hyphens canonicalized to underscores, for
    /// matching against a handler table.
    #[must_use]
    pub fn handler_name(&self) -> String {
        self.command.replace('-', "_")
    }

    /// Fetch the first value under `key`, if any.
    #[must_use]
    pub fn first(&self, key: &str) -> Option<&str> {
        self.kval.get(key).and_then(|v| v.first()).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handler_name_canonicalizes_hyphens() {
        let frame = Frame::new("alice", "*", "acl-set", KVal::new());
        assert_eq!(frame.handler_name(), "acl_set");
    }

    #[test]
    fn first_reads_initial_value() {
        let mut kval = KVal::new();
        kval.insert("body".to_string(), vec!["hi".to_string(), "there".to_string()]);
        let frame = Frame::new("alice", "bob", "message", kval);
        assert_eq!(frame.first("body"), Some("hi"));
        assert_eq!(frame.first("missing"), None);
    }
}
