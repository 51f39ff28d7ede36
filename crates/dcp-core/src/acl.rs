//! ACL tokens, vocabularies, and the per-target ACL store shared by
//! [`crate::model::User`] and [`crate::model::Group`].

use std::collections::BTreeMap;

use crate::error::DispatchError;

/// One granted ACL token: who set it, when, which is emitted verbatim to
/// `acl-list`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AclEntry {
    /// Unix timestamp (seconds) the token was granted.
    pub timestamp: u64,
    /// Handle of the user that granted it, or `"*"` for an "ipc" (trusted
    /// internal peer) grant with no attributable source.
    pub setter: String,
}

/// Checks whether `token` is a recognized user-scope ACL.
///
/// The vocabulary is fixed: `user:auspex` (staff visibility override),
/// `user:grant` (may mutate other users' ACLs), and `group:grant` (fallback
/// staff override for group ACL mutation, held at user scope per §4.6).
#[must_use]
pub fn is_user_acl(token: &str) -> bool {
    matches!(token, "user:auspex" | "user:grant" | "group:grant")
}

/// Checks whether `token` is a recognized group-scope ACL.
///
/// The vocabulary covers the grant forms a group member can hold:
/// `grant` (any ACL), `grant:*` (equivalent wildcard spelling), and
/// `grant:<acl>` (permission to grant that one specific token).
#[must_use]
pub fn is_group_acl(token: &str) -> bool {
    token == "grant" || token == "grant:*" || token.strip_prefix("grant:").is_some_and(|rest| !rest.is_empty())
}

/// A target's granted ACL tokens, keyed by token.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AclSet {
    entries: BTreeMap<String, AclEntry>,
}

impl AclSet {
    /// An empty ACL set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `token` is held.
    #[must_use]
    pub fn has_acl(&self, token: &str) -> bool {
        self.entries.contains_key(token)
    }

    /// Whether any of `tokens` is held.
    #[must_use]
    pub fn has_any(&self, tokens: &[String]) -> bool {
        tokens.iter().any(|t| self.has_acl(t))
    }

    /// Whether every one of `tokens` is held.
    #[must_use]
    pub fn has_all(&self, tokens: &[String]) -> bool {
        tokens.iter().all(|t| self.has_acl(t))
    }

    /// Grant `token`, recording who granted it and when.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::AclExists`] if `token` is already held.
    pub fn add(&mut self, token: &str, setter: &str, timestamp: u64) -> Result<(), DispatchError> {
        if self.entries.contains_key(token) {
            return Err(DispatchError::AclExists);
        }
        self.entries.insert(
            token.to_string(),
            AclEntry { timestamp, setter: setter.to_string() },
        );
        Ok(())
    }

    /// Revoke `token`.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::AclAbsent`] if `token` is not held.
    pub fn remove(&mut self, token: &str) -> Result<(), DispatchError> {
        self.entries.remove(token).map(|_| ()).ok_or(DispatchError::AclAbsent)
    }

    /// All entries, in token order, for `acl-list` pagination.
    #[must_use]
    pub fn entries(&self) -> impl Iterator<Item = (&str, &AclEntry)> {
        self.entries.iter().map(|(token, entry)| (token.as_str(), entry))
    }

    /// Whether any token is granted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
