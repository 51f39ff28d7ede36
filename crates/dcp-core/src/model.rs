//! The in-memory user/group membership model.
//!
//! `User` and `Group` are plain data: the server crate's registry owns the
//! authoritative maps (`handle → User`, `group name → Group`) and is
//! responsible for keeping the bidirectional `U ∈ G.members ⇔ G ∈ U.groups`
//! invariant true across every mutation.

use std::collections::BTreeSet;

use crate::acl::AclSet;
use crate::error::DispatchError;

/// Maximum length of a handle, group name, or gecos field.
pub const MAXTARGET: usize = 48;

/// Validate a `signon`/`register` handle.
///
/// Mirrors `^[^#!=&$,?*\[\]][^=$,?*\[\]]+$`: the first character may not be
/// one of the sigil characters used to tag server/service/group/opaque
/// targets, and the handle must be at least two characters so it cannot
/// collide with the single-character sentinels.
#[must_use]
pub fn valid_handle(handle: &str) -> bool {
    if handle.is_empty() || handle.len() > MAXTARGET {
        return false;
    }
    let mut chars = handle.chars();
    let Some(first) = chars.next() else { return false };
    if "#!=&$,?*[]".contains(first) {
        return false;
    }
    if chars.clone().next().is_none() {
        return false; // need at least a second character
    }
    chars.all(|c| !"=$,?*[]".contains(c))
}

/// Validate a `group-enter`/`group-exit` target.
#[must_use]
pub fn valid_group_name(name: &str) -> bool {
    name.starts_with('#') && name.len() > 1 && name.len() <= MAXTARGET
}

/// Where a frame's `source`/`target` ultimately point, per the small tagged
/// variant the original's dynamic coercion becomes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// A registered user, by handle.
    User(String),
    /// A group, by name (including the leading `#`).
    Group(String),
    /// The server itself.
    Server,
    /// No endpoint (`*`).
    None,
    /// Anything else, rendered with a `&` sigil (e.g. a service name).
    Opaque(String),
}

impl Endpoint {
    /// Render this endpoint as a wire `source`/`target` token.
    #[must_use]
    pub fn render(&self, server_name: &str) -> String {
        match self {
            Self::User(handle) => handle.clone(),
            Self::Group(name) => name.clone(),
            Self::Server => format!("={server_name}"),
            Self::None => "*".to_string(),
            Self::Opaque(name) => format!("&{name}"),
        }
    }
}

/// A signed-on user.
#[derive(Debug, Clone)]
pub struct User {
    /// Case-folded, globally unique login name.
    pub handle: String,
    /// Free-text display field, ≤ [`MAXTARGET`] bytes.
    pub gecos: String,
    /// User-scope ACL tokens (`user:auspex`, `user:grant`, `group:grant`,
    /// ...).
    pub acl: AclSet,
    /// Opaque client-declared property tokens.
    pub properties: BTreeSet<String>,
    /// Id of the owning session in the server's session registry.
    pub session_id: u64,
    /// Names of every group this user is currently a member of.
    pub groups: BTreeSet<String>,
    /// Set when a `ping` has been sent and no `pong` has arrived yet.
    pub pending_ping: bool,
}

impl User {
    /// Create a freshly-signed-on user with no groups and no pending ping.
    #[must_use]
    pub fn new(handle: impl Into<String>, gecos: impl Into<String>, session_id: u64) -> Self {
        Self {
            handle: handle.into(),
            gecos: gecos.into(),
            acl: AclSet::new(),
            properties: BTreeSet::new(),
            session_id,
            groups: BTreeSet::new(),
            pending_ping: false,
        }
    }
}

/// A named group (channel).
#[derive(Debug, Clone)]
pub struct Group {
    /// Group name, including the leading `#`, case-folded.
    pub name: String,
    /// Handles of current members.
    pub members: BTreeSet<String>,
    /// Per-member ACL grants within this group.
    pub acl: std::collections::BTreeMap<String, AclSet>,
}

impl Group {
    /// Create an empty group.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), members: BTreeSet::new(), acl: std::collections::BTreeMap::new() }
    }

    /// Add `handle` to membership.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::AlreadyMember`] if already a member.
    pub fn add_member(&mut self, handle: &str) -> Result<(), DispatchError> {
        if !self.members.insert(handle.to_string()) {
            return Err(DispatchError::AlreadyMember);
        }
        Ok(())
    }

    /// Remove `handle` from membership.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::NotAMember`] if not currently a member.
    pub fn remove_member(&mut self, handle: &str) -> Result<(), DispatchError> {
        if !self.members.remove(handle) {
            return Err(DispatchError::NotAMember);
        }
        self.acl.remove(handle);
        Ok(())
    }

    /// Whether the group has no remaining members and may be reclaimed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handle_validation_matches_the_wire_regex() {
        assert!(valid_handle("alice"));
        assert!(!valid_handle("#lobby"));
        assert!(!valid_handle("*"));
        assert!(!valid_handle(""));
        assert!(!valid_handle("a"));
        assert!(!valid_handle(&"a".repeat(49)));
        assert!(!valid_handle("al=ice"));
    }

    #[test]
    fn group_name_validation() {
        assert!(valid_group_name("#lobby"));
        assert!(!valid_group_name("lobby"));
        assert!(!valid_group_name("#"));
    }

    #[test]
    fn endpoint_rendering_matches_the_coercion_rule() {
        assert_eq!(Endpoint::User("alice".into()).render("irc"), "alice");
        assert_eq!(Endpoint::Group("#lobby".into()).render("irc"), "#lobby");
        assert_eq!(Endpoint::Server.render("irc"), "=irc");
        assert_eq!(Endpoint::None.render("irc"), "*");
        assert_eq!(Endpoint::Opaque("relay".into()).render("irc"), "&relay");
    }

    #[test]
    fn group_membership_round_trips() {
        let mut group = Group::new("#lobby");
        group.add_member("alice").unwrap();
        assert_eq!(group.add_member("alice"), Err(DispatchError::AlreadyMember));
        group.remove_member("alice").unwrap();
        assert_eq!(group.remove_member("alice"), Err(DispatchError::NotAMember));
        assert!(group.is_empty());
    }
}
