//! User and group registry: the Server's sole owning maps.
//!
//! Maintains the bidirectional `U ∈ G.members ⇔ G ∈ U.groups` invariant:
//! every membership change touches both the `Group.members` set and the
//! `User.groups` set in one call, and removing a user walks its `groups`
//! set to leave every `Group.members` entry consistent. Groups are created
//! lazily on first entry and reclaimed when the last member leaves.

use std::collections::HashMap;

use dcp_core::{DispatchError, Group, User};

/// Owns every signed-on `User` and every live `Group`.
///
/// Keyed by case-folded handle and group name respectively, with a
/// `session_id → handle` reverse index so a closing transport can look up
/// (and remove) its user without the driver tracking the handle itself.
#[derive(Debug, Default)]
pub struct Registry {
    users: HashMap<String, User>,
    groups: HashMap<String, Group>,
    session_handle: HashMap<u64, String>,
}

impl Registry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `handle` is currently signed on.
    #[must_use]
    pub fn has_user(&self, handle: &str) -> bool {
        self.users.contains_key(handle)
    }

    /// The signed-on user, if any.
    #[must_use]
    pub fn user(&self, handle: &str) -> Option<&User> {
        self.users.get(handle)
    }

    /// Mutable access to a signed-on user.
    pub fn user_mut(&mut self, handle: &str) -> Option<&mut User> {
        self.users.get_mut(handle)
    }

    /// The handle owning `session_id`, if that session has completed
    /// registration.
    #[must_use]
    pub fn handle_for_session(&self, session_id: u64) -> Option<&str> {
        self.session_handle.get(&session_id).map(String::as_str)
    }

    /// A live group, if it exists.
    #[must_use]
    pub fn group(&self, name: &str) -> Option<&Group> {
        self.groups.get(name)
    }

    /// Mutable access to a live group.
    pub fn group_mut(&mut self, name: &str) -> Option<&mut Group> {
        self.groups.get_mut(name)
    }

    /// Enter `user` into the registry at signon/register time.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::AlreadyOnline`] if the handle is already
    /// signed on (single-session policy).
    pub fn enter_user(&mut self, user: User) -> Result<(), DispatchError> {
        if self.users.contains_key(&user.handle) {
            return Err(DispatchError::AlreadyOnline);
        }
        self.session_handle.insert(user.session_id, user.handle.clone());
        self.users.insert(user.handle.clone(), user);
        Ok(())
    }

    /// Remove a signed-on user (session close or forced kick).
    ///
    /// Leaves every group it belonged to, reclaiming groups left empty.
    /// Returns the removed user plus the names of the groups it departed,
    /// in membership order, so the driver can broadcast a departure frame
    /// to each.
    pub fn remove_user(&mut self, handle: &str) -> Option<(User, Vec<String>)> {
        let user = self.users.remove(handle)?;
        self.session_handle.remove(&user.session_id);

        let mut departed = Vec::new();
        for group_name in &user.groups {
            if let Some(group) = self.groups.get_mut(group_name) {
                let _ = group.remove_member(handle);
                departed.push(group_name.clone());
                if group.is_empty() {
                    self.groups.remove(group_name);
                }
            }
        }

        Some((user, departed))
    }

    /// Add `handle` to `group_name`, creating the group if it does not yet
    /// exist.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::AlreadyMember`] if already a member.
    ///
    /// # Panics
    ///
    /// Panics if `handle` is not currently signed on; callers must only
    /// invoke this for a session that has completed registration.
    #[allow(clippy::expect_used)]
    pub fn enter_group(&mut self, handle: &str, group_name: &str) -> Result<(), DispatchError> {
        let group = self.groups.entry(group_name.to_string()).or_insert_with(|| Group::new(group_name));
        group.add_member(handle)?;
        self.users.get_mut(handle).expect("invariant: handle is signed on").groups.insert(group_name.to_string());
        Ok(())
    }

    /// Remove `handle` from `group_name`, reclaiming the group if now
    /// empty.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::NoSuchTarget`] if the group does not exist,
    /// or [`DispatchError::NotAMember`] if `handle` is not a member.
    ///
    /// # Panics
    ///
    /// Panics if `handle` is not currently signed on.
    #[allow(clippy::expect_used)]
    pub fn exit_group(&mut self, handle: &str, group_name: &str) -> Result<(), DispatchError> {
        let group = self.groups.get_mut(group_name).ok_or(DispatchError::NoSuchTarget)?;
        group.remove_member(handle)?;
        if group.is_empty() {
            self.groups.remove(group_name);
        }
        self.users.get_mut(handle).expect("invariant: handle is signed on").groups.remove(group_name);
        Ok(())
    }

    /// Handles of every member of `group_name`, for fan-out. Empty if the
    /// group does not exist.
    #[must_use]
    pub fn group_members(&self, group_name: &str) -> Vec<String> {
        self.groups.get(group_name).map(|g| g.members.iter().cloned().collect()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(handle: &str, session_id: u64) -> User {
        User::new(handle, handle, session_id)
    }

    #[test]
    fn enter_and_lookup_user() {
        let mut registry = Registry::new();
        registry.enter_user(user("alice", 1)).unwrap();

        assert!(registry.has_user("alice"));
        assert_eq!(registry.handle_for_session(1), Some("alice"));
        assert!(!registry.has_user("bob"));
    }

    #[test]
    fn enter_user_rejects_duplicate_handle() {
        let mut registry = Registry::new();
        registry.enter_user(user("alice", 1)).unwrap();
        assert_eq!(registry.enter_user(user("alice", 2)), Err(DispatchError::AlreadyOnline));
    }

    #[test]
    fn group_entry_creates_lazily_and_keeps_invariant() {
        let mut registry = Registry::new();
        registry.enter_user(user("alice", 1)).unwrap();

        registry.enter_group("alice", "#lobby").unwrap();

        assert!(registry.group("#lobby").unwrap().members.contains("alice"));
        assert!(registry.user("alice").unwrap().groups.contains("#lobby"));
    }

    #[test]
    fn duplicate_group_entry_fails() {
        let mut registry = Registry::new();
        registry.enter_user(user("alice", 1)).unwrap();
        registry.enter_group("alice", "#lobby").unwrap();

        assert_eq!(registry.enter_group("alice", "#lobby"), Err(DispatchError::AlreadyMember));
    }

    #[test]
    fn group_exit_reclaims_empty_group() {
        let mut registry = Registry::new();
        registry.enter_user(user("alice", 1)).unwrap();
        registry.enter_group("alice", "#lobby").unwrap();

        registry.exit_group("alice", "#lobby").unwrap();

        assert!(registry.group("#lobby").is_none());
        assert!(!registry.user("alice").unwrap().groups.contains("#lobby"));
    }

    #[test]
    fn exit_unknown_group_fails() {
        let mut registry = Registry::new();
        registry.enter_user(user("alice", 1)).unwrap();
        assert_eq!(registry.exit_group("alice", "#lobby"), Err(DispatchError::NoSuchTarget));
    }

    #[test]
    fn exit_non_member_fails_without_reclaiming_group() {
        let mut registry = Registry::new();
        registry.enter_user(user("alice", 1)).unwrap();
        registry.enter_user(user("bob", 2)).unwrap();
        registry.enter_group("alice", "#lobby").unwrap();

        assert_eq!(registry.exit_group("bob", "#lobby"), Err(DispatchError::NotAMember));
        assert!(registry.group("#lobby").is_some());
    }

    #[test]
    fn remove_user_departs_every_group_and_reclaims_empties() {
        let mut registry = Registry::new();
        registry.enter_user(user("alice", 1)).unwrap();
        registry.enter_user(user("bob", 2)).unwrap();
        registry.enter_group("alice", "#lobby").unwrap();
        registry.enter_group("bob", "#lobby").unwrap();
        registry.enter_group("alice", "#other").unwrap();

        let (removed, departed) = registry.remove_user("alice").unwrap();
        assert_eq!(removed.handle, "alice");
        assert_eq!(departed.len(), 2);
        assert!(departed.contains(&"#lobby".to_string()));
        assert!(departed.contains(&"#other".to_string()));

        assert!(registry.group("#other").is_none(), "alice was the only member");
        assert!(registry.group("#lobby").is_some(), "bob remains");
        assert!(!registry.group("#lobby").unwrap().members.contains("alice"));
        assert!(!registry.has_user("alice"));
        assert_eq!(registry.handle_for_session(1), None);
    }

    #[test]
    fn group_members_lists_current_membership() {
        let mut registry = Registry::new();
        registry.enter_user(user("alice", 1)).unwrap();
        registry.enter_user(user("bob", 2)).unwrap();
        registry.enter_group("alice", "#lobby").unwrap();
        registry.enter_group("bob", "#lobby").unwrap();

        let mut members = registry.group_members("#lobby");
        members.sort();
        assert_eq!(members, vec!["alice".to_string(), "bob".to_string()]);
        assert!(registry.group_members("#nonexistent").is_empty());
    }
}
