//! Error taxonomy for session/dispatch logic.
//!
//! Every variant knows whether it is fatal (closes the session after the
//! `error` frame is written) and its wire `reason` string, so a handler can
//! return a `Result<(), DispatchError>` and let the dispatcher turn it into
//! an outbound frame uniformly instead of each handler building its own.

use thiserror::Error;

/// Errors a command handler can fail with.
///
/// `Display` yields the exact wire `reason` string.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// Sent before registration completes.
    #[error("You are not registered with the server")]
    NotRegistered,

    /// `signon`/`register` sent after registration completed.
    #[error("This command is only usable before registration")]
    AlreadyRegistered,

    /// Unknown handler name.
    #[error("No such command")]
    NoSuchCommand,

    /// `signon`/`register` handle validation failure; `reason` names which
    /// check failed ("No handle", "Invalid handle", "Handle is too long",
    /// "Handle already registered", ...).
    #[error("{0}")]
    InvalidHandle(String),

    /// `servpass` mismatch, missing, or crypt comparison failure.
    #[error("Invalid password")]
    InvalidPassword,

    /// Bad password on registration ("Bad password", "Registration
    /// password is too short", ...).
    #[error("{0}")]
    InvalidRegistration(String),

    /// Handle is already signed on from another session.
    #[error("No multiple users at the moment")]
    AlreadyOnline,

    /// `signon` timer fired before registration completed.
    #[error("Timed out")]
    SignonTimeout,

    /// No `pong` since the last `ping`.
    #[error("Ping timeout")]
    PingTimeout,

    /// `message`/`whois`/`acl-*` target does not resolve to a known user or
    /// group.
    #[error("No such target")]
    NoSuchTarget,

    /// Target syntactically invalid for the command (`*`, server prefix not
    /// yet supported, group name malformed, ...).
    #[error("{0}")]
    InvalidTarget(String),

    /// `group-enter` on a group the user has already joined.
    #[error("Already a member")]
    AlreadyMember,

    /// `group-exit` on a group the user has not joined.
    #[error("Not a member")]
    NotAMember,

    /// ACL token not in the relevant vocabulary.
    #[error("Invalid ACL")]
    InvalidAcl,

    /// No value supplied for the `acl` kval key.
    #[error("No ACL")]
    NoAcl,

    /// No value supplied for the `user` kval key on a group ACL op.
    #[error("No valid user for target")]
    NoAclUser,

    /// `acl-set` on an ACL the target already holds.
    #[error("ACL exists")]
    AclExists,

    /// `acl-del`/`acl-list` on an ACL the target does not hold.
    #[error("ACL does not exist")]
    AclAbsent,

    /// Requester lacks the grant needed to mutate or view an ACL; `reason`
    /// distinguishes "not a member", "no permission", etc.
    #[error("{0}")]
    NoGrant(String),

    /// Messaging a server/service target, which is not yet implemented.
    #[error("Cannot message servers yet")]
    ServersNotSupported,

    /// A handler panicked or returned an undeclared error.
    #[error("Internal server error")]
    Internal,
}

impl DispatchError {
    /// Whether this error closes the session after the `error` frame is
    /// flushed.
    #[must_use]
    pub fn fatal(&self) -> bool {
        matches!(self, Self::InvalidPassword | Self::AlreadyOnline | Self::SignonTimeout | Self::PingTimeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_and_liveness_failures_are_fatal() {
        assert!(DispatchError::InvalidPassword.fatal());
        assert!(DispatchError::AlreadyOnline.fatal());
        assert!(DispatchError::SignonTimeout.fatal());
        assert!(DispatchError::PingTimeout.fatal());
    }

    #[test]
    fn routing_and_acl_failures_are_non_fatal() {
        assert!(!DispatchError::NotRegistered.fatal());
        assert!(!DispatchError::NoSuchTarget.fatal());
        assert!(!DispatchError::AclExists.fatal());
        assert!(!DispatchError::InvalidRegistration("Handle already registered".to_string()).fatal());
        assert!(!DispatchError::NoGrant("No permission to alter ACL".to_string()).fatal());
        assert!(!DispatchError::Internal.fatal());
    }

    #[test]
    fn reason_strings_match_the_wire_vocabulary() {
        assert_eq!(DispatchError::NotRegistered.to_string(), "You are not registered with the server");
        assert_eq!(DispatchError::NoSuchCommand.to_string(), "No such command");
        assert_eq!(DispatchError::AclExists.to_string(), "ACL exists");
    }
}
