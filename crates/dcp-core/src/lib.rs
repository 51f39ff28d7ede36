//! Sans-IO session state machine, user/group model, and ACL checks for the
//! DCP chat protocol.
//!
//! This crate has no knowledge of sockets, TLS, or an event loop: every
//! public type takes time (and randomness, via [`env::Environment`]) as
//! explicit input and returns actions for a driver to execute. The
//! `dcp-server` crate supplies that driver.

pub mod acl;
pub mod connection;
pub mod env;
pub mod error;
pub mod model;

pub use acl::{AclEntry, AclSet};
pub use connection::{Connection, IngestOutcome, SessionAction, SessionState, SIGNON_TIMEOUT};
pub use env::Environment;
pub use error::DispatchError;
pub use model::{valid_group_name, valid_handle, Endpoint, Group, User};
