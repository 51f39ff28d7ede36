//! Credential store interface.
//!
//! The store itself (on-disk format, caching, migrations) is explicitly out
//! of scope; only the interface and an in-memory stub for tests live here.
//! Production deployments supply their own [`CredentialStore`] impl backed
//! by whatever storage they trust.

use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use thiserror::Error;

/// One stored account.
#[derive(Debug, Clone)]
pub struct CredentialRecord {
    /// Salted password hash in a portable crypt format.
    pub hash: String,
    /// Free-text display field.
    pub gecos: String,
    /// ACL tokens granted at registration time.
    pub acls: Vec<String>,
}

/// One row of `acl-list` output.
#[derive(Debug, Clone)]
pub struct AclRow {
    /// The ACL token.
    pub acl: String,
    /// When it was granted, unix seconds.
    pub timestamp: u64,
    /// Who granted it (`*` for unattributed/ipc grants).
    pub setter: String,
}

/// Failures from a credential store backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// `add` called for a handle that already has a record.
    #[error("handle already registered")]
    AlreadyExists,
    /// Backend I/O or connectivity failure.
    #[error("credential store unavailable: {0}")]
    Unavailable(String),
}

/// Looks up handles, returns salted password hashes plus gecos and ACL
/// sets, and persists new registrations. All calls may suspend (disk or
/// network I/O). Handles and group names are stored case-folded.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Fetch the stored record for `handle`, if registered.
    async fn get(&self, handle: &str) -> Result<Option<CredentialRecord>, StoreError>;

    /// Persist a new registration.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::AlreadyExists`] if `handle` is already
    /// registered.
    async fn add(
        &self,
        handle: &str,
        hash: &str,
        gecos: &str,
        acls: &[String],
    ) -> Result<(), StoreError>;

    /// Fetch the ACL history for a user.
    async fn get_user_acl(&self, handle: &str) -> Result<Vec<AclRow>, StoreError>;

    /// Fetch the ACL history for a group.
    async fn get_group_acl(&self, groupname: &str) -> Result<Vec<AclRow>, StoreError>;

    /// Record a grant or revocation so `get_user_acl`/`get_group_acl` stay
    /// current. Revocations are recorded by omission on the next read in
    /// simple backends; this stub keeps an explicit log instead.
    async fn record_user_acl(&self, handle: &str, row: AclRow) -> Result<(), StoreError>;

    /// See [`Self::record_user_acl`], for groups.
    async fn record_group_acl(&self, groupname: &str, row: AclRow) -> Result<(), StoreError>;

    /// Remove a previously recorded ACL row.
    async fn forget_user_acl(&self, handle: &str, acl: &str) -> Result<(), StoreError>;

    /// See [`Self::forget_user_acl`], for groups.
    async fn forget_group_acl(&self, groupname: &str, acl: &str) -> Result<(), StoreError>;
}

#[async_trait]
impl<T: CredentialStore + ?Sized> CredentialStore for Arc<T> {
    async fn get(&self, handle: &str) -> Result<Option<CredentialRecord>, StoreError> {
        (**self).get(handle).await
    }

    async fn add(
        &self,
        handle: &str,
        hash: &str,
        gecos: &str,
        acls: &[String],
    ) -> Result<(), StoreError> {
        (**self).add(handle, hash, gecos, acls).await
    }

    async fn get_user_acl(&self, handle: &str) -> Result<Vec<AclRow>, StoreError> {
        (**self).get_user_acl(handle).await
    }

    async fn get_group_acl(&self, groupname: &str) -> Result<Vec<AclRow>, StoreError> {
        (**self).get_group_acl(groupname).await
    }

    async fn record_user_acl(&self, handle: &str, row: AclRow) -> Result<(), StoreError> {
        (**self).record_user_acl(handle, row).await
    }

    async fn record_group_acl(&self, groupname: &str, row: AclRow) -> Result<(), StoreError> {
        (**self).record_group_acl(groupname, row).await
    }

    async fn forget_user_acl(&self, handle: &str, acl: &str) -> Result<(), StoreError> {
        (**self).forget_user_acl(handle, acl).await
    }

    async fn forget_group_acl(&self, groupname: &str, acl: &str) -> Result<(), StoreError> {
        (**self).forget_group_acl(groupname, acl).await
    }
}

/// A non-persistent, non-cryptographic stub store for tests.
///
/// `crypt` here is a stand-in that is deliberately not a real password KDF:
/// the credential store's hashing scheme is explicitly out of scope for
/// this server. Do not use `InMemoryCredentialStore` in production.
#[derive(Default)]
pub struct InMemoryCredentialStore {
    accounts: Mutex<HashMap<String, CredentialRecord>>,
    user_acl: Mutex<HashMap<String, Vec<AclRow>>>,
    group_acl: Mutex<HashMap<String, Vec<AclRow>>>,
}

impl InMemoryCredentialStore {
    /// An empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an account directly, bypassing `add`'s already-exists check.
    /// Test-only convenience.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned. Acceptable for test code.
    #[allow(clippy::expect_used)]
    pub fn seed(&self, handle: &str, password: &str, gecos: &str, acls: &[String]) {
        let record = CredentialRecord {
            hash: crypt(password, handle),
            gecos: gecos.to_string(),
            acls: acls.to_vec(),
        };
        self.accounts.lock().expect("lock poisoned").insert(handle.to_string(), record);
    }
}

/// A stand-in "crypt": salts with `salt` and hashes with
/// `DefaultHasher`. Stable across calls (same input, same output), which is
/// all the signon/register handlers require from the store's perspective.
#[must_use]
pub fn crypt(password: &str, salt: &str) -> String {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    salt.hash(&mut hasher);
    password.hash(&mut hasher);
    format!("{salt}${:016x}", hasher.finish())
}

#[async_trait]
impl CredentialStore for InMemoryCredentialStore {
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned. Acceptable for test code.
    #[allow(clippy::expect_used)]
    async fn get(&self, handle: &str) -> Result<Option<CredentialRecord>, StoreError> {
        Ok(self.accounts.lock().expect("lock poisoned").get(handle).cloned())
    }

    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned. Acceptable for test code.
    #[allow(clippy::expect_used)]
    async fn add(
        &self,
        handle: &str,
        hash: &str,
        gecos: &str,
        acls: &[String],
    ) -> Result<(), StoreError> {
        let mut accounts = self.accounts.lock().expect("lock poisoned");
        if accounts.contains_key(handle) {
            return Err(StoreError::AlreadyExists);
        }
        accounts.insert(
            handle.to_string(),
            CredentialRecord { hash: hash.to_string(), gecos: gecos.to_string(), acls: acls.to_vec() },
        );
        Ok(())
    }

    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned. Acceptable for test code.
    #[allow(clippy::expect_used)]
    async fn get_user_acl(&self, handle: &str) -> Result<Vec<AclRow>, StoreError> {
        Ok(self.user_acl.lock().expect("lock poisoned").get(handle).cloned().unwrap_or_default())
    }

    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned. Acceptable for test code.
    #[allow(clippy::expect_used)]
    async fn get_group_acl(&self, groupname: &str) -> Result<Vec<AclRow>, StoreError> {
        Ok(self.group_acl.lock().expect("lock poisoned").get(groupname).cloned().unwrap_or_default())
    }

    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned. Acceptable for test code.
    #[allow(clippy::expect_used)]
    async fn record_user_acl(&self, handle: &str, row: AclRow) -> Result<(), StoreError> {
        self.user_acl.lock().expect("lock poisoned").entry(handle.to_string()).or_default().push(row);
        Ok(())
    }

    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned. Acceptable for test code.
    #[allow(clippy::expect_used)]
    async fn record_group_acl(&self, groupname: &str, row: AclRow) -> Result<(), StoreError> {
        self.group_acl
            .lock()
            .expect("lock poisoned")
            .entry(groupname.to_string())
            .or_default()
            .push(row);
        Ok(())
    }

    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned. Acceptable for test code.
    #[allow(clippy::expect_used)]
    async fn forget_user_acl(&self, handle: &str, acl: &str) -> Result<(), StoreError> {
        if let Some(rows) = self.user_acl.lock().expect("lock poisoned").get_mut(handle) {
            rows.retain(|row| row.acl != acl);
        }
        Ok(())
    }

    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned. Acceptable for test code.
    #[allow(clippy::expect_used)]
    async fn forget_group_acl(&self, groupname: &str, acl: &str) -> Result<(), StoreError> {
        if let Some(rows) = self.group_acl.lock().expect("lock poisoned").get_mut(groupname) {
            rows.retain(|row| row.acl != acl);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn add_rejects_duplicate_handle() {
        let store = InMemoryCredentialStore::new();
        store.add("alice", "hash", "Alice", &[]).await.unwrap();
        assert_eq!(store.add("alice", "hash2", "Alice", &[]).await, Err(StoreError::AlreadyExists));
    }

    #[tokio::test]
    async fn seeded_account_verifies_with_crypt() {
        let store = InMemoryCredentialStore::new();
        store.seed("alice", "hunter2", "Alice", &[]);
        let record = store.get("alice").await.unwrap().expect("seeded");
        assert_eq!(record.hash, crypt("hunter2", "alice"));
    }

    #[tokio::test]
    async fn acl_rows_round_trip() {
        let store = InMemoryCredentialStore::new();
        store
            .record_user_acl("alice", AclRow { acl: "user:auspex".into(), timestamp: 1, setter: "*".into() })
            .await
            .unwrap();
        assert_eq!(store.get_user_acl("alice").await.unwrap().len(), 1);
        store.forget_user_acl("alice", "user:auspex").await.unwrap();
        assert!(store.get_user_acl("alice").await.unwrap().is_empty());
    }
}
