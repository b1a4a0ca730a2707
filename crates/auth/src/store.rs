//! Collaborator contracts: identity storage and password hashing.
//!
//! Both are implemented outside this crate (database, KMS, ...). Calls may
//! block; callers apply their own timeout policy around them.

use std::collections::BTreeSet;

use thiserror::Error;

use wardgate_core::UserId;

use crate::roles::Group;
use crate::{Credential, PasswordError, PasswordValue};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("identity store unavailable: {0}")]
    Unavailable(String),
}

/// Owner of users, credentials and the RBAC graph.
pub trait IdentityStore: Send + Sync {
    fn find_by_login(&self, login: &str) -> Result<Option<Credential>, StoreError>;

    fn find_by_user(&self, user_id: UserId) -> Result<Option<Credential>, StoreError>;

    /// Live status check used by renforced authorization.
    fn is_enabled_and_not_blocked(&self, user_id: UserId) -> Result<bool, StoreError>;

    /// Groups the user belongs to, each with its roles, rights and contexts.
    fn groups_of(&self, user_id: UserId) -> Result<Vec<Group>, StoreError>;

    /// Persist a new credential. Fails with `Conflict` when the login is taken.
    fn create_credential(&self, credential: Credential) -> Result<(), StoreError>;

    /// Replace the password hash and clear `must_change_password`. Other
    /// fields are left as stored.
    fn update_password(&self, user_id: UserId, password_hash: &str) -> Result<(), StoreError>;

    /// Enrol a second factor unless one is already enrolled. Returns `false`
    /// when the credential already had a secret; nothing is written then.
    /// Check and write must be atomic.
    fn set_second_factor(
        &self,
        user_id: UserId,
        secret: &str,
        backup_codes: &BTreeSet<String>,
    ) -> Result<bool, StoreError>;

    /// Clear the TOTP secret and every backup code.
    fn clear_second_factor(&self, user_id: UserId) -> Result<(), StoreError>;

    /// Remove `code` from the stored backup codes. Returns `true` only for
    /// the caller that actually removed it; check and removal must be atomic.
    fn consume_backup_code(&self, user_id: UserId, code: &str) -> Result<bool, StoreError>;

    /// Increment and return the failed-logon counter.
    fn record_failed_logon(&self, user_id: UserId) -> Result<u32, StoreError>;

    fn reset_logon_trials(&self, user_id: UserId) -> Result<(), StoreError>;
}

/// Storage hashing scheme (bcrypt, argon2, ...), chosen by the deployment.
pub trait PasswordHasher: Send + Sync {
    fn hash(&self, password: &PasswordValue) -> Result<String, PasswordError>;

    /// Must compare in constant time with respect to the hash content.
    fn verify(&self, password: &PasswordValue, stored_hash: &str) -> bool;
}
