//! Login credential owned by a user.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use wardgate_core::UserId;

/// Everything the login flow needs to know about one user.
///
/// Persisted by the identity store. `Debug` never prints the password hash,
/// the TOTP secret or the backup codes.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub user_id: UserId,
    pub login: String,
    pub password_hash: String,
    /// Base32 TOTP secret; `None` when the second factor is not enrolled.
    pub totp_secret: Option<String>,
    pub backup_codes: BTreeSet<String>,
    pub enabled: bool,
    pub must_change_password: bool,
    pub logon_trial_count: u32,
}

impl Credential {
    pub fn new(user_id: UserId, login: impl Into<String>, password_hash: impl Into<String>) -> Self {
        Self {
            user_id,
            login: login.into(),
            password_hash: password_hash.into(),
            totp_secret: None,
            backup_codes: BTreeSet::new(),
            enabled: true,
            must_change_password: false,
            logon_trial_count: 0,
        }
    }

    /// Whether logins must pass the second factor.
    pub fn has_totp(&self) -> bool {
        self.totp_secret.is_some()
    }
}

impl core::fmt::Debug for Credential {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Credential")
            .field("user_id", &self.user_id)
            .field("login", &self.login)
            .field("totp_enrolled", &self.has_totp())
            .field("backup_codes_left", &self.backup_codes.len())
            .field("enabled", &self.enabled)
            .field("must_change_password", &self.must_change_password)
            .field("logon_trial_count", &self.logon_trial_count)
            .finish_non_exhaustive()
    }
}
