//! Login and credential lifecycle orchestration.
//!
//! Thin glue over the collaborators: the [`IdentityStore`] owns the data, the
//! [`PasswordHasher`] owns the hashing scheme, and this module sequences them
//! with the password policy, the second factor and the token codec. Every
//! [`PasswordValue`] handed in is wiped before the call returns, whatever the
//! outcome.

use std::collections::BTreeSet;
use std::net::IpAddr;
use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;

use wardgate_core::UserId;

use crate::claims::{TokenRejected, TotpSetup};
use crate::config::AuthConfig;
use crate::policy::{PasswordComplexity, PasswordPolicy};
use crate::rbac::RbacEvaluator;
use crate::store::{IdentityStore, PasswordHasher, StoreError};
use crate::token::{TokenCodec, TokenIssueError};
use crate::totp::{SecondFactor, TotpEngine, TotpError};
use crate::{Credential, PasswordError, PasswordValue, Tag};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LoginError {
    #[error("invalid login or password")]
    InvalidCredentials,

    #[error("account is disabled or blocked")]
    AccountDisabled,

    #[error("second factor required")]
    SecondFactorRequired,

    #[error(transparent)]
    Totp(#[from] TotpError),

    #[error("failed to issue token: {0}")]
    Token(#[from] TokenIssueError),

    #[error("setup token rejected: {0}")]
    SetupToken(#[from] TokenRejected),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Complexity(#[from] PasswordComplexity),

    #[error(transparent)]
    Password(#[from] PasswordError),
}

pub struct LoginRequest {
    pub login: String,
    pub password: PasswordValue,
    /// TOTP or backup code, when the user has a second factor enrolled.
    pub second_factor: Option<String>,
}

impl LoginRequest {
    pub fn new(login: impl Into<String>, password: PasswordValue) -> Self {
        Self {
            login: login.into(),
            password,
            second_factor: None,
        }
    }

    pub fn with_second_factor(mut self, code: impl Into<String>) -> Self {
        self.second_factor = Some(code.into());
        self
    }
}

impl core::fmt::Debug for LoginRequest {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LoginRequest")
            .field("login", &self.login)
            .field("password", &self.password)
            .field("second_factor", &self.second_factor.as_ref().map(|_| "******"))
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginSuccess {
    pub user_id: UserId,
    /// Signed session token.
    pub token: String,
    pub tags: BTreeSet<Tag>,
    pub must_change_password: bool,
    pub second_factor: Option<SecondFactor>,
}

/// Material shown to the user while enrolling a second factor.
#[derive(Clone, PartialEq, Eq)]
pub struct TotpEnrolment {
    pub secret: String,
    pub uri: String,
    /// Base64 PNG of `uri`.
    pub qr_code: String,
    pub backup_codes: BTreeSet<String>,
    /// Signed `TotpSetup` token, handed back on confirmation.
    pub setup_token: String,
}

impl core::fmt::Debug for TotpEnrolment {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TotpEnrolment")
            .field("backup_codes", &self.backup_codes.len())
            .finish_non_exhaustive()
    }
}

#[derive(Clone)]
pub struct Authenticator {
    store: Arc<dyn IdentityStore>,
    hasher: Arc<dyn PasswordHasher>,
    codec: TokenCodec,
    rbac: RbacEvaluator,
    totp: TotpEngine,
    policy: PasswordPolicy,
    config: AuthConfig,
}

impl Authenticator {
    pub fn new(
        config: AuthConfig,
        codec: TokenCodec,
        store: Arc<dyn IdentityStore>,
        hasher: Arc<dyn PasswordHasher>,
    ) -> Self {
        Self {
            rbac: RbacEvaluator::new(Arc::clone(&store)),
            totp: TotpEngine::from_config(&config),
            policy: PasswordPolicy::from_config(&config),
            store,
            hasher,
            codec,
            config,
        }
    }

    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    pub fn totp(&self) -> &TotpEngine {
        &self.totp
    }

    pub fn policy(&self) -> &PasswordPolicy {
        &self.policy
    }

    // ─────────────────────────────────────────────────────────────
    // Login
    // ─────────────────────────────────────────────────────────────

    /// Check credentials (and second factor) and issue a session token.
    pub fn login(
        &self,
        request: LoginRequest,
        caller: Option<IpAddr>,
    ) -> Result<LoginSuccess, LoginError> {
        let LoginRequest {
            login,
            mut password,
            second_factor,
        } = request;

        let result = self.login_inner(&login, &password, second_factor.as_deref(), caller);
        password.reset();

        if let Err(err) = &result {
            tracing::warn!(login = %login, error = %err, "login failed");
        }
        result
    }

    fn login_inner(
        &self,
        login: &str,
        password: &PasswordValue,
        second_factor: Option<&str>,
        caller: Option<IpAddr>,
    ) -> Result<LoginSuccess, LoginError> {
        let Some(mut credential) = self.store.find_by_login(login)? else {
            // Same hashing work as a known login.
            let _ = self.hasher.hash(password);
            return Err(LoginError::InvalidCredentials);
        };
        let user_id = credential.user_id;

        if !self.hasher.verify(password, &credential.password_hash) {
            let trials = self.store.record_failed_logon(user_id)?;
            tracing::debug!(user_id = %user_id, trials, "password mismatch");
            return Err(LoginError::InvalidCredentials);
        }

        // Account status is reported only after a correct password.
        if !credential.enabled || !self.store.is_enabled_and_not_blocked(user_id)? {
            return Err(LoginError::AccountDisabled);
        }

        let used_factor = if credential.has_totp() {
            let code = second_factor.ok_or(LoginError::SecondFactorRequired)?;
            Some(self.check_second_factor(&mut credential, code)?)
        } else {
            None
        };

        self.store.reset_logon_trials(user_id)?;

        let tags = self.rbac.effective_tags(user_id, caller)?;
        let bound_host = if self.config.bind_session_to_client {
            caller.map(|ip| ip.to_string())
        } else {
            None
        };
        let token = self.codec.issue_session(user_id, tags.clone(), bound_host)?;

        tracing::info!(
            user_id = %user_id,
            second_factor = ?used_factor,
            tags = tags.len(),
            "login succeeded"
        );

        Ok(LoginSuccess {
            user_id,
            token,
            tags,
            must_change_password: credential.must_change_password,
            second_factor: used_factor,
        })
    }

    fn check_second_factor(
        &self,
        credential: &mut Credential,
        code: &str,
    ) -> Result<SecondFactor, LoginError> {
        let user_id = credential.user_id;
        let outcome = match self.totp.check_code(credential, code) {
            // Only the request that removes the code from the store wins it.
            Ok(SecondFactor::BackupCode) => {
                if self.store.consume_backup_code(user_id, code.trim())? {
                    Ok(SecondFactor::BackupCode)
                } else {
                    Err(TotpError::BadCode)
                }
            }
            other => other,
        };

        if outcome.is_err() {
            self.store.record_failed_logon(user_id)?;
        }
        outcome.map_err(LoginError::from)
    }

    // ─────────────────────────────────────────────────────────────
    // Credential lifecycle
    // ─────────────────────────────────────────────────────────────

    /// Register a new login. The password must pass the complexity policy,
    /// with the login itself as a disallowed term.
    pub fn create_user(
        &self,
        login: &str,
        mut password: PasswordValue,
    ) -> Result<UserId, LoginError> {
        let result = self.create_user_inner(login, &password);
        password.reset();
        result
    }

    fn create_user_inner(&self, login: &str, password: &PasswordValue) -> Result<UserId, LoginError> {
        self.policy.check(password, &[login])?;
        let hash = self.hasher.hash(password)?;

        let user_id = UserId::new();
        self.store
            .create_credential(Credential::new(user_id, login, hash))?;
        tracing::info!(user_id = %user_id, login = %login, "user created");
        Ok(user_id)
    }

    pub fn change_password(
        &self,
        user_id: UserId,
        mut current: PasswordValue,
        mut new: PasswordValue,
    ) -> Result<(), LoginError> {
        let result = self.change_password_inner(user_id, &current, &new);
        current.reset();
        new.reset();
        result
    }

    fn change_password_inner(
        &self,
        user_id: UserId,
        current: &PasswordValue,
        new: &PasswordValue,
    ) -> Result<(), LoginError> {
        let credential = self.credential(user_id)?;

        if !self.hasher.verify(current, &credential.password_hash) {
            self.store.record_failed_logon(user_id)?;
            return Err(LoginError::InvalidCredentials);
        }

        self.policy.check(new, &[credential.login.as_str()])?;
        let hash = self.hasher.hash(new)?;
        self.store.update_password(user_id, &hash)?;

        tracing::info!(user_id = %user_id, "password changed");
        Ok(())
    }

    /// Administrative reset of the failed-logon counter.
    pub fn reset_logon_trials(&self, user_id: UserId) -> Result<(), LoginError> {
        self.store.reset_logon_trials(user_id)?;
        tracing::info!(user_id = %user_id, "logon trials reset");
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────
    // Second factor enrolment
    // ─────────────────────────────────────────────────────────────

    /// Generate a secret and backup codes. Nothing is stored until
    /// [`confirm_totp_setup`](Self::confirm_totp_setup) succeeds.
    pub fn begin_totp_setup(&self, user_id: UserId) -> Result<TotpEnrolment, LoginError> {
        let credential = self.credential(user_id)?;
        if credential.has_totp() {
            return Err(TotpError::AlreadyEnrolled.into());
        }

        let secret = self.totp.make_secret()?;
        let backup_codes = self.totp.make_backup_codes(self.config.backup_code_count)?;
        let uri = self
            .totp
            .make_uri(&secret, &credential.login, &self.config.totp_domain);
        let qr_code = self.totp.make_qr_code(&uri)?;
        let setup_token = self.codec.issue_totp_setup(TotpSetup {
            user_id,
            secret: secret.clone(),
            backup_codes: backup_codes.clone(),
        })?;

        Ok(TotpEnrolment {
            secret,
            uri,
            qr_code,
            backup_codes,
            setup_token,
        })
    }

    /// Store the pending secret once the user proves their device has it.
    ///
    /// Refused with [`TotpError::AlreadyEnrolled`] while a second factor is
    /// enrolled, so a replayed setup token cannot restore consumed backup
    /// codes.
    pub fn confirm_totp_setup(
        &self,
        user_id: UserId,
        setup_token: &str,
        code: &str,
    ) -> Result<(), LoginError> {
        let setup = self.codec.verify_totp_setup(setup_token, user_id)?;
        if !self.totp.verify_at(&setup.secret, code, Utc::now())? {
            return Err(TotpError::BadCode.into());
        }

        if !self
            .store
            .set_second_factor(user_id, &setup.secret, &setup.backup_codes)?
        {
            tracing::warn!(user_id = %user_id, "setup token replayed on enrolled account");
            return Err(TotpError::AlreadyEnrolled.into());
        }

        tracing::info!(user_id = %user_id, "second factor enrolled");
        Ok(())
    }

    pub fn remove_totp(&self, user_id: UserId) -> Result<(), LoginError> {
        self.store.clear_second_factor(user_id)?;

        tracing::info!(user_id = %user_id, "second factor removed");
        Ok(())
    }

    fn credential(&self, user_id: UserId) -> Result<Credential, LoginError> {
        self.store
            .find_by_user(user_id)?
            .ok_or(LoginError::Store(StoreError::NotFound))
    }
}

impl core::fmt::Debug for Authenticator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Authenticator")
            .field("codec", &self.codec)
            .field("totp", &self.totp)
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
