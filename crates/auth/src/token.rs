//! Signed, expiring tokens.
//!
//! Wire format: `base64url(payload).base64url(mac)` where the payload is the
//! JSON envelope `{"claims": {"kind": ..}, "exp": RFC3339}` and the mac is
//! HMAC-SHA256 over the encoded payload text. Verification checks, in order:
//! shape, signature, expiry, purpose. Any failure yields a [`TokenRejected`].

use std::collections::BTreeSet;

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use rand::RngCore;
use rand::rngs::OsRng;
use secrecy::zeroize::Zeroize;
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use thiserror::Error;

use wardgate_core::UserId;

use crate::Tag;
use crate::claims::{Envelope, SessionRights, TokenClaims, TokenKind, TokenRejected, TotpSetup};
use crate::config::AuthConfig;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SigningKeyError {
    #[error("signing key must be at least {min} bytes, got {actual}")]
    TooShort { min: usize, actual: usize },

    #[error("environment variable {0} is not set")]
    Missing(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenIssueError {
    #[error("failed to encode token claims: {0}")]
    Encoding(String),

    #[error("token lifetime must be positive")]
    NonPositiveTtl,

    #[error("token expiry is out of the representable range")]
    ExpiryOutOfRange,
}

/// Process-wide HMAC key. Held only as a keyed MAC state; the raw bytes are
/// not retained.
#[derive(Clone)]
pub struct SigningKey {
    mac: HmacSha256,
}

impl SigningKey {
    pub const MIN_KEY_LENGTH: usize = 32;

    pub fn new(bytes: &[u8]) -> Result<Self, SigningKeyError> {
        if bytes.len() < Self::MIN_KEY_LENGTH {
            return Err(SigningKeyError::TooShort {
                min: Self::MIN_KEY_LENGTH,
                actual: bytes.len(),
            });
        }
        // HMAC accepts keys of any length.
        let mac = HmacSha256::new_from_slice(bytes).map_err(|_| SigningKeyError::TooShort {
            min: Self::MIN_KEY_LENGTH,
            actual: bytes.len(),
        })?;
        Ok(Self { mac })
    }

    /// Read the key material from an environment variable.
    pub fn from_env(var: &str) -> Result<Self, SigningKeyError> {
        let raw = std::env::var(var)
            .map(SecretString::from)
            .map_err(|_| SigningKeyError::Missing(var.to_string()))?;
        Self::new(raw.expose_secret().as_bytes())
    }

    /// Fresh random key, for tests and single-process deployments.
    pub fn generate() -> Result<Self, SigningKeyError> {
        let mut bytes = [0u8; Self::MIN_KEY_LENGTH];
        OsRng.fill_bytes(&mut bytes);
        let key = Self::new(&bytes);
        bytes.zeroize();
        key
    }

    fn sign(&self, data: &[u8]) -> Vec<u8> {
        let mut mac = self.mac.clone();
        mac.update(data);
        mac.finalize().into_bytes().to_vec()
    }

    /// Constant-time comparison against `signature`.
    fn verify(&self, data: &[u8], signature: &[u8]) -> bool {
        let mut mac = self.mac.clone();
        mac.update(data);
        mac.verify_slice(signature).is_ok()
    }
}

impl core::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("SigningKey(<redacted>)")
    }
}

/// Lifetimes applied by the typed issue helpers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenTtls {
    pub session: Duration,
    pub anonymous_form: Duration,
    pub user_form: Duration,
    pub totp_setup: Duration,
}

impl From<&AuthConfig> for TokenTtls {
    fn from(config: &AuthConfig) -> Self {
        Self {
            session: config.session_ttl,
            anonymous_form: config.anonymous_form_ttl,
            user_form: config.user_form_ttl,
            totp_setup: config.totp_setup_ttl,
        }
    }
}

impl Default for TokenTtls {
    fn default() -> Self {
        Self::from(&AuthConfig::default())
    }
}

#[derive(Debug, Clone)]
pub struct TokenCodec {
    key: SigningKey,
    ttls: TokenTtls,
}

impl TokenCodec {
    pub fn new(key: SigningKey, ttls: TokenTtls) -> Self {
        Self { key, ttls }
    }

    pub fn ttls(&self) -> &TokenTtls {
        &self.ttls
    }

    pub fn issue(&self, claims: &TokenClaims, ttl: Duration) -> Result<String, TokenIssueError> {
        self.issue_at(claims, ttl, Utc::now())
    }

    /// Sign `claims` so that they expire at `now + ttl`.
    pub fn issue_at(
        &self,
        claims: &TokenClaims,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Result<String, TokenIssueError> {
        if ttl <= Duration::zero() {
            return Err(TokenIssueError::NonPositiveTtl);
        }
        let exp = now
            .checked_add_signed(ttl)
            .ok_or(TokenIssueError::ExpiryOutOfRange)?;
        let envelope = Envelope {
            claims: claims.clone(),
            exp,
        };
        let json =
            serde_json::to_vec(&envelope).map_err(|e| TokenIssueError::Encoding(e.to_string()))?;

        let payload_b64 = URL_SAFE_NO_PAD.encode(json);
        let signature = self.key.sign(payload_b64.as_bytes());
        Ok(format!("{payload_b64}.{}", URL_SAFE_NO_PAD.encode(signature)))
    }

    pub fn verify(
        &self,
        token: &str,
        expected: TokenKind,
        form_name: Option<&str>,
    ) -> Result<TokenClaims, TokenRejected> {
        self.verify_at(token, expected, form_name, Utc::now())
    }

    /// Decode `token` and check it was issued for `expected` (and, for form
    /// kinds, for `form_name`), and has not expired at `now`.
    pub fn verify_at(
        &self,
        token: &str,
        expected: TokenKind,
        form_name: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<TokenClaims, TokenRejected> {
        let (payload_b64, signature_b64) =
            token.split_once('.').ok_or(TokenRejected::Malformed)?;
        if payload_b64.is_empty() || signature_b64.is_empty() || signature_b64.contains('.') {
            return Err(TokenRejected::Malformed);
        }

        let signature = URL_SAFE_NO_PAD
            .decode(signature_b64)
            .map_err(|_| TokenRejected::Malformed)?;
        if !self.key.verify(payload_b64.as_bytes(), &signature) {
            return Err(TokenRejected::Tampered);
        }

        let payload = URL_SAFE_NO_PAD
            .decode(payload_b64)
            .map_err(|_| TokenRejected::Malformed)?;
        let envelope: Envelope =
            serde_json::from_slice(&payload).map_err(|_| TokenRejected::Malformed)?;

        envelope.check_expiry(now)?;
        envelope.check_purpose(expected, form_name)?;
        Ok(envelope.claims)
    }

    // ─────────────────────────────────────────────────────────────
    // Typed helpers
    // ─────────────────────────────────────────────────────────────

    pub fn issue_session(
        &self,
        user_id: UserId,
        tags: BTreeSet<Tag>,
        only_for_host: Option<String>,
    ) -> Result<String, TokenIssueError> {
        let claims = TokenClaims::SessionRights(SessionRights {
            user_id,
            tags,
            issued_at: Utc::now(),
            only_for_host,
            from_cookie: false,
        });
        self.issue(&claims, self.ttls.session)
    }

    pub fn verify_session(&self, token: &str) -> Result<SessionRights, TokenRejected> {
        match self.verify(token, TokenKind::SessionRights, None)? {
            TokenClaims::SessionRights(rights) => Ok(rights),
            _ => Err(TokenRejected::WrongKind),
        }
    }

    /// Anti-forgery token for a form shown before login.
    pub fn issue_anonymous_form(&self, form_name: &str) -> Result<String, TokenIssueError> {
        let claims = TokenClaims::AnonymousForm {
            form_name: form_name.to_string(),
        };
        self.issue(&claims, self.ttls.anonymous_form)
    }

    pub fn verify_anonymous_form(&self, token: &str, form_name: &str) -> Result<(), TokenRejected> {
        self.verify(token, TokenKind::AnonymousForm, Some(form_name))
            .map(|_| ())
    }

    /// Anti-forgery token for a form shown to `user_id`.
    pub fn issue_user_form(
        &self,
        form_name: &str,
        user_id: UserId,
    ) -> Result<String, TokenIssueError> {
        let claims = TokenClaims::UserForm {
            form_name: form_name.to_string(),
            user_id,
        };
        self.issue(&claims, self.ttls.user_form)
    }

    /// A user form token presented by someone else is treated as issued for
    /// another purpose.
    pub fn verify_user_form(
        &self,
        token: &str,
        form_name: &str,
        user_id: UserId,
    ) -> Result<(), TokenRejected> {
        let claims = self.verify(token, TokenKind::UserForm, Some(form_name))?;
        if claims.user_id() != Some(user_id) {
            return Err(TokenRejected::WrongKind);
        }
        Ok(())
    }

    pub fn issue_totp_setup(&self, setup: TotpSetup) -> Result<String, TokenIssueError> {
        self.issue(&TokenClaims::TotpSetup(setup), self.ttls.totp_setup)
    }

    pub fn verify_totp_setup(
        &self,
        token: &str,
        user_id: UserId,
    ) -> Result<TotpSetup, TokenRejected> {
        match self.verify(token, TokenKind::TotpSetup, None)? {
            TokenClaims::TotpSetup(setup) if setup.user_id == user_id => Ok(setup),
            _ => Err(TokenRejected::WrongKind),
        }
    }
}
