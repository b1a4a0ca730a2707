use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use wardgate_core::UserId;

use crate::Tag;

/// Purpose a token was issued for.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenKind {
    SessionRights,
    AnonymousForm,
    UserForm,
    TotpSetup,
}

impl TokenKind {
    /// Form kinds are additionally bound to a form name.
    pub fn is_form(self) -> bool {
        matches!(self, TokenKind::AnonymousForm | TokenKind::UserForm)
    }
}

impl core::fmt::Display for TokenKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(match self {
            TokenKind::SessionRights => "session_rights",
            TokenKind::AnonymousForm => "anonymous_form",
            TokenKind::UserForm => "user_form",
            TokenKind::TotpSetup => "totp_setup",
        })
    }
}

/// Identity and rights of a logged-in user, as of issuance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionRights {
    pub user_id: UserId,
    pub tags: BTreeSet<Tag>,
    pub issued_at: DateTime<Utc>,

    /// Host or address the session is pinned to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub only_for_host: Option<String>,

    /// Set by the extractor when the token arrived in a cookie. Never part of
    /// the signed payload: a token has no notion of transport.
    #[serde(skip)]
    pub from_cookie: bool,
}

/// Pending second-factor enrolment, carried client-side until confirmed.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TotpSetup {
    pub user_id: UserId,
    pub secret: String,
    pub backup_codes: BTreeSet<String>,
}

impl core::fmt::Debug for TotpSetup {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("TotpSetup")
            .field("user_id", &self.user_id)
            .field("backup_codes", &self.backup_codes.len())
            .finish_non_exhaustive()
    }
}

/// Signed token payloads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TokenClaims {
    SessionRights(SessionRights),
    AnonymousForm { form_name: String },
    UserForm { form_name: String, user_id: UserId },
    TotpSetup(TotpSetup),
}

impl TokenClaims {
    pub fn kind(&self) -> TokenKind {
        match self {
            TokenClaims::SessionRights(_) => TokenKind::SessionRights,
            TokenClaims::AnonymousForm { .. } => TokenKind::AnonymousForm,
            TokenClaims::UserForm { .. } => TokenKind::UserForm,
            TokenClaims::TotpSetup(_) => TokenKind::TotpSetup,
        }
    }

    pub fn form_name(&self) -> Option<&str> {
        match self {
            TokenClaims::AnonymousForm { form_name } | TokenClaims::UserForm { form_name, .. } => {
                Some(form_name)
            }
            _ => None,
        }
    }

    pub fn user_id(&self) -> Option<UserId> {
        match self {
            TokenClaims::SessionRights(s) => Some(s.user_id),
            TokenClaims::UserForm { user_id, .. } => Some(*user_id),
            TokenClaims::TotpSetup(t) => Some(t.user_id),
            TokenClaims::AnonymousForm { .. } => None,
        }
    }
}

/// Why a token was refused. Verification is binary: any of these means the
/// token grants nothing.
#[derive(Debug, Error, Copy, Clone, PartialEq, Eq)]
pub enum TokenRejected {
    #[error("token has expired")]
    Expired,

    #[error("token signature does not match")]
    Tampered,

    #[error("token was issued for another purpose")]
    WrongKind,

    #[error("token is malformed")]
    Malformed,
}

/// What gets signed: the claims plus their expiration instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Envelope {
    pub claims: TokenClaims,
    pub exp: DateTime<Utc>,
}

impl Envelope {
    /// Expiry is inclusive: a token is dead at its `exp` instant.
    pub fn check_expiry(&self, now: DateTime<Utc>) -> Result<(), TokenRejected> {
        if now >= self.exp {
            return Err(TokenRejected::Expired);
        }
        Ok(())
    }

    /// Match kind, form name and (for user-bound kinds) the expected user.
    pub fn check_purpose(
        &self,
        expected: TokenKind,
        form_name: Option<&str>,
    ) -> Result<(), TokenRejected> {
        if self.claims.kind() != expected {
            return Err(TokenRejected::WrongKind);
        }
        if expected.is_form() && self.claims.form_name() != form_name {
            return Err(TokenRejected::WrongKind);
        }
        Ok(())
    }
}
