//! Time-based one-time passwords (RFC 6238) and single-use backup codes.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use rand::Rng;
use rand::rngs::OsRng;
use thiserror::Error;
use totp_rs::{Algorithm, Secret, TOTP};

use crate::Credential;
use crate::config::AuthConfig;

const DIGITS: usize = 6;
const BACKUP_CODE_SPACE: u32 = 1_000_000;
/// Upper bound on generated backup codes; keeps generation finite.
pub const MAX_BACKUP_CODES: usize = 1_000;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TotpError {
    #[error("invalid second-factor code")]
    BadCode,

    #[error("second factor is not enrolled")]
    NotEnrolled,

    #[error("second factor is already enrolled")]
    AlreadyEnrolled,

    #[error("{requested} backup codes requested, at most {max} allowed")]
    TooManyBackupCodes { requested: usize, max: usize },

    #[error("TOTP secret is not valid base32")]
    InvalidSecret,

    #[error("failed to render QR code: {0}")]
    QrCode(String),
}

/// How a second-factor check was satisfied.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum SecondFactor {
    Code,
    BackupCode,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TotpEngine {
    step_secs: u64,
    drift_secs: u64,
}

impl TotpEngine {
    pub fn new(step_secs: u64, drift_secs: u64) -> Self {
        Self {
            step_secs: step_secs.max(1),
            drift_secs,
        }
    }

    pub fn from_config(config: &AuthConfig) -> Self {
        Self::new(
            u64::try_from(config.totp_step.num_seconds()).unwrap_or(30),
            u64::try_from(config.totp_drift.num_seconds()).unwrap_or(0),
        )
    }

    /// Fresh random secret, base32 encoded.
    pub fn make_secret(&self) -> Result<String, TotpError> {
        let bytes = Secret::generate_secret()
            .to_bytes()
            .map_err(|_| TotpError::InvalidSecret)?;
        Ok(self.totp(bytes).get_secret_base32())
    }

    pub fn make_uri(&self, secret: &str, login: &str, domain: &str) -> String {
        format!("otpauth://totp/{login}@{domain}?secret={secret}")
    }

    /// PNG of the QR code for `uri`, base64 encoded.
    pub fn make_qr_code(&self, uri: &str) -> Result<String, TotpError> {
        totp_rs::qrcodegen_image::draw_base64(uri).map_err(TotpError::QrCode)
    }

    /// `count` distinct six-digit codes. More than [`MAX_BACKUP_CODES`] is
    /// refused.
    pub fn make_backup_codes(&self, count: usize) -> Result<BTreeSet<String>, TotpError> {
        if count > MAX_BACKUP_CODES {
            return Err(TotpError::TooManyBackupCodes {
                requested: count,
                max: MAX_BACKUP_CODES,
            });
        }
        let mut codes = BTreeSet::new();
        while codes.len() < count {
            let n = OsRng.gen_range(0..BACKUP_CODE_SPACE);
            codes.insert(format!("{n:0width$}", width = DIGITS));
        }
        Ok(codes)
    }

    /// Code valid for the time step containing `at`.
    pub fn code_at(&self, secret: &str, at: DateTime<Utc>) -> Result<String, TotpError> {
        Ok(self.totp(decode_secret(secret)?).generate(unix_secs(at)))
    }

    /// Whether `code` matches `secret` for any step within the drift window
    /// around `now`.
    pub fn verify_at(
        &self,
        secret: &str,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<bool, TotpError> {
        let totp = self.totp(decode_secret(secret)?);
        let code = code.trim();
        let now = unix_secs(now);

        let steps = self.drift_secs.div_ceil(self.step_secs);
        let first = now.saturating_sub(steps * self.step_secs);
        let last = now.saturating_add(steps * self.step_secs);

        let mut t = first;
        while t <= last {
            if totp.check(code, t) {
                return Ok(true);
            }
            t += self.step_secs;
        }
        Ok(false)
    }

    pub fn check_code(
        &self,
        credential: &mut Credential,
        code: &str,
    ) -> Result<SecondFactor, TotpError> {
        self.check_code_at(credential, code, Utc::now())
    }

    /// Accept a current TOTP code, or consume a matching backup code.
    ///
    /// A consumed backup code is removed from `credential` only. Persisting
    /// the removal is up to the caller, through
    /// [`IdentityStore::consume_backup_code`](crate::IdentityStore::consume_backup_code).
    pub fn check_code_at(
        &self,
        credential: &mut Credential,
        code: &str,
        now: DateTime<Utc>,
    ) -> Result<SecondFactor, TotpError> {
        let secret = credential
            .totp_secret
            .as_deref()
            .ok_or(TotpError::NotEnrolled)?;

        if self.verify_at(secret, code, now)? {
            return Ok(SecondFactor::Code);
        }
        if credential.backup_codes.remove(code.trim()) {
            tracing::warn!(
                user_id = %credential.user_id,
                remaining = credential.backup_codes.len(),
                "backup code consumed"
            );
            return Ok(SecondFactor::BackupCode);
        }
        Err(TotpError::BadCode)
    }

    /// Clear secret and backup codes; later logins skip the second factor.
    pub fn remove_totp(&self, credential: &mut Credential) {
        credential.totp_secret = None;
        credential.backup_codes.clear();
    }

    fn totp(&self, secret: Vec<u8>) -> TOTP {
        TOTP::new_unchecked(
            Algorithm::SHA1,
            DIGITS,
            0,
            self.step_secs,
            secret,
            None,
            String::new(),
        )
    }
}

impl Default for TotpEngine {
    fn default() -> Self {
        Self::from_config(&AuthConfig::default())
    }
}

fn decode_secret(secret: &str) -> Result<Vec<u8>, TotpError> {
    let normalized: String = secret
        .chars()
        .filter(|c| !c.is_whitespace())
        .map(|c| c.to_ascii_uppercase())
        .collect();
    let bytes = Secret::Encoded(normalized)
        .to_bytes()
        .map_err(|_| TotpError::InvalidSecret)?;
    if bytes.is_empty() {
        return Err(TotpError::InvalidSecret);
    }
    Ok(bytes)
}

fn unix_secs(at: DateTime<Utc>) -> u64 {
    u64::try_from(at.timestamp()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use wardgate_core::UserId;

    fn enrolled(engine: &TotpEngine) -> Credential {
        let mut cred = Credential::new(UserId::new(), "alice", "hash");
        cred.totp_secret = Some(engine.make_secret().unwrap());
        cred
    }

    #[test]
    fn secret_is_base32() {
        let secret = TotpEngine::default().make_secret().unwrap();
        assert!(secret.len() >= 26);
        assert!(secret.chars().all(|c| c.is_ascii_uppercase() || ('2'..='7').contains(&c)));
    }

    #[test]
    fn secret_decoding_is_case_insensitive() {
        let engine = TotpEngine::default();
        let secret = engine.make_secret().unwrap();
        let now = Utc::now();
        assert_eq!(
            engine.code_at(&secret, now).unwrap(),
            engine.code_at(&secret.to_lowercase(), now).unwrap()
        );
        assert_eq!(engine.code_at("not base32!", now), Err(TotpError::InvalidSecret));
    }

    #[test]
    fn uri_format() {
        let engine = TotpEngine::default();
        assert_eq!(
            engine.make_uri("JBSWY3DPEHPK3PXP", "alice", "example.org"),
            "otpauth://totp/alice@example.org?secret=JBSWY3DPEHPK3PXP"
        );
    }

    #[test]
    fn qr_code_is_base64() {
        let engine = TotpEngine::default();
        let qr = engine
            .make_qr_code("otpauth://totp/alice@example.org?secret=JBSWY3DPEHPK3PXP")
            .unwrap();
        assert!(!qr.is_empty());
        assert!(qr
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '/' || c == '='));
    }

    #[test]
    fn same_instant_same_code_two_steps_differ() {
        let engine = TotpEngine::new(30, 30);
        let secret = engine.make_secret().unwrap();
        let t0 = DateTime::from_timestamp(1_700_000_010, 0).unwrap();

        let a = engine.code_at(&secret, t0).unwrap();
        let b = engine.code_at(&secret, t0).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 6);

        let later = engine.code_at(&secret, t0 + Duration::seconds(60)).unwrap();
        assert_ne!(a, later);
    }

    #[test]
    fn codes_inside_drift_window_are_accepted() {
        let engine = TotpEngine::new(30, 60);
        let secret = engine.make_secret().unwrap();
        let now = DateTime::from_timestamp(1_700_000_015, 0).unwrap();

        for offset in [-60, -30, 0, 30, 60] {
            let code = engine
                .code_at(&secret, now + Duration::seconds(offset))
                .unwrap();
            assert!(engine.verify_at(&secret, &code, now).unwrap(), "offset {offset}");
        }

        let stale = engine
            .code_at(&secret, now - Duration::seconds(300))
            .unwrap();
        let window: Vec<String> = (-2..=2)
            .map(|k| engine.code_at(&secret, now + Duration::seconds(30 * k)).unwrap())
            .collect();
        if !window.contains(&stale) {
            assert!(!engine.verify_at(&secret, &stale, now).unwrap());
        }
    }

    #[test]
    fn random_codes_are_rejected() {
        let engine = TotpEngine::default();
        let mut cred = enrolled(&engine);
        let now = Utc::now();
        let secret = cred.totp_secret.clone().unwrap();
        let valid: BTreeSet<String> = (-1..=1)
            .map(|k| engine.code_at(&secret, now + Duration::seconds(30 * k)).unwrap())
            .collect();

        let mut checked = 0;
        while checked < 500 {
            let code = format!("{:06}", OsRng.gen_range(0..1_000_000u32));
            if valid.contains(&code) {
                continue;
            }
            assert_eq!(
                engine.check_code_at(&mut cred, &code, now),
                Err(TotpError::BadCode)
            );
            checked += 1;
        }
    }

    #[test]
    fn backup_codes_are_single_use() {
        let engine = TotpEngine::default();
        let mut cred = enrolled(&engine);
        let secret = cred.totp_secret.clone().unwrap();
        let now = Utc::now();

        // Drop the rare code that collides with a live TOTP code.
        cred.backup_codes = engine.make_backup_codes(10).unwrap();
        cred.backup_codes
            .retain(|c| !engine.verify_at(&secret, c, now).unwrap());
        assert!(!cred.backup_codes.is_empty());

        let codes: Vec<String> = cred.backup_codes.iter().cloned().collect();
        for code in &codes {
            assert_eq!(
                engine.check_code_at(&mut cred, code, now),
                Ok(SecondFactor::BackupCode)
            );
        }
        assert!(cred.backup_codes.is_empty());

        for code in &codes {
            assert_eq!(
                engine.check_code_at(&mut cred, code, now),
                Err(TotpError::BadCode)
            );
        }
    }

    #[test]
    fn backup_codes_are_six_digits_and_unique() {
        let codes = TotpEngine::default().make_backup_codes(50).unwrap();
        assert_eq!(codes.len(), 50);
        assert!(codes.iter().all(|c| c.len() == 6 && c.chars().all(|d| d.is_ascii_digit())));
    }

    #[test]
    fn oversized_backup_code_batches_are_refused() {
        let engine = TotpEngine::default();
        assert_eq!(
            engine.make_backup_codes(MAX_BACKUP_CODES + 1),
            Err(TotpError::TooManyBackupCodes {
                requested: MAX_BACKUP_CODES + 1,
                max: MAX_BACKUP_CODES
            })
        );
        assert_eq!(engine.make_backup_codes(0).unwrap().len(), 0);
    }

    #[test]
    fn not_enrolled_and_removal() {
        let engine = TotpEngine::default();
        let mut cred = enrolled(&engine);
        cred.backup_codes = engine.make_backup_codes(3).unwrap();

        engine.remove_totp(&mut cred);
        assert!(!cred.has_totp());
        assert!(cred.backup_codes.is_empty());
        assert_eq!(
            engine.check_code(&mut cred, "123456"),
            Err(TotpError::NotEnrolled)
        );
    }
}
