//! Configuration surface consumed by the auth core.

use std::str::FromStr;

use chrono::Duration;
use thiserror::Error;

use crate::policy::DEFAULT_STRONG_LENGTH;
use crate::totp::MAX_BACKUP_CODES;

/// Upper bound for token lifetimes read from the environment (ten years).
pub const MAX_TTL_SECS: i64 = 10 * 366 * 24 * 3600;
/// Upper bound for the TOTP step and drift read from the environment.
pub const MAX_TOTP_SECS: i64 = 3600;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {var}: {value:?}")]
    InvalidValue { var: &'static str, value: String },
}

/// Token lifetimes, TOTP parameters and password policy inputs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthConfig {
    pub session_ttl: Duration,
    pub anonymous_form_ttl: Duration,
    pub user_form_ttl: Duration,
    pub totp_setup_ttl: Duration,

    /// Length of one TOTP time step.
    pub totp_step: Duration,
    /// Tolerated clock drift on each side of "now".
    pub totp_drift: Duration,
    pub backup_code_count: usize,
    /// Domain part of the `login@domain` label in provisioning URIs.
    pub totp_domain: String,

    pub password_min_length: usize,
    pub password_strong_mode: bool,
    pub password_strong_length: usize,
    pub disallowed_terms: Vec<String>,

    /// Embed the caller address into issued session tokens.
    pub bind_session_to_client: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            session_ttl: Duration::hours(12),
            anonymous_form_ttl: Duration::minutes(30),
            user_form_ttl: Duration::minutes(30),
            totp_setup_ttl: Duration::minutes(10),
            totp_step: Duration::seconds(30),
            totp_drift: Duration::seconds(30),
            backup_code_count: 10,
            totp_domain: "localhost".to_string(),
            password_min_length: 8,
            password_strong_mode: false,
            password_strong_length: DEFAULT_STRONG_LENGTH,
            disallowed_terms: Vec::new(),
            bind_session_to_client: false,
        }
    }
}

impl AuthConfig {
    /// Defaults overridden by any `WARDGATE_*` variable present in the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| std::env::var(var).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(ttl) = parse_secs(&lookup, "WARDGATE_SESSION_TTL_SECS", 1, MAX_TTL_SECS)? {
            config.session_ttl = ttl;
        }
        if let Some(ttl) =
            parse_secs(&lookup, "WARDGATE_ANONYMOUS_FORM_TTL_SECS", 1, MAX_TTL_SECS)?
        {
            config.anonymous_form_ttl = ttl;
        }
        if let Some(ttl) = parse_secs(&lookup, "WARDGATE_USER_FORM_TTL_SECS", 1, MAX_TTL_SECS)? {
            config.user_form_ttl = ttl;
        }
        if let Some(ttl) = parse_secs(&lookup, "WARDGATE_TOTP_SETUP_TTL_SECS", 1, MAX_TTL_SECS)? {
            config.totp_setup_ttl = ttl;
        }
        if let Some(step) = parse_secs(&lookup, "WARDGATE_TOTP_STEP_SECS", 1, MAX_TOTP_SECS)? {
            config.totp_step = step;
        }
        if let Some(drift) = parse_secs(&lookup, "WARDGATE_TOTP_DRIFT_SECS", 0, MAX_TOTP_SECS)? {
            config.totp_drift = drift;
        }
        if let Some(count) = parse::<usize, _>(&lookup, "WARDGATE_BACKUP_CODE_COUNT")? {
            if count > MAX_BACKUP_CODES {
                return Err(ConfigError::InvalidValue {
                    var: "WARDGATE_BACKUP_CODE_COUNT",
                    value: count.to_string(),
                });
            }
            config.backup_code_count = count;
        }
        if let Some(domain) = lookup("WARDGATE_TOTP_DOMAIN") {
            config.totp_domain = domain;
        }
        if let Some(len) = parse(&lookup, "WARDGATE_PASSWORD_MIN_LENGTH")? {
            config.password_min_length = len;
        }
        if let Some(len) = parse(&lookup, "WARDGATE_PASSWORD_STRONG_LENGTH")? {
            config.password_strong_length = len;
        }
        if let Some(strong) = parse(&lookup, "WARDGATE_PASSWORD_STRONG")? {
            config.password_strong_mode = strong;
        }
        if let Some(terms) = lookup("WARDGATE_DISALLOWED_TERMS") {
            config.disallowed_terms = terms
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(bind) = parse(&lookup, "WARDGATE_BIND_SESSION_TO_CLIENT")? {
            config.bind_session_to_client = bind;
        }

        Ok(config)
    }

    pub fn with_session_ttl(mut self, ttl: Duration) -> Self {
        self.session_ttl = ttl;
        self
    }

    pub fn with_totp_window(mut self, step: Duration, drift: Duration) -> Self {
        self.totp_step = step;
        self.totp_drift = drift;
        self
    }

    pub fn with_backup_code_count(mut self, count: usize) -> Self {
        self.backup_code_count = count;
        self
    }

    pub fn with_password_min_length(mut self, len: usize) -> Self {
        self.password_min_length = len;
        self
    }

    pub fn with_disallowed_terms(mut self, terms: Vec<String>) -> Self {
        self.disallowed_terms = terms;
        self
    }

    pub fn with_session_binding(mut self, bind: bool) -> Self {
        self.bind_session_to_client = bind;
        self
    }
}

fn parse<T, F>(lookup: &F, var: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(var) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue { var, value: raw }),
    }
}

/// Whole seconds within `min..=max`, as a [`Duration`].
fn parse_secs<F>(
    lookup: &F,
    var: &'static str,
    min: i64,
    max: i64,
) -> Result<Option<Duration>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(secs) = parse::<i64, _>(lookup, var)? else {
        return Ok(None);
    };
    if !(min..=max).contains(&secs) {
        return Err(ConfigError::InvalidValue {
            var,
            value: secs.to_string(),
        });
    }
    Duration::try_seconds(secs)
        .map(Some)
        .ok_or_else(|| ConfigError::InvalidValue {
            var,
            value: secs.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |var| map.get(var).cloned()
    }

    #[test]
    fn defaults_without_env() {
        let config = AuthConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config, AuthConfig::default());
        assert_eq!(config.totp_step, Duration::seconds(30));
        assert_eq!(config.backup_code_count, 10);
    }

    #[test]
    fn env_overrides() {
        let config = AuthConfig::from_lookup(lookup_from(&[
            ("WARDGATE_SESSION_TTL_SECS", "600"),
            ("WARDGATE_TOTP_DRIFT_SECS", "90"),
            ("WARDGATE_PASSWORD_STRONG", "true"),
            ("WARDGATE_DISALLOWED_TERMS", "acme, wardgate ,,"),
        ]))
        .unwrap();

        assert_eq!(config.session_ttl, Duration::seconds(600));
        assert_eq!(config.totp_drift, Duration::seconds(90));
        assert!(config.password_strong_mode);
        assert_eq!(config.disallowed_terms, vec!["acme", "wardgate"]);
    }

    #[test]
    fn invalid_values_name_the_variable() {
        let err = AuthConfig::from_lookup(lookup_from(&[("WARDGATE_BACKUP_CODE_COUNT", "ten")]))
            .unwrap_err();
        assert_eq!(
            err,
            ConfigError::InvalidValue {
                var: "WARDGATE_BACKUP_CODE_COUNT",
                value: "ten".to_string()
            }
        );

        let err = AuthConfig::from_lookup(lookup_from(&[("WARDGATE_TOTP_STEP_SECS", "0")]))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { var: "WARDGATE_TOTP_STEP_SECS", .. }
        ));
    }

    #[test]
    fn out_of_range_lifetimes_are_rejected() {
        for (var, value) in [
            ("WARDGATE_SESSION_TTL_SECS", "9223372036854775807"),
            ("WARDGATE_SESSION_TTL_SECS", "-60"),
            ("WARDGATE_SESSION_TTL_SECS", "0"),
            ("WARDGATE_ANONYMOUS_FORM_TTL_SECS", "-1"),
            ("WARDGATE_USER_FORM_TTL_SECS", "100000000000000"),
            ("WARDGATE_TOTP_SETUP_TTL_SECS", "-9223372036854775808"),
            ("WARDGATE_TOTP_DRIFT_SECS", "-30"),
            ("WARDGATE_TOTP_STEP_SECS", "9223372036854775807"),
        ] {
            let err = AuthConfig::from_lookup(lookup_from(&[(var, value)])).unwrap_err();
            assert_eq!(
                err,
                ConfigError::InvalidValue {
                    var,
                    value: value.to_string()
                },
                "{var}={value}"
            );
        }

        let config =
            AuthConfig::from_lookup(lookup_from(&[("WARDGATE_TOTP_DRIFT_SECS", "0")])).unwrap();
        assert_eq!(config.totp_drift, Duration::zero());
    }

    #[test]
    fn backup_code_count_is_bounded() {
        let too_many = (MAX_BACKUP_CODES + 1).to_string();
        let err = AuthConfig::from_lookup(lookup_from(&[(
            "WARDGATE_BACKUP_CODE_COUNT",
            too_many.as_str(),
        )]))
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { var: "WARDGATE_BACKUP_CODE_COUNT", .. }
        ));

        let max = MAX_BACKUP_CODES.to_string();
        let config =
            AuthConfig::from_lookup(lookup_from(&[("WARDGATE_BACKUP_CODE_COUNT", max.as_str())]))
                .unwrap();
        assert_eq!(config.backup_code_count, MAX_BACKUP_CODES);
    }
}
