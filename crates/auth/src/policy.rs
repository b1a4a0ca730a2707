//! Password complexity policy.
//!
//! Pure and side-effect free: judges a [`PasswordValue`] against length, a
//! dictionary of trivially guessable passwords, character-class diversity and
//! a list of disallowed terms (logins, e-mail addresses, company names...).

use std::collections::BTreeSet;

use thiserror::Error;

use crate::PasswordValue;
use crate::config::AuthConfig;

/// Length demanded in strong mode when no explicit threshold is configured.
pub const DEFAULT_STRONG_LENGTH: usize = 12;

/// Disallowed-term comparisons ignore segments shorter than this.
const MIN_SEGMENT_LEN: usize = 4;

const SEPARATORS: &[char] = &['@', '.', '-', '_', '+', ',', ';', ':', '/', '\\', ' '];

/// Passwords rejected whatever their length (compared lowercase, also after
/// stripping trailing digits and symbols).
const STUPID_PASSWORDS: &[&str] = &[
    "password", "passw0rd", "motdepasse", "azerty", "qwerty", "qwertz", "letmein", "welcome",
    "admin", "administrator", "iloveyou", "monkey", "dragon", "football", "baseball", "master",
    "sunshine", "princess", "trustno1", "abc123", "changeme", "secret", "root", "toor", "test",
    "guest", "default", "login", "user", "superman", "starwars", "whatever", "hello",
];

const KEYBOARD_ROWS: &[&str] = &[
    "qwertyuiop", "asdfghjkl", "zxcvbnm", "azertyuiop", "qsdfghjklm", "wxcvbn", "qwertzuiop",
    "yxcvbnm", "1234567890",
];

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PasswordComplexity {
    #[error("password is too short")]
    TooShort,

    #[error("password is too simple")]
    TooSimple,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PasswordPolicy {
    pub min_length: usize,
    pub strong_mode: bool,
    pub strong_length: usize,
    pub disallowed_terms: Vec<String>,
}

impl PasswordPolicy {
    pub fn new(min_length: usize) -> Self {
        Self {
            min_length,
            strong_mode: false,
            strong_length: DEFAULT_STRONG_LENGTH,
            disallowed_terms: Vec::new(),
        }
    }

    pub fn from_config(config: &AuthConfig) -> Self {
        Self {
            min_length: config.password_min_length,
            strong_mode: config.password_strong_mode,
            strong_length: config.password_strong_length,
            disallowed_terms: config.disallowed_terms.clone(),
        }
    }

    pub fn with_strong_mode(mut self, strong: bool) -> Self {
        self.strong_mode = strong;
        self
    }

    pub fn with_disallowed_terms(mut self, terms: impl IntoIterator<Item = String>) -> Self {
        self.disallowed_terms.extend(terms);
        self
    }

    /// Judge `password` against this policy plus request-specific terms
    /// (typically the user's own login).
    ///
    /// A consumed password has no live characters and is reported `TooShort`.
    pub fn check(
        &self,
        password: &PasswordValue,
        extra_terms: &[&str],
    ) -> Result<(), PasswordComplexity> {
        password
            .with_chars(|chars| self.check_chars(chars, extra_terms))
            .unwrap_or(Err(PasswordComplexity::TooShort))
    }

    fn check_chars(&self, chars: &[char], extra_terms: &[&str]) -> Result<(), PasswordComplexity> {
        let trimmed = trim(chars);
        if trimmed.len() < self.min_length {
            return Err(PasswordComplexity::TooShort);
        }

        let lower: Vec<char> = trimmed.iter().flat_map(|c| c.to_lowercase()).collect();
        if is_stupid(&lower) {
            return Err(PasswordComplexity::TooSimple);
        }

        let classes = character_classes(trimmed);
        if self.strong_mode {
            let distinct = trimmed.iter().collect::<BTreeSet<_>>().len();
            if classes < 3 || trimmed.len() < self.strong_length || distinct * 2 < trimmed.len() {
                return Err(PasswordComplexity::TooSimple);
            }
        } else if classes < 2 {
            return Err(PasswordComplexity::TooSimple);
        }

        let compact: String = chars.iter().filter(|c| !c.is_whitespace()).collect();
        let terms = self
            .disallowed_terms
            .iter()
            .map(String::as_str)
            .chain(extra_terms.iter().copied());
        for term in terms {
            if collides_with_term(&compact, term) {
                return Err(PasswordComplexity::TooSimple);
            }
        }

        Ok(())
    }
}

/// One-shot form of [`PasswordPolicy::check`].
pub fn check_complexity(
    password: &PasswordValue,
    min_length: usize,
    strong_mode: bool,
    disallowed_terms: &[&str],
) -> Result<(), PasswordComplexity> {
    PasswordPolicy::new(min_length)
        .with_strong_mode(strong_mode)
        .check(password, disallowed_terms)
}

fn trim(chars: &[char]) -> &[char] {
    let start = chars.iter().position(|c| !c.is_whitespace());
    let end = chars.iter().rposition(|c| !c.is_whitespace());
    match (start, end) {
        (Some(start), Some(end)) => &chars[start..=end],
        _ => &[],
    }
}

fn character_classes(chars: &[char]) -> usize {
    let lower = chars.iter().any(|c| c.is_lowercase());
    let upper = chars.iter().any(|c| c.is_uppercase());
    let digit = chars.iter().any(|c| c.is_numeric());
    let symbol = chars
        .iter()
        .any(|c| !c.is_alphanumeric() && !c.is_whitespace());
    [lower, upper, digit, symbol].iter().filter(|b| **b).count()
}

fn is_stupid(lower: &[char]) -> bool {
    let text: String = lower.iter().collect();
    let stripped = text.trim_end_matches(|c: char| !c.is_alphabetic());
    if STUPID_PASSWORDS
        .iter()
        .any(|word| *word == text || *word == stripped)
    {
        return true;
    }

    is_run(lower) || is_keyboard_walk(&text) || is_repetition(lower)
}

/// "aaaa", "abcd", "4321": every step moves by the same -1, 0 or +1.
fn is_run(chars: &[char]) -> bool {
    if chars.len() < 3 {
        return false;
    }
    let delta = |pair: &[char]| pair[1] as i64 - pair[0] as i64;
    let first = delta(&chars[..2]);
    (-1..=1).contains(&first) && chars.windows(2).all(|pair| delta(pair) == first)
}

fn is_keyboard_walk(text: &str) -> bool {
    if text.chars().count() < MIN_SEGMENT_LEN {
        return false;
    }
    KEYBOARD_ROWS.iter().any(|row| {
        let reversed: String = row.chars().rev().collect();
        row.contains(text) || reversed.contains(text)
    })
}

/// "abab", "123123": the whole password repeats a shorter unit.
fn is_repetition(chars: &[char]) -> bool {
    let len = chars.len();
    (1..=len / 2)
        .filter(|unit| len % unit == 0)
        .any(|unit| chars.chunks(unit).all(|chunk| chunk == &chars[..unit]))
}

fn collides_with_term(password: &str, term: &str) -> bool {
    let password_segments = segments(password);
    let term_segments = segments(term);
    password_segments.iter().any(|p| {
        term_segments
            .iter()
            .any(|t| p.contains(t.as_str()) || t.contains(p.as_str()))
    })
}

/// Every contiguous run of separator-delimited pieces of `value`, lowercased,
/// keeping only runs holding at least [`MIN_SEGMENT_LEN`] non-separator
/// characters. Separators inside a run do not count towards its length.
///
/// `"john.doe@acme.io"` yields `"john"`, `"john.doe"`, `"john.doe@acme"`,
/// `"doe@acme"`, `"acme"`, ... and the whole value.
fn segments(value: &str) -> BTreeSet<String> {
    let chars: Vec<char> = value.trim().chars().flat_map(|c| c.to_lowercase()).collect();

    let mut pieces: Vec<(usize, usize)> = Vec::new();
    let mut start = None;
    for (idx, c) in chars.iter().enumerate() {
        match (SEPARATORS.contains(c), start) {
            (true, Some(s)) => {
                pieces.push((s, idx));
                start = None;
            }
            (false, None) => start = Some(idx),
            _ => {}
        }
    }
    if let Some(s) = start {
        pieces.push((s, chars.len()));
    }

    let mut out = BTreeSet::new();
    for (i, (first, _)) in pieces.iter().enumerate() {
        let mut letters = 0;
        for (start, last) in &pieces[i..] {
            letters += last - start;
            if letters >= MIN_SEGMENT_LEN {
                out.insert(chars[*first..*last].iter().collect());
            }
        }
    }
    out
}
