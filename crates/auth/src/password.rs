//! Wipeable in-memory password holder.
//!
//! A [`PasswordValue`] owns its characters in a zeroize-on-drop buffer and can
//! be wiped explicitly with [`PasswordValue::reset`]. It never renders its
//! plaintext: `Display` and `Debug` print one mask character per original
//! character, before and after the wipe.
//!
//! The value is single-owner and single-use. A caller that has to read it from
//! two independent code paths must [`PasswordValue::duplicate`] it before the
//! first consuming call, because `reset` cannot be undone.

use core::fmt::Write as _;

use secrecy::zeroize::Zeroize;
use secrecy::{ExposeSecret, ExposeSecretMut, SecretBox, SecretString};
use thiserror::Error;

/// Character rendered in place of every password character.
pub const MASK_CHAR: char = '*';

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PasswordError {
    #[error("index {index} out of bounds for length {len}")]
    IndexOutOfBounds { index: usize, len: usize },

    #[error("password value has been consumed")]
    Consumed,
}

pub struct PasswordValue {
    buffer: SecretBox<Vec<char>>,
    original_len: usize,
    consumed: bool,
}

impl PasswordValue {
    /// Take ownership of `chars`; the vector is moved, not copied.
    pub fn from_chars(chars: Vec<char>) -> Self {
        let original_len = chars.len();
        Self {
            buffer: SecretBox::new(Box::new(chars)),
            original_len,
            consumed: false,
        }
    }

    /// Number of characters the value was created with.
    ///
    /// Still answers after [`reset`](Self::reset) so the mask keeps its width.
    pub fn len(&self) -> usize {
        self.original_len
    }

    pub fn is_empty(&self) -> bool {
        self.original_len == 0
    }

    pub fn is_consumed(&self) -> bool {
        self.consumed
    }

    pub fn char_at(&self, index: usize) -> Result<char, PasswordError> {
        let chars = self.buffer.expose_secret();
        if self.consumed {
            return Err(PasswordError::IndexOutOfBounds { index, len: 0 });
        }
        chars
            .get(index)
            .copied()
            .ok_or(PasswordError::IndexOutOfBounds {
                index,
                len: chars.len(),
            })
    }

    /// Copy `start..end` into a new, independent value.
    pub fn sub_sequence(&self, start: usize, end: usize) -> Result<PasswordValue, PasswordError> {
        if self.consumed {
            return Err(PasswordError::Consumed);
        }
        let chars = self.buffer.expose_secret();
        if start > end {
            return Err(PasswordError::IndexOutOfBounds {
                index: start,
                len: chars.len(),
            });
        }
        if end > chars.len() {
            return Err(PasswordError::IndexOutOfBounds {
                index: end,
                len: chars.len(),
            });
        }
        Ok(Self::from_chars(chars[start..end].to_vec()))
    }

    /// Clone the live buffer so a second use-site can read it after the
    /// first one wipes its copy.
    pub fn duplicate(&self) -> Result<PasswordValue, PasswordError> {
        if self.consumed {
            return Err(PasswordError::Consumed);
        }
        Ok(Self::from_chars(self.buffer.expose_secret().clone()))
    }

    /// Zero the buffer and mark the value consumed. Irreversible.
    pub fn reset(&mut self) {
        self.buffer.expose_secret_mut().zeroize();
        self.consumed = true;
    }

    /// Run `f` over the live characters.
    pub fn with_chars<R>(&self, f: impl FnOnce(&[char]) -> R) -> Result<R, PasswordError> {
        if self.consumed {
            return Err(PasswordError::Consumed);
        }
        Ok(f(self.buffer.expose_secret()))
    }

    /// Run `f` over a temporary string copy; the copy is wiped when `f` returns.
    pub fn with_str<R>(&self, f: impl FnOnce(&str) -> R) -> Result<R, PasswordError> {
        if self.consumed {
            return Err(PasswordError::Consumed);
        }
        let temp = SecretString::from(self.buffer.expose_secret().iter().collect::<String>());
        Ok(f(temp.expose_secret()))
    }

    /// Case-insensitive comparison against another live value.
    ///
    /// A consumed value never equals anything.
    pub fn eq_insensitive(&self, other: &PasswordValue) -> bool {
        if self.consumed || other.consumed {
            return false;
        }
        equals_insensitive(self.buffer.expose_secret(), other.buffer.expose_secret())
    }
}

impl From<String> for PasswordValue {
    fn from(mut value: String) -> Self {
        let chars = value.chars().collect();
        value.zeroize();
        Self::from_chars(chars)
    }
}

impl From<&str> for PasswordValue {
    fn from(value: &str) -> Self {
        Self::from_chars(value.chars().collect())
    }
}

impl core::fmt::Display for PasswordValue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        for _ in 0..self.original_len {
            f.write_char(MASK_CHAR)?;
        }
        Ok(())
    }
}

impl core::fmt::Debug for PasswordValue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "PasswordValue({self})")
    }
}

/// Compare two character sequences: length first, then case-insensitively per
/// code point.
pub fn equals_insensitive(a: &[char], b: &[char]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).all(|(x, y)| chars_match_insensitive(*x, *y))
}

fn chars_match_insensitive(x: char, y: char) -> bool {
    x == y || x.to_uppercase().eq(y.to_uppercase()) || x.to_lowercase().eq(y.to_lowercase())
}
