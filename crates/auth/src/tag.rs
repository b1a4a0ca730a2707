use std::borrow::Cow;

use serde::{Deserialize, Serialize};

/// Canonical permission tag.
///
/// A tag names one granted Right of one Role, optionally scoped by a Context:
/// `role:right` or `role:right:context`. Each component is escaped (`%` as
/// `%25`, `:` as `%3A`) before joining, so distinct (role, right, context)
/// triples never produce the same tag.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Tag(Cow<'static, str>);

impl Tag {
    /// Wrap an already-canonical tag string (as declared by an endpoint).
    pub fn new(tag: impl Into<Cow<'static, str>>) -> Self {
        Self(tag.into())
    }

    /// Tag granted by `right` of `role`.
    pub fn for_right(role: &str, right: &str) -> Self {
        Self(Cow::Owned(format!("{}:{}", escape(role), escape(right))))
    }

    /// Tag granted by `right` of `role`, narrowed to `context`.
    pub fn for_context(role: &str, right: &str, context: &str) -> Self {
        Self(Cow::Owned(format!(
            "{}:{}:{}",
            escape(role),
            escape(right),
            escape(context)
        )))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this tag carries a context component.
    pub fn is_scoped(&self) -> bool {
        self.0.matches(':').count() == 2
    }
}

impl core::fmt::Display for Tag {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&'static str> for Tag {
    fn from(value: &'static str) -> Self {
        Self::new(value)
    }
}

fn escape(component: &str) -> Cow<'_, str> {
    if component.contains(['%', ':']) {
        Cow::Owned(component.replace('%', "%25").replace(':', "%3A"))
    } else {
        Cow::Borrowed(component)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_forms() {
        assert_eq!(Tag::for_right("billing", "read").as_str(), "billing:read");
        assert_eq!(
            Tag::for_context("billing", "read", "eu").as_str(),
            "billing:read:eu"
        );
        assert!(!Tag::for_right("billing", "read").is_scoped());
        assert!(Tag::for_context("billing", "read", "eu").is_scoped());
    }

    #[test]
    fn separators_inside_names_cannot_collide() {
        let a = Tag::for_context("a", "b", "c");
        let b = Tag::for_right("a", "b:c");
        let c = Tag::for_right("a:b", "c");
        assert_ne!(a, b);
        assert_ne!(a, c);
        assert_ne!(b, c);
        assert_eq!(b.as_str(), "a:b%3Ac");
        assert_eq!(Tag::for_right("100%", "x").as_str(), "100%25:x");
    }

    #[test]
    fn declared_tags_equal_derived_ones() {
        assert_eq!(Tag::from("ops:deploy"), Tag::for_right("ops", "deploy"));
    }
}
