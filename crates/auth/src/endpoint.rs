//! Per-endpoint security descriptor.
//!
//! Built once when routes are registered and handed to the
//! [`SessionAuthorizer`](crate::SessionAuthorizer) on every request. Nothing
//! here is looked up at request time.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::Tag;
use crate::audit::{AuditEvent, AuditKind};

/// Who an endpoint is meant for.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointStyle {
    /// Machine-oriented API; session cookies are never accepted.
    Rest,
    /// Browser-facing pages and forms; cookies accepted for GET and POST.
    Classic,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointSecurity {
    pub style: EndpointStyle,

    /// Any valid session passes, whatever its tags.
    pub require_any_auth: bool,

    /// Alternatives: the principal must hold every tag of at least one group.
    pub requirement_groups: Vec<BTreeSet<Tag>>,

    /// Re-check account status and live rights instead of trusting the token.
    pub require_renforce_check: bool,

    pub audit: Vec<AuditEvent>,
}

impl EndpointSecurity {
    /// Unprotected endpoint of the given style.
    pub fn public(style: EndpointStyle) -> Self {
        Self {
            style,
            require_any_auth: false,
            requirement_groups: Vec::new(),
            require_renforce_check: false,
            audit: Vec::new(),
        }
    }

    pub fn rest() -> Self {
        Self::public(EndpointStyle::Rest)
    }

    pub fn classic() -> Self {
        Self::public(EndpointStyle::Classic)
    }

    pub fn with_any_auth(mut self) -> Self {
        self.require_any_auth = true;
        self
    }

    /// Add one requirement group (AND within, OR with the other groups).
    pub fn require_all<I, T>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<Tag>,
    {
        self.requirement_groups
            .push(tags.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_renforce_check(mut self) -> Self {
        self.require_renforce_check = true;
        self
    }

    pub fn with_audit(mut self, label: impl Into<String>, kind: AuditKind) -> Self {
        self.audit.push(AuditEvent::new(label, kind));
        self
    }

    /// Whether a request without any session must be turned away.
    pub fn requires_auth(&self) -> bool {
        self.require_any_auth || self.require_renforce_check || !self.requirement_groups.is_empty()
    }

    pub fn is_rest(&self) -> bool {
        self.style == EndpointStyle::Rest
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn public_endpoints_require_nothing() {
        assert!(!EndpointSecurity::rest().requires_auth());
        assert!(!EndpointSecurity::classic().requires_auth());
    }

    #[test]
    fn any_declaration_requires_auth() {
        assert!(EndpointSecurity::rest().with_any_auth().requires_auth());
        assert!(EndpointSecurity::rest().require_all(["A"]).requires_auth());
        assert!(EndpointSecurity::classic().with_renforce_check().requires_auth());
    }

    #[test]
    fn groups_accumulate() {
        let ep = EndpointSecurity::rest().require_all(["A", "B"]).require_all(["C"]);
        assert_eq!(ep.requirement_groups.len(), 2);
        assert!(ep.requirement_groups[0].contains(&Tag::from("B")));
    }
}
