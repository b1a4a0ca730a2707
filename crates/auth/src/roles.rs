//! Read-only view of the role-based access control graph.
//!
//! `User ⇄ Group ⇄ Role → Right → Context`. The graph is owned and persisted by
//! the identity store; this crate only reads the slice reachable from one user.

use std::borrow::Cow;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use wardgate_core::{DomainError, DomainResult};

use crate::Tag;

/// Scope narrowing a right for endpoints that match contextually.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Context(Cow<'static, str>);

impl Context {
    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Right {
    pub name: String,
    #[serde(default)]
    pub contexts: Vec<Context>,
}

impl Right {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            contexts: Vec::new(),
        }
    }

    pub fn with_context(mut self, context: impl Into<Cow<'static, str>>) -> Self {
        self.contexts.push(Context::new(context));
        self
    }
}

/// Role identifier used for RBAC, with its rights.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub name: String,
    /// When set, the role only applies to callers connecting from this address.
    #[serde(default)]
    pub only_for_client_ip: Option<String>,
    #[serde(default)]
    pub rights: Vec<Right>,
}

impl Role {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            only_for_client_ip: None,
            rights: Vec::new(),
        }
    }

    pub fn with_right(mut self, right: Right) -> Self {
        self.rights.push(right);
        self
    }

    pub fn restricted_to(mut self, client_ip: impl Into<String>) -> Self {
        self.only_for_client_ip = Some(client_ip.into());
        self
    }

    /// Whether the address restriction (if any) admits `caller`.
    ///
    /// An unparsable restriction or an unknown caller address never matches.
    pub fn admits(&self, caller: Option<IpAddr>) -> bool {
        match &self.only_for_client_ip {
            None => true,
            Some(restriction) => match (restriction.trim().parse::<IpAddr>(), caller) {
                (Ok(allowed), Some(caller)) => allowed.to_canonical() == caller.to_canonical(),
                _ => false,
            },
        }
    }

    /// Every tag this role grants, unscoped and per context.
    pub fn tags(&self) -> impl Iterator<Item = Tag> + '_ {
        self.rights.iter().flat_map(move |right| {
            std::iter::once(Tag::for_right(&self.name, &right.name)).chain(
                right
                    .contexts
                    .iter()
                    .map(move |ctx| Tag::for_context(&self.name, &right.name, ctx.as_str())),
            )
        })
    }

    /// Names must be non-empty and unique per scope (rights within a role,
    /// contexts within a right).
    pub fn validate(&self) -> DomainResult<()> {
        if self.name.trim().is_empty() {
            return Err(DomainError::validation("role name cannot be empty"));
        }
        let mut seen = std::collections::HashSet::new();
        for right in &self.rights {
            if right.name.trim().is_empty() {
                return Err(DomainError::validation(format!(
                    "role '{}' has a right with an empty name",
                    self.name
                )));
            }
            if !seen.insert(right.name.as_str()) {
                return Err(DomainError::invariant(format!(
                    "duplicate right '{}' in role '{}'",
                    right.name, self.name
                )));
            }
            let mut contexts = std::collections::HashSet::new();
            if let Some(dup) = right.contexts.iter().find(|c| !contexts.insert(c.as_str())) {
                return Err(DomainError::invariant(format!(
                    "duplicate context '{}' in right '{}'",
                    dup.as_str(),
                    right.name
                )));
            }
        }
        Ok(())
    }
}

impl core::fmt::Display for Role {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub name: String,
    #[serde(default)]
    pub roles: Vec<Role>,
}

impl Group {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            roles: Vec::new(),
        }
    }

    pub fn with_role(mut self, role: Role) -> Self {
        self.roles.push(role);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_tags_include_context_scoped_ones() {
        let role = Role::new("billing")
            .with_right(Right::new("read").with_context("eu").with_context("us"))
            .with_right(Right::new("refund"));

        let tags: Vec<String> = role.tags().map(|t| t.to_string()).collect();
        assert_eq!(
            tags,
            vec!["billing:read", "billing:read:eu", "billing:read:us", "billing:refund"]
        );
    }

    #[test]
    fn address_restriction() {
        let open = Role::new("ops");
        let pinned = Role::new("ops").restricted_to("10.0.0.7");
        let broken = Role::new("ops").restricted_to("not-an-ip");

        let caller: IpAddr = "10.0.0.7".parse().unwrap();
        let other: IpAddr = "10.0.0.8".parse().unwrap();

        assert!(open.admits(None));
        assert!(pinned.admits(Some(caller)));
        assert!(!pinned.admits(Some(other)));
        assert!(!pinned.admits(None));
        assert!(!broken.admits(Some(caller)));
    }

    #[test]
    fn validate_rejects_duplicates() {
        let role = Role::new("ops")
            .with_right(Right::new("deploy"))
            .with_right(Right::new("deploy"));
        assert!(matches!(role.validate(), Err(DomainError::InvariantViolation(_))));

        let role = Role::new("ops").with_right(Right::new("deploy").with_context("a").with_context("a"));
        assert!(role.validate().is_err());

        assert!(matches!(Role::new(" ").validate(), Err(DomainError::Validation(_))));
        assert!(Role::new("ops").with_right(Right::new("deploy")).validate().is_ok());
    }
}
