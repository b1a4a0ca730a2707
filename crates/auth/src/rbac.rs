//! Effective tag derivation.

use std::collections::BTreeSet;
use std::net::IpAddr;
use std::sync::Arc;

use wardgate_core::UserId;

use crate::roles::Group;
use crate::store::{IdentityStore, StoreError};
use crate::Tag;

/// Derives a user's effective tag set from the RBAC graph.
///
/// Read-only; no caching (callers may cache externally).
#[derive(Clone)]
pub struct RbacEvaluator {
    store: Arc<dyn IdentityStore>,
}

impl RbacEvaluator {
    pub fn new(store: Arc<dyn IdentityStore>) -> Self {
        Self { store }
    }

    /// Union of every tag reachable from `user_id` through Group → Role →
    /// Right (→ Context), skipping roles whose client-address restriction does
    /// not admit `caller`.
    pub fn effective_tags(
        &self,
        user_id: UserId,
        caller: Option<IpAddr>,
    ) -> Result<BTreeSet<Tag>, StoreError> {
        let groups = self.store.groups_of(user_id)?;
        Ok(tags_from_groups(&groups, caller))
    }
}

impl core::fmt::Debug for RbacEvaluator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RbacEvaluator").finish_non_exhaustive()
    }
}

/// Pure traversal behind [`RbacEvaluator::effective_tags`].
pub fn tags_from_groups(groups: &[Group], caller: Option<IpAddr>) -> BTreeSet<Tag> {
    let mut tags = BTreeSet::new();
    for role in groups.iter().flat_map(|g| g.roles.iter()) {
        if !role.admits(caller) {
            tracing::debug!(
                role = %role.name,
                restriction = ?role.only_for_client_ip,
                "role skipped: client address restriction not met"
            );
            continue;
        }
        if let Err(err) = role.validate() {
            tracing::warn!(role = %role.name, error = %err, "role skipped: malformed definition");
            continue;
        }
        tags.extend(role.tags());
    }
    tags
}
