use std::collections::BTreeSet;

use serde::Serialize;

use wardgate_core::UserId;

use crate::Tag;
use crate::claims::SessionRights;

/// An authenticated caller as established for one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Principal {
    pub user_id: UserId,
    pub tags: BTreeSet<Tag>,
    /// The session token arrived in a cookie rather than a bearer header.
    pub from_cookie: bool,
}

impl Principal {
    pub fn has_tag(&self, tag: &Tag) -> bool {
        self.tags.contains(tag)
    }

    /// Every tag of `group` is held.
    pub fn satisfies(&self, group: &BTreeSet<Tag>) -> bool {
        group.is_subset(&self.tags)
    }
}

impl From<SessionRights> for Principal {
    fn from(rights: SessionRights) -> Self {
        Self {
            user_id: rights.user_id,
            tags: rights.tags,
            from_cookie: rights.from_cookie,
        }
    }
}

/// Who a request runs as once it has been allowed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Access {
    Anonymous,
    Authenticated(Principal),
}

impl Access {
    pub fn principal(&self) -> Option<&Principal> {
        match self {
            Access::Anonymous => None,
            Access::Authenticated(p) => Some(p),
        }
    }

    pub fn user_id(&self) -> Option<UserId> {
        self.principal().map(|p| p.user_id)
    }
}
