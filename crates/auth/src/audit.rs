//! Audit notifications emitted after a request completes.

use serde::{Deserialize, Serialize};

use wardgate_core::UserId;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditKind {
    /// Reported only when the request failed.
    ImportantError,
    ChangeSecurity,
    UseSecurity,
    Simple,
}

/// One audit descriptor declared by an endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub label: String,
    pub kind: AuditKind,
}

impl AuditEvent {
    pub fn new(label: impl Into<String>, kind: AuditKind) -> Self {
        Self {
            label: label.into(),
            kind,
        }
    }
}

/// External recorder of security events. Each method receives every label of
/// one bucket in a single call.
pub trait AuditSink: Send + Sync {
    fn on_important_error(&self, user: Option<UserId>, events: &[&str]);

    fn on_change_security(&self, user: Option<UserId>, events: &[&str]);

    fn on_use_security(&self, user: Option<UserId>, events: &[&str]);

    fn on_simple_event(&self, user: Option<UserId>, events: &[&str]);
}

/// Descriptors of one request split by kind.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct AuditBuckets<'a> {
    pub important_errors: Vec<&'a str>,
    pub change_security: Vec<&'a str>,
    pub use_security: Vec<&'a str>,
    pub simple: Vec<&'a str>,
}

impl<'a> AuditBuckets<'a> {
    /// Important-error descriptors are dropped when the request succeeded.
    pub fn partition(events: &'a [AuditEvent], failed: bool) -> Self {
        let mut buckets = Self::default();
        for event in events {
            let label = event.label.as_str();
            match event.kind {
                AuditKind::ImportantError if failed => buckets.important_errors.push(label),
                AuditKind::ImportantError => {}
                AuditKind::ChangeSecurity => buckets.change_security.push(label),
                AuditKind::UseSecurity => buckets.use_security.push(label),
                AuditKind::Simple => buckets.simple.push(label),
            }
        }
        buckets
    }

    pub fn is_empty(&self) -> bool {
        self.important_errors.is_empty()
            && self.change_security.is_empty()
            && self.use_security.is_empty()
            && self.simple.is_empty()
    }

    /// One sink call per non-empty bucket.
    pub fn dispatch(&self, user: Option<UserId>, sink: &dyn AuditSink) {
        if !self.important_errors.is_empty() {
            sink.on_important_error(user, &self.important_errors);
        }
        if !self.change_security.is_empty() {
            sink.on_change_security(user, &self.change_security);
        }
        if !self.use_security.is_empty() {
            sink.on_use_security(user, &self.use_security);
        }
        if !self.simple.is_empty() {
            sink.on_simple_event(user, &self.simple);
        }
    }
}

/// Writes every bucket as one structured event on the `wardgate::audit` target.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn on_important_error(&self, user: Option<UserId>, events: &[&str]) {
        tracing::error!(
            target: "wardgate::audit",
            bucket = "important_error",
            user_id = ?user,
            events = ?events,
            "audit"
        );
    }

    fn on_change_security(&self, user: Option<UserId>, events: &[&str]) {
        tracing::warn!(
            target: "wardgate::audit",
            bucket = "change_security",
            user_id = ?user,
            events = ?events,
            "audit"
        );
    }

    fn on_use_security(&self, user: Option<UserId>, events: &[&str]) {
        tracing::info!(
            target: "wardgate::audit",
            bucket = "use_security",
            user_id = ?user,
            events = ?events,
            "audit"
        );
    }

    fn on_simple_event(&self, user: Option<UserId>, events: &[&str]) {
        tracing::info!(
            target: "wardgate::audit",
            bucket = "simple",
            user_id = ?user,
            events = ?events,
            "audit"
        );
    }
}
