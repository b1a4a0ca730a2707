//! Per-request authorization decision.
//!
//! A request walks a fixed sequence of stages; each one either advances or
//! terminates the walk with a denial. There is no backtracking:
//!
//! ```text
//! NoIdentity → TokenResolved → TokenVerified → HostChecked
//!            → VerbPolicyChecked → [RenforcedChecked] → TagsChecked → Allowed
//! ```
//!
//! The authorizer performs no I/O of its own beyond the [`IdentityStore`]
//! (renforced checks) and the [`HostResolver`] (session host binding). Side
//! effects for the web layer (cookie deletion, redirect hint) are returned as
//! instructions in the [`Decision`].

use std::collections::BTreeSet;
use std::net::{IpAddr, ToSocketAddrs};
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use wardgate_core::UserId;

use crate::Tag;
use crate::audit::{AuditBuckets, AuditSink};
use crate::claims::{SessionRights, TokenRejected};
use crate::endpoint::{EndpointSecurity, EndpointStyle};
use crate::principal::{Access, Principal};
use crate::rbac::RbacEvaluator;
use crate::store::IdentityStore;
use crate::token::TokenCodec;

const BEARER_SCHEME: &str = "Bearer";

/// Verbs a cookie-carried session may use on classic endpoints.
const COOKIE_VERBS: &[&str] = &["GET", "POST"];

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UnauthorizedReason {
    #[error("no session token")]
    MissingToken,

    #[error(transparent)]
    Token(#[from] TokenRejected),

    #[error("session of user {user_id} is bound to host {host}")]
    HostMismatch { host: String, user_id: UserId },

    #[error("cookie sessions are not accepted on REST endpoints")]
    CookieOnRestEndpoint,

    #[error("account is disabled or blocked")]
    AccountDisabled,

    #[error("identity store unavailable")]
    IdentityUnavailable,
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ForbiddenReason {
    #[error("no requirement group is satisfied")]
    MissingTags,

    #[error("rights lost since token issuance: {0:?}")]
    RightsLost(Vec<Tag>),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BadRequestReason {
    #[error("verb {0} is not allowed with a cookie session")]
    CookieVerb(String),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("unauthorized: {0}")]
    Unauthorized(UnauthorizedReason),

    #[error("forbidden: {0}")]
    Forbidden(ForbiddenReason),

    #[error("bad request: {0}")]
    BadRequest(BadRequestReason),
}

impl From<UnauthorizedReason> for AuthzError {
    fn from(reason: UnauthorizedReason) -> Self {
        AuthzError::Unauthorized(reason)
    }
}

impl From<TokenRejected> for AuthzError {
    fn from(reason: TokenRejected) -> Self {
        AuthzError::Unauthorized(UnauthorizedReason::Token(reason))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Request and decision
// ─────────────────────────────────────────────────────────────────────────────

/// Credential carriers and request facts, as extracted by the web layer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestContext {
    /// Raw `Authorization` header value.
    pub authorization: Option<String>,
    /// Session token carried by the dedicated cookie.
    pub session_cookie: Option<String>,
    /// Pending "redirect after login" path.
    pub redirect_cookie: Option<String>,
    pub method: String,
    pub path: String,
    pub caller_addr: Option<IpAddr>,
}

impl RequestContext {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn with_authorization(mut self, header: impl Into<String>) -> Self {
        self.authorization = Some(header.into());
        self
    }

    pub fn with_bearer(self, token: &str) -> Self {
        self.with_authorization(format!("{BEARER_SCHEME} {token}"))
    }

    pub fn with_session_cookie(mut self, token: impl Into<String>) -> Self {
        self.session_cookie = Some(token.into());
        self
    }

    pub fn with_redirect_cookie(mut self, path: impl Into<String>) -> Self {
        self.redirect_cookie = Some(path.into());
        self
    }

    pub fn from_addr(mut self, addr: IpAddr) -> Self {
        self.caller_addr = Some(addr);
        self
    }
}

/// Last stage a request reached.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthzStage {
    NoIdentity,
    TokenResolved,
    TokenVerified,
    HostChecked,
    VerbPolicyChecked,
    RenforcedChecked,
    TagsChecked,
}

/// Instruction for the web layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SideEffect {
    DeleteSessionCookie,
    /// Remember this path to return to after login.
    SetRedirectHint(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub outcome: Result<Access, AuthzError>,
    pub stage: AuthzStage,
    pub effects: Vec<SideEffect>,
    /// Pending redirect path from the request, exposed on success only.
    pub redirect_hint: Option<String>,
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn principal(&self) -> Option<&Principal> {
        self.outcome.as_ref().ok().and_then(Access::principal)
    }

    pub fn error(&self) -> Option<&AuthzError> {
        self.outcome.as_ref().err()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Host resolution
// ─────────────────────────────────────────────────────────────────────────────

/// Turns the host a session is bound to into network addresses.
pub trait HostResolver: Send + Sync {
    fn resolve(&self, host: &str) -> Result<Vec<IpAddr>, String>;
}

/// Address literals are parsed directly; names go through the system resolver.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemResolver;

impl HostResolver for SystemResolver {
    fn resolve(&self, host: &str) -> Result<Vec<IpAddr>, String> {
        if let Ok(ip) = host.trim().parse::<IpAddr>() {
            return Ok(vec![ip]);
        }
        (host.trim(), 0)
            .to_socket_addrs()
            .map(|addrs| addrs.map(|a| a.ip()).collect())
            .map_err(|e| e.to_string())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Authorizer
// ─────────────────────────────────────────────────────────────────────────────

struct Candidate<'r> {
    token: &'r str,
    from_cookie: bool,
}

#[derive(Clone)]
pub struct SessionAuthorizer {
    codec: TokenCodec,
    store: Arc<dyn IdentityStore>,
    rbac: RbacEvaluator,
    resolver: Arc<dyn HostResolver>,
}

impl SessionAuthorizer {
    pub fn new(codec: TokenCodec, store: Arc<dyn IdentityStore>) -> Self {
        Self {
            codec,
            rbac: RbacEvaluator::new(Arc::clone(&store)),
            store,
            resolver: Arc::new(SystemResolver),
        }
    }

    pub fn with_resolver(mut self, resolver: Arc<dyn HostResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Decide whether `request` may reach an endpoint declared as `endpoint`.
    pub fn authorize(&self, endpoint: &EndpointSecurity, request: &RequestContext) -> Decision {
        let mut stage = AuthzStage::NoIdentity;
        let mut effects = Vec::new();

        let outcome = self.decide(endpoint, request, &mut stage, &mut effects);

        let redirect_hint = match &outcome {
            Ok(_) => request.redirect_cookie.clone().filter(|p| !p.is_empty()),
            Err(AuthzError::Unauthorized(_))
                if endpoint.style == EndpointStyle::Classic
                    && request.method.eq_ignore_ascii_case("GET") =>
            {
                effects.push(SideEffect::SetRedirectHint(request.path.clone()));
                None
            }
            Err(_) => None,
        };

        if let Err(err) = &outcome {
            tracing::debug!(
                method = %request.method,
                path = %request.path,
                stage = ?stage,
                error = %err,
                "request denied"
            );
        }

        Decision {
            outcome,
            stage,
            effects,
            redirect_hint,
        }
    }

    fn decide(
        &self,
        endpoint: &EndpointSecurity,
        request: &RequestContext,
        stage: &mut AuthzStage,
        effects: &mut Vec<SideEffect>,
    ) -> Result<Access, AuthzError> {
        let Some(candidate) = resolve_candidate(request) else {
            if endpoint.requires_auth() {
                return Err(UnauthorizedReason::MissingToken.into());
            }
            return Ok(Access::Anonymous);
        };
        *stage = AuthzStage::TokenResolved;

        let mut rights = self.codec.verify_session(candidate.token)?;
        rights.from_cookie = candidate.from_cookie;
        *stage = AuthzStage::TokenVerified;

        self.check_host(&rights, request.caller_addr)?;
        *stage = AuthzStage::HostChecked;

        check_cookie_policy(endpoint, request, &rights, effects)?;
        *stage = AuthzStage::VerbPolicyChecked;

        if endpoint.require_renforce_check {
            self.renforced_check(&rights, request.caller_addr)?;
            *stage = AuthzStage::RenforcedChecked;
        }

        let principal = Principal::from(rights);
        check_tags(endpoint, &principal)?;
        *stage = AuthzStage::TagsChecked;

        Ok(Access::Authenticated(principal))
    }

    fn check_host(
        &self,
        rights: &SessionRights,
        caller: Option<IpAddr>,
    ) -> Result<(), UnauthorizedReason> {
        let Some(host) = rights.only_for_host.as_deref() else {
            return Ok(());
        };

        let mismatch = || {
            tracing::warn!(
                host = %host,
                user_id = %rights.user_id,
                caller = ?caller,
                "session used from a host it is not bound to"
            );
            UnauthorizedReason::HostMismatch {
                host: host.to_string(),
                user_id: rights.user_id,
            }
        };

        let caller = caller.ok_or_else(mismatch)?.to_canonical();
        let bound = self.resolver.resolve(host).map_err(|_| mismatch())?;
        if bound.iter().any(|ip| ip.to_canonical() == caller) {
            Ok(())
        } else {
            Err(mismatch())
        }
    }

    fn renforced_check(
        &self,
        rights: &SessionRights,
        caller: Option<IpAddr>,
    ) -> Result<(), AuthzError> {
        let enabled = self
            .store
            .is_enabled_and_not_blocked(rights.user_id)
            .map_err(|e| {
                tracing::warn!(user_id = %rights.user_id, error = %e, "renforced status check failed");
                UnauthorizedReason::IdentityUnavailable
            })?;
        if !enabled {
            tracing::warn!(user_id = %rights.user_id, "session of disabled account refused");
            return Err(UnauthorizedReason::AccountDisabled.into());
        }

        let current = self
            .rbac
            .effective_tags(rights.user_id, caller)
            .map_err(|e| {
                tracing::warn!(user_id = %rights.user_id, error = %e, "renforced rights lookup failed");
                UnauthorizedReason::IdentityUnavailable
            })?;

        let lost: Vec<Tag> = rights.tags.difference(&current).cloned().collect();
        if !lost.is_empty() {
            tracing::warn!(
                user_id = %rights.user_id,
                lost = ?lost,
                "rights lost since token issuance"
            );
            return Err(AuthzError::Forbidden(ForbiddenReason::RightsLost(lost)));
        }
        Ok(())
    }

    /// Report the endpoint's audit descriptors once the request has completed.
    pub fn notify_completion(
        &self,
        endpoint: &EndpointSecurity,
        user: Option<UserId>,
        failed: bool,
        sink: &dyn AuditSink,
    ) {
        AuditBuckets::partition(&endpoint.audit, failed).dispatch(user, sink);
    }
}

impl core::fmt::Debug for SessionAuthorizer {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SessionAuthorizer")
            .field("codec", &self.codec)
            .finish_non_exhaustive()
    }
}

/// Bearer header first. When a bearer value is present the cookie is never
/// consulted, even if the header token turns out to be invalid.
fn resolve_candidate(request: &RequestContext) -> Option<Candidate<'_>> {
    if let Some(token) = request.authorization.as_deref().and_then(bearer_value) {
        return Some(Candidate {
            token,
            from_cookie: false,
        });
    }
    request
        .session_cookie
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(|token| Candidate {
            token,
            from_cookie: true,
        })
}

/// Value of a `Bearer` authorization header (scheme matched case-insensitively).
/// An empty value still counts as present.
fn bearer_value(header: &str) -> Option<&str> {
    let header = header.trim();
    let scheme = header.get(..BEARER_SCHEME.len())?;
    if !scheme.eq_ignore_ascii_case(BEARER_SCHEME) {
        return None;
    }
    let rest = &header[BEARER_SCHEME.len()..];
    if !rest.is_empty() && !rest.starts_with(char::is_whitespace) {
        return None;
    }
    Some(rest.trim())
}

fn check_cookie_policy(
    endpoint: &EndpointSecurity,
    request: &RequestContext,
    rights: &SessionRights,
    effects: &mut Vec<SideEffect>,
) -> Result<(), AuthzError> {
    if !rights.from_cookie {
        return Ok(());
    }
    match endpoint.style {
        EndpointStyle::Rest => Err(UnauthorizedReason::CookieOnRestEndpoint.into()),
        EndpointStyle::Classic => {
            if COOKIE_VERBS
                .iter()
                .any(|verb| verb.eq_ignore_ascii_case(request.method.trim()))
            {
                return Ok(());
            }
            tracing::warn!(
                user_id = %rights.user_id,
                method = %request.method,
                path = %request.path,
                "cookie session used with a non read/submit verb"
            );
            effects.push(SideEffect::DeleteSessionCookie);
            Err(AuthzError::BadRequest(BadRequestReason::CookieVerb(
                request.method.clone(),
            )))
        }
    }
}

/// OR across requirement groups, AND within one.
fn check_tags(endpoint: &EndpointSecurity, principal: &Principal) -> Result<(), AuthzError> {
    if endpoint.requirement_groups.is_empty() {
        return Ok(());
    }
    if endpoint
        .requirement_groups
        .iter()
        .any(|group| principal.satisfies(group))
    {
        return Ok(());
    }
    tracing::debug!(
        user_id = %principal.user_id,
        missing = ?missing_tags(&endpoint.requirement_groups, &principal.tags),
        "no requirement group satisfied"
    );
    Err(AuthzError::Forbidden(ForbiddenReason::MissingTags))
}

/// Tags required by `groups` that `held` is missing, per group.
pub fn missing_tags(groups: &[BTreeSet<Tag>], held: &BTreeSet<Tag>) -> Vec<BTreeSet<Tag>> {
    groups
        .iter()
        .map(|group| group.difference(held).cloned().collect())
        .collect()
}
