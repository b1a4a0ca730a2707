//! `wardgate-auth` — trust-boundary enforcement core.
//!
//! Signed expiring tokens, per-request authorization, RBAC tag derivation,
//! password policy and TOTP second factor. Decoupled from HTTP and storage:
//! the web layer feeds [`RequestContext`]s in and applies [`Decision`]s, and
//! persistence sits behind [`IdentityStore`].

pub mod audit;
pub mod authorize;
pub mod claims;
pub mod config;
pub mod credential;
pub mod endpoint;
pub mod login;
pub mod password;
pub mod policy;
pub mod principal;
pub mod rbac;
pub mod roles;
pub mod store;
pub mod tag;
pub mod token;
pub mod totp;

pub use audit::{AuditEvent, AuditKind, AuditSink, TracingAuditSink};
pub use authorize::{
    AuthzError, AuthzStage, BadRequestReason, Decision, ForbiddenReason, HostResolver,
    RequestContext, SessionAuthorizer, SideEffect, SystemResolver, UnauthorizedReason,
};
pub use claims::{SessionRights, TokenClaims, TokenKind, TokenRejected, TotpSetup};
pub use config::{AuthConfig, ConfigError};
pub use credential::Credential;
pub use endpoint::{EndpointSecurity, EndpointStyle};
pub use login::{Authenticator, LoginError, LoginRequest, LoginSuccess, TotpEnrolment};
pub use password::{PasswordError, PasswordValue};
pub use policy::{PasswordComplexity, PasswordPolicy, check_complexity};
pub use principal::{Access, Principal};
pub use rbac::RbacEvaluator;
pub use roles::{Context, Group, Right, Role};
pub use store::{IdentityStore, PasswordHasher, StoreError};
pub use tag::Tag;
pub use token::{SigningKey, SigningKeyError, TokenCodec, TokenIssueError, TokenTtls};
pub use totp::{SecondFactor, TotpEngine, TotpError};
