//! `wardgate-core` — shared building blocks for the wardgate crates.
//!
//! Pure types only (no infrastructure concerns).

pub mod error;
pub mod id;

pub use error::{DomainError, DomainResult};
pub use id::UserId;
