//! lograft builders: declared resource in, fully populated Kubernetes object out.
//!
//! Builders are pure. The same declaration always yields the same object, so labels
//! are `BTreeMap`s and environment variables are sorted by name.

#![forbid(unsafe_code)]

mod common;
pub mod elasticsearch;
pub mod fluentd;
pub mod index;
pub mod kibana;
pub mod templates;

pub use common::password_source;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BuildError {
    #[error("missing_identity: {kind} has no {field}")]
    MissingIdentity { kind: String, field: &'static str },
    #[error("role_not_declared: {0}")]
    RoleNotDeclared(lograft_core::Role),
    #[error("decode: {0}")]
    Decode(String),
}

pub type BuildResult<T> = Result<T, BuildError>;
