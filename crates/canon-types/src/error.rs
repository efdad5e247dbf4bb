//! Errors raised while building, validating or parsing against a catalog.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    #[error("type `{0}` is defined more than once")]
    DuplicateType(String),

    #[error("unknown type `{0}`")]
    UnknownType(String),

    #[error("type `{owner}` has no method `{name}`")]
    UnknownMethod { owner: String, name: String },

    #[error("type `{owner}` has no field `{name}`")]
    UnknownField { owner: String, name: String },

    #[error("`{name}` expects {expected} type argument(s), found {found}")]
    ArityMismatch {
        name: String,
        expected: usize,
        found: usize,
    },

    #[error("generic parameter !{index} is not bound in `{context}`")]
    UnboundParam { context: String, index: u16 },

    #[error("`{owner}` cannot derive from `{base}`")]
    InvalidBase { owner: String, base: String },

    #[error("inheritance cycle: {}", .0.join(" -> "))]
    BaseCycle(Vec<String>),

    #[error("`{owner}` lists `{ty}` as an interface, but it is not one")]
    NotAnInterface { owner: String, ty: String },

    #[error("variance is only allowed on interface parameters (`{0}`)")]
    VarianceOnNonInterface(String),

    #[error("`{owner}::{method}` is marked override but there is no base slot to override")]
    OverrideWithoutBase { owner: String, method: String },

    #[error("`{owner}::{method}` overrides a sealed slot")]
    OverrideOfSealed { owner: String, method: String },

    #[error("`{owner}::{method}` declares dictionary lookups but is not generic; use the type's dictionary")]
    MisplacedLookup { owner: String, method: String },

    #[error("unsupported constructed type in `{context}`: {reason}")]
    UnsupportedConstructedType { context: String, reason: String },

    #[error("cannot parse `{input}`: {message}")]
    Syntax { input: String, message: String },
}

impl CatalogError {
    pub fn syntax(input: &str, message: impl Into<String>) -> Self {
        CatalogError::Syntax {
            input: input.to_string(),
            message: message.into(),
        }
    }
}
