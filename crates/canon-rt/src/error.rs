//! Runtime error kinds.
//!
//! Errors are `Clone` because failures are memoized: a failed class
//! constructor, vtable build or dictionary slot reports the same error to
//! every later caller.

use std::sync::Arc;

use canon_types::CatalogError;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum RuntimeError {
    /// A covariant array address or store rejected by the array's actual
    /// element type.
    #[error("array element type mismatch: expected `{expected}`, the array holds `{actual}`")]
    ArrayElementTypeMismatch { expected: String, actual: String },

    /// The class constructor of `ty` failed; reported to every accessor.
    #[error("the type initializer for `{ty}` threw: {cause}")]
    TypeInitialization { ty: String, cause: Arc<RuntimeError> },

    /// A dictionary slot could not be resolved because a dependency was never
    /// tracked or retained. Always a defect in the tracking, not user input.
    #[error("missing dictionary slot dependency: {origin} slot {slot}: {detail}")]
    MissingDictionarySlotDependency {
        origin: String,
        slot: usize,
        detail: String,
    },

    /// Shared code asked for an exact type argument but was invoked
    /// without a dictionary.
    #[error("{method} has no generic context to supply {requested}")]
    MissingGenericContext { method: String, requested: String },

    #[error("unsupported constructed type `{ty}`: {reason}")]
    UnsupportedConstructedType { ty: String, reason: String },

    #[error("construction cycle detected while building {0}")]
    ConstructionCycle(String),

    #[error("null reference: {0}")]
    NullReference(String),

    #[error("index {index} is out of range for length {length}")]
    IndexOutOfRange { index: usize, length: usize },

    #[error("cannot cast `{from}` to `{to}`")]
    InvalidCast { from: String, to: String },

    #[error("method not found: {0}")]
    MissingMethod(String),

    #[error("type `{owner}` has no field `{name}`")]
    MissingField { owner: String, name: String },

    #[error("no code registered for {0}")]
    MissingCode(String),

    #[error("`{ty}` does not implement `{interface}::{method}`")]
    MissingInterfaceImplementation {
        ty: String,
        interface: String,
        method: String,
    },

    #[error("{method} expects {expected} argument(s), got {found}")]
    ArgumentCount {
        method: String,
        expected: usize,
        found: usize,
    },

    #[error("argument {index} of {method} must be `{expected}`, got `{found}`")]
    ArgumentType {
        method: String,
        index: usize,
        expected: String,
        found: String,
    },

    #[error("{0} requires a target instance")]
    TargetRequired(String),

    #[error("{0} contains unbound generic parameters")]
    OpenGeneric(String),

    #[error("dictionary slot {slot} holds a {found} handle, expected {expected}")]
    SlotKind {
        slot: usize,
        expected: &'static str,
        found: &'static str,
    },

    #[error("invalid catalog: {}", join_catalog_errors(.0))]
    Catalog(Vec<CatalogError>),

    /// Raised by a method body.
    #[error("{0}")]
    Thrown(String),
}

fn join_catalog_errors(errors: &[CatalogError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl RuntimeError {
    pub fn thrown(message: impl Into<String>) -> Self {
        RuntimeError::Thrown(message.into())
    }

    pub fn invalid_cast(from: impl Into<String>, to: impl Into<String>) -> Self {
        RuntimeError::InvalidCast {
            from: from.into(),
            to: to.into(),
        }
    }

    /// The failure underneath any `TypeInitialization` wrappers.
    pub fn root_cause(&self) -> &RuntimeError {
        match self {
            RuntimeError::TypeInitialization { cause, .. } => cause.root_cause(),
            other => other,
        }
    }
}

impl From<CatalogError> for RuntimeError {
    fn from(e: CatalogError) -> Self {
        RuntimeError::Catalog(vec![e])
    }
}

pub type RtResult<T> = Result<T, RuntimeError>;
