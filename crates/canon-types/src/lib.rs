//! Type-definition catalog for the canon shared-generics runtime.
//!
//! This crate holds everything that can be decided from definitions alone,
//! before any instantiation exists:
//!
//! - [`ty`]: type expressions (`Ty`) and substitution
//! - [`def`]: type, field and method definitions plus dictionary slot schemas
//! - [`catalog`]: the definition store and its validation
//! - [`canon`]: canonicalization of type argument lists
//! - [`layout`]: per-definition virtual slot layouts (override / hide / introduce)
//! - [`deps`]: conservative definition-level dependency graph and reachability
//! - [`syntax`]: a small text syntax for types and lookups

pub mod canon;
pub mod catalog;
pub mod def;
pub mod deps;
pub mod error;
pub mod layout;
pub mod syntax;
pub mod ty;

pub use canon::{canonical_type, canonical_type_arg, canonicalize, CanonicalForm, Instantiation};
pub use catalog::Catalog;
pub use def::{
    FieldDef, FieldRef, FieldStorage, GenericLookup, GenericParam, MethodDef, MethodRef, TypeDef,
    TypeKind, Variance, Virtuality,
};
pub use deps::{analyze, DefRef, DependencyGraph};
pub use error::CatalogError;
pub use layout::{SlotDecl, SlotLayout, SlotRelation};
pub use syntax::{parse_lookup, parse_method_ref, parse_ty, Scope};
pub use ty::{MethodDefId, Prim, Ty, TypeDefId};
