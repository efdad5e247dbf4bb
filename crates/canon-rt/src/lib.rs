//! Runtime for shared generic code.
//!
//! Reference-type instantiations of a generic definition share one compiled
//! body; value-type instantiations get their own. Shared bodies recover
//! their exact instantiation through a generic dictionary. Everything
//! instantiation-specific is built lazily, once, and thread-safely:
//!
//! - [`types`]: type loading, identity, assignability and layouts
//! - [`dictionary`]: generic dictionaries and lazy slot resolution
//! - [`vtable`] / [`interface`]: virtual and interface dispatch
//! - [`statics`]: per-instantiation (thread-)static storage and class constructors
//! - [`binder`]: bound invocations (delegates)
//! - [`reflect`]: reflection and late-bound invocation
//! - [`constrained`]: constrained calls and unboxing stubs
//! - [`array`]: arrays with covariance checks
//!
//! Method bodies are Rust closures registered through [`RuntimeBuilder`].

pub mod array;
pub mod binder;
pub mod code;
pub mod config;
pub mod constrained;
pub mod dictionary;
pub mod error;
pub mod interface;
pub mod memo;
pub mod reflect;
pub mod runtime;
pub mod statics;
pub mod types;
pub mod value;
pub mod vtable;

pub use binder::BoundInvocation;
pub use code::{CodeFn, CompiledMethod, Frame, MethodInst};
pub use config::RuntimeConfig;
pub use constrained::{ConstrainedCall, UnboxingStub};
pub use dictionary::{DictionaryOwner, FieldHandle, GenericDictionary, RuntimeHandle};
pub use error::{RtResult, RuntimeError};
pub use interface::{InterfaceEntry, InterfaceMap};
pub use reflect::MethodInfo;
pub use runtime::{Runtime, RuntimeBuilder};
pub use statics::{InitState, StaticStorageBlock};
pub use types::{FieldLayout, RuntimeType, TypeCategory, TypeHandle, TypeId, TypeLayout};
pub use value::{ArrayData, HeapData, Location, ObjectRef, StructValue, Value};
pub use vtable::{SlotTarget, VTable};
