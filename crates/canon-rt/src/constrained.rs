//! Constrained calls and unboxing stubs.
//!
//! Shared code calling an interface (or virtual) method on a value of a
//! type parameter `T` does not know whether `T` is a value type. A
//! constrained call resolves that per exact `T`:
//!
//! - a value type implementing the method itself is called directly with a
//!   reference to the caller's storage, so mutations are visible;
//! - a value type inheriting the implementation is boxed first;
//! - a reference type is dispatched virtually on the loaded reference.
//!
//! Virtual calls reaching a *boxed* value type go through an
//! [`UnboxingStub`], which hands the value-type method a reference to a
//! copy of the boxed contents. Mutations made through the stub therefore do
//! not reach the box.

use std::sync::Arc;

use tracing::{debug, trace};

use crate::code::MethodInst;
use crate::error::{RtResult, RuntimeError};
use crate::runtime::Runtime;
use crate::types::TypeHandle;
use crate::value::{Location, ObjectRef, Value};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConstrainedCall {
    /// Call this exact implementation with `this` by reference.
    Direct(MethodInst),
    /// Box `this`, then dispatch this method virtually.
    Boxed(MethodInst),
    /// Load the reference, then dispatch this method virtually.
    Virtual(MethodInst),
}

impl ConstrainedCall {
    pub fn method(&self) -> &MethodInst {
        match self {
            ConstrainedCall::Direct(m) | ConstrainedCall::Boxed(m) | ConstrainedCall::Virtual(m) => m,
        }
    }
}

/// Entry point used when an interface method of a value type is reached
/// through a box.
#[derive(Debug)]
pub struct UnboxingStub {
    pub value_type: TypeHandle,
    pub interface: TypeHandle,
}

impl UnboxingStub {
    /// Call `method` on a copy of the contents of `boxed`.
    pub fn invoke(&self, rt: &Runtime, boxed: &ObjectRef, method: &MethodInst, args: Vec<Value>) -> RtResult<Value> {
        if boxed.ty() != &self.value_type || !boxed.is_boxed() {
            return Err(RuntimeError::invalid_cast(
                boxed.ty().to_string(),
                self.value_type.to_string(),
            ));
        }
        let target = rt.resolve_virtual(method, &self.value_type)?;
        let copy = Location::local(boxed.unbox()?);
        trace!(
            value_type = %self.value_type,
            target = %rt.describe_method(&target),
            "unboxing stub"
        );
        rt.invoke_method(&target, Some(Value::Ref(copy)), args)
    }
}

impl Runtime {
    /// How a call to `method` constrained to type `constrained` proceeds.
    pub fn resolve_constrained_call(
        &self,
        constrained: &TypeHandle,
        method: &MethodInst,
    ) -> RtResult<ConstrainedCall> {
        if !constrained.is_value_type() {
            return Ok(ConstrainedCall::Virtual(method.clone()));
        }
        let target = self.resolve_virtual(method, constrained)?;
        if target.owner == *constrained {
            Ok(ConstrainedCall::Direct(target))
        } else {
            Ok(ConstrainedCall::Boxed(method.clone()))
        }
    }

    /// Perform a constrained call on the value stored at `this`.
    pub fn call_constrained(
        &self,
        constrained: &TypeHandle,
        method: &MethodInst,
        this: &Location,
        args: Vec<Value>,
    ) -> RtResult<Value> {
        self.perform_constrained(&self.resolve_constrained_call(constrained, method)?, this, args)
    }

    /// Perform an already resolved constrained call (e.g. from a dictionary
    /// slot).
    pub fn perform_constrained(&self, call: &ConstrainedCall, this: &Location, args: Vec<Value>) -> RtResult<Value> {
        match call {
            ConstrainedCall::Direct(target) => {
                self.invoke_method(target, Some(Value::Ref(this.clone())), args)
            }
            ConstrainedCall::Boxed(method) => {
                let boxed = self.box_value(this.load()?)?;
                self.call_virtual(method, boxed, args)
            }
            ConstrainedCall::Virtual(method) => self.call_virtual(method, this.load()?, args),
        }
    }

    /// The stub for calling `interface` methods on boxed `value_type`.
    pub fn unboxing_stub(&self, value_type: &TypeHandle, interface: &TypeHandle) -> RtResult<Arc<UnboxingStub>> {
        self.stubs.get_or_try_init(
            &(value_type.id, interface.id),
            || format!("unboxing stub {} for {}", value_type, interface),
            || {
                if !value_type.is_value_type() {
                    return Err(RuntimeError::invalid_cast(value_type.to_string(), "value type"));
                }
                debug!(value_type = %value_type, interface = %interface, "built unboxing stub");
                Ok(Arc::new(UnboxingStub {
                    value_type: value_type.clone(),
                    interface: interface.clone(),
                }))
            },
        )
    }
}
