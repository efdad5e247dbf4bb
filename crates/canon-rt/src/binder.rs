//! Bound invocations (delegates).
//!
//! Binding resolves everything an invocation needs once, up front: the
//! compiled entry (possibly shared), the exact generic context and the
//! receiver. Invoking the result later needs no lookups at all, and a
//! shared entry bound for `Foo<String>` keeps behaving as `Foo<String>`.
//!
//! A value-type receiver is bound by reference when given a `Ref`;
//! otherwise the bound copy is private to the delegate and mutations made
//! through it stay inside the delegate.

use std::fmt;
use std::sync::Arc;

use tracing::trace;

use crate::code::{CompiledMethod, MethodInst};
use crate::dictionary::GenericDictionary;
use crate::error::{RtResult, RuntimeError};
use crate::runtime::Runtime;
use crate::value::{Location, Value};

pub struct BoundInvocation {
    pub target: MethodInst,
    pub code: Arc<CompiledMethod>,
    pub context: Option<Arc<GenericDictionary>>,
    /// `None` for static methods and open entry points.
    pub receiver: Option<Value>,
}

impl BoundInvocation {
    /// Invoke with the bound receiver.
    pub fn invoke(&self, rt: &Runtime, args: Vec<Value>) -> RtResult<Value> {
        let md = rt.catalog().method(self.target.method);
        if md.is_static && !md.is_class_ctor {
            rt.ensure_class_init(&self.target.owner)?;
        }
        rt.run(&self.code, &self.target, self.context.clone(), self.receiver.clone(), args)
    }

    /// Invoke an open entry point with an explicit receiver.
    pub fn invoke_with(&self, rt: &Runtime, this: Value, args: Vec<Value>) -> RtResult<Value> {
        let this = if self.target.owner.is_value_type() {
            rt.value_receiver(this)?
        } else {
            this
        };
        rt.run(&self.code, &self.target, self.context.clone(), Some(this), args)
    }

    pub fn is_shared(&self) -> bool {
        self.code.is_shared()
    }
}

impl fmt::Debug for BoundInvocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundInvocation")
            .field("target", &self.target)
            .field("shared", &self.code.is_shared())
            .field("bound", &self.receiver.is_some())
            .finish()
    }
}

impl Runtime {
    /// Bind `method` exactly (no virtual dispatch) to `receiver`.
    pub fn bind(&self, method: &MethodInst, receiver: Option<Value>) -> RtResult<BoundInvocation> {
        let md = self.catalog.method(method.method);
        let receiver = match (md.is_static, receiver) {
            (true, None) => None,
            (true, Some(_)) => {
                return Err(RuntimeError::invalid_cast(
                    "receiver",
                    format!("static method {}", self.describe_method(method)),
                ))
            }
            (false, None) => return Err(RuntimeError::TargetRequired(self.describe_method(method))),
            (false, Some(Value::Null)) => {
                return Err(RuntimeError::NullReference(format!(
                    "delegate target of {}",
                    self.describe_method(method)
                )))
            }
            (false, Some(value)) if method.owner.is_value_type() => Some(self.value_receiver(value)?),
            (false, Some(Value::Ref(loc))) => Some(loc.load()?),
            (false, Some(value)) => Some(value),
        };
        let bound = BoundInvocation {
            target: method.clone(),
            code: self.compiled(method)?,
            context: self.context_for(method)?,
            receiver,
        };
        trace!(target = %self.describe_method(method), shared = bound.is_shared(), "bound invocation");
        Ok(bound)
    }

    /// Bind the implementation `method` dispatches to on `receiver`.
    pub fn bind_virtual(&self, method: &MethodInst, receiver: Value) -> RtResult<BoundInvocation> {
        if receiver.is_null() {
            return Err(RuntimeError::NullReference(self.describe_method(method)));
        }
        let receiver_ty = self.type_of(&receiver)?;
        let target = self.resolve_virtual(method, &receiver_ty)?;
        let receiver = match receiver {
            // The delegate keeps its own copy of a boxed value.
            Value::Object(obj) if obj.is_boxed() && target.owner.is_value_type() => {
                Value::Ref(Location::local(obj.unbox()?))
            }
            other => other,
        };
        self.bind(&target, Some(receiver))
    }

    /// An unbound entry point: receiver supplied per call.
    pub fn entry_point(&self, method: &MethodInst) -> RtResult<BoundInvocation> {
        Ok(BoundInvocation {
            target: method.clone(),
            code: self.compiled(method)?,
            context: self.context_for(method)?,
            receiver: None,
        })
    }

    /// A delegate value over `method` and `receiver`.
    pub fn delegate(&self, method: &MethodInst, receiver: Option<Value>) -> RtResult<Value> {
        Ok(Value::Delegate(Arc::new(self.bind(method, receiver)?)))
    }

    /// Invoke a delegate value.
    pub fn invoke_delegate(&self, delegate: &Value, args: Vec<Value>) -> RtResult<Value> {
        match delegate {
            Value::Null => Err(RuntimeError::NullReference("delegate invocation".into())),
            other => other.as_delegate()?.invoke(self, args),
        }
    }
}
