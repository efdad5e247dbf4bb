//! Compiled code, method instantiations and execution frames.
//!
//! Method bodies are registered per method definition as Rust closures.
//! The runtime hands each body out through a [`CompiledMethod`] that is
//! memoized per *canonical* key, so every reference-type instantiation of a
//! method shares one entry, while value-type instantiations get their own.
//! Shared bodies see their instantiation only through the generic context
//! (dictionary) passed in their [`Frame`].

use std::fmt;
use std::sync::Arc;

use canon_types::{canonical_type_arg, MethodDefId, Ty};
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::binder::BoundInvocation;
use crate::constrained::ConstrainedCall;
use crate::dictionary::{FieldHandle, GenericDictionary, RuntimeHandle};
use crate::error::{RtResult, RuntimeError};
use crate::runtime::Runtime;
use crate::statics::StaticStorageBlock;
use crate::types::{TypeHandle, TypeLayout};
use crate::value::{Location, Value};

/// A method body.
pub type CodeFn = dyn for<'a> Fn(&mut Frame<'a>) -> RtResult<Value> + Send + Sync;

pub(crate) type CodeTable = FxHashMap<MethodDefId, Arc<CodeFn>>;

// ---------------------------------------------------------------------------
// MethodInst
// ---------------------------------------------------------------------------

/// An exact method instantiation: the closed declaring type, the method
/// definition and the closed method type arguments.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct MethodInst {
    pub owner: TypeHandle,
    pub method: MethodDefId,
    pub method_args: Vec<TypeHandle>,
}

impl MethodInst {
    pub fn new(owner: TypeHandle, method: MethodDefId) -> Self {
        Self {
            owner,
            method,
            method_args: Vec::new(),
        }
    }

    pub fn generic(owner: TypeHandle, method: MethodDefId, method_args: Vec<TypeHandle>) -> Self {
        Self {
            owner,
            method,
            method_args,
        }
    }

    pub fn method_arg_tys(&self) -> Vec<Ty> {
        self.method_args.iter().map(|a| a.ty.clone()).collect()
    }
}

impl fmt::Debug for MethodInst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::#{}", self.owner, self.method.0)?;
        if !self.method_args.is_empty() {
            let args: Vec<String> = self.method_args.iter().map(|a| a.to_string()).collect();
            write!(f, "<{}>", args.join(", "))?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// CompiledMethod
// ---------------------------------------------------------------------------

/// Memoization key of compiled code: canonical owner, method, canonical
/// method arguments.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) struct CodeKey {
    owner: Ty,
    method: MethodDefId,
    method_args: Vec<Ty>,
}

pub struct CompiledMethod {
    pub def: MethodDefId,
    pub canonical_owner: Ty,
    pub canonical_args: Vec<Ty>,
    pub(crate) body: Arc<CodeFn>,
}

impl CompiledMethod {
    /// Whether this entry serves more than one instantiation.
    pub fn is_shared(&self) -> bool {
        self.canonical_owner.contains_canon() || self.canonical_args.iter().any(Ty::contains_canon)
    }
}

impl fmt::Debug for CompiledMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledMethod")
            .field("def", &self.def)
            .field("canonical_owner", &self.canonical_owner)
            .field("canonical_args", &self.canonical_args)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Frame
// ---------------------------------------------------------------------------

/// What a method body sees while it runs.
pub struct Frame<'a> {
    rt: &'a Runtime,
    code: &'a CompiledMethod,
    method: &'a MethodInst,
    context: Option<Arc<GenericDictionary>>,
    this: Option<Value>,
    args: Vec<Value>,
}

impl<'a> Frame<'a> {
    pub fn runtime(&self) -> &'a Runtime {
        self.rt
    }

    pub fn code(&self) -> &CompiledMethod {
        self.code
    }

    /// The generic context this body was entered with, if any.
    pub fn context(&self) -> Option<&Arc<GenericDictionary>> {
        self.context.as_ref()
    }

    pub fn this(&self) -> RtResult<&Value> {
        self.this
            .as_ref()
            .ok_or_else(|| RuntimeError::TargetRequired(self.rt.describe_method(self.method)))
    }

    pub fn args(&self) -> &[Value] {
        &self.args
    }

    pub fn arg(&self, index: usize) -> RtResult<Value> {
        self.args.get(index).cloned().ok_or(RuntimeError::ArgumentCount {
            method: self.rt.describe_method(self.method),
            expected: index + 1,
            found: self.args.len(),
        })
    }

    /// A by-reference argument.
    pub fn arg_ref(&self, index: usize) -> RtResult<Location> {
        Ok(self.arg(index)?.as_location()?.clone())
    }

    pub fn this_field(&self, index: usize) -> RtResult<Value> {
        self.this()?.field(index)
    }

    pub fn set_this_field(&self, index: usize, value: Value) -> RtResult<()> {
        self.this()?.set_field(index, value)
    }

    fn dictionary(&self, slot: usize) -> RtResult<&Arc<GenericDictionary>> {
        match &self.context {
            Some(dict) => Ok(dict),
            None => Err(self.rt.dependency_fault(
                &self.rt.describe_method(self.method),
                slot,
                "method has no generic context",
            )),
        }
    }

    /// Resolve dictionary slot `slot` of the current context.
    pub fn lookup(&self, slot: usize) -> RtResult<RuntimeHandle> {
        let dict = self.dictionary(slot)?;
        self.rt.resolve_slot(dict, slot)
    }

    pub fn lookup_type(&self, slot: usize) -> RtResult<TypeHandle> {
        match self.lookup(slot)? {
            RuntimeHandle::Type(t) => Ok(t),
            other => Err(slot_kind(slot, "type", &other)),
        }
    }

    pub fn lookup_method(&self, slot: usize) -> RtResult<MethodInst> {
        match self.lookup(slot)? {
            RuntimeHandle::Method(m) => Ok(m),
            other => Err(slot_kind(slot, "method", &other)),
        }
    }

    pub fn lookup_entry(&self, slot: usize) -> RtResult<Arc<BoundInvocation>> {
        match self.lookup(slot)? {
            RuntimeHandle::Entry(e) => Ok(e),
            other => Err(slot_kind(slot, "handle", &other)),
        }
    }

    pub fn lookup_constrained(&self, slot: usize) -> RtResult<ConstrainedCall> {
        match self.lookup(slot)? {
            RuntimeHandle::Constrained(c) => Ok(c),
            other => Err(slot_kind(slot, "constrained", &other)),
        }
    }

    pub fn lookup_statics(&self, slot: usize) -> RtResult<Arc<StaticStorageBlock>> {
        match self.lookup(slot)? {
            RuntimeHandle::Statics(block) => Ok(block),
            other => Err(slot_kind(slot, "statics", &other)),
        }
    }

    /// The calling thread's storage for a thread-statics slot.
    pub fn lookup_thread_statics(&self, slot: usize) -> RtResult<Arc<StaticStorageBlock>> {
        match self.lookup(slot)? {
            RuntimeHandle::ThreadStatics(ty) => self.rt.thread_static_storage(&ty),
            other => Err(slot_kind(slot, "thread-statics", &other)),
        }
    }

    pub fn lookup_field(&self, slot: usize) -> RtResult<FieldHandle> {
        match self.lookup(slot)? {
            RuntimeHandle::Field(f) => Ok(f),
            other => Err(slot_kind(slot, "field", &other)),
        }
    }

    pub fn lookup_layout(&self, slot: usize) -> RtResult<Arc<TypeLayout>> {
        match self.lookup(slot)? {
            RuntimeHandle::Layout(l) => Ok(l),
            other => Err(slot_kind(slot, "layout", &other)),
        }
    }

    /// Exact type argument `index` of the owning type, via the context.
    pub fn type_arg(&self, index: usize) -> RtResult<TypeHandle> {
        self.require_context(|| format!("type argument #{}", index))?
            .type_arg(index)
    }

    /// Exact method type argument `index`, via the context.
    pub fn method_arg(&self, index: usize) -> RtResult<TypeHandle> {
        self.require_context(|| format!("method type argument #{}", index))?
            .method_arg(index)
    }

    fn require_context(
        &self,
        requested: impl FnOnce() -> String,
    ) -> RtResult<&Arc<GenericDictionary>> {
        self.context
            .as_ref()
            .ok_or_else(|| RuntimeError::MissingGenericContext {
                method: self.rt.describe_method(self.method),
                requested: requested(),
            })
    }
}

fn slot_kind(slot: usize, expected: &'static str, found: &RuntimeHandle) -> RuntimeError {
    RuntimeError::SlotKind {
        slot,
        expected,
        found: found.kind(),
    }
}

// ---------------------------------------------------------------------------
// Runtime: compiled code and invocation
// ---------------------------------------------------------------------------

impl Runtime {
    /// The compiled entry for an instantiation, shared by every
    /// instantiation with the same canonical key.
    pub fn compiled(&self, inst: &MethodInst) -> RtResult<Arc<CompiledMethod>> {
        let key = CodeKey {
            owner: inst.owner.canonical.clone(),
            method: inst.method,
            method_args: inst
                .method_args
                .iter()
                .map(|a| canonical_type_arg(&self.catalog, &a.ty))
                .collect(),
        };
        self.compiled.get_or_try_init(
            &key,
            || format!("code for {}", self.describe_method(inst)),
            || {
                let md = self.catalog.method(inst.method);
                let body = self
                    .code
                    .get(&inst.method)
                    .cloned()
                    .filter(|_| !md.is_abstract)
                    .ok_or_else(|| RuntimeError::MissingCode(self.describe_method(inst)))?;
                let entry = CompiledMethod {
                    def: inst.method,
                    canonical_owner: key.owner.clone(),
                    canonical_args: key.method_args.clone(),
                    body,
                };
                debug!(
                    method = %self.describe_method(inst),
                    shared = entry.is_shared(),
                    "compiled method entry"
                );
                Ok(Arc::new(entry))
            },
        )
    }

    pub fn has_code(&self, method: MethodDefId) -> bool {
        self.code.contains_key(&method)
    }

    /// Run compiled code with an explicit context. Checks arity and the
    /// presence of a target.
    pub(crate) fn run(
        &self,
        code: &CompiledMethod,
        method: &MethodInst,
        context: Option<Arc<GenericDictionary>>,
        this: Option<Value>,
        args: Vec<Value>,
    ) -> RtResult<Value> {
        let md = self.catalog.method(method.method);
        if args.len() != md.params.len() {
            return Err(RuntimeError::ArgumentCount {
                method: self.describe_method(method),
                expected: md.params.len(),
                found: args.len(),
            });
        }
        if !md.is_static && this.as_ref().map_or(true, Value::is_null) {
            return Err(RuntimeError::TargetRequired(self.describe_method(method)));
        }
        let mut frame = Frame {
            rt: self,
            code,
            method,
            context,
            this,
            args,
        };
        (code.body)(&mut frame)
    }

    /// Invoke exactly `method` (no dispatch, no class-constructor check).
    pub(crate) fn invoke_method(
        &self,
        method: &MethodInst,
        this: Option<Value>,
        args: Vec<Value>,
    ) -> RtResult<Value> {
        let code = self.compiled(method)?;
        let context = self.context_for(method)?;
        self.run(&code, method, context, this, args)
    }

    /// A direct (non-virtual) call. Static calls trigger the owner's class
    /// constructor; a struct `this` is passed by reference to a private copy.
    pub fn call(&self, method: &MethodInst, this: Option<Value>, args: Vec<Value>) -> RtResult<Value> {
        let md = self.catalog.method(method.method);
        if md.is_static && !md.is_class_ctor {
            self.ensure_class_init(&method.owner)?;
        }
        let this = match this {
            Some(v) if !md.is_static && method.owner.is_value_type() => {
                Some(self.value_receiver(v)?)
            }
            other => other,
        };
        self.invoke_method(method, this, args)
    }

    /// A virtual (or interface) call dispatched on the runtime type of `this`.
    ///
    /// A boxed value type reached this way goes through its unboxing stub
    /// and therefore acts on a copy.
    pub fn call_virtual(&self, method: &MethodInst, this: Value, args: Vec<Value>) -> RtResult<Value> {
        if this.is_null() {
            return Err(RuntimeError::NullReference(self.describe_method(method)));
        }
        let receiver = self.type_of(&this)?;
        match this {
            Value::Object(obj) if obj.is_boxed() => {
                let target = self.resolve_virtual(method, &receiver)?;
                if target.owner.is_value_type() {
                    let stub = self.unboxing_stub(&receiver, &method.owner)?;
                    stub.invoke(self, &obj, method, args)
                } else {
                    self.invoke_method(&target, Some(Value::Object(obj)), args)
                }
            }
            Value::Ref(loc) => {
                let target = self.resolve_virtual(method, &receiver)?;
                let this = if target.owner.is_value_type() {
                    Value::Ref(loc)
                } else {
                    loc.load()?
                };
                self.invoke_method(&target, Some(this), args)
            }
            Value::Struct(s) => {
                let target = self.resolve_virtual(method, &receiver)?;
                self.invoke_method(&target, Some(Value::Ref(Location::local(Value::Struct(s)))), args)
            }
            other => {
                let target = self.resolve_virtual(method, &receiver)?;
                self.invoke_method(&target, Some(other), args)
            }
        }
    }

    /// Receiver normalization for value-type instance methods: references
    /// are kept, temporaries and boxes become a private copy.
    pub(crate) fn value_receiver(&self, value: Value) -> RtResult<Value> {
        match value {
            Value::Ref(loc) => Ok(Value::Ref(loc)),
            Value::Null => Err(RuntimeError::NullReference("value-type receiver".into())),
            Value::Object(obj) if obj.is_boxed() => Ok(Value::Ref(Location::local(obj.unbox()?))),
            other => Ok(Value::Ref(Location::local(other))),
        }
    }

    /// Find an accessible method by name and generic arity, searching `ty`
    /// and then its bases; the result's owner is the declaring level.
    pub fn method(&self, ty: &TypeHandle, name: &str, method_args: &[TypeHandle]) -> RtResult<MethodInst> {
        let mut current = Some(ty.clone());
        while let Some(level) = current {
            if let Some(def) = level.def {
                let found = self
                    .catalog
                    .methods_named(def, name)
                    .find(|&m| {
                        let md = self.catalog.method(m);
                        md.arity() == method_args.len() && md.explicit_impl.is_none()
                    });
                if let Some(m) = found {
                    return Ok(MethodInst::generic(level, m, method_args.to_vec()));
                }
            }
            current = self.base_type(&level)?;
        }
        Err(RuntimeError::MissingMethod(format!("{}::{}", ty, name)))
    }

    /// `Owner<..>::Name<..>` for messages.
    pub fn describe_method(&self, method: &MethodInst) -> String {
        let md = self.catalog.method(method.method);
        let mut out = format!("{}::{}", method.owner, md.name);
        if !method.method_args.is_empty() {
            let args: Vec<String> = method.method_args.iter().map(|a| a.to_string()).collect();
            out.push_str(&format!("<{}>", args.join(", ")));
        }
        out
    }
}
