//! Reflection over loaded types: declared members, generic construction,
//! late-bound invocation and field access.
//!
//! Reflection invocation behaves like a virtual call through the declared
//! method: the implementation is chosen by the target's runtime type.
//! Arguments are converted the way a late-bound call would: value-type
//! arguments to reference-typed parameters are boxed, and boxes passed to
//! value-typed parameters are unboxed. A boxed value-type target is
//! invoked in place, so mutations land in the box.

use canon_types::{FieldStorage, MethodDefId, Ty, TypeDefId};

use crate::code::MethodInst;
use crate::dictionary::FieldHandle;
use crate::error::{RtResult, RuntimeError};
use crate::runtime::Runtime;
use crate::types::TypeHandle;
use crate::value::{Location, Value};

/// A method as seen through reflection. `method_args` is empty for a
/// generic method definition until [`Runtime::make_generic_method`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MethodInfo {
    pub owner: TypeHandle,
    pub method: MethodDefId,
    pub method_args: Vec<TypeHandle>,
    pub name: String,
}

impl MethodInfo {
    pub fn is_generic_method_definition(&self, rt: &Runtime) -> bool {
        rt.catalog().method(self.method).is_generic() && self.method_args.is_empty()
    }

    fn inst(&self) -> MethodInst {
        MethodInst::generic(self.owner.clone(), self.method, self.method_args.clone())
    }
}

impl Runtime {
    /// Methods declared by `ty` itself (not inherited), in declaration order.
    pub fn declared_methods(&self, ty: &TypeHandle) -> Vec<MethodInfo> {
        let Some(def) = ty.def else { return Vec::new() };
        self.catalog
            .type_def(def)
            .methods
            .iter()
            .map(|&m| MethodInfo {
                owner: ty.clone(),
                method: m,
                method_args: Vec::new(),
                name: self.catalog.method(m).name.clone(),
            })
            .collect()
    }

    /// The first method named `name` declared by `ty` itself.
    pub fn declared_method(&self, ty: &TypeHandle, name: &str) -> RtResult<MethodInfo> {
        self.declared_methods(ty)
            .into_iter()
            .find(|m| m.name == name)
            .ok_or_else(|| RuntimeError::MissingMethod(format!("{}::{}", ty, name)))
    }

    pub fn make_generic_method(&self, info: &MethodInfo, args: &[TypeHandle]) -> RtResult<MethodInfo> {
        let md = self.catalog.method(info.method);
        if !info.is_generic_method_definition(self) {
            return Err(RuntimeError::invalid_cast(
                format!("{}::{}", info.owner, info.name),
                "generic method definition",
            ));
        }
        if md.arity() != args.len() {
            return Err(RuntimeError::ArgumentCount {
                method: format!("{}::{}", info.owner, info.name),
                expected: md.arity(),
                found: args.len(),
            });
        }
        Ok(MethodInfo {
            method_args: args.to_vec(),
            ..info.clone()
        })
    }

    /// Close a generic type definition over `args`.
    pub fn make_generic_type(&self, def: TypeDefId, args: &[TypeHandle]) -> RtResult<TypeHandle> {
        let args = args.iter().map(|a| a.ty.clone()).collect();
        self.load(&Ty::named(def, args))
    }

    /// Late-bound invocation.
    pub fn invoke(&self, info: &MethodInfo, target: Option<Value>, args: Vec<Value>) -> RtResult<Value> {
        let md = self.catalog.method(info.method);
        let label = || format!("{}::{}", info.owner, info.name);
        if info.is_generic_method_definition(self) {
            return Err(RuntimeError::OpenGeneric(label()));
        }
        if args.len() != md.params.len() {
            return Err(RuntimeError::ArgumentCount {
                method: label(),
                expected: md.params.len(),
                found: args.len(),
            });
        }

        let inst = info.inst();
        let method_args = inst.method_arg_tys();
        let mut converted = Vec::with_capacity(args.len());
        for (index, (arg, param)) in args.into_iter().zip(&md.params).enumerate() {
            let param_ty = self.load(&param.subst(info.owner.type_args(), &method_args))?;
            converted.push(self.convert_argument(&label(), index, arg, &param_ty)?);
        }

        if md.is_static {
            return self.call(&inst, None, converted);
        }
        let target = match target {
            None => return Err(RuntimeError::TargetRequired(label())),
            Some(Value::Null) => return Err(RuntimeError::NullReference(label())),
            Some(t) => t,
        };
        let receiver = self.type_of(&target)?;
        if !self.is_assignable(&receiver, &info.owner)? {
            return Err(RuntimeError::invalid_cast(receiver.to_string(), info.owner.to_string()));
        }
        let resolved = self.resolve_virtual(&inst, &receiver)?;
        let this = match target {
            Value::Object(obj) if obj.is_boxed() && resolved.owner.is_value_type() => {
                Value::Ref(Location::Boxed(obj))
            }
            Value::Struct(s) => Value::Ref(Location::local(Value::Struct(s))),
            Value::Ref(loc) if !resolved.owner.is_value_type() => loc.load()?,
            other => other,
        };
        self.invoke_method(&resolved, Some(this), converted)
    }

    fn convert_argument(&self, method: &str, index: usize, arg: Value, param: &TypeHandle) -> RtResult<Value> {
        let mismatch = |found: String| RuntimeError::ArgumentType {
            method: method.to_string(),
            index,
            expected: param.to_string(),
            found,
        };
        match arg {
            Value::Ref(loc) => Ok(Value::Ref(loc)),
            Value::Null if param.is_reference_type() => Ok(Value::Null),
            Value::Null => Err(mismatch("null".into())),
            arg => {
                let actual = self.type_of(&arg)?;
                if !self.is_assignable(&actual, param)? {
                    return Err(mismatch(actual.to_string()));
                }
                if param.is_reference_type() {
                    self.box_value(arg)
                } else {
                    match arg {
                        Value::Object(obj) if obj.is_boxed() => obj.unbox(),
                        other => Ok(other),
                    }
                }
            }
        }
    }

    /// A field declared by `ty` itself.
    pub fn declared_field(&self, ty: &TypeHandle, name: &str) -> RtResult<FieldHandle> {
        let declared = ty
            .def
            .is_some_and(|d| self.catalog.type_def(d).field_index(name).is_some());
        if !declared {
            return Err(RuntimeError::MissingField {
                owner: ty.to_string(),
                name: name.to_string(),
            });
        }
        self.field_handle(ty, name)
    }

    pub fn get_field_value(&self, field: &FieldHandle, target: Option<&Value>) -> RtResult<Value> {
        match field.storage {
            FieldStorage::Static => self.static_storage(&field.owner)?.read(self, field.index),
            FieldStorage::ThreadStatic => {
                self.thread_static_storage(&field.owner)?.read(self, field.index)
            }
            FieldStorage::Instance => {
                let slot = self.instance_slot(field)?;
                match target {
                    None => Err(RuntimeError::TargetRequired(format!("{}.{}", field.owner, field.name))),
                    Some(Value::Null) => Err(RuntimeError::NullReference(format!("{}.{}", field.owner, field.name))),
                    Some(t) => t.field(slot),
                }
            }
        }
    }

    /// Store a field. Instance fields of a value type need a reference or a
    /// box as target; a plain struct value would be a copy.
    pub fn set_field_value(&self, field: &FieldHandle, target: Option<&Value>, value: Value) -> RtResult<()> {
        let value = self.convert_argument(&format!("{}.{}", field.owner, field.name), 0, value, &field.ty)?;
        match field.storage {
            FieldStorage::Static => self.static_storage(&field.owner)?.write(self, field.index, value),
            FieldStorage::ThreadStatic => {
                self.thread_static_storage(&field.owner)?.write(self, field.index, value)
            }
            FieldStorage::Instance => {
                let slot = self.instance_slot(field)?;
                match target {
                    None => Err(RuntimeError::TargetRequired(format!("{}.{}", field.owner, field.name))),
                    Some(Value::Null) => Err(RuntimeError::NullReference(format!("{}.{}", field.owner, field.name))),
                    Some(Value::Struct(s)) => Err(RuntimeError::invalid_cast(
                        s.ty.to_string(),
                        "field target (a reference or a box)",
                    )),
                    Some(t) => t.set_field(slot, value),
                }
            }
        }
    }

    fn instance_slot(&self, field: &FieldHandle) -> RtResult<usize> {
        field.slot.ok_or_else(|| RuntimeError::MissingField {
            owner: field.owner.to_string(),
            name: field.name.clone(),
        })
    }
}
