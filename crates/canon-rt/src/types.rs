//! Runtime types: loading, identity, assignability and layouts.
//!
//! Every closed type the runtime touches is interned exactly once as a
//! [`RuntimeType`] and referred to through a cheap [`TypeHandle`]. Handles
//! compare by id, so two loads of `Foo<String>` are the same handle while
//! `Foo<String>` and `Foo<Object>` are distinct (even though they share
//! code).

use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use canon_types::{canonical_type, Prim, Ty, TypeDefId, TypeKind, Variance};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::Serialize;
use tracing::debug;

use crate::error::{RtResult, RuntimeError};
use crate::runtime::Runtime;
use crate::value::{ObjectRef, StructValue, Value};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct TypeId(pub u32);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TypeCategory {
    Primitive(Prim),
    Class,
    Struct,
    Interface,
    Array,
}

pub struct RuntimeType {
    pub id: TypeId,
    /// The exact closed type.
    pub ty: Ty,
    /// The code-sharing form of `ty`.
    pub canonical: Ty,
    pub category: TypeCategory,
    pub def: Option<TypeDefId>,
    /// Loaded type arguments (named types only).
    pub args: Vec<TypeHandle>,
    /// Element type (arrays only).
    pub element: Option<TypeHandle>,
    pub rank: u8,
    pub name: String,
}

impl RuntimeType {
    pub fn is_value_type(&self) -> bool {
        match self.category {
            TypeCategory::Primitive(p) => !p.is_reference() && p != Prim::Void,
            TypeCategory::Struct => true,
            _ => false,
        }
    }

    pub fn is_reference_type(&self) -> bool {
        match self.category {
            TypeCategory::Primitive(p) => p.is_reference(),
            TypeCategory::Struct => false,
            _ => true,
        }
    }

    pub fn is_interface(&self) -> bool {
        self.category == TypeCategory::Interface
    }

    pub fn is_array(&self) -> bool {
        self.category == TypeCategory::Array
    }

    pub fn is_object(&self) -> bool {
        self.category == TypeCategory::Primitive(Prim::Object)
    }

    pub fn prim(&self) -> Option<Prim> {
        match self.category {
            TypeCategory::Primitive(p) => Some(p),
            _ => None,
        }
    }

    /// Exact type arguments as type expressions.
    pub fn type_args(&self) -> &[Ty] {
        match &self.ty {
            Ty::Named(_, args) => args,
            _ => &[],
        }
    }

    /// Whether code for this type is shared with other instantiations.
    pub fn is_shared(&self) -> bool {
        self.canonical.contains_canon()
    }
}

/// Interned handle to a loaded type. Equality and hashing use the id.
#[derive(Clone)]
pub struct TypeHandle(Arc<RuntimeType>);

impl Deref for TypeHandle {
    type Target = RuntimeType;

    fn deref(&self) -> &RuntimeType {
        &self.0
    }
}

impl PartialEq for TypeHandle {
    fn eq(&self, other: &Self) -> bool {
        self.0.id == other.0.id
    }
}

impl Eq for TypeHandle {}

impl Hash for TypeHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.id.hash(state);
    }
}

impl fmt::Display for TypeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.name)
    }
}

impl fmt::Debug for TypeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.0.name, self.0.id.0)
    }
}

// ---------------------------------------------------------------------------
// TypeLoader
// ---------------------------------------------------------------------------

/// Interning table from exact type expression to handle.
#[derive(Default)]
pub(crate) struct TypeLoader {
    by_ty: RwLock<FxHashMap<Ty, TypeHandle>>,
    next_id: AtomicU32,
}

impl TypeLoader {
    pub(crate) fn loaded_count(&self) -> usize {
        self.by_ty.read().len()
    }
}

// ---------------------------------------------------------------------------
// Layouts
// ---------------------------------------------------------------------------

const POINTER_SIZE: usize = 8;
const OBJECT_HEADER: usize = 8;

#[derive(Clone, Debug)]
pub struct FieldLayout {
    pub name: String,
    pub declaring: TypeHandle,
    pub ty: TypeHandle,
    pub offset: usize,
}

/// Notional memory layout of a type.
///
/// `size`/`align` describe the type stored inline (a reference for class,
/// interface and array types). `instance_size` is the size of the instance
/// itself, including the object header for reference types. `fields` are the
/// instance fields, base class fields first; their order is the order of an
/// object's field vector.
#[derive(Clone, Debug)]
pub struct TypeLayout {
    pub ty: TypeHandle,
    pub size: usize,
    pub align: usize,
    pub instance_size: usize,
    pub fields: Vec<FieldLayout>,
}

impl TypeLayout {
    pub fn field_slot(&self, declaring: &TypeHandle, name: &str) -> Option<usize> {
        self.fields
            .iter()
            .position(|f| f.declaring == *declaring && f.name == name)
    }

    pub fn render(&self) -> String {
        let mut out = format!(
            "{} size={} align={} instance={}\n",
            self.ty, self.size, self.align, self.instance_size
        );
        for f in &self.fields {
            out.push_str(&format!("  +{} {}: {}\n", f.offset, f.name, f.ty));
        }
        out
    }
}

fn align_up(value: usize, align: usize) -> usize {
    value.div_ceil(align) * align
}

// ---------------------------------------------------------------------------
// Runtime: loading and identity
// ---------------------------------------------------------------------------

impl Runtime {
    /// Load (or find) the runtime type of a closed type expression.
    pub fn load(&self, ty: &Ty) -> RtResult<TypeHandle> {
        if let Some(handle) = self.loader.by_ty.read().get(ty) {
            return Ok(handle.clone());
        }

        if ty.depth() > self.config.max_type_depth {
            return Err(RuntimeError::UnsupportedConstructedType {
                ty: ty.display(&self.catalog).to_string(),
                reason: format!("nesting deeper than {}", self.config.max_type_depth),
            });
        }

        let mut args = Vec::new();
        let mut element = None;
        let mut rank = 0;
        let (category, def) = match ty {
            Ty::Prim(p) => (TypeCategory::Primitive(*p), None),
            Ty::Named(def, arg_tys) => {
                let td = self.catalog.try_type_def(*def).ok_or_else(|| {
                    RuntimeError::UnsupportedConstructedType {
                        ty: format!("#{}", def.0),
                        reason: "unknown definition".into(),
                    }
                })?;
                if td.arity() != arg_tys.len() {
                    return Err(RuntimeError::UnsupportedConstructedType {
                        ty: ty.display(&self.catalog).to_string(),
                        reason: format!("`{}` expects {} type argument(s)", td.name, td.arity()),
                    });
                }
                for arg in arg_tys {
                    if *arg == Ty::void() {
                        return Err(self.unsupported(ty, "Void cannot be a type argument"));
                    }
                    args.push(self.load(arg)?);
                }
                let category = match td.kind {
                    TypeKind::Class => TypeCategory::Class,
                    TypeKind::Struct => TypeCategory::Struct,
                    TypeKind::Interface => TypeCategory::Interface,
                };
                (category, Some(*def))
            }
            Ty::Array(elem, r) => {
                if **elem == Ty::void() {
                    return Err(self.unsupported(ty, "arrays of Void are not supported"));
                }
                if *r == 0 {
                    return Err(self.unsupported(ty, "arrays must have rank of at least 1"));
                }
                element = Some(self.load(elem)?);
                rank = *r;
                (TypeCategory::Array, None)
            }
            Ty::Param(_) | Ty::MethodParam(_) => {
                return Err(RuntimeError::OpenGeneric(ty.display(&self.catalog).to_string()))
            }
            Ty::Canon => {
                return Err(self.unsupported(ty, "the shared marker is not a loadable type"))
            }
        };

        let mut table = self.loader.by_ty.write();
        if let Some(handle) = table.get(ty) {
            return Ok(handle.clone());
        }
        let id = TypeId(self.loader.next_id.fetch_add(1, Ordering::Relaxed));
        let handle = TypeHandle(Arc::new(RuntimeType {
            id,
            ty: ty.clone(),
            canonical: canonical_type(&self.catalog, ty),
            category,
            def,
            args,
            element,
            rank,
            name: ty.display(&self.catalog).to_string(),
        }));
        table.insert(ty.clone(), handle.clone());
        drop(table);

        debug!(ty = %handle, id = id.0, "loaded type");
        Ok(handle)
    }

    fn unsupported(&self, ty: &Ty, reason: &str) -> RuntimeError {
        RuntimeError::UnsupportedConstructedType {
            ty: ty.display(&self.catalog).to_string(),
            reason: reason.to_string(),
        }
    }

    /// Load a type given by name in the catalog's text syntax, e.g. `Foo<String>`.
    pub fn load_named(&self, text: &str) -> RtResult<TypeHandle> {
        let ty = canon_types::parse_ty(&self.catalog, &canon_types::Scope::empty(), text)?;
        self.load(&ty)
    }

    pub fn object_type(&self) -> RtResult<TypeHandle> {
        self.load(&Ty::object())
    }

    pub fn loaded_type_count(&self) -> usize {
        self.loader.loaded_count()
    }

    /// The direct base type. Classes without an explicit base, arrays and
    /// `String` derive from `Object`; structs, interfaces and `Object` itself
    /// have none.
    pub fn base_type(&self, ty: &TypeHandle) -> RtResult<Option<TypeHandle>> {
        match ty.category {
            TypeCategory::Class => {
                let td = self.def_of(ty)?;
                match &td.base {
                    Some(base) => Ok(Some(self.load(&base.subst(ty.type_args(), &[]))?)),
                    None => Ok(Some(self.object_type()?)),
                }
            }
            TypeCategory::Array | TypeCategory::Primitive(Prim::String) => {
                Ok(Some(self.object_type()?))
            }
            _ => Ok(None),
        }
    }

    /// The catalog definition behind a named type.
    pub(crate) fn def_of(&self, ty: &TypeHandle) -> RtResult<&canon_types::TypeDef> {
        ty.def
            .map(|def| self.catalog.type_def(def))
            .ok_or_else(|| RuntimeError::invalid_cast(ty.to_string(), "named type"))
    }

    /// Every interface `ty` implements: declared on any level of the class
    /// chain, plus interfaces inherited by those interfaces. Most-derived
    /// declarations come first.
    pub fn interfaces_of(&self, ty: &TypeHandle) -> RtResult<Arc<[TypeHandle]>> {
        self.interfaces.get_or_try_init(
            &ty.id,
            || format!("interface list of {}", ty),
            || {
                let mut out: Vec<TypeHandle> = Vec::new();
                if ty.is_interface() {
                    self.add_super_interfaces(ty, &mut out)?;
                } else {
                    let mut current = Some(ty.clone());
                    while let Some(level) = current {
                        if let Some(def) = level.def {
                            for iface in &self.catalog.type_def(def).interfaces {
                                let handle = self.load(&iface.subst(level.type_args(), &[]))?;
                                self.add_interface(handle, &mut out)?;
                            }
                        }
                        current = self.base_type(&level)?;
                    }
                }
                Ok(Arc::from(out))
            },
        )
    }

    fn add_interface(&self, iface: TypeHandle, out: &mut Vec<TypeHandle>) -> RtResult<()> {
        if out.contains(&iface) {
            return Ok(());
        }
        out.push(iface.clone());
        self.add_super_interfaces(&iface, out)
    }

    fn add_super_interfaces(&self, iface: &TypeHandle, out: &mut Vec<TypeHandle>) -> RtResult<()> {
        let td = self.def_of(iface)?;
        for sup in &td.interfaces {
            let handle = self.load(&sup.subst(iface.type_args(), &[]))?;
            self.add_interface(handle, out)?;
        }
        Ok(())
    }

    /// Whether a value of type `from` can be used where `to` is expected
    /// (identity, class chain, interfaces with variance, array covariance,
    /// anything to `Object`).
    pub fn is_assignable(&self, from: &TypeHandle, to: &TypeHandle) -> RtResult<bool> {
        if from == to {
            return Ok(true);
        }
        if to.is_object() {
            return Ok(from.prim() != Some(Prim::Void));
        }
        match (from.category, to.category) {
            (TypeCategory::Array, TypeCategory::Array) => {
                let (Some(fe), Some(te)) = (&from.element, &to.element) else {
                    return Ok(false);
                };
                if from.rank != to.rank {
                    return Ok(false);
                }
                if fe == te {
                    return Ok(true);
                }
                Ok(fe.is_reference_type() && te.is_reference_type() && self.is_assignable(fe, te)?)
            }
            (_, TypeCategory::Interface) => {
                if from.is_interface() && self.is_variant_of(from, to)? {
                    return Ok(true);
                }
                for iface in self.interfaces_of(from)?.iter() {
                    if iface == to || self.is_variant_of(iface, to)? {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            (_, TypeCategory::Class) | (_, TypeCategory::Primitive(Prim::String)) => {
                let mut current = self.base_type(from)?;
                while let Some(t) = current {
                    if t == *to {
                        return Ok(true);
                    }
                    current = self.base_type(&t)?;
                }
                Ok(false)
            }
            _ => Ok(false),
        }
    }

    /// Variance-aware compatibility of two instantiations of the same
    /// generic interface.
    pub fn is_variant_of(&self, from: &TypeHandle, to: &TypeHandle) -> RtResult<bool> {
        if from.def.is_none() || from.def != to.def || from.args.len() != to.args.len() {
            return Ok(false);
        }
        let td = self.def_of(to)?;
        for (i, param) in td.generic_params.iter().enumerate() {
            let (a, b) = (&from.args[i], &to.args[i]);
            if a == b {
                continue;
            }
            let ok = match param.variance {
                Variance::Invariant => false,
                Variance::Covariant => a.is_reference_type() && self.is_assignable(a, b)?,
                Variance::Contravariant => b.is_reference_type() && self.is_assignable(b, a)?,
            };
            if !ok {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// The exact runtime type of a value.
    pub fn type_of(&self, value: &Value) -> RtResult<TypeHandle> {
        match value {
            Value::Void => self.load(&Ty::void()),
            Value::Null => Err(RuntimeError::NullReference("type of null".into())),
            Value::Bool(_) => self.load(&Ty::bool()),
            Value::U8(_) => self.load(&Ty::u8()),
            Value::I32(_) => self.load(&Ty::int32()),
            Value::I64(_) => self.load(&Ty::int64()),
            Value::F32(_) => self.load(&Ty::float32()),
            Value::F64(_) => self.load(&Ty::float64()),
            Value::Str(_) => self.load(&Ty::string()),
            Value::Object(o) => Ok(o.ty().clone()),
            Value::Struct(s) => Ok(s.ty.clone()),
            Value::Type(_) | Value::Delegate(_) => self.object_type(),
            Value::Ref(loc) => self.type_of(&loc.load()?),
        }
    }

    /// The `is` operator. `null` is never an instance.
    pub fn is_instance(&self, value: &Value, ty: &TypeHandle) -> RtResult<bool> {
        if value.is_null() {
            return Ok(false);
        }
        let actual = self.type_of(value)?;
        self.is_assignable(&actual, ty)
    }

    /// The `as` operator: the value itself, or `null` when it is not an
    /// instance of `ty`.
    pub fn try_cast(&self, value: &Value, ty: &TypeHandle) -> RtResult<Value> {
        if !ty.is_reference_type() {
            return Err(RuntimeError::invalid_cast(value.kind(), ty.to_string()));
        }
        if self.is_instance(value, ty)? {
            Ok(value.clone())
        } else {
            Ok(Value::Null)
        }
    }

    /// A checked cast: the value itself, or `InvalidCast`.
    pub fn cast(&self, value: &Value, ty: &TypeHandle) -> RtResult<Value> {
        if value.is_null() && ty.is_reference_type() {
            return Ok(Value::Null);
        }
        if self.is_instance(value, ty)? {
            Ok(value.clone())
        } else {
            let from = self.type_of(value)?;
            Err(RuntimeError::invalid_cast(from.to_string(), ty.to_string()))
        }
    }

    /// The zero value of a type: numeric zero, `false`, `null`, or a struct
    /// whose fields are all zero values.
    pub fn default_value(&self, ty: &TypeHandle) -> RtResult<Value> {
        Ok(match ty.category {
            TypeCategory::Primitive(p) => match p {
                Prim::Void => Value::Void,
                Prim::Bool => Value::Bool(false),
                Prim::U8 => Value::U8(0),
                Prim::I32 => Value::I32(0),
                Prim::I64 => Value::I64(0),
                Prim::F32 => Value::F32(0.0),
                Prim::F64 => Value::F64(0.0),
                Prim::Object | Prim::String => Value::Null,
            },
            TypeCategory::Struct => {
                let layout = self.type_layout(ty)?;
                let fields = layout
                    .fields
                    .iter()
                    .map(|f| self.default_value(&f.ty))
                    .collect::<RtResult<Vec<_>>>()?;
                Value::Struct(StructValue {
                    ty: ty.clone(),
                    fields,
                })
            }
            TypeCategory::Class | TypeCategory::Interface | TypeCategory::Array => Value::Null,
        })
    }

    /// Box a value-type value; reference values pass through unchanged.
    pub fn box_value(&self, value: Value) -> RtResult<Value> {
        match value {
            Value::Struct(s) => {
                let ty = s.ty.clone();
                Ok(Value::Object(ObjectRef::boxed(ty, Value::Struct(s))))
            }
            Value::Ref(loc) => self.box_value(loc.load()?),
            v @ (Value::Bool(_)
            | Value::U8(_)
            | Value::I32(_)
            | Value::I64(_)
            | Value::F32(_)
            | Value::F64(_)) => {
                let ty = self.type_of(&v)?;
                Ok(Value::Object(ObjectRef::boxed(ty, v)))
            }
            other => Ok(other),
        }
    }

    /// Copy the contents out of a box of exactly `ty`.
    pub fn unbox_value(&self, value: &Value, ty: &TypeHandle) -> RtResult<Value> {
        let obj = value.as_object()?;
        if obj.ty() != ty || !obj.is_boxed() {
            return Err(RuntimeError::invalid_cast(obj.ty().to_string(), ty.to_string()));
        }
        obj.unbox()
    }

    /// Allocate a class instance with zeroed fields. Runs the class
    /// constructor first, like any other first use of the type.
    pub fn new_object(&self, ty: &TypeHandle) -> RtResult<ObjectRef> {
        if ty.category != TypeCategory::Class {
            return Err(RuntimeError::invalid_cast(ty.to_string(), "instantiable class"));
        }
        self.ensure_class_init(ty)?;
        let layout = self.type_layout(ty)?;
        let fields = layout
            .fields
            .iter()
            .map(|f| self.default_value(&f.ty))
            .collect::<RtResult<Vec<_>>>()?;
        Ok(ObjectRef::with_fields(ty.clone(), fields))
    }

    /// A zeroed struct value.
    pub fn new_struct(&self, ty: &TypeHandle) -> RtResult<StructValue> {
        match self.default_value(ty)? {
            Value::Struct(s) => Ok(s),
            _ => Err(RuntimeError::invalid_cast(ty.to_string(), "struct")),
        }
    }

    /// Memoized layout of a loaded type.
    pub fn type_layout(&self, ty: &TypeHandle) -> RtResult<Arc<TypeLayout>> {
        self.layouts.get_or_try_init(
            &ty.id,
            || format!("layout of {}", ty),
            || self.compute_layout(ty).map(Arc::new),
        )
    }

    fn compute_layout(&self, ty: &TypeHandle) -> RtResult<TypeLayout> {
        match ty.category {
            TypeCategory::Primitive(p) => {
                let (size, instance_size) = if p.is_reference() {
                    (POINTER_SIZE, OBJECT_HEADER)
                } else {
                    (p.size(), p.size())
                };
                Ok(TypeLayout {
                    ty: ty.clone(),
                    size,
                    align: size.max(1),
                    instance_size,
                    fields: Vec::new(),
                })
            }
            TypeCategory::Interface | TypeCategory::Array => Ok(TypeLayout {
                ty: ty.clone(),
                size: POINTER_SIZE,
                align: POINTER_SIZE,
                instance_size: if ty.is_array() { OBJECT_HEADER + POINTER_SIZE } else { 0 },
                fields: Vec::new(),
            }),
            TypeCategory::Class => {
                let (mut fields, mut offset) = match self.base_type(ty)? {
                    Some(base) if !base.is_object() => {
                        let bl = self.type_layout(&base)?;
                        (bl.fields.clone(), bl.instance_size)
                    }
                    _ => (Vec::new(), OBJECT_HEADER),
                };
                self.append_fields(ty, &mut fields, &mut offset)?;
                Ok(TypeLayout {
                    ty: ty.clone(),
                    size: POINTER_SIZE,
                    align: POINTER_SIZE,
                    instance_size: align_up(offset, POINTER_SIZE),
                    fields,
                })
            }
            TypeCategory::Struct => {
                let mut fields = Vec::new();
                let mut offset = 0;
                let align = self.append_fields(ty, &mut fields, &mut offset)?;
                let size = align_up(offset.max(1), align);
                Ok(TypeLayout {
                    ty: ty.clone(),
                    size,
                    align,
                    instance_size: size,
                    fields,
                })
            }
        }
    }

    /// Lay out the instance fields declared by `ty` itself; returns the
    /// largest field alignment seen.
    fn append_fields(
        &self,
        ty: &TypeHandle,
        fields: &mut Vec<FieldLayout>,
        offset: &mut usize,
    ) -> RtResult<usize> {
        let mut max_align = 1;
        let td = self.def_of(ty)?;
        for field in td
            .fields
            .iter()
            .filter(|f| f.storage == canon_types::FieldStorage::Instance)
        {
            let fty = self.load(&field.ty.subst(ty.type_args(), &[]))?;
            let fl = self.type_layout(&fty)?;
            *offset = align_up(*offset, fl.align);
            fields.push(FieldLayout {
                name: field.name.clone(),
                declaring: ty.clone(),
                ty: fty,
                offset: *offset,
            });
            *offset += fl.size;
            max_align = max_align.max(fl.align);
        }
        Ok(max_align)
    }
}
