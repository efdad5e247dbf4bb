//! Runtime values.
//!
//! A small managed object model sufficient to execute shared generic code:
//! primitives, strings, heap objects (class instances, boxed values,
//! arrays), inline struct values, type handles, delegates and managed
//! references ([`Location`]) to storage that can be mutated in place.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::binder::BoundInvocation;
use crate::error::{RtResult, RuntimeError};
use crate::types::TypeHandle;

#[derive(Clone)]
pub enum Value {
    Void,
    Null,
    Bool(bool),
    U8(u8),
    I32(i32),
    I64(i64),
    F32(f32),
    F64(f64),
    Str(Arc<str>),
    Object(ObjectRef),
    Struct(StructValue),
    Type(TypeHandle),
    Ref(Location),
    Delegate(Arc<BoundInvocation>),
}

impl Value {
    pub fn str(s: &str) -> Value {
        Value::Str(Arc::from(s))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Value::Void => "void",
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::U8(_) => "byte",
            Value::I32(_) => "int32",
            Value::I64(_) => "int64",
            Value::F32(_) => "single",
            Value::F64(_) => "double",
            Value::Str(_) => "string",
            Value::Object(_) => "object",
            Value::Struct(_) => "struct",
            Value::Type(_) => "type",
            Value::Ref(_) => "ref",
            Value::Delegate(_) => "delegate",
        }
    }

    fn mismatch(&self, wanted: &str) -> RuntimeError {
        RuntimeError::invalid_cast(self.kind(), wanted)
    }

    pub fn as_bool(&self) -> RtResult<bool> {
        match self {
            Value::Bool(b) => Ok(*b),
            other => Err(other.mismatch("bool")),
        }
    }

    pub fn as_i32(&self) -> RtResult<i32> {
        match self {
            Value::I32(v) => Ok(*v),
            other => Err(other.mismatch("int32")),
        }
    }

    pub fn as_i64(&self) -> RtResult<i64> {
        match self {
            Value::I64(v) => Ok(*v),
            other => Err(other.mismatch("int64")),
        }
    }

    pub fn as_f64(&self) -> RtResult<f64> {
        match self {
            Value::F64(v) => Ok(*v),
            other => Err(other.mismatch("double")),
        }
    }

    pub fn as_str(&self) -> RtResult<&str> {
        match self {
            Value::Str(s) => Ok(s),
            Value::Null => Err(RuntimeError::NullReference("string expected".into())),
            other => Err(other.mismatch("string")),
        }
    }

    pub fn as_object(&self) -> RtResult<&ObjectRef> {
        match self {
            Value::Object(o) => Ok(o),
            Value::Null => Err(RuntimeError::NullReference("object expected".into())),
            other => Err(other.mismatch("object")),
        }
    }

    pub fn as_struct(&self) -> RtResult<&StructValue> {
        match self {
            Value::Struct(s) => Ok(s),
            other => Err(other.mismatch("struct")),
        }
    }

    pub fn as_type(&self) -> RtResult<&TypeHandle> {
        match self {
            Value::Type(t) => Ok(t),
            other => Err(other.mismatch("type")),
        }
    }

    pub fn as_location(&self) -> RtResult<&Location> {
        match self {
            Value::Ref(loc) => Ok(loc),
            other => Err(other.mismatch("ref")),
        }
    }

    pub fn as_delegate(&self) -> RtResult<&Arc<BoundInvocation>> {
        match self {
            Value::Delegate(d) => Ok(d),
            Value::Null => Err(RuntimeError::NullReference("delegate expected".into())),
            other => Err(other.mismatch("delegate")),
        }
    }

    /// Read field `index` of an object, struct, or the struct a reference
    /// points at.
    pub fn field(&self, index: usize) -> RtResult<Value> {
        match self {
            Value::Object(o) => o.get_field(index),
            Value::Struct(s) => s.get(index),
            Value::Ref(loc) => loc.get_field(index),
            Value::Null => Err(RuntimeError::NullReference(format!("field {}", index))),
            other => Err(other.mismatch("object with fields")),
        }
    }

    /// Write field `index` through an object handle or a managed reference.
    /// Writing into a `Value::Struct` is rejected: it is a copy.
    pub fn set_field(&self, index: usize, value: Value) -> RtResult<()> {
        match self {
            Value::Object(o) => o.set_field(index, value),
            Value::Ref(loc) => loc.set_field(index, value),
            Value::Null => Err(RuntimeError::NullReference(format!("field {}", index))),
            other => Err(other.mismatch("object or ref")),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Void, Value::Void) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::U8(a), Value::U8(b)) => a == b,
            (Value::I32(a), Value::I32(b)) => a == b,
            (Value::I64(a), Value::I64(b)) => a == b,
            (Value::F32(a), Value::F32(b)) => a == b,
            (Value::F64(a), Value::F64(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a.ptr_eq(b),
            (Value::Struct(a), Value::Struct(b)) => a == b,
            (Value::Type(a), Value::Type(b)) => a == b,
            (Value::Delegate(a), Value::Delegate(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Void => write!(f, "void"),
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::U8(v) => write!(f, "{}u8", v),
            Value::I32(v) => write!(f, "{}", v),
            Value::I64(v) => write!(f, "{}L", v),
            Value::F32(v) => write!(f, "{}f", v),
            Value::F64(v) => write!(f, "{}d", v),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Object(o) => write!(f, "{:?}", o),
            Value::Struct(s) => write!(f, "{:?}", s),
            Value::Type(t) => write!(f, "typeof({})", t),
            Value::Ref(loc) => write!(f, "&{:?}", loc),
            Value::Delegate(d) => write!(f, "{:?}", d),
        }
    }
}

// ---------------------------------------------------------------------------
// StructValue
// ---------------------------------------------------------------------------

/// An unboxed value-type instance. Copies are independent.
#[derive(Clone, PartialEq)]
pub struct StructValue {
    pub ty: TypeHandle,
    pub fields: Vec<Value>,
}

impl StructValue {
    pub fn get(&self, index: usize) -> RtResult<Value> {
        self.fields
            .get(index)
            .cloned()
            .ok_or(RuntimeError::IndexOutOfRange {
                index,
                length: self.fields.len(),
            })
    }

    pub fn set(&mut self, index: usize, value: Value) -> RtResult<()> {
        let length = self.fields.len();
        let slot = self
            .fields
            .get_mut(index)
            .ok_or(RuntimeError::IndexOutOfRange { index, length })?;
        *slot = value;
        Ok(())
    }
}

impl fmt::Debug for StructValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:?}", self.ty, self.fields)
    }
}

// ---------------------------------------------------------------------------
// Heap objects
// ---------------------------------------------------------------------------

pub struct ArrayData {
    pub element: TypeHandle,
    pub dims: Vec<usize>,
    pub items: Mutex<Vec<Value>>,
}

impl ArrayData {
    pub fn len(&self) -> usize {
        self.dims.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Row-major flat index of a multi-dimensional index.
    pub fn flat_index(&self, indices: &[usize]) -> RtResult<usize> {
        if indices.len() != self.dims.len() {
            return Err(RuntimeError::IndexOutOfRange {
                index: indices.len(),
                length: self.dims.len(),
            });
        }
        let mut flat = 0;
        for (&i, &dim) in indices.iter().zip(&self.dims) {
            if i >= dim {
                return Err(RuntimeError::IndexOutOfRange {
                    index: i,
                    length: dim,
                });
            }
            flat = flat * dim + i;
        }
        Ok(flat)
    }
}

pub enum HeapData {
    /// Instance fields of a class, base fields first.
    Fields(Mutex<Vec<Value>>),
    /// A boxed value-type instance or primitive.
    Boxed(Mutex<Value>),
    Array(ArrayData),
}

pub struct HeapObject {
    pub ty: TypeHandle,
    pub data: HeapData,
}

/// A reference to a heap object. Equality is identity.
#[derive(Clone)]
pub struct ObjectRef(Arc<HeapObject>);

impl ObjectRef {
    pub fn new(ty: TypeHandle, data: HeapData) -> Self {
        ObjectRef(Arc::new(HeapObject { ty, data }))
    }

    pub fn with_fields(ty: TypeHandle, fields: Vec<Value>) -> Self {
        Self::new(ty, HeapData::Fields(Mutex::new(fields)))
    }

    pub fn boxed(ty: TypeHandle, value: Value) -> Self {
        Self::new(ty, HeapData::Boxed(Mutex::new(value)))
    }

    pub fn ty(&self) -> &TypeHandle {
        &self.0.ty
    }

    pub fn data(&self) -> &HeapData {
        &self.0.data
    }

    pub fn ptr_eq(&self, other: &ObjectRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn is_boxed(&self) -> bool {
        matches!(self.0.data, HeapData::Boxed(_))
    }

    pub fn array(&self) -> Option<&ArrayData> {
        match &self.0.data {
            HeapData::Array(a) => Some(a),
            _ => None,
        }
    }

    /// A copy of the boxed value.
    pub fn unbox(&self) -> RtResult<Value> {
        match &self.0.data {
            HeapData::Boxed(v) => Ok(v.lock().clone()),
            _ => Err(RuntimeError::invalid_cast(self.0.ty.to_string(), "boxed value")),
        }
    }

    pub fn get_field(&self, index: usize) -> RtResult<Value> {
        match &self.0.data {
            HeapData::Fields(fields) => {
                let fields = fields.lock();
                fields.get(index).cloned().ok_or(RuntimeError::IndexOutOfRange {
                    index,
                    length: fields.len(),
                })
            }
            HeapData::Boxed(v) => v.lock().field(index),
            HeapData::Array(_) => Err(RuntimeError::invalid_cast(
                self.0.ty.to_string(),
                "object with fields",
            )),
        }
    }

    pub fn set_field(&self, index: usize, value: Value) -> RtResult<()> {
        match &self.0.data {
            HeapData::Fields(fields) => {
                let mut fields = fields.lock();
                let length = fields.len();
                let slot = fields
                    .get_mut(index)
                    .ok_or(RuntimeError::IndexOutOfRange { index, length })?;
                *slot = value;
                Ok(())
            }
            HeapData::Boxed(v) => match &mut *v.lock() {
                Value::Struct(s) => s.set(index, value),
                other => Err(other.mismatch("struct")),
            },
            HeapData::Array(_) => Err(RuntimeError::invalid_cast(
                self.0.ty.to_string(),
                "object with fields",
            )),
        }
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0.data {
            HeapData::Boxed(v) => write!(f, "box({:?})", &*v.lock()),
            _ => write!(f, "{}@{:p}", self.0.ty, Arc::as_ptr(&self.0)),
        }
    }
}

// ---------------------------------------------------------------------------
// Location
// ---------------------------------------------------------------------------

/// A managed reference to mutable storage.
#[derive(Clone)]
pub enum Location {
    /// A local variable (or a private temporary).
    Local(Arc<Mutex<Value>>),
    /// Instance field `index` of a class object.
    Field { object: ObjectRef, index: usize },
    /// The interior of a box.
    Boxed(ObjectRef),
    /// Flat element `index` of an array.
    Element { array: ObjectRef, index: usize },
}

impl Location {
    /// A fresh local holding `value`.
    pub fn local(value: Value) -> Location {
        Location::Local(Arc::new(Mutex::new(value)))
    }

    /// Run `f` with exclusive access to the referenced storage.
    pub fn with_mut<R>(&self, f: impl FnOnce(&mut Value) -> RtResult<R>) -> RtResult<R> {
        match self {
            Location::Local(cell) => f(&mut cell.lock()),
            Location::Field { object, index } => match object.data() {
                HeapData::Fields(fields) => {
                    let mut fields = fields.lock();
                    let length = fields.len();
                    let slot = fields.get_mut(*index).ok_or(RuntimeError::IndexOutOfRange {
                        index: *index,
                        length,
                    })?;
                    f(slot)
                }
                _ => Err(RuntimeError::invalid_cast(object.ty().to_string(), "object with fields")),
            },
            Location::Boxed(object) => match object.data() {
                HeapData::Boxed(v) => f(&mut v.lock()),
                _ => Err(RuntimeError::invalid_cast(object.ty().to_string(), "boxed value")),
            },
            Location::Element { array, index } => match array.array() {
                Some(data) => {
                    let mut items = data.items.lock();
                    let length = items.len();
                    let slot = items.get_mut(*index).ok_or(RuntimeError::IndexOutOfRange {
                        index: *index,
                        length,
                    })?;
                    f(slot)
                }
                None => Err(RuntimeError::invalid_cast(array.ty().to_string(), "array")),
            },
        }
    }

    pub fn load(&self) -> RtResult<Value> {
        self.with_mut(|v| Ok(v.clone()))
    }

    pub fn store(&self, value: Value) -> RtResult<()> {
        self.with_mut(|v| {
            *v = value;
            Ok(())
        })
    }

    /// Field of the struct (or object) stored at this location.
    pub fn get_field(&self, index: usize) -> RtResult<Value> {
        self.with_mut(|v| match v {
            Value::Struct(s) => s.get(index),
            Value::Object(o) => o.get_field(index),
            Value::Null => Err(RuntimeError::NullReference(format!("field {}", index))),
            other => Err(other.mismatch("struct")),
        })
    }

    /// Mutate a field of the struct stored at this location in place.
    pub fn set_field(&self, index: usize, value: Value) -> RtResult<()> {
        self.with_mut(|v| match v {
            Value::Struct(s) => s.set(index, value),
            Value::Object(o) => o.set_field(index, value),
            Value::Null => Err(RuntimeError::NullReference(format!("field {}", index))),
            other => Err(other.mismatch("struct")),
        })
    }
}

impl fmt::Debug for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Local(cell) => write!(f, "local({:?})", &*cell.lock()),
            Location::Field { object, index } => write!(f, "{:?}.{}", object, index),
            Location::Boxed(object) => write!(f, "unbox({:?})", object),
            Location::Element { array, index } => write!(f, "{:?}[{}]", array, index),
        }
    }
}
