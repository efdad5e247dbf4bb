//! Arrays, including multi-dimensional ones.
//!
//! Reference-element arrays are covariant: a `String[]` may be used as an
//! `Object[]`. Stores are therefore checked against the array's *actual*
//! element type, and taking the address of an element requires the caller's
//! static element type to match the actual one exactly (a writable
//! reference to an `Object` slot inside a `String[]` would allow storing a
//! non-string through it).

use canon_types::Ty;

use crate::error::{RtResult, RuntimeError};
use crate::runtime::Runtime;
use crate::types::TypeHandle;
use crate::value::{ArrayData, HeapData, Location, ObjectRef, Value};

fn array_of(value: &Value) -> RtResult<&ObjectRef> {
    let obj = match value {
        Value::Null => return Err(RuntimeError::NullReference("array access".into())),
        other => other.as_object()?,
    };
    if obj.array().is_none() {
        return Err(RuntimeError::invalid_cast(obj.ty().to_string(), "array"));
    }
    Ok(obj)
}

impl Runtime {
    /// A zero-filled array with the given dimension lengths (rank = number
    /// of dimensions).
    pub fn new_array(&self, element: &TypeHandle, dims: &[usize]) -> RtResult<Value> {
        let rank = u8::try_from(dims.len()).map_err(|_| RuntimeError::UnsupportedConstructedType {
            ty: format!("{}[]", element),
            reason: "rank too large".into(),
        })?;
        let ty = self.load(&Ty::md_array(element.ty.clone(), rank))?;
        let too_large = || RuntimeError::UnsupportedConstructedType {
            ty: ty.to_string(),
            reason: format!("dimensions {:?} exceed the addressable size", dims),
        };
        let len = dims
            .iter()
            .try_fold(1usize, |acc, &d| acc.checked_mul(d))
            .ok_or_else(too_large)?;
        let mut items = Vec::new();
        items.try_reserve_exact(len).map_err(|_| too_large())?;
        items.resize(len, self.default_value(element)?);
        let data = ArrayData {
            element: element.clone(),
            dims: dims.to_vec(),
            items: parking_lot::Mutex::new(items),
        };
        Ok(Value::Object(ObjectRef::new(ty, HeapData::Array(data))))
    }

    /// Build a one-dimensional array from values, checking each store.
    pub fn array_from(&self, element: &TypeHandle, items: Vec<Value>) -> RtResult<Value> {
        let array = self.new_array(element, &[items.len()])?;
        for (i, item) in items.into_iter().enumerate() {
            self.array_store(&array, &[i], item)?;
        }
        Ok(array)
    }

    pub fn array_length(&self, array: &Value) -> RtResult<usize> {
        let obj = array_of(array)?;
        Ok(obj.array().map_or(0, ArrayData::len))
    }

    pub fn array_load(&self, array: &Value, indices: &[usize]) -> RtResult<Value> {
        let obj = array_of(array)?;
        let data = obj.array().ok_or_else(|| RuntimeError::invalid_cast(obj.ty().to_string(), "array"))?;
        let flat = data.flat_index(indices)?;
        Ok(data.items.lock()[flat].clone())
    }

    /// Store with the covariance check against the actual element type.
    pub fn array_store(&self, array: &Value, indices: &[usize], value: Value) -> RtResult<()> {
        let obj = array_of(array)?;
        let data = obj.array().ok_or_else(|| RuntimeError::invalid_cast(obj.ty().to_string(), "array"))?;
        let flat = data.flat_index(indices)?;
        let fits = if value.is_null() {
            data.element.is_reference_type()
        } else {
            self.is_instance(&value, &data.element)?
        };
        if !fits {
            let actual = if value.is_null() {
                "null".to_string()
            } else {
                self.type_of(&value)?.to_string()
            };
            return Err(RuntimeError::ArrayElementTypeMismatch {
                expected: data.element.to_string(),
                actual,
            });
        }
        let value = if data.element.is_reference_type() {
            self.box_value(value)?
        } else {
            value
        };
        data.items.lock()[flat] = value;
        Ok(())
    }

    /// A writable reference to an element. `expected` is the element type
    /// the caller believes the array has; it must be the actual one.
    pub fn array_address(&self, array: &Value, indices: &[usize], expected: &TypeHandle) -> RtResult<Location> {
        let obj = array_of(array)?;
        let data = obj.array().ok_or_else(|| RuntimeError::invalid_cast(obj.ty().to_string(), "array"))?;
        if data.element != *expected {
            return Err(RuntimeError::ArrayElementTypeMismatch {
                expected: expected.to_string(),
                actual: data.element.to_string(),
            });
        }
        let index = data.flat_index(indices)?;
        Ok(Location::Element {
            array: obj.clone(),
            index,
        })
    }
}

#[cfg(test)]
mod tests {
    use canon_types::{Catalog, TypeDef};

    use super::*;

    fn runtime() -> Runtime {
        let mut catalog = Catalog::new();
        catalog.add_type(TypeDef::class("Animal"));
        let dog = TypeDef::class("Dog").extends(Ty::def(canon_types::TypeDefId(0)));
        catalog.add_type(dog);
        Runtime::builder(catalog).build().unwrap()
    }

    #[test]
    fn multi_dimensional_indexing_is_row_major() {
        let rt = runtime();
        let int = rt.load(&Ty::int32()).unwrap();
        let grid = rt.new_array(&int, &[2, 3]).unwrap();
        rt.array_store(&grid, &[1, 2], Value::I32(9)).unwrap();
        assert_eq!(rt.array_length(&grid).unwrap(), 6);
        assert_eq!(rt.array_load(&grid, &[1, 2]).unwrap(), Value::I32(9));
        assert!(matches!(
            rt.array_load(&grid, &[2, 0]),
            Err(RuntimeError::IndexOutOfRange { index: 2, length: 2 })
        ));
        assert_eq!(rt.type_of(&grid).unwrap().to_string(), "Int32[,]");
    }

    #[test]
    fn covariant_store_checks_actual_element_type() {
        let rt = runtime();
        let animal = rt.load_named("Animal").unwrap();
        let dog = rt.load_named("Dog").unwrap();
        let dogs = rt.new_array(&dog, &[1]).unwrap();

        // A Dog[] is an Animal[].
        let animals_ty = rt.load(&Ty::array(animal.ty.clone())).unwrap();
        assert!(rt.is_instance(&dogs, &animals_ty).unwrap());

        let cat = Value::Object(rt.new_object(&animal).unwrap());
        let err = rt.array_store(&dogs, &[0], cat).unwrap_err();
        assert!(matches!(err, RuntimeError::ArrayElementTypeMismatch { .. }));

        let rex = Value::Object(rt.new_object(&dog).unwrap());
        rt.array_store(&dogs, &[0], rex.clone()).unwrap();
        assert_eq!(rt.array_load(&dogs, &[0]).unwrap(), rex);
    }

    #[test]
    fn address_requires_exact_element_type() {
        let rt = runtime();
        let animal = rt.load_named("Animal").unwrap();
        let dog = rt.load_named("Dog").unwrap();
        let dogs = rt.new_array(&dog, &[2]).unwrap();

        let err = rt.array_address(&dogs, &[0], &animal).unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::ArrayElementTypeMismatch { ref expected, ref actual }
                if expected == "Animal" && actual == "Dog"
        ));
        let slot = rt.array_address(&dogs, &[1], &dog).unwrap();
        assert_eq!(slot.load().unwrap(), Value::Null);
    }
}
