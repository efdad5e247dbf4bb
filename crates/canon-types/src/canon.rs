//! Canonicalization of type arguments.
//!
//! Reference-type arguments collapse to the shared `__Canon` marker, because
//! code compiled against any reference type looks the same. Value-type
//! arguments stay distinct: a struct keeps its definition (its own arguments
//! are canonicalized recursively), a value primitive stays as is.

use std::fmt;

use serde::Serialize;

use crate::catalog::Catalog;
use crate::def::TypeKind;
use crate::ty::{Ty, TypeDefId};

/// The sharing equivalence class of a type argument list.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct CanonicalForm(pub Vec<Ty>);

impl CanonicalForm {
    pub fn args(&self) -> &[Ty] {
        &self.0
    }

    /// Whether code for this form is shared across reference types.
    pub fn is_shared(&self) -> bool {
        self.0.iter().any(Ty::contains_canon)
    }
}

/// An exact (definition, type arguments) pair: the identity used for static
/// storage and class-constructor tracking.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct Instantiation {
    pub def: TypeDefId,
    pub args: Vec<Ty>,
}

impl Instantiation {
    pub fn new(def: TypeDefId, args: Vec<Ty>) -> Self {
        Self { def, args }
    }

    pub fn ty(&self) -> Ty {
        Ty::Named(self.def, self.args.clone())
    }

    pub fn canonical_form(&self, catalog: &Catalog) -> CanonicalForm {
        canonicalize(catalog, &self.args)
    }
}

/// Canonicalize a single type argument.
pub fn canonical_type_arg(catalog: &Catalog, ty: &Ty) -> Ty {
    match ty {
        Ty::Canon => Ty::Canon,
        Ty::Prim(p) if p.is_reference() => Ty::Canon,
        Ty::Prim(_) => ty.clone(),
        Ty::Array(..) => Ty::Canon,
        Ty::Named(def, args) => match catalog.try_type_def(*def).map(|d| d.kind) {
            Some(TypeKind::Struct) => Ty::Named(
                *def,
                args.iter().map(|a| canonical_type_arg(catalog, a)).collect(),
            ),
            _ => Ty::Canon,
        },
        Ty::Param(_) | Ty::MethodParam(_) => ty.clone(),
    }
}

/// Canonicalize a type used as a code owner: the definition is kept, its
/// arguments are canonicalized.
pub fn canonical_type(catalog: &Catalog, ty: &Ty) -> Ty {
    match ty {
        Ty::Named(def, args) => Ty::Named(
            *def,
            args.iter().map(|a| canonical_type_arg(catalog, a)).collect(),
        ),
        Ty::Array(elem, rank) => Ty::Array(Box::new(canonical_type_arg(catalog, elem)), *rank),
        _ => ty.clone(),
    }
}

/// Map a type argument list to its canonical form. An empty list maps to
/// itself.
pub fn canonicalize(catalog: &Catalog, args: &[Ty]) -> CanonicalForm {
    CanonicalForm(args.iter().map(|a| canonical_type_arg(catalog, a)).collect())
}

impl fmt::Display for CanonicalForm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Without a catalog only the shape is printable.
        write!(f, "[")?;
        for (i, a) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            match a {
                Ty::Canon => write!(f, "__Canon")?,
                Ty::Prim(p) => write!(f, "{}", p.name())?,
                Ty::Named(def, _) => write!(f, "def#{}", def.0)?,
                other => write!(f, "{:?}", other)?,
            }
        }
        write!(f, "]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::def::TypeDef;

    fn catalog() -> (Catalog, TypeDefId, TypeDefId, TypeDefId, TypeDefId) {
        let mut cat = Catalog::new();
        let class = cat.add_type(TypeDef::class("ClassType"));
        let a = cat.add_type(TypeDef::structure("StructA"));
        let b = cat.add_type(TypeDef::structure("StructB"));
        let wrap = cat.add_type(TypeDef::structure("Wrap").generics(&["T"]));
        (cat, class, a, b, wrap)
    }

    #[test]
    fn reference_types_share_a_form() {
        let (cat, class, ..) = catalog();
        let strings = canonicalize(&cat, &[Ty::string()]);
        let objects = canonicalize(&cat, &[Ty::object()]);
        let classes = canonicalize(&cat, &[Ty::def(class)]);
        let arrays = canonicalize(&cat, &[Ty::array(Ty::int32())]);
        assert_eq!(strings, objects);
        assert_eq!(strings, classes);
        assert_eq!(strings, arrays);
        assert!(strings.is_shared());
    }

    #[test]
    fn value_types_stay_distinct() {
        let (cat, _, a, b, _) = catalog();
        let fa = canonicalize(&cat, &[Ty::def(a)]);
        let fb = canonicalize(&cat, &[Ty::def(b)]);
        assert_ne!(fa, fb);
        assert!(!fa.is_shared());
        assert_ne!(
            canonicalize(&cat, &[Ty::int32()]),
            canonicalize(&cat, &[Ty::int64()])
        );
    }

    #[test]
    fn struct_arguments_canonicalize_recursively() {
        let (cat, class, a, _, wrap) = catalog();
        let over_class = canonical_type_arg(&cat, &Ty::named(wrap, vec![Ty::def(class)]));
        let over_string = canonical_type_arg(&cat, &Ty::named(wrap, vec![Ty::string()]));
        let over_struct = canonical_type_arg(&cat, &Ty::named(wrap, vec![Ty::def(a)]));
        assert_eq!(over_class, Ty::named(wrap, vec![Ty::Canon]));
        assert_eq!(over_class, over_string);
        assert_ne!(over_class, over_struct);
    }

    #[test]
    fn canonicalization_is_idempotent() {
        let (cat, class, a, _, wrap) = catalog();
        let args = vec![
            Ty::def(class),
            Ty::named(wrap, vec![Ty::string()]),
            Ty::def(a),
            Ty::float64(),
        ];
        let once = canonicalize(&cat, &args);
        let twice = canonicalize(&cat, once.args());
        assert_eq!(once, twice);
    }

    #[test]
    fn empty_list_maps_to_itself() {
        let (cat, ..) = catalog();
        let form = canonicalize(&cat, &[]);
        assert!(form.args().is_empty());
        assert!(!form.is_shared());
    }

    #[test]
    fn canonical_type_keeps_the_owner() {
        let (cat, ..) = catalog();
        let mut cat = cat;
        let list = cat.add_type(TypeDef::class("List").generics(&["T"]));
        let owner = canonical_type(&cat, &Ty::named(list, vec![Ty::string()]));
        assert_eq!(owner, Ty::named(list, vec![Ty::Canon]));
        assert_eq!(owner.display(&cat).to_string(), "List<__Canon>");
    }
}
