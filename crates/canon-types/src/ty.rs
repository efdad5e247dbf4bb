//! Type expressions for the canon type system.
//!
//! Defines `Ty`, the structural representation of every type reference the
//! catalog and the runtime deal with: primitives, named (possibly generic)
//! definitions, arrays, open generic parameters and the shared `__Canon`
//! marker that stands in for any reference type inside canonical code.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::catalog::Catalog;

/// Index of a type definition in a [`Catalog`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TypeDefId(pub u32);

/// Index of a method definition in a [`Catalog`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MethodDefId(pub u32);

// ---------------------------------------------------------------------------
// Prim
// ---------------------------------------------------------------------------

/// Built-in types that need no catalog definition.
///
/// `Object` and `String` are reference types; everything else is a value
/// type with a fixed size. `Void` is only valid as a return type.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Prim {
    Void,
    Bool,
    U8,
    I32,
    I64,
    F32,
    F64,
    Object,
    String,
}

impl Prim {
    /// The runtime name of the primitive, e.g. `Int32`.
    pub fn name(self) -> &'static str {
        match self {
            Prim::Void => "Void",
            Prim::Bool => "Boolean",
            Prim::U8 => "Byte",
            Prim::I32 => "Int32",
            Prim::I64 => "Int64",
            Prim::F32 => "Single",
            Prim::F64 => "Double",
            Prim::Object => "Object",
            Prim::String => "String",
        }
    }

    /// Look a primitive up by its runtime name.
    pub fn from_name(name: &str) -> Option<Prim> {
        let prim = match name {
            "Void" => Prim::Void,
            "Boolean" => Prim::Bool,
            "Byte" => Prim::U8,
            "Int32" => Prim::I32,
            "Int64" => Prim::I64,
            "Single" => Prim::F32,
            "Double" => Prim::F64,
            "Object" => Prim::Object,
            "String" => Prim::String,
            _ => return None,
        };
        Some(prim)
    }

    pub fn is_reference(self) -> bool {
        matches!(self, Prim::Object | Prim::String)
    }

    /// Size in bytes of a value of this primitive when stored inline.
    /// References are pointer sized.
    pub fn size(self) -> usize {
        match self {
            Prim::Void => 0,
            Prim::Bool | Prim::U8 => 1,
            Prim::I32 | Prim::F32 => 4,
            Prim::I64 | Prim::F64 | Prim::Object | Prim::String => 8,
        }
    }
}

// ---------------------------------------------------------------------------
// Ty
// ---------------------------------------------------------------------------

/// A type reference.
///
/// - `Prim`: a built-in type
/// - `Named`: a catalog definition applied to type arguments (empty for
///   non-generic definitions)
/// - `Array`: an array of `rank` dimensions (`rank == 1` is a vector)
/// - `Param` / `MethodParam`: the n-th generic parameter of the enclosing type
///   or method; only valid inside definitions
/// - `Canon`: the shared marker every reference-type argument canonicalizes to
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Ty {
    Prim(Prim),
    Named(TypeDefId, Vec<Ty>),
    Array(Box<Ty>, u8),
    Param(u16),
    MethodParam(u16),
    Canon,
}

impl Ty {
    pub fn void() -> Ty {
        Ty::Prim(Prim::Void)
    }

    pub fn bool() -> Ty {
        Ty::Prim(Prim::Bool)
    }

    pub fn u8() -> Ty {
        Ty::Prim(Prim::U8)
    }

    pub fn int32() -> Ty {
        Ty::Prim(Prim::I32)
    }

    pub fn int64() -> Ty {
        Ty::Prim(Prim::I64)
    }

    pub fn float32() -> Ty {
        Ty::Prim(Prim::F32)
    }

    pub fn float64() -> Ty {
        Ty::Prim(Prim::F64)
    }

    pub fn object() -> Ty {
        Ty::Prim(Prim::Object)
    }

    pub fn string() -> Ty {
        Ty::Prim(Prim::String)
    }

    /// A non-generic named type.
    pub fn def(def: TypeDefId) -> Ty {
        Ty::Named(def, Vec::new())
    }

    /// A generic definition applied to `args`.
    pub fn named(def: TypeDefId, args: Vec<Ty>) -> Ty {
        Ty::Named(def, args)
    }

    /// A single-dimension array `elem[]`.
    pub fn array(elem: Ty) -> Ty {
        Ty::Array(Box::new(elem), 1)
    }

    /// A multi-dimensional array, e.g. `elem[,]` for `rank == 2`.
    pub fn md_array(elem: Ty, rank: u8) -> Ty {
        Ty::Array(Box::new(elem), rank)
    }

    pub fn param(index: u16) -> Ty {
        Ty::Param(index)
    }

    pub fn method_param(index: u16) -> Ty {
        Ty::MethodParam(index)
    }

    /// Whether this type mentions a generic parameter anywhere.
    pub fn is_open(&self) -> bool {
        match self {
            Ty::Param(_) | Ty::MethodParam(_) => true,
            Ty::Named(_, args) => args.iter().any(Ty::is_open),
            Ty::Array(elem, _) => elem.is_open(),
            Ty::Prim(_) | Ty::Canon => false,
        }
    }

    /// Whether this type mentions the shared `__Canon` marker.
    pub fn contains_canon(&self) -> bool {
        match self {
            Ty::Canon => true,
            Ty::Named(_, args) => args.iter().any(Ty::contains_canon),
            Ty::Array(elem, _) => elem.contains_canon(),
            _ => false,
        }
    }

    /// Nesting depth of the type expression (a leaf has depth 1).
    pub fn depth(&self) -> usize {
        match self {
            Ty::Named(_, args) => 1 + args.iter().map(Ty::depth).max().unwrap_or(0),
            Ty::Array(elem, _) => 1 + elem.depth(),
            _ => 1,
        }
    }

    /// Replace generic parameters with the given arguments.
    ///
    /// Parameters without a corresponding argument are left in place, so a
    /// partially closed type stays open.
    pub fn subst(&self, type_args: &[Ty], method_args: &[Ty]) -> Ty {
        match self {
            Ty::Param(i) => type_args
                .get(*i as usize)
                .cloned()
                .unwrap_or(Ty::Param(*i)),
            Ty::MethodParam(i) => method_args
                .get(*i as usize)
                .cloned()
                .unwrap_or(Ty::MethodParam(*i)),
            Ty::Named(def, args) => Ty::Named(
                *def,
                args.iter().map(|a| a.subst(type_args, method_args)).collect(),
            ),
            Ty::Array(elem, rank) => Ty::Array(Box::new(elem.subst(type_args, method_args)), *rank),
            Ty::Prim(_) | Ty::Canon => self.clone(),
        }
    }

    /// Call `f` for every definition referenced by this type.
    pub fn visit_defs(&self, f: &mut impl FnMut(TypeDefId)) {
        match self {
            Ty::Named(def, args) => {
                f(*def);
                for arg in args {
                    arg.visit_defs(f);
                }
            }
            Ty::Array(elem, _) => elem.visit_defs(f),
            _ => {}
        }
    }

    /// Render this type with definition names taken from `catalog`.
    pub fn display<'a>(&'a self, catalog: &'a Catalog) -> TyDisplay<'a> {
        TyDisplay { ty: self, catalog }
    }
}

/// Display adapter returned by [`Ty::display`].
pub struct TyDisplay<'a> {
    ty: &'a Ty,
    catalog: &'a Catalog,
}

impl fmt::Display for TyDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ty {
            Ty::Prim(p) => write!(f, "{}", p.name()),
            Ty::Named(def, args) => {
                match self.catalog.try_type_def(*def) {
                    Some(td) => write!(f, "{}", td.name)?,
                    None => write!(f, "<def#{}>", def.0)?,
                }
                if !args.is_empty() {
                    write!(f, "<")?;
                    for (i, a) in args.iter().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{}", a.display(self.catalog))?;
                    }
                    write!(f, ">")?;
                }
                Ok(())
            }
            Ty::Array(elem, rank) => {
                write!(f, "{}[", elem.display(self.catalog))?;
                for _ in 1..*rank {
                    write!(f, ",")?;
                }
                write!(f, "]")
            }
            Ty::Param(i) => write!(f, "!{}", i),
            Ty::MethodParam(i) => write!(f, "!!{}", i),
            Ty::Canon => write!(f, "__Canon"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::def::TypeDef;

    #[test]
    fn subst_replaces_type_and_method_params() {
        let mut cat = Catalog::new();
        let list = cat.add_type(TypeDef::class("List").generics(&["T"]));
        let open = Ty::named(list, vec![Ty::param(0)]);
        let nested = Ty::md_array(Ty::named(list, vec![Ty::method_param(0)]), 2);

        assert_eq!(
            open.subst(&[Ty::string()], &[]),
            Ty::named(list, vec![Ty::string()])
        );
        assert_eq!(
            nested.subst(&[], &[Ty::int32()]),
            Ty::md_array(Ty::named(list, vec![Ty::int32()]), 2)
        );
    }

    #[test]
    fn subst_leaves_missing_params_open() {
        let ty = Ty::array(Ty::param(1));
        let out = ty.subst(&[Ty::int32()], &[]);
        assert_eq!(out, Ty::array(Ty::param(1)));
        assert!(out.is_open());
    }

    #[test]
    fn display_uses_catalog_names() {
        let mut cat = Catalog::new();
        let pair = cat.add_type(TypeDef::structure("Pair").generics(&["A", "B"]));
        let ty = Ty::md_array(
            Ty::named(pair, vec![Ty::string(), Ty::array(Ty::int32())]),
            3,
        );
        insta::assert_snapshot!(ty.display(&cat).to_string(), @"Pair<String, Int32[]>[,,]");
        assert_eq!(Ty::method_param(0).display(&cat).to_string(), "!!0");
        assert_eq!(Ty::Canon.display(&cat).to_string(), "__Canon");
    }

    #[test]
    fn depth_counts_nesting() {
        assert_eq!(Ty::int32().depth(), 1);
        assert_eq!(Ty::array(Ty::array(Ty::int32())).depth(), 3);
    }

    #[test]
    fn prim_names_round_trip() {
        for p in [Prim::Bool, Prim::U8, Prim::I32, Prim::I64, Prim::F32, Prim::F64, Prim::Object, Prim::String] {
            assert_eq!(Prim::from_name(p.name()), Some(p));
        }
        assert!(Prim::String.is_reference());
        assert!(!Prim::I64.is_reference());
    }
}
