//! Definitions held by the catalog: types, fields, methods and the
//! dictionary-slot schema entries that shared code declares.

use serde::{Deserialize, Serialize};

use crate::ty::{MethodDefId, Ty, TypeDefId};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeKind {
    Class,
    Struct,
    Interface,
}

/// Variance annotation of a generic parameter. Only meaningful on interfaces.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Variance {
    #[default]
    Invariant,
    /// `out T`
    Covariant,
    /// `in T`
    Contravariant,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenericParam {
    pub name: String,
    pub variance: Variance,
}

impl GenericParam {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            variance: Variance::Invariant,
        }
    }

    pub fn with_variance(name: &str, variance: Variance) -> Self {
        Self {
            name: name.to_string(),
            variance,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldStorage {
    Instance,
    Static,
    ThreadStatic,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    /// Field type in terms of the declaring type's generic parameters.
    pub ty: Ty,
    pub storage: FieldStorage,
}

// ---------------------------------------------------------------------------
// TypeDef
// ---------------------------------------------------------------------------

/// An open (or non-generic) type definition.
///
/// `base` and `interfaces` are expressed in terms of this definition's own
/// generic parameters (`Ty::Param`). The `dictionary` is the slot schema used
/// by the shared code of every non-generic method on this type; generic
/// methods carry their own schema on [`MethodDef::dictionary`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TypeDef {
    pub id: TypeDefId,
    pub name: String,
    pub kind: TypeKind,
    pub generic_params: Vec<GenericParam>,
    pub base: Option<Ty>,
    pub interfaces: Vec<Ty>,
    pub fields: Vec<FieldDef>,
    pub methods: Vec<MethodDefId>,
    pub class_ctor: Option<MethodDefId>,
    pub dictionary: Vec<GenericLookup>,
}

impl TypeDef {
    fn with_kind(name: &str, kind: TypeKind) -> Self {
        Self {
            id: TypeDefId(u32::MAX),
            name: name.to_string(),
            kind,
            generic_params: Vec::new(),
            base: None,
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            class_ctor: None,
            dictionary: Vec::new(),
        }
    }

    pub fn class(name: &str) -> Self {
        Self::with_kind(name, TypeKind::Class)
    }

    pub fn structure(name: &str) -> Self {
        Self::with_kind(name, TypeKind::Struct)
    }

    pub fn interface(name: &str) -> Self {
        Self::with_kind(name, TypeKind::Interface)
    }

    /// Declare invariant generic parameters.
    pub fn generics(mut self, names: &[&str]) -> Self {
        self.generic_params
            .extend(names.iter().map(|n| GenericParam::new(n)));
        self
    }

    /// Declare a single generic parameter with an explicit variance.
    pub fn variant(mut self, name: &str, variance: Variance) -> Self {
        self.generic_params
            .push(GenericParam::with_variance(name, variance));
        self
    }

    pub fn extends(mut self, base: Ty) -> Self {
        self.base = Some(base);
        self
    }

    pub fn implements(mut self, iface: Ty) -> Self {
        self.interfaces.push(iface);
        self
    }

    pub fn field(self, name: &str, ty: Ty) -> Self {
        self.field_with(name, ty, FieldStorage::Instance)
    }

    pub fn static_field(self, name: &str, ty: Ty) -> Self {
        self.field_with(name, ty, FieldStorage::Static)
    }

    pub fn thread_static_field(self, name: &str, ty: Ty) -> Self {
        self.field_with(name, ty, FieldStorage::ThreadStatic)
    }

    pub fn field_with(mut self, name: &str, ty: Ty, storage: FieldStorage) -> Self {
        self.fields.push(FieldDef {
            name: name.to_string(),
            ty,
            storage,
        });
        self
    }

    pub fn lookup(mut self, lookup: GenericLookup) -> Self {
        self.dictionary.push(lookup);
        self
    }

    pub fn is_generic(&self) -> bool {
        !self.generic_params.is_empty()
    }

    pub fn arity(&self) -> usize {
        self.generic_params.len()
    }

    /// The definition applied to its own parameters, e.g. `Foo<!0, !1>`.
    pub fn open_ty(&self) -> Ty {
        Ty::Named(
            self.id,
            (0..self.generic_params.len() as u16).map(Ty::Param).collect(),
        )
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }
}

// ---------------------------------------------------------------------------
// MethodDef
// ---------------------------------------------------------------------------

/// How a method participates in virtual dispatch.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Virtuality {
    NonVirtual,
    /// Introduces a fresh vtable slot; hides a base method with the same
    /// signature instead of overriding it.
    NewSlot,
    /// Replaces the most-derived matching base slot.
    Override,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MethodDef {
    pub id: MethodDefId,
    pub owner: TypeDefId,
    pub name: String,
    pub generic_params: Vec<GenericParam>,
    /// Parameter types; `Ty::Param` refers to the owner's parameters and
    /// `Ty::MethodParam` to this method's.
    pub params: Vec<Ty>,
    pub ret: Ty,
    pub is_static: bool,
    pub virtuality: Virtuality,
    pub sealed: bool,
    pub is_abstract: bool,
    /// Interface (in terms of the owner's parameters) this method explicitly
    /// implements. The method's `name` is the interface method's name.
    pub explicit_impl: Option<Ty>,
    pub is_class_ctor: bool,
    pub dictionary: Vec<GenericLookup>,
}

impl MethodDef {
    /// A non-virtual instance method returning `Void`.
    pub fn new(name: &str) -> Self {
        Self {
            id: MethodDefId(u32::MAX),
            owner: TypeDefId(u32::MAX),
            name: name.to_string(),
            generic_params: Vec::new(),
            params: Vec::new(),
            ret: Ty::void(),
            is_static: false,
            virtuality: Virtuality::NonVirtual,
            sealed: false,
            is_abstract: false,
            explicit_impl: None,
            is_class_ctor: false,
            dictionary: Vec::new(),
        }
    }

    pub fn static_method(name: &str) -> Self {
        Self {
            is_static: true,
            ..Self::new(name)
        }
    }

    /// The one-time type initializer.
    pub fn class_ctor() -> Self {
        Self {
            is_class_ctor: true,
            ..Self::static_method(".cctor")
        }
    }

    pub fn generics(mut self, names: &[&str]) -> Self {
        self.generic_params
            .extend(names.iter().map(|n| GenericParam::new(n)));
        self
    }

    pub fn param(mut self, ty: Ty) -> Self {
        self.params.push(ty);
        self
    }

    pub fn returns(mut self, ty: Ty) -> Self {
        self.ret = ty;
        self
    }

    pub fn new_slot(mut self) -> Self {
        self.virtuality = Virtuality::NewSlot;
        self
    }

    pub fn overrides(mut self) -> Self {
        self.virtuality = Virtuality::Override;
        self
    }

    pub fn sealed(mut self) -> Self {
        self.sealed = true;
        self
    }

    pub fn abstract_method(mut self) -> Self {
        self.is_abstract = true;
        if self.virtuality == Virtuality::NonVirtual {
            self.virtuality = Virtuality::NewSlot;
        }
        self
    }

    pub fn explicit(mut self, iface: Ty) -> Self {
        self.explicit_impl = Some(iface);
        self
    }

    pub fn lookup(mut self, lookup: GenericLookup) -> Self {
        self.dictionary.push(lookup);
        self
    }

    pub fn is_generic(&self) -> bool {
        !self.generic_params.is_empty()
    }

    pub fn is_virtual(&self) -> bool {
        self.virtuality != Virtuality::NonVirtual
    }

    pub fn arity(&self) -> usize {
        self.generic_params.len()
    }
}

// ---------------------------------------------------------------------------
// References and dictionary lookups
// ---------------------------------------------------------------------------

/// A method named through a (possibly open) owner type plus method arguments.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MethodRef {
    pub owner: Ty,
    pub method: MethodDefId,
    pub method_args: Vec<Ty>,
}

impl MethodRef {
    pub fn new(owner: Ty, method: MethodDefId) -> Self {
        Self {
            owner,
            method,
            method_args: Vec::new(),
        }
    }

    pub fn generic(owner: Ty, method: MethodDefId, method_args: Vec<Ty>) -> Self {
        Self {
            owner,
            method,
            method_args,
        }
    }

    pub fn subst(&self, type_args: &[Ty], method_args: &[Ty]) -> MethodRef {
        MethodRef {
            owner: self.owner.subst(type_args, method_args),
            method: self.method,
            method_args: self
                .method_args
                .iter()
                .map(|a| a.subst(type_args, method_args))
                .collect(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldRef {
    pub owner: Ty,
    pub name: String,
}

impl FieldRef {
    pub fn new(owner: Ty, name: &str) -> Self {
        Self {
            owner,
            name: name.to_string(),
        }
    }
}

/// One entry of a dictionary slot schema.
///
/// Shared code refers to instantiation-dependent handles by slot index; the
/// slot index is the position of the lookup in the owning definition's
/// `dictionary` list. Type expressions are resolved against the exact type
/// (and method) arguments of the dictionary being consulted.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GenericLookup {
    /// A type handle.
    Type(Ty),
    /// An exact method instantiation to call (directly or virtually).
    Method(MethodRef),
    /// A callable entry point (unbound fat pointer) for a method.
    MethodHandle(MethodRef),
    /// A call through a generic constraint on `constrained`.
    Constrained { constrained: Ty, method: MethodRef },
    /// The static storage block of an exact type.
    Statics(Ty),
    /// The per-thread static storage of an exact type.
    ThreadStatics(Ty),
    /// A field handle (storage kind, slot, offset).
    Field(FieldRef),
    /// Size, alignment and field offsets of a type.
    Layout(Ty),
}

impl GenericLookup {
    pub fn kind(&self) -> &'static str {
        match self {
            GenericLookup::Type(_) => "type",
            GenericLookup::Method(_) => "method",
            GenericLookup::MethodHandle(_) => "handle",
            GenericLookup::Constrained { .. } => "constrained",
            GenericLookup::Statics(_) => "statics",
            GenericLookup::ThreadStatics(_) => "thread-statics",
            GenericLookup::Field(_) => "field",
            GenericLookup::Layout(_) => "layout",
        }
    }

    /// Every type expression mentioned by this lookup.
    pub fn types(&self) -> Vec<&Ty> {
        match self {
            GenericLookup::Type(ty)
            | GenericLookup::Statics(ty)
            | GenericLookup::ThreadStatics(ty)
            | GenericLookup::Layout(ty) => vec![ty],
            GenericLookup::Method(m) | GenericLookup::MethodHandle(m) => {
                let mut out = vec![&m.owner];
                out.extend(m.method_args.iter());
                out
            }
            GenericLookup::Constrained {
                constrained,
                method,
            } => {
                let mut out = vec![constrained, &method.owner];
                out.extend(method.method_args.iter());
                out
            }
            GenericLookup::Field(f) => vec![&f.owner],
        }
    }

    /// The method this lookup targets, if any.
    pub fn method(&self) -> Option<MethodDefId> {
        match self {
            GenericLookup::Method(m)
            | GenericLookup::MethodHandle(m)
            | GenericLookup::Constrained { method: m, .. } => Some(m.method),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_ty_applies_own_params() {
        let mut def = TypeDef::class("Map").generics(&["K", "V"]);
        def.id = TypeDefId(7);
        assert_eq!(
            def.open_ty(),
            Ty::named(TypeDefId(7), vec![Ty::param(0), Ty::param(1)])
        );
    }

    #[test]
    fn abstract_method_gets_a_slot() {
        let m = MethodDef::new("Frob").abstract_method();
        assert!(m.is_virtual());
        assert!(m.is_abstract);
    }

    #[test]
    fn method_ref_subst_closes_owner_and_args() {
        let owner = Ty::named(TypeDefId(1), vec![Ty::param(0)]);
        let r = MethodRef::generic(owner, MethodDefId(3), vec![Ty::method_param(0)]);
        let closed = r.subst(&[Ty::string()], &[Ty::int32()]);
        assert_eq!(closed.owner, Ty::named(TypeDefId(1), vec![Ty::string()]));
        assert_eq!(closed.method_args, vec![Ty::int32()]);
    }

    #[test]
    fn constrained_lookup_lists_all_types() {
        let lookup = GenericLookup::Constrained {
            constrained: Ty::param(0),
            method: MethodRef::new(Ty::def(TypeDefId(2)), MethodDefId(0)),
        };
        assert_eq!(lookup.types().len(), 2);
        assert_eq!(lookup.method(), Some(MethodDefId(0)));
        assert_eq!(lookup.kind(), "constrained");
    }
}
