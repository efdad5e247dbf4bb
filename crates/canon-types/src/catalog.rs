//! The type-definition catalog.
//!
//! Owns every type and method definition the runtime can instantiate. The
//! catalog is built up front (by tests, the CLI manifest loader, or a
//! compiler front end) and is immutable once handed to the runtime.

use rustc_hash::{FxHashMap, FxHashSet};

use crate::def::{GenericLookup, MethodDef, TypeDef, TypeKind, Variance, Virtuality};
use crate::error::CatalogError;
use crate::layout::SlotLayout;
use crate::ty::{MethodDefId, Prim, Ty, TypeDefId};

#[derive(Default, Debug, Clone)]
pub struct Catalog {
    types: Vec<TypeDef>,
    methods: Vec<MethodDef>,
    by_name: FxHashMap<String, TypeDefId>,
    duplicates: Vec<String>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a type definition and return its id.
    pub fn add_type(&mut self, mut def: TypeDef) -> TypeDefId {
        let id = TypeDefId(self.types.len() as u32);
        def.id = id;
        if self.by_name.insert(def.name.clone(), id).is_some() {
            self.duplicates.push(def.name.clone());
        }
        self.types.push(def);
        id
    }

    /// Register a method on `owner` and return its id.
    ///
    /// Interface instance methods are always abstract virtual slots; a method
    /// built with [`MethodDef::class_ctor`] becomes the owner's initializer.
    pub fn add_method(&mut self, owner: TypeDefId, mut def: MethodDef) -> MethodDefId {
        let id = MethodDefId(self.methods.len() as u32);
        def.id = id;
        def.owner = owner;
        let td = &mut self.types[owner.0 as usize];
        if td.kind == TypeKind::Interface && !def.is_static {
            def.is_abstract = true;
            def.virtuality = Virtuality::NewSlot;
        }
        if def.is_class_ctor {
            td.class_ctor = Some(id);
        }
        td.methods.push(id);
        self.methods.push(def);
        id
    }

    /// Set the base type after registration (for self-referential hierarchies).
    pub fn set_base(&mut self, id: TypeDefId, base: Ty) {
        self.types[id.0 as usize].base = Some(base);
    }

    pub fn add_interface(&mut self, id: TypeDefId, iface: Ty) {
        self.types[id.0 as usize].interfaces.push(iface);
    }

    /// Append a lookup to a type's dictionary schema and return its slot.
    pub fn add_type_lookup(&mut self, id: TypeDefId, lookup: GenericLookup) -> usize {
        let dict = &mut self.types[id.0 as usize].dictionary;
        dict.push(lookup);
        dict.len() - 1
    }

    /// Append a lookup to a generic method's dictionary schema and return its slot.
    pub fn add_method_lookup(&mut self, id: MethodDefId, lookup: GenericLookup) -> usize {
        let dict = &mut self.methods[id.0 as usize].dictionary;
        dict.push(lookup);
        dict.len() - 1
    }

    pub fn type_def(&self, id: TypeDefId) -> &TypeDef {
        &self.types[id.0 as usize]
    }

    pub fn try_type_def(&self, id: TypeDefId) -> Option<&TypeDef> {
        self.types.get(id.0 as usize)
    }

    pub fn type_def_mut(&mut self, id: TypeDefId) -> &mut TypeDef {
        &mut self.types[id.0 as usize]
    }

    pub fn method(&self, id: MethodDefId) -> &MethodDef {
        &self.methods[id.0 as usize]
    }

    pub fn try_method(&self, id: MethodDefId) -> Option<&MethodDef> {
        self.methods.get(id.0 as usize)
    }

    pub fn method_mut(&mut self, id: MethodDefId) -> &mut MethodDef {
        &mut self.methods[id.0 as usize]
    }

    pub fn type_by_name(&self, name: &str) -> Option<TypeDefId> {
        self.by_name.get(name).copied()
    }

    /// First method named `name` declared directly on `owner`.
    pub fn method_by_name(&self, owner: TypeDefId, name: &str) -> Option<MethodDefId> {
        self.methods_named(owner, name).next()
    }

    pub fn methods_named<'a>(
        &'a self,
        owner: TypeDefId,
        name: &'a str,
    ) -> impl Iterator<Item = MethodDefId> + 'a {
        self.type_def(owner)
            .methods
            .iter()
            .copied()
            .filter(move |&m| self.method(m).name == name)
    }

    pub fn field_index(&self, owner: TypeDefId, name: &str) -> Option<usize> {
        self.type_def(owner).field_index(name)
    }

    pub fn types(&self) -> impl Iterator<Item = &TypeDef> {
        self.types.iter()
    }

    pub fn methods(&self) -> impl Iterator<Item = &MethodDef> {
        self.methods.iter()
    }

    pub fn type_count(&self) -> usize {
        self.types.len()
    }

    pub fn method_count(&self) -> usize {
        self.methods.len()
    }

    pub fn kind_of(&self, ty: &Ty) -> Option<TypeKind> {
        match ty {
            Ty::Named(def, _) => self.try_type_def(*def).map(|d| d.kind),
            _ => None,
        }
    }

    /// Value types: non-reference primitives and structs.
    pub fn is_value_type(&self, ty: &Ty) -> bool {
        match ty {
            Ty::Prim(p) => !p.is_reference() && *p != Prim::Void,
            Ty::Named(..) => self.kind_of(ty) == Some(TypeKind::Struct),
            _ => false,
        }
    }

    /// Reference types: `Object`, `String`, classes, interfaces, arrays and
    /// the shared `__Canon` marker. Generic parameters are neither.
    pub fn is_reference_type(&self, ty: &Ty) -> bool {
        match ty {
            Ty::Prim(p) => p.is_reference(),
            Ty::Named(..) => matches!(
                self.kind_of(ty),
                Some(TypeKind::Class) | Some(TypeKind::Interface)
            ),
            Ty::Array(..) | Ty::Canon => true,
            Ty::Param(_) | Ty::MethodParam(_) => false,
        }
    }

    /// Human-readable `Owner::Name` for a method.
    pub fn method_path(&self, id: MethodDefId) -> String {
        let m = self.method(id);
        format!("{}::{}", self.type_def(m.owner).name, m.name)
    }

    // -----------------------------------------------------------------------
    // Validation
    // -----------------------------------------------------------------------

    /// Check the whole catalog; returns every problem found.
    pub fn validate(&self) -> Result<(), Vec<CatalogError>> {
        let mut errors = Vec::new();

        for name in &self.duplicates {
            errors.push(CatalogError::DuplicateType(name.clone()));
        }

        for td in &self.types {
            self.validate_type(td, &mut errors);
        }
        for md in &self.methods {
            self.validate_method(md, &mut errors);
        }

        let cycles = self.base_cycles();
        let has_cycle = !cycles.is_empty();
        errors.extend(cycles);

        // Slot layouts only make sense over an acyclic, well-kinded hierarchy.
        if errors.is_empty() && !has_cycle {
            if let Err(e) = self.all_layouts() {
                errors.push(e);
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    fn validate_type(&self, td: &TypeDef, errors: &mut Vec<CatalogError>) {
        let ctx = td.name.as_str();
        let arity = td.arity() as u16;

        if td.kind != TypeKind::Interface
            && td
                .generic_params
                .iter()
                .any(|p| p.variance != Variance::Invariant)
        {
            errors.push(CatalogError::VarianceOnNonInterface(td.name.clone()));
        }

        if let Some(base) = &td.base {
            self.check_ty(base, ctx, arity, 0, errors);
            let ok = td.kind == TypeKind::Class && self.kind_of(base) == Some(TypeKind::Class);
            if !ok {
                errors.push(CatalogError::InvalidBase {
                    owner: td.name.clone(),
                    base: base.display(self).to_string(),
                });
            }
        }

        for iface in &td.interfaces {
            self.check_ty(iface, ctx, arity, 0, errors);
            if self.kind_of(iface) != Some(TypeKind::Interface) {
                errors.push(CatalogError::NotAnInterface {
                    owner: td.name.clone(),
                    ty: iface.display(self).to_string(),
                });
            }
        }

        for field in &td.fields {
            self.check_ty(&field.ty, ctx, arity, 0, errors);
            if field.ty == Ty::void() {
                errors.push(CatalogError::UnsupportedConstructedType {
                    context: format!("{}.{}", td.name, field.name),
                    reason: "fields cannot have type Void".into(),
                });
            }
        }

        for lookup in &td.dictionary {
            for ty in lookup.types() {
                self.check_ty(ty, ctx, arity, 0, errors);
            }
        }
    }

    fn validate_method(&self, md: &MethodDef, errors: &mut Vec<CatalogError>) {
        let owner = self.type_def(md.owner);
        let ctx = format!("{}::{}", owner.name, md.name);
        let arity = owner.arity() as u16;
        let marity = md.arity() as u16;

        for p in &md.params {
            self.check_ty(p, &ctx, arity, marity, errors);
            if *p == Ty::void() {
                errors.push(CatalogError::UnsupportedConstructedType {
                    context: ctx.clone(),
                    reason: "parameters cannot have type Void".into(),
                });
            }
        }
        self.check_ty(&md.ret, &ctx, arity, marity, errors);

        if let Some(iface) = &md.explicit_impl {
            self.check_ty(iface, &ctx, arity, 0, errors);
            if self.kind_of(iface) != Some(TypeKind::Interface) {
                errors.push(CatalogError::NotAnInterface {
                    owner: ctx.clone(),
                    ty: iface.display(self).to_string(),
                });
            }
        }

        if !md.is_generic() && !md.dictionary.is_empty() {
            errors.push(CatalogError::MisplacedLookup {
                owner: owner.name.clone(),
                method: md.name.clone(),
            });
        }
        for lookup in &md.dictionary {
            for ty in lookup.types() {
                self.check_ty(ty, &ctx, arity, marity, errors);
            }
        }
    }

    /// Arity, parameter binding and `Void` placement checks on a type expression.
    fn check_ty(
        &self,
        ty: &Ty,
        ctx: &str,
        arity: u16,
        method_arity: u16,
        errors: &mut Vec<CatalogError>,
    ) {
        match ty {
            Ty::Prim(_) | Ty::Canon => {}
            Ty::Param(i) if *i >= arity => errors.push(CatalogError::UnboundParam {
                context: ctx.to_string(),
                index: *i,
            }),
            Ty::MethodParam(i) if *i >= method_arity => errors.push(CatalogError::UnboundParam {
                context: ctx.to_string(),
                index: *i,
            }),
            Ty::Param(_) | Ty::MethodParam(_) => {}
            Ty::Named(def, args) => {
                let Some(td) = self.try_type_def(*def) else {
                    errors.push(CatalogError::UnknownType(format!("#{}", def.0)));
                    return;
                };
                if td.arity() != args.len() {
                    errors.push(CatalogError::ArityMismatch {
                        name: td.name.clone(),
                        expected: td.arity(),
                        found: args.len(),
                    });
                }
                for arg in args {
                    if *arg == Ty::void() {
                        errors.push(CatalogError::UnsupportedConstructedType {
                            context: ctx.to_string(),
                            reason: "Void cannot be a type argument".into(),
                        });
                    }
                    self.check_ty(arg, ctx, arity, method_arity, errors);
                }
            }
            Ty::Array(elem, rank) => {
                if **elem == Ty::void() {
                    errors.push(CatalogError::UnsupportedConstructedType {
                        context: ctx.to_string(),
                        reason: "arrays of Void are not supported".into(),
                    });
                }
                if *rank == 0 {
                    errors.push(CatalogError::UnsupportedConstructedType {
                        context: ctx.to_string(),
                        reason: "arrays must have rank of at least 1".into(),
                    });
                }
                self.check_ty(elem, ctx, arity, method_arity, errors);
            }
        }
    }

    /// Detect cycles in the base-class relation with a DFS over definitions.
    fn base_cycles(&self) -> Vec<CatalogError> {
        let mut errors = Vec::new();
        let mut done: FxHashSet<TypeDefId> = FxHashSet::default();

        for td in &self.types {
            let mut path: Vec<TypeDefId> = Vec::new();
            let mut visiting: FxHashSet<TypeDefId> = FxHashSet::default();
            let mut current = Some(td.id);
            while let Some(id) = current {
                if done.contains(&id) {
                    break;
                }
                if !visiting.insert(id) {
                    let start = path.iter().position(|p| *p == id).unwrap_or(0);
                    let mut names: Vec<String> = path[start..]
                        .iter()
                        .map(|p| self.type_def(*p).name.clone())
                        .collect();
                    names.push(self.type_def(id).name.clone());
                    errors.push(CatalogError::BaseCycle(names));
                    break;
                }
                path.push(id);
                current = match &self.type_def(id).base {
                    Some(Ty::Named(base, _)) if self.try_type_def(*base).is_some() => Some(*base),
                    _ => None,
                };
            }
            done.extend(path);
        }
        errors
    }

    /// Compute slot layouts for every definition, bases first.
    ///
    /// Only valid on a catalog without base cycles.
    pub fn all_layouts(&self) -> Result<FxHashMap<TypeDefId, SlotLayout>, CatalogError> {
        let mut layouts: FxHashMap<TypeDefId, SlotLayout> = FxHashMap::default();
        for td in &self.types {
            self.layout_into(td.id, &mut layouts)?;
        }
        Ok(layouts)
    }

    fn layout_into(
        &self,
        id: TypeDefId,
        layouts: &mut FxHashMap<TypeDefId, SlotLayout>,
    ) -> Result<(), CatalogError> {
        if layouts.contains_key(&id) {
            return Ok(());
        }
        let base_def = match &self.type_def(id).base {
            Some(Ty::Named(base, _)) => Some(*base),
            _ => None,
        };
        if let Some(base) = base_def {
            self.layout_into(base, layouts)?;
        }
        let layout = SlotLayout::compute(self, id, base_def.and_then(|b| layouts.get(&b)))?;
        layouts.insert(id, layout);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::def::{MethodRef, TypeDef};

    #[test]
    fn add_method_wires_owner_and_class_ctor() {
        let mut cat = Catalog::new();
        let foo = cat.add_type(TypeDef::class("Foo").generics(&["T"]));
        let m = cat.add_method(foo, MethodDef::new("Bar"));
        let cctor = cat.add_method(foo, MethodDef::class_ctor());

        assert_eq!(cat.method(m).owner, foo);
        assert_eq!(cat.type_def(foo).class_ctor, Some(cctor));
        assert_eq!(cat.method_by_name(foo, "Bar"), Some(m));
        assert_eq!(cat.type_by_name("Foo"), Some(foo));
    }

    #[test]
    fn interface_methods_are_abstract_slots() {
        let mut cat = Catalog::new();
        let iface = cat.add_type(TypeDef::interface("IFoo"));
        let m = cat.add_method(iface, MethodDef::new("Frob"));
        assert!(cat.method(m).is_abstract);
        assert_eq!(cat.method(m).virtuality, Virtuality::NewSlot);
    }

    #[test]
    fn value_and_reference_classification() {
        let mut cat = Catalog::new();
        let s = cat.add_type(TypeDef::structure("S"));
        let c = cat.add_type(TypeDef::class("C"));
        assert!(cat.is_value_type(&Ty::def(s)));
        assert!(cat.is_reference_type(&Ty::def(c)));
        assert!(cat.is_reference_type(&Ty::array(Ty::def(s))));
        assert!(cat.is_value_type(&Ty::int32()));
        assert!(!cat.is_value_type(&Ty::void()));
        assert!(!cat.is_value_type(&Ty::param(0)) && !cat.is_reference_type(&Ty::param(0)));
    }

    #[test]
    fn validate_reports_arity_and_unbound_params() {
        let mut cat = Catalog::new();
        let gen = cat.add_type(TypeDef::class("Gen").generics(&["T"]));
        cat.add_type(
            TypeDef::class("Bad")
                .field("a", Ty::def(gen))
                .field("b", Ty::param(0)),
        );
        let errors = cat.validate().unwrap_err();
        assert!(errors.contains(&CatalogError::ArityMismatch {
            name: "Gen".into(),
            expected: 1,
            found: 0
        }));
        assert!(errors.contains(&CatalogError::UnboundParam {
            context: "Bad".into(),
            index: 0
        }));
    }

    #[test]
    fn validate_rejects_void_arguments() {
        let mut cat = Catalog::new();
        let gen = cat.add_type(TypeDef::class("Gen").generics(&["T"]));
        cat.add_type(TypeDef::class("User").field("g", Ty::named(gen, vec![Ty::void()])));
        let errors = cat.validate().unwrap_err();
        assert!(matches!(
            errors[0],
            CatalogError::UnsupportedConstructedType { .. }
        ));
    }

    #[test]
    fn validate_detects_base_cycles() {
        let mut cat = Catalog::new();
        let a = cat.add_type(TypeDef::class("A"));
        let b = cat.add_type(TypeDef::class("B").extends(Ty::def(a)));
        cat.set_base(a, Ty::def(b));
        let errors = cat.validate().unwrap_err();
        assert_eq!(
            errors,
            vec![CatalogError::BaseCycle(vec!["A".into(), "B".into(), "A".into()])]
        );
    }

    #[test]
    fn validate_rejects_struct_base_and_non_interface() {
        let mut cat = Catalog::new();
        let c = cat.add_type(TypeDef::class("C"));
        cat.add_type(TypeDef::structure("S").extends(Ty::def(c)));
        cat.add_type(TypeDef::class("D").implements(Ty::def(c)));
        let errors = cat.validate().unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(matches!(errors[0], CatalogError::InvalidBase { .. }));
        assert!(matches!(errors[1], CatalogError::NotAnInterface { .. }));
    }

    #[test]
    fn validate_rejects_lookups_on_non_generic_methods() {
        let mut cat = Catalog::new();
        let c = cat.add_type(TypeDef::class("C").generics(&["T"]));
        let m = cat.add_method(c, MethodDef::new("M"));
        cat.add_method_lookup(m, GenericLookup::Type(Ty::param(0)));
        let errors = cat.validate().unwrap_err();
        assert_eq!(
            errors,
            vec![CatalogError::MisplacedLookup {
                owner: "C".into(),
                method: "M".into()
            }]
        );
    }

    #[test]
    fn validate_accepts_a_well_formed_catalog() {
        let mut cat = Catalog::new();
        let iface = cat.add_type(TypeDef::interface("IFoo").variant("T", Variance::Covariant));
        let frob = cat.add_method(iface, MethodDef::new("Frob").returns(Ty::param(0)));
        let gen = cat.add_type(
            TypeDef::class("Gen")
                .generics(&["T"])
                .implements(Ty::named(iface, vec![Ty::param(0)]))
                .lookup(GenericLookup::Method(MethodRef::new(
                    Ty::named(iface, vec![Ty::param(0)]),
                    frob,
                ))),
        );
        cat.add_method(gen, MethodDef::new("Frob").new_slot().returns(Ty::param(0)));
        assert_eq!(cat.validate(), Ok(()));
        assert_eq!(cat.all_layouts().unwrap().len(), 2);
    }
}
