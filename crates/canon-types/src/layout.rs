//! Virtual slot layouts.
//!
//! The shape of a vtable (slot count, and which declared method overrides,
//! hides or introduces which slot) depends only on the open class hierarchy,
//! never on type arguments. It is computed here once per definition; the
//! runtime replays the recorded relations per exact type to fill in targets.

use rustc_hash::FxHashMap;
use serde::Serialize;

use crate::catalog::Catalog;
use crate::def::Virtuality;
use crate::error::CatalogError;
use crate::ty::{MethodDefId, Ty, TypeDefId};

/// One virtual slot as seen from a particular definition.
#[derive(Clone, Debug, Serialize)]
pub struct SlotDecl {
    pub name: String,
    pub generic_arity: usize,
    /// Parameter types expressed in the parameters of the definition that
    /// owns this layout (inherited signatures are substituted through the
    /// base type's arguments).
    pub params: Vec<Ty>,
    pub sealed: bool,
    pub introduced_by: MethodDefId,
    /// The most-derived method occupying the slot at this level.
    pub current: MethodDefId,
}

/// How a declared virtual method relates to the inherited slots.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize)]
pub enum SlotRelation {
    /// Replaces the inherited slot in place.
    Override(usize),
    /// Same name and signature as inherited slot `hidden`, but gets a fresh
    /// `slot`; callers typed as the base still reach the hidden one.
    Hide { hidden: usize, slot: usize },
    /// A fresh slot with no base counterpart.
    Introduce(usize),
}

impl SlotRelation {
    pub fn slot(self) -> usize {
        match self {
            SlotRelation::Override(slot)
            | SlotRelation::Hide { slot, .. }
            | SlotRelation::Introduce(slot) => slot,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct SlotLayout {
    pub def: TypeDefId,
    pub slots: Vec<SlotDecl>,
    /// Relations of the virtual methods declared by `def`, in declaration order.
    pub declared: Vec<(MethodDefId, SlotRelation)>,
    #[serde(skip)]
    method_slots: FxHashMap<MethodDefId, usize>,
}

impl SlotLayout {
    /// Compute the layout of `def` given the layout of its direct base.
    ///
    /// `base` must be the layout of the definition named by `def`'s base type
    /// (or `None` when `def` has no base).
    pub fn compute(
        catalog: &Catalog,
        def: TypeDefId,
        base: Option<&SlotLayout>,
    ) -> Result<SlotLayout, CatalogError> {
        let td = catalog.type_def(def);
        let mut slots = Vec::new();
        let mut method_slots = FxHashMap::default();

        if let Some(base_layout) = base {
            let base_args: &[Ty] = match &td.base {
                Some(Ty::Named(_, args)) => args,
                _ => &[],
            };
            for decl in &base_layout.slots {
                slots.push(SlotDecl {
                    params: decl.params.iter().map(|p| p.subst(base_args, &[])).collect(),
                    ..decl.clone()
                });
            }
            method_slots.clone_from(&base_layout.method_slots);
        }

        let inherited = slots.len();
        let mut declared = Vec::new();

        for &mid in &td.methods {
            let md = catalog.method(mid);
            if md.is_static || md.explicit_impl.is_some() || !md.is_virtual() {
                continue;
            }
            // Most-derived match wins, so an override after a hiding `new`
            // lands on the hiding slot.
            let found = slots[..inherited].iter().rposition(|s| {
                s.name == md.name && s.generic_arity == md.arity() && s.params == md.params
            });

            let relation = match md.virtuality {
                Virtuality::Override => {
                    let Some(index) = found else {
                        return Err(CatalogError::OverrideWithoutBase {
                            owner: td.name.clone(),
                            method: md.name.clone(),
                        });
                    };
                    if slots[index].sealed {
                        return Err(CatalogError::OverrideOfSealed {
                            owner: td.name.clone(),
                            method: md.name.clone(),
                        });
                    }
                    slots[index].current = mid;
                    slots[index].sealed = md.sealed;
                    SlotRelation::Override(index)
                }
                Virtuality::NewSlot => {
                    let slot = slots.len();
                    slots.push(SlotDecl {
                        name: md.name.clone(),
                        generic_arity: md.arity(),
                        params: md.params.clone(),
                        sealed: md.sealed,
                        introduced_by: mid,
                        current: mid,
                    });
                    match found {
                        Some(hidden) => SlotRelation::Hide { hidden, slot },
                        None => SlotRelation::Introduce(slot),
                    }
                }
                Virtuality::NonVirtual => unreachable!("filtered above"),
            };
            method_slots.insert(mid, relation.slot());
            declared.push((mid, relation));
        }

        Ok(SlotLayout {
            def,
            slots,
            declared,
            method_slots,
        })
    }

    /// The slot a virtual method (declared here or inherited) occupies.
    pub fn slot_of(&self, method: MethodDefId) -> Option<usize> {
        self.method_slots.get(&method).copied()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Plain-text table used by the CLI and snapshot tests.
    pub fn render(&self, catalog: &Catalog) -> String {
        let mut out = String::new();
        for (index, slot) in self.slots.iter().enumerate() {
            let owner = catalog.type_def(catalog.method(slot.current).owner);
            let relation = self
                .declared
                .iter()
                .find(|(_, rel)| rel.slot() == index)
                .map(|(_, rel)| match rel {
                    SlotRelation::Override(_) => "override".to_string(),
                    SlotRelation::Hide { hidden, .. } => format!("hides {}", hidden),
                    SlotRelation::Introduce(_) => "introduce".to_string(),
                })
                .unwrap_or_else(|| "inherited".to_string());
            let arity = if slot.generic_arity > 0 {
                format!("`{}", slot.generic_arity)
            } else {
                String::new()
            };
            out.push_str(&format!(
                "{index}: {}{arity} -> {}::{} ({relation})\n",
                slot.name,
                owner.name,
                catalog.method(slot.current).name
            ));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::def::{MethodDef, TypeDef};

    fn hierarchy() -> (Catalog, TypeDefId, TypeDefId, TypeDefId) {
        let mut cat = Catalog::new();
        let base = cat.add_type(TypeDef::class("Base"));
        for name in ["M1", "M2", "M3", "M4"] {
            cat.add_method(base, MethodDef::new(name).new_slot().returns(Ty::string()));
        }
        let d1 = cat.add_type(TypeDef::class("Derived1").extends(Ty::def(base)));
        cat.add_method(d1, MethodDef::new("M2").overrides().returns(Ty::string()));
        cat.add_method(d1, MethodDef::new("M3").new_slot().returns(Ty::string()));
        let d2 = cat.add_type(TypeDef::class("Derived2").extends(Ty::def(d1)));
        cat.add_method(d2, MethodDef::new("M3").overrides().returns(Ty::string()));
        cat.add_method(d2, MethodDef::new("M4").overrides().returns(Ty::string()));
        (cat, base, d1, d2)
    }

    #[test]
    fn override_hide_and_introduce() {
        let (cat, base, d1, d2) = hierarchy();
        let lb = SlotLayout::compute(&cat, base, None).unwrap();
        let l1 = SlotLayout::compute(&cat, d1, Some(&lb)).unwrap();
        let l2 = SlotLayout::compute(&cat, d2, Some(&l1)).unwrap();

        assert_eq!(lb.len(), 4);
        assert_eq!(l1.len(), 5);
        assert_eq!(
            l1.declared.iter().map(|(_, r)| *r).collect::<Vec<_>>(),
            vec![
                SlotRelation::Override(1),
                SlotRelation::Hide { hidden: 2, slot: 4 }
            ]
        );
        // Derived2's M3 overrides the hiding slot, not Base's.
        assert_eq!(
            l2.declared.iter().map(|(_, r)| *r).collect::<Vec<_>>(),
            vec![SlotRelation::Override(4), SlotRelation::Override(3)]
        );

        insta::assert_snapshot!(l2.render(&cat), @r"
        0: M1 -> Base::M1 (inherited)
        1: M2 -> Derived1::M2 (inherited)
        2: M3 -> Base::M3 (inherited)
        3: M4 -> Derived2::M4 (override)
        4: M3 -> Derived2::M3 (override)
        ");
    }

    #[test]
    fn inherited_signatures_are_substituted() {
        let mut cat = Catalog::new();
        let base = cat.add_type(TypeDef::class("Base").generics(&["T"]));
        cat.add_method(base, MethodDef::new("Take").new_slot().param(Ty::param(0)));
        let derived = cat.add_type(TypeDef::class("Derived").extends(Ty::named(base, vec![Ty::string()])));
        let over = cat.add_method(derived, MethodDef::new("Take").overrides().param(Ty::string()));

        let lb = SlotLayout::compute(&cat, base, None).unwrap();
        let ld = SlotLayout::compute(&cat, derived, Some(&lb)).unwrap();
        assert_eq!(ld.slot_of(over), Some(0));
        assert_eq!(ld.slots[0].params, vec![Ty::string()]);
    }

    #[test]
    fn override_without_base_slot_is_rejected() {
        let mut cat = Catalog::new();
        let lonely = cat.add_type(TypeDef::class("Lonely"));
        cat.add_method(lonely, MethodDef::new("Nope").overrides());
        let err = SlotLayout::compute(&cat, lonely, None).unwrap_err();
        assert!(matches!(err, CatalogError::OverrideWithoutBase { .. }));
    }

    #[test]
    fn sealed_slot_cannot_be_overridden() {
        let mut cat = Catalog::new();
        let base = cat.add_type(TypeDef::class("Base"));
        cat.add_method(base, MethodDef::new("M").new_slot());
        let mid = cat.add_type(TypeDef::class("Mid").extends(Ty::def(base)));
        cat.add_method(mid, MethodDef::new("M").overrides().sealed());
        let leaf = cat.add_type(TypeDef::class("Leaf").extends(Ty::def(mid)));
        cat.add_method(leaf, MethodDef::new("M").overrides());

        let lb = SlotLayout::compute(&cat, base, None).unwrap();
        let lm = SlotLayout::compute(&cat, mid, Some(&lb)).unwrap();
        let err = SlotLayout::compute(&cat, leaf, Some(&lm)).unwrap_err();
        assert_eq!(
            err,
            CatalogError::OverrideOfSealed {
                owner: "Leaf".into(),
                method: "M".into()
            }
        );
    }

    #[test]
    fn generic_virtual_methods_match_on_arity() {
        let mut cat = Catalog::new();
        let base = cat.add_type(TypeDef::class("Base"));
        cat.add_method(base, MethodDef::new("G").generics(&["U"]).new_slot().param(Ty::method_param(0)));
        let derived = cat.add_type(TypeDef::class("Derived").extends(Ty::def(base)));
        // Non-generic G with a different signature introduces its own slot.
        cat.add_method(derived, MethodDef::new("G").new_slot().param(Ty::int32()));
        let over = cat.add_method(derived, MethodDef::new("G").generics(&["V"]).overrides().param(Ty::method_param(0)));

        let lb = SlotLayout::compute(&cat, base, None).unwrap();
        let ld = SlotLayout::compute(&cat, derived, Some(&lb)).unwrap();
        assert_eq!(ld.len(), 2);
        assert_eq!(ld.slot_of(over), Some(0));
    }
}
