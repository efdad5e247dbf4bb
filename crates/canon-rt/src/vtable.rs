//! Virtual method tables.
//!
//! The slot *shape* of a type comes from its definition's [`SlotLayout`],
//! which depends only on the definition hierarchy, so every instantiation
//! of a definition agrees on slot numbering. A [`VTable`] fills that shape
//! with exact targets for one closed type: the base type's table first,
//! then this level's overrides, hiding slots and introduced slots.

use std::sync::Arc;

use canon_types::{MethodDefId, SlotLayout, SlotRelation, Ty, TypeDefId};
use tracing::{debug, trace};

use crate::code::MethodInst;
use crate::error::{RtResult, RuntimeError};
use crate::runtime::Runtime;
use crate::types::TypeHandle;

/// The exact implementation occupying a slot: the declaring level of the
/// receiver's hierarchy and the method definition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SlotTarget {
    pub owner: TypeHandle,
    pub method: MethodDefId,
}

#[derive(Debug)]
pub struct VTable {
    pub ty: TypeHandle,
    pub layout: Option<Arc<SlotLayout>>,
    pub targets: Vec<SlotTarget>,
}

impl VTable {
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn target(&self, slot: usize) -> Option<&SlotTarget> {
        self.targets.get(slot)
    }

    pub fn render(&self, rt: &Runtime) -> String {
        let mut out = format!("{}\n", self.ty);
        for (index, target) in self.targets.iter().enumerate() {
            let md = rt.catalog().method(target.method);
            out.push_str(&format!("  {index}: {}::{}\n", target.owner, md.name));
        }
        out
    }
}

impl Runtime {
    /// Slot layout of a definition, computed once per definition.
    pub fn slot_layout(&self, def: TypeDefId) -> RtResult<Arc<SlotLayout>> {
        self.slot_layouts.get_or_try_init(
            &def,
            || format!("slot layout of {}", self.catalog.type_def(def).name),
            || {
                let base = match &self.catalog.type_def(def).base {
                    Some(Ty::Named(base, _)) => Some(self.slot_layout(*base)?),
                    _ => None,
                };
                let layout = SlotLayout::compute(&self.catalog, def, base.as_deref())?;
                Ok(Arc::new(layout))
            },
        )
    }

    /// The vtable of an exact type. Types without a definition (primitives,
    /// arrays) have an empty table.
    pub fn vtable(&self, ty: &TypeHandle) -> RtResult<Arc<VTable>> {
        self.vtables.get_or_try_init(
            &ty.id,
            || format!("vtable of {}", ty),
            || {
                let Some(def) = ty.def else {
                    return Ok(Arc::new(VTable {
                        ty: ty.clone(),
                        layout: None,
                        targets: Vec::new(),
                    }));
                };
                let layout = self.slot_layout(def)?;
                let mut targets = match (&self.catalog.type_def(def).base, self.base_type(ty)?) {
                    (Some(_), Some(base)) => self.vtable(&base)?.targets.clone(),
                    _ => Vec::new(),
                };
                for (method, relation) in &layout.declared {
                    let target = SlotTarget {
                        owner: ty.clone(),
                        method: *method,
                    };
                    match *relation {
                        SlotRelation::Override(slot) => match targets.get_mut(slot) {
                            Some(t) => *t = target,
                            None => {
                                return Err(RuntimeError::MissingMethod(format!(
                                    "{} overrides missing slot {}",
                                    ty, slot
                                )))
                            }
                        },
                        SlotRelation::Hide { slot, .. } | SlotRelation::Introduce(slot) => {
                            debug_assert_eq!(targets.len(), slot);
                            targets.push(target);
                        }
                    }
                }
                debug!(ty = %ty, slots = targets.len(), "built vtable");
                Ok(Arc::new(VTable {
                    ty: ty.clone(),
                    layout: Some(layout),
                    targets,
                }))
            },
        )
    }

    /// The implementation `method` dispatches to on a receiver of exact type
    /// `receiver`. Non-virtual and static methods resolve to themselves;
    /// interface methods go through the interface map.
    pub fn resolve_virtual(&self, method: &MethodInst, receiver: &TypeHandle) -> RtResult<MethodInst> {
        let md = self.catalog.method(method.method);
        if md.is_static {
            return Ok(method.clone());
        }
        if method.owner.is_interface() {
            return self.resolve_interface_method(receiver, method);
        }
        if !md.is_virtual() {
            return Ok(method.clone());
        }
        if !self.is_assignable(receiver, &method.owner)? {
            return Err(RuntimeError::invalid_cast(receiver.to_string(), method.owner.to_string()));
        }
        let owner_def = md.owner;
        let slot = self
            .slot_layout(owner_def)?
            .slot_of(method.method)
            .ok_or_else(|| RuntimeError::MissingMethod(self.describe_method(method)))?;
        let vtable = self.vtable(receiver)?;
        let target = vtable
            .target(slot)
            .ok_or_else(|| RuntimeError::MissingMethod(self.describe_method(method)))?;
        let resolved = MethodInst::generic(target.owner.clone(), target.method, method.method_args.clone());
        trace!(
            from = %self.describe_method(method),
            to = %self.describe_method(&resolved),
            slot,
            "virtual dispatch"
        );
        Ok(resolved)
    }
}
