//! Interface dispatch maps.
//!
//! For every exact type the runtime lazily builds one [`InterfaceMap`]:
//! for each (interface instantiation, interface method) pair the type
//! implements, the exact implementation. The map is computed per *exact*
//! type, never per canonical form, because two instantiations that share
//! code (`C<String>` and `C<Object>`) can implement different interface
//! instantiations and pick different explicit implementations.
//!
//! Matching walks the class chain from the most derived level:
//!
//! 1. an explicit implementation of exactly this interface instantiation at
//!    that level wins;
//! 2. once a level (or a more derived one) declares the interface, a public
//!    instance method with the same name, generic arity and substituted
//!    parameter types implements it; virtual ones dispatch through the
//!    receiver's vtable so later overrides are honored.
//!
//! When the requested interface instantiation is not implemented exactly,
//! lookup falls back to the first implemented instantiation that is
//! variance-compatible with it.

use std::sync::Arc;

use canon_types::{MethodDefId, Ty};
use rustc_hash::FxHashMap;
use tracing::{debug, trace};

use crate::code::MethodInst;
use crate::error::{RtResult, RuntimeError};
use crate::runtime::Runtime;
use crate::types::{TypeHandle, TypeId};
use crate::vtable::SlotTarget;

#[derive(Clone, Debug)]
pub struct InterfaceEntry {
    pub target: SlotTarget,
    /// The vtable slot the target was read from, for virtual implementations.
    pub slot: Option<usize>,
    pub explicit: bool,
}

#[derive(Debug)]
pub struct InterfaceMap {
    pub ty: TypeHandle,
    pub interfaces: Arc<[TypeHandle]>,
    entries: FxHashMap<(TypeId, MethodDefId), InterfaceEntry>,
}

impl InterfaceMap {
    pub fn get(&self, interface: &TypeHandle, method: MethodDefId) -> Option<&InterfaceEntry> {
        self.entries.get(&(interface.id, method))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// One line per entry, grouped by interface in map order.
    pub fn render(&self, rt: &Runtime) -> String {
        let mut out = format!("{}\n", self.ty);
        for iface in self.interfaces.iter() {
            let Some(def) = iface.def else { continue };
            for &m in &rt.catalog().type_def(def).methods {
                let name = &rt.catalog().method(m).name;
                match self.get(iface, m) {
                    Some(entry) => {
                        let via = match (entry.explicit, entry.slot) {
                            (true, _) => " (explicit)".to_string(),
                            (false, Some(slot)) => format!(" (slot {})", slot),
                            (false, None) => String::new(),
                        };
                        let target = rt.catalog().method(entry.target.method);
                        out.push_str(&format!(
                            "  {}::{} -> {}::{}{}\n",
                            iface, name, entry.target.owner, target.name, via
                        ));
                    }
                    None => out.push_str(&format!("  {}::{} -> <missing>\n", iface, name)),
                }
            }
        }
        out
    }
}

impl Runtime {
    pub fn interface_map(&self, ty: &TypeHandle) -> RtResult<Arc<InterfaceMap>> {
        self.interface_maps.get_or_try_init(
            &ty.id,
            || format!("interface map of {}", ty),
            || {
                let interfaces = self.interfaces_of(ty)?;
                let mut chain = Vec::new();
                let mut current = Some(ty.clone());
                while let Some(level) = current {
                    current = self.base_type(&level)?;
                    chain.push(level);
                }

                let mut entries = FxHashMap::default();
                for iface in interfaces.iter() {
                    let Some(def) = iface.def else { continue };
                    for &im in &self.catalog.type_def(def).methods {
                        if self.catalog.method(im).is_static {
                            continue;
                        }
                        if let Some(entry) = self.find_implementation(ty, &chain, iface, im)? {
                            entries.insert((iface.id, im), entry);
                        }
                    }
                }
                debug!(ty = %ty, interfaces = interfaces.len(), entries = entries.len(), "built interface map");
                Ok(Arc::new(InterfaceMap {
                    ty: ty.clone(),
                    interfaces,
                    entries,
                }))
            },
        )
    }

    fn find_implementation(
        &self,
        ty: &TypeHandle,
        chain: &[TypeHandle],
        iface: &TypeHandle,
        im: MethodDefId,
    ) -> RtResult<Option<InterfaceEntry>> {
        let imd = self.catalog.method(im);
        let wanted: Vec<Ty> = imd.params.iter().map(|p| p.subst(iface.type_args(), &[])).collect();
        let signature_matches = |level: &TypeHandle, m: MethodDefId| {
            let md = self.catalog.method(m);
            md.name == imd.name
                && md.arity() == imd.arity()
                && !md.is_static
                && md.params.len() == wanted.len()
                && md
                    .params
                    .iter()
                    .zip(&wanted)
                    .all(|(p, w)| p.subst(level.type_args(), &[]) == *w)
        };

        let mut declared = false;
        for level in chain {
            let Some(def) = level.def else { continue };
            let td = self.catalog.type_def(def);

            for &m in &td.methods {
                let Some(explicit) = &self.catalog.method(m).explicit_impl else {
                    continue;
                };
                if signature_matches(level, m)
                    && self.load(&explicit.subst(level.type_args(), &[]))? == *iface
                {
                    return Ok(Some(InterfaceEntry {
                        target: SlotTarget {
                            owner: level.clone(),
                            method: m,
                        },
                        slot: None,
                        explicit: true,
                    }));
                }
            }

            declared = declared || self.level_declares(level, iface)?;
            if !declared {
                continue;
            }
            let implicit = td.methods.iter().copied().find(|&m| {
                self.catalog.method(m).explicit_impl.is_none() && signature_matches(level, m)
            });
            if let Some(m) = implicit {
                if self.catalog.method(m).is_virtual() {
                    if let Some(slot) = self.slot_layout(def)?.slot_of(m) {
                        if let Some(target) = self.vtable(ty)?.target(slot).cloned() {
                            return Ok(Some(InterfaceEntry {
                                target,
                                slot: Some(slot),
                                explicit: false,
                            }));
                        }
                    }
                }
                return Ok(Some(InterfaceEntry {
                    target: SlotTarget {
                        owner: level.clone(),
                        method: m,
                    },
                    slot: None,
                    explicit: false,
                }));
            }
        }
        Ok(None)
    }

    /// Whether `level` itself lists `iface` (directly or via a declared
    /// interface's super-interfaces).
    fn level_declares(&self, level: &TypeHandle, iface: &TypeHandle) -> RtResult<bool> {
        let td = self.def_of(level)?;
        for declared in &td.interfaces {
            let handle = self.load(&declared.subst(level.type_args(), &[]))?;
            if handle == *iface || self.interfaces_of(&handle)?.contains(iface) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// The exact implementation of interface method `method` on a receiver
    /// of exact type `receiver`.
    pub fn resolve_interface_method(&self, receiver: &TypeHandle, method: &MethodInst) -> RtResult<MethodInst> {
        let missing = || RuntimeError::MissingInterfaceImplementation {
            ty: receiver.to_string(),
            interface: method.owner.to_string(),
            method: self.catalog.method(method.method).name.clone(),
        };
        let map = self.interface_map(receiver)?;
        let entry = match map.get(&method.owner, method.method) {
            Some(entry) => entry,
            None => {
                let mut found = None;
                for iface in map.interfaces.iter() {
                    if self.is_variant_of(iface, &method.owner)? {
                        found = map.get(iface, method.method);
                        if found.is_some() {
                            break;
                        }
                    }
                }
                found.ok_or_else(missing)?
            }
        };
        let resolved = MethodInst::generic(
            entry.target.owner.clone(),
            entry.target.method,
            method.method_args.clone(),
        );
        trace!(
            receiver = %receiver,
            from = %self.describe_method(method),
            to = %self.describe_method(&resolved),
            "interface dispatch"
        );
        Ok(resolved)
    }
}
