//! Generic dictionaries.
//!
//! A dictionary carries the exact instantiation behind a shared body: the
//! exact type arguments plus a table of lazily resolved slots. The slot
//! schema comes from the owning definition (type or generic method), so
//! every instantiation of a definition has the same slot numbering; only
//! the resolved handles differ.
//!
//! Each slot resolves independently, at most once, the first time shared
//! code asks for it. Resolving a slot records the definition-level edge
//! `origin -> target`, and a target outside the retained set (or without
//! code) is reported as a dependency fault.

use std::fmt;
use std::sync::Arc;

use canon_types::deps::lookup_targets;
use canon_types::{DefRef, FieldStorage, GenericLookup, MethodRef, Ty};
use tracing::{debug, trace};

use crate::binder::BoundInvocation;
use crate::code::MethodInst;
use crate::constrained::ConstrainedCall;
use crate::error::{RtResult, RuntimeError};
use crate::memo::MemoCell;
use crate::runtime::Runtime;
use crate::statics::StaticStorageBlock;
use crate::types::{TypeHandle, TypeLayout};

// ---------------------------------------------------------------------------
// Handles
// ---------------------------------------------------------------------------

/// A resolved dictionary slot.
#[derive(Clone, Debug)]
pub enum RuntimeHandle {
    Type(TypeHandle),
    Method(MethodInst),
    Entry(Arc<BoundInvocation>),
    Constrained(ConstrainedCall),
    Statics(Arc<StaticStorageBlock>),
    /// Resolved per thread on access.
    ThreadStatics(TypeHandle),
    Field(FieldHandle),
    Layout(Arc<TypeLayout>),
}

impl RuntimeHandle {
    pub fn kind(&self) -> &'static str {
        match self {
            RuntimeHandle::Type(_) => "type",
            RuntimeHandle::Method(_) => "method",
            RuntimeHandle::Entry(_) => "handle",
            RuntimeHandle::Constrained(_) => "constrained",
            RuntimeHandle::Statics(_) => "statics",
            RuntimeHandle::ThreadStatics(_) => "thread-statics",
            RuntimeHandle::Field(_) => "field",
            RuntimeHandle::Layout(_) => "layout",
        }
    }
}

/// A field of an exact type.
#[derive(Clone, Debug)]
pub struct FieldHandle {
    /// The exact declaring type.
    pub owner: TypeHandle,
    pub name: String,
    pub storage: FieldStorage,
    /// Index among the declaring definition's fields (static blocks use it).
    pub index: usize,
    /// Position in an instance's field vector (instance fields only).
    pub slot: Option<usize>,
    pub ty: TypeHandle,
    /// Byte offset within the instance (instance fields only).
    pub offset: Option<usize>,
}

// ---------------------------------------------------------------------------
// GenericDictionary
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub enum DictionaryOwner {
    Type(TypeHandle),
    Method(MethodInst),
}

pub struct GenericDictionary {
    pub owner: DictionaryOwner,
    /// The definition whose schema this dictionary follows.
    origin: DefRef,
    label: String,
    type_args: Vec<Ty>,
    method_args: Vec<Ty>,
    schema: Vec<GenericLookup>,
    slots: Vec<MemoCell<RuntimeHandle>>,
}

impl GenericDictionary {
    pub fn origin(&self) -> DefRef {
        self.origin
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Kind of slot `slot` according to the schema.
    pub fn slot_kind(&self, slot: usize) -> Option<&'static str> {
        self.schema.get(slot).map(GenericLookup::kind)
    }

    /// Slots resolved so far.
    pub fn resolved_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_ready()).count()
    }

    pub fn is_resolved(&self, slot: usize) -> bool {
        self.slots.get(slot).is_some_and(MemoCell::is_ready)
    }

    pub fn type_arg(&self, index: usize) -> RtResult<TypeHandle> {
        let owner = match &self.owner {
            DictionaryOwner::Type(t) => t,
            DictionaryOwner::Method(m) => &m.owner,
        };
        owner.args.get(index).cloned().ok_or(RuntimeError::IndexOutOfRange {
            index,
            length: owner.args.len(),
        })
    }

    pub fn method_arg(&self, index: usize) -> RtResult<TypeHandle> {
        let args: &[TypeHandle] = match &self.owner {
            DictionaryOwner::Type(_) => &[],
            DictionaryOwner::Method(m) => &m.method_args,
        };
        args.get(index).cloned().ok_or(RuntimeError::IndexOutOfRange {
            index,
            length: args.len(),
        })
    }
}

impl fmt::Debug for GenericDictionary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenericDictionary")
            .field("owner", &self.label)
            .field("slots", &self.slots.len())
            .field("resolved", &self.resolved_count())
            .finish()
    }
}

impl fmt::Display for GenericDictionary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)
    }
}

// ---------------------------------------------------------------------------
// Runtime: building and resolving dictionaries
// ---------------------------------------------------------------------------

impl Runtime {
    /// The dictionary of an exact named type.
    pub fn type_dictionary(&self, ty: &TypeHandle) -> RtResult<Arc<GenericDictionary>> {
        let def = ty.def.ok_or_else(|| RuntimeError::UnsupportedConstructedType {
            ty: ty.to_string(),
            reason: "only named types carry dictionaries".into(),
        })?;
        self.type_dicts.get_or_try_init(
            &ty.id,
            || format!("dictionary of {}", ty),
            || {
                let schema = self.catalog.type_def(def).dictionary.clone();
                debug!(owner = %ty, slots = schema.len(), "built type dictionary");
                Ok(Arc::new(GenericDictionary {
                    owner: DictionaryOwner::Type(ty.clone()),
                    origin: DefRef::Type(def),
                    label: ty.to_string(),
                    type_args: ty.type_args().to_vec(),
                    method_args: Vec::new(),
                    slots: schema.iter().map(|_| MemoCell::new()).collect(),
                    schema,
                }))
            },
        )
    }

    /// The dictionary of an exact generic method instantiation.
    pub fn method_dictionary(&self, method: &MethodInst) -> RtResult<Arc<GenericDictionary>> {
        self.method_dicts.get_or_try_init(
            method,
            || format!("dictionary of {}", self.describe_method(method)),
            || {
                let md = self.catalog.method(method.method);
                if md.arity() != method.method_args.len() {
                    return Err(RuntimeError::ArgumentCount {
                        method: self.describe_method(method),
                        expected: md.arity(),
                        found: method.method_args.len(),
                    });
                }
                let schema = md.dictionary.clone();
                let label = self.describe_method(method);
                debug!(owner = %label, slots = schema.len(), "built method dictionary");
                Ok(Arc::new(GenericDictionary {
                    owner: DictionaryOwner::Method(method.clone()),
                    origin: DefRef::Method(method.method),
                    label,
                    type_args: method.owner.type_args().to_vec(),
                    method_args: method.method_arg_tys(),
                    slots: schema.iter().map(|_| MemoCell::new()).collect(),
                    schema,
                }))
            },
        )
    }

    /// The context a body runs with: the method dictionary for generic
    /// methods, otherwise the owner's dictionary when the owner is generic.
    pub fn context_for(&self, method: &MethodInst) -> RtResult<Option<Arc<GenericDictionary>>> {
        let md = self.catalog.method(method.method);
        if md.is_generic() {
            return self.method_dictionary(method).map(Some);
        }
        if !method.owner.args.is_empty() {
            return self.type_dictionary(&method.owner).map(Some);
        }
        Ok(None)
    }

    /// Resolve slot `slot` of `dict`, building it on first use.
    pub fn resolve_slot(&self, dict: &GenericDictionary, slot: usize) -> RtResult<RuntimeHandle> {
        let Some(cell) = dict.slots.get(slot) else {
            return Err(self.dependency_fault(
                &dict.label,
                slot,
                &format!("slot index outside a schema of {} slot(s)", dict.slots.len()),
            ));
        };
        cell.get_or_try_init(
            || format!("{} slot {}", dict.label, slot),
            || self.build_slot(dict, slot),
        )
    }

    fn build_slot(&self, dict: &GenericDictionary, slot: usize) -> RtResult<RuntimeHandle> {
        let lookup = &dict.schema[slot];
        for target in lookup_targets(lookup) {
            self.observe(dict.origin, target);
            if !self.is_retained(target) {
                let detail = format!("`{}` was not retained", target.describe(&self.catalog));
                return Err(self.dependency_fault(&dict.label, slot, &detail));
            }
        }

        let (ta, ma) = (&dict.type_args, &dict.method_args);
        let handle = match lookup {
            GenericLookup::Type(ty) => RuntimeHandle::Type(self.load(&ty.subst(ta, ma))?),
            GenericLookup::Method(m) => {
                let inst = self.resolve_method_ref(&m.subst(ta, ma))?;
                self.require_code(dict, slot, &inst)?;
                RuntimeHandle::Method(inst)
            }
            GenericLookup::MethodHandle(m) => {
                let inst = self.resolve_method_ref(&m.subst(ta, ma))?;
                self.require_code(dict, slot, &inst)?;
                RuntimeHandle::Entry(Arc::new(self.entry_point(&inst)?))
            }
            GenericLookup::Constrained {
                constrained,
                method,
            } => {
                let constrained = self.load(&constrained.subst(ta, ma))?;
                let method = self.resolve_method_ref(&method.subst(ta, ma))?;
                RuntimeHandle::Constrained(self.resolve_constrained_call(&constrained, &method)?)
            }
            GenericLookup::Statics(ty) => {
                RuntimeHandle::Statics(self.static_storage(&self.load(&ty.subst(ta, ma))?)?)
            }
            GenericLookup::ThreadStatics(ty) => {
                RuntimeHandle::ThreadStatics(self.load(&ty.subst(ta, ma))?)
            }
            GenericLookup::Field(f) => {
                let owner = self.load(&f.owner.subst(ta, ma))?;
                RuntimeHandle::Field(self.field_handle(&owner, &f.name)?)
            }
            GenericLookup::Layout(ty) => {
                RuntimeHandle::Layout(self.type_layout(&self.load(&ty.subst(ta, ma))?)?)
            }
        };
        trace!(dictionary = %dict.label, slot, kind = handle.kind(), "resolved dictionary slot");
        Ok(handle)
    }

    fn require_code(&self, dict: &GenericDictionary, slot: usize, method: &MethodInst) -> RtResult<()> {
        let md = self.catalog.method(method.method);
        if md.is_abstract || self.has_code(method.method) {
            return Ok(());
        }
        let detail = format!("no code for `{}`", self.describe_method(method));
        Err(self.dependency_fault(&dict.label, slot, &detail))
    }

    /// Load a closed method reference. The owner may name a derived type or
    /// an implementing type; the result's owner is the declaring level.
    pub fn resolve_method_ref(&self, method: &MethodRef) -> RtResult<MethodInst> {
        let owner = self.load(&method.owner)?;
        let md = self
            .catalog
            .try_method(method.method)
            .ok_or_else(|| RuntimeError::MissingMethod(format!("#{}", method.method.0)))?;
        if md.arity() != method.method_args.len() {
            return Err(RuntimeError::ArgumentCount {
                method: format!("{}::{}", owner, md.name),
                expected: md.arity(),
                found: method.method_args.len(),
            });
        }
        let method_args = method
            .method_args
            .iter()
            .map(|a| self.load(a))
            .collect::<RtResult<Vec<_>>>()?;
        let declaring = self.declaring_level(&owner, md.owner)?;
        Ok(MethodInst::generic(declaring, method.method, method_args))
    }

    /// The instantiation of definition `def` that `ty` is or derives from.
    pub(crate) fn declaring_level(
        &self,
        ty: &TypeHandle,
        def: canon_types::TypeDefId,
    ) -> RtResult<TypeHandle> {
        let mut current = Some(ty.clone());
        while let Some(level) = current {
            if level.def == Some(def) {
                return Ok(level);
            }
            current = self.base_type(&level)?;
        }
        if let Some(iface) = self.interfaces_of(ty)?.iter().find(|i| i.def == Some(def)) {
            return Ok(iface.clone());
        }
        Err(RuntimeError::MissingMethod(format!(
            "`{}` declares no members of `{}`",
            ty,
            self.catalog.type_def(def).name
        )))
    }

    /// The handle of field `name` declared by `owner` or one of its bases.
    pub fn field_handle(&self, owner: &TypeHandle, name: &str) -> RtResult<FieldHandle> {
        let mut current = Some(owner.clone());
        while let Some(level) = current {
            if let Some(def) = level.def {
                let td = self.catalog.type_def(def);
                if let Some(index) = td.field_index(name) {
                    let field = &td.fields[index];
                    let ty = self.load(&field.ty.subst(level.type_args(), &[]))?;
                    let (slot, offset) = if field.storage == FieldStorage::Instance {
                        let layout = self.type_layout(&level)?;
                        let slot = layout.field_slot(&level, name);
                        (slot, slot.map(|s| layout.fields[s].offset))
                    } else {
                        (None, None)
                    };
                    return Ok(FieldHandle {
                        owner: level,
                        name: name.to_string(),
                        storage: field.storage,
                        index,
                        slot,
                        ty,
                        offset,
                    });
                }
            }
            current = self.base_type(&level)?;
        }
        Err(RuntimeError::MissingField {
            owner: owner.to_string(),
            name: name.to_string(),
        })
    }
}
