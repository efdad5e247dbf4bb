//! The runtime: owner of every lazily built structure.
//!
//! A [`Runtime`] is created from a validated [`Catalog`] plus a table of
//! method bodies. Nothing is built up front; types, vtables, interface
//! maps, dictionaries, static storage and compiled entries are all produced
//! on first use and memoized for the runtime's lifetime.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::ThreadId;

use canon_types::{canonicalize, CanonicalForm, Catalog, DefRef, MethodDefId, SlotLayout, Ty, TypeDefId};
use parking_lot::{Mutex, RwLock};
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, error};

use crate::code::{CodeKey, CodeTable, CompiledMethod, Frame, MethodInst};
use crate::config::RuntimeConfig;
use crate::constrained::UnboxingStub;
use crate::dictionary::GenericDictionary;
use crate::error::{RtResult, RuntimeError};
use crate::interface::InterfaceMap;
use crate::memo::MemoTable;
use crate::statics::{ClassInit, InitWaits, StaticStorageBlock};
use crate::types::{TypeHandle, TypeId, TypeLayout, TypeLoader};
use crate::value::Value;
use crate::vtable::VTable;

static NEXT_RUNTIME_ID: AtomicU64 = AtomicU64::new(1);

pub struct Runtime {
    pub(crate) catalog: Catalog,
    pub(crate) config: RuntimeConfig,
    pub(crate) code: CodeTable,
    pub(crate) retained: Option<FxHashSet<DefRef>>,
    pub(crate) loader: TypeLoader,

    pub(crate) interfaces: MemoTable<TypeId, Arc<[TypeHandle]>>,
    pub(crate) layouts: MemoTable<TypeId, Arc<TypeLayout>>,
    pub(crate) slot_layouts: MemoTable<TypeDefId, Arc<SlotLayout>>,
    pub(crate) vtables: MemoTable<TypeId, Arc<VTable>>,
    pub(crate) interface_maps: MemoTable<TypeId, Arc<InterfaceMap>>,
    pub(crate) type_dicts: MemoTable<TypeId, Arc<GenericDictionary>>,
    pub(crate) method_dicts: MemoTable<MethodInst, Arc<GenericDictionary>>,
    pub(crate) compiled: MemoTable<CodeKey, Arc<CompiledMethod>>,
    pub(crate) statics: MemoTable<TypeId, Arc<StaticStorageBlock>>,
    pub(crate) stubs: MemoTable<(TypeId, TypeId), Arc<UnboxingStub>>,
    pub(crate) class_inits: RwLock<FxHashMap<TypeId, Arc<ClassInit>>>,
    pub(crate) init_waits: InitWaits,
    pub(crate) thread_statics: RwLock<FxHashMap<(ThreadId, TypeId), Arc<StaticStorageBlock>>>,

    observed: Mutex<FxHashSet<(DefRef, DefRef)>>,
}

// ---------------------------------------------------------------------------
// RuntimeBuilder
// ---------------------------------------------------------------------------

pub struct RuntimeBuilder {
    catalog: Catalog,
    config: RuntimeConfig,
    code: CodeTable,
    retained: Option<FxHashSet<DefRef>>,
}

impl RuntimeBuilder {
    pub fn new(catalog: Catalog) -> Self {
        Self {
            catalog,
            config: RuntimeConfig::default(),
            code: CodeTable::default(),
            retained: None,
        }
    }

    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    /// Register the body of `method`.
    pub fn code<F>(mut self, method: MethodDefId, body: F) -> Self
    where
        F: for<'a> Fn(&mut Frame<'a>) -> RtResult<Value> + Send + Sync + 'static,
    {
        self.code.insert(method, Arc::new(body));
        self
    }

    /// Restrict dictionary targets to `retained` (usually the reachable set
    /// of a dependency analysis).
    pub fn retain(mut self, retained: FxHashSet<DefRef>) -> Self {
        self.retained = Some(retained);
        self
    }

    pub fn build(self) -> RtResult<Runtime> {
        self.catalog.validate().map_err(RuntimeError::Catalog)?;
        let id = NEXT_RUNTIME_ID.fetch_add(1, Ordering::Relaxed);
        debug!(
            runtime = id,
            types = self.catalog.type_count(),
            methods = self.catalog.method_count(),
            bodies = self.code.len(),
            "runtime created"
        );
        Ok(Runtime {
            catalog: self.catalog,
            config: self.config,
            code: self.code,
            retained: self.retained,
            loader: TypeLoader::default(),
            interfaces: MemoTable::new(),
            layouts: MemoTable::new(),
            slot_layouts: MemoTable::new(),
            vtables: MemoTable::new(),
            interface_maps: MemoTable::new(),
            type_dicts: MemoTable::new(),
            method_dicts: MemoTable::new(),
            compiled: MemoTable::new(),
            statics: MemoTable::new(),
            stubs: MemoTable::new(),
            class_inits: RwLock::new(FxHashMap::default()),
            init_waits: InitWaits::default(),
            thread_statics: RwLock::new(FxHashMap::default()),
            observed: Mutex::new(FxHashSet::default()),
        })
    }
}

// ---------------------------------------------------------------------------
// Runtime
// ---------------------------------------------------------------------------

impl Runtime {
    pub fn builder(catalog: Catalog) -> RuntimeBuilder {
        RuntimeBuilder::new(catalog)
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn canonicalize(&self, args: &[Ty]) -> CanonicalForm {
        canonicalize(&self.catalog, args)
    }

    /// Every `(origin, target)` definition pair actually needed by a resolved
    /// dictionary slot so far, sorted.
    pub fn observed_dependencies(&self) -> Vec<(DefRef, DefRef)> {
        let mut out: Vec<_> = self.observed.lock().iter().copied().collect();
        out.sort();
        out
    }

    pub(crate) fn observe(&self, from: DefRef, to: DefRef) {
        if from != to {
            self.observed.lock().insert((from, to));
        }
    }

    /// Report a dependency-tracking fault. Under strict checks this panics;
    /// otherwise the error is returned to the caller.
    pub(crate) fn dependency_fault(&self, origin: &str, slot: usize, detail: &str) -> RuntimeError {
        let err = RuntimeError::MissingDictionarySlotDependency {
            origin: origin.to_string(),
            slot,
            detail: detail.to_string(),
        };
        error!(origin, slot, detail, "dictionary slot dependency fault");
        if self.config.strict_dependency_checks {
            panic!("{}", err);
        }
        err
    }

    /// Whether `target` may be used by resolved slots.
    pub(crate) fn is_retained(&self, target: DefRef) -> bool {
        match (&self.retained, self.config.check_retained_dependencies) {
            (Some(retained), true) => retained.contains(&target),
            _ => true,
        }
    }
}
