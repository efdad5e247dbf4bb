//! Per-instantiation static storage and class constructors.
//!
//! Static fields belong to an exact instantiation: `Gen<String>` and
//! `Gen<Object>` share code but never share statics. Storage is allocated
//! lazily per exact type ([`Runtime::static_storage`]) or per exact type and
//! thread ([`Runtime::thread_static_storage`]).
//!
//! The class constructor of an exact type runs at most once, before the
//! first static access, static method call or instance allocation. A
//! failing constructor leaves the type permanently failed: every later
//! access reports the same `TypeInitialization` error.

use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};

use canon_types::{FieldStorage, Ty};
use parking_lot::{Condvar, Mutex};
use rustc_hash::FxHashMap;
use tracing::{debug, info, warn};

use crate::code::MethodInst;
use crate::error::{RtResult, RuntimeError};
use crate::runtime::Runtime;
use crate::types::TypeHandle;
use crate::value::Value;

// ---------------------------------------------------------------------------
// ClassInit
// ---------------------------------------------------------------------------

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum InitState {
    Uninitialized,
    Initializing,
    Initialized,
    Failed,
}

const UNINITIALIZED: u8 = 0;
const INITIALIZING: u8 = 1;
const INITIALIZED: u8 = 2;
const FAILED: u8 = 3;

enum Progress {
    Idle,
    Running(ThreadId),
    Done,
    Failed(RuntimeError),
}

/// Run-once gate for one exact type's class constructor.
pub struct ClassInit {
    ty: String,
    state: AtomicU8,
    progress: Mutex<Progress>,
    finished: Condvar,
    runs: AtomicUsize,
}

/// Marks the gate failed if the constructor unwinds.
struct RunGuard<'a> {
    init: &'a ClassInit,
    armed: bool,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let _ = self.init.finish(Err(RuntimeError::thrown("class constructor panicked")));
        }
    }
}

impl ClassInit {
    fn new(ty: &TypeHandle, has_ctor: bool) -> Self {
        let (state, progress) = if has_ctor {
            (UNINITIALIZED, Progress::Idle)
        } else {
            (INITIALIZED, Progress::Done)
        };
        Self {
            ty: ty.to_string(),
            state: AtomicU8::new(state),
            progress: Mutex::new(progress),
            finished: Condvar::new(),
            runs: AtomicUsize::new(0),
        }
    }

    pub fn state(&self) -> InitState {
        match self.state.load(Ordering::Acquire) {
            UNINITIALIZED => InitState::Uninitialized,
            INITIALIZING => InitState::Initializing,
            INITIALIZED => InitState::Initialized,
            _ => InitState::Failed,
        }
    }

    /// How many times the constructor body has been entered.
    pub fn runs(&self) -> usize {
        self.runs.load(Ordering::SeqCst)
    }

    fn owner(&self) -> Option<ThreadId> {
        match &*self.progress.lock() {
            Progress::Running(owner) => Some(*owner),
            _ => None,
        }
    }

    /// Run `ctor` unless it has run (or is running on this thread). Other
    /// threads block until the constructor finishes, unless the running
    /// thread is itself waiting on the caller: then the caller proceeds and
    /// sees partial state, as on re-entry.
    fn ensure(
        self: &Arc<Self>,
        waits: &InitWaits,
        ctor: impl FnOnce() -> RtResult<()>,
    ) -> RtResult<()> {
        if self.state.load(Ordering::Acquire) == INITIALIZED {
            return Ok(());
        }
        let me = thread::current().id();
        let mut progress = self.progress.lock();
        loop {
            let owner = match &*progress {
                Progress::Done => return Ok(()),
                Progress::Failed(e) => return Err(e.clone()),
                Progress::Idle => break,
                Progress::Running(owner) => *owner,
            };
            if owner == me {
                return Ok(());
            }
            drop(progress);
            if !waits.block_on(me, self) {
                debug!(
                    ty = %self.ty,
                    owner = ?owner,
                    "class constructors wait on each other; not blocking"
                );
                return Ok(());
            }
            progress = self.progress.lock();
            if matches!(*progress, Progress::Running(_)) {
                self.finished.wait(&mut progress);
            }
            drop(progress);
            waits.unblock(me);
            progress = self.progress.lock();
        }
        *progress = Progress::Running(me);
        self.state.store(INITIALIZING, Ordering::Release);
        drop(progress);

        self.runs.fetch_add(1, Ordering::SeqCst);
        info!(ty = %self.ty, "running class constructor");
        let mut guard = RunGuard {
            init: self,
            armed: true,
        };
        let result = ctor();
        guard.armed = false;
        self.finish(result)
    }

    fn finish(&self, result: RtResult<()>) -> RtResult<()> {
        let mut progress = self.progress.lock();
        let outcome = match result {
            Ok(()) => {
                *progress = Progress::Done;
                self.state.store(INITIALIZED, Ordering::Release);
                Ok(())
            }
            Err(cause) => {
                warn!(ty = %self.ty, error = %cause, "class constructor failed");
                let err = RuntimeError::TypeInitialization {
                    ty: self.ty.clone(),
                    cause: Arc::new(cause),
                };
                *progress = Progress::Failed(err.clone());
                self.state.store(FAILED, Ordering::Release);
                Err(err)
            }
        };
        drop(progress);
        self.finished.notify_all();
        outcome
    }
}

/// Which class constructor each blocked thread waits for. Cross-thread
/// cycles are found by walking owner to waited-on constructor to owner.
#[derive(Default)]
pub(crate) struct InitWaits {
    blocked: Mutex<FxHashMap<ThreadId, Arc<ClassInit>>>,
}

impl InitWaits {
    /// Record that `me` waits for `init`. Refuses (and records nothing)
    /// when the owner of `init` is transitively waiting on `me`.
    fn block_on(&self, me: ThreadId, init: &Arc<ClassInit>) -> bool {
        let mut blocked = self.blocked.lock();
        let mut next = init.owner();
        // A chain visits each blocked thread at most once.
        for _ in 0..=blocked.len() {
            let Some(owner) = next else { break };
            if owner == me {
                return false;
            }
            next = blocked.get(&owner).and_then(|waited| waited.owner());
        }
        blocked.insert(me, Arc::clone(init));
        true
    }

    fn unblock(&self, me: ThreadId) {
        self.blocked.lock().remove(&me);
    }
}

// ---------------------------------------------------------------------------
// StaticStorageBlock
// ---------------------------------------------------------------------------

/// Static (or thread-static) field values of one exact type, indexed by the
/// field's position among its definition's fields.
pub struct StaticStorageBlock {
    pub ty: TypeHandle,
    pub storage: FieldStorage,
    /// Owning thread, for thread-static blocks.
    pub thread: Option<ThreadId>,
    fields: Mutex<Vec<Value>>,
    init: Arc<ClassInit>,
}

impl std::fmt::Debug for StaticStorageBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaticStorageBlock")
            .field("ty", &self.ty)
            .field("storage", &self.storage)
            .field("thread", &self.thread)
            .field("state", &self.init.state())
            .finish()
    }
}

impl StaticStorageBlock {
    pub fn state(&self) -> InitState {
        self.init.state()
    }

    pub fn initializer_runs(&self) -> usize {
        self.init.runs()
    }

    /// The declared type of `field`, provided it lives in this block.
    fn check(&self, rt: &Runtime, field: usize) -> RtResult<(String, Ty)> {
        let td = rt.def_of(&self.ty)?;
        match td.fields.get(field) {
            Some(f) if f.storage == self.storage => Ok((f.name.clone(), f.ty.clone())),
            _ => Err(RuntimeError::MissingField {
                owner: self.ty.to_string(),
                name: format!("#{}", field),
            }),
        }
    }

    fn index_of(&self, rt: &Runtime, name: &str) -> RtResult<usize> {
        rt.def_of(&self.ty)?
            .field_index(name)
            .ok_or_else(|| RuntimeError::MissingField {
                owner: self.ty.to_string(),
                name: name.to_string(),
            })
    }

    /// Read a field, running the class constructor first if needed.
    pub fn read(&self, rt: &Runtime, field: usize) -> RtResult<Value> {
        self.check(rt, field)?;
        rt.ensure_class_init(&self.ty)?;
        Ok(self.fields.lock()[field].clone())
    }

    /// Write a field. The value must be an instance of the field's type
    /// for this instantiation.
    pub fn write(&self, rt: &Runtime, field: usize, value: Value) -> RtResult<()> {
        let (name, declared) = self.check(rt, field)?;
        let fty = rt.load(&declared.subst(self.ty.type_args(), &[]))?;
        let fits = match &value {
            Value::Null => fty.is_reference_type(),
            other => rt.is_instance(other, &fty)?,
        };
        if !fits {
            let found = match &value {
                Value::Null => "null".to_string(),
                other => rt.type_of(other)?.to_string(),
            };
            return Err(RuntimeError::ArgumentType {
                method: format!("{}.{}", self.ty, name),
                index: 0,
                expected: fty.to_string(),
                found,
            });
        }
        rt.ensure_class_init(&self.ty)?;
        self.fields.lock()[field] = value;
        Ok(())
    }

    pub fn read_named(&self, rt: &Runtime, name: &str) -> RtResult<Value> {
        let index = self.index_of(rt, name)?;
        self.read(rt, index)
    }

    pub fn write_named(&self, rt: &Runtime, name: &str, value: Value) -> RtResult<()> {
        let index = self.index_of(rt, name)?;
        self.write(rt, index, value)
    }
}

// ---------------------------------------------------------------------------
// Runtime: storage allocation
// ---------------------------------------------------------------------------

impl Runtime {
    pub(crate) fn class_init(&self, ty: &TypeHandle) -> Arc<ClassInit> {
        if let Some(init) = self.class_inits.read().get(&ty.id) {
            return Arc::clone(init);
        }
        let has_ctor = ty
            .def
            .is_some_and(|d| self.catalog.type_def(d).class_ctor.is_some());
        let mut table = self.class_inits.write();
        Arc::clone(
            table
                .entry(ty.id)
                .or_insert_with(|| Arc::new(ClassInit::new(ty, has_ctor))),
        )
    }

    /// Run the class constructor of `ty` if it has not run yet.
    pub fn ensure_class_init(&self, ty: &TypeHandle) -> RtResult<()> {
        let init = self.class_init(ty);
        init.ensure(&self.init_waits, || {
            let Some(ctor) = ty.def.and_then(|d| self.catalog.type_def(d).class_ctor) else {
                return Ok(());
            };
            self.invoke_method(&MethodInst::new(ty.clone(), ctor), None, Vec::new())
                .map(|_| ())
        })
    }

    pub fn class_init_state(&self, ty: &TypeHandle) -> InitState {
        self.class_init(ty).state()
    }

    /// The static storage block of an exact type. Allocation does not run
    /// the class constructor; the first read or write does.
    pub fn static_storage(&self, ty: &TypeHandle) -> RtResult<Arc<StaticStorageBlock>> {
        self.statics.get_or_try_init(
            &ty.id,
            || format!("statics of {}", ty),
            || {
                let block = self.new_block(ty, FieldStorage::Static, None)?;
                debug!(ty = %ty, "allocated static storage");
                Ok(Arc::new(block))
            },
        )
    }

    /// The calling thread's thread-static block of an exact type. Blocks
    /// are owned by the runtime and released with it.
    pub fn thread_static_storage(&self, ty: &TypeHandle) -> RtResult<Arc<StaticStorageBlock>> {
        let me = thread::current().id();
        let key = (me, ty.id);
        if let Some(block) = self.thread_statics.read().get(&key) {
            return Ok(Arc::clone(block));
        }
        let block = Arc::new(self.new_block(ty, FieldStorage::ThreadStatic, Some(me))?);
        debug!(ty = %ty, thread = ?me, "allocated thread-static storage");
        Ok(Arc::clone(self.thread_statics.write().entry(key).or_insert(block)))
    }

    fn new_block(
        &self,
        ty: &TypeHandle,
        storage: FieldStorage,
        thread: Option<ThreadId>,
    ) -> RtResult<StaticStorageBlock> {
        let td = self.def_of(ty)?;
        let mut fields = Vec::with_capacity(td.fields.len());
        for field in &td.fields {
            if field.storage == storage {
                let fty = self.load(&field.ty.subst(ty.type_args(), &[]))?;
                fields.push(self.default_value(&fty)?);
            } else {
                fields.push(Value::Void);
            }
        }
        Ok(StaticStorageBlock {
            ty: ty.clone(),
            storage,
            thread,
            fields: Mutex::new(fields),
            init: self.class_init(ty),
        })
    }
}
