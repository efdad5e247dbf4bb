//! Integration tests for per-instantiation static storage, thread statics
//! and class constructors.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, Barrier};
use std::thread;
use std::time::Duration;

use canon_rt::{Frame, InitState, RtResult, Runtime, RuntimeError, TypeHandle, Value};
use canon_types::{Catalog, GenericLookup, MethodDef, MethodDefId, Ty, TypeDef};

// ── Helpers ────────────────────────────────────────────────────────────

struct Fixture {
    rt: Runtime,
    get: MethodDefId,
    set: MethodDefId,
    cctor_runs: Arc<AtomicUsize>,
}

/// `class Gen<T> { static int count; [ThreadStatic] static int tls; static T last; }`
/// whose class constructor sets `count = 42` and `tls = 9`.
fn fixture() -> Fixture {
    let mut c = Catalog::new();
    let gen = c.add_type(
        TypeDef::class("Gen")
            .generics(&["T"])
            .static_field("count", Ty::int32())
            .thread_static_field("tls", Ty::int32())
            .static_field("last", Ty::param(0)),
    );
    let open = Ty::named(gen, vec![Ty::param(0)]);
    c.add_type_lookup(gen, GenericLookup::Statics(open.clone()));
    c.add_type_lookup(gen, GenericLookup::ThreadStatics(open));
    let cctor = c.add_method(gen, MethodDef::class_ctor());
    let get = c.add_method(gen, MethodDef::static_method("Get").returns(Ty::int32()));
    let set = c.add_method(gen, MethodDef::static_method("Set").param(Ty::int32()));

    let cctor_runs = Arc::new(AtomicUsize::new(0));
    let runs = Arc::clone(&cctor_runs);
    let rt = Runtime::builder(c)
        .code(cctor, move |f| {
            runs.fetch_add(1, Ordering::SeqCst);
            let rt = f.runtime();
            f.lookup_statics(0)?.write_named(rt, "count", Value::I32(42))?;
            f.lookup_thread_statics(1)?.write_named(rt, "tls", Value::I32(9))?;
            Ok(Value::Void)
        })
        .code(get, |f| f.lookup_statics(0)?.read_named(f.runtime(), "count"))
        .code(set, |f| {
            let value = f.arg(0)?;
            f.lookup_statics(0)?.write_named(f.runtime(), "count", value)?;
            Ok(Value::Void)
        })
        .build()
        .expect("catalog should validate");
    Fixture {
        rt,
        get,
        set,
        cctor_runs,
    }
}

fn gen_of(rt: &Runtime, arg: &str) -> TypeHandle {
    rt.load_named(&format!("Gen<{}>", arg)).unwrap()
}

fn call_get(fx: &Fixture, ty: &TypeHandle) -> Value {
    let get = canon_rt::MethodInst::new(ty.clone(), fx.get);
    fx.rt.call(&get, None, vec![]).unwrap()
}

// ── Static storage ─────────────────────────────────────────────────────

#[test]
fn test_statics_are_per_exact_instantiation() {
    let fx = fixture();
    let gs = gen_of(&fx.rt, "String");
    let go = gen_of(&fx.rt, "Object");

    let set = canon_rt::MethodInst::new(gs.clone(), fx.set);
    fx.rt.call(&set, None, vec![Value::I32(7)]).unwrap();

    assert_eq!(call_get(&fx, &gs), Value::I32(7));
    assert_eq!(call_get(&fx, &go), Value::I32(42));

    // Both instantiations run the same shared body.
    let a = fx.rt.compiled(&canon_rt::MethodInst::new(gs, fx.get)).unwrap();
    let b = fx.rt.compiled(&canon_rt::MethodInst::new(go, fx.get)).unwrap();
    assert!(Arc::ptr_eq(&a, &b));
    assert!(a.is_shared());
}

#[test]
fn test_value_type_instantiations_get_own_code() {
    let fx = fixture();
    let gi = gen_of(&fx.rt, "Int32");
    let gs = gen_of(&fx.rt, "String");
    let a = fx.rt.compiled(&canon_rt::MethodInst::new(gi, fx.get)).unwrap();
    let b = fx.rt.compiled(&canon_rt::MethodInst::new(gs, fx.get)).unwrap();
    assert!(!Arc::ptr_eq(&a, &b));
    assert!(!a.is_shared());
}

#[test]
fn test_storage_allocation_does_not_run_class_constructor() {
    let fx = fixture();
    let gs = gen_of(&fx.rt, "String");
    let block = fx.rt.static_storage(&gs).unwrap();
    assert_eq!(block.state(), InitState::Uninitialized);
    assert_eq!(fx.cctor_runs.load(Ordering::SeqCst), 0);

    assert_eq!(block.read_named(&fx.rt, "last").unwrap(), Value::Null);
    assert_eq!(block.state(), InitState::Initialized);
    assert_eq!(block.initializer_runs(), 1);
}

#[test]
fn test_class_constructor_runs_once_under_contention() {
    let fx = fixture();
    let gs = gen_of(&fx.rt, "String");
    let barrier = Barrier::new(8);
    crossbeam_utils::thread::scope(|s| {
        for _ in 0..8 {
            s.spawn(|_| {
                barrier.wait();
                assert_eq!(call_get(&fx, &gs), Value::I32(42));
            });
        }
    })
    .unwrap();
    assert_eq!(fx.cctor_runs.load(Ordering::SeqCst), 1);
}

#[test]
fn test_each_instantiation_runs_its_own_class_constructor() {
    let fx = fixture();
    call_get(&fx, &gen_of(&fx.rt, "String"));
    call_get(&fx, &gen_of(&fx.rt, "Object"));
    call_get(&fx, &gen_of(&fx.rt, "Int32"));
    call_get(&fx, &gen_of(&fx.rt, "String"));
    assert_eq!(fx.cctor_runs.load(Ordering::SeqCst), 3);
}

// ── Thread statics ─────────────────────────────────────────────────────

#[test]
fn test_thread_statics_are_per_thread() {
    let fx = fixture();
    let gs = gen_of(&fx.rt, "String");

    // The constructor runs here, so only this thread sees its write.
    let mine = fx.rt.thread_static_storage(&gs).unwrap();
    assert_eq!(mine.read_named(&fx.rt, "tls").unwrap(), Value::I32(9));
    mine.write_named(&fx.rt, "tls", Value::I32(5)).unwrap();

    crossbeam_utils::thread::scope(|s| {
        s.spawn(|_| {
            let theirs = fx.rt.thread_static_storage(&gs).unwrap();
            assert_eq!(theirs.read_named(&fx.rt, "tls").unwrap(), Value::I32(0));
            theirs.write_named(&fx.rt, "tls", Value::I32(11)).unwrap();
        });
    })
    .unwrap();

    assert_eq!(mine.read_named(&fx.rt, "tls").unwrap(), Value::I32(5));
    assert_eq!(fx.cctor_runs.load(Ordering::SeqCst), 1);
}

#[test]
fn test_thread_static_block_is_stable_per_thread() {
    let fx = fixture();
    let gs = gen_of(&fx.rt, "String");
    let a = fx.rt.thread_static_storage(&gs).unwrap();
    let b = fx.rt.thread_static_storage(&gs).unwrap();
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(a.thread, Some(std::thread::current().id()));
}

#[test]
fn test_static_field_kinds_are_not_interchangeable() {
    let fx = fixture();
    let gs = gen_of(&fx.rt, "String");
    let statics = fx.rt.static_storage(&gs).unwrap();
    let err = statics.read_named(&fx.rt, "tls").unwrap_err();
    assert!(matches!(err, RuntimeError::MissingField { .. }), "got {err:?}");
}

#[test]
fn test_thread_statics_are_released_with_the_runtime() {
    let mut released = Vec::new();
    for _ in 0..4 {
        let fx = fixture();
        let block = fx.rt.thread_static_storage(&gen_of(&fx.rt, "String")).unwrap();
        released.push(Arc::downgrade(&block));
    }
    assert!(released.iter().all(|weak| weak.upgrade().is_none()));
}

#[test]
fn test_static_writes_are_type_checked() {
    let fx = fixture();
    let gs = gen_of(&fx.rt, "String");
    let statics = fx.rt.static_storage(&gs).unwrap();

    let err = statics.write_named(&fx.rt, "count", Value::str("seven")).unwrap_err();
    match &err {
        RuntimeError::ArgumentType { expected, found, .. } => {
            assert_eq!(expected, "Int32");
            assert_eq!(found, "String");
        }
        other => panic!("expected ArgumentType, got {other:?}"),
    }
    let err = statics.write_named(&fx.rt, "count", Value::Null).unwrap_err();
    assert!(matches!(err, RuntimeError::ArgumentType { .. }), "got {err:?}");

    // `last` is a `T` field, so it takes the instantiation's argument.
    statics.write_named(&fx.rt, "last", Value::str("x")).unwrap();
    statics.write_named(&fx.rt, "last", Value::Null).unwrap();
    let err = statics.write_named(&fx.rt, "last", Value::I32(1)).unwrap_err();
    assert!(matches!(err, RuntimeError::ArgumentType { .. }), "got {err:?}");
    assert_eq!(statics.read_named(&fx.rt, "count").unwrap(), Value::I32(42));
}

// ── Class constructors on several threads ──────────────────────────────

/// Class constructor body that pauses, then sets `me.value` to
/// `other.value + 1`.
fn mutual_cctor(
    me: &'static str,
    other: &'static str,
) -> impl for<'a> Fn(&mut Frame<'a>) -> RtResult<Value> + Send + Sync + 'static {
    move |f| {
        thread::sleep(Duration::from_millis(100));
        let rt = f.runtime();
        let seen = rt
            .static_storage(&rt.load_named(other)?)?
            .read_named(rt, "value")?
            .as_i32()?;
        rt.static_storage(&rt.load_named(me)?)?
            .write_named(rt, "value", Value::I32(seen + 1))?;
        Ok(Value::Void)
    }
}

/// `class A { static Int32 value }` and `class B { static Int32 value }`
/// whose class constructors read each other.
fn mutual_runtime() -> Runtime {
    let mut c = Catalog::new();
    let a = c.add_type(TypeDef::class("A").static_field("value", Ty::int32()));
    let b = c.add_type(TypeDef::class("B").static_field("value", Ty::int32()));
    let a_cctor = c.add_method(a, MethodDef::class_ctor());
    let b_cctor = c.add_method(b, MethodDef::class_ctor());
    Runtime::builder(c)
        .code(a_cctor, mutual_cctor("A", "B"))
        .code(b_cctor, mutual_cctor("B", "A"))
        .build()
        .unwrap()
}

#[test]
fn test_class_constructors_waiting_on_each_other_do_not_deadlock() {
    let rt = Arc::new(mutual_runtime());
    let barrier = Arc::new(Barrier::new(2));
    let (tx, rx) = mpsc::channel();
    for name in ["A", "B"] {
        let (rt, barrier, tx) = (Arc::clone(&rt), Arc::clone(&barrier), tx.clone());
        thread::spawn(move || {
            barrier.wait();
            let ty = rt.load_named(name).unwrap();
            let value = rt.static_storage(&ty).unwrap().read_named(&rt, "value");
            let _ = tx.send((name, value));
        });
    }

    let mut values = Vec::new();
    for _ in 0..2 {
        let (name, value) = rx
            .recv_timeout(Duration::from_secs(5))
            .expect("class constructors deadlocked across threads");
        values.push((name, value.unwrap().as_i32().unwrap()));
    }
    // One constructor saw the other's partial state (0), the other its result.
    let mut results: Vec<i32> = values.iter().map(|(_, v)| *v).collect();
    results.sort();
    assert_eq!(results, vec![1, 2], "{values:?}");
    for name in ["A", "B"] {
        let ty = rt.load_named(name).unwrap();
        assert_eq!(rt.class_init_state(&ty), InitState::Initialized);
        assert_eq!(rt.static_storage(&ty).unwrap().initializer_runs(), 1);
    }
}

#[test]
fn test_class_constructor_reentry_on_one_thread_sees_partial_state() {
    let rt = mutual_runtime();
    let a = rt.load_named("A").unwrap();
    // A runs B's constructor, which reads A before A has stored anything.
    assert_eq!(rt.static_storage(&a).unwrap().read_named(&rt, "value").unwrap(), Value::I32(2));
    let b = rt.load_named("B").unwrap();
    assert_eq!(rt.static_storage(&b).unwrap().read_named(&rt, "value").unwrap(), Value::I32(1));
}

// ── Failing class constructors ─────────────────────────────────────────

#[test]
fn test_failed_class_constructor_is_terminal() {
    let mut c = Catalog::new();
    let broken = c.add_type(TypeDef::class("Broken").static_field("value", Ty::string()));
    let cctor = c.add_method(broken, MethodDef::class_ctor());
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&runs);
    let rt = Runtime::builder(c)
        .code(cctor, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Err(RuntimeError::thrown("boom"))
        })
        .build()
        .unwrap();

    let ty = rt.load_named("Broken").unwrap();
    let block = rt.static_storage(&ty).unwrap();
    for _ in 0..3 {
        let err = block.read_named(&rt, "value").unwrap_err();
        match &err {
            RuntimeError::TypeInitialization { ty, .. } => assert_eq!(ty, "Broken"),
            other => panic!("expected TypeInitialization, got {other:?}"),
        }
        assert!(matches!(err.root_cause(), RuntimeError::Thrown(msg) if msg == "boom"));
    }
    assert!(rt.new_object(&ty).is_err());
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(rt.class_init_state(&ty), InitState::Failed);
}

#[test]
fn test_type_without_class_constructor_is_initialized() {
    let mut c = Catalog::new();
    c.add_type(TypeDef::class("Plain").static_field("n", Ty::int64()));
    let rt = Runtime::builder(c).build().unwrap();
    let ty = rt.load_named("Plain").unwrap();
    assert_eq!(rt.class_init_state(&ty), InitState::Initialized);
    let block = rt.static_storage(&ty).unwrap();
    assert_eq!(block.read_named(&rt, "n").unwrap(), Value::I64(0));
    assert_eq!(block.initializer_runs(), 0);
}

#[test]
fn test_allocation_triggers_class_constructor() {
    let fx = fixture();
    let gs = gen_of(&fx.rt, "String");
    assert_eq!(fx.rt.class_init_state(&gs), InitState::Uninitialized);
    // Gen<T> is a class, so it can be allocated.
    fx.rt.new_object(&gs).unwrap();
    assert_eq!(fx.rt.class_init_state(&gs), InitState::Initialized);
    assert_eq!(fx.cctor_runs.load(Ordering::SeqCst), 1);
}
