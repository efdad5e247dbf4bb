//! Integration tests for interface maps: closed-instantiation keying,
//! explicit vs. implicit implementations, re-implementation per level,
//! variance fallback and interface generic virtual methods.

use canon_rt::{MethodInst, Runtime, RuntimeError, TypeHandle, Value};
use canon_types::{Catalog, MethodDef, MethodDefId, Ty, TypeDef, Variance};

// ── Helpers ────────────────────────────────────────────────────────────

struct Fixture {
    rt: Runtime,
    name: MethodDefId,
    get: MethodDefId,
    take: MethodDefId,
    to: MethodDefId,
}

/// ```text
/// interface IFoo<T>    { String Name(T) }
/// interface ICov<out T> { T Get() }
/// interface IAct<in T>  { String Take(T) }
/// interface IConv       { String To<U>() }
///
/// class Multi : IFoo<String>, IFoo<Int32> {
///     public String Name(String)                 // "Multi.Name(String)"
///     String IFoo<Int32>.Name(Int32)             // "IFoo<Int32>.Name"
/// }
/// class A : IFoo<String> { public virtual String Name(String) }   // "A"
/// class B : A            { public override String Name(String) }  // "B"
/// class C : A, IFoo<String> { public new String Name(String) }    // "C"
/// class D : A            { public new String Name(String) }       // "D"
/// class Source : ICov<String> { public String Get() }
/// struct Counter : ICov<Int32> { public Int32 Get() }
/// class Sink : IAct<Object> { public String Take(Object) }
/// class Conv : IConv { public String To<U>() }
/// ```
fn fixture() -> Fixture {
    let mut c = Catalog::new();
    let ifoo = c.add_type(TypeDef::interface("IFoo").generics(&["T"]));
    let icov = c.add_type(TypeDef::interface("ICov").variant("T", Variance::Covariant));
    let iact = c.add_type(TypeDef::interface("IAct").variant("T", Variance::Contravariant));
    let iconv = c.add_type(TypeDef::interface("IConv"));

    let name = c.add_method(ifoo, MethodDef::new("Name").param(Ty::param(0)).returns(Ty::string()));
    let get = c.add_method(icov, MethodDef::new("Get").returns(Ty::param(0)));
    let take = c.add_method(iact, MethodDef::new("Take").param(Ty::param(0)).returns(Ty::string()));
    let to = c.add_method(iconv, MethodDef::new("To").generics(&["U"]).returns(Ty::string()));

    let foo_of = |arg: Ty| Ty::named(ifoo, vec![arg]);
    let multi = c.add_type(
        TypeDef::class("Multi")
            .implements(foo_of(Ty::string()))
            .implements(foo_of(Ty::int32())),
    );
    let a = c.add_type(TypeDef::class("A").implements(foo_of(Ty::string())));
    let b = c.add_type(TypeDef::class("B").extends(Ty::def(a)));
    let cc = c.add_type(
        TypeDef::class("C")
            .extends(Ty::def(a))
            .implements(foo_of(Ty::string())),
    );
    let d = c.add_type(TypeDef::class("D").extends(Ty::def(a)));
    let source = c.add_type(TypeDef::class("Source").implements(Ty::named(icov, vec![Ty::string()])));
    let counter = c.add_type(TypeDef::structure("Counter").implements(Ty::named(icov, vec![Ty::int32()])));
    let sink = c.add_type(TypeDef::class("Sink").implements(Ty::named(iact, vec![Ty::object()])));
    let conv = c.add_type(TypeDef::class("Conv").implements(Ty::def(iconv)));

    let name_of = |arg: Ty| MethodDef::new("Name").param(arg).returns(Ty::string());
    let multi_name = c.add_method(multi, name_of(Ty::string()));
    let multi_explicit = c.add_method(multi, name_of(Ty::int32()).explicit(foo_of(Ty::int32())));
    let a_name = c.add_method(a, name_of(Ty::string()).new_slot());
    let b_name = c.add_method(b, name_of(Ty::string()).overrides());
    let c_name = c.add_method(cc, name_of(Ty::string()));
    let d_name = c.add_method(d, name_of(Ty::string()));
    let source_get = c.add_method(source, MethodDef::new("Get").returns(Ty::string()));
    let counter_get = c.add_method(counter, MethodDef::new("Get").returns(Ty::int32()));
    let sink_take = c.add_method(sink, MethodDef::new("Take").param(Ty::object()).returns(Ty::string()));
    let conv_to = c.add_method(conv, MethodDef::new("To").generics(&["U"]).returns(Ty::string()));

    let rt = Runtime::builder(c)
        .code(multi_name, |f| Ok(Value::str(&format!("Multi.Name({})", f.arg(0)?.as_str()?))))
        .code(multi_explicit, |f| Ok(Value::str(&format!("IFoo<Int32>.Name({})", f.arg(0)?.as_i32()?))))
        .code(a_name, |_| Ok(Value::str("A")))
        .code(b_name, |_| Ok(Value::str("B")))
        .code(c_name, |_| Ok(Value::str("C")))
        .code(d_name, |_| Ok(Value::str("D")))
        .code(source_get, |_| Ok(Value::str("src")))
        .code(counter_get, |_| Ok(Value::I32(3)))
        .code(sink_take, |f| Ok(Value::str(&format!("took {:?}", f.arg(0)?))))
        .code(conv_to, |f| Ok(Value::str(&format!("Conv:{}", f.method_arg(0)?))))
        .build()
        .expect("catalog should validate");
    Fixture { rt, name, get, take, to }
}

fn load(rt: &Runtime, name: &str) -> TypeHandle {
    rt.load_named(name).unwrap()
}

fn instance(rt: &Runtime, name: &str) -> Value {
    Value::Object(rt.new_object(&load(rt, name)).unwrap())
}

fn call_name(fx: &Fixture, iface: &str, receiver: &str, arg: Value) -> String {
    let method = MethodInst::new(load(&fx.rt, iface), fx.name);
    let result = fx
        .rt
        .call_virtual(&method, instance(&fx.rt, receiver), vec![arg])
        .unwrap();
    result.as_str().unwrap().to_string()
}

// ── Closed instantiations ──────────────────────────────────────────────

#[test]
fn test_each_closed_instantiation_resolves_independently() {
    let fx = fixture();
    assert_eq!(
        call_name(&fx, "IFoo<String>", "Multi", Value::str("x")),
        "Multi.Name(x)"
    );
    assert_eq!(
        call_name(&fx, "IFoo<Int32>", "Multi", Value::I32(7)),
        "IFoo<Int32>.Name(7)"
    );
}

#[test]
fn test_explicit_implementation_is_not_a_public_method() {
    let fx = fixture();
    let multi = load(&fx.rt, "Multi");
    let found = fx.rt.method(&multi, "Name", &[]).unwrap();
    let result = fx
        .rt
        .call(&found, Some(instance(&fx.rt, "Multi")), vec![Value::str("y")])
        .unwrap();
    assert_eq!(result, Value::str("Multi.Name(y)"));
}

#[test]
fn test_interface_map_rendering() {
    let fx = fixture();
    let map = fx.rt.interface_map(&load(&fx.rt, "Multi")).unwrap();
    assert_eq!(map.len(), 2);
    insta::assert_snapshot!(map.render(&fx.rt), @r"
    Multi
      IFoo<String>::Name -> Multi::Name
      IFoo<Int32>::Name -> Multi::Name (explicit)
    ");
}

// ── Re-implementation per level ────────────────────────────────────────

#[test]
fn test_virtual_implementation_follows_overrides() {
    let fx = fixture();
    assert_eq!(call_name(&fx, "IFoo<String>", "A", Value::str("x")), "A");
    assert_eq!(call_name(&fx, "IFoo<String>", "B", Value::str("x")), "B");

    let map = fx.rt.interface_map(&load(&fx.rt, "B")).unwrap();
    let entry = map.get(&load(&fx.rt, "IFoo<String>"), fx.name).unwrap();
    assert_eq!(entry.slot, Some(0));
    assert!(!entry.explicit);
}

#[test]
fn test_redeclaring_level_reimplements_interface() {
    let fx = fixture();
    assert_eq!(call_name(&fx, "IFoo<String>", "C", Value::str("x")), "C");
}

#[test]
fn test_hiding_method_without_redeclaration_keeps_base_implementation() {
    let fx = fixture();
    assert_eq!(call_name(&fx, "IFoo<String>", "D", Value::str("x")), "A");

    // A direct call through D still reaches the hiding method.
    let d = load(&fx.rt, "D");
    let direct = fx.rt.method(&d, "Name", &[]).unwrap();
    let result = fx
        .rt
        .call(&direct, Some(instance(&fx.rt, "D")), vec![Value::str("x")])
        .unwrap();
    assert_eq!(result, Value::str("D"));
}

// ── Variance ───────────────────────────────────────────────────────────

#[test]
fn test_covariant_interface_falls_back_to_compatible_instantiation() {
    let fx = fixture();
    let source = load(&fx.rt, "Source");
    let wanted = load(&fx.rt, "ICov<Object>");
    assert!(fx.rt.is_assignable(&source, &wanted).unwrap());

    let get = MethodInst::new(wanted, fx.get);
    let result = fx.rt.call_virtual(&get, instance(&fx.rt, "Source"), vec![]).unwrap();
    assert_eq!(result, Value::str("src"));
}

#[test]
fn test_contravariant_interface_falls_back_to_compatible_instantiation() {
    let fx = fixture();
    let take = MethodInst::new(load(&fx.rt, "IAct<String>"), fx.take);
    let result = fx
        .rt
        .call_virtual(&take, instance(&fx.rt, "Sink"), vec![Value::str("s")])
        .unwrap();
    assert_eq!(result, Value::str("took \"s\""));
}

#[test]
fn test_variance_requires_reference_type_arguments() {
    let fx = fixture();
    let counter = load(&fx.rt, "Counter");
    let wanted = load(&fx.rt, "ICov<Object>");
    assert!(!fx.rt.is_assignable(&counter, &wanted).unwrap());

    let err = fx
        .rt
        .resolve_interface_method(&counter, &MethodInst::new(wanted, fx.get))
        .unwrap_err();
    assert!(
        matches!(err, RuntimeError::MissingInterfaceImplementation { .. }),
        "got {err:?}"
    );
}

#[test]
fn test_invariant_interface_has_no_fallback() {
    let fx = fixture();
    let multi = load(&fx.rt, "Multi");
    let method = MethodInst::new(load(&fx.rt, "IFoo<Object>"), fx.name);
    let err = fx.rt.resolve_interface_method(&multi, &method).unwrap_err();
    match err {
        RuntimeError::MissingInterfaceImplementation { ty, interface, method } => {
            assert_eq!(ty, "Multi");
            assert_eq!(interface, "IFoo<Object>");
            assert_eq!(method, "Name");
        }
        other => panic!("expected MissingInterfaceImplementation, got {other:?}"),
    }
}

// ── Interface generic virtual methods ──────────────────────────────────

#[test]
fn test_interface_generic_method_is_respecialized_per_call() {
    let fx = fixture();
    let iconv = load(&fx.rt, "IConv");
    let conv = load(&fx.rt, "Conv");
    for arg in ["Int32", "String", "Counter"] {
        let call = MethodInst::generic(iconv.clone(), fx.to, vec![load(&fx.rt, arg)]);
        let resolved = fx.rt.resolve_interface_method(&conv, &call).unwrap();
        assert_eq!(resolved.owner, conv);
        assert_eq!(resolved.method_args, call.method_args);
        let result = fx.rt.call_virtual(&call, instance(&fx.rt, "Conv"), vec![]).unwrap();
        assert_eq!(result, Value::str(&format!("Conv:{arg}")));
    }
}

#[test]
fn test_value_type_implements_interface_through_box() {
    let fx = fixture();
    let counter = load(&fx.rt, "Counter");
    let boxed = fx.rt.box_value(Value::Struct(fx.rt.new_struct(&counter).unwrap())).unwrap();
    let get = MethodInst::new(load(&fx.rt, "ICov<Int32>"), fx.get);
    assert_eq!(fx.rt.call_virtual(&get, boxed, vec![]).unwrap(), Value::I32(3));
}
