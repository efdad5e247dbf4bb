//! Definition-level dependency analysis.
//!
//! Every dictionary slot of a generic definition may, for some future
//! instantiation, need another definition (a type to load, a method to
//! compile). The graph built here records those edges conservatively so a
//! trimming pass can retain everything reachable from its roots; the runtime
//! checks resolved slots against such a retained set.

use rustc_hash::{FxHashMap, FxHashSet};
use serde::Serialize;

use crate::catalog::Catalog;
use crate::def::GenericLookup;
use crate::ty::{MethodDefId, Ty, TypeDefId};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum DefRef {
    Type(TypeDefId),
    Method(MethodDefId),
}

impl DefRef {
    pub fn describe(self, catalog: &Catalog) -> String {
        match self {
            DefRef::Type(id) => catalog.type_def(id).name.clone(),
            DefRef::Method(id) => catalog.method_path(id),
        }
    }
}

/// Directed graph of definitions. Edges point from a definition to the
/// definitions it needs.
#[derive(Default, Debug, Clone)]
pub struct DependencyGraph {
    edges: FxHashMap<DefRef, Vec<DefRef>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `from` needs `to`. Duplicate and self edges are ignored.
    pub fn add_edge(&mut self, from: DefRef, to: DefRef) {
        if from == to {
            return;
        }
        let deps = self.edges.entry(from).or_default();
        if !deps.contains(&to) {
            deps.push(to);
        }
    }

    pub fn dependencies(&self, of: DefRef) -> &[DefRef] {
        self.edges.get(&of).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn edge_count(&self) -> usize {
        self.edges.values().map(Vec::len).sum()
    }

    /// All definitions reachable from `roots` (roots included).
    pub fn reachable_from(&self, roots: &[DefRef]) -> FxHashSet<DefRef> {
        let mut reachable = FxHashSet::default();
        let mut worklist: Vec<DefRef> = roots.to_vec();

        while let Some(node) = worklist.pop() {
            if !reachable.insert(node) {
                continue;
            }
            for &dep in self.dependencies(node) {
                if !reachable.contains(&dep) {
                    worklist.push(dep);
                }
            }
        }

        reachable
    }
}

/// Build the conservative dependency graph of a catalog.
///
/// - a method needs its owner, the types in its signature, and everything
///   its dictionary schema mentions
/// - a type needs its base, interfaces, field types, class constructor,
///   every method it declares (overrides may be dispatched to) and
///   everything its dictionary schema mentions
pub fn analyze(catalog: &Catalog) -> DependencyGraph {
    let mut graph = DependencyGraph::new();

    for md in catalog.methods() {
        let from = DefRef::Method(md.id);
        graph.add_edge(from, DefRef::Type(md.owner));
        for ty in md.params.iter().chain(std::iter::once(&md.ret)) {
            add_type_edges(&mut graph, from, ty);
        }
        if let Some(iface) = &md.explicit_impl {
            add_type_edges(&mut graph, from, iface);
        }
        for lookup in &md.dictionary {
            add_lookup_edges(&mut graph, from, lookup);
        }
    }

    for td in catalog.types() {
        let from = DefRef::Type(td.id);
        if let Some(base) = &td.base {
            add_type_edges(&mut graph, from, base);
        }
        for iface in &td.interfaces {
            add_type_edges(&mut graph, from, iface);
        }
        for field in &td.fields {
            add_type_edges(&mut graph, from, &field.ty);
        }
        if let Some(cctor) = td.class_ctor {
            graph.add_edge(from, DefRef::Method(cctor));
        }
        for &m in &td.methods {
            graph.add_edge(from, DefRef::Method(m));
        }
        for lookup in &td.dictionary {
            add_lookup_edges(&mut graph, from, lookup);
        }
    }

    graph
}

/// The definitions a single lookup can need once its type expressions are
/// closed over arbitrary arguments.
pub fn lookup_targets(lookup: &GenericLookup) -> Vec<DefRef> {
    let mut out = Vec::new();
    for ty in lookup.types() {
        ty.visit_defs(&mut |def| out.push(DefRef::Type(def)));
    }
    if let Some(m) = lookup.method() {
        out.push(DefRef::Method(m));
    }
    out.sort();
    out.dedup();
    out
}

fn add_lookup_edges(graph: &mut DependencyGraph, from: DefRef, lookup: &GenericLookup) {
    for target in lookup_targets(lookup) {
        graph.add_edge(from, target);
    }
}

fn add_type_edges(graph: &mut DependencyGraph, from: DefRef, ty: &Ty) {
    ty.visit_defs(&mut |def| graph.add_edge(from, DefRef::Type(def)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::def::{MethodDef, MethodRef, TypeDef};

    /// Gen1.Run -> MakeArray<ClassGen<T>> -> ValueGen
    fn chain() -> (Catalog, MethodDefId, TypeDefId, TypeDefId) {
        let mut cat = Catalog::new();
        let value_gen = cat.add_type(TypeDef::structure("ValueGen").generics(&["T"]));
        let class_gen = cat.add_type(
            TypeDef::class("ClassGen")
                .generics(&["T"])
                .lookup(GenericLookup::Type(Ty::named(value_gen, vec![Ty::param(0)]))),
        );
        let helpers = cat.add_type(TypeDef::class("Helpers"));
        let make_array = cat.add_method(
            helpers,
            MethodDef::static_method("MakeArray")
                .generics(&["U"])
                .lookup(GenericLookup::Type(Ty::array(Ty::method_param(0)))),
        );
        let gen1 = cat.add_type(TypeDef::class("Gen1").generics(&["T"]));
        let run = cat.add_method(
            gen1,
            MethodDef::static_method("Run")
                .generics(&["V"])
                .lookup(GenericLookup::Method(MethodRef::generic(
                    Ty::def(helpers),
                    make_array,
                    vec![Ty::named(class_gen, vec![Ty::method_param(0)])],
                ))),
        );
        (cat, run, class_gen, value_gen)
    }

    #[test]
    fn reachability_follows_dictionary_chains() {
        let (cat, run, class_gen, value_gen) = chain();
        let graph = analyze(&cat);
        let retained = graph.reachable_from(&[DefRef::Method(run)]);
        assert!(retained.contains(&DefRef::Type(class_gen)));
        assert!(retained.contains(&DefRef::Type(value_gen)));
    }

    #[test]
    fn unrelated_definitions_are_not_retained() {
        let (mut cat, run, ..) = chain();
        let unused = cat.add_type(TypeDef::class("Unused"));
        let graph = analyze(&cat);
        let retained = graph.reachable_from(&[DefRef::Method(run)]);
        assert!(!retained.contains(&DefRef::Type(unused)));
    }

    #[test]
    fn types_retain_their_overrides() {
        let mut cat = Catalog::new();
        let base = cat.add_type(TypeDef::class("Base"));
        let m = cat.add_method(base, MethodDef::new("M").new_slot());
        let derived = cat.add_type(TypeDef::class("Derived").extends(Ty::def(base)));
        let over = cat.add_method(derived, MethodDef::new("M").overrides());

        let graph = analyze(&cat);
        assert!(graph.dependencies(DefRef::Type(derived)).contains(&DefRef::Method(over)));
        let retained = graph.reachable_from(&[DefRef::Type(derived)]);
        assert!(retained.contains(&DefRef::Method(m)));
    }

    #[test]
    fn lookup_targets_are_sorted_and_unique() {
        let lookup = GenericLookup::Type(Ty::named(
            TypeDefId(2),
            vec![Ty::def(TypeDefId(1)), Ty::def(TypeDefId(1))],
        ));
        assert_eq!(
            lookup_targets(&lookup),
            vec![DefRef::Type(TypeDefId(1)), DefRef::Type(TypeDefId(2))]
        );
    }

    #[test]
    fn self_edges_are_dropped() {
        let mut graph = DependencyGraph::new();
        let a = DefRef::Type(TypeDefId(0));
        graph.add_edge(a, a);
        graph.add_edge(a, DefRef::Type(TypeDefId(1)));
        graph.add_edge(a, DefRef::Type(TypeDefId(1)));
        assert_eq!(graph.edge_count(), 1);
    }
}
