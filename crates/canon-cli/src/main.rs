//! The canon inspection CLI.
//!
//! Provides the `canon` command with the following subcommands, each taking
//! a TOML catalog manifest:
//!
//! - `canon check <manifest>` - Validate the catalog
//! - `canon layout <manifest> <def>` - Virtual slot layout of a definition
//! - `canon layout <manifest> <type> --fields` - Field layout of a closed type
//! - `canon vtable <manifest> <type>` - Vtable of a closed type
//! - `canon interfaces <manifest> <type>` - Interface map of a closed type
//! - `canon canon <manifest> <type>...` - Canonical (code-sharing) forms
//! - `canon deps <manifest> [root]...` - Dependency edges, or the closure of roots
//!
//! Options:
//! - `--json` - Machine-readable output
//! - `--log-level` / `--log-format` - Override `CANON_LOG_LEVEL` / `CANON_LOG_FORMAT`

mod logging;
mod manifest;

use std::path::{Path, PathBuf};
use std::process;

use canon_rt::Runtime;
use canon_types::{analyze, canonical_type, parse_ty, DefRef, Scope};
use clap::{Parser, Subcommand};
use serde_json::json;
use tracing::debug;

use logging::{LogFormat, LogLevel, LogSettings};
use manifest::Manifest;

#[derive(Parser)]
#[command(name = "canon", version, about = "Inspect shared-generics catalogs")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long = "log-level", global = true, value_parser = parse_level)]
    log_level: Option<LogLevel>,

    /// Log format (auto, text, json)
    #[arg(long = "log-format", global = true, value_parser = parse_format)]
    log_format: Option<LogFormat>,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a catalog manifest
    Check {
        /// Path to the manifest
        manifest: PathBuf,
    },

    /// Print the virtual slot layout of a definition
    Layout {
        /// Path to the manifest
        manifest: PathBuf,

        /// Definition name, or a closed type with --fields
        ty: String,

        /// Print the instance field layout of a closed type instead
        #[arg(long)]
        fields: bool,
    },

    /// Print the vtable of a closed type
    Vtable {
        /// Path to the manifest
        manifest: PathBuf,

        /// Closed type, e.g. `List<String>`
        ty: String,
    },

    /// Print the interface map of a closed type
    Interfaces {
        /// Path to the manifest
        manifest: PathBuf,

        /// Closed type, e.g. `List<String>`
        ty: String,
    },

    /// Print the canonical form of closed types
    Canon {
        /// Path to the manifest
        manifest: PathBuf,

        /// Closed types
        #[arg(required = true)]
        types: Vec<String>,
    },

    /// Print dependency edges, or everything reachable from the given roots
    Deps {
        /// Path to the manifest
        manifest: PathBuf,

        /// Roots: `Type` or `Type::Method`
        roots: Vec<String>,
    },
}

fn parse_level(s: &str) -> Result<LogLevel, String> {
    LogLevel::parse(s).ok_or_else(|| format!("unknown log level `{s}`"))
}

fn parse_format(s: &str) -> Result<LogFormat, String> {
    LogFormat::parse(s).ok_or_else(|| format!("unknown log format `{s}`"))
}

fn main() {
    let cli = Cli::parse();
    let settings = LogSettings {
        format: cli.log_format,
        level: cli.log_level,
    };
    logging::init_logging(settings.merged_with_env());

    let json = cli.json;
    let result = match cli.command {
        Commands::Check { manifest } => check(&manifest, json),
        Commands::Layout {
            manifest,
            ty,
            fields,
        } => {
            if fields {
                field_layout(&manifest, &ty, json)
            } else {
                slot_layout(&manifest, &ty, json)
            }
        }
        Commands::Vtable { manifest, ty } => vtable(&manifest, &ty, json),
        Commands::Interfaces { manifest, ty } => interfaces(&manifest, &ty, json),
        Commands::Canon { manifest, types } => canon(&manifest, &types, json),
        Commands::Deps { manifest, roots } => deps(&manifest, &roots, json),
    };

    if let Err(e) = result {
        if json {
            println!("{}", json!({ "ok": false, "error": e }));
        } else {
            eprintln!("error: {}", e);
        }
        process::exit(1);
    }
}

// ── Helpers ────────────────────────────────────────────────────────────

fn load(path: &Path) -> Result<Manifest, String> {
    let manifest = manifest::load(path).map_err(|e| e.to_string())?;
    debug!(
        target: "canon::cli",
        manifest = %path.display(),
        types = manifest.catalog.type_count(),
        methods = manifest.catalog.method_count(),
        "manifest loaded"
    );
    Ok(manifest)
}

fn runtime(path: &Path) -> Result<Runtime, String> {
    let manifest = load(path)?;
    Runtime::builder(manifest.catalog)
        .config(manifest.runtime)
        .build()
        .map_err(|e| e.to_string())
}

fn emit(value: serde_json::Value) {
    println!("{}", value);
}

// ── Commands ───────────────────────────────────────────────────────────

fn check(path: &Path, json: bool) -> Result<(), String> {
    let manifest = load(path)?;
    let catalog = &manifest.catalog;
    match catalog.validate() {
        Ok(()) => {
            if json {
                emit(json!({
                    "ok": true,
                    "types": catalog.type_count(),
                    "methods": catalog.method_count(),
                }));
            } else {
                println!(
                    "ok: {} types, {} methods",
                    catalog.type_count(),
                    catalog.method_count()
                );
            }
            Ok(())
        }
        Err(errors) => {
            let messages: Vec<String> = errors.iter().map(ToString::to_string).collect();
            if json {
                emit(json!({ "ok": false, "errors": messages }));
            } else {
                for message in &messages {
                    eprintln!("error: {}", message);
                }
            }
            process::exit(1);
        }
    }
}

fn slot_layout(path: &Path, name: &str, json: bool) -> Result<(), String> {
    let rt = runtime(path)?;
    let catalog = rt.catalog();
    let def = catalog
        .type_by_name(name)
        .ok_or_else(|| format!("unknown type `{name}`"))?;
    let layout = rt.slot_layout(def).map_err(|e| e.to_string())?;

    if json {
        let slots: Vec<_> = layout
            .slots
            .iter()
            .enumerate()
            .map(|(index, slot)| {
                let current = catalog.method(slot.current);
                json!({
                    "slot": index,
                    "name": slot.name,
                    "generic_arity": slot.generic_arity,
                    "sealed": slot.sealed,
                    "introduced_by": catalog.method_path(slot.introduced_by),
                    "current": catalog.method_path(current.id),
                })
            })
            .collect();
        let declared: Vec<_> = layout
            .declared
            .iter()
            .map(|(m, relation)| json!({ "method": catalog.method_path(*m), "relation": relation }))
            .collect();
        emit(json!({ "type": name, "slots": slots, "declared": declared }));
    } else {
        print!("{}", layout.render(catalog));
    }
    Ok(())
}

fn field_layout(path: &Path, ty: &str, json: bool) -> Result<(), String> {
    let rt = runtime(path)?;
    let handle = rt.load_named(ty).map_err(|e| e.to_string())?;
    let layout = rt.type_layout(&handle).map_err(|e| e.to_string())?;

    if json {
        let fields: Vec<_> = layout
            .fields
            .iter()
            .map(|f| {
                json!({
                    "name": f.name,
                    "declaring": f.declaring.to_string(),
                    "type": f.ty.to_string(),
                    "offset": f.offset,
                })
            })
            .collect();
        emit(json!({
            "type": layout.ty.to_string(),
            "size": layout.size,
            "align": layout.align,
            "instance_size": layout.instance_size,
            "fields": fields,
        }));
    } else {
        print!("{}", layout.render());
    }
    Ok(())
}

fn vtable(path: &Path, ty: &str, json: bool) -> Result<(), String> {
    let rt = runtime(path)?;
    let handle = rt.load_named(ty).map_err(|e| e.to_string())?;
    let table = rt.vtable(&handle).map_err(|e| e.to_string())?;

    if json {
        let slots: Vec<_> = table
            .targets
            .iter()
            .enumerate()
            .map(|(index, target)| {
                json!({
                    "slot": index,
                    "owner": target.owner.to_string(),
                    "method": rt.catalog().method(target.method).name,
                })
            })
            .collect();
        emit(json!({ "type": table.ty.to_string(), "slots": slots }));
    } else {
        print!("{}", table.render(&rt));
    }
    Ok(())
}

fn interfaces(path: &Path, ty: &str, json: bool) -> Result<(), String> {
    let rt = runtime(path)?;
    let handle = rt.load_named(ty).map_err(|e| e.to_string())?;
    let map = rt.interface_map(&handle).map_err(|e| e.to_string())?;

    if json {
        let catalog = rt.catalog();
        let mut entries = Vec::new();
        for iface in map.interfaces.iter() {
            let Some(def) = iface.def else { continue };
            for &m in &catalog.type_def(def).methods {
                let entry = map.get(iface, m);
                entries.push(json!({
                    "interface": iface.to_string(),
                    "method": catalog.method(m).name,
                    "owner": entry.map(|e| e.target.owner.to_string()),
                    "target": entry.map(|e| catalog.method(e.target.method).name.clone()),
                    "explicit": entry.is_some_and(|e| e.explicit),
                    "slot": entry.and_then(|e| e.slot),
                }));
            }
        }
        emit(json!({ "type": map.ty.to_string(), "entries": entries }));
    } else {
        print!("{}", map.render(&rt));
    }
    Ok(())
}

fn canon(path: &Path, types: &[String], json: bool) -> Result<(), String> {
    let manifest = load(path)?;
    let catalog = &manifest.catalog;
    catalog
        .validate()
        .map_err(|errors| format!("{} catalog error(s); run `canon check`", errors.len()))?;

    let mut rows = Vec::with_capacity(types.len());
    for text in types {
        let ty = parse_ty(catalog, &Scope::empty(), text).map_err(|e| e.to_string())?;
        if ty.is_open() {
            return Err(format!("`{text}` is not a closed type"));
        }
        let canonical = canonical_type(catalog, &ty);
        let shared = canonical.contains_canon();
        rows.push((text.as_str(), canonical.display(catalog).to_string(), shared));
    }

    if json {
        let rows: Vec<_> = rows
            .iter()
            .map(|(ty, canonical, shared)| json!({ "type": ty, "canonical": canonical, "shared": shared }))
            .collect();
        emit(json!(rows));
    } else {
        for (ty, canonical, shared) in rows {
            let kind = if shared { "shared" } else { "exact" };
            println!("{ty} -> {canonical} ({kind})");
        }
    }
    Ok(())
}

fn deps(path: &Path, roots: &[String], json: bool) -> Result<(), String> {
    let manifest = load(path)?;
    let catalog = &manifest.catalog;
    let graph = analyze(catalog);

    let nodes: Vec<DefRef> = catalog
        .types()
        .map(|t| DefRef::Type(t.id))
        .chain(catalog.methods().map(|m| DefRef::Method(m.id)))
        .collect();

    if roots.is_empty() {
        let mut edges: Vec<(String, String)> = Vec::with_capacity(graph.edge_count());
        for &from in &nodes {
            for &to in graph.dependencies(from) {
                edges.push((from.describe(catalog), to.describe(catalog)));
            }
        }
        edges.sort();
        if json {
            let edges: Vec<_> = edges.iter().map(|(f, t)| json!({ "from": f, "to": t })).collect();
            emit(json!({ "edges": edges }));
        } else {
            for (from, to) in edges {
                println!("{from} -> {to}");
            }
        }
        return Ok(());
    }

    let mut starts = Vec::with_capacity(roots.len());
    for root in roots {
        starts.push(resolve_root(&manifest, root)?);
    }
    let mut reachable: Vec<String> = graph
        .reachable_from(&starts)
        .into_iter()
        .map(|d| d.describe(catalog))
        .collect();
    reachable.sort();

    if json {
        emit(json!({ "roots": roots, "reachable": reachable }));
    } else {
        for name in reachable {
            println!("{name}");
        }
    }
    Ok(())
}

/// `Type` or `Type::Method`.
fn resolve_root(manifest: &Manifest, root: &str) -> Result<DefRef, String> {
    let catalog = &manifest.catalog;
    let (ty, method) = match root.split_once("::") {
        Some((ty, method)) => (ty, Some(method)),
        None => (root, None),
    };
    let def = catalog
        .type_by_name(ty)
        .ok_or_else(|| format!("unknown type `{ty}`"))?;
    match method {
        None => Ok(DefRef::Type(def)),
        Some(name) => catalog
            .method_by_name(def, name)
            .map(DefRef::Method)
            .ok_or_else(|| format!("type `{ty}` has no method `{name}`")),
    }
}
