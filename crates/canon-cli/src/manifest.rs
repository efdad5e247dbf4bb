//! TOML catalog manifests.
//!
//! ```toml
//! [runtime]
//! max_type_depth = 32
//!
//! [[types]]
//! name = "Holder"
//! kind = "class"
//! generics = ["T"]
//! dictionary = ["statics Holder<T>"]
//!
//! [[types.fields]]
//! name = "value"
//! ty = "T"
//! storage = "static"
//!
//! [[types.methods]]
//! name = "Get"
//! returns = "T"
//! virtual = "new"
//! ```
//!
//! Type expressions and lookups use the catalog text syntax. Definitions
//! may refer to each other in any order: all types are registered before
//! any signature is parsed, and all methods before any dictionary.

use std::fs;
use std::path::{Path, PathBuf};

use canon_rt::RuntimeConfig;
use canon_types::{
    parse_lookup, parse_ty, Catalog, CatalogError, FieldDef, FieldStorage, GenericParam,
    MethodDef, Scope, TypeDef, TypeDefId, Variance,
};
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("cannot read `{}`: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid manifest: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("{context}: {source}")]
    Catalog {
        context: String,
        #[source]
        source: CatalogError,
    },

    #[error("{0}")]
    Invalid(String),
}

/// A loaded manifest: the catalog plus the `[runtime]` table.
#[derive(Debug)]
pub struct Manifest {
    pub catalog: Catalog,
    pub runtime: RuntimeConfig,
}

// ── On-disk shape ──────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ManifestFile {
    runtime: RuntimeConfig,
    types: Vec<TypeSpec>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
enum KindSpec {
    #[default]
    Class,
    Struct,
    Interface,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct TypeSpec {
    name: String,
    #[serde(default)]
    kind: KindSpec,
    #[serde(default)]
    generics: Vec<String>,
    base: Option<String>,
    #[serde(default)]
    interfaces: Vec<String>,
    #[serde(default)]
    fields: Vec<FieldSpec>,
    #[serde(default)]
    methods: Vec<MethodSpec>,
    #[serde(default)]
    dictionary: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
enum StorageSpec {
    #[default]
    Instance,
    Static,
    ThreadStatic,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct FieldSpec {
    name: String,
    ty: String,
    #[serde(default)]
    storage: StorageSpec,
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(rename_all = "lowercase")]
enum VirtualSpec {
    New,
    Override,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct MethodSpec {
    name: String,
    generics: Vec<String>,
    params: Vec<String>,
    returns: Option<String>,
    #[serde(rename = "static")]
    is_static: bool,
    #[serde(rename = "virtual")]
    virtuality: Option<VirtualSpec>,
    sealed: bool,
    #[serde(rename = "abstract")]
    is_abstract: bool,
    explicit: Option<String>,
    class_ctor: bool,
    dictionary: Vec<String>,
}

// ── Loading ────────────────────────────────────────────────────────────

pub fn load(path: &Path) -> Result<Manifest, ManifestError> {
    let text = fs::read_to_string(path).map_err(|source| ManifestError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse(&text)
}

pub fn parse(text: &str) -> Result<Manifest, ManifestError> {
    let file: ManifestFile = toml::from_str(text)?;
    let catalog = build_catalog(&file.types)?;
    Ok(Manifest {
        catalog,
        runtime: file.runtime,
    })
}

fn build_catalog(specs: &[TypeSpec]) -> Result<Catalog, ManifestError> {
    let mut catalog = Catalog::new();

    // Pass 1: register every definition with its generic parameters.
    let mut ids = Vec::with_capacity(specs.len());
    for spec in specs {
        let mut def = match spec.kind {
            KindSpec::Class => TypeDef::class(&spec.name),
            KindSpec::Struct => TypeDef::structure(&spec.name),
            KindSpec::Interface => TypeDef::interface(&spec.name),
        };
        for param in &spec.generics {
            def.generic_params.push(generic_param(&spec.name, param)?);
        }
        ids.push(catalog.add_type(def));
    }

    // Pass 2: hierarchy and fields.
    for (spec, &id) in specs.iter().zip(&ids) {
        let scope = Scope::of_type(catalog.type_def(id));
        let ctx = |what: &str| format!("{} {}", spec.name, what);
        if let Some(base) = &spec.base {
            let ty = parse_in(&catalog, &scope, base, ctx("base"))?;
            catalog.set_base(id, ty);
        }
        for iface in &spec.interfaces {
            let ty = parse_in(&catalog, &scope, iface, ctx("interface"))?;
            catalog.add_interface(id, ty);
        }
        for field in &spec.fields {
            let ty = parse_in(&catalog, &scope, &field.ty, ctx(&format!("field `{}`", field.name)))?;
            let storage = match field.storage {
                StorageSpec::Instance => FieldStorage::Instance,
                StorageSpec::Static => FieldStorage::Static,
                StorageSpec::ThreadStatic => FieldStorage::ThreadStatic,
            };
            catalog.type_def_mut(id).fields.push(FieldDef {
                name: field.name.clone(),
                ty,
                storage,
            });
        }
    }

    // Pass 3: method signatures.
    let mut methods = Vec::new();
    for (spec, &id) in specs.iter().zip(&ids) {
        for method in &spec.methods {
            let def = method_def(&catalog, id, &spec.name, method)?;
            methods.push((catalog.add_method(id, def), method));
        }
    }

    // Pass 4: dictionaries, once every method can be named.
    for (spec, &id) in specs.iter().zip(&ids) {
        let scope = Scope::of_type(catalog.type_def(id));
        for text in &spec.dictionary {
            let lookup = parse_lookup(&catalog, &scope, text).map_err(|source| {
                ManifestError::Catalog {
                    context: format!("{} dictionary", spec.name),
                    source,
                }
            })?;
            catalog.add_type_lookup(id, lookup);
        }
    }
    for (id, spec) in methods {
        let scope = Scope::of_method(&catalog, catalog.method(id));
        for text in &spec.dictionary {
            let lookup = parse_lookup(&catalog, &scope, text).map_err(|source| {
                ManifestError::Catalog {
                    context: format!("{} dictionary", catalog.method_path(id)),
                    source,
                }
            })?;
            catalog.add_method_lookup(id, lookup);
        }
    }

    Ok(catalog)
}

/// `T`, `out T` or `in T`.
fn generic_param(owner: &str, text: &str) -> Result<GenericParam, ManifestError> {
    let words: Vec<&str> = text.split_whitespace().collect();
    match words.as_slice() {
        [name] => Ok(GenericParam::new(name)),
        ["out", name] => Ok(GenericParam::with_variance(name, Variance::Covariant)),
        ["in", name] => Ok(GenericParam::with_variance(name, Variance::Contravariant)),
        _ => Err(ManifestError::Invalid(format!(
            "{owner}: bad generic parameter `{text}` (expected `T`, `in T` or `out T`)"
        ))),
    }
}

fn parse_in(
    catalog: &Catalog,
    scope: &Scope,
    text: &str,
    context: String,
) -> Result<canon_types::Ty, ManifestError> {
    parse_ty(catalog, scope, text).map_err(|source| ManifestError::Catalog { context, source })
}

fn method_def(
    catalog: &Catalog,
    owner: TypeDefId,
    owner_name: &str,
    spec: &MethodSpec,
) -> Result<MethodDef, ManifestError> {
    let mut def = if spec.class_ctor {
        MethodDef::class_ctor()
    } else if spec.name.is_empty() {
        return Err(ManifestError::Invalid(format!(
            "{owner_name}: method without a name"
        )));
    } else if spec.is_static {
        MethodDef::static_method(&spec.name)
    } else {
        MethodDef::new(&spec.name)
    };
    for param in &spec.generics {
        def.generic_params.push(generic_param(&def.name, param)?);
    }

    let scope = Scope {
        type_params: Scope::of_type(catalog.type_def(owner)).type_params,
        method_params: def.generic_params.iter().map(|p| p.name.clone()).collect(),
    };
    let ctx = |what: &str| format!("{owner_name}::{} {what}", def.name);

    let mut params = Vec::with_capacity(spec.params.len());
    for (i, text) in spec.params.iter().enumerate() {
        params.push(parse_in(catalog, &scope, text, ctx(&format!("parameter {i}")))?);
    }
    let ret = match &spec.returns {
        Some(text) => Some(parse_in(catalog, &scope, text, ctx("return type"))?),
        None => None,
    };
    let explicit = match &spec.explicit {
        Some(text) => Some(parse_in(catalog, &scope, text, ctx("explicit interface"))?),
        None => None,
    };

    for ty in params {
        def = def.param(ty);
    }
    if let Some(ret) = ret {
        def = def.returns(ret);
    }
    if let Some(iface) = explicit {
        def = def.explicit(iface);
    }
    def = match spec.virtuality {
        Some(VirtualSpec::New) => def.new_slot(),
        Some(VirtualSpec::Override) => def.overrides(),
        None => def,
    };
    if spec.sealed {
        def = def.sealed();
    }
    if spec.is_abstract {
        def = def.abstract_method();
    }
    Ok(def)
}
