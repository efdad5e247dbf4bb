//! Runtime configuration.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Panic on dependency-tracking faults instead of returning the error.
    pub strict_dependency_checks: bool,
    /// Check every resolved dictionary slot against the retained set, when
    /// one is supplied.
    pub check_retained_dependencies: bool,
    /// Deepest type expression the loader accepts.
    pub max_type_depth: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            strict_dependency_checks: cfg!(debug_assertions),
            check_retained_dependencies: true,
            max_type_depth: 64,
        }
    }
}

impl RuntimeConfig {
    /// Defaults overlaid with `CANON_STRICT_DEPS` and `CANON_MAX_TYPE_DEPTH`.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides(
            std::env::var("CANON_STRICT_DEPS").ok().as_deref(),
            std::env::var("CANON_MAX_TYPE_DEPTH").ok().as_deref(),
        )
    }

    /// Apply textual overrides; unparsable values are ignored.
    pub fn with_env_overrides(mut self, strict: Option<&str>, max_depth: Option<&str>) -> Self {
        if let Some(value) = strict {
            match value.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => self.strict_dependency_checks = true,
                "0" | "false" | "no" | "off" => self.strict_dependency_checks = false,
                _ => {}
            }
        }
        if let Some(depth) = max_depth.and_then(|v| v.trim().parse().ok()) {
            self.max_type_depth = depth;
        }
        self
    }

    pub fn lenient() -> Self {
        Self {
            strict_dependency_checks: false,
            ..Self::default()
        }
    }
}
