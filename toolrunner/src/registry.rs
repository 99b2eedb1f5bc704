//! Component E: hold tool definitions and external-server bindings, and
//! resolve a name to the executor that should run it.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::RuntimeError;
use crate::model::{is_server_descriptor, ExternalServerDefinition, ToolDefinition};

/// A resolved name, tagged with the strategy that should execute it.
#[derive(Debug, Clone)]
pub enum Executor {
    Host(ToolDefinition),
    External(ExternalServerDefinition),
    Fallback(Box<Executor>, Box<Executor>),
}

/// Mapping name → Tool Definition and name → External Server Definition.
/// Both may be populated for the same name; see [`Registry::resolve`].
#[derive(Debug, Default)]
pub struct Registry {
    definitions: HashMap<String, ToolDefinition>,
    external: HashMap<String, ExternalServerDefinition>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every tool definition file under `dir`, skipping the file that
    /// matches `servers_path`'s base name. Duplicate names overwrite earlier
    /// entries in directory-read order.
    pub fn load_dir(dir: &Path, servers_path: &Path) -> Result<Self, RuntimeError> {
        let mut registry = Self::new();
        if !dir.exists() {
            return Ok(registry);
        }

        let entries = std::fs::read_dir(dir)
            .map_err(|e| RuntimeError::Configuration(format!("reading tool dir {}: {e}", dir.display())))?;

        for entry in entries {
            let entry = entry
                .map_err(|e| RuntimeError::Configuration(format!("reading tool dir entry: {e}")))?;
            let path = entry.path();
            if path.is_dir() || is_server_descriptor(&path, &PathBuf::from(servers_path)) {
                continue;
            }

            let raw = std::fs::read_to_string(&path)
                .map_err(|e| RuntimeError::Configuration(format!("reading {}: {e}", path.display())))?;
            let def: ToolDefinition = serde_yaml::from_str(&raw)
                .map_err(|e| RuntimeError::Configuration(format!("parsing {}: {e}", path.display())))?;
            registry.register(def);
        }

        Ok(registry)
    }

    pub fn register(&mut self, def: ToolDefinition) {
        self.definitions.insert(def.name.clone(), def);
    }

    pub fn register_external(&mut self, binding: ExternalServerDefinition) {
        self.external.insert(binding.name.clone(), binding);
    }

    /// The definition alone, used by the dispatcher when classifying a raw
    /// command string by its first token.
    pub fn get(&self, name: &str) -> Option<&ToolDefinition> {
        self.definitions.get(name)
    }

    /// Resolve `name` to an executor:
    ///
    /// 1. both exist → `Fallback(external, host)`
    /// 2. only external → `External`
    /// 3. only a definition → `Host`
    /// 4. neither → `None`
    pub fn resolve(&self, name: &str) -> Option<Executor> {
        let def = self.definitions.get(name).cloned();
        let ext = self.external.get(name).cloned();

        match (def, ext) {
            (Some(def), Some(ext)) => Some(Executor::Fallback(
                Box::new(Executor::External(ext)),
                Box::new(Executor::Host(def)),
            )),
            (None, Some(ext)) => Some(Executor::External(ext)),
            (Some(def), None) => Some(Executor::Host(def)),
            (None, None) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::OutputSpec;

    fn def(name: &str) -> ToolDefinition {
        ToolDefinition {
            name: name.to_string(),
            binary: None,
            args_template: None,
            default_args: vec![],
            timeout_sec: 0,
            container: None,
            output: OutputSpec::default(),
            proposal_required: None,
        }
    }

    fn ext(name: &str) -> ExternalServerDefinition {
        ExternalServerDefinition {
            name: name.to_string(),
            command: "node".to_string(),
            args: vec![],
            env: Default::default(),
            proposal_required: None,
        }
    }

    #[test]
    fn unknown_name_resolves_to_none() {
        let registry = Registry::new();
        assert!(registry.resolve("nmap").is_none());
    }

    #[test]
    fn host_only_resolves_to_host() {
        let mut registry = Registry::new();
        registry.register(def("nmap"));
        assert!(matches!(registry.resolve("nmap"), Some(Executor::Host(_))));
    }

    #[test]
    fn external_only_resolves_to_external() {
        let mut registry = Registry::new();
        registry.register_external(ext("browser"));
        assert!(matches!(registry.resolve("browser"), Some(Executor::External(_))));
    }

    #[test]
    fn both_present_resolves_to_fallback_external_then_host() {
        let mut registry = Registry::new();
        registry.register(def("nmap"));
        registry.register_external(ext("nmap"));
        match registry.resolve("nmap") {
            Some(Executor::Fallback(primary, secondary)) => {
                assert!(matches!(*primary, Executor::External(_)));
                assert!(matches!(*secondary, Executor::Host(_)));
            }
            other => panic!("expected Fallback, got {other:?}"),
        }
    }

    #[test]
    fn duplicate_names_overwrite() {
        let mut registry = Registry::new();
        registry.register(def("nmap"));
        let mut replacement = def("nmap");
        replacement.timeout_sec = 42;
        registry.register(replacement);
        assert_eq!(registry.get("nmap").unwrap().timeout_sec, 42);
    }
}
