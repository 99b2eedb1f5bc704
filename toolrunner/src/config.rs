//! Component L (ambient): YAML configuration with a cascading-default
//! lookup and a small `${VAR}` expander, mirroring the workspace-path →
//! explicit-path → home-directory → built-in-default pattern used
//! elsewhere in the codebase this crate is extracted from.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::RuntimeError;

fn default_tools_dir() -> String {
    "tools".to_string()
}

fn default_servers_path() -> String {
    "tools/servers.yaml".to_string()
}

pub const DEFAULT_MAX_PARALLEL: usize = 2;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeSource {
    pub name: String,
    pub path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ReconConfig {
    #[serde(default)]
    pub max_parallel: usize,
    #[serde(default)]
    pub initial_scans: Vec<String>,
}

impl ReconConfig {
    pub fn resolved_max_parallel(&self) -> usize {
        if self.max_parallel == 0 {
            DEFAULT_MAX_PARALLEL
        } else {
            self.max_parallel
        }
    }
}

/// Top-level application configuration. Absence of every candidate file
/// yields this struct's [`Default`] impl rather than an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MainConfig {
    #[serde(default)]
    pub knowledge: Vec<KnowledgeSource>,
    #[serde(default)]
    pub blacklist: Vec<String>,
    #[serde(default)]
    pub recon: ReconConfig,
    #[serde(default = "default_tools_dir")]
    pub tools_dir: String,
    #[serde(default = "default_servers_path")]
    pub servers_path: String,
}

impl Default for MainConfig {
    fn default() -> Self {
        Self {
            knowledge: Vec::new(),
            blacklist: Vec::new(),
            recon: ReconConfig::default(),
            tools_dir: default_tools_dir(),
            servers_path: default_servers_path(),
        }
    }
}

/// One entry of the external-server descriptor file (`{servers: [...]}`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerDescriptorFile {
    #[serde(default)]
    pub servers: Vec<crate::model::ExternalServerDefinition>,
}

/// Expand every `${NAME}` occurrence against the host environment.
/// Undefined variables expand to the empty string. Not a templating
/// engine — a single linear scan over `$`/`{`/`}` byte positions.
pub fn expand_vars(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut i = 0;
    while i < input.len() {
        if input[i..].starts_with("${") {
            if let Some(rel_end) = input[i + 2..].find('}') {
                let name = &input[i + 2..i + 2 + rel_end];
                out.push_str(&std::env::var(name).unwrap_or_default());
                i += 2 + rel_end + 1;
                continue;
            }
        }
        let ch = input[i..].chars().next().expect("i is a char boundary");
        out.push(ch);
        i += ch.len_utf8();
    }
    out
}

/// Cascading-default loader: explicit path, then a workspace-relative
/// file, then a home-directory file; the first one that *exists* wins. A
/// present-but-unparsable file is always an error; only absence of every
/// candidate falls back to [`MainConfig::default`].
pub struct ConfigLoader {
    workspace_relative: PathBuf,
    home_relative: PathBuf,
}

impl ConfigLoader {
    pub fn new(workspace_relative: impl Into<PathBuf>, home_relative: impl Into<PathBuf>) -> Self {
        Self {
            workspace_relative: workspace_relative.into(),
            home_relative: home_relative.into(),
        }
    }

    fn candidates(&self, explicit: Option<&Path>) -> Vec<PathBuf> {
        let mut candidates = Vec::new();
        if let Some(path) = explicit {
            candidates.push(path.to_path_buf());
        }
        candidates.push(self.workspace_relative.clone());
        if let Some(home) = dirs::home_dir() {
            candidates.push(home.join(&self.home_relative));
        }
        candidates
    }

    pub fn load(&self, explicit: Option<&Path>) -> Result<MainConfig, RuntimeError> {
        for candidate in self.candidates(explicit) {
            if candidate.exists() {
                return Self::load_file(&candidate);
            }
        }
        Ok(MainConfig::default())
    }

    fn load_file(path: &Path) -> Result<MainConfig, RuntimeError> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| RuntimeError::Configuration(format!("reading {}: {e}", path.display())))?;
        let expanded = expand_vars(&raw);
        serde_yaml::from_str(&expanded)
            .map_err(|e| RuntimeError::Configuration(format!("parsing {}: {e}", path.display())))
    }

    pub fn load_server_descriptor(&self, path: &Path) -> Result<Vec<crate::model::ExternalServerDefinition>, RuntimeError> {
        if !path.exists() {
            return Ok(Vec::new());
        }
        let raw = std::fs::read_to_string(path)
            .map_err(|e| RuntimeError::Configuration(format!("reading {}: {e}", path.display())))?;
        let expanded = expand_vars(&raw);
        let file: ServerDescriptorFile = serde_yaml::from_str(&expanded)
            .map_err(|e| RuntimeError::Configuration(format!("parsing {}: {e}", path.display())))?;
        Ok(file.servers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expand_vars_substitutes_defined_variable() {
        std::env::set_var("TOOLRUNNER_TEST_VAR", "wordlist");
        assert_eq!(expand_vars("path: /usr/share/${TOOLRUNNER_TEST_VAR}"), "path: /usr/share/wordlist");
        std::env::remove_var("TOOLRUNNER_TEST_VAR");
    }

    #[test]
    fn expand_vars_undefined_becomes_empty_string() {
        std::env::remove_var("TOOLRUNNER_TEST_DEFINITELY_UNSET");
        assert_eq!(expand_vars("${TOOLRUNNER_TEST_DEFINITELY_UNSET}value"), "value");
    }

    #[test]
    fn expand_vars_leaves_unterminated_placeholder_untouched() {
        assert_eq!(expand_vars("${OPEN"), "${OPEN");
    }

    #[test]
    fn missing_file_yields_default_config() {
        let loader = ConfigLoader::new("/nonexistent/toolrunner.yaml", ".config/toolrunner/does-not-exist.yaml");
        let config = loader.load(None).unwrap();
        assert_eq!(config.tools_dir, "tools");
        assert_eq!(config.recon.resolved_max_parallel(), DEFAULT_MAX_PARALLEL);
    }

    #[test]
    fn present_but_malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("toolrunner.yaml");
        std::fs::write(&path, "knowledge: [this is not valid: yaml: at all:").unwrap();
        let loader = ConfigLoader::new(&path, ".config/toolrunner/missing.yaml");
        let err = loader.load(None).unwrap_err();
        assert!(matches!(err, RuntimeError::Configuration(_)));
    }

    #[test]
    fn explicit_path_wins_over_workspace_relative() {
        let dir = tempfile::tempdir().unwrap();
        let explicit = dir.path().join("explicit.yaml");
        std::fs::write(&explicit, "tools_dir: from-explicit\n").unwrap();
        let loader = ConfigLoader::new(dir.path().join("workspace.yaml"), ".config/toolrunner/missing.yaml");
        let config = loader.load(Some(&explicit)).unwrap();
        assert_eq!(config.tools_dir, "from-explicit");
    }

    #[test]
    fn recon_max_parallel_defaults_when_zero() {
        let recon = ReconConfig { max_parallel: 0, initial_scans: vec![] };
        assert_eq!(recon.resolved_max_parallel(), DEFAULT_MAX_PARALLEL);
    }
}
