//! Shared data types for tool definitions, results, and wire schemas.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

fn default_network() -> String {
    "host".to_string()
}

/// Container delegation settings for a [`ToolDefinition`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerSpec {
    pub image: String,
    #[serde(default = "default_network")]
    pub network: String,
    #[serde(default)]
    pub run_flags: Vec<String>,
    #[serde(default)]
    pub fallback_to_host: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TruncationStrategy {
    HeadTail,
    HttpResponse,
}

/// Output-compression settings for a [`ToolDefinition`]. Zero fields fall
/// back to the defaults in [`OutputSpec::resolved`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputSpec {
    pub strategy: TruncationStrategy,
    #[serde(default)]
    pub head_lines: usize,
    #[serde(default)]
    pub tail_lines: usize,
    #[serde(default)]
    pub body_bytes: usize,
}

pub const DEFAULT_HEAD_LINES: usize = 50;
pub const DEFAULT_TAIL_LINES: usize = 30;
pub const DEFAULT_BODY_BYTES: usize = 500;

impl Default for OutputSpec {
    fn default() -> Self {
        Self {
            strategy: TruncationStrategy::HeadTail,
            head_lines: 0,
            tail_lines: 0,
            body_bytes: 0,
        }
    }
}

impl OutputSpec {
    /// Returns (head_lines, tail_lines, body_bytes) with zero fields replaced
    /// by their defaults.
    pub fn resolved(&self) -> (usize, usize, usize) {
        (
            if self.head_lines == 0 {
                DEFAULT_HEAD_LINES
            } else {
                self.head_lines
            },
            if self.tail_lines == 0 {
                DEFAULT_TAIL_LINES
            } else {
                self.tail_lines
            },
            if self.body_bytes == 0 {
                DEFAULT_BODY_BYTES
            } else {
                self.body_bytes
            },
        )
    }
}

/// Immutable-after-load description of how to invoke one external program.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub binary: Option<String>,
    pub args_template: Option<String>,
    #[serde(default)]
    pub default_args: Vec<String>,
    #[serde(default)]
    pub timeout_sec: u64,
    pub container: Option<ContainerSpec>,
    #[serde(default)]
    pub output: OutputSpec,
    pub proposal_required: Option<bool>,
}

impl ToolDefinition {
    pub fn binary_name(&self) -> &str {
        self.binary.as_deref().unwrap_or(&self.name)
    }

    pub fn timeout(&self) -> std::time::Duration {
        let secs = if self.timeout_sec == 0 {
            300
        } else {
            self.timeout_sec
        };
        std::time::Duration::from_secs(secs)
    }

    /// Effective proposal requirement when the tool runs in *host* mode:
    /// respects an explicit override, otherwise defaults to `true`
    /// (default-deny for host execution of a known tool).
    pub fn host_proposal_required(&self) -> bool {
        self.proposal_required.unwrap_or(true)
    }

    /// Effective proposal requirement when the tool runs in *container*
    /// mode: respects an explicit override, otherwise defaults to `false`.
    pub fn container_proposal_required(&self) -> bool {
        self.proposal_required.unwrap_or(false)
    }
}

/// Declarative description of a cooperating external tool-server process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalServerDefinition {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    pub proposal_required: Option<bool>,
}

/// One captured line of subprocess output.
#[derive(Debug, Clone)]
pub struct OutputLine {
    pub timestamp: std::time::SystemTime,
    pub content: String,
    pub is_error: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Port,
    Cve,
    Url,
    Ip,
}

/// A structured datum extracted from unstructured tool output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entity {
    pub kind: EntityKind,
    pub value: String,
    pub context: String,
}

/// The outcome of one completed execution, persisted in the result log.
#[derive(Debug, Clone)]
pub struct ToolResult {
    pub id: String,
    pub tool_name: String,
    pub target: String,
    pub args: Vec<String>,
    pub exit_code: i32,
    pub raw_lines: Vec<OutputLine>,
    pub truncated: String,
    pub entities: Vec<Entity>,
    pub started_at: std::time::SystemTime,
    pub finished_at: std::time::SystemTime,
    pub error: Option<String>,
}

/// A tool exposed by an external tool-server, tagged with the server that
/// provided it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalToolSchema {
    pub server: String,
    pub name: String,
    pub description: Option<String>,
    #[serde(default)]
    pub input_schema: serde_json::Value,
}

/// One block of a tool-call result payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentBlock {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
}

/// The result of a `tools/call` RPC, distinct from a JSON-RPC protocol error.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CallResult {
    #[serde(default)]
    pub content: Vec<ContentBlock>,
    #[serde(default, rename = "isError")]
    pub is_error: bool,
}

/// Build a stable result-log key: `{tool}@{target}@{micros_since_epoch}`.
///
/// Uniqueness for a given `(tool, target)` pair depends on the caller
/// supplying distinct `started_at` instants at microsecond resolution.
pub fn make_id(tool: &str, target: &str, started_at: std::time::SystemTime) -> String {
    let micros = started_at
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_micros())
        .unwrap_or(0);
    format!("{tool}@{target}@{micros}")
}

/// Where a tool definition file lives; used by [`crate::registry::Registry`]
/// to decide whether a directory entry is a tool definition or the external
/// server descriptor to be skipped.
pub fn is_server_descriptor(path: &std::path::Path, servers_path: &PathBuf) -> bool {
    path.file_name() == servers_path.file_name()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn make_id_differs_at_microsecond_resolution() {
        let t1 = std::time::UNIX_EPOCH + std::time::Duration::from_micros(1);
        let t2 = std::time::UNIX_EPOCH + std::time::Duration::from_micros(2);
        assert_ne!(make_id("nmap", "10.0.0.5", t1), make_id("nmap", "10.0.0.5", t2));
    }

    #[test]
    fn output_spec_defaults_apply_only_to_zero_fields() {
        let spec = OutputSpec {
            strategy: TruncationStrategy::HeadTail,
            head_lines: 10,
            tail_lines: 0,
            body_bytes: 0,
        };
        assert_eq!(spec.resolved(), (10, DEFAULT_TAIL_LINES, DEFAULT_BODY_BYTES));
    }

    #[test]
    fn proposal_required_defaults_differ_by_mode() {
        let def = ToolDefinition {
            name: "nmap".into(),
            binary: None,
            args_template: None,
            default_args: vec![],
            timeout_sec: 0,
            container: None,
            output: OutputSpec::default(),
            proposal_required: None,
        };
        assert!(def.host_proposal_required());
        assert!(!def.container_proposal_required());
    }
}
