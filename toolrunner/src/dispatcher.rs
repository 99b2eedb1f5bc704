//! Component J: orchestrates the registry, the runner, and the external
//! tool manager behind one entry point per call shape (raw command string
//! vs. named tool call with structured arguments).

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::RuntimeError;
use crate::fallback::{self, FallbackHandle};
use crate::mcp::ExternalToolManager;
use crate::model::{CallResult, ToolDefinition};
use crate::registry::{Executor, Registry};
use crate::runner::{RunContext, RunHandle, RunOutcome, Runner};
use crate::template;

pub enum ToolCallOutcome {
    NeedsApproval,
    Host(RunHandle),
    External(CallResult),
    Fallback(FallbackHandle),
}

pub struct Dispatcher {
    registry: Arc<Registry>,
    runner: Arc<Runner>,
    manager: Arc<ExternalToolManager>,
}

impl Dispatcher {
    pub fn new(registry: Arc<Registry>, runner: Arc<Runner>, manager: Arc<ExternalToolManager>) -> Self {
        Self { registry, runner, manager }
    }

    /// A free-form shell command string. The runner owns classification and
    /// the approval gate for this path; the dispatcher adds nothing.
    pub async fn run_command(&self, ctx: &RunContext, command: &str) -> Result<RunOutcome, RuntimeError> {
        self.runner.run(ctx, command).await
    }

    /// A named tool call with structured arguments, resolved through the
    /// registry into a tagged executor (§9's recommendation over dynamic
    /// dispatch at this seam).
    pub async fn call_tool(
        &self,
        ctx: &RunContext,
        cancel: &CancellationToken,
        name: &str,
        values: &HashMap<String, Value>,
    ) -> Result<ToolCallOutcome, RuntimeError> {
        let executor = self
            .registry
            .resolve(name)
            .ok_or_else(|| RuntimeError::BinaryNotFound(name.to_string()))?;
        self.dispatch(ctx, cancel, name, values, executor).await
    }

    async fn dispatch(
        &self,
        ctx: &RunContext,
        cancel: &CancellationToken,
        name: &str,
        values: &HashMap<String, Value>,
        executor: Executor,
    ) -> Result<ToolCallOutcome, RuntimeError> {
        match executor {
            Executor::Host(def) => {
                let (binary, args) = render_argv(&def, values)?;
                debug!(tool = %name, container = def.container.is_some(), "dispatching host-resolved tool call");
                match self.runner.run_argv(ctx, &binary, &args).await? {
                    RunOutcome::NeedsApproval => Ok(ToolCallOutcome::NeedsApproval),
                    RunOutcome::Started(handle) => Ok(ToolCallOutcome::Host(handle)),
                }
            }
            Executor::External(ext) => {
                if !ctx.auto_approve && self.manager.is_proposal_required(&ext.name).await {
                    debug!(tool = %name, server = %ext.name, "external tool call requires approval");
                    return Ok(ToolCallOutcome::NeedsApproval);
                }
                let args = values_to_arguments(values);
                let result = self.manager.call_tool(cancel, &ext.name, name, args).await?;
                Ok(ToolCallOutcome::External(result))
            }
            Executor::Fallback(primary, secondary) => {
                let (server, host) = match (*primary, *secondary) {
                    (Executor::External(ext), Executor::Host(def)) => (ext, def),
                    _ => {
                        return Err(RuntimeError::Configuration(format!(
                            "unexpected fallback pairing for tool {name}"
                        )));
                    }
                };
                if !ctx.auto_approve && self.manager.is_proposal_required(&server.name).await {
                    debug!(tool = %name, server = %server.name, "fallback tool call requires approval");
                    return Ok(ToolCallOutcome::NeedsApproval);
                }
                let (host_binary, host_args) = render_argv(&host, values)?;
                let call_args = values_to_arguments(values);
                let handle = fallback::run(
                    Arc::clone(&self.manager),
                    Arc::clone(&self.runner),
                    ctx.clone(),
                    cancel.clone(),
                    server,
                    host,
                    host_binary,
                    host_args,
                    call_args,
                )
                .await?;
                Ok(ToolCallOutcome::Fallback(handle))
            }
        }
    }
}

/// Renders a tool definition's argument template into a binary name and its
/// argv, keeping every rendered element intact (a sequence-valued template
/// entry may legally contribute an argument with an internal space).
fn render_argv(def: &ToolDefinition, values: &HashMap<String, Value>) -> Result<(String, Vec<String>), RuntimeError> {
    let rendered = template::render(def.args_template.as_deref().unwrap_or(""), values)?;
    let mut args = def.default_args.clone();
    args.extend(rendered);
    Ok((def.binary_name().to_string(), args))
}

fn values_to_arguments(values: &HashMap<String, Value>) -> Option<Value> {
    if values.is_empty() {
        None
    } else {
        Some(Value::Object(values.iter().map(|(k, v)| (k.clone(), v.clone())).collect()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::denylist::Denylist;
    use crate::model::OutputSpec;
    use crate::registry::Registry;
    use crate::result_log::ResultLog;

    fn dispatcher_with(registry: Registry) -> Dispatcher {
        let registry = Arc::new(registry);
        let denylist = Arc::new(Denylist::new(Vec::<&str>::new()));
        let result_log = Arc::new(ResultLog::new());
        let runner = Arc::new(Runner::new(Arc::clone(&registry), denylist, result_log));
        let manager = Arc::new(ExternalToolManager::new());
        Dispatcher::new(registry, runner, manager)
    }

    #[tokio::test]
    async fn unknown_tool_name_is_an_error() {
        let dispatcher = dispatcher_with(Registry::new());
        let ctx = RunContext::new(true);
        let cancel = CancellationToken::new();
        let err = dispatcher
            .call_tool(&ctx, &cancel, "nonexistent", &HashMap::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::BinaryNotFound(_)));
    }

    #[tokio::test]
    async fn host_tool_without_auto_approve_needs_approval() {
        let mut registry = Registry::new();
        registry.register(ToolDefinition {
            name: "echo".into(),
            binary: None,
            args_template: None,
            default_args: vec![],
            timeout_sec: 5,
            container: None,
            output: OutputSpec::default(),
            proposal_required: None,
        });
        let dispatcher = dispatcher_with(registry);
        let ctx = RunContext::new(false);
        let cancel = CancellationToken::new();
        let outcome = dispatcher
            .call_tool(&ctx, &cancel, "echo", &HashMap::new())
            .await
            .unwrap();
        assert!(matches!(outcome, ToolCallOutcome::NeedsApproval));
    }

    #[tokio::test]
    async fn host_tool_with_auto_approve_starts() {
        let mut registry = Registry::new();
        registry.register(ToolDefinition {
            name: "echo".into(),
            binary: None,
            args_template: Some("{message}".into()),
            default_args: vec![],
            timeout_sec: 5,
            container: None,
            output: OutputSpec::default(),
            proposal_required: None,
        });
        let dispatcher = dispatcher_with(registry);
        let ctx = RunContext::new(true);
        let cancel = CancellationToken::new();
        let mut values = HashMap::new();
        values.insert("message".to_string(), Value::String("hi".into()));
        let outcome = dispatcher.call_tool(&ctx, &cancel, "echo", &values).await.unwrap();
        match outcome {
            ToolCallOutcome::Host(mut handle) => {
                let result = handle.result.await.unwrap();
                assert_eq!(result.tool_name, "echo");
            }
            _ => panic!("expected a started host execution"),
        }
    }
}
