//! Component G: classify a command, gate it behind the denylist and
//! approval policy, then launch and stream it to completion. Accepts
//! either a free-form shell command string or a pre-tokenized binary/argv
//! pair, and never converts one into the other.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::{broadcast, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::denylist::Denylist;
use crate::entities;
use crate::error::RuntimeError;
use crate::model::{make_id, OutputLine, ToolDefinition, ToolResult};
use crate::registry::Registry;
use crate::result_log::ResultLog;
use crate::truncate;

/// Per-call context: auto-approve mode and a cooperative cancellation token.
#[derive(Clone)]
pub struct RunContext {
    pub auto_approve: bool,
    pub cancel: CancellationToken,
}

impl RunContext {
    pub fn new(auto_approve: bool) -> Self {
        Self {
            auto_approve,
            cancel: CancellationToken::new(),
        }
    }
}

/// What `run` returned: either the command needs operator approval (no
/// streams, no result), or it was launched.
pub enum RunOutcome {
    NeedsApproval,
    Started(RunHandle),
}

/// Handle to a launched execution's output stream and eventual result.
pub struct RunHandle {
    pub lines: broadcast::Receiver<OutputLine>,
    pub result: oneshot::Receiver<ToolResult>,
}

/// Either a free-form shell command string, or an already-tokenized
/// binary/argv pair produced by the argument template engine. Keeping
/// these distinct means a rendered argv element is never rejoined into
/// a string and re-split on whitespace, which would corrupt any element
/// that legitimately contains an internal space.
enum Invocation {
    Raw(String),
    Argv { binary: String, args: Vec<String> },
}

impl Invocation {
    fn binary_and_rest(&self) -> Result<(String, Vec<String>), RuntimeError> {
        match self {
            Invocation::Raw(command) => {
                let mut tokens = command.split_whitespace();
                let binary = tokens.next().ok_or(RuntimeError::EmptyCommand)?.to_string();
                Ok((binary, tokens.map(|s| s.to_string()).collect()))
            }
            Invocation::Argv { binary, args } => {
                if binary.is_empty() {
                    return Err(RuntimeError::EmptyCommand);
                }
                Ok((binary.clone(), args.clone()))
            }
        }
    }

    /// Text for denylist matching. Read-only regex match, never re-parsed,
    /// so joining an argv pair for this purpose is harmless.
    fn match_text(&self) -> String {
        match self {
            Invocation::Raw(command) => command.clone(),
            Invocation::Argv { binary, args } => std::iter::once(binary.as_str())
                .chain(args.iter().map(String::as_str))
                .collect::<Vec<_>>()
                .join(" "),
        }
    }

    /// The literal text handed to the host shell. A raw command is passed
    /// through verbatim — callers may rely on shell syntax like pipes or
    /// redirection there. A tokenized argv is shell-escaped element by
    /// element so that its boundaries survive `sh -c`/`cmd /C` parsing.
    fn host_command_line(&self) -> String {
        match self {
            Invocation::Raw(command) => command.clone(),
            Invocation::Argv { binary, args } => std::iter::once(binary.as_str())
                .chain(args.iter().map(String::as_str))
                .map(shell_quote)
                .collect::<Vec<_>>()
                .join(" "),
        }
    }
}

/// Matches the teacher's own `format_path`/`format_pattern` escaping: the
/// `shell-escape` crate on Unix, single-quote doubling on Windows (where
/// `shell-escape` doesn't apply).
fn shell_quote(value: &str) -> String {
    if cfg!(windows) {
        format!("'{}'", value.replace('\'', "''"))
    } else {
        shell_escape::escape(std::borrow::Cow::Borrowed(value)).into_owned()
    }
}

struct Plan {
    binary: String,
    rest: Vec<String>,
    def: Option<ToolDefinition>,
    use_container: bool,
    host_command_line: String,
}

pub struct Runner {
    registry: Arc<Registry>,
    denylist: Arc<Denylist>,
    result_log: Arc<ResultLog>,
    container_runtime: String,
}

impl Runner {
    pub fn new(registry: Arc<Registry>, denylist: Arc<Denylist>, result_log: Arc<ResultLog>) -> Self {
        Self {
            registry,
            denylist,
            result_log,
            container_runtime: "docker".to_string(),
        }
    }

    /// Classify and, if approved, launch a free-form shell command string.
    pub async fn run(&self, ctx: &RunContext, command: &str) -> Result<RunOutcome, RuntimeError> {
        self.run_invocation(ctx, Invocation::Raw(command.to_string())).await
    }

    /// Launch a free-form shell command string, bypassing the denylist and
    /// the approval gate.
    pub async fn force_run(&self, ctx: &RunContext, command: &str) -> Result<RunHandle, RuntimeError> {
        self.force_run_invocation(ctx, Invocation::Raw(command.to_string())).await
    }

    /// Classify and, if approved, launch an already-tokenized binary/argv
    /// pair (as produced by the argument template engine). Each element is
    /// preserved intact end to end instead of being joined into a string
    /// and re-split.
    pub async fn run_argv(&self, ctx: &RunContext, binary: &str, args: &[String]) -> Result<RunOutcome, RuntimeError> {
        self.run_invocation(
            ctx,
            Invocation::Argv {
                binary: binary.to_string(),
                args: args.to_vec(),
            },
        )
        .await
    }

    /// Launch an already-tokenized binary/argv pair, bypassing the denylist
    /// and the approval gate.
    pub async fn force_run_argv(&self, ctx: &RunContext, binary: &str, args: &[String]) -> Result<RunHandle, RuntimeError> {
        self.force_run_invocation(
            ctx,
            Invocation::Argv {
                binary: binary.to_string(),
                args: args.to_vec(),
            },
        )
        .await
    }

    async fn run_invocation(&self, ctx: &RunContext, invocation: Invocation) -> Result<RunOutcome, RuntimeError> {
        let plan = self.classify(&invocation).await?;

        if !plan.use_container && self.denylist.matches(&invocation.match_text()) {
            return Err(RuntimeError::Blacklist);
        }

        if self.needs_approval(ctx, &plan) {
            debug!(binary = %plan.binary, "command requires approval");
            return Ok(RunOutcome::NeedsApproval);
        }

        self.launch(ctx, plan).await.map(RunOutcome::Started)
    }

    async fn force_run_invocation(&self, ctx: &RunContext, invocation: Invocation) -> Result<RunHandle, RuntimeError> {
        let plan = self.classify(&invocation).await?;
        self.launch(ctx, plan).await
    }

    fn needs_approval(&self, ctx: &RunContext, plan: &Plan) -> bool {
        if ctx.auto_approve {
            return false;
        }
        match (&plan.def, plan.use_container) {
            (Some(def), true) => def.container_proposal_required(),
            (None, true) => false,
            (Some(def), false) => def.host_proposal_required(),
            (None, false) => true,
        }
    }

    async fn classify(&self, invocation: &Invocation) -> Result<Plan, RuntimeError> {
        let (binary, rest) = invocation.binary_and_rest()?;
        let host_command_line = invocation.host_command_line();

        let def = self.registry.get(&binary).cloned();

        // `fallback_to_host=false` means containment was a hard requirement:
        // an unavailable runtime is a resolution failure, not a silent drop
        // to unsandboxed host execution.
        let use_container = match def.as_ref().and_then(|d| d.container.as_ref()) {
            Some(container) => {
                if container_runtime_available(&self.container_runtime).await {
                    true
                } else if container.fallback_to_host {
                    false
                } else {
                    return Err(RuntimeError::BinaryNotFound(self.container_runtime.clone()));
                }
            }
            None => false,
        };

        Ok(Plan {
            binary,
            rest,
            def,
            use_container,
            host_command_line,
        })
    }

    async fn launch(&self, ctx: &RunContext, plan: Plan) -> Result<RunHandle, RuntimeError> {
        let Plan {
            binary,
            rest,
            def,
            use_container,
            host_command_line,
        } = plan;

        let env: HashMap<String, String> = std::env::vars().collect();
        let cwd = std::env::current_dir().unwrap_or_else(|_| ".".into());

        let spawned = if use_container {
            let container = def
                .as_ref()
                .and_then(|d| d.container.clone())
                .expect("use_container implies a container spec");
            let mut argv = vec!["run".to_string(), "--rm".to_string(), format!("--network={}", container.network)];
            argv.extend(container.run_flags.clone());
            argv.push(container.image.clone());
            argv.push(binary.clone());
            argv.extend(rest.clone());

            info!(image = %container.image, binary = %binary, "launching container execution");
            toolrunner_process::spawn_process(&self.container_runtime, &argv, &cwd, &env, &None)
                .await
                .map_err(|e| RuntimeError::Runtime(format!("failed to start container: {e}")))?
        } else {
            validate_binary_name(&binary)?;
            which::which(&binary).map_err(|_| RuntimeError::BinaryNotFound(binary.clone()))?;

            let (shell, flag) = host_shell();
            info!(binary = %binary, "launching host execution");
            toolrunner_process::spawn_process(shell, &[flag.to_string(), host_command_line], &cwd, &env, &None)
                .await
                .map_err(|e| RuntimeError::Runtime(format!("failed to start process: {e}")))?
        };

        let (line_tx, line_rx) = broadcast::channel::<OutputLine>(256);
        let (result_tx, result_rx) = oneshot::channel::<ToolResult>();

        let target = if rest.is_empty() { binary.clone() } else { rest.join(" ") };
        let args = rest;
        let timeout = def.as_ref().map(|d| d.timeout()).unwrap_or(Duration::from_secs(300));
        let output_spec = def.as_ref().map(|d| d.output.clone()).unwrap_or_default();
        let result_log = Arc::clone(&self.result_log);
        let cancel = ctx.cancel.clone();
        let tool_name = binary.clone();

        tokio::spawn(async move {
            let session = spawned.session;
            let started_at = SystemTime::now();
            let outcome = drain_to_completion(spawned.output_rx, line_tx, spawned.exit_rx, cancel, timeout).await;

            if outcome.cancelled || outcome.timed_out {
                session.terminate();
            }

            let finished_at = SystemTime::now();
            let id = make_id(&tool_name, &target, started_at);
            let contents: Vec<String> = outcome.raw_lines.iter().map(|l| l.content.clone()).collect();
            let truncated = truncate::truncate(&contents, &output_spec);
            let entities = entities::extract(&contents);

            let error = if outcome.cancelled {
                Some(RuntimeError::Cancelled.to_string())
            } else if outcome.timed_out {
                Some(RuntimeError::DeadlineExceeded.to_string())
            } else if outcome.exit_code != 0 {
                None
            } else {
                None
            };

            if outcome.exit_code != 0 && error.is_none() {
                warn!(tool = %tool_name, exit_code = outcome.exit_code, "command exited nonzero");
            }

            let result = ToolResult {
                id,
                tool_name,
                target,
                args,
                exit_code: outcome.exit_code,
                raw_lines: outcome.raw_lines,
                truncated,
                entities,
                started_at,
                finished_at,
                error,
            };

            result_log.save(result.clone());
            let _ = result_tx.send(result);
        });

        Ok(RunHandle {
            lines: line_rx,
            result: result_rx,
        })
    }
}

fn validate_binary_name(binary: &str) -> Result<(), RuntimeError> {
    if binary.is_empty() {
        return Err(RuntimeError::EmptyCommand);
    }
    if binary.contains('/') || binary.contains('\\') {
        return Err(RuntimeError::Validation(format!(
            "binary name must not contain path separators: {binary}"
        )));
    }
    Ok(())
}

fn host_shell() -> (&'static str, &'static str) {
    if cfg!(windows) {
        ("cmd", "/C")
    } else {
        ("sh", "-c")
    }
}

async fn container_runtime_available(runtime: &str) -> bool {
    let probe = tokio::process::Command::new(runtime)
        .arg("info")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    matches!(
        tokio::time::timeout(Duration::from_secs(3), probe).await,
        Ok(Ok(status)) if status.success()
    )
}

#[derive(Default)]
struct LineAssembler {
    buf: Vec<u8>,
}

impl LineAssembler {
    fn feed(&mut self, bytes: &[u8]) -> Vec<String> {
        self.buf.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
            let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            lines.push(String::from_utf8_lossy(&line).into_owned());
        }
        lines
    }

    fn flush(&mut self) -> Option<String> {
        if self.buf.is_empty() {
            None
        } else {
            Some(String::from_utf8_lossy(&std::mem::take(&mut self.buf)).into_owned())
        }
    }
}

struct DrainOutcome {
    exit_code: i32,
    raw_lines: Vec<OutputLine>,
    cancelled: bool,
    timed_out: bool,
}

fn emit_line(content: String, is_error: bool, line_tx: &broadcast::Sender<OutputLine>, raw_lines: &mut Vec<OutputLine>) {
    let line = OutputLine {
        timestamp: SystemTime::now(),
        content,
        is_error,
    };
    raw_lines.push(line.clone());
    let _ = line_tx.send(line);
}

fn emit_chunk(
    chunk: toolrunner_process::OutputChunk,
    out_buf: &mut LineAssembler,
    err_buf: &mut LineAssembler,
    line_tx: &broadcast::Sender<OutputLine>,
    raw_lines: &mut Vec<OutputLine>,
) {
    let completed = if chunk.is_error {
        err_buf.feed(&chunk.bytes)
    } else {
        out_buf.feed(&chunk.bytes)
    };
    for content in completed {
        emit_line(content, chunk.is_error, line_tx, raw_lines);
    }
}

/// Pump tagged output chunks into line-tagged events until the child exits,
/// the caller cancels, or `timeout` elapses; then drain whatever remains
/// buffered in the broadcast channel for a short grace period.
async fn drain_to_completion(
    mut output_rx: broadcast::Receiver<toolrunner_process::OutputChunk>,
    line_tx: broadcast::Sender<OutputLine>,
    mut exit_rx: oneshot::Receiver<i32>,
    cancel: CancellationToken,
    timeout: Duration,
) -> DrainOutcome {
    let mut out_buf = LineAssembler::default();
    let mut err_buf = LineAssembler::default();
    let mut raw_lines = Vec::new();

    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);

    let mut exit_code: Option<i32> = None;
    let mut cancelled = false;
    let mut timed_out = false;

    loop {
        tokio::select! {
            chunk = output_rx.recv() => {
                match chunk {
                    Ok(chunk) => emit_chunk(chunk, &mut out_buf, &mut err_buf, &line_tx, &mut raw_lines),
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
                continue;
            }
            code = &mut exit_rx, if exit_code.is_none() => {
                exit_code = Some(code.unwrap_or(-1));
            }
            _ = cancel.cancelled() => {
                cancelled = true;
            }
            _ = &mut deadline => {
                timed_out = true;
            }
        }
        if exit_code.is_some() || cancelled || timed_out {
            break;
        }
    }

    loop {
        match tokio::time::timeout(Duration::from_millis(200), output_rx.recv()).await {
            Ok(Ok(chunk)) => emit_chunk(chunk, &mut out_buf, &mut err_buf, &line_tx, &mut raw_lines),
            _ => break,
        }
    }

    if let Some(line) = out_buf.flush() {
        emit_line(line, false, &line_tx, &mut raw_lines);
    }
    if let Some(line) = err_buf.flush() {
        emit_line(line, true, &line_tx, &mut raw_lines);
    }

    DrainOutcome {
        exit_code: exit_code.unwrap_or(-1),
        raw_lines,
        cancelled,
        timed_out,
    }
}
