//! Cross-platform async process spawning with process-group based cleanup.
//!
//! Provides the low-level primitives the tool-execution subsystem builds its
//! subprocess runner and external-tool-server transport on top of: a
//! [`ProcessHandle`] exposing tagged stdout/stderr output and stdin, and
//! process-group helpers for reliable termination on cancellation.
//!
//! ## Modules
//!
//! - [`pipe`] - spawn a child with stdin/stdout/stderr as regular pipes
//! - [`process`] - the unified process handle type
//! - [`process_group`] - OS-specific process-group management for cleanup

pub mod pipe;
pub mod process;
pub mod process_group;

pub use pipe::{PipeSpawnOptions, PipeStdinMode, spawn_process, spawn_process_no_stdin, spawn_process_with_options};
pub use process::{ChildTerminator, OutputChunk, ProcessHandle, SpawnedProcess};
pub use process_group::{
    DEFAULT_GRACEFUL_TIMEOUT_MS, GracefulTerminationResult, KillSignal, detach_from_tty,
    graceful_kill_process_group, graceful_kill_process_group_default, kill_child_process_group,
    kill_child_process_group_with_signal, kill_process_group, kill_process_group_by_pid,
    kill_process_group_by_pid_with_signal, kill_process_group_with_signal, set_parent_death_signal,
    set_process_group,
};

#[cfg(windows)]
pub use process_group::kill_process;
