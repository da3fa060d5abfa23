pub mod process;

use crate::fragment::SourceFragment;
use std::fmt;
use std::time::Duration;

/// Per-call resource and capability budget for one sandboxed execution.
/// Passed explicitly into every `execute` call; there is no ambient global.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceLimits {
    pub max_wall_time: Duration,
    pub max_memory: u64,
    pub max_output_bytes: usize,
    pub network_allowed: bool,
    pub filesystem_allowed: bool,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_wall_time: Duration::from_secs(5),
            max_memory: 256 * 1024 * 1024,
            max_output_bytes: 1024 * 1024,
            network_allowed: false,
            filesystem_allowed: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecStatus {
    Success,
    RuntimeError,
    Timeout,
    ResourceLimitExceeded,
    SandboxViolation,
}

impl fmt::Display for ExecStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecStatus::Success => write!(f, "success"),
            ExecStatus::RuntimeError => write!(f, "runtime error"),
            ExecStatus::Timeout => write!(f, "timeout"),
            ExecStatus::ResourceLimitExceeded => write!(f, "resource limit exceeded"),
            ExecStatus::SandboxViolation => write!(f, "sandbox violation"),
        }
    }
}

/// The structured outcome of one sandboxed execution. Produced exactly once
/// per `execute` call; partial stdout/stderr survive timeouts and kills.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub status: ExecStatus,
    pub stdout: String,
    pub stderr: String,
    pub exception_trace: Option<String>,
    pub wall_time: Duration,
    pub peak_memory: u64,
}

impl ExecutionResult {
    pub fn success() -> Self {
        Self {
            status: ExecStatus::Success,
            stdout: String::new(),
            stderr: String::new(),
            exception_trace: None,
            wall_time: Duration::ZERO,
            peak_memory: 0,
        }
    }
}

/// Infrastructure failure: the isolation mechanism itself could not be set
/// up. Expected faults of the executed code (crashes, timeouts, limit hits)
/// are `ExecStatus` values, never this error.
#[derive(Debug)]
pub enum SandboxError {
    InterpreterUnavailable(String),
    ScratchSetupFailed(String),
    SupervisionFailed(String),
}

impl fmt::Display for SandboxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SandboxError::InterpreterUnavailable(msg) => {
                write!(f, "interpreter unavailable: {}", msg)
            }
            SandboxError::ScratchSetupFailed(msg) => {
                write!(f, "scratch area setup failed: {}", msg)
            }
            SandboxError::SupervisionFailed(msg) => write!(f, "supervision failed: {}", msg),
        }
    }
}

impl std::error::Error for SandboxError {}

/// An isolated execution boundary for untrusted Python fragments.
///
/// Implementations are stateless across calls: each `execute` gets a fresh
/// context, fully torn down on every exit path including timeout.
pub trait Sandbox {
    fn execute(
        &self,
        fragment: &SourceFragment,
        limits: &ResourceLimits,
    ) -> Result<ExecutionResult, SandboxError>;
}
