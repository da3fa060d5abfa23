use super::{ExecStatus, ExecutionResult, ResourceLimits, Sandbox, SandboxError};
use crate::fragment::SourceFragment;
use std::io::Read;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use wait_timeout::ChildExt;

const POLL_INTERVAL: Duration = Duration::from_millis(25);
const VIOLATION_EXIT: i32 = 77;
const VIOLATION_MARKER: &str = "SANDBOX_VIOLATION:";

/// Runner installed next to the fragment in the scratch area. It registers an
/// audit hook before handing control to the user code, so the fragment's own
/// tracebacks keep their true file name and line numbers. Refusals write a
/// marker line to stderr and leave through a reserved exit code that the
/// supervisor maps to `SandboxViolation`.
const GUARD_SCRIPT: &str = r#"import os
import sys

SCRATCH = os.path.realpath(sys.argv[1])
TARGET = os.path.realpath(sys.argv[2])
FS_ALLOWED = sys.argv[3] == "1"
NET_ALLOWED = sys.argv[4] == "1"

VIOLATION_EXIT = 77

_prefixes = [SCRATCH]
for _p in (sys.prefix, sys.base_prefix, getattr(sys, "exec_prefix", "")):
    if _p:
        _real = os.path.realpath(_p)
        if _real not in _prefixes:
            _prefixes.append(_real)

_PROCESS_EVENTS = (
    "subprocess.Popen",
    "os.system",
    "os.posix_spawn",
    "os.exec",
    "os.fork",
    "os.forkpty",
    "os.spawn",
)
_NETWORK_EVENTS = (
    "socket.connect",
    "socket.bind",
    "socket.sendto",
    "socket.getaddrinfo",
)


def _refuse(kind, detail):
    sys.stderr.write("SANDBOX_VIOLATION: %s: %s\n" % (kind, detail))
    sys.stderr.flush()
    os._exit(VIOLATION_EXIT)


def _audit(event, args):
    if event in _PROCESS_EVENTS:
        _refuse("process", event)
    if not NET_ALLOWED and event in _NETWORK_EVENTS:
        _refuse("network", event)
    if not FS_ALLOWED and event == "open":
        target = args[0]
        if isinstance(target, int):
            return
        try:
            path = os.path.realpath(os.fspath(target))
        except (TypeError, ValueError):
            return
        for prefix in _prefixes:
            if path.startswith(prefix):
                return
        mode = args[1] or "r"
        writing = any(flag in mode for flag in ("w", "a", "+", "x"))
        if not writing and (path.startswith("/usr/") or path.startswith("/lib")):
            # interpreter support files; imports stay usable
            return
        _refuse("filesystem", path)


sys.addaudithook(_audit)

import runpy

runpy.run_path(TARGET, run_name="__main__")
"#;

/// Process-isolation sandbox: each call writes the fragment into a fresh
/// scratch directory and runs it in a separate interpreter process under a
/// network namespace (when available), rlimits, a cleared environment, and
/// an in-interpreter audit-hook guard. The supervisor enforces the wall-clock
/// deadline from outside and reaps the process on every exit path.
pub struct ProcessSandbox {
    python: String,
    netns_available: bool,
}

impl ProcessSandbox {
    pub fn new() -> Self {
        Self::with_python("python3")
    }

    pub fn with_python(python: &str) -> Self {
        Self {
            python: python.to_string(),
            netns_available: probe_network_namespace(),
        }
    }
}

impl Default for ProcessSandbox {
    fn default() -> Self {
        Self::new()
    }
}

impl Sandbox for ProcessSandbox {
    fn execute(
        &self,
        fragment: &SourceFragment,
        limits: &ResourceLimits,
    ) -> Result<ExecutionResult, SandboxError> {
        let scratch = tempfile::Builder::new()
            .prefix("pyclinic-")
            .tempdir()
            .map_err(|e| SandboxError::ScratchSetupFailed(e.to_string()))?;
        let main_path = scratch.path().join("main.py");
        let guard_path = scratch.path().join("_guard.py");
        std::fs::write(&main_path, fragment.text())
            .map_err(|e| SandboxError::ScratchSetupFailed(e.to_string()))?;
        std::fs::write(&guard_path, GUARD_SCRIPT)
            .map_err(|e| SandboxError::ScratchSetupFailed(e.to_string()))?;

        let use_netns = self.netns_available && !limits.network_allowed;
        let program = if use_netns { "unshare" } else { self.python.as_str() };
        let mut cmd = self.build_command(scratch.path(), &guard_path, &main_path, limits, use_netns);

        let started = Instant::now();
        let mut child = cmd.spawn().map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                SandboxError::InterpreterUnavailable(format!("'{}' not found", program))
            } else {
                SandboxError::SupervisionFailed(e.to_string())
            }
        })?;

        let stdout_reader = child
            .stdout
            .take()
            .map(|s| spawn_capped_reader(s, limits.max_output_bytes));
        let stderr_reader = child
            .stderr
            .take()
            .map(|s| spawn_capped_reader(s, limits.max_output_bytes));

        let mut peak_memory = 0u64;
        let mut timed_out = false;
        let exit_status = loop {
            match child.wait_timeout(POLL_INTERVAL) {
                Ok(Some(status)) => break Some(status),
                Ok(None) => {
                    peak_memory = peak_memory.max(sample_peak_rss(child.id()));
                    if started.elapsed() >= limits.max_wall_time {
                        let _ = child.kill();
                        let _ = child.wait();
                        timed_out = true;
                        break None;
                    }
                }
                Err(e) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(SandboxError::SupervisionFailed(e.to_string()));
                }
            }
        };
        let wall_time = started.elapsed();

        let (stdout_bytes, stdout_truncated) = stdout_reader
            .map(|h| h.join().unwrap_or_default())
            .unwrap_or_default();
        let (stderr_bytes, stderr_truncated) = stderr_reader
            .map(|h| h.join().unwrap_or_default())
            .unwrap_or_default();
        let truncated = stdout_truncated || stderr_truncated;

        let stdout = String::from_utf8_lossy(&stdout_bytes).to_string();
        let stderr = String::from_utf8_lossy(&stderr_bytes).to_string();

        let exit_code = exit_status.as_ref().and_then(|s| s.code());
        let signal = exit_status.as_ref().and_then(|s| s.signal());
        let status = classify(timed_out, exit_code, signal, truncated, &stderr);

        let exception_trace = if status == ExecStatus::RuntimeError {
            extract_trace(&stderr)
        } else {
            None
        };

        // scratch (TempDir) is removed when it drops, on every path out
        Ok(ExecutionResult {
            status,
            stdout,
            stderr,
            exception_trace,
            wall_time,
            peak_memory,
        })
    }
}

impl ProcessSandbox {
    fn build_command(
        &self,
        scratch: &Path,
        guard: &Path,
        main: &Path,
        limits: &ResourceLimits,
        use_netns: bool,
    ) -> Command {
        let mut cmd = if use_netns {
            let mut c = Command::new("unshare");
            c.arg("--net").arg("--").arg(&self.python);
            c
        } else {
            Command::new(&self.python)
        };
        cmd.arg("-I")
            .arg("-u")
            .arg(guard)
            .arg(scratch)
            .arg(main)
            .arg(if limits.filesystem_allowed { "1" } else { "0" })
            .arg(if limits.network_allowed { "1" } else { "0" })
            .current_dir(scratch)
            .env_clear()
            .env("PATH", "/usr/local/bin:/usr/bin:/bin")
            .env("HOME", scratch)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let max_memory = limits.max_memory;
        let cpu_secs = limits.max_wall_time.as_secs().saturating_add(1);
        unsafe {
            cmd.pre_exec(move || {
                apply_rlimit(libc::RLIMIT_AS, max_memory, true)?;
                apply_rlimit(libc::RLIMIT_CPU, cpu_secs, true)?;
                apply_rlimit(libc::RLIMIT_NPROC, 64, false)?;
                apply_rlimit(libc::RLIMIT_CORE, 0, false)?;
                Ok(())
            });
        }
        cmd
    }
}

/// Applied between fork and exec; limits survive the exec into the
/// interpreter. Non-strict resources tolerate hosts whose hard limits are
/// already below the requested value.
fn apply_rlimit(
    resource: libc::__rlimit_resource_t,
    value: u64,
    strict: bool,
) -> std::io::Result<()> {
    let limit = libc::rlimit {
        rlim_cur: value,
        rlim_max: value,
    };
    let rc = unsafe { libc::setrlimit(resource, &limit) };
    if rc != 0 && strict {
        return Err(std::io::Error::last_os_error());
    }
    Ok(())
}

/// One probe at construction: network namespaces need either root or
/// unprivileged user namespaces. Where they are unavailable the audit-hook
/// guard remains the network boundary.
fn probe_network_namespace() -> bool {
    Command::new("unshare")
        .args(["--net", "--", "true"])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Drains a child pipe on its own thread, keeping at most `cap` bytes.
/// Draining continues past the cap so the child never blocks on a full pipe.
fn spawn_capped_reader<R: Read + Send + 'static>(
    mut stream: R,
    cap: usize,
) -> JoinHandle<(Vec<u8>, bool)> {
    std::thread::spawn(move || {
        let mut collected = Vec::new();
        let mut chunk = [0u8; 8192];
        let mut truncated = false;
        loop {
            match stream.read(&mut chunk) {
                Ok(0) => break,
                Ok(n) => {
                    if collected.len() < cap {
                        let take = n.min(cap - collected.len());
                        collected.extend_from_slice(&chunk[..take]);
                        if take < n {
                            truncated = true;
                        }
                    } else {
                        truncated = true;
                    }
                }
                Err(_) => break,
            }
        }
        (collected, truncated)
    })
}

fn sample_peak_rss(pid: u32) -> u64 {
    let mut peak = read_vm_hwm(pid);
    // one level down covers the interpreter when a namespace wrapper is the
    // direct child
    if let Ok(children) =
        std::fs::read_to_string(format!("/proc/{}/task/{}/children", pid, pid))
    {
        for child in children.split_whitespace() {
            if let Ok(child_pid) = child.parse::<u32>() {
                peak = peak.max(read_vm_hwm(child_pid));
            }
        }
    }
    peak
}

fn read_vm_hwm(pid: u32) -> u64 {
    let Ok(status) = std::fs::read_to_string(format!("/proc/{}/status", pid)) else {
        return 0;
    };
    for line in status.lines() {
        if let Some(rest) = line.strip_prefix("VmHWM:") {
            let kb: u64 = rest
                .trim()
                .trim_end_matches("kB")
                .trim()
                .parse()
                .unwrap_or(0);
            return kb * 1024;
        }
    }
    0
}

/// Maps raw process outcome to an execution status. Timeout is decided by the
/// supervisor, violations by the guard's reserved exit code or marker, and
/// limit kills by truncation, signal, or the interpreter's MemoryError.
fn classify(
    timed_out: bool,
    exit_code: Option<i32>,
    signal: Option<i32>,
    truncated: bool,
    stderr: &str,
) -> ExecStatus {
    if timed_out {
        return ExecStatus::Timeout;
    }
    if exit_code == Some(VIOLATION_EXIT) || stderr.contains(VIOLATION_MARKER) {
        return ExecStatus::SandboxViolation;
    }
    if truncated {
        return ExecStatus::ResourceLimitExceeded;
    }
    match signal {
        Some(sig) if sig == libc::SIGKILL || sig == libc::SIGXCPU => {
            return ExecStatus::ResourceLimitExceeded;
        }
        Some(_) => return ExecStatus::RuntimeError,
        None => {}
    }
    match exit_code {
        Some(0) => ExecStatus::Success,
        _ => {
            if stderr.contains("MemoryError") {
                ExecStatus::ResourceLimitExceeded
            } else {
                ExecStatus::RuntimeError
            }
        }
    }
}

/// The traceback section of stderr, or the trimmed tail when the interpreter
/// failed without printing one.
fn extract_trace(stderr: &str) -> Option<String> {
    if stderr.trim().is_empty() {
        return None;
    }
    match stderr.rfind("Traceback (most recent call last):") {
        Some(idx) => Some(stderr[idx..].trim_end().to_string()),
        None => Some(stderr.trim().to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_timeout_wins() {
        let status = classify(true, Some(0), None, false, "");
        assert_eq!(status, ExecStatus::Timeout);
    }

    #[test]
    fn test_classify_violation_by_exit_code() {
        let status = classify(false, Some(VIOLATION_EXIT), None, false, "");
        assert_eq!(status, ExecStatus::SandboxViolation);
    }

    #[test]
    fn test_classify_violation_by_marker() {
        let stderr = "SANDBOX_VIOLATION: filesystem: /etc/passwd\n";
        let status = classify(false, Some(1), None, false, stderr);
        assert_eq!(status, ExecStatus::SandboxViolation);
    }

    #[test]
    fn test_classify_truncation_is_limit_exceeded() {
        let status = classify(false, Some(0), None, true, "");
        assert_eq!(status, ExecStatus::ResourceLimitExceeded);
    }

    #[test]
    fn test_classify_sigkill_is_limit_exceeded() {
        let status = classify(false, None, Some(libc::SIGKILL), false, "");
        assert_eq!(status, ExecStatus::ResourceLimitExceeded);
    }

    #[test]
    fn test_classify_memory_error_is_limit_exceeded() {
        let stderr = "Traceback (most recent call last):\n  ...\nMemoryError\n";
        let status = classify(false, Some(1), None, false, stderr);
        assert_eq!(status, ExecStatus::ResourceLimitExceeded);
    }

    #[test]
    fn test_classify_nonzero_exit_is_runtime_error() {
        let stderr = "Traceback (most recent call last):\n  File \"main.py\", line 1\nZeroDivisionError: division by zero\n";
        let status = classify(false, Some(1), None, false, stderr);
        assert_eq!(status, ExecStatus::RuntimeError);
    }

    #[test]
    fn test_classify_clean_exit() {
        assert_eq!(classify(false, Some(0), None, false, ""), ExecStatus::Success);
    }

    #[test]
    fn test_extract_trace_finds_traceback() {
        let stderr = "warning: something\nTraceback (most recent call last):\n  File \"main.py\", line 1, in <module>\nZeroDivisionError: division by zero\n";
        let trace = extract_trace(stderr).unwrap();
        assert!(trace.starts_with("Traceback"));
        assert!(trace.contains("ZeroDivisionError"));
    }

    #[test]
    fn test_extract_trace_empty_stderr() {
        assert!(extract_trace("").is_none());
        assert!(extract_trace("  \n").is_none());
    }

    #[test]
    fn test_read_vm_hwm_missing_pid() {
        assert_eq!(read_vm_hwm(u32::MAX), 0);
    }

    #[test]
    fn test_interpreter_unavailable_is_infrastructure_error() {
        let sandbox = ProcessSandbox::with_python("pyclinic-no-such-interpreter");
        let fragment = SourceFragment::new("print('hi')");
        let limits = ResourceLimits {
            // keep the namespace wrapper out of the way so the missing
            // interpreter itself is what the spawn hits
            network_allowed: true,
            ..ResourceLimits::default()
        };
        let result = sandbox.execute(&fragment, &limits);
        assert!(matches!(
            result,
            Err(SandboxError::InterpreterUnavailable(_))
        ));
    }

    // The tests below need a real python3 on PATH.

    #[test]
    #[ignore] // Requires python3
    fn test_execute_hello_world() {
        let sandbox = ProcessSandbox::new();
        let fragment = SourceFragment::new("print('hello sandbox')");
        let result = sandbox.execute(&fragment, &ResourceLimits::default()).unwrap();
        assert_eq!(result.status, ExecStatus::Success);
        assert_eq!(result.stdout.trim(), "hello sandbox");
        assert!(result.stderr.is_empty());
        assert!(result.exception_trace.is_none());
    }

    #[test]
    #[ignore] // Requires python3
    fn test_execute_runtime_error_carries_trace() {
        let sandbox = ProcessSandbox::new();
        let fragment = SourceFragment::new("print(1/0)");
        let result = sandbox.execute(&fragment, &ResourceLimits::default()).unwrap();
        assert_eq!(result.status, ExecStatus::RuntimeError);
        let trace = result.exception_trace.unwrap();
        assert!(trace.contains("ZeroDivisionError"));
        assert!(trace.contains("main.py"));
    }

    #[test]
    #[ignore] // Requires python3
    fn test_execute_timeout_terminates_process() {
        let sandbox = ProcessSandbox::new();
        let fragment = SourceFragment::new("while True:\n    pass\n");
        let limits = ResourceLimits {
            max_wall_time: Duration::from_secs(1),
            ..ResourceLimits::default()
        };
        let started = Instant::now();
        let result = sandbox.execute(&fragment, &limits).unwrap();
        assert_eq!(result.status, ExecStatus::Timeout);
        assert!(result.stdout.is_empty());
        // bounded overhead over the deadline
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    #[ignore] // Requires python3
    fn test_execute_forbidden_file_access_is_violation() {
        let sandbox = ProcessSandbox::new();
        let fragment = SourceFragment::new("open('/etc/passwd').read()");
        let result = sandbox.execute(&fragment, &ResourceLimits::default()).unwrap();
        assert_eq!(result.status, ExecStatus::SandboxViolation);
        assert!(result.stderr.contains("SANDBOX_VIOLATION"));
    }

    #[test]
    #[ignore] // Requires python3
    fn test_execute_subprocess_is_violation() {
        let sandbox = ProcessSandbox::new();
        let fragment =
            SourceFragment::new("import subprocess\nsubprocess.run(['ls'])\n");
        let result = sandbox.execute(&fragment, &ResourceLimits::default()).unwrap();
        assert_eq!(result.status, ExecStatus::SandboxViolation);
    }

    #[test]
    #[ignore] // Requires python3
    fn test_execute_scratch_writes_allowed() {
        let sandbox = ProcessSandbox::new();
        let fragment = SourceFragment::new(
            "with open('note.txt', 'w') as fh:\n    fh.write('ok')\nprint(open('note.txt').read())\n",
        );
        let result = sandbox.execute(&fragment, &ResourceLimits::default()).unwrap();
        assert_eq!(result.status, ExecStatus::Success);
        assert_eq!(result.stdout.trim(), "ok");
    }

    #[test]
    #[ignore] // Requires python3
    fn test_execute_output_cap_truncates() {
        let sandbox = ProcessSandbox::new();
        let fragment = SourceFragment::new("print('x' * 100000)");
        let limits = ResourceLimits {
            max_output_bytes: 1024,
            ..ResourceLimits::default()
        };
        let result = sandbox.execute(&fragment, &limits).unwrap();
        assert_eq!(result.status, ExecStatus::ResourceLimitExceeded);
        assert!(result.stdout.len() <= 1024);
    }

    #[test]
    #[ignore] // Requires python3
    fn test_execute_idempotent_for_pure_code() {
        let sandbox = ProcessSandbox::new();
        let fragment = SourceFragment::new("print(sum(range(10)))");
        let limits = ResourceLimits::default();
        let first = sandbox.execute(&fragment, &limits).unwrap();
        let second = sandbox.execute(&fragment, &limits).unwrap();
        assert_eq!(first.status, second.status);
        assert_eq!(first.stdout, second.stdout);
        assert_eq!(first.stderr, second.stderr);
    }
}
