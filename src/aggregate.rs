use crate::fragment::{Finding, FindingKind, Severity};
use crate::sandbox::{ExecStatus, ExecutionResult};

/// Merge static findings with the outcome of one sandboxed execution.
///
/// Static findings arrive already ordered and come first; the execution
/// status contributes at most one synthetic `Runtime` finding. A static
/// finding on the same line is the more specific report and suppresses the
/// synthetic one.
pub fn aggregate(
    static_findings: Vec<Finding>,
    execution: Option<&ExecutionResult>,
) -> Vec<Finding> {
    let mut findings = static_findings;
    let Some(result) = execution else {
        return findings;
    };
    let Some(runtime) = runtime_finding(result) else {
        return findings;
    };
    let duplicate = match runtime.line() {
        Some(line) => findings.iter().any(|f| f.line() == Some(line)),
        None => false,
    };
    if !duplicate {
        findings.push(runtime);
    }
    findings
}

fn runtime_finding(result: &ExecutionResult) -> Option<Finding> {
    match result.status {
        ExecStatus::Success => None,
        ExecStatus::RuntimeError => {
            let trace = result.exception_trace.as_deref().unwrap_or("");
            let message = exception_summary(trace);
            let location = trace_location(trace);
            Some(Finding::new(
                FindingKind::Runtime,
                location,
                &message,
                Severity::Error,
            ))
        }
        ExecStatus::Timeout => Some(Finding::new(
            FindingKind::Runtime,
            None,
            "execution exceeded the wall-clock limit; likely an infinite loop or unbounded computation",
            Severity::Error,
        )),
        ExecStatus::ResourceLimitExceeded => {
            let message = if result.stderr.contains("MemoryError") {
                "execution exceeded the memory limit"
            } else {
                "execution exceeded a resource limit (memory, CPU time, or output volume)"
            };
            Some(Finding::new(
                FindingKind::Runtime,
                None,
                message,
                Severity::Error,
            ))
        }
        ExecStatus::SandboxViolation => {
            let detail = violation_detail(&result.stderr)
                .unwrap_or_else(|| "forbidden operation intercepted".to_string());
            Some(Finding::new(
                FindingKind::Runtime,
                None,
                &format!("sandbox violation: {}", detail),
                Severity::Error,
            ))
        }
    }
}

/// Last `File "...main.py", line N` reference in a CPython traceback: the
/// innermost frame inside the fragment itself.
fn trace_location(trace: &str) -> Option<(u32, u32)> {
    let mut location = None;
    for line in trace.lines() {
        let trimmed = line.trim_start();
        let Some(rest) = trimmed.strip_prefix("File \"") else {
            continue;
        };
        let Some(quote_end) = rest.find('"') else {
            continue;
        };
        let path = &rest[..quote_end];
        if !path.ends_with("main.py") {
            continue;
        }
        let Some(line_part) = rest[quote_end..].strip_prefix("\", line ") else {
            continue;
        };
        let digits: String = line_part.chars().take_while(|c| c.is_ascii_digit()).collect();
        if let Ok(line_no) = digits.parse::<u32>() {
            location = Some((line_no, 1));
        }
    }
    location
}

/// The exception line that closes a CPython traceback, e.g.
/// `ZeroDivisionError: division by zero`.
fn exception_summary(trace: &str) -> String {
    trace
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("execution failed with a nonzero exit status")
        .to_string()
}

fn violation_detail(stderr: &str) -> Option<String> {
    stderr
        .lines()
        .find_map(|line| line.strip_prefix("SANDBOX_VIOLATION:"))
        .map(|rest| rest.trim().to_string())
}
