use crate::aggregate::aggregate;
use crate::analyzer;
use crate::fragment::{Finding, FindingKind, SourceFragment};
use crate::llm::{CorrectionProvider, LlmError, Message};
use crate::sandbox::{ExecStatus, ExecutionResult, ResourceLimits, Sandbox, SandboxError};
use chrono::{DateTime, Utc};
use std::fmt;
use std::time::Duration;

/// Options for one analysis request, resolved by the caller before the
/// session starts. Limits travel with the request; nothing is ambient.
#[derive(Debug, Clone)]
pub struct AnalysisOptions {
    pub max_iterations: usize,
    pub limits: ResourceLimits,
    pub auto_correct: bool,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            max_iterations: 3,
            limits: ResourceLimits::default(),
            auto_correct: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// A fragment with zero findings was reached (possibly the original).
    Accepted,
    /// The iteration budget ran out; the best fragment seen is reported.
    Exhausted,
    /// Auto-correction was off; findings are reported as-is.
    ReviewOnly,
}

impl fmt::Display for SessionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionOutcome::Accepted => write!(f, "accepted"),
            SessionOutcome::Exhausted => write!(f, "exhausted"),
            SessionOutcome::ReviewOnly => write!(f, "review only"),
        }
    }
}

/// One evaluated fragment: the original at index 0, then one record per
/// candidate, in discovery order. `promoted` marks the fragments that became
/// "current" at some point.
#[derive(Debug, Clone)]
pub struct IterationRecord {
    pub fragment: SourceFragment,
    pub findings: Vec<Finding>,
    pub execution: Option<ExecutionResult>,
    pub rationale: Option<String>,
    pub promoted: bool,
}

/// The result object every request completes with. Only infrastructure
/// failure aborts a request instead of producing one of these.
#[derive(Debug)]
pub struct SessionReport {
    pub session_id: String,
    pub started_at: DateTime<Utc>,
    pub outcome: SessionOutcome,
    pub iterations: Vec<IterationRecord>,
    pub best_index: usize,
    pub security_events: Vec<String>,
    pub attempts_used: usize,
}

impl SessionReport {
    pub fn best(&self) -> &IterationRecord {
        &self.iterations[self.best_index]
    }
}

#[derive(Debug)]
pub enum SessionError {
    Infrastructure(SandboxError),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::Infrastructure(e) => write!(f, "infrastructure error: {}", e),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<SandboxError> for SessionError {
    fn from(e: SandboxError) -> Self {
        SessionError::Infrastructure(e)
    }
}

/// Run one analysis request: analyze the fragment, and while auto-correction
/// is on, loop through candidate fixes from the collaborator until a fragment
/// with zero findings is reached or the iteration budget runs out.
///
/// Candidates are untrusted: each one re-enters the same analyze-and-execute
/// path as the original input, and only a strict reduction in finding count
/// promotes it. The report always includes the best fragment seen, never one
/// worse than the original.
pub fn submit_analysis(
    source_text: &str,
    options: &AnalysisOptions,
    provider: &dyn CorrectionProvider,
    sandbox: &dyn Sandbox,
) -> Result<SessionReport, SessionError> {
    let session_id = uuid::Uuid::new_v4().to_string();
    let started_at = Utc::now();
    let mut security_events = Vec::new();
    let mut iterations: Vec<IterationRecord> = Vec::new();

    // Analyzing: the original fragment
    let fragment = SourceFragment::new(source_text);
    let (findings, execution) =
        evaluate_fragment(&fragment, sandbox, &options.limits, &mut security_events)?;
    iterations.push(IterationRecord {
        fragment,
        findings,
        execution,
        rationale: None,
        promoted: true,
    });

    let mut current = 0usize;
    let mut attempts_used = 0usize;
    let mut context: Vec<Message> = Vec::new();

    let outcome = loop {
        if iterations[current].findings.is_empty() {
            break SessionOutcome::Accepted;
        }
        if !options.auto_correct {
            break SessionOutcome::ReviewOnly;
        }
        if attempts_used >= options.max_iterations {
            break SessionOutcome::Exhausted;
        }
        attempts_used += 1;

        // AwaitingCandidate: one bounded remote call; failures consume the
        // attempt and the loop decides whether to go again
        let candidate = match provider.request_correction(
            &iterations[current].fragment,
            &iterations[current].findings,
            &context,
        ) {
            Ok(candidate) => candidate,
            Err(LlmError::RateLimited) => {
                std::thread::sleep(backoff_delay(attempts_used));
                continue;
            }
            Err(_) => continue,
        };

        // ValidatingCandidate: same path as user input
        let (findings, execution) = evaluate_fragment(
            &candidate.source,
            sandbox,
            &options.limits,
            &mut security_events,
        )?;
        let improved = findings.len() < iterations[current].findings.len();
        context.push(Message::assistant(candidate.source.text()));
        if !improved {
            context.push(Message::user(&format!(
                "That candidate still has {} finding(s); take a different approach.",
                findings.len()
            )));
        }
        iterations.push(IterationRecord {
            fragment: candidate.source,
            findings,
            execution,
            rationale: Some(candidate.rationale),
            promoted: improved,
        });
        if improved {
            current = iterations.len() - 1;
        }
    };

    let best_index = best_record(&iterations);
    Ok(SessionReport {
        session_id,
        started_at,
        outcome,
        iterations,
        best_index,
        security_events,
        attempts_used,
    })
}

/// Static analysis first; syntactically invalid fragments never reach the
/// executor. Sandbox violations are collected as security events for the
/// caller to log distinctly.
fn evaluate_fragment(
    fragment: &SourceFragment,
    sandbox: &dyn Sandbox,
    limits: &ResourceLimits,
    security_events: &mut Vec<String>,
) -> Result<(Vec<Finding>, Option<ExecutionResult>), SessionError> {
    let static_findings = analyzer::analyze(fragment);
    if static_findings
        .iter()
        .any(|f| f.kind == FindingKind::Syntax)
    {
        return Ok((static_findings, None));
    }
    let execution = sandbox.execute(fragment, limits)?;
    if execution.status == ExecStatus::SandboxViolation {
        security_events.push(format!(
            "sandbox violation while executing fragment v{}: {}",
            fragment.version(),
            execution.stderr.trim()
        ));
    }
    let findings = aggregate(static_findings, Some(&execution));
    Ok((findings, Some(execution)))
}

/// Fewest findings wins; ties prefer the cleanest execution status, then the
/// earliest fragment.
fn best_record(iterations: &[IterationRecord]) -> usize {
    iterations
        .iter()
        .enumerate()
        .min_by_key(|(_, record)| {
            (
                record.findings.len(),
                status_rank(record.execution.as_ref()),
            )
        })
        .map(|(idx, _)| idx)
        .unwrap_or(0)
}

fn status_rank(execution: Option<&ExecutionResult>) -> u8 {
    match execution.map(|e| e.status) {
        Some(ExecStatus::Success) => 0,
        Some(ExecStatus::RuntimeError) => 1,
        Some(ExecStatus::Timeout)
        | Some(ExecStatus::ResourceLimitExceeded)
        | Some(ExecStatus::SandboxViolation) => 2,
        None => 3,
    }
}

fn backoff_delay(attempt: usize) -> Duration {
    Duration::from_millis((200 * attempt as u64).min(2_000))
}
