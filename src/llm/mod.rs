pub mod ollama;
pub mod openai_compat;
pub mod prompt;

use crate::fragment::{Finding, SourceFragment};
use std::fmt;

#[derive(Debug, Clone, PartialEq)]
pub enum Role {
    System,
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: &str) -> Self {
        Self {
            role: Role::System,
            content: content.to_string(),
        }
    }

    pub fn user(content: &str) -> Self {
        Self {
            role: Role::User,
            content: content.to_string(),
        }
    }

    pub fn assistant(content: &str) -> Self {
        Self {
            role: Role::Assistant,
            content: content.to_string(),
        }
    }
}

/// A proposed replacement fragment. Untrusted data: it always re-enters the
/// same analyze-and-execute path as user input, never anything else.
#[derive(Debug, Clone)]
pub struct CorrectionCandidate {
    pub source: SourceFragment,
    pub rationale: String,
    pub originating_findings: Vec<usize>,
}

#[derive(Debug)]
pub enum LlmError {
    Connection(String),
    Request(String),
    Parse(String),
    RateLimited,
    DeadlineExceeded,
    ModelNotFound(String),
}

impl fmt::Display for LlmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LlmError::Connection(msg) => write!(f, "connection error: {}", msg),
            LlmError::Request(msg) => write!(f, "request error: {}", msg),
            LlmError::Parse(msg) => write!(f, "parse error: {}", msg),
            LlmError::RateLimited => write!(f, "rate limited by the model endpoint"),
            LlmError::DeadlineExceeded => write!(f, "correction request deadline exceeded"),
            LlmError::ModelNotFound(model) => write!(f, "model not found: {}", model),
        }
    }
}

impl std::error::Error for LlmError {}

/// The language-model collaborator, seen from the correction loop.
///
/// One request, one candidate, one deadline. Implementations never retry
/// internally; backoff and retries belong to the loop's iteration budget.
pub trait CorrectionProvider {
    fn request_correction(
        &self,
        source: &SourceFragment,
        findings: &[Finding],
        context: &[Message],
    ) -> Result<CorrectionCandidate, LlmError>;
}
