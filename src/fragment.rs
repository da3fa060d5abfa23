use std::fmt;

/// One immutable version of the source code under analysis.
///
/// Correction attempts never mutate a fragment in place; every candidate fix
/// becomes a new fragment with a bumped version, and prior versions stay in
/// the session history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFragment {
    text: String,
    entry_point: Option<String>,
    version: u32,
}

impl SourceFragment {
    pub fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
            entry_point: None,
            version: 0,
        }
    }

    pub fn with_entry_point(text: &str, entry_point: &str) -> Self {
        Self {
            text: text.to_string(),
            entry_point: Some(entry_point.to_string()),
            version: 0,
        }
    }

    /// A successor fragment carrying replacement text (a validated candidate).
    pub fn successor(&self, text: &str) -> Self {
        Self {
            text: text.to_string(),
            entry_point: self.entry_point.clone(),
            version: self.version + 1,
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn entry_point(&self) -> Option<&str> {
        self.entry_point.as_deref()
    }

    pub fn version(&self) -> u32 {
        self.version
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FindingKind {
    Syntax,
    Runtime,
    Lint,
    Logical,
}

impl fmt::Display for FindingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FindingKind::Syntax => write!(f, "syntax"),
            FindingKind::Runtime => write!(f, "runtime"),
            FindingKind::Lint => write!(f, "lint"),
            FindingKind::Logical => write!(f, "logical"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Error => write!(f, "error"),
            Severity::Warning => write!(f, "warning"),
            Severity::Info => write!(f, "info"),
        }
    }
}

/// A structured report of one problem in a fragment.
///
/// `location` is a 1-based (line, column) pair when the problem maps to a
/// source position; synthetic findings derived from execution status may not
/// have one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    pub kind: FindingKind,
    pub location: Option<(u32, u32)>,
    pub message: String,
    pub severity: Severity,
}

impl Finding {
    pub fn new(kind: FindingKind, location: Option<(u32, u32)>, message: &str, severity: Severity) -> Self {
        Self {
            kind,
            location,
            message: message.to_string(),
            severity,
        }
    }

    pub fn line(&self) -> Option<u32> {
        self.location.map(|(line, _)| line)
    }
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.location {
            Some((line, col)) => write!(
                f,
                "{}:{}: {} [{}]: {}",
                line, col, self.severity, self.kind, self.message
            ),
            None => write!(f, "{} [{}]: {}", self.severity, self.kind, self.message),
        }
    }
}

/// Sort findings by source position ascending, keeping discovery order on ties.
/// Findings without a location sort after located ones.
pub fn sort_by_position(findings: &mut Vec<Finding>) {
    let mut indexed: Vec<(usize, Finding)> = findings.drain(..).enumerate().collect();
    indexed.sort_by_key(|(idx, f)| match f.location {
        Some((line, col)) => (0u8, line, col, *idx),
        None => (1u8, 0, 0, *idx),
    });
    findings.extend(indexed.into_iter().map(|(_, f)| f));
}
