use super::{CorrectionCandidate, LlmError, Message};
use crate::fragment::{Finding, SourceFragment};
use serde::Deserialize;

const SYSTEM_PROMPT: &str = "You are a Python repair assistant. You receive a \
Python snippet and a list of findings describing what is wrong with it. \
Return a corrected version of the whole snippet.\n\
Respond with a single JSON object: {\"code\": \"<the full corrected snippet>\", \
\"rationale\": \"<one or two sentences on what you changed and why>\"}.\n\
Return the complete snippet, not a diff. Do not add commentary outside the \
JSON object.";

/// Build the message sequence for one correction request. `context` carries
/// the session's earlier exchanges so repeated attempts can steer away from
/// rejected candidates.
pub fn correction_messages(
    source: &SourceFragment,
    findings: &[Finding],
    context: &[Message],
) -> Vec<Message> {
    let mut messages = Vec::with_capacity(context.len() + 2);
    messages.push(Message::system(SYSTEM_PROMPT));
    messages.extend(context.iter().cloned());

    let mut request = String::from("Snippet under review:\n```python\n");
    request.push_str(source.text());
    if !source.text().ends_with('\n') {
        request.push('\n');
    }
    request.push_str("```\n\nFindings:\n");
    for (idx, finding) in findings.iter().enumerate() {
        request.push_str(&format!("{}. {}\n", idx + 1, finding));
    }
    messages.push(Message::user(&request));
    messages
}

#[derive(Deserialize)]
struct CandidatePayload {
    code: String,
    #[serde(default)]
    rationale: Option<String>,
}

/// Parse a model reply into a candidate. Accepts the JSON contract directly,
/// the same JSON inside a code fence, or a bare fenced snippet with the
/// surrounding prose as rationale. Anything else is a parse error; the loop
/// treats that as a failed attempt, not as code.
pub fn parse_candidate(
    source: &SourceFragment,
    raw: &str,
    findings: &[Finding],
) -> Result<CorrectionCandidate, LlmError> {
    let trimmed = raw.trim();
    if let Ok(payload) = serde_json::from_str::<CandidatePayload>(trimmed) {
        return candidate_from(source, payload, findings);
    }
    if let Some((block, remainder)) = extract_fenced(trimmed) {
        if let Ok(payload) = serde_json::from_str::<CandidatePayload>(block.trim()) {
            return candidate_from(source, payload, findings);
        }
        let payload = CandidatePayload {
            code: block,
            rationale: if remainder.is_empty() {
                None
            } else {
                Some(remainder)
            },
        };
        return candidate_from(source, payload, findings);
    }
    Err(LlmError::Parse(
        "no correction payload found in model output".to_string(),
    ))
}

fn candidate_from(
    source: &SourceFragment,
    payload: CandidatePayload,
    findings: &[Finding],
) -> Result<CorrectionCandidate, LlmError> {
    if payload.code.trim().is_empty() {
        return Err(LlmError::Parse("candidate code is empty".to_string()));
    }
    Ok(CorrectionCandidate {
        source: source.successor(&payload.code),
        rationale: payload
            .rationale
            .unwrap_or_else(|| "no rationale given".to_string()),
        originating_findings: (0..findings.len()).collect(),
    })
}

/// Splits the first fenced block out of a reply: `(block body, prose outside)`.
fn extract_fenced(raw: &str) -> Option<(String, String)> {
    let start = raw.find("```")?;
    let after_fence = &raw[start + 3..];
    let first_line_end = after_fence.find('\n')?;
    let body = &after_fence[first_line_end + 1..];
    let end = body.find("```")?;
    let block = body[..end].to_string();

    let mut remainder = raw[..start].trim().to_string();
    let tail = body[end + 3..].trim();
    if !tail.is_empty() {
        if !remainder.is_empty() {
            remainder.push(' ');
        }
        remainder.push_str(tail);
    }
    Some((block, remainder))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragment::{FindingKind, Severity};

    fn fragment() -> SourceFragment {
        SourceFragment::new("print(1/0)")
    }

    fn findings() -> Vec<Finding> {
        vec![Finding::new(
            FindingKind::Runtime,
            Some((1, 1)),
            "ZeroDivisionError: division by zero",
            Severity::Error,
        )]
    }

    #[test]
    fn test_messages_include_code_and_findings() {
        let messages = correction_messages(&fragment(), &findings(), &[]);
        assert_eq!(messages.len(), 2);
        assert!(messages[1].content.contains("print(1/0)"));
        assert!(messages[1].content.contains("ZeroDivisionError"));
    }

    #[test]
    fn test_messages_carry_context_between_system_and_request() {
        let context = vec![Message::user("previous request"), Message::assistant("previous reply")];
        let messages = correction_messages(&fragment(), &findings(), &context);
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[1].content, "previous request");
        assert_eq!(messages[2].content, "previous reply");
    }

    #[test]
    fn test_parse_json_payload() {
        let raw = r#"{"code": "print(1)", "rationale": "avoid dividing by zero"}"#;
        let candidate = parse_candidate(&fragment(), raw, &findings()).unwrap();
        assert_eq!(candidate.source.text(), "print(1)");
        assert_eq!(candidate.rationale, "avoid dividing by zero");
        assert_eq!(candidate.originating_findings, vec![0]);
        assert_eq!(candidate.source.version(), 1);
    }

    #[test]
    fn test_parse_json_inside_fence() {
        let raw = "```json\n{\"code\": \"print(1)\"}\n```";
        let candidate = parse_candidate(&fragment(), raw, &findings()).unwrap();
        assert_eq!(candidate.source.text(), "print(1)");
        assert_eq!(candidate.rationale, "no rationale given");
    }

    #[test]
    fn test_parse_bare_fenced_snippet() {
        let raw = "Here is the fix:\n```python\nprint(1)\n```\nThe divisor was zero.";
        let candidate = parse_candidate(&fragment(), raw, &findings()).unwrap();
        assert_eq!(candidate.source.text(), "print(1)\n");
        assert!(candidate.rationale.contains("Here is the fix:"));
        assert!(candidate.rationale.contains("The divisor was zero."));
    }

    #[test]
    fn test_parse_rejects_prose_only_reply() {
        let result = parse_candidate(&fragment(), "I cannot fix this.", &findings());
        assert!(matches!(result, Err(LlmError::Parse(_))));
    }

    #[test]
    fn test_parse_rejects_empty_code() {
        let raw = r#"{"code": "   "}"#;
        let result = parse_candidate(&fragment(), raw, &findings());
        assert!(matches!(result, Err(LlmError::Parse(_))));
    }
}
