//! Matches text-generation replies against the normalized document.
//!
//! The reply is expected to be `{"factSheets": [{"id", "reason"}, ...]}` but
//! often arrives wrapped in prose or a fenced code block.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::{LensError, LensResult};
use crate::normalize::NormalizedDocument;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub id: String,
    #[serde(default)]
    pub reason: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FindingsReply {
    #[serde(default)]
    fact_sheets: Vec<Finding>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchedFinding {
    pub id: String,
    pub reason: String,
    pub display_name: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FindingsReport {
    pub matched: Vec<MatchedFinding>,
    /// Ids the reply mentioned that are not entities of the document.
    pub unknown_ids: Vec<String>,
}

/// Locates the first JSON object in free text: the whole input, a fenced
/// block, or the first balanced `{...}` span.
pub fn extract_json_object(raw: &str) -> Option<&str> {
    let trimmed = raw.trim();
    if trimmed.starts_with('{') && trimmed.ends_with('}') {
        return Some(trimmed);
    }

    const FENCE: &str = "```";
    if let Some(start) = raw.find(FENCE) {
        let after = &raw[start + FENCE.len()..];
        let body = after.trim_start_matches(|c: char| c.is_alphanumeric() || c == '_');
        if let Some(end) = body.find(FENCE) {
            let block = body[..end].trim();
            if block.starts_with('{') {
                return Some(block);
            }
        }
    }

    balanced_object(raw)
}

fn balanced_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in raw[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&raw[start..=start + offset]);
                }
            }
            _ => {}
        }
    }
    None
}

pub fn parse_findings(reply: &str) -> LensResult<Vec<Finding>> {
    let object = extract_json_object(reply)
        .ok_or_else(|| LensError::InvalidReport("reply contains no JSON object".to_string()))?;
    let parsed: FindingsReply = serde_json::from_str(object)?;
    debug!(target: "findings", count = parsed.fact_sheets.len(), "findings parsed");
    Ok(parsed.fact_sheets)
}

/// Keeps reply order; duplicate ids are reported once.
pub fn match_findings(document: &NormalizedDocument, findings: Vec<Finding>) -> FindingsReport {
    let mut report = FindingsReport::default();
    for finding in findings {
        let already_seen = report.matched.iter().any(|matched| matched.id == finding.id)
            || report.unknown_ids.contains(&finding.id);
        if already_seen {
            continue;
        }
        if document.entity(&finding.id).is_some() {
            report.matched.push(MatchedFinding {
                display_name: document.display_name(&finding.id).map(str::to_string),
                id: finding.id,
                reason: finding.reason,
            });
        } else {
            report.unknown_ids.push(finding.id);
        }
    }
    if !report.unknown_ids.is_empty() {
        warn!(
            target: "findings",
            unknown = report.unknown_ids.len(),
            "reply references entities outside the document"
        );
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn extracts_from_fenced_block() {
        let reply = "Here you go:\n```json\n{\"factSheets\": []}\n```\nThanks";
        assert_eq!(extract_json_object(reply), Some("{\"factSheets\": []}"));
    }

    #[test]
    fn balanced_scan_ignores_braces_in_strings() {
        let reply = r#"Result: {"factSheets": [{"id": "1", "reason": "uses } oddly"}]} done"#;
        let findings = parse_findings(reply).expect("findings");
        assert_eq!(findings[0].reason, "uses } oddly");
        assert!(extract_json_object("no object here").is_none());
    }

    #[test]
    fn matches_known_ids_and_reports_unknown() {
        let document = NormalizedDocument(vec![
            json!({"Entity": {"id": "1", "name": "CRM"}}),
            json!({"Entity": {"id": "2", "displayName": "ERP"}}),
        ]);
        let findings = vec![
            Finding { id: "2".into(), reason: "end of life".into() },
            Finding { id: "9".into(), reason: "hallucinated".into() },
            Finding { id: "2".into(), reason: "again".into() },
        ];
        let report = match_findings(&document, findings);
        assert_eq!(
            report.matched,
            vec![MatchedFinding {
                id: "2".into(),
                reason: "end of life".into(),
                display_name: Some("ERP".into())
            }]
        );
        assert_eq!(report.unknown_ids, vec!["9".to_string()]);
    }
}
