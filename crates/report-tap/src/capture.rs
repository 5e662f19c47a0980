//! Readers for recorded browser traffic.
//!
//! Two formats are understood: HAR exports (`log.entries[].request`) and
//! JSON Lines with one [`ObservedExchange`] per line.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use factsheet_core_types::ExchangeId;
use serde::Deserialize;
use tracing::warn;

use crate::exchange::ObservedExchange;
use crate::{TapError, TapResult};

#[derive(Deserialize)]
struct HarFile {
    log: HarLog,
}

#[derive(Deserialize)]
struct HarLog {
    #[serde(default)]
    entries: Vec<HarEntry>,
}

#[derive(Deserialize)]
struct HarEntry {
    request: HarRequest,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct HarRequest {
    method: String,
    url: String,
    #[serde(default)]
    headers: Vec<HarHeader>,
    #[serde(default)]
    post_data: Option<HarPostData>,
}

#[derive(Deserialize)]
struct HarHeader {
    name: String,
    value: String,
}

#[derive(Deserialize)]
struct HarPostData {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct JsonLineExchange {
    #[serde(default)]
    request_id: Option<String>,
    method: String,
    url: String,
    #[serde(default)]
    headers: BTreeMap<String, String>,
    #[serde(default)]
    body: Option<String>,
}

/// Reads a capture file, choosing the format from the extension.
pub fn read_capture(path: &Path) -> TapResult<Vec<ObservedExchange>> {
    let raw = fs::read_to_string(path)?;
    let is_har = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map_or(false, |ext| ext.eq_ignore_ascii_case("har"));
    if is_har {
        parse_har(&raw)
    } else {
        Ok(parse_jsonl(&raw))
    }
}

pub fn parse_har(raw: &str) -> TapResult<Vec<ObservedExchange>> {
    let har: HarFile =
        serde_json::from_str(raw).map_err(|err| TapError::Capture(err.to_string()))?;
    Ok(har
        .log
        .entries
        .into_iter()
        .enumerate()
        .map(|(index, entry)| {
            let request = entry.request;
            // HTTP/2 pseudo headers carry no information the classifier uses.
            let headers = request
                .headers
                .into_iter()
                .filter(|header| !header.name.starts_with(':'))
                .map(|header| (header.name, header.value))
                .collect();
            ObservedExchange {
                request_id: ExchangeId::new(format!("har-{index}")),
                method: request.method,
                url: request.url,
                headers,
                body: request.post_data.and_then(|data| data.text),
            }
        })
        .collect())
}

/// Parses JSON Lines; unparseable lines are logged and skipped.
pub fn parse_jsonl(raw: &str) -> Vec<ObservedExchange> {
    raw.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .filter_map(|(index, line)| {
            match serde_json::from_str::<JsonLineExchange>(line) {
                Ok(parsed) => Some(ObservedExchange {
                    request_id: ExchangeId::new(
                        parsed
                            .request_id
                            .unwrap_or_else(|| format!("line-{}", index + 1)),
                    ),
                    method: parsed.method,
                    url: parsed.url,
                    headers: parsed.headers,
                    body: parsed.body,
                }),
                Err(err) => {
                    warn!(target: "report_tap", line = index + 1, error = %err, "capture line skipped");
                    None
                }
            }
        })
        .collect()
}
