use std::process::Command;

use assert_cmd::prelude::*;
use serde_json::{json, Value};
use tempfile::TempDir;

const HOST: &str = "https://acme.leanix.net";

fn lens(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("factsheet-lens").expect("binary");
    cmd.arg("--config").arg(dir.path().join("missing.yaml"));
    cmd.env_remove("RUST_LOG");
    cmd
}

fn stdout_json(cmd: &mut Command) -> Value {
    let assert = cmd.assert().success();
    let stdout = String::from_utf8(assert.get_output().stdout.clone()).expect("utf8 output");
    serde_json::from_str(&stdout).expect("valid json")
}

#[test]
fn normalize_prints_entity_document() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("edges.json");
    std::fs::write(
        &input,
        json!([{"node": {"id": "1", "relApplicationToBusinessCapability": {"edges": [{"node": {"id": "2"}}]}}}])
            .to_string(),
    )
    .unwrap();

    let value = stdout_json(lens(&dir).arg("normalize").arg(&input));

    assert_eq!(
        value,
        json!([{"Entity": {"id": "1", "RelationsToBusinessCapability": {"Relations": [{"RelationTo": {}}]}}}])
    );
}

#[test]
fn classify_reports_shard_counts() {
    let dir = TempDir::new().unwrap();
    let capture = dir.path().join("capture.jsonl");
    let query = |id: &str, ty: &str| {
        json!({
            "request_id": id,
            "method": "POST",
            "url": format!("{HOST}/services/pathfinder/v1/graphql?bookmarkId=b1"),
            "headers": {"authorization": "Bearer t"},
            "body": json!({"variables": {"filter": {"facetFilters": [
                {"facetKey": "FactSheetTypes", "keys": [ty]}
            ]}}}).to_string()
        })
        .to_string()
    };
    let lines = [
        query("1", "Application"),
        query("2", "Application"),
        query("3", "BusinessCapability"),
        json!({"method": "GET", "url": "https://example.com/"}).to_string(),
    ];
    std::fs::write(&capture, lines.join("\n")).unwrap();

    let value = stdout_json(lens(&dir).args(["--output", "json", "classify"]).arg(&capture));

    assert_eq!(value["key"], json!("b1"));
    assert_eq!(
        value["counts_by_type"],
        json!({"Application": 2, "BusinessCapability": 1})
    );
    assert_eq!(value["total"], json!(3));
    assert_eq!(value["ignored"], json!(1));
}

#[test]
fn findings_are_matched_against_document() {
    let dir = TempDir::new().unwrap();
    let document = dir.path().join("document.json");
    let reply = dir.path().join("reply.txt");
    std::fs::write(
        &document,
        json!([{"Entity": {"id": "a", "name": "CRM"}}]).to_string(),
    )
    .unwrap();
    std::fs::write(
        &reply,
        "Sure:\n```json\n{\"factSheets\": [{\"id\": \"a\", \"reason\": \"sunset\"}, {\"id\": \"z\", \"reason\": \"?\"}]}\n```",
    )
    .unwrap();

    let value = stdout_json(
        lens(&dir)
            .args(["--output", "json", "findings"])
            .arg(&document)
            .arg(&reply),
    );

    assert_eq!(
        value,
        json!({
            "matched": [{"id": "a", "reason": "sunset", "displayName": "CRM"}],
            "unknownIds": ["z"]
        })
    );
}

#[test]
fn missing_input_fails() {
    let dir = TempDir::new().unwrap();
    lens(&dir)
        .arg("normalize")
        .arg(dir.path().join("absent.json"))
        .assert()
        .failure();
}
