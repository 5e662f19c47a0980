#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use factsheet_kv_store::InMemoryKvStore;
use factsheet_lens::{LensConfig, LensError, LensResult, Orchestrator, ReportTransport};
use report_tap::ObservedExchange;
use serde_json::{json, Value};

pub const HOST: &str = "https://acme.leanix.net";
pub const APP_CRM: &str = "11111111-1111-4111-8111-111111111111";
pub const APP_ERP: &str = "22222222-2222-4222-8222-222222222222";
pub const CAP_FINANCE: &str = "aaaaaaaa-aaaa-4aaa-8aaa-aaaaaaaaaaaa";

/// In-process stand-in for the host: answers GETs by URL and POSTs by body.
#[derive(Default)]
pub struct ScriptedTransport {
    gets: Mutex<HashMap<String, Value>>,
    posts: Mutex<HashMap<String, Value>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn on_get(&self, url: impl Into<String>, response: Value) {
        self.gets.lock().unwrap().insert(url.into(), response);
    }

    pub fn on_post(&self, body: impl Into<String>, response: Value) {
        self.posts.lock().unwrap().insert(body.into(), response);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ReportTransport for ScriptedTransport {
    async fn get_json(&self, url: &str, credential: &str) -> LensResult<Value> {
        self.calls.lock().unwrap().push(format!("GET {url} as {credential}"));
        self.gets
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| LensError::Status {
                url: url.to_string(),
                status: 500,
            })
    }

    async fn post_json(&self, url: &str, credential: &str, body: &str) -> LensResult<Value> {
        self.calls.lock().unwrap().push(format!("POST {url} as {credential}"));
        self.posts
            .lock()
            .unwrap()
            .get(body)
            .cloned()
            .ok_or_else(|| LensError::transport(url, "no scripted response"))
    }
}

pub fn bookmark_url(key: &str) -> String {
    format!("{HOST}/services/pathfinder/v1/bookmarks/{key}?markAsViewed=true")
}

pub fn graphql_url(key: &str) -> String {
    format!("{HOST}/services/pathfinder/v1/graphql?bookmarkId={key}")
}

pub fn metadata_url(entity_type: &str) -> String {
    format!("{HOST}/services/pathfinder/v1/models/dataModel/factSheets/{entity_type}")
}

/// Graph query body; `page` keeps shard bodies distinct.
pub fn query_body(entity_type: &str, page: u32) -> String {
    json!({
        "query": "query allFactSheetsQuery($filter: FilterInput!) { allFactSheets(filter: $filter) { edges { node { id } } } }",
        "variables": {
            "filter": {"facetFilters": [
                {"facetKey": "FactSheetTypes", "operator": "OR", "keys": [entity_type]}
            ]},
            "page": page
        }
    })
    .to_string()
}

pub fn graph_query(request_id: &str, key: &str, entity_type: &str, page: u32) -> ObservedExchange {
    ObservedExchange::new(request_id, "POST", graphql_url(key))
        .with_header("Authorization", format!("Bearer token-{key}"))
        .with_body(query_body(entity_type, page))
}

pub fn primary_fetch(request_id: &str, key: &str) -> ObservedExchange {
    ObservedExchange::new(request_id, "GET", bookmark_url(key))
        .with_header("Authorization", format!("Bearer token-{key}"))
}

pub fn edges(nodes: Vec<Value>) -> Value {
    let edges: Vec<Value> = nodes.into_iter().map(|node| json!({"node": node})).collect();
    json!({"data": {"allFactSheets": {"totalCount": edges.len(), "edges": edges}}})
}

pub fn bookmark(key: &str, filters: &[&str]) -> Value {
    json!({
        "status": "OK",
        "data": {
            "id": key,
            "name": "Application landscape",
            "state": {"customState": {"view": "lifecycle", "filters": filters}}
        }
    })
}

pub fn crm(name: &str) -> Value {
    json!({
        "id": APP_CRM,
        "name": name,
        "relApplicationToBusinessCapability": {
            "edges": [{"node": {"id": "rel-1", "factSheet": {"id": CAP_FINANCE}}}]
        }
    })
}

/// Scripts the report `key` with two Application shards and one
/// BusinessCapability shard.
pub fn script_report(transport: &ScriptedTransport, key: &str) {
    transport.on_get(bookmark_url(key), bookmark(key, &["Application", "BusinessCapability"]));
    transport.on_get(
        metadata_url("Application"),
        json!({"data": {"sections": [{"key": "general", "fields": [{
            "key": "lifecycle",
            "label": "Lifecycle",
            "helpText": "Phase of the application",
            "values": [{"key": "active", "label": "Active"}]
        }]}]}}),
    );
    transport.on_post(query_body("Application", 0), edges(vec![crm("CRM")]));
    transport.on_post(
        query_body("Application", 1),
        edges(vec![json!({"id": APP_ERP, "name": "ERP"}), crm("CRM")]),
    );
    transport.on_post(
        query_body("BusinessCapability", 0),
        edges(vec![json!({"id": CAP_FINANCE, "fullName": "Finance Capability"})]),
    );
}

pub fn new_orchestrator(transport: Arc<ScriptedTransport>) -> (Orchestrator, Arc<InMemoryKvStore>) {
    let store = Arc::new(InMemoryKvStore::new());
    let orchestrator = Orchestrator::new(LensConfig::default(), transport, store.clone());
    (orchestrator, store)
}
