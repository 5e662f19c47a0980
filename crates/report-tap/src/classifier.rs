//! Traffic classification.
//!
//! Classification is a pure function of the exchange: it never touches the
//! request, it only decides which of the two interesting shapes the request
//! has and pulls out the correlation key and entity type.

use factsheet_core_types::{CorrelationKey, EntityType};
use serde_json::Value;
use tracing::warn;
use url::Url;

use crate::config::TapConfig;
use crate::exchange::ObservedExchange;
use crate::{TapError, TapResult};

/// Maximum nesting followed inside a composite filter tree.
const MAX_FILTER_DEPTH: usize = 32;

#[derive(Clone, Debug, PartialEq)]
pub enum Classification {
    /// GET of the bookmark-by-id endpoint carrying the mark-as-viewed flag.
    PrimaryFetch { key: CorrelationKey, url: String },
    /// POST to the graph endpoint scoped to a correlation key.
    GraphQuery {
        key: CorrelationKey,
        entity_type: EntityType,
        url: String,
        body: String,
    },
    Unmatched,
}

pub struct TrafficClassifier {
    config: TapConfig,
}

impl TrafficClassifier {
    pub fn new(config: TapConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TapConfig {
        &self.config
    }

    /// Classifies an exchange.
    ///
    /// `Ok(Unmatched)` is a classification miss. `Err` means the exchange had
    /// the shape of a graph query but its body could not yield an entity type.
    pub fn classify(&self, exchange: &ObservedExchange) -> TapResult<Classification> {
        let url = match Url::parse(&exchange.url) {
            Ok(url) => url,
            Err(_) => return Ok(Classification::Unmatched),
        };
        if !self.host_matches(&url) {
            return Ok(Classification::Unmatched);
        }

        if exchange.is_method("GET") {
            if let Some(key) = self.primary_fetch_key(&url) {
                return Ok(Classification::PrimaryFetch {
                    key,
                    url: exchange.url.clone(),
                });
            }
            return Ok(Classification::Unmatched);
        }

        if exchange.is_method("POST") {
            let key = match self.graph_query_key(&url) {
                Some(key) => key,
                None => return Ok(Classification::Unmatched),
            };
            let body = exchange.body.as_deref().ok_or(TapError::MissingBody)?;
            let parsed: Value = serde_json::from_str(body)
                .map_err(|err| TapError::InvalidBody(err.to_string()))?;
            let entity_type = extract_entity_type(&parsed, &self.config.entity_facet_key)
                .ok_or_else(|| TapError::MissingEntityType {
                    facet: self.config.entity_facet_key.clone(),
                })?;
            return Ok(Classification::GraphQuery {
                key,
                entity_type,
                url: exchange.url.clone(),
                body: body.to_string(),
            });
        }

        Ok(Classification::Unmatched)
    }

    fn host_matches(&self, url: &Url) -> bool {
        match (&self.config.host_suffix, url.host_str()) {
            (None, _) => true,
            (Some(suffix), Some(host)) => host.ends_with(suffix.as_str()),
            (Some(_), None) => false,
        }
    }

    fn primary_fetch_key(&self, url: &Url) -> Option<CorrelationKey> {
        let path = url.path();
        let start = path.find(self.config.bookmark_path.as_str())? + self.config.bookmark_path.len();
        let segment = path[start..].split('/').next().unwrap_or_default();
        if segment.is_empty() {
            return None;
        }
        let marked = url.query_pairs().any(|(name, value)| {
            name == self.config.mark_as_viewed_param.as_str() && value.eq_ignore_ascii_case("true")
        });
        marked.then(|| CorrelationKey::new(segment))
    }

    fn graph_query_key(&self, url: &Url) -> Option<CorrelationKey> {
        if !url
            .path()
            .trim_end_matches('/')
            .ends_with(self.config.graphql_path.trim_end_matches('/'))
        {
            return None;
        }
        url.query_pairs()
            .find(|(name, value)| {
                name == self.config.correlation_param.as_str() && !value.is_empty()
            })
            .map(|(_, value)| CorrelationKey::new(value.into_owned()))
    }
}

/// Searches a graph query body for the entity-type facet.
///
/// The filter lives at `variables.filter` (or a top-level `filter`). Two
/// shapes are understood, checked in this order:
///
/// 1. a composite tree under `compositeFilter`: boolean groups carrying
///    `subFilters`, whose leaves are facets or hold `facetFilters` lists;
/// 2. a flat `facetFilters` list.
///
/// The first non-empty key of the first matching facet wins.
pub fn extract_entity_type(body: &Value, facet_key: &str) -> Option<EntityType> {
    let filter = body
        .pointer("/variables/filter")
        .or_else(|| body.get("filter"))?;

    let composite = filter
        .get("compositeFilter")
        .and_then(|tree| search_composite(tree, facet_key, 0));
    let flat = filter
        .get("facetFilters")
        .and_then(|facets| search_facet_list(facets, facet_key));

    if let (Some(first), Some(second)) = (&composite, &flat) {
        if first != second {
            warn!(
                target: "report_tap",
                composite = %first,
                flat = %second,
                "graph query carries conflicting entity-type facets; composite shape wins"
            );
        }
    }
    composite.or(flat)
}

fn search_composite(node: &Value, facet_key: &str, depth: usize) -> Option<EntityType> {
    if depth > MAX_FILTER_DEPTH {
        return None;
    }
    if let Some(found) = facet_entity_type(node, facet_key) {
        return Some(found);
    }
    if let Some(found) = node
        .get("facetFilters")
        .and_then(|facets| search_facet_list(facets, facet_key))
    {
        return Some(found);
    }
    node.get("subFilters")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .find_map(|child| search_composite(child, facet_key, depth + 1))
}

fn search_facet_list(facets: &Value, facet_key: &str) -> Option<EntityType> {
    facets
        .as_array()?
        .iter()
        .find_map(|facet| facet_entity_type(facet, facet_key))
}

fn facet_entity_type(facet: &Value, facet_key: &str) -> Option<EntityType> {
    if facet.get("facetKey").and_then(Value::as_str) != Some(facet_key) {
        return None;
    }
    facet
        .get("keys")
        .and_then(Value::as_array)?
        .iter()
        .filter_map(Value::as_str)
        .find(|key| !key.is_empty())
        .map(EntityType::from)
}
