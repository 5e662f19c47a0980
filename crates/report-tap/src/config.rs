//! URL-pattern configuration for the traffic classifier.

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TapConfig {
    /// Path prefix of the bookmark-by-id endpoint; the correlation key is the
    /// segment that follows it.
    pub bookmark_path: String,
    /// Path suffix of the graph query endpoint.
    pub graphql_path: String,
    /// Query flag that marks the primary report fetch.
    pub mark_as_viewed_param: String,
    /// Query parameter carrying the correlation key on graph queries.
    pub correlation_param: String,
    /// Facet whose keys name the entity type of a graph query.
    pub entity_facet_key: String,
    /// When set, only hosts ending with this suffix are considered.
    pub host_suffix: Option<String>,
}

impl Default for TapConfig {
    fn default() -> Self {
        Self {
            bookmark_path: "/services/pathfinder/v1/bookmarks/".to_string(),
            graphql_path: "/services/pathfinder/v1/graphql".to_string(),
            mark_as_viewed_param: "markAsViewed".to_string(),
            correlation_param: "bookmarkId".to_string(),
            entity_facet_key: "FactSheetTypes".to_string(),
            host_suffix: Some("leanix.net".to_string()),
        }
    }
}
