//! Key namespacing shared by every writer.

use factsheet_core_types::{CorrelationKey, EntityType, ShardIndex};

/// Merged collection for one entity type: `edges_<key>.<type>`.
pub fn edges_key(key: &CorrelationKey, entity_type: &EntityType) -> String {
    format!("edges_{}.{}", key, entity_type)
}

/// Prefix covering every merged collection of a report.
pub fn edges_prefix(key: &CorrelationKey) -> String {
    format!("edges_{}.", key)
}

/// Resolved output for one entity type: `<key>.<type>_resolved`.
pub fn resolved_key(key: &CorrelationKey, entity_type: &EntityType) -> String {
    format!("{}.{}_resolved", key, entity_type)
}

/// Ledger body mirror: `request_<key>_<type>_<shard>`.
pub fn request_key(key: &CorrelationKey, entity_type: &EntityType, shard: ShardIndex) -> String {
    format!("request_{}_{}_{}", key, entity_type, shard)
}

/// Captured credential mirror: `auth_<key>`.
pub fn auth_key(key: &CorrelationKey) -> String {
    format!("auth_{}", key)
}
