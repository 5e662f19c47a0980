//! Depth-bounded traversal over JSON trees.
//!
//! Graph payloads from the host are trees in practice, but nesting depth is
//! not under our control, so every walk carries an explicit depth cap.

use serde_json::{Map, Value};

/// Default nesting cap for walks and rewrites.
pub const DEFAULT_MAX_DEPTH: usize = 64;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Segment {
    Key(String),
    Index(usize),
}

/// Renders a path as an RFC 6901 pointer usable with `Value::pointer_mut`.
pub fn to_pointer(path: &[Segment]) -> String {
    let mut pointer = String::new();
    for segment in path {
        pointer.push('/');
        match segment {
            Segment::Key(key) => pointer.push_str(&key.replace('~', "~0").replace('/', "~1")),
            Segment::Index(index) => pointer.push_str(&index.to_string()),
        }
    }
    pointer
}

/// Callbacks for [`walk`]. Only objects are reported; arrays are transparent
/// containers and scalars are leaves.
pub trait Visitor {
    fn visit_object(&mut self, path: &[Segment], object: &Map<String, Value>);
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WalkStats {
    pub objects: usize,
    /// Subtrees skipped because they exceeded the depth cap.
    pub truncated: usize,
}

/// Pre-order walk of `value`, visiting every object up to `max_depth`.
pub fn walk<V: Visitor>(value: &Value, max_depth: usize, visitor: &mut V) -> WalkStats {
    let mut stats = WalkStats::default();
    let mut path = Vec::new();
    walk_inner(value, 0, max_depth, &mut path, visitor, &mut stats);
    stats
}

fn walk_inner<V: Visitor>(
    value: &Value,
    depth: usize,
    max_depth: usize,
    path: &mut Vec<Segment>,
    visitor: &mut V,
    stats: &mut WalkStats,
) {
    match value {
        Value::Object(object) => {
            if depth > max_depth {
                stats.truncated += 1;
                return;
            }
            stats.objects += 1;
            visitor.visit_object(path, object);
            for (key, child) in object {
                if child.is_object() || child.is_array() {
                    path.push(Segment::Key(key.clone()));
                    walk_inner(child, depth + 1, max_depth, path, visitor, stats);
                    path.pop();
                }
            }
        }
        Value::Array(items) => {
            if depth > max_depth {
                stats.truncated += 1;
                return;
            }
            for (index, child) in items.iter().enumerate() {
                if child.is_object() || child.is_array() {
                    path.push(Segment::Index(index));
                    walk_inner(child, depth + 1, max_depth, path, visitor, stats);
                    path.pop();
                }
            }
        }
        _ => {}
    }
}
