// ============================================================================
// Positional Operator Rewriting
// ============================================================================
//
// In-memory array indices may be stale by the time an update reaches the
// database. When the selector already pins the array element by `_id`, the
// numeric segment is replaced with `$` so the server resolves the index
// itself. Only single-level array nesting is handled.
//
// ============================================================================

use super::operators::OperatorMap;
use crate::core::{Fields, ID_FIELD};
use lazy_static::lazy_static;
use lru::LruCache;
use regex::Regex;
use serde_json::Value;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex, PoisonError};

lazy_static! {
    static ref POSITION_REGEX_CACHE: Mutex<LruCache<String, Arc<Regex>>> =
        Mutex::new(LruCache::new(NonZeroUsize::new(128).unwrap()));
}

const ID_SUFFIX: &str = "._id";

/// Rewrites array indices in `operations` against `selector`.
///
/// A selector with fewer than two keys, or any null value, cannot
/// disambiguate an element; the operations come back untouched.
pub fn positionally(selector: &Fields, operations: OperatorMap) -> OperatorMap {
    if selector.len() < 2 || selector.values().any(Value::is_null) {
        return operations;
    }

    let keys = base_keys(selector);
    if keys.is_empty() {
        return operations;
    }
    operations.map_paths(|path| replace_index(&keys, path))
}

/// Selector keys other than `_id`, with `._id` stripped, longest first.
pub fn base_keys(selector: &Fields) -> Vec<String> {
    let mut keys: Vec<String> = selector
        .keys()
        .filter(|key| key.as_str() != ID_FIELD)
        .map(|key| key.strip_suffix(ID_SUFFIX).unwrap_or(key).to_string())
        .collect();
    keys.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
    keys.dedup();
    keys
}

/// Replaces the numeric segment following the longest matching key with `$`.
///
/// Paths with no numeric segment, or with more than one, are returned as is.
pub fn replace_index(keys: &[String], path: &str) -> String {
    if numeric_segments(path) != 1 {
        return path.to_string();
    }

    for key in keys {
        let Some(regex) = position_regex(key) else {
            continue;
        };
        if let Some(captures) = regex.captures(path) {
            let rest = captures.get(1).map_or("", |m| m.as_str());
            return format!("{}.$.{}", key, rest);
        }
    }
    path.to_string()
}

/// Count of `.<digits>.` segments, i.e. numeric segments that are neither
/// first nor last.
fn numeric_segments(path: &str) -> usize {
    let segments: Vec<&str> = path.split('.').collect();
    if segments.len() < 3 {
        return 0;
    }
    segments[1..segments.len() - 1]
        .iter()
        .filter(|segment| !segment.is_empty() && segment.bytes().all(|b| b.is_ascii_digit()))
        .count()
}

fn position_regex(key: &str) -> Option<Arc<Regex>> {
    let mut cache = POSITION_REGEX_CACHE
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    if let Some(regex) = cache.get(key) {
        return Some(regex.clone());
    }

    let pattern = format!(r"^{}\.\d+\.(.*)$", regex::escape(key));
    let regex = Arc::new(Regex::new(&pattern).ok()?);
    cache.put(key.to_string(), regex.clone());
    Some(regex)
}
