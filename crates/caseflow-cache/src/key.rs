//! Deterministic cache key derivation.
//!
//! A key is `<namespace>_<hex>` where `<hex>` is the first 128 bits of a
//! BLAKE3 hash over a canonical encoding of the normalized filters and the
//! pagination descriptor. The hex part has a fixed width, so two different
//! namespaces can never produce the same key.

use crate::error::{CacheError, CacheResult};
use caseflow_core::PageRequest;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Number of hash bytes kept in a derived key.
const DIGEST_BYTES: usize = 16;

/// An opaque cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(String);

impl CacheKey {
    /// Wraps a caller-owned key.
    ///
    /// Rejects empty keys and keys containing whitespace or control
    /// characters, since shared backends treat them inconsistently.
    pub fn new(raw: impl Into<String>) -> CacheResult<Self> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(CacheError::InvalidKey("key must not be empty".to_string()));
        }
        if raw.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(CacheError::InvalidKey(format!("key contains whitespace or control characters: {raw:?}")));
        }
        Ok(Self(raw))
    }

    /// Returns the key as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the key, returning the inner string.
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Builder for the inputs of a query key.
///
/// ```
/// use caseflow_cache::QueryKey;
/// use caseflow_core::PageRequest;
///
/// let a = QueryKey::new("beneficiaries")
///     .filter("status", "active")
///     .filter("region", "north")
///     .page(PageRequest::new(2, 15));
/// let b = QueryKey::new("beneficiaries")
///     .filter("region", "north")
///     .filter("status", "active")
///     .filter("search", None::<String>)
///     .page(PageRequest::new(2, 15));
///
/// assert_eq!(a.derive(), b.derive());
/// ```
#[derive(Debug, Clone, PartialEq, Default)]
pub struct QueryKey {
    namespace: String,
    filters: BTreeMap<String, Value>,
    page: Option<PageRequest>,
}

impl QueryKey {
    /// Starts a key in the given namespace.
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            filters: BTreeMap::new(),
            page: None,
        }
    }

    /// Adds a filter. A later filter with the same name replaces the earlier one.
    #[must_use]
    pub fn filter(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.insert(name.into(), value.into());
        self
    }

    /// Adds every filter from an iterator of name/value pairs.
    #[must_use]
    pub fn filters<I, K, V>(mut self, filters: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<Value>,
    {
        self.filters
            .extend(filters.into_iter().map(|(name, value)| (name.into(), value.into())));
        self
    }

    /// Sets the pagination descriptor.
    #[must_use]
    pub fn page(mut self, page: PageRequest) -> Self {
        self.page = Some(page);
        self
    }

    /// Returns the namespace.
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Canonical encoding hashed into the key.
    pub fn canonical(&self) -> String {
        let filters: Map<String, Value> = self
            .filters
            .iter()
            .filter_map(|(name, value)| normalize(value.clone()).map(|v| (name.clone(), v)))
            .collect();

        let page = match self.page {
            Some(p) => serde_json::json!({ "page": p.page, "page_size": p.page_size }),
            None => Value::Null,
        };

        let mut out = String::with_capacity(64);
        write_canonical(&serde_json::json!({ "filters": Value::Object(filters), "page": page }), &mut out);
        out
    }

    /// Derives the cache key.
    pub fn derive(&self) -> CacheKey {
        let digest = blake3::hash(self.canonical().as_bytes());
        let hex = hex::encode(&digest.as_bytes()[..DIGEST_BYTES]);
        CacheKey(format!("{}_{}", self.namespace, hex))
    }
}

/// Derives a key from its parts.
pub fn derive_key<I, K, V>(namespace: &str, filters: I, page: Option<PageRequest>) -> CacheKey
where
    I: IntoIterator<Item = (K, V)>,
    K: Into<String>,
    V: Into<Value>,
{
    let mut query = QueryKey::new(namespace).filters(filters);
    query.page = page;
    query.derive()
}

/// Drops empty values. `false` and `0` are kept: they are real filters.
fn normalize(value: Value) -> Option<Value> {
    match value {
        Value::Null => None,
        Value::String(s) if s.trim().is_empty() => None,
        Value::Array(items) => {
            let mut items: Vec<(String, Value)> = items
                .into_iter()
                .filter_map(normalize)
                .map(|v| {
                    let mut encoded = String::new();
                    write_canonical(&v, &mut encoded);
                    (encoded, v)
                })
                .collect();
            if items.is_empty() {
                return None;
            }
            items.sort_by(|a, b| a.0.cmp(&b.0));
            Some(Value::Array(items.into_iter().map(|(_, v)| v).collect()))
        }
        Value::Object(map) => {
            let map: Map<String, Value> = map
                .into_iter()
                .filter_map(|(k, v)| normalize(v).map(|v| (k, v)))
                .collect();
            if map.is_empty() {
                None
            } else {
                Some(Value::Object(map))
            }
        }
        other => Some(other),
    }
}

/// Compact JSON with object members in byte order of their names,
/// independent of how `serde_json::Map` happens to be ordered.
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut members: Vec<(&String, &Value)> = map.iter().collect();
            members.sort_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (name, member)) in members.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(name.clone()).to_string());
                out.push(':');
                write_canonical(member, out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn hex_part(key: &CacheKey) -> &str {
        key.as_str().rsplit('_').next().unwrap()
    }

    #[test]
    fn test_same_inputs_same_key() {
        let a = QueryKey::new("beneficiaries").filter("status", "active").derive();
        let b = QueryKey::new("beneficiaries").filter("status", "active").derive();
        assert_eq!(a, b);
    }

    #[test]
    fn test_filter_order_is_irrelevant() {
        let a = QueryKey::new("beneficiaries")
            .filter("status", "active")
            .filter("region", "north")
            .derive();
        let b = QueryKey::new("beneficiaries")
            .filter("region", "north")
            .filter("status", "active")
            .derive();
        assert_eq!(a, b);
    }

    #[test]
    fn test_empty_filters_do_not_perturb_key() {
        let plain = QueryKey::new("beneficiaries").filter("status", "active").derive();
        let noisy = QueryKey::new("beneficiaries")
            .filter("status", "active")
            .filter("search", Value::Null)
            .filter("region", "   ")
            .filter("tags", json!([]))
            .filter("meta", json!({ "owner": null }))
            .derive();
        assert_eq!(plain, noisy);
    }

    #[test]
    fn test_false_and_zero_are_filters() {
        let plain = QueryKey::new("cases").derive();
        assert_ne!(plain, QueryKey::new("cases").filter("archived", false).derive());
        assert_ne!(plain, QueryKey::new("cases").filter("count", 0).derive());
    }

    #[test]
    fn test_empty_filter_map_is_stable_and_distinct() {
        let a = QueryKey::new("cases").derive();
        let b = QueryKey::new("cases").filter("x", Value::Null).derive();
        assert_eq!(a, b);
        assert_ne!(a, QueryKey::new("cases").filter("x", "1").derive());
    }

    #[test]
    fn test_pagination_is_part_of_the_key() {
        let base = QueryKey::new("beneficiaries").filter("status", "active");
        let page1 = base.clone().page(PageRequest::new(1, 15)).derive();
        let page2 = base.clone().page(PageRequest::new(2, 15)).derive();
        let wide = base.clone().page(PageRequest::new(1, 50)).derive();
        let unpaged = base.derive();

        assert_ne!(page1, page2);
        assert_ne!(page1, wide);
        assert_ne!(page1, unpaged);
    }

    #[test]
    fn test_list_values_are_ordered() {
        let a = QueryKey::new("cases").filter("status", json!(["open", "closed"])).derive();
        let b = QueryKey::new("cases").filter("status", json!(["closed", "open"])).derive();
        assert_eq!(a, b);
    }

    #[test]
    fn test_nested_objects_are_canonical() {
        let mut first = Map::new();
        first.insert("b".to_string(), json!(2));
        first.insert("a".to_string(), json!(1));
        let mut second = Map::new();
        second.insert("a".to_string(), json!(1));
        second.insert("b".to_string(), json!(2));

        let a = QueryKey::new("cases").filter("range", Value::Object(first)).derive();
        let b = QueryKey::new("cases").filter("range", Value::Object(second)).derive();
        assert_eq!(a, b);
    }

    #[test]
    fn test_namespace_prefix_and_digest_width() {
        let key = QueryKey::new("beneficiaries").filter("status", "active").derive();
        assert!(key.as_str().starts_with("beneficiaries_"));
        let hex = hex_part(&key);
        assert_eq!(hex.len(), DIGEST_BYTES * 2);
        assert!(hex.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_namespaces_are_isolated() {
        let a = QueryKey::new("beneficiaries").filter("id", "42").derive();
        let b = QueryKey::new("cases").filter("id", "42").derive();
        assert_ne!(a, b);
        assert_eq!(hex_part(&a), hex_part(&b));
    }

    #[test]
    fn test_option_filters() {
        let none: Option<&str> = None;
        let a = QueryKey::new("cases").filter("owner", none).derive();
        assert_eq!(a, QueryKey::new("cases").derive());

        let b = QueryKey::new("cases").filter("owner", Some("ana")).derive();
        assert_eq!(b, QueryKey::new("cases").filter("owner", "ana").derive());
    }

    #[test]
    fn test_derive_key_matches_builder() {
        let filters = vec![("status", "active"), ("region", "north")];
        let page = Some(PageRequest::first());
        let built = QueryKey::new("beneficiaries")
            .filter("region", "north")
            .filter("status", "active")
            .page(PageRequest::first())
            .derive();
        assert_eq!(derive_key("beneficiaries", filters, page), built);
    }

    #[test]
    fn test_canonical_encoding() {
        let query = QueryKey::new("cases")
            .filter("z", 1)
            .filter("a", "x")
            .page(PageRequest::new(3, 10));
        assert_eq!(
            query.canonical(),
            r#"{"filters":{"a":"x","z":1},"page":{"page":3,"page_size":10}}"#
        );
    }

    #[test]
    fn test_raw_key_validation() {
        assert!(CacheKey::new("beneficiary_42").is_ok());
        assert!(matches!(CacheKey::new(""), Err(CacheError::InvalidKey(_))));
        assert!(matches!(CacheKey::new("has space"), Err(CacheError::InvalidKey(_))));
        assert!(matches!(CacheKey::new("tab\there"), Err(CacheError::InvalidKey(_))));
    }
}
