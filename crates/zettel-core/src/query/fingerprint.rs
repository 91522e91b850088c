//! Order-independent result fingerprints for staleness checks.
//!
//! A served result is compared against a freshly computed one as an
//! unordered multiset of rows: each row is rendered as canonical JSON
//! (object keys sorted), the renderings are sorted, and the sorted list is
//! hashed with SHA-256. Rows holding a non-finite float have no canonical
//! rendering, so such results have no fingerprint and the comparison falls
//! back to row counts.

use sha2::{Digest, Sha256};

use super::engine::QueryResult;
use crate::value::{FieldMap, Value};

/// Hex SHA-256 over the sorted canonical rows, or `None` when a row holds
/// a NaN or infinite float.
pub fn fingerprint(rows: &[FieldMap]) -> Option<String> {
    let mut rendered = Vec::with_capacity(rows.len());
    for row in rows {
        if !row.iter().all(|(_, v)| v.is_finite()) {
            return None;
        }
        let json = Value::Map(row.clone()).to_json();
        rendered.push(serde_json::to_string(&json).ok()?);
    }
    rendered.sort_unstable();

    let mut hasher = Sha256::new();
    for line in &rendered {
        hasher.update(line.as_bytes());
        hasher.update(b"\n");
    }
    Some(hex::encode(hasher.finalize()))
}

/// True when `fresh` holds a different multiset of rows than `served`.
pub fn results_differ(served: &[FieldMap], fresh: &[FieldMap]) -> bool {
    match (fingerprint(served), fingerprint(fresh)) {
        (Some(a), Some(b)) => a != b,
        _ => served.len() != fresh.len(),
    }
}

impl QueryResult {
    pub fn fingerprint(&self) -> Option<String> {
        fingerprint(&self.rows)
    }

    /// Staleness comparison against a result computed later.
    pub fn differs_from(&self, fresh: &QueryResult) -> bool {
        results_differ(&self.rows, &fresh.rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: i64, title: &str) -> FieldMap {
        let mut row = FieldMap::new();
        row.insert("id", Value::Int(id));
        row.insert("title", Value::from(title));
        row
    }

    #[test]
    fn test_row_order_does_not_matter() {
        let a = vec![row(1, "a"), row(2, "b")];
        let b = vec![row(2, "b"), row(1, "a")];
        assert_eq!(fingerprint(&a), fingerprint(&b));
        assert!(!results_differ(&a, &b));
    }

    #[test]
    fn test_key_order_does_not_matter() {
        let mut swapped = FieldMap::new();
        swapped.insert("title", Value::from("a"));
        swapped.insert("id", Value::Int(1));
        assert_eq!(fingerprint(&[row(1, "a")]), fingerprint(&[swapped]));
    }

    #[test]
    fn test_duplicates_count() {
        let once = vec![row(1, "a"), row(2, "b")];
        let twice = vec![row(1, "a"), row(1, "a")];
        assert!(results_differ(&once, &twice));
    }

    #[test]
    fn test_non_finite_falls_back_to_length() {
        let mut odd = row(1, "a");
        odd.insert("score", Value::Float(f64::NAN));
        assert_eq!(fingerprint(&[odd.clone()]), None);
        assert!(!results_differ(&[odd.clone()], &[row(9, "z")]));
        assert!(results_differ(&[odd], &[]));
    }
}
