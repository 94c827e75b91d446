//! Index Module Tests
//!
//! ## Test Scopes
//! - **Hash Index**: Equality lookups, moves between buckets, bucket cleanup.
//! - **Sorted Index**: Range lookups over encoded values.
//! - **Consistency**: Index answers match the entries after any write sequence.

#[cfg(test)]
mod tests {
    use crate::error::GridError;
    use crate::index::engine::IndexEngine;
    use crate::index::types::{IndexDefinition, IndexKind, IndexQuery};
    use crate::session::codec::{AttributeCodec, JsonCodec};
    use crate::storage::types::{Attributes, Entry};
    use proptest::prelude::*;
    use serde_json::json;
    use std::collections::{HashMap, HashSet};

    fn engine() -> IndexEngine {
        IndexEngine::new(&[
            IndexDefinition {
                attribute: "principal".to_string(),
                kind: IndexKind::Hash,
            },
            IndexDefinition {
                attribute: "score".to_string(),
                kind: IndexKind::Sorted,
            },
        ])
    }

    fn entry(key: &str, principal: Option<&str>, score: Option<u8>) -> Entry {
        let mut attributes = Attributes::new();
        if let Some(principal) = principal {
            attributes.insert("principal".to_string(), principal.as_bytes().to_vec());
        }
        if let Some(score) = score {
            attributes.insert("score".to_string(), vec![score]);
        }
        Entry {
            key: key.to_string(),
            attributes,
            version: 1,
            sequence: 1,
            created_at: 0,
            last_accessed: 0,
            max_idle_ms: 0,
        }
    }

    fn keys(items: &[&str]) -> HashSet<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    // ============================================================
    // HASH INDEX TESTS
    // ============================================================

    #[test]
    fn test_insert_and_query() {
        let mut index = engine();
        let s1 = entry("s1", Some("alice"), None);
        let s2 = entry("s2", Some("alice"), None);
        let s3 = entry("s3", Some("bob"), None);

        index.on_entry_changed("s1", None, Some(&s1));
        index.on_entry_changed("s2", None, Some(&s2));
        index.on_entry_changed("s3", None, Some(&s3));

        assert_eq!(index.query("principal", b"alice").unwrap(), keys(&["s1", "s2"]));
        assert_eq!(index.query("principal", b"bob").unwrap(), keys(&["s3"]));
        assert!(index.query("principal", b"carol").unwrap().is_empty());
    }

    #[test]
    fn test_value_change_moves_key() {
        let mut index = engine();
        let v1 = entry("s1", Some("alice"), None);
        let v2 = entry("s1", Some("bob"), None);

        index.on_entry_changed("s1", None, Some(&v1));
        index.on_entry_changed("s1", Some(&v1), Some(&v2));

        assert!(index.query("principal", b"alice").unwrap().is_empty());
        assert_eq!(index.query("principal", b"bob").unwrap(), keys(&["s1"]));
        assert_eq!(index.term_count("principal"), 1, "Empty bucket should be dropped");
    }

    #[test]
    fn test_removal_clears_every_index() {
        let mut index = engine();
        let s1 = entry("s1", Some("alice"), Some(5));

        index.on_entry_changed("s1", None, Some(&s1));
        index.on_entry_changed("s1", Some(&s1), None);

        assert_eq!(index.term_count("principal"), 0);
        assert_eq!(index.term_count("score"), 0);
    }

    #[test]
    fn test_unindexed_attribute_is_rejected() {
        let index = engine();
        assert_eq!(
            index.query("colour", b"red"),
            Err(GridError::NoSuchIndex("colour".to_string()))
        );
        assert!(!index.is_indexed("colour"));
    }

    // ============================================================
    // SORTED INDEX TESTS
    // ============================================================

    #[test]
    fn test_range_is_half_open() {
        let mut index = engine();
        for (key, score) in [("a", 1u8), ("b", 2), ("c", 3), ("d", 4)] {
            let e = entry(key, None, Some(score));
            index.on_entry_changed(key, None, Some(&e));
        }

        assert_eq!(
            index.range("score", Some(&[2]), Some(&[4])).unwrap(),
            keys(&["b", "c"])
        );
        assert_eq!(index.range("score", None, Some(&[2])).unwrap(), keys(&["a"]));
        assert_eq!(index.range("score", Some(&[4]), None).unwrap(), keys(&["d"]));
        assert!(index.range("score", Some(&[4]), Some(&[2])).unwrap().is_empty());
        assert!(index.range("score", Some(&[3]), Some(&[3])).unwrap().is_empty());
    }

    #[test]
    fn test_range_orders_json_encoded_values_as_bytes() {
        let codec = JsonCodec;
        let mut index = engine();
        for (key, value) in [("nine", json!(9)), ("ten", json!(10)), ("padded", json!("09"))] {
            let mut e = entry(key, None, None);
            e.attributes
                .insert("score".to_string(), codec.encode(&value).unwrap());
            index.on_entry_changed(key, None, Some(&e));
        }

        // "10" < "9" as text; quoted strings sort before digits.
        assert_eq!(
            index.range("score", Some(b"1"), Some(b"2")).unwrap(),
            keys(&["ten"])
        );
        assert_eq!(
            index.range("score", None, Some(b"1")).unwrap(),
            keys(&["padded"])
        );
        assert_eq!(
            index.range("score", Some(b"9"), None).unwrap(),
            keys(&["nine"])
        );
    }

    #[test]
    fn test_range_on_hash_index_is_rejected() {
        let index = engine();
        assert_eq!(
            index.range("principal", None, None),
            Err(GridError::RangeUnsupported("principal".to_string()))
        );
    }

    #[test]
    fn test_execute_dispatches_predicates() {
        let mut index = engine();
        let s1 = entry("s1", Some("alice"), Some(7));
        index.on_entry_changed("s1", None, Some(&s1));

        let by_principal = IndexQuery::equal("principal", b"alice".to_vec());
        let by_score = IndexQuery::range("score", Some(vec![5]), None);

        assert_eq!(index.execute(&by_principal).unwrap(), keys(&["s1"]));
        assert_eq!(index.execute(&by_score).unwrap(), keys(&["s1"]));
    }

    // ============================================================
    // CONSISTENCY PROPERTY
    // ============================================================

    #[derive(Debug, Clone)]
    enum Write {
        Set(u8, u8),
        Remove(u8),
    }

    fn write_strategy() -> impl Strategy<Value = Write> {
        prop_oneof![
            (0u8..10, 0u8..4).prop_map(|(k, v)| Write::Set(k, v)),
            (0u8..10).prop_map(Write::Remove),
        ]
    }

    proptest! {
        #[test]
        fn prop_index_matches_entries(writes in prop::collection::vec(write_strategy(), 1..60)) {
            let mut index = engine();
            let mut entries: HashMap<String, Entry> = HashMap::new();

            for write in writes {
                match write {
                    Write::Set(k, v) => {
                        let key = format!("k{k}");
                        let new = entry(&key, Some(&format!("p{v}")), Some(v));
                        let old = entries.insert(key.clone(), new.clone());
                        index.on_entry_changed(&key, old.as_ref(), Some(&new));
                    }
                    Write::Remove(k) => {
                        let key = format!("k{k}");
                        if let Some(old) = entries.remove(&key) {
                            index.on_entry_changed(&key, Some(&old), None);
                        }
                    }
                }

                for v in 0u8..4 {
                    let expected: HashSet<String> = entries
                        .values()
                        .filter(|e| e.attributes.get("score") == Some(&vec![v]))
                        .map(|e| e.key.clone())
                        .collect();
                    let principal = format!("p{v}");
                    prop_assert_eq!(
                        index.query("principal", principal.as_bytes()).unwrap(),
                        expected.clone()
                    );
                    prop_assert_eq!(
                        index.range("score", Some(&[v]), Some(&[v + 1])).unwrap(),
                        expected
                    );
                }
            }
        }
    }
}
