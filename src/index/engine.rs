use super::types::{IndexDefinition, IndexKind, IndexPredicate, IndexQuery};
use crate::error::{GridError, Result};
use crate::storage::types::Entry;

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::ops::Bound;

enum AttributeIndex {
    Hash(HashMap<Vec<u8>, HashSet<String>>),
    Sorted(BTreeMap<Vec<u8>, BTreeSet<String>>),
}

impl AttributeIndex {
    fn insert(&mut self, term: &[u8], key: &str) {
        match self {
            AttributeIndex::Hash(buckets) => {
                buckets
                    .entry(term.to_vec())
                    .or_default()
                    .insert(key.to_string());
            }
            AttributeIndex::Sorted(buckets) => {
                buckets
                    .entry(term.to_vec())
                    .or_default()
                    .insert(key.to_string());
            }
        }
    }

    fn remove(&mut self, term: &[u8], key: &str) {
        match self {
            AttributeIndex::Hash(buckets) => {
                if let Some(keys) = buckets.get_mut(term) {
                    keys.remove(key);
                    if keys.is_empty() {
                        buckets.remove(term);
                    }
                }
            }
            AttributeIndex::Sorted(buckets) => {
                if let Some(keys) = buckets.get_mut(term) {
                    keys.remove(key);
                    if keys.is_empty() {
                        buckets.remove(term);
                    }
                }
            }
        }
    }

    fn lookup(&self, term: &[u8]) -> HashSet<String> {
        match self {
            AttributeIndex::Hash(buckets) => buckets.get(term).cloned().unwrap_or_default(),
            AttributeIndex::Sorted(buckets) => buckets
                .get(term)
                .map(|keys| keys.iter().cloned().collect())
                .unwrap_or_default(),
        }
    }

    fn term_count(&self) -> usize {
        match self {
            AttributeIndex::Hash(buckets) => buckets.len(),
            AttributeIndex::Sorted(buckets) => buckets.len(),
        }
    }

    fn clear(&mut self) {
        match self {
            AttributeIndex::Hash(buckets) => buckets.clear(),
            AttributeIndex::Sorted(buckets) => buckets.clear(),
        }
    }
}

/// Secondary indexes of one partition.
///
/// Lives inside the partition's lock next to the entries, so every write
/// updates entry and index together.
pub struct IndexEngine {
    indexes: HashMap<String, AttributeIndex>,
}

impl IndexEngine {
    pub fn new(definitions: &[IndexDefinition]) -> Self {
        let indexes = definitions
            .iter()
            .map(|def| {
                let index = match def.kind {
                    IndexKind::Hash => AttributeIndex::Hash(HashMap::new()),
                    IndexKind::Sorted => AttributeIndex::Sorted(BTreeMap::new()),
                };
                (def.attribute.clone(), index)
            })
            .collect();

        Self { indexes }
    }

    /// Moves `key` from the buckets of `old` to those of `new`. `None` on
    /// either side means the entry did not exist (insert) or is gone
    /// (remove).
    pub fn on_entry_changed(&mut self, key: &str, old: Option<&Entry>, new: Option<&Entry>) {
        for (attribute, index) in self.indexes.iter_mut() {
            let old_term = old.and_then(|e| e.attributes.get(attribute));
            let new_term = new.and_then(|e| e.attributes.get(attribute));

            if old_term == new_term {
                continue;
            }
            if let Some(term) = old_term {
                index.remove(term, key);
            }
            if let Some(term) = new_term {
                index.insert(term, key);
            }
        }
    }

    pub fn query(&self, attribute: &str, value: &[u8]) -> Result<HashSet<String>> {
        let index = self
            .indexes
            .get(attribute)
            .ok_or_else(|| GridError::NoSuchIndex(attribute.to_string()))?;
        Ok(index.lookup(value))
    }

    /// Keys whose term lies in `[lower, upper)`. Only sorted indexes
    /// answer range queries.
    pub fn range(
        &self,
        attribute: &str,
        lower: Option<&[u8]>,
        upper: Option<&[u8]>,
    ) -> Result<HashSet<String>> {
        let index = self
            .indexes
            .get(attribute)
            .ok_or_else(|| GridError::NoSuchIndex(attribute.to_string()))?;

        let AttributeIndex::Sorted(buckets) = index else {
            return Err(GridError::RangeUnsupported(attribute.to_string()));
        };

        if let (Some(lower), Some(upper)) = (lower, upper)
            && lower >= upper
        {
            return Ok(HashSet::new());
        }

        let from = lower.map_or(Bound::Unbounded, |b| Bound::Included(b.to_vec()));
        let to = upper.map_or(Bound::Unbounded, |b| Bound::Excluded(b.to_vec()));

        Ok(buckets
            .range::<Vec<u8>, _>((from, to))
            .flat_map(|(_, keys)| keys.iter().cloned())
            .collect())
    }

    pub fn execute(&self, query: &IndexQuery) -> Result<HashSet<String>> {
        match &query.predicate {
            IndexPredicate::Equal { value } => self.query(&query.attribute, value),
            IndexPredicate::Range { from, to } => {
                self.range(&query.attribute, from.as_deref(), to.as_deref())
            }
        }
    }

    pub fn is_indexed(&self, attribute: &str) -> bool {
        self.indexes.contains_key(attribute)
    }

    /// Number of distinct values currently indexed for `attribute`.
    pub fn term_count(&self, attribute: &str) -> usize {
        self.indexes
            .get(attribute)
            .map(AttributeIndex::term_count)
            .unwrap_or(0)
    }

    pub fn clear(&mut self) {
        for index in self.indexes.values_mut() {
            index.clear();
        }
    }
}
