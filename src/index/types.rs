use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexKind {
    /// Equality lookups only.
    Hash,
    /// Equality and range lookups, ordered by the encoded value's bytes.
    ///
    /// With the JSON attribute codec, numbers order as text (`10` sorts
    /// before `9`) and strings include their quotes. Callers needing
    /// numeric ranges should store fixed-width, zero-padded values.
    Sorted,
}

/// Configured at startup; one per indexed attribute name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDefinition {
    pub attribute: String,
    pub kind: IndexKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum IndexPredicate {
    Equal {
        value: Vec<u8>,
    },
    /// `from` is inclusive, `to` exclusive; a missing bound is open.
    Range {
        from: Option<Vec<u8>>,
        to: Option<Vec<u8>>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexQuery {
    pub attribute: String,
    pub predicate: IndexPredicate,
}

impl IndexQuery {
    pub fn equal(attribute: impl Into<String>, value: Vec<u8>) -> Self {
        Self {
            attribute: attribute.into(),
            predicate: IndexPredicate::Equal { value },
        }
    }

    pub fn range(
        attribute: impl Into<String>,
        from: Option<Vec<u8>>,
        to: Option<Vec<u8>>,
    ) -> Self {
        Self {
            attribute: attribute.into(),
            predicate: IndexPredicate::Range { from, to },
        }
    }
}
