//! Entity store data model: keys, entities, queries and delete results.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Identifier part of a key: a store-allocated number or a caller-chosen name.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EntityId {
    Id(i64),
    Name(String),
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{id}"),
            Self::Name(name) => f.write_str(name),
        }
    }
}

impl From<i64> for EntityId {
    fn from(id: i64) -> Self {
        Self::Id(id)
    }
}

impl From<&str> for EntityId {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

/// Key of an entity within a kind.
///
/// A key without an id is incomplete; saving an entity with an incomplete
/// key makes the store allocate a numeric id.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Key {
    pub kind: String,
    pub id: Option<EntityId>,
}

impl Key {
    /// Incomplete key of `kind`.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: None,
        }
    }

    /// Key with a numeric id.
    pub fn id(kind: impl Into<String>, id: i64) -> Self {
        Self {
            kind: kind.into(),
            id: Some(EntityId::Id(id)),
        }
    }

    /// Key with a string name.
    pub fn name(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: Some(EntityId::Name(name.into())),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.id.is_some()
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.id {
            Some(id) => write!(f, "{}:{}", self.kind, id),
            None => write!(f, "{}:<incomplete>", self.kind),
        }
    }
}

/// A stored row: key plus a flat map of properties.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub key: Key,
    pub data: Map<String, Value>,
    /// Properties that are stored but not indexed.
    #[serde(default)]
    pub exclude_from_indexes: Vec<String>,
}

impl Entity {
    pub fn new(key: Key, data: Map<String, Value>) -> Self {
        Self {
            key,
            data,
            exclude_from_indexes: Vec::new(),
        }
    }

    /// Get a property.
    pub fn get(&self, property: &str) -> Option<&Value> {
        self.data.get(property)
    }

    /// Number of index rows this entity occupies: the built-in key index
    /// plus one per indexed property.
    pub fn index_entries(&self) -> i64 {
        let indexed = self
            .data
            .keys()
            .filter(|p| !self.exclude_from_indexes.iter().any(|e| e == *p))
            .count();
        1 + indexed as i64
    }
}

/// Equality-filtered query over one kind.
#[derive(Clone, Debug, PartialEq)]
pub struct Query {
    pub kind: String,
    pub filters: Vec<(String, Value)>,
}

impl Query {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            filters: Vec::new(),
        }
    }

    /// Add an equality filter on a property.
    pub fn filter(mut self, property: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push((property.into(), value.into()));
        self
    }

    /// Whether an entity satisfies every filter of this query.
    pub fn matches(&self, entity: &Entity) -> bool {
        entity.key.kind == self.kind
            && self
                .filters
                .iter()
                .all(|(property, value)| entity.data.get(property) == Some(value))
    }
}

/// Outcome of a delete as reported by the store.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeleteResult {
    /// Index rows removed by the delete; zero when nothing was deleted.
    pub index_updates: i64,
}

/// Name index row projected to `{id, name}`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NameIndexEntry {
    pub id: EntityId,
    pub name: String,
}
