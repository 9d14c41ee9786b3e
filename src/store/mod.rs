//! Keyed document store consumed by the engine.
//!
//! The engine only relies on the capabilities declared by [`Store`]: point
//! reads, conditional single-item writes, all-or-nothing multi-item writes,
//! and partition queries (optionally through a secondary index) that are
//! paginated transparently. [`MemoryStore`] is the in-process implementation.

mod compactor;
mod memory;
mod value;
mod wal;

pub use compactor::{compact_if_needed, run_compactor};
pub use memory::MemoryStore;
pub use value::{from_item, to_item, AttrValue, Item};
pub use wal::Mutation;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Primary key of an item: partition value plus optional sort value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Key {
    pub partition: String,
    pub sort: Option<String>,
}

impl Key {
    pub fn new(partition: impl Into<String>) -> Self {
        Self { partition: partition.into(), sort: None }
    }

    pub fn composite(partition: impl Into<String>, sort: impl Into<String>) -> Self {
        Self { partition: partition.into(), sort: Some(sort.into()) }
    }
}

impl std::fmt::Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.sort {
            Some(sort) => write!(f, "{}/{}", self.partition, sort),
            None => f.write_str(&self.partition),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSchema {
    pub name: String,
    pub partition_key: String,
    pub sort_key: Option<String>,
}

impl IndexSchema {
    pub fn new(name: impl Into<String>, partition_key: impl Into<String>) -> Self {
        Self { name: name.into(), partition_key: partition_key.into(), sort_key: None }
    }

    pub fn with_sort_key(mut self, sort_key: impl Into<String>) -> Self {
        self.sort_key = Some(sort_key.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub name: String,
    pub partition_key: String,
    pub sort_key: Option<String>,
    pub indexes: Vec<IndexSchema>,
}

impl TableSchema {
    pub fn new(name: impl Into<String>, partition_key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            partition_key: partition_key.into(),
            sort_key: None,
            indexes: Vec::new(),
        }
    }

    pub fn with_sort_key(mut self, sort_key: impl Into<String>) -> Self {
        self.sort_key = Some(sort_key.into());
        self
    }

    pub fn with_index(mut self, index: IndexSchema) -> Self {
        self.indexes.push(index);
        self
    }

    /// Extract the primary key from an item's key attributes.
    pub fn key_of(&self, item: &Item) -> Result<Key, StoreError> {
        let partition = self.string_attr(item, &self.partition_key)?;
        let sort = match &self.sort_key {
            Some(name) => Some(self.string_attr(item, name)?),
            None => None,
        };
        Ok(Key { partition, sort })
    }

    /// The key attributes of `key` as an item, used when an update creates a record.
    pub fn key_item(&self, key: &Key) -> Item {
        let mut item = Item::new();
        item.insert(self.partition_key.clone(), AttrValue::Str(key.partition.clone()));
        if let (Some(name), Some(sort)) = (&self.sort_key, &key.sort) {
            item.insert(name.clone(), AttrValue::Str(sort.clone()));
        }
        item
    }

    pub fn is_key_attribute(&self, name: &str) -> bool {
        name == self.partition_key || self.sort_key.as_deref() == Some(name)
    }

    fn string_attr(&self, item: &Item, name: &str) -> Result<String, StoreError> {
        item.get(name)
            .and_then(AttrValue::as_str)
            .map(str::to_string)
            .ok_or_else(|| StoreError::MissingKey {
                table: self.name.clone(),
                attribute: name.to_string(),
            })
    }
}

/// Existence predicate attached to a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    /// The item must already exist.
    Exists,
    /// The item must not exist yet.
    NotExists,
}

impl Condition {
    pub fn holds(&self, exists: bool) -> bool {
        match self {
            Condition::Exists => exists,
            Condition::NotExists => !exists,
        }
    }
}

/// Attribute changes applied by [`Store::update`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Update {
    pub set: Item,
    pub remove: Vec<String>,
}

impl Update {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, name: impl Into<String>, value: impl Into<AttrValue>) -> Self {
        self.set.insert(name.into(), value.into());
        self
    }

    pub fn remove(mut self, name: impl Into<String>) -> Self {
        self.remove.push(name.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.remove.is_empty()
    }
}

/// One element of a transactional write.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    Put {
        table: String,
        item: Item,
        condition: Option<Condition>,
    },
    Update {
        table: String,
        key: Key,
        update: Update,
        condition: Option<Condition>,
    },
    Delete {
        table: String,
        key: Key,
        condition: Option<Condition>,
    },
    /// Assert a condition on an item without writing it.
    Check {
        table: String,
        key: Key,
        condition: Condition,
    },
}

impl WriteOp {
    pub fn table(&self) -> &str {
        match self {
            WriteOp::Put { table, .. }
            | WriteOp::Update { table, .. }
            | WriteOp::Delete { table, .. }
            | WriteOp::Check { table, .. } => table,
        }
    }
}

/// Condition on the sort attribute of a query (table sort key or index sort key).
#[derive(Debug, Clone, PartialEq)]
pub enum SortCondition {
    Equals(AttrValue),
    BeginsWith(String),
    LessThan(AttrValue),
    /// Inclusive on both ends.
    Between(AttrValue, AttrValue),
}

impl SortCondition {
    pub fn matches(&self, value: Option<&AttrValue>) -> bool {
        use std::cmp::Ordering::*;
        let Some(value) = value else { return false };
        match self {
            SortCondition::Equals(v) => value == v,
            SortCondition::BeginsWith(prefix) => {
                value.as_str().is_some_and(|s| s.starts_with(prefix.as_str()))
            }
            SortCondition::LessThan(v) => value.sort_cmp(v) == Some(Less),
            SortCondition::Between(lo, hi) => {
                matches!(value.sort_cmp(lo), Some(Greater | Equal))
                    && matches!(value.sort_cmp(hi), Some(Less | Equal))
            }
        }
    }
}

/// Partition query, optionally through a named secondary index.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub index: Option<String>,
    pub partition: AttrValue,
    pub sort: Option<SortCondition>,
    pub page_size: Option<usize>,
}

impl Query {
    pub fn partition(value: impl Into<AttrValue>) -> Self {
        Self { index: None, partition: value.into(), sort: None, page_size: None }
    }

    pub fn index(mut self, name: impl Into<String>) -> Self {
        self.index = Some(name.into());
        self
    }

    pub fn sort(mut self, condition: SortCondition) -> Self {
        self.sort = Some(condition);
        self
    }

    pub fn page_size(mut self, size: usize) -> Self {
        self.page_size = Some(size);
        self
    }
}

/// Resume point for a paged query: the last returned item's primary key and,
/// for index queries, its index sort value. Resuming does not need the item
/// itself to still exist.
#[derive(Debug, Clone, PartialEq)]
pub struct Cursor {
    pub key: Key,
    pub sort: Option<AttrValue>,
}

/// One page of query results. `last_key` is set while more results remain.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub items: Vec<Item>,
    pub last_key: Option<Cursor>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("conditional check failed on {table}/{key}")]
    ConditionFailed { table: String, key: Key },

    /// One entry per operation, in request order; `Some` names the failed check.
    #[error("transaction canceled: {}", format_reasons(.reasons))]
    TransactionCanceled { reasons: Vec<Option<String>> },

    #[error("unknown table: {0}")]
    UnknownTable(String),

    #[error("unknown index {index} on table {table}")]
    UnknownIndex { table: String, index: String },

    #[error("item in {table} is missing key attribute {attribute}")]
    MissingKey { table: String, attribute: String },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("WAL error: {0}")]
    Wal(String),
}

fn format_reasons(reasons: &[Option<String>]) -> String {
    let failed: Vec<&str> = reasons.iter().flatten().map(String::as_str).collect();
    if failed.is_empty() {
        "no reason given".to_string()
    } else {
        failed.join("; ")
    }
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn get(&self, table: &str, key: &Key) -> Result<Option<Item>, StoreError>;

    async fn put(
        &self,
        table: &str,
        item: Item,
        condition: Option<Condition>,
    ) -> Result<(), StoreError>;

    /// Apply `update` and return the item as written. Without a condition a
    /// missing item is created from its key.
    async fn update(
        &self,
        table: &str,
        key: &Key,
        update: Update,
        condition: Option<Condition>,
    ) -> Result<Item, StoreError>;

    /// Returns the removed item, if there was one.
    async fn delete(
        &self,
        table: &str,
        key: &Key,
        condition: Option<Condition>,
    ) -> Result<Option<Item>, StoreError>;

    /// All-or-nothing: either every op's condition holds and all writes land,
    /// or nothing is written and [`StoreError::TransactionCanceled`] is returned.
    async fn transact_write(&self, ops: Vec<WriteOp>) -> Result<(), StoreError>;

    async fn query_page(
        &self,
        table: &str,
        query: &Query,
        start_after: Option<&Cursor>,
    ) -> Result<Page, StoreError>;

    /// Run `query` to exhaustion, following pages.
    async fn query(&self, table: &str, query: &Query) -> Result<Vec<Item>, StoreError> {
        let mut items = Vec::new();
        let mut cursor: Option<Cursor> = None;
        loop {
            let page = self.query_page(table, query, cursor.as_ref()).await?;
            items.extend(page.items);
            match page.last_key {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }
        Ok(items)
    }
}
