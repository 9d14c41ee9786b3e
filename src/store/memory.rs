use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tracing::warn;

use crate::limits::{DEFAULT_QUERY_PAGE_SIZE, MAX_TRANSACT_ITEMS};

use super::wal::{wal_writer_loop, Mutation, Wal, WalCommand};
use super::{
    AttrValue, Condition, Cursor, Item, Key, Page, Query, Store, StoreError, TableSchema, Update,
    WriteOp,
};

pub type SharedTable = Arc<RwLock<Table>>;

#[derive(Debug)]
pub struct Table {
    schema: TableSchema,
    items: BTreeMap<Key, Item>,
}

impl Table {
    fn new(schema: TableSchema) -> Self {
        Self { schema, items: BTreeMap::new() }
    }

    fn apply(&mut self, mutation: Mutation) {
        match mutation {
            Mutation::Put { item, .. } => match self.schema.key_of(&item) {
                Ok(key) => {
                    self.items.insert(key, item);
                }
                Err(e) => warn!("skipping unkeyed item: {e}"),
            },
            Mutation::Delete { key, .. } => {
                self.items.remove(&key);
            }
            Mutation::Batch(ms) => {
                for m in ms {
                    self.apply(m);
                }
            }
        }
    }

    /// Attribute names a query partitions and sorts on.
    fn query_attributes(&self, query: &Query) -> Result<(String, Option<String>), StoreError> {
        match &query.index {
            None => Ok((self.schema.partition_key.clone(), self.schema.sort_key.clone())),
            Some(name) => self
                .schema
                .indexes
                .iter()
                .find(|idx| &idx.name == name)
                .map(|idx| (idx.partition_key.clone(), idx.sort_key.clone()))
                .ok_or_else(|| StoreError::UnknownIndex {
                    table: self.schema.name.clone(),
                    index: name.clone(),
                }),
        }
    }
}

/// In-process [`Store`]. Each table sits behind its own lock; transactional
/// writes lock every table they touch, in name order, before checking any
/// condition. With a WAL attached, every committed write is logged (one
/// entry per transaction) before it becomes visible.
pub struct MemoryStore {
    tables: DashMap<String, SharedTable>,
    wal_tx: Option<mpsc::Sender<WalCommand>>,
}

impl MemoryStore {
    /// Volatile store with the given tables.
    pub fn new(schemas: impl IntoIterator<Item = TableSchema>) -> Self {
        let tables = DashMap::new();
        for schema in schemas {
            tables.insert(schema.name.clone(), Arc::new(RwLock::new(Table::new(schema))));
        }
        Self { tables, wal_tx: None }
    }

    /// Durable store: replays the WAL at `wal_path`, then logs every write to it.
    /// Must be called inside a tokio runtime (spawns the WAL writer).
    pub fn open(
        wal_path: &Path,
        schemas: impl IntoIterator<Item = TableSchema>,
    ) -> Result<Self, StoreError> {
        let mutations = Wal::replay(wal_path).map_err(|e| StoreError::Wal(e.to_string()))?;

        let mut tables: HashMap<String, Table> = schemas
            .into_iter()
            .map(|schema| (schema.name.clone(), Table::new(schema)))
            .collect();
        let replayed = mutations.len();
        for mutation in mutations {
            for m in flatten(mutation) {
                let name = mutation_table(&m);
                match tables.get_mut(name) {
                    Some(table) => table.apply(m),
                    None => warn!("WAL references unknown table {name}; skipping"),
                }
            }
        }
        tracing::info!("replayed {replayed} WAL entries from {}", wal_path.display());

        let wal = Wal::open(wal_path).map_err(|e| StoreError::Wal(e.to_string()))?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        Ok(Self {
            tables: tables
                .into_iter()
                .map(|(name, table)| (name, Arc::new(RwLock::new(table))))
                .collect(),
            wal_tx: Some(wal_tx),
        })
    }

    fn table(&self, name: &str) -> Result<SharedTable, StoreError> {
        self.tables
            .get(name)
            .map(|e| e.value().clone())
            .ok_or_else(|| StoreError::UnknownTable(name.to_string()))
    }

    /// Number of items currently held in `table`.
    pub async fn len(&self, table: &str) -> Result<usize, StoreError> {
        Ok(self.table(table)?.read().await.items.len())
    }

    /// Write a mutation to the WAL via the group-commit writer. No-op when volatile.
    async fn wal_append(&self, mutation: Mutation) -> Result<(), StoreError> {
        let Some(wal_tx) = &self.wal_tx else { return Ok(()) };
        let (tx, rx) = oneshot::channel();
        wal_tx
            .send(WalCommand::Append { mutation, response: tx })
            .await
            .map_err(|_| StoreError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::Wal(e.to_string()))
    }

    /// Rewrite the WAL with one put per live item. Every table stays
    /// read-locked from the snapshot until the writer has swapped the log.
    pub async fn compact(&self) -> Result<(), StoreError> {
        let Some(wal_tx) = &self.wal_tx else { return Ok(()) };

        let names: BTreeSet<String> = self.tables.iter().map(|e| e.key().clone()).collect();
        let mut guards: Vec<OwnedRwLockReadGuard<Table>> = Vec::with_capacity(names.len());
        let mut mutations = Vec::new();
        for name in names {
            let guard = self.table(&name)?.read_owned().await;
            mutations.extend(guard.items.values().map(|item| Mutation::Put {
                table: name.clone(),
                item: item.clone(),
            }));
            guards.push(guard);
        }

        let (tx, rx) = oneshot::channel();
        wal_tx
            .send(WalCommand::Compact { mutations, response: tx })
            .await
            .map_err(|_| StoreError::Wal("WAL writer shut down".into()))?;
        let result = rx
            .await
            .map_err(|_| StoreError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::Wal(e.to_string()));
        drop(guards);
        result
    }

    pub async fn appends_since_compact(&self) -> u64 {
        let Some(wal_tx) = &self.wal_tx else { return 0 };
        let (tx, rx) = oneshot::channel();
        if wal_tx.send(WalCommand::AppendsSinceCompact { response: tx }).await.is_err() {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

fn flatten(mutation: Mutation) -> Vec<Mutation> {
    match mutation {
        Mutation::Batch(ms) => ms.into_iter().flat_map(flatten).collect(),
        other => vec![other],
    }
}

fn mutation_table(mutation: &Mutation) -> &str {
    match mutation {
        Mutation::Put { table, .. } | Mutation::Delete { table, .. } => table,
        Mutation::Batch(_) => "",
    }
}

/// Query result order: index sort value first (when present), then primary key.
fn result_order(
    a_sort: Option<&AttrValue>,
    a_key: &Key,
    b_sort: Option<&AttrValue>,
    b_key: &Key,
) -> Ordering {
    let by_sort = match (a_sort, b_sort) {
        (Some(x), Some(y)) => x.sort_cmp(y).unwrap_or(Ordering::Equal),
        _ => Ordering::Equal,
    };
    by_sort.then_with(|| a_key.cmp(b_key))
}

fn condition_failed(table: &Table, key: &Key) -> StoreError {
    StoreError::ConditionFailed { table: table.schema.name.clone(), key: key.clone() }
}

/// Merge `update` into the current item (or a fresh one built from the key).
fn apply_update(table: &Table, key: &Key, update: &Update) -> Result<Item, StoreError> {
    if let Some(name) = update
        .set
        .keys()
        .chain(update.remove.iter())
        .find(|name| table.schema.is_key_attribute(name))
    {
        return Err(StoreError::InvalidRequest(format!("cannot update key attribute {name}")));
    }
    let mut item = table
        .items
        .get(key)
        .cloned()
        .unwrap_or_else(|| table.schema.key_item(key));
    for (name, value) in &update.set {
        item.insert(name.clone(), value.clone());
    }
    for name in &update.remove {
        item.remove(name);
    }
    Ok(item)
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, table: &str, key: &Key) -> Result<Option<Item>, StoreError> {
        let table = self.table(table)?;
        let guard = table.read().await;
        Ok(guard.items.get(key).cloned())
    }

    async fn put(
        &self,
        table: &str,
        item: Item,
        condition: Option<Condition>,
    ) -> Result<(), StoreError> {
        let shared = self.table(table)?;
        let mut guard = shared.write().await;
        let key = guard.schema.key_of(&item)?;
        if let Some(condition) = condition
            && !condition.holds(guard.items.contains_key(&key))
        {
            return Err(condition_failed(&guard, &key));
        }
        self.wal_append(Mutation::Put { table: table.to_string(), item: item.clone() }).await?;
        guard.items.insert(key, item);
        Ok(())
    }

    async fn update(
        &self,
        table: &str,
        key: &Key,
        update: Update,
        condition: Option<Condition>,
    ) -> Result<Item, StoreError> {
        let shared = self.table(table)?;
        let mut guard = shared.write().await;
        if let Some(condition) = condition
            && !condition.holds(guard.items.contains_key(key))
        {
            return Err(condition_failed(&guard, key));
        }
        let item = apply_update(&guard, key, &update)?;
        self.wal_append(Mutation::Put { table: table.to_string(), item: item.clone() }).await?;
        guard.items.insert(key.clone(), item.clone());
        Ok(item)
    }

    async fn delete(
        &self,
        table: &str,
        key: &Key,
        condition: Option<Condition>,
    ) -> Result<Option<Item>, StoreError> {
        let shared = self.table(table)?;
        let mut guard = shared.write().await;
        let exists = guard.items.contains_key(key);
        if let Some(condition) = condition
            && !condition.holds(exists)
        {
            return Err(condition_failed(&guard, key));
        }
        if !exists {
            return Ok(None);
        }
        self.wal_append(Mutation::Delete { table: table.to_string(), key: key.clone() }).await?;
        Ok(guard.items.remove(key))
    }

    async fn transact_write(&self, ops: Vec<WriteOp>) -> Result<(), StoreError> {
        if ops.is_empty() {
            return Err(StoreError::InvalidRequest("empty transaction".into()));
        }
        if ops.len() > MAX_TRANSACT_ITEMS {
            return Err(StoreError::InvalidRequest(format!(
                "transaction has {} operations; limit is {MAX_TRANSACT_ITEMS}",
                ops.len()
            )));
        }

        // Acquire write locks in sorted order to prevent deadlocks.
        let names: BTreeSet<String> = ops.iter().map(|op| op.table().to_string()).collect();
        let mut guards: HashMap<String, OwnedRwLockWriteGuard<Table>> = HashMap::new();
        for name in names {
            let guard = self.table(&name)?.write_owned().await;
            guards.insert(name, guard);
        }

        // Phase 1: resolve keys, reject duplicate targets, evaluate every condition.
        let mut targets: Vec<Key> = Vec::with_capacity(ops.len());
        let mut seen = HashSet::new();
        for op in &ops {
            let table = &guards[op.table()];
            let key = match op {
                WriteOp::Put { item, .. } => table.schema.key_of(item)?,
                WriteOp::Update { key, .. }
                | WriteOp::Delete { key, .. }
                | WriteOp::Check { key, .. } => key.clone(),
            };
            if !seen.insert((op.table(), key.clone())) {
                return Err(StoreError::InvalidRequest(format!(
                    "transaction touches {}/{key} more than once",
                    op.table()
                )));
            }
            targets.push(key);
        }

        let mut reasons = Vec::with_capacity(ops.len());
        for (op, key) in ops.iter().zip(&targets) {
            let table = &guards[op.table()];
            let condition = match op {
                WriteOp::Put { condition, .. }
                | WriteOp::Update { condition, .. }
                | WriteOp::Delete { condition, .. } => *condition,
                WriteOp::Check { condition, .. } => Some(*condition),
            };
            let exists = table.items.contains_key(key);
            reasons.push(match condition {
                Some(c) if !c.holds(exists) => Some(match c {
                    Condition::Exists => format!("item missing: {}/{key}", op.table()),
                    Condition::NotExists => format!("item exists: {}/{key}", op.table()),
                }),
                _ => None,
            });
        }
        if reasons.iter().any(Option::is_some) {
            return Err(StoreError::TransactionCanceled { reasons });
        }

        // Phase 2: all conditions hold. Build the mutations, log once, apply.
        let mut mutations = Vec::with_capacity(ops.len());
        for (op, key) in ops.into_iter().zip(targets) {
            match op {
                WriteOp::Put { table, item, .. } => mutations.push(Mutation::Put { table, item }),
                WriteOp::Update { table, update, .. } => {
                    let item = apply_update(&guards[table.as_str()], &key, &update)?;
                    mutations.push(Mutation::Put { table, item });
                }
                WriteOp::Delete { table, .. } => mutations.push(Mutation::Delete { table, key }),
                WriteOp::Check { .. } => {}
            }
        }
        self.wal_append(Mutation::Batch(mutations.clone())).await?;
        for mutation in mutations {
            if let Some(guard) = guards.get_mut(mutation_table(&mutation)) {
                guard.apply(mutation);
            }
        }
        Ok(())
    }

    async fn query_page(
        &self,
        table: &str,
        query: &Query,
        start_after: Option<&Cursor>,
    ) -> Result<Page, StoreError> {
        let shared = self.table(table)?;
        let guard = shared.read().await;
        let (partition_attr, sort_attr) = guard.query_attributes(query)?;

        let mut hits: Vec<(&Key, &Item)> = guard
            .items
            .iter()
            .filter(|(_, item)| item.get(&partition_attr) == Some(&query.partition))
            .filter(|(_, item)| match (&query.sort, &sort_attr) {
                (None, _) => true,
                (Some(cond), Some(attr)) => cond.matches(item.get(attr)),
                (Some(_), None) => false,
            })
            .collect();

        // Index results are ordered by the index sort key; ties (and base-table
        // results) fall back to primary-key order.
        let index_sort = if query.index.is_some() { sort_attr.as_deref() } else { None };
        let sort_of = |item: &Item| index_sort.and_then(|attr| item.get(attr)).cloned();
        hits.sort_by(|(ka, a), (kb, b)| {
            result_order(sort_of(a).as_ref(), ka, sort_of(b).as_ref(), kb)
        });

        // Resume strictly after the cursor's position, whether or not the
        // cursor item is still there.
        let start = match start_after {
            Some(cursor) => hits.partition_point(|(k, item)| {
                result_order(sort_of(item).as_ref(), k, cursor.sort.as_ref(), &cursor.key)
                    != Ordering::Greater
            }),
            None => 0,
        };
        let page_size = query.page_size.unwrap_or(DEFAULT_QUERY_PAGE_SIZE).max(1);
        let end = (start + page_size).min(hits.len());

        let items: Vec<Item> = hits[start..end].iter().map(|(_, item)| (*item).clone()).collect();
        let last_key = if end < hits.len() {
            let (key, item) = hits[end - 1];
            Some(Cursor { key: key.clone(), sort: sort_of(item) })
        } else {
            None
        };
        Ok(Page { items, last_key })
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("tables", &self.tables.len())
            .field("durable", &self.wal_tx.is_some())
            .finish()
    }
}
