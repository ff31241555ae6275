//! In-memory storage implementation of the mapper's store contract.
//!
//! Collections are vectors of BSON documents behind an async-aware
//! read-write lock, preserving insertion order. Counters are ordinary
//! records in whatever counter collection the caller names; the increment
//! happens entirely under the write lock, which is what makes it a single
//! atomic store operation here.

use async_trait::async_trait;
use bson::{Bson, doc, oid::ObjectId};
use mea::rwlock::RwLock;
use std::{collections::HashMap, sync::Arc};

use doclink_core::{
    error::{DocLinkError, DocLinkResult},
    store::{DocumentStore, FindSpec, RawRecord},
};

use crate::evaluator::{compare_records, matches};

type StoreMap = HashMap<String, Vec<RawRecord>>;

/// Thread-safe in-memory document store.
///
/// Cloneable; clones share the same underlying data. Every query scans the
/// collection, so this store is meant for tests and small datasets, not
/// production volumes.
///
/// # Example
///
/// ```ignore
/// use doclink_memory::InMemoryStore;
/// use bson::doc;
///
/// # async fn example() -> doclink_core::error::DocLinkResult<()> {
/// let store = InMemoryStore::new();
/// store.insert_one("users", doc! { "name": "Alice" }).await?;
/// # Ok(()) }
/// ```
#[derive(Default, Clone, Debug)]
pub struct InMemoryStore {
    collections: Arc<RwLock<StoreMap>>,
}

impl InMemoryStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn insert_one(&self, collection: &str, record: RawRecord) -> DocLinkResult<Bson> {
        let mut collections = self.collections.write().await;
        let records = collections.entry(collection.to_string()).or_default();
        let mut record = record;
        let id = match record.get("_id") {
            Some(id) if !matches!(id, Bson::Null) => id.clone(),
            _ => {
                let id = Bson::ObjectId(ObjectId::new());
                record.insert("_id", id.clone());
                id
            }
        };
        records.push(record);
        Ok(id)
    }

    async fn find(
        &self,
        collection: &str,
        predicate: RawRecord,
        spec: FindSpec,
    ) -> DocLinkResult<Vec<RawRecord>> {
        let collections = self.collections.read().await;
        let Some(records) = collections.get(collection) else {
            return Ok(vec![]);
        };
        let mut found = records
            .iter()
            .filter_map(|record| match matches(record, &predicate) {
                Ok(true) => Some(Ok(record.clone())),
                Ok(false) => None,
                Err(e) => Some(Err(e)),
            })
            .collect::<DocLinkResult<Vec<_>>>()?;
        if !spec.sort.is_empty() {
            found.sort_by(|a, b| compare_records(a, b, &spec.sort));
        }
        let skipped = spec.skip.unwrap_or(0) as usize;
        let limit = match spec.limit {
            Some(n) if n > 0 => n as usize,
            _ => usize::MAX,
        };
        let mut page: Vec<RawRecord> =
            found.into_iter().skip(skipped).take(limit).collect();
        if let Some(projection) = &spec.projection {
            for record in &mut page {
                let kept: Vec<String> = record
                    .keys()
                    .filter(|key| *key == "_id" || projection.contains_key(key.as_str()))
                    .cloned()
                    .collect();
                let mut projected = RawRecord::new();
                for key in kept {
                    if let Some(value) = record.get(&key) {
                        projected.insert(key.clone(), value.clone());
                    }
                }
                *record = projected;
            }
        }
        Ok(page)
    }

    async fn find_one(
        &self,
        collection: &str,
        predicate: RawRecord,
    ) -> DocLinkResult<Option<RawRecord>> {
        let collections = self.collections.read().await;
        let Some(records) = collections.get(collection) else {
            return Ok(None);
        };
        for record in records {
            if matches(record, &predicate)? {
                return Ok(Some(record.clone()));
            }
        }
        Ok(None)
    }

    async fn update_one(
        &self,
        collection: &str,
        predicate: RawRecord,
        record: RawRecord,
        upsert: bool,
    ) -> DocLinkResult<u64> {
        let mut collections = self.collections.write().await;
        let records = collections.entry(collection.to_string()).or_default();
        for existing in records.iter_mut() {
            if matches(existing, &predicate)? {
                let mut replacement = record;
                // The opaque store key survives a replace.
                if !replacement.contains_key("_id") {
                    if let Some(id) = existing.get("_id") {
                        replacement.insert("_id", id.clone());
                    }
                }
                *existing = replacement;
                return Ok(1);
            }
        }
        if upsert {
            let mut inserted = record;
            if !inserted.contains_key("_id") {
                inserted.insert("_id", Bson::ObjectId(ObjectId::new()));
            }
            records.push(inserted);
        }
        Ok(0)
    }

    async fn delete_one(&self, collection: &str, predicate: RawRecord) -> DocLinkResult<u64> {
        let mut collections = self.collections.write().await;
        let Some(records) = collections.get_mut(collection) else {
            return Ok(0);
        };
        let mut found = None;
        for (index, record) in records.iter().enumerate() {
            if matches(record, &predicate)? {
                found = Some(index);
                break;
            }
        }
        match found {
            Some(index) => {
                records.remove(index);
                Ok(1)
            }
            None => Ok(0),
        }
    }

    async fn count(&self, collection: &str, predicate: RawRecord) -> DocLinkResult<u64> {
        let collections = self.collections.read().await;
        let Some(records) = collections.get(collection) else {
            return Ok(0);
        };
        let mut total = 0u64;
        for record in records {
            if matches(record, &predicate)? {
                total += 1;
            }
        }
        Ok(total)
    }

    async fn increment_and_fetch(
        &self,
        counter_collection: &str,
        name: &str,
    ) -> DocLinkResult<i64> {
        let mut collections = self.collections.write().await;
        let records = collections
            .entry(counter_collection.to_string())
            .or_default();
        for record in records.iter_mut() {
            if record.get("_id") == Some(&Bson::String(name.to_string())) {
                let next = match record.get("seq") {
                    Some(Bson::Int64(v)) => v + 1,
                    Some(Bson::Int32(v)) => i64::from(*v) + 1,
                    other => {
                        return Err(DocLinkError::Store(format!(
                            "counter {name} holds a non-integer sequence: {other:?}"
                        )));
                    }
                };
                record.insert("seq", Bson::Int64(next));
                return Ok(next);
            }
        }
        records.push(doc! { "_id": name, "seq": 1i64 });
        Ok(1)
    }

    async fn ensure_index(
        &self,
        _collection: &str,
        _field_path: &str,
        _unique: bool,
    ) -> DocLinkResult<()> {
        // No indexing in memory; scans do the work.
        Ok(())
    }
}
