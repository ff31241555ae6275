//! Store collaborator abstraction.
//!
//! The mapper consumes the underlying document store through this narrow
//! contract: atomic single-record operations plus an atomic counter for
//! serial identity allocation. Concrete implementations (in-memory, MongoDB)
//! live in their own crates; the mapper itself holds no locks and no
//! connection pool.

use async_trait::async_trait;
use bson::{Bson, Document};
use std::fmt::Debug;

use crate::error::DocLinkResult;

/// A raw stored record: a mapping of storage-alias keys to scalars, arrays
/// or nested maps, plus the store's own opaque `_id` key.
pub type RawRecord = Document;

/// Compiled retrieval options passed alongside a predicate.
///
/// Produced from a [`Query`](crate::query::Query) by the predicate compiler;
/// all field references are storage-alias dotted paths.
#[derive(Debug, Clone, Default)]
pub struct FindSpec {
    /// Ordered sort keys: alias path mapped to `1` (ascending) or `-1`
    /// (descending).
    pub sort: Document,
    /// Number of records to skip.
    pub skip: Option<u64>,
    /// Maximum number of records to return.
    pub limit: Option<i64>,
    /// Optional inclusion projection keyed by alias paths.
    pub projection: Option<Document>,
}

/// Abstract interface to the document store.
///
/// Every method is a single atomic store operation; sequences of calls carry
/// no multi-record atomicity. Implementations must be thread-safe and
/// support concurrent access from multiple async tasks. Cancellation of an
/// in-flight call is delegated entirely to the implementation.
#[async_trait]
pub trait DocumentStore: Send + Sync + Debug {
    /// Inserts a record into a collection, creating the collection if
    /// needed, and returns the store-assigned opaque id.
    ///
    /// If the record already carries an `_id` key, the store keeps it.
    async fn insert_one(&self, collection: &str, record: RawRecord) -> DocLinkResult<Bson>;

    /// Returns all records matching the predicate, honoring the sort, skip,
    /// limit and projection of `spec`.
    async fn find(
        &self,
        collection: &str,
        predicate: RawRecord,
        spec: FindSpec,
    ) -> DocLinkResult<Vec<RawRecord>>;

    /// Returns the first record matching the predicate, or `None`.
    async fn find_one(
        &self,
        collection: &str,
        predicate: RawRecord,
    ) -> DocLinkResult<Option<RawRecord>>;

    /// Replaces the single record matching the predicate with `record` and
    /// returns the matched count.
    ///
    /// With `upsert` set, a zero-match replace inserts `record` instead (the
    /// returned count is still the matched count, i.e. zero).
    async fn update_one(
        &self,
        collection: &str,
        predicate: RawRecord,
        record: RawRecord,
        upsert: bool,
    ) -> DocLinkResult<u64>;

    /// Deletes the single record matching the predicate and returns the
    /// deleted count.
    async fn delete_one(&self, collection: &str, predicate: RawRecord) -> DocLinkResult<u64>;

    /// Counts the records matching the predicate.
    async fn count(&self, collection: &str, predicate: RawRecord) -> DocLinkResult<u64>;

    /// Atomically increments the named counter and returns the new value.
    ///
    /// The counter record lives in `counter_collection` under `name` and
    /// starts at 1 on first use. This must be a single atomic store
    /// operation, never an application-layer read-modify-write.
    async fn increment_and_fetch(
        &self,
        counter_collection: &str,
        name: &str,
    ) -> DocLinkResult<i64>;

    /// Ensures an index exists on the given alias path.
    async fn ensure_index(
        &self,
        collection: &str,
        field_path: &str,
        unique: bool,
    ) -> DocLinkResult<()>;
}
