//! MongoDB implementation of the mapper's store contract.

use async_trait::async_trait;
use bson::{Bson, Document, doc};
use futures::TryStreamExt;
use mongodb::{
    Client, Collection as MongoCollection, IndexModel,
    options::{ClientOptions, FindOptions, IndexOptions, ReturnDocument},
};

use doclink_core::{
    error::{DocLinkError, DocLinkResult},
    store::{DocumentStore, FindSpec, RawRecord},
};

/// Document store backed by a MongoDB database.
///
/// Every contract method maps to a single driver call, so the atomicity
/// guarantees are MongoDB's own: single-document operations are atomic, the
/// counter increment uses `findAndModify` with `$inc`.
#[derive(Debug, Clone)]
pub struct MongoStore {
    client: Client,
    database: String,
}

impl MongoStore {
    pub fn new(client: Client, database: String) -> Self {
        Self { client, database }
    }

    /// Connects to the given DSN and wraps the named database.
    pub async fn connect(dsn: &str, database: &str) -> DocLinkResult<Self> {
        let options = ClientOptions::parse(dsn)
            .await
            .map_err(|e| DocLinkError::Store(e.to_string()))?;
        let client =
            Client::with_options(options).map_err(|e| DocLinkError::Store(e.to_string()))?;
        Ok(Self::new(client, database.to_string()))
    }

    fn get_collection(&self, collection_name: &str) -> MongoCollection<Document> {
        self.client
            .database(&self.database)
            .collection(collection_name)
    }
}

#[async_trait]
impl DocumentStore for MongoStore {
    async fn insert_one(&self, collection: &str, record: RawRecord) -> DocLinkResult<Bson> {
        let result = self
            .get_collection(collection)
            .insert_one(record)
            .await
            .map_err(|e| DocLinkError::Store(e.to_string()))?;
        Ok(result.inserted_id)
    }

    async fn find(
        &self,
        collection: &str,
        predicate: RawRecord,
        spec: FindSpec,
    ) -> DocLinkResult<Vec<RawRecord>> {
        let mut options = FindOptions::default();
        if !spec.sort.is_empty() {
            options.sort = Some(spec.sort);
        }
        options.skip = spec.skip;
        options.limit = spec.limit;
        options.projection = spec.projection;

        Ok(self
            .get_collection(collection)
            .find(predicate)
            .with_options(options)
            .await
            .map_err(|e| DocLinkError::Store(e.to_string()))?
            .try_collect::<Vec<Document>>()
            .await
            .map_err(|e| DocLinkError::Store(e.to_string()))?)
    }

    async fn find_one(
        &self,
        collection: &str,
        predicate: RawRecord,
    ) -> DocLinkResult<Option<RawRecord>> {
        self.get_collection(collection)
            .find_one(predicate)
            .await
            .map_err(|e| DocLinkError::Store(e.to_string()))
    }

    async fn update_one(
        &self,
        collection: &str,
        predicate: RawRecord,
        record: RawRecord,
        upsert: bool,
    ) -> DocLinkResult<u64> {
        let result = self
            .get_collection(collection)
            .replace_one(predicate, record)
            .upsert(upsert)
            .await
            .map_err(|e| DocLinkError::Store(e.to_string()))?;
        Ok(result.matched_count)
    }

    async fn delete_one(&self, collection: &str, predicate: RawRecord) -> DocLinkResult<u64> {
        let result = self
            .get_collection(collection)
            .delete_one(predicate)
            .await
            .map_err(|e| DocLinkError::Store(e.to_string()))?;
        Ok(result.deleted_count)
    }

    async fn count(&self, collection: &str, predicate: RawRecord) -> DocLinkResult<u64> {
        self.get_collection(collection)
            .count_documents(predicate)
            .await
            .map_err(|e| DocLinkError::Store(e.to_string()))
    }

    async fn increment_and_fetch(
        &self,
        counter_collection: &str,
        name: &str,
    ) -> DocLinkResult<i64> {
        let updated = self
            .get_collection(counter_collection)
            .find_one_and_update(doc! { "_id": name }, doc! { "$inc": { "seq": 1i64 } })
            .upsert(true)
            .return_document(ReturnDocument::After)
            .await
            .map_err(|e| DocLinkError::Store(e.to_string()))?
            .ok_or_else(|| {
                DocLinkError::Store(format!("counter {name} missing after upsert"))
            })?;
        match updated.get("seq") {
            Some(Bson::Int64(v)) => Ok(*v),
            Some(Bson::Int32(v)) => Ok(i64::from(*v)),
            other => Err(DocLinkError::Store(format!(
                "counter {name} holds a non-integer sequence: {other:?}"
            ))),
        }
    }

    async fn ensure_index(
        &self,
        collection: &str,
        field_path: &str,
        unique: bool,
    ) -> DocLinkResult<()> {
        self.get_collection(collection)
            .create_index(
                IndexModel::builder()
                    .keys(doc! { field_path: 1 })
                    .options(IndexOptions::builder().unique(unique).build())
                    .build(),
            )
            .await
            .map_err(|e| DocLinkError::Store(e.to_string()))?;
        Ok(())
    }
}
