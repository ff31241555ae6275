//! Identity allocation strategies.

use bson::Bson;
use std::sync::Arc;

use crate::{
    error::DocLinkResult,
    schema::{FieldKind, IdentityKind, Schema},
    store::DocumentStore,
};

/// Allocates identities for fresh documents.
///
/// Serial identities come from a named counter record in the store,
/// incremented and fetched in one atomic operation, producing a dense
/// sequence from 1 that stays collision-free under concurrent writers.
/// Store-native identities are left to the store: the insert assigns them.
#[derive(Debug, Clone)]
pub struct IdentityAllocator {
    store: Arc<dyn DocumentStore>,
    counter_collection: String,
}

impl IdentityAllocator {
    pub fn new(store: Arc<dyn DocumentStore>, counter_collection: String) -> Self {
        Self { store, counter_collection }
    }

    /// Returns the allocated identity, or `None` when allocation is
    /// delegated to the store.
    pub async fn allocate(&self, schema: &Schema) -> DocLinkResult<Option<Bson>> {
        let Some(identity) = schema.identity() else {
            return Ok(None);
        };
        if matches!(identity.kind, FieldKind::Identity(IdentityKind::Serial)) {
            let next = self
                .store
                .increment_and_fetch(&self.counter_collection, schema.collection())
                .await?;
            Ok(Some(Bson::Int64(next)))
        } else {
            Ok(None)
        }
    }
}
