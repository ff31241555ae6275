//! Write and delete engine.
//!
//! `save` turns a logical record back into its stored shape (links flattened
//! to ids, back-links stripped), allocates identity and advances the version
//! token, then issues a single store write. `delete` walks the reverse link
//! graph: cascade owners are recursively deleted depth-first, propagate
//! owners have their reference cleared and are re-saved, then the record
//! itself is removed.
//!
//! The sequence is ordered but not atomic: every store call is a single
//! atomic operation, the walk as a whole is not, and a hook failure aborts
//! the remaining steps while leaving completed ones applied.

use bson::{Bson, Document, doc};
use futures::{FutureExt, future::BoxFuture};
use std::sync::Arc;

use crate::{
    error::{DocLinkError, DocLinkResult},
    hydrate::Hydrator,
    ident::IdentityAllocator,
    schema::{CascadePolicy, ContainerShape, FieldKind, HookPoint, Registry, ReverseEdge, Schema},
    store::{DocumentStore, FindSpec, RawRecord},
};

/// Executes saves and cascading deletes against a bound registry.
#[derive(Debug, Clone)]
pub struct WriteEngine {
    registry: Arc<Registry>,
    store: Arc<dyn DocumentStore>,
    hydrator: Hydrator,
    allocator: IdentityAllocator,
}

impl WriteEngine {
    pub fn new(registry: Arc<Registry>, store: Arc<dyn DocumentStore>) -> Self {
        let hydrator = Hydrator::new(registry.clone(), store.clone());
        let allocator = IdentityAllocator::new(
            store.clone(),
            registry.options().counter_collection.clone(),
        );
        Self { registry, store, hydrator, allocator }
    }

    /// Persists a logical record and returns it with identity and version
    /// advanced.
    ///
    /// A fresh record (identity unset) is inserted with a newly allocated
    /// identity and a seeded version; an existing versioned record is
    /// replaced through a compare-and-swap on the loaded version, failing
    /// with [`DocLinkError::NotFound`] when the stored version moved
    /// underneath it; an existing unversioned record is upserted by identity.
    pub async fn save_record(
        &self,
        schema_name: &str,
        record: RawRecord,
    ) -> DocLinkResult<RawRecord> {
        let schema = self.registry.schema(schema_name)?.clone();
        let mut logical = self
            .registry
            .run_hooks(schema.name(), HookPoint::BeforeSave, record)
            .await?;
        let mut stored = self.flatten(&schema, logical.clone())?;

        let Some(identity) = schema.identity().cloned() else {
            self.store.insert_one(schema.collection(), stored).await?;
            return Ok(logical);
        };

        let current_id = stored
            .get(identity.alias.as_str())
            .cloned()
            .unwrap_or(Bson::Null);
        if matches!(current_id, Bson::Null) {
            // Fresh document: allocate, seed the version, insert.
            let allocated = self.allocator.allocate(&schema).await?;
            match &allocated {
                Some(id) => {
                    stored.insert(identity.alias.clone(), id.clone());
                    logical.insert(identity.alias.clone(), id.clone());
                }
                None => {
                    // The store assigns the opaque id itself.
                    stored.remove(identity.alias.as_str());
                }
            }
            if let Some((version, provider)) = schema.version() {
                let seeded = provider(None);
                stored.insert(version.alias.clone(), seeded.clone());
                logical.insert(version.alias.clone(), seeded);
            }
            let assigned = self.store.insert_one(schema.collection(), stored).await?;
            if allocated.is_none() {
                logical.insert(identity.alias.clone(), assigned);
            }
            return Ok(logical);
        }

        if let Some((version, provider)) = schema.version() {
            let loaded = stored
                .get(version.alias.as_str())
                .cloned()
                .unwrap_or(Bson::Null);
            let next = match &loaded {
                Bson::Null => provider(None),
                value => provider(Some(value)),
            };
            stored.insert(version.alias.clone(), next.clone());
            let predicate = doc! {
                identity.alias.as_str(): { "$eq": current_id.clone() },
                version.alias.as_str(): { "$eq": loaded },
            };
            let matched = self
                .store
                .update_one(schema.collection(), predicate, stored, false)
                .await?;
            if matched == 0 {
                return Err(DocLinkError::NotFound {
                    collection: schema.collection().to_string(),
                    key: format!("{current_id}"),
                });
            }
            logical.insert(version.alias.clone(), next);
        } else {
            let predicate = doc! { identity.alias.as_str(): { "$eq": current_id } };
            self.store
                .update_one(schema.collection(), predicate, stored, true)
                .await?;
        }
        Ok(logical)
    }

    /// Deletes a logical record, walking the reverse link graph first.
    ///
    /// Order per record: cascade owners (recursively, depth-first), then
    /// propagate owners (hooks, reference cleared, re-saved), then this
    /// record's own before-delete hooks, then its removal by identity.
    pub fn delete_record<'a>(
        &'a self,
        schema_name: &'a str,
        record: RawRecord,
    ) -> BoxFuture<'a, DocLinkResult<()>> {
        async move {
            let schema = self.registry.schema(schema_name)?.clone();
            let identity = schema.identity().cloned().ok_or_else(|| {
                DocLinkError::SchemaValue(format!(
                    "schema {} has no identity field and cannot be deleted by instance",
                    schema.name()
                ))
            })?;
            let id = record
                .get(identity.alias.as_str())
                .cloned()
                .unwrap_or(Bson::Null);
            if matches!(id, Bson::Null) {
                return Err(DocLinkError::SchemaValue(format!(
                    "cannot delete an unsaved {} instance",
                    schema.name()
                )));
            }

            let edges: Vec<ReverseEdge> =
                self.registry.reverse_edges(schema.name()).to_vec();

            for edge in edges.iter().filter(|e| e.policy == CascadePolicy::Cascade) {
                for owner in self.owners_of(edge, &id).await? {
                    self.delete_record(&edge.owner, owner).await?;
                }
            }

            for edge in edges.iter().filter(|e| e.policy == CascadePolicy::Propagate) {
                for owner in self.owners_of(edge, &id).await? {
                    let owner = self
                        .registry
                        .run_hooks(&edge.owner, HookPoint::BeforeDelete, owner)
                        .await?;
                    let cleared = clear_reference(owner, edge, &identity.alias, &id);
                    self.save_record(&edge.owner, cleared).await?;
                }
            }

            self.registry
                .run_hooks(schema.name(), HookPoint::BeforeDelete, record)
                .await?;
            self.store
                .delete_one(
                    schema.collection(),
                    doc! { identity.alias.as_str(): { "$eq": id } },
                )
                .await?;
            Ok(())
        }
        .boxed()
    }

    /// Fetches and hydrates the owners a reverse edge connects to `id`.
    ///
    /// Owners come back as nested-level records: their forward links are
    /// hydrated (hooks and re-saves see full instances), their own back-links
    /// stay null.
    async fn owners_of(&self, edge: &ReverseEdge, id: &Bson) -> DocLinkResult<Vec<RawRecord>> {
        let owner_schema = self.registry.schema(&edge.owner)?.clone();
        let predicate = doc! { edge.store_name.as_str(): { "$in": [id.clone()] } };
        let raw = self
            .store
            .find(owner_schema.collection(), predicate, FindSpec::default())
            .await?;
        self.hydrator
            .hydrate_many(owner_schema.name(), raw, false)
            .await
    }

    fn flatten(&self, schema: &Arc<Schema>, mut record: RawRecord) -> DocLinkResult<RawRecord> {
        for field in schema.forward_links().cloned().collect::<Vec<_>>() {
            let FieldKind::Link { target, store_name, .. } = &field.kind else {
                continue;
            };
            let target_schema = self.registry.schema(target)?;
            let identity_alias = target_schema
                .identity()
                .map(|f| f.alias.clone())
                .ok_or_else(|| {
                    DocLinkError::SchemaValue(format!("schema {target} has no identity field"))
                })?;
            let extract = |value: &Bson| -> DocLinkResult<Bson> {
                match value {
                    Bson::Null => Ok(Bson::Null),
                    Bson::Document(nested) => match nested.get(identity_alias.as_str()) {
                        Some(id) if !matches!(id, Bson::Null) => Ok(id.clone()),
                        _ => Err(DocLinkError::SchemaValue(format!(
                            "{}.{} references an unsaved {target} instance",
                            schema.name(),
                            field.name
                        ))),
                    },
                    // Already an id.
                    scalar => Ok(scalar.clone()),
                }
            };
            let flattened = match record.remove(field.alias.as_str()) {
                None | Some(Bson::Null) => Bson::Null,
                Some(value) => match field.shape {
                    ContainerShape::Scalar => extract(&value)?,
                    ContainerShape::Sequence => {
                        let Bson::Array(items) = value else {
                            return Err(DocLinkError::SchemaValue(format!(
                                "{}.{} must hold a sequence",
                                schema.name(),
                                field.name
                            )));
                        };
                        Bson::Array(
                            items.iter().map(&extract).collect::<DocLinkResult<Vec<_>>>()?,
                        )
                    }
                    ContainerShape::Mapping => {
                        let Bson::Document(map) = value else {
                            return Err(DocLinkError::SchemaValue(format!(
                                "{}.{} must hold a mapping",
                                schema.name(),
                                field.name
                            )));
                        };
                        let mut out = Document::new();
                        for (key, nested) in &map {
                            out.insert(key.clone(), extract(nested)?);
                        }
                        Bson::Document(out)
                    }
                },
            };
            record.insert(store_name.clone(), flattened);
        }
        for field in schema.back_links().cloned().collect::<Vec<_>>() {
            record.remove(field.alias.as_str());
        }
        Ok(record)
    }
}

/// Removes the deleted identity from an owner's hydrated link field: a
/// scalar reference becomes null, container references drop the matching
/// element. `identity_alias` is the deleted schema's identity key inside the
/// hydrated nested records.
fn clear_reference(
    mut owner: RawRecord,
    edge: &ReverseEdge,
    identity_alias: &str,
    id: &Bson,
) -> RawRecord {
    let refers_to = |value: &Bson| -> bool {
        match value {
            Bson::Document(nested) => nested.get(identity_alias) == Some(id),
            scalar => scalar == id,
        }
    };
    // Dispatch on the declared shape, not the value: a hydrated scalar link
    // is itself a document, and must become null rather than lose fields.
    let cleared = match owner.remove(edge.owner_field_alias.as_str()) {
        None | Some(Bson::Null) => Bson::Null,
        Some(value) => match edge.shape {
            ContainerShape::Scalar => {
                if refers_to(&value) { Bson::Null } else { value }
            }
            ContainerShape::Sequence => match value {
                Bson::Array(items) => Bson::Array(
                    items.into_iter().filter(|item| !refers_to(item)).collect(),
                ),
                other => other,
            },
            ContainerShape::Mapping => match value {
                Bson::Document(map) => Bson::Document(
                    map.into_iter()
                        .filter(|(_, item)| !refers_to(item))
                        .collect(),
                ),
                other => other,
            },
        },
    };
    owner.insert(edge.owner_field_alias.clone(), cleared);
    owner
}
