//! Link resolver.
//!
//! Converts raw stored records into logical records: forward-link fields are
//! looked up in their target collection and replaced by fully hydrated nested
//! records, back-link fields are derived by querying the owning collection.
//! Lookups batch per link field per call, one `$in` query over all ids
//! collected from the batch, so a page of records costs one round trip per
//! edge rather than one per record.
//!
//! Back-links are populated only for the top-level batch; nested levels
//! receive `Bson::Null`. That asymmetry is what terminates recursion when two
//! schemas reference each other.

use bson::{Bson, Document, doc};
use futures::{FutureExt, future::BoxFuture};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::{
    error::{DocLinkError, DocLinkResult},
    schema::{ContainerShape, FieldKind, Registry, Schema},
    store::{DocumentStore, FindSpec, RawRecord},
};

/// Hydrates raw store records into logical records against a bound registry.
#[derive(Debug, Clone)]
pub struct Hydrator {
    registry: Arc<Registry>,
    store: Arc<dyn DocumentStore>,
}

// Ids compare across integer widths: a stored Int32 and a queried Int64 of
// the same value are the same identity.
fn id_key(id: &Bson) -> String {
    match id {
        Bson::Int32(v) => v.to_string(),
        Bson::Int64(v) => v.to_string(),
        Bson::Double(v) if v.fract() == 0.0 => (*v as i64).to_string(),
        Bson::String(s) => format!("s:{s}"),
        Bson::ObjectId(oid) => oid.to_hex(),
        other => format!("{other:?}"),
    }
}

impl Hydrator {
    pub fn new(registry: Arc<Registry>, store: Arc<dyn DocumentStore>) -> Self {
        Self { registry, store }
    }

    /// Hydrates a single record.
    pub async fn hydrate(
        &self,
        schema_name: &str,
        record: RawRecord,
        top_level: bool,
    ) -> DocLinkResult<RawRecord> {
        let mut hydrated = self.hydrate_many(schema_name, vec![record], top_level).await?;
        // One in, one out.
        Ok(hydrated.remove(0))
    }

    /// Hydrates a batch of records, preserving input order.
    pub fn hydrate_many<'a>(
        &'a self,
        schema_name: &'a str,
        records: Vec<RawRecord>,
        top_level: bool,
    ) -> BoxFuture<'a, DocLinkResult<Vec<RawRecord>>> {
        async move {
            if records.is_empty() {
                return Ok(records);
            }
            let schema = self.registry.schema(schema_name)?.clone();
            let mut records = records;

            for field in schema.forward_links().cloned().collect::<Vec<_>>() {
                self.hydrate_forward(&schema, &field.name, &mut records).await?;
            }
            for field in schema.back_links().cloned().collect::<Vec<_>>() {
                if top_level {
                    self.hydrate_back(&schema, &field.name, &mut records).await?;
                } else {
                    for record in &mut records {
                        record.insert(field.alias.clone(), Bson::Null);
                    }
                }
            }
            Ok(records)
        }
        .boxed()
    }

    /// Resolves one forward-link field across the whole batch.
    async fn hydrate_forward(
        &self,
        schema: &Arc<Schema>,
        field_name: &str,
        records: &mut [RawRecord],
    ) -> DocLinkResult<()> {
        let field = schema
            .table()
            .field(field_name)
            .cloned()
            .ok_or_else(|| DocLinkError::PathResolution {
                type_name: schema.name().to_string(),
                attribute: field_name.to_string(),
            })?;
        let FieldKind::Link { target, store_name, .. } = &field.kind else {
            return Ok(());
        };
        let target_schema = self.registry.schema(target)?.clone();
        let identity = target_schema.identity().cloned().ok_or_else(|| {
            DocLinkError::SchemaValue(format!("schema {target} has no identity field"))
        })?;

        // Pull the stored values out first; the hydrated value replaces them
        // under the field's serde name.
        let stored: Vec<Option<Bson>> = records
            .iter_mut()
            .map(|r| r.remove(store_name))
            .collect();

        let mut ids: Vec<Bson> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();
        let mut collect = |id: &Bson| {
            if !matches!(id, Bson::Null) && seen.insert(id_key(id)) {
                ids.push(id.clone());
            }
        };
        for value in stored.iter().flatten() {
            match value {
                Bson::Array(items) => items.iter().for_each(&mut collect),
                Bson::Document(map) => map.values().for_each(&mut collect),
                scalar => collect(scalar),
            }
        }

        let mut referents: HashMap<String, RawRecord> = HashMap::new();
        if !ids.is_empty() {
            let predicate = doc! { identity.alias.as_str(): { "$in": ids } };
            let fetched = self
                .store
                .find(target_schema.collection(), predicate, FindSpec::default())
                .await?;
            let hydrated = self
                .hydrate_many(target_schema.name(), fetched, false)
                .await?;
            for record in hydrated {
                if let Some(id) = record.get(identity.alias.as_str()) {
                    referents.insert(id_key(id), record);
                }
            }
        }

        let resolve = |id: &Bson| -> DocLinkResult<Bson> {
            if matches!(id, Bson::Null) {
                return Ok(Bson::Null);
            }
            referents
                .get(&id_key(id))
                .cloned()
                .map(Bson::Document)
                .ok_or_else(|| DocLinkError::DanglingLink {
                    collection: target_schema.collection().to_string(),
                    id: format!("{id}"),
                })
        };

        for (record, value) in records.iter_mut().zip(stored) {
            let hydrated = match value {
                None | Some(Bson::Null) => Bson::Null,
                Some(Bson::Array(items)) => Bson::Array(
                    items.iter().map(&resolve).collect::<DocLinkResult<Vec<_>>>()?,
                ),
                Some(Bson::Document(map)) => {
                    let mut out = Document::new();
                    for (key, id) in &map {
                        out.insert(key.clone(), resolve(id)?);
                    }
                    Bson::Document(out)
                }
                Some(scalar) => resolve(&scalar)?,
            };
            record.insert(field.alias.clone(), hydrated);
        }
        Ok(())
    }

    /// Derives one back-link field for a top-level batch: a single query over
    /// the owning collection filtered by all batch identities, grouped back
    /// per record.
    async fn hydrate_back(
        &self,
        schema: &Arc<Schema>,
        field_name: &str,
        records: &mut [RawRecord],
    ) -> DocLinkResult<()> {
        let field = schema
            .table()
            .field(field_name)
            .cloned()
            .ok_or_else(|| DocLinkError::PathResolution {
                type_name: schema.name().to_string(),
                attribute: field_name.to_string(),
            })?;
        let FieldKind::BackLink { owner, owner_field } = &field.kind else {
            return Ok(());
        };
        let identity = schema.identity().cloned().ok_or_else(|| {
            DocLinkError::SchemaValue(format!(
                "schema {} declares a reverse view but no identity field",
                schema.name()
            ))
        })?;
        let owner_schema = self.registry.schema(owner)?.clone();
        let owner_link = owner_schema
            .table()
            .field(owner_field)
            .cloned()
            .ok_or_else(|| DocLinkError::PathResolution {
                type_name: owner_schema.name().to_string(),
                attribute: owner_field.to_string(),
            })?;
        let FieldKind::Link { store_name, .. } = &owner_link.kind else {
            return Err(DocLinkError::SchemaValue(format!(
                "{owner}.{owner_field} is not a forward link"
            )));
        };

        let ids: Vec<Bson> = records
            .iter()
            .filter_map(|r| r.get(identity.alias.as_str()).cloned())
            .filter(|id| !matches!(id, Bson::Null))
            .collect();
        if ids.is_empty() {
            for record in records.iter_mut() {
                record.insert(field.alias.clone(), Bson::Array(vec![]));
            }
            return Ok(());
        }

        let owner_identity_alias = owner_schema
            .identity()
            .map(|f| f.alias.clone())
            .unwrap_or_else(|| "_id".to_string());
        let spec = FindSpec {
            sort: doc! { owner_identity_alias: 1 },
            ..Default::default()
        };
        let predicate = doc! { store_name.as_str(): { "$in": ids } };
        let owners_raw = self
            .store
            .find(owner_schema.collection(), predicate, spec)
            .await?;

        // The stored link values drive the grouping; keep them before
        // hydration consumes the storage key.
        let membership: Vec<Vec<String>> = owners_raw
            .iter()
            .map(|raw| match raw.get(store_name.as_str()) {
                Some(Bson::Array(items)) => items.iter().map(id_key).collect(),
                Some(Bson::Document(map)) => map.values().map(id_key).collect(),
                Some(Bson::Null) | None => vec![],
                Some(scalar) => vec![id_key(scalar)],
            })
            .collect();
        let owners = self
            .hydrate_many(owner_schema.name(), owners_raw, false)
            .await?;

        for record in records.iter_mut() {
            let Some(id) = record.get(identity.alias.as_str()).cloned() else {
                record.insert(field.alias.clone(), Bson::Array(vec![]));
                continue;
            };
            let key = id_key(&id);
            let mine: Vec<Bson> = owners
                .iter()
                .zip(&membership)
                .filter(|(_, members)| members.contains(&key))
                .map(|(owner, _)| Bson::Document(owner.clone()))
                .collect();
            record.insert(field.alias.clone(), Bson::Array(mine));
        }
        Ok(())
    }
}
