//! Engine binding and the typed caller surface.
//!
//! An [`Engine`] is built once per store: document types, embedded types and
//! hooks are registered on the [`EngineBuilder`], then `bind()` compiles them
//! into the immutable registry and `init()` ensures declared indexes exist.
//! Per-type access goes through [`Mapped`], a typed handle in the manner of a
//! typed collection: it converts between instances and logical records at the
//! boundary and delegates to the hydrator and write engine.
//!
//! # Example
//!
//! ```ignore
//! use doclink::prelude::*;
//!
//! # async fn example(store: std::sync::Arc<dyn doclink::DocumentStore>) -> DocLinkResult<()> {
//! let engine = Engine::builder(store)
//!     .schema::<Department>()
//!     .schema::<User>()
//!     .bind()?;
//! engine.init().await?;
//!
//! let users = engine.collection::<User>()?;
//! let alice = users.save(User { id: None, name: "Alice".into(), department: None }).await?;
//! let found = users.get(alice.id).await?;
//! # Ok(()) }
//! ```

use bson::{Bson, doc};
use futures::FutureExt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::{
    document::{Document, DocumentExt},
    error::{DocLinkError, DocLinkResult},
    hydrate::Hydrator,
    path::FieldPath,
    query::{Predicate, Query},
    schema::{
        BindOptions, EmbeddedDecl, HookPoint, RecordHook, Registry, Schema, SchemaDecl,
    },
    store::{DocumentStore, RawRecord},
    write::WriteEngine,
};

/// Accumulates declarations before the two-phase bind.
pub struct EngineBuilder {
    store: Arc<dyn DocumentStore>,
    decls: Vec<SchemaDecl>,
    embedded: Vec<EmbeddedDecl>,
    hooks: Vec<(String, HookPoint, RecordHook)>,
    options: BindOptions,
}

impl EngineBuilder {
    /// Registers a document type. Order does not matter; links and
    /// back-links resolve at bind time.
    pub fn schema<D: Document>(mut self) -> Self {
        self.decls.push(D::declaration());
        self
    }

    /// Registers an embedded (non-document) type for path traversal.
    pub fn embedded(mut self, decl: EmbeddedDecl) -> Self {
        self.embedded.push(decl);
        self
    }

    /// Registers a typed before-save hook for `D`, appended to the chain in
    /// registration order.
    pub fn before_save<D, F, Fut>(self, hook: F) -> Self
    where
        D: Document,
        F: Fn(D) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = DocLinkResult<D>> + Send + 'static,
    {
        self.hook::<D, F, Fut>(HookPoint::BeforeSave, hook)
    }

    /// Registers a typed before-delete hook for `D`, appended to the chain
    /// in registration order.
    ///
    /// The hook also fires when a propagated reference held by a `D`
    /// instance is about to be cleared, not only when the instance itself is
    /// deleted.
    pub fn before_delete<D, F, Fut>(self, hook: F) -> Self
    where
        D: Document,
        F: Fn(D) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = DocLinkResult<D>> + Send + 'static,
    {
        self.hook::<D, F, Fut>(HookPoint::BeforeDelete, hook)
    }

    /// Overrides the bind-time naming options.
    pub fn options(mut self, options: BindOptions) -> Self {
        self.options = options;
        self
    }

    fn hook<D, F, Fut>(mut self, point: HookPoint, hook: F) -> Self
    where
        D: Document,
        F: Fn(D) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = DocLinkResult<D>> + Send + 'static,
    {
        let hook = Arc::new(hook);
        let record_hook: RecordHook = Arc::new(move |record: RawRecord| {
            let hook = hook.clone();
            async move {
                let instance = D::from_record(record)?;
                let instance = hook(instance).await?;
                instance.to_record()
            }
            .boxed()
        });
        self.hooks
            .push((D::schema_name().to_string(), point, record_hook));
        self
    }

    /// Compiles all declarations into an engine.
    ///
    /// # Errors
    ///
    /// Returns [`DocLinkError::SchemaValue`] when a declaration is invalid
    /// or a cross-reference never resolves.
    pub fn bind(self) -> DocLinkResult<Engine> {
        let registry = Arc::new(Registry::build(
            self.decls,
            self.embedded,
            self.hooks,
            self.options,
        )?);
        let hydrator = Hydrator::new(registry.clone(), self.store.clone());
        let writer = WriteEngine::new(registry.clone(), self.store.clone());
        Ok(Engine { registry, store: self.store, hydrator, writer })
    }
}

/// A bound mapper over one store.
#[derive(Debug)]
pub struct Engine {
    registry: Arc<Registry>,
    store: Arc<dyn DocumentStore>,
    hydrator: Hydrator,
    writer: WriteEngine,
}

impl Engine {
    /// Starts building an engine over the given store.
    pub fn builder(store: Arc<dyn DocumentStore>) -> EngineBuilder {
        EngineBuilder {
            store,
            decls: Vec::new(),
            embedded: Vec::new(),
            hooks: Vec::new(),
            options: BindOptions::default(),
        }
    }

    /// Ensures every index the bound schemas declare exists in the store.
    pub async fn init(&self) -> DocLinkResult<()> {
        for schema in self.registry.schemas() {
            for (path, unique) in schema.required_indexes() {
                self.store
                    .ensure_index(schema.collection(), &path, unique)
                    .await?;
            }
        }
        Ok(())
    }

    /// The compiled registry.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Starts a field path rooted at `D`.
    pub fn path<D: Document>(&self) -> DocLinkResult<FieldPath> {
        self.registry.path(D::schema_name())
    }

    /// Returns the typed handle for `D`.
    ///
    /// # Errors
    ///
    /// Returns [`DocLinkError::SchemaValue`] when `D` was not registered on
    /// the builder.
    pub fn collection<D: Document>(&self) -> DocLinkResult<Mapped<'_, D>> {
        let schema = self.registry.schema(D::schema_name())?.clone();
        Ok(Mapped { engine: self, schema, _marker: PhantomData })
    }
}

/// Typed access to one mapped document type.
#[derive(Debug)]
pub struct Mapped<'e, D: Document> {
    engine: &'e Engine,
    schema: Arc<Schema>,
    _marker: PhantomData<D>,
}

impl<D: Document> Mapped<'_, D> {
    /// The storage collection this type maps to.
    pub fn collection_name(&self) -> &str {
        self.schema.collection()
    }

    /// Persists `document` and returns it with identity and version
    /// advanced.
    ///
    /// # Errors
    ///
    /// Returns [`DocLinkError::NotFound`] when a versioned save loses the
    /// compare-and-swap against a concurrent writer.
    pub async fn save(&self, document: D) -> DocLinkResult<D> {
        let record = document.to_record()?;
        let saved = self
            .engine
            .writer
            .save_record(self.schema.name(), record)
            .await?;
        D::from_record(saved)
    }

    /// Deletes `document`, cascading through the reverse link graph first.
    pub async fn delete(&self, document: &D) -> DocLinkResult<()> {
        let record = document.to_record()?;
        self.engine
            .writer
            .delete_record(self.schema.name(), record)
            .await
    }

    /// Returns all matching instances, hydrated.
    pub async fn find(&self, query: impl Into<Query> + Send) -> DocLinkResult<Vec<D>> {
        let (predicate, spec) = query.into().compile();
        let raw = self
            .engine
            .store
            .find(self.schema.collection(), predicate, spec)
            .await?;
        let hydrated = self
            .engine
            .hydrator
            .hydrate_many(self.schema.name(), raw, true)
            .await?;
        hydrated.into_iter().map(D::from_record).collect()
    }

    /// Returns the first matching instance.
    ///
    /// # Errors
    ///
    /// Returns [`DocLinkError::NotFound`] when nothing matches.
    pub async fn find_one(&self, query: impl Into<Query> + Send) -> DocLinkResult<D> {
        let query = query.into();
        let predicate = query.compile_predicate();
        let rendered = format!("{predicate}");
        self.find_one_or_none(query).await?.ok_or_else(|| {
            DocLinkError::NotFound {
                collection: self.schema.collection().to_string(),
                key: rendered,
            }
        })
    }

    /// Returns the first matching instance, or `None`.
    pub async fn find_one_or_none(
        &self,
        query: impl Into<Query> + Send,
    ) -> DocLinkResult<Option<D>> {
        let predicate = query.into().compile_predicate();
        let Some(raw) = self
            .engine
            .store
            .find_one(self.schema.collection(), predicate)
            .await?
        else {
            return Ok(None);
        };
        let hydrated = self
            .engine
            .hydrator
            .hydrate(self.schema.name(), raw, true)
            .await?;
        Ok(Some(D::from_record(hydrated)?))
    }

    /// Loads an instance by its declared identity.
    ///
    /// # Errors
    ///
    /// Returns [`DocLinkError::NotFound`] when the identity does not exist.
    pub async fn get(&self, id: impl Into<Bson> + Send) -> DocLinkResult<D> {
        let identity = self.schema.identity().ok_or_else(|| {
            DocLinkError::SchemaValue(format!(
                "schema {} has no identity field",
                self.schema.name()
            ))
        })?;
        let id = id.into();
        let rendered = format!("{id}");
        let predicate = doc! { identity.alias.as_str(): { "$eq": id } };
        let Some(raw) = self
            .engine
            .store
            .find_one(self.schema.collection(), predicate)
            .await?
        else {
            return Err(DocLinkError::NotFound {
                collection: self.schema.collection().to_string(),
                key: rendered,
            });
        };
        let hydrated = self
            .engine
            .hydrator
            .hydrate(self.schema.name(), raw, true)
            .await?;
        D::from_record(hydrated)
    }

    /// Counts the instances matching `filter` (all of them when `None`).
    pub async fn count_documents(&self, filter: Option<Predicate>) -> DocLinkResult<u64> {
        let predicate = filter.map(|p| p.compile()).unwrap_or_default();
        self.engine
            .store
            .count(self.schema.collection(), predicate)
            .await
    }

    /// Returns one page of matching instances together with the total match
    /// count, ignoring the query's skip and limit for the count.
    pub async fn find_and_count(&self, query: Query) -> DocLinkResult<(Vec<D>, u64)> {
        let total = self
            .engine
            .store
            .count(self.schema.collection(), query.compile_predicate())
            .await?;
        let page = self.find(query).await?;
        Ok((page, total))
    }
}
