//! Schema declarations and the compiled registry.
//!
//! Document types declare their managed fields with the [`FieldDecl`]
//! builder; the registry consumes those declarations once, in two phases, and
//! produces immutable compiled metadata: storage names, the link graph,
//! reverse edges for cascade resolution, required indexes and the hook table.
//!
//! Phase 1 records raw declarations for all schemas; phase 2, once all are
//! known, resolves link targets and back-link owners and validates cascade
//! configuration. Back-links may therefore be declared before their owner.

use bson::Bson;
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::{
    error::{DocLinkError, DocLinkResult},
    store::RawRecord,
};

/// Deletion policy carried by a forward link.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CascadePolicy {
    /// When the linked document is deleted, the owning document is deleted
    /// too.
    Cascade,
    /// When the linked document is deleted, the owning document's reference
    /// is cleared and the owner re-saved. Only legal on nullable links.
    Propagate,
}

/// Identity assignment strategy for a schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityKind {
    /// The store assigns an opaque id on insert.
    StoreNative,
    /// A dense integer sequence allocated from an atomic per-schema counter.
    Serial,
}

/// Container shape of a field value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerShape {
    /// A single value.
    Scalar,
    /// An ordered sequence of values.
    Sequence,
    /// A keyed mapping of values.
    Mapping,
}

/// Lifecycle points hooks can attach to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookPoint {
    /// Runs before a document is written.
    BeforeSave,
    /// Runs before a document is removed, or before a propagated reference
    /// to it is cleared.
    BeforeDelete,
}

/// Computes the next version token from the currently loaded one (`None`
/// when the document was never versioned).
pub type VersionProvider = Arc<dyn Fn(Option<&Bson>) -> Bson + Send + Sync>;

/// Type-erased lifecycle hook over a hydrated logical record.
///
/// Typed hooks registered through the engine builder are wrapped into this
/// form; the returned record replaces the one passed forward, so later hooks
/// in the chain observe earlier mutations.
pub type RecordHook =
    Arc<dyn Fn(RawRecord) -> BoxFuture<'static, DocLinkResult<RawRecord>> + Send + Sync>;

#[derive(Clone)]
enum FieldKindDecl {
    Plain { embedded: Option<String> },
    Link { target: String, policy: Option<CascadePolicy>, link_name: Option<String> },
    BackLink { owner: String, owner_field: String },
    Identity(IdentityKind),
    Version(VersionProvider),
}

/// Declaration of a single managed field, built fluently and consumed once
/// by the registry.
#[derive(Clone)]
pub struct FieldDecl {
    name: String,
    alias: Option<String>,
    shape: ContainerShape,
    required: bool,
    index: Option<bool>,
    kind: FieldKindDecl,
}

impl FieldDecl {
    fn new(name: impl Into<String>, kind: FieldKindDecl) -> Self {
        Self {
            name: name.into(),
            alias: None,
            shape: ContainerShape::Scalar,
            required: false,
            index: None,
            kind,
        }
    }

    /// Declares a plain stored value.
    pub fn plain(name: impl Into<String>) -> Self {
        Self::new(name, FieldKindDecl::Plain { embedded: None })
    }

    /// Declares a plain field whose value is a registered embedded type,
    /// making it traversable in field paths.
    pub fn embedded(name: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self::new(name, FieldKindDecl::Plain { embedded: Some(type_name.into()) })
    }

    /// Declares a forward link to another schema.
    ///
    /// Stored as the target's identity (scalar, sequence or mapping of ids)
    /// under the link storage name; hydrated to full instances on read.
    pub fn link(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self::new(
            name,
            FieldKindDecl::Link { target: target.into(), policy: None, link_name: None },
        )
    }

    /// Declares the read-only reverse view of `owner_field` on `owner`:
    /// all owner instances whose forward link targets this document.
    ///
    /// Computed by query on hydration, never stored. The owner may be
    /// registered later; resolution happens at bind time.
    pub fn back_link(
        name: impl Into<String>,
        owner: impl Into<String>,
        owner_field: impl Into<String>,
    ) -> Self {
        Self::new(
            name,
            FieldKindDecl::BackLink { owner: owner.into(), owner_field: owner_field.into() },
        )
        .sequence()
    }

    /// Declares a serial integer identity field, allocated from the schema's
    /// atomic counter.
    pub fn serial_id(name: impl Into<String>) -> Self {
        Self::new(name, FieldKindDecl::Identity(IdentityKind::Serial))
    }

    /// Declares a store-native identity field. Defaults to the store's
    /// opaque `_id` alias, so the struct field must serialize under that
    /// name (`#[serde(rename = "_id")]` unless the alias is overridden);
    /// otherwise the id assigned on insert never reaches the instance.
    pub fn store_id(name: impl Into<String>) -> Self {
        Self::new(name, FieldKindDecl::Identity(IdentityKind::StoreNative))
    }

    /// Declares an optimistic-concurrency version field.
    ///
    /// The provider maps the loaded version (or `None` for a fresh document)
    /// to the next one; a versioned save compares-and-swaps against the
    /// loaded value. The field must stay nullable.
    pub fn version(
        name: impl Into<String>,
        provider: impl Fn(Option<&Bson>) -> Bson + Send + Sync + 'static,
    ) -> Self {
        Self::new(name, FieldKindDecl::Version(Arc::new(provider)))
    }

    /// Overrides the storage alias (the serde-serialized name) of this field.
    pub fn alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Marks the field as a sequence of values.
    pub fn sequence(mut self) -> Self {
        self.shape = ContainerShape::Sequence;
        self
    }

    /// Marks the field as a keyed mapping of values.
    pub fn mapping(mut self) -> Self {
        self.shape = ContainerShape::Mapping;
        self
    }

    /// Marks the field as required (non-nullable). Propagate links and
    /// version fields must not be required.
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Sets the deletion policy of a forward link.
    pub fn on_delete(mut self, policy: CascadePolicy) -> Self {
        if let FieldKindDecl::Link { policy: p, .. } = &mut self.kind {
            *p = Some(policy);
        }
        self
    }

    /// Overrides the storage name of a forward link, bypassing the bind-time
    /// link name formatter.
    pub fn link_name(mut self, link_name: impl Into<String>) -> Self {
        if let FieldKindDecl::Link { link_name: n, .. } = &mut self.kind {
            *n = Some(link_name.into());
        }
        self
    }

    /// Requests a non-unique index on this field.
    pub fn indexed(mut self) -> Self {
        self.index = Some(false);
        self
    }

    /// Requests a unique index on this field.
    pub fn indexed_unique(mut self) -> Self {
        self.index = Some(true);
        self
    }
}

/// Declaration of a document schema: name, optional collection override and
/// managed fields.
#[derive(Clone)]
pub struct SchemaDecl {
    pub(crate) name: String,
    collection: Option<String>,
    fields: Vec<FieldDecl>,
}

impl SchemaDecl {
    /// Starts a schema declaration.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), collection: None, fields: Vec::new() }
    }

    /// Adds a field declaration.
    pub fn field(mut self, field: FieldDecl) -> Self {
        self.fields.push(field);
        self
    }

    /// Overrides the storage collection name, bypassing the bind-time
    /// collection name formatter.
    ///
    /// Two schemas may share a collection; this is how a read/write view of
    /// another document type is declared.
    pub fn collection(mut self, name: impl Into<String>) -> Self {
        self.collection = Some(name.into());
        self
    }
}

/// Declaration of a non-document embedded type, registered so field paths
/// can traverse plain compound fields.
#[derive(Clone)]
pub struct EmbeddedDecl {
    name: String,
    fields: Vec<FieldDecl>,
}

impl EmbeddedDecl {
    /// Starts an embedded type declaration.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), fields: Vec::new() }
    }

    /// Adds a field declaration. Only plain and embedded fields are legal
    /// here; links belong to documents.
    pub fn field(mut self, field: FieldDecl) -> Self {
        self.fields.push(field);
        self
    }
}

/// Compiled kind of a field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
    /// A stored value; `embedded` names a registered embedded type when the
    /// value is traversable.
    Plain {
        /// Registered embedded type name, if any.
        embedded: Option<String>,
    },
    /// A forward link.
    Link {
        /// Target schema name.
        target: String,
        /// Deletion policy, if any.
        policy: Option<CascadePolicy>,
        /// Storage name the foreign id(s) are kept under.
        store_name: String,
    },
    /// A computed reverse view, never stored.
    BackLink {
        /// Owning schema name.
        owner: String,
        /// The owner's forward-link field this reverses.
        owner_field: String,
    },
    /// The schema identity field.
    Identity(IdentityKind),
    /// The optimistic-concurrency version field.
    Version,
}

/// Immutable compiled metadata of one field.
#[derive(Debug, Clone)]
pub struct FieldInfo {
    /// Logical field name.
    pub name: String,
    /// Storage alias; equals the serde-serialized name.
    pub alias: String,
    /// Container shape.
    pub shape: ContainerShape,
    /// Whether the field is non-nullable.
    pub required: bool,
    /// Requested index (`Some(unique)`).
    pub index: Option<bool>,
    /// Compiled kind.
    pub kind: FieldKind,
}

impl FieldInfo {
    /// The storage key this field's value lives under: the link storage name
    /// for forward links, the alias for everything else.
    pub fn store_key(&self) -> &str {
        match &self.kind {
            FieldKind::Link { store_name, .. } => store_name,
            _ => &self.alias,
        }
    }
}

/// Ordered field descriptors of a schema or embedded type, indexed by
/// logical name.
#[derive(Debug, Clone)]
pub struct FieldTable {
    /// The declaring type's name.
    pub type_name: String,
    fields: Vec<Arc<FieldInfo>>,
    by_name: HashMap<String, usize>,
}

impl FieldTable {
    fn from_fields(type_name: String, fields: Vec<Arc<FieldInfo>>) -> DocLinkResult<Self> {
        let mut by_name = HashMap::new();
        for (i, f) in fields.iter().enumerate() {
            if by_name.insert(f.name.clone(), i).is_some() {
                return Err(DocLinkError::SchemaValue(format!(
                    "duplicate field {} on {type_name}",
                    f.name
                )));
            }
        }
        Ok(Self { type_name, fields, by_name })
    }

    /// Looks a field up by logical name.
    pub fn field(&self, name: &str) -> Option<&Arc<FieldInfo>> {
        self.by_name.get(name).map(|i| &self.fields[*i])
    }

    /// Iterates fields in declaration order.
    pub fn fields(&self) -> impl Iterator<Item = &Arc<FieldInfo>> {
        self.fields.iter()
    }
}

/// Compiled, immutable schema of one document type.
pub struct Schema {
    table: FieldTable,
    collection: String,
    identity: Option<Arc<FieldInfo>>,
    version: Option<(Arc<FieldInfo>, VersionProvider)>,
}

impl fmt::Debug for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Schema")
            .field("name", &self.table.type_name)
            .field("collection", &self.collection)
            .finish_non_exhaustive()
    }
}

impl Schema {
    /// The schema name.
    pub fn name(&self) -> &str {
        &self.table.type_name
    }

    /// The storage collection name.
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// The field table.
    pub fn table(&self) -> &FieldTable {
        &self.table
    }

    /// The identity field, if declared.
    pub fn identity(&self) -> Option<&Arc<FieldInfo>> {
        self.identity.as_ref()
    }

    /// The version field and its provider, if declared.
    pub fn version(&self) -> Option<(&Arc<FieldInfo>, &VersionProvider)> {
        self.version.as_ref().map(|(f, p)| (f, p))
    }

    /// Iterates forward-link fields.
    pub fn forward_links(&self) -> impl Iterator<Item = &Arc<FieldInfo>> {
        self.table
            .fields()
            .filter(|f| matches!(f.kind, FieldKind::Link { .. }))
    }

    /// Iterates back-link fields.
    pub fn back_links(&self) -> impl Iterator<Item = &Arc<FieldInfo>> {
        self.table
            .fields()
            .filter(|f| matches!(f.kind, FieldKind::BackLink { .. }))
    }

    /// Indexes this schema requires: the identity alias when identity is
    /// serial, plus every explicitly indexed field.
    pub fn required_indexes(&self) -> Vec<(String, bool)> {
        let mut out = Vec::new();
        if let Some(id) = &self.identity {
            if matches!(id.kind, FieldKind::Identity(IdentityKind::Serial)) {
                out.push((id.alias.clone(), true));
            }
        }
        for f in self.table.fields() {
            if let Some(unique) = f.index {
                out.push((f.store_key().to_string(), unique));
            }
        }
        out
    }
}

/// A reverse edge of the link graph: some owner schema forward-links into
/// the keyed schema with a deletion policy attached.
#[derive(Debug, Clone)]
pub struct ReverseEdge {
    /// Owning schema name.
    pub owner: String,
    /// Logical name of the owner's link field.
    pub owner_field: String,
    /// Serde/storage alias of the owner's link field (the hydrated key).
    pub owner_field_alias: String,
    /// Storage name the owner keeps the foreign id under.
    pub store_name: String,
    /// The policy that makes this edge act on delete.
    pub policy: CascadePolicy,
    /// Container shape of the owner's link field.
    pub shape: ContainerShape,
}

/// Naming and counter configuration applied at bind time.
#[derive(Clone)]
pub struct BindOptions {
    /// Derives a collection name from a schema name.
    pub collection_name_format: Arc<dyn Fn(&str) -> String + Send + Sync>,
    /// Derives a link storage name from a link field's alias.
    pub link_name_format: Arc<dyn Fn(&str) -> String + Send + Sync>,
    /// Collection the serial identity counters live in.
    pub counter_collection: String,
}

impl Default for BindOptions {
    fn default() -> Self {
        Self {
            collection_name_format: Arc::new(|name| name.to_lowercase()),
            link_name_format: Arc::new(|alias| alias.to_string()),
            counter_collection: "counters".to_string(),
        }
    }
}

impl fmt::Debug for BindOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BindOptions")
            .field("counter_collection", &self.counter_collection)
            .finish_non_exhaustive()
    }
}

/// The compiled registry: every bound schema, embedded type, reverse edge
/// and hook. Read-only after construction.
pub struct Registry {
    schemas: HashMap<String, Arc<Schema>>,
    embedded: HashMap<String, Arc<FieldTable>>,
    reverse_edges: HashMap<String, Vec<ReverseEdge>>,
    hooks: HashMap<(String, HookPoint), Vec<RecordHook>>,
    options: BindOptions,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("schemas", &self.schemas.keys().collect::<Vec<_>>())
            .field("embedded", &self.embedded.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl Registry {
    /// Compiles declarations into an immutable registry.
    ///
    /// Phase 1 records all declarations; phase 2 resolves cross-references
    /// and validates the configuration, failing with a
    /// [`DocLinkError::SchemaValue`] on the first problem found.
    pub fn build(
        decls: Vec<SchemaDecl>,
        embedded_decls: Vec<EmbeddedDecl>,
        hook_decls: Vec<(String, HookPoint, RecordHook)>,
        options: BindOptions,
    ) -> DocLinkResult<Self> {
        // Phase 1: compile each declaration in isolation.
        let mut embedded = HashMap::new();
        for decl in embedded_decls {
            let fields = decl
                .fields
                .iter()
                .map(|f| compile_field(f, &options))
                .collect::<DocLinkResult<Vec<_>>>()?;
            for f in &fields {
                if !matches!(f.kind, FieldKind::Plain { .. }) {
                    return Err(DocLinkError::SchemaValue(format!(
                        "embedded type {} declares non-plain field {}",
                        decl.name, f.name
                    )));
                }
            }
            let table = FieldTable::from_fields(decl.name.clone(), fields)?;
            if embedded
                .insert(decl.name.clone(), Arc::new(table))
                .is_some()
            {
                return Err(DocLinkError::SchemaValue(format!(
                    "embedded type {} declared twice",
                    decl.name
                )));
            }
        }

        let mut schemas = HashMap::new();
        for decl in decls {
            let schema = compile_schema(&decl, &options)?;
            if schemas
                .insert(decl.name.clone(), Arc::new(schema))
                .is_some()
            {
                return Err(DocLinkError::SchemaValue(format!(
                    "schema {} declared twice",
                    decl.name
                )));
            }
        }

        // Phase 2: resolve cross-references now that every type is known.
        let mut reverse_edges: HashMap<String, Vec<ReverseEdge>> = HashMap::new();
        for schema in schemas.values() {
            for field in schema.table.fields() {
                match &field.kind {
                    FieldKind::Link { target, policy, store_name } => {
                        let target_schema = schemas.get(target).ok_or_else(|| {
                            DocLinkError::SchemaValue(format!(
                                "{}.{} links to unbound schema {target}",
                                schema.name(),
                                field.name
                            ))
                        })?;
                        if target_schema.identity.is_none() {
                            return Err(DocLinkError::SchemaValue(format!(
                                "{}.{} links to {target}, which has no identity field",
                                schema.name(),
                                field.name
                            )));
                        }
                        if *policy == Some(CascadePolicy::Propagate) && field.required {
                            return Err(DocLinkError::SchemaValue(format!(
                                "{}.{} carries a propagate policy but is required; \
                                 a propagated reference must be nullable",
                                schema.name(),
                                field.name
                            )));
                        }
                        if let Some(policy) = policy {
                            reverse_edges
                                .entry(target.clone())
                                .or_default()
                                .push(ReverseEdge {
                                    owner: schema.name().to_string(),
                                    owner_field: field.name.clone(),
                                    owner_field_alias: field.alias.clone(),
                                    store_name: store_name.clone(),
                                    policy: *policy,
                                    shape: field.shape,
                                });
                        }
                    }
                    FieldKind::BackLink { owner, owner_field } => {
                        let owner_schema = schemas.get(owner).ok_or_else(|| {
                            DocLinkError::SchemaValue(format!(
                                "back-link {}.{} names unbound owner schema {owner}",
                                schema.name(),
                                field.name
                            ))
                        })?;
                        match owner_schema
                            .table
                            .field(owner_field)
                            .map(|f| &f.kind)
                        {
                            Some(FieldKind::Link { target, .. }) if target == schema.name() => {}
                            _ => {
                                return Err(DocLinkError::SchemaValue(format!(
                                    "back-link {}.{} expects {owner}.{owner_field} to be a \
                                     forward link targeting {}",
                                    schema.name(),
                                    field.name,
                                    schema.name()
                                )));
                            }
                        }
                    }
                    FieldKind::Plain { embedded: Some(type_name) } => {
                        if !embedded.contains_key(type_name) {
                            return Err(DocLinkError::SchemaValue(format!(
                                "{}.{} references unbound embedded type {type_name}",
                                schema.name(),
                                field.name
                            )));
                        }
                    }
                    _ => {}
                }
            }
        }
        for table in embedded.values() {
            for field in table.fields() {
                if let FieldKind::Plain { embedded: Some(type_name) } = &field.kind {
                    if !embedded.contains_key(type_name) {
                        return Err(DocLinkError::SchemaValue(format!(
                            "{}.{} references unbound embedded type {type_name}",
                            table.type_name, field.name
                        )));
                    }
                }
            }
        }

        let mut hooks: HashMap<(String, HookPoint), Vec<RecordHook>> = HashMap::new();
        for (schema_name, point, hook) in hook_decls {
            if !schemas.contains_key(&schema_name) {
                return Err(DocLinkError::SchemaValue(format!(
                    "hook registered for unbound schema {schema_name}"
                )));
            }
            hooks
                .entry((schema_name, point))
                .or_default()
                .push(hook);
        }

        Ok(Self { schemas, embedded, reverse_edges, hooks, options })
    }

    /// Looks up a bound schema by name.
    pub fn schema(&self, name: &str) -> DocLinkResult<&Arc<Schema>> {
        self.schemas
            .get(name)
            .ok_or_else(|| DocLinkError::SchemaValue(format!("schema {name} is not bound")))
    }

    /// Looks up a registered embedded type by name.
    pub fn embedded(&self, name: &str) -> Option<&Arc<FieldTable>> {
        self.embedded.get(name)
    }

    /// Iterates all bound schemas.
    pub fn schemas(&self) -> impl Iterator<Item = &Arc<Schema>> {
        self.schemas.values()
    }

    /// Reverse edges pointing into the named schema, i.e. every forward link
    /// of any bound schema that targets it and carries a deletion policy.
    pub fn reverse_edges(&self, target: &str) -> &[ReverseEdge] {
        self.reverse_edges
            .get(target)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Hooks registered for a schema and lifecycle point, in registration
    /// order.
    pub fn hooks(&self, schema: &str, point: HookPoint) -> &[RecordHook] {
        self.hooks
            .get(&(schema.to_string(), point))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Runs the hook chain for a schema and lifecycle point.
    ///
    /// Each hook receives the record returned by the previous one; a hook
    /// failure aborts the chain and propagates.
    pub async fn run_hooks(
        &self,
        schema: &str,
        point: HookPoint,
        mut record: RawRecord,
    ) -> DocLinkResult<RawRecord> {
        for hook in self.hooks(schema, point) {
            record = hook(record).await?;
        }
        Ok(record)
    }

    /// The naming options the registry was bound with.
    pub fn options(&self) -> &BindOptions {
        &self.options
    }
}

fn compile_field(decl: &FieldDecl, options: &BindOptions) -> DocLinkResult<Arc<FieldInfo>> {
    let alias = decl.alias.clone().unwrap_or_else(|| {
        match &decl.kind {
            FieldKindDecl::Identity(IdentityKind::StoreNative) => "_id".to_string(),
            _ => decl.name.clone(),
        }
    });
    let kind = match &decl.kind {
        FieldKindDecl::Plain { embedded } => FieldKind::Plain { embedded: embedded.clone() },
        FieldKindDecl::Link { target, policy, link_name } => FieldKind::Link {
            target: target.clone(),
            policy: *policy,
            store_name: link_name
                .clone()
                .unwrap_or_else(|| (options.link_name_format)(&alias)),
        },
        FieldKindDecl::BackLink { owner, owner_field } => FieldKind::BackLink {
            owner: owner.clone(),
            owner_field: owner_field.clone(),
        },
        FieldKindDecl::Identity(kind) => FieldKind::Identity(*kind),
        FieldKindDecl::Version(_) => FieldKind::Version,
    };
    Ok(Arc::new(FieldInfo {
        name: decl.name.clone(),
        alias,
        shape: decl.shape,
        required: decl.required,
        index: decl.index,
        kind,
    }))
}

fn compile_schema(decl: &SchemaDecl, options: &BindOptions) -> DocLinkResult<Schema> {
    let mut identity = None;
    let mut version = None;
    let mut fields = Vec::with_capacity(decl.fields.len());
    for field_decl in &decl.fields {
        let field = compile_field(field_decl, options)?;
        match &field.kind {
            FieldKind::Identity(_) => {
                if identity.replace(field.clone()).is_some() {
                    return Err(DocLinkError::SchemaValue(format!(
                        "schema {} declares more than one identity field",
                        decl.name
                    )));
                }
            }
            FieldKind::Version => {
                if field.required {
                    return Err(DocLinkError::SchemaValue(format!(
                        "version field {}.{} must be nullable",
                        decl.name, field.name
                    )));
                }
                if let FieldKindDecl::Version(provider) = &field_decl.kind {
                    if version
                        .replace((field.clone(), provider.clone()))
                        .is_some()
                    {
                        return Err(DocLinkError::SchemaValue(format!(
                            "schema {} declares more than one version field",
                            decl.name
                        )));
                    }
                }
            }
            _ => {}
        }
        fields.push(field);
    }
    Ok(Schema {
        table: FieldTable::from_fields(decl.name.clone(), fields)?,
        collection: decl
            .collection
            .clone()
            .unwrap_or_else(|| (options.collection_name_format)(&decl.name)),
        identity,
        version,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(decls: Vec<SchemaDecl>) -> DocLinkResult<Registry> {
        Registry::build(decls, vec![], vec![], BindOptions::default())
    }

    #[test]
    fn resolves_back_links_across_registration_order() {
        // Target registered before its owner; resolution is deferred to
        // phase 2.
        let registry = build(vec![
            SchemaDecl::new("Order")
                .field(FieldDecl::serial_id("id"))
                .field(FieldDecl::back_link("order_items", "OrderItem", "order")),
            SchemaDecl::new("OrderItem")
                .field(FieldDecl::serial_id("id"))
                .field(
                    FieldDecl::link("order", "Order")
                        .on_delete(CascadePolicy::Cascade)
                        .required(),
                ),
        ])
        .unwrap();

        let edges = registry.reverse_edges("Order");
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].owner, "OrderItem");
        assert_eq!(edges[0].policy, CascadePolicy::Cascade);
    }

    #[test]
    fn rejects_back_link_with_unbound_owner() {
        let err = build(vec![
            SchemaDecl::new("Order")
                .field(FieldDecl::serial_id("id"))
                .field(FieldDecl::back_link("order_items", "OrderItem", "order")),
        ])
        .unwrap_err();
        assert!(matches!(err, DocLinkError::SchemaValue(_)));
    }

    #[test]
    fn rejects_back_link_to_non_link_field() {
        let err = build(vec![
            SchemaDecl::new("Order")
                .field(FieldDecl::serial_id("id"))
                .field(FieldDecl::back_link("order_items", "OrderItem", "name")),
            SchemaDecl::new("OrderItem")
                .field(FieldDecl::serial_id("id"))
                .field(FieldDecl::plain("name")),
        ])
        .unwrap_err();
        assert!(matches!(err, DocLinkError::SchemaValue(_)));
    }

    #[test]
    fn rejects_required_propagate_link() {
        let err = build(vec![
            SchemaDecl::new("Recipe").field(FieldDecl::serial_id("id")),
            SchemaDecl::new("Order")
                .field(FieldDecl::serial_id("id"))
                .field(
                    FieldDecl::link("recipe", "Recipe")
                        .on_delete(CascadePolicy::Propagate)
                        .required(),
                ),
        ])
        .unwrap_err();
        assert!(matches!(err, DocLinkError::SchemaValue(_)));
    }

    #[test]
    fn rejects_duplicate_identity() {
        let err = build(vec![
            SchemaDecl::new("User")
                .field(FieldDecl::serial_id("id"))
                .field(FieldDecl::serial_id("other")),
        ])
        .unwrap_err();
        assert!(matches!(err, DocLinkError::SchemaValue(_)));
    }

    #[test]
    fn rejects_link_to_identityless_schema() {
        let err = build(vec![
            SchemaDecl::new("Tagless").field(FieldDecl::plain("name")),
            SchemaDecl::new("User")
                .field(FieldDecl::serial_id("id"))
                .field(FieldDecl::link("tag", "Tagless")),
        ])
        .unwrap_err();
        assert!(matches!(err, DocLinkError::SchemaValue(_)));
    }

    #[test]
    fn derives_storage_names_from_formatters() {
        let options = BindOptions {
            collection_name_format: Arc::new(|n| format!("{}s", n.to_lowercase())),
            link_name_format: Arc::new(|a| format!("{a}_id")),
            ..Default::default()
        };
        let registry = Registry::build(
            vec![
                SchemaDecl::new("Department").field(FieldDecl::serial_id("id")),
                SchemaDecl::new("User")
                    .field(FieldDecl::serial_id("id"))
                    .field(FieldDecl::link("department", "Department")),
            ],
            vec![],
            vec![],
            options,
        )
        .unwrap();

        let user = registry.schema("User").unwrap();
        assert_eq!(user.collection(), "users");
        let dep = user.table().field("department").unwrap();
        assert_eq!(dep.store_key(), "department_id");
    }

    #[test]
    fn store_native_identity_defaults_to_opaque_key() {
        let registry = build(vec![
            SchemaDecl::new("User").field(FieldDecl::store_id("id")),
        ])
        .unwrap();
        let id = registry
            .schema("User")
            .unwrap()
            .identity()
            .unwrap()
            .clone();
        assert_eq!(id.alias, "_id");
    }

    #[test]
    fn serial_identity_is_always_unique_indexed() {
        let registry = build(vec![
            SchemaDecl::new("User")
                .field(FieldDecl::serial_id("id"))
                .field(FieldDecl::plain("name").indexed()),
        ])
        .unwrap();
        let indexes = registry
            .schema("User")
            .unwrap()
            .required_indexes();
        assert_eq!(indexes, vec![("id".to_string(), true), ("name".to_string(), false)]);
    }
}
