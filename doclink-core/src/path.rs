//! Field-path compiler.
//!
//! Turns a chain of attribute and index accesses over a declared schema into
//! two parallel dotted strings: the *logical* path (declared field names,
//! compared against loaded instances) and the *alias* path (storage names,
//! sent to the store inside predicates and sort specs). Every step resolves
//! eagerly against the registry, so an invalid chain fails where it is
//! built, never at query time.

use std::fmt;
use std::sync::Arc;

use crate::{
    error::{DocLinkError, DocLinkResult},
    schema::{ContainerShape, FieldKind, FieldTable, Registry, Schema},
};

/// One step of a dynamically assembled field path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathStep {
    /// Attribute access by declared field name.
    Field(String),
    /// Positional index into a sequence field.
    At(usize),
    /// Keyed access into a mapping field.
    Key(String),
    /// Wildcard over all elements of a sequence or mapping field.
    ///
    /// Collapses a per-element match into a single path with no positional
    /// segment; the store matches it against every element of the container.
    All,
}

#[derive(Clone)]
enum Target {
    Schema(Arc<Schema>),
    Embedded(Arc<FieldTable>),
    Leaf,
}

impl Target {
    fn type_name(&self) -> &str {
        match self {
            Target::Schema(s) => s.name(),
            Target::Embedded(t) => &t.type_name,
            Target::Leaf => "",
        }
    }
}

/// A compiled field path: parallel logical and storage-alias dotted names
/// plus the cursor needed to keep chaining.
///
/// Built from [`Registry::path`], extended step by step with `?` at each
/// call. Equality compares the two dotted strings only, so paths assembled
/// through different syntactic forms of the same chain compare equal.
#[derive(Clone)]
pub struct FieldPath {
    registry: Arc<Registry>,
    logical: String,
    alias: String,
    target: Target,
    // Shape of the most recent field, consumed by index steps.
    shape: ContainerShape,
    // Set while the cursor sits on a link's stored id, i.e. the last field
    // step crossed a link and no target attribute has been resolved yet.
    on_link_id: bool,
}

impl fmt::Debug for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldPath")
            .field("logical", &self.logical)
            .field("alias", &self.alias)
            .finish()
    }
}

impl PartialEq for FieldPath {
    fn eq(&self, other: &Self) -> bool {
        self.logical == other.logical && self.alias == other.alias
    }
}

impl Eq for FieldPath {}

fn append(path: &mut String, segment: &str) {
    if !path.is_empty() {
        path.push('.');
    }
    path.push_str(segment);
}

impl Registry {
    /// Starts a field path rooted at the named schema.
    pub fn path(self: &Arc<Self>, schema: &str) -> DocLinkResult<FieldPath> {
        let schema = self.schema(schema)?.clone();
        Ok(FieldPath {
            registry: self.clone(),
            logical: String::new(),
            alias: String::new(),
            target: Target::Schema(schema),
            shape: ContainerShape::Scalar,
            on_link_id: false,
        })
    }
}

impl FieldPath {
    /// The logical dotted path (declared field names).
    pub fn logical(&self) -> &str {
        &self.logical
    }

    /// The storage-alias dotted path sent to the store.
    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// Steps through the named attribute of the current type.
    ///
    /// Plain fields append their alias and move the cursor to their embedded
    /// type (or to an opaque leaf). Forward links append the link's storage
    /// name and continue against the target schema. Naming the target's
    /// identity straight after a link appends to the logical path only: the
    /// stored link value already *is* that identity.
    pub fn field(mut self, name: &str) -> DocLinkResult<Self> {
        let field = match &self.target {
            Target::Schema(schema) => {
                if self.on_link_id {
                    if let Some(identity) = schema.identity() {
                        if identity.name == name {
                            append(&mut self.logical, name);
                            self.target = Target::Leaf;
                            self.shape = ContainerShape::Scalar;
                            self.on_link_id = false;
                            return Ok(self);
                        }
                    }
                }
                schema
                    .table()
                    .field(name)
                    .ok_or_else(|| DocLinkError::PathResolution {
                        type_name: schema.name().to_string(),
                        attribute: name.to_string(),
                    })?
                    .clone()
            }
            Target::Embedded(table) => table
                .field(name)
                .ok_or_else(|| DocLinkError::PathResolution {
                    type_name: table.type_name.clone(),
                    attribute: name.to_string(),
                })?
                .clone(),
            Target::Leaf => {
                return Err(DocLinkError::SchemaValue(format!(
                    "cannot path through {name}: {} is an opaque leaf",
                    self.logical
                )));
            }
        };

        match &field.kind {
            FieldKind::Plain { embedded } => {
                append(&mut self.logical, &field.name);
                append(&mut self.alias, &field.alias);
                self.target = match embedded {
                    Some(type_name) => Target::Embedded(
                        self.registry
                            .embedded(type_name)
                            .ok_or_else(|| {
                                DocLinkError::SchemaValue(format!(
                                    "embedded type {type_name} is not bound"
                                ))
                            })?
                            .clone(),
                    ),
                    None => Target::Leaf,
                };
                self.shape = field.shape;
                self.on_link_id = false;
            }
            FieldKind::Link { target, store_name, .. } => {
                append(&mut self.logical, &field.name);
                append(&mut self.alias, store_name);
                self.target = Target::Schema(self.registry.schema(target)?.clone());
                self.shape = field.shape;
                self.on_link_id = true;
            }
            FieldKind::Identity(_) | FieldKind::Version => {
                append(&mut self.logical, &field.name);
                append(&mut self.alias, &field.alias);
                self.target = Target::Leaf;
                self.shape = ContainerShape::Scalar;
                self.on_link_id = false;
            }
            FieldKind::BackLink { .. } => {
                return Err(DocLinkError::SchemaValue(format!(
                    "field {} on {} is a computed reverse view and cannot be pathed through",
                    field.name,
                    self.target.type_name()
                )));
            }
        }
        Ok(self)
    }

    /// Steps into position `i` of a sequence field, appending `.i` to both
    /// paths. The element type is unchanged.
    pub fn at(mut self, i: usize) -> DocLinkResult<Self> {
        if self.shape != ContainerShape::Sequence {
            return Err(DocLinkError::SchemaValue(format!(
                "{} is not a sequence; positional index is invalid here",
                self.logical
            )));
        }
        let segment = i.to_string();
        append(&mut self.logical, &segment);
        append(&mut self.alias, &segment);
        self.shape = ContainerShape::Scalar;
        Ok(self)
    }

    /// Steps into key `k` of a mapping field, appending `.k` to both paths.
    /// The element type is unchanged.
    pub fn key(mut self, k: &str) -> DocLinkResult<Self> {
        if self.shape != ContainerShape::Mapping {
            return Err(DocLinkError::SchemaValue(format!(
                "{} is not a mapping; keyed index is invalid here",
                self.logical
            )));
        }
        append(&mut self.logical, k);
        append(&mut self.alias, k);
        self.shape = ContainerShape::Scalar;
        Ok(self)
    }

    /// Wildcard over all elements of a sequence or mapping field.
    ///
    /// Appends nothing to either path; the element type continues.
    pub fn all(mut self) -> DocLinkResult<Self> {
        if self.shape == ContainerShape::Scalar {
            return Err(DocLinkError::SchemaValue(format!(
                "{} is not a container; wildcard index is invalid here",
                self.logical
            )));
        }
        self.shape = ContainerShape::Scalar;
        Ok(self)
    }

    /// Applies a dynamically assembled step.
    pub fn step(self, step: PathStep) -> DocLinkResult<Self> {
        match step {
            PathStep::Field(name) => self.field(&name),
            PathStep::At(i) => self.at(i),
            PathStep::Key(k) => self.key(&k),
            PathStep::All => self.all(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{BindOptions, EmbeddedDecl, FieldDecl, SchemaDecl};

    fn registry() -> Arc<Registry> {
        let options = BindOptions {
            link_name_format: Arc::new(|alias| format!("{alias}_id")),
            ..Default::default()
        };
        Arc::new(
            Registry::build(
                vec![
                    SchemaDecl::new("Foo")
                        .field(FieldDecl::serial_id("id"))
                        .field(FieldDecl::plain("key").alias("key_alias"))
                        .field(FieldDecl::embedded("d", "Inner"))
                        .field(FieldDecl::back_link("bars", "Bar", "foo")),
                    SchemaDecl::new("Bar")
                        .field(FieldDecl::serial_id("id"))
                        .field(FieldDecl::link("foo", "Foo"))
                        .field(FieldDecl::link("foos", "Foo").sequence())
                        .field(FieldDecl::link("foos_d", "Foo").mapping()),
                ],
                vec![EmbeddedDecl::new("Inner")
                    .field(FieldDecl::plain("key").alias("key_alias"))],
                vec![],
                options,
            )
            .unwrap(),
        )
    }

    #[test]
    fn compiles_plain_and_embedded_chains() {
        let r = registry();
        let p = r.path("Foo").unwrap().field("key").unwrap();
        assert_eq!(p.logical(), "key");
        assert_eq!(p.alias(), "key_alias");

        let p = r
            .path("Foo")
            .unwrap()
            .field("d")
            .unwrap()
            .field("key")
            .unwrap();
        assert_eq!(p.logical(), "d.key");
        assert_eq!(p.alias(), "d.key_alias");
    }

    #[test]
    fn collapses_identity_access_after_link() {
        let r = registry();
        let p = r
            .path("Bar")
            .unwrap()
            .field("foo")
            .unwrap()
            .field("id")
            .unwrap();
        assert_eq!(p.logical(), "foo.id");
        assert_eq!(p.alias(), "foo_id");
    }

    #[test]
    fn crosses_links_to_non_identity_fields() {
        let r = registry();
        let p = r
            .path("Bar")
            .unwrap()
            .field("foo")
            .unwrap()
            .field("key")
            .unwrap();
        assert_eq!(p.logical(), "foo.key");
        assert_eq!(p.alias(), "foo_id.key_alias");
    }

    #[test]
    fn indexes_sequences_and_mappings() {
        let r = registry();
        let p = r
            .path("Bar")
            .unwrap()
            .field("foos")
            .unwrap()
            .at(1)
            .unwrap()
            .field("id")
            .unwrap();
        assert_eq!(p.logical(), "foos.1.id");
        assert_eq!(p.alias(), "foos_id.1");

        let p = r
            .path("Bar")
            .unwrap()
            .field("foos_d")
            .unwrap()
            .key("one")
            .unwrap()
            .field("id")
            .unwrap();
        assert_eq!(p.logical(), "foos_d.one.id");
        assert_eq!(p.alias(), "foos_d_id.one");
    }

    #[test]
    fn wildcard_appends_no_segment_and_forms_are_path_equal() {
        let r = registry();
        let a = r
            .path("Bar")
            .unwrap()
            .field("foos")
            .unwrap()
            .all()
            .unwrap()
            .field("id")
            .unwrap();
        let b = r
            .path("Bar")
            .unwrap()
            .field("foos")
            .unwrap()
            .step(PathStep::All)
            .unwrap()
            .field("id")
            .unwrap();
        assert_eq!(a.logical(), "foos.id");
        assert_eq!(a.alias(), "foos_id");
        assert_eq!(a, b);
    }

    #[test]
    fn undeclared_attribute_is_a_path_resolution_error() {
        let r = registry();
        let err = r.path("Foo").unwrap().field("nope").unwrap_err();
        assert!(matches!(
            err,
            DocLinkError::PathResolution { ref type_name, ref attribute }
                if type_name == "Foo" && attribute == "nope"
        ));
    }

    #[test]
    fn crossing_a_leaf_is_a_value_error() {
        let r = registry();
        let err = r
            .path("Foo")
            .unwrap()
            .field("key")
            .unwrap()
            .field("deeper")
            .unwrap_err();
        assert!(matches!(err, DocLinkError::SchemaValue(_)));
    }

    #[test]
    fn pathing_through_a_back_link_is_a_value_error() {
        let r = registry();
        let err = r.path("Foo").unwrap().field("bars").unwrap_err();
        assert!(matches!(err, DocLinkError::SchemaValue(_)));
    }

    #[test]
    fn indexing_a_scalar_is_a_value_error() {
        let r = registry();
        let err = r.path("Foo").unwrap().field("key").unwrap().at(0).unwrap_err();
        assert!(matches!(err, DocLinkError::SchemaValue(_)));
    }
}
