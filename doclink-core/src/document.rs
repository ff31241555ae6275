//! Core trait tying a Rust type to a declared document schema.
//!
//! A document type is an ordinary serde struct whose serialized field names
//! are its storage aliases, plus a [`SchemaDecl`] describing which of those
//! fields the mapper manages: identity, version, forward links, back-links.

use bson::{Bson, de::deserialize_from_bson, ser::serialize_to_bson};
use serde::{Deserialize, Serialize};
use serde_json::{Value, from_value, to_value};

use crate::{
    error::{DocLinkError, DocLinkResult},
    schema::SchemaDecl,
    store::RawRecord,
};

/// Trait implemented by every type mapped to a store collection.
///
/// The struct itself carries the values; the declaration carries the mapper
/// metadata. Fields that never appear in a field path or link do not need to
/// be declared — they pass through storage untouched.
///
/// # Example
///
/// ```ignore
/// use doclink::prelude::*;
/// use serde::{Serialize, Deserialize};
///
/// #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
/// struct User {
///     id: Option<i64>,
///     name: String,
///     department: Option<Department>,
/// }
///
/// impl Document for User {
///     fn schema_name() -> &'static str {
///         "User"
///     }
///
///     fn declaration() -> SchemaDecl {
///         SchemaDecl::new(Self::schema_name())
///             .field(FieldDecl::serial_id("id"))
///             .field(FieldDecl::plain("name"))
///             .field(FieldDecl::link("department", "Department"))
///     }
/// }
/// ```
pub trait Document: Serialize + for<'de> Deserialize<'de> + Send + Sync + Clone + 'static {
    /// Returns the schema name this type is registered under.
    ///
    /// Must match the name carried by [`Document::declaration`].
    fn schema_name() -> &'static str;

    /// Returns the schema declaration consumed once by the registry at bind
    /// time.
    fn declaration() -> SchemaDecl;
}

/// Extension trait providing record conversion utilities for documents.
///
/// Automatically implemented for all [`Document`] types. The *logical record*
/// produced here is the hydrated representation the engine works on: a BSON
/// document keyed by serde field names, with forward-link fields holding full
/// nested documents.
pub trait DocumentExt: Document {
    /// Serializes this document to a logical record.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails or the type does not
    /// serialize to a map.
    fn to_record(&self) -> DocLinkResult<RawRecord>;

    /// Rebuilds a document from a logical record.
    ///
    /// # Errors
    ///
    /// Returns an error if deserialization fails.
    fn from_record(record: RawRecord) -> DocLinkResult<Self>;

    /// Converts this document to a JSON value.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    fn to_json(&self) -> DocLinkResult<Value>;

    /// Creates a document from a JSON value.
    ///
    /// # Errors
    ///
    /// Returns an error if deserialization fails.
    fn from_json(value: Value) -> DocLinkResult<Self>;
}

impl<D: Document> DocumentExt for D {
    fn to_record(&self) -> DocLinkResult<RawRecord> {
        match serialize_to_bson(self)? {
            Bson::Document(doc) => Ok(doc),
            other => Err(DocLinkError::Serialization(format!(
                "document serialized to non-map BSON value: {other}"
            ))),
        }
    }

    fn from_record(record: RawRecord) -> DocLinkResult<Self> {
        Ok(deserialize_from_bson(Bson::Document(record))?)
    }

    fn to_json(&self) -> DocLinkResult<Value> {
        Ok(to_value(self)?)
    }

    fn from_json(value: Value) -> DocLinkResult<Self> {
        Ok(from_value(value)?)
    }
}
