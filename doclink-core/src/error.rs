//! Error types and result types for the document mapper.
//!
//! This module provides error handling for schema registration, field-path
//! compilation, hydration and store operations. Use [`DocLinkResult<T>`] as
//! the return type for fallible operations.

use bson::error::Error as BsonError;
use serde_json::Error as SerdeJsonError;
use thiserror::Error;

/// Represents all possible errors raised by the mapper core.
///
/// Store-level failures are wrapped in [`DocLinkError::Store`] and propagate
/// unchanged; the mapper adds no retry layer on top of them.
#[derive(Error, Debug)]
pub enum DocLinkError {
    /// A field path stepped through an attribute that is not declared on the
    /// schema or embedded type it was resolved against.
    #[error("Type {type_name} has no declared field {attribute}")]
    PathResolution {
        /// The schema or embedded type the step was resolved against.
        type_name: String,
        /// The attribute that failed to resolve.
        attribute: String,
    },
    /// A declaration or field path is structurally invalid: a path through a
    /// declared-but-unmanaged field, a propagate policy on a required link,
    /// an unresolved back-link owner, and similar configuration errors.
    #[error("Schema value error: {0}")]
    SchemaValue(String),
    /// The requested document was not found in the collection.
    ///
    /// Raised by `get`/`find_one` when zero records match, and by a versioned
    /// save whose compare-and-swap update matched zero records. The two cases
    /// share a kind: both mean the record is not there under the conditions
    /// the caller expected.
    #[error("Document not found {key} in collection {collection}")]
    NotFound {
        /// The collection that was queried.
        collection: String,
        /// A printable rendition of the identity or predicate that missed.
        key: String,
    },
    /// Hydration encountered a forward-link id with no corresponding stored
    /// record.
    #[error("Dangling link {id} into collection {collection}")]
    DanglingLink {
        /// The collection the referent should have lived in.
        collection: String,
        /// The stored foreign id that resolved to nothing.
        id: String,
    },
    /// Serialization/deserialization error when converting between documents
    /// and records (BSON, JSON).
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// An error surfaced by the underlying store collaborator.
    #[error("Store error: {0}")]
    Store(String),
}

/// A specialized `Result` type for mapper operations.
pub type DocLinkResult<T> = Result<T, DocLinkError>;

impl From<BsonError> for DocLinkError {
    fn from(err: BsonError) -> Self {
        DocLinkError::Serialization(err.to_string())
    }
}

impl From<SerdeJsonError> for DocLinkError {
    fn from(err: SerdeJsonError) -> Self {
        DocLinkError::Serialization(err.to_string())
    }
}
