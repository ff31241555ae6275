//! A schema-driven document mapper over schemaless document stores.
//!
//! This crate is the core of the doclink project and provides:
//!
//! - **Document trait** ([`document`]) - Ties a serde type to a declared schema
//! - **Schema registry** ([`schema`]) - Field declarations, two-phase binding, hooks
//! - **Field-path compiler** ([`path`]) - Attribute chains to dotted storage paths
//! - **Predicate/query builder** ([`query`]) - Type-safe predicates and retrieval specs
//! - **Link resolver** ([`hydrate`]) - Batched hydration of forward and back links
//! - **Write/delete engine** ([`write`]) - Saves, optimistic versioning, cascade deletes
//! - **Identity allocator** ([`ident`]) - Store-native and serial identity strategies
//! - **Store abstraction** ([`store`]) - The narrow async contract concrete stores implement
//! - **Engine surface** ([`engine`]) - Binding and the typed per-schema handle
//! - **Error handling** ([`error`]) - Error and result types
//!
//! # Example
//!
//! ```ignore
//! use doclink_core::{document::Document, schema::{FieldDecl, SchemaDecl}};
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! pub struct User {
//!     pub id: Option<i64>,
//!     pub name: String,
//! }
//!
//! impl Document for User {
//!     fn schema_name() -> &'static str {
//!         "User"
//!     }
//!
//!     fn declaration() -> SchemaDecl {
//!         SchemaDecl::new(Self::schema_name())
//!             .field(FieldDecl::serial_id("id"))
//!             .field(FieldDecl::plain("name").indexed())
//!     }
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as doclink_core;

pub mod document;
pub mod engine;
pub mod error;
pub mod hydrate;
pub mod ident;
pub mod path;
pub mod query;
pub mod schema;
pub mod store;
pub mod write;
