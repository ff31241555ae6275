//! Main doclink crate: a schema-driven document mapper over schemaless
//! document stores.
//!
//! This crate is the primary entry point for users of the doclink framework.
//! It re-exports the core modules and provides convenient access to the
//! bundled stores.
//!
//! # Features
//!
//! - **Declared schemas over serde types** - Identity, version, forward links
//!   and back-links declared with a builder; undeclared fields pass through
//! - **Compiled field paths** - Attribute chains become dotted storage paths,
//!   validated eagerly against the registry
//! - **Composable predicates** - Comparisons, substring matching and boolean
//!   combinators compiled to store-native operator documents
//! - **Link hydration** - Batched, recursive resolution of the link graph,
//!   with back-links derived by query at the top level
//! - **Cascade deletes** - Reverse edges walked depth-first, with per-type
//!   lifecycle hooks and propagate-to-null semantics
//! - **Optimistic versioning** - Compare-and-swap saves through a declared
//!   version field and provider
//! - **Serial identities** - Dense integer sequences from atomic store
//!   counters, or store-native opaque ids
//!
//! # Quick Start
//!
//! ```ignore
//! use doclink::{prelude::*, memory::InMemoryStore};
//! use serde::{Serialize, Deserialize};
//! use std::sync::Arc;
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! pub struct Department {
//!     pub id: Option<i64>,
//!     pub name: String,
//! }
//!
//! impl Document for Department {
//!     fn schema_name() -> &'static str { "Department" }
//!
//!     fn declaration() -> SchemaDecl {
//!         SchemaDecl::new(Self::schema_name())
//!             .field(FieldDecl::serial_id("id"))
//!             .field(FieldDecl::plain("name"))
//!     }
//! }
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! pub struct User {
//!     pub id: Option<i64>,
//!     pub name: String,
//!     pub department: Option<Department>,
//! }
//!
//! impl Document for User {
//!     fn schema_name() -> &'static str { "User" }
//!
//!     fn declaration() -> SchemaDecl {
//!         SchemaDecl::new(Self::schema_name())
//!             .field(FieldDecl::serial_id("id"))
//!             .field(FieldDecl::plain("name"))
//!             .field(FieldDecl::link("department", "Department"))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> DocLinkResult<()> {
//!     let store: Arc<dyn DocumentStore> = Arc::new(InMemoryStore::new());
//!     let engine = Engine::builder(store)
//!         .schema::<Department>()
//!         .schema::<User>()
//!         .bind()?;
//!     engine.init().await?;
//!
//!     let departments = engine.collection::<Department>()?;
//!     let sales = departments
//!         .save(Department { id: None, name: "Sales".into() })
//!         .await?;
//!
//!     let users = engine.collection::<User>()?;
//!     let alice = users
//!         .save(User { id: None, name: "Alice".into(), department: Some(sales) })
//!         .await?;
//!
//!     // Query across the link: compiled to the stored id.
//!     let path = engine.path::<User>()?.field("department")?.field("id")?;
//!     let found = users.find_one(path.eq(alice.department.unwrap().id)).await?;
//!     assert_eq!(found.name, "Alice");
//!
//!     Ok(())
//! }
//! ```
//!
//! # Stores
//!
//! - [`memory`] - Fast in-memory store for development and testing
//! - [`mongodb`] - Persistent MongoDB store (requires the `mongodb` feature)

pub mod prelude;

pub use doclink_core::{
    document, engine, error, hydrate, ident, path, query, schema, store, write,
};

// Re-export BSON types for convenience
pub use bson;

/// In-memory store implementation.
pub mod memory {
    pub use doclink_memory::InMemoryStore;
}

/// MongoDB store implementation.
///
/// This module is only available when the `mongodb` feature is enabled.
#[cfg(feature = "mongodb")]
pub mod mongodb {
    pub use doclink_mongodb::MongoStore;
}
