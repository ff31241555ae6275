//! In-memory store for doclink.
//!
//! This crate provides a thread-safe, in-memory implementation of the
//! mapper's store contract. It uses async-aware read-write locks for
//! concurrent access and is the primary vehicle for tests, development and
//! small-scale use.
//!
//! # Features
//!
//! - **Thread-safe access** - Concurrent reads and writes through an
//!   async-aware RwLock
//! - **Full predicate support** - Evaluates the operator subset the mapper
//!   compiles, including dotted paths with array broadcasting
//! - **Atomic counters** - Serial identity counters incremented under the
//!   write lock
//!
//! # Quick Start
//!
//! ```ignore
//! use doclink::prelude::*;
//! use doclink_memory::InMemoryStore;
//! use std::sync::Arc;
//!
//! # async fn example() -> DocLinkResult<()> {
//! let store: Arc<dyn DocumentStore> = Arc::new(InMemoryStore::new());
//! let engine = Engine::builder(store).bind()?;
//! # Ok(()) }
//! ```

#[allow(unused_extern_crates)]
extern crate self as doclink_memory;

pub mod evaluator;
pub mod store;

pub use store::InMemoryStore;
