//! MongoDB store for doclink.
//!
//! This crate implements the mapper's store contract over the official
//! MongoDB driver, enabling persistent storage with the store's own query
//! engine matching the compiled predicates.
//!
//! To use this store, include the `mongodb` feature in your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! doclink = { version = "x.y.z", features = ["mongodb"] }
//! ```
//!
//! # Features
//!
//! - **Persistent storage** - Data lives in MongoDB Atlas or self-hosted MongoDB
//! - **Native predicate matching** - Compiled predicate documents go to the
//!   server unchanged
//! - **Atomic counters** - Serial identities via `findAndModify` with `$inc`
//! - **Indexing** - Declared indexes are created through `createIndex`
//!
//! # Example
//!
//! ```ignore
//! use doclink_mongodb::MongoStore;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = MongoStore::connect("mongodb://localhost:27017", "my_database").await?;
//!
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as doclink_mongodb;

pub mod store;

pub use store::MongoStore;
