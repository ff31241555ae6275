//! Convenient re-exports of commonly used types from doclink.
//!
//! Import this prelude module to quickly access the most frequently used
//! types and traits without needing to import from multiple sub-modules:
//!
//! ```ignore
//! use doclink::prelude::*;
//! ```

pub use doclink_core::{
    document::{Document, DocumentExt},
    engine::{Engine, EngineBuilder, Mapped},
    error::{DocLinkError, DocLinkResult},
    path::{FieldPath, PathStep},
    query::{CmpOp, Order, Predicate, Query},
    schema::{
        BindOptions, CascadePolicy, EmbeddedDecl, FieldDecl, HookPoint, IdentityKind,
        SchemaDecl,
    },
    store::{DocumentStore, FindSpec, RawRecord},
};
