//! Link round-trips: scalar, sequence and mapping shapes, stored-record
//! layout, and back-link hydration.

use bson::doc;
use doclink::{memory::InMemoryStore, prelude::*};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Foo {
    id: Option<i64>,
    name: String,
    bars: Option<Vec<Bar>>,
}

impl Document for Foo {
    fn schema_name() -> &'static str {
        "Foo"
    }

    fn declaration() -> SchemaDecl {
        SchemaDecl::new(Self::schema_name())
            .field(FieldDecl::serial_id("id"))
            .field(FieldDecl::plain("name"))
            .field(FieldDecl::back_link("bars", "Bar", "foo"))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Bar {
    id: Option<i64>,
    name: String,
    foo: Option<Foo>,
    foos: Option<Vec<Foo>>,
    foos_d: Option<HashMap<String, Foo>>,
}

impl Document for Bar {
    fn schema_name() -> &'static str {
        "Bar"
    }

    fn declaration() -> SchemaDecl {
        SchemaDecl::new(Self::schema_name())
            .field(FieldDecl::serial_id("id"))
            .field(FieldDecl::plain("name"))
            .field(FieldDecl::link("foo", "Foo"))
            .field(FieldDecl::link("foos", "Foo").sequence())
            .field(FieldDecl::link("foos_d", "Foo").mapping())
    }
}

fn engine(store: Arc<InMemoryStore>) -> Engine {
    Engine::builder(store)
        .schema::<Foo>()
        .schema::<Bar>()
        .options(BindOptions {
            link_name_format: Arc::new(|alias| format!("{alias}_id")),
            ..Default::default()
        })
        .bind()
        .unwrap()
}

async fn save_foo(engine: &Engine, name: &str) -> Foo {
    engine
        .collection::<Foo>()
        .unwrap()
        .save(Foo { id: None, name: name.to_string(), bars: None })
        .await
        .unwrap()
}

#[tokio::test]
async fn links_are_stored_as_ids_and_hydrated_back() {
    let store = Arc::new(InMemoryStore::new());
    let engine = engine(store.clone());
    let bars = engine.collection::<Bar>().unwrap();

    let foo1 = save_foo(&engine, "foo1").await;
    let foo2 = save_foo(&engine, "foo2").await;
    let foo3 = save_foo(&engine, "foo3").await;
    let foo4 = save_foo(&engine, "foo4").await;
    let foo5 = save_foo(&engine, "foo5").await;

    let bar = bars
        .save(Bar {
            id: None,
            name: "bar1".to_string(),
            foo: Some(foo1.clone()),
            foos: Some(vec![foo2.clone(), foo3.clone()]),
            foos_d: Some(HashMap::from([
                ("one".to_string(), foo4.clone()),
                ("two".to_string(), foo5.clone()),
            ])),
        })
        .await
        .unwrap();
    assert_eq!(bar.id, Some(1));

    // The stored record keeps ids under the formatted link names, nothing
    // hydrated and no back-links.
    let raw = store
        .find_one("bar", doc! { "id": { "$eq": 1i64 } })
        .await
        .unwrap()
        .unwrap();
    assert_eq!(raw.get_str("name").unwrap(), "bar1");
    assert_eq!(raw.get_i64("foo_id").unwrap(), 1);
    let stored_seq = raw.get_array("foos_id").unwrap();
    assert_eq!(stored_seq.len(), 2);
    assert_eq!(stored_seq[0].as_i64(), Some(2));
    assert_eq!(stored_seq[1].as_i64(), Some(3));
    let stored_map = raw.get_document("foos_d_id").unwrap();
    assert_eq!(stored_map.get("one").and_then(|v| v.as_i64()), Some(4));
    assert_eq!(stored_map.get("two").and_then(|v| v.as_i64()), Some(5));
    assert!(!raw.contains_key("foo"));
    assert!(!raw.contains_key("bars"));

    // Loading hydrates every shape back to full instances.
    let loaded = bars.get(1i64).await.unwrap();
    assert_eq!(loaded.name, "bar1");
    assert_eq!(loaded.foo.as_ref().unwrap().name, "foo1");
    let seq = loaded.foos.as_ref().unwrap();
    assert_eq!(seq[0].name, "foo2");
    assert_eq!(seq[1].name, "foo3");
    let map = loaded.foos_d.as_ref().unwrap();
    assert_eq!(map["one"].name, "foo4");
    assert_eq!(map["two"].name, "foo5");
}

#[tokio::test]
async fn back_links_hydrate_only_at_the_top_level() {
    let store = Arc::new(InMemoryStore::new());
    let engine = engine(store);
    let foos = engine.collection::<Foo>().unwrap();
    let bars = engine.collection::<Bar>().unwrap();

    let foo = save_foo(&engine, "shared").await;
    let bar1 = bars
        .save(Bar {
            id: None,
            name: "bar1".to_string(),
            foo: Some(foo.clone()),
            foos: None,
            foos_d: None,
        })
        .await
        .unwrap();
    let bar2 = bars
        .save(Bar {
            id: None,
            name: "bar2".to_string(),
            foo: Some(foo.clone()),
            foos: None,
            foos_d: None,
        })
        .await
        .unwrap();

    // Top level: the reverse view lists both owners, ordered by identity.
    let loaded_foo = foos.get(foo.id.unwrap()).await.unwrap();
    let owners = loaded_foo.bars.as_ref().unwrap();
    assert_eq!(owners.len(), 2);
    assert_eq!(owners[0].id, bar1.id);
    assert_eq!(owners[1].id, bar2.id);

    // The owners inside the view carry hydrated forward links, but their
    // nested reverse views stay unset.
    assert_eq!(owners[0].foo.as_ref().unwrap().name, "shared");
    assert!(owners[0].foo.as_ref().unwrap().bars.is_none());

    // One level down from a loaded owner, same rule.
    let loaded_bar = bars.get(bar1.id.unwrap()).await.unwrap();
    assert!(loaded_bar.foo.as_ref().unwrap().bars.is_none());
}

#[tokio::test]
async fn absent_links_stay_absent_and_zero_owners_is_an_empty_view() {
    let store = Arc::new(InMemoryStore::new());
    let engine = engine(store);
    let foos = engine.collection::<Foo>().unwrap();
    let bars = engine.collection::<Bar>().unwrap();

    let foo = save_foo(&engine, "lonely").await;
    let bar = bars
        .save(Bar {
            id: None,
            name: "unlinked".to_string(),
            foo: None,
            foos: None,
            foos_d: None,
        })
        .await
        .unwrap();

    let loaded = bars.get(bar.id.unwrap()).await.unwrap();
    assert!(loaded.foo.is_none());
    assert!(loaded.foos.is_none());
    assert!(loaded.foos_d.is_none());

    let loaded_foo = foos.get(foo.id.unwrap()).await.unwrap();
    assert_eq!(loaded_foo.bars, Some(vec![]));
}

#[tokio::test]
async fn dangling_forward_link_surfaces_as_an_error() {
    let store = Arc::new(InMemoryStore::new());
    let engine = engine(store.clone());
    let bars = engine.collection::<Bar>().unwrap();

    let foo = save_foo(&engine, "doomed").await;
    let bar = bars
        .save(Bar {
            id: None,
            name: "orphaned".to_string(),
            foo: Some(foo.clone()),
            foos: None,
            foos_d: None,
        })
        .await
        .unwrap();

    // Remove the referent behind the mapper's back.
    store
        .delete_one("foo", doc! { "id": { "$eq": foo.id.unwrap() } })
        .await
        .unwrap();

    let err = bars.get(bar.id.unwrap()).await.unwrap_err();
    assert!(matches!(err, DocLinkError::DanglingLink { .. }));
}

#[tokio::test]
async fn saving_an_unsaved_link_target_is_rejected() {
    let store = Arc::new(InMemoryStore::new());
    let engine = engine(store);
    let bars = engine.collection::<Bar>().unwrap();

    let err = bars
        .save(Bar {
            id: None,
            name: "eager".to_string(),
            foo: Some(Foo { id: None, name: "not saved".to_string(), bars: None }),
            foos: None,
            foos_d: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(err, DocLinkError::SchemaValue(_)));
}

#[tokio::test]
async fn round_trip_preserves_instance_equality() {
    let store = Arc::new(InMemoryStore::new());
    let engine = engine(store);
    let bars = engine.collection::<Bar>().unwrap();

    let foo = save_foo(&engine, "anchor").await;
    let saved = bars
        .save(Bar {
            id: None,
            name: "stable".to_string(),
            foo: Some(foo),
            foos: None,
            foos_d: None,
        })
        .await
        .unwrap();
    let loaded = bars.get(saved.id.unwrap()).await.unwrap();
    assert_eq!(loaded, saved);
}
