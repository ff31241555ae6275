//! Optimistic versioning and identity allocation strategies.

use bson::{Bson, oid::ObjectId};
use doclink::{memory::InMemoryStore, prelude::*};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Note {
    id: Option<i64>,
    body: String,
    revision: Option<i64>,
}

impl Document for Note {
    fn schema_name() -> &'static str {
        "Note"
    }

    fn declaration() -> SchemaDecl {
        SchemaDecl::new(Self::schema_name())
            .field(FieldDecl::serial_id("id"))
            .field(FieldDecl::plain("body"))
            .field(FieldDecl::version("revision", |loaded| match loaded {
                None => Bson::Int64(0),
                Some(Bson::Int64(v)) => Bson::Int64(v + 1),
                Some(Bson::Int32(v)) => Bson::Int64(i64::from(*v) + 1),
                Some(other) => other.clone(),
            }))
    }
}

fn engine(store: Arc<InMemoryStore>) -> Engine {
    Engine::builder(store).schema::<Note>().bind().unwrap()
}

#[tokio::test]
async fn versions_seed_at_insert_and_advance_on_save() {
    let store = Arc::new(InMemoryStore::new());
    let engine = engine(store);
    let notes = engine.collection::<Note>().unwrap();

    let note = notes
        .save(Note { id: None, body: "draft".to_string(), revision: None })
        .await
        .unwrap();
    assert_eq!(note.revision, Some(0));

    let mut edited = note;
    edited.body = "final".to_string();
    let edited = notes.save(edited).await.unwrap();
    assert_eq!(edited.revision, Some(1));

    let loaded = notes.get(edited.id.unwrap()).await.unwrap();
    assert_eq!(loaded.body, "final");
    assert_eq!(loaded.revision, Some(1));
}

#[tokio::test]
async fn stale_copy_loses_the_compare_and_swap() {
    let store = Arc::new(InMemoryStore::new());
    let engine = engine(store);
    let notes = engine.collection::<Note>().unwrap();

    let note = notes
        .save(Note { id: None, body: "v0".to_string(), revision: None })
        .await
        .unwrap();

    let first = notes.get(note.id.unwrap()).await.unwrap();
    let second = notes.get(note.id.unwrap()).await.unwrap();

    let mut first = first;
    first.body = "winner".to_string();
    notes.save(first).await.unwrap();

    let mut second = second;
    second.body = "loser".to_string();
    let err = notes.save(second).await.unwrap_err();
    assert!(matches!(err, DocLinkError::NotFound { .. }));

    let loaded = notes.get(note.id.unwrap()).await.unwrap();
    assert_eq!(loaded.body, "winner");
    assert_eq!(loaded.revision, Some(1));
}

#[tokio::test]
async fn serial_identities_are_dense_from_one() {
    let store = Arc::new(InMemoryStore::new());
    let engine = engine(store);
    let notes = engine.collection::<Note>().unwrap();

    let mut ids = Vec::new();
    for i in 0..5 {
        let note = notes
            .save(Note { id: None, body: format!("n{i}"), revision: None })
            .await
            .unwrap();
        ids.push(note.id.unwrap());
    }
    assert_eq!(ids, vec![1, 2, 3, 4, 5]);
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_allocation_never_duplicates() {
    let store = Arc::new(InMemoryStore::new());
    let engine = Arc::new(engine(store));

    let mut handles = Vec::new();
    for i in 0..20 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            engine
                .collection::<Note>()
                .unwrap()
                .save(Note { id: None, body: format!("c{i}"), revision: None })
                .await
                .unwrap()
                .id
                .unwrap()
        }));
    }

    let mut ids = Vec::new();
    for handle in handles {
        ids.push(handle.await.unwrap());
    }
    ids.sort_unstable();
    assert_eq!(ids, (1..=20).collect::<Vec<i64>>());
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Session {
    #[serde(rename = "_id")]
    id: Option<ObjectId>,
    token: String,
}

impl Document for Session {
    fn schema_name() -> &'static str {
        "Session"
    }

    fn declaration() -> SchemaDecl {
        SchemaDecl::new(Self::schema_name())
            .field(FieldDecl::store_id("id"))
            .field(FieldDecl::plain("token"))
    }
}

#[tokio::test]
async fn store_native_identities_are_adopted_from_the_insert() {
    let store = Arc::new(InMemoryStore::new());
    let engine = Engine::builder(store)
        .schema::<Session>()
        .bind()
        .unwrap();
    let sessions = engine.collection::<Session>().unwrap();

    let session = sessions
        .save(Session { id: None, token: "t1".to_string() })
        .await
        .unwrap();
    let id = session.id.expect("insert assigns the opaque id");

    let loaded = sessions.get(id).await.unwrap();
    assert_eq!(loaded.token, "t1");

    let token = engine.path::<Session>().unwrap().field("token").unwrap();
    let found = sessions.find_one(token.eq("t1")).await.unwrap();
    assert_eq!(found.id, Some(id));

    // A save with the identity set replaces in place.
    let mut renewed = loaded;
    renewed.token = "t2".to_string();
    let renewed = sessions.save(renewed).await.unwrap();
    assert_eq!(renewed.id, Some(id));
    assert_eq!(sessions.count_documents(None).await.unwrap(), 1);
    assert_eq!(sessions.get(id).await.unwrap().token, "t2");
}
