//! # In-memory document store
//!
//! A process-local implementation of the `DocumentStore` port with the
//! semantics the stores rely on: server ids and timestamps, field-level
//! operators on dotted paths, ordered/filtered queries, atomic batches with
//! create/delete preconditions, and live listeners that receive a full
//! snapshot after every change to their collection.
//!
//! Fault injection (`fail_writes`, `set_offline`, `break_listeners`) lets
//! tests drive the rollback and error paths.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use dashmap::DashMap;
use domains::document::{Direction, Document, DocumentData, FieldOp, Fields, Filter, Query, Update, Write, WriteBatch};
use domains::errors::WriteError;
use domains::ports::{DocumentStore, Snapshot, SnapshotListener};
use serde_json::{Map, Value};
use tokio::sync::{broadcast, mpsc};
use uuid::Uuid;

type Collection = BTreeMap<String, Fields>;

#[derive(Debug, Clone)]
enum Change {
    Written(String),
    Broken { collection: String, error: WriteError },
}

struct Shared {
    collections: Mutex<HashMap<String, Collection>>,
    /// Last timestamp handed out; server time never repeats or goes back.
    last_timestamp: Mutex<DateTime<Utc>>,
    changes: broadcast::Sender<Change>,
    faults: DashMap<String, WriteError>,
    offline: AtomicBool,
}

impl Shared {
    fn collections(&self) -> MutexGuard<'_, HashMap<String, Collection>> {
        self.collections
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn server_now(&self) -> String {
        let mut last = self
            .last_timestamp
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut now = Utc::now();
        if now <= *last {
            now = *last + Duration::nanoseconds(1);
        }
        *last = now;
        now.to_rfc3339_opts(SecondsFormat::Nanos, true)
    }

    fn snapshot(&self, query: &Query) -> Snapshot {
        run_query(&self.collections(), query)
    }

    fn notify(&self, collection: &str) {
        // No receivers simply means nobody is listening.
        let _ = self.changes.send(Change::Written(collection.to_string()));
    }
}

/// Cheap to clone; clones share the same data.
#[derive(Clone)]
pub struct InMemoryDocumentStore {
    shared: Arc<Shared>,
}

impl Default for InMemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(256);
        Self {
            shared: Arc::new(Shared {
                collections: Mutex::new(HashMap::new()),
                last_timestamp: Mutex::new(DateTime::<Utc>::MIN_UTC),
                changes,
                faults: DashMap::new(),
                offline: AtomicBool::new(false),
            }),
        }
    }

    /// Every write touching `collection` fails with `error` until cleared.
    pub fn fail_writes(&self, collection: &str, error: WriteError) {
        self.shared.faults.insert(collection.to_string(), error);
    }

    pub fn clear_faults(&self) {
        self.shared.faults.clear();
    }

    /// While offline every call fails with `Unavailable`.
    pub fn set_offline(&self, offline: bool) {
        self.shared.offline.store(offline, AtomicOrdering::SeqCst);
    }

    /// Delivers `error` to every listener on `collection` and closes them.
    pub fn break_listeners(&self, collection: &str, error: WriteError) {
        let _ = self.shared.changes.send(Change::Broken {
            collection: collection.to_string(),
            error,
        });
    }

    /// Number of documents currently stored in `collection`.
    pub fn count(&self, collection: &str) -> usize {
        self.shared
            .collections()
            .get(collection)
            .map_or(0, BTreeMap::len)
    }

    fn check_online(&self) -> Result<(), WriteError> {
        if self.shared.offline.load(AtomicOrdering::SeqCst) {
            return Err(WriteError::Unavailable("backend offline".into()));
        }
        Ok(())
    }

    fn check_faults<'a>(&self, collections: impl IntoIterator<Item = &'a str>) -> Result<(), WriteError> {
        for collection in collections {
            if let Some(fault) = self.shared.faults.get(collection) {
                return Err(fault.value().clone());
            }
        }
        Ok(())
    }

    /// Applies writes atomically: everything is staged on copies of the
    /// touched collections and swapped in only if every write succeeds.
    fn apply(&self, writes: Vec<Write>) -> Result<(), WriteError> {
        self.check_online()?;
        self.check_faults(writes.iter().map(write_collection))?;

        let now = self.shared.server_now();
        let touched = {
            let mut collections = self.shared.collections();
            let mut staged: HashMap<String, Collection> = HashMap::new();
            for write in &writes {
                let name = write_collection(write);
                if !staged.contains_key(name) {
                    let current = collections.get(name).cloned().unwrap_or_default();
                    staged.insert(name.to_string(), current);
                }
            }

            for write in writes {
                let collection = staged
                    .get_mut(write_collection(&write))
                    .ok_or_else(|| WriteError::InvalidData("unstaged collection".into()))?;
                stage_write(collection, write, &now)?;
            }

            let touched: Vec<String> = staged.keys().cloned().collect();
            for (name, collection) in staged {
                collections.insert(name, collection);
            }
            touched
        };

        for collection in &touched {
            tracing::trace!(collection = %collection, "document store change");
            self.shared.notify(collection);
        }
        Ok(())
    }
}

fn write_collection(write: &Write) -> &str {
    match write {
        Write::Create { collection, .. }
        | Write::Set { collection, .. }
        | Write::Update { collection, .. }
        | Write::Delete { collection, .. }
        | Write::Expect { collection, .. } => collection,
    }
}

fn stage_write(collection: &mut Collection, write: Write, now: &str) -> Result<(), WriteError> {
    match write {
        Write::Create { collection: name, id, data } => {
            if collection.contains_key(&id) {
                return Err(WriteError::AlreadyExists(format!("{name}/{id}")));
            }
            collection.insert(id, materialize(data, now));
        }
        Write::Set { id, data, .. } => {
            collection.insert(id, materialize(data, now));
        }
        Write::Update { collection: name, id, update } => {
            let fields = collection
                .get_mut(&id)
                .ok_or_else(|| WriteError::NotFound(format!("{name}/{id}")))?;
            apply_update(fields, &update, now);
        }
        Write::Delete { collection: name, id, must_exist } => {
            if collection.remove(&id).is_none() && must_exist {
                return Err(WriteError::NotFound(format!("{name}/{id}")));
            }
        }
        Write::Expect { collection: name, id, field, value } => {
            let current = collection
                .get(&id)
                .ok_or_else(|| WriteError::NotFound(format!("{name}/{id}")))?;
            let found = lookup(current, &field).unwrap_or(&Value::Null);
            if *found != value {
                return Err(WriteError::Conflict(format!("{name}/{id}: {field} is {found}, expected {value}")));
            }
        }
    }
    Ok(())
}

fn materialize(data: DocumentData, now: &str) -> Fields {
    let mut fields = data.fields;
    for path in &data.server_timestamps {
        apply_op(&mut fields, path, &FieldOp::ServerTimestamp, now);
    }
    fields
}

fn apply_update(fields: &mut Fields, update: &Update, now: &str) {
    for (path, op) in update.ops() {
        apply_op(fields, path, op, now);
    }
}

fn apply_op(fields: &mut Fields, path: &str, op: &FieldOp, now: &str) {
    let mut segments: Vec<&str> = path.split('.').collect();
    let Some(leaf) = segments.pop() else {
        return;
    };

    if let FieldOp::Delete = op {
        let mut cursor = fields;
        for segment in segments {
            match cursor.get_mut(segment) {
                Some(Value::Object(map)) => cursor = map,
                _ => return,
            }
        }
        cursor.remove(leaf);
        return;
    }

    let mut cursor = fields;
    for segment in segments {
        let slot = cursor
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if !slot.is_object() {
            *slot = Value::Object(Map::new());
        }
        let Value::Object(map) = slot else {
            unreachable!("slot was just replaced by an object")
        };
        cursor = map;
    }

    match op {
        FieldOp::Set(value) => {
            cursor.insert(leaf.to_string(), value.clone());
        }
        FieldOp::Increment(by) => {
            let current = cursor.get(leaf).and_then(Value::as_i64).unwrap_or(0);
            cursor.insert(leaf.to_string(), Value::from(current + by));
        }
        FieldOp::ArrayUnion(values) => {
            let mut items = existing_array(cursor.get(leaf));
            for value in values {
                if !items.contains(value) {
                    items.push(value.clone());
                }
            }
            cursor.insert(leaf.to_string(), Value::Array(items));
        }
        FieldOp::ArrayRemove(values) => {
            let mut items = existing_array(cursor.get(leaf));
            items.retain(|item| !values.contains(item));
            cursor.insert(leaf.to_string(), Value::Array(items));
        }
        FieldOp::ServerTimestamp => {
            cursor.insert(leaf.to_string(), Value::String(now.to_string()));
        }
        FieldOp::Delete => {}
    }
}

fn existing_array(value: Option<&Value>) -> Vec<Value> {
    match value {
        Some(Value::Array(items)) => items.clone(),
        _ => Vec::new(),
    }
}

fn lookup<'a>(fields: &'a Fields, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = fields.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

fn matches(fields: &Fields, filter: &Filter) -> bool {
    match filter {
        Filter::Eq { field, value } => lookup(fields, field) == Some(value),
        Filter::ArrayContains { field, value } => lookup(fields, field)
            .and_then(Value::as_array)
            .is_some_and(|items| items.contains(value)),
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or_default();
            let y = y.as_f64().unwrap_or_default();
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        _ => type_rank(a).cmp(&type_rank(b)),
    }
}

fn run_query(collections: &HashMap<String, Collection>, query: &Query) -> Snapshot {
    let Some(collection) = collections.get(&query.collection) else {
        return Vec::new();
    };

    let mut docs: Vec<Document> = collection
        .iter()
        .filter(|(_, fields)| query.filters.iter().all(|f| matches(fields, f)))
        .map(|(id, fields)| Document::new(id.clone(), fields.clone()))
        .collect();

    if let Some(order) = &query.order_by {
        // Documents without the order field are not part of an ordered result.
        docs.retain(|doc| lookup(&doc.fields, &order.field).is_some_and(|v| !v.is_null()));
        docs.sort_by(|a, b| {
            let ordering = match (lookup(&a.fields, &order.field), lookup(&b.fields, &order.field)) {
                (Some(x), Some(y)) => compare_values(x, y),
                _ => Ordering::Equal,
            };
            let ordering = match order.direction {
                Direction::Ascending => ordering,
                Direction::Descending => ordering.reverse(),
            };
            ordering.then_with(|| a.id.cmp(&b.id))
        });
    }

    if let Some(limit) = query.limit {
        docs.truncate(limit);
    }
    docs
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    fn new_id(&self) -> String {
        Uuid::now_v7().simple().to_string()
    }

    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, WriteError> {
        self.check_online()?;
        let collections = self.shared.collections();
        Ok(collections
            .get(collection)
            .and_then(|c| c.get(id))
            .map(|fields| Document::new(id, fields.clone())))
    }

    async fn query(&self, query: &Query) -> Result<Vec<Document>, WriteError> {
        self.check_online()?;
        Ok(self.shared.snapshot(query))
    }

    async fn add(&self, collection: &str, data: DocumentData) -> Result<String, WriteError> {
        let id = self.new_id();
        self.apply(vec![Write::Create {
            collection: collection.to_string(),
            id: id.clone(),
            data,
        }])?;
        Ok(id)
    }

    async fn create(&self, collection: &str, id: &str, data: DocumentData) -> Result<(), WriteError> {
        self.apply(vec![Write::Create {
            collection: collection.to_string(),
            id: id.to_string(),
            data,
        }])
    }

    async fn set(&self, collection: &str, id: &str, data: DocumentData) -> Result<(), WriteError> {
        self.apply(vec![Write::Set {
            collection: collection.to_string(),
            id: id.to_string(),
            data,
        }])
    }

    async fn update(&self, collection: &str, id: &str, update: Update) -> Result<(), WriteError> {
        self.apply(vec![Write::Update {
            collection: collection.to_string(),
            id: id.to_string(),
            update,
        }])
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<(), WriteError> {
        self.apply(vec![Write::Delete {
            collection: collection.to_string(),
            id: id.to_string(),
            must_exist: false,
        }])
    }

    async fn commit(&self, batch: WriteBatch) -> Result<(), WriteError> {
        if batch.is_empty() {
            return Ok(());
        }
        self.apply(batch.into_writes())
    }

    async fn listen(&self, query: Query) -> Result<SnapshotListener, WriteError> {
        self.check_online()?;

        let (tx, rx) = mpsc::unbounded_channel();
        // Subscribe before taking the first snapshot so no change is missed.
        let mut changes = self.shared.changes.subscribe();
        let _ = tx.send(Ok(self.shared.snapshot(&query)));

        let shared = Arc::clone(&self.shared);
        let task = tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(Change::Written(collection)) if collection == query.collection => {
                        if tx.send(Ok(shared.snapshot(&query))).is_err() {
                            break;
                        }
                    }
                    Ok(Change::Broken { collection, error }) if collection == query.collection => {
                        let _ = tx.send(Err(error));
                        break;
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::debug!(skipped, collection = %query.collection, "listener lagged, resending snapshot");
                        if tx.send(Ok(shared.snapshot(&query))).is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Ok(SnapshotListener::new(rx).with_cancel(move || task.abort()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn data(value: Value) -> DocumentData {
        match value {
            Value::Object(fields) => DocumentData { fields, server_timestamps: Vec::new() },
            _ => panic!("fixture must be an object"),
        }
    }

    #[tokio::test]
    async fn create_fails_when_document_exists() {
        let store = InMemoryDocumentStore::new();
        store.create("users", "u1", data(json!({ "name": "a" }))).await.unwrap();
        let err = store.create("users", "u1", data(json!({ "name": "b" }))).await.unwrap_err();
        assert!(matches!(err, WriteError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn field_operators_apply_on_dotted_paths() {
        let store = InMemoryDocumentStore::new();
        store.create("posts", "p1", data(json!({ "likes": ["a"], "count": 1 }))).await.unwrap();

        let update = Update::new()
            .array_union("likes", "b")
            .array_union("likes", "a")
            .array_remove("likes", "a")
            .increment("count", 2)
            .array_union("reactions.🔥", "b")
            .server_timestamp("meta.touchedAt");
        store.update("posts", "p1", update).await.unwrap();

        let doc = store.get("posts", "p1").await.unwrap().unwrap();
        assert_eq!(doc.fields["likes"], json!(["b"]));
        assert_eq!(doc.fields["count"], json!(3));
        assert_eq!(doc.fields["reactions"]["🔥"], json!(["b"]));
        assert!(doc.fields["meta"]["touchedAt"].is_string());
    }

    #[tokio::test]
    async fn update_of_missing_document_is_not_found() {
        let store = InMemoryDocumentStore::new();
        let err = store.update("users", "ghost", Update::new().set("a", 1)).await.unwrap_err();
        assert!(matches!(err, WriteError::NotFound(_)));
    }

    #[tokio::test]
    async fn failed_batch_leaves_no_partial_writes() {
        let store = InMemoryDocumentStore::new();
        store.create("groups/g1/members", "u1", DocumentData::new()).await.unwrap();
        store.create("groups", "g1", data(json!({ "memberCount": 1 }))).await.unwrap();

        let batch = WriteBatch::new()
            .update("groups", "g1", Update::new().increment("memberCount", 1))
            .create("groups/g1/members", "u1", DocumentData::new());
        assert!(matches!(store.commit(batch).await, Err(WriteError::AlreadyExists(_))));

        let group = store.get("groups", "g1").await.unwrap().unwrap();
        assert_eq!(group.fields["memberCount"], json!(1));
    }

    #[tokio::test]
    async fn field_expectation_guards_the_batch() {
        let store = InMemoryDocumentStore::new();
        store.create("users", "u1", data(json!({ "xp": 100, "level": 1 }))).await.unwrap();

        let stale = WriteBatch::new()
            .expect_field("users", "u1", "xp", 0)
            .update("users", "u1", Update::new().increment("xp", 200).set("level", 1));
        assert!(matches!(store.commit(stale).await, Err(WriteError::Conflict(_))));
        let user = store.get("users", "u1").await.unwrap().unwrap();
        assert_eq!(user.fields["xp"], json!(100));

        let current = WriteBatch::new()
            .expect_field("users", "u1", "xp", 100)
            .update("users", "u1", Update::new().increment("xp", 200).set("level", 2));
        store.commit(current).await.unwrap();
        let user = store.get("users", "u1").await.unwrap().unwrap();
        assert_eq!((user.fields["xp"].clone(), user.fields["level"].clone()), (json!(300), json!(2)));

        let missing = WriteBatch::new().expect_field("users", "ghost", "xp", 0);
        assert!(matches!(store.commit(missing).await, Err(WriteError::NotFound(_))));
    }

    #[tokio::test]
    async fn queries_filter_order_and_limit() {
        let store = InMemoryDocumentStore::new();
        for (id, score, tag) in [("a", 3, "x"), ("b", 1, "x"), ("c", 2, "y"), ("d", 5, "x")] {
            store.create("items", id, data(json!({ "score": score, "tags": [tag] }))).await.unwrap();
        }
        let query = Query::collection("items")
            .where_array_contains("tags", "x")
            .order_by("score", Direction::Descending)
            .limit(2);
        let ids: Vec<String> = store.query(&query).await.unwrap().into_iter().map(|d| d.id).collect();
        assert_eq!(ids, vec!["d", "a"]);
    }

    #[tokio::test]
    async fn server_timestamps_are_strictly_increasing() {
        let store = InMemoryDocumentStore::new();
        for i in 0..20 {
            store
                .add("log", DocumentData::new().with_field("n", i).with_server_timestamp("at"))
                .await
                .unwrap();
        }
        let docs = store
            .query(&Query::collection("log").order_by("at", Direction::Ascending))
            .await
            .unwrap();
        let order: Vec<i64> = docs.iter().map(|d| d.fields["n"].as_i64().unwrap()).collect();
        assert_eq!(order, (0..20).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn listeners_receive_initial_and_subsequent_snapshots() {
        let store = InMemoryDocumentStore::new();
        store.create("chats", "c1", DocumentData::new()).await.unwrap();

        let mut listener = store.listen(Query::collection("chats")).await.unwrap();
        assert_eq!(listener.next().await.unwrap().unwrap().len(), 1);

        store.create("chats", "c2", DocumentData::new()).await.unwrap();
        assert_eq!(listener.next().await.unwrap().unwrap().len(), 2);

        store.break_listeners("chats", WriteError::Unavailable("gone".into()));
        assert!(listener.next().await.unwrap().is_err());
        assert!(listener.next().await.is_none());
    }

    #[tokio::test]
    async fn injected_faults_and_offline_mode_fail_writes() {
        let store = InMemoryDocumentStore::new();
        store.fail_writes("users", WriteError::PermissionDenied("users".into()));
        let err = store.set("users", "u1", DocumentData::new()).await.unwrap_err();
        assert!(matches!(err, WriteError::PermissionDenied(_)));

        store.clear_faults();
        store.set_offline(true);
        assert!(matches!(store.get("users", "u1").await, Err(WriteError::Unavailable(_))));
        store.set_offline(false);
        assert_eq!(store.count("users"), 0);
    }
}
