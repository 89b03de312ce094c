//! # Document model
//!
//! The backend-agnostic shape of what the remote document store holds and
//! accepts: JSON documents, field-level write operators, queries and atomic
//! write batches.

use serde::{de::DeserializeOwned, Serialize};
use serde_json::{Map, Value};

use crate::errors::WriteError;

pub type Fields = Map<String, Value>;

/// A stored document. The id lives beside the fields, never inside them.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub fields: Fields,
}

impl Document {
    pub fn new(id: impl Into<String>, fields: Fields) -> Self {
        Self {
            id: id.into(),
            fields,
        }
    }

    /// Decodes into a typed record, injecting the document id as `id`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, WriteError> {
        let mut fields = self.fields.clone();
        fields.insert("id".to_string(), Value::String(self.id.clone()));
        serde_json::from_value(Value::Object(fields))
            .map_err(|e| WriteError::InvalidData(format!("document {}: {e}", self.id)))
    }
}

/// Payload for `create`/`set`/`add`: plain fields plus the names of fields
/// the server must stamp with its own clock.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentData {
    pub fields: Fields,
    pub server_timestamps: Vec<String>,
}

impl DocumentData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serializes a record; its `id` field (if any) is dropped.
    pub fn from_record<T: Serialize>(record: &T) -> Result<Self, WriteError> {
        match serde_json::to_value(record) {
            Ok(Value::Object(mut fields)) => {
                fields.remove("id");
                Ok(Self {
                    fields,
                    server_timestamps: Vec::new(),
                })
            }
            Ok(other) => Err(WriteError::InvalidData(format!(
                "expected an object, got {other}"
            ))),
            Err(e) => Err(WriteError::InvalidData(e.to_string())),
        }
    }

    pub fn with_field(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    pub fn with_server_timestamp(mut self, field: impl Into<String>) -> Self {
        self.server_timestamps.push(field.into());
        self
    }
}

/// Field-level write operator. Paths are dot-separated (`reactions.👍`).
#[derive(Debug, Clone, PartialEq)]
pub enum FieldOp {
    Set(Value),
    /// Atomic numeric increment (negative to decrement)
    Increment(i64),
    /// Adds each value not already present
    ArrayUnion(Vec<Value>),
    /// Removes every occurrence of each value
    ArrayRemove(Vec<Value>),
    ServerTimestamp,
    Delete,
}

/// A partial update: an ordered list of field operations on one document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Update {
    ops: Vec<(String, FieldOp)>,
}

impl Update {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn op(mut self, path: impl Into<String>, op: FieldOp) -> Self {
        self.ops.push((path.into(), op));
        self
    }

    pub fn set(self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.op(path, FieldOp::Set(value.into()))
    }

    pub fn increment(self, path: impl Into<String>, by: i64) -> Self {
        self.op(path, FieldOp::Increment(by))
    }

    pub fn array_union(self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.op(path, FieldOp::ArrayUnion(vec![value.into()]))
    }

    pub fn array_remove(self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.op(path, FieldOp::ArrayRemove(vec![value.into()]))
    }

    pub fn server_timestamp(self, path: impl Into<String>) -> Self {
        self.op(path, FieldOp::ServerTimestamp)
    }

    pub fn delete(self, path: impl Into<String>) -> Self {
        self.op(path, FieldOp::Delete)
    }

    pub fn ops(&self) -> &[(String, FieldOp)] {
        &self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq { field: String, value: Value },
    ArrayContains { field: String, value: Value },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub field: String,
    pub direction: Direction,
}

/// A standing or one-shot query against a single collection.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub collection: String,
    pub filters: Vec<Filter>,
    pub order_by: Option<OrderBy>,
    pub limit: Option<usize>,
}

impl Query {
    pub fn collection(path: impl Into<String>) -> Self {
        Self {
            collection: path.into(),
            filters: Vec::new(),
            order_by: None,
            limit: None,
        }
    }

    pub fn where_eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Eq {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    pub fn where_array_contains(
        mut self,
        field: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        self.filters.push(Filter::ArrayContains {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, direction: Direction) -> Self {
        self.order_by = Some(OrderBy {
            field: field.into(),
            direction,
        });
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// One write inside an atomic batch.
#[derive(Debug, Clone, PartialEq)]
pub enum Write {
    /// Fails the whole batch with `AlreadyExists` if the document exists
    Create {
        collection: String,
        id: String,
        data: DocumentData,
    },
    Set {
        collection: String,
        id: String,
        data: DocumentData,
    },
    /// Fails the whole batch with `NotFound` if the document is missing
    Update {
        collection: String,
        id: String,
        update: Update,
    },
    Delete {
        collection: String,
        id: String,
        must_exist: bool,
    },
    /// Writes nothing; fails the whole batch with `Conflict` unless the
    /// document exists and `field` currently equals `value`
    Expect {
        collection: String,
        id: String,
        field: String,
        value: Value,
    },
}

/// Writes applied all-or-nothing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    writes: Vec<Write>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create(mut self, collection: impl Into<String>, id: impl Into<String>, data: DocumentData) -> Self {
        self.writes.push(Write::Create {
            collection: collection.into(),
            id: id.into(),
            data,
        });
        self
    }

    pub fn set(mut self, collection: impl Into<String>, id: impl Into<String>, data: DocumentData) -> Self {
        self.writes.push(Write::Set {
            collection: collection.into(),
            id: id.into(),
            data,
        });
        self
    }

    pub fn update(mut self, collection: impl Into<String>, id: impl Into<String>, update: Update) -> Self {
        self.writes.push(Write::Update {
            collection: collection.into(),
            id: id.into(),
            update,
        });
        self
    }

    /// Deletes a document that must exist (precondition).
    pub fn delete_existing(mut self, collection: impl Into<String>, id: impl Into<String>) -> Self {
        self.writes.push(Write::Delete {
            collection: collection.into(),
            id: id.into(),
            must_exist: true,
        });
        self
    }

    /// Guards the batch on the current value of one field.
    pub fn expect_field(
        mut self,
        collection: impl Into<String>,
        id: impl Into<String>,
        field: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        self.writes.push(Write::Expect {
            collection: collection.into(),
            id: id.into(),
            field: field.into(),
            value: value.into(),
        });
        self
    }

    pub fn writes(&self) -> &[Write] {
        &self.writes
    }

    pub fn into_writes(self) -> Vec<Write> {
        self.writes
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }
}

/// Collection paths used by the application.
pub mod collections {
    pub const USERS: &str = "users";
    pub const DISCUSSIONS: &str = "discussions";
    pub const CHATS: &str = "chats";
    pub const GROUPS: &str = "groups";
    pub const CONTENT_REPORTS: &str = "contentReports";
    pub const MODERATION_LOG: &str = "moderationLog";
    pub const REFERRAL_CODES: &str = "referralCodes";
    pub const REFERRALS: &str = "referrals";
    pub const DAILY_SPINS: &str = "dailySpins";
    pub const STREAKS: &str = "streaks";
    pub const CHECK_INS: &str = "checkIns";
    pub const FRIENDSHIPS: &str = "friendships";

    pub fn comments(discussion_id: &str) -> String {
        format!("{DISCUSSIONS}/{discussion_id}/comments")
    }

    pub fn messages(chat_id: &str) -> String {
        format!("{CHATS}/{chat_id}/messages")
    }

    pub fn group_members(group_id: &str) -> String {
        format!("{GROUPS}/{group_id}/members")
    }

    pub fn group_posts(group_id: &str) -> String {
        format!("{GROUPS}/{group_id}/posts")
    }
}
