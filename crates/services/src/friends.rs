//! # Friend store
//!
//! The social graph. Each pair of identities has at most one
//! `friendships/{pair}` edge: `pending` from the request until the addressee
//! answers. Accepting and unfriending keep both identities' `friends` lists
//! in the same batch as the edge, and every edge transition is guarded on
//! the status it starts from.

use std::sync::Arc;

use domains::document::{collections, Direction, DocumentData, Query, Update, WriteBatch};
use domains::errors::{ValidationError, WriteError};
use domains::models::{pair_key, Friendship, FriendshipStatus, Identity};
use serde_json::Value;

use crate::backend::{Backend, Rules};
use crate::error::{Result, StoreError};
use crate::live::{self, SubscriptionSlot};
use crate::observable::Observable;
use crate::optimistic::{self, Compensation};
use crate::session::{SessionState, SessionStore};

fn status_value(status: FriendshipStatus) -> Result<Value> {
    serde_json::to_value(status).map_err(|e| ValidationError::new("status", e.to_string()).into())
}

/// Forward step putting a new edge at the top of the mirror; the inverse
/// drops it again unless it was accepted meanwhile.
fn insert_edge(edge: Friendship) -> impl FnOnce(&mut Vec<Friendship>) -> Option<Compensation<Vec<Friendship>>> {
    move |edges: &mut Vec<Friendship>| {
        if edges.iter().any(|e| e.id == edge.id) {
            return None;
        }
        let id = edge.id.clone();
        edges.insert(0, edge);
        Some(Box::new(move |edges: &mut Vec<Friendship>| {
            edges.retain(|e| e.id != id || e.status != FriendshipStatus::Pending);
        }))
    }
}

/// Forward step moving a mirrored edge to `status`.
fn set_status(
    edge_id: String,
    status: FriendshipStatus,
) -> impl FnOnce(&mut Vec<Friendship>) -> Option<Compensation<Vec<Friendship>>> {
    move |edges: &mut Vec<Friendship>| {
        let edge = edges.iter_mut().find(|e| e.id == edge_id)?;
        let previous = std::mem::replace(&mut edge.status, status);
        Some(Box::new(move |edges: &mut Vec<Friendship>| {
            if let Some(edge) = edges.iter_mut().find(|e| e.id == edge_id) {
                edge.status = previous;
            }
        }))
    }
}

/// Forward step adding or removing a friend on the session identity.
fn track_friend(uid: String, friend: bool) -> impl FnOnce(&mut SessionState) -> Option<Compensation<SessionState>> {
    move |state: &mut SessionState| {
        let identity = state.identity.as_mut()?;
        if !optimistic::set_membership(&mut identity.friends, &uid, friend) {
            return None;
        }
        Some(Box::new(move |state: &mut SessionState| {
            if let Some(identity) = state.identity.as_mut() {
                optimistic::set_membership(&mut identity.friends, &uid, !friend);
            }
        }))
    }
}

/// Whether a failed edge transition just means someone else got there first.
fn lost_race(err: &StoreError) -> bool {
    matches!(
        err,
        StoreError::Write(WriteError::Conflict(_) | WriteError::NotFound(_) | WriteError::AlreadyExists(_))
    )
}

#[derive(Clone)]
pub struct FriendStore {
    backend: Backend,
    session: SessionStore,
    rules: Arc<Rules>,
    edges: Observable<Vec<Friendship>>,
    subscription: Arc<SubscriptionSlot>,
}

impl FriendStore {
    pub fn new(backend: Backend, session: SessionStore, rules: Arc<Rules>) -> Self {
        Self {
            backend,
            session,
            rules,
            edges: Observable::default(),
            subscription: Arc::new(SubscriptionSlot::new()),
        }
    }

    /// Every edge touching the caller, pending or accepted.
    pub fn edges(&self) -> Observable<Vec<Friendship>> {
        self.edges.clone()
    }

    /// Uids of accepted friends, from the mirror.
    pub fn friends(&self) -> Vec<String> {
        let Some(uid) = self.session.uid() else {
            return Vec::new();
        };
        self.edges
            .get()
            .iter()
            .filter(|e| e.status == FriendshipStatus::Accepted)
            .filter_map(|e| e.other(&uid).map(str::to_string))
            .collect()
    }

    /// Pending requests waiting for the caller's answer.
    pub fn incoming(&self) -> Vec<Friendship> {
        self.pending(|edge, uid| edge.addressee_id == uid)
    }

    /// Pending requests the caller sent.
    pub fn outgoing(&self) -> Vec<Friendship> {
        self.pending(|edge, uid| edge.requester_id == uid)
    }

    fn pending(&self, side: impl Fn(&Friendship, &str) -> bool) -> Vec<Friendship> {
        let Some(uid) = self.session.uid() else {
            return Vec::new();
        };
        self.edges
            .get()
            .into_iter()
            .filter(|e| e.status == FriendshipStatus::Pending && side(e, &uid))
            .collect()
    }

    pub async fn watch(&self) -> Result<()> {
        let uid = self.session.require_identity()?.id;
        self.subscription.clear().await;
        let query = Query::collection(collections::FRIENDSHIPS)
            .where_array_contains("participants", uid)
            .order_by("createdAt", Direction::Descending)
            .limit(self.rules.page_size);
        let handle = live::mirror(&self.backend.documents, query, self.edges.clone()).await?;
        self.subscription.set(handle);
        Ok(())
    }

    pub async fn stop(&self) {
        self.subscription.clear().await;
        self.edges.replace(Vec::new());
    }

    /// Asks `uid` to be friends. Returns `false` when an edge between the two
    /// already exists in either direction.
    pub async fn send_request(&self, uid: &str) -> Result<bool> {
        let me = self.session.require_active()?;
        if uid == me.id {
            return Err(ValidationError::new("uid", "cannot befriend yourself").into());
        }
        if me.friends.iter().any(|f| f == uid) {
            return Ok(false);
        }
        let addressee: Identity = self
            .backend
            .documents
            .get(collections::USERS, uid)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("identity {uid}")))?
            .decode()?;

        let id = pair_key(&me.id, &addressee.id);
        let mut participants = vec![me.id.clone(), addressee.id.clone()];
        participants.sort();
        let edge = Friendship {
            id: id.clone(),
            participants,
            requester_id: me.id.clone(),
            requester_name: me.display_name.clone(),
            addressee_id: addressee.id.clone(),
            status: FriendshipStatus::Pending,
            ..Friendship::default()
        };
        let data = DocumentData::from_record(&edge)?.with_server_timestamp("createdAt");

        let result = optimistic::apply(
            &self.edges,
            "send_friend_request",
            insert_edge(edge),
            self.backend.documents.create(collections::FRIENDSHIPS, &id, data),
        )
        .await;
        match result {
            Ok(()) => {
                tracing::info!(from = %me.id, to = %uid, "friend request sent");
                Ok(true)
            }
            Err(StoreError::Write(WriteError::AlreadyExists(_))) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Accepts the pending request from `uid`. Returns `false` when there is
    /// nothing left to accept.
    pub async fn accept(&self, uid: &str) -> Result<bool> {
        let me = self.session.require_active()?;
        let id = pair_key(&me.id, uid);
        let Some(edge) = self.find(&id).await? else {
            return Ok(false);
        };
        if edge.addressee_id != me.id {
            return Err(StoreError::Forbidden("only the addressee can accept a friend request".into()));
        }
        if edge.status != FriendshipStatus::Pending {
            return Ok(false);
        }

        let batch = WriteBatch::new()
            .expect_field(collections::FRIENDSHIPS, id.clone(), "status", status_value(FriendshipStatus::Pending)?)
            .update(
                collections::FRIENDSHIPS,
                id.clone(),
                Update::new()
                    .set("status", status_value(FriendshipStatus::Accepted)?)
                    .server_timestamp("respondedAt"),
            )
            .update(collections::USERS, me.id.clone(), Update::new().array_union("friends", uid))
            .update(collections::USERS, uid, Update::new().array_union("friends", me.id.as_str()));

        let result = optimistic::apply(
            &self.edges,
            "accept_friend",
            set_status(id.clone(), FriendshipStatus::Accepted),
            optimistic::apply(
                self.session.state(),
                "accept_friend",
                track_friend(uid.to_string(), true),
                self.backend.documents.commit(batch),
            ),
        )
        .await;
        match result {
            Ok(()) => {
                tracing::info!(uid = %me.id, friend = %uid, "friend request accepted");
                Ok(true)
            }
            Err(e) if lost_race(&e) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Turns down the pending request from `uid`; the edge is deleted so
    /// either side may ask again later.
    pub async fn decline(&self, uid: &str) -> Result<bool> {
        let me = self.session.require_active()?;
        let id = pair_key(&me.id, uid);
        let Some(edge) = self.find(&id).await? else {
            return Ok(false);
        };
        if edge.addressee_id != me.id {
            return Err(StoreError::Forbidden("only the addressee can decline a friend request".into()));
        }
        if edge.status != FriendshipStatus::Pending {
            return Ok(false);
        }

        let batch = WriteBatch::new()
            .expect_field(collections::FRIENDSHIPS, id.clone(), "status", status_value(FriendshipStatus::Pending)?)
            .delete_existing(collections::FRIENDSHIPS, id.clone());
        let result = optimistic::apply(
            &self.edges,
            "decline_friend",
            optimistic::hide_item(id),
            self.backend.documents.commit(batch),
        )
        .await;
        match result {
            Ok(()) => {
                tracing::info!(uid = %me.id, requester = %uid, "friend request declined");
                Ok(true)
            }
            Err(e) if lost_race(&e) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Unfriends `uid`, or withdraws a request still pending between the
    /// two. Returns `false` when there was no edge.
    pub async fn remove(&self, uid: &str) -> Result<bool> {
        let me = self.session.require_active()?;
        let id = pair_key(&me.id, uid);
        let Some(edge) = self.find(&id).await? else {
            return Ok(false);
        };

        let mut batch = WriteBatch::new()
            .expect_field(collections::FRIENDSHIPS, id.clone(), "status", status_value(edge.status)?)
            .delete_existing(collections::FRIENDSHIPS, id.clone());
        let accepted = edge.status == FriendshipStatus::Accepted;
        if accepted {
            batch = batch
                .update(collections::USERS, me.id.clone(), Update::new().array_remove("friends", uid))
                .update(collections::USERS, uid, Update::new().array_remove("friends", me.id.as_str()));
        }

        let remote = async {
            if accepted {
                optimistic::apply(
                    self.session.state(),
                    "remove_friend",
                    track_friend(uid.to_string(), false),
                    self.backend.documents.commit(batch),
                )
                .await
            } else {
                self.backend.documents.commit(batch).await.map_err(StoreError::from)
            }
        };
        let result = optimistic::apply(&self.edges, "remove_friend", optimistic::hide_item(id), remote).await;
        match result {
            Ok(()) => {
                tracing::info!(uid = %me.id, other = %uid, accepted, "friend edge removed");
                Ok(true)
            }
            Err(e) if lost_race(&e) => {
                // The edge is already gone remotely.
                if accepted {
                    self.session.update_identity(|i| {
                        optimistic::set_membership(&mut i.friends, uid, false);
                    });
                }
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// The edge with `id`, from the mirror when present.
    async fn find(&self, id: &str) -> Result<Option<Friendship>> {
        if let Some(edge) = self.edges.get().into_iter().find(|e| e.id == id) {
            return Ok(Some(edge));
        }
        match self.backend.documents.get(collections::FRIENDSHIPS, id).await? {
            Some(doc) => Ok(Some(doc.decode()?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edge(status: FriendshipStatus) -> Friendship {
        Friendship {
            id: pair_key("a", "b"),
            participants: vec!["a".into(), "b".into()],
            requester_id: "a".into(),
            addressee_id: "b".into(),
            status,
            ..Friendship::default()
        }
    }

    #[test]
    fn a_reverted_request_leaves_an_accepted_edge_alone() {
        let mut edges = Vec::new();
        let undo = insert_edge(edge(FriendshipStatus::Pending))(&mut edges).unwrap();
        assert_eq!(edges.len(), 1);

        edges[0].status = FriendshipStatus::Accepted;
        undo(&mut edges);
        assert_eq!(edges.len(), 1);

        assert!(insert_edge(edge(FriendshipStatus::Pending))(&mut edges).is_none());
    }

    #[test]
    fn status_changes_are_undone_in_place() {
        let mut edges = vec![edge(FriendshipStatus::Pending)];
        let undo = set_status(pair_key("a", "b"), FriendshipStatus::Accepted)(&mut edges).unwrap();
        assert_eq!(edges[0].status, FriendshipStatus::Accepted);
        undo(&mut edges);
        assert_eq!(edges[0].status, FriendshipStatus::Pending);
    }

    #[test]
    fn concurrent_transitions_count_as_lost_races() {
        assert!(lost_race(&StoreError::Write(WriteError::Conflict("x".into()))));
        assert!(lost_race(&StoreError::Write(WriteError::NotFound("x".into()))));
        assert!(!lost_race(&StoreError::Write(WriteError::Unavailable("x".into()))));
    }
}
