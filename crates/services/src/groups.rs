//! # Groups store
//!
//! Membership is `non-member -> member -> non-member`; the creator is the
//! owner and cannot leave. Create, join and leave each commit one batch that
//! writes the membership document, the group's `memberCount` and the
//! identity's `groups` list together. The membership create/delete is a
//! precondition of the batch, so repeating a join or leave changes nothing.

use std::sync::Arc;

use domains::document::{collections, Direction, DocumentData, Query, Update, WriteBatch};
use domains::errors::{require_text, WriteError};
use domains::models::{Group, GroupMember, GroupPost, Identity, MemberRole};

use crate::backend::{Backend, Rules};
use crate::error::{Result, StoreError};
use crate::live::{self, SubscriptionSlot};
use crate::observable::Observable;
use crate::optimistic::{self, Compensation};
use crate::session::{SessionState, SessionStore};

#[derive(Debug, Clone, Default)]
pub struct NewGroup {
    pub name: String,
    pub description: String,
    pub category: String,
    pub is_private: bool,
}

fn member_record(identity: &Identity, role: MemberRole) -> Result<DocumentData> {
    let member = GroupMember {
        display_name: identity.display_name.clone(),
        role,
        ..GroupMember::default()
    };
    Ok(DocumentData::from_record(&member)?.with_server_timestamp("joinedAt"))
}

/// Forward step adjusting a mirrored group's member count by `delta`.
fn adjust_member_count(group_id: String, delta: i64) -> impl FnOnce(&mut Vec<Group>) -> Option<Compensation<Vec<Group>>> {
    move |groups: &mut Vec<Group>| {
        groups.iter_mut().find(|g| g.id == group_id)?.member_count += delta;
        Some(Box::new(move |groups: &mut Vec<Group>| {
            if let Some(group) = groups.iter_mut().find(|g| g.id == group_id) {
                group.member_count -= delta;
            }
        }))
    }
}

/// Forward step adding or removing a group id on the session identity.
fn track_membership(group_id: String, member: bool) -> impl FnOnce(&mut SessionState) -> Option<Compensation<SessionState>> {
    move |state: &mut SessionState| {
        let identity = state.identity.as_mut()?;
        if !optimistic::set_membership(&mut identity.groups, &group_id, member) {
            return None;
        }
        Some(Box::new(move |state: &mut SessionState| {
            if let Some(identity) = state.identity.as_mut() {
                optimistic::set_membership(&mut identity.groups, &group_id, !member);
            }
        }))
    }
}

#[derive(Clone)]
pub struct GroupStore {
    backend: Backend,
    session: SessionStore,
    rules: Arc<Rules>,
    groups: Observable<Vec<Group>>,
    posts: Observable<Vec<GroupPost>>,
    groups_subscription: Arc<SubscriptionSlot>,
    posts_subscription: Arc<SubscriptionSlot>,
}

impl GroupStore {
    pub fn new(backend: Backend, session: SessionStore, rules: Arc<Rules>) -> Self {
        Self {
            backend,
            session,
            rules,
            groups: Observable::default(),
            posts: Observable::default(),
            groups_subscription: Arc::new(SubscriptionSlot::new()),
            posts_subscription: Arc::new(SubscriptionSlot::new()),
        }
    }

    pub fn groups(&self) -> Observable<Vec<Group>> {
        self.groups.clone()
    }

    pub fn posts(&self) -> Observable<Vec<GroupPost>> {
        self.posts.clone()
    }

    /// Whether the signed-in identity belongs to `group_id`.
    pub fn is_member(&self, group_id: &str) -> bool {
        self.session
            .identity()
            .is_some_and(|identity| identity.groups.iter().any(|g| g == group_id))
    }

    pub async fn watch_groups(&self, category: Option<&str>) -> Result<()> {
        self.groups_subscription.clear().await;
        let mut query = Query::collection(collections::GROUPS)
            .order_by("createdAt", Direction::Descending)
            .limit(self.rules.page_size);
        if let Some(category) = category {
            query = query.where_eq("category", category);
        }
        let handle = live::mirror(&self.backend.documents, query, self.groups.clone()).await?;
        self.groups_subscription.set(handle);
        Ok(())
    }

    pub async fn watch_posts(&self, group_id: &str) -> Result<()> {
        self.posts_subscription.clear().await;
        self.posts.replace(Vec::new());
        let query = Query::collection(collections::group_posts(group_id))
            .order_by("createdAt", Direction::Descending)
            .limit(self.rules.page_size);
        let handle = live::mirror(&self.backend.documents, query, self.posts.clone()).await?;
        self.posts_subscription.set(handle);
        Ok(())
    }

    pub async fn stop(&self) {
        self.posts_subscription.clear().await;
        self.groups_subscription.clear().await;
        self.posts.replace(Vec::new());
        self.groups.replace(Vec::new());
    }

    /// Creates a group owned by the caller, who becomes its first member.
    pub async fn create_group(&self, group: NewGroup) -> Result<String> {
        let owner = self.session.require_active()?;
        let name = require_text("name", &group.name)?;
        let category = require_text("category", &group.category)?;

        let id = self.backend.documents.new_id();
        let record = Group {
            name,
            description: group.description.trim().to_string(),
            category,
            owner_id: owner.id.clone(),
            member_count: 1,
            is_private: group.is_private,
            ..Group::default()
        };
        let batch = WriteBatch::new()
            .create(
                collections::GROUPS,
                id.clone(),
                DocumentData::from_record(&record)?.with_server_timestamp("createdAt"),
            )
            .create(
                collections::group_members(&id),
                owner.id.clone(),
                member_record(&owner, MemberRole::Owner)?,
            )
            .update(
                collections::USERS,
                owner.id.clone(),
                Update::new().array_union("groups", id.as_str()),
            );

        optimistic::apply(
            self.session.state(),
            "create_group",
            track_membership(id.clone(), true),
            self.backend.documents.commit(batch),
        )
        .await?;
        tracing::info!(group_id = %id, owner = %owner.id, "group created");
        Ok(id)
    }

    /// Joins `group_id`. Returns `false` when the caller already belongs to
    /// it, in which case nothing is written.
    pub async fn join_group(&self, group_id: &str) -> Result<bool> {
        let identity = self.session.require_active()?;
        if identity.groups.iter().any(|g| g == group_id) {
            return Ok(false);
        }

        let batch = WriteBatch::new()
            .create(
                collections::group_members(group_id),
                identity.id.clone(),
                member_record(&identity, MemberRole::Member)?,
            )
            .update(collections::GROUPS, group_id, Update::new().increment("memberCount", 1))
            .update(
                collections::USERS,
                identity.id.clone(),
                Update::new().array_union("groups", group_id),
            );

        let result = optimistic::apply(
            &self.groups,
            "join_group",
            adjust_member_count(group_id.to_string(), 1),
            optimistic::apply(
                self.session.state(),
                "join_group",
                track_membership(group_id.to_string(), true),
                self.backend.documents.commit(batch),
            ),
        )
        .await;

        match result {
            Ok(()) => {
                tracing::info!(group_id = %group_id, uid = %identity.id, "joined group");
                Ok(true)
            }
            Err(StoreError::Write(WriteError::AlreadyExists(_))) => {
                // Already a member remotely; only the local list was stale.
                self.session.update_identity(|i| {
                    optimistic::set_membership(&mut i.groups, group_id, true);
                });
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Leaves `group_id`. Returns `false` when the caller was not a member.
    pub async fn leave_group(&self, group_id: &str) -> Result<bool> {
        let identity = self.session.require_identity()?;
        let group = self.find(group_id).await?;
        if group.owner_id == identity.id {
            return Err(StoreError::Forbidden("the owner cannot leave their group".into()));
        }

        let batch = WriteBatch::new()
            .delete_existing(collections::group_members(group_id), identity.id.clone())
            .update(collections::GROUPS, group_id, Update::new().increment("memberCount", -1))
            .update(
                collections::USERS,
                identity.id.clone(),
                Update::new().array_remove("groups", group_id),
            );

        let result = optimistic::apply(
            &self.groups,
            "leave_group",
            adjust_member_count(group_id.to_string(), -1),
            optimistic::apply(
                self.session.state(),
                "leave_group",
                track_membership(group_id.to_string(), false),
                self.backend.documents.commit(batch),
            ),
        )
        .await;

        match result {
            Ok(()) => {
                tracing::info!(group_id = %group_id, uid = %identity.id, "left group");
                Ok(true)
            }
            Err(StoreError::Write(WriteError::NotFound(_))) => {
                self.session.update_identity(|i| {
                    optimistic::set_membership(&mut i.groups, group_id, false);
                });
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Members of a group in join order.
    pub async fn members(&self, group_id: &str) -> Result<Vec<GroupMember>> {
        let query =
            Query::collection(collections::group_members(group_id)).order_by("joinedAt", Direction::Ascending);
        let docs = self.backend.documents.query(&query).await?;
        Ok(live::decode_visible(&query.collection, docs))
    }

    /// Posts to a group; only members may post.
    pub async fn create_post(&self, group_id: &str, content: &str) -> Result<String> {
        let author = self.session.require_active()?;
        if !author.groups.iter().any(|g| g == group_id) {
            return Err(StoreError::Forbidden("only members can post in a group".into()));
        }
        let content = require_text("content", content)?;

        let post = GroupPost {
            group_id: group_id.to_string(),
            author_id: author.id,
            author_name: author.display_name,
            content,
            ..GroupPost::default()
        };
        let data = DocumentData::from_record(&post)?.with_server_timestamp("createdAt");
        let id = self
            .backend
            .documents
            .add(&collections::group_posts(group_id), data)
            .await?;
        Ok(id)
    }

    /// Flips the caller's like on a group post; returns whether it is liked.
    pub async fn toggle_post_like(&self, group_id: &str, post_id: &str) -> Result<bool> {
        let uid = self.session.require_active()?.id;
        let collection = collections::group_posts(group_id);
        let mirrored = self
            .posts
            .read(|posts| posts.iter().find(|p| p.id == post_id).map(|p| p.likes.contains(&uid)));
        let liked = match mirrored {
            Some(liked) => liked,
            None => {
                let post: GroupPost = self
                    .backend
                    .documents
                    .get(&collection, post_id)
                    .await?
                    .ok_or_else(|| StoreError::NotFound(format!("group post {post_id}")))?
                    .decode()?;
                post.likes.contains(&uid)
            }
        };

        let like = !liked;
        let remote = if like {
            Update::new().array_union("likes", uid.as_str())
        } else {
            Update::new().array_remove("likes", uid.as_str())
        };
        optimistic::apply(
            &self.posts,
            "toggle_post_like",
            optimistic::toggle_membership(post_id.to_string(), uid, like, |p: &mut GroupPost| &mut p.likes),
            self.backend.documents.update(&collection, post_id, remote),
        )
        .await?;
        Ok(like)
    }

    async fn find(&self, group_id: &str) -> Result<Group> {
        if let Some(group) = self.groups.read(|groups| groups.iter().find(|g| g.id == group_id).cloned()) {
            return Ok(group);
        }
        let group: Group = self
            .backend
            .documents
            .get(collections::GROUPS, group_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("group {group_id}")))?
            .decode()?;
        Ok(group)
    }
}
