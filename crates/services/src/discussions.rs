//! # Discussions store
//!
//! Live discussion feed with likes, emoji reactions, comments and optional
//! image attachments.

use std::sync::Arc;

use bytes::Bytes;
use domains::document::{collections, Direction, DocumentData, Query, Update, WriteBatch};
use domains::errors::{require_text, ValidationError};
use domains::models::{Comment, DiscussionPost};

use crate::backend::{Backend, Rules};
use crate::error::{Result, StoreError};
use crate::live::{self, SubscriptionSlot, SubscriptionStatus};
use crate::observable::Observable;
use crate::optimistic::{self, Compensation};
use crate::session::SessionStore;

pub const DEFAULT_CATEGORY: &str = "general";

/// An image to attach to a new post.
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub data: Bytes,
    pub content_type: mime::Mime,
}

#[derive(Debug, Clone, Default)]
pub struct NewPost {
    pub title: String,
    pub content: String,
    pub category: Option<String>,
    pub image: Option<ImageUpload>,
}

#[derive(Clone)]
pub struct DiscussionStore {
    backend: Backend,
    session: SessionStore,
    rules: Arc<Rules>,
    feed: Observable<Vec<DiscussionPost>>,
    subscription: Arc<SubscriptionSlot>,
}

impl DiscussionStore {
    pub fn new(backend: Backend, session: SessionStore, rules: Arc<Rules>) -> Self {
        Self {
            backend,
            session,
            rules,
            feed: Observable::default(),
            subscription: Arc::new(SubscriptionSlot::new()),
        }
    }

    pub fn feed(&self) -> Observable<Vec<DiscussionPost>> {
        self.feed.clone()
    }

    pub fn posts(&self) -> Vec<DiscussionPost> {
        self.feed.get()
    }

    pub fn feed_status(&self) -> SubscriptionStatus {
        self.subscription.status()
    }

    /// Mirrors the newest posts, optionally narrowed to one category. Any
    /// previous feed subscription is released first.
    pub async fn watch_feed(&self, category: Option<&str>) -> Result<()> {
        self.subscription.clear().await;
        let mut query = Query::collection(collections::DISCUSSIONS)
            .order_by("createdAt", Direction::Descending)
            .limit(self.rules.page_size);
        if let Some(category) = category {
            query = query.where_eq("category", category);
        }
        let handle = live::mirror(&self.backend.documents, query, self.feed.clone()).await?;
        self.subscription.set(handle);
        Ok(())
    }

    pub async fn stop(&self) {
        self.subscription.clear().await;
        self.feed.replace(Vec::new());
    }

    pub async fn create_post(&self, post: NewPost) -> Result<String> {
        let author = self.session.require_active()?;
        let title = require_text("title", &post.title)?;
        let content = require_text("content", &post.content)?;
        let category = match post.category.as_deref() {
            Some(c) => require_text("category", c)?,
            None => DEFAULT_CATEGORY.to_string(),
        };

        let image_url = match post.image {
            Some(image) => Some(self.backend.objects.upload(image.data, &image.content_type).await?),
            None => None,
        };

        let record = DiscussionPost {
            author_id: author.id.clone(),
            author_name: author.display_name,
            title,
            content,
            category,
            image_url,
            ..DiscussionPost::default()
        };
        let data = DocumentData::from_record(&record)?.with_server_timestamp("createdAt");
        let id = self.backend.documents.add(collections::DISCUSSIONS, data).await?;
        tracing::info!(post_id = %id, author = %author.id, "discussion posted");
        Ok(id)
    }

    /// Flips the caller's like and returns whether the post is now liked.
    pub async fn toggle_like(&self, post_id: &str) -> Result<bool> {
        let uid = self.session.require_active()?.id;
        let post = self.find(post_id).await?;
        let like = !post.likes.contains(&uid);

        let remote = if like {
            Update::new().array_union("likes", uid.as_str())
        } else {
            Update::new().array_remove("likes", uid.as_str())
        };
        optimistic::apply(
            &self.feed,
            "toggle_like",
            optimistic::toggle_membership(post_id.to_string(), uid, like, |p: &mut DiscussionPost| &mut p.likes),
            self.backend.documents.update(collections::DISCUSSIONS, post_id, remote),
        )
        .await?;
        Ok(like)
    }

    /// Flips the caller's `emoji` reaction; returns whether it is now set.
    pub async fn toggle_reaction(&self, post_id: &str, emoji: &str) -> Result<bool> {
        let uid = self.session.require_active()?.id;
        let emoji = require_text("emoji", emoji)?;
        if emoji.contains('.') {
            return Err(ValidationError::new("emoji", "must not contain '.'").into());
        }
        let post = self.find(post_id).await?;
        let react = !post.reactions.get(&emoji).is_some_and(|uids| uids.contains(&uid));

        let path = format!("reactions.{emoji}");
        let remote = if react {
            Update::new().array_union(path, uid.as_str())
        } else {
            Update::new().array_remove(path, uid.as_str())
        };
        optimistic::apply(
            &self.feed,
            "toggle_reaction",
            optimistic::toggle_membership(post_id.to_string(), uid, react, move |p: &mut DiscussionPost| {
                p.reactions.entry(emoji.clone()).or_default()
            }),
            self.backend.documents.update(collections::DISCUSSIONS, post_id, remote),
        )
        .await?;
        Ok(react)
    }

    /// Adds a comment and bumps the post's comment count in one batch.
    pub async fn add_comment(&self, post_id: &str, text: &str) -> Result<String> {
        let author = self.session.require_active()?;
        let text = require_text("text", text)?;

        let id = self.backend.documents.new_id();
        let comment = Comment {
            author_id: author.id,
            author_name: author.display_name,
            text,
            ..Comment::default()
        };
        let batch = WriteBatch::new()
            .create(
                collections::comments(post_id),
                id.clone(),
                DocumentData::from_record(&comment)?.with_server_timestamp("createdAt"),
            )
            .update(
                collections::DISCUSSIONS,
                post_id,
                Update::new().increment("commentCount", 1),
            );

        let target = post_id.to_string();
        optimistic::apply(
            &self.feed,
            "add_comment",
            move |posts: &mut Vec<DiscussionPost>| -> Option<Compensation<Vec<DiscussionPost>>> {
                posts.iter_mut().find(|p| p.id == target)?.comment_count += 1;
                Some(Box::new(move |posts: &mut Vec<DiscussionPost>| {
                    if let Some(post) = posts.iter_mut().find(|p| p.id == target) {
                        post.comment_count -= 1;
                    }
                }))
            },
            self.backend.documents.commit(batch),
        )
        .await?;
        Ok(id)
    }

    /// Visible comments on a post, oldest first.
    pub async fn comments(&self, post_id: &str) -> Result<Vec<Comment>> {
        let query = Query::collection(collections::comments(post_id)).order_by("createdAt", Direction::Ascending);
        let docs = self.backend.documents.query(&query).await?;
        Ok(live::decode_visible(&query.collection, docs))
    }

    /// Soft-deletes one of the caller's own posts.
    pub async fn delete_post(&self, post_id: &str) -> Result<()> {
        let uid = self.session.require_active()?.id;
        let post = self.find(post_id).await?;
        if post.author_id != uid {
            return Err(StoreError::Forbidden("only the author can delete a post".into()));
        }

        optimistic::apply(
            &self.feed,
            "delete_post",
            optimistic::hide_item(post_id.to_string()),
            self.backend
                .documents
                .update(collections::DISCUSSIONS, post_id, Update::new().set("deleted", true)),
        )
        .await?;
        tracing::info!(post_id = %post_id, "discussion deleted");
        Ok(())
    }

    /// The mirrored copy when present, otherwise a remote read.
    async fn find(&self, post_id: &str) -> Result<DiscussionPost> {
        if let Some(post) = self.feed.read(|posts| posts.iter().find(|p| p.id == post_id).cloned()) {
            return Ok(post);
        }
        let doc = self
            .backend
            .documents
            .get(collections::DISCUSSIONS, post_id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("discussion {post_id}")))?;
        let post: DiscussionPost = doc.decode()?;
        if post.deleted {
            return Err(StoreError::NotFound(format!("discussion {post_id}")));
        }
        Ok(post)
    }
}
