//! # Admin store
//!
//! Moderation actions for identities whose local `isAdmin` flag is set.
//! Every action returns early without touching anything when the caller is
//! not an admin; this is a convenience guard only, the backend enforces
//! authorization.
//!
//! A mutation commits the target write and its audit-log entry in one
//! batch, then updates the local mirrors.

use domains::document::{collections, Direction, DocumentData, Query, Update, WriteBatch};
use domains::errors::{require_text, ValidationError};
use domains::models::{
    Analytics, ContentKind, ContentReport, DiscussionPost, Group, Identity, ModerationAction, ModerationLogEntry,
    ReportStatus,
};
use serde_json::Value;

use crate::backend::Backend;
use crate::error::Result;
use crate::live;
use crate::observable::Observable;
use crate::session::SessionStore;

#[derive(Clone)]
pub struct AdminStore {
    backend: Backend,
    session: SessionStore,
    users: Observable<Vec<Identity>>,
    reports: Observable<Vec<ContentReport>>,
    log: Observable<Vec<ModerationLogEntry>>,
    analytics: Observable<Analytics>,
}

impl AdminStore {
    pub fn new(backend: Backend, session: SessionStore) -> Self {
        Self {
            backend,
            session,
            users: Observable::default(),
            reports: Observable::default(),
            log: Observable::default(),
            analytics: Observable::default(),
        }
    }

    pub fn users(&self) -> Observable<Vec<Identity>> {
        self.users.clone()
    }

    pub fn reports(&self) -> Observable<Vec<ContentReport>> {
        self.reports.clone()
    }

    pub fn moderation_log(&self) -> Observable<Vec<ModerationLogEntry>> {
        self.log.clone()
    }

    pub fn analytics(&self) -> Observable<Analytics> {
        self.analytics.clone()
    }

    pub fn clear(&self) {
        self.users.replace(Vec::new());
        self.reports.replace(Vec::new());
        self.log.replace(Vec::new());
        self.analytics.replace(Analytics::default());
    }

    /// Uid of the acting admin, or `None` (logged) when the caller is not one.
    fn acting_admin(&self, action: &str) -> Option<String> {
        if !self.session.is_admin() {
            tracing::debug!(action, "ignoring admin action from a non-admin session");
            return None;
        }
        self.session.uid()
    }

    pub async fn fetch_users(&self) -> Result<Vec<Identity>> {
        if self.acting_admin("fetch_users").is_none() {
            return Ok(Vec::new());
        }
        let query = Query::collection(collections::USERS).order_by("createdAt", Direction::Descending);
        let docs = self.backend.documents.query(&query).await?;
        let users: Vec<Identity> = live::decode_visible(collections::USERS, docs);
        self.users.replace(users.clone());
        Ok(users)
    }

    pub async fn fetch_analytics(&self) -> Result<Analytics> {
        if self.acting_admin("fetch_analytics").is_none() {
            return Ok(Analytics::default());
        }
        let documents = &self.backend.documents;

        let users: Vec<Identity> = live::decode_visible(
            collections::USERS,
            documents.query(&Query::collection(collections::USERS)).await?,
        );
        let discussions = documents.query(&Query::collection(collections::DISCUSSIONS)).await?;
        let deleted_discussions = discussions
            .iter()
            .filter_map(|doc| doc.decode::<DiscussionPost>().ok())
            .filter(|post| post.deleted)
            .count();
        let groups: Vec<Group> = live::decode_visible(
            collections::GROUPS,
            documents.query(&Query::collection(collections::GROUPS)).await?,
        );
        let pending_reports = documents
            .query(&Query::collection(collections::CONTENT_REPORTS).where_eq("status", "pending"))
            .await?
            .len();

        let analytics = Analytics {
            total_users: users.len(),
            admins: users.iter().filter(|u| u.roles.is_admin).count(),
            moderators: users.iter().filter(|u| u.roles.is_moderator).count(),
            banned_users: users.iter().filter(|u| u.roles.is_banned).count(),
            total_discussions: discussions.len() - deleted_discussions,
            deleted_discussions,
            total_groups: groups.len(),
            pending_reports,
        };
        self.analytics.replace(analytics.clone());
        Ok(analytics)
    }

    pub async fn fetch_reports(&self) -> Result<Vec<ContentReport>> {
        if self.acting_admin("fetch_reports").is_none() {
            return Ok(Vec::new());
        }
        let query = Query::collection(collections::CONTENT_REPORTS).order_by("createdAt", Direction::Descending);
        let reports: Vec<ContentReport> =
            live::decode_visible(collections::CONTENT_REPORTS, self.backend.documents.query(&query).await?);
        self.reports.replace(reports.clone());
        Ok(reports)
    }

    pub async fn fetch_moderation_log(&self, limit: usize) -> Result<Vec<ModerationLogEntry>> {
        if self.acting_admin("fetch_moderation_log").is_none() {
            return Ok(Vec::new());
        }
        let query = Query::collection(collections::MODERATION_LOG)
            .order_by("timestamp", Direction::Descending)
            .limit(limit);
        let entries: Vec<ModerationLogEntry> =
            live::decode_visible(collections::MODERATION_LOG, self.backend.documents.query(&query).await?);
        self.log.replace(entries.clone());
        Ok(entries)
    }

    pub async fn set_moderator_status(&self, uid: &str, is_moderator: bool) -> Result<()> {
        let Some(admin) = self.acting_admin("set_moderator_status") else {
            return Ok(());
        };
        let action = if is_moderator {
            ModerationAction::GrantModerator
        } else {
            ModerationAction::RevokeModerator
        };
        let batch = WriteBatch::new().update(
            collections::USERS,
            uid,
            Update::new().set("isModerator", is_moderator),
        );
        self.commit_logged(batch, &admin, uid, action, None).await?;

        self.update_user(uid, |user| user.roles.is_moderator = is_moderator);
        Ok(())
    }

    pub async fn ban_user(&self, uid: &str, reason: &str) -> Result<()> {
        let Some(admin) = self.acting_admin("ban_user") else {
            return Ok(());
        };
        let reason = require_text("reason", reason)?;
        if uid == admin {
            return Err(ValidationError::new("uid", "admins cannot ban themselves").into());
        }

        let batch = WriteBatch::new().update(
            collections::USERS,
            uid,
            Update::new()
                .set("isBanned", true)
                .set("banReason", reason.as_str())
                .set("bannedBy", admin.as_str())
                .server_timestamp("bannedAt"),
        );
        self.commit_logged(batch, &admin, uid, ModerationAction::BanUser, Some(reason.clone()))
            .await?;

        let banned_by = admin.clone();
        self.update_user(uid, move |user| {
            user.roles.is_banned = true;
            user.ban_reason = Some(reason);
            user.banned_by = Some(banned_by);
        });
        tracing::info!(admin = %admin, target = %uid, "user banned");
        Ok(())
    }

    pub async fn unban_user(&self, uid: &str) -> Result<()> {
        let Some(admin) = self.acting_admin("unban_user") else {
            return Ok(());
        };
        let batch = WriteBatch::new().update(
            collections::USERS,
            uid,
            Update::new()
                .set("isBanned", false)
                .set("banReason", Value::Null)
                .set("bannedBy", Value::Null)
                .set("bannedAt", Value::Null),
        );
        self.commit_logged(batch, &admin, uid, ModerationAction::UnbanUser, None)
            .await?;

        self.update_user(uid, |user| {
            user.roles.is_banned = false;
            user.ban_reason = None;
            user.banned_by = None;
            user.banned_at = None;
        });
        tracing::info!(admin = %admin, target = %uid, "user unbanned");
        Ok(())
    }

    pub async fn resolve_report(&self, report_id: &str, resolution: &str) -> Result<()> {
        let Some(admin) = self.acting_admin("resolve_report") else {
            return Ok(());
        };
        let resolution = require_text("resolution", resolution)?;
        self.close_report(
            &admin,
            report_id,
            ReportStatus::Resolved,
            Some(resolution),
            ModerationAction::ResolveReport,
        )
        .await
    }

    pub async fn dismiss_report(&self, report_id: &str) -> Result<()> {
        let Some(admin) = self.acting_admin("dismiss_report") else {
            return Ok(());
        };
        self.close_report(&admin, report_id, ReportStatus::Dismissed, None, ModerationAction::DismissReport)
            .await
    }

    /// Soft-deletes any piece of user content.
    pub async fn delete_content(&self, content_id: &str, kind: &ContentKind, reason: Option<&str>) -> Result<()> {
        let Some(admin) = self.acting_admin("delete_content") else {
            return Ok(());
        };
        let batch = WriteBatch::new().update(
            kind.collection(),
            content_id,
            Update::new().set("deleted", true),
        );
        let reason = reason.map(str::trim).filter(|r| !r.is_empty()).map(str::to_string);
        self.commit_logged(batch, &admin, content_id, ModerationAction::DeleteContent, reason)
            .await?;
        tracing::info!(admin = %admin, content_id = %content_id, collection = %kind.collection(), "content deleted");
        Ok(())
    }

    async fn close_report(
        &self,
        admin: &str,
        report_id: &str,
        status: ReportStatus,
        resolution: Option<String>,
        action: ModerationAction,
    ) -> Result<()> {
        let status_value = serde_json::to_value(status).map_err(|e| ValidationError::new("status", e.to_string()))?;
        let batch = WriteBatch::new().update(
            collections::CONTENT_REPORTS,
            report_id,
            Update::new()
                .set("status", status_value)
                .set("resolution", resolution.clone().map_or(Value::Null, Value::String))
                .set("resolvedBy", admin)
                .server_timestamp("resolvedAt"),
        );
        self.commit_logged(batch, admin, report_id, action, resolution.clone())
            .await?;

        let resolved_by = admin.to_string();
        self.reports.update_if(|reports| match reports.iter_mut().find(|r| r.id == report_id) {
            Some(report) => {
                report.status = status;
                report.resolution = resolution;
                report.resolved_by = Some(resolved_by);
                true
            }
            None => false,
        });
        Ok(())
    }

    /// Commits `batch` together with its audit-log entry.
    async fn commit_logged(
        &self,
        batch: WriteBatch,
        admin: &str,
        target: &str,
        action: ModerationAction,
        reason: Option<String>,
    ) -> Result<()> {
        let entry = ModerationLogEntry {
            admin_id: admin.to_string(),
            target_id: target.to_string(),
            action,
            reason,
            ..ModerationLogEntry::default()
        };
        let log_id = self.backend.documents.new_id();
        let batch = batch.create(
            collections::MODERATION_LOG,
            log_id,
            DocumentData::from_record(&entry)?.with_server_timestamp("timestamp"),
        );
        if let Err(e) = self.backend.documents.commit(batch).await {
            tracing::warn!(admin = %admin, target = %target, ?action, error = %e, "moderation action failed");
            return Err(e.into());
        }
        Ok(())
    }

    fn update_user(&self, uid: &str, f: impl FnOnce(&mut Identity)) {
        self.users.update_if(|users| match users.iter_mut().find(|u| u.id == uid) {
            Some(user) => {
                f(user);
                true
            }
            None => false,
        });
    }
}
