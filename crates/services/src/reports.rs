//! # Reports store
//!
//! Lets any active identity flag content for admin review.

use domains::document::{collections, DocumentData};
use domains::errors::require_text;
use domains::models::{ContentKind, ContentReport, ReportStatus};

use crate::backend::Backend;
use crate::error::Result;
use crate::session::SessionStore;

#[derive(Clone)]
pub struct ReportStore {
    backend: Backend,
    session: SessionStore,
}

impl ReportStore {
    pub fn new(backend: Backend, session: SessionStore) -> Self {
        Self { backend, session }
    }

    /// Files a pending report and returns its id.
    pub async fn report_content(&self, content_id: &str, content: ContentKind, reason: &str) -> Result<String> {
        let reporter = self.session.require_active()?;
        let content_id = require_text("contentId", content_id)?;
        let reason = require_text("reason", reason)?;

        let report = ContentReport {
            reporter_id: reporter.id,
            content_id,
            content,
            reason,
            status: ReportStatus::Pending,
            ..ContentReport::default()
        };
        let data = DocumentData::from_record(&report)?.with_server_timestamp("createdAt");
        let id = self.backend.documents.add(collections::CONTENT_REPORTS, data).await?;
        tracing::info!(report_id = %id, content_id = %report.content_id, "content reported");
        Ok(id)
    }
}
