//! Admin moderation: bans, roles, reports, content removal and the audit
//! trail each of them leaves.

use domains::document::collections;
use domains::models::{ContentKind, DiscussionPost, ModerationAction, ReportStatus};
use integration_tests::{wait_for, Harness, ADMIN_EMAIL};
use services::discussions::NewPost;
use services::StoreError;

fn post() -> NewPost {
    NewPost {
        title: "Buy cheap watches".into(),
        content: "Totally legit link".into(),
        ..NewPost::default()
    }
}

#[tokio::test]
async fn ban_is_visible_in_the_next_user_fetch() {
    let harness = Harness::new();
    let admin = harness.onboard(ADMIN_EMAIL, "Head Dad").await;
    let spammer = harness.onboard("spam@example.com", "Spammer").await;
    let target = spammer.session.uid().unwrap();

    admin.admin.ban_user(&target, "spam").await.unwrap();
    let users = admin.admin.fetch_users().await.unwrap();

    let banned = users.iter().find(|u| u.id == target).unwrap();
    assert!(banned.roles.is_banned);
    assert_eq!(banned.ban_reason.as_deref(), Some("spam"));
    assert_eq!(banned.banned_by, admin.session.uid());
    assert!(banned.banned_at.is_some());

    let log = admin.admin.fetch_moderation_log(10).await.unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].action, ModerationAction::BanUser);
    assert_eq!(log[0].target_id, target);
    assert_eq!(log[0].reason.as_deref(), Some("spam"));
}

#[tokio::test]
async fn banned_identities_cannot_act_until_unbanned() {
    let harness = Harness::new();
    let admin = harness.onboard(ADMIN_EMAIL, "Head Dad").await;
    let spammer = harness.onboard("spam@example.com", "Spammer").await;
    let target = spammer.session.uid().unwrap();

    admin.admin.ban_user(&target, "spam").await.unwrap();
    spammer.session.refresh().await.unwrap();
    let err = spammer.discussions.create_post(post()).await.unwrap_err();
    assert!(matches!(err, StoreError::Forbidden(_)));

    admin.admin.unban_user(&target).await.unwrap();
    spammer.session.refresh().await.unwrap();
    spammer.discussions.create_post(post()).await.unwrap();

    let stored = harness.load_identity(&target).await;
    assert!(!stored.roles.is_banned);
    assert_eq!(stored.ban_reason, None);
    assert_eq!(harness.documents.count(collections::MODERATION_LOG), 2);
}

#[tokio::test]
async fn non_admins_are_ignored_without_side_effects() {
    let harness = Harness::new();
    let dad = harness.onboard("dad@example.com", "Dad").await;
    let other = harness.onboard("other@example.com", "Other").await;
    let target = other.session.uid().unwrap();

    dad.admin.ban_user(&target, "spam").await.unwrap();
    dad.admin.set_moderator_status(&target, true).await.unwrap();
    assert!(dad.admin.fetch_users().await.unwrap().is_empty());

    let stored = harness.load_identity(&target).await;
    assert!(!stored.roles.is_banned);
    assert!(!stored.roles.is_moderator);
    assert_eq!(harness.documents.count(collections::MODERATION_LOG), 0);
}

#[tokio::test]
async fn moderator_role_is_granted_and_revoked() {
    let harness = Harness::new();
    let admin = harness.onboard(ADMIN_EMAIL, "Head Dad").await;
    let helper = harness.onboard("helper@example.com", "Helper").await;
    let target = helper.session.uid().unwrap();

    admin.admin.fetch_users().await.unwrap();
    admin.admin.set_moderator_status(&target, true).await.unwrap();
    let mirrored = admin.admin.users().get();
    assert!(mirrored.iter().find(|u| u.id == target).unwrap().roles.is_moderator);

    let analytics = admin.admin.fetch_analytics().await.unwrap();
    assert_eq!(analytics.total_users, 2);
    assert_eq!(analytics.admins, 1);
    assert_eq!(analytics.moderators, 1);

    admin.admin.set_moderator_status(&target, false).await.unwrap();
    assert!(!harness.load_identity(&target).await.roles.is_moderator);
}

#[tokio::test]
async fn reported_content_is_resolved_and_removed() {
    let harness = Harness::new();
    let admin = harness.onboard(ADMIN_EMAIL, "Head Dad").await;
    let spammer = harness.onboard("spam@example.com", "Spammer").await;
    let reader = harness.onboard("reader@example.com", "Reader").await;

    reader.discussions.watch_feed(None).await.unwrap();
    let post_id = spammer.discussions.create_post(post()).await.unwrap();
    let mut feed = reader.discussions.feed().subscribe();
    wait_for(&mut feed, |posts| posts.iter().any(|p| p.id == post_id)).await;

    let report_id = reader
        .reports
        .report_content(&post_id, ContentKind::Discussion, "spam link")
        .await
        .unwrap();
    assert_eq!(harness.documents.count(collections::CONTENT_REPORTS), 1);
    let reports = admin.admin.fetch_reports().await.unwrap();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].status, ReportStatus::Pending);
    assert_eq!(admin.admin.fetch_analytics().await.unwrap().pending_reports, 1);

    admin
        .admin
        .delete_content(&post_id, &ContentKind::Discussion, Some("spam"))
        .await
        .unwrap();
    admin.admin.resolve_report(&report_id, "removed the post").await.unwrap();

    let mirrored = admin.admin.reports().get();
    assert_eq!(mirrored[0].status, ReportStatus::Resolved);
    assert_eq!(mirrored[0].resolution.as_deref(), Some("removed the post"));

    // Hidden from the feed but kept for the audit trail.
    wait_for(&mut feed, |posts| posts.iter().all(|p| p.id != post_id)).await;
    let stored: DiscussionPost = harness.load(collections::DISCUSSIONS, &post_id).await.unwrap();
    assert!(stored.deleted);

    let analytics = admin.admin.fetch_analytics().await.unwrap();
    assert_eq!(analytics.pending_reports, 0);
    assert_eq!(analytics.deleted_discussions, 1);

    let log = admin.admin.fetch_moderation_log(10).await.unwrap();
    let actions: Vec<ModerationAction> = log.iter().map(|e| e.action).collect();
    assert_eq!(actions, vec![ModerationAction::ResolveReport, ModerationAction::DeleteContent]);
}

#[tokio::test]
async fn dismissed_reports_leave_content_alone() {
    let harness = Harness::new();
    let admin = harness.onboard(ADMIN_EMAIL, "Head Dad").await;
    let dad = harness.onboard("dad@example.com", "Dad").await;
    let post_id = dad.discussions.create_post(post()).await.unwrap();
    let report_id = dad
        .reports
        .report_content(&post_id, ContentKind::Discussion, "oops, wrong post")
        .await
        .unwrap();

    admin.admin.dismiss_report(&report_id).await.unwrap();
    let reports = admin.admin.fetch_reports().await.unwrap();
    assert_eq!(reports[0].status, ReportStatus::Dismissed);
    assert_eq!(reports[0].resolved_by, admin.session.uid());

    let stored: DiscussionPost = harness.load(collections::DISCUSSIONS, &post_id).await.unwrap();
    assert!(!stored.deleted);
}

#[tokio::test]
async fn admins_cannot_ban_themselves() {
    let harness = Harness::new();
    let admin = harness.onboard(ADMIN_EMAIL, "Head Dad").await;
    let me = admin.session.uid().unwrap();
    let err = admin.admin.ban_user(&me, "oops").await.unwrap_err();
    assert!(matches!(err, StoreError::Validation(_)));
}
