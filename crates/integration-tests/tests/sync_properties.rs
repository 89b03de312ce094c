//! End-to-end checks of the synchronization guarantees: toggles converge
//! with the server, released subscriptions stay silent, failed writes are
//! reverted, and broken listeners stall instead of retrying.

use std::sync::Arc;

use domains::document::{collections, Query};
use domains::errors::WriteError;
use domains::models::DiscussionPost;
use domains::ports::DocumentStore;
use integration_tests::{settle, wait_for, Harness};
use services::discussions::NewPost;
use services::live;
use services::{Observable, StoreError, SubscriptionStatus};

fn post(title: &str) -> NewPost {
    NewPost {
        title: title.to_string(),
        content: "Anyone else's kid refuse to wear socks?".to_string(),
        category: Some("parenting".to_string()),
        image: None,
    }
}

#[tokio::test]
async fn double_like_converges_with_the_server() {
    let harness = Harness::new();
    let app = harness.onboard("dad@example.com", "Dad").await;
    let uid = app.session.uid().unwrap();

    app.discussions.watch_feed(None).await.unwrap();
    let post_id = app.discussions.create_post(post("Socks")).await.unwrap();
    let mut feed = app.discussions.feed().subscribe();
    wait_for(&mut feed, |posts| posts.iter().any(|p| p.id == post_id)).await;

    assert!(app.discussions.toggle_like(&post_id).await.unwrap());
    assert!(!app.discussions.toggle_like(&post_id).await.unwrap());

    let server: DiscussionPost = harness.load(collections::DISCUSSIONS, &post_id).await.unwrap();
    assert!(!server.likes.contains(&uid));

    // Both writes have produced their snapshots once the listeners settle.
    settle().await;
    let settled = wait_for(&mut feed, |posts| {
        posts.iter().any(|p| p.id == post_id && p.likes.len() == server.likes.len())
    })
    .await;
    let local = settled.iter().find(|p| p.id == post_id).unwrap();
    assert_eq!(local.likes.contains(&uid), server.likes.contains(&uid));
    assert_eq!(local.like_count(), 0);
}

#[tokio::test]
async fn double_reaction_converges_with_the_server() {
    let harness = Harness::new();
    let app = harness.onboard("dad@example.com", "Dad").await;
    let uid = app.session.uid().unwrap();

    app.discussions.watch_feed(None).await.unwrap();
    let post_id = app.discussions.create_post(post("Grill")).await.unwrap();
    let mut feed = app.discussions.feed().subscribe();
    wait_for(&mut feed, |posts| posts.iter().any(|p| p.id == post_id)).await;

    assert!(app.discussions.toggle_reaction(&post_id, "🔥").await.unwrap());
    assert!(!app.discussions.toggle_reaction(&post_id, "🔥").await.unwrap());
    assert!(app.discussions.toggle_reaction(&post_id, "🔥").await.unwrap());

    let server: DiscussionPost = harness.load(collections::DISCUSSIONS, &post_id).await.unwrap();
    assert_eq!(server.reaction_count("🔥"), 1);
    wait_for(&mut feed, |posts| {
        posts
            .iter()
            .any(|p| p.id == post_id && p.reactions.get("🔥").is_some_and(|u| u == &vec![uid.clone()]))
    })
    .await;
}

#[tokio::test]
async fn no_mirror_updates_after_unsubscribe() {
    let harness = Harness::new();
    let app = harness.onboard("dad@example.com", "Dad").await;
    app.discussions.create_post(post("Before")).await.unwrap();

    let documents: Arc<dyn DocumentStore> = Arc::new(harness.documents.clone());
    let mirror = Observable::new(Vec::<DiscussionPost>::new());
    let handle = live::mirror(&documents, Query::collection(collections::DISCUSSIONS), mirror.clone())
        .await
        .unwrap();
    assert_eq!(mirror.get().len(), 1);

    handle.unsubscribe().await;
    let mut rx = mirror.subscribe();
    app.discussions.create_post(post("After")).await.unwrap();
    settle().await;

    assert!(!rx.has_changed().unwrap());
    assert_eq!(mirror.get().len(), 1);
}

#[tokio::test]
async fn switching_feed_category_releases_the_old_listener() {
    let harness = Harness::new();
    let app = harness.onboard("dad@example.com", "Dad").await;

    app.discussions.watch_feed(Some("grilling")).await.unwrap();
    app.discussions.watch_feed(Some("parenting")).await.unwrap();
    let mut feed = app.discussions.feed().subscribe();

    let mut grilling = post("Brisket");
    grilling.category = Some("grilling".to_string());
    app.discussions.create_post(grilling).await.unwrap();
    let parenting_id = app.discussions.create_post(post("Bedtime")).await.unwrap();

    let posts = wait_for(&mut feed, |posts| posts.iter().any(|p| p.id == parenting_id)).await;
    settle().await;
    assert!(posts.iter().all(|p| p.category == "parenting"));
    assert!(app.discussions.posts().iter().all(|p| p.category == "parenting"));
}

#[tokio::test]
async fn failed_like_is_reverted_locally() {
    let harness = Harness::new();
    let app = harness.onboard("dad@example.com", "Dad").await;
    app.discussions.watch_feed(None).await.unwrap();
    let post_id = app.discussions.create_post(post("Lawn")).await.unwrap();
    let mut feed = app.discussions.feed().subscribe();
    wait_for(&mut feed, |posts| posts.iter().any(|p| p.id == post_id)).await;

    harness
        .documents
        .fail_writes(collections::DISCUSSIONS, WriteError::PermissionDenied("likes".into()));
    let err = app.discussions.toggle_like(&post_id).await.unwrap_err();
    assert!(matches!(err, StoreError::Write(WriteError::PermissionDenied(_))));
    assert_eq!(err.user_message(), "You don't have permission to do that.");

    let local = app.discussions.posts();
    assert_eq!(local.iter().find(|p| p.id == post_id).unwrap().like_count(), 0);
}

#[tokio::test]
async fn broken_listener_stalls_without_retrying() {
    let harness = Harness::new();
    let app = harness.onboard("dad@example.com", "Dad").await;
    app.discussions.watch_feed(None).await.unwrap();
    assert_eq!(app.discussions.feed_status(), SubscriptionStatus::Active);

    harness
        .documents
        .break_listeners(collections::DISCUSSIONS, WriteError::Unavailable("listener reset".into()));
    settle().await;
    assert_eq!(app.discussions.feed_status(), SubscriptionStatus::Stalled);

    app.discussions.create_post(post("Ignored")).await.unwrap();
    settle().await;
    assert!(app.discussions.posts().is_empty());

    // Resubscribing picks the feed back up.
    app.discussions.watch_feed(None).await.unwrap();
    assert_eq!(app.discussions.posts().len(), 1);
}
