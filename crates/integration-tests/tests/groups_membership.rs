//! Group membership: create, join, leave and the member counter that the
//! atomic batches keep consistent.

use domains::document::collections;
use domains::errors::WriteError;
use domains::models::{Group, MemberRole};
use integration_tests::{wait_for, Harness};
use services::groups::NewGroup;
use services::StoreError;

fn bbq_group() -> NewGroup {
    NewGroup {
        name: "Backyard BBQ".into(),
        description: "Low and slow".into(),
        category: "food".into(),
        is_private: false,
    }
}

#[tokio::test]
async fn joining_your_own_new_group_is_a_no_op() {
    let harness = Harness::new();
    let owner = harness.onboard("owner@example.com", "Owner").await;

    let group_id = owner.groups.create_group(bbq_group()).await.unwrap();
    assert!(owner.groups.is_member(&group_id));
    assert!(!owner.groups.join_group(&group_id).await.unwrap());

    let group: Group = harness.load(collections::GROUPS, &group_id).await.unwrap();
    assert_eq!(group.member_count, 1);
    let members = owner.groups.members(&group_id).await.unwrap();
    assert_eq!(members.len(), 1);
    assert_eq!(members[0].role, MemberRole::Owner);
}

#[tokio::test]
async fn join_from_two_devices_counts_once() {
    let harness = Harness::new();
    let owner = harness.onboard("owner@example.com", "Owner").await;
    let group_id = owner.groups.create_group(bbq_group()).await.unwrap();

    harness.onboard("joiner@example.com", "Joiner").await;
    let phone = harness.sign_in("joiner@example.com").await;
    let laptop = harness.sign_in("joiner@example.com").await;

    assert!(phone.groups.join_group(&group_id).await.unwrap());
    // The laptop's identity predates the join; the batch precondition
    // rejects the duplicate membership.
    assert!(!laptop.groups.join_group(&group_id).await.unwrap());
    assert!(laptop.groups.is_member(&group_id));

    let group: Group = harness.load(collections::GROUPS, &group_id).await.unwrap();
    assert_eq!(group.member_count, 2);
    assert_eq!(harness.documents.count(&collections::group_members(&group_id)), 2);

    let uid = phone.session.uid().unwrap();
    assert!(harness.load_identity(&uid).await.groups.contains(&group_id));
}

#[tokio::test]
async fn leave_updates_all_three_records() {
    let harness = Harness::new();
    let owner = harness.onboard("owner@example.com", "Owner").await;
    let group_id = owner.groups.create_group(bbq_group()).await.unwrap();
    let member = harness.onboard("member@example.com", "Member").await;
    let uid = member.session.uid().unwrap();

    member.groups.watch_groups(None).await.unwrap();
    assert!(member.groups.join_group(&group_id).await.unwrap());
    assert!(member.groups.leave_group(&group_id).await.unwrap());
    assert!(!member.groups.leave_group(&group_id).await.unwrap());

    let group: Group = harness.load(collections::GROUPS, &group_id).await.unwrap();
    assert_eq!(group.member_count, 1);
    assert!(!harness.load_identity(&uid).await.groups.contains(&group_id));
    assert!(!member.groups.is_member(&group_id));

    let mut groups = member.groups.groups().subscribe();
    wait_for(&mut groups, |groups| {
        groups.iter().any(|g| g.id == group_id && g.member_count == 1)
    })
    .await;
}

#[tokio::test]
async fn owner_cannot_leave() {
    let harness = Harness::new();
    let owner = harness.onboard("owner@example.com", "Owner").await;
    let group_id = owner.groups.create_group(bbq_group()).await.unwrap();

    let err = owner.groups.leave_group(&group_id).await.unwrap_err();
    assert!(matches!(err, StoreError::Forbidden(_)));
    assert!(owner.groups.is_member(&group_id));
}

#[tokio::test]
async fn failed_join_leaves_no_partial_state() {
    let harness = Harness::new();
    let owner = harness.onboard("owner@example.com", "Owner").await;
    let group_id = owner.groups.create_group(bbq_group()).await.unwrap();
    let member = harness.onboard("member@example.com", "Member").await;
    let uid = member.session.uid().unwrap();
    member.groups.watch_groups(None).await.unwrap();

    harness
        .documents
        .fail_writes(collections::USERS, WriteError::Unavailable("users shard down".into()));
    let err = member.groups.join_group(&group_id).await.unwrap_err();
    assert!(matches!(err, StoreError::Write(WriteError::Unavailable(_))));
    harness.documents.clear_faults();

    assert!(!member.groups.is_member(&group_id));
    let local = member.groups.groups().get();
    assert_eq!(local.iter().find(|g| g.id == group_id).unwrap().member_count, 1);

    let group: Group = harness.load(collections::GROUPS, &group_id).await.unwrap();
    assert_eq!(group.member_count, 1);
    assert_eq!(harness.documents.count(&collections::group_members(&group_id)), 1);
    assert!(!harness.load_identity(&uid).await.groups.contains(&group_id));
}

#[tokio::test]
async fn only_members_post_and_likes_toggle() {
    let harness = Harness::new();
    let owner = harness.onboard("owner@example.com", "Owner").await;
    let group_id = owner.groups.create_group(bbq_group()).await.unwrap();
    let outsider = harness.onboard("outsider@example.com", "Outsider").await;

    let err = outsider.groups.create_post(&group_id, "Let me in").await.unwrap_err();
    assert!(matches!(err, StoreError::Forbidden(_)));

    owner.groups.watch_posts(&group_id).await.unwrap();
    let post_id = owner.groups.create_post(&group_id, "Smoker is lit").await.unwrap();
    let mut posts = owner.groups.posts().subscribe();
    wait_for(&mut posts, |posts| posts.iter().any(|p| p.id == post_id)).await;

    assert!(owner.groups.toggle_post_like(&group_id, &post_id).await.unwrap());
    assert!(outsider.groups.toggle_post_like(&group_id, &post_id).await.unwrap());
    wait_for(&mut posts, |posts| posts.iter().any(|p| p.id == post_id && p.likes.len() == 2)).await;
}
