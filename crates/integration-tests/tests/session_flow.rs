//! Sign-up, onboarding, profile edits and sign-out against the in-process
//! backend.

use domains::document::collections;
use domains::errors::AuthError;
use domains::models::Identity;
use domains::ports::Credentials;
use integration_tests::{Harness, ADMIN_EMAIL, PASSWORD};
use secrecy::SecretString;
use services::{ProfileSetup, ProfileUpdate, StoreError};

#[tokio::test]
async fn reserved_admin_email_is_seeded_with_elevated_stats() {
    let harness = Harness::new();
    let admin = harness.onboard(ADMIN_EMAIL, "Head Dad").await;

    let identity = admin.session.require_identity().unwrap();
    assert!(identity.roles.is_admin);
    assert_eq!(identity.stats.points, 1000);
    assert_eq!(identity.stats.level, 5);
    assert!(admin.session.is_admin());

    let stored = harness.load_identity(&identity.id).await;
    assert!(stored.roles.is_admin);
    assert_eq!(stored.stats.points, 1000);
    assert!(stored.created_at.is_some());
}

#[tokio::test]
async fn any_other_email_gets_default_stats() {
    let harness = Harness::new();
    let app = harness.onboard("dad@example.com", "Dad").await;

    let identity = app.session.require_identity().unwrap();
    assert!(!identity.roles.is_admin);
    assert_eq!(identity.stats.points, 0);
    assert_eq!(identity.stats.level, 1);
    assert!(!app.session.is_admin());
}

#[tokio::test]
async fn profile_update_round_trips_through_the_backend() {
    let harness = Harness::new();
    let app = harness.onboard("dad@example.com", "Dad").await;
    let uid = app.session.uid().unwrap();

    tokio_test::assert_ok!(app.session.update_profile(ProfileUpdate::display_name("X")).await);
    assert_eq!(app.session.require_identity().unwrap().display_name, "X");

    let stored = harness.load_identity(&uid).await;
    assert_eq!(stored.display_name, "X");
    assert!(stored.updated_at.is_some());

    let refreshed = app.session.refresh().await.unwrap().unwrap();
    assert_eq!(refreshed.display_name, "X");
}

#[tokio::test]
async fn failed_profile_update_restores_the_previous_profile() {
    let harness = Harness::new();
    let app = harness.onboard("dad@example.com", "Dad").await;

    harness.documents.set_offline(true);
    let err = app
        .session
        .update_profile(ProfileUpdate {
            display_name: Some("Offline Dad".into()),
            bio: Some("Grill master".into()),
            ..ProfileUpdate::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Write(_)));

    let identity = app.session.require_identity().unwrap();
    assert_eq!(identity.display_name, "Dad");
    assert_eq!(identity.bio, None);
}

#[tokio::test]
async fn second_profile_setup_is_rejected() {
    let harness = Harness::new();
    harness.onboard("dad@example.com", "Dad").await;

    // A second device signed in to the same account.
    let other = harness.client();
    other
        .session
        .sign_in(&Credentials::email_password("dad@example.com", PASSWORD))
        .await
        .unwrap();
    let uid = other.session.uid().unwrap();
    let err = other
        .session
        .complete_profile_setup(ProfileSetup {
            display_name: "Dad Again".into(),
            ..ProfileSetup::default()
        })
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::ProfileAlreadyExists(id) if id == uid));

    let stored: Identity = harness.load(collections::USERS, &uid).await.unwrap();
    assert_eq!(stored.display_name, "Dad");
}

#[tokio::test]
async fn sign_in_loads_the_identity_and_stamps_last_login() {
    let harness = Harness::new();
    let first = harness.onboard("dad@example.com", "Dad").await;
    let uid = first.session.uid().unwrap();
    let before = harness.load_identity(&uid).await.last_login.unwrap();

    let second = harness.sign_in("dad@example.com").await;
    let state = second.session.current();
    assert!(!state.needs_profile_setup);
    assert_eq!(state.identity.as_ref().map(|i| i.display_name.as_str()), Some("Dad"));
    assert!(state.identity.unwrap().last_login.unwrap() > before);
}

#[tokio::test]
async fn sign_in_failures_are_surfaced_in_session_state() {
    let harness = Harness::new();
    harness.onboard("dad@example.com", "Dad").await;
    let app = harness.client();

    let err = app
        .session
        .sign_in(&Credentials::email_password("dad@example.com", "wrong-password"))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Auth(AuthError::InvalidCredential)));
    let state = app.session.current();
    assert_eq!(state.error.as_deref(), Some("Invalid email or password."));
    assert!(state.principal.is_none());

    let err = app
        .session
        .sign_up("dad@example.com", SecretString::from(PASSWORD.to_string()))
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Auth(AuthError::EmailInUse)));
}

#[tokio::test]
async fn sign_out_clears_everything_and_is_idempotent() {
    let harness = Harness::new();
    let app = harness.onboard("dad@example.com", "Dad").await;
    app.discussions.watch_feed(None).await.unwrap();

    app.sign_out().await;
    app.sign_out().await;

    assert!(app.session.current().identity.is_none());
    assert!(matches!(app.session.require_identity(), Err(StoreError::NotSignedIn)));
    assert!(app.discussions.posts().is_empty());
}
