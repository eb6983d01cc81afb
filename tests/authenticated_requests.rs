mod common;

use std::sync::Arc;
use std::time::Duration;

use judging_session::{
    AuthenticatedClient, CredentialKey, CredentialStore, Error, JudgingApi, MemoryStore, Phase,
    Session, UserProfile,
};

use common::{Backend, PASSWORD};

async fn signed_in() -> (Arc<Backend>, Session, Arc<MemoryStore>) {
    let (backend, url) = common::spawn().await;
    let store = Arc::new(MemoryStore::new());
    let session = common::session(url, store.clone());
    session.login("judge1", PASSWORD).await.unwrap();
    (backend, session, store)
}

fn api(session: &Session) -> JudgingApi {
    JudgingApi::new(AuthenticatedClient::new(session.clone()))
}

#[tokio::test]
async fn test_bearer_token_attached() {
    let (backend, session, _store) = signed_in().await;

    let teams = api(&session).fetch_worklist().await.unwrap();

    assert_eq!(teams.len(), 2);
    assert_eq!(
        backend.last_authorization(),
        Some(format!("Bearer {}", backend.access_token()))
    );
    assert_eq!(backend.refresh_calls(), 0);
}

#[tokio::test]
async fn test_single_401_refreshes_and_retries_once() {
    let (backend, session, store) = signed_in().await;
    backend.revoke_access();

    let teams = api(&session).fetch_worklist().await.unwrap();

    assert_eq!(teams.len(), 2);
    assert_eq!(backend.refresh_calls(), 1);
    assert_eq!(backend.protected_calls(), 2);
    assert_eq!(session.access_token().unwrap().as_str(), backend.access_token());
    assert_eq!(
        store.get(CredentialKey::AccessToken).unwrap(),
        Some(backend.access_token())
    );
    assert_eq!(session.phase(), Phase::Authenticated);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_401s_share_one_refresh() {
    let (backend, session, _store) = signed_in().await;
    backend.set_refresh_delay(Duration::from_millis(200));
    backend.revoke_access();

    let api = api(&session);
    let calls = (0..5).map(|_| {
        let api = api.clone();
        tokio::spawn(async move { api.fetch_worklist().await })
    });
    let results = futures::future::join_all(calls).await;

    for result in results {
        assert_eq!(result.unwrap().unwrap().len(), 2);
    }
    assert_eq!(backend.refresh_calls(), 1);
    // Five rejected attempts, five retries with the renewed token.
    assert_eq!(backend.protected_calls(), 10);
    assert_eq!(
        backend.last_authorization(),
        Some(format!("Bearer {}", backend.access_token()))
    );
    assert_eq!(session.phase(), Phase::Authenticated);
}

#[tokio::test]
async fn test_401_without_refresh_token_signs_out() {
    let (backend, url) = common::spawn().await;
    let store = Arc::new(MemoryStore::new());
    store
        .set(CredentialKey::AccessToken, &backend.access_token())
        .unwrap();
    store
        .set(
            CredentialKey::User,
            &serde_json::to_string(&UserProfile::new("judge1")).unwrap(),
        )
        .unwrap();
    let session = common::session(url, store.clone());
    assert_eq!(session.initialize().await, Phase::Authenticated);
    backend.revoke_access();

    let err = api(&session).fetch_worklist().await.unwrap_err();

    assert!(matches!(err, Error::Api { status: 401, .. }));
    assert_eq!(backend.refresh_calls(), 0);
    assert_eq!(session.phase(), Phase::Unauthenticated);
    assert!(store.is_empty());
}

#[tokio::test]
async fn test_rejected_refresh_returns_original_401() {
    let (backend, session, store) = signed_in().await;
    backend.revoke_refresh();
    backend.revoke_access();

    let err = api(&session).fetch_worklist().await.unwrap_err();

    assert!(matches!(err, Error::Api { status: 401, .. }));
    assert_eq!(backend.refresh_calls(), 1);
    assert_eq!(backend.protected_calls(), 1);
    assert_eq!(session.phase(), Phase::Unauthenticated);
    assert!(store.is_empty());
}

#[tokio::test]
async fn test_second_401_signs_out() {
    let (backend, session, _store) = signed_in().await;
    backend.set_reject_all(true);

    let err = api(&session).fetch_worklist().await.unwrap_err();

    assert!(matches!(err, Error::Api { status: 401, .. }));
    assert_eq!(backend.refresh_calls(), 1);
    assert_eq!(backend.protected_calls(), 2);
    assert!(!session.is_authenticated());
}

#[tokio::test]
async fn test_no_bearer_after_logout() {
    let (backend, session, _store) = signed_in().await;
    let client = AuthenticatedClient::new(session.clone());
    session.logout();

    let response = client.get("api/teams/teams/").await.unwrap();

    assert_eq!(response.status().as_u16(), 401);
    assert_eq!(backend.last_authorization(), None);
    assert_eq!(backend.refresh_calls(), 0);
}

#[tokio::test]
async fn test_non_401_statuses_pass_through() {
    let (backend, session, _store) = signed_in().await;

    let team = api(&session).fetch_team("SIH2024_999").await.unwrap();

    assert!(team.is_none());
    assert_eq!(backend.refresh_calls(), 0);
    assert!(session.is_authenticated());
}

#[tokio::test]
async fn test_json_body_replayed_after_refresh() {
    let (backend, session, _store) = signed_in().await;
    backend.revoke_access();
    let client = AuthenticatedClient::new(session.clone());

    let body = serde_json::json!({"approvedIdeas": ["Smart Traffic Management"]});
    let response = client
        .post_json("api/judging/approvals/", &body)
        .await
        .unwrap();

    assert_eq!(response.status().as_u16(), 201);
    assert_eq!(backend.refresh_calls(), 1);
    assert_eq!(backend.received_approvals(), vec![body]);
}

#[tokio::test]
async fn test_network_failure_surfaces_without_signing_out() {
    let store = Arc::new(MemoryStore::new());
    store.set(CredentialKey::AccessToken, "access-0").unwrap();
    store.set(CredentialKey::RefreshToken, "refresh-0").unwrap();
    store
        .set(
            CredentialKey::User,
            &serde_json::to_string(&UserProfile::new("judge1")).unwrap(),
        )
        .unwrap();
    let session = common::session(common::unreachable_url(), store);
    session.initialize().await;

    let err = api(&session).fetch_worklist().await.unwrap_err();

    assert!(matches!(err, Error::Network(_)));
    assert!(session.is_authenticated());
}

#[tokio::test]
async fn test_new_session_does_not_join_previous_refresh() {
    let (backend, session, _store) = signed_in().await;
    backend.set_refresh_delay(Duration::from_millis(500));
    let previous = tokio::spawn({
        let session = session.clone();
        async move { session.refresh().await }
    });
    tokio::time::sleep(Duration::from_millis(100)).await;

    session.logout();
    backend.set_refresh_delay(Duration::ZERO);
    session.login("judge1", PASSWORD).await.unwrap();
    backend.revoke_access();

    let teams = api(&session).fetch_worklist().await.unwrap();

    assert_eq!(teams.len(), 2);
    assert!(session.is_authenticated());
    assert_eq!(backend.refresh_calls(), 2);
    assert_eq!(backend.protected_calls(), 2);
    let _ = previous.await.unwrap();
}
