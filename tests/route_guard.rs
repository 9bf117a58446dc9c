mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use mockito::Server;
use newsdesk_lib::guard::{Access, Route, RouteGuard};
use newsdesk_lib::session::SessionPhase;

#[tokio::test]
async fn resolve_waits_for_bootstrap_then_redirects() {
    let dir = tempfile::tempdir().unwrap();
    let (store, mut navigation) = store("http://127.0.0.1:1", dir.path());
    let store = Arc::new(store);

    let pending = {
        let store = Arc::clone(&store);
        tokio::spawn(async move { RouteGuard::resolve(&store, &Route::NewsCreate).await })
    };
    tokio::task::yield_now().await;
    assert!(!pending.is_finished());

    store.bootstrap().await;

    assert_eq!(pending.await.unwrap(), Access::Redirect(Route::Login));
    assert_eq!(drain(&mut navigation), vec![Route::Login]);
}

#[tokio::test]
async fn verifying_session_is_deferred_then_allowed() {
    let (url, release) = gated_response(200, verify_body()).await;
    let dir = tempfile::tempdir().unwrap();
    tokens_in(dir.path()).save(TOKEN).unwrap();
    let (store, _navigation) = store(&url, dir.path());
    let store = Arc::new(store);

    let mut updates = store.subscribe();
    let bootstrap = {
        let store = Arc::clone(&store);
        tokio::spawn(async move { store.bootstrap().await })
    };
    updates.wait_for(|s| s.loading()).await.unwrap();

    let session = store.snapshot();
    assert_eq!(session.phase(), SessionPhase::Verifying);
    assert_eq!(RouteGuard::check(&session, &Route::Profile), Access::Defer);
    assert!(!RouteGuard::check(&session, &Route::Profile).is_allowed());

    release.send(()).unwrap();
    assert!(matches!(bootstrap.await.unwrap(), SessionPhase::Authenticated(_)));
    assert_eq!(RouteGuard::resolve(&store, &Route::Profile).await, Access::Allow);
}

#[tokio::test]
async fn login_opens_protected_routes_and_logout_closes_them() {
    let mut server = Server::new_async().await;
    let _login = server
        .mock("POST", "/api/users/login")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(auth_body())
        .create_async()
        .await;
    let dir = tempfile::tempdir().unwrap();
    let (store, mut navigation) = store(&server.url(), dir.path());
    store.bootstrap().await;

    let edit = Route::NewsEdit("n1".into());
    assert_eq!(RouteGuard::resolve(&store, &edit).await, Access::Redirect(Route::Login));

    store.login(EMAIL, PASSWORD).await.unwrap();
    assert_eq!(RouteGuard::resolve(&store, &edit).await, Access::Allow);
    assert!(RouteGuard::require(&store, &Route::NewsCreate).await.is_ok());

    store.logout().unwrap();
    let denied = RouteGuard::require(&store, &Route::NewsCreate).await.unwrap_err();
    assert_eq!(denied.route, Route::NewsCreate);

    assert_eq!(
        drain(&mut navigation),
        vec![Route::Login, Route::Home, Route::Home, Route::Login]
    );
}

#[tokio::test]
async fn public_routes_open_for_anonymous_users() {
    let dir = tempfile::tempdir().unwrap();
    let (store, mut navigation) = store("http://127.0.0.1:1", dir.path());
    store.bootstrap().await;

    for path in ["/", "/login", "/register", "/news/abc"] {
        let route = Route::parse(path).unwrap();
        assert_eq!(RouteGuard::resolve(&store, &route).await, Access::Allow);
    }
    assert!(drain(&mut navigation).is_empty());
}

#[tokio::test]
async fn cancelled_bootstrap_settles_guard() {
    let (url, _release) = gated_response(200, verify_body()).await;
    let dir = tempfile::tempdir().unwrap();
    tokens_in(dir.path()).save(TOKEN).unwrap();
    let (store, mut navigation) = store(&url, dir.path());
    let store = Arc::new(store);

    let mut updates = store.subscribe();
    let bootstrap = {
        let store = Arc::clone(&store);
        tokio::spawn(async move { store.bootstrap().await })
    };
    updates.wait_for(|s| s.loading()).await.unwrap();
    bootstrap.abort();
    assert!(bootstrap.await.unwrap_err().is_cancelled());

    let session = store.snapshot();
    assert!(!session.loading());
    assert_eq!(session.phase(), SessionPhase::Anonymous);

    let access = tokio::time::timeout(
        Duration::from_secs(2),
        RouteGuard::resolve(&store, &Route::Profile),
    )
    .await
    .expect("guard settles after a cancelled bootstrap");
    assert_eq!(access, Access::Redirect(Route::Login));
    assert_eq!(drain(&mut navigation), vec![Route::Login]);
    assert!(tokens_in(dir.path()).exists());
}
