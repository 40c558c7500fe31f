//! Concurrent session limits, cleanup and event delivery.

mod common;

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use common::{PASSWORD, check_password, create_user, harness, harness_with, login_ok, request};
use tokio::sync::watch;
use warden::{
    CleanupReport, EventHandler, JwtConfig, LoginOutcome, LoginRequest, SecurityEvent,
    SecuritySettings, TerminationReason, WardenBuilder,
};
use warden_core::{
    error::EventError,
    repositories::{SessionRepository, SessionRepositoryProvider},
};

#[tokio::test]
async fn test_session_cap_evicts_least_recently_used() {
    let h = harness_with(SecuritySettings::default().with_max_concurrent_sessions(3)).await;
    let user = create_user(&h.warden, "alice").await;

    let first = login_ok(&h.warden, "alice").await;
    let second = login_ok(&h.warden, "alice").await;
    let third = login_ok(&h.warden, "alice").await;

    // Touching the first session makes the second one the least recently used
    h.warden
        .sessions()
        .update_activity(&first.session.session_token)
        .await
        .unwrap()
        .unwrap();

    let fourth = login_ok(&h.warden, "alice").await;
    assert_eq!(fourth.terminated_sessions.len(), 1);
    let evicted = &fourth.terminated_sessions[0];
    assert_eq!(evicted.id, second.session.id);
    assert_eq!(
        evicted.termination_reason,
        Some(TerminationReason::ConcurrentLimit)
    );

    let active: Vec<_> = h
        .warden
        .sessions()
        .list_active(&user.id, Some(&fourth.session.session_token))
        .await
        .unwrap()
        .into_iter()
        .map(|summary| summary.id)
        .collect();
    assert_eq!(active.len(), 3);
    assert!(active.contains(&first.session.id));
    assert!(active.contains(&third.session.id));
    assert!(active.contains(&fourth.session.id));
    assert!(!active.contains(&second.session.id));

    assert!(h.warden.refresh(&second.refresh_token).await.is_err());
}

#[tokio::test]
async fn test_per_user_session_limit() {
    let h = harness().await;
    let user = create_user(&h.warden, "bob").await;
    h.warden
        .settings()
        .update_session_limits(&user.id, 30, 1)
        .await
        .unwrap();

    login_ok(&h.warden, "bob").await;
    let second = login_ok(&h.warden, "bob").await;
    assert_eq!(second.terminated_sessions.len(), 1);
    assert_eq!(h.warden.sessions().concurrent_count(&user.id).await.unwrap(), 1);
}

#[tokio::test]
async fn test_run_cleanup_on_fresh_store() {
    let h = harness().await;
    create_user(&h.warden, "carol").await;
    login_ok(&h.warden, "carol").await;

    // Nothing has expired yet
    assert_eq!(h.warden.run_cleanup().await, CleanupReport::default());
}

#[tokio::test]
async fn test_cleanup_task_stops_on_shutdown() {
    let h = harness().await;
    let (tx, rx) = watch::channel(false);

    let handle = h.warden.start_cleanup_task(rx);
    tokio::time::sleep(Duration::from_millis(20)).await;
    tx.send(true).unwrap();

    tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("cleanup task did not stop")
        .unwrap();
}

#[derive(Default)]
struct Recorder {
    kinds: Mutex<Vec<&'static str>>,
}

#[async_trait]
impl EventHandler for Recorder {
    async fn handle_event(&self, event: &SecurityEvent) -> Result<(), EventError> {
        self.kinds.lock().unwrap().push(event.kind());
        Ok(())
    }
}

struct Failing;

#[async_trait]
impl EventHandler for Failing {
    async fn handle_event(&self, _event: &SecurityEvent) -> Result<(), EventError> {
        Err(EventError::HandlerError("handler is down".to_string()))
    }
}

#[tokio::test]
async fn test_events_reach_handlers_despite_failures() {
    common::init_tracing();
    let recorder = Arc::new(Recorder::default());
    let warden = WardenBuilder::new()
        .with_memory_storage()
        .with_jwt_config(JwtConfig::new_hs256(
            b"event-test-secret-with-at-least-32-bytes".to_vec(),
        ))
        .with_security_settings(SecuritySettings::default().with_max_failed_attempts(1))
        .with_event_handler(Arc::new(Failing))
        .with_event_handler(recorder.clone())
        .build()
        .await
        .unwrap();
    create_user(&warden, "dave").await;

    let err = warden
        .login(request("dave"), check_password("wrong"))
        .await
        .unwrap_err();
    assert!(err.is_locked_out());

    let kinds = recorder.kinds.lock().unwrap().clone();
    assert!(kinds.contains(&"account_locked"));
    assert!(kinds.contains(&"login_failed"));

    let err = warden
        .login(request("dave"), check_password(PASSWORD))
        .await
        .unwrap_err();
    assert!(err.is_locked_out());
}

#[tokio::test]
async fn test_failed_alert_does_not_block_suspicious_login() {
    let h = harness().await;
    create_user(&h.warden, "erin").await;
    login_ok(&h.warden, "erin").await;
    h.mailer.set_failing(true);

    let request = LoginRequest::new("erin", "192.0.2.77")
        .with_user_agent("Mozilla/5.0 (Macintosh; Intel Mac OS X 14_0) Version/17.0 Safari/605.1.15")
        .with_location("Osaka, Osaka, Japan");
    let LoginOutcome::Authenticated(auth) = h
        .warden
        .login(request, check_password(PASSWORD))
        .await
        .unwrap()
    else {
        panic!("expected a session");
    };
    assert!(auth.suspicious);
    assert!(auth.session.is_active);
    assert!(
        h.warden
            .sessions()
            .validate(&auth.session.session_token)
            .await
            .unwrap()
            .is_some()
    );
}

#[tokio::test]
async fn test_expired_session_is_not_live() {
    let h = harness().await;
    create_user(&h.warden, "frank").await;
    let auth = login_ok(&h.warden, "frank").await;

    let mut session = auth.session.clone();
    session.expires_at = chrono::Utc::now() - chrono::Duration::minutes(1);
    h.warden.repositories().session().update(session).await.unwrap();

    let token = &auth.session.session_token;
    assert!(h.warden.sessions().validate(token).await.unwrap().is_none());
    // Activity does not revive an expired session
    assert!(h.warden.sessions().update_activity(token).await.unwrap().is_none());
    assert!(h.warden.sessions().validate(token).await.unwrap().is_none());
}

#[tokio::test]
async fn test_terminated_session_is_not_live() {
    let h = harness().await;
    let user = create_user(&h.warden, "gina").await;
    let auth = login_ok(&h.warden, "gina").await;
    let token = &auth.session.session_token;

    assert!(
        h.warden
            .sessions()
            .terminate(&user.id, &auth.session.id, TerminationReason::Logout)
            .await
            .unwrap()
    );
    assert!(h.warden.sessions().validate(token).await.unwrap().is_none());
    assert!(h.warden.sessions().update_activity(token).await.unwrap().is_none());

    // Terminating again is a no-op
    assert!(
        !h.warden
            .sessions()
            .terminate(&user.id, &auth.session.id, TerminationReason::Logout)
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn test_terminate_all_is_idempotent() {
    let h = harness().await;
    let user = create_user(&h.warden, "hank").await;
    login_ok(&h.warden, "hank").await;
    login_ok(&h.warden, "hank").await;

    let sessions = h.warden.sessions();
    assert_eq!(
        sessions
            .terminate_all(&user.id, TerminationReason::RevokedAll)
            .await
            .unwrap(),
        2
    );
    assert_eq!(
        sessions
            .terminate_all(&user.id, TerminationReason::RevokedAll)
            .await
            .unwrap(),
        0
    );
    assert_eq!(sessions.concurrent_count(&user.id).await.unwrap(), 0);
}
