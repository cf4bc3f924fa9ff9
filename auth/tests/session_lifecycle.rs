use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use auth::expiry::{ExpiryMonitor, ExpirySettings, ExpiryState};
use auth::fingerprint::{FingerprintGenerator, SystemSignals};
use auth::gate::{GateDecision, RouteGate};
use auth::store::{FileSlot, SessionStore, FINGERPRINT_FILE, GATE_TOKEN_FILE, SESSION_FILE};
use auth::{EndReason, SessionManager, SessionSettings, SessionStatus};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use mockito::{Server, ServerGuard};
use reqwest::Method;
use serde_json::json;

fn token(sub: &str, iat: i64, exp: i64) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(json!({ "sub": sub, "iat": iat, "exp": exp }).to_string());
    format!("{header}.{payload}.sig")
}

fn manager_for(base_url: &str, dir: &Path) -> Arc<SessionManager> {
    let mut settings = SessionSettings::new(base_url);
    settings.http.max_retries = 0;
    let fingerprint = FingerprintGenerator::new(
        Box::new(SystemSignals::default()),
        Box::new(FileSlot::new(dir.join(FINGERPRINT_FILE))),
    );
    Arc::new(SessionManager::new(settings, SessionStore::on_disk(dir), fingerprint).unwrap())
}

fn whole_second(at: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp(at.timestamp(), 0).unwrap()
}

#[tokio::test]
async fn login_warn_renew_returns_to_quiet() {
    let mut server = Server::new_async().await;
    let state = tempfile::tempdir().unwrap();
    let dir = state.path();
    let t0 = whole_second(Utc::now());
    let first = token("user-1", t0.timestamp(), t0.timestamp() + 60 * 60);
    let renewed = token("user-1", t0.timestamp() + 56 * 60, t0.timestamp() + 116 * 60);

    server
        .mock("POST", "/auth/login")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({
                "accessToken": first,
                "user": { "id": "user-1", "email": "ana@example.com", "role": "analyst", "plan": "pro" }
            })
            .to_string(),
        )
        .create_async()
        .await;
    server
        .mock("POST", "/auth/refresh")
        .match_header("authorization", format!("Bearer {first}").as_str())
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(json!({ "accessToken": renewed }).to_string())
        .create_async()
        .await;

    let manager = manager_for(&server.url(), dir);
    let session = manager.login("ana@example.com", "secret").await.unwrap();
    assert_eq!(session.expires_at(), t0 + chrono::Duration::minutes(60));

    let monitor = ExpiryMonitor::new(manager.clone(), ExpirySettings::default());

    // Poll every 30 s of simulated time for the first 55 minutes.
    for poll in 0..110 {
        let now = t0 + chrono::Duration::seconds(poll * 30);
        assert_eq!(monitor.check_at(now), ExpiryState::Quiet, "poll {poll}");
    }

    let minute_56 = t0 + chrono::Duration::minutes(56);
    assert!(matches!(monitor.check_at(minute_56), ExpiryState::Warning { .. }));
    assert_eq!(monitor.remaining_at(minute_56), Some(Duration::from_secs(240)));

    let refreshed = monitor.renew().await.unwrap();

    assert_eq!(monitor.state(), ExpiryState::Quiet);
    assert!(refreshed.expires_at() > session.expires_at());
    assert_eq!(monitor.check_at(minute_56), ExpiryState::Quiet);
    assert_eq!(manager.status(), SessionStatus::Active);
}

#[tokio::test]
async fn session_survives_restart_and_logout_keeps_fingerprint() {
    let mut server = Server::new_async().await;
    let state = tempfile::tempdir().unwrap();
    let dir = state.path();
    let now = Utc::now().timestamp();
    server
        .mock("POST", "/auth/login")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(
            json!({ "accessToken": token("user-1", now, now + 3600), "user": { "id": "user-1" } })
                .to_string(),
        )
        .create_async()
        .await;
    server
        .mock("POST", "/auth/logout")
        .with_status(204)
        .create_async()
        .await;

    let first_run = manager_for(&server.url(), dir);
    let session = first_run.login("ana@example.com", "secret").await.unwrap();
    drop(first_run);

    let second_run = manager_for(&server.url(), dir);
    let restored = second_run.current_session().expect("session restored from disk");
    assert_eq!(restored.user_id(), session.user_id());
    assert_eq!(restored.device_fingerprint(), session.device_fingerprint());
    assert!(matches!(
        RouteGate::on_disk(dir).check_at(Utc::now()),
        GateDecision::Allow { .. }
    ));

    second_run.logout().await;

    assert!(!dir.join(SESSION_FILE).exists());
    assert!(!dir.join(GATE_TOKEN_FILE).exists());
    assert!(dir.join(FINGERPRINT_FILE).exists());
    assert_eq!(
        RouteGate::on_disk(dir).check_at(Utc::now()),
        GateDecision::Redirect
    );
}

/// Login answering with `first`, and a refresh of `first` answering with `renewed`.
async fn mock_login_and_refresh(server: &mut ServerGuard, first: &str, renewed: &str) {
    server
        .mock("POST", "/auth/login")
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(json!({ "accessToken": first, "user": { "id": "user-1" } }).to_string())
        .create_async()
        .await;
    server
        .mock("POST", "/auth/refresh")
        .match_header("authorization", format!("Bearer {first}").as_str())
        .with_status(200)
        .with_header("content-type", "application/json")
        .with_body(json!({ "accessToken": renewed }).to_string())
        .create_async()
        .await;
}

#[tokio::test]
async fn expiring_process_adopts_session_renewed_by_another() {
    let mut server = Server::new_async().await;
    let state = tempfile::tempdir().unwrap();
    let dir = state.path();
    let t0 = whole_second(Utc::now());
    let first = token("user-1", t0.timestamp(), t0.timestamp() + 60 * 60);
    let renewed = token("user-1", t0.timestamp() + 30 * 60, t0.timestamp() + 90 * 60);
    mock_login_and_refresh(&mut server, &first, &renewed).await;

    let dashboard = manager_for(&server.url(), dir);
    dashboard.login("ana@example.com", "secret").await.unwrap();
    let cli = manager_for(&server.url(), dir);
    cli.refresh().await.unwrap();

    let monitor = ExpiryMonitor::new(dashboard.clone(), ExpirySettings::default());
    let past_first_expiry = t0 + chrono::Duration::minutes(61);

    assert_eq!(monitor.check_at(past_first_expiry), ExpiryState::Quiet);
    assert_eq!(dashboard.status(), SessionStatus::Active);
    assert_eq!(
        dashboard.current_session().unwrap().expires_at(),
        t0 + chrono::Duration::minutes(90)
    );
    assert!(dir.join(SESSION_FILE).exists());
}

#[tokio::test]
async fn rejected_stale_process_leaves_renewed_session_on_disk() {
    let mut server = Server::new_async().await;
    let state = tempfile::tempdir().unwrap();
    let dir = state.path();
    let now = Utc::now().timestamp();
    let first = token("user-1", now, now + 600);
    let renewed = token("user-1", now + 1, now + 3600);
    mock_login_and_refresh(&mut server, &first, &renewed).await;
    server
        .mock("GET", "/campaigns")
        .match_header("authorization", format!("Bearer {first}").as_str())
        .with_status(401)
        .create_async()
        .await;

    let stale = manager_for(&server.url(), dir);
    stale.login("ana@example.com", "secret").await.unwrap();
    let fresh = manager_for(&server.url(), dir);
    fresh.refresh().await.unwrap();

    let request = stale.request(Method::GET, "campaigns").unwrap();
    assert!(stale.send(request).await.is_err());

    assert_eq!(stale.status(), SessionStatus::Ended(EndReason::Unauthorized));
    assert!(dir.join(SESSION_FILE).exists());
    assert!(matches!(
        RouteGate::on_disk(dir).check_at(Utc::now()),
        GateDecision::Allow { .. }
    ));
    let restarted = manager_for(&server.url(), dir);
    assert_eq!(restarted.current_session().unwrap().expires_at().timestamp(), now + 3600);
    assert!(fresh.current_session().is_some());
}
