mod common;

use common::{FakeAuth, FakeEngine, FakeLeaderboard, FakeRemote, FakeReports};
use mangrove_shared::capabilities::{LocalEngine, MemoryCredentialStore};
use mangrove_shared::{App, AuthState, Capabilities, ClientConfig, LeaderboardState, ReportState};
use std::sync::Arc;
use std::time::Duration;

fn fakes() -> Capabilities {
    Capabilities {
        auth: Arc::new(FakeAuth::default()),
        reports: Arc::new(FakeReports::default()),
        leaderboard: Arc::new(FakeLeaderboard::default()),
        remote: Arc::new(FakeRemote::default()),
        local: Arc::new(LocalEngine::new(Arc::new(FakeEngine::new(false, false)))),
    }
}

#[tokio::test]
async fn start_checks_the_session() {
    let app = App::start(&fakes(), &ClientConfig::default());
    let mut auth = app.auth.subscribe();

    tokio::time::timeout(Duration::from_secs(5), auth.wait_for(|s| *s == AuthState::Unauthenticated))
        .await
        .expect("session check did not finish")
        .unwrap();

    app.refresh();
    let mut reports = app.reports.subscribe();
    let mut leaderboard = app.leaderboard.subscribe();
    reports
        .wait_for(|s| matches!(s, ReportState::Loaded { .. }))
        .await
        .unwrap();
    leaderboard
        .wait_for(|s| matches!(s, LeaderboardState::Loaded { stats: None, .. }))
        .await
        .unwrap();

    app.shutdown().await;
}

#[tokio::test]
async fn connect_wires_the_http_client() {
    let config = ClientConfig::default();
    let caps = Capabilities::connect(&config, Arc::new(MemoryCredentialStore::new())).unwrap();

    assert!(!caps.auth.is_logged_in().await.unwrap());
    assert!(!caps.local.is_ready());
}
