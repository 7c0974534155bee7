#![allow(dead_code)]

use async_trait::async_trait;
use mangrove_shared::capabilities::{
    AuthResponse, AuthService, InferenceEngine, LeaderboardApi, RawPrediction, RemotePredictor, ReportApi,
};
use mangrove_shared::model::{
    AuthToken, Coordinate, IncidentType, LeaderboardEntry, Password, Registration, Report, ReportStatus, User,
    UserStats,
};
use mangrove_shared::ServiceError;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

/// Collects the next `n` transitions, failing the test if they don't arrive.
pub async fn next_states<S: Clone>(rx: &mut broadcast::Receiver<S>, n: usize) -> Vec<S> {
    let mut out = Vec::with_capacity(n);
    for _ in 0..n {
        let state = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("transition timed out")
            .expect("transition stream closed");
        out.push(state);
    }
    out
}

/// Local HTTP server answering every request with `200` and `body`.
/// Returns its base URL.
pub async fn serve_json(body: &'static str) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => request.extend_from_slice(&buf[..n]),
                    }
                }
                let response = format!(
                    "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            });
        }
    });
    format!("http://{addr}")
}

pub fn user(id: &str) -> User {
    User::new(id, "Ana", "ana@example.org")
}

pub fn report(title: &str, status: ReportStatus, created_at: &str) -> Report {
    let mut r = Report::new(
        IncidentType::IllegalCutting,
        title,
        "cut stumps near the creek",
        Coordinate::new(-2.17, 40.9).unwrap(),
    );
    r.status = status;
    r.created_at = Some(created_at.to_owned());
    r
}

// --- Auth ---

#[derive(Default)]
pub struct FakeAuth {
    pub saved: Mutex<Option<(User, AuthToken)>>,
    pub token_valid: AtomicBool,
    pub login_response: Mutex<Option<AuthResponse>>,
    pub transport_down: AtomicBool,
    pub logout_fault: AtomicBool,
    pub validate_calls: AtomicUsize,
}

impl FakeAuth {
    pub fn signed_in(user: User, token: &str) -> Self {
        let fake = Self::default();
        *fake.saved.lock().unwrap() = Some((user, AuthToken::new(token)));
        fake.token_valid.store(true, Ordering::SeqCst);
        fake
    }

    fn fault(&self) -> Result<(), ServiceError> {
        if self.transport_down.load(Ordering::SeqCst) {
            return Err(ServiceError::Transport("connection refused".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl AuthService for FakeAuth {
    async fn login(&self, _email: &str, _password: &Password) -> Result<AuthResponse, ServiceError> {
        self.fault()?;
        let response = self.login_response.lock().unwrap().clone().unwrap_or_default();
        if let Some(session) = response.session() {
            *self.saved.lock().unwrap() = Some((session.user, session.token));
        }
        Ok(response)
    }

    async fn register(&self, registration: &Registration) -> Result<AuthResponse, ServiceError> {
        self.fault()?;
        Ok(AuthResponse::accepted(
            User::new("new", registration.name.clone(), registration.email.clone()),
            AuthToken::new("fresh"),
        ))
    }

    async fn logout(&self) -> Result<(), ServiceError> {
        if self.logout_fault.load(Ordering::SeqCst) {
            return Err(ServiceError::Storage("keychain locked".into()));
        }
        *self.saved.lock().unwrap() = None;
        Ok(())
    }

    async fn is_logged_in(&self) -> Result<bool, ServiceError> {
        Ok(self.saved.lock().unwrap().is_some())
    }

    async fn validate_token(&self) -> Result<bool, ServiceError> {
        self.validate_calls.fetch_add(1, Ordering::SeqCst);
        self.fault()?;
        Ok(self.token_valid.load(Ordering::SeqCst))
    }

    async fn get_user(&self) -> Result<Option<User>, ServiceError> {
        Ok(self.saved.lock().unwrap().as_ref().map(|(u, _)| u.clone()))
    }

    async fn get_token(&self) -> Result<Option<AuthToken>, ServiceError> {
        Ok(self.saved.lock().unwrap().as_ref().map(|(_, t)| t.clone()))
    }
}

// --- Reports ---

#[derive(Default)]
pub struct FakeReports {
    pub stored: Mutex<Vec<Report>>,
    pub fail_fetch: AtomicBool,
    pub fail_submit: AtomicBool,
    pub fetches: AtomicUsize,
}

#[async_trait]
impl ReportApi for FakeReports {
    async fn get_reports(&self) -> Result<Vec<Report>, ServiceError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(ServiceError::Timeout(Duration::from_secs(30)));
        }
        Ok(self.stored.lock().unwrap().clone())
    }

    async fn submit_report(&self, report: &Report) -> Result<Report, ServiceError> {
        if self.fail_submit.load(Ordering::SeqCst) {
            return Err(ServiceError::rejected("Location is outside the monitored area"));
        }
        let mut stored = report.clone();
        stored.created_at = Some("2026-10-16T09:00:00Z".into());
        self.stored.lock().unwrap().push(stored.clone());
        Ok(stored)
    }
}

// --- Leaderboard ---

#[derive(Default)]
pub struct FakeLeaderboard {
    pub entries: Vec<LeaderboardEntry>,
    pub stats: Option<UserStats>,
    pub fail_entries: AtomicBool,
}

#[async_trait]
impl LeaderboardApi for FakeLeaderboard {
    async fn get_leaderboard(&self) -> Result<Vec<LeaderboardEntry>, ServiceError> {
        if self.fail_entries.load(Ordering::SeqCst) {
            return Err(ServiceError::Transport("dns failure".into()));
        }
        Ok(self.entries.clone())
    }

    async fn get_user_stats(&self) -> Result<UserStats, ServiceError> {
        self.stats.clone().ok_or(ServiceError::Unauthorized)
    }
}

pub fn entry(rank: u32, name: &str, points: u32) -> LeaderboardEntry {
    LeaderboardEntry {
        rank,
        name: name.to_owned(),
        points,
        total_reports: points / 10,
        verified_reports: 0,
        badges: Vec::new(),
        organization: None,
    }
}

// --- Inference ---

pub struct FakeEngine {
    pub loads: bool,
    pub fail_predict: bool,
    pub loaded: AtomicBool,
    pub predictions: AtomicUsize,
}

impl FakeEngine {
    pub fn new(loads: bool, fail_predict: bool) -> Self {
        Self {
            loads,
            fail_predict,
            loaded: AtomicBool::new(false),
            predictions: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl InferenceEngine for FakeEngine {
    async fn initialize(&self) -> bool {
        self.loaded.store(self.loads, Ordering::SeqCst);
        self.loads
    }

    fn is_model_loaded(&self) -> bool {
        self.loaded.load(Ordering::SeqCst)
    }

    async fn predict_mangrove(&self, _image: Vec<u8>) -> Result<RawPrediction, ServiceError> {
        self.predictions.fetch_add(1, Ordering::SeqCst);
        if self.fail_predict {
            return Err(ServiceError::Inference("tensor shape mismatch".into()));
        }
        Ok(RawPrediction {
            is_mangrove: Some(true),
            confidence: Some(0.91),
            mangrove_probability: Some(0.91),
            prediction_class: Some("mangrove".into()),
            message: None,
        })
    }
}

#[derive(Default)]
pub struct FakeRemote {
    pub down: AtomicBool,
    pub calls: AtomicUsize,
}

#[async_trait]
impl RemotePredictor for FakeRemote {
    async fn predict_mangrove_from_image(&self, _image_path: &Path) -> Result<RawPrediction, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.down.load(Ordering::SeqCst) {
            return Err(ServiceError::Transport("prediction service unreachable".into()));
        }
        Ok(RawPrediction {
            is_mangrove: Some(false),
            confidence: Some(0.72),
            mangrove_probability: Some(0.28),
            prediction_class: Some("non_mangrove".into()),
            message: Some("No mangrove vegetation detected".into()),
        })
    }
}
