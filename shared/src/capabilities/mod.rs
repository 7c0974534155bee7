//! Service façades the state machines talk to, plus the production
//! implementations wired up by [`Capabilities::connect`].

mod credentials;
mod http;
mod inference;

use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;

use crate::config::ClientConfig;
use crate::error::ServiceError;
use crate::model::{AuthToken, LeaderboardEntry, Password, Registration, Report, Session, User, UserStats};

pub use self::credentials::{MemoryCredentialStore, SealedFileCredentialStore};
pub use self::http::{ApiClient, AuthGateway};
pub use self::inference::{LocalEngine, NoLocalEngine};

// =============================================================================
// Façade payloads
// =============================================================================

/// Login/register response. `success` with a missing user or token is still
/// a failure; the handler decides.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct AuthResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub token: Option<AuthToken>,
    #[serde(default)]
    pub user: Option<User>,
    #[serde(default)]
    pub message: Option<String>,
}

impl AuthResponse {
    pub fn accepted(user: User, token: AuthToken) -> Self {
        Self {
            success: true,
            token: Some(token),
            user: Some(user),
            message: None,
        }
    }

    pub fn refused(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            ..Self::default()
        }
    }

    /// The session, when the response carries a complete one.
    #[must_use]
    pub fn session(&self) -> Option<Session> {
        match (self.success, &self.user, &self.token) {
            (true, Some(user), Some(token)) => Some(Session {
                user: user.clone(),
                token: token.clone(),
            }),
            _ => None,
        }
    }
}

/// Prediction as returned by either engine. Every field may be missing.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawPrediction {
    #[serde(default)]
    pub is_mangrove: Option<bool>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default, alias = "probability")]
    pub mangrove_probability: Option<f64>,
    #[serde(default, alias = "predicted_class", alias = "class")]
    pub prediction_class: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

// =============================================================================
// Façades
// =============================================================================

#[async_trait]
pub trait AuthService: Send + Sync {
    async fn login(&self, email: &str, password: &Password) -> Result<AuthResponse, ServiceError>;
    async fn register(&self, registration: &Registration) -> Result<AuthResponse, ServiceError>;
    async fn logout(&self) -> Result<(), ServiceError>;
    /// Whether a session is persisted locally. No network.
    async fn is_logged_in(&self) -> Result<bool, ServiceError>;
    /// `Ok(false)` when the server says the token is no good.
    async fn validate_token(&self) -> Result<bool, ServiceError>;
    async fn get_user(&self) -> Result<Option<User>, ServiceError>;
    async fn get_token(&self) -> Result<Option<AuthToken>, ServiceError>;
}

#[async_trait]
pub trait ReportApi: Send + Sync {
    async fn get_reports(&self) -> Result<Vec<Report>, ServiceError>;
    async fn submit_report(&self, report: &Report) -> Result<Report, ServiceError>;
}

#[async_trait]
pub trait LeaderboardApi: Send + Sync {
    async fn get_leaderboard(&self) -> Result<Vec<LeaderboardEntry>, ServiceError>;
    async fn get_user_stats(&self) -> Result<UserStats, ServiceError>;
}

/// On-device classifier.
#[async_trait]
pub trait InferenceEngine: Send + Sync {
    /// Loads the model. `false` means the engine stays unavailable.
    async fn initialize(&self) -> bool;
    fn is_model_loaded(&self) -> bool;
    async fn predict_mangrove(&self, image: Vec<u8>) -> Result<RawPrediction, ServiceError>;
}

#[async_trait]
pub trait RemotePredictor: Send + Sync {
    async fn predict_mangrove_from_image(&self, image_path: &Path) -> Result<RawPrediction, ServiceError>;
}

/// Persistent login state. Only the auth gateway touches it.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn load(&self) -> Result<Option<Session>, ServiceError>;
    async fn save(&self, session: &Session) -> Result<(), ServiceError>;
    async fn update_user(&self, user: &User) -> Result<(), ServiceError>;
    async fn clear(&self) -> Result<(), ServiceError>;
}

// =============================================================================
// Bundle
// =============================================================================

#[derive(Clone)]
pub struct Capabilities {
    pub auth: Arc<dyn AuthService>,
    pub reports: Arc<dyn ReportApi>,
    pub leaderboard: Arc<dyn LeaderboardApi>,
    pub remote: Arc<dyn RemotePredictor>,
    pub local: Arc<LocalEngine>,
}

impl Capabilities {
    /// Production wiring: one HTTP client for every API façade, the given
    /// credential store behind the auth gateway, and the ONNX classifier
    /// when a model path is configured.
    pub fn connect(config: &ClientConfig, credentials: Arc<dyn CredentialStore>) -> Result<Self, ServiceError> {
        config
            .validate()
            .map_err(|e| ServiceError::Invalid(e.to_string()))?;

        let api = Arc::new(ApiClient::new(config, Arc::clone(&credentials))?);
        let auth = Arc::new(AuthGateway::new(Arc::clone(&api), credentials));

        Ok(Self {
            auth,
            reports: Arc::clone(&api) as Arc<dyn ReportApi>,
            leaderboard: Arc::clone(&api) as Arc<dyn LeaderboardApi>,
            remote: api,
            local: Arc::new(LocalEngine::new(local_engine(config))),
        })
    }
}

#[cfg(feature = "ml")]
fn local_engine(config: &ClientConfig) -> Arc<dyn InferenceEngine> {
    match &config.model_path {
        Some(path) => Arc::new(crate::vision::OnnxMangroveClassifier::new(
            path.clone(),
            config.mangrove_threshold,
        )),
        None => Arc::new(NoLocalEngine),
    }
}

#[cfg(not(feature = "ml"))]
fn local_engine(_config: &ClientConfig) -> Arc<dyn InferenceEngine> {
    Arc::new(NoLocalEngine)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_response_session_requires_all_parts() {
        let user = User::new("u1", "Ana", "ana@example.org");
        let token = AuthToken::new("t");

        assert!(AuthResponse::accepted(user.clone(), token.clone()).session().is_some());

        let missing_token = AuthResponse {
            success: true,
            user: Some(user),
            ..AuthResponse::default()
        };
        assert!(missing_token.session().is_none());
        assert!(AuthResponse::refused("no").session().is_none());
    }

    #[test]
    fn raw_prediction_accepts_service_field_names() {
        let raw: RawPrediction = serde_json::from_str(
            r#"{"is_mangrove":true,"confidence":0.91,"probability":0.91,"predicted_class":"mangrove"}"#,
        )
        .unwrap();
        assert_eq!(raw.is_mangrove, Some(true));
        assert_eq!(raw.mangrove_probability, Some(0.91));
        assert_eq!(raw.prediction_class.as_deref(), Some("mangrove"));

        let empty: RawPrediction = serde_json::from_str("{}").unwrap();
        assert_eq!(empty, RawPrediction::default());
    }

    #[tokio::test]
    async fn connect_without_model_has_no_local_engine() {
        let caps = Capabilities::connect(&ClientConfig::default(), Arc::new(MemoryCredentialStore::new())).unwrap();
        assert!(!caps.local.ensure_initialized().await);
        assert!(!caps.local.is_ready());
    }
}
