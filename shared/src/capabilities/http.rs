use async_trait::async_trait;
use reqwest::{multipart, Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::{
    AuthResponse, AuthService, CredentialStore, LeaderboardApi, RawPrediction, RemotePredictor, ReportApi,
};
use crate::config::{BaseUrl, ClientConfig};
use crate::error::ServiceError;
use crate::model::{AuthToken, LeaderboardEntry, Password, Registration, Report, User, UserStats};

// =============================================================================
// Constants
// =============================================================================

pub const MAX_UPLOAD_BYTES: u64 = 20 * 1024 * 1024;
pub const MAX_RESPONSE_BYTES: usize = 10 * 1024 * 1024;
const PREDICT_PATH: &str = "/predict-mangrove-image";
const IMAGE_FIELD: &str = "image";
const REQUEST_ID_HEADER: &str = "X-Request-Id";

// =============================================================================
// Response shapes
// =============================================================================

/// A list either bare or wrapped in a named field.
#[derive(Deserialize)]
#[serde(untagged)]
enum Listing<T> {
    Bare(Vec<T>),
    Wrapped {
        #[serde(alias = "incidents", alias = "reports", alias = "leaderboard", alias = "data")]
        items: Vec<T>,
    },
}

impl<T> Listing<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            Self::Bare(items) | Self::Wrapped { items } => items,
        }
    }
}

/// Decodes a list record by record. Records that don't parse are logged and
/// skipped so one bad row can't hide the rest.
fn parse_list<T: DeserializeOwned>(body: &[u8]) -> Result<Vec<T>, ServiceError> {
    let raw: Listing<serde_json::Value> =
        serde_json::from_slice(body).map_err(|e| ServiceError::Decode(e.to_string()))?;
    let raw = raw.into_vec();
    let total = raw.len();

    let items: Vec<T> = raw
        .into_iter()
        .enumerate()
        .filter_map(|(index, value)| match serde_json::from_value(value) {
            Ok(item) => Some(item),
            Err(e) => {
                warn!(index, error = %e, "skipping malformed record");
                None
            }
        })
        .collect();
    if items.len() < total {
        warn!(kept = items.len(), total, "list decoded with skipped records");
    }
    Ok(items)
}

/// A single record, wrapped or bare. Wrapped is tried first because several
/// of our records accept an empty object.
#[derive(Deserialize)]
#[serde(untagged)]
enum Single<T> {
    Wrapped {
        #[serde(
            alias = "incident",
            alias = "report",
            alias = "user",
            alias = "stats",
            alias = "prediction",
            alias = "data"
        )]
        item: T,
    },
    Bare(T),
}

impl<T> Single<T> {
    fn into_inner(self) -> T {
        match self {
            Self::Wrapped { item } | Self::Bare(item) => item,
        }
    }
}

#[derive(serde::Serialize)]
struct LoginBody<'a> {
    email: &'a str,
    password: &'a Password,
}

// =============================================================================
// ApiClient
// =============================================================================

/// HTTP client for the Mangrove Watch API and the prediction service.
///
/// Authenticated calls read the bearer token from the credential store on
/// every request, so a logout takes effect immediately.
pub struct ApiClient {
    http: Client,
    api: BaseUrl,
    ml: BaseUrl,
    request_timeout: Duration,
    prediction_timeout: Duration,
    leaderboard_limit: u32,
    credentials: Arc<dyn CredentialStore>,
}

impl ApiClient {
    pub fn new(config: &ClientConfig, credentials: Arc<dyn CredentialStore>) -> Result<Self, ServiceError> {
        let http = Client::builder()
            .timeout(config.request_timeout())
            .user_agent(concat!("mangrove-shared/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ServiceError::Transport(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            http,
            api: config.api_base_url.clone(),
            ml: config.prediction_base_url.clone(),
            request_timeout: config.request_timeout(),
            prediction_timeout: config.prediction_timeout(),
            leaderboard_limit: config.leaderboard_limit,
            credentials,
        })
    }

    async fn token(&self) -> Result<Option<AuthToken>, ServiceError> {
        Ok(self.credentials.load().await?.map(|s| s.token))
    }

    async fn authorized(&self, request: RequestBuilder) -> Result<RequestBuilder, ServiceError> {
        Ok(match self.token().await? {
            Some(token) => request.bearer_auth(token.expose()),
            None => request,
        })
    }

    async fn send(&self, request: RequestBuilder, timeout: Duration) -> Result<Response, ServiceError> {
        // Lets server logs be matched to ours.
        let request_id = Uuid::new_v4();
        let response = request
            .header(REQUEST_ID_HEADER, request_id.to_string())
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| transport_error(&e, timeout))?;
        debug!(%request_id, status = response.status().as_u16(), "response");
        Ok(response)
    }

    /// Reads the body, giving up as soon as it passes [`MAX_RESPONSE_BYTES`].
    async fn body(mut response: Response, timeout: Duration) -> Result<Vec<u8>, ServiceError> {
        if let Some(declared) = response.content_length() {
            check_body_size(usize::try_from(declared).unwrap_or(usize::MAX))?;
        }
        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(|e| transport_error(&e, timeout))? {
            check_body_size(body.len().saturating_add(chunk.len()))?;
            body.extend_from_slice(&chunk);
        }
        Ok(body)
    }

    /// Success body decoded as `T`, anything else mapped through
    /// [`ServiceError::from_http_status`].
    async fn decode<T: DeserializeOwned>(response: Response, timeout: Duration) -> Result<T, ServiceError> {
        let status = response.status();
        let body = Self::body(response, timeout).await?;
        if !status.is_success() {
            return Err(ServiceError::from_http_status(status.as_u16(), Some(&body)));
        }
        serde_json::from_slice(&body).map_err(|e| ServiceError::Decode(e.to_string()))
    }

    async fn decode_list<T: DeserializeOwned>(response: Response, timeout: Duration) -> Result<Vec<T>, ServiceError> {
        let status = response.status();
        let body = Self::body(response, timeout).await?;
        if !status.is_success() {
            return Err(ServiceError::from_http_status(status.as_u16(), Some(&body)));
        }
        parse_list(&body)
    }

    /// Auth endpoints answer refusals with a JSON body we want to keep.
    async fn auth_exchange(&self, request: RequestBuilder) -> Result<AuthResponse, ServiceError> {
        let response = self.send(request, self.request_timeout).await?;
        let status = response.status();
        let body = Self::body(response, self.request_timeout).await?;

        match serde_json::from_slice::<AuthResponse>(&body) {
            Ok(mut parsed) => {
                if !status.is_success() {
                    parsed.success = false;
                }
                Ok(parsed)
            }
            Err(_) if !status.is_success() => match ServiceError::from_http_status(status.as_u16(), Some(&body)) {
                ServiceError::Unauthorized => Ok(AuthResponse::default()),
                other => Err(other),
            },
            Err(e) => Err(ServiceError::Decode(e.to_string())),
        }
    }

    #[instrument(skip(self, password))]
    pub async fn login(&self, email: &str, password: &Password) -> Result<AuthResponse, ServiceError> {
        let request = self
            .http
            .post(self.api.join("/auth/login"))
            .json(&LoginBody { email, password });
        self.auth_exchange(request).await
    }

    #[instrument(skip_all, fields(email = %registration.email, role = ?registration.role))]
    pub async fn register(&self, registration: &Registration) -> Result<AuthResponse, ServiceError> {
        let request = self.http.post(self.api.join("/auth/register")).json(registration);
        self.auth_exchange(request).await
    }

    #[instrument(skip(self))]
    pub async fn logout(&self) -> Result<(), ServiceError> {
        let request = self.authorized(self.http.post(self.api.join("/auth/logout"))).await?;
        let response = self.send(request, self.request_timeout).await?;
        let status = response.status();
        if status.is_success() || status.as_u16() == 401 {
            return Ok(());
        }
        let body = Self::body(response, self.request_timeout).await?;
        Err(ServiceError::from_http_status(status.as_u16(), Some(&body)))
    }

    /// The server's view of the current user; `None` when the token is
    /// missing or rejected.
    #[instrument(skip(self))]
    pub async fn current_user(&self) -> Result<Option<User>, ServiceError> {
        let Some(token) = self.token().await? else {
            return Ok(None);
        };
        let request = self.http.get(self.api.join("/auth/me")).bearer_auth(token.expose());
        let response = self.send(request, self.request_timeout).await?;
        match Self::decode::<Single<User>>(response, self.request_timeout).await {
            Ok(user) => Ok(Some(user.into_inner())),
            Err(ServiceError::Unauthorized) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

fn check_body_size(size: usize) -> Result<(), ServiceError> {
    if size > MAX_RESPONSE_BYTES {
        return Err(ServiceError::Decode(format!(
            "response of {size} bytes exceeds {MAX_RESPONSE_BYTES}"
        )));
    }
    Ok(())
}

fn transport_error(e: &reqwest::Error, timeout: Duration) -> ServiceError {
    if e.is_timeout() {
        ServiceError::Timeout(timeout)
    } else if e.is_decode() {
        ServiceError::Decode(e.to_string())
    } else {
        ServiceError::Transport(describe(e))
    }
}

/// Error chain with the request URL reduced to its path.
fn describe(e: &reqwest::Error) -> String {
    let mut shown = e.to_string();
    let mut source = std::error::Error::source(e);
    while let Some(err) = source {
        shown.push_str(": ");
        shown.push_str(&err.to_string());
        source = err.source();
    }
    match e.url() {
        Some(url) => shown.replace(url.as_str(), url.path()),
        None => shown,
    }
}

fn image_mime(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("webp") => "image/webp",
        _ => "application/octet-stream",
    }
}

#[async_trait]
impl ReportApi for ApiClient {
    #[instrument(skip(self))]
    async fn get_reports(&self) -> Result<Vec<Report>, ServiceError> {
        let request = self.authorized(self.http.get(self.api.join("/incidents"))).await?;
        let response = self.send(request, self.request_timeout).await?;
        let reports: Vec<Report> = Self::decode_list(response, self.request_timeout).await?;
        debug!(count = reports.len(), "reports fetched");
        Ok(reports)
    }

    #[instrument(skip_all, fields(incident_type = ?report.incident_type, severity = ?report.severity))]
    async fn submit_report(&self, report: &Report) -> Result<Report, ServiceError> {
        report.validate()?;
        let request = self
            .authorized(self.http.post(self.api.join("/incidents")).json(report))
            .await?;
        let response = self.send(request, self.request_timeout).await?;

        match Self::decode::<Single<Report>>(response, self.request_timeout).await {
            Ok(created) => {
                let created = created.into_inner();
                info!(id = ?created.id, "report submitted");
                Ok(created)
            }
            // Accepted, but the body is not a report; keep what we sent.
            Err(ServiceError::Decode(reason)) => {
                warn!(%reason, "report accepted with unrecognized body");
                Ok(report.clone())
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl LeaderboardApi for ApiClient {
    #[instrument(skip(self), fields(limit = self.leaderboard_limit))]
    async fn get_leaderboard(&self) -> Result<Vec<LeaderboardEntry>, ServiceError> {
        let request = self
            .http
            .get(self.api.join("/leaderboard"))
            .query(&[("limit", self.leaderboard_limit)]);
        let request = self.authorized(request).await?;
        let response = self.send(request, self.request_timeout).await?;
        Self::decode_list(response, self.request_timeout).await
    }

    #[instrument(skip(self))]
    async fn get_user_stats(&self) -> Result<UserStats, ServiceError> {
        let Some(token) = self.token().await? else {
            return Err(ServiceError::Unauthorized);
        };
        let request = self.http.get(self.api.join("/users/stats")).bearer_auth(token.expose());
        let response = self.send(request, self.request_timeout).await?;
        Ok(Self::decode::<Single<UserStats>>(response, self.request_timeout)
            .await?
            .into_inner())
    }
}

#[async_trait]
impl RemotePredictor for ApiClient {
    #[instrument(skip(self), fields(path = %image_path.display()))]
    async fn predict_mangrove_from_image(&self, image_path: &Path) -> Result<RawPrediction, ServiceError> {
        let size = tokio::fs::metadata(image_path).await?.len();
        if size > MAX_UPLOAD_BYTES {
            return Err(ServiceError::Invalid(format!(
                "image of {size} bytes exceeds {MAX_UPLOAD_BYTES}"
            )));
        }
        let bytes = tokio::fs::read(image_path).await?;

        let file_name = image_path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("image.jpg")
            .to_owned();
        let part = multipart::Part::bytes(bytes)
            .file_name(file_name)
            .mime_str(image_mime(image_path))
            .map_err(|e| ServiceError::Invalid(e.to_string()))?;
        let form = multipart::Form::new().part(IMAGE_FIELD, part);

        let request = self.http.post(self.ml.join(PREDICT_PATH)).multipart(form);
        let response = self.send(request, self.prediction_timeout).await?;
        let prediction = Self::decode::<Single<RawPrediction>>(response, self.prediction_timeout)
            .await?
            .into_inner();
        debug!(?prediction, "remote prediction");
        Ok(prediction)
    }
}

// =============================================================================
// AuthGateway
// =============================================================================

/// [`AuthService`] over the API client and a credential store.
pub struct AuthGateway<C: ?Sized = dyn CredentialStore> {
    api: Arc<ApiClient>,
    credentials: Arc<C>,
}

impl<C: CredentialStore + ?Sized> AuthGateway<C> {
    pub fn new(api: Arc<ApiClient>, credentials: Arc<C>) -> Self {
        Self { api, credentials }
    }

    async fn persist(&self, response: &AuthResponse) -> Result<(), ServiceError> {
        if let Some(session) = response.session() {
            self.credentials.save(&session).await?;
            info!(user = %session.user.id, "session saved");
        }
        Ok(())
    }
}

#[async_trait]
impl<C: CredentialStore + ?Sized + 'static> AuthService for AuthGateway<C> {
    async fn login(&self, email: &str, password: &Password) -> Result<AuthResponse, ServiceError> {
        if let Err(e) = crate::model::validate_email(email) {
            return Ok(AuthResponse::refused(e.to_string()));
        }
        let response = self.api.login(email.trim(), password).await?;
        self.persist(&response).await?;
        Ok(response)
    }

    async fn register(&self, registration: &Registration) -> Result<AuthResponse, ServiceError> {
        if let Err(e) = registration.validate() {
            return Ok(AuthResponse::refused(e.to_string()));
        }
        let response = self.api.register(registration).await?;
        self.persist(&response).await?;
        Ok(response)
    }

    async fn logout(&self) -> Result<(), ServiceError> {
        if let Err(e) = self.api.logout().await {
            warn!(error = %e, "server logout failed; clearing local session anyway");
        }
        self.credentials.clear().await
    }

    async fn is_logged_in(&self) -> Result<bool, ServiceError> {
        Ok(self.credentials.load().await?.is_some())
    }

    async fn validate_token(&self) -> Result<bool, ServiceError> {
        match self.api.current_user().await? {
            Some(user) => {
                self.credentials.update_user(&user).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn get_user(&self) -> Result<Option<User>, ServiceError> {
        Ok(self.credentials.load().await?.map(|s| s.user))
    }

    async fn get_token(&self) -> Result<Option<AuthToken>, ServiceError> {
        Ok(self.credentials.load().await?.map(|s| s.token))
    }
}
