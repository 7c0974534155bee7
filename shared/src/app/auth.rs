use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::capabilities::{AuthResponse, AuthService};
use crate::container::{Emitter, Machine};
use crate::error::ServiceError;
use crate::event::AuthEvent;
use crate::model::{AuthToken, User};

pub const LOGIN_FAILED: &str = "Login failed";
pub const REGISTRATION_FAILED: &str = "Registration failed";
pub const NETWORK_ERROR_PREFIX: &str = "Network error: ";

#[derive(Clone, Debug, PartialEq)]
pub enum AuthState {
    Initial,
    Loading,
    Authenticated { user: User, token: AuthToken },
    Unauthenticated,
    Error(String),
}

impl AuthState {
    #[must_use]
    pub fn user(&self) -> Option<&User> {
        match self {
            Self::Authenticated { user, .. } => Some(user),
            _ => None,
        }
    }

    #[must_use]
    pub const fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated { .. })
    }
}

pub struct AuthMachine {
    auth: Arc<dyn AuthService>,
}

impl AuthMachine {
    pub fn new(auth: Arc<dyn AuthService>) -> Self {
        Self { auth }
    }

    async fn check(&self, emitter: &Emitter<Self>) -> Result<(), ServiceError> {
        emitter.emit(AuthState::Loading);

        if !self.auth.is_logged_in().await? {
            debug!("no saved session");
            emitter.emit(AuthState::Unauthenticated);
            return Ok(());
        }
        if !self.auth.validate_token().await? {
            info!("saved session rejected by server");
            emitter.emit(AuthState::Unauthenticated);
            return Ok(());
        }

        let user = self.auth.get_user().await?;
        let token = self.auth.get_token().await?;
        emitter.emit(match (user, token) {
            (Some(user), Some(token)) => AuthState::Authenticated { user, token },
            _ => AuthState::Unauthenticated,
        });
        Ok(())
    }
}

/// Maps a login/register outcome to the state it produces.
fn settle(outcome: Result<AuthResponse, ServiceError>, default_message: &str) -> AuthState {
    match outcome {
        Ok(response) => match (response.success, response.user, response.token) {
            (true, Some(user), Some(token)) => AuthState::Authenticated { user, token },
            (_, _, _) => AuthState::Error(
                response
                    .message
                    .filter(|m| !m.trim().is_empty())
                    .unwrap_or_else(|| default_message.to_owned()),
            ),
        },
        Err(e) if e.is_rejection() => {
            AuthState::Error(e.service_message().unwrap_or(default_message).to_owned())
        }
        Err(e) => {
            warn!(error = %e, "auth request failed");
            AuthState::Error(format!("{NETWORK_ERROR_PREFIX}{e}"))
        }
    }
}

#[async_trait]
impl Machine for AuthMachine {
    type Event = AuthEvent;
    type State = AuthState;
    type Error = ServiceError;

    const NAME: &'static str = "auth";

    fn initial_state(&self) -> AuthState {
        AuthState::Initial
    }

    fn fault_state(&self, description: &str) -> AuthState {
        AuthState::Error(format!("{NETWORK_ERROR_PREFIX}{description}"))
    }

    async fn handle(&self, event: AuthEvent, emitter: &Emitter<Self>) -> Result<(), ServiceError> {
        match event {
            AuthEvent::CheckRequested => self.check(emitter).await?,
            AuthEvent::LoginRequested { email, password } => {
                emitter.emit(AuthState::Loading);
                let outcome = self.auth.login(&email, &password).await;
                emitter.emit(settle(outcome, LOGIN_FAILED));
            }
            AuthEvent::RegisterRequested(registration) => {
                emitter.emit(AuthState::Loading);
                let outcome = self.auth.register(&registration).await;
                emitter.emit(settle(outcome, REGISTRATION_FAILED));
            }
            AuthEvent::LogoutRequested => {
                emitter.emit(AuthState::Loading);
                self.auth.logout().await?;
                emitter.emit(AuthState::Unauthenticated);
            }
            AuthEvent::UserUpdated(user) => {
                if let AuthState::Authenticated { token, .. } = emitter.current() {
                    emitter.emit(AuthState::Authenticated { user: *user, token });
                }
            }
        }
        Ok(())
    }
}
