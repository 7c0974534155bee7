use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

/// Failure reported by a service façade.
///
/// `Rejected` is the collaborator answering "no" (bad credentials, validation
/// failure, 4xx/5xx with a message). Everything else is a transport or local
/// fault that never reached a verdict.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ServiceError {
    #[error("{}", .message.as_deref().unwrap_or("request rejected"))]
    Rejected {
        status: Option<u16>,
        message: Option<String>,
    },

    #[error("session is no longer valid")]
    Unauthorized,

    #[error("{0}")]
    Transport(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("invalid response: {0}")]
    Decode(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("inference error: {0}")]
    Inference(String),

    #[error("invalid input: {0}")]
    Invalid(String),
}

impl ServiceError {
    #[must_use]
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected {
            status: None,
            message: Some(message.into()),
        }
    }

    /// The collaborator's own message, when it supplied one.
    #[must_use]
    pub fn service_message(&self) -> Option<&str> {
        match self {
            Self::Rejected { message, .. } => message.as_deref(),
            _ => None,
        }
    }

    #[must_use]
    pub const fn is_rejection(&self) -> bool {
        matches!(self, Self::Rejected { .. } | Self::Unauthorized)
    }

    /// Maps a non-success HTTP status plus optional JSON body to an error.
    ///
    /// Both the Express (`message`) and FastAPI (`detail`) error bodies are
    /// understood.
    #[must_use]
    pub fn from_http_status(status: u16, body: Option<&[u8]>) -> Self {
        if status == 401 {
            return Self::Unauthorized;
        }

        let message = body
            .and_then(|b| serde_json::from_slice::<ApiErrorBody>(b).ok())
            .and_then(ApiErrorBody::into_message);

        Self::Rejected {
            status: Some(status),
            message: message.or_else(|| Some(format!("HTTP error: {status}"))),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    detail: Option<serde_json::Value>,
}

impl ApiErrorBody {
    fn into_message(self) -> Option<String> {
        self.message.or(self.error).or_else(|| match self.detail {
            Some(serde_json::Value::String(s)) => Some(s),
            Some(other) => Some(other.to_string()),
            None => None,
        })
    }
}

impl From<std::io::Error> for ServiceError {
    fn from(e: std::io::Error) -> Self {
        Self::Storage(e.to_string())
    }
}

/// Rejected domain value.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("invalid coordinate: lat={0}, lng={1}")]
    InvalidCoordinate(f64, f64),

    #[error("{field} cannot be empty")]
    Empty { field: &'static str },

    #[error("{field} too long ({len} > {max})")]
    TooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },

    #[error("invalid email address")]
    InvalidEmail,
}

impl From<ValidationError> for ServiceError {
    fn from(e: ValidationError) -> Self {
        Self::Invalid(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn express_message_is_used() {
        let err = ServiceError::from_http_status(400, Some(br#"{"success":false,"message":"Email already registered"}"#));
        assert_eq!(err.service_message(), Some("Email already registered"));
        assert_eq!(err.to_string(), "Email already registered");
    }

    #[test]
    fn fastapi_detail_is_used() {
        let err = ServiceError::from_http_status(500, Some(br#"{"detail":"Error analyzing image: boom"}"#));
        assert_eq!(err.service_message(), Some("Error analyzing image: boom"));
        assert!(matches!(err, ServiceError::Rejected { status: Some(500), .. }));
    }

    #[test]
    fn unauthorized_status_is_its_own_variant() {
        assert_eq!(ServiceError::from_http_status(401, None), ServiceError::Unauthorized);
    }

    #[test]
    fn missing_body_falls_back_to_status() {
        let err = ServiceError::from_http_status(404, Some(b"<html>"));
        assert_eq!(err.service_message(), Some("HTTP error: 404"));
        assert!(err.is_rejection());
    }

    #[test]
    fn transport_errors_are_not_rejections() {
        assert!(!ServiceError::Transport("connection refused".into()).is_rejection());
        assert!(ServiceError::rejected("bad creds").is_rejection());
    }
}
