use std::path::PathBuf;

use crate::model::{Password, Registration, Report, ReportStatus, User};

/// An intent submitted to a state container.
pub trait Intent: Send + 'static {
    /// Stable variant name used for tracing.
    fn name(&self) -> &'static str;
}

// --- Auth ---

#[derive(Clone, Debug, PartialEq)]
pub enum AuthEvent {
    CheckRequested,
    LoginRequested { email: String, password: Password },
    RegisterRequested(Box<Registration>),
    LogoutRequested,
    UserUpdated(Box<User>),
}

impl AuthEvent {
    pub fn login(email: impl Into<String>, password: impl Into<String>) -> Self {
        Self::LoginRequested {
            email: email.into(),
            password: Password::new(password),
        }
    }
}

impl Intent for AuthEvent {
    fn name(&self) -> &'static str {
        match self {
            Self::CheckRequested => "check_requested",
            Self::LoginRequested { .. } => "login_requested",
            Self::RegisterRequested(_) => "register_requested",
            Self::LogoutRequested => "logout_requested",
            Self::UserUpdated(_) => "user_updated",
        }
    }
}

// --- Reports ---

#[derive(Clone, Debug, PartialEq)]
pub enum ReportEvent {
    LoadRequested,
    RefreshRequested,
    Submitted(Box<Report>),
    /// `None` clears the filter.
    FilterChanged(Option<ReportStatus>),
}

impl Intent for ReportEvent {
    fn name(&self) -> &'static str {
        match self {
            Self::LoadRequested => "load_requested",
            Self::RefreshRequested => "refresh_requested",
            Self::Submitted(_) => "submitted",
            Self::FilterChanged(_) => "filter_changed",
        }
    }
}

// --- Leaderboard ---

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LeaderboardEvent {
    LoadRequested,
    RefreshRequested,
}

impl Intent for LeaderboardEvent {
    fn name(&self) -> &'static str {
        match self {
            Self::LoadRequested => "load_requested",
            Self::RefreshRequested => "refresh_requested",
        }
    }
}

// --- Image analysis ---

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AnalysisEvent {
    AnalysisRequested { image_path: PathBuf },
    Reset,
}

impl AnalysisEvent {
    pub fn analyze(image_path: impl Into<PathBuf>) -> Self {
        Self::AnalysisRequested {
            image_path: image_path.into(),
        }
    }
}

impl Intent for AnalysisEvent {
    fn name(&self) -> &'static str {
        match self {
            Self::AnalysisRequested { .. } => "analysis_requested",
            Self::Reset => "reset",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_compare_structurally() {
        assert_eq!(AuthEvent::login("a@b.co", "pw"), AuthEvent::login("a@b.co", "pw"));
        assert_ne!(AuthEvent::login("a@b.co", "pw"), AuthEvent::login("a@b.co", "other"));
        assert_eq!(AnalysisEvent::analyze("/tmp/x.jpg"), AnalysisEvent::analyze("/tmp/x.jpg"));
    }

    #[test]
    fn login_debug_hides_password() {
        let rendered = format!("{:?}", AuthEvent::login("a@b.co", "hunter22"));
        assert!(rendered.contains("a@b.co"));
        assert!(!rendered.contains("hunter22"));
    }

    #[test]
    fn event_size_is_reasonable() {
        // Large payloads are boxed.
        assert!(std::mem::size_of::<AuthEvent>() <= 64);
        assert!(std::mem::size_of::<ReportEvent>() <= 16);
    }
}
