//! Feature state machines and the bundle that mounts them.

mod analysis;
mod auth;
mod leaderboard;
mod report;

use tracing::info;

pub use self::analysis::{
    AnalysisMachine, AnalysisResult, AnalysisState, LocalAttempt, ModelSource, ANALYSIS_FAULT_PREFIX,
    DEGRADED_CONFIDENCE, ERROR_CLASS, MANGROVE_CLASS, NON_MANGROVE_CLASS,
};
pub use self::auth::{AuthMachine, AuthState, LOGIN_FAILED, NETWORK_ERROR_PREFIX, REGISTRATION_FAILED};
pub use self::leaderboard::{LeaderboardMachine, LeaderboardState};
pub use self::report::{ReportMachine, ReportState};

use crate::capabilities::Capabilities;
use crate::config::ClientConfig;
use crate::container::Container;
use crate::event::{AuthEvent, LeaderboardEvent, ReportEvent};

/// One running container per feature, sharing a set of capabilities.
pub struct App {
    pub auth: Container<AuthMachine>,
    pub reports: Container<ReportMachine>,
    pub leaderboard: Container<LeaderboardMachine>,
    pub analysis: Container<AnalysisMachine>,
}

impl App {
    /// Spawns every container and queues the initial session check.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(caps: &Capabilities, config: &ClientConfig) -> Self {
        let buffer = config.transition_buffer;
        let app = Self {
            auth: Container::with_buffer(AuthMachine::new(caps.auth.clone()), buffer),
            reports: Container::with_buffer(ReportMachine::new(caps.reports.clone()), buffer),
            leaderboard: Container::with_buffer(LeaderboardMachine::new(caps.leaderboard.clone()), buffer),
            analysis: Container::with_buffer(
                AnalysisMachine::new(caps.local.clone(), caps.remote.clone()),
                buffer,
            ),
        };
        app.auth.submit(AuthEvent::CheckRequested);
        info!("containers started");
        app
    }

    /// Reloads the data screens, e.g. after a login.
    pub fn refresh(&self) {
        self.reports.submit(ReportEvent::RefreshRequested);
        self.leaderboard.submit(LeaderboardEvent::RefreshRequested);
    }

    /// Drains every container.
    pub async fn shutdown(self) {
        tokio::join!(
            self.auth.shutdown(),
            self.reports.shutdown(),
            self.leaderboard.shutdown(),
            self.analysis.shutdown(),
        );
    }
}
