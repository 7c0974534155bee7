use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::capabilities::LeaderboardApi;
use crate::container::{Emitter, Machine};
use crate::error::ServiceError;
use crate::event::LeaderboardEvent;
use crate::model::{LeaderboardEntry, UserStats};

pub const LEADERBOARD_FAULT_PREFIX: &str = "Network error: ";

#[derive(Clone, Debug, PartialEq)]
pub enum LeaderboardState {
    Initial,
    Loading,
    Loaded {
        entries: Vec<LeaderboardEntry>,
        /// `None` when stats could not be fetched, e.g. signed out.
        stats: Option<UserStats>,
    },
    Error(String),
}

pub struct LeaderboardMachine {
    api: Arc<dyn LeaderboardApi>,
}

impl LeaderboardMachine {
    pub fn new(api: Arc<dyn LeaderboardApi>) -> Self {
        Self { api }
    }

    async fn fetch(&self) -> LeaderboardState {
        let (entries, stats) = tokio::join!(self.api.get_leaderboard(), self.api.get_user_stats());

        let mut entries = match entries {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "failed to load leaderboard");
                return LeaderboardState::Error(match e.service_message() {
                    Some(message) => message.to_owned(),
                    None => format!("{LEADERBOARD_FAULT_PREFIX}{e}"),
                });
            }
        };
        entries.sort_by_key(|entry| entry.rank);

        let stats = stats
            .map_err(|e| warn!(error = %e, "user stats unavailable"))
            .ok();
        debug!(count = entries.len(), has_stats = stats.is_some(), "leaderboard loaded");
        LeaderboardState::Loaded { entries, stats }
    }
}

#[async_trait]
impl Machine for LeaderboardMachine {
    type Event = LeaderboardEvent;
    type State = LeaderboardState;
    type Error = ServiceError;

    const NAME: &'static str = "leaderboard";

    fn initial_state(&self) -> LeaderboardState {
        LeaderboardState::Initial
    }

    fn fault_state(&self, description: &str) -> LeaderboardState {
        LeaderboardState::Error(format!("{LEADERBOARD_FAULT_PREFIX}{description}"))
    }

    async fn handle(&self, event: LeaderboardEvent, emitter: &Emitter<Self>) -> Result<(), ServiceError> {
        if event == LeaderboardEvent::LoadRequested {
            emitter.emit(LeaderboardState::Loading);
        }
        emitter.emit(self.fetch().await);
        Ok(())
    }
}
