//! Client core for Mangrove Watch.
//!
//! Each feature (auth, reports, leaderboard, image analysis) is a
//! [`Machine`] running inside its own [`Container`]: events go in, states
//! come out, and all I/O goes through the façades in [`capabilities`].

#![forbid(unsafe_code)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::too_many_lines)]

pub mod app;
pub mod capabilities;
pub mod config;
pub mod container;
pub mod crypto;
pub mod error;
pub mod event;
pub mod image_processing;
pub mod logging;
pub mod model;
#[cfg(feature = "ml")]
pub mod vision;

pub use app::{
    AnalysisMachine, AnalysisResult, AnalysisState, App, AuthMachine, AuthState, LeaderboardMachine,
    LeaderboardState, ModelSource, ReportMachine, ReportState,
};
pub use capabilities::Capabilities;
pub use config::ClientConfig;
pub use container::{Container, Emitter, EventSender, Machine};
pub use error::{ServiceError, ValidationError};
pub use event::{AnalysisEvent, AuthEvent, Intent, LeaderboardEvent, ReportEvent};
