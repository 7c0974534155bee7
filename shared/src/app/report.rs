use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::capabilities::ReportApi;
use crate::container::{Emitter, Machine};
use crate::error::ServiceError;
use crate::event::ReportEvent;
use crate::model::{sort_newest_first, Report, ReportStatus};

pub const REPORT_FAULT_PREFIX: &str = "Network error: ";

#[derive(Clone, Debug, PartialEq)]
pub enum ReportState {
    Initial,
    Loading,
    Loaded {
        reports: Vec<Report>,
        filter: Option<ReportStatus>,
    },
    Submitting,
    SubmitSuccess(Report),
    Error(String),
}

pub struct ReportMachine {
    api: Arc<dyn ReportApi>,
}

impl ReportMachine {
    pub fn new(api: Arc<dyn ReportApi>) -> Self {
        Self { api }
    }

    async fn fetch(&self, filter: Option<ReportStatus>) -> ReportState {
        match self.api.get_reports().await {
            Ok(mut reports) => {
                if let Some(status) = &filter {
                    reports.retain(|r| r.status == *status);
                }
                sort_newest_first(&mut reports);
                debug!(count = reports.len(), ?filter, "reports loaded");
                ReportState::Loaded { reports, filter }
            }
            Err(e) => {
                warn!(error = %e, "failed to load reports");
                ReportState::Error(message_for(&e))
            }
        }
    }
}

fn message_for(e: &ServiceError) -> String {
    match e.service_message() {
        Some(message) if e.is_rejection() => message.to_owned(),
        _ => format!("{REPORT_FAULT_PREFIX}{e}"),
    }
}

#[async_trait]
impl Machine for ReportMachine {
    type Event = ReportEvent;
    type State = ReportState;
    type Error = ServiceError;

    const NAME: &'static str = "report";

    fn initial_state(&self) -> ReportState {
        ReportState::Initial
    }

    fn fault_state(&self, description: &str) -> ReportState {
        ReportState::Error(format!("{REPORT_FAULT_PREFIX}{description}"))
    }

    async fn handle(&self, event: ReportEvent, emitter: &Emitter<Self>) -> Result<(), ServiceError> {
        match event {
            ReportEvent::LoadRequested => {
                // A fresh submit confirmation stays up until the list arrives.
                if !matches!(emitter.current(), ReportState::SubmitSuccess(_)) {
                    emitter.emit(ReportState::Loading);
                }
                emitter.emit(self.fetch(None).await);
            }
            ReportEvent::RefreshRequested => {
                let filter = match emitter.current() {
                    ReportState::Loaded { filter, .. } => filter,
                    _ => None,
                };
                emitter.emit(self.fetch(filter).await);
            }
            ReportEvent::FilterChanged(filter) => emitter.emit(self.fetch(filter).await),
            ReportEvent::Submitted(report) => {
                if let Err(e) = report.validate() {
                    emitter.emit(ReportState::Error(e.to_string()));
                    return Ok(());
                }
                emitter.emit(ReportState::Submitting);
                match self.api.submit_report(&report).await {
                    Ok(stored) => {
                        emitter.emit(ReportState::SubmitSuccess(stored));
                        emitter.submit(ReportEvent::LoadRequested);
                    }
                    Err(e) => {
                        warn!(error = %e, "report submission failed");
                        emitter.emit(ReportState::Error(message_for(&e)));
                    }
                }
            }
        }
        Ok(())
    }
}
