//! Orchestrator module for the daily container flow
//! Schedule gate, pipeline definition, sequencer and the outer loop

pub mod cycle;
pub mod daily;
pub mod schedule;
pub mod steps;

use std::sync::Arc;

use crate::config::Config;
use crate::remote::smb::SmbConnector;
use crate::remote::ShareConnector;
use crate::reports::{GitReportPublisher, ReportPublisher};
use crate::units::{CompletionWaiter, DockerCli, PollingWaiter, UnitManager};

// Re-export main orchestrators
pub use cycle::{CycleReport, Orchestrator, TickOutcome};
pub use daily::{DailyFlowSequencer, FlowReport, JobFailure, StepOutcome, StepRecord};
pub use schedule::{GateDecision, RunMarker, ScheduleGate, ScheduleWindow};
pub use steps::{FlowPipeline, FlowStep, JobFailurePolicy, StepAction};

/// Collaborators shared by every part of the orchestration
#[derive(Clone)]
pub struct OrchestratorContext {
    pub units: Arc<dyn UnitManager>,
    pub waiter: Arc<dyn CompletionWaiter>,
    pub share: Arc<dyn ShareConnector>,
    pub reports: Option<Arc<dyn ReportPublisher>>,
}

impl OrchestratorContext {
    /// Docker for units, smbclient for the share, git for reports
    pub fn from_config(config: &Config) -> Self {
        let units: Arc<dyn UnitManager> = Arc::new(DockerCli::new(config.units.docker_bin.clone()));
        let waiter: Arc<dyn CompletionWaiter> =
            Arc::new(PollingWaiter::new(units.clone(), config.schedule.poll_interval()));
        let share: Arc<dyn ShareConnector> = Arc::new(SmbConnector::new(config.share.clone()));
        let reports = GitReportPublisher::from_config(&config.reports)
            .map(|publisher| Arc::new(publisher) as Arc<dyn ReportPublisher>);

        Self {
            units,
            waiter,
            share,
            reports,
        }
    }
}
