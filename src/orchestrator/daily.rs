//! Daily flow sequencer
//! Walks the trading-day pipeline: cleanup → continuous workers → end-of-day batch → backups

use std::sync::Arc;
use tracing::{error, info, warn};

use super::steps::{FlowPipeline, FlowStep, JobFailurePolicy, StepAction};
use super::OrchestratorContext;
use crate::errors::{OrchestratorError, UnitError, UnitResult};
use crate::reports::{PublishOutcome, ReportPublisher};
use crate::units::{CompletionWaiter, UnitHandle, UnitManager, UnitSet};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFailure {
    pub unit: String,
    pub exit_code: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutcome {
    Completed,
    /// Units ran but their jobs failed; handled per the step's policy
    JobFailed(Vec<JobFailure>),
    /// A best-effort step that did not succeed
    Failed { reason: String },
    Skipped { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepRecord {
    pub name: &'static str,
    pub outcome: StepOutcome,
}

/// What happened in each step of one daily flow
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlowReport {
    pub steps: Vec<StepRecord>,
}

impl FlowReport {
    pub fn outcome(&self, step: &str) -> Option<&StepOutcome> {
        self.steps.iter().find(|r| r.name == step).map(|r| &r.outcome)
    }

    pub fn job_failures(&self) -> Vec<&JobFailure> {
        self.steps
            .iter()
            .flat_map(|r| match &r.outcome {
                StepOutcome::JobFailed(failures) => failures.iter().collect(),
                _ => Vec::new(),
            })
            .collect()
    }
}

pub struct DailyFlowSequencer {
    units: Arc<dyn UnitManager>,
    waiter: Arc<dyn CompletionWaiter>,
    reports: Option<Arc<dyn ReportPublisher>>,
    pipeline: FlowPipeline,
}

impl DailyFlowSequencer {
    pub fn new(ctx: &OrchestratorContext, pipeline: FlowPipeline) -> Self {
        Self {
            units: ctx.units.clone(),
            waiter: ctx.waiter.clone(),
            reports: ctx.reports.clone(),
            pipeline,
        }
    }

    pub fn pipeline(&self) -> &FlowPipeline {
        &self.pipeline
    }

    /// Run every step in order. Unit lookup/start failures and manager errors
    /// abort the flow; job failures follow each step's policy.
    pub async fn run(&self) -> Result<FlowReport, OrchestratorError> {
        info!("🌅 Starting daily flow ({} steps)", self.pipeline.steps().len());
        let mut report = FlowReport::default();

        for step in self.pipeline.steps() {
            info!(step = %step, "Running flow step");
            let outcome = self.run_step(step).await?;
            report.steps.push(StepRecord {
                name: step.name,
                outcome,
            });
        }

        info!(
            job_failures = report.job_failures().len(),
            "✅ Daily flow completed"
        );
        Ok(report)
    }

    /// Continuous workers still running. Anything here once the flow is over
    /// means the workers outlived the window they were configured for.
    pub async fn workers_still_running(&self) -> UnitResult<Vec<String>> {
        let running = self.units.list_running().await?;
        Ok(self.pipeline.workers().still_running(&running))
    }

    async fn run_step(&self, step: &FlowStep) -> Result<StepOutcome, OrchestratorError> {
        match &step.action {
            StepAction::Run(units) | StepAction::Start(units) => {
                if let Err(e) = self.start_all(units).await {
                    return self.setup_failed(step, e);
                }
                if !step.wait {
                    return Ok(StepOutcome::Completed);
                }
                self.waiter.wait_until_finished(units).await?;
                self.check_jobs(step, units).await
            }
            StepAction::Join(units) => {
                self.waiter.wait_until_finished(units).await?;
                self.check_jobs(step, units).await
            }
            StepAction::Stop(units) => {
                if let Err(e) = self.stop_all(units).await {
                    return self.setup_failed(step, e);
                }
                if step.wait {
                    self.waiter.wait_until_finished(units).await?;
                }
                Ok(StepOutcome::Completed)
            }
            StepAction::ReportSync => Ok(self.sync_reports().await),
        }
    }

    async fn start_all(&self, units: &UnitSet) -> UnitResult<()> {
        for name in units.iter() {
            UnitHandle::get(self.units.clone(), name.clone())
                .await?
                .ensure_running()
                .await?;
        }
        Ok(())
    }

    async fn stop_all(&self, units: &UnitSet) -> UnitResult<()> {
        for name in units.iter() {
            UnitHandle::get(self.units.clone(), name.clone())
                .await?
                .stop()
                .await?;
        }
        Ok(())
    }

    fn setup_failed(&self, step: &FlowStep, e: UnitError) -> Result<StepOutcome, OrchestratorError> {
        if step.setup_failure_fatal {
            error!(step = step.name, error = %e, "Could not set up flow step, aborting the cycle");
            Err(e.into())
        } else {
            warn!(step = step.name, error = %e, "Could not set up flow step, skipping it");
            Ok(StepOutcome::Skipped {
                reason: e.to_string(),
            })
        }
    }

    async fn check_jobs(&self, step: &FlowStep, units: &UnitSet) -> Result<StepOutcome, OrchestratorError> {
        let mut failures = Vec::new();
        for name in units.iter() {
            let unit = name.full();
            if let Some(exit_code) = self.units.exit_code(&unit).await? {
                if exit_code != 0 {
                    failures.push(JobFailure { unit, exit_code });
                }
            }
        }

        if failures.is_empty() {
            return Ok(StepOutcome::Completed);
        }

        for failure in &failures {
            match step.on_job_failure {
                JobFailurePolicy::Warn => warn!(
                    step = step.name,
                    unit = %failure.unit,
                    exit_code = failure.exit_code,
                    "Unit job failed, continuing with the flow"
                ),
                JobFailurePolicy::Error => error!(
                    step = step.name,
                    unit = %failure.unit,
                    exit_code = failure.exit_code,
                    "Unit job failed, continuing with the flow"
                ),
                JobFailurePolicy::Critical => error!(
                    severity = "critical",
                    step = step.name,
                    unit = %failure.unit,
                    exit_code = failure.exit_code,
                    "Unit job failed, operator attention needed"
                ),
                JobFailurePolicy::Fatal => {
                    error!(
                        step = step.name,
                        unit = %failure.unit,
                        exit_code = failure.exit_code,
                        "Unit job failed, aborting the flow"
                    );
                    return Err(OrchestratorError::UnitJobFailure {
                        unit: failure.unit.clone(),
                        exit_code: failure.exit_code,
                    });
                }
            }
        }

        Ok(StepOutcome::JobFailed(failures))
    }

    async fn sync_reports(&self) -> StepOutcome {
        let Some(reports) = &self.reports else {
            info!("No reports directory configured, skipping report sync");
            return StepOutcome::Skipped {
                reason: "report sync disabled".to_string(),
            };
        };

        match reports.publish().await {
            Ok(PublishOutcome::Published) | Ok(PublishOutcome::NothingToPublish) => {
                StepOutcome::Completed
            }
            Err(e) => {
                warn!("Report sync failed: {:#}", e);
                StepOutcome::Failed {
                    reason: format!("{:#}", e),
                }
            }
        }
    }
}
