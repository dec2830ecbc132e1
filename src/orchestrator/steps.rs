// Daily pipeline as data
// Each step says what to do with which units and how to treat failures

use std::fmt;

use crate::config::UnitConfig;
use crate::units::{UnitName, UnitSet};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepAction {
    /// Start (restarting stale instances) each unit in order
    Run(UnitSet),
    /// Start units and move on without waiting
    Start(UnitSet),
    /// Wait for previously started units and check how their jobs ended
    Join(UnitSet),
    Stop(UnitSet),
    /// Best-effort publish of the reports repository
    ReportSync,
}

/// How a unit's own job failure (non-zero exit) is handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobFailurePolicy {
    Warn,
    Error,
    Critical,
    /// Abort the flow
    Fatal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowStep {
    pub name: &'static str,
    pub action: StepAction,
    /// Block until the step's units are no longer running
    pub wait: bool,
    /// A unit that cannot be found or started aborts the cycle
    pub setup_failure_fatal: bool,
    pub on_job_failure: JobFailurePolicy,
}

impl FlowStep {
    pub fn run(name: &'static str, units: UnitSet, on_job_failure: JobFailurePolicy) -> Self {
        Self {
            name,
            action: StepAction::Run(units),
            wait: true,
            setup_failure_fatal: true,
            on_job_failure,
        }
    }

    pub fn start(name: &'static str, units: UnitSet) -> Self {
        Self {
            name,
            action: StepAction::Start(units),
            wait: false,
            setup_failure_fatal: true,
            on_job_failure: JobFailurePolicy::Error,
        }
    }

    pub fn join(name: &'static str, units: UnitSet, on_job_failure: JobFailurePolicy) -> Self {
        Self {
            name,
            action: StepAction::Join(units),
            wait: true,
            setup_failure_fatal: true,
            on_job_failure,
        }
    }

    pub fn stop(name: &'static str, units: UnitSet) -> Self {
        Self {
            name,
            action: StepAction::Stop(units),
            wait: true,
            setup_failure_fatal: true,
            on_job_failure: JobFailurePolicy::Warn,
        }
    }

    pub fn report_sync(name: &'static str) -> Self {
        Self {
            name,
            action: StepAction::ReportSync,
            wait: false,
            setup_failure_fatal: false,
            on_job_failure: JobFailurePolicy::Warn,
        }
    }
}

impl fmt::Display for FlowStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.action {
            StepAction::Run(units) => write!(f, "{} (run {})", self.name, units),
            StepAction::Start(units) => write!(f, "{} (start {})", self.name, units),
            StepAction::Join(units) => write!(f, "{} (join {})", self.name, units),
            StepAction::Stop(units) => write!(f, "{} (stop {})", self.name, units),
            StepAction::ReportSync => write!(f, "{} (report sync)", self.name),
        }
    }
}

/// Ordered steps of one daily flow
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowPipeline {
    steps: Vec<FlowStep>,
    workers: UnitSet,
}

impl FlowPipeline {
    pub fn new(steps: Vec<FlowStep>, workers: UnitSet) -> Self {
        Self { steps, workers }
    }

    /// The fixed trading-day pipeline
    pub fn daily(units: &UnitConfig) -> Self {
        let suffix = units.name_suffix.as_str();
        let one = |base: &str| UnitSet::single(UnitName::new(base, suffix));
        let workers = UnitSet::from_bases(&units.workers, suffix);

        let steps = vec![
            FlowStep::run("cleanup", one(units.cleanup.as_str()), JobFailurePolicy::Error),
            FlowStep::start("continuous workers", workers.clone()),
            FlowStep::join("join workers", workers.clone(), JobFailurePolicy::Error),
            FlowStep::run("end-of-day cleanup", one(units.cleanup.as_str()), JobFailurePolicy::Error),
            FlowStep::run("daily batch", one(units.daily_batch.as_str()), JobFailurePolicy::Error),
            FlowStep::run("csv backup", one(units.csv_backup.as_str()), JobFailurePolicy::Warn),
            FlowStep::report_sync("report sync"),
            FlowStep::stop("database quiesce", one(units.database.as_str())),
            FlowStep::run("db backup", one(units.db_backup.as_str()), JobFailurePolicy::Critical),
        ];

        Self { steps, workers }
    }

    pub fn steps(&self) -> &[FlowStep] {
        &self.steps
    }

    /// Continuous workers that must have finished before the gateway stops
    pub fn workers(&self) -> &UnitSet {
        &self.workers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_config() -> UnitConfig {
        UnitConfig {
            name_suffix: "_live".to_string(),
            docker_bin: "docker".to_string(),
            cleanup: "run_cleaners".to_string(),
            workers: vec!["run_stack_handler".to_string(), "run_capital_update".to_string()],
            daily_batch: "run_daily_processes".to_string(),
            csv_backup: "csv_backup".to_string(),
            database: "mongo_db".to_string(),
            db_backup: "db_backup".to_string(),
            gateway: "ib_gateway".to_string(),
        }
    }

    #[test]
    fn test_daily_pipeline_order() {
        let pipeline = FlowPipeline::daily(&unit_config());
        let names: Vec<&str> = pipeline.steps().iter().map(|s| s.name).collect();

        assert_eq!(
            names,
            vec![
                "cleanup",
                "continuous workers",
                "join workers",
                "end-of-day cleanup",
                "daily batch",
                "csv backup",
                "report sync",
                "database quiesce",
                "db backup",
            ]
        );
    }

    #[test]
    fn test_daily_pipeline_policies() {
        let pipeline = FlowPipeline::daily(&unit_config());
        let steps = pipeline.steps();

        assert!(!steps[1].wait);
        assert!(steps.iter().filter(|s| s.action != StepAction::ReportSync).all(|s| s.setup_failure_fatal));
        assert_eq!(steps[5].on_job_failure, JobFailurePolicy::Warn);
        assert_eq!(steps[8].on_job_failure, JobFailurePolicy::Critical);
        assert!(!steps[6].setup_failure_fatal);
    }

    #[test]
    fn test_pipeline_applies_suffix() {
        let pipeline = FlowPipeline::daily(&unit_config());

        assert!(pipeline.workers().contains("run_stack_handler_live"));
        assert_eq!(
            pipeline.steps()[7].to_string(),
            "database quiesce (stop [mongo_db_live])"
        );
    }
}
