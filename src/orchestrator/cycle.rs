//! Outer orchestration loop
//! Gate check → brackets up → daily flow → gateway down → backups off-host

use anyhow::Result;
use chrono::{DateTime, NaiveDateTime, Utc};
use chrono_tz::Tz;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info};

use super::daily::{DailyFlowSequencer, FlowReport};
use super::schedule::{GateDecision, ScheduleGate};
use super::steps::FlowPipeline;
use super::OrchestratorContext;
use crate::backup::{BackupKind, BackupTransfer, TransferOutcome};
use crate::config::Config;
use crate::errors::{OrchestratorError, TransferError};
use crate::units::{UnitHandle, UnitName, UnitSet};

/// Everything one orchestration cycle did
#[derive(Debug)]
pub struct CycleReport {
    pub flow: FlowReport,
    /// Workers found running when the gateway was about to stop
    pub late_workers: Vec<String>,
    pub csv_transfer: Result<TransferOutcome, TransferError>,
    pub db_transfer: Result<TransferOutcome, TransferError>,
}

#[derive(Debug)]
pub enum TickOutcome {
    Ran(Box<CycleReport>),
    Skipped(GateDecision),
}

pub struct Orchestrator {
    ctx: OrchestratorContext,
    gate: ScheduleGate,
    tz: Tz,
    sequencer: DailyFlowSequencer,
    transfer: BackupTransfer,
    database: UnitName,
    gateway: UnitName,
    gateway_grace: Duration,
    gate_check_interval: Duration,
}

impl Orchestrator {
    pub fn new(ctx: OrchestratorContext, config: &Config) -> Result<Self> {
        let suffix = config.units.name_suffix.as_str();
        let sequencer = DailyFlowSequencer::new(&ctx, FlowPipeline::daily(&config.units));
        let tz = config.schedule.tz()?;
        let transfer = BackupTransfer::new(ctx.share.clone(), config.backup.clone(), tz);

        Ok(Self {
            gate: ScheduleGate::new(config.schedule.window),
            tz,
            sequencer,
            transfer,
            database: UnitName::new(config.units.database.as_str(), suffix),
            gateway: UnitName::new(config.units.gateway.as_str(), suffix),
            gateway_grace: config.schedule.gateway_grace(),
            gate_check_interval: config.schedule.gate_check_interval(),
            ctx,
        })
    }

    pub fn gate(&self) -> &ScheduleGate {
        &self.gate
    }

    /// Current time in the venue timezone
    pub fn now(&self) -> DateTime<Tz> {
        Utc::now().with_timezone(&self.tz)
    }

    /// One scheduling decision, running the full cycle when the gate passes
    pub async fn tick(&mut self, now: DateTime<Tz>) -> Result<TickOutcome, OrchestratorError> {
        match self.gate.check(&now) {
            GateDecision::Run => {
                info!(date = %now.date_naive(), "Gate passed, starting orchestration cycle");
                let report = self.run_cycle_at(now).await?;
                Ok(TickOutcome::Ran(Box::new(report)))
            }
            decision => {
                debug!(?decision, %now, "Gate closed");
                Ok(TickOutcome::Skipped(decision))
            }
        }
    }

    /// Tick forever. Returns only on a fatal error; the next process start
    /// retries from scratch.
    pub async fn run_forever(&mut self) -> Result<(), OrchestratorError> {
        info!(
            window = ?self.gate.window(),
            timezone = %self.tz,
            "Starting orchestration loop"
        );

        loop {
            let now = self.now();
            match self.tick(now).await? {
                TickOutcome::Ran(report) => info!(
                    job_failures = report.flow.job_failures().len(),
                    csv_transfer_ok = report.csv_transfer.is_ok(),
                    db_transfer_ok = report.db_transfer.is_ok(),
                    "Orchestration cycle finished"
                ),
                TickOutcome::Skipped(_) => tokio::time::sleep(self.gate_check_interval).await,
            }
        }
    }

    /// The cycle body, without consulting the gate
    pub async fn run_cycle(&self) -> Result<CycleReport, OrchestratorError> {
        self.run_cycle_at(self.now()).await
    }

    /// The cycle body for a cycle that started at venue time `started_at`.
    /// Backup names are stamped with `started_at` plus the cycle's elapsed time.
    pub async fn run_cycle_at(&self, started_at: DateTime<Tz>) -> Result<CycleReport, OrchestratorError> {
        let started = Instant::now();

        for bracket in [&self.database, &self.gateway] {
            UnitHandle::get(self.ctx.units.clone(), bracket.clone())
                .await?
                .start()
                .await?;
        }

        debug!(grace = ?self.gateway_grace, "Waiting for the gateway connection");
        tokio::time::sleep(self.gateway_grace).await;

        let flow = self.sequencer.run().await?;

        let late_workers = self.sequencer.workers_still_running().await?;
        if !late_workers.is_empty() {
            error!(
                severity = "critical",
                workers = ?late_workers,
                "Continuous workers still running while stopping the gateway, they outlived their configured window"
            );
        }

        info!(unit = %self.gateway, "Stopping gateway");
        UnitHandle::get(self.ctx.units.clone(), self.gateway.clone())
            .await?
            .stop()
            .await?;
        self.ctx
            .waiter
            .wait_until_finished(&UnitSet::single(self.gateway.clone()))
            .await?;

        let stamp = chrono::Duration::from_std(started.elapsed())
            .map(|elapsed| started_at + elapsed)
            .unwrap_or(started_at)
            .naive_local();
        let csv_transfer = self.transfer_backup_at(BackupKind::Csv, stamp).await;
        let db_transfer = self.transfer_backup_at(BackupKind::Db, stamp).await;

        Ok(CycleReport {
            flow,
            late_workers,
            csv_transfer,
            db_transfer,
        })
    }

    /// Move one backup kind off-host; failures are logged and returned, never raised
    pub async fn transfer_backup(&self, kind: BackupKind) -> Result<TransferOutcome, TransferError> {
        self.transfer_backup_at(kind, self.now().naive_local()).await
    }

    async fn transfer_backup_at(
        &self,
        kind: BackupKind,
        at: NaiveDateTime,
    ) -> Result<TransferOutcome, TransferError> {
        let result = self.transfer.transfer_at(kind, at).await;
        match &result {
            Ok(outcome) => info!(%kind, ?outcome, "Backup transfer finished"),
            Err(e) => error!(%kind, error = %e, "Backup transfer failed"),
        }
        result
    }
}
