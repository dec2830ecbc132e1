use anyhow::Result;
use chrono::Utc;

use crate::backup::{BackupKind, BackupTransfer, TransferOutcome};
use crate::config::Config;
use crate::errors::UnitError;
use crate::orchestrator::{
    CycleReport, Orchestrator, OrchestratorContext, StepOutcome, TickOutcome,
};

/// Tick the schedule gate until a fatal error
pub async fn run_loop(config: Config) -> Result<()> {
    let ctx = OrchestratorContext::from_config(&config);
    let mut orchestrator = Orchestrator::new(ctx, &config)?;

    orchestrator.run_forever().await?;
    Ok(())
}

/// One gate evaluation, or one unconditional cycle with `ignore_window`
pub async fn once(config: Config, ignore_window: bool) -> Result<()> {
    let ctx = OrchestratorContext::from_config(&config);
    let mut orchestrator = Orchestrator::new(ctx, &config)?;

    if ignore_window {
        let report = orchestrator.run_cycle().await?;
        print_cycle(&report);
        return Ok(());
    }

    let now = orchestrator.now();
    match orchestrator.tick(now).await? {
        TickOutcome::Ran(report) => print_cycle(&report),
        TickOutcome::Skipped(decision) => {
            println!("⏸️  Gate closed at {} ({:?}), nothing to do", now, decision);
        }
    }
    Ok(())
}

/// Run only the off-host transfer for one backup kind
pub async fn transfer(config: Config, kind: BackupKind) -> Result<()> {
    let ctx = OrchestratorContext::from_config(&config);
    let transfer = BackupTransfer::new(ctx.share, config.backup.clone(), config.schedule.tz()?);

    match transfer.transfer(kind).await? {
        TransferOutcome::Uploaded {
            archive,
            remote_folder,
            bytes,
            pruned,
            retried,
            ..
        } => {
            println!(
                "✅ Uploaded {} ({} bytes) to {}",
                archive.display(),
                bytes,
                remote_folder
            );
            if !pruned.is_empty() {
                println!("   Pruned {} old remote archive(s)", pruned.len());
            }
            if !retried.is_empty() {
                println!("   Uploaded {} archive(s) left by earlier failed uploads", retried.len());
            }
        }
        TransferOutcome::UploadFailed { archive, .. } => {
            println!("❌ Upload failed, {} kept on local disk", archive.display());
        }
        TransferOutcome::NothingToTransfer { retried, .. } => {
            println!("⚠️  No {} backup archive to transfer", kind);
            if !retried.is_empty() {
                println!("   Uploaded {} archive(s) left by earlier failed uploads", retried.len());
            }
        }
    }
    Ok(())
}

/// Print the current status of every configured unit
pub async fn status(config: Config) -> Result<()> {
    let ctx = OrchestratorContext::from_config(&config);
    let units = &config.units;

    let mut bases = vec![units.database.as_str(), units.gateway.as_str(), units.cleanup.as_str()];
    bases.extend(units.workers.iter().map(String::as_str));
    bases.extend([
        units.daily_batch.as_str(),
        units.csv_backup.as_str(),
        units.db_backup.as_str(),
    ]);

    println!("\n📋 Unit status");
    for base in bases {
        let name = format!("{}{}", base, units.name_suffix);
        match ctx.units.status(&name).await {
            Ok(status) => println!("   {:<32} {}", name, status),
            Err(UnitError::NotFound(_)) => println!("   {:<32} missing", name),
            Err(e) => return Err(e.into()),
        }
    }
    Ok(())
}

/// Print the venue time and the gate's view of it
pub fn window(config: Config) -> Result<()> {
    let tz = config.schedule.tz()?;
    let now = Utc::now().with_timezone(&tz);
    let window = config.schedule.window;

    println!("Venue time: {}", now.format("%A %Y-%m-%d %H:%M:%S %Z"));
    println!(
        "Window: weekdays {}..={} until {:02}:00 on the last day",
        window.weekday_start(),
        window.weekday_end(),
        window.stop_hour()
    );
    if window.contains_time(&now) {
        println!("✅ Inside the window");
    } else {
        println!("⏸️  Outside the window");
    }
    Ok(())
}

fn print_cycle(report: &CycleReport) {
    println!("\n✅ Orchestration cycle completed");
    for step in &report.flow.steps {
        let outcome = match &step.outcome {
            StepOutcome::Completed => "completed".to_string(),
            StepOutcome::JobFailed(failures) => failures
                .iter()
                .map(|f| format!("{} exited with {}", f.unit, f.exit_code))
                .collect::<Vec<_>>()
                .join(", "),
            StepOutcome::Failed { reason } => format!("failed: {}", reason),
            StepOutcome::Skipped { reason } => format!("skipped: {}", reason),
        };
        println!("   {:<22} {}", step.name, outcome);
    }
    if !report.late_workers.is_empty() {
        println!("⚠️  Workers still running at gateway stop: {:?}", report.late_workers);
    }
    match &report.csv_transfer {
        Ok(outcome) => println!("   csv transfer: {:?}", outcome),
        Err(e) => println!("   csv transfer failed: {}", e),
    }
    match &report.db_transfer {
        Ok(outcome) => println!("   db transfer: {:?}", outcome),
        Err(e) => println!("   db transfer failed: {}", e),
    }
}
