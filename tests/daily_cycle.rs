mod common;

use chrono::{NaiveDate, TimeZone};
use chrono_tz::America::New_York;
use std::fs;

use common::{test_config, test_context, trading_host, InMemoryShare, LogBuffer};
use tradeflow::backup::TransferOutcome;
use tradeflow::errors::TransferError;
use tradeflow::orchestrator::{GateDecision, JobFailure, Orchestrator, StepOutcome, TickOutcome};

fn seed_backups(csv_dir: &std::path::Path, db_dir: &std::path::Path) {
    fs::create_dir(csv_dir.join("prices")).unwrap();
    fs::write(csv_dir.join("prices").join("spy.csv"), "date,close\n2025-01-03,591.95\n").unwrap();
    fs::write(db_dir.join("mongo_dump.tar"), b"dump").unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_monday_cycle_runs_full_pipeline() {
    let csv_dir = tempfile::tempdir().unwrap();
    let db_dir = tempfile::tempdir().unwrap();
    seed_backups(csv_dir.path(), db_dir.path());

    let host = trading_host();
    let share = InMemoryShare::new();
    let config = test_config(csv_dir.path(), db_dir.path());
    let ctx = test_context(host.clone(), &share, config.schedule.poll_interval());
    let mut orchestrator = Orchestrator::new(ctx, &config).unwrap();

    let monday = New_York.with_ymd_and_hms(2025, 1, 6, 9, 0, 0).unwrap();
    let TickOutcome::Ran(report) = orchestrator.tick(monday).await.unwrap() else {
        panic!("gate should pass on Monday 09:00");
    };

    assert_eq!(
        host.log(),
        vec![
            "start mongo_db_test",
            "start ib_gateway_test",
            "start run_cleaners_test",
            "finished run_cleaners_test",
            "start run_stack_handler_test",
            "start run_capital_update_test",
            "finished run_stack_handler_test",
            "finished run_capital_update_test",
            "start run_cleaners_test",
            "finished run_cleaners_test",
            "start run_daily_processes_test",
            "finished run_daily_processes_test",
            "start csv_backup_test",
            "finished csv_backup_test",
            "stop mongo_db_test",
            "start db_backup_test",
            "finished db_backup_test",
            "stop ib_gateway_test",
        ]
    );

    // The failed csv backup job did not stop the flow
    assert_eq!(
        report.flow.outcome("csv backup"),
        Some(&StepOutcome::JobFailed(vec![JobFailure {
            unit: "csv_backup_test".to_string(),
            exit_code: 1,
        }]))
    );
    assert_eq!(report.flow.outcome("db backup"), Some(&StepOutcome::Completed));
    assert!(matches!(
        report.flow.outcome("report sync"),
        Some(StepOutcome::Skipped { .. })
    ));
    assert!(report.late_workers.is_empty());

    assert_eq!(
        orchestrator.gate().marker().last_run(),
        Some(NaiveDate::from_ymd_opt(2025, 1, 6).unwrap())
    );

    // Both backups left the host, stamped with the venue date of the cycle
    match &report.csv_transfer {
        Ok(TransferOutcome::Uploaded { archive, .. }) => {
            let name = archive.file_name().unwrap().to_string_lossy().to_string();
            assert!(name.starts_with("csv_backup_2025_01_06_09_"), "{name}");
        }
        other => panic!("expected csv upload, got {other:?}"),
    }
    match &report.db_transfer {
        Ok(TransferOutcome::Uploaded { remote_folder, .. }) => {
            assert!(
                remote_folder.starts_with("db_backup/db_backup_2025_01_06_09_"),
                "{remote_folder}"
            );
        }
        other => panic!("expected db upload, got {other:?}"),
    }
    assert_eq!(share.files_in("csv_backup").len(), 1);
    assert!(!csv_dir.path().join("prices").join("spy.csv").exists());
    assert_eq!(fs::read_dir(db_dir.path()).unwrap().count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_cycle_runs_once_per_day() {
    let csv_dir = tempfile::tempdir().unwrap();
    let db_dir = tempfile::tempdir().unwrap();
    seed_backups(csv_dir.path(), db_dir.path());

    let host = trading_host();
    let share = InMemoryShare::new();
    let config = test_config(csv_dir.path(), db_dir.path());
    let ctx = test_context(host.clone(), &share, config.schedule.poll_interval());
    let mut orchestrator = Orchestrator::new(ctx, &config).unwrap();

    let morning = New_York.with_ymd_and_hms(2025, 1, 6, 9, 0, 0).unwrap();
    assert!(matches!(
        orchestrator.tick(morning).await.unwrap(),
        TickOutcome::Ran(_)
    ));
    let actions = host.log().len();

    let afternoon = New_York.with_ymd_and_hms(2025, 1, 6, 15, 0, 0).unwrap();
    assert!(matches!(
        orchestrator.tick(afternoon).await.unwrap(),
        TickOutcome::Skipped(GateDecision::AlreadyRan)
    ));
    assert_eq!(host.log().len(), actions);
}

#[tokio::test(start_paused = true)]
async fn test_weekend_tick_does_nothing() {
    let csv_dir = tempfile::tempdir().unwrap();
    let db_dir = tempfile::tempdir().unwrap();

    let host = trading_host();
    let share = InMemoryShare::new();
    let config = test_config(csv_dir.path(), db_dir.path());
    let ctx = test_context(host.clone(), &share, config.schedule.poll_interval());
    let mut orchestrator = Orchestrator::new(ctx, &config).unwrap();

    let saturday = New_York.with_ymd_and_hms(2025, 1, 11, 9, 0, 0).unwrap();
    assert!(matches!(
        orchestrator.tick(saturday).await.unwrap(),
        TickOutcome::Skipped(GateDecision::OutsideWindow)
    ));
    assert!(host.log().is_empty());
    assert_eq!(orchestrator.gate().marker().last_run(), None);
}

#[tokio::test(start_paused = true)]
async fn test_unreachable_share_keeps_local_archives() {
    let logs = LogBuffer::default();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(logs.clone())
        .with_ansi(false)
        .json()
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let csv_dir = tempfile::tempdir().unwrap();
    let db_dir = tempfile::tempdir().unwrap();
    seed_backups(csv_dir.path(), db_dir.path());

    let host = trading_host();
    let share = InMemoryShare::unreachable();
    let config = test_config(csv_dir.path(), db_dir.path());
    let ctx = test_context(host.clone(), &share, config.schedule.poll_interval());
    let mut orchestrator = Orchestrator::new(ctx, &config).unwrap();

    let monday = New_York.with_ymd_and_hms(2025, 1, 6, 9, 0, 0).unwrap();
    let TickOutcome::Ran(report) = orchestrator.tick(monday).await.unwrap() else {
        panic!("gate should pass on Monday 09:00");
    };

    assert!(matches!(report.csv_transfer, Err(TransferError::RemoteConnectFailure)));
    assert!(matches!(report.db_transfer, Err(TransferError::RemoteConnectFailure)));

    // Nothing local was touched
    assert!(db_dir.path().join("mongo_dump.tar").exists());
    assert!(csv_dir.path().join("prices").join("spy.csv").exists());
    assert!(share.files().is_empty());

    // The cycle itself still finished
    assert_eq!(host.log().last().map(String::as_str), Some("stop ib_gateway_test"));
    assert!(orchestrator.gate().marker().last_run().is_some());

    let output = logs.contents();
    assert!(output.contains("\"severity\":\"critical\""), "no critical entry in: {output}");
}
