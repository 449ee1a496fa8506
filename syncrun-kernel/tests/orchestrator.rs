use std::time::Duration;
use syncrun_devkit::{notification, AssetBuilder, DeviceBuilder, TestHarness};
use syncrun_kernel::config::{ScheduleConf, SyncConfig, TicketConf};
use syncrun_kernel::ports::EndpointValue;
use syncrun_kernel::{OrchestratorState, SyncError};
use tokio::time::Instant;

fn harness(interval_s: u64, backoff_s: u64) -> TestHarness {
    TestHarness::with_config(SyncConfig {
        tickets: Some(TicketConf::default()),
        schedule: ScheduleConf {
            pull_interval_ms: interval_s * 1000,
            startup_delay_ms: 0,
            failure_backoff_ms: backoff_s * 1000,
        },
        ..SyncConfig::default()
    })
}

fn asset_x(value: f64) -> Vec<syncrun_kernel::models::ExternalAsset> {
    vec![AssetBuilder::new(1, "X")
        .device(DeviceBuilder::new("D1").telemetry(1, "T", Some(value), "C"))
        .build()]
}

#[tokio::test(start_paused = true)]
async fn test_failure_uses_backoff_then_interval() {
    let h = harness(10, 3);
    h.source.push_assets_failure("source down");
    h.source.push_assets(asset_x(5.0));

    let orchestrator = h.orchestrator();
    let handle = orchestrator.start().unwrap();
    tokio::time::sleep(Duration::from_secs(20)).await;
    orchestrator.stop();
    handle.await.unwrap();

    let calls = h.source.asset_call_times();
    assert_eq!(calls.len(), 3);
    assert_eq!(calls[1] - calls[0], Duration::from_secs(3));
    assert_eq!(calls[2] - calls[1], Duration::from_secs(10));
}

#[tokio::test(start_paused = true)]
async fn test_startup_delay_before_first_cycle() {
    let h = TestHarness::with_config(SyncConfig {
        schedule: ScheduleConf {
            pull_interval_ms: 60_000,
            startup_delay_ms: 2_000,
            failure_backoff_ms: 1_000,
        },
        ..SyncConfig::default()
    });
    h.source.push_assets(asset_x(1.0));

    let t0 = Instant::now();
    let orchestrator = h.orchestrator();
    let handle = orchestrator.start().unwrap();
    tokio::time::sleep(Duration::from_secs(5)).await;
    orchestrator.stop();
    handle.await.unwrap();

    let calls = h.source.asset_call_times();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0] - t0, Duration::from_secs(2));
}

#[tokio::test(start_paused = true)]
async fn test_last_sync_stalls_while_failing() {
    let h = harness(10, 3);
    for _ in 0..3 {
        h.source.push_assets_failure("source down");
    }
    h.source.push_assets(asset_x(5.0));

    let orchestrator = h.orchestrator();
    let handle = orchestrator.start().unwrap();

    tokio::time::sleep(Duration::from_secs(7)).await;
    assert!(orchestrator.last_sync().is_none());
    assert!(orchestrator.health().last_report().is_none());
    let health = orchestrator.health().get_health();
    assert_eq!(health.cycles_failed, 3);
    assert_eq!(health.consecutive_failures, 3);
    assert_eq!(health.last_error.as_deref(), Some("External source error: source down"));

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(orchestrator.last_sync().is_some());
    assert_eq!(orchestrator.health().last_report().map(|r| r.assets.devices_created), Some(1));
    assert_eq!(orchestrator.health().get_health().consecutive_failures, 0);
    assert_eq!(h.endpoint_value("D1", "T-1"), Some(EndpointValue::Number(5.0)));

    orchestrator.stop();
    handle.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_context_resolution_failure_is_retried_after_backoff() {
    let h = harness(10, 3);
    h.source.push_assets(asset_x(5.0));
    h.graph.set_unavailable(true);

    let orchestrator = h.orchestrator();
    let handle = orchestrator.start().unwrap();

    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(h.source.calls().is_empty());
    assert_eq!(orchestrator.health().get_health().cycles_failed, 1);

    h.graph.heal();
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(h.source.asset_call_times().len(), 1);
    assert!(orchestrator.last_sync().is_some());

    orchestrator.stop();
    handle.await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_stop_wakes_pending_sleep() {
    let h = harness(300, 60);
    h.source.push_assets(asset_x(5.0));

    let orchestrator = h.orchestrator();
    let handle = orchestrator.start().unwrap();
    assert_eq!(orchestrator.state(), OrchestratorState::Running);

    tokio::time::sleep(Duration::from_secs(1)).await;
    let before_stop = Instant::now();
    orchestrator.stop();
    handle.await.unwrap();

    assert!(Instant::now() - before_stop < Duration::from_secs(1));
    assert_eq!(orchestrator.state(), OrchestratorState::Stopped);
    assert_eq!(h.source.asset_call_times().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_restart_after_stop() {
    let h = harness(300, 60);
    h.source.push_assets(asset_x(5.0));

    let orchestrator = h.orchestrator();
    let first = orchestrator.start().unwrap();
    assert!(matches!(orchestrator.start(), Err(SyncError::AlreadyRunning)));

    tokio::time::sleep(Duration::from_secs(1)).await;
    orchestrator.stop();
    first.await.unwrap();

    let second = orchestrator.start().unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    orchestrator.stop();
    second.await.unwrap();

    assert_eq!(h.source.asset_call_times().len(), 2);
    assert_eq!(orchestrator.health().get_health().cycles_ok, 2);
}

#[tokio::test]
async fn test_cycles_drive_ticket_lifecycle() {
    let h = harness(10, 3);
    h.source.push_assets(asset_x(5.0));
    h.source.push_notifications(vec![notification("alarm", 9, "Sanitaires SACD-E01")]);
    h.source.push_notifications(vec![]);

    let orchestrator = h.orchestrator();
    let mut contexts = None;

    let report = orchestrator.run_cycle(&mut contexts).await.unwrap();
    assert_eq!(report.assets.devices_created, 1);
    assert_eq!(report.assets.series_pushes, 1);
    assert_eq!(report.tickets.as_ref().map(|t| t.created), Some(1));
    assert_eq!(h.raised_tickets(), vec!["alarm-9"]);
    assert!(contexts.is_some());

    let report = orchestrator.run_cycle(&mut contexts).await.unwrap();
    assert_eq!(report.assets.devices_created, 0);
    assert_eq!(report.assets.series_pushes, 0);
    assert_eq!(report.tickets.as_ref().map(|t| t.advanced), Some(1));
    assert!(h.raised_tickets().is_empty());
    assert_eq!(h.solved_tickets(), vec!["alarm-9"]);
}

#[tokio::test]
async fn test_no_ticket_process_skips_notifications() {
    let h = TestHarness::with_config(SyncConfig::default());
    h.source.push_assets(asset_x(5.0));

    let report = h.orchestrator().run_cycle(&mut None).await.unwrap();

    assert!(report.tickets.is_none());
    assert!(h
        .source
        .calls()
        .iter()
        .all(|(call, _)| *call == syncrun_devkit::stub_source::SourceCall::Assets));
}
