mod common;

use std::time::Duration;

use chrono::TimeDelta;
use common::{Failure, Harness};
use podlease::{
    lifecycle::TerminationOutcome, models::SandboxStatus, runtime::UnitStatus, PodleaseError,
};

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[test_log::test(tokio::test)]
async fn test_create_records_a_running_lease() -> anyhow::Result<()> {
    let harness = Harness::with_manual_clock().await;

    let sandbox = harness.service.create_sandbox("alice", 30).await?;

    assert_eq!(sandbox.owner_id, "alice");
    assert_eq!(sandbox.status, SandboxStatus::Running);
    assert_eq!(sandbox.expires_at - sandbox.created_at, TimeDelta::minutes(30));
    assert!(harness.runtime.exists(&sandbox.runtime_handle));
    assert_eq!(harness.service.scheduler().armed_count(), 1);

    let report = harness.service.get_sandbox_status("alice", sandbox.id).await?;
    assert_eq!(report.sandbox, sandbox);
    assert_eq!(report.runtime_status, UnitStatus::State("running".into()));

    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_zero_minute_lease_is_reclaimed_and_then_not_found() -> anyhow::Result<()> {
    let harness = Harness::with_manual_clock().await;

    let sandbox = harness.service.create_sandbox("alice", 0).await?;
    assert!(sandbox.expires_at > sandbox.created_at);

    harness.advance(TimeDelta::seconds(1));
    harness.service.scheduler().sweep_once().await?;
    harness
        .wait_for_deletion(sandbox.id, Duration::from_secs(2))
        .await;

    assert!(!harness.runtime.exists(&sandbox.runtime_handle));
    assert_eq!(harness.runtime.effective_stops(), 1);
    assert!(matches!(
        harness.service.get_sandbox_status("alice", sandbox.id).await,
        Err(PodleaseError::NotFound(id)) if id == sandbox.id
    ));

    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_manual_terminate_racing_the_timer_stops_once() -> anyhow::Result<()> {
    let harness = Harness::new().await;
    harness.runtime.set_stop_delay(Duration::from_millis(300));

    let sandbox = harness
        .service
        .create_sandbox_with("alice", Duration::from_millis(20), "python:3.8-slim", &[])
        .await?;

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(harness.service.coordinator().is_terminating(sandbox.id));

    let outcome = harness.service.terminate_sandbox("alice", sandbox.id).await?;

    assert_eq!(
        outcome,
        TerminationOutcome::Reclaimed {
            sandbox_id: sandbox.id,
            unit_found: true
        }
    );
    assert_eq!(harness.runtime.stop_calls(), 1);
    assert!(harness.row(sandbox.id).await.is_none());

    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_failed_stop_is_visible_as_error() -> anyhow::Result<()> {
    let harness = Harness::with_manual_clock().await;
    let sandbox = harness.service.create_sandbox("alice", 10).await?;
    harness
        .runtime
        .fail_stops_for(&sandbox.runtime_handle, Failure::Api);

    let result = harness.service.terminate_sandbox("alice", sandbox.id).await;
    assert!(matches!(result, Err(PodleaseError::RuntimeApi(_))));

    let report = harness.service.get_sandbox_status("alice", sandbox.id).await?;
    assert_eq!(report.sandbox.status, SandboxStatus::Error);

    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_expiry_failure_for_one_owner_does_not_affect_another() -> anyhow::Result<()> {
    let harness = Harness::with_manual_clock().await;
    let alice = harness.service.create_sandbox("alice", 1).await?;
    let bob = harness.service.create_sandbox("bob", 1).await?;
    harness
        .runtime
        .fail_stops_for(&alice.runtime_handle, Failure::Api);

    harness.advance(TimeDelta::minutes(2));
    let report = harness.service.scheduler().sweep_once().await?;

    assert_eq!(report.reclaimed, vec![bob.id]);
    assert!(harness.row(bob.id).await.is_none());
    assert!(!harness.runtime.exists(&bob.runtime_handle));

    let alice_report = harness.service.get_sandbox_status("alice", alice.id).await?;
    assert_eq!(alice_report.sandbox.status, SandboxStatus::Error);

    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_sandboxes_are_scoped_to_their_owner() -> anyhow::Result<()> {
    let harness = Harness::with_manual_clock().await;
    let sandbox = harness.service.create_sandbox("alice", 10).await?;
    harness.service.create_sandbox("alice", 10).await?;
    harness.service.create_sandbox("bob", 10).await?;

    assert!(matches!(
        harness.service.get_sandbox_status("mallory", sandbox.id).await,
        Err(PodleaseError::NotFound(_))
    ));
    assert!(matches!(
        harness.service.terminate_sandbox("mallory", sandbox.id).await,
        Err(PodleaseError::NotFound(_))
    ));
    assert!(harness.runtime.exists(&sandbox.runtime_handle));

    assert_eq!(harness.service.list_sandboxes("alice").await?.len(), 2);
    assert_eq!(harness.service.list_sandboxes("bob").await?.len(), 1);
    assert!(harness.service.list_sandboxes("mallory").await?.is_empty());

    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_terminate_disarms_the_timer() -> anyhow::Result<()> {
    let harness = Harness::with_manual_clock().await;
    let sandbox = harness.service.create_sandbox("alice", 10).await?;
    assert_eq!(harness.service.scheduler().armed_count(), 1);

    harness.service.terminate_sandbox("alice", sandbox.id).await?;

    assert_eq!(harness.service.scheduler().armed_count(), 0);
    assert!(matches!(
        harness.service.terminate_sandbox("alice", sandbox.id).await,
        Err(PodleaseError::NotFound(_))
    ));
    assert_eq!(harness.runtime.stop_calls(), 1);

    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_only_a_vanished_unit_is_reconciled_to_error() -> anyhow::Result<()> {
    let harness = Harness::with_manual_clock().await;
    let vanished = harness.service.create_sandbox("alice", 10).await?;
    let exited = harness.service.create_sandbox("alice", 10).await?;
    harness.runtime.vanish(&vanished.runtime_handle);
    harness.runtime.exit(&exited.runtime_handle);

    let report = harness.service.get_sandbox_status("alice", vanished.id).await?;
    assert_eq!(report.runtime_status, UnitStatus::NotFound);
    assert_eq!(report.sandbox.status, SandboxStatus::Error);

    let report = harness.service.get_sandbox_status("alice", exited.id).await?;
    assert_eq!(report.runtime_status, UnitStatus::State("exited".into()));
    assert_eq!(report.sandbox.status, SandboxStatus::Running);

    // The lease can still be released by hand.
    harness.service.terminate_sandbox("alice", vanished.id).await?;
    assert!(harness.row(vanished.id).await.is_none());

    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_exited_unit_is_still_reclaimed_after_a_restart() -> anyhow::Result<()> {
    let harness = Harness::with_manual_clock().await;
    let sandbox = harness.service.create_sandbox("alice", 1).await?;
    harness.runtime.exit(&sandbox.runtime_handle);

    let report = harness.service.get_sandbox_status("alice", sandbox.id).await?;
    assert_eq!(report.sandbox.status, SandboxStatus::Running);

    // Drop every timer, as a restarted process would have none.
    harness.service.scheduler().shutdown().await?;
    harness.advance(TimeDelta::minutes(5));

    let report = harness.service.scheduler().sweep_once().await?;
    assert_eq!(report.examined, 1);
    assert_eq!(report.reclaimed, vec![sandbox.id]);
    assert!(!harness.runtime.exists(&sandbox.runtime_handle));
    assert!(harness.row(sandbox.id).await.is_none());

    Ok(())
}

#[test_log::test(tokio::test)]
async fn test_create_failures_leave_nothing_behind() -> anyhow::Result<()> {
    let harness = Harness::with_manual_clock().await;

    assert!(matches!(
        harness
            .service
            .create_sandbox_with("alice", Duration::from_secs(60), "missing:latest", &[])
            .await,
        Err(PodleaseError::ImageError(_))
    ));
    assert!(matches!(
        harness.service.create_sandbox("  ", 5).await,
        Err(PodleaseError::InvalidArgument(_))
    ));

    harness.store.set_fail_writes(true);
    assert!(matches!(
        harness.service.create_sandbox("alice", 5).await,
        Err(PodleaseError::StoreUnavailable(_))
    ));
    harness.store.set_fail_writes(false);

    assert_eq!(harness.runtime.unit_count(), 0);
    assert!(harness.service.list_sandboxes("alice").await?.is_empty());
    assert_eq!(harness.service.scheduler().armed_count(), 0);

    Ok(())
}
