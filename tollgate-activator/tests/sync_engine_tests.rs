//! Scheduler behaviour under paused tokio time.

mod support;

use std::time::Duration;
use support::*;
use tollgate_activator::{ActivatorError, TransportError};
use tollgate_license::{LicenseError, LicenseState};

const HOUR: Duration = Duration::from_secs(3600);

fn secs(n: u64) -> Duration {
    Duration::from_secs(n)
}

fn is_not_activated(result: Result<LicenseState, ActivatorError>) -> bool {
    matches!(
        result,
        Err(ActivatorError::License(LicenseError::NotActivated))
    )
}

async fn activate_with_interval(h: &Harness, secs: u64) {
    let mut payload = license_payload(fixed_now());
    payload.server_sync_interval_secs = secs;
    h.transport.push_activation(Ok(sign(&payload)));
    h.activator.activate_license().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn cycles_run_on_the_token_interval() {
    let h = Harness::new();
    activate_with_interval(&h, 3600).await;
    let log = CallbackLog::default();
    log.attach(&h.activator);
    h.transport
        .push_sync(Ok(sign(&license_payload(fixed_now()))));
    h.transport
        .push_sync(Ok(sign(&license_payload(fixed_now()))));

    tokio::time::sleep(HOUR - Duration::from_secs(1)).await;
    assert_eq!(h.transport.sync_calls(), 0);

    tokio::time::sleep(HOUR + Duration::from_secs(10)).await;
    assert_eq!(h.transport.sync_calls(), 2);
    assert_eq!(log.count(), 2);
    assert_eq!(log.last().unwrap().state, LicenseState::Valid);
}

#[tokio::test(start_paused = true)]
async fn short_token_interval_is_floored() {
    let h = Harness::new();
    activate_with_interval(&h, 1).await;

    tokio::time::sleep(Duration::from_secs(59)).await;
    assert_eq!(h.transport.sync_calls(), 0);

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(h.transport.sync_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn failed_cycles_report_once_each() {
    let h = Harness::new();
    activate_with_interval(&h, 3600).await;
    let log = CallbackLog::default();
    log.attach(&h.activator);

    // The scripted transport answers 503 once its queue is empty. Retries
    // back off from the 60 s floor: 3600, 3660, 3780, 4020.
    tokio::time::sleep(secs(3785)).await;
    assert_eq!(h.transport.sync_calls(), 3);
    assert_eq!(log.count(), 3);

    let last = log.last().unwrap();
    assert_eq!(last.state, LicenseState::Valid);
    assert_eq!(
        last.reason.as_deref(),
        Some("server sync failed: server error (HTTP 503)")
    );
    assert!(h.activator.is_sync_running());
}

#[tokio::test(start_paused = true)]
async fn manual_sync_joins_in_flight_cycle() {
    let h = Harness::new();
    activate_with_interval(&h, 3600).await;
    let log = CallbackLog::default();
    log.attach(&h.activator);
    *h.transport.sync_delay.lock().unwrap() = Some(Duration::from_secs(5));
    h.transport
        .push_sync(Ok(sign(&license_payload(fixed_now()))));

    let (first, second) = tokio::join!(h.activator.sync_now(), h.activator.sync_now());
    let (first, second) = (first.unwrap(), second.unwrap());

    assert_eq!(first, second);
    assert_eq!(first.state, LicenseState::Valid);
    assert_eq!(h.transport.sync_calls(), 1);
    assert_eq!(log.count(), 1);
}

#[tokio::test(start_paused = true)]
async fn reset_stops_the_timer() {
    let h = Harness::new();
    activate_with_interval(&h, 3600).await;
    assert!(h.activator.is_sync_running());

    h.activator.reset().await.unwrap();
    assert!(!h.activator.is_sync_running());

    tokio::time::sleep(HOUR * 3).await;
    assert_eq!(h.transport.sync_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn zero_interval_disables_background_sync() {
    let h = Harness::new();
    activate_with_interval(&h, 0).await;
    assert!(!h.activator.is_sync_running());

    tokio::time::sleep(HOUR * 24).await;
    assert_eq!(h.transport.sync_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn scheduler_exits_when_server_disables_sync() {
    let h = Harness::new();
    activate_with_interval(&h, 3600).await;
    let mut offline_only = license_payload(fixed_now());
    offline_only.server_sync_interval_secs = 0;
    h.transport.push_sync(Ok(sign(&offline_only)));

    tokio::time::sleep(HOUR + Duration::from_secs(1)).await;
    assert_eq!(h.transport.sync_calls(), 1);
    assert!(!h.activator.is_sync_running());

    tokio::time::sleep(HOUR * 5).await;
    assert_eq!(h.transport.sync_calls(), 1);

    // Manual sync still works without the scheduler.
    h.transport
        .push_sync(Ok(sign(&license_payload(fixed_now()))));
    let report = h.activator.sync_now().await.unwrap();
    assert_eq!(report.state, LicenseState::Valid);
    assert_eq!(h.transport.sync_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn scheduled_cycle_reports_lost_activation() {
    let h = Harness::new();
    activate_with_interval(&h, 3600).await;
    let log = CallbackLog::default();
    log.attach(&h.activator);
    h.transport
        .push_sync(Err(TransportError::ActivationNotFound));

    tokio::time::sleep(HOUR + Duration::from_secs(1)).await;
    let last = log.last().unwrap();
    assert_eq!(last.state, LicenseState::Failed);
    assert_eq!(last.reason.as_deref(), Some("activation not found"));
}

#[tokio::test(start_paused = true)]
async fn network_failures_back_off_until_success() {
    let h = Harness::new();
    activate_with_interval(&h, 3600).await;
    h.transport.push_sync(Err(TransportError::Timeout));
    h.transport.push_sync(Err(TransportError::Timeout));
    h.transport
        .push_sync(Ok(sign(&license_payload(fixed_now()))));

    tokio::time::sleep(secs(3601)).await;
    assert_eq!(h.transport.sync_calls(), 1);

    tokio::time::sleep(secs(60)).await;
    assert_eq!(h.transport.sync_calls(), 2);

    tokio::time::sleep(secs(120)).await;
    assert_eq!(h.transport.sync_calls(), 3);

    // Success restores the token interval.
    tokio::time::sleep(secs(3598)).await;
    assert_eq!(h.transport.sync_calls(), 3);

    tokio::time::sleep(secs(2)).await;
    assert_eq!(h.transport.sync_calls(), 4);
}

#[tokio::test(start_paused = true)]
async fn rate_limited_sync_waits_longer() {
    let h = Harness::new();
    activate_with_interval(&h, 3600).await;
    h.transport.push_sync(Err(TransportError::RateLimited));

    tokio::time::sleep(secs(3601)).await;
    assert_eq!(h.transport.sync_calls(), 1);

    tokio::time::sleep(secs(238)).await;
    assert_eq!(h.transport.sync_calls(), 1);

    tokio::time::sleep(secs(2)).await;
    assert_eq!(h.transport.sync_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn backoff_never_exceeds_token_interval() {
    let h = Harness::new();
    activate_with_interval(&h, 300).await;

    // 300, then 360, 480, 720, and from there every 300 s.
    tokio::time::sleep(secs(721)).await;
    assert_eq!(h.transport.sync_calls(), 4);

    tokio::time::sleep(secs(300)).await;
    assert_eq!(h.transport.sync_calls(), 5);
}

#[tokio::test(start_paused = true)]
async fn inline_manual_syncs_share_one_cycle() {
    let h = Harness::new();
    activate_with_interval(&h, 0).await;
    let log = CallbackLog::default();
    log.attach(&h.activator);
    *h.transport.sync_delay.lock().unwrap() = Some(secs(5));
    h.transport
        .push_sync(Ok(sign(&license_payload(fixed_now()))));

    let (first, second) = tokio::join!(h.activator.sync_now(), h.activator.sync_now());
    let (first, second) = (first.unwrap(), second.unwrap());

    assert_eq!(first, second);
    assert_eq!(first.state, LicenseState::Valid);
    assert_eq!(h.transport.sync_calls(), 1);
    assert_eq!(log.count(), 1);
}

#[tokio::test(start_paused = true)]
async fn reset_during_sync_discards_the_new_token() {
    let h = Harness::new();
    activate_with_interval(&h, 3600).await;
    *h.transport.sync_delay.lock().unwrap() = Some(secs(5));
    h.transport
        .push_sync(Ok(sign(&license_payload(fixed_now()))));

    let (report, reset) = tokio::join!(h.activator.sync_now(), async {
        tokio::time::sleep(secs(1)).await;
        h.activator.reset().await
    });
    reset.unwrap();

    assert_eq!(report.unwrap().state, LicenseState::Failed);
    assert_eq!(h.transport.sync_calls(), 1);
    assert!(is_not_activated(h.activator.is_license_valid()));
    assert!(is_not_activated(h.restart().is_license_genuine()));
}

#[tokio::test(start_paused = true)]
async fn inline_sync_after_reset_discards_the_new_token() {
    let h = Harness::new();
    activate_with_interval(&h, 0).await;
    *h.transport.sync_delay.lock().unwrap() = Some(secs(5));
    h.transport
        .push_sync(Ok(sign(&license_payload(fixed_now()))));

    let (report, reset) = tokio::join!(h.activator.sync_now(), async {
        tokio::time::sleep(secs(1)).await;
        h.activator.reset().await
    });
    reset.unwrap();

    assert_eq!(report.unwrap().state, LicenseState::Failed);
    assert!(is_not_activated(h.activator.is_license_valid()));
    assert!(is_not_activated(h.restart().is_license_genuine()));
}

#[tokio::test(start_paused = true)]
async fn deactivate_during_sync_discards_the_new_token() {
    let h = Harness::new();
    activate_with_interval(&h, 3600).await;
    *h.transport.sync_delay.lock().unwrap() = Some(secs(5));
    h.transport
        .push_sync(Ok(sign(&license_payload(fixed_now()))));
    h.transport.push_deactivation(Ok(()));

    let (report, deactivated) = tokio::join!(h.activator.sync_now(), async {
        tokio::time::sleep(secs(1)).await;
        h.activator.deactivate_license().await
    });
    deactivated.unwrap();

    assert_eq!(report.unwrap().state, LicenseState::Failed);
    assert!(!h.activator.is_sync_running());
    assert!(is_not_activated(h.activator.is_license_valid()));
    assert!(is_not_activated(h.restart().is_license_genuine()));
}
