//! Background server sync.
//!
//! One task per activator runs the loop below:
//! - sleep until the next cycle (token interval, floored by config)
//! - run one sync cycle and report its outcome to the status callback
//! - serve commands: manual sync (coalesced with an in-flight cycle) and stop
//!
//! After a network failure the next attempt comes sooner: the configured
//! minimum interval, doubling per consecutive failure up to the token
//! interval. Rate limiting starts two doublings further out.
//!
//! A cycle never holds a lock across the network call. The token swap
//! itself happens inside [`ActivationSession::refresh`], which drops the
//! result if the activation was reset or deactivated meanwhile.

use crate::error::{ActivatorError, ActivatorResult};
use crate::transport::{LicenseTransport, TransportError, TransportResult};
use crate::types::SyncRequest;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::Instant;
use tollgate_license::{ActivationSession, LicenseError, MeterUses, StatusReport};
use tracing::{debug, error, info, warn};

/// Receives the outcome of every sync cycle, on the scheduler task.
pub type StatusCallback = Arc<dyn Fn(StatusReport) + Send + Sync>;

/// Slot holding the current callback, shared with the facade so it can be
/// replaced while the scheduler runs.
pub type CallbackSlot = Arc<RwLock<Option<StatusCallback>>>;

enum SyncCommand {
    SyncNow(oneshot::Sender<StatusReport>),
    Stop,
}

/// What a sync cycle needs, independent of the scheduling loop.
pub struct SyncCore {
    session: Arc<ActivationSession>,
    transport: Arc<dyn LicenseTransport>,
    callback: CallbackSlot,
    app_version: Option<String>,
    min_interval: Duration,
    retry_step: AtomicU32,
    in_flight: Mutex<Option<watch::Receiver<Option<StatusReport>>>>,
}

/// Empties the in-flight slot when the leading cycle finishes or is dropped.
struct InFlightGuard<'a>(&'a Mutex<Option<watch::Receiver<Option<StatusReport>>>>);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).take();
    }
}

impl SyncCore {
    pub fn new(
        session: Arc<ActivationSession>,
        transport: Arc<dyn LicenseTransport>,
        callback: CallbackSlot,
        app_version: Option<String>,
        min_interval: Duration,
    ) -> Self {
        Self {
            session,
            transport,
            callback,
            app_version,
            min_interval,
            retry_step: AtomicU32::new(0),
            in_flight: Mutex::new(None),
        }
    }

    /// Returns the delay before the next cycle, or `None` if the current
    /// token disables background sync.
    pub fn next_interval(&self) -> Option<Duration> {
        let token = self.session.current()?;
        let regular = match token.payload().server_sync_interval_secs {
            0 => return None,
            secs => Duration::from_secs(secs).max(self.min_interval),
        };

        match self.retry_step.load(Ordering::SeqCst) {
            0 => Some(regular),
            step => {
                let factor = 1u32.checked_shl(step - 1).unwrap_or(u32::MAX);
                Some(self.min_interval.saturating_mul(factor).min(regular))
            }
        }
    }

    /// Runs a sync cycle, or joins the one already in flight and returns
    /// its report. Only the cycle that actually runs invokes the callback.
    pub async fn run_shared_cycle(&self) -> StatusReport {
        loop {
            let joined = {
                let mut slot = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
                match slot.as_ref() {
                    Some(rx) => Err(rx.clone()),
                    None => {
                        let (tx, rx) = watch::channel(None);
                        *slot = Some(rx);
                        Ok(tx)
                    }
                }
            };

            match joined {
                Ok(tx) => {
                    let _guard = InFlightGuard(&self.in_flight);
                    let report = self.run_cycle().await;
                    tx.send_replace(Some(report.clone()));
                    return report;
                }
                Err(mut rx) => {
                    debug!("joining in-flight sync cycle");
                    if let Ok(report) = rx.wait_for(Option::is_some).await {
                        if let Some(report) = report.as_ref() {
                            return report.clone();
                        }
                    }
                    // The leading cycle was dropped before finishing.
                }
            }
        }
    }

    /// Runs one sync cycle and invokes the status callback exactly once.
    async fn run_cycle(&self) -> StatusReport {
        let report = self.sync_once().await;
        info!("sync cycle finished: {}", report.state);

        let callback = self
            .callback
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let Some(callback) = callback {
            callback(report.clone());
        }
        report
    }

    async fn sync_once(&self) -> StatusReport {
        let epoch = self.session.epoch();
        let token = match self.session.require() {
            Ok(token) => token,
            Err(e) => return StatusReport::failed(e.to_string()),
        };

        let request = SyncRequest {
            product_id: token.payload().product_id.clone(),
            activation_id: token.payload().activation_id.clone(),
            fingerprint: self.session.verifier().fingerprint(),
            meter_attributes: self
                .session
                .ledger()
                .pending_uses()
                .into_iter()
                .map(|m| MeterUses {
                    name: m.name,
                    uses: m.total_uses,
                })
                .collect(),
            app_version: self.app_version.clone(),
        };

        let result = self.transport.sync(&request).await;
        self.track_retry(&result);

        match result {
            Ok(raw) => match self.session.refresh(&raw, epoch) {
                Ok(_) => self.session.evaluate(),
                Err(LicenseError::NotActivated) => {
                    info!("activation {} was removed during sync", request.activation_id);
                    StatusReport::failed(LicenseError::NotActivated.to_string())
                }
                Err(e) => {
                    error!("server returned a token that failed verification: {e}");
                    self.note_failure();
                    StatusReport::failed(e.to_string())
                }
            },
            Err(TransportError::ActivationNotFound) => {
                warn!("server no longer knows activation {}", request.activation_id);
                self.note_failure();
                StatusReport::failed(TransportError::ActivationNotFound.to_string())
            }
            Err(e) => {
                warn!("server sync failed: {e}");
                self.note_failure();
                let mut report = self.session.evaluate();
                if report.reason.is_none() {
                    report.reason = Some(format!("server sync failed: {e}"));
                }
                report
            }
        }
    }

    fn track_retry(&self, result: &TransportResult<String>) {
        let step = match result {
            Err(e) if e.is_rate_limited() => self.retry_step.load(Ordering::SeqCst).max(2) + 1,
            Err(e) if e.is_network() => self.retry_step.load(Ordering::SeqCst) + 1,
            _ => 0,
        };
        // Past this the delay is capped by the token interval anyway.
        self.retry_step.store(step.min(16), Ordering::SeqCst);
    }

    fn note_failure(&self) {
        if let Err(e) = self.session.record_sync_failure() {
            error!("failed to record sync failure: {e}");
        }
    }
}

/// Handle for sending commands to the sync engine.
#[derive(Clone)]
pub struct SyncHandle {
    command_tx: mpsc::Sender<SyncCommand>,
}

impl SyncHandle {
    /// Requests an immediate sync and waits for its report. If a cycle is
    /// already in flight, this waits for that cycle instead of starting a
    /// second one.
    pub async fn sync_now(&self) -> ActivatorResult<StatusReport> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command_tx
            .send(SyncCommand::SyncNow(reply_tx))
            .await
            .map_err(|_| ActivatorError::SchedulerStopped)?;
        reply_rx.await.map_err(|_| ActivatorError::SchedulerStopped)
    }

    /// Stops the recurring timer. An in-flight cycle completes first.
    pub async fn stop(&self) -> ActivatorResult<()> {
        self.command_tx
            .send(SyncCommand::Stop)
            .await
            .map_err(|_| ActivatorError::SchedulerStopped)
    }

    /// Returns true while the engine task is alive.
    pub fn is_running(&self) -> bool {
        !self.command_tx.is_closed()
    }
}

/// The scheduling loop. Drive it with [`SyncEngine::run`].
pub struct SyncEngine {
    core: Arc<SyncCore>,
    command_rx: mpsc::Receiver<SyncCommand>,
}

/// Creates a sync engine and its command handle.
pub fn create_sync_engine(core: Arc<SyncCore>) -> (SyncHandle, SyncEngine) {
    let (command_tx, command_rx) = mpsc::channel(16);
    (SyncHandle { command_tx }, SyncEngine { core, command_rx })
}

impl SyncEngine {
    /// Runs until stopped, the handle is dropped, or the token disables sync.
    pub async fn run(mut self) {
        info!("sync scheduler started");

        loop {
            let Some(interval) = self.core.next_interval() else {
                info!("background sync disabled for the current activation");
                break;
            };
            debug!("next server sync in {interval:?}");
            let deadline = Instant::now() + interval;

            let waiters = tokio::select! {
                _ = tokio::time::sleep_until(deadline) => Vec::new(),
                cmd = self.command_rx.recv() => match cmd {
                    Some(SyncCommand::SyncNow(reply)) => vec![reply],
                    Some(SyncCommand::Stop) | None => break,
                },
            };

            if self.cycle(waiters).await {
                break;
            }
        }

        info!("sync scheduler stopped");
    }

    /// Runs one cycle while collecting manual sync requests that arrive
    /// during it. Returns true if a stop was requested meanwhile.
    async fn cycle(&mut self, mut waiters: Vec<oneshot::Sender<StatusReport>>) -> bool {
        let core = self.core.clone();
        let in_flight = core.run_shared_cycle();
        tokio::pin!(in_flight);

        let mut stop = false;
        let report = loop {
            tokio::select! {
                report = &mut in_flight => break report,
                cmd = self.command_rx.recv(), if !stop => match cmd {
                    Some(SyncCommand::SyncNow(reply)) => waiters.push(reply),
                    Some(SyncCommand::Stop) | None => stop = true,
                },
            }
        };

        for waiter in waiters {
            let _ = waiter.send(report.clone());
        }
        stop
    }
}
