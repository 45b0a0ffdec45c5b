//! Automatic backup scheduler.
//!
//! The scheduler owns at most one pending timer. A timer is a tokio task that
//! sleeps until its target instant, runs an automatic pass on the blocking
//! pool, then computes the next target and goes back to sleep. Re-arming
//! cancels the running timer's [`CancellationToken`] before a new one is
//! installed, so two timers never coexist.
//!
//! ```text
//!            start (missed run)      timer fires
//!   Idle ───────────────► Running ◄─────────── Armed
//!     ▲                      │                   ▲ │
//!     │  no schedule         │ schedule          │ │ restart
//!     └──────────────────────┴───────────────────┘ ┘
//! ```

pub mod timing;

pub use timing::{Clock, ScheduleTime, SystemClock};

use crate::settings::{ConfigProvider, RetentionConfig};
use crate::store::{Artifact, ArtifactKind, ArtifactStore};
use crate::{retention, Result};
use chrono::{DateTime, Local};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use timing::{next_run_after, run_is_due};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Longest single sleep of a pending timer. The wall clock is re-read after
/// every nap so suspend/resume and clock changes are picked up.
const DEFAULT_MAX_NAP: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulerState {
    #[default]
    Idle,
    Armed,
    Running,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SchedulerStatus {
    pub state: SchedulerState,
    pub next_run: Option<DateTime<Local>>,
}

/// Outcome of one automatic snapshot plus retention pass.
#[derive(Debug, Clone)]
pub struct AutomaticPass {
    pub artifact: Artifact,
    pub pruned: usize,
}

/// Take an automatic snapshot, record the bookmark and prune under the
/// configured retention limits.
///
/// The store lock is held for the whole pass, so the new artifact is part of
/// the set the retention plan sees and no other operation interleaves.
pub fn run_automatic_pass(
    store: &ArtifactStore,
    config: &dyn ConfigProvider,
    clock: &dyn Clock,
) -> Result<AutomaticPass> {
    let guard = store.lock();
    let taken_at = clock.now();
    let artifact = guard.snapshot_at(ArtifactKind::Automatic, taken_at)?;

    if let Err(e) = config.record_auto_backup(taken_at) {
        warn!(error = %e, "Failed to record automatic backup time");
    }

    let limits = match config.retention_config() {
        Ok(retention_config) => retention_config.limits(),
        Err(e) => {
            warn!(error = %e, "Could not read retention settings, skipping cleanup");
            return Ok(AutomaticPass { artifact, pruned: 0 });
        }
    };

    let artifacts = match guard.list_artifacts() {
        Ok(artifacts) => artifacts,
        Err(e) => {
            warn!(error = %e, "Could not list backups, skipping cleanup");
            return Ok(AutomaticPass { artifact, pruned: 0 });
        }
    };
    let plan = retention::plan(&artifacts, &limits);
    let pruned = guard.delete_artifacts(&plan.prune);

    Ok(AutomaticPass { artifact, pruned })
}

struct PendingTimer {
    target: DateTime<Local>,
    cancel: CancellationToken,
}

#[derive(Default)]
struct TimerSlot {
    started: bool,
    state: SchedulerState,
    pending: Option<PendingTimer>,
}

struct Shared {
    store: Arc<ArtifactStore>,
    config: Arc<dyn ConfigProvider>,
    clock: Arc<dyn Clock>,
    max_nap: Duration,
    slot: Mutex<TimerSlot>,
}

pub struct Scheduler {
    shared: Arc<Shared>,
}

impl Scheduler {
    pub fn new(
        store: Arc<ArtifactStore>,
        config: Arc<dyn ConfigProvider>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::with_max_nap(store, config, clock, DEFAULT_MAX_NAP)
    }

    /// Like [`Scheduler::new`], with a custom bound on how long a pending
    /// timer sleeps before re-reading the clock.
    pub fn with_max_nap(
        store: Arc<ArtifactStore>,
        config: Arc<dyn ConfigProvider>,
        clock: Arc<dyn Clock>,
        max_nap: Duration,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                store,
                config,
                clock,
                max_nap,
                slot: Mutex::new(TimerSlot::default()),
            }),
        }
    }

    /// Startup: backfill a missed run (blocking until it finishes), then arm.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn start(&self) {
        self.stop();
        self.shared.lock_slot().started = true;

        let shared = self.shared.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || shared.catch_up()).await {
            error!(error = %e, "Missed backup check panicked");
        }

        self.shared.arm();
    }

    /// Cancel the pending timer, if any.
    pub fn stop(&self) {
        let mut slot = self.shared.lock_slot();
        slot.started = false;
        if let Some(pending) = slot.pending.take() {
            pending.cancel.cancel();
            info!(target_time = %pending.target, "Backup timer cancelled");
        }
        slot.state = SchedulerState::Idle;
    }

    /// Cancel and re-arm from the current configuration. Does nothing until
    /// [`Scheduler::start`] has been called.
    ///
    /// Must be called from within a tokio runtime.
    pub fn restart(&self) {
        if !self.shared.lock_slot().started {
            debug!("Scheduler not started, nothing to re-arm");
            return;
        }
        self.shared.arm();
    }

    pub fn status(&self) -> SchedulerStatus {
        let slot = self.shared.lock_slot();
        SchedulerStatus {
            state: slot.state,
            next_run: slot.pending.as_ref().map(|p| p.target),
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let Some(pending) = self.shared.lock_slot().pending.take() {
            pending.cancel.cancel();
        }
    }
}

impl Shared {
    fn lock_slot(&self) -> MutexGuard<'_, TimerSlot> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn schedule(&self) -> Vec<ScheduleTime> {
        match self.config.retention_config() {
            Ok(config) => config.schedule_times,
            Err(e) => {
                warn!(error = %e, "Could not read backup schedule, using default");
                RetentionConfig::default().schedule_times
            }
        }
    }

    fn arm(self: &Arc<Self>) {
        let next = next_run_after(&self.schedule(), self.clock.now());

        let mut slot = self.lock_slot();
        if let Some(previous) = slot.pending.take() {
            previous.cancel.cancel();
            debug!(target_time = %previous.target, "Replacing backup timer");
        }

        let Some(target) = next else {
            slot.state = SchedulerState::Idle;
            info!("No backup times configured, scheduler idle");
            return;
        };

        let cancel = CancellationToken::new();
        slot.pending = Some(PendingTimer {
            target,
            cancel: cancel.clone(),
        });
        slot.state = SchedulerState::Armed;
        info!(next_run = %target, "Backup timer armed");

        tokio::spawn(timer_loop(self.clone(), cancel, target));
    }

    /// Missed-run detection; runs a pass when one is due.
    fn catch_up(&self) {
        let schedule = self.schedule();
        let has_automatic = match self.store.list_artifacts() {
            Ok(artifacts) => artifacts.iter().any(|a| a.kind == ArtifactKind::Automatic),
            Err(e) => {
                warn!(error = %e, "Could not list backups");
                false
            }
        };
        let last_auto = self.config.last_auto_backup().unwrap_or_else(|e| {
            warn!(error = %e, "Could not read last automatic backup time");
            None
        });

        if !run_is_due(&schedule, last_auto, has_automatic, self.clock.now()) {
            debug!(?last_auto, "No missed automatic backup");
            return;
        }

        info!(?last_auto, has_automatic, "Automatic backup missed, running now");
        self.lock_slot().state = SchedulerState::Running;
        self.scheduled_pass();
        self.lock_slot().state = SchedulerState::Idle;
    }

    fn scheduled_pass(&self) {
        match run_automatic_pass(&self.store, self.config.as_ref(), self.clock.as_ref()) {
            Ok(pass) => info!(
                artifact = %pass.artifact.name,
                pruned = pass.pruned,
                "Automatic backup complete"
            ),
            Err(e) => error!(error = %e, "Automatic backup failed"),
        }
    }

    /// Flip an owned timer to `Running`. False if the timer was replaced.
    fn begin_run(&self, cancel: &CancellationToken) -> bool {
        let mut slot = self.lock_slot();
        if cancel.is_cancelled() {
            return false;
        }
        slot.state = SchedulerState::Running;
        true
    }

    /// After a run: the next target for this timer, or `None` when it should
    /// exit (replaced meanwhile, or the schedule is now empty).
    fn finish_run(&self, cancel: &CancellationToken, fired_at: DateTime<Local>) -> Option<DateTime<Local>> {
        let schedule = self.schedule();
        let reference = self.clock.now().max(fired_at);
        let next = next_run_after(&schedule, reference);

        let mut slot = self.lock_slot();
        if cancel.is_cancelled() {
            return None;
        }
        match next {
            Some(target) => {
                if let Some(pending) = slot.pending.as_mut() {
                    pending.target = target;
                }
                slot.state = SchedulerState::Armed;
                info!(next_run = %target, "Backup timer armed");
                Some(target)
            }
            None => {
                slot.pending = None;
                slot.state = SchedulerState::Idle;
                cancel.cancel();
                info!("No backup times configured, scheduler idle");
                None
            }
        }
    }
}

async fn timer_loop(shared: Arc<Shared>, cancel: CancellationToken, mut target: DateTime<Local>) {
    loop {
        loop {
            let now = shared.clock.now();
            if now >= target {
                break;
            }
            let nap = (target - now)
                .to_std()
                .unwrap_or_default()
                .min(shared.max_nap);
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(nap) => {}
            }
        }

        if !shared.begin_run(&cancel) {
            return;
        }

        let worker = shared.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || worker.scheduled_pass()).await {
            error!(error = %e, "Automatic backup task panicked");
        }

        match shared.finish_run(&cancel, target) {
            Some(next) => target = next,
            None => return,
        }
    }
}
