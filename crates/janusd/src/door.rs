//! Door actuation state machine.
//!
//! Exactly one door session exists process-wide, moving through
//! Idle -> Opening -> Open -> Closing -> Idle. Entry is a compare-and-set
//! under a mutex, the single serialization point: `open()` while not Idle
//! is deterministically rejected with "already in progress" and performs
//! no hardware call. Actuation faults return the session to Idle and are
//! surfaced to the caller; they are never retried automatically.

use chrono::{DateTime, Utc};
use janus_hw::{LockDriver, LockError};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DoorState {
    Idle,
    Opening,
    Open,
    Closing,
}

/// What initiated the current door cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerSource {
    Recognition,
    RemoteCommand,
}

/// Published door session state, for observation only.
#[derive(Debug, Clone, Serialize)]
pub struct DoorStatus {
    pub state: DoorState,
    pub opened_at: Option<DateTime<Utc>>,
    pub trigger: Option<TriggerSource>,
}

impl DoorStatus {
    fn idle() -> Self {
        Self { state: DoorState::Idle, opened_at: None, trigger: None }
    }
}

#[derive(Error, Debug)]
pub enum DoorError {
    #[error("door cycle already in progress")]
    AlreadyInProgress(DoorState),
    #[error("actuation failed: {0}")]
    Actuation(#[from] LockError),
    #[error("actuation task failed")]
    ActuationTask,
}

/// Clone-safe handle to the single door session.
#[derive(Clone)]
pub struct DoorController {
    inner: Arc<DoorShared>,
}

struct DoorShared {
    state: Mutex<DoorState>,
    status_tx: watch::Sender<DoorStatus>,
    lock: Arc<dyn LockDriver>,
    hold: Duration,
}

impl DoorController {
    pub fn new(lock: Arc<dyn LockDriver>, hold: Duration) -> (Self, watch::Receiver<DoorStatus>) {
        let (status_tx, status_rx) = watch::channel(DoorStatus::idle());
        let controller = Self {
            inner: Arc::new(DoorShared {
                state: Mutex::new(DoorState::Idle),
                status_tx,
                lock,
                hold,
            }),
        };
        (controller, status_rx)
    }

    /// Open the door.
    ///
    /// Resolves once the actuation phase completes: `Ok` means the strike
    /// released and the hold timer is running (reclose happens in the
    /// background); `Err` reports rejection or an actuation fault. The
    /// hardware call runs on the blocking pool, so the seconds-scale
    /// actuation never stalls the async runtime.
    pub async fn open(&self, trigger: TriggerSource) -> Result<(), DoorError> {
        {
            let mut state = self.lock_state();
            if *state != DoorState::Idle {
                tracing::debug!(state = ?*state, ?trigger, "open rejected: cycle in progress");
                return Err(DoorError::AlreadyInProgress(*state));
            }
            *state = DoorState::Opening;
        }
        self.publish(DoorState::Opening, None, Some(trigger));
        tracing::info!(?trigger, "door opening");

        let lock = self.inner.lock.clone();
        let actuation = tokio::task::spawn_blocking(move || lock.actuate_open()).await;
        match actuation {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                self.set_state(DoorState::Idle);
                self.publish(DoorState::Idle, None, None);
                tracing::error!(error = %e, ?trigger, "door actuation failed");
                return Err(DoorError::Actuation(e));
            }
            Err(e) => {
                self.set_state(DoorState::Idle);
                self.publish(DoorState::Idle, None, None);
                tracing::error!(error = %e, ?trigger, "actuation task failed");
                return Err(DoorError::ActuationTask);
            }
        }

        let opened_at = Utc::now();
        self.set_state(DoorState::Open);
        self.publish(DoorState::Open, Some(opened_at), Some(trigger));
        tracing::info!(?trigger, "door open");

        let controller = self.clone();
        tokio::spawn(async move {
            controller.hold_then_close(trigger, opened_at).await;
        });

        Ok(())
    }

    /// Current published status.
    pub fn status(&self) -> DoorStatus {
        self.inner.status_tx.borrow().clone()
    }

    /// Hold timer and reclose, detached from the triggering caller.
    async fn hold_then_close(&self, trigger: TriggerSource, opened_at: DateTime<Utc>) {
        tokio::time::sleep(self.inner.hold).await;

        self.set_state(DoorState::Closing);
        self.publish(DoorState::Closing, Some(opened_at), Some(trigger));

        let lock = self.inner.lock.clone();
        match tokio::task::spawn_blocking(move || lock.reset()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                // The cycle still returns to Idle so a future trigger can retry.
                tracing::error!(error = %e, "relay reset failed; strike may remain energized");
            }
            Err(e) => {
                tracing::error!(error = %e, "reset task failed");
            }
        }

        self.set_state(DoorState::Idle);
        self.publish(DoorState::Idle, None, None);
        tracing::info!("door closed");
    }

    fn lock_state(&self) -> std::sync::MutexGuard<'_, DoorState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_state(&self, state: DoorState) {
        *self.lock_state() = state;
    }

    fn publish(
        &self,
        state: DoorState,
        opened_at: Option<DateTime<Utc>>,
        trigger: Option<TriggerSource>,
    ) {
        self.inner.status_tx.send_replace(DoorStatus { state, opened_at, trigger });
    }
}
