//! Per-consumer access state machine
//!
//! ```text
//! Loading ──ok──▶ Resolved(decision)
//!    │  ▲
//!   err │ delay (up to max_retries)
//!    ▼  │
//! Errored{attempt} ──budget spent──▶ Failed (sticky, needs retry())
//! ```
//!
//! States are published on a `tokio::sync::watch` channel. Once every
//! receiver is gone the monitor stops publishing, so a consumer that went
//! away mid-resolution never sees a late update.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use tokio::sync::watch;
use tracing::debug;

use super::decision::AccessDecision;
use super::error::AccessError;
use super::resolver::{AccessResolver, LookupMode, ResolveEvent};

#[derive(Debug, Clone)]
pub enum AccessState {
    /// Resolution in flight
    Loading,
    Resolved(AccessDecision),
    /// Attempt `attempt` failed; another attempt follows automatically
    Errored { attempt: u32, error: AccessError },
    /// Retry budget spent or the failure was terminal
    Failed { attempts: u32, error: AccessError },
}

impl AccessState {
    pub fn is_premium(&self) -> bool {
        matches!(self, AccessState::Resolved(decision) if decision.resolved_premium)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, AccessState::Resolved(_) | AccessState::Failed { .. })
    }
}

/// Drives resolution for one consumer and publishes its state
pub struct AccessMonitor {
    resolver: Arc<AccessResolver>,
    user_id: String,
    state: watch::Sender<AccessState>,
}

impl AccessMonitor {
    pub fn new(resolver: Arc<AccessResolver>, user_id: impl Into<String>) -> (Self, watch::Receiver<AccessState>) {
        let (state, receiver) = watch::channel(AccessState::Loading);
        let monitor = Self {
            resolver,
            user_id: user_id.into(),
            state,
        };
        (monitor, receiver)
    }

    pub fn subscribe(&self) -> watch::Receiver<AccessState> {
        self.state.subscribe()
    }

    /// Last published state
    pub fn state(&self) -> AccessState {
        self.state.borrow().clone()
    }

    /// Initial resolution; cached decisions are accepted
    pub async fn load(&self) -> AccessState {
        self.run(LookupMode::CacheFirst).await
    }

    /// Re-resolve bypassing the cache
    pub async fn refresh(&self) -> AccessState {
        self.run(LookupMode::Refresh).await
    }

    /// Manual action out of [`AccessState::Failed`], with a fresh retry budget
    pub async fn retry(&self) -> AccessState {
        debug!(user_id = %self.user_id, "Manual access retry");
        self.run(LookupMode::Refresh).await
    }

    async fn run(&self, mode: LookupMode) -> AccessState {
        let attempts = AtomicU32::new(0);

        let result = self
            .resolver
            .resolve_with(&self.user_id, mode, |event| match event {
                ResolveEvent::Attempt(attempt) => {
                    attempts.store(attempt, Ordering::SeqCst);
                    self.publish(AccessState::Loading);
                }
                ResolveEvent::Retrying { attempt, error, .. } => {
                    self.publish(AccessState::Errored {
                        attempt,
                        error: error.clone(),
                    });
                }
            })
            .await;

        let state = match result {
            Ok(decision) => AccessState::Resolved(decision),
            Err(error) => AccessState::Failed {
                attempts: attempts.load(Ordering::SeqCst).max(1),
                error,
            },
        };

        self.publish(state.clone());
        state
    }

    fn publish(&self, state: AccessState) {
        if self.state.is_closed() {
            debug!(user_id = %self.user_id, "No access state subscribers; update dropped");
            return;
        }
        self.state.send_replace(state);
    }
}
