//! The breaker state machine.
//!
//! All mutable state lives in [`BreakerCore`], which is shared behind an
//! `Arc` by every handle and decorator. The machine itself sits behind a
//! mutex that is only held for pointer-sized bookkeeping, never across user
//! code, sleeps or event delivery; an atomic mirror of the state tag serves
//! lock-free reads. Events raised inside the critical section are buffered
//! and published after the lock is released so a subscriber may call back
//! into the breaker.
//!
//! Each transition bumps an epoch counter and installs a fresh metrics
//! window. Decorators carry the epoch of the permission they acquired; an
//! outcome or release whose epoch no longer matches is discarded instead of
//! leaking into the new window.

use crate::config::SlidingWindowType;
use crate::error::{CallNotPermittedError, IllegalStateTransitionError};
use crate::events::CircuitBreakerEvent;
use breakwater_core::{Clock, EventPublisher, OutcomeKind, SlidingWindow, WindowSnapshot};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

/// Observable state of a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[repr(u8)]
pub enum CircuitState {
    /// Calls flow; outcomes are recorded and thresholds evaluated.
    Closed = 0,
    /// Calls are refused until the open wait elapses.
    Open = 1,
    /// A bounded number of trial calls probe whether failures subsided.
    HalfOpen = 2,
    /// Calls flow; nothing is recorded, nothing transitions automatically.
    Disabled = 3,
    /// Calls are refused until an administrative transition.
    ForcedOpen = 4,
    /// Calls flow and are recorded, but thresholds never trip.
    MeteredOnly = 5,
}

impl CircuitState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => CircuitState::Closed,
            1 => CircuitState::Open,
            2 => CircuitState::HalfOpen,
            3 => CircuitState::Disabled,
            4 => CircuitState::ForcedOpen,
            _ => CircuitState::MeteredOnly,
        }
    }
}

/// Point-in-time view of a breaker's state and window aggregates.
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerMetrics {
    pub state: CircuitState,
    /// Aggregates of the window owned by the current state. Empty for
    /// `Disabled` and `ForcedOpen`, which hold no window.
    pub window: WindowSnapshot,
    /// Calls refused since construction (all states, never reset by
    /// transitions).
    pub number_of_not_permitted_calls: u64,
}

/// Parameters the state machine needs; the generic halves of the
/// configuration (predicates) stay in the typed handle.
#[derive(Debug, Clone)]
pub(crate) struct CoreConfig {
    pub(crate) name: String,
    pub(crate) failure_rate_threshold: f32,
    pub(crate) slow_call_rate_threshold: f32,
    pub(crate) slow_call_duration_threshold: Duration,
    pub(crate) minimum_number_of_calls: u32,
    pub(crate) sliding_window_type: SlidingWindowType,
    pub(crate) sliding_window_size: u32,
    pub(crate) wait_duration_in_open_state: Duration,
    pub(crate) permitted_number_of_calls_in_half_open_state: u32,
    pub(crate) automatic_transition_from_open_to_half_open: bool,
}

enum CbState {
    Closed { window: SlidingWindow },
    Open { since_nanos: u64, window: SlidingWindow },
    HalfOpen { window: SlidingWindow, issued: u32 },
    Disabled,
    ForcedOpen,
    MeteredOnly { window: SlidingWindow },
}

impl CbState {
    fn tag(&self) -> CircuitState {
        match self {
            CbState::Closed { .. } => CircuitState::Closed,
            CbState::Open { .. } => CircuitState::Open,
            CbState::HalfOpen { .. } => CircuitState::HalfOpen,
            CbState::Disabled => CircuitState::Disabled,
            CbState::ForcedOpen => CircuitState::ForcedOpen,
            CbState::MeteredOnly { .. } => CircuitState::MeteredOnly,
        }
    }
}

struct Machine {
    epoch: u64,
    state: CbState,
}

pub(crate) struct BreakerCore {
    config: CoreConfig,
    clock: Arc<dyn Clock>,
    machine: Mutex<Machine>,
    state_tag: AtomicU8,
    not_permitted_calls: AtomicU64,
    events: EventPublisher<CircuitBreakerEvent>,
    /// Self-reference for the scheduled open-to-half-open transition.
    self_ref: Weak<BreakerCore>,
}

impl BreakerCore {
    pub(crate) fn new(
        config: CoreConfig,
        clock: Arc<dyn Clock>,
        events: EventPublisher<CircuitBreakerEvent>,
    ) -> Arc<Self> {
        Arc::new_cyclic(|self_ref| {
            let closed = CbState::Closed {
                window: Self::main_window(&config),
            };
            BreakerCore {
                config,
                clock,
                machine: Mutex::new(Machine {
                    epoch: 0,
                    state: closed,
                }),
                state_tag: AtomicU8::new(CircuitState::Closed as u8),
                not_permitted_calls: AtomicU64::new(0),
                events,
                self_ref: self_ref.clone(),
            }
        })
    }

    fn main_window(config: &CoreConfig) -> SlidingWindow {
        match config.sliding_window_type {
            SlidingWindowType::CountBased => SlidingWindow::count_based(
                config.sliding_window_size,
                config.minimum_number_of_calls,
            ),
            SlidingWindowType::TimeBased => SlidingWindow::time_based(
                config.sliding_window_size,
                config.minimum_number_of_calls,
            ),
        }
    }

    /// The trial window only sees half-open probes, so both its size and
    /// its minimum are the permitted probe count.
    fn trial_window(config: &CoreConfig) -> SlidingWindow {
        let permitted = config.permitted_number_of_calls_in_half_open_state;
        SlidingWindow::count_based(permitted, permitted)
    }

    pub(crate) fn name(&self) -> &str {
        &self.config.name
    }

    pub(crate) fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub(crate) fn events(&self) -> &EventPublisher<CircuitBreakerEvent> {
        &self.events
    }

    /// Lock-free state read.
    pub(crate) fn state(&self) -> CircuitState {
        CircuitState::from_u8(self.state_tag.load(Ordering::Acquire))
    }

    pub(crate) fn metrics(&self) -> CircuitBreakerMetrics {
        let now = self.clock.elapsed_nanos();
        let machine = self.machine.lock().expect("breaker lock poisoned");
        let window = match &machine.state {
            CbState::Closed { window }
            | CbState::Open { window, .. }
            | CbState::HalfOpen { window, .. }
            | CbState::MeteredOnly { window } => window.snapshot(now),
            CbState::Disabled | CbState::ForcedOpen => {
                WindowSnapshot::empty(self.config.minimum_number_of_calls)
            }
        };
        CircuitBreakerMetrics {
            state: machine.state.tag(),
            window,
            number_of_not_permitted_calls: self.not_permitted_calls.load(Ordering::Relaxed),
        }
    }

    /// Attempts to take a permission; on success returns the epoch it was
    /// issued in. Never blocks.
    pub(crate) fn try_acquire(&self) -> Result<u64, CallNotPermittedError> {
        enum Decision {
            Permit,
            OpenWaitElapsed,
            Deny,
        }

        let mut pending = Vec::new();
        let result = {
            let mut machine = self.machine.lock().expect("breaker lock poisoned");
            let decision = match &mut machine.state {
                CbState::Closed { .. } | CbState::Disabled | CbState::MeteredOnly { .. } => {
                    Decision::Permit
                }
                CbState::Open { since_nanos, .. } => {
                    let waited = self.clock.elapsed_nanos().saturating_sub(*since_nanos);
                    if waited >= self.config.wait_duration_in_open_state.as_nanos() as u64 {
                        Decision::OpenWaitElapsed
                    } else {
                        Decision::Deny
                    }
                }
                CbState::HalfOpen { issued, .. } => {
                    if *issued < self.config.permitted_number_of_calls_in_half_open_state {
                        *issued += 1;
                        Decision::Permit
                    } else {
                        Decision::Deny
                    }
                }
                CbState::ForcedOpen => Decision::Deny,
            };
            match decision {
                Decision::Permit => Ok(machine.epoch),
                Decision::OpenWaitElapsed => {
                    self.transition_locked(&mut machine, CircuitState::HalfOpen, &mut pending);
                    if let CbState::HalfOpen { issued, .. } = &mut machine.state {
                        *issued = 1;
                    }
                    Ok(machine.epoch)
                }
                Decision::Deny => Err(self.deny_locked(&machine, &mut pending)),
            }
        };
        self.publish(pending);
        result
    }

    fn deny_locked(
        &self,
        machine: &Machine,
        pending: &mut Vec<CircuitBreakerEvent>,
    ) -> CallNotPermittedError {
        self.not_permitted_calls.fetch_add(1, Ordering::Relaxed);
        pending.push(CircuitBreakerEvent::CallNotPermitted {
            name: self.config.name.clone(),
            timestamp: self.clock.now(),
        });

        #[cfg(feature = "metrics")]
        metrics::counter!(
            "circuitbreaker_calls_not_permitted_total",
            "circuitbreaker" => self.config.name.clone()
        )
        .increment(1);

        CallNotPermittedError {
            name: self.config.name.clone(),
            state: machine.state.tag(),
        }
    }

    /// Returns an unconsumed half-open permission. Outside `HalfOpen`, or
    /// for a permission issued before the latest transition, this is a
    /// no-op.
    pub(crate) fn release(&self, epoch: u64) {
        let mut machine = self.machine.lock().expect("breaker lock poisoned");
        if machine.epoch != epoch {
            return;
        }
        if let CbState::HalfOpen { issued, .. } = &mut machine.state {
            *issued = issued.saturating_sub(1);
        }
    }

    /// Releases against whatever epoch is current; the manual counterpart
    /// of [`Self::release`].
    pub(crate) fn release_current(&self) {
        let mut machine = self.machine.lock().expect("breaker lock poisoned");
        if let CbState::HalfOpen { issued, .. } = &mut machine.state {
            *issued = issued.saturating_sub(1);
        }
    }

    /// Emits the ignored-error event; the metrics are untouched by design
    /// of the classification contract.
    pub(crate) fn on_ignored(&self) {
        self.events.emit(&CircuitBreakerEvent::IgnoredError {
            name: self.config.name.clone(),
            timestamp: self.clock.now(),
        });
    }

    /// Records an outcome. `epoch` is `None` for the manual recording API,
    /// which always targets the current window.
    pub(crate) fn record(&self, epoch: Option<u64>, kind: OutcomeKind, duration: Duration) {
        let slow = duration >= self.config.slow_call_duration_threshold;
        let now = self.clock.elapsed_nanos();
        let mut pending = Vec::new();
        {
            let mut machine = self.machine.lock().expect("breaker lock poisoned");
            if let Some(expected) = epoch {
                if expected != machine.epoch {
                    // The state changed while the call was in flight; its
                    // outcome must not seed the fresh window.
                    return;
                }
            }

            let state_tag = machine.state.tag();
            let evaluation = match &mut machine.state {
                CbState::Closed { window } => {
                    window.record(now, kind, duration, slow);
                    Some((false, window.snapshot(now)))
                }
                CbState::HalfOpen { window, .. } => {
                    window.record(now, kind, duration, slow);
                    Some((true, window.snapshot(now)))
                }
                CbState::Open { window, .. } | CbState::MeteredOnly { window } => {
                    window.record(now, kind, duration, slow);
                    None
                }
                CbState::Disabled | CbState::ForcedOpen => None,
            };
            match evaluation {
                Some((false, snapshot)) => {
                    self.evaluate_thresholds_locked(&mut machine, snapshot, &mut pending)
                }
                Some((true, snapshot)) => {
                    self.evaluate_trial_locked(&mut machine, snapshot, &mut pending)
                }
                None => {}
            }

            let event = match kind {
                OutcomeKind::Success => CircuitBreakerEvent::SuccessRecorded {
                    name: self.config.name.clone(),
                    timestamp: self.clock.now(),
                    duration,
                    state: state_tag,
                },
                OutcomeKind::Failure => CircuitBreakerEvent::FailureRecorded {
                    name: self.config.name.clone(),
                    timestamp: self.clock.now(),
                    duration,
                    state: state_tag,
                },
            };
            pending.insert(0, event);
        }

        #[cfg(feature = "metrics")]
        {
            let outcome = match kind {
                OutcomeKind::Success => "success",
                OutcomeKind::Failure => "failure",
            };
            metrics::counter!(
                "circuitbreaker_calls_total",
                "circuitbreaker" => self.config.name.clone(),
                "outcome" => outcome
            )
            .increment(1);
            metrics::histogram!(
                "circuitbreaker_call_duration_seconds",
                "circuitbreaker" => self.config.name.clone()
            )
            .record(duration.as_secs_f64());
        }

        self.publish(pending);
    }

    fn evaluate_thresholds_locked(
        &self,
        machine: &mut Machine,
        snapshot: WindowSnapshot,
        pending: &mut Vec<CircuitBreakerEvent>,
    ) {
        // Sentinel rates (below the minimum call count) never gate.
        if snapshot.failure_rate >= 0.0 && snapshot.failure_rate >= self.config.failure_rate_threshold
        {
            pending.push(CircuitBreakerEvent::FailureRateExceeded {
                name: self.config.name.clone(),
                timestamp: self.clock.now(),
                failure_rate: snapshot.failure_rate,
            });
            self.transition_locked(machine, CircuitState::Open, pending);
            return;
        }
        if snapshot.slow_call_rate >= 0.0
            && snapshot.slow_call_rate >= self.config.slow_call_rate_threshold
        {
            pending.push(CircuitBreakerEvent::SlowCallRateExceeded {
                name: self.config.name.clone(),
                timestamp: self.clock.now(),
                slow_call_rate: snapshot.slow_call_rate,
            });
            self.transition_locked(machine, CircuitState::Open, pending);
        }
    }

    fn evaluate_trial_locked(
        &self,
        machine: &mut Machine,
        snapshot: WindowSnapshot,
        pending: &mut Vec<CircuitBreakerEvent>,
    ) {
        // The trial window's minimum equals the permitted probe count, so
        // rates stay at the sentinel until every probe has reported.
        if snapshot.failure_rate < 0.0 {
            return;
        }
        if snapshot.failure_rate >= self.config.failure_rate_threshold {
            pending.push(CircuitBreakerEvent::FailureRateExceeded {
                name: self.config.name.clone(),
                timestamp: self.clock.now(),
                failure_rate: snapshot.failure_rate,
            });
            self.transition_locked(machine, CircuitState::Open, pending);
        } else if snapshot.slow_call_rate >= self.config.slow_call_rate_threshold {
            pending.push(CircuitBreakerEvent::SlowCallRateExceeded {
                name: self.config.name.clone(),
                timestamp: self.clock.now(),
                slow_call_rate: snapshot.slow_call_rate,
            });
            self.transition_locked(machine, CircuitState::Open, pending);
        } else {
            self.transition_locked(machine, CircuitState::Closed, pending);
        }
    }

    /// Administrative transition with legality checking.
    pub(crate) fn transition_to(
        &self,
        to: CircuitState,
    ) -> Result<(), IllegalStateTransitionError> {
        let mut pending = Vec::new();
        let result = {
            let mut machine = self.machine.lock().expect("breaker lock poisoned");
            let from = machine.state.tag();
            if !Self::transition_allowed(from, to) {
                return Err(IllegalStateTransitionError {
                    name: self.config.name.clone(),
                    from,
                    to,
                });
            }
            self.transition_locked(&mut machine, to, &mut pending);
            Ok(())
        };
        self.publish(pending);
        result
    }

    /// Same-state moves are bugs on the caller's side, and Closed may not
    /// jump straight to HalfOpen (there is nothing to probe for).
    fn transition_allowed(from: CircuitState, to: CircuitState) -> bool {
        if from == to {
            return false;
        }
        !(from == CircuitState::Closed && to == CircuitState::HalfOpen)
    }

    /// Clears all metrics and returns to a pristine Closed state.
    pub(crate) fn reset(&self) {
        let mut pending = Vec::new();
        {
            let mut machine = self.machine.lock().expect("breaker lock poisoned");
            machine.epoch += 1;
            machine.state = CbState::Closed {
                window: Self::main_window(&self.config),
            };
            self.state_tag
                .store(CircuitState::Closed as u8, Ordering::Release);
            pending.push(CircuitBreakerEvent::Reset {
                name: self.config.name.clone(),
                timestamp: self.clock.now(),
            });
        }

        #[cfg(feature = "tracing")]
        tracing::info!(circuitbreaker = %self.config.name, "circuit breaker reset");

        self.publish(pending);
    }

    fn transition_locked(
        &self,
        machine: &mut Machine,
        to: CircuitState,
        pending: &mut Vec<CircuitBreakerEvent>,
    ) {
        let from = machine.state.tag();
        machine.epoch += 1;
        let previous = std::mem::replace(&mut machine.state, CbState::Disabled);
        let tripping_window = match previous {
            CbState::Closed { window }
            | CbState::Open { window, .. }
            | CbState::HalfOpen { window, .. }
            | CbState::MeteredOnly { window } => Some(window),
            CbState::Disabled | CbState::ForcedOpen => None,
        };
        machine.state = match to {
            CircuitState::Closed => CbState::Closed {
                window: Self::main_window(&self.config),
            },
            // Open keeps the window that tripped it, so callers can still
            // observe the rate the decision was made on.
            CircuitState::Open => CbState::Open {
                since_nanos: self.clock.elapsed_nanos(),
                window: tripping_window.unwrap_or_else(|| Self::main_window(&self.config)),
            },
            CircuitState::HalfOpen => CbState::HalfOpen {
                window: Self::trial_window(&self.config),
                issued: 0,
            },
            CircuitState::Disabled => CbState::Disabled,
            CircuitState::ForcedOpen => CbState::ForcedOpen,
            CircuitState::MeteredOnly => CbState::MeteredOnly {
                window: Self::main_window(&self.config),
            },
        };
        self.state_tag.store(to as u8, Ordering::Release);

        pending.push(CircuitBreakerEvent::StateTransition {
            name: self.config.name.clone(),
            timestamp: self.clock.now(),
            from,
            to,
        });

        #[cfg(feature = "tracing")]
        tracing::info!(
            circuitbreaker = %self.config.name,
            from = ?from,
            to = ?to,
            "circuit state transition"
        );

        #[cfg(feature = "metrics")]
        metrics::counter!(
            "circuitbreaker_transitions_total",
            "circuitbreaker" => self.config.name.clone(),
            "from" => state_label(from),
            "to" => state_label(to)
        )
        .increment(1);

        if to == CircuitState::Open && self.config.automatic_transition_from_open_to_half_open {
            self.schedule_half_open(machine.epoch);
        }
    }

    /// Schedules the eager Open-to-HalfOpen move. Requires a tokio runtime;
    /// without one the transition still happens lazily on the next acquire.
    fn schedule_half_open(&self, open_epoch: u64) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let weak = self.self_ref.clone();
        let wait = self.config.wait_duration_in_open_state;
        handle.spawn(async move {
            tokio::time::sleep(wait).await;
            if let Some(core) = weak.upgrade() {
                core.auto_half_open(open_epoch);
            }
        });
    }

    fn auto_half_open(&self, open_epoch: u64) {
        let mut pending = Vec::new();
        {
            let mut machine = self.machine.lock().expect("breaker lock poisoned");
            let still_same_open =
                machine.epoch == open_epoch && matches!(machine.state, CbState::Open { .. });
            if still_same_open {
                self.transition_locked(&mut machine, CircuitState::HalfOpen, &mut pending);
            }
        }
        self.publish(pending);
    }

    fn publish(&self, pending: Vec<CircuitBreakerEvent>) {
        for event in &pending {
            self.events.emit(event);
        }
    }
}

#[cfg(feature = "metrics")]
fn state_label(state: CircuitState) -> &'static str {
    match state {
        CircuitState::Closed => "Closed",
        CircuitState::Open => "Open",
        CircuitState::HalfOpen => "HalfOpen",
        CircuitState::Disabled => "Disabled",
        CircuitState::ForcedOpen => "ForcedOpen",
        CircuitState::MeteredOnly => "MeteredOnly",
    }
}

impl std::fmt::Debug for BreakerCore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BreakerCore")
            .field("name", &self.config.name)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
