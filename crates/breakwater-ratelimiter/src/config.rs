use crate::events::RateLimiterEvent;
use breakwater_core::events::{EventPublisher, FnListener};
use std::time::Duration;

/// Scheduling model of a rate limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimiterKind {
    /// Time is sliced into refresh periods; each period grants
    /// `limit_for_period` permits.
    Cycle,
    /// Permits replenish continuously at `limit_for_period` per refresh
    /// period, up to a burst capacity.
    Refill,
}

/// Immutable configuration of a rate limiter.
#[derive(Clone)]
pub struct RateLimiterConfig {
    pub(crate) kind: RateLimiterKind,
    pub(crate) limit_for_period: u32,
    pub(crate) limit_refresh_period: Duration,
    pub(crate) timeout_duration: Duration,
    pub(crate) burst_capacity: Option<u32>,
    pub(crate) initial_permits: Option<u32>,
    pub(crate) events: EventPublisher<RateLimiterEvent>,
}

impl RateLimiterConfig {
    pub fn builder() -> RateLimiterConfigBuilder {
        RateLimiterConfigBuilder::new()
    }

    pub fn of_defaults() -> Self {
        Self::builder().build()
    }

    pub fn kind(&self) -> RateLimiterKind {
        self.kind
    }

    pub fn limit_for_period(&self) -> u32 {
        self.limit_for_period
    }

    pub fn limit_refresh_period(&self) -> Duration {
        self.limit_refresh_period
    }

    pub fn timeout_duration(&self) -> Duration {
        self.timeout_duration
    }

    /// Burst capacity of the refill variant; defaults to
    /// `limit_for_period`.
    pub fn burst_capacity(&self) -> u32 {
        self.burst_capacity.unwrap_or(self.limit_for_period)
    }

    /// Initial permits of the refill variant; defaults to the burst
    /// capacity.
    pub fn initial_permits(&self) -> u32 {
        self.initial_permits.unwrap_or_else(|| self.burst_capacity())
    }
}

impl std::fmt::Debug for RateLimiterConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiterConfig")
            .field("kind", &self.kind)
            .field("limit_for_period", &self.limit_for_period)
            .field("limit_refresh_period", &self.limit_refresh_period)
            .field("timeout_duration", &self.timeout_duration)
            .finish_non_exhaustive()
    }
}

/// Builder for [`RateLimiterConfig`].
pub struct RateLimiterConfigBuilder {
    kind: RateLimiterKind,
    limit_for_period: u32,
    limit_refresh_period: Duration,
    timeout_duration: Duration,
    burst_capacity: Option<u32>,
    initial_permits: Option<u32>,
    events: EventPublisher<RateLimiterEvent>,
}

impl RateLimiterConfigBuilder {
    /// Defaults: cycle model, 50 permits per 500ms period, 5s acquisition
    /// timeout.
    pub fn new() -> Self {
        Self {
            kind: RateLimiterKind::Cycle,
            limit_for_period: 50,
            limit_refresh_period: Duration::from_millis(500),
            timeout_duration: Duration::from_secs(5),
            burst_capacity: None,
            initial_permits: None,
            events: EventPublisher::new(),
        }
    }

    /// Cycle or refill scheduling.
    ///
    /// Default: cycle
    pub fn kind(mut self, kind: RateLimiterKind) -> Self {
        self.kind = kind;
        self
    }

    /// Permits granted per refresh period. Must be at least 1.
    ///
    /// Default: 50
    pub fn limit_for_period(mut self, limit: u32) -> Self {
        self.limit_for_period = limit;
        self
    }

    /// Length of one refresh period. Must be non-zero.
    ///
    /// Default: 500ms
    pub fn limit_refresh_period(mut self, period: Duration) -> Self {
        self.limit_refresh_period = period;
        self
    }

    /// How long an acquisition may wait for its reservation before being
    /// refused outright.
    ///
    /// Default: 5s
    pub fn timeout_duration(mut self, timeout: Duration) -> Self {
        self.timeout_duration = timeout;
        self
    }

    /// Burst capacity of the refill variant.
    ///
    /// Default: `limit_for_period`
    pub fn burst_capacity(mut self, capacity: u32) -> Self {
        self.burst_capacity = Some(capacity);
        self
    }

    /// Permits available immediately after construction (refill variant).
    ///
    /// Default: the burst capacity
    pub fn initial_permits(mut self, permits: u32) -> Self {
        self.initial_permits = Some(permits);
        self
    }

    /// Register a callback for granted reservations.
    pub fn on_permits_acquired<F>(self, f: F) -> Self
    where
        F: Fn(u32, Duration) + Send + Sync + 'static,
    {
        self.events
            .subscribe(FnListener::new(move |event: &RateLimiterEvent| {
                if let RateLimiterEvent::PermitsAcquired { permits, wait, .. } = event {
                    f(*permits, *wait);
                }
            }));
        self
    }

    /// Register a callback for refused reservations.
    pub fn on_permits_rejected<F>(self, f: F) -> Self
    where
        F: Fn(u32) + Send + Sync + 'static,
    {
        self.events
            .subscribe(FnListener::new(move |event: &RateLimiterEvent| {
                if let RateLimiterEvent::PermitsRejected { permits, .. } = event {
                    f(*permits);
                }
            }));
        self
    }

    /// Builds the configuration.
    ///
    /// # Panics
    ///
    /// Panics when `limit_for_period` is zero or the refresh period is
    /// shorter than one nanosecond per permit.
    pub fn build(self) -> RateLimiterConfig {
        assert!(
            self.limit_for_period >= 1,
            "limit_for_period must be at least 1"
        );
        assert!(
            !self.limit_refresh_period.is_zero(),
            "limit_refresh_period must be non-zero"
        );
        assert!(
            self.limit_refresh_period.as_nanos() as u64 >= self.limit_for_period as u64,
            "limit_refresh_period must allow at least one nanosecond per permit"
        );

        RateLimiterConfig {
            kind: self.kind,
            limit_for_period: self.limit_for_period,
            limit_refresh_period: self.limit_refresh_period,
            timeout_duration: self.timeout_duration,
            burst_capacity: self.burst_capacity,
            initial_permits: self.initial_permits,
            events: self.events,
        }
    }
}

impl Default for RateLimiterConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = RateLimiterConfig::of_defaults();
        assert_eq!(config.kind(), RateLimiterKind::Cycle);
        assert_eq!(config.limit_for_period(), 50);
        assert_eq!(config.limit_refresh_period(), Duration::from_millis(500));
        assert_eq!(config.timeout_duration(), Duration::from_secs(5));
    }

    #[test]
    fn refill_defaults_cascade() {
        let config = RateLimiterConfig::builder()
            .kind(RateLimiterKind::Refill)
            .limit_for_period(10)
            .build();
        assert_eq!(config.burst_capacity(), 10);
        assert_eq!(config.initial_permits(), 10);

        let config = RateLimiterConfig::builder()
            .kind(RateLimiterKind::Refill)
            .limit_for_period(10)
            .burst_capacity(25)
            .initial_permits(5)
            .build();
        assert_eq!(config.burst_capacity(), 25);
        assert_eq!(config.initial_permits(), 5);
    }

    #[test]
    #[should_panic(expected = "limit_for_period")]
    fn rejects_zero_limit() {
        let _ = RateLimiterConfig::builder().limit_for_period(0).build();
    }

    #[test]
    #[should_panic(expected = "limit_refresh_period")]
    fn rejects_zero_period() {
        let _ = RateLimiterConfig::builder()
            .limit_refresh_period(Duration::ZERO)
            .build();
    }
}
