//! Client-side portal configuration.

use std::time::Duration;

use crate::error::PortalError;

/// Configuration for [`PortalClient`](crate::PortalClient).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortalConfig {
    /// Interval between heartbeats, in milliseconds (default: 5000).
    pub heartbeat_interval_ms: u64,
    /// How long a join may wait for the host's state, in milliseconds (default: 10000).
    pub join_timeout_ms: u64,
    /// Extra attempts after an allocation failure (default: 3).
    pub allocation_retries: u32,
    /// Base delay between allocation attempts, in milliseconds (default: 100).
    pub allocation_retry_delay_ms: u64,
    /// Whether a new guest starts out following the host (default: true).
    pub follow_host_on_join: bool,
    /// Capacity of the event channel (default: 256).
    pub event_capacity: usize,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 5_000,
            join_timeout_ms: 10_000,
            allocation_retries: 3,
            allocation_retry_delay_ms: 100,
            follow_host_on_join: true,
            event_capacity: 256,
        }
    }
}

impl PortalConfig {
    /// Default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the heartbeat interval.
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Set the join timeout.
    pub fn with_join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set how many times an allocation failure is retried.
    pub fn with_allocation_retries(mut self, retries: u32) -> Self {
        self.allocation_retries = retries;
        self
    }

    /// Set the base delay between allocation attempts.
    pub fn with_allocation_retry_delay(mut self, delay: Duration) -> Self {
        self.allocation_retry_delay_ms = delay.as_millis() as u64;
        self
    }

    /// Choose whether new guests follow the host.
    pub fn with_follow_host_on_join(mut self, follow: bool) -> Self {
        self.follow_host_on_join = follow;
        self
    }

    /// Heartbeat interval as a duration.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Join timeout as a duration.
    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    /// Delay before allocation attempt number `attempt` (1-based retry count).
    pub fn retry_delay(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.allocation_retry_delay_ms.saturating_mul(u64::from(attempt)))
    }

    /// Check the values.
    pub fn validate(&self) -> Result<(), PortalError> {
        if self.heartbeat_interval_ms == 0 {
            return Err(PortalError::InvalidConfig(
                "heartbeat_interval_ms must be positive".into(),
            ));
        }
        if self.join_timeout_ms == 0 {
            return Err(PortalError::InvalidConfig(
                "join_timeout_ms must be positive".into(),
            ));
        }
        if self.event_capacity == 0 {
            return Err(PortalError::InvalidConfig(
                "event_capacity must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Check that the relay's eviction period is at least one heartbeat interval.
    pub fn validate_against(&self, eviction_period: Duration) -> Result<(), PortalError> {
        self.validate()?;
        if self.heartbeat_interval() > eviction_period {
            return Err(PortalError::InvalidConfig(format!(
                "heartbeat interval {}ms exceeds the eviction period {}ms",
                self.heartbeat_interval_ms,
                eviction_period.as_millis()
            )));
        }
        Ok(())
    }
}
