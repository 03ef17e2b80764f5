//! Pipeline-wide configuration.
//!
//! Per-interceptor timeouts and fallbacks live on
//! [`InterceptorHandle`](crate::interceptor::InterceptorHandle); this module
//! only holds the limits shared by every chain a coordinator runs.

use std::time::Duration;

/// Configuration for a [`PipelineCoordinator`](crate::pipeline::PipelineCoordinator).
///
/// # Examples
///
/// ```
/// use std::time::Duration;
///
/// use interceptor_chain::config::PipelineConfig;
///
/// let config = PipelineConfig::default()
///     .max_async_timeout(Duration::from_secs(5))
///     .fail_open_on_resolution_error(false);
///
/// assert_eq!(config.max_async_timeout, Duration::from_secs(5));
/// assert!(!config.fail_open_on_resolution_error);
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Upper bound for asynchronous interceptor timeouts.
    ///
    /// Handles requesting a longer timeout are clamped to this value and a
    /// warning is logged.
    ///
    /// Default: 60 seconds.
    pub max_async_timeout: Duration,

    /// Whether a registry failure sends the original packet.
    ///
    /// When `false` the failure is returned to the caller as
    /// [`PipelineError::ChainResolution`](crate::error::PipelineError::ChainResolution).
    ///
    /// Default: true.
    pub fail_open_on_resolution_error: bool,

    /// Capacity of the channel created by
    /// [`ChannelSink::from_config`](crate::events::ChannelSink::from_config).
    ///
    /// Default: 1024.
    pub failure_channel_capacity: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_async_timeout: Duration::from_secs(60),
            fail_open_on_resolution_error: true,
            failure_channel_capacity: 1024,
        }
    }
}

impl PipelineConfig {
    /// Set the upper bound for asynchronous timeouts.
    #[must_use]
    pub fn max_async_timeout(mut self, limit: Duration) -> Self {
        self.max_async_timeout = limit;
        self
    }

    /// Set whether registry failures fail open.
    #[must_use]
    pub fn fail_open_on_resolution_error(mut self, enabled: bool) -> Self {
        self.fail_open_on_resolution_error = enabled;
        self
    }

    /// Set the failure channel capacity. Zero is raised to one.
    #[must_use]
    pub fn failure_channel_capacity(mut self, capacity: usize) -> Self {
        self.failure_channel_capacity = capacity.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_config_defaults() {
        let config = PipelineConfig::default();

        assert_eq!(config.max_async_timeout, Duration::from_secs(60));
        assert!(config.fail_open_on_resolution_error);
        assert_eq!(config.failure_channel_capacity, 1024);
    }

    #[test]
    fn pipeline_config_builder() {
        let config = PipelineConfig::default()
            .max_async_timeout(Duration::from_millis(500))
            .fail_open_on_resolution_error(false)
            .failure_channel_capacity(0);

        assert_eq!(config.max_async_timeout, Duration::from_millis(500));
        assert!(!config.fail_open_on_resolution_error);
        assert_eq!(config.failure_channel_capacity, 1);
    }
}
