//! # Messaging configuration.
//!
//! Provides [`Config`], the settings shared by publishers and consumer processes. It travels
//! inside a [`TransportContext`](crate::TransportContext); there is no global configuration.
//!
//! ## Sentinel values
//! - `flow_high_water = 0` → flow control disabled (publishers never pause)
//! - `consumer_required_interval = 0s` → consumers are asked for once, never re-announced
//! - `description_timeout = 0s` → consumers wait for an evaluation description forever

use std::time::Duration;

use crate::policies::RetryPolicy;

/// Configuration for negotiation, completion tracking, retries and flow control.
///
/// ## Field semantics
/// - `negotiation_timeout`: how long negotiation may go without a new offer
/// - `negotiation_window`: extra time to collect offers once every format is covered
/// - `consumer_required_interval`: period of the publisher's "consumer required" announcement
/// - `consumption_timeout`: how long a negotiated consumer may go without progress
/// - `description_timeout`: how long a consumer process waits for an evaluation's description
/// - `retry`: retry budget for recoverable consumption failures
/// - `flow_high_water` / `flow_low_water`: outstanding-message marks (`0` high = disabled)
/// - `channel_capacity`: buffer size per channel of the in-process broker
///
/// ## Notes
/// All fields are public. Prefer the helper accessors over repeating sentinel checks.
#[derive(Clone, Debug)]
pub struct Config {
    /// Negotiation fails when no offer arrives for this long and a format is still uncovered.
    pub negotiation_timeout: Duration,

    /// Once every format is covered, offers are still collected for this long so that a
    /// consumer covering more formats can win the assignment.
    pub negotiation_window: Duration,

    /// Period of the `CONSUMER_REQUIRED` announcement while negotiation is open.
    ///
    /// - `Duration::ZERO` = announce once
    pub consumer_required_interval: Duration,

    /// A negotiated consumer that reports no progress for this long fails the evaluation.
    pub consumption_timeout: Duration,

    /// A consumer process drops an evaluation whose description has not arrived this long
    /// after the evaluation was first seen.
    ///
    /// - `Duration::ZERO` = wait forever
    pub description_timeout: Duration,

    /// Retry budget for recoverable consumer errors.
    pub retry: RetryPolicy,

    /// Outstanding statistics above which publication pauses.
    ///
    /// - `0` = flow control disabled
    pub flow_high_water: usize,

    /// Outstanding statistics below which paused publication resumes.
    ///
    /// Clamped into `1..=flow_high_water` when flow control is enabled.
    pub flow_low_water: usize,

    /// Capacity of each in-process broker channel (min 1).
    pub channel_capacity: usize,
}

impl Config {
    /// Returns `(high, low)` water marks, or `None` when flow control is disabled.
    #[inline]
    pub fn flow_limits(&self) -> Option<(u64, u64)> {
        if self.flow_high_water == 0 {
            return None;
        }
        let high = self.flow_high_water as u64;
        let low = (self.flow_low_water as u64).clamp(1, high);
        Some((high, low))
    }

    /// Returns the announcement period as an `Option`.
    ///
    /// - `None` → announce once
    #[inline]
    pub fn announce_interval(&self) -> Option<Duration> {
        if self.consumer_required_interval == Duration::ZERO {
            None
        } else {
            Some(self.consumer_required_interval)
        }
    }

    /// Returns the description timeout as an `Option`.
    ///
    /// - `None` → wait forever
    #[inline]
    pub fn description_wait(&self) -> Option<Duration> {
        if self.description_timeout == Duration::ZERO {
            None
        } else {
            Some(self.description_timeout)
        }
    }

    /// Returns a channel capacity clamped to a minimum of 1.
    #[inline]
    pub fn channel_capacity_clamped(&self) -> usize {
        self.channel_capacity.max(1)
    }
}

impl Default for Config {
    /// Default configuration:
    ///
    /// - `negotiation_timeout = 5min`
    /// - `negotiation_window = 100ms`
    /// - `consumer_required_interval = 5s`
    /// - `consumption_timeout = 60min`
    /// - `description_timeout = 10min`
    /// - `retry = RetryPolicy::default()` (2 retries, constant 100ms)
    /// - `flow_high_water = 0` (disabled), `flow_low_water = 0`
    /// - `channel_capacity = 1024`
    fn default() -> Self {
        Self {
            negotiation_timeout: Duration::from_secs(5 * 60),
            negotiation_window: Duration::from_millis(100),
            consumer_required_interval: Duration::from_secs(5),
            consumption_timeout: Duration::from_secs(60 * 60),
            description_timeout: Duration::from_secs(10 * 60),
            retry: RetryPolicy::default(),
            flow_high_water: 0,
            flow_low_water: 0,
            channel_capacity: 1024,
        }
    }
}
