// Copyright (c) 2023 The TQUIC Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! TIMELY: RTT-based Congestion Control for the Datacenter.
//!
//! TIMELY uses the rate of change of the round-trip time, rather than its
//! absolute value, as the congestion signal. A smoothed RTT gradient which is
//! flat or negative means queues are draining and the rate is increased
//! additively; a positive gradient means queues are building and the rate is
//! decreased in proportion to the gradient. Two thresholds bound the delay:
//! below the low threshold the rate always increases, above the high
//! threshold it is always decreased, independent of the gradient.
//!
//! After several consecutive favorable samples, the additive step is
//! multiplied (High Additive Increase, HAI) to reclaim bandwidth faster.
//!
//! See <https://dl.acm.org/doi/10.1145/2785956.2787510>.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use log::*;
use serde::Deserialize;

use super::CongestionController;
use super::CongestionStats;
use super::ControllerHooks;
use super::QueueDepthOracle;
use super::RttSampleObserver;
use crate::Error;
use crate::Result;

/// Weight of the newest RTT difference in the gradient filter.
const TIMELY_EWMA_WEIGHT: f64 = 0.1;

/// Multiplicative decrease factor.
const TIMELY_BETA: f64 = 0.5;

/// Additive increase step in segments.
const TIMELY_ADD_STEP: f64 = 1.0;

/// Low delay threshold in microseconds.
const TIMELY_LOW_THRESHOLD: u64 = 50_000;

/// High delay threshold in microseconds.
const TIMELY_HIGH_THRESHOLD: u64 = 500_000;

/// Consecutive favorable samples required to use the HAI step.
const HAI_TRIGGER_COUNT: u32 = 5;

/// Multiplier of the additive step in HAI.
const HAI_MULTIPLIER: u32 = 5;

/// Lower bound of the rate after a decrease, in segments.
const TIMELY_MIN_RATE: f64 = 1.0;

/// How the favorable sample counter behaves once the HAI trigger is reached.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HaiMode {
    /// Apply the HAI step once and start counting again.
    #[default]
    Burst,

    /// Keep applying the HAI step until a sample is unfavorable or crosses a
    /// threshold.
    Sustained,
}

/// Timely configurable parameters.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TimelyConfig {
    /// Smoothing weight of the RTT gradient filter, in (0, 1].
    pub ewma_weight: f64,

    /// Additive increase step in segments.
    pub add_step: f64,

    /// Multiplicative decrease aggressiveness, in (0, 1).
    pub beta: f64,

    /// Below this signal value the rate is always increased. Microseconds for
    /// the RTT signal, packets for the queue depth signal.
    pub low_threshold: u64,

    /// Above this signal value the rate is always decreased.
    pub high_threshold: u64,

    /// Use the queue depth oracle instead of the RTT as the signal.
    pub use_oracle: bool,

    /// Consecutive favorable samples required to use the HAI step.
    pub hai_trigger_count: u32,

    /// Multiplier of the additive step in HAI.
    pub hai_multiplier: u32,

    /// Counter behavior once HAI is reached.
    pub hai_mode: HaiMode,

    /// Lower bound of the rate after a decrease, in segments. A decrease
    /// never raises a rate which is already below it.
    pub min_rate: f64,
}

impl TimelyConfig {
    pub fn new(
        ewma_weight: f64,
        add_step: f64,
        beta: f64,
        low_threshold: u64,
        high_threshold: u64,
        use_oracle: bool,
    ) -> Self {
        Self {
            ewma_weight,
            add_step,
            beta,
            low_threshold,
            high_threshold,
            use_oracle,
            ..Self::default()
        }
    }

    /// Check the parameters.
    pub fn validate(&self) -> Result<()> {
        if !(self.ewma_weight > 0.0 && self.ewma_weight <= 1.0) {
            return Err(Error::InvalidConfig(format!(
                "ewma_weight {} not in (0, 1]",
                self.ewma_weight
            )));
        }
        if !(self.add_step > 0.0 && self.add_step.is_finite()) {
            return Err(Error::InvalidConfig(format!(
                "add_step {} not positive",
                self.add_step
            )));
        }
        if !(self.beta > 0.0 && self.beta < 1.0) {
            return Err(Error::InvalidConfig(format!(
                "beta {} not in (0, 1)",
                self.beta
            )));
        }
        if self.low_threshold == 0 || self.low_threshold >= self.high_threshold {
            return Err(Error::InvalidConfig(format!(
                "thresholds {}/{} not ordered",
                self.low_threshold, self.high_threshold
            )));
        }
        if self.hai_trigger_count == 0 || self.hai_multiplier == 0 {
            return Err(Error::InvalidConfig("hai parameters are zero".into()));
        }
        if !(self.min_rate >= 0.0 && self.min_rate.is_finite()) {
            return Err(Error::InvalidConfig(format!(
                "min_rate {} is negative",
                self.min_rate
            )));
        }

        Ok(())
    }
}

impl Default for TimelyConfig {
    fn default() -> Self {
        Self {
            ewma_weight: TIMELY_EWMA_WEIGHT,
            add_step: TIMELY_ADD_STEP,
            beta: TIMELY_BETA,
            low_threshold: TIMELY_LOW_THRESHOLD,
            high_threshold: TIMELY_HIGH_THRESHOLD,
            use_oracle: false,
            hai_trigger_count: HAI_TRIGGER_COUNT,
            hai_multiplier: HAI_MULTIPLIER,
            hai_mode: HaiMode::Burst,
            min_rate: TIMELY_MIN_RATE,
        }
    }
}

/// TIMELY congestion controller.
///
/// The controller only drives the window while the connection is in the
/// open state, see [`CongestionController::on_congestion_state`].
pub struct Timely {
    /// Config
    config: TimelyConfig,

    /// Statistics.
    stats: CongestionStats,

    /// Whether the controller drives the window growth.
    enabled: bool,

    /// Sending rate in segments. The window is `rate * segment_size`.
    rate: f64,

    /// Minimum signal in the current enable period.
    min_signal: f64,

    /// Previous signal. None before the first sample of an enable period.
    prev_signal: Option<f64>,

    /// EWMA of the signal differences.
    smoothed_gradient: f64,

    /// Consecutive samples with a non-positive gradient.
    favorable_count: u32,

    /// Samples fed into the control law in the current enable period.
    sample_count: u64,

    /// Queue depth reader for the oracle signal.
    oracle: Option<Arc<dyn QueueDepthOracle>>,

    /// RTT sample receiver.
    observer: Option<Arc<dyn RttSampleObserver>>,
}

impl Timely {
    pub fn new(config: TimelyConfig) -> Result<Self> {
        Self::with_hooks(config, ControllerHooks::default())
    }

    /// Create a controller with the given oracle and observer.
    pub fn with_hooks(config: TimelyConfig, hooks: ControllerHooks) -> Result<Self> {
        config.validate()?;
        if config.use_oracle && hooks.oracle.is_none() {
            return Err(Error::InvalidConfig(
                "queue depth oracle is required".into(),
            ));
        }

        Ok(Self {
            config,
            stats: Default::default(),
            enabled: false,
            rate: 0.0,
            min_signal: f64::INFINITY,
            prev_signal: None,
            smoothed_gradient: 0.0,
            favorable_count: 0,
            sample_count: 0,
            oracle: hooks.oracle,
            observer: hooks.observer,
        })
    }

    /// Current sending rate in segments.
    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Configuration of the controller.
    pub fn config(&self) -> &TimelyConfig {
        &self.config
    }

    /// Read the congestion signal for the given RTT sample.
    fn read_signal(&self, rtt: Duration) -> f64 {
        match &self.oracle {
            Some(oracle) if self.config.use_oracle => oracle.queue_depth() as f64,
            _ => rtt.as_micros() as f64,
        }
    }

    /// Count a favorable sample and return the multiplier of the additive
    /// step.
    fn increase_multiplier(&mut self) -> u32 {
        let trigger = self.config.hai_trigger_count;
        self.favorable_count = self.favorable_count.saturating_add(1).min(trigger);
        if self.favorable_count < trigger {
            return 1;
        }

        if self.config.hai_mode == HaiMode::Burst {
            self.favorable_count = 0;
        }
        self.stats.hai_increases = self.stats.hai_increases.saturating_add(1);

        debug!(
            "{}. HAI increase, multiplier = {}, mode = {:?}",
            self.name(),
            self.config.hai_multiplier,
            self.config.hai_mode
        );
        self.config.hai_multiplier
    }

    /// Multiply the rate by `factor`, bounded by the minimal rate.
    fn decrease_rate(&mut self, factor: f64) {
        let floor = self.config.min_rate.min(self.rate);
        self.rate = (self.rate * factor).max(floor);
    }

    fn window(&self, segment_size: u64) -> u64 {
        (self.rate * segment_size as f64) as u64
    }
}

impl fmt::Debug for Timely {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timely")
            .field("config", &self.config)
            .field("enabled", &self.enabled)
            .field("rate", &self.rate)
            .field("min_signal", &self.min_signal)
            .field("prev_signal", &self.prev_signal)
            .field("smoothed_gradient", &self.smoothed_gradient)
            .field("favorable_count", &self.favorable_count)
            .field("sample_count", &self.sample_count)
            .finish()
    }
}

impl CongestionController for Timely {
    fn name(&self) -> &str {
        "TIMELY"
    }

    fn enable(&mut self) {
        self.enabled = true;
        self.rate = 0.0;
        self.min_signal = f64::INFINITY;
        self.prev_signal = None;
        self.smoothed_gradient = 0.0;
        self.favorable_count = 0;
        self.sample_count = 0;

        self.stats.enable_count = self.stats.enable_count.saturating_add(1);
        self.stats.min_signal = None;

        debug!("{}. enabled, count = {}", self.name(), self.stats.enable_count);
    }

    fn disable(&mut self) {
        if self.enabled {
            debug!(
                "{}. disabled after {} samples, rate = {}",
                self.name(),
                self.sample_count,
                self.rate
            );
        }
        self.enabled = false;
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn on_ack_with_rtt(&mut self, rtt: Duration, cwnd: u64, segment_size: u64) -> u64 {
        // Duplicate or immediate ACKs carry no delay information.
        if rtt.is_zero() {
            return cwnd;
        }

        if let Some(observer) = &self.observer {
            observer.on_rtt_sample(rtt);
        }

        if !self.enabled {
            self.stats.samples_ignored = self.stats.samples_ignored.saturating_add(1);
            return cwnd;
        }

        let signal = self.read_signal(rtt);
        self.sample_count = self.sample_count.saturating_add(1);
        self.stats.samples_accepted = self.stats.samples_accepted.saturating_add(1);

        self.min_signal = self.min_signal.min(signal);
        self.stats.min_signal = Some(self.min_signal as u64);

        // The first sample of an enable period has no predecessor.
        let delta = signal - self.prev_signal.unwrap_or(signal);
        self.prev_signal = Some(signal);

        let w = self.config.ewma_weight;
        self.smoothed_gradient = (1.0 - w) * self.smoothed_gradient + w * delta;
        let normalized_gradient = self.smoothed_gradient / self.min_signal.max(1.0);

        trace!(
            "{}. ON_ACK. rtt = {}us, signal = {}, min_signal = {}, delta = {}, gradient = {}",
            self.name(),
            rtt.as_micros(),
            signal,
            self.min_signal,
            delta,
            normalized_gradient,
        );

        let low = self.config.low_threshold as f64;
        let high = self.config.high_threshold as f64;

        if signal < low {
            self.favorable_count = 0;
            self.rate += self.config.add_step;
            self.stats.low_threshold_events = self.stats.low_threshold_events.saturating_add(1);

            trace!(
                "{}. signal {} below {}, rate = {}",
                self.name(),
                signal,
                low,
                self.rate
            );
            return self.window(segment_size);
        }

        if signal > high {
            self.favorable_count = 0;
            self.decrease_rate(1.0 - self.config.beta * (1.0 - high / signal));
            self.stats.high_threshold_events =
                self.stats.high_threshold_events.saturating_add(1);

            trace!(
                "{}. signal {} above {}, rate = {}",
                self.name(),
                signal,
                high,
                self.rate
            );
            return self.window(segment_size);
        }

        if normalized_gradient <= 0.0 {
            let n = self.increase_multiplier();
            self.rate += n as f64 * self.config.add_step;
            self.stats.gradient_increases = self.stats.gradient_increases.saturating_add(1);
        } else {
            self.decrease_rate(1.0 - self.config.beta * normalized_gradient);
            self.favorable_count = 0;
            self.stats.gradient_decreases = self.stats.gradient_decreases.saturating_add(1);
        }

        trace!(
            "{}. rate = {}, favorable = {}, cwnd = {}",
            self.name(),
            self.rate,
            self.favorable_count,
            self.window(segment_size)
        );
        self.window(segment_size)
    }

    fn stats(&self) -> &CongestionStats {
        &self.stats
    }
}
