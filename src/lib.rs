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

//! A pluggable, delay-based congestion controller for transport stacks.
//!
//! The crate implements TIMELY, a gradient-based rate controller. The host
//! transport feeds it RTT samples (or bottleneck queue occupancy readings)
//! and the congestion state of the connection, and installs the congestion
//! window it returns.
//!
//! ## Features
//!
//! * **Gradient control law**: EWMA smoothed delay gradient, low and high
//!   delay thresholds, additive increase and multiplicative decrease.
//! * **High Additive Increase**: faster growth after consecutive favorable
//!   samples, either as a one-shot burst or as a sustained mode.
//! * **Oracle mode**: direct queue depth signal through a shared
//!   [`QueueDepthOracle`].
//! * **Observability**: RTT samples are exported through an
//!   [`RttSampleObserver`], and decisions are logged through the `log` crate.
//!
//! ## Get started
//!
//! ```
//! use std::time::Duration;
//! use timely_cc::CongestionController;
//! use timely_cc::CongestionState;
//! use timely_cc::Timely;
//! use timely_cc::TimelyConfig;
//!
//! let config = TimelyConfig::new(0.1, 4.0, 0.05, 250, 4000, false);
//! let mut cc = Timely::new(config).unwrap();
//! cc.on_congestion_state(CongestionState::Open);
//!
//! let mut cwnd = 0;
//! for rtt in [300, 295, 290] {
//!     cwnd = cc.on_ack_with_rtt(Duration::from_micros(rtt), cwnd, 1);
//! }
//! assert_eq!(cwnd, 12);
//! ```

use std::time::Duration;

use serde::Deserialize;

/// Default segment size in bytes.
pub const DEFAULT_SEGMENT_SIZE: usize = 1500;

/// Default window of the fixed window controller, in segments.
const DEFAULT_INITIAL_WINDOW: u64 = 10;

/// Upper limit of the segment size.
const MAX_SEGMENT_SIZE: usize = 65535;

/// Minimum segment size.
const MIN_SEGMENT_SIZE: usize = 536;

/// Result type for congestion controller operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Configurations about congestion control.
#[derive(Debug, Clone, Default)]
pub struct Config {
    /// Recovery and congestion control configurations.
    recovery: RecoveryConfig,
}

impl Config {
    /// Create default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a JSON document. Missing fields use the
    /// default values and unknown fields are rejected.
    ///
    /// ```
    /// let conf = timely_cc::Config::from_json(
    ///     r#"{"congestion_control_algorithm": "timely", "timely": {"add_step": 4}}"#,
    /// ).unwrap();
    /// assert_eq!(conf.recovery().timely.add_step, 4.0);
    /// ```
    pub fn from_json(json: &str) -> Result<Self> {
        let recovery: RecoveryConfig = serde_json::from_str(json)?;
        let conf = Self { recovery };
        conf.validate()?;
        Ok(conf)
    }

    /// Check the configuration.
    pub fn validate(&self) -> Result<()> {
        if !(MIN_SEGMENT_SIZE..=MAX_SEGMENT_SIZE).contains(&self.recovery.max_datagram_size) {
            return Err(Error::InvalidConfig(format!(
                "segment size {} out of range",
                self.recovery.max_datagram_size
            )));
        }
        if self.recovery.congestion_control_algorithm == CongestionControlAlgorithm::Timely {
            self.recovery.timely.validate()?;
        }
        Ok(())
    }

    /// Set congestion control algorithm that the connection would use.
    /// The default value is Timely.
    pub fn set_congestion_control_algorithm(&mut self, cca: CongestionControlAlgorithm) {
        self.recovery.congestion_control_algorithm = cca;
    }

    /// Set the segment size in bytes.
    /// The value is clamped to [536, 65535]. The default value is 1500.
    pub fn set_max_datagram_size(&mut self, v: usize) {
        self.recovery.max_datagram_size = v.clamp(MIN_SEGMENT_SIZE, MAX_SEGMENT_SIZE);
    }

    /// Set the window of the fixed window controller in segments.
    /// The default value is 10.
    pub fn set_initial_congestion_window(&mut self, packets: u64) {
        self.recovery.initial_congestion_window = packets;
    }

    /// Set the parameters of the Timely congestion controller.
    pub fn set_timely_config(&mut self, conf: TimelyConfig) {
        self.recovery.timely = conf;
    }

    /// Set the smoothing weight of the RTT gradient filter.
    /// The default value is 0.1.
    pub fn set_timely_ewma_weight(&mut self, v: f64) {
        self.recovery.timely.ewma_weight = v;
    }

    /// Set the delay thresholds in microseconds.
    /// The default values are 50000 and 500000.
    pub fn set_timely_thresholds(&mut self, low: Duration, high: Duration) {
        self.recovery.timely.low_threshold = low.as_micros() as u64;
        self.recovery.timely.high_threshold = high.as_micros() as u64;
    }

    /// Enable reading the bottleneck queue depth instead of the RTT.
    /// The default value is false.
    pub fn enable_timely_oracle(&mut self, v: bool) {
        self.recovery.timely.use_oracle = v;
    }

    /// Recovery configurations.
    pub fn recovery(&self) -> &RecoveryConfig {
        &self.recovery
    }
}

/// Configurations about loss recovery and congestion control.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RecoveryConfig {
    /// The segment size in bytes.
    pub max_datagram_size: usize,

    /// The congestion control algorithm used for a connection.
    pub congestion_control_algorithm: CongestionControlAlgorithm,

    /// The window of the fixed window controller in segments.
    pub initial_congestion_window: u64,

    /// Timely parameters.
    pub timely: TimelyConfig,
}

impl Default for RecoveryConfig {
    fn default() -> RecoveryConfig {
        RecoveryConfig {
            max_datagram_size: DEFAULT_SEGMENT_SIZE,
            congestion_control_algorithm: CongestionControlAlgorithm::Timely,
            initial_congestion_window: DEFAULT_INITIAL_WINDOW,
            timely: TimelyConfig::default(),
        }
    }
}

pub use crate::congestion_control::build_congestion_controller;
pub use crate::congestion_control::CongestionControlAlgorithm;
pub use crate::congestion_control::CongestionController;
pub use crate::congestion_control::CongestionState;
pub use crate::congestion_control::CongestionStats;
pub use crate::congestion_control::ControllerHooks;
pub use crate::congestion_control::Dummy;
pub use crate::congestion_control::HaiMode;
pub use crate::congestion_control::QueueDepthOracle;
pub use crate::congestion_control::RttSampleObserver;
pub use crate::congestion_control::RttSampleRecorder;
pub use crate::congestion_control::Timely;
pub use crate::congestion_control::TimelyConfig;
pub use crate::error::Error;

#[cfg(test)]
mod tests {
    use super::*;

    #[ctor::ctor]
    fn init() {
        env_logger::builder()
            .filter_level(log::LevelFilter::Trace)
            .format_timestamp_millis()
            .is_test(true)
            .init();
    }

    #[test]
    fn max_datagram_size() {
        let mut config = Config::new();
        assert_eq!(config.recovery.max_datagram_size, DEFAULT_SEGMENT_SIZE);

        config.set_max_datagram_size(0);
        assert_eq!(config.recovery.max_datagram_size, MIN_SEGMENT_SIZE);

        config.set_max_datagram_size(9000);
        assert_eq!(config.recovery.max_datagram_size, 9000);

        config.set_max_datagram_size(usize::MAX);
        assert_eq!(config.recovery.max_datagram_size, MAX_SEGMENT_SIZE);
    }

    #[test]
    fn timely_setters() -> Result<()> {
        let mut config = Config::new();
        config.set_timely_ewma_weight(0.2);
        config.set_timely_thresholds(Duration::from_micros(250), Duration::from_millis(4));
        assert_eq!(config.recovery.timely.ewma_weight, 0.2);
        assert_eq!(config.recovery.timely.low_threshold, 250);
        assert_eq!(config.recovery.timely.high_threshold, 4000);
        config.validate()?;

        config.set_timely_thresholds(Duration::from_millis(4), Duration::from_millis(4));
        assert!(config.validate().is_err());

        // Timely parameters are not checked for other algorithms.
        config.set_congestion_control_algorithm(CongestionControlAlgorithm::Dummy);
        config.validate()?;

        config.set_timely_config(TimelyConfig::default());
        config.enable_timely_oracle(true);
        assert!(config.recovery().timely.use_oracle);
        config.set_initial_congestion_window(20);
        assert_eq!(config.recovery().initial_congestion_window, 20);

        Ok(())
    }

    #[test]
    fn config_from_json() -> Result<()> {
        let config = Config::from_json("{}")?;
        assert_eq!(
            config.recovery().congestion_control_algorithm,
            CongestionControlAlgorithm::Timely
        );
        assert_eq!(config.recovery().timely, TimelyConfig::default());

        let config = Config::from_json(
            r#"{
                "max_datagram_size": 1200,
                "congestion_control_algorithm": "dummy",
                "initial_congestion_window": 32,
                "timely": {"low_threshold": 250, "high_threshold": 4000, "hai_mode": "sustained"}
            }"#,
        )?;
        assert_eq!(config.recovery().max_datagram_size, 1200);
        assert_eq!(
            config.recovery().congestion_control_algorithm,
            CongestionControlAlgorithm::Dummy
        );
        assert_eq!(config.recovery().initial_congestion_window, 32);
        assert_eq!(config.recovery().timely.high_threshold, 4000);
        assert_eq!(config.recovery().timely.hai_mode, HaiMode::Sustained);

        assert!(matches!(
            Config::from_json(r#"{"congestion_control_algorithm": "cubic"}"#),
            Err(Error::ParseError(_))
        ));
        assert!(matches!(
            Config::from_json(r#"{"timely": {"beta": 2.0}}"#),
            Err(Error::InvalidConfig(_))
        ));
        assert!(matches!(
            Config::from_json(r#"{"max_datagram_size": 10}"#),
            Err(Error::InvalidConfig(_))
        ));

        // Misspelled keys are rejected rather than replaced by defaults.
        assert!(matches!(
            Config::from_json(r#"{"timely": {"ewma": 0.2}}"#),
            Err(Error::ParseError(_))
        ));
        assert!(matches!(
            Config::from_json(r#"{"segment_size": 1200}"#),
            Err(Error::ParseError(_))
        ));

        Ok(())
    }
}

#[path = "congestion_control/congestion_control.rs"]
mod congestion_control;

pub mod error;
