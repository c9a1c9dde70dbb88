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

use core::str::FromStr;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use strum_macros::EnumIter;

use crate::Error;
use crate::RecoveryConfig;
use crate::Result;
pub use dummy::Dummy;
pub use signal::QueueDepthOracle;
pub use signal::RttSampleObserver;
pub use signal::RttSampleRecorder;
pub use timely::HaiMode;
pub use timely::Timely;
pub use timely::TimelyConfig;

/// Available congestion control algorithm
#[repr(C)]
#[derive(Eq, PartialEq, Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CongestionControlAlgorithm {
    /// TIMELY is a delay-based congestion control algorithm. It uses the
    /// gradient of the round-trip time (or of the bottleneck queue depth) to
    /// adjust the sending rate, keeping the delay between a low and a high
    /// threshold.
    #[default]
    Timely,

    /// DUMMY keeps a static congestion window. It is intended to be used as a
    /// baseline for testing and experiments.
    Dummy,
}

impl FromStr for CongestionControlAlgorithm {
    type Err = Error;

    fn from_str(algor: &str) -> Result<CongestionControlAlgorithm> {
        if algor.eq_ignore_ascii_case("timely") {
            Ok(CongestionControlAlgorithm::Timely)
        } else if algor.eq_ignore_ascii_case("dummy") {
            Ok(CongestionControlAlgorithm::Dummy)
        } else {
            Err(Error::InvalidConfig("unknown".into()))
        }
    }
}

/// Congestion state of the transport connection, as reported by the
/// surrounding loss-recovery state machine.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Default, EnumIter)]
pub enum CongestionState {
    /// Normal state, no dubious events. The congestion controller drives the
    /// window growth in this state.
    #[default]
    Open,

    /// Dubious ACKs (duplicate or selective) were received.
    Disorder,

    /// The window was reduced due to a congestion notification.
    Cwr,

    /// Fast recovery after a loss.
    Recovery,

    /// Retransmission timeout fired.
    Loss,
}

/// Congestion control statistics.
#[derive(Debug, Default, Clone)]
pub struct CongestionStats {
    /// Number of RTT samples fed into the control law.
    pub samples_accepted: u64,

    /// Number of non-zero RTT samples received while the controller was
    /// disabled.
    pub samples_ignored: u64,

    /// Number of samples below the low threshold.
    pub low_threshold_events: u64,

    /// Number of samples above the high threshold.
    pub high_threshold_events: u64,

    /// Number of additive increases driven by a non-positive gradient.
    pub gradient_increases: u64,

    /// Number of multiplicative decreases driven by a positive gradient.
    pub gradient_decreases: u64,

    /// Number of increases which used the high additive increase step.
    pub hai_increases: u64,

    /// Number of times the controller has been enabled.
    pub enable_count: u64,

    /// Minimum signal observed in the current enable period, if any.
    pub min_signal: Option<u64>,
}

/// Congestion control interfaces shared by different algorithms.
pub trait CongestionController {
    /// Name of congestion control algorithm.
    fn name(&self) -> &str;

    /// Start driving the window growth. Called when the connection enters the
    /// open state.
    fn enable(&mut self);

    /// Stop driving the window growth.
    fn disable(&mut self);

    /// Check if the controller is driving the window growth.
    fn is_enabled(&self) -> bool;

    /// Callback for every congestion state change of the connection.
    fn on_congestion_state(&mut self, state: CongestionState) {
        if state == CongestionState::Open {
            self.enable();
        } else {
            self.disable();
        }
    }

    /// Callback for an acknowledgement carrying an RTT sample. Return the
    /// congestion window in bytes that the transport should install.
    fn on_ack_with_rtt(&mut self, rtt: Duration, cwnd: u64, segment_size: u64) -> u64;

    /// Slow start threshold to use after a congestion event.
    fn slow_start_threshold(&self, cwnd: u64, segment_size: u64) -> u64 {
        cwnd.max(segment_size.saturating_mul(2))
    }

    /// Congestion stats.
    fn stats(&self) -> &CongestionStats;
}

impl fmt::Debug for dyn CongestionController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "congestion controller.")
    }
}

/// Callbacks owned by the host and shared with the congestion controller.
#[derive(Clone, Default)]
pub struct ControllerHooks {
    /// Queue occupancy reader, required when the oracle signal is used.
    pub oracle: Option<Arc<dyn QueueDepthOracle>>,

    /// Receives every non-zero RTT sample.
    pub observer: Option<Arc<dyn RttSampleObserver>>,
}

impl fmt::Debug for ControllerHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "oracle={} observer={}",
            self.oracle.is_some(),
            self.observer.is_some()
        )
    }
}

/// Build a congestion controller.
pub fn build_congestion_controller(
    conf: &RecoveryConfig,
    hooks: ControllerHooks,
) -> Result<Box<dyn CongestionController>> {
    let max_datagram_size = conf.max_datagram_size as u64;

    match conf.congestion_control_algorithm {
        CongestionControlAlgorithm::Timely => Ok(Box::new(Timely::with_hooks(
            conf.timely.clone(),
            hooks,
        )?)),
        CongestionControlAlgorithm::Dummy => Ok(Box::new(Dummy::new(
            conf.initial_congestion_window
                .saturating_mul(max_datagram_size),
            hooks.observer,
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn congestion_control_name() {
        let cases = [
            ("timely", Ok(CongestionControlAlgorithm::Timely)),
            ("Timely", Ok(CongestionControlAlgorithm::Timely)),
            ("TIMELY", Ok(CongestionControlAlgorithm::Timely)),
            ("dummy", Ok(CongestionControlAlgorithm::Dummy)),
            ("Dummy", Ok(CongestionControlAlgorithm::Dummy)),
            ("DUMMY", Ok(CongestionControlAlgorithm::Dummy)),
            ("timley", Err(Error::InvalidConfig("unknown".into()))),
            ("vegas", Err(Error::InvalidConfig("unknown".into()))),
        ];

        for (name, algor) in cases {
            assert_eq!(CongestionControlAlgorithm::from_str(name), algor);
        }
    }

    #[test]
    fn congestion_state_dispatch() {
        let mut cc = build_congestion_controller(&RecoveryConfig::default(), Default::default())
            .unwrap();
        assert_eq!(cc.name(), "TIMELY");
        assert!(!cc.is_enabled());

        cc.on_congestion_state(CongestionState::Open);
        assert!(cc.is_enabled());

        for state in CongestionState::iter().filter(|s| *s != CongestionState::Open) {
            cc.on_congestion_state(CongestionState::Open);
            cc.on_congestion_state(state);
            assert!(!cc.is_enabled(), "{:?} should disable", state);
        }
        assert_eq!(cc.stats().enable_count, 5);
    }

    #[test]
    fn build_dummy() {
        let conf = RecoveryConfig {
            congestion_control_algorithm: CongestionControlAlgorithm::Dummy,
            max_datagram_size: 1000,
            initial_congestion_window: 10,
            ..RecoveryConfig::default()
        };
        let mut cc = build_congestion_controller(&conf, Default::default()).unwrap();
        assert_eq!(cc.name(), "DUMMY");
        cc.enable();
        assert_eq!(cc.on_ack_with_rtt(Duration::from_millis(10), 0, 1000), 10000);
    }

    #[test]
    fn build_with_invalid_config() {
        let mut conf = RecoveryConfig::default();
        conf.timely.use_oracle = true;
        assert!(matches!(
            build_congestion_controller(&conf, Default::default()),
            Err(Error::InvalidConfig(_))
        ));

        let mut conf = RecoveryConfig::default();
        conf.timely.low_threshold = conf.timely.high_threshold;
        assert!(build_congestion_controller(&conf, Default::default()).is_err());
    }

    #[test]
    fn slow_start_threshold() {
        let cc = Dummy::new(12000, None);
        assert_eq!(cc.slow_start_threshold(12000, 1200), 12000);
        assert_eq!(cc.slow_start_threshold(1200, 1200), 2400);
        assert_eq!(cc.slow_start_threshold(0, 1200), 2400);
    }
}

mod dummy;
mod signal;
mod timely;
