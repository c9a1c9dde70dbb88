// Copyright (c) 2024 The TQUIC Authors.
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

use std::sync::Arc;
use std::time::Duration;

use super::CongestionController;
use super::CongestionStats;
use super::RttSampleObserver;

/// Dummy is a simple congestion controller with a static congestion window.
/// It is intended to be used as a baseline in tests and experiments.
pub struct Dummy {
    /// Congestion window in bytes.
    cwnd: u64,

    /// Whether the controller drives the window.
    enabled: bool,

    /// RTT sample receiver.
    observer: Option<Arc<dyn RttSampleObserver>>,

    /// Congestion statistics.
    stats: CongestionStats,
}

impl Dummy {
    pub fn new(cwnd: u64, observer: Option<Arc<dyn RttSampleObserver>>) -> Self {
        Self {
            cwnd,
            enabled: false,
            observer,
            stats: Default::default(),
        }
    }
}

impl CongestionController for Dummy {
    fn name(&self) -> &str {
        "DUMMY"
    }

    fn enable(&mut self) {
        self.enabled = true;
        self.stats.enable_count = self.stats.enable_count.saturating_add(1);
        self.stats.min_signal = None;
    }

    fn disable(&mut self) {
        self.enabled = false;
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn on_ack_with_rtt(&mut self, rtt: Duration, cwnd: u64, _segment_size: u64) -> u64 {
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

        let rtt = rtt.as_micros() as u64;
        self.stats.samples_accepted = self.stats.samples_accepted.saturating_add(1);
        self.stats.min_signal = Some(self.stats.min_signal.map_or(rtt, |m| m.min(rtt)));
        self.cwnd
    }

    fn stats(&self) -> &CongestionStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::congestion_control::RttSampleRecorder;

    #[test]
    fn dummy_init() {
        let d = Dummy::new(1200 * 10, None);
        assert_eq!(d.name(), "DUMMY");
        assert!(!d.is_enabled());
        assert_eq!(d.stats().samples_accepted, 0);
        assert_eq!(d.slow_start_threshold(1200 * 10, 1200), 1200 * 10);
    }

    #[test]
    fn dummy_stats() {
        let recorder = Arc::new(RttSampleRecorder::default());
        let mut d = Dummy::new(1200 * 10, Some(recorder.clone()));
        let rtt = Duration::from_millis(100);

        // Disabled, the transport keeps its own window.
        assert_eq!(d.on_ack_with_rtt(rtt, 2400, 1200), 2400);
        assert_eq!(d.stats().samples_ignored, 1);

        d.enable();
        assert_eq!(d.on_ack_with_rtt(rtt, 2400, 1200), 12000);
        assert_eq!(d.on_ack_with_rtt(rtt / 2, 2400, 1200), 12000);
        assert_eq!(d.on_ack_with_rtt(Duration::ZERO, 2400, 1200), 2400);
        assert_eq!(d.stats().samples_accepted, 2);
        assert_eq!(d.stats().min_signal, Some(50_000));
        assert_eq!(recorder.len(), 3);

        d.disable();
        d.enable();
        assert_eq!(d.stats().min_signal, None);
        assert_eq!(d.stats().enable_count, 2);
    }
}
