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

//! Signal sources and sinks shared between the host and the congestion
//! controllers.

use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Mutex;
use std::time::Duration;

/// Reader of the bottleneck queue occupancy in packets.
///
/// One oracle may be shared by all connections crossing the same queue, so
/// implementations must be safe to call concurrently and must not block. A
/// call returns a point-in-time snapshot and has no side effects.
pub trait QueueDepthOracle: Send + Sync {
    /// Current queue occupancy in packets.
    fn queue_depth(&self) -> u64;
}

impl QueueDepthOracle for AtomicU64 {
    fn queue_depth(&self) -> u64 {
        self.load(Ordering::Relaxed)
    }
}

/// Receiver of RTT samples, e.g. for percentile reporting. It never affects
/// the control decisions.
pub trait RttSampleObserver: Send + Sync {
    /// Callback for each non-zero RTT sample.
    fn on_rtt_sample(&self, rtt: Duration);
}

/// An observer which keeps RTT samples in memory.
#[derive(Debug, Default)]
pub struct RttSampleRecorder {
    /// Recorded samples.
    samples: Mutex<Vec<Duration>>,

    /// Max number of samples kept. Zero means unlimited.
    max_samples: usize,
}

impl RttSampleRecorder {
    /// Create a recorder keeping at most `max_samples` samples. Later samples
    /// are dropped once the limit is reached.
    pub fn new(max_samples: usize) -> Self {
        Self {
            samples: Mutex::new(Vec::new()),
            max_samples,
        }
    }

    /// Return a copy of the recorded samples.
    pub fn samples(&self) -> Vec<Duration> {
        match self.samples.lock() {
            Ok(samples) => samples.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Return the recorded samples in microseconds.
    pub fn samples_micros(&self) -> Vec<f64> {
        self.samples()
            .iter()
            .map(|rtt| rtt.as_micros() as f64)
            .collect()
    }

    /// Number of recorded samples.
    pub fn len(&self) -> usize {
        match self.samples.lock() {
            Ok(samples) => samples.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    /// Check if no sample was recorded.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RttSampleObserver for RttSampleRecorder {
    fn on_rtt_sample(&self, rtt: Duration) {
        let mut samples = match self.samples.lock() {
            Ok(samples) => samples,
            Err(poisoned) => poisoned.into_inner(),
        };
        if self.max_samples != 0 && samples.len() >= self.max_samples {
            return;
        }
        samples.push(rtt);
    }
}
