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

//! A fluid model of a star topology: several senders share one bottleneck
//! link and its drop-tail queue on the way to a single receiver.
//!
//! The model advances in fixed ticks. In each tick every flow offers
//! `window / rtt` bytes per second to the queue, the link drains it at its
//! capacity, and overflow is dropped. Each flow receives one ACK carrying an
//! RTT sample per round trip. A minimal transport reacts to drops by halving
//! its window in the recovery state; the congestion controller drives the
//! window in the open state.

use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use log::debug;
use log::trace;
use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;

use timely_cc::build_congestion_controller;
use timely_cc::CongestionController;
use timely_cc::CongestionState;
use timely_cc::ControllerHooks;
use timely_cc::RecoveryConfig;
use timely_cc::RttSampleRecorder;

use crate::Result;

/// Simulation parameters.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Number of senders.
    pub flows: usize,

    /// Capacity of every link in bits per second.
    pub bandwidth: u64,

    /// One-way propagation delay of every link.
    pub propagation_delay: Duration,

    /// Capacity of the bottleneck queue in packets.
    pub queue_size: u64,

    /// Simulated time.
    pub duration: Duration,

    /// Time step of the model.
    pub tick: Duration,

    /// Max random extra delay added to every RTT sample.
    pub jitter: Duration,

    /// Feed the bottleneck queue depth to the controllers.
    pub use_oracle: bool,

    /// Seed of the jitter generator.
    pub seed: u64,

    /// Max number of RTT samples kept for the report.
    pub max_samples: usize,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            flows: 10,
            bandwidth: 50_000_000,
            propagation_delay: Duration::from_micros(100),
            queue_size: 1000,
            duration: Duration::from_secs(9),
            tick: Duration::from_micros(100),
            jitter: Duration::ZERO,
            use_oracle: false,
            seed: 0,
            max_samples: 100_000,
        }
    }
}

/// Per flow result.
#[derive(Debug, Clone, Default)]
pub struct FlowReport {
    /// Congestion window at the end, in bytes.
    pub cwnd: u64,

    /// Delivered bytes.
    pub delivered: u64,

    /// Congestion events seen by the transport.
    pub losses: u64,

    /// RTT samples accepted by the controller.
    pub samples: u64,
}

/// Simulation result.
#[derive(Debug, Clone)]
pub struct SimReport {
    /// Simulated time.
    pub duration: Duration,

    /// Per flow results.
    pub flows: Vec<FlowReport>,

    /// Bytes dropped by the bottleneck queue.
    pub dropped: u64,

    /// RTT samples in microseconds.
    pub rtt_samples: Vec<f64>,
}

impl SimReport {
    /// Bytes delivered by all flows.
    pub fn delivered(&self) -> u64 {
        self.flows.iter().map(|f| f.delivered).sum()
    }

    /// Average goodput at the receiver in Mbit/s.
    pub fn throughput_mbps(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs == 0.0 {
            return 0.0;
        }
        self.delivered() as f64 * 8.0 / secs / 1_000_000.0
    }
}

/// A sender with a minimal transport state machine.
struct Flow {
    cc: Box<dyn CongestionController>,
    state: CongestionState,
    cwnd: u64,
    next_ack: f64,
    lost: bool,
    offered: f64,
    delivered: f64,
    losses: u64,
}

impl Flow {
    /// Bytes allowed in flight. The transport never sends less than two
    /// segments per round trip.
    fn send_window(&self, segment_size: u64) -> u64 {
        self.cwnd.max(2 * segment_size)
    }

    /// Process one ACK carrying the given RTT sample.
    fn on_ack(&mut self, rtt: Duration, segment_size: u64) {
        if self.lost {
            self.lost = false;
            self.losses += 1;
            if self.state == CongestionState::Open {
                self.state = CongestionState::Recovery;
                self.cc.on_congestion_state(self.state);
                let ssthresh = self.cc.slow_start_threshold(self.cwnd / 2, segment_size);
                self.cwnd = ssthresh;
                debug!(
                    "{} enter recovery, cwnd = {}",
                    self.cc.name(),
                    self.cwnd
                );
            }
        } else if self.state != CongestionState::Open {
            self.state = CongestionState::Open;
            self.cc.on_congestion_state(self.state);
        }

        self.cwnd = self.cc.on_ack_with_rtt(rtt, self.cwnd, segment_size);
    }
}

/// Run the simulation with the given congestion control configuration.
pub fn run(conf: &SimConfig, recovery: &RecoveryConfig) -> Result<SimReport> {
    if conf.flows == 0 || conf.tick.is_zero() || conf.bandwidth == 0 {
        return Err("flows, tick and bandwidth must be positive".into());
    }
    if conf.propagation_delay.is_zero() {
        return Err("propagation delay must be positive".into());
    }

    let segment_size = recovery.max_datagram_size as u64;
    let depth = Arc::new(AtomicU64::new(0));
    let recorder = Arc::new(RttSampleRecorder::new(conf.max_samples));

    let mut recovery = recovery.clone();
    recovery.timely.use_oracle = conf.use_oracle;

    let mut flows = Vec::with_capacity(conf.flows);
    for _ in 0..conf.flows {
        let hooks = ControllerHooks {
            oracle: Some(depth.clone()),
            observer: Some(recorder.clone()),
        };
        let mut cc = build_congestion_controller(&recovery, hooks)?;
        cc.on_congestion_state(CongestionState::Open);
        flows.push(Flow {
            cc,
            state: CongestionState::Open,
            cwnd: recovery.initial_congestion_window * segment_size,
            next_ack: 0.0,
            lost: false,
            offered: 0.0,
            delivered: 0.0,
            losses: 0,
        });
    }

    // Sender to switch and switch to receiver, in both directions.
    let base_rtt = 4.0 * conf.propagation_delay.as_secs_f64();
    let capacity = conf.bandwidth as f64 / 8.0;
    let buffer = (conf.queue_size * segment_size) as f64;
    let dt = conf.tick.as_secs_f64();
    let ticks = (conf.duration.as_secs_f64() / dt) as u64;
    let mut rng = StdRng::seed_from_u64(conf.seed);
    let mut queue = 0.0_f64;
    let mut dropped = 0.0_f64;

    for tick in 0..ticks {
        let rtt = base_rtt + queue / capacity;

        let mut arrivals = 0.0;
        for flow in flows.iter_mut() {
            flow.offered = flow.send_window(segment_size) as f64 / rtt * dt;
            arrivals += flow.offered;
        }

        let backlog = queue + arrivals;
        let departures = backlog.min(capacity * dt);
        queue = backlog - departures;

        let overflow = (queue - buffer).max(0.0);
        if overflow > 0.0 {
            queue = buffer;
            dropped += overflow;
        }

        for flow in flows.iter_mut() {
            if arrivals > 0.0 {
                let share = flow.offered / arrivals;
                flow.delivered += departures * share;
                if overflow > 0.0 {
                    flow.lost = true;
                }
            }
        }
        depth.store((queue / segment_size as f64) as u64, Ordering::Relaxed);

        for flow in flows.iter_mut() {
            flow.next_ack -= dt;
            if flow.next_ack > 0.0 {
                continue;
            }
            flow.next_ack += rtt;

            let jitter = if conf.jitter.is_zero() {
                0.0
            } else {
                rng.gen_range(0.0..conf.jitter.as_secs_f64())
            };
            let sample = Duration::from_secs_f64(rtt + jitter);
            flow.on_ack(sample, segment_size);
        }

        if tick % 10_000 == 0 {
            trace!(
                "tick {} queue = {:.0} bytes, rtt = {:.0}us",
                tick,
                queue,
                rtt * 1e6
            );
        }
    }

    let flows = flows
        .iter()
        .map(|f| FlowReport {
            cwnd: f.cwnd,
            delivered: f.delivered as u64,
            losses: f.losses,
            samples: f.cc.stats().samples_accepted,
        })
        .collect();

    Ok(SimReport {
        duration: Duration::from_secs_f64(ticks as f64 * dt),
        flows,
        dropped: dropped as u64,
        rtt_samples: recorder.samples_micros(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use timely_cc::CongestionControlAlgorithm;
    use timely_cc::TimelyConfig;

    fn short_sim() -> SimConfig {
        SimConfig {
            flows: 4,
            duration: Duration::from_millis(500),
            ..SimConfig::default()
        }
    }

    #[test]
    fn sim_invalid() {
        let conf = SimConfig {
            flows: 0,
            ..short_sim()
        };
        assert!(run(&conf, &RecoveryConfig::default()).is_err());

        let conf = SimConfig {
            tick: Duration::ZERO,
            ..short_sim()
        };
        assert!(run(&conf, &RecoveryConfig::default()).is_err());

        let conf = SimConfig {
            flows: 2,
            propagation_delay: Duration::ZERO,
            duration: Duration::from_millis(50),
            ..SimConfig::default()
        };
        let recovery = RecoveryConfig {
            congestion_control_algorithm: CongestionControlAlgorithm::Dummy,
            ..RecoveryConfig::default()
        };
        let err = run(&conf, &recovery).unwrap_err();
        assert!(err.to_string().contains("propagation delay"));
    }

    #[test]
    fn sim_dummy_saturates_link() -> Result<()> {
        let recovery = RecoveryConfig {
            congestion_control_algorithm: CongestionControlAlgorithm::Dummy,
            initial_congestion_window: 100,
            ..RecoveryConfig::default()
        };
        let report = run(&short_sim(), &recovery)?;

        assert_eq!(report.flows.len(), 4);
        assert!(report.throughput_mbps() > 45.0);
        assert!(report.throughput_mbps() <= 50.0 + 1e-6);
        assert!(!report.rtt_samples.is_empty());
        for flow in report.flows.iter() {
            assert!(flow.samples > 0);
            assert!(flow.delivered > 0);
        }
        Ok(())
    }

    #[test]
    fn sim_timely_bounds_delay() -> Result<()> {
        let recovery = RecoveryConfig {
            timely: TimelyConfig::new(0.1, 1.0, 0.5, 500, 5000, false),
            ..RecoveryConfig::default()
        };
        let report = run(&short_sim(), &recovery)?;

        assert!(report.delivered() > 0);
        let max_rtt = report.rtt_samples.iter().cloned().fold(0.0, f64::max);
        // Max queueing delay of the buffer is 240ms.
        assert!(max_rtt < 240_000.0);
        Ok(())
    }

    #[test]
    fn sim_oracle() -> Result<()> {
        let conf = SimConfig {
            use_oracle: true,
            jitter: Duration::from_micros(20),
            seed: 7,
            ..short_sim()
        };
        let recovery = RecoveryConfig {
            timely: TimelyConfig::new(0.1, 1.0, 0.5, 2, 50, false),
            ..RecoveryConfig::default()
        };
        let report = run(&conf, &recovery)?;
        assert!(report.delivered() > 0);
        assert!(report.flows.iter().all(|f| f.samples > 0));
        Ok(())
    }
}
