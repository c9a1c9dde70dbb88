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

use std::time::Duration;
use std::time::Instant;

use clap::Parser;
use log::info;

use timely_cc::CongestionControlAlgorithm;
use timely_tools::load_recovery_config;
use timely_tools::parse_bandwidth;
use timely_tools::parse_duration;
use timely_tools::sim;
use timely_tools::sim::SimConfig;
use timely_tools::Result;
use timely_tools::RttSummary;

#[derive(Parser, Debug, Clone)]
#[clap(name = "sim")]
pub struct SimOpt {
    /// Congestion control algorithm, support TIMELY/DUMMY. Overrides the
    /// configuration file, which defaults to TIMELY.
    #[clap(long, value_name = "STR")]
    pub cc: Option<CongestionControlAlgorithm>,

    /// Congestion control configuration in JSON.
    #[clap(long, value_name = "FILE")]
    pub config: Option<String>,

    /// Number of senders sharing the bottleneck.
    #[clap(long, default_value = "10", value_name = "NUM")]
    pub flows: usize,

    /// Bandwidth of links, with units.
    #[clap(long, default_value = "50Mbps", value_parser = parse_bandwidth, value_name = "STR")]
    pub bw: u64,

    /// Propagation delay of links, with units.
    #[clap(long, default_value = "100us", value_parser = parse_duration, value_name = "TIME")]
    pub pd: Duration,

    /// Size of the bottleneck queue in packets.
    #[clap(long, default_value = "1000", value_name = "NUM")]
    pub queue_size: u64,

    /// Simulated time.
    #[clap(short, long, default_value = "9s", value_parser = parse_duration, value_name = "TIME")]
    pub duration: Duration,

    /// Time step of the model.
    #[clap(long, default_value = "100us", value_parser = parse_duration, value_name = "TIME")]
    pub tick: Duration,

    /// Max random extra delay of every RTT sample.
    #[clap(long, default_value = "0us", value_parser = parse_duration, value_name = "TIME")]
    pub jitter: Duration,

    /// Seed of the jitter generator.
    #[clap(long, default_value = "0", value_name = "NUM")]
    pub seed: u64,

    /// Use the bottleneck queue depth as the congestion signal.
    #[clap(long)]
    pub oracle: bool,

    /// Segment size in bytes. Overrides the configuration file, which
    /// defaults to 1500.
    #[clap(long, value_name = "NUM")]
    pub segment_size: Option<usize>,

    /// Number of max samples used for RTT statistics.
    #[clap(long, default_value = "100000", value_name = "NUM")]
    pub max_sample: usize,

    /// Log level, support OFF/ERROR/WARN/INFO/DEBUG/TRACE.
    #[clap(long, default_value = "INFO", value_name = "STR")]
    pub log_level: log::LevelFilter,

    /// Log file path. If no file is specified, logs will be written to `stderr`.
    #[clap(long, value_name = "FILE")]
    pub log_file: Option<String>,
}

fn main() -> Result<()> {
    let option = SimOpt::parse();

    env_logger::builder()
        .target(timely_tools::log_target(&option.log_file)?)
        .filter_level(option.log_level)
        .format_timestamp_millis()
        .init();

    let recovery = load_recovery_config(&option.config, option.cc, option.segment_size)?;
    let conf = SimConfig {
        flows: option.flows,
        bandwidth: option.bw,
        propagation_delay: option.pd,
        queue_size: option.queue_size,
        duration: option.duration,
        tick: option.tick,
        jitter: option.jitter,
        use_oracle: option.oracle,
        seed: option.seed,
        max_samples: option.max_sample,
    };
    info!("simulate {:?} with {:?}", conf, recovery.congestion_control_algorithm);

    let start = Instant::now();
    let report = sim::run(&conf, &recovery)?;

    println!();
    println!(
        "simulated {:?} in {:?}, {} flows",
        report.duration,
        start.elapsed(),
        report.flows.len()
    );
    println!("Average throughput: {:.2} Mbit/s", report.throughput_mbps());
    println!(
        "delivered bytes: {}, dropped bytes: {}",
        report.delivered(),
        report.dropped
    );
    for (i, flow) in report.flows.iter().enumerate() {
        println!(
            "\tflow {}: cwnd {}, delivered {}, losses {}, samples {}",
            i, flow.cwnd, flow.delivered, flow.losses, flow.samples
        );
    }
    if let Some(summary) = RttSummary::new(report.rtt_samples) {
        summary.print();
    }
    println!();

    Ok(())
}
