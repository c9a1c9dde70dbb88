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

use std::sync::Arc;

use clap::Parser;
use log::info;

use timely_cc::build_congestion_controller;
use timely_cc::CongestionControlAlgorithm;
use timely_cc::CongestionState;
use timely_cc::ControllerHooks;
use timely_cc::RttSampleRecorder;
use timely_tools::load_recovery_config;
use timely_tools::load_rtt_trace;
use timely_tools::Result;
use timely_tools::RttSummary;

#[derive(Parser, Debug, Clone)]
#[clap(name = "replay")]
pub struct ReplayOpt {
    /// RTT trace file, one sample in microseconds per line.
    #[clap(value_name = "FILE")]
    pub trace: String,

    /// Congestion control algorithm, support TIMELY/DUMMY. Overrides the
    /// configuration file, which defaults to TIMELY.
    #[clap(long, value_name = "STR")]
    pub cc: Option<CongestionControlAlgorithm>,

    /// Congestion control configuration in JSON.
    #[clap(long, value_name = "FILE")]
    pub config: Option<String>,

    /// Segment size in bytes. Overrides the configuration file, which
    /// defaults to 1500.
    #[clap(long, value_name = "NUM")]
    pub segment_size: Option<usize>,

    /// Initial congestion window in bytes.
    #[clap(long, default_value = "0", value_name = "NUM")]
    pub initial_cwnd: u64,

    /// Print the congestion window after every sample.
    #[clap(short, long)]
    pub print_window: bool,

    /// Log level, support OFF/ERROR/WARN/INFO/DEBUG/TRACE.
    #[clap(long, default_value = "INFO", value_name = "STR")]
    pub log_level: log::LevelFilter,

    /// Log file path. If no file is specified, logs will be written to `stderr`.
    #[clap(long, value_name = "FILE")]
    pub log_file: Option<String>,
}

fn main() -> Result<()> {
    let option = ReplayOpt::parse();

    env_logger::builder()
        .target(timely_tools::log_target(&option.log_file)?)
        .filter_level(option.log_level)
        .format_timestamp_millis()
        .init();

    let recovery = load_recovery_config(&option.config, option.cc, option.segment_size)?;
    let segment_size = recovery.max_datagram_size as u64;
    let trace = load_rtt_trace(&option.trace)?;
    info!("replay {} samples from {}", trace.len(), option.trace);

    let recorder = Arc::new(RttSampleRecorder::default());
    let hooks = ControllerHooks {
        oracle: None,
        observer: Some(recorder.clone()),
    };
    let mut cc = build_congestion_controller(&recovery, hooks)?;
    cc.on_congestion_state(CongestionState::Open);

    let mut cwnd = option.initial_cwnd;
    for rtt in trace.iter() {
        cwnd = cc.on_ack_with_rtt(*rtt, cwnd, segment_size);
        if option.print_window {
            println!("{} {}", rtt.as_micros(), cwnd);
        }
    }

    let stats = cc.stats();
    println!();
    println!("{} final cwnd: {} bytes", cc.name(), cwnd);
    println!(
        "samples: accepted {}, ignored {}, zero {}",
        stats.samples_accepted,
        stats.samples_ignored,
        trace.len() - recorder.len(),
    );
    println!(
        "events: low {}, high {}, increase {}, decrease {}, hai {}",
        stats.low_threshold_events,
        stats.high_threshold_events,
        stats.gradient_increases,
        stats.gradient_decreases,
        stats.hai_increases,
    );
    if let Some(summary) = RttSummary::new(recorder.samples_micros()) {
        summary.print();
    }

    Ok(())
}
