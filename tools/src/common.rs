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

use std::fs::File;
use std::fs::OpenOptions;
use std::io::BufRead;
use std::io::BufReader;
use std::path::Path;
use std::time::Duration;

use log::debug;
use statrs::statistics::Data;
use statrs::statistics::Distribution;
use statrs::statistics::Max;
use statrs::statistics::Min;
use statrs::statistics::OrderStatistics;

use timely_cc::Config;
use timely_cc::CongestionControlAlgorithm;
use timely_cc::RecoveryConfig;

pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error>>;

/// Return the log target. If no file is specified, logs are written to
/// `stderr`.
pub fn log_target(log_file: &Option<String>) -> Result<env_logger::Target> {
    match log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            Ok(env_logger::Target::Pipe(Box::new(file)))
        }
        None => Ok(env_logger::Target::Stderr),
    }
}

/// Load the congestion control configuration. The algorithm and segment size
/// given on the command line override the ones in the file.
pub fn load_recovery_config(
    config_file: &Option<String>,
    cc: Option<CongestionControlAlgorithm>,
    segment_size: Option<usize>,
) -> Result<RecoveryConfig> {
    let mut conf = match config_file {
        Some(path) => {
            let json = std::fs::read_to_string(path)?;
            Config::from_json(&json)?
        }
        None => Config::new(),
    };
    if let Some(cc) = cc {
        conf.set_congestion_control_algorithm(cc);
    }
    if let Some(segment_size) = segment_size {
        conf.set_max_datagram_size(segment_size);
    }
    conf.validate()?;

    debug!("congestion control config {:?}", conf.recovery());
    Ok(conf.recovery().clone())
}

/// Parse a bandwidth with units, such as "50Mbps" or "1Gbps", into bits per
/// second.
pub fn parse_bandwidth(s: &str) -> std::result::Result<u64, String> {
    let s = s.trim();
    let split = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(s.len());
    let (value, unit) = s.split_at(split);
    let value: f64 = value
        .parse()
        .map_err(|_| format!("invalid bandwidth {:?}", s))?;
    let scale = match unit {
        "" | "bps" => 1.0,
        "Kbps" | "kbps" => 1e3,
        "Mbps" | "mbps" => 1e6,
        "Gbps" | "gbps" => 1e9,
        _ => return Err(format!("unknown bandwidth unit {:?}", unit)),
    };
    let bps = value * scale;
    if bps < 1.0 {
        return Err(format!("bandwidth {:?} is too small", s));
    }
    Ok(bps as u64)
}

/// Parse a duration with units, such as "100us" or "2ms". A number without
/// unit is in microseconds.
pub fn parse_duration(s: &str) -> std::result::Result<Duration, String> {
    let s = s.trim();
    let split = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(s.len());
    let (value, unit) = s.split_at(split);
    let value: f64 = value
        .parse()
        .map_err(|_| format!("invalid duration {:?}", s))?;
    let nanos = match unit {
        "ns" => value,
        "" | "us" => value * 1e3,
        "ms" => value * 1e6,
        "s" => value * 1e9,
        _ => return Err(format!("unknown duration unit {:?}", unit)),
    };
    Ok(Duration::from_nanos(nanos as u64))
}

/// Read an RTT trace, one sample in microseconds per line. Empty lines and
/// lines starting with '#' are skipped.
pub fn parse_rtt_trace<R: BufRead>(reader: R) -> Result<Vec<Duration>> {
    let mut samples = Vec::new();
    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let micros: u64 = line
            .parse()
            .map_err(|e| format!("line {}: invalid rtt {:?}: {}", i + 1, line, e))?;
        samples.push(Duration::from_micros(micros));
    }
    Ok(samples)
}

/// Read an RTT trace file.
pub fn load_rtt_trace<P: AsRef<Path>>(path: P) -> Result<Vec<Duration>> {
    let file = File::open(path)?;
    parse_rtt_trace(BufReader::new(file))
}

/// Statistics of RTT samples in microseconds.
#[derive(Debug, Clone, PartialEq)]
pub struct RttSummary {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub sd: f64,
    pub median: f64,
    pub p80: f64,
    pub p90: f64,
    pub p99: f64,
}

impl RttSummary {
    /// Summarize the samples. Return None if there are no samples.
    pub fn new(samples: Vec<f64>) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }

        let count = samples.len();
        let mut s = Data::new(samples);
        Some(Self {
            count,
            min: s.min(),
            max: s.max(),
            mean: s.mean().unwrap_or(0.0),
            sd: s.std_dev().unwrap_or(0.0),
            median: s.median(),
            p80: s.percentile(80),
            p90: s.percentile(90),
            p99: s.percentile(99),
        })
    }

    pub fn print(&self) {
        println!("rtt(µs), {} samples:", self.count);
        println!(
            "\tmin: {:.2}, max: {:.2}, mean: {:.2}, sd: {:.2}",
            self.min, self.max, self.mean, self.sd,
        );
        println!(
            "\tmedian: {:.2}, p80: {:.2}, p90: {:.2}, p99: {:.2}",
            self.median, self.p80, self.p90, self.p99,
        );
    }
}

#[path = "sim.rs"]
pub mod sim;

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn bandwidth() {
        assert_eq!(parse_bandwidth("50Mbps"), Ok(50_000_000));
        assert_eq!(parse_bandwidth("1.5Gbps"), Ok(1_500_000_000));
        assert_eq!(parse_bandwidth("64kbps"), Ok(64_000));
        assert_eq!(parse_bandwidth("1200"), Ok(1200));
        assert!(parse_bandwidth("50Mb").is_err());
        assert!(parse_bandwidth("Mbps").is_err());
        assert!(parse_bandwidth("0Mbps").is_err());
    }

    #[test]
    fn duration() {
        assert_eq!(parse_duration("100us"), Ok(Duration::from_micros(100)));
        assert_eq!(parse_duration("2ms"), Ok(Duration::from_millis(2)));
        assert_eq!(parse_duration("1.5s"), Ok(Duration::from_millis(1500)));
        assert_eq!(parse_duration("250"), Ok(Duration::from_micros(250)));
        assert_eq!(parse_duration("10ns"), Ok(Duration::from_nanos(10)));
        assert!(parse_duration("3min").is_err());
        assert!(parse_duration("").is_err());
    }

    #[test]
    fn rtt_trace() -> Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        writeln!(file, "# rtt in microseconds")?;
        writeln!(file, "300")?;
        writeln!(file)?;
        writeln!(file, "  295 ")?;
        writeln!(file, "0")?;
        writeln!(file, "290")?;
        file.flush()?;

        let trace = load_rtt_trace(file.path())?;
        assert_eq!(
            trace,
            vec![
                Duration::from_micros(300),
                Duration::from_micros(295),
                Duration::ZERO,
                Duration::from_micros(290),
            ]
        );

        let err = parse_rtt_trace("300\nabc\n".as_bytes()).unwrap_err();
        assert!(err.to_string().starts_with("line 2"));
        Ok(())
    }

    #[test]
    fn recovery_config() -> Result<()> {
        let conf = load_recovery_config(&None, None, None)?;
        assert_eq!(
            conf.congestion_control_algorithm,
            CongestionControlAlgorithm::Timely
        );
        assert_eq!(conf.max_datagram_size, 1500);

        let conf = load_recovery_config(&None, Some(CongestionControlAlgorithm::Dummy), Some(1200))?;
        assert_eq!(
            conf.congestion_control_algorithm,
            CongestionControlAlgorithm::Dummy
        );
        assert_eq!(conf.max_datagram_size, 1200);

        let mut file = tempfile::NamedTempFile::new()?;
        write!(
            file,
            r#"{{"congestion_control_algorithm": "dummy", "timely": {{"add_step": 4}}}}"#
        )?;
        file.flush()?;
        let path = Some(file.path().to_string_lossy().into_owned());
        let conf = load_recovery_config(&path, Some(CongestionControlAlgorithm::Timely), None)?;
        assert_eq!(
            conf.congestion_control_algorithm,
            CongestionControlAlgorithm::Timely
        );
        assert_eq!(conf.timely.add_step, 4.0);

        // Settings in the file are kept unless given on the command line.
        let mut file = tempfile::NamedTempFile::new()?;
        write!(
            file,
            r#"{{"max_datagram_size": 1200, "congestion_control_algorithm": "dummy"}}"#
        )?;
        file.flush()?;
        let path = Some(file.path().to_string_lossy().into_owned());
        let conf = load_recovery_config(&path, None, None)?;
        assert_eq!(conf.max_datagram_size, 1200);
        assert_eq!(
            conf.congestion_control_algorithm,
            CongestionControlAlgorithm::Dummy
        );
        let conf = load_recovery_config(&path, None, Some(1400))?;
        assert_eq!(conf.max_datagram_size, 1400);

        let mut file = tempfile::NamedTempFile::new()?;
        write!(file, r#"{{"timely": {{"ewma_weight": 0}}}}"#)?;
        file.flush()?;
        let path = Some(file.path().to_string_lossy().into_owned());
        assert!(load_recovery_config(&path, None, None).is_err());
        Ok(())
    }

    #[test]
    fn rtt_summary() {
        assert_eq!(RttSummary::new(vec![]), None);

        let samples: Vec<f64> = (1..=100).map(|v| v as f64).collect();
        let s = RttSummary::new(samples).unwrap();
        assert_eq!(s.count, 100);
        assert_eq!(s.min, 1.0);
        assert_eq!(s.max, 100.0);
        assert!((s.mean - 50.5).abs() < 1e-9);
        assert!(s.median > 50.0 && s.median < 51.0);
        assert!(s.p80 > 80.0 && s.p80 < 81.0);
        assert!(s.p99 > 99.0 && s.p99 <= 100.0);
    }
}
