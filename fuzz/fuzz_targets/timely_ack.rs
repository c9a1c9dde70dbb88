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

#![no_main]

use std::time::Duration;

use libfuzzer_sys::fuzz_target;

use timely_cc::CongestionController;
use timely_cc::CongestionState;
use timely_cc::HaiMode;
use timely_cc::Timely;
use timely_cc::TimelyConfig;

const STATES: [CongestionState; 5] = [
    CongestionState::Open,
    CongestionState::Disorder,
    CongestionState::Cwr,
    CongestionState::Recovery,
    CongestionState::Loss,
];

fuzz_target!(|data: &[u8]| {
    let Some((&mode, events)) = data.split_first() else {
        return;
    };

    let config = TimelyConfig {
        hai_mode: if mode & 1 == 0 {
            HaiMode::Burst
        } else {
            HaiMode::Sustained
        },
        min_rate: (mode >> 1) as f64 / 64.0,
        ..TimelyConfig::new(0.1, 4.0, 0.05, 250, 4000, false)
    };
    let mut cc = Timely::new(config).unwrap();
    cc.enable();

    let mut cwnd = 0;
    for event in events.chunks_exact(3) {
        let rtt = u16::from_le_bytes([event[1], event[2]]) as u64;
        if event[0] & 0x80 != 0 {
            cc.on_congestion_state(STATES[event[0] as usize % STATES.len()]);
        }

        let rate = cc.rate();
        let enabled = cc.is_enabled();
        let new_cwnd = cc.on_ack_with_rtt(Duration::from_micros(rtt), cwnd, 1500);

        assert!(cc.rate() >= 0.0 && cc.rate().is_finite());
        if rtt == 0 || !enabled {
            assert_eq!(new_cwnd, cwnd);
            assert_eq!(cc.rate(), rate);
        }
        cwnd = new_cwnd;
    }
});
