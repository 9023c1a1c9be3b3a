/*
 * Copyright (c) 2024 Yunshan Networks
 *
 * Licensed under the Apache License, Version 2.0 (the "License");
 * you may not use this file except in compliance with the License.
 * You may obtain a copy of the License at
 *
 *     http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing, software
 * distributed under the License is distributed on an "AS IS" BASIS,
 * WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 * See the License for the specific language governing permissions and
 * limitations under the License.
 */

pub mod error;
pub mod flow_record;
pub mod flow_table;
pub mod message_events;
pub mod metric_emitter;
pub mod network_analyzer;
pub mod protocol_dispatcher;
pub mod protocol_logs;

pub use error::{Error, Result};
pub use flow_record::{FlowKey, FlowRecord, FlowState};
pub use flow_table::FlowTable;
pub use message_events::EventAccumulator;
pub use metric_emitter::MetricEmitter;
pub use network_analyzer::{NetworkAnalyzer, NetworkAnalyzerCounter};
pub use protocol_dispatcher::{MessagePair, ParseOutcome, ProtocolDispatcher};
pub use protocol_logs::{
    DnsLog, GenericLog, HttpLog, L7ProtocolParser, L7ProtocolParserInterface, MysqlLog,
    ParseParam, ProtocolParser, RedisLog,
};

use std::time::{Duration, SystemTime, UNIX_EPOCH};

// events retained per accumulator, later ones only update the sums
const MAX_MERGED_EVENTS: usize = 10;
// matches on one port before the parser is cached for it
const CACHE_ADD_THRESHOLD: u32 = 50;
// matches of a cached generic parser before the port is rediscovered
const CACHE_RESET_THRESHOLD: u32 = 5000;
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

// wall clock in nanoseconds, the clock event timestamps are taken from
pub fn timestamp_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default()
}
