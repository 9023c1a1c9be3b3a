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

use std::{sync::Arc, time::Duration};

use super::MAX_MERGED_EVENTS;
use crate::common::event::SocketEvent;

/// Consecutive same-direction syscalls of one flow, merged.
///
/// The first event is the anchor and stays at index 0. At most
/// `MAX_MERGED_EVENTS` events are retained, later ones only update the sums.
/// The merged payload never grows beyond `max_payload_length`.
#[derive(Clone, Debug)]
pub struct EventAccumulator {
    events: Vec<Arc<SocketEvent>>,
    latency: u64,
    res_val: i64,
    last_timestamp: u64,
    data: Vec<u8>,
    max_payload_length: usize,
}

impl EventAccumulator {
    pub fn new(anchor: Arc<SocketEvent>, max_payload_length: usize) -> Self {
        let len = anchor.payload.len().min(max_payload_length);
        let mut data = Vec::with_capacity(len);
        data.extend_from_slice(&anchor.payload[..len]);
        Self {
            latency: anchor.latency,
            res_val: anchor.res_val,
            last_timestamp: anchor.timestamp,
            data,
            max_payload_length,
            events: vec![anchor],
        }
    }

    pub fn merge(&mut self, evt: Arc<SocketEvent>) {
        self.latency = self.latency.saturating_add(evt.latency);
        self.res_val += evt.res_val;
        self.last_timestamp = evt.timestamp;

        let remaining = self.max_payload_length.saturating_sub(self.data.len());
        if remaining > 0 {
            let append = evt.payload.len().min(remaining);
            self.data.extend_from_slice(&evt.payload[..append]);
        }

        if self.events.len() < MAX_MERGED_EVENTS {
            self.events.push(evt);
        }
    }

    // Re-anchor on `origin` and replay the events held here on top of it.
    pub fn put_back(self, mut origin: EventAccumulator) -> EventAccumulator {
        for evt in self.events {
            origin.merge(evt);
        }
        origin
    }

    pub fn anchor(&self) -> &SocketEvent {
        &self.events[0]
    }

    pub fn size(&self) -> usize {
        self.events.len()
    }

    pub fn event(&self, index: usize) -> Option<&Arc<SocketEvent>> {
        self.events.get(index)
    }

    pub fn events(&self) -> &[Arc<SocketEvent>] {
        &self.events
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn first_timestamp(&self) -> u64 {
        self.anchor().timestamp
    }

    pub fn last_timestamp(&self) -> u64 {
        self.last_timestamp
    }

    pub fn start_time(&self) -> u64 {
        self.anchor().start_time()
    }

    pub fn byte_count(&self) -> i64 {
        self.res_val
    }

    // sum of merged syscall latencies, the anchor latency when nothing was merged
    pub fn duration(&self) -> u64 {
        self.latency
    }

    pub fn is_timeout(&self, evt: &SocketEvent, timeout: Duration) -> bool {
        let first_start = self.anchor().start_time();
        if evt.timestamp < first_start {
            return false;
        }
        evt.timestamp - first_start > timeout.as_nanos() as u64 || self.is_sport_changed(evt)
    }

    pub fn is_sport_changed(&self, evt: &SocketEvent) -> bool {
        evt.port_src != self.anchor().port_src
    }
}
