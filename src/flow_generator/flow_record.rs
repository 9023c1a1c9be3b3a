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

use std::{
    fmt,
    net::IpAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use parking_lot::{Mutex, MutexGuard};

use super::message_events::EventAccumulator;
use crate::{
    common::event::{L4Protocol, SocketEvent},
    conntrack::IpTranslation,
};

// A TCP socket is identified by its owner and descriptor. UDP sockets may talk
// to several peers through one descriptor, so the tuple is part of the key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FlowKey {
    Tcp {
        pid: u32,
        fd: i32,
    },
    Udp {
        pid: u32,
        fd: i32,
        ip_src: IpAddr,
        ip_dst: IpAddr,
        port_src: u16,
        port_dst: u16,
    },
}

impl FlowKey {
    pub fn from_event(evt: &SocketEvent) -> Self {
        match evt.l4_protocol {
            L4Protocol::Tcp => FlowKey::Tcp {
                pid: evt.pid,
                fd: evt.fd,
            },
            L4Protocol::Udp => FlowKey::Udp {
                pid: evt.pid,
                fd: evt.fd,
                ip_src: evt.ip_src_or_unspecified(),
                ip_dst: evt.ip_dst,
                port_src: evt.port_src,
                port_dst: evt.port_dst,
            },
        }
    }
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlowKey::Tcp { pid, fd } => write!(f, "tcp pid={} fd={}", pid, fd),
            FlowKey::Udp {
                pid,
                fd,
                ip_src,
                ip_dst,
                port_src,
                port_dst,
            } => write!(
                f,
                "udp pid={} fd={} {}:{} -> {}:{}",
                pid, fd, ip_src, port_src, ip_dst, port_dst
            ),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct FlowState {
    pub connect: Option<EventAccumulator>,
    pub request: Option<EventAccumulator>,
    pub response: Option<EventAccumulator>,
    pub nat: Option<IpTranslation>,
}

impl FlowState {
    // the most recent activity, None for a record that holds nothing yet
    pub fn timeout_ts(&self) -> Option<u64> {
        self.response
            .as_ref()
            .or(self.request.as_ref())
            .or(self.connect.as_ref())
            .map(|acc| acc.last_timestamp())
    }

    // connect, else request, else response anchor
    pub fn first_event(&self) -> Option<&SocketEvent> {
        self.connect
            .as_ref()
            .or(self.request.as_ref())
            .or(self.response.as_ref())
            .map(|acc| acc.anchor())
    }

    pub fn connect_duration(&self) -> u64 {
        self.connect.as_ref().map(|c| c.duration()).unwrap_or(0)
    }
}

/// Connect/request/response accumulators of one flow.
///
/// All merges go through the record mutex. `emitted` flips exactly once, the
/// caller that flips it owns the flush.
pub struct FlowRecord {
    key: FlowKey,
    max_payload_length: usize,
    state: Mutex<FlowState>,
    emitted: AtomicBool,
}

impl FlowRecord {
    pub fn new(key: FlowKey, max_payload_length: usize) -> Self {
        Self {
            key,
            max_payload_length,
            state: Mutex::new(FlowState::default()),
            emitted: AtomicBool::new(false),
        }
    }

    // record seeded with the event in its connect, request or response slot
    pub fn with_event(evt: Arc<SocketEvent>, max_payload_length: usize) -> Self {
        let record = Self::new(FlowKey::from_event(&evt), max_payload_length);
        {
            let mut state = record.state.lock();
            let slot = if evt.is_connect() {
                &mut state.connect
            } else if evt.is_request() {
                &mut state.request
            } else {
                &mut state.response
            };
            *slot = Some(EventAccumulator::new(evt, max_payload_length));
        }
        record
    }

    pub fn key(&self) -> &FlowKey {
        &self.key
    }

    pub fn lock(&self) -> MutexGuard<'_, FlowState> {
        self.state.lock()
    }

    pub fn check_and_mark_emitted(&self) -> bool {
        self.emitted
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_emitted(&self) -> bool {
        self.emitted.load(Ordering::Acquire)
    }

    fn merge_into(&self, slot: &mut Option<EventAccumulator>, evt: Arc<SocketEvent>) {
        match slot {
            Some(acc) => acc.merge(evt),
            None => *slot = Some(EventAccumulator::new(evt, self.max_payload_length)),
        }
    }

    pub fn merge_connect(&self, state: &mut FlowState, evt: Arc<SocketEvent>) {
        self.merge_into(&mut state.connect, evt);
    }

    pub fn merge_request(&self, state: &mut FlowState, evt: Arc<SocketEvent>) {
        self.merge_into(&mut state.request, evt);
    }

    pub fn merge_response(&self, state: &mut FlowState, evt: Arc<SocketEvent>) {
        self.merge_into(&mut state.response, evt);
    }

    // Reinstall a request flushed early, an intermediate response showed the
    // final one is still to come.
    pub fn put_request_back(&self, origin: EventAccumulator) {
        let mut state = self.state.lock();
        state.request = Some(match state.request.take() {
            Some(current) => current.put_back(origin),
            None => origin,
        });
    }
}

impl fmt::Debug for FlowRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("FlowRecord");
        d.field("key", &self.key).field("emitted", &self.is_emitted());
        // the formatter may run while the caller holds the state lock
        if let Some(state) = self.state.try_lock() {
            d.field("connect", &state.connect.as_ref().map(|c| c.size()))
                .field("request", &state.request.as_ref().map(|c| c.size()))
                .field("response", &state.response.as_ref().map(|c| c.size()));
        }
        d.finish()
    }
}

#[cfg(test)]
mod tests {
    use std::{net::Ipv4Addr, thread};

    use super::*;
    use crate::common::event::{EventName, Role};

    fn event(name: EventName, role: Role, l4: L4Protocol) -> Arc<SocketEvent> {
        Arc::new(SocketEvent {
            timestamp: 10,
            name,
            role,
            l4_protocol: l4,
            pid: 1,
            fd: 3,
            ip_src: Some(IpAddr::V4(Ipv4Addr::LOCALHOST)),
            port_src: 1000,
            port_dst: 80,
            ..Default::default()
        })
    }

    #[test]
    fn key_by_protocol() {
        let tcp = FlowKey::from_event(&event(EventName::Read, Role::Server, L4Protocol::Tcp));
        assert_eq!(tcp, FlowKey::Tcp { pid: 1, fd: 3 });
        let udp = FlowKey::from_event(&event(EventName::Read, Role::Server, L4Protocol::Udp));
        assert!(matches!(udp, FlowKey::Udp { port_dst: 80, .. }));
    }

    #[test]
    fn seeded_slot() {
        let r = FlowRecord::with_event(event(EventName::Connect, Role::Client, L4Protocol::Tcp), 8);
        assert!(r.lock().connect.is_some());
        let r = FlowRecord::with_event(event(EventName::Write, Role::Client, L4Protocol::Tcp), 8);
        assert!(r.lock().request.is_some());
        let r = FlowRecord::with_event(event(EventName::Read, Role::Client, L4Protocol::Tcp), 8);
        let state = r.lock();
        assert!(state.response.is_some());
        assert_eq!(state.timeout_ts(), Some(10));
    }

    #[test]
    fn single_flight() {
        let record = Arc::new(FlowRecord::new(FlowKey::Tcp { pid: 1, fd: 1 }, 8));
        let handles = (0..16)
            .map(|_| {
                let record = record.clone();
                thread::spawn(move || record.check_and_mark_emitted())
            })
            .collect::<Vec<_>>();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
        assert!(record.is_emitted());
        assert!(!record.check_and_mark_emitted());
    }

    #[test]
    fn request_put_back() {
        let write = || event(EventName::Write, Role::Client, L4Protocol::Tcp);
        let record = FlowRecord::with_event(write(), 64);
        let origin = EventAccumulator::new(write(), 64);
        record.put_request_back(origin);
        assert_eq!(record.lock().request.as_ref().map(|r| r.size()), Some(2));
    }
}
