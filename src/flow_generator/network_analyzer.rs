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
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Weak,
    },
    thread::{self, JoinHandle},
};

use log::{debug, error, info, warn};
use parking_lot::Mutex;
use public::{
    counter::{Countable, Counter, CounterType, CounterValue, RefCountable},
    l7_protocol::L7Protocol,
};

use super::{
    error::{Error, Result},
    flow_record::{FlowKey, FlowRecord},
    flow_table::FlowTable,
    metric_emitter::MetricEmitter,
    protocol_dispatcher::{ParseOutcome, ProtocolDispatcher},
    timestamp_now, SWEEP_INTERVAL,
};
use crate::{
    common::{
        consts::HTTP_CONTINUE,
        event::{EventCategory, SocketEvent},
    },
    config::{
        handler::{self, AnalyzerAccess, AnalyzerRuntimeConfig},
        AnalyzerConfig,
    },
    conntrack::{ConntrackCache, NatResolver},
    sender::Consumer,
};

#[derive(Default)]
pub struct NetworkAnalyzerCounter {
    pub events: AtomicU64,
    pub drop_events: AtomicU64,
    pub emitted_records: AtomicU64,
    pub sweeper_flushes: AtomicU64,
    pub consumer_errors: AtomicU64,
    pub ttfb_underflow: AtomicU64,
    pub tcp_flows: AtomicU64,
    pub udp_flows: AtomicU64,
}

impl RefCountable for NetworkAnalyzerCounter {
    fn get_counters(&self) -> Vec<Counter> {
        vec![
            (
                "events",
                CounterType::Counted,
                CounterValue::Unsigned(self.events.swap(0, Ordering::Relaxed)),
            ),
            (
                "drop_events",
                CounterType::Counted,
                CounterValue::Unsigned(self.drop_events.swap(0, Ordering::Relaxed)),
            ),
            (
                "emitted_records",
                CounterType::Counted,
                CounterValue::Unsigned(self.emitted_records.swap(0, Ordering::Relaxed)),
            ),
            (
                "sweeper_flushes",
                CounterType::Counted,
                CounterValue::Unsigned(self.sweeper_flushes.swap(0, Ordering::Relaxed)),
            ),
            (
                "consumer_errors",
                CounterType::Counted,
                CounterValue::Unsigned(self.consumer_errors.swap(0, Ordering::Relaxed)),
            ),
            (
                "ttfb_underflow",
                CounterType::Counted,
                CounterValue::Unsigned(self.ttfb_underflow.swap(0, Ordering::Relaxed)),
            ),
            (
                "tcp_flows",
                CounterType::Gauged,
                CounterValue::Unsigned(self.tcp_flows.load(Ordering::Relaxed)),
            ),
            (
                "udp_flows",
                CounterType::Gauged,
                CounterValue::Unsigned(self.udp_flows.load(Ordering::Relaxed)),
            ),
        ]
    }
}

// Gauges read off the live analyzer, silent once it is dropped.
struct PortCacheStats(Weak<AnalyzerInner>);

impl RefCountable for PortCacheStats {
    fn get_counters(&self) -> Vec<Counter> {
        let Some(inner) = self.0.upgrade() else {
            return vec![];
        };
        vec![(
            "cached_ports",
            CounterType::Gauged,
            CounterValue::Unsigned(inner.dispatcher.cached_port_count() as u64),
        )]
    }
}

struct AnalyzerInner {
    config: AnalyzerAccess,
    table: FlowTable,
    dispatcher: ProtocolDispatcher,
    emitter: MetricEmitter,
    nat_resolver: Option<Arc<dyn NatResolver>>,
    consumers: Vec<Arc<dyn Consumer>>,
    counter: Arc<NetworkAnalyzerCounter>,
}

impl AnalyzerInner {
    fn is_valid(&self, evt: &SocketEvent) -> bool {
        if evt.category != EventCategory::Net || evt.ip_src.is_none() {
            return false;
        }
        // dns is the only protocol parsed over udp
        if evt.is_udp() && !self.dispatcher.has_parser(L7Protocol::DNS) {
            return false;
        }
        if !evt.is_connect() && !evt.name.is_read() && !evt.name.is_write() {
            return false;
        }
        evt.is_connect() || (!evt.payload.is_empty() && evt.res_val >= 0)
    }

    fn consume_event(&self, evt: SocketEvent) -> Result<()> {
        self.counter.events.fetch_add(1, Ordering::Relaxed);
        if !self.is_valid(&evt) {
            self.counter.drop_events.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }

        let conf = self.config.load();
        let evt = Arc::new(evt);
        if evt.is_connect() {
            self.ingest_connect(evt, &conf)
        } else if evt.is_request() {
            self.ingest_request(evt, &conf)
        } else {
            self.ingest_response(evt);
            Ok(())
        }
    }

    fn ingest_connect(&self, evt: Arc<SocketEvent>, conf: &AnalyzerRuntimeConfig) -> Result<()> {
        let key = FlowKey::from_event(&evt);
        let candidate = Arc::new(FlowRecord::with_event(
            evt.clone(),
            conf.max_payload_length,
        ));
        loop {
            let (record, loaded) = self.table.load_or_store(key, candidate.clone());
            if !loaded {
                return Ok(());
            }
            let mut state = record.lock();
            if record.is_emitted() {
                continue;
            }
            let stale = match (state.request.as_ref(), state.connect.as_ref()) {
                (None, Some(connect)) => connect.is_timeout(&evt, conf.connect_timeout),
                (None, None) => false,
                (Some(_), _) => true,
            };
            if !stale {
                record.merge_connect(&mut state, evt);
                return Ok(());
            }
            drop(state);
            if self.flush(&record, Some(candidate.clone()))? {
                return Ok(());
            }
        }
    }

    fn ingest_request(&self, evt: Arc<SocketEvent>, conf: &AnalyzerRuntimeConfig) -> Result<()> {
        let key = FlowKey::from_event(&evt);
        let candidate = Arc::new(FlowRecord::with_event(
            evt.clone(),
            conf.max_payload_length,
        ));
        loop {
            let (record, loaded) = self.table.load_or_store(key, candidate.clone());
            if !loaded {
                return Ok(());
            }
            let mut state = record.lock();
            if record.is_emitted() {
                continue;
            }
            if state.request.is_none() && state.connect.is_none() {
                // holds nothing worth emitting
                drop(state);
                if record.check_and_mark_emitted() {
                    self.table.store(key, candidate);
                    return Ok(());
                }
                continue;
            }
            let replace = match state.request.as_ref() {
                Some(request) => state.response.is_some() || request.is_sport_changed(&evt),
                None => false,
            };
            if !replace {
                record.merge_request(&mut state, evt);
                return Ok(());
            }
            drop(state);
            if self.flush(&record, Some(candidate.clone()))? {
                return Ok(());
            }
        }
    }

    fn ingest_response(&self, evt: Arc<SocketEvent>) {
        let key = FlowKey::from_event(&evt);
        let Some(record) = self.table.get(&key) else {
            self.counter.drop_events.fetch_add(1, Ordering::Relaxed);
            return;
        };
        let mut state = record.lock();
        if record.is_emitted() || state.request.is_none() {
            self.counter.drop_events.fetch_add(1, Ordering::Relaxed);
            return;
        }
        record.merge_response(&mut state, evt);
    }

    // Ok(false) when another caller already flushed the record. An error means
    // the record was flushed but some consumers failed.
    fn flush(
        &self,
        record: &Arc<FlowRecord>,
        replacement: Option<Arc<FlowRecord>>,
    ) -> Result<bool> {
        if !record.check_and_mark_emitted() {
            return Ok(false);
        }
        let key = *record.key();
        match replacement {
            Some(r) => self.table.store(key, r),
            None => {
                self.table.remove_if_same(&key, record);
            }
        }

        let mut state = std::mem::take(&mut *record.lock());
        state.nat = self.nat_resolver.as_ref().and_then(|resolver| {
            state.first_event().and_then(|evt| {
                resolver.resolve_dnat(
                    evt.ip_src_or_unspecified(),
                    evt.ip_dst,
                    evt.port_src,
                    evt.port_dst,
                    evt.is_udp(),
                )
            })
        });

        let conf = self.config.load();
        let outcome = self.dispatcher.dispatch(&state, &conf);
        if let ParseOutcome::Transaction { attributes, .. } = &outcome {
            if attributes.get_bool(HTTP_CONTINUE) {
                if let Some(request) = state.request.take() {
                    match self.table.get(&key) {
                        Some(current) => current.put_request_back(request),
                        None => debug!("{} closed before the final response of 100-continue", key),
                    }
                }
                return Ok(true);
            }
        }

        let groups = self.emitter.emit(&state, outcome, &conf);
        let mut errors = vec![];
        for group in groups.iter() {
            self.counter.emitted_records.fetch_add(1, Ordering::Relaxed);
            for consumer in self.consumers.iter() {
                if let Err(e) = consumer.consume(group) {
                    self.counter.consumer_errors.fetch_add(1, Ordering::Relaxed);
                    errors.push(e.to_string());
                }
            }
        }
        if errors.is_empty() {
            Ok(true)
        } else {
            Err(Error::ConsumerErrors(errors))
        }
    }

    fn sweep(&self, now: u64) -> usize {
        let conf = self.config.load();
        let fd_reuse_timeout = conf.fd_reuse_timeout.as_nanos() as u64;
        let no_response_threshold = conf.no_response_threshold.as_nanos() as u64;

        let records = self.table.snapshot();
        let (mut tcp_flows, mut udp_flows) = (0, 0);
        let mut flushed = 0;
        for record in records.iter() {
            match record.key() {
                FlowKey::Tcp { .. } => tcp_flows += 1,
                FlowKey::Udp { .. } => udp_flows += 1,
            }
            if record.is_emitted() {
                continue;
            }
            let activity = {
                let state = record.lock();
                let has_response = state.response.is_some();
                let last_ts = state.timeout_ts();
                last_ts.map(|ts| (ts, has_response))
            };
            let Some((last_ts, has_response)) = activity else {
                continue;
            };
            let idle = now.saturating_sub(last_ts);
            if !(has_response && idle >= fd_reuse_timeout) && idle < no_response_threshold {
                continue;
            }
            match self.flush(record, None) {
                Ok(true) => flushed += 1,
                Ok(false) => (),
                Err(e) => {
                    flushed += 1;
                    warn!("sweep {}: {}", record.key(), e);
                }
            }
        }
        self.counter.tcp_flows.store(tcp_flows, Ordering::Relaxed);
        self.counter.udp_flows.store(udp_flows, Ordering::Relaxed);
        self.counter
            .sweeper_flushes
            .fetch_add(flushed as u64, Ordering::Relaxed);
        flushed
    }
}

/// Correlates socket events into request/response transactions.
///
/// Events are fed through `consume_event` from a single ingest thread. A
/// sweeper thread flushes idle flows once per second, see `start`. Each flow
/// is emitted exactly once, by whichever of the two gets to it first.
pub struct NetworkAnalyzer {
    inner: Arc<AnalyzerInner>,
    conntrack: Option<Arc<ConntrackCache>>,

    running: Arc<AtomicBool>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl NetworkAnalyzer {
    // NAT is resolved from a conntrack cache owned by the analyzer when
    // enable-conntrack is set
    pub fn new(config: &AnalyzerConfig, consumers: Vec<Arc<dyn Consumer>>) -> Self {
        let conntrack = config
            .enable_conntrack
            .then(|| Arc::new(ConntrackCache::new(config.conntrack_max_state_size)));
        let resolver = conntrack
            .clone()
            .map(|c| c as Arc<dyn NatResolver>);
        let mut analyzer = Self::with_nat_resolver(config, consumers, resolver);
        analyzer.conntrack = conntrack;
        analyzer
    }

    pub fn with_nat_resolver(
        config: &AnalyzerConfig,
        consumers: Vec<Arc<dyn Consumer>>,
        nat_resolver: Option<Arc<dyn NatResolver>>,
    ) -> Self {
        let access = handler::new_access(config);
        let counter = Arc::new(NetworkAnalyzerCounter::default());
        let dispatcher = ProtocolDispatcher::new(&access.load());
        Self {
            inner: Arc::new(AnalyzerInner {
                config: access,
                table: FlowTable::new(),
                dispatcher,
                emitter: MetricEmitter::new(counter.clone()),
                nat_resolver,
                consumers,
                counter,
            }),
            conntrack: None,
            running: Default::default(),
            thread: Mutex::new(None),
        }
    }

    pub fn consume_event(&self, evt: SocketEvent) -> Result<()> {
        self.inner.consume_event(evt)
    }

    /// Flushes every flow idle for longer than its threshold at `now`
    /// (nanoseconds) and returns how many were flushed.
    pub fn sweep(&self, now: u64) -> usize {
        self.inner.sweep(now)
    }

    pub fn conntrack(&self) -> Option<&Arc<ConntrackCache>> {
        self.conntrack.as_ref()
    }

    pub fn on_config_change(&self, config: &AnalyzerConfig) {
        handler::update_access(&self.inner.config, config);
    }

    pub fn flow_count(&self) -> usize {
        self.inner.table.len()
    }

    pub fn cached_protocols(&self, port: u16) -> Vec<&'static str> {
        self.inner.dispatcher.cached_parsers(port)
    }

    pub fn counter(&self) -> &Arc<NetworkAnalyzerCounter> {
        &self.inner.counter
    }

    pub fn countables(&self) -> Vec<(&'static str, Countable)> {
        let mut countables = vec![(
            "network_analyzer",
            Countable::Ref(Arc::downgrade(&self.inner.counter) as Weak<dyn RefCountable>),
        )];
        countables.push((
            "protocol_dispatcher",
            Countable::Owned(Box::new(PortCacheStats(Arc::downgrade(&self.inner)))),
        ));
        if let Some(conntrack) = self.conntrack.as_ref() {
            countables.push((
                "conntrack",
                Countable::Ref(Arc::downgrade(conntrack.counter()) as Weak<dyn RefCountable>),
            ));
        }
        countables
    }

    pub fn start(&self) {
        if self.running.swap(true, Ordering::Relaxed) {
            return;
        }

        let running = self.running.clone();
        let inner = self.inner.clone();
        let spawned = thread::Builder::new()
            .name("network-analyzer-sweeper".to_owned())
            .spawn(move || {
                while running.load(Ordering::Relaxed) {
                    thread::park_timeout(SWEEP_INTERVAL);
                    if !running.load(Ordering::Relaxed) {
                        break;
                    }
                    if inner.config.load().enable_timeout_check {
                        inner.sweep(timestamp_now());
                    }
                }
            });
        match spawned {
            Ok(handle) => {
                *self.thread.lock() = Some(handle);
                info!("network analyzer sweeper started");
            }
            Err(e) => {
                error!("network analyzer sweeper spawn failed: {}", e);
                self.running.store(false, Ordering::Relaxed);
            }
        }
    }

    pub fn notify_stop(&self) -> Option<JoinHandle<()>> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return None;
        }
        info!("notified network analyzer sweeper to stop");
        let handle = self.thread.lock().take()?;
        handle.thread().unpark();
        Some(handle)
    }

    // open flows are left unflushed
    pub fn stop(&self) {
        if let Some(handle) = self.notify_stop() {
            let _ = handle.join();
            info!("network analyzer sweeper stopped");
        }
    }
}
