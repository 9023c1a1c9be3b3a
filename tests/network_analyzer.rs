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
    collections::HashMap,
    net::{IpAddr, Ipv4Addr},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::Duration,
};

use cadence::SpyMetricSink;
use parking_lot::Mutex;

use l7_analyzer::{
    common::{
        consts::{
            DNS_DOMAIN, DNS_ID, ERROR_KIND, HTTP_METHOD, HTTP_STATUS_CODE, REQUEST_PAYLOAD,
            REQUEST_TID, SRC_PORT,
        },
        DataGroup, ErrorType, EventName, L4Protocol, Role, SocketEvent,
    },
    flow_generator,
    sender::{self, Consumer},
    utils::stats,
    AnalyzerConfig, NetworkAnalyzer,
};

const MS: u64 = 1_000_000;
const SEC: u64 = 1_000_000_000;
const T0: u64 = 1_700_000_000 * SEC;

#[derive(Default)]
struct Collector(Mutex<Vec<DataGroup>>);

impl Consumer for Collector {
    fn consume(&self, group: &DataGroup) -> Result<(), sender::Error> {
        self.0.lock().push(group.clone());
        Ok(())
    }
}

impl Collector {
    fn take(&self) -> Vec<DataGroup> {
        std::mem::take(&mut *self.0.lock())
    }
}

struct Rejecting;

impl Consumer for Rejecting {
    fn consume(&self, _: &DataGroup) -> Result<(), sender::Error> {
        Err(sender::Error::QueueFull("rejecting"))
    }
}

// ends at `start + latency`
fn event(fd: i32, name: EventName, start: u64, latency: u64, payload: &[u8]) -> SocketEvent {
    SocketEvent {
        timestamp: start + latency,
        latency,
        name,
        role: Role::Client,
        pid: 1000,
        tid: fd as u32,
        comm: "app".to_owned(),
        fd,
        ip_src: Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))),
        ip_dst: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)),
        port_src: 40000,
        port_dst: 8080,
        payload: payload.to_vec(),
        res_val: payload.len() as i64,
        ..Default::default()
    }
}

fn http_request(fd: i32, start: u64) -> SocketEvent {
    event(fd, EventName::Write, start, MS, b"GET /users HTTP/1.1\r\nHost: a\r\n\r\n")
}

fn http_response(fd: i32, start: u64) -> SocketEvent {
    event(fd, EventName::Read, start, MS, b"HTTP/1.1 200 OK\r\n\r\n")
}

fn new_analyzer(config: &AnalyzerConfig) -> (NetworkAnalyzer, Arc<Collector>) {
    let collector = Arc::new(Collector::default());
    let analyzer = NetworkAnalyzer::new(config, vec![collector.clone() as Arc<dyn Consumer>]);
    (analyzer, collector)
}

fn dns_message(id: u16, qr: bool, domain: &str, ip: Option<Ipv4Addr>) -> Vec<u8> {
    let mut p = id.to_be_bytes().to_vec();
    p.extend_from_slice(if qr { &[0x81, 0x80] } else { &[0x01, 0x00] });
    p.extend_from_slice(&[0x00, 0x01, 0x00, ip.is_some() as u8, 0x00, 0x00, 0x00, 0x00]);
    for label in domain.split('.') {
        p.push(label.len() as u8);
        p.extend_from_slice(label.as_bytes());
    }
    p.extend_from_slice(&[0x00, 0x00, 0x01, 0x00, 0x01]);
    if let Some(ip) = ip {
        p.extend_from_slice(&[0xc0, 0x0c, 0x00, 0x01, 0x00, 0x01, 0, 0, 0, 60, 0, 4]);
        p.extend_from_slice(&ip.octets());
    }
    p
}

#[test]
fn normal_transaction() {
    let (analyzer, collector) = new_analyzer(&AnalyzerConfig::default());
    analyzer
        .consume_event(event(3, EventName::Connect, T0, MS, b""))
        .unwrap();
    analyzer
        .consume_event(event(3, EventName::Write, T0 + MS, 2 * MS, b"GET / HTTP/1.1\r\n\r\n"))
        .unwrap();
    analyzer
        .consume_event(event(3, EventName::Read, T0 + 3 * MS, 100 * MS, b"HTTP/1.1 200 OK\r\n\r\n"))
        .unwrap();
    assert_eq!(analyzer.sweep(T0 + 10 * SEC), 0);
    assert_eq!(analyzer.sweep(T0 + 20 * SEC), 1);

    let groups = collector.take();
    assert_eq!(groups.len(), 1);
    let g = &groups[0];
    assert_eq!(g.metrics.connect_time, 1_000_000);
    assert_eq!(g.metrics.request_sent_time, 2_000_000);
    assert_eq!(g.metrics.content_download_time, 100_000_000);
    assert_eq!(g.metrics.waiting_ttfb_time, 0);
    assert_eq!(g.metrics.request_total_time, 103_000_000);
    assert!(!g.is_slow());
    assert!(!g.is_error());
    assert_eq!(g.protocol(), "http");
    assert_eq!(g.labels.get_int(HTTP_STATUS_CODE), Some(200));
    assert_eq!(g.timestamp, T0 + MS);
    assert_eq!(analyzer.flow_count(), 0);
}

#[test]
fn connect_fail() {
    let (analyzer, collector) = new_analyzer(&AnalyzerConfig::default());
    analyzer
        .consume_event(event(4, EventName::Connect, T0, 3 * MS, b""))
        .unwrap();
    analyzer
        .consume_event(event(4, EventName::Connect, T0 + 101 * SEC, MS, b""))
        .unwrap();

    let groups = collector.take();
    assert_eq!(groups.len(), 1);
    assert!(groups[0].is_error());
    assert_eq!(groups[0].labels.get_str(ERROR_KIND), Some("ConnectFail"));
    assert_eq!(groups[0].metrics.connect_time, 3_000_000);
    assert_eq!(groups[0].metrics.request_sent_time, -1);
    // the new connect replaced the failed one
    assert_eq!(analyzer.flow_count(), 1);
}

#[test]
fn no_response_timeout() {
    let (analyzer, collector) = new_analyzer(&AnalyzerConfig::default());
    analyzer.consume_event(http_request(5, T0)).unwrap();
    assert_eq!(analyzer.sweep(T0 + 60 * SEC), 0);
    assert_eq!(analyzer.sweep(T0 + 121 * SEC), 1);
    assert_eq!(analyzer.sweep(T0 + 122 * SEC), 0);

    let groups = collector.take();
    assert_eq!(groups.len(), 1);
    assert!(groups[0].is_error());
    assert_eq!(groups[0].labels.get_str(ERROR_KIND), Some("NoResponse"));
    assert_eq!(groups[0].metrics.response_io, 0);
    assert_eq!(analyzer.flow_count(), 0);

    // a late response finds nothing to attach to
    analyzer.consume_event(http_response(5, T0 + 130 * SEC)).unwrap();
    assert_eq!(analyzer.flow_count(), 0);
}

#[test]
fn dns_requests_matched_by_id() {
    let (analyzer, collector) = new_analyzer(&AnalyzerConfig::default());
    let udp = |name, start, payload: Vec<u8>| SocketEvent {
        l4_protocol: L4Protocol::Udp,
        port_dst: 53,
        ..event(9, name, start, MS, &payload)
    };
    let server = Ipv4Addr::new(93, 184, 216, 34);
    for (i, id) in [1u16, 2, 3].into_iter().enumerate() {
        analyzer
            .consume_event(udp(
                EventName::Sendto,
                T0 + i as u64 * MS,
                dns_message(id, false, "example.com", None),
            ))
            .unwrap();
    }
    for (i, id) in [2u16, 1].into_iter().enumerate() {
        analyzer
            .consume_event(udp(
                EventName::Recvfrom,
                T0 + (10 + i as u64) * MS,
                dns_message(id, true, "example.com", Some(server)),
            ))
            .unwrap();
    }
    assert_eq!(analyzer.sweep(T0 + 30 * SEC), 1);

    let groups = collector.take();
    assert_eq!(groups.len(), 3);
    assert!(groups.iter().all(|g| g.protocol() == "dns"));
    assert_eq!(groups[0].labels.get_int(DNS_ID), Some(2));
    assert_eq!(groups[0].labels.get_str(DNS_DOMAIN), Some("example.com"));
    assert!(!groups[0].is_error());
    assert_eq!(groups[0].metrics.connect_time, 0);
    // sent at T0 + 1ms, answered at T0 + 11ms
    assert_eq!(groups[0].metrics.request_total_time, 10 * MS as i64);
    assert_eq!(groups[1].labels.get_int(DNS_ID), Some(1));
    assert!(!groups[1].is_error());
    assert_eq!(groups[2].error_type(), ErrorType::NoResponse);
}

#[test]
fn sweeps_emit_each_flow_once() {
    let (analyzer, collector) = new_analyzer(&AnalyzerConfig::default());
    let analyzer = Arc::new(analyzer);
    for fd in 0..200 {
        analyzer.consume_event(http_request(fd, T0)).unwrap();
    }
    let handles = (0..4)
        .map(|_| {
            let analyzer = analyzer.clone();
            thread::spawn(move || analyzer.sweep(T0 + 200 * SEC))
        })
        .collect::<Vec<_>>();
    let flushed: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    assert_eq!(flushed, 200);
    assert_eq!(collector.take().len(), 200);
    assert_eq!(analyzer.flow_count(), 0);
}

#[test]
fn ingest_racing_sweeper() {
    const FLOWS: i32 = 300;
    let (analyzer, collector) = new_analyzer(&AnalyzerConfig::default());
    let analyzer = Arc::new(analyzer);
    let done = Arc::new(AtomicBool::new(false));

    let sweeper = {
        let analyzer = analyzer.clone();
        let done = done.clone();
        thread::spawn(move || {
            while !done.load(Ordering::Relaxed) {
                analyzer.sweep(T0 + 1000 * SEC);
            }
        })
    };
    for fd in 0..FLOWS {
        analyzer.consume_event(http_request(fd, T0)).unwrap();
        analyzer.consume_event(http_response(fd, T0 + MS)).unwrap();
        analyzer.consume_event(http_request(fd, T0 + 2 * MS)).unwrap();
    }
    done.store(true, Ordering::Relaxed);
    sweeper.join().unwrap();
    analyzer.sweep(T0 + 1000 * SEC);

    let mut per_flow = HashMap::new();
    for g in collector.take() {
        *per_flow.entry(g.labels.get_int(REQUEST_TID)).or_insert(0) += 1;
    }
    assert_eq!(per_flow.len(), FLOWS as usize);
    assert!(per_flow.values().all(|n| *n == 2));
    assert_eq!(analyzer.flow_count(), 0);
}

#[test]
fn port_cache_promotion() {
    let (analyzer, _) = new_analyzer(&AnalyzerConfig::default());
    for fd in 0..49 {
        analyzer.consume_event(http_request(fd, T0)).unwrap();
        analyzer.consume_event(http_response(fd, T0 + MS)).unwrap();
    }
    analyzer.sweep(T0 + 30 * SEC);
    assert!(analyzer.cached_protocols(8080).is_empty());

    analyzer.consume_event(http_request(49, T0)).unwrap();
    analyzer.sweep(T0 + 300 * SEC);
    assert_eq!(analyzer.cached_protocols(8080), vec!["http"]);
}

#[test]
fn http_continue_waits_for_final_response() {
    let (analyzer, collector) = new_analyzer(&AnalyzerConfig::default());
    let headers = b"POST /upload HTTP/1.1\r\nExpect: 100-continue\r\n\r\n";
    analyzer
        .consume_event(event(6, EventName::Write, T0, MS, headers))
        .unwrap();
    analyzer
        .consume_event(event(6, EventName::Read, T0 + 2 * MS, MS, b"HTTP/1.1 100 Continue\r\n\r\n"))
        .unwrap();
    analyzer
        .consume_event(event(6, EventName::Write, T0 + 4 * MS, MS, b"hello"))
        .unwrap();
    assert!(collector.take().is_empty());
    analyzer
        .consume_event(event(6, EventName::Read, T0 + 6 * MS, MS, b"HTTP/1.1 201 Created\r\n\r\n"))
        .unwrap();
    analyzer.sweep(T0 + 60 * SEC);

    let groups = collector.take();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].labels.get_str(HTTP_METHOD), Some("POST"));
    assert_eq!(groups[0].labels.get_int(HTTP_STATUS_CODE), Some(201));
    assert_eq!(groups[0].metrics.request_io, headers.len() as i64 + 5);
    assert_eq!(groups[0].timestamp, T0);
}

#[test]
fn source_port_change_starts_new_flow() {
    let (analyzer, collector) = new_analyzer(&AnalyzerConfig::default());
    analyzer.consume_event(http_request(10, T0)).unwrap();
    assert!(collector.take().is_empty());

    // same fd reused by a new connection
    let reused = SocketEvent {
        port_src: 40001,
        ..http_request(10, T0 + 5 * MS)
    };
    analyzer.consume_event(reused).unwrap();
    let groups = collector.take();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].labels.get_str(ERROR_KIND), Some("NoResponse"));
    assert_eq!(groups[0].labels.get_int(SRC_PORT), Some(40000));
    assert_eq!(analyzer.flow_count(), 1);

    analyzer.consume_event(http_response(10, T0 + 10 * MS)).unwrap();
    assert_eq!(analyzer.sweep(T0 + 60 * SEC), 1);
    let groups = collector.take();
    assert!(!groups[0].is_error());
    assert_eq!(groups[0].labels.get_int(SRC_PORT), Some(40001));
    assert_eq!(groups[0].timestamp, T0 + 5 * MS);
}

#[test]
fn connect_after_request_flushes_request() {
    let (analyzer, collector) = new_analyzer(&AnalyzerConfig::default());
    analyzer.consume_event(http_request(11, T0)).unwrap();
    analyzer
        .consume_event(event(11, EventName::Connect, T0 + 5 * MS, MS, b""))
        .unwrap();

    let groups = collector.take();
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].labels.get_str(ERROR_KIND), Some("NoResponse"));
    assert_eq!(groups[0].metrics.connect_time, 0);
    assert_eq!(analyzer.flow_count(), 1);

    // only the connect is left, it times out on its own
    assert_eq!(analyzer.sweep(T0 + 200 * SEC), 1);
    let groups = collector.take();
    assert_eq!(groups[0].labels.get_str(ERROR_KIND), Some("ConnectFail"));
    assert_eq!(groups[0].metrics.connect_time, 1_000_000);
}

#[test]
fn chunked_request_is_merged() {
    let (analyzer, collector) = new_analyzer(&AnalyzerConfig::default());
    let head = b"POST /orders HTTP/1.1\r\nContent-Length: 4\r\n\r\n";
    analyzer
        .consume_event(event(12, EventName::Write, T0, MS, head))
        .unwrap();
    analyzer
        .consume_event(event(12, EventName::Write, T0 + MS, MS, b"body"))
        .unwrap();
    analyzer.consume_event(http_response(12, T0 + 3 * MS)).unwrap();
    assert_eq!(analyzer.flow_count(), 1);
    assert_eq!(analyzer.sweep(T0 + 60 * SEC), 1);

    let groups = collector.take();
    assert_eq!(groups.len(), 1);
    let g = &groups[0];
    assert!(!g.is_error());
    assert_eq!(g.labels.get_str(HTTP_METHOD), Some("POST"));
    assert_eq!(g.metrics.request_io, head.len() as i64 + 4);
    assert_eq!(g.metrics.request_sent_time, 2_000_000);
    assert_eq!(
        g.labels.get_str(REQUEST_PAYLOAD),
        Some("POST /orders HTTP/1.1..Content-Length: 4....body")
    );
    assert_eq!(g.timestamp, T0);
}

#[test]
fn consumer_errors_are_aggregated() {
    let collector = Arc::new(Collector::default());
    let consumers: Vec<Arc<dyn Consumer>> =
        vec![Arc::new(Rejecting), collector.clone(), Arc::new(Rejecting)];
    let analyzer = NetworkAnalyzer::new(&AnalyzerConfig::default(), consumers);

    analyzer.consume_event(http_request(8, T0)).unwrap();
    analyzer.consume_event(http_response(8, T0 + MS)).unwrap();
    match analyzer.consume_event(http_request(8, T0 + 2 * MS)) {
        Err(flow_generator::Error::ConsumerErrors(errors)) => {
            assert_eq!(errors.len(), 2);
            assert!(errors[0].contains("rejecting"));
        }
        other => panic!("unexpected {:?}", other),
    }
    // delivered to the healthy consumer regardless
    assert_eq!(collector.take().len(), 1);
    assert_eq!(analyzer.sweep(T0 + 200 * SEC), 1);
    assert_eq!(collector.take().len(), 1);
    assert_eq!(analyzer.counter().consumer_errors.load(Ordering::Relaxed), 4);
}

#[test]
fn config_update() -> l7_analyzer::Result<()> {
    let config = AnalyzerConfig::load("enable-conntrack: false\n")?;
    let (analyzer, collector) = new_analyzer(&config);
    assert!(analyzer.conntrack().is_none());

    let transaction = |fd| -> l7_analyzer::Result<()> {
        analyzer.consume_event(http_request(fd, T0))?;
        let response = b"HTTP/1.1 200 OK\r\n\r\n";
        analyzer.consume_event(event(fd, EventName::Read, T0 + 2 * MS, 100 * MS, response))?;
        Ok(())
    };
    transaction(1)?;
    analyzer.sweep(T0 + 60 * SEC);
    assert!(!collector.take()[0].is_slow());

    analyzer.on_config_change(&AnalyzerConfig::load(
        "enable-conntrack: false\nresponse-slow-threshold: 100ms\n",
    )?);
    transaction(2)?;
    analyzer.sweep(T0 + 60 * SEC);
    assert!(collector.take()[0].is_slow());
    Ok(())
}

#[test]
fn sweeper_thread() {
    let config = AnalyzerConfig {
        fd_reuse_timeout: Duration::from_millis(1),
        ..Default::default()
    };
    let (analyzer, collector) = new_analyzer(&config);
    let now = flow_generator::timestamp_now();
    analyzer.consume_event(http_request(1, now - 10 * MS)).unwrap();
    analyzer.consume_event(http_response(1, now - 5 * MS)).unwrap();
    analyzer.start();
    for _ in 0..50 {
        if analyzer.flow_count() == 0 {
            break;
        }
        thread::sleep(Duration::from_millis(100));
    }
    analyzer.stop();
    assert_eq!(analyzer.flow_count(), 0);
    assert_eq!(collector.take().len(), 1);
}

#[test]
fn stats_report() {
    let (rx, sink) = SpyMetricSink::new();
    let collector = stats::Collector::from_sink(sink);
    let config = AnalyzerConfig {
        enable_conntrack: false,
        ..Default::default()
    };
    let (analyzer, _) = new_analyzer(&config);
    for (module, countable) in analyzer.countables() {
        collector.register_countable(module, countable, vec![]);
    }
    assert_eq!(collector.source_count(), 2);

    analyzer.consume_event(http_request(1, T0)).unwrap();
    assert_eq!(collector.report(), 9);
    let sent = rx
        .try_iter()
        .map(|m| String::from_utf8_lossy(&m).into_owned())
        .collect::<Vec<_>>();
    assert!(sent.contains(&"l7_analyzer.network_analyzer.events:1|c".to_owned()));
    assert!(sent.contains(&"l7_analyzer.protocol_dispatcher.cached_ports:0|g".to_owned()));

    drop(analyzer);
    assert_eq!(collector.report(), 0);
    assert_eq!(collector.source_count(), 1);
}
