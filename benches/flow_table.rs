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
    net::{IpAddr, Ipv4Addr},
    sync::Arc,
    time::Instant,
};

use criterion::*;

use l7_analyzer::{
    common::{EventName, Role, SocketEvent},
    flow_generator::{
        FlowKey, FlowRecord, FlowTable, HttpLog, L7ProtocolParserInterface, ParseParam,
    },
    sender::{Consumer, LogConsumer},
    AnalyzerConfig, NetworkAnalyzer,
};

const REQUEST: &[u8] = b"GET /api/v1/users?id=42 HTTP/1.1\r\nHost: example.com\r\n\r\n";
const RESPONSE: &[u8] = b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n";

fn event(fd: i32, name: EventName, ts: u64, payload: &[u8]) -> SocketEvent {
    SocketEvent {
        timestamp: ts,
        latency: 1000,
        name,
        role: Role::Client,
        pid: 1,
        tid: 1,
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

fn flow_table(c: &mut Criterion) {
    c.bench_function("flow_table_load_or_store", |b| {
        b.iter_custom(|iters| {
            let table = FlowTable::with_capacity(iters as usize);
            let records = (0..iters)
                .map(|i| {
                    let evt = Arc::new(event(i as i32, EventName::Write, i, REQUEST));
                    (FlowKey::from_event(&evt), Arc::new(FlowRecord::with_event(evt, 1024)))
                })
                .collect::<Vec<_>>();
            let start = Instant::now();
            for (key, record) in records {
                let _ = table.load_or_store(key, record);
            }
            start.elapsed()
        })
    });
}

fn analyzer(c: &mut Criterion) {
    c.bench_function("analyzer_http_transaction", |b| {
        b.iter_custom(|iters| {
            let config = AnalyzerConfig {
                enable_conntrack: false,
                ..Default::default()
            };
            let consumers = vec![Arc::new(LogConsumer) as Arc<dyn Consumer>];
            let analyzer = NetworkAnalyzer::new(&config, consumers);
            let events = (0..iters)
                .flat_map(|i| {
                    let ts = i * 10_000;
                    [
                        event(7, EventName::Write, ts, REQUEST),
                        event(7, EventName::Read, ts + 5000, RESPONSE),
                    ]
                })
                .collect::<Vec<_>>();
            let start = Instant::now();
            for evt in events {
                let _ = analyzer.consume_event(evt);
            }
            start.elapsed()
        })
    });
}

fn parser(c: &mut Criterion) {
    c.bench_function("parse_http_v1", |b| {
        let parser = HttpLog::default();
        let param = ParseParam::from(&event(7, EventName::Write, 0, REQUEST));
        b.iter(|| {
            let request = parser.parse_request(REQUEST, &param).unwrap();
            black_box(parser.parse_response(RESPONSE, &param, &request).unwrap())
        })
    });
}

criterion_group!(benches, flow_table, analyzer, parser);
criterion_main!(benches);
