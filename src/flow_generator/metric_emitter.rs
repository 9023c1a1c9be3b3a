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

use std::sync::{atomic::Ordering, Arc};

use log::debug;
use public::bytes::to_printable;

use super::{
    flow_record::FlowState,
    message_events::EventAccumulator,
    network_analyzer::NetworkAnalyzerCounter,
    protocol_dispatcher::{MessagePair, ParseOutcome},
};
use crate::{
    common::{
        attribute_map::AttributeMap, consts::*, event::SocketEvent, DataGroup, ErrorType,
        RequestMetrics,
    },
    config::AnalyzerRuntimeConfig,
    conntrack::IpTranslation,
};

/// Turns a parsed flow into `net_request_metric_group` records.
pub struct MetricEmitter {
    counter: Arc<NetworkAnalyzerCounter>,
}

impl MetricEmitter {
    pub fn new(counter: Arc<NetworkAnalyzerCounter>) -> Self {
        Self { counter }
    }

    pub fn emit(
        &self,
        state: &FlowState,
        outcome: ParseOutcome,
        conf: &AnalyzerRuntimeConfig,
    ) -> Vec<DataGroup> {
        match outcome {
            ParseOutcome::ConnectFail => self.connect_fail(state).into_iter().collect(),
            ParseOutcome::Transaction {
                protocol,
                attributes,
            } => self
                .transaction(state, &protocol, attributes, conf)
                .into_iter()
                .collect(),
            ParseOutcome::Pairs { protocol, pairs } => pairs
                .into_iter()
                .map(|pair| self.pair(state, &protocol, pair, conf))
                .collect(),
        }
    }

    fn connect_fail(&self, state: &FlowState) -> Option<DataGroup> {
        let connect = state.connect.as_ref()?;
        let mut labels = base_labels(connect.anchor());
        labels.insert(REQUEST_TID, 0i64);
        labels.insert(RESPONSE_TID, 0i64);
        labels.insert(IS_ERROR, true);
        labels.insert(ERROR_TYPE, ErrorType::ConnectFail as i64);

        let connect_time = connect.duration() as i64;
        let metrics = RequestMetrics {
            connect_time,
            request_sent_time: -1,
            waiting_ttfb_time: -1,
            content_download_time: -1,
            request_total_time: connect_time,
            request_io: 0,
            response_io: 0,
        };
        Some(finish(labels, metrics, connect.start_time(), state.nat.as_ref()))
    }

    fn transaction(
        &self,
        state: &FlowState,
        protocol: &str,
        attributes: AttributeMap,
        conf: &AnalyzerRuntimeConfig,
    ) -> Option<DataGroup> {
        let request = state.request.as_ref()?;
        let response = state.response.as_ref();
        let payload_length = conf.payload_length(protocol);

        let mut labels = base_labels(request.anchor());
        labels.insert(REQUEST_TID, request.anchor().tid as i64);
        labels.insert(
            RESPONSE_TID,
            response.map(|r| r.anchor().tid as i64).unwrap_or(0),
        );
        labels.insert(PROTOCOL, protocol);
        labels.merge(&attributes);
        labels.insert(REQUEST_PAYLOAD, to_printable(request.data(), payload_length));
        labels.insert(
            RESPONSE_PAYLOAD,
            response
                .map(|r| to_printable(r.data(), payload_length))
                .unwrap_or_default(),
        );

        let connect_time = state.connect_duration() as i64;
        let metrics = RequestMetrics {
            connect_time,
            request_sent_time: request.duration() as i64,
            waiting_ttfb_time: response
                .map(|r| self.waiting_ttfb(r, request.last_timestamp()))
                .unwrap_or(-1),
            content_download_time: response.map(|r| r.duration() as i64).unwrap_or(-1),
            request_total_time: connect_time
                + response
                    .map(|r| span(request.start_time(), r.last_timestamp()))
                    .unwrap_or(0),
            request_io: request.byte_count(),
            response_io: response.map(|r| r.byte_count()).unwrap_or(0),
        };

        match response {
            Some(r) => {
                labels.insert(END_TIMESTAMP, r.last_timestamp() as i64);
                let slow = is_slow(metrics.request_total_time, protocol, conf);
                labels.insert(IS_SLOW, slow);
            }
            None => set_no_response(&mut labels),
        }
        Some(finish(
            labels,
            metrics,
            request.start_time(),
            state.nat.as_ref(),
        ))
    }

    fn pair(
        &self,
        state: &FlowState,
        protocol: &str,
        pair: MessagePair,
        conf: &AnalyzerRuntimeConfig,
    ) -> DataGroup {
        let request = &pair.request;
        let response = pair.response.as_deref();
        let payload_length = conf.payload_length(protocol);

        let mut labels = base_labels(request);
        labels.insert(REQUEST_TID, request.tid as i64);
        labels.insert(RESPONSE_TID, response.map(|r| r.tid as i64).unwrap_or(0));
        labels.insert(PROTOCOL, protocol);
        labels.merge(&pair.attributes);
        labels.insert(REQUEST_PAYLOAD, to_printable(&request.payload, payload_length));
        labels.insert(
            RESPONSE_PAYLOAD,
            response
                .map(|r| to_printable(&r.payload, payload_length))
                .unwrap_or_default(),
        );

        let metrics = RequestMetrics {
            connect_time: 0,
            request_sent_time: request.latency as i64,
            waiting_ttfb_time: response
                .map(|r| {
                    let first_byte = r.timestamp as i64 - r.latency as i64;
                    self.clamp_ttfb(first_byte - request.timestamp as i64)
                })
                .unwrap_or(-1),
            content_download_time: response.map(|r| r.latency as i64).unwrap_or(-1),
            request_total_time: response
                .map(|r| span(request.start_time(), r.timestamp))
                .unwrap_or(0),
            request_io: request.res_val,
            response_io: response.map(|r| r.res_val).unwrap_or(0),
        };

        match response {
            Some(r) => {
                labels.insert(END_TIMESTAMP, r.timestamp as i64);
                let slow = is_slow(metrics.request_total_time, protocol, conf);
                labels.insert(IS_SLOW, slow);
            }
            None => set_no_response(&mut labels),
        }
        finish(labels, metrics, request.start_time(), state.nat.as_ref())
    }

    // gap between the last request byte and the first response byte
    fn waiting_ttfb(&self, response: &EventAccumulator, request_last_ts: u64) -> i64 {
        self.clamp_ttfb(
            response.first_timestamp() as i64
                - response.anchor().latency as i64
                - request_last_ts as i64,
        )
    }

    // clock skew between cpus can order the response before the request
    fn clamp_ttfb(&self, ttfb: i64) -> i64 {
        if ttfb < 0 {
            self.counter.ttfb_underflow.fetch_add(1, Ordering::Relaxed);
            debug!("waiting ttfb underflow {}ns, clamped to 0", ttfb);
            return 0;
        }
        ttfb
    }
}

fn span(start: u64, end: u64) -> i64 {
    end.saturating_sub(start) as i64
}

fn is_slow(request_total_time: i64, protocol: &str, conf: &AnalyzerRuntimeConfig) -> bool {
    request_total_time >= conf.slow_threshold(protocol).as_nanos() as i64
}

fn set_no_response(labels: &mut AttributeMap) {
    if !labels.get_bool(IS_ERROR) {
        labels.insert(IS_ERROR, true);
        labels.insert(ERROR_TYPE, ErrorType::NoResponse as i64);
    }
}

fn base_labels(evt: &SocketEvent) -> AttributeMap {
    let mut labels = AttributeMap::new();
    labels.insert(PID, evt.pid as i64);
    labels.insert(COMM, evt.comm.as_str());
    labels.insert(CONTAINER_ID, evt.container_id.as_str());
    labels.insert(SRC_IP, evt.ip_src_or_unspecified().to_string());
    labels.insert(SRC_PORT, evt.port_src as i64);
    labels.insert(DST_IP, evt.ip_dst.to_string());
    labels.insert(DST_PORT, evt.port_dst as i64);
    labels.insert(DNAT_IP, STR_EMPTY);
    labels.insert(DNAT_PORT, -1i64);
    labels.insert(IS_SERVER, evt.is_server());
    labels.insert(IS_ERROR, false);
    labels.insert(ERROR_TYPE, ErrorType::NoError as i64);
    labels.insert(IS_SLOW, false);
    labels
}

fn finish(
    mut labels: AttributeMap,
    metrics: RequestMetrics,
    timestamp: u64,
    nat: Option<&IpTranslation>,
) -> DataGroup {
    if let Some(nat) = nat {
        labels.insert(DNAT_IP, nat.repl_src_ip.to_string());
        labels.insert(DNAT_PORT, nat.repl_src_port as i64);
    }
    let mut group = DataGroup {
        name: NET_REQUEST_METRIC_GROUP_NAME,
        metrics,
        labels,
        timestamp,
    };
    let kind = group.error_type().as_str();
    group.labels.insert(ERROR_KIND, kind);
    group
}
