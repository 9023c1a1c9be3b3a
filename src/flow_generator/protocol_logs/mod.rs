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

pub mod consts;
pub mod dns;
pub mod generic;
pub mod http;
pub mod mysql;
pub mod redis;
pub mod url_clustering;

pub use dns::DnsLog;
pub use generic::GenericLog;
pub use http::HttpLog;
pub use mysql::MysqlLog;
pub use redis::RedisLog;

use std::{
    net::IpAddr,
    sync::atomic::{AtomicU32, Ordering},
};

use ahash::RandomState;
use dashmap::DashMap;
use enum_dispatch::enum_dispatch;
use public::l7_protocol::L7Protocol;

use super::error::Result;
use crate::{
    common::{
        attribute_map::AttributeMap,
        event::{L4Protocol, SocketEvent},
    },
    config::AnalyzerRuntimeConfig,
};

#[derive(Clone, Copy, Debug)]
pub struct ParseParam {
    pub l4_protocol: L4Protocol,
    pub ip_src: IpAddr,
    pub ip_dst: IpAddr,
    pub port_src: u16,
    pub port_dst: u16,
}

impl From<&SocketEvent> for ParseParam {
    fn from(evt: &SocketEvent) -> Self {
        Self {
            l4_protocol: evt.l4_protocol,
            ip_src: evt.ip_src_or_unspecified(),
            ip_dst: evt.ip_dst,
            port_src: evt.port_src,
            port_dst: evt.port_dst,
        }
    }
}

#[enum_dispatch]
pub enum L7ProtocolParser {
    HttpParser(HttpLog),
    DnsParser(DnsLog),
    MysqlParser(MysqlLog),
    RedisParser(RedisLog),
    GenericParser(GenericLog),
}

#[enum_dispatch(L7ProtocolParser)]
pub trait L7ProtocolParserInterface {
    // 解析请求，失败表示不是该协议
    // ==============================
    // parse a request payload, an error means the payload is not this protocol
    fn parse_request(&self, payload: &[u8], param: &ParseParam) -> Result<AttributeMap>;
    // 返回值包含请求的属性
    // ====================
    // the returned attributes extend `request`
    fn parse_response(
        &self,
        payload: &[u8],
        param: &ParseParam,
        request: &AttributeMap,
    ) -> Result<AttributeMap>;
    // one flow carries several independent requests, paired by `pair_match`
    fn multi_requests(&self) -> bool {
        false
    }
    fn pair_match(&self, _requests: &[AttributeMap], _response: &AttributeMap) -> Option<usize> {
        None
    }
    fn protocol(&self) -> L7Protocol;
    fn parsable_on_tcp(&self) -> bool {
        true
    }
    fn parsable_on_udp(&self) -> bool {
        true
    }
}

pub fn get_parser(protocol: L7Protocol, conf: &AnalyzerRuntimeConfig) -> Option<L7ProtocolParser> {
    match protocol {
        L7Protocol::Http1 => Some(L7ProtocolParser::HttpParser(HttpLog::new(
            conf.url_clustering_method,
        ))),
        L7Protocol::DNS => Some(L7ProtocolParser::DnsParser(DnsLog::default())),
        L7Protocol::MySQL => Some(L7ProtocolParser::MysqlParser(MysqlLog::default())),
        L7Protocol::Redis => Some(L7ProtocolParser::RedisParser(RedisLog::default())),
        L7Protocol::Other => Some(L7ProtocolParser::GenericParser(GenericLog::default())),
        _ => None,
    }
}

/// A parser together with its per destination port match counters.
pub struct ProtocolParser {
    parser: L7ProtocolParser,
    port_match_counts: DashMap<u16, AtomicU32, RandomState>,
}

impl ProtocolParser {
    pub fn new(parser: L7ProtocolParser) -> Self {
        Self {
            parser,
            port_match_counts: Default::default(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.parser.protocol().as_str()
    }

    pub fn is_generic(&self) -> bool {
        self.parser.protocol() == L7Protocol::Other
    }

    pub fn parsable_on(&self, l4_protocol: L4Protocol) -> bool {
        match l4_protocol {
            L4Protocol::Tcp => self.parser.parsable_on_tcp(),
            L4Protocol::Udp => self.parser.parsable_on_udp(),
        }
    }

    pub fn add_port_match_count(&self, port: u16) -> u32 {
        self.port_match_counts
            .entry(port)
            .or_default()
            .fetch_add(1, Ordering::Relaxed)
            + 1
    }

    pub fn reset_port_match_count(&self, port: u16) {
        self.port_match_counts.remove(&port);
    }

    pub fn port_match_count(&self, port: u16) -> u32 {
        self.port_match_counts
            .get(&port)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }
}

impl std::ops::Deref for ProtocolParser {
    type Target = L7ProtocolParser;

    fn deref(&self) -> &Self::Target {
        &self.parser
    }
}
