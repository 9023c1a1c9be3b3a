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

use std::sync::Arc;

use ahash::{AHashMap, RandomState};
use dashmap::DashMap;
use log::{debug, info, warn};
use public::l7_protocol::L7Protocol;

use super::{
    flow_record::FlowState,
    message_events::EventAccumulator,
    protocol_logs::{
        get_parser, GenericLog, L7ProtocolParser, L7ProtocolParserInterface, ParseParam,
        ProtocolParser,
    },
    CACHE_ADD_THRESHOLD, CACHE_RESET_THRESHOLD,
};
use crate::{
    common::{attribute_map::AttributeMap, event::SocketEvent},
    config::AnalyzerRuntimeConfig,
};

/// One request of a multi request flow with the response paired to it.
#[derive(Clone, Debug)]
pub struct MessagePair {
    pub request: Arc<SocketEvent>,
    pub response: Option<Arc<SocketEvent>>,
    pub attributes: AttributeMap,
}

#[derive(Clone, Debug)]
pub enum ParseOutcome {
    // a connect without any request
    ConnectFail,
    Transaction {
        protocol: String,
        attributes: AttributeMap,
    },
    Pairs {
        protocol: String,
        pairs: Vec<MessagePair>,
    },
}

/// Picks the parser for a finished flow.
///
/// Lookup order is static port mapping, the per port cache, then every
/// enabled parser with the generic one last. A parser matching the same port
/// `CACHE_ADD_THRESHOLD` times is cached for that port. The generic parser is
/// evicted from a port cache after `CACHE_RESET_THRESHOLD` matches so real
/// protocols get another chance.
pub struct ProtocolDispatcher {
    parsers: Vec<Arc<ProtocolParser>>,
    by_name: AHashMap<&'static str, Arc<ProtocolParser>>,
    port_cache: DashMap<u16, Vec<Arc<ProtocolParser>>, RandomState>,
}

impl ProtocolDispatcher {
    pub fn new(conf: &AnalyzerRuntimeConfig) -> Self {
        let mut by_name = AHashMap::new();
        let mut parsers = vec![];
        for name in conf.protocol_parser.iter() {
            let Ok(protocol) = L7Protocol::try_from(name.as_str()) else {
                warn!("unknown protocol parser {}", name);
                continue;
            };
            if by_name.contains_key(protocol.as_str()) {
                continue;
            }
            let Some(parser) = get_parser(protocol, conf) else {
                warn!("protocol parser {} is not supported", name);
                continue;
            };
            let parser = Arc::new(ProtocolParser::new(parser));
            if !conf.is_discern_disabled(parser.name()) && !parser.is_generic() {
                parsers.push(parser.clone());
            }
            by_name.insert(parser.name(), parser);
        }
        let generic = by_name
            .entry(L7Protocol::NOSUPPORT)
            .or_insert_with(|| {
                Arc::new(ProtocolParser::new(L7ProtocolParser::GenericParser(
                    GenericLog::default(),
                )))
            })
            .clone();
        parsers.push(generic);
        info!(
            "protocol parsers: {:?}",
            parsers.iter().map(|p| p.name()).collect::<Vec<_>>()
        );

        Self {
            parsers,
            by_name,
            port_cache: Default::default(),
        }
    }

    pub fn has_parser(&self, protocol: L7Protocol) -> bool {
        self.by_name.contains_key(protocol.as_str())
    }

    pub fn cached_parsers(&self, port: u16) -> Vec<&'static str> {
        self.port_cache
            .get(&port)
            .map(|c| c.iter().map(|p| p.name()).collect())
            .unwrap_or_default()
    }

    pub fn cached_port_count(&self) -> usize {
        self.port_cache.len()
    }

    pub fn dispatch(&self, state: &FlowState, conf: &AnalyzerRuntimeConfig) -> ParseOutcome {
        let Some(request) = state.request.as_ref() else {
            return ParseOutcome::ConnectFail;
        };
        let anchor = request.anchor();
        let port = anchor.port_dst;
        let param = ParseParam::from(anchor);

        if let Some(name) = conf.static_protocol(port) {
            let outcome = self
                .by_name
                .get(name)
                .and_then(|parser| self.parse_with(parser, state, &param));
            return outcome.unwrap_or_else(|| ParseOutcome::Transaction {
                protocol: name.to_owned(),
                attributes: AttributeMap::new(),
            });
        }

        let cached = self.port_cache.get(&port).map(|c| c.value().clone());
        for parser in cached.iter().flatten() {
            if !parser.parsable_on(param.l4_protocol) {
                continue;
            }
            if let Some(outcome) = self.parse_with(parser, state, &param) {
                if parser.is_generic()
                    && parser.add_port_match_count(port) == CACHE_RESET_THRESHOLD
                {
                    parser.reset_port_match_count(port);
                    self.remove_cached_parser(port, parser);
                    debug!("port {} no longer defaults to {}", port, parser.name());
                }
                return outcome;
            }
        }

        for parser in self.parsers.iter() {
            if !parser.parsable_on(param.l4_protocol) {
                continue;
            }
            if let Some(outcome) = self.parse_with(parser, state, &param) {
                if parser.add_port_match_count(port) == CACHE_ADD_THRESHOLD {
                    self.add_cached_parser(port, parser);
                    debug!("port {} cached with {}", port, parser.name());
                }
                return outcome;
            }
        }

        ParseOutcome::Transaction {
            protocol: L7Protocol::NOSUPPORT.to_owned(),
            attributes: AttributeMap::new(),
        }
    }

    fn parse_with(
        &self,
        parser: &ProtocolParser,
        state: &FlowState,
        param: &ParseParam,
    ) -> Option<ParseOutcome> {
        let request = state.request.as_ref()?;
        if parser.multi_requests() {
            return self.parse_multi_requests(parser, request, state.response.as_ref(), param);
        }

        let attributes = parser.parse_request(request.data(), param).ok()?;
        let attributes = match state.response.as_ref() {
            Some(response) => parser
                .parse_response(response.data(), param, &attributes)
                .ok()?,
            None => attributes,
        };
        Some(ParseOutcome::Transaction {
            protocol: parser.name().to_owned(),
            attributes,
        })
    }

    // Every request and response fragment must parse, a response that pairs
    // with no request fails the whole flow.
    fn parse_multi_requests(
        &self,
        parser: &ProtocolParser,
        request: &EventAccumulator,
        response: Option<&EventAccumulator>,
        param: &ParseParam,
    ) -> Option<ParseOutcome> {
        let requests = request
            .events()
            .iter()
            .map(|evt| parser.parse_request(&evt.payload, param).ok())
            .collect::<Option<Vec<_>>>()?;

        let mut matched = vec![false; requests.len()];
        let mut pairs = vec![];
        for evt in response.map(|r| r.events()).unwrap_or_default() {
            let attributes = parser
                .parse_response(&evt.payload, param, &AttributeMap::new())
                .ok()?;
            let index = parser.pair_match(&requests, &attributes)?;
            matched[index] = true;
            pairs.push(MessagePair {
                request: request.events()[index].clone(),
                response: Some(evt.clone()),
                attributes,
            });
        }
        for (index, attributes) in requests.into_iter().enumerate() {
            if !matched[index] {
                pairs.push(MessagePair {
                    request: request.events()[index].clone(),
                    response: None,
                    attributes,
                });
            }
        }

        Some(ParseOutcome::Pairs {
            protocol: parser.name().to_owned(),
            pairs,
        })
    }

    // generic stays last in a port cache
    fn add_cached_parser(&self, port: u16, parser: &Arc<ProtocolParser>) {
        let mut cached = self.port_cache.entry(port).or_default();
        if cached.iter().any(|p| Arc::ptr_eq(p, parser)) {
            return;
        }
        cached.push(parser.clone());
        if let Some(index) = cached.iter().position(|p| p.is_generic()) {
            let generic = cached.remove(index);
            cached.push(generic);
        }
    }

    fn remove_cached_parser(&self, port: u16, parser: &Arc<ProtocolParser>) {
        if let Some(mut cached) = self.port_cache.get_mut(&port) {
            cached.retain(|p| !Arc::ptr_eq(p, parser));
        }
        self.port_cache.remove_if(&port, |_, cached| cached.is_empty());
    }
}
