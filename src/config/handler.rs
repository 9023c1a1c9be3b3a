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

use ahash::{AHashMap, AHashSet};
use arc_swap::ArcSwap;
use log::info;

use super::config::{AnalyzerConfig, UrlClusteringMethod};

// payload summary length for protocols without payload-length
pub const DEFAULT_PAYLOAD_SUMMARY_LENGTH: usize = 80;

pub type AnalyzerAccess = Arc<ArcSwap<AnalyzerRuntimeConfig>>;

/// Lookup-ready form of `AnalyzerConfig`, swapped atomically on update.
#[derive(Clone, Debug, PartialEq)]
pub struct AnalyzerRuntimeConfig {
    pub enable_timeout_check: bool,
    pub connect_timeout: Duration,
    pub fd_reuse_timeout: Duration,
    pub no_response_threshold: Duration,
    pub response_slow_threshold: Duration,
    pub max_payload_length: usize,

    pub enable_conntrack: bool,
    pub conntrack_max_state_size: usize,

    pub protocol_parser: Vec<String>,
    pub url_clustering_method: UrlClusteringMethod,

    static_ports: AHashMap<u16, String>,
    slow_thresholds: AHashMap<String, Duration>,
    payload_lengths: AHashMap<String, usize>,
    discern_disabled: AHashSet<String>,
}

impl From<&AnalyzerConfig> for AnalyzerRuntimeConfig {
    fn from(conf: &AnalyzerConfig) -> Self {
        let mut static_ports = AHashMap::new();
        let mut slow_thresholds = AHashMap::new();
        let mut payload_lengths = AHashMap::new();
        let mut discern_disabled = AHashSet::new();
        for c in conf.protocol_config.iter() {
            for port in c.ports.iter() {
                static_ports.insert(*port, c.key.clone());
            }
            if !c.slow_threshold.is_zero() {
                slow_thresholds.insert(c.key.clone(), c.slow_threshold);
            }
            if c.payload_length > 0 {
                payload_lengths.insert(c.key.clone(), c.payload_length);
            }
            if c.disable_discern {
                discern_disabled.insert(c.key.clone());
            }
        }

        Self {
            enable_timeout_check: conf.enable_timeout_check,
            connect_timeout: conf.connect_timeout,
            fd_reuse_timeout: conf.fd_reuse_timeout,
            no_response_threshold: conf.no_response_threshold,
            response_slow_threshold: conf.response_slow_threshold,
            max_payload_length: conf.max_payload_length,
            enable_conntrack: conf.enable_conntrack,
            conntrack_max_state_size: conf.conntrack_max_state_size,
            protocol_parser: conf.protocol_parser.clone(),
            url_clustering_method: conf.url_clustering_method,
            static_ports,
            slow_thresholds,
            payload_lengths,
            discern_disabled,
        }
    }
}

impl Default for AnalyzerRuntimeConfig {
    fn default() -> Self {
        Self::from(&AnalyzerConfig::default())
    }
}

impl AnalyzerRuntimeConfig {
    pub fn static_protocol(&self, port: u16) -> Option<&str> {
        self.static_ports.get(&port).map(|s| s.as_str())
    }

    pub fn slow_threshold(&self, protocol: &str) -> Duration {
        self.slow_thresholds
            .get(protocol)
            .copied()
            .unwrap_or(self.response_slow_threshold)
    }

    pub fn payload_length(&self, protocol: &str) -> usize {
        self.payload_lengths
            .get(protocol)
            .copied()
            .unwrap_or(DEFAULT_PAYLOAD_SUMMARY_LENGTH)
    }

    pub fn is_discern_disabled(&self, protocol: &str) -> bool {
        self.discern_disabled.contains(protocol)
    }
}

pub fn new_access(conf: &AnalyzerConfig) -> AnalyzerAccess {
    Arc::new(ArcSwap::from_pointee(AnalyzerRuntimeConfig::from(conf)))
}

// Parser selection is fixed when the analyzer is built, only timeouts,
// thresholds and payload lengths follow updates.
pub fn update_access(access: &AnalyzerAccess, conf: &AnalyzerConfig) {
    let new = AnalyzerRuntimeConfig::from(conf);
    let old = access.load();
    if old.protocol_parser != new.protocol_parser
        || old.url_clustering_method != new.url_clustering_method
    {
        info!("protocol-parser and url-clustering-method changes take effect after restart");
    }
    if **old != new {
        info!("analyzer config updated");
        access.store(Arc::new(new));
    }
}
