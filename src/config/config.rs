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

use std::{fs, path::Path, time::Duration};

use log::warn;
use serde::Deserialize;
use thiserror::Error;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(100);
// used when connect-timeout is configured as zero
pub const MIN_CONNECT_TIMEOUT: Duration = Duration::from_secs(1);
pub const DEFAULT_FD_REUSE_TIMEOUT: Duration = Duration::from_secs(15);
pub const DEFAULT_NO_RESPONSE_THRESHOLD: Duration = Duration::from_secs(120);
pub const DEFAULT_RESPONSE_SLOW_THRESHOLD: Duration = Duration::from_millis(500);
pub const DEFAULT_MAX_PAYLOAD_LENGTH: usize = 1024;
pub const DEFAULT_CONNTRACK_MAX_STATE_SIZE: usize = 131072;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("yaml config invalid: {0}")]
    YamlConfigInvalid(String),
    #[error("protocol-config has an entry without key")]
    ProtocolKeyEmpty,
    #[error("protocol-config key {0} is duplicated")]
    ProtocolKeyDuplicated(String),
}

#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UrlClusteringMethod {
    // keep only alphabetic path segments, replace the rest with '*'
    #[default]
    Alphabet,
    // strip the query string only
    NoParam,
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default, rename_all = "kebab-case")]
pub struct ProtocolConfig {
    pub key: String,
    // destination ports statically bound to this protocol
    pub ports: Vec<u16>,
    // length of the payload summary label, 0 means the built-in default
    pub payload_length: usize,
    // zero falls back to response-slow-threshold
    #[serde(with = "humantime_serde")]
    pub slow_threshold: Duration,
    // excluded from the parser scan, only reachable through static ports
    pub disable_discern: bool,
}

impl ProtocolConfig {
    fn new(key: &str, ports: &[u16], payload_length: usize, slow_threshold_ms: u64) -> Self {
        Self {
            key: key.to_owned(),
            ports: ports.to_vec(),
            payload_length,
            slow_threshold: Duration::from_millis(slow_threshold_ms),
            disable_discern: false,
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, rename_all = "kebab-case")]
pub struct AnalyzerConfig {
    pub enable_timeout_check: bool,
    #[serde(with = "humantime_serde")]
    pub connect_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub fd_reuse_timeout: Duration,
    #[serde(with = "humantime_serde")]
    pub no_response_threshold: Duration,
    #[serde(with = "humantime_serde")]
    pub response_slow_threshold: Duration,
    pub max_payload_length: usize,

    pub enable_conntrack: bool,
    pub conntrack_max_state_size: usize,

    pub protocol_parser: Vec<String>,
    pub protocol_config: Vec<ProtocolConfig>,
    pub url_clustering_method: UrlClusteringMethod,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            enable_timeout_check: true,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            fd_reuse_timeout: DEFAULT_FD_REUSE_TIMEOUT,
            no_response_threshold: DEFAULT_NO_RESPONSE_THRESHOLD,
            response_slow_threshold: DEFAULT_RESPONSE_SLOW_THRESHOLD,
            max_payload_length: DEFAULT_MAX_PAYLOAD_LENGTH,
            enable_conntrack: true,
            conntrack_max_state_size: DEFAULT_CONNTRACK_MAX_STATE_SIZE,
            protocol_parser: vec![
                "http".to_owned(),
                "mysql".to_owned(),
                "dns".to_owned(),
                "redis".to_owned(),
            ],
            protocol_config: vec![
                ProtocolConfig::new("http", &[], 200, 0),
                ProtocolConfig::new("dubbo", &[], 200, 0),
                ProtocolConfig::new("mysql", &[3306], 0, 100),
                ProtocolConfig::new("kafka", &[9092], 0, 100),
                ProtocolConfig::new("dns", &[53], 0, 100),
                ProtocolConfig::new("cassandra", &[9042], 0, 100),
                ProtocolConfig::new("s3", &[9190], 0, 100),
            ],
            url_clustering_method: UrlClusteringMethod::Alphabet,
        }
    }
}

impl AnalyzerConfig {
    pub fn load_from_file<T: AsRef<Path>>(path: T) -> Result<Self, ConfigError> {
        let contents =
            fs::read_to_string(path).map_err(|e| ConfigError::YamlConfigInvalid(e.to_string()))?;
        Self::load(&contents)
    }

    pub fn load<C: AsRef<str>>(contents: C) -> Result<Self, ConfigError> {
        let contents = contents.as_ref();
        if contents.trim().is_empty() {
            // parsing empty string leads to EOF error
            return Ok(Self::default());
        }
        let mut cfg: Self = serde_yaml::from_str(contents)
            .map_err(|e| ConfigError::YamlConfigInvalid(e.to_string()))?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&mut self) -> Result<(), ConfigError> {
        if self.connect_timeout.is_zero() {
            self.connect_timeout = MIN_CONNECT_TIMEOUT;
        }
        if self.fd_reuse_timeout.is_zero() {
            self.fd_reuse_timeout = DEFAULT_FD_REUSE_TIMEOUT;
        }
        if self.no_response_threshold.is_zero() {
            self.no_response_threshold = DEFAULT_NO_RESPONSE_THRESHOLD;
        }
        if self.response_slow_threshold.is_zero() {
            self.response_slow_threshold = DEFAULT_RESPONSE_SLOW_THRESHOLD;
        }
        if self.max_payload_length == 0 {
            self.max_payload_length = DEFAULT_MAX_PAYLOAD_LENGTH;
        }
        if self.conntrack_max_state_size == 0 {
            self.conntrack_max_state_size = DEFAULT_CONNTRACK_MAX_STATE_SIZE;
        }
        if self.fd_reuse_timeout > self.no_response_threshold {
            warn!(
                "fd-reuse-timeout {:?} is larger than no-response-threshold {:?}",
                self.fd_reuse_timeout, self.no_response_threshold
            );
        }

        for p in self.protocol_parser.iter_mut() {
            *p = p.to_ascii_lowercase();
        }
        let mut keys = Vec::with_capacity(self.protocol_config.len());
        for c in self.protocol_config.iter_mut() {
            if c.key.is_empty() {
                return Err(ConfigError::ProtocolKeyEmpty);
            }
            c.key = c.key.to_ascii_lowercase();
            if keys.contains(&c.key) {
                return Err(ConfigError::ProtocolKeyDuplicated(c.key.clone()));
            }
            keys.push(c.key.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn empty_is_default() {
        assert_eq!(AnalyzerConfig::load("").unwrap(), AnalyzerConfig::default());
    }

    #[test]
    fn parse_yaml() {
        let yaml = r#"
connect-timeout: 0s
fd-reuse-timeout: 20s
response-slow-threshold: 800ms
protocol-parser: [HTTP, dns]
url-clustering-method: noparam
protocol-config:
  - key: Redis
    ports: [6379, 6380]
    slow-threshold: 50ms
  - key: http
    payload-length: 120
    disable-discern: true
"#;
        let cfg = AnalyzerConfig::load(yaml).unwrap();
        assert_eq!(cfg.connect_timeout, MIN_CONNECT_TIMEOUT);
        assert_eq!(cfg.fd_reuse_timeout, Duration::from_secs(20));
        assert_eq!(cfg.no_response_threshold, DEFAULT_NO_RESPONSE_THRESHOLD);
        assert_eq!(cfg.response_slow_threshold, Duration::from_millis(800));
        assert_eq!(cfg.protocol_parser, vec!["http", "dns"]);
        assert_eq!(cfg.url_clustering_method, UrlClusteringMethod::NoParam);
        assert_eq!(cfg.protocol_config.len(), 2);
        assert_eq!(cfg.protocol_config[0].key, "redis");
        assert_eq!(cfg.protocol_config[0].ports, vec![6379, 6380]);
        assert_eq!(
            cfg.protocol_config[0].slow_threshold,
            Duration::from_millis(50)
        );
        assert!(cfg.protocol_config[1].disable_discern);
    }

    #[test]
    fn duplicated_protocol_key() {
        let yaml = r#"
protocol-config:
  - key: http
  - key: HTTP
"#;
        assert!(matches!(
            AnalyzerConfig::load(yaml),
            Err(ConfigError::ProtocolKeyDuplicated(_))
        ));
    }

    #[test]
    fn invalid_yaml() {
        assert!(matches!(
            AnalyzerConfig::load("connect-timeout: [1"),
            Err(ConfigError::YamlConfigInvalid(_))
        ));
    }

    #[test]
    fn load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "max-payload-length: 64").unwrap();
        let cfg = AnalyzerConfig::load_from_file(file.path()).unwrap();
        assert_eq!(cfg.max_payload_length, 64);
        assert!(AnalyzerConfig::load_from_file("/nonexistent/analyzer.yaml").is_err());
    }
}
