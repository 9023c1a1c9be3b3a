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

use num_enum::FromPrimitive;
use serde::Serialize;

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Hash, Eq, FromPrimitive, num_enum::Default)]
#[repr(u8)]
pub enum L7Protocol {
    #[num_enum(default)]
    Unknown = 0,
    // generic parser, matches any payload
    Other = 1,

    // HTTP
    Http1 = 20,

    // RPC
    Dubbo = 40,

    // SQL
    MySQL = 60,

    // NoSQL
    Redis = 80,

    // MQ
    Kafka = 100,

    // INFRA
    DNS = 120,

    Max = 255,
}

impl L7Protocol {
    pub const NOSUPPORT: &'static str = "NOSUPPORT";

    pub fn as_str(&self) -> &'static str {
        match self {
            L7Protocol::Http1 => "http",
            L7Protocol::Dubbo => "dubbo",
            L7Protocol::MySQL => "mysql",
            L7Protocol::Redis => "redis",
            L7Protocol::Kafka => "kafka",
            L7Protocol::DNS => "dns",
            L7Protocol::Other => Self::NOSUPPORT,
            L7Protocol::Unknown | L7Protocol::Max => "unknown",
        }
    }
}

impl TryFrom<&str> for L7Protocol {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.to_ascii_lowercase().as_str() {
            "http" => Ok(L7Protocol::Http1),
            "dubbo" => Ok(L7Protocol::Dubbo),
            "mysql" => Ok(L7Protocol::MySQL),
            "redis" => Ok(L7Protocol::Redis),
            "kafka" => Ok(L7Protocol::Kafka),
            "dns" => Ok(L7Protocol::DNS),
            "nosupport" => Ok(L7Protocol::Other),
            _ => Err(format!("unknown protocol {}", value)),
        }
    }
}
