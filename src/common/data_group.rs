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

use serde::Serialize;

use super::{
    attribute_map::AttributeMap,
    consts::{ErrorType, ERROR_TYPE, IS_ERROR, IS_SLOW, PROTOCOL},
};

// nanoseconds for times, bytes for io, -1 when the phase never happened
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct RequestMetrics {
    pub connect_time: i64,
    pub request_sent_time: i64,
    pub waiting_ttfb_time: i64,
    pub content_download_time: i64,
    pub request_total_time: i64,
    pub request_io: i64,
    pub response_io: i64,
}

/// One emitted transaction record.
#[derive(Clone, Debug, Serialize)]
pub struct DataGroup {
    pub name: &'static str,
    pub metrics: RequestMetrics,
    pub labels: AttributeMap,
    pub timestamp: u64,
}

impl DataGroup {
    pub fn is_error(&self) -> bool {
        self.labels.get_bool(IS_ERROR)
    }

    pub fn is_slow(&self) -> bool {
        self.labels.get_bool(IS_SLOW)
    }

    pub fn error_type(&self) -> ErrorType {
        self.labels
            .get_int(ERROR_TYPE)
            .and_then(|v| u8::try_from(v).ok())
            .and_then(|v| ErrorType::try_from(v).ok())
            .unwrap_or_default()
    }

    pub fn protocol(&self) -> &str {
        self.labels.get_str(PROTOCOL).unwrap_or_default()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
