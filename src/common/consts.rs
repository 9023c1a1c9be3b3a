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

use num_enum::TryFromPrimitive;
use serde::Serialize;

pub const NET_REQUEST_METRIC_GROUP_NAME: &str = "net_request_metric_group";

// labels
pub const PID: &str = "pid";
pub const REQUEST_TID: &str = "request_tid";
pub const RESPONSE_TID: &str = "response_tid";
pub const COMM: &str = "comm";
pub const CONTAINER_ID: &str = "container_id";
pub const SRC_IP: &str = "src_ip";
pub const SRC_PORT: &str = "src_port";
pub const DST_IP: &str = "dst_ip";
pub const DST_PORT: &str = "dst_port";
pub const DNAT_IP: &str = "dnat_ip";
pub const DNAT_PORT: &str = "dnat_port";
pub const IS_SERVER: &str = "is_server";
pub const IS_ERROR: &str = "is_error";
pub const ERROR_TYPE: &str = "error_type";
pub const ERROR_KIND: &str = "error_kind";
pub const IS_SLOW: &str = "is_slow";
pub const PROTOCOL: &str = "protocol";
pub const END_TIMESTAMP: &str = "end_timestamp";
pub const REQUEST_PAYLOAD: &str = "request_payload";
pub const RESPONSE_PAYLOAD: &str = "response_payload";
pub const CONTENT_KEY: &str = "content_key";

// http
pub const HTTP_METHOD: &str = "http_method";
pub const HTTP_URL: &str = "http_url";
pub const HTTP_STATUS_CODE: &str = "http_status_code";
pub const HTTP_CONTINUE: &str = "http_continue";
pub const HTTP_APM_TRACE_TYPE: &str = "trace_type";
pub const HTTP_APM_TRACE_ID: &str = "trace_id";

// dns
pub const DNS_ID: &str = "dns_id";
pub const DNS_DOMAIN: &str = "dns_domain";
pub const DNS_RCODE: &str = "dns_rcode";
pub const DNS_IP: &str = "dns_ip";

// sql
pub const SQL: &str = "sql";
pub const SQL_ERROR_CODE: &str = "sql_error_code";
pub const SQL_ERROR_MSG: &str = "sql_error_msg";

// redis
pub const REDIS_COMMAND: &str = "redis_command";
pub const REDIS_ERROR_MSG: &str = "redis_error_msg";

pub const STR_EMPTY: &str = "";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, TryFromPrimitive)]
#[repr(u8)]
pub enum ErrorType {
    #[default]
    NoError = 0,
    ConnectFail = 1,
    NoResponse = 2,
    ProtocolError = 3,
}

impl ErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorType::NoError => "NoError",
            ErrorType::ConnectFail => "ConnectFail",
            ErrorType::NoResponse => "NoResponse",
            ErrorType::ProtocolError => "ProtocolError",
        }
    }
}
