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

/// HTTP constants
pub const HTTP_MIN_LEN: usize = 14;
pub const HTTP_METHOD_MAX_LEN: usize = 8; // OPTIONS/CONNECT
pub const HTTP_VERSION_MAX_LEN: usize = 9;
pub const HTTP_STATUS_MAX_LEN: usize = 6;
pub const HTTP_V1_0_VERSION: &str = "HTTP/1.0";
pub const HTTP_V1_1_VERSION: &str = "HTTP/1.1";
pub const HTTP_METHODS: [&str; 8] = [
    "GET", "POST", "PUT", "DELETE", "HEAD", "TRACE", "OPTIONS", "CONNECT",
];
pub const HTTP_STATUS_CODE_MIN: i64 = 99;
pub const HTTP_STATUS_CODE_MAX: i64 = 999;
pub const HTTP_STATUS_CLIENT_ERROR_MIN: i64 = 400;
pub const HTTP_STATUS_CONTINUE: i64 = 100;

// APM trace headers, lowercase
pub const TRACE_HEADER_SKYWALKING: &str = "sw8";
pub const TRACE_HEADER_HARMONYCLOUD: &str = "apm-transactionid";
pub const TRACE_HEADER_ZIPKIN: &str = "x-b3-traceid";
pub const TRACE_HEADER_JAEGER: &str = "uber-trace-id";
pub const TRACE_HEADER_W3C_PARENT: &str = "traceparent";
pub const TRACE_HEADER_W3C_RESPONSE: &str = "traceresponse";
// "00-" + 32 hex trace id
pub const W3C_TRACE_ID_MIN_LEN: usize = 35;

// url clustering
pub const URL_SEGMENT_MAX_LEN: usize = 25;
pub const URL_WILDCARD: &str = "*";

// Mysql constants
pub const HEADER_LEN: usize = 4;
pub const NUMBER_OFFSET: usize = 3;
pub const COMMAND_OFFSET: usize = HEADER_LEN;
pub const MYSQL_REQUEST_MIN_LEN: usize = 5;
pub const MYSQL_RESPONSE_MIN_LEN: usize = 6;

pub const COM_QUERY: u8 = 3;
pub const COM_STMT_PREPARE: u8 = 22;

pub const MYSQL_RESPONSE_CODE_OK: u8 = 0;
pub const MYSQL_RESPONSE_CODE_ERR: u8 = 0xff;
pub const MYSQL_RESPONSE_CODE_EOF: u8 = 0xfe;

pub const ERROR_CODE_OFFSET: usize = COMMAND_OFFSET + 1;
pub const SQL_STATE_MARKER_OFFSET: usize = ERROR_CODE_OFFSET + 2;
pub const SQL_STATE_MARKER: u8 = b'#';
pub const SQL_STATE_LEN: usize = 5;

pub const SQL_KEYWORDS: [&str; 17] = [
    "select", "insert", "update", "delete", "replace", "drop", "create", "alter", "truncate",
    "set", "show", "use", "begin", "commit", "rollback", "call", "explain",
];

// Redis constants
pub const REDIS_ARRAY: u8 = b'*';
pub const REDIS_BULK_STRING: u8 = b'$';
pub const REDIS_SIMPLE_STRING: u8 = b'+';
pub const REDIS_ERROR: u8 = b'-';
pub const REDIS_INTEGER: u8 = b':';
pub const REDIS_COMMAND_MAX_LEN: usize = 256;

// dns constants
pub const DNS_TCP_PAYLOAD_OFFSET: usize = 2;
pub const DNS_HEADER_SIZE: usize = 12;
pub const DNS_HEADER_FLAGS_OFFSET: usize = 2;
pub const DNS_HEADER_QDCOUNT_OFFSET: usize = 4;
pub const DNS_HEADER_ANCOUNT_OFFSET: usize = 6;
pub const DNS_OPCODE_MAX: u16 = 2;
pub const DNS_RCODE_MAX: u16 = 5;

pub const DNS_NAME_COMPRESS_POINTER: u8 = 0xc0;
pub const DNS_NAME_TAIL: u8 = 0x00;
pub const DNS_NAME_MAX_SIZE: usize = 255;
pub const DNS_NAME_MAX_JUMPS: usize = 16;
pub const QUESTION_CLASS_TYPE_SIZE: usize = 4;
// type(2) class(2) ttl(4) rdlength(2)
pub const RR_DATALENGTH_OFFSET: usize = 8;
pub const RR_RDATA_OFFSET: usize = 10;

pub const DNS_TYPE_A: u16 = 1;
pub const DNS_TYPE_AAAA: u16 = 28;
pub const DOMAIN_NAME_SPLIT: char = ',';
