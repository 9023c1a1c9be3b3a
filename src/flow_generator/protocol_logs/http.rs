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

use std::str;

use ahash::AHashMap;
use base64::{engine::general_purpose::STANDARD, Engine};
use public::l7_protocol::L7Protocol;

use super::{consts::*, url_clustering, L7ProtocolParserInterface, ParseParam};
use crate::{
    common::{
        attribute_map::AttributeMap,
        consts::{
            CONTENT_KEY, ERROR_TYPE, HTTP_APM_TRACE_ID, HTTP_APM_TRACE_TYPE, HTTP_CONTINUE,
            HTTP_METHOD, HTTP_STATUS_CODE, HTTP_URL, IS_ERROR,
        },
        ErrorType,
    },
    config::UrlClusteringMethod,
    flow_generator::error::{Error, Result},
};

/// HTTP/1.x request line, response status line and APM trace headers.
#[derive(Clone, Debug, Default)]
pub struct HttpLog {
    url_clustering: UrlClusteringMethod,
}

impl HttpLog {
    pub fn new(url_clustering: UrlClusteringMethod) -> Self {
        Self { url_clustering }
    }

    fn set_trace(attributes: &mut AttributeMap, headers: &AHashMap<String, &str>) {
        if let Some((trace_type, trace_id)) = trace_info(headers) {
            attributes.insert(HTTP_APM_TRACE_TYPE, trace_type);
            attributes.insert(HTTP_APM_TRACE_ID, trace_id);
        }
    }
}

impl L7ProtocolParserInterface for HttpLog {
    fn parse_request(&self, payload: &[u8], _: &ParseParam) -> Result<AttributeMap> {
        if payload.len() < HTTP_MIN_LEN {
            return Err(Error::HttpHeaderParseFailed);
        }
        let (method, offset) = read_until(payload, 0, HTTP_METHOD_MAX_LEN, |b| b == b' ')
            .ok_or(Error::HttpHeaderParseFailed)?;
        let method = check_http_method(method, payload.get(offset))?;
        let (url, _) = read_until(payload, offset, payload.len(), |b| b == b' ' || b == b'\r')
            .ok_or(Error::HttpHeaderParseFailed)?;
        let url = str::from_utf8(url)?;

        let content_key = match url_clustering::cluster(self.url_clustering, url) {
            key if key.is_empty() => URL_WILDCARD.to_owned(),
            key => key,
        };

        let mut attributes = AttributeMap::new();
        attributes.insert(HTTP_METHOD, method);
        attributes.insert(HTTP_URL, url);
        attributes.insert(CONTENT_KEY, content_key);
        Self::set_trace(&mut attributes, &parse_v1_headers(payload));
        Ok(attributes)
    }

    fn parse_response(
        &self,
        payload: &[u8],
        _: &ParseParam,
        request: &AttributeMap,
    ) -> Result<AttributeMap> {
        if payload.len() < HTTP_MIN_LEN {
            return Err(Error::HttpHeaderParseFailed);
        }
        let (version, offset) = read_until(payload, 0, HTTP_VERSION_MAX_LEN, |b| b == b' ')
            .ok_or(Error::HttpHeaderParseFailed)?;
        get_http_version(version)?;
        let (code, _) = read_until(payload, offset, HTTP_STATUS_MAX_LEN, |b| {
            b == b' ' || b == b'\r'
        })
        .ok_or(Error::HttpHeaderParseFailed)?;
        let status_code = str::from_utf8(code)?
            .parse::<i64>()
            .map_err(|_| Error::HttpHeaderParseFailed)?;
        let status_code =
            if (HTTP_STATUS_CODE_MIN..=HTTP_STATUS_CODE_MAX).contains(&status_code) {
                status_code
            } else {
                0
            };

        let mut attributes = request.clone();
        if !attributes.contains(HTTP_APM_TRACE_TYPE) {
            Self::set_trace(&mut attributes, &parse_v1_headers(payload));
        }
        attributes.insert(HTTP_STATUS_CODE, status_code);
        if status_code >= HTTP_STATUS_CLIENT_ERROR_MIN {
            attributes.insert(IS_ERROR, true);
            attributes.insert(ERROR_TYPE, ErrorType::ProtocolError as i64);
        } else if status_code == HTTP_STATUS_CONTINUE {
            attributes.insert(HTTP_CONTINUE, true);
        }
        Ok(attributes)
    }

    fn protocol(&self) -> L7Protocol {
        L7Protocol::Http1
    }

    fn parsable_on_udp(&self) -> bool {
        false
    }
}

// Bytes from `from` up to the first byte matching `stop`, scanning at most
// `max` bytes, and the offset right after the stop byte. A token running into
// the end of the payload is returned whole.
fn read_until(
    payload: &[u8],
    from: usize,
    max: usize,
    stop: impl Fn(u8) -> bool,
) -> Option<(&[u8], usize)> {
    let rest = payload.get(from..)?;
    match rest.iter().take(max + 1).position(|b| stop(*b)) {
        Some(0) => None,
        Some(n) => Some((&rest[..n], from + n + 1)),
        None if rest.len() <= max && !rest.is_empty() => Some((rest, payload.len())),
        None => None,
    }
}

// The first byte of a request is sometimes lost, "ET /" still reads as GET.
fn check_http_method<'a>(method: &'a [u8], next: Option<&u8>) -> Result<&'a str> {
    let method = str::from_utf8(method)?;
    if HTTP_METHODS.contains(&method) {
        return Ok(method);
    }
    if method == "ET" && next == Some(&b'/') {
        return Ok("GET");
    }
    Err(Error::HttpHeaderParseFailed)
}

fn get_http_version(version: &[u8]) -> Result<()> {
    match str::from_utf8(version)? {
        HTTP_V1_0_VERSION | HTTP_V1_1_VERSION => Ok(()),
        _ => Err(Error::HttpHeaderParseFailed),
    }
}

// Header lines after the start line, keys lowercased. Stops at the blank line
// or at the first line that is not valid utf8.
pub fn parse_v1_headers(payload: &[u8]) -> AHashMap<String, &str> {
    let mut headers = AHashMap::new();
    for line in payload.split(|b| *b == b'\n').skip(1) {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.is_empty() {
            break;
        }
        let Ok(line) = str::from_utf8(line) else {
            break;
        };
        if let Some((key, value)) = line.split_once(':') {
            headers.insert(key.trim().to_ascii_lowercase(), value.trim());
        }
    }
    headers
}

// sw8: 1-TRACEID-SEGMENTID-3-PARENT_SERVICE-PARENT_INSTANCE-PARENT_ENDPOINT-IPPORT
// TRACEID is base64 encoded
fn decode_skywalking_id(value: &str) -> Option<String> {
    let segs: Vec<&str> = value.split('-').collect();
    if segs.len() < 2 || segs[1].is_empty() {
        return None;
    }
    let id = match STANDARD.decode(segs[1]) {
        Ok(bytes) => String::from_utf8(bytes).unwrap_or_else(|_| segs[1].to_owned()),
        Err(_) => segs[1].to_owned(),
    };
    Some(id)
}

// uber-trace-id: TRACEID:SPANID:PARENTSPANID:FLAGS
fn decode_uber_id(value: &str) -> Option<String> {
    value
        .split(':')
        .next()
        .filter(|s| !s.is_empty())
        .map(str::to_owned)
}

// traceparent: 00-TRACEID-SPANID-01
fn decode_traceparent(value: &str) -> Option<String> {
    value.get(3..W3C_TRACE_ID_MIN_LEN).map(str::to_owned)
}

fn trace_info(headers: &AHashMap<String, &str>) -> Option<(&'static str, String)> {
    if let Some(id) = headers
        .get(TRACE_HEADER_SKYWALKING)
        .and_then(|v| decode_skywalking_id(v))
    {
        return Some(("skywalking", id));
    }
    if let Some(id) = headers.get(TRACE_HEADER_HARMONYCLOUD) {
        return Some(("harmonycloud", id.to_string()));
    }
    if let Some(id) = headers.get(TRACE_HEADER_ZIPKIN) {
        return Some(("zipkin", id.to_string()));
    }
    if let Some(id) = headers
        .get(TRACE_HEADER_JAEGER)
        .and_then(|v| decode_uber_id(v))
    {
        return Some(("jaeger", id));
    }
    headers
        .get(TRACE_HEADER_W3C_PARENT)
        .or_else(|| headers.get(TRACE_HEADER_W3C_RESPONSE))
        .and_then(|v| decode_traceparent(v))
        .map(|id| ("w3c", id))
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};

    use super::*;
    use crate::common::event::L4Protocol;

    fn param() -> ParseParam {
        ParseParam {
            l4_protocol: L4Protocol::Tcp,
            ip_src: IpAddr::V4(Ipv4Addr::LOCALHOST),
            ip_dst: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port_src: 40000,
            port_dst: 8080,
        }
    }

    fn http() -> HttpLog {
        HttpLog::new(UrlClusteringMethod::Alphabet)
    }

    #[test]
    fn request_line() {
        let attrs = http()
            .parse_request(
                b"GET /api/users/42?verbose=1 HTTP/1.1\r\nHost: a\r\n\r\n",
                &param(),
            )
            .unwrap();
        assert_eq!(attrs.get_str(HTTP_METHOD), Some("GET"));
        assert_eq!(attrs.get_str(HTTP_URL), Some("/api/users/42?verbose=1"));
        assert_eq!(attrs.get_str(CONTENT_KEY), Some("/api/users/*"));
        assert!(!attrs.contains(HTTP_APM_TRACE_TYPE));
    }

    #[test]
    fn truncated_method() {
        let attrs = http()
            .parse_request(b"ET /index HTTP/1.1\r\n\r\n", &param())
            .unwrap();
        assert_eq!(attrs.get_str(HTTP_METHOD), Some("GET"));
    }

    #[test]
    fn reject_request() {
        let p = param();
        assert!(http().parse_request(b"GET / HTTP/1", &p).is_err());
        assert!(http().parse_request(b"FETCH /a HTTP/1.1\r\n\r\n", &p).is_err());
        assert!(http().parse_request(b"HTTP/1.1 200 OK\r\n\r\n", &p).is_err());
        assert!(http().parse_request(&[0x03u8; 32], &p).is_err());
    }

    #[test]
    fn status_line() {
        let request = http()
            .parse_request(b"POST /login HTTP/1.1\r\n\r\n", &param())
            .unwrap();
        let attrs = http()
            .parse_response(b"HTTP/1.1 200 OK\r\nServer: x\r\n\r\n", &param(), &request)
            .unwrap();
        assert_eq!(attrs.get_int(HTTP_STATUS_CODE), Some(200));
        assert_eq!(attrs.get_str(HTTP_METHOD), Some("POST"));
        assert!(!attrs.get_bool(IS_ERROR));

        let attrs = http()
            .parse_response(b"HTTP/1.0 503 Unavailable\r\n\r\n", &param(), &request)
            .unwrap();
        assert_eq!(attrs.get_int(HTTP_STATUS_CODE), Some(503));
        assert!(attrs.get_bool(IS_ERROR));
        assert_eq!(
            attrs.get_int(ERROR_TYPE),
            Some(ErrorType::ProtocolError as i64)
        );
    }

    #[test]
    fn status_out_of_range() {
        let attrs = http()
            .parse_response(b"HTTP/1.1 1000 Odd\r\n\r\n", &param(), &AttributeMap::new())
            .unwrap();
        assert_eq!(attrs.get_int(HTTP_STATUS_CODE), Some(0));
        assert!(http()
            .parse_response(b"HTTP/1.1 abc Odd\r\n\r\n", &param(), &AttributeMap::new())
            .is_err());
        assert!(http()
            .parse_response(b"HTTP/2.0 200 OK\r\n\r\n", &param(), &AttributeMap::new())
            .is_err());
    }

    #[test]
    fn continue_response() {
        let attrs = http()
            .parse_response(b"HTTP/1.1 100 Continue\r\n\r\n", &param(), &AttributeMap::new())
            .unwrap();
        assert!(attrs.get_bool(HTTP_CONTINUE));
        assert!(!attrs.get_bool(IS_ERROR));
    }

    #[test]
    fn trace_headers() {
        let cases: [(&[u8], &str, &str); 5] = [
            (
                b"GET / HTTP/1.1\r\nsw8: 1-dHJhY2UtaWQ=-c2VnbWVudA==-3-a-b-c-d\r\n\r\n",
                "skywalking",
                "trace-id",
            ),
            (
                b"GET / HTTP/1.1\r\nApm-TransactionID: abc\r\n\r\n",
                "harmonycloud",
                "abc",
            ),
            (
                b"GET / HTTP/1.1\r\nX-B3-TraceId: 80f198ee56343ba8\r\n\r\n",
                "zipkin",
                "80f198ee56343ba8",
            ),
            (
                b"GET / HTTP/1.1\r\nuber-trace-id: 5e9a:1:0:1\r\n\r\n",
                "jaeger",
                "5e9a",
            ),
            (
                b"GET / HTTP/1.1\r\ntraceparent: 00-4bf92f3577b34da6a3ce929d0e0e4736-00f067aa0ba902b7-01\r\n\r\n",
                "w3c",
                "4bf92f3577b34da6a3ce929d0e0e4736",
            ),
        ];
        for (payload, trace_type, trace_id) in cases {
            let attrs = http().parse_request(payload, &param()).unwrap();
            assert_eq!(attrs.get_str(HTTP_APM_TRACE_TYPE), Some(trace_type));
            assert_eq!(attrs.get_str(HTTP_APM_TRACE_ID), Some(trace_id));
        }
    }

    #[test]
    fn response_trace_kept_from_request() {
        let request = http()
            .parse_request(b"GET / HTTP/1.1\r\nX-B3-TraceId: aaa\r\n\r\n", &param())
            .unwrap();
        let attrs = http()
            .parse_response(
                b"HTTP/1.1 200 OK\r\ntraceresponse: 00-4bf92f3577b34da6a3ce929d0e0e4736-00-01\r\n\r\n",
                &param(),
                &request,
            )
            .unwrap();
        assert_eq!(attrs.get_str(HTTP_APM_TRACE_TYPE), Some("zipkin"));
        assert_eq!(attrs.get_str(HTTP_APM_TRACE_ID), Some("aaa"));
    }
}
