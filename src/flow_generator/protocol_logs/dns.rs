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

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use public::{bytes::read_u16_be, l7_protocol::L7Protocol};

use super::{consts::*, L7ProtocolParserInterface, ParseParam};
use crate::{
    common::{
        attribute_map::AttributeMap,
        consts::{DNS_DOMAIN, DNS_ID, DNS_IP, DNS_RCODE, ERROR_TYPE, IS_ERROR},
        event::L4Protocol,
        ErrorType,
    },
    flow_generator::error::{Error, Result},
};

fn parse_failed<S: Into<String>>(msg: S) -> Error {
    Error::DNSLogParseFailed(msg.into())
}

struct DnsHeader {
    id: u16,
    qr: u16,
    opcode: u16,
    rcode: u16,
    qd_count: u16,
    an_count: u16,
}

impl DnsHeader {
    fn parse(payload: &[u8]) -> Result<Self> {
        if payload.len() <= DNS_HEADER_SIZE {
            return Err(parse_failed(format!(
                "dns payload length too short:{}",
                payload.len()
            )));
        }
        let read = |offset: usize| read_u16_be(&payload[offset..]).unwrap_or_default();
        let flags = read(DNS_HEADER_FLAGS_OFFSET);
        Ok(Self {
            id: read(0),
            qr: flags >> 15,
            opcode: (flags >> 11) & 0xf,
            rcode: flags & 0xf,
            qd_count: read(DNS_HEADER_QDCOUNT_OFFSET),
            an_count: read(DNS_HEADER_ANCOUNT_OFFSET),
        })
    }
}

/// DNS over UDP, or over TCP with its two byte length prefix.
///
/// Several queries may share one flow, responses are paired with their query
/// by transaction id.
#[derive(Clone, Debug, Default)]
pub struct DnsLog;

impl DnsLog {
    fn message<'a>(&self, payload: &'a [u8], param: &ParseParam) -> &'a [u8] {
        match param.l4_protocol {
            L4Protocol::Tcp if payload.len() > DNS_TCP_PAYLOAD_OFFSET => {
                &payload[DNS_TCP_PAYLOAD_OFFSET..]
            }
            _ => payload,
        }
    }

    // Returns the name and the offset right after it at `g_offset`,
    // compression pointers are followed but never advance that offset.
    fn decode_name(&self, payload: &[u8], g_offset: usize) -> Result<(String, usize)> {
        let mut index = g_offset;
        let mut end = None;
        let mut jumps = 0;
        let mut buffer = String::new();

        loop {
            let label = *payload
                .get(index)
                .ok_or_else(|| parse_failed(format!("dns name invalid index: {}", index)))?;
            if label == DNS_NAME_TAIL {
                return Ok((buffer, end.unwrap_or(index + 1)));
            }
            match label & 0xc0 {
                DNS_NAME_COMPRESS_POINTER => {
                    let index_ptr = read_u16_be(&payload[index..])
                        .ok_or_else(|| parse_failed(format!("dns name invalid index: {}", index)))?
                        as usize
                        & 0x3fff;
                    if index_ptr >= index {
                        return Err(parse_failed(format!(
                            "dns name compress pointer invalid: {}",
                            index_ptr
                        )));
                    }
                    jumps += 1;
                    if jumps > DNS_NAME_MAX_JUMPS {
                        return Err(parse_failed("dns name too many compress pointers"));
                    }
                    end.get_or_insert(index + 2);
                    index = index_ptr;
                }
                0 => {
                    let size = index + 1 + label as usize;
                    let s = payload
                        .get(index + 1..size)
                        .ok_or_else(|| parse_failed(format!("dns name invalid index: {}", size)))?;
                    if !buffer.is_empty() {
                        buffer.push('.');
                    }
                    match std::str::from_utf8(s) {
                        Ok(s) => buffer.push_str(s),
                        Err(e) => return Err(parse_failed(format!("decode name error {}", e))),
                    }
                    if buffer.len() > DNS_NAME_MAX_SIZE {
                        return Err(parse_failed(format!(
                            "dns name invalid length:{}",
                            buffer.len()
                        )));
                    }
                    index = size;
                }
                _ => {
                    return Err(parse_failed(format!("dns name label type error: {}", label)));
                }
            }
        }
    }

    // first queried name and the offset after the question section
    fn decode_questions(&self, payload: &[u8], qd_count: u16) -> Result<(String, usize)> {
        let mut domain = String::new();
        let mut g_offset = DNS_HEADER_SIZE;
        for i in 0..qd_count {
            let (name, offset) = self.decode_name(payload, g_offset)?;
            if payload.len() < offset + QUESTION_CLASS_TYPE_SIZE {
                return Err(parse_failed(format!(
                    "question length error: {}",
                    payload.len() - offset.min(payload.len())
                )));
            }
            if i == 0 {
                domain = name;
            }
            g_offset = offset + QUESTION_CLASS_TYPE_SIZE;
        }
        Ok((domain, g_offset))
    }

    // A and AAAA answers, a truncated answer section keeps what was read
    fn decode_answers(&self, payload: &[u8], mut g_offset: usize, an_count: u16) -> Vec<IpAddr> {
        let mut ips = vec![];
        for _ in 0..an_count {
            let Ok((_, offset)) = self.decode_name(payload, g_offset) else {
                break;
            };
            let Some(rr) = payload.get(offset..offset + RR_RDATA_OFFSET) else {
                break;
            };
            let domain_type = read_u16_be(rr).unwrap_or_default();
            let data_length = read_u16_be(&rr[RR_DATALENGTH_OFFSET..]).unwrap_or_default() as usize;
            let rdata_offset = offset + RR_RDATA_OFFSET;
            let Some(rdata) = payload.get(rdata_offset..rdata_offset + data_length) else {
                break;
            };
            match (domain_type, data_length) {
                (DNS_TYPE_A, 4) => {
                    ips.push(IpAddr::V4(Ipv4Addr::new(rdata[0], rdata[1], rdata[2], rdata[3])))
                }
                (DNS_TYPE_AAAA, 16) => {
                    let mut octets = [0u8; 16];
                    octets.copy_from_slice(rdata);
                    ips.push(IpAddr::V6(Ipv6Addr::from(octets)));
                }
                _ => (),
            }
            g_offset = rdata_offset + data_length;
        }
        ips
    }
}

impl L7ProtocolParserInterface for DnsLog {
    fn parse_request(&self, payload: &[u8], param: &ParseParam) -> Result<AttributeMap> {
        let payload = self.message(payload, param);
        let header = DnsHeader::parse(payload)?;
        if header.qr != 0 || header.opcode > DNS_OPCODE_MAX {
            return Err(parse_failed("not a dns query"));
        }
        if header.qd_count == 0 {
            return Err(parse_failed("dns query without question"));
        }
        let (domain, _) = self.decode_questions(payload, header.qd_count)?;

        let mut attributes = AttributeMap::new();
        attributes.insert(DNS_ID, header.id as i64);
        attributes.insert(DNS_DOMAIN, domain);
        Ok(attributes)
    }

    fn parse_response(
        &self,
        payload: &[u8],
        param: &ParseParam,
        request: &AttributeMap,
    ) -> Result<AttributeMap> {
        let payload = self.message(payload, param);
        let header = DnsHeader::parse(payload)?;
        if header.qr == 0 {
            return Err(parse_failed("not a dns response"));
        }
        if header.opcode > DNS_OPCODE_MAX || header.rcode > DNS_RCODE_MAX {
            return Err(parse_failed(format!(
                "dns response opcode {} rcode {} invalid",
                header.opcode, header.rcode
            )));
        }
        if header.qd_count == 0 {
            return Err(parse_failed("dns response without question"));
        }
        let (domain, offset) = self.decode_questions(payload, header.qd_count)?;
        let ips = self.decode_answers(payload, offset, header.an_count);

        let mut attributes = request.clone();
        attributes.insert(DNS_ID, header.id as i64);
        attributes.insert(DNS_DOMAIN, domain);
        attributes.insert(DNS_RCODE, header.rcode as i64);
        if !ips.is_empty() {
            let ips = ips
                .iter()
                .map(|ip| ip.to_string())
                .collect::<Vec<_>>()
                .join(&DOMAIN_NAME_SPLIT.to_string());
            attributes.insert(DNS_IP, ips);
        }
        if header.rcode > 0 {
            attributes.insert(IS_ERROR, true);
            attributes.insert(ERROR_TYPE, ErrorType::ProtocolError as i64);
        }
        Ok(attributes)
    }

    fn multi_requests(&self) -> bool {
        true
    }

    fn pair_match(&self, requests: &[AttributeMap], response: &AttributeMap) -> Option<usize> {
        let id = response.get_int(DNS_ID)?;
        requests.iter().position(|r| r.get_int(DNS_ID) == Some(id))
    }

    fn protocol(&self) -> L7Protocol {
        L7Protocol::DNS
    }
}
