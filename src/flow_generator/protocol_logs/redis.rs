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

use public::l7_protocol::L7Protocol;

use super::{consts::*, L7ProtocolParserInterface, ParseParam};
use crate::{
    common::{
        attribute_map::AttributeMap,
        consts::{CONTENT_KEY, ERROR_TYPE, IS_ERROR, REDIS_COMMAND, REDIS_ERROR_MSG},
        ErrorType,
    },
    flow_generator::error::{Error, Result},
};

const SEPARATOR_SIZE: usize = 2;

const REDIS_COMMANDS: &[&str] = &[
    "APPEND", "AUTH", "BLPOP", "BRPOP", "CLIENT", "CLUSTER", "COMMAND", "CONFIG", "DBSIZE",
    "DECR", "DECRBY", "DEL", "DISCARD", "ECHO", "EVAL", "EVALSHA", "EXEC", "EXISTS", "EXPIRE",
    "EXPIREAT", "FLUSHALL", "FLUSHDB", "GET", "GETSET", "HDEL", "HELLO", "HEXISTS", "HGET",
    "HGETALL", "HINCRBY", "HKEYS", "HLEN", "HMGET", "HMSET", "HSET", "INCR", "INCRBY", "INFO",
    "KEYS", "LINDEX", "LLEN", "LPOP", "LPUSH", "LRANGE", "MGET", "MSET", "MULTI", "PEXPIRE",
    "PING", "PUBLISH", "RPOP", "RPUSH", "SADD", "SCAN", "SELECT", "SET", "SETEX", "SETNX",
    "SMEMBERS", "SREM", "SUBSCRIBE", "TTL", "ZADD", "ZRANGE",
];

/// RESP commands sent as arrays of bulk strings, and their replies.
#[derive(Clone, Debug, Default)]
pub struct RedisLog;

impl L7ProtocolParserInterface for RedisLog {
    fn parse_request(&self, payload: &[u8], _: &ParseParam) -> Result<AttributeMap> {
        if payload.first() != Some(&REDIS_ARRAY) {
            return Err(Error::RedisLogParseFailed);
        }
        let args = decode_asterisk(payload).ok_or(Error::RedisLogParseFailed)?;
        let name = args
            .first()
            .and_then(|a| str::from_utf8(a).ok())
            .map(|a| a.to_ascii_uppercase())
            .ok_or(Error::RedisLogParseFailed)?;
        if !REDIS_COMMANDS.contains(&name.as_str()) {
            return Err(Error::RedisLogParseFailed);
        }

        let mut command = args
            .iter()
            .map(|a| String::from_utf8_lossy(a))
            .collect::<Vec<_>>()
            .join(" ");
        if command.len() > REDIS_COMMAND_MAX_LEN {
            let mut end = REDIS_COMMAND_MAX_LEN;
            while !command.is_char_boundary(end) {
                end -= 1;
            }
            command.truncate(end);
        }

        let mut attributes = AttributeMap::new();
        attributes.insert(REDIS_COMMAND, command);
        attributes.insert(CONTENT_KEY, name);
        Ok(attributes)
    }

    fn parse_response(
        &self,
        payload: &[u8],
        _: &ParseParam,
        request: &AttributeMap,
    ) -> Result<AttributeMap> {
        let mut attributes = request.clone();
        match payload.first() {
            Some(&REDIS_ERROR) => {
                let (message, _) = decode_ascii_str(&payload[1..], REDIS_COMMAND_MAX_LEN)
                    .ok_or(Error::RedisLogParseFailed)?;
                attributes.insert(REDIS_ERROR_MSG, str::from_utf8(message)?);
                attributes.insert(IS_ERROR, true);
                attributes.insert(ERROR_TYPE, ErrorType::ProtocolError as i64);
            }
            Some(&REDIS_SIMPLE_STRING) | Some(&REDIS_INTEGER) | Some(&REDIS_BULK_STRING)
            | Some(&REDIS_ARRAY) => {
                find_separator(payload).ok_or(Error::RedisLogParseFailed)?;
            }
            _ => return Err(Error::RedisLogParseFailed),
        }
        Ok(attributes)
    }

    fn protocol(&self) -> L7Protocol {
        L7Protocol::Redis
    }

    fn parsable_on_udp(&self) -> bool {
        false
    }
}

fn find_separator(payload: &[u8]) -> Option<usize> {
    payload.windows(SEPARATOR_SIZE).position(|w| w == b"\r\n")
}

fn decode_integer(payload: &[u8]) -> Option<(isize, usize)> {
    let separator_pos = find_separator(payload)?;
    // 整数至少占一位
    if separator_pos < 1 {
        return None;
    }
    let integer = str::from_utf8(&payload[..separator_pos])
        .ok()?
        .parse::<isize>()
        .ok()?;
    Some((integer, separator_pos + SEPARATOR_SIZE))
}

// "$3\r\nSET\r\n", a value cut by the capture boundary is returned as is
fn decode_dollor(payload: &[u8]) -> Option<(&[u8], usize)> {
    if payload.first() != Some(&REDIS_BULK_STRING) {
        return None;
    }
    let mut offset = 1;
    let (len, sub_offset) = decode_integer(&payload[offset..])?;
    offset += sub_offset;
    if len <= 0 {
        return Some((&payload[offset..offset], offset));
    }
    let len = len as usize;
    if offset + len + SEPARATOR_SIZE > payload.len() {
        return Some((&payload[offset..], payload.len()));
    }
    if &payload[offset + len..offset + len + SEPARATOR_SIZE] != b"\r\n" {
        return None;
    }
    Some((&payload[offset..offset + len], offset + len + SEPARATOR_SIZE))
}

// "set mykey myvalue" is sent as "*3\r\n$3\r\nSET\r\n$5\r\nmykey\r\n$7\r\nmyvalue\r\n"
fn decode_asterisk(payload: &[u8]) -> Option<Vec<&[u8]>> {
    let mut offset = 1;
    let (count, sub_offset) = decode_integer(&payload[offset..])?;
    if count <= 0 {
        return None;
    }
    offset += sub_offset;

    let mut args = Vec::new();
    for _ in 0..count {
        if offset >= payload.len() {
            break;
        }
        let (arg, sub_offset) = decode_dollor(&payload[offset..])?;
        args.push(arg);
        offset += sub_offset;
    }
    if args.is_empty() {
        return None;
    }
    Some(args)
}

fn decode_ascii_str(payload: &[u8], limit: usize) -> Option<(&[u8], usize)> {
    let separator_pos = find_separator(payload).unwrap_or(payload.len());
    let context = &payload[..separator_pos.min(limit)];
    if !context.is_ascii() {
        return None;
    }
    Some((context, context.len()))
}
