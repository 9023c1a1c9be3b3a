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

use public::{bytes::read_u16_le, l7_protocol::L7Protocol};

use super::{consts::*, L7ProtocolParserInterface, ParseParam};
use crate::{
    common::{
        attribute_map::AttributeMap,
        consts::{CONTENT_KEY, ERROR_TYPE, IS_ERROR, SQL, SQL_ERROR_CODE, SQL_ERROR_MSG},
        ErrorType,
    },
    flow_generator::error::{Error, Result},
};

/// MySQL text protocol: COM_QUERY and COM_STMT_PREPARE requests, OK/ERR/EOF
/// and result set responses.
#[derive(Clone, Debug, Default)]
pub struct MysqlLog;

impl MysqlLog {
    fn error_message(payload: &[u8]) -> String {
        // 0xff, code(2), ['#' state(5)], message
        let marker = payload.get(SQL_STATE_MARKER_OFFSET);
        let state_end = SQL_STATE_MARKER_OFFSET + 1 + SQL_STATE_LEN;
        if marker == Some(&SQL_STATE_MARKER) && payload.len() >= state_end {
            format!(
                "{}:{}",
                String::from_utf8_lossy(&payload[SQL_STATE_MARKER_OFFSET + 1..state_end]),
                String::from_utf8_lossy(&payload[state_end..])
            )
        } else {
            String::from_utf8_lossy(payload.get(SQL_STATE_MARKER_OFFSET..).unwrap_or_default())
                .into_owned()
        }
    }
}

impl L7ProtocolParserInterface for MysqlLog {
    fn parse_request(&self, payload: &[u8], _: &ParseParam) -> Result<AttributeMap> {
        if payload.len() < MYSQL_REQUEST_MIN_LEN || payload[NUMBER_OFFSET] != 0 {
            return Err(Error::MysqlLogParseFailed);
        }
        match payload[COMMAND_OFFSET] {
            COM_QUERY | COM_STMT_PREPARE => (),
            _ => return Err(Error::MysqlLogParseFailed),
        }
        let sql = String::from_utf8_lossy(&payload[COMMAND_OFFSET + 1..]);
        let sql = sql.trim();
        let content_key = sql_content_key(sql).ok_or(Error::MysqlLogParseFailed)?;

        let mut attributes = AttributeMap::new();
        attributes.insert(SQL, sql);
        attributes.insert(CONTENT_KEY, content_key);
        Ok(attributes)
    }

    fn parse_response(
        &self,
        payload: &[u8],
        _: &ParseParam,
        request: &AttributeMap,
    ) -> Result<AttributeMap> {
        if payload.len() < MYSQL_RESPONSE_MIN_LEN || payload[NUMBER_OFFSET] == 0 {
            return Err(Error::MysqlLogParseFailed);
        }
        let mut attributes = request.clone();
        if payload[COMMAND_OFFSET] == MYSQL_RESPONSE_CODE_ERR {
            let code = read_u16_le(&payload[ERROR_CODE_OFFSET..]).unwrap_or_default();
            attributes.insert(SQL_ERROR_CODE, code as i64);
            attributes.insert(SQL_ERROR_MSG, Self::error_message(payload));
            if code != 0 {
                attributes.insert(IS_ERROR, true);
                attributes.insert(ERROR_TYPE, ErrorType::ProtocolError as i64);
            }
        }
        // MYSQL_RESPONSE_CODE_OK, MYSQL_RESPONSE_CODE_EOF and result sets are successes
        Ok(attributes)
    }

    fn protocol(&self) -> L7Protocol {
        L7Protocol::MySQL
    }

    fn parsable_on_udp(&self) -> bool {
        false
    }
}

// "select ... from t" reads as "select t", None when the statement does not
// start with a known keyword
fn sql_content_key(sql: &str) -> Option<String> {
    let mut tokens = sql.split_ascii_whitespace();
    let op = tokens.next()?.to_ascii_lowercase();
    if !SQL_KEYWORDS.contains(&op.as_str()) {
        return None;
    }
    let lowered = sql.to_ascii_lowercase();
    let table_after = |keyword: &str| {
        let mut it = lowered.split_ascii_whitespace();
        it.position(|t| t == keyword)?;
        it.next()
            .map(|t| t.trim_matches(|c| c == '`' || c == '(' || c == ';').to_owned())
    };
    let table = match op.as_str() {
        "select" | "delete" => table_after("from"),
        "insert" | "replace" => table_after("into"),
        "update" => table_after("update"),
        "create" | "drop" | "alter" | "truncate" => table_after("table"),
        _ => None,
    };
    Some(match table {
        Some(table) if !table.is_empty() => format!("{} {}", op, table),
        _ => op,
    })
}
