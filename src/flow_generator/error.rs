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

use std::str::Utf8Error;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("http header parse failed")]
    HttpHeaderParseFailed,
    #[error("redis log parse failed")]
    RedisLogParseFailed,
    #[error("mysql log parse failed")]
    MysqlLogParseFailed,
    #[error("{0}")]
    DNSLogParseFailed(String),
    #[error("consumer errors: {}", .0.join("; "))]
    ConsumerErrors(Vec<String>),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

impl From<Utf8Error> for Error {
    fn from(_: Utf8Error) -> Self {
        Self::HttpHeaderParseFailed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_messages() {
        let e = Error::ConsumerErrors(vec!["a closed".to_owned(), "b full".to_owned()]);
        assert_eq!(e.to_string(), "consumer errors: a closed; b full");

        let invalid = [0xff_u8, 0xfe];
        let e = Error::from(std::str::from_utf8(&invalid).unwrap_err());
        assert!(matches!(e, Error::HttpHeaderParseFailed));
    }
}
