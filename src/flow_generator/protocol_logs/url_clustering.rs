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

use super::consts::{URL_SEGMENT_MAX_LEN, URL_WILDCARD};
use crate::config::UrlClusteringMethod;

// Reduce a request URL to a low cardinality key.
pub fn cluster(method: UrlClusteringMethod, url: &str) -> String {
    match method {
        UrlClusteringMethod::Alphabet => alphabet(url),
        UrlClusteringMethod::NoParam => no_param(url),
    }
}

// Drops the query string.
fn no_param(url: &str) -> String {
    url.split('?').next().unwrap_or_default().to_owned()
}

// Keeps path segments made of letters, '-' and '_' and replaces any other
// segment with '*'. The query string is dropped.
fn alphabet(url: &str) -> String {
    let path = url.split('?').next().unwrap_or_default();
    let path = path.trim_matches(' ');
    path.split('/')
        .map(|segment| {
            if segment.len() <= URL_SEGMENT_MAX_LEN
                && segment
                    .bytes()
                    .all(|b| b.is_ascii_alphabetic() || b == b'-' || b == b'_')
            {
                segment
            } else {
                URL_WILDCARD
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alphabet_segments() {
        let cases = [
            ("/api/users/12345", "/api/users/*"),
            ("/api/user-info/get_name?id=3", "/api/user-info/get_name"),
            ("/v1/orders", "/*/orders"),
            ("/", "/"),
            ("", ""),
            ("//a", "//a"),
            ("/abcdefghijklmnopqrstuvwxyz/x", "/*/x"),
            ("/abcdefghijklmnopqrstuvwxy/x", "/abcdefghijklmnopqrstuvwxy/x"),
        ];
        for (url, expected) in cases {
            assert_eq!(
                cluster(UrlClusteringMethod::Alphabet, url),
                expected,
                "url {}",
                url
            );
        }
    }

    #[test]
    fn no_param_strips_query() {
        assert_eq!(
            cluster(UrlClusteringMethod::NoParam, "/api/users/1?x=y"),
            "/api/users/1"
        );
        assert_eq!(cluster(UrlClusteringMethod::NoParam, "/a"), "/a");
    }
}
