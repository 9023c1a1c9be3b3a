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

use public::l7_protocol::L7Protocol;

use super::{L7ProtocolParserInterface, ParseParam};
use crate::{common::attribute_map::AttributeMap, flow_generator::error::Result};

// Accepts anything, reported as NOSUPPORT.
#[derive(Clone, Debug, Default)]
pub struct GenericLog;

impl L7ProtocolParserInterface for GenericLog {
    fn parse_request(&self, _: &[u8], _: &ParseParam) -> Result<AttributeMap> {
        Ok(AttributeMap::new())
    }

    fn parse_response(
        &self,
        _: &[u8],
        _: &ParseParam,
        request: &AttributeMap,
    ) -> Result<AttributeMap> {
        Ok(request.clone())
    }

    fn protocol(&self) -> L7Protocol {
        L7Protocol::Other
    }
}
