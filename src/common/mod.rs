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

pub mod attribute_map;
pub mod consts;
pub mod data_group;
pub mod event;

pub use attribute_map::{AttributeMap, AttributeValue};
pub use consts::ErrorType;
pub use data_group::{DataGroup, RequestMetrics};
pub use event::{EventCategory, EventName, L4Protocol, Role, SocketEvent};
