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

use std::sync::Arc;

use ahash::RandomState;
use dashmap::{mapref::entry::Entry, DashMap};

use super::flow_record::{FlowKey, FlowRecord};

/// Live flows keyed by socket identity.
///
/// Sharded so the ingest path and the sweeper only contend on the shard they
/// touch. An emitted record still present in the table is treated as absent.
#[derive(Default)]
pub struct FlowTable {
    flows: DashMap<FlowKey, Arc<FlowRecord>, RandomState>,
}

impl FlowTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            flows: DashMap::with_capacity_and_hasher(capacity, RandomState::new()),
        }
    }

    // Returns the live record for `key` and true, or installs `candidate`
    // and returns it with false.
    pub fn load_or_store(
        &self,
        key: FlowKey,
        candidate: Arc<FlowRecord>,
    ) -> (Arc<FlowRecord>, bool) {
        match self.flows.entry(key) {
            Entry::Occupied(mut o) => {
                if o.get().is_emitted() {
                    o.insert(candidate.clone());
                    (candidate, false)
                } else {
                    (o.get().clone(), true)
                }
            }
            Entry::Vacant(v) => {
                v.insert(candidate.clone());
                (candidate, false)
            }
        }
    }

    pub fn get(&self, key: &FlowKey) -> Option<Arc<FlowRecord>> {
        self.flows
            .get(key)
            .filter(|r| !r.is_emitted())
            .map(|r| r.value().clone())
    }

    pub fn store(&self, key: FlowKey, record: Arc<FlowRecord>) {
        self.flows.insert(key, record);
    }

    // Only removes `record` itself, a replacement installed meanwhile is kept.
    pub fn remove_if_same(&self, key: &FlowKey, record: &Arc<FlowRecord>) -> bool {
        self.flows
            .remove_if(key, |_, current| Arc::ptr_eq(current, record))
            .is_some()
    }

    pub fn snapshot(&self) -> Vec<Arc<FlowRecord>> {
        self.flows.iter().map(|r| r.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }
}
