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

use std::{
    net::IpAddr,
    num::NonZeroUsize,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use log::debug;
use lru::LruCache;
use parking_lot::Mutex;

use public::counter::{Counter, CounterType, CounterValue, RefCountable};

/// Reply direction of a tracked connection, as seen from the original one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IpTranslation {
    pub repl_src_ip: IpAddr,
    pub repl_dst_ip: IpAddr,
    pub repl_src_port: u16,
    pub repl_dst_port: u16,
}

pub trait NatResolver: Send + Sync {
    fn resolve_dnat(
        &self,
        src_ip: IpAddr,
        dst_ip: IpAddr,
        src_port: u16,
        dst_port: u16,
        is_udp: bool,
    ) -> Option<IpTranslation>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ConnTuple {
    pub src_ip: IpAddr,
    pub dst_ip: IpAddr,
    pub src_port: u16,
    pub dst_port: u16,
}

impl ConnTuple {
    pub fn new(src_ip: IpAddr, dst_ip: IpAddr, src_port: u16, dst_port: u16) -> Self {
        Self {
            src_ip,
            dst_ip,
            src_port,
            dst_port,
        }
    }
}

impl From<ConnTuple> for IpTranslation {
    fn from(t: ConnTuple) -> Self {
        Self {
            repl_src_ip: t.src_ip,
            repl_dst_ip: t.dst_ip,
            repl_src_port: t.src_port,
            repl_dst_port: t.dst_port,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
struct ConnKey {
    tuple: ConnTuple,
    is_udp: bool,
}

#[derive(Default)]
pub struct ConntrackCounter {
    pub gets: AtomicU64,
    pub hits: AtomicU64,
    pub adds: AtomicU64,
    pub removes: AtomicU64,
    pub evicts: AtomicU64,
    pub size: AtomicU64,
}

impl RefCountable for ConntrackCounter {
    fn get_counters(&self) -> Vec<Counter> {
        vec![
            (
                "gets",
                CounterType::Counted,
                CounterValue::Unsigned(self.gets.swap(0, Ordering::Relaxed)),
            ),
            (
                "hits",
                CounterType::Counted,
                CounterValue::Unsigned(self.hits.swap(0, Ordering::Relaxed)),
            ),
            (
                "adds",
                CounterType::Counted,
                CounterValue::Unsigned(self.adds.swap(0, Ordering::Relaxed)),
            ),
            (
                "removes",
                CounterType::Counted,
                CounterValue::Unsigned(self.removes.swap(0, Ordering::Relaxed)),
            ),
            (
                "evicts",
                CounterType::Counted,
                CounterValue::Unsigned(self.evicts.swap(0, Ordering::Relaxed)),
            ),
            (
                "size",
                CounterType::Gauged,
                CounterValue::Unsigned(self.size.load(Ordering::Relaxed)),
            ),
        ]
    }
}

// LRU of conntrack entries, populated from conntrack events by the embedder.
// Each tracked connection occupies two slots, one per direction.
pub struct ConntrackCache {
    cache: Mutex<LruCache<ConnKey, IpTranslation>>,
    counter: Arc<ConntrackCounter>,
}

impl ConntrackCache {
    // safe because parameter to new_unchecked is not zero
    const MIN_CAPACITY: NonZeroUsize = unsafe { NonZeroUsize::new_unchecked(2) };

    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity)
            .unwrap_or(Self::MIN_CAPACITY)
            .max(Self::MIN_CAPACITY);
        Self {
            cache: Mutex::new(LruCache::new(capacity)),
            counter: Default::default(),
        }
    }

    pub fn counter(&self) -> &Arc<ConntrackCounter> {
        &self.counter
    }

    fn push(&self, cache: &mut LruCache<ConnKey, IpTranslation>, key: ConnKey, v: IpTranslation) {
        if let Some((old, _)) = cache.push(key, v) {
            if old != key {
                self.counter.evicts.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn add(&self, orig: ConnTuple, reply: ConnTuple, is_udp: bool) {
        let mut cache = self.cache.lock();
        self.push(
            &mut cache,
            ConnKey {
                tuple: orig,
                is_udp,
            },
            reply.into(),
        );
        self.push(
            &mut cache,
            ConnKey {
                tuple: reply,
                is_udp,
            },
            orig.into(),
        );
        self.counter.adds.fetch_add(1, Ordering::Relaxed);
        self.counter
            .size
            .store(cache.len() as u64, Ordering::Relaxed);
    }

    pub fn remove(&self, orig: ConnTuple, reply: ConnTuple, is_udp: bool) {
        let mut cache = self.cache.lock();
        cache.pop(&ConnKey {
            tuple: orig,
            is_udp,
        });
        cache.pop(&ConnKey {
            tuple: reply,
            is_udp,
        });
        self.counter.removes.fetch_add(1, Ordering::Relaxed);
        self.counter
            .size
            .store(cache.len() as u64, Ordering::Relaxed);
    }

    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl NatResolver for ConntrackCache {
    fn resolve_dnat(
        &self,
        src_ip: IpAddr,
        dst_ip: IpAddr,
        src_port: u16,
        dst_port: u16,
        is_udp: bool,
    ) -> Option<IpTranslation> {
        self.counter.gets.fetch_add(1, Ordering::Relaxed);
        let key = ConnKey {
            tuple: ConnTuple::new(src_ip, dst_ip, src_port, dst_port),
            is_udp,
        };
        let translation = self.cache.lock().get(&key).copied();
        if translation.is_some() {
            self.counter.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            debug!(
                "no conntrack entry for {}:{} -> {}:{} udp={}",
                src_ip, src_port, dst_ip, dst_port, is_udp
            );
        }
        translation
    }
}
