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
    fmt,
    panic::RefUnwindSafe,
    net::{ToSocketAddrs, UdpSocket},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use cadence::{
    Counted, Gauged, Metric, MetricBuilder, MetricResult, MetricSink, StatsdClient, UdpMetricSink,
};
use log::{debug, error, info};
use parking_lot::Mutex;
pub use public::counter::*;

const STATS_PREFIX: &str = "l7_analyzer";
const TICK_CYCLE: Duration = Duration::from_secs(10);

struct Source {
    module: &'static str,
    countable: Countable,
    tags: Vec<(&'static str, String)>,
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}-{:?}", self.module, self.tags)
    }
}

/// Periodically reports registered countables to a statsd endpoint.
///
/// Counted values go out as statsd counters, gauged values as gauges, each
/// keyed `<prefix>.<module>.<name>` and tagged with the source's tags. Sources
/// whose owner has been dropped are removed on the next report.
pub struct Collector {
    client: Arc<StatsdClient>,
    sources: Arc<Mutex<Vec<Source>>>,

    running: Arc<AtomicBool>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Collector {
    pub fn new<A: ToSocketAddrs + fmt::Debug>(addr: A) -> MetricResult<Self> {
        info!("stats client connect to {:?}", &addr);
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        let sink = UdpMetricSink::from(addr, socket)?;
        Ok(Self::from_sink(sink))
    }

    pub fn from_sink<T>(sink: T) -> Self
    where
        T: MetricSink + Send + Sync + RefUnwindSafe + 'static,
    {
        Self {
            client: Arc::new(StatsdClient::from_sink(STATS_PREFIX, sink)),
            sources: Default::default(),
            running: Default::default(),
            thread: Mutex::new(None),
        }
    }

    pub fn register_countable(
        &self,
        module: &'static str,
        countable: Countable,
        tags: Vec<(&'static str, String)>,
    ) {
        let source = Source {
            module,
            countable,
            tags,
        };
        let mut sources = self.sources.lock();
        if let Some(index) = sources
            .iter()
            .position(|s| s.module == source.module && s.tags == source.tags)
        {
            info!("stats source {} replaced", source);
            sources[index] = source;
        } else {
            debug!("stats source {} registered", source);
            sources.push(source);
        }
    }

    pub fn source_count(&self) -> usize {
        self.sources.lock().len()
    }

    /// Sends one round of metrics, returns how many were sent.
    pub fn report(&self) -> usize {
        report(&self.client, &self.sources)
    }

    pub fn start(&self) {
        if self.running.swap(true, Ordering::Relaxed) {
            return;
        }

        let running = self.running.clone();
        let client = self.client.clone();
        let sources = self.sources.clone();
        let spawned = thread::Builder::new()
            .name("stats-collector".to_owned())
            .spawn(move || {
                loop {
                    report(&client, &sources);
                    thread::park_timeout(TICK_CYCLE);
                    if !running.load(Ordering::Relaxed) {
                        break;
                    }
                }
            });
        match spawned {
            Ok(handle) => *self.thread.lock() = Some(handle),
            Err(e) => {
                error!("stats collector spawn failed: {}", e);
                self.running.store(false, Ordering::Relaxed);
            }
        }
    }

    pub fn notify_stop(&self) -> Option<JoinHandle<()>> {
        if !self.running.swap(false, Ordering::SeqCst) {
            return None;
        }
        let handle = self.thread.lock().take()?;
        handle.thread().unpark();
        Some(handle)
    }

    pub fn stop(&self) {
        if let Some(handle) = self.notify_stop() {
            let _ = handle.join();
            info!("stats collector stopped");
        }
    }
}

fn report(client: &StatsdClient, sources: &Mutex<Vec<Source>>) -> usize {
    let mut sources = sources.lock();
    sources.retain(|s| !s.countable.closed());
    let mut sent = 0;
    for source in sources.iter() {
        for (name, counter_type, value) in source.countable.get_counters() {
            let key = format!("{}.{}", source.module, name);
            match counter_type {
                CounterType::Counted => {
                    send_metrics(client.count_with_tags(&key, value), &source.tags)
                }
                CounterType::Gauged => {
                    send_metrics(client.gauge_with_tags(&key, value), &source.tags)
                }
            }
            sent += 1;
        }
    }
    sent
}

fn send_metrics<'a, T: Metric + From<String>>(
    mut b: MetricBuilder<'a, '_, T>,
    tags: &'a [(&'static str, String)],
) {
    for (k, v) in tags {
        b = b.with_tag(k, v);
    }
    b.send();
}
