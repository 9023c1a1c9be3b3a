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

use std::sync::Weak;

use cadence::{
    ext::{MetricValue, ToCounterValue, ToGaugeValue},
    MetricResult,
};

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CounterType {
    Counted,
    Gauged,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CounterValue {
    Signed(i64),
    Unsigned(u64),
}

impl CounterValue {
    fn to_metric_value(self) -> MetricValue {
        match self {
            CounterValue::Signed(v) => MetricValue::Signed(v),
            // statsd only carries signed integers
            CounterValue::Unsigned(v) => MetricValue::Signed(v as i64),
        }
    }
}

impl ToCounterValue for CounterValue {
    fn try_to_value(self) -> MetricResult<MetricValue> {
        Ok(self.to_metric_value())
    }
}

impl ToGaugeValue for CounterValue {
    fn try_to_value(self) -> MetricResult<MetricValue> {
        Ok(self.to_metric_value())
    }
}

pub type Counter = (&'static str, CounterType, CounterValue);

/// Self-telemetry source owned by a long lived component.
///
/// Counted values are reset on every read, gauges are not.
pub trait RefCountable: Send + Sync {
    fn get_counters(&self) -> Vec<Counter>;
}

pub enum Countable {
    Owned(Box<dyn RefCountable>),
    Ref(Weak<dyn RefCountable>),
}

impl Countable {
    pub fn get_counters(&self) -> Vec<Counter> {
        match self {
            Countable::Owned(c) => c.get_counters(),
            Countable::Ref(c) => c.upgrade().map(|c| c.get_counters()).unwrap_or_default(),
        }
    }

    pub fn closed(&self) -> bool {
        match self {
            Countable::Owned(_) => false,
            Countable::Ref(c) => c.strong_count() == 0,
        }
    }
}
