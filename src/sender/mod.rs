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

use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};

use log::info;
use thiserror::Error;

use crate::common::DataGroup;

#[derive(Debug, Error)]
pub enum Error {
    #[error("{0} queue full")]
    QueueFull(&'static str),
    #[error("{0} queue terminated")]
    Terminated(&'static str),
    #[error("serialize failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Downstream of the analyzer.
///
/// Called from the ingest path and the sweeper thread, possibly at the same
/// time. An error is counted and logged by the caller, never retried.
pub trait Consumer: Send + Sync {
    fn consume(&self, group: &DataGroup) -> Result<(), Error>;
}

// Hands records to another thread through a bounded queue, full queues drop.
pub struct QueueConsumer {
    name: &'static str,
    sender: SyncSender<DataGroup>,
}

impl QueueConsumer {
    pub fn new(name: &'static str, capacity: usize) -> (Self, Receiver<DataGroup>) {
        let (sender, receiver) = mpsc::sync_channel(capacity);
        (Self { name, sender }, receiver)
    }
}

impl Consumer for QueueConsumer {
    fn consume(&self, group: &DataGroup) -> Result<(), Error> {
        self.sender.try_send(group.clone()).map_err(|e| match e {
            TrySendError::Full(_) => Error::QueueFull(self.name),
            TrySendError::Disconnected(_) => Error::Terminated(self.name),
        })
    }
}

#[derive(Default)]
pub struct LogConsumer;

impl Consumer for LogConsumer {
    fn consume(&self, group: &DataGroup) -> Result<(), Error> {
        info!("{}", group.to_json()?);
        Ok(())
    }
}
