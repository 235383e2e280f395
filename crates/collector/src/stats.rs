// Copyright (C) 2024-present The NetGauze Authors.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or
// implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(
    Debug,
    Copy,
    Clone,
    Eq,
    PartialEq,
    Hash,
    Serialize,
    Deserialize,
    strum_macros::Display,
    strum_macros::EnumIter,
    strum_macros::IntoStaticStr,
)]
#[strum(serialize_all = "lowercase")]
pub enum SinkKind {
    Console,
    Metrics,
    Storage,
}

impl SinkKind {
    const fn index(self) -> usize {
        match self {
            Self::Console => 0,
            Self::Metrics => 1,
            Self::Storage => 2,
        }
    }
}

/// Counters of the assembly and sink stages, the decoder side is counted by
/// [homeflow_flow_service::CollectorStats]
#[derive(Debug, Default)]
pub struct PipelineStats {
    records_incomplete: AtomicU64,
    records_options: AtomicU64,
    sink_dropped: [AtomicU64; 3],
    storage_rows_written: AtomicU64,
    storage_flush_failures: AtomicU64,
}

impl PipelineStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_incomplete(&self) {
        self.records_incomplete.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_options(&self) {
        self.records_options.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn sink_dropped(&self, sink: SinkKind) {
        self.sink_dropped[sink.index()].fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn storage_rows_written(&self, rows: usize) {
        self.storage_rows_written
            .fetch_add(rows as u64, Ordering::Relaxed);
    }

    pub(crate) fn storage_flush_failed(&self) {
        self.storage_flush_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn records_incomplete(&self) -> u64 {
        self.records_incomplete.load(Ordering::Relaxed)
    }

    /// Options data records, they describe the exporter and carry no flow
    pub fn records_options(&self) -> u64 {
        self.records_options.load(Ordering::Relaxed)
    }

    pub fn dropped(&self, sink: SinkKind) -> u64 {
        self.sink_dropped[sink.index()].load(Ordering::Relaxed)
    }

    pub fn rows_written(&self) -> u64 {
        self.storage_rows_written.load(Ordering::Relaxed)
    }

    pub fn flush_failures(&self) -> u64 {
        self.storage_flush_failures.load(Ordering::Relaxed)
    }
}
