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

//! Template cache shared by all decoding workers.
//!
//! Templates are scoped by [ExporterId]: two routers, or two observation
//! domains of the same router, may assign the same template ID to different
//! layouts. Each exporter owns its own [ExporterTemplates] behind a mutex, so
//! exporters are decoded in parallel while messages of a single exporter are
//! serialized. A decoder holds the exporter lock for a whole message, making a
//! template defined early in a message visible to the data sets after it.
//!
//! Templates are stored as `Arc<DecodingTemplate>` and replaced wholesale on
//! redefinition; a reader holding an older `Arc` keeps decoding with the
//! layout it resolved.

use crate::ipfix::{DecodingTemplate, TemplateKind, TemplatesMap};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    net::IpAddr,
    sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, TryLockError},
    time::{Duration, Instant},
};

/// Identity an IPFIX message claims: the source address of the datagram and
/// the observation domain in its header.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct ExporterId {
    addr: IpAddr,
    observation_domain_id: u32,
}

impl ExporterId {
    pub const fn new(addr: IpAddr, observation_domain_id: u32) -> Self {
        Self {
            addr,
            observation_domain_id,
        }
    }

    pub const fn addr(&self) -> IpAddr {
        self.addr
    }

    pub const fn observation_domain_id(&self) -> u32 {
        self.observation_domain_id
    }
}

impl std::fmt::Display for ExporterId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.addr, self.observation_domain_id)
    }
}

/// Templates learned from a single exporter
#[derive(Debug)]
pub struct ExporterTemplates {
    templates: TemplatesMap,
    last_seen: Instant,
    /// Set once the entry is removed from its [TemplateStore]
    evicted: bool,
}

impl Default for ExporterTemplates {
    fn default() -> Self {
        Self {
            templates: TemplatesMap::new(),
            last_seen: Instant::now(),
            evicted: false,
        }
    }
}

impl ExporterTemplates {
    /// Installs a template, returning the definition it replaced
    pub fn define(
        &mut self,
        template_id: u16,
        template: DecodingTemplate,
    ) -> Option<Arc<DecodingTemplate>> {
        self.templates.insert(template_id, Arc::new(template))
    }

    pub fn withdraw(&mut self, template_id: u16) -> Option<Arc<DecodingTemplate>> {
        self.templates.remove(&template_id)
    }

    /// Withdraws every template of the given kind, returns how many were
    /// removed.
    pub fn withdraw_all(&mut self, kind: TemplateKind) -> usize {
        let before = self.templates.len();
        self.templates.retain(|_, template| template.kind() != kind);
        before - self.templates.len()
    }

    pub fn resolve(&self, template_id: u16) -> Option<Arc<DecodingTemplate>> {
        self.templates.get(&template_id).cloned()
    }

    /// Sorted template IDs
    pub fn template_ids(&self) -> Vec<u16> {
        let mut ids: Vec<u16> = self.templates.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Last time a message from this exporter was processed
    pub const fn last_seen(&self) -> Instant {
        self.last_seen
    }

    pub(crate) fn touch(&mut self) {
        self.last_seen = Instant::now();
    }

    pub const fn is_evicted(&self) -> bool {
        self.evicted
    }
}

/// Shared handle to the templates of a single exporter
#[derive(Debug, Clone, Default)]
pub struct ExporterEntry(Arc<Mutex<ExporterTemplates>>);

impl ExporterEntry {
    /// Locks the exporter state. A poisoned lock is recovered, the map is
    /// never left half updated since every mutation is a single map operation.
    pub fn lock(&self) -> MutexGuard<'_, ExporterTemplates> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Concurrent template cache keyed by [ExporterId] then template ID.
///
/// Cloning the store is cheap and all clones share the same state.
#[derive(Debug, Clone, Default)]
pub struct TemplateStore {
    exporters: Arc<RwLock<HashMap<ExporterId, ExporterEntry>>>,
}

impl TemplateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the state of `exporter`, creating it on first use
    pub fn exporter(&self, exporter: &ExporterId) -> ExporterEntry {
        if let Some(entry) = self.get(exporter) {
            return entry;
        }
        let mut exporters = self.exporters.write().unwrap_or_else(PoisonError::into_inner);
        exporters.entry(*exporter).or_default().clone()
    }

    /// Runs `f` with the lock of `exporter` held and marks the exporter as
    /// seen. An entry evicted between the lookup and the lock is looked up
    /// again, so updates never land in a detached entry.
    pub fn with_exporter<T>(
        &self,
        exporter: &ExporterId,
        f: impl FnOnce(&mut ExporterTemplates) -> T,
    ) -> T {
        loop {
            let entry = self.exporter(exporter);
            let mut templates = entry.lock();
            if templates.is_evicted() {
                continue;
            }
            templates.touch();
            return f(&mut templates);
        }
    }

    fn get(&self, exporter: &ExporterId) -> Option<ExporterEntry> {
        self.exporters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(exporter)
            .cloned()
    }

    /// Installs or atomically replaces a template
    pub fn define(
        &self,
        exporter: &ExporterId,
        template_id: u16,
        template: DecodingTemplate,
    ) -> Option<Arc<DecodingTemplate>> {
        self.with_exporter(exporter, |templates| templates.define(template_id, template))
    }

    pub fn withdraw(
        &self,
        exporter: &ExporterId,
        template_id: u16,
    ) -> Option<Arc<DecodingTemplate>> {
        self.get(exporter)
            .and_then(|entry| entry.lock().withdraw(template_id))
    }

    pub fn withdraw_all(&self, exporter: &ExporterId, kind: TemplateKind) -> usize {
        self.get(exporter)
            .map(|entry| entry.lock().withdraw_all(kind))
            .unwrap_or_default()
    }

    pub fn resolve(
        &self,
        exporter: &ExporterId,
        template_id: u16,
    ) -> Option<Arc<DecodingTemplate>> {
        self.get(exporter)
            .and_then(|entry| entry.lock().resolve(template_id))
    }

    /// Sorted list of known exporters
    pub fn exporters(&self) -> Vec<ExporterId> {
        let mut exporters: Vec<ExporterId> = self
            .exporters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .copied()
            .collect();
        exporters.sort_unstable();
        exporters
    }

    pub fn template_ids(&self, exporter: &ExporterId) -> Vec<u16> {
        self.get(exporter)
            .map(|entry| entry.lock().template_ids())
            .unwrap_or_default()
    }

    /// Drops all templates of `exporter`, returns false if it was unknown
    pub fn purge(&self, exporter: &ExporterId) -> bool {
        let mut exporters = self.exporters.write().unwrap_or_else(PoisonError::into_inner);
        match exporters.remove(exporter) {
            // Marked before the map lock is released, a decoder that cloned
            // the entry earlier retries with a fresh one
            Some(entry) => {
                entry.lock().evicted = true;
                true
            }
            None => false,
        }
    }

    /// Drops the exporters that sent no message during the last `older_than`.
    /// Exporters whose lock is held are being decoded and are kept.
    pub fn purge_inactive(&self, older_than: Duration) -> Vec<ExporterId> {
        let now = Instant::now();
        let mut purged = vec![];
        let mut exporters = self.exporters.write().unwrap_or_else(PoisonError::into_inner);
        exporters.retain(|exporter, entry| {
            let mut templates = match entry.0.try_lock() {
                Ok(templates) => templates,
                Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
                Err(TryLockError::WouldBlock) => return true,
            };
            let inactive = now.duration_since(templates.last_seen()) > older_than;
            templates.evicted = inactive;
            if inactive {
                purged.push(*exporter);
            }
            !inactive
        });
        purged.sort_unstable();
        purged
    }

    /// Number of known exporters
    pub fn len(&self) -> usize {
        self.exporters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total number of templates across all exporters
    pub fn templates_count(&self) -> usize {
        self.exporters
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|entry| entry.lock().len())
            .sum()
    }
}
