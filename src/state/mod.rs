pub mod classify;
pub mod resolver;

use std::collections::hash_map::Entry;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use arc_swap::ArcSwap;
use crossbeam_channel::select;
use rustc_hash::FxHashMap;

use crate::error::NetoflowError;
use crate::model::PortLabel;
use crate::model::flow::{FlowKey, FlowRecord, Snapshot};
use crate::packet::{PacketDescriptor, now_micros};
use crate::registry::LocalNetworks;

/// Upper bound on how long the classifier takes to notice shutdown.
const SHUTDOWN_POLL: Duration = Duration::from_millis(500);

/// src -> dst -> destination port label -> record.
///
/// Nested so "anything from A to B" and the reverse B -> A lookup are both
/// two hash lookups.
pub type FlowMap = FxHashMap<Ipv4Addr, FxHashMap<Ipv4Addr, FxHashMap<PortLabel, FlowRecord>>>;

/// What `record_packet` did with a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Created,
    Merged,
    /// Zero-length descriptor; nothing to account.
    Dropped,
}

/// Outcome tally for one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchCounts {
    pub created: usize,
    pub merged: usize,
    pub dropped: usize,
}

impl BatchCounts {
    fn add(&mut self, outcome: RecordOutcome) {
        match outcome {
            RecordOutcome::Created => self.created += 1,
            RecordOutcome::Merged => self.merged += 1,
            RecordOutcome::Dropped => self.dropped += 1,
        }
    }
}

/// The process-wide flow table.
///
/// The map is only reachable through these methods. One mutex covers both
/// ingestion and the classification walk, so each packet's lookup-then-write
/// is atomic and every snapshot is internally consistent.
pub struct FlowTable {
    flows: Mutex<FlowMap>,
    local: Arc<LocalNetworks>,
    dropped: AtomicU64,
}

impl FlowTable {
    pub fn new(local: Arc<LocalNetworks>) -> Self {
        Self {
            flows: Mutex::new(FlowMap::default()),
            local,
            dropped: AtomicU64::new(0),
        }
    }

    pub fn local_networks(&self) -> &LocalNetworks {
        &self.local
    }

    /// Merge `pkt` into its flow, or create the flow.
    pub fn record_packet(&self, pkt: &PacketDescriptor) -> RecordOutcome {
        if pkt.byte_len == 0 {
            self.note_dropped();
            return RecordOutcome::Dropped;
        }
        let mut flows = self.lock();
        self.record_locked(&mut flows, pkt)
    }

    /// Record a capture batch under a single lock hold.
    pub fn record_batch(&self, batch: &[PacketDescriptor]) -> BatchCounts {
        let mut counts = BatchCounts::default();
        let mut flows = self.lock();
        for pkt in batch {
            let outcome = if pkt.byte_len == 0 {
                self.note_dropped();
                RecordOutcome::Dropped
            } else {
                self.record_locked(&mut flows, pkt)
            };
            counts.add(outcome);
        }
        counts
    }

    fn record_locked(&self, flows: &mut FlowMap, pkt: &PacketDescriptor) -> RecordOutcome {
        let key = resolver::resolve(flows, &self.local, pkt);
        let by_label = flows
            .entry(key.src_ip)
            .or_default()
            .entry(key.dst_ip)
            .or_default();

        match by_label.entry(key.port_label) {
            Entry::Occupied(mut slot) => {
                slot.get_mut().merge(pkt);
                RecordOutcome::Merged
            }
            Entry::Vacant(slot) => {
                slot.insert(FlowRecord::new(pkt, key.port_label));
                RecordOutcome::Created
            }
        }
    }

    /// Count a descriptor rejected before it reached the table.
    pub fn note_dropped(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dropped_descriptors(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Copy of the record stored under `key`, if any.
    pub fn get(&self, key: &FlowKey) -> Option<FlowRecord> {
        let flows = self.lock();
        resolver::lookup(&flows, key.src_ip, key.dst_ip, &key.port_label).cloned()
    }

    /// Number of flow records.
    pub fn len(&self) -> usize {
        self.lock()
            .values()
            .flat_map(|by_dst| by_dst.values())
            .map(|by_label| by_label.len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Classify every flow and collect export rows under one lock hold.
    ///
    /// Rows are sorted by (src, dst, label) after the lock is released.
    pub fn snapshot(&self, taken_at: u64) -> Snapshot {
        let (mut flows, totals) = {
            let guard = self.lock();
            classify::export(&guard, &self.local)
        };
        flows.sort_unstable_by_key(|row| (row.src_ip, row.dst_ip, row.port_label));

        Snapshot {
            taken_at,
            flows,
            totals,
            dropped_descriptors: self.dropped_descriptors(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FlowMap> {
        // A panic elsewhere cannot leave a half-applied merge behind: each
        // mutation is a single insert or in-place add.
        self.flows.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Latest published snapshot. Readers never see a stale queue, only the newest.
pub type SharedSnapshot = Arc<ArcSwap<Snapshot>>;

pub fn new_shared_snapshot() -> SharedSnapshot {
    Arc::new(ArcSwap::from_pointee(Snapshot::empty()))
}

/// Classifier loop: every `refresh`, snapshot `table` into `shared`, then hand
/// the stored snapshot to `publish`.
///
/// Returns once `shutdown` is set. A failed publish is logged and the next
/// tick publishes again.
pub fn run_classifier<F>(
    table: &FlowTable,
    shared: &SharedSnapshot,
    refresh: Duration,
    shutdown: &AtomicBool,
    mut publish: F,
) where
    F: FnMut(&Snapshot) -> Result<(), NetoflowError>,
{
    let ticker = crossbeam_channel::tick(refresh);

    loop {
        if shutdown.load(Ordering::Relaxed) {
            return;
        }

        let ticked = select! {
            recv(ticker) -> _ => true,
            default(SHUTDOWN_POLL) => false,
        };
        if !ticked {
            continue;
        }

        shared.store(Arc::new(table.snapshot(now_micros())));
        let current = shared.load_full();
        log::debug!(
            "Classified {} flows: inbound={} outbound={}",
            current.flows.len(),
            current.totals.total_inbound,
            current.totals.total_outbound
        );

        if let Err(e) = publish(current.as_ref()) {
            log::warn!("Publishing snapshot failed: {e}");
        }
    }
}
