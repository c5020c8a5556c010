//! hubsync store: reactive collection cells, the resource setter registry,
//! and the event batching / reconciliation engine.
//!
//! The stream client appends watch events to the [`EventQueue`]; the
//! [`Engine`] drains them in batches (periodically, or immediately on a
//! flush signal), replays each batch against the per-kind identity caches,
//! and republishes whole collections behind [`Cell`]s. Consumers only ever
//! hold [`CellReader`]s.

#![forbid(unsafe_code)]

pub mod kinds;

use std::collections::hash_map::Entry;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use hubsync_core::{EventAction, KindKey, ResourceRecord, WatchEvent};
use rustc_hash::FxHashMap;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use kinds::{BindingSpec, KindSpec};

/// Records grouped by an auxiliary key (the namespace), for kinds consumed
/// as "records per owner" rather than a flat list.
pub type GroupedRecords = FxHashMap<String, Vec<ResourceRecord>>;

pub type CollectionReader = CellReader<Vec<ResourceRecord>>;
pub type GroupedReader = CellReader<GroupedRecords>;

// ---------------- reactive cells ----------------

/// Writable half of a reactive value cell.
///
/// The cell imposes no ordering or validation; it is a plain value slot with
/// change notification. Writers stay inside this crate's registry (and the
/// stream client, for the settings value); everything else reads.
pub struct Cell<T> {
    value: Arc<ArcSwap<T>>,
    version: watch::Sender<u64>,
}

impl<T> Cell<T> {
    pub fn new(initial: T) -> Self {
        let (version, _) = watch::channel(0u64);
        Self { value: Arc::new(ArcSwap::from_pointee(initial)), version }
    }

    /// Swap in a new value wholesale and notify subscribers.
    pub fn publish(&self, next: T) {
        self.value.store(Arc::new(next));
        self.version.send_modify(|v| *v = v.wrapping_add(1));
    }

    pub fn reader(&self) -> CellReader<T> {
        CellReader { value: Arc::clone(&self.value), version: self.version.subscribe() }
    }
}

/// Read-only handle to a cell: lock-free access to the current value plus a
/// change subscription.
pub struct CellReader<T> {
    value: Arc<ArcSwap<T>>,
    version: watch::Receiver<u64>,
}

impl<T> CellReader<T> {
    pub fn current(&self) -> Arc<T> {
        self.value.load_full()
    }

    /// Receiver that changes whenever the cell is republished.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.version.clone()
    }
}

impl<T> Clone for CellReader<T> {
    fn clone(&self) -> Self {
        Self { value: Arc::clone(&self.value), version: self.version.clone() }
    }
}

// ---------------- registry ----------------

enum Binding {
    Direct(Cell<Vec<ResourceRecord>>),
    ByNamespace(Cell<GroupedRecords>),
}

/// One kind partition: the identity cache plus its published collection.
///
/// The two are maintained jointly; the published collection is always
/// exactly the cache's values.
struct KindEntry {
    cache: FxHashMap<String, ResourceRecord>,
    binding: Binding,
}

impl KindEntry {
    fn new(spec: &KindSpec) -> Self {
        let binding = match spec.binding {
            BindingSpec::Direct => Binding::Direct(Cell::new(Vec::new())),
            BindingSpec::ByNamespace => Binding::ByNamespace(Cell::new(GroupedRecords::default())),
        };
        Self { cache: FxHashMap::default(), binding }
    }

    /// Replay one batch of events in arrival order, then republish the
    /// partition.
    fn apply(&mut self, key: &KindKey, events: Vec<WatchEvent>) -> usize {
        let mut applied = 0usize;
        for ev in events {
            let Some(identity) = ev.object.identity() else {
                warn!(kind = %key, "dropping event for record without metadata.name");
                continue;
            };
            match ev.action {
                EventAction::Added | EventAction::Modified => {
                    self.cache.insert(identity.key(), ev.object);
                }
                // deleting an absent identity is a no-op
                EventAction::Deleted => {
                    self.cache.remove(&identity.key());
                }
            }
            applied += 1;
        }
        self.republish();
        applied
    }

    /// Publish the cache contents, sorted by identity key for stable
    /// iteration.
    fn republish(&self) {
        let mut entries: Vec<(&String, &ResourceRecord)> = self.cache.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        match &self.binding {
            Binding::Direct(cell) => {
                cell.publish(entries.into_iter().map(|(_, rec)| rec.clone()).collect());
            }
            Binding::ByNamespace(cell) => {
                let mut grouped = GroupedRecords::default();
                for (_, rec) in entries {
                    let ns = rec.namespace().unwrap_or("").to_string();
                    grouped.entry(ns).or_default().push(rec.clone());
                }
                cell.publish(grouped);
            }
        }
    }
}

/// Maps (API group+version, Kind) to the partition responsible for it.
///
/// Built once per sync session from the compiled-in kind table; every build
/// allocates fresh identity caches and fresh cells, so sessions never share
/// state.
pub struct Registry {
    entries: FxHashMap<KindKey, KindEntry>,
}

impl Registry {
    /// Build from the default tracked-kind table.
    pub fn build() -> Self {
        Self::with_kinds(kinds::tracked_kinds())
    }

    /// Build from an explicit table.
    pub fn with_kinds(specs: &[KindSpec]) -> Self {
        let mut entries = FxHashMap::default();
        for spec in specs {
            entries.insert(KindKey::new(spec.group_version, spec.kind), KindEntry::new(spec));
        }
        info!(kinds = entries.len(), "registry built");
        Self { entries }
    }

    pub fn contains(&self, key: &KindKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Reader for a direct-bound partition; None if the kind is untracked
    /// or bound by namespace.
    pub fn reader(&self, group_version: &str, kind: &str) -> Option<CollectionReader> {
        match &self.entries.get(&KindKey::new(group_version, kind))?.binding {
            Binding::Direct(cell) => Some(cell.reader()),
            Binding::ByNamespace(_) => None,
        }
    }

    /// Reader for a namespace-grouped partition.
    pub fn grouped_reader(&self, group_version: &str, kind: &str) -> Option<GroupedReader> {
        match &self.entries.get(&KindKey::new(group_version, kind))?.binding {
            Binding::ByNamespace(cell) => Some(cell.reader()),
            Binding::Direct(_) => None,
        }
    }

    fn apply_group(&mut self, key: KindKey, events: Vec<WatchEvent>) -> usize {
        match self.entries.get_mut(&key) {
            Some(entry) => entry.apply(&key, events),
            None => {
                // the backend may emit kinds this client does not track
                debug!(kind = %key, count = events.len(), "dropping events for untracked kind");
                metrics::counter!("sync_events_unknown_kind_total", events.len() as u64);
                0
            }
        }
    }
}

// ---------------- pending event queue ----------------

/// Append-only-until-drained buffer of watch events, scoped to one stream
/// generation.
#[derive(Default)]
pub struct EventQueue {
    inner: Mutex<Vec<WatchEvent>>,
}

impl EventQueue {
    pub fn push(&self, ev: WatchEvent) {
        let mut q = self.lock();
        q.push(ev);
        metrics::gauge!("sync_queue_depth", q.len() as f64);
    }

    /// Discard everything queued. Called on START, when a new resync
    /// generation begins and prior events must not mix in.
    pub fn clear(&self) {
        let mut q = self.lock();
        if !q.is_empty() {
            debug!(discarded = q.len(), "clearing pending events for new stream generation");
            q.clear();
        }
        metrics::gauge!("sync_queue_depth", 0.0);
    }

    /// Atomic swap-and-clear: the returned batch is complete, and events
    /// arriving while it is processed land in the next batch.
    pub fn take(&self) -> Vec<WatchEvent> {
        let batch = std::mem::take(&mut *self.lock());
        metrics::gauge!("sync_queue_depth", 0.0);
        batch
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<WatchEvent>> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

// ---------------- reconciliation engine ----------------

/// Batching and reconciliation engine: drains the queue, groups events by
/// kind, and replays each group against its partition.
pub struct Engine {
    queue: EventQueue,
    registry: Mutex<Registry>,
}

impl Engine {
    pub fn new(registry: Registry) -> Self {
        Self { queue: EventQueue::default(), registry: Mutex::new(registry) }
    }

    pub fn queue(&self) -> &EventQueue {
        &self.queue
    }

    /// Apply everything currently queued.
    ///
    /// Idempotent: an empty queue returns immediately and touches no cell.
    /// Safe to call from both the periodic loop and the stream client; the
    /// registry is locked for the duration of a drain and no await is held
    /// across the lock.
    pub fn drain(&self) {
        let batch = self.queue.take();
        if batch.is_empty() {
            return;
        }
        let t0 = Instant::now();
        let total = batch.len();

        // Group by kind, preserving arrival order within each group.
        let mut order: Vec<KindKey> = Vec::new();
        let mut groups: FxHashMap<KindKey, Vec<WatchEvent>> = FxHashMap::default();
        for ev in batch {
            let Some(key) = ev.object.kind_key() else {
                warn!("dropping event for record without apiVersion/kind");
                continue;
            };
            match groups.entry(key) {
                Entry::Occupied(mut o) => o.get_mut().push(ev),
                Entry::Vacant(v) => {
                    order.push(v.key().clone());
                    v.insert(vec![ev]);
                }
            }
        }

        let mut registry = self.lock_registry();
        let mut applied = 0usize;
        for key in order {
            if let Some(events) = groups.remove(&key) {
                applied += registry.apply_group(key, events);
            }
        }
        drop(registry);

        metrics::counter!("sync_drains_total", 1u64);
        metrics::counter!("sync_events_applied_total", applied as u64);
        metrics::histogram!("sync_drain_apply_ms", t0.elapsed().as_secs_f64() * 1_000.0);
        debug!(total, applied, took_ms = %t0.elapsed().as_millis(), "drained event batch");
    }

    pub fn reader(&self, group_version: &str, kind: &str) -> Option<CollectionReader> {
        self.lock_registry().reader(group_version, kind)
    }

    pub fn grouped_reader(&self, group_version: &str, kind: &str) -> Option<GroupedReader> {
        self.lock_registry().grouped_reader(group_version, kind)
    }

    fn lock_registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Spawn the periodic drain loop. Runs until the shutdown channel flips or
/// closes, then performs one final flush.
pub fn spawn_drain_loop(
    engine: Arc<Engine>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => engine.drain(),
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        engine.drain();
                        break;
                    }
                }
            }
        }
        info!("drain loop stopped");
    })
}
