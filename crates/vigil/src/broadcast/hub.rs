//! Live snapshot distribution.
//!
//! Subscribers get a bounded channel of [`SnapshotEvent`]s. While at least
//! one subscriber exists a ticker runs the maintenance pass and pushes fresh
//! snapshots; it starts with the first subscriber and stops after the last
//! one goes away. A subscriber that falls behind loses events rather than
//! stalling the others.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};

use super::snapshot::{batch_events, global_events, SnapshotEvent};
use crate::db::Database;
use crate::error::Result;
use crate::maintenance::Maintenance;
use crate::periodic::{PeriodicRunner, PeriodicTask, RunnerHandle};

struct Subscriber {
    batch_filter: Option<String>,
    tx: mpsc::Sender<SnapshotEvent>,
}

pub(crate) struct HubInner {
    db: Database,
    maintenance: Maintenance,
    interval: Duration,
    buffer: usize,
    recent_limit: u32,
    next_id: AtomicU64,
    // Lock order: `ticker` before `subscribers`.
    subscribers: Mutex<HashMap<u64, Subscriber>>,
    ticker: Mutex<Option<RunnerHandle>>,
}

/// Handle to the notifier. Cloning shares the same subscriber set.
#[derive(Clone)]
pub struct LiveHub {
    inner: Arc<HubInner>,
}

/// Settings for a [`LiveHub`].
#[derive(Debug, Clone, Copy)]
pub struct HubSettings {
    pub interval: Duration,
    pub buffer: usize,
    pub recent_limit: u32,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(1000),
            buffer: 64,
            recent_limit: 200,
        }
    }
}

impl LiveHub {
    pub fn new(db: Database, maintenance: Maintenance, settings: HubSettings) -> Self {
        Self {
            inner: Arc::new(HubInner {
                db,
                maintenance,
                interval: settings.interval,
                buffer: settings.buffer.max(1),
                recent_limit: settings.recent_limit,
                next_id: AtomicU64::new(1),
                subscribers: Mutex::new(HashMap::new()),
                ticker: Mutex::new(None),
            }),
        }
    }

    /// Registers an observer. The returned subscription already holds a
    /// full snapshot taken right after a maintenance pass.
    pub fn subscribe(&self, batch_filter: Option<String>) -> Result<Subscription> {
        let inner = &self.inner;

        if let Err(e) = inner.maintenance.run() {
            warn!(error = %e, "Maintenance before initial snapshot failed");
        }

        let (tx, rx) = mpsc::channel(inner.buffer);
        let mut events = global_events(&inner.db, inner.recent_limit)?;
        if let Some(batch_id) = &batch_filter {
            events.extend(batch_events(&inner.db, batch_id)?);
        }
        for event in events {
            if tx.try_send(event).is_err() {
                break;
            }
        }

        let id = inner.next_id.fetch_add(1, Ordering::Relaxed);
        // Held across the insert so a concurrent stop cannot observe an
        // empty set and then take a ticker started for this subscriber.
        let mut ticker = inner.lock_ticker();
        {
            let mut subs = inner.lock_subscribers();
            subs.insert(
                id,
                Subscriber {
                    batch_filter: batch_filter.clone(),
                    tx,
                },
            );
            debug!(subscriber = id, total = subs.len(), "Subscriber added");
        }
        HubInner::ensure_ticker(inner, &mut ticker);
        drop(ticker);

        Ok(Subscription {
            id,
            batch_filter,
            rx,
            hub: Arc::downgrade(inner),
        })
    }

    /// Runs one notifier tick: maintenance, then a snapshot to every live
    /// subscriber. Does nothing without subscribers.
    pub fn tick(&self) -> Result<()> {
        self.inner.tick()
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock_subscribers().len()
    }

    /// Whether the background ticker is currently running.
    pub fn is_ticking(&self) -> bool {
        self.inner
            .lock_ticker()
            .as_ref()
            .is_some_and(|h| !h.is_finished())
    }
}

impl HubInner {
    fn lock_subscribers(&self) -> std::sync::MutexGuard<'_, HashMap<u64, Subscriber>> {
        // A panic while holding the lock leaves the map itself intact.
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn lock_ticker(&self) -> std::sync::MutexGuard<'_, Option<RunnerHandle>> {
        self.ticker
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn ensure_ticker(this: &Arc<HubInner>, ticker: &mut Option<RunnerHandle>) {
        if ticker.as_ref().is_some_and(|h| !h.is_finished()) {
            return;
        }

        let task = Arc::new(HubTick {
            hub: Arc::downgrade(this),
        });
        match PeriodicRunner::new()
            .with_task(task, this.interval)
            .start("vigil-notifier")
        {
            Ok(handle) => {
                info!("Notifier ticker started");
                *ticker = Some(handle);
            }
            Err(e) => warn!(error = %e, "Could not start notifier ticker"),
        }
    }

    /// Stops the ticker unless a subscriber registered since the caller
    /// saw the set empty.
    fn stop_ticker_if_idle(&self) {
        let mut ticker = self.lock_ticker();
        if !self.lock_subscribers().is_empty() {
            return;
        }
        if let Some(handle) = ticker.take() {
            handle.stop();
            info!("Notifier ticker stopped");
        }
    }

    fn unsubscribe(&self, id: u64) {
        let now_empty = {
            let mut subs = self.lock_subscribers();
            subs.remove(&id);
            subs.is_empty()
        };
        debug!(subscriber = id, "Subscriber removed");
        if now_empty {
            self.stop_ticker_if_idle();
        }
    }

    fn prune_closed(&self) -> bool {
        let mut subs = self.lock_subscribers();
        subs.retain(|_, s| !s.tx.is_closed());
        subs.is_empty()
    }

    fn tick(&self) -> Result<()> {
        if self.prune_closed() {
            self.stop_ticker_if_idle();
            return Ok(());
        }

        self.maintenance.run()?;

        let shared = global_events(&self.db, self.recent_limit)?;

        let targets: Vec<(u64, Option<String>, mpsc::Sender<SnapshotEvent>)> = self
            .lock_subscribers()
            .iter()
            .map(|(id, s)| (*id, s.batch_filter.clone(), s.tx.clone()))
            .collect();

        let mut per_batch: HashMap<String, Vec<SnapshotEvent>> = HashMap::new();
        let mut closed = Vec::new();

        for (id, filter, tx) in targets {
            let mut events = shared.clone();
            if let Some(batch_id) = filter {
                if !per_batch.contains_key(&batch_id) {
                    per_batch.insert(batch_id.clone(), batch_events(&self.db, &batch_id)?);
                }
                if let Some(extra) = per_batch.get(&batch_id) {
                    events.extend(extra.iter().cloned());
                }
            }

            for event in events {
                match tx.try_send(event) {
                    Ok(()) => {}
                    Err(TrySendError::Full(event)) => {
                        debug!(subscriber = id, event = event.name(), "Subscriber lagging, event dropped");
                    }
                    Err(TrySendError::Closed(_)) => {
                        closed.push(id);
                        break;
                    }
                }
            }
        }

        for id in closed {
            self.unsubscribe(id);
        }
        Ok(())
    }
}

impl Drop for HubInner {
    fn drop(&mut self) {
        if let Some(handle) = self.lock_ticker().take() {
            handle.stop();
        }
    }
}

struct HubTick {
    hub: Weak<HubInner>,
}

impl PeriodicTask for HubTick {
    fn name(&self) -> &'static str {
        "notifier"
    }

    fn run_once(&self) -> Result<()> {
        match self.hub.upgrade() {
            Some(inner) => inner.tick(),
            None => Ok(()),
        }
    }
}

/// A live view registration. Dropping it unsubscribes.
pub struct Subscription {
    id: u64,
    batch_filter: Option<String>,
    rx: mpsc::Receiver<SnapshotEvent>,
    hub: Weak<HubInner>,
}

impl Subscription {
    pub fn batch_filter(&self) -> Option<&str> {
        self.batch_filter.as_deref()
    }

    pub async fn recv(&mut self) -> Option<SnapshotEvent> {
        self.rx.recv().await
    }

    /// Blocking receive for callers outside an async runtime.
    pub fn blocking_recv(&mut self) -> Option<SnapshotEvent> {
        self.rx.blocking_recv()
    }

    pub fn try_recv(&mut self) -> Option<SnapshotEvent> {
        self.rx.try_recv().ok()
    }

    /// Drains everything currently buffered.
    pub fn drain(&mut self) -> Vec<SnapshotEvent> {
        std::iter::from_fn(|| self.rx.try_recv().ok()).collect()
    }

    /// Stops delivery. The hub forgets the subscription on its next tick.
    pub fn close(&mut self) {
        self.rx.close();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.hub.upgrade() {
            inner.unsubscribe(self.id);
        }
    }
}
