//! Poll-merge store
//!
//! A [`PollMergeStore`] keeps the latest snapshot of one remote collection.
//! It polls on a fixed interval, and every response is reconciled against the
//! current snapshot with [`merge`](crate::engine::merge::merge) so that
//! client-only annotations survive refreshes.
//!
//! Polls run independently of each other. A slow response can land after a
//! newer one; that is harmless because the merge only depends on the two
//! snapshots involved. A failed poll leaves the snapshot untouched.
//!
//! Stopping bumps the store's epoch. Ticks and responses carry the epoch they
//! were started under and are ignored once it is stale, so nothing is issued
//! or applied after [`PollMergeStore::stop`] returns.

use crate::backend::TriageBackend;
use crate::engine::merge::{Reconcile, merge};
use crate::types::{Event, Group, Report};
use crate::{Result, triage_error};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::future::poll_fn;
use std::pin::pin;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::Poll;
use std::time::Duration;
use tokio::sync::{RwLock, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// A remote collection the store can poll
#[async_trait]
pub trait RemoteCollection: Send + Sync + 'static {
    type Item: Reconcile + Clone + Send + Sync + 'static;

    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Fetch the whole collection, in display order
    async fn fetch(&self) -> Result<Vec<Self::Item>>;
}

/// Threat-pattern groups
pub struct GroupFeed(pub Arc<dyn TriageBackend>);

/// Raw events, most recent first
pub struct EventFeed(pub Arc<dyn TriageBackend>);

/// Submitted reports, most recent first
pub struct ReportFeed(pub Arc<dyn TriageBackend>);

#[async_trait]
impl RemoteCollection for GroupFeed {
    type Item = Group;

    fn name(&self) -> &'static str {
        "groups"
    }

    async fn fetch(&self) -> Result<Vec<Group>> {
        self.0.list_groups().await
    }
}

#[async_trait]
impl RemoteCollection for EventFeed {
    type Item = Event;

    fn name(&self) -> &'static str {
        "events"
    }

    async fn fetch(&self) -> Result<Vec<Event>> {
        let mut events = self.0.list_events().await?;
        events.reverse();
        Ok(events)
    }
}

#[async_trait]
impl RemoteCollection for ReportFeed {
    type Item = Report;

    fn name(&self) -> &'static str {
        "reports"
    }

    async fn fetch(&self) -> Result<Vec<Report>> {
        let mut reports = self.0.list_reports().await?;
        reports.reverse();
        Ok(reports)
    }
}

/// Immutable view of a store at one point in time
#[derive(Debug, Clone)]
pub struct Snapshot<T> {
    pub items: Vec<T>,
    /// Identities first seen in the latest merge
    pub newly_inserted: HashSet<String>,
    pub last_updated: Option<DateTime<Utc>>,
    /// Incremented on every merge and local update
    pub version: u64,
}

impl<T> Default for Snapshot<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            newly_inserted: HashSet::new(),
            last_updated: None,
            version: 0,
        }
    }
}

impl<T: Reconcile> Snapshot<T> {
    pub fn get(&self, id: &str) -> Option<&T> {
        self.items.iter().find(|item| item.identity() == id)
    }

    pub fn is_new(&self, id: &str) -> bool {
        self.newly_inserted.contains(id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Fetch counters
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub fetches: u64,
    pub failures: u64,
    pub merges: u64,
    pub discarded: u64,
}

/// Interval timer shared by everything that polls
///
/// Each tick runs `on_tick` with the epoch the timer was started under, while
/// holding the epoch lock. [`stop`](Self::stop) bumps the epoch under the same
/// lock, so once it returns no tick can fire again.
pub(crate) struct PollTimer {
    name: &'static str,
    epoch: Arc<Mutex<u64>>,
    stop_tx: mpsc::Sender<()>,
    handle: JoinHandle<()>,
}

impl PollTimer {
    /// Spawn the timer; the first tick fires immediately
    pub(crate) fn start<F>(
        name: &'static str,
        period: Duration,
        epoch: Arc<Mutex<u64>>,
        mut on_tick: F,
    ) -> Result<Self>
    where
        F: FnMut(u64) + Send + 'static,
    {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| triage_error!("Polling {} requires a Tokio runtime", name))?;
        if period.is_zero() {
            return Err(triage_error!("Polling interval for {} must be positive", name));
        }

        let started_under = *epoch
            .lock()
            .map_err(|_| triage_error!("Poll epoch lock poisoned"))?;
        let (stop_tx, mut stop_rx) = mpsc::channel::<()>(1);
        let tick_epoch = Arc::clone(&epoch);

        let handle = runtime.spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            tracing::info!("🔄 Polling {} every {:?}", name, period);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let Ok(current) = tick_epoch.lock() else { break };
                        if *current != started_under {
                            break;
                        }
                        on_tick(started_under);
                    }
                    _ = stop_rx.recv() => break,
                }
            }

            tracing::debug!("🛑 Polling {} stopped", name);
        });

        Ok(Self {
            name,
            epoch,
            stop_tx,
            handle,
        })
    }

    pub(crate) fn stop(self) {
        if let Ok(mut epoch) = self.epoch.lock() {
            *epoch += 1;
        }
        let _ = self.stop_tx.try_send(());
        self.handle.abort();
        tracing::info!("🛑 Stopped polling {}", self.name);
    }
}

/// Await `request` only if the poll that produced it is still current
///
/// The first poll of `request` happens while holding the epoch lock, so a
/// request is either issued before [`PollTimer::stop`] bumps the epoch or not
/// at all. Returns `None` when the epoch has already moved on.
pub(crate) async fn issue_if_current<F: Future>(
    epoch: &Mutex<u64>,
    expected: u64,
    request: F,
) -> Option<F::Output> {
    let mut request = pin!(request);
    let mut issued = false;
    poll_fn(|cx| {
        if issued {
            return request.as_mut().poll(cx).map(Some);
        }
        let Ok(current) = epoch.lock() else {
            return Poll::Ready(None);
        };
        if *current != expected {
            return Poll::Ready(None);
        }
        issued = true;
        request.as_mut().poll(cx).map(Some)
    })
    .await
}

struct StoreInner<C: RemoteCollection> {
    source: C,
    snapshot: RwLock<Snapshot<C::Item>>,
    epoch: Arc<Mutex<u64>>,
    page_cursor: AtomicUsize,
    version_tx: watch::Sender<u64>,
    fetches: AtomicU64,
    failures: AtomicU64,
    merges: AtomicU64,
    discarded: AtomicU64,
}

impl<C: RemoteCollection> StoreInner<C> {
    fn epoch_is(&self, expected: u64) -> bool {
        self.epoch.lock().map(|e| *e == expected).unwrap_or(false)
    }

    /// One fetch-merge cycle; `tick_epoch` is set for timer-driven polls
    async fn poll_once(&self, tick_epoch: Option<u64>) -> Result<bool> {
        let fetched = match tick_epoch {
            Some(expected) => {
                match issue_if_current(&self.epoch, expected, self.source.fetch()).await {
                    Some(fetched) => fetched,
                    None => {
                        tracing::debug!("Skipping {} poll, store was stopped", self.source.name());
                        return Ok(false);
                    }
                }
            }
            None => self.source.fetch().await,
        };

        self.fetches.fetch_add(1, Ordering::Relaxed);
        let incoming = match fetched {
            Ok(items) => items,
            Err(e) => {
                self.failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    "❌ Fetching {} failed, keeping previous snapshot: {}",
                    self.source.name(),
                    e
                );
                return Err(e);
            }
        };

        let mut snapshot = self.snapshot.write().await;
        if let Some(expected) = tick_epoch {
            if !self.epoch_is(expected) {
                self.discarded.fetch_add(1, Ordering::Relaxed);
                tracing::debug!("Discarding late {} response", self.source.name());
                return Ok(false);
            }
        }

        let merged = merge(&snapshot.items, incoming);
        if !merged.dropped.is_empty() {
            tracing::debug!(
                "{} {} dropped from {}",
                merged.dropped.len(),
                if merged.dropped.len() == 1 { "item" } else { "items" },
                self.source.name()
            );
        }

        let version = snapshot.version + 1;
        *snapshot = Snapshot {
            items: merged.items,
            newly_inserted: merged.newly_inserted,
            last_updated: Some(Utc::now()),
            version,
        };
        drop(snapshot);

        self.merges.fetch_add(1, Ordering::Relaxed);
        self.version_tx.send_replace(version);
        Ok(true)
    }
}

/// Latest snapshot of one remote collection, kept fresh by polling
pub struct PollMergeStore<C: RemoteCollection> {
    inner: Arc<StoreInner<C>>,
    timer: Mutex<Option<PollTimer>>,
}

impl<C: RemoteCollection> PollMergeStore<C> {
    pub fn new(source: C) -> Self {
        let (version_tx, _) = watch::channel(0);
        Self {
            inner: Arc::new(StoreInner {
                source,
                snapshot: RwLock::new(Snapshot::default()),
                epoch: Arc::new(Mutex::new(0)),
                page_cursor: AtomicUsize::new(1),
                version_tx,
                fetches: AtomicU64::new(0),
                failures: AtomicU64::new(0),
                merges: AtomicU64::new(0),
                discarded: AtomicU64::new(0),
            }),
            timer: Mutex::new(None),
        }
    }

    /// Fetch immediately, then once per `interval`
    ///
    /// Starting a running store is a no-op. Must be called from within a
    /// Tokio runtime.
    pub fn start(&self, interval: Duration) -> Result<()> {
        let mut timer = self
            .timer
            .lock()
            .map_err(|_| triage_error!("Store timer lock poisoned"))?;
        if timer.is_some() {
            return Ok(());
        }

        let inner = Arc::clone(&self.inner);
        *timer = Some(PollTimer::start(
            self.inner.source.name(),
            interval,
            Arc::clone(&self.inner.epoch),
            move |tick_epoch| {
                let inner = Arc::clone(&inner);
                tokio::spawn(async move {
                    let _ = inner.poll_once(Some(tick_epoch)).await;
                });
            },
        )?);
        Ok(())
    }

    /// Stop polling; in-flight responses are discarded when they land
    pub fn stop(&self) {
        if let Ok(mut timer) = self.timer.lock() {
            if let Some(timer) = timer.take() {
                timer.stop();
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.timer.lock().map(|t| t.is_some()).unwrap_or(false)
    }

    /// Run one fetch-merge cycle now, whether or not the store is polling
    ///
    /// Returns whether the response was merged. A failed fetch is returned
    /// as an error and the snapshot is kept as is.
    pub async fn refresh(&self) -> Result<bool> {
        self.inner.poll_once(None).await
    }

    /// Out-of-cycle refresh after a mutation; also resets the page cursor
    pub async fn force_refresh(&self) -> Result<bool> {
        self.set_page_cursor(1);
        self.refresh().await
    }

    pub async fn snapshot(&self) -> Snapshot<C::Item> {
        self.inner.snapshot.read().await.clone()
    }

    pub async fn items(&self) -> Vec<C::Item> {
        self.inner.snapshot.read().await.items.clone()
    }

    pub async fn get(&self, id: &str) -> Option<C::Item> {
        self.inner.snapshot.read().await.get(id).cloned()
    }

    /// Apply a local change to one item; returns false if it is not present
    pub async fn update_item<F>(&self, id: &str, f: F) -> bool
    where
        F: FnOnce(&mut C::Item),
    {
        let mut snapshot = self.inner.snapshot.write().await;
        let Some(item) = snapshot.items.iter_mut().find(|item| item.identity() == id) else {
            return false;
        };
        f(item);
        snapshot.version += 1;
        let version = snapshot.version;
        drop(snapshot);

        self.inner.version_tx.send_replace(version);
        true
    }

    /// Notified with the new version after every change
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.inner.version_tx.subscribe()
    }

    /// Current page, 1-based
    pub fn page_cursor(&self) -> usize {
        self.inner.page_cursor.load(Ordering::Relaxed)
    }

    pub fn set_page_cursor(&self, page: usize) {
        self.inner.page_cursor.store(page.max(1), Ordering::Relaxed);
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            fetches: self.inner.fetches.load(Ordering::Relaxed),
            failures: self.inner.failures.load(Ordering::Relaxed),
            merges: self.inner.merges.load(Ordering::Relaxed),
            discarded: self.inner.discarded.load(Ordering::Relaxed),
        }
    }
}

impl<C: RemoteCollection> Drop for PollMergeStore<C> {
    fn drop(&mut self) {
        self.stop();
    }
}
