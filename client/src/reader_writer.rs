//! ReaderWriter - owner of the local mirror.
//!
//! The mirror is a plain [`Cache`] behind one async mutex. Every reader,
//! every edit and every inbound push takes that lock, so a reader never sees
//! a half-applied change set and published change sets are strictly ordered.
//!
//! # Lifecycle
//!
//! `Uninitialized -> Initializing -> Ready`. The first accessor, edit or
//! subscription triggers the initial load: the snapshot is fetched from the
//! hub, the mirror is reseeded from it and the resulting `Add` batch is
//! published. Pushes that arrive while a load is in flight are buffered and
//! replayed after the reseed. After a transport reconnect the load runs
//! again and the difference to the old mirror is published. Items whose
//! JSON form did not change are left out of that difference.
//!
//! # Edits
//!
//! An edit runs a closure against a [`RemoteUpdater`] wrapping the mirror.
//! When anyone listens for changes the mirror is wrapped in a
//! [`ChangeAwareCache`] and the captured diff is published as one change set;
//! otherwise the plain cache is mutated directly. While an edit is running,
//! other tasks may join it with [`ReaderWriter::edit_nested`]; their closures
//! run against the same updater before the batch is captured.

use crate::dispatcher::Dispatcher;
use crate::error::{Error, Result};
use crate::feed::Feed;
use crate::selector::{CacheItem, CacheKey, KeySelector};
use crate::transport::Transport;
use crate::updater::RemoteUpdater;
use keysync_engine::{
    decode_change_set, decode_snapshot, Cache, Change, ChangeAwareCache, ChangeReason, ChangeSet,
    Filter, HubCommand, KeyedStore, PredicateCodec, CHANGES_EVENT,
};
use parking_lot::Mutex as SyncMutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;

/// Inspects a change set before it is committed, together with the mirror
/// as it was before the edit.
pub type PreviewHandler<K, T> = Arc<dyn Fn(&Cache<K, T>, &ChangeSet<K, T>) + Send + Sync>;

type NestedJob<K, T> = Box<dyn for<'u> FnOnce(&mut RemoteUpdater<'u, K, T>) + Send>;

/// Load state of the mirror.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Uninitialized,
    Initializing,
    Ready,
}

struct MirrorState<K, T> {
    cache: Cache<K, T>,
    /// Pushes received while a load is in flight
    buffered: Vec<String>,
    /// Server-side filter, fixed by the first load
    filter: Option<Filter>,
    filter_fixed: bool,
    /// Last count published on the count feed
    published_count: usize,
}

struct NestedSlot<K, T> {
    open: bool,
    queue: Vec<NestedJob<K, T>>,
}

/// Owns the mirror and serializes all access to it.
pub struct ReaderWriter<K, T> {
    state: Mutex<MirrorState<K, T>>,
    phase: watch::Sender<Phase>,
    nested: SyncMutex<NestedSlot<K, T>>,
    transport: Arc<dyn Transport>,
    dispatcher: Dispatcher,
    selector: Option<KeySelector<K, T>>,
    codec: Arc<dyn PredicateCodec>,
    changes: Feed<ChangeSet<K, T>>,
    previews: Feed<ChangeSet<K, T>>,
    preview_handlers: SyncMutex<Vec<PreviewHandler<K, T>>>,
    counts: Feed<usize>,
    disposed: AtomicBool,
    runtime: Handle,
    inbound_task: SyncMutex<Option<JoinHandle<()>>>,
    dispatch_task: SyncMutex<Option<JoinHandle<()>>>,
}

impl<K: CacheKey, T: CacheItem> ReaderWriter<K, T> {
    /// Create the reader/writer and subscribe it to the transport.
    pub fn start(
        runtime: Handle,
        transport: Arc<dyn Transport>,
        selector: Option<KeySelector<K, T>>,
        codec: Arc<dyn PredicateCodec>,
    ) -> Arc<Self> {
        let (dispatcher, dispatch_task) = {
            let _guard = runtime.enter();
            Dispatcher::spawn(transport.clone())
        };
        let (phase, _) = watch::channel(Phase::Uninitialized);

        let rw = Arc::new(Self {
            state: Mutex::new(MirrorState {
                cache: Cache::new(),
                buffered: Vec::new(),
                filter: None,
                filter_fixed: false,
                published_count: 0,
            }),
            phase,
            nested: SyncMutex::new(NestedSlot {
                open: false,
                queue: Vec::new(),
            }),
            transport: transport.clone(),
            dispatcher,
            selector,
            codec,
            changes: Feed::new(),
            previews: Feed::new(),
            preview_handlers: SyncMutex::new(Vec::new()),
            counts: Feed::new(),
            disposed: AtomicBool::new(false),
            runtime: runtime.clone(),
            inbound_task: SyncMutex::new(None),
            dispatch_task: SyncMutex::new(Some(dispatch_task)),
        });

        let (inbound_tx, mut inbound_rx) = mpsc::unbounded_channel::<String>();
        transport.on_push(
            CHANGES_EVENT,
            Arc::new(move |payload: String| {
                let _ = inbound_tx.send(payload);
            }),
        );

        let weak = Arc::downgrade(&rw);
        let inbound = runtime.spawn(async move {
            while let Some(payload) = inbound_rx.recv().await {
                let Some(rw) = weak.upgrade() else { break };
                rw.receive(payload).await;
            }
        });
        *rw.inbound_task.lock() = Some(inbound);

        let weak: Weak<Self> = Arc::downgrade(&rw);
        let handle = runtime;
        transport.on_reconnected(Arc::new(move || {
            if let Some(rw) = weak.upgrade() {
                handle.spawn(async move { rw.resync().await });
            }
        }));

        rw
    }

    pub fn phase(&self) -> Phase {
        *self.phase.borrow()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::SeqCst)
    }

    fn check_disposed(&self) -> Result<()> {
        if self.is_disposed() {
            Err(Error::Disposed)
        } else {
            Ok(())
        }
    }

    /// Wait until the mirror is loaded, starting the load if nobody has.
    ///
    /// `filter` is only honoured by the load that fixes the mirror's filter.
    pub async fn ensure_ready(&self, filter: Option<&Filter>) -> Result<()> {
        let mut phase_rx = self.phase.subscribe();
        loop {
            self.check_disposed()?;
            let phase = *phase_rx.borrow_and_update();
            match phase {
                Phase::Ready => return Ok(()),
                Phase::Initializing => {
                    if phase_rx.changed().await.is_err() {
                        return Err(Error::Disposed);
                    }
                }
                Phase::Uninitialized => {
                    let claimed = self.phase.send_if_modified(|p| {
                        if *p == Phase::Uninitialized {
                            *p = Phase::Initializing;
                            true
                        } else {
                            false
                        }
                    });
                    if claimed {
                        return self.load(filter.cloned()).await;
                    }
                }
            }
        }
    }

    async fn load(&self, requested: Option<Filter>) -> Result<()> {
        match self.fetch(requested).await {
            Ok(pairs) => {
                let mut state = self.state.lock().await;
                self.reseed(&mut state, pairs);
                Ok(())
            }
            Err(e) => {
                let mut state = self.state.lock().await;
                state.buffered.clear();
                self.phase.send_replace(Phase::Uninitialized);
                tracing::warn!(error = %e, "Initial load failed");
                Err(e)
            }
        }
    }

    async fn fetch(&self, requested: Option<Filter>) -> Result<Vec<(K, T)>> {
        if let Some(selector) = &self.selector {
            let init = HubCommand::Initialize {
                key_field: selector.field().clone(),
            };
            self.transport
                .invoke(init.target(), init.into_arguments())
                .await?;
        }

        let filter = {
            let mut state = self.state.lock().await;
            if !state.filter_fixed {
                state.filter = requested;
                state.filter_fixed = true;
            }
            state.filter.clone()
        };

        let command = match &filter {
            Some(filter) => HubCommand::GetKeyValuePairsFiltered {
                filter: self.codec.encode(filter)?,
            },
            None => HubCommand::GetKeyValuePairs,
        };
        let snapshot = self
            .transport
            .invoke(command.target(), command.into_arguments())
            .await?;

        Ok(decode_snapshot(snapshot)?)
    }

    /// Replace the mirror with a fresh snapshot and publish the difference.
    fn reseed(&self, state: &mut MirrorState<K, T>, pairs: Vec<(K, T)>) {
        let fresh: HashSet<K> = pairs.iter().map(|(key, _)| key.clone()).collect();

        let mut diff = ChangeAwareCache::from_cache(std::mem::take(&mut state.cache));
        for key in diff.keys() {
            if !fresh.contains(&key) {
                diff.remove(&key);
            }
        }
        for (key, item) in pairs {
            if diff.lookup(&key).is_some_and(|held| same_json(held, &item)) {
                continue;
            }
            diff.add_or_update(item, key);
        }

        let (cache, changes) = diff.into_parts();
        state.cache = cache;
        let buffered = std::mem::take(&mut state.buffered);
        self.phase.send_replace(Phase::Ready);

        tracing::info!(
            items = state.cache.len(),
            changes = changes.len(),
            replayed = buffered.len(),
            "Mirror loaded"
        );

        self.publish(state, changes);
        for payload in buffered {
            if let Some(changes) = self.merge_payload(state, &payload) {
                self.publish(state, changes);
            }
        }
    }

    async fn resync(&self) {
        if self.is_disposed() {
            return;
        }
        let claimed = self.phase.send_if_modified(|p| {
            if *p == Phase::Ready {
                *p = Phase::Initializing;
                true
            } else {
                false
            }
        });
        if !claimed {
            return;
        }

        tracing::info!("Transport reconnected, resynchronizing mirror");
        if let Err(e) = self.load(None).await {
            tracing::warn!(error = %e, "Resync failed, the next access reloads");
        }
    }

    async fn receive(&self, payload: String) {
        let mut state = self.state.lock().await;
        let phase = *self.phase.borrow();
        match phase {
            Phase::Uninitialized => {
                tracing::trace!("Ignoring push before the first load");
            }
            Phase::Initializing => state.buffered.push(payload),
            Phase::Ready => {
                if let Some(changes) = self.merge_payload(&mut state, &payload) {
                    self.publish(&mut state, changes);
                }
            }
        }
    }

    fn merge_payload(&self, state: &mut MirrorState<K, T>, payload: &str) -> Option<ChangeSet<K, T>> {
        match decode_change_set::<K, T>(payload) {
            Ok(remote) => Some(merge_inbound(
                &mut state.cache,
                state.filter.as_ref(),
                remote,
            )),
            Err(e) => {
                tracing::warn!(error = %e, "Dropping malformed change set");
                None
            }
        }
    }

    fn publish(&self, state: &mut MirrorState<K, T>, changes: ChangeSet<K, T>) {
        if !changes.is_empty() {
            tracing::debug!(changes = changes.len(), "Publishing change set");
            self.changes.publish(changes);
        }

        let count = state.cache.len();
        if count != state.published_count {
            state.published_count = count;
            self.counts.publish(count);
        }
    }

    /// Run `f` as one edit and publish its changes as one change set.
    ///
    /// Errors returned by `f` are returned after whatever it changed before
    /// failing has been published.
    pub async fn edit<R, F>(&self, f: F) -> Result<R>
    where
        F: for<'u> FnOnce(&mut RemoteUpdater<'u, K, T>) -> Result<R>,
    {
        self.ensure_ready(None).await?;
        let mut state = self.state.lock().await;
        self.check_disposed()?;

        let handlers = self.preview_handlers.lock().clone();
        let previewing = !handlers.is_empty() || self.previews.has_subscribers();
        let collecting = previewing || self.changes.has_subscribers();
        let before = previewing.then(|| state.cache.clone());

        self.nested.lock().open = true;
        let mirror = std::mem::take(&mut state.cache);

        let (cache, changes, result) = if collecting {
            let mut tracked = ChangeAwareCache::from_cache(mirror);
            let result = self.run_session(&mut tracked, f);
            let (cache, changes) = tracked.into_parts();
            (cache, changes, result)
        } else {
            let mut plain = mirror;
            let result = self.run_session(&mut plain, f);
            (plain, ChangeSet::empty(), result)
        };

        if let Some(before) = before {
            if !changes.is_empty() {
                for handler in &handlers {
                    handler(&before, &changes);
                }
                self.previews.publish(changes.clone());
            }
        }

        state.cache = cache;
        self.publish(&mut state, changes);
        result
    }

    fn run_session<R, F>(&self, store: &mut dyn KeyedStore<K, T>, f: F) -> Result<R>
    where
        F: for<'u> FnOnce(&mut RemoteUpdater<'u, K, T>) -> Result<R>,
    {
        let mut updater = RemoteUpdater::new(store, self.selector.as_ref(), &self.dispatcher);
        let result = f(&mut updater);

        loop {
            let jobs = {
                let mut slot = self.nested.lock();
                if slot.queue.is_empty() {
                    slot.open = false;
                    break;
                }
                std::mem::take(&mut slot.queue)
            };
            for job in jobs {
                job(&mut updater);
            }
        }

        result
    }

    /// Join the edit currently running on another task.
    ///
    /// Fails with [`Error::InvalidState`] when no edit is running.
    pub async fn edit_nested<R, F>(&self, f: F) -> Result<R>
    where
        R: Send + 'static,
        F: for<'u> FnOnce(&mut RemoteUpdater<'u, K, T>) -> Result<R> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        {
            let mut slot = self.nested.lock();
            if !slot.open {
                return Err(Error::InvalidState(
                    "nested edit without an active outer edit".to_string(),
                ));
            }
            slot.queue
                .push(Box::new(move |updater: &mut RemoteUpdater<'_, K, T>| {
                    let _ = tx.send(f(updater));
                }));
        }

        rx.await.map_err(|_| {
            Error::InvalidState("outer edit ended before the nested edit ran".to_string())
        })?
    }

    pub async fn lookup(&self, key: &K) -> Result<Option<T>> {
        self.ensure_ready(None).await?;
        Ok(self.state.lock().await.cache.get(key).cloned())
    }

    pub async fn keys(&self) -> Result<Vec<K>> {
        self.ensure_ready(None).await?;
        Ok(self.state.lock().await.cache.keys())
    }

    pub async fn items(&self) -> Result<Vec<T>> {
        self.ensure_ready(None).await?;
        Ok(KeyedStore::items(&self.state.lock().await.cache))
    }

    pub async fn key_values(&self) -> Result<Vec<(K, T)>> {
        self.ensure_ready(None).await?;
        Ok(self.state.lock().await.cache.key_values())
    }

    pub async fn count(&self) -> Result<usize> {
        self.ensure_ready(None).await?;
        Ok(self.state.lock().await.cache.len())
    }

    /// Load if needed, then return the current contents as one `Add` batch
    /// together with a subscription to every later change set.
    pub async fn subscribe_changes(
        &self,
        filter: Option<&Filter>,
    ) -> Result<(ChangeSet<K, T>, mpsc::UnboundedReceiver<ChangeSet<K, T>>)> {
        self.ensure_ready(filter).await?;
        let state = self.state.lock().await;
        self.check_disposed()?;

        let initial = state
            .cache
            .iter()
            .map(|(key, item)| Change::add(key.clone(), item.clone()))
            .collect();
        Ok((initial, self.changes.subscribe()))
    }

    /// Like [`subscribe_changes`](Self::subscribe_changes) for a single key.
    pub async fn subscribe_key(
        &self,
        key: &K,
    ) -> Result<(Option<Change<K, T>>, mpsc::UnboundedReceiver<ChangeSet<K, T>>)> {
        self.ensure_ready(None).await?;
        let state = self.state.lock().await;
        self.check_disposed()?;

        let initial = state
            .cache
            .get(key)
            .map(|item| Change::add(key.clone(), item.clone()));
        Ok((initial, self.changes.subscribe()))
    }

    /// Current count and a subscription to later counts. Does not load.
    pub async fn subscribe_counts(&self) -> Result<(usize, mpsc::UnboundedReceiver<usize>)> {
        let state = self.state.lock().await;
        self.check_disposed()?;
        Ok((state.cache.len(), self.counts.subscribe()))
    }

    pub fn subscribe_previews(&self) -> mpsc::UnboundedReceiver<ChangeSet<K, T>> {
        self.previews.subscribe()
    }

    pub fn add_preview_handler(&self, handler: PreviewHandler<K, T>) {
        self.preview_handlers.lock().push(handler);
    }

    /// End every feed and release the transport. Safe to call repeatedly.
    pub fn dispose(&self) {
        if self.disposed.swap(true, Ordering::SeqCst) {
            return;
        }

        self.changes.close();
        self.previews.close();
        self.counts.close();
        self.preview_handlers.lock().clear();
        self.phase.send_modify(|_| {});

        if let Some(inbound) = self.inbound_task.lock().take() {
            inbound.abort();
        }

        // Queued intents are still delivered before the transport shuts down
        self.dispatcher.close();
        let dispatch_task = self.dispatch_task.lock().take();
        let transport = self.transport.clone();
        self.runtime.spawn(async move {
            if let Some(task) = dispatch_task {
                let _ = task.await;
            }
            transport.shutdown().await;
        });

        tracing::info!("Cache disposed");
    }
}

/// Merge a remote change set into the mirror.
///
/// Previous values are taken from the mirror, never from the wire, so
/// consumers see the instances they were handed before. Items outside
/// `filter` are treated as removed.
fn same_json<T: CacheItem>(a: &T, b: &T) -> bool {
    match (serde_json::to_value(a), serde_json::to_value(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

pub(crate) fn merge_inbound<K: CacheKey, T: CacheItem>(
    mirror: &mut Cache<K, T>,
    filter: Option<&Filter>,
    remote: ChangeSet<K, T>,
) -> ChangeSet<K, T> {
    let mut merged = ChangeSet::with_capacity(remote.len());

    for change in remote {
        let (reason, key, current, _) = change.into_parts();
        match reason {
            ChangeReason::Add | ChangeReason::Update => {
                let visible = filter.map_or(true, |f| f.matches_item(&current));
                if !visible {
                    if let Some(local) = mirror.take(&key) {
                        merged.push(Change::remove(key, local));
                    }
                    continue;
                }
                match mirror.insert(key.clone(), current.clone()) {
                    Some(local) => merged.push(Change::update(key, current, local)),
                    None => merged.push(Change::add(key, current)),
                }
            }
            ChangeReason::Remove => {
                if let Some(local) = mirror.take(&key) {
                    merged.push(Change::remove(key, local));
                }
            }
            ChangeReason::Refresh => {
                if let Some(local) = mirror.get(&key) {
                    merged.push(Change::refresh(key, local.clone()));
                }
            }
            ChangeReason::Move => {}
        }
    }

    merged
}
