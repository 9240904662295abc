//! ObservableCache - the public face of a mirrored collection.

use crate::error::{Error, Result};
use crate::reader_writer::{PreviewHandler, ReaderWriter};
use crate::selector::{CacheItem, CacheKey, KeySelector};
use crate::transport::Transport;
use crate::updater::RemoteUpdater;
use futures::future;
use futures::stream::{self, BoxStream, StreamExt};
use keysync_engine::{
    Cache, Change, ChangeFilter, ChangeSet, Filter, JsonPredicateCodec, KeyField, PredicateCodec,
};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// Stream of change sets. Ends when the cache is disposed.
pub type ChangeStream<K, T> = BoxStream<'static, ChangeSet<K, T>>;

/// Configures an [`ObservableCache`].
pub struct ObservableCacheBuilder<K, T> {
    transport: Arc<dyn Transport>,
    selector: Option<KeySelector<K, T>>,
    codec: Arc<dyn PredicateCodec>,
}

impl<K: CacheKey, T: CacheItem> ObservableCacheBuilder<K, T> {
    /// Key items with `select`; `field` names the same key in the item's JSON.
    ///
    /// Without a key selector the cache is read-only.
    pub fn key_selector(
        mut self,
        field: impl Into<KeyField>,
        select: impl Fn(&T) -> K + Send + Sync + 'static,
    ) -> Self {
        self.selector = Some(KeySelector::new(field, select));
        self
    }

    pub fn codec(mut self, codec: impl PredicateCodec + 'static) -> Self {
        self.codec = Arc::new(codec);
        self
    }

    /// Build the cache. Must be called within a tokio runtime.
    pub fn build(self) -> Result<ObservableCache<K, T>> {
        let runtime = Handle::try_current()
            .map_err(|_| Error::InvalidState("no tokio runtime is running".to_string()))?;
        Ok(ObservableCache {
            rw: ReaderWriter::start(runtime, self.transport, self.selector, self.codec),
        })
    }
}

/// A keyed collection mirrored from a hub.
///
/// Nothing is fetched until the first read, edit or subscription. Local
/// edits apply immediately and are forwarded to the hub; changes made by
/// other clients arrive as pushes and are merged into the mirror. Dropping
/// the cache disposes it.
pub struct ObservableCache<K: CacheKey, T: CacheItem> {
    rw: Arc<ReaderWriter<K, T>>,
}

impl<K: CacheKey, T: CacheItem> ObservableCache<K, T> {
    pub fn builder(transport: Arc<dyn Transport>) -> ObservableCacheBuilder<K, T> {
        ObservableCacheBuilder {
            transport,
            selector: None,
            codec: Arc::new(JsonPredicateCodec),
        }
    }

    /// Subscribe to changes.
    ///
    /// The first element is the current contents as one `Add` batch, unless
    /// the cache is empty. With a filter, items entering the filter arrive as
    /// adds and items leaving it as removes. The first subscription that
    /// loads the cache also sends its filter to the hub; later filters only
    /// narrow locally.
    pub async fn connect(&self, filter: Option<Filter>) -> Result<ChangeStream<K, T>> {
        let (initial, rx) = self.rw.subscribe_changes(filter.as_ref()).await?;
        let mut narrow = ChangeFilter::new();

        Ok(stream::iter(Some(initial))
            .chain(UnboundedReceiverStream::new(rx))
            .filter_map(move |changes| {
                let changes = match &filter {
                    Some(filter) => narrow.apply(&changes, |item| filter.matches_item(item)),
                    None => changes,
                };
                future::ready((!changes.is_empty()).then_some(changes))
            })
            .boxed())
    }

    /// Closure predicates cannot be sent to the hub and are rejected.
    pub async fn connect_where<P>(&self, predicate: Option<P>) -> Result<ChangeStream<K, T>>
    where
        P: Fn(&T) -> bool + Send + 'static,
    {
        match predicate {
            Some(_) => Err(Error::NotSupported(
                "closure predicates cannot be evaluated by the hub, use a Filter".to_string(),
            )),
            None => self.connect(None).await,
        }
    }

    /// Changes to a single key, starting with its current value if present.
    pub async fn watch(&self, key: K) -> Result<BoxStream<'static, Change<K, T>>> {
        let (initial, rx) = self.rw.subscribe_key(&key).await?;

        let later = UnboundedReceiverStream::new(rx).flat_map(move |changes| {
            let key = key.clone();
            stream::iter(changes.into_iter().filter(move |change| change.key() == &key))
        });
        Ok(stream::iter(initial).chain(later).boxed())
    }

    /// Item count, current value first, then every distinct new count.
    ///
    /// Does not trigger a load.
    pub async fn count_changed(&self) -> Result<BoxStream<'static, usize>> {
        let (current, rx) = self.rw.subscribe_counts().await?;
        let mut last = None;

        Ok(stream::iter(Some(current))
            .chain(UnboundedReceiverStream::new(rx))
            .filter_map(move |count| {
                let fresh = last != Some(count);
                last = Some(count);
                future::ready(fresh.then_some(count))
            })
            .boxed())
    }

    /// Change sets of local edits, delivered before they are published.
    ///
    /// Does not trigger a load. Inbound pushes are not previewed.
    pub fn preview(&self, filter: Option<Filter>) -> ChangeStream<K, T> {
        UnboundedReceiverStream::new(self.rw.subscribe_previews())
            .filter_map(move |changes| {
                let changes = match &filter {
                    Some(filter) => changes
                        .into_iter()
                        .filter(|change| filter.matches_item(change.current()))
                        .collect(),
                    None => changes,
                };
                future::ready((!changes.is_empty()).then_some(changes))
            })
            .boxed()
    }

    /// Register a synchronous preview callback.
    ///
    /// The callback sees the mirror as it was before the edit alongside the
    /// change set about to be published.
    pub fn on_preview(&self, handler: impl Fn(&Cache<K, T>, &ChangeSet<K, T>) + Send + Sync + 'static) {
        let handler: PreviewHandler<K, T> = Arc::new(handler);
        self.rw.add_preview_handler(handler);
    }

    pub async fn lookup(&self, key: &K) -> Result<Option<T>> {
        self.rw.lookup(key).await
    }

    pub async fn keys(&self) -> Result<Vec<K>> {
        self.rw.keys().await
    }

    pub async fn items(&self) -> Result<Vec<T>> {
        self.rw.items().await
    }

    pub async fn key_values(&self) -> Result<Vec<(K, T)>> {
        self.rw.key_values().await
    }

    pub async fn count(&self) -> Result<usize> {
        self.rw.count().await
    }

    /// Apply `f` as a single batch.
    ///
    /// Subscribers see one change set for the whole edit, including any
    /// nested edits that joined it.
    pub async fn edit<R, F>(&self, f: F) -> Result<R>
    where
        F: for<'u> FnOnce(&mut RemoteUpdater<'u, K, T>) -> Result<R>,
    {
        self.rw.edit(f).await
    }

    /// Blocking form of [`edit`](Self::edit). Must not be called from
    /// within an async task.
    pub fn edit_blocking<R, F>(&self, f: F) -> Result<R>
    where
        F: for<'u> FnOnce(&mut RemoteUpdater<'u, K, T>) -> Result<R>,
    {
        futures::executor::block_on(self.rw.edit(f))
    }

    /// Join the edit currently running on another task.
    pub async fn edit_nested<R, F>(&self, f: F) -> Result<R>
    where
        R: Send + 'static,
        F: for<'u> FnOnce(&mut RemoteUpdater<'u, K, T>) -> Result<R> + Send + 'static,
    {
        self.rw.edit_nested(f).await
    }

    pub async fn add_or_update(&self, items: Vec<T>) -> Result<()> {
        self.edit(move |updater| updater.add_or_update_many(items)).await
    }

    pub async fn remove_keys(&self, keys: Vec<K>) -> Result<()> {
        self.edit(move |updater| updater.remove_keys(&keys)).await
    }

    pub async fn clear(&self) -> Result<()> {
        self.edit(|updater| updater.clear()).await
    }

    /// End every stream and release the transport. Idempotent.
    pub fn dispose(&self) {
        self.rw.dispose();
    }

    pub fn is_disposed(&self) -> bool {
        self.rw.is_disposed()
    }
}

impl<K: CacheKey, T: CacheItem> Drop for ObservableCache<K, T> {
    fn drop(&mut self) {
        self.rw.dispose();
    }
}
