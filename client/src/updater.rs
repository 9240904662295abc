//! RemoteUpdater - the mutation surface handed to edit closures.
//!
//! Every mutating call first applies to the local store, then queues the
//! same intent for the hub. The hub applies it to the authoritative store
//! and broadcasts the resulting diff to every other client; the originator
//! never gets its own changes echoed back.

use crate::dispatcher::Dispatcher;
use crate::error::{Error, Result};
use crate::selector::{CacheItem, CacheKey, KeySelector};
use keysync_engine::{encode_change_set, ChangeSet, HubCommand, KeyedStore};
use serde::Serialize;
use serde_json::Value;

/// Mutation intents for one edit session.
///
/// Borrowed for the duration of one edit and never outlives it.
pub struct RemoteUpdater<'a, K, T> {
    store: &'a mut dyn KeyedStore<K, T>,
    selector: Option<&'a KeySelector<K, T>>,
    dispatcher: &'a Dispatcher,
    depth: usize,
}

impl<'a, K: CacheKey, T: CacheItem> RemoteUpdater<'a, K, T> {
    pub(crate) fn new(
        store: &'a mut dyn KeyedStore<K, T>,
        selector: Option<&'a KeySelector<K, T>>,
        dispatcher: &'a Dispatcher,
    ) -> Self {
        Self {
            store,
            selector,
            dispatcher,
            depth: 1,
        }
    }

    /// Nesting depth of the current edit; 1 for the outermost.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Run `f` as a nested edit. Its mutations join the current batch.
    pub fn edit<R>(&mut self, f: impl FnOnce(&mut Self) -> Result<R>) -> Result<R> {
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }

    fn selector(&self) -> Result<&'a KeySelector<K, T>> {
        self.selector.ok_or(Error::MissingKeySelector)
    }

    /// Key of `item` according to the configured selector.
    pub fn get_key(&self, item: &T) -> Result<K> {
        Ok(self.selector()?.key_of(item))
    }

    pub fn lookup(&self, key: &K) -> Option<&T> {
        self.store.lookup(key)
    }

    pub fn count(&self) -> usize {
        self.store.count()
    }

    pub fn keys(&self) -> Vec<K> {
        self.store.keys()
    }

    pub fn items(&self) -> Vec<T> {
        self.store.items()
    }

    pub fn add_or_update(&mut self, item: T) -> Result<()> {
        self.add_or_update_many(std::iter::once(item))
    }

    pub fn add_or_update_many(&mut self, items: impl IntoIterator<Item = T>) -> Result<()> {
        let selector = self.selector()?;
        let mut sent = Vec::new();
        for item in items {
            let key = selector.key_of(&item);
            push_json(&mut sent, &item);
            self.store.add_or_update(item, key);
        }
        self.send_items(sent, |items| HubCommand::AddOrUpdateObjects { items });
        Ok(())
    }

    /// Store `item` under an explicit key, here and on the hub.
    pub fn add_or_update_with_key(&mut self, item: T, key: K) -> Result<()> {
        self.selector()?;
        let command = serde_json::to_value(&item).and_then(|item| {
            let key = serde_json::to_value(&key)?;
            Ok(HubCommand::AddOrUpdateValueWithKey { item, key })
        });
        self.store.add_or_update(item, key);
        match command {
            Ok(command) => self.dispatcher.dispatch(command),
            Err(e) => tracing::warn!(error = %e, "Could not serialize value for the hub"),
        }
        Ok(())
    }

    pub fn remove(&mut self, item: &T) -> Result<()> {
        self.remove_many(std::slice::from_ref(item))
    }

    pub fn remove_many<'i>(&mut self, items: impl IntoIterator<Item = &'i T>) -> Result<()>
    where
        T: 'i,
    {
        let selector = self.selector()?;
        let mut sent = Vec::new();
        for item in items {
            push_json(&mut sent, item);
            self.store.remove(&selector.key_of(item));
        }
        self.send_items(sent, |items| HubCommand::RemoveItems { items });
        Ok(())
    }

    pub fn remove_key(&mut self, key: &K) -> Result<()> {
        self.remove_keys(std::slice::from_ref(key))
    }

    pub fn remove_keys<'k>(&mut self, keys: impl IntoIterator<Item = &'k K>) -> Result<()>
    where
        K: 'k,
    {
        self.selector()?;
        let mut sent = Vec::new();
        for key in keys {
            push_json(&mut sent, key);
            self.store.remove(key);
        }
        self.send_items(sent, |keys| HubCommand::RemoveKeys { keys });
        Ok(())
    }

    /// Remove every item.
    pub fn clear(&mut self) -> Result<()> {
        self.selector()?;
        let keys = self.store.keys();
        self.store.clear();
        let sent = keys.iter().fold(Vec::new(), |mut sent, key| {
            push_json(&mut sent, key);
            sent
        });
        self.send_items(sent, |keys| HubCommand::RemoveKeys { keys });
        Ok(())
    }

    pub fn refresh(&mut self, key: &K) -> Result<()> {
        self.refresh_keys(std::slice::from_ref(key))
    }

    pub fn refresh_keys<'k>(&mut self, keys: impl IntoIterator<Item = &'k K>) -> Result<()>
    where
        K: 'k,
    {
        self.selector()?;
        let mut sent = Vec::new();
        for key in keys {
            push_json(&mut sent, key);
            self.store.refresh(key);
        }
        self.send_items(sent, |keys| HubCommand::RefreshKeys { keys });
        Ok(())
    }

    pub fn refresh_all(&mut self) -> Result<()> {
        let keys = self.store.keys();
        self.refresh_keys(&keys)
    }

    /// Replay an externally produced change set here and on the hub.
    pub fn clone_changes(&mut self, changes: &ChangeSet<K, T>) -> Result<()> {
        self.selector()?;
        self.store.clone_changes(changes);
        match encode_change_set(changes) {
            Ok(change_set) => self.dispatcher.dispatch(HubCommand::Clone { change_set }),
            Err(e) => tracing::warn!(error = %e, "Could not encode change set for the hub"),
        }
        Ok(())
    }

    /// Same as [`clone_changes`](Self::clone_changes).
    pub fn update(&mut self, changes: &ChangeSet<K, T>) -> Result<()> {
        self.clone_changes(changes)
    }

    /// Re-evaluation needs an authoritative re-query and has no local meaning.
    pub fn evaluate(&mut self) -> Result<()> {
        Err(Error::NotImplemented("evaluate"))
    }

    pub fn evaluate_keys(&mut self, _keys: &[K]) -> Result<()> {
        Err(Error::NotImplemented("evaluate_keys"))
    }

    fn send_items(&self, values: Vec<Value>, command: impl FnOnce(Vec<Value>) -> HubCommand) {
        if !values.is_empty() {
            self.dispatcher.dispatch(command(values));
        }
    }
}

fn push_json<V: Serialize + ?Sized>(out: &mut Vec<Value>, value: &V) {
    match serde_json::to_value(value) {
        Ok(json) => out.push(json),
        Err(e) => tracing::warn!(error = %e, "Could not serialize value for the hub"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::RecordingTransport;
    use keysync_engine::{Cache, ChangeAwareCache, ChangeReason};
    use serde_json::json;
    use std::sync::Arc;

    fn selector() -> KeySelector<String, (String, u32)> {
        KeySelector::new("0", |item: &(String, u32)| item.0.clone())
    }

    fn item(id: &str, n: u32) -> (String, u32) {
        (id.to_string(), n)
    }

    #[tokio::test]
    async fn local_mutation_then_dispatch() {
        let transport = Arc::new(RecordingTransport::default());
        let (dispatcher, worker) = Dispatcher::spawn(transport.clone());
        let selector = selector();
        let mut cache: ChangeAwareCache<String, (String, u32)> = ChangeAwareCache::new();

        {
            let mut updater = RemoteUpdater::new(&mut cache, Some(&selector), &dispatcher);
            updater.add_or_update(item("a", 1)).unwrap();
            assert_eq!(updater.lookup(&"a".to_string()), Some(&item("a", 1)));

            updater.add_or_update_many(vec![item("b", 2), item("c", 3)]).unwrap();
            updater.remove_key(&"b".to_string()).unwrap();
            updater.refresh(&"c".to_string()).unwrap();
            assert_eq!(updater.count(), 2);
        }

        let changes = cache.capture_changes();
        assert_eq!(changes.adds(), 2);
        assert_eq!(changes.refreshes(), 1);

        dispatcher.close();
        worker.await.unwrap();
        assert_eq!(
            transport.targets(),
            vec!["AddOrUpdateObjects", "AddOrUpdateObjects", "RemoveKeys", "RefreshKeys"]
        );
        assert_eq!(transport.calls.lock()[0].1, vec![json!([["a", 1]])]);
    }

    #[tokio::test]
    async fn explicit_key_is_sent_with_the_item() {
        let transport = Arc::new(RecordingTransport::default());
        let (dispatcher, worker) = Dispatcher::spawn(transport.clone());
        let selector = selector();
        let mut cache: Cache<String, (String, u32)> = Cache::new();

        {
            let mut updater = RemoteUpdater::new(&mut cache, Some(&selector), &dispatcher);
            updater
                .add_or_update_with_key(item("a", 1), "x".to_string())
                .unwrap();
            assert_eq!(updater.lookup(&"x".to_string()), Some(&item("a", 1)));
            assert_eq!(updater.lookup(&"a".to_string()), None);
        }

        dispatcher.close();
        worker.await.unwrap();
        assert_eq!(transport.targets(), vec!["AddOrUpdateValueWithKey"]);
        assert_eq!(transport.calls.lock()[0].1, vec![json!(["a", 1]), json!("x")]);
    }

    #[tokio::test]
    async fn mutations_need_a_key_selector() {
        let transport = Arc::new(RecordingTransport::default());
        let (dispatcher, _worker) = Dispatcher::spawn(transport);
        let mut cache: Cache<String, (String, u32)> = Cache::new();
        let mut updater = RemoteUpdater::new(&mut cache, None, &dispatcher);

        assert!(matches!(
            updater.add_or_update(item("a", 1)),
            Err(Error::MissingKeySelector)
        ));
        assert!(matches!(
            updater.remove_key(&"a".to_string()),
            Err(Error::MissingKeySelector)
        ));
        assert!(matches!(updater.clear(), Err(Error::MissingKeySelector)));
        assert!(matches!(
            updater.get_key(&item("a", 1)),
            Err(Error::MissingKeySelector)
        ));
        assert_eq!(updater.count(), 0);
    }

    #[tokio::test]
    async fn evaluate_is_not_implemented() {
        let transport = Arc::new(RecordingTransport::default());
        let (dispatcher, _worker) = Dispatcher::spawn(transport);
        let selector = selector();
        let mut cache: Cache<String, (String, u32)> = Cache::new();
        let mut updater = RemoteUpdater::new(&mut cache, Some(&selector), &dispatcher);

        assert!(matches!(updater.evaluate(), Err(Error::NotImplemented(_))));
        assert!(matches!(
            updater.evaluate_keys(&[]),
            Err(Error::NotImplemented(_))
        ));
    }

    #[tokio::test]
    async fn nested_edit_joins_batch() {
        let transport = Arc::new(RecordingTransport::default());
        let (dispatcher, _worker) = Dispatcher::spawn(transport);
        let selector = selector();
        let mut cache: ChangeAwareCache<String, (String, u32)> = ChangeAwareCache::new();

        {
            let mut updater = RemoteUpdater::new(&mut cache, Some(&selector), &dispatcher);
            updater.add_or_update(item("a", 1)).unwrap();
            updater
                .edit(|inner| {
                    assert_eq!(inner.depth(), 2);
                    inner.add_or_update(item("a", 2))
                })
                .unwrap();
            assert_eq!(updater.depth(), 1);
        }

        let reasons: Vec<_> = cache.capture_changes().iter().map(|c| c.reason()).collect();
        assert_eq!(reasons, vec![ChangeReason::Add, ChangeReason::Update]);
    }

    #[tokio::test]
    async fn clear_sends_all_keys() {
        let transport = Arc::new(RecordingTransport::default());
        let (dispatcher, worker) = Dispatcher::spawn(transport.clone());
        let selector = selector();
        let mut cache: ChangeAwareCache<String, (String, u32)> =
            ChangeAwareCache::from_cache([("a".to_string(), item("a", 1))].into_iter().collect());

        RemoteUpdater::new(&mut cache, Some(&selector), &dispatcher)
            .clear()
            .unwrap();

        assert_eq!(cache.capture_changes().removes(), 1);
        dispatcher.close();
        worker.await.unwrap();
        assert_eq!(transport.calls.lock()[0].1, vec![json!(["a"])]);
    }
}
