//! Ordered fan-out to any number of subscribers.

use parking_lot::Mutex;
use tokio::sync::mpsc;

/// Broadcasts values, in publish order, to every live subscriber.
///
/// Subscribers whose receiver has been dropped are pruned on the next
/// publish. Closing the feed ends every subscriber's stream.
#[derive(Debug)]
pub struct Feed<E> {
    inner: Mutex<FeedState<E>>,
}

#[derive(Debug)]
struct FeedState<E> {
    subscribers: Vec<mpsc::UnboundedSender<E>>,
    closed: bool,
}

impl<E> Default for Feed<E> {
    fn default() -> Self {
        Self {
            inner: Mutex::new(FeedState {
                subscribers: Vec::new(),
                closed: false,
            }),
        }
    }
}

impl<E: Clone> Feed<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber. On a closed feed the receiver ends immediately.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<E> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock();
        if !inner.closed {
            inner.subscribers.push(tx);
        }
        rx
    }

    /// Send `value` to every subscriber. Returns the number reached.
    pub fn publish(&self, value: E) -> usize {
        let mut inner = self.inner.lock();
        inner.subscribers.retain(|tx| tx.send(value.clone()).is_ok());
        inner.subscribers.len()
    }

    pub fn has_subscribers(&self) -> bool {
        let mut inner = self.inner.lock();
        inner.subscribers.retain(|tx| !tx.is_closed());
        !inner.subscribers.is_empty()
    }

    /// End every subscription. Idempotent.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        inner.subscribers.clear();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn publishes_in_order_to_all() {
        let feed = Feed::new();
        let mut a = feed.subscribe();
        let mut b = feed.subscribe();

        assert_eq!(feed.publish(1), 2);
        assert_eq!(feed.publish(2), 2);

        assert_eq!(a.try_recv().unwrap(), 1);
        assert_eq!(a.try_recv().unwrap(), 2);
        assert_eq!(b.try_recv().unwrap(), 1);
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let feed = Feed::new();
        let a = feed.subscribe();
        let _b = feed.subscribe();
        drop(a);

        assert!(feed.has_subscribers());
        assert_eq!(feed.publish("x"), 1);
    }

    #[test]
    fn close_ends_streams() {
        let feed: Feed<u8> = Feed::new();
        let mut a = feed.subscribe();
        feed.close();
        feed.close();

        assert!(matches!(
            a.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));

        let mut late = feed.subscribe();
        assert!(matches!(
            late.try_recv(),
            Err(mpsc::error::TryRecvError::Disconnected)
        ));
        assert!(!feed.has_subscribers());
    }
}
