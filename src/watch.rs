//! Change notifications for observable state.
//!
//! Every transition of a [`crate::cell::StateCell`] is published as a
//! [`Change`] on a broadcast channel; subscribers read them as a stream.

use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::sync::broadcast;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::Stream;

/// A transition from one state to the next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change<S> {
    /// State before the transition.
    pub current: S,
    /// State after the transition.
    pub next: S,
}

impl<S> Change<S> {
    pub fn new(current: S, next: S) -> Self {
        Self { current, next }
    }
}

/// A stream of changes.
///
/// Changes missed because the subscriber fell behind are skipped.
pub struct ChangeStream<S> {
    inner: BroadcastStream<Change<S>>,
}

impl<S: Clone + Send + 'static> ChangeStream<S> {
    /// Create a new change stream from a broadcast receiver.
    pub fn new(receiver: broadcast::Receiver<Change<S>>) -> Self {
        Self {
            inner: BroadcastStream::new(receiver),
        }
    }
}

impl<S: Clone + Send + 'static> Stream for ChangeStream<S> {
    type Item = Change<S>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(change))) => return Poll::Ready(Some(change)),
                // Skip lagged changes
                Poll::Ready(Some(Err(BroadcastStreamRecvError::Lagged(_)))) => continue,
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}

/// Handle for publishing changes to subscribers.
#[derive(Clone)]
pub struct ChangeSender<S> {
    sender: broadcast::Sender<Change<S>>,
}

impl<S: Clone + Send + 'static> ChangeSender<S> {
    /// Create a new change sender with the given channel capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Send a change to all subscribers.
    pub fn send(&self, change: Change<S>) {
        // Ignore send errors (no subscribers)
        let _ = self.sender.send(change);
    }

    /// Subscribe to changes published from now on.
    pub fn subscribe(&self) -> ChangeStream<S> {
        ChangeStream::new(self.sender.subscribe())
    }

    /// Get the number of current subscribers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl<S: Clone + Send + 'static> Default for ChangeSender<S> {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::StreamExt;

    #[tokio::test]
    async fn test_subscribers_receive_changes() {
        let sender = ChangeSender::new(16);
        let mut stream = sender.subscribe();
        assert_eq!(sender.receiver_count(), 1);

        sender.send(Change::new(0, 1));
        sender.send(Change::new(1, 2));

        assert_eq!(stream.next().await, Some(Change::new(0, 1)));
        assert_eq!(stream.next().await, Some(Change::new(1, 2)));
    }

    #[tokio::test]
    async fn test_lagged_changes_are_skipped() {
        let sender = ChangeSender::new(2);
        let mut stream = sender.subscribe();

        for i in 0..5 {
            sender.send(Change::new(i, i + 1));
        }

        assert_eq!(stream.next().await, Some(Change::new(3, 4)));
        assert_eq!(stream.next().await, Some(Change::new(4, 5)));
    }

    #[tokio::test]
    async fn test_stream_ends_when_sender_dropped() {
        let sender = ChangeSender::<u32>::new(4);
        let mut stream = sender.subscribe();
        drop(sender);

        assert_eq!(stream.next().await, None);
    }

    #[test]
    fn test_send_without_subscribers() {
        let sender = ChangeSender::default();
        sender.send(Change::new("a", "b"));
        assert_eq!(sender.receiver_count(), 0);
    }
}
