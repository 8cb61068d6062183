use std::{
    collections::BTreeMap,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};

use comments_api::{Comment, EventId, Frame, COMMENT_EVENT, OTHER_EVENT, OTHER_PAYLOAD};
use futures::{channel::mpsc, Stream, StreamExt};
use parking_lot::Mutex;

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct SubscriberId(u64);

/// Outcome of pushing one frame to one subscriber
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Delivery {
    Delivered,

    /// The stream is gone and the handle should be dropped from the registry
    Stale,
}

#[derive(Debug)]
struct Subscriber(mpsc::UnboundedSender<Frame>);

impl Subscriber {
    fn deliver(&self, frame: Frame) -> Delivery {
        if self.0.is_closed() {
            return Delivery::Stale;
        }
        match self.0.unbounded_send(frame) {
            Ok(()) => Delivery::Delivered,
            Err(_) => Delivery::Stale,
        }
    }
}

#[derive(Debug)]
struct Registry {
    retry: Duration,
    next_subscriber: u64,
    next_event: u64,
    // set on shutdown, after which new subscriptions end immediately
    closed: bool,
    // BTreeMap keyed by an increasing id, so that iteration follows subscription order
    subscribers: BTreeMap<SubscriberId, Subscriber>,
}

/// The set of currently open comment streams
///
/// Every mutation happens under a synchronous lock that is never held across
/// an await point, and delivering a frame only enqueues it on an unbounded
/// channel.
#[derive(Clone, Debug)]
pub struct Feeds(Arc<Mutex<Registry>>);

impl Feeds {
    pub fn new(retry: Duration) -> Feeds {
        Feeds(Arc::new(Mutex::new(Registry {
            retry,
            next_subscriber: 0,
            next_event: 0,
            closed: false,
            subscribers: BTreeMap::new(),
        })))
    }

    pub fn subscribe(&self) -> Subscription {
        let (sender, receiver) = mpsc::unbounded();
        let mut reg = self.0.lock();
        let id = SubscriberId(reg.next_subscriber);
        reg.next_subscriber += 1;
        if reg.closed {
            tracing::debug!(?id, "rejecting stream opened during shutdown");
            drop(sender);
            return Subscription {
                id,
                feeds: self.clone(),
                receiver,
            };
        }
        let sub = Subscriber(sender);
        // the receiver is alive right here, so this cannot be stale
        sub.deliver(Frame::Retry(reg.retry));
        reg.subscribers.insert(id, sub);
        tracing::debug!(?id, subscribers = reg.subscribers.len(), "stream subscribed");
        Subscription {
            id,
            feeds: self.clone(),
            receiver,
        }
    }

    /// Returns whether the subscriber was still registered
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let mut reg = self.0.lock();
        let existed = reg.subscribers.remove(&id).is_some();
        if existed {
            tracing::debug!(?id, subscribers = reg.subscribers.len(), "stream unsubscribed");
        }
        existed
    }

    /// Send one event to every open stream, returning the number of streams reached
    pub fn publish(&self, event: &str, data: String) -> usize {
        let mut reg = self.0.lock();
        let id = EventId(reg.next_event);
        reg.next_event += 1;
        let frame = Frame::event(event, id, data);
        let mut delivered = 0;
        reg.subscribers.retain(|sub_id, sub| match sub.deliver(frame.clone()) {
            Delivery::Delivered => {
                delivered += 1;
                true
            }
            Delivery::Stale => {
                tracing::debug!(id = ?sub_id, "pruning stale stream");
                false
            }
        });
        delivered
    }

    /// Announce a newly created comment to every open stream
    pub fn publish_comment(&self, comment: &Comment) {
        let json = match serde_json::to_string(comment) {
            Ok(json) => json,
            Err(err) => {
                tracing::error!(?err, ?comment, "failed serializing comment to json");
                return;
            }
        };
        self.publish(COMMENT_EVENT, json);
        self.publish(OTHER_EVENT, String::from(OTHER_PAYLOAD));
    }

    pub fn len(&self) -> usize {
        self.0.lock().subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.lock().subscribers.is_empty()
    }

    /// Drop every subscriber, which terminates all open streams, and make
    /// any later subscription end right away
    pub fn close_all(&self) {
        let mut reg = self.0.lock();
        tracing::debug!(subscribers = reg.subscribers.len(), "closing all streams");
        reg.closed = true;
        reg.subscribers.clear();
    }

    #[cfg(test)]
    fn subscriber_ids(&self) -> Vec<SubscriberId> {
        self.0.lock().subscribers.keys().copied().collect()
    }
}

/// Receiving end of one stream; dropping it unsubscribes
pub struct Subscription {
    id: SubscriberId,
    feeds: Feeds,
    receiver: mpsc::UnboundedReceiver<Frame>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }
}

impl Stream for Subscription {
    type Item = Frame;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Frame>> {
        self.receiver.poll_next_unpin(cx)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.feeds.unsubscribe(self.id);
    }
}

#[cfg(test)]
mod tests {
    use comments_api::{CommentId, DEFAULT_RETRY};
    use futures::FutureExt;

    use super::*;

    fn drain(sub: &mut Subscription) -> Vec<Frame> {
        let mut res = Vec::new();
        while let Some(Some(f)) = sub.next().now_or_never() {
            res.push(f);
        }
        res
    }

    fn hello() -> Comment {
        Comment {
            id: CommentId(42),
            content: String::from("hello"),
            timestamp: 42,
        }
    }

    #[test]
    fn subscribe_sends_retry_hint_first() {
        let feeds = Feeds::new(DEFAULT_RETRY);
        let mut sub = feeds.subscribe();
        assert_eq!(drain(&mut sub), vec![Frame::Retry(DEFAULT_RETRY)]);
        assert_eq!(feeds.len(), 1);
    }

    #[test]
    fn publish_comment_reaches_every_subscriber_twice() {
        let feeds = Feeds::new(DEFAULT_RETRY);
        let mut subs = (0..3).map(|_| feeds.subscribe()).collect::<Vec<_>>();
        assert_eq!(
            feeds.subscriber_ids(),
            subs.iter().map(|s| s.id()).collect::<Vec<_>>()
        );
        feeds.publish_comment(&hello());
        for sub in subs.iter_mut() {
            let frames = drain(sub);
            assert_eq!(frames.len(), 3);
            assert_eq!(frames[0], Frame::Retry(DEFAULT_RETRY));
            match &frames[1] {
                Frame::Event { event, id, data } => {
                    assert_eq!(event, COMMENT_EVENT);
                    assert_eq!(*id, Some(EventId(0)));
                    assert_eq!(serde_json::from_str::<Comment>(data).unwrap(), hello());
                }
                f => panic!("unexpected frame {f:?}"),
            }
            assert_eq!(
                frames[2],
                Frame::event(OTHER_EVENT, EventId(1), String::from(OTHER_PAYLOAD))
            );
        }
    }

    #[test]
    fn unsubscribed_and_late_streams_see_nothing() {
        let feeds = Feeds::new(DEFAULT_RETRY);
        let mut early = feeds.subscribe();
        let gone = feeds.subscribe();
        let gone_id = gone.id();
        drop(gone);
        assert_eq!(feeds.len(), 1);
        assert!(!feeds.unsubscribe(gone_id));

        assert_eq!(feeds.publish("comment", String::from("x")), 1);
        let mut late = feeds.subscribe();
        assert_eq!(drain(&mut early).len(), 2);
        assert_eq!(drain(&mut late), vec![Frame::Retry(DEFAULT_RETRY)]);
    }

    #[test]
    fn stale_handles_are_pruned_on_publish() {
        let feeds = Feeds::new(DEFAULT_RETRY);
        let (sender, receiver) = mpsc::unbounded();
        drop(receiver);
        feeds
            .0
            .lock()
            .subscribers
            .insert(SubscriberId(1000), Subscriber(sender));
        let _live = feeds.subscribe();
        assert_eq!(feeds.len(), 2);
        assert_eq!(feeds.publish("comment", String::from("x")), 1);
        assert_eq!(feeds.len(), 1);
    }

    #[test]
    fn event_ids_increase_globally() {
        let feeds = Feeds::new(Duration::from_millis(10));
        let mut sub = feeds.subscribe();
        feeds.publish("a", String::new());
        feeds.publish("b", String::new());
        let ids = drain(&mut sub)
            .into_iter()
            .filter_map(|f| match f {
                Frame::Event { id, .. } => id,
                Frame::Retry(_) => None,
            })
            .collect::<Vec<_>>();
        assert_eq!(ids, vec![EventId(0), EventId(1)]);
    }

    #[test]
    fn close_all_ends_streams() {
        let feeds = Feeds::new(DEFAULT_RETRY);
        let mut sub = feeds.subscribe();
        feeds.close_all();
        assert_eq!(feeds.len(), 0);
        assert_eq!(drain(&mut sub), vec![Frame::Retry(DEFAULT_RETRY)]);
        assert_eq!(sub.next().now_or_never(), Some(None));
    }

    #[test]
    fn subscriptions_after_close_all_end_immediately() {
        let feeds = Feeds::new(DEFAULT_RETRY);
        feeds.close_all();
        let mut sub = feeds.subscribe();
        assert_eq!(feeds.len(), 0);
        assert!(feeds.is_empty());
        assert_eq!(sub.next().now_or_never(), Some(None));
        assert_eq!(feeds.publish("comment", String::from("x")), 0);
    }
}
