use std::time::Duration;

use comments_api::{
    Comment, CommentId, Error, EventId, Frame, NewComment, Time, COMMENT_EVENT, OTHER_EVENT,
    OTHER_PAYLOAD,
};
use tokio::sync::mpsc;

/// Straightforward model of the comment server, without any http in the way
pub struct MockServer {
    retry: Duration,
    // newest first
    comments: Vec<Comment>,
    feeds: Vec<mpsc::UnboundedSender<Frame>>,
    next_event: u64,
}

impl MockServer {
    pub fn new(retry: Duration) -> MockServer {
        MockServer::with_comments(retry, Vec::new())
    }

    pub fn with_comments(retry: Duration, comments: Vec<Comment>) -> MockServer {
        MockServer {
            retry,
            comments,
            feeds: Vec::new(),
            next_event: 0,
        }
    }

    pub fn list(&self) -> Vec<Comment> {
        self.comments.clone()
    }

    pub fn create(&mut self, new: NewComment, now: Time) -> Result<Comment, Error> {
        let content = new.validate()?;
        let timestamp = now.timestamp_millis();
        let after = self.comments.iter().map(|c| c.id.0 + 1).max().unwrap_or(1);
        let comment = Comment {
            id: CommentId(std::cmp::max(timestamp, after)),
            content,
            timestamp,
        };
        self.comments.insert(0, comment.clone());
        let json = serde_json::to_string(&comment).expect("serializing comment");
        self.relay(COMMENT_EVENT, json);
        self.relay(OTHER_EVENT, String::from(OTHER_PAYLOAD));
        Ok(comment)
    }

    /// Create a comment from a raw request body, `json` telling whether it
    /// was declared as json
    pub fn create_from_body(
        &mut self,
        json: bool,
        body: &[u8],
        now: Time,
    ) -> Result<Comment, Error> {
        if !json {
            return Err(Error::EmptyContent);
        }
        let new: NewComment =
            serde_json::from_slice(body).map_err(|e| Error::MalformedBody(e.to_string()))?;
        self.create(new, now)
    }

    /// Open a stream; dropping the receiver closes it
    pub fn subscribe(&mut self) -> mpsc::UnboundedReceiver<Frame> {
        let (sender, receiver) = mpsc::unbounded_channel();
        sender
            .send(Frame::Retry(self.retry))
            .expect("receiver is alive");
        self.feeds.push(sender);
        receiver
    }

    /// Number of streams that were still open at the last publish
    pub fn test_num_feeds(&self) -> usize {
        self.feeds.len()
    }

    fn relay(&mut self, event: &str, data: String) {
        let frame = Frame::event(event, EventId(self.next_event), data);
        self.next_event += 1;
        self.feeds
            .retain(|f| matches!(f.send(frame.clone()), Ok(())));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> Time {
        Time::from(std::time::UNIX_EPOCH + Duration::from_millis(1_000))
    }

    #[test]
    fn create_relays_to_open_feeds_only() {
        let mut mock = MockServer::new(Duration::from_millis(5000));
        let mut open = mock.subscribe();
        let closed = mock.subscribe();
        drop(closed);

        let c = mock
            .create(NewComment::new(String::from("hi")), now())
            .unwrap();
        assert_eq!(c.id, CommentId(1_000));
        assert_eq!(mock.test_num_feeds(), 1);
        assert_eq!(mock.list(), vec![c]);

        assert_eq!(open.try_recv().unwrap(), Frame::Retry(Duration::from_millis(5000)));
        assert!(matches!(open.try_recv().unwrap(), Frame::Event { event, .. } if event == COMMENT_EVENT));
        assert_eq!(
            open.try_recv().unwrap(),
            Frame::event(OTHER_EVENT, EventId(1), String::from(OTHER_PAYLOAD))
        );
        assert!(open.try_recv().is_err());
    }

    #[test]
    fn raw_bodies_follow_content_type() {
        let mut mock = MockServer::new(Duration::from_millis(5000));
        assert_eq!(
            mock.create_from_body(false, br#"{"content":"hi"}"#, now()),
            Err(Error::EmptyContent)
        );
        assert!(matches!(
            mock.create_from_body(true, br#"{"content":"#, now()),
            Err(Error::MalformedBody(_))
        ));
        assert!(mock.list().is_empty());
        let c = mock
            .create_from_body(true, br#"{"content":"hi"}"#, now())
            .unwrap();
        assert_eq!(c.content, "hi");
    }

    #[test]
    fn empty_content_is_rejected() {
        let mut mock = MockServer::new(Duration::from_millis(5000));
        assert_eq!(
            mock.create(NewComment::default(), now()),
            Err(Error::EmptyContent)
        );
        assert!(mock.list().is_empty());
    }
}
