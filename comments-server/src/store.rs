use std::{collections::VecDeque, sync::Arc};

use chrono::Utc;
use comments_api::{Comment, CommentId, Error as ApiError, NewComment, Time};
use parking_lot::Mutex;

use crate::Feeds;

const SEED_CONTENTS: [&str; 3] = [
    "This is the first default comment",
    "This is the second default comment",
    "This is the third default comment",
];

#[derive(Debug)]
struct Comments {
    // newest first
    list: VecDeque<Comment>,
    last_id: CommentId,
}

/// The canonical, newest-first list of comments
#[derive(Clone, Debug)]
pub struct CommentStore(Arc<Mutex<Comments>>);

impl CommentStore {
    pub fn new() -> CommentStore {
        CommentStore(Arc::new(Mutex::new(Comments {
            list: VecDeque::new(),
            last_id: CommentId(0),
        })))
    }

    /// A store holding the three default comments, ids 1 to 3, created a few
    /// seconds before `now`
    pub fn seeded(now: Time) -> CommentStore {
        let now = now.timestamp_millis();
        let list = SEED_CONTENTS
            .iter()
            .zip(1..)
            .map(|(content, i)| Comment {
                id: CommentId(i),
                content: String::from(*content),
                timestamp: now - 1000 * (4 - i),
            })
            .collect();
        CommentStore(Arc::new(Mutex::new(Comments {
            list,
            last_id: CommentId(SEED_CONTENTS.len() as i64),
        })))
    }

    pub fn list(&self) -> Vec<Comment> {
        self.0.lock().list.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.0.lock().list.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.lock().list.is_empty()
    }

    pub fn create(&self, new: NewComment, feeds: &Feeds) -> Result<Comment, ApiError> {
        self.create_at(new, Utc::now(), feeds)
    }

    /// Insert a comment created at `now` and announce it on `feeds`
    ///
    /// The id is the creation time in milliseconds, bumped past the previous
    /// id when two comments land in the same millisecond. Publishing happens
    /// under the store lock, so streams see comments in store order.
    pub fn create_at(
        &self,
        new: NewComment,
        now: Time,
        feeds: &Feeds,
    ) -> Result<Comment, ApiError> {
        let content = new.validate()?;
        let timestamp = now.timestamp_millis();
        let mut comments = self.0.lock();
        let id = CommentId(std::cmp::max(timestamp, comments.last_id.0 + 1));
        let comment = Comment {
            id,
            content,
            timestamp,
        };
        comments.last_id = id;
        comments.list.push_front(comment.clone());
        tracing::info!(?id, total = comments.list.len(), "comment created");
        feeds.publish_comment(&comment);
        Ok(comment)
    }
}
