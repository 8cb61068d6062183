use std::time::Duration;

use chrono::{TimeZone, Utc};

mod error;
pub use error::Error;

pub mod frame;
pub use frame::{EventId, Frame, FrameDecoder};

pub type Time = chrono::DateTime<Utc>;

pub const COMMENTS_ROUTE: &str = "/api/comments";
pub const STREAM_ROUTE: &str = "/api/comments/stream";

/// Reconnect hint sent as the first frame of every comment stream
pub const DEFAULT_RETRY: Duration = Duration::from_millis(5000);

pub const COMMENT_EVENT: &str = "comment";
pub const OTHER_EVENT: &str = "other";

/// Payload of the `other` event sent alongside every new comment
pub const OTHER_PAYLOAD: &str = "new data";

#[derive(
    Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, serde::Deserialize, serde::Serialize,
)]
#[serde(transparent)]
pub struct CommentId(pub i64);

#[derive(Clone, Debug, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct Comment {
    pub id: CommentId,
    pub content: String,

    /// Creation time, in milliseconds since the unix epoch
    pub timestamp: i64,
}

impl Comment {
    pub fn created_at(&self) -> Option<Time> {
        Utc.timestamp_millis_opt(self.timestamp).single()
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
pub struct NewComment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

impl NewComment {
    pub fn new(content: String) -> NewComment {
        NewComment {
            content: Some(content),
        }
    }

    /// Return the content of this comment, if it is acceptable for creation
    pub fn validate(self) -> Result<String, Error> {
        match self.content {
            Some(content) if !content.is_empty() => Ok(content),
            _ => Err(Error::EmptyContent),
        }
    }
}
