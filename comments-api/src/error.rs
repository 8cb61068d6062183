use anyhow::{anyhow, Context};
use serde_json::json;

#[derive(Debug, Eq, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("Unknown error: {0}")]
    Unknown(String),

    #[error("Comment content must not be empty")]
    EmptyContent,

    #[error("Malformed request body: {0}")]
    MalformedBody(String),
}

impl Error {
    pub fn status_code(&self) -> http::StatusCode {
        use http::StatusCode;
        match self {
            Error::Unknown(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::EmptyContent => StatusCode::BAD_REQUEST,
            Error::MalformedBody(_) => StatusCode::BAD_REQUEST,
        }
    }

    pub fn contents(&self) -> Vec<u8> {
        let message = self.to_string();
        serde_json::to_vec(&match self {
            Error::Unknown(_) => json!({
                "error": message,
                "message": message,
                "type": "unknown",
            }),
            Error::EmptyContent => json!({
                "error": message,
                "message": message,
                "type": "empty-content",
            }),
            Error::MalformedBody(details) => json!({
                "error": message,
                "message": message,
                "type": "malformed-body",
                "details": details,
            }),
        })
        .expect("serializing error contents")
    }

    pub fn parse(body: &[u8]) -> anyhow::Result<Error> {
        let data: serde_json::Value =
            serde_json::from_slice(body).context("parsing error contents")?;
        Ok(
            match data
                .get("type")
                .and_then(|t| t.as_str())
                .ok_or_else(|| anyhow!("error type is not a string"))?
            {
                "unknown" => Error::Unknown(String::from(
                    data.get("message")
                        .and_then(|msg| msg.as_str())
                        .and_then(|msg| msg.strip_prefix("Unknown error: "))
                        .unwrap_or(""),
                )),
                "empty-content" => Error::EmptyContent,
                "malformed-body" => Error::MalformedBody(String::from(
                    data.get("details")
                        .and_then(|d| d.as_str())
                        .ok_or_else(|| anyhow!("malformed-body error without details"))?,
                )),
                _ => return Err(anyhow!("error contents has unknown type")),
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_content_is_a_bad_request_with_a_message() {
        let err = Error::EmptyContent;
        assert_eq!(err.status_code(), http::StatusCode::BAD_REQUEST);
        let body: serde_json::Value = serde_json::from_slice(&err.contents()).unwrap();
        assert_eq!(body["error"], "Comment content must not be empty");
        assert_eq!(body["message"], body["error"]);
        assert_eq!(Error::parse(&err.contents()).unwrap(), err);
    }

    #[test]
    fn parse_recovers_payloads() {
        let err = Error::Unknown(String::from("db on fire"));
        assert_eq!(Error::parse(&err.contents()).unwrap(), err);
        let err = Error::MalformedBody(String::from("expected value at line 1"));
        assert_eq!(Error::parse(&err.contents()).unwrap(), err);
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(Error::parse(b"not json").is_err());
        assert!(Error::parse(br#"{"type":"what"}"#).is_err());
        assert!(Error::parse(br#"{"message":"no type"}"#).is_err());
    }
}
