use std::convert::Infallible;

use anyhow::Context;
use axum::{
    body::StreamBody,
    extract::State,
    http::{header, StatusCode},
    response::Response,
    Json,
};
use comments_api::Comment;
use futures::StreamExt;

use crate::{extractors::*, CommentStore, Error, Feeds};

pub async fn list_comments(State(store): State<CommentStore>) -> Json<Vec<Comment>> {
    Json(store.list())
}

pub async fn create_comment(
    State(store): State<CommentStore>,
    State(feeds): State<Feeds>,
    CommentBody(new): CommentBody,
) -> Result<(StatusCode, Json<Comment>), Error> {
    let comment = store.create(new, &feeds)?;
    Ok((StatusCode::CREATED, Json(comment)))
}

pub async fn comment_stream(State(feeds): State<Feeds>) -> Result<Response, Error> {
    let sub = feeds.subscribe();
    tracing::debug!(id = ?sub.id(), "comment stream opened");
    let body = StreamBody::new(sub.map(|frame| Ok::<_, Infallible>(frame.encode())));
    Ok(Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/event-stream")
        .header(header::CACHE_CONTROL, "no-cache")
        .header(header::CONNECTION, "keep-alive")
        .body(axum::body::boxed(body))
        .context("building comment stream response")?)
}
