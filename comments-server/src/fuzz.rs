#![cfg(test)]

use std::{fmt::Debug, panic::AssertUnwindSafe, time::Duration};

use axum::{
    body::{Body, BoxBody, Bytes},
    http::{self, request, StatusCode},
};
use bolero::generator::{bolero_generator, TypeGenerator};
use chrono::Utc;
use comments_api::{
    Comment, Error as ApiError, Frame, FrameDecoder, NewComment, COMMENTS_ROUTE, COMMENT_EVENT,
    DEFAULT_RETRY, STREAM_ROUTE,
};
use comments_mock_server::MockServer;
use hyper::body::HttpBody;
use tokio::sync::mpsc;
use tower::ServiceExt;

use crate::{app, AppState, CommentStore, Feeds, Router};

pub(crate) async fn run_on_app(
    app: &Router,
    method: http::Method,
    uri: &str,
    content_type: Option<&str>,
    body: Body,
) -> (StatusCode, Bytes) {
    let req = request::Builder::new().method(method).uri(uri);
    let req = match content_type {
        Some(ct) => req.header(http::header::CONTENT_TYPE, ct),
        None => req,
    };
    let req = req.body(body).expect("building request");
    let resp = app.clone().oneshot(req).await.expect("running request");
    let status = resp.status();
    let body = hyper::body::to_bytes(resp.into_body())
        .await
        .expect("recovering resp bytes");
    (status, body)
}

pub(crate) async fn post_body(
    app: &Router,
    content_type: Option<&str>,
    body: Vec<u8>,
) -> Result<Comment, ApiError> {
    let req_body = String::from_utf8_lossy(&body).into_owned();
    let (status, resp) = run_on_app(
        app,
        http::Method::POST,
        COMMENTS_ROUTE,
        content_type,
        Body::from(body),
    )
    .await;
    if status == StatusCode::CREATED {
        return Ok(serde_json::from_slice(&resp).unwrap_or_else(|err| {
            panic!(
                "failed parsing created comment {err}, body is {resp:?}, request was {req_body:?}"
            )
        }));
    }
    Err(ApiError::parse(&resp)
        .unwrap_or_else(|err| panic!("parsing error response body {err}, body is {resp:?}")))
}

pub(crate) async fn post_json<Req>(app: &Router, body: &Req) -> Result<Comment, ApiError>
where
    Req: Debug + serde::Serialize,
{
    let body = serde_json::to_vec(body).expect("serializing request body to json");
    post_body(app, Some("application/json"), body).await
}

pub(crate) async fn open_stream(app: &Router) -> http::Response<BoxBody> {
    let req = request::Builder::new()
        .uri(STREAM_ROUTE)
        .body(Body::empty())
        .expect("building request");
    app.clone().oneshot(req).await.expect("opening stream")
}

/// Read from an event stream body until at least `n` frames were decoded
pub(crate) async fn read_frames<B>(body: &mut B, dec: &mut FrameDecoder, n: usize) -> Vec<Frame>
where
    B: HttpBody<Data = Bytes> + Unpin,
    B::Error: Debug,
{
    let mut frames = Vec::new();
    while frames.len() < n {
        let chunk = tokio::time::timeout(Duration::from_secs(5), body.data())
            .await
            .expect("timed out waiting for a frame")
            .expect("stream ended early")
            .expect("reading stream body");
        frames.extend(dec.push(&chunk));
    }
    frames
}

// comment ids and timestamps depend on the clock, so only compare content
fn normalize(frame: Frame) -> Frame {
    match frame {
        Frame::Event { event, id, data } if event == COMMENT_EVENT => {
            let c: Comment = serde_json::from_str(&data)
                .unwrap_or_else(|err| panic!("comment event with bad payload {data:?}: {err}"));
            Frame::Event {
                event,
                id,
                data: c.content,
            }
        }
        f => f,
    }
}

fn contents(comments: &[Comment]) -> Vec<&str> {
    comments.iter().map(|c| &c.content as &str).collect()
}

// server error details come from axum's rejection text, not serde's
fn without_details(res: Result<Comment, ApiError>) -> Result<String, ApiError> {
    match res {
        Ok(c) => Ok(c.content),
        Err(ApiError::MalformedBody(_)) => Err(ApiError::MalformedBody(String::new())),
        Err(e) => Err(e),
    }
}

#[derive(Clone, Debug, TypeGenerator)]
enum FuzzOp {
    List,
    Create {
        content: Option<String>,
    },
    /// A json body cut short after the content key
    CreateTruncated {
        content: String,
    },
    /// A body sent without a json content type
    CreateNotJson {
        body: String,
    },
    OpenStream,
    CloseStream {
        idx: usize,
    },
}

impl FuzzOp {
    /// The content type and body a create operation posts
    fn create_request(&self) -> Option<(bool, Vec<u8>)> {
        match self {
            FuzzOp::Create { content } => Some((
                true,
                serde_json::to_vec(&NewComment {
                    content: content.clone(),
                })
                .expect("serializing request body to json"),
            )),
            FuzzOp::CreateTruncated { content } => {
                let content = serde_json::to_string(content).expect("serializing string");
                Some((true, format!(r#"{{"content":{content}"#).into_bytes()))
            }
            FuzzOp::CreateNotJson { body } => Some((false, body.clone().into_bytes())),
            _ => None,
        }
    }
}

struct OpenStream {
    app: BoxBody,
    decoder: FrameDecoder,
    mock: mpsc::UnboundedReceiver<Frame>,
}

struct ComparativeFuzzer {
    app: Router,
    state: AppState,
    mock: MockServer,
    streams: Vec<OpenStream>,
}

impl ComparativeFuzzer {
    fn new() -> ComparativeFuzzer {
        let state = AppState {
            store: CommentStore::seeded(Utc::now()),
            feeds: Feeds::new(DEFAULT_RETRY),
        };
        let app = app(
            state.clone(),
            http::HeaderValue::from_static("http://localhost:5173"),
        );
        let mock = MockServer::with_comments(DEFAULT_RETRY, state.store.list());
        ComparativeFuzzer {
            app,
            state,
            mock,
            streams: Vec::new(),
        }
    }

    async fn compare_streams(&mut self) {
        for (i, s) in self.streams.iter_mut().enumerate() {
            let mut expected = Vec::new();
            while let Ok(f) = s.mock.try_recv() {
                expected.push(f);
            }
            let got = read_frames(&mut s.app, &mut s.decoder, expected.len()).await;
            assert_eq!(
                got.into_iter().map(normalize).collect::<Vec<_>>(),
                expected.into_iter().map(normalize).collect::<Vec<_>>(),
                "app and mock streams differ for stream {i}"
            );
        }
    }

    async fn execute_fuzz_op(&mut self, op: FuzzOp) {
        match op {
            FuzzOp::List => {
                let (status, body) = run_on_app(
                    &self.app,
                    http::Method::GET,
                    COMMENTS_ROUTE,
                    None,
                    Body::empty(),
                )
                .await;
                assert_eq!(status, StatusCode::OK);
                let app: Vec<Comment> = serde_json::from_slice(&body).expect("parsing list");
                assert_eq!(contents(&app), contents(&self.mock.list()));
            }
            FuzzOp::Create { .. }
            | FuzzOp::CreateTruncated { .. }
            | FuzzOp::CreateNotJson { .. } => {
                let (json, body) = op.create_request().expect("op is a create");
                let content_type = json.then_some("application/json");
                let app = post_body(&self.app, content_type, body.clone()).await;
                let mock = self.mock.create_from_body(json, &body, Utc::now());
                assert_eq!(
                    without_details(app),
                    without_details(mock),
                    "app and mock did not return the same result for {op:?}"
                );
            }
            FuzzOp::OpenStream => {
                let resp = open_stream(&self.app).await;
                assert_eq!(resp.status(), StatusCode::OK);
                self.streams.push(OpenStream {
                    app: resp.into_body(),
                    decoder: FrameDecoder::new(),
                    mock: self.mock.subscribe(),
                });
            }
            FuzzOp::CloseStream { idx } => {
                if !self.streams.is_empty() {
                    let idx = idx % self.streams.len();
                    drop(self.streams.remove(idx));
                }
            }
        }
        self.compare_streams().await;
        assert_eq!(self.state.feeds.len(), self.streams.len());
    }
}

#[test]
fn compare_with_mock() {
    let runtime = AssertUnwindSafe(
        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("failed initializing tokio runtime"),
    );
    bolero::check!()
        .with_generator(bolero::generator::gen_with::<Vec<FuzzOp>>().len(1..50usize))
        .cloned()
        .for_each(move |ops: Vec<FuzzOp>| {
            runtime.block_on(async move {
                let mut fuzzer = ComparativeFuzzer::new();
                for op in ops {
                    fuzzer.execute_fuzz_op(op).await;
                }
            })
        });
}
