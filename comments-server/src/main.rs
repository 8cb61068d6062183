use std::{future::Future, net::SocketAddr, time::Duration};

use anyhow::Context;
use axum::{
    http::{header, HeaderValue, Method},
    routing::get,
    Router,
};
use chrono::Utc;
use comments_api::{COMMENTS_ROUTE, STREAM_ROUTE};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::Level;

mod error;
mod extractors;
mod feeds;
mod fuzz;
mod handlers;
mod store;

use error::Error;
use extractors::AppState;
use feeds::Feeds;
use store::CommentStore;

#[derive(structopt::StructOpt)]
struct Opt {
    /// Address to listen on
    #[structopt(long, env = "COMMENTS_LISTEN", default_value = "127.0.0.1:3000")]
    listen: SocketAddr,

    /// The only origin allowed to make cross-origin requests
    #[structopt(
        long,
        env = "COMMENTS_ALLOWED_ORIGIN",
        default_value = "http://localhost:5173"
    )]
    allowed_origin: String,

    /// Reconnect delay advertised to stream clients, in milliseconds
    #[structopt(long, env = "COMMENTS_RETRY_MS", default_value = "5000")]
    retry_ms: u64,

    /// Start with no comments instead of the default ones
    #[structopt(long)]
    no_seed: bool,
}

impl Opt {
    fn state(&self) -> AppState {
        let store = if self.no_seed {
            CommentStore::new()
        } else {
            CommentStore::seeded(Utc::now())
        };
        AppState {
            store,
            feeds: Feeds::new(Duration::from_millis(self.retry_ms)),
        }
    }
}

fn cors(allowed_origin: HeaderValue) -> CorsLayer {
    CorsLayer::new()
        .allow_origin(allowed_origin)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE])
        .allow_credentials(true)
}

pub fn app(state: AppState, allowed_origin: HeaderValue) -> Router {
    Router::new()
        .route(
            COMMENTS_ROUTE,
            get(handlers::list_comments).post(handlers::create_comment),
        )
        .route(STREAM_ROUTE, get(handlers::comment_stream))
        .layer(cors(allowed_origin))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .with_state(state)
}

async fn shutdown<F>(feeds: Feeds, signal: F)
where
    F: Future<Output = std::io::Result<()>>,
{
    if let Err(err) = signal.await {
        tracing::error!(?err, "failed listening for ctrl-c, will never shut down");
        std::future::pending::<()>().await;
    }
    tracing::info!(streams = feeds.len(), "shutting down");
    // graceful shutdown waits for open connections, and streams never end on their own
    feeds.close_all();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let opt = <Opt as structopt::StructOpt>::from_args();
    let allowed_origin = HeaderValue::from_str(&opt.allowed_origin)
        .with_context(|| format!("parsing allowed origin {:?}", opt.allowed_origin))?;

    let state = opt.state();
    tracing::debug!(comments = state.store.len(), "comment store ready");
    let feeds = state.feeds.clone();
    let app = app(state, allowed_origin);

    tracing::info!("listening on http://{}", opt.listen);
    axum::Server::try_bind(&opt.listen)
        .with_context(|| format!("binding to {}", opt.listen))?
        .serve(app.into_make_service())
        .with_graceful_shutdown(shutdown(feeds, tokio::signal::ctrl_c()))
        .await
        .context("serving axum webserver")
}
