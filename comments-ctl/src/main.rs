use std::time::Duration;

use anyhow::{anyhow, Context};
use comments_api::{
    Comment, Error as ApiError, Frame, FrameDecoder, NewComment, COMMENTS_ROUTE, COMMENT_EVENT,
    DEFAULT_RETRY, STREAM_ROUTE,
};
use futures::StreamExt;

#[derive(structopt::StructOpt)]
struct Opt {
    #[structopt(short, long, default_value = "http://localhost:3000")]
    host: String,

    #[structopt(subcommand)]
    cmd: Command,
}

#[derive(structopt::StructOpt)]
enum Command {
    /// List all comments, newest first
    List,

    /// Post a comment
    Post {
        /// Comment content
        content: String,
    },

    /// Print comments as they get posted, until interrupted
    Watch,
}

fn format_comment(c: &Comment) -> String {
    let time = c
        .created_at()
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| String::from("?"));
    format!("[{time}] #{} {}", c.id.0, c.content)
}

/// Client side of one comment stream, kept across reconnections
struct Watcher {
    retry: Duration,
    decoder: FrameDecoder,
}

impl Watcher {
    fn new() -> Watcher {
        Watcher {
            retry: DEFAULT_RETRY,
            decoder: FrameDecoder::new(),
        }
    }

    /// Forget any partially received frame; the server does not replay anything
    fn reconnected(&mut self) {
        self.decoder = FrameDecoder::new();
    }

    fn feed(&mut self, chunk: &[u8]) -> Vec<Comment> {
        let mut comments = Vec::new();
        for frame in self.decoder.push(chunk) {
            match frame {
                Frame::Retry(retry) => self.retry = retry,
                Frame::Event { event, data, .. } if event == COMMENT_EVENT => {
                    match serde_json::from_str(&data) {
                        Ok(c) => comments.push(c),
                        Err(err) => tracing::warn!(?err, ?data, "ignoring malformed comment"),
                    }
                }
                Frame::Event { event, id, data } => {
                    tracing::debug!(?event, ?id, ?data, "ignoring event")
                }
            }
        }
        comments
    }
}

async fn stream_once(
    client: &reqwest::Client,
    host: &str,
    watcher: &mut Watcher,
) -> anyhow::Result<()> {
    let resp = client
        .get(format!("{host}{STREAM_ROUTE}"))
        .header(reqwest::header::ACCEPT, "text/event-stream")
        .send()
        .await
        .context("connecting to comment stream")?
        .error_for_status()?;
    watcher.reconnected();
    tracing::info!("connected to comment stream");
    let mut body = resp.bytes_stream();
    while let Some(chunk) = body.next().await {
        let chunk = chunk.context("reading comment stream")?;
        for c in watcher.feed(&chunk) {
            println!("{}", format_comment(&c));
        }
    }
    Ok(())
}

async fn watch(client: &reqwest::Client, host: &str) {
    let mut watcher = Watcher::new();
    loop {
        match stream_once(client, host, &mut watcher).await {
            Ok(()) => tracing::warn!("comment stream closed by server"),
            Err(err) => tracing::warn!(?err, "comment stream failed"),
        }
        tracing::info!("reconnecting in {:?}", watcher.retry);
        tokio::time::sleep(watcher.retry).await;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let opt = <Opt as structopt::StructOpt>::from_args();
    let host = opt.host.trim_end_matches('/');

    let client = reqwest::Client::new();

    match opt.cmd {
        Command::List => {
            let comments: Vec<Comment> = client
                .get(format!("{host}{COMMENTS_ROUTE}"))
                .send()
                .await?
                .error_for_status()?
                .json()
                .await
                .context("parsing comment list")?;
            for c in comments {
                println!("{}", format_comment(&c));
            }
        }
        Command::Post { content } => {
            if content.trim().is_empty() {
                return Err(anyhow!("refusing to post a blank comment"));
            }
            let resp = client
                .post(format!("{host}{COMMENTS_ROUTE}"))
                .json(&NewComment::new(content))
                .send()
                .await?;
            if !resp.status().is_success() {
                let body = resp.bytes().await?;
                return Err(ApiError::parse(&body)?).context("posting comment");
            }
            let c: Comment = resp.json().await.context("parsing created comment")?;
            println!("{}", format_comment(&c));
        }
        Command::Watch => {
            tokio::select! {
                () = watch(&client, host) => (),
                res = tokio::signal::ctrl_c() => res.context("listening for ctrl-c")?,
            }
        }
    }

    Ok(())
}
