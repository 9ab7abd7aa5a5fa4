use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::SyncOptions;
use crate::quotes::{Quote, QuoteRepository};
use crate::storage::KeyValueStore;

pub mod worker;

pub use worker::{PushTrigger, SyncCommand, SyncEvent, SyncWorker};

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("building http client: {0}")]
    Client(#[source] reqwest::Error),
    #[error("request to {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} answered with status {status}")]
    Status { url: String, status: u16 },
    #[error("decoding response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("reading stored quotes: {0:#}")]
    Storage(anyhow::Error),
    #[error("{0}")]
    Endpoint(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RemotePost {
    #[serde(default)]
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutgoingPost {
    pub title: String,
    pub body: String,
}

impl From<&Quote> for OutgoingPost {
    fn from(quote: &Quote) -> Self {
        Self {
            title: quote.text.clone(),
            body: quote.category.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushReport {
    pub sent: usize,
}

#[async_trait]
pub trait RemoteEndpoint: Send + Sync {
    async fn fetch_posts(&self) -> Result<Vec<RemotePost>, SyncError>;
    async fn publish(&self, post: &OutgoingPost) -> Result<(), SyncError>;
}

pub struct HttpEndpoint {
    client: reqwest::Client,
    url: String,
}

impl HttpEndpoint {
    pub fn new(url: impl Into<String>, timeout: Option<Duration>) -> Result<Self, SyncError> {
        let mut builder = reqwest::Client::builder()
            .user_agent(concat!("quotetui/", env!("CARGO_PKG_VERSION")));
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }
        let client = builder.build().map_err(SyncError::Client)?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn from_options(options: &SyncOptions) -> Result<Self, SyncError> {
        Self::new(options.endpoint.clone(), options.request_timeout())
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn request_error(&self, source: reqwest::Error) -> SyncError {
        SyncError::Request {
            url: self.url.clone(),
            source,
        }
    }
}

#[async_trait]
impl RemoteEndpoint for HttpEndpoint {
    async fn fetch_posts(&self) -> Result<Vec<RemotePost>, SyncError> {
        let response = self
            .client
            .get(&self.url)
            .send()
            .await
            .map_err(|err| self.request_error(err))?;
        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::Status {
                url: self.url.clone(),
                status: status.as_u16(),
            });
        }
        response
            .json::<Vec<RemotePost>>()
            .await
            .map_err(|source| SyncError::Decode {
                url: self.url.clone(),
                source,
            })
    }

    async fn publish(&self, post: &OutgoingPost) -> Result<(), SyncError> {
        let response = self
            .client
            .post(&self.url)
            .json(post)
            .send()
            .await
            .map_err(|err| self.request_error(err))?;
        let status = response.status();
        if !status.is_success() {
            return Err(SyncError::Status {
                url: self.url.clone(),
                status: status.as_u16(),
            });
        }
        Ok(())
    }
}

/// Fetches the remote collection as quotes tagged with `category`.
pub async fn pull_quotes(
    endpoint: &dyn RemoteEndpoint,
    category: &str,
) -> Result<Vec<Quote>, SyncError> {
    let posts = endpoint.fetch_posts().await?;
    tracing::debug!(count = posts.len(), "fetched remote posts");
    Ok(posts
        .into_iter()
        .map(|post| Quote::new(post.title, category))
        .collect())
}

/// Publishes every persisted quote, one request each, stopping at the first failure.
pub async fn push_quotes(
    endpoint: &dyn RemoteEndpoint,
    store: &dyn KeyValueStore,
) -> Result<PushReport, SyncError> {
    let quotes = QuoteRepository::read_persisted(store).map_err(SyncError::Storage)?;
    let mut sent = 0;
    for quote in &quotes {
        endpoint.publish(&OutgoingPost::from(quote)).await?;
        sent += 1;
    }
    Ok(PushReport { sent })
}

/// `[remote..., local...]`, duplicates included.
pub fn merge_remote_first(remote: Vec<Quote>, local: Vec<Quote>) -> Vec<Quote> {
    let mut merged = remote;
    merged.extend(local);
    merged
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::storage::{MemoryStore, QUOTES_KEY};
    use assert_matches::assert_matches;
    use parking_lot::Mutex;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::task::JoinHandle;

    /// In-process endpoint serving a fixed collection and recording posts.
    #[derive(Default)]
    pub(crate) struct FixtureEndpoint {
        pub(crate) posts: Vec<RemotePost>,
        pub(crate) published: Mutex<Vec<OutgoingPost>>,
        pub(crate) fail_fetch: bool,
        pub(crate) fail_publish_after: Option<usize>,
        pub(crate) fetches: AtomicUsize,
    }

    impl FixtureEndpoint {
        pub(crate) fn with_titles(titles: &[&str]) -> Self {
            Self {
                posts: titles
                    .iter()
                    .map(|title| RemotePost {
                        title: title.to_string(),
                    })
                    .collect(),
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl RemoteEndpoint for FixtureEndpoint {
        async fn fetch_posts(&self) -> Result<Vec<RemotePost>, SyncError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            if self.fail_fetch {
                return Err(SyncError::Endpoint("fixture fetch failure".into()));
            }
            Ok(self.posts.clone())
        }

        async fn publish(&self, post: &OutgoingPost) -> Result<(), SyncError> {
            let mut published = self.published.lock();
            if Some(published.len()) == self.fail_publish_after {
                return Err(SyncError::Endpoint("fixture publish failure".into()));
            }
            published.push(post.clone());
            Ok(())
        }
    }

    /// Serves exactly one HTTP response and hands back the raw request it answered.
    async fn serve_once(
        status: &'static str,
        body: &'static str,
    ) -> anyhow::Result<(String, JoinHandle<anyhow::Result<String>>)> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let url = format!("http://{}/posts", listener.local_addr()?);
        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await?;
            let request = read_request(&mut socket).await?;
            let response = format!(
                "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await?;
            socket.shutdown().await?;
            Ok(request)
        });
        Ok((url, handle))
    }

    async fn read_request(socket: &mut TcpStream) -> anyhow::Result<String> {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let read = socket.read(&mut chunk).await?;
            if read == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..read]);
            let Some(end) = buf.windows(4).position(|window| window == b"\r\n\r\n") else {
                continue;
            };
            let head = String::from_utf8_lossy(&buf[..end]).to_lowercase();
            let length = head
                .lines()
                .find_map(|line| line.strip_prefix("content-length:"))
                .and_then(|value| value.trim().parse::<usize>().ok())
                .unwrap_or(0);
            if buf.len() >= end + 4 + length {
                break;
            }
        }
        Ok(String::from_utf8(buf)?)
    }

    #[tokio::test]
    async fn http_fetch_decodes_titles_and_ignores_extra_fields() -> anyhow::Result<()> {
        let (url, server) = serve_once(
            "200 OK",
            r#"[{"userId":1,"id":1,"title":"first","body":"x"},{"id":2,"title":"second"}]"#,
        )
        .await?;
        let endpoint = HttpEndpoint::new(url, None)?;

        let posts = endpoint.fetch_posts().await?;
        assert_eq!(
            posts,
            vec![
                RemotePost {
                    title: "first".into()
                },
                RemotePost {
                    title: "second".into()
                },
            ]
        );
        let request = server.await??;
        assert!(request.starts_with("GET /posts "));
        Ok(())
    }

    #[tokio::test]
    async fn http_error_status_is_reported() -> anyhow::Result<()> {
        let (url, server) = serve_once("500 Internal Server Error", "{}").await?;
        let endpoint = HttpEndpoint::new(url, None)?;

        assert_matches!(
            endpoint.fetch_posts().await,
            Err(SyncError::Status { status: 500, .. })
        );
        server.await??;
        Ok(())
    }

    #[tokio::test]
    async fn http_body_that_is_not_a_post_list_fails_to_decode() -> anyhow::Result<()> {
        let (url, server) = serve_once("200 OK", r#"{"title":"not a list"}"#).await?;
        let endpoint = HttpEndpoint::new(url, None)?;

        assert_matches!(endpoint.fetch_posts().await, Err(SyncError::Decode { .. }));
        server.await??;
        Ok(())
    }

    #[tokio::test]
    async fn http_publish_posts_json_title_and_body() -> anyhow::Result<()> {
        let (url, server) = serve_once("201 Created", r#"{"id":101}"#).await?;
        let endpoint = HttpEndpoint::new(url, None)?;

        endpoint
            .publish(&OutgoingPost::from(&Quote::new("Be kind", "Life")))
            .await?;
        let request = server.await??;
        assert!(request.starts_with("POST /posts "));
        assert!(request
            .to_lowercase()
            .contains("content-type: application/json"));
        assert!(request.ends_with(r#"{"title":"Be kind","body":"Life"}"#));
        Ok(())
    }

    #[tokio::test]
    async fn http_publish_rejected_by_server_is_an_error() -> anyhow::Result<()> {
        let (url, server) = serve_once("503 Service Unavailable", "").await?;
        let endpoint = HttpEndpoint::new(url, None)?;

        assert_matches!(
            endpoint.publish(&OutgoingPost::from(&Quote::new("a", "b"))).await,
            Err(SyncError::Status { status: 503, .. })
        );
        server.await??;
        Ok(())
    }

    #[tokio::test]
    async fn pull_tags_every_post_with_server_category() -> anyhow::Result<()> {
        let endpoint = FixtureEndpoint::with_titles(&["first", "second"]);
        let quotes = pull_quotes(&endpoint, "Server").await?;
        assert_eq!(
            quotes,
            vec![Quote::new("first", "Server"), Quote::new("second", "Server")]
        );
        Ok(())
    }

    #[tokio::test]
    async fn pull_propagates_fetch_errors() {
        let endpoint = FixtureEndpoint {
            fail_fetch: true,
            ..FixtureEndpoint::default()
        };
        assert_matches!(
            pull_quotes(&endpoint, "Server").await,
            Err(SyncError::Endpoint(_))
        );
    }

    #[tokio::test]
    async fn push_sends_every_persisted_quote_each_time() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        store.set(
            QUOTES_KEY,
            r#"[{"text":"a","category":"x"},{"text":"b","category":"y"}]"#,
        )?;
        let endpoint = FixtureEndpoint::default();

        assert_eq!(push_quotes(&endpoint, &store).await?.sent, 2);
        assert_eq!(push_quotes(&endpoint, &store).await?.sent, 2);

        let published = endpoint.published.lock();
        assert_eq!(published.len(), 4);
        assert_eq!(
            published[0],
            OutgoingPost {
                title: "a".into(),
                body: "x".into()
            }
        );
        Ok(())
    }

    #[tokio::test]
    async fn push_abandons_run_on_first_failure() -> anyhow::Result<()> {
        let store = Arc::new(MemoryStore::new());
        store.set(
            QUOTES_KEY,
            r#"[{"text":"a","category":"x"},{"text":"b","category":"y"},{"text":"c","category":"z"}]"#,
        )?;
        let endpoint = FixtureEndpoint {
            fail_publish_after: Some(1),
            ..FixtureEndpoint::default()
        };

        assert!(push_quotes(&endpoint, store.as_ref()).await.is_err());
        assert_eq!(endpoint.published.lock().len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn push_refuses_unreadable_stored_list() -> anyhow::Result<()> {
        let store = MemoryStore::new();
        store.set(QUOTES_KEY, "{broken")?;
        let endpoint = FixtureEndpoint::default();

        assert_matches!(
            push_quotes(&endpoint, &store).await,
            Err(SyncError::Storage(_))
        );
        assert!(endpoint.published.lock().is_empty());
        Ok(())
    }

    #[test]
    fn merge_puts_remote_items_first() {
        let merged = merge_remote_first(
            vec![Quote::new("r", "Server")],
            vec![Quote::new("l1", "Life"), Quote::new("l2", "Life")],
        );
        assert_eq!(
            merged,
            vec![
                Quote::new("r", "Server"),
                Quote::new("l1", "Life"),
                Quote::new("l2", "Life"),
            ]
        );
    }

    #[test]
    fn outgoing_post_serialises_title_and_body() -> anyhow::Result<()> {
        let json = serde_json::to_string(&OutgoingPost::from(&Quote::new("t", "c")))?;
        assert_eq!(json, r#"{"title":"t","body":"c"}"#);
        Ok(())
    }
}
