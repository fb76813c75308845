//! Fetching from origin and upstream hosts.

use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use iseetv_core::config::ProxyConfig;
use std::time::Duration;
use tracing::{debug, error, warn};

use crate::error::{ProxyError, ProxyResult};

/// Body of an upstream response as a byte stream.
pub type ByteStream = futures::stream::BoxStream<'static, Result<Bytes, std::io::Error>>;

/// An upstream response ready to be streamed back to a client.
pub struct UpstreamBody {
    pub content_type: Option<String>,
    pub body: ByteStream,
}

impl std::fmt::Debug for UpstreamBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamBody")
            .field("content_type", &self.content_type)
            .finish_non_exhaustive()
    }
}

/// Shared HTTP client for origin and upstream fetches.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    client: reqwest::Client,
    request_timeout: Duration,
}

impl UpstreamClient {
    pub fn new(config: &ProxyConfig) -> ProxyResult<Self> {
        // no overall timeout here: passthrough bodies are unbounded live streams
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .connect_timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ProxyError::Build(e.to_string()))?;

        Ok(Self {
            client,
            request_timeout: Duration::from_secs(config.request_timeout_secs),
        })
    }

    async fn get(&self, url: &str, timeout: Option<Duration>) -> ProxyResult<reqwest::Response> {
        let parsed = url::Url::parse(url).map_err(|e| ProxyError::InvalidUrl(format!("{url}: {e}")))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ProxyError::InvalidUrl(format!("unsupported scheme: {url}")));
        }

        let mut request = self.client.get(parsed);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        let response = request.send().await.map_err(|e| {
            error!(url = %url, "Upstream request failed: {e}");
            ProxyError::Request(e)
        })?;

        let status = response.status();
        if !status.is_success() {
            warn!(url = %url, status = %status, "Upstream returned error status");
            return Err(ProxyError::UpstreamStatus(status));
        }
        Ok(response)
    }

    /// Fetch a playlist or other small text document.
    pub async fn fetch_text(&self, url: &str) -> ProxyResult<String> {
        let response = self.get(url, Some(self.request_timeout)).await?;
        Ok(response.text().await?)
    }

    /// Relay the origin byte stream verbatim, re-chunked into exactly
    /// `chunk_size` pieces (the last may be shorter).
    pub async fn stream_passthrough(&self, url: &str, chunk_size: usize) -> ProxyResult<UpstreamBody> {
        debug!(url = %url, chunk_size, "Opening origin passthrough");
        let response = self.get(url, None).await?;
        let content_type = header_content_type(&response);
        let url = url.to_string();

        let body = rechunk(response.bytes_stream(), chunk_size).map(move |chunk| {
            chunk.map_err(|e| {
                warn!(url = %url, "Origin stream interrupted: {e}");
                std::io::Error::other(e)
            })
        });

        Ok(UpstreamBody {
            content_type,
            body: body.boxed(),
        })
    }

    /// Fetch one segment and stream it back.
    pub async fn proxy_segment(&self, url: &str) -> ProxyResult<UpstreamBody> {
        let response = self.get(url, Some(self.request_timeout)).await?;
        let content_type = header_content_type(&response);
        let body = response.bytes_stream().map(|chunk| chunk.map_err(std::io::Error::other));

        Ok(UpstreamBody {
            content_type,
            body: body.boxed(),
        })
    }
}

fn header_content_type(response: &reqwest::Response) -> Option<String> {
    response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(ToString::to_string)
}

/// `base` joined with `path`, keeping a single slash between them.
#[must_use]
pub fn join_upstream(base: &str, path: &str, query: Option<&str>) -> String {
    let mut url = format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'));
    if let Some(query) = query.filter(|q| !q.is_empty()) {
        url.push('?');
        url.push_str(query);
    }
    url
}

/// Regroup a byte stream into fixed-size chunks.
///
/// An error is passed through and ends the stream; bytes buffered before it
/// are dropped.
pub fn rechunk<S, E>(inner: S, chunk_size: usize) -> impl Stream<Item = Result<Bytes, E>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Send + 'static,
{
    let chunk_size = chunk_size.max(1);
    let state = (Box::pin(inner), BytesMut::new(), false);

    futures::stream::unfold(state, move |(mut inner, mut buf, mut done)| async move {
        loop {
            if buf.len() >= chunk_size {
                let chunk = buf.split_to(chunk_size).freeze();
                return Some((Ok(chunk), (inner, buf, done)));
            }
            if done {
                if buf.is_empty() {
                    return None;
                }
                let chunk = buf.split().freeze();
                return Some((Ok(chunk), (inner, buf, done)));
            }
            match inner.next().await {
                Some(Ok(bytes)) => buf.extend_from_slice(&bytes),
                Some(Err(e)) => {
                    buf.clear();
                    return Some((Err(e), (inner, buf, true)));
                }
                None => done = true,
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn collect_sizes(input: Vec<Result<Bytes, &'static str>>, size: usize) -> Vec<Result<usize, &'static str>> {
        rechunk(futures::stream::iter(input), size)
            .map(|r| r.map(|b| b.len()))
            .collect()
            .await
    }

    #[tokio::test]
    async fn test_rechunk_exact_sizes() {
        let input = vec![
            Ok(Bytes::from(vec![0u8; 3])),
            Ok(Bytes::from(vec![1u8; 7])),
            Ok(Bytes::from(vec![2u8; 1])),
        ];
        assert_eq!(collect_sizes(input, 4).await, vec![Ok(4), Ok(4), Ok(3)]);
    }

    #[tokio::test]
    async fn test_rechunk_preserves_bytes() {
        let input = vec![Ok(Bytes::from_static(b"abc")), Ok(Bytes::from_static(b"defgh"))];
        let chunks: Vec<Bytes> = rechunk(futures::stream::iter(input), 2)
            .map(|r: Result<Bytes, ()>| r.unwrap())
            .collect()
            .await;
        assert_eq!(chunks.concat(), b"abcdefgh");
    }

    #[tokio::test]
    async fn test_rechunk_error_ends_stream() {
        let input = vec![Ok(Bytes::from(vec![0u8; 5])), Err("reset"), Ok(Bytes::from(vec![0u8; 5]))];
        assert_eq!(collect_sizes(input, 4).await, vec![Ok(4), Err("reset")]);
    }

    #[test]
    fn test_join_upstream() {
        assert_eq!(
            join_upstream("http://up.example.com/", "/live/a.ts", None),
            "http://up.example.com/live/a.ts"
        );
        assert_eq!(
            join_upstream("http://up.example.com", "live/a.m3u8", Some("token=1")),
            "http://up.example.com/live/a.m3u8?token=1"
        );
    }
}
