use bytes::Bytes;
use futures::StreamExt;
use iseetv_core::config::ProxyConfig;
use iseetv_proxy::{relay_manifest, ProxyError, RelaySettings, UpstreamClient};
use std::time::{Duration, Instant};
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

const PLAYLIST: &str = "#EXTM3U
#EXT-X-TARGETDURATION:4
#EXTINF:4.0,
seg1.ts
";

fn client() -> UpstreamClient {
    UpstreamClient::new(&ProxyConfig::default()).unwrap()
}

async fn mock_body(server: &MockServer, mock_path: &str, template: ResponseTemplate) {
    Mock::given(method("GET"))
        .and(path(mock_path))
        .respond_with(template)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_passthrough_relays_bytes_in_fixed_chunks() {
    let server = MockServer::start().await;
    let payload: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
    mock_body(
        &server,
        "/live/7",
        ResponseTemplate::new(200)
            .insert_header("content-type", "video/mp2t")
            .set_body_bytes(payload.clone()),
    )
    .await;

    let upstream = client()
        .stream_passthrough(&format!("{}/live/7", server.uri()), 4096)
        .await
        .unwrap();
    assert_eq!(upstream.content_type.as_deref(), Some("video/mp2t"));

    let chunks: Vec<Bytes> = upstream.body.map(|c| c.unwrap()).collect().await;
    let sizes: Vec<usize> = chunks.iter().map(Bytes::len).collect();
    assert_eq!(sizes, vec![4096, 4096, 1808]);
    assert_eq!(chunks.concat(), payload);
}

#[tokio::test]
async fn test_passthrough_forwards_upstream_status() {
    let server = MockServer::start().await;
    mock_body(&server, "/live/404", ResponseTemplate::new(404)).await;

    let err = client()
        .stream_passthrough(&format!("{}/live/404", server.uri()), 1024)
        .await
        .unwrap_err();
    assert_eq!(err.upstream_status().map(|s| s.as_u16()), Some(404));
}

#[tokio::test]
async fn test_segment_proxy_streams_body() {
    let server = MockServer::start().await;
    mock_body(
        &server,
        "/seg/1.ts",
        ResponseTemplate::new(200).set_body_bytes(b"segment-bytes".to_vec()),
    )
    .await;

    let upstream = client()
        .proxy_segment(&format!("{}/seg/1.ts", server.uri()))
        .await
        .unwrap();
    let body: Vec<Bytes> = upstream.body.map(|c| c.unwrap()).collect().await;
    assert_eq!(body.concat(), b"segment-bytes");
}

#[tokio::test]
async fn test_segment_proxy_failure_is_terminal() {
    let server = MockServer::start().await;
    mock_body(&server, "/seg/bad.ts", ResponseTemplate::new(503)).await;

    let err = client()
        .proxy_segment(&format!("{}/seg/bad.ts", server.uri()))
        .await
        .unwrap_err();
    assert!(matches!(err, ProxyError::UpstreamStatus(s) if s.as_u16() == 503));
}

#[tokio::test]
async fn test_invalid_url_rejected() {
    let err = client().proxy_segment("file:///etc/passwd").await.unwrap_err();
    assert!(matches!(err, ProxyError::InvalidUrl(_)));
    let err = client().proxy_segment("not a url").await.unwrap_err();
    assert!(matches!(err, ProxyError::InvalidUrl(_)));
}

#[tokio::test]
async fn test_relay_rewrites_and_stops_after_duration() {
    let server = MockServer::start().await;
    mock_body(
        &server,
        "/live/index.m3u8",
        ResponseTemplate::new(200).set_body_string(PLAYLIST),
    )
    .await;
    let source = format!("{}/live/index.m3u8", server.uri());

    let settings = RelaySettings {
        interval: Duration::from_millis(100),
        duration: Duration::from_millis(450),
        retry_backoff: Duration::from_millis(50),
    };
    let started = Instant::now();
    let items: Vec<Bytes> = relay_manifest(client(), source.clone(), "/segment/3".to_string(), settings)
        .map(|item| item.unwrap())
        .collect()
        .await;

    // stream ends on its own once the duration is up
    assert!(started.elapsed() < Duration::from_secs(3));
    assert!(items.len() >= 2);

    let first = std::str::from_utf8(&items[0]).unwrap();
    let expected = format!(
        "/segment/3?url={}",
        iseetv_proxy::percent_encode(&format!("{}/live/seg1.ts", server.uri()))
    );
    assert!(first.lines().any(|l| l == expected));
}

#[tokio::test]
async fn test_relay_retries_after_failures() {
    let server = MockServer::start().await;
    // first two fetches fail, later ones succeed
    Mock::given(method("GET"))
        .and(path("/flaky.m3u8"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    mock_body(
        &server,
        "/flaky.m3u8",
        ResponseTemplate::new(200).set_body_string(PLAYLIST),
    )
    .await;

    let settings = RelaySettings {
        interval: Duration::from_millis(100),
        duration: Duration::from_millis(600),
        retry_backoff: Duration::from_millis(50),
    };
    let items: Vec<_> = relay_manifest(
        client(),
        format!("{}/flaky.m3u8", server.uri()),
        "/segment/1".to_string(),
        settings,
    )
    .collect()
    .await;

    assert!(!items.is_empty());
    assert!(items.iter().all(Result::is_ok));
}
