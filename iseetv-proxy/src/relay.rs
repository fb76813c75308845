//! Time-boxed manifest relay.
//!
//! Re-fetches an upstream playlist on a fixed interval, rewrites its segment
//! URIs through the segment proxy and forwards each copy to the client. The
//! relay stops when its total duration is up, whatever state it is in.

use bytes::Bytes;
use iseetv_core::config::RelayConfig;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn, Instrument};

use crate::rewrite::rewrite_m3u8;
use crate::upstream::UpstreamClient;

#[derive(Debug, Clone, Copy)]
pub struct RelaySettings {
    pub interval: Duration,
    pub duration: Duration,
    pub retry_backoff: Duration,
}

impl RelaySettings {
    #[must_use]
    pub const fn from_config(config: &RelayConfig) -> Self {
        Self {
            interval: Duration::from_secs(config.interval_secs),
            duration: Duration::from_secs(config.duration_secs),
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
        }
    }
}

/// Start relaying `source_url`; each item is one rewritten playlist.
///
/// The relay runs in its own task and stops early when the receiver is
/// dropped.
#[must_use]
pub fn relay_manifest(
    client: UpstreamClient,
    source_url: String,
    proxy_base: String,
    settings: RelaySettings,
) -> ReceiverStream<Result<Bytes, std::io::Error>> {
    let (tx, rx) = mpsc::channel(4);
    let span = tracing::info_span!("manifest_relay", url = %source_url);

    tokio::spawn(
        async move {
            let relay = relay_loop(&client, &source_url, &proxy_base, settings, &tx);
            if tokio::time::timeout(settings.duration, relay).await.is_err() {
                info!(duration = ?settings.duration, "Relay duration elapsed");
            }
        }
        .instrument(span),
    );

    ReceiverStream::new(rx)
}

async fn relay_loop(
    client: &UpstreamClient,
    source_url: &str,
    proxy_base: &str,
    settings: RelaySettings,
    tx: &mpsc::Sender<Result<Bytes, std::io::Error>>,
) {
    let mut forwarded = 0usize;
    loop {
        match client.fetch_text(source_url).await {
            Ok(text) => {
                let rewritten = rewrite_m3u8(&text, source_url, proxy_base);
                if tx.send(Ok(Bytes::from(rewritten))).await.is_err() {
                    debug!(forwarded, "Relay client went away");
                    return;
                }
                forwarded += 1;
                if !pause(tx, settings.interval).await {
                    return;
                }
            }
            Err(e) => {
                warn!(backoff = ?settings.retry_backoff, "Relay fetch failed, retrying: {e}");
                if !pause(tx, settings.retry_backoff).await {
                    return;
                }
            }
        }
    }
}

/// Sleep for `duration`; false if the client disconnected meanwhile.
async fn pause(tx: &mpsc::Sender<Result<Bytes, std::io::Error>>, duration: Duration) -> bool {
    tokio::select! {
        () = tokio::time::sleep(duration) => true,
        () = tx.closed() => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_from_config() {
        let settings = RelaySettings::from_config(&RelayConfig::default());
        assert_eq!(settings.interval, Duration::from_secs(2));
        assert_eq!(settings.duration, Duration::from_secs(30));
        assert_eq!(settings.retry_backoff, Duration::from_millis(1000));
    }
}
