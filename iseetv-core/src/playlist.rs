//! M3U playlist loading for the channel repository.

use regex::Regex;
use std::collections::HashMap;
use std::path::Path;
use std::sync::LazyLock;
use tracing::info;

use crate::error::Result;
use crate::models::{Channel, ChannelId};

pub const DEFAULT_GROUP: &str = "Uncategorized";

static ATTRIBUTE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"([a-zA-Z-]+)="([^"]*)""#).expect("static regex"));

struct PendingEntry {
    name: String,
    group: String,
    logo: Option<String>,
    tvg_id: Option<String>,
}

/// Parse M3U text into channels.
///
/// An `#EXTINF` line opens an entry, the next `http*` line closes it. Entries
/// without a URL are dropped. Ids are assigned 1..n in file order.
#[must_use]
pub fn parse_m3u(content: &str) -> Vec<Channel> {
    let mut channels = Vec::new();
    let mut pending: Option<PendingEntry> = None;

    for line in content.lines().map(str::trim) {
        if let Some(info) = line.strip_prefix("#EXTINF:") {
            let (attr_part, title) = match info.split_once(',') {
                Some((attrs, title)) => (attrs, Some(title.trim())),
                None => (info, None),
            };
            let mut attrs = parse_attributes(attr_part);

            let name = title
                .filter(|t| !t.is_empty())
                .map(ToString::to_string)
                .or_else(|| attrs.remove("tvg-name"))
                .unwrap_or_else(|| "Unknown".to_string());

            pending = Some(PendingEntry {
                name,
                group: attrs
                    .remove("group-title")
                    .unwrap_or_else(|| DEFAULT_GROUP.to_string()),
                logo: attrs.remove("tvg-logo"),
                tvg_id: attrs.remove("tvg-id"),
            });
        } else if line.starts_with("http") {
            if let Some(entry) = pending.take() {
                let id = ChannelId::from(channels.len() as u64 + 1);
                channels.push(Channel {
                    id,
                    name: entry.name,
                    url: line.to_string(),
                    group: entry.group,
                    logo: entry.logo,
                    tvg_id: entry.tvg_id,
                });
            }
        }
    }

    channels
}

fn parse_attributes(attrs: &str) -> HashMap<String, String> {
    ATTRIBUTE_RE
        .captures_iter(attrs)
        .map(|c| (c[1].to_string(), c[2].to_string()))
        .collect()
}

/// Read and parse an M3U file.
pub async fn load_m3u_file(path: &Path) -> Result<Vec<Channel>> {
    let content = tokio::fs::read_to_string(path).await?;
    let channels = parse_m3u(&content);
    info!(path = %path.display(), count = channels.len(), "Loaded channel playlist");
    Ok(channels)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"#EXTM3U
#EXTINF:-1 tvg-id="bbc1.uk" tvg-name="BBC One" tvg-logo="http://logo/bbc1.png" group-title="UK",BBC One HD
http://src/bbc1
#EXTINF:-1 tvg-name="No Title",
http://src/notitle
#EXTINF:-1,Orphan without url
#EXTINF:-1,Plain
https://src/plain.m3u8
"#;

    #[test]
    fn test_parse_m3u_attributes() {
        let channels = parse_m3u(SAMPLE);
        assert_eq!(channels.len(), 3);

        let bbc = &channels[0];
        assert_eq!(bbc.id.as_str(), "1");
        assert_eq!(bbc.name, "BBC One HD");
        assert_eq!(bbc.group, "UK");
        assert_eq!(bbc.logo.as_deref(), Some("http://logo/bbc1.png"));
        assert_eq!(bbc.tvg_id.as_deref(), Some("bbc1.uk"));
        assert_eq!(bbc.url, "http://src/bbc1");
    }

    #[test]
    fn test_parse_m3u_fallbacks() {
        let channels = parse_m3u(SAMPLE);

        assert_eq!(channels[1].name, "No Title");
        assert_eq!(channels[1].group, DEFAULT_GROUP);

        // the orphan entry is replaced by the next #EXTINF
        assert_eq!(channels[2].name, "Plain");
        assert_eq!(channels[2].id.as_str(), "3");
    }

    #[test]
    fn test_url_without_extinf_is_ignored() {
        assert!(parse_m3u("#EXTM3U\nhttp://src/lonely\n").is_empty());
    }
}
