//! Channel lookup used by the streaming core.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

use crate::config::ChannelsConfig;
use crate::error::{Error, Result};
use crate::models::{Channel, ChannelId};
use crate::playlist;

/// Resolves a channel id to its channel record (and so its origin URL).
#[async_trait]
pub trait ChannelRepository: Send + Sync {
    /// Fails with [`Error::NotFound`] for unknown ids.
    async fn lookup(&self, id: &ChannelId) -> Result<Channel>;
}

/// Channel store held in memory, filled from config at startup.
#[derive(Default)]
pub struct InMemoryChannelRepository {
    channels: RwLock<HashMap<ChannelId, Channel>>,
}

impl InMemoryChannelRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from_channels(channels: impl IntoIterator<Item = Channel>) -> Self {
        let repo = Self::new();
        for channel in channels {
            repo.insert(channel);
        }
        repo
    }

    /// Build from the playlist file (if any) followed by inline entries,
    /// numbering continues across both.
    pub async fn from_config(config: &ChannelsConfig) -> Result<Self> {
        let mut channels = match &config.playlist_path {
            Some(path) => playlist::load_m3u_file(path).await?,
            None => Vec::new(),
        };

        for entry in &config.entries {
            let id = ChannelId::from(channels.len() as u64 + 1);
            let mut channel = Channel::new(id, &entry.name, &entry.url);
            if let Some(group) = &entry.group {
                channel.group.clone_from(group);
            }
            channels.push(channel);
        }

        Ok(Self::from_channels(channels))
    }

    /// Insert or replace a channel, returning the previous record.
    pub fn insert(&self, channel: Channel) -> Option<Channel> {
        self.channels.write().insert(channel.id.clone(), channel)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.channels.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.channels.read().is_empty()
    }
}

#[async_trait]
impl ChannelRepository for InMemoryChannelRepository {
    async fn lookup(&self, id: &ChannelId) -> Result<Channel> {
        self.channels
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("channel {id}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChannelEntry;

    #[tokio::test]
    async fn test_lookup_known_and_unknown() {
        let repo = InMemoryChannelRepository::from_channels([Channel::new(
            ChannelId::from(7),
            "Seven",
            "http://src/7",
        )]);

        let channel = repo.lookup(&ChannelId::from(7)).await.unwrap();
        assert_eq!(channel.url, "http://src/7");

        let err = repo.lookup(&ChannelId::from(8)).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_from_config_numbers_playlist_then_entries() {
        let dir = tempfile::tempdir().unwrap();
        let playlist = dir.path().join("list.m3u");
        std::fs::write(&playlist, "#EXTM3U\n#EXTINF:-1,One\nhttp://src/1\n").unwrap();

        let config = ChannelsConfig {
            playlist_path: Some(playlist),
            entries: vec![ChannelEntry {
                name: "Two".to_string(),
                url: "http://src/2".to_string(),
                group: Some("News".to_string()),
            }],
        };

        let repo = InMemoryChannelRepository::from_config(&config).await.unwrap();
        assert_eq!(repo.len(), 2);

        let two = repo.lookup(&ChannelId::from(2)).await.unwrap();
        assert_eq!(two.name, "Two");
        assert_eq!(two.group, "News");
    }

    #[tokio::test]
    async fn test_from_config_missing_playlist_fails() {
        let config = ChannelsConfig {
            playlist_path: Some("/definitely/not/here.m3u".into()),
            entries: Vec::new(),
        };

        assert!(matches!(
            InMemoryChannelRepository::from_config(&config).await,
            Err(Error::Io(_))
        ));
    }
}
