// Config file -> channel repository, the way the server boots.

use iseetv_core::{ChannelId, ChannelRepository, Config, Error, InMemoryChannelRepository};

#[tokio::test]
async fn test_channels_from_yaml_config() {
    let dir = tempfile::tempdir().unwrap();
    let playlist = dir.path().join("channels.m3u");
    std::fs::write(
        &playlist,
        "#EXTM3U\n\
         #EXTINF:-1 tvg-id=\"news.1\" group-title=\"News\",News One\n\
         http://src/news1\n\
         #EXTINF:-1,Movies\n\
         http://src/movies\n",
    )
    .unwrap();

    let config_path = dir.path().join("config.yaml");
    std::fs::write(
        &config_path,
        format!(
            "channels:\n  playlist_path: {}\n  entries:\n    - name: Extra\n      url: http://src/extra\n",
            playlist.display()
        ),
    )
    .unwrap();

    let config = Config::from_file(config_path.to_str().unwrap()).unwrap();
    assert!(config.validate().is_ok());

    let repo = InMemoryChannelRepository::from_config(&config.channels)
        .await
        .unwrap();
    assert_eq!(repo.len(), 3);

    let news = repo.lookup(&ChannelId::from(1)).await.unwrap();
    assert_eq!(news.name, "News One");
    assert_eq!(news.group, "News");
    assert_eq!(news.tvg_id.as_deref(), Some("news.1"));

    let extra = repo.lookup(&ChannelId::from(3)).await.unwrap();
    assert_eq!(extra.url, "http://src/extra");
    assert_eq!(extra.group, "Uncategorized");

    assert!(matches!(
        repo.lookup(&ChannelId::from(4)).await,
        Err(Error::NotFound(_))
    ));
}
