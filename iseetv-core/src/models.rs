use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

const MAX_CHANNEL_ID_LEN: usize = 64;

/// Channel identifier.
///
/// Channel ids double as working-directory names, so only ASCII
/// alphanumerics, `-` and `_` are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ChannelId(String);

impl ChannelId {
    pub fn parse(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(Error::InvalidInput("channel id must not be empty".to_string()));
        }
        if raw.len() > MAX_CHANNEL_ID_LEN {
            return Err(Error::InvalidInput(format!(
                "channel id longer than {MAX_CHANNEL_ID_LEN} characters"
            )));
        }
        if !raw
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
        {
            return Err(Error::InvalidInput(format!("invalid channel id: {raw}")));
        }
        Ok(Self(raw))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ChannelId {
    fn from(n: u64) -> Self {
        Self(n.to_string())
    }
}

impl TryFrom<String> for ChannelId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(value)
    }
}

impl From<ChannelId> for String {
    fn from(id: ChannelId) -> Self {
        id.0
    }
}

impl std::str::FromStr for ChannelId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// A live channel from an IPTV source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub id: ChannelId,
    pub name: String,
    /// Origin stream URL
    pub url: String,
    pub group: String,
    pub logo: Option<String>,
    pub tvg_id: Option<String>,
}

impl Channel {
    pub fn new(id: ChannelId, name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            url: url.into(),
            group: crate::playlist::DEFAULT_GROUP.to_string(),
            logo: None,
            tvg_id: None,
        }
    }
}
