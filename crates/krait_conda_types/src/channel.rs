//! Channels: remote package indexes identified by a URL.

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::Platform;

/// The default server that hosts named channels.
pub const DEFAULT_CHANNEL_ALIAS: &str = "https://conda.anaconda.org";

/// A conda channel: a base URL under which per-platform subdirectories hold
/// `repodata.json` files and package archives.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct Channel {
    /// The short name of the channel (e.g. `conda-forge`), used in match
    /// specs and display output.
    pub name: String,

    /// The base URL of the channel, without a trailing platform directory.
    pub base_url: Url,
}

/// An error that occurred while interpreting a channel string.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum ParseChannelError {
    /// The channel string is neither a valid URL nor a valid name.
    #[error("invalid channel '{0}'")]
    InvalidChannel(
        /// The offending channel string.
        String,
    ),
}

impl Channel {
    /// Interprets a string as either a full channel URL or a channel name
    /// below the default alias.
    pub fn from_str_or_url(channel: &str) -> Result<Channel, ParseChannelError> {
        if channel.contains("://") {
            let url = Url::parse(channel)
                .map_err(|_| ParseChannelError::InvalidChannel(channel.to_string()))?;
            Ok(Channel::from_url(url))
        } else {
            Channel::from_name(channel)
        }
    }

    /// Constructs a channel from a full base URL. The name is derived from the
    /// last path component.
    pub fn from_url(base_url: Url) -> Channel {
        let name = base_url
            .path_segments()
            .into_iter()
            .flatten()
            .filter(|segment| !segment.is_empty())
            .next_back()
            .unwrap_or("<unknown>")
            .to_string();
        Channel { name, base_url }
    }

    /// Constructs a channel from a bare name, resolving against the default
    /// channel alias.
    pub fn from_name(name: &str) -> Result<Channel, ParseChannelError> {
        let name = name.trim_matches('/');
        let base_url = Url::parse(&format!("{DEFAULT_CHANNEL_ALIAS}/{name}"))
            .map_err(|_| ParseChannelError::InvalidChannel(name.to_string()))?;
        Ok(Channel {
            name: name.to_string(),
            base_url,
        })
    }

    /// Returns the URL of the subdirectory for the given platform.
    pub fn platform_url(&self, platform: Platform) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(platform.as_str());
        }
        url
    }
}

impl Display for Channel {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_from_name() {
        let channel = Channel::from_name("conda-forge").unwrap();
        assert_eq!(channel.name, "conda-forge");
        assert_eq!(
            channel.base_url.as_str(),
            "https://conda.anaconda.org/conda-forge"
        );
    }

    #[test]
    fn test_from_url() {
        let channel =
            Channel::from_str_or_url("https://repo.example.com/custom-channel").unwrap();
        assert_eq!(channel.name, "custom-channel");
    }

    #[test]
    fn test_platform_url() {
        let channel = Channel::from_name("conda-forge").unwrap();
        assert_eq!(
            channel.platform_url(Platform::Linux64).as_str(),
            "https://conda.anaconda.org/conda-forge/linux-64"
        );
    }
}
