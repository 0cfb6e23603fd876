use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use crate::http::FetchError;
use crate::player::{Category, EpisodeKey, EpisodeStreams, SubtitleCandidate, SubtitleCatalog};

pub(crate) fn load_episode(path: &Path) -> Result<EpisodeStreams> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read episode file {}", path.display()))?;
    parse_episode(&raw).with_context(|| format!("failed to parse episode file {}", path.display()))
}

pub(crate) fn parse_episode(raw: &str) -> Result<EpisodeStreams> {
    let streams: EpisodeStreams = serde_json::from_str(raw)?;
    anyhow::ensure!(!streams.show_id.trim().is_empty(), "episode file has an empty show_id");
    anyhow::ensure!(!streams.episode.trim().is_empty(), "episode file has an empty episode");
    Ok(streams)
}

#[derive(Debug, Clone)]
pub(crate) struct ManifestCatalog {
    streams: EpisodeStreams,
}

impl ManifestCatalog {
    pub(crate) fn new(streams: EpisodeStreams) -> Self {
        Self { streams }
    }
}

impl SubtitleCatalog for ManifestCatalog {
    fn subtitles_for(
        &self,
        key: &EpisodeKey,
        category: Category,
    ) -> Result<Vec<SubtitleCandidate>, FetchError> {
        if *key != self.streams.key() {
            return Err(FetchError::Malformed(format!(
                "episode {}/{} is not in this catalog",
                key.show_id, key.episode
            )));
        }
        Ok(self.streams.subtitles_for(category))
    }
}
