mod checkpoint;
mod controller;
mod engine;
mod error;
mod failover;
mod media;
mod runtime;
mod session;
mod skip;
mod sources;
mod subtitles;


use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub(crate) use controller::{Controller, Services};
pub(crate) use error::{BackendError, BackendErrorKind};
pub(crate) use media::{BackendFactory, LoadRequest, MediaSink, StreamBackend, TextTrackSpec};
pub(crate) use runtime::ThreadExecutor;
pub(crate) use session::MediaState;
pub(crate) use skip::{AniskipClient, SkipTimesProvider};
pub(crate) use sources::normalize_sources;
pub(crate) use subtitles::{HttpSubtitleFetcher, SubtitleCatalog, SubtitlePreference};

use crate::http::FetchError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub(crate) enum Category {
    Sub,
    Dub,
}

impl Category {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Category::Sub => "sub",
            Category::Dub => "dub",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Generation counter handed to every load. Asynchronous completions carry the
/// token they were issued under and are dropped once it is superseded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub(crate) struct LoadToken(u64);

impl LoadToken {
    pub(crate) fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for LoadToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub(crate) struct EpisodeKey {
    pub(crate) show_id: String,
    pub(crate) episode: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SkipLookup {
    pub(crate) content_id: String,
    pub(crate) episode: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub(crate) struct RawCandidate {
    #[serde(default)]
    pub(crate) server: String,
    #[serde(default)]
    pub(crate) url: Option<String>,
    #[serde(default)]
    pub(crate) language: Option<String>,
    #[serde(default)]
    pub(crate) language_code: Option<String>,
    #[serde(default)]
    pub(crate) quality: Option<String>,
    #[serde(default)]
    pub(crate) segmented: bool,
    #[serde(default)]
    pub(crate) embed_only: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub(crate) struct SubtitleCandidate {
    pub(crate) language_code: String,
    #[serde(alias = "label")]
    pub(crate) display_label: String,
    #[serde(alias = "url")]
    pub(crate) source_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct Variant {
    pub(crate) category: Category,
    #[serde(default)]
    pub(crate) candidates: Vec<RawCandidate>,
    #[serde(default)]
    pub(crate) subtitles: Vec<SubtitleCandidate>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct EpisodeStreams {
    pub(crate) show_id: String,
    pub(crate) episode: String,
    #[serde(default)]
    pub(crate) skip_id: Option<String>,
    #[serde(default)]
    pub(crate) referer: Option<String>,
    #[serde(default)]
    pub(crate) variants: Vec<Variant>,
}

impl EpisodeStreams {
    pub(crate) fn key(&self) -> EpisodeKey {
        EpisodeKey {
            show_id: self.show_id.clone(),
            episode: self.episode.clone(),
        }
    }

    pub(crate) fn skip_lookup(&self) -> Option<SkipLookup> {
        let content_id = self.skip_id.as_deref()?.trim();
        if content_id.is_empty() {
            return None;
        }
        Some(SkipLookup {
            content_id: content_id.to_string(),
            episode: self.episode.clone(),
        })
    }

    pub(crate) fn subtitles_for(&self, category: Category) -> Vec<SubtitleCandidate> {
        self.variants
            .iter()
            .filter(|variant| variant.category == category)
            .flat_map(|variant| variant.subtitles.iter().cloned())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct SourceKey {
    pub(crate) url: String,
    pub(crate) language_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Source {
    pub(crate) server: String,
    pub(crate) url: String,
    pub(crate) is_segmented: bool,
    pub(crate) quality_label: Option<String>,
    pub(crate) language_label: Option<String>,
    pub(crate) language_code: Option<String>,
    pub(crate) is_embed_only: bool,
}

impl Source {
    pub(crate) fn key(&self) -> SourceKey {
        SourceKey {
            url: self.url.clone(),
            language_code: self.language_code.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub(crate) enum SkipKind {
    Intro,
    Outro,
    MixedIntro,
    MixedOutro,
    Recap,
}

impl SkipKind {
    pub(crate) fn from_api(raw: &str) -> Option<Self> {
        match raw.trim() {
            "op" => Some(SkipKind::Intro),
            "ed" => Some(SkipKind::Outro),
            "mixed-op" => Some(SkipKind::MixedIntro),
            "mixed-ed" => Some(SkipKind::MixedOutro),
            "recap" => Some(SkipKind::Recap),
            _ => None,
        }
    }

    pub(crate) fn label(self) -> &'static str {
        match self {
            SkipKind::Intro => "intro",
            SkipKind::Outro => "outro",
            SkipKind::MixedIntro => "mixed intro",
            SkipKind::MixedOutro => "mixed outro",
            SkipKind::Recap => "recap",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SkipInterval {
    pub(crate) kind: SkipKind,
    pub(crate) start_seconds: f64,
    pub(crate) end_seconds: f64,
}

impl SkipInterval {
    pub(crate) fn contains(&self, t: f64) -> bool {
        self.start_seconds <= t && t < self.end_seconds
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct Checkpoint {
    pub(crate) position_seconds: f64,
    pub(crate) duration_seconds: Option<f64>,
    pub(crate) completed: bool,
    pub(crate) timestamp: DateTime<Utc>,
}

#[derive(Debug)]
pub(crate) enum PlayerEvent {
    Backend {
        token: LoadToken,
        event: BackendEvent,
    },
    RetryLoad {
        token: LoadToken,
    },
    SubtitleCandidates {
        token: LoadToken,
        result: Result<Vec<SubtitleCandidate>, FetchError>,
    },
    SubtitleFetched {
        token: LoadToken,
        index: usize,
        result: Result<String, FetchError>,
    },
    ReconcileSubtitles {
        token: LoadToken,
        attempt: u32,
    },
    SkipTimes {
        token: LoadToken,
        result: Result<Vec<SkipInterval>, FetchError>,
    },
    CheckpointTick {
        token: LoadToken,
    },
}

impl PlayerEvent {
    pub(crate) fn token(&self) -> LoadToken {
        match self {
            PlayerEvent::Backend { token, .. }
            | PlayerEvent::RetryLoad { token }
            | PlayerEvent::SubtitleCandidates { token, .. }
            | PlayerEvent::SubtitleFetched { token, .. }
            | PlayerEvent::ReconcileSubtitles { token, .. }
            | PlayerEvent::SkipTimes { token, .. }
            | PlayerEvent::CheckpointTick { token } => *token,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum BackendEvent {
    ManifestParsed,
    MetadataLoaded,
    TimeUpdate,
    Waiting,
    Playing,
    Paused,
    SeekComplete,
    Ended,
    Error(BackendError),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SessionEvent {
    State(MediaState),
    ServerChanged {
        index: usize,
        server: String,
    },
    SwitchRequested {
        from: usize,
        reason: String,
    },
    Exhausted {
        attempted: usize,
    },
    NoPlayableSource,
    EmbedFallback {
        index: usize,
        server: String,
        url: String,
    },
    SkipAvailable(Option<SkipInterval>),
    SubtitlesReady(Vec<String>),
    CheckpointWritten(Checkpoint),
}
