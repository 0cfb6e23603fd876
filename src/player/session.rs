use std::collections::HashSet;
use std::fmt;

use super::{LoadToken, SourceKey};

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum MediaState {
    Idle,
    Loading,
    Ready,
    Playing,
    Buffering,
    Paused,
    Ended,
    Error { reason: String },
}

impl MediaState {
    pub(crate) fn is_controllable(&self) -> bool {
        matches!(
            self,
            MediaState::Ready | MediaState::Playing | MediaState::Buffering | MediaState::Paused
        )
    }

    pub(crate) fn accepts_errors(&self) -> bool {
        matches!(self, MediaState::Loading) || self.is_controllable()
    }

    pub(crate) fn label(&self) -> &'static str {
        match self {
            MediaState::Idle => "idle",
            MediaState::Loading => "loading",
            MediaState::Ready => "ready",
            MediaState::Playing => "playing",
            MediaState::Buffering => "buffering",
            MediaState::Paused => "paused",
            MediaState::Ended => "ended",
            MediaState::Error { .. } => "error",
        }
    }
}

impl fmt::Display for MediaState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MediaState::Error { reason } => write!(f, "error: {reason}"),
            other => f.write_str(other.label()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct RetryCounters {
    pub(crate) network_retries: u32,
    pub(crate) media_recoveries: u32,
}

#[derive(Debug, Clone)]
pub(crate) struct PlaybackSession {
    pub(crate) token: LoadToken,
    pub(crate) current_source: Option<usize>,
    pub(crate) media_state: MediaState,
    pub(crate) current_time_seconds: f64,
    pub(crate) duration_seconds: Option<f64>,
    pub(crate) failed_sources: HashSet<SourceKey>,
    pub(crate) last_checkpoint_seconds: f64,
    pub(crate) retries: RetryCounters,
    pub(crate) attempts: usize,
}

impl Default for PlaybackSession {
    fn default() -> Self {
        Self {
            token: LoadToken::default(),
            current_source: None,
            media_state: MediaState::Idle,
            current_time_seconds: 0.0,
            duration_seconds: None,
            failed_sources: HashSet::new(),
            last_checkpoint_seconds: 0.0,
            retries: RetryCounters::default(),
            attempts: 0,
        }
    }
}

impl PlaybackSession {
    pub(crate) fn begin_load(&mut self, token: LoadToken, source: usize, resume_at: f64) {
        self.token = token;
        self.current_source = Some(source);
        self.media_state = MediaState::Loading;
        self.current_time_seconds = resume_at;
        self.duration_seconds = None;
        self.last_checkpoint_seconds = resume_at;
        self.retries = RetryCounters::default();
        self.attempts += 1;
    }

    /// Position reported until a load takes over.
    pub(crate) fn seed_position(&mut self, resume_at: f64) {
        let resume_at = if resume_at.is_finite() { resume_at.max(0.0) } else { 0.0 };
        self.current_time_seconds = resume_at;
        self.last_checkpoint_seconds = resume_at;
        self.duration_seconds = None;
    }

    pub(crate) fn clear_failures(&mut self) {
        self.failed_sources.clear();
        self.attempts = 0;
    }

    pub(crate) fn is_current(&self, token: LoadToken) -> bool {
        self.token == token
    }

    pub(crate) fn resume_position(&self) -> f64 {
        if self.current_time_seconds.is_finite() && self.current_time_seconds > 0.0 {
            self.current_time_seconds
        } else {
            0.0
        }
    }
}
