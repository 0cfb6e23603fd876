use tracing::{debug, info, warn};

use crate::config::{PlaybackConfig, RetryBackoff};

use super::error::{BackendError, BackendErrorKind, PlaybackFailure, Recovery};
use super::media::{BackendFactory, LoadRequest, MediaSink, StreamBackend};
use super::session::{MediaState, PlaybackSession, RetryCounters};
use super::{BackendEvent, LoadToken, Source};

#[derive(Debug, Clone)]
pub(crate) struct RecoveryPolicy {
    pub(crate) network_retry_budget: u32,
    pub(crate) backoff: RetryBackoff,
    pub(crate) media_recovery_attempts: u32,
}

impl RecoveryPolicy {
    pub(crate) fn from_config(config: &PlaybackConfig) -> Self {
        Self {
            network_retry_budget: config.network_retry_budget,
            backoff: config.retry_backoff.clone(),
            media_recovery_attempts: config.media_recovery_attempts,
        }
    }

    pub(crate) fn classify(&self, error: &BackendError, retries: &mut RetryCounters) -> Recovery {
        match error.kind {
            BackendErrorKind::Network if retries.network_retries < self.network_retry_budget => {
                retries.network_retries += 1;
                let attempt = retries.network_retries;
                Recovery::RetrySame {
                    attempt,
                    delay: self.backoff.delay(attempt),
                }
            }
            BackendErrorKind::Media if retries.media_recoveries < self.media_recovery_attempts => {
                retries.media_recoveries += 1;
                Recovery::RecoverMedia
            }
            _ => Recovery::Failover,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum EngineStep {
    Nothing,
    Ready,
    Updated,
    SeekComplete,
    Ended,
    Failure(PlaybackFailure),
}

pub(crate) struct Engine {
    sink: Box<dyn MediaSink>,
    backends: Box<dyn BackendFactory>,
    backend: Option<Box<dyn StreamBackend>>,
    request: Option<LoadRequest>,
    pending_seek: Option<f64>,
    policy: RecoveryPolicy,
    autoplay: bool,
}

impl Engine {
    pub(crate) fn new(
        sink: Box<dyn MediaSink>,
        backends: Box<dyn BackendFactory>,
        policy: RecoveryPolicy,
        autoplay: bool,
    ) -> Self {
        Self {
            sink,
            backends,
            backend: None,
            request: None,
            pending_seek: None,
            policy,
            autoplay,
        }
    }

    pub(crate) fn sink_mut(&mut self) -> &mut dyn MediaSink {
        self.sink.as_mut()
    }

    pub(crate) fn load(
        &mut self,
        session: &mut PlaybackSession,
        index: usize,
        source: &Source,
        referer: Option<&str>,
        resume_at: f64,
        token: LoadToken,
    ) {
        self.detach();
        self.sink.begin(token);
        session.begin_load(token, index, resume_at);
        self.pending_seek = (resume_at > 0.0).then_some(resume_at);

        let request = LoadRequest {
            url: source.url.clone(),
            referer: referer.map(str::to_string),
            token,
        };
        if source.is_segmented {
            let mut backend = self.backends.create();
            backend.attach(&request, self.sink.as_mut());
            self.backend = Some(backend);
        } else {
            self.sink.open_direct(&request);
        }
        info!(
            %token,
            server = %source.server,
            segmented = source.is_segmented,
            resume_at,
            "loading source"
        );
        self.request = Some(request);
    }

    pub(crate) fn detach(&mut self) {
        if let Some(mut backend) = self.backend.take() {
            backend.destroy();
            debug!("stream backend destroyed");
        }
        self.request = None;
    }

    pub(crate) fn teardown(&mut self, session: &mut PlaybackSession) {
        self.detach();
        self.pending_seek = None;
        self.sink.clear();
        session.media_state = MediaState::Idle;
    }

    pub(crate) fn handle(&mut self, session: &mut PlaybackSession, event: BackendEvent) -> EngineStep {
        if matches!(session.media_state, MediaState::Idle | MediaState::Error { .. }) {
            debug!(?event, state = %session.media_state, "ignoring backend event");
            return EngineStep::Nothing;
        }

        match event {
            BackendEvent::ManifestParsed | BackendEvent::MetadataLoaded => {
                self.refresh_clock(session);
                self.apply_initial_seek(session);
                if session.media_state == MediaState::Loading {
                    self.become_ready(session);
                    return EngineStep::Ready;
                }
                EngineStep::Updated
            }
            BackendEvent::TimeUpdate => {
                self.refresh_clock(session);
                self.apply_initial_seek(session);
                EngineStep::Updated
            }
            BackendEvent::Waiting => {
                if session.media_state == MediaState::Playing {
                    session.media_state = MediaState::Buffering;
                }
                EngineStep::Nothing
            }
            BackendEvent::Playing => {
                if matches!(
                    session.media_state,
                    MediaState::Loading
                        | MediaState::Ready
                        | MediaState::Paused
                        | MediaState::Buffering
                ) {
                    session.media_state = MediaState::Playing;
                }
                EngineStep::Nothing
            }
            BackendEvent::Paused => {
                if matches!(
                    session.media_state,
                    MediaState::Playing | MediaState::Buffering
                ) {
                    session.media_state = MediaState::Paused;
                }
                EngineStep::Nothing
            }
            BackendEvent::SeekComplete => {
                if !session.media_state.is_controllable() {
                    return EngineStep::Nothing;
                }
                self.refresh_clock(session);
                EngineStep::SeekComplete
            }
            BackendEvent::Ended => {
                if !matches!(
                    session.media_state,
                    MediaState::Playing | MediaState::Buffering | MediaState::Paused
                ) {
                    return EngineStep::Nothing;
                }
                self.refresh_clock(session);
                session.media_state = MediaState::Ended;
                EngineStep::Ended
            }
            BackendEvent::Error(error) => self.on_error(session, error),
        }
    }

    pub(crate) fn retry_load(&mut self, session: &PlaybackSession) {
        if !session.media_state.accepts_errors() {
            return;
        }
        if let Some(backend) = self.backend.as_mut() {
            backend.start_load();
        } else if let Some(request) = self.request.as_ref() {
            self.sink.open_direct(request);
        }
        debug!(token = %session.token, "load re-issued");
    }

    pub(crate) fn play(&mut self, session: &mut PlaybackSession) -> bool {
        if !session.media_state.is_controllable() {
            return false;
        }
        if !self.sink.play() {
            return false;
        }
        if session.media_state != MediaState::Buffering {
            session.media_state = MediaState::Playing;
        }
        true
    }

    pub(crate) fn pause(&mut self, session: &mut PlaybackSession) -> bool {
        if !session.media_state.is_controllable() {
            return false;
        }
        self.sink.pause();
        session.media_state = MediaState::Paused;
        true
    }

    pub(crate) fn seek(&mut self, session: &mut PlaybackSession, seconds: f64) -> Option<f64> {
        let target = clamp_position(seconds, session.duration_seconds);
        if session.media_state == MediaState::Loading {
            self.pending_seek = Some(target);
            return Some(target);
        }
        if !session.media_state.is_controllable() {
            return None;
        }
        self.sink.seek(target);
        session.current_time_seconds = target;
        Some(target)
    }

    fn become_ready(&mut self, session: &mut PlaybackSession) {
        session.media_state = MediaState::Ready;
        if self.autoplay && self.sink.play() {
            session.media_state = MediaState::Playing;
        } else {
            session.media_state = MediaState::Paused;
        }
    }

    /// Pulls time and duration from the sink's live clock.
    pub(crate) fn refresh_clock(&mut self, session: &mut PlaybackSession) {
        session.duration_seconds = self
            .sink
            .duration()
            .filter(|duration| duration.is_finite() && *duration > 0.0);
        if self.pending_seek.is_none() {
            session.current_time_seconds = self.sink.current_time();
        }
    }

    fn apply_initial_seek(&mut self, session: &mut PlaybackSession) {
        let Some(duration) = session.duration_seconds else {
            return;
        };
        let Some(target) = self.pending_seek.take() else {
            return;
        };
        let target = clamp_position(target, Some(duration));
        self.sink.seek(target);
        session.current_time_seconds = target;
        debug!(target, duration, "initial seek applied");
    }

    fn on_error(&mut self, session: &mut PlaybackSession, error: BackendError) -> EngineStep {
        if !error.fatal {
            debug!(%error, "non-fatal backend error");
            return EngineStep::Nothing;
        }
        if !session.media_state.accepts_errors() {
            debug!(%error, state = %session.media_state, "error after playback settled");
            return EngineStep::Nothing;
        }

        let recovery = self.policy.classify(&error, &mut session.retries);
        match recovery {
            Recovery::RetrySame { attempt, delay } => {
                info!(%error, attempt, ?delay, "retrying source");
            }
            Recovery::RecoverMedia => {
                info!(%error, "attempting media recovery");
                self.recover_media(session);
            }
            Recovery::Failover => {
                warn!(%error, token = %session.token, "source failed");
                session.media_state = MediaState::Error {
                    reason: error.detail.clone(),
                };
                self.detach();
            }
        }

        EngineStep::Failure(PlaybackFailure {
            kind: error.kind,
            recovery,
            reason: error.to_string(),
        })
    }

    fn recover_media(&mut self, session: &PlaybackSession) {
        if let Some(backend) = self.backend.as_mut() {
            backend.recover_media_error();
            return;
        }
        let Some(request) = self.request.clone() else {
            return;
        };
        let position = session.resume_position();
        if self.pending_seek.is_none() && position > 0.0 {
            self.pending_seek = Some(position);
        }
        self.sink.open_direct(&request);
    }
}

pub(crate) fn clamp_position(seconds: f64, duration: Option<f64>) -> f64 {
    let seconds = if seconds.is_finite() { seconds } else { 0.0 };
    match duration {
        Some(duration) => seconds.clamp(0.0, duration),
        None => seconds.max(0.0),
    }
}
