use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::mpsc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::config::PlaybackConfig;
use crate::store::ProgressStore;

use super::checkpoint::CheckpointWriter;
use super::engine::{Engine, EngineStep, RecoveryPolicy};
use super::error::{PlaybackFailure, Recovery, SessionError};
use super::failover::{self, FailoverDecision};
use super::media::{BackendFactory, MediaSink};
use super::runtime::Executor;
use super::session::{MediaState, PlaybackSession};
use super::skip::{SkipService, SkipTimesProvider};
use super::subtitles::{
    SubtitleCatalog, SubtitleFetcher, SubtitleManager, SubtitlePreference, SubtitleTrack,
    SubtitleWork,
};
use super::{
    BackendEvent, Category, EpisodeStreams, PlayerEvent, SessionEvent, SkipInterval, Source,
    normalize_sources,
};

#[derive(Clone)]
pub(crate) struct Services {
    pub(crate) subtitles: Arc<dyn SubtitleFetcher>,
    pub(crate) catalog: Arc<dyn SubtitleCatalog>,
    pub(crate) skip_times: Arc<dyn SkipTimesProvider>,
}

struct OpenEpisode {
    streams: EpisodeStreams,
    category: Category,
}

pub(crate) struct Controller {
    engine: Engine,
    session: PlaybackSession,
    sources: Vec<Source>,
    episode: Option<OpenEpisode>,
    subtitles: SubtitleManager,
    skip: SkipService,
    checkpoints: CheckpointWriter,
    executor: Box<dyn Executor>,
    services: Services,
    dedupe_languages: bool,
    reconcile_attempts: u32,
    reconcile_delay: Duration,
    reconcile_scheduled: bool,
    reported_state: MediaState,
    reported_skip: Option<SkipInterval>,
    events: VecDeque<SessionEvent>,
    torn_down: bool,
}

impl Controller {
    pub(crate) fn new(
        config: &PlaybackConfig,
        sink: Box<dyn MediaSink>,
        backends: Box<dyn BackendFactory>,
        store: Box<dyn ProgressStore>,
        executor: Box<dyn Executor>,
        services: Services,
        preference: SubtitlePreference,
    ) -> Self {
        Self {
            engine: Engine::new(
                sink,
                backends,
                RecoveryPolicy::from_config(config),
                config.autoplay,
            ),
            session: PlaybackSession::default(),
            sources: Vec::new(),
            episode: None,
            subtitles: SubtitleManager::new(preference),
            skip: SkipService::new(config.auto_skip.clone()),
            checkpoints: CheckpointWriter::new(
                store,
                config.checkpoint_min_interval_secs,
                config.checkpoint_tick(),
            ),
            executor,
            services,
            dedupe_languages: config.dedupe_languages,
            reconcile_attempts: config.subtitle_reconcile_attempts,
            reconcile_delay: config.reconcile_delay(),
            reconcile_scheduled: false,
            reported_state: MediaState::Idle,
            reported_skip: None,
            events: VecDeque::new(),
            torn_down: false,
        }
    }

    pub(crate) fn session(&self) -> &PlaybackSession {
        &self.session
    }

    pub(crate) fn sources(&self) -> &[Source] {
        &self.sources
    }

    pub(crate) fn subtitle_tracks(&self) -> &[SubtitleTrack] {
        self.subtitles.tracks()
    }

    #[cfg(test)]
    pub(crate) fn active_skip(&self) -> Option<&SkipInterval> {
        self.skip.active()
    }

    pub(crate) fn skip_intervals(&self) -> &[SkipInterval] {
        self.skip.intervals()
    }

    #[cfg(test)]
    pub(crate) fn has_checkpoint_timer(&self) -> bool {
        self.checkpoints.has_timer()
    }

    pub(crate) fn has_pending_subtitles(&self) -> bool {
        self.subtitles.has_in_flight()
    }

    pub(crate) fn take_events(&mut self) -> Vec<SessionEvent> {
        self.events.drain(..).collect()
    }

    pub(crate) fn open_episode(
        &mut self,
        streams: EpisodeStreams,
        category: Category,
        resume_at: f64,
    ) -> Result<(), SessionError> {
        self.ensure_live()?;
        self.session.clear_failures();
        self.sources = normalize_sources(&streams.variants, category, self.dedupe_languages);
        self.checkpoints.set_episode(streams.key());
        self.skip.reset(streams.skip_lookup());
        self.subtitles.open(streams.subtitles_for(category), category);
        info!(
            show = %streams.show_id,
            episode = %streams.episode,
            %category,
            sources = self.sources.len(),
            "episode opened"
        );
        self.episode = Some(OpenEpisode { streams, category });
        self.start_first(resume_at);
        self.sync_state();
        Ok(())
    }

    pub(crate) fn set_category(&mut self, category: Category) -> Result<(), SessionError> {
        self.ensure_live()?;
        let Some(episode) = self.episode.as_mut() else {
            return Err(SessionError::NoEpisode);
        };
        if episode.category == category {
            return Ok(());
        }
        episode.category = category;
        let sources = normalize_sources(&episode.streams.variants, category, self.dedupe_languages);
        let subtitles = episode.streams.subtitles_for(category);

        self.refresh_position();
        let resume_at = self.session.resume_position();
        self.session.clear_failures();
        self.sources = sources;
        self.subtitles.open(subtitles, category);
        info!(%category, sources = self.sources.len(), resume_at, "category changed");
        self.start_first(resume_at);
        self.sync_state();
        Ok(())
    }

    pub(crate) fn switch_server(&mut self, index: usize) -> Result<(), SessionError> {
        self.ensure_live()?;
        if self.episode.is_none() {
            return Err(SessionError::NoEpisode);
        }
        let Some(source) = self.sources.get(index) else {
            return Err(SessionError::UnknownSource {
                index,
                available: self.sources.len(),
            });
        };
        if self.session.failed_sources.contains(&source.key()) {
            return Err(SessionError::SourceFailed {
                server: source.server.clone(),
            });
        }
        if self.session.current_source == Some(index) && self.session.media_state.is_controllable() {
            return Ok(());
        }
        self.refresh_position();
        let resume_at = self.session.resume_position();
        self.load_source(index, resume_at);
        self.sync_state();
        Ok(())
    }

    pub(crate) fn retry_all(&mut self) -> Result<(), SessionError> {
        self.ensure_live()?;
        if self.episode.is_none() {
            return Err(SessionError::NoEpisode);
        }
        let resume_at = self.session.resume_position();
        self.session.clear_failures();
        info!(resume_at, "retrying every source");
        self.start_first(resume_at);
        self.sync_state();
        Ok(())
    }

    pub(crate) fn play(&mut self) -> bool {
        if self.torn_down {
            return false;
        }
        let played = self.engine.play(&mut self.session);
        self.sync_state();
        played
    }

    pub(crate) fn pause(&mut self) -> bool {
        if self.torn_down {
            return false;
        }
        let paused = self.engine.pause(&mut self.session);
        self.sync_state();
        paused
    }

    pub(crate) fn seek(&mut self, seconds: f64) -> Option<f64> {
        if self.torn_down {
            return None;
        }
        let target = self.engine.seek(&mut self.session, seconds)?;
        self.update_skip();
        Some(target)
    }

    pub(crate) fn skip(&mut self) -> Option<f64> {
        if self.torn_down {
            return None;
        }
        let target = self.skip.skip()?;
        info!(target, "skipping interval");
        self.engine.seek(&mut self.session, target);
        self.report_skip();
        Some(target)
    }

    pub(crate) fn set_subtitle_preference(&mut self, preference: SubtitlePreference) {
        self.subtitles.set_preference(preference);
        if !self.torn_down {
            self.reconcile_subtitles(0);
        }
    }

    pub(crate) fn handle(&mut self, event: PlayerEvent) {
        let token = event.token();
        if self.torn_down || !self.session.is_current(token) {
            debug!(%token, current = %self.session.token, "discarding stale event");
            return;
        }

        match event {
            PlayerEvent::Backend { event, .. } => self.on_backend(event),
            PlayerEvent::RetryLoad { .. } => self.engine.retry_load(&self.session),
            PlayerEvent::SubtitleCandidates { result, .. } => {
                let work = self.subtitles.on_candidates(result);
                self.dispatch_subtitle_work(work);
            }
            PlayerEvent::SubtitleFetched { index, result, .. } => {
                if self
                    .subtitles
                    .on_fetched(index, result, self.engine.sink_mut())
                {
                    self.events
                        .push_back(SessionEvent::SubtitlesReady(self.subtitles.ready_languages()));
                    self.reconcile_subtitles(0);
                }
            }
            PlayerEvent::ReconcileSubtitles { attempt, .. } => {
                self.reconcile_scheduled = false;
                self.reconcile_subtitles(attempt);
            }
            PlayerEvent::SkipTimes { result, .. } => {
                self.skip.on_loaded(result);
                self.update_skip();
            }
            PlayerEvent::CheckpointTick { .. } => {
                if let Some(checkpoint) = self.checkpoints.on_tick(&mut self.session) {
                    self.events.push_back(SessionEvent::CheckpointWritten(checkpoint));
                }
            }
        }
        self.sync_state();
    }

    pub(crate) fn run_until<F>(
        &mut self,
        rx: &mpsc::Receiver<PlayerEvent>,
        idle_timeout: Duration,
        mut done: F,
    ) -> Vec<SessionEvent>
    where
        F: FnMut(&SessionEvent) -> bool,
    {
        let mut log = self.take_events();
        if log.iter().any(&mut done) {
            return log;
        }
        while let Ok(event) = rx.recv_timeout(idle_timeout) {
            self.handle(event);
            let emitted = self.take_events();
            let finished = emitted.iter().any(&mut done);
            log.extend(emitted);
            if finished {
                break;
            }
        }
        log
    }

    /// Final checkpoint, then backend, timers and subtitle resources are
    /// released in that order. Later completions are ignored.
    pub(crate) fn teardown(&mut self) {
        if self.torn_down {
            return;
        }
        self.refresh_position();
        if let Some(checkpoint) = self.checkpoints.on_teardown(&mut self.session) {
            self.events.push_back(SessionEvent::CheckpointWritten(checkpoint));
        }
        self.engine.teardown(&mut self.session);
        self.checkpoints.stop_timer();
        self.subtitles.release_all();
        self.session.token = self.session.token.next();
        self.torn_down = true;
        info!(token = %self.session.token, "session torn down");
        self.sync_state();
    }

    fn ensure_live(&self) -> Result<(), SessionError> {
        if self.torn_down {
            Err(SessionError::TornDown)
        } else {
            Ok(())
        }
    }

    fn refresh_position(&mut self) {
        if self.session.media_state.is_controllable() {
            self.engine.refresh_clock(&mut self.session);
        }
    }

    fn start_first(&mut self, resume_at: f64) {
        self.session.seed_position(resume_at);
        match failover::first_candidate(&self.session, &self.sources) {
            Some(index) => self.load_source(index, resume_at),
            None => {
                self.engine.teardown(&mut self.session);
                self.checkpoints.stop_timer();
                warn!("no playable source for this episode");
                self.events.push_back(SessionEvent::NoPlayableSource);
            }
        }
    }

    fn load_source(&mut self, index: usize, resume_at: f64) {
        let Some(source) = self.sources.get(index).cloned() else {
            return;
        };
        let referer = self
            .episode
            .as_ref()
            .and_then(|episode| episode.streams.referer.clone());
        let token = self.session.token.next();
        self.skip.on_reload();
        self.reconcile_scheduled = false;
        self.report_skip();

        if source.is_embed_only {
            self.engine.teardown(&mut self.session);
            self.checkpoints.stop_timer();
            self.session.token = token;
            self.session.current_source = Some(index);
            info!(%token, server = %source.server, "handing off to embedded player");
            self.events.push_back(SessionEvent::ServerChanged {
                index,
                server: source.server.clone(),
            });
            self.events.push_back(SessionEvent::EmbedFallback {
                index,
                server: source.server,
                url: source.url,
            });
            return;
        }

        self.engine.load(
            &mut self.session,
            index,
            &source,
            referer.as_deref(),
            resume_at,
            token,
        );
        self.checkpoints.restart_timer(self.executor.as_ref(), token);
        self.events.push_back(SessionEvent::ServerChanged {
            index,
            server: source.server,
        });
        let work = self.subtitles.attach(self.engine.sink_mut());
        self.dispatch_subtitle_work(work);
        // The fresh sink lost the enabled flags of re-attached tracks.
        if self.subtitles.has_playable() {
            self.reconcile_subtitles(0);
        }
    }

    fn on_backend(&mut self, event: BackendEvent) {
        match self.engine.handle(&mut self.session, event) {
            EngineStep::Nothing => {}
            EngineStep::Ready => {
                self.report_state(MediaState::Ready);
                self.request_skip_times();
                self.update_skip();
            }
            EngineStep::Updated => {
                self.request_skip_times();
                self.update_skip();
            }
            EngineStep::SeekComplete => {
                if let Some(checkpoint) = self.checkpoints.on_seek_complete(&mut self.session) {
                    self.events.push_back(SessionEvent::CheckpointWritten(checkpoint));
                }
                self.update_skip();
            }
            EngineStep::Ended => {
                if let Some(checkpoint) = self.checkpoints.on_completed(&mut self.session) {
                    self.events.push_back(SessionEvent::CheckpointWritten(checkpoint));
                }
                self.checkpoints.stop_timer();
                info!(token = %self.session.token, "playback completed");
            }
            EngineStep::Failure(failure) => self.on_failure(failure),
        }
    }

    fn on_failure(&mut self, failure: PlaybackFailure) {
        match failure.recovery {
            Recovery::RetrySame { attempt, delay } => {
                let token = self.session.token;
                debug!(%token, attempt, ?delay, "scheduling load retry");
                self.executor
                    .spawn_after(delay, Box::new(move || PlayerEvent::RetryLoad { token }));
            }
            Recovery::RecoverMedia => {}
            Recovery::Failover => self.fail_over(&failure),
        }
    }

    fn fail_over(&mut self, failure: &PlaybackFailure) {
        let from = self.session.current_source;
        match failover::on_source_failure(&mut self.session, &self.sources) {
            FailoverDecision::Switch(next) => {
                if let Some(from) = from {
                    self.events.push_back(SessionEvent::SwitchRequested {
                        from,
                        reason: failure.reason.clone(),
                    });
                }
                let resume_at = self.session.resume_position();
                self.load_source(next, resume_at);
            }
            FailoverDecision::Exhausted => {
                self.checkpoints.stop_timer();
                // The error state has to reach the caller before the exhaustion notice.
                self.sync_state();
                self.events.push_back(SessionEvent::Exhausted {
                    attempted: self.session.failed_sources.len(),
                });
            }
            FailoverDecision::AlreadyHandled => {}
        }
    }

    fn request_skip_times(&mut self) {
        let Some((lookup, duration)) = self.skip.request(self.session.duration_seconds) else {
            return;
        };
        let token = self.session.token;
        let provider = Arc::clone(&self.services.skip_times);
        self.executor.spawn(Box::new(move || PlayerEvent::SkipTimes {
            token,
            result: provider.skip_times(&lookup, duration),
        }));
    }

    fn update_skip(&mut self) {
        self.skip.update(self.session.current_time_seconds);
        if let Some(target) = self.skip.auto_skip_target() {
            info!(target, "auto-skipping interval");
            self.engine.seek(&mut self.session, target);
        }
        self.report_skip();
    }

    fn report_skip(&mut self) {
        let active = self.skip.active().cloned();
        if active != self.reported_skip {
            self.reported_skip = active.clone();
            self.events.push_back(SessionEvent::SkipAvailable(active));
        }
    }

    fn dispatch_subtitle_work(&mut self, work: SubtitleWork) {
        let Some(episode) = self.episode.as_ref() else {
            return;
        };
        let token = self.session.token;
        if work.lookup_sub_variant {
            let catalog = Arc::clone(&self.services.catalog);
            let key = episode.streams.key();
            debug!(%token, "dub variant has no subtitles, asking the sub variant");
            self.executor
                .spawn(Box::new(move || PlayerEvent::SubtitleCandidates {
                    token,
                    result: catalog.subtitles_for(&key, Category::Sub),
                }));
        }
        for (index, url) in work.fetch {
            let fetcher = Arc::clone(&self.services.subtitles);
            let referer = episode.streams.referer.clone();
            self.executor.spawn(Box::new(move || PlayerEvent::SubtitleFetched {
                token,
                index,
                result: fetcher.fetch(&url, referer.as_deref()),
            }));
        }
    }

    /// Re-applies the track selection until the sink has registered every
    /// track or the attempt bound is reached.
    fn reconcile_subtitles(&mut self, attempt: u32) {
        if self.subtitles.apply_selection(self.engine.sink_mut()) {
            debug!(attempt, "subtitle selection applied");
            return;
        }
        if self.reconcile_scheduled {
            return;
        }
        let next = attempt + 1;
        if next >= self.reconcile_attempts {
            warn!(attempts = next, "subtitle tracks never registered, giving up");
            return;
        }
        let token = self.session.token;
        self.reconcile_scheduled = true;
        self.executor.spawn_after(
            self.reconcile_delay,
            Box::new(move || PlayerEvent::ReconcileSubtitles {
                token,
                attempt: next,
            }),
        );
    }

    fn report_state(&mut self, state: MediaState) {
        if state == self.reported_state {
            return;
        }
        info!(token = %self.session.token, %state, "playback state");
        self.reported_state = state.clone();
        self.events.push_back(SessionEvent::State(state));
    }

    fn sync_state(&mut self) {
        let state = self.session.media_state.clone();
        self.report_state(state);
    }
}

impl Drop for Controller {
    fn drop(&mut self) {
        self.teardown();
    }
}
