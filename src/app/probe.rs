use std::path::PathBuf;
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::debug;

use crate::config::PlaybackConfig;
use crate::db::Database;
use crate::http::{FetchError, HttpSettings, get_text_with_retries, head_with_retries};
use crate::player::{
    AniskipClient, BackendError, BackendErrorKind, BackendEvent, BackendFactory, Category,
    Controller, HttpSubtitleFetcher, LoadRequest, LoadToken, MediaSink, MediaState, PlayerEvent,
    Services, SessionEvent, StreamBackend, SubtitlePreference, TextTrackSpec, ThreadExecutor,
};
use crate::store::{ProgressStore, RemoteStore};

use super::catalog::{ManifestCatalog, load_episode};
use super::{describe_event, format_clock};

#[derive(Debug, Default)]
struct ProbeClock {
    current_time: f64,
    duration: Option<f64>,
}

type SharedClock = Arc<Mutex<ProbeClock>>;

fn with_clock<T>(clock: &SharedClock, f: impl FnOnce(&mut ProbeClock) -> T) -> Option<T> {
    clock.lock().ok().map(|mut guard| f(&mut guard))
}

fn send_backend(tx: &Sender<PlayerEvent>, token: LoadToken, event: BackendEvent) {
    let _ = tx.send(PlayerEvent::Backend { token, event });
}

pub(crate) fn backend_error_from_fetch(err: &FetchError) -> BackendError {
    let kind = match err {
        FetchError::Status { .. } if err.is_client_error() => BackendErrorKind::Manifest,
        FetchError::Status { .. } | FetchError::Transport { .. } => BackendErrorKind::Network,
        FetchError::Decode(_) => BackendErrorKind::Media,
        FetchError::Malformed(_) => BackendErrorKind::Manifest,
    };
    BackendError::fatal(kind, err.to_string())
}

pub(crate) fn parse_playlist(raw: &str) -> Result<Option<f64>, BackendError> {
    let body = raw.trim_start_matches('\u{feff}').trim_start();
    if !body.starts_with("#EXTM3U") {
        return Err(BackendError::fatal(
            BackendErrorKind::Manifest,
            "response is not an HLS playlist",
        ));
    }
    if body.contains("#EXT-X-STREAM-INF") {
        return Ok(None);
    }
    let total: f64 = body
        .lines()
        .filter_map(|line| line.trim().strip_prefix("#EXTINF:"))
        .filter_map(|rest| rest.split(',').next()?.trim().parse::<f64>().ok())
        .filter(|value| value.is_finite() && *value > 0.0)
        .sum();
    if total > 0.0 {
        Ok(Some(total))
    } else {
        Err(BackendError::fatal(
            BackendErrorKind::Manifest,
            "playlist has no segments",
        ))
    }
}

struct HeadlessSink {
    tx: Sender<PlayerEvent>,
    clock: SharedClock,
    settings: HttpSettings,
    tracks: Vec<String>,
}

impl MediaSink for HeadlessSink {
    fn begin(&mut self, _token: LoadToken) {
        self.tracks.clear();
        with_clock(&self.clock, |clock| *clock = ProbeClock::default());
    }

    fn open_direct(&mut self, request: &LoadRequest) {
        let tx = self.tx.clone();
        let request = request.clone();
        let settings = self.settings.single_attempt();
        thread::spawn(move || {
            let event = match head_with_retries(&request.url, request.referer.as_deref(), &settings) {
                Ok(Some(content_type)) if content_type.starts_with("text/html") => {
                    BackendEvent::Error(BackendError::fatal(
                        BackendErrorKind::Manifest,
                        format!("direct source serves {content_type}"),
                    ))
                }
                Ok(_) => BackendEvent::MetadataLoaded,
                Err(err) => BackendEvent::Error(backend_error_from_fetch(&err)),
            };
            send_backend(&tx, request.token, event);
        });
    }

    fn clear(&mut self) {
        self.tracks.clear();
    }

    fn play(&mut self) -> bool {
        true
    }

    fn pause(&mut self) {}

    fn seek(&mut self, seconds: f64) {
        with_clock(&self.clock, |clock| clock.current_time = seconds);
    }

    fn current_time(&self) -> f64 {
        with_clock(&self.clock, |clock| clock.current_time).unwrap_or_default()
    }

    fn duration(&self) -> Option<f64> {
        with_clock(&self.clock, |clock| clock.duration).flatten()
    }

    fn add_text_track(&mut self, track: TextTrackSpec<'_>) {
        debug!(language = track.language_code, label = track.label, path = %track.path.display(), "text track added");
        self.tracks.push(track.language_code.to_string());
    }

    fn set_text_track_enabled(&mut self, language_code: &str, enabled: bool) -> bool {
        let registered = self.tracks.iter().any(|code| code == language_code);
        if registered && enabled {
            debug!(language = language_code, "text track enabled");
        }
        registered
    }
}

struct PlaylistBackend {
    tx: Sender<PlayerEvent>,
    clock: SharedClock,
    settings: HttpSettings,
    request: Option<LoadRequest>,
}

impl StreamBackend for PlaylistBackend {
    fn attach(&mut self, request: &LoadRequest, _sink: &mut dyn MediaSink) {
        self.request = Some(request.clone());
        self.start_load();
    }

    fn start_load(&mut self) {
        let Some(request) = self.request.clone() else {
            return;
        };
        let tx = self.tx.clone();
        let clock = Arc::clone(&self.clock);
        let settings = self.settings.single_attempt();
        thread::spawn(move || {
            let fetched = get_text_with_retries(&request.url, request.referer.as_deref(), &[], &settings);
            let event = match fetched {
                Ok(raw) => match parse_playlist(&raw) {
                    Ok(duration) => {
                        with_clock(&clock, |clock| clock.duration = duration);
                        BackendEvent::ManifestParsed
                    }
                    Err(err) => BackendEvent::Error(err),
                },
                Err(err) => BackendEvent::Error(backend_error_from_fetch(&err)),
            };
            send_backend(&tx, request.token, event);
        });
    }

    fn recover_media_error(&mut self) {
        self.start_load();
    }

    fn destroy(&mut self) {
        self.request = None;
    }
}

struct PlaylistBackends {
    tx: Sender<PlayerEvent>,
    clock: SharedClock,
    settings: HttpSettings,
}

impl BackendFactory for PlaylistBackends {
    fn create(&self) -> Box<dyn StreamBackend> {
        Box::new(PlaylistBackend {
            tx: self.tx.clone(),
            clock: Arc::clone(&self.clock),
            settings: self.settings.clone(),
            request: None,
        })
    }
}

#[derive(Debug)]
pub(crate) struct ProbeOptions {
    pub(crate) episode: PathBuf,
    pub(crate) category: Category,
    pub(crate) resume: Option<f64>,
    pub(crate) subtitles: SubtitlePreference,
    pub(crate) remote: bool,
    pub(crate) idle_timeout: Duration,
}

fn settled(event: &SessionEvent) -> bool {
    matches!(
        event,
        SessionEvent::State(MediaState::Playing)
            | SessionEvent::State(MediaState::Paused)
            | SessionEvent::Exhausted { .. }
            | SessionEvent::NoPlayableSource
            | SessionEvent::EmbedFallback { .. }
    )
}

pub(crate) fn run_probe(config: &PlaybackConfig, db: Database, options: ProbeOptions) -> Result<()> {
    let streams = load_episode(&options.episode)?;
    let key = streams.key();
    let resume_at = match options.resume {
        Some(seconds) => seconds.max(0.0),
        None => db
            .load_checkpoint(&key)?
            .filter(|checkpoint| !checkpoint.completed)
            .map(|checkpoint| checkpoint.position_seconds)
            .unwrap_or(0.0),
    };
    let settings = config.http.settings();
    let store: Box<dyn ProgressStore> = if options.remote {
        let remote = config
            .remote_store
            .as_ref()
            .context("no remote store configured (set remote_store or ANISTREAM_REMOTE_URL)")?;
        Box::new(RemoteStore::new(
            remote.url.clone(),
            remote.token.clone(),
            settings.clone(),
        ))
    } else {
        Box::new(db)
    };

    let (tx, rx) = mpsc::channel();
    let clock = SharedClock::default();
    let sink = HeadlessSink {
        tx: tx.clone(),
        clock: Arc::clone(&clock),
        settings: settings.clone(),
        tracks: Vec::new(),
    };
    let backends = PlaylistBackends {
        tx: tx.clone(),
        clock,
        settings: settings.clone(),
    };
    let services = Services {
        subtitles: Arc::new(HttpSubtitleFetcher::new(
            config.subtitle_proxy.clone(),
            settings.clone(),
        )),
        catalog: Arc::new(ManifestCatalog::new(streams.clone())),
        skip_times: Arc::new(AniskipClient::new(config.skip_times_url.clone(), settings)),
    };
    let mut controller = Controller::new(
        config,
        Box::new(sink),
        Box::new(backends),
        store,
        Box::new(ThreadExecutor::new(tx)),
        services,
        options.subtitles,
    );

    println!(
        "Probing {} episode {} ({}), resume at {}",
        key.show_id,
        key.episode,
        options.category,
        format_clock(resume_at)
    );
    controller.open_episode(streams, options.category, resume_at)?;
    let mut log = controller.run_until(&rx, options.idle_timeout, settled);
    if controller.session().media_state.is_controllable() {
        // Let subtitle and skip-time lookups for the winning source land.
        log.extend(controller.run_until(&rx, Duration::from_secs(2), |_| false));
    }
    for event in &log {
        println!("  {}", describe_event(event));
    }
    for track in controller.subtitle_tracks() {
        println!(
            "  subtitle {} ({}): {}",
            track.language_code,
            track.display_label,
            if track.is_playable() { "ready" } else { "unavailable" }
        );
    }
    if controller.has_pending_subtitles() {
        println!("  subtitles still loading");
    }
    for interval in controller.skip_intervals() {
        println!(
            "  {} {} - {}",
            interval.kind.label(),
            format_clock(interval.start_seconds),
            format_clock(interval.end_seconds)
        );
    }

    let session = controller.session();
    match (&session.media_state, session.current_source) {
        (state, Some(index)) if state.is_controllable() => {
            let server = controller
                .sources()
                .get(index)
                .map(|source| source.server.as_str())
                .unwrap_or("unknown");
            println!(
                "Playable on {server} after {} attempt(s), position {}",
                session.attempts,
                format_clock(session.current_time_seconds)
            );
        }
        (state, _) => println!("No working source ({state})."),
    }

    controller.teardown();
    for event in controller.take_events() {
        if let SessionEvent::CheckpointWritten(_) = event {
            println!("  {}", describe_event(&event));
        }
    }
    Ok(())
}
