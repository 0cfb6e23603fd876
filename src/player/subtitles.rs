use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::http::{FetchError, HttpSettings, get_text_with_retries};

use super::media::{MediaSink, TextTrackSpec};
use super::{Category, EpisodeKey, SubtitleCandidate};

pub(crate) trait SubtitleFetcher: Send + Sync {
    fn fetch(&self, url: &str, referer: Option<&str>) -> Result<String, FetchError>;
}

pub(crate) trait SubtitleCatalog: Send + Sync {
    fn subtitles_for(
        &self,
        key: &EpisodeKey,
        category: Category,
    ) -> Result<Vec<SubtitleCandidate>, FetchError>;
}

#[derive(Debug, Clone)]
pub(crate) struct HttpSubtitleFetcher {
    proxy: Option<String>,
    settings: HttpSettings,
}

impl HttpSubtitleFetcher {
    pub(crate) fn new(proxy: Option<String>, settings: HttpSettings) -> Self {
        Self {
            proxy: proxy.filter(|value| !value.trim().is_empty()),
            settings,
        }
    }
}

impl SubtitleFetcher for HttpSubtitleFetcher {
    fn fetch(&self, url: &str, referer: Option<&str>) -> Result<String, FetchError> {
        match self.proxy.as_deref() {
            Some(proxy) => {
                let mut query = vec![("url".to_string(), url.to_string())];
                if let Some(referer) = referer {
                    query.push(("referer".to_string(), referer.to_string()));
                }
                get_text_with_retries(proxy, None, &query, &self.settings)
            }
            None => get_text_with_retries(url, referer, &[], &self.settings),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SubtitlePreference {
    Off,
    Auto,
    Language(String),
}

impl SubtitlePreference {
    pub(crate) fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        match trimmed.to_ascii_lowercase().as_str() {
            "off" | "none" => SubtitlePreference::Off,
            "" | "auto" => SubtitlePreference::Auto,
            _ => SubtitlePreference::Language(trimmed.to_string()),
        }
    }
}

pub(crate) fn select_track<'a, I>(tracks: I, preference: &SubtitlePreference) -> Option<usize>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let tracks: Vec<(String, String)> = tracks
        .into_iter()
        .map(|(code, label)| (code.to_lowercase(), label.to_lowercase()))
        .collect();
    match preference {
        SubtitlePreference::Off => None,
        SubtitlePreference::Auto => tracks
            .iter()
            .position(|(_, label)| label.contains("english"))
            .or_else(|| (!tracks.is_empty()).then_some(0)),
        SubtitlePreference::Language(wanted) => {
            let wanted = wanted.trim().to_lowercase();
            if wanted.is_empty() {
                return None;
            }
            let mut best: Option<(u8, usize)> = None;
            for (index, (code, label)) in tracks.iter().enumerate() {
                let score = if *code == wanted {
                    3
                } else if code.contains(&wanted) || (!code.is_empty() && wanted.contains(code.as_str())) {
                    2
                } else if label.contains(&wanted) {
                    1
                } else {
                    0
                };
                if score > 0 && best.is_none_or(|(top, _)| score > top) {
                    best = Some((score, index));
                }
            }
            best.map(|(_, index)| index)
        }
    }
}

pub(crate) fn to_webvtt(raw: &str) -> Option<String> {
    let body = raw.trim_start_matches('\u{feff}').replace("\r\n", "\n");
    if body.trim_start().starts_with("WEBVTT") {
        return Some(body);
    }
    if !body.contains("-->") {
        return None;
    }
    let mut out = String::from("WEBVTT\n\n");
    for line in body.trim().lines() {
        if line.contains("-->") {
            out.push_str(&line.replace(',', "."));
        } else {
            out.push_str(line);
        }
        out.push('\n');
    }
    Some(out)
}

fn make_temp_subtitle_dir() -> Result<PathBuf> {
    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let dir = env::temp_dir().join(format!("anistream-subs-{}-{ts}", std::process::id()));
    fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create subtitle dir {}", dir.display()))?;
    Ok(dir)
}

#[derive(Debug)]
struct TempSubtitleDir {
    path: PathBuf,
}

impl TempSubtitleDir {
    fn new() -> Result<Self> {
        Ok(Self {
            path: make_temp_subtitle_dir()?,
        })
    }
}

impl Drop for TempSubtitleDir {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.path);
    }
}

#[derive(Debug)]
pub(crate) struct SubtitleResource {
    path: PathBuf,
}

impl SubtitleResource {
    fn write(dir: &Path, name: &str, body: &str) -> Result<Self> {
        let path = dir.join(name);
        fs::write(&path, body)
            .with_context(|| format!("failed to write subtitle {}", path.display()))?;
        Ok(Self { path })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for SubtitleResource {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

#[derive(Debug)]
enum TrackState {
    Pending,
    Fetching,
    Ready(SubtitleResource),
    Failed,
}

#[derive(Debug)]
pub(crate) struct SubtitleTrack {
    pub(crate) language_code: String,
    pub(crate) display_label: String,
    pub(crate) source_url: String,
    pub(crate) origin: Category,
    state: TrackState,
}

impl SubtitleTrack {
    fn new(candidate: SubtitleCandidate, origin: Category) -> Self {
        Self {
            language_code: candidate.language_code.trim().to_string(),
            display_label: candidate.display_label.trim().to_string(),
            source_url: candidate.source_url.trim().to_string(),
            origin,
            state: TrackState::Pending,
        }
    }

    pub(crate) fn resource(&self) -> Option<&SubtitleResource> {
        match &self.state {
            TrackState::Ready(resource) => Some(resource),
            _ => None,
        }
    }

    pub(crate) fn is_playable(&self) -> bool {
        self.resource().is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fallback {
    NotNeeded,
    Needed,
    Pending,
    Done,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct SubtitleWork {
    pub(crate) fetch: Vec<(usize, String)>,
    pub(crate) lookup_sub_variant: bool,
}

pub(crate) struct SubtitleManager {
    preference: SubtitlePreference,
    tracks: Vec<SubtitleTrack>,
    fallback: Fallback,
    dir: Option<TempSubtitleDir>,
    next_resource: u64,
}

impl SubtitleManager {
    pub(crate) fn new(preference: SubtitlePreference) -> Self {
        Self {
            preference,
            tracks: Vec::new(),
            fallback: Fallback::NotNeeded,
            dir: None,
            next_resource: 0,
        }
    }

    pub(crate) fn tracks(&self) -> &[SubtitleTrack] {
        &self.tracks
    }

    pub(crate) fn open(&mut self, candidates: Vec<SubtitleCandidate>, category: Category) {
        self.release_all();
        self.tracks = usable(candidates)
            .map(|candidate| SubtitleTrack::new(candidate, category))
            .collect();
        self.fallback = if self.tracks.is_empty() && category == Category::Dub {
            Fallback::Needed
        } else {
            Fallback::NotNeeded
        };
    }

    pub(crate) fn attach(&mut self, sink: &mut dyn MediaSink) -> SubtitleWork {
        for track in &mut self.tracks {
            if matches!(track.state, TrackState::Fetching) {
                track.state = TrackState::Pending;
            }
        }
        for track in &self.tracks {
            if let TrackState::Ready(resource) = &track.state {
                sink.add_text_track(TextTrackSpec {
                    language_code: &track.language_code,
                    label: &track.display_label,
                    path: resource.path(),
                });
            }
        }
        let lookup_sub_variant = matches!(self.fallback, Fallback::Needed | Fallback::Pending);
        if lookup_sub_variant {
            self.fallback = Fallback::Pending;
        }
        SubtitleWork {
            fetch: self.take_pending(),
            lookup_sub_variant,
        }
    }

    pub(crate) fn on_candidates(
        &mut self,
        result: Result<Vec<SubtitleCandidate>, FetchError>,
    ) -> SubtitleWork {
        if self.fallback != Fallback::Pending {
            return SubtitleWork::default();
        }
        self.fallback = Fallback::Done;
        match result {
            Ok(candidates) => {
                self.tracks = usable(candidates)
                    .map(|candidate| SubtitleTrack::new(candidate, Category::Sub))
                    .collect();
                debug!(count = self.tracks.len(), "using sub variant subtitles");
            }
            Err(err) => {
                warn!(error = %err, "sub variant subtitle lookup failed");
            }
        }
        SubtitleWork {
            fetch: self.take_pending(),
            lookup_sub_variant: false,
        }
    }

    pub(crate) fn on_fetched(
        &mut self,
        index: usize,
        result: Result<String, FetchError>,
        sink: &mut dyn MediaSink,
    ) -> bool {
        let Some(track) = self.tracks.get(index) else {
            return false;
        };
        if !matches!(track.state, TrackState::Fetching) {
            return false;
        }
        let language_code = track.language_code.clone();

        let next = match result {
            Ok(body) => match self.materialize(index, &language_code, &body) {
                Ok(resource) => TrackState::Ready(resource),
                Err(err) => {
                    warn!(language = %language_code, error = %err, "subtitle dropped");
                    TrackState::Failed
                }
            },
            Err(err) => {
                warn!(language = %language_code, error = %err, "subtitle fetch failed");
                TrackState::Failed
            }
        };

        let Some(track) = self.tracks.get_mut(index) else {
            return false;
        };
        track.state = next;
        let TrackState::Ready(resource) = &track.state else {
            return false;
        };
        sink.add_text_track(TextTrackSpec {
            language_code: &track.language_code,
            label: &track.display_label,
            path: resource.path(),
        });
        debug!(language = %track.language_code, path = %resource.path().display(), "subtitle attached");
        true
    }

    pub(crate) fn set_preference(&mut self, preference: SubtitlePreference) {
        self.preference = preference;
    }

    pub(crate) fn apply_selection(&self, sink: &mut dyn MediaSink) -> bool {
        let playable: Vec<&SubtitleTrack> =
            self.tracks.iter().filter(|track| track.is_playable()).collect();
        let selected = select_track(
            playable
                .iter()
                .map(|track| (track.language_code.as_str(), track.display_label.as_str())),
            &self.preference,
        );
        let mut registered = true;
        for (index, track) in playable.iter().enumerate() {
            registered &= sink.set_text_track_enabled(&track.language_code, selected == Some(index));
        }
        registered
    }

    pub(crate) fn has_playable(&self) -> bool {
        self.tracks.iter().any(SubtitleTrack::is_playable)
    }

    pub(crate) fn ready_languages(&self) -> Vec<String> {
        self.tracks
            .iter()
            .filter(|track| track.is_playable())
            .map(|track| track.language_code.clone())
            .collect()
    }

    pub(crate) fn has_in_flight(&self) -> bool {
        self.fallback == Fallback::Pending
            || self
                .tracks
                .iter()
                .any(|track| matches!(track.state, TrackState::Fetching))
    }

    pub(crate) fn release_all(&mut self) {
        let released = self
            .tracks
            .iter()
            .filter(|track| track.is_playable())
            .count();
        self.tracks.clear();
        self.fallback = Fallback::NotNeeded;
        if released > 0 {
            debug!(released, "subtitle resources released");
        }
    }

    fn take_pending(&mut self) -> Vec<(usize, String)> {
        self.tracks
            .iter_mut()
            .enumerate()
            .filter(|(_, track)| matches!(track.state, TrackState::Pending))
            .map(|(index, track)| {
                track.state = TrackState::Fetching;
                (index, track.source_url.clone())
            })
            .collect()
    }

    fn materialize(&mut self, index: usize, language_code: &str, body: &str) -> Result<SubtitleResource> {
        let vtt = to_webvtt(body).context("response is not a subtitle file")?;
        if self.dir.is_none() {
            self.dir = Some(TempSubtitleDir::new()?);
        }
        let dir = self
            .dir
            .as_ref()
            .map(|dir| dir.path.clone())
            .context("subtitle dir unavailable")?;
        self.next_resource += 1;
        let name = format!(
            "{}-{index}-{}.vtt",
            self.next_resource,
            sanitize_file_part(language_code)
        );
        SubtitleResource::write(&dir, &name, &vtt)
    }
}

fn usable(candidates: Vec<SubtitleCandidate>) -> impl Iterator<Item = SubtitleCandidate> {
    candidates
        .into_iter()
        .filter(|candidate| !candidate.source_url.trim().is_empty())
}

fn sanitize_file_part(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .filter(|ch| ch.is_ascii_alphanumeric() || *ch == '-' || *ch == '_')
        .take(16)
        .collect();
    if cleaned.is_empty() {
        "und".to_string()
    } else {
        cleaned
    }
}
