use serde_json::Value;
use tracing::{debug, warn};

use crate::http::{FetchError, HttpSettings, get_text_with_retries};

use super::{SkipInterval, SkipKind, SkipLookup};

const SKIP_TYPES: &str = "op,ed,mixed-op,mixed-ed,recap";

pub(crate) trait SkipTimesProvider: Send + Sync {
    fn skip_times(&self, lookup: &SkipLookup, duration: f64)
    -> Result<Vec<SkipInterval>, FetchError>;
}

#[derive(Debug, Clone)]
pub(crate) struct AniskipClient {
    base_url: String,
    settings: HttpSettings,
}

impl AniskipClient {
    pub(crate) fn new(base_url: impl Into<String>, settings: HttpSettings) -> Self {
        let base_url: String = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            settings,
        }
    }
}

impl SkipTimesProvider for AniskipClient {
    fn skip_times(
        &self,
        lookup: &SkipLookup,
        duration: f64,
    ) -> Result<Vec<SkipInterval>, FetchError> {
        let url = format!(
            "{}/{}/{}",
            self.base_url,
            lookup.content_id.trim(),
            lookup.episode.trim()
        );
        let query = vec![
            ("types".to_string(), SKIP_TYPES.to_string()),
            ("episodeLength".to_string(), format!("{duration:.0}")),
        ];
        match get_text_with_retries(&url, None, &query, &self.settings) {
            Ok(raw) => parse_skip_times(&raw),
            // The API answers 404 when it has no intervals for the episode.
            Err(FetchError::Status { status: 404, .. }) => Ok(Vec::new()),
            Err(err) => Err(err),
        }
    }
}

pub(crate) fn parse_skip_times(raw: &str) -> Result<Vec<SkipInterval>, FetchError> {
    let parsed: Value =
        serde_json::from_str(raw).map_err(|err| FetchError::Decode(err.to_string()))?;
    if parsed.get("found").and_then(Value::as_bool) == Some(false) {
        return Ok(Vec::new());
    }
    let Some(results) = parsed.get("results").and_then(Value::as_array) else {
        return Err(FetchError::Malformed(
            "skip-times response has no results array".to_string(),
        ));
    };

    Ok(results
        .iter()
        .filter_map(|item| {
            let kind = SkipKind::from_api(item.get("skipType")?.as_str()?)?;
            let start_seconds = item.pointer("/interval/startTime")?.as_f64()?;
            let end_seconds = item.pointer("/interval/endTime")?.as_f64()?;
            if !start_seconds.is_finite() || !(end_seconds > start_seconds) {
                return None;
            }
            Some(SkipInterval {
                kind,
                start_seconds: start_seconds.max(0.0),
                end_seconds,
            })
        })
        .collect())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchState {
    Idle,
    Pending,
    Loaded,
    Failed,
}

#[derive(Debug)]
pub(crate) struct SkipService {
    lookup: Option<SkipLookup>,
    state: FetchState,
    intervals: Vec<SkipInterval>,
    active: Option<SkipInterval>,
    auto_skip: Vec<SkipKind>,
    auto_skipped: Vec<SkipInterval>,
}

impl SkipService {
    pub(crate) fn new(auto_skip: Vec<SkipKind>) -> Self {
        Self {
            lookup: None,
            state: FetchState::Idle,
            intervals: Vec::new(),
            active: None,
            auto_skip,
            auto_skipped: Vec::new(),
        }
    }

    pub(crate) fn reset(&mut self, lookup: Option<SkipLookup>) {
        self.lookup = lookup;
        self.state = FetchState::Idle;
        self.intervals.clear();
        self.active = None;
        self.auto_skipped.clear();
    }

    pub(crate) fn on_reload(&mut self) {
        if self.state == FetchState::Pending {
            self.state = FetchState::Idle;
        }
        self.active = None;
        self.auto_skipped.clear();
    }

    pub(crate) fn request(&mut self, duration: Option<f64>) -> Option<(SkipLookup, f64)> {
        if self.state != FetchState::Idle {
            return None;
        }
        let duration = duration.filter(|value| value.is_finite() && *value > 0.0)?;
        let lookup = self.lookup.clone()?;
        self.state = FetchState::Pending;
        debug!(content = %lookup.content_id, episode = %lookup.episode, duration, "requesting skip intervals");
        Some((lookup, duration))
    }

    pub(crate) fn on_loaded(&mut self, result: Result<Vec<SkipInterval>, FetchError>) {
        match result {
            Ok(intervals) => {
                debug!(count = intervals.len(), "skip intervals loaded");
                self.intervals = intervals;
                self.state = FetchState::Loaded;
            }
            Err(err) => {
                warn!(error = %err, "skip intervals unavailable");
                self.intervals.clear();
                self.state = FetchState::Failed;
            }
        }
        self.active = None;
    }

    pub(crate) fn intervals(&self) -> &[SkipInterval] {
        &self.intervals
    }

    pub(crate) fn active_interval_at(&self, t: f64) -> Option<&SkipInterval> {
        self.intervals.iter().find(|interval| interval.contains(t))
    }

    pub(crate) fn active(&self) -> Option<&SkipInterval> {
        self.active.as_ref()
    }

    pub(crate) fn update(&mut self, t: f64) -> bool {
        let next = self.active_interval_at(t).cloned();
        let changed = next != self.active;
        self.active = next;
        changed
    }

    pub(crate) fn auto_skip_target(&mut self) -> Option<f64> {
        let interval = self.active.as_ref()?;
        if !self.auto_skip.contains(&interval.kind) || self.auto_skipped.contains(interval) {
            return None;
        }
        let target = interval.end_seconds;
        self.auto_skipped.extend(self.active.take());
        Some(target)
    }

    pub(crate) fn skip(&mut self) -> Option<f64> {
        self.active.take().map(|interval| interval.end_seconds)
    }
}
