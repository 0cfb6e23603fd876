use std::path::Path;

use super::LoadToken;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LoadRequest {
    pub(crate) url: String,
    pub(crate) referer: Option<String>,
    pub(crate) token: LoadToken,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct TextTrackSpec<'a> {
    pub(crate) language_code: &'a str,
    pub(crate) label: &'a str,
    pub(crate) path: &'a Path,
}

/// The single media element a session plays into. Exclusively owned by the engine.
///
/// `current_time` and `duration` are the live clock; the engine never derives
/// them on its own.
pub(crate) trait MediaSink {
    fn begin(&mut self, token: LoadToken);
    fn open_direct(&mut self, request: &LoadRequest);
    fn clear(&mut self);
    fn play(&mut self) -> bool;
    fn pause(&mut self);
    fn seek(&mut self, seconds: f64);
    fn current_time(&self) -> f64;
    fn duration(&self) -> Option<f64>;
    fn add_text_track(&mut self, track: TextTrackSpec<'_>);
    fn set_text_track_enabled(&mut self, language_code: &str, enabled: bool) -> bool;
}

pub(crate) trait StreamBackend {
    fn attach(&mut self, request: &LoadRequest, sink: &mut dyn MediaSink);
    fn start_load(&mut self);
    fn recover_media_error(&mut self);
    fn destroy(&mut self);
}

pub(crate) trait BackendFactory {
    fn create(&self) -> Box<dyn StreamBackend>;
}
