use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BackendErrorKind {
    Network,
    Media,
    Manifest,
    Other,
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("{kind:?} error{}: {detail}", fatal_suffix(.fatal))]
pub(crate) struct BackendError {
    pub(crate) kind: BackendErrorKind,
    pub(crate) fatal: bool,
    pub(crate) detail: String,
}

fn fatal_suffix(fatal: &bool) -> &'static str {
    if *fatal { " (fatal)" } else { "" }
}

impl BackendError {
    pub(crate) fn fatal(kind: BackendErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            fatal: true,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum Recovery {
    RetrySame { attempt: u32, delay: Duration },
    RecoverMedia,
    Failover,
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("{reason}")]
pub(crate) struct PlaybackFailure {
    pub(crate) kind: BackendErrorKind,
    pub(crate) recovery: Recovery,
    pub(crate) reason: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub(crate) enum SessionError {
    #[error("no episode is open")]
    NoEpisode,
    #[error("server index {index} out of range ({available} available)")]
    UnknownSource { index: usize, available: usize },
    #[error("server {server} already failed in this session")]
    SourceFailed { server: String },
    #[error("session is torn down")]
    TornDown,
}
