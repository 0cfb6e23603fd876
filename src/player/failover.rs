use tracing::{debug, warn};

use super::Source;
use super::session::PlaybackSession;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FailoverDecision {
    Switch(usize),
    Exhausted,
    AlreadyHandled,
}

/// Records the failure of the active source and picks the next one.
///
/// Marking is idempotent. The next candidate is the first untried source after
/// the current one, wrapping to the start of the list.
pub(crate) fn on_source_failure(
    session: &mut PlaybackSession,
    sources: &[Source],
) -> FailoverDecision {
    let Some(current) = session.current_source else {
        return FailoverDecision::AlreadyHandled;
    };
    let Some(source) = sources.get(current) else {
        return FailoverDecision::AlreadyHandled;
    };

    if !session.failed_sources.insert(source.key()) {
        debug!(server = %source.server, "source already marked failed");
        return FailoverDecision::AlreadyHandled;
    }

    match next_candidate(session, sources, current) {
        Some(next) => {
            debug!(from = %source.server, to = %sources[next].server, "failing over");
            FailoverDecision::Switch(next)
        }
        None => {
            warn!(
                attempted = session.failed_sources.len(),
                "every source failed for this episode"
            );
            FailoverDecision::Exhausted
        }
    }
}

pub(crate) fn next_candidate(
    session: &PlaybackSession,
    sources: &[Source],
    current: usize,
) -> Option<usize> {
    let len = sources.len();
    (1..=len)
        .map(|offset| (current + offset) % len)
        .find(|&idx| !session.failed_sources.contains(&sources[idx].key()))
}

pub(crate) fn first_candidate(session: &PlaybackSession, sources: &[Source]) -> Option<usize> {
    sources
        .iter()
        .position(|source| !session.failed_sources.contains(&source.key()))
}
