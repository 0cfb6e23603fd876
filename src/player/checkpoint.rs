use std::time::Duration;

use chrono::Utc;
use tracing::{debug, warn};

use crate::store::ProgressStore;

use super::runtime::{Executor, TickerGuard};
use super::session::{MediaState, PlaybackSession};
use super::{Checkpoint, EpisodeKey, LoadToken};

pub(crate) struct CheckpointWriter {
    store: Box<dyn ProgressStore>,
    key: Option<EpisodeKey>,
    min_interval: f64,
    tick: Duration,
    ticker: Option<TickerGuard>,
}

impl CheckpointWriter {
    pub(crate) fn new(store: Box<dyn ProgressStore>, min_interval: f64, tick: Duration) -> Self {
        Self {
            store,
            key: None,
            min_interval: min_interval.max(0.0),
            tick,
            ticker: None,
        }
    }

    pub(crate) fn set_episode(&mut self, key: EpisodeKey) {
        self.key = Some(key);
    }

    #[cfg(test)]
    pub(crate) fn has_timer(&self) -> bool {
        self.ticker.is_some()
    }

    pub(crate) fn restart_timer(&mut self, executor: &dyn Executor, token: LoadToken) {
        self.ticker = None;
        self.ticker = Some(executor.ticker(self.tick, token));
    }

    pub(crate) fn stop_timer(&mut self) {
        self.ticker = None;
    }

    pub(crate) fn on_tick(&mut self, session: &mut PlaybackSession) -> Option<Checkpoint> {
        if session.media_state != MediaState::Playing {
            return None;
        }
        self.write_throttled(session)
    }

    pub(crate) fn on_seek_complete(&mut self, session: &mut PlaybackSession) -> Option<Checkpoint> {
        self.write_throttled(session)
    }

    pub(crate) fn on_completed(&mut self, session: &mut PlaybackSession) -> Option<Checkpoint> {
        let position = session
            .duration_seconds
            .unwrap_or(session.current_time_seconds);
        self.write(session, position, true)
    }

    /// Final best-effort write. Skipped when the completion write already happened.
    pub(crate) fn on_teardown(&mut self, session: &mut PlaybackSession) -> Option<Checkpoint> {
        if matches!(session.media_state, MediaState::Ended) {
            return None;
        }
        self.write(session, session.current_time_seconds, false)
    }

    fn write_throttled(&mut self, session: &mut PlaybackSession) -> Option<Checkpoint> {
        let position = session.current_time_seconds;
        if (position - session.last_checkpoint_seconds).abs() < self.min_interval {
            debug!(
                position,
                last = session.last_checkpoint_seconds,
                "checkpoint throttled"
            );
            return None;
        }
        self.write(session, position, false)
    }

    fn write(
        &mut self,
        session: &mut PlaybackSession,
        position: f64,
        completed: bool,
    ) -> Option<Checkpoint> {
        let key = self.key.as_ref()?;
        if !position.is_finite() {
            return None;
        }
        let checkpoint = Checkpoint {
            position_seconds: position.max(0.0),
            duration_seconds: session.duration_seconds,
            completed,
            timestamp: Utc::now(),
        };
        session.last_checkpoint_seconds = checkpoint.position_seconds;
        match self.store.write(key, &checkpoint) {
            Ok(()) => {
                debug!(
                    store = self.store.name(),
                    position = checkpoint.position_seconds,
                    completed,
                    "checkpoint written"
                );
                Some(checkpoint)
            }
            Err(err) => {
                warn!(store = self.store.name(), error = %err, "checkpoint write failed");
                None
            }
        }
    }
}
