use serde::Serialize;
use thiserror::Error;

use crate::db::Database;
use crate::http::{FetchError, HttpSettings, post_json_with_retries};
use crate::player::{Checkpoint, EpisodeKey};

#[derive(Debug, Error)]
pub(crate) enum StoreError {
    #[error("local progress store failed: {0}")]
    Local(#[from] anyhow::Error),
    #[error("remote progress store failed: {0}")]
    Remote(#[from] FetchError),
    #[error("failed to encode checkpoint: {0}")]
    Encode(#[from] serde_json::Error),
}

pub(crate) trait ProgressStore {
    fn name(&self) -> &'static str;
    fn write(&mut self, key: &EpisodeKey, checkpoint: &Checkpoint) -> Result<(), StoreError>;
}

impl ProgressStore for Database {
    fn name(&self) -> &'static str {
        "local"
    }

    fn write(&mut self, key: &EpisodeKey, checkpoint: &Checkpoint) -> Result<(), StoreError> {
        self.upsert_checkpoint(key, checkpoint)?;
        Ok(())
    }
}

#[derive(Debug, Serialize)]
struct RemoteRecord<'a> {
    show_id: &'a str,
    episode: &'a str,
    #[serde(flatten)]
    checkpoint: &'a Checkpoint,
}

#[derive(Debug, Clone)]
pub(crate) struct RemoteStore {
    url: String,
    token: Option<String>,
    settings: HttpSettings,
}

impl RemoteStore {
    pub(crate) fn new(url: impl Into<String>, token: Option<String>, settings: HttpSettings) -> Self {
        Self {
            url: url.into(),
            token,
            settings,
        }
    }
}

pub(crate) fn encode_remote_record(
    key: &EpisodeKey,
    checkpoint: &Checkpoint,
) -> Result<String, StoreError> {
    let record = RemoteRecord {
        show_id: &key.show_id,
        episode: &key.episode,
        checkpoint,
    };
    Ok(serde_json::to_string(&record)?)
}

impl ProgressStore for RemoteStore {
    fn name(&self) -> &'static str {
        "remote"
    }

    fn write(&mut self, key: &EpisodeKey, checkpoint: &Checkpoint) -> Result<(), StoreError> {
        let body = encode_remote_record(key, checkpoint)?;
        post_json_with_retries(&self.url, self.token.as_deref(), &body, &self.settings)?;
        Ok(())
    }
}
