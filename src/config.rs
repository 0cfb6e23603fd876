use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::http::HttpSettings;
use crate::player::SkipKind;

pub(crate) const DEFAULT_SKIP_TIMES_URL: &str = "https://api.aniskip.com/v2/skip-times";

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub(crate) enum RetryBackoff {
    Fixed { delay_ms: u64 },
    Exponential { base_ms: u64, max_ms: u64 },
}

impl RetryBackoff {
    pub(crate) fn delay(&self, attempt: u32) -> Duration {
        match *self {
            RetryBackoff::Fixed { delay_ms } => Duration::from_millis(delay_ms),
            RetryBackoff::Exponential { base_ms, max_ms } => {
                let shift = attempt.saturating_sub(1).min(16);
                let delay = base_ms.saturating_mul(1_u64 << shift);
                Duration::from_millis(delay.min(max_ms))
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub(crate) struct HttpConfig {
    pub(crate) connect_timeout_ms: u64,
    pub(crate) read_timeout_ms: u64,
    pub(crate) attempts: usize,
    pub(crate) retry_delay_ms: u64,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: 3_000,
            read_timeout_ms: 8_000,
            attempts: 2,
            retry_delay_ms: 500,
        }
    }
}

impl HttpConfig {
    pub(crate) fn settings(&self) -> HttpSettings {
        HttpSettings {
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            read_timeout: Duration::from_millis(self.read_timeout_ms),
            attempts: self.attempts.max(1),
            retry_delay: Duration::from_millis(self.retry_delay_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub(crate) struct RemoteStoreConfig {
    pub(crate) url: String,
    #[serde(default)]
    pub(crate) token: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub(crate) struct PlaybackConfig {
    pub(crate) network_retry_budget: u32,
    pub(crate) retry_backoff: RetryBackoff,
    pub(crate) media_recovery_attempts: u32,
    pub(crate) autoplay: bool,
    pub(crate) checkpoint_tick_secs: u64,
    pub(crate) checkpoint_min_interval_secs: f64,
    pub(crate) subtitle_reconcile_attempts: u32,
    pub(crate) subtitle_reconcile_delay_ms: u64,
    pub(crate) subtitle_proxy: Option<String>,
    pub(crate) skip_times_url: String,
    pub(crate) auto_skip: Vec<SkipKind>,
    pub(crate) dedupe_languages: bool,
    pub(crate) http: HttpConfig,
    pub(crate) remote_store: Option<RemoteStoreConfig>,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            network_retry_budget: 2,
            retry_backoff: RetryBackoff::Exponential {
                base_ms: 500,
                max_ms: 4_000,
            },
            media_recovery_attempts: 1,
            autoplay: true,
            checkpoint_tick_secs: 15,
            checkpoint_min_interval_secs: 10.0,
            subtitle_reconcile_attempts: 8,
            subtitle_reconcile_delay_ms: 250,
            subtitle_proxy: None,
            skip_times_url: DEFAULT_SKIP_TIMES_URL.to_string(),
            auto_skip: Vec::new(),
            dedupe_languages: false,
            http: HttpConfig::default(),
            remote_store: None,
        }
    }
}

impl PlaybackConfig {
    pub(crate) fn load(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("failed to read config at {}", path.display()))?;
            Self::from_json(&raw)
                .with_context(|| format!("failed to parse config at {}", path.display()))?
        } else {
            Self::default()
        };
        config.apply_env(|key| env::var(key).ok())?;
        Ok(config)
    }

    pub(crate) fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub(crate) fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(value) = read("ANISTREAM_RETRY_BUDGET") {
            self.network_retry_budget = value
                .trim()
                .parse()
                .with_context(|| format!("invalid ANISTREAM_RETRY_BUDGET: {value}"))?;
        }
        if let Some(value) = read("ANISTREAM_AUTOPLAY") {
            self.autoplay = parse_bool(&value)
                .with_context(|| format!("invalid ANISTREAM_AUTOPLAY: {value}"))?;
        }
        if let Some(value) = read("ANISTREAM_SUBTITLE_PROXY") {
            self.subtitle_proxy = Some(value.trim().to_string());
        }
        if let Some(value) = read("ANISTREAM_SKIP_TIMES_URL") {
            self.skip_times_url = value.trim().trim_end_matches('/').to_string();
        }
        if let Some(url) = read("ANISTREAM_REMOTE_URL") {
            self.remote_store = Some(RemoteStoreConfig {
                url: url.trim().to_string(),
                token: read("ANISTREAM_REMOTE_TOKEN"),
            });
        }
        Ok(())
    }

    pub(crate) fn checkpoint_tick(&self) -> Duration {
        Duration::from_secs(self.checkpoint_tick_secs.max(1))
    }

    pub(crate) fn reconcile_delay(&self) -> Duration {
        Duration::from_millis(self.subtitle_reconcile_delay_ms)
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn exponential_backoff_doubles_and_caps() {
        let backoff = RetryBackoff::Exponential {
            base_ms: 500,
            max_ms: 1_500,
        };
        assert_eq!(backoff.delay(1), Duration::from_millis(500));
        assert_eq!(backoff.delay(2), Duration::from_millis(1_000));
        assert_eq!(backoff.delay(3), Duration::from_millis(1_500));
        assert_eq!(backoff.delay(40), Duration::from_millis(1_500));
    }

    #[test]
    fn fixed_backoff_ignores_attempt() {
        let backoff = RetryBackoff::Fixed { delay_ms: 250 };
        assert_eq!(backoff.delay(1), backoff.delay(5));
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config = PlaybackConfig::from_json(
            r#"{"network_retry_budget":4,"retry_backoff":{"mode":"fixed","delay_ms":100},"auto_skip":["intro","mixed-outro"]}"#,
        )
        .expect("config should parse");
        assert_eq!(config.network_retry_budget, 4);
        assert_eq!(config.retry_backoff, RetryBackoff::Fixed { delay_ms: 100 });
        assert_eq!(config.auto_skip, vec![SkipKind::Intro, SkipKind::MixedOutro]);
        assert_eq!(config.checkpoint_tick_secs, 15);
        assert!(!config.dedupe_languages);
    }

    #[test]
    fn malformed_json_is_an_error() {
        assert!(PlaybackConfig::from_json("{ not json").is_err());
    }

    #[test]
    fn env_overrides_apply_and_blank_values_are_ignored() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("ANISTREAM_RETRY_BUDGET", "5"),
            ("ANISTREAM_AUTOPLAY", "off"),
            ("ANISTREAM_SUBTITLE_PROXY", "  "),
            ("ANISTREAM_REMOTE_URL", "https://progress.test/api"),
            ("ANISTREAM_REMOTE_TOKEN", "abc"),
        ]);
        let mut config = PlaybackConfig::default();
        config
            .apply_env(|key| vars.get(key).map(|value| value.to_string()))
            .expect("env should apply");

        assert_eq!(config.network_retry_budget, 5);
        assert!(!config.autoplay);
        assert_eq!(config.subtitle_proxy, None);
        assert_eq!(
            config.remote_store,
            Some(RemoteStoreConfig {
                url: "https://progress.test/api".to_string(),
                token: Some("abc".to_string()),
            })
        );
    }

    #[test]
    fn invalid_env_value_reports_the_variable() {
        let mut config = PlaybackConfig::default();
        let err = config
            .apply_env(|key| (key == "ANISTREAM_AUTOPLAY").then(|| "maybe".to_string()))
            .expect_err("invalid bool should fail");
        assert!(err.to_string().contains("ANISTREAM_AUTOPLAY"));
    }
}
