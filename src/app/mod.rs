mod catalog;
mod probe;

#[cfg(test)]
mod tests;

use std::path::Path;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Local, Utc};

use crate::cli::{Cli, Command};
use crate::config::PlaybackConfig;
use crate::db::Database;
use crate::paths::{config_file_path, database_file_path};
use crate::player::{
    AniskipClient, Category, MediaState, SessionEvent, SkipLookup, SkipTimesProvider, Source,
    SubtitlePreference, normalize_sources,
};

use self::catalog::load_episode;
use self::probe::{ProbeOptions, run_probe};

pub(crate) fn run(cli: Cli) -> Result<()> {
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Sources { episode, category } => run_sources(&config, &episode, category)?,
        Command::Skip {
            id,
            episode,
            duration,
        } => run_skip(&config, id, episode, duration)?,
        Command::Probe {
            episode,
            category,
            resume,
            subtitles,
            remote,
            timeout,
        } => run_probe(
            &config,
            open_db()?,
            ProbeOptions {
                episode,
                category,
                resume,
                subtitles: SubtitlePreference::parse(&subtitles),
                remote,
                idle_timeout: Duration::from_secs(timeout.max(1)),
            },
        )?,
        Command::Progress => run_progress(&open_db()?)?,
    }

    Ok(())
}

fn run_sources(config: &PlaybackConfig, path: &Path, category: Category) -> Result<()> {
    let streams = load_episode(path)?;
    let sources = normalize_sources(&streams.variants, category, config.dedupe_languages);
    if sources.is_empty() {
        println!("No playable {category} sources for {} episode {}.", streams.show_id, streams.episode);
        return Ok(());
    }

    println!(
        "{:<3} {:<16} {:<7} {:<6} {:<8} {:<50}",
        "#", "SERVER", "KIND", "LANG", "QUALITY", "URL"
    );
    for (index, source) in sources.iter().enumerate() {
        println!(
            "{:<3} {:<16} {:<7} {:<6} {:<8} {:<50}",
            index,
            truncate(&source.server, 16),
            source_kind(source),
            source.language_code.as_deref().unwrap_or("-"),
            truncate(source.quality_label.as_deref().unwrap_or("-"), 8),
            truncate(&source.url, 50)
        );
    }
    Ok(())
}

fn run_skip(config: &PlaybackConfig, id: String, episode: String, duration: f64) -> Result<()> {
    anyhow::ensure!(
        duration.is_finite() && duration > 0.0,
        "--duration must be a positive number of seconds"
    );
    let client = AniskipClient::new(config.skip_times_url.clone(), config.http.settings());
    let intervals = client.skip_times(
        &SkipLookup {
            content_id: id,
            episode,
        },
        duration,
    )?;
    if intervals.is_empty() {
        println!("No skip intervals known for this episode.");
        return Ok(());
    }
    for interval in intervals {
        println!(
            "{:<12} {} - {}",
            interval.kind.label(),
            format_clock(interval.start_seconds),
            format_clock(interval.end_seconds)
        );
    }
    Ok(())
}

fn run_progress(db: &Database) -> Result<()> {
    let rows = db.list_checkpoints()?;
    if rows.is_empty() {
        println!("No checkpoints stored yet. Run `anistream probe` first.");
        return Ok(());
    }

    println!(
        "{:<20} {:<8} {:<10} {:<10} {:<5} {:<24}",
        "SHOW", "EP", "POSITION", "DURATION", "DONE", "UPDATED"
    );
    for row in rows {
        let checkpoint = &row.checkpoint;
        println!(
            "{:<20} {:<8} {:<10} {:<10} {:<5} {:<24}",
            truncate(&row.key.show_id, 20),
            truncate(&row.key.episode, 8),
            format_clock(checkpoint.position_seconds),
            checkpoint
                .duration_seconds
                .map(format_clock)
                .unwrap_or_else(|| "-".to_string()),
            if checkpoint.completed { "yes" } else { "no" },
            format_timestamp(&checkpoint.timestamp)
        );
    }
    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<PlaybackConfig> {
    match path {
        Some(path) => PlaybackConfig::load(path),
        None => PlaybackConfig::load(&config_file_path()?),
    }
}

fn open_db() -> Result<Database> {
    let db_path = database_file_path()?;
    let db = Database::open(&db_path)?;
    db.migrate()?;
    Ok(db)
}

fn source_kind(source: &Source) -> &'static str {
    if source.is_embed_only {
        "embed"
    } else if source.is_segmented {
        "hls"
    } else {
        "direct"
    }
}

pub(crate) fn truncate(s: &str, max: usize) -> String {
    let mut out = s.to_string();
    if out.chars().count() > max {
        out = out.chars().take(max.saturating_sub(3)).collect::<String>() + "...";
    }
    out
}

pub(crate) fn format_clock(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds.round() as u64
    } else {
        0
    };
    let (hours, minutes, secs) = (total / 3600, (total % 3600) / 60, total % 60);
    if hours > 0 {
        format!("{hours}:{minutes:02}:{secs:02}")
    } else {
        format!("{minutes}:{secs:02}")
    }
}

pub(crate) fn format_timestamp(timestamp: &DateTime<Utc>) -> String {
    timestamp
        .with_timezone(&Local)
        .format("%Y-%m-%d %H:%M %:z")
        .to_string()
}

pub(crate) fn describe_event(event: &SessionEvent) -> String {
    match event {
        SessionEvent::State(MediaState::Error { reason }) => format!("error: {reason}"),
        SessionEvent::State(state) => format!("state: {state}"),
        SessionEvent::ServerChanged { index, server } => format!("server #{index}: {server}"),
        SessionEvent::SwitchRequested { from, reason } => {
            format!("switching away from #{from}: {reason}")
        }
        SessionEvent::Exhausted { attempted } => {
            format!("all {attempted} source(s) failed; retry or pick a server")
        }
        SessionEvent::NoPlayableSource => "no playable source".to_string(),
        SessionEvent::EmbedFallback { server, url, .. } => {
            format!("{server} needs the embedded player: {url}")
        }
        SessionEvent::SkipAvailable(Some(interval)) => format!(
            "skip {} available until {}",
            interval.kind.label(),
            format_clock(interval.end_seconds)
        ),
        SessionEvent::SkipAvailable(None) => "skip cleared".to_string(),
        SessionEvent::SubtitlesReady(languages) => {
            format!("subtitles ready: {}", languages.join(", "))
        }
        SessionEvent::CheckpointWritten(checkpoint) => format!(
            "checkpoint at {}{}",
            format_clock(checkpoint.position_seconds),
            if checkpoint.completed { " (completed)" } else { "" }
        ),
    }
}
