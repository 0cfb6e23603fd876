use std::fs;

use chrono::TimeZone;

use crate::http::FetchError;
use crate::player::{
    BackendErrorKind, Category, Checkpoint, EpisodeKey, MediaState, SessionEvent, SkipInterval,
    SkipKind, SubtitleCatalog,
};

use super::catalog::*;
use super::probe::*;
use super::*;

const EPISODE_JSON: &str = r#"{
    "show_id": "show-42",
    "episode": "7",
    "skip_id": "21",
    "referer": "https://catalog.test/",
    "variants": [
        {
            "category": "sub",
            "candidates": [
                {"server": "alpha", "url": "https://alpha.test/ep7/master.m3u8", "language_code": "JA", "segmented": true},
                {"server": "embedly", "url": "https://embed.test/e/7", "embed_only": true},
                {"server": "broken"}
            ],
            "subtitles": [
                {"language_code": "en", "label": "English", "url": "https://subs.test/en.vtt"}
            ]
        },
        {
            "category": "dub",
            "candidates": [
                {"server": "beta", "url": "https://beta.test/ep7.mp4", "language_code": "en"}
            ]
        }
    ]
}"#;

#[test]
fn parse_episode_reads_catalog_shape() {
    let streams = parse_episode(EPISODE_JSON).expect("episode should parse");
    assert_eq!(streams.key().show_id, "show-42");
    assert_eq!(streams.variants.len(), 2);
    assert_eq!(streams.variants[0].candidates.len(), 3);
    assert!(streams.variants[0].candidates[2].url.is_none());
    assert!(streams.variants[1].subtitles.is_empty());

    let sources = normalize_sources(&streams.variants, Category::Sub, false);
    let servers: Vec<_> = sources.iter().map(|source| source.server.as_str()).collect();
    assert_eq!(servers, vec!["alpha", "embedly"]);
    assert_eq!(sources[0].language_code.as_deref(), Some("ja"));
    assert_eq!(source_kind(&sources[0]), "hls");
    assert_eq!(source_kind(&sources[1]), "embed");
}

#[test]
fn parse_episode_rejects_missing_identity() {
    let err = parse_episode(r#"{"show_id": " ", "episode": "1"}"#).expect_err("blank show id");
    assert!(err.to_string().contains("show_id"));
    assert!(parse_episode("[]").is_err());
}

#[test]
fn load_episode_reports_the_path() {
    let dir = std::env::temp_dir().join(format!("anistream-episode-test-{}", std::process::id()));
    fs::create_dir_all(&dir).expect("temp dir");
    let path = dir.join("episode.json");
    fs::write(&path, "{ not json").expect("write episode");

    let err = load_episode(&path).expect_err("malformed file");
    assert!(format!("{err:#}").contains("episode.json"));
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn manifest_catalog_serves_only_its_episode() {
    let streams = parse_episode(EPISODE_JSON).expect("episode should parse");
    let catalog = ManifestCatalog::new(streams.clone());

    let subs = catalog
        .subtitles_for(&streams.key(), Category::Sub)
        .expect("known episode");
    assert_eq!(subs.len(), 1);
    assert_eq!(subs[0].display_label, "English");
    assert!(
        catalog
            .subtitles_for(&streams.key(), Category::Dub)
            .expect("known episode")
            .is_empty()
    );

    let other = EpisodeKey {
        show_id: "show-42".to_string(),
        episode: "8".to_string(),
    };
    assert!(matches!(
        catalog.subtitles_for(&other, Category::Sub),
        Err(FetchError::Malformed(_))
    ));
}

#[test]
fn playlist_parsing_sums_media_segments() {
    let media = "#EXTM3U\n#EXT-X-TARGETDURATION:10\n#EXTINF:9.5,\nseg0.ts\n#EXTINF:10.0,title\nseg1.ts\n#EXT-X-ENDLIST\n";
    assert_eq!(parse_playlist(media).expect("media playlist"), Some(19.5));

    let master = "#EXTM3U\n#EXT-X-STREAM-INF:BANDWIDTH=800000\nlow.m3u8\n";
    assert_eq!(parse_playlist(master).expect("master playlist"), None);
}

#[test]
fn playlist_parsing_flags_integrity_errors() {
    let err = parse_playlist("<html>Access denied</html>").expect_err("not a playlist");
    assert_eq!(err.kind, BackendErrorKind::Manifest);
    assert!(err.fatal);

    let err = parse_playlist("#EXTM3U\n#EXT-X-ENDLIST\n").expect_err("no segments");
    assert_eq!(err.kind, BackendErrorKind::Manifest);
}

#[test]
fn fetch_errors_map_to_backend_kinds() {
    let blocked = FetchError::Status {
        status: 403,
        body: String::new(),
        attempts: 1,
    };
    assert_eq!(backend_error_from_fetch(&blocked).kind, BackendErrorKind::Manifest);

    let overloaded = FetchError::Status {
        status: 503,
        body: String::new(),
        attempts: 1,
    };
    assert_eq!(backend_error_from_fetch(&overloaded).kind, BackendErrorKind::Network);

    let timeout = FetchError::Transport {
        detail: "timed out".to_string(),
        attempts: 1,
    };
    assert_eq!(backend_error_from_fetch(&timeout).kind, BackendErrorKind::Network);
    assert_eq!(
        backend_error_from_fetch(&FetchError::Decode("bad utf-8".to_string())).kind,
        BackendErrorKind::Media
    );
}

#[test]
fn format_clock_handles_hours_and_garbage() {
    assert_eq!(format_clock(85.0), "1:25");
    assert_eq!(format_clock(3725.4), "1:02:05");
    assert_eq!(format_clock(-4.0), "0:00");
    assert_eq!(format_clock(f64::NAN), "0:00");
}

#[test]
fn truncate_adds_ellipsis_only_when_needed() {
    assert_eq!(truncate("alpha", 16), "alpha");
    assert_eq!(truncate("https://very-long.test/path", 10), "https:/...");
}

#[test]
fn describe_event_covers_user_facing_messages() {
    assert_eq!(
        describe_event(&SessionEvent::State(MediaState::Error {
            reason: "playlist blocked".to_string()
        })),
        "error: playlist blocked"
    );
    assert_eq!(
        describe_event(&SessionEvent::Exhausted { attempted: 3 }),
        "all 3 source(s) failed; retry or pick a server"
    );
    assert_eq!(
        describe_event(&SessionEvent::SkipAvailable(Some(SkipInterval {
            kind: SkipKind::Intro,
            start_seconds: 0.0,
            end_seconds: 85.0,
        }))),
        "skip intro available until 1:25"
    );
    let checkpoint = Checkpoint {
        position_seconds: 1420.0,
        duration_seconds: Some(1420.0),
        completed: true,
        timestamp: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).single().expect("timestamp"),
    };
    assert_eq!(
        describe_event(&SessionEvent::CheckpointWritten(checkpoint)),
        "checkpoint at 23:40 (completed)"
    );
}
