use std::collections::HashSet;

use super::{Category, RawCandidate, Source, SourceKey, Variant};

pub(crate) fn normalize_sources(
    variants: &[Variant],
    category: Category,
    dedupe_languages: bool,
) -> Vec<Source> {
    let candidates = variants
        .iter()
        .filter(|variant| variant.category == category)
        .flat_map(|variant| variant.candidates.iter())
        .filter_map(source_from_candidate);

    let (direct, embed): (Vec<Source>, Vec<Source>) =
        candidates.partition(|source| !source.is_embed_only);

    let mut seen_keys: HashSet<SourceKey> = HashSet::new();
    let mut seen_languages: HashSet<String> = HashSet::new();
    let mut out = Vec::new();
    for source in direct.into_iter().chain(embed) {
        if !seen_keys.insert(source.key()) {
            continue;
        }
        if dedupe_languages
            && let Some(code) = source.language_code.as_deref()
            && !seen_languages.insert(code.to_string())
        {
            continue;
        }
        out.push(source);
    }
    out
}

fn source_from_candidate(candidate: &RawCandidate) -> Option<Source> {
    let url = candidate.url.as_deref()?.trim();
    if url.is_empty() {
        return None;
    }
    let server = match candidate.server.trim() {
        "" => "unknown".to_string(),
        name => name.to_string(),
    };

    Some(Source {
        server,
        url: url.to_string(),
        is_segmented: candidate.segmented || looks_like_manifest(url),
        quality_label: non_empty(candidate.quality.as_deref()),
        language_label: non_empty(candidate.language.as_deref()),
        language_code: non_empty(candidate.language_code.as_deref())
            .map(|code| code.to_ascii_lowercase()),
        is_embed_only: candidate.embed_only,
    })
}

fn looks_like_manifest(url: &str) -> bool {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.to_ascii_lowercase().ends_with(".m3u8")
}

fn non_empty(raw: Option<&str>) -> Option<String> {
    let value = raw?.trim();
    (!value.is_empty()).then(|| value.to_string())
}
