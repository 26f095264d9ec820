//! Cleanup for mvsep.com stem-separation output filenames.
//!
//! The service names its results like
//! `20240101123456-a1b2c3d4e5-some-song-title_melroformer_mt_4_vocals.mp3`: a timestamp, a hex
//! job id, the hyphenated title, the separation model's artifacts and finally the stem type.
//! Older results append a `[mvsep.com]` marker instead. All of these clean up to
//! `Some Song Title (vocals).mp3`.

use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    // ordered from most to least specific; first match wins. The first capture is the title,
    // the optional second capture the stem type.
    static ref PATTERNS: Vec<Regex> = vec![
        // job-prefixed, model artifacts and stem type
        Regex::new(r"^\d{14}-[a-f0-9]{10}-(.*?)\._(?:.*?_)?(?:mdx\w+|melroformer)_mt_\d+_([a-zA-Z0-9]{1,7})\.mp3$").unwrap(),
        // job-prefixed with stem type and marker
        Regex::new(r"^\d{14}-[a-f0-9]{10}-(.*?)_(?:.*?_)?(?:mdx\w+_mt_\d+_)?([a-zA-Z0-9]{1,7})_\[mvsep\.com\]\.mp3$").unwrap(),
        // job-prefixed with marker, no stem type
        Regex::new(r"^\d{14}-[a-f0-9]{10}-(.*?)_(?:.*?_)?(?:mdx\w+_mt_\d+_)?\[mvsep\.com\]\.mp3$").unwrap(),
        // job-prefixed with marker directly after the title
        Regex::new(r"^\d{14}-[a-f0-9]{10}-(.*?)\[mvsep\.com\]\.mp3$").unwrap(),
        // no job prefix, model artifacts and stem type
        Regex::new(r"^(.*?)\._(?:.*?_)?(?:mdx\w+|melroformer)_mt_\d+_([a-zA-Z0-9]{1,7})\.mp3$").unwrap(),
        // no job prefix, just a trailing stem type
        Regex::new(r"^(.*?)_([a-zA-Z0-9]{1,7})\.mp3$").unwrap(),
    ];
    static ref CONTRACTION: Regex = Regex::new(r"(\w+)-([tT])\b").unwrap();
}

/// Cleans up an mvsep.com output filename, or returns `None` when the name doesn't look like
/// one.
pub fn clean_name(filename: &str) -> Option<String> {
    for pattern in PATTERNS.iter() {
        let caps = match pattern.captures(filename) {
            Some(caps) => caps,
            None => continue,
        };

        let title = caps
            .get(1)
            .map(|m| m.as_str().trim_end_matches(['.', '_', ' ']))
            .unwrap_or_default();
        let stem_type = caps.get(2).map(|m| m.as_str());

        let title = prettify_title(title);
        let cleaned = match stem_type {
            Some(stem) => format!("{} ({}).mp3", title, stem),
            None => format!("{}.mp3", title),
        };

        return Some(sanitize(&cleaned));
    }

    None
}

fn prettify_title(title: &str) -> String {
    // restore contractions mangled into hyphens (don-t -> don't) before turning the remaining
    // hyphens into spaces
    let title = CONTRACTION.replace_all(title, "$1'$2");
    let title = title.replace('-', " ");

    title
        .split_whitespace()
        .map(capitalize)
        .collect::<Vec<_>>()
        .join(" ")
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

fn sanitize(filename: &str) -> String {
    filename
        .chars()
        .map(|c| match c {
            '<' | '>' | ':' | '"' | '/' | '\\' | '|' | '?' | '*' => '_',
            c => c,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixed_with_model_artifacts_and_stem() {
        let cleaned = clean_name("20240101123456-a1b2c3d4e5-some-song._melroformer_mt_4_vocals.mp3");
        assert_eq!(cleaned.as_deref(), Some("Some Song (vocals).mp3"));
    }

    #[test]
    fn prefixed_with_marker_and_stem() {
        let cleaned = clean_name("20240101123456-a1b2c3d4e5-some-song_vocals_[mvsep.com].mp3");
        assert_eq!(cleaned.as_deref(), Some("Some Song (vocals).mp3"));
    }

    #[test]
    fn prefixed_with_marker_only() {
        let cleaned = clean_name("20240101123456-a1b2c3d4e5-some-song_[mvsep.com].mp3");
        assert_eq!(cleaned.as_deref(), Some("Some Song.mp3"));
    }

    #[test]
    fn marker_directly_after_title() {
        let cleaned = clean_name("20240101123456-a1b2c3d4e5-some-song-[mvsep.com].mp3");
        assert_eq!(cleaned.as_deref(), Some("Some Song.mp3"));
    }

    #[test]
    fn unprefixed_with_model_artifacts() {
        let cleaned = clean_name("another-track._mdx23c_mt_2_drums.mp3");
        assert_eq!(cleaned.as_deref(), Some("Another Track (drums).mp3"));
    }

    #[test]
    fn unprefixed_with_trailing_stem() {
        let cleaned = clean_name("another-track_bass.mp3");
        assert_eq!(cleaned.as_deref(), Some("Another Track (bass).mp3"));
    }

    #[test]
    fn contractions_are_restored() {
        let cleaned = clean_name("20240101123456-a1b2c3d4e5-i-don-t-care_vocals_[mvsep.com].mp3");
        assert_eq!(cleaned.as_deref(), Some("I Don't Care (vocals).mp3"));
    }

    #[test]
    fn words_are_capitalized() {
        let cleaned = clean_name("20240101123456-a1b2c3d4e5-SHOUTING-SONG_[mvsep.com].mp3");
        assert_eq!(cleaned.as_deref(), Some("Shouting Song.mp3"));
    }

    #[test]
    fn non_matching_names_left_alone() {
        assert!(clean_name("regular song.mp3").is_none());
        assert!(clean_name("notes.txt").is_none());
    }

    #[test]
    fn hostile_characters_sanitized() {
        let cleaned = clean_name("20240101123456-a1b2c3d4e5-what-is-this?_[mvsep.com].mp3");
        assert_eq!(cleaned.as_deref(), Some("What Is This_.mp3"));
    }
}
