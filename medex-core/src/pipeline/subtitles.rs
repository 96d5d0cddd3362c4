//! Subtitle files to plain text.
//!
//! Handles SRT and WebVTT: cue indices, timing lines and markup are
//! dropped, cue text is joined into one searchable blob.

use regex::Regex;
use std::sync::OnceLock;

fn markup_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // HTML-ish tags plus ASS/SSA override blocks.
    RE.get_or_init(|| Regex::new(r"<[^>]*>|\{\\[^}]*\}").unwrap())
}

/// Extract the spoken text from raw subtitle data. Returns `None` when the
/// result fails sanity: empty, or nothing left after stripping non-word
/// characters.
pub fn text(raw: &str) -> Option<String> {
    let mut lines = Vec::new();
    for line in raw.lines() {
        let line = line.trim().trim_start_matches('\u{feff}');
        if line.is_empty()
            || line.contains("-->")
            || line.eq_ignore_ascii_case("webvtt")
            || line.starts_with("NOTE")
            || line.starts_with("STYLE")
            || is_cue_index(line)
        {
            continue;
        }
        let line = markup_regex().replace_all(line, "");
        let line = line.trim();
        if !line.is_empty() {
            lines.push(line.to_string());
        }
    }

    let text = lines.join("\n");
    if text.is_empty() || !text.chars().any(char::is_alphanumeric) {
        return None;
    }
    Some(text)
}

fn is_cue_index(line: &str) -> bool {
    !line.is_empty() && line.chars().all(|c| c.is_ascii_digit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn srt_cues_reduce_to_their_text() {
        let raw = "\
1
00:00:01,000 --> 00:00:04,000
<i>Hello there.</i>

2
00:00:05,000 --> 00:00:08,000
General Kenobi!
";
        assert_eq!(text(raw).unwrap(), "Hello there.\nGeneral Kenobi!");
    }

    #[test]
    fn vtt_headers_are_dropped() {
        let raw = "\
WEBVTT

00:01.000 --> 00:04.000
First line
";
        assert_eq!(text(raw).unwrap(), "First line");
    }

    #[test]
    fn markup_only_subtitles_fail_sanity() {
        assert!(text("").is_none());
        assert!(text("1\n00:00:01,000 --> 00:00:02,000\n<i></i>\n").is_none());
        assert!(text("1\n00:00:01,000 --> 00:00:02,000\n---\n").is_none());
    }
}
