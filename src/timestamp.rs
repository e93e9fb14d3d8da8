//! Timestamp mark protocol shared by summaries, chat replies, and the frame
//! extractor.
//!
//! A mark is a clock label followed by a navigation directive carrying an
//! integer second count: `[12:34](#ts=754)` jumps playback only, while
//! `[12:34](#tsv=754)` additionally requests an extracted key frame. The same
//! grammar is used on the generation side (prompt contract) and the consumer
//! side (renderer and frame extractor).

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;
use tracing::warn;

/// Whether a mark is navigation-only or also requests a frame preview.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarkKind {
    Plain,
    Visual,
}

/// One timestamp annotation found in generated markdown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimestampMark {
    pub kind: MarkKind,
    pub seconds: u32,
}

fn mark_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        // Clock label, then `#tsv=`/`#ts=` with integer seconds. Anything that
        // does not match exactly (fractional seconds, unknown directive) is
        // simply not a mark.
        Regex::new(r"\[([0-9]+(?::[0-9]{2})+)\]\(#(tsv|ts)=([0-9]+)\)").unwrap()
    })
}

/// Render seconds as a clock label: `M:SS` under an hour, `H:MM:SS` above.
pub fn clock_label(seconds: u32) -> String {
    let hours = seconds / 3600;
    let minutes = (seconds % 3600) / 60;
    let secs = seconds % 60;
    if hours > 0 {
        format!("{}:{:02}:{:02}", hours, minutes, secs)
    } else {
        format!("{}:{:02}", minutes, secs)
    }
}

/// Format a mark the way the LLM is instructed to write them.
pub fn format_mark(kind: MarkKind, seconds: u32) -> String {
    let directive = match kind {
        MarkKind::Plain => "ts",
        MarkKind::Visual => "tsv",
    };
    format!("[{}](#{}={})", clock_label(seconds), directive, seconds)
}

/// Scan text for marks, in document order. Malformed marks are skipped.
pub fn parse_marks(text: &str) -> Vec<TimestampMark> {
    mark_regex()
        .captures_iter(text)
        .filter_map(|caps| {
            let kind = match &caps[2] {
                "ts" => MarkKind::Plain,
                "tsv" => MarkKind::Visual,
                _ => return None,
            };
            let seconds: u32 = caps[3].parse().ok()?;
            Some(TimestampMark { kind, seconds })
        })
        .collect()
}

/// Seconds values of all visual marks in the text, in document order.
pub fn visual_seconds(text: &str) -> Vec<u32> {
    parse_marks(text)
        .into_iter()
        .filter(|m| m.kind == MarkKind::Visual)
        .map(|m| m.seconds)
        .collect()
}

/// Sort ascending and greedily drop any timestamp within `threshold` seconds
/// of the previously kept one.
pub fn dedup_within(mut seconds: Vec<u32>, threshold: u32) -> Vec<u32> {
    seconds.sort_unstable();
    let mut kept: Vec<u32> = Vec::with_capacity(seconds.len());
    for s in seconds {
        match kept.last() {
            Some(&prev) if s.saturating_sub(prev) < threshold => {}
            _ => kept.push(s),
        }
    }
    kept
}

/// Downgrade marks whose seconds value lies beyond the known media range to
/// their bare clock label. The LLM is only asked not to invent timestamps;
/// this pass enforces it.
pub fn strip_out_of_range(text: &str, max_seconds: u32) -> String {
    let mut dropped = 0usize;
    let out = mark_regex()
        .replace_all(text, |caps: &regex::Captures<'_>| {
            let secs: u32 = caps[3].parse().unwrap_or(0);
            if secs > max_seconds {
                dropped += 1;
                caps[1].to_string()
            } else {
                caps[0].to_string()
            }
        })
        .into_owned();
    if dropped > 0 {
        warn!(
            "Dropped {} timestamp marks beyond {}s from generated text",
            dropped, max_seconds
        );
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_label() {
        assert_eq!(clock_label(0), "0:00");
        assert_eq!(clock_label(65), "1:05");
        assert_eq!(clock_label(754), "12:34");
        assert_eq!(clock_label(3661), "1:01:01");
    }

    #[test]
    fn test_mark_round_trip() {
        for seconds in [0u32, 1, 59, 65, 754, 3661, 86399] {
            for kind in [MarkKind::Plain, MarkKind::Visual] {
                let text = format!("intro {} outro", format_mark(kind, seconds));
                let marks = parse_marks(&text);
                assert_eq!(marks, vec![TimestampMark { kind, seconds }]);
            }
        }
    }

    #[test]
    fn test_parse_mixed_kinds_in_order() {
        let text = "Start [0:00](#ts=0), key moment [1:05](#tsv=65), later [2:10](#ts=130).";
        let marks = parse_marks(text);
        assert_eq!(marks.len(), 3);
        assert_eq!(marks[0], TimestampMark { kind: MarkKind::Plain, seconds: 0 });
        assert_eq!(marks[1], TimestampMark { kind: MarkKind::Visual, seconds: 65 });
        assert_eq!(marks[2], TimestampMark { kind: MarkKind::Plain, seconds: 130 });
    }

    #[test]
    fn test_malformed_marks_ignored() {
        // Fractional seconds, unknown directive, missing directive
        let text = "[1:05](#ts=6.5) [1:05](#t=65) [1:05](65) [1:05](#tsx=65)";
        assert!(parse_marks(text).is_empty());
    }

    #[test]
    fn test_plain_marks_request_no_frames() {
        let text = "Hello [0:00](#ts=0), world [1:05](#ts=65)";
        assert!(visual_seconds(text).is_empty());
    }

    #[test]
    fn test_dedup_scenario() {
        assert_eq!(dedup_within(vec![10, 12, 40], 5), vec![10, 40]);
    }

    #[test]
    fn test_dedup_threshold_property() {
        let input = vec![3, 1, 4, 9, 8, 20, 24, 25, 100];
        let kept = dedup_within(input, 5);
        for pair in kept.windows(2) {
            assert!(pair[1] - pair[0] >= 5, "{:?}", kept);
        }
    }

    #[test]
    fn test_dedup_keeps_exact_threshold_gap() {
        assert_eq!(dedup_within(vec![10, 15], 5), vec![10, 15]);
    }

    #[test]
    fn test_strip_out_of_range() {
        let text = "ok [1:05](#tsv=65) bogus [2:00:00](#ts=7200)";
        let out = strip_out_of_range(text, 600);
        assert!(out.contains("[1:05](#tsv=65)"));
        assert!(!out.contains("#ts=7200"));
        assert!(out.contains("2:00:00"));
    }
}
