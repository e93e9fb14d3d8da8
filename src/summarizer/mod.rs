//! Summarization orchestrator.
//!
//! Combines transcript, chapters, and user instructions into one LLM request
//! and parses the bilingual JSON-shaped reply, enforcing the timestamp
//! protocol through the prompt on the way in and a range check on the way
//! out.

pub mod prompt;

use anyhow::Result;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};

use crate::captions::CaptionSegment;
use crate::config::SummarizerConfig;
use crate::llm::{ChatMessage, LLM};
use crate::stream::Chapter;
use crate::timestamp;

/// Primary transcript language, chosen by a cheap character-class heuristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Language {
    English,
    Chinese,
}

/// Markdown bodies produced by one summarize call.
#[derive(Debug, Clone, Default)]
pub struct SummaryBodies {
    pub en: Option<String>,
    pub zh: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SummaryResponse {
    #[serde(default)]
    summary_en: Option<String>,
    #[serde(default)]
    summary_zh: Option<String>,
}

/// Inputs for one summarize call.
#[derive(Debug, Clone)]
pub struct SummarizeInput<'a> {
    pub title: &'a str,
    pub captions: &'a [CaptionSegment],
    pub chapters: &'a [Chapter],
    pub instruction: Option<&'a str>,
    pub visual_all: bool,
}

pub struct Summarizer {
    llm: Option<Arc<dyn LLM>>,
    config: SummarizerConfig,
}

impl Summarizer {
    /// `llm` is `None` when no credential is configured; summaries then
    /// degrade to a clearly labeled placeholder instead of failing.
    pub fn new(llm: Option<Arc<dyn LLM>>, config: SummarizerConfig) -> Self {
        Self { llm, config }
    }

    pub async fn summarize(&self, input: SummarizeInput<'_>) -> Result<SummaryBodies> {
        let language = detect_language(&caption_text_prefix(input.captions, 512));

        let Some(llm) = &self.llm else {
            warn!("No LLM configured, producing placeholder summary");
            return Ok(placeholder(input.title));
        };

        let transcript = build_transcript(input.captions, self.config.max_transcript_chars);
        let anchors = sample_anchors(input.captions, self.config.anchor_samples);

        let messages = vec![
            ChatMessage::system(prompt::system_prompt(language, input.visual_all)),
            ChatMessage::user(prompt::user_message(
                &transcript,
                &anchors,
                input.chapters,
                input.instruction,
            )),
        ];

        let response = llm.chat(messages).await?;
        info!(
            "Summarizer reply received ({} chars, tokens: {:?})",
            response.content.len(),
            response.tokens_used
        );

        let mut bodies = parse_response(&response.content, language);

        // The prompt asks the model not to invent timestamps; verify anyway.
        let max_seconds = media_range_seconds(input.captions, input.chapters);
        bodies.en = bodies
            .en
            .map(|body| timestamp::strip_out_of_range(&body, max_seconds));
        bodies.zh = bodies
            .zh
            .map(|body| timestamp::strip_out_of_range(&body, max_seconds));

        Ok(bodies)
    }
}

/// Classify the transcript's primary language by CJK character ratio over a
/// text prefix.
pub fn detect_language(text: &str) -> Language {
    let mut cjk = 0usize;
    let mut total = 0usize;
    for c in text.chars().filter(|c| !c.is_whitespace()).take(512) {
        total += 1;
        if ('\u{4e00}'..='\u{9fff}').contains(&c) {
            cjk += 1;
        }
    }
    if total > 0 && cjk * 100 / total >= 15 {
        Language::Chinese
    } else {
        Language::English
    }
}

fn caption_text_prefix(captions: &[CaptionSegment], max_chars: usize) -> String {
    let mut text = String::new();
    for seg in captions {
        if text.len() >= max_chars {
            break;
        }
        text.push_str(&seg.text);
        text.push(' ');
    }
    text
}

/// Render captions as `[<seconds>s] <text>` lines, truncated to a bounded
/// prefix to respect request-size limits.
pub(crate) fn build_transcript(captions: &[CaptionSegment], max_chars: usize) -> String {
    let mut transcript = String::new();
    for seg in captions {
        let line = format!("[{}s] {}\n", seg.start.floor() as u64, seg.text);
        if transcript.len() + line.len() > max_chars {
            transcript.push_str("[transcript truncated]\n");
            break;
        }
        transcript.push_str(&line);
    }
    transcript
}

/// Evenly spaced caption timestamps offered to the model as concrete anchor
/// points it is allowed to use.
fn sample_anchors(captions: &[CaptionSegment], max_samples: usize) -> Vec<u32> {
    if captions.is_empty() || max_samples == 0 {
        return Vec::new();
    }

    let step = (captions.len() + max_samples - 1) / max_samples;
    let mut anchors: Vec<u32> = captions
        .iter()
        .step_by(step.max(1))
        .map(|seg| seg.start.floor() as u32)
        .collect();
    anchors.dedup();
    anchors
}

/// Last known moment in the source material, for mark range validation.
fn media_range_seconds(captions: &[CaptionSegment], chapters: &[Chapter]) -> u32 {
    let caption_end = captions
        .last()
        .map(|seg| (seg.start + seg.dur).ceil() as u32)
        .unwrap_or(0);
    let chapter_end = chapters
        .iter()
        .map(|c| c.end.ceil() as u32)
        .max()
        .unwrap_or(0);
    caption_end.max(chapter_end)
}

/// Parse the LLM reply. Code fences are tolerated; an unparsable reply is
/// used as a best-effort single-language body rather than discarded.
fn parse_response(content: &str, primary: Language) -> SummaryBodies {
    let stripped = strip_code_fence(content);

    if let Ok(parsed) = serde_json::from_str::<SummaryResponse>(stripped) {
        if parsed.summary_en.is_some() || parsed.summary_zh.is_some() {
            return SummaryBodies {
                en: parsed.summary_en.filter(|s| !s.trim().is_empty()),
                zh: parsed.summary_zh.filter(|s| !s.trim().is_empty()),
            };
        }
    }

    warn!("Summarizer reply was not the expected JSON shape, using raw text");
    let raw = content.trim().to_string();
    match primary {
        Language::English => SummaryBodies {
            en: Some(raw),
            zh: None,
        },
        Language::Chinese => SummaryBodies {
            en: None,
            zh: Some(raw),
        },
    }
}

fn strip_code_fence(content: &str) -> &str {
    let trimmed = content.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Drop the fence line (which may carry a language tag) and the closing fence
    let body = rest.split_once('\n').map(|(_, b)| b).unwrap_or(rest);
    body.trim_end().trim_end_matches("```").trim()
}

/// Clearly labeled stand-in produced when no LLM credential is configured,
/// so the rest of the pipeline remains exercisable.
fn placeholder(title: &str) -> SummaryBodies {
    SummaryBodies {
        en: Some(format!(
            "# {}\n\n_Placeholder summary: no LLM credential is configured._",
            title
        )),
        zh: Some(format!(
            "# {}\n\n_占位总结：未配置 LLM 凭证。_",
            title
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(start: f64, dur: f64, text: &str) -> CaptionSegment {
        CaptionSegment {
            start,
            dur,
            text: text.to_string(),
        }
    }

    #[test]
    fn test_detect_language_english() {
        assert_eq!(
            detect_language("so today we're going to look at ownership"),
            Language::English
        );
    }

    #[test]
    fn test_detect_language_chinese() {
        assert_eq!(
            detect_language("今天我们来讲一下所有权的概念，这是个重要的话题"),
            Language::Chinese
        );
    }

    #[test]
    fn test_detect_language_mixed_below_threshold() {
        // A couple of CJK characters inside mostly English text
        assert_eq!(
            detect_language("the word 你好 appears in this otherwise english transcript somewhere"),
            Language::English
        );
    }

    #[test]
    fn test_build_transcript_truncates() {
        let captions: Vec<CaptionSegment> =
            (0..1000).map(|i| seg(i as f64, 1.0, "some caption text here")).collect();
        let transcript = build_transcript(&captions, 500);
        assert!(transcript.len() <= 500 + "[transcript truncated]\n".len());
        assert!(transcript.ends_with("[transcript truncated]\n"));
        assert!(transcript.starts_with("[0s] "));
    }

    #[test]
    fn test_sample_anchors_bounded_and_ordered() {
        let captions: Vec<CaptionSegment> =
            (0..100).map(|i| seg((i * 7) as f64, 1.0, "x")).collect();
        let anchors = sample_anchors(&captions, 10);
        assert!(anchors.len() <= 10);
        assert!(anchors.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(anchors[0], 0);
    }

    #[test]
    fn test_sample_anchors_small_input() {
        let captions = vec![seg(0.0, 1.0, "a"), seg(65.0, 1.0, "b")];
        assert_eq!(sample_anchors(&captions, 40), vec![0, 65]);
    }

    #[test]
    fn test_parse_response_plain_json() {
        let content = r##"{"summary_en": "# Hi", "summary_zh": "# 你好"}"##;
        let bodies = parse_response(content, Language::English);
        assert_eq!(bodies.en.as_deref(), Some("# Hi"));
        assert_eq!(bodies.zh.as_deref(), Some("# 你好"));
    }

    #[test]
    fn test_parse_response_fenced_json() {
        let content = "```json\n{\"summary_en\": \"# Hi\"}\n```";
        let bodies = parse_response(content, Language::English);
        assert_eq!(bodies.en.as_deref(), Some("# Hi"));
        assert!(bodies.zh.is_none());
    }

    #[test]
    fn test_parse_response_falls_back_to_raw_text() {
        let content = "Here is your summary without any JSON.";
        let bodies = parse_response(content, Language::Chinese);
        assert!(bodies.en.is_none());
        assert_eq!(bodies.zh.as_deref(), Some(content));
    }

    #[test]
    fn test_media_range_covers_chapters() {
        let captions = vec![seg(0.0, 5.0, "a")];
        let chapters = vec![Chapter {
            title: "outro".to_string(),
            start: 100.0,
            end: 160.0,
        }];
        assert_eq!(media_range_seconds(&captions, &chapters), 160);
    }

    #[tokio::test]
    async fn test_summarize_without_llm_yields_placeholder() {
        let summarizer = Summarizer::new(None, SummarizerConfig::default());
        let captions = vec![seg(0.0, 1.0, "hello")];
        let bodies = summarizer
            .summarize(SummarizeInput {
                title: "Test Video",
                captions: &captions,
                chapters: &[],
                instruction: None,
                visual_all: false,
            })
            .await
            .unwrap();

        assert!(bodies.en.unwrap().contains("Placeholder summary"));
        assert!(bodies.zh.unwrap().contains("占位总结"));
    }
}
