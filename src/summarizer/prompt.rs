//! System and user prompt builders for summarization and chat.
//!
//! The prompts are where the timestamp-mark contract is communicated to the
//! model: the mark grammar, the two kinds, and the rule that seconds values
//! must come from the transcript or chapter boundaries, never be invented.

use super::Language;
use crate::stream::Chapter;

const MARK_RULES_EN: &str = r#"Timestamp rules:
- Reference moments with markdown marks: [M:SS](#ts=SECONDS) for a plain jump link, [M:SS](#tsv=SECONDS) for a key visual moment that deserves a frame preview.
- SECONDS is the integer second count; the clock label must match it.
- Only use SECONDS values that appear in the transcript timestamps or chapter boundaries below. Never invent a timestamp.
"#;

const MARK_RULES_ZH: &str = r#"时间戳规则：
- 用 markdown 标记引用时刻：[M:SS](#ts=SECONDS) 表示普通跳转链接，[M:SS](#tsv=SECONDS) 表示值得截图预览的关键画面。
- SECONDS 是整数秒数，时钟标签必须与之对应。
- SECONDS 只能取自下方字幕时间戳或章节边界，绝不能编造时间戳。
"#;

/// System prompt for the summarize call, selected by primary language.
pub fn system_prompt(language: Language, visual_all: bool) -> String {
    let visual_rule_en = if visual_all {
        "Mark every timestamp reference as visual ([M:SS](#tsv=SECONDS))."
    } else {
        "Mark only the most important visual moments as visual; use plain marks elsewhere."
    };
    let visual_rule_zh = if visual_all {
        "所有时间戳引用都使用 visual 标记（[M:SS](#tsv=SECONDS)）。"
    } else {
        "只对最重要的画面时刻使用 visual 标记，其余使用普通标记。"
    };

    match language {
        Language::English => format!(
            r#"You are a video content summarizer. Produce a structured bilingual markdown summary of the transcript you are given.

Output ONLY valid JSON with this exact shape (no markdown fences, no commentary):
{{"summary_en": "<English markdown summary>", "summary_zh": "<Chinese markdown summary>"}}

Each summary should open with a one-paragraph overview, then a section per topic with timestamp marks at the moments discussed.

{mark_rules}- {visual_rule}"#,
            mark_rules = MARK_RULES_EN,
            visual_rule = visual_rule_en,
        ),
        Language::Chinese => format!(
            r#"你是一个视频内容总结助手。请为给定的字幕生成结构化的双语 markdown 总结。

只输出符合以下结构的 JSON（不要 markdown 代码块，不要额外说明）：
{{"summary_zh": "<中文 markdown 总结>", "summary_en": "<英文 markdown 总结>"}}

每份总结以一段概述开头，然后按主题分节，并在相应时刻插入时间戳标记。

{mark_rules}- {visual_rule}"#,
            mark_rules = MARK_RULES_ZH,
            visual_rule = visual_rule_zh,
        ),
    }
}

/// User message carrying the transcript prefix, available anchors, chapters,
/// and any custom instruction.
pub fn user_message(
    transcript: &str,
    anchors: &[u32],
    chapters: &[Chapter],
    instruction: Option<&str>,
) -> String {
    let mut message = String::new();

    if !chapters.is_empty() {
        message.push_str("Chapters:\n");
        for chapter in chapters {
            message.push_str(&format!(
                "- [{}s-{}s] {}\n",
                chapter.start.floor() as u64,
                chapter.end.floor() as u64,
                chapter.title
            ));
        }
        message.push('\n');
    }

    if !anchors.is_empty() {
        let list: Vec<String> = anchors.iter().map(|s| s.to_string()).collect();
        message.push_str(&format!(
            "Available timestamp anchors (seconds): {}\n\n",
            list.join(", ")
        ));
    }

    if let Some(instruction) = instruction {
        message.push_str(&format!("Additional instruction from the user: {}\n\n", instruction));
    }

    message.push_str("Transcript:\n");
    message.push_str(transcript);
    message
}

/// System prompt for follow-up chat about an already summarized video. The
/// mark grammar is identical to the summary protocol.
pub fn chat_system_prompt(title: &str, summary: &str, transcript_excerpt: &str) -> String {
    format!(
        r#"You are answering follow-up questions about the video "{title}". Answer in the language of the question.

{mark_rules}
Summary of the video:
{summary}

Transcript excerpt:
{transcript_excerpt}"#,
        title = title,
        mark_rules = MARK_RULES_EN,
        summary = summary,
        transcript_excerpt = transcript_excerpt,
    )
}
