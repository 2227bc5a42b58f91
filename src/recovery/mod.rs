// Best-effort recovery of structured results from raw model output.
//
// The model is asked for bare JSON but routinely wraps it in markdown fences,
// truncates it, or answers in prose. Every parser here is total: it always
// returns a value satisfying its schema's required fields, and it is
// deterministic for a given input. Generation failures degrade to usable
// content, never to an error.

use serde::{Deserialize, Serialize};

// ============================================
// Result Types (one per endpoint)
// ============================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplainResult {
    pub kid: String,
    pub parent: String,
    pub fun: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoryResult {
    pub title: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub moral: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BedtimeResult {
    pub title: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub poem: Option<String>,
    pub sleepy_message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LearningResult {
    pub answer: String,
    pub fun_fact: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activity: Option<String>,
    pub next_questions: Vec<String>,
}

// ============================================
// Fallback Copy
// ============================================

const EXPLAIN_FALLBACK_KID: &str =
    "That's a great question! Let me think about how to explain this in a simple way.";
const EXPLAIN_FALLBACK_PARENT: &str =
    "This is an interesting topic that requires some context to explain properly.";
const EXPLAIN_FALLBACK_FUN: &str =
    "Here's something fun to think about related to your question!";

const STORY_FALLBACK_TITLE: &str = "A Wonderful Story";
const STORY_FALLBACK_CONTENT: &str =
    "Once upon a time, a little story got lost on its way here. Please try again!";
const STORY_FALLBACK_MORAL: &str = "Every story has something to teach us!";

const BEDTIME_FALLBACK_TITLE: &str = "A Peaceful Dream";
const BEDTIME_FALLBACK_CONTENT: &str =
    "Close your eyes and picture a soft, starry sky. Your bedtime story will be ready soon.";
const BEDTIME_FALLBACK_SLEEPY: &str = "Sweet dreams! 🌙";

const LEARNING_FALLBACK_ANSWER: &str =
    "That's a wonderful question! Let's explore it together next time.";
const LEARNING_FALLBACK_FUN_FACT: &str = "Learning is always an adventure!";
const LEARNING_FALLBACK_QUESTIONS: [&str; 2] = [
    "What else would you like to know?",
    "Can you think of more questions about this topic?",
];

// ============================================
// Shared Cleanup Helpers
// ============================================

/// Strip a leading markdown code fence (with or without a language tag) and
/// its closing fence. Text without a fence passes through untouched.
fn strip_code_fence(raw: &str) -> String {
    let trimmed = raw.trim();
    if !trimmed.starts_with("```") {
        return trimmed.to_string();
    }

    // Drop the opening fence line (``` or ```json etc.)
    let body = match trimmed.find('\n') {
        Some(idx) => &trimmed[idx + 1..],
        None => trimmed.trim_start_matches('`'),
    };

    let body = body.trim_end();
    let body = body.strip_suffix("```").unwrap_or(body);
    body.trim().to_string()
}

/// Unescape the two escape sequences the model actually emits inside
/// salvaged string fragments.
fn unescape_fragment(s: &str) -> String {
    s.replace("\\n", "\n").replace("\\\"", "\"")
}

/// Find the quoted value following `"key":` in raw text. Handles escaped
/// quotes inside the value; returns None when the key or a complete quoted
/// value is missing.
fn extract_quoted_value(text: &str, key: &str) -> Option<String> {
    let needle = format!("\"{}\"", key);
    let key_pos = text.find(&needle)?;
    let after_key = &text[key_pos + needle.len()..];
    let colon = after_key.find(':')?;
    let after_colon = after_key[colon + 1..].trim_start();
    let rest = after_colon.strip_prefix('"')?;

    let mut value = String::new();
    let mut chars = rest.chars();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some('n') => value.push('\n'),
                Some('"') => value.push('"'),
                Some('t') => value.push('\t'),
                Some(other) => value.push(other),
                None => break,
            },
            '"' => {
                let trimmed = value.trim();
                if trimmed.is_empty() {
                    return None;
                }
                return Some(trimmed.to_string());
            }
            _ => value.push(c),
        }
    }

    // Unterminated value (truncated output): keep what we have.
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Remove residual JSON structure from prose: lone braces, `"key":` prefixes,
/// trailing quote-comma fragments. Applied line-wise over the raw text.
fn scrub_json_noise(text: &str) -> String {
    let mut out = Vec::new();
    for line in text.lines() {
        let trimmed = line.trim();
        if trimmed == "{" || trimmed == "}" || trimmed == "{}" {
            out.push(String::new());
            continue;
        }

        let mut cleaned = trimmed.to_string();

        // `"title": "...` prefixes
        if cleaned.starts_with('"') {
            if let Some(colon) = cleaned.find("\":") {
                cleaned = cleaned[colon + 2..].trim_start().to_string();
                cleaned = cleaned.strip_prefix('"').unwrap_or(&cleaned).to_string();
            }
        }

        // trailing `",` or `"` left over from a JSON value
        for suffix in ["\",", "\""] {
            if let Some(stripped) = cleaned.strip_suffix(suffix) {
                cleaned = stripped.to_string();
                break;
            }
        }

        out.push(unescape_fragment(&cleaned));
    }

    collapse_paragraphs(&out.join("\n"))
}

/// Collapse runs of blank lines into single paragraph breaks.
fn collapse_paragraphs(text: &str) -> String {
    text.split("\n\n")
        .flat_map(|chunk| chunk.split("\n \n"))
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Salvage the primary text field from unparseable output: prefer the quoted
/// value of a `content`-like key, otherwise the whole text scrubbed of JSON
/// punctuation.
fn salvage_primary(raw: &str, key: &str) -> String {
    if let Some(value) = extract_quoted_value(raw, key) {
        return value;
    }
    scrub_json_noise(&strip_code_fence(raw))
}

/// Look for a quoted title in the first few lines of raw output.
fn salvage_title(raw: &str) -> Option<String> {
    for line in raw.lines().filter(|l| !l.trim().is_empty()).take(3) {
        if !line.contains("title") && !line.contains("Title") {
            continue;
        }
        let mut candidates = line.split('"').skip(1).step_by(2).map(str::trim);
        // Skip the key itself when the line is a JSON fragment.
        let found = candidates.find(|c| !c.is_empty() && !c.eq_ignore_ascii_case("title"));
        if let Some(title) = found {
            return Some(title.to_string());
        }
    }
    None
}

fn non_empty(s: String, fallback: &str) -> String {
    let trimmed = s.trim();
    if trimmed.is_empty() {
        fallback.to_string()
    } else {
        trimmed.to_string()
    }
}

// ============================================
// Per-Endpoint Parsers
// ============================================

/// Recover an explain result. The explain fallback is fully synthetic: the
/// raw text is a single prompt's answer split three ways, so a prose reply
/// cannot be mapped onto the schema.
pub fn parse_explain(raw: &str) -> ExplainResult {
    let cleaned = strip_code_fence(raw);

    #[derive(Deserialize)]
    struct RawExplain {
        kid: Option<String>,
        parent: Option<String>,
        fun: Option<String>,
    }

    if let Ok(parsed) = serde_json::from_str::<RawExplain>(&cleaned) {
        if let (Some(kid), Some(parent), Some(fun)) = (parsed.kid, parsed.parent, parsed.fun) {
            if !kid.trim().is_empty() && !parent.trim().is_empty() {
                return ExplainResult {
                    kid: kid.trim().to_string(),
                    parent: parent.trim().to_string(),
                    fun: non_empty(fun, EXPLAIN_FALLBACK_FUN),
                };
            }
        }
    }

    ExplainResult {
        kid: EXPLAIN_FALLBACK_KID.to_string(),
        parent: EXPLAIN_FALLBACK_PARENT.to_string(),
        fun: EXPLAIN_FALLBACK_FUN.to_string(),
    }
}

/// Recover a story result, salvaging title and content from prose output.
pub fn parse_story(raw: &str) -> StoryResult {
    let cleaned = strip_code_fence(raw);

    #[derive(Deserialize)]
    struct RawStory {
        title: Option<String>,
        content: Option<String>,
        moral: Option<String>,
    }

    if let Ok(parsed) = serde_json::from_str::<RawStory>(&cleaned) {
        if let (Some(title), Some(content)) = (&parsed.title, &parsed.content) {
            if !title.trim().is_empty() && !content.trim().is_empty() {
                return StoryResult {
                    title: title.trim().to_string(),
                    content: content.trim().to_string(),
                    moral: parsed
                        .moral
                        .map(|m| m.trim().to_string())
                        .filter(|m| !m.is_empty()),
                };
            }
        }
    }

    let title = salvage_title(raw).unwrap_or_else(|| STORY_FALLBACK_TITLE.to_string());
    let content = non_empty(salvage_primary(raw, "content"), STORY_FALLBACK_CONTENT);

    StoryResult {
        title,
        content,
        moral: Some(STORY_FALLBACK_MORAL.to_string()),
    }
}

/// Recover a bedtime result. The sleepy message is always present.
pub fn parse_bedtime(raw: &str) -> BedtimeResult {
    let cleaned = strip_code_fence(raw);

    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct RawBedtime {
        title: Option<String>,
        content: Option<String>,
        poem: Option<String>,
        sleepy_message: Option<String>,
    }

    if let Ok(parsed) = serde_json::from_str::<RawBedtime>(&cleaned) {
        if let (Some(title), Some(content)) = (&parsed.title, &parsed.content) {
            if !title.trim().is_empty() && !content.trim().is_empty() {
                return BedtimeResult {
                    title: title.trim().to_string(),
                    content: content.trim().to_string(),
                    poem: parsed
                        .poem
                        .map(|p| p.trim().to_string())
                        .filter(|p| !p.is_empty()),
                    sleepy_message: non_empty(
                        parsed.sleepy_message.unwrap_or_default(),
                        BEDTIME_FALLBACK_SLEEPY,
                    ),
                };
            }
        }
    }

    let title = salvage_title(raw).unwrap_or_else(|| BEDTIME_FALLBACK_TITLE.to_string());
    let content = non_empty(salvage_primary(raw, "content"), BEDTIME_FALLBACK_CONTENT);

    BedtimeResult {
        title,
        content,
        poem: None,
        sleepy_message: BEDTIME_FALLBACK_SLEEPY.to_string(),
    }
}

/// Recover a learning result. A prose reply becomes the answer verbatim.
pub fn parse_learning(raw: &str) -> LearningResult {
    let cleaned = strip_code_fence(raw);

    #[derive(Deserialize)]
    #[serde(rename_all = "camelCase")]
    struct RawLearning {
        answer: Option<String>,
        fun_fact: Option<String>,
        activity: Option<String>,
        next_questions: Option<Vec<String>>,
    }

    if let Ok(parsed) = serde_json::from_str::<RawLearning>(&cleaned) {
        if let Some(answer) = &parsed.answer {
            if !answer.trim().is_empty() {
                return LearningResult {
                    answer: answer.trim().to_string(),
                    fun_fact: non_empty(
                        parsed.fun_fact.unwrap_or_default(),
                        LEARNING_FALLBACK_FUN_FACT,
                    ),
                    activity: parsed
                        .activity
                        .map(|a| a.trim().to_string())
                        .filter(|a| !a.is_empty()),
                    next_questions: match parsed.next_questions {
                        Some(qs) if !qs.is_empty() => qs,
                        _ => LEARNING_FALLBACK_QUESTIONS
                            .iter()
                            .map(|q| q.to_string())
                            .collect(),
                    },
                };
            }
        }
    }

    let answer = non_empty(salvage_primary(raw, "answer"), LEARNING_FALLBACK_ANSWER);

    LearningResult {
        answer,
        fun_fact: LEARNING_FALLBACK_FUN_FACT.to_string(),
        activity: None,
        next_questions: LEARNING_FALLBACK_QUESTIONS
            .iter()
            .map(|q| q.to_string())
            .collect(),
    }
}

// ============================================
// Tests
// ============================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explain_parses_fenced_json() {
        let raw = "```json\n{\"kid\":\"a\",\"parent\":\"b\",\"fun\":\"c\"}\n```";
        let result = parse_explain(raw);
        assert_eq!(result.kid, "a");
        assert_eq!(result.parent, "b");
        assert_eq!(result.fun, "c");
    }

    #[test]
    fn explain_parses_bare_fence() {
        let raw = "```\n{\"kid\":\"a\",\"parent\":\"b\",\"fun\":\"c\"}\n```";
        assert_eq!(parse_explain(raw).kid, "a");
    }

    #[test]
    fn explain_falls_back_on_prose() {
        let result = parse_explain("The sky is blue because of light scattering.");
        assert_eq!(result.kid, EXPLAIN_FALLBACK_KID);
        assert_eq!(result.parent, EXPLAIN_FALLBACK_PARENT);
        assert!(!result.fun.is_empty());
    }

    #[test]
    fn story_parses_valid_json() {
        let raw = r#"{"title":"The Moon Cat","content":"Once there was a cat.","moral":"Be kind."}"#;
        let result = parse_story(raw);
        assert_eq!(result.title, "The Moon Cat");
        assert_eq!(result.content, "Once there was a cat.");
        assert_eq!(result.moral.as_deref(), Some("Be kind."));
    }

    #[test]
    fn story_salvages_prose_without_throwing() {
        let raw = "Here's a story: Once upon a time...";
        let result = parse_story(raw);
        assert!(!result.title.is_empty());
        assert!(result.content.contains("Once upon a time"));
    }

    #[test]
    fn story_salvages_content_key_from_truncated_json() {
        let raw = r#"{"title": "Sky Friends", "content": "Two clouds met.\nThey became friends"#;
        let result = parse_story(raw);
        assert_eq!(result.content, "Two clouds met.\nThey became friends");
        assert_eq!(result.title, "Sky Friends");
    }

    #[test]
    fn story_scrubs_json_punctuation_from_fragments() {
        let raw = "{\n\"title\": \"Lost\",\n\"content\": \"A hedgehog\nwandered home.\"\n}";
        // Broken across lines so strict parsing fails; the content key still
        // yields the value.
        let result = parse_story(raw);
        assert!(result.content.contains("A hedgehog"));
        assert!(!result.content.contains('{'));
        assert!(!result.content.contains("\"content\""));
    }

    #[test]
    fn story_empty_input_yields_placeholders() {
        let result = parse_story("");
        assert_eq!(result.title, STORY_FALLBACK_TITLE);
        assert_eq!(result.content, STORY_FALLBACK_CONTENT);
        assert!(result.moral.is_some());
    }

    #[test]
    fn story_is_idempotent_on_its_own_output() {
        let first = parse_story("Once upon a time there was a brave snail.");
        let serialized = serde_json::to_string(&first).unwrap();
        let second = parse_story(&serialized);
        assert_eq!(first, second);
    }

    #[test]
    fn explain_is_idempotent_on_its_own_output() {
        let raw = "```json\n{\"kid\":\"a\",\"parent\":\"b\",\"fun\":\"c\"}\n```";
        let first = parse_explain(raw);
        let serialized = serde_json::to_string(&first).unwrap();
        assert_eq!(parse_explain(&serialized), first);
    }

    #[test]
    fn bedtime_fills_missing_sleepy_message() {
        let raw = r#"{"title":"Night Sky","content":"Stars twinkled softly."}"#;
        let result = parse_bedtime(raw);
        assert_eq!(result.title, "Night Sky");
        assert_eq!(result.sleepy_message, BEDTIME_FALLBACK_SLEEPY);
        assert!(result.poem.is_none());
    }

    #[test]
    fn bedtime_keeps_optional_poem() {
        let raw = r#"{"title":"T","content":"C","poem":"Hush now","sleepyMessage":"Night night"}"#;
        let result = parse_bedtime(raw);
        assert_eq!(result.poem.as_deref(), Some("Hush now"));
        assert_eq!(result.sleepy_message, "Night night");
    }

    #[test]
    fn bedtime_prose_becomes_content() {
        let result = parse_bedtime("The little owl closed her eyes and drifted off.");
        assert!(result.content.contains("little owl"));
        assert_eq!(result.title, BEDTIME_FALLBACK_TITLE);
        assert!(!result.sleepy_message.is_empty());
    }

    #[test]
    fn learning_parses_camel_case_fields() {
        let raw = r#"{"answer":"Plants eat light.","funFact":"Leaves are solar panels!","nextQuestions":["Why green?"]}"#;
        let result = parse_learning(raw);
        assert_eq!(result.answer, "Plants eat light.");
        assert_eq!(result.fun_fact, "Leaves are solar panels!");
        assert_eq!(result.next_questions, vec!["Why green?"]);
    }

    #[test]
    fn learning_prose_becomes_answer_with_default_questions() {
        let result = parse_learning("Photosynthesis is how plants make food from sunlight.");
        assert!(result.answer.contains("Photosynthesis"));
        assert_eq!(result.fun_fact, LEARNING_FALLBACK_FUN_FACT);
        assert_eq!(result.next_questions.len(), 2);
    }

    #[test]
    fn learning_empty_input_yields_placeholder_answer() {
        let result = parse_learning("   ");
        assert_eq!(result.answer, LEARNING_FALLBACK_ANSWER);
        assert!(!result.next_questions.is_empty());
    }

    #[test]
    fn fence_with_language_tag_is_stripped() {
        assert_eq!(strip_code_fence("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fence("```\nhello\n```"), "hello");
        assert_eq!(strip_code_fence("plain text"), "plain text");
    }

    #[test]
    fn quoted_value_extraction_handles_escapes() {
        let text = r#"{"content": "line one\nline \"two\""}"#;
        let value = extract_quoted_value(text, "content").unwrap();
        assert_eq!(value, "line one\nline \"two\"");
    }

    #[test]
    fn blank_runs_collapse_to_single_breaks() {
        let text = "one\n\n\n\ntwo\n\nthree";
        assert_eq!(collapse_paragraphs(text), "one\n\ntwo\n\nthree");
    }
}
