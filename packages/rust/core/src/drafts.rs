//! Draft generation: one service call per topic, normalized to Markdown.

use std::sync::LazyLock;
use std::time::Duration;

use postforge_generation::{DraftRequest, GenerationClient};
use postforge_shared::{
    FaqItem, GenerationConfig, Keyword, PostForgeError, Result, TokenUsage, Topic,
};
use regex::Regex;
use tracing::{debug, info, instrument};

/// Bodies shorter than this are treated as degenerate service output.
pub const MIN_DRAFT_WORDS: usize = 50;

/// A generated article body.
#[derive(Debug, Clone)]
pub struct Draft {
    pub markdown: String,
    /// Empty when FAQ generation is disabled or nothing was found.
    pub faq: Vec<FaqItem>,
    pub token_usage: TokenUsage,
}

/// Generate the article for `topic`.
///
/// Exactly one service call, no retries. HTML output is converted to
/// Markdown. FAQ comes from the service payload when present, otherwise from
/// an FAQ section of the body.
#[instrument(skip_all, fields(topic = %topic.title, keyword = %keyword.text))]
pub async fn generate_draft(
    client: &dyn GenerationClient,
    topic: &Topic,
    keyword: &Keyword,
    config: &GenerationConfig,
    timeout: Duration,
) -> Result<Draft> {
    let request = DraftRequest::new(
        topic.title.clone(),
        topic.angle.clone(),
        topic.outline.clone(),
        keyword.text.clone(),
        config,
    );

    let response = tokio::time::timeout(timeout, client.generate_draft(&request))
        .await
        .map_err(|_| {
            PostForgeError::Generation(format!(
                "draft generation timed out after {}s",
                timeout.as_secs_f32()
            ))
        })??;

    let markdown = if looks_like_html(&response.content) {
        debug!("service returned HTML, converting to markdown");
        html_to_markdown(&response.content)?
    } else {
        response.content.trim().to_string()
    };

    let words = postforge_markdown::count_words(&markdown);
    if words < MIN_DRAFT_WORDS {
        return Err(PostForgeError::ContentTooShort {
            words,
            minimum: MIN_DRAFT_WORDS,
        });
    }

    let faq = if !config.include_faq {
        Vec::new()
    } else {
        match response.faq {
            Some(items) if !items.is_empty() => items,
            _ => extract_faq(&markdown),
        }
    };

    info!(
        words,
        faq_items = faq.len(),
        prompt_tokens = response.token_usage.prompt_tokens,
        completion_tokens = response.token_usage.completion_tokens,
        "draft generated"
    );

    Ok(Draft {
        markdown,
        faq,
        token_usage: response.token_usage,
    })
}

// ---------------------------------------------------------------------------
// HTML → Markdown
// ---------------------------------------------------------------------------

fn looks_like_html(content: &str) -> bool {
    static HTML_START_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?i)\A\s*<(?:!doctype|html|head|body|article|main|section|div|p|h[1-6]|ul|ol)[\s>]")
            .expect("valid regex")
    });
    HTML_START_RE.is_match(content)
}

fn html_to_markdown(html: &str) -> Result<String> {
    let converter = htmd::HtmlToMarkdown::builder()
        .skip_tags(vec!["script", "style", "head", "iframe", "noscript", "svg"])
        .build();

    let markdown = converter
        .convert(html)
        .map_err(|e| PostForgeError::Generation(format!("htmd conversion failed: {e}")))?;
    Ok(markdown.trim().to_string())
}

// ---------------------------------------------------------------------------
// FAQ extraction
// ---------------------------------------------------------------------------

/// Pull question/answer pairs out of an "FAQ" section.
///
/// Questions are sub-headings, bold lines, or `Q:` lines; everything up to
/// the next question is the answer. The section ends at the next heading of
/// the same or higher rank.
pub fn extract_faq(markdown: &str) -> Vec<FaqItem> {
    static HEADING_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^(#{1,6})\s+(.+?)\s*#*\s*$").expect("valid regex"));
    static FAQ_TITLE_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?i)^(?:faqs?|frequently asked questions)\b").expect("valid regex")
    });
    static BOLD_QUESTION_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"^\*\*(.+?)\*\*\s*$").expect("valid regex"));
    static Q_PREFIX_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?i)^Q[:.]\s*(.+)$").expect("valid regex"));
    static A_PREFIX_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?i)^A[:.]\s*").expect("valid regex"));

    let mut section_level: Option<usize> = None;
    let mut items: Vec<FaqItem> = Vec::new();
    let mut in_code_block = false;

    for line in markdown.lines() {
        let trimmed = line.trim();
        if trimmed.starts_with("```") {
            in_code_block = !in_code_block;
            continue;
        }
        if in_code_block {
            continue;
        }

        if let Some(caps) = HEADING_RE.captures(trimmed) {
            let level = caps[1].len();
            let text = caps[2].trim();
            match section_level {
                None if FAQ_TITLE_RE.is_match(text) => section_level = Some(level),
                Some(faq_level) if level <= faq_level => break,
                Some(_) => items.push(question(text)),
                None => {}
            }
            continue;
        }

        if section_level.is_none() || trimmed.is_empty() {
            continue;
        }

        if let Some(caps) = BOLD_QUESTION_RE.captures(trimmed) {
            items.push(question(&caps[1]));
        } else if let Some(caps) = Q_PREFIX_RE.captures(trimmed) {
            items.push(question(&caps[1]));
        } else if let Some(item) = items.last_mut() {
            let answer_line = A_PREFIX_RE.replace(trimmed, "");
            if !item.answer.is_empty() {
                item.answer.push(' ');
            }
            item.answer.push_str(answer_line.trim());
        }
    }

    items.retain(|item| !item.question.is_empty());
    items
}

fn question(text: &str) -> FaqItem {
    FaqItem {
        question: text.trim().trim_matches('*').trim().to_string(),
        answer: String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{StubClient, article_body, sample_keyword, sample_topic};

    #[test]
    fn extract_faq_from_subheadings() {
        let md = "\
# Mold Guide

Intro text.

## Frequently Asked Questions

### Is mold dangerous?

Some species are. Test before you clean.

### How long does remediation take?

A: Usually one to five days.

## Next Steps

### Not a question

Ignored.
";
        let faq = extract_faq(md);
        assert_eq!(
            faq,
            vec![
                FaqItem {
                    question: "Is mold dangerous?".into(),
                    answer: "Some species are. Test before you clean.".into(),
                },
                FaqItem {
                    question: "How long does remediation take?".into(),
                    answer: "Usually one to five days.".into(),
                },
            ]
        );
    }

    #[test]
    fn extract_faq_from_bold_and_q_lines() {
        let md = "## FAQ\n\n**Can I clean it myself?**\nSmall areas, yes.\n\nQ: Does bleach work?\nNot on porous surfaces.\n";
        let faq = extract_faq(md);
        assert_eq!(faq.len(), 2);
        assert_eq!(faq[0].question, "Can I clean it myself?");
        assert_eq!(faq[0].answer, "Small areas, yes.");
        assert_eq!(faq[1].question, "Does bleach work?");
        assert_eq!(faq[1].answer, "Not on porous surfaces.");
    }

    #[test]
    fn extract_faq_without_section_is_empty() {
        assert!(extract_faq("# Title\n\n## Section\n\nText.\n").is_empty());
    }

    #[test]
    fn html_detection() {
        assert!(looks_like_html("<h1>Title</h1><p>Body</p>"));
        assert!(looks_like_html("  <!DOCTYPE html><html></html>"));
        assert!(!looks_like_html("# Title\n\n<div>inline</div>"));
    }

    #[tokio::test]
    async fn html_output_is_converted() {
        let words = "word ".repeat(80);
        let html = format!("<h1>Mold Guide</h1><h2>Why</h2><p>{words}</p>");
        let client = StubClient::new().with_body(&html);

        let draft = generate_draft(
            &client,
            &sample_topic("Mold Guide"),
            &sample_keyword(),
            &GenerationConfig::default(),
            Duration::from_secs(5),
        )
        .await
        .unwrap();

        assert!(draft.markdown.starts_with("# Mold Guide"));
        assert!(draft.markdown.contains("## Why"));
        assert!(!draft.markdown.contains("<p>"));
    }

    #[tokio::test]
    async fn degenerate_output_is_too_short() {
        let client = StubClient::new().with_body("# Title\n\nToo short.");
        let err = generate_draft(
            &client,
            &sample_topic("Title"),
            &sample_keyword(),
            &GenerationConfig::default(),
            Duration::from_secs(5),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, PostForgeError::ContentTooShort { words: 3, .. }));
    }

    #[tokio::test]
    async fn faq_prefers_service_payload_and_respects_flag() {
        let body = format!(
            "{}\n## FAQ\n\n### From body?\n\nYes.\n",
            article_body("mold remediation")
        );
        let payload = vec![FaqItem {
            question: "From service?".into(),
            answer: "Yes.".into(),
        }];

        let client = StubClient::new().with_body(&body).with_faq(payload.clone());
        let topic = sample_topic("Mold Guide");
        let keyword = sample_keyword();

        let draft = generate_draft(&client, &topic, &keyword, &GenerationConfig::default(), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(draft.faq, payload);

        let without_payload = StubClient::new().with_body(&body);
        let draft = generate_draft(&without_payload, &topic, &keyword, &GenerationConfig::default(), Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(draft.faq.len(), 1);
        assert_eq!(draft.faq[0].question, "From body?");

        let disabled = GenerationConfig {
            include_faq: false,
            ..Default::default()
        };
        let draft = generate_draft(&client, &topic, &keyword, &disabled, Duration::from_secs(5))
            .await
            .unwrap();
        assert!(draft.faq.is_empty());
        assert_eq!(client.draft_calls(), 2);
    }
}
