//! Topic ideation: ask the generation service for article ideas for a
//! keyword, drop near-duplicates, and rank what is left.

use std::collections::BTreeSet;
use std::time::Duration;

use chrono::Utc;
use postforge_generation::{GenerationClient, TopicCandidate, TopicRequest};
use postforge_shared::{Keyword, PostForgeError, Result, TokenUsage, Topic, TopicStatus, new_id};
use tracing::{debug, info, instrument};
use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

/// Most topics requested in one call.
pub const MAX_TOPICS: u32 = 20;

/// Token-set Jaccard similarity at or above which two titles are duplicates.
pub const DUPLICATE_SIMILARITY: f64 = 0.85;

/// Words ignored when comparing titles.
const STOP_WORDS: &[&str] = &[
    "a", "about", "an", "and", "are", "as", "at", "be", "by", "for", "from", "in", "into", "is",
    "it", "its", "of", "on", "or", "that", "the", "this", "to", "vs", "with", "you", "your",
];

/// A deduplicated, scored article idea. Not persisted yet.
#[derive(Debug, Clone, PartialEq)]
pub struct TopicIdea {
    pub title: String,
    pub angle: String,
    pub outline: Vec<String>,
    /// 0–100.
    pub relevance_score: u8,
}

impl TopicIdea {
    /// A pending [`Topic`] row for `keyword_id`.
    pub fn into_topic(self, keyword_id: &str) -> Topic {
        Topic {
            id: new_id(),
            keyword_id: keyword_id.to_string(),
            title: self.title,
            angle: self.angle,
            outline: self.outline,
            relevance_score: self.relevance_score,
            status: TopicStatus::Pending,
            created_at: Utc::now(),
        }
    }
}

/// Ideas best-first, plus the tokens the call cost.
#[derive(Debug, Clone)]
pub struct TopicBatch {
    pub topics: Vec<TopicIdea>,
    pub token_usage: TokenUsage,
}

/// Generate up to `count` topic ideas for `keyword`.
///
/// Titles similar to `existing_titles`, or to an idea already accepted from
/// the same batch, are dropped. Scores are clamped to 0–100.
///
/// Errors: [`PostForgeError::Generation`] on service failure or timeout,
/// [`PostForgeError::EmptyResult`] when no idea survives.
#[instrument(skip_all, fields(keyword = %keyword.text, count = count))]
pub async fn generate_topics(
    client: &dyn GenerationClient,
    keyword: &Keyword,
    count: u32,
    existing_titles: &[String],
    timeout: Duration,
) -> Result<TopicBatch> {
    let count = count.clamp(1, MAX_TOPICS);
    let request = TopicRequest {
        keyword: keyword.text.clone(),
        intent: keyword.intent,
        count,
        existing_titles: existing_titles.to_vec(),
    };

    let response = tokio::time::timeout(timeout, client.generate_topics(&request))
        .await
        .map_err(|_| {
            PostForgeError::Generation(format!(
                "topic generation timed out after {}s",
                timeout.as_secs_f32()
            ))
        })??;

    let received = response.topics.len();
    let topics = dedupe_and_rank(response.topics, existing_titles, count as usize);

    info!(
        received,
        kept = topics.len(),
        prompt_tokens = response.token_usage.prompt_tokens,
        completion_tokens = response.token_usage.completion_tokens,
        "topics generated"
    );

    if topics.is_empty() {
        return Err(PostForgeError::EmptyResult(format!(
            "no usable topics for keyword '{}' ({received} received)",
            keyword.text
        )));
    }

    Ok(TopicBatch {
        topics,
        token_usage: response.token_usage,
    })
}

// ---------------------------------------------------------------------------
// Deduplication and ranking
// ---------------------------------------------------------------------------

fn dedupe_and_rank(
    candidates: Vec<TopicCandidate>,
    existing_titles: &[String],
    limit: usize,
) -> Vec<TopicIdea> {
    let mut seen: Vec<BTreeSet<String>> = existing_titles
        .iter()
        .map(|t| title_tokens(t))
        .filter(|tokens| !tokens.is_empty())
        .collect();

    let mut ideas = Vec::new();
    for candidate in candidates {
        let title = candidate.title.split_whitespace().collect::<Vec<_>>().join(" ");
        let tokens = title_tokens(&title);
        if tokens.is_empty() {
            debug!(title = %candidate.title, "dropping topic without words");
            continue;
        }
        if seen.iter().any(|other| similarity(&tokens, other) >= DUPLICATE_SIMILARITY) {
            debug!(%title, "dropping near-duplicate topic");
            continue;
        }
        seen.push(tokens);

        ideas.push(TopicIdea {
            title,
            angle: candidate.angle.trim().to_string(),
            outline: candidate
                .outline
                .into_iter()
                .map(|h| h.trim().to_string())
                .filter(|h| !h.is_empty())
                .collect(),
            relevance_score: clamp_score(candidate.relevance_score),
        });
    }

    // Stable: equal scores keep the service's order.
    ideas.sort_by(|a, b| b.relevance_score.cmp(&a.relevance_score));
    ideas.truncate(limit);
    ideas
}

fn clamp_score(raw: f64) -> u8 {
    if !raw.is_finite() {
        return 0;
    }
    raw.round().clamp(0.0, 100.0) as u8
}

/// Normalized, stop-word-free token set of a title.
///
/// Falls back to every token when the title is nothing but stop words.
fn title_tokens(title: &str) -> BTreeSet<String> {
    let folded: String = title
        .nfkd()
        .filter(|c| !is_combining_mark(*c))
        .flat_map(char::to_lowercase)
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();

    let all: BTreeSet<String> = folded.split_whitespace().map(str::to_string).collect();
    let content: BTreeSet<String> = all
        .iter()
        .filter(|t| !STOP_WORDS.contains(&t.as_str()))
        .cloned()
        .collect();

    if content.is_empty() { all } else { content }
}

fn similarity(a: &BTreeSet<String>, b: &BTreeSet<String>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    a.intersection(b).count() as f64 / union as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{StubClient, candidate};
    use postforge_shared::SearchIntent;

    fn keyword() -> Keyword {
        Keyword::new("mold remediation", SearchIntent::Local, 1)
    }

    #[test]
    fn title_tokens_fold_case_diacritics_and_stop_words() {
        let tokens = title_tokens("The Complete Guide to Mold Remédiation!");
        let expected: BTreeSet<String> = ["complete", "guide", "mold", "remediation"]
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(tokens, expected);
    }

    #[test]
    fn dedupe_against_existing_and_batch() {
        let candidates = vec![
            candidate("Complete Guide to Mold Remediation", 70.0),
            candidate("Mold Remediation Costs in Plano", 95.0),
            candidate("mold remediation costs in plano!", 60.0),
            candidate("When to Call a Mold Pro", 80.0),
        ];
        let existing = vec!["The Complete Guide to Mold Remediation".to_string()];

        let ideas = dedupe_and_rank(candidates, &existing, 10);
        let titles: Vec<&str> = ideas.iter().map(|i| i.title.as_str()).collect();
        assert_eq!(
            titles,
            vec!["Mold Remediation Costs in Plano", "When to Call a Mold Pro"]
        );
    }

    #[test]
    fn scores_are_clamped_and_sorted() {
        let ideas = dedupe_and_rank(
            vec![
                candidate("Low", -5.0),
                candidate("High", 250.0),
                candidate("Mid", 49.6),
                candidate("Broken", f64::NAN),
            ],
            &[],
            10,
        );
        let scored: Vec<(&str, u8)> = ideas
            .iter()
            .map(|i| (i.title.as_str(), i.relevance_score))
            .collect();
        assert_eq!(
            scored,
            vec![("High", 100), ("Mid", 50), ("Low", 0), ("Broken", 0)]
        );
    }

    #[test]
    fn limit_truncates_after_ranking() {
        let ideas = dedupe_and_rank(
            vec![candidate("Alpha", 10.0), candidate("Beta", 90.0), candidate("Gamma", 50.0)],
            &[],
            2,
        );
        let titles: Vec<&str> = ideas.iter().map(|i| i.title.as_str()).collect();
        assert_eq!(titles, vec!["Beta", "Gamma"]);
    }

    #[tokio::test]
    async fn all_duplicates_is_empty_result() {
        let client = StubClient::new().with_topics(vec![candidate("Mold 101", 50.0)]);
        let err = generate_topics(
            &client,
            &keyword(),
            5,
            &["mold 101".to_string()],
            Duration::from_secs(5),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, PostForgeError::EmptyResult(_)));
    }

    #[tokio::test]
    async fn count_is_capped() {
        let client = StubClient::new();
        generate_topics(&client, &keyword(), 500, &[], Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(client.last_topic_count(), Some(MAX_TOPICS));
    }

    #[tokio::test]
    async fn slow_service_times_out() {
        let client = StubClient::new().with_delay(Duration::from_millis(200));
        let err = generate_topics(&client, &keyword(), 3, &[], Duration::from_millis(20))
            .await
            .unwrap_err();
        assert!(matches!(err, PostForgeError::Generation(ref m) if m.contains("timed out")));
    }
}
