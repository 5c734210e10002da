//! Quality gate run on every draft before it may become a post.
//!
//! `errors` block publishing; `warnings` are advisory and travel with the
//! pipeline result.

use std::sync::LazyLock;

use postforge_markdown::Rendered;
use postforge_shared::{FaqItem, Keyword, QualityRules, Topic};
use regex::Regex;
use scraper::{Html, Selector};
use serde::Serialize;
use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

const ERROR_PENALTY: u32 = 25;
const WARNING_PENALTY: u32 = 5;

/// Outcome of a quality evaluation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QualityReport {
    pub passed: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    /// 0–100; informational only.
    pub score: u8,
}

impl QualityReport {
    /// Build a report; `passed` and `score` follow from the findings.
    pub fn from_findings(errors: Vec<String>, warnings: Vec<String>) -> Self {
        let penalty = ERROR_PENALTY * errors.len() as u32 + WARNING_PENALTY * warnings.len() as u32;
        Self {
            passed: errors.is_empty(),
            score: 100u32.saturating_sub(penalty) as u8,
            errors,
            warnings,
        }
    }
}

/// A post-processed draft presented to the gate.
#[derive(Debug, Clone, Copy)]
pub struct DraftForReview<'a> {
    pub title: &'a str,
    pub rendered: &'a Rendered,
    pub faq: &'a [FaqItem],
}

/// Decides whether a draft may be persisted.
pub trait QualityGate: Send + Sync {
    fn evaluate(&self, draft: &DraftForReview<'_>, topic: &Topic, keyword: &Keyword)
    -> QualityReport;
}

// ---------------------------------------------------------------------------
// Rule-based gate
// ---------------------------------------------------------------------------

/// The default gate, driven by the `[quality]` config section.
#[derive(Debug, Clone, Default)]
pub struct RuleBasedGate {
    rules: QualityRules,
}

impl RuleBasedGate {
    pub fn new(rules: QualityRules) -> Self {
        Self { rules }
    }
}

impl QualityGate for RuleBasedGate {
    fn evaluate(
        &self,
        draft: &DraftForReview<'_>,
        _topic: &Topic,
        keyword: &Keyword,
    ) -> QualityReport {
        let rules = &self.rules;
        let rendered = draft.rendered;
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        // Length
        if rendered.word_count < rules.min_words {
            errors.push(format!(
                "word count {} is below the minimum of {}",
                rendered.word_count, rules.min_words
            ));
        } else if rendered.word_count > rules.max_words {
            warnings.push(format!(
                "word count {} exceeds the maximum of {}",
                rendered.word_count, rules.max_words
            ));
        }

        // Structure
        let headings = rendered.toc.iter().filter(|e| e.level >= 2).count();
        if headings < rules.min_headings {
            errors.push(format!(
                "only {headings} section headings (minimum {})",
                rules.min_headings
            ));
        }

        // Keyword
        let phrase = fold(&keyword.text);
        if !phrase.is_empty() {
            let body = fold(&rendered.markdown);
            let occurrences = count_phrase(&body, &phrase);
            if occurrences == 0 {
                errors.push(format!("keyword '{}' does not appear in the body", keyword.text));
            } else if rendered.word_count > 0 {
                let phrase_words = phrase.split(' ').count();
                let density =
                    (occurrences * phrase_words) as f32 * 100.0 / rendered.word_count as f32;
                if density < rules.min_keyword_density || density > rules.max_keyword_density {
                    warnings.push(format!(
                        "keyword density {density:.2}% is outside {:.2}%–{:.2}%",
                        rules.min_keyword_density, rules.max_keyword_density
                    ));
                }
            }
            if count_phrase(&fold(draft.title), &phrase) == 0 {
                warnings.push(format!("keyword '{}' does not appear in the title", keyword.text));
            }
        }

        // Leftover generation artifacts
        for artifact in find_artifacts(&rendered.markdown, &rules.banned_phrases) {
            errors.push(format!("leftover generation artifact: '{artifact}'"));
        }

        // FAQ
        for (i, item) in draft.faq.iter().enumerate() {
            let n = i + 1;
            if item.question.trim().is_empty() || item.answer.trim().is_empty() {
                errors.push(format!("FAQ item {n} has an empty question or answer"));
            } else if !item.question.trim_end().ends_with('?') {
                warnings.push(format!("FAQ item {n} question does not end with '?'"));
            }
        }

        // Rendered HTML
        warnings.extend(check_html(&rendered.html));

        QualityReport::from_findings(errors, warnings)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Lower-case, diacritic-free, punctuation-free, single-spaced text.
fn fold(text: &str) -> String {
    let folded: String = text
        .nfkd()
        .filter(|c| !is_combining_mark(*c))
        .flat_map(char::to_lowercase)
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    folded.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Whole-word occurrences of `phrase` in `haystack` (both folded).
fn count_phrase(haystack: &str, phrase: &str) -> usize {
    let haystack = format!(" {haystack} ");
    let needle = format!(" {phrase} ");
    let mut count = 0;
    let mut from = 0;
    while let Some(pos) = haystack[from..].find(&needle) {
        count += 1;
        // Step past the phrase but keep the trailing space as the next boundary.
        from += pos + needle.len() - 1;
    }
    count
}

fn find_artifacts(markdown: &str, banned: &[String]) -> Vec<String> {
    static ARTIFACT_RES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
        [
            r"(?i)\[(?:insert|add|your|placeholder|todo)[^\]\n]{0,60}\]",
            r"\{\{[^}\n]{0,60}\}\}",
            r"(?i)\blorem ipsum\b",
            r"(?i)\bas an ai(?: language model)?\b",
            r"(?i)\bi cannot (?:fulfill|complete) (?:this|that) request\b",
            r"(?i)<placeholder>",
            r"\bTODO\b",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("valid regex"))
        .collect()
    });

    let mut found: Vec<String> = Vec::new();
    for re in ARTIFACT_RES.iter() {
        // `[Your free quote](/contact)` is a link, not a placeholder.
        let hit = re
            .find_iter(markdown)
            .find(|m| !markdown[m.end()..].starts_with('('));
        if let Some(m) = hit {
            found.push(m.as_str().to_string());
        }
    }

    let lowered = markdown.to_lowercase();
    for phrase in banned {
        let needle = phrase.trim().to_lowercase();
        if !needle.is_empty() && lowered.contains(&needle) {
            found.push(phrase.trim().to_string());
        }
    }
    found
}

fn check_html(html: &str) -> Vec<String> {
    static LINK_SEL: LazyLock<Selector> =
        LazyLock::new(|| Selector::parse("a").expect("valid selector"));
    static IMG_SEL: LazyLock<Selector> =
        LazyLock::new(|| Selector::parse("img").expect("valid selector"));

    let document = Html::parse_fragment(html);
    let mut warnings = Vec::new();

    let empty_links = document
        .select(&LINK_SEL)
        .filter(|a| {
            let href = a.value().attr("href").map(str::trim).unwrap_or("");
            href.is_empty() || href == "#"
        })
        .count();
    if empty_links > 0 {
        warnings.push(format!("{empty_links} link(s) with an empty target"));
    }

    let missing_alt = document
        .select(&IMG_SEL)
        .filter(|img| img.value().attr("alt").is_none_or(|alt| alt.trim().is_empty()))
        .count();
    if missing_alt > 0 {
        warnings.push(format!("{missing_alt} image(s) without alt text"));
    }

    warnings
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{article_body, sample_keyword, sample_topic};
    use postforge_markdown::{RenderOptions, render};

    fn review(title: &str, markdown: &str, faq: &[FaqItem]) -> QualityReport {
        let rendered = render(markdown, &RenderOptions::default());
        let draft = DraftForReview {
            title,
            rendered: &rendered,
            faq,
        };
        RuleBasedGate::default().evaluate(&draft, &sample_topic(title), &sample_keyword())
    }

    #[test]
    fn good_article_passes() {
        let report = review(
            "Mold Remediation in Plano",
            &article_body("mold remediation"),
            &[],
        );
        assert!(report.passed, "unexpected errors: {:?}", report.errors);
        assert!(report.errors.is_empty());
        assert_eq!(report.score, 100 - 5 * report.warnings.len() as u8);
    }

    #[test]
    fn short_draft_fails_with_error() {
        let report = review(
            "Mold Remediation",
            "# Mold Remediation\n\n## One\n\n## Two\n\n## Three\n\nMold remediation is short here.\n",
            &[],
        );
        assert!(!report.passed);
        assert!(report.errors.iter().any(|e| e.contains("below the minimum")));
    }

    #[test]
    fn missing_keyword_in_body_is_error_and_title_is_warning() {
        let report = review("A Guide", &article_body("basement care"), &[]);
        assert!(report.errors.iter().any(|e| e.contains("does not appear in the body")));
        assert!(report.warnings.iter().any(|w| w.contains("in the title")));
    }

    #[test]
    fn artifacts_and_banned_phrases_are_errors() {
        let body = format!(
            "{}\nCall [Insert phone number] today. In today's fast-paced world, act now.\n",
            article_body("mold remediation")
        );
        let rendered = render(&body, &RenderOptions::default());
        let gate = RuleBasedGate::new(QualityRules {
            banned_phrases: vec!["In today's fast-paced world".into()],
            ..Default::default()
        });
        let report = gate.evaluate(
            &DraftForReview {
                title: "Mold Remediation",
                rendered: &rendered,
                faq: &[],
            },
            &sample_topic("Mold Remediation"),
            &sample_keyword(),
        );
        assert_eq!(report.errors.len(), 2, "{:?}", report.errors);
        assert!(report.errors[0].contains("[Insert phone number]"));
        assert!(report.errors[1].contains("fast-paced"));
    }

    #[test]
    fn bracketed_link_text_is_not_an_artifact() {
        let found = find_artifacts("Book [your free inspection](/contact) today.", &[]);
        assert!(found.is_empty(), "{found:?}");
    }

    #[test]
    fn faq_rules() {
        let faq = vec![
            FaqItem {
                question: "Is mold dangerous?".into(),
                answer: "Sometimes.".into(),
            },
            FaqItem {
                question: "Cost".into(),
                answer: "Varies.".into(),
            },
            FaqItem {
                question: "Empty answer?".into(),
                answer: "  ".into(),
            },
        ];
        let report = review(
            "Mold Remediation",
            &article_body("mold remediation"),
            &faq,
        );
        assert!(report.errors.iter().any(|e| e.contains("FAQ item 3")));
        assert!(report.warnings.iter().any(|w| w.contains("FAQ item 2")));
    }

    #[test]
    fn html_link_and_image_checks() {
        let warnings = check_html(
            r#"<p><a href="">x</a><a href="https://ok.example">ok</a><a>y</a><img src="a.png"><img src="b.png" alt="b"></p>"#,
        );
        assert_eq!(
            warnings,
            vec![
                "2 link(s) with an empty target".to_string(),
                "1 image(s) without alt text".to_string()
            ]
        );
    }

    #[test]
    fn phrase_counting_respects_word_boundaries() {
        assert_eq!(count_phrase("mold remediation and mold remediation", "mold remediation"), 2);
        assert_eq!(count_phrase("moldremediation", "mold remediation"), 0);
        assert_eq!(count_phrase("a a a a", "a a"), 2);
        assert_eq!(fold("Crème  Brûlée!"), "creme brulee");
    }

    #[test]
    fn score_floors_at_zero() {
        let report = QualityReport::from_findings(vec!["e".into(); 5], vec![]);
        assert_eq!(report.score, 0);
        assert!(!report.passed);
    }
}
