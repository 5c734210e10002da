//! Markdown post-processing for generated articles.
//!
//! Turns a generated Markdown body into everything a post record needs:
//! rendered HTML with heading anchors, a table of contents, word count,
//! reading time, and a sentence-bounded excerpt. Rendering is pure and
//! deterministic: the same Markdown always yields byte-identical output.

mod cleanup;

use std::collections::HashSet;

use pulldown_cmark::{CowStr, Event, Options, Parser, Tag, TagEnd};
use tracing::{debug, instrument};
use unicode_normalization::UnicodeNormalization;
use unicode_normalization::char::is_combining_mark;

use postforge_shared::TocEntry;

/// Default reading speed.
pub const DEFAULT_WORDS_PER_MINUTE: u32 = 200;

/// Default excerpt length, in characters.
pub const DEFAULT_EXCERPT_CHARS: usize = 160;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Options for [`render`].
#[derive(Debug, Clone)]
pub struct RenderOptions {
    /// Reading speed used for `reading_time`.
    pub words_per_minute: u32,
    /// Maximum excerpt length, in characters.
    pub excerpt_chars: usize,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            words_per_minute: DEFAULT_WORDS_PER_MINUTE,
            excerpt_chars: DEFAULT_EXCERPT_CHARS,
        }
    }
}

/// Output of the post-processor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    /// Cleaned Markdown that the HTML was rendered from.
    pub markdown: String,
    pub html: String,
    pub toc: Vec<TocEntry>,
    /// Minutes, rounded up.
    pub reading_time: u32,
    /// Words outside fenced code.
    pub word_count: usize,
    pub excerpt: String,
}

// ---------------------------------------------------------------------------
// Renderer
// ---------------------------------------------------------------------------

/// Render generated Markdown into HTML plus derived metadata.
///
/// 1. Runs the cleanup pipeline
/// 2. Parses with CommonMark + tables/strikethrough/task lists
/// 3. Assigns unique anchors to headings and collects the TOC
/// 4. Counts words and collects paragraph text for the excerpt
/// 5. Renders HTML (raw HTML blocks from the source are dropped)
#[instrument(skip_all, fields(input_len = markdown.len()))]
pub fn render(markdown: &str, opts: &RenderOptions) -> Rendered {
    let cleaned = cleanup::run_pipeline(markdown);

    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TASKLISTS);

    let mut events: Vec<Event<'_>> = Parser::new_ext(&cleaned, options)
        .filter(|event| !matches!(event, Event::Html(_) | Event::InlineHtml(_)))
        .collect();

    let mut toc = Vec::new();
    let mut used_anchors: HashSet<String> = HashSet::new();
    let mut plain_text = String::new();
    let mut paragraphs: Vec<String> = Vec::new();

    let mut heading_start: Option<usize> = None;
    let mut heading_ids: Vec<(usize, String)> = Vec::new();
    let mut heading_text = String::new();
    let mut paragraph_text: Option<String> = None;
    let mut code_depth = 0usize;
    let mut list_depth = 0usize;

    for (i, event) in events.iter().enumerate() {
        match event {
            Event::Start(Tag::Heading { .. }) => {
                heading_start = Some(i);
                heading_text.clear();
            }
            Event::End(TagEnd::Heading(level)) => {
                let level = *level as u8;
                let text = heading_text.trim().to_string();
                let anchor = unique_anchor(&text, &mut used_anchors);

                if let Some(start) = heading_start.take() {
                    heading_ids.push((start, anchor.clone()));
                }
                toc.push(TocEntry {
                    level,
                    text,
                    anchor,
                });
                plain_text.push(' ');
            }
            Event::Start(Tag::CodeBlock(_)) => code_depth += 1,
            Event::End(TagEnd::CodeBlock) => code_depth = code_depth.saturating_sub(1),
            Event::Start(Tag::List(_)) => list_depth += 1,
            Event::End(TagEnd::List(_)) => list_depth = list_depth.saturating_sub(1),
            Event::Start(Tag::Paragraph) => {
                if list_depth == 0 {
                    paragraph_text = Some(String::new());
                }
            }
            Event::End(TagEnd::Paragraph) => {
                if let Some(text) = paragraph_text.take() {
                    let text = collapse_whitespace(&text);
                    if !text.is_empty() {
                        paragraphs.push(text);
                    }
                }
                plain_text.push(' ');
            }
            Event::End(TagEnd::Item | TagEnd::TableCell) => {
                plain_text.push(' ');
            }
            Event::Text(text) | Event::Code(text) => {
                if code_depth > 0 {
                    continue;
                }
                if heading_start.is_some() {
                    heading_text.push_str(text);
                }
                if let Some(buf) = paragraph_text.as_mut() {
                    buf.push_str(text);
                }
                plain_text.push_str(text);
            }
            Event::SoftBreak | Event::HardBreak => {
                if let Some(buf) = paragraph_text.as_mut() {
                    buf.push(' ');
                }
                plain_text.push(' ');
            }
            _ => {}
        }
    }

    for (index, anchor) in heading_ids {
        if let Event::Start(Tag::Heading { id, .. }) = &mut events[index] {
            *id = Some(CowStr::from(anchor));
        }
    }

    let word_count = plain_text.split_whitespace().count();
    let reading_time = reading_time(word_count, opts.words_per_minute);
    let excerpt = excerpt(&paragraphs.join(" "), opts.excerpt_chars);

    let mut html = String::with_capacity(cleaned.len() * 2);
    pulldown_cmark::html::push_html(&mut html, events.into_iter());

    debug!(
        word_count,
        reading_time,
        headings = toc.len(),
        html_len = html.len(),
        "markdown rendered"
    );

    Rendered {
        markdown: cleaned,
        html,
        toc,
        reading_time,
        word_count,
        excerpt,
    }
}

/// Count words in Markdown (excluding fenced code), without rendering HTML.
pub fn count_words(markdown: &str) -> usize {
    render(markdown, &RenderOptions::default()).word_count
}

// ---------------------------------------------------------------------------
// Slugs and anchors
// ---------------------------------------------------------------------------

/// Lower-case ASCII, hyphen-separated slug of `text`.
///
/// Diacritics are stripped and a few Latin ligatures spelled out; any other
/// non-ASCII character acts as a separator. Non-alphanumeric runs collapse
/// into a single hyphen. May return an empty string.
pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut pending_hyphen = false;

    for c in text.nfkd().filter(|c| !is_combining_mark(*c)) {
        let folded = match c {
            'ß' | 'ẞ' => "ss",
            'æ' | 'Æ' => "ae",
            'œ' | 'Œ' => "oe",
            'ø' | 'Ø' => "o",
            'ł' | 'Ł' => "l",
            'đ' | 'Đ' => "d",
            'þ' | 'Þ' => "th",
            c if c.is_ascii_alphanumeric() => {
                if pending_hyphen && !slug.is_empty() {
                    slug.push('-');
                }
                pending_hyphen = false;
                slug.push(c.to_ascii_lowercase());
                continue;
            }
            _ => {
                pending_hyphen = true;
                continue;
            }
        };
        if pending_hyphen && !slug.is_empty() {
            slug.push('-');
        }
        pending_hyphen = false;
        slug.push_str(folded);
    }

    slug
}

/// Anchor for a heading, suffixed `-2`, `-3`, … when already taken.
fn unique_anchor(text: &str, used: &mut HashSet<String>) -> String {
    let mut base = slugify(text);
    if base.is_empty() {
        base = "section".to_string();
    }

    if used.insert(base.clone()) {
        return base;
    }

    let mut n = 2;
    loop {
        let candidate = format!("{base}-{n}");
        if used.insert(candidate.clone()) {
            return candidate;
        }
        n += 1;
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// `ceil(words / wpm)`; a zero speed falls back to the default.
fn reading_time(word_count: usize, words_per_minute: u32) -> u32 {
    let wpm = if words_per_minute == 0 {
        DEFAULT_WORDS_PER_MINUTE
    } else {
        words_per_minute
    };
    let words = u32::try_from(word_count).unwrap_or(u32::MAX);
    words.div_ceil(wpm)
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Truncate to at most `max_chars`, preferring a sentence boundary.
///
/// Falls back to the last word boundary plus an ellipsis (counted in the limit).
fn excerpt(text: &str, max_chars: usize) -> String {
    let text = collapse_whitespace(text);
    if text.chars().count() <= max_chars {
        return text;
    }
    if max_chars == 0 {
        return String::new();
    }

    let head_end = text
        .char_indices()
        .nth(max_chars)
        .map(|(idx, _)| idx)
        .unwrap_or(text.len());
    let head = &text[..head_end];

    let sentence_end = head
        .char_indices()
        .filter(|(_, c)| matches!(c, '.' | '!' | '?'))
        .map(|(idx, c)| idx + c.len_utf8())
        .filter(|end| text[*end..].chars().next().is_none_or(char::is_whitespace))
        .last();

    if let Some(end) = sentence_end {
        return head[..end].to_string();
    }

    // Leave room for the ellipsis.
    let budget_end = text
        .char_indices()
        .nth(max_chars - 1)
        .map(|(idx, _)| idx)
        .unwrap_or(text.len());
    let budget = &text[..budget_end];
    let cut = match text[budget_end..].chars().next() {
        Some(c) if c.is_whitespace() => budget.len(),
        _ => budget.rfind(char::is_whitespace).unwrap_or(budget.len()),
    };
    format!("{}…", budget[..cut].trim_end())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const ARTICLE: &str = "\
# Mold Remediation in Plano

Mold grows fast after a leak. Acting early keeps repair costs down.

## Why Mold Spreads

Moisture, warmth, and organic material are all it needs.

## Signs of Mold

- Musty odor
- Visible spots

## Signs of Mold

Second section with a repeated heading.

```bash
echo these words are not counted
```
";

    #[test]
    fn render_builds_toc_with_unique_anchors() {
        let rendered = render(ARTICLE, &RenderOptions::default());
        let anchors: Vec<&str> = rendered.toc.iter().map(|e| e.anchor.as_str()).collect();
        assert_eq!(
            anchors,
            vec![
                "mold-remediation-in-plano",
                "why-mold-spreads",
                "signs-of-mold",
                "signs-of-mold-2"
            ]
        );
        assert_eq!(rendered.toc[0].level, 1);
        assert_eq!(rendered.toc[1].level, 2);
        assert_eq!(rendered.toc[1].text, "Why Mold Spreads");
    }

    #[test]
    fn render_emits_anchor_ids_in_html() {
        let rendered = render(ARTICLE, &RenderOptions::default());
        assert!(rendered.html.contains(r#"<h2 id="why-mold-spreads">"#));
        assert!(rendered.html.contains(r#"<h2 id="signs-of-mold-2">"#));
        assert!(rendered.html.contains("<li>Musty odor</li>"));
    }

    #[test]
    fn render_handles_all_heading_levels() {
        let md = "# One\n\n## Two\n\n### Three\n\n#### Four\n\n##### Five\n\n###### Six\n";
        let rendered = render(md, &RenderOptions::default());
        let levels: Vec<u8> = rendered.toc.iter().map(|e| e.level).collect();
        assert_eq!(levels, vec![1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn render_is_deterministic() {
        let a = render(ARTICLE, &RenderOptions::default());
        let b = render(ARTICLE, &RenderOptions::default());
        assert_eq!(a.html, b.html);
        assert_eq!(a.toc, b.toc);
        assert_eq!(a.word_count, b.word_count);
        assert_eq!(a, b);
    }

    #[test]
    fn word_count_excludes_code_blocks() {
        let rendered = render(ARTICLE, &RenderOptions::default());
        let md_words = "Mold Remediation in Plano Mold grows fast after a leak. Acting early keeps \
                        repair costs down. Why Mold Spreads Moisture, warmth, and organic material \
                        are all it needs. Signs of Mold Musty odor Visible spots Signs of Mold \
                        Second section with a repeated heading.";
        assert_eq!(rendered.word_count, md_words.split_whitespace().count());
        assert!(!rendered.html.is_empty());
    }

    #[test]
    fn reading_time_rounds_up() {
        assert_eq!(reading_time(0, 200), 0);
        assert_eq!(reading_time(1, 200), 1);
        assert_eq!(reading_time(200, 200), 1);
        assert_eq!(reading_time(201, 200), 2);
        assert_eq!(reading_time(900, 200), 5);
        assert_eq!(reading_time(900, 0), 5);
    }

    #[test]
    fn excerpt_prefers_sentence_boundary() {
        let text = "Mold grows fast after a leak. Acting early keeps repair costs down and protects your family.";
        let result = excerpt(text, 60);
        assert_eq!(result, "Mold grows fast after a leak.");
    }

    #[test]
    fn excerpt_falls_back_to_word_boundary() {
        let text = "one two three four five six seven eight nine ten";
        let result = excerpt(text, 20);
        assert!(result.chars().count() <= 20, "got {result:?}");
        assert!(result.ends_with('…'));
        assert_eq!(result, "one two three four…");
    }

    #[test]
    fn excerpt_short_text_untouched() {
        assert_eq!(excerpt("  Short   text. ", 160), "Short text.");
    }

    #[test]
    fn render_excerpt_skips_headings_and_lists() {
        let rendered = render(ARTICLE, &RenderOptions {
            words_per_minute: 200,
            excerpt_chars: 80,
        });
        assert_eq!(
            rendered.excerpt,
            "Mold grows fast after a leak. Acting early keeps repair costs down."
        );
    }

    #[test]
    fn raw_html_is_dropped() {
        let rendered = render(
            "# Title\n\n<script>alert(1)</script>\n\nSafe text.\n",
            &RenderOptions::default(),
        );
        assert!(!rendered.html.contains("<script>"));
        assert!(rendered.html.contains("Safe text."));
    }

    #[test]
    fn slugify_strips_diacritics_and_punctuation() {
        assert_eq!(
            slugify("Water Damage Restoration in Plano!"),
            "water-damage-restoration-in-plano"
        );
        assert_eq!(slugify("Café   Déjà Vu -- Guide"), "cafe-deja-vu-guide");
        assert_eq!(slugify("  --Hello__World--  "), "hello-world");
        assert_eq!(slugify("!!!"), "");
    }

    #[test]
    fn slugify_output_is_ascii() {
        assert_eq!(
            slugify("Straße Reparatur in München"),
            "strasse-reparatur-in-munchen"
        );
        assert_eq!(slugify("Ремонт после потопа"), "");
        assert_eq!(slugify("水害修復ガイド"), "");
        assert_eq!(slugify("Plano 水害 guide"), "plano-guide");
    }

    #[test]
    fn duplicate_anchor_avoids_literal_collision() {
        let mut used = HashSet::new();
        assert_eq!(unique_anchor("Intro 2", &mut used), "intro-2");
        assert_eq!(unique_anchor("Intro", &mut used), "intro");
        assert_eq!(unique_anchor("Intro", &mut used), "intro-3");
        assert_eq!(unique_anchor("???", &mut used), "section");
    }
}
