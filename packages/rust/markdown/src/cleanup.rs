//! Pre-render cleanup pipeline for generated Markdown.
//!
//! Each cleanup pass is a function `&str -> String` applied in sequence.
//! The pipeline strips wrapper noise that generation services tend to emit
//! and normalizes headings, whitespace, and code blocks.

use std::sync::LazyLock;

use regex::Regex;

/// Run the full cleanup pipeline on raw Markdown text.
pub(crate) fn run_pipeline(md: &str) -> String {
    let mut result = md.replace("\r\n", "\n");

    result = strip_preamble(&result);
    result = unwrap_document_fence(&result);
    result = strip_front_matter(&result);
    result = normalize_headings(&result);
    result = clean_blank_lines(&result);
    result = fix_code_block_languages(&result);
    result = normalize_whitespace(&result);
    result = ensure_trailing_newline(&result);

    result
}

// ---------------------------------------------------------------------------
// Pass 1: Strip a conversational preamble
// ---------------------------------------------------------------------------

/// Drop an opening line such as "Sure! Here is your article:".
fn strip_preamble(md: &str) -> String {
    static PREAMBLE_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(
            r"(?i)\A\s*(?:(?:sure|certainly|of course)[!,.][^\n]*|here(?:'s| is) [^\n]*:)[ \t]*\n+",
        )
        .expect("valid regex")
    });

    PREAMBLE_RE.replace(md, "").to_string()
}

// ---------------------------------------------------------------------------
// Pass 2: Unwrap a whole-document code fence
// ---------------------------------------------------------------------------

/// Remove a ```` ```markdown ```` fence that wraps the entire document.
fn unwrap_document_fence(md: &str) -> String {
    static FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?s)\A\s*```(?:markdown|md)[ \t]*\n(.*?)\n```\s*\z").expect("valid regex")
    });

    match FENCE_RE.captures(md) {
        Some(caps) => caps[1].to_string(),
        None => md.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Pass 3: Strip YAML front matter
// ---------------------------------------------------------------------------

/// Drop a leading `---` YAML block; metadata lives on the post record.
fn strip_front_matter(md: &str) -> String {
    static FRONT_MATTER_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?s)\A\s*---\n.*?\n---[ \t]*\n").expect("valid regex")
    });

    FRONT_MATTER_RE.replace(md, "").to_string()
}

// ---------------------------------------------------------------------------
// Pass 4: Normalize heading levels
// ---------------------------------------------------------------------------

/// Ensure there's at most one H1; later H1s are demoted to H2.
fn normalize_headings(md: &str) -> String {
    static H_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"^(#{1,6})\s+(.+)$").expect("valid regex")
    });

    let mut h1_count = 0;
    let mut in_code_block = false;
    let mut lines: Vec<String> = Vec::new();

    for line in md.lines() {
        if line.trim_start().starts_with("```") {
            in_code_block = !in_code_block;
            lines.push(line.to_string());
            continue;
        }

        if !in_code_block {
            if let Some(caps) = H_RE.captures(line) {
                if &caps[1] == "#" {
                    h1_count += 1;
                    if h1_count > 1 {
                        lines.push(format!("## {}", &caps[2]));
                        continue;
                    }
                }
            }
        }
        lines.push(line.to_string());
    }

    lines.join("\n")
}

// ---------------------------------------------------------------------------
// Pass 5: Clean up excessive blank lines
// ---------------------------------------------------------------------------

/// Collapse runs of 3+ blank lines into exactly 2.
fn clean_blank_lines(md: &str) -> String {
    static MULTI_BLANK_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"\n{4,}").expect("valid regex")
    });

    MULTI_BLANK_RE.replace_all(md, "\n\n\n").to_string()
}

// ---------------------------------------------------------------------------
// Pass 6: Fix code block language hints
// ---------------------------------------------------------------------------

/// Handles patterns like `language-js`, `lang-python`, `highlight-rust`.
fn fix_code_block_languages(md: &str) -> String {
    static LANG_PREFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?m)^```(?:language-|lang-|highlight-)(\w+)").expect("valid regex")
    });

    LANG_PREFIX_RE.replace_all(md, "```$1").to_string()
}

// ---------------------------------------------------------------------------
// Pass 7: Normalize whitespace
// ---------------------------------------------------------------------------

/// Trim trailing whitespace on every line.
fn normalize_whitespace(md: &str) -> String {
    md.lines()
        .map(|line| line.trim_end())
        .collect::<Vec<_>>()
        .join("\n")
}

// ---------------------------------------------------------------------------
// Pass 8: Ensure trailing newline
// ---------------------------------------------------------------------------

/// Ensure the text ends with exactly one newline.
fn ensure_trailing_newline(md: &str) -> String {
    let trimmed = md.trim_end_matches('\n');
    format!("{trimmed}\n")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
