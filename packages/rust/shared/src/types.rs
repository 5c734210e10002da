//! Core domain types for the content-generation pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::PostForgeError;

/// Job type used by the full keyword → post generation pipeline.
pub const FULL_GENERATION_JOB: &str = "full-generation";

/// Generate a new time-sortable identifier (UUID v7).
pub fn new_id() -> String {
    Uuid::now_v7().to_string()
}

/// Declares a string-backed status enum with `as_str`, `Display`, and `FromStr`.
macro_rules! string_enum {
    ($(#[$meta:meta])* $name:ident { $($(#[$vmeta:meta])* $variant:ident => $text:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(rename_all = "lowercase")]
        pub enum $name {
            $($(#[$vmeta])* $variant),+
        }

        impl $name {
            /// Database / wire representation.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl std::str::FromStr for $name {
            type Err = PostForgeError;

            fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(PostForgeError::validation(format!(
                        concat!("unknown ", stringify!($name), " '{}'"),
                        other
                    ))),
                }
            }
        }
    };
}

// ---------------------------------------------------------------------------
// Keyword
// ---------------------------------------------------------------------------

string_enum! {
    /// Search intent behind a keyword.
    SearchIntent {
        Commercial => "commercial",
        Informational => "informational",
        Navigational => "navigational",
        Transactional => "transactional",
        Local => "local",
    }
}

string_enum! {
    /// Keyword lifecycle.
    KeywordStatus {
        Pending => "pending",
        Used => "used",
        Archived => "archived",
    }
}

/// A search phrase targeted for content generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Keyword {
    pub id: String,
    pub text: String,
    pub intent: SearchIntent,
    /// Higher values are picked first.
    pub priority: i64,
    pub status: KeywordStatus,
    /// Optional grouping labels (cluster, city, category).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Keyword {
    /// Build a new pending keyword.
    pub fn new(text: impl Into<String>, intent: SearchIntent, priority: i64) -> Self {
        Self {
            id: new_id(),
            text: text.into(),
            intent,
            priority,
            status: KeywordStatus::Pending,
            groups: Vec::new(),
            created_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Topic
// ---------------------------------------------------------------------------

string_enum! {
    /// Topic lifecycle. `Approved`/`Rejected` are set by editors only.
    TopicStatus {
        Pending => "pending",
        Approved => "approved",
        Rejected => "rejected",
        Used => "used",
    }
}

/// A concrete article idea derived from a keyword.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Topic {
    pub id: String,
    pub keyword_id: String,
    pub title: String,
    pub angle: String,
    /// Planned section headings.
    #[serde(default)]
    pub outline: Vec<String>,
    /// Relevance score, 0–100.
    pub relevance_score: u8,
    pub status: TopicStatus,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Post
// ---------------------------------------------------------------------------

string_enum! {
    /// Publication state of a post.
    PostStatus {
        Draft => "draft",
        Scheduled => "scheduled",
        Published => "published",
    }
}

/// One heading in a post's table of contents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TocEntry {
    /// Heading level, 1–6.
    pub level: u8,
    /// Plain heading text.
    pub text: String,
    /// Anchor id emitted on the rendered heading.
    pub anchor: String,
}

/// A question/answer pair rendered as FAQ structured data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaqItem {
    pub question: String,
    pub answer: String,
}

/// A generated article.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Post {
    pub id: String,
    pub title: String,
    /// Globally unique URL slug.
    pub slug: String,
    pub canonical_url: String,
    pub markdown: String,
    pub html: String,
    pub toc: Vec<TocEntry>,
    pub excerpt: String,
    pub word_count: usize,
    /// Minutes.
    pub reading_time: u32,
    pub seo_title: String,
    pub meta_description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover_image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub og_image: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub faq: Vec<FaqItem>,
    pub status: PostStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published_at: Option<DateTime<Utc>>,
    /// SHA-256 of the markdown body.
    pub content_hash: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyword_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Token usage
// ---------------------------------------------------------------------------

/// Token accounting reported by the generation service.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
}

impl TokenUsage {
    pub fn total(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

impl std::ops::Add for TokenUsage {
    type Output = TokenUsage;

    fn add(self, rhs: Self) -> Self::Output {
        TokenUsage {
            prompt_tokens: self.prompt_tokens + rhs.prompt_tokens,
            completion_tokens: self.completion_tokens + rhs.completion_tokens,
        }
    }
}

impl std::ops::AddAssign for TokenUsage {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

// ---------------------------------------------------------------------------
// JobRun
// ---------------------------------------------------------------------------

string_enum! {
    /// Job run state machine: `pending → running → {completed | failed}`.
    JobStatus {
        Pending => "pending",
        Running => "running",
        Completed => "completed",
        Failed => "failed",
    }
}

impl JobStatus {
    /// Terminal states never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Durable record of one pipeline execution attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRun {
    pub id: String,
    pub job_type: String,
    pub status: JobStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyword_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_id: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub token_usage: TokenUsage,
    #[serde(default)]
    pub image_generated: bool,
}

/// One append-only log line attached to a job run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobLogLine {
    pub seq: i64,
    pub logged_at: DateTime<Utc>,
    pub line: String,
}

// ---------------------------------------------------------------------------
// ScheduleConfig
// ---------------------------------------------------------------------------

/// Admin-controlled scheduler settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    pub enabled: bool,
    pub posts_per_run: u32,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            posts_per_run: 1,
        }
    }
}
