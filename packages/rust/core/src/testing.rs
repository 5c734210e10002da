//! Shared fixtures for the crate's tests.

use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use postforge_generation::{
    DraftRequest, DraftResponse, GenerationClient, TopicCandidate, TopicRequest, TopicResponse,
};
use postforge_shared::{
    FaqItem, Keyword, Post, PostForgeError, PostStatus, Result, SearchIntent, TokenUsage, Topic,
    TopicStatus, new_id,
};
use postforge_storage::Storage;
use uuid::Uuid;

use crate::pipeline::{Pipeline, PipelineSettings};
use crate::quality::{DraftForReview, QualityGate, QualityReport};

pub const TOPIC_USAGE: TokenUsage = TokenUsage {
    prompt_tokens: 100,
    completion_tokens: 50,
};

pub const DRAFT_USAGE: TokenUsage = TokenUsage {
    prompt_tokens: 200,
    completion_tokens: 800,
};

pub async fn test_storage() -> Arc<Storage> {
    test_storage_at().await.0
}

/// Storage plus its database path, for tests that open a raw connection.
pub async fn test_storage_at() -> (Arc<Storage>, PathBuf) {
    let tmp = std::env::temp_dir().join(format!("pf_test_{}.db", Uuid::now_v7()));
    let storage = Storage::open(&tmp).await.expect("open test db");
    (Arc::new(storage), tmp)
}

pub fn test_settings() -> PipelineSettings {
    PipelineSettings {
        service_timeout: Duration::from_secs(5),
        ..PipelineSettings::default()
    }
}

pub fn test_pipeline(
    storage: Arc<Storage>,
    client: Arc<dyn GenerationClient>,
    gate: Arc<dyn QualityGate>,
) -> Pipeline {
    Pipeline::new(storage, client, gate, test_settings())
}

pub fn sample_keyword() -> Keyword {
    Keyword::new("mold remediation", SearchIntent::Local, 5)
}

pub fn sample_topic(title: &str) -> Topic {
    Topic {
        id: new_id(),
        keyword_id: "kw-test".into(),
        title: title.into(),
        angle: "Practical advice for homeowners".into(),
        outline: vec!["Signs".into(), "Process".into(), "Costs".into()],
        relevance_score: 80,
        status: TopicStatus::Pending,
        created_at: Utc::now(),
    }
}

pub fn sample_post(slug: &str) -> Post {
    let now = Utc::now();
    Post {
        id: new_id(),
        title: "Archived Sample Article".into(),
        slug: slug.into(),
        canonical_url: format!("https://example.com/blog/{slug}"),
        markdown: "# Archived Sample Article\n\nBody.".into(),
        html: "<h1>Archived Sample Article</h1><p>Body.</p>".into(),
        toc: Vec::new(),
        excerpt: "Body.".into(),
        word_count: 4,
        reading_time: 1,
        seo_title: "Archived Sample Article".into(),
        meta_description: "Body.".into(),
        cover_image: None,
        og_image: None,
        faq: Vec::new(),
        status: PostStatus::Draft,
        scheduled_at: None,
        published_at: None,
        content_hash: "0".repeat(64),
        keyword_id: None,
        topic_id: None,
        created_at: now,
        updated_at: now,
    }
}

pub fn candidate(title: &str, score: f64) -> TopicCandidate {
    TopicCandidate {
        title: title.into(),
        angle: format!("Angle for {title}"),
        outline: vec!["Overview".into(), "Details".into(), "Next steps".into()],
        relevance_score: score,
    }
}

/// A clean article of roughly 900 words with four sections. `keyword`
/// appears once in the H1, once in the intro, and once per section.
pub fn article_body(keyword: &str) -> String {
    const FILLER: &str = "Homeowners who act early usually spend less money and protect the structure of their homes from lasting damage.";
    let paragraph = std::iter::repeat_n(FILLER, 12).collect::<Vec<_>>().join(" ");

    let mut body = format!(
        "# A Practical Guide to {keyword}\n\nThis guide explains {keyword} in plain language for busy homeowners.\n\n"
    );
    for heading in [
        "Understanding the Problem",
        "Planning the Work",
        "Choosing a Professional",
        "Keeping Results",
    ] {
        body.push_str(&format!(
            "## {heading}\n\nGood {keyword} work starts with a clear plan. {paragraph}\n\n"
        ));
    }
    body
}

// ---------------------------------------------------------------------------
// Generation stub
// ---------------------------------------------------------------------------

enum DraftBehavior {
    Body(String),
    Error(String),
    Panic,
}

/// Scripted [`GenerationClient`] that records how it was called.
pub struct StubClient {
    topics: Vec<TopicCandidate>,
    draft: DraftBehavior,
    faq: Option<Vec<FaqItem>>,
    image: Option<String>,
    delay: Duration,
    topic_calls: AtomicUsize,
    draft_calls: AtomicUsize,
    last_topic_count: Mutex<Option<u32>>,
}

impl StubClient {
    pub fn new() -> Self {
        Self {
            topics: vec![
                candidate("Mold Remediation in Plano: What to Expect", 90.0),
                candidate("How Long Does Mold Cleanup Take", 70.0),
            ],
            draft: DraftBehavior::Body(article_body("mold remediation")),
            faq: None,
            image: None,
            delay: Duration::from_millis(5),
            topic_calls: AtomicUsize::new(0),
            draft_calls: AtomicUsize::new(0),
            last_topic_count: Mutex::new(None),
        }
    }

    pub fn with_topics(mut self, topics: Vec<TopicCandidate>) -> Self {
        self.topics = topics;
        self
    }

    pub fn with_body(mut self, body: &str) -> Self {
        self.draft = DraftBehavior::Body(body.to_string());
        self
    }

    pub fn with_faq(mut self, faq: Vec<FaqItem>) -> Self {
        self.faq = Some(faq);
        self
    }

    pub fn with_image(mut self, url: &str) -> Self {
        self.image = Some(url.to_string());
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_draft_error(mut self, message: &str) -> Self {
        self.draft = DraftBehavior::Error(message.to_string());
        self
    }

    pub fn with_draft_panic(mut self) -> Self {
        self.draft = DraftBehavior::Panic;
        self
    }

    pub fn topic_calls(&self) -> usize {
        self.topic_calls.load(Ordering::SeqCst)
    }

    pub fn draft_calls(&self) -> usize {
        self.draft_calls.load(Ordering::SeqCst)
    }

    pub fn last_topic_count(&self) -> Option<u32> {
        *self.last_topic_count.lock().unwrap()
    }
}

#[async_trait]
impl GenerationClient for StubClient {
    async fn generate_topics(&self, request: &TopicRequest) -> Result<TopicResponse> {
        self.topic_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_topic_count.lock().unwrap() = Some(request.count);
        tokio::time::sleep(self.delay).await;
        Ok(TopicResponse {
            topics: self.topics.clone(),
            token_usage: TOPIC_USAGE,
        })
    }

    async fn generate_draft(&self, _request: &DraftRequest) -> Result<DraftResponse> {
        self.draft_calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        match &self.draft {
            DraftBehavior::Body(body) => Ok(DraftResponse {
                content: body.clone(),
                faq: self.faq.clone(),
                token_usage: DRAFT_USAGE,
            }),
            DraftBehavior::Error(message) => Err(PostForgeError::Generation(message.clone())),
            DraftBehavior::Panic => panic!("stub draft panic"),
        }
    }

    async fn generate_image(&self, _prompt: &str) -> Result<Option<String>> {
        Ok(self.image.clone())
    }
}

// ---------------------------------------------------------------------------
// Gate stub
// ---------------------------------------------------------------------------

/// Gate that rejects every draft with fixed errors.
pub struct RejectingGate {
    errors: Vec<String>,
}

impl RejectingGate {
    pub fn new(errors: &[&str]) -> Self {
        Self {
            errors: errors.iter().map(|e| e.to_string()).collect(),
        }
    }
}

impl QualityGate for RejectingGate {
    fn evaluate(&self, _draft: &DraftForReview<'_>, _topic: &Topic, _keyword: &Keyword) -> QualityReport {
        QualityReport::from_findings(self.errors.clone(), Vec::new())
    }
}
