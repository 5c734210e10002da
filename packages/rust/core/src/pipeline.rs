//! End-to-end generation run: keyword → topic → draft → post-process →
//! quality gate → slug → persisted post, tracked by one job run.
//!
//! Every failure after the job run exists is recorded on it before
//! [`Pipeline::run`] returns; callers get `success: false` plus the errors,
//! never a silent empty success.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{info, instrument, warn};

use postforge_generation::GenerationClient;
use postforge_markdown::{RenderOptions, Rendered, render};
use postforge_shared::{
    AppConfig, FaqItem, GenerationConfig, GenerationOverrides, JobStatus, Keyword, KeywordStatus,
    Post, PostForgeError, PostStatus, Result, SiteConfig, TokenUsage, Topic, TopicStatus, new_id,
};
use postforge_storage::Storage;

use crate::drafts;
use crate::jobs::{JobCompletion, JobTracker};
use crate::quality::{DraftForReview, QualityGate, QualityReport};
use crate::slug::{canonical_url, insert_with_unique_slug, make_slug};
use crate::topics;

/// Longest SEO title we emit.
const SEO_TITLE_CHARS: usize = 60;

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// Everything a run needs from configuration.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    /// Recorded on job runs; scopes the single-flight guard.
    pub job_type: String,
    /// Topics requested when the run has to ideate.
    pub topic_count: u32,
    /// Defaults that per-run overrides are merged over.
    pub generation: GenerationConfig,
    pub site: SiteConfig,
    pub render: RenderOptions,
    /// Slug resolution attempts when the insert loses a race.
    pub slug_attempts: u32,
    /// Upper bound for each generation service call.
    pub service_timeout: Duration,
    pub generate_images: bool,
    pub stale_job_ttl: Duration,
}

impl PipelineSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            job_type: config.pipeline.job_type.clone(),
            topic_count: config.pipeline.topic_count,
            generation: config.content.clone(),
            site: config.site.clone(),
            render: RenderOptions {
                words_per_minute: config.pipeline.words_per_minute,
                excerpt_chars: config.pipeline.excerpt_chars,
            },
            slug_attempts: config.pipeline.slug_attempts.max(1),
            service_timeout: Duration::from_secs(config.generation.timeout_secs.max(1)),
            generate_images: config.pipeline.generate_images,
            stale_job_ttl: Duration::from_secs(config.pipeline.stale_job_ttl_secs),
        }
    }
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self::from_config(&AppConfig::default())
    }
}

// ---------------------------------------------------------------------------
// Requests and results
// ---------------------------------------------------------------------------

/// Publication state of the post a run creates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PublishMode {
    #[default]
    Draft,
    Publish,
    Schedule(DateTime<Utc>),
}

impl PublishMode {
    /// `(status, scheduled_at, published_at)` for a post created at `now`.
    fn post_state(
        self,
        now: DateTime<Utc>,
    ) -> (PostStatus, Option<DateTime<Utc>>, Option<DateTime<Utc>>) {
        match self {
            Self::Draft => (PostStatus::Draft, None, None),
            Self::Publish => (PostStatus::Published, None, Some(now)),
            Self::Schedule(at) => (PostStatus::Scheduled, Some(at), None),
        }
    }
}

/// Input to one pipeline run. Everything is optional.
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    /// Explicit keyword; otherwise the highest-priority pending one.
    pub keyword_id: Option<String>,
    /// Explicit topic; otherwise topics are generated and the best is used.
    pub topic_id: Option<String>,
    pub overrides: GenerationOverrides,
    pub publish: PublishMode,
    /// Drive an existing `pending` job run instead of creating one.
    pub job_id: Option<String>,
}

/// Outcome of a run.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_id: Option<String>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    pub job_run_id: String,
    pub token_usage: TokenUsage,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality_report: Option<QualityReport>,
}

impl PipelineResult {
    /// Background submission accepted; the run continues elsewhere.
    pub fn accepted(job_run_id: impl Into<String>) -> Self {
        Self {
            success: true,
            post_id: None,
            errors: Vec::new(),
            warnings: Vec::new(),
            job_run_id: job_run_id.into(),
            token_usage: TokenUsage::default(),
            quality_report: None,
        }
    }

    fn failure(job_run_id: &str, errors: Vec<String>, state: RunState) -> Self {
        Self {
            success: false,
            post_id: None,
            errors,
            warnings: state.warnings,
            job_run_id: job_run_id.to_string(),
            token_usage: state.token_usage,
            quality_report: state.quality_report,
        }
    }
}

// ---------------------------------------------------------------------------
// Progress
// ---------------------------------------------------------------------------

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called when the run has finished, successfully or not.
    fn done(&self, result: &PipelineResult);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn done(&self, _result: &PipelineResult) {}
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

/// Accumulated across stages so failures can still report it.
#[derive(Debug, Default)]
struct RunState {
    token_usage: TokenUsage,
    warnings: Vec<String>,
    quality_report: Option<QualityReport>,
}

struct StageOutput {
    post_id: String,
    image_generated: bool,
}

/// The generation pipeline. Cheap to clone; all parts are shared.
#[derive(Clone)]
pub struct Pipeline {
    storage: Arc<Storage>,
    client: Arc<dyn GenerationClient>,
    gate: Arc<dyn QualityGate>,
    jobs: JobTracker,
    settings: Arc<PipelineSettings>,
}

impl Pipeline {
    pub fn new(
        storage: Arc<Storage>,
        client: Arc<dyn GenerationClient>,
        gate: Arc<dyn QualityGate>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            jobs: JobTracker::new(storage.clone()),
            storage,
            client,
            gate,
            settings: Arc::new(settings),
        }
    }

    pub fn jobs(&self) -> &JobTracker {
        &self.jobs
    }

    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    /// Run synchronously, without progress reporting.
    pub async fn run(&self, request: RunRequest) -> Result<PipelineResult> {
        self.run_with_progress(request, &SilentProgress).await
    }

    /// Run synchronously.
    ///
    /// 1. Create the job run (or adopt `request.job_id`, which must be pending)
    /// 2. Single-flight check against other running jobs of the same type
    /// 3. Mark running
    /// 4. Resolve keyword
    /// 5. Resolve or generate topic
    /// 6. Generate draft
    /// 7. Post-process
    /// 8. Quality gate
    /// 9. Slug and canonical URL
    /// 10. Persist post and consume topic/keyword
    /// 11. Complete the job run
    ///
    /// `Err` is returned only when the job run itself cannot be created or
    /// updated; everything else is a `success: false` result.
    #[instrument(skip_all, fields(keyword_id = ?request.keyword_id, topic_id = ?request.topic_id))]
    pub async fn run_with_progress(
        &self,
        request: RunRequest,
        progress: &dyn ProgressReporter,
    ) -> Result<PipelineResult> {
        let job_id = match &request.job_id {
            Some(id) => {
                let job = self.jobs.get(id).await?;
                if job.status != JobStatus::Pending {
                    return Err(PostForgeError::InvalidTransition {
                        job_id: id.clone(),
                        from: job.status.to_string(),
                        to: JobStatus::Running.to_string(),
                    });
                }
                id.clone()
            }
            None => {
                self.jobs
                    .create(
                        &self.settings.job_type,
                        request.keyword_id.as_deref(),
                        request.topic_id.as_deref(),
                    )
                    .await?
                    .id
            }
        };

        let result = self.execute(&job_id, &request, progress).await?;
        progress.done(&result);
        Ok(result)
    }

    /// Steps 2–11 for an existing pending job run.
    pub(crate) async fn execute(
        &self,
        job_id: &str,
        request: &RunRequest,
        progress: &dyn ProgressReporter,
    ) -> Result<PipelineResult> {
        progress.phase("Checking for running jobs");
        if let Some(running) = self.jobs.find_running(&self.settings.job_type).await? {
            if running.id != job_id {
                let message = PostForgeError::AlreadyRunning {
                    job_id: running.id.clone(),
                }
                .to_string();
                info!(job_id, running = %running.id, "another run holds the guard");
                self.jobs.fail(job_id, &message).await?;
                return Ok(PipelineResult::failure(
                    job_id,
                    vec![message],
                    RunState::default(),
                ));
            }
        }

        self.jobs.mark_running(job_id).await?;

        let mut state = RunState::default();
        match self.run_stages(job_id, request, &mut state, progress).await {
            Ok(output) => {
                self.jobs
                    .complete(
                        job_id,
                        JobCompletion {
                            post_id: Some(output.post_id.clone()),
                            token_usage: state.token_usage,
                            image_generated: output.image_generated,
                        },
                    )
                    .await?;

                info!(
                    job_id,
                    post_id = %output.post_id,
                    warnings = state.warnings.len(),
                    total_tokens = state.token_usage.total(),
                    "pipeline run succeeded"
                );

                Ok(PipelineResult {
                    success: true,
                    post_id: Some(output.post_id),
                    errors: Vec::new(),
                    warnings: state.warnings,
                    job_run_id: job_id.to_string(),
                    token_usage: state.token_usage,
                    quality_report: state.quality_report,
                })
            }
            Err(err) => {
                let errors = match &err {
                    PostForgeError::QualityGate { errors } => errors.clone(),
                    other => vec![other.to_string()],
                };
                if matches!(err, PostForgeError::NoPendingKeyword) {
                    info!(job_id, "nothing to generate");
                } else {
                    warn!(job_id, error = %err, "pipeline run failed");
                }

                self.jobs
                    .fail_with_usage(job_id, &err.to_string(), state.token_usage)
                    .await?;
                Ok(PipelineResult::failure(job_id, errors, state))
            }
        }
    }

    async fn run_stages(
        &self,
        job_id: &str,
        request: &RunRequest,
        state: &mut RunState,
        progress: &dyn ProgressReporter,
    ) -> Result<StageOutput> {
        // --- Keyword ---
        progress.phase("Resolving keyword");
        let (keyword, auto_selected) = self.resolve_keyword(request).await?;
        self.jobs.link(job_id, Some(&keyword.id), None).await?;
        self.log(job_id, format!("keyword '{}' ({})", keyword.text, keyword.id))
            .await;

        // --- Topic ---
        let topic = match &request.topic_id {
            Some(topic_id) => self.load_topic(topic_id, &keyword).await?,
            None => {
                progress.phase("Generating topics");
                self.ideate(job_id, &keyword, state).await?
            }
        };
        self.jobs.link(job_id, None, Some(&topic.id)).await?;
        self.log(job_id, format!("topic '{}' ({})", topic.title, topic.id))
            .await;

        // --- Draft ---
        progress.phase("Generating draft");
        let config = self.settings.generation.merged(&request.overrides)?;
        let draft = drafts::generate_draft(
            self.client.as_ref(),
            &topic,
            &keyword,
            &config,
            self.settings.service_timeout,
        )
        .await?;
        state.token_usage += draft.token_usage;
        self.log(job_id, format!("draft received ({} FAQ items)", draft.faq.len()))
            .await;

        // --- Post-process ---
        progress.phase("Post-processing");
        let rendered = render(&draft.markdown, &self.settings.render);
        self.log(
            job_id,
            format!(
                "rendered {} words, {} headings",
                rendered.word_count,
                rendered.toc.len()
            ),
        )
        .await;

        // --- Quality gate ---
        progress.phase("Checking quality");
        let report = self.gate.evaluate(
            &DraftForReview {
                title: &topic.title,
                rendered: &rendered,
                faq: &draft.faq,
            },
            &topic,
            &keyword,
        );
        state.warnings.extend(report.warnings.iter().cloned());
        state.quality_report = Some(report.clone());
        self.log(
            job_id,
            format!(
                "quality score {} ({} errors, {} warnings)",
                report.score,
                report.errors.len(),
                report.warnings.len()
            ),
        )
        .await;
        if !report.passed {
            return Err(PostForgeError::QualityGate {
                errors: report.errors,
            });
        }

        // --- Cover image (optional) ---
        let cover_image = if self.settings.generate_images {
            progress.phase("Generating cover image");
            self.cover_image(&topic, state).await
        } else {
            None
        };

        // --- Slug + persist ---
        progress.phase("Saving post");
        let post = self.build_post(&topic, &keyword, rendered, draft.faq, cover_image, request.publish);
        let post = self
            .persist(post, &topic, auto_selected.then_some(keyword.id.as_str()))
            .await?;
        self.log(job_id, format!("saved post '{}' as {}", post.slug, post.status))
            .await;

        Ok(StageOutput {
            image_generated: post.cover_image.is_some(),
            post_id: post.id,
        })
    }

    /// Explicit keyword, the topic's keyword, or the best pending one.
    ///
    /// The flag is `true` when the keyword was auto-selected (and so is
    /// consumed on success).
    async fn resolve_keyword(&self, request: &RunRequest) -> Result<(Keyword, bool)> {
        if let Some(id) = &request.keyword_id {
            let keyword = self
                .storage
                .get_keyword(id)
                .await?
                .ok_or_else(|| PostForgeError::not_found("keyword", id.clone()))?;
            if keyword.status == KeywordStatus::Archived {
                return Err(PostForgeError::validation(format!(
                    "keyword '{}' is archived",
                    keyword.text
                )));
            }
            return Ok((keyword, false));
        }

        if let Some(topic_id) = &request.topic_id {
            let topic = self
                .storage
                .get_topic(topic_id)
                .await?
                .ok_or_else(|| PostForgeError::not_found("topic", topic_id.clone()))?;
            let keyword = self
                .storage
                .get_keyword(&topic.keyword_id)
                .await?
                .ok_or_else(|| PostForgeError::not_found("keyword", topic.keyword_id.clone()))?;
            return Ok((keyword, false));
        }

        let keyword = self
            .storage
            .next_pending_keyword()
            .await?
            .ok_or(PostForgeError::NoPendingKeyword)?;
        Ok((keyword, true))
    }

    async fn load_topic(&self, topic_id: &str, keyword: &Keyword) -> Result<Topic> {
        let topic = self
            .storage
            .get_topic(topic_id)
            .await?
            .ok_or_else(|| PostForgeError::not_found("topic", topic_id))?;

        if topic.keyword_id != keyword.id {
            return Err(PostForgeError::validation(format!(
                "topic {topic_id} belongs to keyword {}, not {}",
                topic.keyword_id, keyword.id
            )));
        }
        if matches!(topic.status, TopicStatus::Used | TopicStatus::Rejected) {
            return Err(PostForgeError::validation(format!(
                "topic {topic_id} is {} and cannot be generated",
                topic.status
            )));
        }
        Ok(topic)
    }

    /// Generate topics, persist every candidate, return the best.
    async fn ideate(&self, job_id: &str, keyword: &Keyword, state: &mut RunState) -> Result<Topic> {
        let mut existing = self.storage.list_post_titles().await?;
        existing.extend(self.storage.list_topic_titles(&keyword.id).await?);

        let batch = topics::generate_topics(
            self.client.as_ref(),
            keyword,
            self.settings.topic_count,
            &existing,
            self.settings.service_timeout,
        )
        .await?;
        state.token_usage += batch.token_usage;

        let candidates: Vec<Topic> = batch
            .topics
            .into_iter()
            .map(|idea| idea.into_topic(&keyword.id))
            .collect();
        self.storage.insert_topics(&candidates).await?;
        self.log(job_id, format!("{} topics generated", candidates.len()))
            .await;

        candidates.into_iter().next().ok_or_else(|| {
            PostForgeError::EmptyResult(format!("no topics for keyword '{}'", keyword.text))
        })
    }

    /// Ask for a cover image. Failures only warn.
    async fn cover_image(&self, topic: &Topic, state: &mut RunState) -> Option<String> {
        let call = self.client.generate_image(&topic.title);
        match tokio::time::timeout(self.settings.service_timeout, call).await {
            Ok(Ok(url)) => url,
            Ok(Err(e)) => {
                state.warnings.push(format!("cover image skipped: {e}"));
                None
            }
            Err(_) => {
                state
                    .warnings
                    .push("cover image skipped: generation timed out".to_string());
                None
            }
        }
    }

    fn build_post(
        &self,
        topic: &Topic,
        keyword: &Keyword,
        rendered: Rendered,
        faq: Vec<FaqItem>,
        cover_image: Option<String>,
        publish: PublishMode,
    ) -> Post {
        let now = Utc::now();
        let (status, scheduled_at, published_at) = publish.post_state(now);

        Post {
            id: new_id(),
            title: topic.title.clone(),
            slug: String::new(),
            canonical_url: String::new(),
            content_hash: content_hash(&rendered.markdown),
            markdown: rendered.markdown,
            html: rendered.html,
            toc: rendered.toc,
            meta_description: rendered.excerpt.clone(),
            excerpt: rendered.excerpt,
            word_count: rendered.word_count,
            reading_time: rendered.reading_time,
            seo_title: seo_title(&topic.title),
            og_image: cover_image.clone(),
            cover_image,
            faq,
            status,
            scheduled_at,
            published_at,
            keyword_id: Some(keyword.id.clone()),
            topic_id: Some(topic.id.clone()),
            created_at: now,
            updated_at: now,
        }
    }

    /// Resolve a slug and persist, re-resolving when an insert loses a race.
    async fn persist(
        &self,
        mut post: Post,
        topic: &Topic,
        consume_keyword: Option<&str>,
    ) -> Result<Post> {
        let storage = &self.storage;
        let site = &self.settings.site;
        let base_slug = make_slug(&topic.title);

        let slug = insert_with_unique_slug(storage, &base_slug, self.settings.slug_attempts, |slug| {
            let mut candidate = post.clone();
            async move {
                candidate.canonical_url = canonical_url(site, &slug)?;
                candidate.slug = slug;
                storage
                    .persist_generated_post(&candidate, Some(&topic.id), consume_keyword)
                    .await
            }
        })
        .await?;

        post.canonical_url = canonical_url(site, &slug)?;
        post.slug = slug;
        Ok(post)
    }

    /// Append to the job log; a closed log only warns.
    async fn log(&self, job_id: &str, line: String) {
        if let Err(e) = self.jobs.append_log(job_id, &line).await {
            warn!(job_id, error = %e, "could not append job log line");
        }
    }
}

/// Compute SHA-256 hash of content.
pub(crate) fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Title cut to [`SEO_TITLE_CHARS`] at a word boundary.
fn seo_title(title: &str) -> String {
    if title.chars().count() <= SEO_TITLE_CHARS {
        return title.to_string();
    }
    let mut out = String::new();
    for word in title.split_whitespace() {
        let extra = if out.is_empty() { 0 } else { 1 };
        if out.chars().count() + extra + word.chars().count() > SEO_TITLE_CHARS {
            break;
        }
        if extra == 1 {
            out.push(' ');
        }
        out.push_str(word);
    }
    if out.is_empty() {
        title.chars().take(SEO_TITLE_CHARS).collect()
    } else {
        out
    }
}
