//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use postforge_core::jobs::JobTracker;
use postforge_core::pipeline::{
    Pipeline, PipelineResult, PipelineSettings, ProgressReporter, PublishMode, RunRequest,
};
use postforge_core::posts::{PostUpdate, update_post};
use postforge_core::quality::RuleBasedGate;
use postforge_core::scheduler::Scheduler;
use postforge_core::worker::PipelineWorker;
use postforge_generation::HttpGenerationClient;
use postforge_shared::{
    AppConfig, GenerationOverrides, Keyword, KeywordStatus, PostForgeError, PostStatus,
    SearchIntent, Tone, init_config, load_config, load_config_from, validate_api_key,
};
use postforge_storage::Storage;
use tracing::info;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// PostForge: turn keywords into quality-checked articles.
#[derive(Parser)]
#[command(
    name = "postforge",
    version,
    about = "Generate, gate, and schedule SEO articles from a keyword backlog.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file (defaults to ~/.postforge/postforge.toml).
    #[arg(long, global = true, env = "POSTFORGE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Database file, overriding `[database] path`.
    #[arg(long, global = true, env = "POSTFORGE_DB")]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Generate one post.
    Run(RunArgs),

    /// Run one scheduler tick.
    Tick,

    /// Tick on an interval until interrupted.
    Daemon {
        /// Seconds between ticks (defaults to `[scheduler] interval_secs`).
        #[arg(long)]
        interval: Option<u64>,
    },

    /// Inspect and maintain job runs.
    Jobs {
        #[command(subcommand)]
        action: JobsAction,
    },

    /// Manage the keyword backlog.
    Keywords {
        #[command(subcommand)]
        action: KeywordsAction,
    },

    /// Inspect generated topics.
    Topics {
        #[command(subcommand)]
        action: TopicsAction,
    },

    /// Inspect and edit posts.
    Posts {
        #[command(subcommand)]
        action: PostsAction,
    },

    /// Scheduler settings.
    Schedule {
        #[command(subcommand)]
        action: ScheduleAction,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Args)]
pub(crate) struct RunArgs {
    /// Keyword id (defaults to the highest-priority pending keyword).
    #[arg(long)]
    keyword: Option<String>,

    /// Topic id (defaults to generating topics and taking the best).
    #[arg(long)]
    topic: Option<String>,

    /// Run on the background worker; prints the job id when queued.
    #[arg(long)]
    background: bool,

    /// Publish the post immediately.
    #[arg(long, conflicts_with = "schedule_at")]
    publish: bool,

    /// Schedule the post (RFC 3339 timestamp).
    #[arg(long)]
    schedule_at: Option<DateTime<Utc>>,

    #[arg(long)]
    min_words: Option<u32>,

    #[arg(long)]
    max_words: Option<u32>,

    /// professional, conversational, friendly, or authoritative.
    #[arg(long)]
    tone: Option<Tone>,

    /// Target keyword density, in percent.
    #[arg(long)]
    keyword_density: Option<f32>,

    /// Skip the FAQ section.
    #[arg(long)]
    no_faq: bool,

    /// Print the result as JSON.
    #[arg(long)]
    json: bool,
}

#[derive(Subcommand)]
pub(crate) enum JobsAction {
    /// Most recent job runs.
    List {
        #[arg(long, default_value = "20")]
        limit: u32,
    },
    /// One job run and its log.
    Show { id: String },
    /// Fail job runs stuck longer than the TTL.
    Reap {
        /// Seconds (defaults to `[pipeline] stale_job_ttl_secs`).
        #[arg(long)]
        ttl_secs: Option<u64>,
    },
}

#[derive(Subcommand)]
pub(crate) enum KeywordsAction {
    /// Add a keyword to the backlog.
    Add {
        text: String,
        #[arg(long, default_value = "informational")]
        intent: SearchIntent,
        #[arg(long, default_value = "0")]
        priority: i64,
        /// Grouping label (repeatable).
        #[arg(long = "group")]
        groups: Vec<String>,
    },
    /// List keywords, highest priority first.
    List {
        #[arg(long)]
        status: Option<KeywordStatus>,
    },
    /// Archive a keyword so it is never picked.
    Archive { id: String },
}

#[derive(Subcommand)]
pub(crate) enum TopicsAction {
    /// List topics, optionally for one keyword.
    List {
        #[arg(long)]
        keyword: Option<String>,
    },
}

#[derive(Subcommand)]
pub(crate) enum PostsAction {
    /// Most recent posts.
    List {
        #[arg(long)]
        status: Option<PostStatus>,
        #[arg(long, default_value = "20")]
        limit: u32,
    },
    /// One post by id or slug.
    Show {
        id_or_slug: String,
        /// Print the Markdown body.
        #[arg(long)]
        body: bool,
    },
    /// Edit a post.
    Edit {
        id: String,
        #[arg(long)]
        title: Option<String>,
        /// Replace the body with this Markdown file.
        #[arg(long)]
        markdown_file: Option<PathBuf>,
        #[arg(long)]
        slug: Option<String>,
        #[arg(long)]
        seo_title: Option<String>,
        #[arg(long)]
        meta_description: Option<String>,
        #[arg(long)]
        status: Option<PostStatus>,
        #[arg(long)]
        schedule_at: Option<DateTime<Utc>>,
        /// Cover image URL; empty clears it.
        #[arg(long)]
        cover_image: Option<String>,
    },
}

#[derive(Subcommand)]
pub(crate) enum ScheduleAction {
    /// Show scheduler settings.
    Show,
    /// Change scheduler settings.
    Set {
        #[arg(long)]
        enabled: Option<bool>,
        #[arg(long)]
        posts_per_run: Option<u32>,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "postforge=info",
        1 => "postforge=debug",
        _ => "postforge=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    if let Command::Config { action } = &cli.command {
        return match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(&cli),
        };
    }

    let config = resolve_config(&cli)?;
    match cli.command {
        Command::Run(args) => cmd_run(&config, args).await,
        Command::Tick => cmd_tick(&config).await,
        Command::Daemon { interval } => cmd_daemon(&config, interval).await,
        Command::Jobs { action } => match action {
            JobsAction::List { limit } => cmd_jobs_list(&config, limit).await,
            JobsAction::Show { id } => cmd_jobs_show(&config, &id).await,
            JobsAction::Reap { ttl_secs } => cmd_jobs_reap(&config, ttl_secs).await,
        },
        Command::Keywords { action } => match action {
            KeywordsAction::Add {
                text,
                intent,
                priority,
                groups,
            } => cmd_keywords_add(&config, &text, intent, priority, groups).await,
            KeywordsAction::List { status } => cmd_keywords_list(&config, status).await,
            KeywordsAction::Archive { id } => cmd_keywords_archive(&config, &id).await,
        },
        Command::Topics { action } => match action {
            TopicsAction::List { keyword } => cmd_topics_list(&config, keyword.as_deref()).await,
        },
        Command::Posts { action } => match action {
            PostsAction::List { status, limit } => cmd_posts_list(&config, status, limit).await,
            PostsAction::Show { id_or_slug, body } => {
                cmd_posts_show(&config, &id_or_slug, body).await
            }
            PostsAction::Edit {
                id,
                title,
                markdown_file,
                slug,
                seo_title,
                meta_description,
                status,
                schedule_at,
                cover_image,
            } => {
                let markdown = markdown_file.as_deref().map(read_markdown).transpose()?;
                let update = PostUpdate {
                    title,
                    markdown,
                    slug,
                    seo_title,
                    meta_description,
                    status,
                    scheduled_at: schedule_at,
                    cover_image,
                };
                cmd_posts_edit(&config, &id, update).await
            }
        },
        Command::Schedule { action } => match action {
            ScheduleAction::Show => cmd_schedule_show(&config).await,
            ScheduleAction::Set {
                enabled,
                posts_per_run,
            } => cmd_schedule_set(&config, enabled, posts_per_run).await,
        },
        Command::Config { .. } => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

/// Config file (explicit or default) with CLI overrides applied.
fn resolve_config(cli: &Cli) -> Result<AppConfig> {
    let mut config = match &cli.config {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    if let Some(db) = &cli.db {
        config.database.path = db.to_string_lossy().to_string();
    }
    Ok(config)
}

async fn open_storage(config: &AppConfig) -> Result<Arc<Storage>> {
    let path = config.database.resolved_path()?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| PostForgeError::io(parent, e))?;
    }
    Ok(Arc::new(Storage::open(&path).await?))
}

async fn open_storage_readonly(config: &AppConfig) -> Result<Storage> {
    let path = config.database.resolved_path()?;
    Ok(Storage::open_readonly(&path).await?)
}

fn build_pipeline(config: &AppConfig, storage: Arc<Storage>) -> Result<Pipeline> {
    let api_key = validate_api_key(config)?;
    let client = HttpGenerationClient::new(&config.generation, Some(api_key))?;
    let gate = RuleBasedGate::new(config.quality.clone());
    Ok(Pipeline::new(
        storage,
        Arc::new(client),
        Arc::new(gate),
        PipelineSettings::from_config(config),
    ))
}

fn read_markdown(path: &Path) -> Result<String> {
    Ok(std::fs::read_to_string(path).map_err(|e| PostForgeError::io(path, e))?)
}

// ---------------------------------------------------------------------------
// run / tick / daemon
// ---------------------------------------------------------------------------

async fn cmd_run(config: &AppConfig, args: RunArgs) -> Result<()> {
    let storage = open_storage(config).await?;
    let pipeline = build_pipeline(config, storage)?;

    let publish = match (args.publish, args.schedule_at) {
        (_, Some(at)) => PublishMode::Schedule(at),
        (true, None) => PublishMode::Publish,
        (false, None) => PublishMode::Draft,
    };
    let request = RunRequest {
        keyword_id: args.keyword,
        topic_id: args.topic,
        overrides: GenerationOverrides {
            min_words: args.min_words,
            max_words: args.max_words,
            tone: args.tone,
            keyword_density: args.keyword_density,
            include_faq: args.no_faq.then_some(false),
        },
        publish,
        job_id: None,
    };

    info!(
        keyword = request.keyword_id.as_deref().unwrap_or("auto"),
        topic = request.topic_id.as_deref().unwrap_or("auto"),
        background = args.background,
        "starting generation run"
    );

    if args.background {
        return run_in_background(&pipeline, request).await;
    }

    let reporter = CliProgress::new();
    let result = pipeline.run_with_progress(request, &reporter).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_result(config, &pipeline, &result).await?;
    }

    if result.success {
        Ok(())
    } else {
        Err(eyre!("generation run {} failed", result.job_run_id))
    }
}

/// Queue the run on a worker, then wait for it; the process owns the worker.
async fn run_in_background(pipeline: &Pipeline, request: RunRequest) -> Result<()> {
    let worker = PipelineWorker::spawn(pipeline.clone(), 1);
    let accepted = worker.submit(request).await?;
    println!("Queued job {}", accepted.job_run_id);

    worker.shutdown().await;
    let job = pipeline.jobs().get(&accepted.job_run_id).await?;
    println!("Job {} finished: {}", job.id, job.status);
    match job.error {
        Some(error) => Err(eyre!("job {} failed: {error}", job.id)),
        None => Ok(()),
    }
}

async fn print_result(config: &AppConfig, pipeline: &Pipeline, result: &PipelineResult) -> Result<()> {
    println!();
    if result.success {
        println!("  Post generated!");
        if let Some(post_id) = &result.post_id {
            if let Some(post) = pipeline.storage().get_post(post_id).await? {
                println!("  ID:      {}", post.id);
                println!("  Title:   {}", post.title);
                println!("  URL:     {}", post.canonical_url);
                println!("  Status:  {}", post.status);
                println!("  Words:   {} ({} min read)", post.word_count, post.reading_time);
            }
        }
    } else {
        println!("  Generation failed.");
        for error in &result.errors {
            println!("  error:   {error}");
        }
    }
    for warning in &result.warnings {
        println!("  warning: {warning}");
    }
    if let Some(report) = &result.quality_report {
        println!("  Quality: {}/100", report.score);
    }
    println!("  Job:     {}", result.job_run_id);
    println!(
        "  Tokens:  {} ({} prompt, {} completion, model {})",
        result.token_usage.total(),
        result.token_usage.prompt_tokens,
        result.token_usage.completion_tokens,
        config.generation.model
    );
    println!();
    Ok(())
}

async fn cmd_tick(config: &AppConfig) -> Result<()> {
    let storage = open_storage(config).await?;
    let scheduler = Scheduler::new(build_pipeline(config, storage)?);
    let outcome = scheduler.tick().await?;

    println!("{}", outcome.message);
    for id in &outcome.reaped {
        println!("  reaped stale job {id}");
    }
    for id in &outcome.job_run_ids {
        println!("  job {id}");
    }
    Ok(())
}

async fn cmd_daemon(config: &AppConfig, interval: Option<u64>) -> Result<()> {
    let interval = Duration::from_secs(interval.unwrap_or(config.scheduler.interval_secs).max(1));
    let storage = open_storage(config).await?;
    let scheduler = Scheduler::new(build_pipeline(config, storage)?);

    info!(interval_secs = interval.as_secs(), "scheduler daemon started");
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "could not listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };
    scheduler.run_forever(interval, shutdown).await;
    Ok(())
}

// ---------------------------------------------------------------------------
// jobs
// ---------------------------------------------------------------------------

async fn cmd_jobs_list(config: &AppConfig, limit: u32) -> Result<()> {
    let tracker = JobTracker::new(Arc::new(open_storage_readonly(config).await?));
    let jobs = tracker.list_recent(limit).await?;
    if jobs.is_empty() {
        println!("No job runs.");
        return Ok(());
    }
    for job in jobs {
        let duration = job
            .duration_ms
            .map(|ms| format!("{:.1}s", ms as f64 / 1000.0))
            .unwrap_or_else(|| "-".into());
        println!(
            "{}  {:<9}  {:>7}  {}  {}",
            job.id,
            job.status,
            duration,
            job.created_at.format("%Y-%m-%d %H:%M"),
            job.error.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

async fn cmd_jobs_show(config: &AppConfig, id: &str) -> Result<()> {
    let storage = Arc::new(open_storage_readonly(config).await?);
    let tracker = JobTracker::new(storage);
    let job = tracker.get(id).await?;

    println!("{}", serde_json::to_string_pretty(&job)?);
    let logs = tracker.logs(id).await?;
    if !logs.is_empty() {
        println!();
        for line in logs {
            println!("  [{}] {}", line.logged_at.format("%H:%M:%S%.3f"), line.line);
        }
    }
    Ok(())
}

async fn cmd_jobs_reap(config: &AppConfig, ttl_secs: Option<u64>) -> Result<()> {
    let ttl = Duration::from_secs(ttl_secs.unwrap_or(config.pipeline.stale_job_ttl_secs));
    let tracker = JobTracker::new(open_storage(config).await?);
    let reaped = tracker.reap_stale(ttl).await?;
    println!("Reaped {} stale job run(s).", reaped.len());
    for id in reaped {
        println!("  {id}");
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// keywords / topics
// ---------------------------------------------------------------------------

async fn cmd_keywords_add(
    config: &AppConfig,
    text: &str,
    intent: SearchIntent,
    priority: i64,
    groups: Vec<String>,
) -> Result<()> {
    let text = text.trim();
    if text.is_empty() {
        return Err(eyre!("keyword text cannot be empty"));
    }
    let storage = open_storage(config).await?;
    let keyword = Keyword {
        groups,
        ..Keyword::new(text, intent, priority)
    };
    storage.insert_keyword(&keyword).await?;
    println!("Added keyword {} ({})", keyword.id, keyword.text);
    Ok(())
}

async fn cmd_keywords_list(config: &AppConfig, status: Option<KeywordStatus>) -> Result<()> {
    let storage = open_storage_readonly(config).await?;
    let keywords = storage.list_keywords(status).await?;
    if keywords.is_empty() {
        println!("No keywords.");
        return Ok(());
    }
    for kw in keywords {
        println!(
            "{}  {:<8}  {:>4}  {:<13}  {}",
            kw.id, kw.status, kw.priority, kw.intent, kw.text
        );
    }
    Ok(())
}

async fn cmd_keywords_archive(config: &AppConfig, id: &str) -> Result<()> {
    let storage = open_storage(config).await?;
    if !storage.set_keyword_status(id, KeywordStatus::Archived).await? {
        return Err(PostForgeError::not_found("keyword", id).into());
    }
    println!("Archived keyword {id}");
    Ok(())
}

async fn cmd_topics_list(config: &AppConfig, keyword: Option<&str>) -> Result<()> {
    let storage = open_storage_readonly(config).await?;
    let topics = storage.list_topics(keyword).await?;
    if topics.is_empty() {
        println!("No topics.");
        return Ok(());
    }
    for topic in topics {
        println!(
            "{}  {:<8}  {:>3}  {}",
            topic.id, topic.status, topic.relevance_score, topic.title
        );
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// posts
// ---------------------------------------------------------------------------

async fn cmd_posts_list(config: &AppConfig, status: Option<PostStatus>, limit: u32) -> Result<()> {
    let storage = open_storage_readonly(config).await?;
    let posts = storage.list_posts(status, limit).await?;
    if posts.is_empty() {
        println!("No posts.");
        return Ok(());
    }
    for post in posts {
        println!(
            "{}  {:<9}  {:>5}w  {}",
            post.id, post.status, post.word_count, post.slug
        );
    }
    Ok(())
}

async fn cmd_posts_show(config: &AppConfig, id_or_slug: &str, body: bool) -> Result<()> {
    let storage = open_storage_readonly(config).await?;
    let post = match storage.get_post(id_or_slug).await? {
        Some(post) => post,
        None => storage
            .get_post_by_slug(id_or_slug)
            .await?
            .ok_or_else(|| PostForgeError::not_found("post", id_or_slug))?,
    };

    println!("  ID:          {}", post.id);
    println!("  Title:       {}", post.title);
    println!("  URL:         {}", post.canonical_url);
    println!("  Status:      {}", post.status);
    if let Some(at) = post.scheduled_at {
        println!("  Scheduled:   {}", at.to_rfc3339());
    }
    if let Some(at) = post.published_at {
        println!("  Published:   {}", at.to_rfc3339());
    }
    println!("  Words:       {} ({} min read)", post.word_count, post.reading_time);
    println!("  SEO title:   {}", post.seo_title);
    println!("  Description: {}", post.meta_description);
    println!("  Sections:    {}", post.toc.len());
    println!("  FAQ items:   {}", post.faq.len());
    println!("  Hash:        {}", post.content_hash);
    if body {
        println!();
        println!("{}", post.markdown);
    }
    Ok(())
}

async fn cmd_posts_edit(config: &AppConfig, id: &str, update: PostUpdate) -> Result<()> {
    let storage = open_storage(config).await?;
    let settings = PipelineSettings::from_config(config);
    let post = update_post(&storage, &settings.site, &settings.render, id, update).await?;
    println!("Updated post {} ({}, {})", post.id, post.slug, post.status);
    Ok(())
}

// ---------------------------------------------------------------------------
// schedule / config
// ---------------------------------------------------------------------------

async fn cmd_schedule_show(config: &AppConfig) -> Result<()> {
    let storage = open_storage_readonly(config).await?;
    let schedule = storage.get_schedule_config().await?;
    println!("  Enabled:       {}", schedule.enabled);
    println!("  Posts per run: {}", schedule.posts_per_run);
    println!("  Interval:      {}s", config.scheduler.interval_secs);
    Ok(())
}

async fn cmd_schedule_set(
    config: &AppConfig,
    enabled: Option<bool>,
    posts_per_run: Option<u32>,
) -> Result<()> {
    let storage = open_storage(config).await?;
    let mut schedule = storage.get_schedule_config().await?;
    if let Some(enabled) = enabled {
        schedule.enabled = enabled;
    }
    if let Some(n) = posts_per_run {
        if n == 0 {
            return Err(eyre!("posts-per-run must be at least 1"));
        }
        schedule.posts_per_run = n;
    }
    storage.set_schedule_config(&schedule).await?;
    println!(
        "Schedule {} ({} post(s) per run)",
        if schedule.enabled { "enabled" } else { "disabled" },
        schedule.posts_per_run
    );
    Ok(())
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(cli: &Cli) -> Result<()> {
    let config = resolve_config(cli)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg} ({elapsed})")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(style);
        spinner.enable_steady_tick(Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn done(&self, _result: &PipelineResult) {
        self.spinner.finish_and_clear();
    }
}
