//! libSQL storage layer (local embedded mode).
//!
//! The [`Storage`] struct wraps a libSQL database holding keywords, topics,
//! posts, job runs with their log lines, and the scheduler settings.
//!
//! **Access rules:**
//! - Pipeline and CLI: read-write via [`Storage::open`]
//! - Dashboards and inspection commands: read-only via [`Storage::open_readonly`]
//!
//! Job run status changes are conditional updates (`... WHERE status = ?`);
//! the returned `bool` says whether the row actually moved, so a terminal
//! row is never rewritten.

mod migrations;

use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database, Row, params};
use postforge_shared::{
    FaqItem, JobLogLine, JobRun, JobStatus, Keyword, KeywordStatus, Post, PostForgeError,
    PostStatus, Result, ScheduleConfig, TocEntry, TokenUsage, Topic, TopicStatus,
};
use tracing::debug;

/// Primary storage handle wrapping a libSQL database.
pub struct Storage {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
    readonly: bool,
}

impl Storage {
    /// Open or create a database at `path` in read-write mode.
    pub async fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| PostForgeError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(db_err)?;

        let conn = db.connect().map_err(db_err)?;

        let storage = Self {
            db,
            conn,
            readonly: false,
        };
        storage.run_migrations().await?;
        Ok(storage)
    }

    /// Open an existing database at `path` in read-only mode.
    pub async fn open_readonly(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(PostForgeError::not_found("database", path.display().to_string()));
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(db_err)?;

        let conn = db.connect().map_err(db_err)?;

        Ok(Self {
            db,
            conn,
            readonly: true,
        })
    }

    /// Run pending schema migrations.
    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn.execute_batch(migration.sql).await.map_err(|e| {
                    PostForgeError::Storage(format!("migration v{} failed: {e}", migration.version))
                })?;
            }
        }
        Ok(())
    }

    /// Get the current schema version, or 0 if no migrations have been applied.
    async fn get_schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => {
                if let Ok(Some(row)) = rows.next().await {
                    row.get::<u32>(0).unwrap_or(0)
                } else {
                    0
                }
            }
            Err(_) => 0, // Table doesn't exist yet
        }
    }

    /// Ensure we're in read-write mode before writing.
    fn check_writable(&self) -> Result<()> {
        if self.readonly {
            return Err(PostForgeError::Storage(
                "database is opened in read-only mode".into(),
            ));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Keyword operations
    // -----------------------------------------------------------------------

    /// Insert a new keyword.
    pub async fn insert_keyword(&self, keyword: &Keyword) -> Result<()> {
        self.check_writable()?;
        self.conn
            .execute(
                "INSERT INTO keywords (id, text, intent, priority, status, groups_json, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    keyword.id.as_str(),
                    keyword.text.as_str(),
                    keyword.intent.as_str(),
                    keyword.priority,
                    keyword.status.as_str(),
                    to_json(&keyword.groups)?,
                    fmt_ts(&keyword.created_at),
                ],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// Get a keyword by ID.
    pub async fn get_keyword(&self, id: &str) -> Result<Option<Keyword>> {
        let sql = format!("SELECT {KEYWORD_COLUMNS} FROM keywords WHERE id = ?1");
        let mut rows = self.conn.query(&sql, params![id]).await.map_err(db_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_keyword(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(db_err(e)),
        }
    }

    /// List keywords, optionally filtered by status, best candidates first.
    pub async fn list_keywords(&self, status: Option<KeywordStatus>) -> Result<Vec<Keyword>> {
        let mut rows = match status {
            Some(status) => {
                let sql = format!(
                    "SELECT {KEYWORD_COLUMNS} FROM keywords WHERE status = ?1
                     ORDER BY priority DESC, created_at ASC"
                );
                self.conn.query(&sql, params![status.as_str()]).await
            }
            None => {
                let sql = format!(
                    "SELECT {KEYWORD_COLUMNS} FROM keywords ORDER BY priority DESC, created_at ASC"
                );
                self.conn.query(&sql, params![]).await
            }
        }
        .map_err(db_err)?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_keyword(&row)?);
        }
        Ok(results)
    }

    /// Highest-priority pending keyword; ties go to the oldest.
    pub async fn next_pending_keyword(&self) -> Result<Option<Keyword>> {
        let sql = format!(
            "SELECT {KEYWORD_COLUMNS} FROM keywords WHERE status = 'pending'
             ORDER BY priority DESC, created_at ASC LIMIT 1"
        );
        let mut rows = self.conn.query(&sql, params![]).await.map_err(db_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_keyword(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(db_err(e)),
        }
    }

    pub async fn count_pending_keywords(&self) -> Result<u64> {
        self.count("SELECT COUNT(*) FROM keywords WHERE status = 'pending'")
            .await
    }

    /// Set a keyword's status. Returns `false` if no such keyword exists.
    pub async fn set_keyword_status(&self, id: &str, status: KeywordStatus) -> Result<bool> {
        self.check_writable()?;
        let changed = self
            .conn
            .execute(
                "UPDATE keywords SET status = ?1 WHERE id = ?2",
                params![status.as_str(), id],
            )
            .await
            .map_err(db_err)?;
        Ok(changed > 0)
    }

    // -----------------------------------------------------------------------
    // Topic operations
    // -----------------------------------------------------------------------

    /// Insert a batch of topics atomically.
    pub async fn insert_topics(&self, topics: &[Topic]) -> Result<()> {
        self.check_writable()?;
        let tx = self.conn.transaction().await.map_err(db_err)?;
        for topic in topics {
            tx.execute(
                "INSERT INTO topics (id, keyword_id, title, angle, outline_json, relevance_score, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    topic.id.as_str(),
                    topic.keyword_id.as_str(),
                    topic.title.as_str(),
                    topic.angle.as_str(),
                    to_json(&topic.outline)?,
                    i64::from(topic.relevance_score),
                    topic.status.as_str(),
                    fmt_ts(&topic.created_at),
                ],
            )
            .await
            .map_err(db_err)?;
        }
        tx.commit().await.map_err(db_err)?;
        debug!(count = topics.len(), "topics inserted");
        Ok(())
    }

    /// Get a topic by ID.
    pub async fn get_topic(&self, id: &str) -> Result<Option<Topic>> {
        let sql = format!("SELECT {TOPIC_COLUMNS} FROM topics WHERE id = ?1");
        let mut rows = self.conn.query(&sql, params![id]).await.map_err(db_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_topic(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(db_err(e)),
        }
    }

    /// List topics, optionally for one keyword, highest relevance first.
    pub async fn list_topics(&self, keyword_id: Option<&str>) -> Result<Vec<Topic>> {
        let mut rows = match keyword_id {
            Some(keyword_id) => {
                let sql = format!(
                    "SELECT {TOPIC_COLUMNS} FROM topics WHERE keyword_id = ?1
                     ORDER BY relevance_score DESC, created_at ASC"
                );
                self.conn.query(&sql, params![keyword_id]).await
            }
            None => {
                let sql = format!(
                    "SELECT {TOPIC_COLUMNS} FROM topics ORDER BY created_at DESC, relevance_score DESC"
                );
                self.conn.query(&sql, params![]).await
            }
        }
        .map_err(db_err)?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_topic(&row)?);
        }
        Ok(results)
    }

    /// Set a topic's status. Returns `false` if no such topic exists.
    pub async fn set_topic_status(&self, id: &str, status: TopicStatus) -> Result<bool> {
        self.check_writable()?;
        let changed = self
            .conn
            .execute(
                "UPDATE topics SET status = ?1 WHERE id = ?2",
                params![status.as_str(), id],
            )
            .await
            .map_err(db_err)?;
        Ok(changed > 0)
    }

    /// Titles of every topic already proposed for `keyword_id`.
    pub async fn list_topic_titles(&self, keyword_id: &str) -> Result<Vec<String>> {
        self.strings("SELECT title FROM topics WHERE keyword_id = ?1", keyword_id)
            .await
    }

    // -----------------------------------------------------------------------
    // Post operations
    // -----------------------------------------------------------------------

    /// Insert a post. A taken slug surfaces as [`PostForgeError::SlugCollision`].
    pub async fn insert_post(&self, post: &Post) -> Result<()> {
        self.check_writable()?;
        insert_post_on(&self.conn, post).await
    }

    /// Persist a freshly generated post and consume its sources in one transaction.
    ///
    /// - inserts the post (slug collisions roll everything back)
    /// - marks `topic_id` as used, failing if it was already used
    /// - marks `consume_keyword` as used when the keyword was auto-selected
    pub async fn persist_generated_post(
        &self,
        post: &Post,
        topic_id: Option<&str>,
        consume_keyword: Option<&str>,
    ) -> Result<()> {
        self.check_writable()?;
        let tx = self.conn.transaction().await.map_err(db_err)?;

        insert_post_on(&tx, post).await?;

        if let Some(topic_id) = topic_id {
            let changed = tx
                .execute(
                    "UPDATE topics SET status = 'used' WHERE id = ?1 AND status != 'used'",
                    params![topic_id],
                )
                .await
                .map_err(db_err)?;
            if changed == 0 {
                tx.rollback().await.map_err(db_err)?;
                return Err(PostForgeError::validation(format!(
                    "topic {topic_id} is missing or already used"
                )));
            }
        }

        if let Some(keyword_id) = consume_keyword {
            tx.execute(
                "UPDATE keywords SET status = 'used' WHERE id = ?1 AND status = 'pending'",
                params![keyword_id],
            )
            .await
            .map_err(db_err)?;
        }

        tx.commit().await.map_err(db_err)?;
        debug!(post_id = %post.id, slug = %post.slug, "generated post persisted");
        Ok(())
    }

    /// Rewrite an existing post. A taken slug surfaces as [`PostForgeError::SlugCollision`].
    pub async fn update_post(&self, post: &Post) -> Result<()> {
        self.check_writable()?;
        let changed = self
            .conn
            .execute(
                "UPDATE posts SET
                   title = ?2, slug = ?3, canonical_url = ?4, markdown = ?5, html = ?6,
                   toc_json = ?7, excerpt = ?8, word_count = ?9, reading_time = ?10,
                   seo_title = ?11, meta_description = ?12, cover_image = ?13, og_image = ?14,
                   faq_json = ?15, status = ?16, scheduled_at = ?17, published_at = ?18,
                   content_hash = ?19, updated_at = ?20
                 WHERE id = ?1",
                params![
                    post.id.as_str(),
                    post.title.as_str(),
                    post.slug.as_str(),
                    post.canonical_url.as_str(),
                    post.markdown.as_str(),
                    post.html.as_str(),
                    to_json(&post.toc)?,
                    post.excerpt.as_str(),
                    post.word_count as i64,
                    i64::from(post.reading_time),
                    post.seo_title.as_str(),
                    post.meta_description.as_str(),
                    post.cover_image.as_deref(),
                    post.og_image.as_deref(),
                    to_json(&post.faq)?,
                    post.status.as_str(),
                    post.scheduled_at.as_ref().map(fmt_ts),
                    post.published_at.as_ref().map(fmt_ts),
                    post.content_hash.as_str(),
                    fmt_ts(&post.updated_at),
                ],
            )
            .await
            .map_err(|e| map_post_write_err(e, &post.slug))?;

        if changed == 0 {
            return Err(PostForgeError::not_found("post", post.id.clone()));
        }
        Ok(())
    }

    /// Whether a post already uses `slug`, optionally ignoring post `except_id`.
    pub async fn slug_exists(&self, slug: &str, except_id: Option<&str>) -> Result<bool> {
        let mut rows = self
            .conn
            .query(
                "SELECT 1 FROM posts WHERE slug = ?1 AND id != COALESCE(?2, '') LIMIT 1",
                params![slug, except_id],
            )
            .await
            .map_err(db_err)?;

        match rows.next().await {
            Ok(row) => Ok(row.is_some()),
            Err(e) => Err(db_err(e)),
        }
    }

    /// Get a post by ID.
    pub async fn get_post(&self, id: &str) -> Result<Option<Post>> {
        let sql = format!("SELECT {POST_COLUMNS} FROM posts WHERE id = ?1");
        let mut rows = self.conn.query(&sql, params![id]).await.map_err(db_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_post(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(db_err(e)),
        }
    }

    /// Get a post by slug.
    pub async fn get_post_by_slug(&self, slug: &str) -> Result<Option<Post>> {
        let sql = format!("SELECT {POST_COLUMNS} FROM posts WHERE slug = ?1");
        let mut rows = self.conn.query(&sql, params![slug]).await.map_err(db_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_post(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(db_err(e)),
        }
    }

    /// List posts, newest first.
    pub async fn list_posts(&self, status: Option<PostStatus>, limit: u32) -> Result<Vec<Post>> {
        let mut rows = match status {
            Some(status) => {
                let sql = format!(
                    "SELECT {POST_COLUMNS} FROM posts WHERE status = ?1
                     ORDER BY created_at DESC LIMIT ?2"
                );
                self.conn.query(&sql, params![status.as_str(), limit]).await
            }
            None => {
                let sql =
                    format!("SELECT {POST_COLUMNS} FROM posts ORDER BY created_at DESC LIMIT ?1");
                self.conn.query(&sql, params![limit]).await
            }
        }
        .map_err(db_err)?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_post(&row)?);
        }
        Ok(results)
    }

    /// Titles of every stored post.
    pub async fn list_post_titles(&self) -> Result<Vec<String>> {
        let mut rows = self
            .conn
            .query("SELECT title FROM posts", params![])
            .await
            .map_err(db_err)?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row.get::<String>(0).map_err(db_err)?);
        }
        Ok(results)
    }

    // -----------------------------------------------------------------------
    // Job run operations
    // -----------------------------------------------------------------------

    /// Insert a new job run record.
    pub async fn insert_job_run(&self, job: &JobRun) -> Result<()> {
        self.check_writable()?;
        self.conn
            .execute(
                "INSERT INTO job_runs (id, job_type, status, keyword_id, topic_id, post_id,
                                       created_at, started_at, finished_at, duration_ms, error,
                                       prompt_tokens, completion_tokens, image_generated)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                params![
                    job.id.as_str(),
                    job.job_type.as_str(),
                    job.status.as_str(),
                    job.keyword_id.as_deref(),
                    job.topic_id.as_deref(),
                    job.post_id.as_deref(),
                    fmt_ts(&job.created_at),
                    job.started_at.as_ref().map(fmt_ts),
                    job.finished_at.as_ref().map(fmt_ts),
                    job.duration_ms,
                    job.error.as_deref(),
                    job.token_usage.prompt_tokens as i64,
                    job.token_usage.completion_tokens as i64,
                    i64::from(job.image_generated),
                ],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// Get a job run by ID.
    pub async fn get_job_run(&self, id: &str) -> Result<Option<JobRun>> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM job_runs WHERE id = ?1");
        let mut rows = self.conn.query(&sql, params![id]).await.map_err(db_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_job_run(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(db_err(e)),
        }
    }

    /// `pending → running`. Returns `false` if the row was not pending.
    pub async fn mark_job_running(&self, id: &str, started_at: &DateTime<Utc>) -> Result<bool> {
        self.check_writable()?;
        let changed = self
            .conn
            .execute(
                "UPDATE job_runs SET status = 'running', started_at = ?2
                 WHERE id = ?1 AND status = 'pending'",
                params![id, fmt_ts(started_at)],
            )
            .await
            .map_err(db_err)?;
        Ok(changed > 0)
    }

    /// `running → completed`. Returns `false` if the row was not running.
    pub async fn complete_job_run(
        &self,
        id: &str,
        post_id: Option<&str>,
        token_usage: &TokenUsage,
        image_generated: bool,
        finished_at: &DateTime<Utc>,
        duration_ms: i64,
    ) -> Result<bool> {
        self.check_writable()?;
        let changed = self
            .conn
            .execute(
                "UPDATE job_runs SET status = 'completed', post_id = ?2, prompt_tokens = ?3,
                   completion_tokens = ?4, image_generated = ?5, finished_at = ?6, duration_ms = ?7
                 WHERE id = ?1 AND status = 'running'",
                params![
                    id,
                    post_id,
                    token_usage.prompt_tokens as i64,
                    token_usage.completion_tokens as i64,
                    i64::from(image_generated),
                    fmt_ts(finished_at),
                    duration_ms,
                ],
            )
            .await
            .map_err(db_err)?;
        Ok(changed > 0)
    }

    /// `pending | running → failed`. Returns `false` if the row was already terminal.
    pub async fn fail_job_run(
        &self,
        id: &str,
        error: &str,
        token_usage: &TokenUsage,
        finished_at: &DateTime<Utc>,
        duration_ms: i64,
    ) -> Result<bool> {
        self.check_writable()?;
        let changed = self
            .conn
            .execute(
                "UPDATE job_runs SET status = 'failed', error = ?2, prompt_tokens = ?3,
                   completion_tokens = ?4, finished_at = ?5, duration_ms = ?6
                 WHERE id = ?1 AND status IN ('pending', 'running')",
                params![
                    id,
                    error,
                    token_usage.prompt_tokens as i64,
                    token_usage.completion_tokens as i64,
                    fmt_ts(finished_at),
                    duration_ms,
                ],
            )
            .await
            .map_err(db_err)?;
        Ok(changed > 0)
    }

    /// Record resolved keyword/topic on a running job. `None` keeps the current value.
    pub async fn link_job_run(
        &self,
        id: &str,
        keyword_id: Option<&str>,
        topic_id: Option<&str>,
    ) -> Result<bool> {
        self.check_writable()?;
        let changed = self
            .conn
            .execute(
                "UPDATE job_runs SET keyword_id = COALESCE(?2, keyword_id),
                                     topic_id = COALESCE(?3, topic_id)
                 WHERE id = ?1 AND status = 'running'",
                params![id, keyword_id, topic_id],
            )
            .await
            .map_err(db_err)?;
        Ok(changed > 0)
    }

    /// The oldest `running` job of `job_type`, if any.
    pub async fn find_running_job(&self, job_type: &str) -> Result<Option<JobRun>> {
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM job_runs WHERE job_type = ?1 AND status = 'running'
             ORDER BY started_at ASC LIMIT 1"
        );
        let mut rows = self
            .conn
            .query(&sql, params![job_type])
            .await
            .map_err(db_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_job_run(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(db_err(e)),
        }
    }

    /// Most recently created job runs.
    pub async fn list_job_runs(&self, limit: u32) -> Result<Vec<JobRun>> {
        let sql = format!("SELECT {JOB_COLUMNS} FROM job_runs ORDER BY created_at DESC LIMIT ?1");
        let mut rows = self.conn.query(&sql, params![limit]).await.map_err(db_err)?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_job_run(&row)?);
        }
        Ok(results)
    }

    /// Non-terminal jobs that have not moved since `cutoff`.
    ///
    /// Running jobs are aged by `started_at`, pending ones by `created_at`.
    pub async fn list_stale_jobs(&self, cutoff: &DateTime<Utc>) -> Result<Vec<JobRun>> {
        let sql = format!(
            "SELECT {JOB_COLUMNS} FROM job_runs
             WHERE (status = 'running' AND started_at < ?1)
                OR (status = 'pending' AND created_at < ?1)
             ORDER BY created_at ASC"
        );
        let mut rows = self
            .conn
            .query(&sql, params![fmt_ts(cutoff)])
            .await
            .map_err(db_err)?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row_to_job_run(&row)?);
        }
        Ok(results)
    }

    /// Append a log line to a non-terminal job. Returns `false` otherwise.
    pub async fn append_job_log(
        &self,
        job_id: &str,
        line: &str,
        logged_at: &DateTime<Utc>,
    ) -> Result<bool> {
        self.check_writable()?;
        let changed = self
            .conn
            .execute(
                "INSERT INTO job_run_logs (job_id, seq, logged_at, line)
                 SELECT j.id,
                        (SELECT COALESCE(MAX(seq), 0) + 1 FROM job_run_logs WHERE job_id = j.id),
                        ?2, ?3
                 FROM job_runs j
                 WHERE j.id = ?1 AND j.status IN ('pending', 'running')",
                params![job_id, fmt_ts(logged_at), line],
            )
            .await
            .map_err(db_err)?;
        Ok(changed > 0)
    }

    /// All log lines of a job, in append order.
    pub async fn list_job_logs(&self, job_id: &str) -> Result<Vec<JobLogLine>> {
        let mut rows = self
            .conn
            .query(
                "SELECT seq, logged_at, line FROM job_run_logs WHERE job_id = ?1 ORDER BY seq",
                params![job_id],
            )
            .await
            .map_err(db_err)?;

        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(JobLogLine {
                seq: row.get::<i64>(0).map_err(db_err)?,
                logged_at: parse_ts(&row.get::<String>(1).map_err(db_err)?)?,
                line: row.get::<String>(2).map_err(db_err)?,
            });
        }
        Ok(results)
    }

    // -----------------------------------------------------------------------
    // Schedule config
    // -----------------------------------------------------------------------

    /// Current scheduler settings (defaults if the row is missing).
    pub async fn get_schedule_config(&self) -> Result<ScheduleConfig> {
        let mut rows = self
            .conn
            .query(
                "SELECT enabled, posts_per_run FROM schedule_config WHERE id = 1",
                params![],
            )
            .await
            .map_err(db_err)?;

        match rows.next().await {
            Ok(Some(row)) => Ok(ScheduleConfig {
                enabled: row.get::<i64>(0).map_err(db_err)? != 0,
                posts_per_run: row.get::<u32>(1).map_err(db_err)?,
            }),
            Ok(None) => Ok(ScheduleConfig::default()),
            Err(e) => Err(db_err(e)),
        }
    }

    pub async fn set_schedule_config(&self, config: &ScheduleConfig) -> Result<()> {
        self.check_writable()?;
        self.conn
            .execute(
                "INSERT INTO schedule_config (id, enabled, posts_per_run, updated_at)
                 VALUES (1, ?1, ?2, ?3)
                 ON CONFLICT(id) DO UPDATE SET
                   enabled = excluded.enabled,
                   posts_per_run = excluded.posts_per_run,
                   updated_at = excluded.updated_at",
                params![
                    i64::from(config.enabled),
                    config.posts_per_run,
                    fmt_ts(&Utc::now()),
                ],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Small query helpers
    // -----------------------------------------------------------------------

    async fn count(&self, sql: &str) -> Result<u64> {
        let mut rows = self.conn.query(sql, params![]).await.map_err(db_err)?;
        match rows.next().await {
            Ok(Some(row)) => Ok(row.get::<i64>(0).map_err(db_err)?.max(0) as u64),
            Ok(None) => Ok(0),
            Err(e) => Err(db_err(e)),
        }
    }

    async fn strings(&self, sql: &str, arg: &str) -> Result<Vec<String>> {
        let mut rows = self.conn.query(sql, params![arg]).await.map_err(db_err)?;
        let mut results = Vec::new();
        while let Ok(Some(row)) = rows.next().await {
            results.push(row.get::<String>(0).map_err(db_err)?);
        }
        Ok(results)
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

const KEYWORD_COLUMNS: &str = "id, text, intent, priority, status, groups_json, created_at";

const TOPIC_COLUMNS: &str =
    "id, keyword_id, title, angle, outline_json, relevance_score, status, created_at";

const POST_COLUMNS: &str = "id, title, slug, canonical_url, markdown, html, toc_json, excerpt, \
     word_count, reading_time, seo_title, meta_description, cover_image, og_image, faq_json, \
     status, scheduled_at, published_at, content_hash, keyword_id, topic_id, created_at, updated_at";

const JOB_COLUMNS: &str = "id, job_type, status, keyword_id, topic_id, post_id, created_at, \
     started_at, finished_at, duration_ms, error, prompt_tokens, completion_tokens, image_generated";

fn db_err(e: impl std::fmt::Display) -> PostForgeError {
    PostForgeError::Storage(e.to_string())
}

/// Fixed-width UTC timestamps so that text ordering matches time ordering.
fn fmt_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| PostForgeError::Storage(format!("invalid date '{s}': {e}")))
}

fn opt_ts(row: &Row, idx: i32) -> Result<Option<DateTime<Utc>>> {
    row.get::<String>(idx).ok().as_deref().map(parse_ts).transpose()
}

fn to_json<T: serde::Serialize + ?Sized>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| PostForgeError::Storage(format!("encode json: {e}")))
}

fn from_json<T: serde::de::DeserializeOwned>(s: &str) -> Result<T> {
    serde_json::from_str(s).map_err(|e| PostForgeError::Storage(format!("decode json: {e}")))
}

fn map_post_write_err(e: libsql::Error, slug: &str) -> PostForgeError {
    let message = e.to_string();
    if message.contains("UNIQUE constraint failed: posts.slug") {
        PostForgeError::SlugCollision {
            slug: slug.to_string(),
        }
    } else {
        PostForgeError::Storage(message)
    }
}

async fn insert_post_on(conn: &Connection, post: &Post) -> Result<()> {
    conn.execute(
        "INSERT INTO posts (id, title, slug, canonical_url, markdown, html, toc_json, excerpt,
                            word_count, reading_time, seo_title, meta_description, cover_image,
                            og_image, faq_json, status, scheduled_at, published_at, content_hash,
                            keyword_id, topic_id, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17,
                 ?18, ?19, ?20, ?21, ?22, ?23)",
        params![
            post.id.as_str(),
            post.title.as_str(),
            post.slug.as_str(),
            post.canonical_url.as_str(),
            post.markdown.as_str(),
            post.html.as_str(),
            to_json(&post.toc)?,
            post.excerpt.as_str(),
            post.word_count as i64,
            i64::from(post.reading_time),
            post.seo_title.as_str(),
            post.meta_description.as_str(),
            post.cover_image.as_deref(),
            post.og_image.as_deref(),
            to_json(&post.faq)?,
            post.status.as_str(),
            post.scheduled_at.as_ref().map(fmt_ts),
            post.published_at.as_ref().map(fmt_ts),
            post.content_hash.as_str(),
            post.keyword_id.as_deref(),
            post.topic_id.as_deref(),
            fmt_ts(&post.created_at),
            fmt_ts(&post.updated_at),
        ],
    )
    .await
    .map_err(|e| map_post_write_err(e, &post.slug))?;
    Ok(())
}

fn row_to_keyword(row: &Row) -> Result<Keyword> {
    Ok(Keyword {
        id: row.get::<String>(0).map_err(db_err)?,
        text: row.get::<String>(1).map_err(db_err)?,
        intent: row.get::<String>(2).map_err(db_err)?.parse()?,
        priority: row.get::<i64>(3).map_err(db_err)?,
        status: row.get::<String>(4).map_err(db_err)?.parse()?,
        groups: from_json(&row.get::<String>(5).map_err(db_err)?)?,
        created_at: parse_ts(&row.get::<String>(6).map_err(db_err)?)?,
    })
}

fn row_to_topic(row: &Row) -> Result<Topic> {
    Ok(Topic {
        id: row.get::<String>(0).map_err(db_err)?,
        keyword_id: row.get::<String>(1).map_err(db_err)?,
        title: row.get::<String>(2).map_err(db_err)?,
        angle: row.get::<String>(3).map_err(db_err)?,
        outline: from_json(&row.get::<String>(4).map_err(db_err)?)?,
        relevance_score: row.get::<i64>(5).map_err(db_err)?.clamp(0, 100) as u8,
        status: row.get::<String>(6).map_err(db_err)?.parse()?,
        created_at: parse_ts(&row.get::<String>(7).map_err(db_err)?)?,
    })
}

fn row_to_post(row: &Row) -> Result<Post> {
    let toc: Vec<TocEntry> = from_json(&row.get::<String>(6).map_err(db_err)?)?;
    let faq: Vec<FaqItem> = from_json(&row.get::<String>(14).map_err(db_err)?)?;

    Ok(Post {
        id: row.get::<String>(0).map_err(db_err)?,
        title: row.get::<String>(1).map_err(db_err)?,
        slug: row.get::<String>(2).map_err(db_err)?,
        canonical_url: row.get::<String>(3).map_err(db_err)?,
        markdown: row.get::<String>(4).map_err(db_err)?,
        html: row.get::<String>(5).map_err(db_err)?,
        toc,
        excerpt: row.get::<String>(7).map_err(db_err)?,
        word_count: row.get::<i64>(8).map_err(db_err)?.max(0) as usize,
        reading_time: row.get::<u32>(9).map_err(db_err)?,
        seo_title: row.get::<String>(10).map_err(db_err)?,
        meta_description: row.get::<String>(11).map_err(db_err)?,
        cover_image: row.get::<String>(12).ok(),
        og_image: row.get::<String>(13).ok(),
        faq,
        status: row.get::<String>(15).map_err(db_err)?.parse()?,
        scheduled_at: opt_ts(row, 16)?,
        published_at: opt_ts(row, 17)?,
        content_hash: row.get::<String>(18).map_err(db_err)?,
        keyword_id: row.get::<String>(19).ok(),
        topic_id: row.get::<String>(20).ok(),
        created_at: parse_ts(&row.get::<String>(21).map_err(db_err)?)?,
        updated_at: parse_ts(&row.get::<String>(22).map_err(db_err)?)?,
    })
}

fn row_to_job_run(row: &Row) -> Result<JobRun> {
    let status: JobStatus = row.get::<String>(2).map_err(db_err)?.parse()?;
    Ok(JobRun {
        id: row.get::<String>(0).map_err(db_err)?,
        job_type: row.get::<String>(1).map_err(db_err)?,
        status,
        keyword_id: row.get::<String>(3).ok(),
        topic_id: row.get::<String>(4).ok(),
        post_id: row.get::<String>(5).ok(),
        created_at: parse_ts(&row.get::<String>(6).map_err(db_err)?)?,
        started_at: opt_ts(row, 7)?,
        finished_at: opt_ts(row, 8)?,
        duration_ms: row.get::<i64>(9).ok(),
        error: row.get::<String>(10).ok(),
        token_usage: TokenUsage {
            prompt_tokens: row.get::<i64>(11).unwrap_or(0).max(0) as u64,
            completion_tokens: row.get::<i64>(12).unwrap_or(0).max(0) as u64,
        },
        image_generated: row.get::<i64>(13).unwrap_or(0) != 0,
    })
}
