//! SQL migration definitions for the PostForge database.
//!
//! Migrations are applied in order on database open. Each migration is a
//! version number plus a batch of SQL statements.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "Initial schema: keywords, topics, posts, job_runs, job_run_logs, schedule_config",
        sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Search phrases waiting to be turned into articles
CREATE TABLE IF NOT EXISTS keywords (
    id          TEXT PRIMARY KEY,
    text        TEXT NOT NULL,
    intent      TEXT NOT NULL,
    priority    INTEGER NOT NULL DEFAULT 0,
    status      TEXT NOT NULL DEFAULT 'pending',
    groups_json TEXT NOT NULL DEFAULT '[]',
    created_at  TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_keywords_pick ON keywords(status, priority DESC, created_at);

-- Article ideas derived from a keyword
CREATE TABLE IF NOT EXISTS topics (
    id              TEXT PRIMARY KEY,
    keyword_id      TEXT NOT NULL REFERENCES keywords(id),
    title           TEXT NOT NULL,
    angle           TEXT NOT NULL,
    outline_json    TEXT NOT NULL DEFAULT '[]',
    relevance_score INTEGER NOT NULL DEFAULT 0,
    status          TEXT NOT NULL DEFAULT 'pending',
    created_at      TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_topics_keyword ON topics(keyword_id);

-- Generated articles; slug uniqueness is enforced here
CREATE TABLE IF NOT EXISTS posts (
    id               TEXT PRIMARY KEY,
    title            TEXT NOT NULL,
    slug             TEXT NOT NULL UNIQUE,
    canonical_url    TEXT NOT NULL,
    markdown         TEXT NOT NULL,
    html             TEXT NOT NULL,
    toc_json         TEXT NOT NULL DEFAULT '[]',
    excerpt          TEXT NOT NULL,
    word_count       INTEGER NOT NULL,
    reading_time     INTEGER NOT NULL,
    seo_title        TEXT NOT NULL,
    meta_description TEXT NOT NULL,
    cover_image      TEXT,
    og_image         TEXT,
    faq_json         TEXT NOT NULL DEFAULT '[]',
    status           TEXT NOT NULL,
    scheduled_at     TEXT,
    published_at     TEXT,
    content_hash     TEXT NOT NULL,
    keyword_id       TEXT REFERENCES keywords(id),
    topic_id         TEXT REFERENCES topics(id),
    created_at       TEXT NOT NULL,
    updated_at       TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_posts_status ON posts(status, created_at);

-- One row per pipeline execution attempt
CREATE TABLE IF NOT EXISTS job_runs (
    id                TEXT PRIMARY KEY,
    job_type          TEXT NOT NULL,
    status            TEXT NOT NULL,
    keyword_id        TEXT,
    topic_id          TEXT,
    post_id           TEXT,
    created_at        TEXT NOT NULL,
    started_at        TEXT,
    finished_at       TEXT,
    duration_ms       INTEGER,
    error             TEXT,
    prompt_tokens     INTEGER NOT NULL DEFAULT 0,
    completion_tokens INTEGER NOT NULL DEFAULT 0,
    image_generated   INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_job_runs_guard ON job_runs(job_type, status);
CREATE INDEX IF NOT EXISTS idx_job_runs_created ON job_runs(created_at);

-- Append-only progress lines per job run
CREATE TABLE IF NOT EXISTS job_run_logs (
    id        INTEGER PRIMARY KEY AUTOINCREMENT,
    job_id    TEXT NOT NULL REFERENCES job_runs(id) ON DELETE CASCADE,
    seq       INTEGER NOT NULL,
    logged_at TEXT NOT NULL,
    line      TEXT NOT NULL,
    UNIQUE(job_id, seq)
);

-- Scheduler settings (single row)
CREATE TABLE IF NOT EXISTS schedule_config (
    id            INTEGER PRIMARY KEY CHECK (id = 1),
    enabled       INTEGER NOT NULL DEFAULT 0,
    posts_per_run INTEGER NOT NULL DEFAULT 1,
    updated_at    TEXT NOT NULL DEFAULT (datetime('now'))
);

INSERT OR IGNORE INTO schedule_config (id, enabled, posts_per_run) VALUES (1, 0, 1);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
    }]
}
