//! Application configuration for PostForge.
//!
//! User config lives at `~/.postforge/postforge.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{PostForgeError, Result};
use crate::types::FULL_GENERATION_JOB;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "postforge.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".postforge";

// ---------------------------------------------------------------------------
// Config structs (matching postforge.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub site: SiteConfig,

    /// Generation service connection.
    #[serde(default)]
    pub generation: GenerationServiceConfig,

    /// Default article generation options.
    #[serde(default)]
    pub content: GenerationConfig,

    #[serde(default)]
    pub quality: QualityRules,

    #[serde(default)]
    pub pipeline: PipelineConfig,

    #[serde(default)]
    pub scheduler: SchedulerConfig,
}

/// `[database]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Path to the libSQL database file. `~` expands to the home directory.
    #[serde(default = "default_db_path")]
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> String {
    "~/.postforge/postforge.db".into()
}

impl DatabaseConfig {
    /// Resolve the configured path, expanding a leading `~/`.
    pub fn resolved_path(&self) -> Result<PathBuf> {
        match self.path.strip_prefix("~/") {
            Some(rest) => {
                let home = dirs::home_dir().ok_or_else(|| {
                    PostForgeError::config("could not determine home directory")
                })?;
                Ok(home.join(rest))
            }
            None => Ok(PathBuf::from(&self.path)),
        }
    }
}

/// `[site]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteConfig {
    /// Public origin used for canonical links.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Path segment that posts live under (e.g. `blog`).
    #[serde(default = "default_post_path")]
    pub post_path: String,
}

impl Default for SiteConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            post_path: default_post_path(),
        }
    }
}

fn default_base_url() -> String {
    "https://example.com".into()
}
fn default_post_path() -> String {
    "blog".into()
}

/// `[generation]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationServiceConfig {
    /// Base URL of the generation service.
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Model identifier forwarded to the service.
    #[serde(default = "default_model")]
    pub model: String,

    /// Upper bound for a single topic or draft call.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for GenerationServiceConfig {
    fn default() -> Self {
        Self {
            endpoint: default_endpoint(),
            api_key_env: default_api_key_env(),
            model: default_model(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_endpoint() -> String {
    "http://localhost:8787".into()
}
fn default_api_key_env() -> String {
    "POSTFORGE_API_KEY".into()
}
fn default_model() -> String {
    "gpt-4o-mini".into()
}
fn default_timeout_secs() -> u64 {
    120
}

// ---------------------------------------------------------------------------
// Generation options (defaults + per-run overrides)
// ---------------------------------------------------------------------------

/// Writing tone requested from the generation service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tone {
    #[default]
    Professional,
    Conversational,
    Friendly,
    Authoritative,
}

impl std::str::FromStr for Tone {
    type Err = PostForgeError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "professional" => Ok(Self::Professional),
            "conversational" => Ok(Self::Conversational),
            "friendly" => Ok(Self::Friendly),
            "authoritative" => Ok(Self::Authoritative),
            other => Err(PostForgeError::validation(format!("unknown tone '{other}'"))),
        }
    }
}

/// `[content]` section: options sent with every draft request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Lower bound of the target length, in words.
    #[serde(default = "default_target_min_words")]
    pub min_words: u32,

    /// Upper bound of the target length, in words.
    #[serde(default = "default_target_max_words")]
    pub max_words: u32,

    #[serde(default)]
    pub tone: Tone,

    /// Target primary-keyword density, in percent of words.
    #[serde(default = "default_keyword_density")]
    pub keyword_density: f32,

    /// Ask for (and extract) an FAQ section.
    #[serde(default = "default_true")]
    pub include_faq: bool,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            min_words: default_target_min_words(),
            max_words: default_target_max_words(),
            tone: Tone::default(),
            keyword_density: default_keyword_density(),
            include_faq: true,
        }
    }
}

fn default_target_min_words() -> u32 {
    900
}
fn default_target_max_words() -> u32 {
    1500
}
fn default_keyword_density() -> f32 {
    1.5
}
fn default_true() -> bool {
    true
}

/// Caller-supplied partial generation options. `None` keeps the default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_words: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_words: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tone: Option<Tone>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keyword_density: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub include_faq: Option<bool>,
}

impl GenerationConfig {
    /// Merge overrides field-by-field over `self`.
    ///
    /// Fails when the resulting word range is inverted or density is not positive.
    pub fn merged(&self, overrides: &GenerationOverrides) -> Result<GenerationConfig> {
        let merged = GenerationConfig {
            min_words: overrides.min_words.unwrap_or(self.min_words),
            max_words: overrides.max_words.unwrap_or(self.max_words),
            tone: overrides.tone.unwrap_or(self.tone),
            keyword_density: overrides.keyword_density.unwrap_or(self.keyword_density),
            include_faq: overrides.include_faq.unwrap_or(self.include_faq),
        };

        if merged.min_words > merged.max_words {
            return Err(PostForgeError::validation(format!(
                "min_words ({}) exceeds max_words ({})",
                merged.min_words, merged.max_words
            )));
        }
        if !(merged.keyword_density > 0.0) {
            return Err(PostForgeError::validation(
                "keyword_density must be greater than zero",
            ));
        }
        Ok(merged)
    }
}

// ---------------------------------------------------------------------------
// Quality rules
// ---------------------------------------------------------------------------

/// `[quality]` section: thresholds for the quality gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityRules {
    /// Drafts below this are rejected.
    #[serde(default = "default_quality_min_words")]
    pub min_words: usize,

    /// Drafts above this only warn.
    #[serde(default = "default_quality_max_words")]
    pub max_words: usize,

    /// Minimum number of H2–H6 headings.
    #[serde(default = "default_min_headings")]
    pub min_headings: usize,

    /// Keyword density band, in percent.
    #[serde(default = "default_min_density")]
    pub min_keyword_density: f32,
    #[serde(default = "default_max_density")]
    pub max_keyword_density: f32,

    /// Extra phrases treated as leftover generation artifacts.
    #[serde(default)]
    pub banned_phrases: Vec<String>,
}

impl Default for QualityRules {
    fn default() -> Self {
        Self {
            min_words: default_quality_min_words(),
            max_words: default_quality_max_words(),
            min_headings: default_min_headings(),
            min_keyword_density: default_min_density(),
            max_keyword_density: default_max_density(),
            banned_phrases: Vec::new(),
        }
    }
}

fn default_quality_min_words() -> usize {
    600
}
fn default_quality_max_words() -> usize {
    3000
}
fn default_min_headings() -> usize {
    3
}
fn default_min_density() -> f32 {
    0.3
}
fn default_max_density() -> f32 {
    3.0
}

// ---------------------------------------------------------------------------
// Pipeline / scheduler
// ---------------------------------------------------------------------------

/// `[pipeline]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Job type recorded on runs and used to scope the single-flight guard.
    #[serde(default = "default_job_type")]
    pub job_type: String,

    /// Topics requested per keyword when none is supplied (max 20).
    #[serde(default = "default_topic_count")]
    pub topic_count: u32,

    /// Reading speed used for reading time.
    #[serde(default = "default_words_per_minute")]
    pub words_per_minute: u32,

    /// Maximum excerpt / meta description length, in characters.
    #[serde(default = "default_excerpt_chars")]
    pub excerpt_chars: usize,

    /// How many times slug resolution is retried after an insert collision.
    #[serde(default = "default_slug_attempts")]
    pub slug_attempts: u32,

    /// Running jobs older than this are reaped as failed.
    #[serde(default = "default_stale_job_ttl_secs")]
    pub stale_job_ttl_secs: u64,

    /// Ask the generation service for a cover image.
    #[serde(default)]
    pub generate_images: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            job_type: default_job_type(),
            topic_count: default_topic_count(),
            words_per_minute: default_words_per_minute(),
            excerpt_chars: default_excerpt_chars(),
            slug_attempts: default_slug_attempts(),
            stale_job_ttl_secs: default_stale_job_ttl_secs(),
            generate_images: false,
        }
    }
}

fn default_job_type() -> String {
    FULL_GENERATION_JOB.into()
}
fn default_topic_count() -> u32 {
    5
}
fn default_words_per_minute() -> u32 {
    200
}
fn default_excerpt_chars() -> usize {
    160
}
fn default_slug_attempts() -> u32 {
    3
}
fn default_stale_job_ttl_secs() -> u64 {
    30 * 60
}

/// `[scheduler]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between ticks when running as a daemon.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
        }
    }
}

fn default_interval_secs() -> u64 {
    3600
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.postforge/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| PostForgeError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.postforge/postforge.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| PostForgeError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content).map_err(|e| {
        PostForgeError::config(format!("failed to parse {}: {e}", path.display()))
    })?;

    validate_config(&config)?;
    Ok(config)
}

/// Reject configurations the pipeline cannot run with.
pub fn validate_config(config: &AppConfig) -> Result<()> {
    url::Url::parse(&config.site.base_url).map_err(|e| {
        PostForgeError::config(format!("site.base_url '{}': {e}", config.site.base_url))
    })?;
    url::Url::parse(&config.generation.endpoint).map_err(|e| {
        PostForgeError::config(format!(
            "generation.endpoint '{}': {e}",
            config.generation.endpoint
        ))
    })?;
    if config.pipeline.words_per_minute == 0 {
        return Err(PostForgeError::config("pipeline.words_per_minute must be > 0"));
    }
    if config.pipeline.topic_count == 0 || config.pipeline.topic_count > 20 {
        return Err(PostForgeError::config(
            "pipeline.topic_count must be between 1 and 20",
        ));
    }
    config
        .content
        .merged(&GenerationOverrides::default())
        .map_err(|e| PostForgeError::config(format!("[content]: {e}")))?;
    Ok(())
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| PostForgeError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| PostForgeError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| PostForgeError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Check that the generation API key env var is set and non-empty.
pub fn validate_api_key(config: &AppConfig) -> Result<String> {
    let var_name = &config.generation.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(val),
        _ => Err(PostForgeError::config(format!(
            "generation API key not found. Set the {var_name} environment variable."
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("base_url"));
        assert!(toml_str.contains("POSTFORGE_API_KEY"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.pipeline.words_per_minute, 200);
        assert_eq!(parsed.pipeline.job_type, FULL_GENERATION_JOB);
        assert_eq!(parsed.content, GenerationConfig::default());
        validate_config(&parsed).expect("defaults are valid");
    }

    #[test]
    fn partial_sections_fill_defaults() {
        let toml_str = r#"
[site]
base_url = "https://plano-pros.example"

[content]
tone = "friendly"
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.site.base_url, "https://plano-pros.example");
        assert_eq!(config.site.post_path, "blog");
        assert_eq!(config.content.tone, Tone::Friendly);
        assert_eq!(config.content.min_words, 900);
        assert_eq!(config.quality.min_headings, 3);
    }

    #[test]
    fn overrides_merge_field_by_field() {
        let defaults = GenerationConfig::default();
        let overrides = GenerationOverrides {
            max_words: Some(2000),
            include_faq: Some(false),
            ..Default::default()
        };
        let merged = defaults.merged(&overrides).expect("merge");
        assert_eq!(merged.min_words, defaults.min_words);
        assert_eq!(merged.max_words, 2000);
        assert_eq!(merged.tone, defaults.tone);
        assert!(!merged.include_faq);
    }

    #[test]
    fn overrides_reject_inverted_range() {
        let overrides = GenerationOverrides {
            min_words: Some(3000),
            max_words: Some(1000),
            ..Default::default()
        };
        let result = GenerationConfig::default().merged(&overrides);
        assert!(result.is_err());
    }

    #[test]
    fn validate_rejects_bad_base_url() {
        let mut config = AppConfig::default();
        config.site.base_url = "not a url".into();
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("site.base_url"));
    }

    #[test]
    fn tone_parses_case_insensitively() {
        assert_eq!("Conversational".parse::<Tone>().unwrap(), Tone::Conversational);
        assert!("sarcastic".parse::<Tone>().is_err());
    }

    #[test]
    fn database_path_expands_home() {
        let config = DatabaseConfig::default();
        let path = config.resolved_path().expect("resolve");
        assert!(path.ends_with(".postforge/postforge.db"));

        let explicit = DatabaseConfig {
            path: "/tmp/pf.db".into(),
        };
        assert_eq!(explicit.resolved_path().unwrap(), PathBuf::from("/tmp/pf.db"));
    }

    #[test]
    fn api_key_validation() {
        let mut config = AppConfig::default();
        // Use a unique env var name to avoid interfering with other tests
        config.generation.api_key_env = "PF_TEST_NONEXISTENT_KEY_12345".into();
        let result = validate_api_key(&config);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("API key not found"));
    }
}
