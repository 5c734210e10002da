//! Client seam for the external content-generation service.
//!
//! The pipeline only ever talks to a [`GenerationClient`]. The production
//! implementation, [`HttpGenerationClient`], posts JSON requests to a
//! generation endpoint; tests substitute in-process stubs.

use std::time::Duration;

use async_trait::async_trait;
use postforge_shared::{
    FaqItem, GenerationConfig, GenerationServiceConfig, PostForgeError, Result, SearchIntent,
    TokenUsage, Tone,
};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use tracing::{debug, instrument};
use url::Url;

/// User-Agent string for generation requests.
const USER_AGENT: &str = concat!("PostForge/", env!("CARGO_PKG_VERSION"));

/// Longest error body we echo back into an error message.
const MAX_ERROR_BODY_CHARS: usize = 200;

// ---------------------------------------------------------------------------
// Requests and responses
// ---------------------------------------------------------------------------

/// Ask for topic ideas for one keyword.
#[derive(Debug, Clone, Serialize)]
pub struct TopicRequest {
    pub keyword: String,
    pub intent: SearchIntent,
    pub count: u32,
    /// Titles already published or proposed; the service should avoid them.
    pub existing_titles: Vec<String>,
}

/// One raw topic idea as returned by the service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopicCandidate {
    pub title: String,
    #[serde(default)]
    pub angle: String,
    #[serde(default)]
    pub outline: Vec<String>,
    /// Unclamped; services are not trusted to stay in 0–100.
    #[serde(default)]
    pub relevance_score: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TopicResponse {
    #[serde(default)]
    pub topics: Vec<TopicCandidate>,
    #[serde(default)]
    pub token_usage: TokenUsage,
}

/// Ask for a full article body.
#[derive(Debug, Clone, Serialize)]
pub struct DraftRequest {
    pub title: String,
    pub angle: String,
    pub outline: Vec<String>,
    pub keyword: String,
    pub min_words: u32,
    pub max_words: u32,
    pub tone: Tone,
    pub keyword_density: f32,
    pub include_faq: bool,
}

impl DraftRequest {
    /// Build a request from a topic plus the effective generation options.
    pub fn new(
        title: impl Into<String>,
        angle: impl Into<String>,
        outline: Vec<String>,
        keyword: impl Into<String>,
        config: &GenerationConfig,
    ) -> Self {
        Self {
            title: title.into(),
            angle: angle.into(),
            outline,
            keyword: keyword.into(),
            min_words: config.min_words,
            max_words: config.max_words,
            tone: config.tone,
            keyword_density: config.keyword_density,
            include_faq: config.include_faq,
        }
    }
}

/// Raw article as returned by the service. `content` may be Markdown or HTML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DraftResponse {
    pub content: String,
    /// Structured FAQ, when the service supplies one.
    #[serde(default)]
    pub faq: Option<Vec<FaqItem>>,
    #[serde(default)]
    pub token_usage: TokenUsage,
}

// ---------------------------------------------------------------------------
// GenerationClient
// ---------------------------------------------------------------------------

/// The external generation service.
///
/// Every call is a single attempt; retry policy belongs to the caller.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    async fn generate_topics(&self, request: &TopicRequest) -> Result<TopicResponse>;

    async fn generate_draft(&self, request: &DraftRequest) -> Result<DraftResponse>;

    /// Produce a cover image for `prompt`, returning its URL.
    ///
    /// Services without image support keep the default: no image.
    async fn generate_image(&self, _prompt: &str) -> Result<Option<String>> {
        Ok(None)
    }
}

// ---------------------------------------------------------------------------
// HTTP implementation
// ---------------------------------------------------------------------------

/// JSON-over-HTTP generation client.
///
/// Endpoints, relative to the configured base URL:
/// `POST topics`, `POST drafts`, `POST images`.
#[derive(Debug, Clone)]
pub struct HttpGenerationClient {
    client: Client,
    base: Url,
    model: String,
    api_key: Option<String>,
}

#[derive(Serialize)]
struct Envelope<'a, T: Serialize> {
    model: &'a str,
    #[serde(flatten)]
    request: &'a T,
}

#[derive(Serialize)]
struct ImageRequest<'a> {
    prompt: &'a str,
}

#[derive(Deserialize)]
struct ImageResponse {
    #[serde(default)]
    url: Option<String>,
}

impl HttpGenerationClient {
    /// Build a client from the `[generation]` config section.
    pub fn new(config: &GenerationServiceConfig, api_key: Option<String>) -> Result<Self> {
        let mut base = Url::parse(&config.endpoint).map_err(|e| {
            PostForgeError::config(format!("invalid generation endpoint '{}': {e}", config.endpoint))
        })?;
        // Url::join drops the last path segment unless the base ends with '/'.
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        Ok(Self {
            client: build_client(config.timeout_secs)?,
            base,
            model: config.model.clone(),
            api_key,
        })
    }

    fn endpoint(&self, name: &str) -> Result<Url> {
        self.base
            .join(name)
            .map_err(|e| PostForgeError::config(format!("invalid endpoint path '{name}': {e}")))
    }

    /// POST `body` and decode the JSON answer.
    ///
    /// `Ok(None)` means the service answered 404 (capability not offered).
    async fn post_json<B, R>(&self, name: &str, body: &B) -> Result<Option<R>>
    where
        B: Serialize + Sync,
        R: DeserializeOwned,
    {
        let url = self.endpoint(name)?;
        let envelope = Envelope {
            model: &self.model,
            request: body,
        };

        let mut request = self.client.post(url.clone()).json(&envelope);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| PostForgeError::Generation(format!("{url}: {e}")))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let snippet: String = body.chars().take(MAX_ERROR_BODY_CHARS).collect();
            return Err(PostForgeError::Generation(format!(
                "{url}: HTTP {status}: {snippet}"
            )));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| PostForgeError::Generation(format!("{url}: failed to read body: {e}")))?;

        let decoded = serde_json::from_slice::<R>(&bytes)
            .map_err(|e| PostForgeError::Generation(format!("{url}: malformed response: {e}")))?;

        debug!(%url, bytes = bytes.len(), "generation response decoded");
        Ok(Some(decoded))
    }

    async fn post_required<B, R>(&self, name: &str, body: &B) -> Result<R>
    where
        B: Serialize + Sync,
        R: DeserializeOwned,
    {
        match self.post_json(name, body).await? {
            Some(decoded) => Ok(decoded),
            None => Err(PostForgeError::Generation(format!(
                "{}: HTTP 404 Not Found",
                self.endpoint(name)?
            ))),
        }
    }
}

#[async_trait]
impl GenerationClient for HttpGenerationClient {
    #[instrument(skip_all, fields(keyword = %request.keyword, count = request.count))]
    async fn generate_topics(&self, request: &TopicRequest) -> Result<TopicResponse> {
        self.post_required("topics", request).await
    }

    #[instrument(skip_all, fields(title = %request.title))]
    async fn generate_draft(&self, request: &DraftRequest) -> Result<DraftResponse> {
        self.post_required("drafts", request).await
    }

    #[instrument(skip_all)]
    async fn generate_image(&self, prompt: &str) -> Result<Option<String>> {
        let response: Option<ImageResponse> =
            self.post_json("images", &ImageRequest { prompt }).await?;
        Ok(response.and_then(|r| r.url).filter(|u| !u.trim().is_empty()))
    }
}

/// Build a reqwest client with appropriate settings.
fn build_client(timeout_secs: u64) -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .timeout(Duration::from_secs(timeout_secs.max(1)))
        .build()
        .map_err(|e| PostForgeError::Generation(format!("failed to build HTTP client: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer, api_key: Option<&str>) -> HttpGenerationClient {
        let config = GenerationServiceConfig {
            endpoint: format!("{}/v1", server.uri()),
            timeout_secs: 5,
            ..Default::default()
        };
        HttpGenerationClient::new(&config, api_key.map(String::from)).expect("client")
    }

    fn topic_request() -> TopicRequest {
        TopicRequest {
            keyword: "mold remediation".into(),
            intent: SearchIntent::Local,
            count: 3,
            existing_titles: vec!["Mold 101".into()],
        }
    }

    #[tokio::test]
    async fn generate_topics_decodes_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/topics"))
            .and(header("authorization", "Bearer secret"))
            .and(body_partial_json(serde_json::json!({
                "model": "gpt-4o-mini",
                "keyword": "mold remediation",
                "count": 3
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "topics": [
                    {"title": "How Mold Remediation Works", "angle": "explainer",
                     "outline": ["Intro", "Steps"], "relevance_score": 87.5}
                ],
                "token_usage": {"prompt_tokens": 120, "completion_tokens": 80}
            })))
            .mount(&server)
            .await;

        let client = client_for(&server, Some("secret"));
        let response = client.generate_topics(&topic_request()).await.unwrap();

        assert_eq!(response.topics.len(), 1);
        assert_eq!(response.topics[0].title, "How Mold Remediation Works");
        assert_eq!(response.topics[0].outline, vec!["Intro", "Steps"]);
        assert_eq!(response.token_usage.total(), 200);
    }

    #[tokio::test]
    async fn generate_draft_sends_options() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/drafts"))
            .and(body_partial_json(serde_json::json!({
                "title": "Mold Guide",
                "tone": "friendly",
                "include_faq": false
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "content": "# Mold Guide\n\nBody.",
                "faq": [{"question": "Is mold dangerous?", "answer": "Sometimes."}]
            })))
            .mount(&server)
            .await;

        let config = GenerationConfig {
            tone: Tone::Friendly,
            include_faq: false,
            ..Default::default()
        };
        let request = DraftRequest::new("Mold Guide", "guide", vec![], "mold", &config);
        let client = client_for(&server, None);
        let response = client.generate_draft(&request).await.unwrap();

        assert!(response.content.starts_with("# Mold Guide"));
        assert_eq!(response.faq.as_ref().map(Vec::len), Some(1));
        assert_eq!(response.token_usage, TokenUsage::default());
    }

    #[tokio::test]
    async fn server_error_maps_to_generation_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/topics"))
            .respond_with(ResponseTemplate::new(502).set_body_string("upstream down"))
            .mount(&server)
            .await;

        let err = client_for(&server, None)
            .generate_topics(&topic_request())
            .await
            .unwrap_err();

        assert!(matches!(err, PostForgeError::Generation(_)));
        assert!(err.to_string().contains("502"));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn malformed_body_maps_to_generation_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/drafts"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let request = DraftRequest::new("t", "a", vec![], "k", &GenerationConfig::default());
        let err = client_for(&server, None)
            .generate_draft(&request)
            .await
            .unwrap_err();

        assert!(err.to_string().contains("malformed response"));
    }

    #[tokio::test]
    async fn missing_topics_endpoint_names_the_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/topics"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let err = client_for(&server, None)
            .generate_topics(&topic_request())
            .await
            .unwrap_err();

        let message = err.to_string();
        assert!(message.contains(&format!("{}/v1/topics", server.uri())), "{message}");
        assert!(message.contains("404"));
    }

    #[tokio::test]
    async fn missing_image_endpoint_means_no_image() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/images"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let image = client_for(&server, None)
            .generate_image("a mold-free basement")
            .await
            .unwrap();
        assert_eq!(image, None);
    }

    #[tokio::test]
    async fn image_endpoint_returns_url() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/images"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "url": "https://cdn.example.com/cover.png"
            })))
            .mount(&server)
            .await;

        let image = client_for(&server, None)
            .generate_image("cover")
            .await
            .unwrap();
        assert_eq!(image.as_deref(), Some("https://cdn.example.com/cover.png"));
    }

    #[test]
    fn invalid_endpoint_is_config_error() {
        let config = GenerationServiceConfig {
            endpoint: "not a url".into(),
            ..Default::default()
        };
        let err = HttpGenerationClient::new(&config, None).unwrap_err();
        assert!(matches!(err, PostForgeError::Config { .. }));
    }
}
