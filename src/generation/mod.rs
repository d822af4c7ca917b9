use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};

mod local;

pub use local::LocalStubGenerator;

const PLACEHOLDER_KEY: &str = "sk-your-openai-api-key-here";

#[derive(Debug, Clone, Deserialize)]
pub struct DreamInput {
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub mood: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DreamSymbol {
    pub symbol: String,
    pub meaning: String,
    pub significance: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DreamEmotion {
    pub emotion: String,
    pub intensity: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DreamAnalysis {
    #[serde(default)]
    pub symbols: Vec<DreamSymbol>,
    #[serde(default)]
    pub emotions: Vec<DreamEmotion>,
    #[serde(default)]
    pub themes: Vec<String>,
    #[serde(default)]
    pub interpretation: String,
    #[serde(default)]
    pub psychological_insights: Vec<String>,
    #[serde(default)]
    pub recommendations: Vec<String>,
}

// key: generation-strategy -> usage-billed dream analysis
#[async_trait]
pub trait DreamGenerator: Send + Sync {
    async fn analyze(&self, input: &DreamInput) -> Result<DreamAnalysis>;

    fn name(&self) -> &'static str;
}

/// True when `key` looks like a real OpenAI secret rather than an unset or sample value.
pub fn has_usable_key(key: Option<&str>) -> bool {
    match key {
        Some(key) => key.starts_with("sk-") && key != PLACEHOLDER_KEY,
        None => false,
    }
}

/// Pick the generator once at start-up.
pub fn select(
    api_key: Option<&str>,
    api_base: &str,
    model: &str,
) -> Result<Arc<dyn DreamGenerator>> {
    match api_key {
        Some(key) if has_usable_key(Some(key)) => {
            info!(%model, "using remote dream generator");
            Ok(Arc::new(RemoteGenerator::new(
                api_base,
                key,
                model,
                Duration::from_secs(60),
            )?))
        }
        _ => {
            info!("no usable OpenAI key configured, using local dream generator");
            Ok(Arc::new(LocalStubGenerator))
        }
    }
}

/// OpenAI chat-completions client in JSON mode; falls back to the local stub on failure.
pub struct RemoteGenerator {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    fallback: LocalStubGenerator,
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    #[serde(default)]
    content: Option<String>,
}

impl RemoteGenerator {
    pub fn new(
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build generation client")?;
        Ok(Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            fallback: LocalStubGenerator,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        let path = path.trim_start_matches('/');
        format!("{}/{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn request_analysis(&self, input: &DreamInput) -> Result<DreamAnalysis> {
        let prompt = format!(
            "Analyse the following dream as a dream psychologist. Respond with a JSON object \
             with the keys symbols (symbol, meaning, significance), emotions (emotion, \
             intensity 0-100), themes, interpretation, psychologicalInsights and \
             recommendations.\n\nTitle: {}\nDream: {}",
            input.title, input.content
        );
        let body = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": "You are a professional dream analyst."},
                {"role": "user", "content": prompt}
            ],
            "temperature": 0.7,
            "max_tokens": 1500,
            "response_format": {"type": "json_object"}
        });

        let response = self
            .client
            .post(self.endpoint("v1/chat/completions"))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .context("failed to contact generation provider")?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(anyhow!("generation provider returned {status}: {text}"));
        }
        let completion: CompletionResponse = response
            .json()
            .await
            .context("failed to decode generation response")?;
        let content = completion
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| anyhow!("generation response had no content"))?;
        serde_json::from_str(&content).context("generation content was not an analysis object")
    }
}

#[async_trait]
impl DreamGenerator for RemoteGenerator {
    async fn analyze(&self, input: &DreamInput) -> Result<DreamAnalysis> {
        match self.request_analysis(input).await {
            Ok(analysis) => Ok(analysis),
            Err(err) => {
                warn!(?err, "remote dream analysis failed, falling back to local generator");
                self.fallback.analyze(input).await
            }
        }
    }

    fn name(&self) -> &'static str {
        "remote"
    }
}
