use crate::constants::{
    DEEPSEEK_BASE_URL, OLLAMA_BASE_URL, OLLAMA_TAGS_PATH, OPENAI_MODELS_PATH,
    THINKING_MARKER_PATTERN, WEB_MARKER_PATTERN,
};
use crate::settings::Settings;
use crate::types::ModelOption;
use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use serde::Deserialize;
use std::sync::Arc;

lazy_static! {
    static ref THINKING_MARKERS: Regex =
        Regex::new(THINKING_MARKER_PATTERN).expect("Invalid thinking marker pattern");
    static ref WEB_MARKERS: Regex =
        Regex::new(WEB_MARKER_PATTERN).expect("Invalid web marker pattern");
}

/// Whether a model name advertises a reasoning variant.
pub fn name_suggests_thinking(model: &str) -> bool {
    THINKING_MARKERS.is_match(model)
}

/// Whether a model name advertises live web access.
pub fn name_suggests_web(model: &str) -> bool {
    WEB_MARKERS.is_match(model)
}

/// One selectable model endpoint family. Static capability flags describe
/// what the provider is known to offer; the `test_*` probes refine them from
/// the live model list when the endpoint answers.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Known-ahead thinking support, used when the endpoint cannot be asked.
    fn supports_thinking(&self) -> bool;

    /// Known-ahead web-search support, used when the endpoint cannot be asked.
    fn supports_web_search(&self) -> bool;

    /// Live reachability. Fails closed: any transport or status problem
    /// reads as unreachable.
    async fn check_connectivity(&self) -> bool;

    /// Models visible at the endpoint right now. Empty on any failure,
    /// never an error.
    async fn list_models(&self) -> Vec<ModelOption>;

    async fn test_thinking_support(&self) -> bool {
        let models = self.list_models().await;
        if models.is_empty() {
            return self.supports_thinking();
        }
        models.iter().any(|m| name_suggests_thinking(&m.value))
    }

    async fn test_web_support(&self) -> bool {
        let models = self.list_models().await;
        if models.is_empty() {
            return self.supports_web_search();
        }
        models.iter().any(|m| name_suggests_web(&m.value))
    }
}

#[derive(Deserialize)]
struct OpenAiModelList {
    #[serde(default)]
    data: Vec<OpenAiModelEntry>,
}

#[derive(Deserialize)]
struct OpenAiModelEntry {
    id: String,
}

#[derive(Deserialize)]
struct OllamaTagList {
    #[serde(default)]
    models: Vec<OllamaTagEntry>,
}

#[derive(Deserialize)]
struct OllamaTagEntry {
    name: String,
}

async fn probe(client: &reqwest::Client, url: &str, api_key: Option<&str>) -> bool {
    let mut request = client.get(url);
    if let Some(key) = api_key {
        request = request.header("Authorization", format!("Bearer {}", key));
    }
    match request.send().await {
        Ok(response) => response.status().is_success(),
        Err(e) => {
            tracing::debug!("[🖥️  -> ☁️ ] Probe failed for {}: {}", url, e);
            false
        }
    }
}

async fn list_openai_models(
    client: &reqwest::Client,
    base_url: &str,
    api_key: Option<&str>,
) -> Vec<ModelOption> {
    let url = format!("{}{}", base_url, OPENAI_MODELS_PATH);
    let mut request = client.get(&url);
    if let Some(key) = api_key {
        request = request.header("Authorization", format!("Bearer {}", key));
    }
    let response = match request.send().await {
        Ok(response) if response.status().is_success() => response,
        Ok(response) => {
            tracing::debug!(
                "[🖥️  -> ☁️ ] Model listing at {} answered {}",
                url,
                response.status()
            );
            return Vec::new();
        }
        Err(e) => {
            tracing::debug!("[🖥️  -> ☁️ ] Model listing failed for {}: {}", url, e);
            return Vec::new();
        }
    };
    match response.json::<OpenAiModelList>().await {
        Ok(list) => list
            .data
            .into_iter()
            .map(|m| ModelOption {
                label: m.id.clone(),
                value: m.id,
            })
            .collect(),
        Err(_) => Vec::new(),
    }
}

/// Hosted DeepSeek endpoint. Ships a reasoner model, so thinking support
/// holds even when the model list cannot be fetched.
pub struct DeepSeekProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl DeepSeekProvider {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }
}

#[async_trait]
impl Provider for DeepSeekProvider {
    fn name(&self) -> &'static str {
        "deepseek"
    }
    fn supports_thinking(&self) -> bool {
        true
    }
    fn supports_web_search(&self) -> bool {
        false
    }
    async fn check_connectivity(&self) -> bool {
        let url = format!("{}{}", self.base_url, OPENAI_MODELS_PATH);
        probe(&self.client, &url, self.api_key.as_deref()).await
    }
    async fn list_models(&self) -> Vec<ModelOption> {
        list_openai_models(&self.client, &self.base_url, self.api_key.as_deref()).await
    }
}

/// Local Ollama daemon. Capabilities depend entirely on which models were
/// pulled, so the static flags stay off and the probes do the talking.
pub struct OllamaProvider {
    client: reqwest::Client,
    base_url: String,
}

impl OllamaProvider {
    pub fn new(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

#[async_trait]
impl Provider for OllamaProvider {
    fn name(&self) -> &'static str {
        "ollama"
    }
    fn supports_thinking(&self) -> bool {
        false
    }
    fn supports_web_search(&self) -> bool {
        false
    }
    async fn check_connectivity(&self) -> bool {
        let url = format!("{}{}", self.base_url, OLLAMA_TAGS_PATH);
        probe(&self.client, &url, None).await
    }
    async fn list_models(&self) -> Vec<ModelOption> {
        let url = format!("{}{}", self.base_url, OLLAMA_TAGS_PATH);
        let response = match self.client.get(&url).send().await {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                tracing::debug!(
                    "[🖥️  -> ☁️ ] Tag listing at {} answered {}",
                    url,
                    response.status()
                );
                return Vec::new();
            }
            Err(e) => {
                tracing::debug!("[🖥️  -> ☁️ ] Tag listing failed for {}: {}", url, e);
                return Vec::new();
            }
        };
        match response.json::<OllamaTagList>().await {
            Ok(list) => list
                .models
                .into_iter()
                .map(|m| ModelOption {
                    label: m.name.clone(),
                    value: m.name,
                })
                .collect(),
            Err(_) => Vec::new(),
        }
    }
}

/// Any OpenAI-compatible endpoint configured by URL. Nothing is assumed
/// about it up front.
pub struct OpenAiCompatProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl OpenAiCompatProvider {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        api_key: Option<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }
}

#[async_trait]
impl Provider for OpenAiCompatProvider {
    fn name(&self) -> &'static str {
        "custom"
    }
    fn supports_thinking(&self) -> bool {
        false
    }
    fn supports_web_search(&self) -> bool {
        false
    }
    async fn check_connectivity(&self) -> bool {
        let url = format!("{}{}", self.base_url, OPENAI_MODELS_PATH);
        probe(&self.client, &url, self.api_key.as_deref()).await
    }
    async fn list_models(&self) -> Vec<ModelOption> {
        list_openai_models(&self.client, &self.base_url, self.api_key.as_deref()).await
    }
}

/// No-network stand-in. Always reachable, with a fixed model list so the
/// probe paths stay exercisable offline.
pub struct StubProvider;

#[async_trait]
impl Provider for StubProvider {
    fn name(&self) -> &'static str {
        "stub"
    }
    fn supports_thinking(&self) -> bool {
        true
    }
    fn supports_web_search(&self) -> bool {
        false
    }
    async fn check_connectivity(&self) -> bool {
        true
    }
    async fn list_models(&self) -> Vec<ModelOption> {
        vec![
            ModelOption {
                label: "Stub Chat".to_string(),
                value: "stub-chat".to_string(),
            },
            ModelOption {
                label: "Stub Reasoner".to_string(),
                value: "stub-reasoner".to_string(),
            },
        ]
    }
}

/// Resolves a provider id to an implementation. Matching is case-insensitive
/// and unknown ids fall back to the stub, so a stale settings file still
/// yields a working client.
pub fn provider_for(id: &str, client: &reqwest::Client, settings: &Settings) -> Arc<dyn Provider> {
    let config = settings.provider_config(id);
    match id.to_lowercase().as_str() {
        "deepseek" => Arc::new(DeepSeekProvider::new(
            client.clone(),
            config.base_url_or(DEEPSEEK_BASE_URL),
            config.api_key(),
        )),
        "ollama" => Arc::new(OllamaProvider::new(
            client.clone(),
            config.base_url_or(OLLAMA_BASE_URL),
        )),
        "custom" | "openai" => Arc::new(OpenAiCompatProvider::new(
            client.clone(),
            config.base_url.clone(),
            config.api_key(),
        )),
        other => {
            tracing::warn!("Unknown provider id '{}', using stub", other);
            Arc::new(StubProvider)
        }
    }
}
