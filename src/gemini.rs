use std::time::Duration;

use log::warn;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::embeddings::{Embedder, Embedding};
use crate::error::{Result, StudyError};
use crate::study::LanguageModel;

const API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// One bounded retry with a fixed backoff; never an open-ended loop.
const RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// Configuration for the Gemini API.
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub embedding_model: String,
    pub llm_model: String,
    pub temperature: f32,
    pub max_output_tokens: u32,
    pub timeout: Duration,
}

impl GeminiConfig {
    pub fn from_config(config: &Config) -> Self {
        GeminiConfig {
            api_key: config.api_key.clone(),
            embedding_model: config.embedding_model.clone(),
            llm_model: config.llm_model.clone(),
            temperature: config.temperature,
            max_output_tokens: config.max_output_tokens,
            timeout: Duration::from_secs(config.api_timeout_secs),
        }
    }
}

/// Client for the Gemini embedding and generation endpoints.
#[derive(Debug, Clone)]
pub struct GeminiClient {
    config: GeminiConfig,
    client: reqwest::Client,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| StudyError::Config(format!("building HTTP client: {e}")))?;
        Ok(GeminiClient { config, client })
    }

    fn endpoint(&self, model: &str, action: &str) -> String {
        format!(
            "{API_BASE}/{model}:{action}?key={key}",
            key = self.config.api_key
        )
    }

    /// POST a JSON request, retrying once after a fixed backoff.
    async fn post_json<Req, Resp>(&self, url: &str, request: &Req) -> Result<Resp, String>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let mut first_failure: Option<String> = None;
        loop {
            match self.send(url, request).await {
                Ok(response) => return Ok(response),
                Err(reason) if first_failure.is_none() => {
                    warn!("API request failed ({reason}), retrying once");
                    first_failure = Some(reason);
                    tokio::time::sleep(RETRY_BACKOFF).await;
                }
                Err(reason) => return Err(reason),
            }
        }
    }

    async fn send<Req, Resp>(&self, url: &str, request: &Req) -> Result<Resp, String>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let response = self
            .client
            .post(url)
            .json(request)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unknown error".to_string());
            return Err(format!("{status} {body}"));
        }

        response.json().await.map_err(|e| e.to_string())
    }
}

impl Embedder for GeminiClient {
    async fn embed(&self, text: &str) -> Result<Embedding> {
        let request = EmbedRequest {
            model: &self.config.embedding_model,
            content: RequestContent {
                parts: vec![Part { text }],
                role: None,
            },
        };
        let url = self.endpoint(&self.config.embedding_model, "embedContent");

        let response: EmbedResponse = self
            .post_json(&url, &request)
            .await
            .map_err(StudyError::Embedding)?;

        Ok(Embedding::new(response.embedding.values))
    }
}

impl LanguageModel for GeminiClient {
    async fn generate(&self, prompt: &str) -> Result<String> {
        let request = GenerateRequest {
            contents: vec![RequestContent {
                parts: vec![Part { text: prompt }],
                role: Some("user"),
            }],
            generation_config: GenerationConfig {
                temperature: self.config.temperature,
                max_output_tokens: self.config.max_output_tokens,
            },
        };
        let url = self.endpoint(&self.config.llm_model, "generateContent");

        let response: GenerateResponse = self
            .post_json(&url, &request)
            .await
            .map_err(StudyError::Generation)?;

        response
            .candidates
            .into_iter()
            .next()
            .and_then(|candidate| candidate.content.parts.into_iter().next())
            .map(|part| part.text)
            .ok_or_else(|| StudyError::Generation("no candidates in response".to_string()))
    }
}

// Wire structures for the Gemini API.

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    content: RequestContent<'a>,
}

#[derive(Serialize)]
struct RequestContent<'a> {
    parts: Vec<Part<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Deserialize, Debug)]
struct EmbedResponse {
    embedding: EmbedValues,
}

#[derive(Deserialize, Debug)]
struct EmbedValues {
    values: Vec<f32>,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<RequestContent<'a>>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct GenerationConfig {
    temperature: f32,
    #[serde(rename = "maxOutputTokens")]
    max_output_tokens: u32,
}

#[derive(Deserialize, Debug)]
struct GenerateResponse {
    candidates: Vec<Candidate>,
}

#[derive(Deserialize, Debug)]
struct Candidate {
    content: ResponseContent,
}

#[derive(Deserialize, Debug)]
struct ResponseContent {
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize, Debug)]
struct ResponsePart {
    text: String,
}
