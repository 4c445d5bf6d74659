use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::reply::extract_json;
use crate::{
    CapabilityError, ChunkCallback, GenerateRequest, Generator, ScoreOutcome, ScoreRequest, Scorer,
};

const DEFAULT_BASE_URL: &str = "https://api.openai.com";
const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_TIMEOUT_SECS: u64 = 60;

const GENERATOR_SYSTEM_PROMPT: &str = "You are a helpful assistant. Answer the user's question \
directly and concretely. When reviewer feedback on a previous answer is provided, produce an \
improved answer that addresses every point of the feedback.";

const SCORER_SYSTEM_PROMPT: &str = "You are an expert evaluator. Score the given content against \
one criterion at a time. Be objective and constructive. Respond with valid JSON only.";

/// Connection settings for one capability role.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: String::new(),
            model: DEFAULT_MODEL.to_string(),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

/// OpenAI-compatible chat-completions client implementing both capabilities.
#[derive(Clone)]
pub struct HttpProvider {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    system_prompt: &'static str,
    timeout: Duration,
}

impl HttpProvider {
    /// Client configured for the generation role.
    pub fn generator(config: &ProviderConfig) -> Result<Self, CapabilityError> {
        Self::new(config, GENERATOR_SYSTEM_PROMPT)
    }

    /// Client configured for the judge role.
    pub fn scorer(config: &ProviderConfig) -> Result<Self, CapabilityError> {
        Self::new(config, SCORER_SYSTEM_PROMPT)
    }

    fn new(config: &ProviderConfig, system_prompt: &'static str) -> Result<Self, CapabilityError> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CapabilityError::Http(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            system_prompt,
            timeout,
        })
    }

    fn request_error(&self, err: reqwest::Error) -> CapabilityError {
        if err.is_timeout() {
            CapabilityError::Timeout(self.timeout)
        } else {
            CapabilityError::Http(err.to_string())
        }
    }

    fn build_messages(&self, request: &GenerateRequest<'_>) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(request.history.len() + 3);
        messages.push(ChatMessage {
            role: "system".to_string(),
            content: self.system_prompt.to_string(),
        });
        for entry in request.history {
            messages.push(ChatMessage {
                role: entry.role.clone(),
                content: entry.content.clone(),
            });
        }
        if let Some(refinement) = &request.refinement {
            messages.push(ChatMessage {
                role: "assistant".to_string(),
                content: refinement.previous_response.to_string(),
            });
            messages.push(ChatMessage {
                role: "user".to_string(),
                content: format!(
                    "A reviewer assessed your previous answer:\n\n{}\n\n\
                     Rewrite the answer so it addresses every point above. \
                     Reply with the improved answer only.",
                    refinement.feedback
                ),
            });
        }
        messages
    }

    async fn post_chat(
        &self,
        messages: Vec<ChatMessage>,
        temperature: f64,
        stream: bool,
    ) -> Result<reqwest::Response, CapabilityError> {
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = ChatCompletionRequest {
            model: &self.model,
            messages,
            temperature,
            stream,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.request_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            let message: String = message.chars().take(500).collect();
            return Err(CapabilityError::Provider {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response)
    }

    async fn complete(
        &self,
        messages: Vec<ChatMessage>,
        temperature: f64,
    ) -> Result<String, CapabilityError> {
        let response = self.post_chat(messages, temperature, false).await?;
        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| self.request_error(e))?;

        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| CapabilityError::MalformedReply("no content in response".to_string()))
    }

    async fn complete_streaming(
        &self,
        messages: Vec<ChatMessage>,
        temperature: f64,
        on_chunk: &ChunkCallback,
    ) -> Result<String, CapabilityError> {
        let response = self.post_chat(messages, temperature, true).await?;

        let mut stream = response.bytes_stream();
        let mut pending = String::new();
        let mut full = String::new();

        while let Some(bytes) = stream.next().await {
            let bytes = bytes.map_err(|e| self.request_error(e))?;
            pending.push_str(&String::from_utf8_lossy(&bytes));

            while let Some(newline) = pending.find('\n') {
                let line: String = pending.drain(..=newline).collect();
                let line = line.trim();
                let Some(payload) = line.strip_prefix("data:") else {
                    continue;
                };
                let payload = payload.trim();
                if payload == "[DONE]" {
                    continue;
                }
                match serde_json::from_str::<ChatCompletionChunk>(payload) {
                    Ok(chunk) => {
                        if let Some(delta) = chunk
                            .choices
                            .first()
                            .and_then(|c| c.delta.content.as_deref())
                        {
                            full.push_str(delta);
                            on_chunk(delta);
                        }
                    }
                    Err(e) => {
                        debug!(error = %e, "Skipping unparseable stream line");
                    }
                }
            }
        }

        if full.is_empty() {
            return Err(CapabilityError::MalformedReply(
                "stream ended without content".to_string(),
            ));
        }

        Ok(full)
    }
}

#[async_trait]
impl Generator for HttpProvider {
    fn name(&self) -> &str {
        &self.model
    }

    async fn generate_with_callback(
        &self,
        request: GenerateRequest<'_>,
        on_chunk: Option<ChunkCallback>,
    ) -> Result<String, CapabilityError> {
        let messages = self.build_messages(&request);
        debug!(
            model = %self.model,
            history = request.history.len(),
            refining = request.refinement.is_some(),
            "Generating response"
        );

        match on_chunk {
            Some(callback) => self.complete_streaming(messages, 0.7, &callback).await,
            None => self.complete(messages, 0.7).await,
        }
    }
}

#[async_trait]
impl Scorer for HttpProvider {
    fn name(&self) -> &str {
        &self.model
    }

    async fn score(&self, request: ScoreRequest<'_>) -> Result<ScoreOutcome, CapabilityError> {
        let criterion = request.criterion;
        let question = criterion
            .evaluation_prompt
            .as_deref()
            .unwrap_or("How well does the content satisfy this criterion?");

        let prompt = format!(
            "Evaluate the following content against the criterion '{}': {}\n\n\
             Content:\n{}\n\n\
             Evaluation question: {}\n\n\
             Give a score from 0 to 100 and concise feedback. \
             Return ONLY valid JSON with this structure:\n\
             {{\"score\": <number>, \"feedback\": \"<text>\"}}",
            criterion.name, criterion.description, request.content, question
        );

        let messages = vec![
            ChatMessage {
                role: "system".to_string(),
                content: self.system_prompt.to_string(),
            },
            ChatMessage {
                role: "user".to_string(),
                content: prompt,
            },
        ];

        // Low temperature: scoring should be stable.
        let reply = self.complete(messages, 0.2).await?;

        let json = extract_json(&reply).ok_or_else(|| {
            warn!(criterion = %criterion.name, "Scoring reply carried no JSON object");
            CapabilityError::MalformedReply(format!(
                "no JSON object in scoring reply for '{}'",
                criterion.name
            ))
        })?;

        serde_json::from_str(json)
            .map_err(|e| CapabilityError::MalformedReply(format!("invalid score JSON: {e}")))
    }
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f64,
    stream: bool,
}

#[derive(Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatCompletionChunk {
    choices: Vec<ChunkChoice>,
}

#[derive(Deserialize)]
struct ChunkChoice {
    delta: ChunkDelta,
}

#[derive(Deserialize)]
struct ChunkDelta {
    #[serde(default)]
    content: Option<String>,
}
