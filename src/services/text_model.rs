//! The Text Model Client (SPEC_FULL.md §4.E): the single seam through which
//! every chat/summarize/title-generation call reaches the backend LLM.
//! Adapted from the teacher's `llm_service.rs` — the SSE chunk parser
//! (`stream::unfold` over `bytes_stream()`) is kept near verbatim; a
//! non-streaming `generate` path and per-operation temperature selection are
//! added for summarization, titling and history compaction.

use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::Stream;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ModelBackendConfig;
use crate::utils::error::CoreError;
use crate::utils::limiters::Limiters;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: "system".to_string(), content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: "user".to_string(), content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: "assistant".to_string(), content: content.into() }
    }
}

/// Selects the sampling temperature for a call: chat replies favor a more
/// varied register, everything else (titles, summaries, history
/// compaction) favors determinism.
#[derive(Debug, Clone, Copy)]
pub enum Operation {
    Chat,
    Summarize,
    GenerateTitle,
    SummarizeConversation,
}

#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: usize,
    temperature: f32,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ResponseChoice>,
}

#[derive(Debug, Deserialize)]
struct ResponseChoice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionChunk {
    choices: Vec<ChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    delta: Delta,
}

#[derive(Debug, Deserialize)]
struct Delta {
    content: Option<String>,
}

#[derive(Clone)]
pub struct TextModelClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    max_tokens: usize,
    chat_temperature: f32,
    factual_temperature: f32,
    limiters: Arc<Limiters>,
}

impl TextModelClient {
    pub fn new(config: &ModelBackendConfig, limiters: Arc<Limiters>) -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(config.generation_timeout_seconds.max(1)))
                .build()
                .unwrap_or_else(|_| Client::new()),
            base_url: config.base_url.clone(),
            api_key: config.api_key.clone(),
            model: config.text_model.clone(),
            max_tokens: config.max_tokens,
            chat_temperature: config.chat_temperature,
            factual_temperature: config.factual_temperature,
            limiters,
        }
    }

    fn temperature_for(&self, op: Operation) -> f32 {
        match op {
            Operation::Chat => self.chat_temperature,
            Operation::Summarize | Operation::GenerateTitle | Operation::SummarizeConversation => {
                self.factual_temperature
            }
        }
    }

    pub async fn summarize(&self, text: &str) -> Result<String, CoreError> {
        let messages = vec![
            ChatMessage::system("Summarize the given text concisely, preserving concrete facts and figures."),
            ChatMessage::user(text),
        ];
        self.generate(&messages, Operation::Summarize).await
    }

    pub async fn generate_title(&self, opening_message: &str) -> Result<String, CoreError> {
        let messages = vec![
            ChatMessage::system("Generate a short, descriptive title (under 8 words, no quotes) for a conversation that starts with the following message."),
            ChatMessage::user(opening_message),
        ];
        self.generate(&messages, Operation::GenerateTitle).await
    }

    pub async fn summarize_conversation(&self, transcript: &[ChatMessage]) -> Result<String, CoreError> {
        let joined = transcript
            .iter()
            .map(|m| format!("{}: {}", m.role, m.content))
            .collect::<Vec<_>>()
            .join("\n");
        let messages = vec![
            ChatMessage::system(
                "Summarize this conversation history concisely, preserving decisions, facts and open questions so it can replace the original turns in future context.",
            ),
            ChatMessage::user(joined),
        ];
        self.generate(&messages, Operation::SummarizeConversation).await
    }

    /// Single non-streaming completion.
    pub async fn generate(&self, messages: &[ChatMessage], op: Operation) -> Result<String, CoreError> {
        let (_permit, wait) = Limiters::acquire_timed(
            self.limiters.llm_generate.clone(),
            self.limiters.acquire_timeout,
            "llm_generate",
        )
        .await
        .map_err(|e| CoreError::BackendUnavailable(e.to_string()))?;
        debug!(wait_ms = wait.as_millis() as u64, op = "llm_generate", "wait_queue");

        let request = ChatCompletionRequest {
            model: &self.model,
            messages,
            max_tokens: self.max_tokens,
            temperature: self.temperature_for(op),
            stream: false,
        };

        let exec_start = Instant::now();
        let url = format!("{}/v1/chat/completions", self.base_url);
        let mut builder = self.client.post(&url).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {key}"));
        }

        let response = builder.send().await.map_err(|e| CoreError::BackendUnavailable(e.to_string()))?;
        debug!(exec_ms = exec_start.elapsed().as_millis() as u64, op = "llm_generate", "exec");

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(CoreError::Generation(format!("model backend returned {status}: {body}")));
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| CoreError::Generation(format!("invalid completion response: {e}")))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| CoreError::Generation("completion response had no choices".to_string()))
    }

    /// Streaming chat completion for the Agent Orchestrator's `message`/
    /// `token` SSE events. Parses the `data: {...}` SSE framing the same way
    /// the teacher's `chat_stream` did, now mapped onto `CoreError`.
    pub async fn chat_stream(
        &self,
        messages: Vec<ChatMessage>,
    ) -> Result<Pin<Box<dyn Stream<Item = Result<String, CoreError>> + Send>>, CoreError> {
        let (_permit, wait) = Limiters::acquire_timed(
            self.limiters.llm_stream.clone(),
            self.limiters.acquire_timeout,
            "llm_stream",
        )
        .await
        .map_err(|e| CoreError::BackendUnavailable(e.to_string()))?;
        debug!(wait_ms = wait.as_millis() as u64, op = "llm_stream", "wait_queue");

        let request = ChatCompletionRequest {
            model: &self.model,
            messages: &messages,
            max_tokens: self.max_tokens,
            temperature: self.chat_temperature,
            stream: true,
        };

        let url = format!("{}/v1/chat/completions", self.base_url);
        let mut builder = self.client.post(&url).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.header("Authorization", format!("Bearer {key}"));
        }

        let response = builder.send().await.map_err(|e| CoreError::BackendUnavailable(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(CoreError::Generation(format!("model backend returned {status}: {body}")));
        }

        let byte_stream = response.bytes_stream();

        let parsed = futures::stream::unfold(byte_stream, |mut stream| async move {
            use futures::StreamExt;

            loop {
                match stream.next().await {
                    Some(Ok(bytes)) => {
                        let text = String::from_utf8_lossy(&bytes).to_string();
                        for line in text.lines() {
                            let Some(json_str) = line.strip_prefix("data: ") else { continue };
                            if json_str == "[DONE]" {
                                return None;
                            }
                            if let Ok(chunk) = serde_json::from_str::<ChatCompletionChunk>(json_str) {
                                if let Some(content) =
                                    chunk.choices.first().and_then(|c| c.delta.content.clone())
                                {
                                    if !content.is_empty() {
                                        return Some((Ok(content), stream));
                                    }
                                }
                            }
                        }
                        // Frame carried no emittable delta; keep polling the
                        // underlying stream instead of yielding an empty token.
                        continue;
                    }
                    Some(Err(e)) => {
                        return Some((Err(CoreError::Generation(format!("stream error: {e}"))), stream));
                    }
                    None => return None,
                }
            }
        });

        Ok(Box::pin(parsed))
    }
}
