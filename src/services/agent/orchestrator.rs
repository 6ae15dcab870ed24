//! The Agent Orchestrator (SPEC_FULL.md §4.J): the bounded think-act loop
//! that lets the Text Model Client reach for `rag_search`/`web_search`/
//! `file_reader` before answering. Ported from
//! `original_source/backend/app/agents/orchestrator.py`'s
//! `AgentOrchestrator` — both the non-streaming `process_message` and the
//! SSE-driving `process_message_stream` mirror its control flow: a tool
//! lookup failure is treated exactly like a tool execution failure (caught,
//! reported back to the model, loop continues), never a fatal error, and
//! `sources` is only ever populated from a `rag_search` tool's own result.

use std::pin::Pin;
use std::sync::Arc;

use async_stream::try_stream;
use futures::stream::{Stream, StreamExt};
use serde_json::{json, Value};
use tracing::{debug, info};

use super::parsing::parse_reply;
use super::tools::{ToolDefinition, ToolRegistry};
use crate::config::AgentConfig;
use crate::models::{Message, Source};
use crate::services::history::HistoryManager;
use crate::services::text_model::{ChatMessage, Operation, TextModelClient};
use crate::utils::error::{CoreError, CoreResult};

#[derive(Debug, Clone)]
pub struct ToolResultRecord {
    pub tool: String,
    pub input: Option<Value>,
    pub result: String,
    pub success: bool,
}

#[derive(Debug, Clone)]
pub struct AgentResponse {
    pub response: String,
    pub tool_results: Vec<ToolResultRecord>,
    pub sources: Vec<Source>,
    pub total_iterations: usize,
}

#[derive(Debug, Clone)]
pub enum StreamEvent {
    Message { token: String, iteration: usize },
    Thought { thought: String, action: Option<String> },
    ToolStart { tool: String, input: Option<Value> },
    ToolEnd { tool: String, success: bool, result_preview: String },
    Done { response: String, sources: Vec<Source>, iterations: usize },
    Error { tool: Option<String>, error: String },
}

pub struct AgentOrchestrator {
    tools: Arc<ToolRegistry>,
    text_model: Arc<TextModelClient>,
    history: Arc<HistoryManager>,
    config: AgentConfig,
}

impl AgentOrchestrator {
    pub fn new(tools: Arc<ToolRegistry>, text_model: Arc<TextModelClient>, history: Arc<HistoryManager>, config: AgentConfig) -> Self {
        Self { tools, text_model, history, config }
    }

    fn system_prompt(&self, tools: &[ToolDefinition]) -> String {
        let tool_descriptions = tools
            .iter()
            .map(|t| {
                let params = t
                    .parameters
                    .iter()
                    .map(|p| format!("{} ({}{}): {}", p.name, p.param_type, if p.required { ", required" } else { "" }, p.description))
                    .collect::<Vec<_>>()
                    .join("; ");
                format!("- {}: {}\n  parameters: {params}", t.name, t.description)
            })
            .collect::<Vec<_>>()
            .join("\n");

        format!(
            "You are a helpful assistant with access to the following tools:\n{tool_descriptions}\n\n\
             Respond with a fenced ```json code block containing an object with keys \"thought\" \
             (your reasoning), and either \"action\" and \"action_input\" to call a tool, or \
             \"action\": \"respond\" and \"response\" to answer directly."
        )
    }

    fn tool_result_message(tool_name: &str, payload: &str, success: bool) -> String {
        if success {
            format!("Tool '{tool_name}' returned: {payload}")
        } else {
            format!("Tool '{tool_name}' failed: {payload}. Please try a different approach.")
        }
    }

    async fn prepare_messages(&self, user_message: &str, history: &[Message]) -> CoreResult<Vec<ChatMessage>> {
        let mut messages = self.history.build_context(history).await?;
        messages.push(ChatMessage::user(user_message));
        Ok(messages)
    }

    /// Executes one tool call, collapsing a missing-tool lookup and an
    /// in-tool failure into the same `ToolResult`-shaped outcome so the
    /// caller doesn't need to distinguish them — matching the original's
    /// single `except Exception` around both failure modes.
    async fn execute_tool(&self, tool_name: &str, params: &Value) -> super::tools::ToolResult {
        match self.tools.get(tool_name) {
            Ok(tool) => {
                let result = tool.execute(params).await;
                info!(tool = tool_name, success = result.success, "tool executed");
                result
            }
            Err(e) => super::tools::ToolResult::failed(e.to_string()),
        }
    }

    fn extract_rag_sources(action: &str, result: &super::tools::ToolResult) -> Vec<Source> {
        if action == "rag_search" && result.success {
            result.sources.clone()
        } else {
            Vec::new()
        }
    }

    pub async fn process_message(&self, user_message: &str, history: &[Message]) -> CoreResult<AgentResponse> {
        let definitions = self.tools.definitions();
        let system_prompt = self.system_prompt(&definitions);
        let mut messages = self.prepare_messages(user_message, history).await?;

        let mut tool_results = Vec::new();
        let mut sources = Vec::new();

        for iteration in 0..self.config.max_iterations {
            debug!(iteration = iteration + 1, max = self.config.max_iterations, "agent iteration");

            let mut prompted = vec![ChatMessage::system(system_prompt.clone())];
            prompted.extend(messages.clone());

            let response_text = self.text_model.generate(&prompted, Operation::Chat).await?;
            let thought = parse_reply(&response_text);

            if thought.action.as_deref() == Some("respond") || thought.response.is_some() {
                return Ok(AgentResponse {
                    response: thought.response.unwrap_or(response_text),
                    tool_results,
                    sources,
                    total_iterations: iteration + 1,
                });
            }

            if let Some(action) = thought.action {
                let params = thought.action_input.unwrap_or_else(|| json!({}));
                let result = self.execute_tool(&action, &params).await;

                sources.extend(Self::extract_rag_sources(&action, &result));

                let payload = if result.success { result.result.clone() } else { result.error.clone().unwrap_or_default() };
                tool_results.push(ToolResultRecord {
                    tool: action.clone(),
                    input: Some(params),
                    result: payload.clone(),
                    success: result.success,
                });

                messages.push(ChatMessage::assistant(response_text));
                messages.push(ChatMessage::user(Self::tool_result_message(&action, &payload, result.success)));
            }
        }

        Err(CoreError::MaxIterationsExceeded(self.config.max_iterations))
    }

    pub fn process_message_stream<'a>(
        &'a self,
        user_message: &'a str,
        history: &'a [Message],
    ) -> Pin<Box<dyn Stream<Item = CoreResult<StreamEvent>> + Send + 'a>> {
        Box::pin(try_stream! {
            let definitions = self.tools.definitions();
            let system_prompt = self.system_prompt(&definitions);
            let mut messages = self.prepare_messages(user_message, history).await?;
            let mut sources: Vec<Source> = Vec::new();

            for iteration in 0..self.config.max_iterations {
                let mut prompted = vec![ChatMessage::system(system_prompt.clone())];
                prompted.extend(messages.clone());

                let mut stream = self.text_model.chat_stream(prompted).await?;
                let mut response_text = String::new();
                while let Some(token) = stream.next().await {
                    let token = token?;
                    response_text.push_str(&token);
                    yield StreamEvent::Message { token, iteration };
                }

                let thought = parse_reply(&response_text);
                yield StreamEvent::Thought { thought: thought.thought.clone(), action: thought.action.clone() };

                if thought.action.as_deref() == Some("respond") || thought.response.is_some() {
                    yield StreamEvent::Done {
                        response: thought.response.unwrap_or(response_text),
                        sources,
                        iterations: iteration + 1,
                    };
                    return;
                }

                if let Some(action) = thought.action {
                    let params = thought.action_input.clone().unwrap_or_else(|| json!({}));
                    yield StreamEvent::ToolStart { tool: action.clone(), input: thought.action_input.clone() };

                    let result = self.execute_tool(&action, &params).await;
                    let preview: String = {
                        let text = if result.success { &result.result } else { result.error.as_deref().unwrap_or("") };
                        text.chars().take(200).collect()
                    };
                    yield StreamEvent::ToolEnd { tool: action.clone(), success: result.success, result_preview: preview };

                    sources.extend(Self::extract_rag_sources(&action, &result));

                    let payload = if result.success { result.result.clone() } else { result.error.clone().unwrap_or_default() };
                    messages.push(ChatMessage::assistant(response_text));
                    messages.push(ChatMessage::user(Self::tool_result_message(&action, &payload, result.success)));
                }
            }

            yield StreamEvent::Error { tool: None, error: "maximum iterations exceeded".to_string() };
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HistoryConfig, LimitsConfig, ModelBackendConfig};
    use crate::utils::limiters::Limiters;
    use async_trait::async_trait;

    struct StubTool;

    #[async_trait]
    impl super::super::tools::Tool for StubTool {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition { name: "stub".to_string(), description: "stub tool".to_string(), parameters: vec![] }
        }

        async fn execute(&self, _params: &Value) -> super::super::tools::ToolResult {
            super::super::tools::ToolResult::ok("stub result")
        }
    }

    fn orchestrator(max_iterations: usize) -> AgentOrchestrator {
        let backend = ModelBackendConfig {
            base_url: "http://localhost".into(),
            api_key: None,
            text_model: "text".into(),
            vision_model: "vision".into(),
            embedding_model: "embed".into(),
            embedding_dimension: 4,
            chat_temperature: 0.7,
            factual_temperature: 0.1,
            top_p: 0.9,
            max_tokens: 512,
            keep_alive_seconds: 300,
            generation_timeout_seconds: 60,
            embedding_timeout_seconds: 60,
            embedding_batch_size: 8,
            embedding_retry_attempts: 3,
        };
        let limiters = Arc::new(Limiters::new(&LimitsConfig {
            embedding_concurrency: 1,
            vision_concurrency: 1,
            db_search_concurrency: 1,
            llm_generate_concurrency: 1,
            llm_stream_concurrency: 1,
            acquire_timeout_ms: 1000,
        }));
        let text_model = Arc::new(TextModelClient::new(&backend, limiters));
        let history = Arc::new(HistoryManager::new(text_model.clone(), HistoryConfig { max_history_tokens: 4000, summarize_after_messages: 50 }));
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(StubTool));
        AgentOrchestrator::new(Arc::new(registry), text_model, history, AgentConfig { max_iterations })
    }

    #[test]
    fn system_prompt_lists_every_registered_tool() {
        let orch = orchestrator(3);
        let prompt = orch.system_prompt(&orch.tools.definitions());
        assert!(prompt.contains("stub"));
    }

    #[tokio::test]
    async fn tool_not_found_is_reported_as_a_failed_result_not_an_error() {
        let orch = orchestrator(3);
        let result = orch.execute_tool("missing", &json!({})).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("missing"));
    }
}
