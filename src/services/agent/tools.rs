//! Tool Registry and built-in tools for the Agent Orchestrator (SPEC_FULL.md
//! §4.J). Grounded on `original_source/backend/app/agents/tools/{base,
//! registry,rag,web_search,file_reader}.py`: a `Tool` trait standing in for
//! `BaseTool`, a `ToolRegistry` with the same register/get/list-definitions
//! surface, and the three built-in tools with the same parameter and result
//! shapes (`sources` populated only by `RagSearchTool`, never parsed out of
//! free text).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::database::DocumentRepository;
use crate::models::{DocumentStatus, Source};
use crate::services::embedding::EmbeddingProvider;
use crate::services::retrieval::Retrieval;
use crate::utils::error::{CoreError, CoreResult};

#[derive(Debug, Clone, Serialize)]
pub struct ToolParameter {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: String,
    pub description: String,
    pub required: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Vec<ToolParameter>,
}

#[derive(Debug, Clone, Default)]
pub struct ToolResult {
    pub success: bool,
    pub result: String,
    pub sources: Vec<Source>,
    pub error: Option<String>,
}

impl ToolResult {
    pub fn ok(result: impl Into<String>) -> Self {
        Self { success: true, result: result.into(), sources: Vec::new(), error: None }
    }

    pub fn ok_with_sources(result: impl Into<String>, sources: Vec<Source>) -> Self {
        Self { success: true, result: result.into(), sources, error: None }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        let message = message.into();
        Self { success: false, result: String::new(), sources: Vec::new(), error: Some(message) }
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn definition(&self) -> ToolDefinition;
    async fn execute(&self, params: &Value) -> ToolResult;

    fn name(&self) -> String {
        self.definition().name
    }
}

/// Registry of available tools, keyed by name. Duplicate registration
/// overwrites the previous entry and logs a warning rather than failing.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name();
        if self.tools.contains_key(&name) {
            warn!(tool_name = %name, "overwriting existing tool");
        }
        info!(tool_name = %name, "tool registered");
        self.tools.insert(name, tool);
    }

    pub fn get(&self, name: &str) -> CoreResult<Arc<dyn Tool>> {
        self.tools.get(name).cloned().ok_or_else(|| CoreError::ToolNotFound(name.to_string(), self.list_names()))
    }

    pub fn list_names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.values().map(|t| t.definition()).collect()
    }
}

/// Searches the document knowledge base via dense vector retrieval. The
/// only tool whose result populates `sources` — the Orchestrator never
/// re-derives citations from response text.
pub struct RagSearchTool {
    retrieval: Arc<Retrieval>,
    embedder: Arc<dyn EmbeddingProvider>,
    top_k: i64,
    min_similarity: f32,
}

impl RagSearchTool {
    pub fn new(retrieval: Arc<Retrieval>, embedder: Arc<dyn EmbeddingProvider>, top_k: i64, min_similarity: f32) -> Self {
        Self { retrieval, embedder, top_k, min_similarity }
    }
}

#[async_trait]
impl Tool for RagSearchTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "rag_search".to_string(),
            description: "Search through uploaded documents to find relevant information. Use this \
                tool when the user asks questions that might be answered by the documents in the \
                knowledge base. Returns the most relevant text passages from the documents."
                .to_string(),
            parameters: vec![
                ToolParameter {
                    name: "query".to_string(),
                    param_type: "string".to_string(),
                    description: "The search query to find relevant documents".to_string(),
                    required: true,
                },
                ToolParameter {
                    name: "top_k".to_string(),
                    param_type: "number".to_string(),
                    description: "Number of results to return".to_string(),
                    required: false,
                },
                ToolParameter {
                    name: "document_id".to_string(),
                    param_type: "string".to_string(),
                    description: "Optional document ID to restrict the search to".to_string(),
                    required: false,
                },
            ],
        }
    }

    async fn execute(&self, params: &Value) -> ToolResult {
        let Some(query) = params.get("query").and_then(Value::as_str) else {
            return ToolResult::failed("missing required parameter 'query'");
        };

        let top_k = params.get("top_k").and_then(Value::as_i64).unwrap_or(self.top_k);

        let document_id = match params.get("document_id").and_then(Value::as_str) {
            Some(raw) => match raw.parse::<Uuid>() {
                Ok(id) => Some(id),
                Err(_) => return ToolResult::failed(format!("invalid document_id: {raw}")),
            },
            None => None,
        };

        let embedding = match self.embedder.embed(query).await {
            Ok(vector) => vector,
            Err(e) => return ToolResult::failed(format!("embedding failed: {e}")),
        };

        let results = match self.retrieval.dense_search(&embedding, top_k, self.min_similarity, document_id).await {
            Ok(results) => results,
            Err(e) => return ToolResult::failed(format!("search failed: {e}")),
        };

        if results.is_empty() {
            return ToolResult::ok("No relevant documents found for this query.");
        }

        let mut context_parts = Vec::with_capacity(results.len());
        let mut sources = Vec::with_capacity(results.len());
        for (i, result) in results.iter().enumerate() {
            let index = i + 1;
            let page_suffix = result.page_number.map(|p| format!(", Page {p}")).unwrap_or_default();
            context_parts.push(format!(
                "[Source {index}: {}{page_suffix}]\n{}",
                result.original_filename,
                result.content
            ));
            sources.push(Source::Rag {
                index,
                document: result.original_filename.clone(),
                page: result.page_number,
                chunk_id: Some(result.chunk_id),
                similarity: Some(result.similarity),
                content_preview: result.content.chars().take(200).collect(),
            });
        }

        ToolResult::ok_with_sources(context_parts.join("\n\n---\n\n"), sources)
    }
}

/// Reads the full text content of a single document, optionally restricted
/// to specific pages. Used when the model needs the whole document rather
/// than a handful of retrieved passages. Accepts either `document_id` or
/// `filename` to identify the document, per the original file reader tool.
pub struct FileReaderTool {
    retrieval: Arc<Retrieval>,
    documents: Arc<DocumentRepository>,
}

impl FileReaderTool {
    pub fn new(retrieval: Arc<Retrieval>, documents: Arc<DocumentRepository>) -> Self {
        Self { retrieval, documents }
    }
}

#[async_trait]
impl Tool for FileReaderTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "file_reader".to_string(),
            description: "Read the full content of an uploaded document. Use this when you need to \
                see the complete text of a document rather than just searching for relevant passages. \
                Provide either the document ID or filename."
                .to_string(),
            parameters: vec![
                ToolParameter {
                    name: "document_id".to_string(),
                    param_type: "string".to_string(),
                    description: "The UUID of the document to read".to_string(),
                    required: false,
                },
                ToolParameter {
                    name: "filename".to_string(),
                    param_type: "string".to_string(),
                    description: "The filename of the document to read".to_string(),
                    required: false,
                },
                ToolParameter {
                    name: "page_numbers".to_string(),
                    param_type: "array".to_string(),
                    description: "Optional list of specific page numbers to read".to_string(),
                    required: false,
                },
            ],
        }
    }

    async fn execute(&self, params: &Value) -> ToolResult {
        let document_id_raw = params.get("document_id").and_then(Value::as_str);
        let filename = params.get("filename").and_then(Value::as_str);

        if document_id_raw.is_none() && filename.is_none() {
            return ToolResult::failed("must provide either 'document_id' or 'filename'");
        }

        let document = if let Some(raw) = document_id_raw {
            let document_id = match raw.parse::<Uuid>() {
                Ok(id) => id,
                Err(_) => return ToolResult::failed(format!("invalid document_id: {raw}")),
            };
            self.documents.get(document_id).await
        } else {
            self.documents.find_by_filename(filename.unwrap()).await
        };

        let document = match document {
            Ok(Some(document)) => document,
            Ok(None) => {
                return ToolResult::failed(format!("document not found: {}", document_id_raw.or(filename).unwrap_or("")))
            }
            Err(e) => return ToolResult::failed(format!("failed to look up document: {e}")),
        };

        if document.status() != DocumentStatus::Completed {
            return ToolResult::failed(format!("document is not ready (status: {})", document.status().as_str()));
        }

        let page_numbers: Option<Vec<i32>> = params.get("page_numbers").and_then(Value::as_array).map(|values| {
            values.iter().filter_map(Value::as_i64).map(|n| n as i32).collect()
        });

        match self.retrieval.document_text(document.id, page_numbers.as_deref()).await {
            Ok(Some(text)) => ToolResult::ok(text),
            Ok(None) => ToolResult::ok(document.summary.clone().unwrap_or_else(|| "No content available.".to_string())),
            Err(e) => ToolResult::failed(format!("failed to read document: {e}")),
        }
    }
}

/// Searches the public web via DuckDuckGo's Instant Answer API (no key
/// required). Scoped down relative to the original's HTML-scraped search:
/// returns abstract/related-topic snippets rather than a full results page,
/// which keeps the dependency footprint to the `reqwest`/`serde_json` the
/// rest of the crate already carries.
pub struct WebSearchTool {
    client: Client,
    max_results: usize,
}

#[derive(serde::Deserialize)]
struct DuckDuckGoResponse {
    #[serde(rename = "AbstractText", default)]
    abstract_text: String,
    #[serde(rename = "AbstractURL", default)]
    abstract_url: String,
    #[serde(rename = "Heading", default)]
    heading: String,
    #[serde(rename = "RelatedTopics", default)]
    related_topics: Vec<RelatedTopic>,
}

#[derive(serde::Deserialize)]
struct RelatedTopic {
    #[serde(rename = "Text", default)]
    text: String,
    #[serde(rename = "FirstURL", default)]
    first_url: String,
}

impl WebSearchTool {
    pub fn new(client: Client, max_results: usize) -> Self {
        Self { client, max_results: max_results.max(1) }
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: "web_search".to_string(),
            description: "Search the web for current information. Use this tool when you need to \
                find information that might not be in the uploaded documents, such as recent news, \
                general knowledge, or external references."
                .to_string(),
            parameters: vec![
                ToolParameter {
                    name: "query".to_string(),
                    param_type: "string".to_string(),
                    description: "The search query".to_string(),
                    required: true,
                },
                ToolParameter {
                    name: "max_results".to_string(),
                    param_type: "number".to_string(),
                    description: "Maximum number of results (1-10)".to_string(),
                    required: false,
                },
            ],
        }
    }

    async fn execute(&self, params: &Value) -> ToolResult {
        let Some(query) = params.get("query").and_then(Value::as_str) else {
            return ToolResult::failed("missing required parameter 'query'");
        };
        let max_results = params
            .get("max_results")
            .and_then(Value::as_u64)
            .map(|n| n as usize)
            .unwrap_or(self.max_results)
            .clamp(1, 10);

        let response = match self
            .client
            .get("https://api.duckduckgo.com/")
            .query(&[("q", query), ("format", "json"), ("no_html", "1"), ("skip_disambig", "1")])
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(e) => return ToolResult::failed(format!("web search request failed: {e}")),
        };

        let parsed: DuckDuckGoResponse = match response.json().await {
            Ok(body) => body,
            Err(e) => return ToolResult::failed(format!("web search response invalid: {e}")),
        };

        let mut result_parts = Vec::new();
        let mut sources = Vec::new();

        if !parsed.abstract_text.is_empty() {
            let index = result_parts.len() + 1;
            result_parts.push(format!("[{index}] {}\nURL: {}\n{}", parsed.heading, parsed.abstract_url, parsed.abstract_text));
            sources.push(Source::Web {
                index,
                title: parsed.heading.clone(),
                url: parsed.abstract_url.clone(),
                content_preview: parsed.abstract_text.chars().take(200).collect(),
            });
        }

        for topic in parsed.related_topics.into_iter().filter(|t| !t.text.is_empty() && !t.first_url.is_empty()) {
            if result_parts.len() >= max_results {
                break;
            }
            let index = result_parts.len() + 1;
            result_parts.push(format!("[{index}] {}\nURL: {}", topic.text, topic.first_url));
            sources.push(Source::Web {
                index,
                title: topic.text.chars().take(80).collect(),
                url: topic.first_url,
                content_preview: topic.text,
            });
        }

        if result_parts.is_empty() {
            return ToolResult::ok(format!("No web results found for: {query}"));
        }

        ToolResult::ok_with_sources(result_parts.join("\n\n"), sources)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl Tool for Echo {
        fn definition(&self) -> ToolDefinition {
            ToolDefinition { name: "echo".to_string(), description: "echoes".to_string(), parameters: vec![] }
        }

        async fn execute(&self, _params: &Value) -> ToolResult {
            ToolResult::ok("echoed")
        }
    }

    #[tokio::test]
    async fn unknown_tool_lookup_lists_known_names() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(Echo));
        let err = registry.get("missing").unwrap_err();
        match err {
            CoreError::ToolNotFound(name, known) => {
                assert_eq!(name, "missing");
                assert_eq!(known, vec!["echo".to_string()]);
            }
            other => panic!("expected ToolNotFound, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn registering_same_name_twice_overwrites() {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(Echo));
        registry.register(Arc::new(Echo));
        assert_eq!(registry.list_names().len(), 1);
    }
}
