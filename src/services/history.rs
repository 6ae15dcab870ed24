//! The History Manager (SPEC_FULL.md §4.I): turns a branch's full message
//! history into a token-bounded context to hand the Text Model Client. Net
//! new relative to the teacher (whose `ConversationState` kept an
//! unbounded linear history) — the budget arithmetic runs entirely against
//! the `chars/4` estimator in `utils::token_estimator`, never a live
//! tokenizer call, so it stays a pure, fast, synchronous decision wherever
//! it doesn't need to invoke summarization.

use std::sync::Arc;

use crate::config::HistoryConfig;
use crate::models::Message;
use crate::services::text_model::{ChatMessage, TextModelClient};
use crate::utils::error::CoreResult;
use crate::utils::token_estimator::{estimate_many, estimate_tokens};

pub struct HistoryManager {
    text_model: Arc<TextModelClient>,
    config: HistoryConfig,
}

impl HistoryManager {
    pub fn new(text_model: Arc<TextModelClient>, config: HistoryConfig) -> Self {
        Self { text_model, config }
    }

    /// `history` is the active branch's messages, oldest first, already
    /// excluding soft-deleted ones.
    pub async fn build_context(&self, history: &[Message]) -> CoreResult<Vec<ChatMessage>> {
        let total_tokens = estimate_many(history.iter().map(|m| m.content.as_str()));

        if total_tokens <= self.config.max_history_tokens {
            return Ok(history.iter().map(Self::to_chat_message).collect());
        }

        if history.len() > self.config.summarize_after_messages {
            let keep_n = self.config.summarize_after_messages / 2;
            let split_at = history.len().saturating_sub(keep_n);
            let (older, recent) = history.split_at(split_at);

            let transcript: Vec<ChatMessage> = older.iter().map(Self::to_chat_message).collect();
            let summary = self.text_model.summarize_conversation(&transcript).await?;

            let mut merged = vec![ChatMessage::system(format!("[Previous conversation summary: {summary}]"))];
            merged.extend(recent.iter().map(Self::to_chat_message));

            return Ok(self.enforce_budget(merged));
        }

        Ok(self.enforce_budget(history.iter().map(Self::to_chat_message).collect()))
    }

    /// Backward accumulation: keep the most recent messages while the
    /// running token total stays within budget. Always keeps at least the
    /// single most recent message, even if it alone exceeds the budget.
    fn enforce_budget(&self, messages: Vec<ChatMessage>) -> Vec<ChatMessage> {
        let mut kept = Vec::new();
        let mut used = 0usize;

        for msg in messages.into_iter().rev() {
            let tokens = estimate_tokens(&msg.content);
            if used + tokens > self.config.max_history_tokens && !kept.is_empty() {
                break;
            }
            used += tokens;
            kept.push(msg);
        }

        kept.reverse();
        kept
    }

    fn to_chat_message(message: &Message) -> ChatMessage {
        ChatMessage { role: message.role.clone(), content: message.content.clone() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelBackendConfig;
    use crate::utils::limiters::Limiters;
    use chrono::Utc;
    use uuid::Uuid;

    fn message(role: &str, content: &str) -> Message {
        Message {
            id: Uuid::new_v4(),
            chat_id: Uuid::new_v4(),
            parent_id: None,
            branch: "main".to_string(),
            role: role.to_string(),
            kind: "text".to_string(),
            content: content.to_string(),
            token_count: estimate_tokens(content) as i32,
            tool_name: None,
            tool_params: None,
            tool_call_id: None,
            attachments: vec![],
            sources: vec![],
            metadata: serde_json::json!({}),
            created_at: Utc::now(),
            deleted_at: None,
        }
    }

    fn manager(max_history_tokens: usize, summarize_after_messages: usize) -> HistoryManager {
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
        let limiters = Arc::new(Limiters::new(&crate::config::LimitsConfig {
            embedding_concurrency: 1,
            vision_concurrency: 1,
            db_search_concurrency: 1,
            llm_generate_concurrency: 1,
            llm_stream_concurrency: 1,
            acquire_timeout_ms: 1000,
        }));
        let text_model = Arc::new(TextModelClient::new(&backend, limiters));
        HistoryManager::new(text_model, HistoryConfig { max_history_tokens, summarize_after_messages })
    }

    #[tokio::test]
    async fn under_budget_passes_through_unchanged() {
        let mgr = manager(1000, 50);
        let history = vec![message("user", "hi"), message("assistant", "hello there")];
        let context = mgr.build_context(&history).await.unwrap();
        assert_eq!(context.len(), 2);
    }

    #[tokio::test]
    async fn backward_accumulation_keeps_at_least_the_last_message() {
        let mgr = manager(1, 1000);
        let history = vec![message("user", "a".repeat(100).as_str()), message("assistant", "b".repeat(100).as_str())];
        let context = mgr.build_context(&history).await.unwrap();
        assert_eq!(context.len(), 1);
        assert_eq!(context[0].content, "b".repeat(100));
    }
}
