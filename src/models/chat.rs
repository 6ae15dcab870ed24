use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::HashMap;
use uuid::Uuid;

pub const MAIN_BRANCH: &str = "main";

/// One entry in a Chat's branch table: `name -> {created_at, from_message_id}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Branch {
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub from_message_id: Option<Uuid>,
}

/// A conversation. The branch table always contains `main`, and
/// `active_branch` is always a key of it (enforced by the store, not here).
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Chat {
    pub id: Uuid,
    pub title: Option<String>,
    pub summary: Option<String>,
    pub active_branch: String,
    #[sqlx(json)]
    pub branches: Vec<Branch>,
    pub message_count: i32,
    pub last_message_at: DateTime<Utc>,
    #[sqlx(json)]
    pub settings: serde_json::Value,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Chat {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn has_branch(&self, name: &str) -> bool {
        self.branches.iter().any(|b| b.name == name)
    }

    pub fn branch(&self, name: &str) -> Option<&Branch> {
        self.branches.iter().find(|b| b.name == name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
    System,
    Tool,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
            Self::Tool => "tool",
        }
    }
}

impl std::str::FromStr for MessageRole {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Self::User),
            "assistant" => Ok(Self::Assistant),
            "system" => Ok(Self::System),
            "tool" => Ok(Self::Tool),
            other => anyhow::bail!("unknown message role '{other}'"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    Text,
    File,
    ToolCall,
    ToolResult,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::File => "file",
            Self::ToolCall => "tool_call",
            Self::ToolResult => "tool_result",
        }
    }
}

/// A citation attached to an assistant message grounded by retrieval.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Source {
    Rag {
        index: usize,
        document: String,
        page: Option<i32>,
        chunk_id: Option<Uuid>,
        similarity: Option<f32>,
        content_preview: String,
    },
    Web {
        index: usize,
        title: String,
        url: String,
        content_preview: String,
    },
}

/// A node in the branchable message graph.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub chat_id: Uuid,
    pub parent_id: Option<Uuid>,
    pub branch: String,
    pub role: String,
    pub kind: String,
    pub content: String,
    pub token_count: i32,
    pub tool_name: Option<String>,
    #[sqlx(json)]
    pub tool_params: Option<serde_json::Value>,
    pub tool_call_id: Option<Uuid>,
    #[sqlx(json)]
    pub attachments: Vec<serde_json::Value>,
    #[sqlx(json)]
    pub sources: Vec<Source>,
    #[sqlx(json)]
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Message {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    pub fn role(&self) -> MessageRole {
        self.role.parse().unwrap_or(MessageRole::User)
    }
}

/// A flattened `(role, content)` pair as handed to the Text Model Client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: String,
    pub content: String,
}

impl From<&Message> for ChatTurn {
    fn from(m: &Message) -> Self {
        Self {
            role: m.role.clone(),
            content: m.content.clone(),
        }
    }
}

pub type Attachments = HashMap<String, serde_json::Value>;
