//! The Agent Orchestrator component (SPEC_FULL.md §4.J): reply parsing,
//! the tool registry and built-in tools, and the bounded think-act loop
//! that ties them together.

pub mod orchestrator;
pub mod parsing;
pub mod tools;

pub use orchestrator::{AgentOrchestrator, AgentResponse, StreamEvent, ToolResultRecord};
pub use parsing::{parse_reply, AgentThought};
pub use tools::{FileReaderTool, RagSearchTool, Tool, ToolDefinition, ToolRegistry, ToolResult, WebSearchTool};
