//! Contract of the remote data analytics API.
//!
//! Everything durable lives behind this trait. The session cache, admin and
//! chat layers only ever talk to `dyn AnalyticsApi`, which keeps them
//! testable against an in-memory fake.

pub mod http;
pub mod stream;

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::Result;
use crate::types::{ChatMessage, ChatRequest, Conversation, DataAgent, Operation};

pub use http::HttpAnalyticsClient;

/// Messages streamed back by a chat call, in arrival order.
pub type MessageStream = BoxStream<'static, Result<ChatMessage>>;

/// Remote agent + chat service.
#[async_trait]
pub trait AnalyticsApi: Send + Sync {
    /// List every data agent under `parent` (all pages).
    async fn list_agents(&self, parent: &str) -> Result<Vec<DataAgent>>;

    /// Create an agent with a caller-chosen id. Returns the pending operation.
    async fn create_agent(&self, parent: &str, agent_id: &str, agent: &DataAgent)
        -> Result<Operation>;

    /// Full-field update of an existing agent, keyed by `agent.name`.
    async fn update_agent(&self, agent: &DataAgent) -> Result<Operation>;

    async fn delete_agent(&self, name: &str) -> Result<Operation>;

    /// Current state of a long-running operation.
    async fn get_operation(&self, name: &str) -> Result<Operation>;

    /// List every conversation under `parent` (all pages, `page_size` per
    /// request).
    async fn list_conversations(&self, parent: &str, page_size: u32) -> Result<Vec<Conversation>>;

    async fn create_conversation(
        &self,
        parent: &str,
        conversation: &Conversation,
    ) -> Result<Conversation>;

    /// Messages of a conversation, newest first (remote order, all pages).
    async fn list_messages(&self, conversation: &str) -> Result<Vec<ChatMessage>>;

    /// Send a chat request and stream the response fragments.
    async fn chat(&self, request: ChatRequest) -> Result<MessageStream>;
}
