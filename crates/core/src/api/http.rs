//! REST client for the Gemini Data Analytics `v1beta` API.

use async_trait::async_trait;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use super::stream::ChatMessageStream;
use super::{AnalyticsApi, MessageStream};
use crate::config::AppConfig;
use crate::error::{BunsekiError, Result};
use crate::types::{ChatMessage, ChatRequest, Conversation, DataAgent, Operation};

/// Fields sent on every agent update; together they cover the whole mutable agent.
const AGENT_UPDATE_MASK: &str = "displayName,description,dataAnalyticsAgent.publishedContext";

/// HTTP implementation of [`AnalyticsApi`].
pub struct HttpAnalyticsClient {
    base_url: String,
    access_token: String,
    http: reqwest::Client,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListDataAgentsResponse {
    #[serde(default)]
    data_agents: Vec<DataAgent>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListConversationsResponse {
    #[serde(default)]
    conversations: Vec<Conversation>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListMessagesResponse {
    #[serde(default)]
    messages: Vec<StorageMessage>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
struct StorageMessage {
    message: ChatMessage,
}

impl HttpAnalyticsClient {
    pub fn new(base_url: &str, access_token: impl Into<String>) -> Result<Self> {
        url::Url::parse(base_url).map_err(|e| {
            BunsekiError::NotConfigured(format!("invalid api_base_url '{}': {}", base_url, e))
        })?;
        let base_url = base_url.trim_end_matches('/').to_string();
        let http = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .build()?;
        Ok(Self {
            base_url,
            access_token: access_token.into(),
            http,
        })
    }

    /// Build a client from config, falling back to `gcloud` for the token.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let token = match &config.access_token {
            Some(token) => token.clone(),
            None => gcloud_access_token()?,
        };
        Self::new(&config.api_base_url, token)
    }

    fn url(&self, path: &str) -> String {
        format!("{}/v1beta/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn send<T: DeserializeOwned>(&self, request: reqwest::RequestBuilder) -> Result<T> {
        let resp = request.bearer_auth(&self.access_token).send().await?;
        let resp = check_status(resp).await?;
        let body = resp.text().await?;
        if body.trim().is_empty() {
            return Ok(serde_json::from_str("{}")?);
        }
        Ok(serde_json::from_str(&body)?)
    }

    /// GET `url` repeatedly, following `nextPageToken` until the last page.
    /// `split` takes a page apart into its items and the next token.
    async fn list_all<R, T>(
        &self,
        url: &str,
        page_size: Option<u32>,
        split: impl Fn(R) -> (Vec<T>, Option<String>),
    ) -> Result<Vec<T>>
    where
        R: DeserializeOwned,
    {
        let mut items = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut req = self.http.get(url);
            if let Some(size) = page_size {
                req = req.query(&[("pageSize", size.to_string())]);
            }
            if let Some(token) = &page_token {
                req = req.query(&[("pageToken", token)]);
            }
            let (page, next) = split(self.send::<R>(req).await?);
            items.extend(page);
            match next.filter(|t| !t.is_empty()) {
                Some(next) => page_token = Some(next),
                None => break,
            }
        }
        Ok(items)
    }
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status().as_u16();
    let body = resp.text().await.unwrap_or_default();
    Err(BunsekiError::Api { status, body })
}

/// Ask the local gcloud installation for an OAuth access token.
fn gcloud_access_token() -> Result<String> {
    let output = std::process::Command::new("gcloud")
        .args(["auth", "print-access-token"])
        .output()
        .map_err(|e| {
            BunsekiError::NotConfigured(format!(
                "access_token not set and gcloud is unavailable: {}",
                e
            ))
        })?;
    if !output.status.success() {
        return Err(BunsekiError::NotConfigured(format!(
            "gcloud auth print-access-token failed: {}",
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if token.is_empty() {
        return Err(BunsekiError::NotConfigured(
            "gcloud returned an empty access token".into(),
        ));
    }
    Ok(token)
}

#[async_trait]
impl AnalyticsApi for HttpAnalyticsClient {
    async fn list_agents(&self, parent: &str) -> Result<Vec<DataAgent>> {
        let url = self.url(&format!("{}/dataAgents", parent));
        let agents = self
            .list_all(&url, None, |page: ListDataAgentsResponse| {
                (page.data_agents, page.next_page_token)
            })
            .await?;
        debug!(count = agents.len(), "listed data agents");
        Ok(agents)
    }

    async fn create_agent(
        &self,
        parent: &str,
        agent_id: &str,
        agent: &DataAgent,
    ) -> Result<Operation> {
        let url = self.url(&format!("{}/dataAgents", parent));
        let req = self
            .http
            .post(&url)
            .query(&[("dataAgentId", agent_id)])
            .json(agent);
        self.send(req).await
    }

    async fn update_agent(&self, agent: &DataAgent) -> Result<Operation> {
        let url = self.url(&agent.name);
        let req = self
            .http
            .patch(&url)
            .query(&[("updateMask", AGENT_UPDATE_MASK)])
            .json(agent);
        self.send(req).await
    }

    async fn delete_agent(&self, name: &str) -> Result<Operation> {
        let req = self.http.delete(self.url(name));
        self.send(req).await
    }

    async fn get_operation(&self, name: &str) -> Result<Operation> {
        self.send(self.http.get(self.url(name))).await
    }

    async fn list_conversations(&self, parent: &str, page_size: u32) -> Result<Vec<Conversation>> {
        let url = self.url(&format!("{}/conversations", parent));
        let conversations = self
            .list_all(&url, Some(page_size), |page: ListConversationsResponse| {
                (page.conversations, page.next_page_token)
            })
            .await?;
        debug!(count = conversations.len(), "listed conversations");
        Ok(conversations)
    }

    async fn create_conversation(
        &self,
        parent: &str,
        conversation: &Conversation,
    ) -> Result<Conversation> {
        let url = self.url(&format!("{}/conversations", parent));
        let req = self.http.post(&url).json(conversation);
        self.send(req).await
    }

    async fn list_messages(&self, conversation: &str) -> Result<Vec<ChatMessage>> {
        let url = self.url(&format!("{}/messages", conversation));
        self.list_all(&url, None, |page: ListMessagesResponse| {
            let messages = page.messages.into_iter().map(|m| m.message).collect();
            (messages, page.next_page_token)
        })
        .await
    }

    async fn chat(&self, request: ChatRequest) -> Result<MessageStream> {
        let url = self.url(&format!("{}:chat", request.parent));
        debug!(conversation = %request.conversation_reference.conversation, "starting chat stream");
        let resp = self
            .http
            .post(&url)
            .bearer_auth(&self.access_token)
            .json(&request)
            .send()
            .await?;
        let resp = check_status(resp).await?;
        Ok(ChatMessageStream::new(Box::pin(resp.bytes_stream())).boxed())
    }
}
