//! Per-session cache of remote state.
//!
//! `SessionContext` mirrors the last successful fetch of agents,
//! conversations and messages, plus the current selection. All durable state
//! lives on the remote service; the only locally synthesized entries are the
//! optimistic user message and streamed fragments appended during a chat,
//! which the next `refresh_messages` replaces.
//!
//! Refreshes clear their collection before the remote call, so a failed
//! refresh leaves it empty. `create_conversation` only touches the cache on
//! success.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::admin;
use crate::api::AnalyticsApi;
use crate::config::AppConfig;
use crate::error::{BunsekiError, Result};
use crate::templates::TemplateLoader;
use crate::types::{ChatMessage, Conversation, DataAgent, DataResult};

/// Page size used when listing conversations.
pub const CONVERSATION_PAGE_SIZE: u32 = 100;

pub struct SessionContext {
    pub(crate) api: Arc<dyn AnalyticsApi>,
    pub(crate) config: AppConfig,
    parent: String,
    pub(crate) agents: Vec<DataAgent>,
    pub(crate) conversations: Vec<Conversation>,
    pub(crate) messages: Vec<ChatMessage>,
    pub(crate) current_agent: Option<DataAgent>,
    pub(crate) current_conversation: Option<Conversation>,
    /// Full result set of the most recent data fragment (display copies are
    /// truncated).
    pub(crate) last_result: Option<DataResult>,
    redraw: bool,
}

impl SessionContext {
    /// Fails only when the project is not configured.
    pub fn new(api: Arc<dyn AnalyticsApi>, config: AppConfig) -> Result<Self> {
        let parent = config.parent()?;
        Ok(Self {
            api,
            config,
            parent,
            agents: Vec::new(),
            conversations: Vec::new(),
            messages: Vec::new(),
            current_agent: None,
            current_conversation: None,
            last_result: None,
            redraw: false,
        })
    }

    // ── Accessors ─────────────────────────────────────────────────

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// `projects/{p}/locations/{l}`
    pub fn parent(&self) -> &str {
        &self.parent
    }

    pub fn agents(&self) -> &[DataAgent] {
        &self.agents
    }

    pub fn conversations(&self) -> &[Conversation] {
        &self.conversations
    }

    /// Cached messages, oldest first.
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn current_agent(&self) -> Option<&DataAgent> {
        self.current_agent.as_ref()
    }

    pub fn current_conversation(&self) -> Option<&Conversation> {
        self.current_conversation.as_ref()
    }

    pub fn last_result(&self) -> Option<&DataResult> {
        self.last_result.as_ref()
    }

    pub fn templates(&self) -> TemplateLoader {
        TemplateLoader::new(&self.config.templates_dir)
    }

    /// Return and reset the redraw flag.
    pub fn take_redraw(&mut self) -> bool {
        std::mem::take(&mut self.redraw)
    }

    pub(crate) fn mark_redraw(&mut self) {
        self.redraw = true;
    }

    // ── Initialization ────────────────────────────────────────────

    /// Load agents, pick the most recent agent and conversation, and load its
    /// messages. Auto-provisions an agent from the first template when the
    /// project has none. Errors are logged and returned; they never stop
    /// the remaining steps.
    pub async fn initialize(&mut self) -> Vec<BunsekiError> {
        let mut errors = Vec::new();

        if let Err(e) = self.refresh_agents().await {
            warn!(error = %e, "initial agent fetch failed");
            errors.push(e);
        }

        if self.agents.is_empty() && self.config.auto_provision {
            match self.templates().first_template() {
                Some(template) => {
                    info!(template = %template.name, "no agents found, provisioning from template");
                    if let Err(e) = admin::create_agent_from_template(self, &template).await {
                        warn!(error = %e, "auto-provisioning failed");
                        errors.push(e);
                    }
                }
                None => debug!("no agents and no template available"),
            }
        }

        self.current_agent = self.agents.last().cloned();
        self.current_conversation = None;

        if let Some(agent) = self.current_agent.clone() {
            if let Err(e) = self.refresh_conversations(&agent).await {
                warn!(error = %e, "initial conversation fetch failed");
                errors.push(e);
            }
        }

        self.current_conversation = self.conversations.first().cloned();

        if let Some(conversation) = self.current_conversation.clone() {
            if let Err(e) = self.refresh_messages(&conversation).await {
                warn!(error = %e, "initial message fetch failed");
                errors.push(e);
            }
        }

        self.mark_redraw();
        errors
    }

    // ── Refresh ───────────────────────────────────────────────────

    pub async fn refresh_agents(&mut self) -> Result<()> {
        self.agents.clear();
        self.mark_redraw();

        let agents = self.api.list_agents(&self.parent).await?;
        debug!(count = agents.len(), "agents refreshed");

        // Keep the selection pointing at the fresh copy, or drop it (with its
        // conversations) once the agent is gone.
        if let Some(current) = self.current_agent.take() {
            match agents.iter().find(|a| a.name == current.name) {
                Some(fresh) => self.current_agent = Some(fresh.clone()),
                None => {
                    info!(agent = %current.name, "selected agent no longer exists");
                    self.conversations.clear();
                    self.current_conversation = None;
                    self.messages.clear();
                    self.last_result = None;
                }
            }
        }
        self.agents = agents;
        Ok(())
    }

    /// Conversations owned by `agent`.
    pub async fn refresh_conversations(&mut self, agent: &DataAgent) -> Result<()> {
        self.conversations.clear();
        self.mark_redraw();

        let all = self
            .api
            .list_conversations(&self.parent, CONVERSATION_PAGE_SIZE)
            .await?;
        let total = all.len();
        self.conversations = all
            .into_iter()
            .filter(|c| c.owner() == Some(agent.name.as_str()))
            .collect();
        debug!(
            agent = %agent.name,
            total,
            kept = self.conversations.len(),
            "conversations refreshed"
        );
        Ok(())
    }

    /// Messages of `conversation`, stored oldest first.
    pub async fn refresh_messages(&mut self, conversation: &Conversation) -> Result<()> {
        self.messages.clear();
        self.mark_redraw();

        let mut messages = self.api.list_messages(&conversation.name).await?;
        messages.reverse();
        debug!(conversation = %conversation.name, count = messages.len(), "messages refreshed");
        self.messages = messages;
        Ok(())
    }

    /// Create a conversation owned by `agent` and put it at the front of the
    /// cached list.
    pub async fn create_conversation(&mut self, agent: &DataAgent) -> Result<Conversation> {
        let created = self
            .api
            .create_conversation(&self.parent, &Conversation::for_agent(&agent.name))
            .await?;
        info!(conversation = %created.name, agent = %agent.name, "conversation created");
        self.conversations.insert(0, created.clone());
        self.mark_redraw();
        Ok(created)
    }

    // ── Selection ─────────────────────────────────────────────────

    /// Switch to another agent: load its conversations, select the most
    /// recent one and load its messages.
    pub async fn select_agent(&mut self, name: &str) -> Result<()> {
        let agent = self
            .agents
            .iter()
            .find(|a| a.name == name)
            .cloned()
            .ok_or_else(|| BunsekiError::Validation(format!("unknown agent: {}", name)))?;

        self.current_agent = Some(agent.clone());
        self.current_conversation = None;
        self.messages.clear();
        self.mark_redraw();

        self.refresh_conversations(&agent).await?;
        if let Some(first) = self.conversations.first().cloned() {
            self.current_conversation = Some(first.clone());
            self.refresh_messages(&first).await?;
        }
        Ok(())
    }

    /// Switch to a cached conversation and load its messages.
    pub async fn select_conversation(&mut self, name: &str) -> Result<()> {
        let conversation = self
            .conversations
            .iter()
            .find(|c| c.name == name)
            .cloned()
            .ok_or_else(|| BunsekiError::Validation(format!("unknown conversation: {}", name)))?;

        self.current_conversation = Some(conversation.clone());
        self.refresh_messages(&conversation).await
    }

    /// Open a fresh conversation with the current agent.
    pub async fn start_new_chat(&mut self) -> Result<Conversation> {
        let agent = self
            .current_agent
            .clone()
            .ok_or(BunsekiError::NoAgentSelected)?;
        let conversation = self.create_conversation(&agent).await?;
        self.current_conversation = Some(conversation.clone());
        self.messages.clear();
        self.last_result = None;
        Ok(conversation)
    }
}
