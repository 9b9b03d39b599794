//! Sending a question and consuming the streamed answer.

use futures::StreamExt;
use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::error::{BunsekiError, Result};
use crate::render::{render_message, Block};
use crate::session::SessionContext;
use crate::types::{
    ChatMessage, ChatRequest, ConversationReference, Credentials, DataAgent, DataAgentContext,
};

/// Per-send switches.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChatOptions {
    /// Prefix the outgoing question with the agent's system instruction.
    pub guardrail: bool,
}

impl ChatOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            guardrail: config.guardrail,
        }
    }
}

/// Wrap `text` as a rules-then-question composite. An empty instruction
/// leaves the text unchanged.
pub fn apply_guardrail(system_instruction: &str, text: &str) -> String {
    let rules = system_instruction.trim();
    if rules.is_empty() {
        return text.to_string();
    }
    format!("[Rules]\n{}\n\n[Question]\n{}", rules, text)
}

/// True when the agent reads from a Looker explore.
pub fn is_looker_agent(agent: &DataAgent) -> bool {
    agent.datasource_references().looker.is_some()
}

fn looker_credentials(config: &AppConfig) -> Result<Credentials> {
    match (&config.looker.client_id, &config.looker.client_secret) {
        (Some(id), Some(secret)) => Ok(Credentials::oauth_secret(id, secret)),
        _ => Err(BunsekiError::NotConfigured(
            "Looker agent selected but LOOKER_CLIENT_ID / LOOKER_CLIENT_SECRET are not set".into(),
        )),
    }
}

/// Send `text` to the current agent. Rendered blocks are handed to `sink`
/// as they become available: first the user's own message, then one batch
/// per streamed fragment in arrival order. Returns the number of fragments
/// received.
///
/// A stream error stops consumption; fragments received so far stay in the
/// cache.
pub async fn send_message<F>(
    ctx: &mut SessionContext,
    text: &str,
    options: &ChatOptions,
    mut sink: F,
) -> Result<usize>
where
    F: FnMut(Vec<Block>),
{
    let Some(agent) = ctx.current_agent.clone() else {
        warn!("message not sent: no agent selected");
        return Err(BunsekiError::NoAgentSelected);
    };

    // Resolve credentials before touching the cache or the remote side.
    let credentials = if is_looker_agent(&agent) {
        Some(looker_credentials(&ctx.config)?)
    } else {
        None
    };

    if ctx.conversations.is_empty() {
        let created = ctx.create_conversation(&agent).await?;
        ctx.current_conversation = Some(created);
        ctx.messages.clear();
    }
    let conversation = match ctx.current_conversation.clone() {
        Some(c) => c,
        None => {
            let first = ctx.conversations[0].clone();
            ctx.current_conversation = Some(first.clone());
            first
        }
    };

    let row_limit = ctx.config.result_row_limit;
    let user = ChatMessage::user(text);
    sink(render_message(&user, row_limit, &mut ctx.last_result));
    ctx.messages.push(user);

    let outgoing = if options.guardrail {
        apply_guardrail(agent.system_instruction(), text)
    } else {
        text.to_string()
    };

    let request = ChatRequest {
        parent: ctx.parent().to_string(),
        messages: vec![ChatMessage::user(outgoing)],
        conversation_reference: ConversationReference {
            conversation: conversation.name.clone(),
            data_agent_context: DataAgentContext {
                data_agent: agent.name.clone(),
                credentials,
            },
        },
    };

    info!(
        agent = %agent.name,
        conversation = %conversation.name,
        guardrail = options.guardrail,
        "sending message"
    );

    let mut stream = match ctx.api.chat(request).await {
        Ok(s) => s,
        Err(e) => {
            ctx.mark_redraw();
            return Err(e);
        }
    };

    let mut received = 0usize;
    while let Some(item) = stream.next().await {
        match item {
            Ok(message) => {
                if let ChatMessage::System(fragment) = &message {
                    debug!(kind = fragment.kind(), "fragment received");
                }
                sink(render_message(&message, row_limit, &mut ctx.last_result));
                ctx.messages.push(message);
                received += 1;
            }
            Err(e) => {
                warn!(error = %e, received, "chat stream failed");
                ctx.mark_redraw();
                return Err(e);
            }
        }
    }

    debug!(received, "chat stream complete");
    ctx.mark_redraw();
    Ok(received)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BigQueryTableReference, DatasourceReferences, LookerExploreReference};

    fn agent_with(refs: DatasourceReferences) -> DataAgent {
        let mut agent = DataAgent::default();
        agent.data_analytics_agent.published_context.datasource_references = refs;
        agent
    }

    #[test]
    fn test_guardrail_rules_before_question() {
        let out = apply_guardrail("Be concise", "How many users?");
        assert_eq!(out, "[Rules]\nBe concise\n\n[Question]\nHow many users?");
        let rules = out.find("Be concise").unwrap();
        let question = out.find("How many users?").unwrap();
        assert!(rules < question);
    }

    #[test]
    fn test_guardrail_without_instruction() {
        assert_eq!(apply_guardrail("  \n", "q"), "q");
    }

    #[test]
    fn test_looker_detection() {
        let looker = agent_with(DatasourceReferences::looker(LookerExploreReference {
            looker_instance_uri: "https://looker.example.com".into(),
            lookml_model: "m".into(),
            explore: "e".into(),
        }));
        assert!(is_looker_agent(&looker));

        let bq = agent_with(DatasourceReferences::bigquery(vec![BigQueryTableReference {
            project_id: "p".into(),
            dataset_id: "d".into(),
            table_id: "t".into(),
        }]));
        assert!(!is_looker_agent(&bq));
        assert!(!is_looker_agent(&DataAgent::default()));
    }

    #[test]
    fn test_looker_credentials_require_both_values() {
        let mut config = AppConfig::default();
        config.looker.client_id = Some("id".into());
        assert!(matches!(
            looker_credentials(&config),
            Err(BunsekiError::NotConfigured(_))
        ));
        config.looker.client_secret = Some("secret".into());
        assert!(looker_credentials(&config).is_ok());
    }
}
