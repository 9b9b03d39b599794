use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde_json::json;

use bunseki_core::admin::{self, AgentForm, DataSourceForm, TableField, TableRows};
use bunseki_core::api::{AnalyticsApi, MessageStream};
use bunseki_core::chat::{self, ChatOptions};
use bunseki_core::render::Block;
use bunseki_core::templates::TemplateLoader;
use bunseki_core::{
    AppConfig, BigQueryTableReference, BunsekiError, ChatMessage, ChatRequest, Conversation,
    DataAgent, DatasourceReferences, Fragment, LookerExploreReference, Operation, Result,
    SessionContext, TextMessage,
};

const PARENT: &str = "projects/test-project/locations/global";

// ── Fake remote ───────────────────────────────────────────────────

#[derive(Default)]
struct FakeState {
    agents: Vec<DataAgent>,
    conversations: Vec<Conversation>,
    /// Newest first, like the remote.
    messages: Vec<ChatMessage>,
    /// Items streamed back by the next chat call.
    chat_reply: Vec<Result<ChatMessage>>,
    fail_list_agents: bool,
    fail_list_conversations: bool,
    fail_list_messages: bool,
    fail_create_conversation: bool,
    /// Deletes and creates stay pending until their operation is polled.
    defer_mutations: bool,
    /// Polled operations finish with an error.
    fail_operations: bool,
    pending: Vec<(String, Pending)>,
    calls: Vec<String>,
    chat_requests: Vec<serde_json::Value>,
    next_conversation: VecDeque<String>,
}

enum Pending {
    Create(DataAgent),
    Delete(String),
}

#[derive(Default, Clone)]
struct FakeApi {
    state: Arc<Mutex<FakeState>>,
}

impl FakeApi {
    fn with<R>(&self, f: impl FnOnce(&mut FakeState) -> R) -> R {
        f(&mut self.state.lock().unwrap())
    }

    fn calls(&self) -> Vec<String> {
        self.with(|s| s.calls.clone())
    }
}

fn api_error() -> BunsekiError {
    BunsekiError::Api {
        status: 503,
        body: "unavailable".into(),
    }
}

#[async_trait]
impl AnalyticsApi for FakeApi {
    async fn list_agents(&self, _parent: &str) -> Result<Vec<DataAgent>> {
        self.with(|s| {
            s.calls.push("list_agents".into());
            if s.fail_list_agents {
                return Err(api_error());
            }
            Ok(s.agents.clone())
        })
    }

    async fn create_agent(
        &self,
        _parent: &str,
        agent_id: &str,
        agent: &DataAgent,
    ) -> Result<Operation> {
        self.with(|s| {
            s.calls.push(format!("create_agent:{}", agent_id));
            let name = format!("{}/operations/create-{}", PARENT, agent_id);
            if s.defer_mutations {
                s.pending.push((name.clone(), Pending::Create(agent.clone())));
            } else {
                s.agents.push(agent.clone());
            }
            Ok(Operation {
                name,
                done: !s.defer_mutations,
                ..Default::default()
            })
        })
    }

    async fn update_agent(&self, agent: &DataAgent) -> Result<Operation> {
        self.with(|s| {
            s.calls.push(format!("update_agent:{}", agent.name));
            if let Some(existing) = s.agents.iter_mut().find(|a| a.name == agent.name) {
                *existing = agent.clone();
            }
            Ok(Operation::default())
        })
    }

    async fn delete_agent(&self, name: &str) -> Result<Operation> {
        self.with(|s| {
            s.calls.push(format!("delete_agent:{}", name));
            if !s.defer_mutations {
                s.agents.retain(|a| a.name != name);
                return Ok(Operation::default());
            }
            let op_name = format!("{}/operations/delete-{}", PARENT, s.pending.len());
            s.pending.push((op_name.clone(), Pending::Delete(name.to_string())));
            Ok(Operation {
                name: op_name,
                ..Default::default()
            })
        })
    }

    async fn get_operation(&self, name: &str) -> Result<Operation> {
        self.with(|s| {
            s.calls.push(format!("get_operation:{}", name));
            if s.fail_operations {
                return Ok(Operation {
                    name: name.to_string(),
                    done: true,
                    error: Some(json!({ "code": 9, "message": "agent is in use" })),
                });
            }
            if let Some(i) = s.pending.iter().position(|(op, _)| op == name) {
                match s.pending.remove(i).1 {
                    Pending::Create(agent) => s.agents.push(agent),
                    Pending::Delete(agent) => s.agents.retain(|a| a.name != agent),
                }
            }
            Ok(Operation {
                name: name.to_string(),
                done: true,
                ..Default::default()
            })
        })
    }

    async fn list_conversations(&self, _parent: &str, page_size: u32) -> Result<Vec<Conversation>> {
        self.with(|s| {
            s.calls.push(format!("list_conversations:{}", page_size));
            if s.fail_list_conversations {
                return Err(api_error());
            }
            Ok(s.conversations.clone())
        })
    }

    async fn create_conversation(
        &self,
        _parent: &str,
        conversation: &Conversation,
    ) -> Result<Conversation> {
        self.with(|s| {
            s.calls.push("create_conversation".into());
            if s.fail_create_conversation {
                return Err(api_error());
            }
            let id = s
                .next_conversation
                .pop_front()
                .unwrap_or_else(|| format!("c{}", s.conversations.len()));
            let created = Conversation {
                name: format!("{}/conversations/{}", PARENT, id),
                agents: conversation.agents.clone(),
                ..Default::default()
            };
            s.conversations.insert(0, created.clone());
            Ok(created)
        })
    }

    async fn list_messages(&self, conversation: &str) -> Result<Vec<ChatMessage>> {
        self.with(|s| {
            s.calls.push(format!("list_messages:{}", conversation));
            if s.fail_list_messages {
                return Err(api_error());
            }
            Ok(s.messages.clone())
        })
    }

    async fn chat(&self, request: ChatRequest) -> Result<MessageStream> {
        let reply = self.with(|s| {
            s.calls.push("chat".into());
            s.chat_requests
                .push(serde_json::to_value(&request).expect("request serializes"));
            std::mem::take(&mut s.chat_reply)
        });
        Ok(stream::iter(reply).boxed())
    }
}

// ── Helpers ───────────────────────────────────────────────────────

fn config() -> AppConfig {
    AppConfig {
        project_id: Some("test-project".into()),
        auto_provision: false,
        ..Default::default()
    }
}

fn bq_agent(id: &str, instruction: &str) -> DataAgent {
    let mut agent = DataAgent {
        name: format!("{}/dataAgents/{}", PARENT, id),
        display_name: id.to_uppercase(),
        ..Default::default()
    };
    let ctx = &mut agent.data_analytics_agent.published_context;
    ctx.system_instruction = instruction.into();
    ctx.datasource_references = DatasourceReferences::bigquery(vec![BigQueryTableReference {
        project_id: "p".into(),
        dataset_id: "d".into(),
        table_id: "t".into(),
    }]);
    agent
}

fn conversation(id: &str, agent: &DataAgent) -> Conversation {
    Conversation {
        name: format!("{}/conversations/{}", PARENT, id),
        agents: vec![agent.name.clone()],
        ..Default::default()
    }
}

fn text(s: &str) -> ChatMessage {
    ChatMessage::System(Fragment::Text(TextMessage {
        parts: vec![s.to_string()],
    }))
}

fn session(api: &FakeApi, config: AppConfig) -> SessionContext {
    SessionContext::new(Arc::new(api.clone()), config).unwrap()
}

// ── Session cache ─────────────────────────────────────────────────

#[tokio::test]
async fn test_initialize_selects_last_agent_and_first_conversation() {
    let api = FakeApi::default();
    let a = bq_agent("alpha", "");
    let b = bq_agent("beta", "");
    api.with(|s| {
        s.agents = vec![a.clone(), b.clone()];
        s.conversations = vec![
            conversation("c-new", &b),
            conversation("c-other", &a),
            conversation("c-old", &b),
        ];
        s.messages = vec![text("newest"), ChatMessage::user("oldest")];
    });

    let mut ctx = session(&api, config());
    let errors = ctx.initialize().await;
    assert!(errors.is_empty());

    assert_eq!(ctx.current_agent().unwrap().name, b.name);
    let names: Vec<&str> = ctx.conversations().iter().map(|c| c.name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            format!("{}/conversations/c-new", PARENT),
            format!("{}/conversations/c-old", PARENT)
        ]
    );
    assert_eq!(ctx.current_conversation().unwrap().name, names[0]);
    // Reversed into chronological order.
    assert_eq!(ctx.messages()[0], ChatMessage::user("oldest"));
    assert_eq!(ctx.messages()[1], text("newest"));
    assert!(api.calls().contains(&"list_conversations:100".to_string()));
    assert!(ctx.take_redraw());
    assert!(!ctx.take_redraw());
}

#[tokio::test]
async fn test_initialize_continues_after_failures() {
    let api = FakeApi::default();
    api.with(|s| s.fail_list_agents = true);

    let mut ctx = session(&api, config());
    let errors = ctx.initialize().await;
    assert_eq!(errors.len(), 1);
    assert!(ctx.agents().is_empty());
    assert!(ctx.current_agent().is_none());
    assert!(ctx.current_conversation().is_none());
}

#[tokio::test]
async fn test_failed_refresh_leaves_collection_empty() {
    let api = FakeApi::default();
    let a = bq_agent("alpha", "");
    api.with(|s| {
        s.agents = vec![a.clone()];
        s.conversations = vec![conversation("c1", &a)];
    });

    let mut ctx = session(&api, config());
    ctx.refresh_agents().await.unwrap();
    ctx.refresh_conversations(&a).await.unwrap();
    assert_eq!(ctx.agents().len(), 1);
    assert_eq!(ctx.conversations().len(), 1);

    api.with(|s| {
        s.fail_list_agents = true;
        s.fail_list_conversations = true;
    });
    assert!(ctx.refresh_agents().await.is_err());
    assert!(ctx.agents().is_empty());
    assert!(ctx.refresh_conversations(&a).await.is_err());
    assert!(ctx.conversations().is_empty());
}

#[tokio::test]
async fn test_failed_message_refresh_clears_messages() {
    let api = FakeApi::default();
    let a = bq_agent("alpha", "");
    let c = conversation("c1", &a);
    api.with(|s| s.messages = vec![text("x")]);

    let mut ctx = session(&api, config());
    ctx.refresh_messages(&c).await.unwrap();
    assert_eq!(ctx.messages().len(), 1);

    api.with(|s| s.fail_list_messages = true);
    assert!(ctx.refresh_messages(&c).await.is_err());
    assert!(ctx.messages().is_empty());
}

#[tokio::test]
async fn test_create_conversation_prepends_or_preserves() {
    let api = FakeApi::default();
    let a = bq_agent("alpha", "");
    api.with(|s| {
        s.conversations = vec![conversation("c-old", &a)];
        s.next_conversation.push_back("c-new".into());
    });

    let mut ctx = session(&api, config());
    ctx.refresh_conversations(&a).await.unwrap();
    let created = ctx.create_conversation(&a).await.unwrap();
    assert_eq!(ctx.conversations()[0], created);
    assert_eq!(ctx.conversations().len(), 2);

    api.with(|s| s.fail_create_conversation = true);
    let before = ctx.conversations().to_vec();
    assert!(ctx.create_conversation(&a).await.is_err());
    assert_eq!(ctx.conversations(), before.as_slice());
}

#[tokio::test]
async fn test_select_agent_loads_its_conversations() {
    let api = FakeApi::default();
    let a = bq_agent("alpha", "");
    let b = bq_agent("beta", "");
    api.with(|s| {
        s.agents = vec![a.clone(), b.clone()];
        s.conversations = vec![conversation("ca", &a), conversation("cb", &b)];
    });

    let mut ctx = session(&api, config());
    ctx.initialize().await;
    assert_eq!(ctx.current_agent().unwrap().name, b.name);

    ctx.select_agent(&a.name).await.unwrap();
    assert_eq!(ctx.current_agent().unwrap().name, a.name);
    assert_eq!(ctx.conversations().len(), 1);
    assert!(ctx.current_conversation().unwrap().name.ends_with("/ca"));

    assert!(matches!(
        ctx.select_agent("projects/x/nope").await,
        Err(BunsekiError::Validation(_))
    ));
}

#[tokio::test]
async fn test_refresh_drops_vanished_agent() {
    let api = FakeApi::default();
    let a = bq_agent("alpha", "");
    let b = bq_agent("beta", "");
    api.with(|s| {
        s.agents = vec![a.clone(), b.clone()];
        s.conversations = vec![conversation("cb", &b)];
        s.messages = vec![text("hello")];
    });

    let mut ctx = session(&api, config());
    ctx.initialize().await;
    assert_eq!(ctx.current_agent().unwrap().name, b.name);
    assert_eq!(ctx.messages().len(), 1);

    // Removed behind our back.
    api.with(|s| s.agents.retain(|x| x.name != b.name));
    ctx.refresh_agents().await.unwrap();

    assert_eq!(ctx.agents().len(), 1);
    assert!(ctx.current_agent().is_none());
    assert!(ctx.current_conversation().is_none());
    assert!(ctx.conversations().is_empty());
    assert!(ctx.messages().is_empty());

    let err = chat::send_message(&mut ctx, "q", &ChatOptions::default(), |_| {})
        .await
        .unwrap_err();
    assert!(matches!(err, BunsekiError::NoAgentSelected));
    assert!(!api.calls().contains(&"chat".to_string()));
}

#[tokio::test]
async fn test_refresh_keeps_selection_pointing_at_fresh_copy() {
    let api = FakeApi::default();
    let a = bq_agent("alpha", "old rules");
    api.with(|s| {
        s.agents = vec![a.clone()];
        s.conversations = vec![conversation("ca", &a)];
    });

    let mut ctx = session(&api, config());
    ctx.initialize().await;
    api.with(|s| s.agents = vec![bq_agent("alpha", "new rules")]);
    ctx.refresh_agents().await.unwrap();

    assert_eq!(ctx.current_agent().unwrap().system_instruction(), "new rules");
    assert_eq!(ctx.conversations().len(), 1);
}

#[tokio::test]
async fn test_initialize_auto_provisions_from_template() {
    let tmp = tempfile::TempDir::new().unwrap();
    std::fs::write(
        tmp.path().join("default.yaml"),
        "name: Default\nsystem_preamble: Answer briefly.\ntables:\n  - project_id: p\n    dataset_id: d\n    table_id: t\n",
    )
    .unwrap();

    let api = FakeApi::default();
    let mut cfg = config();
    cfg.auto_provision = true;
    cfg.templates_dir = tmp.path().to_path_buf();

    let mut ctx = session(&api, cfg);
    let errors = ctx.initialize().await;
    assert!(errors.is_empty());
    assert_eq!(ctx.agents().len(), 1);
    let agent = ctx.current_agent().unwrap();
    assert_eq!(agent.display_name, "Default");
    assert_eq!(agent.system_instruction(), "Answer briefly.");
    assert!(agent.id().starts_with('a'));
}

// ── Agent admin ───────────────────────────────────────────────────

#[tokio::test]
async fn test_create_agent_rejects_incomplete_tables_before_remote_call() {
    let api = FakeApi::default();
    let mut ctx = session(&api, config());

    let mut rows = TableRows::new();
    rows.set(0, TableField::Project, "p");
    rows.set(0, TableField::Dataset, "d");
    let form = AgentForm {
        display_name: "Incomplete".into(),
        data_source: DataSourceForm::BigQuery(rows),
        ..Default::default()
    };

    let err = admin::create_agent(&mut ctx, &form).await.unwrap_err();
    assert!(matches!(err, BunsekiError::Validation(_)));
    assert!(api.calls().is_empty());
}

#[tokio::test]
async fn test_create_agent_skips_incomplete_rows_and_refreshes() {
    let api = FakeApi::default();
    let mut ctx = session(&api, config());

    let mut rows = TableRows::new();
    rows.set(0, TableField::Project, "p");
    rows.set(0, TableField::Dataset, "d");
    rows.set(0, TableField::Table, "t");
    rows.add_row();
    rows.set(1, TableField::Table, "orphan");
    let form = AgentForm {
        display_name: "Sales".into(),
        data_source: DataSourceForm::BigQuery(rows),
        ..Default::default()
    };

    let created = admin::create_agent(&mut ctx, &form).await.unwrap();
    assert!(created.name.starts_with(&format!("{}/dataAgents/a", PARENT)));
    let calls = api.calls();
    assert!(calls[0].starts_with("create_agent:a"));
    assert_eq!(calls[1], "list_agents");

    assert_eq!(ctx.agents().len(), 1);
    let bq = ctx.agents()[0].datasource_references().bq.clone().unwrap();
    assert_eq!(bq.table_references.len(), 1);
}

#[tokio::test]
async fn test_update_agent_preserves_data_sources() {
    let api = FakeApi::default();
    let a = bq_agent("alpha", "old");
    api.with(|s| s.agents = vec![a.clone()]);

    let mut ctx = session(&api, config());
    ctx.refresh_agents().await.unwrap();
    admin::update_agent(&mut ctx, &a, "Renamed", "new desc", "new rules")
        .await
        .unwrap();

    let updated = &ctx.agents()[0];
    assert_eq!(updated.display_name, "Renamed");
    assert_eq!(updated.description, "new desc");
    assert_eq!(updated.system_instruction(), "new rules");
    assert_eq!(updated.datasource_references(), a.datasource_references());
}

#[tokio::test]
async fn test_delete_agent_refreshes() {
    let api = FakeApi::default();
    let a = bq_agent("alpha", "");
    let b = bq_agent("beta", "");
    api.with(|s| s.agents = vec![a.clone(), b.clone()]);

    let mut ctx = session(&api, config());
    ctx.refresh_agents().await.unwrap();
    admin::delete_agent(&mut ctx, &a).await.unwrap();
    assert_eq!(ctx.agents().len(), 1);
    assert_eq!(ctx.agents()[0].name, b.name);
}

#[tokio::test]
async fn test_deleting_current_agent_clears_selection() {
    let api = FakeApi::default();
    let a = bq_agent("alpha", "");
    let b = bq_agent("beta", "");
    api.with(|s| {
        s.agents = vec![a.clone(), b.clone()];
        s.conversations = vec![conversation("cb", &b)];
    });

    let mut ctx = session(&api, config());
    ctx.initialize().await;
    admin::delete_agent(&mut ctx, &b).await.unwrap();

    assert!(ctx.current_agent().is_none());
    assert!(ctx.conversations().is_empty());
}

#[tokio::test]
async fn test_mutation_succeeds_when_refresh_fails() {
    let api = FakeApi::default();
    let a = bq_agent("alpha", "old");
    api.with(|s| s.agents = vec![a.clone()]);

    let mut ctx = session(&api, config());
    ctx.refresh_agents().await.unwrap();
    api.with(|s| s.fail_list_agents = true);

    admin::update_agent(&mut ctx, &a, "Renamed", "", "old")
        .await
        .unwrap();
    assert_eq!(api.with(|s| s.agents[0].display_name.clone()), "Renamed");
    assert!(ctx.agents().is_empty());

    admin::delete_agent(&mut ctx, &a).await.unwrap();
    assert!(api.with(|s| s.agents.is_empty()));
}

fn sales_template(dir: &std::path::Path) -> bunseki_core::templates::TemplateConfig {
    std::fs::write(
        dir.join("sales.yaml"),
        "name: Sales\ntables:\n  - project_id: p\n    dataset_id: d\n    table_id: orders\n",
    )
    .unwrap();
    TemplateLoader::new(dir).load_template("sales.yaml").unwrap()
}

#[tokio::test]
async fn test_rebuild_waits_for_pending_operations() {
    let tmp = tempfile::TempDir::new().unwrap();
    let template = sales_template(tmp.path());

    let api = FakeApi::default();
    let a = bq_agent("alpha", "");
    let b = bq_agent("beta", "");
    api.with(|s| s.agents = vec![a.clone(), b.clone()]);

    let mut ctx = session(&api, config());
    ctx.initialize().await;
    api.with(|s| s.defer_mutations = true);

    let conversation = admin::rebuild_from_template(&mut ctx, &template)
        .await
        .unwrap();

    assert!(api.with(|s| s.pending.is_empty()));
    assert_eq!(ctx.agents().len(), 1);
    let agent = ctx.current_agent().unwrap();
    assert_eq!(agent.display_name, "Sales");
    assert_ne!(agent.name, a.name);
    assert_eq!(conversation.owner(), Some(agent.name.as_str()));

    // Every operation was polled before the final listing.
    let calls = api.calls();
    let last_list = calls.iter().rposition(|c| c == "list_agents").unwrap();
    let polls: Vec<usize> = calls
        .iter()
        .enumerate()
        .filter(|(_, c)| c.starts_with("get_operation:"))
        .map(|(i, _)| i)
        .collect();
    assert_eq!(polls.len(), 3);
    assert!(polls.iter().all(|i| *i < last_list));
}

#[tokio::test]
async fn test_rebuild_stops_on_failed_operation() {
    let tmp = tempfile::TempDir::new().unwrap();
    let template = sales_template(tmp.path());

    let api = FakeApi::default();
    let a = bq_agent("alpha", "");
    api.with(|s| s.agents = vec![a.clone()]);

    let mut ctx = session(&api, config());
    ctx.initialize().await;
    api.with(|s| {
        s.defer_mutations = true;
        s.fail_operations = true;
    });

    let err = admin::rebuild_from_template(&mut ctx, &template)
        .await
        .unwrap_err();
    match err {
        BunsekiError::Operation { message, .. } => assert_eq!(message, "agent is in use"),
        other => panic!("unexpected {:?}", other),
    }
    assert!(!api.calls().iter().any(|c| c.starts_with("create_agent")));
}

#[tokio::test]
async fn test_rebuild_from_template_replaces_agents() {
    let tmp = tempfile::TempDir::new().unwrap();
    let template = sales_template(tmp.path());

    let api = FakeApi::default();
    let a = bq_agent("alpha", "");
    let b = bq_agent("beta", "");
    api.with(|s| s.agents = vec![a.clone(), b.clone()]);

    let mut ctx = session(&api, config());
    ctx.initialize().await;
    let conversation = admin::rebuild_from_template(&mut ctx, &template)
        .await
        .unwrap();

    assert_eq!(ctx.agents().len(), 1);
    let agent = ctx.current_agent().unwrap();
    assert_eq!(agent.display_name, "Sales");
    assert_eq!(ctx.conversations(), &[conversation.clone()]);
    assert_eq!(conversation.owner(), Some(agent.name.as_str()));
    assert!(ctx.messages().is_empty());

    let calls = api.calls();
    assert!(calls.contains(&format!("delete_agent:{}", a.name)));
    assert!(calls.contains(&format!("delete_agent:{}", b.name)));
}

// ── Chat ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_send_without_agent_is_rejected() {
    let api = FakeApi::default();
    let mut ctx = session(&api, config());
    let err = chat::send_message(&mut ctx, "hi", &ChatOptions::default(), |_| {})
        .await
        .unwrap_err();
    assert!(matches!(err, BunsekiError::NoAgentSelected));
    assert!(api.calls().is_empty());
    assert!(ctx.messages().is_empty());
}

#[tokio::test]
async fn test_send_creates_conversation_and_applies_guardrail() {
    let api = FakeApi::default();
    let a = bq_agent("alpha", "Be concise");
    api.with(|s| {
        s.agents = vec![a.clone()];
        s.chat_reply = vec![Ok(text("42 users"))];
    });

    let mut ctx = session(&api, config());
    ctx.initialize().await;
    assert!(ctx.conversations().is_empty());

    let mut rendered = Vec::new();
    let received = chat::send_message(
        &mut ctx,
        "How many users?",
        &ChatOptions { guardrail: true },
        |blocks| rendered.extend(blocks),
    )
    .await
    .unwrap();

    assert_eq!(received, 1);
    assert_eq!(ctx.conversations().len(), 1);
    assert_eq!(
        ctx.current_conversation().unwrap().name,
        ctx.conversations()[0].name
    );

    // Cache holds the raw text; the wire carries the wrapped one.
    assert_eq!(ctx.messages()[0], ChatMessage::user("How many users?"));
    assert_eq!(ctx.messages()[1], text("42 users"));

    let sent = api.with(|s| s.chat_requests[0].clone());
    let wire_text = sent["messages"][0]["userMessage"]["text"].as_str().unwrap();
    assert!(wire_text.contains("Be concise") && wire_text.contains("How many users?"));
    assert!(wire_text.find("Be concise") < wire_text.find("How many users?"));
    assert_eq!(
        sent["conversationReference"]["dataAgentContext"]["dataAgent"],
        json!(a.name)
    );
    assert!(sent["conversationReference"]["dataAgentContext"]
        .get("credentials")
        .is_none());

    assert_eq!(
        rendered,
        vec![
            Block::UserText("How many users?".into()),
            Block::Markdown("42 users".into())
        ]
    );
    assert!(ctx.take_redraw());
}

#[tokio::test]
async fn test_send_without_guardrail_sends_raw_text() {
    let api = FakeApi::default();
    let a = bq_agent("alpha", "Be concise");
    api.with(|s| {
        s.agents = vec![a.clone()];
        s.conversations = vec![conversation("c1", &a)];
    });

    let mut ctx = session(&api, config());
    ctx.initialize().await;
    chat::send_message(&mut ctx, "q", &ChatOptions::default(), |_| {})
        .await
        .unwrap();

    let sent = api.with(|s| s.chat_requests[0].clone());
    assert_eq!(sent["messages"][0]["userMessage"]["text"], "q");
    assert!(!api.calls().contains(&"create_conversation".to_string()));
}

#[tokio::test]
async fn test_looker_agent_requires_credentials() {
    let api = FakeApi::default();
    let mut looker = bq_agent("looker", "");
    looker
        .data_analytics_agent
        .published_context
        .datasource_references = DatasourceReferences::looker(LookerExploreReference {
        looker_instance_uri: "https://looker.example.com".into(),
        lookml_model: "thelook".into(),
        explore: "orders".into(),
    });
    api.with(|s| {
        s.agents = vec![looker.clone()];
        s.conversations = vec![conversation("c1", &looker)];
    });

    let mut ctx = session(&api, config());
    ctx.initialize().await;
    let err = chat::send_message(&mut ctx, "q", &ChatOptions::default(), |_| {})
        .await
        .unwrap_err();
    assert!(matches!(err, BunsekiError::NotConfigured(_)));
    assert!(!api.calls().contains(&"chat".to_string()));

    let mut cfg = config();
    cfg.looker.client_id = Some("cid".into());
    cfg.looker.client_secret = Some("csecret".into());
    let mut ctx = session(&api, cfg);
    ctx.initialize().await;
    chat::send_message(&mut ctx, "q", &ChatOptions::default(), |_| {})
        .await
        .unwrap();

    let sent = api.with(|s| s.chat_requests[0].clone());
    let secret = &sent["conversationReference"]["dataAgentContext"]["credentials"]["oauth"]["secret"];
    assert_eq!(secret["clientId"], "cid");
    assert_eq!(secret["clientSecret"], "csecret");
}

#[tokio::test]
async fn test_stream_error_keeps_received_fragments() {
    let api = FakeApi::default();
    let a = bq_agent("alpha", "");
    api.with(|s| {
        s.agents = vec![a.clone()];
        s.conversations = vec![conversation("c1", &a)];
        s.chat_reply = vec![
            Ok(text("partial")),
            Err(BunsekiError::Parse("chat stream ended mid-element".into())),
            Ok(text("never seen")),
        ];
    });

    let mut ctx = session(&api, config());
    ctx.initialize().await;
    let err = chat::send_message(&mut ctx, "q", &ChatOptions::default(), |_| {})
        .await
        .unwrap_err();
    assert!(matches!(err, BunsekiError::Parse(_)));
    assert_eq!(ctx.messages().len(), 2);
    assert_eq!(ctx.messages()[1], text("partial"));
}

#[tokio::test]
async fn test_data_result_is_kept_in_full() {
    let api = FakeApi::default();
    let a = bq_agent("alpha", "");
    let rows: Vec<_> = (0..25).map(|i| json!({ "n": i })).collect();
    let data: ChatMessage = serde_json::from_value(json!({
        "systemMessage": { "data": { "result": {
            "schema": { "fields": [ { "name": "n", "type": "INTEGER" } ] },
            "data": rows
        } } }
    }))
    .unwrap();
    api.with(|s| {
        s.agents = vec![a.clone()];
        s.conversations = vec![conversation("c1", &a)];
        s.chat_reply = vec![Ok(data)];
    });

    let mut ctx = session(&api, config());
    ctx.initialize().await;
    let mut rendered = Vec::new();
    chat::send_message(&mut ctx, "q", &ChatOptions::default(), |b| {
        rendered.extend(b)
    })
    .await
    .unwrap();

    assert_eq!(ctx.last_result().unwrap().row_count(), 25);
    assert!(rendered
        .iter()
        .any(|b| matches!(b, Block::Notice(n) if n.contains("20 / 25"))));
}
