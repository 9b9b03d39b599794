//! Wire types for the data analytics agent API.
//!
//! Field names follow the REST (camelCase JSON) representation. Everything
//! here is owned by the remote service; the local process only caches it.
//! Streamed system messages are decoded into the [`Fragment`] enum so that
//! rendering is an exhaustive match instead of a key probe.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

// ── Agents ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataAgent {
    /// `projects/{p}/locations/global/dataAgents/{id}`
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_time: Option<DateTime<Utc>>,
    #[serde(default)]
    pub data_analytics_agent: DataAnalyticsAgent,
}

impl DataAgent {
    /// Trailing id segment of the resource name.
    pub fn id(&self) -> &str {
        self.name.rsplit('/').next().unwrap_or(&self.name)
    }

    /// Display name, or the resource id when the display name is blank.
    pub fn label(&self) -> &str {
        if self.display_name.is_empty() {
            self.id()
        } else {
            &self.display_name
        }
    }

    pub fn context(&self) -> &Context {
        &self.data_analytics_agent.published_context
    }

    pub fn system_instruction(&self) -> &str {
        &self.context().system_instruction
    }

    pub fn datasource_references(&self) -> &DatasourceReferences {
        &self.context().datasource_references
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataAnalyticsAgent {
    #[serde(default)]
    pub published_context: Context,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Context {
    #[serde(default)]
    pub system_instruction: String,
    #[serde(default)]
    pub datasource_references: DatasourceReferences,
}

/// At most one of `bq` / `looker` is set on a well-formed agent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasourceReferences {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bq: Option<BigQueryTableReferences>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub looker: Option<LookerExploreReferences>,
}

impl DatasourceReferences {
    pub fn bigquery(tables: Vec<BigQueryTableReference>) -> Self {
        Self {
            bq: Some(BigQueryTableReferences {
                table_references: tables,
            }),
            looker: None,
        }
    }

    pub fn looker(explore: LookerExploreReference) -> Self {
        Self {
            bq: None,
            looker: Some(LookerExploreReferences {
                explore_references: vec![explore],
            }),
        }
    }
}

impl fmt::Display for DatasourceReferences {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut wrote = false;
        if let Some(bq) = &self.bq {
            for t in &bq.table_references {
                writeln!(f, "bigquery: {}", t)?;
                wrote = true;
            }
        }
        if let Some(looker) = &self.looker {
            for e in &looker.explore_references {
                writeln!(f, "looker: {}", e)?;
                wrote = true;
            }
        }
        if !wrote {
            write!(f, "(no data source)")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BigQueryTableReferences {
    #[serde(default)]
    pub table_references: Vec<BigQueryTableReference>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BigQueryTableReference {
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub dataset_id: String,
    #[serde(default)]
    pub table_id: String,
}

impl fmt::Display for BigQueryTableReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.project_id, self.dataset_id, self.table_id)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LookerExploreReferences {
    #[serde(default)]
    pub explore_references: Vec<LookerExploreReference>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LookerExploreReference {
    #[serde(default)]
    pub looker_instance_uri: String,
    #[serde(default)]
    pub lookml_model: String,
    #[serde(default)]
    pub explore: String,
}

impl fmt::Display for LookerExploreReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "lookmlModel: {}, explore: {}, lookerInstanceUri: {}",
            self.lookml_model, self.explore, self.looker_instance_uri
        )
    }
}

/// Long-running operation handle returned by agent mutations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub done: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

// ── Conversations ─────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default)]
    pub agents: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_used_time: Option<DateTime<Utc>>,
}

impl Conversation {
    pub fn for_agent(agent_name: &str) -> Self {
        Self {
            agents: vec![agent_name.to_string()],
            ..Default::default()
        }
    }

    /// The owning agent (first entry of `agents`).
    pub fn owner(&self) -> Option<&str> {
        self.agents.first().map(String::as_str)
    }
}

// ── Chat request ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    /// Carried in the URL, not the body.
    #[serde(skip)]
    pub parent: String,
    pub messages: Vec<ChatMessage>,
    pub conversation_reference: ConversationReference,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationReference {
    pub conversation: String,
    pub data_agent_context: DataAgentContext,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DataAgentContext {
    pub data_agent: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credentials: Option<Credentials>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Credentials {
    pub oauth: OAuthCredentials,
}

#[derive(Debug, Clone, Serialize)]
pub struct OAuthCredentials {
    pub secret: OAuthSecret,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OAuthSecret {
    pub client_id: String,
    pub client_secret: String,
}

impl Credentials {
    pub fn oauth_secret(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self {
            oauth: OAuthCredentials {
                secret: OAuthSecret {
                    client_id: client_id.into(),
                    client_secret: client_secret.into(),
                },
            },
        }
    }
}

// ── Messages ──────────────────────────────────────────────────────

/// A message in a conversation, either typed by the user or streamed back
/// by the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "WireMessage", into = "WireMessage")]
pub enum ChatMessage {
    User { text: String },
    System(Fragment),
}

impl ChatMessage {
    pub fn user(text: impl Into<String>) -> Self {
        ChatMessage::User { text: text.into() }
    }

    pub fn is_user(&self) -> bool {
        matches!(self, ChatMessage::User { .. })
    }
}

/// Raw JSON shape of a message: exactly one of the two fields is present.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    user_message: Option<UserMessage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    system_message: Option<Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserMessage {
    #[serde(default)]
    text: String,
}

impl From<WireMessage> for ChatMessage {
    fn from(wire: WireMessage) -> Self {
        match (wire.user_message, wire.system_message) {
            (Some(user), _) => ChatMessage::User { text: user.text },
            (None, Some(system)) => ChatMessage::System(Fragment::from_value(system)),
            (None, None) => ChatMessage::System(Fragment::Unknown(Value::Null)),
        }
    }
}

impl From<ChatMessage> for WireMessage {
    fn from(msg: ChatMessage) -> Self {
        match msg {
            ChatMessage::User { text } => WireMessage {
                user_message: Some(UserMessage { text }),
                system_message: None,
            },
            ChatMessage::System(fragment) => WireMessage {
                user_message: None,
                system_message: Some(fragment.into_value()),
            },
        }
    }
}

/// One streamed unit of a chat response.
#[derive(Debug, Clone, PartialEq)]
pub enum Fragment {
    Text(TextMessage),
    Schema(SchemaMessage),
    Data(DataMessage),
    Chart(ChartMessage),
    /// Payload with none of the known kinds (or one that failed to decode).
    Unknown(Value),
}

impl Fragment {
    /// Decode a `systemMessage` object by probing its kind key.
    pub fn from_value(value: Value) -> Self {
        fn decode<T: serde::de::DeserializeOwned>(
            value: &Value,
            key: &str,
        ) -> Option<Result<T, serde_json::Error>> {
            value
                .get(key)
                .map(|inner| serde_json::from_value::<T>(inner.clone()))
        }

        let decoded = if let Some(r) = decode::<TextMessage>(&value, "text") {
            r.map(Fragment::Text)
        } else if let Some(r) = decode::<SchemaMessage>(&value, "schema") {
            r.map(Fragment::Schema)
        } else if let Some(r) = decode::<DataMessage>(&value, "data") {
            r.map(Fragment::Data)
        } else if let Some(r) = decode::<ChartMessage>(&value, "chart") {
            r.map(Fragment::Chart)
        } else {
            return Fragment::Unknown(value);
        };

        match decoded {
            Ok(fragment) => fragment,
            Err(e) => {
                tracing::debug!(error = %e, "failed to decode system message");
                Fragment::Unknown(value)
            }
        }
    }

    pub fn into_value(self) -> Value {
        match self {
            Fragment::Text(t) => json!({ "text": t }),
            Fragment::Schema(s) => json!({ "schema": s }),
            Fragment::Data(d) => json!({ "data": d }),
            Fragment::Chart(c) => json!({ "chart": c }),
            Fragment::Unknown(v) => v,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Fragment::Text(_) => "text",
            Fragment::Schema(_) => "schema",
            Fragment::Data(_) => "data",
            Fragment::Chart(_) => "chart",
            Fragment::Unknown(_) => "unknown",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TextMessage {
    #[serde(default)]
    pub parts: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<SchemaQuery>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<SchemaResult>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaQuery {
    #[serde(default)]
    pub question: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaResult {
    #[serde(default)]
    pub datasources: Vec<Datasource>,
}

/// A resolved data source: one of the three reference kinds plus its schema.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Datasource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub studio_datasource_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub looker_explore_reference: Option<LookerExploreReference>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bigquery_table_reference: Option<BigQueryTableReference>,
    #[serde(default)]
    pub schema: Schema,
}

impl Datasource {
    /// Identifying descriptor, checked in Studio → Looker → BigQuery order.
    pub fn descriptor(&self) -> String {
        if let Some(id) = &self.studio_datasource_id {
            id.clone()
        } else if let Some(looker) = &self.looker_explore_reference {
            looker.to_string()
        } else if let Some(bq) = &self.bigquery_table_reference {
            bq.to_string()
        } else {
            String::new()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Schema {
    #[serde(default)]
    pub fields: Vec<Field>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Field {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub field_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub mode: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<DataQuery>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub generated_sql: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<DataResult>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataQuery {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub question: String,
    #[serde(default)]
    pub datasources: Vec<Datasource>,
}

/// Rows come back as JSON objects keyed by field name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataResult {
    #[serde(default)]
    pub schema: Schema,
    #[serde(default)]
    pub data: Vec<serde_json::Map<String, Value>>,
}

impl DataResult {
    pub fn column_names(&self) -> Vec<String> {
        self.schema.fields.iter().map(|f| f.name.clone()).collect()
    }

    pub fn row_count(&self) -> usize {
        self.data.len()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChartMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<ChartQuery>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<ChartResult>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChartQuery {
    #[serde(default)]
    pub instructions: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartResult {
    #[serde(default)]
    pub vega_config: Value,
}
