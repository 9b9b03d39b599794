//! Agent administration: form state and create / update / delete.
//!
//! Mutations are long-running operations on the remote side. Single
//! create / update / delete calls are issued and not awaited; every
//! successful one refreshes the cached agent list. Rebuild waits for its
//! operations to finish.

use std::time::{Duration, Instant};

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{BunsekiError, Result};
use crate::session::SessionContext;
use crate::templates::TemplateConfig;
use crate::types::{
    BigQueryTableReference, Context, Conversation, DataAgent, DataAnalyticsAgent,
    DatasourceReferences, LookerExploreReference, Operation,
};

// ── Table rows ────────────────────────────────────────────────────

/// One editable BigQuery table row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TableRow {
    pub project_id: String,
    pub dataset_id: String,
    pub table_id: String,
}

impl TableRow {
    pub fn is_complete(&self) -> bool {
        !self.project_id.trim().is_empty()
            && !self.dataset_id.trim().is_empty()
            && !self.table_id.trim().is_empty()
    }

    fn to_reference(&self) -> BigQueryTableReference {
        BigQueryTableReference {
            project_id: self.project_id.trim().to_string(),
            dataset_id: self.dataset_id.trim().to_string(),
            table_id: self.table_id.trim().to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableField {
    Project,
    Dataset,
    Table,
}

/// Multi-table editor state. Always holds at least one row.
#[derive(Debug, Clone, PartialEq)]
pub struct TableRows {
    rows: Vec<TableRow>,
}

impl Default for TableRows {
    fn default() -> Self {
        Self {
            rows: vec![TableRow::default()],
        }
    }
}

impl TableRows {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self) -> &[TableRow] {
        &self.rows
    }

    pub fn add_row(&mut self) {
        self.rows.push(TableRow::default());
    }

    /// Remove row `index`. The first row cannot be removed.
    pub fn remove_row(&mut self, index: usize) -> bool {
        if index == 0 || index >= self.rows.len() {
            return false;
        }
        self.rows.remove(index);
        true
    }

    pub fn set(&mut self, index: usize, field: TableField, value: impl Into<String>) -> bool {
        let Some(row) = self.rows.get_mut(index) else {
            return false;
        };
        let value = value.into();
        match field {
            TableField::Project => row.project_id = value,
            TableField::Dataset => row.dataset_id = value,
            TableField::Table => row.table_id = value,
        }
        true
    }

    /// Replace all rows with the template's tables.
    pub fn apply_template(&mut self, template: &TemplateConfig) {
        self.rows = template
            .tables
            .iter()
            .map(|t| TableRow {
                project_id: t.project_id.clone(),
                dataset_id: t.dataset_id.clone(),
                table_id: t.table_id.clone(),
            })
            .collect();
        if self.rows.is_empty() {
            self.rows.push(TableRow::default());
        }
    }

    /// References for every complete row; incomplete rows are skipped.
    pub fn complete_references(&self) -> Vec<BigQueryTableReference> {
        self.rows
            .iter()
            .filter(|r| r.is_complete())
            .map(TableRow::to_reference)
            .collect()
    }
}

// ── Agent form ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum DataSourceForm {
    BigQuery(TableRows),
    Looker {
        instance_url: String,
        model: String,
        explore: String,
    },
}

impl Default for DataSourceForm {
    fn default() -> Self {
        DataSourceForm::BigQuery(TableRows::default())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AgentForm {
    pub display_name: String,
    pub description: String,
    pub system_instruction: String,
    pub data_source: DataSourceForm,
}

impl AgentForm {
    pub fn from_template(template: &TemplateConfig) -> Self {
        let mut rows = TableRows::new();
        rows.apply_template(template);
        Self {
            display_name: template.name.clone(),
            description: template.description.clone(),
            system_instruction: template.system_preamble.clone(),
            data_source: DataSourceForm::BigQuery(rows),
        }
    }

    /// Validate and build the agent body (without a resource name).
    pub fn to_agent(&self) -> Result<DataAgent> {
        let datasource_references = match &self.data_source {
            DataSourceForm::BigQuery(rows) => {
                let refs = rows.complete_references();
                if refs.is_empty() {
                    return Err(BunsekiError::Validation(
                        "at least one complete project / dataset / table row is required"
                            .into(),
                    ));
                }
                let skipped = rows.rows().len() - refs.len();
                if skipped > 0 {
                    debug!(skipped, "skipping incomplete table rows");
                }
                DatasourceReferences::bigquery(refs)
            }
            DataSourceForm::Looker {
                instance_url,
                model,
                explore,
            } => DatasourceReferences::looker(LookerExploreReference {
                looker_instance_uri: instance_url.clone(),
                lookml_model: model.clone(),
                explore: explore.clone(),
            }),
        };

        Ok(DataAgent {
            display_name: self.display_name.clone(),
            description: self.description.clone(),
            data_analytics_agent: DataAnalyticsAgent {
                published_context: Context {
                    system_instruction: self.system_instruction.clone(),
                    datasource_references,
                },
            },
            ..Default::default()
        })
    }
}

// ── Operations ────────────────────────────────────────────────────

/// Locally generated agent id. Ids may not start with a digit, hence the
/// prefix.
pub fn new_agent_id() -> String {
    format!("a{}", Uuid::new_v4())
}

/// Agents ordered by display label for listing.
pub fn sorted_agents(agents: &[DataAgent]) -> Vec<&DataAgent> {
    let mut sorted: Vec<&DataAgent> = agents.iter().collect();
    sorted.sort_by(|a, b| a.label().cmp(b.label()));
    sorted
}

/// Interval between polls of a long-running operation.
const OPERATION_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Give up waiting on an operation after this long.
const OPERATION_TIMEOUT: Duration = Duration::from_secs(300);

/// Validate the form, create the agent and refresh the cache. Returns the
/// agent as submitted, with its resource name filled in.
pub async fn create_agent(ctx: &mut SessionContext, form: &AgentForm) -> Result<DataAgent> {
    let (agent, _op) = submit_agent(ctx, form).await?;
    refresh_after_mutation(ctx).await;
    Ok(agent)
}

pub async fn create_agent_from_template(
    ctx: &mut SessionContext,
    template: &TemplateConfig,
) -> Result<DataAgent> {
    create_agent(ctx, &AgentForm::from_template(template)).await
}

/// Validate and send the create request without touching the cache.
async fn submit_agent(ctx: &SessionContext, form: &AgentForm) -> Result<(DataAgent, Operation)> {
    let mut agent = form.to_agent()?;
    let agent_id = new_agent_id();
    agent.name = format!("{}/dataAgents/{}", ctx.parent(), agent_id);

    let op = ctx
        .api
        .create_agent(ctx.parent(), &agent_id, &agent)
        .await?;
    info!(agent = %agent.name, operation = %op.name, "agent creation requested");
    Ok((agent, op))
}

/// Update the editable fields of `agent`, keeping its data sources.
pub async fn update_agent(
    ctx: &mut SessionContext,
    agent: &DataAgent,
    display_name: &str,
    description: &str,
    system_instruction: &str,
) -> Result<Operation> {
    let mut updated = agent.clone();
    updated.display_name = display_name.to_string();
    updated.description = description.to_string();
    updated
        .data_analytics_agent
        .published_context
        .system_instruction = system_instruction.to_string();

    let op = ctx.api.update_agent(&updated).await?;
    info!(agent = %agent.name, operation = %op.name, "agent update requested");

    refresh_after_mutation(ctx).await;
    Ok(op)
}

pub async fn delete_agent(ctx: &mut SessionContext, agent: &DataAgent) -> Result<Operation> {
    let op = ctx.api.delete_agent(&agent.name).await?;
    info!(agent = %agent.name, "agent deleted");

    refresh_after_mutation(ctx).await;
    Ok(op)
}

/// The mutation already went through; a failed refresh only leaves the
/// agent list empty until the next one.
async fn refresh_after_mutation(ctx: &mut SessionContext) {
    if let Err(e) = ctx.refresh_agents().await {
        warn!(error = %e, "agent refresh after mutation failed");
    }
}

/// Poll `op` until the remote marks it done. An operation without a name has
/// nothing to wait for.
pub async fn wait_for_operation(ctx: &SessionContext, mut op: Operation) -> Result<Operation> {
    let start = Instant::now();
    loop {
        if op.done || op.name.is_empty() {
            if let Some(error) = &op.error {
                let message = error
                    .get("message")
                    .and_then(|m| m.as_str())
                    .map(str::to_string)
                    .unwrap_or_else(|| error.to_string());
                return Err(BunsekiError::Operation {
                    name: op.name,
                    message,
                });
            }
            return Ok(op);
        }
        if start.elapsed() > OPERATION_TIMEOUT {
            return Err(BunsekiError::Operation {
                name: op.name,
                message: format!("not done after {}s", OPERATION_TIMEOUT.as_secs()),
            });
        }

        let name = op.name.clone();
        op = ctx.api.get_operation(&name).await?;
        if !op.done {
            debug!(operation = %name, "operation still running");
            tokio::time::sleep(OPERATION_POLL_INTERVAL).await;
        }
    }
}

/// Replace every cached agent with a fresh one built from `template`, then
/// start a new conversation with it. Deletes and the create are awaited to
/// completion before the new agent is selected.
pub async fn rebuild_from_template(
    ctx: &mut SessionContext,
    template: &TemplateConfig,
) -> Result<Conversation> {
    let old: Vec<String> = ctx.agents.iter().map(|a| a.name.clone()).collect();
    for name in &old {
        let op = ctx.api.delete_agent(name).await?;
        wait_for_operation(ctx, op).await?;
        debug!(agent = %name, "deleted during rebuild");
    }

    let (created, op) = submit_agent(ctx, &AgentForm::from_template(template)).await?;
    wait_for_operation(ctx, op).await?;
    refresh_after_mutation(ctx).await;

    // Prefer the listed copy; the submitted one carries the same name.
    let agent = match ctx.agents.iter().find(|a| a.name == created.name) {
        Some(listed) => listed.clone(),
        None => {
            warn!(agent = %created.name, "rebuilt agent not listed yet");
            created
        }
    };

    ctx.current_agent = Some(agent.clone());
    ctx.conversations.clear();
    ctx.messages.clear();
    ctx.current_conversation = None;
    ctx.last_result = None;
    ctx.mark_redraw();

    let conversation = ctx.create_conversation(&agent).await?;
    ctx.current_conversation = Some(conversation.clone());
    info!(agents_removed = old.len(), agent = %agent.name, "agent rebuilt from template");
    Ok(conversation)
}
