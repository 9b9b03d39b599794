//! Non-interactive `agents` and `templates` subcommands.

use anyhow::{bail, Context, Result};
use tracing::info;

use bunseki_core::admin::{self, sorted_agents, AgentForm, DataSourceForm, TableField, TableRows};
use bunseki_core::templates::{TemplateConfig, TemplateLoader};
use bunseki_core::{AppConfig, DataAgent, SessionContext};

use crate::cli::{AgentsCommand, CreateAgentArgs, TemplatesCommand};
use crate::terminal::Terminal;

pub async fn agents(ctx: &mut SessionContext, terminal: &Terminal, action: AgentsCommand) -> Result<()> {
    match action {
        AgentsCommand::List => {
            ctx.refresh_agents().await.context("failed to list agents")?;
            terminal.print_agents(&sorted_agents(ctx.agents()), None, true)?;
        }
        AgentsCommand::Create(args) => {
            let form = build_form(&ctx.templates(), &args)?;
            let agent = admin::create_agent(ctx, &form)
                .await
                .context("failed to create agent")?;
            terminal.print_info(&format!("Created agent {} ({})", agent.label(), agent.id()))?;
        }
        AgentsCommand::Update {
            agent,
            name,
            description,
            instruction,
        } => {
            ctx.refresh_agents().await.context("failed to list agents")?;
            let existing = find_agent(ctx, &agent)?;
            let display_name = name.unwrap_or_else(|| existing.display_name.clone());
            let description = description.unwrap_or_else(|| existing.description.clone());
            let instruction =
                instruction.unwrap_or_else(|| existing.system_instruction().to_string());
            admin::update_agent(ctx, &existing, &display_name, &description, &instruction)
                .await
                .context("failed to update agent")?;
            terminal.print_info(&format!("Update requested for {}", existing.id()))?;
        }
        AgentsCommand::Delete { agent, yes } => {
            ctx.refresh_agents().await.context("failed to list agents")?;
            let existing = find_agent(ctx, &agent)?;
            if !yes && !terminal.confirm(&format!("Delete agent {}?", existing.label()))? {
                terminal.print_info("Aborted.")?;
                return Ok(());
            }
            admin::delete_agent(ctx, &existing)
                .await
                .context("failed to delete agent")?;
            terminal.print_info(&format!("Deleted {}", existing.id()))?;
        }
        AgentsCommand::Rebuild { template, yes } => {
            let loader = ctx.templates();
            let template = resolve_template(&loader, template.as_deref())?;
            ctx.refresh_agents().await.context("failed to list agents")?;
            let question = format!(
                "Delete all {} agent(s) and recreate from '{}'?",
                ctx.agents().len(),
                template.name
            );
            if !yes && !terminal.confirm(&question)? {
                terminal.print_info("Aborted.")?;
                return Ok(());
            }
            let conversation = admin::rebuild_from_template(ctx, &template)
                .await
                .context("failed to rebuild agent")?;
            info!(conversation = %conversation.name, "rebuild complete");
            terminal.print_info("Agent rebuilt and a new conversation started.")?;
        }
    }
    Ok(())
}

pub fn templates(terminal: &Terminal, config: &AppConfig, action: TemplatesCommand) -> Result<()> {
    let loader = TemplateLoader::new(&config.templates_dir);
    match action {
        TemplatesCommand::List => terminal.print_templates(&loader.list_templates())?,
        TemplatesCommand::Show { file } => {
            let template = resolve_template(&loader, Some(file.as_str()))?;
            terminal.print_template(&template)?;
        }
    }
    Ok(())
}

fn resolve_template(loader: &TemplateLoader, file: Option<&str>) -> Result<TemplateConfig> {
    let template = match file {
        Some(f) => loader.load_template(f),
        None => loader.first_template(),
    };
    template.with_context(|| {
        format!(
            "template unavailable: {} in {}",
            file.unwrap_or("(first)"),
            loader.dir().display()
        )
    })
}

/// Match by resource id, full name or display name.
fn find_agent(ctx: &SessionContext, key: &str) -> Result<DataAgent> {
    ctx.agents()
        .iter()
        .find(|a| a.id() == key || a.name == key || a.display_name == key)
        .cloned()
        .with_context(|| format!("no agent matching '{}'", key))
}

fn build_form(loader: &TemplateLoader, args: &CreateAgentArgs) -> Result<AgentForm> {
    let mut form = match &args.template {
        Some(file) => AgentForm::from_template(&resolve_template(loader, Some(file.as_str()))?),
        None => AgentForm::default(),
    };

    if let Some(name) = &args.name {
        form.display_name = name.clone();
    }
    if let Some(description) = &args.description {
        form.description = description.clone();
    }
    if let Some(instruction) = &args.instruction {
        form.system_instruction = instruction.clone();
    }

    if let (Some(instance_url), Some(model), Some(explore)) =
        (&args.looker_instance, &args.looker_model, &args.looker_explore)
    {
        if !args.tables.is_empty() {
            bail!("an agent uses either BigQuery tables or a Looker explore, not both");
        }
        form.data_source = DataSourceForm::Looker {
            instance_url: instance_url.clone(),
            model: model.clone(),
            explore: explore.clone(),
        };
    } else if !args.tables.is_empty() {
        form.data_source = DataSourceForm::BigQuery(table_rows(&args.tables));
    }

    if form.display_name.is_empty() {
        bail!("--name is required when no template is given");
    }
    Ok(form)
}

/// `project.dataset.table` strings as editor rows. Malformed entries become
/// incomplete rows, which creation skips.
fn table_rows(specs: &[String]) -> TableRows {
    let mut rows = TableRows::new();
    for (i, spec) in specs.iter().enumerate() {
        if i > 0 {
            rows.add_row();
        }
        let parts: Vec<&str> = spec.split('.').collect();
        if let [project, dataset, table] = parts.as_slice() {
            rows.set(i, TableField::Project, *project);
            rows.set(i, TableField::Dataset, *dataset);
            rows.set(i, TableField::Table, *table);
        }
    }
    rows
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_rows_from_specs() {
        let rows = table_rows(&["p.d.t".to_string(), "broken".to_string()]);
        assert_eq!(rows.rows().len(), 2);
        assert!(rows.rows()[0].is_complete());
        assert!(!rows.rows()[1].is_complete());
        assert_eq!(rows.complete_references().len(), 1);
    }

    #[test]
    fn test_form_requires_name_without_template() {
        let loader = TemplateLoader::new("/nonexistent");
        let args = CreateAgentArgs {
            tables: vec!["p.d.t".into()],
            ..Default::default()
        };
        assert!(build_form(&loader, &args).is_err());
    }

    #[test]
    fn test_form_looker() {
        let loader = TemplateLoader::new("/nonexistent");
        let args = CreateAgentArgs {
            name: Some("L".into()),
            looker_instance: Some("https://looker.example.com".into()),
            looker_model: Some("m".into()),
            looker_explore: Some("e".into()),
            ..Default::default()
        };
        let form = build_form(&loader, &args).unwrap();
        assert!(matches!(form.data_source, DataSourceForm::Looker { .. }));
    }

    #[test]
    fn test_missing_template_is_reported() {
        let loader = TemplateLoader::new("/nonexistent");
        let err = resolve_template(&loader, Some("x.yaml")).unwrap_err();
        assert!(err.to_string().contains("template unavailable"));
    }
}
