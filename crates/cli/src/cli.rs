use clap::{Args, Parser, Subcommand};

use bunseki_core::AppConfig;

/// Conversational data analytics in the terminal.
///
/// Chats with Gemini Data Analytics data agents over BigQuery tables or
/// Looker explores, and manages those agents.
#[derive(Parser, Debug)]
#[command(name = "bunseki", about = "Conversational data analytics in the terminal")]
pub struct CliArgs {
    /// Path to config file (default: ~/.config/bunseki/config.toml)
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// Cloud project id (overrides config file and BUNSEKI_PROJECT_ID)
    #[arg(long, global = true)]
    pub project: Option<String>,

    /// Directory holding agent templates
    #[arg(long, global = true)]
    pub templates_dir: Option<String>,

    /// Prefix every question with the agent's system instruction
    #[arg(long, global = true)]
    pub guardrail: bool,

    /// Do not create a default agent when the project has none
    #[arg(long, global = true)]
    pub no_auto_provision: bool,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Interactive chat (default)
    Chat,
    /// Manage data agents
    Agents {
        #[command(subcommand)]
        action: AgentsCommand,
    },
    /// Inspect agent templates
    Templates {
        #[command(subcommand)]
        action: TemplatesCommand,
    },
}

#[derive(Subcommand, Debug)]
pub enum AgentsCommand {
    /// List agents sorted by display name
    List,
    /// Create an agent from flags and/or a template
    Create(CreateAgentArgs),
    /// Update display name, description or system instruction
    Update {
        /// Agent id or display name
        agent: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        instruction: Option<String>,
    },
    /// Delete an agent
    Delete {
        /// Agent id or display name
        agent: String,
        /// Skip the confirmation prompt
        #[arg(long, short)]
        yes: bool,
    },
    /// Delete all agents, recreate one from a template and open a new chat
    Rebuild {
        /// Template file name (default: first template)
        #[arg(long)]
        template: Option<String>,
        #[arg(long, short)]
        yes: bool,
    },
}

#[derive(Args, Debug, Default)]
pub struct CreateAgentArgs {
    /// Display name
    #[arg(long)]
    pub name: Option<String>,

    #[arg(long)]
    pub description: Option<String>,

    /// System instruction
    #[arg(long)]
    pub instruction: Option<String>,

    /// Pre-fill from a template file in the templates directory
    #[arg(long)]
    pub template: Option<String>,

    /// BigQuery table as project.dataset.table (repeatable)
    #[arg(long = "table")]
    pub tables: Vec<String>,

    /// Looker instance URL (selects a Looker data source)
    #[arg(long, requires_all = ["looker_model", "looker_explore"])]
    pub looker_instance: Option<String>,

    #[arg(long)]
    pub looker_model: Option<String>,

    #[arg(long)]
    pub looker_explore: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum TemplatesCommand {
    /// List template files
    List,
    /// Show a template with its composed system instruction
    Show {
        /// Template file name, e.g. sales.yaml
        file: String,
    },
}

impl CliArgs {
    /// Flags take precedence over config file and environment.
    pub fn apply_overrides(&self, config: &mut AppConfig) {
        if let Some(project) = &self.project {
            config.project_id = Some(project.clone());
        }
        if let Some(dir) = &self.templates_dir {
            config.templates_dir = dir.into();
        }
        if self.guardrail {
            config.guardrail = true;
        }
        if self.no_auto_provision {
            config.auto_provision = false;
        }
    }
}
