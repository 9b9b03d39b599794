//! Declarative agent templates ("contexts").
//!
//! A template is a flat `*.yaml` file in the templates directory listing
//! BigQuery tables, their descriptions and the relationships between them.
//! Loading a template composes the agent's system instruction from the base
//! preamble plus a table-descriptions section and a relationships section.
//!
//! Table descriptions longer than a line usually live in sidecar files:
//! `{templates_dir}/descriptions/{table_id}.md`. An inline `description`
//! in the YAML wins over the sidecar.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::types::BigQueryTableReference;

/// Subdirectory holding per-table description files.
pub const DESCRIPTIONS_SUBDIR: &str = "descriptions";

const TABLE_DESCRIPTIONS_HEADER: &str = "## Table descriptions";
const RELATIONSHIPS_HEADER: &str = "## Table relationships";

// ── Types ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableConfig {
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub dataset_id: String,
    #[serde(default)]
    pub table_id: String,
    #[serde(default)]
    pub description: String,
}

impl TableConfig {
    /// `dataset.table`, the heading used in the composed preamble.
    pub fn short_name(&self) -> String {
        format!("{}.{}", self.dataset_id, self.table_id)
    }

    pub fn to_reference(&self) -> BigQueryTableReference {
        BigQueryTableReference {
            project_id: self.project_id.clone(),
            dataset_id: self.dataset_id.clone(),
            table_id: self.table_id.clone(),
        }
    }
}

/// A loaded template with its system preamble already composed.
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateConfig {
    pub name: String,
    pub description: String,
    pub system_preamble: String,
    pub tables: Vec<TableConfig>,
    pub relationships: Vec<String>,
    pub example_queries: Vec<Value>,
}

/// On-disk shape; every field is optional.
#[derive(Debug, Default, Deserialize)]
struct TemplateFile {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    description: String,
    #[serde(default)]
    system_preamble: String,
    #[serde(default)]
    tables: Vec<TableConfig>,
    #[serde(default)]
    relationships: Vec<String>,
    #[serde(default)]
    example_queries: Vec<Value>,
}

// ── Loader ────────────────────────────────────────────────────────

/// Reads templates from a directory. Nothing is cached between calls.
#[derive(Debug, Clone)]
pub struct TemplateLoader {
    dir: PathBuf,
}

impl TemplateLoader {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File names of all `.yaml` templates (flat, sorted). Empty if the
    /// directory does not exist.
    pub fn list_templates(&self) -> Vec<String> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!(dir = %self.dir.display(), error = %e, "templates dir not readable");
                return Vec::new();
            }
        };

        let mut names: Vec<String> = entries
            .flatten()
            .filter(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false))
            .filter_map(|e| e.file_name().to_str().map(str::to_string))
            .filter(|name| name.ends_with(".yaml"))
            .collect();
        names.sort();
        names
    }

    /// Load and compose one template. Missing files and parse errors are
    /// logged and yield `None`.
    pub fn load_template(&self, file_name: &str) -> Option<TemplateConfig> {
        let path = self.dir.join(file_name);
        if !path.exists() {
            warn!(path = %path.display(), "template not found");
            return None;
        }

        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read template");
                return None;
            }
        };

        let file: TemplateFile = match serde_yaml::from_str::<Option<TemplateFile>>(&content) {
            Ok(parsed) => parsed.unwrap_or_default(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to parse template");
                return None;
            }
        };

        let tables: Vec<TableConfig> = file
            .tables
            .into_iter()
            .map(|mut t| {
                if t.description.is_empty() {
                    t.description = self.sidecar_description(&t.table_id);
                }
                t
            })
            .collect();

        let system_preamble =
            build_system_instruction(&file.system_preamble, &tables, &file.relationships);

        debug!(template = file_name, tables = tables.len(), "template loaded");
        Some(TemplateConfig {
            name: file.name.unwrap_or_else(|| file_name.to_string()),
            description: file.description,
            system_preamble,
            tables,
            relationships: file.relationships,
            example_queries: file.example_queries,
        })
    }

    /// Load the first template in listing order.
    pub fn first_template(&self) -> Option<TemplateConfig> {
        let first = self.list_templates().into_iter().next()?;
        self.load_template(&first)
    }

    fn sidecar_description(&self, table_id: &str) -> String {
        if table_id.is_empty() {
            return String::new();
        }
        let path = self
            .dir
            .join(DESCRIPTIONS_SUBDIR)
            .join(format!("{}.md", table_id));
        std::fs::read_to_string(&path)
            .map(|s| s.trim().to_string())
            .unwrap_or_default()
    }
}

/// Compose base preamble + table descriptions + relationships. Sections
/// whose source list is empty are omitted entirely.
pub fn build_system_instruction(
    base_instruction: &str,
    tables: &[TableConfig],
    relationships: &[String],
) -> String {
    let mut sections = vec![base_instruction.trim_end().to_string()];

    let descriptions: Vec<String> = tables
        .iter()
        .filter(|t| !t.description.is_empty())
        .map(|t| format!("### {}\n{}", t.short_name(), t.description))
        .collect();
    if !descriptions.is_empty() {
        sections.push(format!(
            "{}\n\n{}",
            TABLE_DESCRIPTIONS_HEADER,
            descriptions.join("\n\n")
        ));
    }

    if !relationships.is_empty() {
        let bullets: Vec<String> = relationships.iter().map(|r| format!("- {}", r)).collect();
        sections.push(format!("{}\n\n{}", RELATIONSHIPS_HEADER, bullets.join("\n")));
    }

    sections.join("\n\n")
}
