use anyhow::Result;
use crossterm::{
    execute,
    style::{Attribute, Color, Print, ResetColor, SetAttribute, SetForegroundColor},
};
use std::io::{self, Write};

use bunseki_core::humanize::humanize_since;
use bunseki_core::render::Block;
use bunseki_core::templates::TemplateConfig;
use bunseki_core::{Conversation, DataAgent};

/// Color scheme for terminal output.
struct Colors;

impl Colors {
    const USER_PROMPT: Color = Color::Green;
    const ASSISTANT_TEXT: Color = Color::Cyan;
    const CODE: Color = Color::Yellow;
    const NOTICE: Color = Color::DarkYellow;
    const ERROR: Color = Color::Red;
    const DIM: Color = Color::DarkGrey;
    const HEADER: Color = Color::Magenta;
}

/// Manages terminal I/O for the REPL and admin commands.
pub struct Terminal;

impl Terminal {
    pub fn new() -> Self {
        Self
    }

    /// Print the startup banner.
    pub fn print_banner(&self, parent: &str, agent: Option<&DataAgent>, guardrail: bool) -> Result<()> {
        let mut stdout = io::stdout();
        let agent_label = agent.map(|a| a.label()).unwrap_or("(none)");
        execute!(
            stdout,
            SetForegroundColor(Colors::HEADER),
            Print("bunseki"),
            ResetColor,
            Print(" - Data Analytics Assistant\n"),
            SetForegroundColor(Colors::DIM),
            Print(format!("{} | Agent: {} | Guardrail: {}\n", parent, agent_label, if guardrail { "on" } else { "off" })),
            Print("Type /help for commands, /quit to end.\n"),
            Print("---\n"),
            ResetColor,
        )?;
        stdout.flush()?;
        Ok(())
    }

    /// Read a line of user input with prompt.
    /// Returns None on end of input.
    pub fn read_input(&self) -> Result<Option<String>> {
        let mut stdout = io::stdout();
        execute!(
            stdout,
            Print("\n"),
            SetForegroundColor(Colors::USER_PROMPT),
            Print("you> "),
            ResetColor,
        )?;
        stdout.flush()?;

        let mut input = String::new();
        if io::stdin().read_line(&mut input)? == 0 {
            return Ok(None);
        }
        Ok(Some(input.trim().to_string()))
    }

    /// Ask a yes/no question. Defaults to no.
    pub fn confirm(&self, question: &str) -> Result<bool> {
        let mut stdout = io::stdout();
        execute!(
            stdout,
            SetForegroundColor(Colors::NOTICE),
            Print(format!("{} [y/N] ", question)),
            ResetColor,
        )?;
        stdout.flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;
        let trimmed = input.trim().to_lowercase();
        Ok(trimmed == "y" || trimmed == "yes")
    }

    // ── Rendered blocks ───────────────────────────────────────────

    pub fn print_blocks(&self, blocks: &[Block]) -> Result<()> {
        for block in blocks {
            self.print_block(block)?;
        }
        Ok(())
    }

    fn print_block(&self, block: &Block) -> Result<()> {
        let mut stdout = io::stdout();
        match block {
            Block::UserText(text) => {
                execute!(
                    stdout,
                    SetForegroundColor(Colors::USER_PROMPT),
                    Print("you: "),
                    ResetColor,
                    Print(format!("{}\n", text)),
                )?;
            }
            Block::Markdown(text) => {
                execute!(stdout, SetForegroundColor(Colors::ASSISTANT_TEXT))?;
                print_markdown(&mut stdout, text)?;
                execute!(stdout, ResetColor, Print("\n"))?;
            }
            Block::Heading(title) => {
                execute!(
                    stdout,
                    SetForegroundColor(Colors::HEADER),
                    Print(format!("── {} ──\n", title)),
                    ResetColor,
                )?;
            }
            Block::Code { language, body } => {
                execute!(
                    stdout,
                    SetForegroundColor(Colors::DIM),
                    Print(format!("```{}\n", language)),
                    SetForegroundColor(Colors::CODE),
                    Print(format!("{}\n", body.trim_end())),
                    SetForegroundColor(Colors::DIM),
                    Print("```\n"),
                    ResetColor,
                )?;
            }
            Block::Table(table) => {
                execute!(stdout, Print(table.to_string()))?;
            }
            Block::Notice(text) => {
                execute!(
                    stdout,
                    SetForegroundColor(Colors::NOTICE),
                    Print(format!("[{}]\n", text)),
                    ResetColor,
                )?;
            }
            Block::Chart(spec) => {
                let mark = spec
                    .get("mark")
                    .and_then(|m| m.as_str().or_else(|| m.get("type").and_then(|t| t.as_str())))
                    .unwrap_or("?");
                let pretty = serde_json::to_string_pretty(spec)?;
                execute!(
                    stdout,
                    SetForegroundColor(Colors::HEADER),
                    Print(format!("[chart: {}] Vega-Lite spec:\n", mark)),
                    SetForegroundColor(Colors::DIM),
                    Print(format!("{}\n", pretty)),
                    ResetColor,
                )?;
            }
        }
        stdout.flush()?;
        Ok(())
    }

    // ── Listings ──────────────────────────────────────────────────

    /// Numbered agent listing; `current` is highlighted.
    pub fn print_agents(&self, agents: &[&DataAgent], current: Option<&str>, detailed: bool) -> Result<()> {
        let mut stdout = io::stdout();
        if agents.is_empty() {
            execute!(
                stdout,
                SetForegroundColor(Colors::DIM),
                Print("No agents found.\n"),
                ResetColor,
            )?;
            return Ok(());
        }

        for (i, agent) in agents.iter().enumerate() {
            let marker = if Some(agent.name.as_str()) == current { "*" } else { " " };
            execute!(
                stdout,
                SetForegroundColor(Colors::HEADER),
                Print(format!("{}{:>3}. {}", marker, i + 1, agent.label())),
                SetForegroundColor(Colors::DIM),
                Print(format!("  ({})\n", agent.id())),
                ResetColor,
            )?;
            if !detailed {
                continue;
            }
            let sources = agent.datasource_references().to_string();
            execute!(
                stdout,
                Print(format!("      Description: {}\n", agent.description)),
                Print(format!(
                    "      Created: {}\n",
                    humanize_since(agent.create_time, "Just created")
                )),
                Print(format!(
                    "      Updated: {}\n",
                    humanize_since(agent.update_time, "Just updated")
                )),
                SetForegroundColor(Colors::DIM),
                Print(format!(
                    "      System instruction:\n{}\n",
                    indent(agent.system_instruction(), 8)
                )),
                Print(format!("      Data source:\n{}\n", indent(sources.trim_end(), 8))),
                ResetColor,
            )?;
        }
        stdout.flush()?;
        Ok(())
    }

    pub fn print_conversations(&self, conversations: &[Conversation], current: Option<&str>) -> Result<()> {
        let mut stdout = io::stdout();
        if conversations.is_empty() {
            execute!(
                stdout,
                SetForegroundColor(Colors::DIM),
                Print("No conversations yet. Send a message to start one.\n"),
                ResetColor,
            )?;
            return Ok(());
        }

        for (i, c) in conversations.iter().enumerate() {
            let marker = if Some(c.name.as_str()) == current { "*" } else { " " };
            let started = c
                .create_time
                .map(|t| t.format("%m/%d %H:%M").to_string())
                .unwrap_or_else(|| "-".to_string());
            let last_used = c
                .last_used_time
                .map(|t| t.format("%m/%d/%Y, %H:%M:%S").to_string())
                .unwrap_or_else(|| "-".to_string());
            execute!(
                stdout,
                Print(format!("{}{:>3}. {}", marker, i + 1, started)),
                SetForegroundColor(Colors::DIM),
                Print(format!("  last used {}\n", last_used)),
                ResetColor,
            )?;
        }
        stdout.flush()?;
        Ok(())
    }

    pub fn print_templates(&self, names: &[String]) -> Result<()> {
        let mut stdout = io::stdout();
        if names.is_empty() {
            execute!(
                stdout,
                SetForegroundColor(Colors::DIM),
                Print("No templates found.\n"),
                ResetColor,
            )?;
            return Ok(());
        }
        for name in names {
            execute!(stdout, Print(format!("  {}\n", name)))?;
        }
        stdout.flush()?;
        Ok(())
    }

    pub fn print_template(&self, template: &TemplateConfig) -> Result<()> {
        let mut stdout = io::stdout();
        execute!(
            stdout,
            SetForegroundColor(Colors::HEADER),
            Print(format!("{}\n", template.name)),
            ResetColor,
            Print(format!("{}\n\n", template.description)),
            SetForegroundColor(Colors::DIM),
            Print("Tables:\n"),
            ResetColor,
        )?;
        for t in &template.tables {
            execute!(stdout, Print(format!("  {}\n", t.to_reference())))?;
        }
        execute!(
            stdout,
            SetForegroundColor(Colors::DIM),
            Print(format!("Example queries: {}\n\n", template.example_queries.len())),
            Print("System instruction:\n"),
            ResetColor,
            Print(format!("{}\n", template.system_preamble)),
        )?;
        stdout.flush()?;
        Ok(())
    }

    // ── Messages ──────────────────────────────────────────────────

    /// Print an error message.
    pub fn print_error(&self, msg: &str) -> Result<()> {
        let mut stdout = io::stdout();
        execute!(
            stdout,
            SetForegroundColor(Colors::ERROR),
            Print(format!("Error: {}\n", msg)),
            ResetColor,
        )?;
        stdout.flush()?;
        Ok(())
    }

    pub fn print_warning(&self, msg: &str) -> Result<()> {
        let mut stdout = io::stdout();
        execute!(
            stdout,
            SetForegroundColor(Colors::NOTICE),
            Print(format!("Warning: {}\n", msg)),
            ResetColor,
        )?;
        stdout.flush()?;
        Ok(())
    }

    /// Print an info message.
    pub fn print_info(&self, msg: &str) -> Result<()> {
        let mut stdout = io::stdout();
        execute!(
            stdout,
            SetForegroundColor(Colors::DIM),
            Print(format!("{}\n", msg)),
            ResetColor,
        )?;
        stdout.flush()?;
        Ok(())
    }
}

/// Print text, toggling bold at each `**` marker.
fn print_markdown(out: &mut impl Write, text: &str) -> Result<()> {
    for (i, segment) in text.split("**").enumerate() {
        if i % 2 == 1 {
            execute!(out, SetAttribute(Attribute::Bold), Print(segment), SetAttribute(Attribute::NormalIntensity))?;
        } else {
            execute!(out, Print(segment))?;
        }
    }
    Ok(())
}

fn indent(text: &str, width: usize) -> String {
    let pad = " ".repeat(width);
    if text.trim().is_empty() {
        return format!("{}-", pad);
    }
    text.lines()
        .map(|l| format!("{}{}", pad, l))
        .collect::<Vec<_>>()
        .join("\n")
}
