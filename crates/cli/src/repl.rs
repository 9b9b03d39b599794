//! Interactive chat loop.
//!
//! Plain lines are sent to the current agent; lines starting with `/` are
//! commands. Remote failures are printed and the loop keeps going.

use anyhow::Result;
use tracing::{error, info};

use bunseki_core::admin::sorted_agents;
use bunseki_core::chat::{self, ChatOptions};
use bunseki_core::render::render_message;
use bunseki_core::{BunsekiError, SessionContext};

use crate::terminal::Terminal;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplCommand {
    Message(String),
    Help,
    /// Start a new conversation with the current agent.
    New,
    /// List conversations of the current agent.
    Conversations,
    /// Switch to conversation N (1-based, as listed).
    Switch(usize),
    /// List agents.
    Agents,
    /// Switch to agent N (1-based, as listed).
    Agent(usize),
    /// Refetch agents, conversations and messages.
    Refresh,
    /// Reprint the current conversation.
    History,
    Quit,
    Invalid(String),
}

pub fn parse_command(line: &str) -> Option<ReplCommand> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    if matches!(line, "exit" | "quit") {
        return Some(ReplCommand::Quit);
    }
    let Some(rest) = line.strip_prefix('/') else {
        return Some(ReplCommand::Message(line.to_string()));
    };

    let mut parts = rest.split_whitespace();
    let name = parts.next().unwrap_or("");
    let arg = parts.next();

    let cmd = match name {
        "help" | "h" | "?" => ReplCommand::Help,
        "new" => ReplCommand::New,
        "convos" | "conversations" => ReplCommand::Conversations,
        "switch" => match parse_index(arg) {
            Some(n) => ReplCommand::Switch(n),
            None => ReplCommand::Invalid("usage: /switch N".into()),
        },
        "agents" => ReplCommand::Agents,
        "agent" => match parse_index(arg) {
            Some(n) => ReplCommand::Agent(n),
            None => ReplCommand::Invalid("usage: /agent N".into()),
        },
        "refresh" => ReplCommand::Refresh,
        "history" => ReplCommand::History,
        "quit" | "exit" | "q" => ReplCommand::Quit,
        other => ReplCommand::Invalid(format!("unknown command: /{}", other)),
    };
    Some(cmd)
}

fn parse_index(arg: Option<&str>) -> Option<usize> {
    arg.and_then(|a| a.parse::<usize>().ok()).filter(|n| *n > 0)
}

const HELP: &str = "\
Commands:
  /new          start a new conversation
  /convos       list conversations of the current agent
  /switch N     switch to conversation N
  /agents       list agents
  /agent N      switch to agent N
  /refresh      refetch agents, conversations and messages
  /history      reprint the current conversation
  /quit         exit";

/// Run the REPL until the user quits or input ends.
pub async fn run(ctx: &mut SessionContext, terminal: &Terminal) -> Result<()> {
    for e in ctx.initialize().await {
        terminal.print_error(&e.to_string())?;
    }

    terminal.print_banner(ctx.parent(), ctx.current_agent(), ctx.config().guardrail)?;
    if ctx.current_agent().is_none() {
        terminal.print_warning("Please create an agent first before chatting (bunseki agents create)")?;
    }
    if ctx.take_redraw() {
        print_history(ctx, terminal)?;
    }

    let options = ChatOptions::from_config(ctx.config());

    loop {
        let Some(line) = terminal.read_input()? else {
            terminal.print_info("Goodbye.")?;
            break;
        };
        let Some(command) = parse_command(&line) else {
            continue;
        };

        let outcome = match command {
            ReplCommand::Quit => {
                terminal.print_info("Goodbye.")?;
                break;
            }
            ReplCommand::Message(text) => send(ctx, terminal, &text, &options).await,
            other => handle_command(ctx, terminal, other).await,
        };

        if let Err(e) = outcome {
            match e.downcast_ref::<BunsekiError>() {
                Some(BunsekiError::NoAgentSelected) => {
                    terminal.print_warning("Please select an agent first (/agents, /agent N)")?
                }
                _ => {
                    error!(error = %e, "command failed");
                    terminal.print_error(&format!("{:#}", e))?;
                }
            }
        }
    }

    Ok(())
}

async fn send(
    ctx: &mut SessionContext,
    terminal: &Terminal,
    text: &str,
    options: &ChatOptions,
) -> Result<()> {
    // Printing failures must not abort consumption of the stream.
    let result = chat::send_message(ctx, text, options, |blocks| {
        if let Err(e) = terminal.print_blocks(&blocks) {
            tracing::warn!(error = %e, "failed to print blocks");
        }
    })
    .await;

    // The streamed blocks are already on screen; the redraw only needs a
    // status line.
    if ctx.take_redraw() {
        terminal.print_info(&format!("({} messages in conversation)", ctx.messages().len()))?;
    }
    result?;
    Ok(())
}

async fn handle_command(
    ctx: &mut SessionContext,
    terminal: &Terminal,
    command: ReplCommand,
) -> Result<()> {
    match command {
        ReplCommand::Help => terminal.print_info(HELP)?,
        ReplCommand::New => {
            let conversation = ctx.start_new_chat().await?;
            info!(conversation = %conversation.name, "new chat");
            terminal.print_info("Started a new conversation.")?;
        }
        ReplCommand::Conversations => {
            let current = ctx.current_conversation().map(|c| c.name.clone());
            terminal.print_conversations(ctx.conversations(), current.as_deref())?;
        }
        ReplCommand::Switch(n) => {
            let name = ctx
                .conversations()
                .get(n - 1)
                .map(|c| c.name.clone())
                .ok_or_else(|| anyhow::anyhow!("no conversation #{} (see /convos)", n))?;
            ctx.select_conversation(&name).await?;
        }
        ReplCommand::Agents => {
            let current = ctx.current_agent().map(|a| a.name.clone());
            terminal.print_agents(&sorted_agents(ctx.agents()), current.as_deref(), false)?;
        }
        ReplCommand::Agent(n) => {
            let name = sorted_agents(ctx.agents())
                .get(n - 1)
                .map(|a| a.name.clone())
                .ok_or_else(|| anyhow::anyhow!("no agent #{} (see /agents)", n))?;
            ctx.select_agent(&name).await?;
            if let Some(agent) = ctx.current_agent() {
                terminal.print_info(&format!("Now chatting with {}", agent.label()))?;
            }
        }
        ReplCommand::Refresh => {
            ctx.refresh_agents().await?;
            let Some(agent) = ctx.current_agent().cloned() else {
                terminal.print_warning("The selected agent no longer exists (see /agents)")?;
                return Ok(());
            };
            ctx.refresh_conversations(&agent).await?;
            if let Some(conversation) = ctx.current_conversation().cloned() {
                ctx.refresh_messages(&conversation).await?;
            }
        }
        ReplCommand::History => print_history(ctx, terminal)?,
        ReplCommand::Invalid(msg) => terminal.print_warning(&msg)?,
        ReplCommand::Message(_) | ReplCommand::Quit => {}
    }

    if ctx.take_redraw() {
        print_history(ctx, terminal)?;
    }
    Ok(())
}

/// Reprint the cached conversation, oldest first.
fn print_history(ctx: &SessionContext, terminal: &Terminal) -> Result<()> {
    let subheader = match ctx.current_conversation().and_then(|c| c.create_time) {
        Some(t) => format!(
            "Chat - Conversation started at {}",
            t.format("%m/%d/%Y, %H:%M:%S")
        ),
        None => "Chat".to_string(),
    };
    terminal.print_info(&subheader)?;

    let row_limit = ctx.config().result_row_limit;
    // History replay must not replace the live result cache.
    let mut scratch = None;
    for message in ctx.messages() {
        terminal.print_blocks(&render_message(message, row_limit, &mut scratch))?;
    }
    Ok(())
}
