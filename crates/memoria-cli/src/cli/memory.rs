//! Memory commands: recall, exchange, ingest, list, forget, count.

use std::path::Path;

use anyhow::{bail, Context, Result};
use comfy_table::{presets, Cell, Color, ContentArrangement, Table};
use console::style;
use dialoguer::Confirm;
use uuid::Uuid;

use memoria_core::memory::service::MemoryRequest;
use memoria_types::config::{RequestMemoryConfig, RequestMemoryContext};
use memoria_types::memory::{ExtractionReport, MemoryType, UserScope};

use super::transcript::{group_exchanges, load_transcript};
use crate::state::AppState;

fn parse_scope(user: &str) -> Result<UserScope> {
    UserScope::new(user).with_context(|| format!("Invalid user id '{user}'"))
}

fn request_for(user: &str, query: &str, auto_store: bool) -> MemoryRequest {
    MemoryRequest {
        memory_config: Some(RequestMemoryConfig {
            enabled: true,
            auto_store,
            ..RequestMemoryConfig::default()
        }),
        memory_context: Some(RequestMemoryContext {
            user_id: user.to_string(),
        }),
        query: query.to_string(),
        recent_turns: Vec::new(),
    }
}

fn type_cell(memory_type: MemoryType) -> Cell {
    let cell = Cell::new(memory_type.to_string());
    match memory_type {
        MemoryType::Semantic => cell.fg(Color::Cyan),
        MemoryType::Procedural => cell.fg(Color::Magenta),
        MemoryType::Episodic => cell.fg(Color::Yellow),
        MemoryType::Working => cell.fg(Color::DarkGrey),
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        let head: String = text.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{head}...")
    } else {
        text.to_string()
    }
}

fn plural(n: usize) -> &'static str {
    if n == 1 { "y" } else { "ies" }
}

/// Search a user's memories and print the ranked matches.
///
/// # Examples
///
/// ```bash
/// memoria recall alice "what's my favorite color?"
/// memoria recall alice "how much was it?" --history chat.json --threshold 0.5
/// ```
pub async fn recall(
    state: &AppState,
    user: &str,
    query: &str,
    limit: Option<usize>,
    threshold: Option<f32>,
    history: Option<&Path>,
    json: bool,
) -> Result<()> {
    parse_scope(user)?;
    if let Some(t) = threshold.filter(|t| !(0.0..=1.0).contains(t)) {
        bail!("--threshold must be within [0, 1], got {t}");
    }

    let mut request = request_for(user, query, false);
    if let Some(config) = request.memory_config.as_mut() {
        config.retrieval_limit = limit;
        config.similarity_threshold = threshold;
    }
    if let Some(path) = history {
        request.recent_turns = load_transcript(path).await?;
    }

    let context = state.service.before_response(&request).await?;
    let result = &context.result;

    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
        return Ok(());
    }

    if result.is_empty() {
        println!();
        println!(
            "  {} No memories for '{}' above {:.2}.",
            style("i").blue().bold(),
            style(user).cyan(),
            context.settings.similarity_threshold,
        );
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("#").fg(Color::White),
        Cell::new("Memory").fg(Color::White),
        Cell::new("Type").fg(Color::White),
        Cell::new("Score").fg(Color::White),
    ]);
    for (i, scored) in result.memories.iter().enumerate() {
        table.add_row(vec![
            Cell::new(i + 1).fg(Color::DarkGrey),
            Cell::new(truncate(&scored.record.text, 70)).fg(Color::White),
            type_cell(scored.record.memory_type),
            Cell::new(format!("{:.3}", scored.similarity)).fg(Color::Green),
        ]);
    }

    println!();
    if let Some(effective) = result.effective_query.as_deref().filter(|q| *q != query) {
        println!("  {} {}", style("Rewritten:").dim(), style(effective).italic());
        println!();
    }
    println!("{table}");
    println!();
    Ok(())
}

/// Batch reports published for `scope` so far.
fn take_reports(state: &mut AppState, scope: &UserScope) -> Vec<ExtractionReport> {
    let mut reports = Vec::new();
    while let Ok(report) = state.reports.try_recv() {
        if &report.user_scope == scope {
            reports.push(report);
        }
    }
    reports
}

/// Run the pre- and post-response hooks for one exchange.
///
/// Prints the context block that would be injected into the prompt. The
/// window does not outlive the process, so a stored exchange is extracted
/// right away instead of waiting for a full batch.
pub async fn exchange(
    state: &mut AppState,
    user: &str,
    message: &str,
    reply: &str,
    no_store: bool,
    json: bool,
) -> Result<()> {
    let scope = parse_scope(user)?;
    let request = request_for(user, message, !no_store);

    let context = state.service.before_response(&request).await?;
    let queued = state.service.after_response(&request, reply)?;
    if queued {
        state.service.drain(&scope).await;
    }
    let reports = take_reports(state, &scope);
    let stored: usize = reports.iter().map(|r| r.stored).sum();

    if json {
        println!(
            "{}",
            serde_json::json!({
                "user": user,
                "retrieved": context.result,
                "context_block": context.context_block,
                "extracted": queued,
                "batches": reports,
            })
        );
        return Ok(());
    }

    println!();
    match &context.context_block {
        Some(block) => {
            for line in block.lines() {
                println!("  {}", style(line).dim());
            }
        }
        None => println!("  {} No relevant memories.", style("i").blue().bold()),
    }
    println!();
    if let Some(reason) = reports.iter().find_map(|r| r.failure.as_deref()) {
        println!("  {} Extraction failed: {}", style("!").yellow().bold(), reason);
        println!();
    } else if queued {
        println!(
            "  {} Exchange extracted: {} new memor{}",
            style("*").green().bold(),
            style(stored).bold(),
            plural(stored)
        );
        println!();
    }
    Ok(())
}

/// Push a transcript through extraction and report what was stored.
///
/// Turns are grouped into exchanges the way live traffic arrives; the final
/// partial batch is extracted too.
///
/// # Examples
///
/// ```bash
/// memoria ingest alice chat.json
/// ```
pub async fn ingest(state: &mut AppState, user: &str, transcript: &Path, json: bool) -> Result<()> {
    let scope = parse_scope(user)?;
    let Some(scheduler) = state.service.scheduler() else {
        bail!("Extraction is disabled; set [extraction] enabled = true in the config");
    };

    let turns = load_transcript(transcript).await?;
    let total = turns.len();
    for exchange in group_exchanges(turns) {
        scheduler.enqueue_exchange(&scope, exchange)?;
    }
    state.service.drain(&scope).await;

    let reports = take_reports(state, &scope);

    if json {
        println!(
            "{}",
            serde_json::json!({
                "user": user,
                "turns": total,
                "batches": reports,
            })
        );
        return Ok(());
    }

    println!();
    println!(
        "  Ingested {} turns for '{}'",
        style(total).bold(),
        style(user).cyan().bold()
    );
    println!();

    if reports.is_empty() {
        println!("  {} Nothing to extract.", style("i").blue().bold());
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("Turns").fg(Color::White),
        Cell::new("Candidates").fg(Color::White),
        Cell::new("Stored").fg(Color::White),
        Cell::new("Duplicates").fg(Color::White),
        Cell::new("Dropped").fg(Color::White),
        Cell::new("Status").fg(Color::White),
    ]);
    for report in &reports {
        let status = match &report.failure {
            Some(reason) => Cell::new(truncate(reason, 40)).fg(Color::Red),
            None => Cell::new("ok").fg(Color::Green),
        };
        table.add_row(vec![
            Cell::new(report.turn_range.to_string()).fg(Color::DarkGrey),
            Cell::new(report.candidates),
            Cell::new(report.stored).fg(Color::Green),
            Cell::new(report.duplicates).fg(Color::Yellow),
            Cell::new(report.dropped).fg(Color::Red),
            status,
        ]);
    }
    println!("{table}");
    println!();

    let stored: usize = reports.iter().map(|r| r.stored).sum();
    println!("  {} new memor{}", style(stored).bold(), plural(stored));
    println!();
    Ok(())
}

/// List a user's memories, newest first.
pub async fn list_memories(state: &AppState, user: &str, limit: usize, json: bool) -> Result<()> {
    let scope = parse_scope(user)?;
    let memories = state.service.list(&scope, limit).await?;

    if json {
        let rows: Vec<_> = memories
            .iter()
            .map(|m| {
                serde_json::json!({
                    "id": m.id,
                    "text": m.text,
                    "memory_type": m.memory_type,
                    "created_at": m.created_at,
                    "source_turn_range": m.source_turn_range,
                    "embedding_model": m.embedding_model,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
        return Ok(());
    }

    if memories.is_empty() {
        println!();
        println!(
            "  {} No memories for '{}'. Memories are extracted from conversations.",
            style("i").blue().bold(),
            style(user).cyan(),
        );
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec![
        Cell::new("ID").fg(Color::White),
        Cell::new("Memory").fg(Color::White),
        Cell::new("Type").fg(Color::White),
        Cell::new("Turns").fg(Color::White),
        Cell::new("Date").fg(Color::White),
    ]);
    for mem in &memories {
        table.add_row(vec![
            Cell::new(&mem.id.to_string()[..8]).fg(Color::DarkGrey),
            Cell::new(truncate(&mem.text, 60)).fg(Color::White),
            type_cell(mem.memory_type),
            Cell::new(mem.source_turn_range.to_string()).fg(Color::DarkGrey),
            Cell::new(mem.created_at.format("%Y-%m-%d")).fg(Color::DarkGrey),
        ]);
    }

    println!();
    println!("  Memories for '{}'", style(user).cyan().bold());
    println!();
    println!("{table}");
    println!();
    println!(
        "  {} memor{}",
        style(memories.len()).bold(),
        plural(memories.len())
    );
    println!();
    Ok(())
}

/// Delete one memory by id, or a user's whole memory (optionally one type).
///
/// # Examples
///
/// ```bash
/// memoria forget alice 0190f3c2-...
/// memoria forget alice --all --type episodic --force
/// ```
pub async fn forget(
    state: &AppState,
    user: &str,
    id: Option<Uuid>,
    all: bool,
    memory_type: Option<MemoryType>,
    force: bool,
    json: bool,
) -> Result<()> {
    let scope = parse_scope(user)?;

    if let Some(id) = id {
        let deleted = state.service.forget(&scope, &id).await?;
        if json {
            println!("{}", serde_json::json!({"deleted": deleted, "id": id, "user": user}));
        } else if deleted {
            println!("  {} Memory {} deleted", style("*").green().bold(), style(id).dim());
        } else {
            bail!("Memory {id} not found for '{user}'");
        }
        return Ok(());
    }

    if !all {
        bail!("Pass a memory id or --all");
    }

    let count = state.service.count(&scope).await?;
    if count == 0 {
        if json {
            println!("{}", serde_json::json!({"deleted": 0, "user": user}));
        } else {
            println!(
                "  {} No memories to delete for '{}'.",
                style("i").blue().bold(),
                style(user).cyan()
            );
        }
        return Ok(());
    }

    if !force && !json {
        let what = match memory_type {
            Some(kind) => format!("all {kind} memories"),
            None => format!("all {count} memories"),
        };
        let confirmed = Confirm::new()
            .with_prompt(format!("Delete {what} for '{user}'? This cannot be undone."))
            .default(false)
            .interact()?;
        if !confirmed {
            println!("  Cancelled.");
            return Ok(());
        }
    }

    let deleted = state.service.forget_all(&scope, memory_type).await?;
    if json {
        println!("{}", serde_json::json!({"deleted": deleted, "user": user}));
    } else {
        println!(
            "  {} Deleted {} memor{} for '{}'",
            style("*").green().bold(),
            style(deleted).bold(),
            plural(deleted as usize),
            style(user).cyan()
        );
    }
    Ok(())
}

pub async fn count(state: &AppState, user: &str, json: bool) -> Result<()> {
    let scope = parse_scope(user)?;
    let count = state.service.count(&scope).await?;
    if json {
        println!("{}", serde_json::json!({"user": user, "count": count}));
    } else {
        println!(
            "  '{}' has {} memor{}",
            style(user).cyan(),
            style(count).bold(),
            plural(count as usize)
        );
    }
    Ok(())
}
