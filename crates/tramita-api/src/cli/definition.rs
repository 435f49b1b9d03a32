//! Workflow definition CLI commands: load, list, show, activate, deactivate.

use anyhow::{Context, Result};
use comfy_table::{presets, Cell, Color, ContentArrangement, Table};
use console::style;
use uuid::Uuid;

use tramita_types::definition::{CreateDefinitionRequest, WorkflowDefinition};

use crate::state::AppState;

/// Load a workflow definition from a JSON file.
///
/// # Examples
///
/// ```bash
/// tramita definition load licenses.json --activate
/// ```
pub async fn load_definition(
    state: &AppState,
    file: &std::path::Path,
    activate: bool,
    json: bool,
) -> Result<()> {
    let raw = tokio::fs::read_to_string(file)
        .await
        .with_context(|| format!("reading {}", file.display()))?;
    let mut request: CreateDefinitionRequest =
        serde_json::from_str(&raw).with_context(|| format!("parsing {}", file.display()))?;
    if activate {
        request.is_active = true;
    }

    let def = state.engine.create_definition(request).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&def)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} Definition loaded",
        style("✓").green().bold()
    );
    println!();
    println!("  {}  {}", style("Name:").bold(), style(&def.name).cyan());
    println!("  {}  v{}", style("Version:").bold(), def.version);
    println!("  {}  {}", style("Active:").bold(), format_active(def.is_active));
    println!("  {}  {} stages", style("Stages:").bold(), def.stages.len());
    println!("  {}  {}", style("ID:").bold(), style(def.id.to_string()).dim());
    println!();

    Ok(())
}

/// List all workflow definitions in a colored table.
pub async fn list_definitions(state: &AppState, json: bool) -> Result<()> {
    let defs = state.engine.list_definitions().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&defs)?);
        return Ok(());
    }

    if defs.is_empty() {
        println!();
        println!(
            "  {} No definitions found. Load one with: {}",
            style("i").blue().bold(),
            style("tramita definition load <file.json>").yellow()
        );
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);

    table.set_header(vec![
        Cell::new("Name").fg(Color::White),
        Cell::new("Version").fg(Color::White),
        Cell::new("Active").fg(Color::White),
        Cell::new("Stages").fg(Color::White),
        Cell::new("ID").fg(Color::White),
    ]);

    for def in &defs {
        let active_cell = if def.is_active {
            Cell::new("● active").fg(Color::Green)
        } else {
            Cell::new("○ inactive").fg(Color::DarkGrey)
        };

        table.add_row(vec![
            Cell::new(&def.name).fg(Color::Cyan),
            Cell::new(format!("v{}", def.version)),
            active_cell,
            Cell::new(def.stages.len().to_string()),
            Cell::new(def.id.to_string()).fg(Color::DarkGrey),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    println!(
        "  {} definition{}",
        style(defs.len()).bold(),
        if defs.len() == 1 { "" } else { "s" }
    );
    println!();

    Ok(())
}

/// Show a single definition with its stage graph.
pub async fn show_definition(state: &AppState, id: &Uuid, json: bool) -> Result<()> {
    let def = state.engine.get_definition(id).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&def)?);
        return Ok(());
    }

    print_definition(&def);
    Ok(())
}

/// Activate or deactivate a definition.
pub async fn set_definition_active(
    state: &AppState,
    id: &Uuid,
    is_active: bool,
    json: bool,
) -> Result<()> {
    let def = state.engine.set_definition_active(id, is_active).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&def)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} '{}' is now {}",
        style("✓").green().bold(),
        style(&def.name).cyan(),
        format_active(def.is_active)
    );
    println!();

    Ok(())
}

fn print_definition(def: &WorkflowDefinition) {
    println!();
    println!(
        "  {} {} {}",
        style(&def.name).cyan().bold(),
        style(format!("v{}", def.version)).dim(),
        format_active(def.is_active)
    );
    println!("  {}", style(def.id.to_string()).dim());
    println!();
    println!("  {}", style("── Stages ──").dim());
    for stage in &def.stages {
        let transitions = if stage.allowed_transitions.is_empty() {
            style("any stage").dim().to_string()
        } else {
            stage.allowed_transitions.join(", ")
        };
        println!(
            "  {} {} ({}) → {}",
            style("•").dim(),
            style(&stage.name).bold(),
            stage.id,
            transitions
        );
    }
    println!();
}

fn format_active(is_active: bool) -> String {
    if is_active {
        format!("{}", style("● active").green())
    } else {
        format!("{}", style("○ inactive").dim())
    }
}
