//! Statistics and stale-case CLI commands.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use comfy_table::{presets, Cell, Color, ContentArrangement, Table};
use console::style;
use uuid::Uuid;

use crate::state::AppState;

/// Show aggregate statistics for a definition's instances.
pub async fn stats(
    state: &AppState,
    id: &Uuid,
    from: Option<&str>,
    to: Option<&str>,
    json: bool,
) -> Result<()> {
    let from = parse_bound(from)?;
    let to = parse_bound(to)?;

    let def = state.engine.get_definition(id).await?;
    let stats = state.engine.get_statistics(id, from, to).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} Statistics for {} {}",
        style("📊").bold(),
        style(&def.name).cyan(),
        style(format!("v{}", def.version)).dim()
    );
    if let Some(period) = &stats.period {
        let from = period
            .from
            .map(|d| d.to_rfc3339())
            .unwrap_or_else(|| "beginning".into());
        let to = period
            .to
            .map(|d| d.to_rfc3339())
            .unwrap_or_else(|| "now".into());
        println!("  {}", style(format!("{from} .. {to}")).dim());
    }
    println!();

    println!("  Total:     {}", style(stats.total).bold());
    println!("  Active:    {}", style(stats.by_status.active).green());
    println!("  Paused:    {}", style(stats.by_status.paused).yellow());
    println!("  Completed: {}", style(stats.by_status.completed).cyan());
    println!("  Cancelled: {}", style(stats.by_status.cancelled).dim());
    if stats.by_status.error > 0 {
        println!("  Error:     {}", style(stats.by_status.error).red());
    }
    println!();
    println!(
        "  Mean completion time: {} min",
        style(stats.mean_completion_minutes).bold()
    );

    if !stats.active_by_stage.is_empty() {
        println!();
        println!("  {}", style("── Active by stage ──").dim());
        let mut stages: Vec<_> = stats.active_by_stage.iter().collect();
        stages.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
        for (stage, count) in stages {
            println!("  {:>5}  {}", style(count).bold(), stage);
        }
    }
    println!();

    Ok(())
}

/// List instances with no updates past the inactivity threshold.
pub async fn stale(
    state: &AppState,
    id: &Uuid,
    threshold: Option<i64>,
    json: bool,
) -> Result<()> {
    let threshold = threshold.unwrap_or(state.config.default_stale_threshold_minutes);
    anyhow::ensure!(threshold > 0, "threshold must be positive");

    let instances = state.engine.find_stale_workflows(id, threshold).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&instances)?);
        return Ok(());
    }

    if instances.is_empty() {
        println!();
        println!(
            "  {} No stale instances (threshold: {} min)",
            style("✓").green().bold(),
            threshold
        );
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);

    table.set_header(vec![
        Cell::new("ID").fg(Color::White),
        Cell::new("Stage").fg(Color::White),
        Cell::new("Status").fg(Color::White),
        Cell::new("Entity").fg(Color::White),
        Cell::new("Last Update").fg(Color::White),
    ]);

    for instance in &instances {
        table.add_row(vec![
            Cell::new(instance.id.to_string()).fg(Color::DarkGrey),
            Cell::new(&instance.current_stage).fg(Color::Cyan),
            Cell::new(instance.status.as_str()),
            Cell::new(format!("{} {}", instance.entity_type, instance.entity_id)),
            Cell::new(instance.updated_at.to_rfc3339()).fg(Color::DarkGrey),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    println!(
        "  {} stale instance{} (threshold: {} min)",
        style(instances.len()).yellow().bold(),
        if instances.len() == 1 { "" } else { "s" },
        threshold
    );
    println!();

    Ok(())
}

fn parse_bound(raw: Option<&str>) -> Result<Option<DateTime<Utc>>> {
    raw.map(|s| {
        DateTime::parse_from_rfc3339(s)
            .map(|d| d.with_timezone(&Utc))
            .with_context(|| format!("invalid RFC 3339 timestamp: {s}"))
    })
    .transpose()
}
