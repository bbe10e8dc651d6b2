//! `dflow plan` and `dflow validate`.

use std::path::Path;

use anyhow::{Context, Result, bail};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;

use datumflow_core::pipeline::binding::Predecessor;
use datumflow_core::pipeline::definition::{load_pipeline_file, validation_issues};
use datumflow_core::pipeline::topology::{self, ExecutionPlan};
use datumflow_types::config::{CyclePolicy, GlobalConfig};
use datumflow_types::pipeline::{Edge, Pipeline};

/// Output switches shared by the pipeline commands.
#[derive(Debug, Clone, Copy)]
pub struct Output {
    pub json: bool,
    pub quiet: bool,
}

// ---------------------------------------------------------------------------
// Plan
// ---------------------------------------------------------------------------

pub async fn handle_plan(file: &Path, config: &GlobalConfig, out: Output) -> Result<()> {
    let pipeline = load(file).await?;
    let policy = config.orchestrator.cycle_policy;

    let plan = topology::plan(&pipeline.nodes, &pipeline.edges, policy)
        .with_context(|| format!("cannot plan '{}'", file.display()))?;
    let edges = topology::known_edges(&pipeline.nodes, &pipeline.edges);
    let cycles = if plan.omitted.is_empty() {
        Vec::new()
    } else {
        topology::find_cycles(&pipeline.nodes, &pipeline.edges)
    };

    if out.json {
        let report = plan_json(&pipeline, &plan, &edges, &cycles, policy);
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }
    if out.quiet {
        return Ok(());
    }

    println!();
    println!(
        "  {} {} ({} nodes, {} edges)",
        style("Pipeline").bold(),
        style(display_name(&pipeline)).cyan(),
        pipeline.nodes.len(),
        pipeline.edges.len()
    );
    println!();

    if plan.is_empty() {
        println!("  Nothing to run.");
    } else {
        println!("{}", plan_table(&pipeline, &plan, &edges));
    }

    if !plan.omitted.is_empty() {
        println!();
        println!(
            "  {} {} node(s) sit on or behind a dependency cycle and will not run:",
            style("!").yellow().bold(),
            plan.omitted.len()
        );
        println!("    {}", plan.omitted.join(", "));
        for cycle in &cycles {
            println!("    cycle: {}", style(cycle.join(" -> ")).dim());
        }
    }
    println!();

    Ok(())
}

fn plan_table(pipeline: &Pipeline, plan: &ExecutionPlan, edges: &[Edge]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("#"),
            Cell::new("Node").fg(Color::Cyan),
            Cell::new("Type"),
            Cell::new("Label"),
            Cell::new("Reads from"),
        ]);

    for (i, id) in plan.order.iter().enumerate() {
        let Some(node) = pipeline.node(id) else {
            continue;
        };
        table.add_row(vec![
            Cell::new(i + 1),
            Cell::new(id),
            Cell::new(&node.kind),
            Cell::new(node.display_label()),
            Cell::new(describe_source(Predecessor::of(id, edges))),
        ]);
    }

    table
}

fn describe_source(predecessor: Predecessor<'_>) -> String {
    match predecessor {
        Predecessor::None => "-".to_string(),
        Predecessor::One(id) => id.to_string(),
        Predecessor::Many { first, ignored } => format!("{first} (+{ignored} ignored)"),
    }
}

fn plan_json(
    pipeline: &Pipeline,
    plan: &ExecutionPlan,
    edges: &[Edge],
    cycles: &[Vec<String>],
    policy: CyclePolicy,
) -> serde_json::Value {
    let order: Vec<_> = plan
        .order
        .iter()
        .filter_map(|id| pipeline.node(id))
        .enumerate()
        .map(|(i, node)| {
            let predecessor = Predecessor::of(&node.id, edges);
            let ignored = match predecessor {
                Predecessor::Many { ignored, .. } => ignored,
                _ => 0,
            };
            serde_json::json!({
                "position": i + 1,
                "id": node.id,
                "type": node.kind,
                "label": node.display_label(),
                "source": predecessor.source(),
                "ignoredSources": ignored,
            })
        })
        .collect();

    serde_json::json!({
        "pipeline": pipeline.name,
        "cyclePolicy": policy,
        "order": order,
        "omitted": plan.omitted,
        "cycles": cycles,
    })
}

// ---------------------------------------------------------------------------
// Validate
// ---------------------------------------------------------------------------

pub async fn handle_validate(file: &Path, out: Output) -> Result<()> {
    let pipeline = load(file).await?;
    let issues = validation_issues(&pipeline);

    if out.json {
        let items: Vec<_> = issues
            .iter()
            .map(|i| serde_json::json!({ "nodeId": i.node_id, "message": i.message }))
            .collect();
        let report = serde_json::json!({
            "pipeline": pipeline.name,
            "valid": issues.is_empty(),
            "issues": items,
        });
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else if !out.quiet {
        println!();
        if issues.is_empty() {
            println!(
                "  {} {} is valid ({} nodes, {} edges)",
                style("✓").green(),
                style(display_name(&pipeline)).cyan(),
                pipeline.nodes.len(),
                pipeline.edges.len()
            );
        } else {
            for issue in &issues {
                println!("  {} {issue}", style("✗").red());
            }
        }
        println!();
    }

    if !issues.is_empty() {
        bail!("{} issue(s) found in '{}'", issues.len(), file.display());
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn load(file: &Path) -> Result<Pipeline> {
    load_pipeline_file(file)
        .await
        .with_context(|| format!("failed to load pipeline '{}'", file.display()))
}

fn display_name(pipeline: &Pipeline) -> &str {
    if pipeline.name.is_empty() {
        "(unnamed)"
    } else {
        &pipeline.name
    }
}
