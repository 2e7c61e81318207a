use colored::*;
use comfy_table::{Attribute, Cell, CellAlignment, ContentArrangement, Table};

use crate::fleet::ServerHandle;
use crate::orchestrator::QueryResponse;
use crate::registry::ModelEntry;

/// Renders the model registry as a table.
pub fn display_models_table(models: &[ModelEntry]) {
    if models.is_empty() {
        println!("{}", "No models found in registry".yellow());
        return;
    }

    let mut table = Table::new();
    table
        .set_header(vec![
            header_cell("Model"),
            header_cell("Name"),
            header_cell("Architecture"),
            header_cell("Size"),
            header_cell("Quantization"),
            header_cell("Tier"),
            header_cell("Enabled"),
            header_cell("Port"),
        ])
        .load_preset(comfy_table::presets::UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);

    for model in models {
        let port = model
            .assigned_port
            .map(|p| p.to_string())
            .unwrap_or_else(|| "-".to_string());
        table.add_row(vec![
            Cell::new(&model.model_id).fg(comfy_table::Color::Yellow),
            Cell::new(&model.name).fg(comfy_table::Color::Green),
            Cell::new(&model.architecture)
                .fg(comfy_table::Color::Magenta)
                .set_alignment(CellAlignment::Center),
            Cell::new(&model.size_label)
                .fg(comfy_table::Color::Blue)
                .set_alignment(CellAlignment::Center),
            Cell::new(&model.quantization)
                .fg(comfy_table::Color::White)
                .set_alignment(CellAlignment::Center),
            Cell::new(model.tier.to_string())
                .fg(comfy_table::Color::Cyan)
                .set_alignment(CellAlignment::Center),
            Cell::new(if model.enabled { "yes" } else { "no" })
                .set_alignment(CellAlignment::Center),
            Cell::new(port).set_alignment(CellAlignment::Right),
        ]);
    }

    println!("\n{table}");
    println!("{}", format!("Total models: {}", models.len()).bright_green());
}

/// Renders the fleet's handle states as a table.
pub fn display_fleet_table(handles: &[ServerHandle]) {
    if handles.is_empty() {
        println!("{}", "No servers in the fleet".yellow());
        return;
    }

    let mut table = Table::new();
    table
        .set_header(vec![
            header_cell("Model"),
            header_cell("Tier"),
            header_cell("Port"),
            header_cell("State"),
            header_cell("Last health check"),
        ])
        .load_preset(comfy_table::presets::UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);

    for handle in handles {
        let state_color = match handle.state {
            crate::fleet::ServerState::Ready => comfy_table::Color::Green,
            crate::fleet::ServerState::Starting => comfy_table::Color::Yellow,
            crate::fleet::ServerState::Error => comfy_table::Color::Red,
            crate::fleet::ServerState::Stopped => comfy_table::Color::DarkGrey,
        };
        let last_check = handle
            .last_health_check
            .map(|t| t.format("%H:%M:%S").to_string())
            .unwrap_or_else(|| "-".to_string());
        table.add_row(vec![
            Cell::new(&handle.model_id).fg(comfy_table::Color::Yellow),
            Cell::new(handle.tier.to_string())
                .fg(comfy_table::Color::Cyan)
                .set_alignment(CellAlignment::Center),
            Cell::new(handle.port.to_string()).set_alignment(CellAlignment::Right),
            Cell::new(handle.state.to_string())
                .fg(state_color)
                .set_alignment(CellAlignment::Center),
            Cell::new(last_check).fg(comfy_table::Color::DarkGrey),
        ]);
    }

    println!("\n{table}");
}

/// Prints the answer followed by its per-stage provenance.
pub fn display_response(response: &QueryResponse) {
    println!("\n{}", response.answer.trim());

    println!(
        "\n{} {:?} (score {:.2}), {} total",
        "complexity:".bright_black(),
        response.assessment.bucket,
        response.assessment.score,
        format!("{}ms", response.total_elapsed_ms).cyan(),
    );

    for stage in &response.stages {
        let mut line = format!(
            "  {} {} on {} ({}): {}+{} tokens, {}ms",
            "stage".bright_black(),
            stage.stage.to_string().green(),
            stage.tier.to_string().cyan(),
            stage.model_id.yellow(),
            stage.prompt_tokens,
            stage.completion_tokens,
            stage.elapsed_ms,
        );
        if stage.cache_hit {
            line.push_str(&format!(" {}", "[cache hit]".bright_black()));
        }
        if !stage.artifacts.is_empty() {
            line.push_str(&format!(
                " {}",
                format!("[{} context chunks]", stage.artifacts.len()).bright_black()
            ));
        }
        if stage.retrieval_degraded {
            line.push_str(&format!(" {}", "[retrieval degraded]".yellow()));
        }
        println!("{line}");
        if let Some(mismatch) = &stage.model_mismatch {
            println!("    {}", mismatch.yellow());
        }
    }
}

fn header_cell(text: &str) -> Cell {
    Cell::new(text)
        .fg(comfy_table::Color::Cyan)
        .add_attribute(Attribute::Bold)
}
