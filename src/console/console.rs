use std::error::Error;
use std::io::Write;
use colored::*;
use rustyline::DefaultEditor;

use super::display;
use crate::config::Settings;
use crate::fleet::ServerHandle;
use crate::orchestrator::{QueryMode, QueryRequest, QueryResponse};
use crate::registry::ModelEntry;
use crate::server::{ApiResponse, ScanResponse};

const GREEN: &str = "\x1b[32m";
const CYAN: &str = "\x1b[36m";
const RESET: &str = "\x1b[0m";

fn print_help() {
    println!("\n{CYAN}Triad Console Commands{RESET}");
    println!("{}", "=".repeat(60));
    println!("{GREEN}help{RESET}                 - Show this help message");
    println!("{GREEN}clear{RESET}                - Clear the screen");
    println!("{GREEN}models{RESET}               - List models in the registry");
    println!("{GREEN}fleet{RESET}                - Show server states");
    println!("{GREEN}scan{RESET}                 - Re-run model discovery");
    println!("{GREEN}mode <simple|two-stage>{RESET} - Switch query mode");
    println!("{GREEN}context <on|off>{RESET}     - Toggle document retrieval");
    println!("{GREEN}exit, bye, quit{RESET}      - Leave the console");
    println!("\nAnything else is sent as a query.\n");
}

/// Interactive console against a running triad instance.
///
/// Each query prints the answer followed by its stage-by-stage provenance
/// (tier, model, token counts, timing, context artifacts).
pub async fn run(settings: &Settings) -> Result<(), Box<dyn Error + Send + Sync>> {
    let client = reqwest::Client::new();
    let base = format!(
        "http://{}:{}/api/v1",
        settings.server.host, settings.server.port
    );

    let mut mode = QueryMode::Simple;
    let mut use_context = true;
    print_help();

    let mut rl = DefaultEditor::new()?;
    loop {
        let prompt = format!("[{}] > ", mode);
        let readline = rl.readline(&prompt);

        match readline {
            Ok(input) => {
                let input = input.trim();
                if input.is_empty() {
                    continue;
                }
                let _ = rl.add_history_entry(input);
                let command = input.to_lowercase();

                match command.as_str() {
                    "exit" | "bye" | "quit" => {
                        println!("Goodbye!");
                        break;
                    }
                    "help" => print_help(),
                    "clear" => {
                        print!("\x1B[2J\x1B[1;1H");
                        std::io::stdout().flush()?;
                    }
                    "models" => handle_models(&client, &base).await,
                    "fleet" => handle_fleet(&client, &base).await,
                    "scan" => handle_scan(&client, &base).await,
                    _ => {
                        if let Some(rest) = command.strip_prefix("mode ") {
                            match rest.trim() {
                                "simple" => mode = QueryMode::Simple,
                                "two-stage" => mode = QueryMode::TwoStage,
                                other => {
                                    println!("Unknown mode '{}'. Use simple or two-stage.", other);
                                    continue;
                                }
                            }
                            println!("Query mode set to {}", mode);
                        } else if let Some(rest) = command.strip_prefix("context ") {
                            match rest.trim() {
                                "on" => use_context = true,
                                "off" => use_context = false,
                                other => {
                                    println!("Unknown setting '{}'. Use on or off.", other);
                                    continue;
                                }
                            }
                            println!(
                                "Context retrieval {}",
                                if use_context { "enabled" } else { "disabled" }
                            );
                        } else {
                            handle_query(&client, &base, input, mode, use_context).await;
                        }
                    }
                }
            }
            Err(_) => {
                println!("Goodbye!");
                break;
            }
        }
    }
    Ok(())
}

async fn handle_query(
    client: &reqwest::Client,
    base: &str,
    text: &str,
    mode: QueryMode,
    use_context: bool,
) {
    let request = QueryRequest {
        text: text.to_string(),
        mode,
        use_context,
        max_tokens: 512,
        temperature: 0.7,
    };

    let response = match client
        .post(format!("{base}/query"))
        .json(&request)
        .send()
        .await
    {
        Ok(response) => response,
        Err(e) => {
            println!("{}", format!("Could not reach the server: {}", e).red());
            return;
        }
    };

    match response.json::<ApiResponse<QueryResponse>>().await {
        Ok(body) => match body.data {
            Some(result) => display::display_response(&result),
            None => println!(
                "{}",
                body.message
                    .unwrap_or_else(|| "Query failed".to_string())
                    .red()
            ),
        },
        Err(e) => println!("{}", format!("Unreadable server response: {}", e).red()),
    }
}

async fn handle_models(client: &reqwest::Client, base: &str) {
    match fetch::<Vec<ModelEntry>>(client, &format!("{base}/models")).await {
        Ok(models) => display::display_models_table(&models),
        Err(e) => println!("{}", e.red()),
    }
}

async fn handle_fleet(client: &reqwest::Client, base: &str) {
    match fetch::<Vec<ServerHandle>>(client, &format!("{base}/fleet")).await {
        Ok(handles) => display::display_fleet_table(&handles),
        Err(e) => println!("{}", e.red()),
    }
}

async fn handle_scan(client: &reqwest::Client, base: &str) {
    let response = match client.post(format!("{base}/scan")).send().await {
        Ok(response) => response,
        Err(e) => {
            println!("{}", format!("Could not reach the server: {}", e).red());
            return;
        }
    };
    match response.json::<ApiResponse<ScanResponse>>().await {
        Ok(body) => match body.data {
            Some(summary) => println!(
                "Scan complete: {} new, {} removed, {} failed",
                summary.new_models, summary.removed_models, summary.failed_models
            ),
            None => println!(
                "{}",
                body.message.unwrap_or_else(|| "Scan failed".to_string()).red()
            ),
        },
        Err(e) => println!("{}", format!("Unreadable server response: {}", e).red()),
    }
}

async fn fetch<T: serde::de::DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
) -> Result<T, String> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| format!("Could not reach the server: {}", e))?;
    let body: ApiResponse<T> = response
        .json()
        .await
        .map_err(|e| format!("Unreadable server response: {}", e))?;
    body.data
        .ok_or_else(|| body.message.unwrap_or_else(|| "Request failed".to_string()))
}
