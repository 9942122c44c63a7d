//! Chartflow - Entry Point
//!
//! Answers one request from the command line: a chart payload for chart
//! requests, a conversational reply otherwise.

use std::collections::HashMap;
use std::env;
use std::io::Write;
use std::process::ExitCode;

use chart_api::models::{AgentRequest, EventType, ProgressEvent};
use colored::Colorize;
use tracing::{error, info};

use chartflow::app::options::AppOptions;
use chartflow::app::run::run;
use chartflow::filesys::file::File;
use chartflow::logs::init_logging;
use chartflow::storage::layout::StorageLayout;
use chartflow::storage::settings::Settings;
use chartflow::utils::version_info;

const USAGE: &str = "usage: chartflow --message=<text> [--user=<id>] [--session=<id>] [--settings=<path>] [--stream]";

#[tokio::main]
async fn main() -> ExitCode {
    // Parse command line arguments
    let args: Vec<String> = env::args().collect();
    let mut cli_args: HashMap<String, String> = HashMap::new();

    for arg in args.iter().skip(1) {
        if let Some((key, value)) = arg.split_once('=') {
            // Handle --key=value format
            let clean_key = key.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), value.to_string());
        } else if arg.starts_with("--") {
            // Handle standalone flags like --version
            let clean_key = arg.trim_start_matches('-');
            cli_args.insert(clean_key.to_string(), "true".to_string());
        }
    }

    // Print version and exit
    let version = version_info();
    if cli_args.contains_key("version") {
        match serde_json::to_string_pretty(&version) {
            Ok(json) => println!("{}", json),
            Err(_) => println!("{}", version.version),
        }
        return ExitCode::SUCCESS;
    }

    let Some(message) = cli_args.get("message").cloned() else {
        eprintln!("{}: missing --message", "error".red().bold());
        eprintln!("{}", USAGE);
        return ExitCode::FAILURE;
    };

    // Retrieve the settings file
    let layout = StorageLayout::default();
    let settings_file = match cli_args.get("settings") {
        Some(path) => File::new(path),
        None => layout.settings_file(),
    };
    let mut settings = match Settings::load(&settings_file).await {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("{}: unable to read settings file: {}", "error".red().bold(), e);
            return ExitCode::FAILURE;
        }
    };
    settings.apply_env_overrides();

    let options = match AppOptions::from_settings(&settings, layout) {
        Ok(options) => options,
        Err(e) => {
            eprintln!("{}: {}", "error".red().bold(), e);
            return ExitCode::FAILURE;
        }
    };

    // Initialize logging; the guard flushes file logs on exit
    let _log_guard = match init_logging(options.log.clone()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {e}");
            None
        }
    };

    let mut request = AgentRequest::new(
        cli_args.get("user").cloned().unwrap_or_else(|| "cli".to_string()),
        cli_args.get("session").cloned().unwrap_or_else(|| "default".to_string()),
        message,
    );
    request.stream = cli_args.contains_key("stream");

    info!("Running chartflow {} ({})", version.version, version.git_hash);
    let stream = request.stream;
    let response = match run(options, request, stream, print_event).await {
        Ok(response) => response,
        Err(e) => {
            error!("Request failed: {e}");
            eprintln!("{}: {}", "error".red().bold(), e);
            return ExitCode::FAILURE;
        }
    };

    match serde_json::to_string_pretty(&response) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            eprintln!("{}: {}", "error".red().bold(), e);
            return ExitCode::FAILURE;
        }
    }

    if response.state() == Some("failed") {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

/// Progress goes to stderr so stdout carries only the response JSON
fn print_event(event: &ProgressEvent) {
    let data = &event.data;
    match event.event_type {
        EventType::Progress => eprintln!(
            "{} {:>3}% {}",
            format!("[{}]", data.current_state.as_deref().unwrap_or("-")).cyan(),
            data.percentage.unwrap_or(0),
            data.message
        ),
        EventType::Content => {
            if let Some(content) = &data.content {
                eprint!("{}", content.dimmed());
                let _ = std::io::stderr().flush();
            }
        }
        EventType::Done => eprintln!("\n{} {}", "OK".green().bold(), data.message),
        EventType::Error => eprintln!("\n{}: {}", "error".red().bold(), data.message),
    }
}
