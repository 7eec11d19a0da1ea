//! Zentinel Modifier CLI entry point.
//!
//! Validates a modifier configuration and previews its effect on a sample
//! request. The middleware itself is embedded by the host runtime.

use anyhow::{Context, Result};
use bytes::Bytes;
use clap::Parser;
use http_body_util::BodyExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use zentinel_agent_modifier::types::full;
use zentinel_agent_modifier::{handler_fn, Modifier, ModifierConfig, Request, ResponseRecorder};

#[derive(Parser, Debug)]
#[command(name = "zentinel-agent-modifier")]
#[command(
    author,
    version,
    about = "Template-driven request/response modifier for Zentinel"
)]
struct Args {
    /// Configuration file path (YAML or JSON)
    #[arg(short, long, env = "MODIFIER_CONFIG")]
    config: Option<PathBuf>,

    /// Run a request with this JSON body through the modifier and print
    /// the result. The downstream handler echoes the body it receives.
    #[arg(long)]
    sample: Option<PathBuf>,

    /// Request target used with --sample
    #[arg(long, default_value = "/")]
    uri: String,

    /// Output logs as JSON
    #[arg(long)]
    json_logs: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Print example configuration and exit.
    #[arg(long)]
    example_config: bool,
}

fn print_example_config() {
    let example = r#"# Modifier Configuration Example

settings:
  # Maximum request body size to buffer (bytes)
  max_body_size: 10485760  # 10MB

# Request body template. Input is available as .request.api.body
request: |
  {
    "question": "[[ .request.api.body.ask ]]",
    "user": "[[ default "anonymous" .request.api.body.user ]]",
    "asked_at": "[[ .context.timestamp ]]"
  }

# Response body templates keyed by status code. Unlisted statuses pass through.
response:
  200: |
    {
      "answer": "[[ .response.body.text ]]",
      "question": "[[ .request.modified.body.question ]]",
      "request_id": "[[ .context.request_id ]]"
    }
  404: '{"error": "not found", "path": "[[ .request.path ]]"}'

# Request header templates. Empty results are not written.
headers:
  X-Request-ID: "req_[[ .context.unixtime ]]"
  Authorization: '[[ if eq (index .request.headers "x-api-key") "sk-live" ]]Bearer sk-live[[ else ]]Bearer sk-default[[ end ]]'

# Query parameter templates
query:
  transform:
    question_id: "[[ .request.query.ask_id ]]_[[ .context.unixtime ]]"
"#;
    println!("{}", example);
}

fn load_config(path: &Path) -> Result<ModifierConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let config = if path
        .extension()
        .is_some_and(|e| e == "yaml" || e == "yml")
    {
        serde_yaml::from_str(&content)?
    } else {
        serde_json::from_str(&content)?
    };
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    if args.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .init();
    }

    if args.example_config {
        print_example_config();
        return Ok(());
    }

    let config = match &args.config {
        Some(path) => load_config(path)?,
        None => ModifierConfig::default(),
    };

    let echo = handler_fn(|req: Request| async move {
        let body = match req.into_body().collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(_) => Bytes::new(),
        };
        let mut response = http::Response::new(body);
        response.headers_mut().insert(
            http::header::CONTENT_TYPE,
            http::HeaderValue::from_static("application/json"),
        );
        response
    });

    let modifier = Modifier::new(&config, "cli", Arc::new(echo))
        .context("Invalid modifier configuration")?;

    info!(
        config = ?args.config,
        headers = modifier.header_templates(),
        query = modifier.query_templates(),
        request_template = modifier.has_request_template(),
        response_templates = ?modifier.response_statuses(),
        "Configuration is valid"
    );

    let Some(sample) = &args.sample else {
        return Ok(());
    };

    let body = std::fs::read(sample)
        .with_context(|| format!("Failed to read sample body: {}", sample.display()))?;
    let req = http::Request::builder()
        .method(http::Method::POST)
        .uri(&args.uri)
        .header(http::header::CONTENT_TYPE, "application/json")
        .body(full(body))
        .context("Invalid sample request")?;

    let mut recorder = ResponseRecorder::new();
    modifier.handle(req, &mut recorder).await;

    let response = recorder.into_response();
    println!("{}", response.status());
    for (name, value) in response.headers() {
        println!("{}: {}", name, value.to_str().unwrap_or("<binary>"));
    }
    println!();
    println!("{}", String::from_utf8_lossy(response.body()));

    Ok(())
}
