//! prompt-dispatch CLI — 加载配置与一批请求，执行调度并输出结果
//!
//! Usage:
//!   prompt-dispatch-cli run --config <yaml> --requests <json> [--out <dir>]
//!   prompt-dispatch-cli providers --config <yaml>
//!
//! The requests file is either a JSON array of requests or an object with
//! `template_id`, `template_name`, `placeholders` and `requests`.

use anyhow::{bail, Context};
use prompt_dispatch::progress::LoggingProgressSink;
use prompt_dispatch::storage::{GenerationResult, JsonFileResultStore, ResultStore};
use prompt_dispatch::{DispatchConfig, DispatcherBuilder, Request};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum BatchFile {
    Templated {
        #[serde(default)]
        template_id: String,
        #[serde(default)]
        template_name: String,
        #[serde(default)]
        placeholders: BTreeMap<String, String>,
        requests: Vec<Request>,
    },
    Plain(Vec<Request>),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        print_usage();
        std::process::exit(1);
    }

    match args[1].as_str() {
        "run" => cmd_run(&args[2..]).await,
        "providers" => cmd_providers(&args[2..]).await,
        "version" | "--version" | "-V" => {
            println!("prompt-dispatch-cli {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    }
}

fn print_usage() {
    println!(
        r#"prompt-dispatch-cli — 批量提示词调度工具

USAGE:
    prompt-dispatch-cli <COMMAND> [OPTIONS]

COMMANDS:
    run --config <yaml> --requests <json> [--out <dir>]
                                Dispatch a batch and print the responses as JSON
    providers --config <yaml>   Show configured providers and their limits
    version                     Show version information
    help                        Show this help message

ENVIRONMENT:
    RUST_LOG                            Log filter (default: info)
    PROMPT_DISPATCH_MAX_ATTEMPTS        Override max_attempts
    PROMPT_DISPATCH_ATTEMPT_TIMEOUT_MS  Override attempt_timeout_ms (0 disables)
    <PROVIDER_ID>_API_KEY               API key fallback per provider"#
    );
}

fn flag(args: &[String], name: &str) -> Option<PathBuf> {
    args.iter()
        .position(|a| a == name)
        .and_then(|i| args.get(i + 1))
        .map(PathBuf::from)
}

async fn load_config(args: &[String]) -> anyhow::Result<DispatchConfig> {
    let Some(path) = flag(args, "--config") else {
        bail!("missing --config <yaml>");
    };
    let config = DispatchConfig::from_path(&path)
        .await
        .with_context(|| format!("loading {}", path.display()))?;
    Ok(config.with_env_overrides())
}

async fn cmd_providers(args: &[String]) -> anyhow::Result<()> {
    let config = load_config(args).await?;
    println!(
        "{:<16} {:<10} {:>6} {:>6} {:>9}",
        "PROVIDER", "PROTOCOL", "RPM", "CONC", "DELAY_MS"
    );
    for (id, p) in &config.providers {
        println!(
            "{:<16} {:<10} {:>6} {:>6} {:>9}",
            id,
            format!("{:?}", p.protocol).to_lowercase(),
            p.requests_per_minute,
            p.max_concurrent,
            p.retry_delay_ms
        );
    }
    Ok(())
}

async fn cmd_run(args: &[String]) -> anyhow::Result<()> {
    let config = load_config(args).await?;
    let Some(requests_path) = flag(args, "--requests") else {
        bail!("missing --requests <json>");
    };
    let raw = tokio::fs::read(&requests_path)
        .await
        .with_context(|| format!("reading {}", requests_path.display()))?;
    let batch: BatchFile = serde_json::from_slice(&raw)
        .with_context(|| format!("parsing {}", requests_path.display()))?;
    let (template_id, template_name, placeholders, requests) = match batch {
        BatchFile::Templated {
            template_id,
            template_name,
            placeholders,
            requests,
        } => (template_id, template_name, placeholders, requests),
        BatchFile::Plain(requests) => (String::new(), String::new(), BTreeMap::new(), requests),
    };

    let dispatcher = DispatcherBuilder::from_config(&config)?.build()?;

    let on_interrupt = dispatcher.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("interrupt received, cancelling outstanding requests");
            on_interrupt.cancel_requests();
        }
    });

    let responses = dispatcher
        .send_requests(requests, Arc::new(LoggingProgressSink::new("progress")))
        .await?;
    dispatcher.close().await;

    let total = responses.len();
    let failed = responses.values().filter(|r| r.is_error()).count();
    let ordered: BTreeMap<_, _> = responses.iter().collect();
    println!("{}", serde_json::to_string_pretty(&ordered)?);

    if let Some(dir) = flag(args, "--out") {
        let store = JsonFileResultStore::open(&dir).await?;
        let result =
            GenerationResult::from_batch(template_id, template_name, placeholders, responses);
        store.save_result(&result).await?;
        eprintln!("saved {} to {}", result.id, dir.display());
    }

    if failed > 0 {
        eprintln!("{failed} of {total} requests failed");
        std::process::exit(2);
    }
    Ok(())
}
