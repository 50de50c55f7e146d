//! Careloop: bounded ReAct tool-use runtime.
//!
//! Usage:
//!   careloop init                 Write a default config
//!   careloop ask "<question>"     Run once and print the answer
//!   careloop stream "<question>"  Run once and print SSE frames as they arrive
//!   careloop serve                Serve the SSE endpoint over HTTP

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use futures::StreamExt;
use std::io::Write;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use careloop::agent::system_prompt::DEFAULT_SYSTEM_PROMPT;
use careloop::agent::{ReActController, RunRequest, TracingSink};
use careloop::config::{self, CareloopConfig};
use careloop::fallback::MetricsCollector;
use careloop::llm::HttpGateway;
use careloop::stream::{self, http::AppState, http::RunDefaults};
use careloop::tools::{medication, ToolSet};
use careloop::types::*;

const CONFIG_FILE: &str = "careloop.toml";

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(name = "careloop")]
#[command(version = "0.1.0")]
#[command(about = "Bounded ReAct tool-use runtime with SSE streaming")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to careloop home directory [default: ~/.careloop].
    #[arg(long)]
    home: Option<String>,

    /// Log level (debug, info, warn, error). Overrides the config file.
    #[arg(long)]
    log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a default config file.
    Init {
        /// Overwrite an existing config.
        #[arg(long)]
        force: bool,
    },

    /// Answer one question and print the result.
    Ask {
        question: String,

        #[command(flatten)]
        run: RunArgs,

        /// Print the full result as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Answer one question, printing SSE frames as they are produced.
    Stream {
        question: String,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Serve the streaming endpoint over HTTP.
    Serve {
        /// Listen address. Overrides the config file.
        #[arg(long)]
        addr: Option<String>,
    },
}

#[derive(clap::Args, Debug)]
struct RunArgs {
    /// Iteration budget for this run.
    #[arg(long)]
    max_iterations: Option<u32>,

    /// Grounding verification mode (off, quick).
    #[arg(long)]
    grounding: Option<String>,
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Resolve home directory
    let home_dir: PathBuf = match &cli.home {
        Some(home) => config::resolve_path(home),
        None => config::default_home_dir(),
    };
    let config_path = home_dir.join(CONFIG_FILE);
    let cfg = config::load_config(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;

    // Initialize logging
    let level = cli.log_level.clone().unwrap_or_else(|| cfg.log_level.clone());
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Init { force } => cmd_init(&config_path, force),
        Commands::Ask {
            question,
            run,
            json,
        } => cmd_ask(cfg, question, run, json).await,
        Commands::Stream { question, run } => cmd_stream(cfg, question, run).await,
        Commands::Serve { addr } => cmd_serve(cfg, addr).await,
    }
}

// ---------------------------------------------------------------------------
// Command implementations
// ---------------------------------------------------------------------------

fn cmd_init(config_path: &Path, force: bool) -> Result<()> {
    if config_path.exists() && !force {
        println!(
            "{} Config already exists at {} (use --force to overwrite)",
            "!!!".yellow().bold(),
            config_path.display()
        );
        return Ok(());
    }
    config::save_config(&CareloopConfig::default(), config_path)?;
    println!(
        "{} Wrote default config to {}",
        ">>>".green().bold(),
        config_path.display()
    );
    println!("    Set gateway_api_key (or CARELOOP_API_KEY) before running.");
    Ok(())
}

async fn cmd_ask(cfg: CareloopConfig, question: String, args: RunArgs, json: bool) -> Result<()> {
    let runtime = bootstrap(&cfg)?;
    let request = runtime.request(&cfg, question, &args)?;
    let cancel = cancel_on_ctrl_c();

    let result = runtime.controller.run(&request, &cancel).await;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    println!();
    for line in &result.reasoning_trace {
        println!("  {}", line.dimmed());
    }
    println!();
    println!("{} {}", "Answer:".bold(), result.answer);
    println!();
    println!(
        "  {} {}  {} {}  {} {}",
        "status:".bold(),
        colorize_status(result.status),
        "iterations:".bold(),
        result.iterations,
        "tools:".bold(),
        if result.tools_used.is_empty() {
            "-".to_string()
        } else {
            result.tools_used.join(", ")
        }
    );
    if !result.ungrounded_claims().is_empty() {
        println!(
            "  {} {}",
            "unverified figures:".yellow().bold(),
            result.ungrounded_claims().join(", ")
        );
    }
    Ok(())
}

async fn cmd_stream(cfg: CareloopConfig, question: String, args: RunArgs) -> Result<()> {
    let runtime = bootstrap(&cfg)?;
    let request = runtime.request(&cfg, question, &args)?;
    let cancel = cancel_on_ctrl_c();

    let handle = stream::spawn_run(
        runtime.controller.clone(),
        request,
        cfg.stream_buffer,
        cancel.child_token(),
    );
    let mut frames = std::pin::pin!(stream::sse_frames(handle));
    let mut stdout = std::io::stdout();
    while let Some(frame) = frames.next().await {
        stdout.write_all(frame.as_bytes())?;
        stdout.flush()?;
    }
    Ok(())
}

async fn cmd_serve(cfg: CareloopConfig, addr: Option<String>) -> Result<()> {
    let runtime = bootstrap(&cfg)?;
    let addr: SocketAddr = addr
        .as_deref()
        .unwrap_or(&cfg.listen_addr)
        .parse()
        .context("Invalid listen address")?;

    let shutdown = CancellationToken::new();
    let state = AppState {
        controller: runtime.controller.clone(),
        tools: runtime.tools.clone(),
        metrics: runtime.metrics.clone(),
        defaults: RunDefaults {
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
            max_iterations: cfg.max_iterations,
            grounding_mode: cfg.grounding_mode,
        },
        stream_buffer: cfg.stream_buffer,
        shutdown: shutdown.clone(),
    };

    println!(
        "{} Serving on http://{} (model: {})",
        ">>>".green().bold(),
        addr,
        cfg.model,
    );

    let server = tokio::spawn(stream::http::serve(addr, state));

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;

    println!("\n{} Shutting down gracefully...", "<<<".red().bold());
    shutdown.cancel();

    let shutdown_timeout = tokio::time::Duration::from_secs(10);
    match tokio::time::timeout(shutdown_timeout, server).await {
        Ok(Ok(result)) => result?,
        Ok(Err(e)) => warn!("Server task join error: {}", e),
        Err(_) => warn!("Server did not stop within {:?}", shutdown_timeout),
    }

    info!("Shutdown complete");
    Ok(())
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

struct Runtime {
    controller: Arc<ReActController>,
    tools: Arc<ToolSet>,
    metrics: Arc<MetricsCollector>,
}

impl Runtime {
    fn request(
        &self,
        cfg: &CareloopConfig,
        question: String,
        args: &RunArgs,
    ) -> Result<RunRequest> {
        if question.trim().is_empty() {
            bail!("Question must not be empty");
        }
        let grounding = match args.grounding.as_deref() {
            None => cfg.grounding_mode,
            Some(raw) => parse_grounding(raw)?,
        };
        Ok(RunRequest::new(question, self.tools.clone())
            .with_max_iterations(args.max_iterations.unwrap_or(cfg.max_iterations))
            .with_grounding_mode(grounding))
    }
}

/// Build the gateway, tools and controller from config.
fn bootstrap(cfg: &CareloopConfig) -> Result<Runtime> {
    let api_key = std::env::var("CARELOOP_API_KEY").unwrap_or_else(|_| cfg.gateway_api_key.clone());
    if api_key.is_empty() {
        eprintln!(
            "{} No gateway API key configured. Set gateway_api_key in {} or CARELOOP_API_KEY.",
            "Error:".red().bold(),
            CONFIG_FILE
        );
        std::process::exit(1);
    }

    let gateway = HttpGateway::new(&cfg.gateway_url, &api_key, &cfg.model)
        .with_max_tokens(cfg.max_tokens)
        .with_temperature(cfg.temperature)
        .with_timeout(std::time::Duration::from_secs(cfg.model_timeout_secs.max(1)));

    let metrics = Arc::new(MetricsCollector::new(cfg.metrics_capacity));
    let tools = Arc::new(ToolSet::new(medication::medication_tools(
        metrics.clone(),
        cfg.label_service(),
        cfg.strategy_timeout(),
    ))?);

    let controller = ReActController::new(Arc::new(gateway), cfg.agent_options())
        .with_trace_sink(Arc::new(TracingSink));

    info!(
        "Runtime ready: model {}, {} tools, metrics capacity {}",
        cfg.model,
        tools.len(),
        metrics.capacity()
    );

    Ok(Runtime {
        controller: Arc::new(controller),
        tools,
        metrics,
    })
}

/// A token cancelled on the first Ctrl+C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("\n{} Cancelling run...", "<<<".red().bold());
            token.cancel();
        }
    });
    cancel
}

fn parse_grounding(raw: &str) -> Result<GroundingMode> {
    match raw.to_ascii_lowercase().as_str() {
        "off" | "none" => Ok(GroundingMode::Off),
        "quick" => Ok(GroundingMode::Quick),
        other => bail!("Unknown grounding mode '{}' (expected off or quick)", other),
    }
}

fn colorize_status(status: RunStatus) -> String {
    match status {
        RunStatus::Done => "done".green().to_string(),
        RunStatus::MaxIterations => "max_iterations".yellow().to_string(),
        RunStatus::Failed => "failed".red().bold().to_string(),
    }
}
