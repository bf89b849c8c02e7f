/*
newsdesk - command line entry point.
Collects the configured sources, runs the research agent and writes today's newsletter.
*/

use anyhow::{Context, Result};
use chrono::{Local, Utc};
use clap::{Parser, Subcommand};
use common::Config;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use newsdesk::delivery::{Mailer, SendGridMailer};
use newsdesk::llm::remote::RemoteCompleter;
use newsdesk::llm::Completer;
use newsdesk::pipeline::{self, Capabilities, GenerateOptions};
use newsdesk::search::serper::SerperSearcher;
use newsdesk::search::Searcher;

#[derive(Parser, Debug)]
#[command(name = "newsdesk", about = "Personalized newsletter generator")]
struct Args {
    /// Path to config.toml
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Override log level (info, debug, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate today's newsletter
    Generate {
        /// Send the newsletter by email once it is saved
        #[arg(long)]
        send_email: bool,

        /// Use the cheaper test model
        #[arg(long)]
        test: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_new(&args.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    // Resolve config paths
    let default_path = PathBuf::from("config.default.toml");
    let override_path = if let Some(p) = args.config {
        if !p.exists() {
            error!(path = ?p, "specified config file not found");
            return Err(anyhow::anyhow!("Config file not found: {}", p.display()));
        }
        Some(p)
    } else {
        let p = PathBuf::from("config.toml");
        if p.exists() { Some(p) } else { None }
    };

    let config = match Config::load_with_defaults(
        if default_path.exists() { Some(default_path.as_path()) } else { None },
        override_path.as_deref(),
    )
    .await
    {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("failed to load configuration: {:#}", e);
            return Err(e);
        }
    };
    info!(default = ?default_path, override = ?override_path, "configuration loaded");

    match args.command {
        Command::Generate { send_email, test } => {
            let options = GenerateOptions { send_email, test_mode: test };
            let capabilities = build_capabilities(&config, options)?;

            let now = Local::now();
            let report = match pipeline::generate(
                &config,
                &capabilities,
                options,
                now.with_timezone(&Utc),
                now.date_naive(),
            )
            .await
            {
                Ok(report) => report,
                Err(e) => {
                    error!("newsletter generation failed: {}", e);
                    return Err(e.into());
                }
            };

            info!(
                path = %report.artifact_path.display(),
                items = report.items,
                failed_sources = report.failed_sources,
                tool_calls = report.tool_calls,
                turns = report.turns,
                "Saved to {}",
                report.artifact_path.display()
            );
            if !report.unresolved.is_empty() {
                warn!("{} citation(s) were dropped as unverified", report.unresolved.len());
            }
            if send_email {
                info!("Delivered to {}", report.delivered.join(", "));
            }
        }
    }
    Ok(())
}

/// Build the production providers from config and environment
fn build_capabilities(config: &Config, options: GenerateOptions) -> Result<Capabilities> {
    let completer = create_completer(config, options.test_mode)?;
    let searcher = create_searcher(config)?;
    let mailer = if options.send_email {
        Some(create_mailer(config)?)
    } else {
        None
    };
    Ok(Capabilities { completer, searcher, mailer })
}

fn create_completer(config: &Config, test_mode: bool) -> Result<Arc<dyn Completer>> {
    let api_key_env = config.llm.api_key_env.as_deref().unwrap_or("OPENROUTER_API_KEY");
    let api_key = std::env::var(api_key_env)
        .with_context(|| format!("LLM API key env var '{}' not set", api_key_env))?;

    let api_url = config
        .llm
        .api_url
        .clone()
        .unwrap_or_else(|| common::DEFAULT_LLM_API_URL.to_string());
    let model = config.model_for(test_mode).to_string();
    info!("LLM provider initialized: {}{}", model, if test_mode { " [TEST MODE]" } else { "" });

    let completer = RemoteCompleter::new(api_url, api_key, model).with_defaults(
        config.llm.timeout_seconds.unwrap_or(180),
        config.llm.max_tokens.unwrap_or(8000),
        config.llm.temperature.unwrap_or(0.7),
    );
    Ok(Arc::new(completer))
}

fn create_searcher(config: &Config) -> Result<Arc<dyn Searcher>> {
    let search = config.search();
    let api_key_env = search.api_key_env.as_deref().unwrap_or("SERPER_API_KEY");
    let api_key = std::env::var(api_key_env).ok();
    if api_key.is_none() {
        warn!("{} is not set; search tools will report as unavailable", api_key_env);
    }

    let searcher = SerperSearcher::new(
        search.api_url.unwrap_or_else(|| common::DEFAULT_SEARCH_API_URL.to_string()),
        search.scrape_url.unwrap_or_else(|| common::DEFAULT_SCRAPE_API_URL.to_string()),
        api_key,
        std::time::Duration::from_secs(search.timeout_seconds.unwrap_or(30)),
    )?;
    Ok(Arc::new(searcher))
}

fn create_mailer(config: &Config) -> Result<Arc<dyn Mailer>> {
    let delivery = config.delivery();
    let api_key_env = delivery.api_key_env.as_deref().unwrap_or("SENDGRID_API_KEY");
    let api_key = std::env::var(api_key_env)
        .with_context(|| format!("mail API key env var '{}' not set", api_key_env))?;
    let api_url = delivery
        .api_url
        .unwrap_or_else(|| common::DEFAULT_MAIL_API_URL.to_string());
    Ok(Arc::new(SendGridMailer::new(api_url, api_key)?))
}
