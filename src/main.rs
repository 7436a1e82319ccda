//! Camaleao - CLI Entry Point

use anyhow::{Context, Result};
use camaleao::definition::InvocationRequest;
use camaleao::matcher::{ResponseSelector, RouteQuery};
use camaleao::{MockServerConfig, TemplateService};
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(
    name = "camaleao",
    about = "Mock API templates - context validation, route matching and response rendering",
    version
)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "camaleao.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'L', long, default_value = "info")]
    log_level: Level,

    /// Print default configuration and exit
    #[arg(long)]
    print_config: bool,

    /// Validate configuration (including every template) and exit
    #[arg(long)]
    validate: bool,

    /// Render a mock call, as USER/VERSION/NAME/METHOD
    #[arg(long, value_name = "ROUTE")]
    invoke: Option<String>,

    /// Print the template stored for USER/VERSION/NAME/METHOD
    #[arg(long, value_name = "ROUTE", conflicts_with = "invoke")]
    show: Option<String>,

    /// Response to render, by response_id
    #[arg(long, conflicts_with = "response_index")]
    response_id: Option<String>,

    /// Response to render, by position in the template
    #[arg(long)]
    response_index: Option<usize>,

    /// Request body passed to the invocation
    #[arg(long)]
    body: Option<String>,
}

fn parse_route(route: &str) -> Result<RouteQuery> {
    let parts: Vec<&str> = route.trim_matches('/').split('/').collect();
    match parts.as_slice() {
        [user, version, name, method] => Ok(RouteQuery::new(*user, *name, *method, *version)),
        _ => anyhow::bail!("Route must be USER/VERSION/NAME/METHOD, got {:?}", route),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_max_level(args.log_level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if args.print_config {
        let default_config = include_str!("../demos/default-config.yaml");
        println!("{}", default_config);
        return Ok(());
    }

    let config = if args.config.exists() {
        info!(path = ?args.config, "Loading configuration");
        MockServerConfig::from_file(&args.config)
            .with_context(|| format!("Failed to load {:?}", args.config))?
    } else if args.validate {
        anyhow::bail!("Configuration file not found: {:?}", args.config);
    } else {
        info!("Using default configuration (no templates)");
        MockServerConfig::default()
    };

    let service = TemplateService::in_memory(config.settings.clone());
    let seeded = service.seed(&config.users).await.map_err(|e| {
        anyhow::anyhow!(
            "Configuration rejected ({}): {}",
            e.status_code(),
            e.messages().join("; ")
        )
    })?;

    if args.validate {
        println!(
            "Configuration is valid ({} templates, {} standalone responses)",
            seeded,
            config.response_count()
        );
        return Ok(());
    }

    if let Some(route) = &args.show {
        let query = parse_route(route)?;
        let view = service
            .get_template(&query)
            .await
            .map_err(|e| anyhow::anyhow!(e.messages().join("; ")))?;
        println!("{}", serde_json::to_string_pretty(&view)?);
        return Ok(());
    }

    if let Some(route) = &args.invoke {
        let query = parse_route(route)?;
        let selector = match (&args.response_id, args.response_index) {
            (Some(id), _) => ResponseSelector::ResponseId(id.clone()),
            (None, Some(index)) => ResponseSelector::Index(index),
            (None, None) => anyhow::bail!("--invoke requires --response-id or --response-index"),
        };
        let request = args
            .body
            .as_deref()
            .map(InvocationRequest::from_raw_body)
            .unwrap_or_default();

        let rendered = service
            .invoke(&query, &selector, request)
            .await
            .map_err(|e| anyhow::anyhow!("{} {}", e.status_code(), e.messages().join("; ")))?;
        println!("{}", serde_json::to_string_pretty(&rendered)?);
        return Ok(());
    }

    info!(templates = seeded, "Nothing to do; use --invoke, --show or --validate");
    Ok(())
}
