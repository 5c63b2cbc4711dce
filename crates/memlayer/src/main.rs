//! `memlayer` command-line interface.

use anyhow::{Context, bail};
use clap::{Args, Parser, Subcommand};
use log::{debug, info};
use memlayer::config::MemlayerConfig;
use memlayer::core::{
    MemoryService, NewMessage, RetentionPolicy, SearchFilters, TenantScope, WILDCARD_TENANT,
};
use memlayer::{MemoryLayer, init_logging};
use serde_json::Value;
use std::path::PathBuf;
use uuid::Uuid;

/// Memory ranking and lifecycle engine for conversational memory stores.
#[derive(Parser)]
#[command(name = "memlayer", version)]
struct Cli {
    /// Optional path to a memlayer.json5 config file; skips layered loading
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Score, embed, and store a message
    Ingest(IngestArgs),
    /// Fetch one stored message by id
    Get {
        #[arg(long)]
        id: Uuid,
    },
    /// Rank a tenant's messages against a text query
    Search(SearchArgs),
    /// Archive and purge messages per retention policy
    Retention(RetentionArgs),
    /// Embed messages still marked pending
    Drain {
        #[arg(long, default_value_t = 100)]
        limit: usize,
    },
    /// Run the embedding worker and retention scheduler until interrupted
    Serve,
}

#[derive(Args)]
struct IngestArgs {
    #[arg(long)]
    tenant: String,
    #[arg(long)]
    conversation: String,
    /// user, assistant, or system
    #[arg(long, default_value = "user")]
    role: String,
    #[arg(long)]
    content: String,
    /// Explicit importance in [0, 1]
    #[arg(long)]
    importance: Option<f32>,
    /// Metadata as a JSON object
    #[arg(long)]
    metadata: Option<String>,
}

#[derive(Args)]
struct SearchArgs {
    #[arg(long)]
    tenant: String,
    #[arg(long)]
    query: String,
    #[arg(long)]
    conversation: Option<String>,
    #[arg(long)]
    top_k: Option<usize>,
    #[arg(long)]
    importance_min: Option<f32>,
}

#[derive(Args)]
struct RetentionArgs {
    /// Tenant id, or `*` for every tenant
    #[arg(long, default_value = WILDCARD_TENANT)]
    tenant: String,
    /// Report what would change without writing
    #[arg(long)]
    dry_run: bool,
    /// Override: archive messages older than this many days
    #[arg(long, requires_all = ["importance_threshold", "purge_after_days"])]
    max_age_days: Option<u32>,
    #[arg(long, requires_all = ["max_age_days", "purge_after_days"])]
    importance_threshold: Option<f32>,
    #[arg(long, requires_all = ["max_age_days", "importance_threshold"])]
    purge_after_days: Option<u32>,
}

impl RetentionArgs {
    fn policy_override(&self) -> Option<RetentionPolicy> {
        Some(RetentionPolicy {
            max_age_days: self.max_age_days?,
            importance_threshold: self.importance_threshold?,
            purge_after_days: self.purge_after_days?,
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;
    init_logging(&config.logging);
    debug!(
        "starting memlayer (store={:?}, embedding={:?})",
        config.store.provider, config.embedding.provider
    );

    let mut layer = MemoryLayer::from_config(&config).context("failed to build memory layer")?;
    let service = layer.service().clone();
    match cli.command {
        Command::Ingest(args) => ingest(&service, args).await?,
        Command::Get { id } => {
            let message = service.get_message(id).await.context("get failed")?;
            print_json(&message)?;
        }
        Command::Search(args) => search(&service, args).await?,
        Command::Retention(args) => retention(&service, args).await?,
        Command::Drain { limit } => {
            let drained = service
                .drain_pending(limit)
                .await
                .context("drain failed")?;
            print_json(&serde_json::json!({ "drained": drained }))?;
        }
        Command::Serve => {
            layer.start();
            info!("memlayer serving; press ctrl-c to stop");
            tokio::signal::ctrl_c()
                .await
                .context("failed to listen for ctrl-c")?;
        }
    }
    layer.shutdown().await;
    Ok(())
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<MemlayerConfig> {
    if let Some(path) = path {
        return MemlayerConfig::load_from_path(path).context("failed to load config");
    }
    let cwd = std::env::current_dir().context("cwd")?;
    let layered = MemlayerConfig::load_layered(&cwd).context("failed to load layered config")?;
    debug!("layered config loaded (layers={})", layered.layers.len());
    Ok(layered.config)
}

async fn ingest(service: &MemoryService, args: IngestArgs) -> anyhow::Result<()> {
    let metadata = match args.metadata.as_deref() {
        Some(raw) => {
            let value: Value = serde_json::from_str(raw).context("metadata is not valid JSON")?;
            if !value.is_object() {
                bail!("metadata must be a JSON object");
            }
            Some(value)
        }
        None => None,
    };
    let message = service
        .ingest(NewMessage {
            metadata,
            importance_override: args.importance,
            ..NewMessage::new(args.tenant, args.conversation, args.role, args.content)
        })
        .await
        .context("ingest failed")?;
    print_json(&message)
}

async fn search(service: &MemoryService, args: SearchArgs) -> anyhow::Result<()> {
    let filters = SearchFilters {
        conversation_id: args.conversation,
        importance_min: args.importance_min,
        ..SearchFilters::default()
    };
    let results = service
        .search_text(&args.tenant, &args.query, &filters, args.top_k)
        .await
        .context("search failed")?;
    print_json(&results)
}

async fn retention(service: &MemoryService, args: RetentionArgs) -> anyhow::Result<()> {
    let policy_override = args.policy_override();
    debug!(
        "retention requested (tenant={}, dry_run={}, override={})",
        args.tenant,
        args.dry_run,
        policy_override.is_some()
    );
    let report = service
        .run_retention(&TenantScope::parse(&args.tenant), policy_override, args.dry_run)
        .await
        .context("retention failed")?;
    print_json(&report)
}

fn print_json(value: &impl serde::Serialize) -> anyhow::Result<()> {
    let rendered = serde_json::to_string_pretty(value).context("failed to render output")?;
    println!("{rendered}");
    Ok(())
}
