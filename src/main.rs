//! kvlink - multi-tenant key-value bridge
//!
//! # Commands
//!
//! - `kvlink serve` - Run the bridge (default)
//! - `kvlink check-config` - Validate and print the effective settings

use clap::{Args, Parser, Subcommand, ValueEnum};
use kvlink::kvlink_config::BridgeSettings;
use kvlink::kvlink_nats::{NatsBackend, NatsEventSink};
use kvlink::memory::MemoryBackend;
use kvlink::{
    BridgeContext, EventSink, HostNotification, KvBackend, LifecycleManager, LogSink, load_links,
    telemetry,
};
use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

type AppResult<T> = Result<T, Box<dyn Error>>;

/// kvlink - per-link key-value routing and change-feed relays
#[derive(Parser)]
#[command(name = "kvlink")]
#[command(author = "Pegasus Heavy Industries LLC")]
#[command(version)]
#[command(about = "Multi-tenant key-value bridge")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Settings file (TOML or JSON)
    #[arg(short, long, global = true, env = "KVLINK_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bridge until Ctrl-C
    Serve(ServeArgs),

    /// Validate the settings and print them
    CheckConfig,
}

#[derive(Args, Default)]
struct ServeArgs {
    /// TOML file of links to apply at startup
    #[arg(long)]
    links: Option<PathBuf>,

    /// Backend store implementation
    #[arg(long, value_enum, default_value_t = BackendKind::Nats)]
    backend: BackendKind,
}

#[derive(Clone, Copy, Default, ValueEnum)]
enum BackendKind {
    /// NATS JetStream key-value buckets
    #[default]
    Nats,
    /// In-process buckets; events are logged
    Memory,
}

#[tokio::main]
async fn main() -> AppResult<()> {
    let cli = Cli::parse();
    let settings = BridgeSettings::load(cli.config.as_deref())?;

    match cli.command.unwrap_or(Commands::Serve(ServeArgs::default())) {
        Commands::CheckConfig => {
            println!("{}", serde_json::to_string_pretty(&settings)?);
            Ok(())
        }
        Commands::Serve(args) => {
            telemetry::init_tracing(&settings.log_level, &settings.log_format)?;
            serve(settings, args).await.inspect_err(|e| {
                error!(error = %e, "kvlink stopped with an error");
            })
        }
    }
}

async fn serve(settings: BridgeSettings, args: ServeArgs) -> AppResult<()> {
    let (backend, sink): (Arc<dyn KvBackend>, Arc<dyn EventSink>) = match args.backend {
        BackendKind::Nats => {
            let sink = NatsEventSink::connect(&settings.rpc_url, "kvlink")
                .await?
                .with_subject_prefix(settings.delivery_subject_prefix.clone())
                .with_timeout(settings.delivery_timeout());
            (Arc::new(NatsBackend::new()), Arc::new(sink))
        }
        BackendKind::Memory => (Arc::new(MemoryBackend::new()), Arc::new(LogSink)),
    };

    let ctx = BridgeContext::builder(backend, sink)
        .link_defaults(settings.to_link_defaults())
        .caller_header(settings.caller_header.clone())
        .health_message(settings.health_message.clone())
        .build();
    let lifecycle = Arc::new(LifecycleManager::new(ctx));

    let (notifications, receiver) = mpsc::channel(64);
    let runner = {
        let lifecycle = Arc::clone(&lifecycle);
        tokio::spawn(async move { lifecycle.run(receiver).await })
    };

    if let Some(path) = &args.links {
        let links = load_links(path)?;
        info!(path = %path.display(), count = links.len(), "Applying static links");

        for link in links {
            let peer = link.peer().clone();
            let (notification, outcome) = HostNotification::link_put_with_reply(link);
            notifications.send(notification).await?;
            if let Ok(Err(e)) = outcome.await {
                warn!(identity = %peer, error = %e, "Static link was not applied");
            }
        }
    }

    info!("kvlink ready");
    tokio::signal::ctrl_c().await?;
    info!("Received Ctrl-C, shutting down");

    notifications.send(HostNotification::Shutdown).await?;
    runner.await?;
    Ok(())
}
