use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use fleet_sync::db::{HistoryQuery, SyncDirection};
use fleet_sync::plugins::OutputSpec;
use fleet_sync::sync::ExportRequest;
use fleet_sync::{Config, Daemon};

/// Fleetsync - export/import sync engine for device fleets
#[derive(Parser)]
#[command(name = "fleetsync", version, about)]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the sync daemon (default)
    Serve {
        /// Port to listen on (overrides config)
        #[arg(long)]
        port: Option<u16>,
    },
    /// List registered plugins
    Plugins,
    /// Run one export against the local database
    Export {
        /// Plugin name
        #[arg(short, long)]
        plugin: String,
        /// Output format
        #[arg(short, long)]
        format: String,
        /// Destination path (defaults to the export directory)
        #[arg(short, long)]
        output: Option<String>,
        /// Compute the export without writing anything
        #[arg(long)]
        dry_run: bool,
    },
    /// Show a page of execution history
    History {
        /// Show imports instead of exports
        #[arg(long)]
        import: bool,
        /// Only this plugin
        #[arg(long)]
        plugin: Option<String>,
        /// Page number (1-indexed)
        #[arg(long, default_value = "1")]
        page: i64,
        /// Records per page
        #[arg(long, default_value = "20")]
        page_size: i64,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    // Set up logging based on verbosity; RUST_LOG wins when set
    let filter = match cli.verbose {
        0 => "info,fleet_sync=info",
        1 => "info,fleet_sync=debug",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = Config::load();
    tracing::debug!(?config, "loaded configuration");

    match cli.command.unwrap_or(Command::Serve { port: None }) {
        Command::Serve { port } => {
            if let Some(port) = port {
                config.api_server.port = port;
            }
            tracing::info!(port = config.api_server.port, "starting fleet sync");
            Daemon::new(config).await?.run().await?;
        }
        Command::Plugins => cmd_plugins(config).await?,
        Command::Export {
            plugin,
            format,
            output,
            dry_run,
        } => cmd_export(config, plugin, format, output, dry_run).await?,
        Command::History {
            import,
            plugin,
            page,
            page_size,
        } => cmd_history(config, import, plugin.as_deref(), page, page_size).await?,
    }

    Ok(())
}

/// List registered plugins
async fn cmd_plugins(config: Config) -> anyhow::Result<()> {
    let daemon = Daemon::new(config).await?;
    for info in daemon.registry().list().await {
        println!(
            "{:<12} v{:<8} [{}] {}",
            info.name,
            info.version,
            info.formats.join(", "),
            info.description
        );
    }
    daemon.shutdown_plugins().await;
    Ok(())
}

/// Run one export and record it
async fn cmd_export(
    config: Config,
    plugin: String,
    format: String,
    output: Option<String>,
    dry_run: bool,
) -> anyhow::Result<()> {
    let daemon = Daemon::new(config).await?;

    let mut req = ExportRequest {
        plugin_name: plugin,
        format,
        output: OutputSpec {
            destination: output,
            ..OutputSpec::default()
        },
        ..ExportRequest::default()
    };
    req.options.dry_run = dry_run;

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    let outcome = daemon.engine().export(&req, &cancel).await;
    if let Ok(result) = &outcome {
        daemon.engine().record_export(result, "cli");
    }
    daemon.shutdown_plugins().await;

    let result = outcome?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    if !result.success {
        anyhow::bail!(
            "export failed: {}",
            result.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}

/// Print a page of history
async fn cmd_history(
    config: Config,
    import: bool,
    plugin: Option<&str>,
    page: i64,
    page_size: i64,
) -> anyhow::Result<()> {
    let daemon = Daemon::new(config).await?;
    let direction = if import {
        SyncDirection::Import
    } else {
        SyncDirection::Export
    };
    let query = HistoryQuery::new(Some(page), Some(page_size)).with_plugin(plugin);
    let history = daemon.engine().history(direction, &query)?;

    println!(
        "{direction} history: page {}/{} ({} total)",
        history.page,
        history.total_pages.max(1),
        history.total
    );
    for record in &history.items {
        let e = &record.entry;
        println!(
            "{:>5}  {}  {:<10} {:<6} {:<7} records={:<6} by={}",
            record.id,
            e.created_at.format("%Y-%m-%d %H:%M:%S"),
            e.plugin_name,
            e.format,
            if e.success { "ok" } else { "failed" },
            e.record_count,
            e.requester
        );
    }

    daemon.shutdown_plugins().await;
    Ok(())
}
