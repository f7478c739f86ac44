use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use content_sync_core::duplicate::duplicate;
use content_sync_core::export::export;
use content_sync_core::filter::RowFilter;
use content_sync_core::generic::RowSet;
use content_sync_core::graph::walk;
use content_sync_core::synchronise::{synchronise, Remote, SyncAction};
use std::fs::File;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

use crate::client::ContentApiClient;
use crate::load_config::load_config;

/// CLI for content-sync: push CSV feeds into the content service and read content back out.
#[derive(Parser)]
#[clap(
    name = "content-sync",
    version,
    about = "Synchronise CSV rows into a remote content service, export them back and clone content trees"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create or update one content item per CSV row
    Sync {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
        /// Path to the CSV feed
        #[clap(long)]
        csv: PathBuf,
        /// Only keep rows whose column holds one of the values, e.g. `Status=live,draft`
        #[clap(long = "filter")]
        filters: Vec<String>,
    },
    /// Write every item of the mapped content type as CSV
    Export {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
        /// Output file; stdout when omitted
        #[clap(long)]
        output: Option<PathBuf>,
    },
    /// Print the reference tree below a content item, level by level
    Graph {
        #[clap(long)]
        config: PathBuf,
        /// Id of the root content item
        #[clap(long)]
        id: String,
    },
    /// Copy a content item and everything it references
    Clone {
        #[clap(long)]
        config: PathBuf,
        /// Id of the root content item
        #[clap(long)]
        id: String,
    },
}

/// Extracted async CLI logic entrypoint for integration tests and main()
pub async fn run(cli: Cli) -> Result<()> {
    run_until_cancelled(cli, CancellationToken::new()).await
}

/// Same as [`run`], but a sync stops launching records once `cancel` fires.
pub async fn run_until_cancelled(cli: Cli, cancel: CancellationToken) -> Result<()> {
    // Emit a top-level 'trace_initialised' event at the very start
    tracing::info!("trace_initialised");

    match cli.command {
        Commands::Sync {
            config,
            csv,
            filters,
        } => {
            let mut config = load_config(config)?;
            for raw in &filters {
                let (column, values) = RowFilter::parse_arg(raw)
                    .with_context(|| format!("invalid --filter `{raw}`, expected COLUMN=V1,V2"))?;
                config.sync.filter = config.sync.filter.allow(column, values);
            }
            let file = File::open(&csv).with_context(|| format!("Failed to open CSV {csv:?}"))?;
            let rows = RowSet::from_reader(file)
                .with_context(|| format!("Failed to read CSV {csv:?}"))?;

            let client = ContentApiClient::new(&config.remote)?;
            let remote = Remote {
                content: &client,
                search: &client,
                categories: &client,
                assets: &client,
            };
            println!("Synchronise starting...");
            let report = match synchronise(&config.mapping, &rows, remote, &config.sync, &cancel).await {
                Ok(report) => report,
                Err(e) => {
                    eprintln!("[ERROR] Synchronisation failed: {}", e.chain());
                    return Err(anyhow::Error::new(e));
                }
            };
            println!(
                "Synchronise complete. total={} created={} updated={} unchanged={} failed={} skipped={}",
                report.total,
                report.count(SyncAction::Created),
                report.count(SyncAction::Updated),
                report.count(SyncAction::Unchanged),
                report.failed.len(),
                report.skipped
            );
            for failure in &report.failed {
                eprintln!(
                    "[ERROR] row {} ({}): {}",
                    failure.index,
                    failure.key,
                    failure.error.chain()
                );
            }
            if report.is_success() {
                Ok(())
            } else {
                anyhow::bail!("{} record(s) failed to synchronise", report.failed.len())
            }
        }
        Commands::Export { config, output } => {
            let config = load_config(config)?;
            let client = ContentApiClient::new(&config.remote)?;
            let table = export(&config.mapping, &client, &client).await?;
            match &output {
                Some(path) => {
                    let file = File::create(path)
                        .with_context(|| format!("Failed to create output {path:?}"))?;
                    table.write_csv(file)?;
                    println!("Exported {} rows to {}", table.rows.len(), path.display());
                }
                None => table.write_csv(std::io::stdout().lock())?,
            }
            if table.not_implemented > 0 {
                eprintln!(
                    "[WARN] {} cell(s) left empty: element kind cannot be exported",
                    table.not_implemented
                );
            }
            Ok(())
        }
        Commands::Graph { config, id } => {
            let config = load_config(config)?;
            let client = ContentApiClient::new(&config.remote)?;
            let graph = walk(&client, &id).await?;
            for (depth, ids) in graph.levels() {
                println!("{depth}: {}", ids.join(", "));
            }
            Ok(())
        }
        Commands::Clone { config, id } => {
            let config = load_config(config)?;
            let client = ContentApiClient::new(&config.remote)?;
            let graph = walk(&client, &id).await?;
            let duplication = duplicate(&client, &graph, &config.duplicate).await?;
            println!(
                "Cloned {} item(s); new root {}",
                duplication.ids.len(),
                duplication.root
            );
            Ok(())
        }
    }
}
