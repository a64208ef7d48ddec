//! # AASX Index CLI (`aasx-index`)
//!
//! ## Usage
//!
//! ```bash
//! aasx-index --config ./config/aasx-index.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `aasx-index init` | Create the index and seed configured endpoints |
//! | `aasx-index endpoints` | List registered endpoints |
//! | `aasx-index endpoint add <name> <url>` | Register an endpoint after a connectivity test |
//! | `aasx-index endpoint remove <name>` | Remove an endpoint and its documents |
//! | `aasx-index check <name>` | Test an endpoint's connectivity |
//! | `aasx-index scan [<name>\|all]` | Reconcile endpoints with the index |
//! | `aasx-index list` | Page through indexed documents |
//! | `aasx-index get <id>` | Show a document and its live content |
//! | `aasx-index watch` | Scan periodically until Ctrl-C |

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};

use aasx_index::commands::{self, ListOptions};
use aasx_index::config;
use aasx_index::progress::ProgressMode;
use aasx_index::service::EndpointSpec;

/// AASX Index: a cursor-paginated index of Asset Administration Shell
/// documents, reconciled with the endpoints that serve them.
#[derive(Parser)]
#[command(name = "aasx-index", version, about)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/aasx-index.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the index (file or database) and seed configured endpoints.
    ///
    /// Idempotent: running it again leaves existing data untouched.
    Init,

    /// List registered endpoints.
    Endpoints,

    /// Register or remove an endpoint.
    Endpoint {
        #[command(subcommand)]
        action: EndpointAction,
    },

    /// Test whether an endpoint is reachable.
    Check {
        name: String,
    },

    /// Reconcile one endpoint (or `all`) with the index.
    Scan {
        /// Endpoint name or `all`.
        #[arg(default_value = "all")]
        target: String,

        /// Progress output on stderr. Defaults to `human` on a terminal.
        #[arg(long, value_enum)]
        progress: Option<ProgressArg>,
    },

    /// Page through indexed documents.
    List {
        /// Query expression, e.g. `motor && #prop:MaxRotationSpeed > 4000`.
        #[arg(long)]
        filter: Option<String>,

        /// Language of multi-language values the filter applies to.
        #[arg(long)]
        language: Option<String>,

        #[arg(long, default_value_t = 20)]
        limit: usize,

        /// Page token printed as `next:` by a previous call.
        #[arg(long, conflicts_with = "before")]
        after: Option<String>,

        /// Page token printed as `previous:` by a previous call.
        #[arg(long)]
        before: Option<String>,
    },

    /// Show a document and its live content.
    Get {
        /// AAS identifier of the document.
        id: String,

        /// Restrict the lookup to one endpoint.
        #[arg(long)]
        endpoint: Option<String>,
    },

    /// Scan all endpoints every `[scan].interval_secs` until Ctrl-C.
    Watch,
}

#[derive(Subcommand)]
enum EndpointAction {
    /// Register an endpoint. Fails if it cannot be reached.
    Add {
        name: String,
        url: String,

        /// `directory`, `package-server`, `opcua`, or `registry`.
        #[arg(long, default_value = "directory")]
        protocol: String,

        #[arg(long)]
        version: Option<String>,
    },
    /// Remove an endpoint and all of its documents.
    Remove { name: String },
}

#[derive(Clone, Copy, ValueEnum)]
enum ProgressArg {
    Off,
    Human,
    Json,
}

impl From<ProgressArg> for ProgressMode {
    fn from(arg: ProgressArg) -> Self {
        match arg {
            ProgressArg::Off => ProgressMode::Off,
            ProgressArg::Human => ProgressMode::Human,
            ProgressArg::Json => ProgressMode::Json,
        }
    }
}

fn init_logging(level: &str) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level)),
        )
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;
    init_logging(&cfg.logging.level)?;

    match cli.command {
        Commands::Init => commands::run_init(&cfg).await?,
        Commands::Endpoints => commands::run_endpoints(&cfg).await?,
        Commands::Endpoint { action } => match action {
            EndpointAction::Add {
                name,
                url,
                protocol,
                version,
            } => {
                let spec = EndpointSpec {
                    url,
                    protocol,
                    version,
                };
                commands::run_endpoint_add(&cfg, &name, spec).await?;
            }
            EndpointAction::Remove { name } => commands::run_endpoint_remove(&cfg, &name).await?,
        },
        Commands::Check { name } => commands::run_check(&cfg, &name).await?,
        Commands::Scan { target, progress } => {
            let mode = progress
                .map(ProgressMode::from)
                .unwrap_or_else(ProgressMode::default_for_tty);
            commands::run_scan(&cfg, &target, mode).await?;
        }
        Commands::List {
            filter,
            language,
            limit,
            after,
            before,
        } => {
            let options = ListOptions {
                filter,
                language,
                limit,
                after,
                before,
            };
            commands::run_list(&cfg, options).await?;
        }
        Commands::Get { id, endpoint } => {
            commands::run_get(&cfg, &id, endpoint.as_deref()).await?
        }
        Commands::Watch => commands::run_watch(&cfg).await?,
    }

    Ok(())
}
