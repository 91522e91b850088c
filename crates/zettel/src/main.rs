//! # zettel CLI (`zk`)
//!
//! Query and maintain a directory of markdown notes.
//!
//! ## Usage
//!
//! ```bash
//! zk --config ./config/zk.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `zk query <spec>` | Run a query spec (file path or inline YAML/JSON) |
//! | `zk show <file>` | Print one normalized note as JSON |
//! | `zk fmt <file>` | Print, or with `--write` rewrite, a note in canonical form |
//! | `zk log <file>` | List a project note's log entries and warnings |
//! | `zk cache refresh` | Rebuild the note cache for a directory |
//!
//! ## Examples
//!
//! ```bash
//! # Open projects, newest first
//! zk query "{filter: {field: type, op: eq, value: project}, sort: [{field: date, direction: desc}]}"
//!
//! # Same spec from a file, as CSV
//! zk query ./queries/projects.yaml --format csv
//!
//! # Normalize a note on disk
//! zk fmt "notes/202401011200 Plans.md" --write
//! ```

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use zettel::commands::{self, QueryArgs};
use zettel::config::load_config_or_default;
use zettel::logging::init_logging;
use zettel_core::query::OutputFormat;

/// zettel CLI: a flat-file markdown zettelkasten with a query layer.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. A missing file means defaults. See `config/zk.example.toml`.
#[derive(Parser)]
#[command(
    name = "zk",
    about = "Query and maintain a flat-file markdown zettelkasten",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/zk.toml")]
    config: PathBuf,

    /// Log level or filter directives; overrides `[logging] level`.
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a query spec and print the result.
    ///
    /// The argument is a path to a YAML/JSON spec file, or the spec itself.
    /// Results are served from the cache when one exists; the cache is
    /// refreshed in the background and a note is printed to stderr if the
    /// served result turns out to be stale.
    Query {
        /// Spec file path or inline spec.
        spec: String,

        /// Output format: table, json, csv, markdown. Overrides the spec.
        #[arg(long)]
        format: Option<OutputFormat>,

        /// Maximum rows. Overrides the spec.
        #[arg(long)]
        limit: Option<usize>,

        /// Read notes directly, bypassing the cache.
        #[arg(long)]
        no_cache: bool,
    },

    /// Print a normalized note as JSON.
    Show {
        file: PathBuf,
    },

    /// Print a note in canonical form.
    Fmt {
        file: PathBuf,

        /// Rewrite the file in place instead of printing.
        #[arg(long)]
        write: bool,
    },

    /// List a project note's log entries and warnings.
    Log {
        file: PathBuf,
    },

    /// Manage the note cache.
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Rescan a directory and rewrite its cache.
    Refresh {
        /// Notes directory. Defaults to `[notes] directory`.
        #[arg(long)]
        dir: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut cfg = load_config_or_default(&cli.config)?;
    if let Some(level) = cli.log_level {
        cfg.logging.level = level;
    }
    init_logging(&cfg.logging.level)?;

    match cli.command {
        Commands::Query {
            spec,
            format,
            limit,
            no_cache,
        } => {
            let args = QueryArgs {
                format,
                limit,
                no_cache,
            };
            commands::run_query(&cfg, &spec, &args).await?;
        }
        Commands::Show { file } => {
            commands::show_note(&cfg, &file)?;
        }
        Commands::Fmt { file, write } => {
            commands::format_note(&file, write)?;
        }
        Commands::Log { file } => {
            commands::show_log(&cfg, &file)?;
        }
        Commands::Cache { action } => match action {
            CacheAction::Refresh { dir } => {
                commands::refresh(&cfg, dir.as_deref()).await?;
            }
        },
    }

    Ok(())
}
