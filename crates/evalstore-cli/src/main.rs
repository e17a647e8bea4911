//! `evalstore` command line: validate, ingest and restore grading result files.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use evalstore_core::{open_store, Config, FileValidator, RecordValidator, SchemaLoader};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "evalstore", version, about = "Validate and store automated grading results")]
struct Cli {
    /// YAML configuration file
    #[arg(long, global = true, env = "EVALSTORE_CONFIG")]
    config: Option<PathBuf>,

    /// SQLite database path (overrides the config file)
    #[arg(long, global = true, env = "EVALSTORE_DB")]
    db: Option<PathBuf>,

    /// JSON Schema for evaluation records (overrides the config file)
    #[arg(long, global = true, env = "EVALSTORE_SCHEMA")]
    schema: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the store tables if they do not exist
    Init,

    /// Validate result files without storing them
    Validate {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Validate and store result files, one run per file
    Ingest {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Write every stored run back to a JSON file
    Restore {
        /// Output directory (defaults to the configured restore_dir)
        dir: Option<PathBuf>,

        /// Re-check records while restoring
        #[arg(long)]
        revalidate: bool,
    },

    /// List stored runs
    Runs,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("evalstore=info,evalstore_core=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let loader = SchemaLoader::new();

    match cli.command {
        Command::Init => {
            let store = open_store(&config, &loader).context("Failed to load schema")?;
            store.initialize().context("Failed to initialize store")?;
            println!("Initialized {}", config.database.display());
        }

        Command::Validate { files } => {
            let records = RecordValidator::from_loader(&loader, config.schema.as_deref())
                .context("Failed to load schema")?;
            let validator = FileValidator::new(records);

            let mut failed = 0;
            for file in &files {
                let report = validator
                    .validate(file)
                    .with_context(|| format!("Failed to validate {}", file.display()))?;
                println!("{}: {}", file.display(), report.itemized());
                if !report.is_valid() {
                    failed += 1;
                }
            }
            if failed > 0 {
                bail!("{} of {} files failed validation", failed, files.len());
            }
        }

        Command::Ingest { files } => {
            let store = open_store(&config, &loader).context("Failed to load schema")?;
            store.initialize().context("Failed to initialize store")?;

            for file in &files {
                let summary = store
                    .ingest(file)
                    .with_context(|| format!("Failed to ingest {}", file.display()))?;
                println!(
                    "Ingested {} as run {} ({} records, strategy {})",
                    summary.source_file, summary.run_id, summary.records, summary.strategy
                );
                for warning in &summary.warnings {
                    println!("  warning: {}", warning);
                }
            }
        }

        Command::Restore { dir, revalidate } => {
            let store = open_store(&config, &loader).context("Failed to load schema")?;
            store.initialize().context("Failed to initialize store")?;

            let dir = dir.unwrap_or_else(|| config.restore_dir.clone());
            let written = store
                .restore(&dir, revalidate)
                .with_context(|| format!("Failed to restore into {}", dir.display()))?;
            println!("Restored {} files into {}", written, dir.display());
        }

        Command::Runs => {
            let store = open_store(&config, &loader).context("Failed to load schema")?;
            store.initialize().context("Failed to initialize store")?;

            let runs = store.list_runs().context("Failed to list runs")?;
            println!("{}", serde_json::to_string_pretty(&runs)?);
        }
    }

    Ok(())
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::from_yaml_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => Config::default(),
    };

    if let Some(db) = &cli.db {
        config.database = db.clone();
    }
    if let Some(schema) = &cli.schema {
        config.schema = Some(schema.clone());
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_restore() {
        let cli = Cli::try_parse_from(["evalstore", "--db", "x.db", "restore", "out", "--revalidate"])
            .unwrap();
        assert_eq!(cli.db, Some(PathBuf::from("x.db")));
        assert!(matches!(
            cli.command,
            Command::Restore { ref dir, revalidate: true } if dir.as_deref() == Some(std::path::Path::new("out"))
        ));
    }

    #[test]
    fn test_flags_override_config() {
        let cli = Cli::try_parse_from(["evalstore", "--db", "override.db", "--schema", "s.json", "runs"])
            .unwrap();
        let config = load_config(&cli).unwrap();
        assert_eq!(config.database, PathBuf::from("override.db"));
        assert_eq!(config.schema, Some(PathBuf::from("s.json")));
        assert_eq!(config.restore_dir, PathBuf::from("restored"));
    }

    #[test]
    fn test_ingest_requires_files() {
        assert!(Cli::try_parse_from(["evalstore", "ingest"]).is_err());
    }
}
