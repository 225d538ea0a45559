use clap::Parser;

use alscat_core::error::{CatalogError, IngestError, QueryError, ScanError, StoreError};
use alscat_doc::DocError;

mod commands;

#[derive(Parser, Debug)]
#[command(
    name = "alscat",
    version,
    about = "Catalog, analyse and query music project folders"
)]
struct Cli {
    #[command(subcommand)]
    command: commands::Command,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    quiet: bool,
}

/// Classify an error into a process exit code.
///
///   0 = success
///   1 = general/unknown error
///   2 = configuration or usage error
///   3 = path not found / not a catalog
///   4 = database error
///   5 = document patcher failure
fn classify_exit_code(err: &anyhow::Error) -> i32 {
    for cause in err.chain() {
        if let Some(e) = cause.downcast_ref::<CatalogError>() {
            return match e {
                CatalogError::Config(_)
                | CatalogError::Ingest(IngestError::ModeConflict(_))
                | CatalogError::Query(QueryError::InvalidLimit(_))
                | CatalogError::Analyze(_) => 2,
                CatalogError::Scan(ScanError::InvalidRoot(_))
                | CatalogError::Ingest(IngestError::MissingSnapshot(_))
                | CatalogError::Store(StoreError::NotFound(_))
                | CatalogError::Query(QueryError::Unavailable { .. }) => 3,
                CatalogError::Store(_) | CatalogError::Query(_) => 4,
                CatalogError::Document(_) => 5,
                _ => 1,
            };
        }
        if let Some(e) = cause.downcast_ref::<QueryError>() {
            return match e {
                QueryError::Unavailable { .. } => 3,
                QueryError::InvalidLimit(_) => 2,
                QueryError::Sqlite(_) => 4,
            };
        }
        if cause.downcast_ref::<DocError>().is_some() {
            return 5;
        }
    }

    let lower = format!("{err:#}").to_lowercase();
    if lower.contains("not a catalog") || lower.contains("cannot resolve path") {
        3
    } else if lower.contains("config") {
        2
    } else if lower.contains("database") || lower.contains("sqlite") {
        4
    } else if lower.contains("ramify") {
        5
    } else {
        1
    }
}

fn main() {
    let cli = Cli::parse();

    let filter = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (_, 0) => "warn",
        (_, 1) => "info",
        (_, 2) => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error: Failed to create runtime: {e}");
            std::process::exit(1);
        }
    };

    match runtime.block_on(commands::run(cli.command, cli.quiet)) {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            eprintln!("Error: {e:#}");
            std::process::exit(classify_exit_code(&e));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn exit_code_missing_catalog() {
        let err = anyhow::Error::new(QueryError::Unavailable {
            path: PathBuf::from("/nope/catalog.sqlite"),
            message: "catalog file does not exist".into(),
        });
        assert_eq!(classify_exit_code(&err), 3);
    }

    #[test]
    fn exit_code_invalid_root_through_context() {
        let err = anyhow::Error::new(CatalogError::Scan(ScanError::InvalidRoot(PathBuf::from(
            "/nope",
        ))))
        .context("Scan failed");
        assert_eq!(classify_exit_code(&err), 3);
    }

    #[test]
    fn exit_code_config() {
        let err = anyhow::anyhow!("Cannot parse config: bad toml");
        assert_eq!(classify_exit_code(&err), 2);
    }

    #[test]
    fn exit_code_mode_conflict() {
        let err = anyhow::Error::new(CatalogError::Ingest(IngestError::ModeConflict(
            "overwrite and append cannot be combined".into(),
        )));
        assert_eq!(classify_exit_code(&err), 2);
    }

    #[test]
    fn exit_code_database() {
        let err = anyhow::anyhow!("Cannot open database: /tmp/catalog.sqlite");
        assert_eq!(classify_exit_code(&err), 4);
    }

    #[test]
    fn exit_code_patcher() {
        let err = anyhow::Error::new(DocError::TooLarge { limit: 10 });
        assert_eq!(classify_exit_code(&err), 5);
        let err = anyhow::anyhow!("ramify failed for 2 documents");
        assert_eq!(classify_exit_code(&err), 5);
    }

    #[test]
    fn exit_code_general() {
        let err = anyhow::anyhow!("Something unexpected happened");
        assert_eq!(classify_exit_code(&err), 1);
    }
}
