//! Binary entry point for wmcp-fsguard.

use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use wmcp_fsguard::{DenialReason, OperationKind, PolicyConfig};

/// Walrus MCP filesystem guard, checks paths against the access policy.
#[derive(Parser)]
#[command(name = "wmcp-fsguard", version, about)]
struct Cli {
    /// Allowed directory. Repeat for several.
    #[arg(long = "root", value_name = "DIR")]
    roots: Vec<PathBuf>,

    /// Gitignore-style pattern excluding paths. Repeat for several.
    #[arg(long = "ignore", value_name = "PATTERN")]
    ignore: Vec<String>,

    /// File of gitignore-style patterns.
    #[arg(long = "ignore-file", value_name = "FILE")]
    ignore_files: Vec<PathBuf>,

    /// JSON config file; command-line values are applied after it.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Fold case when comparing paths. Defaults to the host convention.
    #[arg(long, value_name = "BOOL")]
    case_insensitive: Option<bool>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Decide whether each path may be accessed for an operation.
    Check {
        /// One of: read, write, edit, list, stat.
        operation: OperationKind,

        #[arg(required = true, num_args = 1..)]
        paths: Vec<String>,
    },
    /// Print the canonical allowed directories.
    Roots,
}

#[derive(Serialize)]
struct Verdict {
    path: String,
    operation: OperationKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    authorized: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    denied: Option<DenialReason>,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    if std::env::var_os("RUST_LOG").is_some() {
        tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .init();
    }
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => PolicyConfig::from_json_file(path)?,
        None => PolicyConfig::default(),
    };
    config.merge(PolicyConfig {
        allowed_roots: cli.roots,
        ignore_patterns: cli.ignore,
        ignore_files: cli.ignore_files,
        case_insensitive: cli.case_insensitive,
        base_dir: None,
    });
    let policy = Arc::new(config.build()?);

    match cli.command {
        Command::Roots => {
            for root in policy.allowed_roots() {
                println!("{}", root.display());
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Check { operation, paths } => {
            let mut denied = 0usize;
            for path in paths {
                let verdict = match policy.authorize_async(&path, operation).await {
                    Ok(authorized) => Verdict {
                        path,
                        operation,
                        authorized: Some(authorized.into_path_buf()),
                        denied: None,
                        message: None,
                    },
                    Err(denial) => {
                        denied += 1;
                        Verdict {
                            path,
                            operation,
                            authorized: None,
                            denied: Some(denial.reason()),
                            message: Some(denial.to_string()),
                        }
                    }
                };
                println!("{}", serde_json::to_string_pretty(&verdict)?);
            }
            Ok(if denied == 0 {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
    }
}
