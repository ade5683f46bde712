//! Conduit CLI - read a table from a configured data source
//!
//! Resolves the selected environment's settings for one backend, opens a
//! reader, fetches once and prints the shape of the result. With `--mode` or
//! `--target` the fetched table is then written through a writer.

mod commands;

use clap::Parser;
use colored::Colorize;
use commands::FetchCommand;
use tracing_subscriber::{layer::SubscriberExt, Layer};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "CONDUIT_LOG_LEVEL")]
    log_level: String,

    /// Log format: compact, full
    #[arg(long, default_value = "compact", env = "CONDUIT_LOG_FORMAT")]
    log_format: String,

    #[command(flatten)]
    fetch: FetchCommand,
}

fn init_tracing(log_level: &str, log_format: &str) -> anyhow::Result<()> {
    // RUST_LOG takes full control when set
    let filter = if std::env::var("RUST_LOG").is_ok() {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .map_err(|e| anyhow::anyhow!("Invalid RUST_LOG environment variable: {}", e))?
    } else {
        tracing_subscriber::EnvFilter::new(format!(
            "conduit={level},\
             conduit_cli={level},\
             conduit_query={level},\
             conduit_query_postgres={level},\
             conduit_query_oracle={level},\
             conduit_query_s3={level},\
             conduit_readers={level},\
             sqlx=warn,\
             aws_config=warn,\
             aws_smithy_runtime=warn,\
             hyper=warn,\
             rustls=warn",
            level = log_level
        ))
    };

    let fmt_layer = match log_format {
        "full" => tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .boxed(),
        _ => tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .compact()
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .boxed(),
    };

    let subscriber = tracing_subscriber::registry().with(filter).with(fmt_layer);
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to set global default subscriber: {}", e))?;
    Ok(())
}

fn main() {
    let cli = Cli::parse();

    if let Err(e) = init_tracing(&cli.log_level, &cli.log_format) {
        eprintln!("{} {}", "error:".bright_red().bold(), e);
        std::process::exit(1);
    }

    if let Err(e) = cli.fetch.execute() {
        tracing::error!("{:#}", e);
        eprintln!("{} {:#}", "error:".bright_red().bold(), e);
        std::process::exit(1);
    }
}
