use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use studyrag::app::App;
use studyrag::config::Config;
use studyrag::finder::Query;
use studyrag::mcp::server::McpServer;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "studyrag", version, about = "Subject-filtered semantic search over study resources")]
struct Cli {
    /// Path to the JSON configuration file
    #[arg(short, long, default_value = "config.json")]
    config: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Serve MCP tools over stdio (default)
    Serve,
    /// Build or refresh the index from record files
    Build {
        /// Directory of JSON record files (default: records_dir from config)
        #[arg(short, long)]
        records: Option<PathBuf>,
        /// Re-embed every record even if unchanged
        #[arg(long)]
        force: bool,
    },
    /// Run one query and print the results as JSON
    Find {
        #[arg(short, long)]
        subject: String,
        #[arg(short, long)]
        topic: String,
        #[arg(long)]
        subtopic: Option<String>,
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// List known subjects
    Subjects,
    /// Show index status
    Status,
}

fn build_progress() -> ProgressBar {
    let pb = ProgressBar::new(0);
    match ProgressStyle::default_bar().template("  {bar:40.cyan/blue} {pos}/{len} records ({eta}) {msg}") {
        Ok(style) => pb.set_style(style.progress_chars("█▓░")),
        Err(_) => pb.set_style(ProgressStyle::default_bar()),
    }
    pb.enable_steady_tick(Duration::from_millis(200));
    pb
}

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries the MCP transport, so logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load(&cli.config)?;
    let app = App::from_config(config)?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            info!("Starting studyrag MCP server...");
            McpServer::new(app).start().await?;
        }
        Command::Build { records, force } => {
            let report = app
                .rebuild_from_dir(records.as_deref(), force, Some(build_progress()))
                .await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Command::Find {
            subject,
            topic,
            subtopic,
            limit,
        } => {
            let query = Query {
                subject,
                topic,
                subtopic,
                limit,
            };
            let resources = app.finder().find(&query).await?;
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({ "resources": resources }))?
            );
        }
        Command::Subjects => {
            for subject in app.categories.subjects() {
                println!("{subject}");
            }
        }
        Command::Status => {
            app.store.ping()?;
            let status = app.finder().status()?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
    }

    Ok(())
}
