//! Octopus CLI
//!
//! Runs the tutoring server, or prints a teacher's class report.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use octopus_report::{json::JsonGenerator, MarkdownGenerator};
use octopus_tutor::{create_router, dashboard, AppState, ChatCompletionsClient, Config, Store};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

/// Octopus - Prerequisite-first math tutoring
///
/// Breaks a math problem into the concepts it depends on, teaches each one,
/// and only then reveals a worked solution.
#[derive(Parser, Debug)]
#[command(name = "octopus")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file (default: octopus.json in current directory)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<String>,

    /// Path to the SQLite database (overrides config and OCTOPUS_DATABASE)
    #[arg(short, long, value_name = "FILE", global = true)]
    database: Option<String>,

    /// Enable verbose output (sets log level to debug)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the HTTP API server
    Serve {
        /// Bind address
        #[arg(long)]
        host: Option<String>,

        /// Port for the HTTP API server
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Print a teacher's class report
    Report {
        /// Email of the teacher account
        #[arg(long, value_name = "EMAIL")]
        teacher_email: String,

        /// Output format
        #[arg(short, long, value_enum, default_value_t = ReportFormat::Markdown)]
        format: ReportFormat,

        /// Ask the model for an insight paragraph
        #[arg(long)]
        insight: bool,

        /// Write to this file instead of stdout
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum ReportFormat {
    Markdown,
    Json,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if args.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    tracing::debug!(config = ?args.config, "Config file");

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(1)
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let mut config = load_config(args.config.as_deref())?;
    config.apply_env();
    if let Some(database) = args.database {
        config.database.0 = database;
    }

    match args.command {
        Command::Serve { host, port } => {
            if let Some(host) = host {
                config.server.host = host;
            }
            if let Some(port) = port {
                config.server.port = port;
            }
            config.validate()?;
            serve(config).await
        }
        Command::Report {
            teacher_email,
            format,
            insight,
            output,
        } => {
            config.validate()?;
            report(&config, &teacher_email, format, insight, output.as_deref()).await
        }
    }
}

/// Loads the configuration file, or defaults when none is given and
/// `octopus.json` is absent.
fn load_config(config_path: Option<&str>) -> anyhow::Result<Config> {
    match config_path {
        Some(path_str) => {
            let path = Path::new(path_str);
            if !path.exists() {
                anyhow::bail!(
                    "Config file not found: '{}'\n\nSuggestion: Check the path or remove the --config flag to use defaults",
                    path.display()
                );
            }
            Config::load_from_file(path).map_err(|e| anyhow::anyhow!("{e}"))
        }
        None => Config::load().map_err(|e| anyhow::anyhow!("{e}")),
    }
}

fn print_config(config: &Config) {
    println!("Configuration loaded:");
    println!("  Database: {}", config.database.as_str());
    println!("  LLM provider: {:?}", config.llm.provider);
    println!("  LLM model: {}", config.llm.model);
    println!("  Quiz pass mark: {}%", config.quiz.pass_percent);
}

fn open_store(config: &Config) -> anyhow::Result<Store> {
    Store::open(config.database.as_str()).map_err(|e| {
        anyhow::anyhow!(
            "Failed to open database '{}': {e}\n\nSuggestion: Check that the directory exists and is writable",
            config.database.as_str()
        )
    })
}

async fn serve(config: Config) -> anyhow::Result<()> {
    print_config(&config);
    if config.uses_default_secret() {
        tracing::warn!("Using the built-in JWT secret; set JWT_SECRET before exposing this server");
    }

    let store = open_store(&config)?;
    let model = ChatCompletionsClient::new(config.llm.clone())?;

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .map_err(|e| {
            anyhow::anyhow!(
                "Invalid listen address '{}:{}': {e}\n\nSuggestion: Use an IP address such as 127.0.0.1 for --host",
                config.server.host,
                config.server.port
            )
        })?;

    let router = create_router(AppState::new(config, Arc::new(store), Arc::new(model)));

    let listener = TcpListener::bind(addr).await.map_err(|e| {
        anyhow::anyhow!("Failed to bind to {addr}: {e}\n\nSuggestion: Try a different port with --port")
    })?;
    let local = listener.local_addr()?;

    println!();
    println!("HTTP API server running on http://{local}");
    println!("Press Ctrl+C to stop");
    tracing::info!(addr = %local, "Octopus server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
}

async fn report(
    config: &Config,
    teacher_email: &str,
    format: ReportFormat,
    insight: bool,
    output: Option<&Path>,
) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let teacher = store
        .teacher_by_email(&teacher_email.trim().to_ascii_lowercase())?
        .ok_or_else(|| anyhow::anyhow!("No teacher account with email '{teacher_email}'"))?;

    let insight = if insight {
        let model = ChatCompletionsClient::new(config.llm.clone())?;
        Some(dashboard::class_summary(&store, &model, teacher.id).await?)
    } else {
        None
    };

    let report = dashboard::class_report(&store, &teacher, insight)?;
    tracing::info!(
        teacher = %teacher.name,
        students = report.students.len(),
        "Class report built"
    );

    match (format, output) {
        (ReportFormat::Markdown, None) => print!("{}", MarkdownGenerator::new(&report).generate()),
        (ReportFormat::Markdown, Some(path)) => {
            std::fs::write(path, MarkdownGenerator::new(&report).generate())?;
            println!("Report written to {}", path.display());
        }
        (ReportFormat::Json, None) => println!("{}", JsonGenerator::new(&report).generate_pretty()?),
        (ReportFormat::Json, Some(path)) => {
            JsonGenerator::new(&report).write_to_file(path, true)?;
            println!("Report written to {}", path.display());
        }
    }

    Ok(())
}
