//! KILN CLI
//!
//! Run untrusted code in a sandbox from the command line.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod config;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{bail, WrapErr};
use color_eyre::Result;
use kiln_container::{ContainerBackend, DockerRuntime};
use kiln_core::{Catalog, ExecutionId, ExecutionOptions, ExecutionStatus, Language};
use kiln_runtime::{EventSubscription, ExecutionEvent, Orchestrator};
use kiln_sandbox::InProcessBackend;
use tokio::io::AsyncWriteExt;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use crate::config::KilnConfig;

#[derive(Parser)]
#[command(name = "kiln")]
#[command(about = "KILN - sandboxed execution of untrusted code", long_about = None)]
struct Cli {
    /// JSON configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,
    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a program and print its result as JSON
    Run {
        /// Language tag
        #[arg(short, long)]
        language: Language,
        /// Source file
        #[arg(short, long, conflicts_with = "code", required_unless_present = "code")]
        file: Option<PathBuf>,
        /// Inline source
        #[arg(long)]
        code: Option<String>,
        /// Wall-clock budget in milliseconds
        #[arg(long)]
        timeout_ms: Option<u64>,
        /// Memory ceiling in MiB
        #[arg(long)]
        memory_mb: Option<u64>,
        /// Standard input
        #[arg(long)]
        input: Option<String>,
        /// Stream output while the program runs
        #[arg(long)]
        stream: bool,
    },
    /// List supported languages
    Languages,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("kiln=info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn build_orchestrator(config: KilnConfig) -> Orchestrator {
    let mut builder = Orchestrator::builder(config.engine)
        .with_backend(Arc::new(InProcessBackend::new(config.sandbox)));
    match DockerRuntime::connect() {
        Ok(runtime) => {
            builder = builder.with_backend(Arc::new(ContainerBackend::new(runtime, config.container)));
        }
        Err(err) => warn!(error = %err, "Container backend disabled"),
    }
    builder.build()
}

/// Copy the execution's output chunks to stdout until it ends
async fn stream_output(mut events: EventSubscription, id: ExecutionId) -> Result<()> {
    let mut stdout = tokio::io::stdout();
    while let Some(event) = events.recv().await {
        if event.execution_id() != &id {
            continue;
        }
        match event {
            ExecutionEvent::OutputChunk { chunk, .. } => {
                stdout.write_all(&chunk).await?;
                stdout.flush().await?;
            }
            event if event.is_terminal() => break,
            _ => {}
        }
    }
    Ok(())
}

async fn run(orchestrator: Orchestrator, options: ExecutionOptions, stream: bool) -> Result<ExecutionStatus> {
    let events = stream.then(|| orchestrator.subscribe());
    let id = orchestrator.submit(options).await?;
    let printer = events.map(|events| tokio::spawn(stream_output(events, id.clone())));

    let result = tokio::select! {
        result = orchestrator.wait(&id) => result?,
        _ = tokio::signal::ctrl_c() => {
            orchestrator.cancel(&id).await?;
            orchestrator.wait(&id).await?
        }
    };
    if let Some(printer) = printer {
        printer.await??;
    }

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(result.status)
}

fn print_languages() {
    println!("{:<16} {:<12} {:<24} FILE", "LANGUAGE", "BACKEND", "IMAGE");
    for profile in Catalog::profiles() {
        println!(
            "{:<16} {:<12} {:<24} {}",
            profile.language.tag(),
            profile.isolation().to_string(),
            profile.image().unwrap_or("-"),
            profile.file_name()
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    match cli.command {
        Commands::Run {
            language,
            file,
            code,
            timeout_ms,
            memory_mb,
            input,
            stream,
        } => {
            let code = match (file, code) {
                (Some(path), _) => std::fs::read_to_string(&path)
                    .wrap_err_with(|| format!("failed to read {}", path.display()))?,
                (None, Some(code)) => code,
                (None, None) => bail!("either --file or --code is required"),
            };
            let mut options = ExecutionOptions::new(language, code);
            options.timeout = timeout_ms.map(Duration::from_millis);
            options.memory_limit_mb = memory_mb;
            options.input = input;

            let config = KilnConfig::load(cli.config.as_deref())?;
            let status = run(build_orchestrator(config), options, stream).await?;
            if status != ExecutionStatus::Completed {
                std::process::exit(1);
            }
            Ok(())
        }
        Commands::Languages => {
            print_languages();
            Ok(())
        }
    }
}
