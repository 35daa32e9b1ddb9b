//! Sandboot - sandbox bootstrap orchestrator.
//!
//! Takes a project tree (the JSON wire format produced by the editor),
//! mounts it into a workspace, detects the project type, installs
//! dependencies, and runs the dev server until interrupted.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use sandboot_core::{analyzer, BootstrapConfig, BootstrapEvent, Bootstrapper, ProcessRegistry, ProjectNode};
use sandboot_runtime::HostRuntime;
use sandboot_util::log::{self, LogConfig, LogLevel};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "sandboot")]
#[command(author, version, about = "Bootstrap a project tree into a running dev server", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Mount a project tree, install dependencies, and start its dev server
    Up {
        /// Path to the project tree JSON
        project: PathBuf,
        /// Workspace directory to mount into
        #[arg(short, long, default_value = "./workspace")]
        root: PathBuf,
        /// Install timeout in seconds
        #[arg(long, default_value_t = 120)]
        install_timeout: u64,
        /// Install attempts before proceeding anyway
        #[arg(long, default_value_t = 2)]
        install_attempts: u32,
    },
    /// Detect the project type of an existing directory
    Analyze {
        /// Directory to analyze
        #[arg(default_value = ".")]
        root: PathBuf,
    },
    /// Print version information
    Version,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    log::init(LogConfig {
        print: cli.verbose,
        level: if cli.verbose {
            LogLevel::Debug
        } else {
            LogLevel::Info
        },
        include_location: false,
        file: log::default_log_path(),
    });

    match cli.command {
        Commands::Up {
            project,
            root,
            install_timeout,
            install_attempts,
        } => up(project, root, install_timeout, install_attempts).await,
        Commands::Analyze { root } => analyze(root).await,
        Commands::Version => {
            println!("sandboot {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

async fn up(
    project: PathBuf,
    root: PathBuf,
    install_timeout: u64,
    install_attempts: u32,
) -> Result<()> {
    let raw = std::fs::read_to_string(&project)
        .with_context(|| format!("failed to read {}", project.display()))?;
    let tree: ProjectNode =
        serde_json::from_str(&raw).with_context(|| format!("invalid project tree in {}", project.display()))?;

    std::fs::create_dir_all(&root)
        .with_context(|| format!("failed to create workspace {}", root.display()))?;
    let root = root
        .canonicalize()
        .with_context(|| format!("invalid workspace path {}", root.display()))?;
    let runtime = Arc::new(HostRuntime::with_root(root));
    let registry = ProcessRegistry::new();
    let config = BootstrapConfig {
        install_timeout_secs: install_timeout,
        install_attempts,
        ..Default::default()
    };
    let bootstrapper = Bootstrapper::new(runtime, registry.clone(), config);

    let mut events = bootstrapper.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(BootstrapEvent::Step(step)) => println!("==> {step}"),
                Ok(BootstrapEvent::Log(line)) => println!("    {line}"),
                Ok(BootstrapEvent::Output(chunk)) => print!("{chunk}"),
                Ok(BootstrapEvent::Ready { url }) => match url {
                    Some(url) => println!("==> ready: {url}"),
                    None => println!("==> ready"),
                },
                Ok(BootstrapEvent::Failed { message }) => eprintln!("error: {message}"),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    bootstrapper.run(&tree).await?;

    if registry.get_all().is_empty() {
        info!("Nothing left running, exiting");
        return Ok(());
    }

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    println!();
    info!("Interrupted, stopping tracked processes");
    registry.kill_all();
    printer.abort();
    Ok(())
}

async fn analyze(root: PathBuf) -> Result<()> {
    let root = root
        .canonicalize()
        .with_context(|| format!("invalid path {}", root.display()))?;
    anyhow::ensure!(root.is_dir(), "{} is not a directory", root.display());

    let runtime = HostRuntime::with_root(root.clone());
    let analysis = analyzer::analyze(&runtime, &root).await;
    println!("{}", serde_json::to_string_pretty(&analysis)?);
    Ok(())
}
