use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand, ValueEnum};
use oxigate::{
    ActionRegistry, Proxy, Vault, VaultConfig, VaultManager, VaultService, Verbosity,
};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

#[derive(Debug, Parser)]
#[command(
    name = "oxg",
    version,
    about = "Intent-routed gateway to an Obsidian vault",
    disable_help_subcommand = true
)]
struct Cli {
    /// Path to the Obsidian vault.
    #[arg(long, env = "OBSIDIAN_VAULT", global = true)]
    vault: Option<PathBuf>,

    /// Optional TOML file overriding vault settings.
    #[arg(long, env = "OXIGATE_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Find the action matching a plain-language intent.
    Lookup {
        intent: String,

        /// Note title or path to pre-fill into the suggested arguments.
        #[arg(long)]
        note_hint: Option<String>,
    },
    /// Validate and run one action.
    Exec {
        action: String,

        /// Action arguments as a JSON object.
        #[arg(long, default_value = "{}")]
        args: String,
    },
    /// Show help for a topic.
    Help {
        topic: Option<String>,

        #[arg(long, value_enum, default_value_t = VerbosityArg::Short)]
        verbosity: VerbosityArg,
    },
    /// Answer newline-delimited JSON requests on stdin while watching the vault.
    Serve,
    /// Resolve wiki-link text to a note.
    Resolve { link: String },
    /// Notes linking to a note.
    Backlinks { note: String },
    /// Notes without links in either direction.
    Orphans {
        #[arg(long, default_value_t = 100)]
        limit: usize,
    },
    /// Watch the vault and print change batches.
    Watch,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum VerbosityArg {
    Short,
    Normal,
}

impl From<VerbosityArg> for Verbosity {
    fn from(value: VerbosityArg) -> Self {
        match value {
            VerbosityArg::Short => Verbosity::Short,
            VerbosityArg::Normal => Verbosity::Normal,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    init_logging();
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Command::Help { topic, verbosity } => {
            let registry = ActionRegistry::new(&config);
            println!("{}", oxigate::help(&registry, topic.as_deref(), verbosity.into()));
        }
        Command::Lookup { intent, note_hint } => {
            let proxy = open_proxy(cli.vault, config)?;
            let routed = proxy.lookup(&intent, note_hint.as_deref())?;
            print_json(&routed)?;
        }
        Command::Exec { action, args } => {
            let args: serde_json::Value = serde_json::from_str(&args)
                .map_err(|e| anyhow::anyhow!("--args is not valid JSON: {e}"))?;
            let proxy = open_proxy(cli.vault, config)?;
            let envelope = proxy.execute(&action, args);
            print_json(&envelope)?;
            if !envelope.success {
                return Ok(ExitCode::FAILURE);
            }
        }
        Command::Resolve { link } => {
            let manager = open_manager(cli.vault, config)?;
            let lookup = manager.resolve(&link)?;
            let found = lookup.resolution.is_some();
            print_json(&lookup)?;
            if !found {
                return Ok(ExitCode::FAILURE);
            }
        }
        Command::Backlinks { note } => {
            let manager = open_manager(cli.vault, config)?;
            print_json(&manager.backlinks(&note)?)?;
        }
        Command::Orphans { limit } => {
            let manager = open_manager(cli.vault, config)?;
            for orphan in manager.orphans(limit)? {
                println!("{}", orphan.path);
            }
        }
        Command::Serve => serve(cli.vault, config).await?,
        Command::Watch => watch(cli.vault, config).await?,
    }

    Ok(ExitCode::SUCCESS)
}

async fn serve(vault: Option<PathBuf>, config: VaultConfig) -> anyhow::Result<()> {
    let manager = Arc::new(open_manager(vault, config)?);
    let proxy = Arc::new(Proxy::new(Arc::clone(&manager))?);

    let mut service = VaultService::new(manager);
    service.build_index().await?;
    service.start_watching().await?;
    tracing::info!("serving requests on stdin");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();
    loop {
        let line = tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => line?,
        };
        let Some(line) = line else { break };
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }

        let proxy = Arc::clone(&proxy);
        let response = tokio::task::spawn_blocking(move || proxy.handle_json(&line)).await?;
        let mut out = serde_json::to_vec(&response)?;
        out.push(b'\n');
        stdout.write_all(&out).await?;
        stdout.flush().await?;
    }

    service.shutdown().await;
    Ok(())
}

async fn watch(vault: Option<PathBuf>, config: VaultConfig) -> anyhow::Result<()> {
    let manager = Arc::new(open_manager(vault, config)?);
    let mut service = VaultService::new(manager);
    service.build_index().await?;
    let mut rx = service.subscribe();

    service.start_watching().await?;
    eprintln!("watching... (Ctrl-C to stop)");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            ev = rx.recv() => {
                match ev {
                    Ok(ev) => {
                        println!("{}", serde_json::to_string(&ev)?);
                    }
                    Err(RecvError::Lagged(n)) => eprintln!("(lagged {n} events)"),
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }

    service.shutdown().await;
    Ok(())
}

fn init_logging() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&Path>) -> anyhow::Result<VaultConfig> {
    Ok(match path {
        Some(path) => VaultConfig::load(path)?,
        None => VaultConfig::default(),
    })
}

fn open_manager(vault: Option<PathBuf>, config: VaultConfig) -> anyhow::Result<VaultManager> {
    let vault = Vault::with_config(require_vault(vault)?, config)?;
    Ok(VaultManager::new(vault)?)
}

fn open_proxy(vault: Option<PathBuf>, config: VaultConfig) -> anyhow::Result<Proxy> {
    Ok(Proxy::new(Arc::new(open_manager(vault, config)?))?)
}

fn require_vault(vault: Option<PathBuf>) -> anyhow::Result<PathBuf> {
    vault.ok_or_else(|| anyhow::anyhow!("--vault is required (or set OBSIDIAN_VAULT)"))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
