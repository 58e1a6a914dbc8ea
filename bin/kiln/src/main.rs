//! kiln compiles a project's contracts and deploys them, libraries first.

mod cli;

use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use comfy_table::{Table, presets::UTF8_FULL};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use tokio::sync::watch;

use cli::{Cli, Command};
use kiln_pipeline::{
    BuildArtifact, CONFIG_FILENAME, ContractFilter, DependencyGraph, DeploymentPlan,
    JsonRpcClient, KilnConfig, Orchestrator, Solc, SolcBinary, compile_project,
};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize the logger.
    tracing_subscriber::fmt()
        .with_max_level(cli.verbosity)
        .init();

    let config = load_config(&cli)?;

    match cli.command {
        Command::Compile { contracts } => compile(&cli.project, &config, &contracts),
        Command::Deploy {
            rpc_url,
            timeout,
            backoff,
        } => {
            let mut config = config;
            if let Some(url) = rpc_url {
                config.rpc.url = url;
            }
            if let Some(timeout) = timeout {
                config.deploy.confirmation_timeout_secs = timeout;
            }
            if let Some(backoff) = backoff {
                config.deploy.backoff = backoff;
            }
            deploy(&cli.project, &config).await
        }
        Command::SolcVersion => {
            let solc = Solc::new(SolcBinary::new(&config.compiler.binary));
            let version = solc.version()?;
            println!("{version}");
            Ok(())
        }
        Command::Init { force } => init(&cli.project, force),
    }
}

/// Layer defaults, the project's `Kiln.toml` and `KILN_*` environment variables.
fn load_config(cli: &Cli) -> Result<KilnConfig> {
    let path = cli
        .config
        .clone()
        .unwrap_or_else(|| cli.project.join(CONFIG_FILENAME));

    if cli.config.is_some() && !path.exists() {
        anyhow::bail!("Configuration file not found: {}", path.display());
    }

    let config: KilnConfig = Figment::from(Serialized::defaults(KilnConfig::default()))
        .merge(Toml::file(&path))
        .merge(Env::prefixed("KILN_").split("__"))
        .extract()
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;

    tracing::debug!(path = %path.display(), ?config, "Configuration loaded");

    Ok(config)
}

fn compile(project: &Path, config: &KilnConfig, filters: &[ContractFilter]) -> Result<()> {
    let contracts_dir = config.contracts_dir(project);
    let solc = Solc::new(SolcBinary::new(&config.compiler.binary));

    tracing::info!(dir = %contracts_dir.display(), "Loading contracts");

    let result = compile_project(&solc, &contracts_dir, &config.artifact_path(project), filters)?;

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Contract", "Source", "Bytecode size"]);
    for contract in &result.contracts {
        let source = contract
            .source
            .as_deref()
            .and_then(|path| path.file_name())
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        table.add_row(vec![
            contract.name.clone(),
            source,
            format!("{} bytes", contract.bytecode.len() / 2),
        ]);
    }

    println!(
        "Compiled {} contracts from {} source files",
        result.contracts.len(),
        result.source_paths.len()
    );
    println!("{table}");
    println!("Outfile: {}", result.output_path.display());

    Ok(())
}

async fn deploy(project: &Path, config: &KilnConfig) -> Result<()> {
    let artifact = BuildArtifact::load_from_file(&config.artifact_path(project))?;

    for stale in artifact.stale_sources() {
        tracing::warn!(
            source = %stale.display(),
            "Source changed since the last compile, deploying the previous build"
        );
    }

    let graph = DependencyGraph::extract(&artifact.contracts)?;
    let plan = DeploymentPlan::from_graph(&graph)?;

    tracing::info!(
        contracts = plan.len(),
        edges = graph.edge_count(),
        plan = ?plan,
        "Deployment plan ready"
    );

    let rpc = JsonRpcClient::connect(&config.rpc).await?;

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, stopping deployment...");
            let _ = cancel_tx.send(true);
        }
    });

    let outcome = Orchestrator::new(&rpc, config.deploy.confirmation_policy())
        .with_cancellation(cancel_rx)
        .deploy(&artifact.contracts, &graph, &plan)
        .await;

    let (result, error) = match outcome {
        Ok(result) => (result, None),
        Err(failure) => (failure.result, Some(failure.error)),
    };

    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_header(vec!["Contract", "Address", "Transaction", "Status"]);
    for deployed in &result.contracts {
        table.add_row(vec![
            deployed.name.clone(),
            deployed
                .address
                .map(|address| address.to_string())
                .unwrap_or_else(|| "<pending>".to_string()),
            deployed.transaction_hash.to_string(),
            deployed.status.to_string(),
        ]);
    }
    for (name, reason) in &result.aborted {
        table.add_row(vec![name.clone(), String::new(), String::new(), format!("aborted: {reason}")]);
    }
    for name in &result.skipped {
        table.add_row(vec![name.clone(), String::new(), String::new(), "skipped".to_string()]);
    }
    println!("{table}");

    match error {
        Some(error) => Err(error).context("Deployment failed"),
        None => Ok(()),
    }
}

fn init(project: &Path, force: bool) -> Result<()> {
    let path = project.join(CONFIG_FILENAME);
    if path.exists() && !force {
        anyhow::bail!(
            "{} already exists, pass --force to overwrite it",
            path.display()
        );
    }

    std::fs::create_dir_all(project)
        .with_context(|| format!("Failed to create project directory {}", project.display()))?;

    let config = KilnConfig::default();
    config.save_to_file(&path)?;

    for dir in [config.contracts_dir(project), project.join(&config.project.build_dir)] {
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create {}", dir.display()))?;
    }

    println!("Wrote {}", path.display());
    Ok(())
}
