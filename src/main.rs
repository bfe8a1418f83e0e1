mod config;
mod deployer;
mod error;
mod ethereum;

use anyhow::Result;
use clap::{Arg, ArgAction, Command};
use config::Config;
use deployer::{DeploySettings, Deployer, RunReport, TestReport};
use ethereum::{
    provider::HttpRpcClient,
    signer::{derive_address, Account},
};
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("contract-deployer")
        .version("0.1.0")
        .about("Deploys the DataStorage contract and exercises its save/data round trip")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Path to configuration file (YAML or TOML)"),
        )
        .arg(
            Arg::new("rpc-url")
                .short('r')
                .long("rpc-url")
                .value_name("URL")
                .help("RPC endpoint URL"),
        )
        .arg(
            Arg::new("test")
                .long("test")
                .help("Run the post-deployment test even if the config disables it")
                .action(ArgAction::SetTrue)
                .conflicts_with("no-test"),
        )
        .arg(
            Arg::new("no-test")
                .long("no-test")
                .help("Skip the post-deployment test")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("strict-test")
                .long("strict-test")
                .help("Exit with an error when the post-deployment test fails")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .help("Print the run report as JSON")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable debug logging")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("generate-config")
                .long("generate-config")
                .help("Generate a sample configuration file and exit")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("config-path")
                .long("config-path")
                .help("Print the default configuration file path and exit")
                .action(ArgAction::SetTrue),
        )
        .get_matches();

    let level = if matches.get_flag("verbose") {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
        )
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();

    if matches.get_flag("generate-config") {
        println!("{}", Config::generate_sample());
        return Ok(());
    }

    if matches.get_flag("config-path") {
        match Config::default_config_path() {
            Ok(path) => {
                println!("{}", path.display());
                return Ok(());
            }
            Err(e) => {
                error!("Could not determine default config path: {}", e);
                return Err(e.into());
            }
        }
    }

    let config_path = matches.get_one::<String>("config").map(PathBuf::from);
    let mut config = Config::load(config_path.as_deref()).await?;

    if let Some(rpc_url) = matches.get_one::<String>("rpc-url") {
        config.ethereum.rpc_url = rpc_url.clone();
    }
    if matches.get_flag("test") {
        config.test.enable = true;
    }
    if matches.get_flag("no-test") {
        config.test.enable = false;
    }
    config.validate()?;

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling");
            ctrl_c.cancel();
        }
    });

    let report = match run(&config, cancel).await {
        Ok(report) => report,
        Err(e) => {
            error!(category = e.category(), "Deployment failed: {}", e);
            return Err(e.into());
        }
    };

    if matches.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_summary(&report);
    }

    if matches.get_flag("strict-test") {
        if let Some(TestReport::Failed { category, error }) = &report.test {
            anyhow::bail!("post-deployment test failed ({}): {}", category, error);
        }
    }

    Ok(())
}

async fn run(config: &Config, cancel: CancellationToken) -> error::Result<RunReport> {
    let eth = &config.ethereum;
    info!("Connecting to {}", eth.rpc_url);
    let rpc = HttpRpcClient::new(&eth.rpc_url, Duration::from_secs(eth.request_timeout_secs))?;

    info!("Deploying from address {}", derive_address(&eth.private_key)?);
    let account = Account::from_private_key(&eth.private_key)?;

    let artifact = config.artifact_source().load().await?;

    let mut deployer = Deployer::connect(
        rpc,
        account,
        eth.chain_id,
        DeploySettings::from(eth),
        cancel,
    )
    .await?;

    deployer.run(&artifact, config.test_item()).await
}

fn print_summary(report: &RunReport) {
    let deployment = &report.deployment;
    println!("Contract deployed at: {}", deployment.contract_address);
    println!("Transaction hash:     {}", deployment.transaction_hash);
    println!("Block number:         {}", deployment.block_number);
    println!(
        "Gas used:             {} (limit {}, price {})",
        deployment.gas_used,
        deployment.gas_limit,
        ethereum::utils::format_gwei(deployment.gas_price)
    );

    match &report.test {
        Some(TestReport::Passed(outcome)) => {
            println!("Test transaction:     {}", outcome.transaction_hash);
        }
        Some(TestReport::Failed { category, error }) => {
            println!("Test failed:          [{}] {}", category, error);
        }
        None => {}
    }
    if let Some(state) = &report.final_state {
        println!("Stored data:          {}", state);
    }
}
