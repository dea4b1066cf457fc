//! Proxy wallet CLI entry point.
//!
//! Provides `demo` and `check-config` subcommands: run the proxy-call
//! scenario against an in-process sample target, or validate a config file.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};

use proxy_wallet::client::{KeyOperation, ProxyActor, ProxyTargetsBuilder, WalletHandle};
use proxy_wallet::clock::SystemClock;
use proxy_wallet::config::{default_config_path, load_config, Config};
use proxy_wallet::logging::{self, LoggingGuard};
use proxy_wallet::target::sample::{test_args, SampleTarget};
use proxy_wallet::target::{Target, TargetRouter};
use proxy_wallet::types::Principal;
use proxy_wallet::wallet::Wallet;

/// Principal the demo registers the sample target under.
const DEMO_TARGET: &str = "test-target";

/// Proxy wallet. Forwards calls for principals without direct call capability.
#[derive(Parser)]
#[command(name = "proxy-wallet", version, about)]
struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    command: Command,
}

/// Available CLI subcommands.
#[derive(Subcommand)]
enum Command {
    /// Run the proxy-call scenario against an in-process sample target.
    Demo {
        /// Config file; falls back to `~/.proxy-wallet/config.toml`, then defaults.
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Parse and validate a config file.
    CheckConfig {
        /// Path to the TOML config.
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine.
    let _env = dotenvy::dotenv();
    let cli = Cli::parse();

    match cli.command {
        Command::Demo { config } => handle_demo(config).await,
        Command::CheckConfig { path } => handle_check_config(&path),
    }
}

/// Validate a config file and report the result.
fn handle_check_config(path: &std::path::Path) -> anyhow::Result<()> {
    logging::init_cli();
    let config = load_config(path)?;
    config
        .validate()
        .with_context(|| format!("invalid config at {}", path.display()))?;
    println!(
        "config OK: wallet {} with {} owner(s), validate_type {:?}",
        config.wallet.id,
        config.wallet.owners.len(),
        config.wallet.validate_type
    );
    Ok(())
}

/// Install logging per config. Returns the file guard in production mode.
fn init_logging(config: &Config) -> anyhow::Result<Option<LoggingGuard>> {
    match &config.logging.logs_dir {
        Some(dir) => Ok(Some(logging::init_production(dir)?)),
        None => {
            logging::init_cli();
            Ok(None)
        }
    }
}

/// Run the end-to-end scenario and print each step.
async fn handle_demo(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let config_path =
        config_path.or_else(|| default_config_path().ok().filter(|path| path.exists()));
    let mut config = match config_path {
        Some(path) => load_config(&path)?,
        None => {
            let mut config = Config::default();
            config.apply_overrides(|key| std::env::var(key).ok());
            config
        }
    };
    if config.wallet.owners.is_empty() {
        config.wallet.owners.push("owner".to_owned());
    }
    config.validate()?;
    let _logging_guard = init_logging(&config)?;

    let owner = Principal::from_text(config.wallet.owners[0].clone());
    let agent = Principal::from_text("agent");
    let stranger = Principal::from_text("stranger");
    let target_id = Principal::from_text(DEMO_TARGET);

    let sample = Arc::new(SampleTarget::new());
    let interface = sample.interface();
    let targets = Arc::new(TargetRouter::new());
    targets.register(target_id.clone(), sample.clone());

    let wallet = Arc::new(Wallet::new(
        config.wallet.settings(),
        targets,
        Arc::new(SystemClock),
    ));
    let strategy = config.poll.strategy();
    let actor_for = |who: &Principal| {
        ProxyActor::new(
            Arc::new(WalletHandle::new(Arc::clone(&wallet), who.clone())),
            target_id.clone(),
            &interface,
            strategy,
        )
    };
    let wallet_text = wallet.id().to_string();

    println!("1. owner calls test_call directly");
    let reply = actor_for(&owner)
        .invoke("test_call", vec![test_args(&wallet_text, "owner")])
        .await?;
    println!("   -> {reply}");

    println!("2. unknown principal calls test_call");
    match actor_for(&stranger)
        .invoke("test_call", vec![test_args(&wallet_text, "stranger")])
        .await
    {
        Ok(reply) => println!("   -> unexpected reply {reply}"),
        Err(e) => println!("   -> refused: {e}"),
    }

    println!("3. owner grants agent every method, flagging test_call_key as a key operation");
    let agent_actor = actor_for(&agent);
    let request = ProxyTargetsBuilder::new().actor(&agent_actor).build(&[KeyOperation {
        target: target_id.clone(),
        methods: vec!["test_call_key".to_owned()],
    }]);
    let grant = wallet.add_expiry_user(&owner, agent.clone(), request).await?;
    println!(
        "   -> grant for {} from {} until {}",
        grant.principal, grant.granted_at, grant.expires_at
    );

    println!("4. agent calls test_call and test_query");
    let reply = agent_actor
        .invoke("test_call", vec![test_args(&wallet_text, "update")])
        .await?;
    println!("   -> test_call: {reply}");
    let reply = agent_actor
        .invoke("test_query", vec![test_args(&wallet_text, "query")])
        .await?;
    println!("   -> test_query: {reply}");

    println!("5. agent calls test_call_key; the owner approves from another task");
    let confirmer = {
        let wallet = Arc::clone(&wallet);
        let owner = owner.clone();
        let agent = agent.clone();
        tokio::spawn(async move {
            for _ in 0..100 {
                match wallet.get_queue_unconfirmed(&owner, &agent).await {
                    Ok(pending) if !pending.is_empty() => {
                        for item in pending {
                            info!(hash = %item.hash, "owner approving deferred call");
                            if let Err(e) = wallet.owner_confirm(&owner, &item.hash, true).await {
                                warn!(error = %e, "owner confirmation failed");
                            }
                        }
                        return;
                    }
                    Ok(_) => {}
                    Err(e) => warn!(error = %e, "listing unconfirmed calls failed"),
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        })
    };
    let reply = agent_actor
        .invoke("test_call_key", vec![test_args(&wallet_text, "key")])
        .await?;
    confirmer.await.context("confirmer task panicked")?;
    println!("   -> test_call_key: {reply}");

    println!("6. owner blacklists agent; agent calls test_call");
    wallet.add_proxy_black_list(&owner, agent.clone()).await?;
    match agent_actor
        .invoke("test_call", vec![test_args(&wallet_text, "blocked")])
        .await
    {
        Ok(reply) => println!("   -> unexpected reply {reply}"),
        Err(e) => println!("   -> refused: {e}"),
    }

    println!(
        "sample target handled {} call(s); wallet balance {}",
        sample.call_count(),
        wallet.balance_get(&owner).await?
    );
    Ok(())
}
