use alloy_primitives::Address;
use anyhow::Context;
use liquidity_aggregator_backend::{
    FundFlowCoordinator, RebalancerSelector, RunConfig, SimulatedLedger, UserStage,
    VaultAddressing, VaultGateway,
};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Factory address of the in-process development ledger.
const DEVELOPMENT_FACTORY: Address = Address::repeat_byte(0xfa);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Liquidity Aggregator Backend");

    let config = RunConfig::from_env().context("invalid run configuration")?;
    info!(
        "Ledger provider {} ({:?}, {:?})",
        config.provider, config.provider_type, config.environment
    );

    let ledger = Arc::new(match config.vault_addressing {
        VaultAddressing::Deploy => SimulatedLedger::new(DEVELOPMENT_FACTORY),
        VaultAddressing::Existing { factory, vault } => {
            let ledger = SimulatedLedger::new(factory);
            ledger
                .register_vault(
                    vault,
                    config.default_rebalancer,
                    config.vault_config_id,
                    config.token_a,
                    config.token_b,
                )
                .await;
            ledger
        }
    });
    info!("All contracts have been initialized!");

    let selector = RebalancerSelector::new(
        config.build_quote_sources()?,
        config.default_rebalancer,
    );
    let gateway = Arc::new(VaultGateway::new(ledger));
    let users = config.users.clone();

    let coordinator = FundFlowCoordinator::new(config, selector, Arc::clone(&gateway))?;

    let shutdown = coordinator.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Shutdown requested; letting in-flight users reach a checkpoint");
            shutdown.cancel();
        }
    });

    let report = coordinator.run().await?;

    for outcome in &report.outcomes {
        match outcome.stage {
            UserStage::Withdrawn => {
                if let Some(redeemed) = outcome.redeemed {
                    info!(
                        "User {}: current {} / {}",
                        outcome.user, redeemed.asset_a, redeemed.asset_b
                    );
                }
            }
            UserStage::Failed => {
                if let Some(failure) = &outcome.failure {
                    error!(
                        "User {} failed at {:?}: {}",
                        outcome.user, failure.step, failure.reason
                    );
                }
            }
            stage => warn!("User {} stopped at {:?}", outcome.user, stage),
        }
    }

    if let Some(vault) = &report.vault {
        for target in &users {
            let balances = gateway.balances(vault, target.user).await?;
            info!("User {} holds {}", target.user, balances);
        }
    }

    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}
