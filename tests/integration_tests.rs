use alloy_primitives::{Address, U256};
use liquidity_aggregator_backend::{
    AggregatorError, AssetPairAmount, FlowStep, FundFlowCoordinator, QuoteSource,
    RebalancerId, RebalancerSelector, RunConfig, RunPhase, SimulatedLedger, StaticQuoteSource,
    UserStage, UserTarget, VaultAddressing, VaultGateway,
};
use std::sync::Arc;
use std::time::Duration;

const FACTORY: Address = Address::repeat_byte(0xfa);

fn alice() -> Address {
    Address::with_last_byte(0xa1)
}

fn bob() -> Address {
    Address::with_last_byte(0xb0)
}

fn target(user: Address, asset_a: u64, asset_b: u64) -> UserTarget {
    UserTarget {
        user,
        amounts: AssetPairAmount::new(U256::from(asset_a), U256::from(asset_b)),
    }
}

fn two_users() -> Vec<UserTarget> {
    vec![target(alice(), 1, 4000), target(bob(), 10, 40000)]
}

fn test_config(users: Vec<UserTarget>, settlement_ms: u64) -> RunConfig {
    let mut config = RunConfig::new("http://localhost:8545", users);
    config.settlement_wait = Duration::from_millis(settlement_ms);
    config.retry_delay_ms = 1;
    config
}

fn static_selector(visor: u64, charm: u64) -> RebalancerSelector {
    let sources: Vec<Arc<dyn QuoteSource>> = vec![
        Arc::new(StaticQuoteSource::new(RebalancerId::Visor, U256::from(visor))),
        Arc::new(StaticQuoteSource::new(RebalancerId::Charm, U256::from(charm))),
    ];
    RebalancerSelector::new(sources, RebalancerId::Visor)
}

fn build(
    config: RunConfig,
    ledger: &Arc<SimulatedLedger>,
) -> (FundFlowCoordinator, Arc<VaultGateway>) {
    build_with_selector(config, ledger, static_selector(120, 95))
}

fn build_with_selector(
    config: RunConfig,
    ledger: &Arc<SimulatedLedger>,
    selector: RebalancerSelector,
) -> (FundFlowCoordinator, Arc<VaultGateway>) {
    let gateway = Arc::new(VaultGateway::new(ledger.clone()));
    let coordinator = FundFlowCoordinator::new(config, selector, Arc::clone(&gateway)).unwrap();
    (coordinator, gateway)
}

async fn wait_for_phase(coordinator: &FundFlowCoordinator, phase: RunPhase) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while coordinator.phase() != phase {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("run never reached the expected phase");
}

#[cfg(test)]
mod flow_tests {
    use super::*;

    #[tokio::test]
    async fn test_full_run_two_users() {
        let ledger = Arc::new(SimulatedLedger::new(FACTORY));
        let (coordinator, gateway) = build(test_config(two_users(), 20), &ledger);

        let report = coordinator.run().await.unwrap();

        assert!(!report.cancelled);
        assert_eq!(report.succeeded(), 2);
        assert_eq!(report.failed(), 0);
        assert_eq!(coordinator.phase(), RunPhase::Done);

        let selection = report.selection.clone().unwrap();
        assert_eq!(selection.rebalancer_id, RebalancerId::Visor);
        assert_eq!(selection.quote, U256::from(120));

        let vault = report.vault.clone().unwrap();
        assert_eq!(vault.rebalancer_id, RebalancerId::Visor);
        assert_eq!(ledger.vault_count().await, 1);
        assert_eq!(
            ledger.vault_config(vault.address).await,
            Some((RebalancerId::Visor, vault.vault_config_id))
        );

        for user in [alice(), bob()] {
            let outcome = report.outcome(user).unwrap();
            assert_eq!(outcome.stage, UserStage::Withdrawn);
            assert!(outcome.failure.is_none());

            let position = outcome.position.as_ref().unwrap();
            assert_eq!(position.deposited_pair, outcome.target);
            assert!(!position.is_open());

            // No yield accrued, so the proportional deposits redeem exactly.
            let redeemed = outcome.redeemed.unwrap();
            assert_eq!(redeemed, outcome.target);
            assert_eq!(gateway.balances(&vault, user).await.unwrap(), redeemed);
            assert_eq!(ledger.liquidity_of(vault.address, user).await, U256::ZERO);
        }
    }

    #[tokio::test]
    async fn test_identical_runs_redeem_identically() {
        let mut redeemed = Vec::new();
        for _ in 0..2 {
            let ledger = Arc::new(SimulatedLedger::new(FACTORY));
            let (coordinator, _) = build(test_config(two_users(), 1), &ledger);
            let report = coordinator.run().await.unwrap();
            redeemed.push(
                report
                    .outcomes
                    .iter()
                    .map(|o| (o.user, o.redeemed))
                    .collect::<Vec<_>>(),
            );
        }
        assert_eq!(redeemed[0], redeemed[1]);
    }

    #[tokio::test]
    async fn test_yield_accrued_during_settlement() {
        let ledger = Arc::new(SimulatedLedger::new(FACTORY));
        let (coordinator, _) = build(test_config(two_users(), 300), &ledger);
        let coordinator = Arc::new(coordinator);

        let running = {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move { coordinator.run().await })
        };

        wait_for_phase(&coordinator, RunPhase::Settling).await;
        let vault = coordinator.vault().unwrap().address;
        ledger.accrue(vault, 1000).await.unwrap();

        let report = running.await.unwrap().unwrap();
        assert_eq!(report.succeeded(), 2);

        for outcome in &report.outcomes {
            let redeemed = outcome.redeemed.unwrap();
            assert!(redeemed.asset_a >= outcome.target.asset_a);
            assert!(redeemed.asset_b > outcome.target.asset_b);
        }
    }

    #[tokio::test]
    async fn test_existing_vault_is_reused() {
        let ledger = Arc::new(SimulatedLedger::new(FACTORY));
        let vault = Address::repeat_byte(0xaa);
        let mut config = test_config(two_users(), 1);
        ledger
            .register_vault(
                vault,
                RebalancerId::Visor,
                config.vault_config_id,
                config.token_a,
                config.token_b,
            )
            .await;
        config.vault_addressing = VaultAddressing::Existing {
            factory: FACTORY,
            vault,
        };

        let (coordinator, _) = build(config, &ledger);
        let report = coordinator.run().await.unwrap();

        assert_eq!(report.vault.as_ref().unwrap().address, vault);
        assert_eq!(ledger.vault_count().await, 1);
        assert_eq!(report.succeeded(), 2);
    }

    #[tokio::test]
    async fn test_existing_vault_keeps_its_own_rebalancer() {
        let ledger = Arc::new(SimulatedLedger::new(FACTORY));
        let vault = Address::repeat_byte(0xaa);
        let mut config = test_config(two_users(), 1);
        ledger
            .register_vault(
                vault,
                RebalancerId::Visor,
                config.vault_config_id,
                config.token_a,
                config.token_b,
            )
            .await;
        config.vault_addressing = VaultAddressing::Existing {
            factory: FACTORY,
            vault,
        };

        let (coordinator, _) = build_with_selector(config, &ledger, static_selector(95, 120));
        let report = coordinator.run().await.unwrap();

        assert_eq!(
            report.selection.as_ref().unwrap().rebalancer_id,
            RebalancerId::Charm
        );
        let handle = report.vault.as_ref().unwrap();
        assert_eq!(handle.address, vault);
        assert_eq!(handle.rebalancer_id, RebalancerId::Visor);
        assert_eq!(report.succeeded(), 2);
    }

    #[tokio::test]
    async fn test_unknown_existing_vault_fails_every_user() {
        let ledger = Arc::new(SimulatedLedger::new(FACTORY));
        let mut config = test_config(two_users(), 1);
        config.vault_addressing = VaultAddressing::Existing {
            factory: FACTORY,
            vault: Address::repeat_byte(0xbb),
        };

        let (coordinator, _) = build(config, &ledger);
        let report = coordinator.run().await.unwrap();

        assert!(report.vault.is_none());
        assert_eq!(report.failed(), 2);
        for outcome in &report.outcomes {
            let failure = outcome.failure.as_ref().unwrap();
            assert_eq!(failure.step, FlowStep::Vault);
            assert!(matches!(
                failure.error,
                Some(AggregatorError::VaultNotFound(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_concurrency_limit_of_one_still_completes() {
        let ledger = Arc::new(SimulatedLedger::new(FACTORY));
        let mut config = test_config(two_users(), 1);
        config.max_concurrent_users = 1;

        let (coordinator, _) = build(config, &ledger);
        let report = coordinator.run().await.unwrap();
        assert_eq!(report.succeeded(), 2);
    }
}

#[cfg(test)]
mod failure_isolation_tests {
    use super::*;

    #[tokio::test]
    async fn test_zero_amount_user_fails_alone() {
        let ledger = Arc::new(SimulatedLedger::new(FACTORY));
        let carol = Address::with_last_byte(0xc0);
        let mut users = two_users();
        users.push(target(carol, 0, 0));

        let (coordinator, _) = build(test_config(users, 1), &ledger);
        let report = coordinator.run().await.unwrap();

        assert_eq!(report.succeeded(), 2);
        let outcome = report.outcome(carol).unwrap();
        assert_eq!(outcome.stage, UserStage::Failed);
        let failure = outcome.failure.as_ref().unwrap();
        assert_eq!(failure.step, FlowStep::Deposit);
        assert!(matches!(
            failure.error,
            Some(AggregatorError::TransactionReverted(_))
        ));
        assert!(outcome.position.is_none());
    }

    #[tokio::test]
    async fn test_minimum_liquidity_guard() {
        let ledger = Arc::new(SimulatedLedger::new(FACTORY));
        let mut config = test_config(two_users(), 1);
        config.min_liquidity = U256::from(1_000_000);

        let (coordinator, _) = build(config, &ledger);
        let report = coordinator.run().await.unwrap();

        assert_eq!(report.succeeded(), 0);
        for outcome in &report.outcomes {
            let failure = outcome.failure.as_ref().unwrap();
            assert_eq!(failure.step, FlowStep::Deposit);
            assert!(matches!(
                failure.error,
                Some(AggregatorError::TransactionReverted(_))
            ));
        }
    }
}

#[cfg(test)]
mod cancellation_tests {
    use super::*;

    #[tokio::test]
    async fn test_cancel_before_start_leaves_users_pending() {
        let ledger = Arc::new(SimulatedLedger::new(FACTORY));
        let (coordinator, _) = build(test_config(two_users(), 1), &ledger);
        coordinator.shutdown_token().cancel();

        let report = coordinator.run().await.unwrap();

        assert!(report.cancelled);
        assert!(report.vault.is_none());
        assert_eq!(ledger.vault_count().await, 0);
        assert!(report
            .outcomes
            .iter()
            .all(|o| o.stage == UserStage::Pending));
    }

    #[tokio::test]
    async fn test_cancel_during_settlement_keeps_positions() {
        let ledger = Arc::new(SimulatedLedger::new(FACTORY));
        let (coordinator, _) = build(test_config(two_users(), 60_000), &ledger);
        let coordinator = Arc::new(coordinator);

        let running = {
            let coordinator = Arc::clone(&coordinator);
            tokio::spawn(async move { coordinator.run().await })
        };

        wait_for_phase(&coordinator, RunPhase::Settling).await;
        coordinator.shutdown_token().cancel();

        let report = tokio::time::timeout(Duration::from_secs(5), running)
            .await
            .expect("cancelled run did not stop")
            .unwrap()
            .unwrap();

        assert!(report.cancelled);
        assert_eq!(coordinator.phase(), RunPhase::Done);
        let vault = report.vault.clone().unwrap();
        for outcome in &report.outcomes {
            assert_eq!(outcome.stage, UserStage::Deposited);
            assert!(outcome.redeemed.is_none());
            let position = outcome.position.as_ref().unwrap();
            assert!(position.is_open());
            assert_eq!(
                ledger.liquidity_of(vault.address, outcome.user).await,
                position.liquidity_units
            );
        }
    }
}
