use crate::config::{RunConfig, VaultAddressing};
use crate::error::{AggregatorError, Result};
use crate::models::{
    FlowStep, RunPhase, RunReport, Selection, UserOutcome, UserPosition, UserStage, VaultHandle,
};
use crate::rebalancer_selector::RebalancerSelector;
use crate::retry::RetryPolicy;
use crate::vault_gateway::VaultGateway;
use alloy_primitives::U256;
use chrono::Utc;
use futures::future::join_all;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{OnceCell, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Drives one run: select a rebalancer, prepare its vault, then move every
/// configured user through fund, approve, deposit, settle and withdraw.
pub struct FundFlowCoordinator {
    config: RunConfig,
    selector: RebalancerSelector,
    gateway: Arc<VaultGateway>,
    retry: RetryPolicy,
    vault: OnceCell<VaultHandle>,
    vault_requested: AtomicBool,
    phase: Mutex<RunPhase>,
    shutdown: CancellationToken,
}

impl FundFlowCoordinator {
    /// Fails with a configuration error before any ledger interaction.
    pub fn new(
        config: RunConfig,
        selector: RebalancerSelector,
        gateway: Arc<VaultGateway>,
    ) -> Result<Self> {
        config.validate()?;
        let retry = config.retry_policy();

        Ok(Self {
            config,
            selector,
            gateway,
            retry,
            vault: OnceCell::new(),
            vault_requested: AtomicBool::new(false),
            phase: Mutex::new(RunPhase::Init),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn with_shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = shutdown;
        self
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn phase(&self) -> RunPhase {
        self.phase.lock().map(|phase| *phase).unwrap_or(RunPhase::Done)
    }

    pub fn vault(&self) -> Option<&VaultHandle> {
        self.vault.get()
    }

    fn advance(&self, next: RunPhase) -> Result<()> {
        let mut phase = self
            .phase
            .lock()
            .map_err(|_| AggregatorError::InternalError("run phase lock poisoned".to_string()))?;
        phase.advance(next)
    }

    /// Select the best rebalancer and create (or attach) the run's vault.
    ///
    /// Only the first call per coordinator reaches the ledger; later calls are
    /// rejected even if the first one failed.
    pub async fn prepare_vault(&self) -> Result<(Selection, VaultHandle)> {
        if self.vault_requested.swap(true, Ordering::SeqCst) {
            let existing = self
                .vault
                .get()
                .map(|v| v.address.to_string())
                .unwrap_or_else(|| "creation already attempted".to_string());
            return Err(AggregatorError::VaultAlreadyInitialized(existing));
        }

        info!("Getting quote from best rebalancer...");
        let selection = self.selector.select_best().await;

        if self.shutdown.is_cancelled() {
            warn!("Shutdown requested before vault preparation");
            return Err(AggregatorError::Cancelled);
        }

        // Creation is submitted once. An unconfirmed factory call may still
        // land, so resubmitting could leave two vaults in one run.
        let handle = match self.config.vault_addressing {
            VaultAddressing::Deploy => {
                self.gateway
                    .create_vault(
                        selection.rebalancer_id,
                        self.config.vault_config_id,
                        self.config.token_a,
                        self.config.token_b,
                    )
                    .await?
            }
            VaultAddressing::Existing { factory, vault } => {
                info!("Reusing vault {} from factory {}", vault, factory);
                let handle = self
                    .gateway
                    .attach_vault(vault, self.config.vault_config_id)
                    .await?;
                if handle.rebalancer_id != selection.rebalancer_id {
                    warn!(
                        "Best quote is from {} but vault {} delegates to {}",
                        selection.rebalancer_id, handle.address, handle.rebalancer_id
                    );
                }
                handle
            }
        };

        self.vault
            .set(handle.clone())
            .map_err(|_| AggregatorError::VaultAlreadyInitialized(handle.address.to_string()))?;
        self.advance(RunPhase::VaultReady)?;

        Ok((selection, handle))
    }

    /// Execute the full run and report every user's outcome.
    ///
    /// Per-user failures and vault preparation failures are recorded in the
    /// report. Errors only if this coordinator has already run.
    pub async fn run(&self) -> Result<RunReport> {
        if self.phase() != RunPhase::Init {
            return Err(AggregatorError::InvalidRunState(
                "coordinator has already run".to_string(),
            ));
        }

        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let mut outcomes: Vec<UserOutcome> =
            self.config.users.iter().map(UserOutcome::pending).collect();

        info!("Starting run {} for {} users", run_id, outcomes.len());

        let mut report = RunReport {
            run_id,
            selection: None,
            vault: None,
            outcomes: Vec::new(),
            cancelled: false,
            started_at,
            finished_at: started_at,
        };

        if self.shutdown.is_cancelled() {
            warn!("Run {} cancelled before start", run_id);
            report.cancelled = true;
            report.outcomes = outcomes;
            return self.finish(report);
        }

        let handle = match self.prepare_vault().await {
            Ok((selection, handle)) => {
                info!(
                    "Depositing user funds to {} vault {}",
                    selection.rebalancer_id, handle.address
                );
                report.selection = Some(selection);
                report.vault = Some(handle.clone());
                handle
            }
            Err(AggregatorError::Cancelled) => {
                warn!("Run {} cancelled before vault preparation", run_id);
                report.cancelled = true;
                report.outcomes = outcomes;
                return self.finish(report);
            }
            Err(e) => {
                error!("Vault preparation failed: {}", e);
                for outcome in &mut outcomes {
                    outcome.fail(FlowStep::Vault, e.clone());
                }
                report.outcomes = outcomes;
                return self.finish(report);
            }
        };

        let fan_out = Semaphore::new(self.config.max_concurrent_users);

        self.advance(RunPhase::Depositing)?;
        outcomes = join_all(
            outcomes
                .into_iter()
                .map(|outcome| self.deposit_user(&handle, outcome, &fan_out)),
        )
        .await;

        self.advance(RunPhase::Settling)?;
        let deposited = outcomes
            .iter()
            .filter(|o| o.stage == UserStage::Deposited)
            .count();
        if deposited > 0 && !self.settle().await {
            warn!("Run {} cancelled during settlement; skipping withdrawals", run_id);
            report.cancelled = true;
            report.outcomes = outcomes;
            return self.finish(report);
        }

        self.advance(RunPhase::Withdrawing)?;
        info!("Withdraw user funds in {}", handle.rebalancer_id);
        outcomes = join_all(
            outcomes
                .into_iter()
                .map(|outcome| self.withdraw_user(&handle, outcome, &fan_out)),
        )
        .await;

        report.cancelled = self.shutdown.is_cancelled();
        report.outcomes = outcomes;
        self.finish(report)
    }

    fn finish(&self, mut report: RunReport) -> Result<RunReport> {
        self.advance(RunPhase::Done)?;
        report.finished_at = Utc::now();
        info!(
            "Run {} finished: {} withdrawn, {} failed, {} users",
            report.run_id,
            report.succeeded(),
            report.failed(),
            report.outcomes.len()
        );
        Ok(report)
    }

    /// Wait out the settlement interval. Returns false if cancelled.
    async fn settle(&self) -> bool {
        info!(
            "Simulate LP staking for {:?}...",
            self.config.settlement_wait
        );
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => false,
            _ = tokio::time::sleep(self.config.settlement_wait) => {
                info!("Settlement wait of {:?} elapsed", self.config.settlement_wait);
                true
            }
        }
    }

    async fn deposit_user(
        &self,
        handle: &VaultHandle,
        mut outcome: UserOutcome,
        fan_out: &Semaphore,
    ) -> UserOutcome {
        let _permit = match fan_out.acquire().await {
            Ok(permit) => permit,
            Err(e) => {
                outcome.fail(FlowStep::Fund, AggregatorError::InternalError(e.to_string()));
                return outcome;
            }
        };

        // Sequences not yet started stay pending once shutdown is requested.
        if self.shutdown.is_cancelled() {
            info!("Shutdown requested; not starting user {}", outcome.user);
            return outcome;
        }

        let user = outcome.user;
        let amounts = outcome.target;
        let gateway = &self.gateway;
        info!("User {}", user);

        for (token, amount) in [
            (handle.asset_a, amounts.asset_a),
            (handle.asset_b, amounts.asset_b),
        ] {
            let funded = self
                .retry
                .run("fund", move || gateway.fund(user, token, amount))
                .await;
            if let Err(e) = funded {
                warn!("Funding {} failed: {}", user, e);
                outcome.fail(FlowStep::Fund, e);
                return outcome;
            }
        }
        outcome.stage = UserStage::Funded;

        let approved = self
            .retry
            .run("approve", move || gateway.approve_pair(handle, user, amounts))
            .await;
        if let Err(e) = approved {
            warn!("Approval for {} failed: {}", user, e);
            outcome.fail(FlowStep::Approve, e);
            return outcome;
        }
        outcome.stage = UserStage::Approved;

        let min_liquidity = self.config.min_liquidity;
        let deposited = self
            .retry
            .run("deposit", move || {
                gateway.deposit(handle, user, amounts, min_liquidity)
            })
            .await;

        match deposited {
            Ok(liquidity_units) => {
                outcome.position = Some(UserPosition {
                    user_id: user,
                    deposited_pair: amounts,
                    liquidity_units,
                });
                outcome.stage = UserStage::Deposited;
            }
            Err(e) => {
                warn!("Deposit for {} failed: {}", user, e);
                outcome.fail(FlowStep::Deposit, e);
            }
        }

        outcome
    }

    async fn withdraw_user(
        &self,
        handle: &VaultHandle,
        mut outcome: UserOutcome,
        fan_out: &Semaphore,
    ) -> UserOutcome {
        if outcome.stage != UserStage::Deposited {
            return outcome;
        }
        let Some(liquidity_units) = outcome.position.as_ref().map(|p| p.liquidity_units) else {
            return outcome;
        };

        let _permit = match fan_out.acquire().await {
            Ok(permit) => permit,
            Err(e) => {
                outcome.fail(FlowStep::Withdraw, AggregatorError::InternalError(e.to_string()));
                return outcome;
            }
        };

        if self.shutdown.is_cancelled() {
            info!("Shutdown requested; {} keeps its position", outcome.user);
            return outcome;
        }

        let user = outcome.user;
        let gateway = &self.gateway;
        let withdrawn = self
            .retry
            .run("withdraw", move || {
                gateway.withdraw(handle, user, liquidity_units, user)
            })
            .await;

        match withdrawn {
            Ok(redeemed) => {
                info!("User {} redeemed {}", user, redeemed);
                if let Some(position) = outcome.position.as_mut() {
                    position.liquidity_units = U256::ZERO;
                }
                outcome.redeemed = Some(redeemed);
                outcome.stage = UserStage::Withdrawn;
            }
            Err(e) => {
                warn!("Withdraw for {} failed: {}", user, e);
                outcome.fail(FlowStep::Withdraw, e);
            }
        }

        outcome
    }
}
