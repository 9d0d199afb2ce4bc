use crate::error::{AggregatorError, Result};
use crate::ledger::LedgerClient;
use crate::models::{AssetPairAmount, RebalancerId, VaultHandle};
use alloy_primitives::{Address, U256};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info};

/// Contract-call façade over the aggregator vault of the active run.
pub struct VaultGateway {
    ledger: Arc<dyn LedgerClient>,
}

impl VaultGateway {
    pub fn new(ledger: Arc<dyn LedgerClient>) -> Self {
        Self { ledger }
    }

    /// Deploy a vault for the pair through the factory. Callers must ensure
    /// this happens at most once per run.
    pub async fn create_vault(
        &self,
        rebalancer_id: RebalancerId,
        vault_config_id: Address,
        asset_a: Address,
        asset_b: Address,
    ) -> Result<VaultHandle> {
        let address = self
            .ledger
            .create_aggregator_vault(rebalancer_id, vault_config_id, asset_a, asset_b)
            .await?;

        info!("Created {} aggregator vault {}", rebalancer_id, address);

        Ok(VaultHandle {
            address,
            rebalancer_id,
            vault_config_id,
            asset_a,
            asset_b,
            created_at: Utc::now(),
        })
    }

    /// Reuse a vault that already exists on the ledger. The pair and the
    /// rebalancer are read from the vault itself.
    pub async fn attach_vault(
        &self,
        address: Address,
        vault_config_id: Address,
    ) -> Result<VaultHandle> {
        let (asset_a, asset_b) = self.ledger.vault_tokens(address).await?;
        let rebalancer_id = self.ledger.vault_rebalancer(address).await?;

        info!(
            "Attached to existing {} aggregator vault {}",
            rebalancer_id, address
        );

        Ok(VaultHandle {
            address,
            rebalancer_id,
            vault_config_id,
            asset_a,
            asset_b,
            created_at: Utc::now(),
        })
    }

    pub async fn fund(&self, user: Address, token: Address, amount: U256) -> Result<()> {
        self.ledger.transfer_value(user, token, amount).await?;
        debug!("Funded {} with {} of {}", user, amount, token);
        Ok(())
    }

    /// Approve one token of the pair to the vault.
    pub async fn approve(
        &self,
        handle: &VaultHandle,
        user: Address,
        token: Address,
        amount: U256,
    ) -> Result<()> {
        let approved = self
            .ledger
            .approve(user, token, handle.address, amount)
            .await?;
        if !approved {
            return Err(AggregatorError::ApprovalRejected { token });
        }
        debug!("{} approved {} of {} to {}", user, amount, token, handle.address);
        Ok(())
    }

    /// Approve both assets of the pair, A first.
    pub async fn approve_pair(
        &self,
        handle: &VaultHandle,
        user: Address,
        amounts: AssetPairAmount,
    ) -> Result<()> {
        self.approve(handle, user, handle.asset_a, amounts.asset_a)
            .await?;
        self.approve(handle, user, handle.asset_b, amounts.asset_b)
            .await
    }

    /// Deposit both amounts; returns the liquidity units the vault recorded.
    pub async fn deposit(
        &self,
        handle: &VaultHandle,
        user: Address,
        amounts: AssetPairAmount,
        min_liquidity: U256,
    ) -> Result<U256> {
        let units = self
            .ledger
            .deposit(
                handle.address,
                user,
                min_liquidity,
                amounts.asset_a,
                amounts.asset_b,
            )
            .await?;

        info!("{} deposited {} for {} liquidity units", user, amounts, units);
        Ok(units)
    }

    /// Redeem liquidity units; amounts come from the vault's settlement event.
    pub async fn withdraw(
        &self,
        handle: &VaultHandle,
        user: Address,
        liquidity_units: U256,
        recipient: Address,
    ) -> Result<AssetPairAmount> {
        let (asset_a, asset_b) = self
            .ledger
            .withdraw(handle.address, user, liquidity_units, recipient)
            .await?;

        let redeemed = AssetPairAmount::new(asset_a, asset_b);
        info!(
            "{} withdrew {} liquidity units for {}",
            user, liquidity_units, redeemed
        );
        Ok(redeemed)
    }

    pub async fn balances(&self, handle: &VaultHandle, owner: Address) -> Result<AssetPairAmount> {
        let asset_a = self.ledger.balance_of(handle.asset_a, owner).await?;
        let asset_b = self.ledger.balance_of(handle.asset_b, owner).await?;
        Ok(AssetPairAmount::new(asset_a, asset_b))
    }
}
