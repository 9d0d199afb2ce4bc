use crate::error::Result;
use crate::models::RebalancerId;
use alloy_primitives::{Address, U256};
use async_trait::async_trait;

/// Contract calls against the aggregator vault factory, the vaults it creates
/// and the pair's tokens. Every transaction is sent from an account managed by
/// the connected node.
///
/// Implementations report failures to confirm as
/// `AggregatorError::TransactionUnconfirmed` and on-ledger rejections as
/// `TransactionReverted` or one of the typed rejections.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    /// `createAggregatorVault`; returns the new vault's address from the
    /// creation event.
    async fn create_aggregator_vault(
        &self,
        rebalancer: RebalancerId,
        vault_config_id: Address,
        token_a: Address,
        token_b: Address,
    ) -> Result<Address>;

    /// Token pair of an existing vault.
    async fn vault_tokens(&self, vault: Address) -> Result<(Address, Address)>;

    /// Rebalancer an existing vault delegates to.
    async fn vault_rebalancer(&self, vault: Address) -> Result<RebalancerId>;

    /// Plain value transfer to a token contract, crediting `from`.
    async fn transfer_value(&self, from: Address, token: Address, amount: U256) -> Result<()>;

    async fn approve(
        &self,
        owner: Address,
        token: Address,
        spender: Address,
        amount: U256,
    ) -> Result<bool>;

    /// Liquidity units recorded by the vault's deposit event.
    async fn deposit(
        &self,
        vault: Address,
        from: Address,
        min_liquidity: U256,
        amount_a: U256,
        amount_b: U256,
    ) -> Result<U256>;

    /// Amounts redeemed according to the vault's withdraw event.
    async fn withdraw(
        &self,
        vault: Address,
        from: Address,
        liquidity: U256,
        recipient: Address,
    ) -> Result<(U256, U256)>;

    async fn balance_of(&self, token: Address, owner: Address) -> Result<U256>;
}
