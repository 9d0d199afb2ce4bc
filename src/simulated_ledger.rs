use crate::error::{AggregatorError, Result};
use crate::ledger::LedgerClient;
use crate::models::RebalancerId;
use alloy_primitives::{Address, U256};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info};

const BPS_DENOMINATOR: u64 = 10_000;

/// In-process stand-in for a local development chain running the aggregator
/// vault factory. Vaults mint liquidity units pro rata to reserves and redeem
/// them against the reserves at withdraw time, so accrued yield changes the
/// redemption ratio.
pub struct SimulatedLedger {
    factory: Address,
    state: RwLock<LedgerState>,
}

#[derive(Default)]
struct LedgerState {
    balances: HashMap<(Address, Address), U256>,
    allowances: HashMap<(Address, Address, Address), U256>,
    vaults: HashMap<Address, SimulatedVault>,
    factory_nonce: u64,
}

#[derive(Debug, Clone)]
struct SimulatedVault {
    rebalancer: RebalancerId,
    vault_config_id: Address,
    token_a: Address,
    token_b: Address,
    reserve_a: U256,
    reserve_b: U256,
    total_units: U256,
    units: HashMap<Address, U256>,
}

impl SimulatedVault {
    fn new(
        rebalancer: RebalancerId,
        vault_config_id: Address,
        token_a: Address,
        token_b: Address,
    ) -> Self {
        Self {
            rebalancer,
            vault_config_id,
            token_a,
            token_b,
            reserve_a: U256::ZERO,
            reserve_b: U256::ZERO,
            total_units: U256::ZERO,
            units: HashMap::new(),
        }
    }

    fn units_for(&self, amount_a: U256, amount_b: U256) -> Result<U256> {
        if self.total_units.is_zero() {
            return amount_a
                .checked_add(amount_b)
                .ok_or_else(|| overflow("deposit"));
        }

        let by_a = share_of(amount_a, self.total_units, self.reserve_a)?;
        let by_b = share_of(amount_b, self.total_units, self.reserve_b)?;
        Ok(match (by_a, by_b) {
            (Some(a), Some(b)) => a.min(b),
            (Some(a), None) => a,
            (None, Some(b)) => b,
            (None, None) => U256::ZERO,
        })
    }
}

impl SimulatedLedger {
    pub fn new(factory: Address) -> Self {
        Self {
            factory,
            state: RwLock::new(LedgerState::default()),
        }
    }

    pub fn factory(&self) -> Address {
        self.factory
    }

    /// Make a vault deployed outside this run known to the ledger.
    pub async fn register_vault(
        &self,
        address: Address,
        rebalancer: RebalancerId,
        vault_config_id: Address,
        token_a: Address,
        token_b: Address,
    ) {
        let mut state = self.state.write().await;
        state.vaults.insert(
            address,
            SimulatedVault::new(rebalancer, vault_config_id, token_a, token_b),
        );
    }

    /// Grow a vault's reserves by `bps` basis points, as the rebalancer's
    /// strategy would between deposit and withdraw.
    pub async fn accrue(&self, vault: Address, bps: u64) -> Result<()> {
        let mut state = self.state.write().await;
        let vault_state = state
            .vaults
            .get_mut(&vault)
            .ok_or(AggregatorError::VaultNotFound(vault))?;

        let bps = U256::from(bps);
        let denominator = U256::from(BPS_DENOMINATOR);
        let yield_a = mul_div(vault_state.reserve_a, bps, denominator)?;
        let yield_b = mul_div(vault_state.reserve_b, bps, denominator)?;
        vault_state.reserve_a += yield_a;
        vault_state.reserve_b += yield_b;

        info!(
            "Accrued {} bps on vault {} ({})",
            bps, vault, vault_state.rebalancer
        );
        Ok(())
    }

    pub async fn liquidity_of(&self, vault: Address, owner: Address) -> U256 {
        let state = self.state.read().await;
        state
            .vaults
            .get(&vault)
            .and_then(|v| v.units.get(&owner).copied())
            .unwrap_or_default()
    }

    pub async fn allowance(&self, token: Address, owner: Address, spender: Address) -> U256 {
        let state = self.state.read().await;
        state
            .allowances
            .get(&(token, owner, spender))
            .copied()
            .unwrap_or_default()
    }

    pub async fn vault_count(&self) -> usize {
        self.state.read().await.vaults.len()
    }

    pub async fn vault_config(&self, vault: Address) -> Option<(RebalancerId, Address)> {
        let state = self.state.read().await;
        state
            .vaults
            .get(&vault)
            .map(|v| (v.rebalancer, v.vault_config_id))
    }
}

impl LedgerState {
    fn balance(&self, token: Address, owner: Address) -> U256 {
        self.balances
            .get(&(token, owner))
            .copied()
            .unwrap_or_default()
    }

    fn allowance(&self, token: Address, owner: Address, spender: Address) -> U256 {
        self.allowances
            .get(&(token, owner, spender))
            .copied()
            .unwrap_or_default()
    }

    fn check_spend(
        &self,
        token: Address,
        owner: Address,
        spender: Address,
        amount: U256,
    ) -> Result<()> {
        let approved = self.allowance(token, owner, spender);
        if approved < amount {
            return Err(AggregatorError::InsufficientApproval {
                approved,
                required: amount,
            });
        }

        let available = self.balance(token, owner);
        if available < amount {
            return Err(AggregatorError::InsufficientBalance {
                available,
                required: amount,
            });
        }

        Ok(())
    }

    fn spend(&mut self, token: Address, owner: Address, spender: Address, amount: U256) {
        let allowance = self.allowances.entry((token, owner, spender)).or_default();
        *allowance -= amount;
        let balance = self.balances.entry((token, owner)).or_default();
        *balance -= amount;
    }

    fn credit(&mut self, token: Address, owner: Address, amount: U256) -> Result<()> {
        let balance = self.balances.entry((token, owner)).or_default();
        *balance = balance
            .checked_add(amount)
            .ok_or_else(|| overflow("credit"))?;
        Ok(())
    }
}

#[async_trait]
impl LedgerClient for SimulatedLedger {
    async fn create_aggregator_vault(
        &self,
        rebalancer: RebalancerId,
        vault_config_id: Address,
        token_a: Address,
        token_b: Address,
    ) -> Result<Address> {
        if token_a == token_b {
            return Err(AggregatorError::TransactionReverted(
                "identical pair tokens".to_string(),
            ));
        }

        let mut state = self.state.write().await;
        let address = self.factory.create(state.factory_nonce);
        state.factory_nonce += 1;
        state.vaults.insert(
            address,
            SimulatedVault::new(rebalancer, vault_config_id, token_a, token_b),
        );

        info!(
            "Factory {} created {} vault {}",
            self.factory,
            rebalancer.name(),
            address
        );
        Ok(address)
    }

    async fn vault_tokens(&self, vault: Address) -> Result<(Address, Address)> {
        let state = self.state.read().await;
        state
            .vaults
            .get(&vault)
            .map(|v| (v.token_a, v.token_b))
            .ok_or(AggregatorError::VaultNotFound(vault))
    }

    async fn vault_rebalancer(&self, vault: Address) -> Result<RebalancerId> {
        let state = self.state.read().await;
        state
            .vaults
            .get(&vault)
            .map(|v| v.rebalancer)
            .ok_or(AggregatorError::VaultNotFound(vault))
    }

    async fn transfer_value(&self, from: Address, token: Address, amount: U256) -> Result<()> {
        let mut state = self.state.write().await;
        state.credit(token, from, amount)?;
        debug!("Credited {} of {} to {}", amount, token, from);
        Ok(())
    }

    async fn approve(
        &self,
        owner: Address,
        token: Address,
        spender: Address,
        amount: U256,
    ) -> Result<bool> {
        let mut state = self.state.write().await;
        state.allowances.insert((token, owner, spender), amount);
        Ok(true)
    }

    async fn deposit(
        &self,
        vault: Address,
        from: Address,
        min_liquidity: U256,
        amount_a: U256,
        amount_b: U256,
    ) -> Result<U256> {
        let mut state = self.state.write().await;
        let (token_a, token_b, units) = {
            let vault_state = state
                .vaults
                .get(&vault)
                .ok_or(AggregatorError::VaultNotFound(vault))?;
            (
                vault_state.token_a,
                vault_state.token_b,
                vault_state.units_for(amount_a, amount_b)?,
            )
        };

        state.check_spend(token_a, from, vault, amount_a)?;
        state.check_spend(token_b, from, vault, amount_b)?;

        if units.is_zero() {
            return Err(AggregatorError::TransactionReverted(
                "zero liquidity minted".to_string(),
            ));
        }
        if units < min_liquidity {
            return Err(AggregatorError::TransactionReverted(format!(
                "minted {} below minimum {}",
                units, min_liquidity
            )));
        }

        state.spend(token_a, from, vault, amount_a);
        state.spend(token_b, from, vault, amount_b);

        let vault_state = state
            .vaults
            .get_mut(&vault)
            .ok_or(AggregatorError::VaultNotFound(vault))?;
        vault_state.reserve_a += amount_a;
        vault_state.reserve_b += amount_b;
        vault_state.total_units += units;
        *vault_state.units.entry(from).or_default() += units;

        Ok(units)
    }

    async fn withdraw(
        &self,
        vault: Address,
        from: Address,
        liquidity: U256,
        recipient: Address,
    ) -> Result<(U256, U256)> {
        let mut state = self.state.write().await;
        let vault_state = state
            .vaults
            .get_mut(&vault)
            .ok_or(AggregatorError::VaultNotFound(vault))?;

        let owned = vault_state.units.get(&from).copied().unwrap_or_default();
        if liquidity > owned {
            return Err(AggregatorError::InvalidLiquidityAmount {
                requested: liquidity,
                owned,
            });
        }
        if liquidity.is_zero() {
            return Err(AggregatorError::TransactionReverted(
                "zero liquidity".to_string(),
            ));
        }

        let amount_a = mul_div(liquidity, vault_state.reserve_a, vault_state.total_units)?;
        let amount_b = mul_div(liquidity, vault_state.reserve_b, vault_state.total_units)?;

        vault_state.reserve_a -= amount_a;
        vault_state.reserve_b -= amount_b;
        vault_state.total_units -= liquidity;
        vault_state.units.insert(from, owned - liquidity);
        let (token_a, token_b) = (vault_state.token_a, vault_state.token_b);

        state.credit(token_a, recipient, amount_a)?;
        state.credit(token_b, recipient, amount_b)?;

        Ok((amount_a, amount_b))
    }

    async fn balance_of(&self, token: Address, owner: Address) -> Result<U256> {
        Ok(self.state.read().await.balance(token, owner))
    }
}

fn mul_div(value: U256, numerator: U256, denominator: U256) -> Result<U256> {
    if denominator.is_zero() {
        return Err(AggregatorError::TransactionReverted(
            "division by zero".to_string(),
        ));
    }
    value
        .checked_mul(numerator)
        .map(|product| product / denominator)
        .ok_or_else(|| overflow("mul_div"))
}

/// `amount * total / reserve`, or `None` for an empty reserve.
fn share_of(amount: U256, total: U256, reserve: U256) -> Result<Option<U256>> {
    if reserve.is_zero() {
        return Ok(None);
    }
    mul_div(amount, total, reserve).map(Some)
}

fn overflow(context: &str) -> AggregatorError {
    AggregatorError::TransactionReverted(format!("arithmetic overflow in {}", context))
}
