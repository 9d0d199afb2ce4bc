use alloy_primitives::{Address, U256};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AggregatorError {
    #[error("Quote fetch failed for {rebalancer}: {reason}")]
    QuoteFetchFailed { rebalancer: String, reason: String },

    #[error("No valid quotes received from any rebalancer")]
    NoValidQuotes,

    #[error("Insufficient balance: available={available}, required={required}")]
    InsufficientBalance { available: U256, required: U256 },

    #[error("Insufficient approval: approved={approved}, required={required}")]
    InsufficientApproval { approved: U256, required: U256 },

    #[error("Invalid liquidity amount: requested={requested}, owned={owned}")]
    InvalidLiquidityAmount { requested: U256, owned: U256 },

    #[error("Approval rejected for token {token}")]
    ApprovalRejected { token: Address },

    #[error("Transaction unconfirmed: {0}")]
    TransactionUnconfirmed(String),

    #[error("Transaction reverted: {0}")]
    TransactionReverted(String),

    #[error("Vault already initialized for this run: {0}")]
    VaultAlreadyInitialized(String),

    #[error("Vault not found: {0}")]
    VaultNotFound(Address),

    #[error("Run cancelled")]
    Cancelled,

    #[error("Invalid run state: {0}")]
    InvalidRunState(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl AggregatorError {
    /// Failures below the ledger layer that may succeed when resubmitted.
    pub fn is_transient(&self) -> bool {
        matches!(self, AggregatorError::TransactionUnconfirmed(_))
    }
}

pub type Result<T> = std::result::Result<T, AggregatorError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_unconfirmed_is_transient() {
        assert!(AggregatorError::TransactionUnconfirmed("timeout".into()).is_transient());
        assert!(!AggregatorError::TransactionReverted("slippage".into()).is_transient());
        assert!(!AggregatorError::InvalidLiquidityAmount {
            requested: U256::from(2),
            owned: U256::from(1),
        }
        .is_transient());
        assert!(!AggregatorError::ConfigurationError("PROVIDER".into()).is_transient());
    }
}
