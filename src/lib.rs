pub mod config;
pub mod constants;
pub mod coordinator;
pub mod error;
pub mod ledger;
pub mod models;
pub mod quote_source;
pub mod rebalancer_selector;
pub mod retry;
pub mod simulated_ledger;
pub mod vault_gateway;

pub use config::{EnvironmentMode, ProviderType, QuoteSourceConfig, RunConfig, VaultAddressing};
pub use coordinator::FundFlowCoordinator;
pub use error::{AggregatorError, Result};
pub use ledger::LedgerClient;
pub use models::*;
pub use quote_source::{HttpQuoteSource, QuoteSource, StaticQuoteSource};
pub use rebalancer_selector::{pick_best, RebalancerSelector};
pub use retry::RetryPolicy;
pub use simulated_ledger::SimulatedLedger;
pub use vault_gateway::VaultGateway;
