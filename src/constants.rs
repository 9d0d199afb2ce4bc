use alloy_primitives::{address, Address};

/// Wrapped ether.
pub const WETH: Address = address!("c02aaa39b223fe8d0a0e5c4f27ead9083c756cc2");

/// Stable-coin leg of the default pair.
pub const USDT: Address = address!("a0b86991c6218b36c1d19d4a2e9eb0ce3606eb48");

/// Visor ETH/USDT hypervisor.
pub const VISOR_ETH_USDT_VAULT: Address = address!("9a98bffabc0abf291d6811c034e239e916bbcec0");

pub const VISOR_QUOTE_ENDPOINT: &str =
    "https://api.flipsidecrypto.com/api/v2/queries/c780d56e-9a24-42d2-a87b-54d46a58b762/data/latest";

pub const DEFAULT_QUOTE_FIELD: &str = "VIRTUAL_LIQUIDITY_ADJUSTED";

pub const DEFAULT_QUOTE_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_SETTLEMENT_WAIT_MS: u64 = 10_000;
pub const DEFAULT_MAX_CONCURRENT_USERS: usize = 4;
pub const DEFAULT_MAX_TRANSACTION_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 1_000;

