use alloy_primitives::{Address, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::AggregatorError;

/// Rebalancer back-ends the aggregator vault can delegate to.
///
/// Declaration order is the tie-break priority: lower ordinal wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RebalancerId {
    Visor,
    Charm,
}

impl RebalancerId {
    pub const ALL: [RebalancerId; 2] = [RebalancerId::Visor, RebalancerId::Charm];

    pub fn ordinal(self) -> u8 {
        self as u8
    }

    /// Name the factory contract expects on vault creation.
    pub fn name(self) -> &'static str {
        match self {
            RebalancerId::Visor => "Visor",
            RebalancerId::Charm => "Charm",
        }
    }
}

impl fmt::Display for RebalancerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for RebalancerId {
    type Err = AggregatorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "visor" => Ok(RebalancerId::Visor),
            "charm" => Ok(RebalancerId::Charm),
            other => Err(AggregatorError::ConfigurationError(format!(
                "Unknown rebalancer: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    pub rebalancer_id: RebalancerId,
    pub value: U256,
    pub fetched_at: DateTime<Utc>,
    pub valid: bool,
}

impl Quote {
    pub fn valid(rebalancer_id: RebalancerId, value: U256) -> Self {
        Self {
            rebalancer_id,
            value,
            fetched_at: Utc::now(),
            valid: true,
        }
    }

    pub fn invalid(rebalancer_id: RebalancerId) -> Self {
        Self {
            rebalancer_id,
            value: U256::ZERO,
            fetched_at: Utc::now(),
            valid: false,
        }
    }
}

/// Outcome of one selection cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selection {
    pub rebalancer_id: RebalancerId,
    pub quote: U256,
    /// Set when no valid quote was available and the default was used.
    pub degraded: bool,
}

/// Two amounts in atomic base units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AssetPairAmount {
    pub asset_a: U256,
    pub asset_b: U256,
}

impl AssetPairAmount {
    pub fn new(asset_a: U256, asset_b: U256) -> Self {
        Self { asset_a, asset_b }
    }

    pub fn is_zero(&self) -> bool {
        self.asset_a.is_zero() && self.asset_b.is_zero()
    }
}

impl fmt::Display for AssetPairAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.asset_a, self.asset_b)
    }
}

/// One entry of the run's user/amount list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserTarget {
    pub user: Address,
    pub amounts: AssetPairAmount,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPosition {
    pub user_id: Address,
    pub deposited_pair: AssetPairAmount,
    pub liquidity_units: U256,
}

impl UserPosition {
    pub fn is_open(&self) -> bool {
        !self.liquidity_units.is_zero()
    }
}

/// The aggregator vault serving the active run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaultHandle {
    pub address: Address,
    pub rebalancer_id: RebalancerId,
    pub vault_config_id: Address,
    pub asset_a: Address,
    pub asset_b: Address,
    pub created_at: DateTime<Utc>,
}

/// Run-level phases. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RunPhase {
    Init,
    VaultReady,
    Depositing,
    Settling,
    Withdrawing,
    Done,
}

impl RunPhase {
    pub fn advance(&mut self, next: RunPhase) -> crate::error::Result<()> {
        if next <= *self {
            return Err(AggregatorError::InvalidRunState(format!(
                "cannot move from {:?} to {:?}",
                self, next
            )));
        }
        *self = next;
        Ok(())
    }
}

/// Last step a user's sequence completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UserStage {
    Pending,
    Funded,
    Approved,
    Deposited,
    Withdrawn,
    Failed,
}

/// Step a user failure was recorded at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowStep {
    Vault,
    Fund,
    Approve,
    Deposit,
    Withdraw,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserFailure {
    pub step: FlowStep,
    pub reason: String,
    #[serde(skip)]
    pub error: Option<AggregatorError>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserOutcome {
    pub user: Address,
    pub target: AssetPairAmount,
    pub stage: UserStage,
    pub position: Option<UserPosition>,
    pub redeemed: Option<AssetPairAmount>,
    pub failure: Option<UserFailure>,
}

impl UserOutcome {
    pub fn pending(target: &UserTarget) -> Self {
        Self {
            user: target.user,
            target: target.amounts,
            stage: UserStage::Pending,
            position: None,
            redeemed: None,
            failure: None,
        }
    }

    pub fn fail(&mut self, step: FlowStep, error: AggregatorError) {
        self.stage = UserStage::Failed;
        self.failure = Some(UserFailure {
            step,
            reason: error.to_string(),
            error: Some(error),
        });
    }

    pub fn is_success(&self) -> bool {
        self.stage == UserStage::Withdrawn
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub selection: Option<Selection>,
    pub vault: Option<VaultHandle>,
    pub outcomes: Vec<UserOutcome>,
    pub cancelled: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    pub fn outcome(&self, user: Address) -> Option<&UserOutcome> {
        self.outcomes.iter().find(|o| o.user == user)
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.stage == UserStage::Failed)
            .count()
    }
}
