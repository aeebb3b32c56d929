//! Derived entities maintained by the stakeindex handlers.

use alloy_primitives::{Address, B256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::amount::{self, Amount};
use crate::era_value::EraValue;
use crate::store::Entity;

// ─── Eras ─────────────────────────────────────────────────────────────────────

/// An indexing epoch. Exactly one era (the latest) has no `end_time`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Era {
    pub id: u64,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
}

impl Era {
    pub fn key(id: u64) -> String {
        format!("{id:#x}")
    }

    pub fn is_open(&self) -> bool {
        self.end_time.is_none()
    }
}

impl Entity for Era {
    const KIND: &'static str = "era";
    fn id(&self) -> String {
        Self::key(self.id)
    }
}

/// Singleton pointer to the most recently created era.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EraCursor {
    pub era: u64,
}

impl EraCursor {
    pub const KEY: &'static str = "current";
}

impl Entity for EraCursor {
    const KIND: &'static str = "era_cursor";
    fn id(&self) -> String {
        Self::KEY.to_string()
    }
}

// ─── Indexers & stake ─────────────────────────────────────────────────────────

/// A registered (or, before registration, merely delegated-to) indexer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Indexer {
    pub id: Address,
    /// CIDv0 of the indexer's metadata blob.
    pub metadata: Option<String>,
    pub controller: Option<Address>,
    pub active: bool,
    /// Sum of all delegations to this indexer.
    pub total_stake: EraValue,
    /// `None` until the first commission rate is set; the first rate then
    /// applies immediately instead of at the next era.
    pub commission: Option<EraValue>,
}

impl Entity for Indexer {
    const KIND: &'static str = "indexer";
    fn id(&self) -> String {
        self.id.to_string()
    }
}

/// Stake delegated by `delegator` to `indexer`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Delegation {
    pub delegator: Address,
    pub indexer: Address,
    pub amount: EraValue,
}

impl Delegation {
    pub fn key(delegator: &Address, indexer: &Address) -> String {
        format!("{delegator}:{indexer}")
    }
}

impl Entity for Delegation {
    const KIND: &'static str = "delegation";
    fn id(&self) -> String {
        Self::key(&self.delegator, &self.indexer)
    }
}

/// An unbond request, claimable once the lock period has passed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Withdrawal {
    pub delegator: Address,
    pub indexer: Address,
    pub index: u64,
    pub start_time: DateTime<Utc>,
    #[serde(with = "amount::hex")]
    pub amount: Amount,
    pub claimed: bool,
}

impl Withdrawal {
    pub fn key(delegator: &Address, index: u64) -> String {
        format!("{delegator}:{index:#x}")
    }
}

impl Entity for Withdrawal {
    const KIND: &'static str = "withdrawal";
    fn id(&self) -> String {
        Self::key(&self.delegator, self.index)
    }
}

// ─── Rewards ──────────────────────────────────────────────────────────────────

/// Net rewards of one indexer through the end of one era.
///
/// `additions` / `removals` are the last cumulative counters reported for
/// the era, not deltas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexerReward {
    pub indexer: Address,
    pub era: u64,
    #[serde(with = "amount::hex")]
    pub additions: Amount,
    #[serde(with = "amount::hex")]
    pub removals: Amount,
    #[serde(with = "amount::hex")]
    pub amount: Amount,
}

impl IndexerReward {
    pub fn key(indexer: &Address, era: u64) -> String {
        format!("{indexer}:{era:#x}")
    }

    /// Net change contributed by this era alone.
    pub fn net(&self) -> Amount {
        &self.additions - &self.removals
    }
}

impl Entity for IndexerReward {
    const KIND: &'static str = "indexer_reward";
    fn id(&self) -> String {
        Self::key(&self.indexer, self.era)
    }
}

/// Reward balance of a delegator, snapshotted from chain state and held
/// until claimed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnclaimedReward {
    pub indexer: Address,
    pub delegator: Address,
    #[serde(with = "amount::hex")]
    pub amount: Amount,
}

impl UnclaimedReward {
    pub fn key(indexer: &Address, delegator: &Address) -> String {
        format!("{indexer}:{delegator}")
    }
}

impl Entity for UnclaimedReward {
    const KIND: &'static str = "unclaimed_reward";
    fn id(&self) -> String {
        Self::key(&self.indexer, &self.delegator)
    }
}

/// A claim, append-only. Keyed by transaction so repeated claims by the same
/// pair never collide.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reward {
    pub indexer: Address,
    pub delegator: Address,
    pub tx_hash: B256,
    #[serde(with = "amount::hex")]
    pub amount: Amount,
    pub claimed_time: DateTime<Utc>,
}

impl Reward {
    pub fn key(indexer: &Address, delegator: &Address, tx_hash: &B256) -> String {
        format!("{indexer}:{delegator}:{tx_hash}")
    }
}

impl Entity for Reward {
    const KIND: &'static str = "reward";
    fn id(&self) -> String {
        Self::key(&self.indexer, &self.delegator, &self.tx_hash)
    }
}

// ─── Query registry ───────────────────────────────────────────────────────────

/// A query project. Its id is the on-chain query id in hex.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub owner: Address,
    /// CIDv0 of the project metadata.
    pub metadata: String,
    pub current_deployment: String,
    pub current_version: String,
    pub created_timestamp: DateTime<Utc>,
    pub updated_timestamp: DateTime<Utc>,
}

impl Entity for Project {
    const KIND: &'static str = "project";
    fn id(&self) -> String {
        self.id.clone()
    }
}

/// A deployment, identified by its manifest CID. Shared between projects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deployment {
    pub id: String,
    pub version: String,
    pub created_timestamp: DateTime<Utc>,
}

impl Entity for Deployment {
    const KIND: &'static str = "deployment";
    fn id(&self) -> String {
        self.id.clone()
    }
}

/// Link between a project and every deployment it has pointed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectDeployment {
    pub project_id: String,
    pub deployment_id: String,
}

impl ProjectDeployment {
    pub fn key(project_id: &str, deployment_id: &str) -> String {
        format!("{project_id}:{deployment_id}")
    }
}

impl Entity for ProjectDeployment {
    const KIND: &'static str = "project_deployment";
    fn id(&self) -> String {
        Self::key(&self.project_id, &self.deployment_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IndexingStatus {
    Indexing,
    Ready,
    Terminated,
}

/// Progress of one indexer on one deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentIndexer {
    pub indexer: Address,
    pub deployment_id: String,
    pub block_height: u64,
    pub mmr_root: Option<B256>,
    /// Time of the last reported status.
    pub timestamp: Option<DateTime<Utc>>,
    pub status: IndexingStatus,
}

impl DeploymentIndexer {
    pub fn key(indexer: &Address, deployment_id: &str) -> String {
        format!("{indexer}:{deployment_id}")
    }
}

impl Entity for DeploymentIndexer {
    const KIND: &'static str = "deployment_indexer";
    fn id(&self) -> String {
        Self::key(&self.indexer, &self.deployment_id)
    }
}

// ─── Plans ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanTemplate {
    pub id: String,
    #[serde(with = "amount::hex")]
    pub period: Amount,
    #[serde(with = "amount::hex")]
    pub daily_req_cap: Amount,
    #[serde(with = "amount::hex")]
    pub rate_limit: Amount,
    pub metadata: Option<String>,
    pub active: bool,
}

impl Entity for PlanTemplate {
    const KIND: &'static str = "plan_template";
    fn id(&self) -> String {
        self.id.clone()
    }
}

/// A priced plan offered by an indexer, optionally bound to one deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Plan {
    pub id: String,
    pub plan_template_id: String,
    pub creator: Address,
    #[serde(with = "amount::hex")]
    pub price: Amount,
    pub active: bool,
    pub deployment_id: Option<String>,
}

impl Entity for Plan {
    const KIND: &'static str = "plan";
    fn id(&self) -> String {
        self.id.clone()
    }
}

// ─── Service agreements ───────────────────────────────────────────────────────

/// An agreement between a consumer and an indexer, keyed by its contract
/// address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceAgreement {
    pub id: Address,
    pub indexer: Address,
    pub consumer: Address,
    pub deployment_id: String,
}

impl Entity for ServiceAgreement {
    const KIND: &'static str = "service_agreement";
    fn id(&self) -> String {
        self.id.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;

    #[test]
    fn keys_are_composite_and_hex() {
        let d = address!("1111111111111111111111111111111111111111");
        let i = address!("2222222222222222222222222222222222222222");
        assert_eq!(
            Delegation::key(&d, &i),
            format!("{d}:{i}")
        );
        assert!(IndexerReward::key(&i, 26).ends_with(":0x1a"));
        assert!(Withdrawal::key(&d, 3).ends_with(":0x3"));
        assert_eq!(Era::key(0), "0x0");
    }

    #[test]
    fn reward_record_serializes_amounts_as_hex() {
        let r = IndexerReward {
            indexer: Address::ZERO,
            era: 2,
            additions: 20.into(),
            removals: 5.into(),
            amount: 115.into(),
        };
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["additions"], "0x14");
        assert_eq!(json["amount"], "0x73");
        assert_eq!(r.net(), Amount::from(15));
    }

    #[test]
    fn deployment_indexer_status_is_upper_case() {
        let di = DeploymentIndexer {
            indexer: Address::ZERO,
            deployment_id: "QmA".into(),
            block_height: 0,
            mmr_root: None,
            timestamp: None,
            status: IndexingStatus::Terminated,
        };
        let json = serde_json::to_value(&di).unwrap();
        assert_eq!(json["status"], "TERMINATED");
        assert_eq!(json["deploymentId"], "QmA");
        assert!(di.id().ends_with(":QmA"));
    }
}
