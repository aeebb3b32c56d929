//! Inbound chain events and their typed form.
//!
//! Events arrive already decoded: a name plus named arguments as JSON.
//! [`StakeEvent::parse`] validates the arguments each handler needs and turns
//! them into strongly typed values, so handlers never see a missing field.

use alloy_primitives::{Address, Bytes, B256};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::str::FromStr;

use crate::amount::{self, Amount};
use crate::error::ProcessingError;

/// A decoded event as delivered by the event-sync collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainEvent {
    /// Event name, e.g. `"DelegationAdded"`.
    pub name: String,
    /// Decoded arguments keyed by parameter name.
    #[serde(default)]
    pub args: Map<String, Value>,
    pub block_number: u64,
    #[serde(default)]
    pub log_index: u32,
    /// Unix timestamp of the block (seconds since epoch).
    pub block_timestamp: i64,
    pub tx_hash: B256,
    /// Contract that emitted the event.
    pub address: Address,
}

impl ChainEvent {
    pub fn timestamp(&self) -> Result<DateTime<Utc>, ProcessingError> {
        Utc.timestamp_opt(self.block_timestamp, 0)
            .single()
            .ok_or_else(|| {
                ProcessingError::malformed(
                    &self.name,
                    format!("block timestamp {} out of range", self.block_timestamp),
                )
            })
    }

    fn arg(&self, key: &str) -> Result<&Value, ProcessingError> {
        self.args
            .get(key)
            .filter(|v| !v.is_null())
            .ok_or_else(|| ProcessingError::malformed(&self.name, format!("missing arg '{key}'")))
    }

    fn invalid(&self, key: &str, expected: &str) -> ProcessingError {
        ProcessingError::malformed(&self.name, format!("arg '{key}' is not {expected}"))
    }

    pub fn address_arg(&self, key: &str) -> Result<Address, ProcessingError> {
        self.arg(key)?
            .as_str()
            .and_then(|s| Address::from_str(s).ok())
            .ok_or_else(|| self.invalid(key, "an address"))
    }

    /// Integer argument given as a JSON number, decimal string or `0x` hex.
    ///
    /// JSON numbers are read from their literal text, so integers of any size
    /// are exact. Fractions and exponent forms are rejected.
    pub fn amount_arg(&self, key: &str) -> Result<Amount, ProcessingError> {
        let value = self.arg(key)?;
        let parsed = match value {
            Value::Number(n) => amount::parse(&n.to_string()),
            Value::String(s) => amount::parse(s),
            _ => None,
        };
        parsed.ok_or_else(|| self.invalid(key, "an integer"))
    }

    pub fn u64_arg(&self, key: &str) -> Result<u64, ProcessingError> {
        let value = self.amount_arg(key)?;
        u64::try_from(&value).map_err(|_| self.invalid(key, "a u64"))
    }

    pub fn bytes_arg(&self, key: &str) -> Result<Bytes, ProcessingError> {
        self.arg(key)?
            .as_str()
            .and_then(|s| Bytes::from_str(s).ok())
            .ok_or_else(|| self.invalid(key, "hex bytes"))
    }

    /// A 32-byte value such as a content digest or a merkle root.
    pub fn b256_arg(&self, key: &str) -> Result<B256, ProcessingError> {
        self.arg(key)?
            .as_str()
            .and_then(|s| B256::from_str(s).ok())
            .ok_or_else(|| self.invalid(key, "32 hex bytes"))
    }

    pub fn bool_arg(&self, key: &str) -> Result<bool, ProcessingError> {
        self.arg(key)?
            .as_bool()
            .ok_or_else(|| self.invalid(key, "a boolean"))
    }

    /// Unix seconds carried as an event argument.
    pub fn time_arg(&self, key: &str) -> Result<DateTime<Utc>, ProcessingError> {
        let secs = i64::try_from(self.u64_arg(key)?).map_err(|_| self.invalid(key, "a timestamp"))?;
        Utc.timestamp_opt(secs, 0)
            .single()
            .ok_or_else(|| self.invalid(key, "a timestamp"))
    }
}

/// Contract family an event is emitted by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Contract {
    EraManager,
    Staking,
    IndexerRegistry,
    RewardsDistributor,
    QueryRegistry,
    PlanManager,
    ServiceAgreementRegistry,
}

/// Typed events handled by the processor.
#[derive(Debug, Clone, PartialEq)]
pub enum StakeEvent {
    NewEraStart {
        era: u64,
    },
    DelegationAdded {
        delegator: Address,
        indexer: Address,
        amount: Amount,
    },
    DelegationRemoved {
        delegator: Address,
        indexer: Address,
        amount: Amount,
    },
    UnbondRequested {
        delegator: Address,
        indexer: Address,
        index: u64,
        amount: Amount,
    },
    UnbondWithdrawn {
        delegator: Address,
        index: u64,
    },
    RegisterIndexer {
        indexer: Address,
        metadata: Bytes,
    },
    UnregisterIndexer {
        indexer: Address,
    },
    UpdateMetadata {
        indexer: Address,
        metadata: Bytes,
    },
    SetControllerAccount {
        indexer: Address,
        controller: Address,
    },
    RemoveControllerAccount {
        indexer: Address,
    },
    SetCommissionRate {
        indexer: Address,
        rate: Amount,
    },
    RewardsChanged {
        indexer: Address,
        era: u64,
        additions: Amount,
        removals: Amount,
    },
    DistributeRewards {
        indexer: Address,
    },
    ClaimRewards {
        indexer: Address,
        delegator: Address,
        amount: Amount,
    },
    CreateQuery {
        query_id: Amount,
        creator: Address,
        metadata: B256,
        deployment: B256,
        version: B256,
    },
    UpdateQueryMetadata {
        query_id: Amount,
        metadata: B256,
    },
    UpdateQueryDeployment {
        query_id: Amount,
        deployment: B256,
        version: B256,
    },
    StartIndexing {
        indexer: Address,
        deployment: B256,
    },
    UpdateDeploymentStatus {
        indexer: Address,
        deployment: B256,
        block_height: u64,
        mmr_root: B256,
        reported_at: DateTime<Utc>,
    },
    UpdateIndexingStatusToReady {
        indexer: Address,
        deployment: B256,
    },
    StopIndexing {
        indexer: Address,
        deployment: B256,
    },
    UnregisterQuery {
        query_id: Amount,
    },
    PlanTemplateCreated {
        template_id: Amount,
    },
    PlanTemplateMetadataChanged {
        template_id: Amount,
        metadata: B256,
    },
    PlanTemplateStatusChanged {
        template_id: Amount,
        active: bool,
    },
    PlanCreated {
        plan_id: Amount,
        creator: Address,
        template_id: Amount,
        price: Amount,
        deployment: B256,
    },
    PlanRemoved {
        plan_id: Amount,
    },
    ServiceAgreementCreated {
        agreement: Address,
        indexer: Address,
        consumer: Address,
    },
}

impl StakeEvent {
    /// Parse `event` into its typed form.
    ///
    /// Returns `Ok(None)` for event names this crate does not handle.
    pub fn parse(event: &ChainEvent) -> Result<Option<Self>, ProcessingError> {
        let parsed = match event.name.as_str() {
            "NewEraStart" => Self::NewEraStart {
                era: event.u64_arg("era")?,
            },
            "DelegationAdded" => Self::DelegationAdded {
                delegator: event.address_arg("source")?,
                indexer: event.address_arg("indexer")?,
                amount: event.amount_arg("amount")?,
            },
            "DelegationRemoved" => Self::DelegationRemoved {
                delegator: event.address_arg("source")?,
                indexer: event.address_arg("indexer")?,
                amount: event.amount_arg("amount")?,
            },
            "UnbondRequested" => Self::UnbondRequested {
                delegator: event.address_arg("source")?,
                indexer: event.address_arg("indexer")?,
                index: event.u64_arg("index")?,
                amount: event.amount_arg("amount")?,
            },
            "UnbondWithdrawn" => Self::UnbondWithdrawn {
                delegator: event.address_arg("source")?,
                index: event.u64_arg("index")?,
            },
            "RegisterIndexer" => Self::RegisterIndexer {
                indexer: event.address_arg("indexer")?,
                metadata: event.bytes_arg("metadata")?,
            },
            "UnregisterIndexer" => Self::UnregisterIndexer {
                indexer: event.address_arg("indexer")?,
            },
            "UpdateMetadata" => Self::UpdateMetadata {
                indexer: event.address_arg("indexer")?,
                metadata: event.bytes_arg("metadata")?,
            },
            "SetControllerAccount" => Self::SetControllerAccount {
                indexer: event.address_arg("indexer")?,
                controller: event.address_arg("controller")?,
            },
            "RemoveControllerAccount" => Self::RemoveControllerAccount {
                indexer: event.address_arg("indexer")?,
            },
            "SetCommissionRate" => Self::SetCommissionRate {
                indexer: event.address_arg("indexer")?,
                rate: event.amount_arg("amount")?,
            },
            "RewardsChanged" => Self::RewardsChanged {
                indexer: event.address_arg("indexer")?,
                era: event.u64_arg("eraIdx")?,
                additions: event.amount_arg("additions")?,
                removals: event.amount_arg("removals")?,
            },
            "DistributeRewards" => Self::DistributeRewards {
                indexer: event.address_arg("indexer")?,
            },
            "ClaimRewards" => Self::ClaimRewards {
                indexer: event.address_arg("indexer")?,
                delegator: event.address_arg("delegator")?,
                amount: event.amount_arg("rewards")?,
            },
            "CreateQuery" => Self::CreateQuery {
                query_id: event.amount_arg("queryId")?,
                creator: event.address_arg("creator")?,
                metadata: event.b256_arg("metadata")?,
                deployment: event.b256_arg("deploymentId")?,
                version: event.b256_arg("version")?,
            },
            "UpdateQueryMetadata" => Self::UpdateQueryMetadata {
                query_id: event.amount_arg("queryId")?,
                metadata: event.b256_arg("metadata")?,
            },
            "UpdateQueryDeployment" => Self::UpdateQueryDeployment {
                query_id: event.amount_arg("queryId")?,
                deployment: event.b256_arg("deploymentId")?,
                version: event.b256_arg("version")?,
            },
            "StartIndexing" => Self::StartIndexing {
                indexer: event.address_arg("indexer")?,
                deployment: event.b256_arg("deploymentId")?,
            },
            "UpdateDeploymentStatus" => Self::UpdateDeploymentStatus {
                indexer: event.address_arg("indexer")?,
                deployment: event.b256_arg("deploymentId")?,
                block_height: event.u64_arg("blockheight")?,
                mmr_root: event.b256_arg("mmrRoot")?,
                reported_at: event.time_arg("timestamp")?,
            },
            "UpdateIndexingStatusToReady" => Self::UpdateIndexingStatusToReady {
                indexer: event.address_arg("indexer")?,
                deployment: event.b256_arg("deploymentId")?,
            },
            "StopIndexing" => Self::StopIndexing {
                indexer: event.address_arg("indexer")?,
                deployment: event.b256_arg("deploymentId")?,
            },
            "UnregisterQuery" => Self::UnregisterQuery {
                query_id: event.amount_arg("queryId")?,
            },
            "PlanTemplateCreated" => Self::PlanTemplateCreated {
                template_id: event.amount_arg("planTemplateId")?,
            },
            "PlanTemplateMetadataChanged" => Self::PlanTemplateMetadataChanged {
                template_id: event.amount_arg("planTemplateId")?,
                metadata: event.b256_arg("metadata")?,
            },
            "PlanTemplateStatusChanged" => Self::PlanTemplateStatusChanged {
                template_id: event.amount_arg("planTemplateId")?,
                active: event.bool_arg("active")?,
            },
            "PlanCreated" => Self::PlanCreated {
                plan_id: event.amount_arg("planId")?,
                creator: event.address_arg("creator")?,
                template_id: event.amount_arg("planTemplateId")?,
                price: event.amount_arg("price")?,
                deployment: event.b256_arg("deploymentId")?,
            },
            "PlanRemoved" => Self::PlanRemoved {
                plan_id: event.amount_arg("id")?,
            },
            "ServiceAgreementCreated" => Self::ServiceAgreementCreated {
                agreement: event.address_arg("serviceAgreement")?,
                indexer: event.address_arg("indexer")?,
                consumer: event.address_arg("consumer")?,
            },
            _ => return Ok(None),
        };
        Ok(Some(parsed))
    }

    /// The contract family expected to emit this event.
    pub fn contract(&self) -> Contract {
        match self {
            Self::NewEraStart { .. } => Contract::EraManager,
            Self::DelegationAdded { .. }
            | Self::DelegationRemoved { .. }
            | Self::UnbondRequested { .. }
            | Self::UnbondWithdrawn { .. }
            | Self::SetCommissionRate { .. } => Contract::Staking,
            Self::RegisterIndexer { .. }
            | Self::UnregisterIndexer { .. }
            | Self::UpdateMetadata { .. }
            | Self::SetControllerAccount { .. }
            | Self::RemoveControllerAccount { .. } => Contract::IndexerRegistry,
            Self::RewardsChanged { .. }
            | Self::DistributeRewards { .. }
            | Self::ClaimRewards { .. } => Contract::RewardsDistributor,
            Self::CreateQuery { .. }
            | Self::UpdateQueryMetadata { .. }
            | Self::UpdateQueryDeployment { .. }
            | Self::StartIndexing { .. }
            | Self::UpdateDeploymentStatus { .. }
            | Self::UpdateIndexingStatusToReady { .. }
            | Self::StopIndexing { .. }
            | Self::UnregisterQuery { .. } => Contract::QueryRegistry,
            Self::PlanTemplateCreated { .. }
            | Self::PlanTemplateMetadataChanged { .. }
            | Self::PlanTemplateStatusChanged { .. }
            | Self::PlanCreated { .. }
            | Self::PlanRemoved { .. } => Contract::PlanManager,
            Self::ServiceAgreementCreated { .. } => Contract::ServiceAgreementRegistry,
        }
    }
}
