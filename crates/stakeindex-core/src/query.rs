//! Read-only chain-state queries.
//!
//! Results are authoritative external truth and are never recomputed
//! locally. Calls are not retried: an error aborts the current event.

use alloy_primitives::{Address, B256};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::amount::{self, Amount};
use crate::error::ProcessingError;

/// A plan template as stored by the plan manager contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanTemplateInfo {
    #[serde(with = "amount::hex")]
    pub period: Amount,
    #[serde(with = "amount::hex")]
    pub daily_req_cap: Amount,
    #[serde(with = "amount::hex")]
    pub rate_limit: Amount,
    /// Metadata digest; zero when the template has none.
    pub metadata: B256,
}

/// Synchronous view of on-chain contract state.
#[async_trait]
pub trait ChainQuery: Send + Sync {
    /// Unclaimed reward balance of `delegator` with `indexer`.
    async fn user_rewards(
        &self,
        indexer: Address,
        delegator: Address,
    ) -> Result<Amount, ProcessingError>;

    /// Plan template `id` as currently stored on chain.
    async fn plan_template(&self, id: &Amount) -> Result<PlanTemplateInfo, ProcessingError>;

    /// Deployment digest a service agreement contract serves.
    async fn service_agreement_deployment(
        &self,
        agreement: Address,
    ) -> Result<B256, ProcessingError>;
}

/// Fixed tables of chain state.
///
/// Backs replays from recorded chain state and tests. Lookups that are not in
/// the tables fail like an unreachable node would.
#[derive(Debug, Clone, Default)]
pub struct StaticQuery {
    rewards: HashMap<(Address, Address), Amount>,
    plan_templates: HashMap<Amount, PlanTemplateInfo>,
    agreements: HashMap<Address, B256>,
}

impl StaticQuery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the balance returned for `(indexer, delegator)`.
    pub fn with_rewards(
        mut self,
        indexer: Address,
        delegator: Address,
        amount: impl Into<Amount>,
    ) -> Self {
        self.rewards.insert((indexer, delegator), amount.into());
        self
    }

    pub fn set_rewards(&mut self, indexer: Address, delegator: Address, amount: Amount) {
        self.rewards.insert((indexer, delegator), amount);
    }

    pub fn with_plan_template(mut self, id: impl Into<Amount>, info: PlanTemplateInfo) -> Self {
        self.plan_templates.insert(id.into(), info);
        self
    }

    pub fn set_plan_template(&mut self, id: Amount, info: PlanTemplateInfo) {
        self.plan_templates.insert(id, info);
    }

    pub fn with_service_agreement(mut self, agreement: Address, deployment: B256) -> Self {
        self.agreements.insert(agreement, deployment);
        self
    }

    pub fn set_service_agreement(&mut self, agreement: Address, deployment: B256) {
        self.agreements.insert(agreement, deployment);
    }
}

#[async_trait]
impl ChainQuery for StaticQuery {
    async fn user_rewards(
        &self,
        indexer: Address,
        delegator: Address,
    ) -> Result<Amount, ProcessingError> {
        self.rewards
            .get(&(indexer, delegator))
            .cloned()
            .ok_or_else(|| {
                ProcessingError::ExternalQuery(format!(
                    "no reward balance for indexer {indexer} / delegator {delegator}"
                ))
            })
    }

    async fn plan_template(&self, id: &Amount) -> Result<PlanTemplateInfo, ProcessingError> {
        self.plan_templates.get(id).cloned().ok_or_else(|| {
            ProcessingError::ExternalQuery(format!(
                "no plan template {}",
                amount::to_hex(id)
            ))
        })
    }

    async fn service_agreement_deployment(
        &self,
        agreement: Address,
    ) -> Result<B256, ProcessingError> {
        self.agreements.get(&agreement).copied().ok_or_else(|| {
            ProcessingError::ExternalQuery(format!("no service agreement at {agreement}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_pair_is_a_query_failure() {
        let i = Address::repeat_byte(0x11);
        let d = Address::repeat_byte(0x22);
        let q = StaticQuery::new().with_rewards(i, d, 42);

        assert_eq!(q.user_rewards(i, d).await.unwrap(), Amount::from(42));
        let err = q.user_rewards(d, i).await.unwrap_err();
        assert!(matches!(err, ProcessingError::ExternalQuery(_)));
    }

    #[tokio::test]
    async fn plan_templates_and_agreements() {
        let info = PlanTemplateInfo {
            period: 86_400.into(),
            daily_req_cap: 1_000.into(),
            rate_limit: 10.into(),
            metadata: B256::ZERO,
        };
        let sa = Address::repeat_byte(0x5a);
        let q = StaticQuery::new()
            .with_plan_template(1, info.clone())
            .with_service_agreement(sa, B256::repeat_byte(0x01));

        assert_eq!(q.plan_template(&Amount::from(1)).await.unwrap(), info);
        assert!(q.plan_template(&Amount::from(2)).await.is_err());
        assert_eq!(
            q.service_agreement_deployment(sa).await.unwrap(),
            B256::repeat_byte(0x01)
        );
        assert!(matches!(
            q.service_agreement_deployment(Address::ZERO).await,
            Err(ProcessingError::ExternalQuery(_))
        ));
    }
}
