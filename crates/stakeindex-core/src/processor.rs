//! The event processor: applies chain events to the entity store, one at a
//! time and in stream order.
//!
//! For each event:
//!   - parse it into a [`StakeEvent`] (unknown names are skipped)
//!   - check the emitting contract against the configured addresses
//!   - run exactly one handler inside a fresh [`UnitOfWork`]
//!   - commit the unit's writes atomically
//!
//! A handler, including any reward propagation it triggers, finishes and is
//! committed before the next event starts. On error nothing from the event is
//! committed and processing stops; re-delivery is up to the caller.

use futures::{Stream, StreamExt};
use tracing::{debug, error, warn};

use crate::config::StakeIndexConfig;
use crate::era;
use crate::error::ProcessingError;
use crate::events::{ChainEvent, StakeEvent};
use crate::plans;
use crate::query::ChainQuery;
use crate::query_registry;
use crate::registry;
use crate::rewards;
use crate::service_agreement;
use crate::stake;
use crate::store::{EntityStore, UnitOfWork};

/// Result of processing one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Handler ran; `writes` changes were committed.
    Applied { writes: usize },
    /// Event name is not handled by this crate.
    Unhandled,
    /// Event came from a contract other than the configured one.
    ForeignEmitter,
}

/// Running totals for a processor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessorStats {
    pub applied: u64,
    pub skipped: u64,
    pub writes: u64,
    /// Block of the last applied event.
    pub last_block: Option<u64>,
}

pub struct EventProcessor<S: EntityStore, Q: ChainQuery> {
    config: StakeIndexConfig,
    store: S,
    query: Q,
    stats: ProcessorStats,
}

impl<S: EntityStore, Q: ChainQuery> EventProcessor<S, Q> {
    pub fn new(config: StakeIndexConfig, store: S, query: Q) -> Self {
        Self {
            config,
            store,
            query,
            stats: ProcessorStats::default(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn stats(&self) -> ProcessorStats {
        self.stats
    }

    /// Process a single event to completion.
    pub async fn process(&mut self, event: &ChainEvent) -> Result<Outcome, ProcessingError> {
        let Some(parsed) = StakeEvent::parse(event)? else {
            debug!(name = %event.name, block = event.block_number, "Skipping unhandled event");
            self.stats.skipped += 1;
            return Ok(Outcome::Unhandled);
        };

        let contract = parsed.contract();
        if !self.config.contracts.accepts(contract, &event.address) {
            warn!(
                name = %event.name,
                emitter = %event.address,
                expected = ?self.config.contracts.get(contract),
                "Skipping event from unexpected contract"
            );
            self.stats.skipped += 1;
            return Ok(Outcome::ForeignEmitter);
        }

        let mut uow = UnitOfWork::new(&self.store);
        self.dispatch(&mut uow, parsed, event).await?;

        let writes = uow.len();
        self.store.commit(uow.into_changes()).await?;

        debug!(
            chain = %self.config.chain,
            name = %event.name,
            block = event.block_number,
            log_index = event.log_index,
            writes,
            "Applied event"
        );
        self.stats.applied += 1;
        self.stats.writes += writes as u64;
        self.stats.last_block = Some(event.block_number);
        Ok(Outcome::Applied { writes })
    }

    /// Process events in order, stopping at the first error.
    pub async fn run<E>(&mut self, mut events: E) -> Result<ProcessorStats, ProcessingError>
    where
        E: Stream<Item = ChainEvent> + Unpin,
    {
        while let Some(event) = events.next().await {
            if let Err(e) = self.process(&event).await {
                error!(
                    name = %event.name,
                    block = event.block_number,
                    log_index = event.log_index,
                    tx = %event.tx_hash,
                    integrity = e.is_integrity(),
                    error = %e,
                    "Event processing failed"
                );
                return Err(e);
            }
        }
        Ok(self.stats)
    }

    async fn dispatch(
        &self,
        uow: &mut UnitOfWork<'_>,
        parsed: StakeEvent,
        event: &ChainEvent,
    ) -> Result<(), ProcessingError> {
        match parsed {
            StakeEvent::NewEraStart { era: id } => {
                era::advance_era(uow, id, event.timestamp()?).await?;
            }
            StakeEvent::DelegationAdded {
                delegator,
                indexer,
                amount,
            } => {
                stake::handle_delegation_added(uow, delegator, indexer, &amount).await?;
            }
            StakeEvent::DelegationRemoved {
                delegator,
                indexer,
                amount,
            } => {
                stake::handle_delegation_removed(uow, delegator, indexer, &amount).await?;
            }
            StakeEvent::UnbondRequested {
                delegator,
                indexer,
                index,
                amount,
            } => {
                stake::handle_unbond_requested(
                    uow,
                    delegator,
                    indexer,
                    index,
                    amount,
                    event.timestamp()?,
                )
                .await?;
            }
            StakeEvent::UnbondWithdrawn { delegator, index } => {
                stake::handle_unbond_withdrawn(uow, delegator, index).await?;
            }
            StakeEvent::RegisterIndexer { indexer, metadata } => {
                registry::handle_register(uow, indexer, &metadata).await?;
            }
            StakeEvent::UnregisterIndexer { indexer } => {
                registry::handle_unregister(uow, indexer).await?;
            }
            StakeEvent::UpdateMetadata { indexer, metadata } => {
                registry::handle_update_metadata(uow, indexer, &metadata).await?;
            }
            StakeEvent::SetControllerAccount {
                indexer,
                controller,
            } => {
                registry::handle_controller_changed(uow, indexer, Some(controller)).await?;
            }
            StakeEvent::RemoveControllerAccount { indexer } => {
                registry::handle_controller_changed(uow, indexer, None).await?;
            }
            StakeEvent::SetCommissionRate { indexer, rate } => {
                registry::handle_commission_rate(uow, indexer, rate).await?;
            }
            StakeEvent::RewardsChanged {
                indexer,
                era,
                additions,
                removals,
            } => {
                rewards::handle_rewards_changed(uow, indexer, era, additions, removals).await?;
            }
            StakeEvent::DistributeRewards { indexer } => {
                rewards::handle_rewards_distributed(uow, &self.query, indexer).await?;
            }
            StakeEvent::ClaimRewards {
                indexer,
                delegator,
                amount,
            } => {
                rewards::handle_rewards_claimed(
                    uow,
                    indexer,
                    delegator,
                    amount,
                    event.tx_hash,
                    event.timestamp()?,
                )
                .await?;
            }
            StakeEvent::CreateQuery {
                query_id,
                creator,
                metadata,
                deployment,
                version,
            } => {
                query_registry::handle_query_created(
                    uow,
                    &query_id,
                    creator,
                    &metadata,
                    &deployment,
                    &version,
                    event.timestamp()?,
                )
                .await?;
            }
            StakeEvent::UpdateQueryMetadata { query_id, metadata } => {
                query_registry::handle_query_metadata_updated(
                    uow,
                    &query_id,
                    &metadata,
                    event.timestamp()?,
                )
                .await?;
            }
            StakeEvent::UpdateQueryDeployment {
                query_id,
                deployment,
                version,
            } => {
                query_registry::handle_query_deployment_updated(
                    uow,
                    &query_id,
                    &deployment,
                    &version,
                    event.timestamp()?,
                )
                .await?;
            }
            StakeEvent::StartIndexing { indexer, deployment } => {
                query_registry::handle_indexing_started(uow, indexer, &deployment).await?;
            }
            StakeEvent::UpdateDeploymentStatus {
                indexer,
                deployment,
                block_height,
                mmr_root,
                reported_at,
            } => {
                query_registry::handle_indexing_updated(
                    uow,
                    indexer,
                    &deployment,
                    block_height,
                    mmr_root,
                    reported_at,
                )
                .await?;
            }
            StakeEvent::UpdateIndexingStatusToReady { indexer, deployment } => {
                query_registry::handle_indexing_ready(uow, indexer, &deployment, event.timestamp()?)
                    .await?;
            }
            StakeEvent::StopIndexing { indexer, deployment } => {
                query_registry::handle_indexing_stopped(uow, indexer, &deployment).await?;
            }
            StakeEvent::UnregisterQuery { query_id } => {
                query_registry::handle_query_unregistered(uow, &query_id).await?;
            }
            StakeEvent::PlanTemplateCreated { template_id } => {
                plans::handle_plan_template_created(uow, &self.query, &template_id).await?;
            }
            StakeEvent::PlanTemplateMetadataChanged {
                template_id,
                metadata,
            } => {
                plans::handle_plan_template_metadata_changed(uow, &template_id, &metadata).await?;
            }
            StakeEvent::PlanTemplateStatusChanged {
                template_id,
                active,
            } => {
                plans::handle_plan_template_status_changed(uow, &template_id, active).await?;
            }
            StakeEvent::PlanCreated {
                plan_id,
                creator,
                template_id,
                price,
                deployment,
            } => {
                plans::handle_plan_created(uow, &plan_id, creator, &template_id, price, &deployment)
                    .await?;
            }
            StakeEvent::PlanRemoved { plan_id } => {
                plans::handle_plan_removed(uow, &plan_id).await?;
            }
            StakeEvent::ServiceAgreementCreated {
                agreement,
                indexer,
                consumer,
            } => {
                service_agreement::handle_service_agreement_created(
                    uow,
                    &self.query,
                    agreement,
                    indexer,
                    consumer,
                )
                .await?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::Contract;
    use crate::query::{PlanTemplateInfo, StaticQuery};
    use crate::store::MemoryStore;
    use alloy_primitives::{Address, B256};
    use serde_json::{json, Value};

    fn event(name: &str, block: u64, args: Value) -> ChainEvent {
        ChainEvent {
            name: name.into(),
            args: args.as_object().cloned().unwrap_or_default(),
            block_number: block,
            log_index: 0,
            block_timestamp: 1_000 + block as i64,
            tx_hash: B256::ZERO,
            address: Address::ZERO,
        }
    }

    fn processor() -> EventProcessor<MemoryStore, StaticQuery> {
        EventProcessor::new(
            StakeIndexConfig::default(),
            MemoryStore::new(),
            StaticQuery::new(),
        )
    }

    #[tokio::test]
    async fn failed_event_commits_nothing() {
        let mut p = processor();
        // Era 2 cannot start without era 1.
        let err = p
            .process(&event("NewEraStart", 1, json!({ "era": 2 })))
            .await
            .unwrap_err();
        assert!(err.is_integrity());
        assert_eq!(p.store().count("era"), 0);
        assert_eq!(p.stats().applied, 0);
    }

    #[tokio::test]
    async fn unknown_events_are_skipped() {
        let mut p = processor();
        let outcome = p.process(&event("Transfer", 1, json!({}))).await.unwrap();
        assert_eq!(outcome, Outcome::Unhandled);
        assert_eq!(p.stats().skipped, 1);
    }

    #[tokio::test]
    async fn foreign_emitter_is_skipped() {
        let config = StakeIndexConfig::default().contract(Contract::EraManager, Address::repeat_byte(0xee));
        let mut p = EventProcessor::new(config, MemoryStore::new(), StaticQuery::new());
        let outcome = p
            .process(&event("NewEraStart", 1, json!({ "era": 0 })))
            .await
            .unwrap();
        assert_eq!(outcome, Outcome::ForeignEmitter);
        assert_eq!(p.store().count("era"), 0);
    }

    #[tokio::test]
    async fn run_stops_at_first_error() {
        let mut p = processor();
        let events = vec![
            event("NewEraStart", 1, json!({ "era": 0 })),
            event("UnregisterIndexer", 2, json!({ "indexer": "0x2222222222222222222222222222222222222222" })),
            event("NewEraStart", 3, json!({ "era": 1 })),
        ];
        let err = p.run(futures::stream::iter(events)).await.unwrap_err();
        assert!(matches!(err, ProcessingError::MissingPrecondition(_)));
        assert_eq!(p.stats().applied, 1);
        assert_eq!(p.stats().last_block, Some(1));
        assert_eq!(p.store().count("era"), 1);
    }

    #[tokio::test]
    async fn plan_events_use_chain_state() {
        let query = StaticQuery::new().with_plan_template(
            1,
            PlanTemplateInfo {
                period: 86_400.into(),
                daily_req_cap: 1_000.into(),
                rate_limit: 10.into(),
                metadata: B256::ZERO,
            },
        );
        let mut p = EventProcessor::new(StakeIndexConfig::default(), MemoryStore::new(), query);
        let creator = "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
        let zero = format!("0x{}", "00".repeat(32));
        let events = vec![
            event("PlanTemplateCreated", 1, json!({ "planTemplateId": 1 })),
            event(
                "PlanCreated",
                2,
                json!({ "planId": 7, "creator": creator, "planTemplateId": 1, "price": "1000", "deploymentId": zero }),
            ),
            event("PlanRemoved", 3, json!({ "id": 7 })),
        ];
        p.run(futures::stream::iter(events)).await.unwrap();
        assert_eq!(p.stats().applied, 3);

        let plan = p.store().get("plan", "0x7").await.unwrap().unwrap();
        assert_eq!(plan["active"], false);
        assert_eq!(plan["planTemplateId"], "0x1");
        assert_eq!(plan["price"], "0x3e8");

        // No template 2 in chain state.
        let err = p
            .process(&event("PlanTemplateCreated", 4, json!({ "planTemplateId": 2 })))
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessingError::ExternalQuery(_)));
        assert_eq!(p.store().count("plan_template"), 1);
    }
}
