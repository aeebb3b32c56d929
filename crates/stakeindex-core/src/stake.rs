//! Stake tracking: per-pair delegations, per-indexer totals and unbond
//! requests.
//!
//! Each delegation change touches two ledger entries: the pair's
//! [`Delegation`] and the indexer's aggregate `total_stake`. Both writes are
//! staged in the same [`UnitOfWork`] and reach the store in one atomic commit,
//! so the aggregate always equals the sum of its delegations at rest.

use alloy_primitives::Address;
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::amount::Amount;
use crate::entities::{Delegation, Indexer, Withdrawal};
use crate::era;
use crate::era_value::{self, EraOp};
use crate::error::ProcessingError;
use crate::store::UnitOfWork;

pub async fn handle_delegation_added(
    uow: &mut UnitOfWork<'_>,
    delegator: Address,
    indexer: Address,
    amount: &Amount,
) -> Result<Delegation, ProcessingError> {
    let current = era::current_era(uow).await?;
    let id = Delegation::key(&delegator, &indexer);
    let existing: Option<Delegation> = uow.get(&id).await?;

    let delegation = Delegation {
        delegator,
        indexer,
        amount: era_value::upsert(
            existing.as_ref().map(|d| &d.amount),
            amount,
            EraOp::Add,
            current,
        )?,
    };
    let total = update_total_stake(uow, indexer, amount, EraOp::Add, current).await?;

    uow.save(&delegation)?;
    uow.save(&total)?;
    debug!(%delegator, %indexer, %amount, era = current, "Delegation added");
    Ok(delegation)
}

pub async fn handle_delegation_removed(
    uow: &mut UnitOfWork<'_>,
    delegator: Address,
    indexer: Address,
    amount: &Amount,
) -> Result<Delegation, ProcessingError> {
    let current = era::current_era(uow).await?;
    let id = Delegation::key(&delegator, &indexer);
    let mut delegation: Delegation = uow.get(&id).await?.ok_or_else(|| {
        ProcessingError::MissingPrecondition(format!("expected delegation ({id}) to exist"))
    })?;

    delegation.amount = era_value::upsert(Some(&delegation.amount), amount, EraOp::Sub, current)?;
    let total = update_total_stake(uow, indexer, amount, EraOp::Sub, current).await?;

    uow.save(&delegation)?;
    uow.save(&total)?;
    debug!(%delegator, %indexer, %amount, era = current, "Delegation removed");
    Ok(delegation)
}

/// Apply `op` to the indexer's aggregate stake, creating an (inactive)
/// indexer record on first touch. The result is returned, not staged.
async fn update_total_stake(
    uow: &UnitOfWork<'_>,
    indexer: Address,
    amount: &Amount,
    op: EraOp,
    current: u64,
) -> Result<Indexer, ProcessingError> {
    match uow.get::<Indexer>(&indexer.to_string()).await? {
        Some(mut record) => {
            record.total_stake = era_value::upsert(Some(&record.total_stake), amount, op, current)?;
            Ok(record)
        }
        None => Ok(Indexer {
            id: indexer,
            metadata: None,
            controller: None,
            active: false,
            total_stake: era_value::upsert(None, amount, op, current)?,
            commission: None,
        }),
    }
}

pub async fn handle_unbond_requested(
    uow: &mut UnitOfWork<'_>,
    delegator: Address,
    indexer: Address,
    index: u64,
    amount: Amount,
    timestamp: DateTime<Utc>,
) -> Result<Withdrawal, ProcessingError> {
    let withdrawal = Withdrawal {
        delegator,
        indexer,
        index,
        start_time: timestamp,
        amount,
        claimed: false,
    };
    uow.save(&withdrawal)?;
    debug!(%delegator, %indexer, index, "Unbond requested");
    Ok(withdrawal)
}

pub async fn handle_unbond_withdrawn(
    uow: &mut UnitOfWork<'_>,
    delegator: Address,
    index: u64,
) -> Result<Withdrawal, ProcessingError> {
    let id = Withdrawal::key(&delegator, index);
    let mut withdrawal: Withdrawal = uow.get(&id).await?.ok_or_else(|| {
        ProcessingError::MissingPrecondition(format!("expected withdrawal ({id}) to exist"))
    })?;
    withdrawal.claimed = true;
    uow.save(&withdrawal)?;
    debug!(%delegator, index, "Unbond withdrawn");
    Ok(withdrawal)
}
