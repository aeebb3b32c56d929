//! Reward reconciliation.
//!
//! # Per-era totals
//!
//! For every indexer the chain reports, per era, *cumulative* `additions` and
//! `removals` counters. The derived `amount` of era `e` is the net reward
//! through the end of `e`:
//!
//! ```text
//! amount(e) = amount(e-1) + additions(e) - removals(e)      amount(-1) = 0
//! ```
//!
//! Reports for a past era may arrive after later eras were already recorded
//! (batched or out-of-order emission). A correction is therefore carried
//! forward through every consecutive era already on record, stopping at the
//! first era with no record. Eras recorded later are computed fresh from
//! their predecessor when their own report arrives.
//!
//! # Unclaimed / claimed rewards
//!
//! Distribution snapshots each delegator's reward balance from chain state
//! once; claims delete the snapshot and append an immutable claim record.

use alloy_primitives::{Address, B256};
use chrono::{DateTime, Utc};
use num_traits::Zero;
use tracing::debug;

use crate::amount::Amount;
use crate::entities::{Delegation, IndexerReward, Reward, UnclaimedReward};
use crate::error::ProcessingError;
use crate::query::ChainQuery;
use crate::store::UnitOfWork;

/// Record the cumulative counters reported for `(indexer, era)` and carry the
/// change through later recorded eras.
///
/// Returns the updated record for `era`.
pub async fn handle_rewards_changed(
    uow: &mut UnitOfWork<'_>,
    indexer: Address,
    era: u64,
    additions: Amount,
    removals: Amount,
) -> Result<IndexerReward, ProcessingError> {
    let prev_amount = match era.checked_sub(1) {
        Some(prev) => uow
            .get::<IndexerReward>(&IndexerReward::key(&indexer, prev))
            .await?
            .map(|r| r.amount)
            .unwrap_or_else(Amount::zero),
        None => Amount::zero(),
    };

    let record = match uow.get::<IndexerReward>(&IndexerReward::key(&indexer, era)).await? {
        None => IndexerReward {
            indexer,
            era,
            amount: &prev_amount + &additions - &removals,
            additions,
            removals,
        },
        Some(mut record) => {
            let additions_diff = &additions - &record.additions;
            let removals_diff = &removals - &record.removals;
            record.amount += additions_diff - removals_diff;
            record.additions = additions;
            record.removals = removals;
            record
        }
    };
    uow.save(&record)?;

    let propagated = propagate(uow, &record).await?;
    debug!(%indexer, era, amount = %record.amount, propagated, "Rewards changed");
    Ok(record)
}

/// Recompute `amount` for each consecutive recorded era after `from`.
///
/// Returns the number of later eras rewritten.
async fn propagate(
    uow: &mut UnitOfWork<'_>,
    from: &IndexerReward,
) -> Result<usize, ProcessingError> {
    let mut prev_amount = from.amount.clone();
    let mut era = from.era;
    let mut rewritten = 0;

    loop {
        let Some(next) = era.checked_add(1) else { break };
        let Some(mut record) = uow
            .get::<IndexerReward>(&IndexerReward::key(&from.indexer, next))
            .await?
        else {
            break;
        };

        record.amount = &prev_amount + record.net();
        uow.save(&record)?;
        debug!(indexer = %from.indexer, era = next, amount = %record.amount, "Propagated reward correction");

        prev_amount = record.amount;
        era = next;
        rewritten += 1;
    }
    Ok(rewritten)
}

/// Snapshot the reward balance of every delegator of `indexer` that has no
/// unclaimed-reward record yet.
///
/// Existing records keep the balance captured when they were created.
/// Returns the records created.
pub async fn handle_rewards_distributed(
    uow: &mut UnitOfWork<'_>,
    query: &dyn ChainQuery,
    indexer: Address,
) -> Result<Vec<UnclaimedReward>, ProcessingError> {
    let key = serde_json::to_value(indexer)?;
    let delegations: Vec<Delegation> = uow.find_by("indexer", &key).await?;

    // Query everything first so a failing call leaves nothing staged.
    let mut created = Vec::new();
    for delegation in &delegations {
        let id = UnclaimedReward::key(&indexer, &delegation.delegator);
        if uow.get::<UnclaimedReward>(&id).await?.is_some() {
            continue;
        }
        let amount = query.user_rewards(indexer, delegation.delegator).await?;
        created.push(UnclaimedReward {
            indexer,
            delegator: delegation.delegator,
            amount,
        });
    }

    for reward in &created {
        uow.save(reward)?;
    }
    debug!(%indexer, delegators = delegations.len(), created = created.len(), "Rewards distributed");
    Ok(created)
}

/// Drop the delegator's unclaimed balance and append a claim record.
pub async fn handle_rewards_claimed(
    uow: &mut UnitOfWork<'_>,
    indexer: Address,
    delegator: Address,
    amount: Amount,
    tx_hash: B256,
    timestamp: DateTime<Utc>,
) -> Result<Reward, ProcessingError> {
    uow.remove::<UnclaimedReward>(&UnclaimedReward::key(&indexer, &delegator));

    let reward = Reward {
        indexer,
        delegator,
        tx_hash,
        amount,
        claimed_time: timestamp,
    };
    uow.save(&reward)?;
    debug!(%indexer, %delegator, amount = %reward.amount, "Rewards claimed");
    Ok(reward)
}
