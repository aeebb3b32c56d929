//! Indexer registry handlers.
//!
//! Delegation and commission events for an indexer can be emitted before its
//! registration, so registration completes an existing record instead of
//! requiring a fresh one.

use alloy_primitives::{Address, Bytes};
use num_traits::Zero;
use tracing::{debug, info};

use crate::amount::Amount;
use crate::cid::digest_to_cid;
use crate::entities::Indexer;
use crate::era;
use crate::era_value::{self, EraOp, EraValue};
use crate::error::ProcessingError;
use crate::store::UnitOfWork;

async fn require(uow: &UnitOfWork<'_>, indexer: Address) -> Result<Indexer, ProcessingError> {
    uow.get(&indexer.to_string()).await?.ok_or_else(|| {
        ProcessingError::MissingPrecondition(format!("expected indexer ({indexer}) to exist"))
    })
}

pub async fn handle_register(
    uow: &mut UnitOfWork<'_>,
    indexer: Address,
    metadata: &Bytes,
) -> Result<Indexer, ProcessingError> {
    let cid = digest_to_cid(metadata);
    let record = match uow.get::<Indexer>(&indexer.to_string()).await? {
        Some(mut existing) => {
            existing.metadata = Some(cid);
            existing.active = true;
            existing
        }
        None => {
            let current = era::current_era(uow).await?;
            Indexer {
                id: indexer,
                metadata: Some(cid),
                controller: None,
                active: true,
                total_stake: era_value::upsert(None, &Amount::zero(), EraOp::Add, current)?,
                commission: None,
            }
        }
    };
    uow.save(&record)?;
    info!(%indexer, metadata = ?record.metadata, "Indexer registered");
    Ok(record)
}

pub async fn handle_unregister(
    uow: &mut UnitOfWork<'_>,
    indexer: Address,
) -> Result<Indexer, ProcessingError> {
    let mut record = require(uow, indexer).await?;
    record.active = false;
    uow.save(&record)?;
    info!(%indexer, "Indexer unregistered");
    Ok(record)
}

pub async fn handle_update_metadata(
    uow: &mut UnitOfWork<'_>,
    indexer: Address,
    metadata: &Bytes,
) -> Result<Indexer, ProcessingError> {
    let mut record = require(uow, indexer).await?;
    record.metadata = Some(digest_to_cid(metadata));
    uow.save(&record)?;
    debug!(%indexer, metadata = ?record.metadata, "Indexer metadata updated");
    Ok(record)
}

/// Set (`Some`) or clear (`None`) the indexer's controller account.
pub async fn handle_controller_changed(
    uow: &mut UnitOfWork<'_>,
    indexer: Address,
    controller: Option<Address>,
) -> Result<Indexer, ProcessingError> {
    let mut record = require(uow, indexer).await?;
    record.controller = controller;
    uow.save(&record)?;
    debug!(%indexer, controller = ?controller, "Controller account changed");
    Ok(record)
}

/// A rate set for the first time applies at once; later changes take effect
/// from the next era.
pub async fn handle_commission_rate(
    uow: &mut UnitOfWork<'_>,
    indexer: Address,
    rate: Amount,
) -> Result<Indexer, ProcessingError> {
    let mut record = require(uow, indexer).await?;
    let current = era::current_era(uow).await?;
    record.commission = Some(match record.commission.take() {
        None => EraValue::settled(current, rate),
        Some(existing) => era_value::upsert(Some(&existing), &rate, EraOp::Replace, current)?,
    });
    uow.save(&record)?;
    debug!(%indexer, era = current, "Commission rate set");
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stake;
    use crate::store::MemoryStore;
    use chrono::{TimeZone, Utc};

    const X: Address = Address::repeat_byte(0xaa);

    fn digest() -> Bytes {
        Bytes::from(vec![0u8; 32])
    }

    #[tokio::test]
    async fn register_creates_active_indexer() {
        let store = MemoryStore::new();
        let mut uow = UnitOfWork::new(&store);
        let r = handle_register(&mut uow, X, &digest()).await.unwrap();
        assert!(r.active);
        assert_eq!(
            r.metadata.as_deref(),
            Some("QmNLei78zWmzUdbeRB3CiUfAizWUrbeeZh5K1rhAQKCh51")
        );
        assert_eq!(r.total_stake.value_after, Amount::zero());
        assert!(r.commission.is_none());
    }

    #[tokio::test]
    async fn register_keeps_stake_from_earlier_delegations() {
        let store = MemoryStore::new();
        let mut uow = UnitOfWork::new(&store);
        let d = Address::repeat_byte(0xd1);
        stake::handle_delegation_added(&mut uow, d, X, &Amount::from(500))
            .await
            .unwrap();
        let r = handle_register(&mut uow, X, &digest()).await.unwrap();
        assert!(r.active);
        assert_eq!(r.total_stake.value_after, Amount::from(500));
    }

    #[tokio::test]
    async fn lifecycle_requires_registration() {
        let store = MemoryStore::new();
        let mut uow = UnitOfWork::new(&store);
        let controller = Address::repeat_byte(0xcc);

        let err = handle_unregister(&mut uow, X).await.unwrap_err();
        assert!(err.is_integrity());
        assert!(handle_update_metadata(&mut uow, X, &digest()).await.is_err());
        assert!(handle_controller_changed(&mut uow, X, Some(controller)).await.is_err());
        assert!(uow.is_empty());

        handle_register(&mut uow, X, &digest()).await.unwrap();
        let r = handle_controller_changed(&mut uow, X, Some(controller)).await.unwrap();
        assert_eq!(r.controller, Some(controller));
        let r = handle_controller_changed(&mut uow, X, None).await.unwrap();
        assert_eq!(r.controller, None);
        let r = handle_unregister(&mut uow, X).await.unwrap();
        assert!(!r.active);
    }

    #[tokio::test]
    async fn first_commission_applies_immediately() {
        let store = MemoryStore::new();
        let mut uow = UnitOfWork::new(&store);
        let t = |s| Utc.timestamp_opt(s, 0).unwrap();
        era::advance_era(&mut uow, 0, t(0)).await.unwrap();
        handle_register(&mut uow, X, &digest()).await.unwrap();

        let r = handle_commission_rate(&mut uow, X, Amount::from(100)).await.unwrap();
        let c = r.commission.unwrap();
        assert!(c.is_settled());
        assert_eq!(c.value, Amount::from(100));

        // A later change waits for the next era.
        let r = handle_commission_rate(&mut uow, X, Amount::from(200)).await.unwrap();
        let c = r.commission.unwrap();
        assert_eq!(c.value_at(0), &Amount::from(100));
        assert_eq!(c.value_at(1), &Amount::from(200));

        era::advance_era(&mut uow, 1, t(10)).await.unwrap();
        let r = handle_commission_rate(&mut uow, X, Amount::from(300)).await.unwrap();
        let c = r.commission.unwrap();
        assert_eq!(c.era, 1);
        assert_eq!(c.value, Amount::from(200));
        assert_eq!(c.value_after, Amount::from(300));
    }
}
