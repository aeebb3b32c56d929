//! Era clock. The gap-free chain of indexing epochs.

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::entities::{Era, EraCursor};
use crate::error::ProcessingError;
use crate::store::UnitOfWork;

/// Close era `new_era - 1` at `timestamp` and open `new_era`.
///
/// The predecessor must exist for any era other than the first; a missing
/// predecessor means the event stream has a gap. Once an era exists, only the
/// next id may start: a repeated or earlier id would reopen closed history.
pub async fn advance_era(
    uow: &mut UnitOfWork<'_>,
    new_era: u64,
    timestamp: DateTime<Utc>,
) -> Result<Era, ProcessingError> {
    if let Some(cursor) = uow.get::<EraCursor>(EraCursor::KEY).await? {
        if cursor.era.checked_add(1) != Some(new_era) {
            return Err(ProcessingError::MissingPrecondition(format!(
                "era {new_era} cannot follow current era {}",
                cursor.era
            )));
        }
    }

    if new_era > 0 {
        let prev_id = new_era - 1;
        let mut previous: Era = uow.get(&Era::key(prev_id)).await?.ok_or_else(|| {
            ProcessingError::MissingPrecondition(format!("era {prev_id} doesn't exist"))
        })?;
        previous.end_time = Some(timestamp);
        uow.save(&previous)?;
        debug!(era = prev_id, end = %timestamp, "Closed era");
    }

    let era = Era {
        id: new_era,
        start_time: timestamp,
        end_time: None,
    };
    uow.save(&era)?;
    uow.save(&EraCursor { era: new_era })?;

    info!(era = new_era, start = %timestamp, "New era started");
    Ok(era)
}

/// Id of the most recently created era, `0` before the first one.
pub async fn current_era(uow: &UnitOfWork<'_>) -> Result<u64, ProcessingError> {
    Ok(uow
        .get::<EraCursor>(EraCursor::KEY)
        .await?
        .map(|c| c.era)
        .unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{EntityStore, MemoryStore};
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[tokio::test]
    async fn first_era_needs_no_predecessor() {
        let store = MemoryStore::new();
        let mut uow = UnitOfWork::new(&store);

        assert_eq!(current_era(&uow).await.unwrap(), 0);
        let era = advance_era(&mut uow, 0, ts(1000)).await.unwrap();
        assert!(era.is_open());
        assert_eq!(current_era(&uow).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn advance_closes_predecessor() {
        let store = MemoryStore::new();
        let mut uow = UnitOfWork::new(&store);
        advance_era(&mut uow, 0, ts(1000)).await.unwrap();
        advance_era(&mut uow, 1, ts(2000)).await.unwrap();
        store.commit(uow.into_changes()).await.unwrap();

        let uow = UnitOfWork::new(&store);
        let e0: Era = uow.get(&Era::key(0)).await.unwrap().unwrap();
        let e1: Era = uow.get(&Era::key(1)).await.unwrap().unwrap();
        assert_eq!(e0.end_time, Some(ts(2000)));
        assert_eq!(e1.start_time, ts(2000));
        assert_eq!(e1.end_time, None);
        assert_eq!(current_era(&uow).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn missing_predecessor_is_an_integrity_error() {
        let store = MemoryStore::new();
        let mut uow = UnitOfWork::new(&store);
        let err = advance_era(&mut uow, 3, ts(1000)).await.unwrap_err();
        assert!(matches!(err, ProcessingError::MissingPrecondition(_)));
        assert!(uow.is_empty(), "nothing staged before the check");
    }

    #[tokio::test]
    async fn repeated_or_earlier_era_is_rejected() {
        let store = MemoryStore::new();
        let mut uow = UnitOfWork::new(&store);
        for (id, t) in [(0, 0), (1, 10), (2, 20), (3, 30)] {
            advance_era(&mut uow, id, ts(t)).await.unwrap();
        }
        store.commit(uow.into_changes()).await.unwrap();

        for id in [1, 3, 5] {
            let mut uow = UnitOfWork::new(&store);
            let err = advance_era(&mut uow, id, ts(40)).await.unwrap_err();
            assert!(matches!(err, ProcessingError::MissingPrecondition(_)), "era {id}");
            assert!(uow.is_empty());
        }

        let uow = UnitOfWork::new(&store);
        assert_eq!(current_era(&uow).await.unwrap(), 3);
        let e1: Era = uow.get(&Era::key(1)).await.unwrap().unwrap();
        assert_eq!(e1.end_time, Some(ts(20)));
        let e3: Era = uow.get(&Era::key(3)).await.unwrap().unwrap();
        assert!(e3.is_open());
    }
}
