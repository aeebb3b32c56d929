//! Service agreement registry handler.

use alloy_primitives::Address;
use tracing::debug;

use crate::cid::digest_to_cid;
use crate::entities::ServiceAgreement;
use crate::error::ProcessingError;
use crate::query::ChainQuery;
use crate::store::UnitOfWork;

/// Record a new agreement. The deployment it serves is read from the
/// agreement contract, not the event.
pub async fn handle_service_agreement_created(
    uow: &mut UnitOfWork<'_>,
    query: &dyn ChainQuery,
    agreement: Address,
    indexer: Address,
    consumer: Address,
) -> Result<ServiceAgreement, ProcessingError> {
    let deployment = query.service_agreement_deployment(agreement).await?;
    let record = ServiceAgreement {
        id: agreement,
        indexer,
        consumer,
        deployment_id: digest_to_cid(deployment.as_slice()),
    };
    uow.save(&record)?;
    debug!(%agreement, %indexer, %consumer, deployment = %record.deployment_id, "Service agreement created");
    Ok(record)
}
