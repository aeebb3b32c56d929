//! Plan manager handlers.
//!
//! The template-created event carries only the id; the template itself is
//! read from chain state. A zero digest means "no metadata" / "any
//! deployment".

use alloy_primitives::{Address, B256};
use tracing::debug;

use crate::amount::{self, Amount};
use crate::cid::digest_to_cid;
use crate::entities::{Plan, PlanTemplate};
use crate::error::ProcessingError;
use crate::query::ChainQuery;
use crate::store::UnitOfWork;

fn optional_cid(digest: &B256) -> Option<String> {
    (!digest.is_zero()).then(|| digest_to_cid(digest.as_slice()))
}

async fn require_template(
    uow: &UnitOfWork<'_>,
    template_id: &Amount,
) -> Result<PlanTemplate, ProcessingError> {
    let id = amount::to_hex(template_id);
    uow.get(&id).await?.ok_or_else(|| {
        ProcessingError::MissingPrecondition(format!("plan template ({id}) not found"))
    })
}

pub async fn handle_plan_template_created(
    uow: &mut UnitOfWork<'_>,
    query: &dyn ChainQuery,
    template_id: &Amount,
) -> Result<PlanTemplate, ProcessingError> {
    let info = query.plan_template(template_id).await?;
    let template = PlanTemplate {
        id: amount::to_hex(template_id),
        period: info.period,
        daily_req_cap: info.daily_req_cap,
        rate_limit: info.rate_limit,
        metadata: optional_cid(&info.metadata),
        active: true,
    };
    uow.save(&template)?;
    debug!(template = %template.id, "Plan template created");
    Ok(template)
}

pub async fn handle_plan_template_metadata_changed(
    uow: &mut UnitOfWork<'_>,
    template_id: &Amount,
    metadata: &B256,
) -> Result<PlanTemplate, ProcessingError> {
    let mut template = require_template(uow, template_id).await?;
    template.metadata = Some(digest_to_cid(metadata.as_slice()));
    uow.save(&template)?;
    debug!(template = %template.id, "Plan template metadata changed");
    Ok(template)
}

pub async fn handle_plan_template_status_changed(
    uow: &mut UnitOfWork<'_>,
    template_id: &Amount,
    active: bool,
) -> Result<PlanTemplate, ProcessingError> {
    let mut template = require_template(uow, template_id).await?;
    template.active = active;
    uow.save(&template)?;
    debug!(template = %template.id, active, "Plan template status changed");
    Ok(template)
}

pub async fn handle_plan_created(
    uow: &mut UnitOfWork<'_>,
    plan_id: &Amount,
    creator: Address,
    template_id: &Amount,
    price: Amount,
    deployment: &B256,
) -> Result<Plan, ProcessingError> {
    let plan = Plan {
        id: amount::to_hex(plan_id),
        plan_template_id: amount::to_hex(template_id),
        creator,
        price,
        active: true,
        deployment_id: optional_cid(deployment),
    };
    uow.save(&plan)?;
    debug!(plan = %plan.id, %creator, price = %plan.price, "Plan created");
    Ok(plan)
}

/// Deactivate a plan. Removed plans are kept for history.
pub async fn handle_plan_removed(
    uow: &mut UnitOfWork<'_>,
    plan_id: &Amount,
) -> Result<Plan, ProcessingError> {
    let id = amount::to_hex(plan_id);
    let mut plan: Plan = uow.get(&id).await?.ok_or_else(|| {
        ProcessingError::MissingPrecondition(format!("plan ({id}) not found"))
    })?;
    plan.active = false;
    uow.save(&plan)?;
    debug!(plan = %plan.id, "Plan removed");
    Ok(plan)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{PlanTemplateInfo, StaticQuery};
    use crate::store::MemoryStore;

    fn template_info(metadata: B256) -> PlanTemplateInfo {
        PlanTemplateInfo {
            period: 2_592_000.into(),
            daily_req_cap: 10_000.into(),
            rate_limit: 100.into(),
            metadata,
        }
    }

    #[tokio::test]
    async fn template_is_read_from_chain_state() {
        let store = MemoryStore::new();
        let mut uow = UnitOfWork::new(&store);
        let query = StaticQuery::new()
            .with_plan_template(1, template_info(B256::ZERO))
            .with_plan_template(2, template_info(B256::repeat_byte(0x42)));

        let t1 = handle_plan_template_created(&mut uow, &query, &Amount::from(1))
            .await
            .unwrap();
        assert_eq!(t1.id, "0x1");
        assert_eq!(t1.period, Amount::from(2_592_000));
        assert!(t1.metadata.is_none());
        assert!(t1.active);

        let t2 = handle_plan_template_created(&mut uow, &query, &Amount::from(2))
            .await
            .unwrap();
        assert_eq!(
            t2.metadata,
            Some(digest_to_cid(B256::repeat_byte(0x42).as_slice()))
        );

        let err = handle_plan_template_created(&mut uow, &query, &Amount::from(3))
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessingError::ExternalQuery(_)));
    }

    #[tokio::test]
    async fn template_updates_require_the_template() {
        let store = MemoryStore::new();
        let mut uow = UnitOfWork::new(&store);
        let id = Amount::from(9);

        let err = handle_plan_template_status_changed(&mut uow, &id, false)
            .await
            .unwrap_err();
        assert!(err.is_integrity());
        assert!(handle_plan_template_metadata_changed(&mut uow, &id, &B256::ZERO)
            .await
            .is_err());
        assert!(uow.is_empty());

        let query = StaticQuery::new().with_plan_template(9, template_info(B256::ZERO));
        handle_plan_template_created(&mut uow, &query, &id).await.unwrap();

        let t = handle_plan_template_status_changed(&mut uow, &id, false).await.unwrap();
        assert!(!t.active);
        let t = handle_plan_template_metadata_changed(&mut uow, &id, &B256::repeat_byte(0x01))
            .await
            .unwrap();
        assert!(t.metadata.is_some());
        assert!(!t.active);
    }

    #[tokio::test]
    async fn plan_create_and_remove() {
        let store = MemoryStore::new();
        let mut uow = UnitOfWork::new(&store);
        let creator = Address::repeat_byte(0xaa);

        let any = handle_plan_created(&mut uow, &Amount::from(1), creator, &Amount::from(9), 500.into(), &B256::ZERO)
            .await
            .unwrap();
        assert!(any.deployment_id.is_none());
        assert_eq!(any.plan_template_id, "0x9");

        let bound = handle_plan_created(
            &mut uow,
            &Amount::from(2),
            creator,
            &Amount::from(9),
            750.into(),
            &B256::repeat_byte(0xd1),
        )
        .await
        .unwrap();
        assert_eq!(
            bound.deployment_id,
            Some(digest_to_cid(B256::repeat_byte(0xd1).as_slice()))
        );

        let removed = handle_plan_removed(&mut uow, &Amount::from(2)).await.unwrap();
        assert!(!removed.active);
        assert_eq!(removed.price, Amount::from(750));

        let err = handle_plan_removed(&mut uow, &Amount::from(3)).await.unwrap_err();
        assert!(matches!(err, ProcessingError::MissingPrecondition(_)));
    }
}
