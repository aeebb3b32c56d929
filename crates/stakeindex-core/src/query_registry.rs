//! Query registry handlers: projects, their deployments and the indexers
//! serving each deployment.
//!
//! Digests arriving from the contract (metadata, deployment manifest,
//! version) are stored as CIDv0 strings. A deployment is shared by every
//! project that points at it, so it is created on first sight only.

use alloy_primitives::{Address, B256};
use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info};

use crate::amount::{self, Amount};
use crate::cid::digest_to_cid;
use crate::entities::{Deployment, DeploymentIndexer, IndexingStatus, Project, ProjectDeployment};
use crate::error::ProcessingError;
use crate::store::{Entity, UnitOfWork};

async fn require_project(uow: &UnitOfWork<'_>, id: &str) -> Result<Project, ProcessingError> {
    uow.get(id).await?.ok_or_else(|| {
        ProcessingError::MissingPrecondition(format!("expected query ({id}) to exist"))
    })
}

async fn require_deployment_indexer(
    uow: &UnitOfWork<'_>,
    indexer: Address,
    deployment: &B256,
) -> Result<DeploymentIndexer, ProcessingError> {
    let id = DeploymentIndexer::key(&indexer, &digest_to_cid(deployment.as_slice()));
    uow.get(&id).await?.ok_or_else(|| {
        ProcessingError::MissingPrecondition(format!("expected deployment indexer ({id}) to exist"))
    })
}

/// Stage the deployment and its link to `project_id` unless they exist.
async fn link_deployment(
    uow: &mut UnitOfWork<'_>,
    project_id: &str,
    deployment_id: &str,
    version: &str,
    timestamp: DateTime<Utc>,
) -> Result<(), ProcessingError> {
    if uow.get::<Deployment>(deployment_id).await?.is_none() {
        uow.save(&Deployment {
            id: deployment_id.to_string(),
            version: version.to_string(),
            created_timestamp: timestamp,
        })?;
    }

    let link = ProjectDeployment {
        project_id: project_id.to_string(),
        deployment_id: deployment_id.to_string(),
    };
    if uow.get::<ProjectDeployment>(&link.id()).await?.is_none() {
        uow.save(&link)?;
    }
    Ok(())
}

pub async fn handle_query_created(
    uow: &mut UnitOfWork<'_>,
    query_id: &Amount,
    creator: Address,
    metadata: &B256,
    deployment: &B256,
    version: &B256,
    timestamp: DateTime<Utc>,
) -> Result<Project, ProcessingError> {
    let project_id = amount::to_hex(query_id);
    let deployment_id = digest_to_cid(deployment.as_slice());
    let version = digest_to_cid(version.as_slice());

    link_deployment(uow, &project_id, &deployment_id, &version, timestamp).await?;

    let project = Project {
        id: project_id,
        owner: creator,
        metadata: digest_to_cid(metadata.as_slice()),
        current_deployment: deployment_id,
        current_version: version,
        created_timestamp: timestamp,
        updated_timestamp: timestamp,
    };
    uow.save(&project)?;
    info!(project = %project.id, %creator, deployment = %project.current_deployment, "Query created");
    Ok(project)
}

pub async fn handle_query_metadata_updated(
    uow: &mut UnitOfWork<'_>,
    query_id: &Amount,
    metadata: &B256,
    timestamp: DateTime<Utc>,
) -> Result<Project, ProcessingError> {
    let mut project = require_project(uow, &amount::to_hex(query_id)).await?;
    project.metadata = digest_to_cid(metadata.as_slice());
    project.updated_timestamp = timestamp;
    uow.save(&project)?;
    debug!(project = %project.id, metadata = %project.metadata, "Query metadata updated");
    Ok(project)
}

/// Point the project at a new deployment, keeping the link to every earlier
/// one.
pub async fn handle_query_deployment_updated(
    uow: &mut UnitOfWork<'_>,
    query_id: &Amount,
    deployment: &B256,
    version: &B256,
    timestamp: DateTime<Utc>,
) -> Result<Project, ProcessingError> {
    let mut project = require_project(uow, &amount::to_hex(query_id)).await?;
    let deployment_id = digest_to_cid(deployment.as_slice());
    let version = digest_to_cid(version.as_slice());

    link_deployment(uow, &project.id, &deployment_id, &version, timestamp).await?;

    project.current_deployment = deployment_id;
    project.current_version = version;
    project.updated_timestamp = timestamp;
    uow.save(&project)?;
    debug!(project = %project.id, deployment = %project.current_deployment, "Query deployment updated");
    Ok(project)
}

pub async fn handle_indexing_started(
    uow: &mut UnitOfWork<'_>,
    indexer: Address,
    deployment: &B256,
) -> Result<DeploymentIndexer, ProcessingError> {
    let record = DeploymentIndexer {
        indexer,
        deployment_id: digest_to_cid(deployment.as_slice()),
        block_height: 0,
        mmr_root: None,
        timestamp: None,
        status: IndexingStatus::Indexing,
    };
    uow.save(&record)?;
    debug!(%indexer, deployment = %record.deployment_id, "Indexing started");
    Ok(record)
}

pub async fn handle_indexing_updated(
    uow: &mut UnitOfWork<'_>,
    indexer: Address,
    deployment: &B256,
    block_height: u64,
    mmr_root: B256,
    reported_at: DateTime<Utc>,
) -> Result<DeploymentIndexer, ProcessingError> {
    let mut record = require_deployment_indexer(uow, indexer, deployment).await?;
    record.block_height = block_height;
    record.mmr_root = Some(mmr_root);
    record.timestamp = Some(reported_at);
    uow.save(&record)?;
    debug!(%indexer, deployment = %record.deployment_id, block_height, "Indexing progress");
    Ok(record)
}

pub async fn handle_indexing_ready(
    uow: &mut UnitOfWork<'_>,
    indexer: Address,
    deployment: &B256,
    timestamp: DateTime<Utc>,
) -> Result<DeploymentIndexer, ProcessingError> {
    let mut record = require_deployment_indexer(uow, indexer, deployment).await?;
    record.status = IndexingStatus::Ready;
    record.timestamp = Some(timestamp);
    uow.save(&record)?;
    debug!(%indexer, deployment = %record.deployment_id, "Indexing ready");
    Ok(record)
}

/// Mark the indexer as terminated on the deployment. The record is kept.
pub async fn handle_indexing_stopped(
    uow: &mut UnitOfWork<'_>,
    indexer: Address,
    deployment: &B256,
) -> Result<DeploymentIndexer, ProcessingError> {
    let mut record = require_deployment_indexer(uow, indexer, deployment).await?;
    record.status = IndexingStatus::Terminated;
    uow.save(&record)?;
    debug!(%indexer, deployment = %record.deployment_id, "Indexing stopped");
    Ok(record)
}

/// Remove the project and its deployment links. Deployments stay, other
/// projects may share them.
///
/// Returns the number of links removed.
pub async fn handle_query_unregistered(
    uow: &mut UnitOfWork<'_>,
    query_id: &Amount,
) -> Result<usize, ProcessingError> {
    let project_id = amount::to_hex(query_id);
    let links: Vec<ProjectDeployment> = uow
        .find_by("projectId", &Value::String(project_id.clone()))
        .await?;

    for link in &links {
        uow.remove::<ProjectDeployment>(&link.id());
    }
    uow.remove::<Project>(&project_id);
    info!(project = %project_id, links = links.len(), "Query unregistered");
    Ok(links.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{EntityStore, MemoryStore};
    use chrono::TimeZone;

    const CREATOR: Address = Address::repeat_byte(0xc0);
    const INDEXER: Address = Address::repeat_byte(0xaa);

    fn t(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn digest(byte: u8) -> B256 {
        B256::repeat_byte(byte)
    }

    async fn create(uow: &mut UnitOfWork<'_>, id: u64, deployment: u8) -> Project {
        handle_query_created(
            uow,
            &Amount::from(id),
            CREATOR,
            &digest(0x01),
            &digest(deployment),
            &digest(0x0f),
            t(100),
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn create_links_project_and_deployment() {
        let store = MemoryStore::new();
        let mut uow = UnitOfWork::new(&store);
        let project = create(&mut uow, 26, 0xd1).await;

        assert_eq!(project.id, "0x1a");
        assert_eq!(project.current_deployment, digest_to_cid(digest(0xd1).as_slice()));
        assert_eq!(project.created_timestamp, project.updated_timestamp);

        let link: Option<ProjectDeployment> = uow
            .get(&ProjectDeployment::key("0x1a", &project.current_deployment))
            .await
            .unwrap();
        assert!(link.is_some());
        let deployment: Deployment = uow
            .get(&project.current_deployment)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(deployment.version, project.current_version);
    }

    #[tokio::test]
    async fn shared_deployment_keeps_first_version() {
        let store = MemoryStore::new();
        let mut uow = UnitOfWork::new(&store);
        create(&mut uow, 1, 0xd1).await;
        handle_query_created(
            &mut uow,
            &Amount::from(2),
            CREATOR,
            &digest(0x02),
            &digest(0xd1),
            &digest(0x0e),
            t(200),
        )
        .await
        .unwrap();
        store.commit(uow.into_changes()).await.unwrap();

        assert_eq!(store.count(Deployment::KIND), 1);
        assert_eq!(store.count(ProjectDeployment::KIND), 2);
        let uow = UnitOfWork::new(&store);
        let deployment: Deployment = uow
            .get(&digest_to_cid(digest(0xd1).as_slice()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(deployment.version, digest_to_cid(digest(0x0f).as_slice()));
        assert_eq!(deployment.created_timestamp, t(100));
    }

    #[tokio::test]
    async fn updates_require_the_project() {
        let store = MemoryStore::new();
        let mut uow = UnitOfWork::new(&store);
        let q = Amount::from(7);

        let err = handle_query_metadata_updated(&mut uow, &q, &digest(0x02), t(1))
            .await
            .unwrap_err();
        assert!(err.is_integrity());
        assert!(handle_query_deployment_updated(&mut uow, &q, &digest(0xd2), &digest(0x0e), t(1))
            .await
            .is_err());
        assert!(uow.is_empty());

        create(&mut uow, 7, 0xd1).await;
        let p = handle_query_metadata_updated(&mut uow, &q, &digest(0x02), t(150))
            .await
            .unwrap();
        assert_eq!(p.metadata, digest_to_cid(digest(0x02).as_slice()));
        assert_eq!(p.updated_timestamp, t(150));
        assert_eq!(p.created_timestamp, t(100));

        let p = handle_query_deployment_updated(&mut uow, &q, &digest(0xd2), &digest(0x0e), t(300))
            .await
            .unwrap();
        assert_eq!(p.current_deployment, digest_to_cid(digest(0xd2).as_slice()));
        assert_eq!(p.current_version, digest_to_cid(digest(0x0e).as_slice()));

        let links: Vec<ProjectDeployment> = uow
            .find_by("projectId", &Value::String("0x7".into()))
            .await
            .unwrap();
        assert_eq!(links.len(), 2);
    }

    #[tokio::test]
    async fn unregister_removes_project_and_links_only() {
        let store = MemoryStore::new();
        let mut uow = UnitOfWork::new(&store);
        create(&mut uow, 1, 0xd1).await;
        handle_query_deployment_updated(&mut uow, &Amount::from(1), &digest(0xd2), &digest(0x0e), t(200))
            .await
            .unwrap();
        create(&mut uow, 2, 0xd1).await;
        store.commit(uow.into_changes()).await.unwrap();

        let mut uow = UnitOfWork::new(&store);
        let removed = handle_query_unregistered(&mut uow, &Amount::from(1)).await.unwrap();
        assert_eq!(removed, 2);
        store.commit(uow.into_changes()).await.unwrap();

        assert_eq!(store.count(Project::KIND), 1);
        assert_eq!(store.count(ProjectDeployment::KIND), 1);
        assert_eq!(store.count(Deployment::KIND), 2);
        assert!(store.get(Project::KIND, "0x1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn indexing_status_lifecycle() {
        let store = MemoryStore::new();
        let mut uow = UnitOfWork::new(&store);
        let deployment = digest(0xd1);

        let err = handle_indexing_ready(&mut uow, INDEXER, &deployment, t(1))
            .await
            .unwrap_err();
        assert!(matches!(err, ProcessingError::MissingPrecondition(_)));

        let r = handle_indexing_started(&mut uow, INDEXER, &deployment).await.unwrap();
        assert_eq!(r.status, IndexingStatus::Indexing);
        assert_eq!(r.block_height, 0);

        let r = handle_indexing_updated(&mut uow, INDEXER, &deployment, 1_024, digest(0xee), t(50))
            .await
            .unwrap();
        assert_eq!(r.block_height, 1_024);
        assert_eq!(r.mmr_root, Some(digest(0xee)));
        assert_eq!(r.timestamp, Some(t(50)));

        let r = handle_indexing_ready(&mut uow, INDEXER, &deployment, t(60)).await.unwrap();
        assert_eq!(r.status, IndexingStatus::Ready);
        assert_eq!(r.timestamp, Some(t(60)));
        assert_eq!(r.block_height, 1_024);

        let r = handle_indexing_stopped(&mut uow, INDEXER, &deployment).await.unwrap();
        assert_eq!(r.status, IndexingStatus::Terminated);
    }
}
