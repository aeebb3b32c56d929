//! stakeindex-core — derived-state engine for a staking / rewards indexer.
//!
//! # Architecture
//!
//! ```text
//! ChainEvent → EventProcessor
//!                  ├── StakeEvent::parse   (typed, validated arguments)
//!                  ├── UnitOfWork          (staged writes, one commit per event)
//!                  ├── era                 (era clock)
//!                  ├── era_value           (EraValue ledger)
//!                  ├── stake               (delegations, total stake, unbonds)
//!                  ├── registry            (indexer lifecycle, commission)
//!                  ├── rewards             (per-era totals, unclaimed / claimed)
//!                  ├── query_registry      (projects, deployments, indexing status)
//!                  ├── plans               (plan templates, plans)
//!                  ├── service_agreement   (indexer / consumer agreements)
//!                  ├── ChainQuery          (read-only chain state)
//!                  └── EntityStore         (memory / SQLite)
//! ```

pub mod amount;
pub mod cid;
pub mod config;
pub mod entities;
pub mod era;
pub mod era_value;
pub mod error;
pub mod events;
pub mod plans;
pub mod processor;
pub mod query;
pub mod query_registry;
pub mod registry;
pub mod rewards;
pub mod service_agreement;
pub mod stake;
pub mod store;

pub use amount::Amount;
pub use config::{ContractAddresses, LogConfig, StakeIndexConfig};
pub use era_value::{EraOp, EraValue};
pub use error::ProcessingError;
pub use events::{ChainEvent, Contract, StakeEvent};
pub use processor::{EventProcessor, Outcome, ProcessorStats};
pub use query::{ChainQuery, PlanTemplateInfo, StaticQuery};
pub use store::{Change, Entity, EntityStore, MemoryStore, UnitOfWork};
