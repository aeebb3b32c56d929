//! Processor configuration.

use alloy_primitives::Address;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::events::Contract;

/// Addresses of the contracts whose events are processed.
///
/// An unset address accepts events of that family from any emitter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContractAddresses {
    pub era_manager: Option<Address>,
    pub staking: Option<Address>,
    pub indexer_registry: Option<Address>,
    pub rewards_distributor: Option<Address>,
    pub query_registry: Option<Address>,
    pub plan_manager: Option<Address>,
    pub service_agreement_registry: Option<Address>,
}

impl ContractAddresses {
    pub fn get(&self, contract: Contract) -> Option<Address> {
        match contract {
            Contract::EraManager => self.era_manager,
            Contract::Staking => self.staking,
            Contract::IndexerRegistry => self.indexer_registry,
            Contract::RewardsDistributor => self.rewards_distributor,
            Contract::QueryRegistry => self.query_registry,
            Contract::PlanManager => self.plan_manager,
            Contract::ServiceAgreementRegistry => self.service_agreement_registry,
        }
    }

    /// Returns `true` if `emitter` may emit events of `contract`'s family.
    pub fn accepts(&self, contract: Contract, emitter: &Address) -> bool {
        self.get(contract).map_or(true, |expected| expected == *emitter)
    }
}

/// Log level per component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Global default level: "trace" | "debug" | "info" | "warn" | "error"
    #[serde(default = "default_level")]
    pub level: String,
    /// Override per component: component_name → level
    #[serde(default)]
    pub components: HashMap<String, String>,
    /// Emit JSON structured logs (true) or human-readable text (false)
    #[serde(default)]
    pub json: bool,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            components: HashMap::new(),
            json: false,
        }
    }
}

impl LogConfig {
    /// `EnvFilter` directive string, e.g. `"info,stakeindex_core=debug"`.
    pub fn directives(&self) -> String {
        let mut directives = self.level.clone();
        let mut components: Vec<_> = self.components.iter().collect();
        components.sort();
        for (component, level) in components {
            directives.push_str(&format!(",{}={}", component.replace('-', "_"), level));
        }
        directives
    }
}

/// Top-level configuration of a stakeindex deployment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StakeIndexConfig {
    /// Chain slug, used in log output.
    pub chain: String,
    pub contracts: ContractAddresses,
    pub log: LogConfig,
}

impl Default for StakeIndexConfig {
    fn default() -> Self {
        Self {
            chain: "moonbeam".into(),
            contracts: ContractAddresses::default(),
            log: LogConfig::default(),
        }
    }
}

impl StakeIndexConfig {
    pub fn chain(mut self, chain: impl Into<String>) -> Self {
        self.chain = chain.into();
        self
    }

    pub fn contract(mut self, contract: Contract, address: Address) -> Self {
        let slot = match contract {
            Contract::EraManager => &mut self.contracts.era_manager,
            Contract::Staking => &mut self.contracts.staking,
            Contract::IndexerRegistry => &mut self.contracts.indexer_registry,
            Contract::RewardsDistributor => &mut self.contracts.rewards_distributor,
            Contract::QueryRegistry => &mut self.contracts.query_registry,
            Contract::PlanManager => &mut self.contracts.plan_manager,
            Contract::ServiceAgreementRegistry => &mut self.contracts.service_agreement_registry,
        };
        *slot = Some(address);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_contract_accepts_any_emitter() {
        let staking = Address::repeat_byte(0x51);
        let cfg = StakeIndexConfig::default().contract(Contract::Staking, staking);

        assert!(cfg.contracts.accepts(Contract::Staking, &staking));
        assert!(!cfg.contracts.accepts(Contract::Staking, &Address::ZERO));
        assert!(cfg.contracts.accepts(Contract::EraManager, &Address::ZERO));
    }

    #[test]
    fn partial_json_config_fills_defaults() {
        let cfg: StakeIndexConfig = serde_json::from_str(
            r#"{ "contracts": { "era_manager": "0xd376c00320cbdb8b3c862094fa103529639ce881" } }"#,
        )
        .unwrap();
        assert_eq!(cfg.chain, "moonbeam");
        assert!(cfg.contracts.era_manager.is_some());
        assert!(cfg.contracts.staking.is_none());
        assert_eq!(cfg.log.level, "info");
    }

    #[test]
    fn log_directives_are_sorted_and_snake_cased() {
        let mut log = LogConfig::default();
        log.components.insert("stakeindex-core".into(), "debug".into());
        log.components.insert("sqlx".into(), "warn".into());
        assert_eq!(log.directives(), "info,sqlx=warn,stakeindex_core=debug");
    }
}
