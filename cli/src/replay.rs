//! Loading recorded events and chain-state snapshots from disk.

use alloy_primitives::{Address, B256};
use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::io::BufRead;
use std::path::Path;

use stakeindex_core::{amount, ChainEvent, PlanTemplateInfo, StakeIndexConfig, StaticQuery};

/// Read a JSON-lines file of decoded events. Blank lines and lines starting
/// with `#` are ignored.
pub fn load_events(path: &Path) -> Result<Vec<ChainEvent>> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("opening events file {}", path.display()))?;
    parse_events(std::io::BufReader::new(file))
}

pub fn parse_events(reader: impl BufRead) -> Result<Vec<ChainEvent>> {
    let mut events = Vec::new();
    for (n, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("reading line {}", n + 1))?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let event: ChainEvent = serde_json::from_str(trimmed)
            .with_context(|| format!("line {}: invalid event", n + 1))?;
        events.push(event);
    }
    Ok(events)
}

/// Chain state the handlers may query, recorded alongside the events.
///
/// ```json
/// {
///   "rewards":           { "<indexer>:<delegator>": "<amount>" },
///   "planTemplates":     { "<id>": { "period": "..", "dailyReqCap": "..", "rateLimit": "..", "metadata": "0x.." } },
///   "serviceAgreements": { "<agreement>": "<deployment digest>" }
/// }
/// ```
///
/// Every section is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default, deny_unknown_fields)]
struct ChainState {
    rewards: HashMap<String, String>,
    plan_templates: HashMap<String, PlanTemplateInfo>,
    service_agreements: HashMap<String, String>,
}

pub fn load_chain_state(path: &Path) -> Result<StaticQuery> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading chain state {}", path.display()))?;
    parse_chain_state(&raw)
}

pub fn parse_chain_state(raw: &str) -> Result<StaticQuery> {
    let state: ChainState = serde_json::from_str(raw).context("invalid chain state file")?;

    let mut query = StaticQuery::new();
    for (pair, value) in state.rewards {
        let (indexer, delegator) = pair
            .split_once(':')
            .ok_or_else(|| anyhow!("rewards key '{pair}' is not <indexer>:<delegator>"))?;
        let indexer: Address = indexer.parse().with_context(|| format!("indexer in '{pair}'"))?;
        let delegator: Address = delegator
            .parse()
            .with_context(|| format!("delegator in '{pair}'"))?;
        let amount = amount::parse(&value).ok_or_else(|| anyhow!("amount '{value}' for '{pair}'"))?;
        query.set_rewards(indexer, delegator, amount);
    }
    for (id, info) in state.plan_templates {
        let template_id = amount::parse(&id).ok_or_else(|| anyhow!("plan template id '{id}'"))?;
        query.set_plan_template(template_id, info);
    }
    for (agreement, digest) in state.service_agreements {
        let address: Address = agreement
            .parse()
            .with_context(|| format!("service agreement '{agreement}'"))?;
        let deployment: B256 = digest
            .parse()
            .with_context(|| format!("deployment of '{agreement}'"))?;
        query.set_service_agreement(address, deployment);
    }
    Ok(query)
}

pub fn load_config(path: Option<&Path>) -> Result<StakeIndexConfig> {
    match path {
        None => Ok(StakeIndexConfig::default()),
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading config {}", path.display()))?;
            serde_json::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))
        }
    }
}
