//! Blockchain boundary: block-height queries, event-log queries, and the
//! chain waiter behind `wait_blocks`.

use std::time::Duration;

use crate::{
    Config, PollConfig, Probe, ServiceSettings, SkeinError, SkeinResult, TaskOutcome, poll_until,
    PollStatus,
};

pub trait ChainApi: Send + Sync {
    fn block_number(&self) -> SkeinResult<u64>;

    /// Raw event records for a contract/event pair; the assertion engine
    /// does the argument filtering.
    fn events(&self, contract_name: &str, event_name: &str) -> SkeinResult<Vec<serde_json::Value>>;
}

/// JSON-RPC for heights; a configurable event-index endpoint for logs,
/// which answers by contract name, event name and arguments the way the
/// scenario addresses them.
pub struct JsonRpcChain {
    rpc_url: Option<String>,
    event_index_url: Option<String>,
    agent: ureq::Agent,
}

impl JsonRpcChain {
    pub fn from_settings(settings: &ServiceSettings, config: &Config) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(config.http_timeout()).build();
        Self {
            rpc_url: settings.rpc.clone(),
            event_index_url: settings.event_index.clone(),
            agent,
        }
    }
}

impl ChainApi for JsonRpcChain {
    fn block_number(&self) -> SkeinResult<u64> {
        let url = self.rpc_url.as_deref().ok_or_else(|| {
            SkeinError::Configuration("settings.services.rpc is not set".to_string())
        })?;
        let payload = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "eth_blockNumber",
            "params": [],
        });
        let response = self
            .agent
            .request("POST", url)
            .send_json(payload)
            .map_err(|err| SkeinError::ChainQuery(format!("eth_blockNumber: {err}")))?;
        let body: serde_json::Value = response
            .into_json()
            .map_err(|err| SkeinError::ChainQuery(format!("eth_blockNumber decode: {err}")))?;
        let hex = body
            .get("result")
            .and_then(|r| r.as_str())
            .ok_or_else(|| SkeinError::ChainQuery("eth_blockNumber returned no result".into()))?;
        u64::from_str_radix(hex.trim_start_matches("0x"), 16)
            .map_err(|_| SkeinError::ChainQuery(format!("bad block number {hex:?}")))
    }

    fn events(&self, contract_name: &str, event_name: &str) -> SkeinResult<Vec<serde_json::Value>> {
        let base = self.event_index_url.as_deref().ok_or_else(|| {
            SkeinError::Configuration("settings.services.event_index is not set".to_string())
        })?;
        let url = format!(
            "{}/api/v1/events/{contract_name}/{event_name}",
            base.trim_end_matches('/')
        );
        let response = self
            .agent
            .request("GET", &url)
            .call()
            .map_err(|err| SkeinError::ChainQuery(format!("event query: {err}")))?;
        let body: serde_json::Value = response
            .into_json()
            .map_err(|err| SkeinError::ChainQuery(format!("event decode: {err}")))?;
        body.as_array()
            .cloned()
            .ok_or_else(|| SkeinError::ChainQuery("event query returned non-array".into()))
    }
}

/// Blocks the calling branch until `blocks` additional blocks have been
/// mined past the height observed at entry. The deadline scales with the
/// block count; transient RPC errors are retried like any other probe.
pub fn wait_blocks(
    chain: &dyn ChainApi,
    interval: Duration,
    block_budget: Duration,
    blocks: u64,
) -> TaskOutcome {
    let budget = block_budget.saturating_mul(blocks.max(1).min(u64::from(u32::MAX)) as u32);
    let cfg = PollConfig {
        interval,
        max_wait: budget,
    };

    let mut start_height: Option<u64> = None;
    let result = poll_until(&cfg, || {
        let now = chain.block_number()?;
        let start = *start_height.get_or_insert(now);
        let target = start.saturating_add(blocks);
        if now >= target {
            Ok(Probe::Satisfied)
        } else {
            Ok(Probe::Pending(format!(
                "at block {now}, waiting for {target}"
            )))
        }
    });

    match result {
        Ok(PollStatus::Satisfied) => TaskOutcome::Success,
        Ok(PollStatus::TimedOut { last }) => TaskOutcome::Timeout(format!(
            "wait_blocks {blocks}: {last} (budget {}ms)",
            budget.as_millis()
        )),
        Err(err) => TaskOutcome::Failure(format!("wait_blocks {blocks}: {err}")),
    }
}
