//! Bounded polling assertions.
//!
//! Channel and transfer state become consistent asynchronously across
//! nodes, the chain, and the services, so every `assert_*` action is a
//! retry loop: one shared combinator, one probe per specialization.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use crate::{
    AssertChannelParams, AssertEventsParams, AssertPfsHistoryParams, AssertPfsIouParams,
    AssertPfsRoutesParams, AssertSumParams, ChainApi, ChannelState, MsApi, NodePool, PfsApi,
    SkeinResult, StoredChannelInfo, TaskOutcome,
};

#[derive(Debug, Clone, Copy)]
pub struct PollConfig {
    pub interval: Duration,
    pub max_wait: Duration,
}

impl PollConfig {
    pub fn new(interval: Duration, max_wait: Duration) -> Self {
        Self { interval, max_wait }
    }
}

/// One probe evaluation. `Pending` carries the observed state so a timeout
/// can report what was last seen.
#[derive(Debug, Clone)]
pub enum Probe {
    Satisfied,
    Pending(String),
}

#[derive(Debug, Clone)]
pub enum PollStatus {
    Satisfied,
    TimedOut { last: String },
}

/// Evaluates `probe` until it is satisfied or `max_wait` elapses.
/// Transient errors (chain/service reads) count as pending; anything else
/// aborts the poll immediately.
pub fn poll_until(
    cfg: &PollConfig,
    mut probe: impl FnMut() -> SkeinResult<Probe>,
) -> SkeinResult<PollStatus> {
    let started = Instant::now();
    let mut last = String::from("not yet evaluated");
    loop {
        match probe() {
            Ok(Probe::Satisfied) => return Ok(PollStatus::Satisfied),
            Ok(Probe::Pending(seen)) => last = seen,
            Err(err) if err.is_transient() => last = err.to_string(),
            Err(err) => return Err(err),
        }
        if started.elapsed() >= cfg.max_wait {
            return Ok(PollStatus::TimedOut { last });
        }
        std::thread::sleep(cfg.interval);
    }
}

fn outcome_from(kind: &str, detail: &str, result: SkeinResult<PollStatus>) -> TaskOutcome {
    match result {
        Ok(PollStatus::Satisfied) => TaskOutcome::Success,
        Ok(PollStatus::TimedOut { last }) => {
            TaskOutcome::Timeout(format!("{kind} {detail}: timed out; last seen: {last}"))
        }
        Err(err) => TaskOutcome::Failure(format!("{kind} {detail}: {err}")),
    }
}

/// `assert`: every declared channel field must match.
pub fn assert_channel(pool: &NodePool, params: &AssertChannelParams, cfg: &PollConfig) -> TaskOutcome {
    let detail = format!("{}-{}", params.from, params.to);
    let partner = match pool.address_of(params.to) {
        Ok(addr) => addr,
        Err(err) => return TaskOutcome::Failure(format!("assert {detail}: {err}")),
    };
    let result = poll_until(cfg, || {
        let controller = pool.get(params.from)?;
        let Some(channel) = controller.query_channel(&partner)? else {
            return Ok(Probe::Pending("channel not found".to_string()));
        };
        match channel_mismatch(params, &channel) {
            None => Ok(Probe::Satisfied),
            Some(mismatch) => Ok(Probe::Pending(mismatch)),
        }
    });
    outcome_from("assert", &detail, result)
}

fn channel_mismatch(params: &AssertChannelParams, channel: &ChannelState) -> Option<String> {
    let mut mismatches = Vec::new();
    if let Some(expected) = params.total_deposit {
        if channel.total_deposit != expected.value() {
            mismatches.push(format!(
                "total_deposit: expected {expected}, got {}",
                channel.total_deposit
            ));
        }
    }
    if let Some(expected) = params.total_withdraw {
        if channel.total_withdraw != expected.value() {
            mismatches.push(format!(
                "total_withdraw: expected {expected}, got {}",
                channel.total_withdraw
            ));
        }
    }
    if let Some(expected) = params.balance {
        if channel.balance != expected.value() {
            mismatches.push(format!(
                "balance: expected {expected}, got {}",
                channel.balance
            ));
        }
    }
    if let Some(expected) = params.state {
        if channel.state != expected {
            mismatches.push(format!("state: expected {expected}, got {}", channel.state));
        }
    }
    if mismatches.is_empty() {
        None
    } else {
        Some(mismatches.join("; "))
    }
}

/// `assert_sum`: aggregate balance across a node's channels.
pub fn assert_sum(pool: &NodePool, params: &AssertSumParams, cfg: &PollConfig) -> TaskOutcome {
    let detail = format!("node {}", params.node);
    let result = poll_until(cfg, || {
        let sum = pool.get(params.node)?.balance_sum()?;
        if sum == params.balance_sum.value() {
            Ok(Probe::Satisfied)
        } else {
            Ok(Probe::Pending(format!(
                "balance sum {sum}, expected {}",
                params.balance_sum
            )))
        }
    });
    outcome_from("assert_sum", &detail, result)
}

/// `assert_events`: exactly `num_events` matching events; order within the
/// window is irrelevant.
pub fn assert_events(chain: &dyn ChainApi, params: &AssertEventsParams, cfg: &PollConfig) -> TaskOutcome {
    let detail = format!("{}::{}", params.contract_name, params.event_name);
    let result = poll_until(cfg, || {
        let events = chain.events(&params.contract_name, &params.event_name)?;
        let matching = events
            .iter()
            .filter(|e| event_matches(e, &params.event_args))
            .count() as u64;
        if matching == params.num_events {
            Ok(Probe::Satisfied)
        } else {
            Ok(Probe::Pending(format!(
                "{matching} matching events, expected {}",
                params.num_events
            )))
        }
    });
    outcome_from("assert_events", &detail, result)
}

/// Field-subset match against the event's `args` object (or the event
/// record itself when it has no `args` wrapper).
fn event_matches(
    event: &serde_json::Value,
    filter: &std::collections::BTreeMap<String, serde_json::Value>,
) -> bool {
    let args = event.get("args").unwrap_or(event);
    filter.iter().all(|(key, expected)| args.get(key) == Some(expected))
}

/// `assert_pfs_history`: exact request count, and, when declared, the
/// exact route set (order-sensitive per route, set-wise across routes).
pub fn assert_pfs_history(
    pool: &NodePool,
    pfs: &dyn PfsApi,
    params: &AssertPfsHistoryParams,
    cfg: &PollConfig,
) -> TaskOutcome {
    let detail = format!("{}->{}", params.source, params.target);
    let (source, target) = match (pool.address_of(params.source), pool.address_of(params.target)) {
        (Ok(s), Ok(t)) => (s, t),
        (Err(err), _) | (_, Err(err)) => {
            return TaskOutcome::Failure(format!("assert_pfs_history {detail}: {err}"));
        }
    };
    let expected_routes = match &params.expected_routes {
        None => None,
        Some(routes) => match resolve_routes(pool, routes) {
            Ok(resolved) => Some(route_set(&resolved)),
            Err(err) => {
                return TaskOutcome::Failure(format!("assert_pfs_history {detail}: {err}"));
            }
        },
    };

    let result = poll_until(cfg, || {
        let history = pfs.history(&source, &target)?;
        if history.request_count != params.request_count {
            return Ok(Probe::Pending(format!(
                "{} requests, expected {}",
                history.request_count, params.request_count
            )));
        }
        if let Some(expected) = &expected_routes {
            let seen = route_set(&history.routes);
            if &seen != expected {
                return Ok(Probe::Pending(format!(
                    "route set mismatch: got {seen:?}, expected {expected:?}"
                )));
            }
        }
        Ok(Probe::Satisfied)
    });
    outcome_from("assert_pfs_history", &detail, result)
}

fn resolve_routes(pool: &NodePool, routes: &[Vec<usize>]) -> SkeinResult<Vec<Vec<String>>> {
    routes
        .iter()
        .map(|route| route.iter().map(|i| pool.address_of(*i)).collect())
        .collect()
}

fn route_set(routes: &[Vec<String>]) -> BTreeSet<Vec<String>> {
    routes.iter().cloned().collect()
}

/// `assert_pfs_iou`: the source either has no IOU or one with the declared
/// accrued amount.
pub fn assert_pfs_iou(
    pool: &NodePool,
    pfs: &dyn PfsApi,
    params: &AssertPfsIouParams,
    cfg: &PollConfig,
) -> TaskOutcome {
    let detail = format!("node {}", params.source);
    let source = match pool.address_of(params.source) {
        Ok(addr) => addr,
        Err(err) => return TaskOutcome::Failure(format!("assert_pfs_iou {detail}: {err}")),
    };
    let result = poll_until(cfg, || {
        let iou = pfs.iou(&source)?;
        match (&iou, params.iou_exists) {
            (None, false) => Ok(Probe::Satisfied),
            (Some(iou), true) => match params.amount {
                None => Ok(Probe::Satisfied),
                Some(expected) if iou.amount == expected.value() => Ok(Probe::Satisfied),
                Some(expected) => Ok(Probe::Pending(format!(
                    "iou amount {}, expected {expected}",
                    iou.amount
                ))),
            },
            (None, true) => Ok(Probe::Pending("no iou recorded".to_string())),
            (Some(iou), false) => Ok(Probe::Pending(format!(
                "unexpected iou with amount {}",
                iou.amount
            ))),
        }
    });
    outcome_from("assert_pfs_iou", &detail, result)
}

/// `assert_pfs_routes`: a live route query returns exactly the declared
/// number of distinct paths.
pub fn assert_pfs_routes(
    pool: &NodePool,
    pfs: &dyn PfsApi,
    params: &AssertPfsRoutesParams,
    cfg: &PollConfig,
) -> TaskOutcome {
    let detail = format!("{}->{}", params.from, params.to);
    let (from, to) = match (pool.address_of(params.from), pool.address_of(params.to)) {
        (Ok(f), Ok(t)) => (f, t),
        (Err(err), _) | (_, Err(err)) => {
            return TaskOutcome::Failure(format!("assert_pfs_routes {detail}: {err}"));
        }
    };
    let result = poll_until(cfg, || {
        let routes = pfs.routes(&from, &to, params.amount.value())?;
        let distinct = route_set(&routes).len() as u64;
        if distinct == params.expected_paths {
            Ok(Probe::Satisfied)
        } else {
            Ok(Probe::Pending(format!(
                "{distinct} distinct paths, expected {}",
                params.expected_paths
            )))
        }
    });
    outcome_from("assert_pfs_routes", &detail, result)
}

/// `assert_ms_claim`: the monitoring service has claimed its reward for a
/// previously stored channel. With `must_claim: false` the claim must be
/// absent right now; absence is not worth polling for.
pub fn assert_ms_claim(
    ms: &dyn MsApi,
    key: &str,
    channel: &StoredChannelInfo,
    must_claim: bool,
    cfg: &PollConfig,
) -> TaskOutcome {
    if !must_claim {
        return match ms.claim_observed(channel) {
            Ok(false) => TaskOutcome::Success,
            Ok(true) => TaskOutcome::Failure(format!(
                "assert_ms_claim {key}: unexpected claim for channel {}",
                channel.channel_identifier
            )),
            Err(err) => TaskOutcome::Failure(format!("assert_ms_claim {key}: {err}")),
        };
    }
    let result = poll_until(cfg, || {
        if ms.claim_observed(channel)? {
            Ok(Probe::Satisfied)
        } else {
            Ok(Probe::Pending("no claim observed".to_string()))
        }
    });
    outcome_from("assert_ms_claim", key, result)
}
