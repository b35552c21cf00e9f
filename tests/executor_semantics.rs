//! Executor semantics against a scripted in-memory cluster: serial abort,
//! parallel join, repeat expansion, the expected-status contract, and the
//! service assertions.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use skein::{
    ApiCallOutcome, ChainApi, ChannelState, ChannelStatus, ExecutionContext, MsApi, NodeApi,
    NodeController, NodePool, NodeState, PfsApi, PfsHistory, PfsIou, PollConfig,
    ScenarioDefinition, SkeinError, SkeinResult, StoredChannelInfo, TaskNode, TaskOutcome,
};

fn addr(index: usize) -> String {
    format!("0xnode{index}")
}

fn index_of(address: &str) -> usize {
    address
        .trim_start_matches("0xnode")
        .parse()
        .expect("mock address")
}

fn pair(a: usize, b: usize) -> (usize, usize) {
    (a.min(b), a.max(b))
}

#[derive(Debug)]
struct MockChannel {
    id: u64,
    state: ChannelStatus,
    deposit: [u128; 2],
    withdraw: [u128; 2],
    balance: [u128; 2],
}

#[derive(Debug, Default)]
struct NetState {
    channels: BTreeMap<(usize, usize), MockChannel>,
    calls: Vec<String>,
    next_channel_id: u64,
}

impl NetState {
    fn slot(key: (usize, usize), index: usize) -> usize {
        if index == key.0 {
            0
        } else {
            1
        }
    }

    fn view(&self, index: usize, key: (usize, usize)) -> ChannelState {
        let channel = &self.channels[&key];
        let slot = Self::slot(key, index);
        let partner = if index == key.0 { key.1 } else { key.0 };
        ChannelState {
            partner_address: addr(partner),
            state: channel.state,
            total_deposit: channel.deposit[slot],
            total_withdraw: channel.withdraw[slot],
            balance: channel.balance[slot],
            settle_timeout: 500,
            channel_identifier: channel.id,
            token_network_address: "0xtokennetwork".to_string(),
        }
    }
}

struct MockNodeApi {
    index: usize,
    net: Arc<Mutex<NetState>>,
}

impl NodeApi for MockNodeApi {
    fn address(&self) -> SkeinResult<String> {
        Ok(addr(self.index))
    }

    fn open_channel(
        &self,
        partner: &str,
        total_deposit: u128,
        _settle_timeout: Option<u32>,
    ) -> SkeinResult<ApiCallOutcome> {
        let peer = index_of(partner);
        let key = pair(self.index, peer);
        let mut net = self.net.lock().unwrap();
        net.calls.push(format!("open {}-{}", self.index, peer));
        if net.channels.contains_key(&key) {
            return Ok(ApiCallOutcome {
                status: 409,
                channel: None,
            });
        }
        net.next_channel_id += 1;
        let id = net.next_channel_id;
        let slot = NetState::slot(key, self.index);
        let mut deposit = [0u128; 2];
        let mut balance = [0u128; 2];
        deposit[slot] = total_deposit;
        balance[slot] = total_deposit;
        net.channels.insert(
            key,
            MockChannel {
                id,
                state: ChannelStatus::Opened,
                deposit,
                withdraw: [0; 2],
                balance,
            },
        );
        let channel = net.view(self.index, key);
        Ok(ApiCallOutcome {
            status: 201,
            channel: Some(channel),
        })
    }

    fn set_total_deposit(&self, partner: &str, total_deposit: u128) -> SkeinResult<ApiCallOutcome> {
        let peer = index_of(partner);
        let key = pair(self.index, peer);
        let mut net = self.net.lock().unwrap();
        net.calls.push(format!("deposit {}-{}", self.index, peer));
        let slot = NetState::slot(key, self.index);
        let Some(channel) = net.channels.get_mut(&key) else {
            return Ok(ApiCallOutcome {
                status: 404,
                channel: None,
            });
        };
        if total_deposit < channel.deposit[slot] {
            return Ok(ApiCallOutcome {
                status: 409,
                channel: None,
            });
        }
        let delta = total_deposit - channel.deposit[slot];
        channel.deposit[slot] = total_deposit;
        channel.balance[slot] += delta;
        let channel = net.view(self.index, key);
        Ok(ApiCallOutcome {
            status: 200,
            channel: Some(channel),
        })
    }

    fn set_total_withdraw(
        &self,
        partner: &str,
        total_withdraw: u128,
    ) -> SkeinResult<ApiCallOutcome> {
        let peer = index_of(partner);
        let key = pair(self.index, peer);
        let mut net = self.net.lock().unwrap();
        net.calls.push(format!("withdraw {}-{}", self.index, peer));
        let slot = NetState::slot(key, self.index);
        let Some(channel) = net.channels.get_mut(&key) else {
            return Ok(ApiCallOutcome {
                status: 404,
                channel: None,
            });
        };
        let delta = total_withdraw.saturating_sub(channel.withdraw[slot]);
        if delta > channel.balance[slot] {
            return Ok(ApiCallOutcome {
                status: 409,
                channel: None,
            });
        }
        channel.withdraw[slot] = total_withdraw;
        channel.balance[slot] -= delta;
        let channel = net.view(self.index, key);
        Ok(ApiCallOutcome {
            status: 200,
            channel: Some(channel),
        })
    }

    fn close_channel(&self, partner: &str) -> SkeinResult<ApiCallOutcome> {
        let peer = index_of(partner);
        let key = pair(self.index, peer);
        let mut net = self.net.lock().unwrap();
        net.calls.push(format!("close {}-{}", self.index, peer));
        let Some(channel) = net.channels.get_mut(&key) else {
            return Ok(ApiCallOutcome {
                status: 404,
                channel: None,
            });
        };
        channel.state = ChannelStatus::Closed;
        let channel = net.view(self.index, key);
        Ok(ApiCallOutcome {
            status: 200,
            channel: Some(channel),
        })
    }

    /// Moves balance out of the sender's channels (greedily) and into the
    /// target's first open channel. Insufficient aggregate capacity is a
    /// 409 with no state change.
    fn transfer(
        &self,
        target: &str,
        amount: u128,
        _lock_timeout: Option<u32>,
    ) -> SkeinResult<ApiCallOutcome> {
        let peer = index_of(target);
        let mut net = self.net.lock().unwrap();
        net.calls.push(format!("transfer {}->{}", self.index, peer));

        let sender_keys: Vec<(usize, usize)> = net
            .channels
            .iter()
            .filter(|(key, ch)| {
                (key.0 == self.index || key.1 == self.index) && ch.state == ChannelStatus::Opened
            })
            .map(|(key, _)| *key)
            .collect();
        let capacity: u128 = sender_keys
            .iter()
            .map(|key| net.channels[key].balance[NetState::slot(*key, self.index)])
            .sum();
        if capacity < amount {
            return Ok(ApiCallOutcome {
                status: 409,
                channel: None,
            });
        }

        let mut remaining = amount;
        for key in sender_keys {
            if remaining == 0 {
                break;
            }
            let slot = NetState::slot(key, self.index);
            let channel = net.channels.get_mut(&key).unwrap();
            let take = remaining.min(channel.balance[slot]);
            channel.balance[slot] -= take;
            remaining -= take;
        }

        let receiver_key = net
            .channels
            .iter()
            .find(|(key, ch)| {
                (key.0 == peer || key.1 == peer) && ch.state == ChannelStatus::Opened
            })
            .map(|(key, _)| *key);
        if let Some(key) = receiver_key {
            let slot = NetState::slot(key, peer);
            net.channels.get_mut(&key).unwrap().balance[slot] += amount;
        }

        Ok(ApiCallOutcome {
            status: 200,
            channel: None,
        })
    }

    fn channel(&self, partner: &str) -> SkeinResult<Option<ChannelState>> {
        let peer = index_of(partner);
        let key = pair(self.index, peer);
        let net = self.net.lock().unwrap();
        if net.channels.contains_key(&key) {
            Ok(Some(net.view(self.index, key)))
        } else {
            Ok(None)
        }
    }

    fn channels(&self) -> SkeinResult<Vec<ChannelState>> {
        let net = self.net.lock().unwrap();
        let views = net
            .channels
            .keys()
            .filter(|key| key.0 == self.index || key.1 == self.index)
            .map(|key| net.view(self.index, *key))
            .collect();
        Ok(views)
    }
}

#[derive(Default)]
struct MockChain {
    height: AtomicU64,
    events: Mutex<Vec<serde_json::Value>>,
}

impl ChainApi for MockChain {
    fn block_number(&self) -> SkeinResult<u64> {
        Ok(self.height.fetch_add(1, Ordering::SeqCst))
    }

    fn events(&self, _: &str, _: &str) -> SkeinResult<Vec<serde_json::Value>> {
        Ok(self.events.lock().unwrap().clone())
    }
}

#[derive(Default)]
struct MockPfs {
    history: Mutex<Option<PfsHistory>>,
    iou: Mutex<Option<PfsIou>>,
    routes: Mutex<Vec<Vec<String>>>,
}

impl PfsApi for MockPfs {
    fn routes(&self, _: &str, _: &str, _: u128) -> SkeinResult<Vec<Vec<String>>> {
        Ok(self.routes.lock().unwrap().clone())
    }

    fn history(&self, _: &str, _: &str) -> SkeinResult<PfsHistory> {
        Ok(self.history.lock().unwrap().clone().unwrap_or(PfsHistory {
            request_count: 0,
            routes: Vec::new(),
        }))
    }

    fn iou(&self, _: &str) -> SkeinResult<Option<PfsIou>> {
        Ok(self.iou.lock().unwrap().clone())
    }
}

struct MockMs {
    claimed: Arc<AtomicBool>,
}

impl MsApi for MockMs {
    fn claim_observed(&self, _: &StoredChannelInfo) -> SkeinResult<bool> {
        Ok(self.claimed.load(Ordering::SeqCst))
    }
}

struct Cluster {
    ctx: ExecutionContext,
    net: Arc<Mutex<NetState>>,
    ms_claimed: Arc<AtomicBool>,
    pfs: Arc<MockPfs>,
    chain_events: Arc<MockChain>,
}

struct ArcPfs(Arc<MockPfs>);

impl PfsApi for ArcPfs {
    fn routes(&self, from: &str, to: &str, amount: u128) -> SkeinResult<Vec<Vec<String>>> {
        self.0.routes(from, to, amount)
    }

    fn history(&self, source: &str, target: &str) -> SkeinResult<PfsHistory> {
        self.0.history(source, target)
    }

    fn iou(&self, source: &str) -> SkeinResult<Option<PfsIou>> {
        self.0.iou(source)
    }
}

struct ArcChain(Arc<MockChain>);

impl ChainApi for ArcChain {
    fn block_number(&self) -> SkeinResult<u64> {
        self.0.block_number()
    }

    fn events(&self, contract: &str, event: &str) -> SkeinResult<Vec<serde_json::Value>> {
        self.0.events(contract, event)
    }
}

fn cluster(node_count: usize) -> Cluster {
    let net = Arc::new(Mutex::new(NetState::default()));
    let controllers = (0..node_count)
        .map(|index| {
            NodeController::new(
                index,
                Box::new(MockNodeApi {
                    index,
                    net: net.clone(),
                }),
                NodeState::Running,
            )
        })
        .collect();
    let ms_claimed = Arc::new(AtomicBool::new(false));
    let pfs = Arc::new(MockPfs::default());
    let chain = Arc::new(MockChain::default());
    let ctx = ExecutionContext::new(
        NodePool::new(controllers),
        Box::new(ArcChain(chain.clone())),
        Box::new(ArcPfs(pfs.clone())),
        Box::new(MockMs {
            claimed: ms_claimed.clone(),
        }),
        PollConfig::new(Duration::from_millis(2), Duration::from_millis(80)),
        Duration::from_millis(40),
    );
    Cluster {
        ctx,
        net,
        ms_claimed,
        pfs,
        chain_events: chain,
    }
}

/// Parses a full document around the given (pre-indented) scenario section.
fn parse_tree(node_count: usize, scenario: &str) -> TaskNode {
    let urls: String = (0..node_count)
        .map(|i| format!("    - http://localhost:5{i:03}\n"))
        .collect();
    let doc = format!(
        "version: 2\nname: test\nnodes:\n  count: {node_count}\n  mode: external\n  urls:\n{urls}scenario:\n{scenario}"
    );
    ScenarioDefinition::parse(&doc, "test")
        .expect("test scenario must load")
        .root
}

fn calls(net: &Arc<Mutex<NetState>>) -> Vec<String> {
    net.lock().unwrap().calls.clone()
}

#[test]
fn serial_aborts_remaining_siblings_after_failure() {
    let cluster = cluster(3);
    let tree = parse_tree(
        3,
        r#"  serial:
    tasks:
      - open_channel: {from: 0, to: 1, total_deposit: 100}
      - transfer: {from: 2, to: 0, amount: 50}
      - open_channel: {from: 1, to: 2, total_deposit: 100}
"#,
    );

    let result = cluster.ctx.execute(&tree);

    // Node 2 has no channel, so the transfer 409s against an implicit 2xx
    // expectation and the second open never runs.
    assert!(matches!(result.outcome, TaskOutcome::Failure(_)));
    assert_eq!(result.children.len(), 3);
    assert_eq!(result.children[0].outcome, TaskOutcome::Success);
    assert!(result.children[1].outcome.is_failure());
    assert_eq!(result.children[2].outcome, TaskOutcome::Skipped);

    let calls = calls(&cluster.net);
    assert!(calls.contains(&"open 0-1".to_string()));
    assert!(calls.contains(&"transfer 2->0".to_string()));
    assert!(!calls.contains(&"open 1-2".to_string()));
}

#[test]
fn parallel_runs_every_child_despite_sibling_failure() {
    let cluster = cluster(4);
    let tree = parse_tree(
        4,
        r#"  parallel:
    tasks:
      - open_channel: {from: 0, to: 1, total_deposit: 100}
      - transfer: {from: 3, to: 0, amount: 50}
      - open_channel: {from: 1, to: 2, total_deposit: 100}
"#,
    );

    let result = cluster.ctx.execute(&tree);

    assert!(matches!(result.outcome, TaskOutcome::Failure(_)));
    assert_eq!(result.children.len(), 3);
    let executed = result
        .children
        .iter()
        .filter(|c| c.outcome != TaskOutcome::Skipped)
        .count();
    assert_eq!(executed, 3, "no parallel child may be skipped");

    let calls = calls(&cluster.net);
    assert!(calls.contains(&"open 0-1".to_string()));
    assert!(calls.contains(&"open 1-2".to_string()));
    assert!(calls.contains(&"transfer 3->0".to_string()));
}

#[test]
fn serial_repeat_stops_after_failing_iteration() {
    let cluster = cluster(2);
    // Capacity 10; each iteration moves 4 away from node 0 and node 1 has
    // no channel back, so iteration 3 cannot cover the amount.
    let tree = parse_tree(
        2,
        r#"  serial:
    tasks:
      - open_channel: {from: 0, to: 1, total_deposit: 10}
      - serial:
          repeat: 5
          tasks:
            - transfer: {from: 0, to: 1, amount: 4}
"#,
    );

    let result = cluster.ctx.execute(&tree);

    assert!(matches!(result.outcome, TaskOutcome::Failure(_)));
    let repeat_node = &result.children[1];
    assert_eq!(
        repeat_node.children.len(),
        3,
        "iterations 4 and 5 must not start"
    );
    assert_eq!(repeat_node.children[0].outcome, TaskOutcome::Success);
    assert_eq!(repeat_node.children[1].outcome, TaskOutcome::Success);
    assert!(repeat_node.children[2].outcome.is_failure());

    let transfer_calls = calls(&cluster.net)
        .iter()
        .filter(|c| c.starts_with("transfer"))
        .count();
    assert_eq!(transfer_calls, 3);
}

#[test]
fn parallel_repeat_fans_out_concurrently() {
    let cluster = cluster(1);
    let tree = parse_tree(
        1,
        r#"  parallel:
    repeat: 4
    tasks:
      - wait: 60ms
"#,
    );

    let started = Instant::now();
    let result = cluster.ctx.execute(&tree);
    let elapsed = started.elapsed();

    assert_eq!(result.outcome, TaskOutcome::Success);
    assert_eq!(result.children.len(), 4);
    assert!(
        elapsed < Duration::from_millis(200),
        "iterations must overlap, took {elapsed:?}"
    );
}

#[test]
fn five_node_round_trip_balances_are_linear_in_transfers() {
    let cluster = cluster(5);
    // Channels 0-1-2-3 and 0-4-3, both participants funding each channel.
    let tree = parse_tree(
        5,
        r#"  serial:
    tasks:
      - parallel:
          name: open
          tasks:
            - open_channel: {from: 0, to: 1, total_deposit: 1_000_000_000_000_000_000}
            - open_channel: {from: 1, to: 2, total_deposit: 1_000_000_000_000_000_000}
            - open_channel: {from: 2, to: 3, total_deposit: 1_000_000_000_000_000_000}
            - open_channel: {from: 0, to: 4, total_deposit: 1_000_000_000_000_000_000}
            - open_channel: {from: 4, to: 3, total_deposit: 1_000_000_000_000_000_000}
      - parallel:
          name: fund the reverse directions
          tasks:
            - deposit: {from: 1, to: 0, total_deposit: 1_000_000_000_000_000_000}
            - deposit: {from: 2, to: 1, total_deposit: 1_000_000_000_000_000_000}
            - deposit: {from: 3, to: 2, total_deposit: 1_000_000_000_000_000_000}
            - deposit: {from: 4, to: 0, total_deposit: 1_000_000_000_000_000_000}
            - deposit: {from: 3, to: 4, total_deposit: 1_000_000_000_000_000_000}
      - serial:
          repeat: 10
          tasks:
            - transfer: {from: 3, to: 0, amount: 1_000_000_000_000_000}
      - serial:
          name: verify
          tasks:
            - assert_sum: {node: 0, balance_sum: 2_010_000_000_000_000_000}
            - assert_sum: {node: 3, balance_sum: 1_990_000_000_000_000_000}
"#,
    );

    let result = cluster.ctx.execute(&tree);
    assert_eq!(
        result.outcome,
        TaskOutcome::Success,
        "round trip failed: {result:?}"
    );
}

#[test]
fn declared_409_makes_rejected_transfer_the_expected_outcome() {
    let cluster = cluster(2);
    let tree = parse_tree(
        2,
        r#"  serial:
    tasks:
      - open_channel: {from: 0, to: 1, total_deposit: 100}
      - transfer: {from: 1, to: 0, amount: 50, expected_http_status: 409}
"#,
    );

    // Direction 1->0 has zero deposit; the 409 is the declared success.
    let result = cluster.ctx.execute(&tree);
    assert_eq!(result.outcome, TaskOutcome::Success);
}

#[test]
fn stopped_node_fails_the_branch_but_not_parallel_siblings() {
    let cluster = cluster(3);
    let tree = parse_tree(
        3,
        r#"  parallel:
    tasks:
      - serial:
          tasks:
            - stop_node: 0
            - open_channel: {from: 0, to: 1, total_deposit: 100}
            - deposit: {from: 0, to: 1, total_deposit: 200}
      - open_channel: {from: 1, to: 2, total_deposit: 100}
"#,
    );

    let result = cluster.ctx.execute(&tree);

    assert!(matches!(result.outcome, TaskOutcome::Failure(_)));
    let branch = &result.children[0];
    assert_eq!(branch.children[0].outcome, TaskOutcome::Success);
    assert!(branch.children[1].outcome.is_failure());
    assert_eq!(branch.children[2].outcome, TaskOutcome::Skipped);
    // The sibling branch still ran to completion.
    assert_eq!(result.children[1].outcome, TaskOutcome::Success);
    assert!(calls(&cluster.net).contains(&"open 1-2".to_string()));
}

#[test]
fn start_and_stop_are_idempotent() {
    let cluster = cluster(1);
    let tree = parse_tree(
        1,
        r#"  serial:
    tasks:
      - start_node: 0
      - stop_node: 0
      - stop_node: 0
      - start_node: 0
      - start_node: 0
"#,
    );

    let result = cluster.ctx.execute(&tree);
    assert_eq!(result.outcome, TaskOutcome::Success);
}

#[test]
fn ms_claim_times_out_before_claim_then_passes_after() {
    let cluster = cluster(2);
    let setup = parse_tree(
        2,
        r#"  serial:
    tasks:
      - open_channel: {from: 0, to: 1, total_deposit: 100}
      - store_channel_info: {key: "ms-test", from: 0, to: 1}
"#,
    );
    assert_eq!(cluster.ctx.execute(&setup).outcome, TaskOutcome::Success);

    let check = parse_tree(
        2,
        r#"  serial:
    tasks:
      - assert_ms_claim: {channel_info_key: "ms-test"}
"#,
    );

    // Before the settle window: no claim observed, the assertion times out.
    let before = cluster.ctx.execute(&check);
    assert!(matches!(before.outcome, TaskOutcome::Timeout(_)));

    cluster.ms_claimed.store(true, Ordering::SeqCst);
    let after = cluster.ctx.execute(&check);
    assert_eq!(after.outcome, TaskOutcome::Success);
}

#[test]
fn ms_claim_with_unknown_key_is_a_failure() {
    let cluster = cluster(1);
    let tree = parse_tree(
        1,
        r#"  serial:
    tasks:
      - assert_ms_claim: {channel_info_key: "never-stored"}
"#,
    );
    let result = cluster.ctx.execute(&tree);
    assert!(matches!(result.outcome, TaskOutcome::Failure(_)));
}

#[test]
fn channel_assertions_poll_to_success() {
    let cluster = cluster(2);
    let tree = parse_tree(
        2,
        r#"  serial:
    tasks:
      - open_channel: {from: 0, to: 1, total_deposit: 1_000}
      - withdraw: {from: 0, to: 1, total_withdraw: 400}
      - assert: {from: 0, to: 1, total_deposit: 1_000, total_withdraw: 400, balance: 600, state: opened}
      - close_channel: {from: 0, to: 1}
      - assert: {from: 0, to: 1, state: closed}
"#,
    );
    let result = cluster.ctx.execute(&tree);
    assert_eq!(result.outcome, TaskOutcome::Success, "got {result:?}");
}

#[test]
fn event_assertions_match_on_count_and_args() {
    let cluster = cluster(1);
    *cluster.chain_events.events.lock().unwrap() = vec![
        serde_json::json!({"args": {"channel_identifier": 1, "participant": "0xnode0"}}),
        serde_json::json!({"args": {"channel_identifier": 1, "participant": "0xnode1"}}),
        serde_json::json!({"args": {"channel_identifier": 2, "participant": "0xnode0"}}),
    ];
    let tree = parse_tree(
        1,
        r#"  serial:
    tasks:
      - assert_events:
          contract_name: TokenNetwork
          event_name: ChannelNewDeposit
          num_events: 2
          event_args: {channel_identifier: 1}
"#,
    );
    let result = cluster.ctx.execute(&tree);
    assert_eq!(result.outcome, TaskOutcome::Success, "got {result:?}");
}

#[test]
fn pfs_assertions_cover_history_iou_and_routes() {
    let cluster = cluster(4);
    *cluster.pfs.history.lock().unwrap() = Some(PfsHistory {
        request_count: 2,
        routes: vec![
            vec![addr(0), addr(1), addr(3)],
            vec![addr(0), addr(2), addr(3)],
        ],
    });
    *cluster.pfs.iou.lock().unwrap() = Some(PfsIou { amount: 150 });
    *cluster.pfs.routes.lock().unwrap() = vec![
        vec![addr(0), addr(1), addr(3)],
        vec![addr(0), addr(2), addr(3)],
    ];

    let tree = parse_tree(
        4,
        r#"  serial:
    tasks:
      - assert_pfs_history:
          source: 0
          target: 3
          request_count: 2
          expected_routes:
            - [0, 2, 3]
            - [0, 1, 3]
      - assert_pfs_iou: {source: 0, amount: 150}
      - assert_pfs_routes: {from: 0, to: 3, amount: 10, expected_paths: 2}
"#,
    );
    let result = cluster.ctx.execute(&tree);
    assert_eq!(result.outcome, TaskOutcome::Success, "got {result:?}");
}

#[test]
fn pfs_iou_absence_assertion() {
    let cluster = cluster(1);
    let tree = parse_tree(
        1,
        r#"  serial:
    tasks:
      - assert_pfs_iou: {source: 0, iou_exists: false}
"#,
    );
    let result = cluster.ctx.execute(&tree);
    assert_eq!(result.outcome, TaskOutcome::Success);
}

#[test]
fn wait_blocks_advances_with_the_scripted_chain() {
    let cluster = cluster(1);
    // MockChain height increments on every query, so three blocks are
    // observed after a handful of polls.
    let tree = parse_tree(
        1,
        r#"  serial:
    tasks:
      - wait_blocks: 3
"#,
    );
    let result = cluster.ctx.execute(&tree);
    assert_eq!(result.outcome, TaskOutcome::Success);
}

#[test]
fn leaf_trace_records_every_executed_leaf() {
    let cluster = cluster(2);
    let tree = parse_tree(
        2,
        r#"  serial:
    tasks:
      - open_channel: {from: 0, to: 1, total_deposit: 100}
      - transfer: {from: 0, to: 1, amount: 10}
"#,
    );
    let result = cluster.ctx.execute(&tree);
    assert_eq!(result.outcome, TaskOutcome::Success);

    let trace = cluster.ctx.take_trace();
    assert_eq!(trace.len(), 2);
    assert_eq!(trace[0].action, "open_channel");
    assert_eq!(trace[1].action, "transfer");
    assert!(trace.iter().all(|r| r.outcome == TaskOutcome::Success));
}

#[test]
fn unreachable_node_error_is_fatal_not_transient() {
    let err = SkeinError::NodeUnreachable {
        node: 2,
        reason: "connection refused".to_string(),
    };
    assert!(!err.is_transient());
    assert!(SkeinError::ChainQuery("rpc hiccup".to_string()).is_transient());
}
